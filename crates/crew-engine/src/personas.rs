use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::agents::AgentRole;
use crate::error::EngineError;

/// System instructions for the supervisor and each sub-agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Personas {
    pub supervisor: String,
    pub research: String,
    pub architect: String,
    pub writer: String,
    pub reviewer: String,
    pub tester: String,
}

impl Personas {
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("cannot read personas {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))
    }

    pub fn from_json(raw: &str) -> Result<Self, EngineError> {
        let personas: Self = serde_json::from_str(raw)
            .map_err(|e| EngineError::Config(format!("invalid personas: {e}")))?;
        personas.validate()?;
        Ok(personas)
    }

    pub fn for_role(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Research => &self.research,
            AgentRole::Architect => &self.architect,
            AgentRole::Writer => &self.writer,
            AgentRole::Reviewer => &self.reviewer,
            AgentRole::Tester => &self.tester,
        }
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.supervisor.trim().is_empty() {
            return Err(EngineError::Config("persona 'supervisor' is empty".into()));
        }
        for role in AgentRole::ALL {
            if self.for_role(role).trim().is_empty() {
                return Err(EngineError::Config(format!(
                    "persona '{}' is empty",
                    role.name()
                )));
            }
        }
        Ok(())
    }
}
