use serde::{Deserialize, Serialize};

use crate::ids::{ActionId, RunId};
use crate::state::ArtifactSlot;
use crate::tools::ErrorKind;

/// Progress events broadcast by every agent loop, nested loops included.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    #[serde(rename = "turn_start")]
    TurnStart { run_id: RunId, agent: String, turn: u32 },

    #[serde(rename = "text_delta")]
    TextDelta { run_id: RunId, agent: String, delta: String },

    #[serde(rename = "action_start")]
    ActionStart {
        run_id: RunId,
        agent: String,
        request_id: ActionId,
        action: String,
    },

    #[serde(rename = "action_end")]
    ActionEnd {
        run_id: RunId,
        agent: String,
        request_id: ActionId,
        action: String,
        success: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
        duration_ms: u64,
    },

    #[serde(rename = "artifact_updated")]
    ArtifactUpdated { run_id: RunId, agent: String, slot: ArtifactSlot },

    #[serde(rename = "agent_complete")]
    AgentComplete { run_id: RunId, agent: String, turns: u32 },
}

impl AgentEvent {
    pub fn agent(&self) -> &str {
        match self {
            Self::TurnStart { agent, .. }
            | Self::TextDelta { agent, .. }
            | Self::ActionStart { agent, .. }
            | Self::ActionEnd { agent, .. }
            | Self::ArtifactUpdated { agent, .. }
            | Self::AgentComplete { agent, .. } => agent,
        }
    }

    pub fn run_id(&self) -> &RunId {
        match self {
            Self::TurnStart { run_id, .. }
            | Self::TextDelta { run_id, .. }
            | Self::ActionStart { run_id, .. }
            | Self::ActionEnd { run_id, .. }
            | Self::ArtifactUpdated { run_id, .. }
            | Self::AgentComplete { run_id, .. } => run_id,
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TurnStart { .. } => "turn_start",
            Self::TextDelta { .. } => "text_delta",
            Self::ActionStart { .. } => "action_start",
            Self::ActionEnd { .. } => "action_end",
            Self::ArtifactUpdated { .. } => "artifact_updated",
            Self::AgentComplete { .. } => "agent_complete",
        }
    }
}
