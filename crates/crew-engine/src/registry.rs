use std::collections::HashMap;
use std::sync::Arc;

use crew_core::tools::{Tool, ToolDefinition, ToolDescriptor};

use crate::error::EngineError;

struct ToolEntry {
    tool: Arc<dyn Tool>,
    descriptor: ToolDescriptor,
}

/// Name-to-handler map. Descriptors are checked once at registration and
/// cached; they never change afterwards.
pub struct ToolRegistry {
    tools: HashMap<String, ToolEntry>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Malformed descriptors and duplicate names are rejected.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), EngineError> {
        let descriptor = tool.descriptor();
        descriptor.check().map_err(EngineError::Registration)?;
        if self.tools.contains_key(&descriptor.name) {
            return Err(EngineError::Registration(format!(
                "duplicate tool name '{}'",
                descriptor.name
            )));
        }
        self.tools
            .insert(descriptor.name.clone(), ToolEntry { tool, descriptor });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|e| Arc::clone(&e.tool))
    }

    pub fn descriptor(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.get(name).map(|e| &e.descriptor)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Descriptors sorted by name.
    pub fn descriptors(&self) -> Vec<&ToolDescriptor> {
        let mut descriptors: Vec<&ToolDescriptor> =
            self.tools.values().map(|e| &e.descriptor).collect();
        descriptors.sort_by(|a, b| a.name.cmp(&b.name));
        descriptors
    }

    /// Provider-facing definitions, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.descriptors()
            .into_iter()
            .map(ToolDescriptor::to_definition)
            .collect()
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    /// A registry holding only `names`. Every name must be registered here.
    pub fn subset(&self, names: &[&str]) -> Result<Self, EngineError> {
        let mut subset = Self::new();
        for name in names {
            let entry = self.tools.get(*name).ok_or_else(|| {
                EngineError::Registration(format!("tool '{name}' is not registered"))
            })?;
            subset.tools.insert(
                (*name).to_string(),
                ToolEntry {
                    tool: Arc::clone(&entry.tool),
                    descriptor: entry.descriptor.clone(),
                },
            );
        }
        Ok(subset)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
