use crate::messages::Message;
use crate::tools::ToolDefinition;

/// Everything one generation call sees.
#[derive(Clone, Debug, Default)]
pub struct LlmContext {
    pub messages: Vec<Message>,
    pub system_instruction: Option<String>,
    pub tools: Vec<ToolDefinition>,
}

impl LlmContext {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            ..Self::default()
        }
    }

    pub fn with_system(mut self, instruction: impl Into<String>) -> Self {
        self.system_instruction = Some(instruction.into());
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolDefinition>) -> Self {
        self.tools = tools;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_sets_fields() {
        let ctx = LlmContext::new(vec![Message::user_text("hi")])
            .with_system("be brief")
            .with_tools(vec![ToolDefinition {
                name: "grep".into(),
                description: "search".into(),
                parameters_schema: serde_json::json!({"type": "object"}),
            }]);
        assert_eq!(ctx.messages.len(), 1);
        assert_eq!(ctx.system_instruction.as_deref(), Some("be brief"));
        assert_eq!(ctx.tools[0].name, "grep");
    }
}
