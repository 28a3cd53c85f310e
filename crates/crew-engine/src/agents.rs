//! Specialized sub-agents and the delegate actions the supervisor calls them
//! through.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crew_core::ids::ConversationId;
use crew_core::state::{ArtifactSlot, OrchestrationState};
use crew_core::tools::{ArgSpec, ArgType, Tool, ToolArgs, ToolContext, ToolDescriptor, ToolError, ToolOutput};

use crate::error::EngineError;
use crate::registry::ToolRegistry;
use crate::runner::AgentLoop;

/// The fixed roster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AgentRole {
    Research,
    Architect,
    Writer,
    Reviewer,
    Tester,
}

impl AgentRole {
    pub const ALL: [AgentRole; 5] = [
        AgentRole::Research,
        AgentRole::Architect,
        AgentRole::Writer,
        AgentRole::Reviewer,
        AgentRole::Tester,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::Architect => "architect",
            Self::Writer => "writer",
            Self::Reviewer => "reviewer",
            Self::Tester => "tester",
        }
    }

    /// Action name the supervisor uses to delegate.
    pub fn delegate_action(self) -> &'static str {
        match self {
            Self::Research => "research_task",
            Self::Architect => "architect_task",
            Self::Writer => "write_code",
            Self::Reviewer => "review_code",
            Self::Tester => "test_code",
        }
    }

    pub fn arg_name(self) -> &'static str {
        match self {
            Self::Research => "description",
            Self::Architect => "requirements",
            Self::Writer => "spec",
            Self::Reviewer | Self::Tester => "code",
        }
    }

    pub fn task_prefix(self) -> &'static str {
        match self {
            Self::Research => "Research: ",
            Self::Architect => "Architecture for: ",
            Self::Writer => "Write code for: ",
            Self::Reviewer => "Review this code:\n",
            Self::Tester => "Test this code:\n",
        }
    }

    pub fn slot(self) -> ArtifactSlot {
        match self {
            Self::Research => ArtifactSlot::Research,
            Self::Architect => ArtifactSlot::Architecture,
            Self::Writer => ArtifactSlot::Code,
            Self::Reviewer => ArtifactSlot::Review,
            Self::Tester => ArtifactSlot::Tests,
        }
    }

    /// The only tools this agent may call.
    pub fn tool_names(self) -> &'static [&'static str] {
        match self {
            Self::Research => &[
                "search_web",
                "read_file",
                "grep",
                "list_dir",
                "fetch_url_content",
                "search_files",
                "read_code",
            ],
            Self::Architect => &[
                "search_files",
                "list_dir",
                "read_file",
                "grep",
                "fetch_url_content",
                "read_code",
            ],
            Self::Writer => &[
                "edit_and_reapply",
                "read_file",
                "read_code",
                "list_dir",
                "grep",
                "search_files",
                "run_terminal",
            ],
            Self::Reviewer => &[
                "search_files",
                "search_web",
                "fetch_url_content",
                "grep",
                "list_dir",
                "read_file",
                "read_code",
            ],
            Self::Tester => &["run_terminal", "grep", "list_dir", "read_file", "read_code"],
        }
    }

    fn description(self) -> &'static str {
        match self {
            Self::Research => "Research coding requirements and context.",
            Self::Architect => "Design software architecture and file structure.",
            Self::Writer => "Write complete, production-ready code from an architecture spec.",
            Self::Reviewer => "Review code and suggest improvements.",
            Self::Tester => "Write tests and validate code.",
        }
    }

    fn arg_description(self) -> &'static str {
        match self {
            Self::Research => "What to research",
            Self::Architect => "Requirements to design for",
            Self::Writer => "Specification of the code to write",
            Self::Reviewer => "Code to review",
            Self::Tester => "Code to test",
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A persona plus a restricted registry, driven by its own [`AgentLoop`].
pub struct SubAgent {
    role: AgentRole,
    agent_loop: AgentLoop,
}

impl SubAgent {
    pub fn new(role: AgentRole, agent_loop: AgentLoop) -> Self {
        Self { role, agent_loop }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn registry(&self) -> &ToolRegistry {
        self.agent_loop.dispatcher().registry()
    }

    /// Run `task` on a private state and return the final text. The caller's
    /// state is never visible here.
    #[instrument(skip_all, fields(agent = %self.role))]
    pub async fn run(&self, task: &str, cancel: &CancellationToken) -> Result<String, EngineError> {
        let mut state = OrchestrationState::seeded(ConversationId::new(), task);
        let outcome = self.agent_loop.run(&mut state, cancel).await?;
        info!(turns = outcome.turns, "sub-agent finished");
        Ok(outcome.final_text())
    }
}

/// Supervisor-facing action that hands its argument to a [`SubAgent`].
pub struct DelegateTool {
    agent: Arc<SubAgent>,
}

impl DelegateTool {
    pub fn new(agent: Arc<SubAgent>) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn descriptor(&self) -> ToolDescriptor {
        let role = self.agent.role();
        ToolDescriptor::new(role.delegate_action(), role.description())
            .arg(ArgSpec::required(role.arg_name(), ArgType::String, role.arg_description()))
            .produces(role.slot())
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let role = self.agent.role();
        let task = format!("{}{}", role.task_prefix(), args.str(role.arg_name())?);
        match self.agent.run(&task, &ctx.abort_signal).await {
            Ok(text) => Ok(ToolOutput::text(text)),
            Err(e) => {
                warn!(agent = %role, error = %e, "sub-agent failed");
                Err(ToolError::Execution(format!("{role} agent failed: {e}")))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::broadcast;

    use crew_core::errors::GatewayError;
    use crew_core::messages::Message;
    use crew_core::provider::{LlmProvider, StreamOptions};
    use crew_core::tools::ErrorKind;
    use crew_llm::mock::{MockProvider, MockResponse};

    use crate::dispatch::{DispatchConfig, Dispatcher, PathLocks};
    use crate::runner::LoopConfig;
    use crate::tools::create_default_registry;

    fn sub_agent(role: AgentRole, provider: Arc<dyn LlmProvider>, max_turns: u32) -> Arc<SubAgent> {
        let all = create_default_registry().unwrap();
        let registry = Arc::new(all.subset(role.tool_names()).unwrap());
        let (tx, _) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(
            registry,
            DispatchConfig::default(),
            Arc::new(PathLocks::new()),
            tx.clone(),
        );
        let config = LoopConfig {
            agent: role.name().into(),
            persona: format!("persona for {role}"),
            max_turns,
            stream_options: StreamOptions::default(),
            working_directory: std::env::temp_dir(),
        };
        Arc::new(SubAgent::new(role, AgentLoop::new(config, provider, dispatcher, tx).unwrap()))
    }

    #[test]
    fn roster_tools_exist_and_reviewer_cannot_edit() {
        let all = create_default_registry().unwrap();
        for role in AgentRole::ALL {
            assert!(all.subset(role.tool_names()).is_ok(), "{role}");
        }
        assert!(!AgentRole::Reviewer.tool_names().contains(&"edit_and_reapply"));
        assert!(AgentRole::Writer.tool_names().contains(&"edit_and_reapply"));
        assert_eq!(AgentRole::Tester.tool_names().len(), 5);
    }

    #[tokio::test]
    async fn reviewer_edit_request_is_unknown_action() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![(
                "edit_and_reapply",
                json!({"file_path": "x.py", "start_line": 1, "end_line": 1, "new_code": "pass"}),
            )]),
            MockResponse::stream_text("Looks fine."),
        ]));
        let reviewer = sub_agent(AgentRole::Reviewer, Arc::clone(&provider) as Arc<dyn LlmProvider>, 5);

        let text = reviewer.run("Review this code:\nx = 1", &CancellationToken::new()).await.unwrap();
        assert_eq!(text, "Looks fine.");

        let second = &provider.contexts()[1];
        let Message::ActionResult(ref result) = second.messages[2] else {
            panic!("expected action result");
        };
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::UnknownAction));
        assert!(!second.tools.iter().any(|t| t.name == "edit_and_reapply"));
    }

    #[tokio::test]
    async fn delegate_prefixes_task_and_returns_final_text() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("use tokio")]));
        let research = sub_agent(AgentRole::Research, Arc::clone(&provider) as Arc<dyn LlmProvider>, 5);
        let tool = DelegateTool::new(research);

        let descriptor = tool.descriptor();
        assert_eq!(descriptor.name, "research_task");
        assert_eq!(descriptor.produces, Some(ArtifactSlot::Research));

        let args = descriptor.validate(&json!({"description": "async runtimes"})).unwrap();
        let out = tool
            .execute(args, &ToolContext::new("supervisor", std::env::temp_dir()))
            .await
            .unwrap();
        assert_eq!(out.payload.as_text(), "use tokio");

        let seen = &provider.contexts()[0];
        assert_eq!(seen.messages, vec![Message::user_text("Research: async runtimes")]);
        assert_eq!(seen.system_instruction.as_deref(), Some("persona for research"));
    }

    #[tokio::test]
    async fn nested_failures_become_execution_errors() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_error(
            GatewayError::Overloaded,
        )]));
        let tool = DelegateTool::new(sub_agent(AgentRole::Tester, provider, 5));
        let args = tool.descriptor().validate(&json!({"code": "fn f() {}"})).unwrap();
        let err = tool
            .execute(args, &ToolContext::new("supervisor", std::env::temp_dir()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(msg) if msg.contains("tester")));

        // nested budget exhaustion
        let looping = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![("list_dir", json!({"root_path": "."}))]),
            MockResponse::stream_actions(vec![("list_dir", json!({"root_path": "."}))]),
        ]));
        let tool = DelegateTool::new(sub_agent(AgentRole::Architect, looping, 2));
        let args = tool.descriptor().validate(&json!({"requirements": "x"})).unwrap();
        let err = tool
            .execute(args, &ToolContext::new("supervisor", std::env::temp_dir()))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Execution(msg) if msg.contains("turn budget")));
    }
}
