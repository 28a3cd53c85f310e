//! The turn loop shared by the supervisor and every sub-agent.
//!
//! ```text
//! AwaitGeneration ──no requests──▶ Terminate
//!        │
//!        └──requests──▶ DispatchActions ──▶ Merge ──▶ AwaitGeneration
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crew_core::context::LlmContext;
use crew_core::errors::GatewayError;
use crew_core::events::AgentEvent;
use crew_core::ids::RunId;
use crew_core::messages::{ActionRequest, ActionResult, AgentMessage};
use crew_core::provider::{LlmProvider, StreamOptions};
use crew_core::state::OrchestrationState;
use crew_core::stream::StreamEvent;
use crew_core::tools::ToolContext;

use crate::dispatch::{emit, Dispatcher};
use crate::error::EngineError;

#[derive(Clone, Debug)]
pub struct LoopConfig {
    /// Shown in events, logs and tool contexts.
    pub agent: String,
    /// System instruction for every generation.
    pub persona: String,
    /// Generations allowed per run.
    pub max_turns: u32,
    pub stream_options: StreamOptions,
    pub working_directory: PathBuf,
}

/// How a run ended.
#[derive(Clone, Debug)]
pub struct LoopOutcome {
    pub final_message: AgentMessage,
    /// Generations performed by this run.
    pub turns: u32,
}

impl LoopOutcome {
    pub fn final_text(&self) -> String {
        self.final_message.text_content()
    }
}

enum Phase {
    AwaitGeneration,
    DispatchActions(AgentMessage),
    Merge(AgentMessage, Vec<ActionResult>),
    Terminate(AgentMessage),
}

/// One agent's loop: a persona, a dispatcher over its own registry, and the
/// shared generation capability. Holds no per-run state.
pub struct AgentLoop {
    config: LoopConfig,
    provider: Arc<dyn LlmProvider>,
    dispatcher: Dispatcher,
    events: broadcast::Sender<AgentEvent>,
}

impl AgentLoop {
    pub fn new(
        config: LoopConfig,
        provider: Arc<dyn LlmProvider>,
        dispatcher: Dispatcher,
        events: broadcast::Sender<AgentEvent>,
    ) -> Result<Self, EngineError> {
        if config.max_turns == 0 {
            return Err(EngineError::Config(format!(
                "{}: turn budget must be at least 1",
                config.agent
            )));
        }
        Ok(Self {
            config,
            provider,
            dispatcher,
            events,
        })
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Drive `state` until a generation carries no action requests.
    ///
    /// On error `state` keeps everything merged so far.
    #[instrument(skip_all, fields(agent = %self.config.agent, conversation_id = %state.conversation_id()))]
    pub async fn run(
        &self,
        state: &mut OrchestrationState,
        cancel: &CancellationToken,
    ) -> Result<LoopOutcome, EngineError> {
        let run_id = RunId::new();
        let tool_ctx = ToolContext {
            run_id: run_id.clone(),
            agent: self.config.agent.clone(),
            working_directory: self.config.working_directory.clone(),
            abort_signal: cancel.clone(),
        };
        let mut turns = 0u32;
        let mut phase = Phase::AwaitGeneration;

        loop {
            // Dispatched actions already ran; their results are merged before
            // a cancel is honoured.
            if cancel.is_cancelled() && !matches!(phase, Phase::Merge(..)) {
                return Err(EngineError::Aborted);
            }

            phase = match phase {
                Phase::AwaitGeneration => {
                    if turns >= self.config.max_turns {
                        info!(max_turns = self.config.max_turns, "turn budget exhausted");
                        return Err(EngineError::TerminationBudgetExceeded {
                            max_turns: self.config.max_turns,
                        });
                    }
                    turns += 1;
                    let message = self.generate(state, &run_id, turns, cancel).await?;
                    if message.has_action_requests() {
                        Phase::DispatchActions(message)
                    } else {
                        Phase::Terminate(message)
                    }
                }

                Phase::DispatchActions(message) => {
                    let requests: Vec<ActionRequest> =
                        message.action_requests().into_iter().cloned().collect();
                    let results = self.dispatcher.dispatch(&requests, &tool_ctx).await;
                    Phase::Merge(message, results)
                }

                Phase::Merge(message, results) => {
                    self.merge(state, message, results, &run_id);
                    Phase::AwaitGeneration
                }

                Phase::Terminate(message) => {
                    state.append_generation(message.clone());
                    debug!(turns, "agent finished");
                    emit(
                        &self.events,
                        AgentEvent::AgentComplete {
                            run_id,
                            agent: self.config.agent.clone(),
                            turns,
                        },
                    );
                    return Ok(LoopOutcome {
                        final_message: message,
                        turns,
                    });
                }
            };
        }
    }

    async fn generate(
        &self,
        state: &OrchestrationState,
        run_id: &RunId,
        turn: u32,
        cancel: &CancellationToken,
    ) -> Result<AgentMessage, EngineError> {
        emit(
            &self.events,
            AgentEvent::TurnStart {
                run_id: run_id.clone(),
                agent: self.config.agent.clone(),
                turn,
            },
        );

        let context = LlmContext::new(state.messages().to_vec())
            .with_system(self.config.persona.clone())
            .with_tools(self.dispatcher.registry().definitions());

        let mut stream = self
            .provider
            .stream(&context, &self.config.stream_options)
            .await?;

        while let Some(event) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(EngineError::Aborted);
            }
            match event {
                StreamEvent::TextDelta { delta } => emit(
                    &self.events,
                    AgentEvent::TextDelta {
                        run_id: run_id.clone(),
                        agent: self.config.agent.clone(),
                        delta,
                    },
                ),
                StreamEvent::Done { message, .. } => return Ok(message),
                StreamEvent::Error { error } => return Err(EngineError::Gateway(error)),
                _ => {}
            }
        }

        Err(EngineError::Gateway(GatewayError::StreamInterrupted(
            "stream ended without a final message".into(),
        )))
    }

    /// Append the generation and its results, then fill artifact slots from
    /// successful results. Later results overwrite earlier ones.
    fn merge(
        &self,
        state: &mut OrchestrationState,
        message: AgentMessage,
        results: Vec<ActionResult>,
        run_id: &RunId,
    ) {
        state.append_generation(message);
        for result in results {
            let slot = result
                .success
                .then(|| self.dispatcher.registry().descriptor(&result.action))
                .flatten()
                .and_then(|d| d.produces);
            if let Some(slot) = slot {
                state.set_artifact(slot, result.payload.as_text());
                emit(
                    &self.events,
                    AgentEvent::ArtifactUpdated {
                        run_id: run_id.clone(),
                        agent: self.config.agent.clone(),
                        slot,
                    },
                );
            }
            state.append_result(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    use crew_core::errors::GatewayError;
    use crew_core::ids::ConversationId;
    use crew_core::messages::{ActionPayload, Message};
    use crew_core::state::ArtifactSlot;
    use crew_core::tools::{ArgSpec, ArgType, ErrorKind, Tool, ToolArgs, ToolDescriptor, ToolError, ToolOutput};
    use crew_llm::mock::{MockProvider, MockResponse};

    use crate::dispatch::{DispatchConfig, PathLocks};
    use crate::registry::ToolRegistry;

    /// Returns its `text` argument and fills the code slot.
    struct DraftTool;

    #[async_trait]
    impl Tool for DraftTool {
        fn descriptor(&self) -> ToolDescriptor {
            ToolDescriptor::new("draft", "Draft some code")
                .arg(ArgSpec::required("text", ArgType::String, "what to return"))
                .produces(ArtifactSlot::Code)
        }

        async fn execute(&self, args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
            let text = args.str("text")?;
            if text == "fail" {
                return Err(ToolError::Execution("draft failed".into()));
            }
            Ok(ToolOutput::text(text))
        }
    }

    fn agent_loop(
        provider: Arc<MockProvider>,
        max_turns: u32,
    ) -> (AgentLoop, broadcast::Receiver<AgentEvent>) {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(DraftTool)).unwrap();
        let (tx, rx) = broadcast::channel(256);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            DispatchConfig::default(),
            Arc::new(PathLocks::new()),
            tx.clone(),
        );
        let config = LoopConfig {
            agent: "writer".into(),
            persona: "You write code.".into(),
            max_turns,
            stream_options: StreamOptions::default(),
            working_directory: std::env::temp_dir(),
        };
        (AgentLoop::new(config, provider, dispatcher, tx).unwrap(), rx)
    }

    fn seeded() -> OrchestrationState {
        OrchestrationState::seeded(ConversationId::new(), "build it")
    }

    fn drain(rx: &mut broadcast::Receiver<AgentEvent>) -> Vec<&'static str> {
        let mut types = Vec::new();
        while let Ok(event) = rx.try_recv() {
            types.push(event.event_type());
        }
        types
    }

    #[tokio::test]
    async fn final_message_terminates_without_dispatch() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("All done.")]));
        let (agent, mut rx) = agent_loop(Arc::clone(&provider), 5);
        let mut state = seeded();

        let outcome = agent.run(&mut state, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.final_text(), "All done.");
        assert_eq!(outcome.turns, 1);
        assert!(state.artifacts().is_empty());
        assert_eq!(state.message_count(), 2);
        assert!(!state.messages().iter().any(|m| matches!(m, Message::ActionResult(_))));
        assert_eq!(drain(&mut rx), vec!["turn_start", "text_delta", "agent_complete"]);
    }

    #[tokio::test]
    async fn action_result_fills_artifact_slot() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![("draft", json!({"text": "fn main() {}"}))]),
            MockResponse::stream_text("Wrote main."),
        ]));
        let (agent, mut rx) = agent_loop(Arc::clone(&provider), 5);
        let mut state = seeded();

        let outcome = agent.run(&mut state, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.final_text(), "Wrote main.");
        assert_eq!(outcome.turns, 2);
        assert_eq!(state.artifacts().code.as_deref(), Some("fn main() {}"));
        assert_eq!(state.turn_count(), 2);

        // user, agent(request), result, agent(final)
        let roles: Vec<&str> = state.messages().iter().map(Message::role).collect();
        assert_eq!(roles, vec!["user", "agent", "action_result", "agent"]);
        let Message::Agent(ref request_msg) = state.messages()[1] else {
            panic!("expected agent message");
        };
        let Message::ActionResult(ref result) = state.messages()[2] else {
            panic!("expected action result");
        };
        assert_eq!(result.request_id, request_msg.action_requests()[0].id);

        let events = drain(&mut rx);
        assert!(events.contains(&"action_start"));
        assert!(events.contains(&"artifact_updated"));

        // the second generation saw the result
        let second = &provider.contexts()[1];
        assert_eq!(second.messages.len(), 3);
        assert_eq!(second.system_instruction.as_deref(), Some("You write code."));
        assert_eq!(second.tools[0].name, "draft");
    }

    #[tokio::test]
    async fn later_results_win_and_failures_leave_slot_alone() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![
                ("draft", json!({"text": "v1"})),
                ("draft", json!({"text": "v2"})),
                ("draft", json!({"text": "fail"})),
            ]),
            MockResponse::stream_text("ok"),
        ]));
        let (agent, _rx) = agent_loop(provider, 5);
        let mut state = seeded();
        agent.run(&mut state, &CancellationToken::new()).await.unwrap();

        assert_eq!(state.artifacts().code.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn unknown_action_is_reported_and_loop_continues() {
        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![("edit_and_reapply", json!({"file_path": "x"}))]),
            MockResponse::stream_text("I cannot edit files."),
        ]));
        let (agent, _rx) = agent_loop(provider, 5);
        let mut state = seeded();

        let outcome = agent.run(&mut state, &CancellationToken::new()).await.unwrap();

        assert_eq!(outcome.final_text(), "I cannot edit files.");
        let Message::ActionResult(ref result) = state.messages()[2] else {
            panic!("expected action result");
        };
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::UnknownAction));
        assert!(state.artifacts().is_empty());
    }

    #[tokio::test]
    async fn budget_exhaustion_is_an_error() {
        let responses = (0..5)
            .map(|_| MockResponse::stream_actions(vec![("draft", json!({"text": "again"}))]))
            .collect();
        let provider = Arc::new(MockProvider::new(responses));
        let (agent, _rx) = agent_loop(Arc::clone(&provider), 3);
        let mut state = seeded();

        let err = agent.run(&mut state, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, EngineError::TerminationBudgetExceeded { max_turns: 3 }));
        assert_eq!(provider.call_count(), 3);
        // three merged turns survive in the state
        assert_eq!(state.turn_count(), 3);
        assert_eq!(state.message_count(), 7);
    }

    #[tokio::test]
    async fn zero_budget_rejected() {
        let provider = Arc::new(MockProvider::new(vec![]));
        let (tx, _rx) = broadcast::channel(8);
        let dispatcher = Dispatcher::new(
            Arc::new(ToolRegistry::new()),
            DispatchConfig::default(),
            Arc::new(PathLocks::new()),
            tx.clone(),
        );
        let config = LoopConfig {
            agent: "supervisor".into(),
            persona: String::new(),
            max_turns: 0,
            stream_options: StreamOptions::default(),
            working_directory: std::env::temp_dir(),
        };
        assert!(matches!(
            AgentLoop::new(config, provider, dispatcher, tx),
            Err(EngineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn cancelled_before_start_aborts() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_text("never")]));
        let (agent, _rx) = agent_loop(Arc::clone(&provider), 5);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent.run(&mut seeded(), &cancel).await.unwrap_err();

        assert!(matches!(err, EngineError::Aborted));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn cancellation_during_dispatch_keeps_results() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();

        /// Cancels the run from inside a tool call.
        struct CancelTool(CancellationToken);

        #[async_trait]
        impl Tool for CancelTool {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("stop", "Cancel the run")
            }

            async fn execute(&self, _args: ToolArgs, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
                self.0.cancel();
                Ok(ToolOutput::text("stopping"))
            }
        }

        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![("stop", json!({}))]),
            MockResponse::stream_text("unreachable"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(CancelTool(trigger))).unwrap();
        let (tx, _rx) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            DispatchConfig::default(),
            Arc::new(PathLocks::new()),
            tx.clone(),
        );
        let config = LoopConfig {
            agent: "supervisor".into(),
            persona: "coordinate".into(),
            max_turns: 5,
            stream_options: StreamOptions::default(),
            working_directory: std::env::temp_dir(),
        };
        let agent = AgentLoop::new(config, Arc::clone(&provider) as Arc<dyn LlmProvider>, dispatcher, tx).unwrap();

        let mut state = seeded();
        let err = agent.run(&mut state, &cancel).await.unwrap_err();
        assert!(matches!(err, EngineError::Aborted));
        assert_eq!(provider.call_count(), 1);

        let roles: Vec<&str> = state.messages().iter().map(Message::role).collect();
        assert_eq!(roles, vec!["user", "agent", "action_result"]);
        assert_eq!(state.turn_count(), 1);
    }

    #[tokio::test]
    async fn generation_error_surfaces_as_gateway() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::stream_error(
            GatewayError::AuthenticationFailed("bad key".into()),
        )]));
        let (agent, _rx) = agent_loop(provider, 5);
        let err = agent.run(&mut seeded(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::AuthenticationFailed(_))));
    }

    #[tokio::test]
    async fn stream_without_done_is_interrupted() {
        let provider = Arc::new(MockProvider::new(vec![MockResponse::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: "half".into() },
        ])]));
        let (agent, _rx) = agent_loop(provider, 5);
        let err = agent.run(&mut seeded(), &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, EngineError::Gateway(GatewayError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn tool_context_carries_agent_and_workdir() {
        struct Capture;

        #[async_trait]
        impl Tool for Capture {
            fn descriptor(&self) -> ToolDescriptor {
                ToolDescriptor::new("capture", "Report the context")
            }

            async fn execute(&self, _args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
                Ok(ToolOutput::json(json!({
                    "agent": ctx.agent,
                    "dir": ctx.working_directory.display().to_string(),
                })))
            }
        }

        let provider = Arc::new(MockProvider::new(vec![
            MockResponse::stream_actions(vec![("capture", json!({}))]),
            MockResponse::stream_text("done"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Capture)).unwrap();
        let (tx, _rx) = broadcast::channel(64);
        let dispatcher = Dispatcher::new(
            Arc::new(registry),
            DispatchConfig::default(),
            Arc::new(PathLocks::new()),
            tx.clone(),
        );
        let config = LoopConfig {
            agent: "tester".into(),
            persona: "test".into(),
            max_turns: 5,
            stream_options: StreamOptions::default(),
            working_directory: PathBuf::from("/home/user/project"),
        };
        let agent = AgentLoop::new(config, provider, dispatcher, tx).unwrap();
        let mut state = seeded();
        agent.run(&mut state, &CancellationToken::new()).await.unwrap();

        let Message::ActionResult(ref result) = state.messages()[2] else {
            panic!("expected action result");
        };
        let ActionPayload::Structured(ref value) = result.payload else {
            panic!("expected structured payload");
        };
        assert_eq!(value["agent"], "tester");
        assert_eq!(value["dir"], "/home/user/project");
    }
}
