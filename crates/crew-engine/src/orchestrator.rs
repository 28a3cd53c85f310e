//! Top-level entry point: wires the roster, runs the supervisor loop and
//! persists checkpoints.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crew_core::events::AgentEvent;
use crew_core::ids::ConversationId;
use crew_core::messages::Message;
use crew_core::provider::{LlmProvider, StreamOptions};
use crew_core::state::{Artifacts, OrchestrationState};
use crew_core::tokens::AccumulatedTokens;
use crew_settings::CrewSettings;
use crew_store::{CheckpointRepo, Database};

use crate::agents::{AgentRole, DelegateTool, SubAgent};
use crate::dispatch::{DispatchConfig, Dispatcher, PathLocks};
use crate::error::EngineError;
use crate::personas::Personas;
use crate::registry::ToolRegistry;
use crate::runner::{AgentLoop, LoopConfig};
use crate::tools::create_default_registry;

const EVENT_CAPACITY: usize = 1024;
const SUPERVISOR: &str = "supervisor";

/// Everything the orchestrator needs, passed in explicitly.
pub struct OrchestratorDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub database: Database,
    pub personas: Personas,
    pub settings: CrewSettings,
    /// Base directory for relative tool paths.
    pub working_directory: PathBuf,
}

/// Result of one successful invocation.
#[derive(Clone, Debug)]
pub struct InvokeOutcome {
    pub final_text: String,
    pub artifacts: Artifacts,
    /// Supervisor generations in this invocation.
    pub turns: u32,
    /// Supervisor usage across the whole conversation.
    pub usage: AccumulatedTokens,
}

pub struct Orchestrator {
    supervisor: AgentLoop,
    agents: Vec<Arc<SubAgent>>,
    checkpoints: CheckpointRepo,
    events: broadcast::Sender<AgentEvent>,
}

impl Orchestrator {
    pub fn new(deps: OrchestratorDeps) -> Result<Self, EngineError> {
        let OrchestratorDeps {
            provider,
            database,
            personas,
            settings,
            working_directory,
        } = deps;
        settings
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let locks = Arc::new(PathLocks::new());
        let tools = create_default_registry()?;
        let stream_options = StreamOptions {
            temperature: Some(settings.model.temperature),
            max_output_tokens: settings.model.max_output_tokens,
            ..Default::default()
        };

        let agent_dispatch = DispatchConfig {
            action_timeout: settings.agent.action_timeout_secs.map(Duration::from_secs),
            parallel: settings.agent.parallel_actions,
            max_output_chars: (settings.agent.max_output_chars > 0)
                .then_some(settings.agent.max_output_chars),
        };

        let mut agents = Vec::with_capacity(AgentRole::ALL.len());
        let mut supervisor_tools = ToolRegistry::new();
        for role in AgentRole::ALL {
            let dispatcher = Dispatcher::new(
                Arc::new(tools.subset(role.tool_names())?),
                agent_dispatch.clone(),
                Arc::clone(&locks),
                events.clone(),
            );
            let config = LoopConfig {
                agent: role.name().to_string(),
                persona: personas.for_role(role).to_string(),
                max_turns: settings.agent.agent_max_turns,
                stream_options: stream_options.clone(),
                working_directory: working_directory.clone(),
            };
            let agent = Arc::new(SubAgent::new(
                role,
                AgentLoop::new(config, Arc::clone(&provider), dispatcher, events.clone())?,
            ));
            supervisor_tools.register(Arc::new(DelegateTool::new(Arc::clone(&agent))))?;
            agents.push(agent);
        }

        // Sub-agents enforce their own budgets, and delegate results are
        // artifacts that must reach their slots whole.
        let supervisor_dispatch = DispatchConfig {
            action_timeout: None,
            max_output_chars: None,
            ..agent_dispatch
        };
        let supervisor = AgentLoop::new(
            LoopConfig {
                agent: SUPERVISOR.to_string(),
                persona: personas.supervisor.clone(),
                max_turns: settings.agent.max_turns,
                stream_options,
                working_directory,
            },
            provider,
            Dispatcher::new(
                Arc::new(supervisor_tools),
                supervisor_dispatch,
                locks,
                events.clone(),
            ),
            events.clone(),
        )?;

        Ok(Self {
            supervisor,
            agents,
            checkpoints: CheckpointRepo::new(database),
            events,
        })
    }

    /// Progress events from the supervisor and every sub-agent.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.events.subscribe()
    }

    pub fn checkpoints(&self) -> &CheckpointRepo {
        &self.checkpoints
    }

    pub fn agents(&self) -> &[Arc<SubAgent>] {
        &self.agents
    }

    /// The supervisor's delegate actions.
    pub fn supervisor_registry(&self) -> &ToolRegistry {
        self.supervisor.dispatcher().registry()
    }

    /// Stored messages for a conversation; empty when none exists.
    pub fn history(&self, id: &ConversationId) -> Result<Vec<Message>, EngineError> {
        Ok(self
            .checkpoints
            .load(id)?
            .map(|state| state.messages().to_vec())
            .unwrap_or_default())
    }

    pub async fn invoke(&self, id: &ConversationId, text: &str) -> Result<InvokeOutcome, EngineError> {
        self.invoke_with_cancel(id, text, &CancellationToken::new()).await
    }

    /// Load or create the conversation, run the supervisor to a terminal
    /// state, and checkpoint it. Budget exhaustion still checkpoints; gateway
    /// failures and aborts do not.
    #[instrument(skip_all, fields(conversation_id = %id))]
    pub async fn invoke_with_cancel(
        &self,
        id: &ConversationId,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<InvokeOutcome, EngineError> {
        let mut state = match self.checkpoints.load(id)? {
            Some(mut state) => {
                info!(messages = state.message_count(), "resuming conversation");
                state.append(Message::user_text(text));
                state
            }
            None => OrchestrationState::seeded(id.clone(), text),
        };

        match self.supervisor.run(&mut state, cancel).await {
            Ok(outcome) => {
                self.checkpoints.save(&state)?;
                info!(turns = outcome.turns, "invocation complete");
                Ok(InvokeOutcome {
                    final_text: outcome.final_text(),
                    artifacts: state.artifacts().clone(),
                    turns: outcome.turns,
                    usage: state.usage().clone(),
                })
            }
            Err(e @ EngineError::TerminationBudgetExceeded { .. }) => {
                warn!(error = %e, "checkpointing exhausted conversation");
                self.checkpoints.save(&state)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
