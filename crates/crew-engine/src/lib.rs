//! # crew-engine
//!
//! The agent loop, its dispatcher and tool registry, the five specialist
//! sub-agents, and the supervisor-facing [`Orchestrator`].

pub mod agents;
pub mod dispatch;
pub mod error;
pub mod orchestrator;
pub mod personas;
pub mod registry;
pub mod runner;
pub mod tools;
pub mod truncate;

pub use agents::{AgentRole, DelegateTool, SubAgent};
pub use dispatch::{DispatchConfig, Dispatcher, PathLocks};
pub use error::EngineError;
pub use orchestrator::{InvokeOutcome, Orchestrator, OrchestratorDeps};
pub use personas::Personas;
pub use registry::ToolRegistry;
pub use runner::{AgentLoop, LoopConfig, LoopOutcome};
