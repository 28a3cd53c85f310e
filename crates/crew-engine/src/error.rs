use crew_core::errors::GatewayError;
use crew_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("turn budget of {max_turns} exhausted")]
    TerminationBudgetExceeded { max_turns: u32 },

    #[error("agent aborted")]
    Aborted,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("tool registration rejected: {0}")]
    Registration(String),

    #[error("{0}")]
    Internal(String),
}
