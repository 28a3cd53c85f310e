use crate::errors::GatewayError;
use crate::messages::{ActionRequest, AgentMessage, StopReason};

/// Events emitted while a generation streams.
///
/// Order: `Start → (TextDelta | ActionRequest)* → Done`. `Error` may replace `Done`.
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Start,
    TextDelta { delta: String },
    ActionRequest { request: ActionRequest },
    Retry { attempt: u32, max_retries: u32, delay_ms: u64, error_kind: String },
    Done { message: AgentMessage, stop_reason: StopReason },
    Error { error: GatewayError },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let done = StreamEvent::Done {
            message: AgentMessage::text("hi"),
            stop_reason: StopReason::EndTurn,
        };
        assert!(done.is_terminal());
        assert!(StreamEvent::Error { error: GatewayError::Cancelled }.is_terminal());
        assert!(!StreamEvent::TextDelta { delta: "x".into() }.is_terminal());
        assert!(!StreamEvent::Start.is_terminal());
    }
}
