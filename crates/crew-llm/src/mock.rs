use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream;
use parking_lot::Mutex;

use crew_core::context::LlmContext;
use crew_core::errors::GatewayError;
use crew_core::messages::{ActionRequest, AgentMessage, StopReason};
use crew_core::provider::{EventStream, LlmProvider, StreamOptions};
use crew_core::stream::StreamEvent;
use crew_core::tokens::TokenUsage;

/// Pre-programmed responses for deterministic testing without API calls.
pub enum MockResponse {
    Stream(Vec<StreamEvent>),
    /// Returned from the `stream()` call itself.
    Error(GatewayError),
    Delay(Duration, Box<MockResponse>),
    /// Panics inside `stream()`.
    Panic(String),
}

impl MockResponse {
    pub fn stream_text(text: &str) -> Self {
        let mut message = AgentMessage::text(text);
        message.usage = Some(TokenUsage { input_tokens: 10, output_tokens: 5 });
        Self::Stream(vec![
            StreamEvent::Start,
            StreamEvent::TextDelta { delta: text.to_string() },
            StreamEvent::Done { message, stop_reason: StopReason::EndTurn },
        ])
    }

    /// A generation that requests the given actions, in order.
    pub fn stream_actions(actions: Vec<(&str, serde_json::Value)>) -> Self {
        let requests: Vec<ActionRequest> = actions
            .into_iter()
            .map(|(name, args)| ActionRequest::new(name, args))
            .collect();
        let mut events = vec![StreamEvent::Start];
        events.extend(
            requests
                .iter()
                .cloned()
                .map(|request| StreamEvent::ActionRequest { request }),
        );
        let mut message = AgentMessage::with_requests(None, requests);
        message.usage = Some(TokenUsage { input_tokens: 10, output_tokens: 5 });
        events.push(StreamEvent::Done { message, stop_reason: StopReason::ToolUse });
        Self::Stream(events)
    }

    pub fn stream_error(error: GatewayError) -> Self {
        Self::Stream(vec![StreamEvent::Start, StreamEvent::Error { error }])
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Provider replaying scripted responses.
///
/// Responses registered with [`MockProvider::on_system`] are served to calls
/// whose system instruction contains the key; everything else is served from
/// the default queue. Keyed scripts keep concurrent sub-agents deterministic.
pub struct MockProvider {
    default: Mutex<VecDeque<MockResponse>>,
    keyed: Mutex<Vec<(String, VecDeque<MockResponse>)>>,
    contexts: Mutex<Vec<LlmContext>>,
    call_count: AtomicUsize,
}

impl MockProvider {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            default: Mutex::new(responses.into()),
            keyed: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        }
    }

    pub fn on_system(self, key: &str, responses: Vec<MockResponse>) -> Self {
        self.keyed.lock().push((key.to_string(), responses.into()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Every context seen so far, in call order.
    pub fn contexts(&self) -> Vec<LlmContext> {
        self.contexts.lock().clone()
    }

    fn next_response(&self, context: &LlmContext) -> Option<MockResponse> {
        if let Some(system) = context.system_instruction.as_deref() {
            let mut keyed = self.keyed.lock();
            if let Some((_, queue)) = keyed.iter_mut().find(|(key, _)| system.contains(key.as_str())) {
                return queue.pop_front();
            }
        }
        self.default.lock().pop_front()
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        "mock-model"
    }

    async fn stream(
        &self,
        context: &LlmContext,
        _options: &StreamOptions,
    ) -> Result<EventStream, GatewayError> {
        let idx = self.call_count.fetch_add(1, Ordering::Relaxed);
        self.contexts.lock().push(context.clone());

        let Some(mut current) = self.next_response(context) else {
            return Err(GatewayError::InvalidRequest(format!(
                "MockProvider: no response configured for call {idx}"
            )));
        };

        loop {
            match current {
                MockResponse::Stream(events) => return Ok(Box::pin(stream::iter(events))),
                MockResponse::Error(e) => return Err(e),
                MockResponse::Delay(duration, inner) => {
                    tokio::time::sleep(duration).await;
                    current = *inner;
                }
                MockResponse::Panic(msg) => panic!("{msg}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    async fn collect(mock: &MockProvider, ctx: &LlmContext) -> Result<Vec<StreamEvent>, GatewayError> {
        let stream = mock.stream(ctx, &StreamOptions::default()).await?;
        Ok(stream.collect().await)
    }

    #[tokio::test]
    async fn text_response() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("hello world")]);
        let events = collect(&mock, &LlmContext::default()).await.unwrap();
        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], StreamEvent::Start));
        match &events[2] {
            StreamEvent::Done { message, stop_reason } => {
                assert_eq!(message.text_content(), "hello world");
                assert_eq!(*stop_reason, StopReason::EndTurn);
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn action_response_carries_requests() {
        let mock = MockProvider::new(vec![MockResponse::stream_actions(vec![
            ("read_file", serde_json::json!({"file_path": "a"})),
            ("grep", serde_json::json!({"pattern": "x"})),
        ])]);
        let events = collect(&mock, &LlmContext::default()).await.unwrap();
        let StreamEvent::Done { message, .. } = events.last().unwrap() else {
            panic!("expected Done");
        };
        let names: Vec<_> = message.action_requests().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["read_file", "grep"]);
    }

    #[tokio::test]
    async fn exhausted_responses_error() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("only one")]);
        let ctx = LlmContext::default();
        assert!(collect(&mock, &ctx).await.is_ok());
        assert!(matches!(collect(&mock, &ctx).await, Err(GatewayError::InvalidRequest(_))));
        assert_eq!(mock.call_count(), 2);
    }

    #[tokio::test]
    async fn keyed_scripts_match_system_instruction() {
        let mock = MockProvider::new(vec![MockResponse::stream_text("default")])
            .on_system("reviewer", vec![MockResponse::stream_text("looks fine")]);

        let reviewer = LlmContext::default().with_system("You are the reviewer.");
        let events = collect(&mock, &reviewer).await.unwrap();
        let StreamEvent::Done { message, .. } = events.last().unwrap() else {
            panic!("expected Done");
        };
        assert_eq!(message.text_content(), "looks fine");

        let events = collect(&mock, &LlmContext::default()).await.unwrap();
        let StreamEvent::Done { message, .. } = events.last().unwrap() else {
            panic!("expected Done");
        };
        assert_eq!(message.text_content(), "default");
        assert_eq!(mock.contexts().len(), 2);
    }

    #[tokio::test]
    async fn delayed_error() {
        tokio::time::pause();
        let mock = MockProvider::new(vec![MockResponse::delayed(
            Duration::from_secs(5),
            MockResponse::Error(GatewayError::RateLimited { retry_after: None }),
        )]);
        let result = mock.stream(&LlmContext::default(), &StreamOptions::default()).await;
        assert!(matches!(result, Err(GatewayError::RateLimited { .. })));
    }
}
