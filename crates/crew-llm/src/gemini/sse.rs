//! Turns Gemini SSE chunks into [`StreamEvent`]s.
//!
//! Gemini sends `data:` lines only, each holding one complete JSON chunk. The
//! last chunk carries `finishReason`; if the connection closes without one a
//! `Done` is synthesized from what was accumulated.

use crew_core::errors::GatewayError;
use crew_core::messages::{ActionRequest, AgentContent, AgentMessage, StopReason};
use crew_core::stream::StreamEvent;
use crew_core::tokens::TokenUsage;

use super::types::{GeminiPart, GeminiStreamChunk};

#[derive(Debug, Default)]
pub struct StreamState {
    pub text: String,
    pub requests: Vec<ActionRequest>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub started: bool,
    pub finished: bool,
}

impl StreamState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Extract the payload of every `data:` line of one SSE event block.
pub fn parse_data_lines(raw: &str) -> Vec<String> {
    raw.lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|data| data.trim_start().to_string())
        .filter(|data| !data.is_empty() && data != "[DONE]")
        .collect()
}

/// Parse one data payload and fold it into `state`.
pub fn process_data(data: &str, state: &mut StreamState) -> Vec<StreamEvent> {
    match serde_json::from_str::<GeminiStreamChunk>(data) {
        Ok(chunk) => process_chunk(&chunk, state),
        Err(e) => {
            state.finished = true;
            vec![StreamEvent::Error {
                error: GatewayError::MalformedResponse(format!("invalid stream chunk: {e}")),
            }]
        }
    }
}

pub fn process_chunk(chunk: &GeminiStreamChunk, state: &mut StreamState) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    if state.finished {
        return events;
    }
    if !state.started {
        state.started = true;
        events.push(StreamEvent::Start);
    }

    if let Some(ref error) = chunk.error {
        state.finished = true;
        events.push(StreamEvent::Error {
            error: GatewayError::from_status(error.code, error.message.clone()),
        });
        return events;
    }

    if let Some(ref usage) = chunk.usage_metadata {
        state.input_tokens = usage.prompt_token_count;
        state.output_tokens = usage.candidates_token_count;
    }

    let Some(candidate) = chunk.candidates.as_ref().and_then(|c| c.first()) else {
        return events;
    };

    if let Some(ref content) = candidate.content {
        for part in &content.parts {
            match part {
                // thought summaries are not part of the visible answer
                GeminiPart::Text { thought: Some(true), .. } => {}
                GeminiPart::Text { text, .. } => {
                    if !text.is_empty() {
                        state.text.push_str(text);
                        events.push(StreamEvent::TextDelta { delta: text.clone() });
                    }
                }
                GeminiPart::FunctionCall { function_call, thought_signature } => {
                    let mut request = ActionRequest::new(
                        function_call.name.clone(),
                        function_call.args.clone(),
                    );
                    request.thought_signature = thought_signature.clone();
                    state.requests.push(request.clone());
                    events.push(StreamEvent::ActionRequest { request });
                }
                GeminiPart::FunctionResponse { .. } | GeminiPart::Other(_) => {}
            }
        }
    }

    if let Some(ref reason) = candidate.finish_reason {
        events.push(finish(reason, state));
    }
    events
}

/// Emit `Done` for a stream that ended without a finish reason.
pub fn synthesize_done(state: &mut StreamState) -> Option<StreamEvent> {
    if state.finished {
        return None;
    }
    Some(finish("STOP", state))
}

fn finish(reason: &str, state: &mut StreamState) -> StreamEvent {
    state.finished = true;
    let stop_reason = map_stop_reason(reason, !state.requests.is_empty());

    let mut content = Vec::with_capacity(state.requests.len() + 1);
    if !state.text.is_empty() {
        content.push(AgentContent::Text { text: std::mem::take(&mut state.text) });
    }
    content.extend(state.requests.drain(..).map(AgentContent::ActionRequest));

    StreamEvent::Done {
        message: AgentMessage {
            content,
            usage: Some(TokenUsage {
                input_tokens: state.input_tokens,
                output_tokens: state.output_tokens,
            }),
            stop_reason: Some(stop_reason.clone()),
        },
        stop_reason,
    }
}

fn map_stop_reason(reason: &str, has_requests: bool) -> StopReason {
    match reason {
        "MAX_TOKENS" => StopReason::MaxTokens,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => StopReason::Safety,
        _ if has_requests => StopReason::ToolUse,
        _ => StopReason::EndTurn,
    }
}
