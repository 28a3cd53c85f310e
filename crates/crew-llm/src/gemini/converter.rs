//! Converts an [`LlmContext`] into a Gemini request body.
//!
//! Consecutive action results are folded into one `user` content so each
//! model turn's calls are answered together.

use serde_json::Value;

use crew_core::context::LlmContext;
use crew_core::messages::{ActionResult, AgentContent, Message};
use crew_core::provider::StreamOptions;
use crew_core::tools::ToolDefinition;

use super::types::{
    FunctionCallData, FunctionDeclaration, FunctionResponseData, GeminiContent, GeminiPart,
    GeminiRequest, GeminiTool, GenerationConfig, SystemInstruction,
};

/// Sent when a replayed call has no recorded signature; Gemini accepts it in
/// place of a real one.
const SKIP_THOUGHT_SIGNATURE: &str = "skip_thought_signature_validator";

/// Schema keys Gemini rejects in function declarations.
const UNSUPPORTED_SCHEMA_KEYS: [&str; 3] = ["additionalProperties", "$schema", "default"];

pub fn build_request(context: &LlmContext, options: &StreamOptions) -> GeminiRequest {
    GeminiRequest {
        contents: convert_messages(&context.messages),
        system_instruction: context
            .system_instruction
            .as_ref()
            .filter(|s| !s.is_empty())
            .map(|s| SystemInstruction { parts: vec![GeminiPart::text(s.clone())] }),
        tools: convert_tools(&context.tools),
        generation_config: GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_output_tokens,
            stop_sequences: options.stop_sequences.clone(),
        },
    }
}

pub fn convert_messages(messages: &[Message]) -> Vec<GeminiContent> {
    let mut contents: Vec<GeminiContent> = Vec::new();
    let mut pending_responses: Vec<GeminiPart> = Vec::new();

    for message in messages {
        if let Message::ActionResult(result) = message {
            pending_responses.push(function_response(result));
            continue;
        }
        if !pending_responses.is_empty() {
            contents.push(GeminiContent {
                role: "user".into(),
                parts: std::mem::take(&mut pending_responses),
            });
        }

        match message {
            Message::User(user) => {
                if !user.text.is_empty() {
                    contents.push(GeminiContent {
                        role: "user".into(),
                        parts: vec![GeminiPart::text(user.text.clone())],
                    });
                }
            }
            Message::Agent(agent) => {
                let parts: Vec<GeminiPart> = agent
                    .content
                    .iter()
                    .filter_map(|block| match block {
                        AgentContent::Text { text } if text.is_empty() => None,
                        AgentContent::Text { text } => Some(GeminiPart::text(text.clone())),
                        AgentContent::ActionRequest(request) => Some(GeminiPart::FunctionCall {
                            function_call: FunctionCallData {
                                name: request.name.clone(),
                                args: request.arguments.clone(),
                            },
                            thought_signature: Some(
                                request
                                    .thought_signature
                                    .clone()
                                    .unwrap_or_else(|| SKIP_THOUGHT_SIGNATURE.to_string()),
                            ),
                        }),
                    })
                    .collect();
                if !parts.is_empty() {
                    contents.push(GeminiContent { role: "model".into(), parts });
                }
            }
            Message::ActionResult(_) => {}
        }
    }

    if !pending_responses.is_empty() {
        contents.push(GeminiContent { role: "user".into(), parts: pending_responses });
    }
    contents
}

fn function_response(result: &ActionResult) -> GeminiPart {
    let mut response = serde_json::Map::new();
    response.insert("result".into(), result.payload.to_json());
    if let Some(kind) = result.error_kind {
        response.insert("error".into(), Value::String(kind.to_string()));
    }
    GeminiPart::FunctionResponse {
        function_response: FunctionResponseData {
            name: result.action.clone(),
            response: Value::Object(response),
        },
    }
}

pub fn convert_tools(tools: &[ToolDefinition]) -> Vec<GeminiTool> {
    if tools.is_empty() {
        return Vec::new();
    }
    vec![GeminiTool {
        function_declarations: tools
            .iter()
            .map(|t| FunctionDeclaration {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: sanitize_schema(&t.parameters_schema),
            })
            .collect(),
    }]
}

/// Strip keys Gemini rejects, recursively.
pub fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}
