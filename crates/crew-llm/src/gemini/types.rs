//! Wire types for the Gemini `generateContent` family of endpoints.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiRequest {
    pub contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<GeminiTool>,
    pub generation_config: GenerationConfig,
}

#[derive(Clone, Debug, Serialize)]
pub struct SystemInstruction {
    pub parts: Vec<GeminiPart>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeminiContent {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<GeminiPart>,
}

/// One part of a content. Unknown part kinds are kept as raw JSON.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GeminiPart {
    Text {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        thought: Option<bool>,
        #[serde(rename = "thoughtSignature", default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    FunctionCall {
        #[serde(rename = "functionCall")]
        function_call: FunctionCallData,
        #[serde(rename = "thoughtSignature", default, skip_serializing_if = "Option::is_none")]
        thought_signature: Option<String>,
    },
    FunctionResponse {
        #[serde(rename = "functionResponse")]
        function_response: FunctionResponseData,
    },
    Other(serde_json::Value),
}

impl GeminiPart {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            thought: None,
            thought_signature: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallData {
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionResponseData {
    pub name: String,
    pub response: serde_json::Value,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiTool {
    pub function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug, Serialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop_sequences: Vec<String>,
}

// ── Streaming response ──────────────────────────────────────────────────────

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiStreamChunk {
    pub candidates: Option<Vec<GeminiCandidate>>,
    pub usage_metadata: Option<UsageMetadata>,
    pub error: Option<GeminiApiError>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiCandidate {
    pub content: Option<GeminiContent>,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct GeminiApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_text_and_function_call_parts() {
        let raw = r#"{
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "Let me look."},
                    {"functionCall": {"name": "list_dir", "args": {"root_path": "."}}, "thoughtSignature": "sig=="}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 12, "candidatesTokenCount": 7, "totalTokenCount": 19}
        }"#;
        let chunk: GeminiStreamChunk = serde_json::from_str(raw).unwrap();
        let candidate = &chunk.candidates.unwrap()[0];
        let parts = &candidate.content.as_ref().unwrap().parts;
        assert!(matches!(&parts[0], GeminiPart::Text { text, .. } if text == "Let me look."));
        match &parts[1] {
            GeminiPart::FunctionCall { function_call, thought_signature } => {
                assert_eq!(function_call.name, "list_dir");
                assert_eq!(function_call.args["root_path"], ".");
                assert_eq!(thought_signature.as_deref(), Some("sig=="));
            }
            other => panic!("expected function call, got {other:?}"),
        }
        assert_eq!(candidate.finish_reason.as_deref(), Some("STOP"));
        assert_eq!(chunk.usage_metadata.unwrap().prompt_token_count, 12);
    }

    #[test]
    fn unknown_parts_are_preserved() {
        let raw = r#"{"role": "model", "parts": [{"executableCode": {"code": "1+1"}}]}"#;
        let content: GeminiContent = serde_json::from_str(raw).unwrap();
        assert!(matches!(content.parts[0], GeminiPart::Other(_)));
    }

    #[test]
    fn request_serializes_camel_case() {
        let request = GeminiRequest {
            contents: vec![GeminiContent { role: "user".into(), parts: vec![GeminiPart::text("hi")] }],
            system_instruction: Some(SystemInstruction { parts: vec![GeminiPart::text("persona")] }),
            tools: vec![],
            generation_config: GenerationConfig {
                temperature: Some(0.3),
                max_output_tokens: None,
                stop_sequences: vec![],
            },
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "persona");
        assert_eq!(json["generationConfig"]["temperature"], 0.3);
        assert!(json.get("tools").is_none());
        assert!(json["generationConfig"].get("maxOutputTokens").is_none());
        assert!(json["contents"][0]["parts"][0].get("thought").is_none());
    }

    #[test]
    fn error_chunk_parses() {
        let raw = r#"{"error": {"code": 429, "message": "quota", "status": "RESOURCE_EXHAUSTED"}}"#;
        let chunk: GeminiStreamChunk = serde_json::from_str(raw).unwrap();
        let err = chunk.error.unwrap();
        assert_eq!(err.code, 429);
        assert_eq!(err.status, "RESOURCE_EXHAUSTED");
    }
}
