use serde::{Deserialize, Serialize};

use crate::ids::ActionId;
use crate::tokens::TokenUsage;
use crate::tools::ErrorKind;

/// One entry of an orchestration history. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "agent")]
    Agent(AgentMessage),
    #[serde(rename = "action_result")]
    ActionResult(ActionResult),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub content: Vec<AgentContent>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub usage: Option<TokenUsage>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub stop_reason: Option<StopReason>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "action_request")]
    ActionRequest(ActionRequest),
}

/// A structured request for the dispatcher. The id is echoed by the matching result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub id: ActionId,
    pub name: String,
    pub arguments: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thought_signature: Option<String>,
}

/// Outcome of exactly one [`ActionRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub request_id: ActionId,
    pub action: String,
    pub success: bool,
    pub payload: ActionPayload,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error_kind: Option<ErrorKind>,
    #[serde(default)]
    pub duration_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ActionPayload {
    Text(String),
    Structured(serde_json::Value),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    ToolUse,
    MaxTokens,
    Safety,
}

// --- Convenience constructors ---

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    pub fn agent_text(text: impl Into<String>) -> Self {
        Message::Agent(AgentMessage::text(text))
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::User(_) => "user",
            Message::Agent(_) => "agent",
            Message::ActionResult(_) => "action_result",
        }
    }
}

impl AgentMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AgentContent::Text { text: text.into() }],
            usage: None,
            stop_reason: Some(StopReason::EndTurn),
        }
    }

    pub fn with_requests(text: Option<&str>, requests: Vec<ActionRequest>) -> Self {
        let mut content = Vec::with_capacity(requests.len() + 1);
        if let Some(text) = text.filter(|t| !t.is_empty()) {
            content.push(AgentContent::Text { text: text.to_string() });
        }
        content.extend(requests.into_iter().map(AgentContent::ActionRequest));
        Self {
            content,
            usage: None,
            stop_reason: Some(StopReason::ToolUse),
        }
    }

    pub fn action_requests(&self) -> Vec<&ActionRequest> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AgentContent::ActionRequest(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AgentContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_action_requests(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AgentContent::ActionRequest(_)))
    }
}

impl ActionRequest {
    pub fn new(name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            id: ActionId::new(),
            name: name.into(),
            arguments,
            thought_signature: None,
        }
    }
}

impl ActionResult {
    pub fn success(request: &ActionRequest, payload: ActionPayload) -> Self {
        Self {
            request_id: request.id.clone(),
            action: request.name.clone(),
            success: true,
            payload,
            error_kind: None,
            duration_ms: 0,
        }
    }

    pub fn failure(request: &ActionRequest, kind: ErrorKind, payload: ActionPayload) -> Self {
        Self {
            request_id: request.id.clone(),
            action: request.name.clone(),
            success: false,
            payload,
            error_kind: Some(kind),
            duration_ms: 0,
        }
    }

    /// Text form fed back to a generation turn. Failures are prefixed with their kind.
    pub fn render(&self) -> String {
        match self.error_kind {
            Some(kind) => format!("[{kind}] {}", self.payload.as_text()),
            None => self.payload.as_text(),
        }
    }
}

impl ActionPayload {
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Structured(value) => {
                serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(text) => serde_json::Value::String(text.clone()),
            Self::Structured(value) => value.clone(),
        }
    }
}

impl From<String> for ActionPayload {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ActionPayload {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_text_message() {
        let msg = Message::user_text("hello");
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn agent_message_with_requests() {
        let req = ActionRequest::new("read_file", serde_json::json!({"file_path": "/tmp/x"}));
        let msg = AgentMessage::with_requests(Some("reading"), vec![req.clone()]);
        assert!(msg.has_action_requests());
        assert_eq!(msg.action_requests().len(), 1);
        assert_eq!(msg.action_requests()[0].id, req.id);
        assert_eq!(msg.text_content(), "reading");
        assert_eq!(msg.stop_reason, Some(StopReason::ToolUse));
    }

    #[test]
    fn empty_text_not_stored_alongside_requests() {
        let req = ActionRequest::new("grep", serde_json::json!({}));
        let msg = AgentMessage::with_requests(Some(""), vec![req]);
        assert_eq!(msg.content.len(), 1);
    }

    #[test]
    fn action_result_message_shape() {
        let req = ActionRequest::new("read_file", serde_json::json!({}));
        let result = ActionResult::failure(
            &req,
            ErrorKind::NotFound,
            ActionPayload::Text("File not found: /x".into()),
        );
        let json = serde_json::to_value(Message::ActionResult(result)).unwrap();
        assert_eq!(json["role"], "action_result");
        assert_eq!(json["request_id"], req.id.as_str());
        assert_eq!(json["success"], false);
        assert_eq!(json["error_kind"], "NotFoundError");
        assert_eq!(json["payload"]["type"], "text");
    }

    #[test]
    fn render_prefixes_failure_kind() {
        let req = ActionRequest::new("nope", serde_json::json!({}));
        let result = ActionResult::failure(
            &req,
            ErrorKind::UnknownAction,
            "unknown action: nope".into(),
        );
        assert_eq!(result.render(), "[UnknownActionError] unknown action: nope");

        let ok = ActionResult::success(&req, "fine".into());
        assert_eq!(ok.render(), "fine");
    }

    #[test]
    fn structured_payload_renders_as_json() {
        let payload = ActionPayload::Structured(serde_json::json!({"returncode": 0}));
        assert!(payload.as_text().contains("\"returncode\": 0"));
        assert_eq!(payload.to_json()["returncode"], 0);
    }

    #[test]
    fn history_roundtrips_through_json() {
        let req = ActionRequest::new("list_dir", serde_json::json!({"root_path": "."}));
        let history = vec![
            Message::user_text("build it"),
            Message::Agent(AgentMessage::with_requests(None, vec![req.clone()])),
            Message::ActionResult(ActionResult::success(
                &req,
                ActionPayload::Structured(serde_json::json!({"files": [], "directories": {}})),
            )),
            Message::agent_text("done"),
        ];
        let json = serde_json::to_string(&history).unwrap();
        let parsed: Vec<Message> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, history);
    }
}
