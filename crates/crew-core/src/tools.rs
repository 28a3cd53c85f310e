use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ids::RunId;
use crate::messages::ActionPayload;
use crate::state::ArtifactSlot;

/// Tools declare whether they can run in parallel with others.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    Concurrent,
    /// Shares a single lane with every other sequential tool in the turn.
    Sequential,
}

/// Context available to tools during execution.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub run_id: RunId,
    pub agent: String,
    pub working_directory: PathBuf,
    pub abort_signal: CancellationToken,
}

impl ToolContext {
    pub fn new(agent: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            run_id: RunId::new(),
            agent: agent.into(),
            working_directory: working_directory.into(),
            abort_signal: CancellationToken::new(),
        }
    }

    /// Resolve a tool-supplied path against the working directory.
    pub fn resolve(&self, path: &str) -> PathBuf {
        let p = Path::new(path);
        if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.working_directory.join(p)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    #[serde(rename = "ValidationError")]
    Validation,
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "UnknownActionError")]
    UnknownAction,
    #[serde(rename = "ExecutionError")]
    Execution,
    #[serde(rename = "TimeoutError")]
    Timeout,
    #[serde(rename = "NetworkError")]
    Network,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Validation => "ValidationError",
            Self::NotFound => "NotFoundError",
            Self::UnknownAction => "UnknownActionError",
            Self::Execution => "ExecutionError",
            Self::Timeout => "TimeoutError",
            Self::Network => "NetworkError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    Validation(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::UnknownAction(_) => ErrorKind::UnknownAction,
            Self::Execution(_) => ErrorKind::Execution,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Network(_) => ErrorKind::Network,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Output
// ─────────────────────────────────────────────────────────────────────────────

/// What a tool hands back. A failure kind marks a failed execution that still
/// produced a record worth showing the agent.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub payload: ActionPayload,
    pub failure: Option<ErrorKind>,
}

impl ToolOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            payload: ActionPayload::Text(text.into()),
            failure: None,
        }
    }

    pub fn json(value: Value) -> Self {
        Self {
            payload: ActionPayload::Structured(value),
            failure: None,
        }
    }

    pub fn failed(kind: ErrorKind, value: Value) -> Self {
        Self {
            payload: ActionPayload::Structured(value),
            failure: Some(kind),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Descriptors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgType {
    String,
    Integer,
    Number,
    Boolean,
    StringList,
}

impl ArgType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::StringList => "string_list",
        }
    }

    /// Coerce a supplied value into this type, or `None` on mismatch.
    ///
    /// Whole floats pass as integers and a lone string passes as a one-item list.
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        match (self, value) {
            (Self::String, Value::String(_)) => Some(value.clone()),
            (Self::Integer, Value::Number(n)) => {
                if let Some(i) = n.as_i64() {
                    Some(Value::from(i))
                } else {
                    let f = n.as_f64()?;
                    if f.fract() == 0.0 && f.is_finite() && f.abs() < i64::MAX as f64 {
                        Some(Value::from(f as i64))
                    } else {
                        None
                    }
                }
            }
            (Self::Number, Value::Number(_)) => Some(value.clone()),
            (Self::Boolean, Value::Bool(_)) => Some(value.clone()),
            (Self::StringList, Value::String(s)) => Some(Value::Array(vec![Value::String(s.clone())])),
            (Self::StringList, Value::Array(items)) => {
                if items.iter().all(Value::is_string) {
                    Some(value.clone())
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    fn schema(&self) -> Value {
        match self {
            Self::StringList => serde_json::json!({"type": "array", "items": {"type": "string"}}),
            other => serde_json::json!({"type": other.as_str()}),
        }
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ArgSpec {
    pub name: String,
    pub arg_type: ArgType,
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    pub description: String,
}

impl ArgSpec {
    pub fn required(name: impl Into<String>, arg_type: ArgType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: true,
            default: None,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, arg_type: ArgType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg_type,
            required: false,
            default: None,
            description: description.into(),
        }
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// Tool definition sent to the provider.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters_schema: Value,
}

/// Immutable description of a callable action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub args: Vec<ArgSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub produces: Option<ArtifactSlot>,
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            args: Vec::new(),
            produces: None,
        }
    }

    pub fn arg(mut self, spec: ArgSpec) -> Self {
        self.args.push(spec);
        self
    }

    pub fn produces(mut self, slot: ArtifactSlot) -> Self {
        self.produces = Some(slot);
        self
    }

    /// Structural checks run once at registration.
    pub fn check(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("tool name is empty".into());
        }
        let mut seen = HashSet::new();
        for spec in &self.args {
            if spec.name.is_empty() {
                return Err(format!("{}: argument with empty name", self.name));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(format!("{}: duplicate argument '{}'", self.name, spec.name));
            }
            if let Some(ref default) = spec.default {
                if spec.required {
                    return Err(format!(
                        "{}: required argument '{}' cannot have a default",
                        self.name, spec.name
                    ));
                }
                if spec.arg_type.coerce(default).is_none() {
                    return Err(format!(
                        "{}: default for '{}' is not a valid {}",
                        self.name,
                        spec.name,
                        spec.arg_type.as_str()
                    ));
                }
            }
        }
        Ok(())
    }

    /// JSON parameter schema for the provider.
    ///
    /// Gemini rejects `default` keys, so defaults are folded into descriptions.
    pub fn parameters_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for spec in &self.args {
            let mut prop = spec.arg_type.schema();
            let description = match spec.default {
                Some(ref d) => format!("{} (default: {d})", spec.description),
                None => spec.description.clone(),
            };
            if let Some(obj) = prop.as_object_mut() {
                obj.insert("description".into(), Value::String(description));
            }
            properties.insert(spec.name.clone(), prop);
            if spec.required {
                required.push(Value::String(spec.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }

    pub fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters_schema: self.parameters_schema(),
        }
    }

    /// Validate raw arguments, filling defaults and dropping unknown keys.
    pub fn validate(&self, raw: &Value) -> Result<ToolArgs, ToolError> {
        let empty = Map::new();
        let supplied = match raw {
            Value::Object(map) => map,
            Value::Null => &empty,
            other => {
                return Err(ToolError::Validation(format!(
                    "arguments must be an object, got {}",
                    json_type_name(other)
                )))
            }
        };

        let mut out = Map::new();
        for spec in &self.args {
            match supplied.get(&spec.name).filter(|v| !v.is_null()) {
                Some(value) => {
                    let coerced = spec.arg_type.coerce(value).ok_or_else(|| {
                        ToolError::Validation(format!(
                            "'{}' must be {}, got {}",
                            spec.name,
                            spec.arg_type.as_str(),
                            json_type_name(value)
                        ))
                    })?;
                    out.insert(spec.name.clone(), coerced);
                }
                None if spec.required => {
                    return Err(ToolError::Validation(format!(
                        "missing required argument '{}'",
                        spec.name
                    )));
                }
                None => {
                    if let Some(ref default) = spec.default {
                        out.insert(spec.name.clone(), default.clone());
                    }
                }
            }
        }
        Ok(ToolArgs(out))
    }
}

/// Schema-valid arguments. Only produced by [`ToolDescriptor::validate`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ToolArgs(Map<String, Value>);

impl ToolArgs {
    pub fn str(&self, name: &str) -> Result<&str, ToolError> {
        self.opt_str(name)
            .ok_or_else(|| ToolError::Validation(format!("missing required argument '{name}'")))
    }

    pub fn opt_str(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(Value::as_str)
    }

    pub fn i64(&self, name: &str) -> Result<i64, ToolError> {
        self.opt_i64(name)
            .ok_or_else(|| ToolError::Validation(format!("missing required argument '{name}'")))
    }

    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.0.get(name).and_then(Value::as_i64)
    }

    pub fn f64(&self, name: &str) -> Result<f64, ToolError> {
        self.0
            .get(name)
            .and_then(Value::as_f64)
            .ok_or_else(|| ToolError::Validation(format!("missing required argument '{name}'")))
    }

    pub fn bool_or(&self, name: &str, fallback: bool) -> bool {
        self.0.get(name).and_then(Value::as_bool).unwrap_or(fallback)
    }

    pub fn string_list(&self, name: &str) -> Option<Vec<String>> {
        self.0.get(name).and_then(Value::as_array).map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect()
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Trait
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait Tool: Send + Sync {
    fn descriptor(&self) -> ToolDescriptor;

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Concurrent
    }

    /// Resource requiring exclusive access while this call runs, usually a path.
    fn resource_key(&self, _args: &ToolArgs, _ctx: &ToolContext) -> Option<String> {
        None
    }

    async fn execute(&self, args: ToolArgs, ctx: &ToolContext) -> Result<ToolOutput, ToolError>;
}
