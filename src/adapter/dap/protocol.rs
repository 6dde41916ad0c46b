use serde::{Deserialize, Serialize};
use serde_json::Value;

/// DAP request envelope (client to adapter).
#[derive(Debug, Serialize)]
pub struct DapRequest<'a> {
    pub seq: i64,
    #[serde(rename = "type")]
    pub r#type: &'static str,
    pub command: &'a str,
    pub arguments: Value,
}

impl<'a> DapRequest<'a> {
    pub fn new(seq: i64, command: &'a str, arguments: Value) -> Self {
        Self {
            seq,
            r#type: "request",
            command,
            arguments,
        }
    }
}

/// DAP response envelope (adapter to client).
///
/// Note: responses may come without `body`, keep it as a raw `Value`.
#[derive(Debug, Clone, Deserialize)]
pub struct DapResponse {
    pub request_seq: i64,
    pub success: bool,
    pub command: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub body: Value,
}

impl DapResponse {
    /// Best error text available in a failed response.
    pub fn error_text(&self) -> String {
        if let Some(format) = self.body.pointer("/error/format").and_then(Value::as_str) {
            return format.to_string();
        }
        self.message
            .clone()
            .unwrap_or_else(|| format!("{} failed", self.command))
    }
}

/// DAP event envelope (adapter to client).
#[derive(Debug, Clone, Deserialize)]
pub struct DapEvent {
    pub event: String,
    #[serde(default)]
    pub body: Value,
}

/// Incoming message, discriminated by the `type` field.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Incoming {
    Response(DapResponse),
    Event(DapEvent),
    /// Reverse requests (like `runInTerminal`) are not supported.
    Request(Value),
}
