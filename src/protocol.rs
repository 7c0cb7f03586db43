//! Line-delimited JSON-RPC 2.0 framing shared by server and client.
//!
//! Unary methods answer with one response. Streaming methods first send any
//! number of `stream/tick` notifications carrying the request id, then the
//! response that closes the stream.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::session::TaskKind;

pub const METHOD_SEND_TEXT: &str = "SendText";
pub const METHOD_START_SPINNER: &str = "StartSpinner";
pub const METHOD_SHOW_HEALTH: &str = "ShowHealth";
pub const METHOD_STOP: &str = "Stop";
pub const METHOD_EXIT: &str = "Exit";
pub const METHOD_STATUS: &str = "Status";

pub const NOTIFY_TICK: &str = "stream/tick";

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const ALREADY_ACTIVE: i64 = -32001;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextReply {
    pub result: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReply {
    pub active: Option<TaskKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl std::fmt::Display for RpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for RpcError {}

impl RpcError {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn already_active(active: TaskKind) -> Self {
        Self {
            code: ALREADY_ACTIVE,
            message: "Another task is running".into(),
            data: Some(json!({ "active": active })),
        }
    }

    pub fn is_already_active(&self) -> bool {
        self.code == ALREADY_ACTIVE
    }
}

pub fn request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub fn success(id: Option<Value>, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn failure(id: Option<Value>, error: &RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error
    })
}

pub fn tick_notification(id: &Value, tick: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "method": NOTIFY_TICK,
        "params": { "id": id, "tick": tick }
    })
}

/// What the client sees on its side of the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum Incoming {
    Tick { id: u64, tick: Value },
    Response { id: u64, result: Result<Value, RpcError> },
}

impl Incoming {
    /// `None` for anything that is neither a tick nor a response to one of
    /// our numeric ids.
    pub fn classify(msg: &Value) -> Option<Self> {
        if let Some(method) = msg.get("method").and_then(|m| m.as_str()) {
            if method != NOTIFY_TICK {
                return None;
            }
            let params = msg.get("params")?;
            let id = params.get("id")?.as_u64()?;
            let tick = params.get("tick")?.clone();
            return Some(Incoming::Tick { id, tick });
        }

        let id = msg.get("id")?.as_u64()?;
        if let Some(error) = msg.get("error") {
            let error: RpcError = serde_json::from_value(error.clone()).ok()?;
            return Some(Incoming::Response {
                id,
                result: Err(error),
            });
        }
        let result = msg.get("result").cloned().unwrap_or(Value::Null);
        Some(Incoming::Response {
            id,
            result: Ok(result),
        })
    }
}
