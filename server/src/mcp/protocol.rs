//! JSON-RPC 2.0 messages and the MCP payloads carried in them.

use rmv_model::tools::{LogMessage, ToolDescriptor, ToolOutput};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// The newest protocol revision this server speaks.
pub const LATEST_PROTOCOL_VERSION: &str = "2025-06-18";

/// Every protocol revision this server can speak, oldest first.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2024-11-05", "2025-03-26", "2025-06-18"];

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// The identifier a client attaches to a request.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// A request or notification from the client.
///
/// Requests carry an `id` and expect a [`Response`]; notifications do not.
#[derive(Clone, Debug, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    #[serde(default)]
    pub id: Option<RequestId>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl Request {
    pub fn is_notification(&self) -> bool {
        self.id.is_none()
    }
}

/// A response to a [`Request`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    /// The ID of the request, or `null` if it could not be determined.
    pub id: Option<RequestId>,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    Result(Value),
    Error(RpcError),
}

impl Response {
    pub fn result(id: Option<RequestId>, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            payload: Payload::Result(result),
        }
    }

    pub fn error(id: Option<RequestId>, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            payload: Payload::Error(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }
}

/// The error object of a failed [`Response`].
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A notification sent from the server to the client.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    pub params: Value,
}

impl From<LogMessage> for Notification {
    fn from(message: LogMessage) -> Self {
        Self {
            jsonrpc: "2.0",
            method: "notifications/message",
            params: json!(message),
        }
    }
}

/// Parameters of `initialize`.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    pub protocol_version: String,
    #[serde(default)]
    pub client_info: Option<Implementation>,
}

/// The name and version of an MCP client or server.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Implementation {
    pub name: String,
    pub version: String,
}

/// Parameters of `tools/call`.
#[derive(Clone, Debug, Deserialize)]
pub struct CallToolParams {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// Parameters of `logging/setLevel`.
#[derive(Clone, Debug, Deserialize)]
pub struct SetLevelParams {
    pub level: rmv_model::tools::LogLevel,
}

/// Result of `tools/list`.
#[derive(Clone, Debug, Serialize)]
pub struct ListToolsResult {
    pub tools: Vec<ToolDescriptor>,
}

/// Result of `tools/call`.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallToolResult {
    pub content: Vec<Content>,
    pub is_error: bool,
}

impl From<ToolOutput> for CallToolResult {
    fn from(output: ToolOutput) -> Self {
        Self {
            content: vec![Content::Text { text: output.text }],
            is_error: output.is_error,
        }
    }
}

/// A block of tool output.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Content {
    Text { text: String },
}

/// Pick the protocol revision to use with a client which asked for `requested`.
pub fn negotiate_version(requested: &str) -> &'static str {
    SUPPORTED_PROTOCOL_VERSIONS
        .iter()
        .find(|version| **version == requested)
        .copied()
        .unwrap_or(LATEST_PROTOCOL_VERSION)
}
