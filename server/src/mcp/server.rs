//! Dispatch of MCP requests to the toolbox.

use super::protocol::{
    negotiate_version, CallToolParams, CallToolResult, Implementation, InitializeParams,
    ListToolsResult, Notification, Payload, Request, RequestId, Response, RpcError,
    SetLevelParams, INTERNAL_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND,
    PARSE_ERROR,
};
use rmv_model::tools::{Context, LogLevel, ToolDescriptor, Toolbox};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use std::fmt::Display;
use std::sync::{PoisonError, RwLock};

/// An MCP server exposing a [`Toolbox`].
///
/// The server is independent of the transport: each transport feeds it raw messages with
/// [`handle_message`](Self::handle_message) and delivers the resulting [`Reply`].
pub struct Server {
    toolbox: Toolbox,
    info: Implementation,
    level: RwLock<LogLevel>,
}

/// What the server sends back for one message from the client.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reply {
    /// Notifications produced while handling the message, to be delivered before the response.
    pub notifications: Vec<Notification>,
    /// The response, if the message contained any requests.
    pub response: Option<Outgoing>,
}

/// A response, or a batch of responses to a batch of requests.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Outgoing {
    Single(Response),
    Batch(Vec<Response>),
}

impl Reply {
    /// The reply to a message which is not valid JSON.
    pub fn parse_error(err: impl Display) -> Self {
        tracing::warn!("unparseable message: {err}");
        Self {
            notifications: vec![],
            response: Some(Outgoing::Single(Response::error(
                None,
                PARSE_ERROR,
                format!("parse error: {err}"),
            ))),
        }
    }
}

impl Outgoing {
    /// Is this a single, successful response?
    pub fn is_successful(&self) -> bool {
        match self {
            Self::Single(res) => matches!(res.payload, Payload::Result(_)),
            Self::Batch(_) => false,
        }
    }
}

impl Server {
    pub fn new(toolbox: Toolbox) -> Self {
        let info = Implementation {
            name: toolbox.profile().server_name().into(),
            version: env!("CARGO_PKG_VERSION").into(),
        };
        Self {
            toolbox,
            info,
            level: RwLock::new(LogLevel::default()),
        }
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn tools(&self) -> Vec<ToolDescriptor> {
        self.toolbox.list()
    }

    /// The minimum level of log messages sent to the client.
    pub fn log_level(&self) -> LogLevel {
        *self.level.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Handle one JSON-RPC message, which may be a single message or a batch.
    pub async fn handle_message(&self, text: &str) -> Reply {
        let value = match serde_json::from_str::<Value>(text) {
            Ok(value) => value,
            Err(err) => return Reply::parse_error(err),
        };

        let mut reply = Reply::default();

        reply.response = match value {
            Value::Array(items) if items.is_empty() => Some(Outgoing::Single(Response::error(
                None,
                INVALID_REQUEST,
                "empty batch",
            ))),
            Value::Array(items) => {
                let mut responses = vec![];
                for item in items {
                    if let Some(res) = self.handle_value(item, &mut reply.notifications).await {
                        responses.push(res);
                    }
                }
                if responses.is_empty() {
                    None
                } else {
                    Some(Outgoing::Batch(responses))
                }
            }
            value => self
                .handle_value(value, &mut reply.notifications)
                .await
                .map(Outgoing::Single),
        };
        reply
    }

    async fn handle_value(
        &self,
        value: Value,
        notifications: &mut Vec<Notification>,
    ) -> Option<Response> {
        if value.get("method").is_none()
            && (value.get("result").is_some() || value.get("error").is_some())
        {
            // We never send requests to the client, so there is nothing waiting for this.
            tracing::debug!("ignoring response from client: {value}");
            return None;
        }

        if value.get("id") == Some(&Value::Null) {
            // An explicit `id` makes this a request, but a null one cannot be answered by ID.
            return Some(Response::error(
                None,
                INVALID_REQUEST,
                "invalid request: id must be a string or a number",
            ));
        }
        let id = value
            .get("id")
            .and_then(|id| serde_json::from_value::<RequestId>(id.clone()).ok());
        let req = match serde_json::from_value::<Request>(value) {
            Ok(req) => req,
            Err(err) => {
                return Some(Response::error(
                    id,
                    INVALID_REQUEST,
                    format!("invalid request: {err}"),
                ))
            }
        };

        if req.is_notification() {
            if req.jsonrpc != "2.0" {
                tracing::warn!(
                    "ignoring {} notification with JSON-RPC version {}",
                    req.method,
                    req.jsonrpc
                );
            } else {
                self.handle_notification(&req);
            }
            return None;
        }
        if req.jsonrpc != "2.0" {
            return Some(Response::error(
                req.id,
                INVALID_REQUEST,
                format!("unsupported JSON-RPC version {}", req.jsonrpc),
            ));
        }

        tracing::debug!(method = %req.method, id = ?req.id, "request");
        let id = req.id.clone();
        Some(match self.dispatch(req, notifications).await {
            Ok(result) => Response::result(id, result),
            Err(err) => Response {
                jsonrpc: "2.0",
                id,
                payload: Payload::Error(err),
            },
        })
    }

    fn handle_notification(&self, req: &Request) {
        match req.method.as_str() {
            "notifications/initialized" => tracing::info!("client initialized"),
            "notifications/cancelled" => {
                // Requests are answered in full before the next message is read, so by the time
                // a cancellation arrives there is nothing left to cancel.
                tracing::debug!("ignoring cancellation {}", req.params);
            }
            method => tracing::debug!("ignoring notification {method}"),
        }
    }

    async fn dispatch(
        &self,
        req: Request,
        notifications: &mut Vec<Notification>,
    ) -> Result<Value, RpcError> {
        match req.method.as_str() {
            "initialize" => {
                let params: InitializeParams = params(req.params)?;
                if let Some(client) = &params.client_info {
                    tracing::info!("initializing session with {} {}", client.name, client.version);
                }
                Ok(json!({
                    "protocolVersion": negotiate_version(&params.protocol_version),
                    "capabilities": {
                        "logging": {},
                        "tools": { "listChanged": false },
                    },
                    "serverInfo": self.info,
                }))
            }
            "ping" => Ok(json!({})),
            "tools/list" => to_value(ListToolsResult {
                tools: self.tools(),
            }),
            "tools/call" => {
                let params: CallToolParams = params(req.params)?;
                let mut ctx = Context::new(self.log_level());
                let output = self
                    .toolbox
                    .call(&params.name, params.arguments, &mut ctx)
                    .await
                    .map_err(|err| rpc_error(INVALID_PARAMS, err))?;
                notifications.extend(ctx.into_messages().into_iter().map(Notification::from));
                to_value(CallToolResult::from(output))
            }
            "logging/setLevel" => {
                let params: SetLevelParams = params(req.params)?;
                tracing::info!("client log level set to {}", params.level);
                *self.level.write().unwrap_or_else(PoisonError::into_inner) = params.level;
                Ok(json!({}))
            }
            method => Err(rpc_error(
                METHOD_NOT_FOUND,
                format!("method not found: {method}"),
            )),
        }
    }
}

fn rpc_error(code: i64, message: impl ToString) -> RpcError {
    RpcError {
        code,
        message: message.to_string(),
        data: None,
    }
}

fn params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    serde_json::from_value(params).map_err(|err| rpc_error(INVALID_PARAMS, err))
}

fn to_value<T: Serialize>(result: T) -> Result<Value, RpcError> {
    serde_json::to_value(result).map_err(|err| rpc_error(INTERNAL_ERROR, err))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mcp::fixture_server;
    use rmv_model::tools::Profile;

    async fn single(server: &Server, message: Value) -> Value {
        let reply = server.handle_message(&message.to_string()).await;
        serde_json::to_value(reply.response.unwrap()).unwrap()
    }

    #[async_std::test]
    async fn test_initialize() {
        let server = fixture_server(Profile::Transit);
        let res = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 0,
                "method": "initialize",
                "params": {
                    "protocolVersion": "2025-03-26",
                    "capabilities": {},
                    "clientInfo": { "name": "test", "version": "1.0" },
                },
            }),
        )
        .await;
        assert_eq!(res["id"], 0);
        assert_eq!(res["result"]["protocolVersion"], "2025-03-26");
        assert_eq!(res["result"]["serverInfo"]["name"], "RMV Transit Info");
        assert!(res["result"]["capabilities"]["tools"].is_object());
    }

    #[async_std::test]
    async fn test_tools_list_order() {
        let server = fixture_server(Profile::Transit);
        let res = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "tools/list" }),
        )
        .await;
        let tools = res["result"]["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "search_stations");
        assert_eq!(tools[1]["name"], "get_connections");
        assert_eq!(tools[0]["inputSchema"]["required"], json!(["query"]));
    }

    #[async_std::test]
    async fn test_tool_call_logs_to_client() {
        let server = fixture_server(Profile::Transit);
        let reply = server
            .handle_message(
                &json!({
                    "jsonrpc": "2.0",
                    "id": "call",
                    "method": "tools/call",
                    "params": {
                        "name": "search_stations",
                        "arguments": { "query": "Dortelweil", "max_results": 1 },
                    },
                })
                .to_string(),
            )
            .await;
        assert_eq!(reply.notifications.len(), 1);
        assert_eq!(reply.notifications[0].method, "notifications/message");
        assert_eq!(reply.notifications[0].params["level"], "info");

        let res = serde_json::to_value(reply.response.unwrap()).unwrap();
        assert_eq!(res["result"]["isError"], false);
        let text = res["result"]["content"][0]["text"].as_str().unwrap();
        let stations: Value = serde_json::from_str(text).unwrap();
        assert_eq!(stations["count"], 1);
        assert_eq!(stations["stations"][0]["name"], "Bad Vilbel-Dortelweil Bf");
    }

    #[async_std::test]
    async fn test_set_level() {
        let server = fixture_server(Profile::Transit);
        single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "logging/setLevel",
                "params": { "level": "error" },
            }),
        )
        .await;
        assert_eq!(server.log_level(), LogLevel::Error);

        let reply = server
            .handle_message(
                &json!({
                    "jsonrpc": "2.0",
                    "id": 2,
                    "method": "tools/call",
                    "params": {
                        "name": "search_stations",
                        "arguments": { "query": "Dortelweil" },
                    },
                })
                .to_string(),
            )
            .await;
        assert!(reply.notifications.is_empty());
    }

    #[async_std::test]
    async fn test_errors() {
        let server = fixture_server(Profile::Transit);

        let res = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": 1, "method": "resources/list" }),
        )
        .await;
        assert_eq!(res["error"]["code"], METHOD_NOT_FOUND);

        let res = single(
            &server,
            json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": { "name": "process_data", "arguments": { "input": "x" } },
            }),
        )
        .await;
        assert_eq!(res["id"], 2);
        assert_eq!(res["error"]["code"], INVALID_PARAMS);

        let res = single(&server, json!({ "jsonrpc": "2.0", "id": 3 })).await;
        assert_eq!(res["id"], 3);
        assert_eq!(res["error"]["code"], INVALID_REQUEST);

        let res = single(
            &server,
            json!({ "jsonrpc": "1.0", "id": 4, "method": "ping" }),
        )
        .await;
        assert_eq!(res["error"]["code"], INVALID_REQUEST);

        let reply = server.handle_message("{not json").await;
        let res = serde_json::to_value(reply.response.unwrap()).unwrap();
        assert_eq!(res["id"], Value::Null);
        assert_eq!(res["error"]["code"], PARSE_ERROR);
    }

    #[async_std::test]
    async fn test_notifications_and_responses_get_no_reply() {
        let server = fixture_server(Profile::Transit);
        let reply = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
            .await;
        assert_eq!(reply, Reply::default());

        let reply = server
            .handle_message(r#"{"jsonrpc":"2.0","id":7,"result":{}}"#)
            .await;
        assert_eq!(reply, Reply::default());

        // Notifications are never answered, even when malformed.
        let reply = server
            .handle_message(r#"{"jsonrpc":"1.0","method":"notifications/initialized"}"#)
            .await;
        assert_eq!(reply, Reply::default());
    }

    #[async_std::test]
    async fn test_null_id_is_invalid_request() {
        let server = fixture_server(Profile::Transit);
        let res = single(
            &server,
            json!({ "jsonrpc": "2.0", "id": null, "method": "ping" }),
        )
        .await;
        assert_eq!(res["id"], Value::Null);
        assert_eq!(res["error"]["code"], INVALID_REQUEST);

        // A missing `id` is still a notification.
        let reply = server
            .handle_message(r#"{"jsonrpc":"2.0","method":"ping"}"#)
            .await;
        assert_eq!(reply, Reply::default());
    }

    #[async_std::test]
    async fn test_batch() {
        let server = fixture_server(Profile::Transit);
        let reply = server
            .handle_message(
                &json!([
                    { "jsonrpc": "2.0", "id": 1, "method": "ping" },
                    { "jsonrpc": "2.0", "method": "notifications/initialized" },
                    { "jsonrpc": "2.0", "id": 2, "method": "nope" },
                ])
                .to_string(),
            )
            .await;
        let res = serde_json::to_value(reply.response.unwrap()).unwrap();
        let res = res.as_array().unwrap();
        assert_eq!(res.len(), 2);
        assert_eq!(res[0]["result"], json!({}));
        assert_eq!(res[1]["error"]["code"], METHOD_NOT_FOUND);

        let reply = server.handle_message("[]").await;
        let res = serde_json::to_value(reply.response.unwrap()).unwrap();
        assert_eq!(res["error"]["code"], INVALID_REQUEST);
    }
}
