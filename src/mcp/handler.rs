//! MCP over SSE: the protocol handler bound to each streaming connection.

use anyhow::Context;
use async_trait::async_trait;
use rmcp::model::{
    CallToolRequestParam, CallToolResult, Content, ErrorCode, ErrorData, Implementation,
    JsonRpcError, JsonRpcResponse, JsonRpcVersion2_0, ListToolsResult, ProtocolVersion, RequestId,
    ServerCapabilities, ServerInfo,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::mcp::registry::ToolRegistry;
use crate::session::{Frame, ProtocolHandler, StreamingConnection};

/// SSE event announcing where the client should POST its messages.
pub const ENDPOINT_EVENT: &str = "endpoint";

/// SSE event carrying a JSON-RPC message from the server.
pub const MESSAGE_EVENT: &str = "message";

/// A client message as it arrives on the message endpoint. Notifications carry
/// no `id`.
#[derive(Debug, Deserialize)]
struct Inbound {
    #[serde(rename = "jsonrpc")]
    _version: JsonRpcVersion2_0,
    #[serde(default)]
    id: Option<RequestId>,
    method: String,
    #[serde(default)]
    params: Option<Value>,
}

/// Serves MCP requests from a [`ToolRegistry`].
#[derive(Debug, Clone)]
pub struct McpHandler {
    tools: ToolRegistry,
    messages_path: String,
    server_info: ServerInfo,
}

impl McpHandler {
    pub fn new(tools: ToolRegistry, messages_path: impl Into<String>) -> Self {
        Self {
            tools,
            messages_path: messages_path.into(),
            server_info: ServerInfo {
                protocol_version: ProtocolVersion::V_2024_11_05,
                capabilities: ServerCapabilities::builder().enable_tools().build(),
                server_info: Implementation {
                    name: env!("CARGO_PKG_NAME").to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                    ..Default::default()
                },
                ..Default::default()
            },
        }
    }

    /// URL a client posts to for the given session.
    pub fn endpoint_for(&self, connection: &StreamingConnection) -> String {
        format!("{}?sessionId={}", self.messages_path, connection.id())
    }

    /// Answer one message. `None` means no reply is due.
    async fn dispatch(&self, message: Inbound) -> Option<(RequestId, Result<Value, ErrorData>)> {
        let Some(id) = message.id else {
            tracing::debug!(method = %message.method, "Notification received");
            return None;
        };

        let outcome = match message.method.as_str() {
            "initialize" => to_result(&self.server_info),
            "ping" => Ok(json!({})),
            "tools/list" => to_result(&ListToolsResult::with_all_items(self.tools.list())),
            "tools/call" => self.call_tool(message.params).await,
            other => Err(ErrorData::new(
                ErrorCode::METHOD_NOT_FOUND,
                format!("Method not found: {other}"),
                None,
            )),
        };
        Some((id, outcome))
    }

    async fn call_tool(&self, params: Option<Value>) -> Result<Value, ErrorData> {
        let params: CallToolRequestParam = params
            .ok_or_else(|| ErrorData::invalid_params("Invalid params: missing params", None))
            .and_then(|p| {
                serde_json::from_value(p)
                    .map_err(|e| ErrorData::invalid_params(format!("Invalid params: {e}"), None))
            })?;

        let arguments = params.arguments.map_or_else(|| json!({}), Value::Object);
        let result = match self.tools.call(&params.name, arguments).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(tool = %params.name, error = %e, "Tool invocation failed");
                CallToolResult::error(vec![Content::text(e.to_string())])
            }
        };

        to_result(&result)
    }
}

/// Encode a result payload; failure is a JSON-RPC internal error.
fn to_result<T: Serialize>(value: &T) -> Result<Value, ErrorData> {
    serde_json::to_value(value).map_err(|e| ErrorData::internal_error(e.to_string(), None))
}

#[async_trait]
impl ProtocolHandler for McpHandler {
    async fn attach(&self, connection: &StreamingConnection) -> anyhow::Result<()> {
        connection
            .send(Frame::event(ENDPOINT_EVENT, self.endpoint_for(connection)))
            .await
            .context("failed to announce message endpoint")?;
        Ok(())
    }

    async fn handle(&self, connection: &StreamingConnection, payload: Value) -> anyhow::Result<()> {
        let message: Inbound =
            serde_json::from_value(payload).context("payload is not a JSON-RPC 2.0 message")?;

        tracing::debug!(
            session_id = %connection.id(),
            method = %message.method,
            "Dispatching request"
        );

        let Some((id, outcome)) = self.dispatch(message).await else {
            return Ok(());
        };
        let data = match outcome {
            Ok(result) => serde_json::to_string(&JsonRpcResponse {
                jsonrpc: JsonRpcVersion2_0,
                id,
                result,
            })?,
            Err(error) => serde_json::to_string(&JsonRpcError {
                jsonrpc: JsonRpcVersion2_0,
                id,
                error,
            })?,
        };
        connection
            .send(Frame::event(MESSAGE_EVENT, data))
            .await
            .context("failed to write response")?;
        Ok(())
    }
}
