// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! MCP server exposure of the local [`ToolRegistry`].
//!
//! Two entry points:
//! - [`TroupeMcpServer`] + [`serve_stdio`] — the rmcp `ServerHandler`
//!   implementation used by `troupe mcp serve` (stdio transport).
//! - [`serve_ws`] — a WebSocket JSON-RPC loop used by the gateway's
//!   `mcp.start` method to expose tools on a port.
//!
//! Both are stateless: every `tools/call` executes in isolation; session
//! context belongs to the MCP host, not to this server.

use std::collections::HashSet;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use rmcp::{
    handler::server::ServerHandler,
    model::{
        CallToolRequestParams, CallToolResult, ListToolsResult, PaginatedRequestParams,
        ServerCapabilities, ServerInfo, Tool as McpTool,
    },
    service::{RequestContext, RoleServer},
    ErrorData as McpErrorData,
};
use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use troupe_tools::{InvocationContext, ToolCall, ToolRegistry};

use crate::bridge::{output_to_call_result, schema_to_mcp_tool};
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};

/// rmcp `ServerHandler` exposing a tool registry, optionally restricted to
/// an allow-list of tool names.
#[derive(Clone)]
pub struct TroupeMcpServer {
    registry: Arc<ToolRegistry>,
    exposed: Option<Arc<HashSet<String>>>,
}

impl TroupeMcpServer {
    pub fn new(registry: Arc<ToolRegistry>, exposed: Option<HashSet<String>>) -> Self {
        Self {
            registry,
            exposed: exposed.map(Arc::new),
        }
    }

    fn is_exposed(&self, name: &str) -> bool {
        self.exposed
            .as_ref()
            .map(|set| set.contains(name))
            .unwrap_or(true)
    }

    /// Descriptors for every exposed tool, in registry (name) order.
    fn exposed_descriptors(&self) -> Vec<McpTool> {
        self.registry
            .schemas()
            .into_iter()
            .filter(|s| self.is_exposed(&s.name))
            .map(schema_to_mcp_tool)
            .collect()
    }
}

impl ServerHandler for TroupeMcpServer {
    fn get_info(&self) -> ServerInfo {
        // Tell hosts up front how to read results; everything else stays at
        // the protocol defaults.
        let mut info = ServerInfo::default();
        info.capabilities = ServerCapabilities::builder().enable_tools().build();
        info.instructions = Some(
            "Every tool returns a JSON object: success=true with data fields, \
             or success=false with an error field."
                .into(),
        );
        info
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpErrorData>> + Send + '_ {
        // The registry snapshot is cheap and synchronous; only the return
        // type is async.
        let tools = self.exposed_descriptors();
        std::future::ready(Ok(ListToolsResult {
            tools,
            next_cursor: None,
            meta: None,
        }))
    }

    async fn call_tool(
        &self,
        request: CallToolRequestParams,
        _context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, McpErrorData> {
        if !self.is_exposed(&request.name) {
            return Err(McpErrorData {
                code: rmcp::model::ErrorCode::INVALID_PARAMS,
                message: format!("tool '{}' is not exposed", request.name).into(),
                data: None,
            });
        }
        let args = request
            .arguments
            .map(|m| Value::Object(m.into_iter().collect()))
            .unwrap_or(Value::Object(serde_json::Map::new()));

        let call = ToolCall {
            id: Uuid::new_v4().to_string(),
            name: request.name.to_string(),
            args,
        };

        let output = self
            .registry
            .invoke(&call, &InvocationContext::default())
            .await;
        Ok(output_to_call_result(output))
    }
}

/// Start an MCP stdio server, serving the registry's tools on
/// `stdin`/`stdout`.  Blocks until the client disconnects (stdin EOF).
pub async fn serve_stdio(
    registry: Arc<ToolRegistry>,
    exposed: Option<HashSet<String>>,
) -> anyhow::Result<()> {
    use rmcp::ServiceExt;
    let server = TroupeMcpServer::new(registry, exposed);
    let running = server
        .serve((tokio::io::stdin(), tokio::io::stdout()))
        .await
        .map_err(|e| anyhow::anyhow!("MCP server init error: {e}"))?;
    running
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))?;
    Ok(())
}

/// Serve the registry over WebSocket JSON-RPC on an already-bound
/// listener.  Each connection gets its own handler task; the loop runs
/// until the caller aborts it.
pub async fn serve_ws(
    listener: tokio::net::TcpListener,
    registry: Arc<ToolRegistry>,
    exposed: Option<HashSet<String>>,
) -> anyhow::Result<()> {
    let exposed = exposed.map(Arc::new);
    loop {
        let (stream, peer) = listener.accept().await?;
        debug!(%peer, "mcp websocket client connected");
        let registry = registry.clone();
        let exposed = exposed.clone();
        tokio::spawn(async move {
            let mut ws = match tokio_tungstenite::accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("websocket accept failed: {e}");
                    return;
                }
            };
            while let Some(msg) = ws.next().await {
                let text = match msg {
                    Ok(WsMessage::Text(t)) => t,
                    Ok(WsMessage::Ping(data)) => {
                        let _ = ws.send(WsMessage::Pong(data)).await;
                        continue;
                    }
                    Ok(WsMessage::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let req: JsonRpcRequest = match serde_json::from_str(&text) {
                    Ok(r) => r,
                    Err(e) => {
                        warn!("unparseable mcp frame: {e}");
                        continue;
                    }
                };
                if let Some(resp) =
                    handle_ws_request(&registry, exposed.as_deref(), req).await
                {
                    if let Ok(json) = serde_json::to_string(&resp) {
                        let _ = ws.send(WsMessage::Text(json)).await;
                    }
                }
            }
            debug!(%peer, "mcp websocket client disconnected");
        });
    }
}

async fn handle_ws_request(
    registry: &ToolRegistry,
    exposed: Option<&HashSet<String>>,
    req: JsonRpcRequest,
) -> Option<JsonRpcResponse> {
    if req.is_notification() {
        return None;
    }
    let id = req.id.clone().unwrap_or(Value::Null);
    let allowed = |name: &str| exposed.map(|set| set.contains(name)).unwrap_or(true);

    let response = match req.method.as_str() {
        "initialize" => JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": crate::client::PROTOCOL_VERSION,
                "serverInfo": { "name": "troupe", "version": env!("CARGO_PKG_VERSION") },
                "capabilities": { "tools": {} },
            }),
        ),
        "ping" => JsonRpcResponse::success(id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = registry
                .schemas()
                .into_iter()
                .filter(|s| allowed(&s.name))
                .map(|s| {
                    json!({
                        "name": s.name,
                        "description": s.description,
                        "inputSchema": s.parameters,
                    })
                })
                .collect();
            JsonRpcResponse::success(id, json!({ "tools": tools }))
        }
        "tools/call" => {
            let name = req.params["name"].as_str().unwrap_or_default().to_string();
            if !allowed(&name) {
                return Some(JsonRpcResponse::failure(
                    id,
                    -32602,
                    format!("tool '{name}' is not exposed"),
                ));
            }
            let args = req
                .params
                .get("arguments")
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new()));
            let call = ToolCall {
                id: Uuid::new_v4().to_string(),
                name,
                args,
            };
            let output = registry.invoke(&call, &InvocationContext::default()).await;
            JsonRpcResponse::success(
                id,
                json!({
                    "content": [ { "type": "text", "text": output.result.to_string() } ],
                    "isError": output.is_error,
                }),
            )
        }
        other => JsonRpcResponse::failure(id, -32601, format!("unknown method {other}")),
    };
    Some(response)
}

// ─── Unit tests ───────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use troupe_tools::{Tool, ToolOutput};

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
            ToolOutput::ok(&call.id, json!({ "echo": call.args }))
        }
    }

    fn registry() -> Arc<ToolRegistry> {
        let reg = ToolRegistry::new();
        reg.register(EchoTool).unwrap();
        Arc::new(reg)
    }

    #[test]
    fn get_info_enables_tools_capability() {
        let server = TroupeMcpServer::new(registry(), None);
        let info = server.get_info();
        assert!(info.capabilities.tools.is_some());
        assert!(info.instructions.is_some());
    }

    #[test]
    fn exposed_descriptors_respect_filter() {
        let server = TroupeMcpServer::new(
            registry(),
            Some(["other".to_string()].into_iter().collect()),
        );
        assert!(server.exposed_descriptors().is_empty());
        let unfiltered = TroupeMcpServer::new(registry(), None);
        assert_eq!(unfiltered.exposed_descriptors().len(), 1);
    }

    #[test]
    fn exposure_filter_applies() {
        let server = TroupeMcpServer::new(
            registry(),
            Some(["other".to_string()].into_iter().collect()),
        );
        assert!(!server.is_exposed("echo"));
        let unfiltered = TroupeMcpServer::new(registry(), None);
        assert!(unfiltered.is_exposed("echo"));
    }

    #[tokio::test]
    async fn ws_initialize_reports_tools_capability() {
        let resp = handle_ws_request(
            &registry(),
            None,
            JsonRpcRequest::new(1, "initialize", json!({})),
        )
        .await
        .unwrap();
        assert!(resp.result.unwrap()["capabilities"]["tools"].is_object());
    }

    #[tokio::test]
    async fn ws_tools_list_and_call_round_trip() {
        let reg = registry();
        let listed = handle_ws_request(&reg, None, JsonRpcRequest::new(1, "tools/list", json!({})))
            .await
            .unwrap();
        let tools = listed.result.unwrap()["tools"].clone();
        assert_eq!(tools[0]["name"], "echo");

        let called = handle_ws_request(
            &reg,
            None,
            JsonRpcRequest::new(
                2,
                "tools/call",
                json!({ "name": "echo", "arguments": { "x": 1 } }),
            ),
        )
        .await
        .unwrap();
        let result = called.result.unwrap();
        assert_eq!(result["isError"], json!(false));
        let text = result["content"][0]["text"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["echo"]["x"], json!(1));
    }

    #[tokio::test]
    async fn ws_unexposed_tool_rejected() {
        let resp = handle_ws_request(
            &registry(),
            Some(&HashSet::new()),
            JsonRpcRequest::new(3, "tools/call", json!({ "name": "echo" })),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32602);
    }

    #[tokio::test]
    async fn ws_unknown_method_errors() {
        let resp = handle_ws_request(
            &registry(),
            None,
            JsonRpcRequest::new(4, "resources/list", json!({})),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn ws_notifications_get_no_response() {
        let resp = handle_ws_request(
            &registry(),
            None,
            JsonRpcRequest::notification("notifications/initialized", json!({})),
        )
        .await;
        assert!(resp.is_none());
    }
}
