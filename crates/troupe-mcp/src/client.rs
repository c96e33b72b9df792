// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Mutex;

use serde_json::{json, Map, Value};
use tracing::debug;

use crate::error::McpError;
use crate::transport::McpTransport;

pub const PROTOCOL_VERSION: &str = "2024-11-05";

/// A tool definition as advertised by a server's `tools/list`.
#[derive(Debug, Clone)]
pub struct McpToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// MCP client over any transport: initialize handshake, tool-list caching,
/// and structured tool invocation.
pub struct McpClient {
    transport: Box<dyn McpTransport>,
    pub server_name: String,
    server_capabilities: Mutex<Option<Value>>,
    tools_cache: Mutex<Vec<McpToolDef>>,
}

impl McpClient {
    pub fn new(server_name: impl Into<String>, transport: Box<dyn McpTransport>) -> Self {
        Self {
            transport,
            server_name: server_name.into(),
            server_capabilities: Mutex::new(None),
            tools_cache: Mutex::new(Vec::new()),
        }
    }

    /// `initialize` handshake.  Records the server's capabilities and sends
    /// the initialized notification.
    pub async fn initialize(&self) -> Result<(), McpError> {
        let result = self
            .transport
            .request(
                "initialize",
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "clientInfo": {
                        "name": "troupe",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {},
                }),
            )
            .await?;
        *self.server_capabilities.lock().unwrap() =
            Some(result.get("capabilities").cloned().unwrap_or(Value::Null));
        self.transport
            .notify("notifications/initialized", json!({}))
            .await?;
        debug!(server = %self.server_name, "mcp initialize complete");
        Ok(())
    }

    /// Whether the server advertised the tools capability.
    pub fn supports_tools(&self) -> bool {
        self.server_capabilities
            .lock()
            .unwrap()
            .as_ref()
            .map(|c| c.get("tools").is_some())
            .unwrap_or(false)
    }

    /// `tools/list`; caches and returns the definitions.
    pub async fn list_tools(&self) -> Result<Vec<McpToolDef>, McpError> {
        let result = self.transport.request("tools/list", json!({})).await?;
        let defs: Vec<McpToolDef> = result
            .get("tools")
            .and_then(|t| t.as_array())
            .map(|tools| {
                tools
                    .iter()
                    .filter_map(|t| {
                        Some(McpToolDef {
                            name: t.get("name")?.as_str()?.to_string(),
                            description: t
                                .get("description")
                                .and_then(|d| d.as_str())
                                .unwrap_or("")
                                .to_string(),
                            input_schema: t
                                .get("inputSchema")
                                .cloned()
                                .unwrap_or_else(|| json!({ "type": "object" })),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        *self.tools_cache.lock().unwrap() = defs.clone();
        debug!(server = %self.server_name, count = defs.len(), "tools listed");
        Ok(defs)
    }

    /// Tool definitions from the last successful `tools/list`.
    pub fn cached_tools(&self) -> Vec<McpToolDef> {
        self.tools_cache.lock().unwrap().clone()
    }

    /// `tools/call`.  Extracts the `content` array, prefers text items, and
    /// shapes the outcome into the structured-result contract.
    pub async fn call_tool(&self, name: &str, args: Value) -> Result<Value, McpError> {
        let result = self
            .transport
            .request(
                "tools/call",
                json!({ "name": name, "arguments": args }),
            )
            .await?;
        Ok(shape_call_result(&result))
    }

    /// Liveness probe used by the connection pool.
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }
}

/// Map an MCP `tools/call` result into the structured-result contract.
///
/// - text content that parses as a JSON object with a `success` field
///   passes through unchanged (the remote tool already speaks the contract)
/// - other text becomes `{success: true, message: <text>}`
/// - an empty content array becomes `{success: true, message: ""}`
/// - `isError: true` becomes `{success: false, error: <text>}`
fn shape_call_result(result: &Value) -> Value {
    let is_error = result
        .get("isError")
        .and_then(|e| e.as_bool())
        .unwrap_or(false);

    let text: String = result
        .get("content")
        .and_then(|c| c.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    (item.get("type").and_then(|t| t.as_str()) == Some("text"))
                        .then(|| item.get("text").and_then(|t| t.as_str()).unwrap_or(""))
                })
                .collect::<Vec<_>>()
                .join("\n")
        })
        .unwrap_or_default();

    if is_error {
        return json!({ "success": false, "error": text });
    }

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(&text) {
        if map.contains_key("success") {
            return Value::Object(map);
        }
        let mut wrapped = Map::new();
        wrapped.insert("success".to_string(), json!(true));
        for (k, v) in map {
            wrapped.entry(k).or_insert(v);
        }
        return Value::Object(wrapped);
    }

    json!({ "success": true, "message": text })
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
