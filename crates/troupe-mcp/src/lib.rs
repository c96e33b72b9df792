// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! `troupe-mcp` — Model Context Protocol integration.
//!
//! Client side: three framed JSON-RPC transports (stdio subprocess,
//! WebSocket, SSE), an initializing client with tool-list caching, a keyed
//! connection pool, and a reconnecting wrapper with exponential backoff.
//! Imported tools register in the local [`troupe_tools::ToolRegistry`]
//! under `mcp_<server>_<tool>` names.
//!
//! Server side: the local registry can be exposed to any MCP host over
//! stdio (rmcp) or WebSocket, and a persistent stdio proxy can supervise a
//! child MCP server while caching its `initialize` and `tools/list`
//! responses across restarts.
//!
//! ```text
//! agent runtime ──► ToolRegistry ──► McpToolAdapter ──► ReconnectingClient
//!                                                          │
//!                                       StdioTransport / WebSocketTransport / SseTransport
//!                                                          │
//!                                                 external MCP server
//! ```

pub mod adapter;
pub mod bridge;
pub mod client;
pub mod error;
pub mod jsonrpc;
pub mod pool;
pub mod proxy;
pub mod reconnect;
pub mod server;
pub mod transport;

pub use adapter::{import_tools, remove_server_tools, McpToolAdapter};
pub use client::{McpClient, McpToolDef, PROTOCOL_VERSION};
pub use error::McpError;
pub use jsonrpc::{JsonRpcRequest, JsonRpcResponse};
pub use pool::{ConnectionPool, PoolKey};
pub use proxy::{stdio_child_factory, PersistentProxy, TransportFactory};
pub use reconnect::ReconnectingClient;
pub use server::{serve_stdio, serve_ws, TroupeMcpServer};
pub use transport::{McpTransport, SseTransport, StdioTransport, WebSocketTransport};

use std::sync::Arc;
use std::time::Duration;

use troupe_config::McpServerConfig;
use troupe_tools::ToolRegistry;

/// Connect a configured server, run the handshake, and import its tools
/// into the registry.  Returns the reconnecting client and the number of
/// tools imported.
pub async fn connect_and_import(
    registry: &ToolRegistry,
    name: &str,
    cfg: &McpServerConfig,
) -> Result<(Arc<ReconnectingClient>, usize), McpError> {
    let request_timeout = Duration::from_secs(cfg.request_timeout_secs);
    let heartbeat = Duration::from_secs(cfg.heartbeat_secs);

    let client: ReconnectingClient = match cfg.transport {
        troupe_config::McpTransportKind::Stdio => {
            let command = cfg
                .command
                .clone()
                .ok_or_else(|| McpError::Connect("stdio transport requires a command".into()))?;
            let args = cfg.args.clone();
            let server = name.to_string();
            ReconnectingClient::new(move || {
                let command = command.clone();
                let args = args.clone();
                let server = server.clone();
                async move {
                    let transport =
                        StdioTransport::spawn(&command, &args, request_timeout).await?;
                    Ok(McpClient::new(server, Box::new(transport)))
                }
            })
        }
        troupe_config::McpTransportKind::Websocket => {
            let url = cfg
                .url
                .clone()
                .ok_or_else(|| McpError::Connect("websocket transport requires a url".into()))?;
            let server = name.to_string();
            ReconnectingClient::new(move || {
                let url = url.clone();
                let server = server.clone();
                async move {
                    let transport = WebSocketTransport::connect(
                        &url,
                        request_timeout,
                        heartbeat,
                        heartbeat * 2,
                    )
                    .await?;
                    Ok(McpClient::new(server, Box::new(transport)))
                }
            })
        }
        troupe_config::McpTransportKind::Sse => {
            let url = cfg
                .url
                .clone()
                .ok_or_else(|| McpError::Connect("sse transport requires a url".into()))?;
            let server = name.to_string();
            ReconnectingClient::new(move || {
                let url = url.clone();
                let server = server.clone();
                async move {
                    let transport = SseTransport::connect(&url, request_timeout).await?;
                    Ok(McpClient::new(server, Box::new(transport)))
                }
            })
        }
    };

    let client = Arc::new(client);
    let imported = if cfg.import_tools {
        let defs = client.list_tools().await?;
        import_tools(registry, name, client.clone(), defs)
    } else {
        0
    };
    Ok((client, imported))
}
