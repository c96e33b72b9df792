// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod rpc;
pub mod service;
pub mod ws;

pub use rpc::{notification_frame, RpcRequest, RpcResponse};
pub use service::{SessionCommand, SessionHandle, SessionManager};

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::get, Router};
use tracing::info;

use troupe_config::Config;

/// Start the WebSocket JSON-RPC gateway.  Blocks until the listener fails.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let manager = SessionManager::new(config)?;
    manager.connect_configured_mcp_servers().await;

    let bind = manager.bind_address().to_string();
    let app = Router::new()
        .route("/ws", get(ws::ws_handler))
        .with_state(manager);

    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    info!(%bind, "gateway listening");
    axum::serve(listener, app).await.context("gateway serve")
}
