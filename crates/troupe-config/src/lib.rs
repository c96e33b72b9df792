// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod loader;
pub mod schema;

pub use loader::{load, load_from_path};
pub use schema::{
    BackendConfig, Config, GatewayConfig, MailboxConfig, McpServerConfig, McpTransportKind,
    ObserverConfig, ObserverMode, ToolsConfig,
};
