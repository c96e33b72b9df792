// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Serde default helper — returns `true`.
///
/// `#[serde(default)]` on a `bool` always falls back to `bool::default()`
/// (i.e. `false`), so fields that should be enabled unless explicitly
/// disabled need a named function.
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub observer: ObserverConfig,
    #[serde(default)]
    pub mailbox: MailboxConfig,
    /// Named external MCP servers, started on demand and imported into the
    /// tool registry under `mcp_<name>_<tool>` names.
    ///
    /// ```yaml
    /// mcp_servers:
    ///   filesystem:
    ///     transport: stdio
    ///     command: mcp-server-filesystem
    ///     args: ["--root", "/data"]
    ///   search:
    ///     transport: websocket
    ///     url: ws://localhost:9100/mcp
    /// ```
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend kind: "openai" (any OpenAI-compatible endpoint) or "mock".
    pub kind: String,
    /// Model name forwarded to the backend API.
    pub model: String,
    /// Environment variable that holds the API key (read at startup,
    /// never logged).
    pub api_key_env: Option<String>,
    /// Base URL override.  Useful for local servers and proxies; the hosted
    /// default is used when unset.
    pub base_url: Option<String>,
    /// Maximum tokens to request in a single completion.
    pub max_tokens: Option<u32>,
    /// Sampling temperature (0.0–2.0).
    pub temperature: Option<f32>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            kind: "openai".into(),
            model: "gpt-4o".into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            base_url: None,
            max_tokens: Some(4096),
            temperature: Some(0.2),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind address for the WebSocket JSON-RPC endpoint.
    pub bind: String,
    /// Per-turn timeout in seconds.  A turn that exceeds this is cancelled
    /// cooperatively; partial assistant content is kept.
    pub turn_timeout_secs: u64,
    /// Grace window in seconds for a client to reconnect after the socket
    /// drops before the session is destroyed.  0 = drop on disconnect.
    #[serde(default)]
    pub reconnect_grace_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8137".into(),
            turn_timeout_secs: 300,
            reconnect_grace_secs: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Read-only workspace root.  Filesystem tools may read anywhere under
    /// this path.
    pub workspace: PathBuf,
    /// Writable output root.  All tool-produced artifacts (RFCs, plans,
    /// written files) land under this path.
    pub output: PathBuf,
    /// Byte cap applied to a single tool result before it is recorded in
    /// conversation history.  Oversized results are truncated head+tail.
    pub result_byte_cap: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            workspace: PathBuf::from("."),
            output: PathBuf::from("./output"),
            result_byte_cap: 20_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObserverMode {
    /// Record metrics and emit alerts only.
    Passive,
    /// Additionally inject recovery directives on stalls.
    Active,
    /// Observer disabled entirely.
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    pub mode: ObserverMode,
    /// Seconds without a completed message (while the last event was a tool
    /// completion) before a stall alert fires.
    pub stall_secs: u64,
    /// Number of errors within `error_window_secs` that triggers an
    /// error-cascade alert.
    pub error_count_threshold: usize,
    pub error_window_secs: u64,
    /// Identical tool invocations within `loop_window_secs` that trigger a
    /// tool-loop alert.
    pub loop_threshold: usize,
    pub loop_window_secs: u64,
    /// Rolling-mean latency factor over the baseline (first 10 samples)
    /// that triggers a performance-regression alert.
    pub regression_factor: f64,
    /// Maximum stall interventions per session in active mode.
    pub max_interventions: usize,
    /// Optional newline-delimited JSON alert log path.
    #[serde(default)]
    pub alert_log: Option<PathBuf>,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            mode: ObserverMode::Passive,
            stall_secs: 30,
            error_count_threshold: 5,
            error_window_secs: 60,
            loop_threshold: 5,
            loop_window_secs: 60,
            regression_factor: 2.0,
            max_interventions: 10,
            alert_log: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailboxConfig {
    /// Soft cap on queued messages per recipient; `send` beyond the cap
    /// still succeeds but logs a warning.
    pub per_recipient_warn_depth: usize,
}

impl Default for MailboxConfig {
    fn default() -> Self {
        Self {
            per_recipient_warn_depth: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum McpTransportKind {
    Stdio,
    Websocket,
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub transport: McpTransportKind,
    /// Subprocess command (stdio transport).
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    /// Endpoint URL (websocket / sse transports).
    #[serde(default)]
    pub url: Option<String>,
    /// Per-request timeout in seconds.
    #[serde(default = "McpServerConfig::default_request_timeout")]
    pub request_timeout_secs: u64,
    /// WebSocket heartbeat interval in seconds.
    #[serde(default = "McpServerConfig::default_heartbeat")]
    pub heartbeat_secs: u64,
    /// Import the server's tools into the registry on connect.
    #[serde(default = "default_true")]
    pub import_tools: bool,
}

impl McpServerConfig {
    fn default_request_timeout() -> u64 {
        300
    }
    fn default_heartbeat() -> u64 {
        30
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
