// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use thiserror::Error;

/// Transport and protocol failures for the MCP client stack.
///
/// The reconnect wrapper retries only the transient kinds; protocol and
/// remote errors are returned to the caller unchanged.
#[derive(Debug, Error)]
pub enum McpError {
    #[error("connect failed: {0}")]
    Connect(String),

    #[error("transport closed")]
    Closed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("request failed: {0}")]
    Request(String),

    #[error("server error {code}: {message}")]
    Remote { code: i64, message: String },

    #[error("protocol violation: {0}")]
    Protocol(String),
}

impl McpError {
    /// Whether a retry with a fresh connection can plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            McpError::Connect(_) | McpError::Closed | McpError::Timeout(_) | McpError::Request(_)
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
