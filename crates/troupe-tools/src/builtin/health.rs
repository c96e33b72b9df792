// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{InvocationContext, Tool, ToolCall, ToolOutput};

/// Reports basic process health.  Deliberately cheap: the observer carries
/// the real metrics; this tool exists so an agent can answer "is the system
/// up" without leaving the conversation.
pub struct SystemHealthCheckTool {
    started_at: Instant,
}

impl Default for SystemHealthCheckTool {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemHealthCheckTool {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
        }
    }
}

#[async_trait]
impl Tool for SystemHealthCheckTool {
    fn name(&self) -> &str {
        "system_health_check"
    }

    fn description(&self) -> &str {
        "Runs a quick health check of the orchestrator process and reports \
         status, uptime, and version."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {},
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["monitoring"]
    }

    fn category(&self) -> &str {
        "monitoring"
    }

    async fn execute(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput {
        ToolOutput::ok(
            &call.id,
            json!({
                "status": "ok",
                "uptime_secs": self.started_at.elapsed().as_secs(),
                "version": env!("CARGO_PKG_VERSION"),
                "session_id": ctx.session_id,
            }),
        )
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
