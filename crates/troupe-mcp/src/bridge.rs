// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//!
//! Conversions from troupe's tool types to the rmcp MCP model types.
//!
//! [`ToolSchema`] and [`ToolOutput`] are the registry's native shapes; MCP
//! hosts expect `Tool` descriptors and `CallToolResult` payloads.  Both
//! conversions are total: every registered tool declares an object schema,
//! and the structured result always serializes to one JSON text item, so
//! nothing here can fail at call time.

use std::borrow::Cow;
use std::sync::Arc;

use rmcp::model::{CallToolResult, Content, Tool as McpTool};
use serde_json::{Map, Value};
use tracing::warn;

use troupe_tools::{ToolOutput, ToolSchema};

/// Build the MCP descriptor for one tool.
///
/// The parameter schema is taken apart rather than passed through: MCP
/// requires a JSON *object* as the input schema, and while every tool in
/// this workspace declares one, a schema relayed from elsewhere might not.
/// A non-object schema is folded into a `{"type":"object","value":…}`
/// envelope with a warning instead of being rejected, so a single odd tool
/// cannot make the whole `tools/list` reply invalid.
pub fn schema_to_mcp_tool(schema: ToolSchema) -> McpTool {
    let ToolSchema {
        name,
        description,
        parameters,
    } = schema;
    let input_schema = match parameters {
        Value::Object(map) => map,
        other => {
            warn!(tool = %name, "non-object parameter schema wrapped for MCP export");
            Map::from_iter([
                ("type".to_string(), Value::String("object".to_string())),
                ("value".to_string(), other),
            ])
        }
    };
    McpTool::new(
        Cow::Owned(name),
        Cow::Owned(description),
        Arc::new(input_schema),
    )
}

/// Shape a tool's structured result for an MCP host.
///
/// The whole `{success, …}` object travels as a single text content item —
/// hosts that understand the contract parse the JSON, everyone else still
/// gets readable output.  `is_error` is always populated (never `None`)
/// because the output's flag is authoritative either way.
pub fn output_to_call_result(output: ToolOutput) -> CallToolResult {
    let is_error = output.is_error;
    CallToolResult {
        content: vec![Content::text(output.to_history_content())],
        is_error: Some(is_error),
        structured_content: None,
        meta: None,
    }
}

// ─── Unit tests ───────────────────────────────────────────────────────────────
