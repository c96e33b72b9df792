// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Imports remote MCP tools into the local registry.
//!
//! Each remote tool is wrapped in an adapter registered under
//! `mcp_<server>_<tool>`, so remote names can never collide with built-ins
//! or with tools from other servers.  Removal is by prefix when a server
//! unregisters.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use troupe_tools::{InvocationContext, Tool, ToolCall, ToolOutput, ToolRegistry};

use crate::client::McpToolDef;
use crate::reconnect::ReconnectingClient;

pub struct McpToolAdapter {
    full_name: String,
    def: McpToolDef,
    client: Arc<ReconnectingClient>,
}

impl McpToolAdapter {
    pub fn new(server: &str, def: McpToolDef, client: Arc<ReconnectingClient>) -> Self {
        Self {
            full_name: format!("mcp_{server}_{}", def.name),
            def,
            client,
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.full_name
    }

    fn description(&self) -> &str {
        &self.def.description
    }

    fn parameters_schema(&self) -> Value {
        self.def.input_schema.clone()
    }

    fn tags(&self) -> &[&str] {
        &["mcp"]
    }

    fn category(&self) -> &str {
        "mcp"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        match self.client.call_tool(&self.def.name, call.args.clone()).await {
            Ok(result) => {
                let is_error = result.get("success") == Some(&Value::Bool(false));
                ToolOutput {
                    call_id: call.id.clone(),
                    result,
                    is_error,
                }
            }
            Err(e) => ToolOutput::err(&call.id, format!("mcp: {e}")),
        }
    }
}

/// Register every definition under the server prefix.  Duplicates (e.g. a
/// server re-announcing after reconnect) are skipped with a warning by the
/// registry.  Returns the number actually registered.
pub fn import_tools(
    registry: &ToolRegistry,
    server: &str,
    client: Arc<ReconnectingClient>,
    defs: Vec<McpToolDef>,
) -> usize {
    let mut imported = 0;
    for def in defs {
        let adapter = McpToolAdapter::new(server, def, client.clone());
        match registry.register_arc(Arc::new(adapter)) {
            Ok(()) => imported += 1,
            Err(e) => warn!(server, "mcp tool import skipped: {e}"),
        }
    }
    debug!(server, imported, "mcp tools imported");
    imported
}

/// Drop every tool imported from a server.  Returns the number removed.
pub fn remove_server_tools(registry: &ToolRegistry, server: &str) -> usize {
    registry.unregister_prefix(&format!("mcp_{server}_"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::McpError;
    use crate::McpClient;

    fn defs(names: &[&str]) -> Vec<McpToolDef> {
        names
            .iter()
            .map(|n| McpToolDef {
                name: n.to_string(),
                description: format!("remote {n}"),
                input_schema: json!({ "type": "object" }),
            })
            .collect()
    }

    fn dummy_client() -> Arc<ReconnectingClient> {
        Arc::new(ReconnectingClient::new(|| async {
            Err::<McpClient, _>(McpError::Closed)
        }))
    }

    #[test]
    fn imported_names_carry_server_prefix() {
        let registry = ToolRegistry::new();
        let n = import_tools(&registry, "files", dummy_client(), defs(&["read", "write"]));
        assert_eq!(n, 2);
        let mut names = registry.names();
        names.sort();
        assert_eq!(names, vec!["mcp_files_read", "mcp_files_write"]);
    }

    #[test]
    fn reimport_skips_duplicates() {
        let registry = ToolRegistry::new();
        import_tools(&registry, "files", dummy_client(), defs(&["read"]));
        let n = import_tools(&registry, "files", dummy_client(), defs(&["read"]));
        assert_eq!(n, 0);
        assert_eq!(registry.names().len(), 1);
    }

    #[test]
    fn same_tool_from_two_servers_does_not_collide() {
        let registry = ToolRegistry::new();
        import_tools(&registry, "a", dummy_client(), defs(&["read"]));
        import_tools(&registry, "b", dummy_client(), defs(&["read"]));
        assert_eq!(registry.names().len(), 2);
    }

    #[test]
    fn remove_server_tools_is_prefix_scoped() {
        let registry = ToolRegistry::new();
        import_tools(&registry, "a", dummy_client(), defs(&["read", "write"]));
        import_tools(&registry, "b", dummy_client(), defs(&["read"]));
        assert_eq!(remove_server_tools(&registry, "a"), 2);
        assert_eq!(registry.names(), vec!["mcp_b_read"]);
    }

    #[test]
    fn adapter_is_tagged_mcp() {
        let adapter = McpToolAdapter::new(
            "srv",
            defs(&["x"]).remove(0),
            dummy_client(),
        );
        assert!(adapter.tags().contains(&"mcp"));
        assert_eq!(adapter.category(), "mcp");
    }
}
