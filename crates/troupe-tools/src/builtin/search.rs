// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::policy::PathPolicy;
use crate::tool::{InvocationContext, Tool, ToolCall, ToolOutput};

const DEFAULT_MAX_MATCHES: usize = 50;
/// Files larger than this are skipped; grepping generated blobs wastes the
/// match budget.
const MAX_FILE_BYTES: u64 = 1_000_000;

pub struct SearchWorkspaceTool {
    policy: Arc<PathPolicy>,
}

impl SearchWorkspaceTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for SearchWorkspaceTool {
    fn name(&self) -> &str {
        "search_workspace"
    }

    fn description(&self) -> &str {
        "Searches workspace files for a regex pattern. Returns matching lines \
         with file and line number, leading matches first."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Subdirectory to search (default: workspace root)"
                },
                "max_matches": {
                    "type": "integer",
                    "description": "Maximum matches to return (default 50)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["filesystem", "read", "search"]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let pattern = match call.args.get("pattern").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'pattern'"),
        };
        let raw_path = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let max_matches = call
            .args
            .get("max_matches")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_MAX_MATCHES as u64) as usize;

        let re = match Regex::new(pattern) {
            Ok(r) => r,
            Err(e) => return ToolOutput::err(&call.id, format!("invalid pattern: {e}")),
        };
        let root = match self.policy.resolve_read(raw_path) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err(&call.id, e),
        };
        debug!(pattern, root = %root.display(), "search_workspace tool");

        // The walk is synchronous; hand it to the blocking pool so the turn
        // loop stays responsive on large trees.
        let result = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            let mut searched = 0usize;
            for entry in WalkDir::new(&root)
                .follow_links(false)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                if entry.metadata().map(|m| m.len() > MAX_FILE_BYTES).unwrap_or(true) {
                    continue;
                }
                let text = match std::fs::read_to_string(entry.path()) {
                    Ok(t) => t,
                    Err(_) => continue, // binary or unreadable
                };
                searched += 1;
                for (n, line) in text.lines().enumerate() {
                    if re.is_match(line) {
                        matches.push(json!({
                            "file": entry.path().display().to_string(),
                            "line": n + 1,
                            "text": line.trim_end(),
                        }));
                        if matches.len() >= max_matches {
                            return (matches, searched, true);
                        }
                    }
                }
            }
            (matches, searched, false)
        })
        .await;

        match result {
            Ok((matches, files_searched, capped)) => {
                let match_count = matches.len();
                ToolOutput::ok(
                    &call.id,
                    json!({
                        "pattern": pattern,
                        "matches": matches,
                        "match_count": match_count,
                        "files_searched": files_searched,
                        "capped": capped,
                    }),
                )
            }
            Err(e) => ToolOutput::err(&call.id, format!("internal: search task failed: {e}")),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
