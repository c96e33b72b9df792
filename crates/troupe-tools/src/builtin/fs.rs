// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::policy::PathPolicy;
use crate::tool::{InvocationContext, Tool, ToolCall, ToolOutput};

/// Default number of lines returned when the caller does not specify a limit.
/// Kept small to avoid flooding the model context on the first read; the
/// agent can paginate with offset + limit to get more.
const DEFAULT_LINE_LIMIT: usize = 200;

pub struct ReadFileTool {
    policy: Arc<PathPolicy>,
}

impl ReadFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file from the workspace. Default: 200 lines; paginate with \
         offset + limit. Use search_workspace to find the relevant region first, \
         then read only those lines."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the workspace root"
                },
                "offset": {
                    "type": "integer",
                    "description": "1-indexed line number to start reading from (default 1)"
                },
                "limit": {
                    "type": "integer",
                    "description": "Maximum number of lines to return (default 200)"
                }
            },
            "required": ["path"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["filesystem", "read"]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let raw = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let offset = call.args.get("offset").and_then(|v| v.as_u64()).unwrap_or(1) as usize;
        let limit = call
            .args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        let path = match self.policy.resolve_read(raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err_with(&call.id, e, path_ctx(raw)),
        };
        debug!(path = %path.display(), offset, limit, "read_file tool");

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(t) => t,
            Err(e) => {
                return ToolOutput::err_with(&call.id, format!("read error: {e}"), path_ctx(raw))
            }
        };

        let total_lines = text.lines().count();
        let start = offset.saturating_sub(1);
        let selected: Vec<&str> = text.lines().skip(start).take(limit).collect();
        let truncated = start + selected.len() < total_lines;

        ToolOutput::ok(
            &call.id,
            json!({
                "path": raw,
                "content": selected.join("\n"),
                "offset": offset,
                "lines_returned": selected.len(),
                "total_lines": total_lines,
                "truncated": truncated,
            }),
        )
    }
}

pub struct WriteFileTool {
    policy: Arc<PathPolicy>,
}

impl WriteFileTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes a file under the output root. Parent directories are created. \
         Relative paths resolve against the output root; writes outside it are denied."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path relative to the output root"
                },
                "content": {
                    "type": "string",
                    "description": "Full file content"
                }
            },
            "required": ["path", "content"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["filesystem", "write"]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let raw = match call.args.get("path").and_then(|v| v.as_str()) {
            Some(p) => p,
            None => return ToolOutput::err(&call.id, "missing required parameter 'path'"),
        };
        let content = match call.args.get("content").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => return ToolOutput::err(&call.id, "missing required parameter 'content'"),
        };

        let path = match self.policy.resolve_write(raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err_with(&call.id, e, path_ctx(raw)),
        };
        debug!(path = %path.display(), bytes = content.len(), "write_file tool");

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return ToolOutput::err_with(
                    &call.id,
                    format!("create dir error: {e}"),
                    path_ctx(raw),
                );
            }
        }
        match tokio::fs::write(&path, content).await {
            Ok(()) => ToolOutput::ok(
                &call.id,
                json!({ "path": raw, "bytes_written": content.len() }),
            ),
            Err(e) => ToolOutput::err_with(&call.id, format!("write error: {e}"), path_ctx(raw)),
        }
    }
}

pub struct ListDirTool {
    policy: Arc<PathPolicy>,
}

impl ListDirTool {
    pub fn new(policy: Arc<PathPolicy>) -> Self {
        Self { policy }
    }
}

#[async_trait]
impl Tool for ListDirTool {
    fn name(&self) -> &str {
        "list_dir"
    }

    fn description(&self) -> &str {
        "Lists the entries of a workspace directory (non-recursive)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the workspace root (default: the root)"
                }
            },
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["filesystem", "read"]
    }

    fn category(&self) -> &str {
        "filesystem"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let raw = call
            .args
            .get("path")
            .and_then(|v| v.as_str())
            .unwrap_or(".");
        let path = match self.policy.resolve_read(raw) {
            Ok(p) => p,
            Err(e) => return ToolOutput::err_with(&call.id, e, path_ctx(raw)),
        };

        let mut rd = match tokio::fs::read_dir(&path).await {
            Ok(rd) => rd,
            Err(e) => {
                return ToolOutput::err_with(&call.id, format!("list error: {e}"), path_ctx(raw))
            }
        };
        let mut entries = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let kind = match entry.file_type().await {
                Ok(t) if t.is_dir() => "dir",
                Ok(_) => "file",
                Err(_) => "unknown",
            };
            entries.push(json!({
                "name": entry.file_name().to_string_lossy(),
                "type": kind,
            }));
        }
        entries.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));

        let count = entries.len();
        ToolOutput::ok(
            &call.id,
            json!({ "path": raw, "entries": entries, "count": count }),
        )
    }
}

fn path_ctx(raw: &str) -> serde_json::Map<String, Value> {
    let mut m = serde_json::Map::new();
    m.insert("path".to_string(), Value::String(raw.to_string()));
    m
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> (tempfile::TempDir, Arc<PathPolicy>) {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        std::fs::create_dir_all(&out).unwrap();
        let policy = Arc::new(PathPolicy::new(dir.path(), &out));
        (dir, policy)
    }

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "t1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn read_file_returns_content() {
        let (dir, policy) = setup();
        std::fs::write(dir.path().join("a.txt"), "line one\nline two\n").unwrap();
        let tool = ReadFileTool::new(policy);
        let out = tool
            .execute(
                &call("read_file", json!({ "path": "a.txt" })),
                &InvocationContext::default(),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.result["content"], json!("line one\nline two"));
        assert_eq!(out.result["total_lines"], json!(2));
    }

    #[tokio::test]
    async fn read_file_offset_and_limit() {
        let (dir, policy) = setup();
        std::fs::write(dir.path().join("n.txt"), "1\n2\n3\n4\n5\n").unwrap();
        let tool = ReadFileTool::new(policy);
        let out = tool
            .execute(
                &call("read_file", json!({ "path": "n.txt", "offset": 2, "limit": 2 })),
                &InvocationContext::default(),
            )
            .await;
        assert_eq!(out.result["content"], json!("2\n3"));
        assert_eq!(out.result["truncated"], json!(true));
    }

    #[tokio::test]
    async fn read_outside_workspace_denied() {
        let (_dir, policy) = setup();
        let tool = ReadFileTool::new(policy);
        let out = tool
            .execute(
                &call("read_file", json!({ "path": "/etc/passwd" })),
                &InvocationContext::default(),
            )
            .await;
        assert!(out.is_error);
        assert_eq!(out.result["path"], json!("/etc/passwd"));
    }

    #[tokio::test]
    async fn write_file_lands_under_output() {
        let (dir, policy) = setup();
        let tool = WriteFileTool::new(policy);
        let out = tool
            .execute(
                &call("write_file", json!({ "path": "notes/x.md", "content": "hi" })),
                &InvocationContext::default(),
            )
            .await;
        assert!(!out.is_error);
        let written = std::fs::read_to_string(dir.path().join("out/notes/x.md")).unwrap();
        assert_eq!(written, "hi");
    }

    #[tokio::test]
    async fn write_into_workspace_denied() {
        let (dir, policy) = setup();
        let tool = WriteFileTool::new(policy);
        let target = dir.path().join("src.rs");
        let out = tool
            .execute(
                &call(
                    "write_file",
                    json!({ "path": target.to_str().unwrap(), "content": "x" }),
                ),
                &InvocationContext::default(),
            )
            .await;
        assert!(out.is_error);
        assert!(!target.exists());
    }

    #[tokio::test]
    async fn list_dir_reports_entries() {
        let (dir, policy) = setup();
        std::fs::write(dir.path().join("f.txt"), "x").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let tool = ListDirTool::new(policy);
        let out = tool
            .execute(&call("list_dir", json!({})), &InvocationContext::default())
            .await;
        assert!(!out.is_error);
        let entries = out.result["entries"].as_array().unwrap();
        assert!(entries.iter().any(|e| e["name"] == "f.txt" && e["type"] == "file"));
        assert!(entries.iter().any(|e| e["name"] == "sub" && e["type"] == "dir"));
    }
}
