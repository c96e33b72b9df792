// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use serde_json::{json, Map, Value};

/// A single tool invocation requested by the model.
#[derive(Debug, Clone)]
pub struct ToolCall {
    /// Opaque identifier returned by the model (forwarded verbatim).
    pub id: String,
    pub name: String,
    /// Parsed JSON arguments.
    pub args: Value,
}

/// Per-invocation context passed to every tool.
///
/// Carries the identity of the caller.  Tools that need shared services
/// (path policy, mailbox) hold them as `Arc` fields set at registration.
#[derive(Debug, Clone, Default)]
pub struct InvocationContext {
    pub session_id: String,
    /// Id of the agent on whose behalf the tool runs.  Empty when the tool
    /// is invoked from outside a session (e.g. an MCP host).
    pub agent_id: String,
}

impl InvocationContext {
    pub fn new(session_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            agent_id: agent_id.into(),
        }
    }
}

/// The result of executing a tool.
///
/// `result` is always a JSON object containing either `success: true` plus
/// operation-specific fields, or `success: false` plus `error` and any
/// context fields.  Tools never return formatted prose as the primary
/// payload; a human-readable `message` field is optional.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    pub call_id: String,
    pub result: Value,
    /// Mirrors `result.success == false`, kept as a flag so consumers can
    /// branch without re-parsing.
    pub is_error: bool,
}

impl ToolOutput {
    /// Successful result with operation-specific fields.
    /// `fields` that is not an object is wrapped under a `"value"` key.
    pub fn ok(call_id: impl Into<String>, fields: Value) -> Self {
        let mut map = match fields {
            Value::Object(m) => m,
            Value::Null => Map::new(),
            other => {
                let mut m = Map::new();
                m.insert("value".to_string(), other);
                m
            }
        };
        map.insert("success".to_string(), Value::Bool(true));
        Self {
            call_id: call_id.into(),
            result: Value::Object(map),
            is_error: false,
        }
    }

    /// Successful result carrying only a human-readable message.
    pub fn message(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self::ok(call_id, json!({ "message": text.into() }))
    }

    /// Error result.
    pub fn err(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::err_with(call_id, error, Map::new())
    }

    /// Error result with additional context fields.
    pub fn err_with(
        call_id: impl Into<String>,
        error: impl Into<String>,
        mut context: Map<String, Value>,
    ) -> Self {
        context.insert("success".to_string(), Value::Bool(false));
        context.insert("error".to_string(), Value::String(error.into()));
        Self {
            call_id: call_id.into(),
            result: Value::Object(context),
            is_error: true,
        }
    }

    /// The error string, when this is an error result.
    pub fn error_text(&self) -> Option<&str> {
        self.result.get("error").and_then(|e| e.as_str())
    }

    /// JSON serialization of the structured result, as recorded in
    /// conversation history.
    pub fn to_history_content(&self) -> String {
        self.result.to_string()
    }
}

/// Trait that every built-in, MCP-imported, and user-defined tool implements.
///
/// Tools are a uniform capability: schema + invoke.  New tool categories are
/// added by registering a new implementation, not by subclassing anything.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema for the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Tags used by the selector cascade.  Defaults at registration time,
    /// not at lookup time.
    fn tags(&self) -> &[&str] {
        &[]
    }
    /// Coarse grouping for display and set definitions.
    fn category(&self) -> &str {
        "general"
    }
    /// Execute the tool.  Failures are wrapped in [`ToolOutput::err`];
    /// execute itself does not return `Result`.
    async fn execute(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ok_inserts_success_true() {
        let out = ToolOutput::ok("1", json!({ "path": "/x" }));
        assert!(!out.is_error);
        assert_eq!(out.result["success"], json!(true));
        assert_eq!(out.result["path"], json!("/x"));
    }

    #[test]
    fn ok_wraps_non_object_payload() {
        let out = ToolOutput::ok("1", json!([1, 2, 3]));
        assert_eq!(out.result["value"], json!([1, 2, 3]));
        assert_eq!(out.result["success"], json!(true));
    }

    #[test]
    fn err_inserts_success_false_and_error() {
        let out = ToolOutput::err("1", "boom");
        assert!(out.is_error);
        assert_eq!(out.result["success"], json!(false));
        assert_eq!(out.error_text(), Some("boom"));
    }

    #[test]
    fn err_with_preserves_context_fields() {
        let mut ctx = Map::new();
        ctx.insert("path".to_string(), json!("/etc/shadow"));
        let out = ToolOutput::err_with("1", "denied", ctx);
        assert_eq!(out.result["path"], json!("/etc/shadow"));
        assert_eq!(out.result["success"], json!(false));
    }

    #[test]
    fn message_result_is_success_with_message() {
        let out = ToolOutput::message("1", "done");
        assert!(!out.is_error);
        assert_eq!(out.result["message"], json!("done"));
    }

    #[test]
    fn history_content_is_json() {
        let out = ToolOutput::ok("1", json!({ "n": 3 }));
        let parsed: Value = serde_json::from_str(&out.to_history_content()).unwrap();
        assert_eq!(parsed["n"], json!(3));
    }
}
