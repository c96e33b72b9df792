// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! JSON-RPC 2.0 framing for the client protocol.
//!
//! One quirk worth calling out: requests without an `id` are still
//! processed for the critical methods (`session.sendUserMessage` and
//! `session.provideToolResult`) — the dispatcher synthesizes an internal
//! id and simply sends no response, so a client that forgets the id does
//! not get its message silently swallowed.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Methods that must be processed even when the client omits the id.
pub const CRITICAL_METHODS: &[&str] = &["session.sendUserMessage", "session.provideToolResult"];

#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    #[serde(default)]
    pub jsonrpc: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl RpcRequest {
    /// Whether this request warrants a response frame.
    pub fn wants_response(&self) -> bool {
        self.id.is_some()
    }

    /// True for methods processed even without an id.
    pub fn is_critical(&self) -> bool {
        CRITICAL_METHODS.contains(&self.method.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcResponse {
    pub jsonrpc: &'static str,
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
}

impl RpcResponse {
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn failure(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
            }),
        }
    }

    pub fn to_frame(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#
                .to_string()
        })
    }
}

/// Serialize a server-initiated notification frame.
pub fn notification_frame(method: &str, params: Value) -> String {
    json!({ "jsonrpc": "2.0", "method": method, "params": params }).to_string()
}

/// Parse one incoming text frame.
pub fn parse_request(text: &str) -> Result<RpcRequest, String> {
    serde_json::from_str(text).map_err(|e| format!("invalid JSON-RPC request: {e}"))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_request_with_id() {
        let req = parse_request(
            r#"{"jsonrpc":"2.0","id":1,"method":"session.start","params":{}}"#,
        )
        .unwrap();
        assert!(req.wants_response());
        assert_eq!(req.method, "session.start");
    }

    #[test]
    fn request_without_id_is_parsed_but_wants_no_response() {
        let req = parse_request(
            r#"{"jsonrpc":"2.0","method":"session.sendUserMessage","params":{"text":"hi"}}"#,
        )
        .unwrap();
        assert!(!req.wants_response());
        assert!(req.is_critical());
    }

    #[test]
    fn non_critical_method_without_id_detected() {
        let req =
            parse_request(r#"{"jsonrpc":"2.0","method":"monitoring.health","params":{}}"#).unwrap();
        assert!(!req.is_critical());
    }

    #[test]
    fn response_frames_serialize() {
        let ok = RpcResponse::success(json!(1), json!({ "ok": true })).to_frame();
        assert!(ok.contains("\"result\""));
        let err = RpcResponse::failure(json!(2), -32601, "unknown method").to_frame();
        assert!(err.contains("-32601"));
    }

    #[test]
    fn notification_frame_has_no_id() {
        let frame = notification_frame("assistant.delta", json!({ "text": "x" }));
        let v: Value = serde_json::from_str(&frame).unwrap();
        assert!(v.get("id").is_none());
        assert_eq!(v["method"], "assistant.delta");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_request("nope").is_err());
    }
}
