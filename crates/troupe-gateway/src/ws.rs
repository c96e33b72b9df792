// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! WebSocket bridge — one socket per client, speaking JSON-RPC 2.0.
//!
//! # Wire format
//!
//! JSON over WebSocket text frames: requests from the client, responses
//! plus server-initiated notifications (assistant deltas, tool events,
//! observer alerts) from the server.
//!
//! # Disconnect behavior
//!
//! Closing the socket detaches the client; in-flight turns complete and
//! update history silently.  Sessions started on the connection are
//! destroyed after the configured grace window (default 0 — immediately).

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::rpc::{parse_request, RpcRequest, RpcResponse};
use crate::service::{SessionCommand, SessionManager};

/// HTTP handler for GET /ws.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(manager): State<Arc<SessionManager>>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, manager))
}

pub async fn handle_socket(mut socket: WebSocket, manager: Arc<SessionManager>) {
    // Outbound frames (responses are sent inline; notifications flow here).
    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(64);
    // Sessions owned by this connection, for cleanup on disconnect.
    let mut owned_sessions: Vec<String> = Vec::new();

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let response = match parse_request(&text) {
                            Ok(req) => {
                                dispatch(&manager, &frame_tx, &mut owned_sessions, req).await
                            }
                            Err(e) => Some(RpcResponse::failure(Value::Null, -32700, e)),
                        };
                        if let Some(resp) = response {
                            if socket.send(Message::Text(resp.to_frame())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if socket.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {} // binary frames ignored
                    Some(Err(e)) => {
                        debug!("WebSocket recv error: {e}");
                        break;
                    }
                }
            }
            frame = frame_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if socket.send(Message::Text(frame)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    // Disconnect: destroy owned sessions after the grace window.
    let grace = manager_grace_secs(&manager);
    for session_id in owned_sessions {
        if grace == 0 {
            manager.end_session(&session_id);
        } else {
            let manager = manager.clone();
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(grace)).await;
                manager.end_session(&session_id);
            });
        }
    }
    debug!("WebSocket connection closed");
}

fn manager_grace_secs(manager: &SessionManager) -> u64 {
    manager.reconnect_grace_secs()
}

/// Route one request.  Returns `None` when no response frame should be
/// sent (notifications-style requests without an id).
async fn dispatch(
    manager: &Arc<SessionManager>,
    frame_tx: &mpsc::Sender<String>,
    owned_sessions: &mut Vec<String>,
    req: RpcRequest,
) -> Option<RpcResponse> {
    // Requests without an id are processed for critical methods with a
    // synthesized internal id; everything else without an id is dropped
    // (there is nowhere to report the outcome).
    if !req.wants_response() && !req.is_critical() {
        warn!(method = %req.method, "non-critical request without id dropped");
        return None;
    }
    let wants_response = req.wants_response();
    let id = req.id.clone().unwrap_or_else(|| {
        json!(format!("internal-{}", uuid::Uuid::new_v4()))
    });

    let response = route(manager, frame_tx, owned_sessions, &req, id).await;
    if wants_response {
        Some(response)
    } else {
        None
    }
}

async fn route(
    manager: &Arc<SessionManager>,
    frame_tx: &mpsc::Sender<String>,
    owned_sessions: &mut Vec<String>,
    req: &RpcRequest,
    id: Value,
) -> RpcResponse {
    match req.method.as_str() {
        "session.start" => {
            let session_id = manager.start_session(frame_tx.clone());
            owned_sessions.push(session_id.clone());
            RpcResponse::success(id, json!({ "sessionId": session_id }))
        }
        "session.sendUserMessage" => {
            let Some(session_id) = req.params["sessionId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing sessionId");
            };
            let Some(text) = req.params["text"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing text");
            };
            let Some(handle) = manager.handle(session_id) else {
                return RpcResponse::failure(id, -32001, "unknown session");
            };
            match handle.cmd_tx.try_send(SessionCommand::UserMessage {
                text: text.to_string(),
            }) {
                Ok(()) => RpcResponse::success(id, json!({ "queued": true })),
                Err(_) => RpcResponse::failure(id, -32002, "session queue full"),
            }
        }
        "session.switchAgent" => {
            let Some(session_id) = req.params["sessionId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing sessionId");
            };
            let Some(agent) = req.params["agentId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing agentId");
            };
            let Some(handle) = manager.handle(session_id) else {
                return RpcResponse::failure(id, -32001, "unknown session");
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .cmd_tx
                .send(SessionCommand::SwitchAgent {
                    agent: agent.to_string(),
                    reply: reply_tx,
                })
                .await
                .is_err()
            {
                return RpcResponse::failure(id, -32001, "session task gone");
            }
            match reply_rx.await {
                Ok(Ok(())) => RpcResponse::success(id, json!({ "ok": true })),
                Ok(Err(e)) => RpcResponse::failure(id, -32003, e.to_string()),
                Err(_) => RpcResponse::failure(id, -32001, "session task gone"),
            }
        }
        "session.provideToolResult" => {
            let Some(session_id) = req.params["sessionId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing sessionId");
            };
            let Some(tool_call_id) = req.params["toolCallId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing toolCallId");
            };
            let Some(handle) = manager.handle(session_id) else {
                return RpcResponse::failure(id, -32001, "unknown session");
            };
            let result = req
                .params
                .get("result")
                .cloned()
                .unwrap_or(Value::Object(serde_json::Map::new()));
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .cmd_tx
                .send(SessionCommand::ProvideToolResult {
                    tool_call_id: tool_call_id.to_string(),
                    result,
                    reply: reply_tx,
                })
                .await
                .is_err()
            {
                return RpcResponse::failure(id, -32001, "session task gone");
            }
            match reply_rx.await {
                Ok(Ok(())) => RpcResponse::success(id, json!({ "ok": true })),
                Ok(Err(e)) => RpcResponse::failure(id, -32003, e.to_string()),
                Err(_) => RpcResponse::failure(id, -32001, "session task gone"),
            }
        }
        "session.cancel" => {
            let Some(session_id) = req.params["sessionId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing sessionId");
            };
            let Some(handle) = manager.handle(session_id) else {
                return RpcResponse::failure(id, -32001, "unknown session");
            };
            let cancelled = handle.cancel_current_turn();
            RpcResponse::success(id, json!({ "ok": true, "cancelled": cancelled }))
        }
        "session.history" => {
            let Some(session_id) = req.params["sessionId"].as_str() else {
                return RpcResponse::failure(id, -32602, "missing sessionId");
            };
            let Some(handle) = manager.handle(session_id) else {
                return RpcResponse::failure(id, -32001, "unknown session");
            };
            let (reply_tx, reply_rx) = oneshot::channel();
            if handle
                .cmd_tx
                .send(SessionCommand::History { reply: reply_tx })
                .await
                .is_err()
            {
                return RpcResponse::failure(id, -32001, "session task gone");
            }
            match reply_rx.await {
                Ok(messages) => RpcResponse::success(
                    id,
                    json!({ "messages": serde_json::to_value(messages).unwrap_or(json!([])) }),
                ),
                Err(_) => RpcResponse::failure(id, -32001, "session task gone"),
            }
        }
        "mcp.start" => {
            let transport = req.params["transport"].as_str().unwrap_or("websocket");
            let port = req.params["port"].as_u64().unwrap_or(0) as u16;
            let exposed: Vec<String> = req.params["exposedTools"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|t| t.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            match manager.mcp_start(transport, port, exposed).await {
                Ok(actual_port) => {
                    RpcResponse::success(id, json!({ "ok": true, "port": actual_port }))
                }
                Err(e) => RpcResponse::failure(id, -32004, e.to_string()),
            }
        }
        "mcp.stop" => RpcResponse::success(id, json!({ "ok": manager.mcp_stop() })),
        "mcp.status" => RpcResponse::success(id, manager.mcp_status()),
        "monitoring.health" => RpcResponse::success(id, manager.health()),
        "monitoring.metrics" => RpcResponse::success(id, manager.metrics()),
        other => RpcResponse::failure(id, -32601, format!("unknown method {other}")),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use troupe_config::Config;

    use super::*;

    fn manager() -> (Arc<SessionManager>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.backend.kind = "mock".into();
        config.tools.workspace = dir.path().to_path_buf();
        config.tools.output = dir.path().join("out");
        (SessionManager::new(config).unwrap(), dir)
    }

    fn request(id: Option<i64>, method: &str, params: Value) -> RpcRequest {
        RpcRequest {
            jsonrpc: Some("2.0".into()),
            id: id.map(|i| json!(i)),
            method: method.into(),
            params,
        }
    }

    async fn call(
        manager: &Arc<SessionManager>,
        frame_tx: &mpsc::Sender<String>,
        owned: &mut Vec<String>,
        req: RpcRequest,
    ) -> Option<RpcResponse> {
        dispatch(manager, frame_tx, owned, req).await
    }

    #[tokio::test]
    async fn session_start_returns_id_and_tracks_ownership() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(8);
        let mut owned = Vec::new();
        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(1), "session.start", json!({})),
        )
        .await
        .unwrap();
        let session_id = resp.result.unwrap()["sessionId"].as_str().unwrap().to_string();
        assert_eq!(owned, vec![session_id]);
    }

    #[tokio::test]
    async fn send_user_message_without_id_is_still_processed() {
        let (manager, _dir) = manager();
        let (frame_tx, mut frame_rx) = mpsc::channel(64);
        let mut owned = Vec::new();
        let start = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(1), "session.start", json!({})),
        )
        .await
        .unwrap();
        let session_id = start.result.unwrap()["sessionId"].as_str().unwrap().to_string();

        // No id: the dispatcher must process it and return no response.
        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(
                None,
                "session.sendUserMessage",
                json!({ "sessionId": session_id, "text": "hello" }),
            ),
        )
        .await;
        assert!(resp.is_none());

        // The turn still ran: a completion notification arrives.
        let mut saw_complete = false;
        for _ in 0..50 {
            match tokio::time::timeout(
                std::time::Duration::from_millis(200),
                frame_rx.recv(),
            )
            .await
            {
                Ok(Some(frame)) if frame.contains("turn.complete") => {
                    saw_complete = true;
                    break;
                }
                Ok(Some(_)) => {}
                _ => break,
            }
        }
        assert!(saw_complete);
    }

    #[tokio::test]
    async fn non_critical_request_without_id_is_dropped() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(8);
        let mut owned = Vec::new();
        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(None, "monitoring.health", json!({})),
        )
        .await;
        assert!(resp.is_none());
    }

    #[tokio::test]
    async fn unknown_session_is_an_error() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(8);
        let mut owned = Vec::new();
        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(
                Some(2),
                "session.sendUserMessage",
                json!({ "sessionId": "nope", "text": "x" }),
            ),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32001);
    }

    #[tokio::test]
    async fn switch_agent_round_trip() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(64);
        let mut owned = Vec::new();
        let start = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(1), "session.start", json!({})),
        )
        .await
        .unwrap();
        let session_id = start.result.unwrap()["sessionId"].as_str().unwrap().to_string();

        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(
                Some(2),
                "session.switchAgent",
                json!({ "sessionId": session_id, "agentId": "d" }),
            ),
        )
        .await
        .unwrap();
        assert_eq!(resp.result.unwrap()["ok"], json!(true));
    }

    #[tokio::test]
    async fn provide_tool_result_routes_to_the_session() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(64);
        let mut owned = Vec::new();
        let start = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(1), "session.start", json!({})),
        )
        .await
        .unwrap();
        let session_id = start.result.unwrap()["sessionId"].as_str().unwrap().to_string();

        // No call with this id is pending, so the session rejects it — which
        // proves the request reached the session task rather than falling
        // through as an unknown method.
        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(
                Some(2),
                "session.provideToolResult",
                json!({
                    "sessionId": session_id,
                    "toolCallId": "ext-1",
                    "result": { "success": true },
                }),
            ),
        )
        .await
        .unwrap();
        let err = resp.error.unwrap();
        assert_eq!(err.code, -32003);
        assert!(err.message.contains("unknown tool call id"));
    }

    #[tokio::test]
    async fn unknown_method_is_reported() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(8);
        let mut owned = Vec::new();
        let resp = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(9), "session.fly", json!({})),
        )
        .await
        .unwrap();
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn monitoring_endpoints_answer() {
        let (manager, _dir) = manager();
        let (frame_tx, _rx) = mpsc::channel(8);
        let mut owned = Vec::new();
        let health = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(1), "monitoring.health", json!({})),
        )
        .await
        .unwrap();
        assert!(health.result.unwrap()["status"].is_string());

        let metrics = call(
            &manager,
            &frame_tx,
            &mut owned,
            request(Some(2), "monitoring.metrics", json!({})),
        )
        .await
        .unwrap();
        assert!(metrics.result.is_some());
    }
}
