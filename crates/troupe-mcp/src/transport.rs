// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Framed JSON-RPC transports to an external MCP server.
//!
//! Three transports implement the same capability:
//!
//! - **stdio** — spawns the server as a subprocess and speaks
//!   newline-delimited JSON-RPC over its stdin/stdout; stderr lines are
//!   logged.
//! - **WebSocket** — text frames over `ws://`, with a ping/pong heartbeat
//!   that declares the connection dead after a silence window.
//! - **SSE** — an event stream carries responses and notifications;
//!   requests are POSTed to a sibling endpoint with a connection-id header.
//!
//! All three share the same demultiplexer: requests are keyed by id and
//! resolved into pending-response channels; frames with a `method` are
//! server notifications and flow out through the notification sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

use crate::error::McpError;
use crate::jsonrpc::{parse_incoming, Incoming, JsonRpcRequest};

/// A live framed JSON-RPC connection.
#[async_trait]
pub trait McpTransport: Send + Sync {
    /// Send a request and await its matching response.
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError>;

    /// Send a notification (no response expected).
    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError>;

    /// Tear the connection down and fail all pending requests.
    async fn close(&self);

    fn is_alive(&self) -> bool;

    /// Take the server-notification receiver.  Yields `(method, params)`
    /// pairs; can be taken once.
    fn notifications(&self) -> Option<mpsc::UnboundedReceiver<(String, Value)>>;
}

// ─── Shared demultiplexer ─────────────────────────────────────────────────────

struct Demux {
    pending: Mutex<HashMap<i64, oneshot::Sender<Result<Value, McpError>>>>,
    next_id: AtomicI64,
    alive: AtomicBool,
    notif_tx: mpsc::UnboundedSender<(String, Value)>,
}

impl Demux {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(String, Value)>) {
        let (notif_tx, notif_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                pending: Mutex::new(HashMap::new()),
                next_id: AtomicI64::new(1),
                alive: AtomicBool::new(true),
                notif_tx,
            }),
            notif_rx,
        )
    }

    fn register(&self) -> (i64, oneshot::Receiver<Result<Value, McpError>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert(id, tx);
        (id, rx)
    }

    fn forget(&self, id: i64) {
        self.pending.lock().unwrap().remove(&id);
    }

    /// Route one frame of transport input.
    fn dispatch_text(&self, text: &str) {
        match parse_incoming(text) {
            Ok(Incoming::Response(resp)) => {
                let Some(id) = resp.id.as_i64() else {
                    warn!("response with non-numeric id dropped");
                    return;
                };
                let sender = self.pending.lock().unwrap().remove(&id);
                let Some(sender) = sender else {
                    debug!(id, "response for unknown request id");
                    return;
                };
                let outcome = match (resp.result, resp.error) {
                    (_, Some(err)) => Err(McpError::Remote {
                        code: err.code,
                        message: err.message,
                    }),
                    (Some(result), None) => Ok(result),
                    (None, None) => Ok(Value::Null),
                };
                let _ = sender.send(outcome);
            }
            Ok(Incoming::Notification { method, params }) => {
                let _ = self.notif_tx.send((method, params));
            }
            Err(e) => warn!("unparseable frame from server: {e}"),
        }
    }

    /// Mark the connection dead and fail every pending request.
    fn shutdown(&self) {
        self.alive.store(false, Ordering::SeqCst);
        let pending: Vec<_> = self.pending.lock().unwrap().drain().collect();
        for (_, sender) in pending {
            let _ = sender.send(Err(McpError::Closed));
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Await a registered response with the transport's request timeout.
async fn await_response(
    demux: &Demux,
    id: i64,
    rx: oneshot::Receiver<Result<Value, McpError>>,
    timeout: Duration,
) -> Result<Value, McpError> {
    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => Err(McpError::Closed),
        Err(_) => {
            demux.forget(id);
            Err(McpError::Timeout(timeout))
        }
    }
}

// ─── stdio ────────────────────────────────────────────────────────────────────

/// Subprocess transport: newline-delimited JSON-RPC on stdin/stdout.
pub struct StdioTransport {
    demux: Arc<Demux>,
    stdin: tokio::sync::Mutex<ChildStdin>,
    child: Mutex<Option<Child>>,
    request_timeout: Duration,
    notif_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, Value)>>>,
}

impl StdioTransport {
    pub async fn spawn(
        command: &str,
        args: &[String],
        request_timeout: Duration,
    ) -> Result<Self, McpError> {
        let mut child = Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            // The spawner owns the subprocess; killing on drop prevents
            // orphans when the transport is discarded without close().
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| McpError::Connect(format!("spawn {command}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| McpError::Connect("child stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| McpError::Connect("child stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| McpError::Connect("child stderr unavailable".into()))?;

        let (demux, notif_rx) = Demux::new();

        let reader_demux = demux.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) if !line.trim().is_empty() => {
                        reader_demux.dispatch_text(&line)
                    }
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        warn!("mcp stdout read error: {e}");
                        break;
                    }
                }
            }
            reader_demux.shutdown();
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(target: "mcp_child", "{line}");
            }
        });

        Ok(Self {
            demux,
            stdin: tokio::sync::Mutex::new(stdin),
            child: Mutex::new(Some(child)),
            request_timeout,
            notif_rx: Mutex::new(Some(notif_rx)),
        })
    }

    async fn write_frame(&self, frame: &JsonRpcRequest) -> Result<(), McpError> {
        if !self.demux.is_alive() {
            return Err(McpError::Closed);
        }
        let mut line = serde_json::to_string(frame)
            .map_err(|e| McpError::Protocol(format!("serialize: {e}")))?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(line.as_bytes()).await.map_err(|e| {
            self.demux.shutdown();
            McpError::Request(format!("stdin write: {e}"))
        })?;
        stdin.flush().await.map_err(|e| {
            self.demux.shutdown();
            McpError::Request(format!("stdin flush: {e}"))
        })
    }
}

#[async_trait]
impl McpTransport for StdioTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let (id, rx) = self.demux.register();
        let frame = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.write_frame(&frame).await {
            self.demux.forget(id);
            return Err(e);
        }
        await_response(&self.demux, id, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_frame(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn close(&self) {
        self.demux.shutdown();
        if let Some(mut child) = self.child.lock().unwrap().take() {
            let _ = child.start_kill();
        }
    }

    fn is_alive(&self) -> bool {
        self.demux.is_alive()
    }

    fn notifications(&self) -> Option<mpsc::UnboundedReceiver<(String, Value)>> {
        self.notif_rx.lock().unwrap().take()
    }
}

// ─── WebSocket ────────────────────────────────────────────────────────────────

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// WebSocket transport with heartbeat supervision.
pub struct WebSocketTransport {
    demux: Arc<Demux>,
    writer: Arc<tokio::sync::Mutex<WsSink>>,
    request_timeout: Duration,
    notif_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, Value)>>>,
}

impl WebSocketTransport {
    pub async fn connect(
        url: &str,
        request_timeout: Duration,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Result<Self, McpError> {
        let (stream, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| McpError::Connect(format!("{url}: {e}")))?;
        let (sink, mut source) = stream.split();
        let writer = Arc::new(tokio::sync::Mutex::new(sink));

        let (demux, notif_rx) = Demux::new();
        let last_activity = Arc::new(Mutex::new(Instant::now()));

        let reader_demux = demux.clone();
        let reader_writer = writer.clone();
        let reader_activity = last_activity.clone();
        tokio::spawn(async move {
            while let Some(msg) = source.next().await {
                *reader_activity.lock().unwrap() = Instant::now();
                match msg {
                    Ok(WsMessage::Text(text)) => reader_demux.dispatch_text(&text),
                    Ok(WsMessage::Ping(data)) => {
                        let _ = reader_writer.lock().await.send(WsMessage::Pong(data)).await;
                    }
                    Ok(WsMessage::Pong(_)) => {}
                    Ok(WsMessage::Close(_)) => break,
                    Ok(_) => {} // binary frames ignored
                    Err(e) => {
                        warn!("websocket read error: {e}");
                        break;
                    }
                }
            }
            reader_demux.shutdown();
        });

        let hb_demux = demux.clone();
        let hb_writer = writer.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(heartbeat_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if !hb_demux.is_alive() {
                    break;
                }
                let idle = last_activity.lock().unwrap().elapsed();
                if idle > heartbeat_timeout {
                    warn!("websocket heartbeat timed out after {idle:?}");
                    hb_demux.shutdown();
                    let _ = hb_writer.lock().await.close().await;
                    break;
                }
                if hb_writer
                    .lock()
                    .await
                    .send(WsMessage::Ping(Vec::new()))
                    .await
                    .is_err()
                {
                    hb_demux.shutdown();
                    break;
                }
            }
        });

        Ok(Self {
            demux,
            writer,
            request_timeout,
            notif_rx: Mutex::new(Some(notif_rx)),
        })
    }

    async fn write_frame(&self, frame: &JsonRpcRequest) -> Result<(), McpError> {
        if !self.demux.is_alive() {
            return Err(McpError::Closed);
        }
        let text = serde_json::to_string(frame)
            .map_err(|e| McpError::Protocol(format!("serialize: {e}")))?;
        self.writer
            .lock()
            .await
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| {
                self.demux.shutdown();
                McpError::Request(format!("websocket send: {e}"))
            })
    }
}

#[async_trait]
impl McpTransport for WebSocketTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let (id, rx) = self.demux.register();
        let frame = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.write_frame(&frame).await {
            self.demux.forget(id);
            return Err(e);
        }
        await_response(&self.demux, id, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.write_frame(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn close(&self) {
        self.demux.shutdown();
        let _ = self.writer.lock().await.close().await;
    }

    fn is_alive(&self) -> bool {
        self.demux.is_alive()
    }

    fn notifications(&self) -> Option<mpsc::UnboundedReceiver<(String, Value)>> {
        self.notif_rx.lock().unwrap().take()
    }
}

// ─── SSE ──────────────────────────────────────────────────────────────────────

/// Header carrying the connection id that pairs the POST endpoint with the
/// event stream.
pub const SSE_CONNECTION_ID_HEADER: &str = "x-connection-id";

/// SSE transport: responses and notifications arrive on an event stream;
/// requests are POSTed to a sibling endpoint.
pub struct SseTransport {
    demux: Arc<Demux>,
    client: reqwest::Client,
    rpc_url: String,
    connection_id: String,
    request_timeout: Duration,
    notif_rx: Mutex<Option<mpsc::UnboundedReceiver<(String, Value)>>>,
}

impl SseTransport {
    /// `base_url` hosts `GET {base}/events` (the stream) and
    /// `POST {base}/rpc` (the request endpoint).
    pub async fn connect(base_url: &str, request_timeout: Duration) -> Result<Self, McpError> {
        let base = base_url.trim_end_matches('/');
        let events_url = format!("{base}/events");
        let rpc_url = format!("{base}/rpc");
        let connection_id = uuid::Uuid::new_v4().to_string();
        let client = reqwest::Client::new();

        let resp = client
            .get(&events_url)
            .header(SSE_CONNECTION_ID_HEADER, &connection_id)
            .send()
            .await
            .map_err(|e| McpError::Connect(format!("{events_url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(McpError::Connect(format!(
                "{events_url}: status {}",
                resp.status()
            )));
        }

        let (demux, notif_rx) = Demux::new();
        let stream_demux = demux.clone();
        tokio::spawn(async move {
            let mut byte_stream = resp.bytes_stream();
            let mut buf = String::new();
            while let Some(chunk) = byte_stream.next().await {
                let Ok(bytes) = chunk else { break };
                buf.push_str(&String::from_utf8_lossy(&bytes));
                while let Some(nl) = buf.find('\n') {
                    let line = buf[..nl].trim_end_matches('\r').to_string();
                    buf = buf[nl + 1..].to_string();
                    if let Some(data) = line.strip_prefix("data: ") {
                        if !data.trim().is_empty() {
                            stream_demux.dispatch_text(data.trim());
                        }
                    }
                }
            }
            stream_demux.shutdown();
        });

        Ok(Self {
            demux,
            client,
            rpc_url,
            connection_id,
            request_timeout,
            notif_rx: Mutex::new(Some(notif_rx)),
        })
    }

    async fn post_frame(&self, frame: &JsonRpcRequest) -> Result<(), McpError> {
        if !self.demux.is_alive() {
            return Err(McpError::Closed);
        }
        let resp = self
            .client
            .post(&self.rpc_url)
            .header(SSE_CONNECTION_ID_HEADER, &self.connection_id)
            .json(frame)
            .send()
            .await
            .map_err(|e| McpError::Request(format!("post: {e}")))?;
        if !resp.status().is_success() {
            return Err(McpError::Request(format!("post status {}", resp.status())));
        }
        // Some servers answer inline on the POST body instead of (or in
        // addition to) the stream; route it through the demux either way.
        if let Ok(text) = resp.text().await {
            if !text.trim().is_empty() {
                self.demux.dispatch_text(text.trim());
            }
        }
        Ok(())
    }
}

#[async_trait]
impl McpTransport for SseTransport {
    async fn request(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let (id, rx) = self.demux.register();
        let frame = JsonRpcRequest::new(id, method, params);
        if let Err(e) = self.post_frame(&frame).await {
            self.demux.forget(id);
            return Err(e);
        }
        await_response(&self.demux, id, rx, self.request_timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> Result<(), McpError> {
        self.post_frame(&JsonRpcRequest::notification(method, params))
            .await
    }

    async fn close(&self) {
        self.demux.shutdown();
    }

    fn is_alive(&self) -> bool {
        self.demux.is_alive()
    }

    fn notifications(&self) -> Option<mpsc::UnboundedReceiver<(String, Value)>> {
        self.notif_rx.lock().unwrap().take()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
