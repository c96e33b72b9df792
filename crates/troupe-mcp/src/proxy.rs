// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Persistent caching proxy: a long-lived stdio MCP server that hosts a
//! child MCP server as a subprocess.
//!
//! `initialize` and `tools/list` responses are cached, so clients keep
//! seeing tool definitions while the child is down.  When the child exits,
//! the proxy stays alive and a supervisor respawns the child after a
//! delay, replaying the cached initialize handshake so the new child is
//! immediately usable.  The proxy supervises only the child — it never
//! restarts the host side.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::error::McpError;
use crate::jsonrpc::{JsonRpcRequest, JsonRpcResponse};
use crate::transport::{McpTransport, StdioTransport};

pub type TransportFactory = Box<
    dyn Fn() -> Pin<Box<dyn Future<Output = Result<Arc<dyn McpTransport>, McpError>> + Send>>
        + Send
        + Sync,
>;

/// Build a factory that spawns the child over stdio.
pub fn stdio_child_factory(
    command: String,
    args: Vec<String>,
    request_timeout: Duration,
) -> TransportFactory {
    Box::new(move || {
        let command = command.clone();
        let args = args.clone();
        Box::pin(async move {
            let transport = StdioTransport::spawn(&command, &args, request_timeout).await?;
            Ok(Arc::new(transport) as Arc<dyn McpTransport>)
        })
    })
}

pub struct PersistentProxy {
    factory: TransportFactory,
    restart_delay: Duration,
    child: tokio::sync::Mutex<Option<Arc<dyn McpTransport>>>,
    /// The host's initialize params, replayed to every respawned child.
    init_params: Mutex<Option<Value>>,
    cached_initialize: Mutex<Option<Value>>,
    cached_tools: Mutex<Option<Value>>,
    stopped: AtomicBool,
}

impl PersistentProxy {
    pub fn new(factory: TransportFactory, restart_delay: Duration) -> Self {
        Self {
            factory,
            restart_delay,
            child: tokio::sync::Mutex::new(None),
            init_params: Mutex::new(None),
            cached_initialize: Mutex::new(None),
            cached_tools: Mutex::new(None),
            stopped: AtomicBool::new(false),
        }
    }

    /// Launch the initial child.
    pub async fn start(&self) -> Result<(), McpError> {
        let child = (self.factory)().await?;
        *self.child.lock().await = Some(child);
        info!("proxy child launched");
        Ok(())
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    /// Cached `tools/list` result, if any.
    pub fn cached_tools(&self) -> Option<Value> {
        self.cached_tools.lock().unwrap().clone()
    }

    /// Handle one frame from the host.  Returns `None` for notifications.
    pub async fn handle(&self, req: JsonRpcRequest) -> Option<JsonRpcResponse> {
        if req.is_notification() {
            if let Some(child) = self.live_child().await {
                let _ = child.notify(&req.method, req.params).await;
            }
            return None;
        }
        let id = req.id.clone().unwrap_or(Value::Null);

        match req.method.as_str() {
            "initialize" => {
                *self.init_params.lock().unwrap() = Some(req.params.clone());
                match self.forward(&req.method, req.params).await {
                    Ok(result) => {
                        *self.cached_initialize.lock().unwrap() = Some(result.clone());
                        Some(JsonRpcResponse::success(id, result))
                    }
                    Err(e) => {
                        if let Some(cached) = self.cached_initialize.lock().unwrap().clone() {
                            debug!("serving initialize from cache: {e}");
                            Some(JsonRpcResponse::success(id, cached))
                        } else {
                            Some(JsonRpcResponse::failure(id, -32000, e.to_string()))
                        }
                    }
                }
            }
            "tools/list" => match self.forward(&req.method, req.params).await {
                Ok(result) => {
                    *self.cached_tools.lock().unwrap() = Some(result.clone());
                    Some(JsonRpcResponse::success(id, result))
                }
                Err(e) => {
                    if let Some(cached) = self.cached_tools.lock().unwrap().clone() {
                        debug!("serving tools/list from cache: {e}");
                        Some(JsonRpcResponse::success(id, cached))
                    } else {
                        Some(JsonRpcResponse::failure(id, -32000, e.to_string()))
                    }
                }
            },
            _ => match self.forward(&req.method, req.params).await {
                Ok(result) => Some(JsonRpcResponse::success(id, result)),
                Err(e) => Some(JsonRpcResponse::failure(
                    id,
                    -32000,
                    format!("child unavailable: {e}"),
                )),
            },
        }
    }

    async fn live_child(&self) -> Option<Arc<dyn McpTransport>> {
        let guard = self.child.lock().await;
        guard.as_ref().filter(|c| c.is_alive()).cloned()
    }

    async fn forward(&self, method: &str, params: Value) -> Result<Value, McpError> {
        let child = self.live_child().await.ok_or(McpError::Closed)?;
        child.request(method, params).await
    }

    /// Respawn the child if it has exited.  Replays the cached initialize
    /// handshake and refreshes the tools cache.  Returns true when a new
    /// child was spawned.
    pub async fn respawn_if_dead(&self) -> bool {
        {
            let guard = self.child.lock().await;
            match guard.as_ref() {
                Some(c) if c.is_alive() => return false,
                None => return false, // never started
                _ => {}
            }
        }
        warn!("proxy child exited; respawning");
        let new_child = match (self.factory)().await {
            Ok(c) => c,
            Err(e) => {
                warn!("child respawn failed: {e}");
                return false;
            }
        };

        // Replay the handshake so the new child accepts requests, then
        // refresh the caches from it.
        let init_params = self
            .init_params
            .lock()
            .unwrap()
            .clone()
            .unwrap_or_else(|| {
                json!({
                    "protocolVersion": crate::client::PROTOCOL_VERSION,
                    "clientInfo": { "name": "troupe-proxy", "version": env!("CARGO_PKG_VERSION") },
                    "capabilities": {},
                })
            });
        match new_child.request("initialize", init_params).await {
            Ok(result) => {
                *self.cached_initialize.lock().unwrap() = Some(result);
                let _ = new_child.notify("notifications/initialized", json!({})).await;
            }
            Err(e) => warn!("respawned child initialize failed: {e}"),
        }
        if let Ok(tools) = new_child.request("tools/list", json!({})).await {
            *self.cached_tools.lock().unwrap() = Some(tools);
        }

        *self.child.lock().await = Some(new_child);
        info!("proxy child respawned");
        true
    }

    /// Background supervisor: checks the child every restart delay and
    /// respawns it when dead.  Runs until [`stop`](Self::stop).
    pub async fn supervise(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.restart_delay).await;
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }
            self.respawn_if_dead().await;
        }
    }

    /// Serve the proxy on the host's stdin/stdout (newline-delimited
    /// JSON-RPC).  Blocks until stdin EOF.
    pub async fn run_stdio(self: Arc<Self>) -> anyhow::Result<()> {
        let supervisor = tokio::spawn(self.clone().supervise());

        let stdin = tokio::io::stdin();
        let mut stdout = tokio::io::stdout();
        let mut lines = BufReader::new(stdin).lines();
        while let Some(line) = lines.next_line().await? {
            if line.trim().is_empty() {
                continue;
            }
            let req: JsonRpcRequest = match serde_json::from_str(&line) {
                Ok(r) => r,
                Err(e) => {
                    warn!("unparseable frame from host: {e}");
                    continue;
                }
            };
            if let Some(resp) = self.handle(req).await {
                let mut out = serde_json::to_string(&resp)?;
                out.push('\n');
                stdout.write_all(out.as_bytes()).await?;
                stdout.flush().await?;
            }
        }

        self.stop();
        supervisor.abort();
        if let Some(child) = self.child.lock().await.take() {
            child.close().await;
        }
        Ok(())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use tokio::sync::mpsc;

    use super::*;

    /// A scripted child: answers initialize/tools/list/tools/call until
    /// killed via the shared flag.
    struct FakeChild {
        alive: Arc<AtomicBool>,
        tools: Vec<&'static str>,
    }

    #[async_trait]
    impl McpTransport for FakeChild {
        async fn request(&self, method: &str, _params: Value) -> Result<Value, McpError> {
            if !self.is_alive() {
                return Err(McpError::Closed);
            }
            match method {
                "initialize" => Ok(json!({ "capabilities": { "tools": {} } })),
                "tools/list" => Ok(json!({
                    "tools": self.tools.iter().map(|t| json!({
                        "name": t,
                        "description": "",
                        "inputSchema": { "type": "object" },
                    })).collect::<Vec<_>>(),
                })),
                "tools/call" => Ok(json!({ "content": [
                    { "type": "text", "text": "called" }
                ]})),
                other => Err(McpError::Remote {
                    code: -32601,
                    message: format!("unknown method {other}"),
                }),
            }
        }
        async fn notify(&self, _m: &str, _p: Value) -> Result<(), McpError> {
            Ok(())
        }
        async fn close(&self) {
            self.alive.store(false, Ordering::SeqCst);
        }
        fn is_alive(&self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        fn notifications(&self) -> Option<mpsc::UnboundedReceiver<(String, Value)>> {
            None
        }
    }

    struct Harness {
        proxy: Arc<PersistentProxy>,
        /// Kill switch for the currently live child.
        current_child: Arc<Mutex<Arc<AtomicBool>>>,
        spawn_count: Arc<AtomicUsize>,
    }

    fn harness(tools: Vec<&'static str>) -> Harness {
        let current_child = Arc::new(Mutex::new(Arc::new(AtomicBool::new(true))));
        let spawn_count = Arc::new(AtomicUsize::new(0));

        let slot = current_child.clone();
        let counter = spawn_count.clone();
        let factory: TransportFactory = Box::new(move || {
            let alive = Arc::new(AtomicBool::new(true));
            *slot.lock().unwrap() = alive.clone();
            counter.fetch_add(1, Ordering::SeqCst);
            let tools = tools.clone();
            Box::pin(async move {
                Ok(Arc::new(FakeChild { alive, tools }) as Arc<dyn McpTransport>)
            })
        });

        Harness {
            proxy: Arc::new(PersistentProxy::new(factory, Duration::from_millis(10))),
            current_child,
            spawn_count,
        }
    }

    fn kill_child(h: &Harness) {
        h.current_child
            .lock()
            .unwrap()
            .store(false, Ordering::SeqCst);
    }

    async fn send(proxy: &PersistentProxy, id: i64, method: &str) -> JsonRpcResponse {
        proxy
            .handle(JsonRpcRequest::new(id, method, json!({})))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn initialize_and_tools_list_are_cached() {
        let h = harness(vec!["alpha", "beta"]);
        h.proxy.start().await.unwrap();

        let init = send(&h.proxy, 1, "initialize").await;
        assert!(init.result.is_some());
        let tools = send(&h.proxy, 2, "tools/list").await;
        let names: Vec<&str> = tools.result.as_ref().unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
        assert!(h.proxy.cached_tools().is_some());
    }

    #[tokio::test]
    async fn cached_tools_served_while_child_is_down() {
        let h = harness(vec!["alpha", "beta"]);
        h.proxy.start().await.unwrap();
        send(&h.proxy, 1, "initialize").await;
        send(&h.proxy, 2, "tools/list").await;

        kill_child(&h);

        // The child is dead, but tools/list still answers from cache.
        let tools = send(&h.proxy, 3, "tools/list").await;
        assert!(tools.error.is_none());
        let names: Vec<&str> = tools.result.unwrap()["tools"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn other_requests_error_while_child_is_down() {
        let h = harness(vec!["alpha"]);
        h.proxy.start().await.unwrap();
        kill_child(&h);
        let resp = send(&h.proxy, 1, "tools/call").await;
        assert_eq!(resp.error.unwrap().code, -32000);
    }

    #[tokio::test]
    async fn respawn_restores_end_to_end_calls() {
        let h = harness(vec!["alpha"]);
        h.proxy.start().await.unwrap();
        send(&h.proxy, 1, "initialize").await;
        send(&h.proxy, 2, "tools/list").await;

        kill_child(&h);
        assert!(h.proxy.respawn_if_dead().await);
        assert_eq!(h.spawn_count.load(Ordering::SeqCst), 2);

        // New child answers tools/call end-to-end, and the cache survived.
        let call = send(&h.proxy, 3, "tools/call").await;
        assert!(call.error.is_none());
        assert!(h.proxy.cached_tools().is_some());
    }

    #[tokio::test]
    async fn respawn_is_noop_while_child_lives() {
        let h = harness(vec!["alpha"]);
        h.proxy.start().await.unwrap();
        assert!(!h.proxy.respawn_if_dead().await);
        assert_eq!(h.spawn_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn supervisor_respawns_after_restart_delay() {
        let h = harness(vec!["alpha"]);
        h.proxy.start().await.unwrap();
        send(&h.proxy, 1, "initialize").await;
        send(&h.proxy, 2, "tools/list").await;

        let supervisor = tokio::spawn(h.proxy.clone().supervise());
        kill_child(&h);

        // Within restart_delay * 2 the child must be back.
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(h.spawn_count.load(Ordering::SeqCst) >= 2);
        let call = send(&h.proxy, 3, "tools/call").await;
        assert!(call.error.is_none());

        h.proxy.stop();
        supervisor.abort();
    }

    #[tokio::test]
    async fn notifications_are_forwarded_without_response() {
        let h = harness(vec!["alpha"]);
        h.proxy.start().await.unwrap();
        let resp = h
            .proxy
            .handle(JsonRpcRequest::notification("notifications/initialized", json!({})))
            .await;
        assert!(resp.is_none());
    }
}
