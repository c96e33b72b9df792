// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Session manager: owns process-wide services, one task per session, and
//! the observer wiring.
//!
//! Each session runs as its own task consuming a command channel, so turns
//! within one session serialize FIFO while sessions run in parallel.
//! Cancellation bypasses the command queue through a shared slot holding
//! the current turn's cancel sender; per-turn timeouts fire the same slot.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use anyhow::Context;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use troupe_agents::{AgentRegistry, PromptLoader};
use troupe_config::{Config, ObserverMode};
use troupe_core::{Session, SessionEvent, SessionServices};
use troupe_mail::Mailbox;
use troupe_mcp::ReconnectingClient;
use troupe_model::Message;
use troupe_observer::{AlertKind, Observer, ObserverAlert};
use troupe_tools::{register_builtin, PathPolicy, ToolRegistry};

use crate::rpc::notification_frame;

/// Directive injected into a stalled agent in active observer mode.
const STALL_DIRECTIVE: &str =
    "You appear to have stalled after a tool result. Review the last tool \
     output and continue with the task.";

pub enum SessionCommand {
    UserMessage { text: String },
    SwitchAgent {
        agent: String,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    /// Client-executed tool: record its result against the pending call.
    ProvideToolResult {
        tool_call_id: String,
        result: serde_json::Value,
        reply: oneshot::Sender<anyhow::Result<()>>,
    },
    History {
        reply: oneshot::Sender<Vec<Message>>,
    },
    Intervene { directive: String },
    Shutdown,
}

#[derive(Clone)]
pub struct SessionHandle {
    pub cmd_tx: mpsc::Sender<SessionCommand>,
    cancel_slot: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
    frame_tx: mpsc::Sender<String>,
}

impl SessionHandle {
    /// Fire the current turn's cancel signal, if a turn is running.
    pub fn cancel_current_turn(&self) -> bool {
        match self.cancel_slot.lock().unwrap().take() {
            Some(tx) => tx.send(()).is_ok(),
            None => false,
        }
    }
}

struct McpWsExposure {
    handle: tokio::task::JoinHandle<()>,
    port: u16,
    exposed: Vec<String>,
}

pub struct SessionManager {
    config: Arc<Config>,
    backend: Arc<dyn troupe_model::LLMBackend>,
    tools: Arc<ToolRegistry>,
    agents: Arc<AgentRegistry>,
    prompts: Arc<PromptLoader>,
    mailbox: Arc<Mailbox>,
    observer: Option<Arc<Observer>>,
    sessions: StdMutex<HashMap<String, SessionHandle>>,
    mcp_ws: StdMutex<Option<McpWsExposure>>,
    /// Keeps imported MCP server clients (and their subprocesses) alive.
    mcp_clients: StdMutex<Vec<Arc<ReconnectingClient>>>,
}

impl SessionManager {
    /// Build the process-wide services: tool registry with built-ins, the
    /// mailbox, the agent catalog, the backend, and the observer.
    pub fn new(config: Config) -> anyhow::Result<Arc<Self>> {
        let config = Arc::new(config);
        let policy = Arc::new(PathPolicy::new(
            &config.tools.workspace,
            &config.tools.output,
        ));
        let mailbox = Arc::new(Mailbox::with_warn_depth(
            config.mailbox.per_recipient_warn_depth,
        ));
        let tools = Arc::new(ToolRegistry::new());
        register_builtin(&tools, policy, mailbox.clone())
            .context("registering built-in tools")?;

        let backend = troupe_model::from_config(&config.backend)
            .context("initializing backend")?;
        let agents = Arc::new(AgentRegistry::standard());
        let prompts = Arc::new(PromptLoader::new(vec![std::path::PathBuf::from(".troupe")]));

        let (observer, alert_rx) = if config.observer.mode == ObserverMode::Disabled {
            (None, None)
        } else {
            let (alert_tx, alert_rx) = mpsc::unbounded_channel();
            (
                Some(Arc::new(Observer::new(config.observer.clone(), alert_tx))),
                Some(alert_rx),
            )
        };

        let manager = Arc::new(Self {
            config,
            backend,
            tools,
            agents,
            prompts,
            mailbox,
            observer,
            sessions: StdMutex::new(HashMap::new()),
            mcp_ws: StdMutex::new(None),
            mcp_clients: StdMutex::new(Vec::new()),
        });

        if let Some(alert_rx) = alert_rx {
            tokio::spawn(manager.clone().route_alerts(alert_rx));
            tokio::spawn(manager.clone().sweep_stalls());
        }
        Ok(manager)
    }

    /// Connect every configured external MCP server and import its tools.
    /// Failures are logged, not fatal — a dead server at boot should not
    /// take the gateway down.
    pub async fn connect_configured_mcp_servers(&self) {
        for (name, server_cfg) in &self.config.mcp_servers {
            match troupe_mcp::connect_and_import(&self.tools, name, server_cfg).await {
                Ok((client, imported)) => {
                    info!(server = %name, imported, "mcp server connected");
                    self.mcp_clients.lock().unwrap().push(client);
                }
                Err(e) => warn!(server = %name, "mcp server connect failed: {e}"),
            }
        }
    }

    fn services(&self) -> SessionServices {
        SessionServices {
            backend: self.backend.clone(),
            tools: self.tools.clone(),
            agents: self.agents.clone(),
            prompts: self.prompts.clone(),
            mailbox: self.mailbox.clone(),
            observer: self.observer.clone(),
            result_byte_cap: self.config.tools.result_byte_cap,
        }
    }

    /// Create a session bound to a client's outbound frame channel.
    /// Returns the session id.
    pub fn start_session(&self, frame_tx: mpsc::Sender<String>) -> String {
        let mut session = Session::new(self.services());
        let session_id = session.id.clone();

        let (events_tx, mut events_rx) = mpsc::channel::<SessionEvent>(64);
        session.attach_events(events_tx);

        // Forward session events to the client as notifications.  The frame
        // channel is bounded; when the client cannot keep up, chunks drop.
        let forward_frames = frame_tx.clone();
        let forward_session = session_id.clone();
        tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                let frame = event_to_frame(&forward_session, event);
                let _ = forward_frames.try_send(frame);
            }
        });

        let (cmd_tx, cmd_rx) = mpsc::channel::<SessionCommand>(32);
        let cancel_slot: Arc<StdMutex<Option<oneshot::Sender<()>>>> =
            Arc::new(StdMutex::new(None));
        let turn_timeout = Duration::from_secs(self.config.gateway.turn_timeout_secs);

        tokio::spawn(run_session_task(
            session,
            cmd_rx,
            cancel_slot.clone(),
            turn_timeout,
        ));

        self.sessions.lock().unwrap().insert(
            session_id.clone(),
            SessionHandle {
                cmd_tx,
                cancel_slot,
                frame_tx,
            },
        );
        info!(session_id = %session_id, "session started");
        session_id
    }

    pub fn handle(&self, session_id: &str) -> Option<SessionHandle> {
        self.sessions.lock().unwrap().get(session_id).cloned()
    }

    /// Destroy a session.  The shutdown command queues behind any in-flight
    /// turn, so disconnecting mid-turn still lets the turn complete and
    /// update history silently.
    pub fn end_session(&self, session_id: &str) {
        if let Some(handle) = self.sessions.lock().unwrap().remove(session_id) {
            let _ = handle.cmd_tx.try_send(SessionCommand::Shutdown);
        }
        if let Some(observer) = &self.observer {
            observer.forget_session(session_id);
        }
        debug!(session_id, "session ended");
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn reconnect_grace_secs(&self) -> u64 {
        self.config.gateway.reconnect_grace_secs
    }

    pub fn bind_address(&self) -> &str {
        &self.config.gateway.bind
    }

    pub fn observer(&self) -> Option<&Arc<Observer>> {
        self.observer.as_ref()
    }

    pub fn health(&self) -> serde_json::Value {
        let mut health = self
            .observer
            .as_ref()
            .map(|o| o.health())
            .unwrap_or_else(|| json!({ "status": "ok", "observer_mode": "disabled" }));
        health["sessions"] = json!(self.session_count());
        health["tools_registered"] = json!(self.tools.len());
        health
    }

    pub fn metrics(&self) -> serde_json::Value {
        self.observer
            .as_ref()
            .map(|o| o.metrics())
            .unwrap_or_else(|| json!({ "observer": "disabled" }))
    }

    // ── MCP exposure (mcp.start / mcp.stop / mcp.status) ─────────────────────

    pub async fn mcp_start(
        &self,
        transport: &str,
        port: u16,
        exposed: Vec<String>,
    ) -> anyhow::Result<u16> {
        match transport {
            "websocket" | "ws" => {}
            "stdio" => anyhow::bail!(
                "stdio exposure runs as its own process: use `troupe mcp serve`"
            ),
            other => anyhow::bail!("unsupported mcp transport: {other}"),
        }
        if self.mcp_ws.lock().unwrap().is_some() {
            anyhow::bail!("mcp server already running; stop it first");
        }
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("binding mcp listener")?;
        let actual_port = listener.local_addr()?.port();

        let registry = self.tools.clone();
        let exposed_set = if exposed.is_empty() {
            None
        } else {
            Some(exposed.iter().cloned().collect())
        };
        let handle = tokio::spawn(async move {
            if let Err(e) = troupe_mcp::serve_ws(listener, registry, exposed_set).await {
                warn!("mcp ws server exited: {e:#}");
            }
        });
        *self.mcp_ws.lock().unwrap() = Some(McpWsExposure {
            handle,
            port: actual_port,
            exposed,
        });
        info!(port = actual_port, "mcp ws server started");
        Ok(actual_port)
    }

    pub fn mcp_stop(&self) -> bool {
        match self.mcp_ws.lock().unwrap().take() {
            Some(exposure) => {
                exposure.handle.abort();
                info!(port = exposure.port, "mcp ws server stopped");
                true
            }
            None => false,
        }
    }

    pub fn mcp_status(&self) -> serde_json::Value {
        match self.mcp_ws.lock().unwrap().as_ref() {
            Some(exposure) => json!({
                "running": true,
                "transport": "websocket",
                "port": exposure.port,
                "exposed_tools": exposure.exposed,
            }),
            None => json!({ "running": false }),
        }
    }

    // ── Observer wiring ───────────────────────────────────────────────────────

    /// Forward observer alerts to the owning session's client; in active
    /// mode, spend an intervention on stalls.
    async fn route_alerts(
        self: Arc<Self>,
        mut alert_rx: mpsc::UnboundedReceiver<ObserverAlert>,
    ) {
        while let Some(alert) = alert_rx.recv().await {
            let handle = self.handle(&alert.session_id);
            if let Some(handle) = &handle {
                let frame = notification_frame(
                    "observer.alert",
                    serde_json::to_value(&alert).unwrap_or(json!({})),
                );
                let _ = handle.frame_tx.try_send(frame);
            }
            if alert.kind == AlertKind::SessionStall {
                if let (Some(observer), Some(handle)) = (&self.observer, handle) {
                    if observer.try_intervene(&alert.session_id) {
                        let _ = handle.cmd_tx.try_send(SessionCommand::Intervene {
                            directive: STALL_DIRECTIVE.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn sweep_stalls(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            ticker.tick().await;
            if let Some(observer) = &self.observer {
                observer.check_stalls();
            }
        }
    }
}

/// Per-session task: commands drain FIFO, so one turn at a time.
async fn run_session_task(
    mut session: Session,
    mut cmd_rx: mpsc::Receiver<SessionCommand>,
    cancel_slot: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
    turn_timeout: Duration,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            SessionCommand::UserMessage { text } => {
                run_one_turn(&mut session, &text, &cancel_slot, turn_timeout).await;
            }
            SessionCommand::SwitchAgent { agent, reply } => {
                let _ = reply.send(session.switch_agent(&agent).map(|_| ()));
            }
            SessionCommand::ProvideToolResult {
                tool_call_id,
                result,
                reply,
            } => {
                let _ = reply.send(session.provide_tool_result(&tool_call_id, result));
            }
            SessionCommand::History { reply } => {
                let _ = reply.send(session.active_history().to_vec());
            }
            SessionCommand::Intervene { directive } => {
                if let Err(e) = session.run_intervention(&directive).await {
                    warn!(session_id = %session.id, "intervention failed: {e:#}");
                }
            }
            SessionCommand::Shutdown => break,
        }
    }
    debug!(session_id = %session.id, "session task finished");
}

async fn run_one_turn(
    session: &mut Session,
    text: &str,
    cancel_slot: &Arc<StdMutex<Option<oneshot::Sender<()>>>>,
    turn_timeout: Duration,
) {
    let (cancel_tx, mut cancel_rx) = oneshot::channel();
    *cancel_slot.lock().unwrap() = Some(cancel_tx);

    // The timeout fires the same cancel slot a client cancel would, so the
    // turn sees one uniform cooperative-cancellation path.
    let timer_slot = cancel_slot.clone();
    let timer = tokio::spawn(async move {
        tokio::time::sleep(turn_timeout).await;
        if let Some(tx) = timer_slot.lock().unwrap().take() {
            warn!("turn timed out; cancelling");
            let _ = tx.send(());
        }
    });

    if let Err(e) = session
        .handle_user_message_with_cancel(text, &mut cancel_rx)
        .await
    {
        warn!(session_id = %session.id, "turn failed: {e:#}");
    }

    timer.abort();
    cancel_slot.lock().unwrap().take();
}

/// Map a session event onto the client notification protocol.
fn event_to_frame(session_id: &str, event: SessionEvent) -> String {
    match event {
        SessionEvent::TurnStarted { agent_id } => notification_frame(
            "turn.started",
            json!({ "sessionId": session_id, "agentId": agent_id }),
        ),
        SessionEvent::AssistantDelta { agent_id, text } => notification_frame(
            "assistant.delta",
            json!({ "sessionId": session_id, "agentId": agent_id, "text": text }),
        ),
        SessionEvent::ReasoningDelta { agent_id, text } => notification_frame(
            "assistant.reasoning",
            json!({ "sessionId": session_id, "agentId": agent_id, "text": text }),
        ),
        SessionEvent::ToolCallStarted { agent_id, call } => notification_frame(
            "assistant.toolCall",
            json!({
                "sessionId": session_id,
                "agentId": agent_id,
                "callId": call.id,
                "name": call.name,
                "arguments": call.arguments,
            }),
        ),
        SessionEvent::ToolCallFinished {
            agent_id,
            call_id,
            tool_name,
            result,
            is_error,
        } => notification_frame(
            "assistant.toolResult",
            json!({
                "sessionId": session_id,
                "agentId": agent_id,
                "callId": call_id,
                "name": tool_name,
                "result": result,
                "isError": is_error,
            }),
        ),
        SessionEvent::AssistantComplete {
            agent_id,
            text,
            usage,
        } => notification_frame(
            "assistant.complete",
            json!({
                "sessionId": session_id,
                "agentId": agent_id,
                "text": text,
                "usage": usage,
            }),
        ),
        SessionEvent::AgentSwitched { from, to } => notification_frame(
            "agent.switched",
            json!({ "sessionId": session_id, "from": from, "to": to }),
        ),
        SessionEvent::TurnComplete { agent_id, text } => notification_frame(
            "turn.complete",
            json!({ "sessionId": session_id, "agentId": agent_id, "text": text }),
        ),
        SessionEvent::Error { agent_id, message } => notification_frame(
            "session.error",
            json!({ "sessionId": session_id, "agentId": agent_id, "message": message }),
        ),
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
