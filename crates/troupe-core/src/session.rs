// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Per-client session: a lazy set of agent runtimes, the active agent id,
//! and the turn loop that drives backend streaming, tool execution, and
//! continuation.
//!
//! One turn executes at a time per session — callers serialize submissions
//! (the gateway queues them FIFO), which keeps history updates single-writer.
//! The event sink is nullable: a detached client drops chunks but the turn
//! still completes and updates history.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use async_recursion::async_recursion;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};
use uuid::Uuid;

use serde_json::Value;
use troupe_agents::{AgentRegistry, PromptLoader};
use troupe_mail::Mailbox;
use troupe_model::{LLMBackend, Message, ResponseEvent, Role, Usage};
use troupe_observer::{Observer, ObserverEvent};
use troupe_tools::{truncate_result, InvocationContext, ToolCall, ToolOutput, ToolRegistry};

use crate::continuation::ContinuationController;
use crate::events::SessionEvent;
use crate::runtime::{AgentRuntime, FinishedCall, ToolCallAccumulator};

/// Text recorded when the backend returns a fully empty response, so the
/// history never shows two consecutive user messages.
pub const EMPTY_RESPONSE_PLACEHOLDER: &str = "response unavailable";

/// Shared process-wide services injected into every session.
#[derive(Clone)]
pub struct SessionServices {
    pub backend: Arc<dyn LLMBackend>,
    pub tools: Arc<ToolRegistry>,
    pub agents: Arc<AgentRegistry>,
    pub prompts: Arc<PromptLoader>,
    pub mailbox: Arc<Mailbox>,
    pub observer: Option<Arc<Observer>>,
    /// Byte cap applied to tool results before they enter history.
    pub result_byte_cap: usize,
}

/// Outcome of one streamed backend call.
enum StreamOutcome {
    Complete {
        text: String,
        reasoning: Option<String>,
        calls: Vec<FinishedCall>,
        usage: Option<Usage>,
    },
    Cancelled {
        text: String,
        reasoning: Option<String>,
    },
}

pub struct Session {
    pub id: String,
    services: SessionServices,
    runtimes: HashMap<String, AgentRuntime>,
    active_agent_id: String,
    introduced: HashSet<String>,
    events: Option<mpsc::Sender<SessionEvent>>,
    /// Depth of nested synchronous handoffs in the current turn.
    pub(crate) handoff_depth: u32,
}

impl Session {
    pub fn new(services: SessionServices) -> Self {
        let active = services.agents.default_agent().id.clone();
        Self {
            id: Uuid::new_v4().to_string(),
            services,
            runtimes: HashMap::new(),
            active_agent_id: active,
            introduced: HashSet::new(),
            events: None,
            handoff_depth: 0,
        }
    }

    pub fn active_agent_id(&self) -> &str {
        &self.active_agent_id
    }

    /// Attach the client event sink.  A bounded channel is expected; full or
    /// closed channels drop chunks rather than blocking the turn.
    pub fn attach_events(&mut self, tx: mpsc::Sender<SessionEvent>) {
        self.events = Some(tx);
    }

    /// Detach on client disconnect.  In-flight turns complete silently.
    pub fn detach_events(&mut self) {
        self.events = None;
    }

    pub fn runtime(&self, agent_id: &str) -> Option<&AgentRuntime> {
        self.runtimes.get(agent_id)
    }

    /// Conversation history of the active agent.
    pub fn active_history(&self) -> &[Message] {
        self.runtimes
            .get(&self.active_agent_id)
            .map(|r| r.history.as_slice())
            .unwrap_or(&[])
    }

    /// Total approximate token footprint across all runtimes.
    pub fn context_tokens(&self) -> usize {
        self.runtimes.values().map(|r| r.token_count).sum()
    }

    /// Agents that have been activated at least once in this session.
    pub fn introduced_agents(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.introduced.iter().cloned().collect();
        ids.sort();
        ids
    }

    /// Switch the active agent.  Returns true when this activated the agent
    /// for the first time in this session.
    pub fn switch_agent(&mut self, id_or_name: &str) -> anyhow::Result<bool> {
        let descriptor = self
            .services
            .agents
            .resolve(id_or_name)
            .with_context(|| format!("unknown agent: {id_or_name}"))?
            .clone();
        let first_time = self.ensure_runtime(&descriptor.id)?;
        if self.active_agent_id != descriptor.id {
            let from = std::mem::replace(&mut self.active_agent_id, descriptor.id.clone());
            self.emit(SessionEvent::AgentSwitched {
                from,
                to: descriptor.id,
            });
            self.observe(ObserverEvent::AgentSwitched);
        }
        Ok(first_time)
    }

    /// Lazily construct the runtime for an agent.  Returns true when it was
    /// created by this call.
    pub(crate) fn ensure_runtime(&mut self, agent_id: &str) -> anyhow::Result<bool> {
        if self.runtimes.contains_key(agent_id) {
            return Ok(false);
        }
        let descriptor = self
            .services
            .agents
            .get(agent_id)
            .with_context(|| format!("unknown agent id: {agent_id}"))?
            .clone();
        let runtime = AgentRuntime::new(
            descriptor,
            &self.services.tools,
            &self.services.prompts,
            &self.services.agents,
        )?;
        self.runtimes.insert(agent_id.to_string(), runtime);
        self.introduced.insert(agent_id.to_string());
        debug!(session_id = %self.id, agent_id, "agent runtime created");
        Ok(true)
    }

    /// Pre-load conversation history into an agent runtime without running
    /// a turn.  Used when a client restores a prior transcript.  System
    /// messages are stripped — the runtime's own system prompt is prepended
    /// on every request anyway.
    pub fn seed_history(&mut self, agent_id: &str, messages: Vec<Message>) -> anyhow::Result<()> {
        self.ensure_runtime(agent_id)?;
        let runtime = self.runtimes.get_mut(agent_id).unwrap();
        for msg in messages.into_iter().filter(|m| m.role != Role::System) {
            runtime.push(msg);
        }
        Ok(())
    }

    /// Record a client-supplied result for a tool call the server did not
    /// execute itself (the `session.provideToolResult` path).
    ///
    /// Only a known, still-unanswered call id is accepted — anything else
    /// would break the call/result pairing in history.
    pub fn provide_tool_result(
        &mut self,
        tool_call_id: &str,
        result: Value,
    ) -> anyhow::Result<()> {
        let agent_id = self.active_agent_id.clone();
        self.ensure_runtime(&agent_id)?;
        let runtime = self.runtimes.get_mut(&agent_id).unwrap();

        let tool_name = runtime
            .history
            .iter()
            .flat_map(|m| m.tool_calls.iter())
            .find(|c| c.id == tool_call_id)
            .map(|c| c.name.clone())
            .with_context(|| format!("unknown tool call id: {tool_call_id}"))?;
        let already_answered = runtime
            .history
            .iter()
            .any(|m| m.tool_call_id.as_deref() == Some(tool_call_id));
        if already_answered {
            anyhow::bail!("tool call {tool_call_id} already has a result");
        }

        let is_error = result.get("success") == Some(&Value::Bool(false));
        runtime.handle_tool_result(tool_call_id, result.clone());
        self.emit(SessionEvent::ToolCallFinished {
            agent_id,
            call_id: tool_call_id.to_string(),
            tool_name,
            result,
            is_error,
        });
        self.observe(ObserverEvent::ToolCompleted { is_error });
        Ok(())
    }

    /// Run one user turn on the active agent.  Returns the accumulated
    /// assistant text.
    pub async fn handle_user_message(&mut self, text: &str) -> anyhow::Result<String> {
        // The sender half stays alive for the duration of the turn so the
        // receiver never observes a spurious cancellation.
        let (_keep_alive, mut cancel) = oneshot::channel::<()>();
        let agent_id = self.active_agent_id.clone();
        self.run_turn(&agent_id, text, &mut cancel, false).await
    }

    /// Like [`handle_user_message`] but cancellable: sending (or dropping
    /// the sender of) `cancel` aborts the backend stream at the next await
    /// point.  Partial assistant content is persisted.
    pub async fn handle_user_message_with_cancel(
        &mut self,
        text: &str,
        cancel: &mut oneshot::Receiver<()>,
    ) -> anyhow::Result<String> {
        let agent_id = self.active_agent_id.clone();
        self.run_turn(&agent_id, text, cancel, false).await
    }

    /// The turn loop.  `is_handoff` marks synthetic turns driven by the
    /// switch handler (no mail digest is injected for those — the handoff
    /// notice already says there is mail).
    #[async_recursion]
    pub(crate) async fn run_turn(
        &mut self,
        agent_id: &str,
        user_text: &str,
        cancel: &mut oneshot::Receiver<()>,
        is_handoff: bool,
    ) -> anyhow::Result<String> {
        // Cancelled before entry: skip without touching history, so the
        // no-consecutive-user-messages invariant cannot be violated by a
        // user message that never gets an assistant reply.
        if cancel_requested(cancel) {
            return Ok(String::new());
        }
        self.ensure_runtime(agent_id)?;
        self.emit(SessionEvent::TurnStarted {
            agent_id: agent_id.to_string(),
        });
        self.observe(ObserverEvent::MessageStart);

        if !is_handoff {
            let unread = self.services.mailbox.unread_count(agent_id);
            if unread > 0 {
                let note = format!(
                    "You have {unread} unread message(s). Use check_mail to read them."
                );
                self.runtimes
                    .get_mut(agent_id)
                    .unwrap()
                    .inject_system_directive(&note);
            }
        }

        {
            let runtime = self.runtimes.get_mut(agent_id).unwrap();
            runtime.push(Message::user(user_text));
            runtime.continuation_depth = 0;
        }

        let mut turn_text = String::new();
        // Set when the turn ends on the empty-response placeholder.  Such a
        // turn is not reported as a completed message to the observer, so
        // the stall detector still sees "tool completed, nothing since" and
        // can trigger an intervention.
        let mut ended_empty = false;

        loop {
            let req = self.runtimes.get(agent_id).unwrap().build_request();
            let outcome = self.stream_one_turn(agent_id, req, cancel).await;

            let (text, reasoning, calls, usage) = match outcome {
                StreamOutcome::Cancelled { text, reasoning } => {
                    if !text.is_empty() || reasoning.is_some() {
                        let mut partial = Message::assistant(&text);
                        partial.reasoning = reasoning;
                        turn_text.push_str(&text);
                        self.runtimes.get_mut(agent_id).unwrap().push(partial);
                    }
                    debug!(session_id = %self.id, agent_id, "turn cancelled mid-stream");
                    break;
                }
                StreamOutcome::Complete {
                    text,
                    reasoning,
                    calls,
                    usage,
                } => (text, reasoning, calls, usage),
            };

            // Empty-response defense: preserve the no-consecutive-user-
            // messages invariant by writing a placeholder assistant message.
            if text.is_empty() && reasoning.is_none() && calls.is_empty() {
                let runtime = self.runtimes.get_mut(agent_id).unwrap();
                runtime.push(Message::assistant(EMPTY_RESPONSE_PLACEHOLDER));
                ended_empty = true;
                self.observe(ObserverEvent::EmptyResponse);
                self.emit(SessionEvent::AssistantComplete {
                    agent_id: agent_id.to_string(),
                    text: EMPTY_RESPONSE_PLACEHOLDER.to_string(),
                    usage: None,
                });
                break;
            }

            let records: Vec<_> = calls.iter().map(|c| c.record.clone()).collect();
            let mut assistant = Message::assistant_with_calls(&text, records);
            assistant.reasoning = reasoning;
            assistant.usage = usage;
            turn_text.push_str(&text);
            self.runtimes
                .get_mut(agent_id)
                .unwrap()
                .push(assistant.clone());
            self.emit(SessionEvent::AssistantComplete {
                agent_id: agent_id.to_string(),
                text: text.clone(),
                usage,
            });

            if calls.is_empty() {
                break;
            }

            // Tool calls execute strictly in the order the backend emitted
            // them; later calls may depend on earlier side effects.
            let mut cancelled_mid_tools = false;
            for call in calls {
                self.emit(SessionEvent::ToolCallStarted {
                    agent_id: agent_id.to_string(),
                    call: call.record.clone(),
                });
                let normalized_args = call
                    .parsed
                    .as_ref()
                    .map(|v| v.to_string())
                    .unwrap_or_else(|_| call.record.arguments.clone());
                self.observe(ObserverEvent::ToolInvoked {
                    name: call.record.name.clone(),
                    normalized_args,
                });

                if cancel_requested(cancel) {
                    cancelled_mid_tools = true;
                }

                let output = if cancelled_mid_tools {
                    ToolOutput::err(&call.record.id, "cancelled")
                } else {
                    self.execute_call(agent_id, &call, cancel).await
                };

                let content =
                    truncate_result(&output.to_history_content(), self.services.result_byte_cap);
                self.runtimes
                    .get_mut(agent_id)
                    .unwrap()
                    .push(Message::tool_result(&call.record.id, content));
                self.emit(SessionEvent::ToolCallFinished {
                    agent_id: agent_id.to_string(),
                    call_id: call.record.id.clone(),
                    tool_name: call.record.name.clone(),
                    result: output.result.clone(),
                    is_error: output.is_error,
                });
                self.observe(ObserverEvent::ToolCompleted {
                    is_error: output.is_error,
                });
            }
            if cancelled_mid_tools {
                break;
            }

            let runtime = self.runtimes.get_mut(agent_id).unwrap();
            if ContinuationController::should_continue(
                &runtime.descriptor.continuation,
                &assistant,
                runtime.continuation_depth,
            ) {
                runtime.continuation_depth += 1;
                continue;
            }
            break;
        }

        self.emit(SessionEvent::TurnComplete {
            agent_id: agent_id.to_string(),
            text: turn_text.clone(),
        });
        if !ended_empty {
            self.observe(ObserverEvent::MessageComplete);
        }
        Ok(turn_text)
    }

    /// Dispatch one finalized tool call: handoff interception first, then
    /// argument-parse failures, then the registry.
    async fn execute_call(
        &mut self,
        agent_id: &str,
        call: &FinishedCall,
        cancel: &mut oneshot::Receiver<()>,
    ) -> ToolOutput {
        // Availability is per agent: the selector cascade decides what each
        // agent may call, even though the registry is process-wide.
        if !self
            .runtimes
            .get(agent_id)
            .map(|r| r.has_tool(&call.record.name))
            .unwrap_or(false)
        {
            return ToolOutput::err(
                &call.record.id,
                format!(
                    "policy: tool '{}' is not available to this agent",
                    call.record.name
                ),
            );
        }
        if let Some(output) = self.try_handoff(agent_id, call, cancel).await {
            return output;
        }
        let args = match &call.parsed {
            Ok(v) => v.clone(),
            Err(parse_err) => {
                return ToolOutput::err(&call.record.id, parse_err.clone());
            }
        };
        let tool_call = ToolCall {
            id: call.record.id.clone(),
            name: call.record.name.clone(),
            args,
        };
        let ctx = InvocationContext::new(self.id.clone(), agent_id.to_string());
        self.services.tools.invoke(&tool_call, &ctx).await
    }

    /// Stream one backend call, forwarding deltas to the event sink and
    /// accumulating tool-call chunks.  Backend failures surface as an empty
    /// response (flagged by the observer) rather than an error return, so
    /// the turn loop's placeholder defense applies.
    async fn stream_one_turn(
        &self,
        agent_id: &str,
        req: troupe_model::CompletionRequest,
        cancel: &mut oneshot::Receiver<()>,
    ) -> StreamOutcome {
        let mut stream = match self.services.backend.complete(req).await {
            Ok(s) => s,
            Err(e) => {
                warn!(session_id = %self.id, agent_id, "backend completion failed: {e:#}");
                self.emit(SessionEvent::Error {
                    agent_id: agent_id.to_string(),
                    message: format!("backend: {e}"),
                });
                self.observe(ObserverEvent::Error);
                return StreamOutcome::Complete {
                    text: String::new(),
                    reasoning: None,
                    calls: Vec::new(),
                    usage: None,
                };
            }
        };

        let mut text = String::new();
        let mut reasoning_buf = String::new();
        let mut acc = ToolCallAccumulator::default();
        let mut usage: Option<Usage> = None;

        loop {
            let event = tokio::select! {
                biased;
                _ = &mut *cancel => {
                    return StreamOutcome::Cancelled {
                        text,
                        reasoning: non_empty(reasoning_buf),
                    };
                }
                ev = stream.next() => ev,
            };
            match event {
                None => break,
                Some(Ok(ResponseEvent::TextDelta(delta))) if !delta.is_empty() => {
                    text.push_str(&delta);
                    self.emit(SessionEvent::AssistantDelta {
                        agent_id: agent_id.to_string(),
                        text: delta,
                    });
                }
                Some(Ok(ResponseEvent::TextDelta(_))) => {}
                Some(Ok(ResponseEvent::ReasoningDelta(delta))) => {
                    reasoning_buf.push_str(&delta);
                    self.emit(SessionEvent::ReasoningDelta {
                        agent_id: agent_id.to_string(),
                        text: delta,
                    });
                }
                Some(Ok(ResponseEvent::ToolCallChunk {
                    index,
                    id,
                    name,
                    arguments,
                })) => {
                    acc.absorb(index, id, name, arguments);
                }
                Some(Ok(ResponseEvent::Usage(u))) => {
                    usage = Some(u);
                }
                Some(Ok(ResponseEvent::Done)) => break,
                Some(Ok(ResponseEvent::Error(e))) => {
                    warn!(session_id = %self.id, "backend stream error: {e}");
                    self.emit(SessionEvent::Error {
                        agent_id: agent_id.to_string(),
                        message: e,
                    });
                    self.observe(ObserverEvent::Error);
                }
                Some(Err(e)) => {
                    warn!(session_id = %self.id, "backend stream failed: {e:#}");
                    self.emit(SessionEvent::Error {
                        agent_id: agent_id.to_string(),
                        message: format!("stream: {e}"),
                    });
                    self.observe(ObserverEvent::Error);
                    break;
                }
            }
        }

        StreamOutcome::Complete {
            text,
            reasoning: non_empty(reasoning_buf),
            calls: acc.finish(),
            usage,
        }
    }

    /// Inject an observer recovery directive into an agent and re-run its
    /// loop once.  Used by the gateway's active-mode stall handling.
    pub async fn run_intervention(&mut self, directive: &str) -> anyhow::Result<String> {
        let agent_id = self.active_agent_id.clone();
        self.ensure_runtime(&agent_id)?;
        self.runtimes
            .get_mut(&agent_id)
            .unwrap()
            .inject_system_directive(directive);
        let (_keep_alive, mut cancel) = oneshot::channel::<()>();
        self.run_turn(&agent_id, "Continue with the task.", &mut cancel, true)
            .await
    }

    pub(crate) fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.events {
            // Slow or detached clients drop chunks; history is authoritative.
            let _ = tx.try_send(event);
        }
    }

    pub(crate) fn observe(&self, event: ObserverEvent) {
        if let Some(observer) = &self.services.observer {
            observer.record(&self.id, event);
        }
    }

    pub(crate) fn services(&self) -> &SessionServices {
        &self.services
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.services.mailbox
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.services.tools
    }

    pub(crate) fn set_active(&mut self, agent_id: &str) {
        self.active_agent_id = agent_id.to_string();
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

/// True when the cancel channel fired or its sender was dropped.
pub(crate) fn cancel_requested(cancel: &mut oneshot::Receiver<()>) -> bool {
    !matches!(
        cancel.try_recv(),
        Err(oneshot::error::TryRecvError::Empty)
    )
}
