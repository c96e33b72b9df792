// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::warn;

use troupe_agents::{AgentDescriptor, AgentRegistry, PromptLoader};
use troupe_model::{CompletionRequest, Message, ToolCallRecord, ToolSchema};
use troupe_tools::ToolRegistry;

/// One instance per (session, agent).  Owns the agent's conversation
/// history and continuation depth; the tool set is resolved once at
/// construction from the descriptor's selectors.
pub struct AgentRuntime {
    pub descriptor: AgentDescriptor,
    /// Append-only within a session.  External collaborators (switch
    /// handler, observer) write through the explicit injection APIs below,
    /// never directly.
    pub history: Vec<Message>,
    /// Continuations taken in the current turn; reset at each user turn.
    pub continuation_depth: u32,
    pub last_activity: DateTime<Utc>,
    /// Approximate token footprint of `history`.
    pub token_count: usize,
    system_prompt: String,
    schemas: Vec<ToolSchema>,
}

impl AgentRuntime {
    pub fn new(
        descriptor: AgentDescriptor,
        tools: &ToolRegistry,
        prompts: &PromptLoader,
        agents: &AgentRegistry,
    ) -> anyhow::Result<Self> {
        let schemas = tools
            .definitions_for(&descriptor.tool_selectors)?
            .into_iter()
            .map(|s| ToolSchema {
                name: s.name,
                description: s.description,
                parameters: s.parameters,
            })
            .collect();
        let system_prompt = prompts.system_prompt(&descriptor.prompt_file, agents);
        Ok(Self {
            descriptor,
            history: Vec::new(),
            continuation_depth: 0,
            last_activity: Utc::now(),
            token_count: 0,
            system_prompt,
            schemas,
        })
    }

    pub fn push(&mut self, msg: Message) {
        self.token_count += msg.approx_tokens();
        self.last_activity = Utc::now();
        self.history.push(msg);
    }

    /// Record a tool result supplied by an external collaborator (e.g. the
    /// switch handler after intercepting a call).
    pub fn handle_tool_result(&mut self, tool_call_id: &str, result: Value) {
        self.push(Message::tool_result(tool_call_id, result.to_string()));
    }

    /// Append a system note to the conversation.  Used by the observer for
    /// recovery directives.
    pub fn inject_system_directive(&mut self, text: &str) {
        self.push(Message::system(text));
    }

    /// Whether a tool is available to this agent.
    pub fn has_tool(&self, name: &str) -> bool {
        self.schemas.iter().any(|s| s.name == name)
    }

    pub fn tool_schemas(&self) -> &[ToolSchema] {
        &self.schemas
    }

    /// Build the backend request: system prompt, history window, schemas,
    /// and the agent's model preferences.
    pub fn build_request(&self) -> CompletionRequest {
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(&self.system_prompt));
        messages.extend(self.history.iter().cloned());
        CompletionRequest {
            messages,
            tools: self.schemas.clone(),
            model: self.descriptor.model_prefs.model_id.clone(),
            temperature: self.descriptor.model_prefs.temperature,
            max_tokens: self.descriptor.model_prefs.max_tokens,
        }
    }
}

/// A finalized tool call from the streaming accumulator: the record to
/// store in history, plus the parse outcome of its argument buffer.
#[derive(Debug)]
pub(crate) struct FinishedCall {
    pub record: ToolCallRecord,
    /// `Err` carries the parse failure; the call is then answered with a
    /// structured error without invoking the tool.
    pub parsed: Result<Value, String>,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    args_buf: String,
}

/// Accumulates streamed tool-call chunks keyed by the backend's parallel
/// tool-call index.  `id` and `name` typically arrive on the first chunk;
/// later chunks append to the argument buffer.
#[derive(Default)]
pub(crate) struct ToolCallAccumulator {
    pending: HashMap<u32, PendingToolCall>,
}

impl ToolCallAccumulator {
    pub fn absorb(&mut self, index: u32, id: String, name: String, arguments: String) {
        let ptc = self.pending.entry(index).or_default();
        if !id.is_empty() {
            ptc.id = id;
        }
        if !name.is_empty() {
            ptc.name = name;
        }
        ptc.args_buf.push_str(&arguments);
    }

    /// Finalize all accumulated calls, ordered by index.
    ///
    /// Calls with an empty name cannot be dispatched and are dropped —
    /// storing them would corrupt the history sent back to the backend.
    /// An empty id gets a synthetic fallback so the turn can still complete.
    pub fn finish(self) -> Vec<FinishedCall> {
        let mut sorted: Vec<(u32, PendingToolCall)> = self.pending.into_iter().collect();
        sorted.sort_by_key(|(idx, _)| *idx);

        let mut out = Vec::with_capacity(sorted.len());
        for (i, (_, ptc)) in sorted.into_iter().enumerate() {
            if ptc.name.is_empty() {
                warn!(
                    tool_call_id = %ptc.id,
                    "dropping tool call with empty name from backend"
                );
                continue;
            }
            let id = if ptc.id.is_empty() {
                warn!(tool_name = %ptc.name, "tool call had empty id; generating synthetic id");
                format!("tc_synthetic_{i}")
            } else {
                ptc.id
            };
            let parsed = if ptc.args_buf.is_empty() {
                // Zero-byte arguments reach the schema validator as null and
                // come back as a schema error rather than crashing.
                Ok(Value::Null)
            } else {
                serde_json::from_str(&ptc.args_buf)
                    .map_err(|e| format!("arguments parse: {e}"))
            };
            out.push(FinishedCall {
                record: ToolCallRecord {
                    id,
                    name: ptc.name,
                    arguments: ptc.args_buf,
                },
                parsed,
            });
        }
        out
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
