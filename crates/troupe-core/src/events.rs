// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use serde_json::Value;

use troupe_model::{ToolCallRecord, Usage};

/// Events emitted by a session during a turn.  Consumers (gateway, replay,
/// observer) subscribe to these to drive their output.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A turn started processing a user (or synthetic) message.
    TurnStarted { agent_id: String },
    /// A text chunk streamed from the backend.
    AssistantDelta { agent_id: String, text: String },
    /// A reasoning chunk from the backend.
    ReasoningDelta { agent_id: String, text: String },
    /// The backend requested a tool call.
    ToolCallStarted {
        agent_id: String,
        call: ToolCallRecord,
    },
    /// A tool call finished; `result` is the structured payload recorded in
    /// history.
    ToolCallFinished {
        agent_id: String,
        call_id: String,
        tool_name: String,
        result: Value,
        is_error: bool,
    },
    /// One assistant message completed (there may be several per turn when
    /// the continuation controller re-invokes the backend).
    AssistantComplete {
        agent_id: String,
        text: String,
        usage: Option<Usage>,
    },
    /// Active agent changed (explicit switch or handoff).
    AgentSwitched { from: String, to: String },
    /// The turn finished; `text` is the accumulated assistant output.
    TurnComplete { agent_id: String, text: String },
    /// A recoverable error surfaced during the turn.
    Error { agent_id: String, message: String },
}
