// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single message in a conversation history.
///
/// Assistant messages may carry tool calls and reasoning alongside (or
/// instead of) text content; tool-role messages carry the id of the call
/// they answer.  `usage` is populated only on assistant messages, from the
/// backend's final usage report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    /// Message text.  May be empty for assistant turns that only call tools.
    pub content: String,
    /// Tool calls requested by an assistant turn.  Empty for all other roles.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRecord>,
    /// For tool-role messages: the id of the assistant tool call this answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Chain-of-thought text from reasoning-capable backends.  Stored but
    /// never promoted to user-visible content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl Message {
    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }

    /// Assistant message that requests tool calls (content may be empty).
    pub fn assistant_with_calls(text: impl Into<String>, calls: Vec<ToolCallRecord>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::text(Role::Assistant, text)
        }
    }

    /// Tool-role reply paired to an assistant tool call by id.
    /// `content` is the JSON serialization of the structured result.
    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            ..Self::text(Role::Tool, content)
        }
    }

    fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: text.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            reasoning: None,
            timestamp: Utc::now(),
            usage: None,
        }
    }

    /// Approximate token count used for context accounting.
    ///
    /// Uses the 4-chars-per-token heuristic over content, reasoning, and
    /// tool-call arguments.  Good enough for budget tracking; the backend's
    /// actual usage report corrects the running total.
    pub fn approx_tokens(&self) -> usize {
        let chars = self.content.len()
            + self.reasoning.as_deref().map(str::len).unwrap_or(0)
            + self
                .tool_calls
                .iter()
                .map(|c| c.name.len() + c.arguments.len())
                .sum::<usize>();
        (chars / 4).max(1)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// One tool call as recorded in an assistant message.
///
/// The `id` comes from the backend and must be preserved verbatim so the
/// paired tool-role message can reference it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    /// JSON-encoded argument object, exactly as the backend emitted it.
    pub arguments: String,
}

/// A tool schema provided to the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    /// JSON Schema of the parameters object.
    pub parameters: serde_json::Value,
}

/// Request sent to a backend.
#[derive(Debug, Clone, Default)]
pub struct CompletionRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolSchema>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

/// A single streamed event from the backend.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    /// A text delta streamed from the backend.
    TextDelta(String),
    /// A reasoning/chain-of-thought delta.
    ReasoningDelta(String),
    /// An incremental tool-call chunk.  Chunks for one call share an
    /// `index`; `id` and `name` may arrive on the first chunk only, with
    /// later chunks appending to `arguments`.
    ToolCallChunk {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    /// Final usage statistics for the turn.
    Usage(Usage),
    /// The stream finished normally.
    Done,
    /// A recoverable error (non-fatal warning).
    Error(String),
}

/// Token usage from one assistant turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    /// Estimated cost in USD, when the backend reports pricing.
    #[serde(default)]
    pub cost: f64,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
