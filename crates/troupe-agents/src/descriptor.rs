// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
use troupe_tools::ToolSelectors;

/// Immutable description of one agent persona.  Identity is the `id`; the
/// descriptor never changes after the catalog is built.
#[derive(Debug, Clone)]
pub struct AgentDescriptor {
    /// Short code, one or two lower-case letters.
    pub id: String,
    /// Friendly name used in handoff resolution and prompts.
    pub name: String,
    /// One-line role description injected into other agents' prompts.
    pub role: String,
    /// Prompt file stem resolved by the prompt loader.
    pub prompt_file: String,
    pub tool_selectors: ToolSelectors,
    pub continuation: ContinuationPolicy,
    pub model_prefs: ModelPrefs,
}

/// Governs whether the runtime re-invokes the backend after tool results
/// without user input.
#[derive(Debug, Clone)]
pub struct ContinuationPolicy {
    /// When true, continuation requires the sentinel phrase or an
    /// auto-continue tool; when false, any tool-calling turn continues.
    pub require_explicit_signal: bool,
    /// Hard cap on continuation depth per user turn.  Always ≥ 1.
    pub max_depth: u32,
    /// Backend emits one tool call per turn and expects re-invocation.
    pub single_tool_per_step: bool,
    /// Sentinel phrase that grants continuation in explicit-signal mode.
    pub continuation_sentinel: String,
    /// Tool names that grant continuation in explicit-signal mode.
    pub auto_continue_tools: Vec<String>,
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self {
            require_explicit_signal: false,
            max_depth: 8,
            single_tool_per_step: false,
            continuation_sentinel: "CONTINUE".into(),
            auto_continue_tools: Vec::new(),
        }
    }
}

/// Per-agent model preferences.  `None` fields inherit the session backend
/// defaults.
#[derive(Debug, Clone, Default)]
pub struct ModelPrefs {
    pub model_id: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_implicit_continuation() {
        let p = ContinuationPolicy::default();
        assert!(!p.require_explicit_signal);
        assert!(p.max_depth >= 1);
    }

    #[test]
    fn default_model_prefs_inherit_everything() {
        let p = ModelPrefs::default();
        assert!(p.model_id.is_none());
        assert!(p.temperature.is_none());
        assert!(p.max_tokens.is_none());
    }
}
