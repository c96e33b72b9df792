// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Decides whether to auto-invoke the backend again after tool execution.
//!
//! Some backends return all tool calls in one turn; others return one at a
//! time and expect a re-invocation.  The same runtime must work for both,
//! so the decision is policy-driven per agent:
//!
//! - Implicit mode (`require_explicit_signal: false`): any tool-calling
//!   turn continues, up to the depth cap.
//! - Explicit mode: continue only when the assistant message carries the
//!   agent's sentinel phrase or called a tool on its auto-continue list.

use troupe_agents::ContinuationPolicy;
use troupe_model::Message;

pub struct ContinuationController;

impl ContinuationController {
    /// `depth` is the number of continuations already taken this turn.
    pub fn should_continue(policy: &ContinuationPolicy, last: &Message, depth: u32) -> bool {
        if depth >= policy.max_depth {
            return false;
        }
        let had_tool_calls = !last.tool_calls.is_empty();

        if had_tool_calls && (policy.single_tool_per_step || !policy.require_explicit_signal) {
            return true;
        }

        if policy.require_explicit_signal {
            if last.content.contains(&policy.continuation_sentinel) {
                return true;
            }
            if last
                .tool_calls
                .iter()
                .any(|c| policy.auto_continue_tools.iter().any(|t| t == &c.name))
            {
                return true;
            }
        }

        false
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use troupe_model::ToolCallRecord;

    use super::*;

    fn call(name: &str) -> ToolCallRecord {
        ToolCallRecord {
            id: "c".into(),
            name: name.into(),
            arguments: "{}".into(),
        }
    }

    fn implicit() -> ContinuationPolicy {
        ContinuationPolicy::default()
    }

    fn explicit() -> ContinuationPolicy {
        ContinuationPolicy {
            require_explicit_signal: true,
            single_tool_per_step: false,
            auto_continue_tools: vec!["prepare_plan_from_rfc".into()],
            ..Default::default()
        }
    }

    #[test]
    fn depth_cap_always_stops() {
        let policy = implicit();
        let msg = Message::assistant_with_calls("", vec![call("x")]);
        assert!(!ContinuationController::should_continue(
            &policy,
            &msg,
            policy.max_depth
        ));
    }

    #[test]
    fn implicit_mode_continues_on_tool_calls() {
        let msg = Message::assistant_with_calls("", vec![call("x")]);
        assert!(ContinuationController::should_continue(&implicit(), &msg, 0));
    }

    #[test]
    fn implicit_mode_stops_on_text_only() {
        let msg = Message::assistant("all done");
        assert!(!ContinuationController::should_continue(
            &implicit(),
            &msg,
            0
        ));
    }

    #[test]
    fn explicit_mode_stops_on_unlisted_tool() {
        let msg = Message::assistant_with_calls("", vec![call("read_file")]);
        assert!(!ContinuationController::should_continue(
            &explicit(),
            &msg,
            0
        ));
    }

    #[test]
    fn explicit_mode_continues_on_auto_continue_tool() {
        let msg = Message::assistant_with_calls("", vec![call("prepare_plan_from_rfc")]);
        assert!(ContinuationController::should_continue(&explicit(), &msg, 0));
    }

    #[test]
    fn explicit_mode_continues_on_sentinel_phrase() {
        let msg = Message::assistant("More to do.\nCONTINUE");
        assert!(ContinuationController::should_continue(&explicit(), &msg, 0));
    }

    #[test]
    fn single_tool_per_step_continues_even_in_explicit_mode() {
        let policy = ContinuationPolicy {
            require_explicit_signal: true,
            single_tool_per_step: true,
            ..Default::default()
        };
        let msg = Message::assistant_with_calls("", vec![call("anything")]);
        assert!(ContinuationController::should_continue(&policy, &msg, 0));
    }

    #[test]
    fn sentinel_respects_depth_cap() {
        let policy = ContinuationPolicy {
            require_explicit_signal: true,
            max_depth: 2,
            ..Default::default()
        };
        let msg = Message::assistant("CONTINUE");
        assert!(ContinuationController::should_continue(&policy, &msg, 1));
        assert!(!ContinuationController::should_continue(&policy, &msg, 2));
    }
}
