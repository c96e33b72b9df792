// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
pub mod builtin;
pub mod policy;
pub mod registry;
pub mod tool;
pub mod validate;

pub use policy::PathPolicy;
pub use registry::{ToolRegistry, ToolSchema, ToolSelectors, ToolSetDef};
pub use tool::{InvocationContext, Tool, ToolCall, ToolOutput};

pub use builtin::fs::{ListDirTool, ReadFileTool, WriteFileTool};
pub use builtin::health::SystemHealthCheckTool;
pub use builtin::mail::{ArchiveMailTool, CheckMailTool, ReplyMailTool, SendMailTool};
pub use builtin::register_builtin;
pub use builtin::rfc::{CreateRfcTool, PreparePlanFromRfcTool, SaveGeneratedPlanTool};
pub use builtin::search::SearchWorkspaceTool;

/// Truncate an oversized tool result head+tail with an elision marker so a
/// single pathological output cannot blow the context window.  `cap` is in
/// bytes; results at or under the cap pass through untouched.
pub fn truncate_result(content: &str, cap: usize) -> String {
    if content.len() <= cap || cap == 0 {
        return content.to_string();
    }
    // Keep more head than tail: the preamble usually names what the output
    // is, the tail carries the final state.
    let head_budget = cap * 3 / 5;
    let tail_budget = cap - head_budget;
    let head_end = floor_char_boundary(content, head_budget);
    let tail_start = ceil_char_boundary(content, content.len() - tail_budget);
    format!(
        "{}\n[... {} bytes elided ...]\n{}",
        &content[..head_end],
        tail_start - head_end,
        &content[tail_start..]
    )
}

fn floor_char_boundary(s: &str, mut i: usize) -> usize {
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn ceil_char_boundary(s: &str, mut i: usize) -> usize {
    while i < s.len() && !s.is_char_boundary(i) {
        i += 1;
    }
    i
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
