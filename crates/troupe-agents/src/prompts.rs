// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Prompt resolution with user-override precedence.
//!
//! Each agent's system prompt comes from `<prompt_file>.md`, looked up in
//! the override directories first (highest precedence last in the search
//! order below) and falling back to the embedded defaults:
//!
//! ```text
//! <override_dir>/prompts/agents/<stem>.md   ← user override
//! (embedded default)                        ← shipped with the binary
//! ```
//!
//! The assembled prompt is: agent prompt + agent roster + shared tool-usage
//! instructions.

use std::path::PathBuf;

use tracing::debug;

use crate::registry::AgentRegistry;

/// Shared trailer appended to every agent prompt.
const TOOL_USAGE_INSTRUCTIONS: &str = "\
## Tool usage

- Call tools with JSON arguments that match the declared schema exactly.
- Every tool returns a JSON object: `success: true` with data fields, or
  `success: false` with an `error` field. Read the error and adjust rather
  than repeating the identical call.
- To hand work to another agent, use `send_mail` with the agent's name; the
  recipient will process it and you will see the outcome as a tool result.
- Check your own mailbox with `check_mail` when told you have mail.";

const ALICE_PROMPT: &str = include_str!("prompts/alice.md");
const PATRICIA_PROMPT: &str = include_str!("prompts/patricia.md");
const TESSA_PROMPT: &str = include_str!("prompts/tessa.md");
const DEBBIE_PROMPT: &str = include_str!("prompts/debbie.md");
const EAMONN_PROMPT: &str = include_str!("prompts/eamonn.md");

/// Resolves agent prompt files with override precedence.
#[derive(Debug, Clone, Default)]
pub struct PromptLoader {
    /// Searched in order; the first hit wins.
    override_dirs: Vec<PathBuf>,
}

impl PromptLoader {
    pub fn new(override_dirs: Vec<PathBuf>) -> Self {
        Self { override_dirs }
    }

    /// Build the full system prompt for an agent.
    pub fn system_prompt(&self, prompt_file: &str, registry: &AgentRegistry) -> String {
        let base = self
            .load_override(prompt_file)
            .unwrap_or_else(|| embedded_prompt(prompt_file).to_string());
        format!(
            "{}\n\n## Other agents\n\n{}\n\n{}",
            base.trim_end(),
            registry.roster_block(),
            TOOL_USAGE_INSTRUCTIONS
        )
    }

    fn load_override(&self, stem: &str) -> Option<String> {
        for dir in &self.override_dirs {
            let candidate = dir.join("prompts/agents").join(format!("{stem}.md"));
            if candidate.is_file() {
                match std::fs::read_to_string(&candidate) {
                    Ok(text) if !text.trim().is_empty() => {
                        debug!(path = %candidate.display(), "using prompt override");
                        return Some(text);
                    }
                    _ => {}
                }
            }
        }
        None
    }
}

fn embedded_prompt(stem: &str) -> &'static str {
    match stem {
        "alice" => ALICE_PROMPT,
        "patricia" => PATRICIA_PROMPT,
        "tessa" => TESSA_PROMPT,
        "debbie" => DEBBIE_PROMPT,
        "eamonn" => EAMONN_PROMPT,
        _ => ALICE_PROMPT,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
