// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Headless replay: a conversation file drives a session end-to-end.
//!
//! The file format is one user message per line, UTF-8; `#` comments and
//! blank lines are ignored.  Replay waits for each turn to complete before
//! sending the next line, and stops on EOF, on a per-turn timeout, or on
//! the `/quit` sentinel.  Replay is a client of the session API, not part
//! of the runtime.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use troupe_agents::{AgentRegistry, PromptLoader};
use troupe_config::Config;
use troupe_core::{Session, SessionServices};
use troupe_mail::Mailbox;
use troupe_tools::{register_builtin, PathPolicy, ToolRegistry};

pub const QUIT_SENTINEL: &str = "/quit";

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ReplayOutcome {
    /// Turns that ran to completion.
    pub turns: usize,
    /// Turns cut short by the per-turn timeout.
    pub timed_out: usize,
    /// Whether the file ended with an explicit `/quit`.
    pub quit: bool,
}

/// Extract the user messages from a conversation file.  Returns the lines
/// to send and whether a `/quit` sentinel terminated the list early.
pub fn parse_lines(content: &str) -> (Vec<String>, bool) {
    let mut lines = Vec::new();
    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == QUIT_SENTINEL {
            return (lines, true);
        }
        lines.push(line.to_string());
    }
    (lines, false)
}

/// Drive a session with the file content.  `on_reply` receives each turn's
/// accumulated assistant text (the CLI prints it to stdout for piping).
pub async fn run(
    session: &mut Session,
    content: &str,
    turn_timeout: Duration,
    mut on_reply: impl FnMut(&str),
) -> anyhow::Result<ReplayOutcome> {
    let (lines, quit) = parse_lines(content);
    let mut outcome = ReplayOutcome {
        quit,
        ..Default::default()
    };

    for line in lines {
        debug!(turn = outcome.turns + 1, "replay turn");
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(turn_timeout).await;
            let _ = cancel_tx.send(());
        });

        let reply = session
            .handle_user_message_with_cancel(&line, &mut cancel_rx)
            .await
            .context("replay turn failed")?;

        if timer.is_finished() {
            warn!("replay turn timed out after {turn_timeout:?}");
            outcome.timed_out += 1;
        } else {
            timer.abort();
        }
        outcome.turns += 1;
        on_reply(&reply);
    }

    Ok(outcome)
}

/// Wire a standalone session from config, for the `troupe replay` command.
pub fn session_from_config(config: &Config) -> anyhow::Result<Session> {
    let policy = Arc::new(PathPolicy::new(
        &config.tools.workspace,
        &config.tools.output,
    ));
    let mailbox = Arc::new(Mailbox::with_warn_depth(
        config.mailbox.per_recipient_warn_depth,
    ));
    let tools = Arc::new(ToolRegistry::new());
    register_builtin(&tools, policy, mailbox.clone()).context("registering built-in tools")?;
    let backend = troupe_model::from_config(&config.backend).context("initializing backend")?;

    Ok(Session::new(SessionServices {
        backend,
        tools,
        agents: Arc::new(AgentRegistry::standard()),
        prompts: Arc::new(PromptLoader::new(vec![std::path::PathBuf::from(".troupe")])),
        mailbox,
        observer: None,
        result_byte_cap: config.tools.result_byte_cap,
    }))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn mock_session(dir: &tempfile::TempDir) -> Session {
        let mut config = Config::default();
        config.backend.kind = "mock".into();
        config.tools.workspace = dir.path().to_path_buf();
        config.tools.output = dir.path().join("out");
        session_from_config(&config).unwrap()
    }

    #[test]
    fn parse_skips_comments_and_blanks() {
        let (lines, quit) = parse_lines("# header\n\nfirst message\n  \nsecond message\n");
        assert_eq!(lines, vec!["first message", "second message"]);
        assert!(!quit);
    }

    #[test]
    fn parse_stops_at_quit_sentinel() {
        let (lines, quit) = parse_lines("one\n/quit\ntwo\n");
        assert_eq!(lines, vec!["one"]);
        assert!(quit);
    }

    #[test]
    fn parse_empty_file_yields_nothing() {
        let (lines, quit) = parse_lines("# only comments\n\n");
        assert!(lines.is_empty());
        assert!(!quit);
    }

    #[tokio::test]
    async fn replay_drives_turns_sequentially() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = mock_session(&dir);
        let mut replies = Vec::new();
        let outcome = run(
            &mut session,
            "hello\nworld\n",
            Duration::from_secs(10),
            |reply| replies.push(reply.to_string()),
        )
        .await
        .unwrap();

        assert_eq!(outcome.turns, 2);
        assert_eq!(outcome.timed_out, 0);
        // The mock backend echoes each line; turn order is preserved.
        assert!(replies[0].contains("hello"));
        assert!(replies[1].contains("world"));
        // History holds both full turns.
        assert_eq!(session.active_history().len(), 4);
    }

    #[tokio::test]
    async fn replay_reports_quit() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = mock_session(&dir);
        let outcome = run(
            &mut session,
            "only line\n/quit\nnever sent\n",
            Duration::from_secs(10),
            |_| {},
        )
        .await
        .unwrap();
        assert_eq!(outcome.turns, 1);
        assert!(outcome.quit);
    }
}
