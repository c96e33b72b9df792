// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Workspace-level end-to-end scenarios: session wiring, mail handoff,
//! stall intervention, and headless replay, all on scripted or mock
//! backends so no network access is needed.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use troupe_agents::{AgentRegistry, PromptLoader};
use troupe_config::{Config, ObserverConfig, ObserverMode};
use troupe_core::{Session, SessionServices};
use troupe_mail::Mailbox;
use troupe_model::{ResponseEvent, Role, ScriptedBackend};
use troupe_observer::{AlertKind, Observer};
use troupe_tools::{register_builtin, PathPolicy, ToolRegistry};

struct World {
    session: Session,
    observer: Arc<Observer>,
    alert_rx: mpsc::UnboundedReceiver<troupe_observer::ObserverAlert>,
    _dir: tempfile::TempDir,
}

fn world(scripts: Vec<Vec<ResponseEvent>>, observer_config: ObserverConfig) -> World {
    let dir = tempfile::tempdir().unwrap();
    let out = dir.path().join("out");
    std::fs::create_dir_all(&out).unwrap();
    let policy = Arc::new(PathPolicy::new(dir.path(), &out));
    let mailbox = Arc::new(Mailbox::new());
    let tools = Arc::new(ToolRegistry::new());
    register_builtin(&tools, policy, mailbox.clone()).unwrap();

    let (alert_tx, alert_rx) = mpsc::unbounded_channel();
    let observer = Arc::new(Observer::new(observer_config, alert_tx));

    let session = Session::new(SessionServices {
        backend: Arc::new(ScriptedBackend::new(scripts)),
        tools,
        agents: Arc::new(AgentRegistry::standard()),
        prompts: Arc::new(PromptLoader::default()),
        mailbox,
        observer: Some(observer.clone()),
        result_byte_cap: 20_000,
    });

    World {
        session,
        observer,
        alert_rx,
        _dir: dir,
    }
}

fn fast_stall_config() -> ObserverConfig {
    ObserverConfig {
        mode: ObserverMode::Active,
        stall_secs: 0,
        ..ObserverConfig::default()
    }
}

// ── Scenario: switch and ask ──────────────────────────────────────────────────

#[tokio::test]
async fn switch_and_ask_runs_health_check_on_debbie() {
    let mut w = world(
        vec![
            ScriptedBackend::tool_call_script("hc-1", "system_health_check", "{}"),
            ScriptedBackend::text_script("The system reports status ok."),
        ],
        ObserverConfig::default(),
    );

    w.session.switch_agent("d").unwrap();
    assert_eq!(w.session.active_agent_id(), "d");

    w.session
        .handle_user_message("run a system health check")
        .await
        .unwrap();

    let history = w.session.active_history();
    let calls: Vec<_> = history.iter().flat_map(|m| m.tool_calls.iter()).collect();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].name, "system_health_check");
    assert_eq!(
        history.iter().filter(|m| m.role == Role::Tool).count(),
        1
    );
    assert!(history.last().unwrap().content.contains("ok"));
}

// ── Scenario: synchronous handoff ─────────────────────────────────────────────

#[tokio::test]
async fn ask_debbie_to_check_the_mailbox() {
    let mut w = world(
        vec![
            ScriptedBackend::tool_call_script(
                "m-1",
                "send_mail",
                r#"{"to_agent":"Debbie","subject":"mailbox","body":"check the mailbox"}"#,
            ),
            ScriptedBackend::tool_call_script("c-1", "check_mail", "{}"),
            ScriptedBackend::text_script("Found one message; on it."),
            ScriptedBackend::text_script("Debbie replied: Found one message; on it."),
        ],
        ObserverConfig::default(),
    );

    let reply = w
        .session
        .handle_user_message("ask Debbie to check the mailbox")
        .await
        .unwrap();

    assert_eq!(w.session.active_agent_id(), "a");
    assert!(reply.contains("Debbie replied"));

    // Debbie ran a full turn and saw the mail.
    let debbie = w.session.runtime("d").unwrap();
    assert!(debbie
        .history
        .iter()
        .any(|m| m.tool_calls.iter().any(|c| c.name == "check_mail")));
}

// ── Scenario: stall intervention ──────────────────────────────────────────────

#[tokio::test]
async fn stall_after_tool_result_triggers_one_intervention() {
    let mut w = world(
        vec![
            // Turn: tool call succeeds, then the backend goes silent.
            ScriptedBackend::tool_call_script("hc-1", "system_health_check", "{}"),
            ScriptedBackend::empty_script(),
            // Intervention turn produces real content.
            ScriptedBackend::text_script("Recovered: the health check passed."),
        ],
        fast_stall_config(),
    );

    w.session.switch_agent("d").unwrap();
    w.session.handle_user_message("health?").await.unwrap();

    // The empty response was flagged...
    let first = w.alert_rx.recv().await.unwrap();
    assert_eq!(first.kind, AlertKind::EmptyResponse);

    // ...and the stall sweep fires because the last completed thing was a
    // tool result with no completed message after it.
    let stalls = w.observer.check_stalls();
    assert_eq!(stalls.len(), 1);
    assert_eq!(stalls[0].kind, AlertKind::SessionStall);

    assert!(w.observer.try_intervene(&w.session.id));
    let reply = w
        .session
        .run_intervention("You appear to have stalled. Continue with the task.")
        .await
        .unwrap();
    assert!(reply.contains("Recovered"));
    assert_eq!(w.observer.interventions_used(&w.session.id), 1);
}

// ── Scenario: continuation cap ────────────────────────────────────────────────

#[tokio::test]
async fn tool_loop_is_bounded_by_continuation_depth() {
    let scripts: Vec<_> = (0..20)
        .map(|i| ScriptedBackend::tool_call_script(&format!("t{i}"), "system_health_check", "{}"))
        .collect();
    let mut w = world(scripts, ObserverConfig::default());

    w.session.switch_agent("d").unwrap();
    w.session.handle_user_message("go").await.unwrap();

    let tool_results = w
        .session
        .active_history()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .count();
    // Depth cap is 8 for the standard catalog: iterations at depths 0..=8.
    assert_eq!(tool_results, 9);
}

// ── Scenario: replay drives the session API ───────────────────────────────────

#[tokio::test]
async fn replay_file_end_to_end_with_mock_backend() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.backend.kind = "mock".into();
    config.tools.workspace = dir.path().to_path_buf();
    config.tools.output = dir.path().join("out");

    let mut session = troupe_replay::session_from_config(&config).unwrap();
    let content = "# smoke conversation\n\nfirst question\nsecond question\n/quit\nignored\n";
    let mut replies = Vec::new();
    let outcome = troupe_replay::run(
        &mut session,
        content,
        Duration::from_secs(30),
        |reply| replies.push(reply.to_string()),
    )
    .await
    .unwrap();

    assert_eq!(outcome.turns, 2);
    assert!(outcome.quit);
    assert!(replies[0].contains("first question"));
    assert!(replies[1].contains("second question"));
}

// ── Invariants across a mixed session ─────────────────────────────────────────

#[tokio::test]
async fn tool_call_pairing_invariant_holds_across_turns() {
    let mut w = world(
        vec![
            ScriptedBackend::tool_call_script("a-1", "check_mail", "{}"),
            ScriptedBackend::text_script("no mail"),
            ScriptedBackend::tool_call_script("a-2", "system_health_check", "{}"),
            ScriptedBackend::text_script("healthy"),
        ],
        ObserverConfig::default(),
    );

    w.session.handle_user_message("any mail?").await.unwrap();
    w.session.handle_user_message("healthy?").await.unwrap();

    let history = w.session.active_history();
    // Every assistant message with N tool calls is followed by exactly N
    // tool-role messages whose ids match.
    let mut i = 0;
    while i < history.len() {
        let msg = &history[i];
        if msg.role == Role::Assistant && !msg.tool_calls.is_empty() {
            let mut expected: Vec<&str> =
                msg.tool_calls.iter().map(|c| c.id.as_str()).collect();
            expected.sort_unstable();
            let mut actual: Vec<&str> = history[i + 1..i + 1 + msg.tool_calls.len()]
                .iter()
                .map(|m| {
                    assert_eq!(m.role, Role::Tool);
                    m.tool_call_id.as_deref().unwrap()
                })
                .collect();
            actual.sort_unstable();
            assert_eq!(expected, actual);
            i += 1 + msg.tool_calls.len();
        } else {
            i += 1;
        }
    }

    assert!(w.session.context_tokens() > 0);
}
