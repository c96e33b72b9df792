// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Session observer: watches the event stream of each session, runs anomaly
//! detectors, and emits alerts.  In active mode it additionally budgets
//! recovery interventions for stalled agents.
//!
//! The observer is non-intrusive: `record` is a cheap synchronous update of
//! in-memory counters (no I/O on the hot path except the optional alert
//! log append), so observing costs a negligible fraction of turn latency.
//! Stall detection is time-driven and runs from a caller-owned interval
//! task via [`Observer::check_stalls`].

use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use troupe_config::{ObserverConfig, ObserverMode};

/// Events the observer subscribes to.  The session core maps its own event
/// stream onto these.
#[derive(Debug, Clone)]
pub enum ObserverEvent {
    MessageStart,
    MessageComplete,
    ToolInvoked {
        name: String,
        /// Arguments serialized with sorted keys so equal argument sets
        /// normalize to equal strings.
        normalized_args: String,
    },
    ToolCompleted {
        is_error: bool,
    },
    AgentSwitched,
    Error,
    /// Assistant turn with no content, no reasoning, and no tool calls.
    EmptyResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    SessionStall,
    ErrorCascade,
    ToolLoop,
    PerformanceRegression,
    EmptyResponse,
}

#[derive(Debug, Clone, Serialize)]
pub struct ObserverAlert {
    pub session_id: String,
    pub kind: AlertKind,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Number of latency samples that form the regression baseline.
const BASELINE_SAMPLES: usize = 10;
/// Window of recent samples compared against the baseline.
const ROLLING_SAMPLES: usize = 10;

#[derive(Default)]
struct SessionState {
    last_activity: Option<Instant>,
    last_was_tool_completion: bool,
    stall_alerted: bool,
    turn_started_at: Option<Instant>,
    error_times: VecDeque<Instant>,
    tool_invocations: VecDeque<(String, String, Instant)>,
    latencies: Vec<Duration>,
    regression_alerted: bool,
    interventions_used: usize,
}

#[derive(Default)]
struct Totals {
    messages_completed: u64,
    tools_invoked: u64,
    errors: u64,
    alerts: u64,
}

pub struct Observer {
    config: ObserverConfig,
    sessions: Mutex<HashMap<String, SessionState>>,
    totals: Mutex<Totals>,
    alert_tx: mpsc::UnboundedSender<ObserverAlert>,
}

impl Observer {
    /// `alert_tx` receives every emitted alert; the gateway forwards them to
    /// the client's alert channel.
    pub fn new(config: ObserverConfig, alert_tx: mpsc::UnboundedSender<ObserverAlert>) -> Self {
        Self {
            config,
            sessions: Mutex::new(HashMap::new()),
            totals: Mutex::new(Totals::default()),
            alert_tx,
        }
    }

    pub fn mode(&self) -> ObserverMode {
        self.config.mode
    }

    /// Record one event.  Runs the event-driven detectors inline.
    pub fn record(&self, session_id: &str, event: ObserverEvent) {
        if self.config.mode == ObserverMode::Disabled {
            return;
        }
        let now = Instant::now();
        let mut alerts: Vec<ObserverAlert> = Vec::new();
        {
            let mut sessions = self.sessions.lock().unwrap();
            let state = sessions.entry(session_id.to_string()).or_default();
            state.last_activity = Some(now);

            match &event {
                ObserverEvent::MessageStart => {
                    state.turn_started_at = Some(now);
                    state.last_was_tool_completion = false;
                    state.stall_alerted = false;
                }
                ObserverEvent::MessageComplete => {
                    self.totals.lock().unwrap().messages_completed += 1;
                    state.last_was_tool_completion = false;
                    state.stall_alerted = false;
                    if let Some(start) = state.turn_started_at.take() {
                        state.latencies.push(now - start);
                        if let Some(msg) = regression_message(
                            &state.latencies,
                            self.config.regression_factor,
                            &mut state.regression_alerted,
                        ) {
                            alerts.push(self.make_alert(
                                session_id,
                                AlertKind::PerformanceRegression,
                                msg,
                            ));
                        }
                    }
                }
                ObserverEvent::ToolInvoked {
                    name,
                    normalized_args,
                } => {
                    self.totals.lock().unwrap().tools_invoked += 1;
                    let window = Duration::from_secs(self.config.loop_window_secs);
                    state
                        .tool_invocations
                        .retain(|(_, _, t)| now.duration_since(*t) < window);
                    state
                        .tool_invocations
                        .push_back((name.clone(), normalized_args.clone(), now));
                    let repeats = state
                        .tool_invocations
                        .iter()
                        .filter(|(n, a, _)| n == name && a == normalized_args)
                        .count();
                    if repeats >= self.config.loop_threshold {
                        state
                            .tool_invocations
                            .retain(|(n, a, _)| !(n == name && a == normalized_args));
                        alerts.push(self.make_alert(
                            session_id,
                            AlertKind::ToolLoop,
                            format!("tool '{name}' invoked {repeats} times with identical arguments"),
                        ));
                    }
                    state.last_was_tool_completion = false;
                }
                ObserverEvent::ToolCompleted { is_error } => {
                    state.last_was_tool_completion = true;
                    if *is_error {
                        self.count_error(state, session_id, now, &mut alerts);
                    }
                }
                ObserverEvent::AgentSwitched => {
                    state.last_was_tool_completion = false;
                }
                ObserverEvent::Error => {
                    self.totals.lock().unwrap().errors += 1;
                    self.count_error(state, session_id, now, &mut alerts);
                }
                ObserverEvent::EmptyResponse => {
                    alerts.push(self.make_alert(
                        session_id,
                        AlertKind::EmptyResponse,
                        "assistant produced no content, reasoning, or tool calls".into(),
                    ));
                }
            }
        }
        for alert in alerts {
            self.emit(alert);
        }
    }

    fn count_error(
        &self,
        state: &mut SessionState,
        session_id: &str,
        now: Instant,
        alerts: &mut Vec<ObserverAlert>,
    ) {
        let window = Duration::from_secs(self.config.error_window_secs);
        state
            .error_times
            .retain(|t| now.duration_since(*t) < window);
        state.error_times.push_back(now);
        if state.error_times.len() >= self.config.error_count_threshold {
            let count = state.error_times.len();
            state.error_times.clear();
            alerts.push(self.make_alert(
                session_id,
                AlertKind::ErrorCascade,
                format!(
                    "{count} errors within {}s",
                    self.config.error_window_secs
                ),
            ));
        }
    }

    /// Time-driven stall sweep.  Returns the sessions that stalled since the
    /// last sweep (each stall episode alerts once).  Alerts are also pushed
    /// to the alert channel.
    pub fn check_stalls(&self) -> Vec<ObserverAlert> {
        if self.config.mode == ObserverMode::Disabled {
            return Vec::new();
        }
        let threshold = Duration::from_secs(self.config.stall_secs);
        let now = Instant::now();
        let mut out = Vec::new();
        {
            let mut sessions = self.sessions.lock().unwrap();
            for (session_id, state) in sessions.iter_mut() {
                let idle = state
                    .last_activity
                    .map(|t| now.duration_since(t))
                    .unwrap_or(Duration::ZERO);
                if state.last_was_tool_completion && !state.stall_alerted && idle >= threshold {
                    state.stall_alerted = true;
                    out.push(self.make_alert(
                        session_id,
                        AlertKind::SessionStall,
                        format!("no completed message for {}s after a tool result", idle.as_secs()),
                    ));
                }
            }
        }
        for alert in &out {
            self.emit(alert.clone());
        }
        out
    }

    /// Consume one intervention slot for a session.  Returns false when the
    /// observer is not in active mode or the per-session budget is spent.
    pub fn try_intervene(&self, session_id: &str) -> bool {
        if self.config.mode != ObserverMode::Active {
            return false;
        }
        let mut sessions = self.sessions.lock().unwrap();
        let state = sessions.entry(session_id.to_string()).or_default();
        if state.interventions_used >= self.config.max_interventions {
            warn!(session_id, "intervention budget exhausted");
            return false;
        }
        state.interventions_used += 1;
        debug!(
            session_id,
            used = state.interventions_used,
            "intervention granted"
        );
        true
    }

    pub fn interventions_used(&self, session_id: &str) -> usize {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .map(|s| s.interventions_used)
            .unwrap_or(0)
    }

    /// Drop per-session state when a session is destroyed.
    pub fn forget_session(&self, session_id: &str) {
        self.sessions.lock().unwrap().remove(session_id);
    }

    /// Snapshot for `monitoring.metrics`.
    pub fn metrics(&self) -> serde_json::Value {
        let totals = self.totals.lock().unwrap();
        let sessions = self.sessions.lock().unwrap();
        serde_json::json!({
            "sessions_observed": sessions.len(),
            "messages_completed": totals.messages_completed,
            "tools_invoked": totals.tools_invoked,
            "errors": totals.errors,
            "alerts": totals.alerts,
        })
    }

    /// Snapshot for `monitoring.health`.
    pub fn health(&self) -> serde_json::Value {
        serde_json::json!({
            "status": "ok",
            "observer_mode": match self.config.mode {
                ObserverMode::Passive => "passive",
                ObserverMode::Active => "active",
                ObserverMode::Disabled => "disabled",
            },
        })
    }

    fn make_alert(&self, session_id: &str, kind: AlertKind, message: String) -> ObserverAlert {
        ObserverAlert {
            session_id: session_id.to_string(),
            kind,
            message,
            at: Utc::now(),
        }
    }

    fn emit(&self, alert: ObserverAlert) {
        self.totals.lock().unwrap().alerts += 1;
        warn!(
            session_id = %alert.session_id,
            kind = ?alert.kind,
            "{}", alert.message
        );
        if let Some(path) = &self.config.alert_log {
            if let Ok(json) = serde_json::to_string(&alert) {
                let appended = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(path)
                    .and_then(|mut f| writeln!(f, "{json}"));
                if let Err(e) = appended {
                    warn!(path = %path.display(), "alert log append failed: {e}");
                }
            }
        }
        let _ = self.alert_tx.send(alert);
    }
}

/// Rolling-mean latency vs. the baseline of the first samples.  Alerts once
/// per sustained regression; the flag resets when latency recovers.
fn regression_message(
    latencies: &[Duration],
    factor: f64,
    alerted: &mut bool,
) -> Option<String> {
    if latencies.len() < BASELINE_SAMPLES + ROLLING_SAMPLES {
        return None;
    }
    let mean = |window: &[Duration]| -> f64 {
        window.iter().map(|d| d.as_secs_f64()).sum::<f64>() / window.len() as f64
    };
    let baseline = mean(&latencies[..BASELINE_SAMPLES]);
    let rolling = mean(&latencies[latencies.len() - ROLLING_SAMPLES..]);
    if baseline > 0.0 && rolling > factor * baseline {
        if *alerted {
            return None;
        }
        *alerted = true;
        Some(format!(
            "rolling latency {:.2}s exceeds {factor:.1}x baseline {:.2}s",
            rolling, baseline
        ))
    } else {
        *alerted = false;
        None
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(mode: ObserverMode) -> ObserverConfig {
        ObserverConfig {
            mode,
            stall_secs: 0,
            error_count_threshold: 3,
            error_window_secs: 60,
            loop_threshold: 3,
            loop_window_secs: 60,
            regression_factor: 2.0,
            max_interventions: 2,
            alert_log: None,
        }
    }

    fn observer(mode: ObserverMode) -> (Observer, mpsc::UnboundedReceiver<ObserverAlert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Observer::new(config(mode), tx), rx)
    }

    fn invoked(name: &str) -> ObserverEvent {
        ObserverEvent::ToolInvoked {
            name: name.into(),
            normalized_args: "{}".into(),
        }
    }

    #[test]
    fn error_cascade_fires_at_threshold() {
        let (obs, mut rx) = observer(ObserverMode::Passive);
        for _ in 0..3 {
            obs.record("s1", ObserverEvent::Error);
        }
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind, AlertKind::ErrorCascade);
        assert_eq!(alert.session_id, "s1");
    }

    #[test]
    fn errors_below_threshold_stay_silent() {
        let (obs, mut rx) = observer(ObserverMode::Passive);
        obs.record("s1", ObserverEvent::Error);
        obs.record("s1", ObserverEvent::Error);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn tool_loop_detected_on_identical_invocations() {
        let (obs, mut rx) = observer(ObserverMode::Passive);
        for _ in 0..3 {
            obs.record("s1", invoked("grep"));
        }
        let alert = rx.try_recv().unwrap();
        assert_eq!(alert.kind, AlertKind::ToolLoop);
        assert!(alert.message.contains("grep"));
    }

    #[test]
    fn different_arguments_do_not_count_as_loop() {
        let (obs, mut rx) = observer(ObserverMode::Passive);
        for i in 0..5 {
            obs.record(
                "s1",
                ObserverEvent::ToolInvoked {
                    name: "grep".into(),
                    normalized_args: format!("{{\"q\":{i}}}"),
                },
            );
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn empty_response_alerts_immediately() {
        let (obs, mut rx) = observer(ObserverMode::Passive);
        obs.record("s1", ObserverEvent::EmptyResponse);
        assert_eq!(rx.try_recv().unwrap().kind, AlertKind::EmptyResponse);
    }

    #[test]
    fn stall_requires_tool_completion_as_last_event() {
        let (obs, _rx) = observer(ObserverMode::Passive);
        obs.record("s1", ObserverEvent::MessageComplete);
        // stall_secs = 0, but the last event was not a tool completion.
        assert!(obs.check_stalls().is_empty());

        obs.record("s1", ObserverEvent::ToolCompleted { is_error: false });
        let stalls = obs.check_stalls();
        assert_eq!(stalls.len(), 1);
        assert_eq!(stalls[0].kind, AlertKind::SessionStall);
    }

    #[test]
    fn stall_episode_alerts_only_once() {
        let (obs, _rx) = observer(ObserverMode::Passive);
        obs.record("s1", ObserverEvent::ToolCompleted { is_error: false });
        assert_eq!(obs.check_stalls().len(), 1);
        assert!(obs.check_stalls().is_empty());
    }

    #[test]
    fn intervention_budget_enforced() {
        let (obs, _rx) = observer(ObserverMode::Active);
        assert!(obs.try_intervene("s1"));
        assert!(obs.try_intervene("s1"));
        assert!(!obs.try_intervene("s1"));
        assert_eq!(obs.interventions_used("s1"), 2);
    }

    #[test]
    fn passive_mode_never_intervenes() {
        let (obs, _rx) = observer(ObserverMode::Passive);
        assert!(!obs.try_intervene("s1"));
    }

    #[test]
    fn disabled_mode_records_nothing() {
        let (obs, mut rx) = observer(ObserverMode::Disabled);
        for _ in 0..10 {
            obs.record("s1", ObserverEvent::Error);
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn regression_detector_needs_enough_samples() {
        let mut alerted = false;
        let short: Vec<Duration> = (0..5).map(|_| Duration::from_secs(1)).collect();
        assert!(regression_message(&short, 2.0, &mut alerted).is_none());
    }

    #[test]
    fn regression_detected_when_rolling_mean_doubles() {
        let mut alerted = false;
        let mut latencies: Vec<Duration> =
            (0..10).map(|_| Duration::from_millis(100)).collect();
        latencies.extend((0..10).map(|_| Duration::from_millis(300)));
        let msg = regression_message(&latencies, 2.0, &mut alerted);
        assert!(msg.is_some());
        // Second evaluation of the same sustained regression stays silent.
        assert!(regression_message(&latencies, 2.0, &mut alerted).is_none());
    }

    #[test]
    fn alert_log_is_newline_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("alerts.jsonl");
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut cfg = config(ObserverMode::Passive);
        cfg.alert_log = Some(log_path.clone());
        let obs = Observer::new(cfg, tx);
        obs.record("s1", ObserverEvent::EmptyResponse);
        obs.record("s1", ObserverEvent::EmptyResponse);

        let text = std::fs::read_to_string(&log_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let v: serde_json::Value = serde_json::from_str(line).unwrap();
            assert_eq!(v["kind"], "empty_response");
        }
    }

    #[test]
    fn metrics_counts_accumulate() {
        let (obs, _rx) = observer(ObserverMode::Passive);
        obs.record("s1", ObserverEvent::MessageStart);
        obs.record("s1", ObserverEvent::MessageComplete);
        obs.record("s1", invoked("grep"));
        let m = obs.metrics();
        assert_eq!(m["messages_completed"], 1);
        assert_eq!(m["tools_invoked"], 1);
    }
}
