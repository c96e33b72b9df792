// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Process-wide message store for inter-agent mail.
//!
//! The mailbox is a leaf: both tools and the agent core depend on it, so it
//! must not depend on either.  Deliveries are keyed by recipient and are
//! never lost — a message sent to an agent that has not been instantiated
//! yet stays queued until the recipient checks.
//!
//! Ordering: FIFO within one recipient and one priority lane; across lanes,
//! higher priority drains first.  Messages become visible the moment
//! [`Mailbox::send`] returns.
//!
//! Read lifecycle: the first `check` returns a message in `Unread` state and
//! marks it read; a later `check` returns it as `Read` and then archives it,
//! unless its priority is high or urgent (those stay until archived
//! explicitly).

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "normal" => Some(Self::Normal),
            "high" => Some(Self::High),
            "urgent" => Some(Self::Urgent),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailStatus {
    Unread,
    Read,
    Archived,
}

/// A delivered message as seen by the recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MailMessage {
    pub id: String,
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    /// Id of the message this one replies to, for threading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_reply_to: Option<String>,
    pub status: MailStatus,
    pub sent_at: DateTime<Utc>,
}

/// Fields supplied by the sender.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
    pub priority: Priority,
    pub in_reply_to: Option<String>,
}

struct Stored {
    msg: MailMessage,
    /// Monotonic sequence for FIFO ordering within a lane.
    seq: u64,
}

#[derive(Default)]
struct Inner {
    seq: u64,
    /// Keyed by lowercased recipient.
    boxes: HashMap<String, Vec<Stored>>,
}

/// Process-wide mailbox.  Construct once at startup, share via `Arc`.
pub struct Mailbox {
    inner: Mutex<Inner>,
    warn_depth: usize,
}

impl Default for Mailbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Mailbox {
    pub fn new() -> Self {
        Self::with_warn_depth(256)
    }

    pub fn with_warn_depth(warn_depth: usize) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            warn_depth,
        }
    }

    /// Deliver a message.  Returns the message id.
    pub fn send(&self, env: Envelope) -> String {
        let id = Uuid::new_v4().to_string();
        let key = env.to.to_ascii_lowercase();
        let msg = MailMessage {
            id: id.clone(),
            from: env.from,
            to: env.to,
            subject: env.subject,
            body: env.body,
            priority: env.priority,
            in_reply_to: env.in_reply_to,
            status: MailStatus::Unread,
            sent_at: Utc::now(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner.seq += 1;
        let seq = inner.seq;
        let queue = inner.boxes.entry(key).or_default();
        queue.push(Stored { msg, seq });
        if queue.len() > self.warn_depth {
            warn!(
                to = %queue.last().unwrap().msg.to,
                depth = queue.len(),
                "mailbox depth exceeds warn threshold"
            );
        }
        debug!(message_id = %id, "mail delivered");
        id
    }

    /// Return the recipient's visible messages, highest priority lane first,
    /// FIFO within a lane, advancing the read lifecycle as described in the
    /// module docs.
    pub fn check(&self, to: &str, unread_only: bool) -> Vec<MailMessage> {
        let key = to.to_ascii_lowercase();
        let mut inner = self.inner.lock().unwrap();
        let queue = match inner.boxes.get_mut(&key) {
            Some(q) => q,
            None => return Vec::new(),
        };

        let mut visible: Vec<&mut Stored> = queue
            .iter_mut()
            .filter(|s| s.msg.status != MailStatus::Archived)
            .filter(|s| !unread_only || s.msg.status == MailStatus::Unread)
            .collect();
        // Higher priority lane first, then send order within a lane.
        visible.sort_by(|a, b| b.msg.priority.cmp(&a.msg.priority).then(a.seq.cmp(&b.seq)));

        let mut out = Vec::with_capacity(visible.len());
        for s in visible {
            out.push(s.msg.clone());
            match s.msg.status {
                MailStatus::Unread => s.msg.status = MailStatus::Read,
                MailStatus::Read if s.msg.priority < Priority::High => {
                    s.msg.status = MailStatus::Archived;
                }
                _ => {}
            }
        }
        out
    }

    /// Reply to a message.  Threads via `in_reply_to`, inherits the original
    /// priority, and swaps sender/recipient.  Returns `None` when the
    /// original message id is unknown.
    pub fn reply(&self, message_id: &str, from: &str, body: &str) -> Option<String> {
        let original = self.find(message_id)?;
        Some(self.send(Envelope {
            from: from.to_string(),
            to: original.from,
            subject: format!("Re: {}", original.subject),
            body: body.to_string(),
            priority: original.priority,
            in_reply_to: Some(message_id.to_string()),
        }))
    }

    /// Mark a message archived.  Returns false when the id is unknown.
    pub fn archive(&self, message_id: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        for queue in inner.boxes.values_mut() {
            if let Some(s) = queue.iter_mut().find(|s| s.msg.id == message_id) {
                s.msg.status = MailStatus::Archived;
                return true;
            }
        }
        false
    }

    /// List messages for a recipient without advancing the read lifecycle.
    pub fn list(&self, to: &str, status: Option<MailStatus>) -> Vec<MailMessage> {
        let key = to.to_ascii_lowercase();
        let inner = self.inner.lock().unwrap();
        let queue = match inner.boxes.get(&key) {
            Some(q) => q,
            None => return Vec::new(),
        };
        let mut out: Vec<(u64, MailMessage)> = queue
            .iter()
            .filter(|s| status.map(|st| s.msg.status == st).unwrap_or(true))
            .map(|s| (s.seq, s.msg.clone()))
            .collect();
        out.sort_by(|a, b| b.1.priority.cmp(&a.1.priority).then(a.0.cmp(&b.0)));
        out.into_iter().map(|(_, m)| m).collect()
    }

    /// Number of unread messages waiting for a recipient.
    pub fn unread_count(&self, to: &str) -> usize {
        let key = to.to_ascii_lowercase();
        let inner = self.inner.lock().unwrap();
        inner
            .boxes
            .get(&key)
            .map(|q| {
                q.iter()
                    .filter(|s| s.msg.status == MailStatus::Unread)
                    .count()
            })
            .unwrap_or(0)
    }

    fn find(&self, message_id: &str) -> Option<MailMessage> {
        let inner = self.inner.lock().unwrap();
        inner
            .boxes
            .values()
            .flat_map(|q| q.iter())
            .find(|s| s.msg.id == message_id)
            .map(|s| s.msg.clone())
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
