// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Synchronous handoff: a `send_mail` whose recipient resolves to a known
//! agent is intercepted before it reaches the generic mailbox tool.  The
//! message is delivered, control transfers to the recipient for one full
//! turn, and the recipient's final text comes back to the sender inside the
//! tool result so it can react.
//!
//! Unknown recipients fall through to the generic tool (stored for later
//! pickup).  A recipient turn that errors reverts the active agent and
//! reports the failure as the tool result.

use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use troupe_mail::{Envelope, Priority};
use troupe_observer::ObserverEvent;
use troupe_tools::ToolOutput;

use crate::events::SessionEvent;
use crate::runtime::FinishedCall;
use crate::session::{cancel_requested, Session};

/// Mail loops between agents (A asks B, B asks A, …) bottom out here and
/// fall back to an ordinary queued send.
const MAX_HANDOFF_DEPTH: u32 = 4;

impl Session {
    /// Intercept a `send_mail` call when the recipient is a known agent.
    /// Returns `None` when the call should take the generic tool path.
    pub(crate) async fn try_handoff(
        &mut self,
        sender_id: &str,
        call: &FinishedCall,
        cancel: &mut oneshot::Receiver<()>,
    ) -> Option<ToolOutput> {
        if call.record.name != "send_mail" {
            return None;
        }
        let args = call.parsed.as_ref().ok()?;
        let to = args.get("to_agent")?.as_str()?;
        let body = args.get("body")?.as_str()?.to_string();
        let recipient = self.services().agents.resolve(to)?.clone();

        // Mail to self is not a handoff; let it queue normally.
        if recipient.id == sender_id {
            return None;
        }
        if self.handoff_depth >= MAX_HANDOFF_DEPTH {
            warn!(
                session_id = %self.id,
                sender = sender_id,
                recipient = %recipient.id,
                "handoff depth limit reached; queueing instead"
            );
            return None;
        }

        let subject = args
            .get("subject")
            .and_then(|s| s.as_str())
            .unwrap_or("(no subject)")
            .to_string();
        let priority = args
            .get("priority")
            .and_then(|p| p.as_str())
            .and_then(Priority::parse)
            .unwrap_or(Priority::Normal);

        let sender_name = self
            .services()
            .agents
            .get(sender_id)
            .map(|a| a.name.clone())
            .unwrap_or_else(|| sender_id.to_string());

        // Deliver on behalf of the sender before transferring control, so
        // the recipient's check_mail sees the message.
        let message_id = self.services().mailbox.send(Envelope {
            from: sender_id.to_string(),
            to: recipient.id.clone(),
            subject,
            body,
            priority,
            in_reply_to: None,
        });
        debug!(
            session_id = %self.id,
            sender = sender_id,
            recipient = %recipient.id,
            message_id = %message_id,
            "synchronous handoff"
        );

        self.set_active(&recipient.id);
        self.emit(SessionEvent::AgentSwitched {
            from: sender_id.to_string(),
            to: recipient.id.clone(),
        });
        self.observe(ObserverEvent::AgentSwitched);

        let synthetic = format!(
            "You have received mail from {sender_name}. Check your mailbox."
        );
        self.handoff_depth += 1;
        let turn = self
            .run_turn(&recipient.id, &synthetic, cancel, true)
            .await;
        self.handoff_depth -= 1;

        // The active agent always reverts, whatever happened to the turn.
        self.set_active(sender_id);
        self.emit(SessionEvent::AgentSwitched {
            from: recipient.id.clone(),
            to: sender_id.to_string(),
        });
        self.observe(ObserverEvent::AgentSwitched);

        let output = match turn {
            Ok(_) if cancel_requested(cancel) => {
                // Recipient's partial assistant message is already in its
                // history; the sender sees the synthesized cancellation.
                ToolOutput::err(&call.record.id, "cancelled")
            }
            Ok(reply) => ToolOutput::ok(
                &call.record.id,
                json!({
                    "delivered_to": recipient.id,
                    "message_id": message_id,
                    "response": reply,
                }),
            ),
            Err(e) => {
                let mut fields = serde_json::Map::new();
                fields.insert("delivered_to".to_string(), json!(recipient.id));
                fields.insert("message_id".to_string(), json!(message_id));
                ToolOutput::err_with(
                    &call.record.id,
                    format!("handoff failed: {e}"),
                    fields,
                )
            }
        };
        Some(output)
    }
}
