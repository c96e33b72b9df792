// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! Mailbox tools.
//!
//! `send_mail` here is the generic path: it stores the message for later
//! pickup and reports `delivered_to: null, queued: true`.  When the
//! recipient resolves to a known agent, the switch handler in the core
//! intercepts the call before it reaches this tool and performs the
//! synchronous handoff instead.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use troupe_mail::{Envelope, Mailbox, Priority};

use crate::tool::{InvocationContext, Tool, ToolCall, ToolOutput};

pub struct SendMailTool {
    mailbox: Arc<Mailbox>,
}

impl SendMailTool {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for SendMailTool {
    fn name(&self) -> &str {
        "send_mail"
    }

    fn description(&self) -> &str {
        "Sends a message to another agent's mailbox. Use the agent's name or \
         id as to_agent. The recipient processes the message on its next turn."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "to_agent": {
                    "type": "string",
                    "description": "Recipient agent name or id"
                },
                "subject": {
                    "type": "string",
                    "description": "Short subject line"
                },
                "body": {
                    "type": "string",
                    "description": "Message body"
                },
                "priority": {
                    "type": "string",
                    "enum": ["low", "normal", "high", "urgent"],
                    "description": "Delivery priority (default normal)"
                }
            },
            "required": ["to_agent", "body"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["mail", "communication"]
    }

    fn category(&self) -> &str {
        "communication"
    }

    async fn execute(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput {
        let to = match call.args.get("to_agent").and_then(|v| v.as_str()) {
            Some(t) => t.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'to_agent'"),
        };
        let body = match call.args.get("body").and_then(|v| v.as_str()) {
            Some(b) => b.to_string(),
            None => return ToolOutput::err(&call.id, "missing required parameter 'body'"),
        };
        let subject = call
            .args
            .get("subject")
            .and_then(|v| v.as_str())
            .unwrap_or("(no subject)")
            .to_string();
        let priority = call
            .args
            .get("priority")
            .and_then(|v| v.as_str())
            .and_then(Priority::parse)
            .unwrap_or(Priority::Normal);

        debug!(from = %ctx.agent_id, to = %to, "send_mail tool");
        let message_id = self.mailbox.send(Envelope {
            from: ctx.agent_id.clone(),
            to,
            subject,
            body,
            priority,
            in_reply_to: None,
        });

        ToolOutput::ok(
            &call.id,
            json!({
                "message_id": message_id,
                "delivered_to": Value::Null,
                "queued": true,
            }),
        )
    }
}

pub struct CheckMailTool {
    mailbox: Arc<Mailbox>,
}

impl CheckMailTool {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for CheckMailTool {
    fn name(&self) -> &str {
        "check_mail"
    }

    fn description(&self) -> &str {
        "Checks your mailbox. Returns waiting messages, highest priority \
         first, and marks them read."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "unread_only": {
                    "type": "boolean",
                    "description": "Only return messages not yet read (default false)"
                }
            },
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["mail", "communication"]
    }

    fn category(&self) -> &str {
        "communication"
    }

    async fn execute(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput {
        if ctx.agent_id.is_empty() {
            return ToolOutput::err(&call.id, "check_mail requires an agent context");
        }
        let unread_only = call
            .args
            .get("unread_only")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let messages = self.mailbox.check(&ctx.agent_id, unread_only);
        let items: Vec<Value> = messages
            .iter()
            .map(|m| serde_json::to_value(m).unwrap_or(Value::Null))
            .collect();

        let count = items.len();
        ToolOutput::ok(
            &call.id,
            json!({ "messages": items, "count": count }),
        )
    }
}

pub struct ReplyMailTool {
    mailbox: Arc<Mailbox>,
}

impl ReplyMailTool {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for ReplyMailTool {
    fn name(&self) -> &str {
        "reply_mail"
    }

    fn description(&self) -> &str {
        "Replies to a message you received. Threads the reply and sends it \
         back to the original sender."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message_id": {
                    "type": "string",
                    "description": "Id of the message being answered"
                },
                "body": {
                    "type": "string",
                    "description": "Reply body"
                }
            },
            "required": ["message_id", "body"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["mail", "communication"]
    }

    fn category(&self) -> &str {
        "communication"
    }

    async fn execute(&self, call: &ToolCall, ctx: &InvocationContext) -> ToolOutput {
        let message_id = match call.args.get("message_id").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => return ToolOutput::err(&call.id, "missing required parameter 'message_id'"),
        };
        let body = match call.args.get("body").and_then(|v| v.as_str()) {
            Some(b) => b,
            None => return ToolOutput::err(&call.id, "missing required parameter 'body'"),
        };

        match self.mailbox.reply(message_id, &ctx.agent_id, body) {
            Some(reply_id) => ToolOutput::ok(&call.id, json!({ "message_id": reply_id })),
            None => {
                let mut fields = serde_json::Map::new();
                fields.insert("message_id".to_string(), json!(message_id));
                ToolOutput::err_with(&call.id, "unknown message id", fields)
            }
        }
    }
}

pub struct ArchiveMailTool {
    mailbox: Arc<Mailbox>,
}

impl ArchiveMailTool {
    pub fn new(mailbox: Arc<Mailbox>) -> Self {
        Self { mailbox }
    }
}

#[async_trait]
impl Tool for ArchiveMailTool {
    fn name(&self) -> &str {
        "archive_mail"
    }

    fn description(&self) -> &str {
        "Archives a message so it no longer appears when checking mail."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message_id": {
                    "type": "string",
                    "description": "Id of the message to archive"
                }
            },
            "required": ["message_id"],
            "additionalProperties": false
        })
    }

    fn tags(&self) -> &[&str] {
        &["mail", "communication"]
    }

    fn category(&self) -> &str {
        "communication"
    }

    async fn execute(&self, call: &ToolCall, _ctx: &InvocationContext) -> ToolOutput {
        let message_id = match call.args.get("message_id").and_then(|v| v.as_str()) {
            Some(id) => id,
            None => return ToolOutput::err(&call.id, "missing required parameter 'message_id'"),
        };
        if self.mailbox.archive(message_id) {
            ToolOutput::ok(&call.id, json!({ "message_id": message_id }))
        } else {
            ToolOutput::err(&call.id, "unknown message id")
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Value) -> ToolCall {
        ToolCall {
            id: "m1".into(),
            name: name.into(),
            args,
        }
    }

    #[tokio::test]
    async fn send_mail_queues_and_reports_null_delivery() {
        let mb = Arc::new(Mailbox::new());
        let tool = SendMailTool::new(mb.clone());
        let out = tool
            .execute(
                &call("send_mail", json!({ "to_agent": "debbie", "body": "hi" })),
                &InvocationContext::new("s", "a"),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.result["delivered_to"], Value::Null);
        assert_eq!(out.result["queued"], json!(true));
        assert_eq!(mb.unread_count("debbie"), 1);
    }

    #[tokio::test]
    async fn check_mail_uses_calling_agent_identity() {
        let mb = Arc::new(Mailbox::new());
        mb.send(Envelope {
            from: "a".into(),
            to: "d".into(),
            subject: "s".into(),
            body: "please check".into(),
            priority: Priority::Normal,
            in_reply_to: None,
        });
        let tool = CheckMailTool::new(mb);
        let out = tool
            .execute(
                &call("check_mail", json!({})),
                &InvocationContext::new("s", "d"),
            )
            .await;
        assert!(!out.is_error);
        assert_eq!(out.result["count"], json!(1));
        assert_eq!(out.result["messages"][0]["body"], json!("please check"));
    }

    #[tokio::test]
    async fn check_mail_without_agent_context_is_error() {
        let tool = CheckMailTool::new(Arc::new(Mailbox::new()));
        let out = tool
            .execute(&call("check_mail", json!({})), &InvocationContext::default())
            .await;
        assert!(out.is_error);
    }

    #[tokio::test]
    async fn reply_mail_round_trip() {
        let mb = Arc::new(Mailbox::new());
        let original = mb.send(Envelope {
            from: "alice".into(),
            to: "debbie".into(),
            subject: "q".into(),
            body: "?".into(),
            priority: Priority::Normal,
            in_reply_to: None,
        });
        let tool = ReplyMailTool::new(mb.clone());
        let out = tool
            .execute(
                &call(
                    "reply_mail",
                    json!({ "message_id": original, "body": "answer" }),
                ),
                &InvocationContext::new("s", "debbie"),
            )
            .await;
        assert!(!out.is_error);
        let back = mb.check("alice", false);
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].body, "answer");
    }

    #[tokio::test]
    async fn archive_mail_unknown_id_is_error() {
        let tool = ArchiveMailTool::new(Arc::new(Mailbox::new()));
        let out = tool
            .execute(
                &call("archive_mail", json!({ "message_id": "nope" })),
                &InvocationContext::default(),
            )
            .await;
        assert!(out.is_error);
    }
}
