// Copyright (c) 2026 Troupe Contributors
//
// SPDX-License-Identifier: Apache-2.0
//! OpenAI-compatible chat completion driver.
//!
//! Any endpoint that speaks the `/chat/completions` SSE streaming wire
//! format works: hosted OpenAI, local llama.cpp / vLLM / Ollama servers,
//! and most aggregators.  The driver serializes conversation history into
//! the OpenAI message shape (tool calls coalesced onto one assistant
//! message), streams the response, and maps SSE chunks to
//! [`ResponseEvent`]s.

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::backend::ResponseStream;
use crate::{CompletionRequest, Message, ResponseEvent, Role, Usage};

pub struct OpenAiCompatBackend {
    model: String,
    /// Pre-resolved API key.  `None` for local servers without auth.
    api_key: Option<String>,
    chat_url: String,
    max_tokens: u32,
    temperature: f32,
    client: reqwest::Client,
}

impl OpenAiCompatBackend {
    /// `base_url` ends before `/chat/completions`, e.g.
    /// `https://api.openai.com/v1` or `http://localhost:8080/v1`.
    pub fn new(
        model: String,
        api_key: Option<String>,
        base_url: &str,
        max_tokens: Option<u32>,
        temperature: Option<f32>,
    ) -> Self {
        let base = base_url.trim_end_matches('/');
        Self {
            model,
            api_key,
            chat_url: format!("{base}/chat/completions"),
            max_tokens: max_tokens.unwrap_or(4096),
            temperature: temperature.unwrap_or(0.2),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl crate::LLMBackend for OpenAiCompatBackend {
    fn name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, req: CompletionRequest) -> anyhow::Result<ResponseStream> {
        let messages = build_wire_messages(&req.messages);

        let tools: Vec<Value> = req
            .tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.parameters,
                    }
                })
            })
            .collect();

        let mut body = json!({
            "model": req.model.as_deref().unwrap_or(&self.model),
            "messages": messages,
            "stream": true,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "temperature": req.temperature.unwrap_or(self.temperature),
            "stream_options": { "include_usage": true },
        });
        if !tools.is_empty() {
            body["tools"] = json!(tools);
        }

        debug!(
            model = %self.model,
            tool_count = tools.len(),
            message_count = req.messages.len(),
            "sending completion request"
        );

        let mut http_req = self.client.post(&self.chat_url).json(&body);
        if let Some(key) = self.api_key.as_deref() {
            http_req = http_req.bearer_auth(key);
        }

        let resp = http_req.send().await.context("backend request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("backend error {status}: {text}");
        }

        let byte_stream = resp.bytes_stream();
        // SSE events can be split across multiple TCP packets.  Maintain a
        // line buffer across chunks; emit events only for complete lines.
        let event_stream = byte_stream
            .scan(String::new(), |buf, chunk| {
                let events: Vec<anyhow::Result<ResponseEvent>> = match chunk {
                    Ok(b) => {
                        buf.push_str(&String::from_utf8_lossy(&b));
                        drain_complete_sse_lines(buf)
                    }
                    Err(e) => vec![Err(anyhow::anyhow!(e))],
                };
                std::future::ready(Some(events))
            })
            .flat_map(futures::stream::iter);

        Ok(Box::pin(event_stream))
    }
}

/// Drain all complete `\n`-terminated SSE lines from `buf`.
///
/// Any trailing incomplete line is left in `buf` so it can be extended by
/// the next TCP chunk.
pub(crate) fn drain_complete_sse_lines(buf: &mut String) -> Vec<anyhow::Result<ResponseEvent>> {
    let mut events = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(ev) = parse_sse_data_line(&line) {
            events.push(ev);
        }
    }
    events
}

/// Parse a single complete SSE `data:` line into a [`ResponseEvent`].
///
/// Returns `None` for empty lines, comment lines, or unparseable data.
fn parse_sse_data_line(line: &str) -> Option<anyhow::Result<ResponseEvent>> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(Ok(ResponseEvent::Done));
    }
    let v: Value = serde_json::from_str(data).ok()?;
    Some(Ok(parse_sse_chunk(&v)))
}

fn parse_sse_chunk(v: &Value) -> ResponseEvent {
    // Usage-only chunk (emitted when stream_options.include_usage = true).
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        let prompt = usage["prompt_tokens"].as_u64().unwrap_or(0) as u32;
        let completion = usage["completion_tokens"].as_u64().unwrap_or(0) as u32;
        let total = usage["total_tokens"]
            .as_u64()
            .map(|t| t as u32)
            .unwrap_or(prompt + completion);
        return ResponseEvent::Usage(Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: total,
            cost: 0.0,
        });
    }

    let delta = &v["choices"][0]["delta"];

    // Tool call delta — the backend may stream multiple parallel tool calls,
    // each identified by an "index" field that routes accumulation.
    if let Some(tc) = delta.get("tool_calls").and_then(|t| t.get(0)) {
        return ResponseEvent::ToolCallChunk {
            index: tc["index"].as_u64().unwrap_or(0) as u32,
            id: tc["id"].as_str().unwrap_or("").to_string(),
            name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
            arguments: tc["function"]["arguments"]
                .as_str()
                .unwrap_or("")
                .to_string(),
        };
    }

    // Reasoning delta — two common field names for chain-of-thought text:
    //   • `reasoning_content` — llama.cpp, Qwen3, DeepSeek-R1
    //   • `reasoning`         — some aggregators
    let reasoning = delta
        .get("reasoning_content")
        .and_then(|c| c.as_str())
        .or_else(|| delta.get("reasoning").and_then(|c| c.as_str()));
    if let Some(r) = reasoning {
        if !r.is_empty() {
            return ResponseEvent::ReasoningDelta(r.to_string());
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        return ResponseEvent::TextDelta(text.to_string());
    }

    ResponseEvent::TextDelta(String::new())
}

/// Convert conversation history into the OpenAI wire-format JSON array.
///
/// Extracted as a free function so it can be unit-tested without HTTP.
pub(crate) fn build_wire_messages(messages: &[Message]) -> Vec<Value> {
    let mut out = Vec::with_capacity(messages.len());
    for m in messages {
        match m.role {
            Role::System => out.push(json!({ "role": "system", "content": m.content })),
            Role::User => out.push(json!({ "role": "user", "content": m.content })),
            Role::Assistant => {
                let mut msg = json!({ "role": "assistant", "content": m.content });
                if !m.tool_calls.is_empty() {
                    let calls: Vec<Value> = m
                        .tool_calls
                        .iter()
                        .map(|c| {
                            json!({
                                "id": c.id,
                                "type": "function",
                                "function": { "name": c.name, "arguments": c.arguments },
                            })
                        })
                        .collect();
                    msg["tool_calls"] = json!(calls);
                    // The API rejects null content alongside tool_calls on
                    // some servers; an empty string is always accepted.
                    if m.content.is_empty() {
                        msg["content"] = json!("");
                    }
                }
                out.push(msg);
            }
            Role::Tool => out.push(json!({
                "role": "tool",
                "tool_call_id": m.tool_call_id.as_deref().unwrap_or(""),
                "content": m.content,
            })),
        }
    }
    out
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ToolCallRecord;

    #[test]
    fn wire_messages_map_roles() {
        let msgs = vec![
            Message::system("sys"),
            Message::user("hi"),
            Message::assistant("hello"),
        ];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "system");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[2]["role"], "assistant");
    }

    #[test]
    fn wire_messages_coalesce_tool_calls_onto_assistant() {
        let msgs = vec![Message::assistant_with_calls(
            "",
            vec![
                ToolCallRecord {
                    id: "a".into(),
                    name: "t1".into(),
                    arguments: "{}".into(),
                },
                ToolCallRecord {
                    id: "b".into(),
                    name: "t2".into(),
                    arguments: "{}".into(),
                },
            ],
        )];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["tool_calls"].as_array().unwrap().len(), 2);
        assert_eq!(wire[0]["content"], "");
    }

    #[test]
    fn wire_messages_tool_role_carries_call_id() {
        let msgs = vec![Message::tool_result("call-1", "{\"success\":true}")];
        let wire = build_wire_messages(&msgs);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["tool_call_id"], "call-1");
    }

    #[test]
    fn sse_done_sentinel_maps_to_done() {
        let mut buf = "data: [DONE]\n".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Ok(ResponseEvent::Done)));
    }

    #[test]
    fn sse_partial_line_left_in_buffer() {
        let mut buf = "data: {\"choices\"".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert!(events.is_empty());
        assert_eq!(buf, "data: {\"choices\"");
    }

    #[test]
    fn sse_text_delta_parsed() {
        let mut buf =
            "data: {\"choices\":[{\"delta\":{\"content\":\"hi\"}}]}\n".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert!(matches!(&events[0], Ok(ResponseEvent::TextDelta(t)) if t == "hi"));
    }

    #[test]
    fn sse_tool_call_chunk_parsed_with_index() {
        let mut buf = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,",
            "\"id\":\"tc1\",\"function\":{\"name\":\"grep\",\"arguments\":\"{\\\"q\\\"\"}}]}}]}\n"
        )
        .to_string();
        let events = drain_complete_sse_lines(&mut buf);
        match &events[0] {
            Ok(ResponseEvent::ToolCallChunk {
                index,
                id,
                name,
                arguments,
            }) => {
                assert_eq!(*index, 1);
                assert_eq!(id, "tc1");
                assert_eq!(name, "grep");
                assert_eq!(arguments, "{\"q\"");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn sse_usage_chunk_parsed() {
        let mut buf =
            "data: {\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n"
                .to_string();
        let events = drain_complete_sse_lines(&mut buf);
        match &events[0] {
            Ok(ResponseEvent::Usage(u)) => {
                assert_eq!(u.prompt_tokens, 10);
                assert_eq!(u.completion_tokens, 5);
                assert_eq!(u.total_tokens, 15);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn sse_reasoning_delta_parsed() {
        let mut buf =
            "data: {\"choices\":[{\"delta\":{\"reasoning_content\":\"thinking\"}}]}\n".to_string();
        let events = drain_complete_sse_lines(&mut buf);
        assert!(matches!(&events[0], Ok(ResponseEvent::ReasoningDelta(t)) if t == "thinking"));
    }
}
