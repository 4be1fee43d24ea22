//! Interceptor for the named-event SSE dialect (`message_start`,
//! `content_block_start`, `content_block_delta`, `content_block_stop`,
//! `message_stop`).
//!
//! Tool-use blocks are buffered from start to stop; everything else
//! passes through immediately. A blocked call's buffered events are
//! discarded and replaced with a synthesized text block at the same
//! index, so no fragment of the original arguments reaches downstream.

use std::collections::BTreeMap;

use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use super::frame::SseFrame;
use super::reassembler::ToolCall;
use super::reassembler::ToolCallBuffer;

pub(crate) fn blocked_message(tool_name: &str, result: &PolicyResult) -> String {
    format!(
        "[BLOCKED by chainwatch] {tool_name}: {} (policy: {})",
        result.reason, result.policy_id
    )
}

pub struct AnthropicInterceptor<F> {
    buffer: ToolCallBuffer,
    held: BTreeMap<u64, Vec<SseFrame>>,
    decide: F,
}

impl<F> AnthropicInterceptor<F>
where
    F: FnMut(&ToolCall) -> PolicyResult,
{
    pub fn new(decide: F) -> Self {
        Self {
            buffer: ToolCallBuffer::default(),
            held: BTreeMap::new(),
            decide,
        }
    }

    /// Feed one upstream frame; returns the frames to emit downstream
    /// (possibly none while a tool call is buffering).
    pub fn push_frame(&mut self, frame: SseFrame) -> Vec<SseFrame> {
        let Some(value) = frame.json() else {
            return vec![frame];
        };
        let event_type = frame
            .event
            .clone()
            .or_else(|| value.get("type").and_then(Value::as_str).map(str::to_string));
        let index = value.get("index").and_then(Value::as_u64).unwrap_or(0);

        match event_type.as_deref() {
            Some("content_block_start") => {
                let block = value.get("content_block");
                let is_tool_use = block
                    .and_then(|b| b.get("type"))
                    .and_then(Value::as_str)
                    == Some("tool_use");
                if !is_tool_use {
                    return vec![frame];
                }
                let id = block
                    .and_then(|b| b.get("id"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let name = block
                    .and_then(|b| b.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                self.buffer.start(index, id, name);
                self.held.insert(index, vec![frame]);
                Vec::new()
            }
            Some("content_block_delta") if self.buffer.is_buffering(index) => {
                let fragment = value
                    .get("delta")
                    .and_then(|d| d.get("partial_json"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                // Once the call is over the byte cap, later deltas are
                // dropped entirely so the held buffer stops growing too.
                if self.buffer.append(index, fragment)
                    && let Some(held) = self.held.get_mut(&index)
                {
                    held.push(frame);
                }
                Vec::new()
            }
            Some("content_block_stop") if self.buffer.is_buffering(index) => {
                let Some(call) = self.buffer.complete(index) else {
                    return vec![frame];
                };
                let mut held = self.held.remove(&index).unwrap_or_default();
                held.push(frame);

                let result = (self.decide)(&call);
                debug!(
                    tool = %call.name,
                    decision = %result.decision,
                    policy_id = %result.policy_id,
                    "tool call decided"
                );
                match result.decision {
                    Decision::Allow | Decision::AllowWithRedaction => held,
                    Decision::RewriteOutput => {
                        let text = result.output_rewrite.clone().unwrap_or_default();
                        synthesize_text_block(index, &text)
                    }
                    Decision::Deny | Decision::RequireApproval => {
                        synthesize_text_block(index, &blocked_message(&call.name, &result))
                    }
                }
            }
            _ => vec![frame],
        }
    }

    /// Drop all per-stream buffers (caller cancelled or stream ended).
    pub fn cancel(&mut self) {
        self.buffer.clear();
        self.held.clear();
    }
}

/// The replacement triple for a rewritten block: a text block start, one
/// text delta carrying the message, and a stop, all at the original
/// index.
fn synthesize_text_block(index: u64, text: &str) -> Vec<SseFrame> {
    vec![
        SseFrame::synthetic(
            Some("content_block_start"),
            &json!({
                "type": "content_block_start",
                "index": index,
                "content_block": {"type": "text", "text": ""},
            }),
        ),
        SseFrame::synthetic(
            Some("content_block_delta"),
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": text},
            }),
        ),
        SseFrame::synthetic(
            Some("content_block_stop"),
            &json!({
                "type": "content_block_stop",
                "index": index,
            }),
        ),
    ]
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use chainwatch_protocol::PolicyResult;
    use pretty_assertions::assert_eq;

    use super::*;

    fn frame(event: &str, data: Value) -> SseFrame {
        SseFrame::synthetic(Some(event), &data)
    }

    fn tool_use_stream(fragments: &[&str]) -> Vec<SseFrame> {
        let mut frames = vec![frame(
            "content_block_start",
            json!({
                "type": "content_block_start",
                "index": 1,
                "content_block": {"type": "tool_use", "id": "toolu_1", "name": "run_command"},
            }),
        )];
        for fragment in fragments {
            frames.push(frame(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": 1,
                    "delta": {"type": "input_json_delta", "partial_json": fragment},
                }),
            ));
        }
        frames.push(frame(
            "content_block_stop",
            json!({"type": "content_block_stop", "index": 1}),
        ));
        frames
    }

    #[test]
    fn allowed_call_replays_original_frames_in_order() {
        let mut interceptor =
            AnthropicInterceptor::new(|_call| PolicyResult::allow(0, "ok", "tier.guarded.allow"));
        let input = tool_use_stream(&["{\"command\":", "\"ls\"}"]);
        let mut out = Vec::new();
        for f in input.clone() {
            out.extend(interceptor.push_frame(f));
        }
        assert_eq!(out, input);
    }

    #[test]
    fn blocked_call_is_replaced_and_no_fragment_leaks() {
        let mut seen_name = String::new();
        let mut interceptor = AnthropicInterceptor::new(|call: &ToolCall| {
            seen_name = call.name.clone();
            assert_eq!(
                call.arguments.get("command").and_then(Value::as_str),
                Some("rm -rf /")
            );
            PolicyResult::deny(3, "resource matches denylist", "denylist.block")
        });

        // The argument JSON arrives fragmented across five deltas.
        let input = tool_use_stream(&["{\"com", "mand\"", ":\"rm ", "-rf ", "/\"}"]);
        let mut out = Vec::new();
        for f in input {
            out.extend(interceptor.push_frame(f));
        }
        drop(interceptor);

        assert_eq!(seen_name, "run_command");
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].event.as_deref(), Some("content_block_start"));
        assert_eq!(out[1].event.as_deref(), Some("content_block_delta"));
        assert_eq!(out[2].event.as_deref(), Some("content_block_stop"));

        let combined: String = out.iter().map(|f| f.raw.as_str()).collect();
        assert!(combined.contains(
            "[BLOCKED by chainwatch] run_command: resource matches denylist (policy: denylist.block)"
        ));
        assert!(!combined.contains("rm -rf"));
        assert!(!combined.contains("partial_json"));
        // The synthesized block sits at the original index.
        assert!(combined.contains("\"index\":1"));
    }

    #[test]
    fn non_tool_frames_pass_through_immediately() {
        let mut interceptor = AnthropicInterceptor::new(|_call: &ToolCall| {
            panic!("no tool call should complete");
        });
        let frames = vec![
            frame("message_start", json!({"type": "message_start"})),
            frame(
                "content_block_start",
                json!({
                    "type": "content_block_start",
                    "index": 0,
                    "content_block": {"type": "text", "text": ""},
                }),
            ),
            frame(
                "content_block_delta",
                json!({
                    "type": "content_block_delta",
                    "index": 0,
                    "delta": {"type": "text_delta", "text": "hello"},
                }),
            ),
            frame("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
            frame("message_stop", json!({"type": "message_stop"})),
        ];
        for f in frames.clone() {
            assert_eq!(interceptor.push_frame(f.clone()), vec![f]);
        }
    }

    #[test]
    fn rewrite_output_uses_the_rewrite_text() {
        let mut interceptor = AnthropicInterceptor::new(|_call: &ToolCall| {
            PolicyResult::new(
                Decision::RewriteOutput,
                1,
                "rewritten",
                "purpose.*.rewrite",
            )
            .with_output_rewrite("redacted summary")
        });
        let mut out = Vec::new();
        for f in tool_use_stream(&["{}"]) {
            out.extend(interceptor.push_frame(f));
        }
        let combined: String = out.iter().map(|f| f.raw.as_str()).collect();
        assert!(combined.contains("redacted summary"));
        assert!(!combined.contains("BLOCKED"));
    }

    #[test]
    fn malformed_arguments_still_reach_the_decider() {
        let mut parse_error = None;
        let mut interceptor = AnthropicInterceptor::new(|call: &ToolCall| {
            parse_error = call.parse_error;
            PolicyResult::allow(1, "ok", "tier.guarded.allow")
        });
        for f in tool_use_stream(&["{\"oops\""]) {
            interceptor.push_frame(f);
        }
        drop(interceptor);
        assert_eq!(
            parse_error,
            Some(super::super::reassembler::ParseError::Malformed)
        );
    }
}
