//! Interceptor for the unnamed `data:` chunk dialect with
//! `choices[].delta.tool_calls[]` arrays and a terminal `data: [DONE]`.
//!
//! Argument fragments accumulate per tool-call index until a chunk with
//! `finish_reason: "tool_calls"` lands. On allow, the held chunks replay
//! byte-for-byte; on block, the whole held run is dropped and replaced
//! with one content chunk per rewritten call plus a `finish_reason:
//! "stop"` chunk. `[DONE]` always passes through from upstream.

use chainwatch_protocol::Decision;
use chainwatch_protocol::PolicyResult;
use serde_json::Value;
use serde_json::json;
use tracing::debug;

use super::anthropic::blocked_message;
use super::frame::SseFrame;
use super::reassembler::ToolCall;
use super::reassembler::ToolCallBuffer;

pub struct OpenAiInterceptor<F> {
    buffer: ToolCallBuffer,
    held: Vec<SseFrame>,
    decide: F,
}

impl<F> OpenAiInterceptor<F>
where
    F: FnMut(&ToolCall) -> PolicyResult,
{
    pub fn new(decide: F) -> Self {
        Self {
            buffer: ToolCallBuffer::default(),
            held: Vec::new(),
            decide,
        }
    }

    pub fn push_frame(&mut self, frame: SseFrame) -> Vec<SseFrame> {
        if frame.is_done() {
            return vec![frame];
        }
        let Some(value) = frame.json() else {
            return vec![frame];
        };
        let Some(choice) = value
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|c| c.first())
        else {
            return vec![frame];
        };

        let tool_calls = choice
            .get("delta")
            .and_then(|d| d.get("tool_calls"))
            .and_then(Value::as_array);

        if let Some(tool_calls) = tool_calls {
            let mut stored = false;
            for tc in tool_calls {
                let index = tc.get("index").and_then(Value::as_u64).unwrap_or(0);
                let id = tc.get("id").and_then(Value::as_str).unwrap_or("");
                let name = tc
                    .get("function")
                    .and_then(|f| f.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let was_new = !self.buffer.is_buffering(index);
                self.buffer.start(index, id, name);
                let fragment = tc
                    .get("function")
                    .and_then(|f| f.get("arguments"))
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let appended = fragment.is_empty() || self.buffer.append(index, fragment);
                stored |= was_new || appended;
            }
            // Chunks whose every fragment fell past the byte cap are
            // dropped so the held run stops growing with the attack.
            if stored {
                self.held.push(frame);
            }
            return Vec::new();
        }

        let finish_reason = choice.get("finish_reason").and_then(Value::as_str);
        if finish_reason == Some("tool_calls") && !self.buffer.is_empty() {
            return self.finish_tool_calls(frame);
        }

        // Plain content deltas, role chunks, and ordinary finishes pass
        // straight through.
        vec![frame]
    }

    fn finish_tool_calls(&mut self, finish_frame: SseFrame) -> Vec<SseFrame> {
        let mut decided = Vec::new();
        for index in self.buffer.indexes() {
            if let Some(call) = self.buffer.complete(index) {
                let result = (self.decide)(&call);
                debug!(
                    tool = %call.name,
                    decision = %result.decision,
                    policy_id = %result.policy_id,
                    "tool call decided"
                );
                decided.push((call, result));
            }
        }

        let all_allowed = decided.iter().all(|(_, result)| {
            matches!(
                result.decision,
                Decision::Allow | Decision::AllowWithRedaction
            )
        });
        if all_allowed {
            let mut out = std::mem::take(&mut self.held);
            out.push(finish_frame);
            return out;
        }

        // Any rewritten call poisons the held run: none of the original
        // tool-call bytes may leak, so the whole run is replaced.
        self.held.clear();
        let mut out = Vec::new();
        for (call, result) in &decided {
            let text = match result.decision {
                Decision::Allow | Decision::AllowWithRedaction => continue,
                Decision::RewriteOutput => result.output_rewrite.clone().unwrap_or_default(),
                Decision::Deny | Decision::RequireApproval => blocked_message(&call.name, result),
            };
            out.push(content_chunk(&text));
        }
        out.push(finish_chunk());
        out
    }

    pub fn cancel(&mut self) {
        self.buffer.clear();
        self.held.clear();
    }
}

fn content_chunk(text: &str) -> SseFrame {
    SseFrame::synthetic(
        None,
        &json!({
            "choices": [{
                "index": 0,
                "delta": {"content": text},
                "finish_reason": null,
            }]
        }),
    )
}

fn finish_chunk() -> SseFrame {
    SseFrame::synthetic(
        None,
        &json!({
            "choices": [{
                "index": 0,
                "delta": {},
                "finish_reason": "stop",
            }]
        }),
    )
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use chainwatch_protocol::PolicyResult;
    use pretty_assertions::assert_eq;

    use super::*;

    fn chunk(data: Value) -> SseFrame {
        SseFrame::synthetic(None, &data)
    }

    fn tool_call_stream(fragments: &[&str]) -> Vec<SseFrame> {
        let mut frames = vec![chunk(json!({
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_1",
                        "function": {"name": "run_command", "arguments": ""},
                    }]
                },
                "finish_reason": null,
            }]
        }))];
        for fragment in fragments {
            frames.push(chunk(json!({
                "choices": [{
                    "index": 0,
                    "delta": {
                        "tool_calls": [{
                            "index": 0,
                            "function": {"arguments": fragment},
                        }]
                    },
                    "finish_reason": null,
                }]
            })));
        }
        frames.push(chunk(json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
        })));
        frames
    }

    fn done() -> SseFrame {
        SseFrame::parse("data: [DONE]\n\n".to_string())
    }

    #[test]
    fn allowed_call_replays_held_chunks_and_finish() {
        let mut interceptor =
            OpenAiInterceptor::new(|_call| PolicyResult::allow(0, "ok", "tier.guarded.allow"));
        let input = tool_call_stream(&["{\"command\":", "\"ls\"}"]);
        let mut out = Vec::new();
        for f in input.clone() {
            out.extend(interceptor.push_frame(f));
        }
        out.extend(interceptor.push_frame(done()));

        let mut expected = input;
        expected.push(done());
        assert_eq!(out, expected);
    }

    #[test]
    fn blocked_call_is_replaced_with_content_and_stop() {
        let mut interceptor = OpenAiInterceptor::new(|call: &ToolCall| {
            assert_eq!(call.name, "run_command");
            assert_eq!(
                call.arguments.get("command").and_then(Value::as_str),
                Some("rm -rf /")
            );
            PolicyResult::deny(3, "resource matches denylist", "denylist.block")
        });
        let input = tool_call_stream(&["{\"com", "mand\":", "\"rm -rf /\"}"]);
        let mut out = Vec::new();
        for f in input {
            out.extend(interceptor.push_frame(f));
        }
        out.extend(interceptor.push_frame(done()));

        assert_eq!(out.len(), 3);
        let combined: String = out.iter().map(|f| f.raw.as_str()).collect();
        assert!(combined.contains("[BLOCKED by chainwatch] run_command"));
        assert!(combined.contains("denylist.block"));
        assert!(!combined.contains("rm -rf"));
        assert!(combined.contains("\"finish_reason\":\"stop\""));
        assert!(out[2].is_done());
    }

    #[test]
    fn content_deltas_pass_through_untouched() {
        let mut interceptor = OpenAiInterceptor::new(|_call: &ToolCall| {
            panic!("no tool call should complete");
        });
        let frames = vec![
            chunk(json!({
                "choices": [{"index": 0, "delta": {"role": "assistant"}, "finish_reason": null}]
            })),
            chunk(json!({
                "choices": [{"index": 0, "delta": {"content": "hello"}, "finish_reason": null}]
            })),
            chunk(json!({
                "choices": [{"index": 0, "delta": {}, "finish_reason": "stop"}]
            })),
            done(),
        ];
        for f in frames.clone() {
            assert_eq!(interceptor.push_frame(f.clone()), vec![f]);
        }
    }

    #[test]
    fn multiple_calls_all_decided_one_blocked_poisons_the_run() {
        let mut decisions = Vec::new();
        let mut interceptor = OpenAiInterceptor::new(|call: &ToolCall| {
            decisions.push(call.name.clone());
            if call.name == "run_command" {
                PolicyResult::deny(3, "nope", "denylist.block")
            } else {
                PolicyResult::allow(1, "ok", "tier.guarded.allow")
            }
        });

        let frames = vec![
            chunk(json!({
                "choices": [{
                    "index": 0,
                    "delta": {"tool_calls": [
                        {"index": 0, "id": "a", "function": {"name": "read_file", "arguments": "{\"path\":\"/tmp/x\"}"}},
                        {"index": 1, "id": "b", "function": {"name": "run_command", "arguments": "{\"command\":\"rm -rf /\"}"}},
                    ]},
                    "finish_reason": null,
                }]
            })),
            chunk(json!({
                "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]
            })),
        ];
        let mut out = Vec::new();
        for f in frames {
            out.extend(interceptor.push_frame(f));
        }
        drop(interceptor);

        assert_eq!(decisions, vec!["read_file", "run_command"]);
        let combined: String = out.iter().map(|f| f.raw.as_str()).collect();
        assert!(combined.contains("[BLOCKED by chainwatch] run_command"));
        assert!(!combined.contains("rm -rf"));
        assert!(!combined.contains("/tmp/x"));
    }
}
