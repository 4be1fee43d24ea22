//! SSE tool-call reassembly and rewriting.
//!
//! Two dialects are handled: named events with `content_block_*` tool-use
//! blocks, and unnamed `data:` chunks carrying
//! `choices[].delta.tool_calls[]`. Both interceptors are synchronous
//! push-based state machines over [`SseFrame`]s; [`intercept_sse`] is the
//! async driver that pumps upstream bytes through one of them and fans
//! the rewritten frames out to a channel.
//!
//! Each HTTP request gets its own interceptor; the process may run many
//! concurrently. Buffers die with the interceptor, so caller cancellation
//! releases them automatically.

mod anthropic;
mod frame;
mod openai;
mod reassembler;

use std::sync::Arc;

use bytes::Bytes;
use chainwatch_protocol::Action;
use chainwatch_protocol::PolicyResult;
use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

pub use anthropic::AnthropicInterceptor;
pub use frame::FrameParser;
pub use frame::SseFrame;
pub use openai::OpenAiInterceptor;
pub use reassembler::MAX_TOOL_ARG_BYTES;
pub use reassembler::ParseError;
pub use reassembler::ToolCall;
pub use reassembler::ToolCallBuffer;

use crate::error::ChainwatchErr;
use crate::error::Result;
use crate::evaluator::Evaluator;
use crate::flags::CHAINWATCH_STREAM_IDLE_TIMEOUT_MS;
use crate::tracer::Tracer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SseDialect {
    Anthropic,
    OpenAi,
}

enum Handler<F> {
    Anthropic(AnthropicInterceptor<F>),
    OpenAi(OpenAiInterceptor<F>),
}

impl<F> Handler<F>
where
    F: FnMut(&ToolCall) -> PolicyResult,
{
    fn push_frame(&mut self, frame: SseFrame) -> Vec<SseFrame> {
        match self {
            Self::Anthropic(inner) => inner.push_frame(frame),
            Self::OpenAi(inner) => inner.push_frame(frame),
        }
    }

    fn cancel(&mut self) {
        match self {
            Self::Anthropic(inner) => inner.cancel(),
            Self::OpenAi(inner) => inner.cancel(),
        }
    }
}

/// Pump one upstream SSE byte stream through the policy interceptor.
///
/// Completed tool calls are mapped to actions and evaluated on `tracer`'s
/// trace; frames that pass policy are forwarded byte-for-byte, rewritten
/// blocks replace the originals. Returns when upstream ends, errors, or
/// idles out; a dropped receiver (caller cancellation) releases the
/// buffers and surfaces as [`ChainwatchErr::Interrupted`].
pub async fn intercept_sse<S>(
    mut upstream: S,
    dialect: SseDialect,
    engine: Arc<dyn Evaluator>,
    tracer: Arc<Tracer>,
    tx: mpsc::Sender<Bytes>,
) -> Result<()>
where
    S: Stream<Item = Result<Bytes>> + Unpin,
{
    let decide = {
        let engine = Arc::clone(&engine);
        let tracer = Arc::clone(&tracer);
        move |call: &ToolCall| {
            if let Some(err) = call.parse_error {
                warn!(tool = %call.name, error = %err, "tool call arguments unusable; evaluating with empty arguments");
            }
            let action = Action::from_tool_call(&call.name, &call.arguments);
            tracer.evaluate(engine.as_ref(), &action)
        }
    };
    let mut handler = match dialect {
        SseDialect::Anthropic => Handler::Anthropic(AnthropicInterceptor::new(decide)),
        SseDialect::OpenAi => Handler::OpenAi(OpenAiInterceptor::new(decide)),
    };

    let idle_timeout = *CHAINWATCH_STREAM_IDLE_TIMEOUT_MS;
    let mut parser = FrameParser::default();

    loop {
        let chunk = match timeout(idle_timeout, upstream.next()).await {
            Ok(Some(Ok(chunk))) => chunk,
            Ok(Some(Err(err))) => {
                handler.cancel();
                return Err(ChainwatchErr::Stream(err.to_string()));
            }
            Ok(None) => {
                // Upstream closed; flush any unterminated trailing frame.
                if let Some(frame) = parser.finish() {
                    for out in handler.push_frame(frame) {
                        if tx.send(Bytes::from(out.raw)).await.is_err() {
                            handler.cancel();
                            return Err(ChainwatchErr::Interrupted);
                        }
                    }
                }
                debug!("upstream SSE stream ended");
                return Ok(());
            }
            Err(_) => {
                handler.cancel();
                return Err(ChainwatchErr::Timeout);
            }
        };

        for frame in parser.push(&chunk) {
            for out in handler.push_frame(frame) {
                if tx.send(Bytes::from(out.raw)).await.is_err() {
                    // Receiver dropped: the caller cancelled. Release
                    // buffers and stop reading upstream.
                    handler.cancel();
                    return Err(ChainwatchErr::Interrupted);
                }
            }
        }
    }
}
