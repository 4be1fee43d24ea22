//! Index-keyed buffering of fragmented tool-call arguments.
//!
//! Providers split a tool call's JSON arguments across many delta events.
//! The buffer concatenates fragments per block index until the call
//! completes, then parses. Parse failures never block the stream: they
//! are recorded on the completed call and the evaluator sees (possibly
//! empty) arguments.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value;

/// Hard cap on accumulated argument bytes per tool call. An adversarial
/// stream cannot grow a buffer past this.
pub const MAX_TOOL_ARG_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Argument bytes exceeded [`MAX_TOOL_ARG_BYTES`].
    Truncated,
    /// Complete argument bytes were not a JSON object.
    Malformed,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "truncated"),
            Self::Malformed => write!(f, "malformed"),
        }
    }
}

/// A fully reassembled tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub index: u64,
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Map<String, Value>,
    pub parse_error: Option<ParseError>,
}

#[derive(Debug, Default)]
struct PendingCall {
    id: String,
    name: String,
    args: String,
    truncated: bool,
}

/// Per-stream map of in-flight tool calls, keyed by block index.
#[derive(Debug, Default)]
pub struct ToolCallBuffer {
    calls: BTreeMap<u64, PendingCall>,
}

impl ToolCallBuffer {
    /// Begin (or update the identity of) the call at `index`. Providers
    /// that only name the call on a later delta fill the blanks here.
    pub fn start(&mut self, index: u64, id: &str, name: &str) {
        let call = self.calls.entry(index).or_default();
        if call.id.is_empty() && !id.is_empty() {
            call.id = id.to_string();
        }
        if call.name.is_empty() && !name.is_empty() {
            call.name = name.to_string();
        }
    }

    pub fn is_buffering(&self, index: u64) -> bool {
        self.calls.contains_key(&index)
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    pub fn indexes(&self) -> Vec<u64> {
        self.calls.keys().copied().collect()
    }

    /// Append an argument fragment. Returns `false` once the call is over
    /// the byte cap, at which point nothing further accumulates.
    pub fn append(&mut self, index: u64, fragment: &str) -> bool {
        let Some(call) = self.calls.get_mut(&index) else {
            return false;
        };
        if call.truncated {
            return false;
        }
        if call.args.len().saturating_add(fragment.len()) > MAX_TOOL_ARG_BYTES {
            call.truncated = true;
            return false;
        }
        call.args.push_str(fragment);
        true
    }

    /// Finish the call at `index`, removing its buffer entry and parsing
    /// the accumulated bytes. Empty bytes parse to empty arguments with
    /// no error.
    pub fn complete(&mut self, index: u64) -> Option<ToolCall> {
        let call = self.calls.remove(&index)?;
        let (arguments, parse_error) = if call.truncated {
            (serde_json::Map::new(), Some(ParseError::Truncated))
        } else if call.args.trim().is_empty() {
            (serde_json::Map::new(), None)
        } else {
            match serde_json::from_str::<Value>(&call.args) {
                Ok(Value::Object(map)) => (map, None),
                _ => (serde_json::Map::new(), Some(ParseError::Malformed)),
            }
        };
        Some(ToolCall {
            index,
            id: call.id,
            name: call.name,
            arguments,
            parse_error,
        })
    }

    pub fn discard(&mut self, index: u64) {
        self.calls.remove(&index);
    }

    pub fn clear(&mut self) {
        self.calls.clear();
    }
}
