//! Incremental SSE frame splitting.
//!
//! The splitter keeps the exact raw bytes of every frame alongside the
//! parsed `event`/`data` fields: frames that pass policy are replayed
//! downstream byte-for-byte, not re-serialized.

use serde_json::Value;

/// One server-sent event, raw and parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    /// The frame exactly as received, including its blank-line terminator.
    pub raw: String,
    pub event: Option<String>,
    pub data: String,
}

impl SseFrame {
    /// Parse the field lines out of one raw frame. Multiple `data:` lines
    /// concatenate with newlines; unknown fields are preserved in `raw`
    /// but otherwise ignored.
    pub fn parse(raw: String) -> Self {
        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();
        for line in raw.lines() {
            if let Some(rest) = line.strip_prefix("event:") {
                event = Some(rest.strip_prefix(' ').unwrap_or(rest).to_string());
            } else if let Some(rest) = line.strip_prefix("data:") {
                data_lines.push(rest.strip_prefix(' ').unwrap_or(rest));
            }
        }
        let data = data_lines.join("\n");
        Self { raw, event, data }
    }

    /// Build a frame we are emitting ourselves.
    pub fn synthetic(event: Option<&str>, data: &Value) -> Self {
        let raw = match event {
            Some(name) => format!("event: {name}\ndata: {data}\n\n"),
            None => format!("data: {data}\n\n"),
        };
        Self::parse(raw)
    }

    /// The OpenAI end-of-stream sentinel.
    pub fn is_done(&self) -> bool {
        self.data.trim() == "[DONE]"
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_str(&self.data).ok()
    }
}

/// Splits an arbitrary byte stream into SSE frames at blank-line
/// boundaries (`\n\n` or `\r\n\r\n`), preserving raw bytes.
#[derive(Debug, Default)]
pub struct FrameParser {
    buf: String,
}

impl FrameParser {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));
        let mut frames = Vec::new();
        while let Some((end, sep_len)) = find_boundary(&self.buf) {
            let rest = self.buf.split_off(end + sep_len);
            let raw = std::mem::replace(&mut self.buf, rest);
            frames.push(SseFrame::parse(raw));
        }
        frames
    }

    /// Whatever is left at end-of-stream, as a final (unterminated)
    /// frame.
    pub fn finish(&mut self) -> Option<SseFrame> {
        if self.buf.trim().is_empty() {
            self.buf.clear();
            return None;
        }
        Some(SseFrame::parse(std::mem::take(&mut self.buf)))
    }
}

/// `(start_of_separator, separator_len)` for the earliest frame boundary.
fn find_boundary(buf: &str) -> Option<(usize, usize)> {
    let lf = buf.find("\n\n").map(|i| (i, 2));
    let crlf = buf.find("\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 < b.0 { a } else { b }),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}
