//! Line-buffered NDJSON decoding
//!
//! One decoder serves both transports the summarizer may answer with: a
//! chunked byte stream and a single in-memory body. Lines that parse as
//! `{"type":"item","content":…}` yield their content; anything else
//! non-blank passes through verbatim so plain-text summarizers keep
//! working.

use serde_json::Value;

/// Decode one line: summarizer "item" objects yield their content, other
/// JSON objects are dropped, and unparseable lines pass through trimmed.
pub fn decode_line(line: &str) -> Option<String> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<Value>(trimmed) {
        Ok(value) => {
            if value.get("type").and_then(Value::as_str) != Some("item") {
                return None;
            }
            match value.get("content").and_then(Value::as_str) {
                // "undefined" is the stringified hole some summarizer
                // pipelines emit for a missing field.
                Some(content) if !content.is_empty() && content != "undefined" => {
                    Some(content.to_string())
                }
                _ => None,
            }
        }
        Err(_) => Some(trimmed.to_string()),
    }
}

/// Accumulates incoming bytes and decodes every newline-completed line.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the decoded pieces it completed, in order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut out = Vec::new();
        while let Some(idx) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=idx).collect();
            if let Some(piece) = decode_line(&String::from_utf8_lossy(&line)) {
                out.push(piece);
            }
        }
        out
    }

    /// Flush the trailing partial line at end of stream through the same
    /// decode logic.
    pub fn finish(self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        decode_line(&String::from_utf8_lossy(&self.buf))
    }
}
