//! Line-JSON Stream Decoder.
//!
//! Converts raw byte chunks emitted by a subprocess on stdout into a lazy
//! sequence of typed [`StreamSegment`]s. The decoder is stateless across
//! lines except for the trailing-fragment buffer: each complete line is
//! decoded independently of any other. Malformed or unrecognized lines
//! never fail the stream; they simply yield no segments.

use crate::types::StreamSegment;
use serde_json::Value;

/// Incremental decoder. Feed it byte chunks as they arrive from the
/// child's stdout; call [`LineDecoder::flush`] once at end-of-stream to
/// drain any buffered trailing fragment.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: String,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of bytes (assumed UTF-8; lossily converted otherwise)
    /// and return the segments produced by every complete line contained
    /// in it. An incomplete trailing fragment is retained for the next
    /// call.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamSegment> {
        self.buffer.push_str(&String::from_utf8_lossy(chunk));

        let mut segments = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=pos).collect();
            let line = line.trim_end_matches(['\n', '\r']);
            if !line.is_empty() {
                segments.extend(decode_line(line));
            }
        }
        segments
    }

    /// Flush any remaining buffered fragment as a final line. Call once at
    /// end-of-stream.
    pub fn flush(&mut self) -> Vec<StreamSegment> {
        let remainder = std::mem::take(&mut self.buffer);
        let remainder = remainder.trim();
        if remainder.is_empty() {
            Vec::new()
        } else {
            decode_line(remainder)
        }
    }
}

/// Decode a single complete line into zero or more segments. Never fails:
/// malformed JSON or an unrecognized shape yields an empty vector.
fn decode_line(line: &str) -> Vec<StreamSegment> {
    let value: Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(_) => return Vec::new(),
    };

    let Some(obj) = value.as_object() else {
        return Vec::new();
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("assistant") => decode_message_content(obj, true),
        Some("user") => decode_message_content(obj, false),
        Some("tool_result") => vec![tool_result_segment(obj)],
        Some("system") => vec![system_segment(obj)],
        Some("result") => vec![result_segment(obj)],
        Some(_) => Vec::new(),
        None => {
            if obj.contains_key("output") {
                let content = obj
                    .get("output")
                    .map(value_to_text)
                    .unwrap_or_default();
                vec![StreamSegment::ToolResult {
                    content,
                    is_error: false,
                }]
            } else {
                Vec::new()
            }
        }
    }
}

/// Decode the `message.content` block array of an `assistant`/`user` line.
/// For `user` lines, only `tool_result` blocks are emitted (text echoes of
/// the user's own turn are suppressed).
fn decode_message_content(
    obj: &serde_json::Map<String, Value>,
    is_assistant: bool,
) -> Vec<StreamSegment> {
    let Some(blocks) = obj
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut segments = Vec::new();
    for block in blocks {
        let Some(block_obj) = block.as_object() else {
            continue;
        };
        match block_obj.get("type").and_then(Value::as_str) {
            Some("text") if is_assistant => {
                let content = block_obj
                    .get("text")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                segments.push(StreamSegment::Text { content });
            }
            Some("thinking") if is_assistant => {
                let content = block_obj
                    .get("thinking")
                    .or_else(|| block_obj.get("text"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                segments.push(StreamSegment::Thinking { content });
            }
            Some("tool_use") if is_assistant => {
                let tool = block_obj
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let input_map = block_obj.get("input").cloned().unwrap_or(Value::Null);
                segments.push(StreamSegment::ToolUse { tool, input_map });
            }
            Some("tool_result") => {
                segments.push(tool_result_segment(block_obj));
            }
            _ => {}
        }
    }
    segments
}

fn tool_result_segment(obj: &serde_json::Map<String, Value>) -> StreamSegment {
    let content = obj
        .get("content")
        .map(value_to_text)
        .unwrap_or_default();
    let is_error = obj
        .get("is_error")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    StreamSegment::ToolResult { content, is_error }
}

fn system_segment(obj: &serde_json::Map<String, Value>) -> StreamSegment {
    let subtype = obj.get("subtype").and_then(Value::as_str);
    let message = obj.get("message").and_then(Value::as_str);
    let content = match (subtype, message) {
        (Some(s), Some(m)) => format!("{}: {}", s, m),
        (Some(s), None) => s.to_string(),
        (None, Some(m)) => m.to_string(),
        (None, None) => serde_json::to_string(&Value::Object(obj.clone())).unwrap_or_default(),
    };
    StreamSegment::System { content }
}

fn result_segment(obj: &serde_json::Map<String, Value>) -> StreamSegment {
    let duration_ms = obj.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
    let (input_tokens, output_tokens) = obj
        .get("usage")
        .and_then(Value::as_object)
        .map(|usage| {
            (
                usage.get("input_tokens").and_then(Value::as_u64).unwrap_or(0),
                usage.get("output_tokens").and_then(Value::as_u64).unwrap_or(0),
            )
        })
        .unwrap_or((0, 0));
    StreamSegment::Result {
        duration_ms,
        input_tokens,
        output_tokens,
    }
}

/// Render a JSON value as plain text: strings pass through unquoted,
/// everything else is serialized.
fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
