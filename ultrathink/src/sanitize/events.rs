// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// SSE event decoding
//
// Splits one blank-line-delimited SSE event into its fields and maps the
// JSON payload onto per-protocol variants. Also builds the synthesized
// events that carry a recovered tool call in each protocol's vocabulary.

use serde_json::{json, Value};

use super::types::{CallIds, ProtocolMode, ToolCallMatch, TOOL_CALLS_FINISH_REASON};

pub const DONE_SENTINEL: &str = "[DONE]";

const RESPONSES_TEXT_DELTA: &str = "response.output_text.delta";
const RESPONSES_ITEM_ADDED: &str = "response.output_item.added";
const RESPONSES_ARGUMENTS_DELTA: &str = "response.function_call_arguments.delta";
const RESPONSES_ITEM_DONE: &str = "response.output_item.done";

// ---------------------------------------------------------------------------
// Event framing
// ---------------------------------------------------------------------------

/// One SSE event, minus its terminating blank line.
#[derive(Debug, Clone, PartialEq)]
pub struct SseEvent {
    /// Non-`data:` lines (`event:`, `id:`, comments) in original order.
    pub other_lines: Vec<String>,
    /// Value of the `event:` field, if any.
    pub event_name: Option<String>,
    /// Joined and trimmed `data:` lines. `None` if the event has none.
    pub data: Option<String>,
}

impl SseEvent {
    /// Parse the text of one event.
    ///
    /// Multiple `data:` lines are joined with `\n` and the result trimmed.
    pub fn parse(text: &str) -> Self {
        let mut other_lines = Vec::new();
        let mut event_name = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in text.split('\n') {
            let line = line.strip_suffix('\r').unwrap_or(line);
            if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                event_name = Some(value.trim().to_string());
            }
            if !line.is_empty() {
                other_lines.push(line.to_string());
            }
        }

        let data = (!data_lines.is_empty()).then(|| data_lines.join("\n").trim().to_string());
        Self {
            other_lines,
            event_name,
            data,
        }
    }

    /// Re-render the event with a replacement data payload, keeping every
    /// other line as it was.
    pub fn render_with_data(&self, data: &str) -> String {
        let mut out = String::with_capacity(data.len() + 64);
        for line in &self.other_lines {
            out.push_str(line);
            out.push('\n');
        }
        out.push_str("data: ");
        out.push_str(data);
        out.push_str("\n\n");
        out
    }
}

/// Render a synthesized event. `event_name` is emitted only when the
/// stream being rewritten names its events.
pub fn render_event(event_name: Option<&str>, payload: &Value) -> String {
    match event_name {
        Some(name) => format!("event: {name}\ndata: {payload}\n\n"),
        None => format!("data: {payload}\n\n"),
    }
}

// ---------------------------------------------------------------------------
// Payload decoding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// The `[DONE]` terminator.
    Done,
    Json(Value),
    /// Not JSON. Forwarded untouched.
    Opaque,
}

pub fn decode_payload(data: &str) -> Payload {
    if data == DONE_SENTINEL {
        return Payload::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(value) => Payload::Json(value),
        Err(_) => Payload::Opaque,
    }
}

/// Inspect the first JSON payload of a stream.
pub fn detect_protocol(payload: &Value) -> ProtocolMode {
    if payload.get("type").is_some_and(Value::is_string) {
        ProtocolMode::Responses
    } else if payload.get("choices").is_some_and(Value::is_array) {
        ProtocolMode::Chat
    } else {
        ProtocolMode::Unknown
    }
}

// ---------------------------------------------------------------------------
// Responses protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ResponsesEvent {
    /// `response.output_text.delta` with a string delta.
    OutputTextDelta { delta: String },
    /// Anything else; forwarded as-is.
    Other,
}

impl ResponsesEvent {
    pub fn decode(payload: &Value) -> Self {
        match payload.get("delta").and_then(Value::as_str) {
            Some(delta) if Self::is_text_delta(payload) => ResponsesEvent::OutputTextDelta {
                delta: delta.to_string(),
            },
            _ => ResponsesEvent::Other,
        }
    }

    /// `response.output_text.delta` carrying a string delta.
    pub fn is_text_delta(payload: &Value) -> bool {
        payload.get("type").and_then(Value::as_str) == Some(RESPONSES_TEXT_DELTA)
            && payload.get("delta").is_some_and(Value::is_string)
    }

    pub fn output_index(payload: &Value) -> Option<u64> {
        payload.get("output_index").and_then(Value::as_u64)
    }

    pub fn set_delta(payload: &mut Value, delta: &str) {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("delta".to_string(), Value::String(delta.to_string()));
        }
    }

    /// `output_item.added`, `function_call_arguments.delta` and
    /// `output_item.done` for one recovered call.
    pub fn function_call_events(call: &ToolCallMatch, output_index: u64, ids: &CallIds) -> [Value; 3] {
        let added = json!({
            "type": RESPONSES_ITEM_ADDED,
            "output_index": output_index,
            "item": {
                "type": "function_call",
                "id": ids.item_id,
                "call_id": ids.call_id,
                "name": call.tool_name,
                "arguments": "",
                "status": "in_progress",
            },
        });
        let arguments = json!({
            "type": RESPONSES_ARGUMENTS_DELTA,
            "item_id": ids.item_id,
            "output_index": output_index,
            "delta": call.arguments_json,
        });
        let done = json!({
            "type": RESPONSES_ITEM_DONE,
            "output_index": output_index,
            "item": {
                "type": "function_call",
                "id": ids.item_id,
                "call_id": ids.call_id,
                "name": call.tool_name,
                "arguments": call.arguments_json,
                "status": "completed",
            },
        });
        [added, arguments, done]
    }
}

/// `type` field of a Responses payload, used as the `event:` name.
pub fn responses_event_type(payload: &Value) -> Option<&str> {
    payload.get("type").and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// Chat Completions protocol
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ChatChunk {
    /// First choice carries a string `delta.content`.
    ContentDelta { content: String },
    Other,
}

impl ChatChunk {
    pub fn decode(payload: &Value) -> Self {
        match first_delta(payload)
            .and_then(|d| d.get("content"))
            .and_then(Value::as_str)
        {
            Some(content) => ChatChunk::ContentDelta {
                content: content.to_string(),
            },
            None => ChatChunk::Other,
        }
    }

    pub fn has_content(payload: &Value) -> bool {
        first_delta(payload)
            .and_then(|d| d.get("content"))
            .is_some_and(Value::is_string)
    }

    /// `finish_reason` of the first choice, when set.
    pub fn finish_reason(payload: &Value) -> Option<&str> {
        payload.get("choices")?.get(0)?.get("finish_reason")?.as_str()
    }

    /// Highest `delta.tool_calls[].index` carried by this chunk.
    pub fn max_tool_call_index(payload: &Value) -> Option<u64> {
        first_delta(payload)?
            .get("tool_calls")?
            .as_array()?
            .iter()
            .filter_map(|call| call.get("index").and_then(Value::as_u64))
            .max()
    }

    pub fn set_content(payload: &mut Value, content: &str) {
        if let Some(delta) = payload
            .get_mut("choices")
            .and_then(|c| c.get_mut(0))
            .and_then(|c| c.get_mut("delta"))
            .and_then(Value::as_object_mut)
        {
            delta.insert("content".to_string(), Value::String(content.to_string()));
        }
    }

    /// A `delta.tool_calls` chunk followed by a `finish_reason` chunk,
    /// both carrying the envelope fields of `trigger`.
    pub fn tool_call_chunks(trigger: &Value, call: &ToolCallMatch, tool_index: u64, call_id: &str) -> [Value; 2] {
        let choice_index = trigger
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("index"))
            .cloned()
            .unwrap_or(json!(0));

        let mut tool_chunk = envelope(trigger);
        tool_chunk["choices"] = json!([{
            "index": choice_index,
            "delta": {
                "tool_calls": [{
                    "index": tool_index,
                    "id": call_id,
                    "type": "function",
                    "function": {
                        "name": call.tool_name,
                        "arguments": call.arguments_json,
                    },
                }],
            },
            "finish_reason": null,
        }]);

        let mut finish_chunk = envelope(trigger);
        finish_chunk["choices"] = json!([{
            "index": choice_index,
            "delta": {},
            "finish_reason": TOOL_CALLS_FINISH_REASON,
        }]);

        [tool_chunk, finish_chunk]
    }
}

fn first_delta(payload: &Value) -> Option<&Value> {
    payload.get("choices")?.get(0)?.get("delta")
}

fn envelope(trigger: &Value) -> Value {
    let mut out = serde_json::Map::new();
    for key in ["id", "object", "created", "model", "system_fingerprint"] {
        if let Some(value) = trigger.get(key) {
            out.insert(key.to_string(), value.clone());
        }
    }
    Value::Object(out)
}
