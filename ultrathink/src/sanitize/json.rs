// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Non-streaming JSON sanitizer
//
// Buffered counterpart of the SSE transformer. The whole content string is
// available, so blocks are extracted with a plain left-to-right index scan.

use bytes::Bytes;
use serde_json::{json, Map, Value};

use super::markers::{find_ascii_ci, find_close, find_open, TOOL_CALL_CLOSE, TOOL_CALL_OPEN};
use super::parser::parse_tool_call_block;
use super::types::{CallIds, SanitizeOptions, ToolCallMatch, TrackedText, TOOL_CALLS_FINISH_REASON};

/// Rewrite textual tool calls in a buffered response body.
///
/// Handles Chat Completions bodies (`choices[].message.content`) and
/// Responses bodies (`output[]` message items with `output_text` parts).
/// Returns `body` itself when nothing changed or the body is not JSON.
pub fn sanitize_json_body(body: &Bytes, options: &SanitizeOptions) -> Bytes {
    let mut json: Value = match serde_json::from_slice(body) {
        Ok(v) => v,
        Err(_) => {
            tracing::debug!(bytes = body.len(), "response body is not JSON; passed through");
            return body.clone();
        }
    };

    let rewritten = if let Some(choices) = json.get_mut("choices").and_then(Value::as_array_mut) {
        choices
            .iter_mut()
            .map(|choice| sanitize_choice(choice, options))
            .sum::<usize>()
    } else if let Some(output) = json.get_mut("output").and_then(Value::as_array_mut) {
        sanitize_output_items(output, options)
    } else {
        0
    };

    if rewritten == 0 {
        return body.clone();
    }

    match serde_json::to_vec(&json) {
        Ok(encoded) => Bytes::from(encoded),
        Err(_) => body.clone(),
    }
}

/// Split `content` into visible text and recovered tool calls.
///
/// Blocks the parser rejects stay in the visible text, as does an
/// opening marker with no closing marker after it.
pub fn extract_tool_calls(content: &str) -> TrackedText {
    let mut out = TrackedText::default();
    let mut cursor = 0;

    while let Some(open) = find_open(content, cursor) {
        let Some((_, end)) = find_close(content, open) else {
            break;
        };
        out.visible.push_str(&content[cursor..open]);
        let block = &content[open..end];
        match parse_tool_call_block(block) {
            Some(call) => out.tool_calls.push(call),
            None => out.visible.push_str(block),
        }
        cursor = end;
    }

    out.visible.push_str(&content[cursor..]);
    out
}

fn has_both_markers(content: &str) -> bool {
    find_ascii_ci(content, TOOL_CALL_OPEN, 0).is_some() && find_ascii_ci(content, TOOL_CALL_CLOSE, 0).is_some()
}

fn sanitize_choice(choice: &mut Value, options: &SanitizeOptions) -> usize {
    let Some(choice) = choice.as_object_mut() else {
        return 0;
    };
    let Some(message) = choice.get_mut("message").and_then(Value::as_object_mut) else {
        return 0;
    };
    let extracted = match message.get("content").and_then(Value::as_str) {
        Some(content) if has_both_markers(content) => extract_tool_calls(content),
        _ => return 0,
    };
    if extracted.tool_calls.is_empty() {
        return 0;
    }

    message.insert("content".to_string(), Value::String(extracted.visible));

    let slot = message
        .entry("tool_calls")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    if let Some(tool_calls) = slot.as_array_mut() {
        let base = tool_calls.len();
        for (offset, call) in extracted.tool_calls.iter().enumerate() {
            tool_calls.push(json!({
                "index": base + offset,
                "id": CallIds::generate().call_id,
                "type": "function",
                "function": {
                    "name": call.tool_name,
                    "arguments": call.arguments_json,
                },
            }));
        }
    }

    choice.insert("finish_reason".to_string(), Value::String(TOOL_CALLS_FINISH_REASON.to_string()));
    report(&extracted.tool_calls, "chat", options);
    extracted.tool_calls.len()
}

fn sanitize_output_items(output: &mut Vec<Value>, options: &SanitizeOptions) -> usize {
    let mut rebuilt = Vec::with_capacity(output.len());
    let mut rewritten = 0;

    for mut item in output.drain(..) {
        let calls = sanitize_message_item(&mut item);
        rebuilt.push(item);
        for call in &calls {
            let ids = CallIds::generate();
            rebuilt.push(json!({
                "type": "function_call",
                "id": ids.item_id,
                "call_id": ids.call_id,
                "name": call.tool_name,
                "arguments": call.arguments_json,
                "status": "completed",
            }));
        }
        if !calls.is_empty() {
            report(&calls, "responses", options);
            rewritten += calls.len();
        }
    }

    *output = rebuilt;
    rewritten
}

fn sanitize_message_item(item: &mut Value) -> Vec<ToolCallMatch> {
    if item.get("type").and_then(Value::as_str) != Some("message") {
        return Vec::new();
    }
    let Some(parts) = item.get_mut("content").and_then(Value::as_array_mut) else {
        return Vec::new();
    };

    let mut calls = Vec::new();
    for part in parts.iter_mut().filter_map(Value::as_object_mut) {
        if part.get("type").and_then(Value::as_str) != Some("output_text") {
            continue;
        }
        let extracted = match part.get("text").and_then(Value::as_str) {
            Some(text) if has_both_markers(text) => extract_tool_calls(text),
            _ => continue,
        };
        if extracted.tool_calls.is_empty() {
            continue;
        }
        set_text(part, extracted.visible);
        calls.extend(extracted.tool_calls);
    }
    calls
}

fn set_text(part: &mut Map<String, Value>, text: String) {
    part.insert("text".to_string(), Value::String(text));
}

fn report(calls: &[ToolCallMatch], protocol: &'static str, options: &SanitizeOptions) {
    for call in calls {
        tracing::info!(
            tool_name = %call.tool_name,
            protocol,
            mode = "buffered",
            "textual tool call rewritten"
        );
        options.notify(&call.tool_name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    const LS_BLOCK: &str = "<tool_call><arg_key>command</arg_key><arg_value>\"ls\"</arg_value></tool_call>";

    fn chat_body(content: &str) -> Bytes {
        Bytes::from(
            json!({
                "id": "chatcmpl-1",
                "object": "chat.completion",
                "choices": [{
                    "index": 0,
                    "message": {"role": "assistant", "content": content},
                    "finish_reason": "stop",
                }],
            })
            .to_string(),
        )
    }

    fn parse(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).unwrap()
    }

    #[test]
    fn rewrites_chat_choice() {
        let body = chat_body(&format!("Sure, {LS_BLOCK} done"));
        let out = parse(&sanitize_json_body(&body, &SanitizeOptions::default()));
        let choice = &out["choices"][0];

        assert_eq!(choice["message"]["content"], "Sure,  done");
        assert_eq!(choice["finish_reason"], "tool_calls");
        let call = &choice["message"]["tool_calls"][0];
        assert_eq!(call["index"], 0);
        assert_eq!(call["type"], "function");
        assert_eq!(call["function"]["name"], "bash");
        assert_eq!(call["function"]["arguments"], "{\"command\":\"ls\"}");
        assert!(call["id"].as_str().unwrap().starts_with("call_"));
    }

    #[test]
    fn multiple_blocks_get_increasing_indices() {
        let body = chat_body(&format!("{LS_BLOCK}<tool_call name=\"read\"></tool_call>"));
        let out = parse(&sanitize_json_body(&body, &SanitizeOptions::default()));
        let calls = out["choices"][0]["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1]["index"], 1);
        assert_eq!(calls[1]["function"]["name"], "read");
    }

    #[test]
    fn appends_after_existing_tool_calls() {
        let body = Bytes::from(
            json!({"choices": [{"message": {
                "content": LS_BLOCK,
                "tool_calls": [{"index": 0, "id": "call_a", "type": "function", "function": {"name": "read", "arguments": "{}"}}],
            }}]})
            .to_string(),
        );
        let out = parse(&sanitize_json_body(&body, &SanitizeOptions::default()));
        let calls = out["choices"][0]["message"]["tool_calls"].as_array().unwrap();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0]["id"], "call_a");
        assert_eq!(calls[1]["index"], 1);
    }

    #[test]
    fn malformed_body_is_returned_untouched() {
        let body = Bytes::from_static(b"{\"choices\": [ <tool_call>");
        assert_eq!(sanitize_json_body(&body, &SanitizeOptions::default()), body);
    }

    #[test]
    fn unaffected_body_keeps_its_bytes() {
        let body = Bytes::from_static(b"{ \"choices\" : [ {\"message\": {\"content\": \"hello\"}} ] }");
        assert_eq!(sanitize_json_body(&body, &SanitizeOptions::default()), body);
    }

    #[test]
    fn unresolvable_block_is_left_alone() {
        let content = "<tool_call><arg_key>mystery</arg_key><arg_value>1</arg_value></tool_call>";
        let body = chat_body(content);
        assert_eq!(sanitize_json_body(&body, &SanitizeOptions::default()), body);
    }

    #[test]
    fn incomplete_trailing_block_is_preserved() {
        let content = format!("a{LS_BLOCK}b<tool_call><arg_key>command");
        let out = parse(&sanitize_json_body(&chat_body(&content), &SanitizeOptions::default()));
        assert_eq!(out["choices"][0]["message"]["content"], "ab<tool_call><arg_key>command");
    }

    #[test]
    fn second_pass_is_a_no_op() {
        let once = sanitize_json_body(&chat_body(&format!("x {LS_BLOCK}")), &SanitizeOptions::default());
        let twice = sanitize_json_body(&once, &SanitizeOptions::default());
        assert_eq!(once, twice);
    }

    #[test]
    fn observer_sees_each_tool() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let options = SanitizeOptions::default().with_observer(move |name| sink.lock().unwrap().push(name.to_string()));

        sanitize_json_body(&chat_body(&format!("{LS_BLOCK}{LS_BLOCK}")), &options);
        assert_eq!(*seen.lock().unwrap(), ["bash", "bash"]);
    }

    #[test]
    fn rewrites_responses_output_items() {
        let body = Bytes::from(
            json!({
                "object": "response",
                "output": [{
                    "type": "message",
                    "id": "msg_1",
                    "role": "assistant",
                    "content": [{"type": "output_text", "text": format!("Checking {LS_BLOCK}")}],
                }],
            })
            .to_string(),
        );
        let out = parse(&sanitize_json_body(&body, &SanitizeOptions::default()));
        let output = out["output"].as_array().unwrap();

        assert_eq!(output.len(), 2);
        assert_eq!(output[0]["content"][0]["text"], "Checking ");
        assert_eq!(output[1]["type"], "function_call");
        assert_eq!(output[1]["name"], "bash");
        assert_eq!(output[1]["status"], "completed");
        assert!(output[1]["id"].as_str().unwrap().starts_with("fc_"));
    }

    #[test]
    fn extract_keeps_text_between_blocks() {
        let extracted = extract_tool_calls(&format!("1{LS_BLOCK}2{LS_BLOCK}3"));
        assert_eq!(extracted.visible, "123");
        assert_eq!(extracted.tool_calls.len(), 2);
    }
}
