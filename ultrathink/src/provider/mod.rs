// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Wire-API request adapters
//
// Responsibilities:
// - Find the text of the most recent assistant turn (for the failure heuristic)
// - Inject the instruction into the outbound request body, idempotently
// - Serialize error responses in the OpenAI error shape

use serde_json::{json, Map, Value};

use crate::config::InjectionMode;
use crate::proxy::WireApi;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while rewriting a request body.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("invalid request format: {0}")]
    InvalidFormat(String),
}

/// What `inject` did to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionOutcome {
    Injected,
    /// The target already carries the instruction.
    AlreadyPresent,
    /// No user message (or no object body) to attach the instruction to.
    NoTarget,
    /// The instruction builder produced nothing to inject.
    NoInstruction,
}

impl InjectionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Injected => "injected",
            Self::AlreadyPresent => "already_present",
            Self::NoTarget => "no_target",
            Self::NoInstruction => "no_instruction",
        }
    }
}

// ---------------------------------------------------------------------------
// Trait: RequestAdapter
// ---------------------------------------------------------------------------

/// Adapter that knows where the instruction goes for one wire API.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via Arc.
pub trait RequestAdapter: Send + Sync {
    /// Text of the most recent assistant message in the request history.
    fn last_assistant_text(&self, body: &Value) -> Option<String>;

    /// Inject `instruction` into `body` according to `mode`.
    fn inject(
        &self,
        body: &mut Value,
        mode: InjectionMode,
        instruction: &str,
    ) -> Result<InjectionOutcome, ProviderError>;

    fn wire_api(&self) -> WireApi;
}

/// `{"error":{"message","type","param","code"}}`. Both wire APIs report
/// errors in this shape.
pub fn openai_error_body(error: &str, status: u16) -> Vec<u8> {
    let error_type = if status >= 500 {
        "server_error"
    } else if status >= 400 {
        "invalid_request_error"
    } else {
        "error"
    };

    let response = json!({
        "error": {
            "message": error,
            "type": error_type,
            "param": null,
            "code": null
        }
    });

    serde_json::to_vec(&response).unwrap_or_else(|_| {
        format!(r#"{{"error":{{"message":"{}","type":"server_error"}}}}"#, error).into_bytes()
    })
}

/// Return the adapter for a wire API.
pub fn adapter_for(wire_api: WireApi) -> Box<dyn RequestAdapter> {
    match wire_api {
        WireApi::ChatCompletions => Box::new(ChatCompletionsAdapter::new()),
        WireApi::Responses => Box::new(ResponsesAdapter::new()),
    }
}

/// What `inject_into_body` did to a raw request body.
#[derive(Debug)]
pub struct BodyInjection {
    pub outcome: InjectionOutcome,
    /// Re-serialized body. Present only when the instruction was injected.
    pub body: Option<Vec<u8>>,
}

/// Parse a raw request body, build the instruction from the last assistant
/// turn, inject it and re-serialize.
///
/// `build` receives the last assistant text and returns the instruction, or
/// `None` to leave the body alone.
pub fn inject_into_body(
    adapter: &dyn RequestAdapter,
    body: &[u8],
    mode: InjectionMode,
    build: impl FnOnce(Option<String>) -> Option<String>,
) -> Result<BodyInjection, ProviderError> {
    let mut value: Value =
        serde_json::from_slice(body).map_err(|e| ProviderError::InvalidJson(e.to_string()))?;

    let Some(instruction) = build(adapter.last_assistant_text(&value)) else {
        return Ok(BodyInjection {
            outcome: InjectionOutcome::NoInstruction,
            body: None,
        });
    };

    let outcome = adapter.inject(&mut value, mode, &instruction)?;
    let body = match outcome {
        InjectionOutcome::Injected => Some(
            serde_json::to_vec(&value).map_err(|e| ProviderError::InvalidJson(e.to_string()))?,
        ),
        _ => None,
    };
    Ok(BodyInjection { outcome, body })
}

// ---------------------------------------------------------------------------
// Shared helpers
// ---------------------------------------------------------------------------

fn has_role(item: &Value, role: &str) -> bool {
    item.get("role").and_then(Value::as_str) == Some(role)
}

/// Concatenated text of a string content or an array of text parts.
fn content_text(content: &Value) -> Option<String> {
    let text = match content {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(|part| match part {
                Value::String(s) => Some(s.as_str()),
                Value::Object(obj) => obj.get("text").and_then(Value::as_str),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn prefixed(instruction: &str, text: &str) -> String {
    if text.is_empty() {
        instruction.to_string()
    } else {
        format!("{instruction}\n\n{text}")
    }
}

/// Prefix a message's `content`, inserting a leading `part_type` part when
/// the content is an array of parts.
fn prefix_content(
    message: &mut Map<String, Value>,
    instruction: &str,
    part_type: &str,
) -> InjectionOutcome {
    match message.get_mut("content") {
        None | Some(Value::Null) => {
            message.insert("content".to_string(), Value::String(instruction.to_string()));
            InjectionOutcome::Injected
        }
        Some(Value::String(text)) => {
            if text.starts_with(instruction) {
                return InjectionOutcome::AlreadyPresent;
            }
            *text = prefixed(instruction, text);
            InjectionOutcome::Injected
        }
        Some(Value::Array(parts)) => {
            let already = parts
                .first()
                .and_then(|part| part.get("text"))
                .and_then(Value::as_str)
                .is_some_and(|text| text.starts_with(instruction));
            if already {
                return InjectionOutcome::AlreadyPresent;
            }
            parts.insert(0, json!({ "type": part_type, "text": instruction }));
            InjectionOutcome::Injected
        }
        Some(_) => InjectionOutcome::NoTarget,
    }
}

// ---------------------------------------------------------------------------
// Chat Completions adapter
// ---------------------------------------------------------------------------

/// Handles `POST /v1/chat/completions` bodies.
///
/// ```json
/// {
///   "model": "glm-4.6",
///   "messages": [
///     {"role": "system", "content": "..."},
///     {"role": "assistant", "content": "..."},
///     {"role": "user", "content": "..."}
///   ]
/// }
/// ```
pub struct ChatCompletionsAdapter;

impl ChatCompletionsAdapter {
    pub fn new() -> Self {
        Self
    }

    fn messages_mut(body: &mut Value) -> Result<Option<&mut Vec<Value>>, ProviderError> {
        match body.get_mut("messages") {
            None => Ok(None),
            Some(Value::Array(messages)) => Ok(Some(messages)),
            Some(_) => Err(ProviderError::InvalidFormat(
                "messages must be an array".to_string(),
            )),
        }
    }
}

impl Default for ChatCompletionsAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestAdapter for ChatCompletionsAdapter {
    fn last_assistant_text(&self, body: &Value) -> Option<String> {
        body.get("messages")?
            .as_array()?
            .iter()
            .rev()
            .find(|m| has_role(m, "assistant"))
            .and_then(|m| m.get("content"))
            .and_then(content_text)
    }

    fn inject(
        &self,
        body: &mut Value,
        mode: InjectionMode,
        instruction: &str,
    ) -> Result<InjectionOutcome, ProviderError> {
        if mode == InjectionMode::SanitizeOnly || !body.is_object() {
            return Ok(InjectionOutcome::NoTarget);
        }
        let Some(messages) = Self::messages_mut(body)? else {
            return Ok(InjectionOutcome::NoTarget);
        };
        let Some(last_user) = messages.iter().rposition(|m| has_role(m, "user")) else {
            return Ok(InjectionOutcome::NoTarget);
        };

        match mode {
            InjectionMode::Prefix => match messages[last_user].as_object_mut() {
                Some(message) => Ok(prefix_content(message, instruction, "text")),
                None => Ok(InjectionOutcome::NoTarget),
            },
            InjectionMode::System => {
                let already = last_user > 0 && {
                    let previous = &messages[last_user - 1];
                    has_role(previous, "system")
                        && previous.get("content").and_then(Value::as_str) == Some(instruction)
                };
                if already {
                    return Ok(InjectionOutcome::AlreadyPresent);
                }
                messages.insert(
                    last_user,
                    json!({ "role": "system", "content": instruction }),
                );
                Ok(InjectionOutcome::Injected)
            }
            InjectionMode::SanitizeOnly => Ok(InjectionOutcome::NoTarget),
        }
    }

    fn wire_api(&self) -> WireApi {
        WireApi::ChatCompletions
    }
}

// ---------------------------------------------------------------------------
// Responses adapter
// ---------------------------------------------------------------------------

/// Handles `POST /v1/responses` bodies.
///
/// `input` is either a plain string or an array of items such as
/// `{"type":"message","role":"user","content":[{"type":"input_text","text":"..."}]}`.
/// System-level instructions live in the top-level `instructions` string.
pub struct ResponsesAdapter;

impl ResponsesAdapter {
    pub fn new() -> Self {
        Self
    }

    fn is_message(item: &Value) -> bool {
        match item.get("type").and_then(Value::as_str) {
            None | Some("message") => true,
            Some(_) => false,
        }
    }

    fn inject_prefix(body: &mut Map<String, Value>, instruction: &str) -> InjectionOutcome {
        match body.get_mut("input") {
            Some(Value::String(text)) => {
                if text.starts_with(instruction) {
                    return InjectionOutcome::AlreadyPresent;
                }
                *text = prefixed(instruction, text);
                InjectionOutcome::Injected
            }
            Some(Value::Array(items)) => {
                let target = items
                    .iter_mut()
                    .rev()
                    .find(|item| Self::is_message(item) && has_role(item, "user"))
                    .and_then(Value::as_object_mut);
                match target {
                    Some(message) => prefix_content(message, instruction, "input_text"),
                    None => InjectionOutcome::NoTarget,
                }
            }
            _ => InjectionOutcome::NoTarget,
        }
    }

    fn inject_system(
        body: &mut Map<String, Value>,
        instruction: &str,
    ) -> Result<InjectionOutcome, ProviderError> {
        match body.get_mut("instructions") {
            None | Some(Value::Null) => {
                body.insert(
                    "instructions".to_string(),
                    Value::String(instruction.to_string()),
                );
                Ok(InjectionOutcome::Injected)
            }
            Some(Value::String(existing)) => {
                if existing.starts_with(instruction) || existing.ends_with(instruction) {
                    return Ok(InjectionOutcome::AlreadyPresent);
                }
                if existing.is_empty() {
                    existing.push_str(instruction);
                } else {
                    existing.push_str("\n\n");
                    existing.push_str(instruction);
                }
                Ok(InjectionOutcome::Injected)
            }
            Some(_) => Err(ProviderError::InvalidFormat(
                "instructions must be a string".to_string(),
            )),
        }
    }
}

impl Default for ResponsesAdapter {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestAdapter for ResponsesAdapter {
    fn last_assistant_text(&self, body: &Value) -> Option<String> {
        body.get("input")?
            .as_array()?
            .iter()
            .rev()
            .find(|item| Self::is_message(item) && has_role(item, "assistant"))
            .and_then(|item| item.get("content"))
            .and_then(content_text)
    }

    fn inject(
        &self,
        body: &mut Value,
        mode: InjectionMode,
        instruction: &str,
    ) -> Result<InjectionOutcome, ProviderError> {
        let Some(obj) = body.as_object_mut() else {
            return Ok(InjectionOutcome::NoTarget);
        };
        match mode {
            InjectionMode::Prefix => Ok(Self::inject_prefix(obj, instruction)),
            InjectionMode::System => Self::inject_system(obj, instruction),
            InjectionMode::SanitizeOnly => Ok(InjectionOutcome::NoTarget),
        }
    }

    fn wire_api(&self) -> WireApi {
        WireApi::Responses
    }
}
