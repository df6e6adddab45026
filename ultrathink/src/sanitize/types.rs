// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Sanitizer types
//
// Recovered tool calls, the per-stream protocol mode, and the options
// handed to `sanitize_response`.

use std::fmt;
use std::sync::Arc;

/// Finish reason that tells OpenAI-compatible clients to run tool calls.
pub const TOOL_CALLS_FINISH_REASON: &str = "tool_calls";

/// Maximum buffered JSON body size accepted by the non-streaming path.
pub const MAX_JSON_BODY_BYTES: usize = 64 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Recovered tool call
// ---------------------------------------------------------------------------

/// A tool invocation recovered from textual `<tool_call>` markup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCallMatch {
    /// Resolved tool name (e.g. "bash", "write").
    pub tool_name: String,
    /// Arguments serialized as a JSON object string.
    pub arguments_json: String,
}

impl ToolCallMatch {
    pub(crate) fn new(
        tool_name: impl Into<String>,
        arguments: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        let arguments_json = serde_json::Value::Object(arguments).to_string();
        Self {
            tool_name: tool_name.into(),
            arguments_json,
        }
    }

    /// Parsed arguments object.
    pub fn arguments(&self) -> serde_json::Value {
        serde_json::from_str(&self.arguments_json)
            .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
    }
}

/// Output of one tracker step: text the user should see plus any tool
/// calls completed within the fragment, in the order they closed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackedText {
    pub visible: String,
    pub tool_calls: Vec<ToolCallMatch>,
}

impl TrackedText {
    pub fn is_unchanged(&self, original: &str) -> bool {
        self.tool_calls.is_empty() && self.visible == original
    }
}

// ---------------------------------------------------------------------------
// Protocol mode
// ---------------------------------------------------------------------------

/// Wire protocol spoken by a response stream, detected from its first
/// JSON payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolMode {
    /// Neither shape matched. Rewriting is disabled for the stream.
    Unknown,
    /// OpenAI Responses API (`{"type": "response.output_text.delta", ...}`).
    Responses,
    /// OpenAI Chat Completions (`{"choices": [{"delta": {...}}]}`).
    Chat,
}

impl ProtocolMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolMode::Unknown => "unknown",
            ProtocolMode::Responses => "responses",
            ProtocolMode::Chat => "chat",
        }
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Callback invoked with the tool name each time a tool call is rewritten.
pub type ToolCallObserver = Arc<dyn Fn(&str) + Send + Sync>;

/// Options for `sanitize_response`.
#[derive(Clone, Default)]
pub struct SanitizeOptions {
    /// Diagnostic hook; has no effect on the rewritten content.
    pub on_tool_call_rewritten: Option<ToolCallObserver>,
    /// Route the body through the SSE path even when the content type
    /// does not announce `text/event-stream`.
    pub likely_sse: bool,
}

impl SanitizeOptions {
    pub fn with_observer(mut self, observer: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_tool_call_rewritten = Some(Arc::new(observer));
        self
    }

    pub fn likely_sse(mut self, likely_sse: bool) -> Self {
        self.likely_sse = likely_sse;
        self
    }

    pub(crate) fn notify(&self, tool_name: &str) {
        if let Some(observer) = &self.on_tool_call_rewritten {
            observer(tool_name);
        }
    }
}

impl fmt::Debug for SanitizeOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SanitizeOptions")
            .field("on_tool_call_rewritten", &self.on_tool_call_rewritten.is_some())
            .field("likely_sse", &self.likely_sse)
            .finish()
    }
}

/// Fresh identifiers for a synthesized function-call item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallIds {
    pub item_id: String,
    pub call_id: String,
}

impl CallIds {
    pub fn generate() -> Self {
        Self {
            item_id: format!("fc_{}", uuid::Uuid::new_v4().simple()),
            call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
        }
    }
}
