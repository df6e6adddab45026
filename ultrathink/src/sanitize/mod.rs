// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Response sanitizer
//
// Recovers tool calls that a model wrote as `<tool_call>` text instead of
// a structured function call, and rewrites them into the structured shape
// of the wire protocol in use:
// - SSE bodies (Responses and Chat Completions) via `SseSanitizer`
// - buffered JSON bodies via `sanitize_json_body`
// - everything else passes through untouched
//
// Nothing in here fails the response. Input it cannot understand is
// forwarded byte for byte.

mod events;
mod json;
mod markers;
mod parser;
mod sse;
mod tracker;
mod types;

pub use events::{detect_protocol, ChatChunk, Payload, ResponsesEvent, SseEvent};
pub use json::{extract_tool_calls, sanitize_json_body};
pub use parser::{parse_tool_call_block, BUILTIN_TOOLS};
pub use sse::{sanitize_sse_stream, SseSanitizer, StreamState};
pub use tracker::BoundaryTracker;
pub use types::{
    CallIds, ProtocolMode, SanitizeOptions, ToolCallMatch, ToolCallObserver, TrackedText,
    MAX_JSON_BODY_BYTES, TOOL_CALLS_FINISH_REASON,
};

use axum::body::Body;
use axum::http::{header, HeaderMap};

use crate::proxy::{ProxyError, ProxyResponse};

/// How a response body is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyRoute {
    Sse,
    Json,
    Passthrough,
}

/// Pick the body route from the response headers and the caller's hint.
pub fn route_for(headers: &HeaderMap, likely_sse: bool) -> BodyRoute {
    if is_encoded(headers) {
        return BodyRoute::Passthrough;
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_ascii_lowercase();

    if content_type.contains("text/event-stream") || likely_sse {
        BodyRoute::Sse
    } else if content_type.contains("application/json") {
        BodyRoute::Json
    } else {
        BodyRoute::Passthrough
    }
}

/// Rewrite textual tool calls in a response.
///
/// Status and headers are kept, except `Content-Length`, which is always
/// removed because the body length may change. The only error is a
/// failure to read a buffered JSON body from the transport.
pub async fn sanitize_response(
    response: ProxyResponse,
    options: SanitizeOptions,
) -> Result<ProxyResponse, ProxyError> {
    let ProxyResponse {
        status,
        mut headers,
        body,
    } = response;
    headers.remove(header::CONTENT_LENGTH);

    let route = route_for(&headers, options.likely_sse);
    tracing::debug!(route = ?route, status = status.as_u16(), "sanitizer route selected");

    let body = match route {
        BodyRoute::Passthrough => body,
        BodyRoute::Sse => Body::from_stream(sanitize_sse_stream(body.into_data_stream(), options)),
        BodyRoute::Json => {
            let buffered = axum::body::to_bytes(body, MAX_JSON_BODY_BYTES)
                .await
                .map_err(|e| ProxyError::UpstreamFailure(format!("failed to read response body: {e}")))?;
            Body::from(sanitize_json_body(&buffered, &options))
        }
    };

    Ok(ProxyResponse {
        status,
        headers,
        body,
    })
}

/// A body still carrying a non-identity content encoding cannot be
/// inspected.
fn is_encoded(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| !v.trim().is_empty() && !v.trim().eq_ignore_ascii_case("identity"))
}
