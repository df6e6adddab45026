// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// HTTP surface
//
// Responsibilities:
// - Wire-API detection from request path
// - Request validation (non-empty JSON body)
// - Request forwarding via injected UpstreamClient trait
// - Heartbeat endpoint
// - 404 for unknown paths

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bytes::Bytes;
use std::sync::Arc;

use crate::provider::openai_error_body;

// ---------------------------------------------------------------------------
// Domain types
// ---------------------------------------------------------------------------

/// Wire API detected from the request path.
///
/// Both are OpenAI-compatible surfaces; which vendor actually serves them is
/// decided by the configured upstream base URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireApi {
    /// `POST /v1/chat/completions`
    ChatCompletions,
    /// `POST /v1/responses`
    Responses,
}

impl WireApi {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ChatCompletions => "chat_completions",
            Self::Responses => "responses",
        }
    }
}

/// Inbound request data forwarded to the upstream client.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Response received from the upstream provider.
#[derive(Debug)]
pub struct ProxyResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Body,
}

impl ProxyResponse {
    pub fn from_bytes(status: StatusCode, body: Vec<u8>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Body::from(body),
        }
    }
}

/// Errors that can occur during upstream forwarding.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    #[error("upstream request failed: {0}")]
    UpstreamFailure(String),

    #[error("upstream request timed out: {0}")]
    UpstreamTimeout(String),

    #[error("request body is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("request body is empty")]
    EmptyBody,

    #[error("failed to read request body: {0}")]
    UnreadableBody(String),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::MalformedJson(_)
            | ProxyError::EmptyBody
            | ProxyError::UnreadableBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Client-facing message. Upstream details stay in the logs.
    fn public_message(&self) -> &'static str {
        match self {
            ProxyError::UpstreamFailure(_) => "upstream request failed",
            ProxyError::UpstreamTimeout(_) => "upstream request timed out",
            ProxyError::MalformedJson(_) => "request body is not valid JSON",
            ProxyError::EmptyBody => "request body is empty",
            ProxyError::UnreadableBody(_) => "failed to read request body",
        }
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> axum::response::Response {
        error_response(self.status(), self.public_message())
    }
}

/// JSON error reply in the OpenAI `{"error": {...}}` shape.
pub fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        [(header::CONTENT_TYPE, HeaderValue::from_static("application/json"))],
        openai_error_body(message, status.as_u16()),
    )
        .into_response()
}

// ---------------------------------------------------------------------------
// Trait: UpstreamClient (dependency injection point)
// ---------------------------------------------------------------------------

/// Abstraction over whatever turns a validated request into an upstream
/// response. The engine implements it; tests substitute mocks.
///
/// Implementations must be Send + Sync so they can be shared across request
/// handlers via `Arc`.
#[async_trait::async_trait]
pub trait UpstreamClient: Send + Sync {
    async fn forward(
        &self,
        wire_api: WireApi,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError>;
}

// ---------------------------------------------------------------------------
// Wire-API detection
// ---------------------------------------------------------------------------

/// Detect the wire API from a POST request path.
///
/// A single trailing slash is tolerated. Returns `None` for every other path.
pub fn detect_wire_api(path: &str) -> Option<WireApi> {
    let path = path.strip_suffix('/').unwrap_or(path);
    match path {
        "/v1/chat/completions" => Some(WireApi::ChatCompletions),
        "/v1/responses" => Some(WireApi::Responses),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Shared application state
// ---------------------------------------------------------------------------

/// Shared state injected into axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Heartbeat endpoint: GET /v1/heartbeat -> 200 OK
pub async fn heartbeat() -> StatusCode {
    StatusCode::OK
}

/// Upper bound on inbound request bodies.
const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Proxy handler for the two wire-API paths.
///
/// Validates the request, detects the wire API, forwards via the injected
/// upstream client and returns the (possibly still streaming) response.
pub async fn proxy_handler(
    State(state): State<AppState>,
    request: Request<Body>,
) -> impl IntoResponse {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let headers = request.headers().clone();

    let wire_api = match detect_wire_api(uri.path()) {
        Some(w) if method == Method::POST => w,
        _ => return error_response(StatusCode::NOT_FOUND, "unknown path"),
    };

    let body = match axum::body::to_bytes(request.into_body(), MAX_REQUEST_BODY_BYTES).await {
        Ok(b) => b,
        Err(e) => return ProxyError::UnreadableBody(e.to_string()).into_response(),
    };

    if body.is_empty() {
        return ProxyError::EmptyBody.into_response();
    }
    if let Err(e) = serde_json::from_slice::<serde_json::Value>(&body) {
        return ProxyError::MalformedJson(e.to_string()).into_response();
    }

    let proxy_req = ProxyRequest {
        method,
        uri,
        headers,
        body,
    };

    match state.upstream.forward(wire_api, proxy_req).await {
        Ok(resp) => {
            let mut response = Response::new(resp.body);
            *response.status_mut() = resp.status;
            *response.headers_mut() = resp.headers;
            response.into_response()
        }
        Err(e) => {
            tracing::warn!(wire_api = wire_api.as_str(), error = %e, "upstream forward failed");
            e.into_response()
        }
    }
}

// ---------------------------------------------------------------------------
// Router construction
// ---------------------------------------------------------------------------

/// Build the axum router with the proxy routes and the heartbeat endpoint.
///
/// The upstream client is injected; no side effects, no hard-coded clients.
pub fn build_router(upstream: Arc<dyn UpstreamClient>) -> Router {
    let state = AppState { upstream };

    Router::new()
        .route("/v1/heartbeat", get(heartbeat))
        .fallback(proxy_handler)
        .with_state(state)
}

/// The address the proxy binds to. Always localhost, never 0.0.0.0.
pub const BIND_ADDR: ([u8; 4], u16) = ([127, 0, 0, 1], 9800);

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
