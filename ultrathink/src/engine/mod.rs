// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Engine integration
//
// Wires the request and response sides together:
// - Model gate (which requests are touched at all)
// - Instruction injection via the wire-API request adapter
// - Forward to the configured upstream
// - Decompression of buffered bodies
// - Response sanitizing (streaming and non-streaming)

use flate2::read::{DeflateDecoder, GzDecoder};
use std::io::Read as _;

use crate::config::{Config, InjectionMode};
use crate::inject::{
    ConfiguredInstruction, InjectionContext, InstructionBuilder, PatternFailureHeuristic,
};
use crate::provider::{adapter_for, inject_into_body, RequestAdapter};
use crate::proxy::{ProxyError, ProxyRequest, ProxyResponse, UpstreamClient, WireApi};
use crate::sanitize::{sanitize_response, SanitizeOptions};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use bytes::Bytes;
use futures_util::stream::{Stream, StreamExt};
use futures_util::TryStreamExt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request context for structured logging
// ---------------------------------------------------------------------------

struct RequestContext {
    request_id: String,
    config_hash: String,
    wire_api: WireApi,
    model: String,
    stream: bool,
}

// ---------------------------------------------------------------------------
// Interfaces
// ---------------------------------------------------------------------------

/// Sends HTTP requests to the upstream provider.
#[async_trait]
pub trait HttpSender: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError>;
}

/// Provides request adapters per wire API.
pub trait AdapterRegistry: Send + Sync {
    fn adapter_for(&self, wire_api: WireApi) -> Box<dyn RequestAdapter>;
}

// ---------------------------------------------------------------------------
// Transport types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub timeout_ms: Option<u64>,
    pub stream: bool,
}

pub enum HttpBody {
    Full(Bytes),
    Stream(Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>),
}

pub struct HttpResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: HttpBody,
}

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("upstream request failed: {0}")]
    Transport(String),
    #[error("upstream request timed out: {0}")]
    Timeout(String),
}

impl From<HttpError> for ProxyError {
    fn from(e: HttpError) -> Self {
        match e {
            HttpError::Timeout(msg) => ProxyError::UpstreamTimeout(msg),
            HttpError::Transport(msg) => ProxyError::UpstreamFailure(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// Engine dependencies
// ---------------------------------------------------------------------------

pub struct EngineDeps {
    pub config: Arc<Config>,
    pub http: Arc<dyn HttpSender>,
    pub registry: Arc<dyn AdapterRegistry>,
    pub instruction: Arc<dyn InstructionBuilder>,
}

// ---------------------------------------------------------------------------
// EngineUpstreamClient
// ---------------------------------------------------------------------------

/// Upstream client that runs the full ultrathink pipeline.
pub struct EngineUpstreamClient {
    deps: EngineDeps,
}

impl EngineUpstreamClient {
    pub fn new_with(deps: EngineDeps) -> Self {
        Self { deps }
    }
}

#[async_trait]
impl UpstreamClient for EngineUpstreamClient {
    async fn forward(
        &self,
        wire_api: WireApi,
        request: ProxyRequest,
    ) -> Result<ProxyResponse, ProxyError> {
        let config = &self.deps.config;
        let started = Instant::now();

        let ctx = RequestContext {
            request_id: Uuid::new_v4().to_string(),
            config_hash: config.config_hash.clone(),
            wire_api,
            model: extract_model(&request.body),
            stream: is_streaming_request(&request.body),
        };

        // 1) Gate
        let gated = config.enabled && config.gate.allows(&ctx.model);
        let sanitizing = gated && config.sanitize.enabled;

        tracing::debug!(
            request_id = %ctx.request_id,
            wire_api = ctx.wire_api.as_str(),
            model = %ctx.model,
            stream = ctx.stream,
            gated,
            "processing request"
        );

        // 2) Inject
        let body = if gated {
            self.inject_instruction(&request.body, &ctx)
        } else {
            request.body.clone()
        };

        // 3) Forward
        // Host points at the proxy; reqwest sets the upstream one. The body
        // may have changed size, so Content-Length is recomputed too.
        let mut fwd_headers = request.headers.clone();
        fwd_headers.remove(header::HOST);
        fwd_headers.remove(header::CONTENT_LENGTH);
        if sanitizing {
            // An encoded event stream cannot be sanitized.
            fwd_headers.remove(header::ACCEPT_ENCODING);
        }

        let http_req = HttpRequest {
            method: request.method.clone(),
            url: build_upstream_url(&config.upstream.base_url, &request.uri),
            headers: fwd_headers,
            body,
            timeout_ms: config.upstream.timeout_ms,
            stream: ctx.stream,
        };

        let upstream = self.deps.http.send(http_req).await.map_err(|e| {
            tracing::warn!(
                request_id = %ctx.request_id,
                wire_api = ctx.wire_api.as_str(),
                model = %ctx.model,
                error = %e,
                "upstream request failed"
            );
            ProxyError::from(e)
        })?;

        tracing::info!(
            request_id = %ctx.request_id,
            config_hash = %ctx.config_hash,
            wire_api = ctx.wire_api.as_str(),
            model = %ctx.model,
            status = upstream.status.as_u16(),
            latency_ms = started.elapsed().as_secs_f64() * 1000.0,
            "upstream responded"
        );

        let response = read_upstream(upstream, &ctx).await?;

        // 4) Sanitize
        if !sanitizing {
            return Ok(response);
        }
        let options = SanitizeOptions::default()
            .with_observer(tool_call_logger(&ctx))
            .likely_sse(config.sanitize.likely_sse || ctx.stream);
        sanitize_response(response, options).await
    }
}

impl EngineUpstreamClient {
    /// Build and inject the instruction. Any failure forwards the original
    /// body.
    fn inject_instruction(&self, body: &Bytes, ctx: &RequestContext) -> Bytes {
        let config = &self.deps.config;
        let mode = config.injection.mode;
        if mode == InjectionMode::SanitizeOnly {
            return body.clone();
        }

        let adapter = self.deps.registry.adapter_for(ctx.wire_api);
        let gate_key = config.gate.key(&ctx.model);
        let result = inject_into_body(adapter.as_ref(), body, mode, |last_assistant_text| {
            self.deps.instruction.build(&InjectionContext {
                gate_key,
                last_assistant_text,
            })
        });

        match result {
            Ok(injection) => {
                tracing::info!(
                    request_id = %ctx.request_id,
                    wire_api = adapter.wire_api().as_str(),
                    model = %ctx.model,
                    mode = mode.as_str(),
                    verdict = injection.outcome.as_str(),
                    "instruction injection"
                );
                injection.body.map(Bytes::from).unwrap_or_else(|| body.clone())
            }
            Err(e) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    wire_api = adapter.wire_api().as_str(),
                    error = %e,
                    "instruction injection skipped"
                );
                body.clone()
            }
        }
    }
}

/// Turn the transport response into a proxy response. Buffered bodies
/// are decompressed so the JSON sanitizer can read them.
async fn read_upstream(
    upstream: HttpResponse,
    ctx: &RequestContext,
) -> Result<ProxyResponse, ProxyError> {
    let mut headers = upstream.headers;

    if ctx.stream {
        // Content-Encoding on SSE is rare (providers send chunked transfer,
        // not gzip'd SSE). The sanitizer passes such bodies through.
        if is_gzip(&headers) || is_deflate(&headers) {
            tracing::warn!(
                request_id = %ctx.request_id,
                "streaming response has Content-Encoding; passing through without sanitizing"
            );
        }
        let body = match upstream.body {
            HttpBody::Full(bytes) => Body::from(bytes),
            HttpBody::Stream(s) => Body::from_stream(s),
        };
        return Ok(ProxyResponse {
            status: upstream.status,
            headers,
            body,
        });
    }

    let body_bytes = match upstream.body {
        HttpBody::Full(b) => b,
        HttpBody::Stream(mut s) => {
            let mut collected = Vec::new();
            while let Some(chunk) = s.next().await {
                let bytes = chunk.map_err(|e| ProxyError::UpstreamFailure(e.to_string()))?;
                collected.extend_from_slice(&bytes);
            }
            Bytes::from(collected)
        }
    };

    // Strips Content-Encoding/Content-Length from forwarded headers.
    let body_bytes = maybe_decompress(&mut headers, body_bytes)?;

    Ok(ProxyResponse {
        status: upstream.status,
        headers,
        body: Body::from(body_bytes),
    })
}

/// Observer that logs every recovered tool call against the request.
fn tool_call_logger(ctx: &RequestContext) -> impl Fn(&str) + Send + Sync + 'static {
    let request_id = ctx.request_id.clone();
    let model = ctx.model.clone();
    let wire_api = ctx.wire_api.as_str();
    move |tool_name: &str| {
        tracing::info!(
            request_id = %request_id,
            wire_api,
            model = %model,
            tool_name,
            verdict = "rewrite",
            "textual tool call rewritten"
        );
    }
}

// ---------------------------------------------------------------------------
// Adapter registry
// ---------------------------------------------------------------------------

pub struct DefaultAdapterRegistry;

impl AdapterRegistry for DefaultAdapterRegistry {
    fn adapter_for(&self, wire_api: WireApi) -> Box<dyn RequestAdapter> {
        adapter_for(wire_api)
    }
}

// ---------------------------------------------------------------------------
// Reqwest HTTP sender
// ---------------------------------------------------------------------------

pub struct ReqwestHttpSender {
    client: reqwest::Client,
}

impl ReqwestHttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpSender for ReqwestHttpSender {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let mut req = self
            .client
            .request(request.method, &request.url)
            .headers(request.headers)
            .body(request.body);

        if let Some(timeout_ms) = request.timeout_ms {
            req = req.timeout(std::time::Duration::from_millis(timeout_ms));
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                HttpError::Timeout(e.to_string())
            } else {
                HttpError::Transport(e.to_string())
            }
        })?;

        let status = resp.status();
        let headers = resp.headers().clone();

        if request.stream {
            let stream = resp.bytes_stream().map_err(|e| HttpError::Transport(e.to_string()));
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Stream(Box::pin(stream)),
            })
        } else {
            let body = resp.bytes().await.map_err(|e| {
                if e.is_timeout() {
                    HttpError::Timeout(e.to_string())
                } else {
                    HttpError::Transport(e.to_string())
                }
            })?;
            Ok(HttpResponse {
                status,
                headers,
                body: HttpBody::Full(body),
            })
        }
    }
}

// ---------------------------------------------------------------------------
// Public factory for default engine client
// ---------------------------------------------------------------------------

pub fn build_engine_client(config: Arc<Config>) -> EngineUpstreamClient {
    let heuristic = PatternFailureHeuristic::new(config.injection.failure_patterns.clone());
    let instruction = ConfiguredInstruction::new(
        config.injection.instruction.clone(),
        config.injection.retry_instruction.clone(),
        Arc::new(heuristic),
    );

    let deps = EngineDeps {
        config,
        http: Arc::new(ReqwestHttpSender::new(reqwest::Client::new())),
        registry: Arc::new(DefaultAdapterRegistry),
        instruction: Arc::new(instruction),
    };

    EngineUpstreamClient::new_with(deps)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Check if the response has gzip Content-Encoding.
fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("gzip"))
        .unwrap_or(false)
}

/// Check if the response has deflate Content-Encoding.
fn is_deflate(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().eq_ignore_ascii_case("deflate"))
        .unwrap_or(false)
}

fn decompress_gzip(body: &Bytes) -> Result<Bytes, ProxyError> {
    let mut decoder = GzDecoder::new(&body[..]);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ProxyError::UpstreamFailure(format!("gzip decompression failed: {e}")))?;
    Ok(Bytes::from(decompressed))
}

fn decompress_deflate(body: &Bytes) -> Result<Bytes, ProxyError> {
    let mut decoder = DeflateDecoder::new(&body[..]);
    let mut decompressed = Vec::new();
    decoder
        .read_to_end(&mut decompressed)
        .map_err(|e| ProxyError::UpstreamFailure(format!("deflate decompression failed: {e}")))?;
    Ok(Bytes::from(decompressed))
}

/// Decompress body if Content-Encoding is set. Strips Content-Encoding and
/// Content-Length from headers (body size changed after decompression).
fn maybe_decompress(headers: &mut HeaderMap, body: Bytes) -> Result<Bytes, ProxyError> {
    let result = if is_gzip(headers) {
        decompress_gzip(&body)?
    } else if is_deflate(headers) {
        decompress_deflate(&body)?
    } else {
        return Ok(body);
    };
    headers.remove(header::CONTENT_ENCODING);
    headers.remove(header::CONTENT_LENGTH);
    Ok(result)
}

/// `base_url` joined with the inbound path and query.
fn build_upstream_url(base_url: &str, uri: &Uri) -> String {
    let base = base_url.trim_end_matches('/');
    let path_and_query = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or(uri.path());
    format!("{base}{path_and_query}")
}

fn extract_model(body: &Bytes) -> String {
    serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("model")?.as_str().map(String::from))
        .unwrap_or_default()
}

fn is_streaming_request(body: &Bytes) -> bool {
    let Ok(json) = serde_json::from_slice::<serde_json::Value>(body) else {
        return false;
    };
    json.get("stream")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
