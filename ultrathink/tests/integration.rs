// Copyright 2026 The Ultrathink Project
// SPDX-License-Identifier: Apache-2.0

// Integration tests
//
// End-to-end tests exercising the full ultrathink pipeline:
// request → gate → inject → upstream → sanitize → response
//
// Uses wiremock as the upstream mock, tower::ServiceExt::oneshot for
// in-process HTTP, and real engine deps (no mocks except HTTP target).

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bytes::Bytes;
use std::sync::Arc;
use tower::ServiceExt;
use ultrathink::config::{self, StringSource};
use ultrathink::engine::build_engine_client;
use ultrathink::proxy;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ---------------------------------------------------------------------------
// Test config YAML
// ---------------------------------------------------------------------------

const TEST_YAML: &str = r#"ultrathink: v1
enabled: true
provider: openai
models: ["glm"]
mode: prefix
instruction: "Ultrathink"
use_default_failure_patterns: true
sanitize:
  enabled: true
upstream:
  base_url: "MOCK_URL"
  timeout_ms: 1000
environment: "test"
"#;

// ---------------------------------------------------------------------------
// Infrastructure
// ---------------------------------------------------------------------------

/// Build the production router with the real engine, HTTP pointed at `base_url`.
fn build_app(base_url: &str) -> axum::Router {
    let source = StringSource {
        content: TEST_YAML.replace("MOCK_URL", base_url),
    };
    let config = Arc::new(config::load_config(&source).expect("test config should parse"));
    let upstream: Arc<dyn proxy::UpstreamClient> = Arc::new(build_engine_client(config));
    proxy::build_router(upstream)
}

fn json_request(path_str: &str, body: &serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(path_str)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn body_bytes(resp: axum::response::Response) -> Bytes {
    axum::body::to_bytes(resp.into_body(), 10 * 1024 * 1024)
        .await
        .unwrap()
}

/// `data:` payloads of an SSE body, `[DONE]` excluded.
fn data_payloads(body: &str) -> Vec<serde_json::Value> {
    body.split("\n\n")
        .filter_map(|event| {
            event
                .lines()
                .find_map(|line| line.strip_prefix("data:"))
                .map(str::trim)
        })
        .filter(|data| *data != "[DONE]")
        .map(|data| serde_json::from_str(data).unwrap())
        .collect()
}

async fn received_body(server: &MockServer) -> serde_json::Value {
    let requests = server.received_requests().await.unwrap();
    let last = requests.last().expect("upstream should have been called");
    serde_json::from_slice(&last.body).unwrap()
}

fn chat_chunk(content: &str) -> String {
    let chunk = serde_json::json!({
        "id": "chatcmpl-9",
        "object": "chat.completion.chunk",
        "created": 1_760_000_000u64,
        "model": "glm-4.6",
        "choices": [{"index": 0, "delta": {"content": content}, "finish_reason": null}]
    });
    format!("data: {chunk}\n\n")
}

fn responses_event(payload: serde_json::Value) -> String {
    let name = payload["type"].as_str().unwrap().to_string();
    format!("event: {name}\ndata: {payload}\n\n")
}

// ---------------------------------------------------------------------------
// Chat Completions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_streaming_chat_tool_call_is_recovered() {
    let mock_server = MockServer::start().await;

    let upstream_response = serde_json::json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {
                "role": "assistant",
                "content": "Let me look.\n<tool_call>read<arg_key>filePath</arg_key><arg_value>/src/main.rs</arg_value></tool_call>"
            },
            "finish_reason": "stop"
        }]
    });

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_response))
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let req = json_request(
        "/v1/chat/completions",
        &serde_json::json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "open main"}]}),
    );
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::OK);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    let choice = &json["choices"][0];
    assert_eq!(choice["finish_reason"], "tool_calls");
    assert!(!choice["message"]["content"].as_str().unwrap().contains("<tool_call"));

    let call = &choice["message"]["tool_calls"][0];
    assert_eq!(call["type"], "function");
    assert!(call["id"].as_str().unwrap().starts_with("call_"));
    assert_eq!(call["function"]["name"], "read");
    let args: serde_json::Value =
        serde_json::from_str(call["function"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args["filePath"], "/src/main.rs");

    let sent = received_body(&mock_server).await;
    assert_eq!(sent["messages"][0]["content"], "Ultrathink\n\nopen main");
}

#[tokio::test]
async fn streaming_chat_tool_call_is_recovered() {
    let mock_server = MockServer::start().await;

    let sse = [
        chat_chunk("Running it now. <tool"),
        chat_chunk("_call>bash<arg_key>command</arg_key>"),
        chat_chunk("<arg_value>cargo fmt --check</arg_value></tool_call>"),
        "data: [DONE]\n\n".to_string(),
    ]
    .concat();

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let req = json_request(
        "/v1/chat/completions",
        &serde_json::json!({"model": "glm-4.6", "stream": true, "messages": [{"role": "user", "content": "fmt"}]}),
    );
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(!body.contains("<tool_call"), "markup leaked: {body}");
    assert!(body.trim_end().ends_with("data: [DONE]"));

    let payloads = data_payloads(&body);
    let visible: String = payloads
        .iter()
        .filter_map(|p| p["choices"][0]["delta"]["content"].as_str())
        .collect();
    assert_eq!(visible, "Running it now. ");

    let tool_chunk = payloads
        .iter()
        .find(|p| p["choices"][0]["delta"]["tool_calls"].is_array())
        .expect("tool call chunk");
    let call = &tool_chunk["choices"][0]["delta"]["tool_calls"][0];
    assert_eq!(call["index"], 0);
    assert_eq!(call["function"]["name"], "bash");
    assert_eq!(tool_chunk["id"], "chatcmpl-9");
    assert!(payloads
        .iter()
        .any(|p| p["choices"][0]["finish_reason"] == "tool_calls"));
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

#[tokio::test]
async fn streaming_responses_tool_call_becomes_function_call_item() {
    let mock_server = MockServer::start().await;

    let sse = [
        responses_event(serde_json::json!({"type": "response.created", "response": {"id": "resp_1"}})),
        responses_event(serde_json::json!({"type": "response.output_item.added", "output_index": 0, "item": {"type": "message", "id": "msg_1"}})),
        responses_event(serde_json::json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "Searching.<tool_call>grep<arg_key>pattern</arg_key>"})),
        responses_event(serde_json::json!({"type": "response.output_text.delta", "item_id": "msg_1", "output_index": 0, "content_index": 0, "delta": "<arg_value>TODO</arg_value></tool_call>"})),
        responses_event(serde_json::json!({"type": "response.completed", "response": {"id": "resp_1"}})),
    ]
    .concat();

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let req = json_request(
        "/v1/responses",
        &serde_json::json!({"model": "glm-4.6", "stream": true, "input": "find todos"}),
    );
    let resp = app.oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = String::from_utf8(body_bytes(resp).await.to_vec()).unwrap();
    assert!(!body.contains("<tool_call"), "markup leaked: {body}");
    assert!(body.contains("event: response.function_call_arguments.delta\n"));

    let payloads = data_payloads(&body);
    let added = payloads
        .iter()
        .find(|p| p["type"] == "response.output_item.added" && p["item"]["type"] == "function_call")
        .expect("function_call item added");
    assert_eq!(added["output_index"], 1);
    assert_eq!(added["item"]["name"], "grep");
    assert!(added["item"]["id"].as_str().unwrap().starts_with("fc_"));
    assert!(added["item"]["call_id"].as_str().unwrap().starts_with("call_"));

    let done = payloads
        .iter()
        .find(|p| p["type"] == "response.output_item.done")
        .expect("function_call item done");
    assert_eq!(done["item"]["status"], "completed");
    let args: serde_json::Value =
        serde_json::from_str(done["item"]["arguments"].as_str().unwrap()).unwrap();
    assert_eq!(args["pattern"], "TODO");

    let sent = received_body(&mock_server).await;
    assert_eq!(sent["input"], "Ultrathink\n\nfind todos");
}

#[tokio::test]
async fn non_streaming_responses_output_gets_function_call() {
    let mock_server = MockServer::start().await;

    let upstream_response = serde_json::json!({
        "id": "resp_2",
        "object": "response",
        "output": [{
            "type": "message",
            "id": "msg_1",
            "role": "assistant",
            "content": [{"type": "output_text", "text": "<tool_call>list<arg_key>path</arg_key><arg_value>/tmp</arg_value></tool_call>"}]
        }]
    });

    Mock::given(method("POST"))
        .and(path("/v1/responses"))
        .respond_with(ResponseTemplate::new(200).set_body_json(&upstream_response))
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let req = json_request("/v1/responses", &serde_json::json!({"model": "glm-4.6", "input": "ls"}));
    let resp = app.oneshot(req).await.unwrap();

    let json: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    let output = json["output"].as_array().unwrap();
    assert_eq!(output.len(), 2);
    assert_eq!(output[1]["type"], "function_call");
    assert_eq!(output[1]["name"], "list");
    assert_eq!(output[1]["status"], "completed");
}

// ---------------------------------------------------------------------------
// Pass-through
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ungated_model_is_passed_through_verbatim() {
    let mock_server = MockServer::start().await;

    let sse = format!(
        "{}data: [DONE]\n\n",
        chat_chunk("<tool_call>bash<arg_key>command</arg_key><arg_value>ls</arg_value></tool_call>")
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse.clone(), "text/event-stream"))
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let request_body =
        serde_json::json!({"model": "gpt-4o", "stream": true, "messages": [{"role": "user", "content": "hi"}]});
    let resp = app
        .oneshot(json_request("/v1/chat/completions", &request_body))
        .await
        .unwrap();

    assert_eq!(body_bytes(resp).await, Bytes::from(sse));
    assert_eq!(received_body(&mock_server).await, request_body);
}

#[tokio::test]
async fn upstream_error_status_is_passed_through() {
    let mock_server = MockServer::start().await;
    let error = serde_json::json!({"error": {"message": "rate limited", "type": "rate_limit_error"}});

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429).set_body_json(&error))
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let req = json_request(
        "/v1/chat/completions",
        &serde_json::json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hi"}]}),
    );
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::TOO_MANY_REQUESTS);
    let json: serde_json::Value = serde_json::from_slice(&body_bytes(resp).await).unwrap();
    assert_eq!(json, error);
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Parse an OpenAI-style error reply produced by the proxy itself.
async fn error_body(resp: axum::response::Response) -> serde_json::Value {
    assert_eq!(resp.headers()["content-type"], "application/json");
    let body = body_bytes(resp).await;
    serde_json::from_slice(&body).expect("error reply is JSON")
}

#[tokio::test]
async fn timeout_returns_504() {
    let mock_server = MockServer::start().await;

    // Respond with a delay longer than timeout_ms (1000ms in config)
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"choices": []}))
                .set_delay(std::time::Duration::from_millis(2500)),
        )
        .mount(&mock_server)
        .await;

    let app = build_app(&mock_server.uri());
    let req = json_request(
        "/v1/chat/completions",
        &serde_json::json!({"model": "glm-4.6", "messages": [{"role": "user", "content": "hi"}]}),
    );
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::GATEWAY_TIMEOUT);
    let body = error_body(resp).await;
    assert_eq!(body["error"]["type"], "server_error");
    assert_eq!(body["error"]["message"], "upstream request timed out");
}

#[tokio::test]
async fn unreachable_upstream_returns_502() {
    // Bind then drop to get a port nothing listens on.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let app = build_app(&format!("http://{addr}"));
    let req = json_request(
        "/v1/responses",
        &serde_json::json!({"model": "glm-4.6", "input": "hi"}),
    );
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    let body = error_body(resp).await;
    assert_eq!(body["error"]["type"], "server_error");
    assert_eq!(body["error"]["message"], "upstream request failed");
}

#[tokio::test]
async fn unknown_path_never_reaches_upstream() {
    let mock_server = MockServer::start().await;
    let app = build_app(&mock_server.uri());

    let req = json_request("/v1/embeddings", &serde_json::json!({"model": "glm-4.6", "input": "x"}));
    let resp = app.oneshot(req).await.unwrap();

    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(error_body(resp).await["error"]["message"], "unknown path");
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}
