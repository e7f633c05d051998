//! HTTP surface tests against a live listener.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use serde_json::Value;

use deepmed_core::{RequestPipeline, ServerConfig};
use deepmed_server::http;

/// An address nothing listens on, for a dead LLM backend.
async fn unreachable_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);
    addr
}

async fn spawn_server() -> SocketAddr {
    let llm_addr = unreachable_addr().await;
    let kv: HashMap<String, String> = HashMap::from([(
        "LLM_BASE_URL".to_string(),
        format!("http://{}/v1", llm_addr),
    )]);
    let config = ServerConfig::from_kv(&kv).expect("config");
    let pipeline = Arc::new(RequestPipeline::new(config));
    let app = http::router(pipeline);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test]
async fn chat_stream_reports_failures_in_band_with_http_200() {
    let addr = spawn_server().await;

    let response = reqwest::Client::new()
        .post(format!("http://{}/chat/stream", addr))
        .json(&serde_json::json!({ "question": "what is metformin" }))
        .send()
        .await
        .expect("request");

    assert_eq!(response.status(), 200);
    assert!(response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .starts_with("text/event-stream"));

    let mut types = Vec::new();
    let mut stream = response.bytes_stream().eventsource();
    while let Some(frame) = stream.next().await {
        let frame = frame.expect("sse frame");
        if frame.data == "keep-alive" {
            continue;
        }
        let json: Value = serde_json::from_str(&frame.data).expect("event json");
        let event_type = json["type"].as_str().expect("type").to_string();
        let done = event_type == "completed";
        types.push(event_type);
        if done {
            break;
        }
    }

    // The LLM backend is dead: the stream still ends with error + completed.
    assert_eq!(types.first().map(String::as_str), Some("init"));
    assert_eq!(types[types.len() - 2], "error");
    assert_eq!(types.last().map(String::as_str), Some("completed"));
}

#[tokio::test]
async fn health_exposes_admission_counters() {
    let addr = spawn_server().await;

    let body: Value = reqwest::get(format!("http://{}/health", addr))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");

    assert_eq!(body["status"], "healthy");
    assert_eq!(body["max_concurrent"], 3);
    assert_eq!(body["available_slots"], 3);
    assert_eq!(body["processing_count"], 0);
    assert_eq!(body["active_sessions"], 0);
}

#[tokio::test]
async fn unknown_citation_is_a_404() {
    let addr = spawn_server().await;

    let response = reqwest::get(format!("http://{}/citation/42", addr))
        .await
        .expect("request");
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.expect("json");
    assert!(body["error"].as_str().unwrap_or_default().contains("42"));
}

#[tokio::test]
async fn root_and_sessions_endpoints_respond() {
    let addr = spawn_server().await;

    let root: Value = reqwest::get(format!("http://{}/", addr))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert_eq!(root["message"], "DeepMed API Server");
    assert_eq!(root["status"], "running");

    let sessions: Value = reqwest::get(format!("http://{}/sessions", addr))
        .await
        .expect("request")
        .json()
        .await
        .expect("json");
    assert!(sessions.as_array().expect("array").is_empty());
}
