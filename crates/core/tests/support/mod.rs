//! Shared harness for pipeline integration tests: mock LLM and retrieval
//! services on ephemeral-port listeners.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde_json::{json, Value};
use tokio_stream::StreamExt;

use deepmed_core::{ServerConfig, StreamEvent, StreamHandle};

/// One scripted completion: deltas streamed with an optional per-delta delay.
pub struct MockReply {
    pub deltas: Vec<String>,
    pub delay: Duration,
}

impl MockReply {
    /// Split `text` into small deltas so delimiter handling across delta
    /// boundaries is exercised.
    pub fn text(text: &str) -> Self {
        Self { deltas: split_deltas(text, 12), delay: Duration::ZERO }
    }

    pub fn slow(text: &str, delay: Duration) -> Self {
        Self { deltas: split_deltas(text, 12), delay }
    }
}

fn split_deltas(text: &str, width: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(width)
        .map(|chunk| chunk.iter().collect())
        .collect()
}

/// Mock chat-completions backend. Replies are served in order; an exhausted
/// script streams an empty completion.
#[derive(Clone)]
pub struct MockLlm {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
}

impl MockLlm {
    pub fn new(replies: Vec<MockReply>) -> Self {
        Self { replies: Arc::new(Mutex::new(replies.into_iter().collect())) }
    }

    pub async fn spawn(self) -> SocketAddr {
        let router = Router::new()
            .route("/v1/chat/completions", post(completions))
            .with_state(self);
        spawn_router(router).await
    }
}

fn chunk_frame(delta: &str) -> String {
    json!({
        "id": "cmpl-mock",
        "object": "chat.completion.chunk",
        "created": 1,
        "model": "mock",
        "choices": [{
            "index": 0,
            "delta": { "content": delta },
            "finish_reason": Value::Null
        }]
    })
    .to_string()
}

async fn completions(
    State(mock): State<MockLlm>,
    Json(_body): Json<Value>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let reply = mock
        .replies
        .lock()
        .expect("mock replies lock")
        .pop_front()
        .unwrap_or(MockReply { deltas: Vec::new(), delay: Duration::ZERO });

    let delay = reply.delay;
    let mut frames: Vec<String> = reply.deltas.iter().map(|d| chunk_frame(d)).collect();
    frames.push("[DONE]".to_string());

    let stream = tokio_stream::iter(frames).then(move |frame| async move {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(Event::default().data(frame))
    });
    Sse::new(stream)
}

async fn retrieve(State(response): State<Arc<Value>>, _body: Json<Value>) -> Json<Value> {
    Json((*response).clone())
}

/// Mock retrieval service returning a fixed response body.
pub async fn spawn_retrieval(response: Value) -> SocketAddr {
    let router = Router::new()
        .route("/retrieve", post(retrieve))
        .with_state(Arc::new(response));
    spawn_router(router).await
}

/// A two-snippet retrieval response about metformin.
pub fn metformin_retrieval_response() -> Value {
    json!({
        "code": 0,
        "data": {
            "chunks": [
                {
                    "content": "Metformin is recommended as the first-line pharmacologic therapy for type 2 diabetes.",
                    "similarity": 0.91,
                    "document_id": "d1"
                },
                {
                    "content": "Metformin lowers hepatic glucose production and improves insulin sensitivity.",
                    "similarity": 0.84,
                    "document_id": "d2"
                }
            ],
            "doc_aggs": [
                { "doc_id": "d1", "doc_name": "Diabetes Guidelines" },
                { "doc_id": "d2", "doc_name": "Pharmacology Textbook" }
            ],
            "total": 2
        }
    })
}

pub async fn spawn_router(router: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    addr
}

/// An address nothing listens on.
pub async fn unreachable_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    addr
}

pub fn test_config(
    llm_addr: SocketAddr,
    retrieval_addr: Option<SocketAddr>,
    overrides: &[(&str, &str)],
) -> ServerConfig {
    let mut kv: HashMap<String, String> = HashMap::new();
    kv.insert("LLM_BASE_URL".to_string(), format!("http://{}/v1", llm_addr));
    if let Some(addr) = retrieval_addr {
        kv.insert(
            "RETRIEVAL_BASE_URL".to_string(),
            format!("http://{}/retrieve", addr),
        );
    }
    for (key, value) in overrides {
        kv.insert((*key).to_string(), (*value).to_string());
    }
    ServerConfig::from_kv(&kv).expect("test config")
}

/// Drain a stream handle to completion.
pub async fn collect_events(handle: &mut StreamHandle) -> Vec<StreamEvent> {
    let mut events = Vec::new();
    while let Some(event) = handle.events.recv().await {
        events.push(event);
    }
    events
}
