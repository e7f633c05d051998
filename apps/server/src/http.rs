//! HTTP surface
//!
//! POST /chat/stream -> SSE event stream; GET /citation/{id}, /health,
//! /sessions. Chat failures are reported in-band on the stream so the HTTP
//! status stays 200 and intermediate proxies do not truncate.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;

use deepmed_core::{ChatRequest, PipelineStats, RequestPipeline, SessionInfo};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<RequestPipeline>,
}

pub fn router(pipeline: Arc<RequestPipeline>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/sessions", get(sessions))
        .route("/citation/{id}", get(citation))
        .route("/chat/stream", post(chat_stream))
        .with_state(AppState { pipeline })
}

/// Cancels the per-request token when the SSE body is dropped, which is how
/// a client disconnect reaches the orchestrator.
struct CancelOnDrop(CancellationToken);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

async fn chat_stream(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let handle = state.pipeline.submit(request).await;
    let guard = CancelOnDrop(handle.cancel.clone());

    let stream = UnboundedReceiverStream::new(handle.events).map(move |event| {
        // The guard lives inside the stream; dropping the response body
        // (client gone) cancels the session.
        let _ = &guard;
        let data = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
        Ok(Event::default().data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}

#[derive(Debug, Serialize)]
struct RootResponse {
    message: &'static str,
    version: &'static str,
    status: &'static str,
}

async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        message: "DeepMed API Server",
        version: deepmed_core::VERSION,
        status: "running",
    })
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(flatten)]
    stats: PipelineStats,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        stats: state.pipeline.stats(),
    })
}

async fn sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.pipeline.sessions().snapshot())
}

#[derive(Debug, Deserialize)]
struct CitationQuery {
    session_id: Option<String>,
}

#[derive(Debug, Serialize)]
struct CitationResponse {
    id: u32,
    full_content: String,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

async fn citation(
    State(state): State<AppState>,
    Path(id): Path<u32>,
    Query(query): Query<CitationQuery>,
) -> Result<Json<CitationResponse>, (StatusCode, Json<ErrorResponse>)> {
    match state
        .pipeline
        .citations()
        .lookup(query.session_id.as_deref(), id)
    {
        Ok(citation) => Ok(Json(CitationResponse {
            id: citation.id,
            full_content: citation.full_content,
        })),
        Err(e) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse { error: e.to_string() }),
        )),
    }
}
