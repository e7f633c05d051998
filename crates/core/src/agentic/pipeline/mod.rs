//! Request pipeline
//!
//! Admission control over a counting semaphore, per-request isolation,
//! client-disconnect propagation, and the terminal-event guarantee: every
//! admitted stream ends with exactly one terminal event followed by one
//! `completed`, no matter how the orchestrator finished.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::agentic::events::{EventSink, EventType, StreamEvent};
use crate::agentic::orchestrator::{ReasoningOrchestrator, RunContext};
use crate::agentic::session::{SessionRegistry, SessionStatus};
use crate::agentic::tools::{
    CodeExecutionTool, DepartmentClassifier, JudgeTool, RetrievalTool, ToolRegistry,
};
use crate::infrastructure::llm::{GenerationConfig, LlmClient};
use crate::service::citations::CitationStore;
use crate::service::config::ServerConfig;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub question: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub presence_penalty: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// One admitted (or synthetically rejected) stream.
pub struct StreamHandle {
    pub session_id: String,
    pub events: mpsc::UnboundedReceiver<StreamEvent>,
    pub cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct PipelineStats {
    pub max_concurrent: usize,
    pub available_slots: usize,
    pub processing_count: usize,
    pub active_sessions: usize,
}

pub struct RequestPipeline {
    config: ServerConfig,
    llm: Arc<LlmClient>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionRegistry>,
    citations: Arc<CitationStore>,
    semaphore: Arc<Semaphore>,
}

impl RequestPipeline {
    /// Build the pipeline and start the background sweeper. Must run inside
    /// a tokio runtime.
    pub fn new(config: ServerConfig) -> Self {
        let llm = Arc::new(LlmClient::new(&config.llm));
        let citations = Arc::new(CitationStore::new(Duration::from_secs(
            config.citation_ttl_secs,
        )));
        let sessions = Arc::new(SessionRegistry::new());

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(RetrievalTool::new(
            config.retrieval.clone(),
            DepartmentClassifier::new(llm.clone()),
        )));
        tools.register(Arc::new(CodeExecutionTool::new(config.sandbox.clone())));
        tools.register(Arc::new(JudgeTool::new(llm.clone())));

        let semaphore = Arc::new(Semaphore::new(config.max_concurrent_requests));

        let pipeline = Self {
            config,
            llm,
            tools: Arc::new(tools),
            sessions,
            citations,
            semaphore,
        };
        pipeline.spawn_sweeper();
        pipeline
    }

    fn spawn_sweeper(&self) {
        let citations = self.citations.clone();
        let sessions = self.sessions.clone();
        let grace = Duration::from_secs(self.config.citation_ttl_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                citations.sweep();
                sessions.sweep_expired(grace);
            }
        });
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn citations(&self) -> &CitationStore {
        &self.citations
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            max_concurrent: self.config.max_concurrent_requests,
            available_slots: self.semaphore.available_permits(),
            processing_count: self.sessions.processing_count(),
            active_sessions: self.sessions.len(),
        }
    }

    /// Admit a chat request and start its orchestrator.
    ///
    /// Always returns a stream handle; rejection and validation failures are
    /// reported in-band as an `error` + `completed` pair so the HTTP status
    /// can stay 200.
    pub async fn submit(&self, request: ChatRequest) -> StreamHandle {
        if request.question.trim().is_empty() {
            return Self::synthetic_stream("question must not be empty");
        }

        let admission = timeout(
            Duration::from_secs(self.config.admission_timeout_secs),
            self.semaphore.clone().acquire_owned(),
        )
        .await;
        let permit = match admission {
            Ok(Ok(permit)) => permit,
            _ => {
                warn!("admission timed out; server busy");
                return Self::synthetic_stream(
                    "server busy: too many concurrent requests, please retry later",
                );
            }
        };

        let session_id = request
            .session_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        self.sessions.insert(&session_id, &request.question);

        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, session_id.clone());
        let cancel = CancellationToken::new();
        let ctx = RunContext::new(
            cancel.clone(),
            Duration::from_secs(self.config.request_wall_clock_secs),
        );

        let orchestrator = ReasoningOrchestrator::new(
            self.llm.clone(),
            self.tools.clone(),
            self.citations.clone(),
            sink.clone(),
            request.question.clone(),
            self.generation_for(&request),
            self.config.max_rounds,
            self.config.token_budget,
        );

        info!("session admitted: session_id={}", session_id);
        self.sessions.set_status(&session_id, SessionStatus::Processing);

        let sessions = self.sessions.clone();
        let citations = self.citations.clone();
        let task_session_id = session_id.clone();
        tokio::spawn(async move {
            let _permit = permit;

            let outcome = AssertUnwindSafe(orchestrator.run(&ctx)).catch_unwind().await;
            let status = match outcome {
                Ok(Ok(status)) => status,
                Ok(Err(e)) => {
                    error!(
                        "orchestrator failed: session_id={} error={}",
                        task_session_id, e
                    );
                    if !sink.terminal_sent() {
                        sink.send(EventType::Error, format!("Reasoning failed: {}", e));
                    }
                    SessionStatus::Failed
                }
                Err(_) => {
                    error!("orchestrator panicked: session_id={}", task_session_id);
                    if !sink.terminal_sent() {
                        sink.send(EventType::Error, "Reasoning failed: internal error");
                    }
                    SessionStatus::Failed
                }
            };
            if !sink.completed_sent() {
                sink.send(EventType::Completed, "Reasoning complete");
            }

            sessions.set_status(&task_session_id, status);
            citations.mark_terminal(&task_session_id);
            info!(
                "session finished: session_id={} status={:?}",
                task_session_id, status
            );
        });

        StreamHandle { session_id, events: rx, cancel }
    }

    /// Deep copy of the generation template with request overrides applied.
    fn generation_for(&self, request: &ChatRequest) -> GenerationConfig {
        let mut generation = self.config.llm.generation.clone();
        if let Some(temperature) = request.temperature {
            generation.temperature = temperature;
        }
        if let Some(top_p) = request.top_p {
            generation.top_p = top_p;
        }
        if let Some(presence_penalty) = request.presence_penalty {
            generation.presence_penalty = presence_penalty;
        }
        if let Some(max_tokens) = request.max_tokens {
            generation.max_tokens = max_tokens;
        }
        generation
    }

    /// A pre-terminated stream for requests that never held a slot.
    fn synthetic_stream(message: &str) -> StreamHandle {
        let session_id = uuid::Uuid::new_v4().to_string();
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx, session_id.clone());
        sink.send(EventType::Error, message);
        sink.send(EventType::Completed, "Reasoning complete");
        StreamHandle {
            session_id,
            events: rx,
            cancel: CancellationToken::new(),
        }
    }
}
