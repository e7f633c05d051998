//! Reasoning orchestrator
//!
//! Per-request state machine driving the think → act → observe → judge /
//! answer loop against the LLM backend, honoring round, token and
//! wall-clock budgets, and emitting the client-facing event stream.

pub mod citations;
pub mod parser;
pub mod prompts;

use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::agentic::events::{AnswerData, EventSink, EventType};
use crate::agentic::session::SessionStatus;
use crate::agentic::tools::{judge, ToolCall, ToolPayload, ToolRegistry};
use crate::infrastructure::llm::{ChatMessage, GenerationConfig, LlmClient};
use crate::service::citations::CitationStore;
use crate::util::errors::{AgentError, AgentResult};
use crate::util::text::preview;

use citations::EvidencePool;
use parser::{ToolCallScanner, ToolInvocation};

/// Minimum best-observed judge confidence required to force an answer when
/// the round budget runs out. Below it the session ends with `no_answer`.
const FORCE_ANSWER_MIN_CONFIDENCE: f64 = 0.35;

/// Rough token estimate: one token per four bytes of transcript text.
const BYTES_PER_TOKEN: usize = 4;

/// Cancellation context: one token plus the wall-clock deadline, consulted
/// at every checkpoint. Replaces a shared boolean flag; the token is also
/// handed to I/O so in-flight streams stop promptly.
#[derive(Clone)]
pub struct RunContext {
    cancel: CancellationToken,
    deadline: Instant,
}

impl RunContext {
    pub fn new(cancel: CancellationToken, wall_clock: Duration) -> Self {
        Self { cancel, deadline: Instant::now() + wall_clock }
    }

    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Cooperative cancellation checkpoint.
    pub fn checkpoint(&self) -> AgentResult<()> {
        if self.cancel.is_cancelled() {
            return Err(AgentError::ClientDisconnected);
        }
        if Instant::now() >= self.deadline {
            return Err(AgentError::WallClockTimeout);
        }
        Ok(())
    }
}

pub struct ReasoningOrchestrator {
    llm: Arc<LlmClient>,
    tools: Arc<ToolRegistry>,
    citation_store: Arc<CitationStore>,
    sink: EventSink,
    question: String,
    generation: GenerationConfig,
    max_rounds: u32,
    token_budget: usize,
    transcript: Vec<ChatMessage>,
    evidence: EvidencePool,
    round: u32,
    best_confidence: f64,
}

impl ReasoningOrchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        llm: Arc<LlmClient>,
        tools: Arc<ToolRegistry>,
        citation_store: Arc<CitationStore>,
        sink: EventSink,
        question: String,
        generation: GenerationConfig,
        max_rounds: u32,
        token_budget: usize,
    ) -> Self {
        Self {
            llm,
            tools,
            citation_store,
            sink,
            question,
            generation,
            max_rounds,
            token_budget,
            transcript: Vec::new(),
            evidence: EvidencePool::new(),
            round: 0,
            best_confidence: 0.0,
        }
    }

    /// Drive the session to completion.
    ///
    /// Emits the terminal event and the trailing `completed` on every path
    /// it can classify; returns `Err` only for faults it could not turn
    /// into a terminal event itself (the pipeline then synthesizes one).
    pub async fn run(mut self, ctx: &RunContext) -> AgentResult<SessionStatus> {
        self.sink.send(
            EventType::Init,
            format!("Processing question: {}", self.question),
        );

        match self.run_loop(ctx).await {
            Ok(()) => {
                self.sink.send(EventType::Completed, "Reasoning complete");
                Ok(SessionStatus::Completed)
            }
            Err(AgentError::ClientDisconnected) => {
                info!("session cancelled: session_id={}", self.sink.session_id());
                self.sink.send(EventType::Cancelled, "Request cancelled by client");
                self.sink.send(EventType::Completed, "Reasoning complete");
                Ok(SessionStatus::Cancelled)
            }
            Err(AgentError::WallClockTimeout) => {
                warn!("session timed out: session_id={}", self.sink.session_id());
                self.sink.send(EventType::Timeout, "Reasoning exceeded the wall-clock budget");
                self.sink.send(EventType::Completed, "Reasoning complete");
                Ok(SessionStatus::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    async fn run_loop(&mut self, ctx: &RunContext) -> AgentResult<()> {
        self.transcript.push(ChatMessage::system(prompts::system_prompt()));
        self.transcript.push(ChatMessage::user(self.question.clone()));

        while self.round < self.max_rounds {
            ctx.checkpoint()?;
            self.round += 1;
            let round = self.round;

            self.sink.emit(
                self.sink
                    .event(EventType::RoundStart, format!("Round {} reasoning started", round))
                    .with_round(round),
            );
            self.sink.send(EventType::ThinkingStart, "Thinking...");

            let (assistant_text, tool_block) = self.stream_thinking(ctx).await?;
            if assistant_text.trim().is_empty() {
                warn!("round produced no usable content: round={}", round);
                self.emit_round_end(round);
                continue;
            }
            self.transcript.push(ChatMessage::assistant(assistant_text.trim()));

            let acted = tool_block.is_some();
            if let Some(block) = tool_block {
                self.sink.send(
                    EventType::ToolCallStart,
                    format!("Preparing tool call: {}", preview(&block, 100)),
                );
                self.handle_tool_block(ctx, &block).await?;
            }

            let proposed_answer = parser::extract_tag(&assistant_text, "answer").is_some();
            if (acted || proposed_answer) && !self.evidence.is_empty() {
                if self.judge_round(ctx).await? {
                    return self.generate_answer(ctx).await;
                }
                if self.round < self.max_rounds {
                    self.sink.send(
                        EventType::ContinueReasoning,
                        "Evidence insufficient; continuing with another round",
                    );
                }
            }

            let estimated = self.estimated_tokens();
            if estimated > self.token_budget {
                self.sink.send(
                    EventType::TokenLimit,
                    format!(
                        "Token budget reached ({} > {}); generating the final answer now",
                        estimated, self.token_budget
                    ),
                );
                return self.generate_answer(ctx).await;
            }

            self.emit_round_end(round);
        }

        // Round budget exhausted without a confident judgment.
        if !self.evidence.is_empty() && self.best_confidence >= FORCE_ANSWER_MIN_CONFIDENCE {
            info!(
                "round budget exhausted; forcing answer: best_confidence={:.2}",
                self.best_confidence
            );
            return self.generate_answer(ctx).await;
        }

        self.sink.send(
            EventType::NoAnswer,
            "No definitive answer found within the round budget",
        );
        Ok(())
    }

    /// Consume one streaming completion over the transcript, forwarding
    /// deltas as `thinking` events and scanning for a tool-call block.
    async fn stream_thinking(&mut self, ctx: &RunContext) -> AgentResult<(String, Option<String>)> {
        let mut stream = self
            .llm
            .stream_chat(&self.transcript, &self.generation, ctx.cancel())
            .await?;

        let mut scanner = ToolCallScanner::new();
        let mut accumulated = String::new();
        let mut tool_block = None;

        while let Some(delta) = stream.next_delta().await {
            ctx.checkpoint()?;
            let delta = delta?;
            accumulated.push_str(&delta);
            self.sink.send(EventType::Thinking, delta.clone());
            if tool_block.is_none() {
                tool_block = scanner.push(&delta);
            }
        }

        // The stop tokens usually prevent this marker from appearing, but a
        // backend that ignores them must not leak fabricated tool output.
        if let Some(pos) = accumulated.find("<tool_response>") {
            accumulated.truncate(pos);
        }
        Ok((accumulated, tool_block))
    }

    /// TOOL_CALLING → OBSERVING: parse the block, dispatch, record the
    /// observation. Recoverable failures become `tool_error` events.
    async fn handle_tool_block(&mut self, ctx: &RunContext, block: &str) -> AgentResult<()> {
        let outcome = match parser::parse_invocation(block) {
            Ok(ToolInvocation::Code { code }) => {
                self.sink.emit(
                    self.sink
                        .event(
                            EventType::PythonExecution,
                            format!("Executing Python code:\n```python\n{}\n```", code),
                        )
                        .with_code(code.clone()),
                );
                let call = ToolCall {
                    name: "code_execution".to_string(),
                    arguments: serde_json::json!({ "code": code, "language": "python" }),
                };
                self.tools.dispatch(&call, ctx).await
            }
            Ok(ToolInvocation::Call(call)) => {
                self.sink.emit(
                    self.sink
                        .event(
                            EventType::ToolExecution,
                            format!("Calling tool {} with arguments: {}", call.name, call.arguments),
                        )
                        .with_tool(call.name.clone(), call.arguments.clone()),
                );
                self.tools.dispatch(&call, ctx).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(outcome) => {
                self.sink.emit(
                    self.sink
                        .event(EventType::ToolResult, format!("Tool result:\n{}", outcome.text))
                        .with_result(outcome.text.clone()),
                );
                match outcome.payload {
                    Some(ToolPayload::Evidence(chunks)) => {
                        let added = self.evidence.absorb(chunks);
                        debug!(
                            "evidence absorbed: added={} total={}",
                            added,
                            self.evidence.len()
                        );
                    }
                    Some(ToolPayload::Judgment(judgment)) => {
                        self.best_confidence = self.best_confidence.max(judgment.confidence);
                    }
                    None => {}
                }
                self.transcript.push(ChatMessage::tool(format!(
                    "<tool_response>\n{}\n</tool_response>",
                    outcome.text
                )));
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                warn!("tool call failed: error={}", e);
                self.sink.send(EventType::ToolError, format!("Tool call failed: {}", e));
                self.transcript.push(ChatMessage::tool(format!(
                    "<tool_response>\nTool call failed: {}\n</tool_response>",
                    e
                )));
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// OBSERVING → JUDGING. Returns whether the evidence suffices to answer.
    async fn judge_round(&mut self, ctx: &RunContext) -> AgentResult<bool> {
        ctx.checkpoint()?;
        self.sink.send(
            EventType::RetrievalJudgment,
            "Evaluating whether the retrieved evidence answers the question",
        );

        let sources = self.evidence.sources_content();
        match judge::judge_streaming(
            self.llm.as_ref(),
            &self.question,
            &sources,
            ctx,
            &self.sink,
        )
        .await
        {
            Ok(judgment) => {
                self.best_confidence = self.best_confidence.max(judgment.confidence);
                let can_answer = judgment.can_answer;
                self.sink.emit(
                    self.sink
                        .event(
                            EventType::JudgmentResult,
                            format!(
                                "Judgment: can_answer={} confidence={:.2}",
                                judgment.can_answer, judgment.confidence
                            ),
                        )
                        .with_judgment(judgment),
                );
                Ok(can_answer)
            }
            Err(e) if e.is_recoverable() => {
                warn!("judgment failed: error={}", e);
                self.sink.send(EventType::ToolError, format!("Judgment failed: {}", e));
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// ANSWERING: dedicated citation-aware completion, streamed chunk by
    /// chunk; the citation list rides only on the terminal event.
    async fn generate_answer(&mut self, ctx: &RunContext) -> AgentResult<()> {
        ctx.checkpoint()?;
        self.sink.send(
            EventType::AnswerGeneration,
            "Generating the final answer with citations",
        );

        let generation = GenerationConfig {
            temperature: 0.5,
            top_p: self.generation.top_p,
            presence_penalty: 1.0,
            max_tokens: 8192,
            stop_tokens: Vec::new(),
        };
        let messages = vec![ChatMessage::user(prompts::answer_prompt(
            &self.question,
            &self.evidence.sources_content(),
        ))];

        let mut stream = self.llm.stream_chat(&messages, &generation, ctx.cancel()).await?;
        let mut answer = String::new();
        while let Some(delta) = stream.next_delta().await {
            ctx.checkpoint()?;
            let delta = delta?;
            answer.push_str(&delta);
            self.sink.emit(
                self.sink
                    .event(EventType::FinalAnswerChunk, delta)
                    .with_accumulated(answer.clone())
                    .streaming(),
            );
        }

        let answer = parser::extract_tag(&answer, "answer")
            .unwrap_or(answer)
            .trim()
            .to_string();
        self.sink.emit(
            self.sink
                .event(EventType::AnswerStreaming, "Answer stream complete")
                .with_accumulated(answer.clone()),
        );

        let citation_refs = citations::assemble(&answer, self.evidence.records());
        let stored = citations::stored_citations(&citation_refs, self.evidence.records());
        // Deposit full contents before the answer event so every cited id
        // is resolvable the moment the client sees it.
        self.citation_store.insert_all(self.sink.session_id(), stored);

        info!(
            "final answer ready: session_id={} citations={}",
            self.sink.session_id(),
            citation_refs.len()
        );
        self.sink.emit(
            self.sink
                .event(EventType::FinalAnswer, answer.clone())
                .with_answer_data(AnswerData { answer, citations: citation_refs }),
        );
        Ok(())
    }

    fn emit_round_end(&self, round: u32) {
        self.sink.emit(
            self.sink
                .event(EventType::RoundEnd, format!("Round {} reasoning finished", round))
                .with_round(round),
        );
    }

    fn estimated_tokens(&self) -> usize {
        let bytes: usize = self.transcript.iter().map(|m| m.content.len()).sum();
        bytes / BYTES_PER_TOKEN
    }
}
