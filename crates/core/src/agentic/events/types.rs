use serde::Serialize;
use serde_json::Value;

use crate::agentic::tools::judge::Judgment;

/// Event kinds, exhaustively. Terminal kinds end the stream (followed by
/// exactly one `completed`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Init,
    RoundStart,
    RoundEnd,
    ThinkingStart,
    Thinking,
    ToolCallStart,
    ToolExecution,
    PythonExecution,
    ToolResult,
    ToolError,
    RetrievalJudgment,
    JudgmentStreaming,
    JudgmentResult,
    AnswerGeneration,
    ContinueReasoning,
    FinalAnswerChunk,
    AnswerStreaming,
    TokenLimit,
    FinalAnswer,
    NoAnswer,
    Timeout,
    Cancelled,
    Error,
    Completed,
}

impl EventType {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EventType::FinalAnswer
                | EventType::NoAnswer
                | EventType::Timeout
                | EventType::Cancelled
                | EventType::Error
        )
    }
}

/// One citation reference carried on the terminal `final_answer` event.
/// The full content is not inlined here; it lives in the citation store.
#[derive(Debug, Clone, Serialize)]
pub struct CitationRef {
    pub id: u32,
    pub title: String,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerData {
    pub answer: String,
    pub citations: Vec<CitationRef>,
}

/// One SSE frame. Optional fields are omitted from the JSON when absent.
#[derive(Debug, Clone, Serialize)]
pub struct StreamEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub content: String,
    pub timestamp: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub judgment: Option<Judgment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_streaming: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accumulated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_data: Option<AnswerData>,
}

impl StreamEvent {
    pub fn new(event_type: EventType, session_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            event_type,
            content: content.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            session_id: session_id.into(),
            round: None,
            tool_name: None,
            tool_args: None,
            result: None,
            code: None,
            judgment: None,
            is_streaming: None,
            accumulated: None,
            answer_data: None,
        }
    }

    pub fn with_round(mut self, round: u32) -> Self {
        self.round = Some(round);
        self
    }

    pub fn with_tool(mut self, name: impl Into<String>, args: Value) -> Self {
        self.tool_name = Some(name.into());
        self.tool_args = Some(args);
        self
    }

    pub fn with_result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_judgment(mut self, judgment: Judgment) -> Self {
        self.judgment = Some(judgment);
        self
    }

    pub fn streaming(mut self) -> Self {
        self.is_streaming = Some(true);
        self
    }

    pub fn with_accumulated(mut self, accumulated: impl Into<String>) -> Self {
        self.accumulated = Some(accumulated.into());
        self
    }

    pub fn with_answer_data(mut self, answer_data: AnswerData) -> Self {
        self.answer_data = Some(answer_data);
        self
    }
}
