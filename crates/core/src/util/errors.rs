use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

/// Error taxonomy for the reasoning service.
///
/// Recoverable variants are converted into in-stream `tool_error` events and
/// the reasoning loop continues; non-recoverable variants end the session
/// with a terminal `error` event. `ClientDisconnected` and `WallClockTimeout`
/// are control-flow signals raised at cancellation checkpoints, not faults.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("LLM backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("LLM backend returned HTTP {0}")]
    BackendError(u16),

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("invalid tool arguments: {0}")]
    BadToolArgs(String),

    #[error("tool execution failed: {0}")]
    ToolExecution(String),

    #[error("malformed tool call: {0}")]
    MalformedToolCall(String),

    #[error("judgment failed: {0}")]
    JudgeFailure(String),

    #[error("budget exhausted: {0}")]
    BudgetExhausted(String),

    #[error("wall-clock budget exceeded")]
    WallClockTimeout,

    #[error("client disconnected")]
    ClientDisconnected,

    #[error("admission timed out")]
    AdmissionTimeout,

    #[error("citation not found: {0}")]
    CitationNotFound(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    pub fn tool(msg: impl Into<String>) -> Self {
        AgentError::ToolExecution(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AgentError::Internal(msg.into())
    }

    /// Whether the reasoning loop may absorb this error and continue with
    /// the next round.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AgentError::UnknownTool(_)
                | AgentError::BadToolArgs(_)
                | AgentError::ToolExecution(_)
                | AgentError::MalformedToolCall(_)
                | AgentError::JudgeFailure(_)
        )
    }

    /// Whether this error is a cancellation/deadline control signal rather
    /// than a fault.
    pub fn is_interrupt(&self) -> bool {
        matches!(
            self,
            AgentError::ClientDisconnected | AgentError::WallClockTimeout
        )
    }
}
