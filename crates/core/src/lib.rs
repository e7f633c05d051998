// DeepMed Core Library - Platform-agnostic reasoning service logic
// Three-layer architecture: Util -> Infrastructure/Service -> Agentic

pub mod agentic; // Agentic layer - reasoning orchestrator, tool system, request pipeline
pub mod infrastructure; // Infrastructure layer - LLM streaming client
pub mod service; // Service layer - configuration, citation store
pub mod util; // Utility layer - errors, text helpers

// Export main types
pub use util::errors::{AgentError, AgentResult};

// Export service layer components
pub use service::{
    citations::{CitationStore, StoredCitation},
    config::{ServerConfig, StartupError},
};

// Export infrastructure components
pub use infrastructure::llm::{ChatMessage, GenerationConfig, LlmClient, MessageRole};

// Export agentic layer core types
pub use agentic::{
    events::{AnswerData, EventSink, EventType, StreamEvent},
    orchestrator::{ReasoningOrchestrator, RunContext},
    pipeline::{ChatRequest, PipelineStats, RequestPipeline, StreamHandle},
    session::{SessionInfo, SessionRegistry, SessionStatus},
    tools::{Tool, ToolCall, ToolOutcome, ToolRegistry},
};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const CORE_NAME: &str = "DeepMed Core";
