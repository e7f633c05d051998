//! Tool system
//!
//! Closed set of tools the orchestrator can dispatch: knowledge-base
//! retrieval, sandboxed code execution, and the sufficiency judge.

pub mod classifier;
pub mod code_execution;
pub mod framework;
pub mod judge;
pub mod retrieval;

pub use classifier::DepartmentClassifier;
pub use code_execution::CodeExecutionTool;
pub use framework::{EvidenceChunk, Tool, ToolCall, ToolOutcome, ToolPayload, ToolRegistry};
pub use judge::{JudgeTool, Judgment};
pub use retrieval::RetrievalTool;
