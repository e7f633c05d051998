//! LLM streaming client
//!
//! Chat-completions wrapper over an OpenAI-compatible HTTP backend. The
//! client only moves bytes: tool-call delimiters embedded in the text are
//! passed through untouched for the orchestrator to parse.

pub mod client;
pub mod stream_handler;
pub mod types;

pub use client::{ChatStream, LlmClient};
pub use types::{ChatMessage, GenerationConfig, MessageRole};
