//! Stream event model
//!
//! Typed events forwarded to the client as SSE frames, plus the channel
//! sink the orchestrator writes through.

pub mod sink;
pub mod types;

pub use sink::EventSink;
pub use types::{AnswerData, CitationRef, EventType, StreamEvent};
