use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;
use serde_json::Value;

use crate::agentic::orchestrator::RunContext;
use crate::util::errors::{AgentError, AgentResult};

use super::judge::Judgment;

/// A parsed tool invocation from the model's output stream.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One retrieved evidence snippet, before session-level ids are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceChunk {
    pub title: String,
    pub content: String,
    pub similarity: f64,
}

/// Structured side-channel a tool may return alongside its textual result.
#[derive(Debug, Clone)]
pub enum ToolPayload {
    Evidence(Vec<EvidenceChunk>),
    Judgment(Judgment),
}

/// Dispatch result: normalized text for the transcript plus an optional
/// structured payload for the orchestrator.
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub text: String,
    pub payload: Option<ToolPayload>,
}

impl ToolOutcome {
    pub fn text(text: impl Into<String>) -> Self {
        Self { text: text.into(), payload: None }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// Check the argument object before execution. Violations map to
    /// `BadToolArgs`.
    fn validate_args(&self, args: &Value) -> AgentResult<()>;

    async fn execute(&self, args: Value, ctx: &RunContext) -> AgentResult<ToolOutcome>;
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self { tools: HashMap::new() }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Route a tool call to its implementation.
    ///
    /// Cancellation is observed before execution starts; tools race their
    /// own I/O against the token so an in-flight call returns promptly and
    /// abandons partial side effects.
    pub async fn dispatch(&self, call: &ToolCall, ctx: &RunContext) -> AgentResult<ToolOutcome> {
        let tool = self
            .get(&call.name)
            .ok_or_else(|| AgentError::UnknownTool(call.name.clone()))?;

        tool.validate_args(&call.arguments)?;
        ctx.checkpoint()?;

        debug!("dispatching tool: name={}", call.name);
        tool.execute(call.arguments.clone(), ctx).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
