//! In-band tool-call parsing
//!
//! Tool calls arrive embedded in the model's text stream between
//! `<tool_call>` delimiters. A delimited block may be split across any
//! number of deltas, so the scanner keeps the accumulated text and the
//! open-delimiter position across pushes and only yields a block once its
//! closing tag has arrived.

use serde_json::Value;

use crate::agentic::tools::ToolCall;
use crate::util::errors::{AgentError, AgentResult};

const OPEN_TAG: &str = "<tool_call>";
const CLOSE_TAG: &str = "</tool_call>";

pub struct ToolCallScanner {
    buffer: String,
    open_at: Option<usize>,
    emitted: bool,
}

impl ToolCallScanner {
    pub fn new() -> Self {
        Self { buffer: String::new(), open_at: None, emitted: false }
    }

    /// Feed one delta; returns the interior of the first complete
    /// delimited block, exactly once.
    pub fn push(&mut self, delta: &str) -> Option<String> {
        if self.emitted {
            return None;
        }
        self.buffer.push_str(delta);

        if self.open_at.is_none() {
            self.open_at = self.buffer.find(OPEN_TAG);
        }
        let open = self.open_at?;
        let interior_start = open + OPEN_TAG.len();
        let close = self.buffer[interior_start..].find(CLOSE_TAG)?;

        self.emitted = true;
        Some(self.buffer[interior_start..interior_start + close].trim().to_string())
    }
}

impl Default for ToolCallScanner {
    fn default() -> Self {
        Self::new()
    }
}

/// A parsed tool-call block.
#[derive(Debug, Clone)]
pub enum ToolInvocation {
    Call(ToolCall),
    /// Python form: JSON header plus a `<code>` block holding the source.
    Code { code: String },
}

/// Parse the interior of a delimited block into an invocation.
pub fn parse_invocation(raw: &str) -> AgentResult<ToolInvocation> {
    if let Some(code_start) = raw.find("<code>") {
        let after = &raw[code_start + "<code>".len()..];
        let Some(code_end) = after.find("</code>") else {
            return Err(AgentError::MalformedToolCall(
                "unterminated <code> block".to_string(),
            ));
        };
        let code = after[..code_end].trim().to_string();
        if code.is_empty() {
            return Err(AgentError::MalformedToolCall("empty <code> block".to_string()));
        }
        return Ok(ToolInvocation::Code { code });
    }

    let call: ToolCall = serde_json::from_str(raw)
        .map_err(|e| AgentError::MalformedToolCall(format!("invalid JSON: {}", e)))?;

    if call.name.to_lowercase().contains("python") {
        // Python header without a code block; accept code passed as an
        // ordinary argument, reject otherwise.
        if let Some(code) = call.arguments.get("code").and_then(Value::as_str) {
            return Ok(ToolInvocation::Code { code: code.to_string() });
        }
        return Err(AgentError::MalformedToolCall(
            "python invocation without a <code> block".to_string(),
        ));
    }

    Ok(ToolInvocation::Call(ToolCall {
        name: normalize_tool_name(&call.name),
        arguments: call.arguments,
    }))
}

/// Historic prompt aliases for the retrieval tool.
fn normalize_tool_name(name: &str) -> String {
    match name {
        "retrieval" | "search" => "knowledge_retrieval".to_string(),
        other => other.to_string(),
    }
}

/// Interior of the first `<tag>…</tag>` pair, if complete.
pub fn extract_tag(text: &str, tag: &str) -> Option<String> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let start = text.find(&open)? + open.len();
    let end = text[start..].find(&close)?;
    Some(text[start..start + end].to_string())
}
