//! Sandboxed code execution tool
//!
//! Forwards Python snippets to the external sandbox service. The call is
//! bounded by a hard wall-clock cap and raced against cancellation;
//! captured output is truncated to the configured size cap.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;

use crate::agentic::orchestrator::RunContext;
use crate::service::config::SandboxConfig;
use crate::util::errors::{AgentError, AgentResult};
use crate::util::text::truncate_output;

use super::framework::{Tool, ToolOutcome};

#[derive(Debug, Serialize)]
struct SandboxRequest<'a> {
    code: &'a str,
    language: &'a str,
}

#[derive(Debug, Deserialize)]
struct SandboxResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    #[serde(default)]
    return_value: Option<String>,
}

pub struct CodeExecutionTool {
    http: reqwest::Client,
    config: SandboxConfig,
}

impl CodeExecutionTool {
    pub fn new(config: SandboxConfig) -> Self {
        Self { http: reqwest::Client::new(), config }
    }

    fn render(&self, response: SandboxResponse) -> String {
        let mut out = String::new();
        if !response.stdout.is_empty() {
            out.push_str("stdout:\n");
            out.push_str(&response.stdout);
        }
        if !response.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("stderr:\n");
            out.push_str(&response.stderr);
        }
        if let Some(value) = response.return_value {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str("return value: ");
            out.push_str(&value);
        }
        if out.is_empty() {
            out.push_str("(no output)");
        }
        truncate_output(&out, self.config.output_cap_bytes)
    }
}

#[async_trait]
impl Tool for CodeExecutionTool {
    fn name(&self) -> &str {
        "code_execution"
    }

    fn description(&self) -> &str {
        "Executes Python code in the external sandbox and returns captured output"
    }

    fn validate_args(&self, args: &Value) -> AgentResult<()> {
        let code = args.get("code").and_then(Value::as_str).unwrap_or_default();
        if code.trim().is_empty() {
            return Err(AgentError::BadToolArgs("code must be a non-empty string".to_string()));
        }
        if let Some(language) = args.get("language").and_then(Value::as_str) {
            if language != "python" {
                return Err(AgentError::BadToolArgs(format!(
                    "unsupported language: {}",
                    language
                )));
            }
        }
        Ok(())
    }

    async fn execute(&self, args: Value, ctx: &RunContext) -> AgentResult<ToolOutcome> {
        let code = args.get("code").and_then(Value::as_str).unwrap_or_default();
        debug!("sandbox execution: code_bytes={}", code.len());

        let request = self
            .http
            .post(&self.config.base_url)
            .json(&SandboxRequest { code, language: "python" })
            .send();

        let wall_clock = Duration::from_secs(self.config.wall_clock_secs);
        let response = tokio::select! {
            _ = ctx.cancel().cancelled() => return Err(AgentError::ClientDisconnected),
            outcome = timeout(wall_clock, request) => match outcome {
                Ok(response) => response,
                Err(_) => {
                    return Err(AgentError::tool(format!(
                        "code execution exceeded {}s wall clock",
                        self.config.wall_clock_secs
                    )))
                }
            },
        }
        .map_err(|e| AgentError::tool(format!("sandbox request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::tool(format!(
                "sandbox returned HTTP {}",
                status.as_u16()
            )));
        }

        let parsed: SandboxResponse = response
            .json()
            .await
            .map_err(|e| AgentError::tool(format!("sandbox response decode failed: {}", e)))?;

        Ok(ToolOutcome::text(self.render(parsed)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(cap: usize) -> CodeExecutionTool {
        CodeExecutionTool::new(SandboxConfig {
            base_url: "http://127.0.0.1:1/execute".to_string(),
            wall_clock_secs: 1,
            output_cap_bytes: cap,
        })
    }

    #[test]
    fn renders_stdout_stderr_and_return_value() {
        let out = tool(1024).render(SandboxResponse {
            stdout: "42\n".to_string(),
            stderr: "warning\n".to_string(),
            return_value: Some("None".to_string()),
        });
        assert!(out.contains("stdout:\n42"));
        assert!(out.contains("stderr:\nwarning"));
        assert!(out.contains("return value: None"));
    }

    #[test]
    fn oversized_output_is_truncated() {
        let out = tool(32).render(SandboxResponse {
            stdout: "x".repeat(500),
            stderr: String::new(),
            return_value: None,
        });
        assert!(out.ends_with("[truncated]"));
        assert!(out.len() < 100);
    }

    #[test]
    fn silent_execution_renders_placeholder() {
        let out = tool(1024).render(SandboxResponse {
            stdout: String::new(),
            stderr: String::new(),
            return_value: None,
        });
        assert_eq!(out, "(no output)");
    }

    #[test]
    fn rejects_empty_code_and_foreign_language() {
        let tool = tool(1024);
        assert!(tool.validate_args(&serde_json::json!({"code": "  "})).is_err());
        assert!(tool
            .validate_args(&serde_json::json!({"code": "1", "language": "ruby"}))
            .is_err());
        assert!(tool
            .validate_args(&serde_json::json!({"code": "print(1)", "language": "python"}))
            .is_ok());
    }
}
