//! Evidence-sufficiency judge
//!
//! Issues a second LLM call that decides whether the retrieved evidence can
//! answer the question. The reply is expected to be JSON but the parser is
//! deliberately lenient: markdown fences are stripped, and a field-by-field
//! textual extraction recovers partial replies.

use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

use crate::agentic::events::{EventSink, EventType};
use crate::agentic::orchestrator::prompts;
use crate::agentic::orchestrator::RunContext;
use crate::infrastructure::llm::{ChatMessage, GenerationConfig, LlmClient};
use crate::util::errors::{AgentError, AgentResult};

use super::framework::{Tool, ToolOutcome, ToolPayload};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    pub can_answer: bool,
    pub confidence: f64,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing_info: Option<String>,
}

impl Judgment {
    fn fallback(reason: impl Into<String>) -> Self {
        Self {
            can_answer: false,
            confidence: 0.5,
            reason: reason.into(),
            missing_info: Some("unable to evaluate".to_string()),
        }
    }
}

/// Generation settings for judge calls: low temperature, generous output.
fn judge_generation() -> GenerationConfig {
    GenerationConfig {
        temperature: 0.3,
        top_p: 0.95,
        presence_penalty: 1.0,
        max_tokens: 10000,
        stop_tokens: Vec::new(),
    }
}

/// Strip a wrapping markdown code fence, if any.
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let without_open = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_open.strip_suffix("```").unwrap_or(without_open).trim()
}

fn extract_bool_field(text: &str, field: &str) -> Option<bool> {
    let key = format!("\"{}\"", field);
    let rest = &text[text.find(&key)? + key.len()..];
    let rest = rest.trim_start_matches([':', ' ', '\t', '\n']);
    if rest.starts_with("true") {
        Some(true)
    } else if rest.starts_with("false") {
        Some(false)
    } else {
        None
    }
}

fn extract_number_field(text: &str, field: &str) -> Option<f64> {
    let key = format!("\"{}\"", field);
    let rest = &text[text.find(&key)? + key.len()..];
    let rest = rest.trim_start_matches([':', ' ', '\t', '\n']);
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse::<f64>().ok()
}

fn extract_string_field(text: &str, field: &str) -> Option<String> {
    let key = format!("\"{}\"", field);
    let rest = &text[text.find(&key)? + key.len()..];
    let rest = rest.trim_start_matches([':', ' ', '\t', '\n']);
    let rest = rest.strip_prefix('"')?;
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

/// Parse the judge's reply. Never fails: unparseable replies degrade to a
/// conservative `can_answer=false` judgment. Confidence is kept in [0, 1]
/// on every parse path.
pub fn parse_judgment(raw: &str) -> Judgment {
    let cleaned = strip_code_fence(raw);

    if let Ok(judgment) = serde_json::from_str::<Judgment>(cleaned) {
        return clamp_confidence(judgment);
    }

    // The reply often embeds JSON in prose; try the outermost braces.
    if let (Some(start), Some(end)) = (cleaned.find('{'), cleaned.rfind('}')) {
        if start < end {
            if let Ok(judgment) = serde_json::from_str::<Judgment>(&cleaned[start..=end]) {
                return clamp_confidence(judgment);
            }
        }
    }

    // Field-by-field recovery for broken JSON.
    let can_answer = extract_bool_field(cleaned, "can_answer");
    let confidence = extract_number_field(cleaned, "confidence");
    let reason = extract_string_field(cleaned, "reason");
    if can_answer.is_none() && confidence.is_none() && reason.is_none() {
        warn!("judge reply had no recognizable fields");
        return Judgment::fallback("judge reply could not be parsed");
    }
    clamp_confidence(Judgment {
        can_answer: can_answer.unwrap_or(false),
        confidence: confidence.unwrap_or(0.5),
        reason: reason.unwrap_or_else(|| "partial judge reply".to_string()),
        missing_info: extract_string_field(cleaned, "missing_info"),
    })
}

fn clamp_confidence(mut judgment: Judgment) -> Judgment {
    judgment.confidence = judgment.confidence.clamp(0.0, 1.0);
    judgment
}

/// Run the judge with its reasoning streamed to the client as
/// `judgment_streaming` events.
pub async fn judge_streaming(
    llm: &LlmClient,
    question: &str,
    evidence_text: &str,
    ctx: &RunContext,
    sink: &EventSink,
) -> AgentResult<Judgment> {
    let messages = vec![ChatMessage::user(prompts::judgment_prompt(
        question,
        evidence_text,
    ))];

    let mut stream = llm
        .stream_chat(&messages, &judge_generation(), ctx.cancel())
        .await
        .map_err(judge_transport_error)?;

    let mut reply = String::new();
    while let Some(delta) = stream.next_delta().await {
        ctx.checkpoint()?;
        let delta = delta.map_err(judge_transport_error)?;
        sink.emit(
            sink.event(EventType::JudgmentStreaming, delta.clone())
                .streaming(),
        );
        reply.push_str(&delta);
    }

    if reply.trim().is_empty() {
        return Err(AgentError::JudgeFailure("empty judge reply".to_string()));
    }
    Ok(parse_judgment(&reply))
}

/// Judge transport faults are recoverable at the round level; cancellation
/// and deadline signals pass through untouched.
fn judge_transport_error(err: AgentError) -> AgentError {
    if err.is_interrupt() {
        err
    } else {
        AgentError::JudgeFailure(err.to_string())
    }
}

/// Registry-dispatchable form of the judge.
pub struct JudgeTool {
    llm: Arc<LlmClient>,
}

impl JudgeTool {
    pub fn new(llm: Arc<LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Tool for JudgeTool {
    fn name(&self) -> &str {
        "judge_sufficiency"
    }

    fn description(&self) -> &str {
        "Judges whether the collected evidence is sufficient to answer the question"
    }

    fn validate_args(&self, args: &Value) -> AgentResult<()> {
        if args.get("question").and_then(Value::as_str).is_none() {
            return Err(AgentError::BadToolArgs("question is required".to_string()));
        }
        if args.get("evidence").and_then(Value::as_str).is_none() {
            return Err(AgentError::BadToolArgs("evidence is required".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, args: Value, ctx: &RunContext) -> AgentResult<ToolOutcome> {
        let question = args.get("question").and_then(Value::as_str).unwrap_or_default();
        let evidence = args.get("evidence").and_then(Value::as_str).unwrap_or_default();

        let messages = vec![ChatMessage::user(prompts::judgment_prompt(question, evidence))];
        let reply = self
            .llm
            .chat(&messages, &judge_generation(), ctx.cancel())
            .await
            .map_err(judge_transport_error)?;

        let judgment = parse_judgment(&reply);
        let text = serde_json::to_string(&judgment)
            .map_err(|e| AgentError::internal(e.to_string()))?;
        Ok(ToolOutcome {
            text,
            payload: Some(ToolPayload::Judgment(judgment)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_clean_json() {
        let judgment = parse_judgment(
            r#"{"can_answer": true, "confidence": 0.9, "reason": "covers the question"}"#,
        );
        assert!(judgment.can_answer);
        assert!((judgment.confidence - 0.9).abs() < 1e-9);
        assert_eq!(judgment.reason, "covers the question");
        assert!(judgment.missing_info.is_none());
    }

    #[test]
    fn parses_markdown_wrapped_json() {
        let raw = "```json\n{\"can_answer\": false, \"confidence\": 0.2, \"reason\": \"off-topic\", \"missing_info\": \"dosage data\"}\n```";
        let judgment = parse_judgment(raw);
        assert!(!judgment.can_answer);
        assert_eq!(judgment.missing_info.as_deref(), Some("dosage data"));
    }

    #[test]
    fn parses_json_embedded_in_prose() {
        let raw = "Here is my assessment:\n{\"can_answer\": true, \"confidence\": 0.7, \"reason\": \"relevant\"}\nHope that helps.";
        let judgment = parse_judgment(raw);
        assert!(judgment.can_answer);
    }

    #[test]
    fn recovers_fields_from_broken_json() {
        let raw = r#""can_answer": true, "confidence": 0.8, "reason": "good match", trailing garbage"#;
        let judgment = parse_judgment(raw);
        assert!(judgment.can_answer);
        assert!((judgment.confidence - 0.8).abs() < 1e-9);
        assert_eq!(judgment.reason, "good match");
    }

    #[test]
    fn unparseable_reply_degrades_to_conservative_default() {
        let judgment = parse_judgment("I am not sure what you mean.");
        assert!(!judgment.can_answer);
        assert!((judgment.confidence - 0.5).abs() < 1e-9);
    }

    #[test]
    fn confidence_is_clamped_on_every_parse_path() {
        // Clean JSON path.
        let judgment =
            parse_judgment(r#"{"can_answer": true, "confidence": 1.5, "reason": "r"}"#);
        assert!((judgment.confidence - 1.0).abs() < 1e-9);

        // Outer-brace path.
        let judgment = parse_judgment(
            "verdict: {\"can_answer\": true, \"confidence\": -0.2, \"reason\": \"r\"} done",
        );
        assert!(judgment.confidence.abs() < 1e-9);

        // Field-by-field recovery path.
        let judgment = parse_judgment(r#""can_answer": false, "confidence": 7.5, "reason": "r""#);
        assert!((judgment.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn interrupts_pass_through_transport_mapping() {
        assert!(matches!(
            judge_transport_error(AgentError::ClientDisconnected),
            AgentError::ClientDisconnected
        ));
        assert!(matches!(
            judge_transport_error(AgentError::BackendError(502)),
            AgentError::JudgeFailure(_)
        ));
    }
}
