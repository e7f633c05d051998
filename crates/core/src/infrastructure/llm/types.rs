use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: MessageRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: MessageRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Assistant, content: content.into() }
    }

    pub fn tool(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Tool, content: content.into() }
    }
}

/// Sampling parameters for one backend call. The process-wide template is
/// immutable; per-request copies apply client overrides.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationConfig {
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
    pub stop_tokens: Vec<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.85,
            top_p: 0.95,
            presence_penalty: 1.1,
            max_tokens: 10000,
            // Halt generation before the model fabricates tool output.
            stop_tokens: vec!["\n<tool_response>".to_string(), "<tool_response>".to_string()],
        }
    }
}

/// Request body for streaming chat completions (OpenAI format).
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub max_tokens: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub stop: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    pub choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    pub delta: ChunkDelta,
    #[allow(dead_code)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
}

impl ChatCompletionChunk {
    /// Delta text of the first choice; `reasoning_content` is accepted as an
    /// alternative carrier some backends use for think-phase tokens.
    pub fn delta_text(self) -> Option<String> {
        let delta = self.choices.into_iter().next()?.delta;
        match (delta.content, delta.reasoning_content) {
            (Some(content), _) if !content.is_empty() => Some(content),
            (_, Some(reasoning)) if !reasoning.is_empty() => Some(reasoning),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_serialize_lowercase() {
        let msg = ChatMessage::system("be helpful");
        let json = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(json["role"], "system");
    }

    #[test]
    fn chunk_prefers_content_over_reasoning() {
        let raw = r#"{"choices":[{"delta":{"content":"a","reasoning_content":"b"},"finish_reason":null}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).expect("chunk");
        assert_eq!(chunk.delta_text().as_deref(), Some("a"));
    }

    #[test]
    fn chunk_falls_back_to_reasoning_content() {
        let raw = r#"{"choices":[{"delta":{"reasoning_content":"thinking"},"finish_reason":null}]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).expect("chunk");
        assert_eq!(chunk.delta_text().as_deref(), Some("thinking"));
    }

    #[test]
    fn empty_choices_yield_no_delta() {
        let raw = r#"{"choices":[]}"#;
        let chunk: ChatCompletionChunk = serde_json::from_str(raw).expect("chunk");
        assert!(chunk.delta_text().is_none());
    }
}
