use log::debug;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::service::config::LlmBackendConfig;
use crate::util::errors::{AgentError, AgentResult};

use super::stream_handler::handle_completion_stream;
use super::types::{ChatCompletionRequest, ChatMessage, GenerationConfig};

/// Ordered, finite, non-restartable sequence of text deltas from one
/// backend call.
pub struct ChatStream {
    rx: mpsc::UnboundedReceiver<AgentResult<String>>,
}

impl ChatStream {
    /// Next delta; `None` once the backend stream has ended.
    pub async fn next_delta(&mut self) -> Option<AgentResult<String>> {
        self.rx.recv().await
    }
}

/// HTTP client for the chat-completions backend.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl LlmClient {
    pub fn new(config: &LlmBackendConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }

    /// Start a streaming completion over `messages`.
    ///
    /// The returned stream yields raw text deltas; tool-call delimiters are
    /// not interpreted here. Cancelling the token terminates the stream
    /// promptly without further deltas.
    pub async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> AgentResult<ChatStream> {
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            stream: true,
            temperature: config.temperature,
            top_p: config.top_p,
            presence_penalty: config.presence_penalty,
            max_tokens: config.max_tokens,
            stop: config.stop_tokens.clone(),
        };

        let url = format!("{}/chat/completions", self.base_url);
        debug!("llm request: url={} messages={}", url, messages.len());

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::BackendError(status.as_u16()));
        }

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(handle_completion_stream(response, tx, cancel.clone()));
        Ok(ChatStream { rx })
    }

    /// Non-streaming convenience: collect the whole completion into one
    /// string. Used by the classifier and other single-shot helpers.
    pub async fn chat(
        &self,
        messages: &[ChatMessage],
        config: &GenerationConfig,
        cancel: &CancellationToken,
    ) -> AgentResult<String> {
        let mut stream = self.stream_chat(messages, config, cancel).await?;
        let mut content = String::new();
        while let Some(delta) = stream.next_delta().await {
            content.push_str(&delta?);
        }
        Ok(content)
    }
}
