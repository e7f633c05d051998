use eventsource_stream::Eventsource;
use futures::StreamExt;
use log::{error, trace, warn};
use reqwest::Response;
use serde_json::Value;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::util::errors::{AgentError, AgentResult};

use super::types::ChatCompletionChunk;

fn extract_sse_api_error_message(event_json: &Value) -> Option<String> {
    let error = event_json.get("error")?;
    if let Some(message) = error.get("message").and_then(|value| value.as_str()) {
        return Some(message.to_string());
    }
    if let Some(message) = error.as_str() {
        return Some(message.to_string());
    }
    Some("An error occurred during streaming".to_string())
}

/// Convert the backend's SSE byte stream into text deltas.
///
/// Runs until the backend signals `[DONE]`, the connection closes, the idle
/// timeout fires, or the cancellation token trips. Exactly one `Err` is sent
/// on failure, then the channel closes.
pub(crate) async fn handle_completion_stream(
    response: Response,
    tx_delta: mpsc::UnboundedSender<AgentResult<String>>,
    cancel: CancellationToken,
) {
    let mut stream = response.bytes_stream().eventsource();
    let idle_timeout = Duration::from_secs(600);

    loop {
        let sse_event = tokio::select! {
            _ = cancel.cancelled() => {
                trace!("completion stream cancelled; dropping connection");
                return;
            }
            event = timeout(idle_timeout, stream.next()) => event,
        };

        let sse = match sse_event {
            Ok(Some(Ok(sse))) => sse,
            // Stream close without [DONE]: some backends end this way; treat
            // it as a clean end of the delta sequence.
            Ok(None) => return,
            Ok(Some(Err(e))) => {
                let error_msg = format!("SSE stream error: {}", e);
                error!("{}", error_msg);
                let _ = tx_delta.send(Err(AgentError::BackendUnavailable(error_msg)));
                return;
            }
            Err(_) => {
                let error_msg = format!("SSE stream timeout after {}s", idle_timeout.as_secs());
                error!("{}", error_msg);
                let _ = tx_delta.send(Err(AgentError::BackendUnavailable(error_msg)));
                return;
            }
        };

        let raw = sse.data;
        trace!("backend SSE: {:?}", raw);
        if raw == "[DONE]" {
            return;
        }

        let event_json: Value = match serde_json::from_str(&raw) {
            Ok(json) => json,
            Err(e) => {
                let error_msg = format!("SSE parsing error: {}, data: {}", e, &raw);
                error!("{}", error_msg);
                let _ = tx_delta.send(Err(AgentError::internal(error_msg)));
                return;
            }
        };

        if let Some(api_error_message) = extract_sse_api_error_message(&event_json) {
            let error_msg = format!("SSE API error: {}", api_error_message);
            error!("{}", error_msg);
            let _ = tx_delta.send(Err(AgentError::BackendUnavailable(error_msg)));
            return;
        }

        let chunk: ChatCompletionChunk = match serde_json::from_value(event_json) {
            Ok(chunk) => chunk,
            Err(e) => {
                warn!("skipping non-chunk SSE frame: {}, data: {}", e, raw);
                continue;
            }
        };

        if let Some(text) = chunk.delta_text() {
            if tx_delta.send(Ok(text)).is_err() {
                // Receiver gone; the orchestrator stopped consuming.
                return;
            }
        }
    }
}
