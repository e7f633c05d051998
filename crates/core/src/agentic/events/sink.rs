use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::types::{EventType, StreamEvent};

/// Outbound event channel for one session.
///
/// Tracks whether a terminal event and the trailing `completed` have been
/// sent, so the pipeline can enforce the stream-completion guarantee after
/// the orchestrator returns. Send failures (receiver gone) are ignored: a
/// disconnected client is signalled through the cancellation token, not
/// through channel backpressure.
#[derive(Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<StreamEvent>,
    session_id: String,
    terminal_sent: Arc<AtomicBool>,
    completed_sent: Arc<AtomicBool>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<StreamEvent>, session_id: impl Into<String>) -> Self {
        Self {
            tx,
            session_id: session_id.into(),
            terminal_sent: Arc::new(AtomicBool::new(false)),
            completed_sent: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Build an event pre-filled with this session's id and timestamp.
    pub fn event(&self, event_type: EventType, content: impl Into<String>) -> StreamEvent {
        StreamEvent::new(event_type, self.session_id.clone(), content)
    }

    pub fn emit(&self, event: StreamEvent) {
        if event.event_type.is_terminal() {
            self.terminal_sent.store(true, Ordering::SeqCst);
        }
        if event.event_type == EventType::Completed {
            self.completed_sent.store(true, Ordering::SeqCst);
        }
        let _ = self.tx.send(event);
    }

    /// Shorthand for events with no type-specific fields.
    pub fn send(&self, event_type: EventType, content: impl Into<String>) {
        self.emit(self.event(event_type, content));
    }

    pub fn terminal_sent(&self) -> bool {
        self.terminal_sent.load(Ordering::SeqCst)
    }

    pub fn completed_sent(&self) -> bool {
        self.completed_sent.load(Ordering::SeqCst)
    }
}
