//! Session registry
//!
//! Tracks every admitted request from admission to a bounded grace period
//! after its terminal state, for the `/sessions` and `/health` surfaces.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Failed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed
                | SessionStatus::Cancelled
                | SessionStatus::Failed
                | SessionStatus::TimedOut
        )
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub question: String,
    pub status: SessionStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip)]
    terminal_at: Option<Instant>,
}

pub struct SessionRegistry {
    sessions: DashMap<String, SessionInfo>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self { sessions: DashMap::new() }
    }

    pub fn insert(&self, session_id: &str, question: &str) {
        self.sessions.insert(
            session_id.to_string(),
            SessionInfo {
                session_id: session_id.to_string(),
                question: question.to_string(),
                status: SessionStatus::Pending,
                start_time: Utc::now(),
                end_time: None,
                terminal_at: None,
            },
        );
    }

    /// Advance a session's status. Statuses only move forward: once a
    /// session is terminal, later writes are ignored.
    pub fn set_status(&self, session_id: &str, status: SessionStatus) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if entry.status.is_terminal() {
                return;
            }
            entry.status = status;
            if status.is_terminal() {
                entry.end_time = Some(Utc::now());
                entry.terminal_at = Some(Instant::now());
            }
        }
    }

    pub fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.sessions.get(session_id).map(|entry| entry.status)
    }

    pub fn snapshot(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        sessions.sort_by(|a, b| a.start_time.cmp(&b.start_time));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn processing_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|entry| entry.status == SessionStatus::Processing)
            .count()
    }

    /// Drop sessions that have been terminal for longer than `grace`.
    pub fn sweep_expired(&self, grace: Duration) {
        let now = Instant::now();
        self.sessions.retain(|_, info| match info.terminal_at {
            Some(terminal_at) => now.duration_since(terminal_at) < grace,
            None => true,
        });
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
