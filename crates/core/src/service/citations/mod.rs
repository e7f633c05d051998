//! Citation store
//!
//! Per-session mapping from citation id to the full evidence content,
//! populated once when the final answer is assembled and served by the
//! `/citation/{id}` endpoint while the session's grace period lasts.
//! Eviction is lazy on access plus a periodic sweep driven by the pipeline.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use log::debug;
use serde::Serialize;

use crate::util::errors::{AgentError, AgentResult};

#[derive(Debug, Clone, Serialize)]
pub struct StoredCitation {
    pub id: u32,
    pub title: String,
    pub full_content: String,
}

struct SessionCitations {
    citations: HashMap<u32, StoredCitation>,
    inserted_at: Instant,
    /// Set when the session reaches a terminal state; entries outlive it by
    /// the configured TTL.
    expires_at: Option<Instant>,
}

impl SessionCitations {
    fn expired(&self, now: Instant) -> bool {
        matches!(self.expires_at, Some(at) if now >= at)
    }
}

pub struct CitationStore {
    sessions: DashMap<String, SessionCitations>,
    ttl: Duration,
}

impl CitationStore {
    pub fn new(ttl: Duration) -> Self {
        Self { sessions: DashMap::new(), ttl }
    }

    /// Store a session's citations. Writes happen at most once per session;
    /// a second write for the same session id is ignored.
    pub fn insert_all(&self, session_id: &str, citations: Vec<StoredCitation>) {
        if self.sessions.contains_key(session_id) {
            return;
        }
        let citations: HashMap<u32, StoredCitation> =
            citations.into_iter().map(|c| (c.id, c)).collect();
        debug!(
            "citation store populated: session_id={} citations={}",
            session_id,
            citations.len()
        );
        self.sessions.insert(
            session_id.to_string(),
            SessionCitations {
                citations,
                inserted_at: Instant::now(),
                expires_at: None,
            },
        );
    }

    /// Start the TTL clock for a session that reached a terminal state.
    pub fn mark_terminal(&self, session_id: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            if entry.expires_at.is_none() {
                entry.expires_at = Some(Instant::now() + self.ttl);
            }
        }
    }

    /// Look up a citation. With a session id the lookup is exact; without
    /// one the most recently populated live session holding the id wins.
    pub fn lookup(&self, session_id: Option<&str>, id: u32) -> AgentResult<StoredCitation> {
        let now = Instant::now();
        match session_id {
            Some(session_id) => {
                let Some(entry) = self.sessions.get(session_id) else {
                    return Err(AgentError::CitationNotFound(id.to_string()));
                };
                if entry.expired(now) {
                    drop(entry);
                    self.sessions.remove(session_id);
                    return Err(AgentError::CitationNotFound(id.to_string()));
                }
                entry
                    .citations
                    .get(&id)
                    .cloned()
                    .ok_or_else(|| AgentError::CitationNotFound(id.to_string()))
            }
            None => {
                let mut best: Option<(Instant, StoredCitation)> = None;
                for entry in self.sessions.iter() {
                    if entry.expired(now) {
                        continue;
                    }
                    if let Some(citation) = entry.citations.get(&id) {
                        let newer = best
                            .as_ref()
                            .map(|(at, _)| entry.inserted_at > *at)
                            .unwrap_or(true);
                        if newer {
                            best = Some((entry.inserted_at, citation.clone()));
                        }
                    }
                }
                best.map(|(_, citation)| citation)
                    .ok_or_else(|| AgentError::CitationNotFound(id.to_string()))
            }
        }
    }

    /// Remove every expired session entry.
    pub fn sweep(&self) {
        let now = Instant::now();
        self.sessions.retain(|_, entry| !entry.expired(now));
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn citation(id: u32, content: &str) -> StoredCitation {
        StoredCitation {
            id,
            title: format!("Doc {}", id),
            full_content: content.to_string(),
        }
    }

    #[test]
    fn lookup_by_session_and_id() {
        let store = CitationStore::new(Duration::from_secs(3600));
        store.insert_all("s-1", vec![citation(1, "alpha"), citation(2, "beta")]);

        let hit = store.lookup(Some("s-1"), 2).expect("hit");
        assert_eq!(hit.full_content, "beta");
        assert!(store.lookup(Some("s-1"), 9).is_err());
        assert!(store.lookup(Some("s-other"), 1).is_err());
    }

    #[test]
    fn sessionless_lookup_prefers_latest_insert() {
        let store = CitationStore::new(Duration::from_secs(3600));
        store.insert_all("old", vec![citation(1, "stale")]);
        store.insert_all("new", vec![citation(1, "fresh")]);

        let hit = store.lookup(None, 1).expect("hit");
        assert_eq!(hit.full_content, "fresh");
    }

    #[test]
    fn repeated_lookup_is_stable() {
        let store = CitationStore::new(Duration::from_secs(3600));
        store.insert_all("s-1", vec![citation(1, "stable content")]);
        let first = store.lookup(Some("s-1"), 1).expect("hit");
        let second = store.lookup(Some("s-1"), 1).expect("hit");
        assert_eq!(first.full_content, second.full_content);
    }

    #[test]
    fn second_insert_for_same_session_is_ignored() {
        let store = CitationStore::new(Duration::from_secs(3600));
        store.insert_all("s-1", vec![citation(1, "original")]);
        store.insert_all("s-1", vec![citation(1, "overwrite")]);
        assert_eq!(store.lookup(Some("s-1"), 1).expect("hit").full_content, "original");
    }

    #[test]
    fn terminal_sessions_expire_after_ttl() {
        let store = CitationStore::new(Duration::from_millis(0));
        store.insert_all("s-1", vec![citation(1, "gone soon")]);

        // TTL clock has not started: still readable.
        assert!(store.lookup(Some("s-1"), 1).is_ok());

        store.mark_terminal("s-1");
        assert!(store.lookup(Some("s-1"), 1).is_err());

        store.sweep();
        assert_eq!(store.session_count(), 0);
    }

    #[test]
    fn sweep_keeps_live_sessions() {
        let store = CitationStore::new(Duration::from_millis(0));
        store.insert_all("live", vec![citation(1, "x")]);
        store.insert_all("done", vec![citation(1, "y")]);
        store.mark_terminal("done");

        store.sweep();
        assert_eq!(store.session_count(), 1);
        assert!(store.lookup(Some("live"), 1).is_ok());
    }
}
