//! Evidence pool and citation assembly
//!
//! Evidence accumulates across rounds with session-unique sequential ids.
//! After the answer has streamed, its `[N]` markers are intersected with
//! the pool to build the deduplicated, first-appearance-ordered citation
//! list; full contents go to the citation store, the event carries only
//! previews.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};

use crate::agentic::events::CitationRef;
use crate::agentic::tools::EvidenceChunk;
use crate::service::citations::StoredCitation;
use crate::util::text::preview;

const PREVIEW_CHARS: usize = 30;

#[derive(Debug, Clone)]
pub struct EvidenceRecord {
    pub id: u32,
    pub title: String,
    pub content: String,
    pub similarity: f64,
}

#[derive(Default)]
pub struct EvidencePool {
    records: Vec<EvidenceRecord>,
    seen: HashSet<u64>,
}

impl EvidencePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Absorb retrieved chunks, assigning the next free ids. Chunks already
    /// present (same title and content) are skipped so ids stay stable.
    pub fn absorb(&mut self, chunks: Vec<EvidenceChunk>) -> usize {
        let mut added = 0;
        for chunk in chunks {
            let mut hasher = DefaultHasher::new();
            chunk.title.hash(&mut hasher);
            chunk.content.hash(&mut hasher);
            if !self.seen.insert(hasher.finish()) {
                continue;
            }
            let id = self.records.len() as u32 + 1;
            self.records.push(EvidenceRecord {
                id,
                title: chunk.title,
                content: chunk.content,
                similarity: chunk.similarity,
            });
            added += 1;
        }
        added
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn records(&self) -> &[EvidenceRecord] {
        &self.records
    }

    /// Numbered source list for the judge and answer prompts.
    pub fn sources_content(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            out.push_str(&format!("[{}] Title: {}\n", record.id, record.title));
            out.push_str(&format!("Similarity: {:.3}\n", record.similarity));
            out.push_str(&format!("Content: {}\n\n", record.content));
        }
        out
    }
}

/// Citation ids referenced in the answer text, in order of first
/// appearance, deduplicated.
pub fn extract_citation_ids(answer: &str) -> Vec<u32> {
    let mut ids = Vec::new();
    let bytes = answer.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'[' {
            let mut j = i + 1;
            while j < bytes.len() && bytes[j].is_ascii_digit() {
                j += 1;
            }
            if j > i + 1 && j < bytes.len() && bytes[j] == b']' {
                if let Ok(id) = answer[i + 1..j].parse::<u32>() {
                    if !ids.contains(&id) {
                        ids.push(id);
                    }
                }
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }
    ids
}

/// Intersect the answer's citation markers with the evidence pool.
pub fn assemble(answer: &str, records: &[EvidenceRecord]) -> Vec<CitationRef> {
    extract_citation_ids(answer)
        .into_iter()
        .filter_map(|id| {
            records.iter().find(|record| record.id == id).map(|record| CitationRef {
                id: record.id,
                title: record.title.clone(),
                preview: preview(&record.content, PREVIEW_CHARS),
            })
        })
        .collect()
}

/// Full-content records for the citation store, matching `assemble`'s ids.
pub fn stored_citations(citations: &[CitationRef], records: &[EvidenceRecord]) -> Vec<StoredCitation> {
    citations
        .iter()
        .filter_map(|citation| {
            records.iter().find(|record| record.id == citation.id).map(|record| StoredCitation {
                id: record.id,
                title: record.title.clone(),
                full_content: record.content.clone(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(title: &str, content: &str) -> EvidenceChunk {
        EvidenceChunk {
            title: title.to_string(),
            content: content.to_string(),
            similarity: 0.8,
        }
    }

    #[test]
    fn pool_assigns_sequential_session_unique_ids() {
        let mut pool = EvidencePool::new();
        pool.absorb(vec![chunk("A", "a1"), chunk("B", "b1")]);
        pool.absorb(vec![chunk("C", "c1")]);
        let ids: Vec<u32> = pool.records().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn pool_deduplicates_repeated_chunks() {
        let mut pool = EvidencePool::new();
        pool.absorb(vec![chunk("A", "same")]);
        let added = pool.absorb(vec![chunk("A", "same"), chunk("A", "different")]);
        assert_eq!(added, 1);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn marker_extraction_orders_by_first_appearance() {
        let ids = extract_citation_ids("B is true [2], A supports it [1], again [2].");
        assert_eq!(ids, vec![2, 1]);
    }

    #[test]
    fn marker_extraction_ignores_non_numeric_brackets() {
        let ids = extract_citation_ids("see [ref] and [12a] but [3] counts");
        assert_eq!(ids, vec![3]);
    }

    #[test]
    fn assemble_intersects_markers_with_pool() {
        let mut pool = EvidencePool::new();
        pool.absorb(vec![chunk("Guidelines", "Metformin is first-line."), chunk("Textbook", "x")]);
        let citations = assemble("Answer cites [1] and a ghost [9].", pool.records());
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].id, 1);
        assert_eq!(citations[0].title, "Guidelines");
    }

    #[test]
    fn previews_are_bounded() {
        let mut pool = EvidencePool::new();
        let long = "y".repeat(100);
        pool.absorb(vec![chunk("Doc", &long)]);
        let citations = assemble("[1]", pool.records());
        assert!(citations[0].preview.chars().count() <= PREVIEW_CHARS + 3);
        assert!(citations[0].preview.ends_with("..."));
    }

    #[test]
    fn stored_citations_carry_full_content() {
        let mut pool = EvidencePool::new();
        let long = "z".repeat(100);
        pool.absorb(vec![chunk("Doc", &long)]);
        let citations = assemble("[1]", pool.records());
        let stored = stored_citations(&citations, pool.records());
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].full_content.len(), 100);
    }
}
