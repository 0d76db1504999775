//! Storage abstraction for passage indexes.
//!
//! The [`IndexStore`] trait defines all storage operations needed by the
//! retrieval pipeline, enabling pluggable backends (SQLite, in-memory).
//!
//! Indexes are content-addressed: the key is the SHA-256 hex digest of the
//! original document bytes, so re-ingesting identical bytes finds the
//! existing index instead of rebuilding it.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{IndexHandle, Passage, ScoredPassage};

/// Abstract storage backend for passage indexes.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`build`](IndexStore::build) | Persist a complete index for a document hash |
/// | [`lookup`](IndexStore::lookup) | Find an existing index by document hash |
/// | [`exists`](IndexStore::exists) | Check whether an index is present |
/// | [`retrieve`](IndexStore::retrieve) | Rank stored passages against a query vector |
/// | [`evict`](IndexStore::evict) | Remove an index and its passages |
#[async_trait]
pub trait IndexStore: Send + Sync {
    /// Persist a complete index: every passage plus its embedding vector,
    /// keyed by the document's content hash.
    ///
    /// `passages` and `vectors` are parallel: `vectors[i]` embeds
    /// `passages[i]`; mismatched lengths fail with
    /// [`Error::Storage`](crate::error::Error::Storage) without writing.
    /// Must be atomic: either the full index lands or
    /// nothing does. If an index for `document_hash` already exists the
    /// existing one wins and is returned unchanged, so concurrent builds
    /// of the same document converge on one index.
    async fn build(
        &self,
        document_hash: &str,
        passages: &[Passage],
        vectors: &[Vec<f32>],
        model: &str,
        dims: usize,
    ) -> Result<IndexHandle>;

    /// Find an existing index by content hash.
    async fn lookup(&self, document_hash: &str) -> Result<Option<IndexHandle>>;

    /// Check whether an index exists for a content hash.
    async fn exists(&self, document_hash: &str) -> Result<bool> {
        Ok(self.lookup(document_hash).await?.is_some())
    }

    /// Rank the index's passages against a query vector.
    ///
    /// Returns at most `k` passages ordered by cosine similarity,
    /// descending. Equal scores fall back to ascending passage sequence so
    /// retrieval is deterministic. Returns
    /// [`Error::IndexNotFound`](crate::error::Error::IndexNotFound) if the
    /// handle's index is no longer present.
    async fn retrieve(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>>;

    /// Remove an index and all its passages.
    ///
    /// Evicting a hash with no index is a no-op, not an error.
    async fn evict(&self, document_hash: &str) -> Result<()>;
}

/// Rank `(passage, vector)` pairs against a query vector.
///
/// Shared by backends that score in process: cosine similarity descending,
/// ties broken by ascending passage sequence, truncated to `k`.
pub(crate) fn rank_passages(
    entries: &[(Passage, Vec<f32>)],
    query_vector: &[f32],
    k: usize,
) -> Vec<ScoredPassage> {
    let mut scored: Vec<ScoredPassage> = entries
        .iter()
        .map(|(passage, vector)| ScoredPassage {
            passage: passage.clone(),
            score: crate::embedding::cosine_similarity(query_vector, vector),
        })
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.passage.seq.cmp(&b.passage.seq))
    });
    scored.truncate(k);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;

    fn passage(seq: i64, text: &str) -> Passage {
        Passage {
            seq,
            start_char: 0,
            end_char: text.chars().count(),
            text: text.to_string(),
        }
    }

    #[test]
    fn ranking_orders_by_score_descending() {
        let entries = vec![
            (passage(0, "far"), vec![0.0, 1.0]),
            (passage(1, "near"), vec![1.0, 0.0]),
            (passage(2, "mid"), vec![0.7, 0.7]),
        ];
        let ranked = rank_passages(&entries, &[1.0, 0.0], 3);
        assert_eq!(ranked[0].passage.text, "near");
        assert_eq!(ranked[1].passage.text, "mid");
        assert_eq!(ranked[2].passage.text, "far");
    }

    #[test]
    fn ranking_breaks_ties_by_ascending_seq() {
        let entries = vec![
            (passage(2, "c"), vec![1.0, 0.0]),
            (passage(0, "a"), vec![1.0, 0.0]),
            (passage(1, "b"), vec![1.0, 0.0]),
        ];
        let ranked = rank_passages(&entries, &[1.0, 0.0], 3);
        let seqs: Vec<i64> = ranked.iter().map(|s| s.passage.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }

    #[test]
    fn ranking_truncates_to_k() {
        let entries = vec![
            (passage(0, "a"), vec![1.0, 0.0]),
            (passage(1, "b"), vec![0.9, 0.1]),
            (passage(2, "c"), vec![0.8, 0.2]),
        ];
        let ranked = rank_passages(&entries, &[1.0, 0.0], 2);
        assert_eq!(ranked.len(), 2);
    }
}
