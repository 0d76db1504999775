//! In-memory [`IndexStore`] implementation for testing.
//!
//! Uses a `HashMap` behind `std::sync::RwLock` for thread safety.
//! Retrieval is brute-force cosine similarity over all stored vectors.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Error, Result};
use crate::models::{IndexHandle, Passage, ScoredPassage};

use super::{rank_passages, IndexStore};

struct StoredIndex {
    handle: IndexHandle,
    entries: Vec<(Passage, Vec<f32>)>,
}

/// In-memory store for tests and ephemeral sessions.
pub struct InMemoryStore {
    indexes: RwLock<HashMap<String, StoredIndex>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            indexes: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IndexStore for InMemoryStore {
    async fn build(
        &self,
        document_hash: &str,
        passages: &[Passage],
        vectors: &[Vec<f32>],
        model: &str,
        dims: usize,
    ) -> Result<IndexHandle> {
        if passages.len() != vectors.len() {
            return Err(Error::Storage(format!(
                "build called with {} passages but {} vectors",
                passages.len(),
                vectors.len()
            )));
        }

        let mut indexes = self.indexes.write().unwrap();
        if let Some(existing) = indexes.get(document_hash) {
            return Ok(existing.handle.clone());
        }

        let handle = IndexHandle {
            document_hash: document_hash.to_string(),
            passage_count: passages.len() as i64,
            dims: dims as i64,
            model: model.to_string(),
            built_at: chrono::Utc::now().timestamp(),
        };
        let entries = passages
            .iter()
            .cloned()
            .zip(vectors.iter().cloned())
            .collect();
        indexes.insert(
            document_hash.to_string(),
            StoredIndex {
                handle: handle.clone(),
                entries,
            },
        );
        Ok(handle)
    }

    async fn lookup(&self, document_hash: &str) -> Result<Option<IndexHandle>> {
        let indexes = self.indexes.read().unwrap();
        Ok(indexes.get(document_hash).map(|s| s.handle.clone()))
    }

    async fn retrieve(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        let indexes = self.indexes.read().unwrap();
        let stored = indexes
            .get(&handle.document_hash)
            .ok_or_else(|| Error::IndexNotFound(handle.document_hash.clone()))?;
        Ok(rank_passages(&stored.entries, query_vector, k))
    }

    async fn evict(&self, document_hash: &str) -> Result<()> {
        let mut indexes = self.indexes.write().unwrap();
        indexes.remove(document_hash);
        Ok(())
    }
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

    #[tokio::test]
    async fn build_then_lookup_finds_handle() {
        let store = InMemoryStore::new();
        let handle = store
            .build("abc123", &[passage(0, "hello")], &[vec![1.0, 0.0]], "m", 2)
            .await
            .unwrap();
        assert_eq!(handle.passage_count, 1);

        let found = store.lookup("abc123").await.unwrap().unwrap();
        assert_eq!(found.document_hash, "abc123");
        assert!(store.lookup("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn second_build_returns_existing_handle() {
        let store = InMemoryStore::new();
        let first = store
            .build("h", &[passage(0, "a")], &[vec![1.0]], "m", 1)
            .await
            .unwrap();
        let second = store
            .build(
                "h",
                &[passage(0, "a"), passage(1, "b")],
                &[vec![1.0], vec![0.5]],
                "m",
                1,
            )
            .await
            .unwrap();
        assert_eq!(first.passage_count, second.passage_count);
        assert_eq!(first.built_at, second.built_at);
    }

    #[tokio::test]
    async fn retrieve_after_evict_is_index_not_found() {
        let store = InMemoryStore::new();
        let handle = store
            .build("h", &[passage(0, "a")], &[vec![1.0]], "m", 1)
            .await
            .unwrap();

        store.evict("h").await.unwrap();
        // A second eviction of the same hash is still fine.
        store.evict("h").await.unwrap();

        let err = store.retrieve(&handle, &[1.0], 1).await.unwrap_err();
        assert!(matches!(err, Error::IndexNotFound(_)));
    }

    #[tokio::test]
    async fn build_rejects_mismatched_passage_and_vector_counts() {
        let store = InMemoryStore::new();
        let err = store
            .build("h", &[passage(0, "a"), passage(1, "b")], &[vec![1.0]], "m", 1)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(store.lookup("h").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn retrieve_ranks_by_similarity() {
        let store = InMemoryStore::new();
        let handle = store
            .build(
                "h",
                &[passage(0, "x axis"), passage(1, "y axis")],
                &[vec![1.0, 0.0], vec![0.0, 1.0]],
                "m",
                2,
            )
            .await
            .unwrap();

        let hits = store.retrieve(&handle, &[0.0, 1.0], 2).await.unwrap();
        assert_eq!(hits[0].passage.text, "y axis");
        assert!(hits[0].score > hits[1].score);
    }
}
