//! SQLite-backed [`IndexStore`] implementation.
//!
//! Passages and their embedding vectors live in the `passages` table,
//! vectors encoded as little-endian f32 BLOBs. Index metadata lives in
//! `indexes`, keyed by document content hash.

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{Error, Result};
use crate::models::{IndexHandle, Passage, ScoredPassage};

use super::{rank_passages, IndexStore};

/// SQLite implementation of the [`IndexStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn handle_from_row(row: &sqlx::sqlite::SqliteRow) -> IndexHandle {
    IndexHandle {
        document_hash: row.get("document_hash"),
        passage_count: row.get("passage_count"),
        dims: row.get("dims"),
        model: row.get("model"),
        built_at: row.get("built_at"),
    }
}

#[async_trait]
impl IndexStore for SqliteStore {
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

        loop {
            let mut tx = self.pool.begin().await?;

            let built_at = chrono::Utc::now().timestamp();
            let inserted = sqlx::query(
                r#"
                INSERT OR IGNORE INTO indexes (document_hash, passage_count, dims, model, built_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
            )
            .bind(document_hash)
            .bind(passages.len() as i64)
            .bind(dims as i64)
            .bind(model)
            .bind(built_at)
            .execute(&mut *tx)
            .await?;

            if inserted.rows_affected() == 0 {
                // Another writer built this document first; its index wins.
                tx.rollback().await?;
                match self.lookup(document_hash).await? {
                    Some(handle) => return Ok(handle),
                    // The winner was evicted before we could read it.
                    None => continue,
                }
            }

            for (passage, vector) in passages.iter().zip(vectors.iter()) {
                let blob = vec_to_blob(vector);
                sqlx::query(
                    r#"
                    INSERT INTO passages (document_hash, seq, start_char, end_char, text, embedding)
                    VALUES (?, ?, ?, ?, ?, ?)
                    "#,
                )
                .bind(document_hash)
                .bind(passage.seq)
                .bind(passage.start_char as i64)
                .bind(passage.end_char as i64)
                .bind(&passage.text)
                .bind(&blob)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            return Ok(IndexHandle {
                document_hash: document_hash.to_string(),
                passage_count: passages.len() as i64,
                dims: dims as i64,
                model: model.to_string(),
                built_at,
            });
        }
    }

    async fn lookup(&self, document_hash: &str) -> Result<Option<IndexHandle>> {
        let row = sqlx::query(
            "SELECT document_hash, passage_count, dims, model, built_at FROM indexes WHERE document_hash = ?",
        )
        .bind(document_hash)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(handle_from_row))
    }

    async fn retrieve(
        &self,
        handle: &IndexHandle,
        query_vector: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredPassage>> {
        // One transaction for both reads, so an eviction between the
        // index check and the passage fetch cannot produce an empty
        // result instead of IndexNotFound.
        let mut tx = self.pool.begin().await?;

        let index_row = sqlx::query("SELECT document_hash FROM indexes WHERE document_hash = ?")
            .bind(&handle.document_hash)
            .fetch_optional(&mut *tx)
            .await?;
        if index_row.is_none() {
            return Err(Error::IndexNotFound(handle.document_hash.clone()));
        }

        let rows = sqlx::query(
            r#"
            SELECT seq, start_char, end_char, text, embedding
            FROM passages
            WHERE document_hash = ?
            ORDER BY seq ASC
            "#,
        )
        .bind(&handle.document_hash)
        .fetch_all(&mut *tx)
        .await?;
        tx.commit().await?;

        let entries: Vec<(Passage, Vec<f32>)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let start_char: i64 = row.get("start_char");
                let end_char: i64 = row.get("end_char");
                (
                    Passage {
                        seq: row.get("seq"),
                        start_char: start_char as usize,
                        end_char: end_char as usize,
                        text: row.get("text"),
                    },
                    blob_to_vec(&blob),
                )
            })
            .collect();

        Ok(rank_passages(&entries, query_vector, k))
    }

    async fn evict(&self, document_hash: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM passages WHERE document_hash = ?")
            .bind(document_hash)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM indexes WHERE document_hash = ?")
            .bind(document_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}
