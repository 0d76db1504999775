//! Assistant facade: ingestion and question answering over one store.
//!
//! [`Assistant`] owns the configuration and a shared [`IndexStore`]. Each
//! successful ingestion yields a [`Session`] bound to the document's
//! index; questions then run through the retrieval engine against that
//! session.
//!
//! Ingestion is content-addressed. The SHA-256 digest of the uploaded
//! bytes keys the index, so re-ingesting the same bytes reuses the stored
//! index without extracting or embedding anything.

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::chunk::chunk_text;
use crate::config::Config;
use crate::embedding::{EmbeddingClient, OpenAiEmbeddings};
use crate::engine;
use crate::error::{Error, Result};
use crate::extract::{extract_text, DocumentFormat};
use crate::llm::{ChatClient, OpenAiChat};
use crate::models::{Credential, GroundedAnswer};
use crate::session::Session;
use crate::store::IndexStore;

/// Facade over the ingest → index → converse pipeline.
pub struct Assistant {
    config: Config,
    store: Arc<dyn IndexStore>,
}

impl Assistant {
    /// Create an assistant over a validated config and a shared store.
    pub fn new(config: Config, store: Arc<dyn IndexStore>) -> Self {
        Self { config, store }
    }

    /// Ingest a document and open a session over it, talking to the
    /// configured OpenAI-compatible services with `credential`.
    pub async fn ingest(
        &self,
        bytes: Vec<u8>,
        format: DocumentFormat,
        credential: &Credential,
    ) -> Result<Session> {
        let embedder = Arc::new(OpenAiEmbeddings::new(
            &self.config.embedding,
            credential.clone(),
        )?);
        let chat = Arc::new(OpenAiChat::new(&self.config.generation, credential.clone())?);
        self.ingest_with_clients(bytes, format, embedder, chat)
            .await
    }

    /// Ingest with caller-supplied service clients.
    ///
    /// The pipeline: size check, hash, index lookup, and on a cache miss
    /// extract → chunk → embed → build. A cache hit skips extraction and
    /// never invokes the embedder. On any failure nothing is persisted
    /// and no session is produced.
    pub async fn ingest_with_clients(
        &self,
        bytes: Vec<u8>,
        format: DocumentFormat,
        embedder: Arc<dyn EmbeddingClient>,
        chat: Arc<dyn ChatClient>,
    ) -> Result<Session> {
        let size = bytes.len() as u64;
        let limit = self.config.limits.max_document_bytes;
        if size > limit {
            return Err(Error::PayloadTooLarge { size, limit });
        }

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let document_hash = format!("{:x}", hasher.finalize());

        if let Some(handle) = self.store.lookup(&document_hash).await? {
            tracing::info!(
                document_hash = %handle.document_hash,
                passages = handle.passage_count,
                "reusing cached index"
            );
            return Ok(Session::activate(handle, embedder, chat));
        }

        let text = tokio::task::spawn_blocking(move || extract_text(&bytes, format))
            .await
            .map_err(|e| Error::Extraction(format!("extraction task failed: {e}")))??;

        let passages = chunk_text(
            &text,
            self.config.chunking.chunk_chars,
            self.config.chunking.overlap_chars,
        )?;

        let texts: Vec<String> = passages.iter().map(|p| p.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != passages.len() {
            // Guards injected embedders; the bundled client enforces this
            // itself.
            return Err(Error::EmbeddingService(format!(
                "embedder returned {} vectors for {} passages",
                vectors.len(),
                passages.len()
            )));
        }

        let handle = self
            .store
            .build(
                &document_hash,
                &passages,
                &vectors,
                embedder.model(),
                embedder.dims(),
            )
            .await?;
        tracing::info!(
            document_hash = %handle.document_hash,
            passages = handle.passage_count,
            "built index"
        );

        Ok(Session::activate(handle, embedder, chat))
    }

    /// Answer a question in the session's conversation. The turn is
    /// recorded only if generation succeeds.
    pub async fn ask(&self, session: &mut Session, question: &str) -> Result<GroundedAnswer> {
        engine::answer(
            self.store.as_ref(),
            self.config.retrieval.top_k as usize,
            session,
            question,
        )
        .await
    }

    /// Answer a one-off question against the session's document without
    /// reading or extending its history.
    pub async fn ask_detached(&self, session: &Session, question: &str) -> Result<GroundedAnswer> {
        engine::answer_detached(
            self.store.as_ref(),
            self.config.retrieval.top_k as usize,
            session,
            question,
        )
        .await
    }

    /// Evict the session's index from the store and clear the session.
    ///
    /// Idempotent: forgetting a session that has no active document only
    /// clears it. If eviction fails the session is left intact so the
    /// caller can retry.
    pub async fn forget(&self, session: &mut Session) -> Result<()> {
        if let Some(handle) = session.document() {
            let document_hash = handle.document_hash.clone();
            self.store.evict(&document_hash).await?;
            tracing::info!(document_hash = %document_hash, "evicted index");
        }
        session.clear();
        Ok(())
    }
}
