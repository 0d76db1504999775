//! Core data models used throughout Lectern.
//!
//! These types represent the passages, index handles, and conversation turns
//! that flow through the ingestion and retrieval pipeline.

use serde::Serialize;

/// A contiguous slice of a document's extracted text.
///
/// Spans are measured in characters (Unicode scalar values), not bytes.
/// Consecutive passages from the chunker overlap by the configured amount.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Passage {
    /// Position within the document, contiguous from 0.
    pub seq: i64,
    /// Offset of the first character.
    pub start_char: usize,
    /// Offset one past the last character.
    pub end_char: usize,
    pub text: String,
}

/// A passage paired with its similarity to a query vector.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage: Passage,
    /// Cosine similarity in `[-1.0, 1.0]`; higher is closer.
    pub score: f32,
}

/// Canonical reference to a built index, returned by the store.
#[derive(Debug, Clone, Serialize)]
pub struct IndexHandle {
    /// Lowercase hex SHA-256 of the source document bytes. This is the
    /// identity key: byte-identical documents share one index.
    pub document_hash: String,
    pub passage_count: i64,
    /// Vector dimensionality recorded at build time.
    pub dims: i64,
    /// Embedding model name recorded at build time.
    pub model: String,
    /// Unix timestamp of the build.
    pub built_at: i64,
}

/// One completed question/answer exchange within a session.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
    /// Unix timestamp the question was asked.
    pub asked_at: i64,
}

/// An answer plus the passages it was grounded in, in retrieval order.
#[derive(Debug, Clone, Serialize)]
pub struct GroundedAnswer {
    pub text: String,
    pub sources: Vec<ScoredPassage>,
}

/// API credential for the embedding and generation services.
///
/// Wrapped so the secret cannot leak through `Debug` formatting or logs.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let cred = Credential::new("sk-secret-key");
        let printed = format!("{:?}", cred);
        assert!(!printed.contains("secret"));
        assert_eq!(cred.secret(), "sk-secret-key");
    }
}
