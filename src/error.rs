//! Library error type.
//!
//! Every fallible operation in the pipeline returns one of these kinds, so
//! callers can tell a bad credential from a flaky embedding service from an
//! oversized upload without string matching. The CLI and HTTP layers map
//! kinds to exit messages and status codes respectively.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The caller asked for a document format this build does not handle.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The document claimed a supported format but its content could not be
    /// parsed into text.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// Extraction produced no usable text (empty or whitespace-only).
    #[error("document contains no extractable text")]
    EmptyDocument,

    /// The upload exceeds the configured size limit. Checked before any
    /// extraction work begins.
    #[error("document is {size} bytes, limit is {limit} bytes")]
    PayloadTooLarge { size: u64, limit: u64 },

    /// An external service rejected the supplied credential (HTTP 401/403).
    #[error("credential rejected: {0}")]
    Credential(String),

    /// The embedding service failed for a reason other than credentials or
    /// timeout. Carries the status and body so the caller can decide whether
    /// to retry; the library never retries on its own.
    #[error("embedding service error: {0}")]
    EmbeddingService(String),

    /// The chat completion service failed. Same retry policy as
    /// [`Error::EmbeddingService`]: none here, caller's call.
    #[error("generation service error: {0}")]
    GenerationService(String),

    /// No index exists for the given document hash, or the session has no
    /// active document.
    #[error("no index found: {0}")]
    IndexNotFound(String),

    /// An external call exceeded its configured deadline. Nothing was
    /// committed.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: String, seconds: u64 },

    /// The SQLite store failed underneath us, or a store was called in
    /// violation of its contract.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
