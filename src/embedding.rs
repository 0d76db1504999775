//! Embedding service client.
//!
//! Defines the [`EmbeddingClient`] trait and the production
//! [`OpenAiEmbeddings`] implementation, which speaks the OpenAI-compatible
//! `POST {base_url}/embeddings` protocol.
//!
//! Also provides the vector utilities shared with the stores:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! # Failure semantics
//!
//! The client performs no internal retries. Whether a failed call against a
//! paid service is worth repeating is a cost decision that belongs to the
//! caller, so errors surface immediately with enough detail to distinguish:
//! - HTTP 401/403 → [`Error::Credential`]
//! - request deadline exceeded → [`Error::Timeout`]
//! - anything else → [`Error::EmbeddingService`] with status and body
//!
//! A response whose vector count differs from the input count is an error:
//! passages are never silently dropped.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::models::Credential;

/// Client for the embedding service.
///
/// `embed` preserves order: `result[i]` is the vector for `texts[i]`, and
/// the result length always equals the input length.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Model identifier recorded in index metadata.
    fn model(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;
}

/// Embedding client for OpenAI-compatible services.
///
/// Batches inputs per `embedding.batch_size`; any batch failure fails the
/// whole call.
pub struct OpenAiEmbeddings {
    base_url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    timeout_secs: u64,
    client: reqwest::Client,
    credential: Credential,
}

impl OpenAiEmbeddings {
    pub fn new(config: &EmbeddingConfig, credential: Credential) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| Error::EmbeddingService(e.to_string()))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size.max(1),
            timeout_secs: config.timeout_secs,
            client,
            credential,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": batch,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header(
                "Authorization",
                format!("Bearer {}", self.credential.secret()),
            )
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, self.timeout_secs))?;

        let status = response.status();
        if status.as_u16() == 401 || status.as_u16() == 403 {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::Credential(format!(
                "embedding service returned {}: {}",
                status, body_text
            )));
        }
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(Error::EmbeddingService(format!("{}: {}", status, body_text)));
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingService(e.to_string()))?;
        let vectors = parse_embeddings_response(&json)?;

        if vectors.len() != batch.len() {
            return Err(Error::EmbeddingService(format!(
                "service returned {} vectors for {} inputs",
                vectors.len(),
                batch.len()
            )));
        }

        Ok(vectors)
    }
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddings {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            all.extend(self.embed_batch(batch).await?);
        }
        Ok(all)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

fn transport_error(err: reqwest::Error, timeout_secs: u64) -> Error {
    if err.is_timeout() {
        Error::Timeout {
            operation: "embedding request".to_string(),
            seconds: timeout_secs,
        }
    } else {
        Error::EmbeddingService(err.to_string())
    }
}

/// Parse the embeddings API response JSON.
///
/// Extracts the `data[].embedding` arrays, ordered by each item's `index`
/// field so the output matches input order even if the service reorders.
fn parse_embeddings_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| {
            Error::EmbeddingService("invalid response: missing data array".to_string())
        })?;

    let mut indexed: Vec<(i64, Vec<f32>)> = Vec::with_capacity(data.len());

    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::EmbeddingService("invalid response: missing embedding".to_string())
            })?;

        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_i64())
            .unwrap_or(position as i64);

        indexed.push((index, vec));
    }

    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, vec)| vec).collect())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing a BLOB
/// of `vec.len() × 4` bytes.
///
/// # Example
///
/// ```rust
/// use lectern::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values from
/// the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`: `1.0` for identical direction, `0.0`
/// for orthogonal, `-1.0` for opposite. Returns `0.0` for empty vectors or
/// vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        let restored = blob_to_vec(&blob);
        assert_eq!(vec, restored);
    }

    #[test]
    fn cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_opposite() {
        let a = vec![1.0, 0.0];
        let b = vec![-1.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty_or_mismatched_is_zero() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[test]
    fn response_parsing_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.5, 0.5] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_embeddings_response(&json).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.5, 0.5]);
    }

    #[test]
    fn response_missing_data_is_error() {
        let json = serde_json::json!({ "unexpected": true });
        assert!(matches!(
            parse_embeddings_response(&json),
            Err(Error::EmbeddingService(_))
        ));
    }
}
