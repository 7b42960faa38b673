//! Embedding client abstraction and HTTP implementation.
//!
//! Defines the [`Embedder`] trait and the concrete [`HttpEmbedder`] that
//! calls an external inference service's `POST {base_url}/v1/embeddings`
//! endpoint with batching and bounded parallelism. Batches execute
//! concurrently but results are reassembled in input order, so the caller
//! always gets one vector per text, positionally matched.
//!
//! Also provides vector utilities for the BLOB-backed similarity search:
//! - [`cosine_similarity`] — compute similarity between two embedding vectors
//! - [`vec_to_blob`] — encode a `Vec<f32>` as little-endian bytes for SQLite BLOB storage
//! - [`blob_to_vec`] — decode a SQLite BLOB back into a `Vec<f32>`
//!
//! A failed batch fails the whole call. Partial vector sets are never
//! returned; the ingestion pipeline relies on this to keep chunk and
//! embedding counts equal.

use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;

#[derive(Debug, Error)]
pub enum EmbedError {
    /// Network-level failure, including request timeouts.
    #[error("embedding request failed: {0}")]
    Transport(#[from] reqwest::Error),
    /// The service answered with a non-success status.
    #[error("embedding service returned {status}: {body}")]
    Upstream { status: u16, body: String },
    /// The response decoded but did not match the request shape.
    #[error("malformed embedding response: {0}")]
    Shape(String),
}

/// Trait for embedding backends.
///
/// The pipeline and search engine hold this behind an `Arc<dyn Embedder>`
/// so tests can substitute a stub.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, returning one vector per text in the same
    /// order. Empty input returns an empty vector without a network call.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Vector dimensionality every returned embedding must have.
    fn dims(&self) -> usize;
}

/// Embed a single query text.
pub async fn embed_query(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>, EmbedError> {
    let results = embedder.embed(&[text.to_string()]).await?;
    results
        .into_iter()
        .next()
        .ok_or_else(|| EmbedError::Shape("empty embedding response".to_string()))
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// HTTP client for the external inference service.
pub struct HttpEmbedder {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_parallel: usize,
}

impl HttpEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            endpoint: format!("{}/v1/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            dims: config.dims,
            batch_size: config.batch_size,
            max_parallel: config.max_parallel,
        })
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let request = EmbeddingsRequest {
            model: &self.model,
            input: batch,
        };

        let response = self.http.post(&self.endpoint).json(&request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbedError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: EmbeddingsResponse = response.json().await?;
        if parsed.data.len() != batch.len() {
            return Err(EmbedError::Shape(format!(
                "requested {} embeddings, got {}",
                batch.len(),
                parsed.data.len()
            )));
        }

        let vectors: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        for v in &vectors {
            if v.len() != self.dims {
                return Err(EmbedError::Shape(format!(
                    "expected {} dims, got {}",
                    self.dims,
                    v.len()
                )));
            }
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        // `buffered` keeps completion order equal to submission order, so
        // the flattened result lines up with the input texts.
        let futs: Vec<_> = texts
            .chunks(self.batch_size)
            .map(|batch| self.embed_batch(batch))
            .collect();
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(futs)
            .buffered(self.max_parallel.max(1))
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// Each `f32` is stored as 4 bytes in little-endian order, producing
/// a BLOB of `vec.len() × 4` bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
///
/// Reverses [`vec_to_blob`]: reads 4-byte little-endian `f32` values
/// from the byte slice.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`. Returns `0.0` for empty vectors or
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

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
