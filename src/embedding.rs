//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait (the single capability "text to
//! fixed-length vector") and the concrete providers:
//!
//! - **[`HashingEmbedder`]** — deterministic offline token-hash projection;
//!   no network, no model download. Used for tests and air-gapped
//!   deployments.
//! - **[`OpenAiEmbedder`]** — OpenAI-compatible `/embeddings` endpoint.
//! - **[`OllamaEmbedder`]** — a local Ollama instance's `/api/embed`.
//! - **[`DisabledEmbedder`]** — always errors; used when embeddings are not
//!   configured.
//!
//! Remote providers enforce a request timeout and retry transient failures
//! (HTTP 429/5xx, network errors) at most `max_retries` times before
//! surfacing [`Error::Embedding`]. Batch embedding returns the same vectors
//! as one-at-a-time embedding; batching is a performance concern only.
//!
//! Also provides vector utilities:
//! - [`cosine_similarity`] — similarity between two embedding vectors
//! - [`vec_to_blob`] / [`blob_to_vec`] — little-endian f32 packing used by
//!   the persisted index generation

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Capability: map text to a fixed-dimension vector.
///
/// Implementations must be deterministic enough that repeated calls on the
/// same text produce vectors with cosine similarity 1 within floating
/// tolerance, and batch output must equal per-text output.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier recorded in the index generation metadata.
    fn model_name(&self) -> &str;
    /// Vector dimensionality; constant for the lifetime of the provider.
    fn dims(&self) -> usize;
    /// Embed a batch of texts, one vector per input, in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Builds the configured [`Embedder`].
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims.unwrap_or(256)))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        other => Err(Error::validation(format!(
            "unknown embedding provider: {}",
            other
        ))),
    }
}

// ============ Disabled provider ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::embedding("embedding provider is disabled"))
    }
}

// ============ Hashing provider ============

/// Deterministic token-hash projection embedder.
///
/// Each alphanumeric token is hashed (SHA-256) into a bucket of the output
/// vector with a hash-derived sign; the accumulated vector is then
/// L2-normalized. Texts sharing vocabulary land near each other, which is
/// enough for retrieval over a small knowledge base and for exercising the
/// full pipeline without a model server.
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut acc = vec![0.0f32; self.dims];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut first = [0u8; 8];
            first.copy_from_slice(&digest[..8]);
            let h = u64::from_le_bytes(first);
            let bucket = (h % self.dims as u64) as usize;
            let sign = if h & (1 << 63) != 0 { -1.0 } else { 1.0 };
            acc[bucket] += sign;
        }

        let norm = acc.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            for v in &mut acc {
                *v /= norm;
            }
        }
        acc
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "token-hash"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

// ============ OpenAI-compatible provider ============

/// Embedding provider for OpenAI-compatible `/embeddings` endpoints.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::validation("embedding.dims required for OpenAI provider"))?;
        if std::env::var("OPENAI_API_KEY").is_err() {
            return Err(Error::validation(
                "OPENAI_API_KEY environment variable not set",
            ));
        }
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            model,
            dims,
            base_url,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| Error::embedding("OPENAI_API_KEY not set"))?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = request_with_retry(self.max_retries, "embedding", || {
            self.client
                .post(format!("{}/embeddings", self.base_url))
                .header("Authorization", format!("Bearer {}", api_key))
                .json(&body)
        })
        .await
        .map_err(Error::embedding)?;

        let data = json
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| Error::embedding("invalid embeddings response: missing data array"))?;

        let mut vectors = Vec::with_capacity(data.len());
        for item in data {
            let embedding = item
                .get("embedding")
                .and_then(|e| e.as_array())
                .ok_or_else(|| Error::embedding("invalid embeddings response: missing embedding"))?;
            vectors.push(
                embedding
                    .iter()
                    .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                    .collect::<Vec<f32>>(),
            );
        }
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

// ============ Ollama provider ============

/// Embedding provider using a local Ollama instance's `/api/embed`.
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| Error::validation("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| Error::validation("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url,
            max_retries: config.max_retries,
            client: build_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let json = request_with_retry(self.max_retries, "embedding", || {
            self.client
                .post(format!("{}/api/embed", self.url))
                .json(&body)
        })
        .await
        .map_err(Error::embedding)?;

        let embeddings = json
            .get("embeddings")
            .and_then(|e| e.as_array())
            .ok_or_else(|| Error::embedding("invalid Ollama response: missing embeddings array"))?;

        let mut vectors = Vec::with_capacity(embeddings.len());
        for embedding in embeddings {
            let vec: Vec<f32> = embedding
                .as_array()
                .ok_or_else(|| Error::embedding("invalid Ollama response: embedding is not an array"))?
                .iter()
                .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                .collect();
            vectors.push(vec);
        }
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

// ============ Shared HTTP plumbing ============

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| Error::internal(format!("failed to build HTTP client: {}", e)))
}

fn check_dims(vectors: &[Vec<f32>], dims: usize) -> Result<()> {
    for vec in vectors {
        if vec.len() != dims {
            return Err(Error::embedding(format!(
                "embedding dimension mismatch: expected {}, got {}",
                dims,
                vec.len()
            )));
        }
    }
    Ok(())
}

/// Issues a JSON request with bounded retry on transient failure.
///
/// HTTP 429 and 5xx responses and network errors are retried with
/// exponential backoff; other non-success statuses fail immediately.
/// Returns the parsed JSON body or the last error message.
pub(crate) async fn request_with_retry(
    max_retries: u32,
    what: &str,
    make_request: impl Fn() -> reqwest::RequestBuilder,
) -> std::result::Result<serde_json::Value, String> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match make_request().send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return response
                        .json::<serde_json::Value>()
                        .await
                        .map_err(|e| format!("{} response was not valid JSON: {}", what, e));
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", what, status, body_text));
                    continue;
                }
                return Err(format!("{} API error {}: {}", what, status, body_text));
            }
            Err(e) => {
                last_err = Some(format!("{} request failed: {}", what, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| format!("{} failed after retries", what)))
}

// ============ Vector utilities ============

/// Encode a float vector as little-endian f32 bytes.
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns `0.0` for empty vectors or vectors of different lengths.
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

    #[tokio::test]
    async fn hashing_embedder_is_deterministic() {
        let embedder = HashingEmbedder::new(128);
        let text = vec!["the indexing pipeline embeds chunks".to_string()];
        let a = embedder.embed(&text).await.unwrap();
        let b = embedder.embed(&text).await.unwrap();
        assert_eq!(a, b);
        assert!((cosine_similarity(&a[0], &b[0]) - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn batch_embedding_matches_single() {
        let embedder = HashingEmbedder::new(64);
        let texts = vec![
            "first chunk of text".to_string(),
            "second chunk of text".to_string(),
        ];
        let batch = embedder.embed(&texts).await.unwrap();
        let first = embedder.embed(&texts[..1].to_vec()).await.unwrap();
        let second = embedder.embed(&texts[1..].to_vec()).await.unwrap();
        assert_eq!(batch[0], first[0]);
        assert_eq!(batch[1], second[0]);
    }

    #[tokio::test]
    async fn hashing_embedder_has_constant_dims() {
        let embedder = HashingEmbedder::new(32);
        let texts = vec!["a".to_string(), "a much longer piece of text".to_string()];
        for vec in embedder.embed(&texts).await.unwrap() {
            assert_eq!(vec.len(), 32);
        }
    }

    #[tokio::test]
    async fn related_texts_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::new(256);
        let texts = vec![
            "rust async runtime scheduling".to_string(),
            "scheduling in the rust async runtime".to_string(),
            "grapefruit marmalade recipe".to_string(),
        ];
        let vecs = embedder.embed(&texts).await.unwrap();
        let related = cosine_similarity(&vecs[0], &vecs[1]);
        let unrelated = cosine_similarity(&vecs[0], &vecs[2]);
        assert!(related > unrelated);
    }

    #[tokio::test]
    async fn disabled_embedder_errors() {
        let err = DisabledEmbedder.embed(&["x".to_string()]).await.unwrap_err();
        assert_eq!(err.kind(), "embedding");
    }

    #[test]
    fn blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn cosine_basics() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }
}
