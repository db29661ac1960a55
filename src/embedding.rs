//! Embedding generation
//!
//! Three providers sit behind the [`Embedder`] trait: the hosted
//! OpenAI-compatible endpoint, a local fastembed model, and a deterministic
//! feature-hashing embedder that needs neither network nor model files.

use std::sync::Arc;

use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::{Config, EmbeddingBackend};
use crate::error::{Error, Result};

/// Turns text into fixed-dimension vectors
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Length of every vector this embedder returns
    fn dimensions(&self) -> usize;
}

/// Build the embedder selected by the configuration
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    match config.embedding_backend {
        EmbeddingBackend::OpenAi => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        EmbeddingBackend::Local => Ok(Arc::new(LocalEmbedder::new()?)),
        EmbeddingBackend::Hashing => Ok(Arc::new(HashingEmbedder::new(config.embedding_dimensions))),
    }
}

/// Fail when the embedder's vectors would not fit an index of `expected` dimensions
pub fn ensure_dimensions(embedder: &dyn Embedder, expected: usize) -> Result<()> {
    if embedder.dimensions() != expected {
        return Err(Error::config(format!(
            "embedder produces {} dimensions but the index expects {}",
            embedder.dimensions(),
            expected
        )));
    }
    Ok(())
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeddings from an OpenAI-compatible `/embeddings` endpoint
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    dimensions: usize,
}

impl OpenAiEmbedder {
    pub fn new(config: &Config) -> Result<Self> {
        let api_key = config
            .openai_api_key
            .clone()
            .ok_or_else(|| Error::config("OPENAI_API_KEY is required for hosted embeddings"))?;

        let client = reqwest::Client::builder()
            .timeout(config.provider_timeout)
            .build()?;

        Ok(Self {
            client,
            api_key,
            base_url: config.openai_base_url.clone(),
            model: config.embedding_model.clone(),
            dimensions: config.embedding_dimensions,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: vec![text],
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::embedding(format!("Failed to send embedding request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::embedding(format!("Embedding API error ({}): {}", status, body)));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::embedding(format!("Failed to parse embedding response: {}", e)))?;
        parsed.data.sort_by_key(|d| d.index);

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| Error::embedding("No embedding returned"))?;

        if embedding.len() != self.dimensions {
            return Err(Error::embedding(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                embedding.len()
            )));
        }

        debug!(model = %self.model, "embedded {} chars", text.len());
        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Output size of all-MiniLM-L6-v2
pub const LOCAL_MODEL_DIMENSIONS: usize = 384;

/// Embedding service running a local model (no API keys)
pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
}

impl LocalEmbedder {
    /// Load all-MiniLM-L6-v2 (384 dimensions).
    ///
    /// The model downloads to ~/.cache/fastembed on first use.
    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(
            InitOptions::new(EmbeddingModel::AllMiniLML6V2).with_show_download_progress(true),
        )
        .map_err(|e| Error::embedding(format!("Failed to load embedding model: {}", e)))?;

        Ok(Self {
            model: Arc::new(Mutex::new(model)),
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut guard = self.model.lock().await;
        let embeddings = guard
            .embed(vec![text.to_string()], None)
            .map_err(|e| Error::embedding(format!("Embedding failed: {}", e)))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::embedding("No embedding returned"))
    }

    fn dimensions(&self) -> usize {
        LOCAL_MODEL_DIMENSIONS
    }
}

/// Deterministic bag-of-words embedder using signed feature hashing.
///
/// Texts sharing words land close together under cosine similarity, and
/// identical texts map to identical vectors.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimensions: usize,
}

impl HashingEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    /// Synchronous core, shared with tests
    pub fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let hash = fnv1a(token.as_bytes());
            let slot = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vector[slot] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vectorize(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hashing_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("Je voudrais un café").await.unwrap();
        let b = embedder.embed("je voudrais un CAFÉ").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn shared_words_score_higher_than_unrelated() {
        let embedder = HashingEmbedder::new(256);
        let base = embedder.vectorize("where is the train station");
        let near = embedder.vectorize("the train station is far");
        let far = embedder.vectorize("my cat enjoys sunny mornings");
        assert!(cosine_similarity(&base, &near) > cosine_similarity(&base, &far));
        assert!((cosine_similarity(&base, &base) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn local_sized_vectors_do_not_fit_the_default_index() {
        let local_sized = HashingEmbedder::new(LOCAL_MODEL_DIMENSIONS);
        let err = ensure_dimensions(&local_sized, Config::default().embedding_dimensions);
        assert!(matches!(err, Err(Error::Config(ref msg)) if msg.contains("384")));
        assert!(ensure_dimensions(&local_sized, LOCAL_MODEL_DIMENSIONS).is_ok());
    }

    #[test]
    fn empty_text_is_zero_vector() {
        let embedder = HashingEmbedder::new(8);
        let v = embedder.vectorize("   ");
        assert!(v.iter().all(|x| *x == 0.0));
        assert_eq!(cosine_similarity(&v, &v), 0.0);
    }

    #[test]
    fn hosted_embedder_requires_key() {
        let config = Config::default();
        assert!(matches!(OpenAiEmbedder::new(&config), Err(Error::Config(_))));
    }
}
