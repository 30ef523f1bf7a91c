use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::EmbedError;

pub const DEFAULT_HASH_DIMENSION: usize = 384;
pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-3-small";
pub const DEFAULT_OPENAI_DIMENSION: usize = 1536;
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Turns text into a fixed-dimension vector. Identical text must always
/// produce the identical vector.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError>;

    fn dimension(&self) -> usize;

    fn name(&self) -> &str;
}

/// Offline embedder based on feature hashing.
///
/// Lower-cased alphanumeric tokens and adjacent token pairs are hashed into
/// `dimension` signed buckets, then the vector is L2-normalised. Texts that
/// share vocabulary land close together under cosine similarity. Text with
/// no alphanumeric token is hashed by its characters instead, so only blank
/// text maps to the zero vector.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        assert!(dimension > 0, "embedding dimension must be non-zero");
        Self { dimension }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f32> {
        let lowered = text.to_lowercase();
        let tokens: Vec<&str> = lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .collect();

        let mut v = vec![0.0f32; self.dimension];
        for token in &tokens {
            self.bump(&mut v, token.as_bytes(), 1.0);
        }
        for pair in tokens.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.bump(&mut v, bigram.as_bytes(), 0.5);
        }

        // Punctuation or symbols only: fall back to the raw characters so the
        // text still gets a direction of its own.
        let trimmed = text.trim();
        if tokens.is_empty() && !trimmed.is_empty() {
            self.bump(&mut v, trimmed.as_bytes(), 1.0);
            let mut buf = [0u8; 4];
            for c in trimmed.chars().filter(|c| !c.is_whitespace()) {
                self.bump(&mut v, c.encode_utf8(&mut buf).as_bytes(), 0.5);
            }
            if v.iter().all(|x| *x == 0.0) {
                self.bump(&mut v, trimmed.as_bytes(), 1.0);
            }
        }

        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            v.iter_mut().for_each(|x| *x /= norm);
        }
        v
    }

    fn bump(&self, v: &mut [f32], feature: &[u8], weight: f32) {
        let h = seahash::hash(feature);
        let bucket = (h % self.dimension as u64) as usize;
        // Top bit picks the sign so collisions tend to cancel out
        let sign = if h >> 63 == 1 { -1.0 } else { 1.0 };
        v[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(DEFAULT_HASH_DIMENSION)
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        Ok(self.embed_sync(text))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}

/// OpenAI `/embeddings` endpoint.
pub struct OpenAiEmbedder {
    model_name: String,
    api_key: String,
    base_url: String,
    dimension: usize,
    http_client: reqwest::Client,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
    dimensions: usize,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(model_name: &str, api_key: &str, dimension: usize) -> Self {
        Self::with_base_url(model_name, api_key, dimension, DEFAULT_OPENAI_BASE_URL)
    }

    pub fn with_base_url(model_name: &str, api_key: &str, dimension: usize, base_url: &str) -> Self {
        Self {
            model_name: model_name.to_string(),
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            dimension,
            http_client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let request = EmbeddingRequest {
            model: &self.model_name,
            input: vec![text],
            dimensions: self.dimension,
        };

        let resp = self
            .http_client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api { status, body });
        }

        let response: EmbeddingResponse = resp.json().await?;
        let embedding = response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or(EmbedError::EmptyResponse)?;

        if embedding.len() != self.dimension {
            return Err(EmbedError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        debug!(model = %self.model_name, chars = text.len(), "embedded text");
        Ok(embedding)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}
