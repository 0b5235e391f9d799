//! Embedding capability
//!
//! Converts text (a transaction description or a user query) into a
//! fixed-length vector. Production uses the Gemini embedding endpoint over
//! a long-lived reqwest::Client; a deterministic local embedder keeps the
//! system functional without network access.

use crate::error::DispatchError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;
use tracing::{error, info};

/// Trait for text embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    fn dimension(&self) -> usize;
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

//
// ================= Gemini Embedder =================
//

/// Reusable Gemini embedding client (connection-pooled)
pub struct GeminiEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    dimension: usize,
}

impl GeminiEmbedder {
    pub fn new(api_key: String, dimension: usize, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/text-embedding-004:embedContent".to_string(),
            dimension,
        }
    }
}

#[async_trait]
impl Embedder for GeminiEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if self.api_key.is_empty() {
            return Err(DispatchError::EmbeddingUnavailable(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = EmbedRequest {
            model: "models/text-embedding-004".to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
        };

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Embedding API request failed: {}", e);
                DispatchError::EmbeddingUnavailable(format!("Embedding API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Embedding API error response: {}", error_text);
            return Err(DispatchError::EmbeddingUnavailable(format!(
                "Embedding API error: {}",
                error_text
            )));
        }

        let embed_response: EmbedResponse = response.json().await.map_err(|e| {
            DispatchError::EmbeddingUnavailable(format!("Embedding parse error: {}", e))
        })?;

        let values = embed_response.embedding.values;

        if values.len() != self.dimension {
            return Err(DispatchError::EmbeddingUnavailable(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimension,
                values.len()
            )));
        }

        info!(dimension = values.len(), "Embedding received");

        Ok(values)
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
}

#[derive(Debug, Serialize)]
struct EmbedContent {
    parts: Vec<EmbedPart>,
}

#[derive(Debug, Serialize)]
struct EmbedPart {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Debug, Deserialize)]
struct EmbedValues {
    values: Vec<f32>,
}

//
// ================= Hashing Embedder =================
//

/// Deterministic bag-of-words embedder for development & testing.
/// Keeps the system functional without the hosted embedding dependency.
/// Token counts are hashed into fixed buckets and L2-normalized, so texts
/// sharing vocabulary land near each other.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];

        for token in text
            .to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let mut hasher = DefaultHasher::new();
            token.hash(&mut hasher);
            let bucket = (hasher.finish() as usize) % self.dimension;
            vector[bucket] += 1.0;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }

        Ok(vector)
    }
}
