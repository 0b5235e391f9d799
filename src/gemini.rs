//! Gemini API client for reasoning-model calls
//!
//! Agents and the classifier fallback go through the ReasoningModel trait
//! so deterministic stubs can exercise the degradation contract.
//! Uses a long-lived reqwest::Client for connection pooling.

use crate::config::Config;
use crate::error::DispatchError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

/// Trait for reasoning-model providers
#[async_trait]
pub trait ReasoningModel: Send + Sync {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String>;
}

//
// ================= Retry Policy =================
//

/// Retry-once-with-backoff at the I/O boundary. No call retries forever.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retries: config.model_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Run a model call under the retry policy. Transient failures get one
/// backoff-delayed retry; the final error is surfaced typed.
pub async fn generate_with_retry(
    model: &dyn ReasoningModel,
    system: &str,
    prompt: &str,
    policy: &RetryPolicy,
) -> Result<String> {
    let mut attempt = 0;

    loop {
        match model.generate(system, prompt).await {
            Ok(text) => return Ok(text),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    attempt = attempt,
                    error = %e,
                    "Model call failed, retrying after backoff"
                );
                tokio::time::sleep(policy.backoff).await;
            }
            Err(e) => {
                return Err(DispatchError::ReasoningModelFailure(e.to_string()));
            }
        }
    }
}

//
// ================= Gemini Client =================

/// Reusable Gemini client (connection-pooled)
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: String, timeout_secs: u64) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            base_url: "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.0-flash:generateContent".to_string(),
        }
    }
}

#[async_trait]
impl ReasoningModel for GeminiClient {
    async fn generate(&self, system: &str, prompt: &str) -> Result<String> {
        if self.api_key.is_empty() {
            return Err(DispatchError::ReasoningModelFailure(
                "GEMINI_API_KEY not configured".to_string(),
            ));
        }

        let url = format!("{}?key={}", self.base_url, self.api_key);

        let request = GeminiRequest {
            contents: vec![Content {
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
            generation_config: GenerationConfig {
                temperature: 0.2,
                top_p: 0.9,
                top_k: 40,
                max_output_tokens: 1024,
            },
            system_instruction: SystemInstruction {
                parts: vec![Part {
                    text: system.to_string(),
                }],
            },
        };

        info!("Calling Gemini API");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!("Gemini API request failed: {}", e);
                DispatchError::ReasoningModelFailure(format!("Gemini API error: {}", e))
            })?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            error!("Gemini API error response: {}", error_text);
            return Err(DispatchError::ReasoningModelFailure(format!(
                "Gemini API error: {}",
                error_text
            )));
        }

        let gemini_response: GeminiResponse = response.json().await.map_err(|e| {
            DispatchError::ReasoningModelFailure(format!("Gemini parse error: {}", e))
        })?;

        let answer = gemini_response
            .candidates
            .first()
            .and_then(|c| c.content.parts.first())
            .map(|p| p.text.clone())
            .ok_or_else(|| {
                DispatchError::ReasoningModelFailure("Empty response from Gemini".to_string())
            })?;

        Ok(answer)
    }
}

//
// ================= Wire Types =================
//

#[derive(Debug, Serialize)]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
    system_instruction: SystemInstruction,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    top_p: f32,
    top_k: i32,
    max_output_tokens: i32,
}

#[derive(Debug, Serialize)]
struct SystemInstruction {
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Content,
}

//
// ================= Stub Model =================
//

/// Canned-response model for development & testing.
/// Keeps the system functional without the hosted LLM dependency.
pub struct StubModel {
    response: String,
}

impl StubModel {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

#[async_trait]
impl ReasoningModel for StubModel {
    async fn generate(&self, _system: &str, _prompt: &str) -> Result<String> {
        Ok(self.response.clone())
    }
}
