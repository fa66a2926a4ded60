//! Text embedding via the Gemini API.
//!
//! Queries and documents are embedded with distinct task types so the
//! vector store sees retrieval-optimised vectors on both sides.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// ============================================================================
// EmbeddingProvider Trait
// ============================================================================

/// Converts text into vectors for semantic search.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a document for indexing.
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a search query.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Embedding dimensionality.
    fn dimension(&self) -> usize;
}

// ============================================================================
// Gemini Embedding
// ============================================================================

const GEMINI_EMBED_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-embedding-001:embedContent";

/// Default embedding dimension.
pub const DEFAULT_DIMENSION: usize = 768;

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 2000;

/// Gemini embedding client with retry/backoff on rate limiting.
#[derive(Debug)]
pub struct GeminiEmbedding {
    api_key: String,
    client: reqwest::Client,
    dimension: usize,
}

impl GeminiEmbedding {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            api_key,
            client,
            dimension: DEFAULT_DIMENSION,
        })
    }

    /// Build from GEMINI_API_KEY / GOOGLE_AI_API_KEY.
    pub fn from_env() -> Result<Self> {
        Self::new(get_api_key()?)
    }

    async fn embed_with_task(&self, text: &str, task_type: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimension]);
        }

        let request = EmbedRequest {
            model: "models/gemini-embedding-001".to_string(),
            content: EmbedContent {
                parts: vec![EmbedPart {
                    text: text.to_string(),
                }],
            },
            task_type: task_type.to_string(),
            output_dimensionality: Some(self.dimension),
        };

        let mut last_error: Option<anyhow::Error> = None;

        for attempt in 0..=MAX_RETRIES {
            let response = match self
                .client
                .post(GEMINI_EMBED_URL)
                .header("x-goog-api-key", &self.api_key)
                .json(&request)
                .send()
                .await
            {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Failed to send embedding request: {}", e));
                    if attempt < MAX_RETRIES {
                        let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                        tracing::warn!(
                            "Embedding request failed, retrying in {:?} (attempt {}/{})",
                            backoff,
                            attempt + 1,
                            MAX_RETRIES
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }
                    break;
                }
            };

            let status = response.status();
            let body = response
                .text()
                .await
                .context("Failed to read embedding response body")?;

            if status.is_success() {
                let parsed: EmbedResponse =
                    serde_json::from_str(&body).context("Failed to parse embedding response")?;
                return Ok(parsed.embedding.values);
            }

            if status.as_u16() == 429 {
                // Rate limited, back off exponentially.
                let backoff = Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Embedding rate limit hit (429), backing off {:?} (attempt {}/{})",
                    backoff,
                    attempt + 1,
                    MAX_RETRIES
                );
                last_error = Some(anyhow::anyhow!("Rate limit exceeded (429)"));
                if attempt < MAX_RETRIES {
                    tokio::time::sleep(backoff).await;
                    continue;
                }
            } else {
                if let Ok(err) = serde_json::from_str::<GeminiError>(&body) {
                    anyhow::bail!(
                        "Gemini API error ({}): {}",
                        err.error.status,
                        err.error.message
                    );
                }
                anyhow::bail!("Gemini API error ({}): {}", status, body);
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Embedding failed after {} retries", MAX_RETRIES)))
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest {
    model: String,
    content: EmbedContent,
    #[serde(rename = "taskType")]
    task_type: String,
    #[serde(rename = "outputDimensionality", skip_serializing_if = "Option::is_none")]
    output_dimensionality: Option<usize>,
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
    embedding: EmbeddingValues,
}

#[derive(Debug, Deserialize)]
struct EmbeddingValues {
    values: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: GeminiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GeminiErrorDetail {
    message: String,
    #[serde(default)]
    status: String,
}

#[async_trait]
impl EmbeddingProvider for GeminiEmbedding {
    async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, "RETRIEVAL_DOCUMENT").await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_with_task(text, "RETRIEVAL_QUERY").await
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

// ============================================================================
// API Key Management
// ============================================================================

/// Load the API key from GEMINI_API_KEY, then GOOGLE_AI_API_KEY.
pub fn get_api_key() -> Result<String> {
    for var in ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"] {
        if let Ok(key) = std::env::var(var) {
            if !key.is_empty() {
                tracing::debug!("Using API key from {}", var);
                return Ok(key);
            }
        }
    }

    anyhow::bail!(
        "API key not found. Set GEMINI_API_KEY or GOOGLE_AI_API_KEY environment variable."
    )
}

/// Whether an API key is configured.
pub fn has_api_key() -> bool {
    ["GEMINI_API_KEY", "GOOGLE_AI_API_KEY"]
        .iter()
        .any(|var| std::env::var(var).map(|k| !k.is_empty()).unwrap_or(false))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_has_api_key_does_not_panic() {
        let _ = has_api_key();
    }

    #[tokio::test]
    async fn test_empty_text_returns_zero_vector() {
        let embedder = GeminiEmbedding::new("fake_key".to_string()).unwrap();
        let vec = embedder.embed_document("   ").await.unwrap();
        assert_eq!(vec.len(), DEFAULT_DIMENSION);
        assert!(vec.iter().all(|v| *v == 0.0));
    }
}
