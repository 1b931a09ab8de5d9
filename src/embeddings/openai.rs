//! OpenAI-compatible embeddings provider.
//!
//! Talks to the `/embeddings` endpoint of any OpenAI-compatible API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::config::default_embedding_dimension;
use crate::embeddings::EmbeddingProvider;
use crate::error::CoderagErr;
use crate::error::Result;

/// Default model for embeddings.
const DEFAULT_MODEL: &str = "text-embedding-3-small";
/// Default API base URL.
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default per-call timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// OpenAI embeddings provider.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    dimension: i32,
    base_url: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenAiEmbeddings {
    /// Create a provider with default model, URL and timeout.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            dimension: default_embedding_dimension(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: DEFAULT_TIMEOUT,
            client: reqwest::Client::new(),
        }
    }

    /// Set the model to use.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Set the embedding dimension.
    pub fn with_dimension(mut self, dimension: i32) -> Self {
        self.dimension = dimension;
        self
    }

    /// Set the base URL for API requests.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: Some(self.dimension),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| CoderagErr::EmbeddingFailed {
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(CoderagErr::EmbeddingFailed {
                cause: format!("API error {status}: {error_text}"),
            });
        }

        let result: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| CoderagErr::EmbeddingFailed {
                    cause: e.to_string(),
                })?;

        // Sort by index to ensure correct order.
        let mut embeddings: Vec<(i32, Vec<f32>)> = result
            .data
            .into_iter()
            .map(|e| (e.index, e.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    fn name(&self) -> &str {
        "openai"
    }

    fn dimension(&self) -> i32 {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.request_embeddings(vec![text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| CoderagErr::EmbeddingFailed {
                cause: "empty response".to_string(),
            })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts.to_vec()).await
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: i32,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let provider = OpenAiEmbeddings::new("test-key")
            .with_model("custom-model")
            .with_dimension(256)
            .with_base_url("http://localhost:8080/v1")
            .with_timeout(Duration::from_secs(5));

        assert_eq!(provider.dimension(), 256);
        assert_eq!(provider.model, "custom-model");
        assert_eq!(provider.base_url, "http://localhost:8080/v1");
        assert_eq!(provider.timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_defaults() {
        let provider = OpenAiEmbeddings::new("key");
        assert_eq!(provider.dimension(), default_embedding_dimension());
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.name(), "openai");
    }

    #[test]
    fn test_request_serialization() {
        let request = EmbeddingRequest {
            model: "m".to_string(),
            input: vec!["text".to_string()],
            dimensions: Some(128),
            encoding_format: Some("float".to_string()),
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"dimensions\":128"));
        assert!(json.contains("\"encoding_format\":\"float\""));
    }
}
