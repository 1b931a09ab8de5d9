//! Embedding providers.
//!
//! The retriever treats an absent provider identically to a failed call:
//! the vector side of a query is simply empty. During indexing, provider
//! failures degrade to deterministic mock embeddings so a provider outage
//! never stalls the pipeline; repeated failures put the provider on a
//! cool-down during which queries skip the vector side entirely.

pub mod openai;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use async_trait::async_trait;
use sha2::Digest;
use sha2::Sha256;

use crate::config::EmbeddingConfig;
use crate::error::Result;

pub use openai::OpenAiEmbeddings;

/// Consecutive failures before the provider is put on cool-down.
const FAILURES_BEFORE_COOLDOWN: u32 = 3;
/// Cool-down duration after consistent failures.
const COOLDOWN: Duration = Duration::from_secs(60);

/// An embedding provider.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider name for logging.
    fn name(&self) -> &str;

    /// Embedding dimension.
    fn dimension(&self) -> i32;

    /// Embed a single text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of texts, preserving order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic hash-derived embeddings.
///
/// Not semantically meaningful, but stable across runs, which keeps
/// indexing and tests reproducible when no real provider is reachable.
#[derive(Debug, Clone)]
pub struct MockEmbeddings {
    dimension: i32,
}

impl MockEmbeddings {
    /// Create a mock provider with the given dimension.
    pub fn new(dimension: i32) -> Self {
        Self { dimension }
    }

    fn embed_sync(&self, text: &str) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let dim = self.dimension.max(1) as usize;
        let mut values: Vec<f32> = (0..dim)
            .map(|i| {
                let byte = digest[i % digest.len()];
                let mixed = byte.wrapping_add((i / digest.len()) as u8);
                (mixed as f32 / 255.0) * 2.0 - 1.0
            })
            .collect();
        let norm: f32 = values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut values {
                *v /= norm;
            }
        }
        values
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddings {
    fn name(&self) -> &str {
        "mock"
    }

    fn dimension(&self) -> i32 {
        self.dimension
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.embed_sync(text))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_sync(t)).collect())
    }
}

/// Provider wrapper with mock fallback and failure cool-down.
pub struct FallbackEmbeddings {
    inner: Arc<dyn EmbeddingProvider>,
    mock: MockEmbeddings,
    consecutive_failures: AtomicU32,
    cooldown_until: Mutex<Option<Instant>>,
}

impl FallbackEmbeddings {
    /// Wrap a provider.
    pub fn new(inner: Arc<dyn EmbeddingProvider>) -> Self {
        let mock = MockEmbeddings::new(inner.dimension());
        Self {
            inner,
            mock,
            consecutive_failures: AtomicU32::new(0),
            cooldown_until: Mutex::new(None),
        }
    }

    /// False while the provider is cooling down after repeated failures.
    /// Queries should skip the vector side when unhealthy.
    pub fn healthy(&self) -> bool {
        let mut guard = self
            .cooldown_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        match *guard {
            Some(until) if Instant::now() < until => false,
            Some(_) => {
                *guard = None;
                true
            }
            None => true,
        }
    }

    fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        if failures >= FAILURES_BEFORE_COOLDOWN {
            let mut guard = self
                .cooldown_until
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Some(Instant::now() + COOLDOWN);
            tracing::warn!(
                provider = self.inner.name(),
                failures,
                "embedding provider on cool-down"
            );
        }
    }

    fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl EmbeddingProvider for FallbackEmbeddings {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn dimension(&self) -> i32 {
        self.inner.dimension()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if !self.healthy() {
            return self.mock.embed(text).await;
        }
        match self.inner.embed(text).await {
            Ok(embedding) => {
                self.record_success();
                Ok(embedding)
            }
            Err(e) => {
                tracing::warn!(error = %e, "embedding failed, using mock");
                self.record_failure();
                self.mock.embed(text).await
            }
        }
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if !self.healthy() {
            return self.mock.embed_batch(texts).await;
        }
        match self.inner.embed_batch(texts).await {
            Ok(embeddings) => {
                self.record_success();
                Ok(embeddings)
            }
            Err(e) => {
                tracing::warn!(error = %e, "batch embedding failed, using mock");
                self.record_failure();
                self.mock.embed_batch(texts).await
            }
        }
    }
}

/// Build the provider stack from configuration, if one is configured.
pub fn provider_from_config(
    config: Option<&EmbeddingConfig>,
    timeout: Duration,
) -> Option<Arc<FallbackEmbeddings>> {
    let config = config?;
    let inner = OpenAiEmbeddings::new(&config.api_key)
        .with_base_url(&config.base_url)
        .with_model(&config.model)
        .with_dimension(config.dimensions)
        .with_timeout(timeout);
    Some(Arc::new(FallbackEmbeddings::new(Arc::new(inner))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoderagErr;

    #[tokio::test]
    async fn test_mock_is_deterministic_and_normalized() {
        let mock = MockEmbeddings::new(64);
        let a = mock.embed("fn main() {}").await.unwrap();
        let b = mock.embed("fn main() {}").await.unwrap();
        let c = mock.embed("other text").await.unwrap();

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);

        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    struct FailingProvider;

    #[async_trait]
    impl EmbeddingProvider for FailingProvider {
        fn name(&self) -> &str {
            "failing"
        }
        fn dimension(&self) -> i32 {
            8
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(CoderagErr::EmbeddingFailed {
                cause: "down".to_string(),
            })
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(CoderagErr::EmbeddingFailed {
                cause: "down".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_fallback_degrades_to_mock() {
        let provider = FallbackEmbeddings::new(Arc::new(FailingProvider));

        // The call still succeeds via the mock.
        let embedding = provider.embed("text").await.unwrap();
        assert_eq!(embedding.len(), 8);
        assert!(provider.healthy());

        // Consistent failures trip the cool-down.
        let _ = provider.embed("text").await.unwrap();
        let _ = provider.embed("text").await.unwrap();
        assert!(!provider.healthy());

        // Calls during cool-down keep succeeding via the mock.
        let during = provider.embed("text").await.unwrap();
        assert_eq!(during.len(), 8);
    }
}
