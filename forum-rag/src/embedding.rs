//! Embedding provider trait for generating vector embeddings from text.

use async_trait::async_trait;

use crate::error::Result;

/// A provider that maps text to a fixed-length embedding vector.
///
/// Implementations wrap a remote embedding model behind a unified async
/// interface. Calls may be slow, rate limited, or fail; callers wrap them in
/// a [`RetryPolicy`](crate::RetryPolicy) and pace them with a
/// [`Throttle`](crate::Throttle).
///
/// # Example
///
/// ```rust,ignore
/// use forum_rag::EmbeddingProvider;
///
/// let provider = MyEmbeddingProvider::new();
/// let embedding = provider.embed("알바 연락 문제").await?;
/// ```
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding vector for a single text input.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Short provider name used in logs and error messages.
    fn name(&self) -> &str;
}
