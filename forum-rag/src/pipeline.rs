//! Retrieval pipeline orchestrator.
//!
//! The [`RagPipeline`] holds the configuration and the remote collaborators
//! (embedding provider, text generator, token counter) that used to live in
//! process-wide client state. Build it once and pass it by reference.
//!
//! # Example
//!
//! ```rust,ignore
//! use forum_rag::{RagPipeline, RagConfig, TiktokenCounter};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .text_generator(Arc::new(generator))
//!     .token_counter(Arc::new(TiktokenCounter::cl100k()?))
//!     .build()?;
//!
//! let index = pipeline.build_index(&records).await?;
//! let answer = pipeline.answer(&index, "알바를 구했는데 연락이 오지 않아요").await?;
//! ```

use std::sync::Arc;

use tracing::{error, info, warn};

use crate::answer;
use crate::config::RagConfig;
use crate::document::{Document, QueryResult, Record};
use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::TextGenerator;
use crate::index::SimilarityIndex;
use crate::normalize::normalize_text;
use crate::tokens::{TiktokenCounter, TokenBudget, TokenCounter};

/// The retrieval pipeline orchestrator.
///
/// Index construction runs normalize → budget → embed → insert, one record at
/// a time; queries run normalize → embed → linear scan. Construct one via
/// [`RagPipeline::builder()`].
pub struct RagPipeline {
    config: RagConfig,
    embedding_provider: Arc<dyn EmbeddingProvider>,
    text_generator: Option<Arc<dyn TextGenerator>>,
    budget: TokenBudget,
}

impl RagPipeline {
    /// Create a new [`RagPipelineBuilder`].
    pub fn builder() -> RagPipelineBuilder {
        RagPipelineBuilder::default()
    }

    /// Return a reference to the pipeline configuration.
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Return the token budget used to admit documents.
    pub fn budget(&self) -> &TokenBudget {
        &self.budget
    }

    /// Build an index from `records`.
    ///
    /// Each record's content is normalized; records whose normalized content
    /// is empty or over the token budget are skipped and logged. Embedding
    /// calls are made sequentially, retried per [`RagConfig::retry`], and
    /// paced by the configured throttle.
    ///
    /// Either a complete index is returned or nothing is: a failure discards
    /// the partially built index.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if an embedding call fails after
    /// retries, and [`RagError::DimensionMismatch`] or
    /// [`RagError::DuplicateDocument`] if a document cannot be inserted.
    pub async fn build_index(&self, records: &[Record]) -> Result<SimilarityIndex> {
        let mut index = SimilarityIndex::with_max_tokens(self.budget.max_tokens());
        let mut throttle = self.config.throttle();
        let mut skipped = 0usize;

        for record in records {
            let content = normalize_text(&record.content);
            if content.is_empty() {
                warn!(record.id = %record.id, "skipping record with empty content");
                skipped += 1;
                continue;
            }
            let Some(token_count) = self.budget.measure(&content) else {
                warn!(
                    record.id = %record.id,
                    max_tokens = self.budget.max_tokens(),
                    "skipping record over the token budget"
                );
                skipped += 1;
                continue;
            };

            let embedding = self.embed(&content).await.map_err(|e| {
                error!(record.id = %record.id, error = %e, "embedding failed during index build");
                e
            })?;
            throttle.tick().await;

            let document = Document::new(
                record.id.clone(),
                content,
                record.comments.clone(),
                token_count,
                embedding,
            )
            .with_metadata(record.metadata.clone());
            index.insert(document)?;
        }

        info!(
            provider = self.embedding_provider.name(),
            indexed = index.len(),
            skipped,
            dimensions = index.dimensions().unwrap_or(0),
            "built similarity index"
        );
        Ok(index)
    }

    /// Return the `top_k` documents most similar to `text`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmptyIndex`] for an empty index (before any remote
    /// call is made) and [`RagError::EmbeddingError`] if embedding the query
    /// fails after retries.
    pub async fn query(
        &self,
        index: &SimilarityIndex,
        text: &str,
        top_k: usize,
    ) -> Result<Vec<QueryResult>> {
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if index.is_empty() {
            return Err(RagError::EmptyIndex);
        }

        let query = normalize_text(text);
        let embedding = self.embed(&query).await.map_err(|e| {
            error!(error = %e, "embedding failed during query");
            e
        })?;
        let results = index.search(&embedding, top_k)?;

        info!(
            result_count = results.len(),
            top_score = results.first().map(|r| r.score),
            "query completed"
        );
        Ok(results)
    }

    /// Retrieve `config.top_k` results for `question` and generate a grounded
    /// answer from them.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if no text generator is configured,
    /// any [`query`](Self::query) error, or [`RagError::GenerationError`] if
    /// the generator fails after retries.
    pub async fn answer(&self, index: &SimilarityIndex, question: &str) -> Result<String> {
        let results = self.query(index, question, self.config.top_k).await?;
        let context = answer::assemble_context(&results);
        self.generate_answer(question, &context).await
    }

    /// Generate an answer to `query` from an already assembled grounding context.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if no text generator is configured, or
    /// [`RagError::GenerationError`] if the generator fails after retries.
    pub async fn generate_answer(&self, query: &str, context: &str) -> Result<String> {
        let generator = self.text_generator()?;
        self.config
            .retry
            .run("generate_answer", || answer::generate_answer(query, context, generator.as_ref()))
            .await
    }

    /// The configured text generator.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if none was configured.
    pub fn text_generator(&self) -> Result<&Arc<dyn TextGenerator>> {
        self.text_generator
            .as_ref()
            .ok_or_else(|| RagError::ConfigError("text_generator is required".to_string()))
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.config.retry.run("embed", || self.embedding_provider.embed(text)).await
    }
}

/// Builder for constructing a [`RagPipeline`].
///
/// `embedding_provider` is required. `config` defaults to
/// [`RagConfig::default`], `token_counter` to the `cl100k_base` tokenizer, and
/// `text_generator` is only needed for answers.
#[derive(Default)]
pub struct RagPipelineBuilder {
    config: Option<RagConfig>,
    embedding_provider: Option<Arc<dyn EmbeddingProvider>>,
    text_generator: Option<Arc<dyn TextGenerator>>,
    token_counter: Option<Arc<dyn TokenCounter>>,
}

impl RagPipelineBuilder {
    /// Set the pipeline configuration.
    pub fn config(mut self, config: RagConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set the embedding provider.
    pub fn embedding_provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedding_provider = Some(provider);
        self
    }

    /// Set the text generator used for answers.
    pub fn text_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.text_generator = Some(generator);
        self
    }

    /// Set the token counter used by the admission budget.
    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.token_counter = Some(counter);
        self
    }

    /// Build the [`RagPipeline`].
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the embedding provider is missing,
    /// or [`RagError::TokenizerError`] if the default tokenizer cannot load.
    pub fn build(self) -> Result<RagPipeline> {
        let config = self.config.unwrap_or_default();
        let embedding_provider = self
            .embedding_provider
            .ok_or_else(|| RagError::ConfigError("embedding_provider is required".to_string()))?;
        let counter: Arc<dyn TokenCounter> = match self.token_counter {
            Some(counter) => counter,
            None => Arc::new(TiktokenCounter::cl100k()?),
        };
        let budget = TokenBudget::new(counter, config.max_tokens);

        Ok(RagPipeline { config, embedding_provider, text_generator: self.text_generator, budget })
    }
}
