//! Error types for the `forum-rag` crate.

use thiserror::Error;

/// Errors that can occur while building, querying, or feeding an index.
#[derive(Debug, Error)]
pub enum RagError {
    /// An embedding's length disagrees with the dimensionality the index
    /// established on its first insertion.
    #[error("Dimension mismatch: index holds {expected}-dimensional embeddings, got {actual}")]
    DimensionMismatch {
        /// Dimensionality of the index.
        expected: usize,
        /// Dimensionality of the rejected embedding.
        actual: usize,
    },

    /// The embedding provider failed (network, auth, quota, malformed reply).
    #[error("Embedding error ({provider}): {message}")]
    EmbeddingError {
        /// The embedding provider that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// The text-generation collaborator failed.
    #[error("Generation error ({provider}): {message}")]
    GenerationError {
        /// The generator that produced the error.
        provider: String,
        /// A description of the failure.
        message: String,
    },

    /// A query was issued against an index holding no documents.
    #[error("Query against an empty index")]
    EmptyIndex,

    /// A document with the same id is already present in the index.
    #[error("Duplicate document id '{0}'")]
    DuplicateDocument(String),

    /// A document's token count is not below the index's token limit.
    #[error("Document '{id}' has {tokens} tokens, index admits fewer than {max}")]
    TokenBudgetExceeded {
        /// Id of the rejected document.
        id: String,
        /// Its token count.
        tokens: usize,
        /// Exclusive token limit of the index.
        max: usize,
    },

    /// The tokenizer could not be loaded.
    #[error("Tokenizer error: {0}")]
    TokenizerError(String),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading or writing a record file failed.
    #[error("Record error: {0}")]
    RecordError(String),

    /// A structured generation result did not match its schema.
    #[error("Structured output error: {0}")]
    StructuredOutputError(String),
}

impl RagError {
    /// Whether a retry of the failed remote call could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RagError::EmbeddingError { .. } | RagError::GenerationError { .. })
    }
}

impl From<csv::Error> for RagError {
    fn from(err: csv::Error) -> Self {
        RagError::RecordError(err.to_string())
    }
}

impl From<std::io::Error> for RagError {
    fn from(err: std::io::Error) -> Self {
        RagError::RecordError(err.to_string())
    }
}

/// A convenience result type for RAG operations.
pub type Result<T> = std::result::Result<T, RagError>;
