//! Data types for input records, indexed documents, and query results.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One input row: a post with its comments and any auxiliary columns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    /// Opaque identifier, unique within one index.
    pub id: String,
    /// Post text. Normalized before it is budgeted and embedded.
    pub content: String,
    /// Associated free text (the refined comments); may be empty.
    pub comments: String,
    /// Auxiliary fields carried through to the document (keywords, views, ...).
    pub metadata: BTreeMap<String, String>,
}

impl Record {
    /// Create a record with no auxiliary fields.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        comments: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            comments: comments.into(),
            metadata: BTreeMap::new(),
        }
    }

    /// Attach an auxiliary field.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// An indexed corpus entry with its embedding.
///
/// The embedding is only reachable through [`Document::embedding`], so a
/// document handed out by the index cannot have its vector rewritten.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Document {
    /// Identifier copied from the source record.
    pub id: String,
    /// Normalized text that was embedded.
    pub content: String,
    /// Associated free text.
    pub comments: String,
    /// Auxiliary fields copied from the source record.
    pub metadata: BTreeMap<String, String>,
    /// Number of tokens in `content` under the index tokenizer.
    pub token_count: usize,
    embedding: Vec<f32>,
}

impl Document {
    /// Create a document from a record's parts and its embedding.
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        comments: impl Into<String>,
        token_count: usize,
        embedding: Vec<f32>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            comments: comments.into(),
            metadata: BTreeMap::new(),
            token_count,
            embedding,
        }
    }

    /// Replace the auxiliary fields.
    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    /// The document's embedding vector.
    pub fn embedding(&self) -> &[f32] {
        &self.embedding
    }

    /// Dimensionality of the embedding.
    pub fn dimensions(&self) -> usize {
        self.embedding.len()
    }
}

/// A retrieved [`Document`] paired with its cosine similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// A copy of the matching document.
    pub document: Document,
    /// Cosine similarity in `[-1, 1]` (higher is more similar).
    pub score: f32,
}
