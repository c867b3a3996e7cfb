//! In-memory similarity index using exact cosine similarity.
//!
//! [`SimilarityIndex`] holds documents in insertion order and answers top-K
//! queries by a linear scan. Corpora here are hundreds to low thousands of
//! posts, and ranking checks depend on exact scores, so there is no
//! approximate structure.

use std::collections::HashSet;

use crate::document::{Document, QueryResult};
use crate::error::{RagError, Result};
use crate::tokens::MAX_TOKENS;

/// An ordered collection of documents sharing one embedding dimensionality.
///
/// The dimensionality is fixed by the first inserted document, and every
/// document's token count stays below the index's token limit
/// ([`MAX_TOKENS`] unless set with [`SimilarityIndex::with_max_tokens`]).
/// Documents are never handed out mutably; queries return copies.
///
/// # Example
///
/// ```rust
/// use forum_rag::{Document, SimilarityIndex};
///
/// let mut index = SimilarityIndex::new();
/// index.insert(Document::new("1", "부스 판매 경험담", "", 5, vec![1.0, 0.0]))?;
/// index.insert(Document::new("2", "알바 연락 문제", "", 4, vec![0.0, 1.0]))?;
///
/// let results = index.search(&[0.1, 0.9], 1)?;
/// assert_eq!(results[0].document.id, "2");
/// # Ok::<(), forum_rag::RagError>(())
/// ```
#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    documents: Vec<Document>,
    ids: HashSet<String>,
    dimensions: Option<usize>,
    max_tokens: usize,
}

impl Default for SimilarityIndex {
    fn default() -> Self {
        Self::with_max_tokens(MAX_TOKENS)
    }
}

impl SimilarityIndex {
    /// Create a new empty index admitting documents under [`MAX_TOKENS`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new empty index admitting documents with fewer than
    /// `max_tokens` tokens.
    pub fn with_max_tokens(max_tokens: usize) -> Self {
        Self { documents: Vec::new(), ids: HashSet::new(), dimensions: None, max_tokens }
    }

    /// Rebuild an index from previously serialized documents, revalidating
    /// token counts against [`MAX_TOKENS`], dimensionality and id uniqueness.
    ///
    /// # Errors
    ///
    /// Returns the [`insert`](Self::insert) error of the first offending
    /// document.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Result<Self> {
        Self::from_documents_with_max_tokens(documents, MAX_TOKENS)
    }

    /// Like [`from_documents`](Self::from_documents) with an explicit token limit.
    ///
    /// # Errors
    ///
    /// Returns the [`insert`](Self::insert) error of the first offending
    /// document.
    pub fn from_documents_with_max_tokens(
        documents: impl IntoIterator<Item = Document>,
        max_tokens: usize,
    ) -> Result<Self> {
        let mut index = Self::with_max_tokens(max_tokens);
        for document in documents {
            index.insert(document)?;
        }
        Ok(index)
    }

    /// Append a document.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::TokenBudgetExceeded`] if the token count is not
    /// below the index's limit, [`RagError::DimensionMismatch`] if the
    /// embedding length differs from the index dimensionality, or
    /// [`RagError::DuplicateDocument`] if the id is already present.
    pub fn insert(&mut self, document: Document) -> Result<()> {
        if document.token_count >= self.max_tokens {
            return Err(RagError::TokenBudgetExceeded {
                id: document.id,
                tokens: document.token_count,
                max: self.max_tokens,
            });
        }
        let actual = document.dimensions();
        match self.dimensions {
            Some(expected) if expected != actual => {
                return Err(RagError::DimensionMismatch { expected, actual });
            }
            _ => {}
        }
        if self.ids.contains(&document.id) {
            return Err(RagError::DuplicateDocument(document.id));
        }
        self.dimensions = Some(actual);
        self.ids.insert(document.id.clone());
        self.documents.push(document);
        Ok(())
    }

    /// Number of documents in the index.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the index holds no documents.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Exclusive token limit for documents.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Embedding dimensionality, once established.
    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    /// Documents in insertion order.
    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// Return the `top_k` documents most similar to `embedding`.
    ///
    /// Results are sorted by descending cosine similarity; equal scores keep
    /// insertion order. Fewer than `top_k` documents yields all of them.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if `top_k` is zero,
    /// [`RagError::EmptyIndex`] if the index holds no documents, and
    /// [`RagError::DimensionMismatch`] if the query embedding has the wrong
    /// length.
    pub fn search(&self, embedding: &[f32], top_k: usize) -> Result<Vec<QueryResult>> {
        if top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        let Some(expected) = self.dimensions else {
            return Err(RagError::EmptyIndex);
        };
        if embedding.len() != expected {
            return Err(RagError::DimensionMismatch { expected, actual: embedding.len() });
        }

        let mut scored: Vec<QueryResult> = self
            .documents
            .iter()
            .map(|document| QueryResult {
                document: document.clone(),
                score: cosine_similarity(document.embedding(), embedding),
            })
            .collect();

        // `sort_by` is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}

/// Compute cosine similarity between two vectors.
///
/// Sums run in `f64` so large components do not overflow. Returns 0.0 if
/// either vector has zero magnitude.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (&x, &y) in a.iter().zip(b) {
        let (x, y) = (f64::from(x), f64::from(y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, embedding: Vec<f32>) -> Document {
        Document::new(id, format!("content {id}"), "", 2, embedding)
    }

    #[test]
    fn first_insert_fixes_dimensions() {
        let mut index = SimilarityIndex::new();
        assert_eq!(index.dimensions(), None);
        index.insert(doc("a", vec![0.0; 1536])).unwrap();
        assert_eq!(index.dimensions(), Some(1536));

        let err = index.insert(doc("b", vec![0.0; 1024])).unwrap_err();
        assert!(matches!(err, RagError::DimensionMismatch { expected: 1536, actual: 1024 }));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn documents_at_or_over_the_token_limit_are_rejected() {
        let mut index = SimilarityIndex::new();
        let over = Document::new("big", "x", "", 9000, vec![1.0, 0.0]);
        let err = index.insert(over).unwrap_err();
        assert!(matches!(
            err,
            RagError::TokenBudgetExceeded { ref id, tokens: 9000, max: 8192 } if id == "big"
        ));

        let at_limit = Document::new("edge", "x", "", 8192, vec![1.0, 0.0]);
        assert!(index.insert(at_limit).is_err());
        index.insert(Document::new("ok", "x", "", 8191, vec![1.0, 0.0])).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn from_documents_checks_the_token_limit() {
        let big = || Document::new("big", "x", "", 9000, vec![1.0, 0.0]);
        assert!(matches!(
            SimilarityIndex::from_documents([big()]),
            Err(RagError::TokenBudgetExceeded { .. })
        ));

        let index = SimilarityIndex::from_documents_with_max_tokens([big()], 10_000).unwrap();
        assert_eq!(index.max_tokens(), 10_000);
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut index = SimilarityIndex::new();
        index.insert(doc("a", vec![1.0, 0.0])).unwrap();
        let err = index.insert(doc("a", vec![0.0, 1.0])).unwrap_err();
        assert!(matches!(err, RagError::DuplicateDocument(id) if id == "a"));
    }

    #[test]
    fn empty_index_query_fails() {
        let index = SimilarityIndex::new();
        assert!(matches!(index.search(&[1.0, 0.0], 3), Err(RagError::EmptyIndex)));
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let index = SimilarityIndex::from_documents([doc("a", vec![1.0])]).unwrap();
        assert!(matches!(index.search(&[1.0], 0), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn query_with_wrong_dimensions_fails() {
        let index = SimilarityIndex::from_documents([doc("a", vec![1.0, 0.0])]).unwrap();
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch { expected: 2, actual: 3 })
        ));
    }

    #[test]
    fn ties_keep_insertion_order() {
        let index = SimilarityIndex::from_documents([
            doc("first", vec![1.0, 0.0]),
            doc("second", vec![2.0, 0.0]),
            doc("third", vec![0.0, 1.0]),
            doc("fourth", vec![3.0, 0.0]),
        ])
        .unwrap();

        let ids: Vec<_> = index
            .search(&[1.0, 0.0], 4)
            .unwrap()
            .into_iter()
            .map(|r| r.document.id)
            .collect();
        assert_eq!(ids, ["first", "second", "fourth", "third"]);
    }

    #[test]
    fn returns_everything_when_top_k_exceeds_len() {
        let index =
            SimilarityIndex::from_documents([doc("a", vec![1.0, 0.0]), doc("b", vec![0.0, 1.0])])
                .unwrap();
        assert_eq!(index.search(&[1.0, 1.0], 10).unwrap().len(), 2);
    }

    #[test]
    fn zero_vectors_score_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[0.0, 0.0]), 0.0);
    }

    #[test]
    fn large_components_keep_exact_direction() {
        let score = cosine_similarity(&[3e19, 3e19], &[1.0, 1.0]);
        assert!((score - 1.0).abs() < 1e-6, "score was {score}");

        let index = SimilarityIndex::from_documents([
            doc("axis", vec![1.0, 0.0]),
            doc("huge", vec![3e19, 3e19]),
        ])
        .unwrap();
        let results = index.search(&[1.0, 1.0], 2).unwrap();
        assert_eq!(results[0].document.id, "huge");
    }

    #[test]
    fn opposite_vectors_score_minus_one() {
        let score = cosine_similarity(&[1.0, 2.0], &[-1.0, -2.0]);
        assert!((score + 1.0).abs() < 1e-6);
    }
}
