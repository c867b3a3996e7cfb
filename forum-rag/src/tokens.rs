//! Token counting and the admission budget for embedding.
//!
//! Embedding models reject inputs longer than their context window, so
//! documents whose token count reaches the budget are dropped before they are
//! embedded. This is a hard filter, not a truncation.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;

use crate::error::{RagError, Result};

/// Token limit of the embedding model's context window.
pub const MAX_TOKENS: usize = 8192;

/// Counts tokens in text under a fixed tokenizer.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;
}

/// Token counter wrapping tiktoken's `cl100k_base` BPE, the vocabulary of the
/// OpenAI embedding models.
#[derive(Clone)]
pub struct TiktokenCounter {
    bpe: Arc<CoreBPE>,
}

impl TiktokenCounter {
    /// Load the `cl100k_base` tokenizer.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::TokenizerError`] if the BPE ranks cannot be loaded.
    pub fn cl100k() -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base()
            .map_err(|e| RagError::TokenizerError(format!("failed to load cl100k_base: {e}")))?;
        Ok(Self { bpe: Arc::new(bpe) })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter").field("encoding", &"cl100k_base").finish()
    }
}

/// Admission predicate: a text is admitted iff its token count is strictly
/// below `max_tokens`.
pub struct TokenBudget {
    counter: Arc<dyn TokenCounter>,
    max_tokens: usize,
}

impl TokenBudget {
    /// Create a budget over the given counter.
    pub fn new(counter: Arc<dyn TokenCounter>, max_tokens: usize) -> Self {
        Self { counter, max_tokens }
    }

    /// The exclusive token limit.
    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Count the tokens of `content` and return the count if it is admitted.
    pub fn measure(&self, content: &str) -> Option<usize> {
        let count = self.counter.count(content);
        (count < self.max_tokens).then_some(count)
    }

    /// Whether `content` fits the budget.
    pub fn admits(&self, content: &str) -> bool {
        self.measure(content).is_some()
    }
}
