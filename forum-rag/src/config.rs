//! Configuration for the retrieval pipeline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{RagError, Result};
use crate::retry::RetryPolicy;
use crate::throttle::Throttle;
use crate::tokens::MAX_TOKENS;

/// Configuration parameters for the retrieval pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RagConfig {
    /// Exclusive token limit a document must stay under to be embedded.
    pub max_tokens: usize,
    /// Number of results retrieved as grounding context for an answer.
    pub top_k: usize,
    /// Pause after this many remote calls.
    pub throttle_every: usize,
    /// Length of each throttle pause.
    pub throttle_pause: Duration,
    /// Retry policy applied to every remote call.
    pub retry: RetryPolicy,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            max_tokens: MAX_TOKENS,
            top_k: 3,
            throttle_every: 10,
            throttle_pause: Duration::from_secs(1),
            retry: RetryPolicy::default(),
        }
    }
}

impl RagConfig {
    /// Create a new builder for constructing a [`RagConfig`].
    pub fn builder() -> RagConfigBuilder {
        RagConfigBuilder::default()
    }

    /// A fresh throttle for one sequential loop of remote calls.
    pub fn throttle(&self) -> Throttle {
        Throttle::new(self.throttle_every, self.throttle_pause)
    }
}

/// Builder for constructing a validated [`RagConfig`].
#[derive(Debug, Clone, Default)]
pub struct RagConfigBuilder {
    config: RagConfig,
}

impl RagConfigBuilder {
    /// Set the exclusive token limit for admitted documents.
    pub fn max_tokens(mut self, max_tokens: usize) -> Self {
        self.config.max_tokens = max_tokens;
        self
    }

    /// Set the number of results used as grounding context.
    pub fn top_k(mut self, k: usize) -> Self {
        self.config.top_k = k;
        self
    }

    /// Pause for `pause` after every `every` remote calls.
    pub fn throttle(mut self, every: usize, pause: Duration) -> Self {
        self.config.throttle_every = every;
        self.config.throttle_pause = pause;
        self
    }

    /// Set the retry policy for remote calls.
    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Build the [`RagConfig`], validating that parameters are consistent.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if:
    /// - `max_tokens == 0`
    /// - `top_k == 0`
    /// - `throttle_every == 0`
    /// - `retry.max_attempts == 0`
    pub fn build(self) -> Result<RagConfig> {
        if self.config.max_tokens == 0 {
            return Err(RagError::ConfigError("max_tokens must be greater than zero".to_string()));
        }
        if self.config.top_k == 0 {
            return Err(RagError::ConfigError("top_k must be greater than zero".to_string()));
        }
        if self.config.throttle_every == 0 {
            return Err(RagError::ConfigError(
                "throttle_every must be greater than zero".to_string(),
            ));
        }
        if self.config.retry.max_attempts == 0 {
            return Err(RagError::ConfigError(
                "retry.max_attempts must be greater than zero".to_string(),
            ));
        }
        Ok(self.config)
    }
}
