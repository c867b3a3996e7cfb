//! # forum-rag
//!
//! Semantic search and grounded answering over refined forum posts.
//!
//! ## Overview
//!
//! Posts are refined by an LLM into records (rewritten content, condensed
//! comments, keywords), optionally grouped into generated categories, and
//! then embedded into an in-memory [`SimilarityIndex`]. Queries are embedded
//! the same way and ranked by exact cosine similarity; the top results become
//! the grounding context for a generated answer.
//!
//! Remote services sit behind two traits:
//!
//! - [`EmbeddingProvider`] turns text into a vector
//! - [`TextGenerator`] produces free text or function-call arguments
//!
//! With the `openai` feature, [`openai`] provides both for the OpenAI and
//! Azure OpenAI APIs.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use forum_rag::{RagConfig, RagPipeline, records};
//!
//! let pipeline = RagPipeline::builder()
//!     .config(RagConfig::default())
//!     .embedding_provider(Arc::new(embedder))
//!     .text_generator(Arc::new(generator))
//!     .build()?;
//!
//! let records = records::read_records("refined.csv")?;
//! let index = pipeline.build_index(&records).await?;
//! let answer = pipeline.answer(&index, "알바를 구했는데 연락이 오지 않아요").await?;
//! ```
//!
//! ## Features
//!
//! - `openai`: OpenAI / Azure OpenAI embedding provider and chat generator

pub mod answer;
pub mod category;
pub mod config;
pub mod document;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod normalize;
pub mod pipeline;
pub mod records;
pub mod refine;
pub mod retry;
pub mod throttle;
pub mod tokens;

#[cfg(feature = "openai")]
pub mod openai;

pub use answer::{assemble_context, generate_answer};
pub use category::{Category, CategorySet, Classification, Classifier};
pub use config::{RagConfig, RagConfigBuilder};
pub use document::{Document, QueryResult, Record};
pub use embedding::EmbeddingProvider;
pub use error::{RagError, Result};
pub use generation::{FunctionSpec, GenerationRequest, TextGenerator};
pub use index::{SimilarityIndex, cosine_similarity};
pub use normalize::normalize_text;
pub use pipeline::{RagPipeline, RagPipelineBuilder};
pub use records::RawPost;
pub use refine::{Comments, PostRefiner, RefinedPost, Tendency};
pub use retry::RetryPolicy;
pub use throttle::Throttle;
pub use tokens::{MAX_TOKENS, TiktokenCounter, TokenBudget, TokenCounter};

#[cfg(feature = "openai")]
pub use openai::{OpenAIChatGenerator, OpenAIConfig, OpenAIEmbeddingProvider};
