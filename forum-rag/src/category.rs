//! Topic categories derived from the keyword vocabulary, and per-post
//! classification into them.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::RagConfig;
use crate::document::Record;
use crate::error::{RagError, Result};
use crate::generation::{FunctionSpec, GenerationRequest, TextGenerator, parse_structured};

/// Number of categories requested by default.
pub const DEFAULT_CATEGORY_COUNT: usize = 10;

/// Metadata key holding a record's `;`-separated keywords.
pub const KEYWORDS_KEY: &str = "keywords";
/// Metadata key for the primary category assigned by classification.
pub const PRIMARY_CATEGORY_KEY: &str = "primary_category";
/// Metadata key for the secondary category assigned by classification.
pub const SECONDARY_CATEGORY_KEY: &str = "secondary_category";

const CLASSIFIER_PERSONA: &str = "당신은 데이터 분류 전문가입니다.";
const CATEGORY_TEMPERATURE: f32 = 0.7;
const CLASSIFY_TEMPERATURE: f32 = 0.3;

/// One topical category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    /// Category name.
    pub name: String,
    /// What the category covers.
    pub description: String,
    /// Vocabulary keywords the category groups.
    pub related_keywords: Vec<String>,
}

/// The category set, persisted as JSON between the generation and
/// classification stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategorySet {
    /// The categories.
    pub categories: Vec<Category>,
}

impl CategorySet {
    /// Whether a category with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.categories.iter().any(|c| c.name == name)
    }

    /// Load a category set from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::RecordError`] if the file cannot be read or parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| RagError::RecordError(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&text).map_err(|e| {
            RagError::RecordError(format!("invalid category file {}: {e}", path.display()))
        })
    }

    /// Save the category set as pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::RecordError`] if the file cannot be written.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| RagError::RecordError(format!("failed to encode categories: {e}")))?;
        std::fs::write(path, text).map_err(|e| {
            RagError::RecordError(format!("failed to write {}: {e}", path.display()))
        })?;
        info!(path = %path.display(), count = self.categories.len(), "saved categories");
        Ok(())
    }
}

/// A post's assigned categories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Best-fitting category.
    pub primary_category: String,
    /// Second-best category.
    pub secondary_category: String,
}

/// Split a `;`-separated keyword cell into trimmed, non-empty keywords.
pub fn split_keywords(cell: &str) -> Vec<String> {
    cell.split(';').map(str::trim).filter(|k| !k.is_empty()).map(str::to_string).collect()
}

/// The de-duplicated, sorted keyword vocabulary of all records.
pub fn keyword_vocabulary(records: &[Record]) -> Vec<String> {
    let vocabulary: BTreeSet<String> = records
        .iter()
        .filter_map(|r| r.metadata.get(KEYWORDS_KEY))
        .flat_map(|cell| split_keywords(cell))
        .collect();
    vocabulary.into_iter().collect()
}

/// The `create_categories` function schema.
pub fn create_categories_function() -> FunctionSpec {
    FunctionSpec::new(
        "create_categories",
        "키워드 리스트를 분석하여 상위 카테고리 생성",
        json!({
            "type": "object",
            "properties": {
                "categories": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "name": { "type": "string", "description": "카테고리 이름" },
                            "description": { "type": "string", "description": "카테고리 설명" },
                            "related_keywords": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "관련 키워드 목록"
                            }
                        },
                        "required": ["name", "description", "related_keywords"]
                    }
                }
            },
            "required": ["categories"]
        }),
    )
}

/// The `classify_post` function schema.
pub fn classify_post_function() -> FunctionSpec {
    FunctionSpec::new(
        "classify_post",
        "게시글의 키워드를 기반으로 적절한 카테고리 분류",
        json!({
            "type": "object",
            "properties": {
                "primary_category": { "type": "string", "description": "주요 카테고리" },
                "secondary_category": { "type": "string", "description": "부가 카테고리" }
            },
            "required": ["primary_category", "secondary_category"]
        }),
    )
}

/// Ask the generator to group the vocabulary into `count` categories.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] for an empty vocabulary or zero count,
/// [`RagError::GenerationError`] if the call fails after retries, and
/// [`RagError::StructuredOutputError`] if the result does not match the
/// schema or holds no categories.
pub async fn generate_categories(
    vocabulary: &[String],
    count: usize,
    generator: &dyn TextGenerator,
    config: &RagConfig,
) -> Result<CategorySet> {
    if vocabulary.is_empty() {
        return Err(RagError::ConfigError("keyword vocabulary is empty".to_string()));
    }
    if count == 0 {
        return Err(RagError::ConfigError("category count must be greater than zero".to_string()));
    }

    let keywords = serde_json::to_string(vocabulary)
        .map_err(|e| RagError::ConfigError(format!("failed to encode vocabulary: {e}")))?;
    let prompt = format!(
        "다음 키워드 목록을 분석하여 {count}개의 대표적인 카테고리를 생성해주세요:\n{keywords}\n\n\
         각 카테고리는 다음 기준을 따라야 합니다:\n\
         1. 포괄적이면서도 구체적인 주제를 나타내야 함\n\
         2. 중복되지 않아야 함\n\
         3. 명확한 구분이 가능해야 함\n\
         4. 관련 키워드들을 포함할 수 있어야 함\n"
    );
    let request =
        GenerationRequest::new(CLASSIFIER_PERSONA, prompt).with_temperature(CATEGORY_TEMPERATURE);
    let function = create_categories_function();

    let value = config
        .retry
        .run("create_categories", || generator.generate_structured(&request, &function))
        .await
        .map_err(|e| {
            error!(error = %e, "category generation failed");
            e
        })?;
    let set: CategorySet = parse_structured(&function.name, value)?;
    if set.categories.is_empty() {
        return Err(RagError::StructuredOutputError(
            "'create_categories' returned no categories".to_string(),
        ));
    }
    if set.categories.len() != count {
        warn!(requested = count, returned = set.categories.len(), "category count differs");
    }

    info!(vocabulary = vocabulary.len(), categories = set.categories.len(), "generated categories");
    Ok(set)
}

/// Ask the generator for the primary and secondary category of one post.
///
/// # Errors
///
/// Returns [`RagError::GenerationError`] if the call fails after retries, or
/// [`RagError::StructuredOutputError`] if the result does not match the schema.
pub async fn classify_post(
    keywords: &[String],
    categories: &CategorySet,
    generator: &dyn TextGenerator,
    config: &RagConfig,
) -> Result<Classification> {
    let categories_info = serde_json::to_string(&categories.categories)
        .map_err(|e| RagError::ConfigError(format!("failed to encode categories: {e}")))?;
    let prompt = format!(
        "다음 키워드를 가진 게시글을 주어진 카테고리 중에서 분류해주세요.\n\n\
         키워드: {}\n\n\
         가능한 카테고리:\n{categories_info}\n\n\
         가장 적합한 주요 카테고리 1개와 부가 카테고리 1개를 선택해주세요.\n",
        keywords.join(", ")
    );
    let request =
        GenerationRequest::new(CLASSIFIER_PERSONA, prompt).with_temperature(CLASSIFY_TEMPERATURE);
    let function = classify_post_function();

    let value = config
        .retry
        .run("classify_post", || generator.generate_structured(&request, &function))
        .await?;
    let classification: Classification = parse_structured(&function.name, value)?;

    for name in [&classification.primary_category, &classification.secondary_category] {
        if !categories.contains(name) {
            warn!(category = %name, "model chose a category outside the set");
        }
    }
    Ok(classification)
}

/// Classifies records one by one, paced by the configured throttle.
pub struct Classifier {
    generator: Arc<dyn TextGenerator>,
    config: RagConfig,
}

impl Classifier {
    /// Create a classifier.
    pub fn new(generator: Arc<dyn TextGenerator>, config: RagConfig) -> Self {
        Self { generator, config }
    }

    /// Classify every record in place, writing the
    /// [`PRIMARY_CATEGORY_KEY`] and [`SECONDARY_CATEGORY_KEY`] metadata.
    ///
    /// A record whose classification fails is logged and left with empty
    /// categories. Returns the number of records classified.
    pub async fn classify_all(&self, records: &mut [Record], categories: &CategorySet) -> usize {
        let mut throttle = self.config.throttle();
        let mut classified = 0;
        let total = records.len();

        for (position, record) in records.iter_mut().enumerate() {
            info!(row = position + 1, total, record.id = %record.id, "classifying record");
            let keywords = record
                .metadata
                .get(KEYWORDS_KEY)
                .map(|cell| split_keywords(cell))
                .unwrap_or_default();

            let (primary, secondary) =
                match classify_post(&keywords, categories, self.generator.as_ref(), &self.config)
                    .await
                {
                    Ok(c) => {
                        classified += 1;
                        (c.primary_category, c.secondary_category)
                    }
                    Err(e) => {
                        error!(record.id = %record.id, error = %e, "classification failed");
                        (String::new(), String::new())
                    }
                };
            throttle.tick().await;

            record.metadata.insert(PRIMARY_CATEGORY_KEY.to_string(), primary);
            record.metadata.insert(SECONDARY_CATEGORY_KEY.to_string(), secondary);
        }

        info!(total, classified, "classification finished");
        classified
    }
}
