//! LLM refinement of raw scraped posts.
//!
//! Raw posts are sent in numbered batches; the model rewrites each post,
//! condenses its comments, extracts keywords and labels its tendency. The
//! result comes back as the arguments of a forced `process_posts` function
//! call and is checked against typed payloads, so nothing is reparsed from
//! free text.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{error, info, warn};

use crate::category::KEYWORDS_KEY;
use crate::config::RagConfig;
use crate::document::Record;
use crate::error::{RagError, Result};
use crate::generation::{FunctionSpec, GenerationRequest, TextGenerator};
use crate::records::RawPost;

/// Marker the model uses for a post without comments.
pub const NO_COMMENTS_MARKER: &str = "없음";

const REFINE_TEMPERATURE: f32 = 0.7;
const REFINE_MAX_TOKENS: u32 = 8000;
const DEFAULT_BATCH_SIZE: usize = 20;

const REFINE_INSTRUCTIONS: &str = "\
당신은 게시글 분석 및 정제 전문가입니다. 번호가 매겨진 게시글 목록(타이틀, 내용, 댓글)을 받아 \
각 게시글을 입력 순서대로 하나씩 정제합니다.

# 게시글
- 핵심 의미를 유지하면서 간결하고 객관적인 문체로 재작성합니다.
- 맞춤법과 문법을 교정하고 비속어와 은어는 표준어로 바꿉니다.
- 문장 끝에는 마침표를 사용합니다.

# 댓글
- 핵심 의견만 남기고 중복 의견은 하나로 합칩니다.
- '저도 그래요', '맞아요' 같은 공감 표현은 '동의합니다.'로 통일합니다.
- 댓글이 없으면 빈 목록을 반환합니다.

# 키워드
- 게시글마다 3-5개의 명사형 키워드를 고릅니다.
- 상위 카테고리로 묶을 수 있는 포괄적인 용어를 포함합니다.

# 성향
- 경험성: 개인의 경험, 사례, 후기를 공유하는 글
- 질문성: 정보 요청, 조언 구하기, 의견을 묻는 글";

/// Whether a post shares an experience or asks a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tendency {
    /// Shares a personal experience or review.
    #[serde(rename = "경험성")]
    Experience,
    /// Asks for information or advice.
    #[serde(rename = "질문성")]
    Question,
}

impl Tendency {
    /// The label used in prompts and output files.
    pub fn label(self) -> &'static str {
        match self {
            Tendency::Experience => "경험성",
            Tendency::Question => "질문성",
        }
    }
}

/// Refined comments of a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Comments {
    /// The post has no comments.
    Absent,
    /// Condensed comment texts.
    Present(Vec<String>),
    /// The model's comment field was missing or not a list of strings.
    Unparseable,
}

impl Comments {
    /// Interpret the `comments` field of a structured result.
    ///
    /// An empty list, or one holding only blanks and the
    /// [`NO_COMMENTS_MARKER`], means [`Comments::Absent`]; so does the bare
    /// marker string.
    pub fn from_value(value: Option<&Value>) -> Self {
        let items = match value {
            Some(Value::Array(items)) => items,
            Some(Value::String(text)) if text.trim() == NO_COMMENTS_MARKER => {
                return Comments::Absent;
            }
            _ => return Comments::Unparseable,
        };
        let mut comments = Vec::with_capacity(items.len());
        for item in items {
            let Value::String(text) = item else {
                return Comments::Unparseable;
            };
            let text = text.trim();
            if !text.is_empty() && text != NO_COMMENTS_MARKER {
                comments.push(text.to_string());
            }
        }
        if comments.is_empty() { Comments::Absent } else { Comments::Present(comments) }
    }

    /// Comments joined with `"; "`; empty unless present.
    pub fn joined(&self) -> String {
        match self {
            Comments::Present(comments) => comments.join("; "),
            Comments::Absent | Comments::Unparseable => String::new(),
        }
    }

    /// Short status label written alongside the joined text.
    pub fn status(&self) -> &'static str {
        match self {
            Comments::Absent => "absent",
            Comments::Present(_) => "present",
            Comments::Unparseable => "unparseable",
        }
    }
}

/// A post after refinement.
#[derive(Debug, Clone, PartialEq)]
pub struct RefinedPost {
    /// Post number of the source post.
    pub id: String,
    /// Rewritten post text.
    pub content: String,
    /// Condensed comments.
    pub comments: Comments,
    /// Extracted keywords.
    pub keywords: Vec<String>,
    /// Experience or question.
    pub tendency: Tendency,
    /// View count of the source post.
    pub views: String,
    /// Date of the source post.
    pub date: String,
}

impl RefinedPost {
    /// Convert into a record: keywords, tendency, views, date and the comment
    /// status become metadata.
    pub fn into_record(self) -> Record {
        let mut metadata = BTreeMap::new();
        metadata.insert(KEYWORDS_KEY.to_string(), self.keywords.join("; "));
        metadata.insert("tendency".to_string(), self.tendency.label().to_string());
        metadata.insert("views".to_string(), self.views);
        metadata.insert("date".to_string(), self.date);
        metadata.insert("comments_status".to_string(), self.comments.status().to_string());
        Record { id: self.id, content: self.content, comments: self.comments.joined(), metadata }
    }
}

/// The `process_posts` function schema.
pub fn process_posts_function() -> FunctionSpec {
    FunctionSpec::new(
        "process_posts",
        "여러 게시글과 댓글을 분석하여 정제된 형식으로 출력",
        json!({
            "type": "object",
            "properties": {
                "posts": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "content": { "type": "string", "description": "정제된 게시글 내용" },
                            "comments": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "정제된 댓글 목록"
                            },
                            "keywords": {
                                "type": "array",
                                "items": { "type": "string" },
                                "description": "추출된 키워드 목록 (3-5개)"
                            },
                            "tendency": {
                                "type": "string",
                                "enum": ["경험성", "질문성"],
                                "description": "게시글의 성향"
                            }
                        },
                        "required": ["content", "comments", "keywords", "tendency"]
                    }
                }
            },
            "required": ["posts"]
        }),
    )
}

/// Format one batch as the numbered list sent to the model.
///
/// `offset` is the zero-based position of the batch's first post in the
/// whole input.
pub fn batch_prompt(posts: &[RawPost], offset: usize) -> String {
    let mut prompt = String::new();
    for (i, post) in posts.iter().enumerate() {
        let _ = writeln!(
            prompt,
            "{}. Title: {}, Contents: {}, Comments: {}",
            offset + i + 1,
            post.title,
            post.contents,
            post.comments
        );
    }
    prompt
}

#[derive(Debug, Deserialize)]
struct PostPayload {
    content: String,
    #[serde(default)]
    comments: Option<Value>,
    #[serde(default)]
    keywords: Vec<String>,
    tendency: Tendency,
}

/// Refines raw posts batch by batch through a [`TextGenerator`].
pub struct PostRefiner {
    generator: Arc<dyn TextGenerator>,
    config: RagConfig,
    batch_size: usize,
}

impl PostRefiner {
    /// Create a refiner with the default batch size of 20 posts.
    pub fn new(generator: Arc<dyn TextGenerator>, config: RagConfig) -> Self {
        Self { generator, config, batch_size: DEFAULT_BATCH_SIZE }
    }

    /// Set the number of posts per generation call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Refine every post.
    ///
    /// A batch whose call fails after retries, or whose result has no
    /// `posts` list, is logged and skipped. Returned posts are matched to the
    /// input by position; a returned post that does not fit the payload schema
    /// is logged and skipped. Output order follows input order.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the batch size is zero.
    pub async fn refine(&self, posts: &[RawPost]) -> Result<Vec<RefinedPost>> {
        if self.batch_size == 0 {
            return Err(RagError::ConfigError("batch_size must be greater than zero".to_string()));
        }

        let function = process_posts_function();
        let mut throttle = self.config.throttle();
        let mut refined = Vec::with_capacity(posts.len());

        for (batch_no, batch) in posts.chunks(self.batch_size).enumerate() {
            let offset = batch_no * self.batch_size;
            info!(
                batch = batch_no + 1,
                first_row = offset + 1,
                last_row = offset + batch.len(),
                "refining batch"
            );

            let request = GenerationRequest::new(REFINE_INSTRUCTIONS, batch_prompt(batch, offset))
                .with_temperature(REFINE_TEMPERATURE)
                .with_max_tokens(REFINE_MAX_TOKENS);
            let result = self
                .config
                .retry
                .run("process_posts", || self.generator.generate_structured(&request, &function))
                .await;
            throttle.tick().await;

            let items = match result.and_then(posts_list) {
                Ok(items) => items,
                Err(e) => {
                    error!(batch = batch_no + 1, error = %e, "skipping batch");
                    continue;
                }
            };
            if items.len() != batch.len() {
                warn!(
                    batch = batch_no + 1,
                    expected = batch.len(),
                    returned = items.len(),
                    "model returned a different number of posts"
                );
            }

            for (post, item) in batch.iter().zip(items) {
                match refine_one(post, item) {
                    Ok(refined_post) => refined.push(refined_post),
                    Err(e) => {
                        warn!(post.id = %post.talk_no, error = %e, "skipping unparseable post")
                    }
                }
            }
        }

        info!(input = posts.len(), refined = refined.len(), "refinement finished");
        Ok(refined)
    }
}

fn posts_list(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Object(mut map) => match map.remove("posts") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(RagError::StructuredOutputError(
                "'process_posts' result has no 'posts' list".to_string(),
            )),
        },
        _ => Err(RagError::StructuredOutputError(
            "'process_posts' result is not an object".to_string(),
        )),
    }
}

fn refine_one(source: &RawPost, item: Value) -> Result<RefinedPost> {
    let payload: PostPayload = serde_json::from_value(item)
        .map_err(|e| RagError::StructuredOutputError(format!("post does not match schema: {e}")))?;
    if payload.content.trim().is_empty() {
        return Err(RagError::StructuredOutputError("post content is empty".to_string()));
    }

    let comments = Comments::from_value(payload.comments.as_ref());
    if comments == Comments::Unparseable {
        warn!(post.id = %source.talk_no, "comments field is not a list of strings");
    }

    Ok(RefinedPost {
        id: source.talk_no.clone(),
        content: payload.content.trim().to_string(),
        comments,
        keywords: payload
            .keywords
            .into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect(),
        tendency: payload.tendency,
        views: source.view_count.clone(),
        date: source.date.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(talk_no: &str, title: &str) -> RawPost {
        RawPost {
            talk_no: talk_no.to_string(),
            title: title.to_string(),
            contents: format!("{title} 내용"),
            comments: "['좋아요']".to_string(),
            view_count: "12".to_string(),
            date: "2024.03.01".to_string(),
        }
    }

    #[test]
    fn comments_tri_state() {
        assert_eq!(Comments::from_value(Some(&json!([]))), Comments::Absent);
        assert_eq!(Comments::from_value(Some(&json!(["없음"]))), Comments::Absent);
        assert_eq!(Comments::from_value(Some(&json!("없음"))), Comments::Absent);
        assert_eq!(Comments::from_value(Some(&json!(" 없음 "))), Comments::Absent);
        assert_eq!(
            Comments::from_value(Some(&json!([" 동의합니다. ", ""]))),
            Comments::Present(vec!["동의합니다.".to_string()])
        );
        assert_eq!(Comments::from_value(None), Comments::Unparseable);
        assert_eq!(Comments::from_value(Some(&Value::Null)), Comments::Unparseable);
        assert_eq!(Comments::from_value(Some(&json!("댓글 하나"))), Comments::Unparseable);
        assert_eq!(Comments::from_value(Some(&json!(["a", 1]))), Comments::Unparseable);
    }

    #[test]
    fn batch_prompt_numbers_from_offset() {
        let prompt = batch_prompt(&[raw("7", "첫 알바"), raw("8", "세금")], 20);
        assert_eq!(
            prompt,
            "21. Title: 첫 알바, Contents: 첫 알바 내용, Comments: ['좋아요']\n\
             22. Title: 세금, Contents: 세금 내용, Comments: ['좋아요']\n"
        );
    }

    #[test]
    fn content_starting_with_a_digit_is_kept_verbatim() {
        let post = refine_one(
            &raw("9", "시급"),
            json!({
                "content": "3.3% 소득세 공제가 고용 기록에 남는 이유가 궁금합니다.",
                "comments": [],
                "keywords": ["소득세", " 공제 "],
                "tendency": "질문성"
            }),
        )
        .unwrap();
        assert_eq!(post.content, "3.3% 소득세 공제가 고용 기록에 남는 이유가 궁금합니다.");
        assert_eq!(post.comments, Comments::Absent);
        assert_eq!(post.keywords, ["소득세", "공제"]);
        assert_eq!(post.tendency, Tendency::Question);
        assert_eq!(post.views, "12");
    }

    #[test]
    fn unknown_tendency_is_unparseable() {
        let err = refine_one(
            &raw("9", "x"),
            json!({"content": "c", "comments": [], "keywords": [], "tendency": "기타"}),
        )
        .unwrap_err();
        assert!(matches!(err, RagError::StructuredOutputError(_)));
    }

    #[test]
    fn record_carries_metadata_and_status() {
        let record = RefinedPost {
            id: "5".into(),
            content: "부스 판매 경험을 공유합니다.".into(),
            comments: Comments::Present(vec!["동의합니다.".into(), "재미있어요.".into()]),
            keywords: vec!["부스".into(), "판매".into()],
            tendency: Tendency::Experience,
            views: "30".into(),
            date: "2024.01.01".into(),
        }
        .into_record();

        assert_eq!(record.comments, "동의합니다.; 재미있어요.");
        assert_eq!(record.metadata["keywords"], "부스; 판매");
        assert_eq!(record.metadata["tendency"], "경험성");
        assert_eq!(record.metadata["comments_status"], "present");
    }

    #[test]
    fn posts_list_requires_array() {
        assert_eq!(posts_list(json!({"posts": [1, 2]})).unwrap().len(), 2);
        assert!(posts_list(json!({"items": []})).is_err());
        assert!(posts_list(json!([])).is_err());
    }
}
