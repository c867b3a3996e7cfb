//! Text-generation collaborator: free-text and structured (function-call) results.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{RagError, Result};

/// One generation call: system instructions, a user message, and sampling knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// System instructions.
    pub system: String,
    /// User message.
    pub user: String,
    /// Sampling temperature; provider default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Output token cap; provider default when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    /// Create a request with provider-default sampling.
    pub fn new(system: impl Into<String>, user: impl Into<String>) -> Self {
        Self { system: system.into(), user: user.into(), temperature: None, max_tokens: None }
    }

    /// Set the sampling temperature.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Set the output token cap.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A function the model is forced to "call", whose arguments are the
/// structured result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionSpec {
    /// Function name.
    pub name: String,
    /// What the function does.
    pub description: String,
    /// JSON Schema of the arguments object.
    pub parameters: Value,
}

impl FunctionSpec {
    /// Create a function spec.
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self { name: name.into(), description: description.into(), parameters }
    }
}

/// A text-generation service (chat-completion style LLM).
///
/// Implementations that support native function calling should override
/// [`generate_structured`](TextGenerator::generate_structured); the default
/// asks for bare JSON in the instructions and extracts it from the reply.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate free text. The output is opaque to callers.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a JSON value matching `function.parameters`.
    async fn generate_structured(
        &self,
        request: &GenerationRequest,
        function: &FunctionSpec,
    ) -> Result<Value> {
        let mut request = request.clone();
        request.system = format!(
            "{}\n\n### Output\nRespond only with one JSON object that is the arguments of the \
             function `{}` ({}). It must match this JSON Schema:\n{}",
            request.system, function.name, function.description, function.parameters
        );
        let text = self.generate(&request).await?;
        extract_json(&text).ok_or_else(|| {
            RagError::StructuredOutputError(format!(
                "reply to '{}' contains no JSON object",
                function.name
            ))
        })
    }

    /// Short generator name used in logs and error messages.
    fn name(&self) -> &str;
}

/// Deserialize a structured result into its typed form.
///
/// # Errors
///
/// Returns [`RagError::StructuredOutputError`] if the value does not match `T`.
pub fn parse_structured<T: DeserializeOwned>(function: &str, value: Value) -> Result<T> {
    serde_json::from_value(value).map_err(|e| {
        RagError::StructuredOutputError(format!("'{function}' result does not match schema: {e}"))
    })
}

/// Find a JSON value in model output: either the whole text, or the body of
/// the first fenced code block.
pub fn extract_json(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text.trim()) {
        return Some(value);
    }
    let start_markers = ["```json\n", "```json\r\n", "```\n", "```\r\n"];
    for start in start_markers {
        if let Some(start_idx) = text.find(start) {
            let content_start = start_idx + start.len();
            if let Some(end_idx) = text[content_start..].find("```") {
                let body = text[content_start..content_start + end_idx].trim();
                if let Ok(value) = serde_json::from_str(body) {
                    return Some(value);
                }
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;

    struct Scripted {
        reply: String,
        seen: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl TextGenerator for Scripted {
        async fn generate(&self, request: &GenerationRequest) -> Result<String> {
            self.seen.lock().unwrap().push(request.clone());
            Ok(self.reply.clone())
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }

    fn classify_fn() -> FunctionSpec {
        FunctionSpec::new(
            "classify_post",
            "pick categories",
            json!({"type": "object", "required": ["primary_category"]}),
        )
    }

    #[test]
    fn extracts_bare_and_fenced_json() {
        assert_eq!(extract_json(r#" {"a": 1} "#), Some(json!({"a": 1})));
        assert_eq!(
            extract_json("Here you go:\n```json\n{\"a\": [1, 2]}\n```\nDone."),
            Some(json!({"a": [1, 2]}))
        );
        assert_eq!(extract_json("```\n{\"b\": true}\n```"), Some(json!({"b": true})));
        assert_eq!(extract_json("no json here"), None);
    }

    #[tokio::test]
    async fn default_structured_generation_embeds_schema_and_parses_reply() {
        let generator = Scripted {
            reply: "```json\n{\"primary_category\": \"구직\"}\n```".into(),
            seen: Mutex::new(Vec::new()),
        };
        let request = GenerationRequest::new("당신은 데이터 분류 전문가입니다.", "키워드: 알바")
            .with_temperature(0.3);

        let value = generator.generate_structured(&request, &classify_fn()).await.unwrap();
        assert_eq!(value, json!({"primary_category": "구직"}));

        let seen = generator.seen.lock().unwrap();
        assert!(seen[0].system.starts_with("당신은 데이터 분류 전문가입니다."));
        assert!(seen[0].system.contains("classify_post"));
        assert_eq!(seen[0].temperature, Some(0.3));
    }

    #[tokio::test]
    async fn default_structured_generation_rejects_prose() {
        let generator =
            Scripted { reply: "I cannot do that.".into(), seen: Mutex::new(Vec::new()) };
        let err = generator
            .generate_structured(&GenerationRequest::new("s", "u"), &classify_fn())
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::StructuredOutputError(_)));
    }

    #[test]
    fn parse_structured_reports_schema_mismatch() {
        #[derive(Debug, Deserialize)]
        struct Pick {
            #[allow(dead_code)]
            primary_category: String,
        }
        let ok = parse_structured::<Pick>("classify_post", json!({"primary_category": "a"}));
        assert!(ok.is_ok());
        let err = parse_structured::<Pick>("classify_post", json!({"other": 1})).unwrap_err();
        assert!(matches!(err, RagError::StructuredOutputError(_)));
    }
}
