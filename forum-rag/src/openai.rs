//! OpenAI and Azure OpenAI collaborators.
//!
//! This module is only available when the `openai` feature is enabled.
//! [`OpenAIEmbeddingProvider`] calls the embeddings endpoint over `reqwest`;
//! [`OpenAIChatGenerator`] calls chat completions through `async-openai`,
//! using forced function calling for structured results. Both share one
//! HTTP client configuration, so the request timeout applies to each.

use std::time::Duration;

use async_openai::Client;
use async_openai::config::{AzureConfig as AsyncAzureConfig, OpenAIConfig as AsyncOpenAIConfig};
use async_openai::error::OpenAIError;
use async_openai::types::{
    ChatCompletionNamedToolChoice, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionResponseMessage, ChatCompletionToolArgs, ChatCompletionToolChoiceOption,
    ChatCompletionToolType, CreateChatCompletionRequest, CreateChatCompletionRequestArgs,
    CreateChatCompletionResponse, FunctionName, FunctionObjectArgs,
};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error};

use crate::embedding::EmbeddingProvider;
use crate::error::{RagError, Result};
use crate::generation::{FunctionSpec, GenerationRequest, TextGenerator};

/// The default OpenAI API base.
pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";

/// The default Azure OpenAI API version.
pub const DEFAULT_AZURE_API_VERSION: &str = "2024-05-01-preview";

const DEFAULT_CHAT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Connection settings shared by the embedding provider and chat generator.
///
/// With `azure_api_version` set, `api_base` is an Azure resource endpoint and
/// the model names are deployment names.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenAIConfig {
    /// API key (sent as a bearer token, or as `api-key` for Azure).
    pub api_key: String,
    /// API base URL or Azure resource endpoint.
    pub api_base: String,
    /// Azure API version; `None` for the public OpenAI API.
    pub azure_api_version: Option<String>,
    /// Chat model or deployment.
    pub chat_model: String,
    /// Embedding model or deployment.
    pub embedding_model: String,
    /// Timeout for every HTTP request.
    pub timeout: Duration,
}

impl OpenAIConfig {
    /// Settings for the public OpenAI API with default models.
    pub fn openai(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: OPENAI_API_BASE.to_string(),
            azure_api_version: None,
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Settings for an Azure OpenAI resource.
    pub fn azure(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        chat_deployment: impl Into<String>,
        embedding_deployment: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: endpoint.into(),
            azure_api_version: Some(DEFAULT_AZURE_API_VERSION.to_string()),
            chat_model: chat_deployment.into(),
            embedding_model: embedding_deployment.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Read settings from the environment.
    ///
    /// Azure is used when `AZURE_OPENAI_ENDPOINT` (or `ENDPOINT_URL`) is set,
    /// with `AZURE_OPENAI_API_KEY`, `OPENAI_API_VERSION`, `DEPLOYMENT_NAME`
    /// and `DEPLOYMENT_EMBEDDING_NAME`. Otherwise `OPENAI_API_KEY` is required
    /// and `OPENAI_CHAT_MODEL` / `OPENAI_EMBEDDING_MODEL` override the models.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] if the API key is missing.
    pub fn from_env() -> Result<Self> {
        let var = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        let missing =
            |name: &str| RagError::ConfigError(format!("{name} environment variable not set"));

        let mut config = match var("AZURE_OPENAI_ENDPOINT").or_else(|| var("ENDPOINT_URL")) {
            Some(endpoint) => {
                let api_key =
                    var("AZURE_OPENAI_API_KEY").ok_or_else(|| missing("AZURE_OPENAI_API_KEY"))?;
                let mut config = Self::azure(
                    endpoint,
                    api_key,
                    var("DEPLOYMENT_NAME").unwrap_or_else(|| "gpt-4o".to_string()),
                    var("DEPLOYMENT_EMBEDDING_NAME")
                        .unwrap_or_else(|| DEFAULT_EMBEDDING_MODEL.to_string()),
                );
                if let Some(version) = var("OPENAI_API_VERSION") {
                    config.azure_api_version = Some(version);
                }
                config
            }
            None => {
                let api_key = var("OPENAI_API_KEY").ok_or_else(|| missing("OPENAI_API_KEY"))?;
                let mut config = Self::openai(api_key);
                if let Some(model) = var("OPENAI_CHAT_MODEL") {
                    config.chat_model = model;
                }
                if let Some(model) = var("OPENAI_EMBEDDING_MODEL") {
                    config.embedding_model = model;
                }
                config
            }
        };
        if let Some(base) = var("OPENAI_API_BASE").filter(|_| config.azure_api_version.is_none()) {
            config.api_base = base;
        }
        Ok(config)
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn provider(&self) -> &'static str {
        if self.azure_api_version.is_some() { "AzureOpenAI" } else { "OpenAI" }
    }

    fn url(&self, deployment: &str, operation: &str) -> String {
        let base = self.api_base.trim_end_matches('/');
        match &self.azure_api_version {
            Some(version) => format!(
                "{base}/openai/deployments/{deployment}/{operation}?api-version={version}"
            ),
            None => format!("{base}/{operation}"),
        }
    }
}

fn http_client(config: &OpenAIConfig) -> std::result::Result<reqwest::Client, String> {
    if config.api_key.is_empty() {
        return Err("API key must not be empty".to_string());
    }
    reqwest::Client::builder()
        .timeout(config.timeout)
        .build()
        .map_err(|e| format!("failed to build HTTP client: {e}"))
}

/// HTTP plumbing for the embeddings endpoint.
#[derive(Clone)]
struct ApiClient {
    http: reqwest::Client,
    config: OpenAIConfig,
}

impl ApiClient {
    fn new(config: OpenAIConfig) -> std::result::Result<Self, String> {
        let http = http_client(&config)?;
        Ok(Self { http, config })
    }

    async fn post<Req: Serialize, Resp: DeserializeOwned>(
        &self,
        url: &str,
        body: &Req,
    ) -> std::result::Result<Resp, String> {
        let request = self.http.post(url).json(body);
        let request = if self.config.azure_api_version.is_some() {
            request.header("api-key", &self.config.api_key)
        } else {
            request.bearer_auth(&self.config.api_key)
        };

        let response = request.send().await.map_err(|e| format!("request failed: {e}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or(body);
            return Err(format!("API returned {status}: {detail}"));
        }
        response.json().await.map_err(|e| format!("failed to parse response: {e}"))
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Deserialize)]
struct ErrorDetail {
    message: String,
}

// ── Embeddings ─────────────────────────────────────────────────────

/// An [`EmbeddingProvider`] backed by the OpenAI or Azure OpenAI embeddings API.
///
/// # Example
///
/// ```rust,ignore
/// use forum_rag::openai::{OpenAIConfig, OpenAIEmbeddingProvider};
///
/// let provider = OpenAIEmbeddingProvider::new(OpenAIConfig::from_env()?)?;
/// let embedding = provider.embed("알바 연락 문제").await?;
/// ```
pub struct OpenAIEmbeddingProvider {
    client: ApiClient,
}

impl OpenAIEmbeddingProvider {
    /// Create a provider.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::EmbeddingError`] if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let client = ApiClient::new(config).map_err(|message| RagError::EmbeddingError {
            provider: "OpenAI".into(),
            message,
        })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let provider = self.client.config.provider();
        let model = &self.client.config.embedding_model;
        debug!(provider, model = %model, text_len = text.len(), "embedding text");

        let url = self.client.config.url(model, "embeddings");
        let body = EmbeddingRequest { model, input: vec![text] };
        let response: EmbeddingResponse =
            self.client.post(&url, &body).await.map_err(|message| {
                error!(provider, error = %message, "embedding request failed");
                RagError::EmbeddingError { provider: provider.into(), message }
            })?;

        response.data.into_iter().next().map(|d| d.embedding).ok_or_else(|| {
            RagError::EmbeddingError {
                provider: provider.into(),
                message: "API returned empty response".into(),
            }
        })
    }

    fn name(&self) -> &str {
        self.client.config.provider()
    }
}

// ── Chat completions ───────────────────────────────────────────────

/// async-openai client for either flavor of the API.
enum ChatClient {
    OpenAI(Client<AsyncOpenAIConfig>),
    Azure(Client<AsyncAzureConfig>),
}

impl ChatClient {
    fn new(config: &OpenAIConfig, http: reqwest::Client) -> Self {
        let api_base = config.api_base.trim_end_matches('/');
        match &config.azure_api_version {
            Some(version) => {
                let azure = AsyncAzureConfig::new()
                    .with_api_base(api_base)
                    .with_api_version(version)
                    .with_deployment_id(&config.chat_model)
                    .with_api_key(&config.api_key);
                Self::Azure(Client::with_config(azure).with_http_client(http))
            }
            None => {
                let openai =
                    AsyncOpenAIConfig::new().with_api_key(&config.api_key).with_api_base(api_base);
                Self::OpenAI(Client::with_config(openai).with_http_client(http))
            }
        }
    }

    async fn create(
        &self,
        request: CreateChatCompletionRequest,
    ) -> std::result::Result<CreateChatCompletionResponse, OpenAIError> {
        match self {
            Self::OpenAI(client) => client.chat().create(request).await,
            Self::Azure(client) => client.chat().create(request).await,
        }
    }
}

/// Build a chat request; with `function` set, it is the only tool and the
/// model is forced to call it.
fn chat_request(
    model: &str,
    request: &GenerationRequest,
    function: Option<&FunctionSpec>,
) -> std::result::Result<CreateChatCompletionRequest, OpenAIError> {
    let messages: Vec<ChatCompletionRequestMessage> = vec![
        ChatCompletionRequestSystemMessageArgs::default()
            .content(request.system.as_str())
            .build()?
            .into(),
        ChatCompletionRequestUserMessageArgs::default()
            .content(request.user.as_str())
            .build()?
            .into(),
    ];

    let mut builder = CreateChatCompletionRequestArgs::default();
    builder.model(model).messages(messages);
    if let Some(temperature) = request.temperature {
        builder.temperature(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        builder.max_tokens(max_tokens);
    }

    if let Some(function) = function {
        let tool = ChatCompletionToolArgs::default()
            .r#type(ChatCompletionToolType::Function)
            .function(
                FunctionObjectArgs::default()
                    .name(function.name.as_str())
                    .description(function.description.as_str())
                    .parameters(function.parameters.clone())
                    .build()?,
            )
            .build()?;
        builder.tools(vec![tool]).tool_choice(ChatCompletionToolChoiceOption::Named(
            ChatCompletionNamedToolChoice {
                r#type: ChatCompletionToolType::Function,
                function: FunctionName { name: function.name.clone() },
            },
        ));
    }

    builder.build()
}

fn first_message(
    response: CreateChatCompletionResponse,
) -> std::result::Result<ChatCompletionResponseMessage, String> {
    response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| "API returned no choices".to_string())
}

fn function_arguments(
    message: ChatCompletionResponseMessage,
    function: &str,
) -> std::result::Result<Value, String> {
    let call = message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .find(|call| call.function.name == function)
        .ok_or_else(|| format!("reply contains no call to '{function}'"))?;
    serde_json::from_str(&call.function.arguments)
        .map_err(|e| format!("arguments of '{function}' are not valid JSON: {e}"))
}

/// A [`TextGenerator`] backed by the OpenAI or Azure OpenAI chat completions
/// API through `async-openai`.
///
/// Structured results use forced function calling: the function spec is sent
/// as the only tool with `tool_choice` pinned to it, and the call's arguments
/// are returned.
pub struct OpenAIChatGenerator {
    client: ChatClient,
    config: OpenAIConfig,
}

impl OpenAIChatGenerator {
    /// Create a generator.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::GenerationError`] if the key is empty or the HTTP
    /// client cannot be built.
    pub fn new(config: OpenAIConfig) -> Result<Self> {
        let http = http_client(&config).map_err(|message| RagError::GenerationError {
            provider: config.provider().into(),
            message,
        })?;
        Ok(Self { client: ChatClient::new(&config, http), config })
    }

    async fn complete(
        &self,
        request: &GenerationRequest,
        function: Option<&FunctionSpec>,
    ) -> Result<ChatCompletionResponseMessage> {
        let provider = self.config.provider();
        let body = chat_request(&self.config.chat_model, request, function)
            .map_err(|e| RagError::ConfigError(format!("invalid chat request: {e}")))?;

        self.client
            .create(body)
            .await
            .map_err(|e| e.to_string())
            .and_then(first_message)
            .map_err(|message| {
                error!(provider, error = %message, "chat completion failed");
                RagError::GenerationError { provider: provider.into(), message }
            })
    }
}

#[async_trait]
impl TextGenerator for OpenAIChatGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        debug!(provider = self.name(), system_len = request.system.len(), "generating text");
        let message = self.complete(request, None).await?;
        message.content.ok_or_else(|| RagError::GenerationError {
            provider: self.name().into(),
            message: "reply has no text content".into(),
        })
    }

    async fn generate_structured(
        &self,
        request: &GenerationRequest,
        function: &FunctionSpec,
    ) -> Result<Value> {
        debug!(provider = self.name(), function = %function.name, "generating structured result");
        let message = self.complete(request, Some(function)).await?;
        function_arguments(message, &function.name).map_err(RagError::StructuredOutputError)
    }

    fn name(&self) -> &str {
        self.config.provider()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(message: Value) -> CreateChatCompletionResponse {
        serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o",
            "choices": [{ "index": 0, "message": message, "finish_reason": "stop" }]
        }))
        .unwrap()
    }

    #[test]
    fn builds_openai_and_azure_embedding_urls() {
        let openai = OpenAIConfig::openai("sk-test");
        assert_eq!(
            openai.url("text-embedding-3-small", "embeddings"),
            "https://api.openai.com/v1/embeddings"
        );

        let azure = OpenAIConfig::azure(
            "https://forum.openai.azure.com/",
            "key",
            "gpt-4o",
            "text-embedding-3-large",
        );
        assert_eq!(
            azure.url("text-embedding-3-large", "embeddings"),
            "https://forum.openai.azure.com/openai/deployments/text-embedding-3-large/embeddings\
             ?api-version=2024-05-01-preview"
        );
        assert_eq!(azure.provider(), "AzureOpenAI");
    }

    #[test]
    fn empty_key_is_rejected() {
        let err = OpenAIEmbeddingProvider::new(OpenAIConfig::openai("")).err().unwrap();
        assert!(matches!(err, RagError::EmbeddingError { .. }));
        let err = OpenAIChatGenerator::new(OpenAIConfig::openai("")).err().unwrap();
        assert!(matches!(err, RagError::GenerationError { .. }));
    }

    #[test]
    fn chat_generator_accepts_both_flavors() {
        let openai = OpenAIChatGenerator::new(OpenAIConfig::openai("sk-test")).unwrap();
        assert_eq!(openai.name(), "OpenAI");
        let azure = OpenAIConfig::azure("https://forum.openai.azure.com/", "key", "gpt-4o", "emb");
        assert_eq!(OpenAIChatGenerator::new(azure).unwrap().name(), "AzureOpenAI");
    }

    #[test]
    fn chat_request_forces_the_function() {
        let request = GenerationRequest::new("sys", "user").with_temperature(0.3);
        let function = FunctionSpec::new("classify_post", "pick", json!({"type": "object"}));
        let body = chat_request("gpt-4o", &request, Some(&function)).unwrap();
        let body = serde_json::to_value(body).unwrap();

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][0]["content"], "sys");
        assert_eq!(body["messages"][1]["role"], "user");
        assert_eq!(body["messages"][1]["content"], "user");
        assert_eq!(body["tools"][0]["type"], "function");
        assert_eq!(body["tools"][0]["function"]["name"], "classify_post");
        assert_eq!(body["tools"][0]["function"]["parameters"], json!({"type": "object"}));
        assert_eq!(body["tool_choice"]["type"], "function");
        assert_eq!(body["tool_choice"]["function"]["name"], "classify_post");
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn plain_chat_request_has_no_tools() {
        let request = GenerationRequest::new("sys", "user");
        let body = serde_json::to_value(chat_request("gpt-4o", &request, None).unwrap()).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn extracts_function_arguments_from_reply() {
        let arguments = json!({"primary_category": "구직", "secondary_category": "근무 환경"});
        let response = response(json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": "call_1",
                "type": "function",
                "function": { "name": "classify_post", "arguments": arguments.to_string() }
            }]
        }));

        let message = first_message(response).unwrap();
        let args = function_arguments(message, "classify_post").unwrap();
        assert_eq!(args["primary_category"], "구직");
    }

    #[test]
    fn missing_function_call_is_reported() {
        let response = response(json!({"role": "assistant", "content": "hello"}));
        let message = first_message(response).unwrap();
        assert!(function_arguments(message, "classify_post").is_err());
    }

    #[test]
    fn empty_choices_are_reported() {
        let response: CreateChatCompletionResponse = serde_json::from_value(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "created": 1_700_000_000,
            "model": "gpt-4o",
            "choices": []
        }))
        .unwrap();
        assert!(first_message(response).is_err());
    }
}
