//! Provider adapters for Parley — multi-provider chat generation
//!
//! Provides a `ChatProvider` trait with implementations for:
//! - **Gemini** — Google AI Studio `generateContent` API
//! - **OpenAI** — the Responses API (`instructions` + `input`)
//! - **Anthropic** — the Messages API (Claude)
//!
//! Every adapter normalizes its provider's response shape to a single
//! [`Completion`] before the engine sees it; the engine never touches
//! provider-specific JSON.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::models::TokenUsage;

/// Default request ceiling for providers that require one (Anthropic).
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// ============================================================================
// ChatProvider trait
// ============================================================================

/// A normalized generation result: the rendered text plus optional token
/// accounting. Providers that do not report usage leave it `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub text: String,
    pub usage: Option<TokenUsage>,
}

/// Abstraction over chat-completion providers.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generate a reply for a single user prompt.
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError>;

    /// Model the adapter is configured for.
    fn model(&self) -> &str;

    /// Provider name for logging and trace metadata.
    fn name(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

/// Generation errors. These never cross the engine boundary — the engine
/// renders them into assistant-turn text.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("empty completion in response")]
    EmptyCompletion,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("missing API key")]
    MissingApiKey,
}

/// Every provider wraps errors as `{"error": {..., "message": ...}}`; dig the
/// message out when present, otherwise carry the raw body.
fn parse_api_error(status: StatusCode, body: &str) -> ProviderError {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error")?
                .get("message")?
                .as_str()
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.to_string());

    ProviderError::Api {
        code: status.as_u16(),
        message,
    }
}

// ============================================================================
// Config types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Gemini,
    Openai,
    Anthropic,
}

impl ProviderKind {
    /// Environment variable consulted when the config carries no key.
    pub fn api_key_env(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "GEMINI_API_KEY",
            ProviderKind::Openai => "OPENAI_API_KEY",
            ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderKind::Gemini => "https://generativelanguage.googleapis.com",
            ProviderKind::Openai => "https://api.openai.com",
            ProviderKind::Anthropic => "https://api.anthropic.com",
        }
    }
}

/// Resolved adapter configuration.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// System text forwarded per provider convention (`systemInstruction` /
    /// `instructions` / `system`).
    pub instructions: Option<String>,
    /// Opaque pass-through table merged verbatim into the request body root.
    /// Never parsed here.
    pub options: serde_json::Value,
    pub max_tokens: u32,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind, api_key: Option<String>, model: String) -> Self {
        let api_key = api_key
            .or_else(|| std::env::var(kind.api_key_env()).ok())
            .unwrap_or_default();

        Self {
            kind,
            api_key,
            model,
            instructions: None,
            options: serde_json::json!({}),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

/// Create the appropriate adapter from configuration.
pub fn create_provider(config: ProviderConfig) -> Result<Box<dyn ChatProvider>, ProviderError> {
    match config.kind {
        ProviderKind::Gemini => Ok(Box::new(GeminiChatClient::new(config)?)),
        ProviderKind::Openai => Ok(Box::new(OpenAiChatClient::new(config)?)),
        ProviderKind::Anthropic => Ok(Box::new(AnthropicChatClient::new(config)?)),
    }
}

/// Merge the opaque pass-through options into a serialized request body.
/// Only top-level object keys are merged; anything else is ignored.
fn merge_options(body: &mut serde_json::Value, options: &serde_json::Value) {
    if let (Some(body_map), Some(option_map)) = (body.as_object_mut(), options.as_object()) {
        for (key, value) in option_map {
            body_map.insert(key.clone(), value.clone());
        }
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiContent>,
}

#[derive(Debug, Serialize)]
struct GeminiContent {
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    content: GeminiReplyContent,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyContent {
    #[serde(default)]
    parts: Vec<GeminiReplyPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiReplyPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
}

// ============================================================================
// GeminiChatClient
// ============================================================================

/// Gemini chat client — calls the `generateContent` API.
#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl GeminiChatClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let base_url = config.kind.default_base_url().to_string();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: ProviderConfig, base_url: String) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent?key={}",
            self.base_url, self.config.model, self.config.api_key
        );

        let request = GeminiRequest {
            contents: vec![GeminiContent {
                parts: vec![GeminiPart {
                    text: prompt.to_string(),
                }],
            }],
            system_instruction: self.config.instructions.as_ref().map(|text| GeminiContent {
                parts: vec![GeminiPart { text: text.clone() }],
            }),
        };

        let mut body = serde_json::to_value(&request)?;
        merge_options(&mut body, &self.config.options);

        let response = self.client.post(&url).json(&body).send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let err = parse_api_error(status, &error_body);
            tracing::error!(provider = "gemini", error = %err, "Gemini API error");
            return Err(err);
        }

        let gemini_response: GeminiResponse = response.json().await?;

        let text = gemini_response
            .candidates
            .first()
            .map(|c| {
                c.content
                    .parts
                    .iter()
                    .map(|p| p.text.as_str())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }

        let usage = gemini_response.usage_metadata.map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        });

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl ChatProvider for GeminiChatClient {
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError> {
        self.generate_once(prompt).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

// ============================================================================
// OpenAI API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    input: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    output: Vec<OpenAiOutputItem>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiOutputItem {
    #[serde(default)]
    content: Vec<OpenAiContentItem>,
}

#[derive(Debug, Deserialize)]
struct OpenAiContentItem {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

/// OpenAI chat client — calls the Responses API.
#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl OpenAiChatClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let base_url = config.kind.default_base_url().to_string();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: ProviderConfig, base_url: String) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let url = format!("{}/v1/responses", self.base_url);

        let request = OpenAiRequest {
            model: self.config.model.clone(),
            input: prompt.to_string(),
            instructions: self.config.instructions.clone(),
        };

        let mut body = serde_json::to_value(&request)?;
        merge_options(&mut body, &self.config.options);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let err = parse_api_error(status, &error_body);
            tracing::error!(provider = "openai", error = %err, "OpenAI API error");
            return Err(err);
        }

        let openai_response: OpenAiResponse = response.json().await?;

        // The rendered reply is the concatenation of all output_text items.
        let text = openai_response
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text")
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("");

        if text.is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }

        let usage = openai_response.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatClient {
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError> {
        self.generate_once(prompt).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ============================================================================
// Anthropic API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct AnthropicRequest {
    model: String,
    max_tokens: u32,
    messages: Vec<AnthropicMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
}

#[derive(Debug, Serialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    #[serde(default)]
    content: Vec<AnthropicBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
struct AnthropicBlock {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: Option<u64>,
    output_tokens: Option<u64>,
}

// ============================================================================
// AnthropicChatClient
// ============================================================================

/// Anthropic chat client — calls the Messages API (Claude).
#[derive(Debug, Clone)]
pub struct AnthropicChatClient {
    client: Client,
    config: ProviderConfig,
    base_url: String,
}

impl AnthropicChatClient {
    pub fn new(config: ProviderConfig) -> Result<Self, ProviderError> {
        let base_url = config.kind.default_base_url().to_string();
        Self::with_base_url(config, base_url)
    }

    /// Create a client with a custom base URL (for testing / integration)
    pub fn with_base_url(config: ProviderConfig, base_url: String) -> Result<Self, ProviderError> {
        if config.api_key.is_empty() {
            return Err(ProviderError::MissingApiKey);
        }

        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    async fn generate_once(&self, prompt: &str) -> Result<Completion, ProviderError> {
        let url = format!("{}/v1/messages", self.base_url);

        let request = AnthropicRequest {
            model: self.config.model.clone(),
            max_tokens: self.config.max_tokens,
            messages: vec![AnthropicMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            system: self.config.instructions.clone(),
        };

        let mut body = serde_json::to_value(&request)?;
        merge_options(&mut body, &self.config.options);

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            let err = parse_api_error(status, &error_body);
            tracing::error!(provider = "anthropic", error = %err, "Anthropic API error");
            return Err(err);
        }

        let anthropic_response: AnthropicResponse = response.json().await?;

        // Multiple content blocks render one per line.
        let text = anthropic_response
            .content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        if text.is_empty() {
            return Err(ProviderError::EmptyCompletion);
        }

        let usage = anthropic_response.usage.map(|u| TokenUsage {
            input_tokens: u.input_tokens,
            output_tokens: u.output_tokens,
        });

        Ok(Completion { text, usage })
    }
}

#[async_trait]
impl ChatProvider for AnthropicChatClient {
    async fn generate(&self, prompt: &str) -> Result<Completion, ProviderError> {
        self.generate_once(prompt).await
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(kind: ProviderKind, api_key: &str, model: &str) -> ProviderConfig {
        ProviderConfig {
            kind,
            api_key: api_key.to_string(),
            model: model.to_string(),
            instructions: None,
            options: serde_json::json!({}),
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }

    #[tokio::test]
    async fn test_gemini_generate_returns_text_and_usage() {
        let mock_server = MockServer::start().await;
        let config = test_config(ProviderKind::Gemini, "test-key", "gemini-1.5-flash");
        let client = GeminiChatClient::with_base_url(config, mock_server.uri())
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(body_partial_json(serde_json::json!({
                "contents": [{ "parts": [{ "text": "hello" }] }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [
                    { "content": { "parts": [{ "text": "hi there" }] } }
                ],
                "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 5 }
            })))
            .mount(&mock_server)
            .await;

        let completion = client.generate("hello").await.unwrap();
        assert_eq!(completion.text, "hi there");
        assert_eq!(
            completion.usage,
            Some(TokenUsage {
                input_tokens: Some(3),
                output_tokens: Some(5),
            })
        );
    }

    #[tokio::test]
    async fn test_gemini_empty_candidates_is_empty_completion() {
        let mock_server = MockServer::start().await;
        let config = test_config(ProviderKind::Gemini, "test-key", "gemini-1.5-flash");
        let client = GeminiChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({ "candidates": [] })),
            )
            .mount(&mock_server)
            .await;

        let result = client.generate("hello").await;
        assert!(matches!(result, Err(ProviderError::EmptyCompletion)));
    }

    #[tokio::test]
    async fn test_openai_generate_joins_output_text() {
        let mock_server = MockServer::start().await;
        let config = test_config(ProviderKind::Openai, "test-key", "gpt-4o-mini");
        let client = OpenAiChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/responses"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "input": "ahoy"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": [
                    {
                        "type": "message",
                        "content": [
                            { "type": "output_text", "text": "Arr, " },
                            { "type": "output_text", "text": "matey!" },
                            { "type": "reasoning", "text": "ignored" }
                        ]
                    }
                ],
                "usage": { "input_tokens": 2, "output_tokens": 4 }
            })))
            .mount(&mock_server)
            .await;

        let completion = client.generate("ahoy").await.unwrap();
        assert_eq!(completion.text, "Arr, matey!");
        assert_eq!(completion.usage.unwrap().output_tokens, Some(4));
    }

    #[tokio::test]
    async fn test_openai_instructions_forwarded() {
        let mock_server = MockServer::start().await;
        let mut config = test_config(ProviderKind::Openai, "test-key", "gpt-4o-mini");
        config.instructions = Some("talk like a pirate".to_string());
        let client = OpenAiChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "instructions": "talk like a pirate"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "output": [
                    { "content": [{ "type": "output_text", "text": "aye" }] }
                ]
            })))
            .mount(&mock_server)
            .await;

        let completion = client.generate("hello").await.unwrap();
        assert_eq!(completion.text, "aye");
        assert!(completion.usage.is_none());
    }

    #[tokio::test]
    async fn test_anthropic_generate_joins_blocks_with_newlines() {
        let mock_server = MockServer::start().await;
        let config = test_config(
            ProviderKind::Anthropic,
            "test-key",
            "claude-3-5-sonnet-latest",
        );
        let client = AnthropicChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "test-key"))
            .and(header("anthropic-version", "2023-06-01"))
            .and(body_partial_json(serde_json::json!({
                "model": "claude-3-5-sonnet-latest",
                "max_tokens": 1024,
                "messages": [{ "role": "user", "content": "hello" }]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": [
                    { "type": "text", "text": "first block" },
                    { "type": "text", "text": "second block" }
                ],
                "usage": { "input_tokens": 7, "output_tokens": 9 }
            })))
            .mount(&mock_server)
            .await;

        let completion = client.generate("hello").await.unwrap();
        assert_eq!(completion.text, "first block\nsecond block");
        assert_eq!(completion.usage.unwrap().input_tokens, Some(7));
    }

    #[tokio::test]
    async fn test_api_error_message_extracted_from_body() {
        let mock_server = MockServer::start().await;
        let config = test_config(ProviderKind::Anthropic, "test-key", "claude-3-5-sonnet-latest");
        let client = AnthropicChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "type": "rate_limit_error", "message": "Rate limit exceeded" }
            })))
            .mount(&mock_server)
            .await;

        let result = client.generate("hello").await;
        match result {
            Err(ProviderError::Api { code, message }) => {
                assert_eq!(code, 429);
                assert_eq!(message, "Rate limit exceeded");
            }
            other => panic!("Expected Api error, got {:?}", other.map(|c| c.text)),
        }
    }

    #[tokio::test]
    async fn test_missing_api_key_rejected_at_construction() {
        let config = test_config(ProviderKind::Openai, "", "gpt-4o-mini");
        let result = OpenAiChatClient::new(config);
        assert!(matches!(result, Err(ProviderError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_options_merged_into_request_body() {
        let mock_server = MockServer::start().await;
        let mut config = test_config(ProviderKind::Gemini, "test-key", "gemini-1.5-flash");
        config.options = serde_json::json!({ "generationConfig": { "temperature": 0.2 } });
        let client = GeminiChatClient::with_base_url(config, mock_server.uri()).unwrap();

        Mock::given(method("POST"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": { "temperature": 0.2 }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [
                    { "content": { "parts": [{ "text": "ok" }] } }
                ]
            })))
            .mount(&mock_server)
            .await;

        let completion = client.generate("hello").await.unwrap();
        assert_eq!(completion.text, "ok");
    }

    #[test]
    fn test_factory_rejects_missing_key() {
        let config = test_config(ProviderKind::Gemini, "", "gemini-1.5-flash");
        assert!(matches!(
            create_provider(config),
            Err(ProviderError::MissingApiKey)
        ));
    }
}
