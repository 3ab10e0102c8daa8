//! Chat-completion backends for aivis
//!
//! Provides a `ChatBackend` trait with implementations for:
//! - **OpenAI**: OpenAI-compatible `/chat/completions` (monitoring, sentiment, query generation)
//! - **Gemini**: `generateContent` in JSON mode (query generation)
//!
//! Plus the JSON repair helpers used on structured replies.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;

// ============================================================================
// ChatBackend trait
// ============================================================================

/// One system + user turn.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub temperature: Option<f32>,
    /// Ask the provider for a raw JSON object reply when it supports it.
    pub json: bool,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatCompletion {
    pub content: String,
    pub tokens_in: Option<i32>,
    pub tokens_out: Option<i32>,
}

/// Abstraction over chat providers.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError>;

    /// Provider name for logging and source tags ("openai", "gemini").
    fn name(&self) -> &str;

    fn model(&self) -> &str;
}

// ============================================================================
// Error types
// ============================================================================

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({code}): {message}")]
    Api { code: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Provider returned no content")]
    EmptyResponse,

    #[error("Invalid JSON in reply: {0}")]
    InvalidJson(String),

    #[error("All {attempts} retry attempts failed: {last}")]
    RetryExhausted { attempts: usize, last: String },
}

impl LlmError {
    /// Rate limits, server errors and transport failures are worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            LlmError::Api { code, .. } => *code == 429 || *code >= 500,
            _ => false,
        }
    }
}

// ============================================================================
// Config
// ============================================================================

#[derive(Debug, Clone)]
pub struct LlmClientConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub max_retries: usize,
    pub retry_delay_ms: u64,
}

impl LlmClientConfig {
    pub fn new(api_key: Option<String>, model: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            api_key: api_key.unwrap_or_default(),
            model: model.into(),
            base_url: base_url.into(),
            timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(10),
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }

    fn http_client(&self) -> Result<Client, LlmError> {
        if self.api_key.is_empty() {
            return Err(LlmError::MissingApiKey);
        }
        Ok(Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .build()?)
    }

    async fn with_retry<F, Fut>(&self, provider: &str, op: F) -> Result<ChatCompletion, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<ChatCompletion, LlmError>>,
    {
        let strategy = ExponentialBackoff::from_millis(self.retry_delay_ms.max(1))
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries);

        match RetryIf::spawn(strategy, op, LlmError::is_transient).await {
            Ok(c) => Ok(c),
            Err(e) if e.is_transient() && self.max_retries > 0 => {
                tracing::warn!(
                    provider,
                    attempts = self.max_retries + 1,
                    error = %e,
                    "All chat retry attempts failed"
                );
                Err(LlmError::RetryExhausted {
                    attempts: self.max_retries + 1,
                    last: e.to_string(),
                })
            }
            Err(e) => Err(e),
        }
    }
}

async fn api_error(response: reqwest::Response, provider: &str) -> LlmError {
    let status: StatusCode = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or(body);
    tracing::warn!(provider, code = status.as_u16(), message = %message, "Chat API error");
    LlmError::Api {
        code: status.as_u16(),
        message,
    }
}

// ============================================================================
// OpenAI API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: Option<i32>,
    completion_tokens: Option<i32>,
}

// ============================================================================
// OpenAiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct OpenAiChatClient {
    client: Client,
    config: LlmClientConfig,
}

impl OpenAiChatClient {
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let url = format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'));

        let body = OpenAiRequest {
            model: &self.config.model,
            messages: vec![
                OpenAiMessage {
                    role: "system",
                    content: &request.system,
                },
                OpenAiMessage {
                    role: "user",
                    content: &request.user,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            response_format: request
                .json
                .then(|| serde_json::json!({ "type": "json_object" })),
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response, "openai").await);
        }

        let parsed: OpenAiResponse = response.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(LlmError::EmptyResponse)?;

        Ok(ChatCompletion {
            content,
            tokens_in: parsed.usage.as_ref().and_then(|u| u.prompt_tokens),
            tokens_out: parsed.usage.as_ref().and_then(|u| u.completion_tokens),
        })
    }
}

#[async_trait]
impl ChatBackend for OpenAiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.config
            .with_retry("openai", || self.complete_once(request))
            .await
    }

    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// Gemini API structs (private)
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest<'a> {
    system_instruction: GeminiContent<'a>,
    contents: Vec<GeminiContent<'a>>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Debug, Serialize)]
struct GeminiContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<GeminiPart<'a>>,
}

#[derive(Debug, Serialize)]
struct GeminiPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_mime_type: Option<&'static str>,
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
    content: Option<GeminiCandidateContent>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidateContent {
    #[serde(default)]
    parts: Vec<GeminiCandidatePart>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidatePart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<i32>,
    candidates_token_count: Option<i32>,
}

// ============================================================================
// GeminiChatClient
// ============================================================================

#[derive(Debug, Clone)]
pub struct GeminiChatClient {
    client: Client,
    config: LlmClientConfig,
}

impl GeminiChatClient {
    pub fn new(config: LlmClientConfig) -> Result<Self, LlmError> {
        let client = config.http_client()?;
        Ok(Self { client, config })
    }

    async fn complete_once(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.config.base_url.trim_end_matches('/'),
            self.config.model,
            self.config.api_key
        );

        let body = GeminiRequest {
            system_instruction: GeminiContent {
                role: None,
                parts: vec![GeminiPart {
                    text: &request.system,
                }],
            },
            contents: vec![GeminiContent {
                role: Some("user"),
                parts: vec![GeminiPart {
                    text: &request.user,
                }],
            }],
            generation_config: GeminiGenerationConfig {
                temperature: request.temperature,
                max_output_tokens: request.max_tokens,
                response_mime_type: request.json.then_some("application/json"),
            },
        };

        let response = self.client.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(api_error(response, "gemini").await);
        }

        let parsed: GeminiResponse = response.json().await?;
        let content: String = parsed
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .unwrap_or_default();

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }

        Ok(ChatCompletion {
            content,
            tokens_in: parsed.usage_metadata.as_ref().and_then(|u| u.prompt_token_count),
            tokens_out: parsed
                .usage_metadata
                .as_ref()
                .and_then(|u| u.candidates_token_count),
        })
    }
}

#[async_trait]
impl ChatBackend for GeminiChatClient {
    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, LlmError> {
        self.config
            .with_retry("gemini", || self.complete_once(request))
            .await
    }

    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

// ============================================================================
// JSON reply repair
// ============================================================================

/// Remove a surrounding ```lang ... ``` fence if present.
pub fn strip_code_fences(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) up to the first newline.
    let body = match rest.find('\n') {
        Some(nl) => &rest[nl + 1..],
        None => rest,
    };
    body.trim_end().trim_end_matches("```").trim()
}

/// First balanced `{...}` span in `text`, honouring string literals.
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Parse a structured reply: fences stripped, then whole-body parse, then the
/// first `{...}` span as a repair attempt.
pub fn parse_json_reply<T: serde::de::DeserializeOwned>(reply: &str) -> Result<T, LlmError> {
    let body = strip_code_fences(reply);
    match serde_json::from_str::<T>(body) {
        Ok(v) => Ok(v),
        Err(first) => {
            let span = extract_json_object(body).ok_or_else(|| LlmError::InvalidJson(first.to_string()))?;
            serde_json::from_str::<T>(span).map_err(|e| LlmError::InvalidJson(e.to_string()))
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(api_key: &str, base_url: String) -> LlmClientConfig {
        LlmClientConfig {
            api_key: api_key.to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url,
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            max_retries: 2,
            retry_delay_ms: 10,
        }
    }

    fn chat_request() -> ChatRequest {
        ChatRequest {
            system: "You are helpful.".to_string(),
            user: "best sportsbook apps".to_string(),
            temperature: Some(0.2),
            json: false,
            max_tokens: None,
        }
    }

    fn openai_body(content: &str) -> serde_json::Value {
        serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": content } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 34 }
        })
    }

    #[tokio::test]
    async fn test_openai_complete_returns_content_and_usage() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config("test-key", mock_server.uri()))
            .expect("Failed to create client");

        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "messages": [
                    { "role": "system", "content": "You are helpful." },
                    { "role": "user", "content": "best sportsbook apps" }
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("FanDuel and DraftKings.")))
            .mount(&mock_server)
            .await;

        let result = client.complete(&chat_request()).await.expect("complete failed");
        assert_eq!(result.content, "FanDuel and DraftKings.");
        assert_eq!(result.tokens_in, Some(12));
        assert_eq!(result.tokens_out, Some(34));
    }

    #[tokio::test]
    async fn test_openai_retries_on_429_then_succeeds() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
                "error": { "message": "Rate limit exceeded" }
            })))
            .up_to_n_times(1)
            .mount(&mock_server)
            .await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(openai_body("ok")))
            .mount(&mock_server)
            .await;

        let result = client.complete(&chat_request()).await;
        assert!(result.is_ok(), "Expected success after retry: {:?}", result.err());
    }

    #[tokio::test]
    async fn test_openai_does_not_retry_client_errors() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": { "message": "bad model" }
            })))
            .expect(1)
            .mount(&mock_server)
            .await;

        match client.complete(&chat_request()).await {
            Err(LlmError::Api { code, message }) => {
                assert_eq!(code, 400);
                assert_eq!(message, "bad model");
            }
            other => panic!("Expected Api error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_exhausts_retries_on_500() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&mock_server)
            .await;

        match client.complete(&chat_request()).await {
            Err(LlmError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 3),
            other => panic!("Expected RetryExhausted, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_openai_empty_choices_is_error() {
        let mock_server = MockServer::start().await;
        let client = OpenAiChatClient::new(test_config("test-key", mock_server.uri())).unwrap();

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "choices": [] })))
            .mount(&mock_server)
            .await;

        assert!(matches!(
            client.complete(&chat_request()).await,
            Err(LlmError::EmptyResponse)
        ));
    }

    #[test]
    fn test_missing_api_key() {
        let result = OpenAiChatClient::new(test_config("", "http://localhost".to_string()));
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
        let result = GeminiChatClient::new(test_config("", "http://localhost".to_string()));
        assert!(matches!(result, Err(LlmError::MissingApiKey)));
    }

    #[tokio::test]
    async fn test_gemini_complete_joins_parts() {
        let mock_server = MockServer::start().await;
        let mut config = test_config("g-key", mock_server.uri());
        config.model = "gemini-2.0-flash".to_string();
        let client = GeminiChatClient::new(config).unwrap();

        Mock::given(method("POST"))
            .and(path("/models/gemini-2.0-flash:generateContent"))
            .and(query_param("key", "g-key"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "candidates": [{ "content": { "parts": [{ "text": "{\"generic\":" }, { "text": "[]}" }] } }],
                "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 7 }
            })))
            .mount(&mock_server)
            .await;

        let mut request = chat_request();
        request.json = true;
        let result = client.complete(&request).await.expect("gemini failed");
        assert_eq!(result.content, "{\"generic\":[]}");
        assert_eq!(result.tokens_out, Some(7));
        assert_eq!(client.name(), "gemini");
    }

    // --- JSON repair ---

    #[derive(Debug, Deserialize, PartialEq)]
    struct Sample {
        generic: Vec<String>,
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fences("```\n{}\n```"), "{}");
        assert_eq!(strip_code_fences("  {\"a\":1} "), "{\"a\":1}");
    }

    #[test]
    fn test_extract_json_object_respects_strings() {
        let text = r#"Sure! {"generic": ["a } b", "c"]} trailing {"x":1}"#;
        assert_eq!(extract_json_object(text), Some(r#"{"generic": ["a } b", "c"]}"#));
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("{\"unterminated\": [1, 2"), None);
    }

    #[test]
    fn test_parse_json_reply_with_fence_and_chatter() {
        let fenced: Sample = parse_json_reply("```JSON\n{\"generic\":[\"a\"]}\n```").unwrap();
        assert_eq!(fenced.generic, vec!["a"]);

        let chatty: Sample =
            parse_json_reply("Here you go:\n{\"generic\":[\"b\"]}\nHope this helps").unwrap();
        assert_eq!(chatty.generic, vec!["b"]);

        let garbage: Result<Sample, _> = parse_json_reply("not json");
        assert!(matches!(garbage, Err(LlmError::InvalidJson(_))));
    }
}
