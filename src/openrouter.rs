//! OpenRouter chat-completions gateway.
//!
//! Wraps the provider's `/chat/completions` endpoint with input sanitisation,
//! structured-output validation, retry with exponential backoff and a typed
//! error taxonomy. Callers depend on the [`ChatCompletion`] trait only.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;

/// Hard ceiling on the length of any single message, in characters.
pub const MAX_MESSAGE_CHARS: usize = 50_000;

/// Anything able to run a chat completion.
#[async_trait]
pub trait ChatCompletion: Send + Sync {
    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError>;

    /// Outcome of the most recent call. Informational only.
    fn is_connected(&self) -> bool {
        true
    }
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    Validation,
    Auth,
    RateLimitExceeded,
    InvalidRequest,
    NotFound,
    ServiceUnavailable,
    Api,
    Timeout,
    Connection,
    Unexpected,
}

impl GatewayErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION_ERROR",
            Self::Auth => "AUTH_ERROR",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::InvalidRequest => "INVALID_REQUEST",
            Self::NotFound => "NOT_FOUND",
            Self::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            Self::Api => "API_ERROR",
            Self::Timeout => "TIMEOUT_ERROR",
            Self::Connection => "CONNECTION_ERROR",
            Self::Unexpected => "UNEXPECTED_ERROR",
        }
    }

    fn default_status(&self) -> u16 {
        match self {
            Self::Validation | Self::InvalidRequest => 400,
            Self::Auth => 401,
            Self::NotFound => 404,
            Self::RateLimitExceeded => 429,
            Self::Api => 502,
            Self::ServiceUnavailable | Self::Connection => 503,
            Self::Timeout => 504,
            Self::Unexpected => 500,
        }
    }
}

/// Gateway failure with an HTTP-style status usable by callers.
#[derive(Debug, Error)]
#[error("{code}: {message}", code = .kind.code())]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub status: u16,
    pub message: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: kind.default_status(),
            message: message.into(),
        }
    }

    fn validation(message: impl Into<String>) -> Self {
        Self::new(GatewayErrorKind::Validation, message)
    }

    /// Classify a non-success HTTP response.
    fn from_status(status: StatusCode, body: &str) -> Self {
        let detail = provider_message(body);
        let kind = match status.as_u16() {
            400 => GatewayErrorKind::InvalidRequest,
            401 => GatewayErrorKind::Auth,
            404 => GatewayErrorKind::NotFound,
            429 => GatewayErrorKind::RateLimitExceeded,
            502..=504 => GatewayErrorKind::ServiceUnavailable,
            _ => GatewayErrorKind::Api,
        };
        Self {
            kind,
            status: status.as_u16(),
            message: format!("Provider returned {}: {}", status, detail),
        }
    }

    /// Classify a transport-level failure.
    fn from_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::new(GatewayErrorKind::Timeout, format!("Request timed out: {}", err))
        } else if err.is_connect() {
            Self::new(
                GatewayErrorKind::Connection,
                format!("Could not connect to provider: {}", err),
            )
        } else {
            Self::new(GatewayErrorKind::Unexpected, err.to_string())
        }
    }

    /// Client, auth and not-found failures will not improve on retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self.kind,
            GatewayErrorKind::Validation
                | GatewayErrorKind::Auth
                | GatewayErrorKind::InvalidRequest
                | GatewayErrorKind::NotFound
        )
    }
}

fn provider_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }
    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
    }

    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.error.message,
        Err(_) => body.chars().take(300).collect(),
    }
}

// ============================================================================
// Request/Response types
// ============================================================================

/// A single completion request as seen by callers.
#[derive(Debug, Clone, Default)]
pub struct ChatCompletionRequest {
    pub system_message: Option<String>,
    pub user_message: String,
    pub model_name: Option<String>,
    pub response_format: Option<ResponseFormat>,
    pub model_parameters: Option<ModelParameters>,
}

/// Generation parameters forwarded verbatim to the provider.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelParameters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResponseFormat {
    #[serde(rename = "type")]
    pub format_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_schema: Option<JsonSchemaFormat>,
}

impl ResponseFormat {
    pub fn json_schema(name: impl Into<String>, schema: serde_json::Value, strict: bool) -> Self {
        Self {
            format_type: "json_schema".to_string(),
            json_schema: Some(JsonSchemaFormat {
                name: name.into(),
                strict,
                schema,
            }),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct JsonSchemaFormat {
    pub name: String,
    pub strict: bool,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

impl ChatCompletionResponse {
    /// Content of the first choice, if any.
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|c| c.message.content.as_deref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub role: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    #[serde(flatten)]
    parameters: ModelParameters,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<&'a ResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: Role,
    content: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "lowercase")]
enum Role {
    System,
    User,
}

// ============================================================================
// Client
// ============================================================================

/// OpenRouter client for chat completions.
#[derive(Clone)]
pub struct OpenRouterClient {
    client: Client,
    config: GatewayConfig,
    connected: Arc<AtomicBool>,
}

impl OpenRouterClient {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build OpenRouter HTTP client: {}", e))?;

        Ok(Self {
            client,
            config,
            connected: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Delay before the retry following the given zero-based attempt.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = self.config.backoff_multiplier.powi(attempt as i32);
        let millis = self.config.retry_delay.as_millis() as f64 * factor;
        Duration::from_millis(millis.round() as u64)
    }

    async fn send_once(
        &self,
        request: &WireRequest<'_>,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let response = self
            .client
            .post(self.config.completions_url())
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(request)
            .send()
            .await
            .map_err(GatewayError::from_transport)?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatewayError::from_status(status, &error_text));
        }

        response.json().await.map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Unexpected,
                format!("Failed to parse OpenRouter response: {}", e),
            )
        })
    }
}

#[async_trait]
impl ChatCompletion for OpenRouterClient {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn create_chat_completion(
        &self,
        request: ChatCompletionRequest,
    ) -> Result<ChatCompletionResponse, GatewayError> {
        let user_message = sanitize_message(&request.user_message);
        if user_message.is_empty() {
            return Err(GatewayError::validation("userMessage must not be empty"));
        }
        if let Some(format) = &request.response_format {
            validate_response_format(format)?;
        }

        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_message.as_deref().map(sanitize_message) {
            if !system.is_empty() {
                messages.push(Message {
                    role: Role::System,
                    content: system,
                });
            }
        }
        messages.push(Message {
            role: Role::User,
            content: user_message,
        });

        let model = request
            .model_name
            .as_deref()
            .unwrap_or(&self.config.default_model);
        let wire = WireRequest {
            model,
            messages,
            parameters: request.model_parameters.clone().unwrap_or_default(),
            response_format: request.response_format.as_ref(),
        };

        let attempts = self.config.max_retries + 1;
        let mut attempt = 0;
        loop {
            debug!(
                "Sending request to OpenRouter: model={} attempt={}/{}",
                model,
                attempt + 1,
                attempts
            );

            match self.send_once(&wire).await {
                Ok(response) => {
                    self.connected.store(true, Ordering::Relaxed);
                    if let Some(usage) = &response.usage {
                        info!(
                            "OpenRouter response: {} tokens (prompt: {}, completion: {})",
                            usage.total_tokens, usage.prompt_tokens, usage.completion_tokens
                        );
                    }
                    return Ok(response);
                }
                Err(err) => {
                    self.connected.store(false, Ordering::Relaxed);

                    if !err.is_retryable() || attempt + 1 >= attempts {
                        warn!(
                            "OpenRouter request failed after {} attempt(s): {}",
                            attempt + 1,
                            err
                        );
                        return Err(err);
                    }

                    let delay = self.backoff_delay(attempt);
                    warn!(
                        "OpenRouter attempt {}/{} failed ({}), retrying in {:?}",
                        attempt + 1,
                        attempts,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

fn validate_response_format(format: &ResponseFormat) -> Result<(), GatewayError> {
    if format.format_type != "json_schema" {
        return Err(GatewayError::validation(format!(
            "Unsupported response_format type: {}",
            format.format_type
        )));
    }

    let schema = format
        .json_schema
        .as_ref()
        .ok_or_else(|| GatewayError::validation("response_format.json_schema is required"))?;

    if schema.name.trim().is_empty() {
        return Err(GatewayError::validation("json_schema.name is required"));
    }
    if !schema.schema.is_object() {
        return Err(GatewayError::validation("json_schema.schema must be a JSON object"));
    }
    serde_json::to_string(&schema.schema)
        .map_err(|e| GatewayError::validation(format!("json_schema.schema is not serializable: {}", e)))?;

    Ok(())
}

/// Remove control characters, cap length and trim.
///
/// Line breaks and tabs become spaces so adjacent words stay separated; every
/// other character in 0x00-0x1F and 0x7F is dropped. Applying it twice is the
/// same as applying it once.
pub fn sanitize_message(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter_map(|c| match c {
            '\n' | '\r' | '\t' => Some(' '),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => None,
            c => Some(c),
        })
        .take(MAX_MESSAGE_CHARS)
        .collect();

    cleaned.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_client(base_url: &str, max_retries: u32) -> OpenRouterClient {
        let mut config = GatewayConfig::with_base_url("test-key", base_url);
        config.max_retries = max_retries;
        config.retry_delay = Duration::from_millis(1);
        OpenRouterClient::new(config).unwrap()
    }

    fn completion_body(content: &str) -> serde_json::Value {
        json!({
            "id": "gen-1",
            "model": "openai/gpt-4o-mini",
            "choices": [{
                "message": {"role": "assistant", "content": content},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        })
    }

    fn request(user: &str) -> ChatCompletionRequest {
        ChatCompletionRequest {
            system_message: Some("Be terse.".to_string()),
            user_message: user.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_sanitize_strips_controls_and_trims() {
        assert_eq!(sanitize_message("  a\u{0}b\u{7f}c\u{1b}  "), "abc");
        assert_eq!(sanitize_message("line one\nline two\ttab"), "line one line two tab");
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        let inputs = [
            "plain",
            "  padded \u{1}\n",
            "\u{7f}\u{0}",
            "ends with control \u{2}",
            "zażółć gęślą jaźń\r\n",
        ];
        for input in inputs {
            let once = sanitize_message(input);
            assert_eq!(sanitize_message(&once), once, "input {:?}", input);
        }

        let long = format!("{} tail", "x".repeat(MAX_MESSAGE_CHARS - 1));
        let once = sanitize_message(&long);
        assert_eq!(sanitize_message(&once), once);
    }

    #[test]
    fn test_sanitize_truncates_to_ceiling() {
        let long = "ą".repeat(MAX_MESSAGE_CHARS + 100);
        assert_eq!(sanitize_message(&long).chars().count(), MAX_MESSAGE_CHARS);
    }

    #[test]
    fn test_backoff_grows_exponentially() {
        let mut config = GatewayConfig::with_base_url("k", "http://localhost");
        config.retry_delay = Duration::from_millis(100);
        config.backoff_multiplier = 2.0;
        let client = OpenRouterClient::new(config).unwrap();
        assert_eq!(client.backoff_delay(0), Duration::from_millis(100));
        assert_eq!(client.backoff_delay(1), Duration::from_millis(200));
        assert_eq!(client.backoff_delay(2), Duration::from_millis(400));
    }

    #[test]
    fn test_status_classification() {
        let cases = [
            (400, GatewayErrorKind::InvalidRequest, false),
            (401, GatewayErrorKind::Auth, false),
            (404, GatewayErrorKind::NotFound, false),
            (429, GatewayErrorKind::RateLimitExceeded, true),
            (502, GatewayErrorKind::ServiceUnavailable, true),
            (503, GatewayErrorKind::ServiceUnavailable, true),
            (504, GatewayErrorKind::ServiceUnavailable, true),
            (500, GatewayErrorKind::Api, true),
        ];
        for (status, kind, retryable) in cases {
            let err = GatewayError::from_status(StatusCode::from_u16(status).unwrap(), "{}");
            assert_eq!(err.kind, kind, "status {}", status);
            assert_eq!(err.status, status);
            assert_eq!(err.is_retryable(), retryable, "status {}", status);
        }
    }

    #[test]
    fn test_provider_message_extracted() {
        let err = GatewayError::from_status(
            StatusCode::UNAUTHORIZED,
            r#"{"error":{"message":"No auth credentials found","code":401}}"#,
        );
        assert!(err.message.contains("No auth credentials found"));
        assert!(err.to_string().starts_with("AUTH_ERROR"));
    }

    #[tokio::test]
    async fn test_successful_completion() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(json!({
                "model": "openai/gpt-4o-mini",
                "temperature": 0.2,
                "response_format": {"type": "json_schema", "json_schema": {"name": "recipe", "strict": true}},
                "messages": [
                    {"role": "system", "content": "Be terse."},
                    {"role": "user", "content": "hello world"}
                ]
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("{\"ok\":true}")))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        assert!(!client.is_connected());

        let mut req = request("  hello\u{0} world ");
        req.response_format = Some(ResponseFormat::json_schema(
            "recipe",
            json!({"type": "object"}),
            true,
        ));
        req.model_parameters = Some(ModelParameters {
            temperature: Some(0.2),
            ..Default::default()
        });

        let response = client.create_chat_completion(req).await.unwrap();
        assert_eq!(response.content(), Some("{\"ok\":true}"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_retries_until_ceiling_on_503() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        let err = client
            .create_chat_completion(request("hello"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, GatewayErrorKind::ServiceUnavailable);
        assert_eq!(err.status, 503);
        assert!(!client.is_connected());
        server.verify().await;
    }

    #[tokio::test]
    async fn test_auth_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        let err = client
            .create_chat_completion(request("hello"))
            .await
            .unwrap_err();

        assert_eq!(err.kind, GatewayErrorKind::Auth);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion_body("done")))
            .expect(1)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        let response = client.create_chat_completion(request("hello")).await.unwrap();
        assert_eq!(response.content(), Some("done"));
        assert!(client.is_connected());
    }

    #[tokio::test]
    async fn test_timeout_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(completion_body("late"))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let mut config = GatewayConfig::with_base_url("test-key", server.uri());
        config.timeout = Duration::from_millis(50);
        config.max_retries = 0;
        let client = OpenRouterClient::new(config).unwrap();

        let err = client
            .create_chat_completion(request("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_connection_refused_is_classified() {
        let client = test_client("http://127.0.0.1:1", 0);
        let err = client
            .create_chat_completion(request("hello"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_empty_user_message_rejected_before_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let client = test_client(&server.uri(), 2);
        let err = client
            .create_chat_completion(request(" \n\u{0} "))
            .await
            .unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Validation);
        server.verify().await;
    }

    #[tokio::test]
    async fn test_invalid_response_format_rejected() {
        let client = test_client("http://127.0.0.1:1", 0);

        let mut req = request("hello");
        req.response_format = Some(ResponseFormat {
            format_type: "json_object".to_string(),
            json_schema: None,
        });
        let err = client.create_chat_completion(req).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Validation);

        let mut req = request("hello");
        req.response_format = Some(ResponseFormat::json_schema("", json!({}), true));
        let err = client.create_chat_completion(req).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Validation);

        let mut req = request("hello");
        req.response_format = Some(ResponseFormat::json_schema("recipe", json!("nope"), true));
        let err = client.create_chat_completion(req).await.unwrap_err();
        assert_eq!(err.kind, GatewayErrorKind::Validation);
    }
}
