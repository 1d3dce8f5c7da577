//! Completion endpoint abstraction and HTTP implementation.
//!
//! [`CompletionEndpoint`] is the provider seam: one single-attempt
//! `complete` operation. Retry, backoff, and rate limiting live in the
//! endpoint client, so alternate endpoints (tests, local gateways) only
//! implement the wire exchange.

use crate::config::EndpointConfig;
use crate::error::{BatchError, BatchResult};
use crate::logging::{log_debug, log_error};
use crate::request::ChatMessage;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// One composed endpoint call.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionCall {
    /// Model identifier; also selects the tokens-parameter name.
    pub model: String,
    /// Chat messages for the call.
    pub messages: Vec<ChatMessage>,
    /// Sampling temperature.
    pub temperature: f64,
    /// Completion token budget.
    pub max_tokens: u32,
    /// Whether the reply must decode as a JSON object (bundled types).
    pub expects_json: bool,
}

impl CompletionCall {
    /// Content fingerprint over `(model, messages)`, used as the bundle
    /// cache key.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        for message in &self.messages {
            hasher.update(b"\0");
            hasher.update(message.role.as_bytes());
            hasher.update(b"\0");
            hasher.update(message.content.as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// Token usage reported by the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens in the prompt.
    pub prompt_tokens: u32,
    /// Tokens in the completion.
    pub completion_tokens: u32,
    /// Total tokens billed.
    pub total_tokens: u32,
}

/// Result of one completed endpoint call.
#[derive(Debug, Clone)]
pub struct Completion {
    /// Raw reply content.
    pub content: String,
    /// Decoded JSON object, populated by the endpoint client for calls
    /// that expect one.
    pub json: Option<serde_json::Value>,
    /// Token usage for the call.
    pub usage: TokenUsage,
    /// Model that served the call.
    pub model: String,
}

/// Provider seam: a single-attempt chat completion.
#[async_trait::async_trait]
pub trait CompletionEndpoint: Send + Sync {
    /// Execute one attempt of the call.
    ///
    /// Implementations classify failures into the error taxonomy
    /// (`rate_limited` with the server-advised delay, `server_error`,
    /// `client_error`, transport failures) and never retry internally.
    async fn complete(&self, call: &CompletionCall) -> BatchResult<Completion>;

    /// Endpoint name for logging and debugging.
    fn name(&self) -> &'static str;
}

// ============================================================================
// Wire types
// ============================================================================

/// Chat-completion request body.
///
/// Exactly one of `max_tokens` / `max_completion_tokens` is set; newer
/// model families renamed the parameter and reject the old one.
#[derive(Debug, Clone, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_completion_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<WireResponseFormat>,
}

#[derive(Debug, Clone, Serialize)]
struct WireResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
    total_tokens: u32,
}

// ============================================================================
// HTTP endpoint
// ============================================================================

/// HTTP chat-completion endpoint with bearer authentication.
pub struct HttpEndpoint {
    client: reqwest::Client,
    config: EndpointConfig,
}

impl HttpEndpoint {
    /// Create an endpoint from validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ConfigurationError`] when the API key is
    /// missing.
    pub fn new(config: EndpointConfig) -> BatchResult<Self> {
        config.validate()?;
        log_debug!(
            base_url = %config.base_url,
            "Creating HTTP completion endpoint"
        );
        Ok(Self {
            client: reqwest::Client::new(),
            config,
        })
    }

    /// Build authentication headers for the chat-completion endpoint.
    pub fn build_auth_headers(api_key: &str) -> BatchResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {api_key}")).map_err(|e| {
                BatchError::configuration_error(format!("Invalid API key format: {e}"))
            })?,
        );
        Ok(headers)
    }

    /// Newer model families take `max_completion_tokens`; everything else
    /// takes `max_tokens`.
    fn uses_completion_tokens_param(model: &str) -> bool {
        model.starts_with("gpt-5") || model.starts_with('o')
    }

    fn wire_request<'a>(call: &'a CompletionCall) -> WireRequest<'a> {
        let completion_style = Self::uses_completion_tokens_param(&call.model);
        WireRequest {
            model: &call.model,
            messages: &call.messages,
            temperature: call.temperature,
            max_tokens: (!completion_style).then_some(call.max_tokens),
            max_completion_tokens: completion_style.then_some(call.max_tokens),
            response_format: call
                .expects_json
                .then_some(WireResponseFormat {
                    format_type: "json_object",
                }),
        }
    }
}

#[async_trait::async_trait]
impl CompletionEndpoint for HttpEndpoint {
    async fn complete(&self, call: &CompletionCall) -> BatchResult<Completion> {
        let url = format!("{}/v1/chat/completions", self.config.base_url);
        let headers =
            Self::build_auth_headers(self.config.api_key.as_deref().unwrap_or_default())?;
        let body = Self::wire_request(call);

        log_debug!(
            model = %call.model,
            message_count = call.messages.len(),
            max_tokens = call.max_tokens,
            expects_json = call.expects_json,
            "Sending chat-completion request"
        );

        let response = self
            .client
            .post(&url)
            .headers(headers)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                log_error!(
                    url = %url,
                    error = %e,
                    "HTTP request failed"
                );
                BatchError::request_failed(format!("Request failed: {e}"), Some(Box::new(e)))
            })?;

        if !response.status().is_success() {
            return Err(classify_error_response(response).await);
        }

        parse_success_response(response, call).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}

/// Map a non-success HTTP response onto the error taxonomy.
async fn classify_error_response(response: reqwest::Response) -> BatchError {
    let status = response.status();
    let headers = response.headers().clone();
    let error_text = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());

    match status.as_u16() {
        429 => {
            let retry_after_seconds = headers
                .get("retry-after")
                .and_then(|h| h.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(60);
            BatchError::rate_limited(retry_after_seconds)
        }
        s if s >= 500 => BatchError::server_error(s, error_text),
        s => BatchError::client_error(s, error_text),
    }
}

/// Parse a successful HTTP response into a [`Completion`].
async fn parse_success_response(
    response: reqwest::Response,
    call: &CompletionCall,
) -> BatchResult<Completion> {
    let raw_body = response.text().await.map_err(|e| {
        log_error!(
            error = %e,
            "Failed to read response body"
        );
        BatchError::parse_error(format!("Failed to read response: {e}"))
    })?;

    let wire: WireResponse = serde_json::from_str(&raw_body).map_err(|e| {
        log_error!(
            error = %e,
            raw_body = %raw_body,
            "Failed to parse response"
        );
        BatchError::parse_error(format!("Invalid response: {e}"))
    })?;

    let choice = wire
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| BatchError::parse_error("No choices in completion response"))?;

    let usage = wire
        .usage
        .map(|u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        })
        .unwrap_or_default();

    Ok(Completion {
        content: choice.message.content,
        json: None,
        usage,
        model: call.model.clone(),
    })
}
