//! Request and response data model.
//!
//! A [`Request`] is created on admission, lives in exactly one priority
//! bucket until assembly, transfers to a batch worker, and is released
//! after exactly one [`Response`] delivery through its [`ResponseSink`].
//!
//! Payloads are tagged variants ([`RequestPayload`]) carrying exactly the
//! fields their composer reads; [`RequestPayload::from_value`] accepts the
//! loose key/value map form and validates it on entry.

use crate::error::{BatchError, BatchResult};
use crate::logging::{log_debug, log_error, log_warn};
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Process-local admission sequence, folded into request ids so two
/// identical payloads admitted in the same nanosecond still differ.
static ADMISSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Request type tag. Determines the composition strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    /// Bundled email classification.
    Classification,
    /// Bundled task extraction (sub-chunked at 5 per call).
    TaskExtraction,
    /// Per-request draft generation, fanned out within the worker.
    DraftGeneration,
    /// Per-request pass-through call.
    Generic,
}

impl RequestType {
    /// Type tag used in logs, ids, and the map-form `submit` surface.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Classification => "classification",
            Self::TaskExtraction => "task_extraction",
            Self::DraftGeneration => "draft_generation",
            Self::Generic => "generic",
        }
    }

    /// Whether multiple requests of this type merge into one endpoint call.
    pub fn is_bundled(&self) -> bool {
        matches!(self, Self::Classification | Self::TaskExtraction)
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One chat message in a draft or generic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message role: "system", "user", or "assistant".
    pub role: String,
    /// Message text.
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Typed request payload; each variant carries exactly the fields its
/// composer reads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RequestPayload {
    /// One email to classify.
    Classification {
        subject: String,
        sender: String,
        body: String,
    },
    /// One email body to mine for tasks.
    TaskExtraction { body: String },
    /// A reply draft to generate from conversation context.
    DraftGeneration {
        messages: Vec<ChatMessage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },
    /// A pass-through chat call.
    Generic {
        messages: Vec<ChatMessage>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        temperature: Option<f64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        max_tokens: Option<u32>,
    },
}

/// Payload keys stripped before fingerprinting and ignored on map-form
/// entry. These vary between submissions of identical content.
const VOLATILE_KEYS: &[&str] = &["timestamp", "id"];

impl RequestPayload {
    /// The request type this payload belongs to.
    pub fn request_type(&self) -> RequestType {
        match self {
            Self::Classification { .. } => RequestType::Classification,
            Self::TaskExtraction { .. } => RequestType::TaskExtraction,
            Self::DraftGeneration { .. } => RequestType::DraftGeneration,
            Self::Generic { .. } => RequestType::Generic,
        }
    }

    /// Validate a loose key/value map into a typed payload.
    ///
    /// Volatile keys (`timestamp`, `id`) are accepted and stripped; any
    /// other unrecognized key is rejected so malformed submissions fail on
    /// admission rather than at composition time.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ConfigurationError`] when the value is not an
    /// object, a required field is missing, or a field has the wrong type.
    pub fn from_value(request_type: RequestType, value: serde_json::Value) -> BatchResult<Self> {
        let serde_json::Value::Object(mut map) = value else {
            return Err(BatchError::configuration_error(format!(
                "{request_type} payload must be a JSON object"
            )));
        };
        for key in VOLATILE_KEYS {
            map.remove(*key);
        }

        match request_type {
            RequestType::Classification => {
                let subject = take_string(&mut map, "subject", request_type)?;
                let sender = take_string(&mut map, "sender", request_type)?;
                let body = take_string(&mut map, "body", request_type)?;
                reject_unknown_keys(&map, request_type)?;
                Ok(Self::Classification {
                    subject,
                    sender,
                    body,
                })
            }
            RequestType::TaskExtraction => {
                let body = take_string(&mut map, "body", request_type)?;
                reject_unknown_keys(&map, request_type)?;
                Ok(Self::TaskExtraction { body })
            }
            RequestType::DraftGeneration => {
                let messages = take_messages(&mut map, request_type)?;
                let (model, temperature, max_tokens) = take_call_params(&mut map, request_type)?;
                reject_unknown_keys(&map, request_type)?;
                Ok(Self::DraftGeneration {
                    messages,
                    model,
                    temperature,
                    max_tokens,
                })
            }
            RequestType::Generic => {
                let messages = take_messages(&mut map, request_type)?;
                let (model, temperature, max_tokens) = take_call_params(&mut map, request_type)?;
                reject_unknown_keys(&map, request_type)?;
                Ok(Self::Generic {
                    messages,
                    model,
                    temperature,
                    max_tokens,
                })
            }
        }
    }

    /// Canonical JSON used by the fingerprint functions. Struct field
    /// order is fixed by the type definitions, so the output is stable
    /// for equal payloads.
    fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

fn take_string(
    map: &mut serde_json::Map<String, serde_json::Value>,
    key: &str,
    request_type: RequestType,
) -> BatchResult<String> {
    match map.remove(key) {
        Some(serde_json::Value::String(s)) => Ok(s),
        Some(_) => Err(BatchError::configuration_error(format!(
            "{request_type} payload field '{key}' must be a string"
        ))),
        None => Err(BatchError::configuration_error(format!(
            "{request_type} payload is missing required field '{key}'"
        ))),
    }
}

fn take_messages(
    map: &mut serde_json::Map<String, serde_json::Value>,
    request_type: RequestType,
) -> BatchResult<Vec<ChatMessage>> {
    let value = map.remove("messages").ok_or_else(|| {
        BatchError::configuration_error(format!(
            "{request_type} payload is missing required field 'messages'"
        ))
    })?;
    serde_json::from_value(value).map_err(|e| {
        BatchError::configuration_error(format!(
            "{request_type} payload field 'messages' is malformed: {e}"
        ))
    })
}

fn take_call_params(
    map: &mut serde_json::Map<String, serde_json::Value>,
    request_type: RequestType,
) -> BatchResult<(Option<String>, Option<f64>, Option<u32>)> {
    let model = match map.remove("model") {
        None => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(_) => {
            return Err(BatchError::configuration_error(format!(
                "{request_type} payload field 'model' must be a string"
            )))
        }
    };
    let temperature = match map.remove("temperature") {
        None => None,
        Some(value) => Some(value.as_f64().ok_or_else(|| {
            BatchError::configuration_error(format!(
                "{request_type} payload field 'temperature' must be a number"
            ))
        })?),
    };
    let max_tokens = match map.remove("max_tokens") {
        None => None,
        Some(value) => Some(
            value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    BatchError::configuration_error(format!(
                        "{request_type} payload field 'max_tokens' must be an unsigned integer"
                    ))
                })?,
        ),
    };
    Ok((model, temperature, max_tokens))
}

fn reject_unknown_keys(
    map: &serde_json::Map<String, serde_json::Value>,
    request_type: RequestType,
) -> BatchResult<()> {
    if let Some(key) = map.keys().next() {
        return Err(BatchError::configuration_error(format!(
            "{request_type} payload has unrecognized field '{key}'"
        )));
    }
    Ok(())
}

/// Content fingerprint over `(type, payload)` with volatile fields already
/// stripped by the typed representation. Identical content in the same TTL
/// window deduplicates on this key.
pub fn dedup_key(request_type: RequestType, payload: &RequestPayload) -> String {
    let mut hasher = Sha256::new();
    hasher.update(request_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload.canonical_json().as_bytes());
    hex::encode(hasher.finalize())
}

/// Globally unique request identifier derived from `(type, payload,
/// submit time)` plus a process-local sequence.
pub fn request_id(request_type: RequestType, payload: &RequestPayload) -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    let seq = ADMISSION_SEQ.fetch_add(1, Ordering::Relaxed);

    let mut hasher = Sha256::new();
    hasher.update(request_type.as_str().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload.canonical_json().as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(seq.to_le_bytes());
    hex::encode(hasher.finalize())
}

/// One admitted request, queued until a worker takes it.
pub struct Request {
    /// Stable identifier, unique across the process lifetime.
    pub id: String,
    /// Type tag selecting the composition strategy.
    pub request_type: RequestType,
    /// The typed payload.
    pub payload: RequestPayload,
    /// Priority in `[1, 10]`; higher is served sooner within a scan pass.
    pub priority: u8,
    /// Monotonic admission instant; drives age-based release.
    pub submitted_at: Instant,
    /// Prior attempts for this request. Reserved for requeue flows.
    pub retry_count: u32,
    /// Content fingerprint for dedup and response caching.
    pub dedup_key: String,
    /// One-shot delivery sink, consumed at the terminal outcome.
    pub(crate) sink: Option<ResponseSink>,
}

impl Request {
    /// Create a request at the admission boundary.
    pub(crate) fn new(
        payload: RequestPayload,
        priority: u8,
        sink: Option<ResponseSink>,
    ) -> Self {
        let request_type = payload.request_type();
        Self {
            id: request_id(request_type, &payload),
            dedup_key: dedup_key(request_type, &payload),
            request_type,
            payload,
            priority: priority.clamp(1, 10),
            submitted_at: Instant::now(),
            retry_count: 0,
            sink,
        }
    }

    /// Age of the request relative to `now`.
    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.submitted_at)
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("id", &self.id)
            .field("request_type", &self.request_type)
            .field("priority", &self.priority)
            .field("retry_count", &self.retry_count)
            .field("dedup_key", &self.dedup_key)
            .field("has_sink", &self.sink.is_some())
            .finish_non_exhaustive()
    }
}

/// Terminal result for one request.
///
/// A successful response carries `data` and no `error`; a failed response
/// carries `error` (a wire code from the error taxonomy) and no `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Id of the request this answers. On a dedup short-circuit this is
    /// the originally cached request's id.
    pub request_id: String,
    /// Whether the request succeeded.
    pub success: bool,
    /// Result payload on success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Wire code on failure (`rate_limited`, `timeout`, ...).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Wall time spent processing the batch this request rode in.
    pub processing_time_ms: u64,
    /// Tokens attributed to this request (bundled calls split evenly).
    pub tokens_used: u32,
    /// Estimated cost attributed to this request.
    pub cost_estimate: f64,
}

impl Response {
    /// Successful response.
    pub fn ok(
        request_id: impl Into<String>,
        data: serde_json::Value,
        tokens_used: u32,
        cost_estimate: f64,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
            processing_time_ms,
            tokens_used,
            cost_estimate,
        }
    }

    /// Failed response carrying the error's wire code.
    pub fn failure(
        request_id: impl Into<String>,
        error: &BatchError,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(error.wire_code().to_string()),
            processing_time_ms,
            tokens_used: 0,
            cost_estimate: 0.0,
        }
    }
}

type HandlerFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type Handler = Box<dyn FnOnce(Response) -> HandlerFuture + Send>;

enum SinkKind {
    Channel(oneshot::Sender<Response>),
    Handler(Handler),
}

/// One-shot delivery sink for a request's terminal [`Response`].
///
/// Construct with [`channel()`](Self::channel) to await the response, or
/// [`from_fn()`](Self::from_fn) to run an async callback. Delivery consumes
/// the sink, so each request observes exactly one invocation. Callbacks run
/// outside every internal lock and may re-enter `submit`; errors and panics
/// inside a callback are logged and swallowed.
pub struct ResponseSink {
    kind: SinkKind,
}

impl ResponseSink {
    /// Sink backed by a oneshot channel; the receiver resolves with the
    /// terminal response.
    pub fn channel() -> (Self, oneshot::Receiver<Response>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                kind: SinkKind::Channel(tx),
            },
            rx,
        )
    }

    /// Sink backed by an async callback.
    pub fn from_fn<F, Fut>(callback: F) -> Self
    where
        F: FnOnce(Response) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        Self {
            kind: SinkKind::Handler(Box::new(move |response| Box::pin(callback(response)))),
        }
    }

    /// Deliver the terminal response, consuming the sink.
    pub(crate) async fn deliver(self, response: Response) {
        let request_id = response.request_id.clone();
        match self.kind {
            SinkKind::Channel(tx) => {
                if tx.send(response).is_err() {
                    log_debug!(
                        request_id = %request_id,
                        "Response receiver dropped before delivery"
                    );
                }
            }
            SinkKind::Handler(handler) => {
                let future = match std::panic::catch_unwind(AssertUnwindSafe(move || {
                    handler(response)
                })) {
                    Ok(future) => future,
                    Err(_) => {
                        log_error!(
                            request_id = %request_id,
                            "Response callback panicked while starting"
                        );
                        return;
                    }
                };
                match AssertUnwindSafe(future).catch_unwind().await {
                    Ok(Ok(())) => {}
                    Ok(Err(error)) => {
                        log_warn!(
                            request_id = %request_id,
                            error = %error,
                            "Response callback returned error"
                        );
                    }
                    Err(_) => {
                        log_error!(
                            request_id = %request_id,
                            "Response callback panicked"
                        );
                    }
                }
            }
        }
    }
}

impl std::fmt::Debug for ResponseSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            SinkKind::Channel(_) => f.write_str("ResponseSink::Channel"),
            SinkKind::Handler(_) => f.write_str("ResponseSink::Handler"),
        }
    }
}
