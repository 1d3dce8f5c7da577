//! Error types for batch processing operations.
//!
//! This module provides structured error handling for batch-llm operations,
//! including categorization, severity levels, and retry guidance.
//!
//! # Error Types
//!
//! The main error type is [`BatchError`], which covers all failure modes:
//! - Configuration errors (missing API keys, invalid settings)
//! - Endpoint failures (rate limits, timeouts, server and client errors)
//! - Response decoding failures for bundled calls
//! - Admission refusal when the optional queue ceiling is exceeded
//! - Cancellation during shutdown
//!
//! # Error Handling Example
//!
//! ```rust,no_run
//! use batch_llm::{BatchError, BatchResult};
//!
//! fn handle_error(err: BatchError) {
//!     if err.is_retryable() {
//!         println!("Retryable error: {}", err);
//!     }
//!
//!     // The wire code is what lands in `Response.error`
//!     println!("Wire code: {}", err.wire_code());
//!
//!     match err.category() {
//!         batch_llm::error::ErrorCategory::Transient => {
//!             println!("Temporary issue, try again later");
//!         }
//!         batch_llm::error::ErrorCategory::Client => {
//!             println!("Fix the request and try again");
//!         }
//!         _ => {
//!             println!("System issue, contact support");
//!         }
//!     }
//! }
//! ```
//!
//! # Result Type
//!
//! Use [`BatchResult<T>`] as a convenient alias for `Result<T, BatchError>`.

use crate::logging::{log_error, log_warn};
use thiserror::Error;

// ============================================================================
// Error categorization types
// ============================================================================

/// High-level categorization of errors for routing and handling decisions.
///
/// Use [`BatchError::category()`] to get the category for any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// External service failures (the completion endpoint, network issues).
    ///
    /// The endpoint or network had an issue. May be transient or indicate
    /// a provider outage.
    External,

    /// Internal system errors (bugs, invariant violations).
    Internal,

    /// Client errors (invalid input, authentication, configuration).
    ///
    /// The caller made a mistake that they can fix (wrong API key,
    /// malformed payload, etc.).
    Client,

    /// Temporary failures that should be retried.
    ///
    /// Rate limits, timeouts, and other transient issues. Retry with
    /// exponential backoff.
    Transient,

    /// Expected lifecycle outcomes (shutdown, admission refusal).
    Lifecycle,
}

/// Severity level for logging and alerting decisions.
///
/// Use [`BatchError::severity()`] to get the severity for any error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// Action failed but system is stable.
    Error,

    /// Unexpected but recoverable situation.
    Warning,

    /// Expected failure (e.g., cancellation, queue ceiling).
    Info,
}

// ============================================================================
// Batch error types
// ============================================================================

/// Convenient result type for batch operations.
///
/// Alias for `Result<T, BatchError>`. Use this throughout your application
/// for consistent error handling.
pub type BatchResult<T> = std::result::Result<T, BatchError>;

/// Errors that can occur during batch processing.
///
/// Each variant can be:
/// - Categorized via [`category()`](Self::category)
/// - Assessed for severity via [`severity()`](Self::severity)
/// - Checked for retryability via [`is_retryable()`](Self::is_retryable)
/// - Converted to the `Response.error` wire code via
///   [`wire_code()`](Self::wire_code)
///
/// # Creating Errors
///
/// Use the constructor methods which automatically log the error:
///
/// ```rust
/// use batch_llm::BatchError;
///
/// let err = BatchError::rate_limited(60);
/// let err = BatchError::timeout(30);
/// let err = BatchError::configuration_error("Missing API key");
/// ```
///
/// # Error Categories
///
/// | Variant | Category | Retryable | Wire code |
/// |---------|----------|-----------|-----------|
/// | `RateLimited` | Transient | Yes | `rate_limited` |
/// | `Timeout` | Transient | Yes | `timeout` |
/// | `ServerError` | External | Yes | `server_error` |
/// | `RequestFailed` | External | Yes | `server_error` |
/// | `ClientError` | Client | No | `client_error` |
/// | `ParseError` | External | No | `parse_error` |
/// | `MissingInBatchResponse` | External | No | `missing_in_batch_response` |
/// | `Cancelled` | Lifecycle | No | `cancelled` |
/// | `QueueFull` | Lifecycle | No | `queue_full` |
/// | `ConfigurationError` | Client | No | `client_error` |
#[derive(Error, Debug)]
pub enum BatchError {
    /// The endpoint refused the call with a rate limit.
    ///
    /// Carries the server-advised delay (from `Retry-After`) which the
    /// retry path honors verbatim, taking precedence over local backoff.
    #[error("Rate limited by endpoint, retry after {retry_after_seconds}s")]
    RateLimited {
        /// Server-advised wait before retrying.
        retry_after_seconds: u64,
    },

    /// A call attempt exceeded its per-attempt deadline.
    #[error("Request timed out after {timeout_seconds}s")]
    Timeout {
        /// The deadline that was exceeded.
        timeout_seconds: u64,
    },

    /// The endpoint returned a 5xx status.
    #[error("Endpoint server error {status}: {message}")]
    ServerError {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The endpoint returned a 4xx status other than a rate refusal.
    ///
    /// Terminal: the request will not be retried.
    #[error("Endpoint client error {status}: {message}")]
    ClientError {
        /// HTTP status code.
        status: u16,
        /// Response body or status text.
        message: String,
    },

    /// The HTTP request could not be executed (network, DNS, TLS).
    ///
    /// Treated as a transient endpoint failure and retried within budget.
    #[error("Request failed: {message}")]
    RequestFailed {
        /// Description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Response content could not be decoded for a bundled call.
    ///
    /// Bundled classification and task-extraction calls require a JSON
    /// object reply; anything else is terminal for the sub-batch.
    #[error("Response parsing failed: {message}")]
    ParseError {
        /// Details about the decoding failure.
        message: String,
    },

    /// Decomposition could not locate a per-request result.
    ///
    /// The bundled reply decoded, but the entry for this request's index
    /// was absent or mismatched.
    #[error("No result for index {index} in batch response")]
    MissingInBatchResponse {
        /// The request's position within the bundled call.
        index: usize,
    },

    /// The request was cancelled by shutdown.
    #[error("Cancelled by shutdown")]
    Cancelled,

    /// Admission refused: the queue has reached its configured ceiling.
    #[error("Queue full at depth {depth}")]
    QueueFull {
        /// Queue depth at the moment of refusal.
        depth: usize,
    },

    /// Configuration is invalid or incomplete.
    #[error("Configuration error: {message}")]
    ConfigurationError {
        /// Description of the configuration problem.
        message: String,
    },
}

impl BatchError {
    /// Get the error category for routing and handling decisions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::RateLimited { .. } => ErrorCategory::Transient,
            Self::Timeout { .. } => ErrorCategory::Transient,
            Self::ServerError { .. } => ErrorCategory::External,
            Self::ClientError { .. } => ErrorCategory::Client,
            Self::RequestFailed { .. } => ErrorCategory::External,
            Self::ParseError { .. } => ErrorCategory::External,
            Self::MissingInBatchResponse { .. } => ErrorCategory::External,
            Self::Cancelled => ErrorCategory::Lifecycle,
            Self::QueueFull { .. } => ErrorCategory::Lifecycle,
            Self::ConfigurationError { .. } => ErrorCategory::Client,
        }
    }

    /// Get the error severity for logging and alerting.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RateLimited { .. } => ErrorSeverity::Warning,
            Self::Timeout { .. } => ErrorSeverity::Warning,
            Self::ServerError { .. } => ErrorSeverity::Error,
            Self::ClientError { .. } => ErrorSeverity::Error,
            Self::RequestFailed { .. } => ErrorSeverity::Error,
            Self::ParseError { .. } => ErrorSeverity::Warning,
            Self::MissingInBatchResponse { .. } => ErrorSeverity::Warning,
            Self::Cancelled => ErrorSeverity::Info,
            Self::QueueFull { .. } => ErrorSeverity::Info,
            Self::ConfigurationError { .. } => ErrorSeverity::Error,
        }
    }

    /// Whether this error is transient and should trigger a retry.
    ///
    /// Returns `true` for rate refusals, timeouts, 5xx statuses, and
    /// transport failures. Client errors, parse failures, cancellation,
    /// and admission refusal are terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::Timeout { .. }
                | Self::ServerError { .. }
                | Self::RequestFailed { .. }
        )
    }

    /// The machine-readable code surfaced in `Response.error`.
    pub fn wire_code(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::ServerError { .. } | Self::RequestFailed { .. } => "server_error",
            Self::ClientError { .. } | Self::ConfigurationError { .. } => "client_error",
            Self::ParseError { .. } => "parse_error",
            Self::MissingInBatchResponse { .. } => "missing_in_batch_response",
            Self::Cancelled => "cancelled",
            Self::QueueFull { .. } => "queue_full",
        }
    }

    // =========================================================================
    // Constructor methods with automatic logging
    // =========================================================================
    //
    // These methods automatically log the error at the appropriate level.
    // Use them instead of constructing variants directly.

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        log_warn!(
            error_type = "rate_limited",
            retry_after_seconds = retry_after_seconds,
            "Endpoint rate limit hit"
        );
        Self::RateLimited {
            retry_after_seconds,
        }
    }

    pub fn timeout(timeout_seconds: u64) -> Self {
        log_warn!(
            error_type = "timeout",
            timeout_seconds = timeout_seconds,
            "Endpoint call timed out"
        );
        Self::Timeout { timeout_seconds }
    }

    pub fn server_error(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "server_error",
            status = status,
            message = %message,
            "Endpoint returned server error"
        );
        Self::ServerError { status, message }
    }

    pub fn client_error(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "client_error",
            status = status,
            message = %message,
            "Endpoint rejected request"
        );
        Self::ClientError { status, message }
    }

    pub fn request_failed(
        message: impl Into<String>,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        let message = message.into();
        log_error!(
            error_type = "request_failed",
            message = %message,
            has_source = source.is_some(),
            "Endpoint request execution failed"
        );
        Self::RequestFailed { message, source }
    }

    pub fn parse_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_warn!(
            error_type = "parse_error",
            message = %message,
            "Bundled response format invalid"
        );
        Self::ParseError { message }
    }

    pub fn missing_in_batch_response(index: usize) -> Self {
        log_warn!(
            error_type = "missing_in_batch_response",
            index = index,
            "Bundled response missing per-request entry"
        );
        Self::MissingInBatchResponse { index }
    }

    pub fn queue_full(depth: usize) -> Self {
        log_warn!(
            error_type = "queue_full",
            depth = depth,
            "Admission refused by queue ceiling"
        );
        Self::QueueFull { depth }
    }

    pub fn configuration_error(message: impl Into<String>) -> Self {
        let message = message.into();
        log_error!(
            error_type = "configuration_error",
            message = %message,
            "Configuration validation failed"
        );
        Self::ConfigurationError { message }
    }
}
