// Unit Tests for Error Taxonomy
//
// UNIT UNDER TEST: BatchError
//
// BUSINESS RESPONSIBILITY:
//   - Classifies every failure mode for routing, logging, and retry decisions
//   - Maps each failure onto the wire code surfaced in Response.error
//   - Distinguishes transient failures (retried within budget) from
//     terminal ones

use crate::error::{BatchError, ErrorCategory, ErrorSeverity};

fn all_variants() -> Vec<BatchError> {
    vec![
        BatchError::RateLimited {
            retry_after_seconds: 5,
        },
        BatchError::Timeout { timeout_seconds: 30 },
        BatchError::ServerError {
            status: 503,
            message: "unavailable".into(),
        },
        BatchError::ClientError {
            status: 422,
            message: "bad payload".into(),
        },
        BatchError::RequestFailed {
            message: "connection reset".into(),
            source: None,
        },
        BatchError::ParseError {
            message: "not json".into(),
        },
        BatchError::MissingInBatchResponse { index: 3 },
        BatchError::Cancelled,
        BatchError::QueueFull { depth: 1000 },
        BatchError::ConfigurationError {
            message: "no key".into(),
        },
    ]
}

#[test]
fn test_wire_codes_cover_taxonomy() {
    let codes: Vec<&str> = all_variants().iter().map(BatchError::wire_code).collect();
    assert_eq!(
        codes,
        vec![
            "rate_limited",
            "timeout",
            "server_error",
            "client_error",
            "server_error",
            "parse_error",
            "missing_in_batch_response",
            "cancelled",
            "queue_full",
            "client_error",
        ]
    );
}

#[test]
fn test_retryability_matches_retry_policy() {
    // Transient endpoint failures retry; everything else is terminal.
    assert!(BatchError::rate_limited(1).is_retryable());
    assert!(BatchError::timeout(30).is_retryable());
    assert!(BatchError::server_error(500, "boom").is_retryable());
    assert!(BatchError::request_failed("connection reset", None).is_retryable());

    assert!(!BatchError::client_error(400, "bad").is_retryable());
    assert!(!BatchError::parse_error("not json").is_retryable());
    assert!(!BatchError::missing_in_batch_response(0).is_retryable());
    assert!(!BatchError::Cancelled.is_retryable());
    assert!(!BatchError::queue_full(10).is_retryable());
    assert!(!BatchError::configuration_error("no key").is_retryable());
}

#[test]
fn test_categories_route_failures() {
    assert_eq!(
        BatchError::rate_limited(1).category(),
        ErrorCategory::Transient
    );
    assert_eq!(BatchError::timeout(1).category(), ErrorCategory::Transient);
    assert_eq!(
        BatchError::server_error(502, "gateway").category(),
        ErrorCategory::External
    );
    assert_eq!(
        BatchError::parse_error("junk").category(),
        ErrorCategory::External
    );
    assert_eq!(
        BatchError::client_error(401, "denied").category(),
        ErrorCategory::Client
    );
    assert_eq!(
        BatchError::configuration_error("bad").category(),
        ErrorCategory::Client
    );
    assert_eq!(BatchError::Cancelled.category(), ErrorCategory::Lifecycle);
    assert_eq!(
        BatchError::queue_full(5).category(),
        ErrorCategory::Lifecycle
    );
}

#[test]
fn test_severity_for_alerting() {
    assert_eq!(
        BatchError::rate_limited(1).severity(),
        ErrorSeverity::Warning
    );
    assert_eq!(
        BatchError::server_error(500, "boom").severity(),
        ErrorSeverity::Error
    );
    assert_eq!(BatchError::Cancelled.severity(), ErrorSeverity::Info);
    assert_eq!(BatchError::queue_full(1).severity(), ErrorSeverity::Info);
}

#[test]
fn test_display_carries_context() {
    let err = BatchError::rate_limited(60);
    assert!(err.to_string().contains("60"));

    let err = BatchError::server_error(503, "overloaded");
    let text = err.to_string();
    assert!(text.contains("503") && text.contains("overloaded"));

    let err = BatchError::missing_in_batch_response(7);
    assert!(err.to_string().contains("7"));
}
