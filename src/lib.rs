//! # batch-llm
//!
//! Priority-aware batching and dispatch engine for LLM-backed email
//! intelligence.
//!
//! ## Key Features
//!
//! - **Cost-efficient bundling**: classification and task-extraction
//!   requests merge into single endpoint calls
//! - **Priority scheduling**: ten priority buckets with pluggable release
//!   strategies (size, time, hybrid, priority tiers)
//! - **Deduplication**: content-fingerprint response cache short-circuits
//!   repeat submissions within the TTL window
//! - **Resilience**: sliding-window rate limiting, bounded retries with
//!   capped backoff, server-advised delay precedence
//! - **One-shot delivery**: every submitted request produces exactly one
//!   response through its callback sink
//!
//! ## Example
//!
//! ```rust,no_run
//! use batch_llm::{
//!     BatchProcessor, EndpointConfig, ProcessorConfig, RequestPayload, ResponseSink,
//!     DEFAULT_PRIORITY,
//! };
//!
//! # async fn example() -> batch_llm::BatchResult<()> {
//! let processor = BatchProcessor::with_http_endpoint(
//!     ProcessorConfig::default(),
//!     EndpointConfig::from_env()?,
//! )?;
//! processor.start().await;
//!
//! let (sink, receiver) = ResponseSink::channel();
//! let request_id = processor
//!     .submit(
//!         RequestPayload::Classification {
//!             subject: "Renewal deadline".into(),
//!             sender: "legal@example.com".into(),
//!             body: "The contract renews on Friday unless we opt out.".into(),
//!         },
//!         DEFAULT_PRIORITY,
//!         Some(sink),
//!     )
//!     .await?;
//!
//! let response = receiver.await.expect("processor delivers exactly once");
//! println!("{} -> success={}", request_id, response.success);
//! processor.stop().await;
//! # Ok(())
//! # }
//! ```

// Allow missing errors documentation - errors are self-documenting via type signatures
#![allow(clippy::missing_errors_doc)]

// =============================================================================
// Module declarations
// =============================================================================

// Public modules - flattened structure
pub mod config;
pub mod endpoint;
pub mod error;
pub mod metrics;
pub mod processor;
pub mod request;

// Internal modules
pub(crate) mod assembler;
pub(crate) mod cache;
pub(crate) mod client;
pub(crate) mod compose;
pub(crate) mod logging;
pub(crate) mod queue;
pub(crate) mod ratelimit;
pub(crate) mod response_parser;
pub(crate) mod worker;

#[cfg(test)]
pub mod tests;

// =============================================================================
// Public API re-exports
// =============================================================================

// Processor
pub use processor::{BatchProcessor, DEFAULT_PRIORITY};

// Configuration
pub use config::{
    BatchStrategy, EndpointConfig, ModelPricing, ModelSelection, PricingTable, ProcessorConfig,
    RetryPolicy,
};

// Errors
pub use error::{BatchError, BatchResult};

// Requests and responses - the caller-facing data model
pub use request::{ChatMessage, Request, RequestPayload, RequestType, Response, ResponseSink};

// Endpoint seam
pub use endpoint::{Completion, CompletionCall, CompletionEndpoint, HttpEndpoint, TokenUsage};

// Metrics
pub use metrics::MetricsSnapshot;
