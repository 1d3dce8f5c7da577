//! Configuration types for the batch processor.
//!
//! This module provides the immutable configuration bundle captured at
//! construction: batching knobs, rate caps, retry policy, cache behavior,
//! model selection, and the pricing table used for cost estimation.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use batch_llm::{BatchStrategy, EndpointConfig, ProcessorConfig};
//!
//! let config = ProcessorConfig {
//!     batch_size: 10,
//!     strategy: BatchStrategy::Hybrid,
//!     ..Default::default()
//! };
//! config.validate()?;
//!
//! // Endpoint credentials from OPENAI_API_KEY / OPENAI_BASE_URL
//! let endpoint = EndpointConfig::from_env()?;
//! # Ok::<(), batch_llm::BatchError>(())
//! ```
//!
//! All fields are plain data; the processor captures the config once and
//! never mutates it, so no synchronization is required.

use crate::error::{BatchError, BatchResult};
use crate::logging::log_debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Batching strategy applied by the scan loop when releasing requests.
///
/// Selected once at construction. See the per-variant docs for the release
/// predicate each strategy applies to a priority bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStrategy {
    /// Release full batches of `batch_size`, repeatedly, until no bucket
    /// can fill. Smaller residuals remain queued.
    ///
    /// Starvation-prone by design: a partial batch waits indefinitely if
    /// no further submissions arrive. Use [`Hybrid`](Self::Hybrid) or
    /// [`TimeBased`](Self::TimeBased) when liveness matters.
    SizeBased,
    /// Release up to one batch per bucket once its oldest request reaches
    /// `batch_timeout` in age.
    TimeBased,
    /// Per bucket: a full batch when the size threshold is met, else a
    /// partial batch when the age condition is met. At most one batch per
    /// bucket per scan.
    Hybrid,
    /// Priority tiers: buckets at priority 8+ drain completely, 5-7
    /// release once half-full, below 5 only full batches release.
    Priority,
}

impl BatchStrategy {
    /// Strategy tag used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SizeBased => "size_based",
            Self::TimeBased => "time_based",
            Self::Hybrid => "hybrid",
            Self::Priority => "priority",
        }
    }
}

/// Retry policy for endpoint calls.
///
/// The delay before attempt `i` (zero-based) is `base_backoff * 2^i`,
/// capped at `max_delay`, unless the endpoint advised an explicit delay
/// via `Retry-After`, which is honored verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per call.
    pub max_retries: u32,
    /// Base delay for exponential backoff.
    pub base_backoff: Duration,
    /// Ceiling applied to the computed backoff delay.
    pub max_delay: Duration,
    /// Per-attempt wall-clock deadline.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_secs(1),
            max_delay: Duration::from_secs(16),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Per-request-type model selection.
///
/// Draft and generic payloads may override their model per request; the
/// bundled types always use the configured model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    /// Model for bundled classification calls.
    pub classification: String,
    /// Model for bundled task-extraction calls.
    pub task_extraction: String,
    /// Default model for draft generation.
    pub draft_generation: String,
    /// Default model for generic calls.
    pub generic: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            classification: "gpt-5-nano-2025-08-07".to_string(),
            task_extraction: "gpt-5-nano-2025-08-07".to_string(),
            draft_generation: "gpt-5-mini-2025-08-07".to_string(),
            generic: "gpt-5-nano-2025-08-07".to_string(),
        }
    }
}

/// Per-1k-token rates for one model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per 1k prompt tokens.
    pub input: f64,
    /// Cost per 1k completion tokens.
    pub output: f64,
}

/// Pricing table keyed by model identifier.
///
/// Cost estimation is a pure function of usage numbers and this table;
/// unknown models cost zero.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PricingTable {
    rates: HashMap<String, ModelPricing>,
}

impl PricingTable {
    /// Empty table; every model estimates to zero cost.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the rates for a model.
    pub fn with_model(mut self, model: impl Into<String>, input: f64, output: f64) -> Self {
        self.rates
            .insert(model.into(), ModelPricing { input, output });
        self
    }

    /// Look up the rates for a model.
    pub fn get(&self, model: &str) -> Option<&ModelPricing> {
        self.rates.get(model)
    }

    /// Estimate the cost of a call from its token usage.
    pub fn estimate_cost(&self, model: &str, prompt_tokens: u32, completion_tokens: u32) -> f64 {
        let Some(pricing) = self.rates.get(model) else {
            return 0.0;
        };
        let input_cost = (f64::from(prompt_tokens) / 1000.0) * pricing.input;
        let output_cost = (f64::from(completion_tokens) / 1000.0) * pricing.output;
        input_cost + output_cost
    }

    /// Default GPT-5 family rates.
    pub fn gpt5_defaults() -> Self {
        Self::new()
            .with_model("gpt-5-nano-2025-08-07", 0.002, 0.004)
            .with_model("gpt-5-mini-2025-08-07", 0.01, 0.02)
    }
}

/// Immutable processor configuration.
///
/// Captured once at construction. Defaults are production-reasonable for
/// a single mailbox pipeline.
///
/// | Field | Default |
/// |-------|---------|
/// | `batch_size` | 10 |
/// | `batch_timeout` | 500ms |
/// | `max_concurrent_batches` | 3 |
/// | `strategy` | `Hybrid` |
/// | `requests_per_minute` | 60 |
/// | `requests_per_hour` | 3600 |
/// | `burst_capacity` | 10 |
/// | `max_queue_size` | unlimited |
/// | `cache_ttl` | 1h |
/// | `cache_max_entries` | 1000 |
/// | `enable_bundle_cache` | false |
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Maximum requests per batch.
    pub batch_size: usize,
    /// Age at which a partial batch is released (time-based/hybrid).
    pub batch_timeout: Duration,
    /// Ceiling on parallel batch workers.
    pub max_concurrent_batches: usize,
    /// Release strategy applied by the scan loop.
    pub strategy: BatchStrategy,
    /// Endpoint calls admitted per rolling minute.
    pub requests_per_minute: u32,
    /// Endpoint calls admitted per rolling hour.
    pub requests_per_hour: u32,
    /// Endpoint calls admitted per rolling second (burst smoothing).
    pub burst_capacity: u32,
    /// Optional admission ceiling; `submit` fails with `queue_full` above it.
    pub max_queue_size: Option<usize>,
    /// Time-to-live for dedup and bundle cache entries.
    pub cache_ttl: Duration,
    /// Bound on entries per cache; oldest entries evict above it.
    pub cache_max_entries: usize,
    /// Consult a prompt-fingerprint cache before bundled endpoint calls.
    pub enable_bundle_cache: bool,
    /// Endpoint retry/timeout knobs.
    pub retry: RetryPolicy,
    /// Per-model input/output rates for cost estimation.
    pub pricing: PricingTable,
    /// Per-request-type model selection.
    pub models: ModelSelection,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_timeout: Duration::from_millis(500),
            max_concurrent_batches: 3,
            strategy: BatchStrategy::Hybrid,
            requests_per_minute: 60,
            requests_per_hour: 3600,
            burst_capacity: 10,
            max_queue_size: None,
            cache_ttl: Duration::from_secs(3600),
            cache_max_entries: 1000,
            enable_bundle_cache: false,
            retry: RetryPolicy::default(),
            pricing: PricingTable::gpt5_defaults(),
            models: ModelSelection::default(),
        }
    }
}

impl ProcessorConfig {
    /// Validate that the configuration is complete and internally consistent.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ConfigurationError`] if any knob is outside
    /// its valid range.
    pub fn validate(&self) -> BatchResult<()> {
        if self.batch_size == 0 {
            return Err(BatchError::configuration_error("batch_size must be >= 1"));
        }
        if self.max_concurrent_batches == 0 {
            return Err(BatchError::configuration_error(
                "max_concurrent_batches must be >= 1",
            ));
        }
        if self.requests_per_minute == 0 {
            return Err(BatchError::configuration_error(
                "requests_per_minute must be > 0",
            ));
        }
        if self.requests_per_hour < self.requests_per_minute {
            return Err(BatchError::configuration_error(
                "requests_per_hour must be >= requests_per_minute",
            ));
        }
        if self.burst_capacity == 0 {
            return Err(BatchError::configuration_error(
                "burst_capacity must be > 0",
            ));
        }
        if self.cache_max_entries == 0 {
            return Err(BatchError::configuration_error(
                "cache_max_entries must be >= 1",
            ));
        }
        if self.retry.max_retries == 0 {
            return Err(BatchError::configuration_error(
                "retry.max_retries must be >= 1",
            ));
        }
        if let Some(max) = self.max_queue_size {
            if max == 0 {
                return Err(BatchError::configuration_error(
                    "max_queue_size must be >= 1 when set",
                ));
            }
        }

        log_debug!(
            batch_size = self.batch_size,
            strategy = self.strategy.as_str(),
            max_concurrent_batches = self.max_concurrent_batches,
            requests_per_minute = self.requests_per_minute,
            requests_per_hour = self.requests_per_hour,
            "Processor configuration validated"
        );
        Ok(())
    }
}

/// Connection settings for the HTTP completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    /// Bearer token for the chat-completion endpoint.
    pub api_key: Option<String>,
    /// Base URL for API requests (default: `https://api.openai.com`).
    pub base_url: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com".to_string(),
        }
    }
}

impl EndpointConfig {
    /// Load endpoint settings from the environment.
    ///
    /// Reads `OPENAI_API_KEY` (required) and `OPENAI_BASE_URL` (optional).
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ConfigurationError`] when the API key is
    /// missing.
    pub fn from_env() -> BatchResult<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.is_empty());
        if api_key.is_none() {
            return Err(BatchError::configuration_error(
                "OPENAI_API_KEY environment variable is required",
            ));
        }
        let base_url = std::env::var("OPENAI_BASE_URL")
            .ok()
            .filter(|url| !url.is_empty())
            .unwrap_or_else(|| "https://api.openai.com".to_string());

        Ok(Self { api_key, base_url })
    }

    /// Validate that the configuration can authenticate.
    pub fn validate(&self) -> BatchResult<()> {
        match &self.api_key {
            Some(key) if !key.is_empty() => Ok(()),
            _ => Err(BatchError::configuration_error(
                "Endpoint API key is required",
            )),
        }
    }
}
