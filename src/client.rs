//! Retrying endpoint client.
//!
//! Wraps any [`CompletionEndpoint`] with the call-level policy: rate-gate
//! admission, per-attempt timeout, bounded retries with capped exponential
//! backoff, server-advised delay precedence, and JSON decoding for bundled
//! calls. Token and cost totals are recorded here, once per successful
//! call.

use crate::config::{PricingTable, RetryPolicy};
use crate::endpoint::{Completion, CompletionCall, CompletionEndpoint};
use crate::error::{BatchError, BatchResult};
use crate::logging::{log_debug, log_error};
use crate::metrics::Metrics;
use crate::ratelimit::RateLimiter;
use crate::response_parser::ResponseParser;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Endpoint client with retry, backoff, and rate-limit integration.
pub(crate) struct EndpointClient {
    endpoint: Arc<dyn CompletionEndpoint>,
    policy: RetryPolicy,
    limiter: Arc<RateLimiter>,
    metrics: Arc<Metrics>,
    pricing: PricingTable,
}

impl EndpointClient {
    pub fn new(
        endpoint: Arc<dyn CompletionEndpoint>,
        policy: RetryPolicy,
        limiter: Arc<RateLimiter>,
        metrics: Arc<Metrics>,
        pricing: PricingTable,
    ) -> Self {
        Self {
            endpoint,
            policy,
            limiter,
            metrics,
            pricing,
        }
    }

    /// Execute a call to completion or terminal failure.
    ///
    /// The first attempt waits for rate-limiter admission; retry attempts
    /// only record into the window, because a server-advised delay takes
    /// precedence over local window math. At most `max_retries` attempts
    /// run; each is bounded by the per-attempt timeout. Client errors and
    /// parse failures are terminal.
    pub async fn complete(&self, call: &CompletionCall) -> BatchResult<Completion> {
        let started = Instant::now();
        let mut attempt: u32 = 0;

        loop {
            if attempt == 0 {
                self.limiter.acquire().await;
            } else {
                self.limiter.record();
            }
            attempt += 1;

            let attempt_started = Instant::now();
            let outcome =
                tokio::time::timeout(self.policy.timeout, self.endpoint.complete(call)).await;

            let error = match outcome {
                Ok(Ok(completion)) => {
                    return self.finish_success(call, completion, attempt, attempt_started);
                }
                Ok(Err(error)) => error,
                Err(_elapsed) => BatchError::timeout(self.policy.timeout.as_secs()),
            };

            if !error.is_retryable() || attempt >= self.policy.max_retries {
                log_error!(
                    endpoint = self.endpoint.name(),
                    model = %call.model,
                    attempts = attempt,
                    total_duration_ms = started.elapsed().as_millis() as u64,
                    error = %error,
                    "Endpoint call failed terminally"
                );
                return Err(error);
            }

            let delay = self.retry_delay(&error, attempt);
            log_debug!(
                endpoint = self.endpoint.name(),
                model = %call.model,
                attempt = attempt,
                max_retries = self.policy.max_retries,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Endpoint attempt failed, retrying after delay"
            );
            tokio::time::sleep(delay).await;
        }
    }

    fn finish_success(
        &self,
        call: &CompletionCall,
        mut completion: Completion,
        attempt: u32,
        attempt_started: Instant,
    ) -> BatchResult<Completion> {
        // The provider billed this call whether or not the content
        // decodes, so usage is recorded before the parse step.
        let usage = completion.usage;
        let cost = self.pricing.estimate_cost(
            &call.model,
            usage.prompt_tokens,
            usage.completion_tokens,
        );
        self.metrics.record_usage(u64::from(usage.total_tokens), cost);

        if call.expects_json {
            completion.json = Some(ResponseParser::parse_json_object(&completion.content)?);
        }

        log_debug!(
            endpoint = self.endpoint.name(),
            model = %call.model,
            attempt = attempt,
            duration_ms = attempt_started.elapsed().as_millis() as u64,
            total_tokens = usage.total_tokens,
            "Endpoint call succeeded"
        );
        Ok(completion)
    }

    /// Delay before the next attempt. A server-advised delay is honored
    /// verbatim; otherwise capped exponential backoff over completed
    /// attempts.
    fn retry_delay(&self, error: &BatchError, completed_attempts: u32) -> Duration {
        if let BatchError::RateLimited {
            retry_after_seconds,
        } = error
        {
            return Duration::from_secs(*retry_after_seconds);
        }
        let exponent = completed_attempts.saturating_sub(1).min(16);
        let delay = self.policy.base_backoff * 2u32.pow(exponent);
        delay.min(self.policy.max_delay)
    }
}
