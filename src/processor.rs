//! Batch processor: lifecycle owner and admission surface.
//!
//! Owns the scan loop, the worker pool, the request queue, both caches,
//! the rate limiter, and the metrics. Construct one per endpoint; there
//! is no global state. `submit` is non-blocking and never performs an
//! endpoint call on the admission path.

use crate::cache::TtlCache;
use crate::client::EndpointClient;
use crate::compose::PromptComposer;
use crate::config::{EndpointConfig, ProcessorConfig};
use crate::endpoint::{CompletionEndpoint, HttpEndpoint};
use crate::error::{BatchError, BatchResult};
use crate::logging::{log_debug, log_info, log_warn};
use crate::metrics::{Metrics, MetricsSnapshot};
use crate::queue::RequestQueue;
use crate::ratelimit::RateLimiter;
use crate::request::{Request, RequestPayload, RequestType, Response, ResponseSink};
use crate::worker::{deliver_one, shutdown_signal, BatchWorker, WorkerContext};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Instant;

/// Priority assigned when the caller does not specify one.
pub const DEFAULT_PRIORITY: u8 = 5;

/// Idle poll interval of the scan loop, catching time-based releases
/// between submit-side wakes.
const SCAN_INTERVAL: Duration = Duration::from_millis(100);

struct ProcessorInner {
    ctx: Arc<WorkerContext>,
    queue: RequestQueue,
    wake: Notify,
    shutdown_tx: watch::Sender<bool>,
    running: AtomicBool,
    permits: Arc<Semaphore>,
}

/// Asynchronous batching processor for LLM-backed email intelligence.
///
/// ```rust,no_run
/// use batch_llm::{
///     BatchProcessor, EndpointConfig, ProcessorConfig, RequestPayload, ResponseSink,
///     DEFAULT_PRIORITY,
/// };
///
/// # async fn example() -> batch_llm::BatchResult<()> {
/// let processor = BatchProcessor::with_http_endpoint(
///     ProcessorConfig::default(),
///     EndpointConfig::from_env()?,
/// )?;
/// processor.start().await;
///
/// let (sink, receiver) = ResponseSink::channel();
/// processor
///     .submit(
///         RequestPayload::Classification {
///             subject: "Quarterly numbers".into(),
///             sender: "cfo@example.com".into(),
///             body: "Please review the attached figures.".into(),
///         },
///         DEFAULT_PRIORITY,
///         Some(sink),
///     )
///     .await?;
/// let response = receiver.await;
/// processor.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct BatchProcessor {
    inner: Arc<ProcessorInner>,
    scan_handle: tokio::sync::Mutex<Option<JoinHandle<()>>>,
}

impl BatchProcessor {
    /// Create a processor over any completion endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::ConfigurationError`] when the configuration
    /// fails validation.
    pub fn new(
        config: ProcessorConfig,
        endpoint: Arc<dyn CompletionEndpoint>,
    ) -> BatchResult<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let metrics = Arc::new(Metrics::new());
        let limiter = Arc::new(RateLimiter::new(
            config.requests_per_minute,
            config.requests_per_hour,
            config.burst_capacity,
        ));
        let client = Arc::new(EndpointClient::new(
            endpoint,
            config.retry.clone(),
            limiter,
            metrics.clone(),
            config.pricing.clone(),
        ));

        let ctx = Arc::new(WorkerContext {
            composer: PromptComposer::new(config.clone()),
            client,
            dedup_cache: Arc::new(TtlCache::new(config.cache_max_entries)),
            bundle_cache: Arc::new(TtlCache::new(config.cache_max_entries)),
            metrics,
            config: config.clone(),
        });

        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            inner: Arc::new(ProcessorInner {
                permits: Arc::new(Semaphore::new(config.max_concurrent_batches)),
                ctx,
                queue: RequestQueue::new(),
                wake: Notify::new(),
                shutdown_tx,
                running: AtomicBool::new(false),
            }),
            scan_handle: tokio::sync::Mutex::new(None),
        })
    }

    /// Convenience constructor over the HTTP chat-completion endpoint.
    pub fn with_http_endpoint(
        config: ProcessorConfig,
        endpoint_config: EndpointConfig,
    ) -> BatchResult<Self> {
        let endpoint = Arc::new(HttpEndpoint::new(endpoint_config)?);
        Self::new(config, endpoint)
    }

    /// Start the background scan loop and worker pool. Idempotent.
    pub async fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let inner = self.inner.clone();
        let shutdown_rx = self.inner.shutdown_tx.subscribe();
        let handle = tokio::spawn(scan_loop(inner, shutdown_rx));
        *self.scan_handle.lock().await = Some(handle);
        log_info!(
            strategy = self.inner.ctx.config.strategy.as_str(),
            batch_size = self.inner.ctx.config.batch_size,
            max_concurrent_batches = self.inner.ctx.config.max_concurrent_batches,
            "Batch processor started"
        );
    }

    /// Signal shutdown, drain in-flight batches, and fail queued requests
    /// with `cancelled`. Idempotent; returns once everything settled.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(handle) = self.scan_handle.lock().await.take() {
            let _ = handle.await;
        }
        // Covers requests submitted before `start` was ever called; a
        // drained queue is empty here otherwise.
        let leftover = self.inner.queue.drain_all();
        fail_batch_cancelled(&self.inner.ctx, leftover).await;
        log_info!("Batch processor stopped");
    }

    /// Admit one typed request.
    ///
    /// On a dedup hit the callback fires immediately with the cached
    /// response and the cached response's `request_id` is returned. On a
    /// miss the request is queued and the scan loop is woken when the
    /// strategy's size trigger is met. After shutdown the request is
    /// terminated immediately: the sink receives a `cancelled` response
    /// and the id is returned as usual. Completes in bounded time
    /// regardless of queue depth; no endpoint call happens here.
    ///
    /// # Errors
    ///
    /// [`BatchError::QueueFull`] when the optional queue ceiling is
    /// exceeded — the only synchronous failure.
    pub async fn submit(
        &self,
        payload: RequestPayload,
        priority: u8,
        sink: Option<ResponseSink>,
    ) -> BatchResult<String> {
        let mut request = Request::new(payload, priority, sink);

        if *self.inner.shutdown_tx.borrow() {
            let id = request.id.clone();
            self.inner.ctx.metrics.record_admission();
            fail_batch_cancelled(&self.inner.ctx, vec![request]).await;
            return Ok(id);
        }

        if let Some(cached) = self.inner.ctx.dedup_cache.get(&request.dedup_key) {
            self.inner.ctx.metrics.record_admission();
            self.inner.ctx.metrics.record_dedup_hit();
            log_debug!(
                request_id = %request.id,
                cached_request_id = %cached.request_id,
                "Dedup short-circuit from response cache"
            );
            let cached_id = cached.request_id.clone();
            if let Some(sink) = request.sink.take() {
                sink.deliver(cached).await;
            }
            return Ok(cached_id);
        }

        if let Some(max) = self.inner.ctx.config.max_queue_size {
            let depth = self.inner.queue.depth();
            if depth >= max {
                return Err(BatchError::queue_full(depth));
            }
        }

        let id = request.id.clone();
        let priority = request.priority;
        let depth = self.inner.queue.enqueue(request);
        self.inner.ctx.metrics.record_admission();
        log_debug!(
            request_id = %id,
            priority = priority,
            depth = depth,
            "Request admitted"
        );

        if self
            .inner
            .queue
            .size_trigger_met(priority, &self.inner.ctx.config)
        {
            self.inner.wake.notify_one();
        }

        Ok(id)
    }

    /// Admit one request given as a loose key/value map, validated on
    /// entry.
    pub async fn submit_value(
        &self,
        request_type: RequestType,
        payload: serde_json::Value,
        priority: u8,
        sink: Option<ResponseSink>,
    ) -> BatchResult<String> {
        let payload = RequestPayload::from_value(request_type, payload)?;
        self.submit(payload, priority, sink).await
    }

    /// Sequential fold over [`submit`](Self::submit); stops at the first
    /// admission error.
    pub async fn submit_bulk(
        &self,
        payloads: Vec<RequestPayload>,
        priority: u8,
    ) -> BatchResult<Vec<String>> {
        let mut ids = Vec::with_capacity(payloads.len());
        for payload in payloads {
            ids.push(self.submit(payload, priority, None).await?);
        }
        Ok(ids)
    }

    /// Point-in-time metrics with derived gauges.
    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.inner.ctx.metrics.snapshot(
            self.inner.queue.depth(),
            self.inner.ctx.bundle_cache.len(),
            self.inner.ctx.dedup_cache.len(),
        )
    }

    /// Reset the response and bundle caches. Metrics are untouched.
    pub fn clear_caches(&self) {
        self.inner.ctx.dedup_cache.clear();
        self.inner.ctx.bundle_cache.clear();
        log_info!("Caches cleared");
    }

    /// Drop only the dedup cache so tests can drive a repeat submission
    /// through the worker and observe the bundle cache.
    #[cfg(test)]
    pub(crate) fn clear_dedup_cache_for_tests(&self) {
        self.inner.ctx.dedup_cache.clear();
    }
}

/// Background scan loop: wakes on submit-side signals or the idle poll,
/// releases batches through the assembler, and spawns one worker task per
/// batch gated by the concurrency permits. On shutdown, drains the queue
/// with `cancelled` and joins in-flight workers.
async fn scan_loop(inner: Arc<ProcessorInner>, mut shutdown_rx: watch::Receiver<bool>) {
    let mut workers: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = inner.wake.notified() => {}
            _ = tokio::time::sleep(SCAN_INTERVAL) => {}
            _ = shutdown_signal(&mut shutdown_rx) => break,
        }

        // Reap finished workers so the set does not grow with throughput.
        while workers.try_join_next().is_some() {}

        let batches = inner.queue.collect(Instant::now(), &inner.ctx.config);
        for batch in batches {
            let ctx = inner.ctx.clone();
            let permits = inner.permits.clone();
            let mut worker_shutdown = shutdown_rx.clone();
            workers.spawn(async move {
                let permit = tokio::select! {
                    permit = permits.acquire_owned() => match permit {
                        Ok(permit) => permit,
                        Err(_) => return,
                    },
                    _ = shutdown_signal(&mut worker_shutdown) => {
                        fail_batch_cancelled(&ctx, batch).await;
                        return;
                    }
                };
                BatchWorker::new(ctx, worker_shutdown).run(batch).await;
                drop(permit);
            });
        }
    }

    // Shutdown: queued requests fail with `cancelled` before in-flight
    // workers are joined, so no new endpoint work starts.
    let drained = inner.queue.drain_all();
    if !drained.is_empty() {
        log_warn!(
            count = drained.len(),
            "Failing queued requests on shutdown"
        );
    }
    fail_batch_cancelled(&inner.ctx, drained).await;

    while workers.join_next().await.is_some() {}
}

async fn fail_batch_cancelled(ctx: &WorkerContext, batch: Vec<Request>) {
    for request in batch {
        let response = Response::failure(&request.id, &BatchError::Cancelled, 0);
        deliver_one(ctx, request, response).await;
    }
}
