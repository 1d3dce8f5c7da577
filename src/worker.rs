//! Batch worker: one end-to-end batch execution.
//!
//! Five stages per batch: partition by type, compose, rate-gated endpoint
//! call, decompose, deliver. Bundled sub-batches run sequentially within
//! the worker; draft and generic requests fan out concurrently, one call
//! per request (the fan-out is bounded by the batch size by construction).
//!
//! A terminal call failure fails every request of its sub-batch without
//! touching siblings. Shutdown is observed at the suspension points: a
//! worker cancelled before or during its call delivers `cancelled` for
//! every undelivered request.

use crate::cache::TtlCache;
use crate::client::EndpointClient;
use crate::compose::{partition_by_type, PromptComposer, TASK_CHUNK_SIZE};
use crate::config::ProcessorConfig;
use crate::endpoint::{Completion, CompletionCall};
use crate::error::{BatchError, BatchResult};
use crate::logging::{log_debug, log_info};
use crate::metrics::Metrics;
use crate::request::{Request, RequestType, Response};
use futures_util::future::join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

/// Shared pipeline state handed to every worker.
pub(crate) struct WorkerContext {
    pub config: Arc<ProcessorConfig>,
    pub composer: PromptComposer,
    pub client: Arc<EndpointClient>,
    pub dedup_cache: Arc<TtlCache<Response>>,
    pub bundle_cache: Arc<TtlCache<Completion>>,
    pub metrics: Arc<Metrics>,
}

/// Resolves once shutdown is signaled (or the processor is gone).
pub(crate) async fn shutdown_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Deliver the terminal response for one request: fire the sink, upsert
/// the dedup cache on success, then record the single terminal metrics
/// update. Runs outside every internal lock.
pub(crate) async fn deliver_one(ctx: &WorkerContext, mut request: Request, response: Response) {
    let success = response.success;
    if let Some(sink) = request.sink.take() {
        sink.deliver(response.clone()).await;
    }
    if success {
        ctx.dedup_cache
            .put(request.dedup_key.clone(), response, ctx.config.cache_ttl);
    }
    ctx.metrics.record_outcome(success);
}

/// Executes one released batch.
pub(crate) struct BatchWorker {
    ctx: Arc<WorkerContext>,
    shutdown: watch::Receiver<bool>,
}

impl BatchWorker {
    pub fn new(ctx: Arc<WorkerContext>, shutdown: watch::Receiver<bool>) -> Self {
        Self { ctx, shutdown }
    }

    /// Run the batch to completion. Every request receives exactly one
    /// response, and batch-level metrics update exactly once.
    pub async fn run(mut self, batch: Vec<Request>) {
        let batch_id = Uuid::new_v4();
        let batch_len = batch.len();
        let started = Instant::now();
        log_debug!(
            batch_id = %batch_id,
            size = batch_len,
            "Worker picked up batch"
        );

        for (request_type, group) in partition_by_type(batch) {
            match request_type {
                RequestType::Classification => {
                    self.run_bundled(batch_id, group, started).await;
                }
                RequestType::TaskExtraction => {
                    let mut remaining = group;
                    while !remaining.is_empty() {
                        let take = remaining.len().min(TASK_CHUNK_SIZE);
                        let chunk: Vec<Request> = remaining.drain(..take).collect();
                        self.run_bundled(batch_id, chunk, started).await;
                    }
                }
                RequestType::DraftGeneration | RequestType::Generic => {
                    self.run_fanned(batch_id, group, started).await;
                }
            }
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        self.ctx.metrics.record_batch(batch_len, latency_ms);
        log_info!(
            batch_id = %batch_id,
            size = batch_len,
            latency_ms = latency_ms,
            "Worker finished batch"
        );
    }

    /// One composed call for the whole sub-batch, decomposed back to
    /// per-request responses delivered in input order.
    async fn run_bundled(&mut self, batch_id: Uuid, requests: Vec<Request>, started: Instant) {
        let request_type = requests[0].request_type;
        let call = match request_type {
            RequestType::TaskExtraction => self.ctx.composer.compose_task_chunk(&requests),
            _ => self.ctx.composer.compose_classification(&requests),
        };
        log_debug!(
            batch_id = %batch_id,
            request_type = %request_type,
            size = requests.len(),
            model = %call.model,
            "Dispatching bundled call"
        );

        let outcome = self.bundled_completion(&call).await;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let responses: Vec<Response> = match outcome {
            None => requests
                .iter()
                .map(|request| {
                    Response::failure(&request.id, &BatchError::Cancelled, processing_time_ms)
                })
                .collect(),
            Some(Err(error)) => requests
                .iter()
                .map(|request| Response::failure(&request.id, &error, processing_time_ms))
                .collect(),
            Some(Ok(completion)) => match request_type {
                RequestType::TaskExtraction => self.ctx.composer.decompose_task_chunk(
                    &requests,
                    &completion,
                    processing_time_ms,
                ),
                _ => self.ctx.composer.decompose_classification(
                    &requests,
                    &completion,
                    processing_time_ms,
                ),
            },
        };

        for (request, response) in requests.into_iter().zip(responses) {
            deliver_one(&self.ctx, request, response).await;
        }
    }

    /// Resolve a bundled call through the bundle cache when enabled,
    /// otherwise through the endpoint. `None` means cancelled.
    async fn bundled_completion(
        &mut self,
        call: &CompletionCall,
    ) -> Option<BatchResult<Completion>> {
        let fingerprint = self.ctx.config.enable_bundle_cache.then(|| call.fingerprint());

        if let Some(fingerprint) = &fingerprint {
            if let Some(hit) = self.ctx.bundle_cache.get(fingerprint) {
                self.ctx.metrics.record_cache_hit();
                log_debug!(fingerprint = %fingerprint, "Bundle cache hit");
                return Some(Ok(hit));
            }
        }

        if *self.shutdown.borrow() {
            return None;
        }
        let result = tokio::select! {
            result = self.ctx.client.complete(call) => result,
            _ = shutdown_signal(&mut self.shutdown) => return None,
        };

        if let (Some(fingerprint), Ok(completion)) = (&fingerprint, &result) {
            self.ctx.bundle_cache.put(
                fingerprint.clone(),
                completion.clone(),
                self.ctx.config.cache_ttl,
            );
        }
        Some(result)
    }

    /// Independent call per request, executed concurrently. Delivery
    /// order across the fan-out is arbitrary.
    async fn run_fanned(&mut self, batch_id: Uuid, requests: Vec<Request>, started: Instant) {
        log_debug!(
            batch_id = %batch_id,
            size = requests.len(),
            "Fanning out per-request calls"
        );

        let calls = requests.into_iter().map(|request| {
            let ctx = self.ctx.clone();
            let mut shutdown = self.shutdown.clone();
            async move {
                let call = match request.request_type {
                    RequestType::DraftGeneration => ctx.composer.compose_draft(&request),
                    _ => ctx.composer.compose_generic(&request),
                };

                let outcome = if *shutdown.borrow() {
                    None
                } else {
                    tokio::select! {
                        result = ctx.client.complete(&call) => Some(result),
                        _ = shutdown_signal(&mut shutdown) => None,
                    }
                };

                let processing_time_ms = started.elapsed().as_millis() as u64;
                let response = match outcome {
                    None => {
                        Response::failure(&request.id, &BatchError::Cancelled, processing_time_ms)
                    }
                    Some(Err(error)) => {
                        Response::failure(&request.id, &error, processing_time_ms)
                    }
                    Some(Ok(completion)) => match request.request_type {
                        RequestType::DraftGeneration => {
                            ctx.composer
                                .decompose_draft(&request, &completion, processing_time_ms)
                        }
                        _ => ctx
                            .composer
                            .decompose_generic(&request, &completion, processing_time_ms),
                    },
                };

                deliver_one(&ctx, request, response).await;
            }
        });

        join_all(calls).await;
    }
}
