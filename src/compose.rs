//! Prompt composition and response decomposition.
//!
//! Deterministic transformation of request payloads into endpoint calls
//! and back-mapping of bundled replies to per-request responses. Bundled
//! types (classification, task extraction) merge many requests into one
//! call; draft and generic requests each become an independent call.
//!
//! Decomposition is total: every request in a bundle is paired with
//! exactly one response. Replies are matched by their `index` field;
//! absent or mismatched indices fail only the affected requests, extra
//! entries are ignored.

use crate::config::ProcessorConfig;
use crate::endpoint::{Completion, CompletionCall};
use crate::error::BatchError;
use crate::request::{ChatMessage, Request, RequestPayload, RequestType, Response};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

/// Task extraction sub-partitions bundles into chunks of this size to
/// bound reply length.
pub(crate) const TASK_CHUNK_SIZE: usize = 5;

/// Body truncation for bundled classification entries.
const CLASSIFICATION_BODY_LIMIT: usize = 500;
/// Body truncation for bundled task-extraction entries.
const TASK_BODY_LIMIT: usize = 800;

/// Completion budget allocated per bundled classification entry.
const CLASSIFICATION_TOKENS_PER_EMAIL: u32 = 150;
/// Completion budget allocated per bundled task-extraction entry.
const TASK_TOKENS_PER_EMAIL: u32 = 200;

const BUNDLED_TEMPERATURE: f64 = 0.1;
const DRAFT_DEFAULT_TEMPERATURE: f64 = 0.3;
const DRAFT_DEFAULT_MAX_TOKENS: u32 = 500;
const GENERIC_DEFAULT_TEMPERATURE: f64 = 0.1;
const GENERIC_DEFAULT_MAX_TOKENS: u32 = 300;

const CLASSIFICATION_SYSTEM_PROMPT: &str = "Classify multiple emails efficiently. For each email, provide:
- classification (REPLY/NO_REPLY/TASK/DELEGATE/FYI_ONLY/APPROVAL/FOLLOW_UP/URGENT)
- confidence (0.0-1.0)
- brief intent
- one-line summary

Return JSON with array of classifications.";

const TASK_SYSTEM_PROMPT: &str = "Extract tasks from multiple emails. For each email, identify:
- Actionable tasks with descriptions
- Priority levels
- Deadlines if mentioned
- Dependencies

Return structured JSON.";

#[derive(Serialize)]
struct IndexedEmail<'a> {
    index: usize,
    subject: &'a str,
    sender: &'a str,
    body: String,
}

#[derive(Serialize)]
struct IndexedBody {
    index: usize,
    content: String,
}

/// Per-type composition strategies over the configured models and pricing.
#[derive(Clone)]
pub(crate) struct PromptComposer {
    config: Arc<ProcessorConfig>,
}

impl PromptComposer {
    pub fn new(config: Arc<ProcessorConfig>) -> Self {
        Self { config }
    }

    // ========================================================================
    // Classification
    // ========================================================================

    /// Merge up to `batch_size` classification requests into one call.
    pub fn compose_classification(&self, requests: &[Request]) -> CompletionCall {
        let emails: Vec<IndexedEmail<'_>> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let (subject, sender, body) = match &request.payload {
                    RequestPayload::Classification {
                        subject,
                        sender,
                        body,
                    } => (subject.as_str(), sender.as_str(), body.as_str()),
                    _ => ("", "", ""),
                };
                IndexedEmail {
                    index,
                    subject,
                    sender,
                    body: truncate_chars(body, CLASSIFICATION_BODY_LIMIT),
                }
            })
            .collect();

        let user_prompt = format!(
            "Classify these {} emails:\n\n{}\n\nReturn format:\n{{\n  \"classifications\": [\n    {{\n      \"index\": 0,\n      \"classification\": \"...\",\n      \"confidence\": 0.9,\n      \"intent\": \"...\",\n      \"summary\": \"...\"\n    }},\n    ...\n  ]\n}}",
            emails.len(),
            serde_json::to_string_pretty(&emails).unwrap_or_default(),
        );

        CompletionCall {
            model: self.config.models.classification.clone(),
            messages: vec![
                ChatMessage::system(CLASSIFICATION_SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            temperature: BUNDLED_TEMPERATURE,
            max_tokens: CLASSIFICATION_TOKENS_PER_EMAIL * requests.len() as u32,
            expects_json: true,
        }
    }

    /// Map a bundled classification reply back to per-request responses.
    pub fn decompose_classification(
        &self,
        requests: &[Request],
        completion: &Completion,
        processing_time_ms: u64,
    ) -> Vec<Response> {
        self.decompose_indexed(
            requests,
            completion,
            processing_time_ms,
            "classifications",
            |entry| entry.clone(),
        )
    }

    // ========================================================================
    // Task extraction
    // ========================================================================

    /// Merge one chunk (≤ [`TASK_CHUNK_SIZE`]) of task-extraction requests
    /// into one call.
    pub fn compose_task_chunk(&self, requests: &[Request]) -> CompletionCall {
        let emails: Vec<IndexedBody> = requests
            .iter()
            .enumerate()
            .map(|(index, request)| {
                let body = match &request.payload {
                    RequestPayload::TaskExtraction { body } => body.as_str(),
                    _ => "",
                };
                IndexedBody {
                    index,
                    content: truncate_chars(body, TASK_BODY_LIMIT),
                }
            })
            .collect();

        let user_prompt = format!(
            "Extract tasks from these emails:\n\n{}\n\nReturn format:\n{{\n  \"email_tasks\": [\n    {{\n      \"index\": 0,\n      \"tasks\": [...]\n    }},\n    ...\n  ]\n}}",
            serde_json::to_string_pretty(&emails).unwrap_or_default(),
        );

        CompletionCall {
            model: self.config.models.task_extraction.clone(),
            messages: vec![
                ChatMessage::system(TASK_SYSTEM_PROMPT),
                ChatMessage::user(user_prompt),
            ],
            temperature: BUNDLED_TEMPERATURE,
            max_tokens: TASK_TOKENS_PER_EMAIL * requests.len() as u32,
            expects_json: true,
        }
    }

    /// Map a bundled task-extraction reply back to per-request responses.
    pub fn decompose_task_chunk(
        &self,
        requests: &[Request],
        completion: &Completion,
        processing_time_ms: u64,
    ) -> Vec<Response> {
        self.decompose_indexed(
            requests,
            completion,
            processing_time_ms,
            "email_tasks",
            |entry| {
                serde_json::json!({
                    "tasks": entry.get("tasks").cloned().unwrap_or_else(|| serde_json::json!([])),
                })
            },
        )
    }

    // ========================================================================
    // Draft generation
    // ========================================================================

    /// One independent call per draft request; no bundling.
    pub fn compose_draft(&self, request: &Request) -> CompletionCall {
        let (messages, model, temperature, max_tokens) = match &request.payload {
            RequestPayload::DraftGeneration {
                messages,
                model,
                temperature,
                max_tokens,
            } => (
                messages.clone(),
                model.clone(),
                *temperature,
                *max_tokens,
            ),
            _ => (Vec::new(), None, None, None),
        };

        CompletionCall {
            model: model.unwrap_or_else(|| self.config.models.draft_generation.clone()),
            messages,
            temperature: temperature.unwrap_or(DRAFT_DEFAULT_TEMPERATURE),
            max_tokens: max_tokens.unwrap_or(DRAFT_DEFAULT_MAX_TOKENS),
            expects_json: false,
        }
    }

    pub fn decompose_draft(
        &self,
        request: &Request,
        completion: &Completion,
        processing_time_ms: u64,
    ) -> Response {
        let usage = completion.usage;
        Response::ok(
            &request.id,
            serde_json::json!({ "draft": completion.content }),
            usage.total_tokens,
            self.config.pricing.estimate_cost(
                &completion.model,
                usage.prompt_tokens,
                usage.completion_tokens,
            ),
            processing_time_ms,
        )
    }

    // ========================================================================
    // Generic
    // ========================================================================

    /// One independent pass-through call per generic request.
    pub fn compose_generic(&self, request: &Request) -> CompletionCall {
        let (messages, model, temperature, max_tokens) = match &request.payload {
            RequestPayload::Generic {
                messages,
                model,
                temperature,
                max_tokens,
            } => (
                messages.clone(),
                model.clone(),
                *temperature,
                *max_tokens,
            ),
            _ => (Vec::new(), None, None, None),
        };

        CompletionCall {
            model: model.unwrap_or_else(|| self.config.models.generic.clone()),
            messages,
            temperature: temperature.unwrap_or(GENERIC_DEFAULT_TEMPERATURE),
            max_tokens: max_tokens.unwrap_or(GENERIC_DEFAULT_MAX_TOKENS),
            expects_json: false,
        }
    }

    pub fn decompose_generic(
        &self,
        request: &Request,
        completion: &Completion,
        processing_time_ms: u64,
    ) -> Response {
        let usage = completion.usage;
        Response::ok(
            &request.id,
            serde_json::json!({
                "content": completion.content,
                "model": completion.model,
                "usage": usage,
            }),
            usage.total_tokens,
            self.config.pricing.estimate_cost(
                &completion.model,
                usage.prompt_tokens,
                usage.completion_tokens,
            ),
            processing_time_ms,
        )
    }

    // ========================================================================
    // Shared decomposition
    // ========================================================================

    /// Pair every request with exactly one response by matching reply
    /// entries on their `index` field. Token usage splits evenly
    /// (`⌊T/k⌋` each) and cost splits as `total / k` across the bundle.
    fn decompose_indexed(
        &self,
        requests: &[Request],
        completion: &Completion,
        processing_time_ms: u64,
        array_key: &str,
        extract_data: impl Fn(&serde_json::Value) -> serde_json::Value,
    ) -> Vec<Response> {
        let k = requests.len().max(1) as u32;
        let usage = completion.usage;
        let tokens_each = usage.total_tokens / k;
        let cost_each = self.config.pricing.estimate_cost(
            &completion.model,
            usage.prompt_tokens,
            usage.completion_tokens,
        ) / f64::from(k);

        let by_index: HashMap<usize, &serde_json::Value> = completion
            .json
            .as_ref()
            .and_then(|json| json.get(array_key))
            .and_then(|value| value.as_array())
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| {
                        entry
                            .get("index")
                            .and_then(serde_json::Value::as_u64)
                            .map(|index| (index as usize, entry))
                    })
                    .collect()
            })
            .unwrap_or_default();

        requests
            .iter()
            .enumerate()
            .map(|(index, request)| match by_index.get(&index).copied() {
                Some(entry) => Response::ok(
                    &request.id,
                    extract_data(entry),
                    tokens_each,
                    cost_each,
                    processing_time_ms,
                ),
                None => Response::failure(
                    &request.id,
                    &BatchError::missing_in_batch_response(index),
                    processing_time_ms,
                ),
            })
            .collect()
    }
}

/// Deterministic truncation to the first `limit` characters.
fn truncate_chars(text: &str, limit: usize) -> String {
    text.chars().take(limit).collect()
}

/// Group a mixed batch into per-type sub-batches, preserving first-seen
/// type order and in-type submission order.
pub(crate) fn partition_by_type(batch: Vec<Request>) -> Vec<(RequestType, Vec<Request>)> {
    let mut groups: Vec<(RequestType, Vec<Request>)> = Vec::new();
    for request in batch {
        match groups
            .iter_mut()
            .find(|(request_type, _)| *request_type == request.request_type)
        {
            Some((_, group)) => group.push(request),
            None => groups.push((request.request_type, vec![request])),
        }
    }
    groups
}
