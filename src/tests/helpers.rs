//! Shared helpers for the unit test suite.
//!
//! `ScriptedEndpoint` is an in-memory [`CompletionEndpoint`]: scripted
//! steps are consumed first, after which it answers every call with a
//! well-formed auto-generated completion (index-matched JSON for bundled
//! calls, free text otherwise). Bundled auto replies infer the entry
//! count from the call's token budget, which the composer allocates
//! per-email.

use crate::config::ProcessorConfig;
use crate::endpoint::{Completion, CompletionCall, CompletionEndpoint, TokenUsage};
use crate::error::{BatchError, BatchResult};
use crate::request::{ChatMessage, RequestPayload};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// One scripted endpoint outcome.
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Reply with this raw content.
    Text(String),
    /// Refuse with 429 and the given `Retry-After`.
    RateLimited(u64),
    /// Fail with a 500.
    ServerError,
    /// Fail with a 400.
    ClientError,
    /// Never resolve; lets the client's per-attempt timeout fire.
    Hang,
}

/// Call observed by the scripted endpoint.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub model: String,
    pub expects_json: bool,
    pub max_tokens: u32,
    pub at: Instant,
}

/// In-memory endpoint with scripted failures and auto-generated replies.
pub struct ScriptedEndpoint {
    steps: Mutex<VecDeque<ScriptStep>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedEndpoint {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
        })
    }

    /// Queue a step; consumed in FIFO order before auto replies resume.
    pub fn push(&self, step: ScriptStep) {
        self.steps.lock().unwrap().push_back(step);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().unwrap().iter().map(|c| c.at).collect()
    }

    pub fn recorded_calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    fn usage() -> TokenUsage {
        TokenUsage {
            prompt_tokens: 80,
            completion_tokens: 40,
            total_tokens: 120,
        }
    }

    fn completion(content: String, call: &CompletionCall) -> Completion {
        Completion {
            content,
            json: None,
            usage: Self::usage(),
            model: call.model.clone(),
        }
    }

    /// Well-formed reply for any call: index-matched JSON for bundled
    /// calls, free text otherwise. The bundled entry count is recovered
    /// from the per-email token budget the composer allocated.
    fn auto_reply(call: &CompletionCall) -> Completion {
        if !call.expects_json {
            return Self::completion(
                "Thanks for the update. I'll review and follow up tomorrow.".to_string(),
                call,
            );
        }

        let system = call
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();

        let content = if system.contains("Extract tasks") {
            let n = (call.max_tokens / 200).max(1) as usize;
            let entries: Vec<serde_json::Value> = (0..n)
                .map(|i| {
                    serde_json::json!({
                        "index": i,
                        "tasks": [{"description": format!("follow up on email {i}"), "priority": "medium"}],
                    })
                })
                .collect();
            serde_json::json!({ "email_tasks": entries }).to_string()
        } else {
            let n = (call.max_tokens / 150).max(1) as usize;
            let entries: Vec<serde_json::Value> = (0..n)
                .map(|i| {
                    serde_json::json!({
                        "index": i,
                        "classification": "REPLY",
                        "confidence": 0.9,
                        "intent": "respond",
                        "summary": format!("email {i} needs a reply"),
                    })
                })
                .collect();
            serde_json::json!({ "classifications": entries }).to_string()
        };

        Self::completion(content, call)
    }
}

#[async_trait::async_trait]
impl CompletionEndpoint for ScriptedEndpoint {
    async fn complete(&self, call: &CompletionCall) -> BatchResult<Completion> {
        self.calls.lock().unwrap().push(RecordedCall {
            model: call.model.clone(),
            expects_json: call.expects_json,
            max_tokens: call.max_tokens,
            at: Instant::now(),
        });

        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(Self::auto_reply(call)),
            Some(ScriptStep::Text(content)) => Ok(Self::completion(content, call)),
            Some(ScriptStep::RateLimited(seconds)) => Err(BatchError::RateLimited {
                retry_after_seconds: seconds,
            }),
            Some(ScriptStep::ServerError) => Err(BatchError::ServerError {
                status: 500,
                message: "upstream exploded".to_string(),
            }),
            Some(ScriptStep::ClientError) => Err(BatchError::ClientError {
                status: 400,
                message: "malformed request".to_string(),
            }),
            Some(ScriptStep::Hang) => {
                std::future::pending::<()>().await;
                unreachable!("pending future resolved")
            }
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

/// Config with fast knobs so paused-time tests settle quickly.
pub fn fast_config() -> ProcessorConfig {
    let mut config = ProcessorConfig::default();
    config.batch_timeout = Duration::from_millis(100);
    config.requests_per_minute = 1000;
    config.requests_per_hour = 100_000;
    config.burst_capacity = 1000;
    config.retry.base_backoff = Duration::from_millis(10);
    config.retry.timeout = Duration::from_secs(5);
    config
}

pub fn classification_payload(tag: &str) -> RequestPayload {
    RequestPayload::Classification {
        subject: format!("Subject {tag}"),
        sender: format!("{tag}@example.com"),
        body: format!("Body of email {tag} with enough detail to classify."),
    }
}

pub fn task_payload(tag: &str) -> RequestPayload {
    RequestPayload::TaskExtraction {
        body: format!("Please prepare the {tag} report by Friday and loop in finance."),
    }
}

pub fn draft_payload(tag: &str) -> RequestPayload {
    RequestPayload::DraftGeneration {
        messages: vec![
            ChatMessage::system("Draft a short, polite reply."),
            ChatMessage::user(format!("They asked about {tag}.")),
        ],
        model: None,
        temperature: None,
        max_tokens: None,
    }
}

pub fn generic_payload(tag: &str) -> RequestPayload {
    RequestPayload::Generic {
        messages: vec![ChatMessage::user(format!("Summarize: {tag}"))],
        model: Some("gpt-5-nano-2025-08-07".to_string()),
        temperature: Some(0.0),
        max_tokens: Some(100),
    }
}
