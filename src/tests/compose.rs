// Unit Tests for Prompt Composition and Decomposition
//
// UNIT UNDER TEST: PromptComposer
//
// BUSINESS RESPONSIBILITY:
//   - Deterministic bundled prompts with per-type budgets and truncation
//   - Total decomposition: every request pairs with exactly one response
//   - Index-matched back-mapping with per-request failures for absent
//     entries and even token/cost splits

use crate::compose::{partition_by_type, PromptComposer};
use crate::config::ProcessorConfig;
use crate::endpoint::{Completion, TokenUsage};
use crate::request::{ChatMessage, Request, RequestPayload, RequestType};
use crate::tests::helpers::{classification_payload, draft_payload, generic_payload, task_payload};
use std::sync::Arc;

fn composer() -> PromptComposer {
    PromptComposer::new(Arc::new(ProcessorConfig::default()))
}

fn requests(payloads: Vec<RequestPayload>) -> Vec<Request> {
    payloads
        .into_iter()
        .map(|payload| Request::new(payload, 5, None))
        .collect()
}

fn completion_with(json: serde_json::Value, total_tokens: u32) -> Completion {
    Completion {
        content: json.to_string(),
        json: Some(json),
        usage: TokenUsage {
            prompt_tokens: total_tokens / 2,
            completion_tokens: total_tokens / 2,
            total_tokens,
        },
        model: "gpt-5-nano-2025-08-07".to_string(),
    }
}

// ============================================================================
// Classification
// ============================================================================

#[tokio::test]
async fn test_classification_call_shape() {
    let batch = requests((0..3).map(|i| classification_payload(&i.to_string())).collect());
    let call = composer().compose_classification(&batch);

    assert_eq!(call.model, "gpt-5-nano-2025-08-07");
    assert_eq!(call.max_tokens, 450, "150 tokens budgeted per email");
    assert!(call.expects_json);
    assert_eq!(call.temperature, 0.1);
    assert_eq!(call.messages.len(), 2);
    assert_eq!(call.messages[0].role, "system");

    let user_prompt = &call.messages[1].content;
    assert!(user_prompt.contains("Classify these 3 emails"));
    assert!(user_prompt.contains("Subject 0"));
    assert!(user_prompt.contains("2@example.com"));
    assert!(user_prompt.contains("\"classifications\""));
}

#[tokio::test]
async fn test_classification_body_truncated_to_500_chars() {
    let long_body = "x".repeat(2000);
    let batch = requests(vec![RequestPayload::Classification {
        subject: "s".into(),
        sender: "a@b.c".into(),
        body: long_body,
    }]);
    let call = composer().compose_classification(&batch);

    assert!(!call.messages[1].content.contains(&"x".repeat(501)));
    assert!(call.messages[1].content.contains(&"x".repeat(500)));
}

#[tokio::test]
async fn test_classification_decompose_pairs_every_request() {
    let batch = requests((0..3).map(|i| classification_payload(&i.to_string())).collect());
    let completion = completion_with(
        serde_json::json!({
            "classifications": [
                {"index": 0, "classification": "REPLY", "confidence": 0.9},
                {"index": 1, "classification": "FYI_ONLY", "confidence": 0.8},
                {"index": 2, "classification": "TASK", "confidence": 0.7},
            ]
        }),
        300,
    );

    let responses = composer().decompose_classification(&batch, &completion, 42);

    assert_eq!(responses.len(), 3);
    for (i, (request, response)) in batch.iter().zip(&responses).enumerate() {
        assert_eq!(response.request_id, request.id);
        assert!(response.success);
        assert_eq!(response.processing_time_ms, 42);
        assert_eq!(
            response.data.as_ref().unwrap()["index"],
            serde_json::json!(i)
        );
        assert_eq!(response.tokens_used, 100, "300 tokens split across 3");
    }
}

#[tokio::test]
async fn test_classification_decompose_missing_index_fails_only_that_request() {
    let batch = requests((0..3).map(|i| classification_payload(&i.to_string())).collect());
    let completion = completion_with(
        serde_json::json!({
            "classifications": [
                {"index": 0, "classification": "REPLY"},
                {"index": 2, "classification": "TASK"},
            ]
        }),
        300,
    );

    let responses = composer().decompose_classification(&batch, &completion, 0);

    assert!(responses[0].success);
    assert!(!responses[1].success);
    assert_eq!(
        responses[1].error.as_deref(),
        Some("missing_in_batch_response")
    );
    assert!(responses[1].data.is_none());
    assert!(responses[2].success);
}

#[tokio::test]
async fn test_classification_decompose_ignores_extra_entries() {
    let batch = requests(vec![classification_payload("only")]);
    let completion = completion_with(
        serde_json::json!({
            "classifications": [
                {"index": 0, "classification": "REPLY"},
                {"index": 1, "classification": "GHOST"},
                {"index": 7, "classification": "GHOST"},
            ]
        }),
        100,
    );

    let responses = composer().decompose_classification(&batch, &completion, 0);

    assert_eq!(responses.len(), 1, "Decomposition is total over inputs only");
    assert!(responses[0].success);
}

#[tokio::test]
async fn test_single_request_bundle_decomposes() {
    // batch_size = 1 reduces bundled types to per-request calls.
    let batch = requests(vec![classification_payload("solo")]);
    let call = composer().compose_classification(&batch);
    assert_eq!(call.max_tokens, 150);

    let completion = completion_with(
        serde_json::json!({"classifications": [{"index": 0, "classification": "REPLY"}]}),
        100,
    );
    let responses = composer().decompose_classification(&batch, &completion, 0);
    assert_eq!(responses.len(), 1);
    assert!(responses[0].success);
    assert_eq!(responses[0].tokens_used, 100);
}

#[tokio::test]
async fn test_token_split_floors_and_cost_sums_within_total() {
    let batch = requests((0..3).map(|i| classification_payload(&i.to_string())).collect());
    let completion = completion_with(
        serde_json::json!({
            "classifications": [
                {"index": 0}, {"index": 1}, {"index": 2},
            ]
        }),
        100,
    );

    let responses = composer().decompose_classification(&batch, &completion, 0);

    let config = ProcessorConfig::default();
    let total_cost = config.pricing.estimate_cost("gpt-5-nano-2025-08-07", 50, 50);
    for response in &responses {
        assert_eq!(response.tokens_used, 33, "floor(100 / 3)");
        assert!((response.cost_estimate - total_cost / 3.0).abs() < 1e-12);
    }
    let summed: f64 = responses.iter().map(|r| r.cost_estimate).sum();
    assert!(summed <= total_cost + 1e-12, "Split never exceeds measured cost");
}

// ============================================================================
// Task extraction
// ============================================================================

#[tokio::test]
async fn test_task_chunk_call_shape() {
    let batch = requests((0..4).map(|i| task_payload(&i.to_string())).collect());
    let call = composer().compose_task_chunk(&batch);

    assert_eq!(call.max_tokens, 800, "200 tokens budgeted per email");
    assert!(call.expects_json);
    assert!(call.messages[0].content.contains("Extract tasks"));
    assert!(call.messages[1].content.contains("\"email_tasks\""));
}

#[tokio::test]
async fn test_task_body_truncated_to_800_chars() {
    let batch = requests(vec![RequestPayload::TaskExtraction {
        body: "y".repeat(3000),
    }]);
    let call = composer().compose_task_chunk(&batch);

    assert!(!call.messages[1].content.contains(&"y".repeat(801)));
    assert!(call.messages[1].content.contains(&"y".repeat(800)));
}

#[tokio::test]
async fn test_task_decompose_extracts_tasks_by_index() {
    let batch = requests((0..2).map(|i| task_payload(&i.to_string())).collect());
    let completion = completion_with(
        serde_json::json!({
            "email_tasks": [
                {"index": 1, "tasks": [{"description": "file expenses"}]},
                {"index": 0, "tasks": []},
            ]
        }),
        200,
    );

    let responses = composer().decompose_task_chunk(&batch, &completion, 0);

    assert!(responses[0].success);
    assert_eq!(responses[0].data.as_ref().unwrap()["tasks"], serde_json::json!([]));
    assert!(responses[1].success);
    assert_eq!(
        responses[1].data.as_ref().unwrap()["tasks"][0]["description"],
        serde_json::json!("file expenses")
    );
}

// ============================================================================
// Draft generation and generic
// ============================================================================

#[tokio::test]
async fn test_draft_defaults_and_overrides() {
    let defaulted = requests(vec![draft_payload("renewal")]);
    let call = composer().compose_draft(&defaulted[0]);
    assert_eq!(call.model, "gpt-5-mini-2025-08-07");
    assert_eq!(call.temperature, 0.3);
    assert_eq!(call.max_tokens, 500);
    assert!(!call.expects_json);

    let overridden = requests(vec![RequestPayload::DraftGeneration {
        messages: vec![ChatMessage::user("hello")],
        model: Some("gpt-5-nano-2025-08-07".into()),
        temperature: Some(0.9),
        max_tokens: Some(64),
    }]);
    let call = composer().compose_draft(&overridden[0]);
    assert_eq!(call.model, "gpt-5-nano-2025-08-07");
    assert_eq!(call.temperature, 0.9);
    assert_eq!(call.max_tokens, 64);
}

#[tokio::test]
async fn test_draft_decompose_wraps_content() {
    let batch = requests(vec![draft_payload("renewal")]);
    let completion = Completion {
        content: "Happy to extend the deadline.".to_string(),
        json: None,
        usage: TokenUsage {
            prompt_tokens: 60,
            completion_tokens: 30,
            total_tokens: 90,
        },
        model: "gpt-5-mini-2025-08-07".to_string(),
    };

    let response = composer().decompose_draft(&batch[0], &completion, 17);

    assert!(response.success);
    assert_eq!(
        response.data.as_ref().unwrap()["draft"],
        serde_json::json!("Happy to extend the deadline.")
    );
    assert_eq!(response.tokens_used, 90, "Unbundled calls keep full usage");
    assert_eq!(response.processing_time_ms, 17);
    let expected_cost = ProcessorConfig::default()
        .pricing
        .estimate_cost("gpt-5-mini-2025-08-07", 60, 30);
    assert!((response.cost_estimate - expected_cost).abs() < 1e-12);
}

#[tokio::test]
async fn test_generic_defaults_and_decompose() {
    let batch = requests(vec![RequestPayload::Generic {
        messages: vec![ChatMessage::user("ping")],
        model: None,
        temperature: None,
        max_tokens: None,
    }]);
    let call = composer().compose_generic(&batch[0]);
    assert_eq!(call.model, "gpt-5-nano-2025-08-07");
    assert_eq!(call.temperature, 0.1);
    assert_eq!(call.max_tokens, 300);

    let completion = Completion {
        content: "pong".to_string(),
        json: None,
        usage: TokenUsage {
            prompt_tokens: 5,
            completion_tokens: 1,
            total_tokens: 6,
        },
        model: call.model.clone(),
    };
    let response = composer().decompose_generic(&batch[0], &completion, 3);
    let data = response.data.as_ref().unwrap();
    assert_eq!(data["content"], serde_json::json!("pong"));
    assert_eq!(data["model"], serde_json::json!("gpt-5-nano-2025-08-07"));
    assert_eq!(data["usage"]["total_tokens"], serde_json::json!(6));
}

#[tokio::test]
async fn test_generic_payload_parameters_flow_through() {
    let batch = requests(vec![generic_payload("notes")]);
    let call = composer().compose_generic(&batch[0]);
    assert_eq!(call.temperature, 0.0);
    assert_eq!(call.max_tokens, 100);
}

// ============================================================================
// Partitioning and fingerprints
// ============================================================================

#[tokio::test]
async fn test_partition_preserves_first_seen_order() {
    let batch = requests(vec![
        classification_payload("a"),
        draft_payload("b"),
        classification_payload("c"),
        task_payload("d"),
    ]);
    let ids: Vec<String> = batch.iter().map(|r| r.id.clone()).collect();

    let groups = partition_by_type(batch);

    assert_eq!(groups.len(), 3);
    assert_eq!(groups[0].0, RequestType::Classification);
    assert_eq!(groups[0].1.len(), 2);
    assert_eq!(groups[0].1[0].id, ids[0], "FIFO preserved within type");
    assert_eq!(groups[0].1[1].id, ids[2]);
    assert_eq!(groups[1].0, RequestType::DraftGeneration);
    assert_eq!(groups[2].0, RequestType::TaskExtraction);
}

#[tokio::test]
async fn test_call_fingerprint_tracks_content() {
    let batch_a = requests(vec![classification_payload("a")]);
    let batch_b = requests(vec![classification_payload("b")]);

    let call_a1 = composer().compose_classification(&batch_a);
    let call_a2 = composer().compose_classification(&batch_a);
    let call_b = composer().compose_classification(&batch_b);

    assert_eq!(call_a1.fingerprint(), call_a2.fingerprint());
    assert_ne!(call_a1.fingerprint(), call_b.fingerprint());
}
