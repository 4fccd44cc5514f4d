//! Seed scenario 4: two concurrent `approve_step` requests against the same
//! (batch, step) race for the same approval. Exactly one wins; the other is
//! rejected with DUPLICATE_APPROVAL and records its own violation.

use std::sync::Arc;

use chrono::Utc;
use procguard_core::engine::{ActionRequest, LifecycleEngine};
use procguard_core::error::ProcGuardError;
use procguard_core::fsm::BatchState;
use procguard_core::role::{BatchEventType, Role};
use procguard_integration_tests::{seeded_repository, BATCH_ID};
use serde_json::json;

#[tokio::test]
async fn only_one_of_two_concurrent_approvals_succeeds() {
    let repo = seeded_repository(1).await;
    let engine = Arc::new(LifecycleEngine::new(repo.clone()));

    engine
        .handle(ActionRequest {
            batch_id: BATCH_ID.to_string(),
            event: BatchEventType::StartBatch,
            actor: "operator-1".to_string(),
            role: Role::Operator,
            requested_procedure_version: 1,
            step_id: None,
            payload: json!({}),
            now: Utc::now(),
        })
        .await
        .unwrap();
    engine
        .handle(ActionRequest {
            batch_id: BATCH_ID.to_string(),
            event: BatchEventType::RequestApproval,
            actor: "operator-1".to_string(),
            role: Role::Operator,
            requested_procedure_version: 1,
            step_id: Some("MIX".to_string()),
            payload: json!({}),
            now: Utc::now(),
        })
        .await
        .unwrap();

    let request = |actor: &str| ActionRequest {
        batch_id: BATCH_ID.to_string(),
        event: BatchEventType::ApproveStep,
        actor: actor.to_string(),
        role: Role::Supervisor,
        requested_procedure_version: 1,
        step_id: Some("MIX".to_string()),
        payload: json!({}),
        now: Utc::now(),
    };

    let engine_a = engine.clone();
    let engine_b = engine.clone();
    let (result_a, result_b) = tokio::join!(
        engine_a.handle(request("supervisor-a")),
        engine_b.handle(request("supervisor-b")),
    );

    let outcomes = [result_a, result_b];
    let successes = outcomes.iter().filter(|r| r.is_ok()).count();
    let failures: Vec<_> = outcomes.iter().filter_map(|r| r.as_ref().err()).collect();

    assert_eq!(successes, 1, "exactly one of the two racing approvals must win");
    assert_eq!(failures.len(), 1);
    assert!(matches!(failures[0], ProcGuardError::DuplicateApproval { .. }));

    let batch = repo.batch(BATCH_ID).await.unwrap();
    assert_eq!(batch.current_state, BatchState::Approved);

    let violations = repo.violations().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_code, "DUPLICATE_APPROVAL");
}
