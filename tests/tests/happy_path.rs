//! Seed scenario 1: a batch that moves cleanly through request_approval ->
//! approve_step -> progress_step accrues four SUCCESS audit rows and no
//! violations.

use chrono::Utc;
use procguard_core::engine::{ActionRequest, LifecycleEngine};
use procguard_core::fsm::BatchState;
use procguard_core::model::AuditResult;
use procguard_core::role::{BatchEventType, Role};
use procguard_integration_tests::{seeded_repository, BATCH_ID};
use serde_json::json;

#[tokio::test]
async fn happy_path_produces_four_success_audits_and_no_violations() {
    let repo = seeded_repository(1).await;
    let engine = LifecycleEngine::new(repo.clone());

    let steps = [
        (BatchEventType::StartBatch, Role::Operator, None),
        (BatchEventType::RequestApproval, Role::Operator, Some("MIX")),
        (BatchEventType::ApproveStep, Role::Supervisor, Some("MIX")),
        (BatchEventType::ProgressStep, Role::Operator, Some("MIX")),
    ];

    for (event, role, step_id) in steps {
        let outcome = engine
            .handle(ActionRequest {
                batch_id: BATCH_ID.to_string(),
                event,
                actor: "operator-1".to_string(),
                role,
                requested_procedure_version: 1,
                step_id: step_id.map(str::to_string),
                payload: json!({}),
                now: Utc::now(),
            })
            .await;
        assert!(outcome.is_ok(), "expected {event} to be accepted, got {outcome:?}");
    }

    let batch = repo.batch(BATCH_ID).await.unwrap();
    assert_eq!(batch.current_state, BatchState::InProgress);

    let audits = repo.audit_logs().await;
    assert_eq!(audits.len(), 4);
    assert!(audits.iter().all(|a| a.result == AuditResult::Success));

    assert!(repo.violations().await.is_empty());
}
