//! Seed scenario 2: progressing an approval-gated step with no approval on
//! record denies the request, moves the batch to VIOLATED, and writes
//! exactly one violation / policy decision / audit FAILURE.

use chrono::Utc;
use procguard_core::engine::{ActionRequest, LifecycleEngine};
use procguard_core::error::ProcGuardError;
use procguard_core::fsm::BatchState;
use procguard_core::model::AuditResult;
use procguard_core::role::{BatchEventType, Role};
use procguard_integration_tests::{seeded_repository, BATCH_ID};
use serde_json::json;

#[tokio::test]
async fn progress_without_approval_is_denied_and_recorded() {
    let repo = seeded_repository(1).await;
    let engine = LifecycleEngine::new(repo.clone());

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

    let err = engine
        .handle(ActionRequest {
            batch_id: BATCH_ID.to_string(),
            event: BatchEventType::ProgressStep,
            actor: "operator-1".to_string(),
            role: Role::Operator,
            requested_procedure_version: 1,
            step_id: Some("MIX".to_string()),
            payload: json!({}),
            now: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, ProcGuardError::ProgressWithoutApproval { step_id } if step_id == "MIX"));

    let batch = repo.batch(BATCH_ID).await.unwrap();
    assert_eq!(batch.current_state, BatchState::Violated);

    let violations = repo.violations().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_code, "PROGRESS_WITHOUT_APPROVAL");

    let decisions = repo.policy_decisions().await;
    assert_eq!(decisions.len(), 1);

    let audits = repo.audit_logs().await;
    let failures: Vec<_> = audits.iter().filter(|a| a.result == AuditResult::Failure).collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].violation_id, Some(violations[0].violation_id));
}
