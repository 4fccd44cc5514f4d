//! Seed scenario 5: a batch pinned to procedure version 1 rejects a request
//! carrying version 2, regardless of what the requested event would
//! otherwise do.

use chrono::Utc;
use procguard_core::engine::{ActionRequest, LifecycleEngine};
use procguard_core::error::ProcGuardError;
use procguard_core::role::{BatchEventType, Role};
use procguard_integration_tests::{seeded_repository, BATCH_ID};
use serde_json::json;

#[tokio::test]
async fn mismatched_procedure_version_is_denied() {
    let repo = seeded_repository(1).await;
    let engine = LifecycleEngine::new(repo.clone());

    let err = engine
        .handle(ActionRequest {
            batch_id: BATCH_ID.to_string(),
            event: BatchEventType::StartBatch,
            actor: "operator-1".to_string(),
            role: Role::Operator,
            requested_procedure_version: 2,
            step_id: None,
            payload: json!({}),
            now: Utc::now(),
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ProcGuardError::ProcedureVersionMismatch { requested: 2, bound: 1 }
    ));

    let violations = repo.violations().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_code, "PROCEDURE_VERSION_MISMATCH");

    let audits = repo.audit_logs().await;
    assert_eq!(audits.len(), 1);
}
