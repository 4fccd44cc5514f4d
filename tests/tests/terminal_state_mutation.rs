//! Seed scenario 3: a batch already in a terminal state absorbs any further
//! event — the denial is still recorded (violation + audit FAILURE), but
//! the batch does not move again.

use chrono::Utc;
use procguard_core::engine::{ActionRequest, LifecycleEngine};
use procguard_core::error::ProcGuardError;
use procguard_core::fsm::BatchState;
use procguard_core::repository::{LedgerTransaction, Repository};
use procguard_core::role::{BatchEventType, Role};
use procguard_integration_tests::{seeded_repository, BATCH_ID};
use serde_json::json;

#[tokio::test]
async fn event_against_completed_batch_is_denied_without_further_state_change() {
    let repo = seeded_repository(1).await;
    // Force the batch straight to COMPLETED without going through the
    // engine; this scenario is about what happens to an *already* terminal
    // batch, not about how it got there.
    {
        let mut txn = repo.begin().await.unwrap();
        txn.update_batch_state(BATCH_ID, BatchState::Completed).await.unwrap();
        txn.commit().await.unwrap();
    }

    let engine = LifecycleEngine::new(repo.clone());
    let err = engine
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
        .unwrap_err();
    assert!(matches!(err, ProcGuardError::TerminalStateMutation { .. }));

    let batch = repo.batch(BATCH_ID).await.unwrap();
    assert_eq!(batch.current_state, BatchState::Completed);

    let violations = repo.violations().await;
    assert_eq!(violations.len(), 1);
    assert_eq!(violations[0].rule_code, "TERMINAL_STATE_MUTATION");
}
