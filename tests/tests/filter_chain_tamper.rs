//! Seed scenario 6: three filter-audit rows are written, then the middle
//! row's payload is tampered with in storage. Re-verification must point at
//! exactly that row, and an evidence export built from a tampered violation
//! chain must refuse with FORENSIC_INTEGRITY_COMPROMISED rather than
//! silently serve bad evidence.

use chrono::Utc;
use procguard_core::error::ProcGuardError;
use procguard_core::evidence::{verify_chain as verify_evidence_chain, EvidenceChainInputs};
use procguard_core::filter_chain::{build_event, verify_chain, GENESIS_HASH};
use procguard_core::model::{Decision, PolicyDecision, Violation, ViolationStatus};
use procguard_core::repository::Repository;
use procguard_store::MemoryRepository;
use procguard_hash::canonical_hash;
use serde_json::json;
use uuid::Uuid;

#[tokio::test]
async fn tampering_a_filter_row_is_caught_by_reverification() {
    let repo = MemoryRepository::new();

    let ts = Utc::now();
    let e1 = build_event(GENESIS_HASH, "auditor-1".into(), "batches".into(), json!({"state": "VIOLATED"}), ts).unwrap();
    let e2 = build_event(&e1.hash, "auditor-1".into(), "batches".into(), json!({"state": "COMPLETED"}), ts).unwrap();
    let e3 = build_event(&e2.hash, "auditor-1".into(), "batches".into(), json!({"state": "IN_PROGRESS"}), ts).unwrap();

    repo.append_filter_event(e1).await.unwrap();
    repo.append_filter_event(e2.clone()).await.unwrap();
    repo.append_filter_event(e3).await.unwrap();

    let mut rows = repo.fetch_filter_chain(Some("auditor-1")).await.unwrap();
    assert_eq!(rows.len(), 3);
    assert!(verify_chain(&rows).valid);

    let middle_id = e2.id;
    let middle = rows.iter_mut().find(|r| r.id == middle_id).unwrap();
    middle.filter_payload = json!({"state": "TAMPERED"});

    let result = verify_chain(&rows);
    assert!(!result.valid);
    assert_eq!(result.first_bad_id, Some(middle_id));
}

#[tokio::test]
async fn evidence_export_refuses_a_tampered_violation_chain() {
    let payload = json!({"rule": "PROGRESS_WITHOUT_APPROVAL"});
    let original_hash = canonical_hash(&payload).unwrap();

    let mut violation = Violation {
        violation_id: Uuid::new_v4(),
        batch_id: "B1".to_string(),
        rule_code: "PROGRESS_WITHOUT_APPROVAL".to_string(),
        sop_id: None,
        detected_at: Utc::now(),
        status: ViolationStatus::Open,
        violation_hash: original_hash,
        opa_decision_hash: "decisionhash".to_string(),
        triggering_filter_event_id: None,
        payload,
    };
    // Simulate a corrupted row read back from storage: the payload changed
    // but the stored hash did not follow it.
    violation.payload = json!({"rule": "TAMPERED"});

    let policy = PolicyDecision {
        decision_id: Uuid::new_v4(),
        timestamp: Utc::now(),
        policy_package: "procguard.lifecycle".to_string(),
        rule: "PROGRESS_WITHOUT_APPROVAL".to_string(),
        decision: Decision::Deny,
        resource_type: "batch".to_string(),
        resource_id: "B1".to_string(),
        input_hash: "ih".to_string(),
        result_hash: "rh".to_string(),
        decision_hash: violation.opa_decision_hash.clone(),
        payload: json!({}),
    };

    let inputs = EvidenceChainInputs {
        violation: &violation,
        policy: Some(&policy),
        audit: None,
        nodes: &[],
        snapshot_anchor: None,
    };

    let err = verify_evidence_chain(&inputs).unwrap_err();
    assert!(matches!(err, ProcGuardError::ForensicIntegrityCompromised(_)));
}
