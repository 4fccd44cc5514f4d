//! Shared fixtures for the integration suite. Builds a small procedure and
//! SOP catalogue that every scenario test seeds into a fresh
//! [`MemoryRepository`], so each test starts from identical, known ledger
//! state rather than hand-rolling its own.

use chrono::Utc;
use procguard_core::fsm::BatchState;
use procguard_core::model::{Batch, EnforcementAction, Procedure, ProcedureStep, Sop};
use procguard_core::role::Role;
use procguard_store::MemoryRepository;

pub const PROCEDURE_ID: &str = "PROC-MIX-01";
pub const BATCH_ID: &str = "BATCH-0001";

/// A two-step procedure: step one is unsupervised, step two requires
/// Supervisor approval before it can be progressed.
pub fn sample_procedure(version: i32) -> Procedure {
    Procedure {
        procedure_id: PROCEDURE_ID.to_string(),
        version,
        steps: vec![
            ProcedureStep {
                step_id: "WEIGH".to_string(),
                order: 1,
                name: "Weigh raw material".to_string(),
                requires_approval: false,
                approver_role: None,
            },
            ProcedureStep {
                step_id: "MIX".to_string(),
                order: 2,
                name: "Mix under supervision".to_string(),
                requires_approval: true,
                approver_role: Some(Role::Supervisor),
            },
        ],
    }
}

/// One active SOP bound to `PROGRESS_WITHOUT_APPROVAL`, with a single
/// enforcement action so enforcement-chain tests have something to walk.
pub fn sample_sop() -> Sop {
    Sop {
        id: "SOP-ESCALATE-01".to_string(),
        name: "Escalate unauthorized progression".to_string(),
        version: 1,
        immutable_hash: "test-fixture-hash".to_string(),
        is_active: true,
        rule_codes: vec!["PROGRESS_WITHOUT_APPROVAL".to_string()],
        enforcement_actions: vec![EnforcementAction {
            action_type: "NOTIFY_QA".to_string(),
            parameters: serde_json::json!({"channel": "qa-escalations"}),
        }],
    }
}

/// A fresh in-memory ledger seeded with [`sample_procedure`] and
/// [`sample_sop`], with one batch created against it in the `CREATED`
/// state.
pub async fn seeded_repository(procedure_version: i32) -> MemoryRepository {
    let repo = MemoryRepository::new();
    repo.seed_procedure(sample_procedure(procedure_version)).await;
    repo.seed_sop(sample_sop()).await;
    repo.seed_batch(Batch {
        batch_id: BATCH_ID.to_string(),
        procedure_id: PROCEDURE_ID.to_string(),
        procedure_version,
        current_state: BatchState::Created,
        created_at: Utc::now(),
    })
    .await;
    repo
}
