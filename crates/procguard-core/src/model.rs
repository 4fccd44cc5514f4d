//! Domain records. Every type here maps 1:1 onto a table in the persistence
//! schema; `procguard-store` is responsible for getting these in and out of
//! Postgres, this module only defines their shape and the pure helpers
//! (hashing, validation) that don't need a database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::ProcGuardError;
use crate::fsm::BatchState;
use crate::role::Role;

/// One step within a procedure version. `order` is 1-based and, across a
/// whole procedure, forms a dense sequence (enforced by
/// [`validate_procedure_structure`]).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProcedureStep {
    pub step_id: String,
    pub order: i32,
    pub name: String,
    pub requires_approval: bool,
    pub approver_role: Option<Role>,
}

/// An immutable, versioned procedure. Once a version is published it is
/// never mutated or deleted — a new version is a new row, not an edit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Procedure {
    pub procedure_id: String,
    pub version: i32,
    pub steps: Vec<ProcedureStep>,
}

impl Procedure {
    pub fn step(&self, step_id: &str) -> Option<&ProcedureStep> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}

/// Structural validation run once, at publish time, before a procedure
/// version is ever written to the ledger.
///
/// A structurally invalid procedure never reaches storage, so the
/// immutability trigger never has to defend against one.
pub fn validate_procedure_structure(procedure: &Procedure) -> Result<(), String> {
    if procedure.version < 1 {
        return Err(format!("procedure version must be >= 1, got {}", procedure.version));
    }
    if procedure.steps.is_empty() {
        return Err("procedure must have at least one step".to_string());
    }

    let mut seen_ids = std::collections::HashSet::new();
    for step in &procedure.steps {
        if !seen_ids.insert(&step.step_id) {
            return Err(format!("duplicate step_id '{}' in procedure", step.step_id));
        }
    }

    let mut orders: Vec<i32> = procedure.steps.iter().map(|s| s.order).collect();
    orders.sort_unstable();
    for (expected, actual) in (1..=orders.len() as i32).zip(orders.iter()) {
        if expected != *actual {
            return Err(format!(
                "procedure step order must be a dense 1-based sequence; expected {expected}, found {actual}"
            ));
        }
    }

    Ok(())
}

/// A single execution of a procedure, pinned to its version at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
    pub batch_id: String,
    pub procedure_id: String,
    pub procedure_version: i32,
    pub current_state: BatchState,
    pub created_at: DateTime<Utc>,
}

/// An append-only record of a transition attempt that was accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchEvent {
    pub event_id: Uuid,
    pub batch_id: String,
    pub event_type: String,
    pub payload: Value,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ViolationStatus {
    Open,
    Resolved,
}

/// An immutable record of a denied transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub violation_id: Uuid,
    pub batch_id: String,
    pub rule_code: String,
    pub sop_id: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub status: ViolationStatus,
    pub violation_hash: String,
    pub opa_decision_hash: String,
    pub triggering_filter_event_id: Option<Uuid>,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Deny,
}

/// The root-of-trust record for a deny/allow outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyDecision {
    pub decision_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub policy_package: String,
    pub rule: String,
    pub decision: Decision,
    pub resource_type: String,
    pub resource_id: String,
    pub input_hash: String,
    pub result_hash: String,
    pub decision_hash: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AuditResult {
    Success,
    Failure,
}

/// The courtroom-safe record of every action the engine processes, success
/// or failure, one row per action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub audit_id: Uuid,
    pub batch_id: Option<String>,
    pub expected_state: String,
    pub actual_state: String,
    pub action: String,
    pub result: AuditResult,
    pub actor: String,
    pub actor_role: String,
    pub timestamp: DateTime<Utc>,
    pub violation_id: Option<Uuid>,
    pub audit_hash: String,
    pub violation_hash_link: Option<String>,
    pub payload: Value,
}

/// One row of the tamper-evident filter-query audit chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterAuditEvent {
    pub id: Uuid,
    pub user_id: String,
    pub screen: String,
    pub filter_payload: Value,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvidenceEventType {
    FilterApplied,
    ViolationDetected,
    SopInvoked,
    EnforcementExecuted,
    ExportGenerated,
}

impl std::fmt::Display for EvidenceEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EvidenceEventType::FilterApplied => "FILTER_APPLIED",
            EvidenceEventType::ViolationDetected => "VIOLATION_DETECTED",
            EvidenceEventType::SopInvoked => "SOP_INVOKED",
            EvidenceEventType::EnforcementExecuted => "ENFORCEMENT_EXECUTED",
            EvidenceEventType::ExportGenerated => "EXPORT_GENERATED",
        };
        write!(f, "{s}")
    }
}

/// One node in a violation's per-violation evidence chain.
///
/// `payload` is the exact value `hash` was computed over (alongside
/// `prev_hash` and `created_at`) — it is persisted, not just hashed in
/// passing, so a later re-verification can recompute `hash` from scratch
/// rather than trust the linkage alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceChainNode {
    pub id: Uuid,
    pub violation_id: Uuid,
    pub event_type: EvidenceEventType,
    pub source_id: String,
    pub payload: Value,
    pub prev_hash: String,
    pub hash: String,
    pub created_at: DateTime<Utc>,
}

/// A named stream's last-verified anchor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: Uuid,
    pub stream_name: String,
    pub last_event_id: Option<Uuid>,
    pub last_event_hash: Option<String>,
    pub snapshot_hash: String,
    pub snapshot_version: i32,
    pub committed_at: DateTime<Utc>,
    pub is_recovery: bool,
}

/// A remediation step owned by a [`Sop`], executed deterministically (no
/// external I/O) when a violation resolves to that SOP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementAction {
    pub action_type: String,
    pub parameters: Value,
}

/// A named, versioned bundle of enforcement actions a rule code resolves to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sop {
    pub id: String,
    pub name: String,
    pub version: i32,
    pub immutable_hash: String,
    pub is_active: bool,
    pub rule_codes: Vec<String>,
    pub enforcement_actions: Vec<EnforcementAction>,
}

/// The immutable record that one [`EnforcementAction`] executed for one
/// violation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnforcementEvent {
    pub id: Uuid,
    pub violation_id: Uuid,
    pub sop_id: String,
    pub action_type: String,
    pub executed_at: DateTime<Utc>,
    pub executed_by: String,
    pub outcome: String,
}

impl EnforcementEvent {
    pub const SYSTEM_ACTOR: &'static str = "SYSTEM";
}

/// Deterministic lookup table: rule_code -> active SOP. A real deployment
/// backs this with a ledger table; the lookup itself stays a pure function
/// of (rule_code, known SOPs) so it can be unit tested without a database.
pub fn resolve_sop<'a>(rule_code: &str, sops: &'a [Sop]) -> Option<&'a Sop> {
    sops.iter()
        .find(|s| s.is_active && s.rule_codes.iter().any(|r| r == rule_code))
}

/// Parses a raw role string at a boundary (e.g. the simulate CLI or a
/// repository row) into a typed [`Role`], rejecting anything unrecognized
/// rather than defaulting it.
pub fn parse_role(raw: &str) -> Result<Role, ProcGuardError> {
    raw.parse()
}
