//! The Lifecycle Engine (§4.5): orchestrates authorize -> load -> invariant
//! battery -> (on fail) atomic-violate, (on pass) atomic-advance. This is
//! the only place in the codebase allowed to decide whether an action is
//! accepted or denied; every other component either feeds it facts or
//! reads what it already committed.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use procguard_hash::{canonical_hash, format_timestamp, sha256_hex};

use crate::error::ProcGuardError;
use crate::evidence::{build_node, GENESIS_HASH};
use crate::fsm::{self, BatchState};
use crate::invariants::{check_invariants, InvariantFacts};
use crate::model::{
    AuditLog, AuditResult, Batch, BatchEvent, Decision, EnforcementEvent, EvidenceEventType,
    PolicyDecision, Sop, Violation, ViolationStatus,
};
use crate::repository::{LedgerTransaction, Repository};
use crate::role::{authorize, BatchEventType, Role};

const POLICY_PACKAGE: &str = "procguard.lifecycle";

/// One commanded transition attempt. `requested_procedure_version` and
/// `step_id` come straight from the caller's request; the engine trusts
/// neither for anything except equality checks — the facts that actually
/// decide an outcome (does this step require approval? does an approval
/// already exist?) are always resolved from the ledger.
#[derive(Debug, Clone)]
pub struct ActionRequest {
    pub batch_id: String,
    pub event: BatchEventType,
    pub actor: String,
    pub role: Role,
    pub requested_procedure_version: i32,
    pub step_id: Option<String>,
    pub payload: Value,
    pub now: DateTime<Utc>,
}

/// What the engine did, for callers that want to report the accepted state
/// without a follow-up read.
#[derive(Debug, Clone)]
pub struct ActionOutcome {
    pub new_state: BatchState,
    pub event_id: Uuid,
    pub audit_id: Uuid,
}

pub struct LifecycleEngine<R: Repository> {
    repo: R,
}

impl<R: Repository> LifecycleEngine<R> {
    pub fn new(repo: R) -> Self {
        Self { repo }
    }

    /// Runs one request through the full protocol. On success, returns the
    /// new state; on any invariant failure, the violation/policy/audit
    /// tuple is committed and the original domain error is re-raised.
    #[instrument(skip(self, request), fields(batch_id = %request.batch_id, event = %request.event, actor_role = %request.role))]
    pub async fn handle(&self, request: ActionRequest) -> Result<ActionOutcome, ProcGuardError> {
        // §4.2: authorization happens before any write and before any state
        // is even loaded. A failure here raises immediately with no ledger
        // writes at all.
        authorize(request.role, request.event)?;

        let mut txn = self.repo.begin().await?;
        let batch = txn.load_batch_for_update(&request.batch_id).await?;

        let step_requires_approval = match &request.step_id {
            Some(step_id) => txn
                .fetch_step_definition(&batch.procedure_id, batch.procedure_version, step_id)
                .await?
                .map(|s| s.requires_approval)
                .unwrap_or(false),
            None => false,
        };
        let existing_approval = match &request.step_id {
            Some(step_id) => txn.find_existing_approval(&request.batch_id, step_id).await?,
            None => false,
        };
        let step_already_advanced = match &request.step_id {
            Some(step_id) => txn.step_already_advanced(&request.batch_id, step_id).await?,
            None => false,
        };

        let facts = InvariantFacts {
            current_state: batch.current_state,
            event: request.event,
            actor_role: request.role,
            requested_procedure_version: request.requested_procedure_version,
            bound_procedure_version: batch.procedure_version,
            step_id: request.step_id.clone(),
            step_requires_approval,
            existing_approval,
            step_already_advanced,
        };

        match check_invariants(&facts) {
            Err(violation_err) => {
                let outcome = self
                    .atomic_violate(txn.as_mut(), &batch, &request, &violation_err)
                    .await;
                match outcome {
                    Ok(()) => {
                        txn.commit().await?;
                        warn!(rule = violation_err.rule_code().unwrap_or("UNKNOWN"), "action denied and recorded");
                        Err(violation_err)
                    }
                    Err(write_err) => {
                        txn.rollback().await?;
                        Err(write_err)
                    }
                }
            }
            Ok(()) => match self.atomic_advance(txn.as_mut(), &batch, &request).await {
                Ok(outcome) => {
                    txn.commit().await?;
                    info!(new_state = %outcome.new_state, "action accepted");
                    Ok(outcome)
                }
                Err(write_err) => {
                    txn.rollback().await?;
                    Err(write_err)
                }
            },
        }
    }

    /// §4.5 step 4: the atomic-violate path. Writes exactly one policy
    /// decision, one violation, the enforcement chain, and one audit row,
    /// and sets the batch to VIOLATED unless it was already terminal (a
    /// denial against an already-terminal batch is still recorded, but the
    /// state does not move again — terminal states are absorbing).
    async fn atomic_violate(
        &self,
        txn: &mut dyn LedgerTransaction,
        batch: &Batch,
        request: &ActionRequest,
        violation_err: &ProcGuardError,
    ) -> Result<(), ProcGuardError> {
        let rule_code = violation_err
            .rule_code()
            .expect("atomic_violate only called for recordable violations");

        let input_facts = json!({
            "batch_id": request.batch_id,
            "event": request.event.to_string(),
            "actor": request.actor,
            "actor_role": request.role.to_string(),
            "current_state": batch.current_state.to_string(),
            "requested_procedure_version": request.requested_procedure_version,
            "bound_procedure_version": batch.procedure_version,
            "step_id": request.step_id,
        });
        let input_hash = canonical_hash(&input_facts).map_err(|e| ProcGuardError::Serialization(e.to_string()))?;
        let result_hash = sha256_hex("deny");
        let decision_hash = sha256_hex(format!(
            "{}:{}:{}:{}",
            POLICY_PACKAGE,
            input_hash,
            result_hash,
            format_timestamp(request.now)
        ));

        let decision = PolicyDecision {
            decision_id: Uuid::new_v4(),
            timestamp: request.now,
            policy_package: POLICY_PACKAGE.to_string(),
            rule: rule_code.to_string(),
            decision: Decision::Deny,
            resource_type: "batch".to_string(),
            resource_id: request.batch_id.clone(),
            input_hash: input_hash.clone(),
            result_hash: result_hash.clone(),
            decision_hash: decision_hash.clone(),
            payload: input_facts.clone(),
        };
        txn.insert_policy_decision(decision.clone()).await?;

        let sop = txn.resolve_sop(rule_code).await?;

        let violation_payload = json!({
            "batch_id": request.batch_id,
            "rule_code": rule_code,
            "actor": request.actor,
            "actor_role": request.role.to_string(),
            "detected_state": batch.current_state.to_string(),
            "step_id": request.step_id,
            "sop_id": sop.as_ref().map(|s| s.id.clone()),
        });
        let violation_hash =
            canonical_hash(&violation_payload).map_err(|e| ProcGuardError::Serialization(e.to_string()))?;

        let most_recent_filter = txn.most_recent_filter_event(&request.actor).await?;

        let violation = Violation {
            violation_id: Uuid::new_v4(),
            batch_id: request.batch_id.clone(),
            rule_code: rule_code.to_string(),
            sop_id: sop.as_ref().map(|s| s.id.clone()),
            detected_at: request.now,
            status: ViolationStatus::Open,
            violation_hash: violation_hash.clone(),
            opa_decision_hash: decision_hash.clone(),
            triggering_filter_event_id: most_recent_filter.as_ref().map(|f| f.id),
            payload: violation_payload,
        };
        txn.insert_violation(violation.clone()).await?;

        // A duplicate-approval denial must not clobber the winning request's
        // already-committed APPROVED state (spec.md:216) — the loser's
        // violation is still recorded in full, but `current_state` is left
        // exactly as this transaction observed it.
        let is_duplicate_approval_race = matches!(violation_err, ProcGuardError::DuplicateApproval { .. });
        if !batch.current_state.is_terminal() && !is_duplicate_approval_race {
            txn.update_batch_state(&request.batch_id, BatchState::Violated).await?;
        }

        self.build_enforcement_chain(txn, &violation, sop.as_ref(), most_recent_filter.as_ref())
            .await?;

        let audit_payload = json!({
            "batch_id": request.batch_id,
            "action": request.event.to_string(),
            "actor": request.actor,
            "actor_role": request.role.to_string(),
            "result": "FAILURE",
            "rule": rule_code,
        });
        let audit_hash = canonical_hash(&audit_payload).map_err(|e| ProcGuardError::Serialization(e.to_string()))?;
        let audit = AuditLog {
            audit_id: Uuid::new_v4(),
            batch_id: Some(request.batch_id.clone()),
            expected_state: fsm::next_state(batch.current_state, request.event)
                .map(|s| s.to_string())
                .unwrap_or_else(|| batch.current_state.to_string()),
            actual_state: batch.current_state.to_string(),
            action: request.event.to_string(),
            result: AuditResult::Failure,
            actor: request.actor.clone(),
            actor_role: request.role.to_string(),
            timestamp: request.now,
            violation_id: Some(violation.violation_id),
            audit_hash,
            violation_hash_link: Some(violation_hash),
            payload: audit_payload,
        };
        txn.insert_audit(audit).await?;

        Ok(())
    }

    /// Appends the enforcement chain nodes for one violation: an optional
    /// leading `FILTER_APPLIED`, the mandatory `VIOLATION_DETECTED`, an
    /// optional `SOP_INVOKED` + one `ENFORCEMENT_EXECUTED` per SOP action.
    /// `AUDIT` and `EXPORT_GENERATED` nodes are appended by their own
    /// call sites (the audit insert just below, and export generation
    /// respectively) since they happen after this function returns.
    async fn build_enforcement_chain(
        &self,
        txn: &mut dyn LedgerTransaction,
        violation: &Violation,
        sop: Option<&Sop>,
        filter_event: Option<&crate::model::FilterAuditEvent>,
    ) -> Result<(), ProcGuardError> {
        let mut prev_hash = GENESIS_HASH.to_string();

        if let Some(filter_event) = filter_event {
            let node = build_node(
                violation.violation_id,
                EvidenceEventType::FilterApplied,
                filter_event.id.to_string(),
                &json!({"filter_id": filter_event.id}),
                &prev_hash,
                violation.detected_at,
            )?;
            prev_hash = node.hash.clone();
            txn.append_evidence_node(node).await?;
        }

        let violation_node = build_node(
            violation.violation_id,
            EvidenceEventType::ViolationDetected,
            violation.violation_id.to_string(),
            &violation.payload,
            &prev_hash,
            violation.detected_at,
        )?;
        prev_hash = violation_node.hash.clone();
        txn.append_evidence_node(violation_node).await?;

        if let Some(sop) = sop {
            let sop_node = build_node(
                violation.violation_id,
                EvidenceEventType::SopInvoked,
                sop.id.clone(),
                &json!({"sop_id": sop.id, "version": sop.version}),
                &prev_hash,
                violation.detected_at,
            )?;
            prev_hash = sop_node.hash.clone();
            txn.append_evidence_node(sop_node).await?;

            for action in &sop.enforcement_actions {
                let event = EnforcementEvent {
                    id: Uuid::new_v4(),
                    violation_id: violation.violation_id,
                    sop_id: sop.id.clone(),
                    action_type: action.action_type.clone(),
                    executed_at: violation.detected_at,
                    executed_by: EnforcementEvent::SYSTEM_ACTOR.to_string(),
                    outcome: "EXECUTED".to_string(),
                };
                txn.insert_enforcement_event(event.clone()).await?;

                let node = build_node(
                    violation.violation_id,
                    EvidenceEventType::EnforcementExecuted,
                    event.id.to_string(),
                    &json!({"action_type": event.action_type, "sop_id": sop.id}),
                    &prev_hash,
                    violation.detected_at,
                )?;
                prev_hash = node.hash.clone();
                txn.append_evidence_node(node).await?;
            }
        }

        Ok(())
    }

    /// §4.5 step 5: the accepted-transition path. Writes exactly one
    /// BatchEvent and one AuditLog(SUCCESS).
    async fn atomic_advance(
        &self,
        txn: &mut dyn LedgerTransaction,
        batch: &Batch,
        request: &ActionRequest,
    ) -> Result<ActionOutcome, ProcGuardError> {
        let new_state = fsm::next_state(batch.current_state, request.event)
            .expect("invariant battery already proved this transition is defined");

        txn.update_batch_state(&request.batch_id, new_state).await?;

        let event_id = Uuid::new_v4();
        let mut payload = request.payload.clone();
        if let (Some(step_id), Value::Object(map)) = (&request.step_id, &mut payload) {
            map.insert("step_id".to_string(), json!(step_id));
        }
        let event = BatchEvent {
            event_id,
            batch_id: request.batch_id.clone(),
            event_type: request.event.to_string(),
            payload,
            occurred_at: request.now,
        };
        txn.append_event(event).await?;

        let audit_payload = json!({
            "batch_id": request.batch_id,
            "action": request.event.to_string(),
            "actor": request.actor,
            "actor_role": request.role.to_string(),
            "result": "SUCCESS",
            "new_state": new_state.to_string(),
        });
        let audit_hash = canonical_hash(&audit_payload).map_err(|e| ProcGuardError::Serialization(e.to_string()))?;
        let audit_id = Uuid::new_v4();
        let audit = AuditLog {
            audit_id,
            batch_id: Some(request.batch_id.clone()),
            expected_state: new_state.to_string(),
            actual_state: new_state.to_string(),
            action: request.event.to_string(),
            result: AuditResult::Success,
            actor: request.actor.clone(),
            actor_role: request.role.to_string(),
            timestamp: request.now,
            violation_id: None,
            audit_hash,
            violation_hash_link: None,
            payload: audit_payload,
        };
        txn.insert_audit(audit).await?;

        Ok(ActionOutcome {
            new_state,
            event_id,
            audit_id,
        })
    }

    /// Violation resolution (expansion, §2.2): a paperwork event, not an
    /// unwind. Requires Supervisor, requires the violation to be OPEN,
    /// writes no FSM transition, and produces its own SUCCESS audit row.
    #[instrument(skip(self), fields(violation_id = %violation_id))]
    pub async fn resolve_violation(
        &self,
        violation_id: Uuid,
        actor: &str,
        role: Role,
        now: DateTime<Utc>,
    ) -> Result<(), ProcGuardError> {
        if role != Role::Supervisor {
            return Err(ProcGuardError::Unauthorized {
                role: role.to_string(),
                event: "resolve_violation".to_string(),
            });
        }

        let mut txn = self.repo.begin().await?;
        let existing = txn.fetch_violation(violation_id).await?;
        if existing.status != ViolationStatus::Open {
            txn.rollback().await?;
            return Err(ProcGuardError::BatchAlreadySealed(violation_id.to_string()));
        }

        let resolved = match txn.mark_violation_resolved(violation_id).await {
            Ok(v) => v,
            Err(e) => {
                txn.rollback().await?;
                return Err(e);
            }
        };

        let audit_payload = json!({
            "violation_id": violation_id,
            "action": "resolve_violation",
            "actor": actor,
            "actor_role": role.to_string(),
            "result": "SUCCESS",
        });
        let audit_hash = match canonical_hash(&audit_payload) {
            Ok(h) => h,
            Err(e) => {
                txn.rollback().await?;
                return Err(ProcGuardError::Serialization(e.to_string()));
            }
        };
        let audit = AuditLog {
            audit_id: Uuid::new_v4(),
            batch_id: Some(resolved.batch_id.clone()),
            expected_state: "N/A".to_string(),
            actual_state: "N/A".to_string(),
            action: "resolve_violation".to_string(),
            result: AuditResult::Success,
            actor: actor.to_string(),
            actor_role: role.to_string(),
            timestamp: now,
            violation_id: Some(violation_id),
            audit_hash,
            violation_hash_link: Some(resolved.violation_hash.clone()),
            payload: audit_payload,
        };
        if let Err(e) = txn.insert_audit(audit).await {
            txn.rollback().await?;
            return Err(e);
        }

        txn.commit().await
    }
}
