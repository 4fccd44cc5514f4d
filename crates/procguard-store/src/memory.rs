//! In-memory fake repository. Implements the exact same [`Repository`] /
//! [`LedgerTransaction`] traits the Postgres store does, so Lifecycle
//! Engine unit and property tests run without a database.
//!
//! A single `tokio::sync::Mutex` guards the whole store and is held for
//! the lifetime of one transaction, which over-serializes relative to the
//! production row-scoped lock (§5) but is a strictly stronger guarantee —
//! any test that passes against true per-batch locking also passes here.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use procguard_core::error::ProcGuardError;
use procguard_core::fsm::BatchState;
use procguard_core::model::{
    AuditLog, Batch, BatchEvent, Checkpoint, EnforcementEvent, EvidenceChainNode,
    FilterAuditEvent, PolicyDecision, Procedure, ProcedureStep, Sop, Violation, ViolationStatus,
};
use procguard_core::repository::{LedgerTransaction, Repository};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    procedures: HashMap<(String, i32), Procedure>,
    batches: HashMap<String, Batch>,
    batch_events: Vec<BatchEvent>,
    violations: HashMap<Uuid, Violation>,
    policy_decisions: Vec<PolicyDecision>,
    audit_logs: Vec<AuditLog>,
    sops: Vec<Sop>,
    enforcement_events: Vec<EnforcementEvent>,
    evidence_nodes: Vec<EvidenceChainNode>,
    filter_events: Vec<FilterAuditEvent>,
    checkpoints: Vec<Checkpoint>,
}

/// The in-memory ledger. Cheaply cloneable handle over shared state.
#[derive(Clone)]
pub struct MemoryRepository {
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    pub async fn seed_procedure(&self, procedure: Procedure) {
        let mut state = self.state.lock().await;
        state
            .procedures
            .insert((procedure.procedure_id.clone(), procedure.version), procedure);
    }

    pub async fn seed_batch(&self, batch: Batch) {
        let mut state = self.state.lock().await;
        state.batches.insert(batch.batch_id.clone(), batch);
    }

    pub async fn seed_sop(&self, sop: Sop) {
        let mut state = self.state.lock().await;
        state.sops.push(sop);
    }

    pub async fn batch(&self, batch_id: &str) -> Option<Batch> {
        self.state.lock().await.batches.get(batch_id).cloned()
    }

    pub async fn batch_events(&self, batch_id: &str) -> Vec<BatchEvent> {
        self.state
            .lock()
            .await
            .batch_events
            .iter()
            .filter(|e| e.batch_id == batch_id)
            .cloned()
            .collect()
    }

    pub async fn violations(&self) -> Vec<Violation> {
        self.state.lock().await.violations.values().cloned().collect()
    }

    pub async fn audit_logs(&self) -> Vec<AuditLog> {
        self.state.lock().await.audit_logs.clone()
    }

    pub async fn policy_decisions(&self) -> Vec<PolicyDecision> {
        self.state.lock().await.policy_decisions.clone()
    }

    pub async fn evidence_nodes(&self, violation_id: Uuid) -> Vec<EvidenceChainNode> {
        self.state
            .lock()
            .await
            .evidence_nodes
            .iter()
            .filter(|n| n.violation_id == violation_id)
            .cloned()
            .collect()
    }

    pub async fn enforcement_events(&self, violation_id: Uuid) -> Vec<EnforcementEvent> {
        self.state
            .lock()
            .await
            .enforcement_events
            .iter()
            .filter(|e| e.violation_id == violation_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, ProcGuardError> {
        let guard = self.state.clone().lock_owned().await;
        let original = guard.clone();
        Ok(Box::new(MemoryTransaction {
            guard: Some(guard),
            original,
        }))
    }

    async fn fetch_filter_chain(&self, user_id: Option<&str>) -> Result<Vec<FilterAuditEvent>, ProcGuardError> {
        let state = self.state.lock().await;
        let mut rows: Vec<FilterAuditEvent> = state
            .filter_events
            .iter()
            .filter(|e| user_id.map(|u| u == e.user_id).unwrap_or(true))
            .cloned()
            .collect();
        rows.sort_by_key(|e| e.created_at);
        Ok(rows)
    }

    async fn append_filter_event(&self, event: FilterAuditEvent) -> Result<(), ProcGuardError> {
        let mut state = self.state.lock().await;
        state.filter_events.push(event);
        Ok(())
    }

    async fn append_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), ProcGuardError> {
        let mut state = self.state.lock().await;
        state.checkpoints.push(checkpoint);
        Ok(())
    }

    async fn latest_non_recovery_checkpoint(
        &self,
        stream_name: &str,
    ) -> Result<Option<Checkpoint>, ProcGuardError> {
        let state = self.state.lock().await;
        Ok(state
            .checkpoints
            .iter()
            .filter(|c| c.stream_name == stream_name && !c.is_recovery)
            .max_by_key(|c| c.committed_at)
            .cloned())
    }

    async fn fetch_violation_for_evidence(&self, violation_id: Uuid) -> Result<Violation, ProcGuardError> {
        self.state
            .lock()
            .await
            .violations
            .get(&violation_id)
            .cloned()
            .ok_or_else(|| ProcGuardError::ViolationNotFound(violation_id.to_string()))
    }

    async fn fetch_policy_decision_for_evidence(
        &self,
        decision_hash: &str,
    ) -> Result<Option<PolicyDecision>, ProcGuardError> {
        Ok(self
            .state
            .lock()
            .await
            .policy_decisions
            .iter()
            .find(|d| d.decision_hash == decision_hash)
            .cloned())
    }

    async fn fetch_audit_for_violation(&self, violation_id: Uuid) -> Result<Option<AuditLog>, ProcGuardError> {
        Ok(self
            .state
            .lock()
            .await
            .audit_logs
            .iter()
            .find(|a| a.violation_id == Some(violation_id))
            .cloned())
    }

    async fn fetch_evidence_chain_for_violation(
        &self,
        violation_id: Uuid,
    ) -> Result<Vec<EvidenceChainNode>, ProcGuardError> {
        let mut nodes: Vec<EvidenceChainNode> = self
            .state
            .lock()
            .await
            .evidence_nodes
            .iter()
            .filter(|n| n.violation_id == violation_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.created_at);
        Ok(nodes)
    }

    async fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

struct MemoryTransaction {
    guard: Option<OwnedMutexGuard<MemoryState>>,
    original: MemoryState,
}

impl MemoryTransaction {
    fn state_mut(&mut self) -> &mut MemoryState {
        self.guard.as_mut().expect("transaction used after commit/rollback")
    }

    fn state(&self) -> &MemoryState {
        self.guard.as_ref().expect("transaction used after commit/rollback")
    }
}

#[async_trait]
impl LedgerTransaction for MemoryTransaction {
    async fn load_batch_for_update(&mut self, batch_id: &str) -> Result<Batch, ProcGuardError> {
        self.state()
            .batches
            .get(batch_id)
            .cloned()
            .ok_or_else(|| ProcGuardError::BatchNotFound(batch_id.to_string()))
    }

    async fn fetch_procedure(&mut self, procedure_id: &str, version: i32) -> Result<Procedure, ProcGuardError> {
        self.state()
            .procedures
            .get(&(procedure_id.to_string(), version))
            .cloned()
            .ok_or_else(|| ProcGuardError::ProcedureNotFound {
                procedure_id: procedure_id.to_string(),
                version,
            })
    }

    async fn fetch_step_definition(
        &mut self,
        procedure_id: &str,
        version: i32,
        step_id: &str,
    ) -> Result<Option<ProcedureStep>, ProcGuardError> {
        Ok(self
            .state()
            .procedures
            .get(&(procedure_id.to_string(), version))
            .and_then(|p| p.step(step_id).cloned()))
    }

    async fn find_existing_approval(&mut self, batch_id: &str, step_id: &str) -> Result<bool, ProcGuardError> {
        Ok(self.state().batch_events.iter().any(|e| {
            e.batch_id == batch_id
                && e.event_type == "approve_step"
                && e.payload.get("step_id").and_then(|v| v.as_str()) == Some(step_id)
        }))
    }

    async fn step_already_advanced(&mut self, batch_id: &str, step_id: &str) -> Result<bool, ProcGuardError> {
        Ok(self.state().batch_events.iter().any(|e| {
            e.batch_id == batch_id
                && e.event_type == "progress_step"
                && e.payload.get("step_id").and_then(|v| v.as_str()) == Some(step_id)
        }))
    }

    async fn update_batch_state(&mut self, batch_id: &str, new_state: BatchState) -> Result<(), ProcGuardError> {
        let batch = self
            .state_mut()
            .batches
            .get_mut(batch_id)
            .ok_or_else(|| ProcGuardError::BatchNotFound(batch_id.to_string()))?;
        batch.current_state = new_state;
        Ok(())
    }

    async fn append_event(&mut self, event: BatchEvent) -> Result<(), ProcGuardError> {
        self.state_mut().batch_events.push(event);
        Ok(())
    }

    async fn insert_violation(&mut self, violation: Violation) -> Result<(), ProcGuardError> {
        self.state_mut().violations.insert(violation.violation_id, violation);
        Ok(())
    }

    async fn insert_policy_decision(&mut self, decision: PolicyDecision) -> Result<(), ProcGuardError> {
        self.state_mut().policy_decisions.push(decision);
        Ok(())
    }

    async fn insert_audit(&mut self, audit: AuditLog) -> Result<(), ProcGuardError> {
        self.state_mut().audit_logs.push(audit);
        Ok(())
    }

    async fn resolve_sop(&mut self, rule_code: &str) -> Result<Option<Sop>, ProcGuardError> {
        Ok(procguard_core::model::resolve_sop(rule_code, &self.state().sops).cloned())
    }

    async fn append_evidence_node(&mut self, node: EvidenceChainNode) -> Result<(), ProcGuardError> {
        self.state_mut().evidence_nodes.push(node);
        Ok(())
    }

    async fn insert_enforcement_event(&mut self, event: EnforcementEvent) -> Result<(), ProcGuardError> {
        self.state_mut().enforcement_events.push(event);
        Ok(())
    }

    async fn most_recent_filter_event(&mut self, actor: &str) -> Result<Option<FilterAuditEvent>, ProcGuardError> {
        Ok(self
            .state()
            .filter_events
            .iter()
            .filter(|e| e.user_id == actor)
            .max_by_key(|e| e.created_at)
            .cloned())
    }

    async fn mark_violation_resolved(&mut self, violation_id: Uuid) -> Result<Violation, ProcGuardError> {
        let violation = self
            .state_mut()
            .violations
            .get_mut(&violation_id)
            .ok_or_else(|| ProcGuardError::ViolationNotFound(violation_id.to_string()))?;
        violation.status = ViolationStatus::Resolved;
        Ok(violation.clone())
    }

    async fn fetch_violation(&mut self, violation_id: Uuid) -> Result<Violation, ProcGuardError> {
        self.state()
            .violations
            .get(&violation_id)
            .cloned()
            .ok_or_else(|| ProcGuardError::ViolationNotFound(violation_id.to_string()))
    }

    async fn fetch_policy_decision_by_hash(
        &mut self,
        decision_hash: &str,
    ) -> Result<Option<PolicyDecision>, ProcGuardError> {
        Ok(self
            .state()
            .policy_decisions
            .iter()
            .find(|d| d.decision_hash == decision_hash)
            .cloned())
    }

    async fn fetch_evidence_chain(&mut self, violation_id: Uuid) -> Result<Vec<EvidenceChainNode>, ProcGuardError> {
        let mut nodes: Vec<EvidenceChainNode> = self
            .state()
            .evidence_nodes
            .iter()
            .filter(|n| n.violation_id == violation_id)
            .cloned()
            .collect();
        nodes.sort_by_key(|n| n.created_at);
        Ok(nodes)
    }

    async fn fetch_checkpoint(&mut self, stream_name: &str) -> Result<Option<Checkpoint>, ProcGuardError> {
        Ok(self
            .state()
            .checkpoints
            .iter()
            .filter(|c| c.stream_name == stream_name)
            .max_by_key(|c| c.committed_at)
            .cloned())
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ProcGuardError> {
        // Dropping the guard releases the lock; all mutations made through
        // state_mut() are already visible to the next transaction.
        self.guard.take();
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), ProcGuardError> {
        if let Some(mut guard) = self.guard.take() {
            *guard = self.original.clone();
        }
        Ok(())
    }
}
