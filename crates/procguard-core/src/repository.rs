//! The repository facade: the small capability set the Lifecycle Engine
//! (and, for reads, the Evidence Builder / Filter Audit Chain) depend on.
//! `procguard-store` provides two implementations: a `sqlx`-backed Postgres
//! store for production, and an in-memory fake for engine unit tests that
//! honors the exact same trait so engine tests never need a database.
//!
//! All methods that participate in a single request's atomic commit run
//! inside one transaction opened by [`LedgerTransaction::begin`]; the facade
//! owns commit/rollback, never the engine.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::ProcGuardError;
use crate::model::{
    AuditLog, Batch, BatchEvent, Checkpoint, EnforcementEvent, EvidenceChainNode,
    FilterAuditEvent, PolicyDecision, Procedure, ProcedureStep, Sop, Violation,
};

/// A transactional handle opened for the duration of one engine request.
/// `load_batch_for_update` must take a row-scoped lock (e.g. `SELECT ...
/// FOR UPDATE`) so concurrent actions against the same batch serialize
/// (§5): this is what makes the exactness bound hold under concurrency.
#[async_trait]
pub trait LedgerTransaction: Send {
    async fn load_batch_for_update(&mut self, batch_id: &str) -> Result<Batch, ProcGuardError>;

    async fn fetch_procedure(
        &mut self,
        procedure_id: &str,
        version: i32,
    ) -> Result<Procedure, ProcGuardError>;

    async fn fetch_step_definition(
        &mut self,
        procedure_id: &str,
        version: i32,
        step_id: &str,
    ) -> Result<Option<ProcedureStep>, ProcGuardError>;

    async fn find_existing_approval(
        &mut self,
        batch_id: &str,
        step_id: &str,
    ) -> Result<bool, ProcGuardError>;

    /// True once a `progress_step` event for this (batch, step) has already
    /// been appended — used for `APPROVAL_AFTER_PROGRESS`.
    async fn step_already_advanced(
        &mut self,
        batch_id: &str,
        step_id: &str,
    ) -> Result<bool, ProcGuardError>;

    async fn update_batch_state(
        &mut self,
        batch_id: &str,
        new_state: crate::fsm::BatchState,
    ) -> Result<(), ProcGuardError>;

    async fn append_event(&mut self, event: BatchEvent) -> Result<(), ProcGuardError>;

    async fn insert_violation(&mut self, violation: Violation) -> Result<(), ProcGuardError>;

    async fn insert_policy_decision(
        &mut self,
        decision: PolicyDecision,
    ) -> Result<(), ProcGuardError>;

    async fn insert_audit(&mut self, audit: AuditLog) -> Result<(), ProcGuardError>;

    async fn resolve_sop(&mut self, rule_code: &str) -> Result<Option<Sop>, ProcGuardError>;

    async fn append_evidence_node(
        &mut self,
        node: EvidenceChainNode,
    ) -> Result<(), ProcGuardError>;

    async fn insert_enforcement_event(
        &mut self,
        event: EnforcementEvent,
    ) -> Result<(), ProcGuardError>;

    /// Most recent filter-audit row recorded by this actor, if any
    /// (expansion, §2.2: feeds an optional leading `FILTER_APPLIED` node).
    async fn most_recent_filter_event(
        &mut self,
        actor: &str,
    ) -> Result<Option<FilterAuditEvent>, ProcGuardError>;

    async fn mark_violation_resolved(
        &mut self,
        violation_id: Uuid,
    ) -> Result<Violation, ProcGuardError>;

    async fn fetch_violation(&mut self, violation_id: Uuid) -> Result<Violation, ProcGuardError>;

    async fn fetch_policy_decision_by_hash(
        &mut self,
        decision_hash: &str,
    ) -> Result<Option<PolicyDecision>, ProcGuardError>;

    async fn fetch_evidence_chain(
        &mut self,
        violation_id: Uuid,
    ) -> Result<Vec<EvidenceChainNode>, ProcGuardError>;

    async fn fetch_checkpoint(
        &mut self,
        stream_name: &str,
    ) -> Result<Option<Checkpoint>, ProcGuardError>;

    async fn commit(self: Box<Self>) -> Result<(), ProcGuardError>;

    async fn rollback(self: Box<Self>) -> Result<(), ProcGuardError>;
}

/// The repository facade. `begin` opens one transaction per request; the
/// engine never holds a transaction open across anything but its own pure
/// computation plus the writes of a single request.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, ProcGuardError>;

    /// Read-only path used by the Evidence Builder and Filter Audit Chain,
    /// which do not need row-level locking.
    async fn fetch_filter_chain(
        &self,
        user_id: Option<&str>,
    ) -> Result<Vec<FilterAuditEvent>, ProcGuardError>;

    async fn append_filter_event(
        &self,
        event: FilterAuditEvent,
    ) -> Result<(), ProcGuardError>;

    async fn append_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), ProcGuardError>;

    async fn latest_non_recovery_checkpoint(
        &self,
        stream_name: &str,
    ) -> Result<Option<Checkpoint>, ProcGuardError>;

    /// Evidence Builder reads, outside any write transaction.
    async fn fetch_violation_for_evidence(
        &self,
        violation_id: Uuid,
    ) -> Result<Violation, ProcGuardError>;

    async fn fetch_policy_decision_for_evidence(
        &self,
        decision_hash: &str,
    ) -> Result<Option<PolicyDecision>, ProcGuardError>;

    async fn fetch_audit_for_violation(
        &self,
        violation_id: Uuid,
    ) -> Result<Option<AuditLog>, ProcGuardError>;

    async fn fetch_evidence_chain_for_violation(
        &self,
        violation_id: Uuid,
    ) -> Result<Vec<EvidenceChainNode>, ProcGuardError>;

    async fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
