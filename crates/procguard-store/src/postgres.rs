//! Postgres-backed repository. Every query goes through the runtime-checked
//! `sqlx::query` / `sqlx::query_as` API rather than the compile-time
//! `query!` macros, since this workspace does not commit a `.sqlx` offline
//! cache and the migration-apply step itself is opt-in (§6 Environment).
//!
//! `ProcGuardError::Sqlx` is the only variant this module ever constructs
//! from a `sqlx::Error`; the engine never matches on `sqlx::Error` directly
//! (SPEC_FULL §2.1 "Implementation note").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{info, instrument};
use uuid::Uuid;

use procguard_core::error::ProcGuardError;
use procguard_core::fsm::BatchState;
use procguard_core::model::{
    AuditLog, AuditResult, Batch, BatchEvent, Checkpoint, Decision, EnforcementAction,
    EnforcementEvent, EvidenceChainNode, EvidenceEventType, FilterAuditEvent, PolicyDecision,
    Procedure, ProcedureStep, Sop, Violation, ViolationStatus,
};
use procguard_core::repository::{LedgerTransaction, Repository};

fn sqlx_err(e: sqlx::Error) -> ProcGuardError {
    ProcGuardError::Sqlx(e.to_string())
}

fn json_err(e: serde_json::Error) -> ProcGuardError {
    ProcGuardError::Serialization(e.to_string())
}

/// Production repository. `connect` opens a bounded pool; callers are
/// expected to run migrations separately (opt-in, via `procguardctl
/// migrate`) rather than implicitly on first connection.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Never logs `database_url` itself — connection strings carry
    /// credentials and must not appear in structured log output (§6).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, ProcGuardError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(sqlx_err)?;
        info!("connected to ledger database");
        Ok(Self { pool })
    }

    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), ProcGuardError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| ProcGuardError::Sqlx(e.to_string()))?;
        info!("ledger schema migrations applied");
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_step(row_value: &Value) -> Result<ProcedureStep, ProcGuardError> {
    serde_json::from_value(row_value.clone()).map_err(json_err)
}

fn procedure_from_row(procedure_id: String, version: i32, steps_json: Value) -> Result<Procedure, ProcGuardError> {
    let raw_steps: Vec<Value> = serde_json::from_value(steps_json).map_err(json_err)?;
    let steps = raw_steps.iter().map(parse_step).collect::<Result<Vec<_>, _>>()?;
    Ok(Procedure {
        procedure_id,
        version,
        steps,
    })
}

fn state_to_str(state: BatchState) -> String {
    state.to_string()
}

fn str_to_state(s: &str) -> Result<BatchState, ProcGuardError> {
    s.parse().map_err(|_| {
        ProcGuardError::ForensicIntegrityCompromised(format!("unrecognized persisted batch state '{s}'"))
    })
}

fn violation_status_to_str(status: ViolationStatus) -> &'static str {
    match status {
        ViolationStatus::Open => "OPEN",
        ViolationStatus::Resolved => "RESOLVED",
    }
}

fn str_to_violation_status(s: &str) -> ViolationStatus {
    if s == "RESOLVED" {
        ViolationStatus::Resolved
    } else {
        ViolationStatus::Open
    }
}

fn decision_to_str(decision: Decision) -> &'static str {
    match decision {
        Decision::Allow => "allow",
        Decision::Deny => "deny",
    }
}

fn audit_result_to_str(result: AuditResult) -> &'static str {
    match result {
        AuditResult::Success => "SUCCESS",
        AuditResult::Failure => "FAILURE",
    }
}

fn str_to_audit_result(s: &str) -> AuditResult {
    if s == "SUCCESS" {
        AuditResult::Success
    } else {
        AuditResult::Failure
    }
}

fn evidence_event_type_to_str(kind: EvidenceEventType) -> &'static str {
    match kind {
        EvidenceEventType::FilterApplied => "FILTER_APPLIED",
        EvidenceEventType::ViolationDetected => "VIOLATION_DETECTED",
        EvidenceEventType::SopInvoked => "SOP_INVOKED",
        EvidenceEventType::EnforcementExecuted => "ENFORCEMENT_EXECUTED",
        EvidenceEventType::ExportGenerated => "EXPORT_GENERATED",
    }
}

fn str_to_evidence_event_type(s: &str) -> Result<EvidenceEventType, ProcGuardError> {
    Ok(match s {
        "FILTER_APPLIED" => EvidenceEventType::FilterApplied,
        "VIOLATION_DETECTED" => EvidenceEventType::ViolationDetected,
        "SOP_INVOKED" => EvidenceEventType::SopInvoked,
        "ENFORCEMENT_EXECUTED" => EvidenceEventType::EnforcementExecuted,
        "EXPORT_GENERATED" => EvidenceEventType::ExportGenerated,
        other => {
            return Err(ProcGuardError::ForensicIntegrityCompromised(format!(
                "unrecognized persisted evidence event type '{other}'"
            )))
        }
    })
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn begin(&self) -> Result<Box<dyn LedgerTransaction>, ProcGuardError> {
        let txn = self.pool.begin().await.map_err(sqlx_err)?;
        Ok(Box::new(PostgresTransaction { txn: Some(txn) }))
    }

    async fn fetch_filter_chain(&self, user_id: Option<&str>) -> Result<Vec<FilterAuditEvent>, ProcGuardError> {
        let rows = if let Some(user_id) = user_id {
            sqlx::query(
                "SELECT id, user_id, screen, filter_payload, created_at, prev_hash, hash \
                 FROM filter_audit_events WHERE user_id = $1 ORDER BY created_at ASC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                "SELECT id, user_id, screen, filter_payload, created_at, prev_hash, hash \
                 FROM filter_audit_events ORDER BY created_at ASC",
            )
            .fetch_all(&self.pool)
            .await
        }
        .map_err(sqlx_err)?;

        rows.into_iter().map(row_to_filter_event).collect()
    }

    async fn append_filter_event(&self, event: FilterAuditEvent) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO filter_audit_events (id, user_id, screen, filter_payload, created_at, prev_hash, hash) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(event.screen)
        .bind(event.filter_payload)
        .bind(event.created_at)
        .bind(event.prev_hash)
        .bind(event.hash)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn append_checkpoint(&self, checkpoint: Checkpoint) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO checkpoints (id, stream_name, last_event_id, last_event_hash, snapshot_hash, \
             snapshot_version, committed_at, is_recovery) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(checkpoint.id)
        .bind(checkpoint.stream_name)
        .bind(checkpoint.last_event_id)
        .bind(checkpoint.last_event_hash)
        .bind(checkpoint.snapshot_hash)
        .bind(checkpoint.snapshot_version)
        .bind(checkpoint.committed_at)
        .bind(checkpoint.is_recovery)
        .execute(&self.pool)
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn latest_non_recovery_checkpoint(
        &self,
        stream_name: &str,
    ) -> Result<Option<Checkpoint>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT id, stream_name, last_event_id, last_event_hash, snapshot_hash, snapshot_version, \
             committed_at, is_recovery FROM checkpoints WHERE stream_name = $1 AND is_recovery = false \
             ORDER BY committed_at DESC LIMIT 1",
        )
        .bind(stream_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_checkpoint).transpose()
    }

    async fn fetch_violation_for_evidence(&self, violation_id: Uuid) -> Result<Violation, ProcGuardError> {
        let row = sqlx::query(
            "SELECT violation_id, batch_id, rule_code, sop_id, detected_at, status, violation_hash, \
             opa_decision_hash, triggering_filter_event_id, payload FROM violations WHERE violation_id = $1",
        )
        .bind(violation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?
        .ok_or_else(|| ProcGuardError::ViolationNotFound(violation_id.to_string()))?;

        row_to_violation(row)
    }

    async fn fetch_policy_decision_for_evidence(
        &self,
        decision_hash: &str,
    ) -> Result<Option<PolicyDecision>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT decision_id, \"timestamp\", policy_package, rule, decision, resource_type, resource_id, \
             input_hash, result_hash, decision_hash, payload FROM policy_decisions WHERE decision_hash = $1",
        )
        .bind(decision_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_policy_decision).transpose()
    }

    async fn fetch_audit_for_violation(&self, violation_id: Uuid) -> Result<Option<AuditLog>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT audit_id, batch_id, expected_state, actual_state, action, result, actor, actor_role, \
             \"timestamp\", violation_id, audit_hash, violation_hash_link, payload \
             FROM audit_logs WHERE violation_id = $1 ORDER BY \"timestamp\" DESC LIMIT 1",
        )
        .bind(violation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_audit_log).transpose()
    }

    async fn fetch_evidence_chain_for_violation(
        &self,
        violation_id: Uuid,
    ) -> Result<Vec<EvidenceChainNode>, ProcGuardError> {
        let rows = sqlx::query(
            "SELECT id, violation_id, event_type, source_id, payload, prev_hash, hash, created_at \
             FROM evidence_chain_nodes WHERE violation_id = $1 ORDER BY created_at ASC",
        )
        .bind(violation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(sqlx_err)?;

        rows.into_iter().map(row_to_evidence_node).collect()
    }

    async fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

fn row_to_audit_log(row: sqlx::postgres::PgRow) -> Result<AuditLog, ProcGuardError> {
    let result_str: String = row.try_get("result").map_err(sqlx_err)?;
    Ok(AuditLog {
        audit_id: row.try_get("audit_id").map_err(sqlx_err)?,
        batch_id: row.try_get("batch_id").map_err(sqlx_err)?,
        expected_state: row.try_get("expected_state").map_err(sqlx_err)?,
        actual_state: row.try_get("actual_state").map_err(sqlx_err)?,
        action: row.try_get("action").map_err(sqlx_err)?,
        result: str_to_audit_result(&result_str),
        actor: row.try_get("actor").map_err(sqlx_err)?,
        actor_role: row.try_get("actor_role").map_err(sqlx_err)?,
        timestamp: row.try_get("timestamp").map_err(sqlx_err)?,
        violation_id: row.try_get("violation_id").map_err(sqlx_err)?,
        audit_hash: row.try_get("audit_hash").map_err(sqlx_err)?,
        violation_hash_link: row.try_get("violation_hash_link").map_err(sqlx_err)?,
        payload: row.try_get("payload").map_err(sqlx_err)?,
    })
}

fn row_to_filter_event(row: sqlx::postgres::PgRow) -> Result<FilterAuditEvent, ProcGuardError> {
    Ok(FilterAuditEvent {
        id: row.try_get("id").map_err(sqlx_err)?,
        user_id: row.try_get("user_id").map_err(sqlx_err)?,
        screen: row.try_get("screen").map_err(sqlx_err)?,
        filter_payload: row.try_get("filter_payload").map_err(sqlx_err)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
        prev_hash: row.try_get("prev_hash").map_err(sqlx_err)?,
        hash: row.try_get("hash").map_err(sqlx_err)?,
    })
}

fn row_to_checkpoint(row: sqlx::postgres::PgRow) -> Result<Checkpoint, ProcGuardError> {
    Ok(Checkpoint {
        id: row.try_get("id").map_err(sqlx_err)?,
        stream_name: row.try_get("stream_name").map_err(sqlx_err)?,
        last_event_id: row.try_get("last_event_id").map_err(sqlx_err)?,
        last_event_hash: row.try_get("last_event_hash").map_err(sqlx_err)?,
        snapshot_hash: row.try_get("snapshot_hash").map_err(sqlx_err)?,
        snapshot_version: row.try_get("snapshot_version").map_err(sqlx_err)?,
        committed_at: row.try_get("committed_at").map_err(sqlx_err)?,
        is_recovery: row.try_get("is_recovery").map_err(sqlx_err)?,
    })
}

pub struct PostgresTransaction {
    txn: Option<Transaction<'static, Postgres>>,
}

impl PostgresTransaction {
    fn txn_mut(&mut self) -> &mut Transaction<'static, Postgres> {
        self.txn.as_mut().expect("transaction used after commit/rollback")
    }
}

#[async_trait]
impl LedgerTransaction for PostgresTransaction {
    async fn load_batch_for_update(&mut self, batch_id: &str) -> Result<Batch, ProcGuardError> {
        let row = sqlx::query(
            "SELECT batch_id, procedure_id, procedure_version, current_state, created_at \
             FROM batches WHERE batch_id = $1 FOR UPDATE",
        )
        .bind(batch_id)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?
        .ok_or_else(|| ProcGuardError::BatchNotFound(batch_id.to_string()))?;

        let state_str: String = row.try_get("current_state").map_err(sqlx_err)?;
        Ok(Batch {
            batch_id: row.try_get("batch_id").map_err(sqlx_err)?,
            procedure_id: row.try_get("procedure_id").map_err(sqlx_err)?,
            procedure_version: row.try_get("procedure_version").map_err(sqlx_err)?,
            current_state: str_to_state(&state_str)?,
            created_at: row.try_get("created_at").map_err(sqlx_err)?,
        })
    }

    async fn fetch_procedure(&mut self, procedure_id: &str, version: i32) -> Result<Procedure, ProcGuardError> {
        let row = sqlx::query("SELECT procedure_id, version, steps FROM procedures WHERE procedure_id = $1 AND version = $2")
            .bind(procedure_id)
            .bind(version)
            .fetch_optional(&mut **self.txn_mut())
            .await
            .map_err(sqlx_err)?
            .ok_or_else(|| ProcGuardError::ProcedureNotFound {
                procedure_id: procedure_id.to_string(),
                version,
            })?;

        let steps_json: Value = row.try_get("steps").map_err(sqlx_err)?;
        procedure_from_row(procedure_id.to_string(), version, steps_json)
    }

    async fn fetch_step_definition(
        &mut self,
        procedure_id: &str,
        version: i32,
        step_id: &str,
    ) -> Result<Option<ProcedureStep>, ProcGuardError> {
        let procedure = self.fetch_procedure(procedure_id, version).await?;
        Ok(procedure.step(step_id).cloned())
    }

    async fn find_existing_approval(&mut self, batch_id: &str, step_id: &str) -> Result<bool, ProcGuardError> {
        let row = sqlx::query(
            "SELECT 1 FROM batch_events WHERE batch_id = $1 AND event_type = 'approve_step' \
             AND payload ->> 'step_id' = $2 LIMIT 1",
        )
        .bind(batch_id)
        .bind(step_id)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(row.is_some())
    }

    async fn step_already_advanced(&mut self, batch_id: &str, step_id: &str) -> Result<bool, ProcGuardError> {
        let row = sqlx::query(
            "SELECT 1 FROM batch_events WHERE batch_id = $1 AND event_type = 'progress_step' \
             AND payload ->> 'step_id' = $2 LIMIT 1",
        )
        .bind(batch_id)
        .bind(step_id)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(row.is_some())
    }

    async fn update_batch_state(&mut self, batch_id: &str, new_state: BatchState) -> Result<(), ProcGuardError> {
        sqlx::query("UPDATE batches SET current_state = $1 WHERE batch_id = $2")
            .bind(state_to_str(new_state))
            .bind(batch_id)
            .execute(&mut **self.txn_mut())
            .await
            .map_err(sqlx_err)?;
        Ok(())
    }

    async fn append_event(&mut self, event: BatchEvent) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO batch_events (event_id, batch_id, event_type, payload, occurred_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(event.event_id)
        .bind(event.batch_id)
        .bind(event.event_type)
        .bind(event.payload)
        .bind(event.occurred_at)
        .execute(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn insert_violation(&mut self, violation: Violation) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO violations (violation_id, batch_id, rule_code, sop_id, detected_at, status, \
             violation_hash, opa_decision_hash, triggering_filter_event_id, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(violation.violation_id)
        .bind(violation.batch_id)
        .bind(violation.rule_code)
        .bind(violation.sop_id)
        .bind(violation.detected_at)
        .bind(violation_status_to_str(violation.status))
        .bind(violation.violation_hash)
        .bind(violation.opa_decision_hash)
        .bind(violation.triggering_filter_event_id)
        .bind(violation.payload)
        .execute(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn insert_policy_decision(&mut self, decision: PolicyDecision) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO policy_decisions (decision_id, \"timestamp\", policy_package, rule, decision, \
             resource_type, resource_id, input_hash, result_hash, decision_hash, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(decision.decision_id)
        .bind(decision.timestamp)
        .bind(decision.policy_package)
        .bind(decision.rule)
        .bind(decision_to_str(decision.decision))
        .bind(decision.resource_type)
        .bind(decision.resource_id)
        .bind(decision.input_hash)
        .bind(decision.result_hash)
        .bind(decision.decision_hash)
        .bind(decision.payload)
        .execute(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn insert_audit(&mut self, audit: AuditLog) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO audit_logs (audit_id, batch_id, expected_state, actual_state, action, result, \
             actor, actor_role, \"timestamp\", violation_id, audit_hash, violation_hash_link, payload) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)",
        )
        .bind(audit.audit_id)
        .bind(audit.batch_id)
        .bind(audit.expected_state)
        .bind(audit.actual_state)
        .bind(audit.action)
        .bind(audit_result_to_str(audit.result))
        .bind(audit.actor)
        .bind(audit.actor_role)
        .bind(audit.timestamp)
        .bind(audit.violation_id)
        .bind(audit.audit_hash)
        .bind(audit.violation_hash_link)
        .bind(audit.payload)
        .execute(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn resolve_sop(&mut self, rule_code: &str) -> Result<Option<Sop>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT id, name, version, immutable_hash, is_active, rule_codes, enforcement_actions \
             FROM sops WHERE is_active = true AND rule_codes @> to_jsonb($1::text) LIMIT 1",
        )
        .bind(rule_code)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_sop).transpose()
    }

    async fn append_evidence_node(&mut self, node: EvidenceChainNode) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO evidence_chain_nodes (id, violation_id, event_type, source_id, payload, prev_hash, hash, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(node.id)
        .bind(node.violation_id)
        .bind(evidence_event_type_to_str(node.event_type))
        .bind(node.source_id)
        .bind(node.payload)
        .bind(node.prev_hash)
        .bind(node.hash)
        .bind(node.created_at)
        .execute(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn insert_enforcement_event(&mut self, event: EnforcementEvent) -> Result<(), ProcGuardError> {
        sqlx::query(
            "INSERT INTO enforcement_events (id, violation_id, sop_id, action_type, executed_at, executed_by, outcome) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(event.id)
        .bind(event.violation_id)
        .bind(event.sop_id)
        .bind(event.action_type)
        .bind(event.executed_at)
        .bind(event.executed_by)
        .bind(event.outcome)
        .execute(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;
        Ok(())
    }

    async fn most_recent_filter_event(&mut self, actor: &str) -> Result<Option<FilterAuditEvent>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT id, user_id, screen, filter_payload, created_at, prev_hash, hash \
             FROM filter_audit_events WHERE user_id = $1 ORDER BY created_at DESC LIMIT 1",
        )
        .bind(actor)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_filter_event).transpose()
    }

    async fn mark_violation_resolved(&mut self, violation_id: Uuid) -> Result<Violation, ProcGuardError> {
        sqlx::query("UPDATE violations SET status = 'RESOLVED' WHERE violation_id = $1 AND status = 'OPEN'")
            .bind(violation_id)
            .execute(&mut **self.txn_mut())
            .await
            .map_err(sqlx_err)?;
        self.fetch_violation(violation_id).await
    }

    async fn fetch_violation(&mut self, violation_id: Uuid) -> Result<Violation, ProcGuardError> {
        let row = sqlx::query(
            "SELECT violation_id, batch_id, rule_code, sop_id, detected_at, status, violation_hash, \
             opa_decision_hash, triggering_filter_event_id, payload FROM violations WHERE violation_id = $1",
        )
        .bind(violation_id)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?
        .ok_or_else(|| ProcGuardError::ViolationNotFound(violation_id.to_string()))?;

        row_to_violation(row)
    }

    async fn fetch_policy_decision_by_hash(
        &mut self,
        decision_hash: &str,
    ) -> Result<Option<PolicyDecision>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT decision_id, \"timestamp\", policy_package, rule, decision, resource_type, resource_id, \
             input_hash, result_hash, decision_hash, payload FROM policy_decisions WHERE decision_hash = $1",
        )
        .bind(decision_hash)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_policy_decision).transpose()
    }

    async fn fetch_evidence_chain(&mut self, violation_id: Uuid) -> Result<Vec<EvidenceChainNode>, ProcGuardError> {
        let rows = sqlx::query(
            "SELECT id, violation_id, event_type, source_id, payload, prev_hash, hash, created_at \
             FROM evidence_chain_nodes WHERE violation_id = $1 ORDER BY created_at ASC",
        )
        .bind(violation_id)
        .fetch_all(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;

        rows.into_iter().map(row_to_evidence_node).collect()
    }

    async fn fetch_checkpoint(&mut self, stream_name: &str) -> Result<Option<Checkpoint>, ProcGuardError> {
        let row = sqlx::query(
            "SELECT id, stream_name, last_event_id, last_event_hash, snapshot_hash, snapshot_version, \
             committed_at, is_recovery FROM checkpoints WHERE stream_name = $1 ORDER BY committed_at DESC LIMIT 1",
        )
        .bind(stream_name)
        .fetch_optional(&mut **self.txn_mut())
        .await
        .map_err(sqlx_err)?;

        row.map(row_to_checkpoint).transpose()
    }

    async fn commit(mut self: Box<Self>) -> Result<(), ProcGuardError> {
        let txn = self.txn.take().expect("transaction used after commit/rollback");
        txn.commit().await.map_err(sqlx_err)
    }

    async fn rollback(mut self: Box<Self>) -> Result<(), ProcGuardError> {
        let txn = self.txn.take().expect("transaction used after commit/rollback");
        txn.rollback().await.map_err(sqlx_err)
    }
}

fn row_to_violation(row: sqlx::postgres::PgRow) -> Result<Violation, ProcGuardError> {
    let status_str: String = row.try_get("status").map_err(sqlx_err)?;
    Ok(Violation {
        violation_id: row.try_get("violation_id").map_err(sqlx_err)?,
        batch_id: row.try_get("batch_id").map_err(sqlx_err)?,
        rule_code: row.try_get("rule_code").map_err(sqlx_err)?,
        sop_id: row.try_get("sop_id").map_err(sqlx_err)?,
        detected_at: row.try_get("detected_at").map_err(sqlx_err)?,
        status: str_to_violation_status(&status_str),
        violation_hash: row.try_get("violation_hash").map_err(sqlx_err)?,
        opa_decision_hash: row.try_get("opa_decision_hash").map_err(sqlx_err)?,
        triggering_filter_event_id: row.try_get("triggering_filter_event_id").map_err(sqlx_err)?,
        payload: row.try_get("payload").map_err(sqlx_err)?,
    })
}

fn row_to_policy_decision(row: sqlx::postgres::PgRow) -> Result<PolicyDecision, ProcGuardError> {
    let decision_str: String = row.try_get("decision").map_err(sqlx_err)?;
    Ok(PolicyDecision {
        decision_id: row.try_get("decision_id").map_err(sqlx_err)?,
        timestamp: row.try_get("timestamp").map_err(sqlx_err)?,
        policy_package: row.try_get("policy_package").map_err(sqlx_err)?,
        rule: row.try_get("rule").map_err(sqlx_err)?,
        decision: if decision_str == "allow" { Decision::Allow } else { Decision::Deny },
        resource_type: row.try_get("resource_type").map_err(sqlx_err)?,
        resource_id: row.try_get("resource_id").map_err(sqlx_err)?,
        input_hash: row.try_get("input_hash").map_err(sqlx_err)?,
        result_hash: row.try_get("result_hash").map_err(sqlx_err)?,
        decision_hash: row.try_get("decision_hash").map_err(sqlx_err)?,
        payload: row.try_get("payload").map_err(sqlx_err)?,
    })
}

fn row_to_evidence_node(row: sqlx::postgres::PgRow) -> Result<EvidenceChainNode, ProcGuardError> {
    let kind_str: String = row.try_get("event_type").map_err(sqlx_err)?;
    Ok(EvidenceChainNode {
        id: row.try_get("id").map_err(sqlx_err)?,
        violation_id: row.try_get("violation_id").map_err(sqlx_err)?,
        event_type: str_to_evidence_event_type(&kind_str)?,
        source_id: row.try_get("source_id").map_err(sqlx_err)?,
        payload: row.try_get("payload").map_err(sqlx_err)?,
        prev_hash: row.try_get("prev_hash").map_err(sqlx_err)?,
        hash: row.try_get("hash").map_err(sqlx_err)?,
        created_at: row.try_get("created_at").map_err(sqlx_err)?,
    })
}

fn row_to_sop(row: sqlx::postgres::PgRow) -> Result<Sop, ProcGuardError> {
    let rule_codes_json: Value = row.try_get("rule_codes").map_err(sqlx_err)?;
    let rule_codes: Vec<String> = serde_json::from_value(rule_codes_json).map_err(json_err)?;
    let actions_json: Value = row.try_get("enforcement_actions").map_err(sqlx_err)?;
    let enforcement_actions: Vec<EnforcementAction> = serde_json::from_value(actions_json).map_err(json_err)?;
    Ok(Sop {
        id: row.try_get("id").map_err(sqlx_err)?,
        name: row.try_get("name").map_err(sqlx_err)?,
        version: row.try_get("version").map_err(sqlx_err)?,
        immutable_hash: row.try_get("immutable_hash").map_err(sqlx_err)?,
        is_active: row.try_get("is_active").map_err(sqlx_err)?,
        rule_codes,
        enforcement_actions,
    })
}
