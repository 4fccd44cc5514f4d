//! Deterministic SOP-conformance replay: a pure, batch-agnostic validator
//! that checks a recorded execution trace against a procedure's declared
//! step list, independent of the live per-event invariant battery in
//! [`crate::invariants`]. The Evidence Builder and forensic replay tooling
//! use this to explain *why* a batch's history diverges from its procedure.

use serde::{Deserialize, Serialize};

use crate::model::Procedure;
use crate::role::Role;

/// One step execution as recorded in a batch's event history.
#[derive(Debug, Clone)]
pub struct TraceEntry {
    pub step_id: String,
    pub actor_role: Role,
}

/// The closed set of conformance failures, returned in the fixed priority
/// order `run_enforcement` checks them in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConformanceFailure {
    UnexpectedStep { step_id: String },
    DuplicateStepExecution { step_id: String },
    MissingRequiredStep { step_id: String },
    StepOrderMismatch { expected: String, actual: String },
    UnauthorizedActor { step_id: String, actor_role: String },
}

/// Validates `trace` against `procedure`'s declared steps. Returns the
/// first failure found, in fixed priority order:
/// `UNEXPECTED_STEP`, `DUPLICATE_STEP_EXECUTION`, `MISSING_REQUIRED_STEP`,
/// `STEP_ORDER_MISMATCH`, `UNAUTHORIZED_ACTOR` — or `None` if the trace
/// fully conforms.
pub fn run_enforcement(procedure: &Procedure, trace: &[TraceEntry]) -> Option<ConformanceFailure> {
    // 1. UNEXPECTED_STEP: every executed step must be declared.
    for entry in trace {
        if procedure.step(&entry.step_id).is_none() {
            return Some(ConformanceFailure::UnexpectedStep {
                step_id: entry.step_id.clone(),
            });
        }
    }

    // 2. DUPLICATE_STEP_EXECUTION: no step_id appears twice in the trace.
    let mut seen = std::collections::HashSet::new();
    for entry in trace {
        if !seen.insert(&entry.step_id) {
            return Some(ConformanceFailure::DuplicateStepExecution {
                step_id: entry.step_id.clone(),
            });
        }
    }

    // 3. MISSING_REQUIRED_STEP: every declared step must appear in the trace.
    let mut sorted_steps = procedure.steps.clone();
    sorted_steps.sort_by_key(|s| s.order);
    for step in &sorted_steps {
        if !trace.iter().any(|e| e.step_id == step.step_id) {
            return Some(ConformanceFailure::MissingRequiredStep {
                step_id: step.step_id.clone(),
            });
        }
    }

    // 4. STEP_ORDER_MISMATCH: trace order must match declared order exactly.
    for (expected_step, actual_entry) in sorted_steps.iter().zip(trace.iter()) {
        if expected_step.step_id != actual_entry.step_id {
            return Some(ConformanceFailure::StepOrderMismatch {
                expected: expected_step.step_id.clone(),
                actual: actual_entry.step_id.clone(),
            });
        }
    }

    // 5. UNAUTHORIZED_ACTOR: each step's actor must match its declared role.
    for (step, entry) in sorted_steps.iter().zip(trace.iter()) {
        if let Some(required_role) = step.approver_role {
            if required_role != entry.actor_role {
                return Some(ConformanceFailure::UnauthorizedActor {
                    step_id: step.step_id.clone(),
                    actor_role: entry.actor_role.to_string(),
                });
            }
        }
    }

    None
}
