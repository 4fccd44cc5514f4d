//! The invariant battery: pure predicates over facts already gathered by
//! the engine, evaluated in a fixed order where the first failure wins.
//! None of these functions touch the ledger — they are deterministic
//! functions of their inputs, which is what makes them independently
//! unit-testable and safe to reason about in isolation from storage.

use crate::error::ProcGuardError;
use crate::fsm::{self, BatchState};
use crate::role::{BatchEventType, Role};

/// Everything the invariant battery needs to know about one request, already
/// resolved from the pinned procedure version and the ledger — never from
/// client-supplied claims about approval state.
pub struct InvariantFacts {
    pub current_state: BatchState,
    pub event: BatchEventType,
    pub actor_role: Role,
    pub requested_procedure_version: i32,
    pub bound_procedure_version: i32,
    /// Present only for events that carry a `step_id` (approve_step, progress_step).
    pub step_id: Option<String>,
    /// Whether the step definition (from the pinned procedure) requires approval.
    pub step_requires_approval: bool,
    /// Whether an approval for (batch, step_id) already exists in the ledger.
    pub existing_approval: bool,
    /// Whether the step has already progressed past its approval point
    /// (i.e. a later `progress_step` already consumed this step's approval).
    pub step_already_advanced: bool,
}

/// Runs the invariant battery in its fixed order. Returns `Ok(())` if the
/// request may proceed to the FSM transition, or the first violated
/// predicate's error otherwise.
pub fn check_invariants(facts: &InvariantFacts) -> Result<(), ProcGuardError> {
    // 1. TERMINAL_STATE_MUTATION
    if facts.current_state.is_terminal() {
        return Err(ProcGuardError::TerminalStateMutation {
            batch_id: String::new(),
            state: facts.current_state.to_string(),
        });
    }

    // 2. DUPLICATE_APPROVAL (race short-circuit). Two concurrent
    // `approve_step` requests on the same (batch, step) serialize on the
    // row lock (§5); the loser's transaction opens only after the winner's
    // commit, so it observes `current_state` already moved to APPROVED and
    // an existing approval for the step. At that point `(APPROVED,
    // approve_step)` is no longer a defined FSM pair, which would otherwise
    // misreport this as INVALID_FSM_TRANSITION and clobber the winner's
    // state. The ledger's own unique index
    // (`batch_events_one_approval_per_step`) backs this up as defense in
    // depth against the same race.
    if facts.event == BatchEventType::ApproveStep
        && facts.current_state == BatchState::Approved
        && facts.existing_approval
    {
        return Err(ProcGuardError::DuplicateApproval {
            batch_id: String::new(),
            step_id: facts.step_id.clone().unwrap_or_default(),
        });
    }

    // 3. INVALID_FSM_TRANSITION
    if fsm::next_state(facts.current_state, facts.event).is_none() {
        return Err(ProcGuardError::InvalidFsmTransition {
            state: facts.current_state.to_string(),
            event: facts.event.to_string(),
        });
    }

    // 4. PROCEDURE_VERSION_MISMATCH
    if facts.requested_procedure_version != facts.bound_procedure_version {
        return Err(ProcGuardError::ProcedureVersionMismatch {
            requested: facts.requested_procedure_version,
            bound: facts.bound_procedure_version,
        });
    }

    // 5. UNAUTHORIZED_APPROVAL (defense in depth; the authorization matrix
    //    already checked this at the door, but a request that forged its
    //    way past that check must still be caught here before it can touch
    //    state).
    if facts.event == BatchEventType::ApproveStep && facts.actor_role != Role::Supervisor {
        return Err(ProcGuardError::UnauthorizedApproval(facts.actor_role.to_string()));
    }

    // 6. APPROVAL_AFTER_PROGRESS
    if facts.event == BatchEventType::ApproveStep && facts.step_already_advanced {
        return Err(ProcGuardError::ApprovalAfterProgress {
            step_id: facts.step_id.clone().unwrap_or_default(),
        });
    }

    // 7. DUPLICATE_APPROVAL (non-race case: an approval already recorded
    // while the FSM pair is still otherwise defined, e.g. a retried request
    // observed within the same AWAITING_APPROVAL window).
    if facts.event == BatchEventType::ApproveStep && facts.existing_approval {
        return Err(ProcGuardError::DuplicateApproval {
            batch_id: String::new(),
            step_id: facts.step_id.clone().unwrap_or_default(),
        });
    }

    // 8. PROGRESS_WITHOUT_APPROVAL
    if facts.event == BatchEventType::ProgressStep
        && facts.step_requires_approval
        && !facts.existing_approval
    {
        return Err(ProcGuardError::ProgressWithoutApproval {
            step_id: facts.step_id.clone().unwrap_or_default(),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_facts() -> InvariantFacts {
        InvariantFacts {
            current_state: BatchState::InProgress,
            event: BatchEventType::RequestApproval,
            actor_role: Role::Operator,
            requested_procedure_version: 1,
            bound_procedure_version: 1,
            step_id: Some("S1".into()),
            step_requires_approval: false,
            existing_approval: false,
            step_already_advanced: false,
        }
    }

    #[test]
    fn terminal_state_wins_first() {
        let mut f = base_facts();
        f.current_state = BatchState::Completed;
        // Also make the FSM transition invalid to prove ordering: terminal
        // check must fire before the FSM-transition check even though both
        // would fail.
        f.event = BatchEventType::StartBatch;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::TerminalStateMutation { .. }));
    }

    #[test]
    fn invalid_fsm_transition_detected() {
        let mut f = base_facts();
        f.current_state = BatchState::Created;
        f.event = BatchEventType::ApproveStep;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::InvalidFsmTransition { .. }));
    }

    #[test]
    fn procedure_version_mismatch_detected() {
        let mut f = base_facts();
        f.requested_procedure_version = 2;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::ProcedureVersionMismatch { .. }));
    }

    #[test]
    fn unauthorized_approval_detected() {
        let mut f = base_facts();
        f.current_state = BatchState::AwaitingApproval;
        f.event = BatchEventType::ApproveStep;
        f.actor_role = Role::Operator;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::UnauthorizedApproval(_)));
    }

    #[test]
    fn approval_after_progress_detected() {
        let mut f = base_facts();
        f.current_state = BatchState::AwaitingApproval;
        f.event = BatchEventType::ApproveStep;
        f.actor_role = Role::Supervisor;
        f.step_already_advanced = true;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::ApprovalAfterProgress { .. }));
    }

    #[test]
    fn duplicate_approval_detected() {
        let mut f = base_facts();
        f.current_state = BatchState::AwaitingApproval;
        f.event = BatchEventType::ApproveStep;
        f.actor_role = Role::Supervisor;
        f.existing_approval = true;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::DuplicateApproval { .. }));
    }

    #[test]
    fn duplicate_approval_wins_over_invalid_fsm_transition_after_race() {
        // The losing side of a concurrent approve_step race observes the
        // ledger only after the winner already committed: current_state has
        // moved to APPROVED and an approval for the step already exists.
        // (APPROVED, approve_step) is not a defined FSM pair, but the
        // outcome must still be DUPLICATE_APPROVAL, not
        // INVALID_FSM_TRANSITION.
        let mut f = base_facts();
        f.current_state = BatchState::Approved;
        f.event = BatchEventType::ApproveStep;
        f.actor_role = Role::Supervisor;
        f.existing_approval = true;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::DuplicateApproval { .. }));
    }

    #[test]
    fn progress_without_approval_detected() {
        let mut f = base_facts();
        f.current_state = BatchState::InProgress;
        f.event = BatchEventType::ProgressStep;
        f.step_requires_approval = true;
        f.existing_approval = false;
        let err = check_invariants(&f).unwrap_err();
        assert!(matches!(err, ProcGuardError::ProgressWithoutApproval { .. }));
    }

    #[test]
    fn progress_with_approval_passes() {
        let mut f = base_facts();
        f.current_state = BatchState::InProgress;
        f.event = BatchEventType::ProgressStep;
        f.step_requires_approval = true;
        f.existing_approval = true;
        assert!(check_invariants(&f).is_ok());
    }

    #[test]
    fn happy_path_passes_all_predicates() {
        let f = base_facts();
        assert!(check_invariants(&f).is_ok());
    }
}
