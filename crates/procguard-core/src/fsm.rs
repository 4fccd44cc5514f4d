use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProcGuardError;
use crate::role::BatchEventType;

/// Closed batch-state enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchState {
    Created,
    InProgress,
    AwaitingApproval,
    Approved,
    Completed,
    Violated,
    Rejected,
}

impl BatchState {
    /// Terminal states are absorbing: no event ever moves a batch out of one.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchState::Completed | BatchState::Violated | BatchState::Rejected
        )
    }
}

impl fmt::Display for BatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchState::Created => "CREATED",
            BatchState::InProgress => "IN_PROGRESS",
            BatchState::AwaitingApproval => "AWAITING_APPROVAL",
            BatchState::Approved => "APPROVED",
            BatchState::Completed => "COMPLETED",
            BatchState::Violated => "VIOLATED",
            BatchState::Rejected => "REJECTED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BatchState {
    type Err = ProcGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(BatchState::Created),
            "IN_PROGRESS" => Ok(BatchState::InProgress),
            "AWAITING_APPROVAL" => Ok(BatchState::AwaitingApproval),
            "APPROVED" => Ok(BatchState::Approved),
            "COMPLETED" => Ok(BatchState::Completed),
            "VIOLATED" => Ok(BatchState::Violated),
            "REJECTED" => Ok(BatchState::Rejected),
            other => Err(ProcGuardError::InvalidFsmTransition {
                state: other.to_string(),
                event: String::new(),
            }),
        }
    }
}

/// Looks up the transition table. Returns `None` if `(state, event)` is not
/// a defined transition — callers turn that into `INVALID_FSM_TRANSITION`.
///
/// This function does not know about terminal-state closure; that check
/// happens earlier in the invariant battery so the two failure modes
/// (`TERMINAL_STATE_MUTATION` vs `INVALID_FSM_TRANSITION`) stay distinct
/// even though a terminal state also happens to have no outgoing rows here.
pub fn next_state(state: BatchState, event: BatchEventType) -> Option<BatchState> {
    use BatchEventType::*;
    use BatchState::*;

    match (state, event) {
        (Created, StartBatch) => Some(InProgress),
        (InProgress, RequestApproval) => Some(AwaitingApproval),
        (AwaitingApproval, ApproveStep) => Some(Approved),
        (Approved, ProgressStep) => Some(InProgress),
        (InProgress, ProgressStep) => Some(Completed),
        (Created, RejectBatch) => Some(Rejected),
        (InProgress, RejectBatch) => Some(Rejected),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defined_transitions_resolve() {
        assert_eq!(
            next_state(BatchState::Created, BatchEventType::StartBatch),
            Some(BatchState::InProgress)
        );
        assert_eq!(
            next_state(BatchState::InProgress, BatchEventType::RequestApproval),
            Some(BatchState::AwaitingApproval)
        );
        assert_eq!(
            next_state(BatchState::AwaitingApproval, BatchEventType::ApproveStep),
            Some(BatchState::Approved)
        );
        assert_eq!(
            next_state(BatchState::Approved, BatchEventType::ProgressStep),
            Some(BatchState::InProgress)
        );
        assert_eq!(
            next_state(BatchState::Created, BatchEventType::RejectBatch),
            Some(BatchState::Rejected)
        );
        assert_eq!(
            next_state(BatchState::InProgress, BatchEventType::RejectBatch),
            Some(BatchState::Rejected)
        );
    }

    #[test]
    fn undefined_pairs_return_none() {
        assert_eq!(
            next_state(BatchState::Completed, BatchEventType::StartBatch),
            None
        );
        assert_eq!(
            next_state(BatchState::Created, BatchEventType::ApproveStep),
            None
        );
        assert_eq!(
            next_state(BatchState::AwaitingApproval, BatchEventType::StartBatch),
            None
        );
    }

    #[test]
    fn terminal_states_are_absorbing() {
        assert!(BatchState::Completed.is_terminal());
        assert!(BatchState::Violated.is_terminal());
        assert!(BatchState::Rejected.is_terminal());
        assert!(!BatchState::Created.is_terminal());
        assert!(!BatchState::InProgress.is_terminal());
        assert!(!BatchState::AwaitingApproval.is_terminal());
        assert!(!BatchState::Approved.is_terminal());
    }

    #[test]
    fn state_display_round_trips_through_parse() {
        for s in [
            BatchState::Created,
            BatchState::InProgress,
            BatchState::AwaitingApproval,
            BatchState::Approved,
            BatchState::Completed,
            BatchState::Violated,
            BatchState::Rejected,
        ] {
            let parsed: BatchState = s.to_string().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }
}
