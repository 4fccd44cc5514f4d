use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProcGuardError;

/// Closed role enumeration. Any string outside this set fails parsing with
/// `INVALID_ROLE` — never silently coerced to a default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Operator,
    Supervisor,
    Auditor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Operator => "Operator",
            Role::Supervisor => "Supervisor",
            Role::Auditor => "Auditor",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Role {
    type Err = ProcGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Operator" | "operator" => Ok(Role::Operator),
            "Supervisor" | "supervisor" => Ok(Role::Supervisor),
            "Auditor" | "auditor" => Ok(Role::Auditor),
            other => Err(ProcGuardError::InvalidRole(other.to_string())),
        }
    }
}

/// Closed event enumeration — the commanded transition attempts a caller
/// may request against a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchEventType {
    StartBatch,
    ProgressStep,
    RequestApproval,
    ApproveStep,
    RejectBatch,
}

impl fmt::Display for BatchEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BatchEventType::StartBatch => "start_batch",
            BatchEventType::ProgressStep => "progress_step",
            BatchEventType::RequestApproval => "request_approval",
            BatchEventType::ApproveStep => "approve_step",
            BatchEventType::RejectBatch => "reject_batch",
        };
        write!(f, "{s}")
    }
}

impl FromStr for BatchEventType {
    type Err = ProcGuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start_batch" => Ok(BatchEventType::StartBatch),
            "progress_step" => Ok(BatchEventType::ProgressStep),
            "request_approval" => Ok(BatchEventType::RequestApproval),
            "approve_step" => Ok(BatchEventType::ApproveStep),
            "reject_batch" => Ok(BatchEventType::RejectBatch),
            other => Err(ProcGuardError::InvalidEvent(other.to_string())),
        }
    }
}

/// Checks the static (role, event) authorization matrix. This runs before
/// any state is inspected, so it can never itself be bypassed by a
/// cleverly-shaped batch.
pub fn authorize(role: Role, event: BatchEventType) -> Result<(), ProcGuardError> {
    use BatchEventType::*;
    use Role::*;

    let permitted = match role {
        Operator => matches!(event, StartBatch | ProgressStep | RequestApproval),
        Supervisor => matches!(event, ApproveStep | RejectBatch),
        Auditor => false,
    };

    if permitted {
        Ok(())
    } else {
        Err(ProcGuardError::Unauthorized {
            role: role.to_string(),
            event: event.to_string(),
        })
    }
}
