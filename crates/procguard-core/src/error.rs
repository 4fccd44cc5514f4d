use thiserror::Error;

/// The closed set of domain errors the core can raise.
///
/// Every variant maps to exactly one rule code and, through the HTTP
/// collaborator, to exactly one status code. Infrastructure failures are
/// wrapped rather than matched on
/// directly by engine code: `Sqlx`/`Serialization` exist so the repository
/// boundary has somewhere to put them, but the engine itself only ever
/// raises the domain variants below.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcGuardError {
    // --- Authorization: raised before any write, never recorded as a violation.
    #[error("role '{0}' is not a recognized role")]
    InvalidRole(String),
    #[error("role '{role}' is not permitted to emit event '{event}'")]
    Unauthorized { role: String, event: String },
    #[error("event 'approve_step' requires role Supervisor, got '{0}'")]
    UnauthorizedApproval(String),

    // --- Lifecycle / invariant: always recorded as a violation before re-raise.
    #[error("no transition defined for ({state}, {event})")]
    InvalidFsmTransition { state: String, event: String },
    #[error("batch {batch_id} is already in terminal state {state}")]
    TerminalStateMutation { batch_id: String, state: String },
    #[error("request carries procedure version {requested} but batch is pinned to {bound}")]
    ProcedureVersionMismatch { requested: i32, bound: i32 },
    #[error("step {step_id} requires approval before it may progress")]
    ProgressWithoutApproval { step_id: String },
    #[error("step {step_id} has already advanced past its approval point")]
    ApprovalAfterProgress { step_id: String },
    #[error("step {step_id} has already been approved for batch {batch_id}")]
    DuplicateApproval { batch_id: String, step_id: String },

    // --- Not found.
    #[error("batch {0} does not exist")]
    BatchNotFound(String),
    #[error("procedure {procedure_id} version {version} does not exist")]
    ProcedureNotFound { procedure_id: String, version: i32 },
    #[error("violation {0} does not exist")]
    ViolationNotFound(String),

    // --- Forensic.
    #[error("forensic integrity compromised: {0}")]
    ForensicIntegrityCompromised(String),

    // --- Sealing / no-op guards.
    #[error("batch {0} is already sealed")]
    BatchAlreadySealed(String),

    // --- Operational: feed the availability track, never silently become a violation.
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(String),
    #[error("operation timed out: {0}")]
    Timeout(String),

    // --- Event/role parsing at the boundary.
    #[error("'{0}' is not a recognized event")]
    InvalidEvent(String),

    // --- Infrastructure wrapping, repository boundary only.
    #[error("storage error: {0}")]
    Sqlx(String),
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl ProcGuardError {
    /// The stable machine-readable rule code used as `rule_code` on a
    /// [`crate::model::Violation`] and as the `decision`/`rule` fields of a
    /// [`crate::model::PolicyDecision`]. Authorization errors have no rule
    /// code: they are raised before any ledger write exists to name.
    pub fn rule_code(&self) -> Option<&'static str> {
        use ProcGuardError::*;
        match self {
            InvalidFsmTransition { .. } => Some("INVALID_FSM_TRANSITION"),
            TerminalStateMutation { .. } => Some("TERMINAL_STATE_MUTATION"),
            ProcedureVersionMismatch { .. } => Some("PROCEDURE_VERSION_MISMATCH"),
            ProgressWithoutApproval { .. } => Some("PROGRESS_WITHOUT_APPROVAL"),
            ApprovalAfterProgress { .. } => Some("APPROVAL_AFTER_PROGRESS"),
            DuplicateApproval { .. } => Some("DUPLICATE_APPROVAL"),
            UnauthorizedApproval(_) => Some("UNAUTHORIZED_APPROVAL"),
            _ => None,
        }
    }

    /// Whether this error kind must be recorded atomically as a
    /// (policy decision, violation, enforcement chain, audit) tuple before
    /// being re-raised. Authorization, not-found, forensic, and operational
    /// errors are not: they surface without touching the violation ledger.
    pub fn is_recordable_violation(&self) -> bool {
        self.rule_code().is_some()
    }

    /// The HTTP status an external collaborator should map this error to.
    ///
    /// This core never binds routes itself, but it owns this mapping table
    /// since it's part of the core's contract with whatever does the
    /// binding, not the routing logic. Plain `u16` rather than a dependency
    /// on an HTTP crate's status-code type, since nothing here speaks HTTP.
    pub fn status_code(&self) -> u16 {
        use ProcGuardError::*;
        match self {
            InvalidRole(_) => 400,
            Unauthorized { .. } => 403,
            UnauthorizedApproval(_) => 409,
            InvalidFsmTransition { .. } => 409,
            TerminalStateMutation { .. } => 409,
            ProcedureVersionMismatch { .. } => 409,
            ProgressWithoutApproval { .. } => 409,
            ApprovalAfterProgress { .. } => 409,
            DuplicateApproval { .. } => 409,
            BatchNotFound(_) => 404,
            ProcedureNotFound { .. } => 404,
            ViolationNotFound(_) => 404,
            ForensicIntegrityCompromised(_) => 422,
            BatchAlreadySealed(_) => 409,
            LedgerUnavailable(_) => 503,
            Timeout(_) => 504,
            InvalidEvent(_) => 400,
            Sqlx(_) => 500,
            Serialization(_) => 500,
        }
    }
}
