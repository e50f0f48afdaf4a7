use std::fmt;

/// Recoverable failure kinds a single pipeline stage can hit.
///
/// Every stage returns `Result<T, StageError>` internally; the orchestrator
/// is the only place these ever get converted into "return what we have" or
/// "skip this host" behavior. Nothing here crosses the HTTP boundary as an
/// error response — see `StageError::log_and_continue`.
#[derive(Debug, Clone)]
pub enum StageError {
    InputInvalid(String),
    StoreUnavailable(String),
    StoreQueryFailed(String),
    NoAlarmsForHost(String),
    ElectionFailed(String),
    PruneInvariantViolation(String),
    BridgeTargetMissing(String),
    Internal(String),
}

impl StageError {
    /// Short tag used in `【stage-name】` log lines.
    pub fn kind_tag(&self) -> &'static str {
        match self {
            StageError::InputInvalid(_) => "InputInvalid",
            StageError::StoreUnavailable(_) => "StoreUnavailable",
            StageError::StoreQueryFailed(_) => "StoreQueryFailed",
            StageError::NoAlarmsForHost(_) => "NoAlarmsForHost",
            StageError::ElectionFailed(_) => "ElectionFailed",
            StageError::PruneInvariantViolation(_) => "PruneInvariantViolation",
            StageError::BridgeTargetMissing(_) => "BridgeTargetMissing",
            StageError::Internal(_) => "Internal",
        }
    }
}

impl fmt::Display for StageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            StageError::InputInvalid(m)
            | StageError::StoreUnavailable(m)
            | StageError::StoreQueryFailed(m)
            | StageError::NoAlarmsForHost(m)
            | StageError::ElectionFailed(m)
            | StageError::PruneInvariantViolation(m)
            | StageError::BridgeTargetMissing(m)
            | StageError::Internal(m) => m,
        };
        write!(f, "{}: {}", self.kind_tag(), msg)
    }
}

impl std::error::Error for StageError {}

/// Logs `err` tagged with `stage` using the `【stage-name】` convention
/// required by the error-handling design, then drops it. Call this at every
/// point where a stage-local error must not propagate further.
pub fn log_stage_error(stage: &str, err: &StageError) {
    eprintln!("【{}】error: {}", stage, err);
}
