//! Scheduler error types.

use thiserror::Error;

/// Errors that can occur during scheduling operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("invalid unit kind: {0}")]
    InvalidKind(String),

    #[error("missing instance data: {0}")]
    MissingInstance(String),

    #[error("unit has neither a pinned node nor a shape: {0}")]
    MissingPlacementTarget(String),

    #[error("cannot schedule a zero count unit: {0}")]
    ZeroCount(String),

    #[error("deployment count exceeds the unit limit: {0}")]
    InvalidCount(String),

    #[error("cannot schedule deployments while scheduler is active: {0}")]
    SchedulerActive(String),

    #[error("invalid unit deployment spec: {0}")]
    InvalidDeploySpec(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("placement error: {0}")]
    Placement(#[from] fleet_placement::PlacementError),

    #[error("state store error: {0}")]
    State(#[from] fleet_state::StateError),
}

impl SchedulerError {
    /// Problems with the unit definition itself; retrying will not help
    /// until the unit or its spec changes.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SchedulerError::InvalidKind(_)
                | SchedulerError::MissingInstance(_)
                | SchedulerError::MissingPlacementTarget(_)
                | SchedulerError::ZeroCount(_)
                | SchedulerError::InvalidCount(_)
                | SchedulerError::InvalidDeploySpec(_)
        )
    }
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
