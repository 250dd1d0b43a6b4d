//! Scheduler error types.

use thiserror::Error;

use granger_core::{CapacityError, JobId, NodeId, TransitionError};

/// Errors surfaced by the scheduler's control surface.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Malformed submission, rejected synchronously; the job never
    /// enters the queue.
    #[error("invalid job spec: {reason}")]
    InvalidJobSpec { reason: String },

    #[error("lifecycle violation: {0}")]
    Transition(#[from] TransitionError),

    #[error("capacity violation: {0}")]
    Capacity(#[from] CapacityError),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("node not found: {0}")]
    NodeNotFound(NodeId),

    #[error("node already registered: {0}")]
    NodeExists(NodeId),

    #[error("scheduler loop already started")]
    AlreadyStarted,
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
