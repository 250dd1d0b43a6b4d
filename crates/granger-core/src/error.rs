//! Error types for domain invariant violations.

use thiserror::Error;

use crate::job::JobStatus;
use crate::types::{JobId, NodeId};

/// Errors raised by the job lifecycle state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid transition for job {job_id}: {from:?} -> {to:?}")]
    InvalidTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("job {job_id} is in terminal state {status:?}")]
    Terminal { job_id: JobId, status: JobStatus },
}

/// Errors raised by node capacity accounting.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CapacityError {
    #[error(
        "capacity exceeded on node {node_id}: {dimension} requested {requested} but only {free} free"
    )]
    CapacityExceeded {
        node_id: NodeId,
        dimension: &'static str,
        requested: f64,
        free: f64,
    },
}
