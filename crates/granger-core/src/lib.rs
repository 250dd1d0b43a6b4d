//! granger-core — domain types for the Granger resource scheduler.
//!
//! Holds the types shared by every other crate in the workspace:
//!
//! - [`Job`] and its lifecycle state machine
//! - [`ResourceNode`] and its capacity accounting
//! - [`ResourceRequirements`] / [`ResourceCapacity`] resource vectors
//! - [`UtilizationSnapshot`] monitoring samples
//!
//! # Invariants
//!
//! All job status changes go through [`Job::transition`]; all node capacity
//! changes go through [`ResourceNode::reserve`] / [`ResourceNode::release`].
//! Both reject illegal operations instead of silently clamping, so the
//! scheduler can treat a violation as a bug surfaced early rather than
//! corrupted accounting discovered late.

pub mod error;
pub mod job;
pub mod node;
pub mod types;

pub use error::{CapacityError, TransitionError};
pub use job::{Deadline, FailureReason, Job, JobStatus};
pub use node::{ResourceCapacity, ResourceNode};
pub use types::{JobId, NodeId, ResourceRequirements, UtilizationSnapshot};
