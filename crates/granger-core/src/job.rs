//! Job records and the lifecycle state machine.
//!
//! A [`Job`] is created QUEUED at submission and only ever changes status
//! through [`Job::transition`], which enforces the legal edge set:
//!
//! ```text
//! QUEUED ──────► RUNNING ──────► COMPLETED
//!    │              │ ▲  │
//!    │              ▼ │  └─────► MIGRATING ──► RUNNING | QUEUED
//!    │            PAUSED
//!    └──cancel──► FAILED ◄──cancel/expiry/unreachable── (any non-terminal)
//! ```
//!
//! COMPLETED and FAILED are terminal; any transition attempted from them
//! fails with [`TransitionError::Terminal`] rather than silently succeeding.

use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::types::{JobId, NodeId, ResourceRequirements};

/// Maximum (most urgent) job priority.
pub const MAX_PRIORITY: u8 = 10;

/// Minimum (least urgent) job priority.
pub const MIN_PRIORITY: u8 = 1;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    Migrating,
    Completed,
    Failed,
}

impl JobStatus {
    /// Whether this status admits no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

/// Why a job ended up FAILED.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Cancelled by the caller.
    Cancelled,
    /// The assigned node stopped responding to the monitor.
    NodeUnreachable,
    /// The absolute deadline passed before completion.
    DeadlineExpired,
    /// The worker reported a failure.
    Execution(String),
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FailureReason::Cancelled => write!(f, "cancelled"),
            FailureReason::NodeUnreachable => write!(f, "node_unreachable"),
            FailureReason::DeadlineExpired => write!(f, "deadline_expired"),
            FailureReason::Execution(msg) => write!(f, "execution: {msg}"),
        }
    }
}

/// Deadline accepted at submission: absolute, or relative to now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Deadline {
    /// Absolute Unix timestamp in seconds.
    At(u64),
    /// Seconds from submission time.
    In(u64),
}

impl Deadline {
    /// Resolve to an absolute Unix timestamp given the submission time.
    pub fn resolve(self, now: u64) -> u64 {
        match self {
            Deadline::At(ts) => ts,
            Deadline::In(secs) => now.saturating_add(secs),
        }
    }
}

/// A schedulable unit of work.
///
/// Owned exclusively by the scheduler; mutated only through the transition
/// and boost methods below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Logical submitter tag, used by fair-share grouping.
    pub module: String,
    /// Effective priority 1–10; boost-only after submission.
    pub priority: u8,
    /// Absolute deadline in Unix seconds, if any.
    pub deadline: Option<u64>,
    pub requirements: ResourceRequirements,
    /// Estimated runtime in seconds, used by SJF and deadline-aware ranking.
    pub estimated_duration: Option<f64>,
    /// Maximum acceptable node rate under cost-optimized placement.
    pub cost_per_second: Option<f64>,
    pub status: JobStatus,
    pub assigned_node: Option<NodeId>,
    pub submitted_at: u64,
    pub started_at: Option<u64>,
    pub completed_at: Option<u64>,
    /// Completion fraction, 0.0–1.0.
    pub progress: f64,
    pub failure_reason: Option<FailureReason>,
    /// Lifetime preemption count, bounded by the scheduler's configured max.
    pub preemptions: u32,
    /// Whether the deadline-urgency boost has already been applied.
    pub deadline_boosted: bool,
    /// Incremented each time the job is (re)started on a node. Worker
    /// completion reports carry this so stale reports can be discarded.
    pub generation: u64,
    /// Monotonic submission sequence, used for FIFO tie-breaks.
    pub seq: u64,
}

impl Job {
    /// Attempt a status transition, enforcing the legal edge set.
    ///
    /// On entry to RUNNING from QUEUED or MIGRATING the generation is
    /// bumped and `started_at` is stamped (first start only); resuming
    /// from PAUSED keeps the current generation. Terminal entry stamps
    /// `completed_at`.
    pub fn transition(&mut self, to: JobStatus, now: u64) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError::Terminal {
                job_id: self.id.clone(),
                status: self.status,
            });
        }

        let allowed = matches!(
            (self.status, to),
            (JobStatus::Queued, JobStatus::Running)
                | (JobStatus::Queued, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Paused)
                | (JobStatus::Running, JobStatus::Migrating)
                | (JobStatus::Paused, JobStatus::Running)
                | (JobStatus::Paused, JobStatus::Failed)
                | (JobStatus::Migrating, JobStatus::Running)
                | (JobStatus::Migrating, JobStatus::Queued)
                | (JobStatus::Migrating, JobStatus::Failed)
        );
        if !allowed {
            return Err(TransitionError::InvalidTransition {
                job_id: self.id.clone(),
                from: self.status,
                to,
            });
        }

        match (self.status, to) {
            (JobStatus::Queued | JobStatus::Migrating, JobStatus::Running) => {
                self.generation += 1;
                if self.started_at.is_none() {
                    self.started_at = Some(now);
                }
            }
            (_, JobStatus::Completed) => {
                self.progress = 1.0;
                self.completed_at = Some(now);
            }
            (_, JobStatus::Failed) => {
                self.completed_at = Some(now);
            }
            _ => {}
        }

        self.status = to;
        Ok(())
    }

    /// Transition to FAILED with the given reason.
    pub fn fail(&mut self, reason: FailureReason, now: u64) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed, now)?;
        self.failure_reason = Some(reason);
        Ok(())
    }

    /// Apply the deadline-urgency priority boost.
    ///
    /// Monotonic and idempotent: priority only ever increases, saturates
    /// at [`MAX_PRIORITY`], and re-boosting is a no-op. Returns whether
    /// the boost was applied.
    pub fn boost_priority(&mut self, amount: u8) -> bool {
        if self.deadline_boosted {
            return false;
        }
        self.priority = self.priority.saturating_add(amount).min(MAX_PRIORITY);
        self.deadline_boosted = true;
        true
    }

    /// Seconds until the deadline, if one is set. Negative deadlines
    /// (already passed) report zero; use [`Job::deadline_expired`] to
    /// distinguish.
    pub fn time_to_deadline(&self, now: u64) -> Option<u64> {
        self.deadline.map(|d| d.saturating_sub(now))
    }

    /// Whether the deadline has passed.
    pub fn deadline_expired(&self, now: u64) -> bool {
        self.deadline.is_some_and(|d| d < now)
    }
}
