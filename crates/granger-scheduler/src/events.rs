//! Per-tick event reporting.
//!
//! Embedders observe the scheduler through a synchronous [`EventSink`]
//! invoked exactly once at the end of every tick with that tick's
//! [`TickReport`]. Workers use the `started` entries (job, node,
//! generation) to know what to launch.

use serde::Serialize;
use tracing::debug;

use granger_core::{FailureReason, JobId, NodeId};

use crate::stats::SchedulerStats;

/// A job that entered RUNNING this tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartedJob {
    pub job_id: JobId,
    pub node_id: NodeId,
    /// Generation workers must echo in completion reports.
    pub generation: u64,
}

/// Everything that happened in one tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TickReport {
    pub tick: u64,
    pub started: Vec<StartedJob>,
    pub completed: Vec<JobId>,
    pub failed: Vec<(JobId, FailureReason)>,
    pub preempted: Vec<JobId>,
    pub boosted: Vec<JobId>,
    pub stats: SchedulerStats,
}

impl TickReport {
    pub fn new(tick: u64) -> Self {
        Self {
            tick,
            ..Default::default()
        }
    }

    /// Whether anything observable happened this tick.
    pub fn is_quiet(&self) -> bool {
        self.started.is_empty()
            && self.completed.is_empty()
            && self.failed.is_empty()
            && self.preempted.is_empty()
            && self.boosted.is_empty()
    }
}

/// Invoked synchronously once per tick. Implementations must be cheap;
/// the tick does not continue until the sink returns.
pub trait EventSink: Send + Sync {
    fn on_tick(&self, report: &TickReport);
}

/// Discards every report.
pub struct NullSink;

impl EventSink for NullSink {
    fn on_tick(&self, _report: &TickReport) {}
}

/// Logs a one-line summary of non-quiet ticks.
pub struct LogSink;

impl EventSink for LogSink {
    fn on_tick(&self, report: &TickReport) {
        if report.is_quiet() {
            return;
        }
        debug!(
            tick = report.tick,
            started = report.started.len(),
            completed = report.completed.len(),
            failed = report.failed.len(),
            preempted = report.preempted.len(),
            "tick"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quiet_report_detection() {
        let mut report = TickReport::new(7);
        assert!(report.is_quiet());

        report.completed.push("job-000001".to_string());
        assert!(!report.is_quiet());
    }

    #[test]
    fn sinks_accept_reports() {
        let report = TickReport::new(1);
        NullSink.on_tick(&report);
        LogSink.on_tick(&report);
    }
}
