//! Read-only scheduler statistics.
//!
//! Assembled once per tick and on demand by `get_scheduler_stats`; a
//! best-effort snapshot that reporting consumers poll and render. The
//! scheduler has no knowledge of how they format it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use granger_core::NodeId;

/// Allocated fraction (0.0–1.0) per resource dimension, aggregated over
/// the whole node pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DimensionUtilization {
    pub cpu: f64,
    pub memory: f64,
    pub gpu: f64,
    pub network: f64,
    pub disk_io: f64,
}

/// Per-node capacity view included in stats snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub node_id: NodeId,
    pub cpu_allocated: f64,
    pub cpu_total: f64,
    pub memory_allocated_mb: u64,
    pub memory_total_mb: u64,
    pub running_jobs: usize,
    pub reachable: bool,
    pub draining: bool,
}

/// Point-in-time scheduler snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchedulerStats {
    pub ticks: u64,
    pub queued_jobs: usize,
    pub running_jobs: usize,
    pub paused_jobs: usize,
    pub migrating_jobs: usize,
    pub completed_jobs: usize,
    pub failed_jobs: usize,
    pub utilization: DimensionUtilization,
    pub nodes: Vec<NodeStats>,
    /// Placements made, keyed by policy name.
    pub selections: HashMap<String, u64>,
    pub preemptions: u64,
    pub deadline_boosts: u64,
}
