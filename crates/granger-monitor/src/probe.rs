//! Utilization probes.
//!
//! The [`UtilizationProbe`] trait is the seam between the monitor and
//! whatever actually measures a node. The in-tree [`ReportedProbe`] is
//! heartbeat-style: node agents (or the embedding process) push readings
//! in, and sampling returns the latest one. Tests inject failing or
//! scripted probes through the same trait.

use std::collections::HashMap;
use std::sync::RwLock;

use granger_core::{NodeId, UtilizationSnapshot};

/// Reads the current utilization of one node.
///
/// Implementations may block (the monitor calls them on the blocking
/// pool under a timeout) and may fail; failure handling is the
/// monitor's job, not the probe's.
pub trait UtilizationProbe: Send + Sync {
    fn sample(&self, node_id: &NodeId) -> anyhow::Result<UtilizationSnapshot>;
}

/// A probe fed by external reports.
///
/// `report` stores the latest reading per node; `sample` returns it.
/// Sampling a node that has never reported is an error (the monitor
/// counts it toward unreachability).
#[derive(Default)]
pub struct ReportedProbe {
    readings: RwLock<HashMap<NodeId, UtilizationSnapshot>>,
}

impl ReportedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store the latest reading for a node.
    pub fn report(&self, node_id: &NodeId, snapshot: UtilizationSnapshot) {
        let mut readings = self
            .readings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        readings.insert(node_id.clone(), snapshot);
    }

    /// Drop a node's reading, e.g. when its agent disconnects. Subsequent
    /// samples fail until a new report arrives.
    pub fn clear(&self, node_id: &NodeId) {
        let mut readings = self
            .readings
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        readings.remove(node_id);
    }
}

impl UtilizationProbe for ReportedProbe {
    fn sample(&self, node_id: &NodeId) -> anyhow::Result<UtilizationSnapshot> {
        let readings = self
            .readings
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        readings
            .get(node_id)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no utilization report for node {node_id}"))
    }
}
