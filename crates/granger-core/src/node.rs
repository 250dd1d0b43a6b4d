//! Compute nodes and capacity accounting.
//!
//! A [`ResourceNode`] tracks total and allocated capacity per resource
//! dimension. The invariant `allocated <= capacity` holds for every
//! dimension at all times: [`ResourceNode::reserve`] re-checks fit even
//! though callers are expected to have called [`ResourceNode::can_fit`]
//! first, and [`ResourceNode::release`] saturates at zero.

use serde::{Deserialize, Serialize};

use crate::error::CapacityError;
use crate::types::{NodeId, ResourceRequirements};

/// A resource vector: one value per schedulable dimension.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ResourceCapacity {
    pub cpu_cores: f64,
    pub memory_mb: u64,
    #[serde(default)]
    pub gpu_count: u32,
    #[serde(default)]
    pub network_mbps: f64,
    #[serde(default)]
    pub disk_io_mbps: f64,
}

/// A compute target the scheduler can allocate jobs onto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: NodeId,
    pub capacity: ResourceCapacity,
    pub allocated: ResourceCapacity,
    /// Cost rate charged while a job occupies this node.
    pub cost_per_second: f64,
    /// False once the monitor loses contact with the node.
    pub reachable: bool,
    /// Local nodes host workers in-process; remote ones via an agent.
    pub local: bool,
    /// Draining nodes accept no new placements.
    pub draining: bool,
}

impl ResourceNode {
    pub fn new(id: impl Into<NodeId>, capacity: ResourceCapacity) -> Self {
        Self {
            id: id.into(),
            capacity,
            allocated: ResourceCapacity::default(),
            cost_per_second: 0.0,
            reachable: true,
            local: true,
            draining: false,
        }
    }

    /// Set the cost rate.
    pub fn with_cost(mut self, cost_per_second: f64) -> Self {
        self.cost_per_second = cost_per_second;
        self
    }

    /// Mark the node as a remote (agent-managed) target.
    pub fn remote(mut self) -> Self {
        self.local = false;
        self
    }

    // ── Free capacity ─────────────────────────────────────────────

    pub fn free_cpu(&self) -> f64 {
        (self.capacity.cpu_cores - self.allocated.cpu_cores).max(0.0)
    }

    pub fn free_memory_mb(&self) -> u64 {
        self.capacity.memory_mb.saturating_sub(self.allocated.memory_mb)
    }

    pub fn free_gpus(&self) -> u32 {
        self.capacity.gpu_count.saturating_sub(self.allocated.gpu_count)
    }

    pub fn free_network_mbps(&self) -> f64 {
        (self.capacity.network_mbps - self.allocated.network_mbps).max(0.0)
    }

    pub fn free_disk_io_mbps(&self) -> f64 {
        (self.capacity.disk_io_mbps - self.allocated.disk_io_mbps).max(0.0)
    }

    /// Average free fraction across the dimensions this node actually has.
    ///
    /// Used as the load-spreading signal when ranking feasible nodes.
    pub fn headroom(&self) -> f64 {
        let mut total = 0.0;
        let mut dims = 0u32;
        if self.capacity.cpu_cores > 0.0 {
            total += self.free_cpu() / self.capacity.cpu_cores;
            dims += 1;
        }
        if self.capacity.memory_mb > 0 {
            total += self.free_memory_mb() as f64 / self.capacity.memory_mb as f64;
            dims += 1;
        }
        if self.capacity.gpu_count > 0 {
            total += f64::from(self.free_gpus()) / f64::from(self.capacity.gpu_count);
            dims += 1;
        }
        if self.capacity.network_mbps > 0.0 {
            total += self.free_network_mbps() / self.capacity.network_mbps;
            dims += 1;
        }
        if self.capacity.disk_io_mbps > 0.0 {
            total += self.free_disk_io_mbps() / self.capacity.disk_io_mbps;
            dims += 1;
        }
        if dims == 0 { 0.0 } else { total / f64::from(dims) }
    }

    /// Fraction of CPU capacity currently allocated, 0.0–1.0.
    pub fn cpu_utilization(&self) -> f64 {
        if self.capacity.cpu_cores > 0.0 {
            self.allocated.cpu_cores / self.capacity.cpu_cores
        } else {
            0.0
        }
    }

    // ── Admission ─────────────────────────────────────────────────

    /// True iff every requested dimension fits in free capacity.
    ///
    /// Pure: no side effects, safe to call while simulating placements.
    pub fn can_fit(&self, req: &ResourceRequirements) -> bool {
        req.cpu_cores <= self.free_cpu()
            && req.memory_mb <= self.free_memory_mb()
            && req.gpu_count <= self.free_gpus()
            && req.network_demand() <= self.free_network_mbps()
            && req.disk_io_demand() <= self.free_disk_io_mbps()
    }

    /// Reserve capacity for a job.
    ///
    /// Re-checks fit even when the caller already did: admission and
    /// reservation are separate steps and the queue between them is where
    /// accounting bugs would hide.
    pub fn reserve(&mut self, req: &ResourceRequirements) -> Result<(), CapacityError> {
        if req.cpu_cores > self.free_cpu() {
            return Err(self.exceeded("cpu_cores", req.cpu_cores, self.free_cpu()));
        }
        if req.memory_mb > self.free_memory_mb() {
            return Err(self.exceeded(
                "memory_mb",
                req.memory_mb as f64,
                self.free_memory_mb() as f64,
            ));
        }
        if req.gpu_count > self.free_gpus() {
            return Err(self.exceeded(
                "gpu_count",
                f64::from(req.gpu_count),
                f64::from(self.free_gpus()),
            ));
        }
        if req.network_demand() > self.free_network_mbps() {
            return Err(self.exceeded(
                "network_mbps",
                req.network_demand(),
                self.free_network_mbps(),
            ));
        }
        if req.disk_io_demand() > self.free_disk_io_mbps() {
            return Err(self.exceeded(
                "disk_io_mbps",
                req.disk_io_demand(),
                self.free_disk_io_mbps(),
            ));
        }

        self.allocated.cpu_cores += req.cpu_cores;
        self.allocated.memory_mb += req.memory_mb;
        self.allocated.gpu_count += req.gpu_count;
        self.allocated.network_mbps += req.network_demand();
        self.allocated.disk_io_mbps += req.disk_io_demand();
        Ok(())
    }

    /// Release a previous reservation. Saturates at zero so a duplicate
    /// release cannot drive the accounting negative.
    pub fn release(&mut self, req: &ResourceRequirements) {
        self.allocated.cpu_cores = (self.allocated.cpu_cores - req.cpu_cores).max(0.0);
        self.allocated.memory_mb = self.allocated.memory_mb.saturating_sub(req.memory_mb);
        self.allocated.gpu_count = self.allocated.gpu_count.saturating_sub(req.gpu_count);
        self.allocated.network_mbps =
            (self.allocated.network_mbps - req.network_demand()).max(0.0);
        self.allocated.disk_io_mbps =
            (self.allocated.disk_io_mbps - req.disk_io_demand()).max(0.0);
    }

    /// Whether the invariant `allocated <= capacity` holds on every
    /// dimension. Only ever expected to be false in the presence of a bug.
    pub fn invariant_holds(&self) -> bool {
        self.allocated.cpu_cores <= self.capacity.cpu_cores + f64::EPSILON
            && self.allocated.memory_mb <= self.capacity.memory_mb
            && self.allocated.gpu_count <= self.capacity.gpu_count
            && self.allocated.network_mbps <= self.capacity.network_mbps + f64::EPSILON
            && self.allocated.disk_io_mbps <= self.capacity.disk_io_mbps + f64::EPSILON
    }

    fn exceeded(&self, dimension: &'static str, requested: f64, free: f64) -> CapacityError {
        CapacityError::CapacityExceeded {
            node_id: self.id.clone(),
            dimension,
            requested,
            free,
        }
    }
}
