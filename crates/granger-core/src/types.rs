//! Shared identifiers and resource vectors.
//!
//! All types here are serializable so that stats consumers and scenario
//! files can carry them as JSON/TOML without adapter layers.

use serde::{Deserialize, Serialize};

/// Unique identifier for a submitted job.
pub type JobId = String;

/// Unique identifier for a compute node in the pool.
pub type NodeId = String;

// ── Requirements ──────────────────────────────────────────────────

/// Per-job resource demand, fixed at submission.
///
/// `network_mbps` and `disk_io_mbps` are optional; `None` means the job
/// places no demand on that dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// CPU cores requested (fractional cores allowed).
    pub cpu_cores: f64,
    /// Memory requested in MB.
    pub memory_mb: u64,
    /// GPUs requested.
    #[serde(default)]
    pub gpu_count: u32,
    /// Network bandwidth in Mbps.
    #[serde(default)]
    pub network_mbps: Option<f64>,
    /// Disk I/O bandwidth in Mbps.
    #[serde(default)]
    pub disk_io_mbps: Option<f64>,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu_cores: 1.0,
            memory_mb: 512,
            gpu_count: 0,
            network_mbps: None,
            disk_io_mbps: None,
        }
    }
}

impl ResourceRequirements {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set CPU requirement in cores.
    pub fn cpu(mut self, cores: f64) -> Self {
        self.cpu_cores = cores;
        self
    }

    /// Set memory requirement in MB.
    pub fn memory(mut self, mb: u64) -> Self {
        self.memory_mb = mb;
        self
    }

    /// Set GPU requirement.
    pub fn gpu(mut self, count: u32) -> Self {
        self.gpu_count = count;
        self
    }

    /// Set network bandwidth requirement in Mbps.
    pub fn network(mut self, mbps: f64) -> Self {
        self.network_mbps = Some(mbps);
        self
    }

    /// Set disk I/O bandwidth requirement in Mbps.
    pub fn disk_io(mut self, mbps: f64) -> Self {
        self.disk_io_mbps = Some(mbps);
        self
    }

    /// Check the requirement vector for admissibility.
    ///
    /// Returns the first rejection reason found, suitable for surfacing
    /// to the submitting caller verbatim.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.cpu_cores > 0.0) || !self.cpu_cores.is_finite() {
            return Err(format!("cpu_cores must be positive, got {}", self.cpu_cores));
        }
        if self.memory_mb == 0 {
            return Err("memory_mb must be positive".to_string());
        }
        if let Some(mbps) = self.network_mbps {
            if mbps < 0.0 || !mbps.is_finite() {
                return Err(format!("network_mbps must be non-negative, got {mbps}"));
            }
        }
        if let Some(mbps) = self.disk_io_mbps {
            if mbps < 0.0 || !mbps.is_finite() {
                return Err(format!("disk_io_mbps must be non-negative, got {mbps}"));
            }
        }
        Ok(())
    }

    /// Network demand with `None` normalized to zero.
    pub fn network_demand(&self) -> f64 {
        self.network_mbps.unwrap_or(0.0)
    }

    /// Disk I/O demand with `None` normalized to zero.
    pub fn disk_io_demand(&self) -> f64 {
        self.disk_io_mbps.unwrap_or(0.0)
    }
}

// ── Monitoring ────────────────────────────────────────────────────

/// Point-in-time utilization sample for one node.
///
/// Append-only: snapshots are never mutated after creation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSnapshot {
    /// CPU utilization, 0.0–100.0.
    pub cpu_percent: f64,
    /// Memory in use, MB.
    pub memory_mb: u64,
    /// Disk I/O throughput, Mbps.
    pub disk_io_mbps: f64,
    /// Network throughput, Mbps.
    pub network_mbps: f64,
    /// Unix timestamp (seconds) of the sample.
    pub timestamp: u64,
}

impl UtilizationSnapshot {
    /// An all-zero sample at the given timestamp, used when a node has
    /// never been successfully probed.
    pub fn zeroed(timestamp: u64) -> Self {
        Self {
            cpu_percent: 0.0,
            memory_mb: 0,
            disk_io_mbps: 0.0,
            network_mbps: 0.0,
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_requirements_are_valid() {
        assert!(ResourceRequirements::default().validate().is_ok());
    }

    #[test]
    fn builder_chains() {
        let req = ResourceRequirements::new()
            .cpu(2.5)
            .memory(4096)
            .gpu(1)
            .network(100.0);

        assert_eq!(req.cpu_cores, 2.5);
        assert_eq!(req.memory_mb, 4096);
        assert_eq!(req.gpu_count, 1);
        assert_eq!(req.network_mbps, Some(100.0));
        assert_eq!(req.disk_io_mbps, None);
    }

    #[test]
    fn rejects_zero_cpu() {
        let req = ResourceRequirements::new().cpu(0.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_negative_cpu() {
        let req = ResourceRequirements::new().cpu(-1.0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_zero_memory() {
        let req = ResourceRequirements::new().memory(0);
        assert!(req.validate().is_err());
    }

    #[test]
    fn rejects_negative_optional_dimensions() {
        assert!(ResourceRequirements::new().network(-5.0).validate().is_err());
        assert!(ResourceRequirements::new().disk_io(-0.1).validate().is_err());
    }

    #[test]
    fn rejects_non_finite_cpu() {
        let req = ResourceRequirements::new().cpu(f64::NAN);
        assert!(req.validate().is_err());
    }

    #[test]
    fn optional_demand_normalizes_to_zero() {
        let req = ResourceRequirements::default();
        assert_eq!(req.network_demand(), 0.0);
        assert_eq!(req.disk_io_demand(), 0.0);
    }
}
