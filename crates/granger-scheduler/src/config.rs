//! Scheduler configuration.
//!
//! Everything is overridable at construction and loadable from TOML;
//! there is no module-level mutable state anywhere in the workspace.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use granger_monitor::MonitorConfig;
use granger_policy::SchedulingPolicy;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Active scheduling policy for this instance.
    pub policy: SchedulingPolicy,
    /// Scheduling loop period.
    pub tick_interval_ms: u64,
    /// Queued jobs whose remaining time-to-deadline drops below this get
    /// their one-time priority boost.
    pub urgency_threshold_secs: u64,
    /// Priority added by the deadline boost (saturating at 10).
    pub urgency_boost: u8,
    /// Lifetime preemption budget per job; beyond it a job is never
    /// preempted again.
    pub max_preemptions: u32,
    /// Monitor sampling loop period.
    pub monitor_interval_ms: u64,
    /// Per-probe timeout before the monitor reuses stale data.
    pub sample_timeout_ms: u64,
    /// Utilization history ring-buffer size per node.
    pub history_window: usize,
    /// Consecutive probe failures before a node is unreachable.
    pub unreachable_threshold: u32,
    /// CPU percentage above which a rising node is skipped for placement.
    pub saturation_cpu_percent: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            policy: SchedulingPolicy::PriorityBased,
            tick_interval_ms: 1000,
            urgency_threshold_secs: 30,
            urgency_boost: 2,
            max_preemptions: 3,
            monitor_interval_ms: 1000,
            sample_timeout_ms: 500,
            history_window: 60,
            unreachable_threshold: 3,
            saturation_cpu_percent: 85.0,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Derive the monitor configuration from the shared knobs.
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            interval: Duration::from_millis(self.monitor_interval_ms),
            sample_timeout: Duration::from_millis(self.sample_timeout_ms),
            history_window: self.history_window,
            unreachable_threshold: self.unreachable_threshold,
            saturation_cpu_percent: self.saturation_cpu_percent,
        }
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = SchedulerConfig::default();
        assert_eq!(config.policy, SchedulingPolicy::PriorityBased);
        assert_eq!(config.tick_interval(), Duration::from_secs(1));
        assert_eq!(config.max_preemptions, 3);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config = SchedulerConfig::from_toml_str(
            r#"
            policy = "fair_share"
            tick_interval_ms = 250
            "#,
        )
        .unwrap();

        assert_eq!(config.policy, SchedulingPolicy::FairShare);
        assert_eq!(config.tick_interval_ms, 250);
        // Unspecified fields keep their defaults.
        assert_eq!(config.urgency_threshold_secs, 30);
    }

    #[test]
    fn empty_toml_is_all_defaults() {
        let config = SchedulerConfig::from_toml_str("").unwrap();
        assert_eq!(config.history_window, 60);
    }

    #[test]
    fn unknown_policy_is_rejected() {
        assert!(SchedulerConfig::from_toml_str(r#"policy = "coin_flip""#).is_err());
    }

    #[test]
    fn monitor_config_maps_fields() {
        let config = SchedulerConfig {
            monitor_interval_ms: 2000,
            sample_timeout_ms: 100,
            history_window: 5,
            ..Default::default()
        };
        let mc = config.monitor_config();
        assert_eq!(mc.interval, Duration::from_secs(2));
        assert_eq!(mc.sample_timeout, Duration::from_millis(100));
        assert_eq!(mc.history_window, 5);
    }
}
