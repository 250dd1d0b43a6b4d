//! The resource monitor — bounded history and degrade-gracefully sampling.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use granger_core::{NodeId, UtilizationSnapshot};

use crate::probe::UtilizationProbe;
use crate::reachability::ReachabilityTracker;
use crate::trend::{Metric, Trend, classify, metric_value};

/// Monitor tuning knobs, all overridable at construction.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Sampling loop period.
    pub interval: Duration,
    /// Per-probe timeout; a slower probe counts as a failure for that tick.
    pub sample_timeout: Duration,
    /// Ring-buffer capacity per node.
    pub history_window: usize,
    /// Consecutive failures before a node is marked unreachable.
    pub unreachable_threshold: u32,
    /// CPU percentage above which a rising node counts as saturating.
    pub saturation_cpu_percent: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            sample_timeout: Duration::from_millis(500),
            history_window: 60,
            unreachable_threshold: 3,
            saturation_cpu_percent: 85.0,
        }
    }
}

/// Per-node monitoring state.
struct NodeTrack {
    history: VecDeque<UtilizationSnapshot>,
    last_known: Option<UtilizationSnapshot>,
    reachability: ReachabilityTracker,
}

impl NodeTrack {
    fn new(node_id: &NodeId, config: &MonitorConfig) -> Self {
        Self {
            history: VecDeque::with_capacity(config.history_window),
            last_known: None,
            reachability: ReachabilityTracker::new(node_id.clone(), config.unreachable_threshold),
        }
    }
}

/// Samples registered nodes and answers history/trend/reachability queries.
///
/// Readings are append-only and owned here; the scheduler only ever reads.
pub struct ResourceMonitor {
    probe: Arc<dyn UtilizationProbe>,
    config: MonitorConfig,
    tracks: RwLock<HashMap<NodeId, NodeTrack>>,
}

impl ResourceMonitor {
    pub fn new(probe: Arc<dyn UtilizationProbe>, config: MonitorConfig) -> Self {
        Self {
            probe,
            config,
            tracks: RwLock::new(HashMap::new()),
        }
    }

    /// Start tracking a node.
    pub async fn register_node(&self, node_id: &NodeId) {
        let mut tracks = self.tracks.write().await;
        tracks
            .entry(node_id.clone())
            .or_insert_with(|| NodeTrack::new(node_id, &self.config));
        debug!(node = %node_id, "registered for monitoring");
    }

    /// Stop tracking a node and drop its history.
    pub async fn unregister_node(&self, node_id: &NodeId) {
        let mut tracks = self.tracks.write().await;
        tracks.remove(node_id);
        debug!(node = %node_id, "unregistered from monitoring");
    }

    /// Sample one node. Never fails the caller: a probe error or timeout
    /// logs a warning, counts toward unreachability, and yields the
    /// last-known snapshot (zeroed if the node has never been read).
    pub async fn sample(&self, node_id: &NodeId) -> UtilizationSnapshot {
        let probe = Arc::clone(&self.probe);
        let target = node_id.clone();
        let attempt = tokio::time::timeout(
            self.config.sample_timeout,
            tokio::task::spawn_blocking(move || probe.sample(&target)),
        )
        .await;

        let result = match attempt {
            Ok(Ok(inner)) => inner,
            Ok(Err(join_err)) => Err(anyhow::anyhow!("probe task panicked: {join_err}")),
            Err(_) => Err(anyhow::anyhow!(
                "probe timed out after {:?}",
                self.config.sample_timeout
            )),
        };

        let mut tracks = self.tracks.write().await;
        let track = tracks
            .entry(node_id.clone())
            .or_insert_with(|| NodeTrack::new(node_id, &self.config));

        match result {
            Ok(snapshot) => {
                track.reachability.record_success();
                track.last_known = Some(snapshot);
                if track.history.len() >= self.config.history_window {
                    track.history.pop_front();
                }
                track.history.push_back(snapshot);
                snapshot
            }
            Err(e) => {
                warn!(node = %node_id, error = %e, "utilization sample failed, reusing last known");
                track.reachability.record_failure();
                track
                    .last_known
                    .unwrap_or_else(|| UtilizationSnapshot::zeroed(epoch_secs()))
            }
        }
    }

    /// Sample every registered node once.
    pub async fn sample_all(&self) {
        let nodes: Vec<NodeId> = {
            let tracks = self.tracks.read().await;
            tracks.keys().cloned().collect()
        };
        for node in nodes {
            self.sample(&node).await;
        }
    }

    /// The most recent `window` snapshots for a node, oldest first.
    ///
    /// Returns an owned copy, so reads are restartable and never hold the
    /// monitor's lock.
    pub async fn history(&self, node_id: &NodeId, window: usize) -> Vec<UtilizationSnapshot> {
        let tracks = self.tracks.read().await;
        let Some(track) = tracks.get(node_id) else {
            return Vec::new();
        };
        let skip = track.history.len().saturating_sub(window);
        track.history.iter().skip(skip).copied().collect()
    }

    /// Trend of one metric over the node's full history window.
    pub async fn trend(&self, node_id: &NodeId, metric: Metric) -> Trend {
        let tracks = self.tracks.read().await;
        let Some(track) = tracks.get(node_id) else {
            return Trend::Stable;
        };
        let values: Vec<f64> = track
            .history
            .iter()
            .map(|s| metric_value(s, metric))
            .collect();
        classify(&values)
    }

    /// Whether the node is currently reachable. Unknown nodes are assumed
    /// reachable until a probe says otherwise.
    pub async fn is_reachable(&self, node_id: &NodeId) -> bool {
        let tracks = self.tracks.read().await;
        tracks
            .get(node_id)
            .map(|t| t.reachability.is_reachable())
            .unwrap_or(true)
    }

    /// All nodes currently marked unreachable.
    pub async fn unreachable_nodes(&self) -> Vec<NodeId> {
        let tracks = self.tracks.read().await;
        tracks
            .iter()
            .filter(|(_, t)| !t.reachability.is_reachable())
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Whether the node's CPU is high and still climbing — the signal the
    /// scheduler uses to stop placing onto it before it tips over.
    pub async fn is_saturating(&self, node_id: &NodeId) -> bool {
        let tracks = self.tracks.read().await;
        let Some(track) = tracks.get(node_id) else {
            return false;
        };
        let Some(last) = track.history.back() else {
            return false;
        };
        if last.cpu_percent < self.config.saturation_cpu_percent {
            return false;
        }
        let values: Vec<f64> = track.history.iter().map(|s| s.cpu_percent).collect();
        classify(&values) == Trend::Rising
    }

    /// Node ids currently registered.
    pub async fn registered_nodes(&self) -> Vec<NodeId> {
        let tracks = self.tracks.read().await;
        tracks.keys().cloned().collect()
    }

    /// Run the sampling loop until the shutdown signal flips.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            "resource monitor started"
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.interval) => {
                    self.sample_all().await;
                }
                _ = shutdown.changed() => {
                    info!("resource monitor shutting down");
                    break;
                }
            }
        }
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
