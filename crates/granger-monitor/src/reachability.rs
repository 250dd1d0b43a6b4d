//! Reachability tracking from consecutive probe failures.

use tracing::{info, warn};

use granger_core::NodeId;

/// Tracks consecutive probe outcomes for a single node.
///
/// A node is marked unreachable once `threshold` consecutive probes fail;
/// a single successful probe recovers it.
#[derive(Debug)]
pub struct ReachabilityTracker {
    node_id: NodeId,
    threshold: u32,
    consecutive_failures: u32,
    reachable: bool,
}

impl ReachabilityTracker {
    pub fn new(node_id: NodeId, threshold: u32) -> Self {
        Self {
            node_id,
            threshold,
            consecutive_failures: 0,
            reachable: true,
        }
    }

    /// Record a successful probe; returns the reachability after it.
    pub fn record_success(&mut self) -> bool {
        self.consecutive_failures = 0;
        if !self.reachable {
            info!(node = %self.node_id, "node recovered, marking reachable");
            self.reachable = true;
        }
        self.reachable
    }

    /// Record a failed probe; returns the reachability after it.
    pub fn record_failure(&mut self) -> bool {
        self.consecutive_failures += 1;
        if self.reachable && self.consecutive_failures >= self.threshold {
            warn!(
                node = %self.node_id,
                failures = self.consecutive_failures,
                threshold = self.threshold,
                "node marked unreachable"
            );
            self.reachable = false;
        }
        self.reachable
    }

    pub fn is_reachable(&self) -> bool {
        self.reachable
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_reachable() {
        let tracker = ReachabilityTracker::new("n1".to_string(), 3);
        assert!(tracker.is_reachable());
    }

    #[test]
    fn stays_reachable_below_threshold() {
        let mut tracker = ReachabilityTracker::new("n1".to_string(), 3);
        tracker.record_failure();
        tracker.record_failure();
        assert!(tracker.is_reachable());
    }

    #[test]
    fn unreachable_at_threshold() {
        let mut tracker = ReachabilityTracker::new("n1".to_string(), 3);
        for _ in 0..3 {
            tracker.record_failure();
        }
        assert!(!tracker.is_reachable());
    }

    #[test]
    fn single_success_recovers() {
        let mut tracker = ReachabilityTracker::new("n1".to_string(), 2);
        tracker.record_failure();
        tracker.record_failure();
        assert!(!tracker.is_reachable());

        assert!(tracker.record_success());
        assert!(tracker.is_reachable());
        assert_eq!(tracker.consecutive_failures(), 0);
    }

    #[test]
    fn success_resets_failure_streak() {
        let mut tracker = ReachabilityTracker::new("n1".to_string(), 3);
        tracker.record_failure();
        tracker.record_failure();
        tracker.record_success();
        tracker.record_failure();
        tracker.record_failure();
        // Streak restarted; still under threshold.
        assert!(tracker.is_reachable());
    }
}
