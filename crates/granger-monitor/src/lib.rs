//! granger-monitor — node utilization monitoring for the Granger scheduler.
//!
//! Samples per-node utilization through a pluggable [`UtilizationProbe`],
//! keeps a bounded per-node history, classifies metric trends, and tracks
//! node reachability from consecutive probe failures.
//!
//! # Architecture
//!
//! ```text
//! ResourceMonitor
//!   ├── UtilizationProbe (trait) ← ReportedProbe or custom impl
//!   ├── sample()  → timeout-guarded read, never fails the caller
//!   ├── history() → bounded ring buffer per node
//!   ├── trend()   → Rising | Falling | Stable per metric
//!   └── run()     → periodic sampling loop
//! ```
//!
//! A failed or slow probe degrades to the last-known snapshot with a
//! warning; it never propagates an error into a scheduling tick.

pub mod monitor;
pub mod probe;
pub mod reachability;
pub mod trend;

pub use monitor::{MonitorConfig, ResourceMonitor};
pub use probe::{ReportedProbe, UtilizationProbe};
pub use reachability::ReachabilityTracker;
pub use trend::{Metric, Trend, classify};
