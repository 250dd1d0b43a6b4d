//! granger-scheduler — the Granger resource optimization scheduler.
//!
//! Accepts jobs with resource requirements, priorities and deadlines and
//! places them onto a pool of capacity-constrained nodes using one of six
//! policies (`granger-policy`), informed by node utilization and
//! reachability (`granger-monitor`).
//!
//! # Architecture
//!
//! ```text
//! ResourceScheduler
//!   ├── Core (single write lock)
//!   │     ├── jobs: queue + history
//!   │     ├── nodes: capacity pool
//!   │     └── PolicyEngine (cursor / rotation state)
//!   ├── command queue   ← pause/resume/cancel intents
//!   ├── completion channel ← worker reports (generation-guarded)
//!   ├── ResourceMonitor ← reachability, saturation, utilization
//!   └── EventSink → TickReport once per tick
//! ```
//!
//! Everything is constructed explicitly and configured through
//! [`SchedulerConfig`]; there are no globals.

pub mod config;
pub mod error;
pub mod events;
pub mod scheduler;
pub mod stats;

pub use config::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use events::{EventSink, LogSink, NullSink, StartedJob, TickReport};
pub use scheduler::{CompletionSender, JobSpec, ResourceScheduler, WorkerOutcome, WorkerReport};
pub use stats::{DimensionUtilization, NodeStats, SchedulerStats};
