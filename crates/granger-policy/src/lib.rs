//! granger-policy — job selection policies for the Granger scheduler.
//!
//! Given the QUEUED job set and the available node capacities, a
//! [`PolicyEngine`] produces an ordered list of `(job, node)` placements
//! for one scheduling tick. It does NOT mutate scheduler state (that's
//! `granger-scheduler`); it simulates reservations internally so that a
//! returned placement can always be applied, and a job no node can
//! satisfy is never selected.
//!
//! # Policies
//!
//! - [`SchedulingPolicy::PriorityBased`] — priority desc, FIFO tie-break
//! - [`SchedulingPolicy::FairShare`] — one job per module per tick,
//!   persistent module rotation
//! - [`SchedulingPolicy::DeadlineAware`] — tightest deadline first
//! - [`SchedulingPolicy::RoundRobin`] — persistent cursor over the queue
//! - [`SchedulingPolicy::ShortestJobFirst`] — estimated duration asc
//! - [`SchedulingPolicy::CostOptimized`] — cheapest feasible node per job

pub mod engine;
pub mod fit;

pub use engine::{Placement, PolicyEngine, SchedulingPolicy};
pub use fit::{cheapest_node, spread_node};
