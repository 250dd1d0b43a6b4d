//! Policy engine — ranks the queue and pairs jobs with nodes.
//!
//! One engine instance belongs to one scheduler instance and carries the
//! per-policy mutable state that must persist across ticks (round-robin
//! cursor, fair-share rotation). Selection works over cloned node
//! capacities and reserves greedily in selection order, so the returned
//! placements are exactly applicable by the caller in that order.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use granger_core::{Job, JobId, NodeId, ResourceNode};

use crate::fit::{cheapest_node, spread_node};

/// The six interchangeable scheduling policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingPolicy {
    PriorityBased,
    FairShare,
    DeadlineAware,
    RoundRobin,
    ShortestJobFirst,
    CostOptimized,
}

impl SchedulingPolicy {
    /// Stable name used in stats counters and config files.
    pub fn as_str(self) -> &'static str {
        match self {
            SchedulingPolicy::PriorityBased => "priority_based",
            SchedulingPolicy::FairShare => "fair_share",
            SchedulingPolicy::DeadlineAware => "deadline_aware",
            SchedulingPolicy::RoundRobin => "round_robin",
            SchedulingPolicy::ShortestJobFirst => "shortest_job_first",
            SchedulingPolicy::CostOptimized => "cost_optimized",
        }
    }
}

impl Default for SchedulingPolicy {
    fn default() -> Self {
        SchedulingPolicy::PriorityBased
    }
}

impl std::fmt::Display for SchedulingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A `(job, node)` pairing produced for one tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub job_id: JobId,
    pub node_id: NodeId,
}

/// Per-scheduler policy state. See the module docs.
#[derive(Debug)]
pub struct PolicyEngine {
    policy: SchedulingPolicy,
    /// Round-robin: index into the seq-ordered queue where the next tick
    /// starts scanning.
    rr_cursor: usize,
    /// Fair-share: module service order; a module that receives a
    /// placement moves to the back.
    rotation: Vec<String>,
}

impl PolicyEngine {
    pub fn new(policy: SchedulingPolicy) -> Self {
        Self {
            policy,
            rr_cursor: 0,
            rotation: Vec::new(),
        }
    }

    pub fn policy(&self) -> SchedulingPolicy {
        self.policy
    }

    /// Produce this tick's placements.
    ///
    /// `queued` is the QUEUED job set (any order); `nodes` the node pool.
    /// Unreachable and draining nodes are never placement targets. A job
    /// that no candidate node can currently satisfy is skipped and stays
    /// queued.
    pub fn select(&mut self, now: u64, queued: &[&Job], nodes: &[&ResourceNode]) -> Vec<Placement> {
        let mut pool: Vec<ResourceNode> = nodes
            .iter()
            .filter(|n| n.reachable && !n.draining)
            .map(|n| (*n).clone())
            .collect();
        if pool.is_empty() || queued.is_empty() {
            return Vec::new();
        }

        let mut jobs: Vec<&Job> = queued.to_vec();
        jobs.sort_by_key(|j| j.seq);

        match self.policy {
            SchedulingPolicy::FairShare => self.select_fair_share(&jobs, &mut pool),
            SchedulingPolicy::RoundRobin => self.select_round_robin(&jobs, &mut pool),
            SchedulingPolicy::PriorityBased => {
                jobs.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
                place_in_order(&jobs, &mut pool, false)
            }
            SchedulingPolicy::DeadlineAware => {
                jobs.sort_by(|a, b| {
                    deadline_key(a, now)
                        .cmp(&deadline_key(b, now))
                        .then(b.priority.cmp(&a.priority))
                        .then(a.seq.cmp(&b.seq))
                });
                place_in_order(&jobs, &mut pool, false)
            }
            SchedulingPolicy::ShortestJobFirst => {
                jobs.sort_by(|a, b| {
                    let da = a.estimated_duration.unwrap_or(f64::INFINITY);
                    let db = b.estimated_duration.unwrap_or(f64::INFINITY);
                    da.partial_cmp(&db)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.seq.cmp(&b.seq))
                });
                place_in_order(&jobs, &mut pool, false)
            }
            SchedulingPolicy::CostOptimized => place_in_order(&jobs, &mut pool, true),
        }
    }

    /// One job per module per tick, modules served in rotation order,
    /// FIFO within a module. Only the head job of each module is
    /// considered; a head that fits nowhere blocks its module for the
    /// tick, preserving within-module submission order.
    fn select_fair_share(&mut self, jobs: &[&Job], pool: &mut [ResourceNode]) -> Vec<Placement> {
        let mut heads: HashMap<&str, &Job> = HashMap::new();
        for job in jobs {
            heads.entry(job.module.as_str()).or_insert(job);
        }

        // New modules join the back of the rotation in first-submission order.
        for job in jobs {
            if !self.rotation.iter().any(|m| m == &job.module) {
                self.rotation.push(job.module.clone());
            }
        }

        let order = self.rotation.clone();
        let mut served = Vec::new();
        let mut out = Vec::new();
        for module in &order {
            let Some(job) = heads.get(module.as_str()) else {
                continue;
            };
            if let Some(placement) = try_place(job, pool, false) {
                out.push(placement);
                served.push(module.clone());
            }
        }

        for module in served {
            if let Some(pos) = self.rotation.iter().position(|m| m == &module) {
                let m = self.rotation.remove(pos);
                self.rotation.push(m);
            }
        }

        out
    }

    /// Cyclic scan of the seq-ordered queue starting at the persistent
    /// cursor; the cursor advances by the number of jobs placed, wrapping
    /// at queue length.
    fn select_round_robin(&mut self, jobs: &[&Job], pool: &mut [ResourceNode]) -> Vec<Placement> {
        let n = jobs.len();
        let start = self.rr_cursor % n;
        let mut out = Vec::new();
        for i in 0..n {
            let job = jobs[(start + i) % n];
            if let Some(placement) = try_place(job, pool, false) {
                out.push(placement);
            }
        }
        self.rr_cursor = (start + out.len()) % n;
        out
    }
}

/// Ordering key for deadline-aware ranking: deadline-bearing jobs sort
/// before deadline-less ones, tightest remaining time first.
fn deadline_key(job: &Job, now: u64) -> (u8, u64) {
    match job.deadline {
        Some(d) => (0, d.saturating_sub(now)),
        None => (1, u64::MAX),
    }
}

fn place_in_order(jobs: &[&Job], pool: &mut [ResourceNode], by_cost: bool) -> Vec<Placement> {
    let mut out = Vec::new();
    for job in jobs {
        if let Some(placement) = try_place(job, pool, by_cost) {
            out.push(placement);
        }
    }
    out
}

/// Attempt to place one job, deducting from the simulated pool on success.
fn try_place(job: &Job, pool: &mut [ResourceNode], by_cost: bool) -> Option<Placement> {
    let idx = if by_cost {
        cheapest_node(job, pool)?
    } else {
        spread_node(job, pool)?
    };

    if let Err(e) = pool[idx].reserve(&job.requirements) {
        // Fit was just checked; a failure here means the simulation and
        // the fit check disagree. Skip the job rather than over-placing.
        debug!(job_id = %job.id, error = %e, "simulated reservation refused");
        return None;
    }

    debug!(job_id = %job.id, node = %pool[idx].id, "selected placement");
    Some(Placement {
        job_id: job.id.clone(),
        node_id: pool[idx].id.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use granger_core::{JobStatus, ResourceCapacity, ResourceRequirements};

    fn make_job(id: &str, seq: u64) -> Job {
        Job {
            id: id.to_string(),
            module: "default".to_string(),
            priority: 5,
            deadline: None,
            requirements: ResourceRequirements::new().cpu(2.0).memory(1024),
            estimated_duration: Some(10.0),
            cost_per_second: None,
            status: JobStatus::Queued,
            assigned_node: None,
            submitted_at: 1000 + seq,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            failure_reason: None,
            preemptions: 0,
            deadline_boosted: false,
            generation: 0,
            seq,
        }
    }

    fn make_node(id: &str, cpu: f64) -> ResourceNode {
        ResourceNode::new(
            id,
            ResourceCapacity {
                cpu_cores: cpu,
                memory_mb: 65536,
                ..Default::default()
            },
        )
    }

    fn select(
        engine: &mut PolicyEngine,
        jobs: &[Job],
        nodes: &[ResourceNode],
    ) -> Vec<Placement> {
        let job_refs: Vec<&Job> = jobs.iter().collect();
        let node_refs: Vec<&ResourceNode> = nodes.iter().collect();
        engine.select(2000, &job_refs, &node_refs)
    }

    #[test]
    fn priority_selects_higher_first_when_capacity_for_one() {
        let mut low = make_job("low", 0);
        low.priority = 3;
        let mut high = make_job("high", 1);
        high.priority = 8;

        // Room for exactly one 2-core job.
        let nodes = vec![make_node("n1", 2.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::PriorityBased);

        let placements = select(&mut engine, &[low, high], &nodes);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].job_id, "high");
    }

    #[test]
    fn priority_ties_break_fifo() {
        let jobs = vec![make_job("first", 0), make_job("second", 1)];
        let nodes = vec![make_node("n1", 2.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::PriorityBased);

        let placements = select(&mut engine, &jobs, &nodes);
        assert_eq!(placements[0].job_id, "first");
    }

    #[test]
    fn infeasible_job_is_skipped_not_blocking() {
        let mut huge = make_job("huge", 0);
        huge.requirements = ResourceRequirements::new().cpu(64.0).memory(1024);
        huge.priority = 10;
        let small = make_job("small", 1);

        let nodes = vec![make_node("n1", 4.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::PriorityBased);

        let placements = select(&mut engine, &[huge, small], &nodes);
        assert_eq!(placements.len(), 1);
        assert_eq!(placements[0].job_id, "small");
    }

    #[test]
    fn greedy_simulation_respects_capacity() {
        let jobs = vec![make_job("a", 0), make_job("b", 1)];
        // 3 cores: fits one 2-core job, not two.
        let nodes = vec![make_node("n1", 3.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::PriorityBased);

        let placements = select(&mut engine, &jobs, &nodes);
        assert_eq!(placements.len(), 1);
    }

    #[test]
    fn unreachable_and_draining_nodes_are_skipped() {
        let mut unreachable = make_node("gone", 8.0);
        unreachable.reachable = false;
        let mut draining = make_node("draining", 8.0);
        draining.draining = true;

        let jobs = vec![make_job("a", 0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::PriorityBased);

        assert!(select(&mut engine, &jobs, &[unreachable, draining]).is_empty());
    }

    #[test]
    fn sjf_selects_shortest_first() {
        let mut long = make_job("long", 0);
        long.estimated_duration = Some(10.0);
        let mut short = make_job("short", 1);
        short.estimated_duration = Some(5.0);

        // 4 cores fits both 2-core jobs; ordering is what matters.
        let nodes = vec![make_node("n1", 4.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::ShortestJobFirst);

        let placements = select(&mut engine, &[long, short], &nodes);
        assert_eq!(placements[0].job_id, "short");
        assert_eq!(placements[1].job_id, "long");
    }

    #[test]
    fn sjf_jobs_without_estimate_sort_last() {
        let mut unknown = make_job("unknown", 0);
        unknown.estimated_duration = None;
        let known = make_job("known", 1);

        let nodes = vec![make_node("n1", 8.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::ShortestJobFirst);

        let placements = select(&mut engine, &[unknown, known], &nodes);
        assert_eq!(placements[0].job_id, "known");
    }

    #[test]
    fn deadline_aware_orders_by_urgency() {
        let mut relaxed = make_job("relaxed", 0);
        relaxed.deadline = Some(9000);
        let mut urgent = make_job("urgent", 1);
        urgent.deadline = Some(2100);
        let none = make_job("none", 2);

        let nodes = vec![make_node("n1", 8.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::DeadlineAware);

        let placements = select(&mut engine, &[relaxed, urgent, none], &nodes);
        let order: Vec<&str> = placements.iter().map(|p| p.job_id.as_str()).collect();
        assert_eq!(order, vec!["urgent", "relaxed", "none"]);
    }

    #[test]
    fn deadline_ties_break_on_priority() {
        let mut a = make_job("a", 0);
        a.deadline = Some(3000);
        a.priority = 3;
        let mut b = make_job("b", 1);
        b.deadline = Some(3000);
        b.priority = 9;

        let nodes = vec![make_node("n1", 8.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::DeadlineAware);

        let placements = select(&mut engine, &[a, b], &nodes);
        assert_eq!(placements[0].job_id, "b");
    }

    #[test]
    fn fair_share_alternates_modules_across_ticks() {
        let mut a1 = make_job("a1", 0);
        a1.module = "alpha".to_string();
        let mut b1 = make_job("b1", 1);
        b1.module = "beta".to_string();
        let mut a2 = make_job("a2", 2);
        a2.module = "alpha".to_string();
        let mut b2 = make_job("b2", 3);
        b2.module = "beta".to_string();

        // One 2-core slot: a single placement per tick.
        let nodes = vec![make_node("n1", 2.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::FairShare);

        let mut queue = vec![a1, b1, a2, b2];
        let mut trace = Vec::new();
        while !queue.is_empty() {
            let placements = select(&mut engine, &queue, &nodes);
            assert_eq!(placements.len(), 1);
            let placed = placements[0].job_id.clone();
            let job = queue
                .iter()
                .find(|j| j.id == placed)
                .cloned()
                .expect("placed job in queue");
            trace.push(job.module.clone());
            queue.retain(|j| j.id != placed);
        }

        // No module is served twice in a row while the other still waits.
        assert_eq!(trace, vec!["alpha", "beta", "alpha", "beta"]);
    }

    #[test]
    fn fair_share_one_job_per_module_per_tick() {
        let mut a1 = make_job("a1", 0);
        a1.module = "alpha".to_string();
        let mut a2 = make_job("a2", 1);
        a2.module = "alpha".to_string();
        let mut b1 = make_job("b1", 2);
        b1.module = "beta".to_string();

        // Plenty of capacity; the one-per-module rule is what limits.
        let nodes = vec![make_node("n1", 16.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::FairShare);

        let placements = select(&mut engine, &[a1, a2, b1], &nodes);
        let ids: Vec<&str> = placements.iter().map(|p| p.job_id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1"]);
    }

    #[test]
    fn fair_share_fifo_within_module() {
        let mut a2 = make_job("a2", 5);
        a2.module = "alpha".to_string();
        let mut a1 = make_job("a1", 2);
        a1.module = "alpha".to_string();

        let nodes = vec![make_node("n1", 16.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::FairShare);

        // Passed out of order; seq decides.
        let placements = select(&mut engine, &[a2, a1], &nodes);
        assert_eq!(placements[0].job_id, "a1");
    }

    #[test]
    fn round_robin_cursor_persists_across_ticks() {
        let jobs = vec![make_job("a", 0), make_job("b", 1), make_job("c", 2)];
        let nodes = vec![make_node("n1", 2.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::RoundRobin);

        // Tick 1: cursor 0 → "a".
        let p1 = select(&mut engine, &jobs, &nodes);
        assert_eq!(p1[0].job_id, "a");

        // "a" leaves the queue; cursor advanced by 1.
        let remaining = vec![jobs[1].clone(), jobs[2].clone()];
        let p2 = select(&mut engine, &remaining, &nodes);
        assert_eq!(p2.len(), 1);
        // Cursor 1 into ["b", "c"] → "c".
        assert_eq!(p2[0].job_id, "c");

        let last = vec![jobs[1].clone()];
        let p3 = select(&mut engine, &last, &nodes);
        assert_eq!(p3[0].job_id, "b");
    }

    #[test]
    fn round_robin_serves_low_priority_eventually() {
        let mut starved = make_job("starved", 0);
        starved.priority = 1;
        let mut loud = make_job("loud", 1);
        loud.priority = 10;

        let nodes = vec![make_node("n1", 2.0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::RoundRobin);

        // Priority is ignored; queue position decides.
        let placements = select(&mut engine, &[starved, loud], &nodes);
        assert_eq!(placements[0].job_id, "starved");
    }

    #[test]
    fn cost_optimized_picks_cheapest_node_per_job() {
        let cheap = make_node("cheap", 8.0).with_cost(0.05);
        let pricey = make_node("pricey", 8.0).with_cost(0.90);

        let jobs = vec![make_job("a", 0)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::CostOptimized);

        let placements = select(&mut engine, &jobs, &[cheap, pricey]);
        assert_eq!(placements[0].node_id, "cheap");
    }

    #[test]
    fn cost_optimized_overflows_to_pricier_node() {
        let cheap = make_node("cheap", 2.0).with_cost(0.05);
        let pricey = make_node("pricey", 8.0).with_cost(0.90);

        let jobs = vec![make_job("a", 0), make_job("b", 1)];
        let mut engine = PolicyEngine::new(SchedulingPolicy::CostOptimized);

        let placements = select(&mut engine, &jobs, &[cheap, pricey]);
        assert_eq!(placements.len(), 2);
        assert_eq!(placements[0].node_id, "cheap");
        assert_eq!(placements[1].node_id, "pricey");
    }

    #[test]
    fn policy_names_are_stable() {
        assert_eq!(SchedulingPolicy::FairShare.as_str(), "fair_share");
        assert_eq!(
            SchedulingPolicy::ShortestJobFirst.to_string(),
            "shortest_job_first"
        );
    }
}
