//! Node selection for a single job.
//!
//! Feasibility is [`ResourceNode::can_fit`]; these helpers rank the
//! feasible candidates. Both are deterministic: score ties break on
//! node id so repeated runs over the same pool pick the same node.

use granger_core::{Job, ResourceNode};

/// Pick the feasible node with the most free headroom (load spreading).
///
/// Returns an index into `nodes`, or `None` when no node fits.
pub fn spread_node(job: &Job, nodes: &[ResourceNode]) -> Option<usize> {
    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.can_fit(&job.requirements))
        .max_by(|(_, a), (_, b)| {
            a.headroom()
                .partial_cmp(&b.headroom())
                .unwrap_or(std::cmp::Ordering::Equal)
                // max_by keeps the later of equal elements; compare ids
                // reversed so the lexicographically smallest id wins.
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|(i, _)| i)
}

/// Pick the feasible node minimizing `cost_per_second * estimated_duration`.
///
/// A job's own `cost_per_second`, when set, is a ceiling: nodes charging
/// more are not considered. Equal-cost ties prefer the node with the most
/// free headroom, then the smallest node id.
pub fn cheapest_node(job: &Job, nodes: &[ResourceNode]) -> Option<usize> {
    let duration = job.estimated_duration.unwrap_or(1.0);

    nodes
        .iter()
        .enumerate()
        .filter(|(_, n)| n.can_fit(&job.requirements))
        .filter(|(_, n)| {
            job.cost_per_second
                .is_none_or(|ceiling| n.cost_per_second <= ceiling)
        })
        .min_by(|(_, a), (_, b)| {
            let cost_a = a.cost_per_second * duration;
            let cost_b = b.cost_per_second * duration;
            cost_a
                .partial_cmp(&cost_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| {
                    b.headroom()
                        .partial_cmp(&a.headroom())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;
    use granger_core::{JobStatus, ResourceCapacity, ResourceRequirements};

    fn make_node(id: &str, cpu: f64, cost: f64) -> ResourceNode {
        ResourceNode::new(
            id,
            ResourceCapacity {
                cpu_cores: cpu,
                memory_mb: 8192,
                ..Default::default()
            },
        )
        .with_cost(cost)
    }

    fn make_job(cpu: f64) -> Job {
        Job {
            id: "j1".to_string(),
            module: "test".to_string(),
            priority: 5,
            deadline: None,
            requirements: ResourceRequirements::new().cpu(cpu).memory(1024),
            estimated_duration: Some(10.0),
            cost_per_second: None,
            status: JobStatus::Queued,
            assigned_node: None,
            submitted_at: 0,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            failure_reason: None,
            preemptions: 0,
            deadline_boosted: false,
            generation: 0,
            seq: 0,
        }
    }

    #[test]
    fn spread_prefers_emptier_node() {
        let mut busy = make_node("busy", 8.0, 1.0);
        busy.reserve(&ResourceRequirements::new().cpu(6.0).memory(4096))
            .unwrap();
        let idle = make_node("idle", 8.0, 1.0);

        let nodes = vec![busy, idle];
        assert_eq!(spread_node(&make_job(1.0), &nodes), Some(1));
    }

    #[test]
    fn spread_returns_none_when_nothing_fits() {
        let nodes = vec![make_node("n1", 2.0, 1.0)];
        assert_eq!(spread_node(&make_job(4.0), &nodes), None);
    }

    #[test]
    fn spread_ties_break_on_node_id() {
        let nodes = vec![make_node("b", 4.0, 1.0), make_node("a", 4.0, 1.0)];
        // Identical headroom; "a" wins.
        assert_eq!(spread_node(&make_job(1.0), &nodes), Some(1));
    }

    #[test]
    fn cheapest_minimizes_cost_times_duration() {
        let nodes = vec![
            make_node("pricey", 8.0, 0.50),
            make_node("cheap", 8.0, 0.10),
        ];
        assert_eq!(cheapest_node(&make_job(1.0), &nodes), Some(1));
    }

    #[test]
    fn cheapest_respects_job_rate_ceiling() {
        let nodes = vec![make_node("pricey", 8.0, 0.50)];
        let mut job = make_job(1.0);
        job.cost_per_second = Some(0.25);
        assert_eq!(cheapest_node(&job, &nodes), None);

        job.cost_per_second = Some(0.50);
        assert_eq!(cheapest_node(&job, &nodes), Some(0));
    }

    #[test]
    fn cheapest_equal_cost_prefers_headroom() {
        let mut busy = make_node("busy", 8.0, 0.10);
        busy.reserve(&ResourceRequirements::new().cpu(4.0).memory(1024))
            .unwrap();
        let idle = make_node("idle", 8.0, 0.10);

        let nodes = vec![busy, idle];
        assert_eq!(cheapest_node(&make_job(1.0), &nodes), Some(1));
    }

    #[test]
    fn cheapest_skips_infeasible_cheap_node() {
        let nodes = vec![
            make_node("cheap-small", 0.5, 0.01),
            make_node("big", 8.0, 0.50),
        ];
        assert_eq!(cheapest_node(&make_job(2.0), &nodes), Some(1));
    }
}
