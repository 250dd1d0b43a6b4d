//! grangerd — the Granger scheduler daemon.
//!
//! Assembles the scheduler subsystems and drives a TOML scenario:
//! - Resource monitor (fed allocation-derived utilization)
//! - Resource scheduler + tick loop
//! - One real async worker per started job (sleeps the job's estimated
//!   duration, honors the cancellation token, reports completion)
//!
//! # Usage
//!
//! ```text
//! grangerd run --scenario scenarios/smoke.toml --max-ticks 600
//! ```
//!
//! Exits when every job in the scenario is terminal, dumping final stats
//! as JSON on stdout.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::{Parser, Subcommand};
use serde::Deserialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use granger_core::{ResourceCapacity, ResourceNode, UtilizationSnapshot};
use granger_monitor::{ReportedProbe, ResourceMonitor, UtilizationProbe};
use granger_scheduler::{
    EventSink, JobSpec, ResourceScheduler, SchedulerConfig, StartedJob, TickReport, WorkerOutcome,
};

#[derive(Parser)]
#[command(name = "grangerd", about = "Granger scheduler daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a scenario file to completion.
    Run {
        /// Path to the scenario TOML (scheduler config + nodes + jobs).
        #[arg(long)]
        scenario: PathBuf,

        /// Abort after this many ticks even if jobs remain.
        #[arg(long, default_value = "600")]
        max_ticks: u64,
    },
}

/// A scenario: scheduler configuration plus the node pool and workload.
#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default)]
    scheduler: SchedulerConfig,
    nodes: Vec<NodeSpec>,
    jobs: Vec<JobSpec>,
}

#[derive(Debug, Deserialize)]
struct NodeSpec {
    id: String,
    capacity: ResourceCapacity,
    #[serde(default)]
    cost_per_second: f64,
}

impl Scenario {
    fn load(path: &PathBuf) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }
}

/// Forwards started jobs out of the tick into the worker spawner task.
struct WorkerSpawner {
    tx: mpsc::UnboundedSender<StartedJob>,
}

impl EventSink for WorkerSpawner {
    fn on_tick(&self, report: &TickReport) {
        for started in &report.started {
            let _ = self.tx.send(started.clone());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,grangerd=debug,granger=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            scenario,
            max_ticks,
        } => run_scenario(&scenario, max_ticks).await,
    }
}

async fn run_scenario(path: &PathBuf, max_ticks: u64) -> anyhow::Result<()> {
    let scenario = Scenario::load(path)?;
    info!(
        nodes = scenario.nodes.len(),
        jobs = scenario.jobs.len(),
        policy = %scenario.scheduler.policy,
        "scenario loaded"
    );

    // ── Assemble subsystems ────────────────────────────────────────

    let probe = Arc::new(ReportedProbe::new());
    let probe_dyn: Arc<dyn UtilizationProbe> = probe.clone();
    let monitor = Arc::new(ResourceMonitor::new(
        probe_dyn,
        scenario.scheduler.monitor_config(),
    ));

    let (started_tx, mut started_rx) = mpsc::unbounded_channel();
    let scheduler = Arc::new(
        ResourceScheduler::new(scenario.scheduler.clone(), monitor.clone())
            .with_sink(Arc::new(WorkerSpawner { tx: started_tx })),
    );

    for spec in &scenario.nodes {
        // Seed a reading so the node is reachable from the first tick.
        probe.report(&spec.id, UtilizationSnapshot::zeroed(epoch_secs()));
        scheduler
            .add_node(
                ResourceNode::new(spec.id.clone(), spec.capacity).with_cost(spec.cost_per_second),
            )
            .await?;
    }

    let mut job_ids = Vec::with_capacity(scenario.jobs.len());
    for spec in scenario.jobs {
        job_ids.push(scheduler.submit_job(spec).await?);
    }

    // ── Background tasks ───────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let monitor_handle = {
        let monitor = monitor.clone();
        let rx = shutdown_rx.clone();
        tokio::spawn(async move { monitor.run(rx).await })
    };

    // Worker spawner: one real async worker per started job.
    let worker_scheduler = scheduler.clone();
    let spawner_handle = tokio::spawn(async move {
        while let Some(started) = started_rx.recv().await {
            tokio::spawn(run_worker(worker_scheduler.clone(), started));
        }
    });

    // Utilization publisher: report allocation-derived usage per node so
    // the monitor sees live readings.
    let publisher_handle = {
        let scheduler = scheduler.clone();
        let probe = probe.clone();
        let mut rx = shutdown_rx.clone();
        let interval = Duration::from_millis(scheduler.config().monitor_interval_ms);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        publish_utilization(&scheduler, &probe).await;
                    }
                    _ = rx.changed() => break,
                }
            }
        })
    };

    scheduler.start().await?;

    // ── Drive to completion ────────────────────────────────────────

    let tick_interval = scheduler.config().tick_interval();
    let outcome = tokio::select! {
        result = wait_for_completion(&scheduler, &job_ids, max_ticks, tick_interval) => result,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, shutting down");
            Err(anyhow::anyhow!("interrupted"))
        }
    };

    scheduler.stop().await;
    let _ = shutdown_tx.send(true);
    let _ = monitor_handle.await;
    let _ = publisher_handle.await;
    // The spawner holds a scheduler handle, so its channel never closes
    // on its own once we are done with it.
    spawner_handle.abort();

    let stats = match &outcome {
        Ok(stats) => stats.clone(),
        Err(_) => return outcome.map(|_| ()),
    };
    println!("{}", serde_json::to_string_pretty(&stats)?);
    info!(
        completed = stats.completed_jobs,
        failed = stats.failed_jobs,
        ticks = stats.ticks,
        "scenario finished"
    );
    Ok(())
}

/// Poll until every scenario job is terminal (or the tick budget runs out).
async fn wait_for_completion(
    scheduler: &ResourceScheduler,
    job_ids: &[String],
    max_ticks: u64,
    tick_interval: Duration,
) -> anyhow::Result<granger_scheduler::SchedulerStats> {
    loop {
        tokio::time::sleep(tick_interval).await;
        let stats = scheduler.get_scheduler_stats().await;
        if stats.ticks >= max_ticks {
            warn!(ticks = stats.ticks, "tick budget exhausted");
            return Ok(stats);
        }

        let mut all_terminal = true;
        for id in job_ids {
            match scheduler.get_job(id).await {
                Some(job) if !job.status.is_terminal() => {
                    all_terminal = false;
                    break;
                }
                _ => {}
            }
        }
        if all_terminal {
            return Ok(scheduler.get_scheduler_stats().await);
        }
    }
}

/// One worker: sleep the estimated duration, stop early if cancelled.
async fn run_worker(scheduler: Arc<ResourceScheduler>, started: StartedJob) {
    let Some(job) = scheduler.get_job(&started.job_id).await else {
        return;
    };
    let duration = Duration::from_secs_f64(job.estimated_duration.unwrap_or(1.0));
    let sender = scheduler.completion_sender();

    match scheduler.cancellation_token(&started.job_id).await {
        Some(mut cancelled) => {
            tokio::select! {
                _ = tokio::time::sleep(duration) => {
                    sender.report(&started.job_id, started.generation, WorkerOutcome::Completed);
                }
                _ = cancelled.changed() => {
                    debug!(job_id = %started.job_id, "worker stopped cooperatively");
                }
            }
        }
        // Token already gone: the placement was superseded before the
        // worker came up; any report would be discarded as stale anyway.
        None => {
            debug!(job_id = %started.job_id, "placement superseded before worker start");
        }
    }
}

/// Derive per-node utilization from the scheduler's own accounting and
/// feed it to the probe, heartbeat-style.
async fn publish_utilization(scheduler: &ResourceScheduler, probe: &ReportedProbe) {
    let stats = scheduler.get_scheduler_stats().await;
    let now = epoch_secs();
    for node in &stats.nodes {
        let cpu_percent = if node.cpu_total > 0.0 {
            (node.cpu_allocated / node.cpu_total) * 100.0
        } else {
            0.0
        };
        probe.report(
            &node.node_id,
            UtilizationSnapshot {
                cpu_percent,
                memory_mb: node.memory_allocated_mb,
                disk_io_mbps: 0.0,
                network_mbps: 0.0,
                timestamp: now,
            },
        );
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke_scenario_parses() {
        let scenario: Scenario =
            toml::from_str(include_str!("../scenarios/smoke.toml")).unwrap();
        assert!(!scenario.nodes.is_empty());
        assert!(!scenario.jobs.is_empty());
    }

    #[test]
    fn minimal_scenario_fills_defaults() {
        let scenario: Scenario = toml::from_str(
            r#"
            [[nodes]]
            id = "n1"
            capacity = { cpu_cores = 4.0, memory_mb = 8192 }

            [[jobs]]
            module = "ingest"
            "#,
        )
        .unwrap();

        assert_eq!(scenario.scheduler.tick_interval_ms, 1000);
        assert_eq!(scenario.jobs[0].priority, 5);
        assert_eq!(scenario.nodes[0].cost_per_second, 0.0);
    }

    #[test]
    fn scenario_with_deadline_parses() {
        let scenario: Scenario = toml::from_str(
            r#"
            [[nodes]]
            id = "n1"
            capacity = { cpu_cores = 2.0, memory_mb = 4096 }

            [[jobs]]
            module = "report"
            priority = 8
            estimated_duration = 2.5
            deadline = { in = 120 }
            "#,
        )
        .unwrap();

        assert!(scenario.jobs[0].deadline.is_some());
        assert_eq!(scenario.jobs[0].estimated_duration, Some(2.5));
    }
}
