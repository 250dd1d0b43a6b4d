//! The resource scheduler — owns the job queue and node pool.
//!
//! All Job/Node mutation happens inside [`ResourceScheduler::tick`], which
//! holds the single write lock over the core. Control operations
//! (pause/resume/cancel) validate synchronously, then enqueue an intent
//! that the next tick applies — callers get an at-least-one-tick latency
//! guarantee, not synchronous application. Workers never touch the core:
//! they report through the completion channel, drained at the start of
//! every tick, and each report carries the job's generation so reports
//! from a superseded placement are discarded.
//!
//! Tick order: worker reports → control commands → deferred resumes →
//! deadline expiry and boosting → reachability reconciliation → policy
//! selection → preemption for unplaced higher-priority work → stats +
//! event sink.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use granger_core::{
    Deadline, FailureReason, Job, JobId, JobStatus, NodeId, ResourceCapacity, ResourceNode,
    ResourceRequirements,
};
use granger_monitor::ResourceMonitor;
use granger_policy::PolicyEngine;

use crate::config::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{EventSink, NullSink, StartedJob, TickReport};
use crate::stats::{DimensionUtilization, NodeStats, SchedulerStats};

/// A job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub module: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
    #[serde(default)]
    pub deadline: Option<Deadline>,
    #[serde(default)]
    pub requirements: ResourceRequirements,
    #[serde(default)]
    pub estimated_duration: Option<f64>,
    #[serde(default)]
    pub cost_per_second: Option<f64>,
}

fn default_priority() -> u8 {
    5
}

impl JobSpec {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            priority: default_priority(),
            deadline: None,
            requirements: ResourceRequirements::default(),
            estimated_duration: None,
            cost_per_second: None,
        }
    }

    pub fn priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    pub fn deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn requirements(mut self, requirements: ResourceRequirements) -> Self {
        self.requirements = requirements;
        self
    }

    pub fn estimated_duration(mut self, seconds: f64) -> Self {
        self.estimated_duration = Some(seconds);
        self
    }

    pub fn cost_per_second(mut self, rate: f64) -> Self {
        self.cost_per_second = Some(rate);
        self
    }
}

/// What a worker reports back about its job.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerOutcome {
    Completed,
    Failed(String),
    Progress(f64),
}

/// A worker report, matched against the job's current generation.
#[derive(Debug, Clone)]
pub struct WorkerReport {
    pub job_id: JobId,
    pub generation: u64,
    pub outcome: WorkerOutcome,
}

/// Cloneable handle workers use to report outcomes.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<WorkerReport>,
}

impl CompletionSender {
    /// Send a report. A report for a dead scheduler is silently dropped;
    /// the worker has nothing useful to do about it.
    pub fn report(&self, job_id: impl Into<JobId>, generation: u64, outcome: WorkerOutcome) {
        let _ = self.tx.send(WorkerReport {
            job_id: job_id.into(),
            generation,
            outcome,
        });
    }
}

/// Control intents applied at the start of the next tick.
#[derive(Debug)]
enum Command {
    Pause(JobId),
    Resume(JobId),
    Cancel(JobId),
}

/// Scheduler state guarded by the core lock.
struct Core {
    jobs: HashMap<JobId, Job>,
    nodes: HashMap<NodeId, ResourceNode>,
    engine: PolicyEngine,
    /// Resumes waiting for capacity on the job's node.
    pending_resumes: Vec<JobId>,
    /// Cooperative cancellation signals, one per running worker.
    cancel_tokens: HashMap<JobId, watch::Sender<bool>>,
    selections: HashMap<String, u64>,
    preemptions: u64,
    deadline_boosts: u64,
    ticks: u64,
}

struct LoopHandle {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// The scheduler. See the module docs for the concurrency model.
pub struct ResourceScheduler {
    config: SchedulerConfig,
    monitor: Arc<ResourceMonitor>,
    sink: Arc<dyn EventSink>,
    core: RwLock<Core>,
    commands: Mutex<VecDeque<Command>>,
    reports_tx: mpsc::UnboundedSender<WorkerReport>,
    reports_rx: Mutex<mpsc::UnboundedReceiver<WorkerReport>>,
    next_job: AtomicU64,
    loop_ctl: Mutex<Option<LoopHandle>>,
}

impl ResourceScheduler {
    pub fn new(config: SchedulerConfig, monitor: Arc<ResourceMonitor>) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        let engine = PolicyEngine::new(config.policy);
        Self {
            config,
            monitor,
            sink: Arc::new(NullSink),
            core: RwLock::new(Core {
                jobs: HashMap::new(),
                nodes: HashMap::new(),
                engine,
                pending_resumes: Vec::new(),
                cancel_tokens: HashMap::new(),
                selections: HashMap::new(),
                preemptions: 0,
                deadline_boosts: 0,
                ticks: 0,
            }),
            commands: Mutex::new(VecDeque::new()),
            reports_tx,
            reports_rx: Mutex::new(reports_rx),
            next_job: AtomicU64::new(1),
            loop_ctl: Mutex::new(None),
        }
    }

    /// Replace the event sink (default discards reports).
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    // ── Job control surface ─────────────────────────────────────────

    /// Validate and enqueue a job. Returns the generated job id.
    pub async fn submit_job(&self, spec: JobSpec) -> SchedulerResult<JobId> {
        if !(granger_core::job::MIN_PRIORITY..=granger_core::job::MAX_PRIORITY)
            .contains(&spec.priority)
        {
            return Err(SchedulerError::InvalidJobSpec {
                reason: format!("priority must be 1-10, got {}", spec.priority),
            });
        }
        spec.requirements
            .validate()
            .map_err(|reason| SchedulerError::InvalidJobSpec { reason })?;
        if let Some(d) = spec.estimated_duration {
            if !(d > 0.0) || !d.is_finite() {
                return Err(SchedulerError::InvalidJobSpec {
                    reason: format!("estimated_duration must be positive, got {d}"),
                });
            }
        }
        if let Some(c) = spec.cost_per_second {
            if c < 0.0 || !c.is_finite() {
                return Err(SchedulerError::InvalidJobSpec {
                    reason: format!("cost_per_second must be non-negative, got {c}"),
                });
            }
        }

        let now = epoch_secs();
        let seq = self.next_job.fetch_add(1, Ordering::Relaxed);
        let job_id = format!("job-{seq:06}");

        let job = Job {
            id: job_id.clone(),
            module: spec.module,
            priority: spec.priority,
            deadline: spec.deadline.map(|d| d.resolve(now)),
            requirements: spec.requirements,
            estimated_duration: spec.estimated_duration,
            cost_per_second: spec.cost_per_second,
            status: JobStatus::Queued,
            assigned_node: None,
            submitted_at: now,
            started_at: None,
            completed_at: None,
            progress: 0.0,
            failure_reason: None,
            preemptions: 0,
            deadline_boosted: false,
            generation: 0,
            seq,
        };

        let mut core = self.core.write().await;
        info!(%job_id, module = %job.module, priority = job.priority, "job submitted");
        core.jobs.insert(job_id.clone(), job);
        Ok(job_id)
    }

    /// Request a pause. Valid only for RUNNING jobs; applied next tick,
    /// releasing the job's node capacity.
    pub async fn pause_job(&self, job_id: &str) -> SchedulerResult<()> {
        self.enqueue_checked(job_id, JobStatus::Paused, Command::Pause(job_id.to_string()))
            .await
    }

    /// Request a resume. Valid only for PAUSED jobs; applied next tick,
    /// re-reserving capacity on the assigned node (deferred and retried
    /// if the node is momentarily full).
    pub async fn resume_job(&self, job_id: &str) -> SchedulerResult<()> {
        self.enqueue_checked(job_id, JobStatus::Running, Command::Resume(job_id.to_string()))
            .await
    }

    /// Request a cancel. Valid from QUEUED, RUNNING, PAUSED or MIGRATING;
    /// the job transitions to FAILED(cancelled) on the next tick, its
    /// capacity is reclaimed, and its worker is signalled to stop. The
    /// scheduler does not wait for the worker.
    pub async fn cancel_job(&self, job_id: &str) -> SchedulerResult<()> {
        self.enqueue_checked(job_id, JobStatus::Failed, Command::Cancel(job_id.to_string()))
            .await
    }

    /// Validate that `to` is currently a legal transition for the job,
    /// then queue the command for the next tick.
    async fn enqueue_checked(
        &self,
        job_id: &str,
        to: JobStatus,
        command: Command,
    ) -> SchedulerResult<()> {
        {
            let core = self.core.read().await;
            let job = core
                .jobs
                .get(job_id)
                .ok_or_else(|| SchedulerError::JobNotFound(job_id.to_string()))?;
            // Dry-run the transition on a scratch copy so the validation
            // shares the state machine's edge table exactly.
            let mut probe = job.clone();
            probe.transition(to, 0)?;
        }
        let mut commands = self.commands.lock().await;
        commands.push_back(command);
        Ok(())
    }

    // ── Node pool management ────────────────────────────────────────

    /// Add a node to the pool and register it with the monitor.
    pub async fn add_node(&self, node: ResourceNode) -> SchedulerResult<()> {
        let node_id = node.id.clone();
        {
            let mut core = self.core.write().await;
            if core.nodes.contains_key(&node_id) {
                return Err(SchedulerError::NodeExists(node_id));
            }
            core.nodes.insert(node_id.clone(), node);
        }
        self.monitor.register_node(&node_id).await;
        info!(node = %node_id, "node added to pool");
        Ok(())
    }

    /// Remove a node. Jobs assigned to it fail with `node_unreachable`.
    pub async fn remove_node(&self, node_id: &str) -> SchedulerResult<()> {
        let now = epoch_secs();
        {
            let mut core = self.core.write().await;
            if !core.nodes.contains_key(node_id) {
                return Err(SchedulerError::NodeNotFound(node_id.to_string()));
            }
            let victims: Vec<JobId> = core
                .jobs
                .values()
                .filter(|j| {
                    matches!(
                        j.status,
                        JobStatus::Running | JobStatus::Paused | JobStatus::Migrating
                    ) && j.assigned_node.as_deref() == Some(node_id)
                })
                .map(|j| j.id.clone())
                .collect();
            for id in victims {
                fail_with(&mut core, &id, FailureReason::NodeUnreachable, now);
            }
            core.nodes.remove(node_id);
        }
        self.monitor.unregister_node(&node_id.to_string()).await;
        info!(node = %node_id, "node removed from pool");
        Ok(())
    }

    /// Mark a node draining: running jobs finish, but no new placements.
    pub async fn drain_node(&self, node_id: &str) -> SchedulerResult<()> {
        let mut core = self.core.write().await;
        let node = core
            .nodes
            .get_mut(node_id)
            .ok_or_else(|| SchedulerError::NodeNotFound(node_id.to_string()))?;
        node.draining = true;
        info!(node = %node_id, "node draining");
        Ok(())
    }

    // ── Read surface ────────────────────────────────────────────────

    pub async fn get_job(&self, job_id: &str) -> Option<Job> {
        let core = self.core.read().await;
        core.jobs.get(job_id).cloned()
    }

    pub async fn list_jobs(&self) -> Vec<Job> {
        let core = self.core.read().await;
        let mut jobs: Vec<Job> = core.jobs.values().cloned().collect();
        jobs.sort_by_key(|j| j.seq);
        jobs
    }

    pub async fn list_nodes(&self) -> Vec<ResourceNode> {
        let core = self.core.read().await;
        let mut nodes: Vec<ResourceNode> = core.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.id.cmp(&b.id));
        nodes
    }

    /// Best-effort snapshot; side-effect free and never errors.
    pub async fn get_scheduler_stats(&self) -> SchedulerStats {
        let core = self.core.read().await;
        build_stats(&core)
    }

    // ── Worker integration ──────────────────────────────────────────

    /// Handle workers use to report completion/failure/progress.
    pub fn completion_sender(&self) -> CompletionSender {
        CompletionSender {
            tx: self.reports_tx.clone(),
        }
    }

    /// Cooperative cancellation token for a running job's worker. Flips
    /// to `true` when the job is cancelled or preempted.
    pub async fn cancellation_token(&self, job_id: &str) -> Option<watch::Receiver<bool>> {
        let core = self.core.read().await;
        core.cancel_tokens.get(job_id).map(|tx| tx.subscribe())
    }

    // ── Scheduling loop ─────────────────────────────────────────────

    /// Spawn the periodic tick loop.
    pub async fn start(self: &Arc<Self>) -> SchedulerResult<()> {
        let mut ctl = self.loop_ctl.lock().await;
        if ctl.is_some() {
            return Err(SchedulerError::AlreadyStarted);
        }
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let this = Arc::clone(self);
        let interval = self.config.tick_interval();
        let handle = tokio::spawn(async move {
            info!(interval_ms = interval.as_millis() as u64, "scheduler loop started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        this.tick().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("scheduler loop stopping");
                        break;
                    }
                }
            }
        });
        *ctl = Some(LoopHandle {
            shutdown_tx,
            handle,
        });
        Ok(())
    }

    /// Stop the tick loop. Idempotent; a never-started scheduler is a
    /// no-op.
    pub async fn stop(&self) {
        let mut ctl = self.loop_ctl.lock().await;
        if let Some(LoopHandle {
            shutdown_tx,
            handle,
        }) = ctl.take()
        {
            let _ = shutdown_tx.send(true);
            let _ = handle.await;
            info!("scheduler stopped");
        }
    }

    /// One scheduling iteration. Public so embedders and tests can drive
    /// the scheduler deterministically without the timer loop.
    pub async fn tick(&self) {
        let now = epoch_secs();

        // Monitor views are gathered before the core lock; a slow or
        // failing monitor degrades the tick, never blocks it.
        let unreachable: HashSet<NodeId> =
            self.monitor.unreachable_nodes().await.into_iter().collect();
        let mut saturating: HashSet<NodeId> = HashSet::new();
        for node_id in self.monitor.registered_nodes().await {
            if self.monitor.is_saturating(&node_id).await {
                saturating.insert(node_id);
            }
        }

        let mut core = self.core.write().await;
        core.ticks += 1;
        let mut report = TickReport::new(core.ticks);

        self.drain_worker_reports(&mut core, now, &mut report).await;
        self.apply_commands(&mut core, now, &mut report).await;
        apply_pending_resumes(&mut core, now);
        expire_deadlines(&mut core, now, &mut report);
        boost_urgent(
            &mut core,
            now,
            self.config.urgency_threshold_secs,
            self.config.urgency_boost,
            &mut report,
        );
        reconcile_reachability(&mut core, &unreachable, now, &mut report);
        run_selection(&mut core, now, &saturating, &mut report);
        preempt_for_unplaced(
            &mut core,
            now,
            &saturating,
            self.config.max_preemptions,
            &mut report,
        );

        report.stats = build_stats(&core);
        drop(core);

        self.sink.on_tick(&report);
    }

    /// Apply queued worker reports. Reports for unknown jobs, non-running
    /// jobs, or superseded generations are discarded: a worker that
    /// finished after its capacity was reassigned must not double-count.
    async fn drain_worker_reports(&self, core: &mut Core, now: u64, report: &mut TickReport) {
        let mut rx = self.reports_rx.lock().await;
        while let Ok(msg) = rx.try_recv() {
            let Core {
                jobs,
                nodes,
                cancel_tokens,
                ..
            } = &mut *core;
            let Some(job) = jobs.get_mut(&msg.job_id) else {
                debug!(job_id = %msg.job_id, "report for unknown job ignored");
                continue;
            };
            if job.status != JobStatus::Running || job.generation != msg.generation {
                debug!(
                    job_id = %msg.job_id,
                    report_generation = msg.generation,
                    job_generation = job.generation,
                    status = ?job.status,
                    "stale worker report ignored"
                );
                continue;
            }
            match msg.outcome {
                WorkerOutcome::Progress(p) => {
                    job.progress = p.clamp(0.0, 1.0);
                }
                WorkerOutcome::Completed => {
                    if job.transition(JobStatus::Completed, now).is_ok() {
                        release_assigned(nodes, job);
                        cancel_tokens.remove(&msg.job_id);
                        info!(job_id = %msg.job_id, "job completed");
                        report.completed.push(msg.job_id.clone());
                    }
                }
                WorkerOutcome::Failed(err) => {
                    let reason = FailureReason::Execution(err);
                    if job.fail(reason.clone(), now).is_ok() {
                        release_assigned(nodes, job);
                        cancel_tokens.remove(&msg.job_id);
                        warn!(job_id = %msg.job_id, reason = %reason, "job failed");
                        report.failed.push((msg.job_id.clone(), reason));
                    }
                }
            }
        }
    }

    /// Apply queued control commands. A command that raced with a
    /// terminal transition since validation is dropped with a debug log.
    async fn apply_commands(&self, core: &mut Core, now: u64, report: &mut TickReport) {
        let commands: Vec<Command> = {
            let mut queue = self.commands.lock().await;
            queue.drain(..).collect()
        };
        for command in commands {
            match command {
                Command::Pause(job_id) => {
                    let Core { jobs, nodes, .. } = &mut *core;
                    let Some(job) = jobs.get_mut(&job_id) else {
                        continue;
                    };
                    match job.transition(JobStatus::Paused, now) {
                        Ok(()) => {
                            release_assigned(nodes, job);
                            info!(%job_id, "job paused");
                        }
                        Err(e) => debug!(%job_id, error = %e, "pause no longer applicable"),
                    }
                }
                Command::Resume(job_id) => {
                    if !core.pending_resumes.contains(&job_id) {
                        core.pending_resumes.push(job_id);
                    }
                }
                Command::Cancel(job_id) => {
                    if fail_with(core, &job_id, FailureReason::Cancelled, now) {
                        info!(%job_id, "job cancelled");
                        report.failed.push((job_id, FailureReason::Cancelled));
                    }
                }
            }
        }
    }
}

// ── Tick phases ─────────────────────────────────────────────────────

/// Retry deferred resumes. A resume stays pending while its node lacks
/// capacity (PAUSED→QUEUED is not a legal edge, so the job waits paused).
fn apply_pending_resumes(core: &mut Core, now: u64) {
    let pending = std::mem::take(&mut core.pending_resumes);
    let mut still_pending = Vec::new();
    for job_id in pending {
        let Core { jobs, nodes, .. } = &mut *core;
        let Some(job) = jobs.get_mut(&job_id) else {
            continue;
        };
        if job.status != JobStatus::Paused {
            debug!(%job_id, status = ?job.status, "resume no longer applicable");
            continue;
        }
        let Some(node_id) = job.assigned_node.clone() else {
            continue;
        };
        let Some(node) = nodes.get_mut(&node_id) else {
            debug!(%job_id, node = %node_id, "resume dropped, node gone");
            continue;
        };
        match node.reserve(&job.requirements) {
            Ok(()) => {
                if job.transition(JobStatus::Running, now).is_ok() {
                    info!(%job_id, node = %node_id, "job resumed");
                } else {
                    node.release(&job.requirements);
                }
            }
            Err(e) => {
                warn!(%job_id, node = %node_id, error = %e, "resume deferred, insufficient capacity");
                still_pending.push(job_id);
            }
        }
    }
    core.pending_resumes = still_pending;
}

/// Fail every non-terminal job whose absolute deadline has passed.
fn expire_deadlines(core: &mut Core, now: u64, report: &mut TickReport) {
    let expired: Vec<JobId> = core
        .jobs
        .values()
        .filter(|j| !j.status.is_terminal() && j.deadline_expired(now))
        .map(|j| j.id.clone())
        .collect();
    for job_id in expired {
        if fail_with(core, &job_id, FailureReason::DeadlineExpired, now) {
            warn!(%job_id, "deadline expired");
            report.failed.push((job_id, FailureReason::DeadlineExpired));
        }
    }
}

/// Boost QUEUED jobs inside the urgency window. `Job::boost_priority`
/// is idempotent, so re-checking every tick is safe.
fn boost_urgent(core: &mut Core, now: u64, threshold_secs: u64, boost: u8, report: &mut TickReport) {
    let Core {
        jobs,
        deadline_boosts,
        ..
    } = core;
    for job in jobs.values_mut() {
        if job.status != JobStatus::Queued {
            continue;
        }
        let Some(remaining) = job.time_to_deadline(now) else {
            continue;
        };
        if remaining <= threshold_secs && job.boost_priority(boost) {
            *deadline_boosts += 1;
            debug!(job_id = %job.id, priority = job.priority, remaining, "deadline boost applied");
            report.boosted.push(job.id.clone());
        }
    }
}

/// Sync node reachability with the monitor and fail jobs stranded on
/// unreachable nodes.
fn reconcile_reachability(
    core: &mut Core,
    unreachable: &HashSet<NodeId>,
    now: u64,
    report: &mut TickReport,
) {
    for (node_id, node) in core.nodes.iter_mut() {
        let up = !unreachable.contains(node_id);
        if node.reachable && !up {
            node.reachable = false;
            warn!(node = %node_id, "node unreachable, failing its jobs");
        } else if !node.reachable && up {
            node.reachable = true;
            info!(node = %node_id, "node reachable again");
        }
    }

    let stranded: Vec<JobId> = core
        .jobs
        .values()
        .filter(|j| {
            matches!(
                j.status,
                JobStatus::Running | JobStatus::Paused | JobStatus::Migrating
            )
        })
        .filter(|j| {
            j.assigned_node
                .as_ref()
                .is_some_and(|n| unreachable.contains(n))
        })
        .map(|j| j.id.clone())
        .collect();
    for job_id in stranded {
        if fail_with(core, &job_id, FailureReason::NodeUnreachable, now) {
            report.failed.push((job_id, FailureReason::NodeUnreachable));
        }
    }
}

/// Run the active policy over the queue and apply its placements.
fn run_selection(core: &mut Core, now: u64, saturating: &HashSet<NodeId>, report: &mut TickReport) {
    let placements = {
        let Core {
            jobs,
            nodes,
            engine,
            ..
        } = &mut *core;
        let queued: Vec<&Job> = jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .collect();
        if queued.is_empty() {
            return;
        }
        let candidates: Vec<&ResourceNode> = nodes
            .values()
            .filter(|n| n.reachable && !n.draining && !saturating.contains(&n.id))
            .collect();
        engine.select(now, &queued, &candidates)
    };

    for placement in placements {
        start_job(core, &placement.job_id, &placement.node_id, now, true, report);
    }
}

/// Preempt for still-unplaced jobs that outrank a running victim.
///
/// One victim per contender per tick. Victims are chosen fewest
/// preemptions first, then most recently started (least completed work
/// lost), then latest submission; a victim at the preemption budget is
/// never chosen, which bounds thrashing.
fn preempt_for_unplaced(
    core: &mut Core,
    now: u64,
    saturating: &HashSet<NodeId>,
    max_preemptions: u32,
    report: &mut TickReport,
) {
    let mut contenders: Vec<(JobId, u8, u64)> = core
        .jobs
        .values()
        .filter(|j| j.status == JobStatus::Queued)
        .map(|j| (j.id.clone(), j.priority, j.seq))
        .collect();
    if contenders.is_empty() {
        return;
    }
    contenders.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));

    for (contender_id, contender_priority, _) in contenders {
        let requirements = match core.jobs.get(&contender_id) {
            Some(j) if j.status == JobStatus::Queued => j.requirements.clone(),
            _ => continue,
        };

        let Some((victim_id, node_id)) = find_victim(
            core,
            contender_priority,
            &requirements,
            saturating,
            max_preemptions,
        ) else {
            continue;
        };

        // Evict the victim.
        {
            let Core {
                jobs,
                nodes,
                cancel_tokens,
                preemptions,
                ..
            } = &mut *core;
            let Some(victim) = jobs.get_mut(&victim_id) else {
                continue;
            };
            if victim.transition(JobStatus::Migrating, now).is_err() {
                continue;
            }
            if let Some(node) = nodes.get_mut(&node_id) {
                node.release(&victim.requirements);
            }
            victim.preemptions += 1;
            victim.assigned_node = None;
            if let Some(tx) = cancel_tokens.remove(&victim_id) {
                let _ = tx.send(true);
            }
            *preemptions += 1;
            info!(
                victim = %victim_id,
                node = %node_id,
                job_id = %contender_id,
                "preempted lower-priority job"
            );
        }
        report.preempted.push(victim_id.clone());

        start_job(core, &contender_id, &node_id, now, true, report);
        relocate_victim(core, &victim_id, saturating, now, report);
    }
}

/// Find the best preemption victim that would make the contender fit.
fn find_victim(
    core: &Core,
    contender_priority: u8,
    requirements: &ResourceRequirements,
    saturating: &HashSet<NodeId>,
    max_preemptions: u32,
) -> Option<(JobId, NodeId)> {
    let mut best: Option<&Job> = None;
    for victim in core.jobs.values() {
        if victim.status != JobStatus::Running {
            continue;
        }
        if victim.priority >= contender_priority {
            continue;
        }
        if victim.preemptions >= max_preemptions {
            continue;
        }
        let Some(node_id) = &victim.assigned_node else {
            continue;
        };
        let Some(node) = core.nodes.get(node_id) else {
            continue;
        };
        if !node.reachable || node.draining || saturating.contains(node_id) {
            continue;
        }
        // Would the contender fit with this victim evicted?
        let mut sim = node.clone();
        sim.release(&victim.requirements);
        if !sim.can_fit(requirements) {
            continue;
        }

        let key = |j: &Job| {
            (
                j.preemptions,
                std::cmp::Reverse(j.started_at.unwrap_or(0)),
                std::cmp::Reverse(j.seq),
            )
        };
        best = match best {
            None => Some(victim),
            Some(current) if key(victim) < key(current) => Some(victim),
            keep => keep,
        };
    }
    best.and_then(|v| v.assigned_node.clone().map(|n| (v.id.clone(), n)))
}

/// Place a migrating victim on the best remaining node, or requeue it.
fn relocate_victim(
    core: &mut Core,
    victim_id: &JobId,
    saturating: &HashSet<NodeId>,
    now: u64,
    report: &mut TickReport,
) {
    let target: Option<NodeId> = {
        let Some(victim) = core.jobs.get(victim_id) else {
            return;
        };
        if victim.status != JobStatus::Migrating {
            return;
        }
        core.nodes
            .values()
            .filter(|n| n.reachable && !n.draining && !saturating.contains(&n.id))
            .filter(|n| n.can_fit(&victim.requirements))
            .max_by(|a, b| {
                a.headroom()
                    .partial_cmp(&b.headroom())
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|n| n.id.clone())
    };

    let migrated = match target {
        Some(node_id) => start_job(core, victim_id, &node_id, now, false, report),
        None => false,
    };

    if !migrated {
        if let Some(victim) = core.jobs.get_mut(victim_id) {
            if victim.transition(JobStatus::Queued, now).is_ok() {
                debug!(job_id = %victim_id, "no capacity for migration, job requeued");
            }
        }
    }
}

/// Reserve capacity and start (or restart) a job on a node.
///
/// Accepts QUEUED and MIGRATING jobs. `count_selection` attributes the
/// placement to the policy counter; migrations do not count.
fn start_job(
    core: &mut Core,
    job_id: &JobId,
    node_id: &NodeId,
    now: u64,
    count_selection: bool,
    report: &mut TickReport,
) -> bool {
    let policy = core.engine.policy().as_str();
    let Core {
        jobs,
        nodes,
        cancel_tokens,
        selections,
        ..
    } = &mut *core;
    let Some(job) = jobs.get_mut(job_id) else {
        return false;
    };
    if !matches!(job.status, JobStatus::Queued | JobStatus::Migrating) {
        return false;
    }
    let Some(node) = nodes.get_mut(node_id) else {
        return false;
    };

    match node.reserve(&job.requirements) {
        Ok(()) => {
            if let Err(e) = job.transition(JobStatus::Running, now) {
                node.release(&job.requirements);
                error!(%job_id, error = %e, "start refused by state machine");
                return false;
            }
            job.assigned_node = Some(node_id.clone());
            let (tx, _rx) = watch::channel(false);
            cancel_tokens.insert(job_id.clone(), tx);
            if count_selection {
                *selections.entry(policy.to_string()).or_insert(0) += 1;
            }
            report.started.push(StartedJob {
                job_id: job_id.clone(),
                node_id: node_id.clone(),
                generation: job.generation,
            });
            info!(%job_id, node = %node_id, generation = job.generation, "job started");
            true
        }
        Err(e) => {
            // Admission said yes but reservation said no; requeue rather
            // than abort the tick.
            warn!(%job_id, node = %node_id, error = %e, "reservation refused, job stays queued");
            false
        }
    }
}

// ── Shared helpers ──────────────────────────────────────────────────

/// Fail a job, reclaim its capacity if it held any, and signal its
/// worker. Returns whether the transition applied.
fn fail_with(core: &mut Core, job_id: &JobId, reason: FailureReason, now: u64) -> bool {
    let Core {
        jobs,
        nodes,
        cancel_tokens,
        ..
    } = core;
    let Some(job) = jobs.get_mut(job_id) else {
        return false;
    };
    let held_capacity = job.status == JobStatus::Running;
    if job.fail(reason, now).is_err() {
        return false;
    }
    if held_capacity {
        release_assigned(nodes, job);
    }
    if let Some(tx) = cancel_tokens.remove(job_id) {
        let _ = tx.send(true);
    }
    true
}

/// Release a job's reservation on its assigned node, if both exist.
/// Only RUNNING jobs hold capacity; paused and migrating jobs released
/// theirs at transition time.
fn release_assigned(nodes: &mut HashMap<NodeId, ResourceNode>, job: &Job) {
    if let Some(node_id) = &job.assigned_node {
        if let Some(node) = nodes.get_mut(node_id) {
            node.release(&job.requirements);
        }
    }
}

fn build_stats(core: &Core) -> SchedulerStats {
    let mut stats = SchedulerStats {
        ticks: core.ticks,
        selections: core.selections.clone(),
        preemptions: core.preemptions,
        deadline_boosts: core.deadline_boosts,
        ..Default::default()
    };

    let mut running_per_node: HashMap<&NodeId, usize> = HashMap::new();
    for job in core.jobs.values() {
        match job.status {
            JobStatus::Queued => stats.queued_jobs += 1,
            JobStatus::Running => {
                stats.running_jobs += 1;
                if let Some(node_id) = &job.assigned_node {
                    *running_per_node.entry(node_id).or_insert(0) += 1;
                }
            }
            JobStatus::Paused => stats.paused_jobs += 1,
            JobStatus::Migrating => stats.migrating_jobs += 1,
            JobStatus::Completed => stats.completed_jobs += 1,
            JobStatus::Failed => stats.failed_jobs += 1,
        }
    }

    let mut capacity = ResourceCapacity::default();
    let mut allocated = ResourceCapacity::default();
    for node in core.nodes.values() {
        capacity.cpu_cores += node.capacity.cpu_cores;
        capacity.memory_mb += node.capacity.memory_mb;
        capacity.gpu_count += node.capacity.gpu_count;
        capacity.network_mbps += node.capacity.network_mbps;
        capacity.disk_io_mbps += node.capacity.disk_io_mbps;
        allocated.cpu_cores += node.allocated.cpu_cores;
        allocated.memory_mb += node.allocated.memory_mb;
        allocated.gpu_count += node.allocated.gpu_count;
        allocated.network_mbps += node.allocated.network_mbps;
        allocated.disk_io_mbps += node.allocated.disk_io_mbps;

        stats.nodes.push(NodeStats {
            node_id: node.id.clone(),
            cpu_allocated: node.allocated.cpu_cores,
            cpu_total: node.capacity.cpu_cores,
            memory_allocated_mb: node.allocated.memory_mb,
            memory_total_mb: node.capacity.memory_mb,
            running_jobs: running_per_node.get(&node.id).copied().unwrap_or(0),
            reachable: node.reachable,
            draining: node.draining,
        });
    }
    stats.nodes.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    stats.utilization = DimensionUtilization {
        cpu: fraction(allocated.cpu_cores, capacity.cpu_cores),
        memory: fraction(allocated.memory_mb as f64, capacity.memory_mb as f64),
        gpu: fraction(f64::from(allocated.gpu_count), f64::from(capacity.gpu_count)),
        network: fraction(allocated.network_mbps, capacity.network_mbps),
        disk_io: fraction(allocated.disk_io_mbps, capacity.disk_io_mbps),
    };

    stats
}

fn fraction(part: f64, whole: f64) -> f64 {
    if whole > 0.0 { part / whole } else { 0.0 }
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
    use granger_monitor::{MonitorConfig, ReportedProbe};

    fn test_scheduler(config: SchedulerConfig) -> ResourceScheduler {
        let probe = Arc::new(ReportedProbe::new());
        let monitor = Arc::new(ResourceMonitor::new(probe, MonitorConfig::default()));
        ResourceScheduler::new(config, monitor)
    }

    fn small_node(id: &str, cpu: f64) -> ResourceNode {
        ResourceNode::new(
            id,
            ResourceCapacity {
                cpu_cores: cpu,
                memory_mb: 8192,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn submit_generates_sequential_ids() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        let a = scheduler.submit_job(JobSpec::new("alpha")).await.unwrap();
        let b = scheduler.submit_job(JobSpec::new("alpha")).await.unwrap();
        assert_eq!(a, "job-000001");
        assert_eq!(b, "job-000002");
    }

    #[tokio::test]
    async fn submit_rejects_bad_priority() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        for p in [0u8, 11] {
            let err = scheduler
                .submit_job(JobSpec::new("alpha").priority(p))
                .await
                .unwrap_err();
            assert!(matches!(err, SchedulerError::InvalidJobSpec { .. }));
        }
    }

    #[tokio::test]
    async fn submit_rejects_bad_requirements() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        let err = scheduler
            .submit_job(JobSpec::new("alpha").requirements(ResourceRequirements::new().cpu(-1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobSpec { .. }));

        let err = scheduler
            .submit_job(JobSpec::new("alpha").estimated_duration(0.0))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobSpec { .. }));

        let err = scheduler
            .submit_job(JobSpec::new("alpha").cost_per_second(-0.5))
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidJobSpec { .. }));
    }

    #[tokio::test]
    async fn rejected_job_never_enters_queue() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        let _ = scheduler
            .submit_job(JobSpec::new("alpha").priority(0))
            .await;
        assert!(scheduler.list_jobs().await.is_empty());
    }

    #[tokio::test]
    async fn pause_requires_running() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        let job_id = scheduler.submit_job(JobSpec::new("alpha")).await.unwrap();

        let err = scheduler.pause_job(&job_id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Transition(_)));
    }

    #[tokio::test]
    async fn resume_requires_paused() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        let job_id = scheduler.submit_job(JobSpec::new("alpha")).await.unwrap();

        let err = scheduler.resume_job(&job_id).await.unwrap_err();
        assert!(matches!(err, SchedulerError::Transition(_)));
    }

    #[tokio::test]
    async fn control_ops_on_unknown_job() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        assert!(matches!(
            scheduler.cancel_job("job-999999").await.unwrap_err(),
            SchedulerError::JobNotFound(_)
        ));
    }

    #[tokio::test]
    async fn duplicate_node_is_rejected() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        scheduler.add_node(small_node("n1", 4.0)).await.unwrap();
        assert!(matches!(
            scheduler.add_node(small_node("n1", 8.0)).await.unwrap_err(),
            SchedulerError::NodeExists(_)
        ));
    }

    #[tokio::test]
    async fn remove_unknown_node_errors() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        assert!(matches!(
            scheduler.remove_node("ghost").await.unwrap_err(),
            SchedulerError::NodeNotFound(_)
        ));
    }

    #[tokio::test]
    async fn stats_on_empty_scheduler() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        let stats = scheduler.get_scheduler_stats().await;
        assert_eq!(stats.queued_jobs, 0);
        assert_eq!(stats.utilization.cpu, 0.0);
    }

    #[tokio::test]
    async fn tick_places_submitted_job() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        scheduler.add_node(small_node("n1", 4.0)).await.unwrap();
        let job_id = scheduler
            .submit_job(
                JobSpec::new("alpha")
                    .requirements(ResourceRequirements::new().cpu(2.0).memory(1024)),
            )
            .await
            .unwrap();

        scheduler.tick().await;

        let job = scheduler.get_job(&job_id).await.unwrap();
        assert_eq!(job.status, JobStatus::Running);
        assert_eq!(job.assigned_node.as_deref(), Some("n1"));
        assert_eq!(job.generation, 1);

        let stats = scheduler.get_scheduler_stats().await;
        assert_eq!(stats.running_jobs, 1);
        assert_eq!(stats.selections.get("priority_based"), Some(&1));
        assert!(stats.utilization.cpu > 0.0);
    }

    #[tokio::test]
    async fn double_start_is_rejected() {
        let scheduler = Arc::new(test_scheduler(SchedulerConfig::default()));
        scheduler.start().await.unwrap();
        assert!(matches!(
            scheduler.start().await.unwrap_err(),
            SchedulerError::AlreadyStarted
        ));
        scheduler.stop().await;
        // And a stopped scheduler can start again.
        scheduler.start().await.unwrap();
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn stop_without_start_is_noop() {
        let scheduler = test_scheduler(SchedulerConfig::default());
        scheduler.stop().await;
    }
}
