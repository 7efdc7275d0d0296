//! Execution pool: bounded priority queue, unit registry, and the single
//! scheduler actor that owns both.
//!
//! All queue mutation and assignment runs inside one `tokio::select!` loop,
//! so dispatch cycles never overlap and neither structure needs a lock.
//! Units run as independent tasks and communicate purely over channels.

pub mod health;
pub mod metrics;
pub mod policy;
pub mod queue;
pub mod registry;
pub mod task;
pub mod unit;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

pub use health::HealthMonitor;
pub use metrics::{MetricsAggregator, MetricsSnapshot};
pub use policy::{BlendedLoad, RoundRobin, ScorePolicy};
pub use queue::{QueuedTask, TaskQueue};
pub use registry::{UnitRegistry, UnitSummary};
pub use task::{Priority, Task, TaskResult, WorkKind};
pub use unit::{
    LoopbackFactory, LoopbackProcessor, Processor, ProcessorFactory, ResourceUsage,
    UnitCommand, UnitEvent, UnitHandle, UnitKind, UnitState,
};

use crate::config::Config;
use crate::{Error, Result};

/// Command sent from callers into the scheduler mailbox
#[derive(Debug)]
pub enum PoolCommand {
    /// Submit a task; the sender resolves exactly once on a terminal state
    Submit {
        task: Task,
        respond_to: oneshot::Sender<Result<TaskResult>>,
    },
    /// Read the current metrics snapshot
    Metrics {
        respond_to: oneshot::Sender<MetricsSnapshot>,
    },
    /// Read per-unit summaries
    UnitStatus {
        respond_to: oneshot::Sender<Vec<UnitSummary>>,
    },
    /// Drain and stop the pool
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Caller-side handle to a running pool
#[derive(Clone)]
pub struct PoolHandle {
    cmd_tx: mpsc::Sender<PoolCommand>,
    default_timeout: Duration,
}

impl PoolHandle {
    /// Submit work and suspend until it resolves. This is the only
    /// caller-visible blocking point of the pool.
    ///
    /// # Errors
    ///
    /// - `Error::CapacityExceeded` if the queue is at its bound
    /// - `Error::Timeout` if the task's deadline elapses first
    /// - `Error::Scheduler` if the pool has shut down
    pub async fn submit(
        &self,
        kind: WorkKind,
        payload: serde_json::Value,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<TaskResult> {
        let task = Task::new(
            kind,
            payload,
            priority,
            timeout.unwrap_or(self.default_timeout),
        );
        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Submit { task, respond_to })
            .await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))?
    }

    /// Current metrics snapshot
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the pool has shut down
    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Metrics { respond_to })
            .await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))
    }

    /// Per-unit summaries
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the pool has shut down
    pub async fn unit_status(&self) -> Result<Vec<UnitSummary>> {
        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::UnitStatus { respond_to })
            .await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))
    }

    /// Stop the pool, terminating all units. Unresolved submissions observe
    /// `Error::Scheduler`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the pool already stopped
    pub async fn shutdown(&self) -> Result<()> {
        let (respond_to, rx) = oneshot::channel();
        self.cmd_tx
            .send(PoolCommand::Shutdown { respond_to })
            .await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))?;
        rx.await
            .map_err(|_| Error::Scheduler("pool stopped".to_string()))
    }
}

/// Start a pool: spawn the configured units, wait for them to come up, then
/// hand the queue and registry to the scheduler actor.
///
/// # Errors
///
/// Returns `Error::UnitInit` if no unit becomes ready within the startup
/// window, or if any fails and `require_full_pool` is set
pub async fn start_pool(
    config: &Config,
    factory: Arc<dyn ProcessorFactory>,
    policy: Box<dyn ScorePolicy>,
) -> Result<PoolHandle> {
    let (cmd_tx, cmd_rx) = mpsc::channel(64);
    let (event_tx, mut event_rx) = mpsc::channel(256);

    let heartbeat_interval = Duration::from_millis(config.health.heartbeat_interval_ms);
    let mut registry = UnitRegistry::new();
    let mut expected = 0usize;
    for spec in &config.pool.units {
        for _ in 0..spec.count {
            let id = Uuid::new_v4();
            let handle = unit::spawn_unit(
                id,
                spec.kind,
                factory.create(spec.kind),
                event_tx.clone(),
                heartbeat_interval,
            );
            registry.insert(id, spec.kind, handle);
            expected += 1;
        }
    }

    let init_deadline =
        tokio::time::Instant::now() + Duration::from_millis(config.pool.init_timeout_ms);
    let mut ready = 0usize;
    let mut failed = 0usize;
    while ready + failed < expected {
        match tokio::time::timeout_at(init_deadline, event_rx.recv()).await {
            Ok(Some(UnitEvent::Ready { unit_id })) => {
                if let Some(unit) = registry.get_mut(unit_id) {
                    unit.state = UnitState::Ready;
                    unit.last_heartbeat = Instant::now();
                }
                ready += 1;
            }
            Ok(Some(UnitEvent::InitFailed { unit_id, error })) => {
                tracing::error!(unit_id = %unit_id, error = %error, "unit failed to initialize");
                if let Some(record) = registry.remove(unit_id) {
                    record.handle.join.abort();
                }
                failed += 1;
            }
            Ok(Some(UnitEvent::Heartbeat { unit_id, usage })) => {
                registry.heartbeat(unit_id, usage);
            }
            Ok(Some(_)) | Ok(None) => {}
            Err(_) => break,
        }
    }

    // Units still initializing past the deadline count as failures
    let stragglers: Vec<Uuid> = registry
        .iter()
        .filter(|u| u.state == UnitState::Initializing)
        .map(|u| u.id)
        .collect();
    for id in stragglers {
        tracing::error!(unit_id = %id, "unit did not become ready in time");
        if let Some(record) = registry.remove(id) {
            record.handle.join.abort();
        }
        failed += 1;
    }

    if ready == 0 {
        return Err(Error::UnitInit("no units became ready".to_string()));
    }
    if failed > 0 && config.pool.require_full_pool {
        return Err(Error::UnitInit(format!(
            "{failed} of {expected} units failed to initialize"
        )));
    }
    if failed > 0 {
        tracing::warn!(ready, expected, "starting with a reduced pool");
    }

    tracing::info!(units = ready, "execution pool started");

    let scheduler = Scheduler {
        queue: TaskQueue::new(config.queue.max_depth),
        registry,
        pending: HashMap::new(),
        metrics: MetricsAggregator::new(),
        health: HealthMonitor::new(&config.health),
        policy,
        factory,
        event_tx,
        heartbeat_interval,
        dispatch_interval: Duration::from_millis(config.pool.dispatch_interval_ms),
        health_interval: Duration::from_millis(config.health.check_interval_ms),
        metrics_interval: Duration::from_millis(config.pool.metrics_interval_ms),
    };
    tokio::spawn(scheduler.run(cmd_rx, event_rx));

    Ok(PoolHandle {
        cmd_tx,
        default_timeout: Duration::from_millis(config.pool.default_timeout_ms),
    })
}

/// Where a pending task currently lives
enum Phase {
    /// In the queue awaiting assignment
    Queued,
    /// Running on a unit; the task is kept for a possible one-shot requeue
    Assigned { unit_id: Uuid, task: Task },
}

/// Book-keeping for a submitted, not-yet-resolved task
struct PendingTask {
    respond_to: oneshot::Sender<Result<TaskResult>>,
    submitted_at: Instant,
    deadline: Instant,
    phase: Phase,
    requeued: bool,
}

/// The scheduler actor; exclusive owner of queue and registry
struct Scheduler {
    queue: TaskQueue,
    registry: UnitRegistry,
    pending: HashMap<Uuid, PendingTask>,
    metrics: MetricsAggregator,
    health: HealthMonitor,
    policy: Box<dyn ScorePolicy>,
    factory: Arc<dyn ProcessorFactory>,
    event_tx: mpsc::Sender<UnitEvent>,
    heartbeat_interval: Duration,
    dispatch_interval: Duration,
    health_interval: Duration,
    metrics_interval: Duration,
}

impl Scheduler {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::Receiver<PoolCommand>,
        mut event_rx: mpsc::Receiver<UnitEvent>,
    ) {
        let mut dispatch = tokio::time::interval(self.dispatch_interval);
        dispatch.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut health = tokio::time::interval(self.health_interval);
        health.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut metrics = tokio::time::interval(self.metrics_interval);
        metrics.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(PoolCommand::Submit { task, respond_to }) => {
                            self.handle_submit(task, respond_to);
                        }
                        Some(PoolCommand::Metrics { respond_to }) => {
                            self.recompute_metrics();
                            let _ = respond_to.send(self.metrics.snapshot().clone());
                        }
                        Some(PoolCommand::UnitStatus { respond_to }) => {
                            let _ = respond_to.send(self.registry.summaries());
                        }
                        Some(PoolCommand::Shutdown { respond_to }) => {
                            self.shutdown();
                            let _ = respond_to.send(());
                            return;
                        }
                        None => {
                            self.shutdown();
                            return;
                        }
                    }
                }
                Some(event) = event_rx.recv() => self.handle_unit_event(event),
                _ = dispatch.tick() => {
                    self.expire_deadlines();
                    self.dispatch_cycle();
                }
                _ = health.tick() => self.health_cycle(),
                _ = metrics.tick() => self.recompute_metrics(),
            }
        }
    }

    fn handle_submit(&mut self, task: Task, respond_to: oneshot::Sender<Result<TaskResult>>) {
        let task_id = task.id;
        let submitted_at = task.submitted_at;
        let deadline = task.deadline();
        match self.queue.submit(task) {
            Ok(_) => {
                self.metrics.task_submitted();
                self.pending.insert(
                    task_id,
                    PendingTask {
                        respond_to,
                        submitted_at,
                        deadline,
                        phase: Phase::Queued,
                        requeued: false,
                    },
                );
            }
            Err(e) => {
                tracing::debug!(task_id = %task_id, "submission rejected, queue full");
                let _ = respond_to.send(Err(e));
            }
        }
    }

    /// One dispatch cycle: pull as many top-ranked tasks as there are idle
    /// units, match each against the policy, re-insert the unmatchable ones
    /// at their original rank.
    fn dispatch_cycle(&mut self) {
        let idle = self.registry.idle_count();
        if idle == 0 || self.queue.is_empty() {
            return;
        }

        let mut pulled = Vec::with_capacity(idle);
        for _ in 0..idle {
            match self.queue.pop() {
                Some(entry) => pulled.push(entry),
                None => break,
            }
        }

        let mut unmatched = Vec::new();
        for entry in pulled {
            if !self.pending.contains_key(&entry.task.id) {
                // Resolved while queued; nothing to dispatch
                continue;
            }
            let selected = {
                let candidates: Vec<&registry::UnitRecord> = self
                    .registry
                    .iter()
                    .filter(|u| u.state == UnitState::Ready && entry.task.kind.runs_on(u.kind))
                    .collect();
                self.policy.select(&candidates)
            };
            match selected {
                Some(unit_id) => self.assign(entry, unit_id),
                None => unmatched.push(entry),
            }
        }

        for entry in unmatched {
            if self.queue.reinsert(entry).is_err() {
                tracing::warn!("queue full while re-inserting unmatched task");
            }
        }
    }

    fn assign(&mut self, entry: QueuedTask, unit_id: Uuid) {
        let Some(unit) = self.registry.get_mut(unit_id) else {
            let _ = self.queue.reinsert(entry);
            return;
        };
        let task_id = entry.task.id;
        match unit
            .handle
            .cmd_tx
            .try_send(UnitCommand::Process(entry.task.clone()))
        {
            Ok(()) => {
                unit.state = UnitState::Busy;
                unit.current_task = Some(task_id);
                if let Some(pending) = self.pending.get_mut(&task_id) {
                    pending.phase = Phase::Assigned {
                        unit_id,
                        task: entry.task,
                    };
                }
                tracing::trace!(task_id = %task_id, unit_id = %unit_id, "task assigned");
            }
            Err(_) => {
                tracing::warn!(unit_id = %unit_id, "unit rejected assignment, replacing");
                self.fail_unit(unit_id);
                let _ = self.queue.reinsert(entry);
            }
        }
    }

    fn handle_unit_event(&mut self, event: UnitEvent) {
        match event {
            UnitEvent::Ready { unit_id } => {
                if let Some(unit) = self.registry.get_mut(unit_id) {
                    unit.state = UnitState::Ready;
                    unit.last_heartbeat = Instant::now();
                }
            }
            UnitEvent::InitFailed { unit_id, error } => {
                // A replacement that cannot come up shrinks the pool rather
                // than triggering a spawn storm
                tracing::error!(unit_id = %unit_id, error = %error, "replacement unit failed to initialize");
                if let Some(record) = self.registry.remove(unit_id) {
                    record.handle.join.abort();
                }
            }
            UnitEvent::Heartbeat { unit_id, usage } => {
                self.registry.heartbeat(unit_id, usage);
            }
            UnitEvent::Completed {
                unit_id,
                task_id,
                payload,
                elapsed,
            } => {
                if self.owns_task(unit_id, task_id) {
                    self.registry.record_completion(unit_id, elapsed);
                    self.metrics.task_completed(elapsed);
                    if let Some(pending) = self.pending.remove(&task_id) {
                        let _ = pending.respond_to.send(Ok(TaskResult::completed(
                            task_id, payload, elapsed, unit_id,
                        )));
                    }
                } else {
                    tracing::debug!(unit_id = %unit_id, task_id = %task_id, "late result discarded");
                    self.registry.release(unit_id);
                }
            }
            UnitEvent::Failed {
                unit_id,
                task_id,
                error,
                elapsed,
            } => {
                if self.owns_task(unit_id, task_id) {
                    self.registry.release(unit_id);
                    self.metrics.task_failed();
                    if let Some(pending) = self.pending.remove(&task_id) {
                        let _ = pending.respond_to.send(Ok(TaskResult::failed(
                            task_id,
                            error,
                            elapsed,
                            Some(unit_id),
                        )));
                    }
                } else {
                    tracing::debug!(unit_id = %unit_id, task_id = %task_id, "late failure discarded");
                    self.registry.release(unit_id);
                }
            }
        }
    }

    /// Whether the event's task is still pending and assigned to this unit
    fn owns_task(&self, unit_id: Uuid, task_id: Uuid) -> bool {
        self.pending.get(&task_id).is_some_and(|p| {
            matches!(p.phase, Phase::Assigned { unit_id: u, .. } if u == unit_id)
        })
    }

    /// Resolve every pending task whose deadline has passed. Runs on the
    /// dispatch tick, which bounds resolution to deadline + one tick.
    fn expire_deadlines(&mut self) {
        let now = Instant::now();
        let expired: Vec<Uuid> = self
            .pending
            .iter()
            .filter(|(_, p)| now >= p.deadline)
            .map(|(id, _)| *id)
            .collect();

        for task_id in expired {
            let Some(pending) = self.pending.remove(&task_id) else {
                continue;
            };
            match pending.phase {
                Phase::Queued => {
                    self.queue.remove(task_id);
                }
                Phase::Assigned { unit_id, .. } => {
                    // The unit is no longer trusted with this task. It stays
                    // busy until a late report releases it or the health
                    // monitor reclaims it.
                    if let Some(unit) = self.registry.get_mut(unit_id) {
                        if unit.current_task == Some(task_id) {
                            unit.suspect_since = Some(now);
                        }
                    }
                }
            }
            self.metrics.task_timed_out();
            let elapsed_ms =
                u64::try_from(now.duration_since(pending.submitted_at).as_millis())
                    .unwrap_or(u64::MAX);
            tracing::debug!(task_id = %task_id, "task timed out");
            let _ = pending.respond_to.send(Err(Error::Timeout {
                task_id,
                elapsed_ms,
            }));
        }
    }

    fn health_cycle(&mut self) {
        for unit_id in self.health.unhealthy_units(&self.registry) {
            tracing::warn!(unit_id = %unit_id, "unit unhealthy, replacing");
            self.fail_unit(unit_id);
        }
    }

    /// Terminate a unit, spawn a replacement of the same kind, and requeue
    /// its in-flight task at most once.
    fn fail_unit(&mut self, unit_id: Uuid) {
        let Some(record) = self.registry.remove(unit_id) else {
            return;
        };
        record.handle.join.abort();
        let kind = record.kind;
        if let Some(task_id) = record.current_task {
            self.requeue_or_fail(task_id, unit_id);
        }

        let id = Uuid::new_v4();
        let handle = unit::spawn_unit(
            id,
            kind,
            self.factory.create(kind),
            self.event_tx.clone(),
            self.heartbeat_interval,
        );
        self.registry.insert(id, kind, handle);
        tracing::info!(old = %unit_id, new = %id, kind = ?kind, "unit replaced");
    }

    fn requeue_or_fail(&mut self, task_id: Uuid, failed_unit: Uuid) {
        let Some(pending) = self.pending.get_mut(&task_id) else {
            return;
        };
        let Phase::Assigned { unit_id, task, .. } = &pending.phase else {
            return;
        };
        if *unit_id != failed_unit {
            return;
        }
        let task = task.clone();

        if pending.requeued {
            // Already survived one unit death; resolve as failed rather
            // than looping on a broken unit kind
            let elapsed = task.submitted_at.elapsed();
            self.metrics.task_failed();
            if let Some(pending) = self.pending.remove(&task_id) {
                let _ = pending.respond_to.send(Ok(TaskResult::failed(
                    task_id,
                    "unit failed while processing".to_string(),
                    elapsed,
                    Some(failed_unit),
                )));
            }
            return;
        }

        pending.requeued = true;
        pending.phase = Phase::Queued;
        tracing::debug!(task_id = %task_id, "re-queueing task from failed unit");
        if self.queue.submit(task).is_err() {
            self.metrics.task_failed();
            if let Some(pending) = self.pending.remove(&task_id) {
                let _ = pending.respond_to.send(Ok(TaskResult::failed(
                    task_id,
                    "queue full while re-queueing from failed unit".to_string(),
                    Duration::ZERO,
                    Some(failed_unit),
                )));
            }
        }
    }

    fn recompute_metrics(&mut self) {
        self.metrics.recompute(
            self.queue.depth(),
            self.registry.idle_count(),
            self.registry.busy_count(),
            self.registry.len(),
        );
    }

    fn shutdown(&mut self) {
        tracing::info!("pool shutting down");
        let ids: Vec<Uuid> = self.registry.iter().map(|u| u.id).collect();
        for id in ids {
            if let Some(record) = self.registry.remove(id) {
                record.handle.join.abort();
            }
        }
        for (task_id, pending) in self.pending.drain() {
            let _ = pending
                .respond_to
                .send(Err(Error::Scheduler(format!("pool stopped before task {task_id} resolved"))));
        }
    }
}
