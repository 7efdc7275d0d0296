//! Execution units: isolated workers that run one task at a time and talk to
//! the scheduler exclusively through message passing.
//!
//! The actual work is behind the [`Processor`] trait, supplied by the
//! embedding application. A unit keeps emitting heartbeats while a task is
//! in flight so a slow processor is not mistaken for a dead one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::task::Task;
use crate::Result;

/// Declared type of an execution unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitKind {
    /// Runs any kind of work
    General,
    /// Speech-to-text staging
    Transcription,
    /// Text-to-speech staging
    Synthesis,
    /// Signal-processing work (analysis, enhancement, noise reduction)
    AudioDsp,
    /// Emotion/intent inference
    Inference,
}

/// Lifecycle state of a unit as tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Initializing,
    Ready,
    Busy,
    Unhealthy,
    Terminated,
}

/// Resource figures a unit reports alongside its heartbeat
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    /// Approximate CPU share, 0.0–1.0, if known
    pub cpu: Option<f32>,
    /// Resident memory in bytes, if known
    pub memory_bytes: Option<u64>,
}

/// Command sent from the scheduler into a unit's mailbox
#[derive(Debug)]
pub enum UnitCommand {
    /// Begin processing the task
    Process(Task),
}

/// Event emitted by a unit toward the scheduler
#[derive(Debug)]
pub enum UnitEvent {
    /// Initialization finished, the unit can accept work
    Ready { unit_id: Uuid },
    /// Initialization failed; the unit is dead on arrival
    InitFailed { unit_id: Uuid, error: String },
    /// Periodic liveness signal
    Heartbeat { unit_id: Uuid, usage: ResourceUsage },
    /// Task finished successfully
    Completed {
        unit_id: Uuid,
        task_id: Uuid,
        payload: serde_json::Value,
        elapsed: Duration,
    },
    /// Task failed in the processor
    Failed {
        unit_id: Uuid,
        task_id: Uuid,
        error: String,
        elapsed: Duration,
    },
}

/// The work a unit performs, supplied by the embedding application
#[async_trait]
pub trait Processor: Send + Sync {
    /// One-time initialization before the unit reports ready
    ///
    /// # Errors
    ///
    /// Returns error if the processor cannot come up; the unit is then
    /// reported dead on arrival
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Run one task to completion
    ///
    /// # Errors
    ///
    /// Returns error to resolve the task as failed
    async fn process(&self, task: &Task) -> Result<serde_json::Value>;
}

/// Creates one processor per spawned unit
pub trait ProcessorFactory: Send + Sync {
    /// Build a processor for a unit of the given kind
    fn create(&self, kind: UnitKind) -> Arc<dyn Processor>;
}

/// Processor that echoes the task payload back; used by the CLI bench and
/// as a stand-in where no real processors are wired up
pub struct LoopbackProcessor;

#[async_trait]
impl Processor for LoopbackProcessor {
    async fn process(&self, task: &Task) -> Result<serde_json::Value> {
        Ok(task.payload.clone())
    }
}

/// Factory producing [`LoopbackProcessor`] for every unit kind
pub struct LoopbackFactory;

impl ProcessorFactory for LoopbackFactory {
    fn create(&self, _kind: UnitKind) -> Arc<dyn Processor> {
        Arc::new(LoopbackProcessor)
    }
}

/// Scheduler-side handle to a spawned unit
#[derive(Debug)]
pub struct UnitHandle {
    /// Mailbox for task assignment
    pub cmd_tx: mpsc::Sender<UnitCommand>,
    /// Join handle, aborted on replacement or shutdown
    pub join: JoinHandle<()>,
}

/// Spawn a unit task. The unit initializes its processor, reports ready,
/// then serves its mailbox while heartbeating on `heartbeat_interval`.
#[must_use]
pub fn spawn_unit(
    unit_id: Uuid,
    kind: UnitKind,
    processor: Arc<dyn Processor>,
    event_tx: mpsc::Sender<UnitEvent>,
    heartbeat_interval: Duration,
) -> UnitHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let join = tokio::spawn(run_unit(
        unit_id,
        kind,
        processor,
        cmd_rx,
        event_tx,
        heartbeat_interval,
    ));
    UnitHandle { cmd_tx, join }
}

async fn run_unit(
    unit_id: Uuid,
    kind: UnitKind,
    processor: Arc<dyn Processor>,
    mut cmd_rx: mpsc::Receiver<UnitCommand>,
    event_tx: mpsc::Sender<UnitEvent>,
    heartbeat_interval: Duration,
) {
    if let Err(e) = processor.init().await {
        let _ = event_tx
            .send(UnitEvent::InitFailed {
                unit_id,
                error: e.to_string(),
            })
            .await;
        return;
    }

    if event_tx.send(UnitEvent::Ready { unit_id }).await.is_err() {
        return;
    }

    tracing::debug!(unit_id = %unit_id, kind = ?kind, "unit ready");

    let mut heartbeat = tokio::time::interval(heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                if send_heartbeat(unit_id, &event_tx).await.is_err() {
                    return;
                }
            }
            cmd = cmd_rx.recv() => {
                let Some(UnitCommand::Process(task)) = cmd else {
                    tracing::debug!(unit_id = %unit_id, "unit mailbox closed");
                    return;
                };
                if process_with_heartbeats(
                    unit_id,
                    &*processor,
                    task,
                    &event_tx,
                    &mut heartbeat,
                )
                .await
                .is_err()
                {
                    return;
                }
            }
        }
    }
}

/// Run one task while keeping heartbeats flowing; a long-running processor
/// must not look dead to the health monitor.
async fn process_with_heartbeats(
    unit_id: Uuid,
    processor: &dyn Processor,
    task: Task,
    event_tx: &mpsc::Sender<UnitEvent>,
    heartbeat: &mut tokio::time::Interval,
) -> std::result::Result<(), ()> {
    let task_id = task.id;
    let started = Instant::now();
    let work = processor.process(&task);
    tokio::pin!(work);

    loop {
        tokio::select! {
            _ = heartbeat.tick() => {
                send_heartbeat(unit_id, event_tx).await?;
            }
            outcome = &mut work => {
                let elapsed = started.elapsed();
                let event = match outcome {
                    Ok(payload) => UnitEvent::Completed { unit_id, task_id, payload, elapsed },
                    Err(e) => UnitEvent::Failed {
                        unit_id,
                        task_id,
                        error: e.to_string(),
                        elapsed,
                    },
                };
                return event_tx.send(event).await.map_err(|_| ());
            }
        }
    }
}

async fn send_heartbeat(
    unit_id: Uuid,
    event_tx: &mpsc::Sender<UnitEvent>,
) -> std::result::Result<(), ()> {
    event_tx
        .send(UnitEvent::Heartbeat {
            unit_id,
            usage: ResourceUsage::default(),
        })
        .await
        .map_err(|_| ())
}
