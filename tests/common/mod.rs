//! Shared test utilities: fast-tick configs and instrumented processors

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use cadence_engine::pool::{Processor, ProcessorFactory, Task, UnitKind};
use cadence_engine::{Config, Result};

/// Config with tick intervals tightened for tests
#[must_use]
pub fn fast_config(units: Vec<(UnitKind, usize)>, max_depth: usize) -> Config {
    let mut config = Config::default();
    config.pool.units = units
        .into_iter()
        .map(|(kind, count)| cadence_engine::config::UnitSpec { kind, count })
        .collect();
    config.pool.dispatch_interval_ms = 5;
    config.pool.metrics_interval_ms = 50;
    config.pool.default_timeout_ms = 5_000;
    config.pool.init_timeout_ms = 2_000;
    config.queue.max_depth = max_depth;
    config.health.heartbeat_interval_ms = 100;
    config.health.staleness_multiplier = 2;
    config.health.check_interval_ms = 50;
    config
}

/// Records processing order and concurrent occupancy across units
#[derive(Default)]
pub struct Recorder {
    pub order: Mutex<Vec<i64>>,
    active: AtomicI64,
    max_active: AtomicI64,
}

impl Recorder {
    pub fn enter(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    #[must_use]
    pub fn active(&self) -> i64 {
        self.active.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn max_active(&self) -> i64 {
        self.max_active.load(Ordering::SeqCst)
    }
}

/// Processor that logs each task's `seq` payload field, holds the unit for
/// `delay`, then echoes the payload
pub struct RecordingProcessor {
    pub recorder: Arc<Recorder>,
    pub delay: Duration,
}

#[async_trait]
impl Processor for RecordingProcessor {
    async fn process(&self, task: &Task) -> Result<serde_json::Value> {
        self.recorder.enter();
        self.recorder
            .order
            .lock()
            .await
            .push(task.payload["seq"].as_i64().unwrap_or(-1));
        tokio::time::sleep(self.delay).await;
        self.recorder.exit();
        Ok(task.payload.clone())
    }
}

/// Processor that never finishes; tasks against it can only time out
pub struct HangProcessor;

#[async_trait]
impl Processor for HangProcessor {
    async fn process(&self, _task: &Task) -> Result<serde_json::Value> {
        std::future::pending().await
    }
}

/// Processor whose task dies taking the unit with it: the unit stops
/// heartbeating and must be reclaimed by the health monitor
pub struct PanicProcessor;

#[async_trait]
impl Processor for PanicProcessor {
    async fn process(&self, _task: &Task) -> Result<serde_json::Value> {
        panic!("unit lost");
    }
}

/// Factory handing every unit the same shared processor
pub struct SharedFactory(pub Arc<dyn Processor>);

impl ProcessorFactory for SharedFactory {
    fn create(&self, _kind: UnitKind) -> Arc<dyn Processor> {
        Arc::clone(&self.0)
    }
}
