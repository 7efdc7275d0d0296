//! Engine facade: one object owning the execution pool and, while streaming
//! is active, the capture session.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::audio::{NoiseFilter, Passthrough, SampleSource};
use crate::config::Config;
use crate::pool::{
    self, BlendedLoad, MetricsSnapshot, PoolHandle, Priority, ProcessorFactory, ScorePolicy,
    TaskResult, UnitSummary, WorkKind,
};
use crate::stream::{LatencyStats, StreamEvent, StreamSession};
use crate::{Error, Result};

/// The engine: a running execution pool plus an optional streaming session
pub struct Engine {
    config: Config,
    pool: PoolHandle,
    session: Option<StreamSession>,
}

impl Engine {
    /// Start the engine with the default load-balancing policy
    ///
    /// # Errors
    ///
    /// Returns `Error::UnitInit` if the pool cannot come up
    pub async fn start(config: Config, factory: Arc<dyn ProcessorFactory>) -> Result<Self> {
        Self::start_with_policy(config, factory, Box::new(BlendedLoad)).await
    }

    /// Start the engine with an explicit load-balancing policy
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` on invalid configuration, `Error::UnitInit`
    /// if the pool cannot come up
    pub async fn start_with_policy(
        config: Config,
        factory: Arc<dyn ProcessorFactory>,
        policy: Box<dyn ScorePolicy>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = pool::start_pool(&config, factory, policy).await?;
        Ok(Self {
            config,
            pool,
            session: None,
        })
    }

    /// Submit work and suspend until it resolves
    ///
    /// # Errors
    ///
    /// See [`PoolHandle::submit`]
    pub async fn submit(
        &self,
        kind: WorkKind,
        payload: serde_json::Value,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<TaskResult> {
        self.pool.submit(kind, payload, priority, timeout).await
    }

    /// Current pool metrics
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the pool has shut down
    pub async fn metrics(&self) -> Result<MetricsSnapshot> {
        self.pool.metrics().await
    }

    /// Per-unit status summaries
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the pool has shut down
    pub async fn unit_status(&self) -> Result<Vec<UnitSummary>> {
        self.pool.unit_status().await
    }

    /// Start streaming the source to the endpoint with no noise suppression
    ///
    /// # Errors
    ///
    /// See [`Engine::start_stream_with_filter`]
    pub async fn start_stream(
        &mut self,
        endpoint: &str,
        source: Box<dyn SampleSource>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.start_stream_with_filter(endpoint, source, Box::new(Passthrough))
            .await
    }

    /// Start streaming with a noise suppression transform in front of the
    /// gate. Only one session may be active at a time.
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if a session is already active,
    /// `Error::Transport` if the endpoint connection fails
    pub async fn start_stream_with_filter(
        &mut self,
        endpoint: &str,
        source: Box<dyn SampleSource>,
        filter: Box<dyn NoiseFilter>,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        if self.session.is_some() {
            return Err(Error::Stream("session already active".to_string()));
        }
        let (session, events) = StreamSession::start(
            endpoint,
            source,
            filter,
            &self.config.audio,
            &self.config.stream,
        )
        .await?;
        self.session = Some(session);
        Ok(events)
    }

    /// Stop the active streaming session, releasing capture resources
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if no session is active
    pub async fn stop_stream(&mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.stop().await,
            None => Err(Error::Stream("no active session".to_string())),
        }
    }

    /// Round-trip latency figures for the active session
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if no session is active
    pub async fn latency_stats(&self) -> Result<LatencyStats> {
        match &self.session {
            Some(session) => session.latency_stats().await,
            None => Err(Error::Stream("no active session".to_string())),
        }
    }

    /// Drop capture input before the gate
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if no session is active
    pub async fn mute(&self) -> Result<()> {
        match &self.session {
            Some(session) => {
                session.mute().await;
                Ok(())
            }
            None => Err(Error::Stream("no active session".to_string())),
        }
    }

    /// Resume feeding capture input to the gate
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if no session is active
    pub async fn unmute(&self) -> Result<()> {
        match &self.session {
            Some(session) => {
                session.unmute().await;
                Ok(())
            }
            None => Err(Error::Stream("no active session".to_string())),
        }
    }

    /// Graceful shutdown: stop streaming, then drain and stop the pool
    ///
    /// # Errors
    ///
    /// Returns `Error::Scheduler` if the pool already stopped
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(session) = self.session.take() {
            let _ = session.stop().await;
        }
        self.pool.shutdown().await
    }
}
