//! Configuration for the engine: pool sizing, queue bounds, health cadences,
//! audio gating, and stream budgets. Loadable from TOML with serde defaults.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::pool::UnitKind;
use crate::{Error, Result};

/// Engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Execution pool configuration
    pub pool: PoolConfig,

    /// Task queue configuration
    pub queue: QueueConfig,

    /// Heartbeat / health monitor configuration
    pub health: HealthConfig,

    /// Audio capture and voice gate configuration
    pub audio: AudioConfig,

    /// Streaming transport configuration
    pub stream: StreamConfig,
}

/// Execution pool configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Units to create at startup, per kind
    pub units: Vec<UnitSpec>,

    /// Dispatch cycle interval in milliseconds (kept well under 20ms)
    pub dispatch_interval_ms: u64,

    /// Metrics recomputation cadence in milliseconds
    pub metrics_interval_ms: u64,

    /// Default task timeout in milliseconds; tasks submitted without an
    /// explicit timeout use this deadline
    pub default_timeout_ms: u64,

    /// How long a unit may take to report ready after spawn
    pub init_timeout_ms: u64,

    /// Startup policy: abort if any unit fails to initialize, or proceed
    /// with the units that did come up
    pub require_full_pool: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            units: vec![
                UnitSpec {
                    kind: UnitKind::General,
                    count: 2,
                },
                UnitSpec {
                    kind: UnitKind::Transcription,
                    count: 1,
                },
                UnitSpec {
                    kind: UnitKind::AudioDsp,
                    count: 1,
                },
            ],
            dispatch_interval_ms: 10,
            metrics_interval_ms: 1_000,
            default_timeout_ms: 30_000,
            init_timeout_ms: 5_000,
            require_full_pool: false,
        }
    }
}

/// Number of units of a given kind to create
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitSpec {
    /// Declared unit type
    pub kind: UnitKind,
    /// How many units of this kind
    pub count: usize,
}

/// Task queue configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Maximum number of tasks held awaiting assignment; submissions beyond
    /// this bound fail immediately
    pub max_depth: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self { max_depth: 256 }
    }
}

/// Heartbeat and health monitor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthConfig {
    /// Interval at which units emit heartbeats, in milliseconds
    pub heartbeat_interval_ms: u64,

    /// A unit whose last heartbeat is older than
    /// `staleness_multiplier * heartbeat_interval` is replaced
    pub staleness_multiplier: u32,

    /// Health check cadence in milliseconds
    pub check_interval_ms: u64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 1_000,
            staleness_multiplier: 2,
            check_interval_ms: 500,
        }
    }
}

/// Audio capture and voice gate configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AudioConfig {
    /// Capture sample rate in Hz (16kHz for speech)
    pub sample_rate: u32,

    /// Chunk duration in milliseconds
    pub chunk_ms: u64,

    /// RMS energy above which a frame is classified as speech
    pub energy_threshold: f32,

    /// Sustained silence (in milliseconds) that closes an utterance
    pub min_silence_ms: u64,

    /// When false, all chunks are forwarded regardless of the speech flag
    pub gate_enabled: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            chunk_ms: 20,
            energy_threshold: 0.03,
            min_silence_ms: 250,
            gate_enabled: true,
        }
    }
}

impl AudioConfig {
    /// Samples per chunk at the configured rate
    #[must_use]
    pub fn chunk_samples(&self) -> usize {
        (u64::from(self.sample_rate) * self.chunk_ms / 1_000) as usize
    }

    /// Silence frames required to close an utterance
    #[must_use]
    pub fn min_silence_frames(&self) -> usize {
        (self.min_silence_ms / self.chunk_ms.max(1)).max(1) as usize
    }

    /// Chunk duration as a [`Duration`]
    #[must_use]
    pub const fn chunk_duration(&self) -> Duration {
        Duration::from_millis(self.chunk_ms)
    }
}

/// Streaming transport and latency budget configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StreamConfig {
    /// Rolling average latency above this budget raises a warning, in
    /// milliseconds
    pub max_latency_ms: u64,

    /// Number of round-trip samples kept in the rolling window
    pub latency_window: usize,

    /// Payload encoding advertised in the config message
    pub encoding: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_latency_ms: 200,
            latency_window: 10,
            encoding: "pcm_s16le".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read, parsed, or fails validation
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `Error::Config` describing the first violated constraint
    pub fn validate(&self) -> Result<()> {
        if self.pool.units.iter().map(|s| s.count).sum::<usize>() == 0 {
            return Err(Error::Config("pool has no units".to_string()));
        }
        if self.pool.dispatch_interval_ms == 0 || self.pool.dispatch_interval_ms >= 20 {
            return Err(Error::Config(format!(
                "dispatch_interval_ms must be in 1..20, got {}",
                self.pool.dispatch_interval_ms
            )));
        }
        if self.queue.max_depth == 0 {
            return Err(Error::Config("queue.max_depth must be non-zero".to_string()));
        }
        if self.health.staleness_multiplier == 0 {
            return Err(Error::Config(
                "health.staleness_multiplier must be non-zero".to_string(),
            ));
        }
        if self.audio.chunk_ms == 0 || self.audio.sample_rate == 0 {
            return Err(Error::Config(
                "audio.chunk_ms and audio.sample_rate must be non-zero".to_string(),
            ));
        }
        if self.stream.latency_window == 0 {
            return Err(Error::Config(
                "stream.latency_window must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective deadline for a submission, explicit timeout or pool default
    #[must_use]
    pub const fn effective_timeout(&self, requested: Option<Duration>) -> Duration {
        match requested {
            Some(t) => t,
            None => Duration::from_millis(self.pool.default_timeout_ms),
        }
    }
}
