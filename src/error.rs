//! Error types for the Cadence engine

use thiserror::Error;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Cadence engine
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Task queue is at its configured bound
    #[error("task queue full (depth {depth})")]
    CapacityExceeded {
        /// Queue depth at the time of rejection
        depth: usize,
    },

    /// Task deadline elapsed before a terminal state was reached
    #[error("task {task_id} timed out after {elapsed_ms}ms")]
    Timeout {
        /// Identifier of the expired task
        task_id: uuid::Uuid,
        /// Time the task spent queued and assigned before expiry
        elapsed_ms: u64,
    },

    /// An execution unit failed to reach ready within its startup window
    #[error("unit init failure: {0}")]
    UnitInit(String),

    /// Scheduler mailbox closed (engine shut down)
    #[error("scheduler unavailable: {0}")]
    Scheduler(String),

    /// Audio capture or decoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Streaming transport error
    #[error("transport error: {0}")]
    Transport(String),

    /// Streaming session error
    #[error("stream error: {0}")]
    Stream(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
