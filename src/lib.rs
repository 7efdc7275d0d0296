//! Cadence Engine - concurrent task scheduling and real-time voice
//! streaming for AI assistants
//!
//! This library provides two cooperating cores:
//! - An execution pool that dispatches typed work (analysis, transcription
//!   staging, synthesis staging, inference) across isolated units with
//!   priority ordering, load balancing, health monitoring, and timeouts
//! - A streaming pipeline that gates live audio through voice-activity
//!   detection and ships speech chunks over a duplex transport while
//!   tracking round-trip latency
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Callers                          │
//! │   submit  │  metrics  │  start/stop  │  mute        │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │                     Engine                           │
//! │   Scheduler  │  Unit Pool  │  Gate  │  Transport    │
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Remote endpoint (duplex)                │
//! │   transcription  │  response  │  latency  │  audio  │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod stream;

pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
pub use pool::{
    BlendedLoad, LoopbackFactory, MetricsSnapshot, PoolHandle, Priority, Processor,
    ProcessorFactory, RoundRobin, ScorePolicy, TaskResult, UnitKind, UnitSummary, WorkKind,
};
pub use stream::{LatencyStats, StreamEvent, StreamSession};
