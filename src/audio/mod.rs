//! Audio capture, framing, and voice-activity gating.
//!
//! Sources produce raw sample blocks, the framer cuts them into
//! fixed-duration frames, and the gate decides which become chunks worth
//! shipping. Live capture is feature-gated (`hardware-capture`) so headless
//! deployments build without audio hardware.

mod chunk;
mod gate;
mod source;

pub use chunk::AudioChunk;
pub use gate::{Framer, GateEvent, NoiseFilter, Passthrough, VoiceGate, rms_energy};
#[cfg(feature = "hardware-capture")]
pub use source::MicSource;
pub use source::{SAMPLE_RATE, SampleSource, ScriptedSource, WavFileSource};
