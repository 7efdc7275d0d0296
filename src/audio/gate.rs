//! Voice-activity gate: classifies fixed-duration frames as speech or
//! silence, tracks utterance boundaries, and decides which chunks are worth
//! shipping over the transport.
//!
//! Noise suppression is consumed as a black-box transform over each frame;
//! the classifier here is plain RMS energy against a threshold.

use std::time::Duration;

use uuid::Uuid;

use super::chunk::AudioChunk;
use crate::config::AudioConfig;

/// Black-box noise suppression applied to each frame before classification
pub trait NoiseFilter: Send {
    /// Transform the frame in place
    fn apply(&mut self, frame: &mut [f32]);
}

/// No-op filter used when no suppression algorithm is wired up
#[derive(Debug, Default)]
pub struct Passthrough;

impl NoiseFilter for Passthrough {
    fn apply(&mut self, _frame: &mut [f32]) {}
}

/// Accumulates arbitrary-size sample blocks into fixed-size frames
#[derive(Debug)]
pub struct Framer {
    frame_len: usize,
    buf: Vec<f32>,
}

impl Framer {
    /// Create a framer producing frames of `frame_len` samples
    #[must_use]
    pub fn new(frame_len: usize) -> Self {
        Self {
            frame_len,
            buf: Vec::with_capacity(frame_len * 2),
        }
    }

    /// Feed a block; returns every complete frame it filled
    pub fn push(&mut self, block: &[f32]) -> Vec<Vec<f32>> {
        self.buf.extend_from_slice(block);
        let mut frames = Vec::new();
        while self.buf.len() >= self.frame_len {
            let rest = self.buf.split_off(self.frame_len);
            frames.push(std::mem::replace(&mut self.buf, rest));
        }
        frames
    }

    /// Samples currently buffered below one frame
    #[must_use]
    pub const fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Discard any partially accumulated frame
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Output of pushing one frame through the gate
#[derive(Debug)]
pub enum GateEvent {
    /// A chunk that passed the forwarding policy
    Chunk(AudioChunk),
    /// Sustained silence closed the current utterance
    UtteranceEnd { utterance_id: Uuid },
}

#[derive(Debug)]
enum GateState {
    Idle,
    Speaking {
        utterance_id: Uuid,
        silence_run: usize,
    },
}

/// Voice-activity gate over fixed-duration frames
pub struct VoiceGate {
    filter: Box<dyn NoiseFilter>,
    energy_threshold: f32,
    min_silence_frames: usize,
    gate_enabled: bool,
    chunk_duration: Duration,
    state: GateState,
}

impl VoiceGate {
    /// Build a gate from audio configuration and a noise filter
    #[must_use]
    pub fn new(config: &AudioConfig, filter: Box<dyn NoiseFilter>) -> Self {
        Self {
            filter,
            energy_threshold: config.energy_threshold,
            min_silence_frames: config.min_silence_frames(),
            gate_enabled: config.gate_enabled,
            chunk_duration: config.chunk_duration(),
            state: GateState::Idle,
        }
    }

    /// Whether an utterance is currently open
    #[must_use]
    pub const fn in_utterance(&self) -> bool {
        matches!(self.state, GateState::Speaking { .. })
    }

    /// Push one fixed-duration frame through suppression, classification,
    /// and the forwarding policy
    pub fn push_frame(&mut self, mut frame: Vec<f32>) -> Vec<GateEvent> {
        self.filter.apply(&mut frame);
        let energy = rms_energy(&frame);
        let is_speech = energy > self.energy_threshold;

        let mut events = Vec::with_capacity(2);
        let mut closes_utterance = false;

        let utterance_id = if is_speech {
            match &mut self.state {
                GateState::Idle => {
                    let utterance_id = Uuid::new_v4();
                    tracing::debug!(utterance_id = %utterance_id, energy, "utterance opened");
                    self.state = GateState::Speaking {
                        utterance_id,
                        silence_run: 0,
                    };
                    Some(utterance_id)
                }
                GateState::Speaking { utterance_id, silence_run } => {
                    *silence_run = 0;
                    Some(*utterance_id)
                }
            }
        } else {
            match &mut self.state {
                GateState::Idle => None,
                GateState::Speaking { utterance_id, silence_run } => {
                    *silence_run += 1;
                    let id = *utterance_id;
                    if *silence_run >= self.min_silence_frames {
                        tracing::debug!(utterance_id = %id, "utterance closed");
                        self.state = GateState::Idle;
                        closes_utterance = true;
                        events.push(GateEvent::UtteranceEnd { utterance_id: id });
                    }
                    Some(id)
                }
            }
        };

        if is_speech || !self.gate_enabled {
            let mut chunk = AudioChunk::new(utterance_id, frame, self.chunk_duration, is_speech);
            chunk.end_of_utterance = closes_utterance;
            events.insert(0, GateEvent::Chunk(chunk));
        }

        events
    }

    /// Force-close an open utterance (stream teardown)
    pub fn flush(&mut self) -> Option<GateEvent> {
        match std::mem::replace(&mut self.state, GateState::Idle) {
            GateState::Speaking { utterance_id, .. } => {
                tracing::debug!(utterance_id = %utterance_id, "utterance flushed");
                Some(GateEvent::UtteranceEnd { utterance_id })
            }
            GateState::Idle => None,
        }
    }
}

/// RMS energy of a frame
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms_energy(frame: &[f32]) -> f32 {
    if frame.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = frame.iter().map(|s| s * s).sum();
    (sum_squares / frame.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AudioConfig {
        AudioConfig {
            sample_rate: 16_000,
            chunk_ms: 20,
            energy_threshold: 0.03,
            min_silence_ms: 100,
            gate_enabled: true,
        }
    }

    fn speech_frame(len: usize) -> Vec<f32> {
        vec![0.3; len]
    }

    fn silence_frame(len: usize) -> Vec<f32> {
        vec![0.0; len]
    }

    #[test]
    fn energy_separates_speech_from_silence() {
        assert!(rms_energy(&silence_frame(320)) < 0.001);
        assert!(rms_energy(&speech_frame(320)) > 0.2);
        assert!(rms_energy(&[]).abs() < f32::EPSILON);
    }

    #[test]
    fn framer_produces_fixed_frames() {
        let mut framer = Framer::new(320);
        assert!(framer.push(&[0.0; 100]).is_empty());
        assert_eq!(framer.buffered(), 100);

        let frames = framer.push(&[0.0; 600]);
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(|f| f.len() == 320));
        assert_eq!(framer.buffered(), 60);
    }

    #[test]
    fn silence_while_idle_forwards_nothing() {
        let mut gate = VoiceGate::new(&config(), Box::new(Passthrough));
        let events = gate.push_frame(silence_frame(320));
        assert!(events.is_empty());
        assert!(!gate.in_utterance());
    }

    #[test]
    fn speech_opens_utterance_and_forwards() {
        let mut gate = VoiceGate::new(&config(), Box::new(Passthrough));
        let events = gate.push_frame(speech_frame(320));
        assert_eq!(events.len(), 1);
        match &events[0] {
            GateEvent::Chunk(chunk) => {
                assert!(chunk.is_speech);
                assert!(chunk.utterance_id.is_some());
            }
            GateEvent::UtteranceEnd { .. } => panic!("unexpected close"),
        }
        assert!(gate.in_utterance());
    }

    #[test]
    fn sustained_silence_closes_utterance_once() {
        let mut gate = VoiceGate::new(&config(), Box::new(Passthrough));
        gate.push_frame(speech_frame(320));

        // min_silence_ms 100 / chunk_ms 20 = 5 frames to close
        let mut closes = 0;
        for _ in 0..8 {
            for event in gate.push_frame(silence_frame(320)) {
                match event {
                    GateEvent::UtteranceEnd { .. } => closes += 1,
                    GateEvent::Chunk(chunk) => {
                        panic!("silence chunk forwarded: {chunk:?}")
                    }
                }
            }
        }
        assert_eq!(closes, 1);
        assert!(!gate.in_utterance());
    }

    #[test]
    fn brief_silence_keeps_utterance_open() {
        let mut gate = VoiceGate::new(&config(), Box::new(Passthrough));
        gate.push_frame(speech_frame(320));
        gate.push_frame(silence_frame(320));
        gate.push_frame(silence_frame(320));
        assert!(gate.in_utterance());

        // Speech resumes: same utterance continues
        let events = gate.push_frame(speech_frame(320));
        match &events[0] {
            GateEvent::Chunk(chunk) => assert!(chunk.utterance_id.is_some()),
            GateEvent::UtteranceEnd { .. } => panic!("utterance should stay open"),
        }
    }

    #[test]
    fn disabled_gate_forwards_silence_chunks() {
        let mut cfg = config();
        cfg.gate_enabled = false;
        let mut gate = VoiceGate::new(&cfg, Box::new(Passthrough));

        let events = gate.push_frame(silence_frame(320));
        assert_eq!(events.len(), 1);
        match &events[0] {
            GateEvent::Chunk(chunk) => {
                assert!(!chunk.is_speech);
                assert!(chunk.utterance_id.is_none());
            }
            GateEvent::UtteranceEnd { .. } => panic!("unexpected close"),
        }
    }

    #[test]
    fn disabled_gate_flags_the_closing_chunk() {
        let mut cfg = config();
        cfg.gate_enabled = false;
        let mut gate = VoiceGate::new(&cfg, Box::new(Passthrough));
        gate.push_frame(speech_frame(320));

        // min_silence_ms 100 / chunk_ms 20: the fifth silence frame closes
        let mut closing = Vec::new();
        for _ in 0..5 {
            for event in gate.push_frame(silence_frame(320)) {
                if let GateEvent::Chunk(chunk) = event {
                    closing.push(chunk.end_of_utterance);
                }
            }
        }
        assert_eq!(closing, vec![false, false, false, false, true]);
    }

    #[test]
    fn noise_filter_runs_before_classification() {
        struct Muter;
        impl NoiseFilter for Muter {
            fn apply(&mut self, frame: &mut [f32]) {
                frame.fill(0.0);
            }
        }

        let mut gate = VoiceGate::new(&config(), Box::new(Muter));
        // Loud input, but the filter zeroes it: classified as silence
        assert!(gate.push_frame(speech_frame(320)).is_empty());
    }

    #[test]
    fn flush_closes_open_utterance() {
        let mut gate = VoiceGate::new(&config(), Box::new(Passthrough));
        gate.push_frame(speech_frame(320));
        assert!(matches!(
            gate.flush(),
            Some(GateEvent::UtteranceEnd { .. })
        ));
        assert!(gate.flush().is_none());
    }
}
