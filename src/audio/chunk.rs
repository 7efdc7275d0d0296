//! Bounded audio chunks produced by the capture gate.

use std::time::{Duration, Instant};

use uuid::Uuid;

/// A fixed-duration span of captured audio
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Unique chunk identifier
    pub id: Uuid,
    /// Utterance this chunk belongs to, if the gate has one open
    pub utterance_id: Option<Uuid>,
    /// Capture instant, used for round-trip latency arithmetic
    pub captured_at: Instant,
    /// Wall-clock capture time, sent in wire metadata
    pub captured_wall: chrono::DateTime<chrono::Utc>,
    /// Raw mono samples in the range [-1.0, 1.0]
    pub samples: Vec<f32>,
    /// Chunk duration
    pub duration: Duration,
    /// Voice-activity classification for this chunk
    pub is_speech: bool,
    /// Whether this chunk closed its utterance. Only ever set on a forwarded
    /// silence chunk, i.e. when gating is disabled; with gating on, the
    /// boundary is signaled by a dedicated end-of-utterance message instead.
    pub end_of_utterance: bool,
}

impl AudioChunk {
    /// Create a chunk stamped with the current time
    #[must_use]
    pub fn new(
        utterance_id: Option<Uuid>,
        samples: Vec<f32>,
        duration: Duration,
        is_speech: bool,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            utterance_id,
            captured_at: Instant::now(),
            captured_wall: chrono::Utc::now(),
            samples,
            duration,
            is_speech,
            end_of_utterance: false,
        }
    }

    /// Encode samples as little-endian signed 16-bit PCM for the wire
    #[must_use]
    pub fn to_s16le(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.samples.len() * 2);
        for &sample in &self.samples {
            #[allow(clippy::cast_possible_truncation)]
            let value = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            bytes.extend_from_slice(&value.to_le_bytes());
        }
        bytes
    }
}
