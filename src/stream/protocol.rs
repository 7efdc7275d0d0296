//! Wire messages exchanged with the remote streaming endpoint.
//!
//! Outbound control messages are JSON text frames; each chunk's metadata
//! message is immediately followed by one binary frame carrying the PCM
//! payload. Inbound binary frames are synthesized audio.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// JSON messages sent to the remote endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Sent once on connect, before any audio
    Config {
        sample_rate: u32,
        channels: u16,
        encoding: String,
    },
    /// Chunk metadata; the binary payload follows as the next frame
    Chunk {
        chunk_id: Uuid,
        utterance_id: Option<Uuid>,
        /// Wall-clock capture time in epoch milliseconds
        timestamp_ms: i64,
        duration_ms: u64,
        speech: bool,
        end_of_utterance: bool,
    },
    /// Closes an utterance after sustained silence
    EndOfUtterance { utterance_id: Uuid },
}

/// JSON messages received from the remote endpoint, in no guaranteed order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Transcription update for in-flight audio
    Transcription { text: String, is_final: bool },
    /// Assistant response, optionally with synthesized audio (base64)
    Response {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        audio: Option<String>,
    },
    /// Round-trip observation for a chunk we sent
    Latency { chunk_id: Uuid, latency_ms: u64 },
    /// Remote-side error notification
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_message_shape() {
        let msg = ClientMessage::Config {
            sample_rate: 16_000,
            channels: 1,
            encoding: "pcm_s16le".to_string(),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"config\""));
        assert!(json.contains("\"sample_rate\":16000"));
    }

    #[test]
    fn chunk_metadata_round_trips() {
        let msg = ClientMessage::Chunk {
            chunk_id: Uuid::nil(),
            utterance_id: Some(Uuid::nil()),
            timestamp_ms: 1_700_000_000_000,
            duration_ms: 20,
            speech: true,
            end_of_utterance: false,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"chunk\""));
        let parsed: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn transcription_deserializes() {
        let json = r#"{"type":"transcription","text":"hello","is_final":false}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Transcription {
                text: "hello".to_string(),
                is_final: false
            }
        );
    }

    #[test]
    fn response_audio_is_optional() {
        let json = r#"{"type":"response","text":"hi there"}"#;
        let msg: ServerMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ServerMessage::Response { audio: None, .. }));
    }

    #[test]
    fn latency_report_deserializes() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"type":"latency","chunk_id":"{id}","latency_ms":85}}"#);
        let msg: ServerMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(
            msg,
            ServerMessage::Latency {
                chunk_id: id,
                latency_ms: 85
            }
        );
    }
}
