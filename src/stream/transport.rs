//! WebSocket transport: message-framed duplex link to the remote streaming
//! endpoint.
//!
//! Sends are owned by the session; receives are pumped by a reader task into
//! a channel so the session can select over them. The transport never
//! reconnects on its own.

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::protocol::{ClientMessage, ServerMessage};
use crate::audio::AudioChunk;
use crate::config::{AudioConfig, StreamConfig};
use crate::{Error, Result};

type WsSink = futures::stream::SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

/// Frames arriving from the remote endpoint
#[derive(Debug)]
pub enum Inbound {
    /// Parsed JSON control message
    Message(ServerMessage),
    /// Synthesized audio for immediate playback
    Audio(Vec<u8>),
    /// Remote closed the connection
    Closed,
    /// The link failed mid-stream
    Failed(String),
}

/// Send half of the duplex link
pub struct Transport {
    sink: WsSink,
    state: LinkState,
    reader: JoinHandle<()>,
}

impl Transport {
    /// Connect, send the config message, and start the reader task
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection or the config send fails
    pub async fn connect(
        endpoint: &str,
        audio: &AudioConfig,
        stream: &StreamConfig,
    ) -> Result<(Self, mpsc::Receiver<Inbound>)> {
        tracing::debug!(endpoint, "connecting to streaming endpoint");
        let (socket, _response) = tokio_tungstenite::connect_async(endpoint)
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;
        let (sink, mut source) = socket.split();

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let inbound = match frame {
                    Ok(Message::Text(text)) => match serde_json::from_str(text.as_str()) {
                        Ok(message) => Inbound::Message(message),
                        Err(e) => {
                            tracing::warn!(error = %e, "unparseable message from endpoint");
                            continue;
                        }
                    },
                    Ok(Message::Binary(payload)) => Inbound::Audio(payload.to_vec()),
                    Ok(Message::Close(_)) => Inbound::Closed,
                    Ok(_) => continue,
                    Err(e) => Inbound::Failed(e.to_string()),
                };
                let stop = matches!(inbound, Inbound::Closed | Inbound::Failed(_));
                if inbound_tx.send(inbound).await.is_err() || stop {
                    break;
                }
            }
        });

        let mut transport = Self {
            sink,
            state: LinkState::Connecting,
            reader,
        };
        transport
            .send_json(&ClientMessage::Config {
                sample_rate: audio.sample_rate,
                channels: 1,
                encoding: stream.encoding.clone(),
            })
            .await?;
        transport.state = LinkState::Connected;
        tracing::info!(endpoint, "streaming endpoint connected");

        Ok((transport, inbound_rx))
    }

    /// Current lifecycle state
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// Send one chunk: metadata message, then the binary payload
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` on send failure; the link is then marked
    /// errored
    pub async fn send_chunk(&mut self, chunk: &AudioChunk) -> Result<()> {
        self.send_json(&ClientMessage::Chunk {
            chunk_id: chunk.id,
            utterance_id: chunk.utterance_id,
            timestamp_ms: chunk.captured_wall.timestamp_millis(),
            duration_ms: u64::try_from(chunk.duration.as_millis()).unwrap_or(u64::MAX),
            speech: chunk.is_speech,
            end_of_utterance: chunk.end_of_utterance,
        })
        .await?;

        let sent = self.sink.send(Message::Binary(chunk.to_s16le().into())).await;
        sent.map_err(|e| self.fail(e))
    }

    /// Close out an utterance
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` on send failure
    pub async fn send_end_of_utterance(&mut self, utterance_id: Uuid) -> Result<()> {
        self.send_json(&ClientMessage::EndOfUtterance { utterance_id })
            .await
    }

    /// Close the link and stop the reader task; idempotent
    pub async fn close(&mut self) {
        if self.state == LinkState::Disconnected {
            return;
        }
        let _ = self.sink.send(Message::Close(None)).await;
        let _ = self.sink.close().await;
        self.reader.abort();
        self.state = LinkState::Disconnected;
        tracing::debug!("streaming endpoint disconnected");
    }

    async fn send_json(&mut self, message: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(message)?;
        let sent = self.sink.send(Message::Text(json.into())).await;
        sent.map_err(|e| self.fail(e))
    }

    fn fail(&mut self, e: tokio_tungstenite::tungstenite::Error) -> Error {
        self.state = LinkState::Error;
        Error::Transport(e.to_string())
    }
}
