//! Streaming session: capture → gate → transport, plus inbound routing and
//! round-trip latency tracking.
//!
//! The session task exclusively owns the sample source and releases it on
//! every exit path, including transport failures.

pub mod latency;
pub mod protocol;
pub mod transport;

use std::time::Duration;

use base64::Engine as _;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub use latency::{LatencyStats, LatencyTracker};
pub use protocol::{ClientMessage, ServerMessage};
pub use transport::{Inbound, LinkState, Transport};

use crate::audio::{Framer, GateEvent, NoiseFilter, SampleSource, VoiceGate};
use crate::config::{AudioConfig, StreamConfig};
use crate::{Error, Result};

/// Events surfaced to the caller while a session is live
#[derive(Debug)]
pub enum StreamEvent {
    /// Transcription update from the endpoint
    Transcription { text: String, is_final: bool },
    /// Assistant response; audio is decoded and ready for playback
    Response {
        text: String,
        audio: Option<Vec<u8>>,
    },
    /// Synthesized audio frame for immediate playback
    SynthesizedAudio(Vec<u8>),
    /// Rolling average latency crossed the configured budget (non-fatal)
    LatencyWarning { average_ms: u64, budget_ms: u64 },
    /// Transport-level error report (non-fatal unless followed by
    /// `Disconnected`)
    TransportError { message: String },
    /// The session ended; reconnection is the caller's responsibility
    Disconnected,
}

enum SessionCommand {
    Mute,
    Unmute,
    LatencyStats {
        respond_to: oneshot::Sender<LatencyStats>,
    },
    Stop {
        respond_to: oneshot::Sender<()>,
    },
}

/// Handle to a running streaming session
pub struct StreamSession {
    ctrl_tx: mpsc::Sender<SessionCommand>,
    join: JoinHandle<()>,
}

impl StreamSession {
    /// Connect to the endpoint and start streaming from the source.
    /// Returns the session handle and the caller's event receiver.
    ///
    /// # Errors
    ///
    /// Returns `Error::Transport` if the connection cannot be established
    pub async fn start(
        endpoint: &str,
        source: Box<dyn SampleSource>,
        filter: Box<dyn NoiseFilter>,
        audio: &AudioConfig,
        stream: &StreamConfig,
    ) -> Result<(Self, mpsc::Receiver<StreamEvent>)> {
        let (transport, inbound_rx) = Transport::connect(endpoint, audio, stream).await?;
        let (ctrl_tx, ctrl_rx) = mpsc::channel(8);
        let (event_tx, event_rx) = mpsc::channel(64);

        let worker = SessionWorker {
            source: Some(source),
            framer: Framer::new(audio.chunk_samples()),
            gate: VoiceGate::new(audio, filter),
            tracker: LatencyTracker::new(
                stream.latency_window,
                Duration::from_millis(stream.max_latency_ms),
            ),
            transport,
            event_tx,
            muted: false,
            was_over_budget: false,
        };
        let join = tokio::spawn(worker.run(ctrl_rx, inbound_rx));

        Ok((Self { ctrl_tx, join }, event_rx))
    }

    /// Drop capture input before the gate; open utterances are closed
    pub async fn mute(&self) {
        let _ = self.ctrl_tx.send(SessionCommand::Mute).await;
    }

    /// Resume feeding capture input to the gate
    pub async fn unmute(&self) {
        let _ = self.ctrl_tx.send(SessionCommand::Unmute).await;
    }

    /// Current round-trip latency figures
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if the session already ended
    pub async fn latency_stats(&self) -> Result<LatencyStats> {
        let (respond_to, rx) = oneshot::channel();
        self.ctrl_tx
            .send(SessionCommand::LatencyStats { respond_to })
            .await
            .map_err(|_| Error::Stream("session ended".to_string()))?;
        rx.await
            .map_err(|_| Error::Stream("session ended".to_string()))
    }

    /// Stop the session, releasing the capture source and closing the link
    ///
    /// # Errors
    ///
    /// Returns `Error::Stream` if the session already ended
    pub async fn stop(self) -> Result<()> {
        let (respond_to, rx) = oneshot::channel();
        if self
            .ctrl_tx
            .send(SessionCommand::Stop { respond_to })
            .await
            .is_err()
        {
            // Worker already gone; nothing left to release
            self.join.abort();
            return Ok(());
        }
        rx.await
            .map_err(|_| Error::Stream("session ended".to_string()))
    }
}

struct SessionWorker {
    source: Option<Box<dyn SampleSource>>,
    framer: Framer,
    gate: VoiceGate,
    tracker: LatencyTracker,
    transport: Transport,
    event_tx: mpsc::Sender<StreamEvent>,
    muted: bool,
    was_over_budget: bool,
}

impl SessionWorker {
    async fn run(
        mut self,
        mut ctrl_rx: mpsc::Receiver<SessionCommand>,
        mut inbound_rx: mpsc::Receiver<Inbound>,
    ) {
        loop {
            tokio::select! {
                cmd = ctrl_rx.recv() => {
                    match cmd {
                        Some(SessionCommand::Mute) => {
                            self.muted = true;
                            self.framer.clear();
                            if let Some(GateEvent::UtteranceEnd { utterance_id }) = self.gate.flush() {
                                let _ = self.transport.send_end_of_utterance(utterance_id).await;
                            }
                        }
                        Some(SessionCommand::Unmute) => self.muted = false,
                        Some(SessionCommand::LatencyStats { respond_to }) => {
                            let _ = respond_to.send(self.tracker.stats());
                        }
                        Some(SessionCommand::Stop { respond_to }) => {
                            self.teardown(false).await;
                            let _ = respond_to.send(());
                            return;
                        }
                        None => {
                            self.teardown(false).await;
                            return;
                        }
                    }
                }
                block = next_block(&mut self.source) => {
                    match block {
                        Ok(Some(block)) => {
                            if !self.muted && self.forward_block(&block).await.is_err() {
                                self.teardown(true).await;
                                return;
                            }
                        }
                        Ok(None) => {
                            // Source exhausted: close any open utterance and
                            // keep serving inbound traffic until stopped
                            tracing::debug!("sample source ended");
                            if let Some(GateEvent::UtteranceEnd { utterance_id }) = self.gate.flush() {
                                let _ = self.transport.send_end_of_utterance(utterance_id).await;
                            }
                            self.source = None;
                        }
                        Err(e) => {
                            tracing::error!(error = %e, "sample source failed");
                            let _ = self
                                .event_tx
                                .send(StreamEvent::TransportError {
                                    message: e.to_string(),
                                })
                                .await;
                            self.teardown(true).await;
                            return;
                        }
                    }
                }
                inbound = inbound_rx.recv() => {
                    match inbound {
                        Some(Inbound::Message(message)) => self.handle_message(message).await,
                        Some(Inbound::Audio(payload)) => {
                            let _ = self
                                .event_tx
                                .send(StreamEvent::SynthesizedAudio(payload))
                                .await;
                        }
                        Some(Inbound::Failed(message)) => {
                            tracing::warn!(message = %message, "transport failed");
                            let _ = self
                                .event_tx
                                .send(StreamEvent::TransportError { message })
                                .await;
                            self.teardown(true).await;
                            return;
                        }
                        Some(Inbound::Closed) | None => {
                            self.teardown(true).await;
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Frame the block, run it through the gate, ship what survives
    async fn forward_block(&mut self, block: &[f32]) -> Result<()> {
        for frame in self.framer.push(block) {
            for event in self.gate.push_frame(frame) {
                match event {
                    GateEvent::Chunk(chunk) => {
                        self.tracker.chunk_sent(chunk.id, chunk.captured_at);
                        self.transport.send_chunk(&chunk).await?;
                    }
                    GateEvent::UtteranceEnd { utterance_id } => {
                        self.transport.send_end_of_utterance(utterance_id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn handle_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Transcription { text, is_final } => {
                let _ = self
                    .event_tx
                    .send(StreamEvent::Transcription { text, is_final })
                    .await;
            }
            ServerMessage::Response { text, audio } => {
                let audio = audio.and_then(|b64| {
                    base64::engine::general_purpose::STANDARD
                        .decode(b64)
                        .map_err(|e| {
                            tracing::warn!(error = %e, "undecodable response audio");
                        })
                        .ok()
                });
                let _ = self
                    .event_tx
                    .send(StreamEvent::Response { text, audio })
                    .await;
            }
            ServerMessage::Latency { chunk_id, latency_ms } => {
                self.observe_latency(chunk_id, latency_ms).await;
            }
            ServerMessage::Error { message } => {
                tracing::warn!(message = %message, "endpoint reported error");
                let _ = self
                    .event_tx
                    .send(StreamEvent::TransportError { message })
                    .await;
            }
        }
    }

    /// Record the round trip and raise a warning on budget crossings
    async fn observe_latency(&mut self, chunk_id: Uuid, reported_ms: u64) {
        let Some(rtt) = self.tracker.observe(chunk_id) else {
            tracing::trace!(chunk_id = %chunk_id, reported_ms, "latency report for unknown chunk");
            return;
        };
        tracing::trace!(
            chunk_id = %chunk_id,
            rtt_ms = u64::try_from(rtt.as_millis()).unwrap_or(u64::MAX),
            reported_ms,
            "round trip observed"
        );

        let over = self.tracker.over_budget();
        if over && !self.was_over_budget {
            let stats = self.tracker.stats();
            let budget_ms =
                u64::try_from(self.tracker.budget().as_millis()).unwrap_or(u64::MAX);
            tracing::warn!(
                average_ms = stats.average_ms,
                budget_ms,
                "rolling latency over budget"
            );
            let _ = self
                .event_tx
                .send(StreamEvent::LatencyWarning {
                    average_ms: stats.average_ms,
                    budget_ms,
                })
                .await;
        }
        self.was_over_budget = over;
    }

    /// Release the capture source, discard buffered state, close the link
    async fn teardown(&mut self, notify: bool) {
        if let Some(source) = self.source.take() {
            drop(source);
            tracing::debug!("capture source released");
        }
        self.framer.clear();
        let _ = self.gate.flush();
        self.tracker.clear_pending();
        self.transport.close().await;

        if notify {
            let _ = self.event_tx.send(StreamEvent::Disconnected).await;
        }
    }
}

/// Pull the next block from the source, or park forever once it has ended
async fn next_block(source: &mut Option<Box<dyn SampleSource>>) -> Result<Option<Vec<f32>>> {
    match source.as_mut() {
        Some(source) => source.next_block().await,
        None => std::future::pending().await,
    }
}
