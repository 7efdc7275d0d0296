//! Audio sources: where samples come from.
//!
//! The gate and streaming session only ever see the [`SampleSource`] trait,
//! so they run identically over a live microphone, a WAV file, or scripted
//! test input. Live capture is feature-gated for headless deployments.

use std::path::Path;

use async_trait::async_trait;

use crate::{Error, Result};

/// Sample rate used for speech capture (16kHz)
pub const SAMPLE_RATE: u32 = 16_000;

/// A pull-based stream of mono f32 sample blocks
#[async_trait]
pub trait SampleSource: Send {
    /// Source sample rate in Hz
    fn sample_rate(&self) -> u32;

    /// Next block of samples; `None` signals end of stream. Block sizes are
    /// arbitrary; the session reframes them into fixed-duration chunks.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying source fails
    async fn next_block(&mut self) -> Result<Option<Vec<f32>>>;
}

/// Reads a mono WAV file, optionally paced to real time
pub struct WavFileSource {
    samples: Vec<f32>,
    position: usize,
    block_len: usize,
    sample_rate: u32,
    paced: bool,
}

impl WavFileSource {
    /// Open a WAV file and decode it to f32 samples
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or is not mono
    pub fn open(path: &Path, block_len: usize, paced: bool) -> Result<Self> {
        let mut reader =
            hound::WavReader::open(path).map_err(|e| Error::Audio(e.to_string()))?;
        let spec = reader.spec();
        if spec.channels != 1 {
            return Err(Error::Audio(format!(
                "expected mono input, got {} channels",
                spec.channels
            )));
        }

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Int => {
                let max = f32::from(i16::MAX);
                reader
                    .samples::<i16>()
                    .map(|s| s.map(|v| f32::from(v) / max))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| Error::Audio(e.to_string()))?
            }
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| Error::Audio(e.to_string()))?,
        };

        tracing::debug!(
            path = %path.display(),
            samples = samples.len(),
            sample_rate = spec.sample_rate,
            "wav source opened"
        );

        Ok(Self {
            samples,
            position: 0,
            block_len,
            sample_rate: spec.sample_rate,
            paced,
        })
    }
}

#[async_trait]
impl SampleSource for WavFileSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        if self.position >= self.samples.len() {
            return Ok(None);
        }
        let end = (self.position + self.block_len).min(self.samples.len());

        // Sleep before advancing so a cancelled poll loses no samples
        if self.paced {
            let millis = (end - self.position) as u64 * 1_000 / u64::from(self.sample_rate.max(1));
            tokio::time::sleep(std::time::Duration::from_millis(millis)).await;
        }

        let block = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(block))
    }
}

/// In-memory source for tests and the gate probe: yields queued blocks then
/// ends
pub struct ScriptedSource {
    blocks: std::collections::VecDeque<Vec<f32>>,
    sample_rate: u32,
}

impl ScriptedSource {
    /// Build a source over prepared blocks
    #[must_use]
    pub fn new(blocks: Vec<Vec<f32>>, sample_rate: u32) -> Self {
        Self {
            blocks: blocks.into(),
            sample_rate,
        }
    }
}

#[async_trait]
impl SampleSource for ScriptedSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
        Ok(self.blocks.pop_front())
    }
}

/// Live microphone capture via cpal
#[cfg(feature = "hardware-capture")]
pub use mic::MicSource;

#[cfg(feature = "hardware-capture")]
mod mic {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use cpal::SampleRate;
    use tokio::sync::mpsc;

    use super::{SampleSource, SAMPLE_RATE};
    use crate::{Error, Result};

    /// Captures audio from the default input device.
    ///
    /// The cpal stream is not `Send`, so it lives on a dedicated thread; the
    /// capture callback forwards blocks over a bounded channel and blocks
    /// are dropped rather than buffered when the consumer falls behind.
    pub struct MicSource {
        rx: mpsc::Receiver<Vec<f32>>,
        stop_tx: Option<std::sync::mpsc::Sender<()>>,
    }

    impl MicSource {
        /// Open the default input device at 16kHz mono
        ///
        /// # Errors
        ///
        /// Returns error if no suitable input device or config exists
        pub fn open() -> Result<Self> {
            let (tx, rx) = mpsc::channel::<Vec<f32>>(64);
            let (stop_tx, stop_rx) = std::sync::mpsc::channel::<()>();
            let (init_tx, init_rx) = std::sync::mpsc::channel::<Result<()>>();

            std::thread::Builder::new()
                .name("mic-capture".to_string())
                .spawn(move || {
                    let stream = match build_stream(&tx) {
                        Ok(stream) => {
                            let _ = init_tx.send(Ok(()));
                            stream
                        }
                        Err(e) => {
                            let _ = init_tx.send(Err(e));
                            return;
                        }
                    };
                    if let Err(e) = stream.play() {
                        tracing::error!(error = %e, "failed to start capture stream");
                        return;
                    }
                    // Park until the source is dropped
                    let _ = stop_rx.recv();
                    drop(stream);
                    tracing::debug!("mic capture stopped");
                })
                .map_err(|e| Error::Audio(e.to_string()))?;

            init_rx
                .recv()
                .map_err(|_| Error::Audio("capture thread died".to_string()))??;

            Ok(Self {
                rx,
                stop_tx: Some(stop_tx),
            })
        }
    }

    fn build_stream(tx: &mpsc::Sender<Vec<f32>>) -> Result<cpal::Stream> {
        let host = cpal::default_host();
        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

        let supported = device
            .supported_input_configs()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Audio("no suitable capture config found".to_string()))?;
        let config = supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            "mic capture initialized"
        );

        let tx = tx.clone();
        device
            .build_input_stream(
                &config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if tx.try_send(data.to_vec()).is_err() {
                        tracing::trace!("capture consumer behind, dropping block");
                    }
                },
                |err| {
                    tracing::error!(error = %err, "audio capture error");
                },
                None,
            )
            .map_err(|e| Error::Audio(e.to_string()))
    }

    impl Drop for MicSource {
        fn drop(&mut self) {
            if let Some(stop) = self.stop_tx.take() {
                let _ = stop.send(());
            }
        }
    }

    #[async_trait::async_trait]
    impl SampleSource for MicSource {
        fn sample_rate(&self) -> u32 {
            SAMPLE_RATE
        }

        async fn next_block(&mut self) -> Result<Option<Vec<f32>>> {
            Ok(self.rx.recv().await)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_source_drains_then_ends() {
        let mut source = ScriptedSource::new(vec![vec![0.1; 4], vec![0.2; 4]], SAMPLE_RATE);
        assert_eq!(source.next_block().await.unwrap().unwrap().len(), 4);
        assert_eq!(source.next_block().await.unwrap().unwrap()[0], 0.2);
        assert!(source.next_block().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn wav_source_round_trips_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for i in 0..640 {
            #[allow(clippy::cast_precision_loss)]
            let t = i as f32 / SAMPLE_RATE as f32;
            let sample = (0.4 * (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 32767.0) as i16;
            writer.write_sample(sample).unwrap();
        }
        writer.finalize().unwrap();

        let mut source = WavFileSource::open(&path, 320, false).unwrap();
        assert_eq!(source.sample_rate(), SAMPLE_RATE);

        let mut total = 0;
        while let Some(block) = source.next_block().await.unwrap() {
            assert!(block.len() <= 320);
            total += block.len();
        }
        assert_eq!(total, 640);
    }

    #[tokio::test]
    async fn wav_source_rejects_stereo() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stereo.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: SAMPLE_RATE,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..32 {
            writer.write_sample(0i16).unwrap();
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        assert!(WavFileSource::open(&path, 320, false).is_err());
    }
}
