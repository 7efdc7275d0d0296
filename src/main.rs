use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cadence_engine::audio::{
    Framer, GateEvent, Passthrough, SampleSource, VoiceGate, WavFileSource,
};
use cadence_engine::{Config, Engine, LoopbackFactory, Priority, StreamEvent, WorkKind};

/// Cadence - task scheduling and voice streaming engine for AI assistants
#[derive(Parser)]
#[command(name = "cadence", version, about)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "CADENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream audio to a remote endpoint and print what comes back
    Run {
        /// WebSocket endpoint, e.g. ws://localhost:9800/stream
        #[arg(short, long, env = "CADENCE_ENDPOINT")]
        endpoint: String,

        /// Stream this WAV file instead of the microphone
        #[arg(long)]
        wav: Option<PathBuf>,
    },
    /// Run a WAV file through the voice gate and report utterances
    ProbeGate {
        /// Mono WAV file to analyze
        wav: PathBuf,
    },
    /// Exercise the pool with loopback tasks and print metrics
    Bench {
        /// Number of tasks to submit
        #[arg(short, long, default_value = "100")]
        tasks: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,cadence_engine=info",
        1 => "info,cadence_engine=debug",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = match cli.config {
        Some(path) => Config::load(&path)?,
        None => Config::default(),
    };

    match cli.command {
        Command::Run { endpoint, wav } => run_stream(config, &endpoint, wav).await,
        Command::ProbeGate { wav } => probe_gate(&config, &wav).await,
        Command::Bench { tasks } => bench(config, tasks).await,
    }
}

async fn run_stream(
    config: Config,
    endpoint: &str,
    wav: Option<PathBuf>,
) -> anyhow::Result<()> {
    let source: Box<dyn SampleSource> = match wav {
        Some(path) => Box::new(WavFileSource::open(
            &path,
            config.audio.chunk_samples(),
            true,
        )?),
        None => open_microphone()?,
    };

    let mut engine = Engine::start(config, Arc::new(LoopbackFactory)).await?;
    let mut events = engine.start_stream(endpoint, source).await?;

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(StreamEvent::Transcription { text, is_final }) => {
                        let marker = if is_final { "" } else { " …" };
                        println!("> {text}{marker}");
                    }
                    Some(StreamEvent::Response { text, audio }) => {
                        println!("< {text}");
                        if let Some(audio) = audio {
                            tracing::info!(bytes = audio.len(), "response audio received");
                        }
                    }
                    Some(StreamEvent::SynthesizedAudio(payload)) => {
                        tracing::info!(bytes = payload.len(), "synthesized audio received");
                    }
                    Some(StreamEvent::LatencyWarning { average_ms, budget_ms }) => {
                        eprintln!("latency warning: avg {average_ms}ms over budget {budget_ms}ms");
                    }
                    Some(StreamEvent::TransportError { message }) => {
                        eprintln!("transport error: {message}");
                    }
                    Some(StreamEvent::Disconnected) | None => {
                        eprintln!("stream ended");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted, stopping stream");
                engine.stop_stream().await?;
                break;
            }
        }
    }

    let stats = engine.latency_stats().await.unwrap_or_default();
    tracing::info!(
        current_ms = stats.current_ms,
        average_ms = stats.average_ms,
        max_ms = stats.max_ms,
        "final latency figures"
    );
    engine.shutdown().await?;
    Ok(())
}

#[cfg(feature = "hardware-capture")]
fn open_microphone() -> anyhow::Result<Box<dyn SampleSource>> {
    Ok(Box::new(cadence_engine::audio::MicSource::open()?))
}

#[cfg(not(feature = "hardware-capture"))]
fn open_microphone() -> anyhow::Result<Box<dyn SampleSource>> {
    anyhow::bail!(
        "built without hardware-capture; pass --wav or rebuild with --features hardware-capture"
    )
}

async fn probe_gate(config: &Config, wav: &PathBuf) -> anyhow::Result<()> {
    let mut source = WavFileSource::open(wav, config.audio.chunk_samples(), false)?;
    let mut framer = Framer::new(config.audio.chunk_samples());
    let mut gate = VoiceGate::new(&config.audio, Box::new(Passthrough));

    let mut samples = 0usize;
    let mut speech_chunks = 0usize;
    let mut utterances = 0usize;

    while let Some(block) = source.next_block().await? {
        samples += block.len();
        for frame in framer.push(&block) {
            for event in gate.push_frame(frame) {
                match event {
                    GateEvent::Chunk(chunk) => {
                        if chunk.is_speech {
                            speech_chunks += 1;
                        }
                    }
                    GateEvent::UtteranceEnd { utterance_id } => {
                        utterances += 1;
                        println!("utterance {utterance_id} closed");
                    }
                }
            }
        }
    }
    if gate.flush().is_some() {
        utterances += 1;
    }

    println!("samples read: {samples}");
    println!("speech chunks forwarded: {speech_chunks}");
    println!("utterances: {utterances}");
    Ok(())
}

async fn bench(config: Config, tasks: usize) -> anyhow::Result<()> {
    let engine = Engine::start(config, Arc::new(LoopbackFactory)).await?;

    let started = std::time::Instant::now();
    let mut handles = Vec::with_capacity(tasks);
    for i in 0..tasks {
        let payload = serde_json::json!({ "seq": i });
        handles.push(engine.submit(
            WorkKind::EdgeProcessing,
            payload,
            Priority::Normal,
            None,
        ));
    }
    let results = futures::future::join_all(handles).await;
    let ok = results.iter().filter(|r| r.is_ok()).count();
    let elapsed = started.elapsed();

    let metrics = engine.metrics().await?;
    println!("{ok}/{tasks} tasks resolved in {elapsed:?}");
    println!(
        "throughput {:.1}/s, avg processing {:.2}ms, utilization {:.0}%",
        metrics.throughput,
        metrics.avg_processing_ms,
        metrics.utilization * 100.0
    );
    for unit in engine.unit_status().await? {
        println!(
            "unit {} {:?} {:?} completed={}",
            unit.id, unit.kind, unit.state, unit.completed
        );
    }

    engine.shutdown().await?;
    Ok(())
}
