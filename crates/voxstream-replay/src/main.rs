//! Voxstream Replay - feed a captured server-push transcript through a
//! streaming session and record it as a WAV file

use clap::Parser;
use std::path::{Path, PathBuf};
use tokio::io::AsyncRead;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

mod output;
mod settings;

use settings::Overrides;
use voxstream_core::{
    drive, event_stream, stop_channel, ChannelSink, CollectingSink, DriverOptions, ManualClock,
    MonotonicClock, PlaybackClock, PlaybackSink, SessionReport, StreamConfig, StreamSession,
};

#[derive(Parser, Debug)]
#[command(name = "voxstream", version, about = "Replay a streamed speech transcript into a WAV file")]
struct Cli {
    /// Captured event stream; read from stdin when omitted
    input: Option<PathBuf>,

    /// Where to write the recording
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(long)]
    sample_rate: Option<u32>,

    /// pcm_s16le, pcm_f32le, pcm_mulaw or pcm_alaw
    #[arg(long)]
    encoding: Option<String>,

    /// Buffers held before playback starts
    #[arg(long)]
    preload: Option<usize>,

    /// Longest wait for the next event, in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Pace playback against the wall clock instead of scheduling offline
    #[arg(long)]
    realtime: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voxstream=info,voxstream_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let overrides = Overrides {
        sample_rate: cli.sample_rate,
        encoding: cli.encoding.clone(),
        preload_buffers: cli.preload,
        chunk_timeout_ms: cli.timeout_ms,
    };
    let config = settings::load(cli.config.as_deref(), &overrides)?;
    let path = output_path(&cli, &config);

    info!(
        "Replaying {} as {} at {} Hz into {:?}",
        cli.input
            .as_deref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "stdin".to_string()),
        config.encoding,
        config.sample_rate,
        path
    );

    let input: Box<dyn AsyncRead + Unpin + Send> = match &cli.input {
        Some(file) => Box::new(tokio::fs::File::open(file).await?),
        None => Box::new(tokio::io::stdin()),
    };

    let report = if cli.realtime {
        let clock = MonotonicClock::new();
        let (sink, rx) = ChannelSink::new();
        let player = tokio::spawn(output::run(rx, clock.clone()));
        let result = replay(&config, &path, input, clock, sink).await;
        let played = player.await?;
        info!(
            "Output played {} buffers ({:?}){}",
            played.buffers_played,
            played.played,
            if played.cancelled { ", cancelled" } else { "" }
        );
        result?
    } else {
        replay(&config, &path, input, ManualClock::new(), CollectingSink::new()).await?
    };

    info!(
        "Session {} {:?}: {} chunks, {} skipped, {:?} of audio",
        report.session_id,
        report.termination,
        report.chunks.chunks_accepted,
        report.chunks.chunks_skipped,
        report.duration()
    );
    for fault in &report.faults {
        warn!("Fault: {}", fault);
    }
    if let Some(container) = &report.container {
        info!("Wrote {} samples to {:?}", container.sample_count, path);
    }

    Ok(())
}

/// `--output`, else the input with a `.wav` extension, else a fresh name in
/// the configured output directory.
fn output_path(cli: &Cli, config: &StreamConfig) -> PathBuf {
    if let Some(path) = &cli.output {
        return path.clone();
    }
    match &cli.input {
        Some(input) => input.with_extension("wav"),
        None => config
            .output_dir
            .join(format!("stream-{}.wav", Uuid::new_v4())),
    }
}

async fn replay<C, S>(
    config: &StreamConfig,
    path: &Path,
    input: Box<dyn AsyncRead + Unpin + Send>,
    clock: C,
    sink: S,
) -> anyhow::Result<SessionReport>
where
    C: PlaybackClock,
    S: PlaybackSink,
{
    let mut session = StreamSession::create(config, path, clock, sink)?;
    let (handle, signal) = stop_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted");
            handle.stop();
        }
    });

    match drive(
        &mut session,
        event_stream(input),
        &DriverOptions::from(config),
        signal,
    )
    .await
    {
        Ok(report) => Ok(report),
        Err(e) => {
            if let Some(report) = session.take_report() {
                error!(
                    "Session {} ended early ({:?}) after {} chunks; recording kept at {:?}",
                    report.session_id, report.termination, report.chunks.chunks_accepted, path
                );
            }
            Err(e.into())
        }
    }
}
