//! `bender` daemon entry point.
//!
//! Loads settings, applies command-line overrides, and runs the voice
//! activity pipeline either against the live microphone until Ctrl-C or
//! once over a WAV file.

mod settings;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use bender_core::{
    audio::device::list_input_devices, ipc::PublisherSink, DetectorKind, Engine, Metrics,
    PipelineConfig,
};
use clap::{Parser, Subcommand, ValueEnum};
use settings::{load_settings, normalize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Bender - real-time voice activity detection daemon
#[derive(Parser)]
#[command(name = "bender", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Settings file (TOML); defaults to $XDG_CONFIG_HOME/bender/bender.toml
    #[arg(short, long, env = "BENDER_CONFIG")]
    config: Option<PathBuf>,

    /// Capture device name
    #[arg(short, long, env = "BENDER_DEVICE")]
    device: Option<String>,

    /// Process a WAV file instead of the live microphone
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Detector aggressiveness, 0 (least strict) to 3 (most strict)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=3))]
    aggressiveness: Option<u8>,

    /// Detector backend
    #[arg(long, value_enum)]
    detector: Option<DetectorArg>,

    /// Where decisions and metrics are published
    #[arg(long, value_enum)]
    sink: Option<SinkArg>,

    /// Bypass the high-pass filter
    #[arg(long)]
    no_highpass: bool,

    /// Bypass the limiter
    #[arg(long)]
    no_limiter: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// List audio input devices
    ListDevices,
    /// Print the effective configuration as TOML
    PrintConfig,
}

#[derive(Clone, Copy, ValueEnum)]
enum DetectorArg {
    Earshot,
    Energy,
}

impl From<DetectorArg> for DetectorKind {
    fn from(arg: DetectorArg) -> Self {
        match arg {
            DetectorArg::Earshot => DetectorKind::Earshot,
            DetectorArg::Energy => DetectorKind::Energy,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum SinkArg {
    Stdout,
    Log,
}

impl From<SinkArg> for PublisherSink {
    fn from(arg: SinkArg) -> Self {
        match arg {
            SinkArg::Stdout => PublisherSink::Stdout,
            SinkArg::Log => PublisherSink::Log,
        }
    }
}

impl Cli {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(device) = &self.device {
            config.device = Some(device.clone());
        }
        if let Some(level) = self.aggressiveness {
            config.aggressiveness = level;
        }
        if let Some(detector) = self.detector {
            config.detector = detector.into();
        }
        if let Some(sink) = self.sink {
            config.publisher.sink = sink.into();
        }
        if self.no_highpass {
            config.highpass_enabled = false;
        }
        if self.no_limiter {
            config.limiter_enabled = false;
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = match cli.verbose {
        0 => "info,bender=info,bender_core=info",
        1 => "info,bender=debug,bender_core=debug",
        _ => "trace",
    };
    // stdout carries published messages; logs go to stderr
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = load_settings(cli.config.as_deref())?;
    cli.apply(&mut config);
    normalize(&mut config);

    match cli.command {
        Some(Command::ListDevices) => {
            list_devices(&config);
            return Ok(());
        }
        Some(Command::PrintConfig) => {
            print!("{}", toml::to_string_pretty(&config)?);
            return Ok(());
        }
        None => {}
    }

    match cli.input {
        Some(path) => run_file(config, path).await,
        None => run_live(config).await,
    }
}

/// `*` marks the system default, `+` a device that advertises the
/// configured rate and channel count.
fn list_devices(config: &PipelineConfig) {
    let devices = list_input_devices();
    if devices.is_empty() {
        println!("no input devices found");
        return;
    }
    for device in devices {
        let default = if device.is_default { "*" } else { " " };
        let usable = if device.supports(config.native_sample_rate, config.channels) {
            "+"
        } else {
            " "
        };
        let rates = device
            .rate_ranges
            .iter()
            .map(|(lo, hi)| {
                if lo == hi {
                    lo.to_string()
                } else {
                    format!("{lo}-{hi}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "{default}{usable} {}  (up to {} ch, {rates} Hz)",
            device.name, device.max_channels
        );
    }
}

async fn run_file(config: PipelineConfig, path: PathBuf) -> anyhow::Result<()> {
    let engine = Engine::new(config).context("invalid configuration")?;
    let metrics = tokio::task::spawn_blocking(move || engine.run_offline(&path))
        .await
        .context("offline run panicked")??;
    log_summary(&metrics);
    Ok(())
}

async fn run_live(config: PipelineConfig) -> anyhow::Result<()> {
    let engine = Arc::new(Engine::new(config).context("invalid configuration")?);

    let mut status = engine.subscribe_status();
    tokio::spawn(async move {
        while let Ok(event) = status.recv().await {
            match event.detail.as_deref() {
                Some(detail) => info!(status = ?event.status, "engine status: {detail}"),
                None => info!(status = ?event.status, "engine status"),
            }
        }
    });

    engine.start().context("starting capture")?;
    info!("listening; press Ctrl-C to stop");

    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to wait for Ctrl-C: {e}");
    }
    info!("shutting down");

    let stopping = Arc::clone(&engine);
    let metrics = tokio::task::spawn_blocking(move || stopping.stop())
        .await
        .context("shutdown panicked")??;
    log_summary(&metrics);
    Ok(())
}

fn log_summary(metrics: &Metrics) {
    info!(
        blocks = metrics.blocks_processed,
        frames = metrics.frames_total,
        voice_pct = format_args!("{:.1}", metrics.voice_ratio()),
        avg_latency_ms = format_args!("{:.2}", metrics.avg_latency_ms),
        max_latency_ms = format_args!("{:.2}", metrics.max_latency_ms),
        blocks_dropped = metrics.blocks_dropped,
        overruns = metrics.overruns,
        decisions_dropped = metrics.decisions_dropped,
        "session summary"
    );
}
