//! # HoTT Link
//!
//! Command line front end for HoTT telemetry.
//!
//! - `replay` decodes a stored capture and prints one JSON object per sample
//! - `listen` polls a live receiver and its sensors until Ctrl+C
//! - `sd-list`, `sd-get` and `sd-put` move files on the transmitter's SD card
//! - `tx-info` prints the connected transmitter's name

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::{interval, Duration};
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use hott_link::capture::{CaptureReader, JsonLinesSink};
use hott_link::config::{Config, LoggingConfig};
use hott_link::error::HottError;
use hott_link::hott::protocol::SensorType;
use hott_link::serial::monitor::LiveMonitor;
use hott_link::serial::transfer::TransferProgress;
use hott_link::serial::LinkSession;

/// Pause between two live query rounds
const LISTEN_PERIOD_MS: u64 = 200;

/// Cycles between status log messages while listening
const LOG_INTERVAL_CYCLES: u64 = 50;

#[derive(Debug, Parser)]
#[command(name = "hott-link", version, about = "HoTT telemetry decoder and serial link tool")]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Decode a stored capture to JSON lines on stdout
    Replay {
        capture: PathBuf,
    },
    /// Poll the live link until Ctrl+C, printing JSON lines
    Listen {
        /// Extra sensors to poll (vario, gps, gam, eam, esc, channels)
        #[arg(short, long, value_parser = parse_sensor)]
        sensor: Vec<SensorType>,
    },
    /// List a directory of the transmitter's SD card
    SdList {
        #[arg(default_value = "/")]
        dir: String,
    },
    /// Copy a file from the SD card to the host
    SdGet {
        dir: String,
        name: String,
        /// Destination; defaults to the file name in the current directory
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Copy a host file onto the SD card
    SdPut {
        file: PathBuf,
        dir: String,
    },
    /// Print the connected transmitter's name
    TxInfo,
}

fn parse_sensor(name: &str) -> std::result::Result<SensorType, String> {
    SensorType::from_detected_name(name).ok_or_else(|| format!("unknown sensor {:?}", name))
}

/// Install the stderr subscriber and, if configured, a daily log file
///
/// The returned guard flushes the file writer when dropped.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter = || -> Result<EnvFilter> {
        Ok(EnvFilter::from_default_env().add_directive(logging.level.parse().context("Invalid log level")?))
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter()?);

    let Some(file) = &logging.file else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return Ok(None);
    };

    let dir = file.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let prefix = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "hott-link.log".to_string());
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, prefix));
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(writer)
        .with_filter(filter()?);

    tracing_subscriber::registry().with(stderr_layer).with(file_layer).init();
    Ok(Some(guard))
}

/// Set `flag` on the first Ctrl+C
fn interrupt_on_ctrl_c(flag: Arc<AtomicBool>) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            flag.store(true, Ordering::Relaxed);
        }
    });
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("Failed to load {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn print_progress(progress: TransferProgress) {
    eprint!("\r{:3}% ({} bytes left)", progress.percent(), progress.remaining);
}

/// Main entry point for the HoTT Link tool
///
/// # Errors
///
/// Returns error if:
/// - The configuration file is invalid
/// - No serial device can be opened for a live command
/// - A capture cannot be read, or a transfer fails
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let _guard = init_logging(&config.logging)?;

    info!("HoTT Link v{} starting...", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Command::Replay { capture } => replay(&config, capture).await,
        Command::Listen { sensor } => listen(&config, &sensor).await,
        Command::SdList { dir } => sd_list(&config, &dir).await,
        Command::SdGet { dir, name, out } => sd_get(&config, &dir, &name, out).await,
        Command::SdPut { file, dir } => sd_put(&config, &file, &dir).await,
        Command::TxInfo => {
            let mut session = LinkSession::open(&config)?;
            let name = session.query_tx_info().await?;
            println!("{}", name);
            Ok(())
        }
    }
}

async fn replay(config: &Config, capture: PathBuf) -> Result<()> {
    let reader = CaptureReader::open(&capture, &config.decoder)
        .with_context(|| format!("Failed to open capture {}", capture.display()))?;
    interrupt_on_ctrl_c(reader.interrupt_handle());

    let channels = config.decoder.channels_enabled;
    let percent = config.decoder.channel_percent_enabled;
    let summary = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let mut sink = JsonLinesSink::new(stdout.lock(), channels, percent);
        reader.replay(&mut sink)
    })
    .await
    .context("Replay task failed")??;

    info!(
        "Replayed {} samples, {:.1}% package loss",
        summary.samples,
        summary.loss.percentage.unwrap_or(0.0)
    );
    Ok(())
}

async fn listen(config: &Config, extra: &[SensorType]) -> Result<()> {
    let mut session = LinkSession::open(config)?;
    info!("HoTT link opened at: {}", session.device_path());
    interrupt_on_ctrl_c(session.interrupt_handle());

    let mut sensors = vec![config.link.sensor];
    sensors.extend_from_slice(extra);
    let mut monitor = LiveMonitor::new(&config.decoder, session.variant(), &sensors);

    let stdout = std::io::stdout();
    let mut sink = JsonLinesSink::new(stdout.lock(), config.decoder.channels_enabled, config.decoder.channel_percent_enabled);
    let mut tick = interval(Duration::from_millis(LISTEN_PERIOD_MS));

    info!("Press Ctrl+C to exit");
    let outcome = loop {
        tick.tick().await;
        match monitor.cycle(&mut session, &mut sink).await {
            Ok(()) => {
                if monitor.cycles() % LOG_INTERVAL_CYCLES == 0 {
                    info!(
                        "{} cycles, {}% loss in window, {} session errors",
                        monitor.cycles(),
                        monitor.loss().current_percentage(),
                        session.error_count()
                    );
                }
            }
            Err(HottError::Interrupted) => break Ok(()),
            Err(e) => {
                error!("Live session aborted: {}", e);
                break Err(e);
            }
        }
    };

    monitor.finish(&mut sink)?;
    Ok(outcome?)
}

async fn sd_list(config: &Config, dir: &str) -> Result<()> {
    let mut session = LinkSession::open(config)?;
    session.prepare_sd_card().await?;
    let sizes = session.query_sd_sizes().await?;
    let listing = session.list_dir(dir).await?;

    for folder in &listing.folders {
        println!("{}/", folder);
    }
    for file in &listing.files {
        println!("{:>10}  {} {}  {}", file.size, file.date, file.time, file.name);
    }
    println!("{} kB free of {} kB", sizes.free_kb, sizes.total_kb);
    Ok(())
}

async fn sd_get(config: &Config, dir: &str, name: &str, out: Option<PathBuf>) -> Result<()> {
    let mut session = LinkSession::open(config)?;
    interrupt_on_ctrl_c(session.interrupt_handle());
    session.prepare_sd_card().await?;

    let target = out.unwrap_or_else(|| PathBuf::from(name));
    let mut file = std::fs::File::create(&target).with_context(|| format!("Failed to create {}", target.display()))?;
    let written = session.upload_file(dir, name, &mut file, print_progress).await?;
    eprintln!();
    info!("Saved {} bytes to {}", written, target.display());
    Ok(())
}

async fn sd_put(config: &Config, file: &Path, dir: &str) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let name = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("Source path has no file name")?;

    let mut session = LinkSession::open(config)?;
    interrupt_on_ctrl_c(session.interrupt_handle());
    session.prepare_sd_card().await?;
    session.download_file(dir, &name, &data, print_progress).await?;
    eprintln!();
    info!("Stored {} ({} bytes) in {}", name, data.len(), dir);
    Ok(())
}
