//! pulse-logd - log aggregator for the telemetry servers
//!
//! Creates the server FIFOs, holds their read ends open and appends every
//! record to a timestamped file per channel.
//!
//! # Usage
//!
//! ```bash
//! # Foreground, default channels, files under ~/.local/state/pulse
//! pulse-logd
//!
//! # Background, files under /var/log
//! pulse-logd -d --log-dir /var/log
//! ```

use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulse_logd::{Aggregator, AggregatorConfig};
use pulsed::lifecycle::spawn_signal_listener;

/// pulse log aggregator
#[derive(Parser, Debug)]
#[command(name = "pulse-logd", version, about)]
struct Args {
    /// TOML file with a [logd] table
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for the log files
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Delay between drain passes in milliseconds
    #[arg(long)]
    poll_ms: Option<u64>,

    /// Run as a background daemon (fork to background)
    #[arg(short = 'd', long)]
    daemon: bool,
}

fn state_dir() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("pulse")
}

fn pid_file_path() -> PathBuf {
    state_dir().join("pulse-logd.pid")
}

fn read_pid() -> Option<u32> {
    let mut file = File::open(pid_file_path()).ok()?;
    let mut contents = String::new();
    file.read_to_string(&mut contents).ok()?;
    contents.trim().parse().ok()
}

fn write_pid() -> Result<()> {
    let path = pid_file_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).context("Failed to create state directory")?;
    }
    let mut file = File::create(&path).context("Failed to create PID file")?;
    write!(file, "{}", process::id()).context("Failed to write PID")?;
    Ok(())
}

fn remove_pid_file() {
    let _ = fs::remove_file(pid_file_path());
}

/// Signal 0 probes for the process without delivering anything.
fn is_process_running(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill with signal 0 performs only the existence and permission check.
    if unsafe { libc::kill(pid, 0) } == 0 {
        return true;
    }
    // EPERM: the process exists but belongs to another user.
    std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

fn is_running() -> Option<u32> {
    let pid = read_pid()?;
    if is_process_running(pid) {
        return Some(pid);
    }
    remove_pid_file();
    None
}

fn load_config(args: &Args) -> Result<AggregatorConfig> {
    let mut config = match &args.config {
        Some(path) => AggregatorConfig::from_file(path)?,
        None => AggregatorConfig::default(),
    };
    config = config.with_env(|key| std::env::var(key).ok());

    if let Some(dir) = &args.log_dir {
        config.log_dir = dir.clone();
    }
    if let Some(ms) = args.poll_ms {
        config.poll_interval_ms = ms;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    if let Some(pid) = is_running() {
        eprintln!("pulse-logd is already running (PID {pid})");
        process::exit(1);
    }

    if args.daemon {
        daemonize()?;
    }

    write_pid()?;
    let result = run_aggregator(config);
    remove_pid_file();

    result
}

fn daemonize() -> Result<()> {
    use daemonize::Daemonize;

    let dir = state_dir();
    fs::create_dir_all(&dir).context("Failed to create state directory")?;

    let log_path = dir.join("pulse-logd.log");
    let stdout = File::create(&log_path).context("Failed to create log file for stdout")?;
    let stderr = stdout
        .try_clone()
        .context("Failed to create log file for stderr")?;

    Daemonize::new()
        .working_directory("/")
        .stdout(stdout)
        .stderr(stderr)
        .start()
        .context("Failed to daemonize")?;

    Ok(())
}

#[tokio::main]
async fn run_aggregator(config: AggregatorConfig) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pulse_logd=info".parse()?)
                .add_directive("pulse_protocol=info".parse()?),
        )
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        log_dir = %config.log_dir.display(),
        channels = config.channels.len(),
        "pulse log aggregator starting"
    );

    let cancel_token = CancellationToken::new();
    let _signals = spawn_signal_listener(cancel_token.clone());

    let aggregator = Aggregator::open(config).context("Failed to open log channels")?;

    match aggregator.run(cancel_token).await {
        Ok(summary) => {
            for channel in summary {
                info!(
                    channel = %channel.name,
                    records = channel.records,
                    file = %channel.file.display(),
                    "Channel closed"
                );
            }
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Aggregator error");
            Err(e.into())
        }
    }
}
