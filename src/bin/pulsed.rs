//! pulsed - change-driven telemetry server
//!
//! Runs one of the two telemetry servers. Each tick samples its metrics and,
//! when any value changed, sends a snapshot block to every connected TCP
//! client and a record to the log FIFO.
//!
//! # Usage
//!
//! ```bash
//! # Session time and timezone on port 8080
//! pulsed time
//!
//! # Memory and CPU time on port 8081, logging to a custom FIFO
//! pulsed system --pipe /run/pulse/system
//!
//! # Layered configuration
//! PULSE_PORT=9000 pulsed time --config pulse.toml --interval-ms 250
//! ```

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pulsed::config::{ServerConfig, ServerKind, ServerOverrides};
use pulsed::lifecycle::spawn_signal_listener;
use pulsed::server::TelemetryServer;

/// pulse telemetry server
#[derive(Parser, Debug)]
#[command(name = "pulsed", version, about)]
struct Args {
    /// Which server to run
    #[arg(value_enum)]
    kind: ServerKind,

    /// TOML file with [time] / [system] tables
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// TCP port (default: 8080 for time, 8081 for system)
    #[arg(short, long)]
    port: Option<u16>,

    /// IPv4 address to bind
    #[arg(short, long)]
    bind: Option<Ipv4Addr>,

    /// Log FIFO path
    #[arg(long)]
    pipe: Option<PathBuf>,

    /// Sampling interval in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Do not write events to the log FIFO
    #[arg(long)]
    no_tee: bool,
}

impl Args {
    fn overrides(&self) -> ServerOverrides {
        ServerOverrides {
            bind: self.bind,
            port: self.port,
            pipe_path: self.pipe.clone(),
            tick_interval_ms: self.interval_ms,
            tee_enabled: self.no_tee.then_some(false),
            ..Default::default()
        }
    }
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let mut config = ServerConfig::for_kind(args.kind);

    if let Some(path) = &args.config {
        let file = ServerOverrides::from_file(args.kind, path)?;
        config = config.apply(&file);
    }

    let env = ServerOverrides::from_env().context("Invalid environment override")?;
    let config = config.apply(&env).apply(&args.overrides());

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("pulsed=info".parse()?)
                .add_directive("pulse_core=info".parse()?)
                .add_directive("pulse_protocol=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        kind = %config.kind,
        port = config.port,
        pipe = %config.pipe_path.display(),
        "pulse server starting"
    );

    let cancel_token = CancellationToken::new();
    let _signals = spawn_signal_listener(cancel_token.clone());

    let sampler = config.kind.sampler();
    let server = TelemetryServer::new(config, cancel_token);

    if let Err(e) = server.run(sampler).await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    Ok(())
}
