//! pulse - command-line client for the telemetry servers
//!
//! # Usage
//!
//! ```bash
//! # Watch both servers on localhost
//! pulse watch
//!
//! # Watch only the system server on another host
//! pulse watch --host 10.0.0.5 --port 8081
//! ```

use std::time::Duration;

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use pulse_client::{WatchClient, WatchConfig, WatchEvent};
use pulsed::lifecycle::spawn_signal_listener;

/// pulse telemetry client
#[derive(Parser, Debug)]
#[command(name = "pulse", version, about)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print snapshot blocks as they arrive
    Watch {
        /// Server host
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Server port; repeat for several servers (default: 8080 and 8081)
        #[arg(short, long = "port")]
        ports: Vec<u16>,

        /// Maximum reconnect delay in seconds
        #[arg(long, default_value_t = 30)]
        max_retry_secs: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("pulse_client=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Command::Watch {
            host,
            ports,
            max_retry_secs,
        } => {
            let ports = if ports.is_empty() { vec![8080, 8081] } else { ports };
            if max_retry_secs == 0 {
                bail!("--max-retry-secs must be > 0");
            }
            watch(host, ports, Duration::from_secs(max_retry_secs)).await
        }
    }
}

async fn watch(host: String, ports: Vec<u16>, max_retry: Duration) -> Result<()> {
    let cancel_token = CancellationToken::new();
    let _signals = spawn_signal_listener(cancel_token.clone());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut clients = JoinSet::new();

    for port in ports {
        let config = WatchConfig {
            host: host.clone(),
            port,
            retry_max_delay: max_retry,
            ..Default::default()
        };
        let client = WatchClient::new(config, event_tx.clone(), cancel_token.clone());
        clients.spawn(async move { client.run().await });
    }
    drop(event_tx);

    while let Some(event) = event_rx.recv().await {
        print_event(&host, &event);
    }

    while clients.join_next().await.is_some() {}
    Ok(())
}

fn print_event(host: &str, event: &WatchEvent) {
    match event {
        WatchEvent::Connected { port } => println!("[{host}:{port}] connected"),
        WatchEvent::Disconnected { port } => println!("[{host}:{port}] disconnected"),
        WatchEvent::Snapshot { port, block } => {
            println!("[{host}:{port}] {}", block.current_time);
            for field in &block.fields {
                println!("  {}: {}", field.label, field.value);
            }
        }
    }
}
