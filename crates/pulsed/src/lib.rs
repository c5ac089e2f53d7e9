//! pulse telemetry server - client registry, broadcast loop and log tee
//!
//! This crate provides the infrastructure shared by the two telemetry
//! servers (time and system):
//! - `config` - per-kind defaults, TOML/env/CLI overrides
//! - `registry` - the shared set of connected TCP clients
//! - `server` - accept loop, broadcast loop and orderly teardown
//! - `tee` - best-effort hand-off of log events to the aggregator FIFO
//! - `lifecycle` - shutdown signal wiring
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────┐
//! │                        pulsed server                          │
//! ├───────────────────────────────────────────────────────────────┤
//! │                                                               │
//! │  ┌──────────────┐  register   ┌──────────────────┐            │
//! │  │  AcceptLoop  │────────────▶│  ClientRegistry  │──▶ clients │
//! │  │ (TcpListener)│             │  (Mutex<HashMap>)│            │
//! │  └──────┬───────┘             └────────▲─────────┘            │
//! │         │ events                       │ broadcast            │
//! │         ▼                              │                      │
//! │  ┌──────────────┐   events    ┌────────┴─────────┐            │
//! │  │  tee writer  │◀────────────│  BroadcastLoop   │            │
//! │  │  (FIFO owner)│             │ Sampler+Detector │            │
//! │  └──────┬───────┘             └──────────────────┘            │
//! │         │                                                     │
//! └─────────┼─────────────────────────────────────────────────────┘
//!           ▼
//!     /tmp/log_* FIFO ──▶ pulse-logd
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Peer, accept and tee failures are logged and never abort the server

pub mod config;
pub mod lifecycle;
pub mod registry;
pub mod server;
pub mod tee;
