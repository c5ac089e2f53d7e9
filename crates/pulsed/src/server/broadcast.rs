//! The change-driven broadcast loop.
//!
//! ```text
//!            ┌──────────────────────── NoChange ─────────────────────────┐
//!            ▼                                                           │
//! Idle ──tick──▶ Sampling ──▶ Detecting ──Changed──▶ Formatting ──▶ Broadcasting
//!  ▲                                                                     │
//!  └──────────────────────────── LoggingEvent ◀──────────────────────────┘
//! ```
//!
//! Cancellation is only observed while idle, so a pass that has started
//! always reaches every client it began with.

use std::time::Duration;

use pulse_core::{ChangeDetector, Sampler, Snapshot};
use pulse_protocol::{encode_snapshot, LogEvent};
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::registry::{ClientRegistry, SendFailure};
use crate::tee::TeeHandle;

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Every metric matched its last broadcast value
    NoChange,
    /// A snapshot was sent to the registered clients
    Broadcast {
        snapshot: Snapshot,
        delivered: usize,
        evicted: Vec<SendFailure>,
    },
}

/// Samples, detects and fans out once per tick.
pub struct BroadcastLoop<S = TcpStream> {
    sampler: Box<dyn Sampler>,
    detector: ChangeDetector,
    registry: ClientRegistry<S>,
    tee: TeeHandle,
    interval: Duration,
}

impl<S> BroadcastLoop<S>
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(
        sampler: Box<dyn Sampler>,
        registry: ClientRegistry<S>,
        tee: TeeHandle,
        interval: Duration,
    ) -> Self {
        Self {
            sampler,
            detector: ChangeDetector::new(),
            registry,
            tee,
            interval,
        }
    }

    /// Runs one Sampling → Detecting → (Broadcasting → LoggingEvent) pass.
    pub async fn tick(&mut self) -> TickOutcome {
        let samples = self.sampler.sample();

        let Some(snapshot) = self.detector.detect(samples) else {
            return TickOutcome::NoChange;
        };

        let block = encode_snapshot(&snapshot);
        let report = self.registry.broadcast(block.as_bytes()).await;

        // Logging is best-effort: a dropped event never affects the tick.
        self.tee.emit(LogEvent::Snapshot(snapshot.clone()));
        for failure in &report.failures {
            warn!(
                client_id = %failure.client,
                peer = %failure.peer,
                error = %failure.error,
                "Client disconnected"
            );
            self.tee.emit(LogEvent::error(format!(
                "{} disconnected: {}",
                failure.client, failure.error
            )));
        }

        debug!(
            delivered = report.delivered,
            evicted = report.failures.len(),
            "Broadcast snapshot"
        );

        TickOutcome::Broadcast {
            snapshot,
            delivered: report.delivered,
            evicted: report.failures,
        }
    }

    /// Ticks every interval until `cancel_token` fires.
    ///
    /// The first tick happens immediately.
    pub async fn run(mut self, cancel_token: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            sampler = self.sampler.name(),
            interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX),
            "Broadcast loop started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    break;
                }

                _ = ticker.tick() => {}
            }

            self.tick().await;
        }

        info!("Broadcast loop stopped");
    }
}
