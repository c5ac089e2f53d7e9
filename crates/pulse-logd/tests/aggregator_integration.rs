//! End-to-end tests of the log channel: server-side tee writer into the
//! aggregator's FIFOs and destination files.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use pulse_logd::{create_fifo, Aggregator, AggregatorConfig, ChannelConfig};
use pulse_protocol::LogEvent;
use pulsed::tee::{spawn_tee, PipeWriter, TeeError};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};
use tokio_util::sync::CancellationToken;

// ============================================================================
// Constants
// ============================================================================

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

const POLL: Duration = Duration::from_millis(10);

// ============================================================================
// Test Helpers
// ============================================================================

struct TestChannel {
    dir: TempDir,
    pipe: PathBuf,
}

impl TestChannel {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let pipe = dir.path().join("log_time");
        Self { dir, pipe }
    }

    fn config(&self) -> AggregatorConfig {
        AggregatorConfig {
            log_dir: self.dir.path().join("logs"),
            poll_interval_ms: POLL.as_millis() as u64,
            channels: vec![ChannelConfig::new("time", &self.pipe, "time_logs")],
        }
    }
}

fn read_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Drains until the file holds `count` records.
async fn drain_until(aggregator: &mut Aggregator, count: usize) -> Vec<String> {
    let path = aggregator.file_path("time").unwrap().to_path_buf();
    timeout(WAIT_TIMEOUT, async {
        loop {
            aggregator.drain().unwrap();
            let lines = read_lines(&path);
            if lines.len() >= count {
                return lines;
            }
            sleep(POLL).await;
        }
    })
    .await
    .expect("records did not arrive")
}

// ============================================================================
// Loss model
// ============================================================================

#[test]
fn test_events_before_reader_opens_are_lost() {
    let channel = TestChannel::new();
    create_fifo(&channel.pipe).unwrap();

    let mut writer = PipeWriter::new(&channel.pipe);
    for port in [1, 2, 3] {
        assert_eq!(
            writer.write_event(&LogEvent::server_started(port)),
            Err(TeeError::NoReader)
        );
    }

    let mut aggregator = Aggregator::open(channel.config()).unwrap();

    let after = [
        LogEvent::server_started(8080),
        LogEvent::client_connected("client-1", "127.0.0.1:40000"),
        LogEvent::server_stopped(),
    ];
    for event in &after {
        writer.write_event(event).unwrap();
    }

    aggregator.drain().unwrap();
    let lines = read_lines(aggregator.file_path("time").unwrap());
    assert_eq!(
        lines,
        vec![
            "Server started on port 8080",
            "Client connected: client-1 (127.0.0.1:40000)",
            "Server stopped.",
        ]
    );
}

#[test]
fn test_writer_without_fifo_drops() {
    let channel = TestChannel::new();
    let mut writer = PipeWriter::new(&channel.pipe);
    assert!(writer.write_event(&LogEvent::server_stopped()).is_err());
    assert!(!writer.is_open());
}

// ============================================================================
// Round trip through the tee task
// ============================================================================

#[tokio::test]
async fn test_tee_events_arrive_verbatim_and_in_order() {
    let channel = TestChannel::new();
    let mut aggregator = Aggregator::open(channel.config()).unwrap();

    let (tee, writer_task) = spawn_tee(&channel.pipe, 64);
    let events: Vec<LogEvent> = (0..20)
        .map(|i| LogEvent::error(format!("client-{i} disconnected: broken pipe")))
        .collect();
    for event in &events {
        assert!(tee.emit(event.clone()));
    }
    drop(tee);
    let stats = writer_task.await.unwrap();
    assert_eq!(stats.written, 20);

    let lines = drain_until(&mut aggregator, 20).await;
    let expected: Vec<String> = events.iter().map(|e| e.to_string()).collect();
    assert_eq!(lines, expected);
}

#[tokio::test]
async fn test_writer_reopens_after_aggregator_restart() {
    let channel = TestChannel::new();
    let mut writer = PipeWriter::new(&channel.pipe);

    let first = Aggregator::open(channel.config()).unwrap();
    writer.write_event(&LogEvent::server_started(8080)).unwrap();
    drop(first);

    // The old read end is gone: the next write fails and closes the endpoint.
    assert!(writer.write_event(&LogEvent::server_stopped()).is_err());
    assert!(!writer.is_open());

    let restarted = AggregatorConfig {
        log_dir: channel.dir.path().join("logs-2"),
        ..channel.config()
    };
    let mut second = Aggregator::open(restarted).unwrap();
    writer.write_event(&LogEvent::server_started(9090)).unwrap();

    let lines = drain_until(&mut second, 1).await;
    assert_eq!(lines, vec!["Server started on port 9090"]);
}

#[tokio::test]
async fn test_run_loop_flushes_on_shutdown() {
    let channel = TestChannel::new();
    let aggregator = Aggregator::open(channel.config()).unwrap();
    let file = aggregator.file_path("time").unwrap().to_path_buf();

    let cancel = CancellationToken::new();
    let task = tokio::spawn(aggregator.run(cancel.clone()));

    let mut writer = PipeWriter::new(&channel.pipe);
    writer.write_event(&LogEvent::server_started(8080)).unwrap();
    writer.write_event(&LogEvent::server_stopped()).unwrap();

    sleep(POLL * 5).await;
    cancel.cancel();
    let summary = timeout(WAIT_TIMEOUT, task).await.unwrap().unwrap().unwrap();

    assert_eq!(summary[0].records, 2);
    assert_eq!(
        read_lines(&file),
        vec!["Server started on port 8080", "Server stopped."]
    );
}
