//! Telemetry adapter writing samples to a log file.
//!
//! The orchestrator pushes into a bounded channel without blocking; a writer
//! task drains it into `<elapsed_ms> <stream> <sample>` lines. A full channel
//! drops the sample and counts the drop.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use experiment_core::telemetry::{TelemetrySink, TelemetryStream};
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Samples buffered between the control loop and the writer task.
pub const TELEMETRY_CHANNEL_CAPACITY: usize = 4_096;

/// One sample on its way to the log.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TelemetrySample {
    pub elapsed: Duration,
    pub stream: TelemetryStream,
    pub value: i32,
}

/// Non-blocking sink handed to the orchestrator.
#[derive(Debug)]
pub struct ChannelTelemetry {
    tx: mpsc::Sender<TelemetrySample>,
    started_at: Instant,
    dropped: u64,
}

impl ChannelTelemetry {
    #[must_use]
    pub fn new(tx: mpsc::Sender<TelemetrySample>, started_at: Instant) -> Self {
        Self {
            tx,
            started_at,
            dropped: 0,
        }
    }

    /// Samples lost to a full or closed channel.
    #[must_use]
    pub const fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl TelemetrySink for ChannelTelemetry {
    fn push(&mut self, stream: TelemetryStream, sample: i32) {
        let sample = TelemetrySample {
            elapsed: self.started_at.elapsed(),
            stream,
            value: sample,
        };
        match self.tx.try_send(sample) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                if self.dropped.is_power_of_two() {
                    warn!(dropped = self.dropped, "telemetry channel full, dropping samples");
                }
            }
            Err(TrySendError::Closed(_)) => self.dropped += 1,
        }
    }
}

/// Buffered writer of the sample log.
pub struct TelemetryLog<W> {
    writer: BufWriter<W>,
}

impl TelemetryLog<fs::File> {
    /// Creates (or truncates) the log at `path`.
    pub async fn create(path: &Path, title: &str) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await?;
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .await?;
        Self::with_writer(file, title).await
    }
}

impl<W: tokio::io::AsyncWrite + Unpin> TelemetryLog<W> {
    pub async fn with_writer(writer: W, title: &str) -> io::Result<Self> {
        let mut log = Self {
            writer: BufWriter::new(writer),
        };
        log.writer
            .write_all(format!("# {title}\n# <elapsed_ms> <stream> <sample>\n").as_bytes())
            .await?;
        Ok(log)
    }

    pub async fn append(&mut self, sample: &TelemetrySample) -> io::Result<()> {
        let line = format!(
            "{} {} {}\n",
            sample.elapsed.as_millis(),
            sample.stream,
            sample.value
        );
        self.writer.write_all(line.as_bytes()).await
    }

    /// Drains `rx` until every sender is gone, then flushes.
    pub async fn drain(mut self, mut rx: mpsc::Receiver<TelemetrySample>) -> io::Result<W> {
        let mut written: u64 = 0;
        while let Some(sample) = rx.recv().await {
            self.append(&sample).await?;
            written += 1;
        }
        self.writer.flush().await?;
        debug!(written, "telemetry log closed");
        Ok(self.writer.into_inner())
    }
}

/// Opens the log at `path` and spawns the task draining `rx` into it.
pub async fn spawn_writer(
    path: &Path,
    title: &str,
    rx: mpsc::Receiver<TelemetrySample>,
) -> io::Result<JoinHandle<io::Result<()>>> {
    let log = TelemetryLog::create(path, title).await?;
    Ok(tokio::spawn(async move { log.drain(rx).await.map(drop) }))
}

#[cfg(test)]
mod tests {
    use experiment_core::telemetry::push_idle;

    use super::*;

    #[tokio::test]
    async fn samples_are_written_as_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("telemetry.log");
        let (tx, rx) = mpsc::channel(16);
        let writer = spawn_writer(&path, "cue-audio session", rx).await.unwrap();

        let mut sink = ChannelTelemetry::new(tx, Instant::now());
        sink.push(TelemetryStream::RobotId, 4);
        push_idle(&mut sink);
        drop(sink);
        writer.await.unwrap().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "# cue-audio session");
        assert_eq!(lines.len(), 2 + 1 + TelemetryStream::ALL.len());
        assert!(lines[2].ends_with(" robot_id 4"), "{}", lines[2]);
        assert!(lines[3..].iter().all(|line| line.ends_with(" -1")));
    }

    #[test]
    fn full_channel_drops_and_counts() {
        let (tx, _rx) = mpsc::channel(2);
        let mut sink = ChannelTelemetry::new(tx, Instant::now());
        for value in 0..5 {
            sink.push(TelemetryStream::CueState, value);
        }
        assert_eq!(sink.dropped(), 3);
    }
}
