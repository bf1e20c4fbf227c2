//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Archive writer with interval summaries and counters."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use iris_gds_common::ArchiveConfig;
use iris_gds_ipc::IpcPayload;
use tracing::info;

use crate::log::{ArchiveRecord, ArchiveWriter};
use crate::metrics::ArchiveMetrics;
use crate::summary::{IntervalSummary, SummaryLine};
use crate::Result;

/// Everything the archiver does with one received envelope.
#[derive(Debug)]
pub struct ArchiveSink {
    writer: ArchiveWriter,
    summary: IntervalSummary,
    summary_interval: Duration,
    metrics: Option<ArchiveMetrics>,
}

impl ArchiveSink {
    /// New archive file in the configured directory.
    pub fn create(config: &ArchiveConfig, now: DateTime<Utc>) -> Result<Self> {
        let writer = ArchiveWriter::create(&config.directory)?;
        info!(path = %writer.path().display(), "archiving IPC traffic");
        Ok(Self {
            writer,
            summary: IntervalSummary::new(now),
            summary_interval: config.summary_interval,
            metrics: None,
        })
    }

    /// Count appends in `metrics`.
    pub fn with_metrics(mut self, metrics: ArchiveMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Archive file path.
    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    /// How often [`ArchiveSink::flush_summary`] should be called.
    pub fn summary_interval(&self) -> Duration {
        self.summary_interval
    }

    /// Append `payload` received at `arrival`. Returns its sequence.
    pub fn archive(&mut self, payload: &IpcPayload, arrival: DateTime<Utc>) -> Result<u64> {
        let (sequence, bytes) = self.writer.append(payload, arrival)?;
        let topic = ArchiveRecord::from_payload(payload, arrival).topic;
        self.summary.record(&topic);
        if let Some(metrics) = &self.metrics {
            metrics.record_append(&topic, bytes);
        }
        Ok(sequence)
    }

    /// Log and reset the interval summary.
    pub fn flush_summary(&mut self, now: DateTime<Utc>) -> Option<SummaryLine> {
        self.summary.flush(now)
    }

    /// Flush buffered writes.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush()
    }

    /// Flush the file and the pending summary.
    pub fn close(mut self, now: DateTime<Utc>) -> Result<Option<SummaryLine>> {
        self.writer.flush()?;
        Ok(self.summary.flush(now))
    }
}
