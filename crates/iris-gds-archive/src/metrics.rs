//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Prometheus counters for archived envelopes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use prometheus::{IntCounterVec, Opts, Registry};

use crate::Result;

/// Counters published by the archiver.
#[derive(Clone)]
pub struct ArchiveMetrics {
    records: IntCounterVec,
    bytes: IntCounterVec,
}

impl ArchiveMetrics {
    /// Register the archive counters with `registry`.
    pub fn new(registry: &Registry) -> Result<Self> {
        let records = IntCounterVec::new(
            Opts::new("iris_archive_records_total", "Envelopes appended to the archive"),
            &["topic"],
        )?;
        registry.register(Box::new(records.clone()))?;

        let bytes = IntCounterVec::new(
            Opts::new("iris_archive_bytes_total", "Bytes appended to the archive"),
            &["topic"],
        )?;
        registry.register(Box::new(bytes.clone()))?;

        Ok(Self { records, bytes })
    }

    /// Counters on a private registry.
    pub fn detached() -> Result<Self> {
        Self::new(&Registry::new())
    }

    /// Count one record of `bytes` on `topic`.
    pub fn record_append(&self, topic: &str, bytes: usize) {
        self.records.with_label_values(&[topic]).inc();
        self.bytes.with_label_values(&[topic]).inc_by(bytes as u64);
    }

    /// Records archived on `topic` so far.
    pub fn records_for(&self, topic: &str) -> u64 {
        self.records.with_label_values(&[topic]).get()
    }
}

impl std::fmt::Debug for ArchiveMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveMetrics").finish_non_exhaustive()
    }
}
