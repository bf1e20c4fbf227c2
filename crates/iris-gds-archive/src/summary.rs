//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Periodic digest of what the archiver has seen."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use tracing::info;

/// Per-topic counts since the last flush.
#[derive(Debug)]
pub struct IntervalSummary {
    started: DateTime<Utc>,
    counts: BTreeMap<String, u64>,
}

/// What one interval contained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SummaryLine {
    /// Start of the interval.
    pub started: DateTime<Utc>,
    /// End of the interval.
    pub ended: DateTime<Utc>,
    /// Messages per topic.
    pub counts: BTreeMap<String, u64>,
}

impl SummaryLine {
    /// Total messages.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }
}

impl fmt::Display for SummaryLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "since last interval: {} messages across {} topics",
            self.total(),
            self.counts.len()
        )?;
        for (topic, count) in &self.counts {
            write!(f, " {topic}={count}")?;
        }
        Ok(())
    }
}

impl IntervalSummary {
    /// Empty summary starting at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            started: now,
            counts: BTreeMap::new(),
        }
    }

    /// Count one message on `topic`.
    pub fn record(&mut self, topic: &str) {
        *self.counts.entry(topic.to_owned()).or_default() += 1;
    }

    /// Whether nothing was recorded since the last flush.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Close the interval at `now`, log it, and start a new one. Empty
    /// intervals are not logged.
    pub fn flush(&mut self, now: DateTime<Utc>) -> Option<SummaryLine> {
        let counts = std::mem::take(&mut self.counts);
        let started = std::mem::replace(&mut self.started, now);
        if counts.is_empty() {
            return None;
        }
        let line = SummaryLine {
            started,
            ended: now,
            counts,
        };
        info!(total = line.total(), "{line}");
        Some(line)
    }
}
