//! ---
//! ems_section: "03-persistence-logging"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Append-only archive of IPC envelopes."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
#![warn(missing_docs)]

/// Result alias used throughout the archive crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

/// Error type for the archive.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Reading or writing an archive file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A header or record line is not valid JSON for its type.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A record's subtopic is not valid hex.
    #[error("bad subtopic encoding: {0}")]
    Hex(#[from] hex::FromHexError),
    /// A record's message is not valid base64.
    #[error("bad message encoding: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The file does not start with a usable header.
    #[error("not an IPC archive: {0}")]
    Header(String),
    /// Registering archive metrics failed.
    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub mod log;
pub mod metrics;
pub mod sink;
pub mod summary;

pub use log::{replay, ArchiveHeader, ArchiveReader, ArchiveRecord, ArchiveWriter, ARCHIVE_VERSION};
pub use metrics::ArchiveMetrics;
pub use sink::ArchiveSink;
pub use summary::{IntervalSummary, SummaryLine};
