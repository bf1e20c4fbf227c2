//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Uplink processing: payload packing and sequence numbers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Turns uplink payload requests into packets ready for a transceiver.
#![warn(missing_docs)]

pub mod packing;
pub mod processor;
pub mod sequence;

use iris_gds_codec::PacketKind;

/// Result alias used throughout the uplink crate.
pub type Result<T> = std::result::Result<T, UplinkError>;

/// Error type for uplink processing.
#[derive(Debug, thiserror::Error)]
pub enum UplinkError {
    /// The packet could not be encoded (unknown command, MTU exceeded).
    #[error(transparent)]
    Codec(#[from] iris_gds_codec::CodecError),
    /// A bus message could not be decoded or sent.
    #[error(transparent)]
    Ipc(#[from] iris_gds_ipc::IpcError),
    /// The requested packet class cannot be built on the ground.
    #[error("packet class {0} cannot carry uplinked payloads")]
    UnsupportedClass(PacketKind),
}

pub use packing::pack;
pub use processor::{UplinkOutcome, UplinkProcessor};
pub use sequence::SequenceTracker;
