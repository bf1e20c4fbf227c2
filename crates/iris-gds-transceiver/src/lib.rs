//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Byte sources and sinks that turn link traffic into packets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Transceivers: everything between a physical or recorded link and the
//! packet codec. Frames pass through a chain of [`Endec`]s and are then
//! classified by [`iris_gds_codec::parse_packet`].
#![warn(missing_docs)]

pub mod backend;
pub mod core;
pub mod endec;
pub mod lander;
pub mod prebuilt;
pub mod yamcs;

/// Result alias used throughout the transceiver crate.
pub type Result<T> = std::result::Result<T, TransceiverError>;

/// Error type for framing and link handling.
#[derive(Debug, thiserror::Error)]
pub enum TransceiverError {
    /// A frame could not be decoded by an endec.
    #[error("decoding failed in {endec}: {message}")]
    Decoding {
        /// Endec that rejected the frame.
        endec: &'static str,
        /// What was wrong.
        message: String,
    },
    /// An outgoing payload could not be wrapped by an endec.
    #[error("encoding failed in {endec}: {message}")]
    Encoding {
        /// Endec that refused the payload.
        endec: &'static str,
        /// What was wrong.
        message: String,
    },
    /// The underlying link could not be opened or has gone away.
    #[error("connection error: {0}")]
    Connection(String),
    /// Invalid transceiver name or arguments.
    #[error("configuration error: {0}")]
    Config(String),
    /// A packet could not be encoded for uplink.
    #[error(transparent)]
    Codec(#[from] iris_gds_codec::CodecError),
    /// Wrapper for IO errors on files and devices.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransceiverError {
    pub(crate) fn decoding(endec: &'static str, message: impl Into<String>) -> Self {
        Self::Decoding {
            endec,
            message: message.into(),
        }
    }

    pub(crate) fn encoding(endec: &'static str, message: impl Into<String>) -> Self {
        Self::Encoding {
            endec,
            message: message.into(),
        }
    }
}

pub use crate::core::{DataHandler, RawFrame, Transceiver, TransceiverCore, TransceiverStats};
pub use backend::{
    ArchiveOpts, ArchiveTransceiver, PcapOpts, PcapTransceiver, SerialTransceiver,
    TransportProtocol,
};
pub use endec::{Endec, EndecChain, IpUdpEndec, SlipEndec, SlipFramer, UnityEndec};
pub use prebuilt::{build_xcvr, build_xcvr_by_name, EndecName, PrebuiltTransceiver, XcvrArgs};
pub use yamcs::{YamcsOpts, YamcsTransceiver};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoding_errors_name_the_endec() {
        let err = TransceiverError::decoding("slip", "trailing ESC");
        assert_eq!(err.to_string(), "decoding failed in slip: trailing ESC");
    }
}
