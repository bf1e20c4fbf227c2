//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primitive, payload, and packet codec for Iris traffic."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Byte-level codec for everything that crosses the rover link: primitive
//! values, typed payloads, and the packet classes that carry them.
#![warn(missing_docs)]

pub mod bitfield;
pub mod collection;
pub mod dispatch;
pub mod format;
pub mod magic;
pub mod metadata;
pub mod packet;
pub mod payload;
pub mod primitive;

/// Result alias used throughout the codec crate.
pub type Result<T> = std::result::Result<T, CodecError>;

/// Error type for encoding and decoding.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CodecError {
    /// A value does not fit the declared type (or is missing) on encode.
    #[error("value out of range: {0}")]
    PrimitiveRange(String),
    /// Bytes cannot be interpreted as the declared primitive type.
    #[error("primitive decode failed: {0}")]
    PrimitiveDecode(String),
    /// A payload header or body is short, malformed, or unknown to the catalog.
    #[error("payload decode failed: {0}")]
    PayloadDecode(String),
    /// Packet length, header, or MTU constraints are violated.
    #[error("packet framing error: {0}")]
    PacketFraming(String),
    /// The recomputed checksum disagrees with the header.
    #[error("packet checksum mismatch: header has {found:#04x}, computed {expected:#04x}")]
    PacketChecksum {
        /// Checksum computed over the received bytes.
        expected: u8,
        /// Checksum carried in the header.
        found: u8,
    },
}

pub use collection::PayloadCollection;
pub use dispatch::parse_packet;
pub use magic::Magic;
pub use metadata::{DataPathway, DataSource, DownlinkTimes, UplinkTimes};
pub use packet::{
    IrisCommonPacket, Packet, PacketClass, PacketCore, PacketKind, PeregrineDummyPacket,
    RadioBgApiPacket, RadioDirectMessagePacket, RadioGroundPacket, RadioGroundSubpacket,
    RadioHelloPacket, UnsupportedPacket, WatchdogCommandResponsePacket,
    WatchdogDetailedStatusPacket, WatchdogHeartbeatPacket, WatchdogHelloPacket,
    WatchdogResetSpecificAckPacket,
};
pub use payload::{
    CommandPayload, EventPayload, FileBlockPayload, FileMetadata, Payload, PayloadKind,
    TelemetryPayload,
};
pub use primitive::{Endianness, Field, Value};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_error_reports_both_values() {
        let err = CodecError::PacketChecksum {
            expected: 0x3C,
            found: 0x3D,
        };
        assert_eq!(
            err.to_string(),
            "packet checksum mismatch: header has 0x3d, computed 0x3c"
        );
    }
}
