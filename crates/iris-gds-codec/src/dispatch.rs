//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Pick the packet class for a downlinked byte string and decode it."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use iris_gds_catalog::DataStandards;
use tracing::warn;

use crate::packet::{
    IrisCommonPacket, Packet, PacketClass, RadioBgApiPacket, RadioDirectMessagePacket,
    RadioGroundPacket, RadioHelloPacket, UnsupportedPacket, WatchdogCommandResponsePacket,
    WatchdogDetailedStatusPacket, WatchdogHeartbeatPacket, WatchdogHelloPacket,
    WatchdogResetSpecificAckPacket,
};
use crate::Result;

fn attempt<P>(bytes: &[u8], standards: &DataStandards) -> Option<Result<Packet>>
where
    P: PacketClass + Into<Packet>,
{
    P::is_valid(bytes).then(|| P::decode(bytes, standards).map(Into::into))
}

/// First specialised class whose discriminator matches. The radio greeting
/// starts with `Hello` and must be tried before the watchdog hello.
fn specialised(bytes: &[u8], standards: &DataStandards) -> Option<Result<Packet>> {
    attempt::<WatchdogHeartbeatPacket>(bytes, standards)
        .or_else(|| attempt::<WatchdogDetailedStatusPacket>(bytes, standards))
        .or_else(|| attempt::<WatchdogCommandResponsePacket>(bytes, standards))
        .or_else(|| attempt::<WatchdogResetSpecificAckPacket>(bytes, standards))
        .or_else(|| attempt::<RadioHelloPacket>(bytes, standards))
        .or_else(|| attempt::<WatchdogHelloPacket>(bytes, standards))
        .or_else(|| attempt::<RadioBgApiPacket>(bytes, standards))
        .or_else(|| attempt::<RadioDirectMessagePacket>(bytes, standards))
        .or_else(|| attempt::<RadioGroundPacket>(bytes, standards))
}

/// Decode downlinked bytes into the packet class they belong to.
///
/// Bytes framed as a common packet are decoded as one and nothing else, so a
/// corrupted common packet is never reread through a discriminator its
/// sequence number happens to match. Otherwise the specialised classes are
/// tried by discriminator, and anything left is decoded as a common packet
/// so the failure explains itself. Never fails: bytes that do not decode
/// become an [`UnsupportedPacket`] carrying the error text.
pub fn parse_packet(bytes: &[u8], standards: &DataStandards) -> Packet {
    let decoded = if IrisCommonPacket::is_valid(bytes) {
        IrisCommonPacket::decode(bytes, standards).map(Packet::from)
    } else {
        specialised(bytes, standards)
            .unwrap_or_else(|| IrisCommonPacket::decode(bytes, standards).map(Packet::from))
    };
    match decoded {
        Ok(packet) => packet,
        Err(err) => {
            warn!(%err, len = bytes.len(), "downlinked bytes are unsupported");
            UnsupportedPacket::new(bytes, Some(err.to_string()), standards).into()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketKind;
    use iris_gds_catalog::fixtures;

    #[test]
    fn radio_hello_is_not_a_watchdog_hello() {
        let standards = fixtures::standards();
        let packet = parse_packet(RadioHelloPacket::GREETING.as_bytes(), &standards);
        assert_eq!(packet.kind(), PacketKind::RadioHello);
        let packet = parse_packet(b"hello, watchdog here", &standards);
        assert_eq!(packet.kind(), PacketKind::WatchdogHello);
    }

    #[test]
    fn discriminators_route_to_their_class() {
        let standards = fixtures::standards();
        let cases: &[(&[u8], PacketKind)] = &[
            (&[0xFF, 0x10, 0x20, 0x30], PacketKind::WatchdogHeartbeat),
            (&[0x0A, 0x01, 0x00], PacketKind::WatchdogCommandResponse),
            (b"DEBUGRESET:1 -> 0 with 0x8", PacketKind::WatchdogResetSpecificAck),
            (b"DEBUGBGP:\x80\x00\x01\x02", PacketKind::RadioBgApi),
            (b"DEBUGRADIO hi", PacketKind::RadioDirectMessage),
            (b"RAD:ECHO|hping", PacketKind::RadioGround),
        ];
        for (bytes, kind) in cases {
            assert_eq!(parse_packet(bytes, &standards).kind(), *kind, "{bytes:02x?}");
        }
        let mut status = vec![0xD5];
        status.extend([0u8; 46]);
        assert_eq!(parse_packet(&status, &standards).kind(), PacketKind::WatchdogDetailedStatus);
    }

    #[test]
    fn failures_become_unsupported_with_their_reason() {
        let standards = fixtures::standards();
        let packet = parse_packet(b"DEBUGRESET:not an ack", &standards);
        let Packet::Unsupported(unsupported) = &packet else {
            panic!("expected unsupported, got {:?}", packet.kind());
        };
        assert!(unsupported.reason.as_deref().is_some_and(|r| r.contains("reset ack")));
        assert_eq!(packet.raw(), Some(&b"DEBUGRESET:not an ack"[..]));

        let packet = parse_packet(&[], &standards);
        assert_eq!(packet.kind(), PacketKind::Unsupported);
        assert_eq!(packet.payloads().events().count(), 1);
    }
}
