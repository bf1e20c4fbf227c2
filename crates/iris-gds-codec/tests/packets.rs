//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "End-to-end packet parsing over the fixture catalog."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use iris_gds_catalog::{fixtures, DataStandards};
use iris_gds_codec::{
    parse_packet, CommandPayload, IrisCommonPacket, Packet, PacketClass, PacketKind, PayloadCollection,
    Value,
};

fn drive(standards: &DataStandards) -> CommandPayload {
    let mut args = IndexMap::new();
    args.insert("distance".to_owned(), Value::UInt(200));
    args.insert("speed".to_owned(), Value::UInt(100));
    args.insert("callback_id".to_owned(), Value::UInt(0xBEEF));
    CommandPayload::from_name(standards, "Navigation_NavDriveForward", args).expect("command")
}

fn channel_value(packet: &Packet, standards: &DataStandards, name: &str) -> Value {
    packet
        .payloads()
        .telemetry()
        .find(|t| t.name(standards).as_deref() == Some(name))
        .map(|t| t.value.clone())
        .unwrap_or_else(|| panic!("{name} missing"))
}

#[test]
fn common_packet_round_trips_through_dispatch() {
    let standards = fixtures::standards();
    let bytes = IrisCommonPacket::new(9, PayloadCollection::from(vec![drive(&standards).into()]))
        .encode(&standards)
        .expect("encode");
    let packet = parse_packet(&bytes, &standards);
    assert_eq!(packet.kind(), PacketKind::IrisCommon);
    assert_eq!(packet.seq_num(), Some(9));
    let command = packet.payloads().commands().next().expect("command");
    assert_eq!(command.name(&standards).as_deref(), Some("Navigation_NavDriveForward"));
    assert_eq!(command.args["callback_id"], Value::UInt(0xBEEF));
}

#[test]
fn corrupted_checksum_is_unsupported_not_misread() {
    let standards = fixtures::standards();
    let mut bytes = IrisCommonPacket::new(1, PayloadCollection::from(vec![drive(&standards).into()]))
        .encode(&standards)
        .expect("encode");
    bytes[3] ^= 0x01;

    let packet = parse_packet(&bytes, &standards);
    assert_eq!(packet.kind(), PacketKind::Unsupported);
    assert_eq!(packet.payloads().commands().count(), 0);
    let event = packet.payloads().events().next().expect("unsupported event");
    assert_eq!(event.name(&standards).as_deref(), Some("GdsPackets_UnsupportedPacket"));
    assert_eq!(packet.raw(), Some(bytes.as_slice()));
}

fn three_drives(seq_num: u8, standards: &DataStandards) -> Vec<u8> {
    let payloads = (0..3).map(|_| drive(standards).into()).collect::<Vec<_>>();
    IrisCommonPacket::new(seq_num, PayloadCollection::from(payloads))
        .encode(standards)
        .expect("encode")
}

#[test]
fn corrupted_common_packet_never_falls_through_to_a_discriminator() {
    let standards = fixtures::standards();
    // A sequence number of 0xD5 is also the detailed-status discriminator.
    let mut bytes = three_drives(0xD5, &standards);
    assert!(bytes.len() >= 24 && bytes.len() <= 47);
    bytes[3] ^= 0x01;

    let packet = parse_packet(&bytes, &standards);
    assert_eq!(packet.kind(), PacketKind::Unsupported);
    let Packet::Unsupported(unsupported) = &packet else {
        unreachable!();
    };
    assert!(unsupported.reason.as_deref().is_some_and(|r| r.contains("checksum")));
}

#[test]
fn oversized_detailed_status_is_unsupported() {
    let standards = fixtures::standards();
    let mut bytes = vec![0xD5];
    bytes.extend([0xAB; 99]);
    assert_eq!(parse_packet(&bytes, &standards).kind(), PacketKind::Unsupported);

    let mut full = vec![0xD5];
    full.extend([0u8; 46]);
    assert_eq!(parse_packet(&full, &standards).kind(), PacketKind::WatchdogDetailedStatus);
    full.push(0);
    assert_eq!(parse_packet(&full, &standards).kind(), PacketKind::Unsupported);
}

#[test]
fn every_single_bit_flip_is_detected() {
    let standards = fixtures::standards();
    let clean = three_drives(1, &standards);
    assert!(IrisCommonPacket::decode(&clean, &standards).is_ok());

    for index in 0..clean.len() {
        for bit in 0..8 {
            let mut bytes = clean.clone();
            bytes[index] ^= 1 << bit;
            assert!(
                IrisCommonPacket::decode(&bytes, &standards).is_err(),
                "flip of bit {bit} in byte {index} decoded"
            );
            assert_eq!(
                parse_packet(&bytes, &standards).kind(),
                PacketKind::Unsupported,
                "flip of bit {bit} in byte {index}"
            );
        }
    }
}

#[test]
fn short_detailed_status_zero_fills() {
    let standards = fixtures::standards();
    let mut bytes = vec![0xD5];
    bytes.extend([0u8; 23]);

    let packet = parse_packet(&bytes, &standards);
    let Packet::WatchdogDetailedStatus(status) = &packet else {
        panic!("expected detailed status, got {:?}", packet.kind());
    };
    assert!(status.status.truncated);
    assert_eq!(
        channel_value(&packet, &standards, "WatchdogDetailedStatus_Watchdog_State").as_i128(),
        Some(0)
    );
    assert_eq!(
        channel_value(&packet, &standards, "WatchdogDetailedStatus_Heater_IsHeating").as_str(),
        Some("NOT_HEATING")
    );
    assert_eq!(packet.encode(&standards).expect("encode").len(), 47);
}

#[test]
fn every_downlinked_packet_is_sourced_and_timestamped() {
    let standards = fixtures::standards();
    let frames: Vec<Vec<u8>> = vec![
        vec![0xFF, 241, 121, 233],
        b"hello".to_vec(),
        b"DEBUGRADIO up".to_vec(),
        b"garbage that matches nothing".to_vec(),
    ];
    for frame in frames {
        let packet = parse_packet(&frame, &standards);
        assert!(!packet.payloads().is_empty(), "{:?} carries no payloads", packet.kind());
        assert!(
            packet.payloads().iter().all(|p| p.timestamp().is_some()),
            "{:?} has an untimestamped payload",
            packet.kind()
        );
    }
}
