//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "test"
//! ems_description: "Framed frames through the transceiver core."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use iris_gds_catalog::{fixtures, DataStandards};
use iris_gds_codec::{
    CommandPayload, DataPathway, DataSource, IrisCommonPacket, Packet, PacketKind, Payload,
    PayloadCollection, Value,
};
use iris_gds_transceiver::{EndecChain, IpUdpEndec, RawFrame, SlipEndec, TransceiverCore};

fn drive_forward(standards: &DataStandards) -> Result<Packet> {
    let mut args = IndexMap::new();
    args.insert("distance".to_owned(), Value::UInt(200));
    args.insert("speed".to_owned(), Value::UInt(100));
    args.insert("callback_id".to_owned(), Value::UInt(0x0101));
    let command = CommandPayload::from_name(standards, "Navigation_NavDriveForward", args)?;
    Ok(IrisCommonPacket::new(3, PayloadCollection::from(vec![Payload::from(command)])).into())
}

fn serial_core(standards: Arc<DataStandards>) -> Result<TransceiverCore> {
    let endecs = EndecChain::new()
        .with(IpUdpEndec::parse("192.168.10.105:43531", "192.168.150.3:42000")?)
        .with(SlipEndec);
    Ok(TransceiverCore::new(
        "serial",
        standards,
        endecs,
        DataPathway::Wired,
        DataSource::Serial,
    ))
}

#[test]
fn slip_ip_udp_frame_yields_one_command_packet() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut core = serial_core(standards.clone())?;
    let wire = core.encode_packet(&drive_forward(&standards)?)?;
    assert_eq!(wire.first(), Some(&0xC0));
    assert_eq!(wire.last(), Some(&0xC0));

    let packets = core.process_frames(vec![RawFrame::new(wire)]);
    assert_eq!(packets.len(), 1);
    let packet = &packets[0];
    assert_eq!(packet.kind(), PacketKind::IrisCommon);
    assert_eq!(packet.payloads().len(), 1);
    let command = packet.payloads().commands().next().expect("command");
    assert_eq!(command.args["distance"], Value::UInt(200));
    assert_eq!(packet.source(), DataSource::Serial);
    Ok(())
}

#[test]
fn corrupted_frame_surfaces_as_unsupported() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut core = serial_core(standards.clone())?;
    let mut inner = drive_forward(&standards)?.encode(&standards)?;
    inner[3] ^= 0x01;
    let wire = EndecChain::new()
        .with(IpUdpEndec::parse("192.168.10.105:43531", "192.168.150.3:42000")?)
        .with(SlipEndec)
        .encode(&inner)?;

    let packets = core.process_frames(vec![RawFrame::new(wire)]);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind(), PacketKind::Unsupported);
    assert_eq!(packets[0].raw(), Some(inner.as_slice()));
    assert_eq!(core.stats().unsupported, 1);
    Ok(())
}

#[test]
fn frames_the_endecs_reject_are_dropped() {
    let standards = Arc::new(fixtures::standards());
    let mut core = TransceiverCore::new(
        "serial",
        standards,
        EndecChain::new().with(SlipEndec),
        DataPathway::Wired,
        DataSource::Serial,
    );
    let packets = core.process_frames(vec![RawFrame::new(vec![0xC0, 0x01, 0xDB, 0xC0])]);
    assert!(packets.is_empty());
    assert_eq!(core.stats().frames_dropped, 1);
}
