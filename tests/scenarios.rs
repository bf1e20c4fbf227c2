//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "End-to-end ground pipeline scenarios across crates."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Each scenario crosses at least one bus hop: content is serialized the way
//! an app would publish it and decoded again before the next stage sees it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use iris_gds_catalog::{fixtures, DataStandards, DataType};
use iris_gds_codec::{
    parse_packet, CommandPayload, DataPathway, DataSource, IrisCommonPacket, Packet, PacketKind,
    Payload, PayloadCollection, TelemetryPayload, Value,
};
use iris_gds_common::{DownlinkConfig, IpcConfig, UplinkConfig};
use iris_gds_downlink::{
    Calculation, DownlinkProcessor, Inputs, MetaChannel, MetaChannelProto, MetaModule, MetaRuntime,
    UpdateBehavior,
};
use iris_gds_ipc::{
    DownlinkedPacketsMessage, DownlinkedPayloadsMessage, MessageContent, PacketSplit, Serializer,
    TargetXcvr, Topic, UplinkPacketRequestMessage, UplinkPayloadsRequestMessage,
};
use iris_gds_transceiver::{EndecChain, IpUdpEndec, RawFrame, SlipEndec, TransceiverCore};
use iris_gds_uplink::UplinkProcessor;

const SPEED: &str = "Navigation_Speed";
const HEADING: &str = "Navigation_Heading";

fn serializer() -> Serializer {
    Serializer::from_config(&IpcConfig::default())
}

/// Publish `content` on `topic` and read it back the way a subscriber would.
fn over_the_bus<T>(topic: Topic, content: impl Into<MessageContent>) -> Result<T>
where
    T: TryFrom<MessageContent, Error = iris_gds_ipc::IpcError>,
{
    let serializer = serializer();
    let bytes = serializer.encode(&content.into())?;
    Ok(T::try_from(serializer.decode_for(topic, &bytes)?)?)
}

fn downlink_config() -> DownlinkConfig {
    DownlinkConfig {
        delay_est: Duration::from_millis(22_100),
        max_meta_depth: 5,
    }
}

fn serial_link(standards: Arc<DataStandards>) -> Result<TransceiverCore> {
    let endecs = EndecChain::new()
        .with(IpUdpEndec::parse("192.168.10.105:43531", "192.168.150.3:42000")?)
        .with(SlipEndec);
    Ok(TransceiverCore::new("serial", standards, endecs, DataPathway::Wired, DataSource::Serial))
}

fn drive_fwd_200(standards: &DataStandards) -> Result<CommandPayload> {
    let mut args = IndexMap::new();
    args.insert("distance".to_owned(), Value::UInt(200));
    args.insert("speed".to_owned(), Value::UInt(100));
    args.insert("callback_id".to_owned(), Value::UInt(0xBEEF));
    Ok(CommandPayload::from_name(standards, "Navigation_NavDriveForward", args)?)
}

fn common_packet(seq: u8, payloads: Vec<Payload>) -> Packet {
    IrisCommonPacket::new(seq, PayloadCollection::from(payloads)).into()
}

#[test]
fn slip_ip_udp_stream_yields_the_drive_command() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut link = serial_link(standards.clone())?;
    let inner = common_packet(1, vec![drive_fwd_200(&standards)?.into()]).encode(&standards)?;
    let wire = EndecChain::new()
        .with(IpUdpEndec::parse("192.168.10.105:43531", "192.168.150.3:42000")?)
        .with(SlipEndec)
        .encode(&inner)?;
    assert_eq!((wire[0], wire[wire.len() - 1]), (0xC0, 0xC0));

    let packets = link.process_frames(vec![RawFrame::new(wire)]);
    let message: DownlinkedPacketsMessage =
        over_the_bus(Topic::DlPackets, DownlinkedPacketsMessage { packets })?;
    assert_eq!(message.packets.len(), 1);

    let packet = &message.packets[0];
    assert_eq!(packet.kind(), PacketKind::IrisCommon);
    let commands: Vec<&CommandPayload> = packet.payloads().commands().collect();
    assert_eq!(commands.len(), 1);
    assert_eq!(commands[0].name(&standards).as_deref(), Some("Navigation_NavDriveForward"));
    assert_eq!(commands[0].args["distance"], Value::UInt(200));
    assert_eq!(commands[0].args["speed"], Value::UInt(100));
    assert_eq!(commands[0].args["callback_id"], Value::UInt(0xBEEF));
    Ok(())
}

#[test]
fn checksum_corruption_surfaces_as_unsupported_downstream() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut link = serial_link(standards.clone())?;
    let mut inner = common_packet(1, vec![drive_fwd_200(&standards)?.into()]).encode(&standards)?;
    inner[3] ^= 0x01;
    let wire = EndecChain::new()
        .with(IpUdpEndec::parse("192.168.10.105:43531", "192.168.150.3:42000")?)
        .with(SlipEndec)
        .encode(&inner)?;

    let packets = link.process_frames(vec![RawFrame::new(wire)]);
    assert_eq!(packets.len(), 1);
    assert_eq!(packets[0].kind(), PacketKind::Unsupported);
    assert_eq!(packets[0].payloads().commands().count(), 0);

    let mut downlink = DownlinkProcessor::new(standards.clone(), MetaRuntime::empty(), &downlink_config());
    let message: DownlinkedPacketsMessage =
        over_the_bus(Topic::DlPackets, DownlinkedPacketsMessage { packets })?;
    let out: DownlinkedPayloadsMessage =
        over_the_bus(Topic::DlPayloads, downlink.process(message).into_message())?;
    assert_eq!(out.payloads.commands().count(), 0);
    let names: Vec<String> = out.payloads.events().filter_map(|e| e.name(&standards)).collect();
    assert_eq!(names, vec!["GdsPackets_UnsupportedPacket".to_owned()]);
    Ok(())
}

#[test]
fn zero_detailed_status_decodes_to_all_zero_fields() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut frame = vec![0xD5];
    frame.extend([0u8; 23]);

    let packet = parse_packet(&frame, &standards);
    let Packet::WatchdogDetailedStatus(status) = &packet else {
        return Err(anyhow!("expected a detailed status packet, got {}", packet.kind()));
    };
    assert!(status.status.truncated);

    let value = |name: &str| -> Result<Value> {
        packet
            .payloads()
            .telemetry()
            .find(|t| t.name(&standards).as_deref() == Some(name))
            .map(|t| t.value.clone())
            .ok_or_else(|| anyhow!("{name} missing"))
    };
    assert_eq!(value("WatchdogDetailedStatus_Watchdog_State")?.as_i128(), Some(0));
    assert_eq!(value("WatchdogDetailedStatus_Heater_IsHeating")?.as_f64(), Some(0.0));
    assert_eq!(value("WatchdogDetailedStatus_Heater_Kp")?.as_i128(), Some(0));
    assert_eq!(value("WatchdogDetailedStatus_I2C_BatteryChargeRaw")?.as_i128(), Some(0));
    Ok(())
}

fn telemetry_packet(standards: &DataStandards, samples: &[(&str, Value, u32)]) -> Result<Packet> {
    let payloads = samples
        .iter()
        .map(|(name, value, ts)| {
            TelemetryPayload::for_channel(standards, name, value.clone(), *ts).map(Payload::from)
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(common_packet(7, payloads))
}

fn scet(payload: &Payload) -> Result<DateTime<Utc>> {
    payload
        .downlink_times()
        .and_then(|t| t.scet_est)
        .ok_or_else(|| anyhow!("payload has no SCET estimate"))
}

#[test]
fn scet_estimates_for_one_receipt() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut link = serial_link(standards.clone())?;
    let packet = telemetry_packet(
        &standards,
        &[
            (SPEED, Value::UInt(10), 100),
            (SPEED, Value::UInt(20), 200),
            (SPEED, Value::UInt(30), 500),
        ],
    )?;
    let wire = link.encode_packet(&packet)?;
    let packets = link.process_frames(vec![RawFrame::new(wire)]);
    let received: DownlinkedPacketsMessage =
        over_the_bus(Topic::DlPackets, DownlinkedPacketsMessage { packets })?;
    let pmcc_rx = received.packets[0]
        .payloads()
        .iter()
        .next()
        .and_then(|p| p.downlink_times())
        .and_then(|t| t.pmcc_rx)
        .ok_or_else(|| anyhow!("transceiver did not stamp a receipt time"))?;

    let mut downlink = DownlinkProcessor::new(standards.clone(), MetaRuntime::empty(), &downlink_config());
    let out: DownlinkedPayloadsMessage =
        over_the_bus(Topic::DlPayloads, downlink.process(received).into_message())?;

    let base = pmcc_rx - chrono::Duration::milliseconds(22_100);
    let expected = vec![
        base - chrono::Duration::milliseconds(400),
        base - chrono::Duration::milliseconds(300) + chrono::Duration::microseconds(1),
        base + chrono::Duration::microseconds(2),
    ];
    let got = out.payloads.iter().map(scet).collect::<Result<Vec<_>>>()?;
    assert_eq!(got, expected);
    Ok(())
}

/// Latest speed plus latest heading.
struct Motion;

impl MetaChannel for Motion {
    fn proto(&self) -> MetaChannelProto {
        MetaChannelProto::new("Motion", 0, DataType::F64)
    }

    fn watching(&self) -> Vec<String> {
        vec![SPEED.to_owned(), HEADING.to_owned()]
    }

    fn update_behavior(&self) -> UpdateBehavior {
        UpdateBehavior::Any
    }

    fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
        let consulted: Vec<_> = [SPEED, HEADING]
            .iter()
            .filter_map(|name| inputs.latest(name).cloned())
            .collect();
        let total: f64 = consulted.iter().filter_map(|s| s.value.as_f64()).sum();
        Some(Calculation::new(total, consulted))
    }
}

#[test]
fn any_metachannel_emits_once_per_watched_sample() -> Result<()> {
    let mut standards = fixtures::standards();
    let module = MetaModule::new("Motion", 0xA100, vec![Box::new(Motion) as Box<dyn MetaChannel>])?;
    let runtime = MetaRuntime::new(vec![module], 5);
    runtime.register(&mut standards)?;
    let standards = Arc::new(standards);

    let mut link = serial_link(standards.clone())?;
    let packet = telemetry_packet(
        &standards,
        &[
            (SPEED, Value::UInt(1), 100),
            (SPEED, Value::UInt(2), 200),
            (HEADING, Value::Float(5.0), 300),
        ],
    )?;
    let wire = link.encode_packet(&packet)?;
    let packets = link.process_frames(vec![RawFrame::new(wire)]);

    let mut downlink = DownlinkProcessor::new(standards.clone(), runtime, &downlink_config());
    let batch = downlink.process(DownlinkedPacketsMessage { packets });
    assert_eq!((batch.downlinked, batch.generated), (3, 3));
    let out: DownlinkedPayloadsMessage = over_the_bus(Topic::DlPayloads, batch.into_message())?;

    let generated: Vec<&TelemetryPayload> = out
        .payloads
        .telemetry()
        .filter(|t| t.source == DataSource::Generated)
        .collect();
    let names: Vec<String> = generated.iter().filter_map(|t| t.name(&standards)).collect();
    assert_eq!(names, vec!["MetaModMotion_Motion"; 3]);
    let values: Vec<f64> = generated.iter().filter_map(|t| t.value.as_f64()).collect();
    assert_eq!(values, vec![1.0, 2.0, 7.0]);
    Ok(())
}

#[test]
fn individual_split_uplinks_consecutive_packets_that_survive_the_link() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let mut uplink = UplinkProcessor::new(standards.clone(), &UplinkConfig { use_seq_num: true });

    // Move the class counter off zero.
    let warmup = UplinkPayloadsRequestMessage {
        payloads: vec![drive_fwd_200(&standards)?.into()],
        split: PacketSplit::Individual,
        packet_class: None,
        target_xcvr: TargetXcvr::All,
    };
    assert_eq!(uplink.process(warmup).packets.len(), 1);
    let start = uplink.sequences().peek(PacketKind::IrisCommon);

    let mut stop = CommandPayload::from_name(&standards, "Navigation_NavStop", IndexMap::new())?;
    stop.pathway = DataPathway::Wired;
    let request: UplinkPayloadsRequestMessage = over_the_bus(
        Topic::UlPayloads,
        UplinkPayloadsRequestMessage {
            payloads: vec![drive_fwd_200(&standards)?.into(), stop.into()],
            split: PacketSplit::Individual,
            packet_class: None,
            target_xcvr: TargetXcvr::Serial,
        },
    )?;
    let outcome = uplink.process(request);
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.packets.len(), 2);

    let link = serial_link(standards.clone())?;
    let mut names = Vec::new();
    for (i, message) in outcome.packets.into_iter().enumerate() {
        let message: UplinkPacketRequestMessage = over_the_bus(Topic::UlPacket, message)?;
        assert!(message.target_xcvr.includes("serial"));
        assert_eq!(message.packet.seq_num(), Some(start + i as u8));

        let wire = link.encode_packet(&message.packet)?;
        let inner = EndecChain::new()
            .with(IpUdpEndec::parse("192.168.10.105:43531", "192.168.150.3:42000")?)
            .with(SlipEndec)
            .decode(&wire)?;
        let parsed = parse_packet(&inner, &standards);
        assert_eq!(parsed.seq_num(), Some(start + i as u8));
        let commands: Vec<&CommandPayload> = parsed.payloads().commands().collect();
        assert_eq!(commands.len(), 1);
        names.extend(commands[0].name(&standards));
    }
    assert_eq!(names, ["Navigation_NavDriveForward", "Navigation_NavStop"]);
    Ok(())
}
