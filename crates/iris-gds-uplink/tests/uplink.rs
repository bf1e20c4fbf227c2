//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Uplink processor against the fixture catalog."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;

use anyhow::Result;
use indexmap::IndexMap;
use iris_gds_catalog::{fixtures, DataStandards};
use iris_gds_codec::{parse_packet, CommandPayload, Packet, PacketKind, Payload, Value};
use iris_gds_common::{PipelineMetrics, UplinkConfig};
use iris_gds_ipc::messages::{PacketSplit, TargetXcvr, UplinkPayloadsRequestMessage};
use iris_gds_uplink::UplinkProcessor;

fn drive(standards: &DataStandards, distance: u64) -> Result<Payload> {
    let mut args = IndexMap::new();
    args.insert("distance".to_owned(), Value::UInt(distance));
    args.insert("speed".to_owned(), Value::UInt(100));
    args.insert("callback_id".to_owned(), Value::UInt(0xBEEF));
    Ok(CommandPayload::from_name(standards, "Navigation_NavDriveForward", args)?.into())
}

fn request(payloads: Vec<Payload>) -> UplinkPayloadsRequestMessage {
    UplinkPayloadsRequestMessage {
        payloads,
        split: PacketSplit::Individual,
        packet_class: None,
        target_xcvr: TargetXcvr::All,
    }
}

#[test]
fn individual_split_numbers_packets_consecutively_in_input_order() -> Result<()> {
    let standards = Arc::new(fixtures::standards());
    let registry = prometheus::Registry::new();
    let metrics = PipelineMetrics::new(&registry)?;
    let mut processor =
        UplinkProcessor::new(standards.clone(), &UplinkConfig { use_seq_num: true }).with_metrics(metrics.clone());

    // Move the counter off zero first.
    let warmup = processor.process(request(vec![drive(&standards, 1)?]));
    assert_eq!(warmup.packets.len(), 1);
    let start = processor.sequences().peek(PacketKind::IrisCommon);
    assert_eq!(start, 1);

    let outcome = processor.process(request(vec![drive(&standards, 200)?, drive(&standards, 50)?]));
    assert_eq!(outcome.failed, 0);
    assert_eq!(outcome.packets.len(), 2);

    let mut distances = Vec::new();
    for (i, message) in outcome.packets.iter().enumerate() {
        assert_eq!(message.packet.seq_num(), Some(start + i as u8));
        let commands: Vec<&CommandPayload> = message.packet.payloads().commands().collect();
        assert_eq!(commands.len(), 1);
        distances.push(commands[0].args.get("distance").cloned());

        // The packet survives its own wire format.
        let bytes = message.packet.encode(&standards)?;
        let Packet::IrisCommon(parsed) = parse_packet(&bytes, &standards) else {
            panic!("uplinked packet did not parse back as a common packet");
        };
        assert_eq!(parsed.seq_num, start + i as u8);
    }
    assert_eq!(distances, vec![Some(Value::UInt(200)), Some(Value::UInt(50))]);
    assert_eq!(metrics.packets_for("uplink", "IrisCommon"), 3);
    Ok(())
}
