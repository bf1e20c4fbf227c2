//! ---
//! ems_section: "15-testing-qa-runbook"
//! ems_subsection: "integration-tests"
//! ems_type: "test"
//! ems_scope: "code"
//! ems_description: "Downlink processor against the fixture catalog."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use iris_gds_catalog::{fixtures, DataStandards, DataType};
use iris_gds_codec::{
    DataSource, DownlinkTimes, IrisCommonPacket, Packet, Payload, PayloadCollection,
    TelemetryPayload,
};
use iris_gds_common::{DownlinkConfig, PipelineMetrics};
use iris_gds_downlink::{
    prepare_meta_runtime, Calculation, DownlinkProcessor, Inputs, MetaChannel, MetaChannelProto,
    MetaModule, MetaRuntime, UpdateBehavior,
};
use iris_gds_ipc::messages::DownlinkedPacketsMessage;

const SPEED: &str = "Navigation_Speed";
const HEADING: &str = "Navigation_Heading";

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
}

fn config() -> DownlinkConfig {
    DownlinkConfig {
        delay_est: Duration::from_millis(22_100),
        max_meta_depth: 5,
    }
}

fn telemetry(standards: &DataStandards, name: &str, value: f64, ts: u32) -> Payload {
    let mut payload = TelemetryPayload::for_channel(standards, name, value, ts).expect("channel");
    payload.downlink_times = Some(DownlinkTimes::received_at(t0()));
    payload.into()
}

fn message(payloads: Vec<Payload>) -> DownlinkedPacketsMessage {
    let packet: Packet = IrisCommonPacket::new(7, PayloadCollection::from(payloads)).into();
    DownlinkedPacketsMessage {
        packets: vec![packet],
    }
}

fn scet(payload: &Payload) -> DateTime<Utc> {
    payload
        .downlink_times()
        .and_then(|t| t.scet_est)
        .expect("scet stamped")
}

/// Speed plus heading, recalculated on any update.
struct Motion;

impl MetaChannel for Motion {
    fn proto(&self) -> MetaChannelProto {
        MetaChannelProto::new("Motion", 0, DataType::F64)
    }

    fn watching(&self) -> Vec<String> {
        vec![SPEED.to_string(), HEADING.to_string()]
    }

    fn update_behavior(&self) -> UpdateBehavior {
        UpdateBehavior::Any
    }

    fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
        let consulted: Vec<_> = [SPEED, HEADING]
            .iter()
            .filter_map(|name| inputs.latest(name).cloned())
            .collect();
        let total = consulted.iter().filter_map(|s| s.value.as_f64()).sum::<f64>();
        Some(Calculation::new(total, consulted))
    }
}

fn processor_with(channels: Vec<Box<dyn MetaChannel>>) -> DownlinkProcessor {
    let mut standards = fixtures::standards();
    let module = MetaModule::new("Motion", 0xA100, channels).expect("module");
    let runtime = MetaRuntime::new(vec![module], 5);
    assert_eq!(runtime.register(&mut standards).expect("register"), 1);
    DownlinkProcessor::new(Arc::new(standards), runtime, &config())
}

#[test]
fn scet_is_offset_from_the_newest_timestamp_of_a_receipt() {
    let standards = fixtures::standards();
    let mut processor = DownlinkProcessor::new(Arc::new(standards.clone()), MetaRuntime::empty(), &config());
    let batch = processor.process_at(
        message(vec![
            telemetry(&standards, SPEED, 1.0, 100),
            telemetry(&standards, SPEED, 2.0, 200),
            telemetry(&standards, SPEED, 3.0, 500),
        ]),
        t0(),
    );
    assert_eq!(batch.downlinked, 3);
    assert_eq!(batch.generated, 0);

    let base = t0() - chrono::Duration::milliseconds(22_100);
    let expected = [
        base - chrono::Duration::milliseconds(400),
        base - chrono::Duration::milliseconds(300) + chrono::Duration::microseconds(1),
        base + chrono::Duration::microseconds(2),
    ];
    let got: Vec<_> = batch.payloads.iter().map(scet).collect();
    assert_eq!(got, expected);
    assert!(batch
        .payloads
        .iter()
        .all(|p| p.downlink_times().and_then(|t| t.scet_dl_delay_est) == Some(Duration::from_millis(22_100))));
}

#[test]
fn any_metachannel_fires_once_per_watched_update() {
    let mut processor = processor_with(vec![Box::new(Motion) as Box<dyn MetaChannel>]);
    let standards = processor.standards().clone();
    let batch = processor.process_at(
        message(vec![
            telemetry(&standards, SPEED, 1.0, 100),
            telemetry(&standards, SPEED, 2.0, 200),
            telemetry(&standards, HEADING, 5.0, 300),
        ]),
        t0(),
    );
    assert_eq!(batch.downlinked, 3);
    assert_eq!(batch.generated, 3);

    let generated: Vec<&TelemetryPayload> = batch.payloads.telemetry().skip(3).collect();
    let names: Vec<String> = generated.iter().filter_map(|t| t.name(&standards)).collect();
    assert_eq!(names, vec!["MetaModMotion_Motion"; 3]);
    let values: Vec<f64> = generated.iter().filter_map(|t| t.value.as_f64()).collect();
    assert_eq!(values, vec![1.0, 2.0, 7.0]);
    assert!(generated.iter().all(|t| t.timestamp == 0 && t.source == DataSource::Generated));

    // The last emission consulted the heading sample, whose SCET is newest.
    let heading_scet = scet(batch.payloads.iter().nth(2).expect("heading"));
    let inherited = generated[2].downlink_times.and_then(|t| t.scet_est);
    assert_eq!(inherited, Some(heading_scet));
}

#[test]
fn prebuilt_modules_register_and_derive_power_values() {
    let mut standards = fixtures::standards();
    let runtime = prepare_meta_runtime(&mut standards, true, &config()).expect("runtime");
    assert!(standards.module("MetaModRoverPower").is_some());
    assert!(standards.module("MetaModLatency").is_some());
    assert!(standards.find_channel("MetaModRoverPower_FullSystemPower_W").is_some());

    let registry = prometheus::Registry::new();
    let metrics = PipelineMetrics::new(&registry).expect("metrics");
    let standards = Arc::new(standards);
    let mut processor = DownlinkProcessor::new(standards.clone(), runtime, &config()).with_metrics(metrics);

    let batch = processor.process_at(
        message(vec![
            telemetry(&standards, "WatchdogDetailedStatus_Adc_FullSystemVoltage", 24.0, 10),
            telemetry(&standards, "WatchdogDetailedStatus_Adc_FullSystemCurrentRaw", 2048.0, 10),
        ]),
        t0(),
    );
    let names: Vec<String> = batch
        .payloads
        .telemetry()
        .skip(2)
        .filter_map(|t| t.name(&standards))
        .collect();
    assert_eq!(
        names,
        ["MetaModRoverPower_FullSystemCurrent_mA", "MetaModRoverPower_FullSystemPower_W"]
    );

    let rendered = iris_gds_common::render_text(&registry);
    assert!(rendered.contains("iris_meta_emissions_total"));
    assert!(rendered.contains("MetaModRoverPower_FullSystemPower_W"));
}

#[test]
fn registering_twice_adds_nothing_the_second_time() {
    let mut standards = fixtures::standards();
    prepare_meta_runtime(&mut standards, true, &config()).expect("first");
    let again = MetaRuntime::new(
        iris_gds_downlink::prebuilt_meta_modules().expect("modules"),
        5,
    );
    assert_eq!(again.register(&mut standards).expect("second"), 0);
}

#[test]
fn unknown_channels_pass_through_without_meta_evaluation() {
    let mut processor = processor_with(vec![Box::new(Motion) as Box<dyn MetaChannel>]);
    let mut orphan = TelemetryPayload::new(0x7700, 0x42, 1u8.into(), 99);
    orphan.downlink_times = Some(DownlinkTimes::received_at(t0()));
    let batch = processor.process_at(message(vec![Payload::from(orphan)]), t0());
    assert_eq!(batch.downlinked, 1);
    assert_eq!(batch.generated, 0);
}
