//! ---
//! ems_section: "05-networking-external-interfaces"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Lander parameter table and Peregrine telemetry packing."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Parameters published by the lander. Two of them carry raw Iris packets;
//! the rest are housekeeping values that map onto `Peregrine` channels.

use chrono::{DateTime, Utc};
use iris_gds_catalog::{loader::standardize_constant_name, DataStandards, DataType};
use iris_gds_codec::{
    DataPathway, DownlinkTimes, Packet, PayloadCollection, PeregrineDummyPacket, TelemetryPayload,
    Value,
};
use tracing::warn;

/// Iris telemetry over the RS-422 umbilical.
pub const IRIS_TM_RS422: &str = "/Peregrine/payloads/iris/iris-payload-tm-rs422";
/// Iris telemetry over the lander WiFi.
pub const IRIS_TM_WLAN: &str = "/Peregrine/payloads/iris/iris-payload-tm-wlan";

/// Parameters that carry Iris packet bytes, with the pathway each implies.
pub const IRIS_TELEM_PARAMS: &[(&str, DataPathway)] = &[
    (IRIS_TM_RS422, DataPathway::Wired),
    (IRIS_TM_WLAN, DataPathway::Wireless),
];

/// Unit change between a lander parameter and its channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    /// Same units.
    Identity,
    /// Lander reports Celsius, the channel is Kelvin.
    CelsiusToKelvin,
}

/// Lander parameter bound to a `Peregrine` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LanderParam {
    /// Qualified YAMCS name.
    pub yamcs: &'static str,
    /// Channel name inside the `Peregrine` module.
    pub channel: &'static str,
    /// Unit change applied on the way in.
    pub conversion: Conversion,
}

const fn param(yamcs: &'static str, channel: &'static str) -> LanderParam {
    LanderParam {
        yamcs,
        channel,
        conversion: Conversion::Identity,
    }
}

const fn kelvin(yamcs: &'static str, channel: &'static str) -> LanderParam {
    LanderParam {
        yamcs,
        channel,
        conversion: Conversion::CelsiusToKelvin,
    }
}

/// Every housekeeping parameter the ground can see.
pub const LANDER_PARAMS: &[LanderParam] = &[
    param("/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Operational_EnabledFet", "IrisOperationalEnabledFet"),
    param("/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Release_EnabledFet", "IrisReleaseEnabledFet"),
    param("/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Operational_avgCurrent", "IrisOperationalAvgCurrent"),
    param("/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Release_avgCurrent", "IrisReleaseAvgCurrent"),
    param("/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Operational_maxCurrent", "IrisOperationalMaxCurrent"),
    param("/Peregrine/PL1/LSS1_Derived/LSS1_HK_Derived/Iris_Release_maxCurrent", "IrisReleaseMaxCurrent"),
    param("/Peregrine/PL1/SLIPsvc@3Status", "SlipServiceStatus"),
    param("/Peregrine/PL1/WIFIsvc@3Status", "WifiServiceStatus"),
    kelvin("/Peregrine/FCPU/TMGR/TCS_DECKD_1/TCS_DECKD_1", "DeckD1TempKelvin"),
    kelvin("/Peregrine/FCPU/TMGR/TCS_DECKD_2/TCS_DECKD_2", "DeckD2TempKelvin"),
    kelvin("/Peregrine/FCPU/TMGR/TCS_DECKD_3/TCS_DECKD_3", "DeckD3TempKelvin"),
];

/// Pathway implied by an Iris telemetry parameter, `None` for anything else.
pub fn iris_pathway(name: &str) -> Option<DataPathway> {
    IRIS_TELEM_PARAMS
        .iter()
        .find(|(param, _)| *param == name)
        .map(|(_, pathway)| *pathway)
}

/// Table entry for a housekeeping parameter.
pub fn lander_param(name: &str) -> Option<&'static LanderParam> {
    LANDER_PARAMS.iter().find(|p| p.yamcs == name)
}

/// Every parameter worth subscribing to.
pub fn all_params() -> Vec<&'static str> {
    LANDER_PARAMS
        .iter()
        .map(|p| p.yamcs)
        .chain(IRIS_TELEM_PARAMS.iter().map(|(name, _)| *name))
        .collect()
}

/// One housekeeping value as the lander reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct LanderSample {
    /// Qualified YAMCS name.
    pub name: String,
    /// Engineering value.
    pub value: Value,
    /// When the lander generated the value.
    pub generation_time: Option<DateTime<Utc>>,
    /// When the AMCC received it.
    pub reception_time: Option<DateTime<Utc>>,
}

fn convert(value: Value, conversion: Conversion) -> Value {
    match (conversion, value) {
        (Conversion::Identity, Value::Text(text)) => Value::Text(standardize_constant_name(&text)),
        (Conversion::Identity, value) => value,
        (Conversion::CelsiusToKelvin, Value::Float(c)) => Value::Float(c + 273.15),
        (Conversion::CelsiusToKelvin, Value::Int(c)) => Value::Float(c as f64 + 273.15),
        (Conversion::CelsiusToKelvin, Value::UInt(c)) => Value::Float(c as f64 + 273.15),
        (Conversion::CelsiusToKelvin, value) => value,
    }
}

/// Pack housekeeping samples into one `PeregrineDummyPacket`. Unknown
/// parameters are skipped with a warning; `None` when nothing was usable.
pub fn peregrine_packet(standards: &DataStandards, samples: Vec<LanderSample>) -> Option<Packet> {
    let mut payloads = PayloadCollection::new();
    for sample in samples {
        let Some(param) = lander_param(&sample.name) else {
            warn!(param = %sample.name, "not a known lander parameter");
            continue;
        };
        let qualified = format!("Peregrine_{}", param.channel);
        let mut value = convert(sample.value, param.conversion);
        let float_channel = standards
            .find_channel(&qualified)
            .is_some_and(|(_, c)| matches!(c.datatype, DataType::F32 | DataType::F64));
        if float_channel {
            value = match value {
                Value::Int(v) => Value::Float(v as f64),
                Value::UInt(v) => Value::Float(v as f64),
                other => other,
            };
        }
        match TelemetryPayload::for_channel(standards, &qualified, value, 0) {
            Ok(mut telem) => {
                telem.downlink_times = Some(DownlinkTimes {
                    scet_est: sample.generation_time,
                    lander_rx: sample.generation_time,
                    amcc_rx: sample.reception_time,
                    ..DownlinkTimes::default()
                });
                payloads.push(telem);
            }
            Err(err) => warn!(param = %sample.name, error = %err, "lander parameter has no channel"),
        }
    }
    (!payloads.is_empty()).then(|| PeregrineDummyPacket::new(payloads).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;

    fn sample(name: &str, value: Value) -> LanderSample {
        LanderSample {
            name: name.to_owned(),
            value,
            generation_time: None,
            reception_time: None,
        }
    }

    #[test]
    fn deck_temperatures_arrive_in_kelvin() {
        let standards = fixtures::standards();
        let packet = peregrine_packet(
            &standards,
            vec![sample("/Peregrine/FCPU/TMGR/TCS_DECKD_2/TCS_DECKD_2", Value::Float(-20.0))],
        )
        .expect("packet");
        let telem = packet.payloads().telemetry().next().expect("telemetry");
        assert_eq!(telem.name(&standards).as_deref(), Some("Peregrine_DeckD2TempKelvin"));
        let Value::Float(k) = telem.value else {
            panic!("expected float, got {:?}", telem.value);
        };
        assert!((k - 253.15).abs() < 1e-9);
    }

    #[test]
    fn enum_strings_are_standardized() {
        let standards = fixtures::standards();
        let packet = peregrine_packet(
            &standards,
            vec![
                sample("/Peregrine/PL1/WIFIsvc@3Status", Value::Text("Deactivating".to_owned())),
                sample("/Peregrine/MO/somethingElse", Value::UInt(1)),
            ],
        )
        .expect("packet");
        assert_eq!(packet.payloads().len(), 1);
        let telem = packet.payloads().telemetry().next().expect("telemetry");
        assert_eq!(telem.value.as_str(), Some("DEACTIVATING"));
    }

    #[test]
    fn iris_params_name_their_pathway() {
        assert_eq!(iris_pathway(IRIS_TM_WLAN), Some(DataPathway::Wireless));
        assert_eq!(iris_pathway(LANDER_PARAMS[0].yamcs), None);
        assert_eq!(all_params().len(), LANDER_PARAMS.len() + 2);
    }
}
