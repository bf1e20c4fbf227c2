//! ---
//! ems_section: "01-core-functionality"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "MetaModules shipped with the ground system."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Channel order inside each module fixes the channel IDs, so channels are
//! only ever appended.

use chrono::{DateTime, Utc};
use iris_gds_catalog::DataType;
use iris_gds_codec::DownlinkTimes;

use crate::meta::{
    Calculation, Inputs, MetaChannel, MetaChannelProto, MetaModule, Sample, UpdateBehavior,
};
use crate::Result;

/// ID of `MetaModRoverPower`.
pub const ROVER_POWER_MODULE_ID: u16 = 0xA500;
/// ID of `MetaModLatency`.
pub const LATENCY_MODULE_ID: u16 = 0xA600;

const FULL_SYSTEM_CURRENT_RAW: &str = "WatchdogDetailedStatus_Adc_FullSystemCurrentRaw";
const FULL_SYSTEM_VOLTAGE: &str = "WatchdogDetailedStatus_Adc_FullSystemVoltage";
const FULL_SYSTEM_CURRENT_MA: &str = "MetaModRoverPower_FullSystemCurrent_mA";
const BATTERY_VOLTAGE: &str = "WatchdogDetailedStatus_I2C_BatteryVoltage";
const BATTERY_CURRENT: &str = "WatchdogDetailedStatus_I2C_BatteryCurrent";

/// Sense resistor on the full-system rail.
const FULL_SYSTEM_SENSE_OHM: f64 = 3.0 / 1000.0;

/// Current through a sense resistor of `r_sense_ohm` from a 12-bit reading
/// of the 500x current-sense amplifier on a 3.3 V reference.
pub fn adc_to_milliamps(r_sense_ohm: f64, adc_reading: f64) -> f64 {
    (adc_reading / 4095.0 * 3.3 - 0.000_015) / 500.0 / r_sense_ohm * 1000.0
}

/// Every prebuilt MetaModule.
pub fn prebuilt_meta_modules() -> Result<Vec<MetaModule>> {
    Ok(vec![rover_power_module()?, latency_module()?])
}

/// `MetaModRoverPower`: power-rail currents and powers.
pub fn rover_power_module() -> Result<MetaModule> {
    MetaModule::new(
        "RoverPower",
        ROVER_POWER_MODULE_ID,
        vec![
            Box::new(FullSystemCurrent) as Box<dyn MetaChannel>,
            Box::new(Product {
                name: "FullSystemPower_W",
                id: 1,
                inputs: [FULL_SYSTEM_VOLTAGE, FULL_SYSTEM_CURRENT_MA],
                scale: 1.0 / 1000.0,
            }),
            Box::new(Product {
                name: "BatteryPower_W",
                id: 2,
                inputs: [BATTERY_VOLTAGE, BATTERY_CURRENT],
                scale: 1.0,
            }),
        ],
    )
}

/// `MetaModLatency`: downlink latency averaged over every ten samples.
pub fn latency_module() -> Result<MetaModule> {
    MetaModule::new(
        "Latency",
        LATENCY_MODULE_ID,
        vec![
            Box::new(DownlinkLatency::new(
                "LanderToAmccLatencySec",
                0,
                |t: &DownlinkTimes| t.lander_rx,
                |t: &DownlinkTimes| t.amcc_rx,
            )) as Box<dyn MetaChannel>,
            Box::new(DownlinkLatency::new(
                "LanderToPmccLatencySec",
                1,
                |t: &DownlinkTimes| t.lander_rx,
                |t: &DownlinkTimes| t.pmcc_rx,
            )),
        ],
    )
}

struct FullSystemCurrent;

impl MetaChannel for FullSystemCurrent {
    fn proto(&self) -> MetaChannelProto {
        MetaChannelProto::new("FullSystemCurrent_mA", 0, DataType::F64)
    }

    fn watching(&self) -> Vec<String> {
        vec![FULL_SYSTEM_CURRENT_RAW.to_string()]
    }

    fn update_behavior(&self) -> UpdateBehavior {
        UpdateBehavior::Any
    }

    fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
        let raw = inputs.latest(FULL_SYSTEM_CURRENT_RAW)?;
        let milliamps = adc_to_milliamps(FULL_SYSTEM_SENSE_OHM, raw.value.as_f64()?);
        Some(Calculation::new(milliamps, vec![raw.clone()]))
    }
}

/// `scale * a * b` once both inputs are fresh.
struct Product {
    name: &'static str,
    id: u8,
    inputs: [&'static str; 2],
    scale: f64,
}

impl MetaChannel for Product {
    fn proto(&self) -> MetaChannelProto {
        MetaChannelProto::new(self.name, self.id, DataType::F64)
    }

    fn watching(&self) -> Vec<String> {
        self.inputs.iter().map(|s| s.to_string()).collect()
    }

    fn update_behavior(&self) -> UpdateBehavior {
        UpdateBehavior::All
    }

    fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
        let [a, b] = self.inputs;
        let (a, b) = (inputs.latest(a)?, inputs.latest(b)?);
        let value = self.scale * a.value.as_f64()? * b.value.as_f64()?;
        Some(Calculation::new(value, vec![a.clone(), b.clone()]))
    }
}

type TimeKey = fn(&DownlinkTimes) -> Option<DateTime<Utc>>;

/// Mean of `to - from` over every [`DownlinkLatency::N_AVG`] samples that
/// carry both times.
struct DownlinkLatency {
    name: &'static str,
    id: u8,
    from: TimeKey,
    to: TimeKey,
    buffer: Vec<f64>,
}

impl DownlinkLatency {
    const N_AVG: usize = 10;

    fn new(name: &'static str, id: u8, from: TimeKey, to: TimeKey) -> Self {
        Self {
            name,
            id,
            from,
            to,
            buffer: Vec::with_capacity(Self::N_AVG),
        }
    }

    fn latency_sec(&self, sample: &Sample) -> Option<f64> {
        let times = sample.downlink_times.as_ref()?;
        let (from, to) = ((self.from)(times)?, (self.to)(times)?);
        let micros = (to - from).num_microseconds()?;
        Some(micros as f64 / 1e6)
    }
}

impl MetaChannel for DownlinkLatency {
    fn proto(&self) -> MetaChannelProto {
        MetaChannelProto::new(self.name, self.id, DataType::F64)
    }

    fn watching(&self) -> Vec<String> {
        Vec::new()
    }

    fn watches_everything(&self) -> bool {
        true
    }

    fn update_behavior(&self) -> UpdateBehavior {
        UpdateBehavior::Any
    }

    fn calculate(&mut self, inputs: &Inputs<'_>) -> Option<Calculation> {
        let trigger = inputs.trigger()?;
        // Derived values carry inherited times and would count twice.
        if trigger.name.starts_with(iris_gds_catalog::META_MODULE_PREFIX) {
            return None;
        }
        let latency = self.latency_sec(trigger)?;
        self.buffer.push(latency);
        if self.buffer.len() < Self::N_AVG {
            return None;
        }
        let mean = self.buffer.iter().sum::<f64>() / self.buffer.len() as f64;
        self.buffer.clear();
        Some(Calculation::new(mean, vec![trigger.clone()]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::MetaRuntime;
    use chrono::TimeZone;
    use iris_gds_codec::Value;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 12, 0, 0).unwrap()
    }

    fn sample(name: &str, value: Value, times: Option<DownlinkTimes>) -> Sample {
        Sample {
            name: name.to_string(),
            value,
            timestamp: 10,
            downlink_times: times,
        }
    }

    #[test]
    fn adc_conversion_matches_the_sense_amplifier() {
        let full_scale = adc_to_milliamps(0.01, 4095.0);
        assert!((full_scale - (3.3 - 0.000_015) / 500.0 / 0.01 * 1000.0).abs() < 1e-9);
        assert!(adc_to_milliamps(0.05, 0.0) < 0.0);
    }

    #[test]
    fn power_is_derived_from_a_derived_current() {
        let mut runtime = MetaRuntime::new(vec![rover_power_module().expect("module")], 5);
        let out = runtime.evaluate(
            vec![
                sample(FULL_SYSTEM_VOLTAGE, Value::Float(28.0), None),
                sample(FULL_SYSTEM_CURRENT_RAW, Value::UInt(1000), None),
            ],
            t0(),
        );
        let names: Vec<&str> = out.iter().map(|e| e.channel.as_str()).collect();
        assert_eq!(names, [FULL_SYSTEM_CURRENT_MA, "MetaModRoverPower_FullSystemPower_W"]);
        let current = out[0].payload.value.as_f64().expect("float");
        let power = out[1].payload.value.as_f64().expect("float");
        assert!((power - 28.0 * current / 1000.0).abs() < 1e-9);
    }

    #[test]
    fn latency_is_averaged_over_ten_samples() {
        let mut runtime = MetaRuntime::new(vec![latency_module().expect("module")], 5);
        let mut out = Vec::new();
        for i in 0..25i64 {
            let lander = t0() + chrono::Duration::seconds(i);
            let times = DownlinkTimes {
                lander_rx: Some(lander),
                amcc_rx: Some(lander + chrono::Duration::milliseconds(1000 + 100 * (i % 10))),
                ..DownlinkTimes::received_at(lander + chrono::Duration::seconds(3))
            };
            out.extend(runtime.evaluate(vec![sample("Imu_AccX", Value::Int(i), Some(times))], t0()));
        }
        let amcc: Vec<f64> = out
            .iter()
            .filter(|e| e.channel == "MetaModLatency_LanderToAmccLatencySec")
            .filter_map(|e| e.payload.value.as_f64())
            .collect();
        let pmcc: Vec<f64> = out
            .iter()
            .filter(|e| e.channel == "MetaModLatency_LanderToPmccLatencySec")
            .filter_map(|e| e.payload.value.as_f64())
            .collect();
        assert_eq!(amcc.len(), 2);
        assert!(amcc.iter().all(|v| (v - 1.45).abs() < 1e-9));
        assert_eq!(pmcc, vec![3.0, 3.0]);
    }

    #[test]
    fn samples_without_times_do_not_count() {
        let mut runtime = MetaRuntime::new(vec![latency_module().expect("module")], 5);
        for _ in 0..20 {
            let out = runtime.evaluate(vec![sample("Imu_AccX", Value::Int(0), None)], t0());
            assert!(out.is_empty());
        }
    }
}
