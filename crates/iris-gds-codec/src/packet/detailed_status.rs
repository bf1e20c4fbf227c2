//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Watchdog detailed status bitstream and its derived telemetry."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! The detailed status is a `0xD5` byte followed by a 46-byte LSB-first
//! bitstream. Raw fields surface as telemetry under their own names; the
//! physical quantities derived from them (voltages, temperatures, heater
//! power) surface as the remaining `WatchdogDetailedStatus` channels.

use indexmap::IndexMap;
use iris_gds_catalog::{BitfieldSpec, DataStandards};
use serde::{Deserialize, Serialize};

use super::{module_telemetry, PacketClass, PacketCore, PacketKind};
use crate::bitfield::{self, extract_bits, insert_bits};
use crate::collection::PayloadCollection;
use crate::primitive::Value;
use crate::{CodecError, Result};

const MODULE: &str = "WatchdogDetailedStatus";

/// Field names and bit widths, in stream order.
const LAYOUT: &[(&str, usize)] = &[
    ("Io_ChargingStatus1", 1),
    ("Io_ChargingStatus2", 1),
    ("Io_BatteryConnectionStatus", 1),
    ("Io_BatteryLatchStatus", 1),
    ("Io_1V2PowerGood", 1),
    ("Io_1V8PowerGood", 1),
    ("Io_3V3PowerGood", 1),
    ("Io_5V0PowerGood", 1),
    ("Watchdog_State", 8),
    ("Watchdog_DeploymentStatus", 2),
    ("Watchdog_Uart0State", 1),
    ("Watchdog_Uart1State", 1),
    ("Adc_BatteryTempRaw", 12),
    ("Watchdog_DetailedHeartbeatSequenceNumber", 8),
    ("Watchdog_DigitalOutputStates", 32),
    ("Watchdog_ResetLogs", 40),
    ("Adc_LanderVoltageRaw", 7),
    ("Adc_BatteryChargingTempRaw", 9),
    ("Adc_FullSystemVoltageRaw", 5),
    ("Adc_FullSystemCurrentRaw", 9),
    ("Adc_SwitchedBatteryVoltageRaw", 9),
    ("Adc_Vcc24VoltageRaw", 7),
    ("Heater_ControlEnabled", 1),
    ("Heater_IsHeating", 1),
    ("Adc_2V5VoltageRaw", 5),
    ("Adc_2V8VoltageRaw", 5),
    ("Adc_Vcc28VoltageRaw", 6),
    ("Heater_Kp", 16),
    ("Heater_PwmLimit_DutyCycleCounter", 16),
    ("Heater_SetpointValue", 16),
    ("Heater_OnValue", 16),
    ("Heater_OffValue", 16),
    ("Heater_DutyCyclePeriodCycles", 16),
    ("Heater_DutyCycleCounter", 16),
    ("I2C_BatteryChargeRaw", 16),
    ("I2C_BatteryVoltageRaw", 16),
    ("I2C_BatteryCurrentRaw", 16),
    ("I2C_FuelGaugeTempRaw", 16),
    ("I2C_BatteryChargeTelemRaw", 8),
    ("I2C_BatteryCurrentTelemRaw", 8),
];

/// ADC fields that carry only the upper bits of a 12-bit reading.
const ADC_UPPER_BITS: &[&str] = &[
    "Adc_LanderVoltageRaw",
    "Adc_BatteryChargingTempRaw",
    "Adc_FullSystemVoltageRaw",
    "Adc_SwitchedBatteryVoltageRaw",
    "Adc_Vcc24VoltageRaw",
    "Adc_2V5VoltageRaw",
    "Adc_2V8VoltageRaw",
    "Adc_Vcc28VoltageRaw",
];

/// Fuel gauge registers sent byte-swapped.
const I2C_SWAPPED: &[&str] = &[
    "I2C_BatteryChargeRaw",
    "I2C_BatteryVoltageRaw",
    "I2C_BatteryCurrentRaw",
    "I2C_FuelGaugeTempRaw",
];

const ADC_BITS: usize = 12;
const ADC_FULL_SCALE: f64 = 4095.0;
const VCC: f64 = 3.3;
const KELVIN: f64 = 273.15;
/// Largest lander voltage the bus is allowed to present.
const V_LANDER_MAX: f64 = 1.10 * 28.0;
/// Heater resistance, ohms.
const HEATER_OHMS: f64 = 628.245;
const HEATER_CLOCK_HZ: f64 = 8.0e6;

/// Thermistor curve temperatures, degC.
const THERM_DEG_C: [f64; 43] = [
    -55.0, -50.0, -45.0, -40.0, -35.0, -30.0, -25.0, -20.0, -15.0, -10.0, -5.0, 0.0, 5.0, 10.0,
    15.0, 20.0, 25.0, 30.0, 35.0, 40.0, 45.0, 50.0, 55.0, 60.0, 65.0, 70.0, 75.0, 80.0, 85.0, 90.0,
    95.0, 100.0, 105.0, 110.0, 115.0, 120.0, 125.0, 130.0, 135.0, 140.0, 145.0, 150.0, 155.0,
];

/// ADC counts of the 5k battery thermistor divider at [`THERM_DEG_C`].
const THERM_5K_ADC: [f64; 43] = [
    4012.0, 3977.0, 3929.0, 3866.0, 3784.0, 3680.0, 3551.0, 3395.0, 3214.0, 3008.0, 2781.0, 2540.0,
    2291.0, 2042.0, 1801.0, 1574.0, 1365.0, 1176.0, 1008.0, 861.0, 734.0, 625.0, 532.0, 453.0,
    386.0, 329.0, 282.0, 242.0, 208.0, 179.0, 155.0, 134.0, 116.0, 102.0, 89.0, 78.0, 68.0, 60.0,
    53.0, 47.0, 42.0, 37.0, 33.0,
];

/// R/R25 of the 10k charger thermistor at [`THERM_DEG_C`].
const THERM_10K_R_RATIO: [f64; 43] = [
    96.3, 67.01, 47.17, 33.65, 24.26, 17.7, 13.04, 9.707, 7.293, 5.533, 4.232, 3.265, 2.539, 1.99,
    1.571, 1.249, 1.0, 0.8057, 0.6531, 0.5327, 0.4369, 0.3603, 0.2986, 0.2488, 0.2083, 0.1752,
    0.1481, 0.1258, 0.1072, 0.09177, 0.07885, 0.068, 0.05886, 0.05112, 0.04454, 0.03893, 0.03417,
    0.03009, 0.02654, 0.02348, 0.02083, 0.01853, 0.01653,
];

/// Piecewise-linear interpolation over a descending `xs` curve, clamped
/// to its end points.
fn interp_descending(x: f64, xs: &[f64], ys: &[f64]) -> f64 {
    let (Some(&first), Some(&last)) = (xs.first(), xs.last()) else {
        return f64::NAN;
    };
    if x >= first {
        return ys[0];
    }
    if x <= last {
        return ys[ys.len() - 1];
    }
    for i in 1..xs.len() {
        let (x0, x1) = (xs[i - 1], xs[i]);
        if x <= x0 && x >= x1 {
            let t = (x0 - x) / (x0 - x1);
            return ys[i - 1] + t * (ys[i] - ys[i - 1]);
        }
    }
    f64::NAN
}

/// 5k battery thermistor ADC reading to Kelvin.
pub fn therm_5k_kelvin(adc: f64) -> f64 {
    interp_descending(adc, &THERM_5K_ADC, &THERM_DEG_C) + KELVIN
}

/// 10k charger thermistor ADC reading to Kelvin, 0 for a zero reading.
pub fn therm_10k_kelvin(adc: f64) -> f64 {
    if adc <= 0.0 {
        return 0.0;
    }
    let v = adc / ADC_FULL_SCALE * VCC;
    let r_th = 1.0 / ((VCC - v) / (v * 4320.0) - 1.0 / 19100.0);
    interp_descending(r_th / 10e3, &THERM_10K_R_RATIO, &THERM_DEG_C) + KELVIN
}

fn adc_volts(raw: u64) -> f64 {
    raw as f64 / ADC_FULL_SCALE * VCC
}

/// Fuses the two lander voltage sensors, falling back to the plausible one
/// when they disagree by more than half.
pub fn fused_lander_voltage(v_lander: f64, vcc28: f64) -> f64 {
    const D_LANDER: f64 = 0.25;
    const D_VCC28: f64 = 0.5;
    let largest = v_lander.abs().max(vcc28.abs());
    if largest == 0.0 {
        return 0.0;
    }
    if (vcc28 - v_lander).abs() / largest > 0.5 {
        let ceiling = 1.5 * V_LANDER_MAX;
        if v_lander > ceiling && vcc28 <= ceiling {
            return vcc28;
        }
        if vcc28 > ceiling && v_lander <= ceiling {
            return v_lander;
        }
        return v_lander.max(vcc28);
    }
    let total = D_LANDER + D_VCC28;
    v_lander * (1.0 - D_LANDER / total) + vcc28 * (1.0 - D_VCC28 / total)
}

/// Decoded detailed status fields, with ADC readings restored to 12 bits
/// and fuel gauge registers in host order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedStatus {
    fields: IndexMap<String, u64>,
    /// The frame was shorter than a full status and its tail read as zero.
    pub truncated: bool,
}

impl Default for DetailedStatus {
    fn default() -> Self {
        Self {
            fields: LAYOUT.iter().map(|(name, _)| ((*name).to_owned(), 0)).collect(),
            truncated: false,
        }
    }
}

impl DetailedStatus {
    /// Bytes in a complete bitstream.
    pub const STREAM_LEN: usize = 46;

    fn width(name: &str) -> Option<usize> {
        LAYOUT.iter().find(|(n, _)| *n == name).map(|(_, w)| *w)
    }

    /// Field value, 0 for unknown names.
    pub fn get(&self, name: &str) -> u64 {
        self.fields.get(name).copied().unwrap_or(0)
    }

    /// Set a field from its restored value.
    pub fn set(&mut self, name: &str, value: u64) -> Result<()> {
        let width = Self::width(name)
            .ok_or_else(|| CodecError::PrimitiveRange(format!("no detailed status field `{name}`")))?;
        let stored = if ADC_UPPER_BITS.contains(&name) { ADC_BITS } else { width };
        if value >> stored != 0 {
            return Err(CodecError::PrimitiveRange(format!(
                "{value} does not fit the {stored}-bit field `{name}`"
            )));
        }
        self.fields.insert(name.to_owned(), value);
        Ok(())
    }

    /// Fields in stream order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Parse a bitstream; bits past its end read as zero.
    pub fn from_stream(stream: &[u8]) -> Self {
        let mut fields = IndexMap::with_capacity(LAYOUT.len());
        let mut offset = 0;
        for &(name, width) in LAYOUT {
            let mut value = extract_bits(stream, offset, width);
            if ADC_UPPER_BITS.contains(&name) {
                value <<= ADC_BITS - width;
            } else if I2C_SWAPPED.contains(&name) {
                value = u64::from((value as u16).swap_bytes());
            }
            fields.insert(name.to_owned(), value);
            offset += width;
        }
        Self {
            fields,
            truncated: stream.len() < Self::STREAM_LEN,
        }
    }

    /// Complete bitstream.
    pub fn to_stream(&self) -> Vec<u8> {
        let mut out = vec![0u8; Self::STREAM_LEN];
        let mut offset = 0;
        for &(name, width) in LAYOUT {
            let mut value = self.get(name);
            if ADC_UPPER_BITS.contains(&name) {
                value >>= ADC_BITS - width;
            } else if I2C_SWAPPED.contains(&name) {
                value = u64::from((value as u16).swap_bytes());
            }
            insert_bits(&mut out, offset, width, value);
            offset += width;
        }
        out
    }

    fn volts(&self, name: &str) -> f64 {
        adc_volts(self.get(name))
    }

    /// Lander bus voltage from the lander sense line.
    pub fn lander_voltage(&self) -> f64 {
        (3616.0 / 3104.0) * self.volts("Adc_LanderVoltageRaw") * 2232.0 / 232.0
    }

    /// Lander bus voltage from the 28 V rail monitor.
    pub fn vcc28_voltage(&self) -> f64 {
        (3136.0 / 2944.0) * self.volts("Adc_Vcc28VoltageRaw") * 517.0 / 47.0
    }

    /// Best estimate of the lander voltage from both sensors.
    pub fn fused_lander_voltage(&self) -> f64 {
        fused_lander_voltage(self.lander_voltage(), self.vcc28_voltage())
    }

    fn percent(counter: u64, cycles: u64) -> f64 {
        if cycles == 0 {
            return f64::INFINITY;
        }
        100.0 * counter as f64 / cycles as f64
    }

    /// Heater duty cycle, percent.
    pub fn heater_duty_percent(&self) -> f64 {
        Self::percent(self.get("Heater_DutyCycleCounter"), self.get("Heater_DutyCyclePeriodCycles"))
    }

    /// Heater duty cycle ceiling, percent.
    pub fn heater_duty_limit_percent(&self) -> f64 {
        Self::percent(
            self.get("Heater_PwmLimit_DutyCycleCounter"),
            self.get("Heater_DutyCyclePeriodCycles"),
        )
    }

    fn heater_power(&self, percent: f64) -> (f64, f64) {
        let volts = self.fused_lander_voltage() * percent / 100.0;
        (volts, volts * volts / HEATER_OHMS)
    }

    /// Digital output pins, unpacked against the catalog layout.
    pub fn digital_outputs(&self, spec: &BitfieldSpec) -> Result<IndexMap<String, u64>> {
        let bytes = (self.get("Watchdog_DigitalOutputStates") as u32).to_le_bytes();
        bitfield::unpack(spec, &bytes)
    }

    /// Reset actions performed, unpacked against the catalog layout.
    pub fn reset_logs(&self, spec: &BitfieldSpec) -> Result<IndexMap<String, u64>> {
        bitfield::unpack(spec, &self.get("Watchdog_ResetLogs").to_le_bytes())
    }

    /// Pin states combining output level and direction: 0 driven low,
    /// 1 driven high, 2 input. `combined` is the target layout.
    pub fn combined_digital_states(
        &self,
        outputs: &BitfieldSpec,
        combined: &BitfieldSpec,
    ) -> Result<u64> {
        let out = self.digital_outputs(outputs)?;
        let pin = |name: &str| -> Result<u64> {
            out.get(&format!("OPSBI__{name}")).copied().ok_or_else(|| {
                CodecError::PayloadDecode(format!("digital outputs have no `OPSBI__{name}`"))
            })
        };
        let input_or = |input: &str, level: &str| -> Result<u64> {
            Ok(if pin(input)? == 1 { 2 } else { pin(level)? })
        };

        let mut states = IndexMap::with_capacity(combined.fields.len());
        for field in &combined.fields {
            let name = field.name.as_str();
            let state = match name {
                "CHRG_EN" => {
                    if pin("CHRG_EN_FORCE_HIGH")? == 1 {
                        1
                    } else {
                        pin("CHRG_EN")? * 2
                    }
                }
                "V_SYS_ALL_EN" => match (pin("V_SYS_ALL_EN_FORCE_LOW")?, pin("V_SYS_ALL_EN")?) {
                    (1, _) => 0,
                    (_, 1) => 1,
                    _ => 2,
                },
                "RADIO_N_RST" => input_or("RADIO_N_RESET_IS_INPUT", "RADIO_N_RST")?,
                "HERCULES_N_RST" | "HERCULES_N_PORRST" | "FPGA_N_RST" | "LATCH_SET"
                | "LATCH_RESET" | "BATT_STAT" => input_or(&format!("{name}_IS_INPUT"), name)?,
                n if n.starts_with(bitfield::PADDING_PREFIX) => 0,
                n => pin(n)?,
            };
            states.insert(field.name.clone(), state);
        }
        let bytes = bitfield::pack(combined, &states)?;
        Ok(bytes
            .iter()
            .rev()
            .fold(0u64, |acc, b| acc << 8 | u64::from(*b)))
    }

    /// Raw and derived telemetry values, keyed by channel name within the
    /// module.
    pub fn telemetry_values(&self, standards: &DataStandards) -> Result<Vec<(&'static str, Value)>> {
        let spec = |channel: &str| -> Result<BitfieldSpec> {
            standards
                .find_channel(&format!("{MODULE}_{channel}"))
                .and_then(|(_, c)| c.bitfields.clone())
                .ok_or_else(|| CodecError::PayloadDecode(format!("{MODULE}_{channel} has no bitfields")))
        };
        let combined = self.combined_digital_states(
            &spec("Watchdog_DigitalOutputStates")?,
            &spec("Watchdog_CombinedDigitalStates")?,
        )?;

        let mut values: Vec<(&'static str, Value)> = LAYOUT
            .iter()
            .map(|&(name, _)| (name, Value::UInt(self.get(name))))
            .collect();

        let raw = |name: &str| self.get(name) as f64;
        let (eff_v, eff_p) = self.heater_power(self.heater_duty_percent());
        let (_, eff_p_limit) = self.heater_power(self.heater_duty_limit_percent());
        values.extend([
            (
                "Io_ChargerState",
                Value::UInt(self.get("Io_ChargingStatus1") << 1 | self.get("Io_ChargingStatus2")),
            ),
            (
                "Io_BatteryState",
                Value::UInt(
                    self.get("Io_BatteryConnectionStatus") << 1 | self.get("Io_BatteryLatchStatus"),
                ),
            ),
            ("Watchdog_CombinedDigitalStates", Value::UInt(combined)),
            ("Adc_LanderVoltage", Value::Float(self.lander_voltage())),
            (
                "Adc_BatteryChargingTempKelvin",
                Value::Float(therm_10k_kelvin(raw("Adc_BatteryChargingTempRaw"))),
            ),
            ("Adc_BatteryChargingTempUncertaintyKelvin", Value::Float(0.0)),
            (
                "Adc_BatteryTempKelvin",
                Value::Float(therm_5k_kelvin(raw("Adc_BatteryTempRaw"))),
            ),
            ("Adc_BatteryTempUncertaintyKelvin", Value::Float(0.0)),
            (
                "Adc_FullSystemVoltage",
                Value::Float((3584.0 / 2944.0) * self.volts("Adc_FullSystemVoltageRaw") * 2232.0 / 232.0),
            ),
            (
                "Adc_FullSystemCurrent",
                Value::Float(self.volts("Adc_FullSystemCurrentRaw") * 4.6),
            ),
            (
                "Adc_SwitchedBatteryVoltage",
                Value::Float(
                    (3560.0 / 2928.0) * self.volts("Adc_SwitchedBatteryVoltageRaw") * 2274.0 / 274.0,
                ),
            ),
            ("Adc_2V5Voltage", Value::Float(self.volts("Adc_2V5VoltageRaw"))),
            ("Adc_2V8Voltage", Value::Float(self.volts("Adc_2V8VoltageRaw"))),
            ("Adc_Vcc28Voltage", Value::Float(self.vcc28_voltage())),
            (
                "Adc_Vcc24Voltage",
                Value::Float(self.volts("Adc_Vcc24VoltageRaw") * 377.0 / 47.0),
            ),
            (
                "Heater_PwmLimit_DutyCyclePercent",
                Value::Float(self.heater_duty_limit_percent()),
            ),
            ("Heater_EffectivePowerLimit", Value::Float(eff_p_limit)),
            (
                "Heater_SetpointKelvin",
                Value::Float(therm_5k_kelvin(raw("Heater_SetpointValue"))),
            ),
            ("Heater_OnTempKelvin", Value::Float(therm_5k_kelvin(raw("Heater_OnValue")))),
            ("Heater_OffTempKelvin", Value::Float(therm_5k_kelvin(raw("Heater_OffValue")))),
            (
                "Heater_DutyCyclePeriodMs",
                Value::Float(1000.0 * raw("Heater_DutyCyclePeriodCycles") / HEATER_CLOCK_HZ),
            ),
            ("Heater_DutyCyclePercent", Value::Float(self.heater_duty_percent())),
            ("Heater_EffectiveVoltage", Value::Float(eff_v)),
            ("Heater_EffectivePower", Value::Float(eff_p)),
            // The fuel gauge charge and telemetry counters are not calibrated.
            ("I2C_BatteryChargeMah", Value::Float(0.0)),
            (
                "I2C_BatteryVoltage",
                Value::Float(raw("I2C_BatteryVoltageRaw") * 0.001_080_338_75),
            ),
            (
                "I2C_BatteryCurrent",
                Value::Float(0.000_039_063_692_1 * raw("I2C_BatteryCurrentRaw")),
            ),
            (
                "I2C_FuelGaugeTempKelvin",
                Value::Float(0.007_782_101_17 * raw("I2C_FuelGaugeTempRaw")),
            ),
            ("I2C_BatteryChargeTelemMah", Value::Float(0.0)),
            ("I2C_BatteryCurrentTelemAmps", Value::Float(0.0)),
        ]);
        Ok(values)
    }
}

/// Detailed watchdog status, sent on request or while Hercules is off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogDetailedStatusPacket {
    pub(crate) core: PacketCore,
    /// Decoded fields.
    pub status: DetailedStatus,
}

impl WatchdogDetailedStatusPacket {
    const START: u8 = 0xD5;
    const MIN_LEN: usize = 24;
    const MAX_LEN: usize = 1 + DetailedStatus::STREAM_LEN;

    /// Packet built on the ground around `status`.
    pub fn new(status: DetailedStatus, standards: &DataStandards) -> Result<Self> {
        let payloads = Self::telemetry(&status, standards)?;
        Ok(Self {
            core: PacketCore::built(payloads),
            status,
        })
    }

    fn telemetry(status: &DetailedStatus, standards: &DataStandards) -> Result<PayloadCollection> {
        module_telemetry(standards, MODULE, status.telemetry_values(standards)?)
    }
}

impl PacketClass for WatchdogDetailedStatusPacket {
    const KIND: PacketKind = PacketKind::WatchdogDetailedStatus;

    fn is_valid(bytes: &[u8]) -> bool {
        (Self::MIN_LEN..=Self::MAX_LEN).contains(&bytes.len()) && bytes[0] == Self::START
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        if !Self::is_valid(bytes) {
            return Err(CodecError::PacketFraming(format!(
                "detailed status needs 0xD5 and {} to {} bytes, got {}",
                Self::MIN_LEN,
                Self::MAX_LEN,
                bytes.len()
            )));
        }
        let status = DetailedStatus::from_stream(&bytes[1..]);
        if status.truncated {
            tracing::debug!(len = bytes.len(), "detailed status is truncated, zero-filling its tail");
        }
        let payloads = Self::telemetry(&status, standards)?;
        Ok(Self {
            core: PacketCore::decoded(payloads, bytes),
            status,
        })
    }

    /// Always a complete frame, so truncated packets re-encode zero-filled.
    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(1 + DetailedStatus::STREAM_LEN);
        out.push(Self::START);
        out.extend(self.status.to_stream());
        Ok(out)
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;

    fn value(packet: &WatchdogDetailedStatusPacket, standards: &DataStandards, channel: &str) -> Value {
        let qualified = format!("{MODULE}_{channel}");
        packet
            .payloads()
            .telemetry()
            .find(|t| t.name(standards).as_deref() == Some(qualified.as_str()))
            .map(|t| t.value.clone())
            .unwrap_or_else(|| panic!("no {qualified}"))
    }

    #[test]
    fn layout_fills_the_stream() {
        let bits: usize = LAYOUT.iter().map(|(_, w)| w).sum();
        assert_eq!(bits, DetailedStatus::STREAM_LEN * 8);
    }

    #[test]
    fn every_channel_is_emitted_once() {
        let standards = fixtures::standards();
        let packet = WatchdogDetailedStatusPacket::new(DetailedStatus::default(), &standards).expect("build");
        let module = standards.module(MODULE).expect("module");
        assert_eq!(packet.payloads().len(), module.telemetry.len());
    }

    #[test]
    fn encode_then_decode_restores_fields() {
        let standards = fixtures::standards();
        let mut status = DetailedStatus::default();
        status.set("Watchdog_State", 16).expect("set");
        status.set("Adc_LanderVoltageRaw", 0b101_1010 << 5).expect("set");
        status.set("Adc_FullSystemCurrentRaw", 0x1AB).expect("set");
        status.set("I2C_BatteryVoltageRaw", 0x1234).expect("set");
        status.set("Watchdog_DigitalOutputStates", 0x2000_0041).expect("set");
        status.set("Watchdog_ResetLogs", 0x80_0000_0001).expect("set");
        let packet = WatchdogDetailedStatusPacket::new(status.clone(), &standards).expect("build");
        let bytes = packet.encode(&standards).expect("encode");
        assert_eq!(bytes.len(), 47);

        let back = WatchdogDetailedStatusPacket::decode(&bytes, &standards).expect("decode");
        assert!(!back.status.truncated);
        assert_eq!(back.status, status);
        assert_eq!(back.payloads(), packet.payloads());
    }

    #[test]
    fn digital_outputs_unpack_lsb_first() {
        let standards = fixtures::standards();
        let (_, channel) = standards
            .find_channel("WatchdogDetailedStatus_Watchdog_DigitalOutputStates")
            .expect("channel");
        let spec = channel.bitfields.as_ref().expect("bitfields");
        let mut status = DetailedStatus::default();
        // Bit 0 is the lander regulator enable, bit 6 Hercules power.
        status.set("Watchdog_DigitalOutputStates", 0b100_0001).expect("set");
        let pins = status.digital_outputs(spec).expect("unpack");
        assert_eq!(pins["OPSBI__V_LANDER_REG_EN"], 1);
        assert_eq!(pins["OPSBI__HERCULES_ON"], 1);
        assert_eq!(pins["OPSBI__HEATER"], 0);
    }

    #[test]
    fn combined_states_mark_inputs_and_overrides() {
        let standards = fixtures::standards();
        let spec = |name: &str| {
            standards
                .find_channel(name)
                .and_then(|(_, c)| c.bitfields.clone())
                .expect("bitfields")
        };
        let outputs = spec("WatchdogDetailedStatus_Watchdog_DigitalOutputStates");
        let combined = spec("WatchdogDetailedStatus_Watchdog_CombinedDigitalStates");

        let mut pins: IndexMap<String, u64> = outputs.fields.iter().map(|f| (f.name.clone(), 0)).collect();
        pins.insert("OPSBI__HEATER".into(), 1);
        pins.insert("OPSBI__CHRG_EN_FORCE_HIGH".into(), 1);
        pins.insert("OPSBI__V_SYS_ALL_EN".into(), 0);
        pins.insert("OPSBI__RADIO_N_RESET_IS_INPUT".into(), 1);
        pins.insert("OPSBI__BATT_STAT".into(), 1);
        let bytes = bitfield::pack(&outputs, &pins).expect("pack");
        let mut status = DetailedStatus::default();
        status
            .set("Watchdog_DigitalOutputStates", u64::from(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])))
            .expect("set");

        let word = status.combined_digital_states(&outputs, &combined).expect("combine");
        let states = bitfield::unpack(&combined, &(word as u32).to_le_bytes()).expect("unpack");
        assert_eq!(states["HEATER"], 1);
        assert_eq!(states["CHRG_EN"], 1);
        assert_eq!(states["V_SYS_ALL_EN"], 2);
        assert_eq!(states["RADIO_N_RST"], 2);
        assert_eq!(states["BATT_STAT"], 1);
        assert_eq!(states["FPGA_N_RST"], 0);
    }

    #[test]
    fn truncated_frames_zero_fill() {
        let standards = fixtures::standards();
        let mut status = DetailedStatus::default();
        status.set("Watchdog_State", 4).expect("set");
        status.set("I2C_FuelGaugeTempRaw", 0xBEEF).expect("set");
        let full = WatchdogDetailedStatusPacket::new(status, &standards)
            .and_then(|p| p.encode(&standards))
            .expect("encode");

        let packet = WatchdogDetailedStatusPacket::decode(&full[..30], &standards).expect("decode");
        assert!(packet.status.truncated);
        assert_eq!(packet.status.get("Watchdog_State"), 4);
        assert_eq!(packet.status.get("I2C_FuelGaugeTempRaw"), 0);
        assert_eq!(
            value(&packet, &standards, "Watchdog_State").as_str(),
            Some("RS_SERVICE")
        );
        assert!(!WatchdogDetailedStatusPacket::is_valid(&full[..23]));
    }

    #[test]
    fn thermistor_curves_clamp_and_interpolate() {
        assert!((therm_5k_kelvin(5000.0) - (KELVIN - 55.0)).abs() < 1e-9);
        assert!((therm_5k_kelvin(0.0) - (KELVIN + 155.0)).abs() < 1e-9);
        // Midway between the 20 and 25 degC points.
        let mid = (1574.0 + 1365.0) / 2.0;
        assert!((therm_5k_kelvin(mid) - (KELVIN + 22.5)).abs() < 1e-9);
        assert_eq!(therm_10k_kelvin(0.0), 0.0);
        let room = therm_10k_kelvin(2048.0);
        assert!(room > KELVIN - 55.0 && room < KELVIN + 155.0);
    }

    #[test]
    fn fused_voltage_prefers_the_plausible_sensor() {
        assert_eq!(fused_lander_voltage(0.0, 0.0), 0.0);
        assert_eq!(fused_lander_voltage(60.0, 28.0), 28.0);
        assert_eq!(fused_lander_voltage(5.0, 28.0), 28.0);
        let fused = fused_lander_voltage(28.0, 28.6);
        assert!((fused - (28.0 * (2.0 / 3.0) + 28.6 / 3.0)).abs() < 1e-9);
    }
}
