//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Watchdog heartbeat, command response, reset ack, and hello packets."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use iris_gds_catalog::model::enum_name;
use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};

use super::gds_event::gds_packet_event;
use super::{module_telemetry, text_after, PacketClass, PacketCore, PacketKind};
use crate::collection::PayloadCollection;
use crate::payload::Payload;
use crate::primitive::Value;
use crate::{CodecError, Result};

fn framing(class: &str, bytes: &[u8]) -> CodecError {
    CodecError::PacketFraming(format!(
        "{} bytes starting {:02x?} are not a {class}",
        bytes.len(),
        &bytes[..bytes.len().min(4)]
    ))
}

/// Linear map of a `span` reading back onto `min..=max`, plateauing at
/// `span_max`.
fn despan(span: u8, min: f64, max: f64, span_max: u8) -> f64 {
    f64::from(span.min(span_max)) / f64::from(span_max) * (max - min) + min
}

/// Four-byte heartbeat the watchdog sends while Hercules is off.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogHeartbeatPacket {
    pub(crate) core: PacketCore,
    /// Battery charge, 7-bit span.
    pub charge_raw: u8,
    /// Heater currently on.
    pub heater_on: bool,
    /// Battery current, 7-bit span.
    pub current_raw: u8,
    /// Battery voltage within limits.
    pub voltage_ok: bool,
    /// Battery thermistor, 8-bit span.
    pub batt_temp_raw: u8,
}

impl WatchdogHeartbeatPacket {
    const START: u8 = 0xFF;
    const LEN: usize = 4;
    const MODULE: &'static str = "WatchdogHeartbeat";

    /// Battery charge in mAh.
    pub fn charge_mah(&self) -> f64 {
        despan(self.charge_raw, 29.1, 3500.0, 120)
    }

    /// Battery charge as a percentage of capacity.
    pub fn charge_percent(&self) -> f64 {
        self.charge_mah() / 3500.0 * 100.0
    }

    /// Battery current in mA.
    pub fn current_ma(&self) -> f64 {
        despan(self.current_raw, 0.0, 600.0, 120)
    }

    /// Battery temperature in Kelvin.
    pub fn batt_temp_kelvin(&self) -> f64 {
        despan(self.batt_temp_raw, 75.0, -12.31, 233)
    }

    fn telemetry(&self, standards: &DataStandards) -> Result<PayloadCollection> {
        module_telemetry(
            standards,
            Self::MODULE,
            [
                ("BattAdcTempRaw", Value::from(self.batt_temp_raw)),
                ("BattAdcTempKelvin", Value::from(self.batt_temp_kelvin())),
                ("ChargeRaw", Value::from(self.charge_raw)),
                ("ChargeMah", Value::from(self.charge_mah())),
                ("ChargePercent", Value::from(self.charge_percent())),
                ("BatteryVoltageOk", Value::from(u8::from(self.voltage_ok))),
                ("CurrentRaw", Value::from(self.current_raw)),
                ("CurrentMilliamps", Value::from(self.current_ma())),
                ("HeaterStatus", Value::from(u8::from(self.heater_on))),
            ],
        )
    }
}

impl PacketClass for WatchdogHeartbeatPacket {
    const KIND: PacketKind = PacketKind::WatchdogHeartbeat;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.len() == Self::LEN && bytes[0] == Self::START
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        let &[Self::START, charge, current, batt_temp_raw] = bytes else {
            return Err(framing("watchdog heartbeat", bytes));
        };
        let mut packet = Self {
            core: PacketCore::default(),
            charge_raw: charge >> 1,
            heater_on: charge & 1 == 1,
            current_raw: current >> 1,
            voltage_ok: current & 1 == 1,
            batt_temp_raw,
        };
        packet.core = PacketCore::decoded(packet.telemetry(standards)?, bytes);
        Ok(packet)
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        if self.charge_raw > 0x7F || self.current_raw > 0x7F {
            return Err(CodecError::PrimitiveRange(format!(
                "heartbeat spans must fit 7 bits (charge {}, current {})",
                self.charge_raw, self.current_raw
            )));
        }
        Ok(vec![
            Self::START,
            self.charge_raw << 1 | u8::from(self.heater_on),
            self.current_raw << 1 | u8::from(self.voltage_ok),
            self.batt_temp_raw,
        ])
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}

/// Watchdog reply to a command it received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogCommandResponsePacket {
    pub(crate) core: PacketCore,
    /// Command ID within the watchdog interface module.
    pub command_id: u8,
    /// Response code.
    pub error_flag: u8,
}

impl WatchdogCommandResponsePacket {
    const START: u8 = 0x0A;
    const LEN: usize = 3;
    const MODULE: &'static str = "WatchdogCommandResponse";

    /// Name of the acknowledged command, if the catalog has the watchdog
    /// interface module.
    pub fn command_name(&self, standards: &DataStandards) -> Option<String> {
        let module = standards.module("WatchDogInterface")?;
        module.commands.get(self.command_id).map(|c| c.name.clone())
    }

    /// Name of the response code.
    pub fn error_flag_name(&self, standards: &DataStandards) -> String {
        standards
            .find_channel("WatchdogCommandResponse_ErrorFlag")
            .and_then(|(_, c)| enum_name(&c.enum_items, i64::from(self.error_flag)))
            .map_or_else(|| format!("NOT-FOUND ({})", self.error_flag), str::to_owned)
    }

    /// Operator-facing summary.
    pub fn message(&self, standards: &DataStandards) -> String {
        format!(
            "Command #{} ({}) responded with {}[{:#x}].",
            self.command_id,
            self.command_name(standards).as_deref().unwrap_or("UNKNOWN"),
            self.error_flag_name(standards),
            self.error_flag
        )
    }
}

impl PacketClass for WatchdogCommandResponsePacket {
    const KIND: PacketKind = PacketKind::WatchdogCommandResponse;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.len() == Self::LEN && bytes[0] == Self::START
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        let &[Self::START, command_id, error_flag] = bytes else {
            return Err(framing("watchdog command response", bytes));
        };
        let mut packet = Self {
            core: PacketCore::default(),
            command_id,
            error_flag,
        };
        let mut payloads = module_telemetry(
            standards,
            Self::MODULE,
            [
                ("CommandId", Value::from(command_id)),
                ("ErrorFlag", Value::from(error_flag)),
            ],
        )?;
        if let Some(event) = gds_packet_event(standards, "WatchdogCommandResponsePacket", &packet.message(standards)) {
            payloads.push(event);
        }
        packet.core = PacketCore::decoded(payloads, bytes);
        Ok(packet)
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        Ok(vec![Self::START, self.command_id, self.error_flag])
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}

/// Conditions a reset was allowed to act under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResetConditions {
    /// Power-on allowed.
    pub power_on: bool,
    /// Disabling RS-422 allowed.
    pub rs422_off: bool,
    /// Deployment allowed.
    pub deploy: bool,
    /// Undeployment allowed.
    pub undeploy: bool,
}

impl ResetConditions {
    /// Conditions from their 4-bit mask.
    pub fn from_bits(bits: u32) -> Self {
        Self {
            power_on: bits & 0b1000 != 0,
            rs422_off: bits & 0b0100 != 0,
            deploy: bits & 0b0010 != 0,
            undeploy: bits & 0b0001 != 0,
        }
    }

    /// 4-bit mask.
    pub fn bits(&self) -> u32 {
        u32::from(self.power_on) << 3
            | u32::from(self.rs422_off) << 2
            | u32::from(self.deploy) << 1
            | u32::from(self.undeploy)
    }
}

/// Text acknowledgement of a `ResetSpecific` watchdog command, formatted
/// `DEBUGRESET:<id> -> <result> with 0x<conditions>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogResetSpecificAckPacket {
    pub(crate) core: PacketCore,
    /// Reset that was performed.
    pub reset_id: i64,
    /// Response code, as in `WatchdogCommandResponse_ErrorFlag`.
    pub result: i64,
    /// Conditions the reset was allowed under.
    pub conditions: ResetConditions,
}

impl WatchdogResetSpecificAckPacket {
    const PREFIX: &'static [u8] = b"DEBUGRESET:";

    fn parse(text: &str) -> Option<(i64, i64, ResetConditions)> {
        let fields: Vec<&str> = text.trim().split(' ').collect();
        let [reset, _, result, _, conditions] = fields.as_slice() else {
            return None;
        };
        let conditions = conditions
            .strip_prefix("0x")
            .or_else(|| conditions.strip_prefix("0X"))
            .unwrap_or(conditions);
        Some((
            reset.parse().ok()?,
            result.parse().ok()?,
            ResetConditions::from_bits(u32::from_str_radix(conditions, 16).ok()?),
        ))
    }

    /// Name of the reset, from the `ResetSpecific` command's argument enum.
    pub fn reset_name(&self, standards: &DataStandards) -> String {
        if self.reset_id == 0 {
            return "NONE".to_owned();
        }
        standards
            .find_command("WatchDogInterface_ResetSpecific")
            .and_then(|(_, c)| c.args.first())
            .and_then(|arg| enum_name(&arg.enum_items, self.reset_id))
            .map_or_else(|| format!("NOT-FOUND ({})", self.reset_id), str::to_owned)
    }

    /// Name of the result code.
    pub fn result_name(&self, standards: &DataStandards) -> String {
        if self.result == 0 {
            return "NO_ERROR".to_owned();
        }
        standards
            .find_channel("WatchdogCommandResponse_ErrorFlag")
            .and_then(|(_, c)| enum_name(&c.enum_items, self.result))
            .map_or_else(|| format!("NOT-FOUND ({})", self.result), str::to_owned)
    }

    /// Operator-facing summary.
    pub fn message(&self, standards: &DataStandards) -> String {
        let c = self.conditions;
        format!(
            "Reset {} -> {}, allowing (PowerOn: {}, Rs422Off: {}, Deploy: {}, Undeploy: {}).",
            self.reset_name(standards),
            self.result_name(standards),
            u8::from(c.power_on),
            u8::from(c.rs422_off),
            u8::from(c.deploy),
            u8::from(c.undeploy)
        )
    }
}

impl PacketClass for WatchdogResetSpecificAckPacket {
    const KIND: PacketKind = PacketKind::WatchdogResetSpecificAck;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.starts_with(Self::PREFIX)
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        if !Self::is_valid(bytes) {
            return Err(framing("watchdog reset ack", bytes));
        }
        let text = text_after(bytes, Self::PREFIX.len());
        let (reset_id, result, conditions) = Self::parse(&text).ok_or_else(|| {
            CodecError::PacketFraming(format!("reset ack `{}` does not match `<id> -> <result> with 0x<mask>`", text.trim()))
        })?;
        let mut packet = Self {
            core: PacketCore::default(),
            reset_id,
            result,
            conditions,
        };
        let payloads = gds_packet_event(standards, "WatchdogResetSpecificAckPacket", &packet.message(standards))
            .into_iter()
            .map(Payload::from)
            .collect();
        packet.core = PacketCore::decoded(payloads, bytes);
        Ok(packet)
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        if let Some(raw) = &self.core.raw {
            return Ok(raw.clone());
        }
        let mut out = Self::PREFIX.to_vec();
        out.extend(format!("{} -> {} with 0x{:x}", self.reset_id, self.result, self.conditions.bits()).into_bytes());
        Ok(out)
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}

/// Free text the watchdog sends when it boots or is pinged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchdogHelloPacket {
    pub(crate) core: PacketCore,
    /// Message text.
    pub text: String,
}

impl PacketClass for WatchdogHelloPacket {
    const KIND: PacketKind = PacketKind::WatchdogHello;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.len() >= 5 && bytes[..5].eq_ignore_ascii_case(b"hello")
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        if !Self::is_valid(bytes) {
            return Err(framing("watchdog hello", bytes));
        }
        let text = text_after(bytes, 0);
        let payloads = gds_packet_event(standards, "WatchdogHelloPacket", &text)
            .into_iter()
            .map(Payload::from)
            .collect();
        Ok(Self {
            core: PacketCore::decoded(payloads, bytes),
            text,
        })
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        Ok(self.core.raw.clone().unwrap_or_else(|| self.text.clone().into_bytes()))
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}
