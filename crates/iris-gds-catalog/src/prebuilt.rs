//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Ground-defined modules for packets that never pass through F Prime."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Prebuilt modules.
//!
//! Watchdog and radio packets are not described by the flight XML, yet their
//! contents are published as ordinary telemetry and events. These modules
//! give them catalog entries. The `GdsPackets` event list is append-only:
//! event IDs are the position in [`GDS_PACKET_EVENTS`].

use crate::datatype::{DataType, IntType};
use crate::model::{
    Argument, BitfieldSpec, Command, EnumItem, Event, Module, Severity, TelemetryChannel,
};
use crate::{CatalogError, Result};

/// Name of the module carrying one event per packet class that is an event.
pub const GDS_PACKETS_MODULE: &str = "GdsPackets";

/// Packet classes reported through `GdsPackets`, in ID order. Only append.
pub const GDS_PACKET_EVENTS: &[(&str, Severity)] = &[
    ("RadioBgApiPacket", Severity::ActivityLo),
    ("RadioDirectMessagePacket", Severity::ActivityHi),
    ("RadioUartBytePacket", Severity::Diagnostic),
    ("UnsupportedPacket", Severity::Diagnostic),
    ("WatchdogCommandResponsePacket", Severity::Command),
    ("WatchdogDebugPacket", Severity::ActivityLo),
    ("WatchdogDebugImportantPacket", Severity::ActivityHi),
    ("WatchdogHelloPacket", Severity::Command),
    ("WatchdogRadioDebugPacket", Severity::ActivityHi),
    ("WatchdogResetSpecificAckPacket", Severity::Command),
    ("RadioDownlinkFlushPacket", Severity::Diagnostic),
    ("HerculesRadioUplinkAckPacket", Severity::ActivityLo),
    ("RadioHelloPacket", Severity::ActivityHi),
];

const U8: DataType = DataType::Int(IntType::U8);
const U16: DataType = DataType::Int(IntType::U16);
const U32: DataType = DataType::Int(IntType::U32);
const U64: DataType = DataType::Int(IntType::U64);
const I16: DataType = DataType::Int(IntType::I16);
const F64: DataType = DataType::F64;

fn items(pairs: &[(&str, i64)]) -> Vec<EnumItem> {
    pairs
        .iter()
        .map(|(name, value)| EnumItem::new(*name, *value))
        .collect()
}

fn ch(id: u8, name: &str, datatype: DataType) -> TelemetryChannel {
    TelemetryChannel::new(name, id, datatype)
}

fn en(id: u8, name: &str, pairs: &[(&str, i64)]) -> TelemetryChannel {
    TelemetryChannel::enumerated(name, id, items(pairs))
}

fn bits(id: u8, name: &str, datatype: DataType, fields: &[(&str, u8)]) -> TelemetryChannel {
    let mut channel = ch(id, name, datatype);
    channel.bitfields = Some(BitfieldSpec::new(fields.iter().copied()));
    channel
}

fn module(name: &str, id: u16, channels: Vec<TelemetryChannel>) -> Result<Module> {
    let mut module = Module::new(name, id);
    for channel in channels {
        module
            .telemetry
            .insert(u16::from(channel.id), channel.name.clone(), channel)
            .map_err(|c| CatalogError::duplicate(format!("prebuilt {name} telemetry"), c.to_string()))?;
    }
    Ok(module)
}

const POWER_GOOD: &[(&str, i64)] = &[("BAD", 0), ("GOOD", 1)];
const ROVER_STATES: &[(&str, i64)] = &[
    ("RS_INIT", 0),
    ("RS_ENTERING_KEEP_ALIVE", 7),
    ("RS_KEEP_ALIVE", 8),
    ("RS_ENTERING_SERVICE", 3),
    ("RS_SERVICE", 4),
    ("RS_ENTERING_MISSION", 15),
    ("RS_MISSION", 16),
    ("RS_ENTERING_STASIS", 31),
    ("RS_STASIS", 32),
];

/// Every prebuilt module, in registration order.
pub fn all_prebuilt_modules() -> Result<Vec<Module>> {
    Ok(vec![
        watchdog_detailed_status()?,
        watchdog_heartbeat_tvac()?,
        watchdog_heartbeat()?,
        watchdog_command_response()?,
        radio_ground()?,
        peregrine()?,
        gds_packets()?,
    ])
}

fn watchdog_heartbeat_tvac() -> Result<Module> {
    let modes: Vec<(&str, i64)> = ROVER_STATES
        .iter()
        .map(|(name, value)| (name.trim_start_matches("RS_"), *value))
        .collect();
    module(
        "WatchdogHeartbeatTvac",
        0xFA00,
        vec![
            ch(0x00, "AdcTempRaw", U16),
            ch(0x01, "AdcTempKelvin", F64),
            ch(0x10, "ChargeRaw", U16),
            ch(0x11, "ChargeMah", F64),
            ch(0x20, "VoltageRaw", U16),
            ch(0x21, "Voltage", F64),
            ch(0x30, "CurrentRaw", U16),
            ch(0x31, "CurrentAmps", F64),
            ch(0x40, "FuelTempRaw", U16),
            ch(0x41, "FuelTempKelvin", F64),
            ch(0x50, "KpHeater", U16),
            ch(0x51, "HeaterSetpoint", U16),
            ch(0x52, "HeaterSetpointKelvin", F64),
            ch(0x53, "HeaterWindow", U16),
            ch(0x54, "HeaterWindowKelvin", F64),
            ch(0x55, "HeaterPwmLimit", U16),
            en(0x56, "WatchdogMode", &modes),
            ch(0x57, "HeaterStatus", U8),
            ch(0x58, "HeatingControlEnabled", U8),
            ch(0x59, "HeaterPwmDutyCycle", U16),
        ],
    )
}

fn watchdog_heartbeat() -> Result<Module> {
    module(
        "WatchdogHeartbeat",
        0xFB00,
        vec![
            ch(0x00, "BattAdcTempRaw", U8),
            ch(0x01, "BattAdcTempKelvin", F64),
            ch(0x10, "ChargeRaw", U8),
            ch(0x11, "ChargeMah", F64),
            ch(0x12, "ChargePercent", F64),
            ch(0x22, "BatteryVoltageOk", U8),
            ch(0x30, "CurrentRaw", U8),
            ch(0x31, "CurrentMilliamps", F64),
            ch(0x57, "HeaterStatus", U8),
        ],
    )
}

fn watchdog_detailed_status() -> Result<Module> {
    let uart: &[(&str, i64)] = &[("OFF", 0), ("INITIALIZED_&_ACTIVE", 1)];
    module(
        "WatchdogDetailedStatus",
        0xFC00,
        vec![
            // IO
            ch(0x00, "Io_ChargingStatus1", U8),
            ch(0x01, "Io_ChargingStatus2", U8),
            en(0x02, "Io_ChargerState", &[("OFF", 0), ("CHARGING", 1), ("DONE_CHARGING", 2), ("FAULT", 3)]),
            en(0x03, "Io_BatteryConnectionStatus", &[("DISCONNECTED", 0), ("CONNECTED", 1)]),
            en(0x04, "Io_BatteryLatchStatus", &[("NOT_LATCHED", 0), ("LATCHED", 1)]),
            en(
                0x05,
                "Io_BatteryState",
                &[("DISCONNECTED", 0), ("OR_GATE__FAULT", 1), ("TEMP_CONNECTED", 2), ("LATCHED_CONNECTED", 3)],
            ),
            en(0x06, "Io_1V2PowerGood", POWER_GOOD),
            en(0x07, "Io_1V8PowerGood", POWER_GOOD),
            en(0x08, "Io_3V3PowerGood", POWER_GOOD),
            en(0x09, "Io_5V0PowerGood", POWER_GOOD),
            // Watchdog
            en(0x10, "Watchdog_State", ROVER_STATES),
            en(0x11, "Watchdog_DeploymentStatus", &[("NOT_DEPLOYED", 0), ("DEPLOYING", 1), ("DEPLOYED", 2)]),
            en(0x12, "Watchdog_Uart0State", uart),
            en(0x13, "Watchdog_Uart1State", uart),
            ch(0x14, "Watchdog_DetailedHeartbeatSequenceNumber", U8),
            bits(0x15, "Watchdog_DigitalOutputStates", U32, DIGITAL_OUTPUT_BITS),
            bits(0x17, "Watchdog_CombinedDigitalStates", U32, COMBINED_DIGITAL_BITS),
            bits(0x18, "Watchdog_ResetLogs", U64, RESET_LOG_BITS),
            // ADC
            ch(0x20, "Adc_LanderVoltageRaw", U16),
            ch(0x21, "Adc_LanderVoltage", F64),
            ch(0x22, "Adc_BatteryChargingTempRaw", U16),
            ch(0x23, "Adc_BatteryChargingTempKelvin", F64),
            ch(0x24, "Adc_BatteryChargingTempUncertaintyKelvin", F64),
            ch(0x25, "Adc_BatteryTempRaw", U16),
            ch(0x26, "Adc_BatteryTempKelvin", F64),
            ch(0x27, "Adc_BatteryTempUncertaintyKelvin", F64),
            ch(0x28, "Adc_FullSystemVoltageRaw", U16),
            ch(0x29, "Adc_FullSystemVoltage", F64),
            ch(0x2A, "Adc_FullSystemCurrentRaw", U16),
            ch(0x2B, "Adc_FullSystemCurrent", F64),
            ch(0x2C, "Adc_SwitchedBatteryVoltageRaw", U16),
            ch(0x2D, "Adc_SwitchedBatteryVoltage", F64),
            ch(0x30, "Adc_2V5VoltageRaw", U16),
            ch(0x31, "Adc_2V5Voltage", F64),
            ch(0x32, "Adc_2V8VoltageRaw", U16),
            ch(0x33, "Adc_2V8Voltage", F64),
            ch(0x34, "Adc_Vcc28VoltageRaw", U16),
            ch(0x35, "Adc_Vcc28Voltage", F64),
            ch(0x36, "Adc_Vcc24VoltageRaw", U16),
            ch(0x37, "Adc_Vcc24Voltage", F64),
            // Heater
            ch(0x40, "Heater_Kp", U16),
            ch(0x41, "Heater_PwmLimit_DutyCycleCounter", U16),
            ch(0x42, "Heater_PwmLimit_DutyCyclePercent", F64),
            ch(0x43, "Heater_EffectivePowerLimit", F64),
            ch(0x44, "Heater_SetpointValue", U16),
            ch(0x45, "Heater_SetpointKelvin", F64),
            ch(0x46, "Heater_OnValue", U16),
            ch(0x47, "Heater_OnTempKelvin", F64),
            ch(0x48, "Heater_OffValue", U16),
            ch(0x49, "Heater_OffTempKelvin", F64),
            en(0x4A, "Heater_ControlEnabled", &[("DISABLED", 0), ("ENABLED", 1)]),
            en(0x4B, "Heater_IsHeating", &[("NOT_HEATING", 0), ("HEATING", 1)]),
            ch(0x4C, "Heater_DutyCyclePeriodCycles", U16),
            ch(0x4D, "Heater_DutyCyclePeriodMs", F64),
            ch(0x4E, "Heater_DutyCycleCounter", U16),
            ch(0x4F, "Heater_DutyCyclePercent", F64),
            ch(0x50, "Heater_EffectiveVoltage", F64),
            ch(0x51, "Heater_EffectivePower", F64),
            // I2C
            ch(0x60, "I2C_BatteryChargeRaw", U16),
            ch(0x61, "I2C_BatteryChargeMah", F64),
            ch(0x62, "I2C_BatteryVoltageRaw", U16),
            ch(0x63, "I2C_BatteryVoltage", F64),
            ch(0x64, "I2C_BatteryCurrentRaw", U16),
            ch(0x65, "I2C_BatteryCurrent", F64),
            ch(0x66, "I2C_FuelGaugeTempRaw", U16),
            ch(0x67, "I2C_FuelGaugeTempKelvin", F64),
            ch(0x68, "I2C_BatteryChargeTelemRaw", U16),
            ch(0x69, "I2C_BatteryChargeTelemMah", F64),
            ch(0x6A, "I2C_BatteryCurrentTelemRaw", U8),
            ch(0x6B, "I2C_BatteryCurrentTelemAmps", F64),
        ],
    )
}

/// Output state bits then direction bits, two bits of padding on top.
const DIGITAL_OUTPUT_BITS: &[(&str, u8)] = &[
    ("OPSBI__V_LANDER_REG_EN", 1),
    ("OPSBI__HEATER", 1),
    ("OPSBI__DEPLOYMENT", 1),
    ("OPSBI__FPGA_KICK_AKA_CAM_SELECT", 1),
    ("OPSBI__LATCH_BATT", 1),
    ("OPSBI__3V3_EN", 1),
    ("OPSBI__HERCULES_ON", 1),
    ("OPSBI__FPGA_ON", 1),
    ("OPSBI__MOTOR_ON", 1),
    ("OPSBI__CHRG_EN", 1),
    ("OPSBI__CHRG_EN_FORCE_HIGH", 1),
    ("OPSBI__BATTERY_EN", 1),
    ("OPSBI__V_SYS_ALL_EN", 1),
    ("OPSBI__V_SYS_ALL_EN_FORCE_LOW", 1),
    ("OPSBI__HERCULES_N_RST", 1),
    ("OPSBI__HERCULES_N_PORRST", 1),
    ("OPSBI__FPGA_N_RST", 1),
    ("OPSBI__RADIO_N_RST", 1),
    ("OPSBI__RADIO_ON", 1),
    ("OPSBI__BMS_BOOT", 1),
    ("OPSBI__LATCH_SET", 1),
    ("OPSBI__LATCH_RESET", 1),
    ("OPSBI__BATT_STAT", 1),
    ("OPSBI__RADIO_N_RESET_IS_INPUT", 1),
    ("OPSBI__HERCULES_N_RST_IS_INPUT", 1),
    ("OPSBI__HERCULES_N_PORRST_IS_INPUT", 1),
    ("OPSBI__FPGA_N_RST_IS_INPUT", 1),
    ("OPSBI__LATCH_SET_IS_INPUT", 1),
    ("OPSBI__LATCH_RESET_IS_INPUT", 1),
    ("OPSBI__BATT_STAT_IS_INPUT", 1),
    ("PADDING", 2),
];

/// Two-bit fields are input capable: `0b10` means high impedance.
const COMBINED_DIGITAL_BITS: &[(&str, u8)] = &[
    ("V_LANDER_REG_EN", 1),
    ("HEATER", 1),
    ("DEPLOYMENT", 1),
    ("FPGA_KICK_AKA_CAM_SELECT", 1),
    ("LATCH_BATT", 1),
    ("3V3_EN", 1),
    ("HERCULES_ON", 1),
    ("FPGA_ON", 1),
    ("MOTOR_ON", 1),
    ("CHRG_EN", 2),
    ("BATTERY_EN", 1),
    ("V_SYS_ALL_EN", 2),
    ("HERCULES_N_RST", 2),
    ("HERCULES_N_PORRST", 2),
    ("FPGA_N_RST", 2),
    ("RADIO_N_RST", 2),
    ("RADIO_ON", 1),
    ("BMS_BOOT", 1),
    ("LATCH_SET", 2),
    ("LATCH_RESET", 2),
    ("BATT_STAT", 2),
    ("PADDING", 2),
];

const RESET_LOG_BITS: &[(&str, u8)] = &[
    ("RABI__NO_RESET", 1),
    ("RABI__HERCULES_RESET", 1),
    ("RABI__HERCULES_UNRESET", 1),
    ("RABI__HERCULES_POWER_ON", 1),
    ("RABI__HERCULES_POWER_OFF", 1),
    ("RABI__RADIO_RESET", 1),
    ("RABI__RADIO_UNRESET", 1),
    ("RABI__RADIO_POWER_ON", 1),
    ("RABI__RADIO_POWER_OFF", 1),
    ("RABI__CAM_FPGA_RESET", 1),
    ("RABI__CAM_FPGA_UNRESET", 1),
    ("RABI__CAM_FPGA_POWER_ON", 1),
    ("RABI__CAM_FPGA_POWER_OFF", 1),
    ("RABI__ALL_MOTORS_POWER_ON", 1),
    ("RABI__ALL_MOTORS_POWER_OFF", 1),
    ("RABI__3V3_EN_RESET", 1),
    ("RABI__3V3_EN_UNRESET", 1),
    ("RABI__3V3_EN_POWER_ON", 1),
    ("RABI__3V3_EN_POWER_OFF", 1),
    ("RABI__V_SYS_ALL_OFF__RESET", 1),
    ("RABI__V_SYS_ALL_ON__UNRESET", 1),
    ("RABI__V_SYS_ALL_POWER_ON", 1),
    ("RABI__V_SYS_ALL_POWER_OFF", 1),
    ("RABI__HDRM_DEPLOY_SIGNAL_POWER_OFF", 1),
    ("RABI__FPGA_CAM_0_SELECT", 1),
    ("RABI__FPGA_CAM_1_SELECT", 1),
    ("RABI__BATTERY_CHARGE_START", 1),
    ("RABI__BATTERY_CHARGE_STOP", 1),
    ("RABI__RS422_UART_ENABLE", 1),
    ("RABI__RS422_UART_DISABLE", 1),
    ("RABI__AUTO_HEATER_CONTROLLER_ENABLE", 1),
    ("RABI__AUTO_HEATER_CONTROLLER_DISABLE", 1),
    ("RABI__HERCULES_WATCHDOG_ENABLE", 1),
    ("RABI__HERCULES_WATCHDOG_DISABLE", 1),
    ("RABI__BATTERIES_ENABLE", 1),
    ("RABI__BATTERIES_DISABLE", 1),
    ("RABI__HDRM_DEPLOY_SIGNAL_POWER_ON", 1),
    ("RABI__HERCULES_WATCHDOG_RESET", 1),
    ("PADDING", 26),
];

fn watchdog_command_response() -> Result<Module> {
    module(
        "WatchdogCommandResponse",
        0xFD00,
        vec![
            ch(0x00, "CommandId", U8),
            en(
                0x01,
                "ErrorFlag",
                &[
                    ("NO_ERROR", 0),
                    ("BAD_PACKET_LENGTH", 1),
                    ("CHECKSUM_FAILED", 2),
                    ("BAD_MODULE_ID", 3),
                    ("BAD_COMMAND_ID", 4),
                    ("BAD_COMMAND_PARAMETER", 5),
                    ("BAD_COMMAND_SEND_ORDER", 6),
                    ("DEPLOYMENT_SIGNAL_SENT", 96),
                ],
            ),
        ],
    )
}

/// WF121 BGAPI result codes reported by the radio.
pub const WF121_BGAPI_ERROR_CODES: &[(&str, i64)] = &[
    ("NO_ERROR", 0x0000),
    ("INVALID_PARAMETER", 0x0180),
    ("DEVICE_WRONG_STATE", 0x0181),
    ("OUT_OF_MEMORY", 0x0182),
    ("FEATURE_NOT_IMPLEMENTED", 0x0183),
    ("COMMAND_NOT_RECOGNIZED", 0x0184),
    ("TIMEOUT", 0x0185),
    ("UNSPECIFIED_ERROR", 0x0186),
    ("HARDWARE_FAILURE", 0x0187),
    ("INTERNAL_BUFFER_FULL", 0x0188),
    ("DISCONNECTED", 0x0189),
    ("TOO_MANY_REQUEST", 0x018A),
    ("ACCESS_POINT_NOT_IN_SCANLIST", 0x018B),
    ("INVALID_PASSWORD", 0x018C),
    ("AUTHENTICATION_FAILURE", 0x018D),
    ("OVERFLOW", 0x018E),
    ("MULTIPLE_PBC_SESSIONS", 0x018F),
    ("ETHERNET_NOT_CONNECTED", 0x0190),
    ("ETHERNET_ROUTE_NOT_SET", 0x0191),
    ("WRONG_OPERATING_MODE", 0x0192),
    ("WIFI_NOT_FOUND", 0x0193),
    ("WIFI_NOT_ALREADY_EXIST", 0x0194),
    ("WIFI_INVALID_CONFIGURATION", 0x0195),
    ("WIFI_ACCESS_POINT_LOST", 0x0196),
    ("TCP_IP_SUCCESS", 0x0200),
    ("TCP_IP_OUT_OF_MEMORY", 0x0201),
    ("TCP_IP_BUFFER_ERROR", 0x0202),
    ("TCP_IP_TIMEOUT", 0x0203),
    ("TCP_IP_ROUTING", 0x0204),
    ("TCP_IP_IN_PROGRESS", 0x0205),
    ("TCP_IP_ILLEGAL_VALUE", 0x0206),
    ("TCP_IP_WOULD_BLOCK", 0x0207),
    ("TCP_IP_ADDRESS_IN_USE", 0x0208),
    ("TCP_IP_ALREADY_CONNECTED", 0x0209),
    ("TCP_IP_CONNECTION_ABORTED", 0x020A),
    ("TCP_IP_CONNECTION_RESET", 0x020B),
    ("TCP_IP_CONNECTION_CLOSED", 0x020C),
    ("TCP_IP_NOT_CONNECTED", 0x020D),
    ("TCP_IP_ILLEGAL_ARGUMENT", 0x020E),
    ("TCP_IP_INTERFACE_LEVEL_ERROR", 0x020F),
    ("SERVICE_NOT_RUNNING", 0x0210),
    ("SERVICE_RUNNING", 0x0211),
    ("HOSTNAME_NOT_SET", 0x0212),
    ("HOSTNAME_CONFLICT", 0x0213),
    ("TCP_IP_UNKNOWN_HOST", 0x0280),
    ("PS_STORE_FULL", 0x0301),
    ("PS_KEY_NOT_FOUND", 0x0302),
    ("I2C_WRITE_ALREADY_IN_PROGRESS", 0x0303),
    ("I2C_ACK_MISSING", 0x0304),
    ("FILE_NOT_OPENED", 0x0305),
    ("FILE_NOT_FOUND", 0x0306),
    ("DISK_ERROR", 0x0307),
    ("FLASH_WRITE_FAILED", 0x0308),
    ("OTHER__UNEXPECTED", 0xFFFF),
];

/// Commands the radio MCU executes itself, by command ID.
pub const RADIO_GROUND_COMMAND_IDS: &[(&str, i64)] = &[
    ("ECHO", 0x00),
    ("RESET_RADIO", 0xBB),
    ("ENTER_STASIS", 0xE5),
    ("EXIT_STASIS", 0x5E),
    ("WRITE_UART", 0xDB),
    ("HERCULES_DM", 0xDD),
    ("CORRUPTED", 0xFF),
];

/// Four-letter radio state abbreviations as sent in radio heartbeats.
pub const RADIO_STATE_ABBRS: &[(&str, i64)] = &[
    ("BOOT", 0x00),
    ("INIT", 0x01),
    ("WFON", 0x02),
    ("CONN", 0x03),
    ("UDPC", 0x04),
    ("CRPT", 0xFF),
];

fn radio_ground() -> Result<Module> {
    let mut radio = module(
        "RadioGround",
        0xEF00,
        vec![
            ch(0x00, "Rssi", I16),
            en(0x01, "StateAbbr", RADIO_STATE_ABBRS),
            ch(0x02, "UptimeTicks", U32),
            ch(0x03, "UptimeMs", U32),
            ch(0x04, "UdpRxPacketCount", U32),
            ch(0x05, "BadHercPacketCount", U32),
            ch(0x06, "HerculesUdpInterlockCountingSemaphore", U8),
        ],
    )?;

    let text = || Argument::new("text_to_echo", DataType::string(255));
    let commands = [
        Command::new("RadioGround", "Echo", 0x00, vec![text()]),
        Command::new(
            "RadioGround",
            "ResetRadio",
            0xBB,
            vec![Argument::new("confirm_by_typing_RESET", DataType::string(5))],
        ),
        Command::new(
            "RadioGround",
            "EnterStasis",
            0xE5,
            vec![Argument::new("confirm_by_typing_STASIS", DataType::string(6))],
        ),
        Command::new(
            "RadioGround",
            "ExitStasis",
            0x5E,
            vec![Argument::new("confirm_by_typing_STASIS", DataType::string(6))],
        ),
        Command::new("RadioGround", "WriteUart", 0xDB, vec![text()]),
        Command::new("RadioGround", "HerculesDm", 0xDD, vec![text()]),
    ];
    for command in commands {
        radio
            .commands
            .insert(u16::from(command.id), command.name.clone(), command)
            .map_err(|c| CatalogError::duplicate("prebuilt RadioGround commands", c.to_string()))?;
    }

    let issue = || Argument::enumerated("issue", items(WF121_BGAPI_ERROR_CODES));
    let command_args = || {
        vec![
            Argument::enumerated("command", items(RADIO_GROUND_COMMAND_IDS)),
            Argument::new("string_of_command_data", DataType::string(255)),
        ]
    };
    let events = [
        Event::new(
            "Heartbeat",
            0x00,
            Severity::ActivityLo,
            "Radio Heartbeat: %s with %d RSSI at %s.",
            vec![
                Argument::enumerated("state_abbr", items(RADIO_STATE_ABBRS)),
                Argument::new("rssi", I16),
                Argument::new("uptime_str", DataType::string(255)),
            ],
        ),
        Event::new(
            "Connected",
            0x01,
            Severity::ActivityHi,
            "Radio (Re)Connected: %s",
            vec![Argument::new("message", DataType::string(39))],
        ),
        Event::new(
            "Echo",
            0x02,
            Severity::Command,
            "Radio Echoed: '%s'.",
            vec![Argument::new("echoed_text", DataType::string(255))],
        ),
        Event::new(
            "GotCommand",
            0x10,
            Severity::Command,
            "Radio got command '%s' with data: `%s`.",
            command_args(),
        ),
        Event::new(
            "DidCommand",
            0x11,
            Severity::Command,
            "Radio successfully executed command '%s' with data: `%s`.",
            command_args(),
        ),
        Event::new(
            "BadCommand",
            0x1F,
            Severity::Command,
            "Radio failed to execute a command '%s' with data: `%s`.",
            command_args(),
        ),
        Event::new(
            "BadHerculesPacket",
            0xF0,
            Severity::WarningLo,
            "Radio received a bad packet from Hercules. Issue: %s.",
            vec![issue()],
        ),
        Event::new(
            "BadEndpointData",
            0xF1,
            Severity::WarningLo,
            "One of the Radio's routing endpoints experienced an issue. Endpoint: %d, Issue: %s.",
            vec![Argument::new("endpoint", U8), issue()],
        ),
        Event::new(
            "BadUdp",
            0xF2,
            Severity::WarningHi,
            "Radio received %s in UDP packet with IP=%s, Port=%d.",
            vec![
                Argument::enumerated(
                    "issue",
                    items(&[
                        ("BAD_IP", 1),
                        ("BAD_PORT", 2),
                        ("BAD_IP_AND_PORT", 3),
                        ("NOTHING__THIS_SHOULD_NOT_HAPPEN", 0),
                    ]),
                ),
                Argument::new("ip", DataType::string(15)),
                Argument::new("port", U16),
            ],
        ),
        Event::new(
            "CriticalReset",
            0xF3,
            Severity::Fatal,
            "Radio had to reset itself due to a critical (unrecoverable) issue it discovered during self-monitoring: %s.",
            vec![issue()],
        ),
        Event::new(
            "CriticalResetDueToSoftwareException",
            0xF4,
            Severity::Fatal,
            "Radio had to reset itself due to a critical software exception. The exception occurred at memory address: 0x%04X and has numerical type: %d.",
            vec![Argument::new("memory_address", U32), Argument::new("exception_type", U8)],
        ),
    ];
    for event in events {
        radio
            .events
            .insert(u16::from(event.id), event.name.clone(), event)
            .map_err(|c| CatalogError::duplicate("prebuilt RadioGround events", c.to_string()))?;
    }
    Ok(radio)
}

fn peregrine() -> Result<Module> {
    let fet: &[(&str, i64)] = &[("DISABLED", 0), ("ENABLED", 1)];
    let service: &[(&str, i64)] = &[
        ("ACTIVE", 0),
        ("RELOADING", 1),
        ("INACTIVE", 2),
        ("FAILED", 3),
        ("ACTIVATING", 4),
        ("DEACTIVATING", 5),
    ];
    module(
        "Peregrine",
        0xDF00,
        vec![
            en(0x00, "IrisOperationalEnabledFet", fet),
            en(0x01, "IrisReleaseEnabledFet", fet),
            ch(0x02, "IrisOperationalAvgCurrent", F64),
            ch(0x03, "IrisReleaseAvgCurrent", F64),
            ch(0x04, "IrisOperationalMaxCurrent", F64),
            ch(0x05, "IrisReleaseMaxCurrent", F64),
            en(0x06, "SlipServiceStatus", service),
            en(0x07, "WifiServiceStatus", service),
            ch(0x08, "DeckD1TempKelvin", F64),
            ch(0x09, "DeckD2TempKelvin", F64),
            ch(0x0A, "DeckD3TempKelvin", F64),
            ch(0xF2, "IrisOperationalAvgPower", F64),
        ],
    )
}

fn gds_packets() -> Result<Module> {
    let mut gds = Module::new(GDS_PACKETS_MODULE, 0xCF00);
    for (index, (name, severity)) in GDS_PACKET_EVENTS.iter().enumerate() {
        let id = u8::try_from(index)
            .map_err(|_| CatalogError::schema(GDS_PACKETS_MODULE, "too many packet events"))?;
        let event = Event::new(
            *name,
            id,
            *severity,
            "%s",
            vec![Argument::new("msg", DataType::string(10_000))],
        );
        gds.events
            .insert(u16::from(id), *name, event)
            .map_err(|c| CatalogError::duplicate("prebuilt GdsPackets events", c.to_string()))?;
    }
    Ok(gds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::standards::DataStandards;

    #[test]
    fn prebuilts_register_without_conflicts() {
        let mut standards = DataStandards::new("prebuilt");
        for module in all_prebuilt_modules().expect("prebuilts") {
            standards.add_module(module).expect("register");
        }
        assert_eq!(standards.modules.len(), 7);
        assert!(standards.find_command("RadioGround_Echo").is_some());
        let (_, event) = standards.find_event("GdsPackets_RadioHelloPacket").expect("event");
        assert_eq!(event.id as usize, GDS_PACKET_EVENTS.len() - 1);
    }

    #[test]
    fn bitfields_fill_their_storage() {
        let status = watchdog_detailed_status().expect("module");
        for name in [
            "Watchdog_DigitalOutputStates",
            "Watchdog_CombinedDigitalStates",
            "Watchdog_ResetLogs",
        ] {
            let channel = status.telemetry.get(name).expect("channel");
            let spec = channel.bitfields.as_ref().expect("bitfields");
            assert_eq!(spec.byte_len(), channel.datatype.fixed_size(), "{name}");
        }
    }
}
