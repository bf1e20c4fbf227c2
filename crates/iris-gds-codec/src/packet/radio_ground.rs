//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Radio-ground packets sent by the radio MCU straight to ground."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Radio-ground packets are `RAD:`, a subpacket prefix, then fields. Each
//! field starts with an initiator; initiators ending in `h` introduce raw
//! little-endian bytes, the others ASCII. Fields are located by searching
//! for each initiator after the end of the previous field, so a `|` inside
//! raw data does not split it.

use indexmap::IndexMap;
use iris_gds_catalog::prebuilt::{RADIO_GROUND_COMMAND_IDS, RADIO_STATE_ABBRS, WF121_BGAPI_ERROR_CODES};
use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};

use super::{text_after, PacketClass, PacketCore, PacketKind};
use crate::collection::PayloadCollection;
use crate::payload::{EventPayload, Payload, TelemetryPayload};
use crate::primitive::Value;
use crate::{CodecError, Result};

/// Milliseconds per radio uptime tick.
pub const RADIO_TICK_MS: u64 = 5000;

const HEADER: &[u8] = b"RAD:";
const MODULE: &str = "RadioGround";
const CORRUPT_STATE: &str = "CRPT";

struct FieldDef {
    initiator: &'static [u8],
    /// `None` for the trailing variable-length field.
    len: Option<usize>,
}

const fn field(initiator: &'static [u8], len: usize) -> FieldDef {
    FieldDef {
        initiator,
        len: Some(len),
    }
}

const REST: FieldDef = FieldDef {
    initiator: b"|h",
    len: None,
};

struct SubpacketDef {
    prefix: &'static [u8],
    /// Total packet length, `None` when unbounded.
    len: Option<usize>,
    fields: &'static [FieldDef],
}

const COMMAND_FIELDS: &[FieldDef] = &[field(b"|h", 1), REST];

const SUBPACKETS: &[SubpacketDef] = &[
    SubpacketDef {
        prefix: b"HB",
        len: Some(42),
        fields: &[
            field(b"|R-", 3),
            field(b"|", 4),
            field(b"|Th", 4),
            field(b"|Rh", 4),
            field(b"|Bh", 4),
            field(b"|Ih", 1),
        ],
    },
    SubpacketDef {
        prefix: b"ECHO",
        len: None,
        fields: &[REST],
    },
    SubpacketDef {
        prefix: b"ACK",
        len: None,
        fields: COMMAND_FIELDS,
    },
    SubpacketDef {
        prefix: b"DID",
        len: None,
        fields: COMMAND_FIELDS,
    },
    SubpacketDef {
        prefix: b"BADCMD",
        len: None,
        fields: COMMAND_FIELDS,
    },
    SubpacketDef {
        prefix: b"BADHERC",
        len: Some(15),
        fields: &[field(b"|h", 2)],
    },
    SubpacketDef {
        prefix: b"BADENDP",
        len: Some(18),
        fields: &[field(b"|h", 1), field(b"|h", 2)],
    },
    SubpacketDef {
        prefix: b"BADUDP",
        len: Some(23),
        fields: &[field(b"|h", 1), field(b"|h", 4), field(b"|h", 2)],
    },
    SubpacketDef {
        prefix: b"CRIT!",
        len: Some(13),
        fields: &[field(b"|h", 2)],
    },
    SubpacketDef {
        prefix: b"SWE!",
        len: Some(17),
        fields: &[field(b"|h", 4), field(b"|h", 1)],
    },
];

impl SubpacketDef {
    /// Field data, or `None` if the bytes are not this subpacket.
    fn split<'a>(&self, data: &'a [u8]) -> Option<Vec<&'a [u8]>> {
        let body = data.strip_prefix(HEADER)?.strip_prefix(self.prefix)?;
        match self.len {
            Some(len) if data.len() != len => return None,
            _ => {}
        }
        let mut head = 0;
        let mut found = Vec::with_capacity(self.fields.len());
        for def in self.fields {
            let at = body
                .get(head..)?
                .windows(def.initiator.len())
                .position(|w| w == def.initiator)?;
            let start = head + at + def.initiator.len();
            let end = match def.len {
                Some(len) => start + len,
                None => body.len(),
            };
            found.push(body.get(start..end)?);
            head = end;
        }
        Some(found)
    }
}

fn find(data: &[u8]) -> Option<(&'static SubpacketDef, Vec<&[u8]>)> {
    SUBPACKETS.iter().find_map(|def| def.split(data).map(|fields| (def, fields)))
}

fn le(bytes: &[u8]) -> u64 {
    bytes.iter().rev().fold(0, |acc, b| acc << 8 | u64::from(*b))
}

/// Enum value from `table`, or the `fallback` item when `raw` is unlisted.
fn named(table: &[(&str, i64)], raw: i64, fallback: &str) -> Value {
    let (name, value) = table
        .iter()
        .find(|(_, v)| *v == raw)
        .or_else(|| table.iter().find(|(n, _)| *n == fallback))
        .copied()
        .unwrap_or((fallback, raw));
    Value::Enum {
        value,
        name: Some(name.to_owned()),
    }
}

/// One radio-ground message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RadioGroundSubpacket {
    /// Periodic radio status.
    Heartbeat {
        /// Received signal strength, dBm.
        rssi: i16,
        /// Four-letter radio state.
        state_abbr: String,
        /// Uptime in radio ticks.
        uptime_ticks: u32,
        /// UDP packets received from ground.
        udp_rx_count: u32,
        /// Bad packets received from Hercules.
        bad_herc_count: u32,
        /// Hercules UDP interlock semaphore.
        interlock_semaphore: u8,
    },
    /// Reply to an echo command.
    Echo {
        /// Echoed text.
        text: String,
    },
    /// A radio command was received.
    GotCommand {
        /// Command ID.
        command_id: u8,
        /// Command data as text.
        data: String,
    },
    /// A radio command completed.
    DidCommand {
        /// Command ID.
        command_id: u8,
        /// Command data as text.
        data: String,
    },
    /// A radio command failed.
    BadCommand {
        /// Command ID.
        command_id: u8,
        /// Command data as text.
        data: String,
    },
    /// Hercules sent the radio a bad packet.
    BadHerculesPacket {
        /// WF121 error code.
        issue: u16,
    },
    /// A routing endpoint reported an issue.
    BadEndpointData {
        /// Endpoint number.
        endpoint: u8,
        /// WF121 error code.
        issue: u16,
    },
    /// A UDP packet arrived from an unexpected address.
    BadUdp {
        /// Bad IP and/or bad port.
        issue: u8,
        /// Source address, as sent (little-endian).
        ip: [u8; 4],
        /// Source port.
        port: u16,
    },
    /// The radio reset itself after self-monitoring found a fault.
    CriticalReset {
        /// WF121 error code.
        issue: u16,
    },
    /// The radio reset itself after a software exception.
    SoftwareException {
        /// Faulting address.
        memory_address: u32,
        /// Exception type.
        exception_type: u8,
    },
}

impl RadioGroundSubpacket {
    fn from_fields(def: &SubpacketDef, f: &[&[u8]]) -> Result<Self> {
        let text = |i: usize| text_after(f[i], 0);
        Ok(match def.prefix {
            b"HB" => {
                let digits = std::str::from_utf8(f[0])
                    .ok()
                    .and_then(|s| s.parse::<i16>().ok())
                    .ok_or_else(|| {
                        CodecError::PacketFraming(format!("radio heartbeat RSSI {:?} is not decimal", text(0)))
                    })?;
                let state = text(1);
                let known = RADIO_STATE_ABBRS.iter().any(|(n, _)| *n == state);
                Self::Heartbeat {
                    rssi: -digits,
                    state_abbr: if known { state } else { CORRUPT_STATE.to_owned() },
                    uptime_ticks: le(f[2]) as u32,
                    udp_rx_count: le(f[3]) as u32,
                    bad_herc_count: le(f[4]) as u32,
                    interlock_semaphore: f[5][0],
                }
            }
            b"ECHO" => Self::Echo { text: text(0) },
            b"ACK" => Self::GotCommand {
                command_id: f[0][0],
                data: text(1),
            },
            b"DID" => Self::DidCommand {
                command_id: f[0][0],
                data: text(1),
            },
            b"BADCMD" => Self::BadCommand {
                command_id: f[0][0],
                data: text(1),
            },
            b"BADHERC" => Self::BadHerculesPacket { issue: le(f[0]) as u16 },
            b"BADENDP" => Self::BadEndpointData {
                endpoint: f[0][0],
                issue: le(f[1]) as u16,
            },
            b"BADUDP" => Self::BadUdp {
                issue: f[0][0],
                ip: [f[1][0], f[1][1], f[1][2], f[1][3]],
                port: le(f[2]) as u16,
            },
            b"CRIT!" => Self::CriticalReset { issue: le(f[0]) as u16 },
            _ => Self::SoftwareException {
                memory_address: le(f[0]) as u32,
                exception_type: f[1][0],
            },
        })
    }

    /// Uptime in ms for heartbeats, saturating at `u32::MAX`.
    pub fn uptime_ms(&self) -> Option<u32> {
        match self {
            Self::Heartbeat { uptime_ticks, .. } => {
                Some(u32::try_from(u64::from(*uptime_ticks) * RADIO_TICK_MS).unwrap_or(u32::MAX))
            }
            _ => None,
        }
    }

    /// Wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = HEADER.to_vec();
        let mut put = |initiator: &[u8], data: &[u8]| {
            out.extend_from_slice(initiator);
            out.extend_from_slice(data);
        };
        match self {
            Self::Heartbeat {
                rssi,
                state_abbr,
                uptime_ticks,
                udp_rx_count,
                bad_herc_count,
                interlock_semaphore,
            } => {
                put(b"HB", &[]);
                put(b"|R-", format!("{:03}", rssi.unsigned_abs()).as_bytes());
                let mut state = [b' '; 4];
                state
                    .iter_mut()
                    .zip(state_abbr.bytes())
                    .for_each(|(slot, b)| *slot = b);
                put(b"|", &state);
                put(b"|Th", &uptime_ticks.to_le_bytes());
                put(b"|Rh", &udp_rx_count.to_le_bytes());
                put(b"|Bh", &bad_herc_count.to_le_bytes());
                put(b"|Ih", &[*interlock_semaphore]);
            }
            Self::Echo { text } => {
                put(b"ECHO", &[]);
                put(b"|h", text.as_bytes());
            }
            Self::GotCommand { command_id, data }
            | Self::DidCommand { command_id, data }
            | Self::BadCommand { command_id, data } => {
                let prefix: &[u8] = match self {
                    Self::GotCommand { .. } => b"ACK",
                    Self::DidCommand { .. } => b"DID",
                    _ => b"BADCMD",
                };
                put(prefix, &[]);
                put(b"|h", &[*command_id]);
                put(b"|h", data.as_bytes());
            }
            Self::BadHerculesPacket { issue } => {
                put(b"BADHERC", &[]);
                put(b"|h", &issue.to_le_bytes());
            }
            Self::BadEndpointData { endpoint, issue } => {
                put(b"BADENDP", &[]);
                put(b"|h", &[*endpoint]);
                put(b"|h", &issue.to_le_bytes());
            }
            Self::BadUdp { issue, ip, port } => {
                put(b"BADUDP", &[]);
                put(b"|h", &[*issue]);
                put(b"|h", ip);
                put(b"|h", &port.to_le_bytes());
            }
            Self::CriticalReset { issue } => {
                put(b"CRIT!", &[]);
                put(b"|h", &issue.to_le_bytes());
            }
            Self::SoftwareException {
                memory_address,
                exception_type,
            } => {
                put(b"SWE!", &[]);
                put(b"|h", &memory_address.to_le_bytes());
                put(b"|h", &[*exception_type]);
            }
        }
        out
    }

    fn payloads(&self, standards: &DataStandards) -> Result<PayloadCollection> {
        let wrap = |err: CodecError| CodecError::PayloadDecode(format!("radio-ground: {err}"));
        let event = |name: &str, args: Vec<(&str, Value)>, ts: u32| -> Result<Payload> {
            let args: IndexMap<String, Value> = args.into_iter().map(|(k, v)| (k.to_owned(), v)).collect();
            EventPayload::for_event(standards, &format!("{MODULE}_{name}"), args, ts)
                .map(Payload::from)
                .map_err(wrap)
        };
        let issue = |raw: u16| named(WF121_BGAPI_ERROR_CODES, i64::from(raw), "OTHER__UNEXPECTED");
        let command = |name: &str, id: u8, data: &str| {
            event(
                name,
                vec![
                    ("command", named(RADIO_GROUND_COMMAND_IDS, i64::from(id), "CORRUPTED")),
                    ("string_of_command_data", Value::from(data)),
                ],
                0,
            )
        };

        let mut payloads = PayloadCollection::new();
        match self {
            Self::Heartbeat {
                rssi,
                state_abbr,
                uptime_ticks,
                udp_rx_count,
                bad_herc_count,
                interlock_semaphore,
            } => {
                let ms = self.uptime_ms().unwrap_or(0);
                let state = named(
                    RADIO_STATE_ABBRS,
                    RADIO_STATE_ABBRS
                        .iter()
                        .find(|(n, _)| *n == state_abbr.as_str())
                        .map_or(-1, |(_, v)| *v),
                    CORRUPT_STATE,
                );
                let channels = [
                    ("Rssi", Value::from(*rssi)),
                    ("StateAbbr", state.clone()),
                    ("UptimeTicks", Value::from(*uptime_ticks)),
                    ("UptimeMs", Value::from(ms)),
                    ("UdpRxPacketCount", Value::from(*udp_rx_count)),
                    ("BadHercPacketCount", Value::from(*bad_herc_count)),
                    ("HerculesUdpInterlockCountingSemaphore", Value::from(*interlock_semaphore)),
                ];
                for (channel, value) in channels {
                    payloads.push(
                        TelemetryPayload::for_channel(standards, &format!("{MODULE}_{channel}"), value, ms)
                            .map_err(wrap)?,
                    );
                }
                let secs = ms / 1000;
                let uptime = format!("{:02}h:{:02}m:{:02}s", secs / 3600, secs / 60 % 60, secs % 60);
                payloads.push(event(
                    "Heartbeat",
                    vec![
                        ("state_abbr", state),
                        ("rssi", Value::from(*rssi)),
                        ("uptime_str", Value::from(uptime)),
                    ],
                    ms,
                )?);
            }
            Self::Echo { text } => {
                payloads.push(event("Echo", vec![("echoed_text", Value::from(text.as_str()))], 0)?);
            }
            Self::GotCommand { command_id, data } => payloads.push(command("GotCommand", *command_id, data)?),
            Self::DidCommand { command_id, data } => payloads.push(command("DidCommand", *command_id, data)?),
            Self::BadCommand { command_id, data } => payloads.push(command("BadCommand", *command_id, data)?),
            Self::BadHerculesPacket { issue: raw } => {
                payloads.push(event("BadHerculesPacket", vec![("issue", issue(*raw))], 0)?);
            }
            Self::BadEndpointData { endpoint, issue: raw } => payloads.push(event(
                "BadEndpointData",
                vec![("endpoint", Value::from(*endpoint)), ("issue", issue(*raw))],
                0,
            )?),
            Self::BadUdp { issue: raw, ip, port } => {
                let ip = ip.iter().rev().map(|b| format!("{b:03}")).collect::<Vec<_>>().join(".");
                let issues: &[(&str, i64)] = &[
                    ("NOTHING__THIS_SHOULD_NOT_HAPPEN", 0),
                    ("BAD_IP", 1),
                    ("BAD_PORT", 2),
                    ("BAD_IP_AND_PORT", 3),
                ];
                payloads.push(event(
                    "BadUdp",
                    vec![
                        ("issue", named(issues, i64::from(*raw), "NOTHING__THIS_SHOULD_NOT_HAPPEN")),
                        ("ip", Value::from(ip)),
                        ("port", Value::from(*port)),
                    ],
                    0,
                )?);
            }
            Self::CriticalReset { issue: raw } => {
                payloads.push(event("CriticalReset", vec![("issue", issue(*raw))], 0)?);
            }
            Self::SoftwareException {
                memory_address,
                exception_type,
            } => payloads.push(event(
                "CriticalResetDueToSoftwareException",
                vec![
                    ("memory_address", Value::from(*memory_address)),
                    ("exception_type", Value::from(*exception_type)),
                ],
                0,
            )?),
        }
        Ok(payloads)
    }
}

/// Packet from the radio MCU itself, not relayed from Hercules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioGroundPacket {
    pub(crate) core: PacketCore,
    /// Decoded message.
    pub subpacket: RadioGroundSubpacket,
}

impl RadioGroundPacket {
    /// Packet built on the ground around `subpacket`.
    pub fn new(subpacket: RadioGroundSubpacket, standards: &DataStandards) -> Result<Self> {
        Ok(Self {
            core: PacketCore::built(subpacket.payloads(standards)?),
            subpacket,
        })
    }
}

impl PacketClass for RadioGroundPacket {
    const KIND: PacketKind = PacketKind::RadioGround;

    fn is_valid(bytes: &[u8]) -> bool {
        find(bytes).is_some()
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        let (def, fields) = find(bytes).ok_or_else(|| {
            CodecError::PacketFraming(format!(
                "{} bytes do not match any radio-ground subpacket",
                bytes.len()
            ))
        })?;
        let subpacket = RadioGroundSubpacket::from_fields(def, &fields)?;
        Ok(Self {
            core: PacketCore::decoded(subpacket.payloads(standards)?, bytes),
            subpacket,
        })
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        Ok(self.core.raw.clone().unwrap_or_else(|| self.subpacket.encode()))
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

    fn heartbeat_bytes() -> Vec<u8> {
        let mut bytes = b"RAD:HB|R-031|UDPC|Th".to_vec();
        bytes.extend(123u32.to_le_bytes());
        bytes.extend(b"|Rh");
        bytes.extend(7u32.to_le_bytes());
        bytes.extend(b"|Bh");
        bytes.extend(0x7C7Cu32.to_le_bytes());
        bytes.extend(b"|Ih");
        bytes.push(1);
        bytes
    }

    #[test]
    fn heartbeat_is_stamped_with_uptime() {
        let standards = fixtures::standards();
        let bytes = heartbeat_bytes();
        assert_eq!(bytes.len(), 42);
        let packet = RadioGroundPacket::decode(&bytes, &standards).expect("decode");
        let RadioGroundSubpacket::Heartbeat { rssi, ref state_abbr, bad_herc_count, .. } = packet.subpacket else {
            panic!("not a heartbeat: {:?}", packet.subpacket);
        };
        assert_eq!(rssi, -31);
        assert_eq!(state_abbr, "UDPC");
        // `|` bytes inside raw data do not split fields.
        assert_eq!(bad_herc_count, 0x7C7C);

        let payloads = packet.payloads();
        assert_eq!(payloads.telemetry().count(), 7);
        assert!(payloads.iter().all(|p| p.timestamp() == Some(615_000)));
        let event = payloads.events().next().expect("event");
        assert_eq!(
            event.formatted_string(&standards),
            "Radio Heartbeat: UDPC with -31 RSSI at 00h:10m:15s."
        );
        assert_eq!(packet.subpacket.encode(), bytes);
    }

    #[test]
    fn unknown_states_are_flagged_corrupt() {
        let standards = fixtures::standards();
        let mut bytes = heartbeat_bytes();
        bytes[13..17].copy_from_slice(b"ZZZZ");
        let packet = RadioGroundPacket::decode(&bytes, &standards).expect("decode");
        assert!(matches!(
            packet.subpacket,
            RadioGroundSubpacket::Heartbeat { ref state_abbr, .. } if state_abbr == "CRPT"
        ));
    }

    #[test]
    fn fixed_length_subpackets_reject_other_lengths() {
        let mut bytes = heartbeat_bytes();
        bytes.push(0);
        assert!(!RadioGroundPacket::is_valid(&bytes));
        assert!(!RadioGroundPacket::is_valid(b"RAD:"));
        assert!(!RadioGroundPacket::is_valid(b"RAD:NOPE|h"));
    }

    #[test]
    fn bad_udp_formats_the_address() {
        let standards = fixtures::standards();
        let subpacket = RadioGroundSubpacket::BadUdp {
            issue: 3,
            ip: [0x01, 0x01, 0xA8, 0xC0],
            port: 8080,
        };
        let bytes = subpacket.encode();
        assert_eq!(bytes.len(), 23);
        let packet = RadioGroundPacket::decode(&bytes, &standards).expect("decode");
        assert_eq!(packet.subpacket, subpacket);
        let event = packet.payloads().events().next().expect("event");
        assert_eq!(event.args["ip"].as_str(), Some("192.168.001.001"));
        assert_eq!(event.args["issue"].as_str(), Some("BAD_IP_AND_PORT"));
        assert_eq!(event.args["port"], Value::UInt(8080));
    }

    #[test]
    fn command_callbacks_fall_back_to_corrupted() {
        let standards = fixtures::standards();
        let packet = RadioGroundPacket::decode(b"RAD:DID|h\x42|hsome data", &standards).expect("decode");
        assert_eq!(
            packet.subpacket,
            RadioGroundSubpacket::DidCommand {
                command_id: 0x42,
                data: "some data".to_owned()
            }
        );
        let event = packet.payloads().events().next().expect("event");
        assert_eq!(event.args["command"].as_str(), Some("CORRUPTED"));
        assert_eq!(event.name(&standards).as_deref(), Some("RadioGround_DidCommand"));
    }

    #[test]
    fn unknown_issues_become_other_unexpected() {
        let standards = fixtures::standards();
        let subpacket = RadioGroundSubpacket::CriticalReset { issue: 0x1234 };
        let packet = RadioGroundPacket::new(subpacket, &standards).expect("build");
        let event = packet.payloads().events().next().expect("event");
        assert_eq!(event.args["issue"].as_str(), Some("OTHER__UNEXPECTED"));
    }
}
