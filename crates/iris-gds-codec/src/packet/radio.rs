//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Text and BGAPI packets sent by the radio over the Hercules UART."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use indexmap::IndexMap;
use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};

use super::gds_event::gds_packet_event;
use super::{text_after, PacketClass, PacketCore, PacketKind};
use crate::collection::PayloadCollection;
use crate::payload::{EventPayload, Payload};
use crate::primitive::Value;
use crate::{CodecError, Result};

fn not_a(class: &str, bytes: &[u8]) -> CodecError {
    CodecError::PacketFraming(format!("{} bytes are not a {class}", bytes.len()))
}

/// Greeting the radio sends once it has joined the network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioHelloPacket {
    pub(crate) core: PacketCore,
    /// Greeting text.
    pub text: String,
}

impl RadioHelloPacket {
    /// Fixed greeting.
    pub const GREETING: &'static str = "Hello Earth, this is Iris on the Moon!";
}

impl PacketClass for RadioHelloPacket {
    const KIND: PacketKind = PacketKind::RadioHello;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.starts_with(Self::GREETING.as_bytes())
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        if !Self::is_valid(bytes) {
            return Err(not_a("radio hello", bytes));
        }
        let text = text_after(bytes, 0).trim_end_matches('\0').to_owned();
        let mut args = IndexMap::with_capacity(1);
        args.insert("message".to_owned(), Value::Text(text.clone()));
        let mut payloads = PayloadCollection::new();
        payloads.push(
            EventPayload::for_event(standards, "RadioGround_Connected", args, 0)
                .map_err(|err| CodecError::PayloadDecode(format!("radio hello: {err}")))?,
        );
        payloads.extend(gds_packet_event(standards, "RadioHelloPacket", &text).map(Payload::from));
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

/// Header of a BGAPI message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BgApiHeader {
    /// Event (`true`) or command response.
    pub is_event: bool,
    /// Technology type, 1 for Wi-Fi.
    pub technology: u8,
    /// Payload length.
    pub payload_len: u16,
    /// Message class.
    pub class_id: u8,
    /// Message ID within the class.
    pub message_id: u8,
}

impl BgApiHeader {
    const LEN: usize = 4;

    fn parse(bytes: &[u8]) -> Option<Self> {
        let &[b0, b1, class_id, message_id] = bytes.get(..Self::LEN)? else {
            return None;
        };
        Some(Self {
            is_event: b0 & 0x80 != 0,
            technology: (b0 >> 3) & 0x0F,
            payload_len: u16::from(b0 & 0x07) << 8 | u16::from(b1),
            class_id,
            message_id,
        })
    }
}

/// BGAPI message the radio forwarded verbatim for debugging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioBgApiPacket {
    pub(crate) core: PacketCore,
    /// Message after the prefix.
    pub data: Vec<u8>,
    /// Parsed header, `None` when the data is too short or its length
    /// disagrees with the header.
    pub header: Option<BgApiHeader>,
}

impl RadioBgApiPacket {
    const PREFIX: &'static [u8] = b"DEBUGBGP:";

    /// Operator-facing summary with a hex dump of the message.
    pub fn message(&self) -> String {
        match self.header {
            Some(h) => format!(
                "BGAPI[{}B] {} tech={} class={:#04x} id={:#04x} payload={}",
                self.data.len(),
                if h.is_event { "evt" } else { "rsp" },
                h.technology,
                h.class_id,
                h.message_id,
                hex::encode(&self.data[BgApiHeader::LEN..])
            ),
            None => format!(
                "BGAPI[{}B] decoding failed: {}",
                self.data.len(),
                hex::encode(&self.data)
            ),
        }
    }
}

impl PacketClass for RadioBgApiPacket {
    const KIND: PacketKind = PacketKind::RadioBgApi;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.starts_with(Self::PREFIX)
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        if !Self::is_valid(bytes) {
            return Err(not_a("radio BGAPI packet", bytes));
        }
        let data = bytes[Self::PREFIX.len()..].to_vec();
        let header = BgApiHeader::parse(&data)
            .filter(|h| usize::from(h.payload_len) == data.len() - BgApiHeader::LEN);
        if header.is_none() {
            tracing::warn!(data = %hex::encode(&data), "BGAPI message inside radio packet does not parse");
        }
        let mut packet = Self {
            core: PacketCore::default(),
            data,
            header,
        };
        let payloads = gds_packet_event(standards, "RadioBgApiPacket", &packet.message())
            .map(Payload::from)
            .into_iter()
            .collect();
        packet.core = PacketCore::decoded(payloads, bytes);
        Ok(packet)
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        Ok(self.core.raw.clone().unwrap_or_else(|| [Self::PREFIX, self.data.as_slice()].concat()))
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}

/// Free text the radio sends to ground through the watchdog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RadioDirectMessagePacket {
    pub(crate) core: PacketCore,
    /// Message text, starting at `RADIO`.
    pub text: String,
}

impl RadioDirectMessagePacket {
    const PREFIX: &'static [u8] = b"DEBUGRADIO";
    /// `DEBUG` is framing; the text keeps `RADIO` as its tag.
    const TEXT_START: usize = 5;
}

impl PacketClass for RadioDirectMessagePacket {
    const KIND: PacketKind = PacketKind::RadioDirectMessage;

    fn is_valid(bytes: &[u8]) -> bool {
        bytes.len() >= Self::PREFIX.len() && bytes[..Self::PREFIX.len()].eq_ignore_ascii_case(Self::PREFIX)
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        if !Self::is_valid(bytes) {
            return Err(not_a("radio direct message", bytes));
        }
        let text = text_after(bytes, Self::TEXT_START)
            .trim_end_matches('\0')
            .trim_end()
            .to_owned();
        let payloads = gds_packet_event(standards, "RadioDirectMessagePacket", &text)
            .map(Payload::from)
            .into_iter()
            .collect();
        Ok(Self {
            core: PacketCore::decoded(payloads, bytes),
            text,
        })
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        if let Some(raw) = &self.core.raw {
            return Ok(raw.clone());
        }
        Ok([&Self::PREFIX[..Self::TEXT_START], self.text.as_bytes()].concat())
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

    #[test]
    fn hello_raises_connected_and_gds_events() {
        let standards = fixtures::standards();
        let packet = RadioHelloPacket::decode(RadioHelloPacket::GREETING.as_bytes(), &standards).expect("decode");
        let names: Vec<String> = packet
            .payloads()
            .events()
            .filter_map(|e| e.name(&standards))
            .collect();
        assert_eq!(names, ["RadioGround_Connected", "GdsPackets_RadioHelloPacket"]);
        assert!(packet.payloads().events().all(|e| e.timestamp == 0));
        assert!(!RadioHelloPacket::is_valid(b"hello earth"));
    }

    #[test]
    fn bgapi_header_is_parsed_when_lengths_agree() {
        let standards = fixtures::standards();
        // Wi-Fi event, 2-byte payload, class 0x03, id 0x01.
        let mut bytes = b"DEBUGBGP:".to_vec();
        bytes.extend([0x88, 0x02, 0x03, 0x01, 0xAA, 0xBB]);
        let packet = RadioBgApiPacket::decode(&bytes, &standards).expect("decode");
        let header = packet.header.expect("header");
        assert!(header.is_event);
        assert_eq!((header.technology, header.payload_len), (1, 2));
        assert!(packet.message().ends_with("payload=aabb"));
        assert_eq!(packet.encode(&standards).expect("encode"), bytes);

        bytes.push(0xCC);
        let packet = RadioBgApiPacket::decode(&bytes, &standards).expect("decode");
        assert!(packet.header.is_none());
        assert!(packet.message().contains("decoding failed"));
    }

    #[test]
    fn direct_message_trims_padding() {
        let standards = fixtures::standards();
        let packet = RadioDirectMessagePacket::decode(b"debugradio: link up \0\0", &standards).expect("decode");
        assert_eq!(packet.text, "radio: link up");
        let event = packet.payloads().events().next().expect("event");
        assert_eq!(event.formatted_string(&standards), "radio: link up");
    }
}
