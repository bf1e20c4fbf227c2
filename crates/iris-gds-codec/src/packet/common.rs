//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Iris common packet: checksummed header plus a variable-length payload."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Layout: `seq_num:U8, vlp_len:U16, checksum:U8`, then the VLP, a
//! concatenation of `(magic:U32, body)` objects.

use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::gds_event::gds_packet_event;
use super::{PacketClass, PacketCore, PacketKind};
use crate::collection::PayloadCollection;
use crate::magic::Magic;
use crate::payload::{Payload, PayloadKind};
use crate::primitive::Endianness;
use crate::{CodecError, Result};

const ENDIAN: Endianness = Endianness::NETWORK;

/// Common packet carrying any mix of payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IrisCommonPacket {
    pub(crate) core: PacketCore,
    /// Sequence number; 0 for senders that do not track them.
    pub seq_num: u8,
    /// VLP bytes that could not be parsed, kept verbatim.
    #[serde(default)]
    pub remainder: Option<Vec<u8>>,
}

impl IrisCommonPacket {
    /// Header length in bytes.
    pub const HEADER_LEN: usize = 4;
    /// Largest packet the watchdog accepts.
    pub const MTU_WATCHDOG: usize = 255;
    /// Largest packet Hercules accepts.
    pub const MTU_HERCULES: usize = 1006;

    const CHECKSUM_INDEX: usize = 3;

    /// Packet built on the ground.
    pub fn new(seq_num: u8, payloads: PayloadCollection) -> Self {
        Self {
            core: PacketCore::built(payloads),
            seq_num,
            remainder: None,
        }
    }

    /// One's complement of the 8-bit sum of `bytes`, with the checksum
    /// byte read as zero.
    pub fn checksum(bytes: &[u8]) -> u8 {
        let sum = bytes
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != Self::CHECKSUM_INDEX)
            .fold(0u8, |acc, (_, b)| acc.wrapping_add(*b));
        !sum
    }

    /// Size cap for this packet: watchdog-bound packets are smaller.
    pub fn mtu(&self) -> usize {
        if self.core.payloads.count(PayloadKind::WatchdogCommand) > 0 {
            Self::MTU_WATCHDOG
        } else {
            Self::MTU_HERCULES
        }
    }

    fn header_fields(bytes: &[u8]) -> Option<(u8, usize, u8)> {
        let &[seq, hi, lo, checksum, ..] = bytes else {
            return None;
        };
        Some((seq, usize::from(u16::from_be_bytes([hi, lo])), checksum))
    }

    /// Parse the VLP. Parsing stops at the first object that cannot be read
    /// and the rest of the bytes are returned as the remainder.
    fn parse_vlp(
        vlp: &[u8],
        standards: &DataStandards,
    ) -> (PayloadCollection, Option<(Vec<u8>, String)>) {
        let mut payloads = PayloadCollection::new();
        let mut at = 0;
        while at < vlp.len() {
            let rest = &vlp[at..];
            let failure = match rest {
                [a, b, c, d, body @ ..] => {
                    let value = u32::from_be_bytes([*a, *b, *c, *d]);
                    match Magic::from_value(value) {
                        Some(magic) => match Payload::decode(magic, body, ENDIAN, standards) {
                            Ok((payload, used)) => {
                                payloads.push(payload);
                                at += Magic::SIZE + used;
                                continue;
                            }
                            Err(err) => err.to_string(),
                        },
                        None => format!("unknown magic {value:#010x}"),
                    }
                }
                _ => format!("{} trailing bytes are too short for a magic", rest.len()),
            };
            return (payloads, Some((rest.to_vec(), failure)));
        }
        (payloads, None)
    }

    /// VLP bytes: each payload behind its magic, then any remainder.
    fn encode_vlp(&self, standards: &DataStandards) -> Result<Vec<u8>> {
        let mut vlp = Vec::new();
        for payload in &self.core.payloads {
            // The marker event describes the remainder; it never went over the wire.
            if self.remainder.is_some() && is_unsupported_marker(payload, standards) {
                continue;
            }
            vlp.extend_from_slice(&payload.magic().value().to_be_bytes());
            vlp.extend(payload.encode(standards, ENDIAN)?);
        }
        if let Some(rest) = &self.remainder {
            vlp.extend_from_slice(rest);
        }
        Ok(vlp)
    }
}

fn is_unsupported_marker(payload: &Payload, standards: &DataStandards) -> bool {
    match payload {
        Payload::Event(e) => e.name(standards).as_deref() == Some("GdsPackets_UnsupportedPacket"),
        _ => false,
    }
}

impl PacketClass for IrisCommonPacket {
    const KIND: PacketKind = PacketKind::IrisCommon;

    fn is_valid(bytes: &[u8]) -> bool {
        if bytes.len() <= Self::HEADER_LEN + Magic::SIZE + 1 {
            return false;
        }
        let Some((_, vlp_len, _)) = Self::header_fields(bytes) else {
            return false;
        };
        let first = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        vlp_len == bytes.len() - Self::HEADER_LEN && Magic::from_value(first).is_some()
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        let (seq_num, vlp_len, found) = Self::header_fields(bytes).ok_or_else(|| {
            CodecError::PacketFraming(format!(
                "common packet header needs {} bytes, got {}",
                Self::HEADER_LEN,
                bytes.len()
            ))
        })?;
        if bytes.len() - Self::HEADER_LEN != vlp_len {
            return Err(CodecError::PacketFraming(format!(
                "header announces a {vlp_len} byte VLP but {} bytes follow",
                bytes.len() - Self::HEADER_LEN
            )));
        }
        let expected = Self::checksum(bytes);
        if expected != found {
            return Err(CodecError::PacketChecksum { expected, found });
        }

        let (mut payloads, leftover) = Self::parse_vlp(&bytes[Self::HEADER_LEN..], standards);
        let remainder = leftover.map(|(rest, why)| {
            debug!(seq_num, remaining = rest.len(), %why, "stopped parsing common packet VLP");
            let msg = format!(
                "{} unparsed VLP bytes after {} payloads ({why}): {}",
                rest.len(),
                payloads.len(),
                hex::encode(&rest)
            );
            if let Some(event) = gds_packet_event(standards, "UnsupportedPacket", &msg) {
                payloads.push(event);
            }
            rest
        });

        Ok(Self {
            core: PacketCore::decoded(payloads, bytes),
            seq_num,
            remainder,
        })
    }

    fn encode(&self, standards: &DataStandards) -> Result<Vec<u8>> {
        let vlp = self.encode_vlp(standards)?;
        let total = Self::HEADER_LEN + vlp.len();
        let mtu = self.mtu();
        if total > mtu {
            return Err(CodecError::PacketFraming(format!(
                "packet of {total} bytes exceeds the {mtu} byte MTU"
            )));
        }
        let vlp_len = u16::try_from(vlp.len())
            .map_err(|_| CodecError::PacketFraming(format!("VLP of {} bytes is too long", vlp.len())))?;
        let mut out = Vec::with_capacity(total);
        out.push(self.seq_num);
        out.extend_from_slice(&vlp_len.to_be_bytes());
        out.push(0);
        out.extend(vlp);
        out[Self::CHECKSUM_INDEX] = Self::checksum(&out);
        Ok(out)
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}
