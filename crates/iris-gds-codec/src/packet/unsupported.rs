//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Packet that keeps bytes no other class could decode."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};

use super::gds_event::gds_packet_event;
use super::{PacketClass, PacketCore, PacketKind};
use crate::payload::Payload;
use crate::{CodecError, Result};

/// Bytes that no packet class accepted, kept alongside normal traffic
/// instead of being dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnsupportedPacket {
    pub(crate) core: PacketCore,
    /// Why decoding failed, if a decoder was tried.
    pub reason: Option<String>,
}

impl UnsupportedPacket {
    /// Wrap `bytes`, raising a `GdsPackets` event that describes them.
    pub fn new(bytes: &[u8], reason: Option<String>, standards: &DataStandards) -> Self {
        let msg = match &reason {
            Some(reason) => format!("{} unsupported bytes ({reason}): {}", bytes.len(), hex::encode(bytes)),
            None => format!("{} unsupported bytes: {}", bytes.len(), hex::encode(bytes)),
        };
        let payloads = gds_packet_event(standards, "UnsupportedPacket", &msg)
            .map(Payload::from)
            .into_iter()
            .collect();
        Self {
            core: PacketCore::decoded(payloads, bytes),
            reason,
        }
    }

    /// The bytes as received.
    pub fn bytes(&self) -> &[u8] {
        self.core.raw.as_deref().unwrap_or_default()
    }
}

impl PacketClass for UnsupportedPacket {
    const KIND: PacketKind = PacketKind::Unsupported;

    /// Anything can be unsupported.
    fn is_valid(_: &[u8]) -> bool {
        true
    }

    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self> {
        Ok(Self::new(bytes, None, standards))
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        self.core
            .raw
            .clone()
            .ok_or_else(|| CodecError::PacketFraming("unsupported packet has no bytes".to_owned()))
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}
