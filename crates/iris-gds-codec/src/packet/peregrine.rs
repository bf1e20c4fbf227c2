//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Carrier for lander telemetry that never crosses the rover link."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};

use super::{PacketClass, PacketCore, PacketKind};
use crate::collection::PayloadCollection;
use crate::{CodecError, Result};

/// Wraps `Peregrine` telemetry built from lander data so it can travel the
/// downlink pipeline like rover packets. It has no wire form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeregrineDummyPacket {
    pub(crate) core: PacketCore,
}

impl PeregrineDummyPacket {
    /// Packet around `payloads`.
    pub fn new(payloads: PayloadCollection) -> Self {
        Self {
            core: PacketCore::built(payloads),
        }
    }
}

impl PacketClass for PeregrineDummyPacket {
    const KIND: PacketKind = PacketKind::PeregrineDummy;

    fn is_valid(_: &[u8]) -> bool {
        false
    }

    fn decode(bytes: &[u8], _: &DataStandards) -> Result<Self> {
        Err(CodecError::PacketFraming(format!(
            "lander telemetry has no wire form ({} bytes offered)",
            bytes.len()
        )))
    }

    fn encode(&self, _: &DataStandards) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    fn core(&self) -> &PacketCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        &mut self.core
    }
}
