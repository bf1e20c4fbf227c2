//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Packet classes, their shared core, and the closed packet enum."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Packets wrap a [`PayloadCollection`] with the framing of one packet
//! class. Only [`IrisCommonPacket`] carries a variable-length payload; the
//! watchdog and radio classes each own a fixed layout and surface their
//! contents as telemetry or event payloads against prebuilt modules.

mod common;
mod detailed_status;
mod gds_event;
mod peregrine;
mod radio;
mod radio_ground;
mod unsupported;
mod watchdog;

use iris_gds_catalog::DataStandards;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::collection::PayloadCollection;
use crate::metadata::{DataPathway, DataSource};
use crate::payload::{Payload, TelemetryPayload};
use crate::primitive::Value;
use crate::{CodecError, Result};

pub use common::IrisCommonPacket;
pub use detailed_status::{DetailedStatus, WatchdogDetailedStatusPacket};
pub use gds_event::{gds_packet_event, GDS_EVENT_MSG_MAX};
pub use peregrine::PeregrineDummyPacket;
pub use radio::{BgApiHeader, RadioBgApiPacket, RadioDirectMessagePacket, RadioHelloPacket};
pub use radio_ground::{RadioGroundPacket, RadioGroundSubpacket, RADIO_TICK_MS};
pub use unsupported::UnsupportedPacket;
pub use watchdog::{
    ResetConditions, WatchdogCommandResponsePacket, WatchdogHeartbeatPacket, WatchdogHelloPacket,
    WatchdogResetSpecificAckPacket,
};

/// Packet class discriminant, used for sequence tracking and metrics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
pub enum PacketKind {
    /// [`IrisCommonPacket`].
    IrisCommon,
    /// [`WatchdogHeartbeatPacket`].
    WatchdogHeartbeat,
    /// [`WatchdogDetailedStatusPacket`].
    WatchdogDetailedStatus,
    /// [`WatchdogCommandResponsePacket`].
    WatchdogCommandResponse,
    /// [`WatchdogResetSpecificAckPacket`].
    WatchdogResetSpecificAck,
    /// [`WatchdogHelloPacket`].
    WatchdogHello,
    /// [`RadioHelloPacket`].
    RadioHello,
    /// [`RadioDirectMessagePacket`].
    RadioDirectMessage,
    /// [`RadioBgApiPacket`].
    RadioBgApi,
    /// [`RadioGroundPacket`].
    RadioGround,
    /// [`PeregrineDummyPacket`].
    PeregrineDummy,
    /// [`UnsupportedPacket`].
    Unsupported,
}

/// State every packet class carries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PacketCore {
    /// Payloads surfaced by the packet.
    pub payloads: PayloadCollection,
    /// Bytes the packet was decoded from, kept for round-trip fidelity.
    #[serde(default, with = "opt_hex")]
    pub raw: Option<Vec<u8>>,
    /// Route the packet travelled.
    #[serde(default)]
    pub pathway: DataPathway,
    /// Origin of the bytes.
    #[serde(default)]
    pub source: DataSource,
}

impl PacketCore {
    /// Core around decoded bytes.
    pub fn decoded(payloads: PayloadCollection, raw: &[u8]) -> Self {
        Self {
            payloads,
            raw: Some(raw.to_vec()),
            ..Self::default()
        }
    }

    /// Core around payloads built on the ground.
    pub fn built(payloads: PayloadCollection) -> Self {
        Self {
            payloads,
            ..Self::default()
        }
    }
}

/// Telemetry payloads of a prebuilt module, stamped with rover time 0
/// since fixed-layout packets carry no clock.
pub(crate) fn module_telemetry<'a>(
    standards: &DataStandards,
    module: &str,
    values: impl IntoIterator<Item = (&'a str, Value)>,
) -> Result<PayloadCollection> {
    values
        .into_iter()
        .map(|(channel, value)| {
            TelemetryPayload::for_channel(standards, &format!("{module}_{channel}"), value, 0)
                .map(Payload::from)
                .map_err(|err| CodecError::PayloadDecode(format!("{module} telemetry: {err}")))
        })
        .collect()
}

/// Bytes after `prefix`, read as text with invalid UTF-8 replaced.
pub(crate) fn text_after(bytes: &[u8], prefix: usize) -> String {
    String::from_utf8_lossy(bytes.get(prefix..).unwrap_or_default()).into_owned()
}

/// Behaviour shared by every packet class.
pub trait PacketClass: Sized {
    /// Discriminant of this class.
    const KIND: PacketKind;

    /// Whether `bytes` look like this class. Never fails; `false` for bytes
    /// of any other class.
    fn is_valid(bytes: &[u8]) -> bool;

    /// Decode a packet of this class.
    fn decode(bytes: &[u8], standards: &DataStandards) -> Result<Self>;

    /// Wire bytes of this packet.
    fn encode(&self, standards: &DataStandards) -> Result<Vec<u8>>;

    /// Shared state.
    fn core(&self) -> &PacketCore;

    /// Mutable shared state.
    fn core_mut(&mut self) -> &mut PacketCore;
}

macro_rules! impl_core {
    ($($t:ty),* $(,)?) => {
        $(impl $t {
            /// Payloads surfaced by this packet.
            pub fn payloads(&self) -> &PayloadCollection {
                &self.core.payloads
            }
        })*
    };
}

impl_core!(
    IrisCommonPacket,
    WatchdogHeartbeatPacket,
    WatchdogDetailedStatusPacket,
    WatchdogCommandResponsePacket,
    WatchdogResetSpecificAckPacket,
    WatchdogHelloPacket,
    RadioHelloPacket,
    RadioDirectMessagePacket,
    RadioBgApiPacket,
    RadioGroundPacket,
    PeregrineDummyPacket,
    UnsupportedPacket,
);

/// Any packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "class")]
pub enum Packet {
    /// See [`IrisCommonPacket`].
    IrisCommon(IrisCommonPacket),
    /// See [`WatchdogHeartbeatPacket`].
    WatchdogHeartbeat(WatchdogHeartbeatPacket),
    /// See [`WatchdogDetailedStatusPacket`].
    WatchdogDetailedStatus(WatchdogDetailedStatusPacket),
    /// See [`WatchdogCommandResponsePacket`].
    WatchdogCommandResponse(WatchdogCommandResponsePacket),
    /// See [`WatchdogResetSpecificAckPacket`].
    WatchdogResetSpecificAck(WatchdogResetSpecificAckPacket),
    /// See [`WatchdogHelloPacket`].
    WatchdogHello(WatchdogHelloPacket),
    /// See [`RadioHelloPacket`].
    RadioHello(RadioHelloPacket),
    /// See [`RadioDirectMessagePacket`].
    RadioDirectMessage(RadioDirectMessagePacket),
    /// See [`RadioBgApiPacket`].
    RadioBgApi(RadioBgApiPacket),
    /// See [`RadioGroundPacket`].
    RadioGround(RadioGroundPacket),
    /// See [`PeregrineDummyPacket`].
    PeregrineDummy(PeregrineDummyPacket),
    /// See [`UnsupportedPacket`].
    Unsupported(UnsupportedPacket),
}

macro_rules! each_packet {
    ($self:expr, $p:ident => $body:expr) => {
        match $self {
            Packet::IrisCommon($p) => $body,
            Packet::WatchdogHeartbeat($p) => $body,
            Packet::WatchdogDetailedStatus($p) => $body,
            Packet::WatchdogCommandResponse($p) => $body,
            Packet::WatchdogResetSpecificAck($p) => $body,
            Packet::WatchdogHello($p) => $body,
            Packet::RadioHello($p) => $body,
            Packet::RadioDirectMessage($p) => $body,
            Packet::RadioBgApi($p) => $body,
            Packet::RadioGround($p) => $body,
            Packet::PeregrineDummy($p) => $body,
            Packet::Unsupported($p) => $body,
        }
    };
}

/// Static discriminant of a class instance.
fn kind_of<P: PacketClass>(_: &P) -> PacketKind {
    P::KIND
}

impl Packet {
    /// Packet class.
    pub fn kind(&self) -> PacketKind {
        each_packet!(self, p => kind_of(p))
    }

    fn core(&self) -> &PacketCore {
        each_packet!(self, p => p.core())
    }

    fn core_mut(&mut self) -> &mut PacketCore {
        each_packet!(self, p => p.core_mut())
    }

    /// Payloads surfaced by the packet.
    pub fn payloads(&self) -> &PayloadCollection {
        &self.core().payloads
    }

    /// Mutable payloads.
    pub fn payloads_mut(&mut self) -> &mut PayloadCollection {
        &mut self.core_mut().payloads
    }

    /// Take the payloads out of the packet.
    pub fn into_payloads(self) -> PayloadCollection {
        let mut packet = self;
        std::mem::take(&mut packet.core_mut().payloads)
    }

    /// Bytes the packet was decoded from.
    pub fn raw(&self) -> Option<&[u8]> {
        self.core().raw.as_deref()
    }

    /// Route the packet travelled.
    pub fn pathway(&self) -> DataPathway {
        self.core().pathway
    }

    /// Origin of the bytes.
    pub fn source(&self) -> DataSource {
        self.core().source
    }

    /// Set the pathway of the packet and every payload in it.
    pub fn set_pathway(&mut self, pathway: DataPathway) {
        let core = self.core_mut();
        core.pathway = pathway;
        core.payloads.set_pathway(pathway);
    }

    /// Set the source of the packet and every payload in it.
    pub fn set_source(&mut self, source: DataSource) {
        let core = self.core_mut();
        core.source = source;
        core.payloads.set_source(source);
    }

    /// Wire bytes.
    pub fn encode(&self, standards: &DataStandards) -> Result<Vec<u8>> {
        each_packet!(self, p => p.encode(standards))
    }

    /// Sequence number, for classes that carry one.
    pub fn seq_num(&self) -> Option<u8> {
        match self {
            Packet::IrisCommon(p) => Some(p.seq_num),
            _ => None,
        }
    }
}

macro_rules! packet_from {
    ($($variant:ident($t:ty)),* $(,)?) => {
        $(impl From<$t> for Packet {
            fn from(p: $t) -> Self {
                Packet::$variant(p)
            }
        })*
    };
}

packet_from!(
    IrisCommon(IrisCommonPacket),
    WatchdogHeartbeat(WatchdogHeartbeatPacket),
    WatchdogDetailedStatus(WatchdogDetailedStatusPacket),
    WatchdogCommandResponse(WatchdogCommandResponsePacket),
    WatchdogResetSpecificAck(WatchdogResetSpecificAckPacket),
    WatchdogHello(WatchdogHelloPacket),
    RadioHello(RadioHelloPacket),
    RadioDirectMessage(RadioDirectMessagePacket),
    RadioBgApi(RadioBgApiPacket),
    RadioGround(RadioGroundPacket),
    PeregrineDummy(PeregrineDummyPacket),
    Unsupported(UnsupportedPacket),
);

/// Raw bytes travel as hex so JSON stays readable.
mod opt_hex {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(raw: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match raw {
            Some(bytes) => s.serialize_some(&hex::encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|text| hex::decode(text).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::TelemetryPayload;
    use crate::primitive::Value;

    fn packet() -> Packet {
        let payloads = PayloadCollection::from(vec![
            TelemetryPayload::new(0xFB00, 0x10, Value::UInt(3), 0).into(),
        ]);
        PeregrineDummyPacket::new(payloads).into()
    }

    #[test]
    fn pathway_and_source_reach_payloads() {
        let mut packet = packet();
        packet.set_pathway(DataPathway::Wired);
        packet.set_source(DataSource::Yamcs);
        assert_eq!(packet.pathway(), DataPathway::Wired);
        let payload = packet.payloads().iter().next().expect("payload");
        assert_eq!(payload.pathway(), DataPathway::Wired);
        assert_eq!(payload.source(), DataSource::Yamcs);
    }

    #[test]
    fn serde_keeps_the_class_tag() {
        let packet = packet();
        let json = serde_json::to_value(&packet).expect("serialize");
        assert_eq!(json["class"], "PeregrineDummy");
        let back: Packet = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, packet);
        assert_eq!(back.kind(), PacketKind::PeregrineDummy);
    }
}
