//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Closed set of message types carried on the bus."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Message content. The set is closed: anything decoded off the wire is one
//! of the [`MessageContent`] variants, each with a fixed field schema.

use iris_gds_codec::{Packet, PacketKind, Payload, PayloadCollection};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::{IpcError, Result};

/// Discriminant of [`MessageContent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display)]
pub enum MessageKind {
    /// [`DownlinkedPacketsMessage`].
    DownlinkedPackets,
    /// [`DownlinkedPayloadsMessage`].
    DownlinkedPayloads,
    /// [`UplinkPayloadsRequestMessage`].
    UplinkPayloadsRequest,
    /// [`UplinkPacketRequestMessage`].
    UplinkPacketRequest,
    /// [`XcvrControlMessage`].
    XcvrControl,
    /// [`AppControlMessage`].
    AppControl,
}

/// How uplinked payloads are packed into packets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PacketSplit {
    /// One payload per packet, in input order.
    #[default]
    Individual,
    /// All payloads in one packet.
    Together,
    /// Packer's choice; currently the same as `Individual`.
    Any,
}

/// Transceiver a request is addressed to.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum TargetXcvr {
    /// Every transceiver.
    #[default]
    All,
    /// Serial link.
    Serial,
    /// Capture replay.
    Pcap,
    /// Lander archive replay.
    Archive,
    /// YAMCS bridge.
    Yamcs,
}

impl TargetXcvr {
    /// Whether the transceiver called `name` should act on the request.
    pub fn includes(self, name: &str) -> bool {
        self == TargetXcvr::All || self.to_string().eq_ignore_ascii_case(name)
    }
}

/// Packets read by a transceiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkedPacketsMessage {
    /// Packets in read order.
    pub packets: Vec<Packet>,
}

/// Processed downlink payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownlinkedPayloadsMessage {
    /// Payloads, including generated meta-channel values.
    pub payloads: PayloadCollection,
}

/// Payloads to pack and uplink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkPayloadsRequestMessage {
    /// Payloads in requested order.
    pub payloads: Vec<Payload>,
    /// Packing policy.
    #[serde(default)]
    pub split: PacketSplit,
    /// Packet class to build; common packets when unset.
    #[serde(default)]
    pub packet_class: Option<PacketKind>,
    /// Transceiver to send the packets with.
    #[serde(default)]
    pub target_xcvr: TargetXcvr,
}

/// A packet to hand to a transceiver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UplinkPacketRequestMessage {
    /// Packet to send.
    pub packet: Packet,
    /// Transceiver to send it with.
    #[serde(default)]
    pub target_xcvr: TargetXcvr,
}

/// Transceiver lifecycle commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum XcvrCommand {
    /// Open the link.
    Begin,
    /// Stop reading without closing.
    Pause,
    /// Read again after a pause.
    Resume,
    /// Close and reopen.
    Restart,
}

/// Command for one or every transceiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct XcvrControlMessage {
    /// Addressee.
    pub target_xcvr: TargetXcvr,
    /// What to do.
    pub command: XcvrCommand,
}

/// App-level actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum AppAction {
    /// Stop gracefully.
    Shutdown,
    /// Liveness ping.
    Heartbeat,
}

/// Control message for one app or all of them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppControlMessage {
    /// App name; `None` addresses every app.
    pub target_app: Option<String>,
    /// What to do.
    pub action: AppAction,
}

impl AppControlMessage {
    /// Whether the app called `name` is addressed.
    pub fn addresses(&self, name: &str) -> bool {
        self.target_app
            .as_deref()
            .map_or(true, |target| target.eq_ignore_ascii_case(name))
    }
}

/// Everything that can travel on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data")]
pub enum MessageContent {
    /// See [`DownlinkedPacketsMessage`].
    DownlinkedPackets(DownlinkedPacketsMessage),
    /// See [`DownlinkedPayloadsMessage`].
    DownlinkedPayloads(DownlinkedPayloadsMessage),
    /// See [`UplinkPayloadsRequestMessage`].
    UplinkPayloadsRequest(UplinkPayloadsRequestMessage),
    /// See [`UplinkPacketRequestMessage`].
    UplinkPacketRequest(UplinkPacketRequestMessage),
    /// See [`XcvrControlMessage`].
    XcvrControl(XcvrControlMessage),
    /// See [`AppControlMessage`].
    AppControl(AppControlMessage),
}

impl MessageContent {
    /// Discriminant.
    pub fn kind(&self) -> MessageKind {
        match self {
            MessageContent::DownlinkedPackets(_) => MessageKind::DownlinkedPackets,
            MessageContent::DownlinkedPayloads(_) => MessageKind::DownlinkedPayloads,
            MessageContent::UplinkPayloadsRequest(_) => MessageKind::UplinkPayloadsRequest,
            MessageContent::UplinkPacketRequest(_) => MessageKind::UplinkPacketRequest,
            MessageContent::XcvrControl(_) => MessageKind::XcvrControl,
            MessageContent::AppControl(_) => MessageKind::AppControl,
        }
    }
}

macro_rules! message_conversions {
    ($($variant:ident => $t:ty),* $(,)?) => {
        $(
            impl From<$t> for MessageContent {
                fn from(message: $t) -> Self {
                    MessageContent::$variant(message)
                }
            }

            impl TryFrom<MessageContent> for $t {
                type Error = IpcError;

                fn try_from(content: MessageContent) -> Result<Self> {
                    match content {
                        MessageContent::$variant(message) => Ok(message),
                        other => Err(IpcError::Decode(format!(
                            "expected {} but got {}",
                            MessageKind::$variant,
                            other.kind()
                        ))),
                    }
                }
            }
        )*
    };
}

message_conversions!(
    DownlinkedPackets => DownlinkedPacketsMessage,
    DownlinkedPayloads => DownlinkedPayloadsMessage,
    UplinkPayloadsRequest => UplinkPayloadsRequestMessage,
    UplinkPacketRequest => UplinkPacketRequestMessage,
    XcvrControl => XcvrControlMessage,
    AppControl => AppControlMessage,
);
