//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Fixed TCP ports of the IPC channels."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Each logical channel has a publisher-side port and a subscriber-side
//! port so a proxy can sit between them. Publishers always use the pub
//! side, subscribers the sub side; either end may bind.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Which half of a channel a port serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PortSide {
    /// Publishers send here.
    Pub,
    /// Subscribers receive here.
    Sub,
}

/// Well-known ports of the bus.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[repr(u16)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum Port {
    /// Transceivers publish downlink here.
    TransceiverPub = 9000,
    /// Downlink consumers subscribe here.
    TransceiverSub = 9001,
    /// Processors publish here.
    ProcessorsPub = 9002,
    /// Consumers of processed data subscribe here.
    ProcessorsSub = 9003,
    /// GUI backends publish here.
    GuiPub = 9004,
    /// GUI backends subscribe here.
    GuiSub = 9005,
    /// General-purpose channel, publisher side.
    MainPub = 9006,
    /// General-purpose channel, subscriber side.
    MainSub = 9007,
}

impl Port {
    /// TCP port number.
    pub const fn number(self) -> u16 {
        self as u16
    }

    /// Half of the channel this port serves.
    pub const fn side(self) -> PortSide {
        if self.number() % 2 == 0 {
            PortSide::Pub
        } else {
            PortSide::Sub
        }
    }

    /// The other port of the same channel.
    pub const fn counterpart(self) -> Port {
        match self {
            Port::TransceiverPub => Port::TransceiverSub,
            Port::TransceiverSub => Port::TransceiverPub,
            Port::ProcessorsPub => Port::ProcessorsSub,
            Port::ProcessorsSub => Port::ProcessorsPub,
            Port::GuiPub => Port::GuiSub,
            Port::GuiSub => Port::GuiPub,
            Port::MainPub => Port::MainSub,
            Port::MainSub => Port::MainPub,
        }
    }

    /// Port with the given number.
    pub fn from_number(number: u16) -> Option<Port> {
        Port::iter().find(|p| p.number() == number)
    }
}
