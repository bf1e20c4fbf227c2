//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Four-byte magic tags that introduce each payload in a VLP."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Payload kind tag inside an Iris common packet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Magic {
    /// Command for the rover flight computer.
    Command,
    /// Command for the watchdog MCU.
    WatchdogCommand,
    /// Telemetry channel value.
    Telemetry,
    /// Event record.
    Event,
    /// File block.
    File,
}

impl Magic {
    /// Size of a magic on the wire.
    pub const SIZE: usize = 4;

    /// Wire value.
    pub const fn value(self) -> u32 {
        match self {
            Magic::Command => 0x00BA_DA55,
            Magic::WatchdogCommand => 0xC000_FFEE,
            Magic::Telemetry => 0xC000_10FF,
            Magic::Event => 0x0DEA_DBAD,
            Magic::File => 0xDABA_D000,
        }
    }

    /// Magic carrying `value`, if any.
    pub fn from_value(value: u32) -> Option<Magic> {
        Magic::iter().find(|magic| magic.value() == value)
    }

    /// Whether payloads under this magic travel ground to rover.
    pub fn is_uplink(self) -> bool {
        matches!(self, Magic::Command | Magic::WatchdogCommand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_are_unique_and_reversible() {
        for magic in Magic::iter() {
            assert_eq!(Magic::from_value(magic.value()), Some(magic));
        }
        assert_eq!(Magic::from_value(0x1234_5678), None);
        assert_eq!(Magic::WatchdogCommand.to_string(), "WATCHDOG_COMMAND");
        assert!(Magic::Command.is_uplink());
        assert!(!Magic::File.is_uplink());
    }
}
