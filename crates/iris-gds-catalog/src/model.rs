//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Catalog entries: modules, commands, channels, events, enums, bitfields."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::datatype::DataType;
use crate::name_id::NameIdMap;

/// Free-form ground metadata parsed from an entry's `<comment>` CDATA.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// One `(name, value)` pair of an enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumItem {
    /// `UPPER_SNAKE_CASE` name.
    pub name: String,
    /// Wire value.
    pub value: i64,
    /// Description, possibly empty.
    #[serde(default)]
    pub comment: String,
}

impl EnumItem {
    /// Item without a comment.
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
            comment: String::new(),
        }
    }

    /// Item with a comment.
    pub fn with_comment(name: impl Into<String>, value: i64, comment: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            comment: comment.into(),
        }
    }
}

/// Look up the item carrying `value`.
pub fn enum_name(items: &[EnumItem], value: i64) -> Option<&str> {
    items
        .iter()
        .find(|item| item.value == value)
        .map(|item| item.name.as_str())
}

/// Look up the value bound to `name` (case-insensitive).
pub fn enum_value(items: &[EnumItem], name: &str) -> Option<i64> {
    items
        .iter()
        .find(|item| item.name.eq_ignore_ascii_case(name))
        .map(|item| item.value)
}

/// One named run of bits inside a [`BitfieldSpec`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitfieldField {
    /// Field name.
    pub name: String,
    /// Width in bits, at least one.
    pub width: u8,
}

/// Ordered bitfield layout. Widths must sum to a whole number of bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct BitfieldSpec {
    /// Fields, first field in the least significant bits.
    pub fields: Vec<BitfieldField>,
}

impl BitfieldSpec {
    /// Build from `(name, width)` pairs.
    pub fn new<N: Into<String>>(fields: impl IntoIterator<Item = (N, u8)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, width)| BitfieldField {
                    name: name.into(),
                    width,
                })
                .collect(),
        }
    }

    /// Sum of all field widths.
    pub fn total_bits(&self) -> usize {
        self.fields.iter().map(|f| usize::from(f.width)).sum()
    }

    /// Encoded size in bytes, `None` if the widths are not byte aligned or a
    /// field is zero bits wide.
    pub fn byte_len(&self) -> Option<usize> {
        let bits = self.total_bits();
        let aligned = bits % 8 == 0 && bits > 0;
        let widths_ok = self.fields.iter().all(|f| (1..=64).contains(&f.width));
        (aligned && widths_ok).then_some(bits / 8)
    }
}

/// Red/orange/yellow alarm limits for a channel.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RangeLimits {
    /// Red limit below nominal.
    pub low_red: Option<f64>,
    /// Orange limit below nominal.
    pub low_orange: Option<f64>,
    /// Yellow limit below nominal.
    pub low_yellow: Option<f64>,
    /// Yellow limit above nominal.
    pub high_yellow: Option<f64>,
    /// Orange limit above nominal.
    pub high_orange: Option<f64>,
    /// Red limit above nominal.
    pub high_red: Option<f64>,
}

impl RangeLimits {
    /// Whether no limit is set.
    pub fn is_empty(&self) -> bool {
        *self == RangeLimits::default()
    }
}

/// A command or event argument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Argument {
    /// `snake_case` name.
    pub name: String,
    /// Wire type.
    pub datatype: DataType,
    /// Enumeration items, non-empty only for enum types.
    #[serde(default)]
    pub enum_items: Vec<EnumItem>,
    /// Optional bitfield view of an integer argument.
    #[serde(default)]
    pub bitfields: Option<BitfieldSpec>,
    /// Ground metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Argument {
    /// Plain argument.
    pub fn new(name: impl Into<String>, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            datatype,
            enum_items: Vec::new(),
            bitfields: None,
            metadata: Metadata::new(),
        }
    }

    /// Enum argument.
    pub fn enumerated(name: impl Into<String>, items: Vec<EnumItem>) -> Self {
        Self {
            enum_items: items,
            ..Self::new(name, DataType::ENUM)
        }
    }
}

/// A command accepted by a module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// `{Module}_{Mnemonic}`.
    pub name: String,
    /// F Prime mnemonic, standardized.
    pub mnemonic: String,
    /// Low byte of the opcode.
    pub id: u8,
    /// Ordered arguments.
    pub args: Vec<Argument>,
    /// Ground metadata.
    #[serde(default)]
    pub metadata: Metadata,
    /// Comment text that did not parse as metadata.
    #[serde(default)]
    pub comment: Option<String>,
}

impl Command {
    /// Command without metadata.
    pub fn new(
        module_name: &str,
        mnemonic: impl Into<String>,
        id: u8,
        args: Vec<Argument>,
    ) -> Self {
        let mnemonic = mnemonic.into();
        Self {
            name: format!("{module_name}_{mnemonic}"),
            mnemonic,
            id,
            args,
            metadata: Metadata::new(),
            comment: None,
        }
    }

    /// Argument by name.
    pub fn arg(&self, name: &str) -> Option<&Argument> {
        self.args.iter().find(|a| a.name == name)
    }
}

/// A downlinked telemetry channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryChannel {
    /// Channel name, unique within the module.
    pub name: String,
    /// Channel ID within the module.
    pub id: u8,
    /// Wire type.
    pub datatype: DataType,
    /// Enumeration items, non-empty only for enum types.
    #[serde(default)]
    pub enum_items: Vec<EnumItem>,
    /// Optional bitfield view of an integer channel.
    #[serde(default)]
    pub bitfields: Option<BitfieldSpec>,
    /// printf-style display format.
    #[serde(default)]
    pub format_string: Option<String>,
    /// Alarm limits.
    #[serde(default)]
    pub limits: RangeLimits,
    /// Ground metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl TelemetryChannel {
    /// Plain channel.
    pub fn new(name: impl Into<String>, id: u8, datatype: DataType) -> Self {
        Self {
            name: name.into(),
            id,
            datatype,
            enum_items: Vec::new(),
            bitfields: None,
            format_string: None,
            limits: RangeLimits::default(),
            metadata: Metadata::new(),
        }
    }

    /// Enum channel with the default underlying width.
    pub fn enumerated(name: impl Into<String>, id: u8, items: Vec<EnumItem>) -> Self {
        Self {
            enum_items: items,
            ..Self::new(name, id, DataType::ENUM)
        }
    }
}

/// Event severity.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Developer diagnostics.
    Diagnostic,
    /// Routine low-priority activity.
    ActivityLo,
    /// Notable activity.
    ActivityHi,
    /// Minor anomaly.
    WarningLo,
    /// Serious anomaly.
    WarningHi,
    /// Command dispatch or completion.
    Command,
    /// Unrecoverable fault.
    Fatal,
}

/// A downlinked event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event name, unique within the module.
    pub name: String,
    /// Event ID within the module.
    pub id: u8,
    /// Severity.
    pub severity: Severity,
    /// printf-style format applied to the arguments.
    pub format_string: String,
    /// Ordered arguments.
    pub args: Vec<Argument>,
    /// Ground metadata.
    #[serde(default)]
    pub metadata: Metadata,
}

impl Event {
    /// Event without metadata.
    pub fn new(
        name: impl Into<String>,
        id: u8,
        severity: Severity,
        format_string: impl Into<String>,
        args: Vec<Argument>,
    ) -> Self {
        Self {
            name: name.into(),
            id,
            severity,
            format_string: format_string.into(),
            args,
            metadata: Metadata::new(),
        }
    }
}

/// A flight-software component or a ground-defined module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    /// Unique module name.
    pub name: String,
    /// Module ID; only the high byte is non-zero.
    pub id: u16,
    /// Commands keyed by low opcode byte and name.
    pub commands: NameIdMap<Command>,
    /// Channels keyed by ID and name.
    pub telemetry: NameIdMap<TelemetryChannel>,
    /// Events keyed by ID and name.
    pub events: NameIdMap<Event>,
    /// Whether this is a ground-computed MetaModule.
    #[serde(default)]
    pub is_meta: bool,
}

impl Module {
    /// Empty module.
    pub fn new(name: impl Into<String>, id: u16) -> Self {
        Self {
            name: name.into(),
            id,
            commands: NameIdMap::new(),
            telemetry: NameIdMap::new(),
            events: NameIdMap::new(),
            is_meta: false,
        }
    }

    /// High byte of the module ID, as sent in payload headers.
    pub fn id_hi(&self) -> u8 {
        (self.id >> 8) as u8
    }

    /// Global opcode of `command`.
    pub fn opcode(&self, command: &Command) -> u16 {
        self.id | u16::from(command.id)
    }

    /// `{Module}_{Channel}` name of one of this module's channels.
    pub fn qualified_name(&self, entry_name: &str) -> String {
        format!("{}_{}", self.name, entry_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitfield_alignment_is_checked() {
        let ok = BitfieldSpec::new([("a", 3u8), ("b", 5u8), ("c", 8u8)]);
        assert_eq!(ok.byte_len(), Some(2));
        let ragged = BitfieldSpec::new([("a", 3u8), ("b", 4u8)]);
        assert_eq!(ragged.byte_len(), None);
        let zero = BitfieldSpec::new([("a", 0u8), ("b", 8u8)]);
        assert_eq!(zero.byte_len(), None);
    }

    #[test]
    fn severity_round_trips_through_strings() {
        assert_eq!(Severity::ActivityHi.to_string(), "ACTIVITY_HI");
        assert_eq!("warning_lo".parse::<Severity>(), Ok(Severity::WarningLo));
        assert!("LOUD".parse::<Severity>().is_err());
    }

    #[test]
    fn opcode_combines_module_and_command_ids() {
        let module = Module::new("Navigation", 0x4A00);
        let command = Command::new("Navigation", "NavDriveForward", 0x01, vec![]);
        assert_eq!(module.opcode(&command), 0x4A01);
        assert_eq!(module.id_hi(), 0x4A);
        assert_eq!(command.name, "Navigation_NavDriveForward");
    }

    #[test]
    fn enum_helpers_find_items() {
        let items = vec![EnumItem::new("OFF", 0), EnumItem::new("ON", 1)];
        assert_eq!(enum_name(&items, 1), Some("ON"));
        assert_eq!(enum_value(&items, "off"), Some(0));
        assert_eq!(enum_name(&items, 7), None);
    }
}
