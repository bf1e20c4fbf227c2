//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Typed command, telemetry, event, and file-block payloads."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Payloads are the unit of meaning inside a packet. Each one is bound to a
//! catalog entry by numeric IDs, so encoding and decoding both need the
//! [`DataStandards`] it was built against.

use indexmap::IndexMap;
use iris_gds_catalog::model::enum_value;
use iris_gds_catalog::{Command, DataStandards, Event, IntType, Module, TelemetryChannel};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

use crate::format::printf;
use crate::magic::Magic;
use crate::metadata::{DataPathway, DataSource, DownlinkTimes, UplinkTimes};
use crate::primitive::{self, Endianness, Field, Value};
use crate::{CodecError, Result};

/// Payload variant, as used to index a [`crate::PayloadCollection`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayloadKind {
    /// Command for the flight computer.
    Command,
    /// Command for the watchdog.
    WatchdogCommand,
    /// Telemetry value.
    Telemetry,
    /// Event record.
    Event,
    /// File block.
    FileBlock,
}

/// Any payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Payload {
    /// See [`CommandPayload`].
    Command(CommandPayload),
    /// See [`TelemetryPayload`].
    Telemetry(TelemetryPayload),
    /// See [`EventPayload`].
    Event(EventPayload),
    /// See [`FileBlockPayload`].
    FileBlock(FileBlockPayload),
}

impl Payload {
    /// Collection index of this payload.
    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Command(c) if c.magic == Magic::WatchdogCommand => PayloadKind::WatchdogCommand,
            Payload::Command(_) => PayloadKind::Command,
            Payload::Telemetry(_) => PayloadKind::Telemetry,
            Payload::Event(_) => PayloadKind::Event,
            Payload::FileBlock(_) => PayloadKind::FileBlock,
        }
    }

    /// Magic that introduces this payload in a VLP.
    pub fn magic(&self) -> Magic {
        match self {
            Payload::Command(c) => c.magic,
            Payload::Telemetry(_) => Magic::Telemetry,
            Payload::Event(_) => Magic::Event,
            Payload::FileBlock(_) => Magic::File,
        }
    }

    /// Body bytes (without the magic).
    pub fn encode(&self, standards: &DataStandards, endian: Endianness) -> Result<Vec<u8>> {
        match self {
            Payload::Command(c) => c.encode(standards, endian),
            Payload::Telemetry(t) => t.encode(standards, endian),
            Payload::Event(e) => e.encode(standards, endian),
            Payload::FileBlock(f) => f.encode(endian),
        }
    }

    /// Decode the body that followed `magic`, returning the payload and the
    /// number of bytes consumed.
    pub fn decode(
        magic: Magic,
        bytes: &[u8],
        endian: Endianness,
        standards: &DataStandards,
    ) -> Result<(Payload, usize)> {
        match magic {
            Magic::Command | Magic::WatchdogCommand => {
                let (c, used) = CommandPayload::decode(magic, bytes, endian, standards)?;
                Ok((Payload::Command(c), used))
            }
            Magic::Telemetry => {
                let (t, used) = TelemetryPayload::decode(bytes, endian, standards)?;
                Ok((Payload::Telemetry(t), used))
            }
            Magic::Event => {
                let (e, used) = EventPayload::decode(bytes, endian, standards)?;
                Ok((Payload::Event(e), used))
            }
            Magic::File => {
                let (f, used) = FileBlockPayload::decode(bytes, endian)?;
                Ok((Payload::FileBlock(f), used))
            }
        }
    }

    /// Route this payload travelled.
    pub fn pathway(&self) -> DataPathway {
        match self {
            Payload::Command(c) => c.pathway,
            Payload::Telemetry(t) => t.pathway,
            Payload::Event(e) => e.pathway,
            Payload::FileBlock(f) => f.pathway,
        }
    }

    /// Origin of the bytes.
    pub fn source(&self) -> DataSource {
        match self {
            Payload::Command(c) => c.source,
            Payload::Telemetry(t) => t.source,
            Payload::Event(e) => e.source,
            Payload::FileBlock(f) => f.source,
        }
    }

    /// Set the pathway.
    pub fn set_pathway(&mut self, pathway: DataPathway) {
        match self {
            Payload::Command(c) => c.pathway = pathway,
            Payload::Telemetry(t) => t.pathway = pathway,
            Payload::Event(e) => e.pathway = pathway,
            Payload::FileBlock(f) => f.pathway = pathway,
        }
    }

    /// Set the source.
    pub fn set_source(&mut self, source: DataSource) {
        match self {
            Payload::Command(c) => c.source = source,
            Payload::Telemetry(t) => t.source = source,
            Payload::Event(e) => e.source = source,
            Payload::FileBlock(f) => f.source = source,
        }
    }

    /// Rover clock timestamp in ms, for payloads that carry one.
    pub fn timestamp(&self) -> Option<u32> {
        match self {
            Payload::Telemetry(t) => Some(t.timestamp),
            Payload::Event(e) => Some(e.timestamp),
            _ => None,
        }
    }

    /// Downlink times. Commands never carry them.
    pub fn downlink_times(&self) -> Option<&DownlinkTimes> {
        match self {
            Payload::Command(_) => None,
            Payload::Telemetry(t) => t.downlink_times.as_ref(),
            Payload::Event(e) => e.downlink_times.as_ref(),
            Payload::FileBlock(f) => f.downlink_times.as_ref(),
        }
    }

    /// Mutable downlink times, created empty when missing. `None` for
    /// commands.
    pub fn downlink_times_mut(&mut self) -> Option<&mut DownlinkTimes> {
        let slot = match self {
            Payload::Command(_) => return None,
            Payload::Telemetry(t) => &mut t.downlink_times,
            Payload::Event(e) => &mut e.downlink_times,
            Payload::FileBlock(f) => &mut f.downlink_times,
        };
        Some(slot.get_or_insert_with(DownlinkTimes::default))
    }
}

macro_rules! payload_from {
    ($($variant:ident($t:ty)),*) => {
        $(impl From<$t> for Payload {
            fn from(p: $t) -> Self {
                Payload::$variant(p)
            }
        })*
    };
}

payload_from!(
    Command(CommandPayload),
    Telemetry(TelemetryPayload),
    Event(EventPayload),
    FileBlock(FileBlockPayload)
);

fn payload_err(context: impl std::fmt::Display, err: CodecError) -> CodecError {
    match err {
        CodecError::PrimitiveDecode(msg) | CodecError::PrimitiveRange(msg) => {
            CodecError::PayloadDecode(format!("{context}: {msg}"))
        }
        other => other,
    }
}

fn short(what: &str, needed: usize, available: usize) -> CodecError {
    CodecError::PayloadDecode(format!(
        "{what} header needs {needed} bytes, {available} available"
    ))
}

const U32: IntType = IntType::U32;

/// A command bound to `(module, command)` with ordered arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPayload {
    /// Full 16-bit module ID.
    pub module_id: u16,
    /// Command ID within the module.
    pub command_id: u8,
    /// Argument values by name, in catalog order.
    pub args: IndexMap<String, Value>,
    /// `Command` or `WatchdogCommand`.
    pub magic: Magic,
    /// Route to the rover.
    #[serde(default)]
    pub pathway: DataPathway,
    /// Origin.
    #[serde(default)]
    pub source: DataSource,
    /// Operator-facing alias this command was requested under.
    #[serde(default)]
    pub alias_name: Option<String>,
    /// Ground-side uplink timestamps.
    #[serde(default)]
    pub uplink_times: Option<UplinkTimes>,
    /// Whether the AMCC acknowledged forwarding.
    #[serde(default)]
    pub amcc_ack: bool,
}

impl CommandPayload {
    const HEADER: usize = 2;

    /// Build a command by name (`Module_Command`, `Module.Command`, or a
    /// unique mnemonic). Every argument must be present and no extras are
    /// accepted.
    pub fn from_name(
        standards: &DataStandards,
        name: &str,
        args: IndexMap<String, Value>,
    ) -> Result<Self> {
        let (module, command) = standards
            .find_command(name)
            .ok_or_else(|| CodecError::PrimitiveRange(format!("no command named `{name}`")))?;
        if let Some(extra) = args.keys().find(|k| command.arg(k).is_none()) {
            return Err(CodecError::PrimitiveRange(format!(
                "command `{}` has no argument `{extra}`",
                command.name
            )));
        }
        let mut ordered = IndexMap::with_capacity(command.args.len());
        for arg in &command.args {
            let value = args.get(&arg.name).cloned().ok_or_else(|| {
                CodecError::PrimitiveRange(format!(
                    "command `{}` is missing argument `{}`",
                    command.name, arg.name
                ))
            })?;
            ordered.insert(arg.name.clone(), value);
        }
        Ok(Self {
            module_id: module.id,
            command_id: command.id,
            args: ordered,
            magic: Magic::Command,
            pathway: DataPathway::None,
            source: DataSource::Generated,
            alias_name: None,
            uplink_times: None,
            amcc_ack: false,
        })
    }

    /// Same command tagged for the watchdog.
    pub fn for_watchdog(mut self) -> Self {
        self.magic = Magic::WatchdogCommand;
        self
    }

    /// Global opcode.
    pub fn opcode(&self) -> u16 {
        (self.module_id & 0xFF00) | u16::from(self.command_id)
    }

    /// Catalog entries this payload refers to.
    pub fn command<'s>(&self, standards: &'s DataStandards) -> Option<(&'s Module, &'s Command)> {
        standards.command_by_opcode(self.opcode())
    }

    /// `Module_Command` name, if the catalog knows the opcode.
    pub fn name(&self, standards: &DataStandards) -> Option<String> {
        self.command(standards).map(|(_, c)| c.name.clone())
    }

    /// Header then the ordered argument bodies.
    pub fn encode(&self, standards: &DataStandards, endian: Endianness) -> Result<Vec<u8>> {
        let (_, command) = self.command(standards).ok_or_else(|| {
            CodecError::PrimitiveRange(format!("unknown command opcode {:#06x}", self.opcode()))
        })?;
        let mut out = vec![(self.module_id >> 8) as u8, self.command_id];
        for arg in &command.args {
            let value = self.args.get(&arg.name).ok_or_else(|| {
                CodecError::PrimitiveRange(format!(
                    "command `{}` is missing argument `{}`",
                    command.name, arg.name
                ))
            })?;
            let mut field = Field::from(arg);
            if self.magic == Magic::WatchdogCommand {
                field = field.with_enum_width(IntType::U8);
            }
            primitive::encode(field, value, endian, &mut out)?;
        }
        Ok(out)
    }

    /// Decode a command body.
    pub fn decode(
        magic: Magic,
        bytes: &[u8],
        endian: Endianness,
        standards: &DataStandards,
    ) -> Result<(Self, usize)> {
        let &[hi, id, ..] = bytes else {
            return Err(short("command", Self::HEADER, bytes.len()));
        };
        let opcode = u16::from(hi) << 8 | u16::from(id);
        let (module, command) = standards.command_by_opcode(opcode).ok_or_else(|| {
            CodecError::PayloadDecode(format!("unknown command opcode {opcode:#06x}"))
        })?;
        let mut used = Self::HEADER;
        let mut args = IndexMap::with_capacity(command.args.len());
        for arg in &command.args {
            let mut field = Field::from(arg);
            if magic == Magic::WatchdogCommand {
                field = field.with_enum_width(IntType::U8);
            }
            let (value, n) = primitive::decode(field, &bytes[used..], endian)
                .map_err(|e| payload_err(format!("{} argument `{}`", command.name, arg.name), e))?;
            used += n;
            args.insert(arg.name.clone(), value);
        }
        Ok((
            Self {
                module_id: module.id,
                command_id: command.id,
                args,
                magic,
                pathway: DataPathway::None,
                source: DataSource::Unknown,
                alias_name: None,
                uplink_times: None,
                amcc_ack: false,
            },
            used,
        ))
    }
}

/// One telemetry channel value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    /// Full 16-bit module ID.
    pub module_id: u16,
    /// Channel ID within the module.
    pub channel_id: u8,
    /// Decoded value.
    pub value: Value,
    /// Rover clock, ms.
    pub timestamp: u32,
    /// Ground-side downlink timestamps.
    #[serde(default)]
    pub downlink_times: Option<DownlinkTimes>,
    /// Route from the rover.
    #[serde(default)]
    pub pathway: DataPathway,
    /// Origin.
    #[serde(default)]
    pub source: DataSource,
    /// The value is an enum integer missing from the catalog.
    #[serde(default)]
    pub unknown_enum: bool,
}

impl TelemetryPayload {
    const HEADER: usize = 6;

    /// Payload for a channel identified by IDs.
    pub fn new(module_id: u16, channel_id: u8, value: Value, timestamp: u32) -> Self {
        let unknown_enum = value.is_unknown_enum();
        Self {
            module_id,
            channel_id,
            value,
            timestamp,
            downlink_times: None,
            pathway: DataPathway::None,
            source: DataSource::Unknown,
            unknown_enum,
        }
    }

    /// Payload for `Module_Channel`; enum values given as integers are
    /// resolved to their item names.
    pub fn for_channel(
        standards: &DataStandards,
        qualified: &str,
        value: impl Into<Value>,
        timestamp: u32,
    ) -> Result<Self> {
        let (module, channel) = standards
            .find_channel(qualified)
            .ok_or_else(|| CodecError::PrimitiveRange(format!("no channel named `{qualified}`")))?;
        let value = coerce(channel, value.into());
        Ok(Self::new(module.id, channel.id, value, timestamp))
    }

    /// Catalog entries this payload refers to.
    pub fn channel<'s>(
        &self,
        standards: &'s DataStandards,
    ) -> Option<(&'s Module, &'s TelemetryChannel)> {
        standards.channel((self.module_id >> 8) as u8, self.channel_id)
    }

    /// `Module_Channel` name, if known.
    pub fn name(&self, standards: &DataStandards) -> Option<String> {
        self.channel(standards)
            .map(|(m, c)| m.qualified_name(&c.name))
    }

    /// Header, timestamp, then the value.
    pub fn encode(&self, standards: &DataStandards, endian: Endianness) -> Result<Vec<u8>> {
        let (_, channel) = self.channel(standards).ok_or_else(|| {
            CodecError::PrimitiveRange(format!(
                "unknown channel {:#06x}:{:#04x}",
                self.module_id, self.channel_id
            ))
        })?;
        let mut out = vec![(self.module_id >> 8) as u8, self.channel_id];
        primitive::encode_int(U32, i128::from(self.timestamp), endian, &mut out)?;
        primitive::encode(Field::from(channel), &self.value, endian, &mut out)?;
        Ok(out)
    }

    /// Decode a telemetry body.
    pub fn decode(bytes: &[u8], endian: Endianness, standards: &DataStandards) -> Result<(Self, usize)> {
        if bytes.len() < Self::HEADER {
            return Err(short("telemetry", Self::HEADER, bytes.len()));
        }
        let (hi, id) = (bytes[0], bytes[1]);
        let (module, channel) = standards.channel(hi, id).ok_or_else(|| {
            CodecError::PayloadDecode(format!("unknown channel {hi:#04x}{id:02x}"))
        })?;
        let (timestamp, _) = primitive::decode_int(U32, &bytes[2..], endian)
            .map_err(|e| payload_err("telemetry timestamp", e))?;
        let (value, n) = primitive::decode(Field::from(channel), &bytes[Self::HEADER..], endian)
            .map_err(|e| payload_err(module.qualified_name(&channel.name), e))?;
        Ok((
            Self::new(module.id, channel.id, value, timestamp as u32),
            Self::HEADER + n,
        ))
    }
}

/// Integers and item names destined for enum channels become [`Value::Enum`].
fn coerce(channel: &TelemetryChannel, value: Value) -> Value {
    if !channel.datatype.is_enum() {
        return value;
    }
    let raw = match &value {
        Value::Int(_) | Value::UInt(_) => value.as_i128().map(|v| v as i64),
        Value::Text(name) => enum_value(&channel.enum_items, name),
        _ => None,
    };
    match raw {
        Some(v) => Value::enumerated(&channel.enum_items, v),
        None => value,
    }
}

/// One event occurrence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventPayload {
    /// Full 16-bit module ID.
    pub module_id: u16,
    /// Event ID within the module.
    pub event_id: u8,
    /// Argument values by name, in catalog order.
    pub args: IndexMap<String, Value>,
    /// Rover clock, ms.
    pub timestamp: u32,
    /// Ground-side downlink timestamps.
    #[serde(default)]
    pub downlink_times: Option<DownlinkTimes>,
    /// Route from the rover.
    #[serde(default)]
    pub pathway: DataPathway,
    /// Origin.
    #[serde(default)]
    pub source: DataSource,
    /// At least one enum argument is missing from the catalog.
    #[serde(default)]
    pub unknown_enum: bool,
}

impl EventPayload {
    const HEADER: usize = 6;

    /// Payload for an event identified by IDs.
    pub fn new(module_id: u16, event_id: u8, args: IndexMap<String, Value>, timestamp: u32) -> Self {
        let unknown_enum = args.values().any(Value::is_unknown_enum);
        Self {
            module_id,
            event_id,
            args,
            timestamp,
            downlink_times: None,
            pathway: DataPathway::None,
            source: DataSource::Unknown,
            unknown_enum,
        }
    }

    /// Payload for `Module_Event`. Arguments are matched by name and enum
    /// integers are resolved to item names; missing arguments fail.
    pub fn for_event(
        standards: &DataStandards,
        qualified: &str,
        args: IndexMap<String, Value>,
        timestamp: u32,
    ) -> Result<Self> {
        let (module, event) = standards
            .find_event(qualified)
            .ok_or_else(|| CodecError::PrimitiveRange(format!("no event named `{qualified}`")))?;
        let mut ordered = IndexMap::with_capacity(event.args.len());
        for arg in &event.args {
            let value = args.get(&arg.name).cloned().ok_or_else(|| {
                CodecError::PrimitiveRange(format!(
                    "event `{qualified}` is missing argument `{}`",
                    arg.name
                ))
            })?;
            let value = match (arg.datatype.is_enum(), value.as_i128()) {
                (true, Some(v)) if !matches!(value, Value::Enum { .. }) => {
                    Value::enumerated(&arg.enum_items, v as i64)
                }
                _ => value,
            };
            ordered.insert(arg.name.clone(), value);
        }
        Ok(Self::new(module.id, event.id, ordered, timestamp))
    }

    /// Catalog entries this payload refers to.
    pub fn event<'s>(&self, standards: &'s DataStandards) -> Option<(&'s Module, &'s Event)> {
        standards.event((self.module_id >> 8) as u8, self.event_id)
    }

    /// `Module_Event` name, if known.
    pub fn name(&self, standards: &DataStandards) -> Option<String> {
        self.event(standards).map(|(m, e)| m.qualified_name(&e.name))
    }

    /// The event's format string applied to the arguments.
    pub fn formatted_string(&self, standards: &DataStandards) -> String {
        let values: Vec<&Value> = self.args.values().collect();
        match self.event(standards) {
            Some((_, event)) => printf(&event.format_string, &values),
            None => format!(
                "unknown event {:#06x}:{:#04x} {:?}",
                self.module_id, self.event_id, self.args
            ),
        }
    }

    /// Header, timestamp, then the ordered arguments.
    pub fn encode(&self, standards: &DataStandards, endian: Endianness) -> Result<Vec<u8>> {
        let (_, event) = self.event(standards).ok_or_else(|| {
            CodecError::PrimitiveRange(format!(
                "unknown event {:#06x}:{:#04x}",
                self.module_id, self.event_id
            ))
        })?;
        let mut out = vec![(self.module_id >> 8) as u8, self.event_id];
        primitive::encode_int(U32, i128::from(self.timestamp), endian, &mut out)?;
        for arg in &event.args {
            let value = self.args.get(&arg.name).ok_or_else(|| {
                CodecError::PrimitiveRange(format!(
                    "event `{}` is missing argument `{}`",
                    event.name, arg.name
                ))
            })?;
            primitive::encode(Field::from(arg), value, endian, &mut out)?;
        }
        Ok(out)
    }

    /// Decode an event body.
    pub fn decode(bytes: &[u8], endian: Endianness, standards: &DataStandards) -> Result<(Self, usize)> {
        if bytes.len() < Self::HEADER {
            return Err(short("event", Self::HEADER, bytes.len()));
        }
        let (hi, id) = (bytes[0], bytes[1]);
        let (module, event) = standards
            .event(hi, id)
            .ok_or_else(|| CodecError::PayloadDecode(format!("unknown event {hi:#04x}{id:02x}")))?;
        let (timestamp, _) = primitive::decode_int(U32, &bytes[2..], endian)
            .map_err(|e| payload_err("event timestamp", e))?;
        let mut used = Self::HEADER;
        let mut args = IndexMap::with_capacity(event.args.len());
        for arg in &event.args {
            let (value, n) = primitive::decode(Field::from(arg), &bytes[used..], endian)
                .map_err(|e| payload_err(format!("{} argument `{}`", event.name, arg.name), e))?;
            used += n;
            args.insert(arg.name.clone(), value);
        }
        Ok((Self::new(module.id, event.id, args, timestamp as u32), used))
    }
}

/// Contents of block 0 of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Callback ID of the command that produced the file.
    pub callback_id: u16,
    /// Rover clock at file creation, ms.
    pub timestamp: u32,
}

/// One block of a downlinked file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileBlockPayload {
    /// Hash identifying the file.
    pub hashed_id: u16,
    /// Number of data blocks in the file.
    pub total_blocks: u8,
    /// Block index; 0 is the metadata block.
    pub block_number: u8,
    /// Length announced in the header.
    pub block_len: u16,
    /// Block bytes actually present.
    pub data: Vec<u8>,
    /// Header and body disagree, but the bytes were kept.
    #[serde(default)]
    pub possible_corruption: bool,
    /// Ground-side downlink timestamps.
    #[serde(default)]
    pub downlink_times: Option<DownlinkTimes>,
    /// Route from the rover.
    #[serde(default)]
    pub pathway: DataPathway,
    /// Origin.
    #[serde(default)]
    pub source: DataSource,
}

impl FileBlockPayload {
    const HEADER: usize = 6;

    /// Well-formed block carrying `data`.
    pub fn new(hashed_id: u16, total_blocks: u8, block_number: u8, data: Vec<u8>) -> Self {
        Self {
            hashed_id,
            total_blocks,
            block_number,
            block_len: data.len().min(usize::from(u16::MAX)) as u16,
            possible_corruption: block_number > total_blocks,
            data,
            downlink_times: None,
            pathway: DataPathway::None,
            source: DataSource::Unknown,
        }
    }

    /// Metadata block for a file.
    pub fn metadata_block(hashed_id: u16, total_blocks: u8, meta: FileMetadata, endian: Endianness) -> Self {
        let mut data = Vec::with_capacity(6);
        match endian {
            Endianness::Big => {
                data.extend_from_slice(&meta.callback_id.to_be_bytes());
                data.extend_from_slice(&meta.timestamp.to_be_bytes());
            }
            Endianness::Little => {
                data.extend_from_slice(&meta.callback_id.to_le_bytes());
                data.extend_from_slice(&meta.timestamp.to_le_bytes());
            }
        }
        Self::new(hashed_id, total_blocks, 0, data)
    }

    /// Metadata carried by block 0, if this is block 0 and long enough.
    pub fn metadata(&self, endian: Endianness) -> Option<FileMetadata> {
        if self.block_number != 0 {
            return None;
        }
        let (callback_id, _) = primitive::decode_int(IntType::U16, &self.data, endian).ok()?;
        let (timestamp, _) = primitive::decode_int(U32, self.data.get(2..)?, endian).ok()?;
        Some(FileMetadata {
            callback_id: callback_id as u16,
            timestamp: timestamp as u32,
        })
    }

    /// Header then data. `block_len` is rewritten from the data length.
    pub fn encode(&self, endian: Endianness) -> Result<Vec<u8>> {
        let len = u16::try_from(self.data.len()).map_err(|_| {
            CodecError::PrimitiveRange(format!("file block of {} bytes is too long", self.data.len()))
        })?;
        let mut out = Vec::with_capacity(Self::HEADER + self.data.len());
        primitive::encode_int(IntType::U16, i128::from(self.hashed_id), endian, &mut out)?;
        out.push(self.total_blocks);
        out.push(self.block_number);
        primitive::encode_int(IntType::U16, i128::from(len), endian, &mut out)?;
        out.extend_from_slice(&self.data);
        Ok(out)
    }

    /// Decode a file block. A short body is kept and flagged instead of
    /// failing.
    pub fn decode(bytes: &[u8], endian: Endianness) -> Result<(Self, usize)> {
        if bytes.len() < Self::HEADER {
            return Err(short("file block", Self::HEADER, bytes.len()));
        }
        let (hashed_id, _) =
            primitive::decode_int(IntType::U16, bytes, endian).map_err(|e| payload_err("file block", e))?;
        let (block_len, _) = primitive::decode_int(IntType::U16, &bytes[4..], endian)
            .map_err(|e| payload_err("file block", e))?;
        let (total_blocks, block_number) = (bytes[2], bytes[3]);
        let available = bytes.len() - Self::HEADER;
        let take = (block_len as usize).min(available);
        let block = Self {
            hashed_id: hashed_id as u16,
            total_blocks,
            block_number,
            block_len: block_len as u16,
            data: bytes[Self::HEADER..Self::HEADER + take].to_vec(),
            possible_corruption: take < block_len as usize || block_number > total_blocks,
            downlink_times: None,
            pathway: DataPathway::None,
            source: DataSource::Unknown,
        };
        Ok((block, Self::HEADER + take))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iris_gds_catalog::fixtures;

    fn drive_args(distance: u64) -> IndexMap<String, Value> {
        let mut args = IndexMap::new();
        args.insert("distance".to_owned(), Value::UInt(distance));
        args.insert("speed".to_owned(), Value::UInt(100));
        args.insert("callback_id".to_owned(), Value::UInt(0xBEEF));
        args
    }

    #[test]
    fn command_encodes_header_then_arguments() {
        let standards = fixtures::standards();
        let cmd = CommandPayload::from_name(&standards, "Navigation_NavDriveForward", drive_args(200))
            .expect("command");
        let bytes = cmd.encode(&standards, Endianness::NETWORK).expect("encode");
        assert_eq!(bytes, vec![0x4A, 0x00, 200, 100, 0xBE, 0xEF]);

        let (decoded, used) =
            CommandPayload::decode(Magic::Command, &bytes, Endianness::NETWORK, &standards).expect("decode");
        assert_eq!(used, bytes.len());
        assert_eq!(decoded.args, cmd.args);
        assert_eq!(decoded.name(&standards).as_deref(), Some("Navigation_NavDriveForward"));
    }

    #[test]
    fn missing_argument_is_a_range_error() {
        let standards = fixtures::standards();
        let mut args = drive_args(1);
        args.shift_remove("speed");
        assert!(matches!(
            CommandPayload::from_name(&standards, "Navigation_NavDriveForward", args),
            Err(CodecError::PrimitiveRange(_))
        ));
    }

    #[test]
    fn telemetry_round_trips_with_timestamp() {
        let standards = fixtures::standards();
        let tlm = TelemetryPayload::for_channel(&standards, "WatchdogHeartbeat_ChargeRaw", 42u8, 1234)
            .expect("channel");
        let bytes = tlm.encode(&standards, Endianness::NETWORK).expect("encode");
        assert_eq!(bytes, vec![0xFB, 0x10, 0, 0, 0x04, 0xD2, 42]);
        let (decoded, used) = TelemetryPayload::decode(&bytes, Endianness::NETWORK, &standards).expect("decode");
        assert_eq!(used, 7);
        assert_eq!(decoded, tlm);
    }

    #[test]
    fn unknown_enum_values_are_flagged() {
        let standards = fixtures::standards();
        let tlm = TelemetryPayload::for_channel(&standards, "WatchdogCommandResponse_ErrorFlag", 77u8, 0)
            .expect("channel");
        let bytes = tlm.encode(&standards, Endianness::NETWORK).expect("encode");
        let (decoded, _) = TelemetryPayload::decode(&bytes, Endianness::NETWORK, &standards).expect("decode");
        assert!(decoded.unknown_enum);
        assert_eq!(decoded.value.as_i128(), Some(77));
    }

    #[test]
    fn unknown_channel_fails_payload_decode() {
        let standards = fixtures::standards();
        let err = TelemetryPayload::decode(&[0x01, 0x02, 0, 0, 0, 0, 0], Endianness::NETWORK, &standards)
            .expect_err("unknown");
        assert!(matches!(err, CodecError::PayloadDecode(_)));
    }

    #[test]
    fn events_format_their_arguments() {
        let standards = fixtures::standards();
        let mut args = IndexMap::new();
        args.insert("memory_address".to_owned(), Value::UInt(0xBEEF));
        args.insert("exception_type".to_owned(), Value::UInt(3));
        let event = EventPayload::for_event(
            &standards,
            "RadioGround_CriticalResetDueToSoftwareException",
            args,
            9,
        )
        .expect("event");
        assert!(event
            .formatted_string(&standards)
            .ends_with("memory address: 0xBEEF and has numerical type: 3."));
        let bytes = event.encode(&standards, Endianness::NETWORK).expect("encode");
        let (decoded, used) = EventPayload::decode(&bytes, Endianness::NETWORK, &standards).expect("decode");
        assert_eq!(used, bytes.len());
        assert_eq!(decoded, event);
    }

    #[test]
    fn short_file_blocks_are_kept_and_flagged() {
        let mut bytes = FileBlockPayload::new(0xABCD, 3, 1, vec![1, 2, 3, 4])
            .encode(Endianness::NETWORK)
            .expect("encode");
        bytes.truncate(bytes.len() - 2);
        let (block, used) = FileBlockPayload::decode(&bytes, Endianness::NETWORK).expect("decode");
        assert_eq!(used, bytes.len());
        assert_eq!(block.data, vec![1, 2]);
        assert_eq!(block.block_len, 4);
        assert!(block.possible_corruption);
    }

    #[test]
    fn metadata_block_carries_callback_and_timestamp() {
        let meta = FileMetadata {
            callback_id: 0xBEEF,
            timestamp: 77,
        };
        let block = FileBlockPayload::metadata_block(1, 2, meta, Endianness::NETWORK);
        assert_eq!(block.metadata(Endianness::NETWORK), Some(meta));
        assert!(!block.possible_corruption);
        assert!(FileBlockPayload::new(1, 2, 3, vec![]).possible_corruption);
    }
}
