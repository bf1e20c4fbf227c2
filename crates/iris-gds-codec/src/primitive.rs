//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Encode and decode catalog primitive types with explicit endianness."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Primitive codec. Every operation takes its [`Endianness`] explicitly;
//! Iris common packets use [`Endianness::NETWORK`].

use std::fmt;

use iris_gds_catalog::model::{enum_name, enum_value};
use iris_gds_catalog::{Argument, DataType, EnumItem, IntType, TelemetryChannel};
use serde::{Deserialize, Serialize};

use crate::{CodecError, Result};

/// Byte order of multi-byte primitives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Endianness {
    /// Most significant byte first.
    #[default]
    Big,
    /// Least significant byte first.
    Little,
}

impl Endianness {
    /// Network byte order.
    pub const NETWORK: Endianness = Endianness::Big;
}

/// In-process representation of a decoded primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// `BOOL`.
    Bool(bool),
    /// Signed integers.
    Int(i64),
    /// Unsigned integers.
    UInt(u64),
    /// `F32` and `F64`.
    Float(f64),
    /// Enum value and, when the catalog knows it, the item name.
    Enum {
        /// Raw wire value.
        value: i64,
        /// Item name, `None` for values the catalog does not list.
        name: Option<String>,
    },
    /// `STRING`.
    Text(String),
    /// `IRISBYTESTRING`.
    Bytes(Vec<u8>),
}

impl Value {
    /// Enum value resolved against `items`.
    pub fn enumerated(items: &[EnumItem], value: i64) -> Value {
        Value::Enum {
            value,
            name: enum_name(items, value).map(str::to_owned),
        }
    }

    /// Integer view of integral values (bools count as 0 and 1).
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Value::Bool(b) => Some(i128::from(*b)),
            Value::Int(v) => Some(i128::from(*v)),
            Value::UInt(v) => Some(i128::from(*v)),
            Value::Enum { value, .. } => Some(i128::from(*value)),
            _ => None,
        }
    }

    /// Floating point view of numeric values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Int(v) => Some(*v as f64),
            Value::UInt(v) => Some(*v as f64),
            Value::Enum { value, .. } => Some(*value as f64),
            _ => None,
        }
    }

    /// Boolean view: `Bool`, or an integer that is exactly 0 or 1.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Int(0) | Value::UInt(0) => Some(false),
            Value::Int(1) | Value::UInt(1) => Some(true),
            _ => None,
        }
    }

    /// Text view of strings and named enum values.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            Value::Enum { name: Some(name), .. } => Some(name),
            _ => None,
        }
    }

    /// Whether this is an enum value missing from the catalog.
    pub fn is_unknown_enum(&self) -> bool {
        matches!(self, Value::Enum { name: None, .. })
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::UInt(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Enum { name: Some(name), .. } => f.write_str(name),
            Value::Enum { value, name: None } => write!(f, "{value}"),
            Value::Text(s) => f.write_str(s),
            Value::Bytes(b) => write!(f, "0x{}", hex::encode(b)),
        }
    }
}

macro_rules! value_from {
    ($variant:ident as $inner:ty: $($t:ty),*) => {
        $(impl From<$t> for Value {
            fn from(v: $t) -> Self {
                Value::$variant(<$inner>::from(v))
            }
        })*
    };
}

value_from!(Int as i64: i8, i16, i32, i64);
value_from!(UInt as u64: u8, u16, u32, u64);
value_from!(Float as f64: f32, f64);
value_from!(Bool as bool: bool);
value_from!(Text as String: String, &str);
value_from!(Bytes as Vec<u8>: Vec<u8>, &[u8]);

/// Type information needed to encode one value: the wire type and, for
/// enums, the item list.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    /// Wire type.
    pub datatype: DataType,
    /// Enum items, empty for non-enum types.
    pub enum_items: &'a [EnumItem],
}

impl<'a> Field<'a> {
    /// Field with enum items.
    pub fn new(datatype: DataType, enum_items: &'a [EnumItem]) -> Self {
        Self {
            datatype,
            enum_items,
        }
    }

    /// Field of a non-enum type.
    pub fn plain(datatype: DataType) -> Field<'static> {
        Field {
            datatype,
            enum_items: &[],
        }
    }

    /// Same field with enums carried at `width` instead of their declared
    /// underlying type.
    pub fn with_enum_width(self, width: IntType) -> Self {
        match self.datatype {
            DataType::Enum { .. } => Self {
                datatype: DataType::Enum { underlying: width },
                ..self
            },
            _ => self,
        }
    }
}

impl<'a> From<&'a Argument> for Field<'a> {
    fn from(arg: &'a Argument) -> Self {
        Field::new(arg.datatype, &arg.enum_items)
    }
}

impl<'a> From<&'a TelemetryChannel> for Field<'a> {
    fn from(channel: &'a TelemetryChannel) -> Self {
        Field::new(channel.datatype, &channel.enum_items)
    }
}

/// Append the encoding of `value` as `field` to `out`.
pub fn encode(field: Field<'_>, value: &Value, endian: Endianness, out: &mut Vec<u8>) -> Result<()> {
    match field.datatype {
        DataType::Bool => {
            let b = value
                .as_bool()
                .ok_or_else(|| mismatch(&field.datatype, value))?;
            out.push(u8::from(b));
            Ok(())
        }
        DataType::Int(int) => {
            let v = value
                .as_i128()
                .ok_or_else(|| mismatch(&field.datatype, value))?;
            encode_int(int, v, endian, out)
        }
        DataType::F32 => {
            let v = value.as_f64().ok_or_else(|| mismatch(&field.datatype, value))?;
            if v.is_finite() && v.abs() > f64::from(f32::MAX) {
                return Err(CodecError::PrimitiveRange(format!("{v} does not fit F32")));
            }
            write_uint(u64::from((v as f32).to_bits()), 4, endian, out);
            Ok(())
        }
        DataType::F64 => {
            let v = value.as_f64().ok_or_else(|| mismatch(&field.datatype, value))?;
            write_uint(v.to_bits(), 8, endian, out);
            Ok(())
        }
        DataType::Enum { underlying } => {
            let raw = match value {
                Value::Text(name) => enum_value(field.enum_items, name)
                    .map(i128::from)
                    .ok_or_else(|| CodecError::PrimitiveRange(format!("unknown enum item `{name}`")))?,
                other => other
                    .as_i128()
                    .ok_or_else(|| mismatch(&field.datatype, value))?,
            };
            encode_int(underlying, raw, endian, out)
        }
        DataType::String { max_len, prefix } => {
            let text = match value {
                Value::Text(s) => s.as_str(),
                other => return Err(mismatch(&field.datatype, other)),
            };
            if text.len() > max_len {
                return Err(CodecError::PrimitiveRange(format!(
                    "string of {} bytes exceeds maximum {max_len}",
                    text.len()
                )));
            }
            if text.contains('\0') {
                return Err(CodecError::PrimitiveRange("string contains NUL".to_owned()));
            }
            encode_int(prefix, text.len() as i128, endian, out)?;
            out.extend_from_slice(text.as_bytes());
            Ok(())
        }
        DataType::IrisByteString { max_len } => {
            let bytes = match value {
                Value::Bytes(b) => b.as_slice(),
                Value::Text(s) => s.as_bytes(),
                other => return Err(mismatch(&field.datatype, other)),
            };
            if bytes.len() > max_len {
                return Err(CodecError::PrimitiveRange(format!(
                    "byte string of {} bytes exceeds maximum {max_len}",
                    bytes.len()
                )));
            }
            encode_int(IntType::U16, bytes.len() as i128, endian, out)?;
            out.extend_from_slice(bytes);
            Ok(())
        }
    }
}

/// Decode one `field` from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn decode(field: Field<'_>, bytes: &[u8], endian: Endianness) -> Result<(Value, usize)> {
    match field.datatype {
        DataType::Bool => match take(bytes, 1, "BOOL")? {
            [0x00] => Ok((Value::Bool(false), 1)),
            [0x01] => Ok((Value::Bool(true), 1)),
            [other, ..] => Err(CodecError::PrimitiveDecode(format!(
                "{other:#04x} is not a BOOL"
            ))),
            [] => Err(CodecError::PrimitiveDecode("empty BOOL".to_owned())),
        },
        DataType::Int(int) => {
            let (v, used) = decode_int(int, bytes, endian)?;
            Ok((int_value(int, v), used))
        }
        DataType::F32 => {
            let raw = read_uint(take(bytes, 4, "F32")?, endian);
            Ok((Value::Float(f64::from(f32::from_bits(raw as u32))), 4))
        }
        DataType::F64 => {
            let raw = read_uint(take(bytes, 8, "F64")?, endian);
            Ok((Value::Float(f64::from_bits(raw)), 8))
        }
        DataType::Enum { underlying } => {
            let (v, used) = decode_int(underlying, bytes, endian)?;
            let v = i64::try_from(v).map_err(|_| {
                CodecError::PrimitiveDecode(format!("enum value {v} does not fit i64"))
            })?;
            Ok((Value::enumerated(field.enum_items, v), used))
        }
        DataType::String { max_len, prefix } => {
            let (len, head) = decode_int(prefix, bytes, endian)?;
            let len = usize::try_from(len)
                .map_err(|_| CodecError::PrimitiveDecode(format!("bad string length {len}")))?;
            if len > max_len {
                return Err(CodecError::PrimitiveDecode(format!(
                    "string length {len} exceeds maximum {max_len}"
                )));
            }
            let body = take(&bytes[head..], len, "STRING body")?;
            let text = std::str::from_utf8(body)
                .map_err(|err| CodecError::PrimitiveDecode(format!("string is not UTF-8: {err}")))?;
            Ok((Value::Text(text.to_owned()), head + len))
        }
        DataType::IrisByteString { max_len } => {
            let (len, head) = decode_int(IntType::U16, bytes, endian)?;
            let len = len as usize;
            if len > max_len {
                return Err(CodecError::PrimitiveDecode(format!(
                    "byte string length {len} exceeds maximum {max_len}"
                )));
            }
            let body = take(&bytes[head..], len, "IRISBYTESTRING body")?;
            Ok((Value::Bytes(body.to_vec()), head + len))
        }
    }
}

/// Append `value` as an integer of type `int`.
pub fn encode_int(int: IntType, value: i128, endian: Endianness, out: &mut Vec<u8>) -> Result<()> {
    if !int.contains(value) {
        return Err(CodecError::PrimitiveRange(format!("{value} does not fit {int}")));
    }
    // Two's complement truncation is exact once the range check passed.
    write_uint(value as u64, int.size(), endian, out);
    Ok(())
}

/// Read an integer of type `int` from the front of `bytes`.
pub fn decode_int(int: IntType, bytes: &[u8], endian: Endianness) -> Result<(i128, usize)> {
    let size = int.size();
    let raw = read_uint(take(bytes, size, "integer")?, endian);
    let value = if int.is_signed() {
        let shift = 64 - 8 * size as u32;
        i128::from(((raw << shift) as i64) >> shift)
    } else {
        i128::from(raw)
    };
    Ok((value, size))
}

fn int_value(int: IntType, v: i128) -> Value {
    if int.is_signed() {
        Value::Int(v as i64)
    } else {
        Value::UInt(v as u64)
    }
}

fn write_uint(raw: u64, size: usize, endian: Endianness, out: &mut Vec<u8>) {
    match endian {
        Endianness::Big => out.extend_from_slice(&raw.to_be_bytes()[8 - size..]),
        Endianness::Little => out.extend_from_slice(&raw.to_le_bytes()[..size]),
    }
}

fn read_uint(bytes: &[u8], endian: Endianness) -> u64 {
    let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
    match endian {
        Endianness::Big => bytes.iter().fold(0, fold),
        Endianness::Little => bytes.iter().rev().fold(0, fold),
    }
}

fn take<'b>(bytes: &'b [u8], len: usize, what: &str) -> Result<&'b [u8]> {
    bytes.get(..len).ok_or_else(|| {
        CodecError::PrimitiveDecode(format!(
            "{what} needs {len} bytes, {} available",
            bytes.len()
        ))
    })
}

fn mismatch(datatype: &DataType, value: &Value) -> CodecError {
    CodecError::PrimitiveRange(format!("{value:?} cannot be encoded as {datatype}"))
}
