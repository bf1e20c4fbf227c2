//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Primitive flight-software data types declared by the catalog."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed-width integer kinds. Also used as enum underlying types and string
/// length-prefix widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntType {
    /// Signed 8-bit.
    I8,
    /// Signed 16-bit.
    I16,
    /// Signed 32-bit.
    I32,
    /// Signed 64-bit.
    I64,
    /// Unsigned 8-bit.
    U8,
    /// Unsigned 16-bit.
    U16,
    /// Unsigned 32-bit.
    U32,
    /// Unsigned 64-bit.
    U64,
}

impl IntType {
    /// Encoded size in bytes.
    pub fn size(self) -> usize {
        match self {
            IntType::I8 | IntType::U8 => 1,
            IntType::I16 | IntType::U16 => 2,
            IntType::I32 | IntType::U32 => 4,
            IntType::I64 | IntType::U64 => 8,
        }
    }

    /// Whether the type is two's-complement signed.
    pub fn is_signed(self) -> bool {
        matches!(self, IntType::I8 | IntType::I16 | IntType::I32 | IntType::I64)
    }

    /// Smallest representable value.
    pub fn min(self) -> i128 {
        match self {
            IntType::I8 => i8::MIN as i128,
            IntType::I16 => i16::MIN as i128,
            IntType::I32 => i32::MIN as i128,
            IntType::I64 => i64::MIN as i128,
            _ => 0,
        }
    }

    /// Largest representable value.
    pub fn max(self) -> i128 {
        match self {
            IntType::I8 => i8::MAX as i128,
            IntType::I16 => i16::MAX as i128,
            IntType::I32 => i32::MAX as i128,
            IntType::I64 => i64::MAX as i128,
            IntType::U8 => u8::MAX as i128,
            IntType::U16 => u16::MAX as i128,
            IntType::U32 => u32::MAX as i128,
            IntType::U64 => u64::MAX as i128,
        }
    }

    /// Whether `value` fits in this type.
    pub fn contains(self, value: i128) -> bool {
        value >= self.min() && value <= self.max()
    }

    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "I8" | "INT8" => IntType::I8,
            "I16" | "INT16" => IntType::I16,
            "I32" | "INT32" => IntType::I32,
            "I64" | "INT64" => IntType::I64,
            "U8" | "UINT8" => IntType::U8,
            "U16" | "UINT16" => IntType::U16,
            "U32" | "UINT32" => IntType::U32,
            "U64" | "UINT64" => IntType::U64,
            _ => return None,
        })
    }
}

impl fmt::Display for IntType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Canonical data type of a telemetry channel or argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// One byte, `0x01` or `0x00`.
    Bool,
    /// Fixed-width integer.
    Int(IntType),
    /// IEEE 754 binary32.
    F32,
    /// IEEE 754 binary64.
    F64,
    /// Enumeration serialized as its underlying integer.
    Enum {
        /// Integer width on the wire.
        underlying: IntType,
    },
    /// Length-prefixed UTF-8 without a terminator.
    String {
        /// Maximum number of content bytes.
        max_len: usize,
        /// Width of the length prefix.
        prefix: IntType,
    },
    /// Length-prefixed opaque bytes (`Fw::IrisCmdByteStringArg`).
    IrisByteString {
        /// Maximum number of content bytes.
        max_len: usize,
    },
}

/// Default enum underlying type.
pub const DEFAULT_ENUM_UNDERLYING: IntType = IntType::U32;
/// Default string length-prefix width.
pub const DEFAULT_STRING_PREFIX: IntType = IntType::U16;

impl DataType {
    /// Enum with the default underlying width.
    pub const ENUM: DataType = DataType::Enum {
        underlying: DEFAULT_ENUM_UNDERLYING,
    };

    /// Shorthand for a U16-prefixed string.
    pub const fn string(max_len: usize) -> DataType {
        DataType::String {
            max_len,
            prefix: DEFAULT_STRING_PREFIX,
        }
    }

    /// Fixed encoded size, `None` for variable-length types.
    pub fn fixed_size(&self) -> Option<usize> {
        match self {
            DataType::Bool => Some(1),
            DataType::Int(int) => Some(int.size()),
            DataType::F32 => Some(4),
            DataType::F64 => Some(8),
            DataType::Enum { underlying } => Some(underlying.size()),
            DataType::String { .. } | DataType::IrisByteString { .. } => None,
        }
    }

    /// Integer width backing this type, if any.
    pub fn int_type(&self) -> Option<IntType> {
        match self {
            DataType::Int(int) => Some(*int),
            DataType::Enum { underlying } => Some(*underlying),
            _ => None,
        }
    }

    /// Whether this is an enum.
    pub fn is_enum(&self) -> bool {
        matches!(self, DataType::Enum { .. })
    }

    /// Whether this is a string or byte-string.
    pub fn is_variable(&self) -> bool {
        self.fixed_size().is_none()
    }

    /// Parse an F Prime style type name (`U8`, `uint8_t`, `ENUM`,
    /// `STRING40`, `VARSTRING_255`, `VARSTRING_10K`, `IRISBYTESTRING134`,
    /// `string`). `size` supplies the maximum length for bare `string`.
    pub fn from_fprime(name: &str, size: Option<usize>) -> Option<DataType> {
        let upper = name.trim().to_ascii_uppercase();
        let upper = upper.strip_suffix("_T").unwrap_or(&upper);

        if let Some(int) = IntType::parse(upper) {
            return Some(DataType::Int(int));
        }
        match upper {
            "BOOL" | "BOOLEAN" => return Some(DataType::Bool),
            "F32" | "FLOAT" => return Some(DataType::F32),
            "F64" | "DOUBLE" => return Some(DataType::F64),
            "ENUM" => return Some(DataType::ENUM),
            "STRING" | "VARSTRING" => return size.map(DataType::string),
            "IRISBYTESTRING" => return size.map(|max_len| DataType::IrisByteString { max_len }),
            _ => {}
        }
        if let Some(rest) = upper.strip_prefix("IRISBYTESTRING") {
            return parse_len(rest).map(|max_len| DataType::IrisByteString { max_len });
        }
        if let Some(rest) = upper.strip_prefix("VARSTRING") {
            return parse_len(rest.trim_start_matches('_')).map(DataType::string);
        }
        if let Some(rest) = upper.strip_prefix("STRING") {
            return parse_len(rest).map(DataType::string);
        }
        None
    }
}

fn parse_len(text: &str) -> Option<usize> {
    if let Some(thousands) = text.strip_suffix('K') {
        return thousands.parse::<usize>().ok().map(|k| k * 1000);
    }
    text.parse().ok()
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataType::from_fprime(s, None).ok_or_else(|| format!("unknown data type `{s}`"))
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataType::Bool => write!(f, "BOOL"),
            DataType::Int(int) => write!(f, "{int}"),
            DataType::F32 => write!(f, "F32"),
            DataType::F64 => write!(f, "F64"),
            DataType::Enum { underlying } => write!(f, "ENUM({underlying})"),
            DataType::String { max_len, prefix } => write!(f, "STRING[{max_len};{prefix}]"),
            DataType::IrisByteString { max_len } => write!(f, "IRISBYTESTRING[{max_len}]"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fprime_names() {
        assert_eq!("U8".parse::<DataType>(), Ok(DataType::Int(IntType::U8)));
        assert_eq!("uint16_t".parse::<DataType>(), Ok(DataType::Int(IntType::U16)));
        assert_eq!("bool".parse::<DataType>(), Ok(DataType::Bool));
        assert_eq!("ENUM".parse::<DataType>(), Ok(DataType::ENUM));
        assert_eq!("STRING40".parse::<DataType>(), Ok(DataType::string(40)));
        assert_eq!("VARSTRING_255".parse::<DataType>(), Ok(DataType::string(255)));
        assert_eq!("VARSTRING_10K".parse::<DataType>(), Ok(DataType::string(10_000)));
        assert_eq!(
            "IRISBYTESTRING134".parse::<DataType>(),
            Ok(DataType::IrisByteString { max_len: 134 })
        );
        assert_eq!(DataType::from_fprime("string", Some(24)), Some(DataType::string(24)));
        assert!("string".parse::<DataType>().is_err());
        assert!("QUATERNION".parse::<DataType>().is_err());
    }

    #[test]
    fn integer_bounds() {
        assert!(IntType::U8.contains(255));
        assert!(!IntType::U8.contains(256));
        assert!(IntType::I16.contains(-32768));
        assert!(!IntType::I16.contains(-32769));
        assert_eq!(IntType::U64.max(), u64::MAX as i128);
        assert_eq!(DataType::ENUM.fixed_size(), Some(4));
        assert_eq!(DataType::string(10).fixed_size(), None);
    }
}
