//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "LSB-first bitfield packing and bitstream helpers."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Bitfields are packed LSB-first: the first field occupies the least
//! significant bits of the first byte and later fields continue upwards,
//! spilling into the following bytes.

use indexmap::IndexMap;
use iris_gds_catalog::BitfieldSpec;

use crate::{CodecError, Result};

/// Field names starting with this prefix may be omitted when packing.
pub const PADDING_PREFIX: &str = "PADDING";

/// Pack named field values into `spec.byte_len()` bytes.
pub fn pack(spec: &BitfieldSpec, values: &IndexMap<String, u64>) -> Result<Vec<u8>> {
    let byte_len = spec
        .byte_len()
        .ok_or_else(|| CodecError::PrimitiveRange("bitfield layout is not byte aligned".to_owned()))?;
    if let Some(unknown) = values
        .keys()
        .find(|name| !spec.fields.iter().any(|f| &f.name == *name))
    {
        return Err(CodecError::PrimitiveRange(format!("no bitfield named `{unknown}`")));
    }

    let mut out = vec![0u8; byte_len];
    let mut offset = 0;
    for field in &spec.fields {
        let value = match values.get(&field.name) {
            Some(v) => *v,
            None if field.name.starts_with(PADDING_PREFIX) => 0,
            None => {
                return Err(CodecError::PrimitiveRange(format!(
                    "bitfield `{}` has no value",
                    field.name
                )))
            }
        };
        let width = usize::from(field.width);
        if width < 64 && value >> width != 0 {
            return Err(CodecError::PrimitiveRange(format!(
                "{value} does not fit the {width}-bit field `{}`",
                field.name
            )));
        }
        insert_bits(&mut out, offset, width, value);
        offset += width;
    }
    Ok(out)
}

/// Unpack `bytes` into named field values. Extra trailing bytes are ignored.
pub fn unpack(spec: &BitfieldSpec, bytes: &[u8]) -> Result<IndexMap<String, u64>> {
    let needed = spec
        .byte_len()
        .ok_or_else(|| CodecError::PrimitiveDecode("bitfield layout is not byte aligned".to_owned()))?;
    if bytes.len() < needed {
        return Err(CodecError::PrimitiveDecode(format!(
            "bitfield needs {needed} bytes, {} available",
            bytes.len()
        )));
    }
    let mut offset = 0;
    let mut values = IndexMap::with_capacity(spec.fields.len());
    for field in &spec.fields {
        let width = usize::from(field.width);
        values.insert(field.name.clone(), extract_bits(bytes, offset, width));
        offset += width;
    }
    Ok(values)
}

/// Read `width` (at most 64) bits starting at bit `offset` of an LSB-first
/// stream. Bits past the end of `bytes` read as zero.
pub fn extract_bits(bytes: &[u8], offset: usize, width: usize) -> u64 {
    (0..width).fold(0u64, |acc, i| {
        let bit = offset + i;
        let set = bytes
            .get(bit / 8)
            .map_or(false, |byte| byte >> (bit % 8) & 1 == 1);
        acc | (u64::from(set) << i)
    })
}

/// Write the low `width` bits of `value` at bit `offset` of an LSB-first
/// stream. Bits that would land past the end of `bytes` are dropped.
pub fn insert_bits(bytes: &mut [u8], offset: usize, width: usize, value: u64) {
    for i in 0..width {
        let bit = offset + i;
        if let Some(byte) = bytes.get_mut(bit / 8) {
            let mask = 1u8 << (bit % 8);
            if value >> i & 1 == 1 {
                *byte |= mask;
            } else {
                *byte &= !mask;
            }
        }
    }
}

/// Reverse the bit order inside every byte.
pub fn reverse_bits_per_byte(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|b| b.reverse_bits()).collect()
}
