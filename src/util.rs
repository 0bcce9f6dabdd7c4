//! Little-endian accessors for fields embedded in on-disk records.
//!
//! PANICS: every function panics if the field does not fit into `bytes` at `offset`.

use std::convert::TryInto;

pub fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(field(bytes, offset))
}

pub fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(field(bytes, offset))
}

pub fn write_u16_le(bytes: &mut [u8], offset: usize, value: u16) {
    bytes[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn write_u32_le(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn field<const N: usize>(bytes: &[u8], offset: usize) -> [u8; N] {
    // the slice has exactly N bytes, so the conversion cannot fail
    bytes[offset..offset + N].try_into().unwrap_or([0; N])
}
