//! Low-level helpers for binary data processing.
//!
//! This module provides:
//! - Endian-aware unaligned reads (using byteorder for optimal codegen)
//! - SIMD-accelerated NUL searches (via memchr)
//! - ULEB128 decoding
//! - Formatting for packed Mach-O version numbers
//!
//! The scalar readers here panic on short input. Callers go through
//! [`crate::reader::BoundedReader`], which validates lengths first.

use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use serde::Serialize;

// =============================================================================
// Byte Order
// =============================================================================

/// Byte order of multi-byte fields in a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Endian {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
}

impl Endian {
    /// Byte order of the machine running this code.
    #[inline(always)]
    pub const fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endian::Big
        } else {
            Endian::Little
        }
    }

    /// Returns true if values in this order can be used without swapping.
    #[inline(always)]
    pub fn is_native(self) -> bool {
        self == Self::native()
    }

    /// Reads a u16 in this byte order.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 2`.
    #[inline(always)]
    pub fn read_u16(self, data: &[u8]) -> u16 {
        match self {
            Endian::Little => LittleEndian::read_u16(data),
            Endian::Big => BigEndian::read_u16(data),
        }
    }

    /// Reads a u32 in this byte order.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 4`.
    #[inline(always)]
    pub fn read_u32(self, data: &[u8]) -> u32 {
        match self {
            Endian::Little => LittleEndian::read_u32(data),
            Endian::Big => BigEndian::read_u32(data),
        }
    }

    /// Reads a u64 in this byte order.
    ///
    /// # Panics
    ///
    /// Panics if `data.len() < 8`.
    #[inline(always)]
    pub fn read_u64(self, data: &[u8]) -> u64 {
        match self {
            Endian::Little => LittleEndian::read_u64(data),
            Endian::Big => BigEndian::read_u64(data),
        }
    }
}

impl fmt::Display for Endian {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endian::Little => write!(f, "little-endian"),
            Endian::Big => write!(f, "big-endian"),
        }
    }
}

// =============================================================================
// NUL-terminated strings
// =============================================================================

/// Finds the position of the first null byte in a slice, or its length.
#[inline(always)]
pub fn memchr_null(data: &[u8]) -> usize {
    memchr::memchr(0, data).unwrap_or(data.len())
}

/// Decodes bytes up to the first NUL (or the end of the slice) as a string.
///
/// Invalid UTF-8 is replaced rather than rejected; symbol and path names in
/// hostile files are not guaranteed to be text.
#[inline]
pub fn cstr_lossy(data: &[u8]) -> String {
    String::from_utf8_lossy(&data[..memchr_null(data)]).into_owned()
}

/// Decodes a fixed-width, NUL-padded name field (segment and section names).
#[inline]
pub fn fixed_name(raw: &[u8; 16]) -> String {
    cstr_lossy(raw)
}

// =============================================================================
// ULEB128
// =============================================================================

/// Reads an unsigned LEB128 value with fast paths for common cases.
///
/// - 1-byte values (0-127): single comparison, no loop
/// - 2-byte values (128-16383): two comparisons, no loop
/// - Larger values: fall back to loop
///
/// # Returns
///
/// `(value, bytes_consumed)` or `None` if truncated or wider than 64 bits.
#[inline(always)]
pub fn read_uleb128(data: &[u8]) -> Option<(u64, usize)> {
    let b0 = *data.first()?;
    if b0 < 0x80 {
        return Some((b0 as u64, 1));
    }

    let b1 = *data.get(1)?;
    if b1 < 0x80 {
        let value = ((b0 & 0x7F) as u64) | ((b1 as u64) << 7);
        return Some((value, 2));
    }

    let mut result: u64 = 0;
    let mut shift = 0u32;

    for (i, &byte) in data.iter().enumerate() {
        let low = (byte & 0x7F) as u64;
        // The tenth byte may only carry bit 63
        if shift >= 64 || (shift == 63 && low > 1) {
            return None;
        }

        result |= low << shift;
        shift += 7;

        if byte < 0x80 {
            return Some((result, i + 1));
        }
    }

    None
}

// =============================================================================
// Hex
// =============================================================================

/// Encodes bytes as lowercase hex.
pub fn hex_encode(data: &[u8]) -> String {
    use fmt::Write;

    let mut out = String::with_capacity(data.len() * 2);
    for b in data {
        // Writing to a String cannot fail
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Formats a 16-byte UUID in the canonical 8-4-4-4-12 form.
pub fn format_uuid(uuid: &[u8; 16]) -> String {
    format!(
        "{}-{}-{}-{}-{}",
        hex_encode(&uuid[0..4]),
        hex_encode(&uuid[4..6]),
        hex_encode(&uuid[6..8]),
        hex_encode(&uuid[8..10]),
        hex_encode(&uuid[10..16])
    )
    .to_uppercase()
}

// =============================================================================
// Packed Versions
// =============================================================================

/// A `major.minor.patch` version packed as `xxxx.yy.zz` in a u32.
///
/// Used by dylib, version-min and build-version commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct PackedVersion(pub u32);

impl PackedVersion {
    /// Major component (upper 16 bits).
    #[inline]
    pub const fn major(self) -> u16 {
        (self.0 >> 16) as u16
    }

    /// Minor component (bits 8..16).
    #[inline]
    pub const fn minor(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Patch component (low 8 bits).
    #[inline]
    pub const fn patch(self) -> u8 {
        self.0 as u8
    }
}

impl fmt::Display for PackedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major(), self.minor(), self.patch())
    }
}

impl Serialize for PackedVersion {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Formats an `LC_SOURCE_VERSION` value, packed as `a24.b10.c10.d10.e10`.
pub fn format_source_version(version: u64) -> String {
    let a = version >> 40;
    let b = (version >> 30) & 0x3FF;
    let c = (version >> 20) & 0x3FF;
    let d = (version >> 10) & 0x3FF;
    let e = version & 0x3FF;
    format!("{a}.{b}.{c}.{d}.{e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endian_reads() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(Endian::Little.read_u32(&data), 0x04030201);
        assert_eq!(Endian::Big.read_u32(&data), 0x01020304);
        assert_eq!(Endian::Little.read_u64(&data), 0x0807060504030201);
        assert_eq!(Endian::Big.read_u16(&data), 0x0102);
    }

    #[test]
    fn test_memchr_null() {
        assert_eq!(memchr_null(b"hello\0world"), 5);
        assert_eq!(memchr_null(b"\0"), 0);
        assert_eq!(memchr_null(b"hello"), 5);
    }

    #[test]
    fn test_fixed_name_without_terminator() {
        assert_eq!(fixed_name(b"__TEXT\0\0\0\0\0\0\0\0\0\0"), "__TEXT");
        assert_eq!(fixed_name(b"0123456789abcdef"), "0123456789abcdef");
    }

    #[test]
    fn test_uleb128() {
        assert_eq!(read_uleb128(&[]), None);
        assert_eq!(read_uleb128(&[0x00]), Some((0, 1)));
        assert_eq!(read_uleb128(&[0x7F]), Some((127, 1)));
        assert_eq!(read_uleb128(&[0x80, 0x01]), Some((128, 2)));
        assert_eq!(read_uleb128(&[0x80]), None);
        assert_eq!(read_uleb128(&[0xE5, 0x8E, 0x26]), Some((624485, 3)));
        assert_eq!(read_uleb128(&[0xFF; 11]), None);
    }

    #[test]
    fn test_uleb128_64bit_boundary() {
        let mut max = [0xFF; 10];
        max[9] = 0x01;
        assert_eq!(read_uleb128(&max), Some((u64::MAX, 10)));

        // Bits past 63 in the last byte
        let mut wide = [0xFF; 10];
        wide[9] = 0x02;
        assert_eq!(read_uleb128(&wide), None);
        wide[9] = 0x7F;
        assert_eq!(read_uleb128(&wide), None);
    }

    #[test]
    fn test_packed_version() {
        let v = PackedVersion(0x0501_0203);
        assert_eq!(v.to_string(), "1281.2.3");
        assert_eq!(PackedVersion(0x000A_0F00).to_string(), "10.15.0");
    }

    #[test]
    fn test_source_version() {
        let v: u64 = (1234 << 40) | (5 << 30) | (6 << 20) | (7 << 10) | 8;
        assert_eq!(format_source_version(v), "1234.5.6.7.8");
    }

    #[test]
    fn test_uuid() {
        let uuid = [
            0x12, 0x34, 0x56, 0x78, 0x9a, 0xbc, 0xde, 0xf0, 0x01, 0x23, 0x45, 0x67, 0x89, 0xab,
            0xcd, 0xef,
        ];
        assert_eq!(format_uuid(&uuid), "12345678-9ABC-DEF0-0123-456789ABCDEF");
    }
}
