//! Dynamic library references.

use std::fmt;

use serde::Serialize;

use super::constants::*;
use super::structs::{DylibCommand, PathCommand};
use crate::error::{Error, Result};
use crate::reader::BoundedReader;
use crate::util::{Endian, PackedVersion};

/// How a dylib command refers to its library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DylibKind {
    /// `LC_LOAD_DYLIB`
    Load,
    /// `LC_LOAD_WEAK_DYLIB`
    Weak,
    /// `LC_REEXPORT_DYLIB`
    Reexport,
    /// `LC_LOAD_UPWARD_DYLIB`
    Upward,
    /// `LC_LAZY_LOAD_DYLIB`
    Lazy,
    /// `LC_ID_DYLIB`: the image's own install name
    Id,
}

impl DylibKind {
    /// Maps a load command to its dylib kind.
    pub fn from_cmd(cmd: u32) -> Option<Self> {
        match cmd {
            LC_LOAD_DYLIB => Some(DylibKind::Load),
            LC_LOAD_WEAK_DYLIB => Some(DylibKind::Weak),
            LC_REEXPORT_DYLIB => Some(DylibKind::Reexport),
            LC_LOAD_UPWARD_DYLIB => Some(DylibKind::Upward),
            LC_LAZY_LOAD_DYLIB => Some(DylibKind::Lazy),
            LC_ID_DYLIB => Some(DylibKind::Id),
            _ => None,
        }
    }
}

impl fmt::Display for DylibKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DylibKind::Load => "load",
            DylibKind::Weak => "weak",
            DylibKind::Reexport => "reexport",
            DylibKind::Upward => "upward",
            DylibKind::Lazy => "lazy",
            DylibKind::Id => "id",
        };
        f.pad(s)
    }
}

/// A dylib named by a load command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dylib {
    pub kind: DylibKind,
    /// Install name
    pub name: String,
    pub timestamp: u32,
    pub current_version: PackedVersion,
    pub compatibility_version: PackedVersion,
}

impl Dylib {
    /// Decodes a dylib command spanning exactly `cmdsize` bytes.
    pub fn parse(kind: DylibKind, command: &BoundedReader<'_>, endian: Endian) -> Result<Self> {
        let raw: DylibCommand = command.read_struct(0, endian)?;
        let name = inline_string(command, raw.name_offset, DylibCommand::SIZE)?;

        Ok(Self {
            kind,
            name,
            timestamp: raw.timestamp,
            current_version: PackedVersion(raw.current_version),
            compatibility_version: PackedVersion(raw.compatibility_version),
        })
    }

    /// Returns true if this is a library the image links against.
    #[inline]
    pub fn is_linked(&self) -> bool {
        self.kind != DylibKind::Id
    }

    /// Last path component of the install name.
    pub fn basename(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Reads the path of a single-path command (`LC_LOAD_DYLINKER`, `LC_RPATH`).
pub(crate) fn parse_path_command(command: &BoundedReader<'_>, endian: Endian) -> Result<String> {
    let raw: PathCommand = command.read_struct(0, endian)?;
    inline_string(command, raw.path_offset, PathCommand::SIZE)
}

/// Reads a string stored inside a load command at `offset`.
///
/// The offset must point past the fixed part of the command and before its
/// end. The string stops at the first NUL or at the end of the command.
pub(crate) fn inline_string(
    command: &BoundedReader<'_>,
    offset: u32,
    fixed_size: usize,
) -> Result<String> {
    let offset = offset as u64;
    if offset < fixed_size as u64 || offset >= command.len() {
        return Err(Error::malformed(
            command.base(),
            format!(
                "string offset {offset} outside command body {fixed_size}..{}",
                command.len()
            ),
        ));
    }
    command.cstr_at(offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use zerocopy::IntoBytes;

    fn dylib_command(name: &str, name_offset: u32) -> Vec<u8> {
        let padded = (name.len() + 1 + 7) & !7;
        let raw = DylibCommand {
            cmd: LC_LOAD_DYLIB,
            cmdsize: (DylibCommand::SIZE + padded) as u32,
            name_offset,
            timestamp: 2,
            current_version: 0x0501_0000,
            compatibility_version: 0x0001_0000,
        };
        let mut data = raw.as_bytes().to_vec();
        data.extend_from_slice(name.as_bytes());
        data.resize(DylibCommand::SIZE + padded, 0);
        data
    }

    #[test]
    fn test_parse_dylib() {
        let data = dylib_command("/usr/lib/libSystem.B.dylib", 24);
        let dylib = Dylib::parse(DylibKind::Load, &BoundedReader::new(&data), Endian::native())
            .unwrap();

        assert_eq!(dylib.name, "/usr/lib/libSystem.B.dylib");
        assert_eq!(dylib.basename(), "libSystem.B.dylib");
        assert_eq!(dylib.current_version.to_string(), "1281.0.0");
        assert_eq!(dylib.compatibility_version.to_string(), "1.0.0");
        assert!(dylib.is_linked());
    }

    #[test]
    fn test_name_offset_must_be_inside_command() {
        let data = dylib_command("/usr/lib/libz.dylib", 0x1000);
        let err = Dylib::parse(DylibKind::Load, &BoundedReader::new(&data), Endian::native())
            .unwrap_err();
        assert!(matches!(err, Error::MalformedCommand { .. }));

        // Pointing back into the fixed header is also rejected
        let data = dylib_command("/usr/lib/libz.dylib", 8);
        assert!(Dylib::parse(DylibKind::Load, &BoundedReader::new(&data), Endian::native()).is_err());
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(DylibKind::from_cmd(LC_LOAD_WEAK_DYLIB), Some(DylibKind::Weak));
        assert_eq!(DylibKind::from_cmd(LC_ID_DYLIB), Some(DylibKind::Id));
        assert_eq!(DylibKind::from_cmd(LC_SEGMENT_64), None);
    }
}
