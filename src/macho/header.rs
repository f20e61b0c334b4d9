//! Magic detection and the normalized Mach-O header.

use std::fmt;

use serde::Serialize;
use tracing::debug;

use super::constants::*;
use super::structs::{MachHeader32, MachHeader64};
use crate::error::{Error, Result};
use crate::options::ParseLimits;
use crate::reader::BoundedReader;
use crate::util::Endian;

/// Pointer width of a thin Mach-O image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum WordWidth {
    /// 32-bit (`MH_MAGIC`/`MH_CIGAM`)
    #[serde(rename = "32")]
    Bits32,
    /// 64-bit (`MH_MAGIC_64`/`MH_CIGAM_64`)
    #[serde(rename = "64")]
    Bits64,
}

impl fmt::Display for WordWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WordWidth::Bits32 => write!(f, "32-bit"),
            WordWidth::Bits64 => write!(f, "64-bit"),
        }
    }
}

/// What the leading magic says the data is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// A single-architecture Mach-O image.
    Thin {
        /// Word width of the image
        width: WordWidth,
        /// Byte order of the image's fields
        endian: Endian,
    },
    /// A multi-architecture fat container.
    Fat {
        /// True for `FAT_MAGIC_64` (64-bit arch entries)
        wide: bool,
        /// Byte order of the container's fields
        endian: Endian,
    },
}

impl Container {
    /// Classifies the data in `reader` by its first four bytes.
    pub fn detect(reader: &BoundedReader<'_>) -> Result<Self> {
        if reader.len() < 4 {
            return Err(Error::UnsupportedFormat {
                offset: reader.base(),
                magic: None,
            });
        }

        let magic = reader.u32_at(0, Endian::Little)?;
        let container = match magic {
            MH_MAGIC => Container::Thin {
                width: WordWidth::Bits32,
                endian: Endian::Little,
            },
            MH_CIGAM => Container::Thin {
                width: WordWidth::Bits32,
                endian: Endian::Big,
            },
            MH_MAGIC_64 => Container::Thin {
                width: WordWidth::Bits64,
                endian: Endian::Little,
            },
            MH_CIGAM_64 => Container::Thin {
                width: WordWidth::Bits64,
                endian: Endian::Big,
            },
            _ => match magic.swap_bytes() {
                FAT_MAGIC => Container::Fat {
                    wide: false,
                    endian: Endian::Big,
                },
                FAT_CIGAM => Container::Fat {
                    wide: false,
                    endian: Endian::Little,
                },
                FAT_MAGIC_64 => Container::Fat {
                    wide: true,
                    endian: Endian::Big,
                },
                FAT_CIGAM_64 => Container::Fat {
                    wide: true,
                    endian: Endian::Little,
                },
                _ => {
                    return Err(Error::UnsupportedFormat {
                        offset: reader.base(),
                        magic: Some(magic),
                    })
                }
            },
        };

        debug!("offset {:#x}: detected {:?}", reader.base(), container);
        Ok(container)
    }
}

/// Normalized header of a thin Mach-O image, fields in host order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachOHeader {
    /// Magic as it appears on disk (little-endian read)
    pub magic: u32,
    /// Word width
    pub width: WordWidth,
    /// Byte order of the file
    pub endian: Endian,
    /// CPU type
    pub cputype: u32,
    /// CPU subtype
    pub cpusubtype: u32,
    /// File type (`MH_EXECUTE`, `MH_DYLIB`, ...)
    pub filetype: u32,
    /// Declared number of load commands
    pub ncmds: u32,
    /// Declared byte size of the load command region
    pub sizeofcmds: u32,
    /// Raw header flags
    pub flags: u32,
    /// Reserved word (64-bit headers only)
    pub reserved: Option<u32>,
}

impl MachOHeader {
    /// Decodes and validates the header at the start of `reader`.
    ///
    /// The load command region it declares is checked against `limits` and
    /// against the bytes remaining in `reader`.
    pub fn parse(reader: &BoundedReader<'_>, limits: &ParseLimits) -> Result<Self> {
        let (width, endian) = match Container::detect(reader)? {
            Container::Thin { width, endian } => (width, endian),
            Container::Fat { .. } => {
                return Err(Error::invalid_header(
                    reader.base(),
                    "fat container where a thin Mach-O image was expected",
                ))
            }
        };

        let magic = reader.u32_at(0, Endian::Little)?;
        let header = match width {
            WordWidth::Bits32 => {
                let raw: MachHeader32 = reader.read_struct(0, endian)?;
                Self {
                    magic,
                    width,
                    endian,
                    cputype: raw.cputype,
                    cpusubtype: raw.cpusubtype,
                    filetype: raw.filetype,
                    ncmds: raw.ncmds,
                    sizeofcmds: raw.sizeofcmds,
                    flags: raw.flags,
                    reserved: None,
                }
            }
            WordWidth::Bits64 => {
                let raw: MachHeader64 = reader.read_struct(0, endian)?;
                Self {
                    magic,
                    width,
                    endian,
                    cputype: raw.cputype,
                    cpusubtype: raw.cpusubtype,
                    filetype: raw.filetype,
                    ncmds: raw.ncmds,
                    sizeofcmds: raw.sizeofcmds,
                    flags: raw.flags,
                    reserved: Some(raw.reserved),
                }
            }
        };

        if header.cputype == 0 {
            return Err(Error::invalid_header(reader.base(), "cputype is zero"));
        }
        if header.ncmds == 0 {
            return Err(Error::invalid_header(reader.base(), "no load commands"));
        }
        if header.sizeofcmds > limits.max_load_commands_size {
            return Err(Error::AllocationLimitExceeded {
                offset: reader.absolute(20),
                what: "load command region",
                requested: header.sizeofcmds as u64,
                limit: limits.max_load_commands_size as u64,
            });
        }

        let available = reader.len().saturating_sub(header.size());
        if header.sizeofcmds as u64 > available {
            return Err(Error::truncated(
                reader.absolute(header.size()),
                header.sizeofcmds as u64,
                available,
            ));
        }

        debug!(
            "{} {} {} header: ncmds={} sizeofcmds={:#x} flags={:#x}",
            header.arch_name(),
            header.width,
            header.endian,
            header.ncmds,
            header.sizeofcmds,
            header.flags
        );

        Ok(header)
    }

    /// Size of the on-disk header in bytes.
    #[inline]
    pub fn size(&self) -> u64 {
        match self.width {
            WordWidth::Bits32 => MachHeader32::SIZE as u64,
            WordWidth::Bits64 => MachHeader64::SIZE as u64,
        }
    }

    /// Returns true for 64-bit images.
    #[inline]
    pub fn is_64(&self) -> bool {
        self.width == WordWidth::Bits64
    }

    /// Header flags, unknown bits dropped.
    #[inline]
    pub fn flags(&self) -> MachOFlags {
        MachOFlags::from_bits_truncate(self.flags)
    }

    /// Conventional architecture name.
    pub fn arch_name(&self) -> &'static str {
        arch_name(self.cputype, self.cpusubtype)
    }

    /// Short file type name.
    pub fn file_type_name(&self) -> &'static str {
        file_type_name(self.filetype)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ByteSwap;
    use zerocopy::IntoBytes;

    fn header64(endian: Endian) -> Vec<u8> {
        let mut header = MachHeader64 {
            magic: MH_MAGIC_64,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            filetype: MH_EXECUTE,
            ncmds: 1,
            sizeofcmds: 8,
            flags: MachOFlags::PIE.bits(),
            reserved: 0,
        };
        if !endian.is_native() {
            header.byte_swap();
        }
        let mut data = header.as_bytes().to_vec();
        data.extend_from_slice(&[0u8; 8]);
        data
    }

    #[test]
    fn test_detect_magic_mapping() {
        let cases: [([u8; 4], Container); 6] = [
            (
                [0xCF, 0xFA, 0xED, 0xFE],
                Container::Thin {
                    width: WordWidth::Bits64,
                    endian: Endian::Little,
                },
            ),
            (
                [0xFE, 0xED, 0xFA, 0xCF],
                Container::Thin {
                    width: WordWidth::Bits64,
                    endian: Endian::Big,
                },
            ),
            (
                [0xCE, 0xFA, 0xED, 0xFE],
                Container::Thin {
                    width: WordWidth::Bits32,
                    endian: Endian::Little,
                },
            ),
            (
                [0xFE, 0xED, 0xFA, 0xCE],
                Container::Thin {
                    width: WordWidth::Bits32,
                    endian: Endian::Big,
                },
            ),
            (
                [0xCA, 0xFE, 0xBA, 0xBE],
                Container::Fat {
                    wide: false,
                    endian: Endian::Big,
                },
            ),
            (
                [0xBE, 0xBA, 0xFE, 0xCA],
                Container::Fat {
                    wide: false,
                    endian: Endian::Little,
                },
            ),
        ];

        for (bytes, expected) in cases {
            let reader = BoundedReader::new(&bytes);
            assert_eq!(Container::detect(&reader).unwrap(), expected);
        }
    }

    #[test]
    fn test_short_input_is_unsupported() {
        for len in 0..4 {
            let data = vec![0xCF; len];
            let err = Container::detect(&BoundedReader::new(&data)).unwrap_err();
            assert!(matches!(
                err,
                Error::UnsupportedFormat {
                    offset: 0,
                    magic: None
                }
            ));
        }
    }

    #[test]
    fn test_elf_is_unsupported() {
        let data = b"\x7fELF\x02\x01\x01\x00";
        let err = Container::detect(&BoundedReader::new(data)).unwrap_err();
        assert!(matches!(
            err,
            Error::UnsupportedFormat {
                magic: Some(0x464c457f),
                ..
            }
        ));
    }

    #[test]
    fn test_parse_both_byte_orders() {
        for endian in [Endian::Little, Endian::Big] {
            let data = header64(endian);
            let header = MachOHeader::parse(&BoundedReader::new(&data), &ParseLimits::default())
                .unwrap();
            assert_eq!(header.endian, endian);
            assert_eq!(header.width, WordWidth::Bits64);
            assert_eq!(header.cputype, CPU_TYPE_ARM64);
            assert_eq!(header.ncmds, 1);
            assert!(header.flags().contains(MachOFlags::PIE));
            assert_eq!(header.arch_name(), "arm64");
        }
    }

    #[test]
    fn test_rejects_zero_cputype_and_ncmds() {
        let mut data = header64(Endian::Little);
        data[4..8].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            MachOHeader::parse(&BoundedReader::new(&data), &ParseLimits::default()),
            Err(Error::InvalidHeader { .. })
        ));

        let mut data = header64(Endian::Little);
        data[16..20].copy_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            MachOHeader::parse(&BoundedReader::new(&data), &ParseLimits::default()),
            Err(Error::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_sizeofcmds_beyond_file() {
        let mut data = header64(Endian::Little);
        data[20..24].copy_from_slice(&0x1000u32.to_le_bytes());
        let err = MachOHeader::parse(&BoundedReader::new(&data), &ParseLimits::default())
            .unwrap_err();
        assert!(matches!(
            err,
            Error::TruncatedData {
                offset: 32,
                needed: 0x1000,
                available: 8
            }
        ));

        let limits = ParseLimits {
            max_load_commands_size: 0x100,
            ..Default::default()
        };
        let err = MachOHeader::parse(&BoundedReader::new(&data), &limits).unwrap_err();
        assert!(matches!(err, Error::AllocationLimitExceeded { .. }));
    }
}
