//! Segments and their section tables.

use serde::Serialize;

use super::constants::*;
use super::structs::{Section32, Section64, SegmentCommand32, SegmentCommand64};
use crate::error::{Error, Result};
use crate::reader::BoundedReader;
use crate::util::{fixed_name, Endian};

/// A segment from `LC_SEGMENT` or `LC_SEGMENT_64`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Segment name, cut at the first NUL
    pub name: String,
    /// The 16-byte name field exactly as stored
    #[serde(skip)]
    pub raw_name: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    /// Maximum VM protection
    pub maxprot: u32,
    /// Initial VM protection
    pub initprot: u32,
    pub flags: u32,
    /// Sections, in command order
    pub sections: Vec<Section>,
}

/// A section header belonging to a [`Segment`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    pub name: String,
    /// Owning segment name as recorded in the section header
    pub segment_name: String,
    pub addr: u64,
    pub size: u64,
    /// File offset of the contents (0 for zerofill)
    pub offset: u32,
    /// Alignment as a power of two
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    /// Section type in the low byte, attributes above
    pub flags: u32,
}

/// Raw header fields shared by both segment widths.
struct RawSegment {
    segname: [u8; 16],
    vmaddr: u64,
    vmsize: u64,
    fileoff: u64,
    filesize: u64,
    maxprot: u32,
    initprot: u32,
    nsects: u32,
    flags: u32,
}

impl Segment {
    /// Decodes an `LC_SEGMENT` command.
    ///
    /// `command` spans exactly `cmdsize` bytes; `image` is the whole
    /// single-architecture image, used to validate the segment's file range.
    pub fn parse32(
        command: &BoundedReader<'_>,
        image: &BoundedReader<'_>,
        endian: Endian,
    ) -> Result<Self> {
        let raw: SegmentCommand32 = command.read_struct(0, endian)?;
        let header = RawSegment {
            segname: raw.segname,
            vmaddr: raw.vmaddr as u64,
            vmsize: raw.vmsize as u64,
            fileoff: raw.fileoff as u64,
            filesize: raw.filesize as u64,
            maxprot: raw.maxprot,
            initprot: raw.initprot,
            nsects: raw.nsects,
            flags: raw.flags,
        };
        Self::build(
            header,
            raw.cmd,
            command,
            image,
            SegmentCommand32::SIZE,
            Section32::SIZE,
            |off| {
                let s: Section32 = command.read_struct(off, endian)?;
                Ok(Section {
                    name: fixed_name(&s.sectname),
                    segment_name: fixed_name(&s.segname),
                    addr: s.addr as u64,
                    size: s.size as u64,
                    offset: s.offset,
                    align: s.align,
                    reloff: s.reloff,
                    nreloc: s.nreloc,
                    flags: s.flags,
                })
            },
        )
    }

    /// Decodes an `LC_SEGMENT_64` command.
    pub fn parse64(
        command: &BoundedReader<'_>,
        image: &BoundedReader<'_>,
        endian: Endian,
    ) -> Result<Self> {
        let raw: SegmentCommand64 = command.read_struct(0, endian)?;
        let header = RawSegment {
            segname: raw.segname,
            vmaddr: raw.vmaddr,
            vmsize: raw.vmsize,
            fileoff: raw.fileoff,
            filesize: raw.filesize,
            maxprot: raw.maxprot,
            initprot: raw.initprot,
            nsects: raw.nsects,
            flags: raw.flags,
        };
        Self::build(
            header,
            raw.cmd,
            command,
            image,
            SegmentCommand64::SIZE,
            Section64::SIZE,
            |off| {
                let s: Section64 = command.read_struct(off, endian)?;
                Ok(Section {
                    name: fixed_name(&s.sectname),
                    segment_name: fixed_name(&s.segname),
                    addr: s.addr,
                    size: s.size,
                    offset: s.offset,
                    align: s.align,
                    reloff: s.reloff,
                    nreloc: s.nreloc,
                    flags: s.flags,
                })
            },
        )
    }

    fn build<F>(
        raw: RawSegment,
        cmd: u32,
        command: &BoundedReader<'_>,
        image: &BoundedReader<'_>,
        header_size: usize,
        section_size: usize,
        read_section: F,
    ) -> Result<Self>
    where
        F: Fn(u64) -> Result<Section>,
    {
        let header_size = header_size as u64;
        let section_size = section_size as u64;

        // nsects is bounded by what the command can hold before anything is read
        let table_size = raw.nsects as u64 * section_size;
        if table_size > command.len().saturating_sub(header_size) {
            return Err(Error::TruncatedCommand {
                offset: command.base(),
                cmd,
                cmdsize: command.len() as u32,
            });
        }

        if !image.contains(raw.fileoff, raw.filesize) {
            return Err(Error::truncated(
                image.absolute(raw.fileoff),
                raw.filesize,
                image.len().saturating_sub(raw.fileoff),
            ));
        }

        let sections = (0..raw.nsects as u64)
            .map(|i| read_section(header_size + i * section_size))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            name: fixed_name(&raw.segname),
            raw_name: raw.segname,
            vmaddr: raw.vmaddr,
            vmsize: raw.vmsize,
            fileoff: raw.fileoff,
            filesize: raw.filesize,
            maxprot: raw.maxprot,
            initprot: raw.initprot,
            flags: raw.flags,
            sections,
        })
    }

    /// Returns a section by name.
    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    /// Initial protection.
    #[inline]
    pub fn init_prot(&self) -> VmProt {
        VmProt::from_bits_truncate(self.initprot)
    }

    /// Maximum protection.
    #[inline]
    pub fn max_prot(&self) -> VmProt {
        VmProt::from_bits_truncate(self.maxprot)
    }

    /// Returns true if the segment starts out both writable and executable.
    pub fn is_write_execute(&self) -> bool {
        self.init_prot().contains(VmProt::WRITE | VmProt::EXECUTE)
    }

    /// Returns true if the segment may ever become writable and executable.
    pub fn may_write_execute(&self) -> bool {
        self.max_prot().contains(VmProt::WRITE | VmProt::EXECUTE)
    }
}

impl Section {
    /// Section type (`S_REGULAR`, `S_ZEROFILL`, ...).
    #[inline]
    pub fn section_type(&self) -> u32 {
        self.flags & SECTION_TYPE
    }

    /// Attribute bits.
    #[inline]
    pub fn attributes(&self) -> u32 {
        self.flags & SECTION_ATTRIBUTES
    }

    /// Returns true if the section has no file contents.
    pub fn is_zerofill(&self) -> bool {
        matches!(
            self.section_type(),
            S_ZEROFILL | S_GB_ZEROFILL | S_THREAD_LOCAL_ZEROFILL
        )
    }

    /// Returns true if both instruction attributes are set.
    ///
    /// Reported as "writable and executable" for compatibility with earlier
    /// tooling, although neither bit describes writability.
    pub fn has_both_instruction_attributes(&self) -> bool {
        let both = S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS;
        self.flags & both == both
    }

    /// `segment,section` form used in diagnostics.
    pub fn full_name(&self) -> String {
        format!("{},{}", self.segment_name, self.name)
    }

    /// Returns the section contents from the image, or an empty slice for
    /// zerofill sections.
    pub fn data<'a>(&self, image: &BoundedReader<'a>) -> Result<&'a [u8]> {
        if self.is_zerofill() {
            return Ok(&[]);
        }
        image.read_at(self.offset as u64, self.size)
    }
}
