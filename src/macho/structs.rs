//! Mach-O binary structures.
//!
//! These structures match the on-disk format of Mach-O files and fat
//! containers. They are only ever produced by
//! [`BoundedReader::read_struct`](crate::reader::BoundedReader::read_struct),
//! which bounds-checks the source bytes and converts every integer field to
//! host order.
//!
//! Field names follow the system headers and are left undocumented where the
//! name says it all.

#![allow(missing_docs)]

use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::reader::impl_byte_swap;

// =============================================================================
// Header Structures
// =============================================================================

/// 32-bit Mach-O header.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader32 {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
}

impl MachHeader32 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 28;
}

impl_byte_swap!(MachHeader32 { magic, cputype, cpusubtype, filetype, ncmds, sizeofcmds, flags });

/// 64-bit Mach-O header.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct MachHeader64 {
    pub magic: u32,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

impl MachHeader64 {
    /// Size of the header in bytes.
    pub const SIZE: usize = 32;
}

impl_byte_swap!(MachHeader64 {
    magic, cputype, cpusubtype, filetype, ncmds, sizeofcmds, flags, reserved
});

// =============================================================================
// Fat Container
// =============================================================================

/// Fat container header. Stored big-endian unless the magic is swapped.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatHeader {
    pub magic: u32,
    pub nfat_arch: u32,
}

impl FatHeader {
    pub const SIZE: usize = 8;
}

impl_byte_swap!(FatHeader { magic, nfat_arch });

/// Architecture entry in a `FAT_MAGIC` container.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

impl FatArch {
    pub const SIZE: usize = 20;
}

impl_byte_swap!(FatArch { cputype, cpusubtype, offset, size, align });

/// Architecture entry in a `FAT_MAGIC_64` container.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct FatArch64 {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u64,
    pub size: u64,
    pub align: u32,
    pub reserved: u32,
}

impl FatArch64 {
    pub const SIZE: usize = 32;
}

impl_byte_swap!(FatArch64 { cputype, cpusubtype, offset, size, align, reserved });

// =============================================================================
// Load Command Header
// =============================================================================

/// Generic load command header.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LoadCommandHeader {
    pub cmd: u32,
    pub cmdsize: u32,
}

impl LoadCommandHeader {
    /// Size of the load command header.
    pub const SIZE: usize = 8;
}

impl_byte_swap!(LoadCommandHeader { cmd, cmdsize });

// =============================================================================
// Segments and Sections
// =============================================================================

/// 32-bit segment command (`LC_SEGMENT`).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand32 {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    pub vmaddr: u32,
    pub vmsize: u32,
    pub fileoff: u32,
    pub filesize: u32,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand32 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 56;
}

impl_byte_swap!(SegmentCommand32 {
    cmd, cmdsize, vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags
});

/// 64-bit segment command (`LC_SEGMENT_64`).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SegmentCommand64 {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Segment name (16 bytes, null-padded)
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub nsects: u32,
    pub flags: u32,
}

impl SegmentCommand64 {
    /// Size of the segment command (without sections).
    pub const SIZE: usize = 72;
}

impl_byte_swap!(SegmentCommand64 {
    cmd, cmdsize, vmaddr, vmsize, fileoff, filesize, maxprot, initprot, nsects, flags
});

/// 32-bit section header.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section32 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u32,
    pub size: u32,
    pub offset: u32,
    /// Alignment as a power of 2
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    /// Type and attributes
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl Section32 {
    pub const SIZE: usize = 68;
}

impl_byte_swap!(Section32 {
    addr, size, offset, align, reloff, nreloc, flags, reserved1, reserved2
});

/// 64-bit section header.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Section64 {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
    /// Alignment as a power of 2
    pub align: u32,
    pub reloff: u32,
    pub nreloc: u32,
    /// Type and attributes
    pub flags: u32,
    pub reserved1: u32,
    pub reserved2: u32,
    pub reserved3: u32,
}

impl Section64 {
    pub const SIZE: usize = 80;
}

impl_byte_swap!(Section64 {
    addr, size, offset, align, reloff, nreloc, flags, reserved1, reserved2, reserved3
});

// =============================================================================
// Symbol Table
// =============================================================================

/// Symbol table command (`LC_SYMTAB`).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl SymtabCommand {
    pub const SIZE: usize = 24;
}

impl_byte_swap!(SymtabCommand { cmd, cmdsize, symoff, nsyms, stroff, strsize });

/// Dynamic symbol table command (`LC_DYSYMTAB`).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DysymtabCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub tocoff: u32,
    pub ntoc: u32,
    pub modtaboff: u32,
    pub nmodtab: u32,
    pub extrefsymoff: u32,
    pub nextrefsyms: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
    pub extreloff: u32,
    pub nextrel: u32,
    pub locreloff: u32,
    pub nlocrel: u32,
}

impl DysymtabCommand {
    pub const SIZE: usize = 80;
}

impl_byte_swap!(DysymtabCommand {
    cmd, cmdsize, ilocalsym, nlocalsym, iextdefsym, nextdefsym, iundefsym, nundefsym,
    tocoff, ntoc, modtaboff, nmodtab, extrefsymoff, nextrefsyms, indirectsymoff,
    nindirectsyms, extreloff, nextrel, locreloff, nlocrel
});

/// 32-bit symbol table entry.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist32 {
    /// Index into the string table
    pub n_strx: u32,
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u32,
}

impl Nlist32 {
    pub const SIZE: usize = 12;
}

impl_byte_swap!(Nlist32 { n_strx, n_desc, n_value });

/// 64-bit symbol table entry.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct Nlist64 {
    /// Index into the string table
    pub n_strx: u32,
    pub n_type: u8,
    /// Section number or NO_SECT
    pub n_sect: u8,
    pub n_desc: u16,
    pub n_value: u64,
}

impl Nlist64 {
    pub const SIZE: usize = 16;
}

impl_byte_swap!(Nlist64 { n_strx, n_desc, n_value });

// =============================================================================
// Dylib and Path Commands
// =============================================================================

/// Dylib load/identification command. The path string follows inline.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DylibCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Offset of the path from the start of the command
    pub name_offset: u32,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

impl DylibCommand {
    pub const SIZE: usize = 24;
}

impl_byte_swap!(DylibCommand {
    cmd, cmdsize, name_offset, timestamp, current_version, compatibility_version
});

/// Command carrying a single inline path (`LC_LOAD_DYLINKER`, `LC_RPATH`, ...).
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct PathCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// Offset of the path from the start of the command
    pub path_offset: u32,
}

impl PathCommand {
    pub const SIZE: usize = 12;
}

impl_byte_swap!(PathCommand { cmd, cmdsize, path_offset });

// =============================================================================
// Small Fixed-Layout Commands
// =============================================================================

/// UUID command.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct UuidCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub uuid: [u8; 16],
}

impl UuidCommand {
    pub const SIZE: usize = 24;
}

impl_byte_swap!(UuidCommand { cmd, cmdsize });

/// `LC_VERSION_MIN_*` command.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct VersionMinCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub version: u32,
    pub sdk: u32,
}

impl VersionMinCommand {
    pub const SIZE: usize = 16;
}

impl_byte_swap!(VersionMinCommand { cmd, cmdsize, version, sdk });

/// Source version command.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SourceVersionCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// A.B.C.D.E packed as a24.b10.c10.d10.e10
    pub version: u64,
}

impl SourceVersionCommand {
    pub const SIZE: usize = 16;
}

impl_byte_swap!(SourceVersionCommand { cmd, cmdsize, version });

/// `LC_MAIN` command.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct EntryPointCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    /// File offset of `main()` relative to `__TEXT`
    pub entryoff: u64,
    pub stacksize: u64,
}

impl EntryPointCommand {
    pub const SIZE: usize = 24;
}

impl_byte_swap!(EntryPointCommand { cmd, cmdsize, entryoff, stacksize });

/// Command pointing at a blob in `__LINKEDIT`.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LinkeditDataCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub dataoff: u32,
    pub datasize: u32,
}

impl LinkeditDataCommand {
    pub const SIZE: usize = 16;
}

impl_byte_swap!(LinkeditDataCommand { cmd, cmdsize, dataoff, datasize });

/// `LC_ENCRYPTION_INFO` command.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct EncryptionInfoCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
}

impl EncryptionInfoCommand {
    pub const SIZE: usize = 20;
}

impl_byte_swap!(EncryptionInfoCommand { cmd, cmdsize, cryptoff, cryptsize, cryptid });

/// `LC_BUILD_VERSION` command. `ntools` tool entries follow.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildVersionCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub platform: u32,
    pub minos: u32,
    pub sdk: u32,
    pub ntools: u32,
}

impl BuildVersionCommand {
    pub const SIZE: usize = 24;
}

impl_byte_swap!(BuildVersionCommand { cmd, cmdsize, platform, minos, sdk, ntools });

/// Tool entry following `LC_BUILD_VERSION`.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BuildToolVersion {
    pub tool: u32,
    pub version: u32,
}

impl BuildToolVersion {
    pub const SIZE: usize = 8;
}

impl_byte_swap!(BuildToolVersion { tool, version });

/// `LC_LINKER_OPTION` command. `count` NUL-terminated strings follow.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct LinkerOptionCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub count: u32,
}

impl LinkerOptionCommand {
    pub const SIZE: usize = 12;
}

impl_byte_swap!(LinkerOptionCommand { cmd, cmdsize, count });

/// `LC_NOTE` command.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct NoteCommand {
    pub cmd: u32,
    pub cmdsize: u32,
    pub data_owner: [u8; 16],
    pub offset: u64,
    pub size: u64,
}

impl NoteCommand {
    pub const SIZE: usize = 40;
}

impl_byte_swap!(NoteCommand { cmd, cmdsize, offset, size });

// =============================================================================
// Code Signing (always big-endian)
// =============================================================================

/// Header of a code-signing SuperBlob.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct SuperBlobHeader {
    pub magic: u32,
    pub length: u32,
    pub count: u32,
}

impl SuperBlobHeader {
    pub const SIZE: usize = 12;
}

impl_byte_swap!(SuperBlobHeader { magic, length, count });

/// Index entry of a SuperBlob.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct BlobIndex {
    /// Slot type (`CSSLOT_*`)
    pub slot: u32,
    /// Offset of the blob from the start of the SuperBlob
    pub offset: u32,
}

impl BlobIndex {
    pub const SIZE: usize = 8;
}

impl_byte_swap!(BlobIndex { slot, offset });

/// Fixed prefix shared by every CodeDirectory version.
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct CodeDirectoryHeader {
    pub magic: u32,
    pub length: u32,
    pub version: u32,
    pub flags: u32,
    pub hash_offset: u32,
    pub ident_offset: u32,
    pub n_special_slots: u32,
    pub n_code_slots: u32,
    pub code_limit: u32,
    pub hash_size: u8,
    pub hash_type: u8,
    pub platform: u8,
    /// log2 of the page size
    pub page_size: u8,
    pub spare2: u32,
}

impl CodeDirectoryHeader {
    pub const SIZE: usize = 44;
    /// Offset of `scatterOffset` (version >= 0x20100)
    pub const SCATTER_OFFSET: u64 = 44;
    /// Offset of `teamOffset` (version >= 0x20200)
    pub const TEAM_OFFSET: u64 = 48;
    /// Offset of `codeLimit64` (version >= 0x20300)
    pub const CODE_LIMIT_64: u64 = 56;
}

impl_byte_swap!(CodeDirectoryHeader {
    magic, length, version, flags, hash_offset, ident_offset, n_special_slots,
    n_code_slots, code_limit, spare2
});
