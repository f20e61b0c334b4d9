//! Mach-O, fat container and code-signing constants.
//!
//! Names follow `<mach-o/loader.h>`, `<mach-o/fat.h>` and the code-signing
//! headers, so undocumented items mean what the system headers say.

#![allow(missing_docs)]

use bitflags::bitflags;

// =============================================================================
// Magic Numbers
// =============================================================================
//
// Mach-O magics are compared against the first four bytes read little-endian,
// fat magics against the same bytes read big-endian. A `*_CIGAM*` match means
// the remaining fields use the opposite order to the read.

/// 32-bit Mach-O, little-endian file
pub const MH_MAGIC: u32 = 0xFEEDFACE;
/// 32-bit Mach-O, big-endian file
pub const MH_CIGAM: u32 = 0xCEFAEDFE;
/// 64-bit Mach-O, little-endian file
pub const MH_MAGIC_64: u32 = 0xFEEDFACF;
/// 64-bit Mach-O, big-endian file
pub const MH_CIGAM_64: u32 = 0xCFFAEDFE;

/// Fat container with 32-bit arch entries
pub const FAT_MAGIC: u32 = 0xCAFEBABE;
/// Fat container whose fields are stored little-endian
pub const FAT_CIGAM: u32 = 0xBEBAFECA;
/// Fat container with 64-bit arch entries
pub const FAT_MAGIC_64: u32 = 0xCAFEBABF;
/// Fat-64 container whose fields are stored little-endian
pub const FAT_CIGAM_64: u32 = 0xBFBAFECA;

// =============================================================================
// File Types
// =============================================================================

pub const MH_OBJECT: u32 = 0x1;
pub const MH_EXECUTE: u32 = 0x2;
pub const MH_FVMLIB: u32 = 0x3;
pub const MH_CORE: u32 = 0x4;
pub const MH_PRELOAD: u32 = 0x5;
pub const MH_DYLIB: u32 = 0x6;
pub const MH_DYLINKER: u32 = 0x7;
pub const MH_BUNDLE: u32 = 0x8;
pub const MH_DYLIB_STUB: u32 = 0x9;
pub const MH_DSYM: u32 = 0xA;
pub const MH_KEXT_BUNDLE: u32 = 0xB;
pub const MH_FILESET: u32 = 0xC;

/// Returns a short name for a header `filetype`.
pub fn file_type_name(filetype: u32) -> &'static str {
    match filetype {
        MH_OBJECT => "object",
        MH_EXECUTE => "executable",
        MH_FVMLIB => "fvmlib",
        MH_CORE => "core",
        MH_PRELOAD => "preload",
        MH_DYLIB => "dylib",
        MH_DYLINKER => "dylinker",
        MH_BUNDLE => "bundle",
        MH_DYLIB_STUB => "dylib stub",
        MH_DSYM => "dsym",
        MH_KEXT_BUNDLE => "kext bundle",
        MH_FILESET => "fileset",
        _ => "unknown",
    }
}

// =============================================================================
// CPU Types
// =============================================================================

/// 64-bit ABI flag
pub const CPU_ARCH_ABI64: u32 = 0x0100_0000;
/// ILP32 on 64-bit hardware
pub const CPU_ARCH_ABI64_32: u32 = 0x0200_0000;

pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_X86_64: u32 = CPU_TYPE_X86 | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM: u32 = 12;
pub const CPU_TYPE_ARM64: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64;
pub const CPU_TYPE_ARM64_32: u32 = CPU_TYPE_ARM | CPU_ARCH_ABI64_32;
pub const CPU_TYPE_POWERPC: u32 = 18;
pub const CPU_TYPE_POWERPC64: u32 = CPU_TYPE_POWERPC | CPU_ARCH_ABI64;

/// Mask for capability bits in `cpusubtype`
pub const CPU_SUBTYPE_MASK: u32 = 0xFF00_0000;
/// ARM64e (pointer authentication)
pub const CPU_SUBTYPE_ARM64E: u32 = 2;

/// Returns a conventional architecture name for a cpu type/subtype pair.
pub fn arch_name(cputype: u32, cpusubtype: u32) -> &'static str {
    match cputype {
        CPU_TYPE_ARM64 if cpusubtype & !CPU_SUBTYPE_MASK == CPU_SUBTYPE_ARM64E => "arm64e",
        CPU_TYPE_ARM64 => "arm64",
        CPU_TYPE_ARM64_32 => "arm64_32",
        CPU_TYPE_ARM => "arm",
        CPU_TYPE_X86_64 => "x86_64",
        CPU_TYPE_X86 => "i386",
        CPU_TYPE_POWERPC => "ppc",
        CPU_TYPE_POWERPC64 => "ppc64",
        _ => "unknown",
    }
}

// =============================================================================
// Load Commands
// =============================================================================

/// Load command requiring dynamic linker
pub const LC_REQ_DYLD: u32 = 0x8000_0000;

pub const LC_SEGMENT: u32 = 0x1;
pub const LC_SYMTAB: u32 = 0x2;
pub const LC_THREAD: u32 = 0x4;
pub const LC_UNIXTHREAD: u32 = 0x5;
pub const LC_DYSYMTAB: u32 = 0xB;
pub const LC_LOAD_DYLIB: u32 = 0xC;
pub const LC_ID_DYLIB: u32 = 0xD;
pub const LC_LOAD_DYLINKER: u32 = 0xE;
pub const LC_ID_DYLINKER: u32 = 0xF;
pub const LC_SUB_FRAMEWORK: u32 = 0x12;
pub const LC_SUB_CLIENT: u32 = 0x14;
pub const LC_LOAD_WEAK_DYLIB: u32 = 0x18 | LC_REQ_DYLD;
pub const LC_SEGMENT_64: u32 = 0x19;
pub const LC_ROUTINES_64: u32 = 0x1A;
pub const LC_UUID: u32 = 0x1B;
pub const LC_RPATH: u32 = 0x1C | LC_REQ_DYLD;
pub const LC_CODE_SIGNATURE: u32 = 0x1D;
pub const LC_SEGMENT_SPLIT_INFO: u32 = 0x1E;
pub const LC_REEXPORT_DYLIB: u32 = 0x1F | LC_REQ_DYLD;
pub const LC_LAZY_LOAD_DYLIB: u32 = 0x20;
pub const LC_ENCRYPTION_INFO: u32 = 0x21;
pub const LC_DYLD_INFO: u32 = 0x22;
pub const LC_DYLD_INFO_ONLY: u32 = 0x22 | LC_REQ_DYLD;
pub const LC_LOAD_UPWARD_DYLIB: u32 = 0x23 | LC_REQ_DYLD;
pub const LC_VERSION_MIN_MACOSX: u32 = 0x24;
pub const LC_VERSION_MIN_IPHONEOS: u32 = 0x25;
pub const LC_FUNCTION_STARTS: u32 = 0x26;
pub const LC_DYLD_ENVIRONMENT: u32 = 0x27;
pub const LC_MAIN: u32 = 0x28 | LC_REQ_DYLD;
pub const LC_DATA_IN_CODE: u32 = 0x29;
pub const LC_SOURCE_VERSION: u32 = 0x2A;
pub const LC_DYLIB_CODE_SIGN_DRS: u32 = 0x2B;
pub const LC_ENCRYPTION_INFO_64: u32 = 0x2C;
pub const LC_LINKER_OPTION: u32 = 0x2D;
pub const LC_LINKER_OPTIMIZATION_HINT: u32 = 0x2E;
pub const LC_VERSION_MIN_TVOS: u32 = 0x2F;
pub const LC_VERSION_MIN_WATCHOS: u32 = 0x30;
pub const LC_NOTE: u32 = 0x31;
pub const LC_BUILD_VERSION: u32 = 0x32;
pub const LC_DYLD_EXPORTS_TRIE: u32 = 0x33 | LC_REQ_DYLD;
pub const LC_DYLD_CHAINED_FIXUPS: u32 = 0x34 | LC_REQ_DYLD;
pub const LC_FILESET_ENTRY: u32 = 0x35 | LC_REQ_DYLD;

/// Returns the symbolic name of a load command, or `"LC_UNKNOWN"`.
///
/// Renderers use this as the key for their own descriptions.
pub fn load_command_name(cmd: u32) -> &'static str {
    match cmd {
        LC_SEGMENT => "LC_SEGMENT",
        LC_SYMTAB => "LC_SYMTAB",
        LC_THREAD => "LC_THREAD",
        LC_UNIXTHREAD => "LC_UNIXTHREAD",
        LC_DYSYMTAB => "LC_DYSYMTAB",
        LC_LOAD_DYLIB => "LC_LOAD_DYLIB",
        LC_ID_DYLIB => "LC_ID_DYLIB",
        LC_LOAD_DYLINKER => "LC_LOAD_DYLINKER",
        LC_ID_DYLINKER => "LC_ID_DYLINKER",
        LC_SUB_FRAMEWORK => "LC_SUB_FRAMEWORK",
        LC_SUB_CLIENT => "LC_SUB_CLIENT",
        LC_LOAD_WEAK_DYLIB => "LC_LOAD_WEAK_DYLIB",
        LC_SEGMENT_64 => "LC_SEGMENT_64",
        LC_ROUTINES_64 => "LC_ROUTINES_64",
        LC_UUID => "LC_UUID",
        LC_RPATH => "LC_RPATH",
        LC_CODE_SIGNATURE => "LC_CODE_SIGNATURE",
        LC_SEGMENT_SPLIT_INFO => "LC_SEGMENT_SPLIT_INFO",
        LC_REEXPORT_DYLIB => "LC_REEXPORT_DYLIB",
        LC_LAZY_LOAD_DYLIB => "LC_LAZY_LOAD_DYLIB",
        LC_ENCRYPTION_INFO => "LC_ENCRYPTION_INFO",
        LC_DYLD_INFO => "LC_DYLD_INFO",
        LC_DYLD_INFO_ONLY => "LC_DYLD_INFO_ONLY",
        LC_LOAD_UPWARD_DYLIB => "LC_LOAD_UPWARD_DYLIB",
        LC_VERSION_MIN_MACOSX => "LC_VERSION_MIN_MACOSX",
        LC_VERSION_MIN_IPHONEOS => "LC_VERSION_MIN_IPHONEOS",
        LC_FUNCTION_STARTS => "LC_FUNCTION_STARTS",
        LC_DYLD_ENVIRONMENT => "LC_DYLD_ENVIRONMENT",
        LC_MAIN => "LC_MAIN",
        LC_DATA_IN_CODE => "LC_DATA_IN_CODE",
        LC_SOURCE_VERSION => "LC_SOURCE_VERSION",
        LC_DYLIB_CODE_SIGN_DRS => "LC_DYLIB_CODE_SIGN_DRS",
        LC_ENCRYPTION_INFO_64 => "LC_ENCRYPTION_INFO_64",
        LC_LINKER_OPTION => "LC_LINKER_OPTION",
        LC_LINKER_OPTIMIZATION_HINT => "LC_LINKER_OPTIMIZATION_HINT",
        LC_VERSION_MIN_TVOS => "LC_VERSION_MIN_TVOS",
        LC_VERSION_MIN_WATCHOS => "LC_VERSION_MIN_WATCHOS",
        LC_NOTE => "LC_NOTE",
        LC_BUILD_VERSION => "LC_BUILD_VERSION",
        LC_DYLD_EXPORTS_TRIE => "LC_DYLD_EXPORTS_TRIE",
        LC_DYLD_CHAINED_FIXUPS => "LC_DYLD_CHAINED_FIXUPS",
        LC_FILESET_ENTRY => "LC_FILESET_ENTRY",
        _ => "LC_UNKNOWN",
    }
}

// =============================================================================
// Build Platforms
// =============================================================================

/// Returns the name of an `LC_BUILD_VERSION` platform.
pub fn platform_name(platform: u32) -> &'static str {
    match platform {
        1 => "macOS",
        2 => "iOS",
        3 => "tvOS",
        4 => "watchOS",
        5 => "bridgeOS",
        6 => "Mac Catalyst",
        7 => "iOS Simulator",
        8 => "tvOS Simulator",
        9 => "watchOS Simulator",
        10 => "DriverKit",
        11 => "visionOS",
        12 => "visionOS Simulator",
        _ => "unknown",
    }
}

// =============================================================================
// Sections
// =============================================================================

/// Section type mask
pub const SECTION_TYPE: u32 = 0x0000_00FF;
/// Section attribute mask
pub const SECTION_ATTRIBUTES: u32 = 0xFFFF_FF00;

pub const S_REGULAR: u32 = 0x0;
pub const S_ZEROFILL: u32 = 0x1;
pub const S_CSTRING_LITERALS: u32 = 0x2;
pub const S_SYMBOL_STUBS: u32 = 0x8;
pub const S_GB_ZEROFILL: u32 = 0xC;
pub const S_THREAD_LOCAL_ZEROFILL: u32 = 0x12;

/// Section contains only true machine instructions
pub const S_ATTR_PURE_INSTRUCTIONS: u32 = 0x8000_0000;
/// Debug section
pub const S_ATTR_DEBUG: u32 = 0x0200_0000;
/// Section contains some machine instructions
pub const S_ATTR_SOME_INSTRUCTIONS: u32 = 0x0000_0400;

// =============================================================================
// Symbol Types
// =============================================================================

/// If any of these bits set, a symbolic debugging entry
pub const N_STAB: u8 = 0xE0;
/// Private external symbol bit
pub const N_PEXT: u8 = 0x10;
/// Mask for the type bits
pub const N_TYPE: u8 = 0x0E;
/// External symbol bit
pub const N_EXT: u8 = 0x01;

pub const N_UNDF: u8 = 0x0;
pub const N_ABS: u8 = 0x2;
pub const N_SECT: u8 = 0xE;
pub const N_INDR: u8 = 0xA;

// =============================================================================
// Code Signing
// =============================================================================
//
// Code-signing blobs are always big-endian regardless of the file's order.

/// Embedded signature SuperBlob
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xFADE_0CC0;
/// CodeDirectory blob
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xFADE_0C02;
/// Requirements set
pub const CSMAGIC_REQUIREMENTS: u32 = 0xFADE_0C01;
/// Embedded entitlements (XML plist)
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xFADE_7171;
/// Embedded entitlements (DER)
pub const CSMAGIC_EMBEDDED_DER_ENTITLEMENTS: u32 = 0xFADE_7172;
/// CMS signature wrapper
pub const CSMAGIC_BLOBWRAPPER: u32 = 0xFADE_0B01;

/// SuperBlob slot holding the primary CodeDirectory
pub const CSSLOT_CODEDIRECTORY: u32 = 0;
/// SuperBlob slot holding the entitlements blob
pub const CSSLOT_ENTITLEMENTS: u32 = 5;
/// SuperBlob slot holding the CMS signature
pub const CSSLOT_SIGNATURESLOT: u32 = 0x10000;

/// First CodeDirectory version with a scatter offset
pub const CS_SUPPORTSSCATTER: u32 = 0x20100;
/// First CodeDirectory version with a team identifier
pub const CS_SUPPORTSTEAMID: u32 = 0x20200;
/// First CodeDirectory version with a 64-bit code limit
pub const CS_SUPPORTSCODELIMIT64: u32 = 0x20300;

/// Returns the name of a CodeDirectory `hashType`.
pub fn hash_type_name(hash_type: u8) -> &'static str {
    match hash_type {
        1 => "sha1",
        2 => "sha256",
        3 => "sha256-truncated",
        4 => "sha384",
        _ => "unknown",
    }
}

// =============================================================================
// Flags
// =============================================================================

bitflags! {
    /// Mach-O header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MachOFlags: u32 {
        const NOUNDEFS = 0x1;
        const INCRLINK = 0x2;
        const DYLDLINK = 0x4;
        const BINDATLOAD = 0x8;
        const PREBOUND = 0x10;
        const SPLIT_SEGS = 0x20;
        const TWOLEVEL = 0x80;
        const FORCE_FLAT = 0x100;
        const WEAK_DEFINES = 0x8000;
        const BINDS_TO_WEAK = 0x10000;
        /// All stacks in the task are given stack execution privilege
        const ALLOW_STACK_EXECUTION = 0x20000;
        const ROOT_SAFE = 0x40000;
        const SETUID_SAFE = 0x80000;
        const NO_REEXPORTED_DYLIBS = 0x100000;
        /// The OS loads the main executable at a random address
        const PIE = 0x200000;
        const DEAD_STRIPPABLE_DYLIB = 0x400000;
        const HAS_TLV_DESCRIPTORS = 0x800000;
        /// The heap is non-executable even where the platform does not require it
        const NO_HEAP_EXECUTION = 0x1000000;
        const APP_EXTENSION_SAFE = 0x2000000;
        const SIM_SUPPORT = 0x8000000;
        const DYLIB_IN_CACHE = 0x80000000;
    }
}

bitflags! {
    /// Virtual memory protection bits used by segment `maxprot`/`initprot`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct VmProt: u32 {
        const READ = 0x1;
        const WRITE = 0x2;
        const EXECUTE = 0x4;
    }
}

impl VmProt {
    /// Renders as `rwx` with dashes for missing bits.
    pub fn to_rwx(self) -> String {
        let mut s = String::with_capacity(3);
        s.push(if self.contains(VmProt::READ) { 'r' } else { '-' });
        s.push(if self.contains(VmProt::WRITE) { 'w' } else { '-' });
        s.push(if self.contains(VmProt::EXECUTE) { 'x' } else { '-' });
        s
    }
}
