//! Synthetic Mach-O, fat and code-signature builders for tests.
//!
//! Compiled both as an integration test helper and as the crate's unit-test
//! helper; constants come from `machscope::macho` in either case.

#![allow(dead_code)]

/// Offset where section contents, tables and blobs start.
pub const DATA_START: u32 = 0x1000;

pub use machscope::macho::{
    MachOFlags, CPU_TYPE_ARM64, CPU_TYPE_POWERPC, CPU_TYPE_X86_64, CSMAGIC_CODEDIRECTORY,
    CSMAGIC_EMBEDDED_SIGNATURE, FAT_MAGIC, LC_CODE_SIGNATURE, LC_DATA_IN_CODE,
    LC_ENCRYPTION_INFO_64, LC_FUNCTION_STARTS, LC_LOAD_DYLIB, LC_SEGMENT, LC_SEGMENT_64,
    LC_SYMTAB, MH_EXECUTE, MH_MAGIC, MH_MAGIC_64, N_EXT, N_SECT, S_ATTR_PURE_INSTRUCTIONS,
    S_ATTR_SOME_INSTRUCTIONS,
};

pub const MH_PIE: u32 = MachOFlags::PIE.bits();
pub const MH_NO_HEAP_EXECUTION: u32 = MachOFlags::NO_HEAP_EXECUTION.bits();
pub const MH_ALLOW_STACK_EXECUTION: u32 = MachOFlags::ALLOW_STACK_EXECUTION.bits();

/// Section to place in a segment.
pub struct SectionSpec {
    pub name: &'static str,
    pub flags: u32,
    pub data: Vec<u8>,
}

impl SectionSpec {
    pub fn new(name: &'static str, flags: u32, data: &[u8]) -> Self {
        Self {
            name,
            flags,
            data: data.to_vec(),
        }
    }
}

/// Builds a thin Mach-O image.
///
/// Load commands are laid out after the header; everything they point at
/// goes into a data area starting at [`DATA_START`].
pub struct MachOBuilder {
    is64: bool,
    big: bool,
    cputype: u32,
    cpusubtype: u32,
    filetype: u32,
    flags: u32,
    ncmds_override: Option<u32>,
    commands: Vec<u8>,
    ncmds: u32,
    data: Vec<u8>,
    next_vmaddr: u64,
}

impl MachOBuilder {
    pub fn new64() -> Self {
        Self {
            is64: true,
            big: false,
            cputype: CPU_TYPE_X86_64,
            cpusubtype: 3,
            filetype: MH_EXECUTE,
            flags: 0,
            ncmds_override: None,
            commands: Vec::new(),
            ncmds: 0,
            data: Vec::new(),
            next_vmaddr: 0x1_0000_0000,
        }
    }

    pub fn new32() -> Self {
        Self {
            is64: false,
            cputype: 7,
            next_vmaddr: 0x1000,
            ..Self::new64()
        }
    }

    pub fn big_endian(mut self) -> Self {
        self.big = true;
        self
    }

    pub fn cpu(mut self, cputype: u32, cpusubtype: u32) -> Self {
        self.cputype = cputype;
        self.cpusubtype = cpusubtype;
        self
    }

    pub fn flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    pub fn ncmds(mut self, ncmds: u32) -> Self {
        self.ncmds_override = Some(ncmds);
        self
    }

    fn u32(&self, out: &mut Vec<u8>, v: u32) {
        if self.big {
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn u16(&self, out: &mut Vec<u8>, v: u16) {
        if self.big {
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    fn u64(&self, out: &mut Vec<u8>, v: u64) {
        if self.big {
            out.extend_from_slice(&v.to_be_bytes());
        } else {
            out.extend_from_slice(&v.to_le_bytes());
        }
    }

    /// Pointer-sized field.
    fn word(&self, out: &mut Vec<u8>, v: u64) {
        if self.is64 {
            self.u64(out, v);
        } else {
            self.u32(out, v as u32);
        }
    }

    /// Appends to the data area, returning the file offset.
    fn push_data(&mut self, bytes: &[u8]) -> u32 {
        let offset = DATA_START + self.data.len() as u32;
        self.data.extend_from_slice(bytes);
        // Keep later blobs aligned
        while self.data.len() % 8 != 0 {
            self.data.push(0);
        }
        offset
    }

    /// Appends a fully encoded command.
    pub fn raw_command(mut self, bytes: &[u8]) -> Self {
        self.commands.extend_from_slice(bytes);
        self.ncmds += 1;
        self
    }

    fn name16(name: &str) -> [u8; 16] {
        let mut out = [0u8; 16];
        out[..name.len()].copy_from_slice(name.as_bytes());
        out
    }

    pub fn segment(mut self, name: &str, initprot: u32, maxprot: u32, sections: &[SectionSpec]) -> Self {
        let mut offsets = Vec::new();
        for s in sections {
            offsets.push(self.push_data(&s.data));
        }
        let fileoff = offsets.first().copied().unwrap_or(0) as u64;
        let filesize = match (offsets.last(), sections.last()) {
            (Some(&last), Some(s)) => last as u64 + s.data.len() as u64 - fileoff,
            _ => 0,
        };
        let vmaddr = self.next_vmaddr;
        self.next_vmaddr += 0x10000;

        let (cmd, header_size, section_size) = if self.is64 {
            (LC_SEGMENT_64, 72, 80)
        } else {
            (LC_SEGMENT, 56, 68)
        };

        let mut out = Vec::new();
        self.u32(&mut out, cmd);
        self.u32(&mut out, header_size + section_size * sections.len() as u32);
        out.extend_from_slice(&Self::name16(name));
        self.word(&mut out, vmaddr);
        self.word(&mut out, 0x10000);
        self.word(&mut out, fileoff);
        self.word(&mut out, filesize);
        self.u32(&mut out, maxprot);
        self.u32(&mut out, initprot);
        self.u32(&mut out, sections.len() as u32);
        self.u32(&mut out, 0);

        for (s, &offset) in sections.iter().zip(&offsets) {
            out.extend_from_slice(&Self::name16(s.name));
            out.extend_from_slice(&Self::name16(name));
            self.word(&mut out, vmaddr + (offset as u64 - fileoff));
            self.word(&mut out, s.data.len() as u64);
            self.u32(&mut out, offset);
            self.u32(&mut out, 0); // align
            self.u32(&mut out, 0); // reloff
            self.u32(&mut out, 0); // nreloc
            self.u32(&mut out, s.flags);
            self.u32(&mut out, 0);
            self.u32(&mut out, 0);
            if self.is64 {
                self.u32(&mut out, 0);
            }
        }

        self.raw_command(&out)
    }

    pub fn dylib(self, cmd: u32, name: &str) -> Self {
        let size = (24 + name.len() + 1 + 7) & !7;
        let mut out = Vec::new();
        self.u32(&mut out, cmd);
        self.u32(&mut out, size as u32);
        self.u32(&mut out, 24);
        self.u32(&mut out, 2);
        self.u32(&mut out, 0x0001_0000);
        self.u32(&mut out, 0x0001_0000);
        out.extend_from_slice(name.as_bytes());
        out.resize(size, 0);
        self.raw_command(&out)
    }

    /// Adds a symbol table. Each entry is `(name, n_type)`.
    pub fn symbols(mut self, symbols: &[(&str, u8)]) -> Self {
        let mut strtab = vec![0u8];
        let mut entries = Vec::new();
        for (i, (name, n_type)) in symbols.iter().enumerate() {
            let strx = strtab.len() as u32;
            strtab.extend_from_slice(name.as_bytes());
            strtab.push(0);

            self.u32(&mut entries, strx);
            entries.push(*n_type);
            entries.push(0);
            self.u16(&mut entries, 0);
            self.word(&mut entries, 0x1000 + i as u64 * 0x10);
        }
        let symoff = self.push_data(&entries);
        let stroff = self.push_data(&strtab);

        let mut out = Vec::new();
        self.u32(&mut out, LC_SYMTAB);
        self.u32(&mut out, 24);
        self.u32(&mut out, symoff);
        self.u32(&mut out, symbols.len() as u32);
        self.u32(&mut out, stroff);
        self.u32(&mut out, strtab.len() as u32);
        self.raw_command(&out)
    }

    /// Adds a linkedit-data style command pointing at `blob`.
    pub fn linkedit(mut self, cmd: u32, blob: &[u8]) -> Self {
        let dataoff = self.push_data(blob);
        let mut out = Vec::new();
        self.u32(&mut out, cmd);
        self.u32(&mut out, 16);
        self.u32(&mut out, dataoff);
        self.u32(&mut out, blob.len() as u32);
        self.raw_command(&out)
    }

    pub fn encryption(self, cryptid: u32) -> Self {
        let mut out = Vec::new();
        self.u32(&mut out, LC_ENCRYPTION_INFO_64);
        self.u32(&mut out, 24);
        self.u32(&mut out, DATA_START);
        self.u32(&mut out, 0);
        self.u32(&mut out, cryptid);
        self.u32(&mut out, 0);
        self.raw_command(&out)
    }

    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        let magic: u32 = if self.is64 { MH_MAGIC_64 } else { MH_MAGIC };
        self.u32(&mut out, magic);
        self.u32(&mut out, self.cputype);
        self.u32(&mut out, self.cpusubtype);
        self.u32(&mut out, self.filetype);
        self.u32(&mut out, self.ncmds_override.unwrap_or(self.ncmds));
        self.u32(&mut out, self.commands.len() as u32);
        self.u32(&mut out, self.flags);
        if self.is64 {
            self.u32(&mut out, 0);
        }
        out.extend_from_slice(&self.commands);
        assert!(out.len() <= DATA_START as usize, "load commands overflow data area");
        out.resize(DATA_START as usize, 0);
        out.extend_from_slice(&self.data);
        out
    }
}

/// Builds a big-endian `FAT_MAGIC` container from `(cputype, cpusubtype, image)`.
pub fn fat(slices: &[(u32, u32, Vec<u8>)]) -> Vec<u8> {
    const ALIGN: usize = 0x1000;

    let mut out = Vec::new();
    out.extend_from_slice(&FAT_MAGIC.to_be_bytes());
    out.extend_from_slice(&(slices.len() as u32).to_be_bytes());

    let mut offset = ALIGN;
    let mut placed = Vec::new();
    for (cputype, cpusubtype, image) in slices {
        out.extend_from_slice(&cputype.to_be_bytes());
        out.extend_from_slice(&cpusubtype.to_be_bytes());
        out.extend_from_slice(&(offset as u32).to_be_bytes());
        out.extend_from_slice(&(image.len() as u32).to_be_bytes());
        out.extend_from_slice(&12u32.to_be_bytes());
        placed.push(offset);
        offset += (image.len() + ALIGN - 1) / ALIGN * ALIGN;
    }

    for ((_, _, image), at) in slices.iter().zip(placed) {
        out.resize(at, 0);
        out.extend_from_slice(image);
    }
    out
}

/// Builds a big-endian CodeDirectory with one code slot.
pub fn code_directory(identifier: &str, version: u32) -> Vec<u8> {
    let header_size: u32 = if version >= 0x20200 {
        52
    } else if version >= 0x20100 {
        48
    } else {
        44
    };
    let ident_offset = header_size;
    let hash_offset = ident_offset + identifier.len() as u32 + 1;
    let length = hash_offset + 32;

    let mut out = Vec::new();
    for v in [
        CSMAGIC_CODEDIRECTORY,
        length,
        version,
        0,
        hash_offset,
        ident_offset,
        0,
        1,
        0x1000,
    ] {
        out.extend_from_slice(&v.to_be_bytes());
    }
    out.extend_from_slice(&[32, 2, 0, 12]);
    out.extend_from_slice(&0u32.to_be_bytes()); // spare2
    if version >= 0x20100 {
        out.extend_from_slice(&0u32.to_be_bytes()); // scatterOffset
    }
    if version >= 0x20200 {
        out.extend_from_slice(&0u32.to_be_bytes()); // teamOffset
    }
    out.extend_from_slice(identifier.as_bytes());
    out.push(0);
    out.extend_from_slice(&[0xAA; 32]);
    assert_eq!(out.len() as u32, length);
    out
}

/// Wraps a CodeDirectory in an embedded-signature SuperBlob.
pub fn superblob(code_directory: &[u8]) -> Vec<u8> {
    let cd_offset = 12 + 8;
    let length = cd_offset + code_directory.len() as u32;

    let mut out = Vec::new();
    out.extend_from_slice(&CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&1u32.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(&cd_offset.to_be_bytes());
    out.extend_from_slice(code_directory);
    out
}

/// A 64-bit executable with PIE and stack protector symbols.
pub fn hardened_executable() -> Vec<u8> {
    MachOBuilder::new64()
        .flags(MH_PIE | MH_NO_HEAP_EXECUTION)
        .segment(
            "__TEXT",
            5,
            5,
            &[SectionSpec::new(
                "__text",
                S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
                &[0xC3; 16],
            )],
        )
        .dylib(LC_LOAD_DYLIB, "/usr/lib/libSystem.B.dylib")
        .symbols(&[
            ("_main", N_SECT | N_EXT),
            ("___stack_chk_fail", N_EXT),
            ("___stack_chk_guard", N_EXT),
        ])
        .build()
}
