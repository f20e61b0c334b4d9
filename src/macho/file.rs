//! The parsed model of a single-architecture Mach-O image.

use serde::Serialize;
use tracing::warn;

use super::commands::{
    walk_load_commands, BuildVersion, CommandKind, EncryptionInfo, LinkeditData, LoadCommand,
};
use super::constants::*;
use super::dylib::Dylib;
use super::header::MachOHeader;
use super::segment::{Section, Segment};
use super::symbols::{Symbol, SymbolTable, SymtabInfo};
use crate::error::{Error, Result, Warning};
use crate::options::ParseLimits;
use crate::reader::BoundedReader;
use crate::util::read_uleb128;

/// A validated, immutable model of one Mach-O image.
///
/// The model owns everything it contains and keeps no reference to the bytes
/// it was parsed from. Accessors that need file contents take the image
/// reader as an argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachOFile {
    pub header: MachOHeader,
    /// Load commands in file order
    pub commands: Vec<LoadCommand>,
    /// Symbols with resolved names, in table order
    pub symbols: Vec<Symbol>,
    /// Non-fatal problems found while parsing
    pub warnings: Vec<Warning>,
}

impl MachOFile {
    /// Parses a thin image with default limits.
    pub fn parse(data: &[u8]) -> Result<Self> {
        Self::parse_with(&BoundedReader::new(data), &ParseLimits::default())
    }

    /// Parses the thin image at the start of `image`.
    pub fn parse_with(image: &BoundedReader<'_>, limits: &ParseLimits) -> Result<Self> {
        let header = MachOHeader::parse(image, limits)?;

        let mut warnings = Vec::new();
        let commands = walk_load_commands(image, &header, &mut warnings)?;

        let mut file = Self {
            header,
            commands,
            symbols: Vec::new(),
            warnings,
        };

        if let Some(symtab) = file.symtab().copied() {
            match SymbolTable::read(image, &file.header, &symtab, limits) {
                Ok(table) => {
                    if table.skipped > 0 {
                        file.warnings.push(Warning::SymbolsSkipped {
                            count: table.skipped,
                        });
                    }
                    file.symbols = table.symbols;
                }
                Err(e) => {
                    warn!("symbol table unreadable: {}", e);
                    file.warnings.push(Warning::SymbolTableUnreadable {
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(file)
    }

    // =========================================================================
    // Commands
    // =========================================================================

    /// Returns the first command with the given type.
    pub fn find_command(&self, cmd: u32) -> Option<&LoadCommand> {
        self.commands.iter().find(|c| c.cmd == cmd)
    }

    /// Returns true if any command has the given type.
    pub fn has_command(&self, cmd: u32) -> bool {
        self.find_command(cmd).is_some()
    }

    /// Iterates over all segments.
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.commands.iter().filter_map(|c| match &c.kind {
            CommandKind::Segment(seg) => Some(seg),
            _ => None,
        })
    }

    /// Returns a segment by name.
    pub fn segment(&self, name: &str) -> Option<&Segment> {
        self.segments().find(|s| s.name == name)
    }

    /// Iterates over all sections with their segments.
    pub fn sections(&self) -> impl Iterator<Item = (&Segment, &Section)> {
        self.segments()
            .flat_map(|seg| seg.sections.iter().map(move |sect| (seg, sect)))
    }

    /// Returns a section by segment and section name.
    ///
    /// Every segment with that name is searched, in load command order.
    pub fn section(&self, segment: &str, section: &str) -> Option<&Section> {
        self.segments()
            .filter(|s| s.name == segment)
            .find_map(|s| s.section(section))
    }

    /// The `LC_SYMTAB` command, if present and well-formed.
    pub fn symtab(&self) -> Option<&SymtabInfo> {
        self.commands.iter().find_map(|c| match &c.kind {
            CommandKind::Symtab(info) => Some(info),
            _ => None,
        })
    }

    /// Iterates over every dylib command, including `LC_ID_DYLIB`.
    pub fn all_dylibs(&self) -> impl Iterator<Item = &Dylib> {
        self.commands.iter().filter_map(|c| match &c.kind {
            CommandKind::Dylib(d) => Some(d),
            _ => None,
        })
    }

    /// Iterates over libraries this image links against.
    pub fn dylibs(&self) -> impl Iterator<Item = &Dylib> {
        self.all_dylibs().filter(|d| d.is_linked())
    }

    /// The image's own install name, for dylibs.
    pub fn id_dylib(&self) -> Option<&Dylib> {
        self.all_dylibs().find(|d| !d.is_linked())
    }

    /// Runtime search paths.
    pub fn rpaths(&self) -> impl Iterator<Item = &str> {
        self.commands.iter().filter_map(|c| match &c.kind {
            CommandKind::Rpath { path } => Some(path.as_str()),
            _ => None,
        })
    }

    /// The image UUID.
    pub fn uuid(&self) -> Option<&[u8; 16]> {
        self.commands.iter().find_map(|c| match &c.kind {
            CommandKind::Uuid(uuid) => Some(uuid),
            _ => None,
        })
    }

    /// `LC_MAIN` entry offset and stack size.
    pub fn entry_point(&self) -> Option<(u64, u64)> {
        self.commands.iter().find_map(|c| match c.kind {
            CommandKind::EntryPoint {
                entryoff,
                stacksize,
            } => Some((entryoff, stacksize)),
            _ => None,
        })
    }

    /// The code signature location.
    pub fn code_signature(&self) -> Option<LinkeditData> {
        self.commands.iter().find_map(|c| match c.kind {
            CommandKind::CodeSignature(data) => Some(data),
            _ => None,
        })
    }

    /// Encryption info, if any.
    pub fn encryption_info(&self) -> Option<EncryptionInfo> {
        self.commands.iter().find_map(|c| match c.kind {
            CommandKind::EncryptionInfo(info) => Some(info),
            _ => None,
        })
    }

    /// Build version, if any.
    pub fn build_version(&self) -> Option<&BuildVersion> {
        self.commands.iter().find_map(|c| match &c.kind {
            CommandKind::BuildVersion(bv) => Some(bv),
            _ => None,
        })
    }

    // =========================================================================
    // Symbols
    // =========================================================================

    /// Iterates over resolved symbol names.
    pub fn symbol_names(&self) -> impl Iterator<Item = &str> {
        self.symbols.iter().map(|s| s.name.as_str())
    }

    /// Returns true if a symbol with exactly this name exists.
    pub fn has_symbol(&self, name: &str) -> bool {
        self.symbols.iter().any(|s| s.name == name)
    }

    /// Iterates over external undefined symbols.
    pub fn imports(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols
            .iter()
            .filter(|s| s.is_external() && s.is_undefined())
    }

    // =========================================================================
    // Contents
    // =========================================================================

    /// Decodes `LC_FUNCTION_STARTS` into function addresses.
    ///
    /// Returns `Ok(None)` when the image has no such command. Addresses are
    /// the `__TEXT` base plus the running sum of ULEB128 deltas; a zero delta
    /// ends the list.
    pub fn function_starts(&self, image: &BoundedReader<'_>) -> Result<Option<Vec<u64>>> {
        let Some(data) = self.commands.iter().find_map(|c| match c.kind {
            CommandKind::FunctionStarts(data) => Some(data),
            _ => None,
        }) else {
            return Ok(None);
        };

        let blob = image.read_at(data.dataoff as u64, data.datasize as u64)?;
        let mut address = self.segment("__TEXT").map(|s| s.vmaddr).unwrap_or(0);
        let mut starts = Vec::new();
        let mut pos = 0;

        while pos < blob.len() {
            let (delta, used) = read_uleb128(&blob[pos..]).ok_or_else(|| {
                Error::truncated(image.absolute(data.dataoff as u64 + pos as u64), 1, 0)
            })?;
            if delta == 0 {
                break;
            }
            address = address.wrapping_add(delta);
            starts.push(address);
            pos += used;
        }

        Ok(Some(starts))
    }

    /// Returns the contents of a section, empty when it has none.
    pub fn section_data<'a>(
        &self,
        image: &BoundedReader<'a>,
        segment: &str,
        section: &str,
    ) -> Result<&'a [u8]> {
        match self.section(segment, section) {
            Some(sect) => sect.data(image),
            None => Ok(&[]),
        }
    }

    /// Returns true if this is an executable (as opposed to a library or object).
    pub fn is_executable(&self) -> bool {
        self.header.filetype == MH_EXECUTE
    }
}
