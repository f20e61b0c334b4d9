//! Symbol table loading and name resolution.

use serde::Serialize;
use tracing::debug;

use super::constants::*;
use super::header::{MachOHeader, WordWidth};
use super::structs::{Nlist32, Nlist64, SymtabCommand};
use crate::error::{Error, Result};
use crate::options::ParseLimits;
use crate::reader::BoundedReader;
use crate::util::cstr_lossy;

/// Location of the symbol and string tables, from `LC_SYMTAB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SymtabInfo {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl From<SymtabCommand> for SymtabInfo {
    fn from(cmd: SymtabCommand) -> Self {
        Self {
            symoff: cmd.symoff,
            nsyms: cmd.nsyms,
            stroff: cmd.stroff,
            strsize: cmd.strsize,
        }
    }
}

/// A symbol with its name resolved from the string table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Symbol {
    pub name: String,
    pub value: u64,
    /// Raw `n_type` byte
    pub n_type: u8,
    /// Section ordinal, or 0 for NO_SECT
    pub n_sect: u8,
    pub n_desc: u16,
}

impl Symbol {
    /// Returns true for debugger (stab) entries.
    #[inline]
    pub fn is_debug(&self) -> bool {
        self.n_type & N_STAB != 0
    }

    /// Returns true if the external bit is set.
    #[inline]
    pub fn is_external(&self) -> bool {
        self.n_type & N_EXT != 0
    }

    /// Returns true if the private external bit is set.
    #[inline]
    pub fn is_private_external(&self) -> bool {
        self.n_type & N_PEXT != 0
    }

    /// Returns true for undefined (imported) symbols.
    #[inline]
    pub fn is_undefined(&self) -> bool {
        !self.is_debug() && self.n_type & N_TYPE == N_UNDF
    }

    /// Returns true for symbols defined in a section.
    #[inline]
    pub fn is_defined(&self) -> bool {
        !self.is_debug() && self.n_type & N_TYPE == N_SECT
    }

    /// Short description of the symbol type.
    pub fn type_name(&self) -> &'static str {
        if self.is_debug() {
            return "stab";
        }
        match self.n_type & N_TYPE {
            N_UNDF => "undefined",
            N_ABS => "absolute",
            N_SECT => "section",
            N_INDR => "indirect",
            _ => "other",
        }
    }
}

/// Symbols read from a symbol table, plus the count of entries dropped.
#[derive(Debug, Default)]
pub struct SymbolTable {
    pub symbols: Vec<Symbol>,
    /// Entries whose string index was outside the string table
    pub skipped: u32,
}

impl SymbolTable {
    /// Reads the tables described by `symtab` from `image`.
    ///
    /// Both tables are read with bounded positioned reads. A string index at
    /// or past `strsize` drops that one symbol.
    pub fn read(
        image: &BoundedReader<'_>,
        header: &MachOHeader,
        symtab: &SymtabInfo,
        limits: &ParseLimits,
    ) -> Result<Self> {
        if symtab.nsyms > limits.max_symbols {
            return Err(Error::AllocationLimitExceeded {
                offset: image.absolute(symtab.symoff as u64),
                what: "symbol table",
                requested: symtab.nsyms as u64,
                limit: limits.max_symbols as u64,
            });
        }
        if symtab.strsize > limits.max_string_table_size {
            return Err(Error::AllocationLimitExceeded {
                offset: image.absolute(symtab.stroff as u64),
                what: "string table",
                requested: symtab.strsize as u64,
                limit: limits.max_string_table_size as u64,
            });
        }

        let entry_size = match header.width {
            WordWidth::Bits32 => Nlist32::SIZE as u64,
            WordWidth::Bits64 => Nlist64::SIZE as u64,
        };
        let entries = image.sub_reader(symtab.symoff as u64, symtab.nsyms as u64 * entry_size)?;
        let strtab = image.read_at(symtab.stroff as u64, symtab.strsize as u64)?;

        let mut table = SymbolTable {
            symbols: Vec::with_capacity(symtab.nsyms as usize),
            skipped: 0,
        };

        for i in 0..symtab.nsyms as u64 {
            let offset = i * entry_size;
            let (n_strx, n_type, n_sect, n_desc, value) = match header.width {
                WordWidth::Bits32 => {
                    let n: Nlist32 = entries.read_struct(offset, header.endian)?;
                    (n.n_strx, n.n_type, n.n_sect, n.n_desc, n.n_value as u64)
                }
                WordWidth::Bits64 => {
                    let n: Nlist64 = entries.read_struct(offset, header.endian)?;
                    (n.n_strx, n.n_type, n.n_sect, n.n_desc, n.n_value)
                }
            };

            // strtab.len() == strsize
            if n_strx >= symtab.strsize {
                table.skipped += 1;
                continue;
            }

            table.symbols.push(Symbol {
                name: cstr_lossy(&strtab[n_strx as usize..]),
                value,
                n_type,
                n_sect,
                n_desc,
            });
        }

        debug!(
            "read {} symbols ({} skipped), {} byte string table",
            table.symbols.len(),
            table.skipped,
            symtab.strsize
        );

        Ok(table)
    }
}
