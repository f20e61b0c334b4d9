//! Mach-O file format handling.
//!
//! This module turns the bytes of a single-architecture image into a
//! [`MachOFile`]: header, load commands, segments and sections, symbols and
//! linked libraries. Fat containers are handled by [`crate::fat`], which
//! calls into here once per slice.

mod commands;
mod constants;
mod dylib;
mod file;
mod header;
mod segment;
mod structs;
mod symbols;

pub use commands::*;
pub use constants::*;
pub use dylib::{Dylib, DylibKind};
pub use file::MachOFile;
pub use header::{Container, MachOHeader, WordWidth};
pub use segment::{Section, Segment};
pub use structs::*;
pub use symbols::{Symbol, SymbolTable, SymtabInfo};
