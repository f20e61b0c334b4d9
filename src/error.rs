//! Error types for the Mach-O inspector.
//!
//! Fatal conditions are reported through [`Error`]. Conditions that leave the
//! parsed model usable (a single malformed command, a symbol table that could
//! not be read) are recorded as [`Warning`]s on the model instead.
//!
//! Errors raised while decoding the body of a single load command are
//! localized by the command walker: the command is kept as malformed and the
//! walk continues. Only a `cmdsize` that breaks offset tracking aborts it.
//!
//! Every variant that originates from file content carries the absolute byte
//! offset at which the problem was detected.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// The main error type for Mach-O inspection.
#[derive(Error, Debug)]
pub enum Error {
    // ==================== I/O Errors ====================
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to open file '{path}': {source}")]
    FileOpen {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to memory map file '{path}': {source}")]
    MemoryMap {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ==================== Format Errors ====================
    #[error("unsupported format at offset {offset:#x}{}", fmt_magic(.magic))]
    UnsupportedFormat { offset: u64, magic: Option<u32> },

    #[error("invalid Mach-O header at offset {offset:#x}: {reason}")]
    InvalidHeader { offset: u64, reason: String },

    #[error("fat binary nested inside fat slice at offset {offset:#x}")]
    NestedFatBinary { offset: u64 },

    // ==================== Bounds Errors ====================
    #[error("load command {cmd:#x} at offset {offset:#x} has invalid size {cmdsize}")]
    TruncatedCommand { offset: u64, cmd: u32, cmdsize: u32 },

    #[error("malformed load command at offset {offset:#x}: {reason}")]
    MalformedCommand { offset: u64, reason: String },

    #[error("truncated data at offset {offset:#x}: need {needed} bytes, have {available}")]
    TruncatedData {
        offset: u64,
        needed: u64,
        available: u64,
    },

    #[error("{what} at offset {offset:#x} requests {requested}, limit is {limit}")]
    AllocationLimitExceeded {
        offset: u64,
        what: &'static str,
        requested: u64,
        limit: u64,
    },

    // ==================== Signature Errors ====================
    #[error("inconsistent code signature at offset {offset:#x}: {reason}")]
    SignatureInconsistent { offset: u64, reason: String },
}

fn fmt_magic(magic: &Option<u32>) -> String {
    match magic {
        Some(m) => format!(" (magic {m:#010x})"),
        None => " (fewer than 4 bytes)".to_string(),
    }
}

/// A specialized Result type for Mach-O inspection.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Returns the file offset the error refers to, when it has one.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::UnsupportedFormat { offset, .. }
            | Error::InvalidHeader { offset, .. }
            | Error::NestedFatBinary { offset }
            | Error::TruncatedCommand { offset, .. }
            | Error::MalformedCommand { offset, .. }
            | Error::TruncatedData { offset, .. }
            | Error::AllocationLimitExceeded { offset, .. }
            | Error::SignatureInconsistent { offset, .. } => Some(*offset),
            Error::Io(_) | Error::FileOpen { .. } | Error::MemoryMap { .. } => None,
        }
    }

    /// Creates an invalid header error.
    #[inline]
    pub fn invalid_header(offset: u64, reason: impl Into<String>) -> Self {
        Error::InvalidHeader {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a malformed command error.
    #[inline]
    pub fn malformed(offset: u64, reason: impl Into<String>) -> Self {
        Error::MalformedCommand {
            offset,
            reason: reason.into(),
        }
    }

    /// Creates a truncated data error.
    #[inline]
    pub fn truncated(offset: u64, needed: u64, available: u64) -> Self {
        Error::TruncatedData {
            offset,
            needed,
            available,
        }
    }

    /// Creates an inconsistent signature error.
    #[inline]
    pub fn signature(offset: u64, reason: impl Into<String>) -> Self {
        Error::SignatureInconsistent {
            offset,
            reason: reason.into(),
        }
    }
}

/// Serializes an error as its display string.
pub(crate) fn serialize_error<S: serde::Serializer>(
    error: &Error,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(error)
}

/// A non-fatal condition found while parsing.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    #[error("load commands consumed {consumed} bytes but header declares {declared}")]
    CommandSizeMismatch { declared: u32, consumed: u64 },

    #[error("header declares {declared} load commands but only {parsed} fit in sizeofcmds")]
    CommandCountMismatch { declared: u32, parsed: u32 },

    #[error("load command #{index} ({cmd:#x}) at offset {offset:#x} skipped: {reason}")]
    CommandSkipped {
        index: u32,
        offset: u64,
        cmd: u32,
        reason: String,
    },

    #[error("symbol table unreadable: {reason}")]
    SymbolTableUnreadable { reason: String },

    #[error("{count} symbols skipped: string index beyond string table")]
    SymbolsSkipped { count: u32 },
}
