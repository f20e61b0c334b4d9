//! machscope - A hardened Mach-O inspector and security-posture analyzer.
//!
//! This library parses thin and fat Mach-O binaries from untrusted input and
//! reports on their structure and exploit mitigations. Every offset, count and
//! size read from the file is validated before it is used, so truncated or
//! hostile files produce errors instead of panics.
//!
//! # Features
//!
//! - Memory-mapped input with resource limits
//! - 32/64-bit images in either byte order, and fat containers
//! - Load commands, segments, sections, symbols, dylibs
//! - ASLR/DEP/stack canary/sandbox/entitlement detection
//! - Unsafe C library API scanning
//! - CodeDirectory consistency checks and SHA-256 digest
//! - Parallel analysis of fat slices
//!
//! # Example
//!
//! ```no_run
//! use machscope::{analyze_path, FileReport};
//!
//! fn main() -> machscope::Result<()> {
//!     let report = analyze_path("/bin/ls")?;
//!
//!     for (arch, analysis) in report.analyses() {
//!         println!("{arch}: PIE={}", analysis.posture.aslr);
//!     }
//!
//!     if let FileReport::Fat(fat) = &report {
//!         for (arch, err) in fat.failed() {
//!             eprintln!("{}: {err}", arch.arch_name());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod classify;
pub mod error;
pub mod fat;
pub mod macho;
pub mod options;
pub mod reader;
pub mod report;
pub mod security;
pub mod util;

// Lets the shared test builder name this crate the same way in unit and
// integration tests.
#[cfg(test)]
extern crate self as machscope;

#[cfg(test)]
#[path = "../tests/common/mod.rs"]
pub(crate) mod testutil;

// Re-export main types
pub use error::{Error, Result, Warning};
pub use fat::{FatArchEntry, FatReport, SliceResult};
pub use macho::MachOFile;
pub use options::{AnalysisOptions, ParseLimits};
pub use report::{Analysis, FileReport};
pub use security::{SecurityPosture, SignatureStatus, UnsafeApiCatalog};

use std::path::Path;

use macho::Container;
use reader::{BoundedReader, ByteSource};

/// Analyzes files with a fixed set of options and a shared API catalog.
///
/// Create one and reuse it across files; it holds no per-file state.
#[derive(Debug, Clone, Default)]
pub struct Analyzer {
    options: AnalysisOptions,
    catalog: UnsafeApiCatalog,
}

impl Analyzer {
    /// Creates an analyzer with the built-in unsafe API catalog.
    pub fn new(options: AnalysisOptions) -> Self {
        Self::with_catalog(options, UnsafeApiCatalog::new())
    }

    /// Creates an analyzer with a custom catalog.
    pub fn with_catalog(options: AnalysisOptions, catalog: UnsafeApiCatalog) -> Self {
        Self { options, catalog }
    }

    /// The options in effect.
    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Analyzes an in-memory thin or fat binary.
    pub fn analyze_bytes(&self, data: &[u8]) -> Result<FileReport> {
        self.analyze_reader(&BoundedReader::new(data))
    }

    /// Maps and analyzes the file at `path`.
    pub fn analyze_path<P: AsRef<Path>>(&self, path: P) -> Result<FileReport> {
        let source = ByteSource::open(path, self.options.limits.max_file_size)?;
        self.analyze_bytes(source.as_bytes())
    }

    fn analyze_reader(&self, reader: &BoundedReader<'_>) -> Result<FileReport> {
        match Container::detect(reader)? {
            Container::Thin { .. } => Ok(FileReport::Thin(Analysis::run(
                reader,
                &self.options,
                &self.catalog,
            )?)),
            Container::Fat { wide, endian } => Ok(FileReport::Fat(fat::analyze_fat(
                reader,
                wide,
                endian,
                &self.options,
                &self.catalog,
            )?)),
        }
    }
}

/// Analyzes an in-memory binary with default options.
pub fn analyze_bytes(data: &[u8]) -> Result<FileReport> {
    Analyzer::default().analyze_bytes(data)
}

/// Analyzes the file at `path` with default options.
pub fn analyze_path<P: AsRef<Path>>(path: P) -> Result<FileReport> {
    Analyzer::default().analyze_path(path)
}
