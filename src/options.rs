//! Analysis configuration.

/// Upper bounds applied before any allocation sized by file-declared values.
///
/// Every count or size read from a header is checked against one of these and
/// against the bytes actually available, whichever is hit first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseLimits {
    /// Largest file that will be mapped.
    pub max_file_size: u64,
    /// Most architectures accepted in a fat container.
    pub max_fat_arches: u32,
    /// Largest `sizeofcmds` accepted.
    pub max_load_commands_size: u32,
    /// Most symbol table entries read.
    pub max_symbols: u32,
    /// Largest string table read.
    pub max_string_table_size: u32,
    /// Largest code signature blob read.
    pub max_signature_size: u32,
}

impl Default for ParseLimits {
    fn default() -> Self {
        Self {
            max_file_size: 4 << 30,
            max_fat_arches: 64,
            max_load_commands_size: 16 << 20,
            max_symbols: 4 << 20,
            max_string_table_size: 256 << 20,
            max_signature_size: 64 << 20,
        }
    }
}

/// Options for a full analysis run.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    /// Resource limits for parsing.
    pub limits: ParseLimits,
    /// Analyze fat slices on the rayon pool
    pub parallel: bool,
    /// Match symbols against the unsafe API catalog
    pub scan_unsafe_apis: bool,
    /// Parse and hash the embedded CodeDirectory
    pub verify_signature: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            limits: ParseLimits::default(),
            parallel: true,
            scan_unsafe_apis: true,
            verify_signature: true,
        }
    }
}
