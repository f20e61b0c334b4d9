//! Catalog of historically unsafe C library functions.

use std::collections::HashMap;
use std::fmt;

use serde::{Serialize, Serializer};
use tracing::debug;

use crate::macho::MachOFile;

/// How much attention a match deserves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

/// What kind of operation a cataloged function performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCategory {
    StringOperation,
    InputOperation,
    MemoryOperation,
    MemoryAllocation,
    MemoryDeallocation,
    FileOperation,
    RandomNumberGeneration,
    NetworkOperation,
    ProcessExecution,
    ThreadManagement,
}

impl fmt::Display for ApiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            ApiCategory::StringOperation => "string operation",
            ApiCategory::InputOperation => "input operation",
            ApiCategory::MemoryOperation => "memory operation",
            ApiCategory::MemoryAllocation => "memory allocation",
            ApiCategory::MemoryDeallocation => "memory deallocation",
            ApiCategory::FileOperation => "file operation",
            ApiCategory::RandomNumberGeneration => "random number generation",
            ApiCategory::NetworkOperation => "network operation",
            ApiCategory::ProcessExecution => "process execution",
            ApiCategory::ThreadManagement => "thread management",
        })
    }
}

impl Serialize for ApiCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A cataloged function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnsafeApi {
    pub name: &'static str,
    pub category: ApiCategory,
    pub severity: Severity,
}

/// A symbol that matched the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnsafeApiFinding {
    /// Symbol name as it appears in the image
    pub symbol: String,
    /// Catalog entry it matched
    pub function: &'static str,
    pub category: ApiCategory,
    pub severity: Severity,
}

use ApiCategory::*;
use Severity::*;

const BUILTIN: &[(&str, ApiCategory, Severity)] = &[
    // Strings
    ("strcpy", StringOperation, High),
    ("strncpy", StringOperation, Medium),
    ("sprintf", StringOperation, High),
    ("snprintf", StringOperation, Medium),
    ("vsprintf", StringOperation, High),
    ("vsnprintf", StringOperation, Medium),
    ("strcat", StringOperation, Medium),
    ("strncat", StringOperation, Medium),
    ("stpcpy", StringOperation, Medium),
    ("strtok", StringOperation, Low),
    ("strncpy_s", StringOperation, Low),
    ("asprintf", StringOperation, Medium),
    ("vasprintf", StringOperation, Medium),
    // Input
    ("gets", InputOperation, High),
    ("fgets", InputOperation, Medium),
    ("scanf", InputOperation, Medium),
    ("sscanf", InputOperation, Medium),
    // Raw memory
    ("memcpy", MemoryOperation, Medium),
    ("memmove", MemoryOperation, Medium),
    ("memset", MemoryOperation, Medium),
    ("bcopy", MemoryOperation, High),
    ("bzero", MemoryOperation, High),
    // Allocation
    ("malloc", MemoryAllocation, Low),
    ("realloc", MemoryAllocation, Low),
    ("calloc", MemoryAllocation, Low),
    ("strdup", MemoryAllocation, Medium),
    ("alloca", MemoryAllocation, High),
    ("valloc", MemoryAllocation, Medium),
    ("posix_memalign", MemoryAllocation, Low),
    ("free", MemoryDeallocation, Low),
    // Files
    ("fopen", FileOperation, Low),
    ("fclose", FileOperation, Low),
    ("fread", FileOperation, Medium),
    ("fwrite", FileOperation, Medium),
    // Randomness
    ("rand", RandomNumberGeneration, Medium),
    ("srand", RandomNumberGeneration, Medium),
    ("drand48", RandomNumberGeneration, Medium),
    ("lrand48", RandomNumberGeneration, Medium),
    ("random", RandomNumberGeneration, Medium),
    // Network
    ("gethostbyname", NetworkOperation, High),
    ("gethostbyaddr", NetworkOperation, High),
    ("inet_ntoa", NetworkOperation, Medium),
    ("inet_aton", NetworkOperation, Medium),
    ("getaddrinfo", NetworkOperation, Medium),
    ("getnameinfo", NetworkOperation, Medium),
    // Processes
    ("system", ProcessExecution, High),
    ("popen", ProcessExecution, High),
    ("exec", ProcessExecution, High),
    ("execl", ProcessExecution, High),
    ("execle", ProcessExecution, High),
    ("execlp", ProcessExecution, High),
    ("execv", ProcessExecution, High),
    ("execvp", ProcessExecution, High),
    ("execve", ProcessExecution, High),
    // Threads
    ("pthread_create", ThreadManagement, Medium),
    ("pthread_exit", ThreadManagement, Medium),
    ("pthread_cancel", ThreadManagement, Medium),
];

/// Lookup table from function name to catalog entry.
///
/// Build it once and share it by reference across files and slices.
#[derive(Debug, Clone)]
pub struct UnsafeApiCatalog {
    entries: HashMap<&'static str, UnsafeApi>,
}

impl Default for UnsafeApiCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl UnsafeApiCatalog {
    /// Creates the built-in catalog.
    pub fn new() -> Self {
        let mut catalog = Self::empty();
        for &(name, category, severity) in BUILTIN {
            catalog.insert(UnsafeApi {
                name,
                category,
                severity,
            });
        }
        catalog
    }

    /// Creates a catalog with no entries.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Adds or replaces an entry.
    pub fn insert(&mut self, api: UnsafeApi) {
        self.entries.insert(api.name, api);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a symbol name as found in a symbol table.
    ///
    /// One leading underscore is stripped and the result is tried as is.
    /// Failing that, the name is normalized: all leading underscores, any
    /// `$` variant suffix (`fopen$UNIX2003`) and a trailing `_chk` fortify
    /// suffix are removed.
    pub fn lookup(&self, symbol: &str) -> Option<&UnsafeApi> {
        let stripped = symbol.strip_prefix('_').unwrap_or(symbol);
        if let Some(api) = self.entries.get(stripped) {
            return Some(api);
        }

        let normalized = normalize(stripped);
        if normalized.is_empty() || normalized == stripped {
            return None;
        }
        self.entries.get(normalized)
    }

    /// Matches every symbol of `file` against the catalog.
    ///
    /// Each matching symbol yields one finding, in symbol table order.
    pub fn scan(&self, file: &MachOFile) -> Vec<UnsafeApiFinding> {
        let findings: Vec<_> = file
            .symbol_names()
            .filter_map(|symbol| {
                self.lookup(symbol).map(|api| UnsafeApiFinding {
                    symbol: symbol.to_string(),
                    function: api.name,
                    category: api.category,
                    severity: api.severity,
                })
            })
            .collect();

        debug!("{} unsafe API references", findings.len());
        findings
    }
}

fn normalize(name: &str) -> &str {
    let name = name.trim_start_matches('_');
    let name = name.split('$').next().unwrap_or(name);
    name.strip_suffix("_chk").unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{MachOBuilder, N_EXT, N_SECT};

    #[test]
    fn test_strcpy_is_high_string_operation() {
        let image = MachOBuilder::new64().symbols(&[("_strcpy", N_EXT)]).build();
        let file = MachOFile::parse(&image).unwrap();
        let findings = UnsafeApiCatalog::new().scan(&file);

        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].symbol, "_strcpy");
        assert_eq!(findings[0].function, "strcpy");
        assert_eq!(findings[0].category.to_string(), "string operation");
        assert_eq!(findings[0].severity, Severity::High);
    }

    #[test]
    fn test_lookup_normalization() {
        let catalog = UnsafeApiCatalog::new();

        assert_eq!(catalog.lookup("_gets").map(|a| a.name), Some("gets"));
        assert_eq!(catalog.lookup("gets").map(|a| a.name), Some("gets"));
        assert_eq!(catalog.lookup("_fopen$UNIX2003").map(|a| a.name), Some("fopen"));
        assert_eq!(catalog.lookup("___strcpy_chk").map(|a| a.name), Some("strcpy"));
        assert_eq!(catalog.lookup("_strncpy_s").map(|a| a.name), Some("strncpy_s"));
        assert!(catalog.lookup("_main").is_none());
        assert!(catalog.lookup("_").is_none());
        assert!(catalog.lookup("").is_none());
    }

    #[test]
    fn test_no_deduplication() {
        let image = MachOBuilder::new64()
            .symbols(&[
                ("_memcpy", N_EXT),
                ("_main", N_SECT | N_EXT),
                ("_memcpy", N_EXT),
            ])
            .build();
        let file = MachOFile::parse(&image).unwrap();
        let findings = UnsafeApiCatalog::new().scan(&file);

        assert_eq!(findings.len(), 2);
        assert!(findings.iter().all(|f| f.function == "memcpy"));
    }

    #[test]
    fn test_custom_catalog() {
        let mut catalog = UnsafeApiCatalog::empty();
        assert!(catalog.is_empty());
        catalog.insert(UnsafeApi {
            name: "main",
            category: ApiCategory::ProcessExecution,
            severity: Severity::Low,
        });
        assert_eq!(catalog.len(), 1);
        assert!(catalog.lookup("_main").is_some());
        assert!(catalog.lookup("_strcpy").is_none());
    }

    #[test]
    fn test_category_serializes_as_text() {
        let json = serde_json::to_string(&ApiCategory::RandomNumberGeneration).unwrap();
        assert_eq!(json, "\"random number generation\"");
        assert!(Severity::High > Severity::Low);
    }
}
