//! Per-image analysis results.

use serde::Serialize;
use tracing::{debug, warn};

use crate::error::Result;
use crate::fat::FatReport;
use crate::macho::MachOFile;
use crate::options::AnalysisOptions;
use crate::reader::BoundedReader;
use crate::security::{
    check_code_signature, check_sections, SectionFinding, SecurityPosture, SignatureStatus,
    UnsafeApiCatalog, UnsafeApiFinding,
};

/// Everything learned about one single-architecture image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Analysis {
    pub macho: MachOFile,
    pub posture: SecurityPosture,
    pub signature: SignatureStatus,
    pub unsafe_apis: Vec<UnsafeApiFinding>,
    pub section_findings: Vec<SectionFinding>,
    /// Decoded `LC_FUNCTION_STARTS`, when present and readable
    pub function_starts: Option<Vec<u64>>,
}

impl Analysis {
    /// Parses and analyzes the thin image spanning `image`.
    ///
    /// Only parsing failures are errors. The analyses that follow record
    /// their problems in the result.
    pub fn run(
        image: &BoundedReader<'_>,
        options: &AnalysisOptions,
        catalog: &UnsafeApiCatalog,
    ) -> Result<Self> {
        let macho = MachOFile::parse_with(image, &options.limits)?;
        debug!(
            "{} {} with {} commands, {} symbols",
            macho.header.arch_name(),
            macho.header.file_type_name(),
            macho.commands.len(),
            macho.symbols.len()
        );

        let signature = if options.verify_signature {
            check_code_signature(&macho, image, &options.limits)
        } else {
            SignatureStatus::Absent
        };

        let unsafe_apis = if options.scan_unsafe_apis {
            catalog.scan(&macho)
        } else {
            Vec::new()
        };

        let function_starts = match macho.function_starts(image) {
            Ok(starts) => starts,
            Err(e) => {
                warn!("function starts unreadable: {}", e);
                None
            }
        };

        Ok(Self {
            posture: SecurityPosture::analyze(&macho),
            section_findings: check_sections(&macho),
            signature,
            unsafe_apis,
            function_starts,
            macho,
        })
    }
}

/// Result of analyzing one file.
#[derive(Debug, Serialize)]
#[serde(tag = "container", rename_all = "snake_case")]
pub enum FileReport {
    /// A single-architecture image.
    Thin(Analysis),
    /// A fat container with one result per architecture.
    Fat(FatReport),
}

impl FileReport {
    /// Successfully analyzed images with their architecture names.
    pub fn analyses(&self) -> Vec<(&'static str, &Analysis)> {
        match self {
            FileReport::Thin(analysis) => vec![(analysis.macho.header.arch_name(), analysis)],
            FileReport::Fat(fat) => fat
                .slices
                .iter()
                .filter_map(|s| s.result.as_ref().ok().map(|a| (s.arch.arch_name(), a)))
                .collect(),
        }
    }

    /// Returns true if this is a fat container.
    pub fn is_fat(&self) -> bool {
        matches!(self, FileReport::Fat(_))
    }
}
