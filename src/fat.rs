//! Fat (universal) container dispatch.
//!
//! A fat file is a big-endian header and architecture table followed by
//! independent thin images. Each slice is analyzed on its own; a slice that
//! fails is reported in its entry and does not affect its siblings.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{serialize_error, Error, Result};
use crate::macho::{self, Container, FatArch, FatArch64, FatHeader};
use crate::options::{AnalysisOptions, ParseLimits};
use crate::reader::BoundedReader;
use crate::report::Analysis;
use crate::security::UnsafeApiCatalog;
use crate::util::Endian;

/// One entry of the fat architecture table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FatArchEntry {
    pub cputype: u32,
    pub cpusubtype: u32,
    /// File offset of the slice
    pub offset: u64,
    pub size: u64,
    /// log2 alignment
    pub align: u32,
}

impl FatArchEntry {
    /// Human-readable architecture name.
    pub fn arch_name(&self) -> &'static str {
        macho::arch_name(self.cputype, self.cpusubtype)
    }
}

/// The decoded fat header and architecture table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FatBinary {
    /// `FAT_MAGIC_64` layout
    pub wide: bool,
    pub endian: Endian,
    pub arches: Vec<FatArchEntry>,
}

impl FatBinary {
    /// Reads the architecture table.
    ///
    /// `nfat_arch` is checked against the limit and against the file size
    /// before any entry is read. Slice ranges are not validated here.
    pub fn parse(
        reader: &BoundedReader<'_>,
        wide: bool,
        endian: Endian,
        limits: &ParseLimits,
    ) -> Result<Self> {
        let header: FatHeader = reader.read_struct(0, endian)?;
        let count = header.nfat_arch;

        if count == 0 {
            return Err(Error::invalid_header(
                reader.base(),
                "fat container lists no architectures",
            ));
        }
        if count > limits.max_fat_arches {
            return Err(Error::AllocationLimitExceeded {
                offset: reader.absolute(4),
                what: "fat architecture table",
                requested: count as u64,
                limit: limits.max_fat_arches as u64,
            });
        }

        let entry_size = if wide { FatArch64::SIZE } else { FatArch::SIZE } as u64;
        let table_size = count as u64 * entry_size;
        if !reader.contains(FatHeader::SIZE as u64, table_size) {
            return Err(Error::truncated(
                reader.absolute(FatHeader::SIZE as u64),
                table_size,
                reader.len().saturating_sub(FatHeader::SIZE as u64),
            ));
        }

        let arches = (0..count as u64)
            .map(|i| {
                let at = FatHeader::SIZE as u64 + i * entry_size;
                Ok(if wide {
                    let raw: FatArch64 = reader.read_struct(at, endian)?;
                    FatArchEntry {
                        cputype: raw.cputype,
                        cpusubtype: raw.cpusubtype,
                        offset: raw.offset,
                        size: raw.size,
                        align: raw.align,
                    }
                } else {
                    let raw: FatArch = reader.read_struct(at, endian)?;
                    FatArchEntry {
                        cputype: raw.cputype,
                        cpusubtype: raw.cpusubtype,
                        offset: raw.offset as u64,
                        size: raw.size as u64,
                        align: raw.align,
                    }
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!("fat container with {} architectures", arches.len());
        Ok(Self {
            wide,
            endian,
            arches,
        })
    }
}

/// Outcome for one fat slice.
#[derive(Debug, Serialize)]
pub struct SliceResult {
    pub arch: FatArchEntry,
    #[serde(serialize_with = "serialize_slice_result")]
    pub result: Result<Analysis>,
}

fn serialize_slice_result<S: serde::Serializer>(
    result: &Result<Analysis>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    use serde::ser::SerializeMap;

    let mut map = serializer.serialize_map(Some(1))?;
    match result {
        Ok(analysis) => map.serialize_entry("ok", analysis)?,
        Err(e) => map.serialize_entry("error", &ErrorText(e))?,
    }
    map.end()
}

struct ErrorText<'a>(&'a Error);

impl Serialize for ErrorText<'_> {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serialize_error(self.0, serializer)
    }
}

/// All slices of a fat container, in table order.
#[derive(Debug, Serialize)]
pub struct FatReport {
    pub wide: bool,
    pub slices: Vec<SliceResult>,
}

impl FatReport {
    /// Slices that were analyzed successfully.
    pub fn succeeded(&self) -> impl Iterator<Item = (&FatArchEntry, &Analysis)> {
        self.slices
            .iter()
            .filter_map(|s| s.result.as_ref().ok().map(|a| (&s.arch, a)))
    }

    /// Slices that failed, with their errors.
    pub fn failed(&self) -> impl Iterator<Item = (&FatArchEntry, &Error)> {
        self.slices
            .iter()
            .filter_map(|s| s.result.as_ref().err().map(|e| (&s.arch, e)))
    }
}

/// Analyzes every slice of the fat container in `reader`.
///
/// Errors in the header or architecture table fail the whole call. Errors in
/// a slice are recorded in that slice's [`SliceResult`].
pub fn analyze_fat(
    reader: &BoundedReader<'_>,
    wide: bool,
    endian: Endian,
    options: &AnalysisOptions,
    catalog: &UnsafeApiCatalog,
) -> Result<FatReport> {
    let fat = FatBinary::parse(reader, wide, endian, &options.limits)?;

    let analyze = |arch: &FatArchEntry| {
        let result = analyze_slice(reader, arch, options, catalog);
        if let Err(e) = &result {
            warn!("{} slice at {:#x}: {}", arch.arch_name(), arch.offset, e);
        }
        SliceResult {
            arch: *arch,
            result,
        }
    };

    let slices = if options.parallel {
        fat.arches.par_iter().map(analyze).collect()
    } else {
        fat.arches.iter().map(analyze).collect()
    };

    Ok(FatReport { wide, slices })
}

fn analyze_slice(
    reader: &BoundedReader<'_>,
    arch: &FatArchEntry,
    options: &AnalysisOptions,
    catalog: &UnsafeApiCatalog,
) -> Result<Analysis> {
    let slice = reader.sub_reader(arch.offset, arch.size)?;

    if let Container::Fat { .. } = Container::detect(&slice)? {
        return Err(Error::NestedFatBinary {
            offset: slice.base(),
        });
    }

    Analysis::run(&slice, options, catalog)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fat, hardened_executable, CPU_TYPE_ARM64, CPU_TYPE_X86_64};

    fn parse(data: &[u8], limits: &ParseLimits) -> Result<FatBinary> {
        FatBinary::parse(&BoundedReader::new(data), false, Endian::Big, limits)
    }

    #[test]
    fn test_arch_table() {
        let data = fat(&[
            (CPU_TYPE_X86_64, 3, hardened_executable()),
            (CPU_TYPE_ARM64, 0, hardened_executable()),
        ]);
        let fat = parse(&data, &ParseLimits::default()).unwrap();

        assert_eq!(fat.arches.len(), 2);
        assert_eq!(fat.arches[0].arch_name(), "x86_64");
        assert_eq!(fat.arches[1].arch_name(), "arm64");
        assert_eq!(fat.arches[0].offset, 0x1000);
        assert_eq!(fat.arches[0].align, 12);
    }

    #[test]
    fn test_absurd_arch_count() {
        let mut data = fat(&[(CPU_TYPE_X86_64, 3, hardened_executable())]);
        data[4..8].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());

        match parse(&data, &ParseLimits::default()) {
            Err(Error::AllocationLimitExceeded { offset, requested, .. }) => {
                assert_eq!(offset, 4);
                assert_eq!(requested, 0xFFFF_FFFF);
            }
            other => panic!("unexpected: {other:?}"),
        }

        // Under the limit but larger than the file
        data[4..8].copy_from_slice(&60u32.to_be_bytes());
        let tiny = &data[..64];
        assert!(matches!(
            parse(tiny, &ParseLimits::default()),
            Err(Error::TruncatedData { .. })
        ));
    }

    #[test]
    fn test_empty_table() {
        let data = [0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 0];
        assert!(matches!(
            parse(&data, &ParseLimits::default()),
            Err(Error::InvalidHeader { .. })
        ));
    }

    #[test]
    fn test_slice_out_of_range_is_isolated() {
        let mut data = fat(&[
            (CPU_TYPE_X86_64, 3, hardened_executable()),
            (CPU_TYPE_ARM64, 0, hardened_executable()),
        ]);
        // Second entry's size runs past the end of the file
        data[8 + 20 + 12..8 + 20 + 16].copy_from_slice(&0x0100_0000u32.to_be_bytes());

        let options = AnalysisOptions {
            parallel: false,
            ..Default::default()
        };
        let report = analyze_fat(
            &BoundedReader::new(&data),
            false,
            Endian::Big,
            &options,
            &UnsafeApiCatalog::new(),
        )
        .unwrap();

        assert_eq!(report.slices.len(), 2);
        assert_eq!(report.succeeded().count(), 1);
        let (arch, err) = report.failed().next().unwrap();
        assert_eq!(arch.arch_name(), "arm64");
        assert!(matches!(err, Error::TruncatedData { .. }));
    }
}
