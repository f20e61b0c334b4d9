//! Section permission and debug metadata checks.

use std::fmt;

use serde::Serialize;

use crate::macho::MachOFile;

/// What a section or segment was flagged for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionIssue {
    /// Both `S_ATTR_PURE_INSTRUCTIONS` and `S_ATTR_SOME_INSTRUCTIONS` set.
    ///
    /// Historically reported as "writable and executable"; the attribute bits
    /// say nothing about writability.
    InstructionAttributesWx,
    /// `__debug_info` or `__debug_line` present
    DebugMetadata,
    /// Segment initial protection is writable and executable
    ProtectionWx,
    /// Segment maximum protection allows write and execute
    MaxProtectionWx,
}

impl fmt::Display for SectionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SectionIssue::InstructionAttributesWx => {
                "writable and executable (instruction attributes)"
            }
            SectionIssue::DebugMetadata => "debug metadata",
            SectionIssue::ProtectionWx => "initial protection is writable and executable",
            SectionIssue::MaxProtectionWx => "maximum protection allows write and execute",
        })
    }
}

/// One flagged section or segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SectionFinding {
    pub segment: String,
    /// `None` for segment-level findings
    pub section: Option<String>,
    pub issue: SectionIssue,
}

impl SectionFinding {
    /// `segment,section` or just `segment`.
    pub fn location(&self) -> String {
        match &self.section {
            Some(section) => format!("{},{}", self.segment, section),
            None => self.segment.clone(),
        }
    }
}

/// Runs every section-level check over `file`.
pub fn check_sections(file: &MachOFile) -> Vec<SectionFinding> {
    let mut findings = Vec::new();

    for segment in file.segments() {
        if segment.is_write_execute() {
            findings.push(SectionFinding {
                segment: segment.name.clone(),
                section: None,
                issue: SectionIssue::ProtectionWx,
            });
        } else if segment.may_write_execute() {
            findings.push(SectionFinding {
                segment: segment.name.clone(),
                section: None,
                issue: SectionIssue::MaxProtectionWx,
            });
        }

        for section in &segment.sections {
            let flagged = |issue| SectionFinding {
                segment: section.segment_name.clone(),
                section: Some(section.name.clone()),
                issue,
            };

            if section.has_both_instruction_attributes() {
                findings.push(flagged(SectionIssue::InstructionAttributesWx));
            }
            if section.name == "__debug_info" || section.name == "__debug_line" {
                findings.push(flagged(SectionIssue::DebugMetadata));
            }
        }
    }

    findings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    #[test]
    fn test_instruction_attributes_and_debug() {
        let image = MachOBuilder::new64()
            .segment(
                "__TEXT",
                5,
                5,
                &[
                    SectionSpec::new(
                        "__text",
                        S_ATTR_PURE_INSTRUCTIONS | S_ATTR_SOME_INSTRUCTIONS,
                        &[0x90; 4],
                    ),
                    SectionSpec::new("__stubs", S_ATTR_SOME_INSTRUCTIONS, &[0x90; 4]),
                ],
            )
            .segment(
                "__DWARF",
                1,
                1,
                &[
                    SectionSpec::new("__debug_info", 0, &[0; 4]),
                    SectionSpec::new("__debug_line", 0, &[0; 4]),
                    SectionSpec::new("__debug_str", 0, &[0; 4]),
                ],
            )
            .build();
        let findings = check_sections(&MachOFile::parse(&image).unwrap());

        assert_eq!(findings.len(), 3);
        assert_eq!(findings[0].issue, SectionIssue::InstructionAttributesWx);
        assert_eq!(findings[0].location(), "__TEXT,__text");
        assert_eq!(findings[1].issue, SectionIssue::DebugMetadata);
        assert_eq!(findings[1].location(), "__DWARF,__debug_info");
        assert_eq!(findings[2].location(), "__DWARF,__debug_line");
    }

    #[test]
    fn test_segment_protections() {
        let image = MachOBuilder::new64()
            .segment("__JIT", 7, 7, &[])
            .segment("__DATA", 3, 7, &[])
            .segment("__LINKEDIT", 1, 1, &[])
            .build();
        let findings = check_sections(&MachOFile::parse(&image).unwrap());

        assert_eq!(
            findings,
            vec![
                SectionFinding {
                    segment: "__JIT".into(),
                    section: None,
                    issue: SectionIssue::ProtectionWx,
                },
                SectionFinding {
                    segment: "__DATA".into(),
                    section: None,
                    issue: SectionIssue::MaxProtectionWx,
                },
            ]
        );
    }
}
