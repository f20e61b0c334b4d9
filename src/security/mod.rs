//! Security analyses over a parsed [`MachOFile`](crate::macho::MachOFile).
//!
//! Each analysis is a pure function of the model (plus the image bytes for
//! the code signature) and never fails the surrounding analysis.

mod codesign;
mod posture;
mod sections;
mod unsafe_api;

pub use codesign::{check_code_signature, CodeDirectory, CodeSignatureInfo, SignatureStatus};
pub use posture::SecurityPosture;
pub use sections::{check_sections, SectionFinding, SectionIssue};
pub use unsafe_api::{ApiCategory, Severity, UnsafeApi, UnsafeApiCatalog, UnsafeApiFinding};
