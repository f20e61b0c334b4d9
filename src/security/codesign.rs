//! Embedded code signature consistency checks.
//!
//! `LC_CODE_SIGNATURE` points at either a bare CodeDirectory or an embedded
//! signature SuperBlob whose slot 0 holds the CodeDirectory. All code
//! signing structures are big-endian regardless of the image's byte order.
//!
//! This checks that the CodeDirectory is internally consistent and computes
//! its SHA-256 digest. It does not verify page hashes or the CMS signature.

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::macho::{
    hash_type_name, BlobIndex, CodeDirectoryHeader, CommandKind, LinkeditData, MachOFile,
    SuperBlobHeader, CSMAGIC_CODEDIRECTORY, CSMAGIC_EMBEDDED_SIGNATURE, CSSLOT_CODEDIRECTORY,
    CSSLOT_ENTITLEMENTS, CSSLOT_SIGNATURESLOT, CS_SUPPORTSCODELIMIT64, CS_SUPPORTSSCATTER,
    CS_SUPPORTSTEAMID, LC_CODE_SIGNATURE,
};
use crate::options::ParseLimits;
use crate::reader::BoundedReader;
use crate::util::{hex_encode, memchr_null, Endian};

/// Outcome of checking an image's code signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SignatureStatus {
    /// No `LC_CODE_SIGNATURE` command.
    Absent,
    /// The CodeDirectory is structurally sound.
    Consistent(CodeSignatureInfo),
    /// The signature is present but does not hold together.
    Inconsistent {
        /// Absolute offset where the problem was found
        offset: u64,
        reason: String,
    },
}

impl SignatureStatus {
    /// Returns true if a signature command exists, consistent or not.
    pub fn is_present(&self) -> bool {
        !matches!(self, SignatureStatus::Absent)
    }

    /// Returns the signature details when consistent.
    pub fn info(&self) -> Option<&CodeSignatureInfo> {
        match self {
            SignatureStatus::Consistent(info) => Some(info),
            _ => None,
        }
    }
}

/// Decoded CodeDirectory fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CodeDirectory {
    pub length: u32,
    pub version: u32,
    pub flags: u32,
    pub hash_offset: u32,
    pub ident_offset: u32,
    pub n_special_slots: u32,
    pub n_code_slots: u32,
    pub code_limit: u32,
    pub hash_size: u8,
    pub hash_type: u8,
    pub platform: u8,
    /// log2 of the page size
    pub page_size: u8,
    pub scatter_offset: Option<u32>,
    pub team_offset: Option<u32>,
    pub code_limit_64: Option<u64>,
}

impl CodeDirectory {
    /// Page size in bytes, 0 for "infinite" pages.
    pub fn page_bytes(&self) -> u64 {
        if self.page_size == 0 || self.page_size >= 64 {
            0
        } else {
            1u64 << self.page_size
        }
    }
}

/// Details of a consistent code signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CodeSignatureInfo {
    pub directory: CodeDirectory,
    /// Signing identifier
    pub identifier: String,
    pub team_id: Option<String>,
    pub hash_type: &'static str,
    /// Lowercase hex SHA-256 of the CodeDirectory blob
    pub digest: String,
    /// The CodeDirectory predates scatter support
    pub outdated: bool,
    /// The CodeDirectory was found inside a SuperBlob
    pub embedded: bool,
    /// The SuperBlob has an entitlements slot
    pub has_entitlements_blob: bool,
    /// The SuperBlob has a CMS signature slot
    pub has_cms_signature: bool,
}

/// Slots of interest found while walking a SuperBlob index.
#[derive(Debug, Default)]
struct SuperBlobSlots {
    embedded: bool,
    entitlements: bool,
    cms: bool,
}

/// Checks the code signature of `file`.
///
/// A signature command whose data range was already rejected by the command
/// walker is reported as inconsistent rather than absent.
pub fn check_code_signature(
    file: &MachOFile,
    image: &BoundedReader<'_>,
    limits: &ParseLimits,
) -> SignatureStatus {
    let Some(command) = file.find_command(LC_CODE_SIGNATURE) else {
        return SignatureStatus::Absent;
    };

    let data = match &command.kind {
        CommandKind::CodeSignature(data) => *data,
        CommandKind::Malformed { reason } => {
            return SignatureStatus::Inconsistent {
                offset: command.offset,
                reason: reason.clone(),
            }
        }
        _ => return SignatureStatus::Absent,
    };

    match read_signature(&data, image, limits) {
        Ok(info) => {
            debug!(
                "code signature for '{}' ({}), cdhash {}",
                info.identifier, info.hash_type, info.digest
            );
            if info.outdated {
                warn!(
                    "CodeDirectory version {:#x} predates scatter support",
                    info.directory.version
                );
            }
            SignatureStatus::Consistent(info)
        }
        Err(Error::SignatureInconsistent { offset, reason }) => {
            SignatureStatus::Inconsistent { offset, reason }
        }
        Err(e) => SignatureStatus::Inconsistent {
            offset: e.offset().unwrap_or(image.absolute(data.dataoff as u64)),
            reason: e.to_string(),
        },
    }
}

fn read_signature(
    data: &LinkeditData,
    image: &BoundedReader<'_>,
    limits: &ParseLimits,
) -> Result<CodeSignatureInfo> {
    let start = image.absolute(data.dataoff as u64);

    if data.datasize > limits.max_signature_size {
        return Err(Error::AllocationLimitExceeded {
            offset: start,
            what: "code signature",
            requested: data.datasize as u64,
            limit: limits.max_signature_size as u64,
        });
    }

    let blob = image.sub_reader(data.dataoff as u64, data.datasize as u64)?;
    if blob.len() < 8 {
        return Err(Error::signature(start, "signature shorter than a blob header"));
    }

    let magic = blob.u32_at(0, Endian::Big)?;
    let (cd, slots) = match magic {
        CSMAGIC_CODEDIRECTORY => {
            let length = blob.u32_at(4, Endian::Big)?;
            if length != data.datasize {
                return Err(Error::signature(
                    start,
                    format!(
                        "CodeDirectory length {length} does not match datasize {}",
                        data.datasize
                    ),
                ));
            }
            (blob, SuperBlobSlots::default())
        }
        CSMAGIC_EMBEDDED_SIGNATURE => locate_code_directory(&blob)?,
        other => {
            return Err(Error::signature(
                start,
                format!("unexpected signature magic {other:#010x}"),
            ))
        }
    };

    let (directory, identifier, team_id) = parse_code_directory(&cd)?;
    let digest = hex_encode(&Sha256::digest(cd.as_bytes()));

    Ok(CodeSignatureInfo {
        hash_type: hash_type_name(directory.hash_type),
        outdated: directory.version < CS_SUPPORTSSCATTER,
        directory,
        identifier,
        team_id,
        digest,
        embedded: slots.embedded,
        has_entitlements_blob: slots.entitlements,
        has_cms_signature: slots.cms,
    })
}

/// Walks a SuperBlob index and returns a reader over the slot 0 CodeDirectory.
fn locate_code_directory<'a>(blob: &BoundedReader<'a>) -> Result<(BoundedReader<'a>, SuperBlobSlots)> {
    let header: SuperBlobHeader = blob.read_struct(0, Endian::Big)?;
    let length = header.length as u64;

    if length > blob.len() {
        return Err(Error::signature(
            blob.base(),
            format!("SuperBlob length {length} exceeds datasize {}", blob.len()),
        ));
    }
    if length < SuperBlobHeader::SIZE as u64 {
        return Err(Error::signature(blob.base(), "SuperBlob length below header size"));
    }

    let index_end = (header.count as u64)
        .checked_mul(BlobIndex::SIZE as u64)
        .and_then(|n| n.checked_add(SuperBlobHeader::SIZE as u64));
    if index_end.map_or(true, |end| end > length) {
        return Err(Error::signature(
            blob.base(),
            format!("SuperBlob index of {} entries overruns its length", header.count),
        ));
    }

    let superblob = blob.sub_reader(0, length)?;
    let mut slots = SuperBlobSlots {
        embedded: true,
        ..Default::default()
    };
    let mut cd_offset = None;

    for i in 0..header.count as u64 {
        let entry: BlobIndex =
            superblob.read_struct(SuperBlobHeader::SIZE as u64 + i * BlobIndex::SIZE as u64, Endian::Big)?;
        match entry.slot {
            CSSLOT_CODEDIRECTORY => cd_offset = cd_offset.or(Some(entry.offset as u64)),
            CSSLOT_ENTITLEMENTS => slots.entitlements = true,
            CSSLOT_SIGNATURESLOT => slots.cms = true,
            _ => {}
        }
    }

    let Some(cd_offset) = cd_offset else {
        return Err(Error::signature(superblob.base(), "SuperBlob has no CodeDirectory slot"));
    };

    let at = superblob.absolute(cd_offset);
    let magic = superblob.u32_at(cd_offset, Endian::Big)?;
    if magic != CSMAGIC_CODEDIRECTORY {
        return Err(Error::signature(
            at,
            format!("slot 0 magic {magic:#010x} is not a CodeDirectory"),
        ));
    }

    let cd_length = superblob.u32_at(cd_offset + 4, Endian::Big)? as u64;
    if !superblob.contains(cd_offset, cd_length) {
        return Err(Error::signature(
            at,
            format!("CodeDirectory of {cd_length} bytes extends past the SuperBlob"),
        ));
    }

    Ok((superblob.sub_reader(cd_offset, cd_length)?, slots))
}

/// Validates a CodeDirectory blob spanning exactly its declared length.
fn parse_code_directory(cd: &BoundedReader<'_>) -> Result<(CodeDirectory, String, Option<String>)> {
    let at = cd.base();
    let header: CodeDirectoryHeader = cd
        .read_struct(0, Endian::Big)
        .map_err(|_| Error::signature(at, "CodeDirectory shorter than its fixed header"))?;
    let length = cd.len();

    if header.ident_offset as u64 >= length {
        return Err(Error::signature(
            at,
            format!("identOffset {} beyond length {length}", header.ident_offset),
        ));
    }
    let identifier = terminated_string(cd, header.ident_offset, "identifier")?;

    if header.hash_offset as u64 > length {
        return Err(Error::signature(
            at,
            format!("hashOffset {} beyond length {length}", header.hash_offset),
        ));
    }

    let hash_size = header.hash_size as u64;
    let special = header.n_special_slots as u64 * hash_size;
    if special > header.hash_offset as u64 {
        return Err(Error::signature(
            at,
            format!(
                "{} special slots do not fit before hashOffset {}",
                header.n_special_slots, header.hash_offset
            ),
        ));
    }
    let code_end = header.hash_offset as u64 + header.n_code_slots as u64 * hash_size;
    if code_end > length {
        return Err(Error::signature(
            at,
            format!(
                "{} code slots of {hash_size} bytes extend past length {length}",
                header.n_code_slots
            ),
        ));
    }

    let version = header.version;
    let scatter_offset = if version >= CS_SUPPORTSSCATTER {
        Some(cd.u32_at(CodeDirectoryHeader::SCATTER_OFFSET, Endian::Big)?)
    } else {
        None
    };
    let team_offset = if version >= CS_SUPPORTSTEAMID {
        Some(cd.u32_at(CodeDirectoryHeader::TEAM_OFFSET, Endian::Big)?)
    } else {
        None
    };
    let code_limit_64 = if version >= CS_SUPPORTSCODELIMIT64 {
        Some(cd.u64_at(CodeDirectoryHeader::CODE_LIMIT_64, Endian::Big)?)
    } else {
        None
    };

    let team_id = match team_offset {
        Some(offset) if offset != 0 => {
            if offset as u64 >= length {
                return Err(Error::signature(
                    at,
                    format!("teamOffset {offset} beyond length {length}"),
                ));
            }
            Some(terminated_string(cd, offset, "team identifier")?)
        }
        _ => None,
    };

    let directory = CodeDirectory {
        length: header.length,
        version,
        flags: header.flags,
        hash_offset: header.hash_offset,
        ident_offset: header.ident_offset,
        n_special_slots: header.n_special_slots,
        n_code_slots: header.n_code_slots,
        code_limit: header.code_limit,
        hash_size: header.hash_size,
        hash_type: header.hash_type,
        platform: header.platform,
        page_size: header.page_size,
        scatter_offset,
        team_offset,
        code_limit_64,
    };

    Ok((directory, identifier, team_id))
}

/// Reads a string that must be NUL-terminated inside the blob.
fn terminated_string(cd: &BoundedReader<'_>, offset: u32, what: &str) -> Result<String> {
    let tail = cd.tail(offset as u64)?;
    let end = memchr_null(tail);
    if end == tail.len() {
        return Err(Error::signature(
            cd.absolute(offset as u64),
            format!("{what} is not NUL-terminated"),
        ));
    }
    Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{code_directory, superblob, MachOBuilder, LC_CODE_SIGNATURE};

    fn check(image: &[u8]) -> SignatureStatus {
        let file = MachOFile::parse(image).unwrap();
        check_code_signature(&file, &BoundedReader::new(image), &ParseLimits::default())
    }

    #[test]
    fn test_absent() {
        let image = MachOBuilder::new64().segment("__TEXT", 5, 5, &[]).build();
        assert_eq!(check(&image), SignatureStatus::Absent);
    }

    #[test]
    fn test_bare_code_directory() {
        let cd = code_directory("com.example.tool", 0x20200);
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &cd)
            .build();

        let status = check(&image);
        let info = status.info().expect("consistent");
        assert_eq!(info.identifier, "com.example.tool");
        assert_eq!(info.hash_type, "sha256");
        assert_eq!(info.digest, hex_encode(&Sha256::digest(&cd)));
        assert_eq!(info.digest.len(), 64);
        assert!(!info.outdated);
        assert!(!info.embedded);
        assert_eq!(info.team_id, None);
        assert_eq!(info.directory.page_bytes(), 4096);
    }

    #[test]
    fn test_length_mismatch_is_inconsistent() {
        let mut cd = code_directory("com.example.tool", 0x20200);
        cd.extend_from_slice(&[0u8; 8]);
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &cd)
            .build();

        match check(&image) {
            SignatureStatus::Inconsistent { reason, .. } => {
                assert!(reason.contains("does not match datasize"), "{reason}")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_superblob() {
        let cd = code_directory("com.example.app", 0x20100);
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &superblob(&cd))
            .build();

        let status = check(&image);
        let info = status.info().expect("consistent");
        assert!(info.embedded);
        assert_eq!(info.identifier, "com.example.app");
        assert_eq!(info.digest, hex_encode(&Sha256::digest(&cd)));
        assert_eq!(info.directory.scatter_offset, Some(0));
    }

    #[test]
    fn test_old_version_is_outdated() {
        let cd = code_directory("legacy", 0x20001);
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &cd)
            .build();

        let status = check(&image);
        let info = status.info().expect("consistent");
        assert!(info.outdated);
        assert_eq!(info.directory.scatter_offset, None);
    }

    #[test]
    fn test_unterminated_identifier() {
        let mut cd = code_directory("abc", 0x20200);
        // Overwrite the terminator and everything after it with non-NUL
        let ident = 52;
        for b in &mut cd[ident..] {
            *b = b'x';
        }
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &cd)
            .build();

        match check(&image) {
            SignatureStatus::Inconsistent { reason, .. } => {
                assert!(reason.contains("not NUL-terminated"), "{reason}")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_code_slots_past_end() {
        let mut cd = code_directory("id", 0x20200);
        // nCodeSlots
        cd[28..32].copy_from_slice(&100u32.to_be_bytes());
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &cd)
            .build();

        assert!(matches!(check(&image), SignatureStatus::Inconsistent { .. }));
    }

    #[test]
    fn test_superblob_without_code_directory() {
        let mut blob = Vec::new();
        blob.extend_from_slice(&CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
        blob.extend_from_slice(&20u32.to_be_bytes());
        blob.extend_from_slice(&1u32.to_be_bytes());
        blob.extend_from_slice(&CSSLOT_SIGNATURESLOT.to_be_bytes());
        blob.extend_from_slice(&20u32.to_be_bytes());
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &blob)
            .build();

        match check(&image) {
            SignatureStatus::Inconsistent { reason, .. } => {
                assert!(reason.contains("no CodeDirectory"), "{reason}")
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_signature_limit() {
        let cd = code_directory("id", 0x20200);
        let image = MachOBuilder::new64()
            .linkedit(LC_CODE_SIGNATURE, &cd)
            .build();
        let file = MachOFile::parse(&image).unwrap();
        let limits = ParseLimits {
            max_signature_size: 16,
            ..Default::default()
        };

        match check_code_signature(&file, &BoundedReader::new(&image), &limits) {
            SignatureStatus::Inconsistent { reason, .. } => assert!(reason.contains("limit")),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
