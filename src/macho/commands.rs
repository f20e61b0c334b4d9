//! Load command walking and per-command decoding.
//!
//! The walker trusts nothing but its own running offset: every command's
//! `cmdsize` is checked against what is left of the declared region before
//! the command is decoded, and decoding only ever sees the command's own
//! bytes.

use serde::Serialize;
use tracing::{debug, warn};

use super::constants::*;
use super::dylib::{parse_path_command, Dylib, DylibKind};
use super::header::{MachOHeader, WordWidth};
use super::segment::Segment;
use super::structs::*;
use super::symbols::SymtabInfo;
use crate::error::{Error, Result, Warning};
use crate::reader::BoundedReader;
use crate::util::{fixed_name, format_uuid, memchr_null, Endian, PackedVersion};

// =============================================================================
// Command Model
// =============================================================================

/// A load command with its decoded body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadCommand {
    /// Position in the command list
    pub index: u32,
    /// Absolute file offset of the command
    pub offset: u64,
    pub cmd: u32,
    pub cmdsize: u32,
    #[serde(flatten)]
    pub kind: CommandKind,
}

impl LoadCommand {
    /// Symbolic name of the command (`LC_SEGMENT_64`, ...).
    pub fn name(&self) -> &'static str {
        load_command_name(self.cmd)
    }
}

/// Decoded body of a load command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "body", rename_all = "snake_case")]
#[allow(missing_docs)] // Variants are named after their load commands
pub enum CommandKind {
    Segment(Segment),
    Symtab(SymtabInfo),
    Dysymtab(DysymtabInfo),
    Dylib(Dylib),
    Dylinker {
        name: String,
    },
    Uuid(#[serde(serialize_with = "serialize_uuid")] [u8; 16]),
    VersionMin {
        version: PackedVersion,
        sdk: PackedVersion,
    },
    SourceVersion(u64),
    EntryPoint {
        entryoff: u64,
        stacksize: u64,
    },
    FunctionStarts(LinkeditData),
    DataInCode(LinkeditData),
    CodeSignature(LinkeditData),
    /// Any other command pointing at a `__LINKEDIT` blob
    LinkeditData(LinkeditData),
    EncryptionInfo(EncryptionInfo),
    Rpath {
        path: String,
    },
    BuildVersion(BuildVersion),
    LinkerOption {
        options: Vec<String>,
    },
    Note {
        owner: String,
        offset: u64,
        size: u64,
    },
    /// A command type this decoder does not interpret
    Unrecognized,
    /// A recognized command whose body failed validation
    Malformed {
        reason: String,
    },
}

fn serialize_uuid<S: serde::Serializer>(
    uuid: &[u8; 16],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    serializer.collect_str(&format_uuid(uuid))
}

/// Location of a blob in `__LINKEDIT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LinkeditData {
    pub dataoff: u32,
    pub datasize: u32,
}

/// Selected `LC_DYSYMTAB` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DysymtabInfo {
    pub ilocalsym: u32,
    pub nlocalsym: u32,
    pub iextdefsym: u32,
    pub nextdefsym: u32,
    pub iundefsym: u32,
    pub nundefsym: u32,
    pub indirectsymoff: u32,
    pub nindirectsyms: u32,
}

/// `LC_ENCRYPTION_INFO(_64)` fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EncryptionInfo {
    pub cryptoff: u32,
    pub cryptsize: u32,
    /// Non-zero when the range is encrypted
    pub cryptid: u32,
}

/// `LC_BUILD_VERSION` fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildVersion {
    pub platform: u32,
    pub minos: PackedVersion,
    pub sdk: PackedVersion,
    /// `(tool, version)` pairs
    pub tools: Vec<(u32, PackedVersion)>,
}

// =============================================================================
// Walker
// =============================================================================

/// Walks the load command region of a thin image.
///
/// `image` is the whole single-architecture image starting at its header.
/// Fatal errors are limited to commands that make the running offset
/// untrustworthy; anything else wrong with a command is recorded in
/// `warnings` and the command is kept as [`CommandKind::Malformed`].
pub fn walk_load_commands(
    image: &BoundedReader<'_>,
    header: &MachOHeader,
    warnings: &mut Vec<Warning>,
) -> Result<Vec<LoadCommand>> {
    let region = image.sub_reader(header.size(), header.sizeofcmds as u64)?;
    let total = region.len();
    let endian = header.endian;

    let mut commands = Vec::with_capacity(header.ncmds.min(1024) as usize);
    let mut offset: u64 = 0;

    for index in 0..header.ncmds {
        if offset == total {
            let warning = Warning::CommandCountMismatch {
                declared: header.ncmds,
                parsed: index,
            };
            warn!("{}", warning);
            warnings.push(warning);
            break;
        }

        let remaining = total - offset;
        if remaining < LoadCommandHeader::SIZE as u64 {
            return Err(Error::TruncatedCommand {
                offset: region.absolute(offset),
                cmd: if remaining >= 4 {
                    region.u32_at(offset, endian)?
                } else {
                    0
                },
                cmdsize: 0,
            });
        }

        let lc: LoadCommandHeader = region.read_struct(offset, endian)?;
        if lc.cmdsize < LoadCommandHeader::SIZE as u32 || lc.cmdsize as u64 > remaining {
            return Err(Error::TruncatedCommand {
                offset: region.absolute(offset),
                cmd: lc.cmd,
                cmdsize: lc.cmdsize,
            });
        }

        let command = region.sub_reader(offset, lc.cmdsize as u64)?;
        let kind = match decode_command(lc.cmd, &command, image, header) {
            Ok(kind) => kind,
            Err(e) => {
                let warning = Warning::CommandSkipped {
                    index,
                    offset: command.base(),
                    cmd: lc.cmd,
                    reason: e.to_string(),
                };
                warn!("{}", warning);
                warnings.push(warning);
                CommandKind::Malformed {
                    reason: e.to_string(),
                }
            }
        };

        debug!(
            "#{:<3} {:#08x} {:<24} size={}",
            index,
            command.base(),
            load_command_name(lc.cmd),
            lc.cmdsize
        );

        commands.push(LoadCommand {
            index,
            offset: command.base(),
            cmd: lc.cmd,
            cmdsize: lc.cmdsize,
            kind,
        });
        offset += lc.cmdsize as u64;
    }

    if offset != total {
        let warning = Warning::CommandSizeMismatch {
            declared: header.sizeofcmds,
            consumed: offset,
        };
        warn!("{}", warning);
        warnings.push(warning);
    }

    Ok(commands)
}

/// Decodes one command. `command` spans exactly `cmdsize` bytes.
fn decode_command(
    cmd: u32,
    command: &BoundedReader<'_>,
    image: &BoundedReader<'_>,
    header: &MachOHeader,
) -> Result<CommandKind> {
    let endian = header.endian;

    let kind = match cmd {
        LC_SEGMENT => CommandKind::Segment(Segment::parse32(command, image, endian)?),
        LC_SEGMENT_64 => CommandKind::Segment(Segment::parse64(command, image, endian)?),
        LC_SYMTAB => {
            let raw: SymtabCommand = command.read_struct(0, endian)?;
            CommandKind::Symtab(raw.into())
        }
        LC_DYSYMTAB => {
            let raw: DysymtabCommand = command.read_struct(0, endian)?;
            CommandKind::Dysymtab(DysymtabInfo {
                ilocalsym: raw.ilocalsym,
                nlocalsym: raw.nlocalsym,
                iextdefsym: raw.iextdefsym,
                nextdefsym: raw.nextdefsym,
                iundefsym: raw.iundefsym,
                nundefsym: raw.nundefsym,
                indirectsymoff: raw.indirectsymoff,
                nindirectsyms: raw.nindirectsyms,
            })
        }
        LC_LOAD_DYLIB | LC_LOAD_WEAK_DYLIB | LC_REEXPORT_DYLIB | LC_LOAD_UPWARD_DYLIB
        | LC_LAZY_LOAD_DYLIB | LC_ID_DYLIB => {
            // from_cmd covers every arm of this pattern
            let kind = DylibKind::from_cmd(cmd).unwrap_or(DylibKind::Load);
            CommandKind::Dylib(Dylib::parse(kind, command, endian)?)
        }
        LC_LOAD_DYLINKER | LC_ID_DYLINKER | LC_DYLD_ENVIRONMENT => CommandKind::Dylinker {
            name: parse_path_command(command, endian)?,
        },
        LC_RPATH => CommandKind::Rpath {
            path: parse_path_command(command, endian)?,
        },
        LC_UUID => {
            let raw: UuidCommand = command.read_struct(0, endian)?;
            CommandKind::Uuid(raw.uuid)
        }
        LC_VERSION_MIN_MACOSX
        | LC_VERSION_MIN_IPHONEOS
        | LC_VERSION_MIN_TVOS
        | LC_VERSION_MIN_WATCHOS => {
            let raw: VersionMinCommand = command.read_struct(0, endian)?;
            CommandKind::VersionMin {
                version: PackedVersion(raw.version),
                sdk: PackedVersion(raw.sdk),
            }
        }
        LC_SOURCE_VERSION => {
            let raw: SourceVersionCommand = command.read_struct(0, endian)?;
            CommandKind::SourceVersion(raw.version)
        }
        LC_MAIN => {
            let raw: EntryPointCommand = command.read_struct(0, endian)?;
            CommandKind::EntryPoint {
                entryoff: raw.entryoff,
                stacksize: raw.stacksize,
            }
        }
        LC_FUNCTION_STARTS => CommandKind::FunctionStarts(linkedit_data(command, image, endian)?),
        LC_DATA_IN_CODE => CommandKind::DataInCode(linkedit_data(command, image, endian)?),
        LC_CODE_SIGNATURE => CommandKind::CodeSignature(linkedit_data(command, image, endian)?),
        LC_SEGMENT_SPLIT_INFO
        | LC_DYLIB_CODE_SIGN_DRS
        | LC_LINKER_OPTIMIZATION_HINT
        | LC_DYLD_EXPORTS_TRIE
        | LC_DYLD_CHAINED_FIXUPS => {
            CommandKind::LinkeditData(linkedit_data(command, image, endian)?)
        }
        LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
            // The 64-bit form only appends padding
            let raw: EncryptionInfoCommand = command.read_struct(0, endian)?;
            CommandKind::EncryptionInfo(EncryptionInfo {
                cryptoff: raw.cryptoff,
                cryptsize: raw.cryptsize,
                cryptid: raw.cryptid,
            })
        }
        LC_BUILD_VERSION => CommandKind::BuildVersion(build_version(command, endian)?),
        LC_LINKER_OPTION => CommandKind::LinkerOption {
            options: linker_options(command, endian)?,
        },
        LC_NOTE => {
            let raw: NoteCommand = command.read_struct(0, endian)?;
            CommandKind::Note {
                owner: fixed_name(&raw.data_owner),
                offset: raw.offset,
                size: raw.size,
            }
        }
        _ => CommandKind::Unrecognized,
    };

    // A 64-bit image should not carry 32-bit segments and vice versa
    if let CommandKind::Segment(_) = kind {
        let expected = match header.width {
            WordWidth::Bits32 => LC_SEGMENT,
            WordWidth::Bits64 => LC_SEGMENT_64,
        };
        if cmd != expected {
            debug!(
                "{} in a {} image at {:#x}",
                load_command_name(cmd),
                header.width,
                command.base()
            );
        }
    }

    Ok(kind)
}

fn linkedit_data(
    command: &BoundedReader<'_>,
    image: &BoundedReader<'_>,
    endian: Endian,
) -> Result<LinkeditData> {
    let raw: LinkeditDataCommand = command.read_struct(0, endian)?;
    if !image.contains(raw.dataoff as u64, raw.datasize as u64) {
        return Err(Error::truncated(
            image.absolute(raw.dataoff as u64),
            raw.datasize as u64,
            image.len().saturating_sub(raw.dataoff as u64),
        ));
    }
    Ok(LinkeditData {
        dataoff: raw.dataoff,
        datasize: raw.datasize,
    })
}

fn build_version(command: &BoundedReader<'_>, endian: Endian) -> Result<BuildVersion> {
    let raw: BuildVersionCommand = command.read_struct(0, endian)?;

    let tools_size = raw.ntools as u64 * BuildToolVersion::SIZE as u64;
    if tools_size > command.len() - BuildVersionCommand::SIZE as u64 {
        return Err(Error::malformed(
            command.base(),
            format!("ntools {} does not fit in cmdsize {}", raw.ntools, raw.cmdsize),
        ));
    }

    let tools = (0..raw.ntools as u64)
        .map(|i| {
            let off = BuildVersionCommand::SIZE as u64 + i * BuildToolVersion::SIZE as u64;
            let tool: BuildToolVersion = command.read_struct(off, endian)?;
            Ok((tool.tool, PackedVersion(tool.version)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(BuildVersion {
        platform: raw.platform,
        minos: PackedVersion(raw.minos),
        sdk: PackedVersion(raw.sdk),
        tools,
    })
}

fn linker_options(command: &BoundedReader<'_>, endian: Endian) -> Result<Vec<String>> {
    let raw: LinkerOptionCommand = command.read_struct(0, endian)?;
    let strings = command.tail(LinkerOptionCommand::SIZE as u64)?;

    // count is untrusted; every string needs at least its terminator
    if raw.count as u64 > strings.len() as u64 {
        return Err(Error::malformed(
            command.base(),
            format!("{} linker options in {} bytes", raw.count, strings.len()),
        ));
    }

    let mut options = Vec::with_capacity(raw.count as usize);
    let mut rest = strings;
    for _ in 0..raw.count {
        if rest.is_empty() {
            break;
        }
        let end = memchr_null(rest);
        options.push(String::from_utf8_lossy(&rest[..end]).into_owned());
        rest = rest.get(end + 1..).unwrap_or(&[]);
    }
    Ok(options)
}
