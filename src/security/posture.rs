//! Exploit-mitigation flags derived from the parsed model.

use serde::Serialize;

use crate::macho::{MachOFile, MachOFlags, LC_CODE_SIGNATURE, LC_DATA_IN_CODE};

/// Mitigations and hardening signals of one image.
///
/// Every field is computed from the model by [`SecurityPosture::analyze`];
/// nothing here is read directly from the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SecurityPosture {
    /// `MH_PIE`: the image can be loaded at a random address
    pub aslr: bool,
    /// `MH_NO_HEAP_EXECUTION`
    pub dep: bool,
    /// Both stack protector symbols are referenced
    pub stack_canaries: bool,
    /// Links a library whose name contains "sandbox"
    pub sandboxed: bool,
    /// Has a `__TEXT,__entitlements` section
    pub entitlements: bool,
    /// Has `LC_DATA_IN_CODE`.
    ///
    /// This is a weak signal: the command describes data embedded in
    /// instruction streams and is not specific to bitcode.
    pub bitcode: bool,
    /// Has `LC_CODE_SIGNATURE`
    pub code_signature: bool,
    /// An encryption command with a non-zero `cryptid`
    pub encrypted: bool,
    /// Has a `__RESTRICT` segment
    pub restricted: bool,
    /// `MH_ALLOW_STACK_EXECUTION`
    pub stack_execution: bool,
    /// References `_objc_release`
    pub arc: bool,
}

impl SecurityPosture {
    /// Computes the posture of `file`.
    pub fn analyze(file: &MachOFile) -> Self {
        let flags = file.header.flags();

        Self {
            aslr: flags.contains(MachOFlags::PIE),
            dep: flags.contains(MachOFlags::NO_HEAP_EXECUTION),
            stack_canaries: has_c_symbol(file, "__stack_chk_fail")
                && has_c_symbol(file, "__stack_chk_guard"),
            sandboxed: file.dylibs().any(|d| d.name.contains("sandbox")),
            entitlements: file.section("__TEXT", "__entitlements").is_some(),
            bitcode: file.has_command(LC_DATA_IN_CODE),
            code_signature: file.has_command(LC_CODE_SIGNATURE),
            encrypted: file.encryption_info().is_some_and(|e| e.cryptid != 0),
            restricted: file.segment("__RESTRICT").is_some(),
            stack_execution: flags.contains(MachOFlags::ALLOW_STACK_EXECUTION),
            arc: file.has_symbol("_objc_release"),
        }
    }

    /// Labeled flags in display order.
    pub fn entries(&self) -> [(&'static str, bool); 11] {
        [
            ("ASLR (PIE)", self.aslr),
            ("DEP (no heap execution)", self.dep),
            ("Stack canaries", self.stack_canaries),
            ("Sandbox", self.sandboxed),
            ("Entitlements", self.entitlements),
            ("Bitcode (heuristic)", self.bitcode),
            ("Code signature", self.code_signature),
            ("Encrypted", self.encrypted),
            ("Restricted", self.restricted),
            ("Stack execution allowed", self.stack_execution),
            ("ARC", self.arc),
        ]
    }
}

/// Matches a C-level name with or without the extra leading underscore the
/// Mach-O symbol table adds.
fn has_c_symbol(file: &MachOFile, name: &str) -> bool {
    file.symbol_names()
        .any(|s| s == name || s.strip_prefix('_') == Some(name))
}
