//! Source language and compiler guessing.
//!
//! The parser only supplies read-only views of an image through
//! [`ClassifierInput`]; deciding what produced the binary is left to a
//! [`LanguageClassifier`]. Its three hooks are combined with a fixed
//! precedence: symbols, then sections, then strings.

use serde::Serialize;

use crate::macho::MachOFile;
use crate::reader::BoundedReader;

/// Views of one image handed to a classifier.
#[derive(Debug, Clone)]
pub struct ClassifierInput<'a> {
    /// Resolved symbol names in table order
    pub symbols: Vec<&'a str>,
    /// `(segment, section)` pairs in load command order
    pub sections: Vec<(&'a str, &'a str)>,
    /// Raw bytes of `__TEXT,__cstring`
    pub cstrings: &'a [u8],
    /// Raw bytes of `__TEXT,__const`
    pub consts: &'a [u8],
}

impl<'a> ClassifierInput<'a> {
    /// Builds the views for `file`.
    ///
    /// Section contents that cannot be read are presented as empty.
    pub fn new(file: &'a MachOFile, image: &BoundedReader<'a>) -> Self {
        Self {
            symbols: file.symbol_names().collect(),
            sections: file
                .sections()
                .map(|(seg, sect)| (seg.name.as_str(), sect.name.as_str()))
                .collect(),
            cstrings: file
                .section_data(image, "__TEXT", "__cstring")
                .unwrap_or_default(),
            consts: file
                .section_data(image, "__TEXT", "__const")
                .unwrap_or_default(),
        }
    }
}

/// A best-guess language and compiler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Detection {
    pub language: String,
    pub compiler: String,
}

impl Detection {
    pub fn new(language: impl Into<String>, compiler: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            compiler: compiler.into(),
        }
    }

    /// The fallback when no hook produced an answer.
    pub fn unknown() -> Self {
        Self::new("Unknown", "Unknown")
    }

    pub fn is_unknown(&self) -> bool {
        *self == Self::unknown()
    }
}

/// Guesses what produced a binary from three independent kinds of evidence.
pub trait LanguageClassifier {
    /// Looks at symbol names.
    fn from_symbols(&self, symbols: &[&str]) -> Option<Detection>;

    /// Looks at `(segment, section)` names.
    fn from_sections(&self, sections: &[(&str, &str)]) -> Option<Detection>;

    /// Looks at the `__cstring` and `__const` contents.
    fn from_strings(&self, cstrings: &[u8], consts: &[u8]) -> Option<Detection>;
}

/// Runs `classifier` over `input` and picks the highest-precedence answer.
pub fn classify<C: LanguageClassifier + ?Sized>(
    classifier: &C,
    input: &ClassifierInput<'_>,
) -> Detection {
    classifier
        .from_symbols(&input.symbols)
        .or_else(|| classifier.from_sections(&input.sections))
        .or_else(|| classifier.from_strings(input.cstrings, input.consts))
        .unwrap_or_else(Detection::unknown)
}

// =============================================================================
// Built-in Tables
// =============================================================================

/// A small lookup-table classifier for common toolchains.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinClassifier;

const SECTION_TABLE: &[(&str, &str, &str, &str)] = &[
    ("__TEXT", "__swift5_types", "Swift", "swiftc"),
    ("__TEXT", "__swift5_proto", "Swift", "swiftc"),
    ("__TEXT", "__swift5_fieldmd", "Swift", "swiftc"),
    ("__TEXT", "__gopclntab", "Go", "gc"),
    ("__DATA", "__go_buildinfo", "Go", "gc"),
    ("__TEXT", "__gosymtab", "Go", "gc"),
    ("__TEXT", "__rustc", "Rust", "rustc"),
    ("__DATA", "__objc_classlist", "Objective-C", "clang"),
    ("__DATA_CONST", "__objc_classlist", "Objective-C", "clang"),
    ("__TEXT", "__objc_methname", "Objective-C", "clang"),
    ("__TEXT", "__kotlin", "Kotlin/Native", "konanc"),
    ("__TEXT", "__gcc_except_tab", "C++", "clang"),
];

impl LanguageClassifier for BuiltinClassifier {
    fn from_symbols(&self, symbols: &[&str]) -> Option<Detection> {
        if symbols.iter().any(|s| s.starts_with("_$s") || s.starts_with("_swift_")) {
            return Some(Detection::new("Swift", "swiftc"));
        }
        if symbols.iter().any(|s| s.starts_with("_runtime.") || s.starts_with("_go.")) {
            return Some(Detection::new("Go", "gc"));
        }
        if symbols.iter().any(|s| s.contains("rust_begin_unwind") || s.starts_with("__R")) {
            return Some(Detection::new("Rust", "rustc"));
        }
        if symbols.iter().any(|s| s.starts_with("_OBJC_CLASS_$_") || *s == "_objc_msgSend") {
            return Some(Detection::new("Objective-C", "clang"));
        }
        if symbols.iter().any(|s| s.starts_with("__Z")) {
            return Some(Detection::new("C++", "clang"));
        }
        None
    }

    fn from_sections(&self, sections: &[(&str, &str)]) -> Option<Detection> {
        SECTION_TABLE.iter().find_map(|&(seg, sect, language, compiler)| {
            sections
                .contains(&(seg, sect))
                .then(|| Detection::new(language, compiler))
        })
    }

    fn from_strings(&self, cstrings: &[u8], consts: &[u8]) -> Option<Detection> {
        let has = |needle: &[u8]| {
            memchr::memmem::find(cstrings, needle).is_some()
                || memchr::memmem::find(consts, needle).is_some()
        };

        if has(b"Go buildinf:") {
            Some(Detection::new("Go", "gc"))
        } else if has(b"/rustc/") {
            Some(Detection::new("Rust", "rustc"))
        } else if has(b"GCC: (") {
            Some(Detection::new("C", "gcc"))
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    /// Answers from a fixed set of hooks.
    struct Stub {
        symbols: Option<&'static str>,
        sections: Option<&'static str>,
        strings: Option<&'static str>,
    }

    impl LanguageClassifier for Stub {
        fn from_symbols(&self, _: &[&str]) -> Option<Detection> {
            self.symbols.map(|l| Detection::new(l, "stub"))
        }

        fn from_sections(&self, _: &[(&str, &str)]) -> Option<Detection> {
            self.sections.map(|l| Detection::new(l, "stub"))
        }

        fn from_strings(&self, _: &[u8], _: &[u8]) -> Option<Detection> {
            self.strings.map(|l| Detection::new(l, "stub"))
        }
    }

    fn empty_input() -> ClassifierInput<'static> {
        ClassifierInput {
            symbols: Vec::new(),
            sections: Vec::new(),
            cstrings: &[],
            consts: &[],
        }
    }

    #[test]
    fn test_precedence() {
        let input = empty_input();

        let all = Stub {
            symbols: Some("A"),
            sections: Some("B"),
            strings: Some("C"),
        };
        assert_eq!(classify(&all, &input).language, "A");

        let no_symbols = Stub {
            symbols: None,
            ..all
        };
        assert_eq!(classify(&no_symbols, &input).language, "B");

        let strings_only = Stub {
            symbols: None,
            sections: None,
            strings: Some("C"),
        };
        assert_eq!(classify(&strings_only, &input).language, "C");

        let none = Stub {
            symbols: None,
            sections: None,
            strings: None,
        };
        assert!(classify(&none, &input).is_unknown());
    }

    #[test]
    fn test_input_views() {
        let image = MachOBuilder::new64()
            .segment(
                "__TEXT",
                5,
                5,
                &[
                    SectionSpec::new("__text", 0, &[0xC3]),
                    SectionSpec::new("__cstring", 2, b"hello\0"),
                ],
            )
            .symbols(&[("_main", N_SECT | N_EXT)])
            .build();
        let file = MachOFile::parse(&image).unwrap();
        let input = ClassifierInput::new(&file, &BoundedReader::new(&image));

        assert_eq!(input.symbols, vec!["_main"]);
        assert_eq!(
            input.sections,
            vec![("__TEXT", "__text"), ("__TEXT", "__cstring")]
        );
        assert_eq!(input.cstrings, b"hello\0");
        assert!(input.consts.is_empty());
    }

    #[test]
    fn test_builtin_tables() {
        let mut input = empty_input();
        input.sections = vec![("__TEXT", "__text"), ("__TEXT", "__gopclntab")];
        assert_eq!(classify(&BuiltinClassifier, &input).language, "Go");

        input.symbols = vec!["_$s4main3FooVMn"];
        assert_eq!(classify(&BuiltinClassifier, &input).language, "Swift");

        let mut input = empty_input();
        input.cstrings = b"panicked at /rustc/abc/library/core\0";
        assert_eq!(classify(&BuiltinClassifier, &input).language, "Rust");
    }
}
