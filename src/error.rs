//! Error types for the discovery engine.
//!
//! Three kinds of failure, matching the design in the specification:
//! structural (malformed image), cross-check (seed/constructor disagreement),
//! and parse (captured inline as `Artefact::UnparsableFunction`, never an
//! `Err`).

use std::path::PathBuf;

/// Wrapper type for `Result` over [`ImageError`].
pub type ImageResult<T> = std::result::Result<T, ImageError>;

/// Structural failures while parsing or querying a PE image.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    /// Failed to read the input file.
    #[error("failed to open {0}: {1}")]
    Open(PathBuf, std::io::Error),

    /// `goblin` rejected the buffer as a PE image.
    #[error("failed to parse PE image: {0}")]
    Parse(#[from] goblin::error::Error),

    /// An RVA did not fall inside any section.
    #[error("RVA {0:#x} is not inside any section")]
    RvaOutOfBounds(u64),

    /// A named section was requested but does not exist.
    #[error("section {0:?} not present in image")]
    SectionNotFound(String),

    /// A read would run past the end of its containing section.
    #[error("read of {length} bytes at RVA {rva:#x} runs past the end of its section")]
    ReadOutOfBounds { rva: u64, length: usize },

    /// A multi-byte read was attempted at a misaligned address in strict mode.
    #[error("unaligned read of {width} bytes at RVA {rva:#x}")]
    Unaligned { rva: u64, width: usize },

    /// A zero-terminated string read exceeded its limit without a NUL.
    #[error("string at RVA {0:#x} exceeds its length limit without a terminator")]
    StringTooLong(u64),

    /// A zero-terminated string contained a disallowed or invalid byte.
    #[error("string at RVA {0:#x} contains a disallowed or invalid character")]
    StringInvalidChar(u64),

    /// The PE resource directory was malformed where accessed.
    #[error("malformed PE resource directory: {0}")]
    MalformedResources(&'static str),
}

/// Wrapper type for `Result` over [`DisasmError`].
pub type DisasmResult<T> = std::result::Result<T, DisasmError>;

/// Local, non-fatal failures while decoding a stylised instruction
/// sequence. Callers capture these as `Artefact::UnparsableFunction`
/// rather than propagating them.
#[derive(Debug, thiserror::Error)]
pub enum DisasmError {
    #[error("unexpected instruction {code:?} at {ip:#x} while parsing {context}")]
    UnexpectedInstruction {
        ip: u64,
        code: String,
        context: &'static str,
    },

    #[error("immediate stack-size mismatch at {ip:#x}")]
    StackSizeMismatch { ip: u64 },

    #[error(transparent)]
    Image(#[from] ImageError),
}

/// Wrapper type for `Result` over [`AnalysisError`].
pub type AnalysisResult<T> = std::result::Result<T, AnalysisError>;

/// Fatal failures in the discovery engine itself: cross-checks that should
/// always hold for a supported binary, and worklist conflicts.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// Seed analysis did not identify exactly five constructor functions.
    #[error("expected exactly 5 UECodeGen_Private::ConstructXXX functions, found {0}")]
    WrongConstructorCount(usize),

    /// A strict Z-construct parse disagreed with the seed-index kind for
    /// either the calling stub or the called constructor.
    #[error("Z-construct kind mismatch at {fn_rva:#x}: seed says {from_seed:?}, called ctor {called_ctor_rva:#x} is {from_ctor:?}")]
    ZConstructKindMismatch {
        fn_rva: u64,
        from_seed: Option<crate::records::RecordType>,
        called_ctor_rva: u64,
        from_ctor: Option<crate::records::RecordType>,
    },

    /// Two `StaticClass` artefacts disagreed about the RVA of the singleton
    /// body function (`GetPrivateStaticClassBody` or its inlined callee).
    #[error("StaticClass artefacts disagree on the singleton body function: {first:#x} vs {second:#x}")]
    StaticClassBodyMismatch { first: u64, second: u64 },

    /// Two independent discoveries disagreed about what lives at an RVA.
    #[error("conflicting discoveries at RVA {rva:#x}: {new:?} vs existing {existing:?}")]
    ConflictingDiscovery {
        rva: u64,
        new: String,
        existing: String,
    },

    /// Image-level structural error surfaced during analysis.
    #[error(transparent)]
    Image(#[from] ImageError),
}
