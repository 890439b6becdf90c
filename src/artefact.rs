//! Artefacts: things the discovery engine has found, at a known RVA range.
//!
//! Mirrors the source's dynamically-typed `found: dict[int, Artefact]` as an
//! explicit tagged union, so [`crate::worklist::Worklist`] can store one map
//! without trait objects.

use crate::native_enums::{ClassCastFlags, ClassFlags};
use crate::records::RecordType;

/// Every artefact spans the bytes it was parsed from.
#[derive(Debug, Clone, PartialEq)]
pub struct Artefact {
    pub start_rva: u64,
    pub end_rva: u64,
    pub kind: ArtefactKind,
}

impl Artefact {
    pub fn new(start_rva: u64, end_rva: u64, kind: ArtefactKind) -> Self {
        Artefact { start_rva, end_rva, kind }
    }

    /// Short tag for diagnostics and summary counts.
    pub fn kind_name(&self) -> &'static str {
        match &self.kind {
            ArtefactKind::String(_) => "string",
            ArtefactKind::StructRecord(_) => "struct",
            ArtefactKind::ParsedFunction(_) => "function",
            ArtefactKind::UnparsableFunction { .. } => "unparsable-function",
            ArtefactKind::Trampoline(_) => "trampoline",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringEncoding {
    Utf8,
    Utf16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringArtefact {
    pub encoding: StringEncoding,
    pub string: String,
}

/// One of the nine record layouts, tagged with its [`RecordType`] so the
/// worklist's by-type indices key uniformly on that enum rather than a Rust
/// type id.
#[derive(Debug, Clone, PartialEq)]
pub enum StructRecord {
    Package(crate::records::PackageParams),
    Class(crate::records::ClassParams),
    Struct(crate::records::StructParams),
    Enum(crate::records::EnumParams),
    Function(crate::records::FunctionParams),
    Enumerator(crate::records::EnumeratorParams),
    ImplementedInterface(crate::records::ImplementedInterfaceParams),
    ClassFunctionLinkInfo(crate::records::ClassFunctionLinkInfo),
    Property(crate::records::PropertyParams),
}

impl StructRecord {
    pub fn record_type(&self) -> RecordType {
        match self {
            StructRecord::Package(_) => RecordType::Package,
            StructRecord::Class(_) => RecordType::Class,
            StructRecord::Struct(_) => RecordType::Struct,
            StructRecord::Enum(_) => RecordType::Enum,
            StructRecord::Function(_) => RecordType::Function,
            StructRecord::Enumerator(_) => RecordType::Enumerator,
            StructRecord::ImplementedInterface(_) => RecordType::ImplementedInterface,
            StructRecord::ClassFunctionLinkInfo(_) => RecordType::ClassFunctionLinkInfo,
            StructRecord::Property(_) => RecordType::Property,
        }
    }
}

/// The 14 arguments passed to `GetPrivateStaticClassBody`, bound to named
/// fields by their position in the call's descending-stack-offset order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticClassArgs {
    /// RVA of the function this stub calls to marshal the arguments below —
    /// `GetPrivateStaticClassBody` itself, or whatever the binary inlines in
    /// its place. Every `StaticClass` artefact must agree on this RVA.
    pub singleton_body_fn_rva: u64,
    pub package_name_rva: u64,
    pub name_rva: u64,
    pub return_cache_rva: u64,
    pub register_fn_rva: u64,
    pub size: u64,
    pub alignment: u64,
    pub class_flags: ClassFlags,
    pub class_cast_flags: ClassCastFlags,
    pub config_name_rva: u64,
    pub class_constructor_rva: u64,
    pub class_vtable_helper_ctor_caller_rva: u64,
    pub class_static_fns_rva: u64,
    pub super_class_fn_rva: u64,
    pub within_class_fn_rva: u64,
}

/// A `Z_Construct_UXXX_*` stub's cached-call arguments, once the constructor
/// it calls has been classified by seed analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZConstructArgs {
    pub called_record_type: RecordType,
    pub called_fn_rva: u64,
    pub cache_rva: u64,
    pub params_struct_rva: u64,
}

/// A function that parsed successfully, keyed by which shape it was parsed as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedFunction {
    StaticClass(StaticClassArgs),
    ZConstruct(ZConstructArgs),
}

/// A single `JMP rel32` thunk at this RVA, resolving to a parsed function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trampoline {
    pub target_rva: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ArtefactKind {
    String(StringArtefact),
    StructRecord(StructRecord),
    ParsedFunction(ParsedFunction),
    /// Disassembly could not make sense of this function; the attempt is
    /// remembered rather than dropped, tagged with which parser tried it.
    UnparsableFunction { parser_tag: &'static str },
    Trampoline(Trampoline),
}
