//! Discoveries: pending work referring to an RVA still to be parsed.
//!
//! A discovery is queued by seed analysis or by an explorer reacting to a
//! just-registered artefact (see [`crate::worklist`]). Two discoveries are
//! reconciled by [`Discovery::compare`] when they land on the same RVA.

use crate::artefact::StringEncoding;
use crate::records::RecordType;

/// Outcome of reconciling a freshly-queued discovery against one already
/// pending at the same RVA.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryComparison {
    /// The two disagree about what lives at this RVA: fatal.
    NoMatch,
    /// Equivalent; discard the new one.
    Keep,
    /// The new one is strictly more specific; it replaces the pending one.
    Replace,
}

/// Which struct record type a [`DiscoveryKind::Struct`] should be parsed as.
///
/// `RecordType::Property` is reachable here even though its layout is
/// version-dependent: [`crate::records::PropertyParams::parse`] takes the
/// `ParsingContext` from the surrounding analysis, not from the discovery.
pub use RecordType as StructKind;

/// Which function parser a [`DiscoveryKind::Function`] should use, and
/// (for the tolerant and strict Z-construct parsers) the hint accumulated
/// about what it calls so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FunctionParserKind {
    /// `GetPrivateStaticClassBody`-calling stub; expects 14 arguments.
    StaticClass,
    /// `UECodeGen_Private::ConstructXXX`-calling stub of known kind,
    /// cross-checked fatally against the constructor it turns out to call.
    ZConstruct,
    /// Caller only known to be "one of these two"; dispatches on argument
    /// count once parsed.
    ZConstructOrStaticClass,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryKind {
    StringUtf8,
    StringUtf16,
    Struct(StructKind),
}

impl DiscoveryKind {
    pub fn as_string_encoding(self) -> Option<StringEncoding> {
        match self {
            DiscoveryKind::StringUtf8 => Some(StringEncoding::Utf8),
            DiscoveryKind::StringUtf16 => Some(StringEncoding::Utf16),
            DiscoveryKind::Struct(_) => None,
        }
    }
}

/// Pending work: an RVA paired with what we expect to find there.
///
/// `Discovery::Function` is kept as its own top-level variant rather than
/// folded into [`DiscoveryKind`] because its hint participates in
/// reconciliation differently from every other kind (see [`Discovery::compare`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Discovery {
    String { ptr: u64, encoding: StringEncoding },
    Struct { ptr: u64, kind: StructKind },
    Function { ptr: u64, parser: FunctionParserKind, hint: Option<RecordType> },
}

impl Discovery {
    pub fn ptr(&self) -> u64 {
        match *self {
            Discovery::String { ptr, .. } => ptr,
            Discovery::Struct { ptr, .. } => ptr,
            Discovery::Function { ptr, .. } => ptr,
        }
    }

    pub fn string_utf8(ptr: u64) -> Self {
        Discovery::String { ptr, encoding: StringEncoding::Utf8 }
    }

    pub fn string_utf16(ptr: u64) -> Self {
        Discovery::String { ptr, encoding: StringEncoding::Utf16 }
    }

    pub fn function(ptr: u64, parser: FunctionParserKind, hint: Option<RecordType>) -> Self {
        Discovery::Function { ptr, parser, hint }
    }

    /// Invariant enforced by [`crate::worklist::Worklist::enqueue`], not here:
    /// `ptr != 0 && ptr != 0xFFFF_FFFF_FFFF_FFFF`.
    pub fn is_null_sentinel(ptr: u64) -> bool {
        ptr == 0 || ptr == 0xFFFF_FFFF_FFFF_FFFF
    }

    /// Reconcile `self` (newly queued) against `previous` (already pending
    /// at the same RVA).
    pub fn compare(&self, previous: &Discovery) -> DiscoveryComparison {
        match (self, previous) {
            (
                Discovery::Function { parser: sp, hint: sh, .. },
                Discovery::Function { parser: pp, hint: ph, .. },
            ) => {
                if sp != pp {
                    return DiscoveryComparison::NoMatch;
                }
                match (sh, ph) {
                    (Some(s), Some(p)) => {
                        if s == p {
                            DiscoveryComparison::Keep
                        } else {
                            DiscoveryComparison::NoMatch
                        }
                    }
                    (Some(_), None) => DiscoveryComparison::Replace,
                    (None, _) => DiscoveryComparison::Keep,
                }
            }
            _ => {
                if self == previous {
                    DiscoveryComparison::Keep
                } else {
                    DiscoveryComparison::NoMatch
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_comparison_keeps_identical_struct_discoveries() {
        let a = Discovery::Struct { ptr: 0x1000, kind: RecordType::Package };
        let b = Discovery::Struct { ptr: 0x1000, kind: RecordType::Package };
        assert_eq!(a.compare(&b), DiscoveryComparison::Keep);
    }

    #[test]
    fn default_comparison_rejects_differing_struct_kinds() {
        let a = Discovery::Struct { ptr: 0x1000, kind: RecordType::Package };
        let b = Discovery::Struct { ptr: 0x1000, kind: RecordType::Class };
        assert_eq!(a.compare(&b), DiscoveryComparison::NoMatch);
    }

    #[test]
    fn function_discovery_rejects_parser_mismatch() {
        let a = Discovery::function(0x2000, FunctionParserKind::StaticClass, None);
        let b = Discovery::function(0x2000, FunctionParserKind::ZConstruct, None);
        assert_eq!(a.compare(&b), DiscoveryComparison::NoMatch);
    }

    #[test]
    fn function_discovery_replaces_toward_more_specific_hint() {
        let hinted = Discovery::function(0x2000, FunctionParserKind::ZConstruct, Some(RecordType::Class));
        let hintless = Discovery::function(0x2000, FunctionParserKind::ZConstruct, None);
        assert_eq!(hinted.compare(&hintless), DiscoveryComparison::Replace);
        assert_eq!(hintless.compare(&hinted), DiscoveryComparison::Keep);
    }

    #[test]
    fn function_discovery_rejects_conflicting_hints() {
        let a = Discovery::function(0x2000, FunctionParserKind::ZConstruct, Some(RecordType::Class));
        let b = Discovery::function(0x2000, FunctionParserKind::ZConstruct, Some(RecordType::Struct));
        assert_eq!(a.compare(&b), DiscoveryComparison::NoMatch);
    }

    #[test]
    fn function_discovery_keeps_identical_hints() {
        let a = Discovery::function(0x2000, FunctionParserKind::ZConstruct, Some(RecordType::Class));
        let b = Discovery::function(0x2000, FunctionParserKind::ZConstruct, Some(RecordType::Class));
        assert_eq!(a.compare(&b), DiscoveryComparison::Keep);
    }

    #[test]
    fn null_and_sentinel_pointers_are_recognised() {
        assert!(Discovery::is_null_sentinel(0));
        assert!(Discovery::is_null_sentinel(0xFFFF_FFFF_FFFF_FFFF));
        assert!(!Discovery::is_null_sentinel(0x1000));
    }
}
