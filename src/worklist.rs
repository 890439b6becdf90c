//! The discovery worklist: pending queue, found index, and the six
//! categorised result indices.
//!
//! Grounded on `DiscoverySystem` (enqueue/process_one/process_all, the
//! same categorised dict-of-dicts, the same linear `find_container`). The
//! difference from that original is that there is no dynamic explorer
//! dispatch here: `process_one` calls into `crate::functions`/`crate::explorer`
//! directly, keyed on the tag already carried by the `Discovery`/`Artefact`
//! it is holding.

use std::collections::HashMap;

use log::{debug, error, warn};

use crate::artefact::{Artefact, ArtefactKind, StringArtefact, StructRecord, Trampoline};
use crate::discovery::{Discovery, DiscoveryComparison, FunctionParserKind};
use crate::error::AnalysisResult;
use crate::records::RecordType;

/// Queue of pending work plus every artefact registered so far, indexed
/// the way the specification's `found` description requires.
#[derive(Default)]
pub struct Worklist {
    pending: HashMap<u64, Discovery>,
    found: HashMap<u64, Artefact>,

    found_strings: HashMap<u64, StringArtefact>,
    found_structs_by_type: HashMap<RecordType, Vec<u64>>,
    found_structs_by_type_and_ptr: HashMap<RecordType, HashMap<u64, StructRecord>>,
    found_functions_by_type: HashMap<FunctionParserKind, Vec<u64>>,
    found_functions_by_type_and_ptr: HashMap<FunctionParserKind, std::collections::HashSet<u64>>,
    found_trampolines: HashMap<u64, Trampoline>,
}

impl Worklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a pending discovery. Duplicates that match an existing pending
    /// or found entry are dropped; ones that are strictly more specific
    /// replace the pending entry; disagreements are fatal.
    pub fn enqueue(&mut self, discovery: Discovery) -> AnalysisResult<()> {
        let ptr = discovery.ptr();
        if Discovery::is_null_sentinel(ptr) {
            return Ok(());
        }

        debug!("queuing {discovery:?}");
        if self.found.contains_key(&ptr) {
            debug!("skipping as a duplicate of a found artefact");
            return Ok(());
        }

        match self.pending.get(&ptr) {
            None => {
                self.pending.insert(ptr, discovery);
            }
            Some(existing) => match discovery.compare(existing) {
                DiscoveryComparison::NoMatch => {
                    error!("conflicting discovery @ {ptr:#x}: {discovery:?} vs {existing:?}");
                    return Err(crate::error::AnalysisError::ConflictingDiscovery {
                        rva: ptr,
                        new: format!("{discovery:?}"),
                        existing: format!("{existing:?}"),
                    });
                }
                DiscoveryComparison::Replace => {
                    debug!("replacing pending discovery @ {ptr:#x}");
                    self.pending.insert(ptr, discovery);
                }
                DiscoveryComparison::Keep => {
                    debug!("keeping pending discovery @ {ptr:#x}");
                }
            },
        }
        Ok(())
    }

    /// True while there is still pending work.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// Remove and return one pending discovery, in arbitrary order. Every
    /// discovery is always "ready" in this design; there is no staging.
    pub fn take_one(&mut self) -> Option<Discovery> {
        let ptr = *self.pending.keys().next()?;
        self.pending.remove(&ptr)
    }

    /// Register a freshly-parsed artefact for `ptr`. Logged and categorised
    /// into the type-specific indices; never overwrites an existing entry.
    pub fn register(&mut self, ptr: u64, artefact: Artefact) {
        debug!("registering {} @ {ptr:#x}", artefact.kind_name());

        match &artefact.kind {
            ArtefactKind::String(s) => {
                self.found_strings.insert(ptr, s.clone());
            }
            ArtefactKind::StructRecord(record) => {
                let ty = record.record_type();
                self.found_structs_by_type.entry(ty).or_default().push(ptr);
                self.found_structs_by_type_and_ptr
                    .entry(ty)
                    .or_default()
                    .insert(ptr, record.clone());
            }
            ArtefactKind::ParsedFunction(_) => {
                // Functions are categorised by the discovery that requested
                // them, not by their own payload; see `register_function`.
            }
            ArtefactKind::UnparsableFunction { .. } => {}
            ArtefactKind::Trampoline(t) => {
                self.found_trampolines.insert(ptr, *t);
            }
        }

        self.found.insert(ptr, artefact);
    }

    /// Record which [`FunctionParserKind`] a just-registered function
    /// artefact was discovered via. Split from [`Worklist::register`] because
    /// the categorisation key (which parser was requested) is a property of
    /// the `Discovery`, not of the `Artefact` it produced.
    pub fn categorise_function(&mut self, ptr: u64, parser: FunctionParserKind) {
        self.found_functions_by_type.entry(parser).or_default().push(ptr);
        self.found_functions_by_type_and_ptr.entry(parser).or_default().insert(ptr);
    }

    /// Look up a parsed function by RVA, but only if it was discovered via
    /// `parser` specifically.
    pub fn function_at(&self, rva: u64, parser: FunctionParserKind) -> Option<&Artefact> {
        if self.found_functions_by_type_and_ptr.get(&parser)?.contains(&rva) {
            self.found.get(&rva)
        } else {
            None
        }
    }

    pub fn found_artefact(&self, rva: u64) -> Option<&Artefact> {
        self.found.get(&rva)
    }

    pub fn string_at(&self, rva: u64) -> Option<&StringArtefact> {
        self.found_strings.get(&rva)
    }

    pub fn struct_of(&self, rva: u64, record_type: RecordType) -> Option<&StructRecord> {
        self.found_structs_by_type_and_ptr.get(&record_type)?.get(&rva)
    }

    pub fn structs_of_type(&self, record_type: RecordType) -> &[u64] {
        self.found_structs_by_type
            .get(&record_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn functions_of_kind(&self, parser: FunctionParserKind) -> &[u64] {
        self.found_functions_by_type
            .get(&parser)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Find the artefact whose `[start_rva, end_rva)` span contains `rva`.
    ///
    /// Linear scan, as in the source this is grounded on: not a
    /// performance-critical path.
    pub fn find_container(&self, rva: u64) -> Option<&Artefact> {
        self.found.values().find(|a| a.start_rva <= rva && rva < a.end_rva)
    }

    /// Counts of registered artefacts, grouped by [`Artefact::kind_name`].
    pub fn summary(&self) -> HashMap<&'static str, usize> {
        let mut counts: HashMap<&'static str, usize> = HashMap::new();
        for artefact in self.found.values() {
            *counts.entry(artefact.kind_name()).or_insert(0) += 1;
        }
        counts
    }

    pub fn found_len(&self) -> usize {
        self.found.len()
    }

    pub fn all_trampolines(&self) -> impl Iterator<Item = (u64, &Trampoline)> {
        self.found_trampolines.iter().map(|(rva, t)| (*rva, t))
    }

    /// Log `context` and the error, matching the "logged with full context
    /// and re-raised" contract for failures inside parsers/explorers.
    pub fn log_processing_error(context: &str, err: &impl std::fmt::Display) {
        warn!("error while processing {context}: {err}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artefact::{StringArtefact, StringEncoding};
    use crate::discovery::Discovery;

    #[test]
    fn enqueue_drops_null_and_sentinel_pointers() {
        let mut wl = Worklist::new();
        wl.enqueue(Discovery::string_utf8(0)).unwrap();
        wl.enqueue(Discovery::string_utf8(0xFFFF_FFFF_FFFF_FFFF)).unwrap();
        assert!(!wl.has_pending());
    }

    #[test]
    fn enqueue_keeps_identical_duplicate() {
        let mut wl = Worklist::new();
        wl.enqueue(Discovery::string_utf8(0x1000)).unwrap();
        wl.enqueue(Discovery::string_utf8(0x1000)).unwrap();
        assert_eq!(wl.pending.len(), 1);
    }

    #[test]
    fn enqueue_rejects_conflicting_duplicate() {
        let mut wl = Worklist::new();
        wl.enqueue(Discovery::string_utf8(0x1000)).unwrap();
        let err = wl.enqueue(Discovery::string_utf16(0x1000)).unwrap_err();
        assert!(matches!(err, crate::error::AnalysisError::ConflictingDiscovery { .. }));
    }

    #[test]
    fn enqueue_rejects_two_differently_hinted_zconstruct_discoveries_at_same_rva() {
        let mut wl = Worklist::new();
        wl.enqueue(Discovery::function(0x3000, FunctionParserKind::ZConstruct, Some(RecordType::Class))).unwrap();
        let err = wl
            .enqueue(Discovery::function(0x3000, FunctionParserKind::ZConstruct, Some(RecordType::Struct)))
            .unwrap_err();
        assert!(matches!(err, crate::error::AnalysisError::ConflictingDiscovery { .. }));
    }

    #[test]
    fn enqueue_skips_rva_already_found() {
        let mut wl = Worklist::new();
        wl.register(
            0x2000,
            Artefact::new(
                0x2000,
                0x2010,
                ArtefactKind::String(StringArtefact { encoding: StringEncoding::Utf8, string: "x".into() }),
            ),
        );
        wl.enqueue(Discovery::string_utf8(0x2000)).unwrap();
        assert!(!wl.has_pending());
    }

    #[test]
    fn find_container_matches_half_open_span() {
        let mut wl = Worklist::new();
        wl.register(
            0x3000,
            Artefact::new(
                0x3000,
                0x3010,
                ArtefactKind::String(StringArtefact { encoding: StringEncoding::Utf8, string: "x".into() }),
            ),
        );
        assert!(wl.find_container(0x3000).is_some());
        assert!(wl.find_container(0x300f).is_some());
        assert!(wl.find_container(0x3010).is_none());
        assert!(wl.find_container(0x2fff).is_none());
    }
}
