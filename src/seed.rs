//! Seed analysis: find the handful of `Z_Construct_UXXX_*` stubs in `.text`
//! by byte pattern, group them by the `UECodeGen_Private::ConstructXXX`
//! function they call, and classify each callee among the five reflection
//! record kinds by trial-parsing its callers' params structs.
//!
//! Performed once per image; the resulting [`SeedIndex`] is threaded through
//! every subsequent strict parse so kind cross-checks have something to
//! check against.

use std::collections::HashMap;

use log::{info, warn};

use crate::disasm::{parse_fn_prelude, parse_z_construct_seed_shape, CodeCursor};
use crate::error::{AnalysisError, AnalysisResult};
use crate::image::Image;
use crate::pattern::Pattern;
use crate::records::{ParsingContext, RecordType};
use crate::stream::StreamMode;

/// One `SUB RSP,0x28` site in `.text` that matched the full seed shape.
#[derive(Debug, Clone, Copy)]
pub struct ZConstructSeed {
    pub fn_rva: u64,
    pub call_rva: u64,
    pub struct_rva: u64,
}

const MAX_ENTRIES: i32 = 0x2000;

/// Finds every `SUB RSP,0x28` in `.text` and keeps the ones whose
/// instructions after it match the full cache-check/call/reload shape.
pub fn find_z_construct_seeds(image: &Image) -> AnalysisResult<Vec<ZConstructSeed>> {
    let anchor = Pattern::compile("48 83 EC 28").expect("fixed anchor pattern is well-formed");
    let mut seeds = Vec::new();
    for fn_rva in image.find_pattern(&anchor, ".text")? {
        match parse_z_construct_seed_shape(image, fn_rva) {
            Ok(shape) => seeds.push(ZConstructSeed {
                fn_rva,
                call_rva: shape.call_rva,
                struct_rva: shape.struct_rva,
            }),
            Err(_) => continue,
        }
    }
    info!("found {} Z_Construct seed candidates", seeds.len());
    Ok(seeds)
}

struct ConstructorGroup {
    call_rva: u64,
    stack_size: i64,
    callers: Vec<ZConstructSeed>,
}

/// Groups seeds by the constructor they call, confirming each callee's
/// stack size once, and sorts ascending by caller count (as the original
/// classification order does, though classification here doesn't depend on
/// the order beyond determinism of iteration).
fn group_by_callee(image: &Image, seeds: &[ZConstructSeed]) -> Vec<ConstructorGroup> {
    let mut by_call_rva: HashMap<u64, Vec<ZConstructSeed>> = HashMap::new();
    for seed in seeds {
        by_call_rva.entry(seed.call_rva).or_default().push(*seed);
    }

    let mut groups = Vec::new();
    let mut call_rvas: Vec<u64> = by_call_rva.keys().copied().collect();
    call_rvas.sort_unstable();
    for call_rva in call_rvas {
        let callers = by_call_rva.remove(&call_rva).unwrap();
        let stack_size = match CodeCursor::new(image, call_rva).and_then(|mut c| parse_fn_prelude(&mut c)) {
            Ok(p) => p.stack_size,
            Err(_) => {
                warn!("failed to get stack size for ZConstruct callee @ {call_rva:#x}");
                continue;
            }
        };
        groups.push(ConstructorGroup { call_rva, stack_size, callers });
    }
    groups.sort_by_key(|g| g.callers.len());
    groups
}

fn in_section(image: &Image, rva: u64, name: &str) -> AnalysisResult<bool> {
    if rva == 0 {
        return Ok(true);
    }
    match image.section_of(rva)? {
        Some(section) => Ok(section.name == name),
        None => Ok(false),
    }
}

/// Tries to parse `struct_rva` as each of the five record layouts in turn,
/// keeping only those whose pointer/count/size fields are all plausible.
/// Returns the record types for which the struct validates; seed
/// classification only trusts a struct whose candidate set has exactly one
/// member.
fn guess_possible_record_types(image: &Image, struct_rva: u64) -> AnalysisResult<Vec<RecordType>> {
    // Any fixed-version ParsingContext works here: none of the nine fixed
    // records (unlike PropertyParams) have version-sensitive layouts.
    let ctx = ParsingContext::new((5, 3, 0));
    let mut hits = Vec::new();

    macro_rules! try_validate {
        ($record_type:expr, $parse:expr, $validate:expr) => {
            if let Ok(stream) = image.stream_at(struct_rva, StreamMode::Strict) {
                let mut stream = stream;
                if let Ok(parsed) = $parse(&mut stream) {
                    if $validate(&parsed).unwrap_or(false) {
                        hits.push($record_type);
                    }
                }
            }
        };
    }

    try_validate!(RecordType::Package, crate::records::PackageParams::parse, |p: &crate::records::PackageParams| {
        validate_package(image, p)
    });
    try_validate!(RecordType::Class, crate::records::ClassParams::parse, |p: &crate::records::ClassParams| {
        validate_class(image, p)
    });
    try_validate!(RecordType::Struct, crate::records::StructParams::parse, |p: &crate::records::StructParams| {
        validate_struct(image, p)
    });
    try_validate!(RecordType::Enum, crate::records::EnumParams::parse, |p: &crate::records::EnumParams| {
        validate_enum(image, p)
    });
    try_validate!(RecordType::Function, crate::records::FunctionParams::parse, |p: &crate::records::FunctionParams| {
        validate_function(image, p)
    });

    let _ = ctx;
    Ok(hits)
}

fn validate_package(image: &Image, p: &crate::records::PackageParams) -> AnalysisResult<bool> {
    if !in_section(image, p.name_utf8, ".rdata")? {
        return Ok(false);
    }
    if p.num_singletons < 0 || p.num_singletons > MAX_ENTRIES {
        return Ok(false);
    }
    if p.num_singletons > 0 && !in_section(image, p.singleton_func_array_fn, ".rdata")? {
        return Ok(false);
    }
    Ok(true)
}

fn validate_class(image: &Image, p: &crate::records::ClassParams) -> AnalysisResult<bool> {
    if !in_section(image, p.class_no_register_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.cpp_class_info, ".rdata")? {
        return Ok(false);
    }
    if !in_section(image, p.class_config_name_utf8, ".rdata")? {
        return Ok(false);
    }
    if p.num_functions < 0 || p.num_properties < 0 || p.num_dependency_singletons < 0 {
        return Ok(false);
    }
    if p.num_functions > MAX_ENTRIES || p.num_properties > MAX_ENTRIES || p.num_dependency_singletons > MAX_ENTRIES {
        return Ok(false);
    }
    if p.num_functions > 0 && !in_section(image, p.function_link_array, ".rdata")? {
        return Ok(false);
    }
    if p.num_properties > 0 && !in_section(image, p.property_array, ".rdata")? {
        return Ok(false);
    }
    if p.num_dependency_singletons > 0 && !in_section(image, p.dependency_singleton_func_array, ".rdata")? {
        return Ok(false);
    }
    Ok(true)
}

fn validate_struct(image: &Image, p: &crate::records::StructParams) -> AnalysisResult<bool> {
    if !in_section(image, p.outer_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.super_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.struct_ops_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.name_utf8, ".rdata")? {
        return Ok(false);
    }
    if p.num_properties < 0 || p.num_properties > MAX_ENTRIES {
        return Ok(false);
    }
    if p.num_properties > 0 && !in_section(image, p.property_array, ".rdata")? {
        return Ok(false);
    }
    if p.size_of > 0x1000000 || p.align_of > 4096 {
        return Ok(false);
    }
    Ok(true)
}

fn validate_enum(image: &Image, p: &crate::records::EnumParams) -> AnalysisResult<bool> {
    if !in_section(image, p.outer_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.display_name_fn, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.name_utf8, ".rdata")? {
        return Ok(false);
    }
    if !in_section(image, p.cpp_type_utf8, ".rdata")? {
        return Ok(false);
    }
    if p.num_enumerators < 0 || p.num_enumerators > MAX_ENTRIES {
        return Ok(false);
    }
    if p.num_enumerators > 0 && !in_section(image, p.enumerator_params, ".rdata")? {
        return Ok(false);
    }
    Ok(true)
}

fn validate_function(image: &Image, p: &crate::records::FunctionParams) -> AnalysisResult<bool> {
    if !in_section(image, p.outer_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.super_func, ".text")? {
        return Ok(false);
    }
    if !in_section(image, p.name_utf8, ".rdata")? {
        return Ok(false);
    }
    if !in_section(image, p.owning_class_name, ".rdata")? {
        return Ok(false);
    }
    if !in_section(image, p.delegate_name, ".rdata")? {
        return Ok(false);
    }
    if p.structure_size > 0x1000000 {
        return Ok(false);
    }
    if p.num_properties < 0 || p.num_properties > MAX_ENTRIES {
        return Ok(false);
    }
    if p.num_properties > 0 && !in_section(image, p.property_array, ".rdata")? {
        return Ok(false);
    }
    Ok(true)
}

/// The lookup tables later strict parsing is cross-checked against. Kept as
/// a field of a long-lived analysis context (not a process global) so
/// multiple images can be analysed independently.
#[derive(Debug, Default, Clone)]
pub struct SeedIndex {
    pub kind_of_zconstruct_fn: HashMap<u64, RecordType>,
    pub kind_of_params_struct: HashMap<u64, RecordType>,
    pub kind_of_constructor_fn: HashMap<u64, RecordType>,
    pub constructor_stack_size: HashMap<u64, i64>,
}

/// Runs seed analysis end to end: pattern sweep, grouping, classification.
/// Fails fatally if the image does not yield exactly five constructors.
pub fn analyse_seeds(image: &Image) -> AnalysisResult<SeedIndex> {
    let seeds = find_z_construct_seeds(image)?;
    let groups = group_by_callee(image, &seeds);

    let mut index = SeedIndex::default();
    let mut classified = 0usize;

    for group in &groups {
        let mut winner = None;
        'callers: for caller in &group.callers {
            let candidates = guess_possible_record_types(image, caller.struct_rva)?;
            if candidates.len() == 1 {
                winner = Some(candidates[0]);
                break 'callers;
            }
        }

        let Some(kind) = winner else {
            warn!("unable to classify ConstructU... @ {:#x}", group.call_rva);
            continue;
        };

        classified += 1;
        index.kind_of_constructor_fn.insert(group.call_rva, kind);
        index.constructor_stack_size.insert(group.call_rva, group.stack_size);
        for caller in &group.callers {
            index.kind_of_zconstruct_fn.insert(caller.fn_rva, kind);
            index.kind_of_params_struct.insert(caller.struct_rva, kind);
        }
    }

    if classified != 5 {
        return Err(AnalysisError::WrongConstructorCount(classified));
    }

    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guess_possible_record_types_rejects_struct_outside_rdata() {
        let bytes = crate::image::test_support::build_minimal_pe(&[0xC3], &[0u8; 256]);
        let image = Image::from_bytes(&bytes).unwrap();
        let (base, _) = image.bytes_of_section(".text").unwrap();
        // An all-zero struct at a .text RVA should validate as nothing: its
        // would-be string/function fields are zero (allowed), but this
        // exercises that the call does not panic on a minimal fixture.
        let candidates = guess_possible_record_types(&image, base).unwrap();
        assert!(candidates.len() <= 1);
    }
}
