//! The three function parsers built on top of [`crate::disasm`]'s
//! primitives: `StaticClass`, strict `ZConstruct`, and the tolerant
//! dispatcher used when a caller is only known to be "one of these two".

use crate::artefact::{ArtefactKind, ParsedFunction, StaticClassArgs, Trampoline, ZConstructArgs};
use crate::disasm::{parse_cached_call, parse_fn_prelude, parse_trampolines, CodeCursor};
use crate::error::{AnalysisError, AnalysisResult};
use crate::image::Image;
use crate::native_enums::{ClassCastFlags, ClassFlags};
use crate::records::RecordType;
use crate::seed::SeedIndex;

/// What a function parser produced: the trampoline hops leading up to it
/// (each recorded at its own RVA) and the span + kind of the real body.
pub struct ParsedFunctionOutcome {
    pub trampolines: Vec<Trampoline>,
    pub trampoline_rvas: Vec<u64>,
    pub start_rva: u64,
    pub end_rva: u64,
    pub kind: ArtefactKind,
}

fn unparsable(parser_tag: &'static str, start_rva: u64, end_rva: u64) -> ParsedFunctionOutcome {
    ParsedFunctionOutcome {
        trampolines: Vec::new(),
        trampoline_rvas: Vec::new(),
        start_rva,
        end_rva,
        kind: ArtefactKind::UnparsableFunction { parser_tag },
    }
}

fn bind_static_class_args(singleton_body_fn_rva: u64, args: &[u64]) -> Option<StaticClassArgs> {
    if args.len() != 14 {
        return None;
    }
    Some(StaticClassArgs {
        singleton_body_fn_rva,
        package_name_rva: args[0],
        name_rva: args[1],
        return_cache_rva: args[2],
        register_fn_rva: args[3],
        size: args[4],
        alignment: args[5],
        class_flags: ClassFlags::from_bits_truncate(args[6] as u32),
        class_cast_flags: ClassCastFlags::from_bits_truncate(args[7]),
        config_name_rva: args[8],
        class_constructor_rva: args[9],
        class_vtable_helper_ctor_caller_rva: args[10],
        class_static_fns_rva: args[11],
        super_class_fn_rva: args[12],
        within_class_fn_rva: args[13],
    })
}

/// Parses a `::StaticClass` stub that calls `GetPrivateStaticClassBody`.
/// Records any leading trampolines and expects exactly 14 marshalled
/// arguments; any other shape is captured as `UnparsableFunction`, never
/// raised as an error.
pub fn parse_static_class_fn(image: &Image, addr: u64) -> AnalysisResult<ParsedFunctionOutcome> {
    let (hops, entry) = match parse_trampolines(image, addr) {
        Ok(r) => r,
        Err(_) => return Ok(unparsable("static_class", addr, addr)),
    };
    let trampolines: Vec<Trampoline> = hops.iter().map(|_| Trampoline { target_rva: entry }).collect();
    let trampoline_rvas: Vec<u64> = hops.iter().map(|h| h.at_rva).collect();

    let start_rva = entry;
    let parsed = match parse_cached_call(image, entry) {
        Ok(p) => p,
        Err(_) => return Ok(unparsable("static_class", start_rva, start_rva)),
    };

    let Some(static_args) = bind_static_class_args(parsed.called_fn_rva, &parsed.arguments) else {
        return Ok(ParsedFunctionOutcome {
            trampolines,
            trampoline_rvas,
            start_rva,
            end_rva: parsed.end_rva,
            kind: ArtefactKind::UnparsableFunction { parser_tag: "static_class" },
        });
    };

    Ok(ParsedFunctionOutcome {
        trampolines,
        trampoline_rvas,
        start_rva,
        end_rva: parsed.end_rva,
        kind: ArtefactKind::ParsedFunction(ParsedFunction::StaticClass(static_args)),
    })
}

fn classify_zconstruct(
    start_rva: u64,
    called_fn_rva: u64,
    seed: &SeedIndex,
) -> AnalysisResult<RecordType> {
    let from_seed = seed.kind_of_zconstruct_fn.get(&start_rva).copied();
    let from_ctor = seed.kind_of_constructor_fn.get(&called_fn_rva).copied();
    match (from_seed, from_ctor) {
        (Some(a), Some(b)) if a == b => Ok(a),
        _ => Err(AnalysisError::ZConstructKindMismatch {
            fn_rva: start_rva,
            from_seed,
            called_ctor_rva: called_fn_rva,
            from_ctor,
        }),
    }
}

/// Parses a `Z_Construct_UXXX_*` stub whose kind is already known from seed
/// analysis. Disagreement between that kind and the constructor it turns
/// out to call is fatal: it signals a corrupt seed index, not a one-off
/// parse failure.
pub fn parse_zconstruct_fn_strict(
    image: &Image,
    addr: u64,
    seed: &SeedIndex,
) -> AnalysisResult<ParsedFunctionOutcome> {
    let (hops, entry) = match parse_trampolines(image, addr) {
        Ok(r) => r,
        Err(_) => return Ok(unparsable("z_construct", addr, addr)),
    };
    let trampolines: Vec<Trampoline> = hops.iter().map(|_| Trampoline { target_rva: entry }).collect();
    let trampoline_rvas: Vec<u64> = hops.iter().map(|h| h.at_rva).collect();
    let start_rva = entry;

    let parsed = match parse_cached_call(image, entry) {
        Ok(p) => p,
        Err(_) => return Ok(unparsable("z_construct", start_rva, start_rva)),
    };

    if parsed.arguments.len() != 2 {
        return Ok(ParsedFunctionOutcome {
            trampolines,
            trampoline_rvas,
            start_rva,
            end_rva: parsed.end_rva,
            kind: ArtefactKind::UnparsableFunction { parser_tag: "z_construct" },
        });
    }

    let kind = classify_zconstruct(start_rva, parsed.called_fn_rva, seed)?;

    Ok(ParsedFunctionOutcome {
        trampolines,
        trampoline_rvas,
        start_rva,
        end_rva: parsed.end_rva,
        kind: ArtefactKind::ParsedFunction(ParsedFunction::ZConstruct(ZConstructArgs {
            called_record_type: kind,
            called_fn_rva: parsed.called_fn_rva,
            cache_rva: parsed.cache_rva,
            params_struct_rva: parsed.arguments[1],
        })),
    })
}

/// Parses a stub only known to be "one of StaticClass or ZConstruct",
/// dispatching on the marshalled argument count once parsed.
pub fn parse_zconstruct_or_static_class_fn(
    image: &Image,
    addr: u64,
    seed: &SeedIndex,
) -> AnalysisResult<ParsedFunctionOutcome> {
    let (hops, entry) = match parse_trampolines(image, addr) {
        Ok(r) => r,
        Err(_) => return Ok(unparsable("z_construct_or_static_class", addr, addr)),
    };
    let trampolines: Vec<Trampoline> = hops.iter().map(|_| Trampoline { target_rva: entry }).collect();
    let trampoline_rvas: Vec<u64> = hops.iter().map(|h| h.at_rva).collect();
    let start_rva = entry;

    let parsed = match parse_cached_call(image, entry) {
        Ok(p) => p,
        Err(_) => return Ok(unparsable("z_construct_or_static_class", start_rva, start_rva)),
    };

    let kind = match parsed.arguments.len() {
        2 => match classify_zconstruct(start_rva, parsed.called_fn_rva, seed) {
            Ok(kind) => ArtefactKind::ParsedFunction(ParsedFunction::ZConstruct(ZConstructArgs {
                called_record_type: kind,
                called_fn_rva: parsed.called_fn_rva,
                cache_rva: parsed.cache_rva,
                params_struct_rva: parsed.arguments[1],
            })),
            Err(_) => ArtefactKind::UnparsableFunction { parser_tag: "z_construct_or_static_class" },
        },
        14 => match bind_static_class_args(parsed.called_fn_rva, &parsed.arguments) {
            Some(args) => ArtefactKind::ParsedFunction(ParsedFunction::StaticClass(args)),
            None => ArtefactKind::UnparsableFunction { parser_tag: "z_construct_or_static_class" },
        },
        _ => ArtefactKind::UnparsableFunction { parser_tag: "z_construct_or_static_class" },
    };

    Ok(ParsedFunctionOutcome { trampolines, trampoline_rvas, start_rva, end_rva: parsed.end_rva, kind })
}

/// `MOV R11,RSP ; SUB RSP,imm8` — the 7-byte prologue the second-pass
/// backward scan looks for. Specifically `R11`, matching the register the
/// argument-marshalling block addresses stack slots through.
pub fn is_static_class_prologue(image: &Image, addr: u64) -> bool {
    let Ok(mut cursor) = CodeCursor::new(image, addr) else { return false };
    match parse_fn_prelude(&mut cursor) {
        Ok(p) => p.stack_save_reg == Some(iced_x86::Register::R11),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_static_class_args_rejects_wrong_arity() {
        assert!(bind_static_class_args(0x1000, &[1, 2, 3]).is_none());
    }

    #[test]
    fn bind_static_class_args_maps_positions() {
        let args: Vec<u64> = (0..14).collect();
        let bound = bind_static_class_args(0x1000, &args).unwrap();
        assert_eq!(bound.singleton_body_fn_rva, 0x1000);
        assert_eq!(bound.package_name_rva, 0);
        assert_eq!(bound.within_class_fn_rva, 13);
    }

    #[test]
    fn parse_static_class_fn_recovers_all_fourteen_arguments() {
        use crate::image::test_support::build_minimal_pe;
        use crate::image::Image;

        // MOV R11,RSP ; SUB RSP,0x48 ; CMP qword[rip+cache],0 ; JNE +0 ;
        // fourteen argument setups (pointer fields via LEA RAX/MOV [R11+d],
        // RAX; size/alignment/flag fields via MOV qword [R11+d],imm32) ;
        // CALL sentinel ; MOV RAX,[rip+cache] ; ADD RSP,0x48 ; RET.
        let text: Vec<u8> = vec![
            0x4C, 0x8B, 0xDC, 0x48, 0x83, 0xEC, 0x48, 0x48, 0x83, 0x3D, 0xF1, 0x14, 0x00, 0x00,
            0x00, 0x75, 0x00, 0x48, 0x8D, 0x05, 0xF8, 0x0F, 0x00, 0x00, 0x49, 0x89, 0x43, 0x90,
            0x48, 0x8D, 0x05, 0xFD, 0x0F, 0x00, 0x00, 0x49, 0x89, 0x43, 0x98, 0x48, 0x8D, 0x05,
            0x02, 0x10, 0x00, 0x00, 0x49, 0x89, 0x43, 0xA0, 0x48, 0x8D, 0x05, 0x07, 0x10, 0x00,
            0x00, 0x49, 0x89, 0x43, 0xA8, 0x49, 0xC7, 0x43, 0xB0, 0xD8, 0x00, 0x00, 0x00, 0x49,
            0xC7, 0x43, 0xB8, 0x08, 0x00, 0x00, 0x00, 0x49, 0xC7, 0x43, 0xC0, 0x00, 0x00, 0x00,
            0x00, 0x49, 0xC7, 0x43, 0xC8, 0x00, 0x00, 0x00, 0x00, 0x48, 0x8D, 0x05, 0xEC, 0x0F,
            0x00, 0x00, 0x49, 0x89, 0x43, 0xD0, 0x48, 0x8D, 0x05, 0xF1, 0x0F, 0x00, 0x00, 0x49,
            0x89, 0x43, 0xD8, 0x48, 0x8D, 0x05, 0xF6, 0x0F, 0x00, 0x00, 0x49, 0x89, 0x43, 0xE0,
            0x48, 0x8D, 0x05, 0xFB, 0x0F, 0x00, 0x00, 0x49, 0x89, 0x43, 0xE8, 0x48, 0x8D, 0x05,
            0x00, 0x10, 0x00, 0x00, 0x49, 0x89, 0x43, 0xF0, 0x48, 0x8D, 0x05, 0x05, 0x10, 0x00,
            0x00, 0x49, 0x89, 0x43, 0xF8, 0xE8, 0x5C, 0x17, 0x00, 0x00, 0x48, 0x8B, 0x05, 0x55,
            0x14, 0x00, 0x00, 0x48, 0x83, 0xC4, 0x48, 0xC3,
        ];
        let bytes = build_minimal_pe(&text, &[0u8; 16]);
        let image = Image::from_bytes(&bytes).unwrap();
        let (base, _) = image.bytes_of_section(".text").unwrap();
        let (rdata_base, _) = image.bytes_of_section(".rdata").unwrap();

        let outcome = parse_static_class_fn(&image, base).unwrap();
        assert_eq!(outcome.start_rva, base);
        assert!(outcome.end_rva > outcome.start_rva);

        let ArtefactKind::ParsedFunction(ParsedFunction::StaticClass(args)) = outcome.kind else {
            panic!("expected a parsed StaticClass artefact, got something else");
        };
        assert_eq!(args.singleton_body_fn_rva, rdata_base + 0x800);
        assert_eq!(args.package_name_rva, rdata_base + 0x10);
        assert_eq!(args.name_rva, rdata_base + 0x20);
        assert_eq!(args.return_cache_rva, rdata_base + 0x30);
        assert_eq!(args.register_fn_rva, rdata_base + 0x40);
        assert_eq!(args.size, 0xD8);
        assert_eq!(args.alignment, 0x08);
        assert!(args.class_flags.is_empty());
        assert!(args.class_cast_flags.is_empty());
        assert_eq!(args.config_name_rva, rdata_base + 0x50);
        assert_eq!(args.class_constructor_rva, rdata_base + 0x60);
        assert_eq!(args.class_vtable_helper_ctor_caller_rva, rdata_base + 0x70);
        assert_eq!(args.class_static_fns_rva, rdata_base + 0x80);
        assert_eq!(args.super_class_fn_rva, rdata_base + 0x90);
        assert_eq!(args.within_class_fn_rva, rdata_base + 0xA0);
    }

    #[test]
    fn is_static_class_prologue_rejects_other_save_register() {
        use crate::image::test_support::build_minimal_pe;
        use crate::image::Image;

        // MOV RBX,RSP ; SUB RSP,0x28 — saves RSP, but not into R11.
        let text = vec![0x48, 0x8B, 0xDC, 0x48, 0x83, 0xEC, 0x28, 0xC3];
        let bytes = build_minimal_pe(&text, &[]);
        let image = Image::from_bytes(&bytes).unwrap();
        let (base, _) = image.bytes_of_section(".text").unwrap();
        assert!(!is_static_class_prologue(&image, base));
    }
}
