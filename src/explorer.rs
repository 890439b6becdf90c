//! Component H: the explorer registry, and component K: the follow-up
//! discoveries each record type's explorer enqueues on top of a
//! just-registered struct artefact.
//!
//! Grounded on `ue/explorer/params.py` and `ue/explorer/property_params.py`:
//! one function per record type, each a generator of further discoveries
//! over the record's pointer/array fields. The registry itself mirrors
//! `discovery/system.py`'s `register_explorer`/`get_explorer_for_type`
//! (one-shot registration by type, read-only after startup), adapted to a
//! `HashMap<RecordType, fn(...)>` instead of dynamic dispatch on the Python
//! runtime type.

use std::collections::HashMap;

use log::warn;

use crate::artefact::StructRecord;
use crate::discovery::{Discovery, FunctionParserKind};
use crate::error::AnalysisResult;
use crate::image::Image;
use crate::records::{PropertyTail, RecordType};
use crate::stream::StreamMode;
use crate::worklist::Worklist;

pub type ExplorerFn = fn(&Image, &StructRecord, &mut Worklist) -> AnalysisResult<()>;

/// Maps a record type to the function that enqueues its follow-up
/// discoveries. Populated once via [`ExplorerRegistry::with_defaults`] and
/// then only read; a second registration attempt for the same type is kept
/// from clobbering the first and is logged instead.
#[derive(Default)]
pub struct ExplorerRegistry {
    explorers: HashMap<RecordType, ExplorerFn>,
}

impl ExplorerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, record_type: RecordType, explorer: ExplorerFn) {
        if self.explorers.contains_key(&record_type) {
            warn!("explorer for {record_type:?} already registered; ignoring re-registration");
            return;
        }
        self.explorers.insert(record_type, explorer);
    }

    pub fn get(&self, record_type: RecordType) -> Option<ExplorerFn> {
        self.explorers.get(&record_type).copied()
    }

    /// The full set of explorers this crate ships, one per record type.
    pub fn with_defaults() -> Self {
        let mut reg = Self::new();
        reg.register(RecordType::Package, explore_package);
        reg.register(RecordType::Class, explore_class);
        reg.register(RecordType::Struct, explore_struct);
        reg.register(RecordType::Enum, explore_enum);
        reg.register(RecordType::Function, explore_function);
        reg.register(RecordType::Enumerator, explore_enumerator);
        reg.register(RecordType::ImplementedInterface, explore_implemented_interface);
        reg.register(RecordType::ClassFunctionLinkInfo, explore_class_function_link_info);
        reg.register(RecordType::Property, explore_property);
        reg
    }
}

fn non_negative(context: &str, rva: u64, count: i32) -> usize {
    if count < 0 {
        warn!("{context} at {rva:#x} has a negative count ({count}); treating as empty");
        0
    } else {
        count as usize
    }
}

/// Dereferences the pointer array at `base_ptr` (an array of `count`
/// function/struct pointers, each itself a further discovery).
fn read_ptr_array(image: &Image, base_ptr: u64, count: usize) -> AnalysisResult<Vec<u64>> {
    if count == 0 {
        return Ok(Vec::new());
    }
    let mut stream = image.stream_at(base_ptr, StreamMode::Strict)?;
    Ok(stream.ptr_array(count)?)
}

fn tolerant(ptr: u64, hint: Option<RecordType>) -> Discovery {
    Discovery::function(ptr, FunctionParserKind::ZConstructOrStaticClass, hint)
}

fn explore_package(image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Package(p) = subject else { return Ok(()) };

    worklist.enqueue(Discovery::string_utf8(p.name_utf8))?;

    if p.singleton_func_array_fn != 0 {
        let count = non_negative("Package.NumSingletons", p.singleton_func_array_fn, p.num_singletons);
        for ptr in read_ptr_array(image, p.singleton_func_array_fn, count)? {
            worklist.enqueue(tolerant(ptr, Some(RecordType::Function)))?;
        }
    }
    Ok(())
}

fn explore_class(image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Class(p) = subject else { return Ok(()) };

    worklist.enqueue(Discovery::function(p.class_no_register_func, FunctionParserKind::StaticClass, None))?;
    worklist.enqueue(Discovery::string_utf8(p.class_config_name_utf8))?;

    if p.dependency_singleton_func_array != 0 {
        let count = non_negative(
            "Class.NumDependencySingletons",
            p.dependency_singleton_func_array,
            p.num_dependency_singletons,
        );
        for ptr in read_ptr_array(image, p.dependency_singleton_func_array, count)? {
            worklist.enqueue(tolerant(ptr, None))?;
        }
    }

    if p.function_link_array != 0 {
        let count = non_negative("Class.NumFunctions", p.function_link_array, p.num_functions);
        for i in 0..count {
            let ptr = p.function_link_array + (crate::records::ClassFunctionLinkInfo::SIZE * i) as u64;
            worklist.enqueue(Discovery::Struct { ptr, kind: RecordType::ClassFunctionLinkInfo })?;
        }
    }

    if p.property_array != 0 {
        let count = non_negative("Class.NumProperties", p.property_array, p.num_properties);
        for ptr in read_ptr_array(image, p.property_array, count)? {
            worklist.enqueue(Discovery::Struct { ptr, kind: RecordType::Property })?;
        }
    }

    if p.implemented_interface_array != 0 {
        let count = non_negative(
            "Class.NumImplementedInterfaces",
            p.implemented_interface_array,
            p.num_implemented_interfaces,
        );
        for i in 0..count {
            let ptr = p.implemented_interface_array + (crate::records::ImplementedInterfaceParams::SIZE * i) as u64;
            worklist.enqueue(Discovery::Struct { ptr, kind: RecordType::ImplementedInterface })?;
        }
    }

    Ok(())
}

fn explore_struct(image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Struct(p) = subject else { return Ok(()) };

    worklist.enqueue(tolerant(p.outer_func, None))?;
    worklist.enqueue(tolerant(p.super_func, None))?;
    worklist.enqueue(Discovery::string_utf8(p.name_utf8))?;

    if p.property_array != 0 {
        let count = non_negative("Struct.NumProperties", p.property_array, p.num_properties);
        for ptr in read_ptr_array(image, p.property_array, count)? {
            worklist.enqueue(Discovery::Struct { ptr, kind: RecordType::Property })?;
        }
    }
    Ok(())
}

fn explore_enum(image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Enum(p) = subject else { return Ok(()) };

    worklist.enqueue(tolerant(p.outer_func, None))?;
    worklist.enqueue(Discovery::string_utf8(p.name_utf8))?;
    worklist.enqueue(Discovery::string_utf8(p.cpp_type_utf8))?;

    if p.enumerator_params != 0 {
        let count = non_negative("Enum.NumEnumerators", p.enumerator_params, p.num_enumerators);
        for i in 0..count {
            let ptr = p.enumerator_params + (crate::records::EnumeratorParams::SIZE * i) as u64;
            worklist.enqueue(Discovery::Struct { ptr, kind: RecordType::Enumerator })?;
        }
    }
    let _ = image;
    Ok(())
}

fn explore_function(image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Function(p) = subject else { return Ok(()) };

    worklist.enqueue(tolerant(p.outer_func, None))?;
    worklist.enqueue(tolerant(p.super_func, None))?;
    worklist.enqueue(Discovery::string_utf8(p.name_utf8))?;
    worklist.enqueue(Discovery::string_utf8(p.owning_class_name))?;
    worklist.enqueue(Discovery::string_utf8(p.delegate_name))?;

    if p.property_array != 0 {
        let count = non_negative("Function.NumProperties", p.property_array, p.num_properties);
        for ptr in read_ptr_array(image, p.property_array, count)? {
            worklist.enqueue(Discovery::Struct { ptr, kind: RecordType::Property })?;
        }
    }
    Ok(())
}

fn explore_enumerator(_image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Enumerator(p) = subject else { return Ok(()) };
    worklist.enqueue(Discovery::string_utf8(p.name_utf8))?;
    Ok(())
}

fn explore_implemented_interface(_image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::ImplementedInterface(p) = subject else { return Ok(()) };
    worklist.enqueue(tolerant(p.class_func, None))?;
    Ok(())
}

fn explore_class_function_link_info(_image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::ClassFunctionLinkInfo(p) = subject else { return Ok(()) };
    worklist.enqueue(tolerant(p.create_func_ptr, Some(RecordType::Function)))?;
    worklist.enqueue(Discovery::string_utf8(p.func_name_utf8))?;
    Ok(())
}

/// Property-kind-specific follow-up, per the tail table: object-family
/// kinds follow their class pointer untagged; enum/class/struct/delegate
/// carrying kinds tag the hint toward the matching record type; `Array`,
/// `Map`, and `Bool` carry no further function pointer worth following —
/// `SetBitFunc_ptr` in particular is deliberately not followed, since it
/// never resolves to a Z-construct/StaticClass stub.
fn explore_property(_image: &Image, subject: &StructRecord, worklist: &mut Worklist) -> AnalysisResult<()> {
    let StructRecord::Property(p) = subject else { return Ok(()) };

    worklist.enqueue(Discovery::string_utf8(p.name_utf8_ptr))?;
    if p.rep_notify_func_utf8_ptr != 0 {
        worklist.enqueue(Discovery::string_utf8(p.rep_notify_func_utf8_ptr))?;
    }

    match &p.tail {
        PropertyTail::Array { .. } | PropertyTail::Map { .. } | PropertyTail::None => {}
        PropertyTail::Bool { .. } => {
            // SetBitFunc_ptr is a real code pointer, but not a stylised stub
            // this engine can make sense of; it is intentionally skipped.
        }
        PropertyTail::ByteOrEnum { enum_func_ptr } => {
            worklist.enqueue(tolerant(*enum_func_ptr, Some(RecordType::Enum)))?;
        }
        PropertyTail::Class { meta_class_func_ptr, class_func_ptr } => {
            worklist.enqueue(tolerant(*meta_class_func_ptr, Some(RecordType::Class)))?;
            worklist.enqueue(tolerant(*class_func_ptr, Some(RecordType::Class)))?;
        }
        PropertyTail::Delegate { signature_function_func_ptr } => {
            worklist.enqueue(tolerant(*signature_function_func_ptr, Some(RecordType::Function)))?;
        }
        PropertyTail::FieldPath { property_class_func_ptr } => {
            worklist.enqueue(tolerant(*property_class_func_ptr, Some(RecordType::Class)))?;
        }
        PropertyTail::Interface { interface_class_func_ptr } => {
            worklist.enqueue(tolerant(*interface_class_func_ptr, Some(RecordType::Class)))?;
        }
        PropertyTail::ObjectFamily { class_func_ptr } => {
            worklist.enqueue(tolerant(*class_func_ptr, None))?;
        }
        PropertyTail::SoftClass { meta_class_func_ptr } => {
            worklist.enqueue(tolerant(*meta_class_func_ptr, Some(RecordType::Class)))?;
        }
        PropertyTail::Struct { script_struct_func_ptr } => {
            worklist.enqueue(tolerant(*script_struct_func_ptr, Some(RecordType::Struct)))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_keeps_first_registration_on_conflict() {
        fn a(_: &Image, _: &StructRecord, _: &mut Worklist) -> AnalysisResult<()> {
            Ok(())
        }
        fn b(_: &Image, _: &StructRecord, _: &mut Worklist) -> AnalysisResult<()> {
            Err(crate::error::AnalysisError::WrongConstructorCount(1))
        }
        let mut reg = ExplorerRegistry::new();
        reg.register(RecordType::Package, a);
        reg.register(RecordType::Package, b);
        let explorer = reg.get(RecordType::Package).unwrap();
        let bytes = crate::image::test_support::build_minimal_pe(&[0xC3], &[0u8; 32]);
        let image = Image::from_bytes(&bytes).unwrap();
        let record = StructRecord::Enumerator(crate::records::EnumeratorParams { name_utf8: 0, value: 0 });
        let mut worklist = Worklist::new();
        assert!(explorer(&image, &record, &mut worklist).is_ok());
    }

    #[test]
    fn byte_property_enum_tail_reconciles_with_earlier_hintless_discovery() {
        let enum_fn_rva = 0x1400_1234u64;

        let mut worklist = Worklist::new();
        // A caller elsewhere in the sweep already queued this RVA as "one of
        // the two shapes", not yet knowing it is specifically an enum
        // Z-construct stub.
        worklist
            .enqueue(Discovery::function(enum_fn_rva, FunctionParserKind::ZConstructOrStaticClass, None))
            .unwrap();

        let property = crate::records::PropertyParams {
            name_utf8_ptr: 0,
            rep_notify_func_utf8_ptr: 0,
            property_flags: crate::native_enums::PropertyFlags::empty(),
            kind: crate::native_enums::PropertyKind::Byte,
            type_flags: 0,
            object_flags: crate::native_enums::ObjectFlags::empty(),
            setter_func_ptr: None,
            getter_func_ptr: None,
            array_dim: 1,
            offset: Some(0),
            tail: PropertyTail::ByteOrEnum { enum_func_ptr: enum_fn_rva },
        };
        let record = StructRecord::Property(property);
        let bytes = crate::image::test_support::build_minimal_pe(&[0xC3], &[0u8; 16]);
        let image = Image::from_bytes(&bytes).unwrap();

        explore_property(&image, &record, &mut worklist).unwrap();

        assert!(worklist.has_pending());
        let discovery = worklist.take_one().unwrap();
        match discovery {
            Discovery::Function { ptr, hint, .. } => {
                assert_eq!(ptr, enum_fn_rva);
                assert_eq!(hint, Some(RecordType::Enum));
            }
            other => panic!("expected a function discovery, got {other:?}"),
        }
        assert!(!worklist.has_pending());
    }

    #[test]
    fn with_defaults_registers_every_record_type() {
        let reg = ExplorerRegistry::with_defaults();
        for rt in [
            RecordType::Package,
            RecordType::Class,
            RecordType::Struct,
            RecordType::Enum,
            RecordType::Function,
            RecordType::Enumerator,
            RecordType::ImplementedInterface,
            RecordType::ClassFunctionLinkInfo,
            RecordType::Property,
        ] {
            assert!(reg.get(rt).is_some(), "missing explorer for {rt:?}");
        }
    }
}
