//! Reflection descriptor record layouts: the eight fixed-size `*Params`
//! structs and the version-sensitive `PropertyParams`.

use crate::error::ImageResult;
use crate::native_enums::{
    ArrayPropertyFlags, ClassFlags, EnumFlags, FunctionFlags, MapPropertyFlags, ObjectFlags,
    PackageFlags, PropertyFlags, PropertyKind, StructFlags,
};
use crate::stream::Stream;

/// Which fixed record type a struct artefact was parsed as. Used as the
/// stable key for the explorer registry and the seed-classification
/// lookup tables — never language runtime type identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    Package,
    Class,
    Struct,
    Enum,
    Function,
    Enumerator,
    ImplementedInterface,
    ClassFunctionLinkInfo,
    Property,
}

/// The engine version a binary was built against, threaded explicitly
/// through every call that needs it. Never read from ambient/global state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ParsingContext {
    pub version: (u16, u16, u16),
}

impl ParsingContext {
    pub fn new(version: (u16, u16, u16)) -> Self {
        ParsingContext { version }
    }

    fn at_least(&self, major: u16, minor: u16) -> bool {
        (self.version.0, self.version.1) >= (major, minor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackageParams {
    pub name_utf8: u64,
    pub singleton_func_array_fn: u64,
    pub num_singletons: i32,
    pub package_flags: PackageFlags,
    pub body_crc: u32,
    pub declarations_crc: u32,
}

impl PackageParams {
    pub const SIZE: usize = 32;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(PackageParams {
            name_utf8: stream.u64()?,
            singleton_func_array_fn: stream.u64()?,
            num_singletons: stream.s32()?,
            package_flags: PackageFlags::from_bits_truncate(stream.u32()?),
            body_crc: stream.u32()?,
            declarations_crc: stream.u32()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassParams {
    pub class_no_register_func: u64,
    pub class_config_name_utf8: u64,
    pub cpp_class_info: u64,
    pub dependency_singleton_func_array: u64,
    pub function_link_array: u64,
    pub property_array: u64,
    pub implemented_interface_array: u64,
    pub num_dependency_singletons: i32,
    pub num_functions: i32,
    pub num_properties: i32,
    pub num_implemented_interfaces: i32,
    pub class_flags: ClassFlags,
}

impl ClassParams {
    pub const SIZE: usize = 80;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(ClassParams {
            class_no_register_func: stream.u64()?,
            class_config_name_utf8: stream.u64()?,
            cpp_class_info: stream.u64()?,
            dependency_singleton_func_array: stream.u64()?,
            function_link_array: stream.u64()?,
            property_array: stream.u64()?,
            implemented_interface_array: stream.u64()?,
            num_dependency_singletons: stream.s32()?,
            num_functions: stream.s32()?,
            num_properties: stream.s32()?,
            num_implemented_interfaces: stream.s32()?,
            class_flags: ClassFlags::from_bits_truncate(stream.u32()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StructParams {
    pub outer_func: u64,
    pub super_func: u64,
    pub struct_ops_func: u64,
    pub name_utf8: u64,
    pub size_of: u64,
    pub align_of: u64,
    pub property_array: u64,
    pub num_properties: i32,
    pub object_flags: ObjectFlags,
    pub struct_flags: StructFlags,
}

impl StructParams {
    pub const SIZE: usize = 64;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(StructParams {
            outer_func: stream.u64()?,
            super_func: stream.u64()?,
            struct_ops_func: stream.u64()?,
            name_utf8: stream.u64()?,
            size_of: stream.u64()?,
            align_of: stream.u64()?,
            property_array: stream.u64()?,
            num_properties: stream.s32()?,
            object_flags: ObjectFlags::from_bits_truncate(stream.u32()?),
            struct_flags: StructFlags::from_bits_truncate(stream.u32()?),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumParams {
    pub outer_func: u64,
    pub display_name_fn: u64,
    pub name_utf8: u64,
    pub cpp_type_utf8: u64,
    pub enumerator_params: u64,
    pub num_enumerators: i32,
    pub object_flags: ObjectFlags,
    pub enum_flags: EnumFlags,
    pub cpp_form: u8,
}

impl EnumParams {
    pub const SIZE: usize = 56;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(EnumParams {
            outer_func: stream.u64()?,
            display_name_fn: stream.u64()?,
            name_utf8: stream.u64()?,
            cpp_type_utf8: stream.u64()?,
            enumerator_params: stream.u64()?,
            num_enumerators: stream.s32()?,
            object_flags: ObjectFlags::from_bits_truncate(stream.u32()?),
            enum_flags: EnumFlags::from_bits_truncate(stream.u32()?),
            cpp_form: stream.u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FunctionParams {
    pub outer_func: u64,
    pub super_func: u64,
    pub name_utf8: u64,
    pub owning_class_name: u64,
    pub delegate_name: u64,
    pub structure_size: u64,
    pub property_array: u64,
    pub num_properties: i32,
    pub object_flags: ObjectFlags,
    pub function_flags: FunctionFlags,
    pub rpc_id: u16,
    pub rpc_response_id: u16,
}

impl FunctionParams {
    pub const SIZE: usize = 64;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(FunctionParams {
            outer_func: stream.u64()?,
            super_func: stream.u64()?,
            name_utf8: stream.u64()?,
            owning_class_name: stream.u64()?,
            delegate_name: stream.u64()?,
            structure_size: stream.u64()?,
            property_array: stream.u64()?,
            num_properties: stream.s32()?,
            object_flags: ObjectFlags::from_bits_truncate(stream.u32()?),
            function_flags: FunctionFlags::from_bits_truncate(stream.u32()?),
            rpc_id: stream.u16()?,
            rpc_response_id: stream.u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnumeratorParams {
    pub name_utf8: u64,
    pub value: i64,
}

impl EnumeratorParams {
    pub const SIZE: usize = 16;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(EnumeratorParams {
            name_utf8: stream.u64()?,
            value: stream.s64()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImplementedInterfaceParams {
    pub class_func: u64,
    pub offset: i32,
    pub implemented_by_k2: bool,
}

impl ImplementedInterfaceParams {
    pub const SIZE: usize = 16;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        let class_func = stream.u64()?;
        let offset = stream.s32()?;
        let implemented_by_k2 = stream.u8()? != 0;
        Ok(ImplementedInterfaceParams {
            class_func,
            offset,
            implemented_by_k2,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassFunctionLinkInfo {
    pub create_func_ptr: u64,
    pub func_name_utf8: u64,
}

impl ClassFunctionLinkInfo {
    pub const SIZE: usize = 16;

    pub fn parse(stream: &mut Stream<'_>) -> ImageResult<Self> {
        Ok(ClassFunctionLinkInfo {
            create_func_ptr: stream.u64()?,
            func_name_utf8: stream.u64()?,
        })
    }
}

/// Kind-specific tail of a property record. Only the pointer/flag fields
/// an explorer needs to follow are kept typed; everything else lives in
/// the shared prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyTail {
    Array { array_flags: u32 },
    Bool { element_size: u32, size_of_outer: u64, set_bit_func_ptr: u64 },
    ByteOrEnum { enum_func_ptr: u64 },
    Class { meta_class_func_ptr: u64, class_func_ptr: u64 },
    Delegate { signature_function_func_ptr: u64 },
    FieldPath { property_class_func_ptr: u64 },
    Interface { interface_class_func_ptr: u64 },
    Map { map_flags: MapPropertyFlags },
    ObjectFamily { class_func_ptr: u64 },
    SoftClass { meta_class_func_ptr: u64 },
    Struct { script_struct_func_ptr: u64 },
    None,
}

/// The dynamic, version-sensitive property record. Parsed with an
/// auto-aligning stream; every width decision is driven by the explicit
/// [`ParsingContext`] passed in, never by ambient state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyParams {
    pub name_utf8_ptr: u64,
    pub rep_notify_func_utf8_ptr: u64,
    pub property_flags: PropertyFlags,
    pub kind: PropertyKind,
    pub type_flags: u8,
    pub object_flags: ObjectFlags,
    pub setter_func_ptr: Option<u64>,
    pub getter_func_ptr: Option<u64>,
    pub array_dim: i32,
    pub offset: Option<u32>,
    pub tail: PropertyTail,
}

impl PropertyParams {
    pub fn parse(stream: &mut Stream<'_>, ctx: &ParsingContext) -> ImageResult<Self> {
        let mut stream = stream.into_auto_align();

        let name_utf8_ptr = stream.u64()?;
        let rep_notify_func_utf8_ptr = stream.u64()?;
        let property_flags = PropertyFlags::from_bits_truncate(stream.u64()?);
        let flags_and_type = stream.u32()?;
        let object_flags = ObjectFlags::from_bits_truncate(stream.u32()?);

        let (kind, type_flags) = PropertyKind::from_raw((flags_and_type & 0xff) as u8)
            .ok_or(crate::error::ImageError::MalformedResources("unrecognised property kind"))?;

        let is_bool = matches!(kind, PropertyKind::Bool);

        let array_dim_pre_53 = if !ctx.at_least(5, 3) {
            Some(stream.s32()?)
        } else {
            None
        };

        let (setter_func_ptr, getter_func_ptr) = if ctx.at_least(5, 1) {
            (Some(stream.u64()?), Some(stream.u64()?))
        } else {
            (None, None)
        };

        let array_dim = if ctx.at_least(5, 3) {
            stream.u16()? as i32
        } else {
            array_dim_pre_53.expect("array_dim read pre-5.3")
        };

        let offset = if is_bool {
            None
        } else if ctx.at_least(5, 3) {
            Some(stream.u16()? as u32)
        } else {
            Some(stream.u32()?)
        };

        let tail = match kind {
            PropertyKind::Array => PropertyTail::Array { array_flags: read_flags_width(&mut stream, ctx)? },
            PropertyKind::Bool => {
                let (element_size, size_of_outer) = if ctx.at_least(5, 3) {
                    (stream.u16()? as u32, stream.u16()? as u64)
                } else {
                    (stream.u32()?, stream.u64()?)
                };
                PropertyTail::Bool {
                    element_size,
                    size_of_outer,
                    set_bit_func_ptr: stream.u64()?,
                }
            }
            PropertyKind::Byte | PropertyKind::Enum => PropertyTail::ByteOrEnum { enum_func_ptr: stream.u64()? },
            PropertyKind::Class => {
                if ctx.at_least(5, 1) {
                    let class_func_ptr = stream.u64()?;
                    let meta_class_func_ptr = stream.u64()?;
                    PropertyTail::Class { meta_class_func_ptr, class_func_ptr }
                } else {
                    let meta_class_func_ptr = stream.u64()?;
                    let class_func_ptr = stream.u64()?;
                    PropertyTail::Class { meta_class_func_ptr, class_func_ptr }
                }
            }
            PropertyKind::Delegate
            | PropertyKind::InlineMulticastDelegate
            | PropertyKind::SparseMulticastDelegate => {
                PropertyTail::Delegate { signature_function_func_ptr: stream.u64()? }
            }
            PropertyKind::FieldPath => PropertyTail::FieldPath { property_class_func_ptr: stream.u64()? },
            PropertyKind::Interface => PropertyTail::Interface { interface_class_func_ptr: stream.u64()? },
            PropertyKind::Map => PropertyTail::Map {
                map_flags: MapPropertyFlags::from_bits_truncate(read_flags_width(&mut stream, ctx)?),
            },
            PropertyKind::Object | PropertyKind::WeakObject | PropertyKind::LazyObject | PropertyKind::SoftObject => {
                PropertyTail::ObjectFamily { class_func_ptr: stream.u64()? }
            }
            PropertyKind::SoftClass => PropertyTail::SoftClass { meta_class_func_ptr: stream.u64()? },
            PropertyKind::Struct => PropertyTail::Struct { script_struct_func_ptr: stream.u64()? },
            _ => PropertyTail::None,
        };

        Ok(PropertyParams {
            name_utf8_ptr,
            rep_notify_func_utf8_ptr,
            property_flags,
            kind,
            type_flags,
            object_flags,
            setter_func_ptr,
            getter_func_ptr,
            array_dim,
            offset,
            tail,
        })
    }
}

/// `Array`/`Map` tail flags are u32 pre-5.3 and u8 from 5.3.
fn read_flags_width(stream: &mut Stream<'_>, ctx: &ParsingContext) -> ImageResult<u32> {
    if ctx.at_least(5, 3) {
        Ok(stream.u8()? as u32)
    } else {
        stream.u32()
    }
}
