//! Native UE5 flag and kind enumerations used by [`crate::records`].
//!
//! Values are transcribed from the engine's own `Class.h`/`ObjectMacros.h`
//! definitions; every bit here is load-bearing for decoding `*Params`
//! records, so keep it in sync with whatever engine version `records.rs`
//! targets.

use bitflags::bitflags;

/// `EPropertyGenFlags`: the low 6 bits of a property's type-info word,
/// selecting which `F*PropertyParams` tail follows the common prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyKind {
    Byte = 0x00,
    Int8 = 0x01,
    Int16 = 0x02,
    Int = 0x03,
    Int64 = 0x04,
    UInt16 = 0x05,
    UInt32 = 0x06,
    UInt64 = 0x07,
    UnsizedInt = 0x08,
    UnsizedUInt = 0x09,
    Float = 0x0a,
    Double = 0x0b,
    Bool = 0x0c,
    SoftClass = 0x0d,
    WeakObject = 0x0e,
    LazyObject = 0x0f,
    SoftObject = 0x10,
    Class = 0x11,
    Object = 0x12,
    Interface = 0x13,
    Name = 0x14,
    Str = 0x15,
    Array = 0x16,
    Map = 0x17,
    Set = 0x18,
    Struct = 0x19,
    Delegate = 0x1a,
    InlineMulticastDelegate = 0x1b,
    SparseMulticastDelegate = 0x1c,
    Text = 0x1d,
    Enum = 0x1e,
    FieldPath = 0x1f,
    LargeWorldCoordinatesReal = 0x20,
}

impl PropertyKind {
    /// Splits a raw `EPropertyClass` byte into its kind and the
    /// `EPropertyTypeFlags` bits layered on top (bit 0x40: `ObjectPtr` /
    /// `NativeBool`, duplicated in the engine's own symbols).
    pub fn from_raw(value: u8) -> Option<(Self, u8)> {
        let kind_bits = value & 0x3f;
        let flag_bits = value & !0x3f;
        let kind = match kind_bits {
            0x00 => Self::Byte,
            0x01 => Self::Int8,
            0x02 => Self::Int16,
            0x03 => Self::Int,
            0x04 => Self::Int64,
            0x05 => Self::UInt16,
            0x06 => Self::UInt32,
            0x07 => Self::UInt64,
            0x08 => Self::UnsizedInt,
            0x09 => Self::UnsizedUInt,
            0x0a => Self::Float,
            0x0b => Self::Double,
            0x0c => Self::Bool,
            0x0d => Self::SoftClass,
            0x0e => Self::WeakObject,
            0x0f => Self::LazyObject,
            0x10 => Self::SoftObject,
            0x11 => Self::Class,
            0x12 => Self::Object,
            0x13 => Self::Interface,
            0x14 => Self::Name,
            0x15 => Self::Str,
            0x16 => Self::Array,
            0x17 => Self::Map,
            0x18 => Self::Set,
            0x19 => Self::Struct,
            0x1a => Self::Delegate,
            0x1b => Self::InlineMulticastDelegate,
            0x1c => Self::SparseMulticastDelegate,
            0x1d => Self::Text,
            0x1e => Self::Enum,
            0x1f => Self::FieldPath,
            0x20 => Self::LargeWorldCoordinatesReal,
            _ => return None,
        };
        Some((kind, flag_bits))
    }
}

bitflags! {
    /// `EPropertyFlags`, a 64-bit flag set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u64 {
        const EDIT = 1 << 0;
        const CONST_PARM = 1 << 1;
        const BLUEPRINT_VISIBLE = 1 << 2;
        const EXPORT_OBJECT = 1 << 3;
        const BLUEPRINT_READ_ONLY = 1 << 4;
        const NET = 1 << 5;
        const EDIT_FIXED_SIZE = 1 << 6;
        const PARM = 1 << 7;
        const OUT_PARM = 1 << 8;
        const ZERO_CONSTRUCTOR = 1 << 9;
        const RETURN_PARM = 1 << 10;
        const DISABLE_EDIT_ON_TEMPLATE = 1 << 11;
        const TRANSIENT = 1 << 13;
        const CONFIG = 1 << 14;
        const DISABLE_EDIT_ON_INSTANCE = 1 << 16;
        const EDIT_CONST = 1 << 17;
        const GLOBAL_CONFIG = 1 << 18;
        const INSTANCED_REFERENCE = 1 << 19;
        const DUPLICATE_TRANSIENT = 1 << 21;
        const SAVE_GAME = 1 << 24;
        const NO_CLEAR = 1 << 25;
        const REFERENCE_PARM = 1 << 27;
        const BLUEPRINT_ASSIGNABLE = 1 << 28;
        const DEPRECATED = 1 << 29;
        const IS_PLAIN_OLD_DATA = 1 << 30;
        const REP_SKIP = 1 << 31;
        const REP_NOTIFY = 1 << 32;
        const INTERP = 1 << 33;
        const NON_TRANSACTIONAL = 1 << 34;
        const EDITOR_ONLY = 1 << 35;
        const NO_DESTRUCTOR = 1 << 36;
        const AUTO_WEAK = 1 << 38;
        const CONTAINS_INSTANCED_REFERENCE = 1 << 39;
        const ASSET_REGISTRY_SEARCHABLE = 1 << 40;
        const SIMPLE_DISPLAY = 1 << 41;
        const ADVANCED_DISPLAY = 1 << 42;
        const PROTECTED = 1 << 43;
        const BLUEPRINT_CALLABLE = 1 << 44;
        const BLUEPRINT_AUTHORITY_ONLY = 1 << 45;
        const TEXT_EXPORT_TRANSIENT = 1 << 46;
        const NON_PIE_DUPLICATE_TRANSIENT = 1 << 47;
        const EXPOSE_ON_SPAWN = 1 << 48;
        const PERSISTENT_INSTANCE = 1 << 49;
        const UOBJECT_WRAPPER = 1 << 50;
        const HAS_GET_VALUE_TYPE_HASH = 1 << 51;
        const NATIVE_ACCESS_SPECIFIER_PUBLIC = 1 << 52;
        const NATIVE_ACCESS_SPECIFIER_PROTECTED = 1 << 53;
        const NATIVE_ACCESS_SPECIFIER_PRIVATE = 1 << 54;
        const SKIP_SERIALIZATION = 1 << 55;
    }
}

bitflags! {
    /// `EObjectFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectFlags: u32 {
        const PUBLIC = 1 << 0;
        const STANDALONE = 1 << 1;
        const MARK_AS_NATIVE = 1 << 2;
        const TRANSACTIONAL = 1 << 3;
        const CLASS_DEFAULT_OBJECT = 1 << 4;
        const ARCHETYPE_OBJECT = 1 << 5;
        const TRANSIENT = 1 << 6;
        const MARK_AS_ROOT_SET = 1 << 7;
        const TAG_GARBAGE_TEMP = 1 << 8;
        const NEED_INITIALIZATION = 1 << 9;
        const NEED_LOAD = 1 << 10;
        const KEEP_FOR_COOKER = 1 << 11;
        const NEED_POST_LOAD = 1 << 12;
        const NEED_POST_LOAD_SUBOBJECTS = 1 << 13;
        const NEWER_VERSION_EXISTS = 1 << 14;
        const BEGIN_DESTROYED = 1 << 15;
        const FINISH_DESTROYED = 1 << 16;
        const BEING_REGENERATED = 1 << 17;
        const DEFAULT_SUB_OBJECT = 1 << 18;
        const WAS_LOADED = 1 << 19;
        const TEXT_EXPORT_TRANSIENT = 1 << 20;
        const LOAD_COMPLETED = 1 << 21;
        const INHERITABLE_COMPONENT_TEMPLATE = 1 << 22;
        const DUPLICATE_TRANSIENT = 1 << 23;
        const STRONG_REF_ON_FRAME = 1 << 24;
        const NON_PIE_DUPLICATE_TRANSIENT = 1 << 25;
        const DYNAMIC = 1 << 26;
        const WILL_BE_LOADED = 1 << 27;
        const HAS_EXTERNAL_PACKAGE = 1 << 28;
        const PENDING_KILL = 1 << 29;
        const GARBAGE = 1 << 30;
        const ALLOCATED_IN_SHARED_PAGE = 1 << 31;
    }
}

bitflags! {
    /// `EPackageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PackageFlags: u32 {
        const NEWLY_CREATED = 0x0000_0001;
        const CLIENT_OPTIONAL = 0x0000_0002;
        const SERVER_SIDE_ONLY = 0x0000_0004;
        const COMPILED_IN = 0x0000_0010;
        const FOR_DIFFING = 0x0000_0020;
        const EDITOR_ONLY = 0x0000_0040;
        const DEVELOPER = 0x0000_0080;
        const UNCOOKED_ONLY = 0x0000_0100;
        const COOKED = 0x0000_0200;
        const CONTAINS_NO_ASSET = 0x0000_0400;
        const NOT_EXTERNALLY_REFERENCEABLE = 0x0000_0800;
        const UNVERSIONED_PROPERTIES = 0x0000_2000;
        const CONTAINS_MAP_DATA = 0x0000_4000;
        const IS_SAVING = 0x0000_8000;
        const COMPILING = 0x0001_0000;
        const CONTAINS_MAP = 0x0002_0000;
        const REQUIRES_LOCALIZATION_GATHER = 0x0004_0000;
        const PLAY_IN_EDITOR = 0x0010_0000;
        const CONTAINS_SCRIPT = 0x0020_0000;
        const DISALLOW_EXPORT = 0x0040_0000;
        const COOK_GENERATED = 0x0800_0000;
        const DYNAMIC_IMPORTS = 0x1000_0000;
        const RUNTIME_GENERATED = 0x2000_0000;
        const RELOADING_FOR_COOKER = 0x4000_0000;
        const FILTER_EDITOR_ONLY = 0x8000_0000;
    }
}

bitflags! {
    /// `EClassFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassFlags: u32 {
        const ABSTRACT = 1 << 0;
        const DEFAULT_CONFIG = 1 << 1;
        const CONFIG = 1 << 2;
        const TRANSIENT = 1 << 3;
        const OPTIONAL = 1 << 4;
        const MATCHED_SERIALIZERS = 1 << 5;
        const PROJECT_USER_CONFIG = 1 << 6;
        const NATIVE = 1 << 7;
        const NO_EXPORT = 1 << 8;
        const NOT_PLACEABLE = 1 << 9;
        const PER_OBJECT_CONFIG = 1 << 10;
        const REPLICATION_DATA_IS_SET_UP = 1 << 11;
        const EDIT_INLINE_NEW = 1 << 12;
        const COLLAPSE_CATEGORIES = 1 << 13;
        const INTERFACE = 1 << 14;
        const CUSTOM_CONSTRUCTOR = 1 << 15;
        const CONST = 1 << 16;
        const NEEDS_DEFERRED_DEPENDENCY_LOADING = 1 << 17;
        const COMPILED_FROM_BLUEPRINT = 1 << 18;
        const MINIMAL_API = 1 << 19;
        const REQUIRED_API = 1 << 20;
        const DEFAULT_TO_INSTANCED = 1 << 21;
        const TOKEN_STREAM_ASSEMBLED = 1 << 22;
        const HAS_INSTANCED_REFERENCE = 1 << 23;
        const HIDDEN = 1 << 24;
        const DEPRECATED = 1 << 25;
        const HIDE_DROP_DOWN = 1 << 26;
        const GLOBAL_USER_CONFIG = 1 << 27;
        const INTRINSIC = 1 << 28;
        const CONSTRUCTED = 1 << 29;
        const CONFIG_DO_NOT_CHECK_DEFAULTS = 1 << 30;
        const NEWER_VERSION_EXISTS = 1 << 31;
    }
}

bitflags! {
    /// `EClassCastFlags`, one bit per native `UField`/`FProperty` subclass.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ClassCastFlags: u64 {
        const UFIELD = 0x1;
        const FINT8_PROPERTY = 0x2;
        const UENUM = 0x4;
        const USTRUCT = 0x8;
        const USCRIPT_STRUCT = 0x10;
        const UCLASS = 0x20;
        const FBYTE_PROPERTY = 0x40;
        const FINT_PROPERTY = 0x80;
        const FFLOAT_PROPERTY = 0x100;
        const FUINT64_PROPERTY = 0x200;
        const FCLASS_PROPERTY = 0x400;
        const FUINT32_PROPERTY = 0x800;
        const FINTERFACE_PROPERTY = 0x1000;
        const FNAME_PROPERTY = 0x2000;
        const FSTR_PROPERTY = 0x4000;
        const FPROPERTY = 0x8000;
        const FOBJECT_PROPERTY = 0x1_0000;
        const FBOOL_PROPERTY = 0x2_0000;
        const FUINT16_PROPERTY = 0x4_0000;
        const UFUNCTION = 0x8_0000;
        const FSTRUCT_PROPERTY = 0x10_0000;
        const FARRAY_PROPERTY = 0x20_0000;
        const FINT64_PROPERTY = 0x40_0000;
        const FDELEGATE_PROPERTY = 0x80_0000;
        const FNUMERIC_PROPERTY = 0x100_0000;
        const FMULTICAST_DELEGATE_PROPERTY = 0x200_0000;
        const FOBJECT_PROPERTY_BASE = 0x400_0000;
        const FWEAK_OBJECT_PROPERTY = 0x800_0000;
        const FLAZY_OBJECT_PROPERTY = 0x1000_0000;
        const FSOFT_OBJECT_PROPERTY = 0x2000_0000;
        const FTEXT_PROPERTY = 0x4000_0000;
        const FINT16_PROPERTY = 0x8000_0000;
        const FDOUBLE_PROPERTY = 0x1_0000_0000;
        const FSOFT_CLASS_PROPERTY = 0x2_0000_0000;
        const UPACKAGE = 0x4_0000_0000;
        const ULEVEL = 0x8_0000_0000;
        const AACTOR = 0x10_0000_0000;
        const APLAYER_CONTROLLER = 0x20_0000_0000;
        const APAWN = 0x40_0000_0000;
        const USCENE_COMPONENT = 0x80_0000_0000;
        const UPRIMITIVE_COMPONENT = 0x100_0000_0000;
        const USKINNED_MESH_COMPONENT = 0x200_0000_0000;
        const USKELETAL_MESH_COMPONENT = 0x400_0000_0000;
        const UBLUEPRINT = 0x800_0000_0000;
        const UDELEGATE_FUNCTION = 0x1000_0000_0000;
        const USTATIC_MESH_COMPONENT = 0x2000_0000_0000;
        const FMAP_PROPERTY = 0x4000_0000_0000;
        const FSET_PROPERTY = 0x8000_0000_0000;
        const FENUM_PROPERTY = 0x1_0000_0000_0000;
        const USPARSE_DELEGATE_FUNCTION = 0x2_0000_0000_0000;
        const FMULTICAST_INLINE_DELEGATE_PROPERTY = 0x4_0000_0000_0000;
        const FMULTICAST_SPARSE_DELEGATE_PROPERTY = 0x8_0000_0000_0000;
        const FFIELD_PATH_PROPERTY = 0x10_0000_0000_0000;
        const FOBJECT_PTR_PROPERTY = 0x20_0000_0000_0000;
        const FCLASS_PTR_PROPERTY = 0x40_0000_0000_0000;
        const FLARGE_WORLD_COORDINATES_REAL_PROPERTY = 0x80_0000_0000_0000;
    }
}

bitflags! {
    /// `EStructFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StructFlags: u32 {
        const NATIVE = 0x0000_0001;
        const IDENTICAL_NATIVE = 0x0000_0002;
        const HAS_INSTANCED_REFERENCE = 0x0000_0004;
        const NO_EXPORT = 0x0000_0008;
        const ATOMIC = 0x0000_0010;
        const IMMUTABLE = 0x0000_0020;
        const ADD_STRUCT_REFERENCED_OBJECTS = 0x0000_0040;
        const REQUIRED_API = 0x0000_0200;
        const NET_SERIALIZE_NATIVE = 0x0000_0400;
        const SERIALIZE_NATIVE = 0x0000_0800;
        const COPY_NATIVE = 0x0000_1000;
        const IS_PLAIN_OLD_DATA = 0x0000_2000;
        const NO_DESTRUCTOR = 0x0000_4000;
        const ZERO_CONSTRUCTOR = 0x0000_8000;
        const EXPORT_TEXT_ITEM_NATIVE = 0x0001_0000;
        const IMPORT_TEXT_ITEM_NATIVE = 0x0002_0000;
        const POST_SERIALIZE_NATIVE = 0x0004_0000;
        const SERIALIZE_FROM_MISMATCHED_TAG = 0x0008_0000;
        const NET_DELTA_SERIALIZE_NATIVE = 0x0010_0000;
        const POST_SCRIPT_CONSTRUCT = 0x0020_0000;
        const NET_SHARED_SERIALIZATION = 0x0040_0000;
        const TRASHED = 0x0080_0000;
        const NEWER_VERSION_EXISTS = 0x0100_0000;
        const CAN_EDIT_CHANGE = 0x0200_0000;
    }
}

bitflags! {
    /// `EFunctionFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctionFlags: u32 {
        const FINAL = 0x0000_0001;
        const REQUIRED_API = 0x0000_0002;
        const BLUEPRINT_AUTHORITY_ONLY = 0x0000_0004;
        const BLUEPRINT_COSMETIC = 0x0000_0008;
        const NET = 0x0000_0040;
        const NET_RELIABLE = 0x0000_0080;
        const NET_REQUEST = 0x0000_0100;
        const EXEC = 0x0000_0200;
        const NATIVE = 0x0000_0400;
        const EVENT = 0x0000_0800;
        const NET_RESPONSE = 0x0000_1000;
        const STATIC = 0x0000_2000;
        const NET_MULTICAST = 0x0000_4000;
        const UBERGRAPH_FUNCTION = 0x0000_8000;
        const MULTICAST_DELEGATE = 0x0001_0000;
        const PUBLIC = 0x0002_0000;
        const PRIVATE = 0x0004_0000;
        const PROTECTED = 0x0008_0000;
        const DELEGATE = 0x0010_0000;
        const NET_SERVER = 0x0020_0000;
        const HAS_OUT_PARMS = 0x0040_0000;
        const HAS_DEFAULTS = 0x0080_0000;
        const NET_CLIENT = 0x0100_0000;
        const DLL_IMPORT = 0x0200_0000;
        const BLUEPRINT_CALLABLE = 0x0400_0000;
        const BLUEPRINT_EVENT = 0x0800_0000;
        const BLUEPRINT_PURE = 0x1000_0000;
        const EDITOR_ONLY = 0x2000_0000;
        const CONST = 0x4000_0000;
        const NET_VALIDATE = 0x8000_0000;
    }
}

bitflags! {
    /// `EEnumFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EnumFlags: u32 {
        const FLAGS = 0x1;
        const NEWER_VERSION_EXISTS = 0x2;
    }
}

bitflags! {
    /// `EArrayPropertyFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ArrayPropertyFlags: u32 {
        const USES_MEMORY_IMAGE_ALLOCATOR = 0x1;
    }
}

bitflags! {
    /// `EMapPropertyFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MapPropertyFlags: u32 {
        const USES_MEMORY_IMAGE_ALLOCATOR = 0x1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_kind_splits_type_flags() {
        let (kind, flags) = PropertyKind::from_raw(0x12 | 0x40).unwrap();
        assert_eq!(kind, PropertyKind::Object);
        assert_eq!(flags, 0x40);
    }

    #[test]
    fn property_kind_rejects_out_of_range() {
        assert!(PropertyKind::from_raw(0x3f).is_none());
    }

    #[test]
    fn class_cast_flags_roundtrip_bits() {
        let flags = ClassCastFlags::UCLASS | ClassCastFlags::USTRUCT;
        assert!(flags.contains(ClassCastFlags::UCLASS));
        assert_eq!(flags.bits(), 0x28);
    }
}
