//! The Ent image format: record layouts, the `Spec` tagged value, the
//! primitive index table, and the little-endian buffer the emitter builds
//! records into.
//!
//! Every cross-reference in the image is a 32-bit offset from the start of
//! the file; 0 means "absent" (the header occupies that region). All
//! records start 4-byte aligned.

pub mod view;

use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Header magic/version tag.
pub const MAGIC: [u8; 4] = *b"ENT1";

/// High bit of a `Spec`: set for primitive indices, clear for offsets.
pub const SPEC_PRIMITIVE: u32 = 0x8000_0000;

/// Primitive index table. Slot 0 is the reserved `S8` slot; the canonical
/// names occupy slots 1..=21.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    IntoPrimitive,
    TryFromPrimitive,
)]
#[repr(u32)]
pub enum Primitive {
    S8 = 0,
    Void,
    S16,
    S32,
    S64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    F128,
    Bool,
    Char,
    WChar,
    Uuid,
    String,
    WString,
    Any,
    Object,
    Fixed,
    ValueBase,
}

impl Primitive {
    pub const COUNT: u32 = 22;

    pub fn from_canonical_name(name: &str) -> Option<Self> {
        Some(match name {
            "void" => Primitive::Void,
            "short" => Primitive::S16,
            "long" => Primitive::S32,
            "long long" => Primitive::S64,
            "octet" => Primitive::U8,
            "unsigned short" => Primitive::U16,
            "unsigned long" => Primitive::U32,
            "unsigned long long" => Primitive::U64,
            "float" => Primitive::F32,
            "double" => Primitive::F64,
            "long double" => Primitive::F128,
            "boolean" => Primitive::Bool,
            "char" => Primitive::Char,
            "wchar" => Primitive::WChar,
            "uuid" => Primitive::Uuid,
            "string" => Primitive::String,
            "wstring" => Primitive::WString,
            "any" => Primitive::Any,
            "Object" => Primitive::Object,
            "fixed" => Primitive::Fixed,
            "ValueBase" => Primitive::ValueBase,
            _ => return None,
        })
    }

    pub fn canonical_name(self) -> &'static str {
        match self {
            Primitive::S8 => "",
            Primitive::Void => "void",
            Primitive::S16 => "short",
            Primitive::S32 => "long",
            Primitive::S64 => "long long",
            Primitive::U8 => "octet",
            Primitive::U16 => "unsigned short",
            Primitive::U32 => "unsigned long",
            Primitive::U64 => "unsigned long long",
            Primitive::F32 => "float",
            Primitive::F64 => "double",
            Primitive::F128 => "long double",
            Primitive::Bool => "boolean",
            Primitive::Char => "char",
            Primitive::WChar => "wchar",
            Primitive::Uuid => "uuid",
            Primitive::String => "string",
            Primitive::WString => "wstring",
            Primitive::Any => "any",
            Primitive::Object => "Object",
            Primitive::Fixed => "fixed",
            Primitive::ValueBase => "ValueBase",
        }
    }

    /// The raw `Spec` value for this primitive.
    pub fn spec(self) -> u32 {
        SPEC_PRIMITIVE | u32::from(self)
    }
}

/// A decoded type specifier: primitive index or descriptor offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Spec {
    Primitive(Primitive),
    Offset(u32),
}

impl Spec {
    pub fn from_raw(raw: u32) -> Option<Self> {
        if raw & SPEC_PRIMITIVE != 0 {
            Primitive::try_from(raw & !SPEC_PRIMITIVE)
                .ok()
                .map(Spec::Primitive)
        } else if raw != 0 {
            Some(Spec::Offset(raw))
        } else {
            None
        }
    }

    pub fn into_raw(self) -> u32 {
        match self {
            Spec::Primitive(p) => p.spec(),
            Spec::Offset(offset) => offset,
        }
    }
}

/// Method attribute bits.
pub const ATTR_GETTER: u32 = 1;
pub const ATTR_SETTER: u32 = 2;

/// Parameter direction bits.
pub const ATTR_IN: u32 = 1;
pub const ATTR_OUT: u32 = 2;
pub const ATTR_IN_OUT: u32 = 3;

pub fn align4(offset: u32) -> u32 {
    (offset + 3) & !3
}

pub fn align8(offset: u32) -> u32 {
    (offset + 7) & !7
}

/// The preallocated image under construction. All stores are little-endian
/// at absolute file offsets; going out of range is a layout bug and panics.
#[derive(Debug, Clone)]
pub struct ImageBuf {
    bytes: Vec<u8>,
}

impl ImageBuf {
    pub fn new(size: u32) -> Self {
        ImageBuf { bytes: vec![0; size as usize] }
    }

    pub fn len(&self) -> u32 {
        u32::try_from(self.bytes.len()).unwrap()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn put_u32(&mut self, offset: u32, value: u32) {
        let at = offset as usize;
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_u64(&mut self, offset: u32, value: u64) {
        let at = offset as usize;
        self.bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
    }

    pub fn put_bytes(&mut self, offset: u32, bytes: &[u8]) {
        let at = offset as usize;
        self.bytes[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Write a zero-terminated string into its string-pool slot.
    pub fn put_cstr(&mut self, offset: u32, value: &str) {
        self.put_bytes(offset, value.as_bytes());
        let end = offset as usize + value.len();
        self.bytes[end] = 0;
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

/// File header: magic tag, total file size, 8 reserved bytes.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub file_size: u32,
}

impl Header {
    pub const SIZE: u32 = 16;

    pub fn write(&self, buf: &mut ImageBuf) {
        buf.put_bytes(0, &MAGIC);
        buf.put_u32(4, self.file_size);
    }
}

/// Module record, followed by submodule offsets, interface offsets, and
/// the trailing constant area.
#[derive(Debug, Clone, Copy)]
pub struct Module {
    pub name: u32,
    pub parent: u32,
    pub module_count: u32,
    pub interface_count: u32,
    pub const_count: u32,
}

impl Module {
    pub const FIXED: u32 = 20;

    pub fn size(modules: u32, interfaces: u32, consts: u32) -> u32 {
        Self::FIXED + 4 * (modules + interfaces) + consts * Constant::SIZE
    }

    pub fn module_slot(offset: u32, index: u32) -> u32 {
        offset + Self::FIXED + 4 * index
    }

    pub fn interface_slot(offset: u32, modules: u32, index: u32) -> u32 {
        offset + Self::FIXED + 4 * (modules + index)
    }

    pub fn const_slot(
        offset: u32,
        modules: u32,
        interfaces: u32,
        index: u32,
    ) -> u32 {
        offset + Self::FIXED + 4 * (modules + interfaces)
            + index * Constant::SIZE
    }

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.name);
        buf.put_u32(offset + 4, self.parent);
        buf.put_u32(offset + 8, self.module_count);
        buf.put_u32(offset + 12, self.interface_count);
        buf.put_u32(offset + 16, self.const_count);
    }
}

/// Interface record, followed by method offsets and the trailing constant
/// area. Imported interfaces appear as the bare 52-byte record.
#[derive(Debug, Clone, Copy)]
pub struct Interface {
    pub name: u32,
    pub iid: [u8; 16],
    pub parent_iid: [u8; 16],
    pub module: u32,
    pub method_count: u32,
    pub const_count: u32,
    pub inherited_method_count: u32,
}

impl Interface {
    pub const FIXED: u32 = 52;

    pub fn size(methods: u32, consts: u32) -> u32 {
        Self::FIXED + 4 * methods + consts * Constant::SIZE
    }

    pub fn method_slot(offset: u32, index: u32) -> u32 {
        offset + Self::FIXED + 4 * index
    }

    pub fn const_slot(offset: u32, methods: u32, index: u32) -> u32 {
        offset + Self::FIXED + 4 * methods + index * Constant::SIZE
    }

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.name);
        buf.put_bytes(offset + 4, &self.iid);
        buf.put_bytes(offset + 20, &self.parent_iid);
        buf.put_u32(offset + 36, self.module);
        buf.put_u32(offset + 40, self.method_count);
        buf.put_u32(offset + 44, self.const_count);
        buf.put_u32(offset + 48, self.inherited_method_count);
    }
}

/// Method record shared by operations and synthesized attribute accessors;
/// followed by inline param slots and raise slots.
#[derive(Debug, Clone, Copy)]
pub struct Method {
    pub ret: u32,
    pub name: u32,
    pub attr: u32,
    pub param_count: u32,
    pub raise_count: u32,
}

impl Method {
    pub const FIXED: u32 = 20;
    pub const PARAM_SIZE: u32 = 12;

    pub fn size(params: u32, raises: u32) -> u32 {
        Self::FIXED + params * Self::PARAM_SIZE + 4 * raises
    }

    pub fn param_slot(offset: u32, index: u32) -> u32 {
        offset + Self::FIXED + index * Self::PARAM_SIZE
    }

    pub fn raise_slot(offset: u32, params: u32, index: u32) -> u32 {
        offset + Self::FIXED + params * Self::PARAM_SIZE + 4 * index
    }

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.ret);
        buf.put_u32(offset + 4, self.name);
        buf.put_u32(offset + 8, self.attr);
        buf.put_u32(offset + 12, self.param_count);
        buf.put_u32(offset + 16, self.raise_count);
    }

    pub fn write_param(
        buf: &mut ImageBuf,
        offset: u32,
        index: u32,
        spec: u32,
        name: u32,
        attr: u32,
    ) {
        let at = Self::param_slot(offset, index);
        buf.put_u32(at, spec);
        buf.put_u32(at + 4, name);
        buf.put_u32(at + 8, attr);
    }
}

/// Sequence descriptor; max 0 means unbounded.
#[derive(Debug, Clone, Copy)]
pub struct Sequence {
    pub spec: u32,
    pub max: u32,
}

impl Sequence {
    pub const SIZE: u32 = 8;

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.spec);
        buf.put_u32(offset + 4, self.max);
    }
}

/// Array descriptor, followed by the dimension sizes.
#[derive(Debug, Clone, Copy)]
pub struct Array {
    pub spec: u32,
    pub dimension_count: u32,
}

impl Array {
    pub const FIXED: u32 = 8;

    pub fn size(dimensions: u32) -> u32 {
        Self::FIXED + 4 * dimensions
    }

    pub fn dimension_slot(offset: u32, index: u32) -> u32 {
        offset + Self::FIXED + 4 * index
    }

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.spec);
        buf.put_u32(offset + 4, self.dimension_count);
    }
}

/// Structure and exception descriptors share one shape: a member count
/// followed by (spec, name-offset) pairs.
#[derive(Debug, Clone, Copy)]
pub struct Structure {
    pub member_count: u32,
}

impl Structure {
    pub const FIXED: u32 = 4;
    pub const MEMBER_SIZE: u32 = 8;

    pub fn size(members: u32) -> u32 {
        Self::FIXED + members * Self::MEMBER_SIZE
    }

    pub fn member_slot(offset: u32, index: u32) -> u32 {
        offset + Self::FIXED + index * Self::MEMBER_SIZE
    }

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.member_count);
    }

    pub fn write_member(
        buf: &mut ImageBuf,
        offset: u32,
        index: u32,
        spec: u32,
        name: u32,
    ) {
        let at = Self::member_slot(offset, index);
        buf.put_u32(at, spec);
        buf.put_u32(at + 4, name);
    }
}

/// Enum descriptor: member count followed by member name offsets.
#[derive(Debug, Clone, Copy)]
pub struct Enum {
    pub member_count: u32,
}

impl Enum {
    pub const FIXED: u32 = 4;

    pub fn size(members: u32) -> u32 {
        Self::FIXED + 4 * members
    }

    pub fn member_slot(offset: u32, index: u32) -> u32 {
        offset + Self::FIXED + 4 * index
    }

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.member_count);
    }
}

/// Constant record. The value slot holds the encoded value for 32-bit-fit
/// constants and the spill offset for wider ones.
#[derive(Debug, Clone, Copy)]
pub struct Constant {
    pub spec: u32,
    pub name: u32,
    pub value: u32,
}

impl Constant {
    pub const SIZE: u32 = 12;

    pub fn write(&self, buf: &mut ImageBuf, offset: u32) {
        buf.put_u32(offset, self.spec);
        buf.put_u32(offset + 4, self.name);
        buf.put_u32(offset + 8, self.value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Primitive::Void, "void", 1)]
    #[case(Primitive::S16, "short", 2)]
    #[case(Primitive::S32, "long", 3)]
    #[case(Primitive::S64, "long long", 4)]
    #[case(Primitive::U8, "octet", 5)]
    #[case(Primitive::U16, "unsigned short", 6)]
    #[case(Primitive::U32, "unsigned long", 7)]
    #[case(Primitive::U64, "unsigned long long", 8)]
    #[case(Primitive::F32, "float", 9)]
    #[case(Primitive::F64, "double", 10)]
    #[case(Primitive::F128, "long double", 11)]
    #[case(Primitive::Bool, "boolean", 12)]
    #[case(Primitive::Char, "char", 13)]
    #[case(Primitive::WChar, "wchar", 14)]
    #[case(Primitive::Uuid, "uuid", 15)]
    #[case(Primitive::String, "string", 16)]
    #[case(Primitive::WString, "wstring", 17)]
    #[case(Primitive::Any, "any", 18)]
    #[case(Primitive::Object, "Object", 19)]
    #[case(Primitive::Fixed, "fixed", 20)]
    #[case(Primitive::ValueBase, "ValueBase", 21)]
    fn primitive_table(
        #[case] prim: Primitive,
        #[case] name: &str,
        #[case] index: u32,
    ) {
        assert_eq!(Primitive::from_canonical_name(name), Some(prim));
        assert_eq!(prim.canonical_name(), name);
        assert_eq!(u32::from(prim), index);
        assert_eq!(prim.spec(), SPEC_PRIMITIVE | index);
    }

    #[test]
    fn reserved_s8_slot() {
        assert_eq!(u32::from(Primitive::S8), 0);
        assert_eq!(Primitive::from_canonical_name(""), None);
        assert_eq!(Primitive::COUNT, 22);
    }

    #[test]
    fn spec_discrimination() {
        assert_eq!(
            Spec::from_raw(SPEC_PRIMITIVE | 3),
            Some(Spec::Primitive(Primitive::S32))
        );
        assert_eq!(Spec::from_raw(0x40), Some(Spec::Offset(0x40)));
        assert_eq!(Spec::from_raw(0), None);
        assert_eq!(Spec::from_raw(SPEC_PRIMITIVE | 22), None);
    }

    #[test]
    fn record_sizes() {
        assert_eq!(Header::SIZE, 16);
        assert_eq!(Module::size(0, 0, 0), 20);
        assert_eq!(Module::size(2, 1, 1), 20 + 12 + 12);
        assert_eq!(Interface::size(3, 0), 52 + 12);
        assert_eq!(Method::size(0, 0), 20);
        assert_eq!(Method::size(1, 0), 32);
        assert_eq!(Method::size(2, 3), 20 + 24 + 12);
        assert_eq!(Array::size(3), 20);
        assert_eq!(Structure::size(2), 20);
        assert_eq!(Enum::size(4), 20);
    }

    #[test]
    fn buffer_stores_little_endian() {
        let mut buf = ImageBuf::new(16);
        buf.put_u32(4, 0x0102_0304);
        buf.put_cstr(8, "ab");
        let bytes = buf.into_bytes();
        assert_eq!(&bytes[4..8], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&bytes[8..11], b"ab\0");
    }
}
