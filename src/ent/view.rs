//! Zero-copy views over an emitted image, the same walk the run-time
//! reflection bridges perform over the memory-mapped file. Offsets come
//! from other records (or the compiler's own layout); out-of-range
//! accesses panic, malformed header/spec values read as `None`.

use crate::ent::{
    Array, Enum, Header, Interface, Method, Module, Spec, Structure, MAGIC,
};

fn read_u32(data: &[u8], offset: u32) -> u32 {
    let at = offset as usize;
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}

fn read_bytes16(data: &[u8], offset: u32) -> [u8; 16] {
    let at = offset as usize;
    data[at..at + 16].try_into().unwrap()
}

/// Zero-terminated string at a string-pool offset.
pub fn read_cstr(data: &[u8], offset: u32) -> &str {
    let at = offset as usize;
    let end = data[at..]
        .iter()
        .position(|&b| b == 0)
        .map(|p| at + p)
        .unwrap_or(data.len());
    std::str::from_utf8(&data[at..end]).unwrap_or("")
}

#[derive(Debug, Clone, Copy)]
pub struct HeaderView<'a> {
    data: &'a [u8],
}

impl<'a> HeaderView<'a> {
    pub fn new(data: &'a [u8]) -> Option<Self> {
        if data.len() < Header::SIZE as usize || data[0..4] != MAGIC {
            return None;
        }
        let view = HeaderView { data };
        (view.file_size() as usize == data.len()).then_some(view)
    }

    pub fn file_size(&self) -> u32 {
        read_u32(self.data, 4)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ModuleView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> ModuleView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        ModuleView { data, offset }
    }

    pub fn name_offset(&self) -> u32 {
        read_u32(self.data, self.offset)
    }

    pub fn name(&self) -> &'a str {
        read_cstr(self.data, self.name_offset())
    }

    pub fn parent_offset(&self) -> u32 {
        read_u32(self.data, self.offset + 4)
    }

    pub fn module_count(&self) -> u32 {
        read_u32(self.data, self.offset + 8)
    }

    pub fn interface_count(&self) -> u32 {
        read_u32(self.data, self.offset + 12)
    }

    pub fn const_count(&self) -> u32 {
        read_u32(self.data, self.offset + 16)
    }

    pub fn module_offset(&self, index: u32) -> u32 {
        read_u32(self.data, Module::module_slot(self.offset, index))
    }

    pub fn interface_offset(&self, index: u32) -> u32 {
        read_u32(
            self.data,
            Module::interface_slot(self.offset, self.module_count(), index),
        )
    }

    pub fn constant(&self, index: u32) -> ConstantView<'a> {
        ConstantView::new(
            self.data,
            Module::const_slot(
                self.offset,
                self.module_count(),
                self.interface_count(),
                index,
            ),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InterfaceView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> InterfaceView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        InterfaceView { data, offset }
    }

    pub fn name_offset(&self) -> u32 {
        read_u32(self.data, self.offset)
    }

    pub fn name(&self) -> &'a str {
        read_cstr(self.data, self.name_offset())
    }

    pub fn iid(&self) -> [u8; 16] {
        read_bytes16(self.data, self.offset + 4)
    }

    pub fn parent_iid(&self) -> [u8; 16] {
        read_bytes16(self.data, self.offset + 20)
    }

    pub fn module_offset(&self) -> u32 {
        read_u32(self.data, self.offset + 36)
    }

    pub fn method_count(&self) -> u32 {
        read_u32(self.data, self.offset + 40)
    }

    pub fn const_count(&self) -> u32 {
        read_u32(self.data, self.offset + 44)
    }

    pub fn inherited_method_count(&self) -> u32 {
        read_u32(self.data, self.offset + 48)
    }

    pub fn method_offset(&self, index: u32) -> u32 {
        read_u32(self.data, Interface::method_slot(self.offset, index))
    }

    pub fn constant(&self, index: u32) -> ConstantView<'a> {
        ConstantView::new(
            self.data,
            Interface::const_slot(self.offset, self.method_count(), index),
        )
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MethodView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> MethodView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        MethodView { data, offset }
    }

    pub fn return_spec(&self) -> Option<Spec> {
        Spec::from_raw(read_u32(self.data, self.offset))
    }

    pub fn name_offset(&self) -> u32 {
        read_u32(self.data, self.offset + 4)
    }

    pub fn name(&self) -> &'a str {
        read_cstr(self.data, self.name_offset())
    }

    pub fn attr(&self) -> u32 {
        read_u32(self.data, self.offset + 8)
    }

    pub fn param_count(&self) -> u32 {
        read_u32(self.data, self.offset + 12)
    }

    pub fn raise_count(&self) -> u32 {
        read_u32(self.data, self.offset + 16)
    }

    /// (spec, name offset, direction bits) of the inline param slot.
    pub fn param(&self, index: u32) -> (Option<Spec>, u32, u32) {
        let at = Method::param_slot(self.offset, index);
        (
            Spec::from_raw(read_u32(self.data, at)),
            read_u32(self.data, at + 4),
            read_u32(self.data, at + 8),
        )
    }

    pub fn raise(&self, index: u32) -> Option<Spec> {
        let at =
            Method::raise_slot(self.offset, self.param_count(), index);
        Spec::from_raw(read_u32(self.data, at))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SequenceView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> SequenceView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        SequenceView { data, offset }
    }

    pub fn element_spec(&self) -> Option<Spec> {
        Spec::from_raw(read_u32(self.data, self.offset))
    }

    /// 0 means unbounded.
    pub fn max(&self) -> u32 {
        read_u32(self.data, self.offset + 4)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ArrayView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> ArrayView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        ArrayView { data, offset }
    }

    pub fn element_spec(&self) -> Option<Spec> {
        Spec::from_raw(read_u32(self.data, self.offset))
    }

    pub fn dimension_count(&self) -> u32 {
        read_u32(self.data, self.offset + 4)
    }

    pub fn dimension(&self, index: u32) -> u32 {
        read_u32(self.data, Array::dimension_slot(self.offset, index))
    }
}

/// Structure and exception records share one shape.
#[derive(Debug, Clone, Copy)]
pub struct StructureView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> StructureView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        StructureView { data, offset }
    }

    pub fn member_count(&self) -> u32 {
        read_u32(self.data, self.offset)
    }

    /// (spec, name offset) of a member slot.
    pub fn member(&self, index: u32) -> (Option<Spec>, u32) {
        let at = Structure::member_slot(self.offset, index);
        (
            Spec::from_raw(read_u32(self.data, at)),
            read_u32(self.data, at + 4),
        )
    }

    pub fn member_name(&self, index: u32) -> &'a str {
        read_cstr(self.data, self.member(index).1)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EnumView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> EnumView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        EnumView { data, offset }
    }

    pub fn member_count(&self) -> u32 {
        read_u32(self.data, self.offset)
    }

    pub fn member_name_offset(&self, index: u32) -> u32 {
        read_u32(self.data, Enum::member_slot(self.offset, index))
    }

    pub fn member_name(&self, index: u32) -> &'a str {
        read_cstr(self.data, self.member_name_offset(index))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConstantView<'a> {
    data: &'a [u8],
    offset: u32,
}

impl<'a> ConstantView<'a> {
    pub fn new(data: &'a [u8], offset: u32) -> Self {
        ConstantView { data, offset }
    }

    pub fn spec(&self) -> Option<Spec> {
        Spec::from_raw(read_u32(self.data, self.offset))
    }

    pub fn name_offset(&self) -> u32 {
        read_u32(self.data, self.offset + 4)
    }

    pub fn name(&self) -> &'a str {
        read_cstr(self.data, self.name_offset())
    }

    /// The inline slot: the encoded value, or the spill offset for wide
    /// constants.
    pub fn value(&self) -> u32 {
        read_u32(self.data, self.offset + 8)
    }

    pub fn value_u64(&self) -> u64 {
        let at = self.value() as usize;
        u64::from_le_bytes(self.data[at..at + 8].try_into().unwrap())
    }

    pub fn value_str(&self) -> &'a str {
        read_cstr(self.data, self.value())
    }
}
