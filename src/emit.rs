//! The emitter: materializes every record at the offset the planner
//! assigned, then hands the buffer to the writer. Emission never mutates
//! the tree; all offsets were fixed during layout.

use std::fmt::Write as _;
use std::fs::File;
use std::io::Write as _;
use std::path::Path;

use crate::ast::{Ast, NodeId, NodeKind, ParamDir};
use crate::ent::{self, ImageBuf, Primitive};
use crate::error::{
    Error, EvalKind, IoKind, LayoutKind, ResolveKind, Result,
};
use crate::eval::{eval_char, eval_float, eval_int, eval_str};
use crate::layout::{self, const_primitive, Layout};
use crate::resolve::{normalize, resolve, MAX_TYPE_DEPTH};

/// A planned and emitted image.
#[derive(Debug, Clone)]
pub struct EntImage {
    pub bytes: Vec<u8>,
    pub layout: Layout,
}

/// Plan the layout and emit the image. Byte-identical output for the same
/// input tree.
pub fn compile(ast: &mut Ast) -> Result<EntImage> {
    let layout = layout::plan(ast)?;
    let bytes = emit(ast, &layout)?;
    Ok(EntImage { bytes, layout })
}

/// Write every record into a zero-filled buffer of the planned size.
pub fn emit(ast: &Ast, layout: &Layout) -> Result<Vec<u8>> {
    let mut buf = ImageBuf::new(layout.file_size);
    ent::Header { file_size: layout.file_size }.write(&mut buf);
    for (name, offset) in layout.strings.iter() {
        buf.put_cstr(offset, name);
    }
    emit_entity(ast, ast.root(), layout, &mut buf)?;
    for &(descriptor, scope) in &layout.descriptors {
        emit_descriptor(ast, descriptor, scope, layout, &mut buf)?;
    }
    Ok(buf.into_bytes())
}

fn emit_entity(
    ast: &Ast,
    id: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    if !ast.in_tu(id) {
        return Ok(());
    }
    match &ast.node(id).kind {
        NodeKind::Specification => {
            for &child in &ast.node(id).children {
                emit_entity(ast, child, layout, buf)?;
            }
        }
        NodeKind::Module => emit_module(ast, id, layout, buf)?,
        NodeKind::Enum => {
            let offset = ast.offset(id);
            let children = &ast.node(id).children;
            let record = ent::Enum {
                member_count: u32::try_from(children.len()).unwrap(),
            };
            record.write(buf, offset);
            for (i, &member) in children.iter().enumerate() {
                buf.put_u32(
                    ent::Enum::member_slot(offset, u32::try_from(i).unwrap()),
                    layout.strings.offset_of(&ast.node(member).name),
                );
            }
        }
        NodeKind::Interface(data) => {
            if !data.forward {
                emit_interface(ast, id, layout, buf)?;
            }
        }
        NodeKind::Attribute(_) => emit_attribute(ast, id, layout, buf)?,
        NodeKind::Op(_) => emit_op(ast, id, layout, buf)?,
        // constant records are written by their owning module/interface
        _ => {}
    }
    Ok(())
}

fn emit_module(
    ast: &Ast,
    id: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    let offset = ast.offset(id);
    let parent = ast
        .parent(id)
        .filter(|&p| matches!(ast.node(p).kind, NodeKind::Module))
        .map(|p| ast.offset(p))
        .unwrap_or(0);
    let modules = ast.module_count(id);
    let interfaces = ast.interface_count(id);
    ent::Module {
        name: layout.strings.offset_of(&ast.node(id).name),
        parent,
        module_count: modules,
        interface_count: interfaces,
        const_count: ast.const_count(id),
    }
    .write(buf, offset);

    let mut module_index = 0;
    let mut interface_index = 0;
    for &child in &ast.node(id).children {
        let node = ast.node(child);
        match &node.kind {
            NodeKind::Module if node.rank == 1 => {
                buf.put_u32(
                    ent::Module::module_slot(offset, module_index),
                    ast.offset(child),
                );
                module_index += 1;
            }
            NodeKind::Interface(i) if node.rank == 1 && !i.forward => {
                buf.put_u32(
                    ent::Module::interface_slot(
                        offset,
                        modules,
                        interface_index,
                    ),
                    ast.offset(child),
                );
                interface_index += 1;
            }
            NodeKind::Const(_) => emit_constant(ast, child, layout, buf)?,
            _ => {}
        }
    }

    for &child in &ast.node(id).children {
        emit_entity(ast, child, layout, buf)?;
    }
    Ok(())
}

fn emit_interface(
    ast: &Ast,
    id: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    let offset = ast.offset(id);
    let NodeKind::Interface(data) = &ast.node(id).kind else {
        unreachable!()
    };
    let (parent_iid, inherited) = super_chain(ast, id)?;
    let module = ast
        .parent(id)
        .filter(|&p| matches!(ast.node(p).kind, NodeKind::Module))
        .map(|p| ast.offset(p))
        .unwrap_or(0);
    ent::Interface {
        name: layout.strings.offset_of(&ast.node(id).name),
        iid: data.iid,
        parent_iid,
        module,
        method_count: ast.method_count(id),
        const_count: ast.const_count(id),
        inherited_method_count: inherited,
    }
    .write(buf, offset);

    let mut slot = 0;
    for &child in &ast.node(id).children {
        match &ast.node(child).kind {
            NodeKind::Op(_) => {
                buf.put_u32(
                    ent::Interface::method_slot(offset, slot),
                    ast.offset(child),
                );
                slot += 1;
            }
            NodeKind::Attribute(a) => {
                let getter = ast.offset(child);
                buf.put_u32(
                    ent::Interface::method_slot(offset, slot),
                    getter,
                );
                slot += 1;
                if !a.readonly {
                    buf.put_u32(
                        ent::Interface::method_slot(offset, slot),
                        getter + ent::Method::size(0, 0),
                    );
                    slot += 1;
                }
            }
            NodeKind::Const(_) => emit_constant(ast, child, layout, buf)?,
            _ => {}
        }
    }

    for &child in &ast.node(id).children {
        emit_entity(ast, child, layout, buf)?;
    }
    Ok(())
}

/// Parent IID and inherited method count of an interface: the immediate
/// base's IID, and the method-count sum along the whole single-inheritance
/// chain. Each link resolves in its declaring interface's enclosing scope,
/// so an interface member that shares the base's name cannot shadow it.
fn super_chain(ast: &Ast, id: NodeId) -> Result<([u8; 16], u32)> {
    let mut parent_iid = [0u8; 16];
    let mut inherited = 0u32;
    let mut cursor = id;
    for depth in 0..MAX_TYPE_DEPTH {
        let node = ast.node(cursor);
        let NodeKind::Interface(data) = &node.kind else {
            return Err(Error::resolve(
                ResolveKind::NotAnInterface,
                node.loc,
                ast.qualified_name(cursor),
            ));
        };
        let path = match data.extends.as_slice() {
            [] => return Ok((parent_iid, inherited)),
            [path] => path,
            _ => {
                return Err(Error::resolve(
                    ResolveKind::NotAnInterface,
                    node.loc,
                    ast.qualified_name(cursor),
                ))
            }
        };
        let enclosing = ast.parent(cursor).unwrap_or(cursor);
        let base = resolve(ast, path, enclosing, node.loc)?;
        let base_node = ast.node(base);
        match &base_node.kind {
            NodeKind::Interface(b) if !b.forward => {
                if depth == 0 {
                    parent_iid = b.iid;
                }
            }
            NodeKind::Interface(_) => {
                return Err(Error::layout(
                    LayoutKind::UnexpectedForwardDecl,
                    base_node.loc,
                    ast.qualified_name(base),
                ))
            }
            _ => {
                return Err(Error::resolve(
                    ResolveKind::NotAnInterface,
                    base_node.loc,
                    ast.qualified_name(base),
                ))
            }
        }
        inherited += ast.method_count(base);
        cursor = base;
    }
    Err(Error::layout(
        LayoutKind::RecursiveType,
        ast.node(id).loc,
        ast.qualified_name(id),
    ))
}

fn emit_attribute(
    ast: &Ast,
    id: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    let NodeKind::Attribute(data) = &ast.node(id).kind else {
        unreachable!()
    };
    let offset = ast.offset(id);
    let scope = ast.parent(id).unwrap_or(ast.root());
    let name = layout.strings.offset_of(&ast.node(id).name);
    let spec = spec_of(ast, data.spec, scope)?;
    ent::Method {
        ret: spec,
        name,
        attr: ent::ATTR_GETTER,
        param_count: 0,
        raise_count: 0,
    }
    .write(buf, offset);
    if !data.readonly {
        let setter = offset + ent::Method::size(0, 0);
        ent::Method {
            ret: Primitive::Void.spec(),
            name,
            attr: ent::ATTR_SETTER,
            param_count: 1,
            raise_count: 0,
        }
        .write(buf, setter);
        ent::Method::write_param(buf, setter, 0, spec, name, ent::ATTR_IN);
    }
    Ok(())
}

fn emit_op(
    ast: &Ast,
    id: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    let NodeKind::Op(data) = &ast.node(id).kind else { unreachable!() };
    let offset = ast.offset(id);
    let scope = ast.parent(id).unwrap_or(ast.root());
    let params = ast.param_count(id);
    ent::Method {
        ret: spec_of(ast, data.ret, scope)?,
        name: layout.strings.offset_of(&ast.node(id).name),
        attr: 0,
        param_count: params,
        raise_count: ast.raise_count(id),
    }
    .write(buf, offset);

    let mut index = 0;
    for &child in &ast.node(id).children {
        let NodeKind::Param(param) = &ast.node(child).kind else {
            continue;
        };
        let dir = match param.dir {
            ParamDir::In => ent::ATTR_IN,
            ParamDir::Out => ent::ATTR_OUT,
            ParamDir::InOut => ent::ATTR_IN_OUT,
        };
        ent::Method::write_param(
            buf,
            offset,
            index,
            spec_of(ast, child, id)?,
            layout.strings.offset_of(&ast.node(child).name),
            dir,
        );
        index += 1;
    }

    for (i, &raise) in data.raises.iter().enumerate() {
        buf.put_u32(
            ent::Method::raise_slot(offset, params, u32::try_from(i).unwrap()),
            spec_of(ast, raise, scope)?,
        );
    }
    Ok(())
}

fn emit_constant(
    ast: &Ast,
    id: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    let NodeKind::Const(data) = &ast.node(id).kind else { unreachable!() };
    let offset = ast.offset(id);
    let scope = ast.parent(id).unwrap_or(ast.root());
    let prim = const_primitive(ast, id, scope)?;
    let name = layout.strings.offset_of(&ast.node(id).name);
    let expr = &data.expr;
    let spill = data.value_offset;

    let inline = |value: u32, buf: &mut ImageBuf| {
        ent::Constant { spec: prim.spec(), name, value }.write(buf, offset);
    };
    match prim {
        Primitive::S16 => {
            let v: i16 = eval_int(ast, expr, scope, id)?;
            inline(v as u32, buf);
        }
        Primitive::S32 => {
            let v: i32 = eval_int(ast, expr, scope, id)?;
            inline(v as u32, buf);
        }
        Primitive::U8 => {
            let v: u8 = eval_int(ast, expr, scope, id)?;
            inline(u32::from(v), buf);
        }
        Primitive::U16 => {
            let v: u16 = eval_int(ast, expr, scope, id)?;
            inline(u32::from(v), buf);
        }
        Primitive::U32 => {
            let v: u32 = eval_int(ast, expr, scope, id)?;
            inline(v, buf);
        }
        Primitive::Bool => {
            let v: u32 = eval_int(ast, expr, scope, id)?;
            inline(u32::from(v != 0), buf);
        }
        Primitive::Char | Primitive::WChar => {
            let v = eval_char(ast, expr, scope, id)?;
            inline(v as u32, buf);
        }
        Primitive::F32 => {
            let v: f32 = eval_float(ast, expr, scope, id)?;
            inline(v.to_bits(), buf);
        }
        Primitive::S64 => {
            let v: i64 = eval_int(ast, expr, scope, id)?;
            inline(spill, buf);
            buf.put_u64(spill, v as u64);
        }
        Primitive::U64 => {
            let v: u64 = eval_int(ast, expr, scope, id)?;
            inline(spill, buf);
            buf.put_u64(spill, v);
        }
        Primitive::F64 => {
            let v: f64 = eval_float(ast, expr, scope, id)?;
            inline(spill, buf);
            buf.put_u64(spill, v.to_bits());
        }
        Primitive::F128 => {
            // no host f128; the value occupies the low half of the
            // reserved 16-byte slot
            let v: f64 = eval_float(ast, expr, scope, id)?;
            inline(spill, buf);
            buf.put_u64(spill, v.to_bits());
        }
        Primitive::String | Primitive::WString => {
            let v = eval_str(ast, expr, scope, id)?;
            inline(spill, buf);
            buf.put_cstr(spill, &v);
        }
        _ => {
            return Err(Error::eval(
                EvalKind::BadConstantType,
                ast.node(id).loc,
                ast.qualified_name(id),
            ))
        }
    }
    Ok(())
}

fn emit_descriptor(
    ast: &Ast,
    id: NodeId,
    scope: NodeId,
    layout: &Layout,
    buf: &mut ImageBuf,
) -> Result<()> {
    let offset = ast.offset(id);
    match &ast.node(id).kind {
        NodeKind::Sequence(data) => {
            let max = match &data.max {
                Some(bound) => eval_int::<u32>(ast, bound, scope, id)?,
                None => 0,
            };
            ent::Sequence { spec: spec_of(ast, data.spec, scope)?, max }
                .write(buf, offset);
        }
        NodeKind::Array(data) => {
            ent::Array {
                spec: spec_of(ast, data.spec, scope)?,
                dimension_count: u32::try_from(data.dims.len()).unwrap(),
            }
            .write(buf, offset);
            for (i, dim) in data.dims.iter().enumerate() {
                buf.put_u32(
                    ent::Array::dimension_slot(
                        offset,
                        u32::try_from(i).unwrap(),
                    ),
                    eval_int::<u32>(ast, dim, scope, id)?,
                );
            }
        }
        NodeKind::Struct | NodeKind::Except => {
            let children = &ast.node(id).children;
            ent::Structure {
                member_count: u32::try_from(children.len()).unwrap(),
            }
            .write(buf, offset);
            for (i, &member) in children.iter().enumerate() {
                ent::Structure::write_member(
                    buf,
                    offset,
                    u32::try_from(i).unwrap(),
                    spec_of(ast, member, id)?,
                    layout.strings.offset_of(&ast.node(member).name),
                );
            }
        }
        NodeKind::Enum => {
            let children = &ast.node(id).children;
            ent::Enum {
                member_count: u32::try_from(children.len()).unwrap(),
            }
            .write(buf, offset);
            for (i, &member) in children.iter().enumerate() {
                buf.put_u32(
                    ent::Enum::member_slot(offset, u32::try_from(i).unwrap()),
                    layout.strings.offset_of(&ast.node(member).name),
                );
            }
        }
        NodeKind::Interface(data) => {
            // imported interface stub: IID, parent IID and counts only
            let (parent_iid, inherited) = super_chain(ast, id)?;
            ent::Interface {
                name: 0,
                iid: data.iid,
                parent_iid,
                module: 0,
                method_count: ast.method_count(id),
                const_count: ast.const_count(id),
                inherited_method_count: inherited,
            }
            .write(buf, offset);
        }
        _ => unreachable!("descriptor list holds only type nodes"),
    }
    Ok(())
}

/// The `Spec` of a type reference: normalize, then primitive index or
/// descriptor/entity offset. Agrees bit-for-bit with the planner because
/// both run the same normalization loop over the same offsets.
fn spec_of(ast: &Ast, node: NodeId, scope: NodeId) -> Result<u32> {
    let (terminal, _) = normalize(ast, node, scope)?;
    let term = ast.node(terminal);
    match &term.kind {
        NodeKind::Type => Primitive::from_canonical_name(&term.name)
            .map(Primitive::spec)
            .ok_or_else(|| {
                Error::resolve(
                    ResolveKind::NotAType,
                    term.loc,
                    ast.qualified_name(terminal),
                )
            }),
        NodeKind::Interface(i) if i.forward && term.offset == 0 => {
            Err(Error::layout(
                LayoutKind::UnexpectedForwardDecl,
                term.loc,
                ast.qualified_name(terminal),
            ))
        }
        _ if term.offset != 0 => Ok(term.offset),
        _ => Err(Error::resolve(
            ResolveKind::NotAType,
            term.loc,
            ast.qualified_name(terminal),
        )),
    }
}

/// Flush the finished image in one shot; a failed or short write removes
/// the partial file.
pub fn write_image(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file = File::create(path)
        .map_err(|e| Error::io(IoKind::OpenFailed, path, e))?;
    match file.write_all(bytes).and_then(|()| file.flush()) {
        Ok(()) => Ok(()),
        Err(e) => {
            drop(file);
            let _ = std::fs::remove_file(path);
            Err(Error::io(IoKind::WriteShort, path, e))
        }
    }
}

/// Trace of every record placed in the image, in emission order. The
/// original compiler printed this while emitting; kept as a pure function
/// for the CLI and the tests.
pub fn listing(ast: &Ast, layout: &Layout) -> Result<String> {
    let mut out = String::new();
    for (name, offset) in layout.strings.iter() {
        let _ = writeln!(out, "{offset:04x}: \"{name}\"");
    }
    listing_entity(ast, ast.root(), &mut out)?;
    for &(descriptor, scope) in &layout.descriptors {
        listing_descriptor(ast, descriptor, scope, &mut out)?;
    }
    Ok(out)
}

fn listing_entity(ast: &Ast, id: NodeId, out: &mut String) -> Result<()> {
    if !ast.in_tu(id) {
        return Ok(());
    }
    let node = ast.node(id);
    let offset = node.offset;
    match &node.kind {
        NodeKind::Specification => {}
        NodeKind::Module => {
            let _ = writeln!(out, "{offset:04x}: Module {}", node.name);
        }
        NodeKind::Enum => {
            let _ = writeln!(out, "{offset:04x}: Enum {}", node.name);
        }
        NodeKind::Interface(i) => {
            if i.forward {
                return Ok(());
            }
            let _ = writeln!(out, "{offset:04x}: Interface {}", node.name);
        }
        NodeKind::Attribute(a) => {
            let scope = ast.parent(id).unwrap_or(ast.root());
            let spec = spec_of(ast, a.spec, scope)?;
            let _ = writeln!(
                out,
                "{offset:04x}: Getter {} : {spec:x}",
                node.name
            );
            if !a.readonly {
                let setter = offset + ent::Method::size(0, 0);
                let _ = writeln!(
                    out,
                    "{setter:04x}: Setter {} : {spec:x}",
                    node.name
                );
            }
            return Ok(());
        }
        NodeKind::Op(op) => {
            let scope = ast.parent(id).unwrap_or(ast.root());
            let spec = spec_of(ast, op.ret, scope)?;
            let _ = writeln!(
                out,
                "{offset:04x}: Method {} : {spec:x}",
                node.name
            );
            for &child in &node.children {
                if matches!(ast.node(child).kind, NodeKind::Param(_)) {
                    let spec = spec_of(ast, child, id)?;
                    let _ = writeln!(
                        out,
                        "  Param {} : {spec:x}",
                        ast.node(child).name
                    );
                }
            }
            for &raise in &op.raises {
                let spec = spec_of(ast, raise, scope)?;
                let _ = writeln!(out, "  Raise {spec:x}");
            }
            return Ok(());
        }
        NodeKind::Const(_) => {
            let scope = ast.parent(id).unwrap_or(ast.root());
            let prim = const_primitive(ast, id, scope)?;
            let _ = writeln!(
                out,
                "{offset:04x}: Constant {} {:x}",
                node.name,
                prim.spec()
            );
            return Ok(());
        }
        _ => return Ok(()),
    }
    for &child in &ast.node(id).children {
        listing_entity(ast, child, out)?;
    }
    Ok(())
}

fn listing_descriptor(
    ast: &Ast,
    id: NodeId,
    scope: NodeId,
    out: &mut String,
) -> Result<()> {
    let node = ast.node(id);
    let offset = node.offset;
    match &node.kind {
        NodeKind::Sequence(s) => {
            let spec = spec_of(ast, s.spec, scope)?;
            let _ = writeln!(out, "{offset:04x}: Sequence<{spec:x}>");
        }
        NodeKind::Array(a) => {
            let spec = spec_of(ast, a.spec, scope)?;
            let _ = writeln!(
                out,
                "{offset:04x}: Array of {spec:x} - {}",
                node.name
            );
        }
        NodeKind::Struct => {
            let _ = writeln!(out, "{offset:04x}: Structure {}", node.name);
        }
        NodeKind::Except => {
            let _ = writeln!(out, "{offset:04x}: Exception {}", node.name);
        }
        NodeKind::Enum => {
            let _ = writeln!(out, "{offset:04x}: Enum {}", node.name);
        }
        NodeKind::Interface(_) => {
            let _ = writeln!(
                out,
                "{offset:04x}: Imported interface {}",
                node.name
            );
        }
        _ => {}
    }
    Ok(())
}
