//! The layout planner: three depth-first passes that assign every entity,
//! string, constant spill and type descriptor its file offset before a
//! single byte is written. Every size reserved here must equal the bytes
//! the emitter writes; that is the central cross-pass invariant.

use std::collections::HashMap;

use crate::ast::{Ast, NodeId, NodeKind};
use crate::ent::{self, align4, align8, Primitive};
use crate::error::{Error, EvalKind, LayoutKind, ResolveKind, Result};
use crate::eval::eval_str;
use crate::resolve::{normalize, resolve, MAX_TYPE_DEPTH};

/// Identifier region of the image: each distinct name gets one
/// zero-terminated slot, in first-encounter tree order.
#[derive(Debug, Clone, Default)]
pub struct StringPool {
    order: Vec<(String, u32)>,
    offsets: HashMap<String, u32>,
}

impl StringPool {
    fn intern(&mut self, name: &str, cursor: &mut u32) {
        if name.is_empty() || self.offsets.contains_key(name) {
            return;
        }
        self.offsets.insert(name.to_owned(), *cursor);
        self.order.push((name.to_owned(), *cursor));
        *cursor += u32::try_from(name.len()).unwrap() + 1;
    }

    /// Pool offset of an interned identifier. Looking up a name the
    /// string pass never saw is a planner bug.
    pub fn offset_of(&self, name: &str) -> u32 {
        self.offsets[name]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.order.iter().map(|(s, o)| (s.as_str(), *o))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// The planned image: all offsets assigned, region boundaries known.
#[derive(Debug, Clone)]
pub struct Layout {
    pub strings: StringPool,
    /// Type-descriptor nodes in assignment order, each paired with the
    /// scope it was reached in; the emitter materializes exactly this
    /// list under exactly these scopes.
    pub descriptors: Vec<(NodeId, NodeId)>,
    pub entity_end: u32,
    pub string_end: u32,
    pub const_end: u32,
    pub file_size: u32,
}

/// Run the three layout passes over the tree.
pub fn plan(ast: &mut Ast) -> Result<Layout> {
    let root = ast.root();

    let mut offset = ent::Header::SIZE;
    entity_pass(ast, root, &mut offset);
    let entity_end = offset;

    let mut strings = StringPool::default();
    string_pass(ast, root, &mut strings, &mut offset);
    let string_end = offset;

    offset = align4(offset);
    const_pass(ast, root, &mut offset)?;
    let const_end = offset;

    offset = align4(offset);
    let mut descriptors = Vec::new();
    type_pass(ast, root, &mut offset, &mut descriptors)?;

    Ok(Layout {
        strings,
        descriptors,
        entity_end,
        string_end,
        const_end,
        file_size: align4(offset),
    })
}

enum EntityStep {
    Recurse,
    Module,
    Enum,
    Interface,
    Attribute { readonly: bool },
    Op,
    Skip,
}

/// Pass A: assign offsets to modules, enums, interfaces, attributes and
/// operations in visit order, including each owner's trailing constant
/// records. Imported subtrees stay at offset 0.
fn entity_pass(ast: &mut Ast, id: NodeId, offset: &mut u32) {
    if !ast.in_tu(id) {
        return;
    }
    let step = match &ast.node(id).kind {
        NodeKind::Specification => EntityStep::Recurse,
        NodeKind::Module => EntityStep::Module,
        NodeKind::Enum => EntityStep::Enum,
        NodeKind::Interface(i) => {
            if i.forward {
                EntityStep::Skip
            } else {
                EntityStep::Interface
            }
        }
        NodeKind::Attribute(a) => {
            EntityStep::Attribute { readonly: a.readonly }
        }
        NodeKind::Op(_) => EntityStep::Op,
        _ => EntityStep::Skip,
    };
    match step {
        EntityStep::Recurse => {
            for child in ast.children_of(id) {
                entity_pass(ast, child, offset);
            }
        }
        EntityStep::Module => {
            ast.set_offset(id, *offset);
            let modules = ast.module_count(id);
            let interfaces = ast.interface_count(id);
            let consts = ast.const_count(id);
            assign_consts(
                ast,
                id,
                ent::Module::const_slot(*offset, modules, interfaces, 0),
            );
            *offset += ent::Module::size(modules, interfaces, consts);
            for child in ast.children_of(id) {
                entity_pass(ast, child, offset);
            }
        }
        EntityStep::Enum => {
            ast.set_offset(id, *offset);
            let members =
                u32::try_from(ast.node(id).children.len()).unwrap();
            *offset += ent::Enum::size(members);
        }
        EntityStep::Interface => {
            ast.set_offset(id, *offset);
            let methods = ast.method_count(id);
            let consts = ast.const_count(id);
            assign_consts(
                ast,
                id,
                ent::Interface::const_slot(*offset, methods, 0),
            );
            *offset += ent::Interface::size(methods, consts);
            for child in ast.children_of(id) {
                entity_pass(ast, child, offset);
            }
        }
        EntityStep::Attribute { readonly } => {
            ast.set_offset(id, *offset);
            *offset += ent::Method::size(0, 0);
            if !readonly {
                // synthesized setter: one `in` param
                *offset += ent::Method::size(1, 0);
            }
        }
        EntityStep::Op => {
            ast.set_offset(id, *offset);
            let params = ast.param_count(id);
            let raises = ast.raise_count(id);
            *offset += ent::Method::size(params, raises);
        }
        EntityStep::Skip => {}
    }
}

fn assign_consts(ast: &mut Ast, owner: NodeId, base: u32) {
    let mut slot = base;
    for child in ast.children_of(owner) {
        if matches!(ast.node(child).kind, NodeKind::Const(_)) {
            ast.set_offset(child, slot);
            slot += ent::Constant::SIZE;
        }
    }
}

/// Pass B, string half: intern every identifier a record will reference.
/// Imported subtrees are walked too — their structures and enums can be
/// reached as member types and emit name offsets like any other.
fn string_pass(
    ast: &Ast,
    id: NodeId,
    pool: &mut StringPool,
    cursor: &mut u32,
) {
    let node = ast.node(id);
    match &node.kind {
        NodeKind::Specification => {}
        NodeKind::Module
        | NodeKind::Interface(_)
        | NodeKind::EnumMember
        | NodeKind::Attribute(_)
        | NodeKind::Op(_)
        | NodeKind::Param(_)
        | NodeKind::Const(_) => pool.intern(&node.name, cursor),
        // declarator names reach the image only as structure/exception
        // member slots; typedef declarators at module scope do not
        NodeKind::Member(_) | NodeKind::Array(_) => {
            let aggregate = node.parent.is_some_and(|p| {
                matches!(
                    ast.node(p).kind,
                    NodeKind::Struct | NodeKind::Except
                )
            });
            if aggregate {
                pool.intern(&node.name, cursor);
            }
        }
        // enum/struct/exception type names never appear in a record
        NodeKind::Enum | NodeKind::Struct | NodeKind::Except => {}
        NodeKind::Sequence(_) | NodeKind::ScopedName(_) | NodeKind::Type => {}
    }
    for &child in &node.children {
        string_pass(ast, child, pool, cursor);
    }
}

/// Pass B, constant half: reserve spill slots for values wider than the
/// inline 32-bit slot. Numeric spills are 8-byte aligned; strings are
/// sized by evaluating them.
fn const_pass(ast: &mut Ast, id: NodeId, offset: &mut u32) -> Result<()> {
    if !ast.in_tu(id) {
        return Ok(());
    }
    match &ast.node(id).kind {
        NodeKind::Specification
        | NodeKind::Module
        | NodeKind::Interface(_) => {
            for child in ast.children_of(id) {
                const_pass(ast, child, offset)?;
            }
        }
        NodeKind::Const(_) => {
            let scope = ast.parent(id).unwrap_or(ast.root());
            match const_primitive(ast, id, scope)? {
                Primitive::S64 | Primitive::U64 | Primitive::F64 => {
                    *offset = align8(*offset);
                    set_value_offset(ast, id, *offset);
                    *offset += 8;
                }
                Primitive::F128 => {
                    *offset = align8(*offset);
                    set_value_offset(ast, id, *offset);
                    *offset += 16;
                }
                Primitive::String | Primitive::WString => {
                    let value = {
                        let NodeKind::Const(c) = &ast.node(id).kind else {
                            unreachable!()
                        };
                        eval_str(ast, &c.expr, scope, id)?
                    };
                    set_value_offset(ast, id, *offset);
                    *offset +=
                        u32::try_from(value.len()).unwrap() + 1;
                }
                _ => {}
            }
        }
        _ => {}
    }
    Ok(())
}

/// The primitive type a constant declaration ultimately names.
pub(crate) fn const_primitive(
    ast: &Ast,
    id: NodeId,
    scope: NodeId,
) -> Result<Primitive> {
    let NodeKind::Const(c) = &ast.node(id).kind else {
        unreachable!()
    };
    let bad = || {
        Error::eval(
            EvalKind::BadConstantType,
            ast.node(id).loc,
            ast.qualified_name(id),
        )
    };
    let (terminal, _) = normalize(ast, c.ty, scope)?;
    match &ast.node(terminal).kind {
        NodeKind::Type => {
            Primitive::from_canonical_name(&ast.node(terminal).name)
                .ok_or_else(bad)
        }
        _ => Err(bad()),
    }
}

fn set_value_offset(ast: &mut Ast, id: NodeId, offset: u32) {
    match &mut ast.node_mut(id).kind {
        NodeKind::Const(c) => c.value_offset = offset,
        _ => unreachable!(),
    }
}

/// Pass C: walk every member, parameter, return type, raises entry and
/// attribute type; reserve descriptors for the sequences, arrays,
/// structures, exceptions and imported interfaces they reach.
fn type_pass(
    ast: &mut Ast,
    id: NodeId,
    offset: &mut u32,
    descriptors: &mut Vec<(NodeId, NodeId)>,
) -> Result<()> {
    if !ast.in_tu(id) {
        return Ok(());
    }
    match &ast.node(id).kind {
        NodeKind::Specification
        | NodeKind::Module
        | NodeKind::Interface(_) => {
            for child in ast.children_of(id) {
                type_pass(ast, child, offset, descriptors)?;
            }
        }
        NodeKind::Attribute(a) => {
            let spec = a.spec;
            let scope = ast.parent(id).unwrap_or(ast.root());
            reserve_type(ast, spec, scope, offset, descriptors)?;
        }
        NodeKind::Op(op) => {
            let ret = op.ret;
            let raises = op.raises.clone();
            let scope = ast.parent(id).unwrap_or(ast.root());
            reserve_type(ast, ret, scope, offset, descriptors)?;
            for param in ast.children_of(id) {
                if matches!(ast.node(param).kind, NodeKind::Param(_)) {
                    reserve_type(ast, param, id, offset, descriptors)?;
                }
            }
            for raise in raises {
                reserve_type(ast, raise, scope, offset, descriptors)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// The normalization loop with descriptor reservation: arrays are assigned
/// in passing and processing continues with their element type; the
/// terminal node is reserved according to its variant.
fn reserve_type(
    ast: &mut Ast,
    node: NodeId,
    scope: NodeId,
    offset: &mut u32,
    descriptors: &mut Vec<(NodeId, NodeId)>,
) -> Result<()> {
    let mut node = node;
    let mut scope = scope;
    let mut depth = 0;
    loop {
        if depth == MAX_TYPE_DEPTH {
            return Err(Error::layout(
                LayoutKind::RecursiveType,
                ast.node(node).loc,
                ast.qualified_name(node),
            ));
        }
        depth += 1;
        match &ast.node(node).kind {
            NodeKind::Array(a) => {
                if ast.offset(node) != 0 {
                    return Ok(());
                }
                let element = a.spec;
                let dims = u32::try_from(a.dims.len()).unwrap();
                ast.set_offset(node, *offset);
                *offset += ent::Array::size(dims);
                scope = ast.parent(node).unwrap_or(scope);
                descriptors.push((node, scope));
                node = element;
            }
            NodeKind::Member(m) => {
                let spec = m.spec;
                scope = ast.parent(node).unwrap_or(scope);
                node = spec;
            }
            NodeKind::Param(p) => {
                let spec = p.spec;
                scope = ast.parent(node).unwrap_or(scope);
                node = spec;
            }
            NodeKind::ScopedName(path) => {
                let loc = ast.node(node).loc;
                node = resolve(ast, &path.clone(), scope, loc)?;
            }
            _ => break,
        }
    }

    if ast.offset(node) != 0 {
        return Ok(());
    }
    match &ast.node(node).kind {
        NodeKind::Sequence(s) => {
            let element = s.spec;
            ast.set_offset(node, *offset);
            *offset += ent::Sequence::SIZE;
            descriptors.push((node, scope));
            reserve_type(ast, element, scope, offset, descriptors)
        }
        NodeKind::Struct | NodeKind::Except => {
            let members =
                u32::try_from(ast.node(node).children.len()).unwrap();
            ast.set_offset(node, *offset);
            *offset += ent::Structure::size(members);
            descriptors.push((node, scope));
            for member in ast.children_of(node) {
                reserve_type(ast, member, node, offset, descriptors)?;
            }
            Ok(())
        }
        NodeKind::Enum => {
            // reachable only through an import; local enums are entities
            let members =
                u32::try_from(ast.node(node).children.len()).unwrap();
            ast.set_offset(node, *offset);
            *offset += ent::Enum::size(members);
            descriptors.push((node, scope));
            Ok(())
        }
        NodeKind::Interface(i) => {
            if ast.in_tu(node) {
                // a rank-1 interface without an entity offset can only be
                // an undefined forward declaration
                debug_assert!(i.forward);
                return Err(Error::layout(
                    LayoutKind::UnexpectedForwardDecl,
                    ast.node(node).loc,
                    ast.qualified_name(node),
                ));
            }
            ast.set_offset(node, *offset);
            *offset += ent::Interface::FIXED;
            descriptors.push((node, scope));
            Ok(())
        }
        NodeKind::Type => Ok(()),
        _ => Err(Error::resolve(
            ResolveKind::NotAType,
            ast.node(node).loc,
            ast.qualified_name(node),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::tree::{self, Specification};
    use crate::ent::Header;
    use crate::error::ErrorKind;

    fn planned(json: &str) -> (Ast, Layout) {
        let spec: Specification = serde_json::from_str(json).unwrap();
        let mut ast = tree::lower(&spec);
        let layout = plan(&mut ast).unwrap();
        (ast, layout)
    }

    #[test]
    fn empty_module_layout() {
        let (ast, layout) = planned(
            r#"{ "declarations": [
                { "kind": "module", "name": "M" }
            ] }"#,
        );
        let module = ast.node(ast.root()).children[0];
        assert_eq!(ast.offset(module), Header::SIZE);
        assert_eq!(layout.entity_end, 36);
        assert_eq!(layout.strings.offset_of("M"), 36);
        assert_eq!(layout.string_end, 38);
        assert_eq!(layout.file_size, 40);
    }

    #[test]
    fn attribute_reserves_getter_and_setter() {
        let (ast, _) = planned(
            r#"{ "declarations": [
                { "kind": "interface", "name": "I", "members": [
                    { "kind": "attribute", "name": "x", "type": "long" },
                    { "kind": "operation", "name": "f", "ret": "long" }
                ] }
            ] }"#,
        );
        let interface = ast.node(ast.root()).children[0];
        let attr = ast.node(interface).children[0];
        let op = ast.node(interface).children[1];
        // interface record: 52 fixed + 3 method slots
        assert_eq!(ast.offset(interface), 16);
        assert_eq!(ast.offset(attr), 16 + 52 + 12);
        // getter (20) + setter (32) precede the operation
        assert_eq!(ast.offset(op), ast.offset(attr) + 20 + 32);
    }

    #[test]
    fn descriptors_are_reserved_once_in_reach_order() {
        let (ast, layout) = planned(
            r#"{ "declarations": [
                { "kind": "struct", "name": "P", "members": [
                    { "name": "a", "type": "long" } ] },
                { "kind": "typedef", "name": "PS",
                  "type": { "sequence": "P" } },
                { "kind": "interface", "name": "I", "members": [
                    { "kind": "operation", "name": "f", "ret": "PS",
                      "params": [ { "name": "x", "type": "PS" },
                                  { "name": "y", "type": "P" } ] }
                ] }
            ] }"#,
        );
        // one sequence + one structure, each reserved exactly once
        assert_eq!(layout.descriptors.len(), 2);
        let (seq, _) = layout.descriptors[0];
        let (st, _) = layout.descriptors[1];
        assert!(matches!(ast.node(seq).kind, NodeKind::Sequence(_)));
        assert!(matches!(ast.node(st).kind, NodeKind::Struct));
        assert_eq!(ast.offset(seq), align4(layout.const_end));
        assert_eq!(ast.offset(st), ast.offset(seq) + ent::Sequence::SIZE);
        assert_eq!(
            layout.file_size,
            ast.offset(st) + ent::Structure::size(1)
        );
    }

    #[test]
    fn spill_offsets_are_eight_byte_aligned() {
        let (ast, layout) = planned(
            r#"{ "declarations": [
                { "kind": "module", "name": "M", "declarations": [
                    { "kind": "const", "name": "big", "type": "long long",
                      "value": 72623859790382856 }
                ] }
            ] }"#,
        );
        let module = ast.node(ast.root()).children[0];
        let c = ast.node(module).children[0];
        let NodeKind::Const(data) = &ast.node(c).kind else { panic!() };
        assert_eq!(data.value_offset % 8, 0);
        assert!(data.value_offset >= layout.string_end);
        assert_eq!(layout.const_end, data.value_offset + 8);
        // the constant record itself sits in the module tail
        assert_eq!(ast.offset(c), ast.offset(module) + 20);
    }

    #[test]
    fn undefined_forward_interface_as_type_fails() {
        let spec: Specification = serde_json::from_str(
            r#"{ "declarations": [
                { "kind": "interface", "name": "F", "forward": true },
                { "kind": "interface", "name": "I", "members": [
                    { "kind": "attribute", "name": "f", "type": "F" }
                ] }
            ] }"#,
        )
        .unwrap();
        let mut ast = tree::lower(&spec);
        let err = plan(&mut ast).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Layout(LayoutKind::UnexpectedForwardDecl)
        );
    }

    #[test]
    fn size_equation_holds() {
        let (_, layout) = planned(
            r#"{ "declarations": [
                { "kind": "module", "name": "M", "declarations": [
                    { "kind": "struct", "name": "P", "members": [
                        { "name": "a", "type": "long" } ] },
                    { "kind": "interface", "name": "I", "members": [
                        { "kind": "operation", "name": "f", "ret": "P" }
                    ] }
                ] }
            ] }"#,
        );
        let entity = layout.entity_end - Header::SIZE;
        let strings = layout.string_end - layout.entity_end;
        let consts = align4(layout.const_end) - align4(layout.string_end);
        let types = layout.file_size - align4(layout.const_end);
        assert_eq!(
            Header::SIZE + entity + strings + consts + types
                + (align4(layout.string_end) - layout.string_end),
            layout.file_size
        );
    }
}
