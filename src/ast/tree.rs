//! The serde form of the parsed IDL tree the front end hands us, and its
//! lowering into the flat [`Ast`](crate::ast::Ast) arena.
//!
//! Scoped names are written with `::` or `.` separators; IIDs are
//! UUID-format hex strings; `rank` defaults to 1 (declared in the current
//! translation unit).

use serde::{Deserialize, Serialize};

use crate::ast::{
    ArrayData, Ast, AttributeData, BinaryOp, ConstData, Expr, InterfaceData,
    Loc, MemberData, Node, NodeId, NodeKind, OpData, ParamData, ParamDir,
    SequenceData, UnaryOp,
};
use crate::ent::Primitive;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Specification {
    /// IDL source file name, used to prefix diagnostics.
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub declarations: Vec<Decl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decl {
    Module(ModuleDecl),
    Interface(InterfaceDecl),
    Enum(EnumDecl),
    Struct(AggregateDecl),
    Exception(AggregateDecl),
    Typedef(TypedefDecl),
    Const(ConstDecl),
    Attribute(AttributeDecl),
    Operation(OperationDecl),
}

fn default_rank() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleDecl {
    pub name: String,
    #[serde(default = "default_rank")]
    pub rank: u32,
    #[serde(default)]
    pub loc: Loc,
    #[serde(default)]
    pub declarations: Vec<Decl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDecl {
    pub name: String,
    #[serde(
        default,
        deserialize_with = "iid_from_str",
        serialize_with = "iid_to_str"
    )]
    pub iid: [u8; 16],
    #[serde(default)]
    pub extends: Vec<String>,
    #[serde(default)]
    pub forward: bool,
    #[serde(default = "default_rank")]
    pub rank: u32,
    #[serde(default)]
    pub loc: Loc,
    #[serde(default)]
    pub members: Vec<Decl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDecl {
    pub name: String,
    #[serde(default = "default_rank")]
    pub rank: u32,
    #[serde(default)]
    pub loc: Loc,
    pub members: Vec<String>,
}

/// Struct or exception body: named fields in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateDecl {
    pub name: String,
    #[serde(default = "default_rank")]
    pub rank: u32,
    #[serde(default)]
    pub loc: Loc,
    #[serde(default)]
    pub members: Vec<FieldDecl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    /// Array declarator dimensions; empty for plain members.
    #[serde(default)]
    pub dims: Vec<ExprTree>,
    #[serde(default)]
    pub loc: Loc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TypedefDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub dims: Vec<ExprTree>,
    #[serde(default = "default_rank")]
    pub rank: u32,
    #[serde(default)]
    pub loc: Loc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    pub value: ExprTree,
    #[serde(default)]
    pub loc: Loc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttributeDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub readonly: bool,
    #[serde(default)]
    pub loc: Loc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationDecl {
    pub name: String,
    #[serde(default = "default_ret")]
    pub ret: TypeRef,
    #[serde(default)]
    pub params: Vec<ParamDecl>,
    #[serde(default)]
    pub raises: Vec<String>,
    #[serde(default)]
    pub loc: Loc,
}

fn default_ret() -> TypeRef {
    TypeRef::Name("void".into())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamDecl {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: TypeRef,
    #[serde(default)]
    pub dir: Direction,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    In,
    Out,
    InOut,
}

/// A type reference: a canonical primitive name, a scoped name, or an
/// anonymous sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TypeRef {
    Name(String),
    Sequence(SequenceRef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRef {
    pub sequence: Box<TypeRef>,
    #[serde(default)]
    pub max: Option<ExprTree>,
}

/// Constant-expression tree. A bare JSON string is a scoped reference to
/// another constant; string literals are spelled `{"str": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExprTree {
    Bool(bool),
    Int(i128),
    Float(f64),
    Ref(String),
    Str { str: String },
    Char { chr: char },
    Unary { op: UnaryTag, operand: Box<ExprTree> },
    Binary { op: BinaryTag, lhs: Box<ExprTree>, rhs: Box<ExprTree> },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryTag {
    Plus,
    Minus,
    Not,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryTag {
    Or,
    Xor,
    And,
    Shl,
    Shr,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

fn iid_from_str<'de, D>(deserializer: D) -> Result<[u8; 16], D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct Visitor;
    impl serde::de::Visitor<'_> for Visitor {
        type Value = [u8; 16];

        fn expecting(
            &self,
            formatter: &mut std::fmt::Formatter,
        ) -> std::fmt::Result {
            write!(formatter, "32 hex digits, hyphens allowed")
        }

        fn visit_str<E: serde::de::Error>(
            self,
            v: &str,
        ) -> Result<Self::Value, E> {
            let mut iid = [0u8; 16];
            let mut nibbles = 0usize;
            for c in v.chars() {
                if c == '-' {
                    continue;
                }
                let digit = c.to_digit(16).ok_or_else(|| {
                    E::invalid_value(serde::de::Unexpected::Str(v), &self)
                })?;
                if nibbles == 32 {
                    return Err(E::invalid_length(nibbles + 1, &self));
                }
                iid[nibbles / 2] |= (digit as u8) << (4 * (1 - nibbles % 2));
                nibbles += 1;
            }
            if nibbles != 32 {
                return Err(E::invalid_length(nibbles, &self));
            }
            Ok(iid)
        }
    }
    deserializer.deserialize_str(Visitor)
}

fn iid_to_str<S>(iid: &[u8; 16], serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    let hex: String = iid.iter().map(|b| format!("{b:02x}")).collect();
    serializer.collect_str(&format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    ))
}

/// Split a scoped name on `::` or `.`.
fn split_path(name: &str) -> Vec<String> {
    name.split("::")
        .flat_map(|s| s.split('.'))
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Flatten the interchange tree into the arena the passes run over.
pub fn lower(tree: &Specification) -> Ast {
    let mut ast = Ast::new(tree.source.clone());
    let root = ast.root();
    for decl in &tree.declarations {
        lower_decl(&mut ast, root, 1, decl);
    }
    ast
}

fn new_node(name: &str, rank: u32, parent: NodeId, loc: Loc, kind: NodeKind) -> Node {
    Node {
        name: name.to_owned(),
        rank,
        parent: Some(parent),
        children: Vec::new(),
        loc,
        offset: 0,
        kind,
    }
}

fn lower_decl(ast: &mut Ast, parent: NodeId, rank: u32, decl: &Decl) {
    match decl {
        Decl::Module(m) => {
            let rank = m.rank.max(rank);
            let id = ast.alloc(new_node(
                &m.name,
                rank,
                parent,
                m.loc,
                NodeKind::Module,
            ));
            ast.attach(parent, id);
            for child in &m.declarations {
                lower_decl(ast, id, rank, child);
            }
        }
        Decl::Interface(i) => {
            let rank = i.rank.max(rank);
            let extends =
                i.extends.iter().map(|e| split_path(e)).collect();
            let id = ast.alloc(new_node(
                &i.name,
                rank,
                parent,
                i.loc,
                NodeKind::Interface(InterfaceData {
                    iid: i.iid,
                    extends,
                    forward: i.forward,
                }),
            ));
            ast.attach(parent, id);
            for child in &i.members {
                lower_decl(ast, id, rank, child);
            }
        }
        Decl::Enum(e) => {
            let rank = e.rank.max(rank);
            let id = ast.alloc(new_node(
                &e.name,
                rank,
                parent,
                e.loc,
                NodeKind::Enum,
            ));
            ast.attach(parent, id);
            for member in &e.members {
                let m = ast.alloc(new_node(
                    member,
                    rank,
                    id,
                    e.loc,
                    NodeKind::EnumMember,
                ));
                ast.attach(id, m);
            }
        }
        Decl::Struct(s) => lower_aggregate(ast, parent, rank, s, false),
        Decl::Exception(s) => lower_aggregate(ast, parent, rank, s, true),
        Decl::Typedef(t) => {
            let rank = t.rank.max(rank);
            lower_declarator(ast, parent, rank, &t.name, &t.ty, &t.dims, t.loc);
        }
        Decl::Const(c) => {
            let id = ast.alloc(new_node(
                &c.name,
                rank,
                parent,
                c.loc,
                NodeKind::Const(ConstData {
                    ty: NodeId::PLACEHOLDER,
                    expr: lower_expr(&c.value),
                    value_offset: 0,
                }),
            ));
            ast.attach(parent, id);
            let ty = lower_type(ast, id, rank, &c.ty, c.loc);
            match &mut ast.node_mut(id).kind {
                NodeKind::Const(data) => data.ty = ty,
                _ => unreachable!(),
            }
        }
        Decl::Attribute(a) => {
            let id = ast.alloc(new_node(
                &a.name,
                rank,
                parent,
                a.loc,
                NodeKind::Attribute(AttributeData {
                    spec: NodeId::PLACEHOLDER,
                    readonly: a.readonly,
                }),
            ));
            ast.attach(parent, id);
            let spec = lower_type(ast, id, rank, &a.ty, a.loc);
            match &mut ast.node_mut(id).kind {
                NodeKind::Attribute(data) => data.spec = spec,
                _ => unreachable!(),
            }
        }
        Decl::Operation(o) => {
            let id = ast.alloc(new_node(
                &o.name,
                rank,
                parent,
                o.loc,
                NodeKind::Op(OpData {
                    ret: NodeId::PLACEHOLDER,
                    raises: Vec::new(),
                }),
            ));
            ast.attach(parent, id);
            let ret = lower_type(ast, id, rank, &o.ret, o.loc);
            let raises: Vec<NodeId> = o
                .raises
                .iter()
                .map(|r| {
                    ast.alloc(new_node(
                        r,
                        rank,
                        id,
                        o.loc,
                        NodeKind::ScopedName(split_path(r)),
                    ))
                })
                .collect();
            match &mut ast.node_mut(id).kind {
                NodeKind::Op(data) => {
                    data.ret = ret;
                    data.raises = raises;
                }
                _ => unreachable!(),
            }
            for param in &o.params {
                let p = ast.alloc(new_node(
                    &param.name,
                    rank,
                    id,
                    o.loc,
                    NodeKind::Param(ParamData {
                        spec: NodeId::PLACEHOLDER,
                        dir: match param.dir {
                            Direction::In => ParamDir::In,
                            Direction::Out => ParamDir::Out,
                            Direction::InOut => ParamDir::InOut,
                        },
                    }),
                ));
                ast.attach(id, p);
                let spec = lower_type(ast, p, rank, &param.ty, o.loc);
                match &mut ast.node_mut(p).kind {
                    NodeKind::Param(data) => data.spec = spec,
                    _ => unreachable!(),
                }
            }
        }
    }
}

fn lower_aggregate(
    ast: &mut Ast,
    parent: NodeId,
    rank: u32,
    decl: &AggregateDecl,
    except: bool,
) {
    let rank = decl.rank.max(rank);
    let kind = if except { NodeKind::Except } else { NodeKind::Struct };
    let id = ast.alloc(new_node(&decl.name, rank, parent, decl.loc, kind));
    ast.attach(parent, id);
    for field in &decl.members {
        lower_declarator(
            ast, id, rank, &field.name, &field.ty, &field.dims, field.loc,
        );
    }
}

/// A named declarator: a plain member, or an array when dimensions are
/// present. Used for both typedefs and structure/exception fields.
fn lower_declarator(
    ast: &mut Ast,
    parent: NodeId,
    rank: u32,
    name: &str,
    ty: &TypeRef,
    dims: &[ExprTree],
    loc: Loc,
) {
    let kind = if dims.is_empty() {
        NodeKind::Member(MemberData { spec: NodeId::PLACEHOLDER })
    } else {
        NodeKind::Array(ArrayData {
            spec: NodeId::PLACEHOLDER,
            dims: dims.iter().map(lower_expr).collect(),
        })
    };
    let id = ast.alloc(new_node(name, rank, parent, loc, kind));
    ast.attach(parent, id);
    let spec = lower_type(ast, id, rank, ty, loc);
    match &mut ast.node_mut(id).kind {
        NodeKind::Member(data) => data.spec = spec,
        NodeKind::Array(data) => data.spec = spec,
        _ => unreachable!(),
    }
}

fn lower_type(
    ast: &mut Ast,
    parent: NodeId,
    rank: u32,
    ty: &TypeRef,
    loc: Loc,
) -> NodeId {
    match ty {
        TypeRef::Name(name) => {
            let kind = if Primitive::from_canonical_name(name).is_some() {
                NodeKind::Type
            } else {
                NodeKind::ScopedName(split_path(name))
            };
            ast.alloc(new_node(name, rank, parent, loc, kind))
        }
        TypeRef::Sequence(seq) => {
            let id = ast.alloc(new_node(
                "",
                rank,
                parent,
                loc,
                NodeKind::Sequence(SequenceData {
                    spec: NodeId::PLACEHOLDER,
                    max: seq.max.as_ref().map(lower_expr),
                }),
            ));
            let element = lower_type(ast, id, rank, &seq.sequence, loc);
            match &mut ast.node_mut(id).kind {
                NodeKind::Sequence(data) => data.spec = element,
                _ => unreachable!(),
            }
            id
        }
    }
}

fn lower_expr(expr: &ExprTree) -> Expr {
    match expr {
        ExprTree::Bool(v) => Expr::Bool(*v),
        ExprTree::Int(v) => Expr::Int(*v),
        ExprTree::Float(v) => Expr::Float(*v),
        ExprTree::Ref(name) => Expr::Name(split_path(name)),
        ExprTree::Str { str } => Expr::Str(str.clone()),
        ExprTree::Char { chr } => Expr::Char(*chr),
        ExprTree::Unary { op, operand } => {
            let op = match op {
                UnaryTag::Plus => UnaryOp::Plus,
                UnaryTag::Minus => UnaryOp::Minus,
                UnaryTag::Not => UnaryOp::Not,
            };
            Expr::Unary(op, Box::new(lower_expr(operand)))
        }
        ExprTree::Binary { op, lhs, rhs } => {
            let op = match op {
                BinaryTag::Or => BinaryOp::Or,
                BinaryTag::Xor => BinaryOp::Xor,
                BinaryTag::And => BinaryOp::And,
                BinaryTag::Shl => BinaryOp::Shl,
                BinaryTag::Shr => BinaryOp::Shr,
                BinaryTag::Add => BinaryOp::Add,
                BinaryTag::Sub => BinaryOp::Sub,
                BinaryTag::Mul => BinaryOp::Mul,
                BinaryTag::Div => BinaryOp::Div,
                BinaryTag::Rem => BinaryOp::Rem,
            };
            Expr::Binary(
                op,
                Box::new(lower_expr(lhs)),
                Box::new(lower_expr(rhs)),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::NodeKind;

    #[test]
    fn lower_module_tree() {
        let json = r#"{
            "source": "m.idl",
            "declarations": [
                { "kind": "module", "name": "M", "declarations": [
                    { "kind": "const", "name": "K", "type": "long",
                      "value": { "op": "add", "lhs": 1, "rhs": 2 } },
                    { "kind": "interface", "name": "I",
                      "iid": "00112233-4455-6677-8899-aabbccddeeff",
                      "members": [
                        { "kind": "attribute", "name": "x", "type": "long",
                          "readonly": true }
                      ] }
                ] }
            ]
        }"#;
        let tree: Specification = serde_json::from_str(json).unwrap();
        let ast = lower(&tree);
        let root = ast.root();
        assert_eq!(ast.node(root).children.len(), 1);
        let module = ast.node(root).children[0];
        assert!(matches!(ast.node(module).kind, NodeKind::Module));
        assert_eq!(ast.node(module).name, "M");
        assert_eq!(ast.const_count(module), 1);
        assert_eq!(ast.interface_count(module), 1);
        let interface = ast.node(module).children[1];
        match &ast.node(interface).kind {
            NodeKind::Interface(i) => {
                assert_eq!(i.iid[0], 0x00);
                assert_eq!(i.iid[4], 0x44);
                assert_eq!(i.iid[15], 0xff);
                assert!(!i.forward);
            }
            other => panic!("expected interface, got {other:?}"),
        }
        assert_eq!(ast.method_count(interface), 1);
    }

    #[test]
    fn scoped_names_split_on_both_separators() {
        assert_eq!(split_path("A::B.C"), ["A", "B", "C"]);
    }

    #[test]
    fn iid_roundtrip() {
        let json = r#"{ "kind": "interface", "name": "I",
            "iid": "0102030405060708090a0b0c0d0e0f10" }"#;
        let decl: Decl = serde_json::from_str(json).unwrap();
        let Decl::Interface(i) = &decl else { panic!() };
        assert_eq!(i.iid[0], 0x01);
        assert_eq!(i.iid[15], 0x10);
        let out = serde_json::to_string(&decl).unwrap();
        assert!(out.contains("01020304-0506-0708-090a-0b0c0d0e0f10"));
    }
}
