pub mod tree;

use serde::{Deserialize, Serialize};

/// Line/column of a node in the IDL source, as reported by the front end.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
pub struct Loc {
    #[serde(default)]
    pub line: u32,
    #[serde(default)]
    pub column: u32,
}

impl std::fmt::Display for Loc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Index of a node inside an [`Ast`] arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u32);

impl NodeId {
    pub(crate) const PLACEHOLDER: NodeId = NodeId(u32::MAX);

    fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamDir {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    /// Bitwise complement.
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
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

/// A constant expression. Owned by the declaring node; scoped references
/// are resolved against the declarer's scope at evaluation time.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Int(i128),
    Float(f64),
    Bool(bool),
    Char(char),
    Str(String),
    Name(Vec<String>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone)]
pub struct InterfaceData {
    pub iid: [u8; 16],
    /// Scoped-name paths from the extends clause. The image format allows a
    /// single concrete base; more than one entry is a structural error.
    pub extends: Vec<Vec<String>>,
    /// Forward declaration: `interface I;` with no body.
    pub forward: bool,
}

#[derive(Debug, Clone)]
pub struct MemberData {
    pub spec: NodeId,
}

#[derive(Debug, Clone)]
pub struct ArrayData {
    pub spec: NodeId,
    pub dims: Vec<Expr>,
}

#[derive(Debug, Clone)]
pub struct AttributeData {
    pub spec: NodeId,
    pub readonly: bool,
}

#[derive(Debug, Clone)]
pub struct OpData {
    pub ret: NodeId,
    /// ScopedName nodes naming the exceptions this operation raises.
    pub raises: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct ParamData {
    pub spec: NodeId,
    pub dir: ParamDir,
}

#[derive(Debug, Clone)]
pub struct ConstData {
    /// The declared type; normalizes to a primitive `Type` node.
    pub ty: NodeId,
    pub expr: Expr,
    /// Spill offset for values wider than the inline slot, assigned by the
    /// constant offsetter. 0 for inline-encoded constants.
    pub value_offset: u32,
}

#[derive(Debug, Clone)]
pub struct SequenceData {
    pub spec: NodeId,
    pub max: Option<Expr>,
}

/// The closed set of node variants the image builder distinguishes.
///
/// Typedef declarators are `Member` nodes at module scope; the
/// normalization loop peels them exactly like structure members. Array
/// declarators are `Array` nodes in both positions.
#[derive(Debug, Clone)]
pub enum NodeKind {
    Specification,
    Module,
    Interface(InterfaceData),
    Enum,
    EnumMember,
    Struct,
    Except,
    Member(MemberData),
    Array(ArrayData),
    Attribute(AttributeData),
    Op(OpData),
    Param(ParamData),
    Const(ConstData),
    Sequence(SequenceData),
    ScopedName(Vec<String>),
    /// Primitive-type leaf; the canonical name lives in `Node::name`.
    Type,
}

#[derive(Debug, Clone)]
pub struct Node {
    pub name: String,
    /// 1 = defined in the current translation unit, >1 = imported.
    pub rank: u32,
    pub parent: Option<NodeId>,
    /// Structural children in source order. Referenced type nodes
    /// (member/param specs, sequence elements, raises entries) are reached
    /// through the variant data instead.
    pub children: Vec<NodeId>,
    pub loc: Loc,
    /// Image offset; 0 until the layout passes assign it.
    pub offset: u32,
    pub kind: NodeKind,
}

/// A parsed, name-resolved IDL tree flattened into an arena. Built by
/// [`tree::lower`]; the layout passes write each node's offset exactly
/// once and the emitter only reads.
#[derive(Debug, Clone)]
pub struct Ast {
    nodes: Vec<Node>,
    root: NodeId,
    source: String,
}

impl Ast {
    pub fn new(source: impl Into<String>) -> Self {
        let root = Node {
            name: String::new(),
            rank: 1,
            parent: None,
            children: Vec::new(),
            loc: Loc::default(),
            offset: 0,
            kind: NodeKind::Specification,
        };
        Ast {
            nodes: vec![root],
            root: NodeId(0),
            source: source.into(),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Append a node to the arena without attaching it to a child list.
    pub(crate) fn alloc(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).unwrap());
        self.nodes.push(node);
        id
    }

    /// Record `child` as a structural child of `parent`.
    pub(crate) fn attach(&mut self, parent: NodeId, child: NodeId) {
        self.nodes[parent.index()].children.push(child);
    }

    pub fn offset(&self, id: NodeId) -> u32 {
        self.node(id).offset
    }

    pub(crate) fn set_offset(&mut self, id: NodeId, offset: u32) {
        self.node_mut(id).offset = offset;
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).parent
    }

    pub(crate) fn children_of(&self, id: NodeId) -> Vec<NodeId> {
        self.node(id).children.clone()
    }

    pub fn in_tu(&self, id: NodeId) -> bool {
        self.node(id).rank == 1
    }

    /// Child modules that receive an entity record (rank 1).
    pub fn module_count(&self, id: NodeId) -> u32 {
        self.count_children(id, |n| {
            matches!(n.kind, NodeKind::Module) && n.rank == 1
        })
    }

    /// Child interfaces that receive an entity record (rank 1, defined).
    pub fn interface_count(&self, id: NodeId) -> u32 {
        self.count_children(id, |n| {
            matches!(&n.kind, NodeKind::Interface(i) if !i.forward)
                && n.rank == 1
        })
    }

    pub fn const_count(&self, id: NodeId) -> u32 {
        self.count_children(id, |n| matches!(n.kind, NodeKind::Const(_)))
    }

    /// Method-table slots of an interface: one per operation, one per
    /// readonly attribute, two per mutable attribute.
    pub fn method_count(&self, id: NodeId) -> u32 {
        let mut count = 0;
        for &c in &self.node(id).children {
            match &self.node(c).kind {
                NodeKind::Op(_) => count += 1,
                NodeKind::Attribute(a) => {
                    count += if a.readonly { 1 } else { 2 }
                }
                _ => {}
            }
        }
        count
    }

    pub fn param_count(&self, id: NodeId) -> u32 {
        self.count_children(id, |n| matches!(n.kind, NodeKind::Param(_)))
    }

    pub fn raise_count(&self, id: NodeId) -> u32 {
        match &self.node(id).kind {
            NodeKind::Op(op) => u32::try_from(op.raises.len()).unwrap(),
            _ => 0,
        }
    }

    fn count_children(&self, id: NodeId, pred: impl Fn(&Node) -> bool) -> u32 {
        let n = self
            .node(id)
            .children
            .iter()
            .filter(|&&c| pred(self.node(c)))
            .count();
        u32::try_from(n).unwrap()
    }

    /// Every node in the arena, in allocation order.
    pub fn ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        (0..u32::try_from(self.nodes.len()).unwrap()).map(NodeId)
    }

    /// Dotted path of a node for diagnostics.
    pub fn qualified_name(&self, id: NodeId) -> String {
        let mut segments = Vec::new();
        let mut cursor = Some(id);
        while let Some(c) = cursor {
            let node = self.node(c);
            if !node.name.is_empty() {
                segments.push(node.name.as_str());
            }
            cursor = node.parent;
        }
        segments.reverse();
        segments.join(".")
    }
}
