//! Lexical scoped-name resolution and the type-normalization loop shared
//! by the layout planner and the emitter. Factoring the loop once is what
//! guarantees the two passes agree bit-for-bit on every `Spec`.

use crate::ast::{Ast, Loc, NodeId, NodeKind};
use crate::error::{Error, LayoutKind, ResolveKind, Result};

/// Bound on typedef chains; exceeding it means the chain is cyclic.
pub const MAX_TYPE_DEPTH: usize = 64;

/// Resolve a scoped name starting from `scope` and walking outward through
/// the enclosing scopes. Imported (rank > 1) subtrees are searched like any
/// other; a forward-declared interface never satisfies an intermediate
/// path segment, and a definition wins over a forward declaration of the
/// same name.
pub fn resolve(
    ast: &Ast,
    path: &[String],
    scope: NodeId,
    loc: Loc,
) -> Result<NodeId> {
    let mut cursor = Some(scope);
    while let Some(s) = cursor {
        if let Some(found) = lookup(ast, s, path) {
            return Ok(found);
        }
        cursor = ast.parent(s);
    }
    Err(Error::resolve(ResolveKind::Unknown, loc, path.join(".")))
}

fn lookup(ast: &Ast, scope: NodeId, path: &[String]) -> Option<NodeId> {
    let mut cursor = scope;
    for (i, segment) in path.iter().enumerate() {
        cursor = named_child(ast, cursor, segment)?;
        if i + 1 < path.len() && is_forward(ast, cursor) {
            return None;
        }
    }
    Some(cursor)
}

fn named_child(ast: &Ast, scope: NodeId, name: &str) -> Option<NodeId> {
    let mut forward = None;
    for &child in &ast.node(scope).children {
        if ast.node(child).name != name {
            continue;
        }
        if is_forward(ast, child) {
            forward.get_or_insert(child);
        } else {
            return Some(child);
        }
    }
    forward
}

fn is_forward(ast: &Ast, id: NodeId) -> bool {
    matches!(&ast.node(id).kind, NodeKind::Interface(i) if i.forward)
}

/// Peel type layers until a terminal node remains: members, params and
/// attributes step to their declared type (the declarer's parent becomes
/// the scope), scoped names resolve, arrays stop the loop because they own
/// their descriptor offset. Returns the terminal node and the scope it was
/// reached in.
pub fn normalize(
    ast: &Ast,
    node: NodeId,
    scope: NodeId,
) -> Result<(NodeId, NodeId)> {
    let mut node = node;
    let mut scope = scope;
    for _ in 0..MAX_TYPE_DEPTH {
        match &ast.node(node).kind {
            NodeKind::Array(_) => return Ok((node, scope)),
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
            NodeKind::Attribute(a) => {
                let spec = a.spec;
                scope = ast.parent(node).unwrap_or(scope);
                node = spec;
            }
            NodeKind::ScopedName(path) => {
                node = resolve(ast, path, scope, ast.node(node).loc)?;
            }
            _ => return Ok((node, scope)),
        }
    }
    Err(Error::layout(
        LayoutKind::RecursiveType,
        ast.node(node).loc,
        ast.qualified_name(node),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::tree::{self, Specification};
    use crate::error::ErrorKind;

    fn build(json: &str) -> Ast {
        let spec: Specification = serde_json::from_str(json).unwrap();
        tree::lower(&spec)
    }

    #[test]
    fn resolves_outward_through_enclosing_scopes() {
        let ast = build(
            r#"{ "declarations": [
                { "kind": "module", "name": "A", "declarations": [
                    { "kind": "struct", "name": "S", "members": [
                        { "name": "v", "type": "long" } ] },
                    { "kind": "module", "name": "B", "declarations": [
                        { "kind": "struct", "name": "T", "members": [
                            { "name": "s", "type": "S" } ] }
                    ] }
                ] }
            ] }"#,
        );
        let a = ast.node(ast.root()).children[0];
        let s = ast.node(a).children[0];
        let b = ast.node(a).children[1];
        let t = ast.node(b).children[0];

        let path = vec!["S".to_owned()];
        assert_eq!(resolve(&ast, &path, t, Default::default()).unwrap(), s);

        let dotted = vec!["A".to_owned(), "S".to_owned()];
        assert_eq!(
            resolve(&ast, &dotted, t, Default::default()).unwrap(),
            s
        );

        let missing = vec!["Nope".to_owned()];
        let err = resolve(&ast, &missing, t, Default::default()).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Resolve(ResolveKind::Unknown));
    }

    #[test]
    fn definition_wins_over_forward_declaration() {
        let ast = build(
            r#"{ "declarations": [
                { "kind": "interface", "name": "I", "forward": true },
                { "kind": "interface", "name": "I" }
            ] }"#,
        );
        let root = ast.root();
        let defined = ast.node(root).children[1];
        let path = vec!["I".to_owned()];
        assert_eq!(
            resolve(&ast, &path, root, Default::default()).unwrap(),
            defined
        );
    }

    #[test]
    fn normalize_follows_typedef_chains() {
        let ast = build(
            r#"{ "declarations": [
                { "kind": "struct", "name": "P", "members": [
                    { "name": "a", "type": "long" } ] },
                { "kind": "typedef", "name": "P1", "type": "P" },
                { "kind": "typedef", "name": "P2", "type": "P1" },
                { "kind": "struct", "name": "Q", "members": [
                    { "name": "p", "type": "P2" } ] }
            ] }"#,
        );
        let root = ast.root();
        let p = ast.node(root).children[0];
        let q = ast.node(root).children[3];
        let member = ast.node(q).children[0];
        let (terminal, _) = normalize(&ast, member, q).unwrap();
        assert_eq!(terminal, p);
    }

    #[test]
    fn typedef_cycle_is_a_recursive_type() {
        let ast = build(
            r#"{ "declarations": [
                { "kind": "typedef", "name": "A", "type": "B" },
                { "kind": "typedef", "name": "B", "type": "A" },
                { "kind": "struct", "name": "S", "members": [
                    { "name": "a", "type": "A" } ] }
            ] }"#,
        );
        let root = ast.root();
        let s = ast.node(root).children[2];
        let member = ast.node(s).children[0];
        let err = normalize(&ast, member, s).unwrap_err();
        assert_eq!(
            err.kind,
            ErrorKind::Layout(LayoutKind::RecursiveType)
        );
    }
}
