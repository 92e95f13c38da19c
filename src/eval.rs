//! Constant-expression evaluation under a typed target. Integer targets
//! wrap at their own width (never trap); floats follow host IEEE
//! semantics. Scoped references re-evaluate the referenced constant's
//! expression under the current target, depth-bounded to reject reference
//! cycles.

use num_traits::{
    CheckedRem, Float, PrimInt, WrappingAdd, WrappingMul, WrappingNeg,
    WrappingShl, WrappingShr, WrappingSub,
};

use crate::ast::{Ast, BinaryOp, Expr, NodeId, NodeKind, UnaryOp};
use crate::error::{Error, EvalKind, Result};
use crate::resolve::resolve;

/// Bound on chained constant references.
const MAX_CONST_DEPTH: usize = 64;

/// An integer evaluation target. Implemented for the eight fixed-width
/// integer types; `truncate` reduces a wide literal modulo the target
/// width, exactly like an `as` cast.
pub trait IntTarget:
    PrimInt
    + WrappingAdd
    + WrappingSub
    + WrappingMul
    + WrappingNeg
    + WrappingShl
    + WrappingShr
    + CheckedRem
{
    fn truncate(value: i128) -> Self;
}

macro_rules! impl_int_target {
    ($($ty:ty),* $(,)?) => {$(
        impl IntTarget for $ty {
            fn truncate(value: i128) -> Self {
                value as $ty
            }
        }
    )*};
}

impl_int_target!(i8, i16, i32, i64, u8, u16, u32, u64);

/// Evaluate an integer constant expression. `owner` names the declaring
/// node in diagnostics.
pub fn eval_int<T: IntTarget>(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
) -> Result<T> {
    eval_int_at(ast, expr, scope, owner, 0)
}

fn eval_int_at<T: IntTarget>(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
    depth: usize,
) -> Result<T> {
    if depth > MAX_CONST_DEPTH {
        return Err(bad(ast, owner, EvalKind::BadExpression));
    }
    match expr {
        Expr::Int(v) => Ok(T::truncate(*v)),
        Expr::Bool(true) => Ok(T::one()),
        Expr::Bool(false) => Ok(T::zero()),
        Expr::Char(c) => Ok(T::truncate(*c as i128)),
        Expr::Float(_) | Expr::Str(_) => {
            Err(bad(ast, owner, EvalKind::BadExpression))
        }
        Expr::Name(path) => {
            let (expr, scope) = const_target(ast, path, scope, owner)?;
            eval_int_at(ast, expr, scope, owner, depth + 1)
        }
        Expr::Unary(op, operand) => {
            let v: T = eval_int_at(ast, operand, scope, owner, depth)?;
            Ok(match op {
                UnaryOp::Plus => v,
                UnaryOp::Minus => v.wrapping_neg(),
                UnaryOp::Not => !v,
            })
        }
        Expr::Binary(op, lhs, rhs) => {
            let a: T = eval_int_at(ast, lhs, scope, owner, depth)?;
            let b: T = eval_int_at(ast, rhs, scope, owner, depth)?;
            match op {
                BinaryOp::Or => Ok(a | b),
                BinaryOp::Xor => Ok(a ^ b),
                BinaryOp::And => Ok(a & b),
                BinaryOp::Add => Ok(a.wrapping_add(&b)),
                BinaryOp::Sub => Ok(a.wrapping_sub(&b)),
                BinaryOp::Mul => Ok(a.wrapping_mul(&b)),
                BinaryOp::Div => {
                    if b.is_zero() {
                        return Err(bad(ast, owner, EvalKind::DivZero));
                    }
                    a.checked_div(&b)
                        .ok_or_else(|| bad(ast, owner, EvalKind::Overflow))
                }
                BinaryOp::Rem => {
                    if b.is_zero() {
                        return Err(bad(ast, owner, EvalKind::DivZero));
                    }
                    a.checked_rem(&b)
                        .ok_or_else(|| bad(ast, owner, EvalKind::Overflow))
                }
                BinaryOp::Shl => {
                    let count = b.to_u32().ok_or_else(|| {
                        bad(ast, owner, EvalKind::BadExpression)
                    })?;
                    Ok(a.wrapping_shl(count))
                }
                BinaryOp::Shr => {
                    let count = b.to_u32().ok_or_else(|| {
                        bad(ast, owner, EvalKind::BadExpression)
                    })?;
                    Ok(a.wrapping_shr(count))
                }
            }
        }
    }
}

/// Evaluate a floating-point constant expression under host IEEE
/// semantics; division by zero yields an infinity, not an error.
pub fn eval_float<T: Float>(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
) -> Result<T> {
    eval_float_at(ast, expr, scope, owner, 0)
}

fn eval_float_at<T: Float>(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
    depth: usize,
) -> Result<T> {
    if depth > MAX_CONST_DEPTH {
        return Err(bad(ast, owner, EvalKind::BadExpression));
    }
    let cast_err = || bad(ast, owner, EvalKind::BadExpression);
    match expr {
        Expr::Int(v) => T::from(*v).ok_or_else(cast_err),
        Expr::Float(v) => T::from(*v).ok_or_else(cast_err),
        Expr::Bool(_) | Expr::Char(_) | Expr::Str(_) => Err(cast_err()),
        Expr::Name(path) => {
            let (expr, scope) = const_target(ast, path, scope, owner)?;
            eval_float_at(ast, expr, scope, owner, depth + 1)
        }
        Expr::Unary(op, operand) => {
            let v: T = eval_float_at(ast, operand, scope, owner, depth)?;
            match op {
                UnaryOp::Plus => Ok(v),
                UnaryOp::Minus => Ok(-v),
                UnaryOp::Not => Err(cast_err()),
            }
        }
        Expr::Binary(op, lhs, rhs) => {
            let a: T = eval_float_at(ast, lhs, scope, owner, depth)?;
            let b: T = eval_float_at(ast, rhs, scope, owner, depth)?;
            match op {
                BinaryOp::Add => Ok(a + b),
                BinaryOp::Sub => Ok(a - b),
                BinaryOp::Mul => Ok(a * b),
                BinaryOp::Div => Ok(a / b),
                BinaryOp::Rem => Ok(a % b),
                _ => Err(cast_err()),
            }
        }
    }
}

/// Evaluate a narrow string constant.
pub fn eval_str(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
) -> Result<String> {
    eval_str_at(ast, expr, scope, owner, 0)
}

fn eval_str_at(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
    depth: usize,
) -> Result<String> {
    if depth > MAX_CONST_DEPTH {
        return Err(bad(ast, owner, EvalKind::BadExpression));
    }
    match expr {
        Expr::Str(s) => Ok(s.clone()),
        Expr::Name(path) => {
            let (expr, scope) = const_target(ast, path, scope, owner)?;
            eval_str_at(ast, expr, scope, owner, depth + 1)
        }
        _ => Err(bad(ast, owner, EvalKind::BadExpression)),
    }
}

/// Evaluate a character constant; wide characters use the same code-point
/// evaluation.
pub fn eval_char(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
) -> Result<char> {
    eval_char_at(ast, expr, scope, owner, 0)
}

fn eval_char_at(
    ast: &Ast,
    expr: &Expr,
    scope: NodeId,
    owner: NodeId,
    depth: usize,
) -> Result<char> {
    if depth > MAX_CONST_DEPTH {
        return Err(bad(ast, owner, EvalKind::BadExpression));
    }
    match expr {
        Expr::Char(c) => Ok(*c),
        Expr::Name(path) => {
            let (expr, scope) = const_target(ast, path, scope, owner)?;
            eval_char_at(ast, expr, scope, owner, depth + 1)
        }
        _ => Err(bad(ast, owner, EvalKind::BadExpression)),
    }
}

/// Resolve a scoped reference to the constant it names; anything but a
/// constant declaration is a bad expression.
fn const_target<'a>(
    ast: &'a Ast,
    path: &[String],
    scope: NodeId,
    owner: NodeId,
) -> Result<(&'a Expr, NodeId)> {
    let target = resolve(ast, path, scope, ast.node(owner).loc)
        .map_err(|_| bad(ast, owner, EvalKind::BadExpression))?;
    match &ast.node(target).kind {
        NodeKind::Const(c) => {
            Ok((&c.expr, ast.parent(target).unwrap_or(scope)))
        }
        _ => Err(bad(ast, owner, EvalKind::BadExpression)),
    }
}

fn bad(ast: &Ast, owner: NodeId, kind: EvalKind) -> Error {
    Error::eval(kind, ast.node(owner).loc, ast.qualified_name(owner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::tree::{self, Specification};
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn ctx() -> (Ast, NodeId) {
        let ast = Ast::new("");
        let root = ast.root();
        (ast, root)
    }

    fn bin(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
        Expr::Binary(op, Box::new(lhs), Box::new(rhs))
    }

    #[rstest]
    #[case(bin(BinaryOp::Add, Expr::Int(200), Expr::Int(100)), 44u8)]
    #[case(bin(BinaryOp::Mul, Expr::Int(16), Expr::Int(17)), 16u8)]
    #[case(bin(BinaryOp::Shl, Expr::Int(1), Expr::Int(9)), 2u8)]
    fn integer_arithmetic_wraps_at_target_width(
        #[case] expr: Expr,
        #[case] expected: u8,
    ) {
        let (ast, root) = ctx();
        assert_eq!(
            eval_int::<u8>(&ast, &expr, root, root).unwrap(),
            expected
        );
    }

    #[test]
    fn division_sees_wrapped_operands() {
        let (ast, root) = ctx();
        let expr = bin(
            BinaryOp::Div,
            bin(BinaryOp::Add, Expr::Int(200), Expr::Int(100)),
            Expr::Int(2),
        );
        // (200 + 100) wraps to 44 before the division
        assert_eq!(eval_int::<u8>(&ast, &expr, root, root).unwrap(), 22u8);
        assert_eq!(
            eval_int::<u32>(&ast, &expr, root, root).unwrap(),
            150u32
        );
    }

    #[test]
    fn division_by_zero() {
        let (ast, root) = ctx();
        let expr = bin(BinaryOp::Div, Expr::Int(1), Expr::Int(0));
        let err = eval_int::<i32>(&ast, &expr, root, root).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval(EvalKind::DivZero));

        let expr = bin(BinaryOp::Rem, Expr::Int(1), Expr::Int(0));
        let err = eval_int::<i32>(&ast, &expr, root, root).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval(EvalKind::DivZero));
    }

    #[test]
    fn division_overflow() {
        let (ast, root) = ctx();
        let expr = bin(
            BinaryOp::Div,
            Expr::Int(i128::from(i32::MIN)),
            Expr::Int(-1),
        );
        let err = eval_int::<i32>(&ast, &expr, root, root).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval(EvalKind::Overflow));
    }

    #[test]
    fn signed_truncation_matches_cast_semantics() {
        let (ast, root) = ctx();
        let expr = Expr::Int(-1);
        assert_eq!(
            eval_int::<u16>(&ast, &expr, root, root).unwrap(),
            0xffffu16
        );
        assert_eq!(eval_int::<i16>(&ast, &expr, root, root).unwrap(), -1i16);
    }

    #[test]
    fn float_division_by_zero_is_ieee() {
        let (ast, root) = ctx();
        let expr = bin(BinaryOp::Div, Expr::Float(1.0), Expr::Float(0.0));
        let v: f64 = eval_float(&ast, &expr, root, root).unwrap();
        assert!(v.is_infinite());
    }

    #[test]
    fn ill_typed_operands_are_rejected() {
        let (ast, root) = ctx();
        let expr = Expr::Str("nope".into());
        let err = eval_int::<i32>(&ast, &expr, root, root).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval(EvalKind::BadExpression));

        let expr = Expr::Unary(UnaryOp::Not, Box::new(Expr::Float(1.0)));
        let err = eval_float::<f64>(&ast, &expr, root, root).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval(EvalKind::BadExpression));
    }

    #[test]
    fn constant_references_evaluate_in_their_own_scope() {
        let json = r#"{ "declarations": [
            { "kind": "module", "name": "M", "declarations": [
                { "kind": "const", "name": "A", "type": "long", "value": 6 },
                { "kind": "const", "name": "B", "type": "long",
                  "value": { "op": "mul", "lhs": "A", "rhs": 7 } }
            ] }
        ] }"#;
        let spec: Specification = serde_json::from_str(json).unwrap();
        let ast = tree::lower(&spec);
        let module = ast.node(ast.root()).children[0];
        let b = ast.node(module).children[1];
        let NodeKind::Const(c) = &ast.node(b).kind else { panic!() };
        assert_eq!(
            eval_int::<i32>(&ast, &c.expr, module, b).unwrap(),
            42i32
        );
    }

    #[test]
    fn constant_reference_cycles_are_rejected() {
        let json = r#"{ "declarations": [
            { "kind": "const", "name": "A", "type": "long", "value": "B" },
            { "kind": "const", "name": "B", "type": "long", "value": "A" }
        ] }"#;
        let spec: Specification = serde_json::from_str(json).unwrap();
        let ast = tree::lower(&spec);
        let root = ast.root();
        let a = ast.node(root).children[0];
        let NodeKind::Const(c) = &ast.node(a).kind else { panic!() };
        let err = eval_int::<i32>(&ast, &c.expr, root, a).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Eval(EvalKind::BadExpression));
    }
}
