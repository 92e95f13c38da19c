use std::path::Path;

use crate::ast::Loc;

/// Constant-expression evaluation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalKind {
    /// Ill-typed or unresolvable subexpression.
    BadExpression,
    /// Integer division or remainder by zero.
    DivZero,
    /// Integer division overflow (e.g. MIN / -1).
    Overflow,
    /// Constant declared with a non-primitive type.
    BadConstantType,
}

/// Scoped-name resolution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveKind {
    /// No node with that name in any enclosing scope.
    Unknown,
    /// The name resolved to something that is not a type.
    NotAType,
    /// An extends target that is not a single concrete interface.
    NotAnInterface,
}

/// Structural problems discovered while planning the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayoutKind {
    /// A forward-declared interface with no definition was used as a type.
    UnexpectedForwardDecl,
    /// A typedef or inheritance chain that never terminates.
    RecursiveType,
}

/// Output-file failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    OpenFailed,
    WriteShort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Eval(EvalKind),
    Resolve(ResolveKind),
    Layout(LayoutKind),
    Io(IoKind),
}

impl ErrorKind {
    /// Process exit code for the CLI: 1 evaluation, 2 resolution/layout,
    /// 3 I/O.
    pub fn exit_code(&self) -> u8 {
        match self {
            ErrorKind::Eval(_) => 1,
            ErrorKind::Resolve(_) | ErrorKind::Layout(_) => 2,
            ErrorKind::Io(_) => 3,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            ErrorKind::Eval(EvalKind::BadExpression) => {
                "bad constant expression"
            }
            ErrorKind::Eval(EvalKind::DivZero) => "division by zero",
            ErrorKind::Eval(EvalKind::Overflow) => "constant overflow",
            ErrorKind::Eval(EvalKind::BadConstantType) => {
                "invalid constant type"
            }
            ErrorKind::Resolve(ResolveKind::Unknown) => "unknown name",
            ErrorKind::Resolve(ResolveKind::NotAType) => "not a type",
            ErrorKind::Resolve(ResolveKind::NotAnInterface) => {
                "not a single concrete interface"
            }
            ErrorKind::Layout(LayoutKind::UnexpectedForwardDecl) => {
                "undefined forward-declared interface"
            }
            ErrorKind::Layout(LayoutKind::RecursiveType) => "recursive type",
            ErrorKind::Io(IoKind::OpenFailed) => "cannot open output",
            ErrorKind::Io(IoKind::WriteShort) => "short write to output",
        };
        f.write_str(msg)
    }
}

/// A diagnostic naming the offending node and its source position.
#[derive(Debug, thiserror::Error)]
#[error("{loc}: {kind}: {subject}")]
pub struct Error {
    pub kind: ErrorKind,
    pub loc: Loc,
    pub subject: String,
    #[source]
    pub source: Option<std::io::Error>,
}

impl Error {
    pub fn eval(kind: EvalKind, loc: Loc, subject: impl Into<String>) -> Self {
        Error {
            kind: ErrorKind::Eval(kind),
            loc,
            subject: subject.into(),
            source: None,
        }
    }

    pub fn resolve(
        kind: ResolveKind,
        loc: Loc,
        subject: impl Into<String>,
    ) -> Self {
        Error {
            kind: ErrorKind::Resolve(kind),
            loc,
            subject: subject.into(),
            source: None,
        }
    }

    pub fn layout(
        kind: LayoutKind,
        loc: Loc,
        subject: impl Into<String>,
    ) -> Self {
        Error {
            kind: ErrorKind::Layout(kind),
            loc,
            subject: subject.into(),
            source: None,
        }
    }

    pub fn io(kind: IoKind, path: &Path, source: std::io::Error) -> Self {
        Error {
            kind: ErrorKind::Io(kind),
            loc: Loc::default(),
            subject: path.display().to_string(),
            source: Some(source),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
