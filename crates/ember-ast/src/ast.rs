//! Abstract syntax tree node shapes
//!
//! These types are the contract between this core and the (out-of-scope)
//! lexer/parser/annotator front end: whatever produces a parsed program is
//! expected to hand the compiler a `Module` built from these node shapes.
//! Every node carries a [`Span`] so compile errors can cite a source offset.

use crate::interner::Symbol;
use crate::span::Span;
use serde::{Deserialize, Serialize};

/// A parsed source file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub statements: Vec<Stmt>,
}

/// A type annotation as written by the user (or inferred by the annotator).
/// Purely a syntactic hint — the compiler's own [`Value`](ember_compiler::Value)
/// lattice is authoritative at compile time; an annotation that disagrees with
/// the observed argument types is a compile error (§4.5).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TypeAnnotation {
    None,
    Bool,
    Int,
    Float,
    Bytes,
    Unicode,
    List(Box<TypeAnnotation>),
    Tuple(Vec<TypeAnnotation>),
    Dict(Box<TypeAnnotation>, Box<TypeAnnotation>),
    Set(Box<TypeAnnotation>),
    Instance(Symbol),
    /// No annotation given; the compiler infers from the argument vector.
    Unannotated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub name: Symbol,
    pub annotation: TypeAnnotation,
    pub default: Option<Expr>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionDef {
    pub name: Symbol,
    pub params: Vec<Param>,
    pub return_annotation: TypeAnnotation,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassDef {
    pub name: Symbol,
    /// Single base class, if any. Multiple inheritance is a non-goal (§1).
    pub base: Option<Symbol>,
    pub methods: Vec<FunctionDef>,
    pub span: Span,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Stmt {
    Expr(Expr),
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    AnnAssign {
        target: Symbol,
        annotation: TypeAnnotation,
        value: Option<Expr>,
        span: Span,
    },
    Return(Option<Expr>, Span),
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    For {
        target: Symbol,
        iter: Expr,
        body: Vec<Stmt>,
        orelse: Vec<Stmt>,
        span: Span,
    },
    Try {
        body: Vec<Stmt>,
        handlers: Vec<ExceptHandler>,
        orelse: Vec<Stmt>,
        finally: Vec<Stmt>,
        span: Span,
    },
    Raise(Option<Expr>, Span),
    Break(Span),
    Continue(Span),
    Pass(Span),
    FunctionDef(FunctionDef),
    ClassDef(ClassDef),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptHandler {
    /// Class names this handler catches; empty means bare `except:`.
    pub classes: Vec<Symbol>,
    pub binding: Option<Symbol>,
    pub body: Vec<Stmt>,
    pub span: Span,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    LShift,
    RShift,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    NotEq,
    Lt,
    LtE,
    Gt,
    GtE,
    Is,
    IsNot,
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoolOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    Neg,
    Not,
    Invert,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Unicode(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub name: Symbol,
    pub value: Expr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Expr {
    Literal(Literal, Span),
    Name(Symbol, Span),
    BinOp {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
        span: Span,
    },
    UnaryOp {
        op: UnaryOp,
        operand: Box<Expr>,
        span: Span,
    },
    BoolOp {
        op: BoolOp,
        values: Vec<Expr>,
        span: Span,
    },
    Compare {
        left: Box<Expr>,
        op: CmpOp,
        right: Box<Expr>,
        span: Span,
    },
    Call {
        func: Box<Expr>,
        args: Vec<Expr>,
        keywords: Vec<Keyword>,
        span: Span,
    },
    Attribute {
        value: Box<Expr>,
        attr: Symbol,
        span: Span,
    },
    Subscript {
        value: Box<Expr>,
        index: Box<Expr>,
        span: Span,
    },
    List(Vec<Expr>, Span),
    Tuple(Vec<Expr>, Span),
    Dict(Vec<(Expr, Expr)>, Span),
    Set(Vec<Expr>, Span),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal(_, s)
            | Expr::Name(_, s)
            | Expr::BinOp { span: s, .. }
            | Expr::UnaryOp { span: s, .. }
            | Expr::BoolOp { span: s, .. }
            | Expr::Compare { span: s, .. }
            | Expr::Call { span: s, .. }
            | Expr::Attribute { span: s, .. }
            | Expr::Subscript { span: s, .. }
            | Expr::List(_, s)
            | Expr::Tuple(_, s)
            | Expr::Dict(_, s)
            | Expr::Set(_, s) => *s,
        }
    }
}
