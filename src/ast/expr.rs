//! Expression node shapes. Every node that resolves a name, method, property
//! or constructor at runtime carries a [`FuncallCache`] slot.

use std::rc::Rc;

use crate::error::Position;
use crate::template::TemplateExpr;
use crate::types::Value;

use super::flags::{FuncallCache, NodeFlags};
use super::stmt::Block;
use super::Ident;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Matches,
    NotMatches,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

/// A lambda literal's AST shape, pre-resolution of which free names it
/// captures (resolved by the (external) parser/builder, recorded here as
/// `captures`).
#[derive(Debug)]
pub struct LambdaDef {
    pub params: Vec<Ident>,
    pub captures: Vec<Ident>,
    pub body: Rc<Block>,
    pub pos: Position,
}

#[derive(Debug)]
pub enum Expr {
    Literal(Value, Position),
    Reference(Ident),
    ArrayLiteral(Vec<Expr>, Position),
    MapLiteral(Vec<(Expr, Expr)>, Position),
    SetLiteral(Vec<Expr>, Position),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        pos: Position,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Position,
    },
    Ternary {
        cond: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
        pos: Position,
    },
    /// `cond ?: else` — if `cond` is truthy, its own value is used (not
    /// re-evaluated); else `else_branch` is evaluated.
    Elvis {
        cond: Box<Expr>,
        else_branch: Box<Expr>,
        pos: Position,
    },
    /// `lhs ?? rhs` — `rhs` only evaluated if `lhs` is `null`.
    NullCoalesce {
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        pos: Position,
    },
    Range {
        start: Box<Expr>,
        end: Box<Expr>,
        inclusive: bool,
        pos: Position,
    },
    InstanceOf {
        expr: Box<Expr>,
        class_name: String,
        pos: Position,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
        safe: bool,
        pos: Position,
    },
    Property {
        target: Box<Expr>,
        name: String,
        safe: bool,
        pos: Position,
        cache: FuncallCache,
    },
    MethodCall {
        target: Box<Expr>,
        name: String,
        args: Vec<Expr>,
        safe: bool,
        pos: Position,
        cache: FuncallCache,
    },
    FunctionCall {
        name: Ident,
        args: Vec<Expr>,
        pos: Position,
        cache: FuncallCache,
    },
    ConstructorCall {
        class_name: String,
        args: Vec<Expr>,
        pos: Position,
        cache: FuncallCache,
    },
    Lambda(Rc<LambdaDef>),
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
        compound: Option<BinaryOp>,
        pos: Position,
    },
    IncDec {
        target: Box<Expr>,
        delta: i64,
        is_post: bool,
        pos: Position,
    },
    QualifiedIdent(String, Position),
    Template(Rc<TemplateExpr>, Position),
}

impl Expr {
    #[must_use]
    pub fn pos(&self) -> Position {
        match self {
            Expr::Literal(_, p)
            | Expr::ArrayLiteral(_, p)
            | Expr::MapLiteral(_, p)
            | Expr::SetLiteral(_, p)
            | Expr::Unary { pos: p, .. }
            | Expr::Binary { pos: p, .. }
            | Expr::Ternary { pos: p, .. }
            | Expr::Elvis { pos: p, .. }
            | Expr::NullCoalesce { pos: p, .. }
            | Expr::Range { pos: p, .. }
            | Expr::InstanceOf { pos: p, .. }
            | Expr::Index { pos: p, .. }
            | Expr::Property { pos: p, .. }
            | Expr::MethodCall { pos: p, .. }
            | Expr::FunctionCall { pos: p, .. }
            | Expr::ConstructorCall { pos: p, .. }
            | Expr::Assign { pos: p, .. }
            | Expr::IncDec { pos: p, .. }
            | Expr::QualifiedIdent(_, p)
            | Expr::Template(_, p) => *p,
            Expr::Reference(ident) => ident.pos,
            Expr::Lambda(def) => def.pos,
        }
    }

    /// True for literals and composites built entirely from constants —
    /// used by the engine's optional constant-folding pass and by
    /// `Script::get_variables` to skip nodes that can't reference a name.
    #[must_use]
    pub fn flags(&self) -> NodeFlags {
        match self {
            Expr::Literal(..) => NodeFlags::CONSTANT,
            Expr::ArrayLiteral(items, _) | Expr::SetLiteral(items, _)
                if items.iter().all(|i| i.flags().contains(NodeFlags::CONSTANT)) =>
            {
                NodeFlags::CONSTANT
            }
            Expr::Reference(_) | Expr::Index { .. } | Expr::Property { .. } => {
                NodeFlags::SAFE_LHS
            }
            _ => NodeFlags::empty(),
        }
    }

    #[must_use]
    pub fn is_constant(&self) -> bool {
        self.flags().contains(NodeFlags::CONSTANT)
    }

    #[must_use]
    pub fn is_safe_lhs(&self) -> bool {
        self.flags().contains(NodeFlags::SAFE_LHS)
    }
}
