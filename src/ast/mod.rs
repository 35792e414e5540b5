//! The abstract syntax tree: immutable node shapes, each carrying source
//! [`Position`] info and (where relevant) a mutable call-site cache slot.
//! Parsing itself is out of scope — see [`crate::parser::Parser`] — this
//! module only defines the tree the parser must produce.

pub mod expr;
pub mod flags;
pub mod stmt;

use std::rc::Rc;

use crate::error::Position;
use crate::types::Value;

pub use expr::{BinaryOp, Expr, LambdaDef, UnaryOp};
pub use flags::{FuncallCache, NodeFlags};
pub use stmt::{Block, Catch, Resource, Stmt};

/// What an identifier resolves to: a local (`var`-declared or parameter)
/// frame slot, or a name looked up in the [`crate::context::Context`] at
/// evaluation time. The parser/builder decides which at resolution time —
/// JEXL keeps these two namespaces distinct rather than unifying them into
/// one flat scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    Local(usize),
    Context,
}

/// An identifier reference: its source text, position, and how it resolves.
#[derive(Debug, Clone)]
pub struct Ident {
    pub name: Rc<str>,
    pub kind: RefKind,
    pub pos: Position,
}

impl Ident {
    #[must_use]
    pub fn local(name: impl Into<Rc<str>>, slot: usize, pos: Position) -> Self {
        Self {
            name: name.into(),
            kind: RefKind::Local(slot),
            pos,
        }
    }

    #[must_use]
    pub fn context(name: impl Into<Rc<str>>, pos: Position) -> Self {
        Self {
            name: name.into(),
            kind: RefKind::Context,
            pos,
        }
    }

    #[must_use]
    pub fn slot(&self) -> usize {
        match self.kind {
            RefKind::Local(idx) => idx,
            RefKind::Context => panic!("Ident is a context reference, not a local slot"),
        }
    }
}

/// The root of a parsed script or expression: a single [`Block`] plus the
/// [`crate::types::Scope`] the parser built while resolving it.
#[derive(Debug)]
pub struct RootNode {
    pub body: Block,
    pub scope: Rc<crate::types::Scope>,
    pub source: Rc<str>,
    /// `jexl.*` pragmas collected by the parser, in source order.
    pub pragmas: Vec<(Rc<str>, Value)>,
}
