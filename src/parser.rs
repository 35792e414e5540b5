//! The lexer/parser seam. This crate defines the interface and the AST it
//! must produce; it ships no production grammar — a host supplies one.

use std::rc::Rc;
use std::sync::Arc;

use crate::ast::{Expr, RootNode};
use crate::error::ParseError;
use crate::options::EngineOptions;
use crate::types::Scope;

/// Parses JEXL source into an [`RootNode`] (full script) or a bare [`Expr`]
/// (single expression, used by `Engine::evaluate`, property accessors, and
/// template `${...}`/`#{...}` bodies).
///
/// Implementations are expected to be stateless/re-entrant: the engine may
/// call `parse`/`parse_expr` recursively (template preparation re-enters the
/// parser for each embedded expression) and across threads if the host
/// shares one `Engine`.
pub trait Parser {
    fn parse(
        &self,
        source: &str,
        options: EngineOptions,
        scope: Option<&Scope>,
    ) -> Result<Arc<RootNode>, ParseError>;

    fn parse_expr(
        &self,
        source: &str,
        options: EngineOptions,
        scope: Option<&Scope>,
    ) -> Result<Expr, ParseError>;
}

/// The `(options, source)` pair a [`crate::engine::ScriptCache`] keys on: two
/// scripts with identical text but different feature flags (e.g. `strict`
/// toggled) must not share a cached parse, since some flags affect parsing
/// itself (e.g. `antish` loosens what counts as a valid reference name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SourceKey {
    pub flags: u32,
    pub source: Rc<str>,
}

impl SourceKey {
    #[must_use]
    pub fn new(options: EngineOptions, source: impl Into<Rc<str>>) -> Self {
        Self {
            flags: options.bits(),
            source: source.into(),
        }
    }
}
