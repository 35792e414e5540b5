//! JXLT-style templates: text interleaved with `${...}` (immediate) and
//! `#{...}` (deferred) expressions.
//!
//! - **Immediate** (`${...}`) expressions are evaluated once, when the
//!   template is prepared against a context, and the result is baked into
//!   the prepared template as plain text.
//! - **Deferred** (`#{...}`) expressions are kept as AST and evaluated every
//!   time the prepared template is rendered, possibly against a different
//!   context each time.
//!
//! As an inline expression within ordinary script text (`Expr::Template`),
//! there is no separate prepare stage: both kinds evaluate live, once, when
//! the interpreter reaches that node.

pub mod scanner;

use std::rc::Rc;

use crate::ast::Expr;
use crate::error::{JexlResult, Position};
use crate::types::Value;

pub use scanner::scan;

/// One segment of a parsed template.
#[derive(Debug)]
pub enum TemplateExpr {
    Constant(String),
    Immediate(Expr),
    Deferred(Expr),
    /// A nested `${ ... }` whose body is itself further template text
    /// (JXLT allows embedding a template literal inside an expression).
    Nested(Rc<TemplateExpr>),
    Composite(Vec<TemplateExpr>),
}

impl TemplateExpr {
    /// Evaluate fully in one pass (used for `Expr::Template` inline usage,
    /// and as the implementation the two-phase API below is built on).
    pub fn evaluate_with(
        &self,
        eval: &mut dyn FnMut(&Expr) -> JexlResult<Value>,
    ) -> JexlResult<String> {
        match self {
            TemplateExpr::Constant(s) => Ok(s.clone()),
            TemplateExpr::Immediate(e) | TemplateExpr::Deferred(e) => Ok(eval(e)?.to_string()),
            TemplateExpr::Nested(inner) => inner.evaluate_with(eval),
            TemplateExpr::Composite(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.evaluate_with(eval)?);
                }
                Ok(out)
            }
        }
    }
}

/// A template after its immediate (`${...}`) expressions have been baked
/// into literal text; only deferred (`#{...}`) expressions remain live.
#[derive(Debug)]
pub struct PreparedTemplate {
    segments: Vec<PreparedSegment>,
}

#[derive(Debug)]
enum PreparedSegment {
    Literal(String),
    Deferred(Expr),
}

impl PreparedTemplate {
    pub fn evaluate(
        &self,
        eval_deferred: &mut dyn FnMut(&Expr) -> JexlResult<Value>,
    ) -> JexlResult<String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                PreparedSegment::Literal(s) => out.push_str(s),
                PreparedSegment::Deferred(e) => out.push_str(&eval_deferred(e)?.to_string()),
            }
        }
        Ok(out)
    }
}

/// Fold every `Immediate` segment into `Literal` text by evaluating it now;
/// `Deferred` segments are carried through untouched, to be evaluated on
/// every [`PreparedTemplate::evaluate`] call.
pub fn prepare(
    tree: TemplateExpr,
    eval_immediate: &mut dyn FnMut(&Expr) -> JexlResult<Value>,
) -> JexlResult<PreparedTemplate> {
    fn walk(
        tree: TemplateExpr,
        eval_immediate: &mut dyn FnMut(&Expr) -> JexlResult<Value>,
        out: &mut Vec<PreparedSegment>,
    ) -> JexlResult<()> {
        match tree {
            TemplateExpr::Constant(s) => out.push(PreparedSegment::Literal(s)),
            TemplateExpr::Immediate(e) => {
                let v = eval_immediate(&e)?;
                out.push(PreparedSegment::Literal(v.to_string()));
            }
            TemplateExpr::Deferred(e) => out.push(PreparedSegment::Deferred(e)),
            TemplateExpr::Nested(inner) => {
                let v = inner.evaluate_with(eval_immediate)?;
                out.push(PreparedSegment::Literal(v));
            }
            TemplateExpr::Composite(parts) => {
                for part in parts {
                    walk(part, eval_immediate, out)?;
                }
            }
        }
        Ok(())
    }
    let mut out = Vec::new();
    walk(tree, eval_immediate, &mut out)?;
    Ok(PreparedTemplate { segments: out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Position;

    #[test]
    fn composite_concatenates() {
        let tree = TemplateExpr::Composite(vec![
            TemplateExpr::Constant("a=".into()),
            TemplateExpr::Immediate(Expr::Literal(Value::Int(1), Position::NONE)),
        ]);
        let mut eval = |e: &Expr| match e {
            Expr::Literal(v, _) => Ok(v.clone()),
            _ => unreachable!(),
        };
        assert_eq!(tree.evaluate_with(&mut eval).unwrap(), "a=1");
    }

    #[test]
    fn prepare_owned_bakes_immediate_keeps_deferred() {
        let tree = TemplateExpr::Composite(vec![
            TemplateExpr::Immediate(Expr::Literal(Value::Int(1), Position::NONE)),
            TemplateExpr::Constant("-".into()),
            TemplateExpr::Deferred(Expr::Literal(Value::Int(2), Position::NONE)),
        ]);
        let mut immediate_calls = 0;
        let prepared = prepare(tree, &mut |e| {
            immediate_calls += 1;
            match e {
                Expr::Literal(v, _) => Ok(v.clone()),
                _ => unreachable!(),
            }
        })
        .unwrap();
        assert_eq!(immediate_calls, 1);
        let out = prepared
            .evaluate(&mut |e| match e {
                Expr::Literal(v, _) => Ok(v.clone()),
                _ => unreachable!(),
            })
            .unwrap();
        assert_eq!(out, "1-2");
    }
}
