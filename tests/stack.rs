//! Exercises the two hard limits the engine enforces regardless of what a
//! host's grammar looks like: call-depth overflow, detected by
//! [`jexl::eval::Interpreter::call_closure`]'s [`jexl::eval::CallDepthGuard`],
//! and script-cache identity/eviction in [`Engine::parse`].

use std::rc::Rc;
use std::sync::Arc;

use jexl::ast::{Block, Expr, FuncallCache, Ident, RootNode, Stmt};
use jexl::error::{JexlError, ParseError, Position};
use jexl::types::{Closure, Scope, Value};
use jexl::{Engine, MapContext, Parser};

/// Parses only integer literals — enough to exercise `Engine::parse`'s
/// caching without needing a real grammar.
struct LiteralParser;

impl Parser for LiteralParser {
    fn parse(&self, source: &str, _options: jexl::EngineOptions, _scope: Option<&Scope>) -> Result<Arc<RootNode>, ParseError> {
        let value: i64 = source
            .trim()
            .parse()
            .map_err(|_| ParseError::Syntax(format!("not an integer: {source}"), Position::NONE))?;
        Ok(Arc::new(RootNode {
            body: Block { stmts: vec![Stmt::Expr(Expr::Literal(Value::Int(value), Position::NONE))], pos: Position::NONE },
            scope: Rc::new(Scope::new()),
            source: source.into(),
            pragmas: Vec::new(),
        }))
    }

    fn parse_expr(&self, source: &str, _options: jexl::EngineOptions, _scope: Option<&Scope>) -> Result<Expr, ParseError> {
        let value: i64 = source.trim().parse().unwrap_or(0);
        Ok(Expr::Literal(Value::Int(value), Position::NONE))
    }
}

#[test]
fn identical_source_and_options_share_one_parse() {
    let engine = Engine::new(Arc::new(LiteralParser)).with_cache(8, 0);
    let a = engine.parse("123456").unwrap();
    let b = engine.parse("123456").unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(engine.cache_len(), 1);
}

#[test]
fn clear_cache_forces_reparse() {
    let engine = Engine::new(Arc::new(LiteralParser)).with_cache(8, 0);
    let a = engine.parse("42").unwrap();
    engine.clear_cache();
    let b = engine.parse("42").unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
}

#[test]
fn cache_eviction_drops_oldest_entry() {
    let engine = Engine::new(Arc::new(LiteralParser)).with_cache(1, 0);
    engine.parse("1").unwrap();
    engine.parse("2").unwrap();
    assert_eq!(engine.cache_len(), 1);
    // "1" was evicted to make room for "2"; re-parsing it is a fresh AST.
    let first_again = engine.parse("1").unwrap();
    let second = engine.parse("2").unwrap();
    assert!(!Arc::ptr_eq(&first_again, &second));
}

/// Builds `f`, a one-parameter closure whose body unconditionally calls
/// itself (`f(n + 1)`), wired up by hand since no grammar is shipped to
/// parse real recursive syntax, and no surface syntax for `var f = (n) =>
/// ... f(n - 1) ...` actually self-references (`Stmt::VarDecl` overwrites
/// the frame slot directly rather than through the lambda's captured cell).
/// Self-reference is instead wired directly into the closure's capture
/// before it is ever stored anywhere; the top level just calls `f(0)`.
fn unbounded_recursion_root() -> Arc<RootNode> {
    let pos = Position::NONE;

    // Inside the closure body, "n" is param 0 and the "f" self-capture sits
    // right after it at slot 1, matching how `call_closure` lays out capture
    // slots: params first, then captures in declaration order.
    let inner_n = Ident::local("n", 0, pos);
    let inner_f = Ident::local("f", 1, pos);

    let recurse = Expr::FunctionCall {
        name: inner_f,
        args: vec![Expr::Binary {
            op: jexl::ast::BinaryOp::Add,
            lhs: Box::new(Expr::Reference(inner_n)),
            rhs: Box::new(Expr::Literal(Value::Int(1), pos)),
            pos,
        }],
        pos,
        cache: FuncallCache::default(),
    };
    let body = Rc::new(Block { stmts: vec![Stmt::Expr(recurse)], pos });

    let mut lambda_scope = Scope::with_params(["n"]);
    let f_capture_slot = lambda_scope.declare("f");
    debug_assert_eq!(f_capture_slot, 1);

    // "f"'s capture slot in the *outer* scope is irrelevant here since we
    // never go through `eval_lambda` to build this closure; `0` is just a
    // placeholder slot index, never read.
    let cell = Rc::new(std::cell::RefCell::new(Value::Null));
    let closure = Rc::new(Closure {
        params: vec![Ident::local("n", 0, pos)],
        captures: vec![Ident::local("f", 0, pos)],
        body,
        scope: Rc::new(lambda_scope),
        captured: vec![Value::Shared(Rc::clone(&cell))],
    });
    *cell.borrow_mut() = Value::Closure(Rc::clone(&closure));

    // Top level: `var f = <the closure built above>; f(0);`
    let mut outer_scope = Scope::new();
    let f_slot = outer_scope.declare("f");

    let decl = Stmt::VarDecl {
        var: Ident::local("f", f_slot, pos),
        init: Some(Expr::Literal(Value::Closure(Rc::clone(&closure)), pos)),
        pos,
    };
    let call_f = Stmt::Expr(Expr::FunctionCall {
        name: Ident::local("f", f_slot, pos),
        args: vec![Expr::Literal(Value::Int(0), pos)],
        pos,
        cache: FuncallCache::default(),
    });
    let top_body = Block { stmts: vec![decl, call_f], pos };

    Arc::new(RootNode {
        body: top_body,
        scope: Rc::new(outer_scope),
        source: "var f = ...; f(0)".into(),
        pragmas: Vec::new(),
    })
}

#[test]
fn unbounded_recursion_hits_stack_overflow() {
    let engine = Engine::new(Arc::new(LiteralParser)).with_stack_overflow(64);
    let root = unbounded_recursion_root();
    let mut ctx = MapContext::new();

    let err = engine.execute(&mut ctx, &root, vec![]).unwrap_err();
    assert!(matches!(*err, JexlError::StackOverflow(_)), "expected StackOverflow, got {err:?}");
}
