//! The tree-walking evaluator.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::rc::Rc;

use crate::arithmetic::{Arithmetic, Operator};
use crate::ast::{BinaryOp, Block, Catch, Expr, Ident, LambdaDef, RefKind, Resource, Stmt, UnaryOp};
use crate::context::Context;
use crate::error::{JexlError, JexlResult, Position};
use crate::introspection::{CachedAccessor, CallShape, Introspection};
use crate::options::EngineOptions;
use crate::types::{Closure, Frame, LexicalFrame, Scope, Slot, Value};

use super::flow::{EvalResult, Flow};
use super::global::{CallDepthGuard, GlobalState};

/// Walks one [`Block`]/[`Expr`] tree against a context, arithmetic provider
/// and introspection provider. One `Interpreter` is built per top-level
/// `Engine::execute`/`evaluate` call; lambda calls spawn a nested one
/// sharing the same `context`/`arithmetic`/`introspection`/`global`.
pub struct Interpreter<'a> {
    pub context: &'a mut dyn Context,
    pub arithmetic: &'a dyn Arithmetic,
    pub introspection: &'a dyn Introspection,
    pub options: EngineOptions,
    pub scope: Rc<Scope>,
    pub frame: Frame,
    pub lexical: Option<Box<LexicalFrame>>,
    pub global: &'a GlobalState,
}

impl<'a> Interpreter<'a> {
    pub fn new(
        context: &'a mut dyn Context,
        arithmetic: &'a dyn Arithmetic,
        introspection: &'a dyn Introspection,
        options: EngineOptions,
        scope: Rc<Scope>,
        frame: Frame,
        global: &'a GlobalState,
    ) -> Self {
        Self {
            context,
            arithmetic,
            introspection,
            options,
            scope,
            frame,
            lexical: None,
            global,
        }
    }

    /// Entry point: run a root script/expression body to completion,
    /// collapsing `Flow` back into a plain [`JexlResult`].
    pub fn run(&mut self, body: &Block) -> JexlResult<Value> {
        match self.eval_block(body) {
            Ok(v) => Ok(v),
            Err(Flow::Return(v)) => Ok(v),
            Err(Flow::Cancel) => Err(Box::new(JexlError::Cancel(body.pos))),
            Err(Flow::Throw(v)) => Err(Box::new(JexlError::Throw(v, body.pos))),
            Err(Flow::Error(e)) => Err(e),
            Err(Flow::Break(_) | Flow::Continue(_)) => Err(Box::new(JexlError::Runtime(
                "break/continue outside of a loop".into(),
                body.pos,
            ))),
        }
    }

    fn check_cancelled(&self, pos: Position) -> EvalResult<()> {
        if self.options.contains(EngineOptions::CANCELLABLE) && self.global.is_cancelled() {
            log::debug!("evaluation cancelled at {pos}");
            return Err(Flow::Cancel);
        }
        Ok(())
    }

    // ---- statements ----------------------------------------------------

    pub fn eval_block(&mut self, block: &Block) -> EvalResult<Value> {
        let mut value = Value::Null;
        for stmt in &block.stmts {
            value = self.exec_stmt(stmt)?;
        }
        Ok(value)
    }

    /// Run `block` inside a fresh lexical scope when `lexical` is enabled;
    /// otherwise just execute it against the current (flat) frame.
    fn eval_scoped_block(&mut self, block: &Block) -> EvalResult<Value> {
        if !self.options.contains(EngineOptions::LEXICAL) {
            return self.eval_block(block);
        }
        let parent = self.lexical.take();
        self.lexical = Some(Box::new(LexicalFrame::push(parent, self.scope.len())));
        let result = self.eval_block(block);
        if let Some(lex) = self.lexical.take() {
            self.lexical = lex.pop(&mut self.frame);
        }
        result
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> EvalResult<Value> {
        self.check_cancelled(stmt.pos())?;
        match stmt {
            Stmt::Expr(e) => self.eval_expr(e),
            Stmt::VarDecl { var, init, pos } => {
                let value = match init {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Null,
                };
                let idx = var.slot();
                if self.options.contains(EngineOptions::LEXICAL) {
                    if let Some(mut lex) = self.lexical.take() {
                        lex.declare(idx, &var.name, &mut self.frame, *pos)?;
                        self.lexical = Some(lex);
                    }
                }
                self.frame.declare(idx, value.clone());
                Ok(value)
            }
            Stmt::Block(b) => self.eval_scoped_block(b),
            Stmt::If { cond, then_branch, else_branch, .. } => {
                if self.arithmetic.to_boolean(&self.eval_expr(cond)?) {
                    self.eval_scoped_block(then_branch)
                } else if let Some(eb) = else_branch {
                    self.eval_scoped_block(eb)
                } else {
                    Ok(Value::Null)
                }
            }
            Stmt::While { cond, body, label, .. } => self.exec_while(cond, body, label.as_deref()),
            Stmt::DoWhile { body, cond, label, .. } => self.exec_do_while(body, cond, label.as_deref()),
            Stmt::For { init, cond, update, body, label, .. } => {
                self.exec_for(init.as_deref(), cond.as_ref(), update.as_ref(), body, label.as_deref())
            }
            Stmt::ForEach { var, iterable, body, label, .. } => {
                self.exec_foreach(var, iterable, body, label.as_deref())
            }
            Stmt::Try { resources, body, catches, finally, pos } => {
                self.exec_try(resources, body, catches, finally.as_ref(), *pos)
            }
            Stmt::Throw(e, _) => {
                let v = self.eval_expr(e)?;
                Err(Flow::Throw(v))
            }
            Stmt::Return(e, _) => {
                let v = match e {
                    Some(e) => self.eval_expr(e)?,
                    None => Value::Null,
                };
                Err(Flow::Return(v))
            }
            Stmt::Break(label, _) => Err(Flow::Break(label.as_ref().map(|s| Rc::from(s.as_str())))),
            Stmt::Continue(label, _) => Err(Flow::Continue(label.as_ref().map(|s| Rc::from(s.as_str())))),
            Stmt::Annotated { name, args, target, pos } => self.exec_annotated(name, args, target, *pos),
        }
    }

    fn exec_while(&mut self, cond: &Expr, body: &Block, label: Option<&str>) -> EvalResult<Value> {
        let mut value = Value::Null;
        while self.arithmetic.to_boolean(&self.eval_expr(cond)?) {
            self.check_cancelled(body.pos)?;
            match self.eval_scoped_block(body) {
                Ok(v) => value = v,
                Err(Flow::Break(l)) if label_matches(&l, label) => break,
                Err(Flow::Continue(l)) if label_matches(&l, label) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(value)
    }

    fn exec_do_while(&mut self, body: &Block, cond: &Expr, label: Option<&str>) -> EvalResult<Value> {
        let mut value = Value::Null;
        loop {
            self.check_cancelled(body.pos)?;
            let mut should_break = false;
            match self.eval_scoped_block(body) {
                Ok(v) => value = v,
                Err(Flow::Break(l)) if label_matches(&l, label) => should_break = true,
                Err(Flow::Continue(l)) if label_matches(&l, label) => {}
                Err(other) => return Err(other),
            }
            if should_break || !self.arithmetic.to_boolean(&self.eval_expr(cond)?) {
                break;
            }
        }
        Ok(value)
    }

    fn exec_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        update: Option<&Expr>,
        body: &Block,
        label: Option<&str>,
    ) -> EvalResult<Value> {
        if let Some(init) = init {
            self.exec_stmt(init)?;
        }
        let mut value = Value::Null;
        loop {
            if let Some(cond) = cond {
                if !self.arithmetic.to_boolean(&self.eval_expr(cond)?) {
                    break;
                }
            }
            self.check_cancelled(body.pos)?;
            match self.eval_scoped_block(body) {
                Ok(v) => value = v,
                Err(Flow::Break(l)) if label_matches(&l, label) => break,
                Err(Flow::Continue(l)) if label_matches(&l, label) => {}
                Err(other) => return Err(other),
            }
            if let Some(update) = update {
                self.eval_expr(update)?;
            }
        }
        Ok(value)
    }

    fn exec_foreach(
        &mut self,
        var: &Ident,
        iterable: &Expr,
        body: &Block,
        label: Option<&str>,
    ) -> EvalResult<Value> {
        let target = self.eval_expr(iterable)?;
        let accessor = self.introspection.get_iterator(&target).ok_or_else(|| {
            Flow::from(JexlError::Operator(
                format!("{} is not iterable", target.type_name()),
                iterable.pos(),
            ))
        })?;
        let items = accessor.iterate(&target).map_err(Flow::from)?;
        let mut value = Value::Null;
        let idx = var.slot();
        for item in items {
            self.check_cancelled(body.pos)?;
            self.frame.declare(idx, item);
            match self.eval_scoped_block(body) {
                Ok(v) => value = v,
                Err(Flow::Break(l)) if label_matches(&l, label) => break,
                Err(Flow::Continue(l)) if label_matches(&l, label) => continue,
                Err(other) => return Err(other),
            }
        }
        Ok(value)
    }

    fn exec_try(
        &mut self,
        resources: &[Resource],
        body: &Block,
        catches: &[Catch],
        finally: Option<&Block>,
        pos: Position,
    ) -> EvalResult<Value> {
        let _ = pos;
        for r in resources {
            let v = self.eval_expr(&r.init)?;
            self.frame.declare(r.binding.slot(), v);
        }

        let result = self.eval_scoped_block(body);

        // Flow-control escapes (return/break/continue/cancel) never hit a
        // `catch` — only a thrown value or an engine-raised `JexlError`
        // does. Catches are checked in textual order; the first whose
        // class filter matches (or has none) handles it.
        let after_catch = match result {
            Err(Flow::Throw(value)) => self.dispatch_catch(catches, value),
            Err(Flow::Error(e)) => self.dispatch_catch(catches, e.to_value()),
            other => other,
        };

        // `finally` always runs; its own escape (if any) takes precedence
        // over whatever `body`/`catch` produced, except `Cancel`, which
        // always wins no matter where it came from.
        if let Some(finally) = finally {
            match self.eval_scoped_block(finally) {
                Ok(_) => after_catch,
                Err(Flow::Cancel) => Err(Flow::Cancel),
                Err(_) if matches!(after_catch, Err(Flow::Cancel)) => after_catch,
                Err(finally_flow) => Err(finally_flow),
            }
        } else {
            after_catch
        }
    }

    fn dispatch_catch(&mut self, catches: &[Catch], value: Value) -> EvalResult<Value> {
        for catch in catches {
            if let Some(class_name) = &catch.class_filter {
                if !self.value_is_instance_of(&value, class_name) {
                    continue;
                }
            }
            self.frame.declare(catch.exception.slot(), value);
            return self.eval_scoped_block(&catch.body);
        }
        Err(Flow::Throw(value))
    }

    /// Annotation hooks observe (and may veto) the annotated statement but
    /// can't execute it directly: [`Context::process_annotation`]'s
    /// continuation only receives `&mut dyn Context`, not the interpreter
    /// itself, so it can't recursively call back into `exec_stmt`. Instead
    /// the continuation just flips a flag; the interpreter runs the
    /// statement itself once the hook returns, unless it declined to call
    /// `next` at all.
    fn exec_annotated(&mut self, name: &str, args: &[Expr], target: &Stmt, pos: Position) -> EvalResult<Value> {
        let _ = pos;
        let arg_vals = args.iter().map(|a| self.eval_expr(a)).collect::<EvalResult<Vec<_>>>()?;
        let mut proceed = false;
        {
            let mut next = |_ctx: &mut dyn Context| -> JexlResult<Value> {
                proceed = true;
                Ok(Value::Null)
            };
            self.context.process_annotation(name, &arg_vals, &mut next).map_err(Flow::from)?;
        }
        if proceed {
            self.exec_stmt(target)
        } else {
            Ok(Value::Null)
        }
    }

    fn value_is_instance_of(&self, value: &Value, class_name: &str) -> bool {
        match (value.flatten(), class_name) {
            (Value::Null, _) => false,
            (Value::Bool(_), "Boolean") => true,
            (Value::Int(_), "Integer" | "Long") => true,
            (Value::Float(_), "Double" | "Float") => true,
            (Value::Str(_), "String") => true,
            (Value::Array(_), "Array" | "List") => true,
            (Value::Map(_), "Map") => true,
            _ => self.introspection.get_class_by_name(class_name).is_some(),
        }
    }

    // ---- expressions -----------------------------------------------------

    pub fn eval_expr(&mut self, expr: &Expr) -> EvalResult<Value> {
        self.check_cancelled(expr.pos())?;
        match expr {
            Expr::Literal(v, _) => Ok(v.clone()),
            Expr::Reference(ident) => self.eval_reference(ident),
            Expr::ArrayLiteral(items, _) => {
                let values = items.iter().map(|e| self.eval_expr(e)).collect::<EvalResult<Vec<_>>>()?;
                Ok(Value::array(values))
            }
            Expr::SetLiteral(items, _) => {
                let mut values: Vec<Value> = Vec::new();
                for item in items {
                    let v = self.eval_expr(item)?;
                    if !values.iter().any(|existing| self.arithmetic.equals(existing, &v)) {
                        values.push(v);
                    }
                }
                Ok(Value::array(values))
            }
            Expr::MapLiteral(entries, pos) => {
                let mut map = indexmap::IndexMap::new();
                for (k, v) in entries {
                    let key = self.eval_expr(k)?;
                    let key = key
                        .as_str()
                        .ok_or_else(|| Flow::from(JexlError::Operator("map keys must be strings".into(), *pos)))?;
                    let value = self.eval_expr(v)?;
                    map.insert(key.to_string(), value);
                }
                Ok(Value::map(map))
            }
            Expr::Unary { op, expr, pos } => self.eval_unary(*op, expr, *pos),
            Expr::Binary { op, lhs, rhs, pos } => self.eval_binary(*op, lhs, rhs, *pos),
            Expr::Ternary { cond, then_branch, else_branch, .. } => {
                if self.arithmetic.to_boolean(&self.eval_expr(cond)?) {
                    self.eval_expr(then_branch)
                } else {
                    self.eval_expr(else_branch)
                }
            }
            Expr::Elvis { cond, else_branch, .. } => {
                let v = self.eval_expr(cond)?;
                if self.arithmetic.test_predicate(&v) {
                    Ok(v)
                } else {
                    self.eval_expr(else_branch)
                }
            }
            Expr::NullCoalesce { lhs, rhs, .. } => {
                let v = self.eval_expr(lhs)?;
                if v.is_null() {
                    self.eval_expr(rhs)
                } else {
                    Ok(v)
                }
            }
            Expr::Range { start, end, inclusive, pos } => {
                let s = self.eval_expr(start)?;
                let e = self.eval_expr(end)?;
                self.arithmetic.range(&s, &e, *inclusive, *pos).map_err(Flow::from)
            }
            Expr::InstanceOf { expr, class_name, .. } => {
                let v = self.eval_expr(expr)?;
                Ok(Value::Bool(self.value_is_instance_of(&v, class_name)))
            }
            Expr::Index { target, index, safe, pos } => self.eval_index(target, index, *safe, *pos),
            Expr::Property { target, name, safe, pos, cache } => {
                self.eval_property_get(target, name, *safe, *pos, cache)
            }
            Expr::MethodCall { target, name, args, safe, pos, cache } => {
                self.eval_method_call(target, name, args, *safe, *pos, cache)
            }
            Expr::FunctionCall { name, args, pos, cache } => self.eval_function_call(name, args, *pos, cache),
            Expr::ConstructorCall { class_name, args, pos, cache } => {
                self.eval_constructor_call(class_name, args, *pos, cache)
            }
            Expr::Lambda(def) => self.eval_lambda(def),
            Expr::Assign { target, value, compound, pos } => self.eval_assign(target, value, *compound, *pos),
            Expr::IncDec { target, delta, is_post, pos } => self.eval_inc_dec(target, *delta, *is_post, *pos),
            Expr::QualifiedIdent(name, _) => {
                let resolved = self.global.fqcn.resolve(name).unwrap_or_else(|| name.clone());
                Ok(Value::string(resolved))
            }
            Expr::Template(tree, _) => {
                let out = tree.evaluate_with(&mut |e| self.eval_expr(e).map_err(flow_to_jexl)).map_err(Flow::from)?;
                Ok(Value::string(out))
            }
        }
    }

    fn eval_reference(&mut self, ident: &Ident) -> EvalResult<Value> {
        match ident.kind {
            RefKind::Context => {
                if let Some(v) = self.context.get(&ident.name) {
                    Ok(v)
                } else if self.options.contains(EngineOptions::STRICT) {
                    Err(Flow::from(JexlError::Variable(ident.name.to_string(), ident.pos)))
                } else {
                    Ok(Value::Null)
                }
            }
            RefKind::Local(idx) => {
                if self.options.contains(EngineOptions::LEXICAL_SHADE) {
                    if let Some(lex) = &self.lexical {
                        if self.scope.is_captured(idx) && !lex.is_declared_anywhere(idx) {
                            return Err(Flow::from(JexlError::LexicalShade(ident.name.to_string(), ident.pos)));
                        }
                    }
                }
                match self.frame.slot(idx) {
                    Slot::Value(v) => Ok(v.flatten()),
                    Slot::Undefined => Ok(Value::Null),
                    Slot::Undeclared => {
                        if self.options.contains(EngineOptions::STRICT) {
                            Err(Flow::from(JexlError::Variable(ident.name.to_string(), ident.pos)))
                        } else {
                            Ok(Value::Null)
                        }
                    }
                }
            }
        }
    }

    fn eval_unary(&mut self, op: UnaryOp, expr: &Expr, pos: Position) -> EvalResult<Value> {
        let v = self.eval_expr(expr)?;
        match op {
            UnaryOp::Not => Ok(Value::Bool(!self.arithmetic.to_boolean(&v))),
            UnaryOp::Neg => self.arithmetic.neg(&v, pos).map_err(Flow::from),
            UnaryOp::BitNot => self.arithmetic.bit_not(&v, pos).map_err(Flow::from),
        }
    }

    fn eval_binary(&mut self, op: BinaryOp, lhs: &Expr, rhs: &Expr, pos: Position) -> EvalResult<Value> {
        match op {
            // Absent a `booleanLogical` option (this engine has none — see
            // DESIGN.md), `&&`/`||` return the last evaluated operand as-is
            // rather than coercing to a strict boolean.
            BinaryOp::And => {
                let l = self.eval_expr(lhs)?;
                if !self.arithmetic.to_boolean(&l) {
                    return Ok(l);
                }
                return self.eval_expr(rhs);
            }
            BinaryOp::Or => {
                let l = self.eval_expr(lhs)?;
                if self.arithmetic.to_boolean(&l) {
                    return Ok(l);
                }
                return self.eval_expr(rhs);
            }
            _ => {}
        }

        let l = self.eval_expr(lhs)?;
        let r = self.eval_expr(rhs)?;
        self.apply_binary(op, &l, &r, pos)
    }

    fn apply_binary(&self, op: BinaryOp, l: &Value, r: &Value, pos: Position) -> EvalResult<Value> {
        if let Some(overloaded) = op_overload(op).and_then(|o| self.arithmetic.try_overload(o, l, r)) {
            return overloaded.map_err(Flow::from);
        }
        let a = self.arithmetic;
        let res = match op {
            BinaryOp::Add => a.add(l, r, pos),
            BinaryOp::Sub => a.sub(l, r, pos),
            BinaryOp::Mul => a.mul(l, r, pos),
            BinaryOp::Div => a.div(l, r, pos),
            BinaryOp::Rem => a.rem(l, r, pos),
            BinaryOp::BitAnd => a.bit_and(l, r, pos),
            BinaryOp::BitOr => a.bit_or(l, r, pos),
            BinaryOp::BitXor => a.bit_xor(l, r, pos),
            BinaryOp::Shl => a.shl(l, r, pos),
            BinaryOp::Shr => a.shr(l, r, pos),
            BinaryOp::Eq => return Ok(Value::Bool(a.equals(l, r))),
            BinaryOp::Ne => return Ok(Value::Bool(!a.equals(l, r))),
            BinaryOp::Lt => {
                return a.compare(l, r, pos).map(|o| Value::Bool(o == Ordering::Less)).map_err(Flow::from)
            }
            BinaryOp::Le => {
                return a.compare(l, r, pos).map(|o| Value::Bool(o != Ordering::Greater)).map_err(Flow::from)
            }
            BinaryOp::Gt => {
                return a.compare(l, r, pos).map(|o| Value::Bool(o == Ordering::Greater)).map_err(Flow::from)
            }
            BinaryOp::Ge => {
                return a.compare(l, r, pos).map(|o| Value::Bool(o != Ordering::Less)).map_err(Flow::from)
            }
            BinaryOp::In => return a.contains(r, l, pos).map(Value::Bool).map_err(Flow::from),
            BinaryOp::Matches => return a.matches(l, r, pos).map(Value::Bool).map_err(Flow::from),
            BinaryOp::NotMatches => return a.matches(l, r, pos).map(|b| Value::Bool(!b)).map_err(Flow::from),
            BinaryOp::And | BinaryOp::Or => unreachable!("handled by short-circuit path in eval_binary"),
        };
        res.map_err(Flow::from)
    }

    fn eval_index(&mut self, target: &Expr, index: &Expr, safe: bool, pos: Position) -> EvalResult<Value> {
        let t = self.eval_expr(target)?;
        if safe && t.is_null() {
            return Ok(Value::Null);
        }
        let i = self.eval_expr(index)?;
        match t.flatten() {
            Value::Array(arr) => {
                let n = i
                    .as_int()
                    .ok_or_else(|| Flow::from(JexlError::Operator("array index must be an integer".into(), pos)))?;
                let arr = arr.borrow();
                let idx = if n < 0 { n + arr.len() as i64 } else { n };
                if idx < 0 || idx as usize >= arr.len() {
                    Ok(Value::Null)
                } else {
                    Ok(arr[idx as usize].clone())
                }
            }
            Value::Map(map) => {
                let key = i
                    .as_str()
                    .ok_or_else(|| Flow::from(JexlError::Operator("map index must be a string".into(), pos)))?;
                Ok(map.borrow().get(key.as_ref()).cloned().unwrap_or(Value::Null))
            }
            Value::Str(s) => {
                let n = i
                    .as_int()
                    .ok_or_else(|| Flow::from(JexlError::Operator("string index must be an integer".into(), pos)))?;
                Ok(s.chars().nth(n.max(0) as usize).map(|c| Value::string(c.to_string())).unwrap_or(Value::Null))
            }
            other => Err(Flow::from(JexlError::Operator(format!("{} is not indexable", other.type_name()), pos))),
        }
    }

    fn eval_property_get(
        &mut self,
        target: &Expr,
        name: &str,
        safe: bool,
        pos: Position,
        cache: &crate::ast::FuncallCache,
    ) -> EvalResult<Value> {
        // Checked *before* `target` is ever evaluated: a chain's root being
        // unresolvable is what triggers flattening, not a null seen midway
        // through stepping the chain. Deciding this first (rather than
        // evaluating `target` and inspecting its result) means an
        // intermediate `Property` node is never given the chance to resolve
        // (or fail resolving) its own, too-short prefix as a flat key before
        // this node gets to try the full one.
        if !safe {
            if let Some(prefix) = self.antish_chain_path(target) {
                if self.antish_root_is_null(&prefix) {
                    return self.antish_fallback(prefix, name, pos);
                }
            }
        }
        let t = self.eval_expr(target)?;
        if safe && t.is_null() {
            return Ok(Value::Null);
        }
        if t.is_null() {
            return Err(Flow::from(JexlError::Property(name.to_string(), pos)));
        }
        let shape = CallShape { target_type: t.type_name(), arity: 0 };
        let getter = if let Some(CachedAccessor::Getter(g)) = cache.get(&shape) {
            g
        } else {
            let g = self
                .introspection
                .get_property_get(&t, name)
                .ok_or_else(|| Flow::from(JexlError::Property(name.to_string(), pos)))?;
            cache.set(shape, CachedAccessor::Getter(Rc::clone(&g)));
            g
        };
        getter.get(&t).map_err(Flow::from)
    }

    /// If `expr` is a chain of non-safe identifier accesses rooted at a
    /// context reference (`a`, `a.b`, `a.b.c`, …), returns the dotted names
    /// seen so far — the candidate prefix for ant-ish fallback. Any local
    /// reference, safe-navigated step, method call, or index breaks the
    /// chain (`None`), since ant-ish only flattens plain identifier paths
    /// against the context namespace.
    fn antish_chain_path(&self, expr: &Expr) -> Option<Vec<String>> {
        if !self.options.contains(EngineOptions::ANTISH) {
            return None;
        }
        match expr {
            Expr::Reference(ident) if ident.kind == RefKind::Context => Some(vec![ident.name.to_string()]),
            Expr::Property { target, name, safe: false, .. } => {
                let mut path = self.antish_chain_path(target)?;
                path.push(name.clone());
                Some(path)
            }
            _ => None,
        }
    }

    /// Whether `path`'s root identifier is absent from the context, or
    /// present but `null` — the precondition for flattening the rest of
    /// `path` into a single dotted context key.
    fn antish_root_is_null(&self, path: &[String]) -> bool {
        self.context.get(&path[0]).map_or(true, |v| v.is_null())
    }

    /// The object a pure identifier chain resolved to became `null`; try
    /// progressively shorter dotted prefixes of `path` (plus `name`) as a
    /// context key, longest first — `a.b.c`, then `a.b` (with `.c` applied
    /// as an ordinary property get against whatever that resolves to), then
    /// `a`. The first prefix registered in the context wins. Distinguishes a
    /// key that's defined but holds `null` (returns `Null`) from one that
    /// was never defined anywhere along the chain (unsolvable variable).
    fn antish_fallback(&mut self, mut path: Vec<String>, name: &str, pos: Position) -> EvalResult<Value> {
        path.push(name.to_string());
        for split in (1..=path.len()).rev() {
            let key = path[..split].join(".");
            let Some(mut cur) = self.context.get(&key) else { continue };
            for seg in &path[split..] {
                let getter = self
                    .introspection
                    .get_property_get(&cur, seg)
                    .ok_or_else(|| Flow::from(JexlError::Property(seg.clone(), pos)))?;
                cur = getter.get(&cur).map_err(Flow::from)?;
            }
            return Ok(cur);
        }
        let full_key = path.join(".");
        if self.context.has(&full_key) {
            return Ok(Value::Null);
        }
        Err(Flow::from(JexlError::Variable(full_key, pos)))
    }

    fn eval_method_call(
        &mut self,
        target: &Expr,
        name: &str,
        args: &[Expr],
        safe: bool,
        pos: Position,
        cache: &crate::ast::FuncallCache,
    ) -> EvalResult<Value> {
        // Same root-first check as `eval_property_get`: decided before
        // `target` is evaluated, so a call like `svc.lookup(41)` with `svc`
        // wholly undefined never routes through a property lookup that
        // would itself (wrongly) treat `svc` as the whole answer.
        if !safe {
            if let Some(prefix) = self.antish_chain_path(target) {
                if self.antish_root_is_null(&prefix) {
                    let mut arg_vals = args.iter().map(|a| self.eval_expr(a)).collect::<EvalResult<Vec<_>>>()?;
                    self.arithmetic.narrow_arguments(&mut arg_vals);
                    let mut full = prefix;
                    full.push(name.to_string());
                    let key = full.join(".");
                    if let Some(Value::Closure(c)) = self.context.get(&key).map(|v| v.flatten()) {
                        return self.call_closure(&c, arg_vals, pos);
                    }
                    return Err(Flow::from(JexlError::Method(name.to_string(), pos)));
                }
            }
        }

        let t = self.eval_expr(target)?;
        if safe && t.is_null() {
            return Ok(Value::Null);
        }
        let mut arg_vals = args.iter().map(|a| self.eval_expr(a)).collect::<EvalResult<Vec<_>>>()?;
        self.arithmetic.narrow_arguments(&mut arg_vals);

        if t.is_null() {
            return Err(Flow::from(JexlError::Method(name.to_string(), pos)));
        }

        let shape = CallShape { target_type: t.type_name(), arity: arg_vals.len() };
        let accessor = if let Some(CachedAccessor::Method(m)) = cache.get(&shape) {
            m
        } else {
            let m = self
                .introspection
                .get_method(&t, name, &arg_vals)
                .ok_or_else(|| Flow::from(JexlError::Method(name.to_string(), pos)))?;
            cache.set(shape, CachedAccessor::Method(Rc::clone(&m)));
            m
        };
        accessor.invoke(&t, &mut arg_vals).map_err(Flow::from)
    }

    fn eval_function_call(
        &mut self,
        ident: &Ident,
        args: &[Expr],
        pos: Position,
        cache: &crate::ast::FuncallCache,
    ) -> EvalResult<Value> {
        // A bound closure (local var or context value) always wins over a
        // host-registered free function of the same name — calling a
        // variable that holds a lambda is how JEXL invokes it.
        let bound = match ident.kind {
            RefKind::Local(idx) => match self.frame.slot(idx) {
                Slot::Value(v) => Some(v.flatten()),
                _ => None,
            },
            RefKind::Context => self.context.get(&ident.name),
        };

        let mut arg_vals = args.iter().map(|a| self.eval_expr(a)).collect::<EvalResult<Vec<_>>>()?;
        self.arithmetic.narrow_arguments(&mut arg_vals);

        if let Some(Value::Closure(c)) = bound {
            return self.call_closure(&c, arg_vals, pos);
        }

        let shape = CallShape { target_type: "function", arity: arg_vals.len() };
        let accessor = if let Some(CachedAccessor::Method(m)) = cache.get(&shape) {
            m
        } else {
            let m = self
                .introspection
                .get_function(&ident.name, &arg_vals)
                .ok_or_else(|| Flow::from(JexlError::Method(ident.name.to_string(), pos)))?;
            cache.set(shape, CachedAccessor::Method(Rc::clone(&m)));
            m
        };
        accessor.invoke(&Value::Null, &mut arg_vals).map_err(Flow::from)
    }

    fn eval_constructor_call(
        &mut self,
        class_name: &str,
        args: &[Expr],
        pos: Position,
        cache: &crate::ast::FuncallCache,
    ) -> EvalResult<Value> {
        let mut arg_vals = args.iter().map(|a| self.eval_expr(a)).collect::<EvalResult<Vec<_>>>()?;
        self.arithmetic.narrow_arguments(&mut arg_vals);
        // Each `ConstructorCall` AST node has a fixed `class_name` for its
        // whole lifetime, so the cache only ever needs to notice an arity
        // change at this call site — the shape's `target_type` is a
        // constant placeholder rather than `class_name` itself (which
        // isn't `'static`).
        let shape = CallShape { target_type: "constructor", arity: arg_vals.len() };
        let ctor = if let Some(CachedAccessor::Constructor(c)) = cache.get(&shape) {
            c
        } else {
            let c = self
                .introspection
                .get_constructor(class_name, &arg_vals)
                .ok_or_else(|| Flow::from(JexlError::Method(format!("new {class_name}"), pos)))?;
            cache.set(shape, CachedAccessor::Constructor(Rc::clone(&c)));
            c
        };
        ctor.invoke(&mut arg_vals).map_err(Flow::from)
    }

    fn eval_lambda(&mut self, def: &Rc<LambdaDef>) -> EvalResult<Value> {
        let const_capture = self.options.contains(EngineOptions::CONST_CAPTURE);
        let mut scope = Scope::with_params(def.params.iter().map(|p| Rc::clone(&p.name)));
        let mut captured = Vec::with_capacity(def.captures.len());
        for cap in &def.captures {
            let new_idx = scope.declare(Rc::clone(&cap.name));
            scope.mark_captured(new_idx);

            let outer_idx = cap.slot();
            let current = self.frame.get(outer_idx).cloned().unwrap_or(Value::Null);
            if const_capture {
                captured.push(current.flatten());
            } else {
                let cell = match current {
                    Value::Shared(cell) => cell,
                    other => Rc::new(RefCell::new(other)),
                };
                self.frame.set(outer_idx, Value::Shared(Rc::clone(&cell)));
                captured.push(Value::Shared(cell));
            }
        }
        Ok(Value::Closure(Rc::new(Closure {
            params: def.params.clone(),
            captures: def.captures.clone(),
            body: Rc::clone(&def.body),
            scope: Rc::new(scope),
            captured,
        })))
    }

    pub fn call_closure(&mut self, closure: &Rc<Closure>, args: Vec<Value>, pos: Position) -> EvalResult<Value> {
        let guard = CallDepthGuard::enter(self.global).ok_or_else(|| Flow::from(JexlError::StackOverflow(pos)))?;
        let mut frame = closure.scope.create_frame(args);
        for (i, value) in closure.captured.iter().enumerate() {
            frame.set(closure.params.len() + i, value.clone());
        }
        let mut sub = Interpreter {
            context: self.context,
            arithmetic: self.arithmetic,
            introspection: self.introspection,
            options: self.options,
            scope: Rc::clone(&closure.scope),
            frame,
            lexical: None,
            global: self.global,
        };
        let result = match sub.eval_block(&closure.body) {
            Ok(v) => Ok(v),
            Err(Flow::Return(v)) => Ok(v),
            Err(other) => Err(other),
        };
        drop(guard);
        result
    }

    // ---- assignment --------------------------------------------------

    fn eval_assign(&mut self, target: &Expr, value: &Expr, compound: Option<BinaryOp>, pos: Position) -> EvalResult<Value> {
        let rhs = self.eval_expr(value)?;
        let new_value = if let Some(op) = compound {
            let current = self.eval_expr(target)?;
            if let Some(overload) = op_overload(op).and_then(|o| self.arithmetic.try_assign_overload(o, &current, &rhs)) {
                overload.map_err(Flow::from)?
            } else {
                self.apply_binary(op, &current, &rhs, pos)?
            }
        } else {
            rhs
        };
        self.store(target, new_value.clone(), pos)?;
        Ok(new_value)
    }

    fn eval_inc_dec(&mut self, target: &Expr, delta: i64, is_post: bool, pos: Position) -> EvalResult<Value> {
        let current = self.eval_expr(target)?;
        let updated = self.arithmetic.add(&current, &Value::Int(delta), pos).map_err(Flow::from)?;
        self.store(target, updated.clone(), pos)?;
        Ok(if is_post { current } else { updated })
    }

    fn store(&mut self, target: &Expr, value: Value, pos: Position) -> EvalResult<()> {
        match target {
            Expr::Reference(ident) => self.store_reference(ident, value),
            Expr::Index { target, index, .. } => {
                let t = self.eval_expr(target)?;
                let i = self.eval_expr(index)?;
                match t.flatten() {
                    Value::Array(arr) => {
                        let n = i.as_int().ok_or_else(|| {
                            Flow::from(JexlError::Assignment("array index must be an integer".into(), pos))
                        })?;
                        let mut arr = arr.borrow_mut();
                        let idx = if n < 0 { n + arr.len() as i64 } else { n };
                        if idx < 0 {
                            return Err(Flow::from(JexlError::Assignment("negative array index".into(), pos)));
                        }
                        let idx = idx as usize;
                        if idx >= arr.len() {
                            arr.resize(idx + 1, Value::Null);
                        }
                        arr[idx] = value;
                        Ok(())
                    }
                    Value::Map(map) => {
                        let key = i
                            .as_str()
                            .ok_or_else(|| Flow::from(JexlError::Assignment("map key must be a string".into(), pos)))?;
                        map.borrow_mut().insert(key.to_string(), value);
                        Ok(())
                    }
                    other => Err(Flow::from(JexlError::Assignment(
                        format!("{} is not assignable by index", other.type_name()),
                        pos,
                    ))),
                }
            }
            Expr::Property { target, name, cache, .. } => {
                if let Some(prefix) = self.antish_chain_path(target) {
                    if self.antish_root_is_null(&prefix) {
                        let mut full = prefix;
                        full.push(name.clone());
                        return self.context.set(&full.join("."), value).map_err(Flow::from);
                    }
                }
                let t = self.eval_expr(target)?;
                let shape = CallShape { target_type: t.type_name(), arity: 1 };
                let setter = if let Some(CachedAccessor::Setter(s)) = cache.get(&shape) {
                    s
                } else {
                    let s = self
                        .introspection
                        .get_property_set(&t, name)
                        .ok_or_else(|| Flow::from(JexlError::Property(name.clone(), pos)))?;
                    cache.set(shape, CachedAccessor::Setter(Rc::clone(&s)));
                    s
                };
                setter.set(&t, value).map_err(Flow::from)
            }
            _ => Err(Flow::from(JexlError::Assignment("invalid assignment target".into(), pos))),
        }
    }

    fn store_reference(&mut self, ident: &Ident, value: Value) -> EvalResult<()> {
        match ident.kind {
            RefKind::Context => self.context.set(&ident.name, value).map_err(Flow::from),
            RefKind::Local(idx) => {
                if self.options.contains(EngineOptions::CONST_CAPTURE) && self.scope.is_captured(idx) {
                    return Err(Flow::from(JexlError::ConstCapture(ident.name.to_string(), ident.pos)));
                }
                match self.frame.get(idx).cloned() {
                    Some(Value::Shared(cell)) => *cell.borrow_mut() = value,
                    _ => self.frame.set(idx, value),
                }
                Ok(())
            }
        }
    }
}

fn label_matches(flow_label: &Option<Rc<str>>, loop_label: Option<&str>) -> bool {
    match (flow_label, loop_label) {
        (None, _) => true,
        (Some(fl), Some(ll)) => fl.as_ref() == ll,
        (Some(_), None) => false,
    }
}

fn op_overload(op: BinaryOp) -> Option<Operator> {
    Some(match op {
        BinaryOp::Add => Operator::Add,
        BinaryOp::Sub => Operator::Sub,
        BinaryOp::Mul => Operator::Mul,
        BinaryOp::Div => Operator::Div,
        BinaryOp::Rem => Operator::Rem,
        BinaryOp::BitAnd => Operator::BitAnd,
        BinaryOp::BitOr => Operator::BitOr,
        BinaryOp::BitXor => Operator::BitXor,
        BinaryOp::Shl => Operator::Shl,
        BinaryOp::Shr => Operator::Shr,
        BinaryOp::Eq => Operator::Eq,
        BinaryOp::Ne => Operator::Ne,
        BinaryOp::Lt => Operator::Lt,
        BinaryOp::Le => Operator::Le,
        BinaryOp::Gt => Operator::Gt,
        BinaryOp::Ge => Operator::Ge,
        BinaryOp::And | BinaryOp::Or | BinaryOp::In | BinaryOp::Matches | BinaryOp::NotMatches => return None,
    })
}

fn flow_to_jexl(flow: Flow) -> Box<JexlError> {
    match flow {
        Flow::Error(e) => e,
        Flow::Throw(v) => Box::new(JexlError::Throw(v, Position::NONE)),
        Flow::Cancel => Box::new(JexlError::Cancel(Position::NONE)),
        Flow::Return(_) | Flow::Break(_) | Flow::Continue(_) => {
            Box::new(JexlError::Runtime("unexpected control flow inside template expression".into(), Position::NONE))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::Arc;

    use indexmap::IndexMap;

    use crate::arithmetic::DefaultArithmetic;
    use crate::ast::FuncallCache;
    use crate::context::MapContext;
    use crate::introspection::{DefaultIntrospection, GetterAccessor, MethodAccessor};
    use crate::template::{prepare, TemplateExpr};
    use crate::types::FqcnResolver;

    fn fresh_global(cancelled: Rc<Cell<bool>>) -> GlobalState {
        GlobalState::new(Arc::new(FqcnResolver::new(None)), cancelled, 256)
    }

    /// Wraps [`MapContext`] to count reads of one watched name, so a
    /// short-circuit test can assert the never-evaluated side never ran.
    struct SpyContext {
        inner: MapContext,
        watch: &'static str,
        reads: Rc<Cell<u32>>,
    }

    impl Context for SpyContext {
        fn has(&self, name: &str) -> bool {
            self.inner.has(name)
        }
        fn get(&self, name: &str) -> Option<Value> {
            if name == self.watch {
                self.reads.set(self.reads.get() + 1);
            }
            self.inner.get(name)
        }
        fn set(&mut self, name: &str, value: Value) -> JexlResult<()> {
            self.inner.set(name, value)
        }
    }

    /// A context whose `get` flips a shared cancellation cell as a side
    /// effect of being read, used to make a statement's own evaluation trip
    /// cancellation *after* it already started, without the
    /// top-of-statement `check_cancelled` gate pre-empting it.
    struct FlipOnReadContext {
        inner: MapContext,
        cancelled: Rc<Cell<bool>>,
    }

    impl Context for FlipOnReadContext {
        fn has(&self, name: &str) -> bool {
            self.inner.has(name)
        }
        fn get(&self, name: &str) -> Option<Value> {
            if name == "trigger" {
                self.cancelled.set(true);
            }
            self.inner.get(name)
        }
        fn set(&mut self, name: &str, value: Value) -> JexlResult<()> {
            self.inner.set(name, value)
        }
    }

    /// Wraps [`DefaultIntrospection`], counting `get_method` calls so a
    /// safe-navigation test can assert method resolution was never reached.
    struct CountingIntrospection {
        inner: DefaultIntrospection,
        method_calls: Rc<Cell<u32>>,
    }

    impl Introspection for CountingIntrospection {
        fn get_method(&self, target: &Value, name: &str, args: &[Value]) -> Option<Rc<dyn MethodAccessor>> {
            self.method_calls.set(self.method_calls.get() + 1);
            self.inner.get_method(target, name, args)
        }
        fn get_property_get(&self, target: &Value, name: &str) -> Option<Rc<dyn GetterAccessor>> {
            self.inner.get_property_get(target, name)
        }
    }

    #[test]
    fn and_short_circuits_without_evaluating_rhs_and_returns_lhs_operand() {
        let reads = Rc::new(Cell::new(0u32));
        let mut ctx = SpyContext { inner: MapContext::new().with("probe", Value::Int(99)), watch: "probe", reads: Rc::clone(&reads) };
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let expr = Expr::Binary {
            op: BinaryOp::And,
            lhs: Box::new(Expr::Literal(Value::Int(0), pos)),
            rhs: Box::new(Expr::Reference(Ident::context("probe", pos))),
            pos,
        };
        let result = interp.eval_expr(&expr).unwrap();
        assert!(matches!(result, Value::Int(0)));
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn or_short_circuits_without_evaluating_rhs_and_returns_lhs_operand() {
        let reads = Rc::new(Cell::new(0u32));
        let mut ctx = SpyContext { inner: MapContext::new().with("probe", Value::Int(99)), watch: "probe", reads: Rc::clone(&reads) };
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let expr = Expr::Binary {
            op: BinaryOp::Or,
            lhs: Box::new(Expr::Literal(Value::Int(7), pos)),
            rhs: Box::new(Expr::Reference(Ident::context("probe", pos))),
            pos,
        };
        let result = interp.eval_expr(&expr).unwrap();
        assert!(matches!(result, Value::Int(7)));
        assert_eq!(reads.get(), 0);
    }

    #[test]
    fn and_returns_rhs_operand_uncoerced_when_lhs_truthy() {
        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let expr = Expr::Binary {
            op: BinaryOp::And,
            lhs: Box::new(Expr::Literal(Value::Int(7), pos)),
            rhs: Box::new(Expr::Literal(Value::string("hi"), pos)),
            pos,
        };
        let result = interp.eval_expr(&expr).unwrap();
        assert!(matches!(result, Value::Str(s) if &*s == "hi"));
    }

    #[test]
    fn safe_nav_short_circuits_to_null_without_erroring() {
        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: true,
            pos,
            cache: FuncallCache::default(),
        };
        let a_b_c = Expr::Property { target: Box::new(a_b), name: "c".into(), safe: true, pos, cache: FuncallCache::default() };
        let result = interp.eval_expr(&a_b_c).unwrap();
        assert!(matches!(result, Value::Null));
    }

    #[test]
    fn safe_nav_stops_at_first_null_without_invoking_method_resolution() {
        let calls = Rc::new(Cell::new(0u32));
        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = CountingIntrospection { inner: DefaultIntrospection, method_calls: Rc::clone(&calls) };
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: true,
            pos,
            cache: FuncallCache::default(),
        };
        let expr = Expr::MethodCall { target: Box::new(a_b), name: "c".into(), args: vec![], safe: true, pos, cache: FuncallCache::default() };
        let result = interp.eval_expr(&expr).unwrap();
        assert!(matches!(result, Value::Null));
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn safe_nav_resolves_through_real_values_to_a_non_null_leaf() {
        let mut inner_map = IndexMap::new();
        inner_map.insert("c".to_string(), Value::Int(5));
        let mut outer_map = IndexMap::new();
        outer_map.insert("b".to_string(), Value::map(inner_map));
        let mut ctx = MapContext::new().with("a", Value::map(outer_map));
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: true,
            pos,
            cache: FuncallCache::default(),
        };
        let a_b_c = Expr::Property { target: Box::new(a_b), name: "c".into(), safe: true, pos, cache: FuncallCache::default() };
        let result = interp.eval_expr(&a_b_c).unwrap();
        assert!(matches!(result, Value::Int(5)));
    }

    #[test]
    fn lexical_shade_blocks_inaccessible_captured_slot() {
        let mut scope = Scope::new();
        let idx = scope.declare("x");
        scope.mark_captured(idx);
        let scope = Rc::new(scope);
        let mut frame = scope.create_frame(Vec::<Value>::new());
        frame.declare(idx, Value::Int(1));

        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let mut interp =
            Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::LEXICAL_SHADE, Rc::clone(&scope), frame, &global);
        // A lexical frame is active (we are inside some block) but it never
        // declared `x` itself, so the captured outer slot stays shaded.
        interp.lexical = Some(Box::new(LexicalFrame::push(None, scope.len())));

        let ident = Ident::local("x", idx, Position::NONE);
        let err = interp.eval_reference(&ident).unwrap_err();
        assert!(matches!(err, Flow::Error(e) if matches!(*e, JexlError::LexicalShade(_, _))));
    }

    #[test]
    fn lexical_shade_allows_access_once_lexical_frame_declares_the_slot() {
        let mut scope = Scope::new();
        let idx = scope.declare("x");
        scope.mark_captured(idx);
        let scope = Rc::new(scope);
        let mut frame = scope.create_frame(Vec::<Value>::new());
        frame.declare(idx, Value::Int(42));

        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let mut interp =
            Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::LEXICAL_SHADE, Rc::clone(&scope), frame, &global);
        let mut lex = LexicalFrame::push(None, scope.len());
        lex.declare(idx, "x", &mut interp.frame, Position::NONE).unwrap();
        interp.lexical = Some(Box::new(lex));

        let ident = Ident::local("x", idx, Position::NONE);
        let result = interp.eval_reference(&ident).unwrap();
        assert!(matches!(result, Value::Int(42)));
    }

    #[test]
    fn try_catches_engine_raised_error_as_well_as_thrown_value() {
        let pos = Position::NONE;
        let mut scope = Scope::new();
        let e_idx = scope.declare("e");
        let scope = Rc::new(scope);
        let frame = scope.create_frame(Vec::<Value>::new());

        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        // `1.foo` has no property `foo` on an integer: an engine-raised
        // error, not a script-level `throw`.
        let body = Block {
            stmts: vec![Stmt::Expr(Expr::Property {
                target: Box::new(Expr::Literal(Value::Int(1), pos)),
                name: "foo".into(),
                safe: false,
                pos,
                cache: FuncallCache::default(),
            })],
            pos,
        };
        let catch = Catch {
            exception: Ident::local("e", e_idx, pos),
            class_filter: None,
            body: Block { stmts: vec![Stmt::Expr(Expr::Reference(Ident::local("e", e_idx, pos)))], pos },
        };

        let result = interp.exec_try(&[], &body, &[catch], None, pos).unwrap();
        assert!(matches!(result, Value::Str(s) if s.contains("foo")));
    }

    #[test]
    fn try_catch_binds_thrown_value_directly_as_cause() {
        let pos = Position::NONE;
        let mut scope = Scope::new();
        let e_idx = scope.declare("e");
        let scope = Rc::new(scope);
        let frame = scope.create_frame(Vec::<Value>::new());

        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let body = Block { stmts: vec![Stmt::Throw(Expr::Literal(Value::Int(99), pos), pos)], pos };
        let catch = Catch {
            exception: Ident::local("e", e_idx, pos),
            class_filter: None,
            body: Block { stmts: vec![Stmt::Expr(Expr::Reference(Ident::local("e", e_idx, pos)))], pos },
        };

        let result = interp.exec_try(&[], &body, &[catch], None, pos).unwrap();
        assert!(matches!(result, Value::Int(99)));
    }

    #[test]
    fn finally_runs_and_its_escape_overrides_a_normal_completion() {
        let pos = Position::NONE;
        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let body = Block { stmts: vec![Stmt::Expr(Expr::Literal(Value::Int(1), pos))], pos };
        let finally = Block { stmts: vec![Stmt::Return(Some(Expr::Literal(Value::Int(2), pos)), pos)], pos };

        let result = interp.exec_try(&[], &body, &[], Some(&finally), pos);
        assert!(matches!(result, Err(Flow::Return(v)) if matches!(v, Value::Int(2))));
    }

    #[test]
    fn cancel_raised_during_finally_always_wins_over_a_prior_uncaught_throw() {
        let cancelled = Rc::new(Cell::new(false));
        let mut ctx = FlipOnReadContext { inner: MapContext::new(), cancelled: Rc::clone(&cancelled) };
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = GlobalState::new(Arc::new(FqcnResolver::new(None)), Rc::clone(&cancelled), 256);
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::CANCELLABLE, scope, frame, &global);

        let pos = Position::NONE;
        // Reading "trigger" flips `cancelled` as a side effect, so the
        // throw itself completes (uncaught, no catches) before the flag
        // is observed anywhere — `finally`'s first statement is what
        // actually trips `check_cancelled`.
        let body = Block { stmts: vec![Stmt::Throw(Expr::Reference(Ident::context("trigger", pos)), pos)], pos };
        let finally = Block { stmts: vec![Stmt::Expr(Expr::Literal(Value::Int(0), pos))], pos };

        let result = interp.exec_try(&[], &body, &[], Some(&finally), pos);
        assert!(matches!(result, Err(Flow::Cancel)));
    }

    #[test]
    fn antish_resolves_multi_level_dotted_path_as_flat_context_key() {
        let mut ctx = MapContext::new().with("a.b.c", Value::Int(7));
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::ANTISH, scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: false,
            pos,
            cache: FuncallCache::default(),
        };
        let a_b_c = Expr::Property { target: Box::new(a_b), name: "c".into(), safe: false, pos, cache: FuncallCache::default() };
        let result = interp.eval_expr(&a_b_c).unwrap();
        assert!(matches!(result, Value::Int(7)));
    }

    #[test]
    fn antish_null_key_resolves_to_null_not_error() {
        let mut ctx = MapContext::new().with("a.b", Value::Null);
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::ANTISH, scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: false,
            pos,
            cache: FuncallCache::default(),
        };
        let result = interp.eval_expr(&a_b).unwrap();
        assert!(matches!(result, Value::Null));
    }

    #[test]
    fn antish_undefined_path_errors_as_unknown_variable() {
        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::ANTISH, scope, frame, &global);

        let pos = Position::NONE;
        let a_c = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "c".into(),
            safe: false,
            pos,
            cache: FuncallCache::default(),
        };
        let err = interp.eval_expr(&a_c).unwrap_err();
        assert!(matches!(err, Flow::Error(e) if matches!(*e, JexlError::Variable(ref key, _) if key == "a.c")));
    }

    #[test]
    fn antish_falls_back_for_method_call_receiver() {
        let pos = Position::NONE;
        let lambda_scope = Scope::with_params(["n"]);
        let n_idx = 0;
        let body = Rc::new(Block { stmts: vec![Stmt::Return(Some(Expr::Reference(Ident::local("n", n_idx, pos))), pos)], pos });
        let closure = Rc::new(Closure {
            params: vec![Ident::local("n", n_idx, pos)],
            captures: vec![],
            body,
            scope: Rc::new(lambda_scope),
            captured: vec![],
        });

        let mut ctx = MapContext::new().with("svc.lookup", Value::Closure(closure));
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::ANTISH, scope, frame, &global);

        let expr = Expr::MethodCall {
            target: Box::new(Expr::Reference(Ident::context("svc", pos))),
            name: "lookup".into(),
            args: vec![Expr::Literal(Value::Int(41), pos)],
            safe: false,
            pos,
            cache: FuncallCache::default(),
        };
        let result = interp.eval_expr(&expr).unwrap();
        assert!(matches!(result, Value::Int(41)));
    }

    #[test]
    fn antish_flattens_assignment_target_dotted_path() {
        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::ANTISH, scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: false,
            pos,
            cache: FuncallCache::default(),
        };
        let target = Expr::Property { target: Box::new(a_b), name: "c".into(), safe: false, pos, cache: FuncallCache::default() };
        interp.store(&target, Value::Int(5), pos).unwrap();
        assert!(matches!(interp.context.get("a.b.c"), Some(Value::Int(5))));
    }

    #[test]
    fn antish_prefix_resolves_as_object_when_full_key_absent() {
        let mut inner_map = IndexMap::new();
        inner_map.insert("c".to_string(), Value::Int(9));
        let mut ctx = MapContext::new().with("a.b", Value::map(inner_map));
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::<Value>::new());
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::ANTISH, scope, frame, &global);

        let pos = Position::NONE;
        let a_b = Expr::Property {
            target: Box::new(Expr::Reference(Ident::context("a", pos))),
            name: "b".into(),
            safe: false,
            pos,
            cache: FuncallCache::default(),
        };
        let a_b_c = Expr::Property { target: Box::new(a_b), name: "c".into(), safe: false, pos, cache: FuncallCache::default() };
        let result = interp.eval_expr(&a_b_c).unwrap();
        assert!(matches!(result, Value::Int(9)));
    }

    #[test]
    fn template_two_phase_bakes_immediate_and_keeps_deferred_live() {
        let mut scope = Scope::new();
        let n_idx = scope.declare("n");
        let scope = Rc::new(scope);
        let mut frame = scope.create_frame(Vec::<Value>::new());
        frame.declare(n_idx, Value::Int(1));

        let mut ctx = MapContext::new();
        let arith = DefaultArithmetic;
        let intro = DefaultIntrospection;
        let global = fresh_global(Rc::new(Cell::new(false)));
        let mut interp = Interpreter::new(&mut ctx, &arith, &intro, EngineOptions::empty(), scope, frame, &global);

        let pos = Position::NONE;
        let tree = TemplateExpr::Composite(vec![
            TemplateExpr::Immediate(Expr::Reference(Ident::local("n", n_idx, pos))),
            TemplateExpr::Constant("-".into()),
            TemplateExpr::Deferred(Expr::Reference(Ident::local("n", n_idx, pos))),
        ]);

        let prepared = prepare(tree, &mut |e| interp.eval_expr(e).map_err(flow_to_jexl)).unwrap();
        interp.frame.set(n_idx, Value::Int(2));
        let out = prepared.evaluate(&mut |e| interp.eval_expr(e).map_err(flow_to_jexl)).unwrap();

        assert_eq!(out, "1-2");
    }
}
