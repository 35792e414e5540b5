//! Walks a parsed tree collecting the dotted reference paths it reads,
//! per [`crate::options::CollectMode`]. Used by `Script::get_variables`.

use crate::ast::{Block, Catch, Expr, LambdaDef, RefKind, Resource, Stmt};
use crate::options::CollectMode;
use crate::types::{Scope, Value};

#[must_use]
pub fn collect(block: &Block, scope: &Scope, mode: CollectMode) -> Vec<Vec<String>> {
    let mut paths = Vec::new();
    let mut walker = Walker { scope, mode, paths: &mut paths };
    walker.walk_block(block);
    paths
}

struct Walker<'a> {
    scope: &'a Scope,
    mode: CollectMode,
    paths: &'a mut Vec<Vec<String>>,
}

impl Walker<'_> {
    /// Walks `expr` as a (possible) dotted-reference chain. Returns the
    /// index into `self.paths` of the path this node extended, so a caller
    /// one level up (a `Property`/`Index` wrapping it) can keep appending.
    /// `None` means `expr` isn't part of a collecting chain — its own
    /// sub-expressions were still visited, fresh.
    fn walk_chain(&mut self, expr: &Expr) -> Option<usize> {
        match expr {
            Expr::Reference(ident) => match ident.kind {
                RefKind::Local(idx) if !self.scope.is_captured(idx) => None,
                _ => {
                    self.paths.push(vec![ident.name.to_string()]);
                    Some(self.paths.len() - 1)
                }
            },
            Expr::Property { target, name, .. } => {
                if let Some(path) = self.walk_chain(target) {
                    self.paths[path].push(name.clone());
                    Some(path)
                } else {
                    None
                }
            }
            Expr::Index { target, index, .. } => {
                let path = self.walk_chain(target);
                match (path, index.as_ref()) {
                    (Some(path), Expr::Literal(v, _)) if self.mode != CollectMode::Roots => {
                        let allowed = self.mode == CollectMode::Captured
                            || matches!(v, Value::Str(_) | Value::Int(_) | Value::Float(_));
                        if allowed {
                            self.paths[path].push(literal_segment(v));
                            Some(path)
                        } else {
                            self.walk_expr(index);
                            None
                        }
                    }
                    (Some(_), _) => {
                        self.walk_expr(index);
                        None
                    }
                    (None, _) => {
                        self.walk_expr(index);
                        None
                    }
                }
            }
            Expr::MethodCall { target, args, .. } => {
                // The method name itself isn't a variable; target/args are
                // visited as fresh roots, not chain continuations.
                self.walk_expr(target);
                for a in args {
                    self.walk_expr(a);
                }
                None
            }
            Expr::FunctionCall { args, .. } => {
                for a in args {
                    self.walk_expr(a);
                }
                None
            }
            other => {
                self.walk_expr(other);
                None
            }
        }
    }

    fn walk_expr(&mut self, expr: &Expr) {
        match expr {
            Expr::Reference(_) | Expr::Property { .. } | Expr::Index { .. } | Expr::MethodCall { .. } | Expr::FunctionCall { .. } => {
                self.walk_chain(expr);
            }
            Expr::ArrayLiteral(items, _) | Expr::SetLiteral(items, _) => {
                for i in items {
                    self.walk_expr(i);
                }
            }
            Expr::MapLiteral(entries, _) => {
                for (k, v) in entries {
                    self.walk_expr(k);
                    self.walk_expr(v);
                }
            }
            Expr::Unary { expr, .. } => self.walk_expr(expr),
            Expr::Binary { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            Expr::Ternary { cond, then_branch, else_branch, .. } => {
                self.walk_expr(cond);
                self.walk_expr(then_branch);
                self.walk_expr(else_branch);
            }
            Expr::Elvis { cond, else_branch, .. } => {
                self.walk_expr(cond);
                self.walk_expr(else_branch);
            }
            Expr::NullCoalesce { lhs, rhs, .. } => {
                self.walk_expr(lhs);
                self.walk_expr(rhs);
            }
            Expr::Range { start, end, .. } => {
                self.walk_expr(start);
                self.walk_expr(end);
            }
            Expr::InstanceOf { expr, .. } => self.walk_expr(expr),
            Expr::ConstructorCall { args, .. } => {
                for a in args {
                    self.walk_expr(a);
                }
            }
            Expr::Lambda(def) => self.walk_lambda(def),
            Expr::Assign { target, value, .. } => {
                self.walk_expr(target);
                self.walk_expr(value);
            }
            Expr::IncDec { target, .. } => self.walk_expr(target),
            Expr::Literal(..) | Expr::QualifiedIdent(..) | Expr::Template(..) => {}
        }
    }

    fn walk_lambda(&mut self, def: &LambdaDef) {
        if self.mode != CollectMode::Captured {
            return;
        }
        for cap in &def.captures {
            self.paths.push(vec![cap.name.to_string()]);
        }
        self.walk_block(&def.body);
    }

    fn walk_stmt(&mut self, stmt: &Stmt) {
        match stmt {
            Stmt::Expr(e) => self.walk_expr(e),
            Stmt::VarDecl { init, .. } => {
                if let Some(e) = init {
                    self.walk_expr(e);
                }
            }
            Stmt::Block(b) => self.walk_block(b),
            Stmt::If { cond, then_branch, else_branch, .. } => {
                self.walk_expr(cond);
                self.walk_block(then_branch);
                if let Some(b) = else_branch {
                    self.walk_block(b);
                }
            }
            Stmt::While { cond, body, .. } | Stmt::DoWhile { cond, body, .. } => {
                self.walk_expr(cond);
                self.walk_block(body);
            }
            Stmt::For { init, cond, update, body, .. } => {
                if let Some(i) = init {
                    self.walk_stmt(i);
                }
                if let Some(c) = cond {
                    self.walk_expr(c);
                }
                if let Some(u) = update {
                    self.walk_expr(u);
                }
                self.walk_block(body);
            }
            Stmt::ForEach { iterable, body, .. } => {
                self.walk_expr(iterable);
                self.walk_block(body);
            }
            Stmt::Try { resources, body, catches, finally, .. } => {
                for r in resources {
                    self.walk_resource(r);
                }
                self.walk_block(body);
                for c in catches {
                    self.walk_catch(c);
                }
                if let Some(f) = finally {
                    self.walk_block(f);
                }
            }
            Stmt::Throw(e, _) => self.walk_expr(e),
            Stmt::Return(e, _) => {
                if let Some(e) = e {
                    self.walk_expr(e);
                }
            }
            Stmt::Break(..) | Stmt::Continue(..) => {}
            Stmt::Annotated { args, target, .. } => {
                for a in args {
                    self.walk_expr(a);
                }
                self.walk_stmt(target);
            }
        }
    }

    fn walk_resource(&mut self, resource: &Resource) {
        self.walk_expr(&resource.init);
    }

    fn walk_catch(&mut self, catch: &Catch) {
        self.walk_block(&catch.body);
    }

    fn walk_block(&mut self, block: &Block) {
        for stmt in &block.stmts {
            self.walk_stmt(stmt);
        }
    }
}

fn literal_segment(v: &Value) -> String {
    match v {
        Value::Str(s) => s.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        other => format!("{other:?}"),
    }
}
