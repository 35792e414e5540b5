//! [`Script`]: a parsed, cacheable unit of JEXL ready to run repeatedly
//! against different contexts/arguments without re-parsing.

use std::sync::Arc;

use crate::ast::RootNode;
use crate::context::Context;
use crate::engine::{CancelHandle, Engine};
use crate::error::JexlResult;
use crate::options::CollectMode;
use crate::types::Value;

/// A compiled script or expression, bound to the [`Engine`] that parsed it.
/// Cheap to clone (an `Arc<RootNode>` plus a cloned `Engine` handle).
#[derive(Clone)]
pub struct Script {
    engine: Engine,
    root: Arc<RootNode>,
}

impl Script {
    pub(crate) fn new(engine: Engine, root: Arc<RootNode>) -> Self {
        Self { engine, root }
    }

    /// Run every statement in the script, returning the value of its last
    /// expression statement (or whatever a `return` produced).
    pub fn execute(&self, ctx: &mut dyn Context, args: Vec<Value>) -> JexlResult<Value> {
        self.engine.execute(ctx, &self.root, args)
    }

    /// Evaluate a script known to be a single expression; equivalent to
    /// [`Self::execute`] but named for the common `Engine::create_expression`
    /// call site.
    pub fn evaluate(&self, ctx: &mut dyn Context, args: Vec<Value>) -> JexlResult<Value> {
        self.execute(ctx, args)
    }

    /// Bind `ctx`/`args` now but defer running until [`Callable::invoke`] is
    /// called, keeping a [`CancelHandle`] the caller can flip in the
    /// meantime (e.g. from a timeout registered before invoking).
    #[must_use]
    pub fn callable(&self, args: Vec<Value>) -> Callable {
        Callable {
            engine: self.engine.clone(),
            root: Arc::clone(&self.root),
            args,
            cancel: CancelHandle::new(),
        }
    }

    /// Names of the script's declared parameters, in declaration order.
    #[must_use]
    pub fn get_parameters(&self) -> Vec<String> {
        self.root.scope.names()[..self.root.scope.arg_count()]
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Names of locals declared with `var` that aren't parameters.
    #[must_use]
    pub fn get_local_variables(&self) -> Vec<String> {
        self.root.scope.names()[self.root.scope.arg_count()..]
            .iter()
            .map(|n| n.to_string())
            .collect()
    }

    /// Dotted reference paths the script reads from its context, per the
    /// owning engine's configured [`CollectMode`].
    #[must_use]
    pub fn get_variables(&self) -> Vec<Vec<String>> {
        crate::engine::collect_variables(&self.root, self.collect_mode())
    }

    fn collect_mode(&self) -> CollectMode {
        self.engine.collect_mode()
    }

    /// The exact source text this script was parsed from.
    #[must_use]
    pub fn get_text(&self) -> &str {
        &self.root.source
    }

    /// A debug rendering of the parsed tree, not a reconstruction of JEXL
    /// syntax — useful for tests and troubleshooting, not round-tripping.
    #[must_use]
    pub fn dump(&self) -> String {
        format!("{:#?}", self.root.body)
    }
}

/// A script bound to arguments but not yet run, returned by
/// [`Script::callable`]. Lets a host obtain a [`CancelHandle`] before
/// kicking off evaluation.
pub struct Callable {
    engine: Engine,
    root: Arc<RootNode>,
    args: Vec<Value>,
    cancel: CancelHandle,
}

impl Callable {
    #[must_use]
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn invoke(self, ctx: &mut dyn Context) -> JexlResult<Value> {
        self.engine.execute_with_cancel(ctx, &self.root, self.args, &self.cancel)
    }
}
