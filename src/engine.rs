//! The `Engine`: the host-facing entry point that owns a [`Parser`], the
//! default [`Arithmetic`]/[`Introspection`] providers, the script cache, and
//! the engine-wide import roots. Everything else (a parsed script, a
//! prepared template) is a lightweight handle back into the `Engine` that
//! produced it.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::{Block, RootNode, Stmt};
use crate::context::Context;
use crate::error::{JexlError, JexlResult, Position};
use crate::eval::{GlobalState, Interpreter, ScriptCache};
use crate::introspection::{DefaultIntrospection, Introspection};
use crate::options::{CollectMode, EngineOptions};
use crate::parser::{Parser, SourceKey};
use crate::template::{self, PreparedTemplate, TemplateExpr};
use crate::types::{FqcnResolver, Scope, Value};
use crate::variables;
use crate::Arithmetic;
use crate::DefaultArithmetic;

thread_local! {
    /// The engines currently executing on this thread, innermost last.
    /// Lets a nested template/property-accessor evaluation (or a host
    /// callback invoked mid-dispatch) find its way back to the enclosing
    /// `Engine` without threading a reference through every call. Mirrors
    /// the source engine's thread-bound call-stack bookkeeping.
    static ENGINE_STACK: RefCell<Vec<*const EngineState>> = const { RefCell::new(Vec::new()) };
}

struct EngineStackGuard;

impl EngineStackGuard {
    fn enter(state: &EngineState) -> Self {
        ENGINE_STACK.with(|s| s.borrow_mut().push(std::ptr::from_ref(state)));
        Self
    }
}

impl Drop for EngineStackGuard {
    fn drop(&mut self) {
        ENGINE_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// A handle a host can flip from a nested callback (a registered function,
/// an annotation handler) to abort an in-progress evaluation. Cheap to
/// clone; every clone shares the same underlying flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Rc<Cell<bool>>);

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self(Rc::new(Cell::new(false)))
    }

    pub fn cancel(&self) {
        self.0.set(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.get()
    }

    fn cell(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.0)
    }
}

struct EngineState {
    parser: Option<Arc<dyn Parser>>,
    arithmetic: Box<dyn Arithmetic>,
    introspection: Box<dyn Introspection>,
    options: EngineOptions,
    cache: ScriptCache,
    fqcn: Arc<FqcnResolver>,
    stack_overflow: usize,
    collect_mode: CollectMode,
    charset: String,
}

/// Re-entrant, single-threaded script engine. Not `Send`/`Sync`: like the
/// engine it's modeled on, a `Value` graph can alias `Rc`/`RefCell` storage,
/// so sharing one `Engine` (or any value it produced) across threads isn't
/// supported — run one per thread instead.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineState>,
}

impl Engine {
    /// Build an engine around a host-supplied [`Parser`], with default
    /// [`DefaultArithmetic`]/[`DefaultIntrospection`] providers, a 64-entry
    /// script cache, and the default (cancellable-only) [`EngineOptions`].
    /// Chain `with_*` builder calls immediately after this, before sharing
    /// the `Engine` (they mutate in place and panic if a clone already
    /// exists).
    #[must_use]
    pub fn new(parser: Arc<dyn Parser>) -> Self {
        Self::from_state(EngineState {
            parser: Some(parser),
            arithmetic: Box::new(DefaultArithmetic::new()),
            introspection: Box::new(DefaultIntrospection),
            options: EngineOptions::default(),
            cache: ScriptCache::new(64, 64),
            fqcn: Arc::new(FqcnResolver::new(None)),
            stack_overflow: 512,
            collect_mode: CollectMode::default(),
            charset: "UTF-8".to_string(),
        })
    }

    /// An engine with no parser: every method that needs to parse source
    /// text fails with [`JexlError::Runtime`]. Useful for a host that only
    /// drives `invoke_method`/`new_instance` against pre-built `Value`s.
    #[must_use]
    pub fn without_parser() -> Self {
        Self::from_state(EngineState {
            parser: None,
            arithmetic: Box::new(DefaultArithmetic::new()),
            introspection: Box::new(DefaultIntrospection),
            options: EngineOptions::default(),
            cache: ScriptCache::new(64, 64),
            fqcn: Arc::new(FqcnResolver::new(None)),
            stack_overflow: 512,
            collect_mode: CollectMode::default(),
            charset: "UTF-8".to_string(),
        })
    }

    fn from_state(state: EngineState) -> Self {
        Self { inner: Rc::new(state) }
    }

    fn map_state(mut self, f: impl FnOnce(&mut EngineState)) -> Self {
        f(Rc::get_mut(&mut self.inner)
            .expect("Engine builder methods must be called before the engine is cloned"));
        self
    }

    #[must_use]
    pub fn with_arithmetic(self, arithmetic: impl Arithmetic + 'static) -> Self {
        self.map_state(|s| s.arithmetic = Box::new(arithmetic))
    }

    #[must_use]
    pub fn with_introspection(self, introspection: impl Introspection + 'static) -> Self {
        self.map_state(|s| s.introspection = Box::new(introspection))
    }

    #[must_use]
    pub fn with_options(self, options: EngineOptions) -> Self {
        self.map_state(|s| s.options = options)
    }

    #[must_use]
    pub fn with_cache(self, capacity: usize, threshold: usize) -> Self {
        self.map_state(|s| s.cache = ScriptCache::new(capacity, threshold))
    }

    #[must_use]
    pub fn with_stack_overflow(self, max_depth: usize) -> Self {
        self.map_state(|s| s.stack_overflow = max_depth)
    }

    #[must_use]
    pub fn with_collect_mode(self, mode: CollectMode) -> Self {
        self.map_state(|s| s.collect_mode = mode)
    }

    #[must_use]
    pub fn with_charset(self, charset: impl Into<String>) -> Self {
        self.map_state(|s| s.charset = charset.into())
    }

    #[must_use]
    pub fn charset(&self) -> &str {
        &self.inner.charset
    }

    pub fn import_class(&self, fqcn: impl Into<String>) {
        self.inner.fqcn.import_class(fqcn);
    }

    pub fn import_package(&self, package: impl Into<String>) {
        self.inner.fqcn.import_package(package);
    }

    #[must_use]
    pub fn new_cancel_handle(&self) -> CancelHandle {
        CancelHandle::new()
    }

    /// Parse `source` into a cached [`RootNode`], using this engine's
    /// configured options. Scripts that are textually and option-identical
    /// to a previous `parse` share the cached AST — see [`ScriptCache`].
    pub fn parse(&self, source: &str) -> JexlResult<Arc<RootNode>> {
        self.parse_with(source, self.inner.options)
    }

    fn parse_with(&self, source: &str, options: EngineOptions) -> JexlResult<Arc<RootNode>> {
        let _guard = EngineStackGuard::enter(&self.inner);
        let key = SourceKey::new(options, source);
        if let Some(cached) = self.inner.cache.get(&key) {
            return Ok(cached);
        }
        let parser = self.require_parser()?;
        let root = parser.parse(source, options, None)?;
        self.inner.cache.insert(key, Arc::clone(&root));
        Ok(root)
    }

    /// Parse a bare expression, bypassing the script cache (expressions are
    /// typically synthesized one-offs — property paths, template bodies —
    /// not re-parsed verbatim across calls).
    pub fn parse_expr(&self, source: &str) -> JexlResult<crate::ast::Expr> {
        let _guard = EngineStackGuard::enter(&self.inner);
        let parser = self.require_parser()?;
        Ok(parser.parse_expr(source, self.inner.options, None)?)
    }

    fn require_parser(&self) -> JexlResult<&Arc<dyn Parser>> {
        self.inner.parser.as_ref().ok_or_else(|| {
            Box::new(JexlError::Runtime(
                "this engine was built with Engine::without_parser and cannot parse source text".into(),
                Position::NONE,
            ))
        })
    }

    /// Compile `source` (a full script, possibly multiple statements) into a
    /// reusable [`crate::api::Script`].
    pub fn create_script(&self, source: &str) -> JexlResult<crate::api::Script> {
        let root = self.parse(source)?;
        Ok(crate::api::Script::new(self.clone(), root))
    }

    /// Compile `source` (a single expression) into a reusable
    /// [`crate::api::Script`] wrapping it in a one-statement body.
    pub fn create_expression(&self, source: &str) -> JexlResult<crate::api::Script> {
        let expr = self.parse_expr(source)?;
        let pos = expr.pos();
        let root = Arc::new(RootNode {
            body: Block { stmts: vec![Stmt::Expr(expr)], pos },
            scope: Rc::new(Scope::new()),
            source: source.into(),
            pragmas: Vec::new(),
        });
        Ok(crate::api::Script::new(self.clone(), root))
    }

    /// Build a [`PreparedTemplate`] (JXLT) from JXLT source: `${...}`
    /// (immediate) expressions are baked into literal text right away,
    /// evaluated against `ctx`; `#{...}` (deferred) expressions stay live
    /// and re-evaluate on every [`PreparedTemplate::evaluate`] call.
    pub fn create_template(&self, ctx: &mut dyn Context, source: &str) -> JexlResult<PreparedTemplate> {
        let _guard = EngineStackGuard::enter(&self.inner);
        let parser = self.require_parser()?;
        let tree: TemplateExpr = template::scan(source, parser.as_ref(), self.inner.options)?;
        let global = GlobalState::new(Arc::clone(&self.inner.fqcn), Rc::new(Cell::new(false)), self.inner.stack_overflow);
        let scope = Rc::new(Scope::new());
        let frame = scope.create_frame(Vec::new());
        let mut interp = Interpreter::new(
            ctx,
            self.inner.arithmetic.as_ref(),
            self.inner.introspection.as_ref(),
            self.inner.options,
            Rc::clone(&scope),
            frame,
            &global,
        );
        let mut eval_immediate = |e: &crate::ast::Expr| interp.eval_expr(e).map_err(flow_to_error);
        template::prepare(tree, &mut eval_immediate)
    }

    /// Run a parsed [`RootNode`] to completion: applies any `jexl.*`
    /// pragmas, builds a fresh [`Interpreter`], and folds its result per the
    /// engine's `silent`/`cancellable` configuration.
    pub fn execute(&self, ctx: &mut dyn Context, root: &RootNode, args: Vec<Value>) -> JexlResult<Value> {
        self.execute_with_cancel(ctx, root, args, &CancelHandle::new())
    }

    pub fn execute_with_cancel(
        &self,
        ctx: &mut dyn Context,
        root: &RootNode,
        args: Vec<Value>,
        cancel: &CancelHandle,
    ) -> JexlResult<Value> {
        let _guard = EngineStackGuard::enter(&self.inner);
        let mut options = self.inner.options;
        let fqcn = Arc::new(FqcnResolver::new(Some(Arc::clone(&self.inner.fqcn))));
        let mut namespaces = IndexMap::new();
        self.apply_pragmas(ctx, root, &mut options, &fqcn, &mut namespaces)?;

        let mut global = GlobalState::new(fqcn, cancel.cell(), self.inner.stack_overflow);
        global.namespaces = namespaces;

        let frame = root.scope.create_frame(args);
        let mut interp = Interpreter::new(
            ctx,
            self.inner.arithmetic.as_ref(),
            self.inner.introspection.as_ref(),
            options,
            Rc::clone(&root.scope),
            frame,
            &global,
        );
        self.finish(options, interp.run(&root.body))
    }

    fn finish(&self, options: EngineOptions, result: JexlResult<Value>) -> JexlResult<Value> {
        match result {
            Ok(v) => Ok(v),
            Err(e) if matches!(*e, JexlError::Cancel(_)) => Err(e),
            Err(e) if options.contains(EngineOptions::SILENT) => {
                log::warn!("evaluation error suppressed (silent mode): {e}");
                Ok(Value::Null)
            }
            Err(e) => Err(e),
        }
    }

    /// Iterate `root`'s `jexl.*` pragmas, giving `ctx` first refusal via
    /// [`Context::process_pragma`]/[`Context::process_module`]; anything the
    /// context doesn't claim is handled by the engine's own built-ins
    /// (`jexl.options`, `jexl.import`, `jexl.namespace.<name>`).
    fn apply_pragmas(
        &self,
        ctx: &mut dyn Context,
        root: &RootNode,
        options: &mut EngineOptions,
        fqcn: &Arc<FqcnResolver>,
        namespaces: &mut IndexMap<String, Value>,
    ) -> JexlResult<()> {
        for (key, value) in &root.pragmas {
            if ctx.process_pragma(options, key, value) {
                continue;
            }
            if key.as_ref() == "jexl.options" {
                apply_option_pragma(options, value);
            } else if key.as_ref() == "jexl.import" {
                apply_import_pragma(fqcn, value);
            } else if let Some(name) = key.strip_prefix("jexl.namespace.") {
                if let Some(class_name) = value.as_str() {
                    let resolved = self
                        .inner
                        .introspection
                        .get_class_by_name(&class_name)
                        .map_or_else(|| Value::string(Rc::clone(&class_name)), |c| Value::string(c.as_ref()));
                    namespaces.insert(name.to_string(), resolved);
                }
            } else if let Some(name) = key.strip_prefix("jexl.module.") {
                if let Some(loaded) = ctx.process_module(name, value) {
                    namespaces.insert(name.to_string(), loaded);
                } else if let Some(source) = value.as_str() {
                    let expr = self.parse_expr(&source)?;
                    let global = GlobalState::new(Arc::clone(fqcn), Rc::new(Cell::new(false)), self.inner.stack_overflow);
                    let scope = Rc::new(Scope::new());
                    let frame = scope.create_frame(Vec::new());
                    let mut interp = Interpreter::new(
                        ctx,
                        self.inner.arithmetic.as_ref(),
                        self.inner.introspection.as_ref(),
                        *options,
                        scope,
                        frame,
                        &global,
                    );
                    let value = interp.eval_expr(&expr).map_err(flow_to_error)?;
                    namespaces.insert(name.to_string(), value);
                }
            } else {
                log::debug!("unrecognized pragma {key:?}, ignoring");
            }
        }
        Ok(())
    }

    /// Read a bean property/index path, e.g. `"name"` or `"items[0]"`,
    /// synthesized as a script with `bean` bound to the register `#0` (so
    /// `"a.b"` parses to `#0.a.b`, `"[0]"` to `#0[0]`).
    pub fn get_property(&self, ctx: &mut dyn Context, bean: Value, expr: &str) -> JexlResult<Value> {
        let source = synthesize_path("#0", expr);
        let root = self.parse(&source)?;
        let mut wrapper = RegisterContext { inner: ctx, registers: vec![bean] };
        self.execute(&mut wrapper, &root, Vec::new())
    }

    /// Write to a bean property/index path; `value` is bound to register
    /// `#1` (`"a.b"` parses to `#0.a.b=#1`, `"[0]"` to `#0[0]=#1`).
    pub fn set_property(&self, ctx: &mut dyn Context, bean: Value, expr: &str, value: Value) -> JexlResult<()> {
        let path = synthesize_path("#0", expr);
        let source = format!("{path}=#1");
        let root = self.parse(&source)?;
        let mut wrapper = RegisterContext { inner: ctx, registers: vec![bean, value] };
        self.execute(&mut wrapper, &root, Vec::new())?;
        Ok(())
    }

    pub fn invoke_method(&self, target: &Value, name: &str, mut args: Vec<Value>) -> JexlResult<Value> {
        let accessor = self
            .inner
            .introspection
            .get_method(target, name, &args)
            .ok_or_else(|| Box::new(JexlError::Method(name.to_string(), Position::NONE)))?;
        accessor.invoke(target, &mut args)
    }

    /// Resolve and invoke a constructor for `class_name`. If no exact-arity
    /// match exists, [`Arithmetic::narrow_arguments`] is given one chance to
    /// coerce the arguments (e.g. `Float -> Int`) before retrying.
    pub fn new_instance(&self, class_name: &str, mut args: Vec<Value>) -> JexlResult<Value> {
        if let Some(ctor) = self.inner.introspection.get_constructor(class_name, &args) {
            return ctor.invoke(&mut args);
        }
        self.inner.arithmetic.narrow_arguments(&mut args);
        let ctor = self
            .inner
            .introspection
            .get_constructor(class_name, &args)
            .ok_or_else(|| Box::new(JexlError::Method(format!("new {class_name}"), Position::NONE)))?;
        ctor.invoke(&mut args)
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    #[must_use]
    pub fn cache_len(&self) -> usize {
        self.inner.cache.len()
    }

    pub(crate) fn collect_mode(&self) -> CollectMode {
        self.inner.collect_mode
    }

    pub(crate) fn arithmetic(&self) -> &dyn Arithmetic {
        self.inner.arithmetic.as_ref()
    }

    pub(crate) fn introspection(&self) -> &dyn Introspection {
        self.inner.introspection.as_ref()
    }

    pub(crate) fn default_options(&self) -> EngineOptions {
        self.inner.options
    }

    pub(crate) fn stack_overflow(&self) -> usize {
        self.inner.stack_overflow
    }

    pub(crate) fn root_fqcn(&self) -> Arc<FqcnResolver> {
        Arc::clone(&self.inner.fqcn)
    }
}

fn flow_to_error(flow: crate::eval::Flow) -> Box<JexlError> {
    match flow {
        crate::eval::Flow::Error(e) => e,
        crate::eval::Flow::Throw(v) => Box::new(JexlError::Throw(v, Position::NONE)),
        crate::eval::Flow::Cancel => Box::new(JexlError::Cancel(Position::NONE)),
        crate::eval::Flow::Return(_) | crate::eval::Flow::Break(_) | crate::eval::Flow::Continue(_) => {
            Box::new(JexlError::Runtime("unexpected control flow outside a statement body".into(), Position::NONE))
        }
    }
}

fn synthesize_path(register: &str, expr: &str) -> String {
    let expr = expr.trim();
    if expr.starts_with('[') {
        format!("{register}{expr}")
    } else {
        format!("{register}.{expr}")
    }
}

fn apply_option_pragma(options: &mut EngineOptions, value: &Value) {
    let Some(text) = value.as_str() else { return };
    for word in text.split_whitespace() {
        let flag = match word {
            "strict" => EngineOptions::STRICT,
            "safe" => EngineOptions::SAFE,
            "silent" => EngineOptions::SILENT,
            "cancellable" => EngineOptions::CANCELLABLE,
            "debug" => EngineOptions::DEBUG,
            "lexical" => EngineOptions::LEXICAL,
            "lexicalShade" => EngineOptions::LEXICAL_SHADE,
            "constCapture" => EngineOptions::CONST_CAPTURE,
            "antish" => EngineOptions::ANTISH,
            other => {
                log::debug!("unrecognized jexl.options flag {other:?}, ignoring");
                continue;
            }
        };
        options.insert(flag);
    }
}

fn apply_import_pragma(fqcn: &Arc<FqcnResolver>, value: &Value) {
    match value.flatten() {
        Value::Str(_) => {
            if let Some(s) = value.as_str() {
                import_one(fqcn, &s);
            }
        }
        Value::Array(items) => {
            for item in items.borrow().iter() {
                if let Some(s) = item.as_str() {
                    import_one(fqcn, &s);
                }
            }
        }
        _ => {}
    }
}

fn import_one(fqcn: &Arc<FqcnResolver>, name: &str) {
    if let Some(package) = name.strip_suffix(".*") {
        fqcn.import_package(package);
    } else {
        fqcn.import_class(name);
    }
}

/// Wraps a host [`Context`], intercepting the `#0`/`#1`/... registers
/// [`Engine::get_property`]/[`Engine::set_property`] synthesize scripts
/// around, and forwarding everything else to the wrapped context.
struct RegisterContext<'a> {
    inner: &'a mut dyn Context,
    registers: Vec<Value>,
}

impl Context for RegisterContext<'_> {
    fn has(&self, name: &str) -> bool {
        register_index(name).is_some() || self.inner.has(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        if let Some(idx) = register_index(name) {
            return self.registers.get(idx).cloned();
        }
        self.inner.get(name)
    }

    fn set(&mut self, name: &str, value: Value) -> JexlResult<()> {
        if let Some(idx) = register_index(name) {
            if idx < self.registers.len() {
                self.registers[idx] = value;
            }
            return Ok(());
        }
        self.inner.set(name, value)
    }

    fn resolve_namespace(&self, prefix: &str) -> Option<Value> {
        self.inner.resolve_namespace(prefix)
    }

    fn resolve_class_name(&self, name: &str) -> Option<String> {
        self.inner.resolve_class_name(name)
    }
}

fn register_index(name: &str) -> Option<usize> {
    name.strip_prefix('#').and_then(|s| s.parse::<usize>().ok())
}

pub(crate) fn collect_variables(root: &RootNode, mode: CollectMode) -> Vec<Vec<String>> {
    variables::collect(&root.body, &root.scope, mode)
}
