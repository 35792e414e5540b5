//! The host-facing evaluation context: variable storage plus a set of
//! optional capability hooks (pragma processing, annotation processing,
//! module loading, namespace/class-name resolution). Every hook has a
//! default no-op/passthrough implementation, so a host context only
//! overrides what it actually supports — the "capability test" pattern from
//! the evaluation-context design, expressed as Rust trait defaults instead
//! of runtime `instanceof` checks.

use indexmap::IndexMap;

use crate::error::JexlResult;
use crate::options::EngineOptions;
use crate::types::Value;

/// Bound at construction and threaded through every call, pragma, and
/// annotation hook, so a context can distinguish an engine-level import
/// from a script-level one without needing a back-reference to the engine.
pub trait Context {
    fn has(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    fn get(&self, name: &str) -> Option<Value>;

    fn set(&mut self, name: &str, value: Value) -> JexlResult<()>;

    /// Resolve a bare name against an imported namespace/package the
    /// context knows about (`jexl.namespace.<name>` pragmas register these).
    fn resolve_namespace(&self, _prefix: &str) -> Option<Value> {
        None
    }

    fn resolve_class_name(&self, _name: &str) -> Option<String> {
        None
    }

    /// Handle a `#pragma key = value` directive. Return `true` if handled;
    /// `false` lets the engine apply its own built-in pragmas
    /// (`jexl.options`, `jexl.import`) instead.
    fn process_pragma(&mut self, _options: &mut EngineOptions, _key: &str, _value: &Value) -> bool {
        false
    }

    /// Process an `@name(args)` annotation wrapping a statement. `next`
    /// evaluates the annotated statement (and any remaining annotations
    /// stacked on it) — call it to proceed, or skip it to suppress
    /// execution, mirroring the source's "AnnotatedCallable" chain.
    fn process_annotation(
        &mut self,
        _name: &str,
        _args: &[Value],
        next: &mut dyn FnMut(&mut dyn Context) -> JexlResult<Value>,
    ) -> JexlResult<Value> {
        next(self)
    }

    /// Resolve `jexl.module.<name> = <source>` to a loaded value (typically
    /// evaluating `source` as its own script and exposing the result as a
    /// namespace object). Default: modules aren't supported.
    fn process_module(&mut self, _name: &str, _source: &Value) -> Option<Value> {
        None
    }
}

/// A minimal [`Context`] backed by an ordered map, suitable for tests and
/// simple embeddings that don't need pragmas/annotations/modules.
#[derive(Debug, Default, Clone)]
pub struct MapContext {
    vars: IndexMap<String, Value>,
}

impl MapContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(name.into(), value.into());
        self
    }
}

impl Context for MapContext {
    fn has(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    fn get(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn set(&mut self, name: &str, value: Value) -> JexlResult<()> {
        self.vars.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_context_round_trips() {
        let mut ctx = MapContext::new().with("x", 1i64);
        assert!(ctx.has("x"));
        assert!(matches!(ctx.get("x"), Some(Value::Int(1))));
        ctx.set("y", Value::Bool(true)).unwrap();
        assert!(matches!(ctx.get("y"), Some(Value::Bool(true))));
    }

    #[test]
    fn default_pragma_hook_defers_to_engine() {
        let mut ctx = MapContext::new();
        let mut opts = EngineOptions::default();
        assert!(!ctx.process_pragma(&mut opts, "jexl.options", &Value::Null));
    }
}
