//! Reflection over host values: method/property/constructor/iterator
//! resolution. An external collaborator — the crate ships [`DefaultIntrospection`]
//! for the built-in [`Value`] variants only; resolving into [`HostObject`]s is
//! entirely up to a host-supplied implementation.

use std::fmt;
use std::rc::Rc;

use crate::error::JexlResult;
use crate::types::Value;

/// A cached method accessor for one call-site shape.
pub trait MethodAccessor: fmt::Debug {
    fn invoke(&self, target: &Value, args: &mut [Value]) -> JexlResult<Value>;
}

pub trait ConstructorAccessor: fmt::Debug {
    fn invoke(&self, args: &mut [Value]) -> JexlResult<Value>;
}

pub trait GetterAccessor: fmt::Debug {
    fn get(&self, target: &Value) -> JexlResult<Value>;
}

pub trait SetterAccessor: fmt::Debug {
    fn set(&self, target: &Value, value: Value) -> JexlResult<()>;
}

pub trait IteratorAccessor: fmt::Debug {
    fn iterate(&self, target: &Value) -> JexlResult<Box<dyn Iterator<Item = Value>>>;
}

/// What a call-site's [`crate::ast::flags::FuncallCache`] stores: the
/// resolved accessor plus the call shape it was resolved for, so the
/// interpreter can detect a shape change (different target type, different
/// arity) and fall back to re-resolving through [`Introspection`] instead of
/// reusing a stale accessor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallShape {
    pub target_type: &'static str,
    pub arity: usize,
}

#[derive(Debug, Clone)]
pub enum CachedAccessor {
    Method(Rc<dyn MethodAccessor>),
    Getter(Rc<dyn GetterAccessor>),
    Setter(Rc<dyn SetterAccessor>),
    Constructor(Rc<dyn ConstructorAccessor>),
    Iterator(Rc<dyn IteratorAccessor>),
}

/// Host-supplied reflection: given a target value and a name/arity, produce
/// an accessor the interpreter can cache and re-invoke. Every method has a
/// default that returns `None`, so a host overriding only, say,
/// `get_method` still gets sane (non-panicking) behavior for the rest —
/// this is the trait-based equivalent of the capability tests described for
/// the evaluation context.
pub trait Introspection {
    fn get_method(&self, target: &Value, name: &str, args: &[Value]) -> Option<Rc<dyn MethodAccessor>> {
        let _ = (target, name, args);
        None
    }

    /// A free (not method-call) function reference, e.g. `func(x)` or a
    /// namespace-qualified `ns:func(x)`. Invoked the same way as a method,
    /// with `Value::Null` passed as the (unused) target.
    fn get_function(&self, name: &str, args: &[Value]) -> Option<Rc<dyn MethodAccessor>> {
        let _ = (name, args);
        None
    }

    fn get_constructor(&self, class_name: &str, args: &[Value]) -> Option<Rc<dyn ConstructorAccessor>> {
        let _ = (class_name, args);
        None
    }

    fn get_property_get(&self, target: &Value, name: &str) -> Option<Rc<dyn GetterAccessor>> {
        let _ = (target, name);
        None
    }

    fn get_property_set(&self, target: &Value, name: &str) -> Option<Rc<dyn SetterAccessor>> {
        let _ = (target, name);
        None
    }

    fn get_iterator(&self, target: &Value) -> Option<Rc<dyn IteratorAccessor>> {
        let _ = target;
        None
    }

    /// Resolve a fully-qualified class name to a host-recognized identity,
    /// used by `instanceof`/`new`. Returns the canonical name if known.
    fn get_class_by_name(&self, _name: &str) -> Option<Rc<str>> {
        None
    }

    /// Package/class roots implicitly imported regardless of script-level
    /// `jexl.import` pragmas (e.g. `java.lang` in the source JEXL engine).
    fn get_resolvers(&self) -> &[String] {
        &[]
    }
}

macro_rules! array_method {
    ($target:expr, $name:expr, $args:expr) => {{
        #[derive(Debug)]
        struct ArrayLen;
        impl MethodAccessor for ArrayLen {
            fn invoke(&self, target: &Value, _args: &mut [Value]) -> JexlResult<Value> {
                match target.flatten() {
                    Value::Array(a) => Ok(Value::Int(a.borrow().len() as i64)),
                    Value::Map(m) => Ok(Value::Int(m.borrow().len() as i64)),
                    Value::Str(s) => Ok(Value::Int(s.chars().count() as i64)),
                    _ => Ok(Value::Int(0)),
                }
            }
        }
        let _ = ($target, $name, $args);
        Rc::new(ArrayLen) as Rc<dyn MethodAccessor>
    }};
}

/// Resolves methods/properties/iteration for the engine's own [`Value`]
/// variants only (`size()`, map key access, array indexing, closure `.call()`
/// style iteration support). Anything beyond that — a [`crate::types::HostObject`]
/// — needs a host-supplied [`Introspection`].
#[derive(Debug, Default)]
pub struct DefaultIntrospection;

impl Introspection for DefaultIntrospection {
    fn get_method(&self, target: &Value, name: &str, args: &[Value]) -> Option<Rc<dyn MethodAccessor>> {
        match name {
            "size" | "length" => Some(array_method!(target, name, args)),
            _ => None,
        }
    }

    fn get_property_get(&self, target: &Value, name: &str) -> Option<Rc<dyn GetterAccessor>> {
        #[derive(Debug, Clone)]
        struct MapKeyGetter(String);
        impl GetterAccessor for MapKeyGetter {
            fn get(&self, target: &Value) -> JexlResult<Value> {
                match target.flatten() {
                    Value::Map(m) => Ok(m.borrow().get(&self.0).cloned().unwrap_or(Value::Null)),
                    _ => Ok(Value::Null),
                }
            }
        }
        match target.flatten() {
            Value::Map(_) => Some(Rc::new(MapKeyGetter(name.to_string()))),
            _ => None,
        }
    }

    fn get_property_set(&self, target: &Value, name: &str) -> Option<Rc<dyn SetterAccessor>> {
        #[derive(Debug, Clone)]
        struct MapKeySetter(String);
        impl SetterAccessor for MapKeySetter {
            fn set(&self, target: &Value, value: Value) -> JexlResult<()> {
                if let Value::Map(m) = target.flatten() {
                    m.borrow_mut().insert(self.0.clone(), value);
                }
                Ok(())
            }
        }
        match target.flatten() {
            Value::Map(_) => Some(Rc::new(MapKeySetter(name.to_string()))),
            _ => None,
        }
    }

    fn get_iterator(&self, target: &Value) -> Option<Rc<dyn IteratorAccessor>> {
        #[derive(Debug, Clone)]
        struct ValueIterator;
        impl IteratorAccessor for ValueIterator {
            fn iterate(&self, target: &Value) -> JexlResult<Box<dyn Iterator<Item = Value>>> {
                match target.flatten() {
                    Value::Array(a) => Ok(Box::new(a.borrow().clone().into_iter())),
                    Value::Map(m) => Ok(Box::new(
                        m.borrow().values().cloned().collect::<Vec<_>>().into_iter(),
                    )),
                    Value::Range(r) => Ok(Box::new(r.iter().map(Value::Int))),
                    Value::Str(s) => Ok(Box::new(
                        s.chars().map(|c| Value::string(c.to_string())).collect::<Vec<_>>().into_iter(),
                    )),
                    other => Ok(Box::new(std::iter::once(other))),
                }
            }
        }
        Some(Rc::new(ValueIterator))
    }
}
