//! An embeddable expression and script language engine: a JEXL-style
//! grammar (property access, safe navigation, lambdas, `try`/`catch`,
//! JXLT-style string templates) evaluated by a tree-walking interpreter over
//! a host-extensible value and introspection model.
//!
//! This crate defines the data model, the evaluator, and the [`Engine`]/
//! [`Script`] facade; it ships no lexer or grammar of its own. A host
//! supplies one by implementing [`Parser`] and handing it to
//! [`Engine::new`]. [`MapContext`] and [`DefaultArithmetic`]/
//! [`DefaultIntrospection`] are provided as minimal, ready-to-use defaults.
//!
//! ```ignore
//! let engine = Engine::new(Arc::new(MyParser));
//! let mut ctx = MapContext::new().with("x", 21i64);
//! let script = engine.create_expression("x * 2")?;
//! assert!(matches!(script.evaluate(&mut ctx, vec![])?, Value::Int(42)));
//! ```

pub mod api;
pub mod arithmetic;
pub mod ast;
pub mod context;
pub mod engine;
pub mod error;
pub mod eval;
pub mod introspection;
pub mod options;
pub mod parser;
pub mod template;
pub mod types;

mod variables;

pub use api::{Callable, Script};
pub use arithmetic::{Arithmetic, DefaultArithmetic, Operator, StrictArithmetic};
pub use context::{Context, MapContext};
pub use engine::{CancelHandle, Engine};
pub use error::{JexlError, JexlResult, ParseError, Position};
pub use introspection::{
    CachedAccessor, CallShape, ConstructorAccessor, DefaultIntrospection, GetterAccessor,
    Introspection, IteratorAccessor, MethodAccessor, SetterAccessor,
};
pub use options::{CollectMode, EngineOptions};
pub use parser::{Parser, SourceKey};
pub use template::PreparedTemplate;
pub use types::{Closure, Frame, FqcnResolver, HostObject, Scope, Slot, Value, ValueRange};

/// AST node shapes and the funcall cache, exposed for hosts writing a
/// [`Parser`] against this crate's tree shape. Not needed for ordinary
/// embedding — only when building or introspecting the tree itself.
#[cfg(feature = "internals")]
pub mod internals {
    pub use crate::ast::*;
}
