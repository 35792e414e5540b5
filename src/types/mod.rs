//! Core data types: the dynamic value space, static/dynamic variable
//! storage, closures, and name resolution.

pub mod closure;
pub mod fqcn;
pub mod lexical;
pub mod scope;
pub mod value;

pub use closure::Closure;
pub use fqcn::FqcnResolver;
pub use lexical::LexicalFrame;
pub use scope::{Frame, Scope, Slot};
pub use value::{HostObject, Value, ValueRange};
