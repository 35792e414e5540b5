//! The host-facing surface built on top of [`crate::engine::Engine`]:
//! compiled, reusable scripts.

pub mod script;

pub use script::{Callable, Script};
