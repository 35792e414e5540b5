//! Control flow modeled as data, since Rust has no cheap stack-unwinding
//! exceptions to route `return`/`break`/`continue`/script-level `throw`
//! through a tree-walking evaluator.

use std::rc::Rc;

use crate::error::JexlError;
use crate::types::Value;

#[derive(Debug)]
pub enum Flow {
    Return(Value),
    Break(Option<Rc<str>>),
    Continue(Option<Rc<str>>),
    Cancel,
    Throw(Value),
    Error(Box<JexlError>),
}

pub type EvalResult<T> = Result<T, Flow>;

impl From<Box<JexlError>> for Flow {
    fn from(e: Box<JexlError>) -> Self {
        Flow::Error(e)
    }
}

impl From<JexlError> for Flow {
    fn from(e: JexlError) -> Self {
        Flow::Error(Box::new(e))
    }
}
