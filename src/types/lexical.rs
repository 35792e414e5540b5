//! Runtime block scoping for the `lexical` engine option.
//!
//! Without `lexical`, every `var` redeclaration shares one [`super::scope::Slot`]
//! and lives for the whole frame (flat, function-scoped locals, like plain
//! JavaScript `var`). With `lexical`, entering `{ ... }` pushes a
//! [`LexicalFrame`]; a `var` that redeclares a name already visible in an
//! enclosing block shadows it for the block's duration and the prior value
//! is restored when the block exits.

use super::scope::Frame;
use crate::error::{JexlError, Position};

#[derive(Debug)]
pub struct LexicalFrame {
    /// Slot indices declared directly in this block.
    declared_here: Vec<bool>,
    /// Saved `(index, prior_value)` pairs for slots this block shadowed.
    shadowed: Vec<(usize, Value)>,
    parent: Option<Box<LexicalFrame>>,
}

use super::value::Value;

impl LexicalFrame {
    #[must_use]
    pub fn push(parent: Option<Box<LexicalFrame>>, scope_len: usize) -> Self {
        Self {
            declared_here: vec![false; scope_len],
            shadowed: Vec::new(),
            parent,
        }
    }

    #[must_use]
    pub fn is_declared_here(&self, idx: usize) -> bool {
        self.declared_here.get(idx).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn is_declared_anywhere(&self, idx: usize) -> bool {
        self.is_declared_here(idx)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.is_declared_anywhere(idx))
    }

    /// Declare slot `idx` in this block. If an enclosing scope already has a
    /// live value there, save it so it can be restored on [`Self::pop`].
    /// Errors with `LexicalRedeclaration` if `idx` was already declared in
    /// *this* block (re-`var`-ing the same name twice in one block).
    pub fn declare(
        &mut self,
        idx: usize,
        name: &str,
        frame: &mut Frame,
        pos: Position,
    ) -> Result<(), Box<JexlError>> {
        if self.is_declared_here(idx) {
            return Err(Box::new(JexlError::LexicalRedeclaration(
                name.to_string(),
                pos,
            )));
        }
        if frame.is_declared(idx) {
            if let Some(v) = frame.get(idx) {
                self.shadowed.push((idx, v.clone()));
            }
        }
        self.declared_here[idx] = true;
        Ok(())
    }

    /// Undo every declaration this block made: restore shadowed slots to
    /// their prior value, undeclare slots that had none. Returns the parent
    /// frame, to be installed as the new current lexical frame.
    #[must_use]
    pub fn pop(mut self, frame: &mut Frame) -> Option<Box<LexicalFrame>> {
        for idx in (0..self.declared_here.len()).rev() {
            if !self.declared_here[idx] {
                continue;
            }
            frame.undeclare(idx);
        }
        while let Some((idx, value)) = self.shadowed.pop() {
            frame.declare(idx, value);
        }
        self.parent
    }
}
