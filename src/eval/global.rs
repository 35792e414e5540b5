//! State shared across one `Engine::execute`/`evaluate` call tree: the
//! import/namespace resolver chain, the cancellation flag a host can flip
//! from another thread, and the call-depth counter that backs the
//! stack-overflow check.

use std::cell::Cell;
use std::rc::Rc;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::types::{FqcnResolver, Value};

#[derive(Debug)]
pub struct GlobalState {
    pub fqcn: Arc<FqcnResolver>,
    pub namespaces: IndexMap<String, Value>,
    pub cancelled: Rc<Cell<bool>>,
    pub depth: Cell<usize>,
    pub max_depth: usize,
}

impl GlobalState {
    #[must_use]
    pub fn new(fqcn: Arc<FqcnResolver>, cancelled: Rc<Cell<bool>>, max_depth: usize) -> Self {
        Self {
            fqcn,
            namespaces: IndexMap::new(),
            cancelled,
            depth: Cell::new(0),
            max_depth,
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.get()
    }

    /// Push one call frame; `Err` means the configured recursion limit was
    /// exceeded. Always pair with [`Self::leave_call`] (the interpreter does
    /// so via a drop guard) so a thrown error doesn't leak depth.
    pub fn enter_call(&self) -> bool {
        let next = self.depth.get() + 1;
        if next > self.max_depth {
            return false;
        }
        self.depth.set(next);
        true
    }

    pub fn leave_call(&self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// RAII guard pairing [`GlobalState::enter_call`]/[`GlobalState::leave_call`],
/// so an early return (an error, a `Flow` escape) still unwinds the depth
/// counter. Named after the source's own `RestoreOnDrop` pattern.
pub struct CallDepthGuard<'a> {
    global: &'a GlobalState,
}

impl<'a> CallDepthGuard<'a> {
    #[must_use]
    pub fn enter(global: &'a GlobalState) -> Option<Self> {
        if global.enter_call() {
            Some(Self { global })
        } else {
            None
        }
    }
}

impl Drop for CallDepthGuard<'_> {
    fn drop(&mut self) {
        self.global.leave_call();
    }
}
