//! Per-node bit flags and the mutable call-site cache slot.

use std::cell::RefCell;

use bitflags::bitflags;

use crate::introspection::{CachedAccessor, CallShape};

bitflags! {
    /// Flags a node's static analysis can set once and the interpreter reads
    /// many times (constant folding, assignment-target validation).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeFlags: u8 {
        /// Evaluates to the same value on every evaluation (a literal, or a
        /// composite built only from constants).
        const CONSTANT = 0b0001;
        /// Valid as the left-hand side of an assignment (a reference,
        /// index, or property-access node).
        const SAFE_LHS = 0b0010;
    }
}

/// The mutable, single-slot cache attached to a call/property/constructor
/// node: on a cache hit (the last resolved [`CallShape`] still matches), the
/// interpreter invokes the cached accessor directly instead of calling back
/// into [`crate::introspection::Introspection`]. Replace-on-miss: a shape
/// change simply overwrites the slot, no eviction policy beyond that.
#[derive(Debug, Default)]
pub struct FuncallCache(RefCell<Option<FuncallCacheEntry>>);

#[derive(Debug, Clone)]
struct FuncallCacheEntry {
    accessor: CachedAccessor,
    shape: CallShape,
}

impl FuncallCache {
    #[must_use]
    pub fn get(&self, shape: &CallShape) -> Option<CachedAccessor> {
        self.0
            .borrow()
            .as_ref()
            .filter(|e| &e.shape == shape)
            .map(|e| e.accessor.clone())
    }

    pub fn set(&self, shape: CallShape, accessor: CachedAccessor) {
        *self.0.borrow_mut() = Some(FuncallCacheEntry { accessor, shape });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::introspection::ConstructorAccessor;

    #[derive(Debug)]
    struct Dummy;
    impl ConstructorAccessor for Dummy {
        fn invoke(&self, _args: &mut [crate::types::Value]) -> crate::error::JexlResult<crate::types::Value> {
            Ok(crate::types::Value::Null)
        }
    }

    #[test]
    fn miss_on_shape_change_then_hit() {
        let cache = FuncallCache::default();
        let shape_a = CallShape { target_type: "string", arity: 1 };
        let shape_b = CallShape { target_type: "integer", arity: 1 };
        assert!(cache.get(&shape_a).is_none());
        cache.set(shape_a.clone(), CachedAccessor::Constructor(std::rc::Rc::new(Dummy)));
        assert!(cache.get(&shape_a).is_some());
        assert!(cache.get(&shape_b).is_none());
    }
}
