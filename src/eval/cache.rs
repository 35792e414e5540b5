//! Caches an [`Engine`][crate::Engine] owns across calls: parsed scripts
//! keyed by source text + feature flags.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::ast::RootNode;
use crate::parser::SourceKey;

/// Bounded script cache: once `capacity` entries are held, the
/// oldest-inserted is evicted to make room (insertion-order eviction rather
/// than true LRU — see `DESIGN.md` for why that's an acceptable
/// simplification here). Scripts shorter than `threshold` characters aren't
/// cached at all, since re-parsing them is cheaper than the bookkeeping.
#[derive(Debug)]
pub struct ScriptCache {
    entries: RefCell<IndexMap<SourceKey, Arc<RootNode>>>,
    capacity: usize,
    threshold: usize,
}

impl ScriptCache {
    #[must_use]
    pub fn new(capacity: usize, threshold: usize) -> Self {
        Self {
            entries: RefCell::new(IndexMap::new()),
            capacity,
            threshold,
        }
    }

    #[must_use]
    pub fn get(&self, key: &SourceKey) -> Option<Arc<RootNode>> {
        self.entries.borrow().get(key).cloned()
    }

    pub fn insert(&self, key: SourceKey, node: Arc<RootNode>) {
        if key.source.len() < self.threshold || self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.borrow_mut();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            if let Some((evicted, _)) = entries.shift_remove_index(0) {
                log::debug!("script cache full ({} entries): evicting {:?}", self.capacity, evicted.source);
            }
        }
        entries.insert(key, node);
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::stmt::Block;
    use crate::error::Position;
    use crate::options::EngineOptions;
    use crate::types::Scope;
    use std::rc::Rc;

    fn node(source: &str) -> Arc<RootNode> {
        Arc::new(RootNode {
            body: Block { stmts: vec![], pos: Position::NONE },
            scope: Rc::new(Scope::new()),
            source: source.into(),
            pragmas: Vec::new(),
        })
    }

    #[test]
    fn below_threshold_is_not_cached() {
        let cache = ScriptCache::new(10, 5);
        let key = SourceKey::new(EngineOptions::empty(), "1+1");
        cache.insert(key.clone(), node("1+1"));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn eviction_drops_oldest() {
        let cache = ScriptCache::new(1, 0);
        let a = SourceKey::new(EngineOptions::empty(), "aaaa");
        let b = SourceKey::new(EngineOptions::empty(), "bbbb");
        cache.insert(a.clone(), node("aaaa"));
        cache.insert(b.clone(), node("bbbb"));
        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
    }
}
