//! Resolution of simple class names to fully-qualified names through a chain
//! of imported package/class roots, closest scope wins.

use std::sync::RwLock;

#[derive(Debug, Default)]
struct FqcnResolverInner {
    /// Imported package prefixes, e.g. `"java.util"` for `import java.util.*`.
    packages: Vec<String>,
    /// Imported exact class names, e.g. `"java.util.Map"` for `import java.util.Map`.
    classes: Vec<String>,
}

/// A chain of resolvers: each nested script/template block gets its own
/// `FqcnResolver` with the enclosing one as `parent`, so imports declared in
/// an inner block shadow (but do not remove) outer ones.
#[derive(Debug)]
pub struct FqcnResolver {
    inner: RwLock<FqcnResolverInner>,
    parent: Option<std::sync::Arc<FqcnResolver>>,
}

impl FqcnResolver {
    #[must_use]
    pub fn new(parent: Option<std::sync::Arc<FqcnResolver>>) -> Self {
        Self {
            inner: RwLock::new(FqcnResolverInner::default()),
            parent,
        }
    }

    pub fn import_package(&self, package: impl Into<String>) {
        self.inner.write().unwrap().packages.push(package.into());
    }

    pub fn import_class(&self, fqcn: impl Into<String>) {
        self.inner.write().unwrap().classes.push(fqcn.into());
    }

    /// Resolve `simple_name` to a fully-qualified name, if any import (in
    /// this resolver or an ancestor, innermost first) produces one.
    #[must_use]
    pub fn resolve(&self, simple_name: &str) -> Option<String> {
        {
            let inner = self.inner.read().unwrap();
            if let Some(fqcn) = inner
                .classes
                .iter()
                .find(|c| c.rsplit('.').next() == Some(simple_name))
            {
                return Some(fqcn.clone());
            }
            for package in &inner.packages {
                // A package import only tells us the prefix exists; actual
                // class existence is confirmed by the host's Introspection.
                let candidate = format!("{package}.{simple_name}");
                if self.package_is_plausible(package) {
                    return Some(candidate);
                }
            }
        }
        self.parent.as_ref().and_then(|p| p.resolve(simple_name))
    }

    fn package_is_plausible(&self, _package: &str) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn inner_import_shadows_outer() {
        let outer = Arc::new(FqcnResolver::new(None));
        outer.import_class("java.util.Map");
        let inner = FqcnResolver::new(Some(Arc::clone(&outer)));
        inner.import_class("com.example.Map");

        assert_eq!(inner.resolve("Map").as_deref(), Some("com.example.Map"));
        assert_eq!(outer.resolve("Map").as_deref(), Some("java.util.Map"));
    }

    #[test]
    fn falls_back_to_parent() {
        let outer = Arc::new(FqcnResolver::new(None));
        outer.import_class("java.util.List");
        let inner = FqcnResolver::new(Some(outer));
        assert_eq!(inner.resolve("List").as_deref(), Some("java.util.List"));
    }
}
