//! Mapping logical store names to concrete stores.
//!
//! `LinkedNode`s reference point clouds in *other* stores by name. A
//! [`StoreResolver`] turns such a name into a live [`StoreRef`]. Resolvers
//! are plain caller-owned values passed where needed — there is no
//! process-wide registry.

use crate::error::{Error, Result};
use crate::storage::{FileStore, StoreRef};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

/// Resolve a logical store name to a concrete store.
pub trait StoreResolver: Debug + Send + Sync {
    /// Resolve `store_name`, or fail with `Error::NotFound` when the name is
    /// unknown to this resolver.
    fn resolve(&self, store_name: &str) -> Result<StoreRef>;
}

/// Shared handle to a resolver.
pub type ResolverRef = Arc<dyn StoreResolver>;

/// Treats the store name as a filesystem path and opens a [`FileStore`]
/// there. Opened stores are memoized per path.
#[derive(Debug, Default)]
pub struct IdentityResolver {
    open: parking_lot::Mutex<HashMap<String, StoreRef>>,
}

impl IdentityResolver {
    /// Create a new identity resolver.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreResolver for IdentityResolver {
    fn resolve(&self, store_name: &str) -> Result<StoreRef> {
        let mut open = self.open.lock();
        let store = open
            .entry(store_name.to_string())
            .or_insert_with(|| Arc::new(FileStore::new(store_name)) as StoreRef);
        Ok(store.clone())
    }
}

/// Explicit name → store map.
#[derive(Debug, Default)]
pub struct MapResolver {
    stores: HashMap<String, StoreRef>,
}

impl MapResolver {
    /// Create an empty map resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `store` under `name`, replacing any previous registration.
    pub fn insert(&mut self, name: impl Into<String>, store: StoreRef) {
        self.stores.insert(name.into(), store);
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, store: StoreRef) -> Self {
        self.insert(name, store);
        self
    }
}

impl StoreResolver for MapResolver {
    fn resolve(&self, store_name: &str) -> Result<StoreRef> {
        self.stores
            .get(store_name)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("store '{store_name}' not registered")))
    }
}

/// Substitutes the store name into a path template containing `%KEY%` and
/// opens a [`FileStore`] there. Opened stores are memoized per name.
#[derive(Debug)]
pub struct PatternResolver {
    template: String,
    open: parking_lot::Mutex<HashMap<String, StoreRef>>,
}

/// Placeholder replaced by the store name in a [`PatternResolver`] template.
pub const PATTERN_KEY: &str = "%KEY%";

impl PatternResolver {
    /// Create a pattern resolver from a template containing [`PATTERN_KEY`].
    pub fn new(template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(PATTERN_KEY) {
            return Err(Error::invalid_address(format!(
                "pattern template must contain {PATTERN_KEY}: {template}"
            )));
        }
        Ok(Self {
            template,
            open: parking_lot::Mutex::new(HashMap::new()),
        })
    }
}

impl StoreResolver for PatternResolver {
    fn resolve(&self, store_name: &str) -> Result<StoreRef> {
        let mut open = self.open.lock();
        let store = open.entry(store_name.to_string()).or_insert_with(|| {
            let path = self.template.replace(PATTERN_KEY, store_name);
            Arc::new(FileStore::new(path)) as StoreRef
        });
        Ok(store.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    #[test]
    fn test_map_resolver() {
        let store: StoreRef = Arc::new(MemoryStore::new());
        let resolver = MapResolver::new().with("scans", store);
        assert!(resolver.resolve("scans").is_ok());
        assert!(matches!(
            resolver.resolve("other"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_pattern_resolver_substitution() {
        let resolver = PatternResolver::new("/data/%KEY%/store").unwrap();
        let a = resolver.resolve("site-1").unwrap();
        let b = resolver.resolve("site-1").unwrap();
        // Memoized: same underlying store instance.
        assert!(Arc::ptr_eq(&a, &b));

        assert!(PatternResolver::new("/data/no-placeholder").is_err());
    }

    #[test]
    fn test_identity_resolver_memoizes() {
        let resolver = IdentityResolver::new();
        let a = resolver.resolve("/tmp/store-a").unwrap();
        let b = resolver.resolve("/tmp/store-a").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
