//! Module source caching.
//!
//! This module provides a thread-safe cache of fetched module sources,
//! so that each URL is downloaded at most once per playground.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A thread-safe cache of module sources.
///
/// Sources are keyed by the fully resolved URL they were fetched from, so
/// `lodash` and `lodash@4.17.21` are distinct entries.
///
/// # Example
///
/// ```rust
/// use js_playground_sandbox_rs::playground::cache::ModuleCache;
///
/// let cache = ModuleCache::new();
/// let first = cache.insert("https://unpkg.com/left-pad", "module.exports = 1;");
/// let second = cache.insert("https://unpkg.com/left-pad", "module.exports = 2;");
///
/// // The first source wins; later inserts return the cached one.
/// assert_eq!(&*second, "module.exports = 1;");
/// assert_eq!(first, second);
/// ```
#[derive(Debug, Default)]
pub struct ModuleCache {
    /// The cached sources, keyed by URL.
    cache: RwLock<HashMap<String, Arc<str>>>,
}

impl ModuleCache {
    /// Create a new empty module cache.
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Get the cached source for a URL.
    pub fn get(&self, url: &str) -> Option<Arc<str>> {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.get(url).map(Arc::clone)
    }

    /// Cache a source unless the URL is already present.
    ///
    /// Returns the source that ends up cached for `url`.
    pub fn insert(&self, url: impl Into<String>, source: impl Into<Arc<str>>) -> Arc<str> {
        let url = url.into();
        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        // Another fetch of the same URL may have finished first
        if let Some(existing) = cache.get(&url) {
            return Arc::clone(existing);
        }
        let source = source.into();
        cache.insert(url, Arc::clone(&source));
        source
    }

    /// Get the number of cached sources.
    pub fn len(&self) -> usize {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.len()
    }

    /// Check if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
