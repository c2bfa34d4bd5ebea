//! Installed-code cache.
//!
//! Stores the artifacts attached by the managed compiler, keyed by
//! (method, entry bci). The cache is thread-safe and designed for concurrent
//! read access with infrequent writes (install events).

use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use rustc_hash::FxHashMap;

use super::types::{CompileId, MethodId};

/// Cache key combining method identity and entry bci.
///
/// A method's normal entry and each of its OSR entries are distinct code
/// objects, so the cache must tell them apart.
pub type CacheKey = (MethodId, i32);

/// Artifact description handed over by the managed compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledArtifact {
    /// Size of the emitted machine code in bytes.
    pub code_size: usize,
    /// Name the managed side gave the code object.
    pub name: String,
}

/// An artifact after it has been attached to its compile request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledCode {
    pub method: MethodId,
    pub entry_bci: i32,
    /// Compile request that produced this code.
    pub compile_id: CompileId,
    pub code_size: usize,
    pub name: String,
}

impl InstalledCode {
    pub fn key(&self) -> CacheKey {
        (self.method, self.entry_bci)
    }
}

/// Inner state for the code cache (behind RwLock).
#[derive(Debug)]
struct CodeCacheInner {
    entries: FxHashMap<CacheKey, Arc<InstalledCode>>,
    insertion_order: VecDeque<CacheKey>,
    max_entries: usize,
}

/// Thread-safe cache of installed code with FIFO eviction.
///
/// When the cache reaches `max_entries`, the oldest entry (by insertion time)
/// is evicted. `get()` does not update access order, so this is FIFO, not LRU.
/// A `max_entries` of zero disables eviction.
#[derive(Debug, Clone)]
pub struct CodeCache {
    inner: Arc<RwLock<CodeCacheInner>>,
}

impl CodeCache {
    /// Create a new empty code cache with the given capacity.
    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            inner: Arc::new(RwLock::new(CodeCacheInner {
                entries: FxHashMap::default(),
                insertion_order: VecDeque::new(),
                max_entries,
            })),
        }
    }

    /// Create a new empty code cache with default capacity (4096).
    pub fn new() -> Self {
        Self::with_max_entries(4096)
    }

    /// Code installed for `key`, if it has not been evicted.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<InstalledCode>> {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.entries.get(key).cloned()
    }

    /// Insert installed code, evicting the oldest entry if at capacity.
    ///
    /// Re-installing an existing key replaces the entry without eviction.
    /// Returns the evicted entry, if any.
    pub fn insert(&self, code: Arc<InstalledCode>) -> Option<Arc<InstalledCode>> {
        let key = code.key();
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let mut inner = self.inner.write().unwrap();

        if let std::collections::hash_map::Entry::Occupied(mut e) = inner.entries.entry(key) {
            e.insert(code);
            return None;
        }

        let mut evicted = None;
        if inner.max_entries > 0
            && inner.entries.len() >= inner.max_entries
            && let Some(oldest) = inner.insertion_order.pop_front()
        {
            evicted = inner.entries.remove(&oldest);
        }

        inner.entries.insert(key, code);
        inner.insertion_order.push_back(key);
        evicted
    }

    pub fn len(&self) -> usize {
        #[expect(clippy::unwrap_used, reason = "RwLock poisoning is unrecoverable")]
        let inner = self.inner.read().unwrap();
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for CodeCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jit::types::INVOCATION_ENTRY_BCI;

    fn code(method: u64, entry_bci: i32, size: usize) -> Arc<InstalledCode> {
        Arc::new(InstalledCode {
            method: MethodId(method),
            entry_bci,
            compile_id: CompileId(method),
            code_size: size,
            name: format!("m{method}"),
        })
    }

    #[test]
    fn test_cache_insert_and_get() {
        let cache = CodeCache::new();
        let key = (MethodId(1), INVOCATION_ENTRY_BCI);
        assert!(cache.get(&key).is_none());
        assert!(cache.is_empty());

        cache.insert(code(1, INVOCATION_ENTRY_BCI, 128));

        assert_eq!(cache.get(&key).map(|c| c.code_size), Some(128));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_cache_separates_osr_entries() {
        let cache = CodeCache::new();
        cache.insert(code(7, INVOCATION_ENTRY_BCI, 64));
        cache.insert(code(7, 12, 96));

        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache.get(&(MethodId(7), 12)).map(|c| c.code_size),
            Some(96)
        );
    }

    #[test]
    fn test_cache_eviction_is_fifo() {
        let cache = CodeCache::with_max_entries(2);
        cache.insert(code(1, INVOCATION_ENTRY_BCI, 10));
        cache.insert(code(2, INVOCATION_ENTRY_BCI, 20));

        let evicted = cache.insert(code(3, INVOCATION_ENTRY_BCI, 30));

        assert_eq!(evicted.map(|c| c.method), Some(MethodId(1)));
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&(MethodId(1), INVOCATION_ENTRY_BCI)).is_none());
        assert!(cache.get(&(MethodId(3), INVOCATION_ENTRY_BCI)).is_some());
    }

    #[test]
    fn test_cache_reinstall_does_not_evict() {
        let cache = CodeCache::with_max_entries(2);
        cache.insert(code(1, INVOCATION_ENTRY_BCI, 10));
        cache.insert(code(2, INVOCATION_ENTRY_BCI, 20));

        assert!(cache.insert(code(1, INVOCATION_ENTRY_BCI, 99)).is_none());
        assert_eq!(cache.len(), 2);
        assert_eq!(
            cache
                .get(&(MethodId(1), INVOCATION_ENTRY_BCI))
                .map(|c| c.code_size),
            Some(99)
        );
    }
}
