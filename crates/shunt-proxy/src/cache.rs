//! Thread-safe memoization of compiled artifacts keyed by source text.
//!
//! Lookup takes a shared lock; on a miss the artifact is compiled *outside*
//! any lock (compilation may be costly and must not serialize readers), then
//! inserted under an exclusive lock. Two tasks racing on the same source may
//! both compile; the overwrite is idempotent so the race is harmless.
//!
//! `invalidate()` clears everything. Callers invoke it after any structural
//! configuration change; entries are never evicted otherwise.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::pattern::{CompiledBodyPattern, CompiledPattern};
use crate::scripting::CompiledProgram;

/// Generic source-text → compiled-artifact cache.
pub struct ArtifactCache<T> {
    entries: RwLock<HashMap<String, Arc<T>>>,
}

impl<T> Default for ArtifactCache<T> {
    fn default() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl<T> ArtifactCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached artifact for `source`, compiling it with `compile`
    /// on first use.
    pub fn get_or_compile<F>(&self, source: &str, compile: F) -> Arc<T>
    where
        F: FnOnce(&str) -> T,
    {
        if let Some(hit) = self.entries.read().get(source) {
            return Arc::clone(hit);
        }

        // Compile without holding any lock.
        let artifact = Arc::new(compile(source));

        let mut entries = self.entries.write();
        // A racing compile of the same source may have landed first; keep the
        // existing entry so callers observe a single artifact.
        Arc::clone(
            entries
                .entry(source.to_string())
                .or_insert_with(|| Arc::clone(&artifact)),
        )
    }

    /// Drop every cached entry.
    pub fn invalidate(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

/// The compiled-artifact caches owned by one engine instance.
///
/// Path and body patterns are cached separately: identical source text
/// compiles under different rules for each, so sharing a keyspace would
/// alias them.
#[derive(Default)]
pub struct Caches {
    pub patterns: ArtifactCache<CompiledPattern>,
    pub body_patterns: ArtifactCache<CompiledBodyPattern>,
    pub scripts: ArtifactCache<CompiledProgram>,
}

impl Caches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear every cache. Invoked after any structural configuration change.
    pub fn invalidate(&self) {
        self.patterns.invalidate();
        self.body_patterns.invalidate();
        self.scripts.invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn compiles_once_per_source() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        let compiles = AtomicUsize::new(0);

        let first = cache.get_or_compile("/users/:id", |s| {
            compiles.fetch_add(1, Ordering::SeqCst);
            s.to_uppercase()
        });
        let second = cache.get_or_compile("/users/:id", |s| {
            compiles.fetch_add(1, Ordering::SeqCst);
            s.to_uppercase()
        });

        assert_eq!(compiles.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn invalidate_forces_recompile() {
        let cache: ArtifactCache<usize> = ArtifactCache::new();
        let compiles = AtomicUsize::new(0);
        let compile = |_: &str| compiles.fetch_add(1, Ordering::SeqCst);

        cache.get_or_compile("a", compile);
        cache.invalidate();
        assert!(cache.is_empty());
        cache.get_or_compile("a", compile);

        assert_eq!(compiles.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn distinct_sources_distinct_entries() {
        let cache: ArtifactCache<String> = ArtifactCache::new();
        cache.get_or_compile("a", str::to_string);
        cache.get_or_compile("b", str::to_string);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn concurrent_lookups_converge() {
        let cache = Arc::new(ArtifactCache::<String>::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(std::thread::spawn(move || {
                cache.get_or_compile("shared", str::to_string)
            }));
        }
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        // All callers must observe the same artifact instance.
        for r in &results[1..] {
            assert!(Arc::ptr_eq(&results[0], r));
        }
        assert_eq!(cache.len(), 1);
    }
}
