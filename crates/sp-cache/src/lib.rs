#![forbid(unsafe_code)]

//! Per-class result cache with coarse, generation-counted invalidation.
//!
//! Entries are computed on first need, kept in memory, and optionally
//! persisted through a [`CacheStore`]. Any change to the analysis inputs calls
//! [`CacheManager::invalidate`], which drops everything; there is no
//! dependency tracking.

mod envelope;
mod error;
mod store;

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sp_types::DataTypeClass;
use tracing::{debug, info, warn};

pub use envelope::{Decoded, ENVELOPE_VERSION, Envelope, decode, encode, sha256_hex};
pub use error::CacheError;
pub use store::{CacheStore, FsCacheStore, MemoryCacheStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Write computed entries through to the store and read them back on a
    /// cold start.
    pub persist: bool,
    /// Directory for [`FsCacheStore`]; `None` uses the caller's default
    /// directory (the session workspace).
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            persist: true,
            dir: None,
        }
    }
}

impl CacheConfig {
    /// The store this configuration describes. Persistent configurations
    /// write under `dir`, falling back to `default_dir`; the rest stay in
    /// memory.
    #[must_use]
    pub fn open_store(&self, default_dir: &Path) -> Box<dyn CacheStore> {
        if !self.persist {
            return Box::new(MemoryCacheStore::new());
        }
        let dir = self.dir.as_deref().unwrap_or(default_dir);
        Box::new(FsCacheStore::new(dir))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub store_hits: u64,
    pub recomputes: u64,
    pub corruptions: u64,
    pub invalidations: u64,
}

struct Entry<T> {
    generation: u64,
    value: Arc<T>,
}

pub struct CacheManager<T> {
    store: Box<dyn CacheStore>,
    config: CacheConfig,
    fingerprint: String,
    generation: u64,
    entries: BTreeMap<DataTypeClass, Entry<T>>,
    // Classes whose persisted artifact could not be cleared; never read
    // until a fresh value overwrites it.
    untrusted: BTreeSet<DataTypeClass>,
    stats: CacheStats,
}

impl<T> std::fmt::Debug for CacheManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("config", &self.config)
            .field("fingerprint", &self.fingerprint)
            .field("generation", &self.generation)
            .field("cached", &self.entries.keys().collect::<Vec<_>>())
            .field("untrusted", &self.untrusted)
            .field("stats", &self.stats)
            .finish()
    }
}

impl<T> CacheManager<T>
where
    T: Serialize + DeserializeOwned,
{
    /// A manager over `store`. Persisted artifacts carrying `fingerprint`
    /// are reused; nothing is cleared at construction.
    pub fn new(store: Box<dyn CacheStore>, config: CacheConfig, fingerprint: impl Into<String>) -> Self {
        Self {
            store,
            config,
            fingerprint: fingerprint.into(),
            generation: 0,
            entries: BTreeMap::new(),
            untrusted: BTreeSet::new(),
            stats: CacheStats::default(),
        }
    }

    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(
            Box::new(MemoryCacheStore::new()),
            CacheConfig::default(),
            String::new(),
        )
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats
    }

    #[must_use]
    pub fn is_cached(&self, class: DataTypeClass) -> bool {
        self.entries
            .get(&class)
            .is_some_and(|entry| entry.generation == self.generation)
    }

    /// Returns the entry for `class`, computing it with `recompute` when the
    /// current generation has none. A failed recompute caches nothing.
    pub fn get<E, F>(&mut self, class: DataTypeClass, recompute: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(entry) = self.entries.get(&class) {
            if entry.generation == self.generation {
                self.stats.hits += 1;
                debug!(%class, generation = self.generation, "cache hit");
                return Ok(Arc::clone(&entry.value));
            }
        }

        if let Some(value) = self.load_persisted(class) {
            self.stats.store_hits += 1;
            debug!(%class, "cache restored from store");
            let value = Arc::new(value);
            self.remember(class, Arc::clone(&value));
            return Ok(value);
        }

        self.stats.recomputes += 1;
        debug!(%class, generation = self.generation, "cache recompute");
        let value = Arc::new(recompute()?);
        self.remember(class, Arc::clone(&value));
        self.persist(class, &value);
        Ok(value)
    }

    /// Forgets every entry, in memory and persisted.
    pub fn invalidate(&mut self) {
        self.generation += 1;
        self.stats.invalidations += 1;
        self.entries.clear();
        for class in DataTypeClass::ALL {
            if let Err(err) = self.store.remove(class) {
                warn!(%class, error = %err, "failed to clear cached artifact; ignoring it until rewritten");
                self.untrusted.insert(class);
            }
        }
        info!(generation = self.generation, "cache invalidated");
    }

    /// Replaces the session fingerprint. A different value invalidates;
    /// returns whether it changed.
    pub fn set_fingerprint(&mut self, fingerprint: impl Into<String>) -> bool {
        let fingerprint = fingerprint.into();
        if fingerprint == self.fingerprint {
            return false;
        }
        self.fingerprint = fingerprint;
        self.invalidate();
        true
    }

    fn remember(&mut self, class: DataTypeClass, value: Arc<T>) {
        self.entries.insert(
            class,
            Entry {
                generation: self.generation,
                value,
            },
        );
    }

    fn load_persisted(&mut self, class: DataTypeClass) -> Option<T> {
        if !self.config.persist || self.untrusted.contains(&class) {
            return None;
        }
        let bytes = match self.store.load(class) {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(err) => {
                warn!(%class, error = %err, "cache store unreadable; recomputing");
                return None;
            }
        };
        match decode::<T>(class, &self.fingerprint, &bytes) {
            Ok(Decoded::Fresh(value)) => Some(value),
            Ok(Decoded::Stale { found }) => {
                debug!(%class, %found, expected = %self.fingerprint, "cached artifact is from another session");
                None
            }
            Err(err) => {
                self.stats.corruptions += 1;
                warn!(%class, error = %err, "discarding corrupt cache artifact");
                None
            }
        }
    }

    fn persist(&mut self, class: DataTypeClass, value: &T) {
        if !self.config.persist {
            return;
        }
        let written = encode(class, &self.fingerprint, self.generation, value)
            .and_then(|bytes| self.store.store(class, &bytes));
        match written {
            Ok(()) => {
                self.untrusted.remove(&class);
            }
            Err(err) => warn!(%class, error = %err, "failed to persist cache entry"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use sp_types::DataTypeClass;

    use super::{
        CacheConfig, CacheError, CacheManager, CacheStore, FsCacheStore, MemoryCacheStore,
    };

    fn manager(store: &MemoryCacheStore) -> CacheManager<Vec<f64>> {
        CacheManager::new(Box::new(store.clone()), CacheConfig::default(), "fp-1")
    }

    #[test]
    fn at_most_one_recompute_without_invalidation() {
        let calls = Cell::new(0);
        let mut cache = manager(&MemoryCacheStore::new());
        for _ in 0..3 {
            let value = cache
                .get(DataTypeClass::Raw, || {
                    calls.set(calls.get() + 1);
                    Ok::<_, String>(vec![1.0, 2.0])
                })
                .expect("get");
            assert_eq!(*value, vec![1.0, 2.0]);
        }
        assert_eq!(calls.get(), 1);
        assert_eq!(cache.stats().hits, 2);
    }

    #[test]
    fn invalidate_forces_exactly_one_recompute() {
        let calls = Cell::new(0);
        let mut cache = manager(&MemoryCacheStore::new());
        let fetch = |cache: &mut CacheManager<Vec<f64>>| {
            cache
                .get(DataTypeClass::Processed, || {
                    calls.set(calls.get() + 1);
                    Ok::<_, String>(vec![f64::from(calls.get())])
                })
                .expect("get")
        };
        assert_eq!(*fetch(&mut cache), vec![1.0]);
        cache.invalidate();
        assert!(!cache.is_cached(DataTypeClass::Processed));
        assert_eq!(*fetch(&mut cache), vec![2.0]);
        assert_eq!(*fetch(&mut cache), vec![2.0]);
        assert_eq!(calls.get(), 2);
        assert_eq!(cache.generation(), 1);
    }

    #[test]
    fn failed_recompute_caches_nothing_and_spares_other_classes() {
        let mut cache = manager(&MemoryCacheStore::new());
        cache
            .get(DataTypeClass::Raw, || Ok::<_, String>(vec![1.0]))
            .expect("raw");
        let err = cache
            .get(DataTypeClass::Source, || Err::<Vec<f64>, _>("Missing JSON".to_owned()))
            .expect_err("source fails");
        assert_eq!(err, "Missing JSON");
        assert!(!cache.is_cached(DataTypeClass::Source));
        assert!(cache.is_cached(DataTypeClass::Raw));
    }

    #[test]
    fn default_config_persists_under_the_fallback_directory() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CacheConfig::default();
        {
            let mut cache: CacheManager<Vec<f64>> =
                CacheManager::new(config.open_store(dir.path()), config.clone(), "fp");
            cache
                .get(DataTypeClass::Raw, || Ok::<_, String>(vec![7.0]))
                .expect("first run");
        }
        let store = FsCacheStore::new(dir.path());
        assert!(store.path_for(DataTypeClass::Raw).exists());

        let mut restarted: CacheManager<Vec<f64>> =
            CacheManager::new(config.open_store(dir.path()), config, "fp");
        let value = restarted
            .get(DataTypeClass::Raw, || Err::<Vec<f64>, _>("must not recompute"))
            .expect("restored");
        assert_eq!(*value, vec![7.0]);
    }

    #[test]
    fn persisted_entries_survive_a_restart() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = CacheConfig {
            persist: true,
            dir: Some(dir.path().to_path_buf()),
        };
        {
            let mut cache: CacheManager<Vec<f64>> =
                CacheManager::new(config.open_store(dir.path()), config.clone(), "fp");
            cache
                .get(DataTypeClass::Profile, || Ok::<_, String>(vec![4.5]))
                .expect("first run");
        }

        let mut restarted: CacheManager<Vec<f64>> =
            CacheManager::new(config.open_store(dir.path()), config.clone(), "fp");
        let value = restarted
            .get(DataTypeClass::Profile, || Err::<Vec<f64>, _>("must not recompute"))
            .expect("restored");
        assert_eq!(*value, vec![4.5]);
        assert_eq!(restarted.stats().store_hits, 1);

        // A different session never sees the old artifact.
        let mut other: CacheManager<Vec<f64>> =
            CacheManager::new(config.open_store(dir.path()), config, "other-fp");
        let value = other
            .get(DataTypeClass::Profile, || Ok::<_, String>(vec![0.0]))
            .expect("recomputed");
        assert_eq!(*value, vec![0.0]);
    }

    #[test]
    fn invalidate_clears_persisted_artifacts() {
        let store = MemoryCacheStore::new();
        let mut cache = manager(&store);
        cache
            .get(DataTypeClass::Raw, || Ok::<_, String>(vec![1.0]))
            .expect("raw");
        assert_eq!(store.len().expect("len"), 1);
        cache.invalidate();
        assert!(store.is_empty().expect("len"));
    }

    #[test]
    fn corrupt_artifact_is_a_miss() {
        let store = MemoryCacheStore::new();
        store
            .store(DataTypeClass::Raw, b"{ definitely not an envelope")
            .expect("seed");
        let mut cache = manager(&store);
        let value = cache
            .get(DataTypeClass::Raw, || Ok::<_, String>(vec![9.0]))
            .expect("recompute");
        assert_eq!(*value, vec![9.0]);
        assert_eq!(cache.stats().corruptions, 1);
        assert_eq!(cache.stats().recomputes, 1);
    }

    #[test]
    fn fingerprint_change_invalidates() {
        let mut cache = manager(&MemoryCacheStore::new());
        assert!(!cache.set_fingerprint("fp-1"));
        assert!(cache.set_fingerprint("fp-2"));
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.fingerprint(), "fp-2");
    }

    struct StuckStore {
        inner: MemoryCacheStore,
    }

    impl CacheStore for StuckStore {
        fn load(&self, class: DataTypeClass) -> Result<Option<Vec<u8>>, CacheError> {
            self.inner.load(class)
        }

        fn store(&self, class: DataTypeClass, bytes: &[u8]) -> Result<(), CacheError> {
            self.inner.store(class, bytes)
        }

        fn remove(&self, _class: DataTypeClass) -> Result<(), CacheError> {
            Err(CacheError::LockPoisoned)
        }
    }

    #[test]
    fn uncleared_artifact_is_never_read_back() {
        let inner = MemoryCacheStore::new();
        let mut cache: CacheManager<Vec<f64>> = CacheManager::new(
            Box::new(StuckStore {
                inner: inner.clone(),
            }),
            CacheConfig::default(),
            "fp",
        );
        cache
            .get(DataTypeClass::Raw, || Ok::<_, String>(vec![1.0]))
            .expect("first");
        cache.invalidate();
        let value = cache
            .get(DataTypeClass::Raw, || Ok::<_, String>(vec![2.0]))
            .expect("second");
        assert_eq!(*value, vec![2.0]);
        assert_eq!(cache.stats().store_hits, 0);
    }

    #[test]
    fn fs_store_path_follows_legacy_naming() {
        let store = FsCacheStore::new("amt_appdata");
        assert!(
            store
                .path_for(DataTypeClass::Source)
                .ends_with("graph_data_cache_SOURCE.json")
        );
    }
}
