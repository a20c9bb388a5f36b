use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use sp_types::DataTypeClass;
use tracing::debug;

use crate::error::CacheError;

/// Persistence for one opaque artifact per data-type class.
pub trait CacheStore {
    /// `Ok(None)` when nothing is stored for `class`.
    fn load(&self, class: DataTypeClass) -> Result<Option<Vec<u8>>, CacheError>;

    fn store(&self, class: DataTypeClass, bytes: &[u8]) -> Result<(), CacheError>;

    /// Removing an absent artifact succeeds.
    fn remove(&self, class: DataTypeClass) -> Result<(), CacheError>;
}

/// Process-local store; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryCacheStore {
    storage: Arc<Mutex<BTreeMap<DataTypeClass, Vec<u8>>>>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> Result<usize, CacheError> {
        let guard = self.storage.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(guard.len())
    }

    pub fn is_empty(&self) -> Result<bool, CacheError> {
        Ok(self.len()? == 0)
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, class: DataTypeClass) -> Result<Option<Vec<u8>>, CacheError> {
        let guard = self.storage.lock().map_err(|_| CacheError::LockPoisoned)?;
        Ok(guard.get(&class).cloned())
    }

    fn store(&self, class: DataTypeClass, bytes: &[u8]) -> Result<(), CacheError> {
        let mut guard = self.storage.lock().map_err(|_| CacheError::LockPoisoned)?;
        guard.insert(class, bytes.to_vec());
        Ok(())
    }

    fn remove(&self, class: DataTypeClass) -> Result<(), CacheError> {
        let mut guard = self.storage.lock().map_err(|_| CacheError::LockPoisoned)?;
        guard.remove(&class);
        Ok(())
    }
}

/// One `graph_data_cache_<CLASS>.json` file per class under a directory.
#[derive(Debug, Clone)]
pub struct FsCacheStore {
    dir: PathBuf,
}

impl FsCacheStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path_for(&self, class: DataTypeClass) -> PathBuf {
        self.dir
            .join(format!("graph_data_cache_{}.json", class.as_str()))
    }
}

impl CacheStore for FsCacheStore {
    fn load(&self, class: DataTypeClass) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.path_for(class);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }

    fn store(&self, class: DataTypeClass, bytes: &[u8]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir).map_err(|err| CacheError::io(&self.dir, err))?;
        let path = self.path_for(class);
        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)
                .map_err(|err| CacheError::io(&tmp_path, err))?;
            file.write_all(bytes)
                .and_then(|()| file.flush())
                .map_err(|err| CacheError::io(&tmp_path, err))?;
        }
        fs::rename(&tmp_path, &path).map_err(|err| CacheError::io(&path, err))?;
        debug!(path = %path.display(), "cache artifact written");
        Ok(())
    }

    fn remove(&self, class: DataTypeClass) -> Result<(), CacheError> {
        let path = self.path_for(class);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(CacheError::io(path, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use sp_types::DataTypeClass;

    use super::{CacheStore, FsCacheStore, MemoryCacheStore};

    #[test]
    fn memory_store_clones_share_storage() {
        let store = MemoryCacheStore::new();
        let alias = store.clone();
        store.store(DataTypeClass::Raw, b"abc").expect("store");
        assert_eq!(
            alias.load(DataTypeClass::Raw).expect("load"),
            Some(b"abc".to_vec())
        );
        alias.remove(DataTypeClass::Raw).expect("remove");
        assert!(store.is_empty().expect("len"));
        alias.remove(DataTypeClass::Raw).expect("absent remove is fine");
    }

    #[test]
    fn fs_store_uses_one_file_per_class() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FsCacheStore::new(dir.path().join("appdata"));
        assert_eq!(store.load(DataTypeClass::Processed).expect("load"), None);

        store
            .store(DataTypeClass::Processed, b"{\"v\":1}")
            .expect("store");
        assert!(
            dir.path()
                .join("appdata")
                .join("graph_data_cache_PDR.json")
                .exists()
        );
        assert_eq!(
            store.load(DataTypeClass::Processed).expect("load"),
            Some(b"{\"v\":1}".to_vec())
        );

        store.remove(DataTypeClass::Processed).expect("remove");
        store.remove(DataTypeClass::Processed).expect("second remove");
        assert_eq!(store.load(DataTypeClass::Processed).expect("load"), None);
    }
}
