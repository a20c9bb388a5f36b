use std::path::PathBuf;

use sp_types::DataTypeClass;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("in-memory cache store lock poisoned")]
    LockPoisoned,
    #[error("cache payload could not be encoded: {0}")]
    Encode(#[from] serde_json::Error),
    /// A persisted artifact failed validation. Never surfaced by
    /// [`crate::CacheManager`]; it is logged and treated as a miss.
    #[error("cached artifact for {class} is corrupt: {reason}")]
    Corruption {
        class: DataTypeClass,
        reason: String,
    },
}

impl CacheError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
