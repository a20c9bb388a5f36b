#![forbid(unsafe_code)]

//! Session state that lives next to the analysis core: engine/build
//! metadata, the formula store, local comments, plot specs, and the zip
//! archive that bundles them.

mod archive;
mod comments;
mod debounce;
mod formula_store;
mod metadata;
mod plots;

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sp_formula::FormulaError;
use sp_shift::ShiftError;
use thiserror::Error;

pub use archive::{ARCHIVE_FORMULAS, ARCHIVE_METADATA, ARCHIVE_PLOT_SPECS, export_archive, import_archive};
pub use comments::{CommentKey, CommentStore};
pub use debounce::{CommentDebouncer, CommentEdit, DEFAULT_COMMENT_DELAY};
pub use formula_store::FormulaStore;
pub use metadata::{RecordMeta, SessionMetadata, validate_build_number, validate_engine_number};
pub use plots::{PlotEntry, PlotId, PlotSpecManager};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid engine number {0:?}; expected a letter followed by digits")]
    InvalidEngineNumber(String),
    #[error("invalid build number {0:?}; expected digits")]
    InvalidBuildNumber(String),
    #[error("session metadata not found at {0}")]
    MissingMetadata(PathBuf),
    #[error("record {0} is not part of the session")]
    UnknownRecord(i64),
    #[error("no plot with id {0}")]
    UnknownPlot(PlotId),
    #[error("archive is missing {0}")]
    ArchiveMissingEntry(&'static str),
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error(transparent)]
    Plot(#[from] ShiftError),
    #[error("archive error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

impl SessionError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub(crate) fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// File layout of one working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub dir: PathBuf,
    pub formula_file: String,
    pub metadata_file: String,
    pub comments_file: String,
    pub plot_specs_file: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("amt_appdata"),
            formula_file: "op_cache.txt".to_owned(),
            metadata_file: "session.json".to_owned(),
            comments_file: "local_comments.json".to_owned(),
            plot_specs_file: "plot_specs.json".to_owned(),
        }
    }
}

impl WorkspaceConfig {
    #[must_use]
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn formula_path(&self) -> PathBuf {
        self.dir.join(&self.formula_file)
    }

    #[must_use]
    pub fn metadata_path(&self) -> PathBuf {
        self.dir.join(&self.metadata_file)
    }

    #[must_use]
    pub fn comments_path(&self) -> PathBuf {
        self.dir.join(&self.comments_file)
    }

    #[must_use]
    pub fn plot_specs_path(&self) -> PathBuf {
        self.dir.join(&self.plot_specs_file)
    }
}

/// Typed access to the files of a [`WorkspaceConfig`].
#[derive(Debug, Clone)]
pub struct Workspace {
    config: WorkspaceConfig,
}

impl Workspace {
    #[must_use]
    pub fn new(config: WorkspaceConfig) -> Self {
        Self { config }
    }

    #[must_use]
    pub fn config(&self) -> &WorkspaceConfig {
        &self.config
    }

    #[must_use]
    pub fn formula_store(&self) -> FormulaStore {
        FormulaStore::new(self.config.formula_path())
    }

    pub fn load_metadata(&self) -> Result<SessionMetadata, SessionError> {
        SessionMetadata::load(&self.config.metadata_path())
    }

    pub fn save_metadata(&self, metadata: &SessionMetadata) -> Result<(), SessionError> {
        metadata.save(&self.config.metadata_path())
    }

    pub fn comment_store(&self) -> Result<CommentStore, SessionError> {
        CommentStore::open(self.config.comments_path())
    }

    /// Saved plot specs, or an empty manager when none were saved.
    pub fn load_plot_specs(&self) -> Result<PlotSpecManager, SessionError> {
        Ok(read_json_if_exists(&self.config.plot_specs_path())?.unwrap_or_default())
    }

    pub fn save_plot_specs(&self, plots: &PlotSpecManager) -> Result<(), SessionError> {
        write_json(&self.config.plot_specs_path(), plots)
    }

    pub fn export_archive(&self, dest: &Path) -> Result<(), SessionError> {
        export_archive(&self.config, dest)
    }

    pub fn import_archive(&self, src: &Path) -> Result<(), SessionError> {
        import_archive(&self.config, src)
    }
}

pub(crate) fn read_json_if_exists<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, SessionError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|err| SessionError::json(path, err)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(SessionError::io(path, err)),
    }
}

pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SessionError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|err| SessionError::json(path, err))?;
    write_atomic(path, &bytes)
}

/// Writes through a sibling temp file so readers never see a partial file.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SessionError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|err| SessionError::io(parent, err))?;
    }
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);
    {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|err| SessionError::io(&tmp_path, err))?;
        file.write_all(bytes)
            .and_then(|()| file.flush())
            .map_err(|err| SessionError::io(&tmp_path, err))?;
    }
    fs::rename(&tmp_path, path).map_err(|err| SessionError::io(path, err))
}
