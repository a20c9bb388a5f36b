use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sp_frame::Table;
use sp_types::DataTypeClass;
use thiserror::Error;

use crate::read_table_csv_str;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SourceError {
    #[error("no {class} data for engine {engine}, build {build}")]
    NotFound {
        engine: String,
        build: String,
        class: DataTypeClass,
    },
    /// Opaque backend failure, surfaced as-is.
    #[error("record query failed: {0}")]
    Query(String),
}

/// Where raw telemetry tables come from.
pub trait RecordSource {
    /// The rows of `class` for the given records, in source order. Ids with
    /// no row are skipped.
    fn fetch_table(
        &self,
        engine: &str,
        build: &str,
        record_ids: &[i64],
        class: DataTypeClass,
    ) -> Result<Table, SourceError>;
}

/// Reads `<root>/<engine>/<build>/<CLASS>.csv`.
#[derive(Debug, Clone)]
pub struct CsvDirectorySource {
    root: PathBuf,
}

impl CsvDirectorySource {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn path_for(&self, engine: &str, build: &str, class: DataTypeClass) -> PathBuf {
        self.root
            .join(engine)
            .join(build)
            .join(format!("{}.csv", class.as_str()))
    }
}

impl RecordSource for CsvDirectorySource {
    fn fetch_table(
        &self,
        engine: &str,
        build: &str,
        record_ids: &[i64],
        class: DataTypeClass,
    ) -> Result<Table, SourceError> {
        let path = self.path_for(engine, build, class);
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(SourceError::NotFound {
                    engine: engine.to_owned(),
                    build: build.to_owned(),
                    class,
                });
            }
            Err(err) => return Err(SourceError::Query(format!("{}: {err}", path.display()))),
        };

        let table = read_table_csv_str(&text, class)
            .map_err(|err| SourceError::Query(format!("{}: {err}", path.display())))?;
        let wanted = record_ids.iter().copied().collect::<BTreeSet<_>>();
        table
            .filter_runs(|run_id| wanted.contains(&run_id))
            .map_err(|err| SourceError::Query(err.to_string()))
    }
}
