#![forbid(unsafe_code)]

//! Telemetry analysis for engine-test records.
//!
//! Raw tables come from a [`RecordSource`], analyst formulas add derived
//! columns, and every X/Y pair of the session's plot specs gets a validity
//! mask and a list of mean shifts. Results are cached per data-type class
//! until something the analysis depends on changes.
//!
//! ```no_run
//! use shiftplot::{AnalysisConfig, Analyzer, CsvDirectorySource};
//!
//! # fn main() -> Result<(), shiftplot::AnalysisError> {
//! let config = AnalysisConfig::load("shiftplot.json".as_ref())?;
//! let mut analyzer = Analyzer::open(CsvDirectorySource::new("data"), config)?;
//! for (class, result) in analyzer.refresh() {
//!     match result {
//!         Ok(annotated) => println!("{class}: {} shifts", annotated.shift_count()),
//!         Err(err) => eprintln!("{class}: {err}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod analyzer;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use analyzer::{Analyzer, session_fingerprint};
pub use sp_cache::{CacheConfig, CacheManager, CacheStats, CacheStore, FsCacheStore, MemoryCacheStore};
pub use sp_columnar::{ArithmeticOp, Column, ValidityMask};
pub use sp_formula::{Expr, Formula, FormulaError, FormulaSet, Function};
pub use sp_frame::{Record, Table};
pub use sp_io::{
    CsvDirectorySource, IoError, RecordSource, SourceError, read_table_csv_str,
    write_annotated_csv_string, write_table_csv_string,
};
pub use sp_session::{
    CommentDebouncer, CommentEdit, CommentKey, CommentStore, FormulaStore, PlotEntry, PlotId,
    PlotSpecManager, RecordMeta, SessionError, SessionMetadata, Workspace, WorkspaceConfig,
};
pub use sp_shift::{
    AnnotatedTable, AxisPair, Direction, PairAnalysis, PlotSpec, Shift, ShiftConfig, ShiftError,
    SigmaCutoff, WindowPolicy, annotate, detect, pair_validity,
};
pub use sp_types::{DataTypeClass, Scalar};

/// Everything that can stop an analysis, grouped by what the caller can do
/// about it.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Syntax(FormulaError),
    /// Undefined, duplicate or circular identifier.
    #[error("name error for {name}: {reason}")]
    Name { name: String, reason: String },
    #[error("missing data: {0}")]
    MissingData(String),
    /// Record source failure, passed through unchanged.
    #[error("record query failed: {0}")]
    Query(String),
    #[error("evaluation failed: {0}")]
    Evaluation(String),
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
    #[error("session archive: {0}")]
    Archive(String),
    #[error("invalid plot spec: {0}")]
    InvalidPlotSpec(String),
    #[error("sigma cutoff must be a positive finite number or -1 to disable, got {value}")]
    InvalidCutoff { value: f64 },
    #[error("invalid session: {0}")]
    Session(String),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl AnalysisError {
    #[must_use]
    pub fn is_syntax_error(&self) -> bool {
        matches!(self, Self::Syntax(_))
    }

    #[must_use]
    pub fn is_name_error(&self) -> bool {
        matches!(self, Self::Name { .. })
    }
}

impl From<FormulaError> for AnalysisError {
    fn from(err: FormulaError) -> Self {
        if err.is_syntax_error() {
            return Self::Syntax(err);
        }
        match err.identifier() {
            Some(name) => Self::Name {
                name: name.to_owned(),
                reason: err.to_string(),
            },
            None => Self::Evaluation(err.to_string()),
        }
    }
}

impl From<ShiftError> for AnalysisError {
    fn from(err: ShiftError) -> Self {
        match err {
            ShiftError::UnknownParameter { ref name, .. } => Self::Name {
                name: name.clone(),
                reason: err.to_string(),
            },
            ShiftError::InvalidCutoff { value } => Self::InvalidCutoff { value },
            ShiftError::InvalidConfig { reason } => Self::InvalidConfig(reason),
            ShiftError::TooManyPairs { .. } => Self::InvalidPlotSpec(err.to_string()),
            ShiftError::Column(inner) => Self::Evaluation(inner.to_string()),
        }
    }
}

impl From<SourceError> for AnalysisError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::NotFound { .. } => Self::MissingData(err.to_string()),
            SourceError::Query(message) => Self::Query(message),
        }
    }
}

impl From<SessionError> for AnalysisError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Io { path, source } => Self::Io { path, source },
            SessionError::Json { path, source } => Self::Json { path, source },
            SessionError::MissingMetadata(_) => Self::MissingData(err.to_string()),
            SessionError::Formula(inner) => inner.into(),
            SessionError::Plot(inner) => inner.into(),
            SessionError::Zip(_) | SessionError::ArchiveMissingEntry(_) => {
                Self::Archive(err.to_string())
            }
            SessionError::InvalidEngineNumber(_)
            | SessionError::InvalidBuildNumber(_)
            | SessionError::UnknownRecord(_)
            | SessionError::UnknownPlot(_) => Self::Session(err.to_string()),
        }
    }
}

/// Top-level configuration. Every section has defaults, so a partial JSON
/// file (or none at all) is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub shift: ShiftConfig,
    pub cache: CacheConfig,
    pub workspace: WorkspaceConfig,
}

impl AnalysisConfig {
    pub fn load(path: &Path) -> Result<Self, AnalysisError> {
        let bytes = std::fs::read(path).map_err(|source| AnalysisError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_slice(&bytes).map_err(|source| AnalysisError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AnalysisError> {
        Ok(self.shift.validate()?)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use sp_formula::FormulaSet;
    use sp_io::SourceError;
    use sp_shift::{ShiftError, WindowPolicy};
    use sp_types::DataTypeClass;

    use super::{AnalysisConfig, AnalysisError};

    #[test]
    fn formula_errors_split_into_syntax_and_name() {
        let syntax = FormulaSet::parse("A = (X").expect_err("syntax");
        assert!(AnalysisError::from(syntax).is_syntax_error());

        let cycle = FormulaSet::parse("A = B\nB = A").expect_err("cycle");
        let err = AnalysisError::from(cycle);
        assert!(err.is_name_error());
    }

    #[test]
    fn unknown_plot_parameter_is_a_name_error() {
        let err = AnalysisError::from(ShiftError::UnknownParameter {
            name: "EGT".into(),
            class: DataTypeClass::Raw,
        });
        assert!(matches!(err, AnalysisError::Name { ref name, .. } if name == "EGT"));
    }

    #[test]
    fn source_errors_map_to_missing_data_or_query() {
        let missing = SourceError::NotFound {
            engine: "E1".into(),
            build: "1".into(),
            class: DataTypeClass::Source,
        };
        assert!(matches!(AnalysisError::from(missing), AnalysisError::MissingData(_)));
        let opaque = SourceError::Query("timeout".into());
        assert!(matches!(AnalysisError::from(opaque), AnalysisError::Query(ref m) if m == "timeout"));
    }

    #[test]
    fn partial_config_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shiftplot.json");
        std::fs::write(
            &path,
            r#"{"shift": {"window": {"kind": "trailing", "len": 8}}, "cache": {"persist": false}}"#,
        )
        .expect("write");

        let config = AnalysisConfig::load(&path).expect("load");
        assert_eq!(config.shift.window, WindowPolicy::Trailing { len: 8 });
        assert_eq!(config.shift.min_periods, 2);
        assert!(!config.cache.persist);
        assert_eq!(config.workspace.dir, PathBuf::from("amt_appdata"));
    }

    #[test]
    fn invalid_shift_config_is_rejected_on_load() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("shiftplot.json");
        std::fs::write(&path, r#"{"shift": {"min_periods": 1}}"#).expect("write");
        assert!(matches!(
            AnalysisConfig::load(&path),
            Err(AnalysisError::InvalidConfig(_))
        ));
        assert!(matches!(
            AnalysisConfig::load(&dir.path().join("absent.json")),
            Err(AnalysisError::Io { .. })
        ));
    }
}
