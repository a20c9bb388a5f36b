use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sp_formula::FormulaSet;
use tracing::info;

use crate::{SessionError, write_atomic};

/// The analyst's formula text, persisted verbatim.
#[derive(Debug, Clone)]
pub struct FormulaStore {
    path: PathBuf,
}

impl FormulaStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored text; empty when nothing has been committed yet.
    pub fn load_text(&self) -> Result<String, SessionError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(text),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
            Err(err) => Err(SessionError::io(&self.path, err)),
        }
    }

    pub fn load(&self) -> Result<FormulaSet, SessionError> {
        Ok(FormulaSet::parse(&self.load_text()?)?)
    }

    /// Parses `text` as a whole and writes it only if it is a valid set.
    pub fn commit(&self, text: &str) -> Result<FormulaSet, SessionError> {
        let set = FormulaSet::parse(text)?;
        write_atomic(&self.path, text.as_bytes())?;
        info!(path = %self.path.display(), formulas = set.len(), "formula store committed");
        Ok(set)
    }
}
