use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{SessionError, read_json_if_exists, write_json};

/// Identifies the record a local comment belongs to.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CommentKey {
    pub engine: String,
    pub build: String,
    pub adr_number: i64,
}

impl CommentKey {
    #[must_use]
    pub fn new(engine: &str, build: &str, adr_number: i64) -> Self {
        Self {
            engine: engine.to_owned(),
            build: build.to_owned(),
            adr_number,
        }
    }
}

type CommentTree = BTreeMap<String, BTreeMap<String, BTreeMap<i64, String>>>;

/// Analyst comments kept on this machine, engine → build → ADR → text.
#[derive(Debug, Clone, PartialEq)]
pub struct CommentStore {
    path: PathBuf,
    comments: CommentTree,
}

impl CommentStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, SessionError> {
        let path = path.into();
        let comments = read_json_if_exists(&path)?.unwrap_or_default();
        Ok(Self { path, comments })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn get(&self, key: &CommentKey) -> Option<&str> {
        self.comments
            .get(&key.engine)?
            .get(&key.build)?
            .get(&key.adr_number)
            .map(String::as_str)
    }

    /// Sets a comment in memory. Blank text deletes it.
    pub fn set(&mut self, key: &CommentKey, text: &str) {
        if text.trim().is_empty() {
            self.remove(key);
            return;
        }
        self.comments
            .entry(key.engine.clone())
            .or_default()
            .entry(key.build.clone())
            .or_default()
            .insert(key.adr_number, text.to_owned());
    }

    pub fn remove(&mut self, key: &CommentKey) -> Option<String> {
        let builds = self.comments.get_mut(&key.engine)?;
        let records = builds.get_mut(&key.build)?;
        let removed = records.remove(&key.adr_number);
        if records.is_empty() {
            builds.remove(&key.build);
        }
        if builds.is_empty() {
            self.comments.remove(&key.engine);
        }
        removed
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.comments
            .values()
            .flat_map(BTreeMap::values)
            .map(BTreeMap::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.comments.is_empty()
    }

    pub fn save(&self) -> Result<(), SessionError> {
        write_json(&self.path, &self.comments)
    }
}
