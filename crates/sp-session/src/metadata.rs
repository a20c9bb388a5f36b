use std::path::Path;

use chrono::NaiveDateTime;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{SessionError, read_json_if_exists, write_json};

const ENGINE_PATTERN: &str = r"^[A-Za-z][0-9]+$";
const BUILD_PATTERN: &str = r"^[0-9]+$";

/// One selected record as listed in the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordMeta {
    pub adr_number: i64,
    pub run_number: i64,
    pub timestamp: NaiveDateTime,
    #[serde(default)]
    pub remote_comment: String,
    /// Whether the record is drawn (and therefore analysed).
    #[serde(default = "default_graph")]
    pub graph: bool,
}

fn default_graph() -> bool {
    true
}

impl RecordMeta {
    #[must_use]
    pub fn new(adr_number: i64, run_number: i64, timestamp: NaiveDateTime) -> Self {
        Self {
            adr_number,
            run_number,
            timestamp,
            remote_comment: String::new(),
            graph: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMetadata {
    engine_number: String,
    build_number: String,
    #[serde(default)]
    records: Vec<RecordMeta>,
}

pub fn validate_engine_number(value: &str) -> Result<(), SessionError> {
    pattern_matches(ENGINE_PATTERN, value)
        .then_some(())
        .ok_or_else(|| SessionError::InvalidEngineNumber(value.to_owned()))
}

pub fn validate_build_number(value: &str) -> Result<(), SessionError> {
    pattern_matches(BUILD_PATTERN, value)
        .then_some(())
        .ok_or_else(|| SessionError::InvalidBuildNumber(value.to_owned()))
}

fn pattern_matches(pattern: &str, value: &str) -> bool {
    Regex::new(pattern).is_ok_and(|re| re.is_match(value))
}

impl SessionMetadata {
    pub fn new(engine_number: &str, build_number: &str) -> Result<Self, SessionError> {
        let engine_number = engine_number.trim();
        let build_number = build_number.trim();
        validate_engine_number(engine_number)?;
        validate_build_number(build_number)?;
        Ok(Self {
            engine_number: engine_number.to_owned(),
            build_number: build_number.to_owned(),
            records: Vec::new(),
        })
    }

    #[must_use]
    pub fn engine_number(&self) -> &str {
        &self.engine_number
    }

    #[must_use]
    pub fn build_number(&self) -> &str {
        &self.build_number
    }

    /// Switches engine/build. A different identity clears the record list;
    /// returns whether anything changed.
    pub fn set_identity(
        &mut self,
        engine_number: &str,
        build_number: &str,
    ) -> Result<bool, SessionError> {
        let next = Self::new(engine_number, build_number)?;
        if next.engine_number == self.engine_number && next.build_number == self.build_number {
            return Ok(false);
        }
        info!(
            engine = %next.engine_number,
            build = %next.build_number,
            dropped_records = self.records.len(),
            "session identity changed"
        );
        *self = next;
        Ok(true)
    }

    #[must_use]
    pub fn records(&self) -> &[RecordMeta] {
        &self.records
    }

    /// Adds a record, replacing any existing entry with the same ADR number.
    pub fn upsert_record(&mut self, record: RecordMeta) {
        match self
            .records
            .iter_mut()
            .find(|existing| existing.adr_number == record.adr_number)
        {
            Some(slot) => *slot = record,
            None => self.records.push(record),
        }
    }

    pub fn remove_record(&mut self, adr_number: i64) -> Option<RecordMeta> {
        let idx = self
            .records
            .iter()
            .position(|record| record.adr_number == adr_number)?;
        Some(self.records.remove(idx))
    }

    pub fn set_graph(&mut self, adr_number: i64, graph: bool) -> Result<(), SessionError> {
        let record = self
            .records
            .iter_mut()
            .find(|record| record.adr_number == adr_number)
            .ok_or(SessionError::UnknownRecord(adr_number))?;
        record.graph = graph;
        Ok(())
    }

    /// ADR numbers of the records flagged for graphing, in list order.
    #[must_use]
    pub fn selected_ids(&self) -> Vec<i64> {
        self.records
            .iter()
            .filter(|record| record.graph)
            .map(|record| record.adr_number)
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let metadata: Self = read_json_if_exists(path)?
            .ok_or_else(|| SessionError::MissingMetadata(path.to_path_buf()))?;
        validate_engine_number(&metadata.engine_number)?;
        validate_build_number(&metadata.build_number)?;
        Ok(metadata)
    }

    pub fn save(&self, path: &Path) -> Result<(), SessionError> {
        write_json(path, self)
    }
}
