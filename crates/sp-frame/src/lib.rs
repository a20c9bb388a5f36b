#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sp_columnar::{Column, ColumnError};
use sp_types::{DataTypeClass, Scalar, canonical_name};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FrameError {
    #[error("row metadata length ({rows}) does not match column length ({column_len}) for {name}")]
    LengthMismatch {
        name: String,
        rows: usize,
        column_len: usize,
    },
    #[error("run id vector length ({run_ids}) does not match timestamp vector length ({timestamps})")]
    RowMetadataMismatch { run_ids: usize, timestamps: usize },
    #[error("record {run_id} has parameters {found:?} but the table schema is {expected:?}")]
    SchemaMismatch {
        run_id: i64,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("run id {0} appears more than once")]
    DuplicateRunId(i64),
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// One telemetry sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub run_id: i64,
    pub timestamp: NaiveDateTime,
    pub values: BTreeMap<String, Scalar>,
}

impl Record {
    #[must_use]
    pub fn new(run_id: i64, timestamp: NaiveDateTime) -> Self {
        Self {
            run_id,
            timestamp,
            values: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_value(mut self, name: &str, value: impl Into<Scalar>) -> Self {
        self.values.insert(canonical_name(name), value.into());
        self
    }
}

/// Rectangular telemetry for one data-type class. Rows keep the order they
/// were fetched in; every column has one entry per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    class: DataTypeClass,
    run_ids: Vec<i64>,
    timestamps: Vec<NaiveDateTime>,
    columns: BTreeMap<String, Column>,
}

impl Table {
    pub fn new(
        class: DataTypeClass,
        run_ids: Vec<i64>,
        timestamps: Vec<NaiveDateTime>,
        columns: BTreeMap<String, Column>,
    ) -> Result<Self, FrameError> {
        if run_ids.len() != timestamps.len() {
            return Err(FrameError::RowMetadataMismatch {
                run_ids: run_ids.len(),
                timestamps: timestamps.len(),
            });
        }
        let mut seen = BTreeSet::new();
        for run_id in &run_ids {
            if !seen.insert(*run_id) {
                return Err(FrameError::DuplicateRunId(*run_id));
            }
        }

        let mut canonical = BTreeMap::new();
        for (name, column) in columns {
            if column.len() != run_ids.len() {
                return Err(FrameError::LengthMismatch {
                    name,
                    rows: run_ids.len(),
                    column_len: column.len(),
                });
            }
            canonical.insert(canonical_name(&name), column);
        }

        Ok(Self {
            class,
            run_ids,
            timestamps,
            columns: canonical,
        })
    }

    #[must_use]
    pub fn empty(class: DataTypeClass) -> Self {
        Self {
            class,
            run_ids: Vec::new(),
            timestamps: Vec::new(),
            columns: BTreeMap::new(),
        }
    }

    /// Builds a table from records that must all carry the same parameter
    /// names. A missing reading is an explicit missing value, never an
    /// absent key.
    pub fn from_records(class: DataTypeClass, records: Vec<Record>) -> Result<Self, FrameError> {
        let Some(first) = records.first() else {
            return Ok(Self::empty(class));
        };
        let schema = first.values.keys().cloned().collect::<Vec<_>>();

        let mut run_ids = Vec::with_capacity(records.len());
        let mut timestamps = Vec::with_capacity(records.len());
        let mut values = schema
            .iter()
            .map(|name| (name.clone(), Vec::with_capacity(records.len())))
            .collect::<BTreeMap<_, Vec<Scalar>>>();

        for record in records {
            if record.values.len() != schema.len()
                || !record.values.keys().zip(&schema).all(|(a, b)| a == b)
            {
                return Err(FrameError::SchemaMismatch {
                    run_id: record.run_id,
                    expected: schema,
                    found: record.values.keys().cloned().collect(),
                });
            }
            run_ids.push(record.run_id);
            timestamps.push(record.timestamp);
            for (name, value) in record.values {
                if let Some(slot) = values.get_mut(&name) {
                    slot.push(value);
                }
            }
        }

        let columns = values
            .into_iter()
            .map(|(name, values)| (name, Column::new(values)))
            .collect();
        Self::new(class, run_ids, timestamps, columns)
    }

    #[must_use]
    pub fn class(&self) -> DataTypeClass {
        self.class
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.run_ids.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.run_ids.is_empty()
    }

    #[must_use]
    pub fn run_ids(&self) -> &[i64] {
        &self.run_ids
    }

    #[must_use]
    pub fn timestamps(&self) -> &[NaiveDateTime] {
        &self.timestamps
    }

    #[must_use]
    pub fn columns(&self) -> &BTreeMap<String, Column> {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns
            .get(name)
            .or_else(|| self.columns.get(&canonical_name(name)))
    }

    #[must_use]
    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Adds a column, replacing any existing column of the same name.
    pub fn insert_column(&mut self, name: &str, column: Column) -> Result<(), FrameError> {
        if column.len() != self.len() {
            return Err(FrameError::LengthMismatch {
                name: name.to_owned(),
                rows: self.len(),
                column_len: column.len(),
            });
        }
        self.columns.insert(canonical_name(name), column);
        Ok(())
    }

    /// Row positions in ascending timestamp order; equal timestamps keep
    /// their fetch order.
    #[must_use]
    pub fn timestamp_order(&self) -> Vec<usize> {
        let mut order = (0..self.len()).collect::<Vec<_>>();
        order.sort_by_key(|&idx| self.timestamps[idx]);
        order
    }

    /// Keeps only rows whose run id satisfies `keep`, preserving order.
    pub fn filter_runs(&self, keep: impl Fn(i64) -> bool) -> Result<Self, FrameError> {
        let positions = self
            .run_ids
            .iter()
            .enumerate()
            .filter(|(_, run_id)| keep(**run_id))
            .map(|(idx, _)| idx)
            .collect::<Vec<_>>();

        let mut columns = BTreeMap::new();
        for (name, column) in &self.columns {
            columns.insert(name.clone(), column.take(&positions)?);
        }
        Self::new(
            self.class,
            positions.iter().map(|&idx| self.run_ids[idx]).collect(),
            positions.iter().map(|&idx| self.timestamps[idx]).collect(),
            columns,
        )
    }

    #[must_use]
    pub fn record(&self, idx: usize) -> Option<Record> {
        let run_id = *self.run_ids.get(idx)?;
        let timestamp = *self.timestamps.get(idx)?;
        let values = self
            .columns
            .iter()
            .map(|(name, column)| {
                (
                    name.clone(),
                    column.value(idx).cloned().unwrap_or_else(Scalar::missing),
                )
            })
            .collect();
        Some(Record {
            run_id,
            timestamp,
            values,
        })
    }
}
