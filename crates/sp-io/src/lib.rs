#![forbid(unsafe_code)]

mod source;

use std::collections::BTreeMap;

use chrono::NaiveDateTime;
use csv::{ReaderBuilder, WriterBuilder};
use sp_columnar::Column;
use sp_frame::{FrameError, Table};
use sp_shift::AnnotatedTable;
use sp_types::{DataTypeClass, Scalar, TypeError, canonical_name, parse_scalar};
use thiserror::Error;

pub use source::{CsvDirectorySource, RecordSource, SourceError};

/// Key column holding the record (ADR) number.
pub const RUN_ID_COLUMN: &str = "ADR";
pub const TIMESTAMP_COLUMN: &str = "TIMESTAMP";

const TIMESTAMP_FORMATS: [&str; 4] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

#[derive(Debug, Error)]
pub enum IoError {
    #[error("csv input has no headers")]
    MissingHeaders,
    #[error("csv input lacks the {0} column")]
    MissingKeyColumn(&'static str),
    #[error("row {row}, column {column}: {reason} ({value:?})")]
    InvalidField {
        row: usize,
        column: String,
        value: String,
        reason: String,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Reads a telemetry table. `ADR` and `TIMESTAMP` are required; every other
/// column is a numeric parameter (blank means missing).
pub fn read_table_csv_str(input: &str, class: DataTypeClass) -> Result<Table, IoError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_reader(input.as_bytes());

    let headers = reader
        .headers()
        .cloned()
        .map_err(IoError::from)?
        .iter()
        .map(canonical_name)
        .collect::<Vec<_>>();
    if headers.iter().all(String::is_empty) {
        return Err(IoError::MissingHeaders);
    }
    let run_idx = key_position(&headers, RUN_ID_COLUMN)?;
    let ts_idx = key_position(&headers, TIMESTAMP_COLUMN)?;

    let mut run_ids = Vec::new();
    let mut timestamps = Vec::new();
    let mut columns = headers
        .iter()
        .enumerate()
        .filter(|(idx, _)| *idx != run_idx && *idx != ts_idx)
        .map(|(idx, name)| (idx, name.clone(), Vec::<Scalar>::new()))
        .collect::<Vec<_>>();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let field = |idx: usize| record.get(idx).unwrap_or_default();

        let run_field = field(run_idx);
        let run_id = run_field
            .parse::<i64>()
            .map_err(|err| invalid(row, RUN_ID_COLUMN, run_field, err.to_string()))?;
        run_ids.push(run_id);
        timestamps.push(parse_timestamp(field(ts_idx)).ok_or_else(|| {
            invalid(
                row,
                TIMESTAMP_COLUMN,
                field(ts_idx),
                "unrecognised timestamp".to_owned(),
            )
        })?);

        for (idx, name, values) in &mut columns {
            let raw = field(*idx);
            let value = parse_scalar(raw).map_err(|err: TypeError| {
                invalid(row, name, raw, err.to_string())
            })?;
            values.push(value);
        }
    }

    let columns = columns
        .into_iter()
        .map(|(_, name, values)| (name, Column::new(values)))
        .collect::<BTreeMap<_, _>>();
    Ok(Table::new(class, run_ids, timestamps, columns)?)
}

pub fn write_table_csv_string(table: &Table) -> Result<String, IoError> {
    write_csv(table, &[])
}

/// Like [`write_table_csv_string`], plus one `VALID_<Y>_<X>` column (1/0)
/// and one `SHIFT_<Y>_<X>` column (1 on shift rows) per analysed pair.
pub fn write_annotated_csv_string(annotated: &AnnotatedTable) -> Result<String, IoError> {
    let rows = annotated.table.len();
    let mut extra = Vec::new();
    for analysis in &annotated.annotations {
        let validity = (0..rows)
            .map(|row| (if analysis.validity.is_valid(row) { "1" } else { "0" }).to_owned())
            .collect::<Vec<_>>();
        extra.push((analysis.pair.validity_name(), validity));

        let mut marks = vec![String::from("0"); rows];
        for shift in &analysis.shifts {
            if let Some(slot) = marks.get_mut(shift.row) {
                *slot = "1".to_owned();
            }
        }
        extra.push((format!("SHIFT_{}", analysis.pair.shift_key()), marks));
    }
    write_csv(&annotated.table, &extra)
}

fn write_csv(table: &Table, extra: &[(String, Vec<String>)]) -> Result<String, IoError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());

    let names = table.column_names().collect::<Vec<_>>();
    let mut header = vec![RUN_ID_COLUMN, TIMESTAMP_COLUMN];
    header.extend(names.iter().copied());
    header.extend(extra.iter().map(|(name, _)| name.as_str()));
    writer.write_record(&header)?;

    for row in 0..table.len() {
        let mut record = vec![
            table.run_ids()[row].to_string(),
            table.timestamps()[row]
                .format("%Y-%m-%d %H:%M:%S%.f")
                .to_string(),
        ];
        record.extend(names.iter().map(|name| {
            table
                .column(name)
                .and_then(|column| column.get_f64(row))
                .map_or_else(String::new, |value| value.to_string())
        }));
        record.extend(
            extra
                .iter()
                .map(|(_, values)| values.get(row).cloned().unwrap_or_default()),
        );
        writer.write_record(&record)?;
    }

    let bytes = writer.into_inner().map_err(|err| err.into_error())?;
    Ok(String::from_utf8(bytes)?)
}

fn key_position(headers: &[String], key: &'static str) -> Result<usize, IoError> {
    headers
        .iter()
        .position(|name| name == key)
        .ok_or(IoError::MissingKeyColumn(key))
}

fn invalid(row: usize, column: &str, value: &str, reason: String) -> IoError {
    IoError::InvalidField {
        row: row + 1,
        column: column.to_owned(),
        value: value.to_owned(),
        reason,
    }
}

#[must_use]
pub fn parse_timestamp(field: &str) -> Option<NaiveDateTime> {
    let trimmed = field.trim();
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
}
