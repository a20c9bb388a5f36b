#![forbid(unsafe_code)]

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Telemetry table category. Each class may carry a different column schema,
/// so every cache and evaluator call site matches on it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DataTypeClass {
    #[serde(rename = "RAW", alias = "Raw", alias = "raw")]
    Raw,
    #[serde(rename = "PDR", alias = "PROCESSED", alias = "Processed", alias = "pdr")]
    Processed,
    #[serde(rename = "SOURCE", alias = "Source", alias = "source")]
    Source,
    #[serde(rename = "PROFILE", alias = "Profile", alias = "profile")]
    Profile,
}

impl DataTypeClass {
    pub const ALL: [Self; 4] = [Self::Raw, Self::Processed, Self::Source, Self::Profile];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Raw => "RAW",
            Self::Processed => "PDR",
            Self::Source => "SOURCE",
            Self::Profile => "PROFILE",
        }
    }
}

impl fmt::Display for DataTypeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataTypeClass {
    type Err = TypeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_uppercase().as_str() {
            "RAW" => Ok(Self::Raw),
            "PDR" | "PROCESSED" => Ok(Self::Processed),
            "SOURCE" => Ok(Self::Source),
            "PROFILE" => Ok(Self::Profile),
            _ => Err(TypeError::UnknownDataTypeClass {
                value: value.to_owned(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NullKind {
    Null,
    NaN,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Scalar {
    Null(NullKind),
    Int64(i64),
    Float64(f64),
}

impl Scalar {
    /// The canonical missing marker for numeric telemetry.
    #[must_use]
    pub const fn missing() -> Self {
        Self::Null(NullKind::NaN)
    }

    /// Wraps a float, mapping NaN and infinities to the missing marker so
    /// downstream statistics never see a non-finite value.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Self::Float64(value)
        } else {
            Self::missing()
        }
    }

    #[must_use]
    pub fn from_option(value: Option<f64>) -> Self {
        value.map_or_else(Self::missing, Self::from_f64)
    }

    #[must_use]
    pub fn is_missing(&self) -> bool {
        match self {
            Self::Null(_) => true,
            Self::Float64(v) => !v.is_finite(),
            Self::Int64(_) => false,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Null(_) => None,
            Self::Int64(v) => Some(*v as f64),
            Self::Float64(v) if v.is_finite() => Some(*v),
            Self::Float64(_) => None,
        }
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (None, None) => true,
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    pub fn to_f64(&self) -> Result<f64, TypeError> {
        match self {
            Self::Int64(v) => Ok(*v as f64),
            Self::Float64(v) if v.is_finite() => Ok(*v),
            Self::Float64(_) => Err(TypeError::ValueIsMissing {
                kind: NullKind::NaN,
            }),
            Self::Null(kind) => Err(TypeError::ValueIsMissing { kind: *kind }),
        }
    }
}

impl From<f64> for Scalar {
    fn from(value: f64) -> Self {
        Self::from_f64(value)
    }
}

impl From<Option<f64>> for Scalar {
    fn from(value: Option<f64>) -> Self {
        Self::from_option(value)
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TypeError {
    #[error("value is missing ({kind:?})")]
    ValueIsMissing { kind: NullKind },
    #[error("value {value:?} is not numeric")]
    NonNumericValue { value: String },
    #[error("unknown data type class {value:?}; expected RAW, PDR, SOURCE or PROFILE")]
    UnknownDataTypeClass { value: String },
}

/// Parses one telemetry field. Blank fields and the usual spreadsheet
/// spellings of "no value" are missing rather than errors.
pub fn parse_scalar(field: &str) -> Result<Scalar, TypeError> {
    let trimmed = field.trim();
    if trimmed.is_empty()
        || trimmed.eq_ignore_ascii_case("nan")
        || trimmed.eq_ignore_ascii_case("null")
        || trimmed.eq_ignore_ascii_case("none")
    {
        return Ok(Scalar::missing());
    }

    if let Ok(value) = trimmed.parse::<i64>() {
        return Ok(Scalar::Int64(value));
    }
    if let Ok(value) = trimmed.parse::<f64>() {
        return Ok(Scalar::from_f64(value));
    }

    Err(TypeError::NonNumericValue {
        value: trimmed.to_owned(),
    })
}

/// Canonical spelling for parameter and formula identifiers.
#[must_use]
pub fn canonical_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::{DataTypeClass, NullKind, Scalar, canonical_name, parse_scalar};

    #[test]
    fn non_finite_floats_become_missing() {
        assert!(Scalar::from_f64(f64::INFINITY).is_missing());
        assert!(Scalar::Float64(f64::NAN).is_missing());
        assert_eq!(Scalar::from_f64(2.5).as_f64(), Some(2.5));
    }

    #[test]
    fn semantic_eq_treats_all_missing_markers_as_equal() {
        let left = Scalar::Float64(f64::NAN);
        let right = Scalar::Null(NullKind::Null);
        assert!(left.semantic_eq(&right));
        assert!(Scalar::Int64(3).semantic_eq(&Scalar::Float64(3.0)));
    }

    #[test]
    fn data_type_class_round_trips_through_text() {
        for class in DataTypeClass::ALL {
            assert_eq!(class.as_str().parse::<DataTypeClass>(), Ok(class));
        }
        assert_eq!(
            "processed".parse::<DataTypeClass>(),
            Ok(DataTypeClass::Processed)
        );
        assert!("cooked".parse::<DataTypeClass>().is_err());
    }

    #[test]
    fn data_type_class_serializes_as_legacy_labels() {
        let json = serde_json::to_string(&DataTypeClass::Processed).expect("serialize");
        assert_eq!(json, "\"PDR\"");
        let back: DataTypeClass = serde_json::from_str("\"Profile\"").expect("alias");
        assert_eq!(back, DataTypeClass::Profile);
    }

    #[test]
    fn parse_scalar_handles_blank_and_numeric_fields() {
        assert!(parse_scalar("  ").expect("blank").is_missing());
        assert!(parse_scalar("NaN").expect("nan").is_missing());
        assert_eq!(parse_scalar("12").expect("int"), Scalar::Int64(12));
        assert_eq!(parse_scalar("1.5e2").expect("float"), Scalar::Float64(150.0));
        assert!(parse_scalar("abc").is_err());
    }

    #[test]
    fn canonical_names_are_upper_case() {
        assert_eq!(canonical_name(" ytac "), "YTAC");
    }
}
