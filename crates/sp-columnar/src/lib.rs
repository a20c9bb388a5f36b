#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use sp_types::Scalar;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityMask {
    bits: Vec<bool>,
}

impl ValidityMask {
    #[must_use]
    pub fn from_values(values: &[Scalar]) -> Self {
        let bits = values.iter().map(|value| !value.is_missing()).collect();
        Self { bits }
    }

    #[must_use]
    pub fn from_bits(bits: Vec<bool>) -> Self {
        Self { bits }
    }

    #[must_use]
    pub fn all_invalid(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    #[must_use]
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    #[must_use]
    pub fn is_valid(&self, idx: usize) -> bool {
        self.bits.get(idx).copied().unwrap_or(false)
    }

    #[must_use]
    pub fn count_valid(&self) -> usize {
        self.bits.iter().filter(|bit| **bit).count()
    }

    /// Row-wise conjunction; a row is valid only when valid on both sides.
    pub fn and(&self, other: &Self) -> Result<Self, ColumnError> {
        if self.len() != other.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: other.len(),
            });
        }
        let bits = self
            .bits
            .iter()
            .zip(&other.bits)
            .map(|(left, right)| *left && *right)
            .collect();
        Ok(Self { bits })
    }
}

/// A column of numeric telemetry. Values are normalised on construction:
/// integers widen to `Float64` and every missing spelling becomes
/// `Scalar::missing()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Column {
    values: Vec<Scalar>,
    validity: ValidityMask,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArithmeticOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl ArithmeticOp {
    /// Applies the operator. Division by zero and any non-finite result are
    /// reported as missing.
    #[must_use]
    pub fn apply(self, lhs: f64, rhs: f64) -> Option<f64> {
        let result = match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => {
                if rhs == 0.0 {
                    return None;
                }
                lhs / rhs
            }
            Self::Pow => lhs.powf(rhs),
        };
        result.is_finite().then_some(result)
    }

    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Pow => "^",
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ColumnError {
    #[error("column length mismatch: left={left}, right={right}")]
    LengthMismatch { left: usize, right: usize },
    #[error("position {position} is out of bounds for column of length {len}")]
    PositionOutOfBounds { position: usize, len: usize },
}

impl Column {
    #[must_use]
    pub fn new(values: Vec<Scalar>) -> Self {
        let values = values
            .into_iter()
            .map(|value| Scalar::from_option(value.as_f64()))
            .collect::<Vec<_>>();
        let validity = ValidityMask::from_values(&values);
        Self { values, validity }
    }

    #[must_use]
    pub fn from_f64s(values: impl IntoIterator<Item = Option<f64>>) -> Self {
        Self::new(values.into_iter().map(Scalar::from_option).collect())
    }

    #[must_use]
    pub fn missing(len: usize) -> Self {
        Self::new(vec![Scalar::missing(); len])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Scalar] {
        &self.values
    }

    #[must_use]
    pub fn value(&self, idx: usize) -> Option<&Scalar> {
        self.values.get(idx)
    }

    /// The finite value at `idx`, or `None` when missing or out of range.
    #[must_use]
    pub fn get_f64(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).and_then(Scalar::as_f64)
    }

    pub fn iter_f64(&self) -> impl Iterator<Item = Option<f64>> + '_ {
        self.values.iter().map(Scalar::as_f64)
    }

    #[must_use]
    pub fn validity(&self) -> &ValidityMask {
        &self.validity
    }

    #[must_use]
    pub fn is_all_missing(&self) -> bool {
        self.validity.count_valid() == 0
    }

    /// Gathers rows by position, e.g. to reorder by timestamp.
    pub fn take(&self, positions: &[usize]) -> Result<Self, ColumnError> {
        let values = positions
            .iter()
            .map(|&position| {
                self.values
                    .get(position)
                    .cloned()
                    .ok_or(ColumnError::PositionOutOfBounds {
                        position,
                        len: self.values.len(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(values))
    }

    pub fn binary_numeric(&self, right: &Self, op: ArithmeticOp) -> Result<Self, ColumnError> {
        if self.len() != right.len() {
            return Err(ColumnError::LengthMismatch {
                left: self.len(),
                right: right.len(),
            });
        }

        let values = self
            .iter_f64()
            .zip(right.iter_f64())
            .map(|(left, right)| match (left, right) {
                (Some(lhs), Some(rhs)) => op.apply(lhs, rhs),
                _ => None,
            });
        Ok(Self::from_f64s(values))
    }

    /// Applies `f` to every present value; missing stays missing and
    /// non-finite outputs become missing.
    #[must_use]
    pub fn map_numeric(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_f64s(self.iter_f64().map(|value| value.map(&f)))
    }

    #[must_use]
    pub fn semantic_eq(&self, other: &Self) -> bool {
        self.values.len() == other.values.len()
            && self
                .values
                .iter()
                .zip(&other.values)
                .all(|(left, right)| left.semantic_eq(right))
    }
}
