#![forbid(unsafe_code)]

//! Per-pair validity masks and mean-shift detection.
//!
//! For an (X, Y) pair a row is valid when both values are present. Valid
//! rows are ordered by X and each Y is compared against the mean and sample
//! standard deviation of the rows before it; deviations beyond the sigma
//! cutoff mark a shift.

use std::fmt;

use serde::{Deserialize, Serialize};
use sp_columnar::{ColumnError, ValidityMask};
use sp_frame::Table;
use sp_types::{DataTypeClass, canonical_name};
use thiserror::Error;

/// Most (X, Y) pairs a single plot spec may carry.
pub const MAX_PAIRS: usize = 4;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ShiftError {
    #[error("parameter {name} is not present in the {class} table")]
    UnknownParameter { name: String, class: DataTypeClass },
    #[error("sigma cutoff must be a positive finite number or -1 to disable, got {value}")]
    InvalidCutoff { value: f64 },
    #[error("invalid shift configuration: {reason}")]
    InvalidConfig { reason: String },
    #[error("a plot spec holds at most {MAX_PAIRS} pairs, got {count}")]
    TooManyPairs { count: usize },
    #[error(transparent)]
    Column(#[from] ColumnError),
}

/// How many standard deviations a point must move to count as a shift.
///
/// Serialised as a bare number; `-1` means disabled.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub enum SigmaCutoff {
    Enabled(f64),
    Disabled,
}

impl SigmaCutoff {
    pub const DEFAULT: f64 = 2.0;
    pub const DISABLED_SENTINEL: f64 = -1.0;

    pub fn new(value: f64) -> Result<Self, ShiftError> {
        if value.is_finite() && value > 0.0 {
            Ok(Self::Enabled(value))
        } else {
            Err(ShiftError::InvalidCutoff { value })
        }
    }

    /// Accepts the stored form: any negative finite value disables detection.
    pub fn from_sentinel(value: f64) -> Result<Self, ShiftError> {
        if value.is_finite() && value < 0.0 {
            Ok(Self::Disabled)
        } else {
            Self::new(value)
        }
    }

    #[must_use]
    pub fn value(self) -> Option<f64> {
        match self {
            Self::Enabled(value) => Some(value),
            Self::Disabled => None,
        }
    }

    #[must_use]
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    #[must_use]
    pub fn to_sentinel(self) -> f64 {
        self.value().unwrap_or(Self::DISABLED_SENTINEL)
    }
}

impl Default for SigmaCutoff {
    fn default() -> Self {
        Self::Enabled(Self::DEFAULT)
    }
}

impl TryFrom<f64> for SigmaCutoff {
    type Error = ShiftError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::from_sentinel(value)
    }
}

impl From<SigmaCutoff> for f64 {
    fn from(cutoff: SigmaCutoff) -> Self {
        cutoff.to_sentinel()
    }
}

impl fmt::Display for SigmaCutoff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Enabled(value) => write!(f, "{value}σ"),
            Self::Disabled => f.write_str("off"),
        }
    }
}

/// Which preceding points feed the running mean and deviation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WindowPolicy {
    /// Every earlier valid point.
    #[default]
    Expanding,
    /// Only the `len` most recent valid points.
    Trailing { len: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShiftConfig {
    pub window: WindowPolicy,
    /// Preceding valid points needed before a point is tested.
    pub min_periods: usize,
}

impl Default for ShiftConfig {
    fn default() -> Self {
        Self {
            window: WindowPolicy::Expanding,
            min_periods: 2,
        }
    }
}

impl ShiftConfig {
    pub fn validate(&self) -> Result<(), ShiftError> {
        if self.min_periods < 2 {
            return Err(ShiftError::InvalidConfig {
                reason: format!("min_periods must be at least 2, got {}", self.min_periods),
            });
        }
        if let WindowPolicy::Trailing { len } = self.window {
            if len < self.min_periods {
                return Err(ShiftError::InvalidConfig {
                    reason: format!(
                        "trailing window of {len} can never reach min_periods {}",
                        self.min_periods
                    ),
                });
            }
        }
        Ok(())
    }
}

/// One X/Y parameter pairing, names canonicalised.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AxisPair {
    pub x: String,
    pub y: String,
}

impl AxisPair {
    #[must_use]
    pub fn new(x: &str, y: &str) -> Self {
        Self {
            x: canonical_name(x),
            y: canonical_name(y),
        }
    }

    /// Key under which the legacy tool stored this pair's shifts.
    #[must_use]
    pub fn shift_key(&self) -> String {
        format!("{}_{}", self.y, self.x)
    }

    /// Name of the pair's validity flag.
    #[must_use]
    pub fn validity_name(&self) -> String {
        format!("VALID_{}_{}", self.y, self.x)
    }
}

impl fmt::Display for AxisPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.y, self.x)
    }
}

/// What one plot draws: a class, up to [`MAX_PAIRS`] pairs, and a cutoff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSpec {
    pub class: DataTypeClass,
    pairs: Vec<AxisPair>,
    #[serde(default)]
    pub cutoff: SigmaCutoff,
}

impl PlotSpec {
    pub fn new(
        class: DataTypeClass,
        pairs: Vec<AxisPair>,
        cutoff: SigmaCutoff,
    ) -> Result<Self, ShiftError> {
        if pairs.len() > MAX_PAIRS {
            return Err(ShiftError::TooManyPairs { count: pairs.len() });
        }
        Ok(Self {
            class,
            pairs,
            cutoff,
        })
    }

    #[must_use]
    pub fn pairs(&self) -> &[AxisPair] {
        &self.pairs
    }

    pub fn push_pair(&mut self, pair: AxisPair) -> Result<(), ShiftError> {
        if self.pairs.len() == MAX_PAIRS {
            return Err(ShiftError::TooManyPairs {
                count: MAX_PAIRS + 1,
            });
        }
        self.pairs.push(pair);
        Ok(())
    }

    /// Drops the pair at `idx`; returns it if present.
    pub fn remove_pair(&mut self, idx: usize) -> Option<AxisPair> {
        (idx < self.pairs.len()).then(|| self.pairs.remove(idx))
    }

    /// Every parameter this spec reads, deduplicated, in first-use order.
    #[must_use]
    pub fn parameters(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for pair in &self.pairs {
            for name in [&pair.x, &pair.y] {
                if !out.contains(name) {
                    out.push(name.clone());
                }
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// A detected mean shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shift {
    /// X value of the first flagged point of the excursion.
    pub x: f64,
    pub run_id: i64,
    /// Row position in the source table.
    pub row: usize,
    pub direction: Direction,
    /// Y minus the running mean at the flagged point.
    pub deviation: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PairAnalysis {
    pub pair: AxisPair,
    pub cutoff: SigmaCutoff,
    pub validity: ValidityMask,
    pub shifts: Vec<Shift>,
}

impl PairAnalysis {
    #[must_use]
    pub fn shift_xs(&self) -> Vec<f64> {
        self.shifts.iter().map(|shift| shift.x).collect()
    }
}

/// A table with derived columns and the analyses of every requested pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedTable {
    pub table: Table,
    pub annotations: Vec<PairAnalysis>,
}

impl AnnotatedTable {
    #[must_use]
    pub fn analysis(&self, pair: &AxisPair, cutoff: SigmaCutoff) -> Option<&PairAnalysis> {
        self.annotations
            .iter()
            .find(|analysis| &analysis.pair == pair && analysis.cutoff == cutoff)
    }

    #[must_use]
    pub fn shift_count(&self) -> usize {
        self.annotations
            .iter()
            .map(|analysis| analysis.shifts.len())
            .sum()
    }
}

/// Row is valid when neither X nor Y is missing.
pub fn pair_validity(table: &Table, pair: &AxisPair) -> Result<ValidityMask, ShiftError> {
    let x = lookup(table, &pair.x)?;
    let y = lookup(table, &pair.y)?;
    Ok(x.validity().and(y.validity())?)
}

fn lookup<'a>(table: &'a Table, name: &str) -> Result<&'a sp_columnar::Column, ShiftError> {
    table.column(name).ok_or_else(|| ShiftError::UnknownParameter {
        name: name.to_owned(),
        class: table.class(),
    })
}

/// Computes the validity mask and shift markers for one pair.
pub fn detect(
    table: &Table,
    pair: &AxisPair,
    cutoff: SigmaCutoff,
    config: &ShiftConfig,
) -> Result<PairAnalysis, ShiftError> {
    config.validate()?;
    let validity = pair_validity(table, pair)?;
    let shifts = match cutoff.value() {
        Some(sigmas) => find_shifts(table, pair, &validity, sigmas, config)?,
        None => Vec::new(),
    };
    Ok(PairAnalysis {
        pair: pair.clone(),
        cutoff,
        validity,
        shifts,
    })
}

struct Point {
    row: usize,
    x: f64,
    y: f64,
}

fn find_shifts(
    table: &Table,
    pair: &AxisPair,
    validity: &ValidityMask,
    sigmas: f64,
    config: &ShiftConfig,
) -> Result<Vec<Shift>, ShiftError> {
    let x_col = lookup(table, &pair.x)?;
    let y_col = lookup(table, &pair.y)?;

    let mut points = (0..table.len())
        .filter(|&row| validity.is_valid(row))
        .filter_map(|row| {
            Some(Point {
                row,
                x: x_col.get_f64(row)?,
                y: y_col.get_f64(row)?,
            })
        })
        .collect::<Vec<_>>();
    // Stable: rows sharing an X keep table order.
    points.sort_by(|a, b| a.x.total_cmp(&b.x));

    let mut shifts = Vec::new();
    // Direction of the current excursion and whether it already has a marker.
    let mut excursion: Option<(Direction, bool)> = None;
    // Moments of the points preceding the current one within the window.
    let mut moments = RunningMoments::default();

    for (i, point) in points.iter().enumerate() {
        if let WindowPolicy::Trailing { len } = config.window {
            if i > len {
                moments.remove(points[i - len - 1].y);
            }
        }
        let window = moments;
        moments.push(point.y);
        if window.count() < config.min_periods {
            excursion = None;
            continue;
        }

        let (mean, std) = (window.mean(), window.sample_std());
        let deviation = point.y - mean;
        let direction = if deviation > 0.0 {
            Direction::Up
        } else if deviation < 0.0 {
            Direction::Down
        } else {
            excursion = None;
            continue;
        };

        let marked = match excursion {
            Some((current, marked)) if current == direction => marked,
            _ => false,
        };
        let flagged = deviation.abs() > sigmas * std;
        if flagged && !marked {
            shifts.push(Shift {
                x: point.x,
                run_id: table.run_ids()[point.row],
                row: point.row,
                direction,
                deviation,
            });
        }
        excursion = Some((direction, marked || flagged));
    }

    Ok(shifts)
}

/// Welford accumulator; `remove` undoes a `push` of the same value.
#[derive(Debug, Clone, Copy, Default)]
struct RunningMoments {
    count: usize,
    mean: f64,
    m2: f64,
}

impl RunningMoments {
    fn count(&self) -> usize {
        self.count
    }

    fn push(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn remove(&mut self, value: f64) {
        if self.count <= 1 {
            *self = Self::default();
            return;
        }
        let remaining = (self.count - 1) as f64;
        let mean = self.mean - (value - self.mean) / remaining;
        self.m2 = (self.m2 - (value - self.mean) * (value - mean)).max(0.0);
        self.mean = mean;
        self.count -= 1;
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn sample_std(&self) -> f64 {
        (self.m2 / (self.count as f64 - 1.0)).sqrt()
    }
}

/// Runs [`detect`] for every pair of every spec matching the table's class.
/// A pair requested by several specs with the same cutoff is analysed once.
pub fn annotate(
    table: Table,
    specs: &[PlotSpec],
    config: &ShiftConfig,
) -> Result<AnnotatedTable, ShiftError> {
    let mut annotations: Vec<PairAnalysis> = Vec::new();
    for spec in specs.iter().filter(|spec| spec.class == table.class()) {
        for pair in spec.pairs() {
            let seen = annotations
                .iter()
                .any(|analysis| &analysis.pair == pair && analysis.cutoff == spec.cutoff);
            if !seen {
                annotations.push(detect(&table, pair, spec.cutoff, config)?);
            }
        }
    }
    Ok(AnnotatedTable { table, annotations })
}
