use serde::{Deserialize, Serialize};

/// Built-in functions callable from a formula.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Atan2,
    Deg,
    Rad,
    Sqrt,
    Exp,
    Ln,
    Log10,
    Abs,
    Min,
    Max,
    Pow,
    /// Trailing average over timestamp-ordered rows.
    RollAvg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    AtLeast(usize),
}

impl Arity {
    #[must_use]
    pub fn accepts(self, count: usize) -> bool {
        match self {
            Self::Exact(n) => count == n,
            Self::AtLeast(n) => count >= n,
        }
    }
}

impl Function {
    pub const ALL: [Self; 18] = [
        Self::Sin,
        Self::Cos,
        Self::Tan,
        Self::Asin,
        Self::Acos,
        Self::Atan,
        Self::Atan2,
        Self::Deg,
        Self::Rad,
        Self::Sqrt,
        Self::Exp,
        Self::Ln,
        Self::Log10,
        Self::Abs,
        Self::Min,
        Self::Max,
        Self::Pow,
        Self::RollAvg,
    ];

    /// Case-insensitive lookup by the name used in formula text.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|function| function.name() == upper)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Sin => "SIN",
            Self::Cos => "COS",
            Self::Tan => "TAN",
            Self::Asin => "ASIN",
            Self::Acos => "ACOS",
            Self::Atan => "ATAN",
            Self::Atan2 => "ATAN2",
            Self::Deg => "DEG",
            Self::Rad => "RAD",
            Self::Sqrt => "SQRT",
            Self::Exp => "EXP",
            Self::Ln => "LN",
            Self::Log10 => "LOG10",
            Self::Abs => "ABS",
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Pow => "POW",
            Self::RollAvg => "ROLLAVG",
        }
    }

    #[must_use]
    pub const fn arity(self) -> Arity {
        match self {
            Self::Atan2 | Self::Pow | Self::RollAvg => Arity::Exact(2),
            Self::Min | Self::Max => Arity::AtLeast(1),
            _ => Arity::Exact(1),
        }
    }

    /// Row-wise application. `args` has already been checked against
    /// [`Function::arity`]; the caller maps non-finite results to missing.
    /// Not meaningful for [`Function::RollAvg`], which spans rows.
    #[must_use]
    pub fn apply(self, args: &[f64]) -> f64 {
        let first = args.first().copied().unwrap_or(f64::NAN);
        let second = args.get(1).copied().unwrap_or(f64::NAN);
        match self {
            Self::Sin => first.sin(),
            Self::Cos => first.cos(),
            Self::Tan => first.tan(),
            Self::Asin => first.asin(),
            Self::Acos => first.acos(),
            Self::Atan => first.atan(),
            Self::Atan2 => first.atan2(second),
            Self::Deg => first.to_degrees(),
            Self::Rad => first.to_radians(),
            Self::Sqrt => first.sqrt(),
            Self::Exp => first.exp(),
            Self::Ln => first.ln(),
            Self::Log10 => first.log10(),
            Self::Abs => first.abs(),
            Self::Min => args.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => args.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Pow => first.powf(second),
            Self::RollAvg => f64::NAN,
        }
    }
}
