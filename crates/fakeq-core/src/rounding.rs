use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

// RoundingMode — how x / scale + zero_point lands on an integer level
//
//   selector  mode                  2.5   -2.5   2.7   2.1   -2.7
//   0         nearest-even           2     -2     3     2     -3
//   1         half-away-from-zero    3     -3     3     2     -3
//   2         floor                  2     -3     2     2     -3
//   3         ceil                   3     -2     3     3     -2
//   4         truncate               2     -2     2     2     -2
//
// Any other integer selector resolves to nearest-even. Callers that pass raw
// selectors (the `simulate_quantize*` entry points) never get an error for
// them.
//
// DISPATCH:
//
// The mode is resolved once per tensor call with `dispatch_rounding!`, which
// expands to a `match` whose every arm instantiates the caller's loop with a
// concrete rounding function. The element loop is therefore monomorphized
// per mode: no tag test and no indirect call per element.

/// Expand `$body` once per rounding mode with `$round` bound to that mode's
/// `fn(f64) -> f64`.
///
/// ```ignore
/// dispatch_rounding!(mode, round => kernel(out, inp, round))
/// ```
#[macro_export]
macro_rules! dispatch_rounding {
    ($mode:expr, $round:ident => $body:expr) => {
        match $mode {
            $crate::RoundingMode::NearestEven => {
                let $round = f64::round_ties_even;
                $body
            }
            $crate::RoundingMode::HalfAwayFromZero => {
                let $round = f64::round;
                $body
            }
            $crate::RoundingMode::Floor => {
                let $round = f64::floor;
                $body
            }
            $crate::RoundingMode::Ceil => {
                let $round = f64::ceil;
                $body
            }
            $crate::RoundingMode::Truncate => {
                let $round = f64::trunc;
                $body
            }
        }
    };
}

/// Rounding policy applied before clamping to `[quant_min, quant_max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RoundingMode {
    /// Round to nearest, ties to even.
    #[default]
    NearestEven,
    /// Round to nearest, ties away from zero.
    HalfAwayFromZero,
    /// Largest integer ≤ v.
    Floor,
    /// Smallest integer ≥ v.
    Ceil,
    /// Integer part, toward zero.
    Truncate,
}

impl RoundingMode {
    pub const ALL: [RoundingMode; 5] = [
        RoundingMode::NearestEven,
        RoundingMode::HalfAwayFromZero,
        RoundingMode::Floor,
        RoundingMode::Ceil,
        RoundingMode::Truncate,
    ];

    /// Resolve an integer selector. Unknown values fall back to nearest-even.
    pub fn from_selector(selector: i64) -> Self {
        match selector {
            0 => RoundingMode::NearestEven,
            1 => RoundingMode::HalfAwayFromZero,
            2 => RoundingMode::Floor,
            3 => RoundingMode::Ceil,
            4 => RoundingMode::Truncate,
            _ => RoundingMode::NearestEven,
        }
    }

    /// The canonical integer selector of this mode.
    pub fn selector(self) -> i64 {
        match self {
            RoundingMode::NearestEven => 0,
            RoundingMode::HalfAwayFromZero => 1,
            RoundingMode::Floor => 2,
            RoundingMode::Ceil => 3,
            RoundingMode::Truncate => 4,
        }
    }

    /// Round a single value. Convenient for scalar code and tests; tensor
    /// kernels go through `dispatch_rounding!` instead.
    pub fn round(self, v: f64) -> f64 {
        dispatch_rounding!(self, round => round(v))
    }

    pub fn name(self) -> &'static str {
        match self {
            RoundingMode::NearestEven => "nearest-even",
            RoundingMode::HalfAwayFromZero => "half-away-from-zero",
            RoundingMode::Floor => "floor",
            RoundingMode::Ceil => "ceil",
            RoundingMode::Truncate => "truncate",
        }
    }
}

impl fmt::Display for RoundingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RoundingMode {
    type Err = Error;

    /// Names are strict, unlike integer selectors.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RoundingMode::ALL
            .into_iter()
            .find(|m| m.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown rounding mode '{s}'")))
    }
}
