//! Fixed-point simulation time.
//!
//! The clock and every event timestamp use [`SimTime`], a Q40.24 fixed-point
//! scalar (64-bit signed, 24 fractional bits). Scaled integers instead of
//! floats keep millions of small increments from accumulating drift, and give
//! exact equality and total ordering for the event queue.

use fixed::types::I40F24;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};
use std::str::FromStr;

/// A point (or span) on the simulated time axis, in seconds.
///
/// Addition and subtraction are exact on the fixed-point representation.
/// Scalar multiply/divide round-trip through `f64` and accept the resulting
/// precision loss. Ordering compares the raw fixed-point value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime(I40F24);

impl SimTime {
    /// Time zero. Also the "unlimited" sentinel for `max_time` arguments.
    pub const ZERO: SimTime = SimTime(I40F24::ZERO);

    /// Number of fractional bits in the underlying representation.
    pub const FRACTIONAL_BITS: u32 = 24;

    /// Construct from whole seconds.
    pub fn from_secs(secs: i64) -> Self {
        SimTime(I40F24::from_num(secs))
    }

    /// Construct from fractional seconds. Intended for scenario setup and
    /// distributions, not for the hot loop.
    pub fn from_secs_f64(secs: f64) -> Self {
        SimTime(I40F24::from_num(secs))
    }

    /// `from_secs_f64` without the overflow panic: `None` when the value
    /// does not fit the fixed-point range. Untrusted input goes through
    /// here.
    pub fn checked_from_secs_f64(secs: f64) -> Option<Self> {
        I40F24::checked_from_num(secs).map(SimTime)
    }

    /// Convert to `f64` seconds. Display/statistics only.
    pub fn to_f64(self) -> f64 {
        self.0.to_num::<f64>()
    }

    /// Whole-second part, truncated toward zero.
    pub fn whole_secs(self) -> i64 {
        self.0.to_num::<i64>()
    }

    pub fn is_zero(self) -> bool {
        self.0 == I40F24::ZERO
    }

    /// Raw fixed-point bits; exact equality and hashing hinge on these.
    pub fn to_bits(self) -> i64 {
        self.0.to_bits()
    }

    pub fn from_bits(bits: i64) -> Self {
        SimTime(I40F24::from_bits(bits))
    }
}

impl Add for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 + rhs.0)
    }
}

impl Sub for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0 - rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        self.0 += rhs.0;
    }
}

impl SubAssign for SimTime {
    fn sub_assign(&mut self, rhs: SimTime) {
        self.0 -= rhs.0;
    }
}

impl Mul<f64> for SimTime {
    type Output = SimTime;
    fn mul(self, rhs: f64) -> SimTime {
        SimTime::from_secs_f64(self.to_f64() * rhs)
    }
}

impl Div<f64> for SimTime {
    type Output = SimTime;
    fn div(self, rhs: f64) -> SimTime {
        SimTime::from_secs_f64(self.to_f64() / rhs)
    }
}

// ---------------------------------------------------------------------------
// Human-readable form: <sign><days>d<hours>h<minutes>m<seconds>s
// ---------------------------------------------------------------------------

impl fmt::Display for SimTime {
    /// Renders e.g. `1d2h3m4.5s`; units that are zero are omitted, and a
    /// plain zero renders as `0s`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let negative = self.0 < I40F24::ZERO;
        let abs = if negative { SimTime(-self.0) } else { *self };

        let whole = abs.whole_secs();
        let days = whole / 86_400;
        let hours = (whole % 86_400) / 3_600;
        let minutes = (whole % 3_600) / 60;
        let seconds = (whole % 60) as f64 + (abs.to_f64() - whole as f64);

        if negative {
            write!(f, "-")?;
        }
        let mut wrote = false;
        if days != 0 {
            write!(f, "{days}d")?;
            wrote = true;
        }
        if hours != 0 {
            write!(f, "{hours}h")?;
            wrote = true;
        }
        if minutes != 0 {
            write!(f, "{minutes}m")?;
            wrote = true;
        }
        if seconds > 0.0 || !wrote {
            write!(f, "{seconds}s")?;
        }
        Ok(())
    }
}

/// Failure to parse a [`SimTime`] literal.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid time literal: {0:?}")]
pub struct ParseSimTimeError(pub String);

impl FromStr for SimTime {
    type Err = ParseSimTimeError;

    /// Parses the `Display` form. Each `d`/`h`/`m`/`s` component is
    /// optional, a trailing bare number counts as seconds, whitespace is
    /// skipped, and repeated sign characters toggle the sign.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut negative = false;
        let mut total = 0.0f64;
        let mut number = String::new();
        let mut seen_any = false;

        let flush = |number: &mut String, unit: f64, total: &mut f64| -> Result<(), ()> {
            if number.is_empty() {
                return Err(());
            }
            let value: f64 = number.parse().map_err(|_| ())?;
            *total += value * unit;
            number.clear();
            Ok(())
        };

        for c in s.chars() {
            match c {
                ' ' | '\t' => continue,
                '-' if number.is_empty() => negative = !negative,
                '+' if number.is_empty() => {}
                '0'..='9' | '.' => {
                    number.push(c);
                    seen_any = true;
                }
                'd' => flush(&mut number, 86_400.0, &mut total)
                    .map_err(|_| ParseSimTimeError(s.to_owned()))?,
                'h' => flush(&mut number, 3_600.0, &mut total)
                    .map_err(|_| ParseSimTimeError(s.to_owned()))?,
                'm' => flush(&mut number, 60.0, &mut total)
                    .map_err(|_| ParseSimTimeError(s.to_owned()))?,
                's' => flush(&mut number, 1.0, &mut total)
                    .map_err(|_| ParseSimTimeError(s.to_owned()))?,
                _ => return Err(ParseSimTimeError(s.to_owned())),
            }
        }
        // A trailing unitless number counts as seconds.
        if !number.is_empty() {
            flush(&mut number, 1.0, &mut total).map_err(|_| ParseSimTimeError(s.to_owned()))?;
        }
        if !seen_any {
            return Err(ParseSimTimeError(s.to_owned()));
        }

        let signed = if negative { -total } else { total };
        SimTime::checked_from_secs_f64(signed).ok_or_else(|| ParseSimTimeError(s.to_owned()))
    }
}
