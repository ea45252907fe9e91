//! Integer simulation time.
//!
//! Simulation time is tracked in whole milliseconds so that budgets, totals and
//! per-keyframe stamps compare exactly on every peer. Floating point seconds are
//! only produced at the edge, when calling [`Simulation::update`](crate::Simulation::update).

use serde::{Deserialize, Serialize};
use web_time::Duration;

/// A span of simulation time in milliseconds.
///
/// # Examples
///
/// ```
/// use netsim_model::SimTime;
///
/// let step = SimTime::from_seconds(0.1);
/// assert_eq!(step.as_millis(), 100);
/// assert_eq!(step + step, SimTime::from_millis(200));
/// assert!((step.to_real_seconds() - 0.1).abs() < f32::EPSILON);
/// ```
#[derive(
    Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct SimTime(i64);

impl SimTime {
    /// Zero elapsed time.
    pub const ZERO: Self = Self(0);

    /// Creates a time span from whole milliseconds.
    #[inline]
    #[must_use]
    pub const fn from_millis(millis: i64) -> Self {
        Self(millis)
    }

    /// Creates a time span from real seconds, rounded to the nearest millisecond.
    ///
    /// Non-finite and negative inputs map to [`SimTime::ZERO`].
    #[must_use]
    pub fn from_seconds(seconds: f32) -> Self {
        if !seconds.is_finite() || seconds <= 0.0 {
            return Self::ZERO;
        }
        Self((f64::from(seconds) * 1000.0).round() as i64)
    }

    /// The span in milliseconds.
    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> i64 {
        self.0
    }

    /// The span in real seconds.
    #[inline]
    #[must_use]
    pub fn to_real_seconds(self) -> f32 {
        (self.0 as f64 / 1000.0) as f32
    }

    /// Returns `true` if the span is strictly positive.
    #[inline]
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Subtraction clamped at zero.
    #[inline]
    #[must_use]
    pub fn saturating_sub(self, rhs: Self) -> Self {
        Self((self.0 - rhs.0).max(0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}ms", self.0)
    }
}

impl std::ops::Add for SimTime {
    type Output = Self;

    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::AddAssign for SimTime {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl std::ops::Sub for SimTime {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::SubAssign for SimTime {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        self.0 -= rhs.0;
    }
}

impl From<Duration> for SimTime {
    fn from(duration: Duration) -> Self {
        Self(i64::try_from(duration.as_millis()).unwrap_or(i64::MAX))
    }
}
