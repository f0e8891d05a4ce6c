//! Simulation-clock time.
//!
//! The core runs against the discrete-event host's clock, not the wall
//! clock. `SimTime` is an instant (or span) on that clock, measured in
//! seconds. Model files declare durations in milliseconds; they are
//! converted at load.

use std::fmt;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};

/// An instant or span on the simulation clock, in seconds.
///
/// # Examples
///
/// ```
/// use situsync::SimTime;
///
/// let start = SimTime::from_secs(1.0);
/// let duration = SimTime::from_millis(10_000.0);
/// assert_eq!((start + duration).as_secs(), 11.0);
/// assert!(start < start + duration);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SimTime(f64);

impl SimTime {
    /// The clock origin.
    pub const ZERO: Self = Self(0.0);

    /// Creates a time from seconds.
    #[must_use]
    pub const fn from_secs(secs: f64) -> Self {
        Self(secs)
    }

    /// Creates a time from milliseconds (the model-file unit).
    #[must_use]
    pub fn from_millis(millis: f64) -> Self {
        Self(millis / 1000.0)
    }

    /// The time in seconds.
    #[must_use]
    pub const fn as_secs(self) -> f64 {
        self.0
    }

    /// Returns true if this span is the zero span.
    #[must_use]
    pub fn is_zero(self) -> bool {
        self.0 == 0.0
    }
}

impl Add for SimTime {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self(self.0 + rhs.0)
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: Self) {
        self.0 += rhs.0;
    }
}

impl Sub for SimTime {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self(self.0 - rhs.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}s", self.0)
    }
}
