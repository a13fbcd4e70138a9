//! Simulation time as an opaque, totally ordered tick count.
//!
//! The scheduler never scales or converts time: whoever pushes a delay has
//! already expressed it in ticks of the design's timescale.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A point in simulation time, measured in ticks.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct SimTime(u64);

impl SimTime {
    /// Time zero, where every simulation starts.
    pub const ZERO: SimTime = SimTime(0);

    /// The latest representable time.
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// Creates a time point from a raw tick count.
    pub const fn from_ticks(ticks: u64) -> Self {
        Self(ticks)
    }

    /// Returns the raw tick count.
    pub const fn ticks(self) -> u64 {
        self.0
    }

    /// Returns the time `delay` ticks after `self`, or `None` on overflow.
    pub fn checked_add(self, delay: u64) -> Option<Self> {
        self.0.checked_add(delay).map(Self)
    }
}

impl From<u64> for SimTime {
    fn from(ticks: u64) -> Self {
        Self(ticks)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
