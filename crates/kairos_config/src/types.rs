//! Configuration types deserialized from `kairos.toml`.

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

/// Default ceiling on dispatcher rounds within one simulation instant.
pub const DEFAULT_MAX_ROUNDS_PER_INSTANT: u32 = 100_000;

/// The top-level run configuration parsed from `kairos.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimConfig {
    /// Run metadata and limits.
    #[serde(default)]
    pub simulation: SimulationSection,
    /// Scheduler tuning.
    #[serde(default)]
    pub scheduler: SchedulerSection,
}

/// The `[simulation]` table.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimulationSection {
    /// Name of the simulated testbench, used in log output.
    #[serde(default)]
    pub name: String,
    /// Stop before advancing past this time, in ticks.
    #[serde(default)]
    pub time_limit: Option<u64>,
    /// The length of one tick. Informational only: the scheduler never scales time.
    #[serde(default, deserialize_with = "deserialize_timescale")]
    pub timescale: Option<Timescale>,
}

/// The `[scheduler]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct SchedulerSection {
    /// Maximum number of resume rounds within one instant before the run is
    /// aborted as non-converging.
    #[serde(default = "default_max_rounds")]
    pub max_rounds_per_instant: u32,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_rounds_per_instant: DEFAULT_MAX_ROUNDS_PER_INSTANT,
        }
    }
}

fn default_max_rounds() -> u32 {
    DEFAULT_MAX_ROUNDS_PER_INSTANT
}

/// A time unit as written in a Verilog `` `timescale `` directive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TimeUnit {
    /// Femtoseconds.
    Fs,
    /// Picoseconds.
    Ps,
    /// Nanoseconds.
    Ns,
    /// Microseconds.
    Us,
    /// Milliseconds.
    Ms,
    /// Seconds.
    S,
}

impl TimeUnit {
    /// Number of femtoseconds in one unit.
    pub fn femtoseconds(self) -> u64 {
        match self {
            TimeUnit::Fs => 1,
            TimeUnit::Ps => 1_000,
            TimeUnit::Ns => 1_000_000,
            TimeUnit::Us => 1_000_000_000,
            TimeUnit::Ms => 1_000_000_000_000,
            TimeUnit::S => 1_000_000_000_000_000,
        }
    }

    fn suffix(self) -> &'static str {
        match self {
            TimeUnit::Fs => "fs",
            TimeUnit::Ps => "ps",
            TimeUnit::Ns => "ns",
            TimeUnit::Us => "us",
            TimeUnit::Ms => "ms",
            TimeUnit::S => "s",
        }
    }
}

/// The duration of one simulation tick, e.g. `10ns`.
///
/// Magnitudes are restricted to 1, 10 and 100 as in Verilog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timescale {
    /// 1, 10 or 100.
    pub magnitude: u16,
    /// The unit the magnitude applies to.
    pub unit: TimeUnit,
}

impl Timescale {
    /// Returns the tick length in femtoseconds.
    pub fn femtoseconds_per_tick(&self) -> u64 {
        u64::from(self.magnitude) * self.unit.femtoseconds()
    }
}

impl fmt::Display for Timescale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.magnitude, self.unit.suffix())
    }
}

/// Error returned when a timescale string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTimescaleError(pub String);

impl fmt::Display for ParseTimescaleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid timescale '{}'", self.0)
    }
}

impl std::error::Error for ParseTimescaleError {}

impl FromStr for Timescale {
    type Err = ParseTimescaleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let split = trimmed
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| ParseTimescaleError(s.to_string()))?;
        let (digits, unit) = trimmed.split_at(split);
        let magnitude: u16 = digits
            .parse()
            .map_err(|_| ParseTimescaleError(s.to_string()))?;
        if !matches!(magnitude, 1 | 10 | 100) {
            return Err(ParseTimescaleError(s.to_string()));
        }
        let unit = match unit.trim() {
            "fs" => TimeUnit::Fs,
            "ps" => TimeUnit::Ps,
            "ns" => TimeUnit::Ns,
            "us" => TimeUnit::Us,
            "ms" => TimeUnit::Ms,
            "s" => TimeUnit::S,
            _ => return Err(ParseTimescaleError(s.to_string())),
        };
        Ok(Self { magnitude, unit })
    }
}

/// Deserializes an optional timescale from a string such as `"10ns"`.
fn deserialize_timescale<'de, D>(deserializer: D) -> Result<Option<Timescale>, D::Error>
where
    D: Deserializer<'de>,
{
    struct TimescaleVisitor;

    impl<'de> Visitor<'de> for TimescaleVisitor {
        type Value = Option<Timescale>;

        fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
            formatter.write_str("a timescale such as \"1ns\" or \"100ps\"")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            v.parse().map(Some).map_err(E::custom)
        }
    }

    deserializer.deserialize_str(TimescaleVisitor)
}
