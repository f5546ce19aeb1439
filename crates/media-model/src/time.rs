//! Rational media time and time ranges.
//!
//! Sample timestamps coming out of a decoder are rational (`value / timescale`),
//! so two timestamps with different timescales can still be compared and
//! combined without drift.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Sub};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Timescale used when converting from seconds or [`Duration`].
pub const NANOS_TIMESCALE: u32 = 1_000_000_000;

/// A point (or length) on a media timeline, expressed as `value / timescale` seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MediaTime {
    pub value: i64,
    pub timescale: u32,
}

impl MediaTime {
    pub const ZERO: MediaTime = MediaTime {
        value: 0,
        timescale: 1,
    };

    /// Create a new time. A zero timescale is treated as 1.
    pub const fn new(value: i64, timescale: u32) -> Self {
        Self {
            value,
            timescale: if timescale == 0 { 1 } else { timescale },
        }
    }

    /// Create a time from seconds at the given timescale (rounded to the nearest tick).
    pub fn from_secs_with_timescale(secs: f64, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        Self {
            value: (secs * timescale as f64).round() as i64,
            timescale,
        }
    }

    /// Create a time from seconds with nanosecond resolution.
    pub fn from_secs(secs: f64) -> Self {
        Self::from_secs_with_timescale(secs, NANOS_TIMESCALE)
    }

    pub fn from_duration(duration: Duration) -> Self {
        Self::new(duration.as_nanos() as i64, NANOS_TIMESCALE)
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.value as f64 / self.timescale as f64
    }

    /// Re-express this time in another timescale, rounding to the nearest tick.
    pub fn convert_scale(self, timescale: u32) -> Self {
        let timescale = timescale.max(1);
        if timescale == self.timescale {
            return self;
        }
        let numerator = self.value as i128 * timescale as i128;
        let denominator = self.timescale as i128;
        let mut quotient = numerator.div_euclid(denominator);
        if numerator.rem_euclid(denominator) * 2 >= denominator {
            quotient += 1;
        }
        Self::new(quotient as i64, timescale)
    }

    pub fn is_positive(&self) -> bool {
        self.value > 0
    }

    pub fn is_negative(&self) -> bool {
        self.value < 0
    }
}

impl Default for MediaTime {
    fn default() -> Self {
        Self::ZERO
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    a
}

/// Smallest timescale both operands convert to exactly, or nanoseconds when
/// that would overflow.
fn common_timescale(a: u32, b: u32) -> u32 {
    if a == b {
        return a;
    }
    let lcm = a as u64 / gcd(a as u64, b as u64) * b as u64;
    u32::try_from(lcm).unwrap_or(NANOS_TIMESCALE)
}

impl PartialEq for MediaTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for MediaTime {}

impl PartialOrd for MediaTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for MediaTime {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.value as i128 * other.timescale as i128;
        let rhs = other.value as i128 * self.timescale as i128;
        lhs.cmp(&rhs)
    }
}

impl Add for MediaTime {
    type Output = MediaTime;

    fn add(self, rhs: MediaTime) -> MediaTime {
        let timescale = common_timescale(self.timescale, rhs.timescale);
        let a = self.convert_scale(timescale);
        let b = rhs.convert_scale(timescale);
        MediaTime::new(a.value + b.value, timescale)
    }
}

impl Sub for MediaTime {
    type Output = MediaTime;

    fn sub(self, rhs: MediaTime) -> MediaTime {
        let timescale = common_timescale(self.timescale, rhs.timescale);
        let a = self.convert_scale(timescale);
        let b = rhs.convert_scale(timescale);
        MediaTime::new(a.value - b.value, timescale)
    }
}

impl fmt::Display for MediaTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// A span on a media timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: MediaTime,
    pub duration: MediaTime,
}

impl TimeRange {
    pub fn new(start: MediaTime, duration: MediaTime) -> Self {
        Self { start, duration }
    }

    pub fn from_secs(start_secs: f64, duration_secs: f64) -> Self {
        Self {
            start: MediaTime::from_secs(start_secs),
            duration: MediaTime::from_secs(duration_secs),
        }
    }

    /// Range starting at zero with the given length.
    pub fn with_duration(duration: MediaTime) -> Self {
        Self {
            start: MediaTime::ZERO,
            duration,
        }
    }

    pub fn end(&self) -> MediaTime {
        self.start + self.duration
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }

    /// A range with no positive length covers no samples.
    pub fn is_empty(&self) -> bool {
        !self.duration.is_positive()
    }

    /// Whether `time` lies in `[start, end)`.
    pub fn contains_time(&self, time: MediaTime) -> bool {
        time >= self.start && time < self.end()
    }

    /// Overlap of two ranges, or `None` when they do not overlap.
    pub fn intersection(&self, other: &TimeRange) -> Option<TimeRange> {
        let start = self.start.max(other.start);
        let end = self.end().min(other.end());
        if end <= start {
            return None;
        }
        Some(TimeRange::new(start, end - start))
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end())
    }
}
