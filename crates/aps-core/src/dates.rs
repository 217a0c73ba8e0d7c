//! Date and date-range primitives shared by the whole engine.
//!
//! All timestamps are `chrono` UTC instants with one-second resolution.
//! `DATE_MIN` and `DATE_MAX` stand in for the infinite past and future:
//! an event at `DATE_MIN` happens before anything else in the horizon,
//! a range ending at `DATE_MAX` never closes.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Timestamp type used throughout the engine.
pub type Date = DateTime<Utc>;

/// Infinite past sentinel.
pub const DATE_MIN: Date = DateTime::<Utc>::MIN_UTC;

/// Infinite future sentinel.
pub const DATE_MAX: Date = DateTime::<Utc>::MAX_UTC;

/// Build a date from a calendar timestamp, for tests and loaders.
pub fn date(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Date {
    Utc.with_ymd_and_hms(year, month, day, hour, min, sec).unwrap()
}

/// A half-open `[start, end)` date interval.
///
/// The default range spans the whole horizon, which is how effectivity
/// windows behave when left unspecified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Date,
    pub end: Date,
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange {
            start: DATE_MIN,
            end: DATE_MAX,
        }
    }
}

impl DateRange {
    /// Create a range, swapping the bounds when they are reversed.
    pub fn new(start: Date, end: Date) -> Self {
        if end < start {
            DateRange { start: end, end: start }
        } else {
            DateRange { start, end }
        }
    }

    /// A degenerate range covering a single instant.
    pub fn at(d: Date) -> Self {
        DateRange { start: d, end: d }
    }

    /// True when the date falls inside `[start, end)`. A degenerate range
    /// contains exactly its own instant.
    pub fn contains(&self, d: Date) -> bool {
        (d >= self.start && d < self.end) || (self.start == self.end && d == self.start)
    }

    /// True when the two ranges share at least one instant.
    pub fn overlaps(&self, other: &DateRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Length of the range. Saturates near the sentinels.
    pub fn duration(&self) -> Duration {
        self.end.signed_duration_since(self.start)
    }

    /// True when the range covers the whole horizon.
    pub fn is_unbounded(&self) -> bool {
        self.start == DATE_MIN && self.end == DATE_MAX
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{} - {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_swaps_reversed_bounds() {
        let a = date(2024, 3, 1, 0, 0, 0);
        let b = date(2024, 3, 5, 0, 0, 0);
        let r = DateRange::new(b, a);
        assert_eq!(r.start, a);
        assert_eq!(r.end, b);
    }

    #[test]
    fn test_contains_half_open() {
        let r = DateRange::new(date(2024, 3, 1, 0, 0, 0), date(2024, 3, 5, 0, 0, 0));
        assert!(r.contains(date(2024, 3, 1, 0, 0, 0)));
        assert!(r.contains(date(2024, 3, 4, 23, 59, 59)));
        assert!(!r.contains(date(2024, 3, 5, 0, 0, 0)));
    }

    #[test]
    fn test_degenerate_range_contains_its_instant() {
        let d = date(2024, 3, 1, 12, 0, 0);
        let r = DateRange::at(d);
        assert!(r.contains(d));
        assert!(!r.contains(d + Duration::seconds(1)));
    }

    #[test]
    fn test_default_is_unbounded() {
        let r = DateRange::default();
        assert!(r.is_unbounded());
        assert!(r.contains(date(1970, 1, 1, 0, 0, 0)));
    }

    #[test]
    fn test_overlaps() {
        let a = DateRange::new(date(2024, 1, 1, 0, 0, 0), date(2024, 2, 1, 0, 0, 0));
        let b = DateRange::new(date(2024, 1, 15, 0, 0, 0), date(2024, 3, 1, 0, 0, 0));
        let c = DateRange::new(date(2024, 2, 1, 0, 0, 0), date(2024, 3, 1, 0, 0, 0));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
    }
}
