//! Calendars: time-phased value lookup.
//!
//! A calendar is an ordered set of buckets. Each bucket carries a date
//! range, a priority (lower wins on overlap), a weekday mask, a daily
//! start/end time and a value. Outside any effective bucket the
//! calendar-level default applies. Availability calendars are ordinary
//! value calendars interpreted as booleans (non-zero = available).
//!
//! Buckets precompute the second offsets within a week at which their
//! effectivity toggles; the event iterator uses those offsets to walk
//! the dates where the calendar value can change, in either direction.

use crate::dates::{Date, DATE_MAX, DATE_MIN};
use crate::error::{PlanError, PlanResult};
use chrono::{Datelike, Duration, Timelike};

const WEEK_SECONDS: i64 = 7 * 86400;

/// Hard cap on materialized change events, so that an unbounded bucket
/// with a weekly window cannot expand forever.
const MAX_CHANGE_EVENTS: usize = 20_000;

/// A time bucket within a calendar.
#[derive(Debug, Clone)]
pub struct CalendarBucket {
    /// Identifier, unique within the owning calendar.
    pub id: i32,
    pub start: Date,
    pub end: Date,
    /// Lower numbers win when buckets overlap. Default 0.
    pub priority: i32,
    /// Weekday mask: bit 0 = Sunday ... bit 6 = Saturday. Default 127.
    pub days: u8,
    /// Start time on effective days, seconds since midnight (0..=86399).
    pub start_time: i64,
    /// End time on effective days, seconds since midnight (1..=86400).
    pub end_time: i64,
    pub value: f64,
    /// `[on, off)` second ranges within a week where the bucket is in
    /// its daily window, 0 = Sunday midnight. Empty means always-on.
    offsets: Vec<(i64, i64)>,
}

impl CalendarBucket {
    pub fn new(start: Date, end: Date) -> Self {
        CalendarBucket {
            id: 0,
            start,
            end,
            priority: 0,
            days: 127,
            start_time: 0,
            end_time: 86400,
            value: 0.0,
            offsets: Vec::new(),
        }
    }

    pub fn with_value(mut self, v: f64) -> Self {
        self.value = v;
        self
    }

    pub fn with_priority(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }

    pub fn with_days(mut self, mask: u8) -> Self {
        self.days = mask;
        self
    }

    pub fn with_day_window(mut self, start_time: i64, end_time: i64) -> Self {
        self.start_time = start_time;
        self.end_time = end_time;
        self
    }

    fn validate(&self) -> PlanResult<()> {
        if self.days > 127 {
            return Err(PlanError::data("Calendar bucket days must be between 0 and 127"));
        }
        if !(0..=86399).contains(&self.start_time) {
            return Err(PlanError::data(
                "Calendar bucket start time must be between 0 and 86399 seconds",
            ));
        }
        if !(0..=86400).contains(&self.end_time) {
            return Err(PlanError::data(
                "Calendar bucket end time must be between 0 and 86400 seconds",
            ));
        }
        Ok(())
    }

    /// Rebuild the weekly toggle offsets from days/start_time/end_time.
    fn update_offsets(&mut self) {
        self.offsets.clear();
        if self.days == 127 && self.start_time == 0 && self.end_time == 86400 {
            // Continuously effective within the date range.
            return;
        }
        for day in 0..7i64 {
            if self.days & (1 << day) == 0 {
                continue;
            }
            let on = day * 86400 + self.start_time;
            let off = day * 86400 + self.end_time;
            // Merge with the previous range when the window is contiguous
            // across midnight (full-day windows on consecutive days).
            if let Some(last) = self.offsets.last_mut() {
                if last.1 == on {
                    last.1 = off;
                    continue;
                }
            }
            self.offsets.push((on, off));
        }
    }

    /// True when the daily/weekly window covers the instant. The date
    /// range is checked separately.
    fn window_covers(&self, d: Date) -> bool {
        if self.offsets.is_empty() {
            return true;
        }
        let w = week_seconds(d);
        self.offsets.iter().any(|&(on, off)| w >= on && w < off)
    }

    /// True when the bucket is effective at the instant.
    pub fn effective_at(&self, d: Date) -> bool {
        d >= self.start && d < self.end && self.window_covers(d)
    }

    /// The next date strictly after `d` where this bucket's effectivity
    /// can toggle, or None when there is none before the horizon end.
    fn next_toggle_after(&self, d: Date) -> Option<Date> {
        let mut best: Option<Date> = None;
        let mut consider = |c: Date| {
            if c > d && best.map_or(true, |b| c < b) {
                best = Some(c);
            }
        };
        if self.start > d {
            consider(self.start);
        }
        if self.end < DATE_MAX && self.end > d {
            consider(self.end);
        }
        if !self.offsets.is_empty() && d < self.end {
            let base = if d > self.start { d } else { self.start };
            for &(on, off) in &self.offsets {
                for o in [on, off] {
                    if let Some(c) = next_week_occurrence(base, o) {
                        if c < self.end {
                            consider(c);
                        }
                    }
                }
            }
        }
        best
    }

    /// The previous date strictly before `d` where this bucket's
    /// effectivity can toggle.
    fn prev_toggle_before(&self, d: Date) -> Option<Date> {
        let mut best: Option<Date> = None;
        let mut consider = |c: Date| {
            if c < d && best.map_or(true, |b| c > b) {
                best = Some(c);
            }
        };
        if self.start < d {
            consider(self.start);
        }
        if self.end < DATE_MAX && self.end < d {
            consider(self.end);
        }
        if !self.offsets.is_empty() && d > self.start {
            let base = if d < self.end { d } else { self.end };
            for &(on, off) in &self.offsets {
                for o in [on, off] {
                    if let Some(c) = prev_week_occurrence(base, o) {
                        if c >= self.start {
                            consider(c);
                        }
                    }
                }
            }
        }
        best
    }
}

/// Seconds since the start of the week (Sunday midnight) for an instant.
fn week_seconds(d: Date) -> i64 {
    d.weekday().num_days_from_sunday() as i64 * 86400 + d.time().num_seconds_from_midnight() as i64
}

/// First instant strictly after `d` whose week offset equals `offset`.
fn next_week_occurrence(d: Date, offset: i64) -> Option<Date> {
    let w = week_seconds(d);
    let mut delta = (offset - w).rem_euclid(WEEK_SECONDS);
    if delta == 0 {
        delta = WEEK_SECONDS;
    }
    d.checked_add_signed(Duration::seconds(delta))
}

/// Last instant strictly before `d` whose week offset equals `offset`.
fn prev_week_occurrence(d: Date, offset: i64) -> Option<Date> {
    let w = week_seconds(d);
    let mut delta = (w - offset).rem_euclid(WEEK_SECONDS);
    if delta == 0 {
        delta = WEEK_SECONDS;
    }
    d.checked_sub_signed(Duration::seconds(delta))
}

/// A calendar storing double values in prioritized buckets.
#[derive(Debug, Clone)]
pub struct Calendar {
    pub name: String,
    /// Value returned when no bucket is effective.
    pub default_value: f64,
    /// Buckets in ascending (start, priority) order.
    buckets: Vec<CalendarBucket>,
    next_id: i32,
}

impl Calendar {
    pub fn new(name: impl Into<String>, default_value: f64) -> Self {
        Calendar {
            name: name.into(),
            default_value,
            buckets: Vec::new(),
            next_id: 1,
        }
    }

    /// Add a bucket, keeping the list sorted on (start, priority).
    /// Returns the bucket identifier.
    pub fn add_bucket(&mut self, mut bucket: CalendarBucket) -> PlanResult<i32> {
        bucket.validate()?;
        if bucket.end < bucket.start {
            return Err(PlanError::data("Calendar bucket end must not precede its start"));
        }
        bucket.id = self.next_id;
        self.next_id += 1;
        bucket.update_offsets();
        let pos = self
            .buckets
            .partition_point(|b| (b.start, b.priority) <= (bucket.start, bucket.priority));
        let id = bucket.id;
        self.buckets.insert(pos, bucket);
        Ok(id)
    }

    /// Shorthand for a plain value bucket over a date range.
    pub fn set_value(&mut self, start: Date, end: Date, value: f64) -> PlanResult<i32> {
        self.add_bucket(CalendarBucket::new(start, end).with_value(value))
    }

    pub fn remove_bucket(&mut self, id: i32) -> bool {
        let before = self.buckets.len();
        self.buckets.retain(|b| b.id != id);
        before != self.buckets.len()
    }

    pub fn buckets(&self) -> impl Iterator<Item = &CalendarBucket> {
        self.buckets.iter()
    }

    /// The effective bucket at an instant: among all effective buckets
    /// the one with the lowest priority, earliest in sort order on ties.
    pub fn find_bucket(&self, d: Date) -> Option<&CalendarBucket> {
        let mut found: Option<&CalendarBucket> = None;
        for b in &self.buckets {
            if b.effective_at(d) && found.map_or(true, |f| b.priority < f.priority) {
                found = Some(b);
            }
        }
        found
    }

    /// The calendar value at an instant.
    pub fn value_at(&self, d: Date) -> f64 {
        self.find_bucket(d).map_or(self.default_value, |b| b.value)
    }

    /// Boolean interpretation, used by availability calendars.
    pub fn available_at(&self, d: Date) -> bool {
        self.value_at(d) != 0.0
    }

    /// Iterator over the dates where the calendar value can change.
    pub fn events(&self, from: Date, forward: bool) -> CalendarEventIterator<'_> {
        CalendarEventIterator {
            calendar: self,
            date: from,
            forward,
        }
    }

    /// The bucket boundaries of the calendar with the value holding
    /// from each boundary on. Bucketed resources reset their capacity
    /// at every boundary, even when the value repeats.
    pub fn boundary_events(&self) -> Vec<(Date, f64)> {
        let mut dates: Vec<Date> = Vec::new();
        for b in &self.buckets {
            dates.push(b.start);
            if b.end < DATE_MAX {
                dates.push(b.end);
            }
        }
        dates.sort();
        dates.dedup();
        dates.into_iter().map(|d| (d, self.value_at(d))).collect()
    }

    /// Materialize the value-change profile of the whole calendar as a
    /// sorted list of (date, new value) pairs. Fails when a bucket with
    /// a weekly window spans an unbounded range.
    pub fn change_events(&self) -> PlanResult<Vec<(Date, f64)>> {
        let mut candidates: Vec<Date> = Vec::new();
        for b in &self.buckets {
            candidates.push(b.start);
            if b.end < DATE_MAX {
                candidates.push(b.end);
            }
            if b.offsets.is_empty() {
                continue;
            }
            let mut d = b.start;
            loop {
                let next = b.next_toggle_after(d);
                match next {
                    Some(n) if n < b.end => {
                        candidates.push(n);
                        d = n;
                    }
                    _ => break,
                }
                if candidates.len() > MAX_CHANGE_EVENTS {
                    return Err(PlanError::runtime(format!(
                        "Calendar '{}' expands to too many change events",
                        self.name
                    )));
                }
            }
        }
        candidates.sort();
        candidates.dedup();
        let mut result = Vec::new();
        let mut cur = self.default_value;
        for d in candidates {
            let v = self.value_at(d);
            if v != cur {
                result.push((d, v));
                cur = v;
            }
        }
        Ok(result)
    }
}

/// Walks the dates where a calendar's value can change.
///
/// A forward iterator reports the value holding from its current date
/// onward; a backward iterator reports the value holding just before
/// its current date, so that the same transition logic works when the
/// availability walk runs in either direction.
pub struct CalendarEventIterator<'a> {
    calendar: &'a Calendar,
    date: Date,
    forward: bool,
}

impl<'a> CalendarEventIterator<'a> {
    pub fn date(&self) -> Date {
        self.date
    }

    pub fn value(&self) -> f64 {
        self.calendar.value_at(self.probe())
    }

    pub fn available(&self) -> bool {
        self.calendar.value_at(self.probe()) != 0.0
    }

    fn probe(&self) -> Date {
        if self.forward {
            self.date
        } else {
            self.date
                .checked_sub_signed(Duration::seconds(1))
                .unwrap_or(DATE_MIN)
        }
    }

    /// Move to the next change date; the date saturates at the horizon.
    pub fn step(&mut self) {
        if self.forward {
            let mut best: Option<Date> = None;
            for b in &self.calendar.buckets {
                if let Some(c) = b.next_toggle_after(self.date) {
                    if best.map_or(true, |x| c < x) {
                        best = Some(c);
                    }
                }
            }
            self.date = best.unwrap_or(DATE_MAX);
        } else {
            let mut best: Option<Date> = None;
            for b in &self.calendar.buckets {
                if let Some(c) = b.prev_toggle_before(self.date) {
                    if best.map_or(true, |x| c > x) {
                        best = Some(c);
                    }
                }
            }
            self.date = best.unwrap_or(DATE_MIN);
        }
    }
}

/// Availability windows of a location, resolved against an optional
/// calendar. With no calendar everything is available.
pub fn is_available(cal: Option<&Calendar>, d: Date) -> bool {
    cal.map_or(true, |c| c.available_at(d))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::date;

    #[test]
    fn test_default_value_outside_buckets() {
        let mut cal = Calendar::new("cap", 2.0);
        cal.set_value(date(2024, 1, 10, 0, 0, 0), date(2024, 1, 20, 0, 0, 0), 5.0)
            .unwrap();
        assert_eq!(cal.value_at(date(2024, 1, 5, 0, 0, 0)), 2.0);
        assert_eq!(cal.value_at(date(2024, 1, 15, 0, 0, 0)), 5.0);
        assert_eq!(cal.value_at(date(2024, 1, 20, 0, 0, 0)), 2.0);
    }

    #[test]
    fn test_lowest_priority_wins_on_overlap() {
        let mut cal = Calendar::new("cap", 0.0);
        cal.add_bucket(
            CalendarBucket::new(date(2024, 1, 1, 0, 0, 0), date(2024, 2, 1, 0, 0, 0))
                .with_value(1.0)
                .with_priority(10),
        )
        .unwrap();
        cal.add_bucket(
            CalendarBucket::new(date(2024, 1, 10, 0, 0, 0), date(2024, 1, 12, 0, 0, 0))
                .with_value(9.0)
                .with_priority(1),
        )
        .unwrap();
        assert_eq!(cal.value_at(date(2024, 1, 5, 0, 0, 0)), 1.0);
        assert_eq!(cal.value_at(date(2024, 1, 11, 0, 0, 0)), 9.0);
    }

    #[test]
    fn test_weekday_mask_and_day_window() {
        // Weekdays only, 9:00-17:00. 2024-01-08 is a Monday.
        let mut cal = Calendar::new("hours", 0.0);
        cal.add_bucket(
            CalendarBucket::new(date(2024, 1, 1, 0, 0, 0), date(2025, 1, 1, 0, 0, 0))
                .with_value(1.0)
                .with_days(0b0111110)
                .with_day_window(9 * 3600, 17 * 3600),
        )
        .unwrap();
        assert!(cal.available_at(date(2024, 1, 8, 10, 0, 0)));
        assert!(!cal.available_at(date(2024, 1, 8, 8, 0, 0)));
        assert!(!cal.available_at(date(2024, 1, 8, 17, 0, 0)));
        // Sunday 2024-01-07
        assert!(!cal.available_at(date(2024, 1, 7, 10, 0, 0)));
    }

    #[test]
    fn test_invalid_days_rejected() {
        let mut cal = Calendar::new("x", 0.0);
        let r = cal.add_bucket(
            CalendarBucket::new(DATE_MIN, DATE_MAX).with_days(200),
        );
        assert!(matches!(r, Err(PlanError::Data(_))));
    }

    #[test]
    fn test_forward_event_iteration() {
        let mut cal = Calendar::new("hours", 0.0);
        cal.add_bucket(
            CalendarBucket::new(date(2024, 1, 8, 0, 0, 0), date(2024, 1, 12, 0, 0, 0))
                .with_value(1.0)
                .with_day_window(9 * 3600, 17 * 3600),
        )
        .unwrap();
        let mut it = cal.events(date(2024, 1, 8, 10, 0, 0), true);
        assert!(it.available());
        it.step();
        assert_eq!(it.date(), date(2024, 1, 8, 17, 0, 0));
        assert!(!it.available());
        it.step();
        assert_eq!(it.date(), date(2024, 1, 9, 9, 0, 0));
        assert!(it.available());
    }

    #[test]
    fn test_backward_event_iteration_reports_value_before() {
        let mut cal = Calendar::new("hours", 0.0);
        cal.add_bucket(
            CalendarBucket::new(date(2024, 1, 8, 0, 0, 0), date(2024, 1, 12, 0, 0, 0))
                .with_value(1.0)
                .with_day_window(9 * 3600, 17 * 3600),
        )
        .unwrap();
        let mut it = cal.events(date(2024, 1, 9, 12, 0, 0), false);
        assert!(it.available());
        it.step();
        assert_eq!(it.date(), date(2024, 1, 9, 9, 0, 0));
        // Just before 9:00 the calendar is unavailable.
        assert!(!it.available());
        it.step();
        assert_eq!(it.date(), date(2024, 1, 8, 17, 0, 0));
        assert!(it.available());
    }

    #[test]
    fn test_change_events_profile() {
        let mut cal = Calendar::new("min", 0.0);
        cal.set_value(date(2024, 1, 10, 0, 0, 0), date(2024, 1, 20, 0, 0, 0), 5.0)
            .unwrap();
        cal.set_value(date(2024, 1, 20, 0, 0, 0), date(2024, 1, 30, 0, 0, 0), 3.0)
            .unwrap();
        let events = cal.change_events().unwrap();
        assert_eq!(
            events,
            vec![
                (date(2024, 1, 10, 0, 0, 0), 5.0),
                (date(2024, 1, 20, 0, 0, 0), 3.0),
                (date(2024, 1, 30, 0, 0, 0), 0.0),
            ]
        );
    }
}
