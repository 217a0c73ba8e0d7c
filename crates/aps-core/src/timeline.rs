//! The ordered event list backing buffers and resources.
//!
//! A `Timeline` keeps events sorted by `(date, rank, insertion seq)`
//! and maintains, for every event, the running on-hand after the event
//! plus cumulative produced and consumed totals. The rank orders events
//! on the same date: on-hand resets first, then envelope changes, then
//! producers before consumers, so that an on-hand query at a date
//! boundary sees material arrive before it is consumed.
//!
//! Events reference their source (a flow plan or load plan) by id; the
//! timeline itself never dereferences the source.

use crate::dates::Date;
use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Unbounded};

/// Monotonic tie-breaker within a (date, rank) slot.
pub type EventSeq = u64;

/// Total order of timeline events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    pub date: Date,
    pub rank: u8,
    pub seq: EventSeq,
}

impl EventKey {
    /// Upper bound for all events on a date, for range queries.
    pub fn date_end(date: Date) -> EventKey {
        EventKey {
            date,
            rank: u8::MAX,
            seq: EventSeq::MAX,
        }
    }
}

const RANK_SET_ONHAND: u8 = 0;
const RANK_MAX: u8 = 1;
const RANK_MIN: u8 = 2;
const RANK_PRODUCE: u8 = 3;
const RANK_CONSUME: u8 = 4;

/// What an event does to the running value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind<S> {
    /// Signed on-hand change caused by a flow plan or load plan.
    Change(S),
    /// Reset of the running value, used for initial inventory and for
    /// the bucket boundaries of bucketed resources.
    SetOnhand,
    /// Minimum envelope change point.
    Min,
    /// Maximum envelope change point.
    Max,
}

/// One node of the timeline.
#[derive(Debug, Clone)]
pub struct Event<S> {
    pub kind: EventKind<S>,
    /// Signed quantity for changes, the new value for resets and
    /// envelope change points.
    pub quantity: f64,
    onhand: f64,
    cum_produced: f64,
    cum_consumed: f64,
}

impl<S> Event<S> {
    /// Running on-hand including this event.
    pub fn onhand(&self) -> f64 {
        self.onhand
    }

    /// Sum of positive change quantities up to and including this event.
    pub fn cum_produced(&self) -> f64 {
        self.cum_produced
    }

    /// Sum of absolute negative change quantities up to and including
    /// this event.
    pub fn cum_consumed(&self) -> f64 {
        self.cum_consumed
    }

    pub fn is_change(&self) -> bool {
        matches!(self.kind, EventKind::Change(_))
    }

    pub fn source(&self) -> Option<&S> {
        match &self.kind {
            EventKind::Change(s) => Some(s),
            _ => None,
        }
    }
}

fn rank_of<S>(kind: &EventKind<S>, quantity: f64) -> u8 {
    match kind {
        EventKind::SetOnhand => RANK_SET_ONHAND,
        EventKind::Max => RANK_MAX,
        EventKind::Min => RANK_MIN,
        EventKind::Change(_) => {
            if quantity >= 0.0 {
                RANK_PRODUCE
            } else {
                RANK_CONSUME
            }
        }
    }
}

/// Ordered event list with running totals.
#[derive(Debug, Clone, Default)]
pub struct Timeline<S> {
    events: BTreeMap<EventKey, Event<S>>,
    seq: EventSeq,
}

impl<S: Copy> Timeline<S> {
    pub fn new() -> Self {
        Timeline {
            events: BTreeMap::new(),
            seq: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn get(&self, key: EventKey) -> Option<&Event<S>> {
        self.events.get(&key)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&EventKey, &Event<S>)> {
        self.events.iter()
    }

    /// Insert an event and maintain the running totals of everything
    /// after it. Returns the key under which the event was stored.
    pub fn insert(&mut self, date: Date, kind: EventKind<S>, quantity: f64) -> EventKey {
        let rank = rank_of(&kind, quantity);
        self.seq += 1;
        let key = EventKey {
            date,
            rank,
            seq: self.seq,
        };

        let (onhand0, prod0, cons0) = self.state_before(key);
        let (onhand, cum_produced, cum_consumed, onhand_delta, prod_delta, cons_delta) = match kind
        {
            EventKind::Change(_) => (
                onhand0 + quantity,
                prod0 + quantity.max(0.0),
                cons0 + (-quantity).max(0.0),
                quantity,
                quantity.max(0.0),
                (-quantity).max(0.0),
            ),
            EventKind::SetOnhand => (quantity, prod0, cons0, quantity - onhand0, 0.0, 0.0),
            EventKind::Min | EventKind::Max => (onhand0, prod0, cons0, 0.0, 0.0, 0.0),
        };

        self.events.insert(
            key,
            Event {
                kind,
                quantity,
                onhand,
                cum_produced,
                cum_consumed,
            },
        );
        self.propagate(key, onhand_delta, prod_delta, cons_delta);
        key
    }

    /// Remove an event and roll its contribution out of the totals.
    pub fn erase(&mut self, key: EventKey) -> Option<Event<S>> {
        let removed = self.events.remove(&key)?;
        let (onhand0, _, _) = self.state_before(key);
        let (onhand_delta, prod_delta, cons_delta) = match removed.kind {
            EventKind::Change(_) => (
                -removed.quantity,
                -removed.quantity.max(0.0),
                -(-removed.quantity).max(0.0),
            ),
            EventKind::SetOnhand => (onhand0 - removed.quantity, 0.0, 0.0),
            EventKind::Min | EventKind::Max => (0.0, 0.0, 0.0),
        };
        self.propagate(key, onhand_delta, prod_delta, cons_delta);
        Some(removed)
    }

    /// Move an event to a new date and/or quantity, preserving its kind.
    pub fn update(&mut self, key: EventKey, quantity: f64, date: Date) -> Option<EventKey> {
        let removed = self.erase(key)?;
        Some(self.insert(date, removed.kind, quantity))
    }

    /// Running on-hand immediately after the given date (inclusive of
    /// every event on the date itself).
    pub fn onhand_at(&self, d: Date) -> f64 {
        self.events
            .range(..=EventKey::date_end(d))
            .next_back()
            .map_or(0.0, |(_, e)| e.onhand)
    }

    /// Cumulative production up to and including the date.
    pub fn produced_at(&self, d: Date) -> f64 {
        self.events
            .range(..=EventKey::date_end(d))
            .next_back()
            .map_or(0.0, |(_, e)| e.cum_produced)
    }

    /// Cumulative consumption up to and including the date.
    pub fn consumed_at(&self, d: Date) -> f64 {
        self.events
            .range(..=EventKey::date_end(d))
            .next_back()
            .map_or(0.0, |(_, e)| e.cum_consumed)
    }

    /// Minimum envelope effective at the date: the last Min change
    /// point at or before it, or 0 when there is none.
    pub fn min_at(&self, d: Date) -> f64 {
        self.events
            .range(..=EventKey::date_end(d))
            .rev()
            .find(|(_, e)| matches!(e.kind, EventKind::Min))
            .map_or(0.0, |(_, e)| e.quantity)
    }

    /// Maximum envelope effective at the date.
    pub fn max_at(&self, d: Date) -> f64 {
        self.events
            .range(..=EventKey::date_end(d))
            .rev()
            .find(|(_, e)| matches!(e.kind, EventKind::Max))
            .map_or(0.0, |(_, e)| e.quantity)
    }

    /// The minimum envelope change point active at the very end of the
    /// horizon, if any. Procurement buffers update it in place.
    pub fn last_min(&self) -> Option<(EventKey, f64)> {
        self.events
            .iter()
            .rev()
            .find(|(_, e)| matches!(e.kind, EventKind::Min))
            .map(|(k, e)| (*k, e.quantity))
    }

    pub fn last_max(&self) -> Option<(EventKey, f64)> {
        self.events
            .iter()
            .rev()
            .find(|(_, e)| matches!(e.kind, EventKind::Max))
            .map(|(k, e)| (*k, e.quantity))
    }

    /// Drop every envelope event of the given kind (used when a min or
    /// max calendar is replaced).
    pub fn clear_envelope(&mut self, min: bool) {
        let keys: Vec<EventKey> = self
            .events
            .iter()
            .filter(|(_, e)| match e.kind {
                EventKind::Min => min,
                EventKind::Max => !min,
                _ => false,
            })
            .map(|(k, _)| *k)
            .collect();
        for k in keys {
            self.events.remove(&k);
        }
    }

    fn state_before(&self, key: EventKey) -> (f64, f64, f64) {
        self.events
            .range(..key)
            .next_back()
            .map_or((0.0, 0.0, 0.0), |(_, e)| {
                (e.onhand, e.cum_produced, e.cum_consumed)
            })
    }

    /// Apply deltas to everything after `key`. The on-hand delta stops
    /// propagating at the next reset event; the cumulative deltas run
    /// to the end of the horizon.
    fn propagate(&mut self, key: EventKey, mut onhand_delta: f64, prod_delta: f64, cons_delta: f64) {
        if onhand_delta == 0.0 && prod_delta == 0.0 && cons_delta == 0.0 {
            return;
        }
        for (_, ev) in self.events.range_mut((Excluded(key), Unbounded)) {
            if matches!(ev.kind, EventKind::SetOnhand) {
                onhand_delta = 0.0;
                if prod_delta == 0.0 && cons_delta == 0.0 {
                    break;
                }
            }
            ev.onhand += onhand_delta;
            ev.cum_produced += prod_delta;
            ev.cum_consumed += cons_delta;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::date;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Src(u32);

    fn d(day: u32) -> Date {
        date(2024, 1, day, 0, 0, 0)
    }

    #[test]
    fn test_running_onhand() {
        let mut tl: Timeline<Src> = Timeline::new();
        tl.insert(d(2), EventKind::Change(Src(1)), 10.0);
        tl.insert(d(5), EventKind::Change(Src(2)), -4.0);
        tl.insert(d(3), EventKind::Change(Src(3)), 2.0);

        assert_eq!(tl.onhand_at(d(1)), 0.0);
        assert_eq!(tl.onhand_at(d(2)), 10.0);
        assert_eq!(tl.onhand_at(d(3)), 12.0);
        assert_eq!(tl.onhand_at(d(6)), 8.0);
    }

    #[test]
    fn test_cumulative_totals() {
        let mut tl: Timeline<Src> = Timeline::new();
        tl.insert(d(2), EventKind::Change(Src(1)), 10.0);
        tl.insert(d(4), EventKind::Change(Src(2)), -4.0);
        tl.insert(d(6), EventKind::Change(Src(3)), 5.0);

        assert_eq!(tl.produced_at(d(7)), 15.0);
        assert_eq!(tl.consumed_at(d(7)), 4.0);
        assert_eq!(tl.produced_at(d(3)), 10.0);
        assert_eq!(tl.consumed_at(d(3)), 0.0);
    }

    #[test]
    fn test_producers_sort_before_consumers_on_same_date() {
        let mut tl: Timeline<Src> = Timeline::new();
        tl.insert(d(3), EventKind::Change(Src(1)), -5.0);
        tl.insert(d(3), EventKind::Change(Src(2)), 5.0);

        let events: Vec<f64> = tl.iter().map(|(_, e)| e.quantity).collect();
        assert_eq!(events, vec![5.0, -5.0]);
        // Mid-date the producer is already counted, so onhand never dips.
        let onhands: Vec<f64> = tl.iter().map(|(_, e)| e.onhand()).collect();
        assert_eq!(onhands, vec![5.0, 0.0]);
    }

    #[test]
    fn test_erase_restores_totals() {
        let mut tl: Timeline<Src> = Timeline::new();
        let k = tl.insert(d(2), EventKind::Change(Src(1)), 10.0);
        tl.insert(d(5), EventKind::Change(Src(2)), -4.0);
        tl.erase(k);

        assert_eq!(tl.onhand_at(d(6)), -4.0);
        assert_eq!(tl.produced_at(d(6)), 0.0);
        assert_eq!(tl.consumed_at(d(6)), 4.0);
    }

    #[test]
    fn test_update_moves_event() {
        let mut tl: Timeline<Src> = Timeline::new();
        let k = tl.insert(d(2), EventKind::Change(Src(1)), 10.0);
        tl.insert(d(5), EventKind::Change(Src(2)), -4.0);
        let k2 = tl.update(k, 6.0, d(6)).unwrap();

        assert_eq!(tl.onhand_at(d(2)), 0.0);
        assert_eq!(tl.onhand_at(d(5)), -4.0);
        assert_eq!(tl.onhand_at(d(6)), 2.0);
        assert_eq!(tl.get(k2).unwrap().quantity, 6.0);
    }

    #[test]
    fn test_set_onhand_resets_running_value() {
        let mut tl: Timeline<Src> = Timeline::new();
        tl.insert(d(1), EventKind::Change(Src(1)), 3.0);
        tl.insert(d(4), EventKind::SetOnhand, 20.0);
        tl.insert(d(5), EventKind::Change(Src(2)), -6.0);

        assert_eq!(tl.onhand_at(d(3)), 3.0);
        assert_eq!(tl.onhand_at(d(4)), 20.0);
        assert_eq!(tl.onhand_at(d(6)), 14.0);

        // A change before the reset must not leak past it.
        tl.insert(d(2), EventKind::Change(Src(3)), 100.0);
        assert_eq!(tl.onhand_at(d(3)), 103.0);
        assert_eq!(tl.onhand_at(d(6)), 14.0);
    }

    #[test]
    fn test_envelope_queries() {
        let mut tl: Timeline<Src> = Timeline::new();
        tl.insert(d(1), EventKind::Min, 2.0);
        tl.insert(d(10), EventKind::Min, 5.0);
        tl.insert(d(10), EventKind::Max, 50.0);

        assert_eq!(tl.min_at(d(5)), 2.0);
        assert_eq!(tl.min_at(d(10)), 5.0);
        assert_eq!(tl.min_at(d(20)), 5.0);
        assert_eq!(tl.max_at(d(5)), 0.0);
        assert_eq!(tl.max_at(d(15)), 50.0);
    }

    #[test]
    fn test_onhand_sum_invariant() {
        // onhand at any event equals the signed sum of changes up to it.
        let mut tl: Timeline<Src> = Timeline::new();
        let quantities = [4.0, -2.0, 7.0, -1.5, -3.0, 10.0];
        for (i, q) in quantities.iter().enumerate() {
            tl.insert(d(1 + (i as u32 % 4)), EventKind::Change(Src(i as u32)), *q);
        }
        let mut sum = 0.0;
        for (_, e) in tl.iter() {
            sum += e.quantity;
            assert!((e.onhand() - sum).abs() < 1e-9);
            assert!(e.cum_produced() >= 0.0 && e.cum_consumed() >= 0.0);
            assert!((e.cum_produced() - e.cum_consumed() - sum).abs() < 1e-9);
        }
    }
}
