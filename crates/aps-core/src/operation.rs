//! Operations: the transformation nodes of the network.
//!
//! An operation consumes and produces material through flows and uses
//! capacity through loads. The shape of its execution is a tagged
//! variant: fixed duration, duration growing with quantity, a routing
//! of sequential steps, a priority-ordered choice of alternates, a
//! parallel split, a synthetic setup changeover, or a synthetic
//! purchase from a supplier.

use crate::dates::{Date, DateRange, DATE_MAX, DATE_MIN};
use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::{FlowId, LoadId, LocationId, OperationId, PlanId, SupplierId, ROUNDING_ERROR};
use chrono::Duration;

/// How solvers pick between alternates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum SearchMode {
    /// First effective alternate with the lowest priority number.
    #[default]
    Priority,
    /// The alternate with the lowest cost.
    MinCost,
    /// The alternate with the lowest penalty.
    MinPenalty,
    /// The alternate with the lowest sum of cost and penalty.
    MinCostPenalty,
}

impl std::str::FromStr for SearchMode {
    type Err = PlanError;

    fn from_str(s: &str) -> PlanResult<Self> {
        match s {
            "PRIORITY" => Ok(SearchMode::Priority),
            "MINCOST" => Ok(SearchMode::MinCost),
            "MINPENALTY" => Ok(SearchMode::MinPenalty),
            "MINCOSTPENALTY" => Ok(SearchMode::MinCostPenalty),
            other => Err(PlanError::data(format!("Invalid search mode {other}"))),
        }
    }
}

/// One alternate of an alternate operation.
#[derive(Debug, Clone)]
pub struct AlternateMember {
    pub operation: OperationId,
    /// Lower is preferred; 0 disables the alternate.
    pub priority: i32,
    pub effective: DateRange,
}

/// One branch of a split operation.
#[derive(Debug, Clone)]
pub struct SplitMember {
    pub operation: OperationId,
    /// Share of the parent quantity, in percent.
    pub percent: f64,
}

/// The shape contract of an operation.
#[derive(Debug, Clone)]
pub enum OperationKind {
    /// Constant duration regardless of quantity.
    FixedTime { duration: Duration },
    /// Duration = base + per-unit seconds x quantity.
    TimePer {
        duration: Duration,
        /// Seconds per planned unit; fractional values allowed.
        duration_per: f64,
    },
    /// Ordered steps executed sequentially.
    Routing { steps: Vec<OperationId> },
    /// Priority-ordered choice; exactly one child is instantiated.
    Alternate {
        alternates: Vec<AlternateMember>,
        search: SearchMode,
    },
    /// Children executed in parallel with fixed proportions.
    Split { members: Vec<SplitMember> },
    /// Synthetic changeover on a resource with a setup matrix.
    Setup,
    /// Synthetic purchase derived from an item-supplier relation.
    ItemSupplier {
        supplier: SupplierId,
        leadtime: Duration,
    },
}

/// A transformation activity.
#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub kind: OperationKind,
    pub description: Option<String>,
    pub location: Option<LocationId>,
    /// Period after the current date in which no new plans may start.
    pub fence: Duration,
    /// Soft delay before the operation.
    pub pre_time: Duration,
    /// Soft delay after the operation.
    pub post_time: Duration,
    /// Minimum plan size. Default 1.
    pub size_minimum: f64,
    /// Plan sizes snap to min + k x multiple when non-zero. Default 0.
    pub size_multiple: f64,
    /// Maximum plan size.
    pub size_maximum: f64,
    /// Cost per planned unit.
    pub cost: f64,
    pub hidden: bool,
    pub flows: Vec<FlowId>,
    pub loads: Vec<LoadId>,
    /// Operations using this one as a sub-step.
    pub super_operations: Vec<OperationId>,
    /// Sorted intrusive list of plans: (start asc, quantity desc).
    pub(crate) first_plan: Option<PlanId>,
    pub(crate) last_plan: Option<PlanId>,
    pub changed: bool,
    pub detect_problems: bool,
    pub(crate) level: i16,
    pub(crate) cluster: u16,
}

impl Operation {
    fn base(name: impl Into<String>, kind: OperationKind) -> Self {
        Operation {
            name: name.into(),
            kind,
            description: None,
            location: None,
            fence: Duration::zero(),
            pre_time: Duration::zero(),
            post_time: Duration::zero(),
            size_minimum: 1.0,
            size_multiple: 0.0,
            size_maximum: f64::MAX,
            cost: 0.0,
            hidden: false,
            flows: Vec::new(),
            loads: Vec::new(),
            super_operations: Vec::new(),
            first_plan: None,
            last_plan: None,
            changed: true,
            detect_problems: true,
            level: -1,
            cluster: 0,
        }
    }

    pub fn fixed_time(name: impl Into<String>, duration: Duration) -> Self {
        Operation::base(name, OperationKind::FixedTime { duration })
    }

    pub fn time_per(name: impl Into<String>, duration: Duration, duration_per: f64) -> Self {
        Operation::base(
            name,
            OperationKind::TimePer {
                duration,
                duration_per,
            },
        )
    }

    pub fn routing(name: impl Into<String>, steps: Vec<OperationId>) -> Self {
        Operation::base(name, OperationKind::Routing { steps })
    }

    pub fn alternate(name: impl Into<String>) -> Self {
        Operation::base(
            name,
            OperationKind::Alternate {
                alternates: Vec::new(),
                search: SearchMode::Priority,
            },
        )
    }

    pub fn split(name: impl Into<String>, members: Vec<SplitMember>) -> Self {
        Operation::base(name, OperationKind::Split { members })
    }

    pub fn setup(name: impl Into<String>) -> Self {
        let mut op = Operation::base(name, OperationKind::Setup);
        op.hidden = true;
        op.detect_problems = false;
        op
    }

    pub fn item_supplier(
        name: impl Into<String>,
        supplier: SupplierId,
        leadtime: Duration,
    ) -> Self {
        Operation::base(name, OperationKind::ItemSupplier { supplier, leadtime })
    }

    pub fn at(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn with_sizes(mut self, minimum: f64, multiple: f64, maximum: f64) -> Self {
        self.size_minimum = minimum;
        self.size_multiple = multiple;
        self.size_maximum = maximum;
        self
    }

    pub fn sub_operations(&self) -> &[OperationId] {
        match &self.kind {
            OperationKind::Routing { steps } => steps,
            _ => &[],
        }
    }

    pub fn set_fence(&mut self, fence: Duration) {
        if self.fence != fence {
            self.changed = true;
        }
        self.fence = fence;
    }

    pub fn set_pre_time(&mut self, t: Duration) -> PlanResult<()> {
        if t < Duration::zero() {
            return Err(PlanError::data("No negative pre-operation time allowed"));
        }
        self.pre_time = t;
        self.changed = true;
        Ok(())
    }

    pub fn set_post_time(&mut self, t: Duration) -> PlanResult<()> {
        if t < Duration::zero() {
            return Err(PlanError::data("No negative post-operation time allowed"));
        }
        self.post_time = t;
        self.changed = true;
        Ok(())
    }

    pub fn set_cost(&mut self, c: f64) -> PlanResult<()> {
        if c < 0.0 {
            return Err(PlanError::data("Operation cost must be positive"));
        }
        self.cost = c;
        Ok(())
    }

    pub fn set_size_minimum(&mut self, f: f64) -> PlanResult<()> {
        if f < 0.0 {
            return Err(PlanError::data("Operation can't have a negative minimum size"));
        }
        self.size_minimum = f;
        self.changed = true;
        Ok(())
    }

    pub fn set_size_multiple(&mut self, f: f64) -> PlanResult<()> {
        if f < 0.0 {
            return Err(PlanError::data("Operation can't have a negative multiple size"));
        }
        self.size_multiple = f;
        self.changed = true;
        Ok(())
    }

    pub fn set_size_maximum(&mut self, f: f64) -> PlanResult<()> {
        if f < self.size_minimum {
            return Err(PlanError::data(
                "Operation maximum size must be higher than the minimum size",
            ));
        }
        if f <= 0.0 {
            return Err(PlanError::data("Operation maximum size must be greater than 0"));
        }
        self.size_maximum = f;
        self.changed = true;
        Ok(())
    }

    /// Network level: hops upstream from demand delivery. -1 = unused.
    pub fn level(&self) -> i16 {
        self.level
    }

    /// Connected-component id; 0 means not connected to anything.
    pub fn cluster(&self) -> u16 {
        self.cluster
    }

    /// Apply the sizing rules to a requested quantity. Zero always
    /// passes; positive values snap onto the min + k x multiple grid,
    /// rounding up or down as requested, and are capped at the largest
    /// grid value not above the maximum.
    pub fn round_quantity(&self, q: f64, round_down: bool) -> f64 {
        if q <= ROUNDING_ERROR {
            return 0.0;
        }
        let mut q = q;
        if q < self.size_minimum - ROUNDING_ERROR {
            if round_down {
                return 0.0;
            }
            q = self.size_minimum;
        }
        if self.size_multiple > 0.0 {
            let steps = (q - self.size_minimum) / self.size_multiple;
            let k = if round_down {
                (steps + ROUNDING_ERROR).floor()
            } else {
                (steps - ROUNDING_ERROR).ceil()
            };
            q = self.size_minimum + k.max(0.0) * self.size_multiple;
        }
        if q > self.size_maximum + ROUNDING_ERROR {
            if self.size_multiple > 0.0 {
                let k = ((self.size_maximum - self.size_minimum) / self.size_multiple
                    + ROUNDING_ERROR)
                    .floor();
                q = self.size_minimum + k.max(0.0) * self.size_multiple;
                if q > self.size_maximum + ROUNDING_ERROR {
                    return 0.0;
                }
            } else {
                q = self.size_maximum;
            }
        }
        if q < self.size_minimum - ROUNDING_ERROR {
            return 0.0;
        }
        q
    }
}

/// The `(start, end, quantity)` triple an operation computes for a
/// plan, also used as a pure preview when nothing is executed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlanParameters {
    pub start: Date,
    pub end: Date,
    pub quantity: f64,
}

impl PlanParameters {
    pub fn new(start: Date, end: Date, quantity: f64) -> Self {
        PlanParameters {
            start,
            end,
            quantity,
        }
    }
}

/// Saturating date arithmetic near the horizon sentinels.
pub(crate) fn add_dur(d: Date, dur: Duration) -> Date {
    d.checked_add_signed(dur).unwrap_or(DATE_MAX)
}

pub(crate) fn sub_dur(d: Date, dur: Duration) -> Date {
    d.checked_sub_signed(dur).unwrap_or(DATE_MIN)
}

impl Model {
    /// Register an operation. Sub-operations of routings, alternates
    /// and splits get this operation added to their super list.
    pub fn add_operation(&mut self, operation: Operation) -> PlanResult<OperationId> {
        let members: Vec<OperationId> = match &operation.kind {
            OperationKind::Routing { steps } => steps.clone(),
            OperationKind::Alternate { alternates, .. } => {
                alternates.iter().map(|a| a.operation).collect()
            }
            OperationKind::Split { members } => members.iter().map(|m| m.operation).collect(),
            _ => Vec::new(),
        };
        for m in &members {
            if self.operations.get(m.value()).is_none() {
                return Err(PlanError::data("Unknown sub-operation reference"));
            }
        }
        let id = OperationId::new(self.operations.insert(operation, "Operation")?);
        for m in members {
            self.operation_mut(m).super_operations.push(id);
        }
        self.mark_structure_changed();
        Ok(id)
    }

    /// Add an alternate to an alternate operation, keeping the list in
    /// ascending priority order (stable on ties).
    pub fn add_alternate_member(
        &mut self,
        alternate: OperationId,
        member: OperationId,
        priority: i32,
        effective: DateRange,
    ) -> PlanResult<()> {
        if self.operations.get(member.value()).is_none() {
            return Err(PlanError::data("Unknown alternate sub-operation"));
        }
        let op = self.operation_mut(alternate);
        let OperationKind::Alternate { alternates, .. } = &mut op.kind else {
            return Err(PlanError::data(format!(
                "Operation '{}' is not an alternate",
                op.name
            )));
        };
        let pos = alternates.partition_point(|a| a.priority <= priority);
        alternates.insert(
            pos,
            AlternateMember {
                operation: member,
                priority,
                effective,
            },
        );
        op.changed = true;
        self.operation_mut(member).super_operations.push(alternate);
        self.mark_structure_changed();
        Ok(())
    }

    /// Change the priority of an alternate member, preserving order.
    pub fn set_alternate_priority(
        &mut self,
        alternate: OperationId,
        member: OperationId,
        priority: i32,
    ) -> PlanResult<()> {
        let name = self.operation(alternate).name.clone();
        let op = self.operation_mut(alternate);
        let OperationKind::Alternate { alternates, .. } = &mut op.kind else {
            return Err(PlanError::data(format!("Operation '{name}' is not an alternate")));
        };
        let Some(pos) = alternates.iter().position(|a| a.operation == member) else {
            return Err(PlanError::data(format!(
                "Operation isn't a suboperation of alternate operation '{name}'"
            )));
        };
        let mut entry = alternates.remove(pos);
        entry.priority = priority;
        let pos = alternates.partition_point(|a| a.priority <= priority);
        alternates.insert(pos, entry);
        op.changed = true;
        self.state.any_change = true;
        Ok(())
    }

    /// Calculate the date range starting from (or ending at) a date and
    /// covering a requested amount of effective available time on the
    /// operation. Availability comes from the calendar of the
    /// operation's location; without one, time is continuous.
    ///
    /// Returns the window and the actually obtained duration, which is
    /// shorter than requested when the horizon runs out.
    pub fn calculate_operation_time(
        &self,
        op: OperationId,
        thedate: Date,
        duration: Duration,
        forward: bool,
    ) -> (DateRange, Duration) {
        let cal = self
            .operation(op)
            .location
            .and_then(|l| self.location(l).available)
            .map(|c| self.calendar(c));
        let Some(cal) = cal else {
            let range = if forward {
                DateRange {
                    start: thedate,
                    end: add_dur(thedate, duration),
                }
            } else {
                DateRange {
                    start: sub_dur(thedate, duration),
                    end: thedate,
                }
            };
            return (range, duration);
        };

        let mut it = cal.events(thedate, forward);
        let mut actual = duration;
        let mut result_start: Option<Date> = None;
        let mut result_end: Option<Date> = None;
        let mut anchor = thedate;
        let mut status = false;
        let mut curduration = duration;

        loop {
            let available = it.available();
            let curdate = it.date();

            if available && !status {
                // Becoming available after an unavailable period.
                anchor = curdate;
                status = true;
                if forward && result_start.is_none() {
                    result_start = Some(curdate);
                } else if !forward && result_end.is_none() {
                    result_end = Some(curdate);
                }
            } else if !available && status {
                // Becoming unavailable after an available period.
                status = false;
                if forward {
                    let delta = curdate.signed_duration_since(anchor);
                    if delta >= curduration {
                        result_end = Some(add_dur(anchor, curduration));
                        break;
                    }
                    curduration = curduration - delta;
                } else {
                    let delta = anchor.signed_duration_since(curdate);
                    if delta >= curduration {
                        result_start = Some(sub_dur(anchor, curduration));
                        break;
                    }
                    curduration = curduration - delta;
                }
            } else if forward && curdate == DATE_MAX {
                if available {
                    result_end = Some(add_dur(anchor, curduration));
                } else {
                    actual = duration - curduration;
                }
                break;
            } else if !forward && curdate == DATE_MIN {
                if available {
                    result_start = Some(sub_dur(anchor, curduration));
                } else {
                    actual = duration - curduration;
                }
                break;
            }

            it.step();
        }

        (
            DateRange {
                start: result_start.unwrap_or(DATE_MIN),
                end: result_end.unwrap_or(DATE_MAX),
            },
            actual,
        )
    }

    /// The effective available time between two dates, and the largest
    /// available window inside the interval.
    pub fn calculate_available_time(
        &self,
        op: OperationId,
        start: Date,
        end: Date,
    ) -> (DateRange, Duration) {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        let cal = self
            .operation(op)
            .location
            .and_then(|l| self.location(l).available)
            .map(|c| self.calendar(c));
        let Some(cal) = cal else {
            return (
                DateRange { start, end },
                end.signed_duration_since(start),
            );
        };

        let mut it = cal.events(start, true);
        let mut actual = Duration::zero();
        let mut result_start: Option<Date> = None;
        let mut result_end: Option<Date> = None;
        let mut anchor = start;
        let mut status = false;

        loop {
            let available = it.available();
            let curdate = it.date();

            if available && !status {
                if curdate >= end {
                    // Leaving the desired date range.
                    result_end = Some(anchor);
                    break;
                }
                anchor = curdate;
                status = true;
                if result_start.is_none() {
                    result_start = Some(curdate);
                }
            } else if !available && status {
                if curdate >= end {
                    actual = actual + end.signed_duration_since(anchor);
                    result_end = Some(end);
                    break;
                }
                status = false;
                actual = actual + curdate.signed_duration_since(anchor);
                anchor = curdate;
            } else if curdate >= end {
                if available {
                    actual = actual + end.signed_duration_since(anchor);
                    result_end = Some(end);
                } else {
                    result_end = Some(anchor);
                }
                break;
            }

            it.step();
        }

        (
            DateRange {
                start: result_start.unwrap_or(start),
                end: result_end.unwrap_or(start),
            },
            actual,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::{Calendar, CalendarBucket};
    use crate::dates::date;
    use crate::entities::Location;

    #[test]
    fn test_round_quantity_grid() {
        let op = Operation::fixed_time("A", Duration::days(1)).with_sizes(10.0, 5.0, 31.0);
        assert_eq!(op.round_quantity(0.0, false), 0.0);
        assert_eq!(op.round_quantity(3.0, false), 10.0);
        assert_eq!(op.round_quantity(3.0, true), 0.0);
        assert_eq!(op.round_quantity(11.0, false), 15.0);
        assert_eq!(op.round_quantity(11.0, true), 10.0);
        // Capped at the largest grid point below the maximum.
        assert_eq!(op.round_quantity(100.0, false), 30.0);
    }

    #[test]
    fn test_round_quantity_no_multiple() {
        let op = Operation::fixed_time("A", Duration::days(1)).with_sizes(1.0, 0.0, 10.0);
        assert_eq!(op.round_quantity(5.5, false), 5.5);
        assert_eq!(op.round_quantity(0.2, false), 1.0);
        assert_eq!(op.round_quantity(0.2, true), 0.0);
        assert_eq!(op.round_quantity(99.0, false), 10.0);
    }

    #[test]
    fn test_operation_time_without_calendar() {
        let mut model = Model::new();
        let op = model
            .add_operation(Operation::fixed_time("A", Duration::days(1)))
            .unwrap();
        let d = date(2024, 3, 1, 0, 0, 0);
        let (range, actual) = model.calculate_operation_time(op, d, Duration::hours(8), true);
        assert_eq!(range.start, d);
        assert_eq!(range.end, date(2024, 3, 1, 8, 0, 0));
        assert_eq!(actual, Duration::hours(8));

        let (range, _) = model.calculate_operation_time(op, d, Duration::hours(8), false);
        assert_eq!(range.start, date(2024, 2, 29, 16, 0, 0));
        assert_eq!(range.end, d);
    }

    fn model_with_working_hours() -> (Model, OperationId) {
        // 9:00-17:00 every day during 2024.
        let mut model = Model::new();
        let mut cal = Calendar::new("hours", 0.0);
        cal.add_bucket(
            CalendarBucket::new(date(2024, 1, 1, 0, 0, 0), date(2025, 1, 1, 0, 0, 0))
                .with_value(1.0)
                .with_day_window(9 * 3600, 17 * 3600),
        )
        .unwrap();
        let cal = model.add_calendar(cal).unwrap();
        let loc = model
            .add_location(Location::new("plant").with_available(cal))
            .unwrap();
        let op = model
            .add_operation(Operation::fixed_time("A", Duration::hours(12)).at(loc))
            .unwrap();
        (model, op)
    }

    #[test]
    fn test_operation_time_skips_unavailable_periods() {
        let (model, op) = model_with_working_hours();
        // 12 working hours forward from Mon 2024-01-08 10:00:
        // 7h on Monday (10:00-17:00), 5h on Tuesday -> ends Tue 14:00.
        let (range, actual) =
            model.calculate_operation_time(op, date(2024, 1, 8, 10, 0, 0), Duration::hours(12), true);
        assert_eq!(actual, Duration::hours(12));
        assert_eq!(range.start, date(2024, 1, 8, 10, 0, 0));
        assert_eq!(range.end, date(2024, 1, 9, 14, 0, 0));
    }

    #[test]
    fn test_operation_time_backward() {
        let (model, op) = model_with_working_hours();
        // 12 working hours backward from Tue 2024-01-09 14:00.
        let (range, actual) = model.calculate_operation_time(
            op,
            date(2024, 1, 9, 14, 0, 0),
            Duration::hours(12),
            false,
        );
        assert_eq!(actual, Duration::hours(12));
        assert_eq!(range.end, date(2024, 1, 9, 14, 0, 0));
        assert_eq!(range.start, date(2024, 1, 8, 10, 0, 0));
    }

    #[test]
    fn test_operation_time_starting_in_closed_period() {
        let (model, op) = model_with_working_hours();
        // Asking at 7:00 snaps the start to 9:00.
        let (range, actual) =
            model.calculate_operation_time(op, date(2024, 1, 8, 7, 0, 0), Duration::hours(4), true);
        assert_eq!(actual, Duration::hours(4));
        assert_eq!(range.start, date(2024, 1, 8, 9, 0, 0));
        assert_eq!(range.end, date(2024, 1, 8, 13, 0, 0));
    }

    #[test]
    fn test_available_time_between_dates() {
        let (model, op) = model_with_working_hours();
        let (range, actual) = model.calculate_available_time(
            op,
            date(2024, 1, 8, 0, 0, 0),
            date(2024, 1, 10, 0, 0, 0),
        );
        assert_eq!(actual, Duration::hours(16));
        assert_eq!(range.start, date(2024, 1, 8, 9, 0, 0));
    }

    #[test]
    fn test_alternate_members_sorted_by_priority() {
        let mut model = Model::new();
        let x = model
            .add_operation(Operation::fixed_time("X", Duration::hours(1)))
            .unwrap();
        let y = model
            .add_operation(Operation::fixed_time("Y", Duration::hours(1)))
            .unwrap();
        let alt = model.add_operation(Operation::alternate("ALT")).unwrap();
        model
            .add_alternate_member(alt, y, 2, DateRange::default())
            .unwrap();
        model
            .add_alternate_member(alt, x, 1, DateRange::default())
            .unwrap();

        let OperationKind::Alternate { alternates, .. } = &model.operation(alt).kind else {
            panic!("expected alternate")
        };
        assert_eq!(alternates[0].operation, x);
        assert_eq!(alternates[1].operation, y);
        assert!(model.operation(x).super_operations.contains(&alt));
    }

    #[test]
    fn test_sizing_setters_validate() {
        let mut op = Operation::fixed_time("A", Duration::days(1));
        assert!(op.set_size_minimum(-1.0).is_err());
        op.set_size_minimum(5.0).unwrap();
        assert!(op.set_size_maximum(3.0).is_err());
        op.set_size_maximum(50.0).unwrap();
        assert!(op.set_pre_time(Duration::seconds(-5)).is_err());
    }
}
