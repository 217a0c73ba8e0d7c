//! Problem detection: infeasibilities, alerts and warnings derived
//! from the plan.
//!
//! Problems are passive observations. They are rebuilt lazily: plan
//! mutations only mark the affected entities changed, and
//! [`Model::compute_problems`] rescans exactly the changed entities,
//! rebuilding their problem lists from scratch. Detection never
//! mutates the plan, so the fixpoint loop below is bounded.

use crate::dates::{Date, DateRange, DATE_MAX};
use crate::model::Model;
use crate::operation::OperationKind;
use crate::resource::ResourceKind;
use crate::timeline::EventKind;
use crate::{BufferId, DemandId, OperationId, PlanId, ResourceId, ROUNDING_ERROR};
use tracing::debug;

/// What a problem observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemKind {
    /// On-hand below the minimum target on a buffer.
    MaterialShortage,
    /// On-hand above the maximum target on a buffer.
    MaterialExcess,
    /// Load above capacity on a resource.
    CapacityOverload,
    /// Load below the minimum on a resource.
    CapacityUnderload,
    /// A plan starts before the current date.
    BeforeCurrent,
    /// A plan starts inside the release fence.
    BeforeFence,
    /// A step overlaps its successor inside a routing.
    Precedence,
    /// A demand without any delivery plan.
    DemandNotPlanned,
    /// A demand satisfied after its due date.
    DemandLate,
    /// A demand satisfied before its due date.
    DemandEarly,
    /// A demand planned below its requested quantity.
    DemandShort,
    /// A demand planned above its requested quantity.
    DemandExcess,
    /// A data issue prevented planning an entity.
    InvalidData,
}

/// A single observation attached to its owning entity.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct Problem {
    pub kind: ProblemKind,
    pub dates: DateRange,
    /// Magnitude of the problem, to focus on the significant ones.
    pub weight: f64,
    /// False when the problem flags a real infeasibility.
    pub feasible: bool,
    pub description: String,
}

impl Problem {
    fn new(
        kind: ProblemKind,
        dates: DateRange,
        weight: f64,
        feasible: bool,
        description: String,
    ) -> Self {
        Problem {
            kind,
            dates,
            weight,
            feasible,
            description,
        }
    }
}

impl Model {
    /// Rebuild the problem lists of every changed entity. The scan
    /// covers buffers, resources, operations and demands, in that
    /// order, and repeats until no entity re-arms its changed flag.
    pub fn compute_problems(&mut self) {
        let mut passes = 0usize;
        while self.state.any_change {
            self.state.any_change = false;
            passes += 1;

            let buffer_ids: Vec<BufferId> = self.buffers().map(|(id, _)| id).collect();
            for id in buffer_ids {
                let b = self.buffer(id);
                if b.changed && b.detect_problems {
                    self.update_buffer_problems(id);
                }
            }
            let resource_ids: Vec<ResourceId> = self.resources().map(|(id, _)| id).collect();
            for id in resource_ids {
                let r = self.resource(id);
                if r.changed && r.detect_problems {
                    self.update_resource_problems(id);
                }
            }
            let operation_ids: Vec<OperationId> = self.operations().map(|(id, _)| id).collect();
            for id in &operation_ids {
                let o = self.operation(*id);
                if o.changed && o.detect_problems {
                    self.update_operation_problems(*id);
                }
            }
            let demand_ids: Vec<DemandId> = self.demands().map(|(id, _)| id).collect();
            for id in demand_ids {
                let d = self.demand(id);
                if d.changed && d.detect_problems {
                    self.update_demand_problems(id);
                }
            }

            // Mark everything clean; detection itself never mutates
            // the plan, so a second pass only runs when a scan above
            // marked a fresh entity changed.
            for (_, b) in self.buffers.iter_mut() {
                b.changed = false;
            }
            for (_, r) in self.resources.iter_mut() {
                r.changed = false;
            }
            for (_, o) in self.operations.iter_mut() {
                o.changed = false;
            }
            for (_, d) in self.demands.iter_mut() {
                d.changed = false;
            }
        }
        debug!(passes, "problem detection complete");
    }

    /// Iterate every problem in the model, entity category order.
    pub fn problems(&self) -> impl Iterator<Item = &Problem> {
        let buffers = self.buffers.iter().flat_map(|(_, b)| b.problems.iter());
        let resources = self.resources.iter().flat_map(|(_, r)| r.problems.iter());
        let plans = self.plans.iter().flat_map(|(_, p)| p.problems.iter());
        let demands = self.demands.iter().flat_map(|(_, d)| d.problems.iter());
        buffers.chain(resources).chain(plans).chain(demands)
    }

    /// Drop every problem list; they will be rebuilt on the next
    /// detection round.
    pub fn clear_problems(&mut self) {
        for (_, b) in self.buffers.iter_mut() {
            b.problems.clear();
            b.changed = true;
        }
        for (_, r) in self.resources.iter_mut() {
            r.problems.clear();
            r.changed = true;
        }
        for (_, p) in self.plans.iter_mut() {
            p.problems.clear();
        }
        for (_, d) in self.demands.iter_mut() {
            d.problems.clear();
            d.changed = true;
        }
        self.state.any_change = true;
    }

    // =========================================================================
    // Buffer: material shortage / excess
    // =========================================================================

    /// Single pass over the buffer timeline: track the envelope, open a
    /// shortage or excess region on the transition, emit the problem
    /// with the extreme magnitude seen inside the region. A region
    /// still open at the end of the horizon closes at infinity.
    fn update_buffer_problems(&mut self, id: BufferId) {
        let name = self.buffer(id).name.clone();
        let mut problems = Vec::new();
        {
            let b = self.buffer(id);
            let mut cur_min = 0.0_f64;
            let mut cur_max = 0.0_f64;
            let mut shortage_start: Option<Date> = None;
            let mut shortage_qty = 0.0_f64;
            let mut excess_start: Option<Date> = None;
            let mut excess_qty = 0.0_f64;

            let mut iter = b.timeline.iter().peekable();
            while let Some((key, ev)) = iter.next() {
                match ev.kind {
                    EventKind::Min => cur_min = ev.quantity,
                    EventKind::Max => cur_max = ev.quantity,
                    _ => {}
                }
                // Only judge the state after the last event of a date.
                if let Some((next_key, _)) = iter.peek() {
                    if next_key.date == key.date {
                        continue;
                    }
                }

                let delta = ev.onhand() - cur_min;
                if delta < -ROUNDING_ERROR {
                    match shortage_start {
                        None => {
                            shortage_start = Some(key.date);
                            shortage_qty = delta;
                        }
                        Some(_) => {
                            if delta < shortage_qty {
                                shortage_qty = delta;
                            }
                        }
                    }
                } else if let Some(start) = shortage_start.take() {
                    if key.date != start {
                        problems.push(material_shortage(&name, start, key.date, -shortage_qty));
                    }
                }

                let ceiling = cur_max.max(cur_min);
                let delta = ev.onhand() - ceiling;
                if delta > ROUNDING_ERROR {
                    match excess_start {
                        None => {
                            excess_start = Some(key.date);
                            excess_qty = delta;
                        }
                        Some(_) => {
                            if delta > excess_qty {
                                excess_qty = delta;
                            }
                        }
                    }
                } else if let Some(start) = excess_start.take() {
                    if key.date != start {
                        problems.push(material_excess(&name, start, key.date, excess_qty));
                    }
                }
            }

            if let Some(start) = excess_start {
                problems.push(material_excess(&name, start, DATE_MAX, excess_qty));
            }
            if let Some(start) = shortage_start {
                problems.push(material_shortage(&name, start, DATE_MAX, -shortage_qty));
            }
        }
        self.buffer_mut(id).problems = problems;
    }

    // =========================================================================
    // Resource: overload / underload
    // =========================================================================

    fn update_resource_problems(&mut self, id: ResourceId) {
        if matches!(self.resource(id).kind, ResourceKind::Bucketed) {
            self.update_bucketed_resource_problems(id);
            return;
        }
        let name = self.resource(id).name.clone();
        let mut problems = Vec::new();
        {
            let r = self.resource(id);
            let mut cur_min = 0.0_f64;
            let mut cur_max = 0.0_f64;
            let mut under_start: Option<Date> = None;
            let mut under_qty = 0.0_f64;
            let mut over_start: Option<Date> = None;
            let mut over_qty = 0.0_f64;

            let mut iter = r.timeline.iter().peekable();
            while let Some((key, ev)) = iter.next() {
                match ev.kind {
                    EventKind::Min => cur_min = ev.quantity,
                    EventKind::Max => cur_max = ev.quantity,
                    _ => {}
                }
                if let Some((next_key, _)) = iter.peek() {
                    if next_key.date == key.date {
                        continue;
                    }
                }

                let delta = ev.onhand() - cur_min;
                if delta < -ROUNDING_ERROR {
                    match under_start {
                        None => {
                            under_start = Some(key.date);
                            under_qty = delta;
                        }
                        Some(_) => {
                            if delta < under_qty {
                                under_qty = delta;
                            }
                        }
                    }
                } else if let Some(start) = under_start.take() {
                    if key.date != start {
                        problems.push(capacity_underload(&name, start, key.date, -under_qty));
                    }
                }

                let delta = ev.onhand() - cur_max;
                if delta > ROUNDING_ERROR {
                    match over_start {
                        None => {
                            over_start = Some(key.date);
                            over_qty = delta;
                        }
                        Some(_) => {
                            if delta > over_qty {
                                over_qty = delta;
                            }
                        }
                    }
                } else if let Some(start) = over_start.take() {
                    if key.date != start {
                        problems.push(capacity_overload(&name, start, key.date, over_qty));
                    }
                }
            }

            if let Some(start) = over_start {
                problems.push(capacity_overload(&name, start, DATE_MAX, over_qty));
            }
            if let Some(start) = under_start {
                problems.push(capacity_underload(&name, start, DATE_MAX, -under_qty));
            }
        }
        self.resource_mut(id).problems = problems;
    }

    /// Bucketed resources compare the load drawn inside each bucket to
    /// the bucket's capacity: the running value starts at the capacity
    /// on the bucket boundary and every load subtracts from it.
    fn update_bucketed_resource_problems(&mut self, id: ResourceId) {
        let name = self.resource(id).name.clone();
        let mut problems = Vec::new();
        {
            let r = self.resource(id);
            let mut bucket_start = crate::DATE_MIN;
            let mut load = 0.0_f64;
            for (key, ev) in r.timeline.iter() {
                if matches!(ev.kind, EventKind::SetOnhand) {
                    if load < -ROUNDING_ERROR {
                        problems.push(capacity_overload(&name, bucket_start, key.date, -load));
                    }
                    bucket_start = key.date;
                    load = 0.0;
                } else {
                    load = ev.onhand();
                }
            }
            if load < -ROUNDING_ERROR {
                problems.push(capacity_overload(&name, bucket_start, DATE_MAX, -load));
            }
        }
        self.resource_mut(id).problems = problems;
    }

    // =========================================================================
    // Operation plans: before-current / before-fence / precedence
    // =========================================================================

    /// Problem detection on an operation delegates to its plans.
    fn update_operation_problems(&mut self, id: OperationId) {
        for plan in self.plans_of(id) {
            self.update_plan_problems(plan);
        }
    }

    fn update_plan_problems(&mut self, plan: PlanId) {
        let mut problems = Vec::new();
        {
            let p = self.operation_plan(plan);
            let op = self.operation(p.operation);
            let current = self.plan.current;
            // Locked plans and hidden operations report nothing.
            if !p.locked && op.detect_problems {
                let is_setup_child = matches!(op.kind, OperationKind::Setup);
                if p.owner.is_none() || is_setup_child {
                    // Avoid duplicating problems on child and owner plans.
                    if p.start < current {
                        let end = if p.end > current { current } else { p.end };
                        problems.push(Problem::new(
                            ProblemKind::BeforeCurrent,
                            DateRange::new(p.start, end),
                            p.quantity,
                            false,
                            format!("Operation '{}' planned in the past", op.name),
                        ));
                    } else if p.start < current + op.fence {
                        let fence_end = current + op.fence;
                        let end = if p.end > fence_end { fence_end } else { p.end };
                        problems.push(Problem::new(
                            ProblemKind::BeforeFence,
                            DateRange::new(p.start, end),
                            p.quantity,
                            true,
                            format!("Operation '{}' planned before fence", op.name),
                        ));
                    }
                }
                // A step overlapping its successor. Split branches run
                // concurrently and are exempt.
                if let Some(next) = p.next_sibling {
                    let next_plan = self.operation_plan(next);
                    let owner_is_split = p
                        .owner
                        .map(|o| {
                            matches!(
                                self.operation(self.operation_plan(o).operation).kind,
                                OperationKind::Split { .. }
                            )
                        })
                        .unwrap_or(false);
                    if p.end > next_plan.start && !next_plan.locked && !owner_is_split {
                        problems.push(Problem::new(
                            ProblemKind::Precedence,
                            DateRange::new(next_plan.start, p.end),
                            p.end.signed_duration_since(next_plan.start).num_seconds() as f64
                                / 86400.0,
                            false,
                            format!(
                                "Operation '{}' starts before operation '{}' ends",
                                op.name,
                                self.operation(next_plan.operation).name
                            ),
                        ));
                    }
                }
            }
        }
        self.plan_mut(plan).problems = problems;
    }

    // =========================================================================
    // Demand: not planned / late / early / short / excess
    // =========================================================================

    fn update_demand_problems(&mut self, id: DemandId) {
        let mut problems = Vec::new();
        {
            let d = self.demand(id);
            if d.deliveries.is_empty() && d.quantity > 0.0 {
                problems.push(Problem::new(
                    ProblemKind::DemandNotPlanned,
                    DateRange::at(d.due),
                    d.quantity,
                    false,
                    format!("Demand '{}' is not planned", d.name),
                ));
            }
            if !d.deliveries.is_empty() {
                let mut late = false;
                let mut early = false;
                for p in &d.deliveries {
                    let end = self.operation_plan(*p).end;
                    if end > d.due {
                        late = true;
                    } else if end < d.due {
                        early = true;
                    }
                }
                if late {
                    let latest = self.operation_plan(d.deliveries[0]).end;
                    problems.push(Problem::new(
                        ProblemKind::DemandLate,
                        DateRange::new(d.due, latest),
                        latest.signed_duration_since(d.due).num_seconds() as f64 / 86400.0,
                        true,
                        format!("Demand '{}' planned after its due date", d.name),
                    ));
                }
                if early {
                    let earliest = self.operation_plan(*d.deliveries.last().unwrap()).end;
                    problems.push(Problem::new(
                        ProblemKind::DemandEarly,
                        DateRange::new(earliest, d.due),
                        d.due.signed_duration_since(earliest).num_seconds() as f64 / 86400.0,
                        true,
                        format!("Demand '{}' planned before its due date", d.name),
                    ));
                }
            }
            // Shortfall and excess compare the planned quantity to the
            // request, delivered or not.
            let planned = self.demand_planned_quantity(id);
            if planned + ROUNDING_ERROR < d.quantity {
                problems.push(Problem::new(
                    ProblemKind::DemandShort,
                    DateRange::at(d.due),
                    d.quantity - planned,
                    true,
                    format!(
                        "Demand '{}' planned {} units short",
                        d.name,
                        d.quantity - planned
                    ),
                ));
            } else if planned - ROUNDING_ERROR > d.quantity {
                problems.push(Problem::new(
                    ProblemKind::DemandExcess,
                    DateRange::at(d.due),
                    planned - d.quantity,
                    true,
                    format!(
                        "Demand '{}' planned {} units excess",
                        d.name,
                        planned - d.quantity
                    ),
                ));
            }
        }
        self.demand_mut(id).problems = problems;
    }
}

fn material_shortage(buffer: &str, start: Date, end: Date, qty: f64) -> Problem {
    Problem::new(
        ProblemKind::MaterialShortage,
        DateRange::new(start, end),
        qty,
        false,
        format!("Buffer '{buffer}' has material shortage of {qty}"),
    )
}

fn material_excess(buffer: &str, start: Date, end: Date, qty: f64) -> Problem {
    Problem::new(
        ProblemKind::MaterialExcess,
        DateRange::new(start, end),
        qty,
        true,
        format!("Buffer '{buffer}' has material excess of {qty}"),
    )
}

fn capacity_overload(resource: &str, start: Date, end: Date, qty: f64) -> Problem {
    Problem::new(
        ProblemKind::CapacityOverload,
        DateRange::new(start, end),
        qty,
        false,
        format!("Resource '{resource}' has capacity shortage of {qty}"),
    )
}

fn capacity_underload(resource: &str, start: Date, end: Date, qty: f64) -> Problem {
    Problem::new(
        ProblemKind::CapacityUnderload,
        DateRange::new(start, end),
        qty,
        true,
        format!("Resource '{resource}' has excess capacity of {qty}"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Flow, FlowKind};
    use crate::dates::date;
    use crate::demand::Demand;
    use crate::operation::Operation;
    use chrono::Duration;

    #[test]
    fn test_shortage_region_magnitude_and_span() {
        let mut model = Model::new();
        let op = model
            .add_operation(Operation::fixed_time("make", Duration::days(1)))
            .unwrap();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::days(1)))
            .unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(op, buf, FlowKind::End, 1.0)).unwrap();
        model.add_flow(Flow::new(take, buf, FlowKind::Start, -1.0)).unwrap();
        model.set_buffer_minimum(buf, 0.0);

        // Consume 5 on day 10, replenish 5 arriving day 20.
        let d10 = date(2024, 1, 10, 0, 0, 0);
        let p1 = model.create_operation_plan(take, 5.0, Some(d10), None).unwrap();
        model.activate(p1).unwrap();
        let p2 = model
            .create_operation_plan(op, 5.0, None, Some(date(2024, 1, 20, 0, 0, 0)))
            .unwrap();
        model.activate(p2).unwrap();

        model.compute_problems();
        let problems = &model.buffer(buf).problems;
        assert_eq!(problems.len(), 1);
        let p = &problems[0];
        assert_eq!(p.kind, ProblemKind::MaterialShortage);
        assert_eq!(p.weight, 5.0);
        assert_eq!(p.dates.start, d10);
        assert_eq!(p.dates.end, date(2024, 1, 20, 0, 0, 0));
        assert!(!p.feasible);
    }

    #[test]
    fn test_open_shortage_runs_to_horizon_end() {
        let mut model = Model::new();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::days(1)))
            .unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(take, buf, FlowKind::Start, -1.0)).unwrap();
        model.set_buffer_minimum(buf, 0.0);

        let d = date(2024, 1, 10, 0, 0, 0);
        let p = model.create_operation_plan(take, 3.0, Some(d), None).unwrap();
        model.activate(p).unwrap();

        model.compute_problems();
        let problems = &model.buffer(buf).problems;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].dates.end, DATE_MAX);
        assert_eq!(problems[0].weight, 3.0);
    }

    #[test]
    fn test_compute_problems_is_idempotent() {
        let mut model = Model::new();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::days(1)))
            .unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(take, buf, FlowKind::Start, -1.0)).unwrap();
        let p = model
            .create_operation_plan(take, 3.0, Some(date(2024, 1, 10, 0, 0, 0)), None)
            .unwrap();
        model.activate(p).unwrap();

        model.compute_problems();
        let first: Vec<Problem> = model.problems().cloned().collect();
        model.compute_problems();
        let second: Vec<Problem> = model.problems().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_demand_not_planned_and_short() {
        let mut model = Model::new();
        let due = date(2024, 2, 1, 0, 0, 0);
        let d = model.add_demand(Demand::new("order-1", 5.0, due)).unwrap();
        model.compute_problems();
        let kinds: Vec<ProblemKind> = model.demand(d).problems.iter().map(|p| p.kind).collect();
        assert_eq!(kinds, vec![ProblemKind::DemandNotPlanned, ProblemKind::DemandShort]);
        assert_eq!(model.demand(d).problems[1].weight, 5.0);
    }

    #[test]
    fn test_before_current_and_fence() {
        let mut model = Model::new();
        let now = date(2024, 6, 1, 0, 0, 0);
        model.set_current_date(now);
        let mut op = Operation::fixed_time("A", Duration::days(1));
        op.fence = Duration::days(10);
        let op = model.add_operation(op).unwrap();

        let past = model
            .create_operation_plan(op, 1.0, Some(date(2024, 5, 1, 0, 0, 0)), None)
            .unwrap();
        model.activate(past).unwrap();
        let fenced = model
            .create_operation_plan(op, 1.0, Some(date(2024, 6, 5, 0, 0, 0)), None)
            .unwrap();
        model.activate(fenced).unwrap();
        let fine = model
            .create_operation_plan(op, 1.0, Some(date(2024, 7, 1, 0, 0, 0)), None)
            .unwrap();
        model.activate(fine).unwrap();

        model.compute_problems();
        assert_eq!(model.operation_plan(past).problems[0].kind, ProblemKind::BeforeCurrent);
        assert_eq!(model.operation_plan(fenced).problems[0].kind, ProblemKind::BeforeFence);
        assert!(model.operation_plan(fine).problems.is_empty());
    }

    #[test]
    fn test_infinite_buffer_reports_nothing() {
        let mut model = Model::new();
        let take = model
            .add_operation(Operation::fixed_time("take", Duration::days(1)))
            .unwrap();
        let buf = model.add_buffer(Buffer::infinite("B")).unwrap();
        model.add_flow(Flow::new(take, buf, FlowKind::Start, -1.0)).unwrap();
        let p = model
            .create_operation_plan(take, 3.0, Some(date(2024, 1, 10, 0, 0, 0)), None)
            .unwrap();
        model.activate(p).unwrap();

        model.compute_problems();
        assert!(model.buffer(buf).problems.is_empty());
    }
}
