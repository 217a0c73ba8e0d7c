//! End-to-end planning scenarios: one operation round-trips, routing
//! chains, alternate selection and pegging across a three-stage
//! supply chain.

use aps_core::dates::date;
use aps_core::*;
use chrono::Duration;

/// A fixed-time operation producing into a constrained buffer: the
/// plan lands one day after its start and its material shows up on the
/// buffer timeline at the end date.
#[test]
fn fixed_time_round_trip() {
    let mut model = Model::new();
    model.set_current_date(date(2024, 1, 1, 0, 0, 0));
    let op = model
        .add_operation(Operation::fixed_time("A", Duration::days(1)).with_sizes(1.0, 1.0, 10.0))
        .unwrap();
    let buf = model.add_buffer(Buffer::new("B")).unwrap();
    model.set_buffer_minimum(buf, 0.0);
    model.set_buffer_maximum(buf, 10.0);
    model.add_flow(Flow::new(op, buf, FlowKind::End, 1.0)).unwrap();

    let d = date(2024, 3, 4, 0, 0, 0);
    let plan = model.create_operation_plan(op, 5.0, Some(d), None).unwrap();
    model.activate(plan).unwrap();

    let p = model.operation_plan(plan);
    assert_eq!(p.start, d);
    assert_eq!(p.end, date(2024, 3, 5, 0, 0, 0));
    assert_eq!(p.quantity, 5.0);
    assert_eq!(p.flowplans().len(), 1);
    let fp = p.flowplans()[0];
    assert_eq!(model.flowplan(fp).date(), date(2024, 3, 5, 0, 0, 0));
    assert_eq!(model.flowplan_quantity(fp), 5.0);
    assert_eq!(model.buffer_onhand(buf, date(2024, 3, 5, 0, 0, 0)), 5.0);

    model.compute_problems();
    assert!(model.buffer(buf).problems.is_empty());
    assert!(model.operation_plan(plan).problems.is_empty());
}

/// A time-per operation squeezed into a three hour window: one hour of
/// base time leaves room for exactly two per-unit hours.
#[test]
fn time_per_quantity_shrinks_to_window() {
    let mut model = Model::new();
    let op = model
        .add_operation(
            Operation::time_per("A", Duration::hours(1), 3600.0).with_sizes(1.0, 1.0, 100.0),
        )
        .unwrap();
    let d = date(2024, 3, 4, 0, 0, 0);
    let plan = model
        .create_operation_plan(op, 4.0, Some(d), Some(date(2024, 3, 4, 3, 0, 0)))
        .unwrap();
    model.activate(plan).unwrap();

    let p = model.operation_plan(plan);
    assert_eq!(p.quantity, 2.0);
    assert_eq!(p.end, date(2024, 3, 4, 3, 0, 0));
    assert_eq!(p.start, d);
}

/// A window too small for even the base duration zeroes the plan.
#[test]
fn time_per_infeasible_window_zeroes_the_plan() {
    let mut model = Model::new();
    let op = model
        .add_operation(Operation::time_per("A", Duration::hours(2), 3600.0))
        .unwrap();
    let d = date(2024, 3, 4, 0, 0, 0);
    let plan = model
        .create_operation_plan(op, 4.0, Some(d), Some(date(2024, 3, 4, 1, 0, 0)))
        .unwrap();
    model.activate(plan).unwrap();
    assert_eq!(model.operation_plan(plan).quantity, 0.0);
}

/// Unmet consumption out of a buffer: the buffer reports the shortage
/// over [T, infinity) and the demand is flagged unplanned and short.
#[test]
fn shortage_problem_chain() {
    let mut model = Model::new();
    let item = model.add_item(Item::new("widget")).unwrap();
    let buf = model.add_buffer(Buffer::new("B").of(item)).unwrap();
    model.set_buffer_minimum(buf, 0.0);
    let deliver = model
        .add_operation(Operation::fixed_time("Deliver", Duration::zero()))
        .unwrap();
    model
        .add_flow(Flow::new(deliver, buf, FlowKind::Start, -1.0))
        .unwrap();

    let t = date(2024, 5, 1, 0, 0, 0);
    let demand = model
        .add_demand(Demand::new("order", 5.0, t).of(item))
        .unwrap();
    // The material was taken at the due date, but the demand never got
    // a registered delivery.
    let take = model.create_operation_plan(deliver, 5.0, Some(t), None).unwrap();
    model.activate(take).unwrap();

    model.compute_problems();

    let shortages = &model.buffer(buf).problems;
    assert_eq!(shortages.len(), 1);
    assert_eq!(shortages[0].kind, ProblemKind::MaterialShortage);
    assert_eq!(shortages[0].weight, 5.0);
    assert_eq!(shortages[0].dates.start, t);
    assert_eq!(shortages[0].dates.end, DATE_MAX);

    let kinds: Vec<ProblemKind> = model
        .demand(demand)
        .problems
        .iter()
        .map(|p| p.kind)
        .collect();
    assert!(kinds.contains(&ProblemKind::DemandNotPlanned));
    assert!(kinds.contains(&ProblemKind::DemandShort));
}

/// A three-step routing planned backward from its end date: the steps
/// lie back to back and the parent spans their envelope.
#[test]
fn routing_steps_walk_back_from_the_end() {
    let mut model = Model::new();
    model.set_current_date(date(2024, 1, 1, 0, 0, 0));
    let s1 = model
        .add_operation(Operation::fixed_time("S1", Duration::hours(1)))
        .unwrap();
    let s2 = model
        .add_operation(Operation::fixed_time("S2", Duration::hours(2)))
        .unwrap();
    let s3 = model
        .add_operation(Operation::fixed_time("S3", Duration::hours(1)))
        .unwrap();
    let routing = model
        .add_operation(Operation::routing("R", vec![s1, s2, s3]))
        .unwrap();

    let d = date(2024, 3, 4, 12, 0, 0);
    let plan = model.create_operation_plan(routing, 1.0, None, Some(d)).unwrap();
    model.activate(plan).unwrap();

    let children = model.child_plans(plan);
    assert_eq!(children.len(), 3);
    let [c1, c2, c3] = [children[0], children[1], children[2]];
    assert_eq!(model.operation_plan(c1).operation, s1);
    assert_eq!(model.operation_plan(c3).end, d);
    assert_eq!(model.operation_plan(c2).end, model.operation_plan(c3).start);
    assert_eq!(model.operation_plan(c1).end, model.operation_plan(c2).start);
    assert_eq!(model.operation_plan(c1).start, date(2024, 3, 4, 8, 0, 0));
    // The parent wraps its steps.
    assert_eq!(model.operation_plan(plan).start, date(2024, 3, 4, 8, 0, 0));
    assert_eq!(model.operation_plan(plan).end, d);
    // Every step carries the routed quantity, and they are start-sorted.
    for w in children.windows(2) {
        assert!(model.operation_plan(w[0]).start <= model.operation_plan(w[1]).start);
    }

    model.compute_problems();
    for c in &children {
        assert!(model.operation_plan(*c).problems.is_empty());
    }
}

/// Alternate selection: the lowest priority number wins; a disabled
/// alternate (priority 0) falls through to the next one.
#[test]
fn alternate_picks_by_priority() {
    let mut model = Model::new();
    let x = model
        .add_operation(Operation::fixed_time("X", Duration::hours(1)))
        .unwrap();
    let y = model
        .add_operation(Operation::fixed_time("Y", Duration::hours(1)))
        .unwrap();
    let alt = model.add_operation(Operation::alternate("ALT")).unwrap();
    model.add_alternate_member(alt, x, 1, DateRange::default()).unwrap();
    model.add_alternate_member(alt, y, 2, DateRange::default()).unwrap();

    let t = date(2024, 3, 4, 12, 0, 0);
    let plan = model.create_operation_plan(alt, 2.0, None, Some(t)).unwrap();
    model.activate(plan).unwrap();
    let children = model.child_plans(plan);
    assert_eq!(children.len(), 1);
    assert_eq!(model.operation_plan(children[0]).operation, x);

    // Disable X and re-instantiate: Y is chosen.
    model.set_alternate_priority(alt, x, 0).unwrap();
    let plan2 = model.create_operation_plan(alt, 2.0, None, Some(t)).unwrap();
    model.activate(plan2).unwrap();
    let children = model.child_plans(plan2);
    assert_eq!(children.len(), 1);
    assert_eq!(model.operation_plan(children[0]).operation, y);

    // At most one non-setup child ever exists under an alternate.
    for p in [plan, plan2] {
        let non_setup = model
            .child_plans(p)
            .into_iter()
            .filter(|c| !model.operation_plan(*c).is_setup)
            .count();
        assert!(non_setup <= 1);
    }
}

/// Three-stage chain, pegged end to end: downstream from the raw plan
/// reaches the middle and final stages in order, with the full demand
/// quantity at each level.
#[test]
fn pegging_chain_downstream_and_back() {
    let mut model = Model::new();
    let raw = model
        .add_operation(Operation::fixed_time("Raw", Duration::hours(1)))
        .unwrap();
    let mid = model
        .add_operation(Operation::fixed_time("Mid", Duration::hours(1)))
        .unwrap();
    let fin = model
        .add_operation(Operation::fixed_time("Final", Duration::hours(1)))
        .unwrap();
    let b0 = model.add_buffer(Buffer::new("B0")).unwrap();
    let b1 = model.add_buffer(Buffer::new("B1")).unwrap();
    model.add_flow(Flow::new(raw, b0, FlowKind::End, 1.0)).unwrap();
    model.add_flow(Flow::new(mid, b0, FlowKind::Start, -1.0)).unwrap();
    model.add_flow(Flow::new(mid, b1, FlowKind::End, 1.0)).unwrap();
    model.add_flow(Flow::new(fin, b1, FlowKind::Start, -1.0)).unwrap();

    let item = model.add_item(Item::new("product")).unwrap();
    model.item_mut(item).delivery_operation = Some(fin);
    let t = date(2024, 6, 1, 0, 0, 0);
    let demand = model.add_demand(Demand::new("D", 5.0, t).of(item)).unwrap();

    let p_raw = model
        .create_operation_plan(raw, 5.0, None, Some(date(2024, 5, 28, 0, 0, 0)))
        .unwrap();
    model.activate(p_raw).unwrap();
    let p_mid = model
        .create_operation_plan(mid, 5.0, None, Some(date(2024, 5, 30, 0, 0, 0)))
        .unwrap();
    model.activate(p_mid).unwrap();
    let p_fin = model
        .create_delivery_plan(fin, 5.0, None, Some(t), demand)
        .unwrap();
    model.activate(p_fin).unwrap();

    let entries: Vec<PeggingEntry> = PeggingIterator::for_plan(&model, p_raw, true).collect();
    let visited: Vec<_> = entries.iter().map(|e| (e.plan, e.level)).collect();
    assert_eq!(visited, vec![(p_raw, 0), (p_mid, 1), (p_fin, 2)]);
    for e in &entries {
        assert!((e.quantity - 5.0).abs() < 1e-6);
    }

    // Round trip: upstream from the final plan reaches the raw plan.
    let upstream: Vec<PlanId> = PeggingIterator::for_plan(&model, p_fin, false)
        .map(|e| e.plan)
        .collect();
    assert!(upstream.contains(&p_raw));

    // And the demand's own pegging starts at its delivery.
    let from_demand: Vec<PlanId> = PeggingIterator::for_demand(&model, demand)
        .map(|e| e.plan)
        .collect();
    assert_eq!(from_demand[0], p_fin);
    assert!(from_demand.contains(&p_raw));
}
