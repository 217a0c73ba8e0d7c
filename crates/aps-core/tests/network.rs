//! Capacity, replenishment and structural integrity across the
//! network: resource loading, bucketed capacity, procurement and
//! item-supplier replenishment, setup changeovers, split operations
//! and the cascade on buffer deletion.

use aps_core::dates::date;
use aps_core::*;
use chrono::Duration;

/// Resource load equals the sum of active loadplan contributions, and
/// an overload problem covers exactly the dates where load exceeds
/// capacity.
#[test]
fn resource_load_matches_loadplans_and_overload_problems() {
    let mut model = Model::new();
    model.set_current_date(date(2024, 1, 1, 0, 0, 0));
    let op = model
        .add_operation(Operation::fixed_time("A", Duration::days(2)))
        .unwrap();
    let res = model.add_resource(Resource::new("machine")).unwrap();
    model.set_resource_maximum(res, 1.0);
    model.add_load(Load::new(op, res, 1.0)).unwrap();

    let d1 = date(2024, 3, 4, 0, 0, 0);
    let p1 = model.create_operation_plan(op, 1.0, Some(d1), None).unwrap();
    model.activate(p1).unwrap();
    // Overlapping second plan: load 2 against capacity 1.
    let d2 = date(2024, 3, 5, 0, 0, 0);
    let p2 = model.create_operation_plan(op, 1.0, Some(d2), None).unwrap();
    model.activate(p2).unwrap();

    assert_eq!(model.resource_load(res, date(2024, 3, 4, 12, 0, 0)), 1.0);
    assert_eq!(model.resource_load(res, date(2024, 3, 5, 12, 0, 0)), 2.0);
    assert_eq!(model.resource_load(res, date(2024, 3, 7, 0, 0, 0)), 0.0);

    model.compute_problems();
    let problems = &model.resource(res).problems;
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::CapacityOverload);
    // The overloaded stretch is where both plans run concurrently.
    assert_eq!(problems[0].dates.start, d2);
    assert_eq!(problems[0].dates.end, date(2024, 3, 6, 0, 0, 0));
    assert_eq!(problems[0].weight, 1.0);

    // Load within capacity at a date not covered by the problem.
    let probe = date(2024, 3, 4, 12, 0, 0);
    assert!(model.resource_load(res, probe) <= model.resource_capacity(res, probe));
    assert!(!problems[0].dates.contains(probe));
}

/// A bucketed resource consumes capacity inside the bucket the plan
/// starts in; drawing more than the bucket holds is an overload.
#[test]
fn bucketed_resource_counts_per_bucket() {
    let mut model = Model::new();
    model.set_current_date(date(2024, 1, 1, 0, 0, 0));
    let mut cal = Calendar::new("weeks", 0.0);
    cal.set_value(date(2024, 1, 1, 0, 0, 0), date(2024, 1, 8, 0, 0, 0), 10.0)
        .unwrap();
    cal.set_value(date(2024, 1, 8, 0, 0, 0), date(2024, 1, 15, 0, 0, 0), 10.0)
        .unwrap();
    let cal = model.add_calendar(cal).unwrap();
    let res = model.add_resource(Resource::bucketed("line")).unwrap();
    model.set_resource_maximum_calendar(res, Some(cal)).unwrap();

    let op = model
        .add_operation(Operation::fixed_time("A", Duration::hours(4)))
        .unwrap();
    model.add_load(Load::new(op, res, 2.0)).unwrap();

    // 4 units x 2 capacity each = 8 within the first bucket: fits.
    let p1 = model
        .create_operation_plan(op, 4.0, Some(date(2024, 1, 2, 0, 0, 0)), None)
        .unwrap();
    model.activate(p1).unwrap();
    model.compute_problems();
    assert!(model.resource(res).problems.is_empty());

    // Another 4 units in the same bucket exceed the 10.
    let p2 = model
        .create_operation_plan(op, 4.0, Some(date(2024, 1, 3, 0, 0, 0)), None)
        .unwrap();
    model.activate(p2).unwrap();
    model.compute_problems();
    let problems = &model.resource(res).problems;
    assert_eq!(problems.len(), 1);
    assert_eq!(problems[0].kind, ProblemKind::CapacityOverload);
    assert_eq!(problems[0].weight, 6.0);
    assert_eq!(problems[0].dates.start, date(2024, 1, 1, 0, 0, 0));
}

/// Procurement buffers drive a synthetic purchase operation from
/// their policy.
#[test]
fn procurement_buffer_builds_purchase_operation() {
    let mut model = Model::new();
    let buf = model
        .add_buffer(Buffer::procure(
            "raw@plant",
            ProcurementPolicy {
                leadtime: Duration::days(7),
                fence: Duration::days(2),
                size_minimum: 10.0,
                size_multiple: 5.0,
                ..ProcurementPolicy::default()
            },
        ))
        .unwrap();
    let op = model.build_producing_operation(buf).unwrap().unwrap();

    let o = model.operation(op);
    assert!(matches!(o.kind, OperationKind::FixedTime { duration } if duration == Duration::days(7)));
    assert_eq!(o.fence, Duration::days(2));
    assert_eq!(o.size_minimum, 10.0);
    assert_eq!(o.size_multiple, 5.0);
    assert!(o.hidden);
    assert_eq!(model.buffer(buf).producing_operation, Some(op));

    // A second call reuses the same operation.
    assert_eq!(model.build_producing_operation(buf).unwrap(), Some(op));
}

/// A buffer without a producing operation derives one from the
/// item-supplier relations of its item, preferring lower priority.
#[test]
fn item_supplier_replenishment() {
    let mut model = Model::new();
    let item = model.add_item(Item::new("bolt")).unwrap();
    let acme = model.add_supplier(Supplier::new("acme")).unwrap();
    let bolts_r_us = model.add_supplier(Supplier::new("bolts-r-us")).unwrap();
    let mut slow = ItemSupplier::new(acme, item, Duration::days(20));
    slow.priority = 5;
    model.add_item_supplier(slow).unwrap();
    let mut fast = ItemSupplier::new(bolts_r_us, item, Duration::days(3));
    fast.priority = 1;
    model.add_item_supplier(fast).unwrap();

    let buf = model.add_buffer(Buffer::new("bolt@plant").of(item)).unwrap();
    let op = model.build_producing_operation(buf).unwrap().unwrap();
    let o = model.operation(op);
    assert!(
        matches!(o.kind, OperationKind::ItemSupplier { supplier, leadtime }
            if supplier == bolts_r_us && leadtime == Duration::days(3))
    );
    // The purchase flow produces into the buffer.
    assert_eq!(o.flows.len(), 1);
    let f = model.flow(o.flows[0]);
    assert_eq!(f.buffer, buf);
    assert!(f.is_producer());
}

/// Initial inventory is a locked plan of a hidden operation; it seeds
/// the running on-hand from the start of the horizon.
#[test]
fn onhand_seeding_and_range_queries() {
    let mut model = Model::new();
    let buf = model.add_buffer(Buffer::new("B")).unwrap();
    model.set_buffer_onhand(buf, 12.0).unwrap();
    assert_eq!(model.buffer_onhand(buf, date(2024, 1, 1, 0, 0, 0)), 12.0);

    // A consumer drops the level mid-horizon.
    let take = model
        .add_operation(Operation::fixed_time("take", Duration::hours(1)))
        .unwrap();
    model.add_flow(Flow::new(take, buf, FlowKind::Start, -1.0)).unwrap();
    let p = model
        .create_operation_plan(take, 4.0, Some(date(2024, 2, 1, 0, 0, 0)), None)
        .unwrap();
    model.activate(p).unwrap();

    assert_eq!(model.buffer_onhand(buf, date(2024, 3, 1, 0, 0, 0)), 8.0);
    let lo = model.buffer_onhand_range(
        buf,
        date(2024, 1, 1, 0, 0, 0),
        date(2024, 3, 1, 0, 0, 0),
        true,
    );
    let hi = model.buffer_onhand_range(
        buf,
        date(2024, 1, 1, 0, 0, 0),
        date(2024, 3, 1, 0, 0, 0),
        false,
    );
    assert_eq!(lo, 8.0);
    assert_eq!(hi, 12.0);

    // Reseeding updates the same locked plan.
    model.set_buffer_onhand(buf, 20.0).unwrap();
    assert_eq!(model.buffer_onhand(buf, date(2024, 3, 1, 0, 0, 0)), 16.0);
}

/// A load with a required setup on a matrix-carrying resource spawns a
/// changeover child whose duration comes from the matrix.
#[test]
fn setup_changeover_child() {
    let mut model = Model::new();
    model.set_current_date(date(2024, 1, 1, 0, 0, 0));
    let mut matrix = SetupMatrix::new("colors");
    matrix
        .add_rule(
            SetupRule::new(1)
                .from("*")
                .to("red")
                .taking(Duration::hours(2)),
        )
        .unwrap();
    let matrix = model.add_setup_matrix(matrix).unwrap();
    let res = model.add_resource(Resource::new("paintshop")).unwrap();
    model.resource_mut(res).setup_matrix = Some(matrix);
    model.resource_mut(res).setup = "green".into();

    let op = model
        .add_operation(Operation::fixed_time("paint-red", Duration::hours(4)))
        .unwrap();
    model
        .add_load(Load::new(op, res, 1.0).with_setup("red"))
        .unwrap();

    let d = date(2024, 3, 4, 8, 0, 0);
    let plan = model.create_operation_plan(op, 1.0, Some(d), None).unwrap();
    model.activate(plan).unwrap();

    assert!(model.operation_plan(plan).has_setup);
    let children = model.child_plans(plan);
    assert_eq!(children.len(), 1);
    let setup_plan = model.operation_plan(children[0]);
    assert!(setup_plan.is_setup);
    // Two hours of changeover ending at the plan start.
    assert_eq!(setup_plan.end, d);
    assert_eq!(setup_plan.start, date(2024, 3, 4, 6, 0, 0));
}

/// Split operations run their branches in parallel with fixed
/// proportions; overlap between branches is not a precedence problem.
#[test]
fn split_branches_share_the_quantity() {
    let mut model = Model::new();
    model.set_current_date(date(2024, 1, 1, 0, 0, 0));
    let a = model
        .add_operation(Operation::fixed_time("lineA", Duration::hours(2)))
        .unwrap();
    let b = model
        .add_operation(Operation::fixed_time("lineB", Duration::hours(2)))
        .unwrap();
    let split = model
        .add_operation(Operation::split(
            "spread",
            vec![
                SplitMember { operation: a, percent: 60.0 },
                SplitMember { operation: b, percent: 40.0 },
            ],
        ))
        .unwrap();

    let d = date(2024, 3, 4, 12, 0, 0);
    let plan = model.create_operation_plan(split, 10.0, None, Some(d)).unwrap();
    model.activate(plan).unwrap();

    let children = model.child_plans(plan);
    assert_eq!(children.len(), 2);
    let qty_a = model.operation_plan(children[0]).quantity;
    let qty_b = model.operation_plan(children[1]).quantity;
    assert!((qty_a - 6.0).abs() < 1e-6);
    assert!((qty_b - 4.0).abs() < 1e-6);
    // Concurrent branches raise no precedence problems.
    model.compute_problems();
    for c in children {
        assert!(model
            .operation_plan(c)
            .problems
            .iter()
            .all(|p| p.kind != ProblemKind::Precedence));
    }
}

/// Deleting a buffer removes every flow, flow plan and auto-built
/// purchase operation referring to it; nothing dangles.
#[test]
fn buffer_deletion_cascades() {
    let mut model = Model::new();
    let item = model.add_item(Item::new("bolt")).unwrap();
    let acme = model.add_supplier(Supplier::new("acme")).unwrap();
    model
        .add_item_supplier(ItemSupplier::new(acme, item, Duration::days(3)))
        .unwrap();
    let buf = model.add_buffer(Buffer::new("B").of(item)).unwrap();
    let purchase = model.build_producing_operation(buf).unwrap().unwrap();

    let consumer = model
        .add_operation(Operation::fixed_time("use", Duration::hours(1)))
        .unwrap();
    model
        .add_flow(Flow::new(consumer, buf, FlowKind::Start, -1.0))
        .unwrap();
    let p = model
        .create_operation_plan(consumer, 2.0, Some(date(2024, 3, 1, 0, 0, 0)), None)
        .unwrap();
    model.activate(p).unwrap();

    model.delete_buffer(buf).unwrap();

    assert!(model.find_buffer("B").is_none());
    // The auto-built purchase operation went with the buffer.
    assert!(model.operations().all(|(id, _)| id != purchase));
    // The consumer survives but has no flows or plans left.
    assert!(model.operation(consumer).flows.is_empty());
    assert!(model.plans_of(consumer).is_empty());
}
