//! Loading a record stream into a model and rendering snapshots back
//! out at the three export depths.

use aps_io::{apply_records, load_records_from_path, snapshot, ExportDepth};
use std::io::Write;

const RECORDS: &str = r#"
- category: location
  name: plant
- category: item
  name: widget
  price: 12.5
- category: customer
  name: north
- category: operation
  name: make widget
  shape: fixed_time
  duration: 86400
  location: plant
  size_minimum: 1
- category: operation
  name: deliver widget
  shape: fixed_time
  duration: 0
- category: item
  name: widget
  action: CHANGE
  delivery_operation: deliver widget
- category: buffer
  name: widget@plant
  item: widget
  location: plant
  onhand: 4
- category: flow
  operation: make widget
  buffer: widget@plant
  kind: End
  quantity: 1
- category: flow
  operation: deliver widget
  buffer: widget@plant
  kind: Start
  quantity: -1
- category: resource
  name: press
  maximum: 2
- category: load
  operation: make widget
  resource: press
- category: demand
  name: order-1
  item: widget
  customer: north
  quantity: 10
  due: 2024-06-01T00:00:00Z
- category: operation_plan
  operation: make widget
  quantity: 6
  end: 2024-05-30T00:00:00Z
- category: operation_plan
  operation: deliver widget
  quantity: 10
  end: 2024-06-01T00:00:00Z
  demand: order-1
"#;

fn load_model() -> aps_core::Model {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(RECORDS.as_bytes()).unwrap();
    let records = load_records_from_path(file.path()).unwrap();
    let mut model = aps_core::Model::new();
    model.set_current_date(aps_core::dates::date(2024, 1, 1, 0, 0, 0));
    apply_records(&mut model, &records).unwrap();
    model
}

#[test]
fn records_build_the_network() {
    let model = load_model();
    let buf = model.find_buffer("widget@plant").unwrap();
    // Seeded 4, produced 6, delivered 10.
    assert_eq!(
        model.buffer_onhand(buf, aps_core::dates::date(2024, 7, 1, 0, 0, 0)),
        0.0
    );
    let demand = model.find_demand("order-1").unwrap();
    assert_eq!(model.demand_planned_quantity(demand), 10.0);
    let press = model.find_resource("press").unwrap();
    assert_eq!(
        model.resource_load(press, aps_core::dates::date(2024, 5, 29, 12, 0, 0)),
        1.0
    );
}

#[test]
fn unknown_references_are_reported() {
    let yaml = r#"
- category: flow
  operation: nowhere
  buffer: nothing
  quantity: 1
"#;
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    let records = load_records_from_path(file.path()).unwrap();
    let mut model = aps_core::Model::new();
    let err = apply_records(&mut model, &records).unwrap_err();
    assert!(format!("{err:#}").contains("unknown operation 'nowhere'"));
}

#[test]
fn export_depths_nest() {
    let mut model = load_model();

    let base = snapshot(&mut model, ExportDepth::Base);
    assert!(base.operation_plans.is_empty());
    assert!(base.pegging.is_empty());
    assert_eq!(base.items.len(), 1);
    assert_eq!(base.buffers.len(), 1);

    let plan = snapshot(&mut model, ExportDepth::Plan);
    assert_eq!(plan.operation_plans.len(), 2);
    assert!(plan.pegging.is_empty());

    let detail = snapshot(&mut model, ExportDepth::PlanDetail);
    assert_eq!(detail.pegging.len(), 1);
    let pegging = &detail.pegging[0];
    assert_eq!(pegging.demand, "order-1");
    // The delivery pegs back to the producing plan.
    assert!(pegging
        .entries
        .iter()
        .any(|e| e.operation == "make widget"));

    let json = detail.to_json().unwrap();
    assert!(json.contains("\"order-1\""));
    let yaml = detail.to_yaml().unwrap();
    assert!(yaml.contains("order-1"));
}
