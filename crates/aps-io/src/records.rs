//! The model-input record stream.
//!
//! Each record names an entity category, the key attributes (the
//! entity name, or the endpoint names for flows and loads), the data
//! attributes, and an action. References to other entities are by
//! name; the loader is responsible for ordering leaves first.

use anyhow::{anyhow, bail, Context, Result};
use aps_core::{
    dates::DateRange, Buffer, Calendar, CalendarBucket, Customer, Demand, Flow, FlowKind, Item,
    ItemSupplier, Load, Location, Model, Operation, OperationId, ProcurementPolicy, Resource,
    SetupMatrix, SetupRule, Skill, Supplier,
};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

fn default_action() -> Action {
    Action::AddChange
}

fn default_one() -> f64 {
    1.0
}

/// What to do with the addressed entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    /// Create; an existing entity with the same key is an error.
    Add,
    /// Update; a missing entity is an error.
    Change,
    /// Create or update.
    AddChange,
    /// Delete.
    Remove,
}

/// One line of the model input stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRecord {
    #[serde(default = "default_action")]
    pub action: Action,
    #[serde(flatten)]
    pub body: RecordBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BucketSpec {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub value: f64,
    #[serde(default)]
    pub priority: i32,
    /// Bit 0 = Sunday ... bit 6 = Saturday.
    #[serde(default)]
    pub days: Option<u8>,
    #[serde(default)]
    pub start_time: Option<i64>,
    #[serde(default)]
    pub end_time: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSpec {
    pub priority: i32,
    #[serde(default)]
    pub from_setup: String,
    #[serde(default)]
    pub to_setup: String,
    #[serde(default)]
    pub duration: i64,
    #[serde(default)]
    pub cost: f64,
}

/// The operation shape carried by an operation record.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OperationShape {
    #[default]
    FixedTime,
    TimePer,
    Routing,
    Alternate,
    Split,
}

/// Category-specific payloads. Durations are in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RecordBody {
    Item {
        name: String,
        #[serde(default)]
        description: Option<String>,
        #[serde(default)]
        price: Option<f64>,
        #[serde(default)]
        owner: Option<String>,
        #[serde(default)]
        delivery_operation: Option<String>,
    },
    Location {
        name: String,
        #[serde(default)]
        available: Option<String>,
    },
    Customer {
        name: String,
    },
    Supplier {
        name: String,
    },
    Skill {
        name: String,
    },
    Calendar {
        name: String,
        #[serde(default)]
        default_value: f64,
        #[serde(default)]
        buckets: Vec<BucketSpec>,
    },
    SetupMatrix {
        name: String,
        #[serde(default)]
        rules: Vec<RuleSpec>,
    },
    Operation {
        name: String,
        #[serde(default)]
        shape: OperationShape,
        #[serde(default)]
        duration: Option<i64>,
        #[serde(default)]
        duration_per: Option<f64>,
        #[serde(default)]
        steps: Vec<String>,
        #[serde(default)]
        alternates: Vec<AlternateSpec>,
        #[serde(default)]
        members: Vec<SplitSpec>,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        fence: Option<i64>,
        #[serde(default)]
        size_minimum: Option<f64>,
        #[serde(default)]
        size_multiple: Option<f64>,
        #[serde(default)]
        size_maximum: Option<f64>,
        #[serde(default)]
        cost: Option<f64>,
    },
    Buffer {
        name: String,
        #[serde(default)]
        item: Option<String>,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        onhand: Option<f64>,
        #[serde(default)]
        minimum: Option<f64>,
        #[serde(default)]
        maximum: Option<f64>,
        #[serde(default)]
        minimum_calendar: Option<String>,
        #[serde(default)]
        maximum_calendar: Option<String>,
        #[serde(default)]
        producing_operation: Option<String>,
        #[serde(default)]
        infinite: bool,
        #[serde(default)]
        procure: Option<ProcureSpec>,
    },
    Resource {
        name: String,
        #[serde(default)]
        location: Option<String>,
        #[serde(default)]
        maximum: Option<f64>,
        #[serde(default)]
        maximum_calendar: Option<String>,
        #[serde(default)]
        infinite: bool,
        #[serde(default)]
        bucketed: bool,
        #[serde(default)]
        setup_matrix: Option<String>,
        #[serde(default)]
        setup: Option<String>,
    },
    Flow {
        operation: String,
        buffer: String,
        #[serde(default)]
        kind: FlowKind,
        quantity: f64,
        #[serde(default)]
        priority: Option<i32>,
        #[serde(default)]
        effective_start: Option<DateTime<Utc>>,
        #[serde(default)]
        effective_end: Option<DateTime<Utc>>,
    },
    Load {
        operation: String,
        resource: String,
        #[serde(default = "default_one")]
        quantity: f64,
        #[serde(default)]
        setup: Option<String>,
        #[serde(default)]
        skill: Option<String>,
    },
    ItemSupplier {
        item: String,
        supplier: String,
        #[serde(default)]
        location: Option<String>,
        leadtime: i64,
        #[serde(default)]
        priority: Option<i32>,
        #[serde(default)]
        cost: Option<f64>,
    },
    Demand {
        name: String,
        #[serde(default)]
        item: Option<String>,
        #[serde(default)]
        customer: Option<String>,
        quantity: f64,
        due: DateTime<Utc>,
        #[serde(default)]
        priority: Option<i32>,
        #[serde(default)]
        operation: Option<String>,
        #[serde(default)]
        min_shipment: Option<f64>,
        #[serde(default)]
        max_lateness: Option<i64>,
    },
    OperationPlan {
        operation: String,
        quantity: f64,
        #[serde(default)]
        start: Option<DateTime<Utc>>,
        #[serde(default)]
        end: Option<DateTime<Utc>>,
        #[serde(default)]
        demand: Option<String>,
        #[serde(default)]
        locked: bool,
        #[serde(default)]
        identifier: Option<u64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlternateSpec {
    pub operation: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default)]
    pub effective_start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub effective_end: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SplitSpec {
    pub operation: String,
    pub percent: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcureSpec {
    pub leadtime: i64,
    #[serde(default)]
    pub fence: i64,
    #[serde(default)]
    pub size_minimum: f64,
    #[serde(default)]
    pub size_multiple: f64,
}

/// Load a record stream from a YAML or JSON file.
pub fn load_records_from_path(path: &Path) -> Result<Vec<ModelRecord>> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("reading model records '{}'", path.display()))?;
    match path.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("json") => {
            serde_json::from_str(&data).context("parsing model records json")
        }
        _ => serde_yaml::from_str(&data)
            .or_else(|_| serde_json::from_str(&data))
            .context("parsing model records"),
    }
}

/// Apply a batch of records in order.
pub fn apply_records(model: &mut Model, records: &[ModelRecord]) -> Result<()> {
    for (i, r) in records.iter().enumerate() {
        apply_record(model, r).with_context(|| format!("applying record {i}"))?;
    }
    Ok(())
}

fn range(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> DateRange {
    DateRange {
        start: start.unwrap_or(aps_core::DATE_MIN),
        end: end.unwrap_or(aps_core::DATE_MAX),
    }
}

fn find_operation(model: &Model, name: &str) -> Result<OperationId> {
    model
        .find_operation(name)
        .ok_or_else(|| anyhow!("unknown operation '{name}'"))
}

/// Apply one record to the model, resolving every reference by name.
pub fn apply_record(model: &mut Model, record: &ModelRecord) -> Result<()> {
    let action = record.action;
    match &record.body {
        RecordBody::Item {
            name,
            description,
            price,
            owner,
            delivery_operation,
        } => {
            let existing = model.find_item(name);
            let id = match (action, existing) {
                (Action::Remove, Some(_)) => {
                    bail!("removing items is not supported by the core")
                }
                (Action::Remove, None) => bail!("unknown item '{name}'"),
                (Action::Add, Some(_)) => bail!("item '{name}' already exists"),
                (Action::Change, None) => bail!("unknown item '{name}'"),
                (_, Some(id)) => id,
                (_, None) => model.add_item(Item::new(name.clone()))?,
            };
            if let Some(d) = description {
                model.item_mut(id).description = Some(d.clone());
            }
            if let Some(p) = price {
                model.item_mut(id).price = *p;
            }
            if let Some(o) = owner {
                let parent = model
                    .find_item(o)
                    .ok_or_else(|| anyhow!("unknown item '{o}'"))?;
                model.set_item_owner(id, Some(parent));
            }
            if let Some(op) = delivery_operation {
                let op = find_operation(model, op)?;
                model.item_mut(id).delivery_operation = Some(op);
            }
        }
        RecordBody::Location { name, available } => {
            let id = match model.find_location(name) {
                Some(id) => id,
                None => model.add_location(Location::new(name.clone()))?,
            };
            if let Some(cal) = available {
                let cal = model
                    .find_calendar(cal)
                    .ok_or_else(|| anyhow!("unknown calendar '{cal}'"))?;
                model.location_mut(id).available = Some(cal);
            }
        }
        RecordBody::Customer { name } => {
            if model.find_customer(name).is_none() {
                model.add_customer(Customer::new(name.clone()))?;
            }
        }
        RecordBody::Supplier { name } => {
            if model.find_supplier(name).is_none() {
                model.add_supplier(Supplier::new(name.clone()))?;
            }
        }
        RecordBody::Skill { name } => {
            if model.find_skill(name).is_none() {
                model.add_skill(Skill::new(name.clone()))?;
            }
        }
        RecordBody::Calendar {
            name,
            default_value,
            buckets,
        } => {
            let mut cal = Calendar::new(name.clone(), *default_value);
            for b in buckets {
                let mut bucket = CalendarBucket::new(b.start, b.end)
                    .with_value(b.value)
                    .with_priority(b.priority);
                if let Some(days) = b.days {
                    bucket = bucket.with_days(days);
                }
                if let (Some(s), Some(e)) = (b.start_time, b.end_time) {
                    bucket = bucket.with_day_window(s, e);
                }
                cal.add_bucket(bucket)?;
            }
            model.add_calendar(cal)?;
        }
        RecordBody::SetupMatrix { name, rules } => {
            let mut matrix = SetupMatrix::new(name.clone());
            for r in rules {
                matrix.add_rule(
                    SetupRule::new(r.priority)
                        .from(r.from_setup.clone())
                        .to(r.to_setup.clone())
                        .taking(Duration::seconds(r.duration))
                        .costing(r.cost),
                )?;
            }
            model.add_setup_matrix(matrix)?;
        }
        RecordBody::Operation {
            name,
            shape,
            duration,
            duration_per,
            steps,
            alternates,
            members,
            location,
            fence,
            size_minimum,
            size_multiple,
            size_maximum,
            cost,
        } => {
            if action == Action::Remove {
                let id = find_operation(model, name)?;
                model.delete_operation(id)?;
                return Ok(());
            }
            let id = match model.find_operation(name) {
                Some(id) => {
                    if action == Action::Add {
                        bail!("operation '{name}' already exists");
                    }
                    id
                }
                None => {
                    if action == Action::Change {
                        bail!("unknown operation '{name}'");
                    }
                    let base_duration = Duration::seconds((*duration).unwrap_or(0));
                    let op = match shape {
                        OperationShape::FixedTime => Operation::fixed_time(name.clone(), base_duration),
                        OperationShape::TimePer => Operation::time_per(
                            name.clone(),
                            base_duration,
                            (*duration_per).unwrap_or(0.0),
                        ),
                        OperationShape::Routing => {
                            let mut ids = Vec::new();
                            for s in steps {
                                ids.push(find_operation(model, s)?);
                            }
                            Operation::routing(name.clone(), ids)
                        }
                        OperationShape::Alternate => Operation::alternate(name.clone()),
                        OperationShape::Split => {
                            let mut ms = Vec::new();
                            for m in members {
                                ms.push(aps_core::SplitMember {
                                    operation: find_operation(model, &m.operation)?,
                                    percent: m.percent,
                                });
                            }
                            Operation::split(name.clone(), ms)
                        }
                    };
                    let id = model.add_operation(op)?;
                    for a in alternates {
                        let member = find_operation(model, &a.operation)?;
                        model.add_alternate_member(
                            id,
                            member,
                            a.priority,
                            range(a.effective_start, a.effective_end),
                        )?;
                    }
                    id
                }
            };
            if let Some(l) = location {
                let l = model
                    .find_location(l)
                    .ok_or_else(|| anyhow!("unknown location '{l}'"))?;
                model.operation_mut(id).location = Some(l);
            }
            if let Some(f) = fence {
                model.operation_mut(id).set_fence(Duration::seconds(*f));
            }
            if let Some(v) = size_minimum {
                model.operation_mut(id).set_size_minimum(*v)?;
            }
            if let Some(v) = size_multiple {
                model.operation_mut(id).set_size_multiple(*v)?;
            }
            if let Some(v) = size_maximum {
                model.operation_mut(id).set_size_maximum(*v)?;
            }
            if let Some(v) = cost {
                model.operation_mut(id).set_cost(*v)?;
            }
        }
        RecordBody::Buffer {
            name,
            item,
            location,
            onhand,
            minimum,
            maximum,
            minimum_calendar,
            maximum_calendar,
            producing_operation,
            infinite,
            procure,
        } => {
            if action == Action::Remove {
                let id = model
                    .find_buffer(name)
                    .ok_or_else(|| anyhow!("unknown buffer '{name}'"))?;
                model.delete_buffer(id)?;
                return Ok(());
            }
            let id = match model.find_buffer(name) {
                Some(id) => {
                    if action == Action::Add {
                        bail!("buffer '{name}' already exists");
                    }
                    id
                }
                None => {
                    if action == Action::Change {
                        bail!("unknown buffer '{name}'");
                    }
                    let buffer = if *infinite {
                        Buffer::infinite(name.clone())
                    } else if let Some(p) = procure {
                        Buffer::procure(
                            name.clone(),
                            ProcurementPolicy {
                                leadtime: Duration::seconds(p.leadtime),
                                fence: Duration::seconds(p.fence),
                                size_minimum: p.size_minimum,
                                size_multiple: p.size_multiple,
                                ..ProcurementPolicy::default()
                            },
                        )
                    } else {
                        Buffer::new(name.clone())
                    };
                    model.add_buffer(buffer)?
                }
            };
            if let Some(i) = item {
                let i = model
                    .find_item(i)
                    .ok_or_else(|| anyhow!("unknown item '{i}'"))?;
                model.buffer_mut(id).item = Some(i);
            }
            if let Some(l) = location {
                let l = model
                    .find_location(l)
                    .ok_or_else(|| anyhow!("unknown location '{l}'"))?;
                model.buffer_mut(id).location = Some(l);
            }
            if let Some(m) = minimum {
                model.set_buffer_minimum(id, *m);
            }
            if let Some(m) = maximum {
                model.set_buffer_maximum(id, *m);
            }
            if let Some(c) = minimum_calendar {
                let c = model
                    .find_calendar(c)
                    .ok_or_else(|| anyhow!("unknown calendar '{c}'"))?;
                model.set_buffer_minimum_calendar(id, Some(c))?;
            }
            if let Some(c) = maximum_calendar {
                let c = model
                    .find_calendar(c)
                    .ok_or_else(|| anyhow!("unknown calendar '{c}'"))?;
                model.set_buffer_maximum_calendar(id, Some(c))?;
            }
            if let Some(op) = producing_operation {
                let op = find_operation(model, op)?;
                model.buffer_mut(id).producing_operation = Some(op);
            }
            if let Some(q) = onhand {
                model.set_buffer_onhand(id, *q)?;
            }
        }
        RecordBody::Resource {
            name,
            location,
            maximum,
            maximum_calendar,
            infinite,
            bucketed,
            setup_matrix,
            setup,
        } => {
            let id = match model.find_resource(name) {
                Some(id) => id,
                None => {
                    let resource = if *infinite {
                        Resource::infinite(name.clone())
                    } else if *bucketed {
                        Resource::bucketed(name.clone())
                    } else {
                        Resource::new(name.clone())
                    };
                    model.add_resource(resource)?
                }
            };
            if let Some(l) = location {
                let l = model
                    .find_location(l)
                    .ok_or_else(|| anyhow!("unknown location '{l}'"))?;
                model.resource_mut(id).location = Some(l);
            }
            if let Some(m) = maximum {
                model.set_resource_maximum(id, *m);
            }
            if let Some(c) = maximum_calendar {
                let c = model
                    .find_calendar(c)
                    .ok_or_else(|| anyhow!("unknown calendar '{c}'"))?;
                model.set_resource_maximum_calendar(id, Some(c))?;
            }
            if let Some(m) = setup_matrix {
                let m = model
                    .find_setup_matrix(m)
                    .ok_or_else(|| anyhow!("unknown setup matrix '{m}'"))?;
                model.resource_mut(id).setup_matrix = Some(m);
            }
            if let Some(s) = setup {
                model.resource_mut(id).setup = s.clone();
            }
        }
        RecordBody::Flow {
            operation,
            buffer,
            kind,
            quantity,
            priority,
            effective_start,
            effective_end,
        } => {
            let op = find_operation(model, operation)?;
            let buf = model
                .find_buffer(buffer)
                .ok_or_else(|| anyhow!("unknown buffer '{buffer}'"))?;
            let mut flow =
                Flow::new(op, buf, *kind, *quantity).effective_in(range(*effective_start, *effective_end));
            if let Some(p) = priority {
                flow.priority = *p;
            }
            model.add_flow(flow)?;
        }
        RecordBody::Load {
            operation,
            resource,
            quantity,
            setup,
            skill,
        } => {
            let op = find_operation(model, operation)?;
            let res = model
                .find_resource(resource)
                .ok_or_else(|| anyhow!("unknown resource '{resource}'"))?;
            let mut load = Load::new(op, res, *quantity);
            if let Some(s) = setup {
                load = load.with_setup(s.clone());
            }
            if let Some(s) = skill {
                let s = model
                    .find_skill(s)
                    .ok_or_else(|| anyhow!("unknown skill '{s}'"))?;
                load = load.with_skill(s);
            }
            model.add_load(load)?;
        }
        RecordBody::ItemSupplier {
            item,
            supplier,
            location,
            leadtime,
            priority,
            cost,
        } => {
            let item = model
                .find_item(item)
                .ok_or_else(|| anyhow!("unknown item '{item}'"))?;
            let supplier = model
                .find_supplier(supplier)
                .ok_or_else(|| anyhow!("unknown supplier '{supplier}'"))?;
            let mut rel = ItemSupplier::new(supplier, item, Duration::seconds(*leadtime));
            if let Some(l) = location {
                rel.location = Some(
                    model
                        .find_location(l)
                        .ok_or_else(|| anyhow!("unknown location '{l}'"))?,
                );
            }
            if let Some(p) = priority {
                rel.priority = *p;
            }
            if let Some(c) = cost {
                rel.cost = *c;
            }
            model.add_item_supplier(rel)?;
        }
        RecordBody::Demand {
            name,
            item,
            customer,
            quantity,
            due,
            priority,
            operation,
            min_shipment,
            max_lateness,
        } => {
            if action == Action::Remove {
                let id = model
                    .find_demand(name)
                    .ok_or_else(|| anyhow!("unknown demand '{name}'"))?;
                model.delete_demand(id)?;
                return Ok(());
            }
            let id = match model.find_demand(name) {
                Some(id) => {
                    if action == Action::Add {
                        bail!("demand '{name}' already exists");
                    }
                    model.demand_mut(id).set_quantity(*quantity)?;
                    model.demand_mut(id).due = *due;
                    id
                }
                None => {
                    if action == Action::Change {
                        bail!("unknown demand '{name}'");
                    }
                    model.add_demand(Demand::new(name.clone(), *quantity, *due))?
                }
            };
            if let Some(i) = item {
                let i = model
                    .find_item(i)
                    .ok_or_else(|| anyhow!("unknown item '{i}'"))?;
                model.demand_mut(id).item = Some(i);
            }
            if let Some(c) = customer {
                let c = model
                    .find_customer(c)
                    .ok_or_else(|| anyhow!("unknown customer '{c}'"))?;
                model.demand_mut(id).customer = Some(c);
            }
            if let Some(p) = priority {
                model.demand_mut(id).priority = *p;
            }
            if let Some(op) = operation {
                let op = find_operation(model, op)?;
                model.demand_mut(id).operation = Some(op);
            }
            if let Some(m) = min_shipment {
                model.demand_mut(id).set_min_shipment(*m)?;
            }
            if let Some(m) = max_lateness {
                model.demand_mut(id).set_max_lateness(Duration::seconds(*m))?;
            }
        }
        RecordBody::OperationPlan {
            operation,
            quantity,
            start,
            end,
            demand,
            locked,
            identifier,
        } => {
            let op = find_operation(model, operation)?;
            let demand = match demand {
                Some(d) => Some(
                    model
                        .find_demand(d)
                        .ok_or_else(|| anyhow!("unknown demand '{d}'"))?,
                ),
                None => None,
            };
            let plan = model.create_operation_plan_ex(
                op,
                *quantity,
                *start,
                *end,
                demand,
                None,
                (*identifier).unwrap_or(0),
                true,
            )?;
            if *locked {
                model.set_locked(plan, true);
            }
            model.activate(plan)?;
        }
    }
    Ok(())
}
