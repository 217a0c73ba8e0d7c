//! Plan output snapshots.
//!
//! The serializer chooses the depth: `Base` renders the structural
//! model only, `Plan` adds the operation plans and problems, and
//! `PlanDetail` additionally walks the pegging per demand.

use aps_core::{Model, PeggingIterator, Problem};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// How much of the plan a snapshot carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportDepth {
    /// Structural entities only.
    Base,
    /// Structure plus operation plans and problems.
    #[default]
    Plan,
    /// Everything, including per-demand pegging.
    PlanDetail,
}

#[derive(Debug, Serialize)]
pub struct ItemExport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub price: f64,
}

#[derive(Debug, Serialize)]
pub struct OperationExport {
    pub name: String,
    pub shape: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub size_minimum: f64,
    pub size_multiple: f64,
    pub level: i16,
    pub cluster: u16,
}

#[derive(Debug, Serialize)]
pub struct BufferExport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub onhand_now: f64,
    pub level: i16,
    pub cluster: u16,
}

#[derive(Debug, Serialize)]
pub struct ResourceExport {
    pub name: String,
    pub maximum: f64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub setup: String,
    pub level: i16,
    pub cluster: u16,
}

#[derive(Debug, Serialize)]
pub struct DemandExport {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item: Option<String>,
    pub quantity: f64,
    pub due: DateTime<Utc>,
    pub planned_quantity: f64,
}

#[derive(Debug, Serialize)]
pub struct OperationPlanExport {
    pub identifier: u64,
    pub operation: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub quantity: f64,
    pub locked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demand: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PeggingExport {
    pub demand: String,
    pub entries: Vec<PeggingEntryExport>,
}

#[derive(Debug, Serialize)]
pub struct PeggingEntryExport {
    pub operation: String,
    pub plan_identifier: u64,
    pub quantity: f64,
    pub level: u32,
}

/// A serializable picture of the model at a chosen depth.
#[derive(Debug, Serialize)]
pub struct PlanSnapshot {
    pub name: String,
    pub current: DateTime<Utc>,
    pub items: Vec<ItemExport>,
    pub operations: Vec<OperationExport>,
    pub buffers: Vec<BufferExport>,
    pub resources: Vec<ResourceExport>,
    pub demands: Vec<DemandExport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub operation_plans: Vec<OperationPlanExport>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub problems: Vec<Problem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pegging: Vec<PeggingExport>,
}

impl PlanSnapshot {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }
}

fn shape_name(op: &aps_core::Operation) -> &'static str {
    use aps_core::OperationKind::*;
    match op.kind {
        FixedTime { .. } => "fixed_time",
        TimePer { .. } => "time_per",
        Routing { .. } => "routing",
        Alternate { .. } => "alternate",
        Split { .. } => "split",
        Setup => "setup",
        ItemSupplier { .. } => "item_supplier",
    }
}

/// Build a snapshot of the model. Problems are recomputed first so the
/// exported lists are current; hidden entities stay out of the output.
pub fn snapshot(model: &mut Model, depth: ExportDepth) -> PlanSnapshot {
    if !matches!(depth, ExportDepth::Base) {
        model.compute_problems();
    }
    // Touching the counters refreshes the lazy level computation.
    model.number_of_levels();

    let items = model
        .items()
        .filter(|(_, i)| !i.hidden)
        .map(|(_, i)| ItemExport {
            name: i.name.clone(),
            description: i.description.clone(),
            price: i.price,
        })
        .collect();

    let operations = model
        .operations()
        .filter(|(_, o)| !o.hidden)
        .map(|(_, o)| OperationExport {
            name: o.name.clone(),
            shape: shape_name(o).to_string(),
            location: o.location.map(|l| model.location(l).name.clone()),
            size_minimum: o.size_minimum,
            size_multiple: o.size_multiple,
            level: o.level(),
            cluster: o.cluster(),
        })
        .collect();

    let buffers = model
        .buffers()
        .filter(|(_, b)| !b.hidden)
        .map(|(id, b)| BufferExport {
            name: b.name.clone(),
            item: b.item.map(|i| model.item(i).name.clone()),
            location: b.location.map(|l| model.location(l).name.clone()),
            onhand_now: model.buffer_onhand(id, model.plan.current()),
            level: b.level(),
            cluster: b.cluster(),
        })
        .collect();

    let resources = model
        .resources()
        .filter(|(_, r)| !r.hidden)
        .map(|(_, r)| ResourceExport {
            name: r.name.clone(),
            maximum: r.maximum(),
            setup: r.setup.clone(),
            level: r.level(),
            cluster: r.cluster(),
        })
        .collect();

    let demands = model
        .demands()
        .filter(|(_, d)| !d.hidden)
        .map(|(id, d)| DemandExport {
            name: d.name.clone(),
            item: d.item.map(|i| model.item(i).name.clone()),
            quantity: d.quantity,
            due: d.due,
            planned_quantity: model.demand_planned_quantity(id),
        })
        .collect();

    let mut operation_plans = Vec::new();
    let mut problems = Vec::new();
    let mut pegging = Vec::new();

    if !matches!(depth, ExportDepth::Base) {
        for (_, p) in model.operation_plans() {
            let op = model.operation(p.operation);
            if op.hidden {
                continue;
            }
            operation_plans.push(OperationPlanExport {
                identifier: p.identifier(),
                operation: op.name.clone(),
                start: p.start,
                end: p.end,
                quantity: p.quantity,
                locked: p.locked,
                demand: p.demand.map(|d| model.demand(d).name.clone()),
            });
        }
        operation_plans.sort_by_key(|p| (p.start, p.identifier));
        problems = model.problems().cloned().collect();
    }

    if matches!(depth, ExportDepth::PlanDetail) {
        let demand_ids: Vec<_> = model.demands().map(|(id, _)| id).collect();
        for id in demand_ids {
            let entries: Vec<PeggingEntryExport> = PeggingIterator::for_demand(model, id)
                .map(|e| {
                    let p = model.operation_plan(e.plan);
                    PeggingEntryExport {
                        operation: model.operation(p.operation).name.clone(),
                        plan_identifier: p.identifier(),
                        quantity: e.quantity,
                        level: e.level,
                    }
                })
                .collect();
            if !entries.is_empty() {
                pegging.push(PeggingExport {
                    demand: model.demand(id).name.clone(),
                    entries,
                });
            }
        }
    }

    PlanSnapshot {
        name: model.plan.name.clone(),
        current: model.plan.current(),
        items,
        operations,
        buffers,
        resources,
        demands,
        operation_plans,
        problems,
        pegging,
    }
}
