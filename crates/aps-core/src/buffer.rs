//! Buffers: the stock-points of the network, and the flows connecting
//! them to operations.
//!
//! A buffer owns the timeline of all planned material movements on it.
//! Its minimum and maximum inventory targets are either scalars or
//! calendar-driven, materialized as envelope events on that timeline.

use crate::calendar::Calendar;
use crate::dates::{Date, DateRange, DATE_MIN};
use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::operation::{Operation, SearchMode};
use crate::timeline::{EventKind, Timeline};
use crate::{BufferId, CalendarId, FlowId, FlowPlanId, ItemId, LocationId, OperationId};
use crate::problem::Problem;
use chrono::Duration;

/// Default maximum inventory target. Large but portable across
/// platforms, not f64::MAX.
pub const DEFAULT_MAX: f64 = 1e37;

/// Reorder-point policy of a procurement buffer.
#[derive(Debug, Clone)]
pub struct ProcurementPolicy {
    /// Time between placing the order and the delivery.
    pub leadtime: Duration,
    /// Window from the current date in which orders are frozen.
    pub fence: Duration,
    /// Minimum time between replenishments.
    pub min_interval: Duration,
    /// Maximum time between replenishments.
    pub max_interval: Duration,
    pub size_minimum: f64,
    pub size_maximum: f64,
    pub size_multiple: f64,
}

impl Default for ProcurementPolicy {
    fn default() -> Self {
        ProcurementPolicy {
            leadtime: Duration::zero(),
            fence: Duration::zero(),
            min_interval: Duration::zero(),
            max_interval: Duration::zero(),
            size_minimum: 0.0,
            size_maximum: f64::MAX,
            size_multiple: 0.0,
        }
    }
}

/// Buffer behavior.
#[derive(Debug, Clone)]
pub enum BufferKind {
    /// Normal constrained stock-point.
    Default,
    /// Infinite supply; never a constraint, never reports problems.
    Infinite,
    /// Replenished from an external supplier by a reorder-point policy.
    Procure(ProcurementPolicy),
}

/// A stock-point for an item at a location.
#[derive(Debug)]
pub struct Buffer {
    pub name: String,
    pub kind: BufferKind,
    pub description: Option<String>,
    pub item: Option<ItemId>,
    pub location: Option<LocationId>,
    /// Operation used to create extra supply in this buffer. Built
    /// automatically from item-supplier relations when left unset.
    pub producing_operation: Option<OperationId>,
    /// Cost of carrying inventory, as a fraction of the item price per
    /// year and unit.
    pub carrying_cost: f64,
    /// Scalar minimum target; ignored while a minimum calendar is set.
    pub(crate) min_val: f64,
    pub(crate) max_val: f64,
    pub minimum_calendar: Option<CalendarId>,
    pub maximum_calendar: Option<CalendarId>,
    pub flows: Vec<FlowId>,
    /// All planned material movements on this buffer.
    pub(crate) timeline: Timeline<FlowPlanId>,
    /// Operation modeling the initial inventory, if seeded.
    pub(crate) inventory_operation: Option<OperationId>,
    /// Buffers holding reusable tools are skipped by pegging.
    pub tool: bool,
    pub hidden: bool,
    pub problems: Vec<Problem>,
    pub changed: bool,
    pub detect_problems: bool,
    pub(crate) level: i16,
    pub(crate) cluster: u16,
}

impl Buffer {
    pub fn new(name: impl Into<String>) -> Self {
        Buffer {
            name: name.into(),
            kind: BufferKind::Default,
            description: None,
            item: None,
            location: None,
            producing_operation: None,
            carrying_cost: 0.0,
            min_val: 0.0,
            max_val: DEFAULT_MAX,
            minimum_calendar: None,
            maximum_calendar: None,
            flows: Vec::new(),
            timeline: Timeline::new(),
            inventory_operation: None,
            tool: false,
            hidden: false,
            problems: Vec::new(),
            changed: true,
            detect_problems: true,
            level: -1,
            cluster: 0,
        }
    }

    pub fn infinite(name: impl Into<String>) -> Self {
        let mut b = Buffer::new(name);
        b.kind = BufferKind::Infinite;
        b.detect_problems = false;
        b
    }

    pub fn procure(name: impl Into<String>, policy: ProcurementPolicy) -> Self {
        let mut b = Buffer::new(name);
        b.kind = BufferKind::Procure(policy);
        b
    }

    pub fn of(mut self, item: ItemId) -> Self {
        self.item = Some(item);
        self
    }

    pub fn at(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn set_carrying_cost(&mut self, c: f64) -> PlanResult<()> {
        if c < 0.0 {
            return Err(PlanError::data("Buffer carrying_cost must be positive"));
        }
        self.carrying_cost = c;
        Ok(())
    }

    /// The scalar minimum target currently stored.
    pub fn minimum(&self) -> f64 {
        self.min_val
    }

    pub fn maximum(&self) -> f64 {
        self.max_val
    }

    /// The timeline of planned material movements.
    pub fn timeline(&self) -> &Timeline<FlowPlanId> {
        &self.timeline
    }

    pub fn level(&self) -> i16 {
        self.level
    }

    pub fn cluster(&self) -> u16 {
        self.cluster
    }
}

/// When the material event of a flow happens, and whether its quantity
/// scales with the plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum FlowKind {
    /// Proportional event at the plan start.
    #[default]
    Start,
    /// Proportional event at the plan end.
    End,
    /// Fixed quantity at the plan start (e.g. fixed scrap).
    FixedStart,
    /// Fixed quantity at the plan end.
    FixedEnd,
}

impl FlowKind {
    pub fn at_start(&self) -> bool {
        matches!(self, FlowKind::Start | FlowKind::FixedStart)
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self, FlowKind::FixedStart | FlowKind::FixedEnd)
    }
}

/// A material arc between an operation and a buffer. Positive
/// quantities produce into the buffer, negative quantities consume.
#[derive(Debug, Clone)]
pub struct Flow {
    pub operation: OperationId,
    pub buffer: BufferId,
    pub kind: FlowKind,
    /// Material moved per unit of the plan (signed), or the fixed
    /// event quantity for fixed flows.
    pub quantity: f64,
    pub effective: DateRange,
    pub priority: i32,
    pub search: SearchMode,
    /// The flow this one is an alternate of.
    pub alternate: Option<FlowId>,
    /// True when other flows name this one as their alternate.
    pub has_alternates: bool,
}

impl Flow {
    pub fn new(operation: OperationId, buffer: BufferId, kind: FlowKind, quantity: f64) -> Self {
        Flow {
            operation,
            buffer,
            kind,
            quantity,
            effective: DateRange::default(),
            priority: 1,
            search: SearchMode::Priority,
            alternate: None,
            has_alternates: false,
        }
    }

    pub fn effective_in(mut self, range: DateRange) -> Self {
        self.effective = range;
        self
    }

    pub fn is_consumer(&self) -> bool {
        self.quantity < 0.0
    }

    pub fn is_producer(&self) -> bool {
        self.quantity >= 0.0
    }
}

impl Model {
    /// Register a buffer. Its maximum envelope starts at the default
    /// ceiling so only an explicitly lowered maximum reports excess.
    pub fn add_buffer(&mut self, buffer: Buffer) -> PlanResult<BufferId> {
        let seed_max = buffer.maximum_calendar.is_none();
        let max = buffer.max_val;
        let id = BufferId::new(self.buffers.insert(buffer, "Buffer")?);
        if seed_max {
            self.buffer_mut(id).timeline.insert(DATE_MIN, EventKind::Max, max);
        }
        self.mark_structure_changed();
        Ok(id)
    }

    /// Register a flow on both its operation and its buffer. A second
    /// flow between the same pair with an overlapping effectivity
    /// window is rejected.
    pub fn add_flow(&mut self, flow: Flow) -> PlanResult<FlowId> {
        if self.operations.get(flow.operation.value()).is_none() {
            return Err(PlanError::data("Flow references an unknown operation"));
        }
        if self.buffers.get(flow.buffer.value()).is_none() {
            return Err(PlanError::data("Flow references an unknown buffer"));
        }
        for existing in &self.operation(flow.operation).flows {
            let e = self.flow(*existing);
            if e.buffer == flow.buffer && e.effective.overlaps(&flow.effective) {
                return Err(PlanError::data(format!(
                    "Operation '{}' already has a flow to buffer '{}' in that period",
                    self.operation(flow.operation).name,
                    self.buffer(flow.buffer).name
                )));
            }
        }
        let operation = flow.operation;
        let buffer = flow.buffer;
        let id = FlowId::new(self.flows.insert(flow));
        self.operation_mut(operation).flows.push(id);
        self.operation_mut(operation).changed = true;
        self.buffer_mut(buffer).flows.push(id);
        self.buffer_mut(buffer).changed = true;
        self.mark_structure_changed();
        Ok(id)
    }

    /// Declare one flow the alternate of another. Both must belong to
    /// the same operation.
    pub fn set_flow_alternate(&mut self, flow: FlowId, primary: FlowId) -> PlanResult<()> {
        if self.flow(flow).operation != self.flow(primary).operation {
            return Err(PlanError::data(
                "Flow and its alternate must belong to the same operation",
            ));
        }
        self.flows[flow.value()].alternate = Some(primary);
        self.flows[primary.value()].has_alternates = true;
        Ok(())
    }

    /// Declare one load the alternate of another.
    pub fn set_load_alternate(&mut self, load: crate::LoadId, primary: crate::LoadId) -> PlanResult<()> {
        if self.load(load).operation != self.load(primary).operation {
            return Err(PlanError::data(
                "Load and its alternate must belong to the same operation",
            ));
        }
        self.loads[load.value()].alternate = Some(primary);
        self.loads[primary.value()].has_alternates = true;
        Ok(())
    }

    // =========================================================================
    // Inventory targets
    // =========================================================================

    /// Update the scalar minimum target. With a minimum calendar in
    /// place only the stored field changes; otherwise the single
    /// envelope event at the start of the horizon is created or moved.
    pub fn set_buffer_minimum(&mut self, buffer: BufferId, m: f64) {
        let b = self.buffer_mut(buffer);
        b.min_val = m;
        if b.minimum_calendar.is_some() {
            return;
        }
        b.changed = true;
        if let Some((key, _)) = b.timeline.last_min() {
            b.timeline.update(key, m, key.date);
        } else {
            b.timeline.insert(DATE_MIN, EventKind::Min, m);
        }
        self.state.any_change = true;
    }

    pub fn set_buffer_maximum(&mut self, buffer: BufferId, m: f64) {
        let b = self.buffer_mut(buffer);
        b.max_val = m;
        if b.maximum_calendar.is_some() {
            return;
        }
        b.changed = true;
        if let Some((key, _)) = b.timeline.last_max() {
            b.timeline.update(key, m, key.date);
        } else {
            b.timeline.insert(DATE_MIN, EventKind::Max, m);
        }
        self.state.any_change = true;
    }

    /// Drive the minimum target from a calendar: one envelope event per
    /// value change. Passing None reverts to the scalar target.
    pub fn set_buffer_minimum_calendar(
        &mut self,
        buffer: BufferId,
        cal: Option<CalendarId>,
    ) -> PlanResult<()> {
        if self.buffer(buffer).minimum_calendar == cal {
            return Ok(());
        }
        let events = match cal {
            Some(c) => Some(self.calendar(c).change_events()?),
            None => None,
        };
        let b = self.buffer_mut(buffer);
        b.changed = true;
        b.timeline.clear_envelope(true);
        b.minimum_calendar = cal;
        match events {
            Some(events) => {
                for (d, v) in events {
                    b.timeline.insert(d, EventKind::Min, v);
                }
            }
            None => {
                let m = b.min_val;
                self.set_buffer_minimum(buffer, m);
            }
        }
        self.state.any_change = true;
        Ok(())
    }

    pub fn set_buffer_maximum_calendar(
        &mut self,
        buffer: BufferId,
        cal: Option<CalendarId>,
    ) -> PlanResult<()> {
        if self.buffer(buffer).maximum_calendar == cal {
            return Ok(());
        }
        let events = match cal {
            Some(c) => Some(self.calendar(c).change_events()?),
            None => None,
        };
        let b = self.buffer_mut(buffer);
        b.changed = true;
        b.timeline.clear_envelope(false);
        b.maximum_calendar = cal;
        match events {
            Some(events) => {
                for (d, v) in events {
                    b.timeline.insert(d, EventKind::Max, v);
                }
            }
            None => {
                let m = b.max_val;
                self.set_buffer_maximum(buffer, m);
            }
        }
        self.state.any_change = true;
        Ok(())
    }

    // =========================================================================
    // On-hand queries and seeding
    // =========================================================================

    /// The on-hand immediately after the given date.
    pub fn buffer_onhand(&self, buffer: BufferId, d: Date) -> f64 {
        self.buffer(buffer).timeline.onhand_at(d)
    }

    /// Minimum (or maximum) on-hand over an inclusive date range.
    pub fn buffer_onhand_range(&self, buffer: BufferId, d1: Date, d2: Date, min: bool) -> f64 {
        let (d1, d2) = if d2 < d1 { (d2, d1) } else { (d1, d2) };
        let tl = &self.buffer(buffer).timeline;
        // Value entering the range.
        let mut record = if d1 > DATE_MIN {
            tl.onhand_at(d1 - Duration::seconds(1))
        } else {
            0.0
        };
        for (key, ev) in tl.iter() {
            if key.date < d1 {
                continue;
            }
            if key.date > d2 {
                break;
            }
            let v = ev.onhand();
            if (min && v < record) || (!min && v > record) {
                record = v;
            }
        }
        record
    }

    /// Seed the initial inventory of a buffer. The stock is modeled as
    /// a locked plan of a hidden fixed-time operation with a unit flow
    /// at its end, so that it participates in the timeline like any
    /// other event.
    pub fn set_buffer_onhand(&mut self, buffer: BufferId, quantity: f64) -> PlanResult<()> {
        let inv_op = match self.buffer(buffer).inventory_operation {
            Some(op) => op,
            None => {
                let name = format!("Inventory {}", self.buffer(buffer).name);
                let mut op = Operation::fixed_time(name, Duration::zero());
                op.hidden = true;
                op.detect_problems = false;
                op.size_minimum = 0.0;
                let op = self.add_operation(op)?;
                self.add_flow(Flow::new(op, buffer, FlowKind::End, 1.0))?;
                self.buffer_mut(buffer).inventory_operation = Some(op);
                op
            }
        };

        // Keep the sign of the unit flow aligned with the stock.
        let flow = self.operation(inv_op).flows[0];
        self.flows[flow.value()].quantity = if quantity >= 0.0 { 1.0 } else { -1.0 };

        match self.operation(inv_op).first_plan {
            None => {
                let plan = self.create_operation_plan_ex(
                    inv_op,
                    quantity.abs(),
                    Some(DATE_MIN),
                    Some(DATE_MIN),
                    None,
                    None,
                    0,
                    true,
                )?;
                self.set_locked(plan, true);
                self.activate(plan)?;
            }
            Some(plan) => {
                self.set_locked(plan, false);
                self.set_quantity(plan, quantity.abs())?;
                self.set_locked(plan, true);
            }
        }
        self.buffer_mut(buffer).changed = true;
        self.state.any_change = true;
        Ok(())
    }

    /// Pick or build the operation that replenishes the buffer.
    ///
    /// Procurement buffers get a fixed-time purchase operation driven
    /// by their policy. Other buffers derive an item-supplier purchase
    /// operation from the relations of their item (walking up the item
    /// hierarchy), preferring lower priority numbers.
    pub fn build_producing_operation(&mut self, buffer: BufferId) -> PlanResult<Option<OperationId>> {
        if let Some(op) = self.buffer(buffer).producing_operation {
            return Ok(Some(op));
        }
        if let BufferKind::Procure(policy) = self.buffer(buffer).kind.clone() {
            let name = format!("Procure {}", self.buffer(buffer).name);
            let mut op = Operation::fixed_time(name, policy.leadtime);
            op.fence = policy.fence;
            op.size_minimum = policy.size_minimum;
            op.size_maximum = policy.size_maximum;
            op.size_multiple = policy.size_multiple;
            op.hidden = true;
            op.location = self.buffer(buffer).location;
            let op = self.add_operation(op)?;
            self.add_flow(Flow::new(op, buffer, FlowKind::End, 1.0))?;
            self.buffer_mut(buffer).producing_operation = Some(op);
            return Ok(Some(op));
        }

        // Collect candidate item-supplier relations for the buffer item
        // or any of its owners.
        let Some(mut item) = self.buffer(buffer).item else {
            return Ok(None);
        };
        let location = self.buffer(buffer).location;
        let mut candidate: Option<usize> = None;
        loop {
            for (i, rel) in self.item_suppliers.iter().enumerate() {
                if rel.item != item {
                    continue;
                }
                if rel.location.is_some() && rel.location != location {
                    continue;
                }
                if candidate.map_or(true, |c| rel.priority < self.item_suppliers[c].priority) {
                    candidate = Some(i);
                }
            }
            if candidate.is_some() {
                break;
            }
            match self.item(item).owner {
                Some(owner) => item = owner,
                None => break,
            }
        }
        let Some(c) = candidate else {
            return Ok(None);
        };
        let rel = self.item_suppliers[c].clone();
        let name = format!(
            "Purchase {} from {}",
            self.buffer(buffer).name,
            self.supplier(rel.supplier).name
        );
        let mut op = Operation::item_supplier(name, rel.supplier, rel.leadtime);
        op.size_minimum = rel.size_minimum;
        op.size_multiple = rel.size_multiple;
        op.cost = rel.cost;
        op.hidden = true;
        op.location = location;
        let op = self.add_operation(op)?;
        self.add_flow(Flow::new(op, buffer, FlowKind::End, 1.0).effective_in(rel.effective))?;
        self.buffer_mut(buffer).producing_operation = Some(op);
        Ok(Some(op))
    }

    // =========================================================================
    // Procurement policy updates
    // =========================================================================

    /// The inventory level triggering a replenishment of a procurement
    /// buffer: the minimum envelope at the end of the horizon.
    pub fn procurement_minimum_inventory(&self, buffer: BufferId) -> f64 {
        self.buffer(buffer).timeline.min_at(crate::DATE_MAX)
    }

    pub fn procurement_maximum_inventory(&self, buffer: BufferId) -> f64 {
        self.buffer(buffer).timeline.max_at(crate::DATE_MAX)
    }

    /// Update the reorder point. Raising it above the replenishment
    /// target pulls the target up along with it.
    pub fn set_procurement_minimum_inventory(&mut self, buffer: BufferId, f: f64) -> PlanResult<()> {
        if f < 0.0 {
            return Err(PlanError::data(
                "Procurement buffer can't have a negative minimum inventory",
            ));
        }
        self.set_buffer_minimum(buffer, f);
        if self.procurement_maximum_inventory(buffer) < f {
            self.set_procurement_maximum_inventory(buffer, f)?;
        }
        Ok(())
    }

    /// Update the replenishment target. Lowering it below the reorder
    /// point pushes the reorder point down along with it.
    pub fn set_procurement_maximum_inventory(&mut self, buffer: BufferId, f: f64) -> PlanResult<()> {
        if f < 0.0 {
            return Err(PlanError::data(
                "Procurement buffer can't have a negative maximum inventory",
            ));
        }
        self.set_buffer_maximum(buffer, f);
        if f < self.procurement_minimum_inventory(buffer) {
            self.set_procurement_minimum_inventory(buffer, f)?;
        }
        Ok(())
    }

    /// Update the minimum time between replenishments; the maximum
    /// interval follows when it would fall below the new minimum.
    pub fn set_procurement_min_interval(&mut self, buffer: BufferId, d: Duration) -> PlanResult<()> {
        if d < Duration::zero() {
            return Err(PlanError::data(
                "Procurement buffer can't have a negative minimum interval",
            ));
        }
        let BufferKind::Procure(policy) = &mut self.buffer_mut(buffer).kind else {
            return Err(PlanError::data("Not a procurement buffer"));
        };
        policy.min_interval = d;
        if policy.max_interval > Duration::zero() && policy.max_interval < policy.min_interval {
            policy.max_interval = policy.min_interval;
        }
        Ok(())
    }

    pub fn set_procurement_max_interval(&mut self, buffer: BufferId, d: Duration) -> PlanResult<()> {
        if d < Duration::zero() {
            return Err(PlanError::data(
                "Procurement buffer can't have a negative maximum interval",
            ));
        }
        let BufferKind::Procure(policy) = &mut self.buffer_mut(buffer).kind else {
            return Err(PlanError::data("Not a procurement buffer"));
        };
        policy.max_interval = d;
        if policy.min_interval > Duration::zero() && policy.max_interval < policy.min_interval {
            policy.min_interval = policy.max_interval;
        }
        Ok(())
    }

    /// Update the replenishment sizing; the values propagate to the
    /// purchase operation so new plans follow them.
    pub fn set_procurement_sizes(
        &mut self,
        buffer: BufferId,
        minimum: f64,
        multiple: f64,
        maximum: f64,
    ) -> PlanResult<()> {
        if minimum < 0.0 || multiple < 0.0 || maximum < 0.0 {
            return Err(PlanError::data(
                "Procurement buffer can't have a negative size",
            ));
        }
        let maximum = if maximum < minimum { minimum } else { maximum };
        {
            let BufferKind::Procure(policy) = &mut self.buffer_mut(buffer).kind else {
                return Err(PlanError::data("Not a procurement buffer"));
            };
            policy.size_minimum = minimum;
            policy.size_multiple = multiple;
            policy.size_maximum = maximum;
        }
        if let Some(op) = self.buffer(buffer).producing_operation {
            let o = self.operation_mut(op);
            o.set_size_minimum(minimum)?;
            o.set_size_multiple(multiple)?;
            if maximum > 0.0 {
                o.set_size_maximum(maximum)?;
            }
        }
        Ok(())
    }

    /// Remove a buffer together with every flow, flow plan and
    /// auto-built replenishment operation referring to it.
    pub fn delete_buffer(&mut self, buffer: BufferId) -> PlanResult<()> {
        if self.buffers.get(buffer.value()).is_none() {
            return Err(PlanError::data("Unknown buffer"));
        }

        // Destroy the plans of every operation flowing to the buffer:
        // their remaining flowplans on other buffers would otherwise
        // describe executions that can no longer happen.
        let flow_ids: Vec<FlowId> = self.buffer(buffer).flows.clone();
        let mut op_ids: Vec<OperationId> = Vec::new();
        for f in &flow_ids {
            let op = self.flow(*f).operation;
            if !op_ids.contains(&op) {
                op_ids.push(op);
            }
        }
        for op in &op_ids {
            self.delete_operation_plans(*op, true);
        }

        // Unlink the flows from their operations and drop them.
        for f in flow_ids {
            let op = self.flow(f).operation;
            self.operation_mut(op).flows.retain(|x| *x != f);
            self.operation_mut(op).changed = true;
            self.flows.remove(f.value());
        }

        // Auto-built replenishment and inventory operations only serve
        // this buffer; remove them entirely.
        let b = &self.buffers[buffer.value()];
        let mut owned_ops: Vec<OperationId> = Vec::new();
        if let Some(op) = b.producing_operation {
            if self.operation(op).hidden {
                owned_ops.push(op);
            }
        }
        if let Some(op) = b.inventory_operation {
            owned_ops.push(op);
        }
        for op in owned_ops {
            self.delete_operation(op)?;
        }

        self.buffers.remove(buffer.value());
        self.mark_structure_changed();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::date;

    #[test]
    fn test_duplicate_flow_rejected() {
        let mut model = Model::new();
        let op = model
            .add_operation(Operation::fixed_time("A", Duration::days(1)))
            .unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(op, buf, FlowKind::End, 1.0)).unwrap();
        let err = model
            .add_flow(Flow::new(op, buf, FlowKind::Start, -1.0))
            .unwrap_err();
        assert!(matches!(err, PlanError::Data(_)));
    }

    #[test]
    fn test_non_overlapping_flows_allowed() {
        let mut model = Model::new();
        let op = model
            .add_operation(Operation::fixed_time("A", Duration::days(1)))
            .unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        let split = date(2024, 6, 1, 0, 0, 0);
        model
            .add_flow(
                Flow::new(op, buf, FlowKind::End, 1.0)
                    .effective_in(DateRange::new(DATE_MIN, split)),
            )
            .unwrap();
        model
            .add_flow(
                Flow::new(op, buf, FlowKind::End, 2.0)
                    .effective_in(DateRange::new(split, crate::DATE_MAX)),
            )
            .unwrap();
        assert_eq!(model.buffer(buf).flows.len(), 2);
    }

    #[test]
    fn test_scalar_minimum_creates_envelope_event() {
        let mut model = Model::new();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.set_buffer_minimum(buf, 5.0);
        assert_eq!(model.buffer(buf).timeline.min_at(date(2024, 1, 1, 0, 0, 0)), 5.0);
        // Updating moves the same event rather than stacking a second one:
        // one minimum plus the seeded maximum envelope.
        model.set_buffer_minimum(buf, 7.0);
        assert_eq!(model.buffer(buf).timeline.min_at(date(2024, 1, 1, 0, 0, 0)), 7.0);
        assert_eq!(model.buffer(buf).timeline.len(), 2);
    }

    #[test]
    fn test_minimum_calendar_materializes_events() {
        let mut model = Model::new();
        let mut cal = Calendar::new("safety", 0.0);
        cal.set_value(date(2024, 2, 1, 0, 0, 0), date(2024, 3, 1, 0, 0, 0), 10.0)
            .unwrap();
        let cal = model.add_calendar(cal).unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.set_buffer_minimum_calendar(buf, Some(cal)).unwrap();

        let tl = model.buffer(buf).timeline();
        assert_eq!(tl.min_at(date(2024, 1, 15, 0, 0, 0)), 0.0);
        assert_eq!(tl.min_at(date(2024, 2, 15, 0, 0, 0)), 10.0);
        assert_eq!(tl.min_at(date(2024, 3, 15, 0, 0, 0)), 0.0);
    }

    #[test]
    fn test_flow_alternate_same_operation_only() {
        let mut model = Model::new();
        let op1 = model
            .add_operation(Operation::fixed_time("A", Duration::days(1)))
            .unwrap();
        let op2 = model
            .add_operation(Operation::fixed_time("B", Duration::days(1)))
            .unwrap();
        let b1 = model.add_buffer(Buffer::new("B1")).unwrap();
        let b2 = model.add_buffer(Buffer::new("B2")).unwrap();
        let f1 = model.add_flow(Flow::new(op1, b1, FlowKind::End, 1.0)).unwrap();
        let f2 = model.add_flow(Flow::new(op2, b2, FlowKind::End, 1.0)).unwrap();
        assert!(model.set_flow_alternate(f2, f1).is_err());

        let f3 = model.add_flow(Flow::new(op1, b2, FlowKind::End, 1.0)).unwrap();
        model.set_flow_alternate(f3, f1).unwrap();
        assert!(model.flow(f1).has_alternates);
        assert_eq!(model.flow(f3).alternate, Some(f1));
    }
}
