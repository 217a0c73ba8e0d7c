//! Operation plans: the dynamic execution units of the plan.
//!
//! A plan is created unactivated, optionally grows its flow and load
//! plans, and joins the model on activation: it receives an external
//! identifier, enters the sorted plan list of its operation and
//! registers itself as a delivery with its demand. Mutations go
//! through the parameter setters, which enforce each operation
//! variant's shape contract. Destruction drops every flow and load
//! plan from the timelines.

use crate::dates::{Date, DATE_MAX, DATE_MIN};
use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::operation::{sub_dur, Operation, OperationKind, PlanParameters};
use crate::problem::Problem;
use crate::{
    DemandId, FlowPlanId, LoadId, LoadPlanId, OperationId, PlanId, ROUNDING_ERROR,
};
use chrono::Duration;

/// A single scheduled execution of an operation.
#[derive(Debug)]
pub struct OperationPlan {
    pub operation: OperationId,
    /// External identifier; 0 until assigned on activation.
    pub(crate) identifier: u64,
    pub start: Date,
    pub end: Date,
    pub quantity: f64,
    /// Set on delivery plans only.
    pub demand: Option<DemandId>,
    /// Owning plan for routing/alternate/split children.
    pub owner: Option<PlanId>,
    pub(crate) prev: Option<PlanId>,
    pub(crate) next: Option<PlanId>,
    pub(crate) prev_sibling: Option<PlanId>,
    pub(crate) next_sibling: Option<PlanId>,
    pub(crate) first_child: Option<PlanId>,
    pub(crate) last_child: Option<PlanId>,
    /// A locked plan is never moved or resized.
    pub locked: bool,
    /// Material/capacity switches, meaningful on locked plans.
    pub consume_material: bool,
    pub produce_material: bool,
    pub consume_capacity: bool,
    /// This plan is a setup changeover.
    pub is_setup: bool,
    /// This plan owns a setup changeover child.
    pub has_setup: bool,
    pub(crate) flowplans: Vec<FlowPlanId>,
    pub(crate) loadplans: Vec<LoadPlanId>,
    pub(crate) in_operation_list: bool,
    pub problems: Vec<Problem>,
}

impl OperationPlan {
    fn raw(operation: OperationId, start: Date, end: Date) -> Self {
        OperationPlan {
            operation,
            identifier: 0,
            start,
            end,
            quantity: 0.0,
            demand: None,
            owner: None,
            prev: None,
            next: None,
            prev_sibling: None,
            next_sibling: None,
            first_child: None,
            last_child: None,
            locked: false,
            consume_material: true,
            produce_material: true,
            consume_capacity: true,
            is_setup: false,
            has_setup: false,
            flowplans: Vec::new(),
            loadplans: Vec::new(),
            in_operation_list: false,
            problems: Vec::new(),
        }
    }

    /// External identifier, 0 while the plan is not activated.
    pub fn identifier(&self) -> u64 {
        self.identifier
    }

    pub fn flowplans(&self) -> &[FlowPlanId] {
        &self.flowplans
    }

    pub fn loadplans(&self) -> &[LoadPlanId] {
        &self.loadplans
    }

    /// Whether this plan sorts before another in the per-operation
    /// list: start ascending, then quantity descending.
    fn sorts_before(&self, other: &OperationPlan) -> bool {
        self.start < other.start
            || (self.start == other.start && self.quantity > other.quantity)
    }
}

impl Model {
    // =========================================================================
    // Creation and lifecycle
    // =========================================================================

    /// Factory for a new, unactivated plan with flow and load plans.
    pub fn create_operation_plan(
        &mut self,
        operation: OperationId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
    ) -> PlanResult<PlanId> {
        self.create_operation_plan_ex(operation, quantity, start, end, None, None, 0, true)
    }

    /// Factory for a delivery plan of a demand.
    pub fn create_delivery_plan(
        &mut self,
        operation: OperationId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        demand: DemandId,
    ) -> PlanResult<PlanId> {
        self.create_operation_plan_ex(operation, quantity, start, end, Some(demand), None, 0, true)
    }

    /// Full plan factory. The demand link is stored now but registered
    /// with the demand only on activation; the identifier stays 0
    /// unless explicitly supplied by a loader.
    #[allow(clippy::too_many_arguments)]
    pub fn create_operation_plan_ex(
        &mut self,
        operation: OperationId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        demand: Option<DemandId>,
        owner: Option<PlanId>,
        identifier: u64,
        make_flowloads: bool,
    ) -> PlanResult<PlanId> {
        if quantity < 0.0 {
            return Err(PlanError::data("Operationplan quantity must be positive"));
        }
        if self.operations.get(operation.value()).is_none() {
            return Err(PlanError::data("Unknown operation"));
        }
        let anchor = self.plan.current;
        let plan = PlanId::new(self.plans.insert(OperationPlan::raw(operation, anchor, anchor)));
        self.plan_mut(plan).demand = demand;
        self.plan_mut(plan).identifier = identifier;
        if matches!(self.operation(operation).kind, OperationKind::Setup) {
            self.plan_mut(plan).is_setup = true;
        }
        if let Some(ow) = owner {
            self.set_plan_owner(plan, ow)?;
        }
        self.set_operation_plan_parameters(plan, quantity, start, end, true, true)?;
        if make_flowloads {
            self.create_flow_loads(plan)?;
        }
        self.update_plan(plan);
        Ok(plan)
    }

    /// Officially register the plan. Runs the operation's extra
    /// instantiation logic (which may consolidate or deny the plan),
    /// assigns the external identifier, makes flow and load plans if
    /// missing, joins the operation lists and registers the delivery
    /// with the demand. Returns false when the plan was denied and
    /// destroyed.
    pub fn activate(&mut self, plan: PlanId) -> PlanResult<bool> {
        if !self.extra_instantiate(plan)? {
            self.destroy_plan(plan);
            return Ok(false);
        }
        if self.operation_plan(plan).identifier == 0 {
            let id = self.next_plan_identifier();
            self.plan_mut(plan).identifier = id;
        }
        if self.operation_plan(plan).flowplans.is_empty()
            && self.operation_plan(plan).loadplans.is_empty()
        {
            self.create_flow_loads(plan)?;
        }
        self.insert_in_operation_list(plan);
        for child in self.descendant_plans(plan) {
            if self.operation_plan(child).identifier == 0 {
                let id = self.next_plan_identifier();
                self.plan_mut(child).identifier = id;
            }
            self.insert_in_operation_list(child);
        }
        if let Some(d) = self.operation_plan(plan).demand {
            self.add_delivery(d, plan);
        }
        let op = self.operation_plan(plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
        Ok(true)
    }

    /// Remove the plan from the official lists. Its flow and load
    /// plans stay on the timelines.
    pub fn deactivate(&mut self, plan: PlanId) {
        self.remove_from_operation_list(plan);
        if let Some(d) = self.operation_plan(plan).demand {
            self.remove_delivery(d, plan);
        }
        let op = self.operation_plan(plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
    }

    /// Destroy a plan and its children, dropping every flow and load
    /// plan from the timelines.
    pub fn destroy_plan(&mut self, plan: PlanId) {
        for child in self.child_plans(plan) {
            self.destroy_plan(child);
        }
        self.delete_flow_loads(plan);
        self.remove_from_operation_list(plan);
        if let Some(d) = self.operation_plan(plan).demand {
            self.remove_delivery(d, plan);
        }
        if let Some(owner) = self.operation_plan(plan).owner {
            self.unlink_child(owner, plan);
        }
        let op = self.operation_plan(plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
        self.plans.remove(plan.value());
    }

    /// Delete all plans of an operation, locked ones only on request.
    pub fn delete_operation_plans(&mut self, operation: OperationId, delete_locked: bool) {
        loop {
            let mut cursor = self.operation(operation).first_plan;
            let mut candidate = None;
            while let Some(p) = cursor {
                if delete_locked || !self.operation_plan(p).locked {
                    candidate = Some(p);
                    break;
                }
                cursor = self.operation_plan(p).next;
            }
            match candidate {
                Some(p) => {
                    // Destroy the whole owner hierarchy the plan is in.
                    let mut top = p;
                    while let Some(o) = self.operation_plan(top).owner {
                        top = o;
                    }
                    self.destroy_plan(top);
                }
                None => break,
            }
        }
        self.operation_mut(operation).changed = true;
        self.state.any_change = true;
    }

    /// Remove an operation from the model: its plans, flows, loads and
    /// every reference to it.
    pub fn delete_operation(&mut self, operation: OperationId) -> PlanResult<()> {
        if self.operations.get(operation.value()).is_none() {
            return Err(PlanError::data("Unknown operation"));
        }
        self.delete_operation_plans(operation, true);
        for f in self.operation(operation).flows.clone() {
            let buffer = self.flow(f).buffer;
            self.buffer_mut(buffer).flows.retain(|x| *x != f);
            self.buffer_mut(buffer).changed = true;
            self.flows.remove(f.value());
        }
        for l in self.operation(operation).loads.clone() {
            let resource = self.load(l).resource;
            self.resource_mut(resource).loads.retain(|x| *x != l);
            self.resource_mut(resource).changed = true;
            self.loads.remove(l.value());
        }
        // Unlink from super- and sub-operations.
        for sup in self.operation(operation).super_operations.clone() {
            let op = self.operation_mut(sup);
            match &mut op.kind {
                OperationKind::Routing { steps } => steps.retain(|s| *s != operation),
                OperationKind::Alternate { alternates, .. } => {
                    alternates.retain(|a| a.operation != operation)
                }
                OperationKind::Split { members } => members.retain(|m| m.operation != operation),
                _ => {}
            }
            op.changed = true;
        }
        let subs: Vec<OperationId> = match &self.operation(operation).kind {
            OperationKind::Routing { steps } => steps.clone(),
            OperationKind::Alternate { alternates, .. } => {
                alternates.iter().map(|a| a.operation).collect()
            }
            OperationKind::Split { members } => members.iter().map(|m| m.operation).collect(),
            _ => Vec::new(),
        };
        for sub in subs {
            self.operation_mut(sub)
                .super_operations
                .retain(|s| *s != operation);
        }
        // Clear dangling references from items, demands and buffers.
        for (_, item) in self.items.iter_mut() {
            if item.delivery_operation == Some(operation) {
                item.delivery_operation = None;
            }
        }
        for (_, demand) in self.demands.iter_mut() {
            if demand.operation == Some(operation) {
                demand.operation = None;
                demand.changed = true;
            }
        }
        for (_, buffer) in self.buffers.iter_mut() {
            if buffer.producing_operation == Some(operation) {
                buffer.producing_operation = None;
            }
            if buffer.inventory_operation == Some(operation) {
                buffer.inventory_operation = None;
            }
        }
        self.operations.remove(operation.value());
        self.mark_structure_changed();
        Ok(())
    }

    // =========================================================================
    // Mutation entry points
    // =========================================================================

    /// Move the end date; the start follows the operation's shape.
    /// Locked plans are not touched.
    pub fn set_end(&mut self, plan: PlanId, d: Date) -> PlanResult<PlanParameters> {
        let qty = self.operation_plan(plan).quantity;
        self.set_operation_plan_parameters(plan, qty, None, Some(d), true, true)
    }

    /// Move the start date; the end follows the operation's shape.
    pub fn set_start(&mut self, plan: PlanId, d: Date) -> PlanResult<PlanParameters> {
        let qty = self.operation_plan(plan).quantity;
        self.set_operation_plan_parameters(plan, qty, Some(d), None, false, true)
    }

    /// Resize the plan, rounding onto the operation's sizing grid.
    pub fn set_quantity(&mut self, plan: PlanId, quantity: f64) -> PlanResult<f64> {
        if quantity < 0.0 {
            return Err(PlanError::data("Operationplan quantity must be positive"));
        }
        Ok(self.set_operation_plan_quantity(plan, quantity, false, true, true))
    }

    /// Freeze or thaw a plan and its children. A locked plan keeps its
    /// flow and load plans on the timelines but ignores every setter.
    pub fn set_locked(&mut self, plan: PlanId, locked: bool) {
        self.plan_mut(plan).locked = locked;
        for child in self.child_plans(plan) {
            self.set_locked(child, locked);
        }
        self.update_plan(plan);
    }

    /// Update the material and capacity switches of a locked plan and
    /// refresh its events: a switched-off side posts zero quantities.
    pub fn set_plan_switches(
        &mut self,
        plan: PlanId,
        consume_material: bool,
        produce_material: bool,
        consume_capacity: bool,
    ) {
        let p = self.plan_mut(plan);
        p.consume_material = consume_material;
        p.produce_material = produce_material;
        p.consume_capacity = consume_capacity;
        self.update_plan(plan);
    }

    /// Fix both dates without any shape logic, then refresh the
    /// derived state. Parameter setters are the safer entry point.
    pub fn set_start_and_end(&mut self, plan: PlanId, start: Date, end: Date) {
        let p = self.plan_mut(plan);
        p.start = start;
        p.end = end;
        self.update_plan(plan);
    }

    /// Lazily assign and return the external identifier.
    pub fn plan_identifier(&mut self, plan: PlanId) -> u64 {
        if self.operation_plan(plan).identifier == 0 {
            let id = self.next_plan_identifier();
            self.plan_mut(plan).identifier = id;
        }
        self.operation_plan(plan).identifier
    }

    /// Linear search for a plan with a given external identifier.
    pub fn find_plan_by_identifier(&self, identifier: u64) -> Option<PlanId> {
        self.plans
            .iter()
            .find(|(_, p)| p.identifier == identifier)
            .map(|(i, _)| PlanId::new(i))
    }

    // =========================================================================
    // Navigation
    // =========================================================================

    /// The plans of an operation in (start asc, quantity desc) order.
    pub fn plans_of(&self, operation: OperationId) -> Vec<PlanId> {
        let mut result = Vec::new();
        let mut cursor = self.operation(operation).first_plan;
        while let Some(p) = cursor {
            result.push(p);
            cursor = self.operation_plan(p).next;
        }
        result
    }

    /// Direct children of a plan, in sibling order.
    pub fn child_plans(&self, plan: PlanId) -> Vec<PlanId> {
        let mut result = Vec::new();
        let mut cursor = self.operation_plan(plan).first_child;
        while let Some(c) = cursor {
            result.push(c);
            cursor = self.operation_plan(c).next_sibling;
        }
        result
    }

    /// All descendants of a plan, depth first.
    pub fn descendant_plans(&self, plan: PlanId) -> Vec<PlanId> {
        let mut result = Vec::new();
        let mut stack = self.child_plans(plan);
        stack.reverse();
        while let Some(p) = stack.pop() {
            result.push(p);
            let mut children = self.child_plans(p);
            children.reverse();
            stack.extend(children);
        }
        result
    }

    /// The root of a plan's owner hierarchy.
    pub fn top_owner(&self, plan: PlanId) -> PlanId {
        let mut p = plan;
        while let Some(o) = self.operation_plan(p).owner {
            p = o;
        }
        p
    }

    // =========================================================================
    // Quantity logic
    // =========================================================================

    /// Apply the sizing rules and propagate the new quantity through
    /// the plan hierarchy. With `execute` false this is a pure preview
    /// of the rounded value.
    pub(crate) fn set_operation_plan_quantity(
        &mut self,
        plan: PlanId,
        quantity: f64,
        round_down: bool,
        update: bool,
        execute: bool,
    ) -> f64 {
        let p = self.operation_plan(plan);
        if p.locked {
            return p.quantity;
        }
        let op_id = p.operation;
        let rounded = self.operation(op_id).round_quantity(quantity, round_down);
        if !execute {
            return rounded;
        }
        self.plan_mut(plan).quantity = rounded;

        // Cascade to the children.
        let kind = self.operation(op_id).kind.clone();
        match &kind {
            OperationKind::Routing { .. } | OperationKind::Alternate { .. } => {
                for child in self.child_plans(plan) {
                    if !self.operation_plan(child).is_setup {
                        self.set_operation_plan_quantity(child, rounded, round_down, update, true);
                    }
                }
            }
            OperationKind::Split { members } => {
                for child in self.child_plans(plan) {
                    if self.operation_plan(child).is_setup {
                        continue;
                    }
                    let child_op = self.operation_plan(child).operation;
                    let share = members
                        .iter()
                        .find(|m| m.operation == child_op)
                        .map_or(0.0, |m| m.percent);
                    self.set_operation_plan_quantity(
                        child,
                        rounded * share / 100.0,
                        round_down,
                        update,
                        true,
                    );
                }
            }
            _ => {}
        }

        // An alternate owner mirrors the quantity of its active child.
        if let Some(owner) = self.operation_plan(plan).owner {
            let owner_op = self.operation_plan(owner).operation;
            if matches!(self.operation(owner_op).kind, OperationKind::Alternate { .. })
                && !self.operation_plan(plan).is_setup
            {
                self.plan_mut(owner).quantity = rounded;
            }
        }

        if update {
            self.update_plan(plan);
        }
        rounded
    }

    // =========================================================================
    // Parameter setting per operation variant
    // =========================================================================

    /// Compute (and with `execute` apply) the consistent
    /// (start, end, quantity) triple for a plan. Respecting the end
    /// date wins over the start date, both win over the quantity, and
    /// when the requested dates cannot hold any quantity the plan is
    /// zeroed instead.
    pub fn set_operation_plan_parameters(
        &mut self,
        plan: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        if quantity < 0.0 {
            return Err(PlanError::logic("Incorrect parameters for operationplan"));
        }
        let kind = self
            .operation(self.operation_plan(plan).operation)
            .kind
            .clone();
        match kind {
            OperationKind::FixedTime { duration } => {
                self.spp_fixed(plan, duration, quantity, start, end, prefer_end, execute)
            }
            OperationKind::ItemSupplier { leadtime, .. } => {
                self.spp_fixed(plan, leadtime, quantity, start, end, prefer_end, execute)
            }
            OperationKind::TimePer {
                duration,
                duration_per,
            } => self.spp_time_per(
                plan,
                duration,
                duration_per,
                quantity,
                start,
                end,
                prefer_end,
                execute,
            ),
            OperationKind::Routing { .. } => {
                self.spp_routing(plan, quantity, start, end, prefer_end, execute)
            }
            OperationKind::Alternate { .. } => {
                self.spp_alternate(plan, quantity, start, end, prefer_end, execute)
            }
            OperationKind::Split { .. } => {
                self.spp_split(plan, quantity, start, end, prefer_end, execute)
            }
            OperationKind::Setup => self.spp_setup(plan, quantity, start, end, prefer_end, execute),
        }
    }

    fn current_parameters(&self, plan: PlanId) -> PlanParameters {
        let p = self.operation_plan(plan);
        PlanParameters::new(p.start, p.end, p.quantity)
    }

    /// Fixed-duration logic: the quantity is clamped to the sizing
    /// rules and the dates are fitted into a contiguous available
    /// window of the full duration. When not enough available time
    /// remains in the horizon the quantity flips to zero.
    fn spp_fixed(
        &mut self,
        plan: PlanId,
        duration: Duration,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        if self.operation_plan(plan).locked {
            return Ok(self.current_parameters(plan));
        }
        let op_id = self.operation_plan(plan).operation;
        let mut q = quantity;
        {
            let op = self.operation(op_id);
            if q > 0.0 && q < op.size_minimum {
                q = op.size_minimum;
            }
            if q > op.size_maximum {
                q = op.size_maximum;
            }
        }
        if (q - self.operation_plan(plan).quantity).abs() > ROUNDING_ERROR {
            q = self.set_operation_plan_quantity(plan, q, false, false, execute);
        }

        let (x, actual) = match (start, end) {
            (Some(s), Some(e)) => {
                if prefer_end {
                    self.calculate_operation_time(op_id, e, duration, false)
                } else {
                    self.calculate_operation_time(op_id, s, duration, true)
                }
            }
            (Some(s), None) => self.calculate_operation_time(op_id, s, duration, true),
            (None, Some(e)) => self.calculate_operation_time(op_id, e, duration, false),
            (None, None) => {
                let anchor = self.operation_plan(plan).end;
                self.calculate_operation_time(op_id, anchor, duration, false)
            }
        };
        if !execute {
            return Ok(PlanParameters::new(
                x.start,
                x.end,
                if actual == duration { q } else { 0.0 },
            ));
        }
        if actual == duration {
            self.set_start_and_end(plan, x.start, x.end);
        } else {
            // Not enough available time in the horizon.
            self.set_operation_plan_quantity(plan, 0.0, false, true, true);
        }
        Ok(self.current_parameters(plan))
    }

    /// Time-per logic: the wanted duration is base + per-unit time. If
    /// both dates are given the quantity shrinks to what fits between
    /// them, down to zero when even the base does not fit.
    #[allow(clippy::too_many_arguments)]
    fn spp_time_per(
        &mut self,
        plan: PlanId,
        duration: Duration,
        duration_per: f64,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        if self.operation_plan(plan).locked {
            return Ok(self.current_parameters(plan));
        }
        let op_id = self.operation_plan(plan).operation;
        let mut q = quantity;
        {
            let op = self.operation(op_id);
            if q > 0.0 && q < op.size_minimum {
                q = op.size_minimum;
            }
            if q > op.size_maximum {
                q = op.size_maximum;
            }
        }

        let wanted_for = |q: f64| duration + Duration::seconds((duration_per * q) as i64);

        if let (Some(s), Some(e)) = (start, end) {
            // Both dates given: compute the quantity fitting between them.
            let (_, available) = self.calculate_available_time(op_id, s, e);
            if available < duration {
                // Too close to fit even the constant part.
                if !execute {
                    return Ok(PlanParameters::new(s, e, 0.0));
                }
                self.set_operation_plan_quantity(plan, 0.0, true, false, true);
                self.set_operation_plan_parameters(plan, 0.0, None, Some(e), true, true)?;
                return Ok(self.current_parameters(plan));
            }
            let slack = (available - duration).num_seconds() as f64;
            if duration_per > 0.0 {
                if q * duration_per < slack + 1.0 {
                    // The provided quantity fits, with a one second margin.
                    q = self.set_operation_plan_quantity(plan, q, true, false, execute);
                } else {
                    // The largest plan that fits in the window.
                    q = self.set_operation_plan_quantity(
                        plan,
                        slack / duration_per,
                        true,
                        false,
                        execute,
                    );
                }
            } else {
                q = self.set_operation_plan_quantity(plan, q, true, false, execute);
            }
            let wanted = wanted_for(q);
            let (x, _) = if prefer_end {
                self.calculate_operation_time(op_id, e, wanted, false)
            } else {
                self.calculate_operation_time(op_id, s, wanted, true)
            };
            if !execute {
                return Ok(PlanParameters::new(x.start, x.end, q));
            }
            self.set_start_and_end(plan, x.start, x.end);
        } else if start.is_none() {
            // Only an end date (or nothing): respect the quantity and
            // compute the start.
            let e = end.unwrap_or(self.operation_plan(plan).end);
            q = self.set_operation_plan_quantity(plan, q, true, false, execute);
            let wanted = wanted_for(q);
            let (x, actual) = self.calculate_operation_time(op_id, e, wanted, false);
            if actual == wanted {
                if !execute {
                    return Ok(PlanParameters::new(x.start, x.end, q));
                }
                self.set_start_and_end(plan, x.start, x.end);
            } else if actual < duration {
                if !execute {
                    return Ok(PlanParameters::new(x.start, x.end, 0.0));
                }
                self.set_operation_plan_quantity(plan, 0.0, true, false, true);
                self.set_start_and_end(plan, e, e);
            } else {
                // Shrink the quantity to what the horizon allows.
                let max_q = if duration_per > 0.0 {
                    (actual - duration).num_seconds() as f64 / duration_per
                } else {
                    q
                };
                q = self.set_operation_plan_quantity(plan, q.min(max_q), true, false, execute);
                let wanted = wanted_for(q);
                let (x, _) = self.calculate_operation_time(op_id, e, wanted, false);
                if !execute {
                    return Ok(PlanParameters::new(x.start, x.end, q));
                }
                self.set_start_and_end(plan, x.start, x.end);
            }
        } else {
            // Only a start date: respect the quantity and compute the end.
            let s = start.unwrap_or(self.operation_plan(plan).start);
            q = self.set_operation_plan_quantity(plan, q, true, false, execute);
            let wanted = wanted_for(q);
            let (x, actual) = self.calculate_operation_time(op_id, s, wanted, true);
            if actual == wanted {
                if !execute {
                    return Ok(PlanParameters::new(x.start, x.end, q));
                }
                self.set_start_and_end(plan, x.start, x.end);
            } else if actual < duration {
                if !execute {
                    return Ok(PlanParameters::new(x.start, x.end, 0.0));
                }
                self.set_operation_plan_quantity(plan, 0.0, true, false, true);
                self.set_start_and_end(plan, s, s);
            } else {
                let max_q = if duration_per > 0.0 {
                    (actual - duration).num_seconds() as f64 / duration_per
                } else {
                    q
                };
                q = self.set_operation_plan_quantity(plan, q.min(max_q), true, false, execute);
                let wanted = wanted_for(q);
                let (x, _) = self.calculate_operation_time(op_id, s, wanted, true);
                if !execute {
                    return Ok(PlanParameters::new(x.start, x.end, q));
                }
                self.set_start_and_end(plan, x.start, x.end);
            }
        }
        Ok(self.current_parameters(plan))
    }

    /// Routing logic: steps are walked back from the end (or forward
    /// from the start), each receiving the quantity and the free-edge
    /// date. Slack between steps is absorbed, steps move only when
    /// necessary.
    fn spp_routing(
        &mut self,
        plan: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        if self.operation_plan(plan).locked {
            return Ok(self.current_parameters(plan));
        }
        let children: Vec<PlanId> = self
            .child_plans(plan)
            .into_iter()
            .filter(|c| !self.operation_plan(*c).is_setup)
            .collect();

        if children.is_empty() {
            // No step plans yet: apply the request blindly.
            let q = self.set_operation_plan_quantity(plan, quantity, false, false, execute);
            let (s, e) = match (start, end) {
                (Some(s), Some(e)) => (s, e),
                (Some(s), None) => (s, s),
                (None, Some(e)) => (e, e),
                (None, None) => {
                    let p = self.operation_plan(plan);
                    (p.start, p.end)
                }
            };
            if !execute {
                return Ok(PlanParameters::new(s, e, q));
            }
            self.set_start_and_end(plan, s, e);
            return Ok(self.current_parameters(plan));
        }

        if let Some(e) = end {
            let mut edge = e;
            let mut last = PlanParameters::new(edge, edge, 0.0);
            let mut envelope_end: Option<Date> = None;
            for child in children.iter().rev() {
                last = self.set_operation_plan_parameters(
                    *child,
                    quantity,
                    None,
                    Some(edge),
                    prefer_end,
                    execute,
                )?;
                edge = last.start;
                if envelope_end.is_none() {
                    envelope_end = Some(last.end);
                }
            }
            Ok(PlanParameters::new(
                last.start,
                envelope_end.unwrap_or(last.end),
                last.quantity,
            ))
        } else if let Some(s) = start {
            let mut edge = s;
            let mut last = PlanParameters::new(edge, edge, 0.0);
            let mut envelope_start: Option<Date> = None;
            for child in children.iter() {
                last = self.set_operation_plan_parameters(
                    *child,
                    quantity,
                    Some(edge),
                    None,
                    prefer_end,
                    execute,
                )?;
                edge = last.end;
                if envelope_start.is_none() {
                    envelope_start = Some(last.start);
                }
            }
            Ok(PlanParameters::new(
                envelope_start.unwrap_or(last.start),
                last.end,
                last.quantity,
            ))
        } else {
            Err(PlanError::logic(
                "Updating a routing operationplan without start or end date argument",
            ))
        }
    }

    /// Alternate logic: delegate to the single active child.
    fn spp_alternate(
        &mut self,
        plan: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        if self.operation_plan(plan).locked {
            return Ok(self.current_parameters(plan));
        }
        let child = self
            .child_plans(plan)
            .into_iter()
            .rev()
            .find(|c| !self.operation_plan(*c).is_setup);
        match child {
            None => {
                // Accept the parameters blindly until a child exists.
                let q = self.set_operation_plan_quantity(plan, quantity, false, false, execute);
                let p = self.operation_plan(plan);
                let s = start.unwrap_or(p.start);
                let e = end.unwrap_or(p.end);
                if !execute {
                    return Ok(PlanParameters::new(s, e, q));
                }
                self.set_start_and_end(plan, s, e);
                Ok(self.current_parameters(plan))
            }
            Some(child) => {
                self.set_operation_plan_parameters(child, quantity, start, end, prefer_end, execute)
            }
        }
    }

    /// Split logic: every branch is planned over the parent's window
    /// with its share of the quantity. Branches may overlap freely.
    fn spp_split(
        &mut self,
        plan: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        if self.operation_plan(plan).locked {
            return Ok(self.current_parameters(plan));
        }
        let op_id = self.operation_plan(plan).operation;
        let OperationKind::Split { members } = self.operation(op_id).kind.clone() else {
            return Err(PlanError::logic("Split parameters on a non-split operation"));
        };
        let children: Vec<PlanId> = self
            .child_plans(plan)
            .into_iter()
            .filter(|c| !self.operation_plan(*c).is_setup)
            .collect();
        if children.is_empty() {
            let q = self.set_operation_plan_quantity(plan, quantity, false, false, execute);
            let p = self.operation_plan(plan);
            let s = start.or(end).unwrap_or(p.start);
            let e = end.or(start).unwrap_or(p.end);
            if !execute {
                return Ok(PlanParameters::new(s, e, q));
            }
            self.set_start_and_end(plan, s, e);
            return Ok(self.current_parameters(plan));
        }
        let mut env_start = DATE_MAX;
        let mut env_end = DATE_MIN;
        for child in children {
            let child_op = self.operation_plan(child).operation;
            let share = members
                .iter()
                .find(|m| m.operation == child_op)
                .map_or(0.0, |m| m.percent);
            let x = self.set_operation_plan_parameters(
                child,
                quantity * share / 100.0,
                start,
                end,
                prefer_end,
                execute,
            )?;
            env_start = env_start.min(x.start);
            env_end = env_end.max(x.end);
        }
        if execute {
            self.plan_mut(plan).quantity = quantity;
        }
        Ok(PlanParameters::new(env_start, env_end, quantity))
    }

    /// Setup logic: the duration is the changeover time between the
    /// resource's setup at the boundary date and the setup required by
    /// the owning operation's load.
    fn spp_setup(
        &mut self,
        plan: PlanId,
        quantity: f64,
        start: Option<Date>,
        end: Option<Date>,
        prefer_end: bool,
        execute: bool,
    ) -> PlanResult<PlanParameters> {
        let Some(lp) = self.operation_plan(plan).loadplans.first().copied() else {
            // The changeover loadplan is created with the plan; before
            // that, accept the dates as given.
            let p = self.operation_plan(plan);
            let s = start.or(end).unwrap_or(p.start);
            let e = end.or(start).unwrap_or(p.end);
            if execute {
                self.plan_mut(plan).quantity = quantity;
                self.set_start_and_end(plan, s, e);
            }
            return Ok(PlanParameters::new(s, e, quantity));
        };
        let load = self.loadplan(lp).load;
        let boundary = match (start, end, prefer_end) {
            (_, Some(e), true) => e,
            (Some(s), _, _) => s,
            (_, Some(e), _) => e,
            _ => self.operation_plan(plan).end,
        };
        let duration = self.setup_conversion_duration(plan, load, boundary);
        let s = sub_dur(boundary, duration);
        if !execute {
            return Ok(PlanParameters::new(s, boundary, quantity));
        }
        self.plan_mut(plan).quantity = quantity;
        self.set_start_and_end(plan, s, boundary);
        Ok(self.current_parameters(plan))
    }

    /// The changeover duration on the resource loaded by `load`, when
    /// switching at `boundary` to the load's required setup. An
    /// undefined conversion is effectively infeasible: one year.
    pub(crate) fn setup_conversion_duration(
        &self,
        plan: PlanId,
        load: LoadId,
        boundary: Date,
    ) -> Duration {
        let l = self.load(load);
        let resource = l.resource;
        let owner = self.operation_plan(plan).owner;
        // The setup holding on the resource just before the boundary:
        // the last setup-carrying loadplan of another plan.
        let mut last_setup: Option<String> = None;
        for (key, ev) in self.resource(resource).timeline.iter() {
            if key.date > boundary {
                break;
            }
            if ev.quantity == 0.0 {
                continue;
            }
            let Some(src) = ev.source() else { continue };
            let lplan = self.loadplan(*src);
            if lplan.plan == plan || Some(lplan.plan) == owner {
                continue;
            }
            let other_load = self.load(lplan.load);
            if !other_load.setup.is_empty() {
                last_setup = Some(other_load.setup.clone());
            }
        }
        let current = last_setup.unwrap_or_else(|| self.resource(resource).setup.clone());
        if current == l.setup {
            return Duration::zero();
        }
        let Some(matrix) = self.resource(resource).setup_matrix else {
            return Duration::zero();
        };
        match self.setup_matrix(matrix).find_rule(&current, &l.setup) {
            Some(rule) => rule.duration,
            None => Duration::days(365),
        }
    }

    // =========================================================================
    // Flow and load plan management
    // =========================================================================

    /// Create the flow plans, load plans and setup changeover of a
    /// plan. Flows and loads that are alternates of another one stay
    /// dormant until a solver activates them.
    pub fn create_flow_loads(&mut self, plan: PlanId) -> PlanResult<()> {
        if !self.operation_plan(plan).flowplans.is_empty()
            || !self.operation_plan(plan).loadplans.is_empty()
        {
            return Ok(());
        }
        let op = self.operation_plan(plan).operation;
        let flows: Vec<_> = self
            .operation(op)
            .flows
            .iter()
            .copied()
            .filter(|f| self.flow(*f).alternate.is_none())
            .collect();
        for f in flows {
            self.create_flowplan(plan, f);
        }
        let loads: Vec<_> = self
            .operation(op)
            .loads
            .iter()
            .copied()
            .filter(|l| self.load(*l).alternate.is_none())
            .collect();
        for l in &loads {
            self.create_loadplan(plan, *l);
        }
        // A load requiring a setup on a matrix-carrying resource spawns
        // a changeover child.
        if !self.operation_plan(plan).is_setup && !self.operation_plan(plan).has_setup {
            let setup_load = loads.iter().copied().find(|l| {
                let load = self.load(*l);
                !load.setup.is_empty() && self.resource(load.resource).setup_matrix.is_some()
            });
            if let Some(load) = setup_load {
                self.create_setup_plan(plan, load)?;
            }
        }
        Ok(())
    }

    /// Drop all flow and load plans of a plan (and of its setup child)
    /// from the timelines.
    pub fn delete_flow_loads(&mut self, plan: PlanId) {
        for fp in std::mem::take(&mut self.plan_mut(plan).flowplans) {
            self.destroy_flowplan(fp);
        }
        for lp in std::mem::take(&mut self.plan_mut(plan).loadplans) {
            self.destroy_loadplan(lp);
        }
    }

    /// The hidden operation all setup changeovers are instantiated on.
    fn ensure_setup_operation(&mut self) -> PlanResult<OperationId> {
        if let Some(op) = self.find_operation("setup operation") {
            return Ok(op);
        }
        let mut op = Operation::setup("setup operation");
        op.size_minimum = 0.0;
        self.add_operation(op)
    }

    fn create_setup_plan(&mut self, owner: PlanId, load: LoadId) -> PlanResult<PlanId> {
        let setup_op = self.ensure_setup_operation()?;
        self.plan_mut(owner).has_setup = true;
        let boundary = self.operation_plan(owner).start;
        let child = self.create_operation_plan_ex(
            setup_op,
            1.0,
            Some(boundary),
            Some(boundary),
            None,
            Some(owner),
            0,
            false,
        )?;
        self.plan_mut(child).is_setup = true;
        self.create_loadplan(child, load);
        // Now that the changeover loadplan exists, derive the duration.
        self.set_operation_plan_parameters(child, 1.0, None, Some(boundary), true, true)?;
        Ok(child)
    }

    // =========================================================================
    // Derived-state refresh
    // =========================================================================

    /// Refresh everything that depends on the plan's dates, quantity
    /// and locked flag: timeline events, list position, owner envelope
    /// and delivery ordering.
    pub(crate) fn update_plan(&mut self, plan: PlanId) {
        for fp in self.operation_plan(plan).flowplans.clone() {
            self.update_flowplan(fp);
        }
        for lp in self.operation_plan(plan).loadplans.clone() {
            self.update_loadplan(lp);
        }
        if self.operation_plan(plan).in_operation_list {
            self.remove_from_operation_list(plan);
            self.insert_in_operation_list(plan);
        }
        if let Some(owner) = self.operation_plan(plan).owner {
            self.refresh_owner_envelope(owner);
        }
        if let Some(d) = self.operation_plan(plan).demand {
            self.resort_deliveries(d);
        }
        let op = self.operation_plan(plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
    }

    /// Recompute an owner's dates (and for alternates, quantity) from
    /// its children, then walk further up.
    fn refresh_owner_envelope(&mut self, owner: PlanId) {
        let owner_op = self.operation_plan(owner).operation;
        let kind = self.operation(owner_op).kind.clone();
        let children: Vec<PlanId> = self
            .child_plans(owner)
            .into_iter()
            .filter(|c| !self.operation_plan(*c).is_setup)
            .collect();
        if !children.is_empty() {
            match kind {
                OperationKind::Alternate { .. } => {
                    let c = self.operation_plan(children[children.len() - 1]);
                    let (s, e, q) = (c.start, c.end, c.quantity);
                    let o = self.plan_mut(owner);
                    o.start = s;
                    o.end = e;
                    o.quantity = q;
                }
                _ => {
                    let mut s = DATE_MAX;
                    let mut e = DATE_MIN;
                    for c in &children {
                        let cp = self.operation_plan(*c);
                        s = s.min(cp.start);
                        e = e.max(cp.end);
                    }
                    let o = self.plan_mut(owner);
                    o.start = s;
                    o.end = e;
                }
            }
        }
        for fp in self.operation_plan(owner).flowplans.clone() {
            self.update_flowplan(fp);
        }
        for lp in self.operation_plan(owner).loadplans.clone() {
            self.update_loadplan(lp);
        }
        if self.operation_plan(owner).in_operation_list {
            self.remove_from_operation_list(owner);
            self.insert_in_operation_list(owner);
        }
        if let Some(d) = self.operation_plan(owner).demand {
            self.resort_deliveries(d);
        }
        let op = self.operation_plan(owner).operation;
        self.operation_mut(op).changed = true;
        if let Some(up) = self.operation_plan(owner).owner {
            self.refresh_owner_envelope(up);
        }
    }

    // =========================================================================
    // Intrusive lists
    // =========================================================================

    /// Link the plan into its operation's sorted list.
    pub(crate) fn insert_in_operation_list(&mut self, plan: PlanId) {
        if self.operation_plan(plan).in_operation_list {
            return;
        }
        let op = self.operation_plan(plan).operation;
        // Find the first existing plan sorting after the new one.
        let mut after: Option<PlanId> = None;
        let mut cursor = self.operation(op).first_plan;
        while let Some(x) = cursor {
            if !self.operation_plan(x).sorts_before(self.operation_plan(plan)) {
                after = Some(x);
                break;
            }
            cursor = self.operation_plan(x).next;
        }
        match after {
            Some(x) => {
                let prev = self.operation_plan(x).prev;
                self.plan_mut(plan).prev = prev;
                self.plan_mut(plan).next = Some(x);
                self.plan_mut(x).prev = Some(plan);
                match prev {
                    Some(p) => self.plan_mut(p).next = Some(plan),
                    None => self.operation_mut(op).first_plan = Some(plan),
                }
            }
            None => {
                let last = self.operation(op).last_plan;
                self.plan_mut(plan).prev = last;
                self.plan_mut(plan).next = None;
                match last {
                    Some(l) => self.plan_mut(l).next = Some(plan),
                    None => self.operation_mut(op).first_plan = Some(plan),
                }
                self.operation_mut(op).last_plan = Some(plan);
            }
        }
        self.plan_mut(plan).in_operation_list = true;
    }

    /// Unlink the plan from its operation's list.
    pub(crate) fn remove_from_operation_list(&mut self, plan: PlanId) {
        if !self.operation_plan(plan).in_operation_list {
            return;
        }
        let op = self.operation_plan(plan).operation;
        let prev = self.operation_plan(plan).prev;
        let next = self.operation_plan(plan).next;
        match prev {
            Some(p) => self.plan_mut(p).next = next,
            None => self.operation_mut(op).first_plan = next,
        }
        match next {
            Some(n) => self.plan_mut(n).prev = prev,
            None => self.operation_mut(op).last_plan = prev,
        }
        let p = self.plan_mut(plan);
        p.prev = None;
        p.next = None;
        p.in_operation_list = false;
    }

    /// Attach a plan under an owner. Routing children take the slot
    /// matching their step order; an alternate owner accepts a single
    /// non-setup child.
    fn set_plan_owner(&mut self, plan: PlanId, owner: PlanId) -> PlanResult<()> {
        let owner_op = self.operation_plan(owner).operation;
        let kind = self.operation(owner_op).kind.clone();
        let plan_op = self.operation_plan(plan).operation;
        let is_setup = self.operation_plan(plan).is_setup;

        if let OperationKind::Alternate { .. } = kind {
            if !is_setup {
                let existing = self
                    .child_plans(owner)
                    .into_iter()
                    .any(|c| !self.operation_plan(c).is_setup);
                if existing {
                    return Err(PlanError::logic(
                        "An alternate operationplan accepts a single sub-operationplan",
                    ));
                }
            }
        }

        // Position among the existing siblings.
        let siblings = self.child_plans(owner);
        let rank_of = |m: &Model, p: PlanId| -> usize {
            if m.operation_plan(p).is_setup {
                return 0;
            }
            let op = m.operation_plan(p).operation;
            match &kind {
                OperationKind::Routing { steps } => {
                    steps.iter().position(|s| *s == op).map_or(usize::MAX, |i| i + 1)
                }
                OperationKind::Split { members } => members
                    .iter()
                    .position(|s| s.operation == op)
                    .map_or(usize::MAX, |i| i + 1),
                _ => usize::MAX,
            }
        };
        let my_rank = if is_setup {
            0
        } else {
            match &kind {
                OperationKind::Routing { steps } => steps
                    .iter()
                    .position(|s| *s == plan_op)
                    .map(|i| i + 1)
                    .ok_or_else(|| {
                        PlanError::data("Operationplan's operation is not a step of the owner")
                    })?,
                OperationKind::Split { members } => members
                    .iter()
                    .position(|m| m.operation == plan_op)
                    .map(|i| i + 1)
                    .ok_or_else(|| {
                        PlanError::data("Operationplan's operation is not a member of the owner")
                    })?,
                _ => usize::MAX,
            }
        };
        let mut before: Option<PlanId> = None;
        for s in &siblings {
            if rank_of(self, *s) > my_rank {
                before = Some(*s);
                break;
            }
        }

        self.plan_mut(plan).owner = Some(owner);
        match before {
            Some(next) => {
                let prev = self.operation_plan(next).prev_sibling;
                self.plan_mut(plan).prev_sibling = prev;
                self.plan_mut(plan).next_sibling = Some(next);
                self.plan_mut(next).prev_sibling = Some(plan);
                match prev {
                    Some(p) => self.plan_mut(p).next_sibling = Some(plan),
                    None => self.plan_mut(owner).first_child = Some(plan),
                }
            }
            None => {
                let last = self.operation_plan(owner).last_child;
                self.plan_mut(plan).prev_sibling = last;
                self.plan_mut(plan).next_sibling = None;
                match last {
                    Some(l) => self.plan_mut(l).next_sibling = Some(plan),
                    None => self.plan_mut(owner).first_child = Some(plan),
                }
                self.plan_mut(owner).last_child = Some(plan);
            }
        }
        Ok(())
    }

    /// Detach a child from its owner's sibling chain.
    fn unlink_child(&mut self, owner: PlanId, child: PlanId) {
        let prev = self.operation_plan(child).prev_sibling;
        let next = self.operation_plan(child).next_sibling;
        match prev {
            Some(p) => self.plan_mut(p).next_sibling = next,
            None => self.plan_mut(owner).first_child = next,
        }
        match next {
            Some(n) => self.plan_mut(n).prev_sibling = prev,
            None => self.plan_mut(owner).last_child = prev,
        }
        let c = self.plan_mut(child);
        c.owner = None;
        c.prev_sibling = None;
        c.next_sibling = None;
    }

    // =========================================================================
    // Extra instantiation logic per variant
    // =========================================================================

    /// Variant-specific logic when a plan is officially registered.
    /// Returns false when the plan should be denied and deleted.
    fn extra_instantiate(&mut self, plan: PlanId) -> PlanResult<bool> {
        let op_id = self.operation_plan(plan).operation;
        let kind = self.operation(op_id).kind.clone();
        match kind {
            OperationKind::FixedTime { .. } => self.instantiate_fixed(plan, op_id),
            OperationKind::Routing { steps } => self.instantiate_routing(plan, &steps),
            OperationKind::Alternate { alternates, .. } => {
                self.instantiate_alternate(plan, &alternates)
            }
            OperationKind::Split { members } => self.instantiate_split(plan, &members),
            _ => Ok(true),
        }
    }

    /// Consolidate a fresh fixed-time plan into an existing one with
    /// identical dates and demand, when sizing permits. Only unowned,
    /// unlocked plans of load-free operations merge.
    fn instantiate_fixed(&mut self, plan: PlanId, op_id: OperationId) -> PlanResult<bool> {
        let p = self.operation_plan(plan);
        if p.identifier != 0 || p.locked || p.owner.is_some() {
            return Ok(true);
        }
        if !self.operation(op_id).loads.is_empty() {
            return Ok(true);
        }
        let (start, end, qty, demand) = {
            let p = self.operation_plan(plan);
            (p.start, p.end, p.quantity, p.demand)
        };
        let candidate = self.plans_of(op_id).into_iter().find(|x| {
            let xp = self.operation_plan(*x);
            *x != plan
                && xp.identifier != 0
                && !xp.locked
                && xp.owner.is_none()
                && xp.start == start
                && xp.end == end
                && xp.demand == demand
                && xp.quantity + qty < self.operation(op_id).size_maximum
        });
        let Some(y) = candidate else {
            return Ok(true);
        };
        // Both plans must post onto the same buffers through ordinary
        // proportional flows; fixed flows never merge.
        let mine: Vec<_> = self.operation_plan(plan).flowplans.clone();
        let theirs: Vec<_> = self.operation_plan(y).flowplans.clone();
        if mine.len() != theirs.len() {
            return Ok(true);
        }
        for (a, b) in mine.iter().zip(theirs.iter()) {
            let fa = self.flow(self.flowplan(*a).flow);
            let fb = self.flow(self.flowplan(*b).flow);
            if fa.buffer != fb.buffer || fa.kind.is_fixed() || fb.kind.is_fixed() {
                return Ok(true);
            }
        }
        let merged = self.operation_plan(y).quantity + qty;
        self.set_operation_plan_quantity(y, merged, false, true, true);
        Ok(false)
    }

    /// Create the step plans of a routing, walking backward from the
    /// end date (or forward from the start when no end is known).
    fn instantiate_routing(&mut self, plan: PlanId, steps: &[OperationId]) -> PlanResult<bool> {
        let has_steps = self
            .child_plans(plan)
            .into_iter()
            .any(|c| !self.operation_plan(c).is_setup);
        if has_steps {
            return Ok(true);
        }
        let (qty, start, end) = {
            let p = self.operation_plan(plan);
            (p.quantity, p.start, p.end)
        };
        if end < DATE_MAX && end > DATE_MIN {
            let mut d = end;
            for step in steps.iter().rev() {
                let child =
                    self.create_operation_plan_ex(*step, qty, None, Some(d), None, Some(plan), 0, true)?;
                d = self.operation_plan(child).start;
            }
        } else {
            let mut d = if start > DATE_MIN { start } else { self.plan.current };
            for step in steps {
                let child =
                    self.create_operation_plan_ex(*step, qty, Some(d), None, None, Some(plan), 0, true)?;
                d = self.operation_plan(child).end;
            }
        }
        Ok(true)
    }

    /// Instantiate the preferred alternate: the first effective one in
    /// priority order, skipping disabled entries (priority 0).
    fn instantiate_alternate(
        &mut self,
        plan: PlanId,
        alternates: &[crate::operation::AlternateMember],
    ) -> PlanResult<bool> {
        let has_child = self
            .child_plans(plan)
            .into_iter()
            .any(|c| !self.operation_plan(c).is_setup);
        if has_child {
            return Ok(true);
        }
        let (qty, start, end) = {
            let p = self.operation_plan(plan);
            (p.quantity, p.start, p.end)
        };
        let chosen = alternates
            .iter()
            .find(|a| a.priority != 0 && a.effective.contains(end));
        if let Some(a) = chosen {
            self.create_operation_plan_ex(
                a.operation,
                qty,
                Some(start),
                Some(end),
                None,
                Some(plan),
                0,
                true,
            )?;
        }
        Ok(true)
    }

    /// Instantiate every branch of a split with its share.
    fn instantiate_split(
        &mut self,
        plan: PlanId,
        members: &[crate::operation::SplitMember],
    ) -> PlanResult<bool> {
        let has_children = self
            .child_plans(plan)
            .into_iter()
            .any(|c| !self.operation_plan(c).is_setup);
        if has_children {
            return Ok(true);
        }
        let (qty, start, end) = {
            let p = self.operation_plan(plan);
            (p.quantity, p.start, p.end)
        };
        for m in members {
            self.create_operation_plan_ex(
                m.operation,
                qty * m.percent / 100.0,
                Some(start),
                Some(end),
                None,
                Some(plan),
                0,
                true,
            )?;
        }
        Ok(true)
    }

    /// A plan is redundant when all material it produces sits above
    /// the minimum stock level (or above zero with `against_zero`).
    pub fn is_excess(&self, plan: PlanId, against_zero: bool) -> bool {
        let mut has_production = false;
        for fp in &self.operation_plan(plan).flowplans {
            let qty = self.flowplan_quantity(*fp);
            if qty <= ROUNDING_ERROR {
                continue;
            }
            has_production = true;
            let buffer = self.flowplan_buffer(*fp);
            let date = self.flowplan(*fp).date();
            let tl = &self.buffer(buffer).timeline;
            // The produced quantity must stay unused up to the horizon
            // end: the running onhand never drops below the floor plus
            // the produced amount.
            let mut floor_ok = true;
            for (key, ev) in tl.iter() {
                if key.date < date {
                    continue;
                }
                let floor = if against_zero { 0.0 } else { tl.min_at(key.date) };
                if ev.onhand() - qty < floor - ROUNDING_ERROR {
                    floor_ok = false;
                    break;
                }
            }
            if !floor_ok {
                return false;
            }
        }
        has_production
    }

    /// Sum of the setup conversion penalties of the resources loaded
    /// by this plan.
    pub fn plan_penalty(&self, plan: PlanId) -> f64 {
        let mut penalty = 0.0;
        for lp in &self.operation_plan(plan).loadplans {
            let lplan = self.loadplan(*lp);
            let load = self.load(lplan.load);
            if load.setup.is_empty() {
                continue;
            }
            if let Some(matrix) = self.resource(lplan.resource).setup_matrix {
                let current = &self.resource(lplan.resource).setup;
                if let Some(rule) = self.setup_matrix(matrix).find_rule(current, &load.setup) {
                    penalty += rule.cost;
                }
            }
        }
        penalty
    }

    /// The unavailable time overlapping the plan window on the
    /// operation's location calendar; the net duration is the window
    /// minus this amount.
    pub fn plan_unavailable(&self, plan: PlanId) -> Duration {
        let p = self.operation_plan(plan);
        let total = p.end.signed_duration_since(p.start);
        let (_, available) = self.calculate_available_time(p.operation, p.start, p.end);
        total - available
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{Buffer, Flow, FlowKind};
    use crate::dates::date;

    fn simple_model() -> (Model, OperationId, crate::BufferId) {
        let mut model = Model::new();
        let op = model
            .add_operation(
                Operation::fixed_time("A", Duration::days(1)).with_sizes(1.0, 1.0, 10.0),
            )
            .unwrap();
        let buf = model.add_buffer(Buffer::new("B")).unwrap();
        model.add_flow(Flow::new(op, buf, FlowKind::End, 1.0)).unwrap();
        (model, op, buf)
    }

    #[test]
    fn test_fixed_time_plan_round_trip() {
        let (mut model, op, buf) = simple_model();
        let d = date(2024, 3, 1, 0, 0, 0);
        let plan = model
            .create_operation_plan(op, 5.0, Some(d), None)
            .unwrap();
        model.activate(plan).unwrap();

        let p = model.operation_plan(plan);
        assert_eq!(p.start, d);
        assert_eq!(p.end, date(2024, 3, 2, 0, 0, 0));
        assert_eq!(p.quantity, 5.0);
        assert_eq!(p.flowplans.len(), 1);
        assert_eq!(model.buffer_onhand(buf, date(2024, 3, 2, 0, 0, 0)), 5.0);
        assert_eq!(model.buffer_onhand(buf, date(2024, 3, 1, 12, 0, 0)), 0.0);
    }

    #[test]
    fn test_plan_list_sorted_by_start_then_quantity() {
        let (mut model, op, _) = simple_model();
        let d1 = date(2024, 3, 1, 0, 0, 0);
        let d2 = date(2024, 3, 5, 0, 0, 0);
        let p2 = model.create_operation_plan(op, 3.0, Some(d2), None).unwrap();
        model.activate(p2).unwrap();
        let p1 = model.create_operation_plan(op, 2.0, Some(d1), None).unwrap();
        model.activate(p1).unwrap();
        let p3 = model.create_operation_plan(op, 7.0, Some(d1), None).unwrap();
        model.activate(p3).unwrap();

        assert_eq!(model.plans_of(op), vec![p3, p1, p2]);
    }

    #[test]
    fn test_set_quantity_respects_sizing() {
        let (mut model, op, _) = simple_model();
        let plan = model
            .create_operation_plan(op, 5.0, Some(date(2024, 3, 1, 0, 0, 0)), None)
            .unwrap();
        model.activate(plan).unwrap();
        let q = model.set_quantity(plan, 25.0).unwrap();
        assert_eq!(q, 10.0);
        let q = model.set_quantity(plan, 0.0).unwrap();
        assert_eq!(q, 0.0);
    }

    #[test]
    fn test_locked_plan_ignores_setters() {
        let (mut model, op, buf) = simple_model();
        let d = date(2024, 3, 1, 0, 0, 0);
        let plan = model.create_operation_plan(op, 5.0, Some(d), None).unwrap();
        model.activate(plan).unwrap();
        model.set_locked(plan, true);

        model.set_end(plan, date(2024, 6, 1, 0, 0, 0)).unwrap();
        model.set_quantity(plan, 9.0).unwrap();
        let p = model.operation_plan(plan);
        assert_eq!(p.start, d);
        assert_eq!(p.quantity, 5.0);
        // Its material stays on the timeline.
        assert_eq!(model.buffer_onhand(buf, date(2024, 3, 2, 0, 0, 0)), 5.0);
    }

    #[test]
    fn test_destroy_plan_clears_timeline() {
        let (mut model, op, buf) = simple_model();
        let plan = model
            .create_operation_plan(op, 5.0, Some(date(2024, 3, 1, 0, 0, 0)), None)
            .unwrap();
        model.activate(plan).unwrap();
        let changes = |m: &Model, b: crate::BufferId| {
            m.buffer(b).timeline().iter().filter(|(_, e)| e.is_change()).count()
        };
        assert_eq!(changes(&model, buf), 1);
        model.destroy_plan(plan);
        assert_eq!(changes(&model, buf), 0);
        assert!(model.plans_of(op).is_empty());
    }

    #[test]
    fn test_deactivate_keeps_events() {
        let (mut model, op, buf) = simple_model();
        let plan = model
            .create_operation_plan(op, 5.0, Some(date(2024, 3, 1, 0, 0, 0)), None)
            .unwrap();
        model.activate(plan).unwrap();
        model.deactivate(plan);
        assert!(model.plans_of(op).is_empty());
        assert_eq!(model.buffer_onhand(buf, date(2024, 3, 2, 0, 0, 0)), 5.0);
    }

    #[test]
    fn test_fixed_time_consolidation() {
        let (mut model, op, _) = simple_model();
        let d = date(2024, 3, 1, 0, 0, 0);
        let p1 = model.create_operation_plan(op, 4.0, Some(d), None).unwrap();
        model.activate(p1).unwrap();
        let p2 = model.create_operation_plan(op, 3.0, Some(d), None).unwrap();
        let kept = model.activate(p2).unwrap();

        assert!(!kept);
        assert_eq!(model.plans_of(op), vec![p1]);
        assert_eq!(model.operation_plan(p1).quantity, 7.0);
    }

    #[test]
    fn test_identifiers_assigned_on_activation() {
        let (mut model, op, _) = simple_model();
        let plan = model
            .create_operation_plan(op, 5.0, Some(date(2024, 3, 1, 0, 0, 0)), None)
            .unwrap();
        assert_eq!(model.operation_plan(plan).identifier(), 0);
        model.activate(plan).unwrap();
        let id = model.operation_plan(plan).identifier();
        assert!(id > 0);
        assert_eq!(model.find_plan_by_identifier(id), Some(plan));
    }
}
