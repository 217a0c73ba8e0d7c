//! Flow plans: the material events an operation plan puts on buffer
//! timelines.
//!
//! A flow plan is derived state: its date comes from the owning plan
//! (start or end, per the flow kind) and its quantity from the flow
//! rule, zeroed outside the flow's effectivity window. Each flow plan
//! lives inside exactly one buffer timeline.

use crate::dates::{Date, DATE_MIN};
use crate::model::Model;
use crate::timeline::{EventKey, EventKind};
use crate::{BufferId, FlowId, FlowPlanId, PlanId};

/// A planned material movement on a buffer.
#[derive(Debug, Clone)]
pub struct FlowPlan {
    pub flow: FlowId,
    pub plan: PlanId,
    /// Position of the event inside the buffer timeline.
    pub(crate) key: EventKey,
}

impl FlowPlan {
    /// The event date inside the buffer timeline.
    pub fn date(&self) -> Date {
        self.key.date
    }
}

impl Model {
    /// The buffer a flow plan lives on.
    pub fn flowplan_buffer(&self, fp: FlowPlanId) -> BufferId {
        self.flow(self.flowplan(fp).flow).buffer
    }

    /// The signed quantity of the flow plan as currently posted.
    pub fn flowplan_quantity(&self, fp: FlowPlanId) -> f64 {
        let fplan = self.flowplan(fp);
        let buffer = self.flow(fplan.flow).buffer;
        self.buffer(buffer)
            .timeline
            .get(fplan.key)
            .map_or(0.0, |e| e.quantity)
    }

    /// Compute the event parameters of a flow plan from its flow and
    /// its owning plan.
    pub(crate) fn flowplan_event(&self, flow: FlowId, plan: PlanId) -> (BufferId, Date, f64) {
        let f = self.flow(flow);
        let p = self.operation_plan(plan);
        let date = if f.kind.at_start() { p.start } else { p.end };
        let mut qty = if !f.effective.contains(date) {
            0.0
        } else if f.kind.is_fixed() {
            f.quantity
        } else {
            f.quantity * p.quantity
        };
        // The material switches of a locked plan gate its events.
        if p.locked
            && ((qty > 0.0 && !p.produce_material) || (qty < 0.0 && !p.consume_material))
        {
            qty = 0.0;
        }
        (f.buffer, date, qty)
    }

    /// Create the timeline event for a (plan, flow) pair and link it
    /// onto the plan.
    pub(crate) fn create_flowplan(&mut self, plan: PlanId, flow: FlowId) -> FlowPlanId {
        let (buffer, date, qty) = self.flowplan_event(flow, plan);
        let fp = FlowPlanId::new(self.flowplans.insert(FlowPlan {
            flow,
            plan,
            key: EventKey {
                date: DATE_MIN,
                rank: 0,
                seq: 0,
            },
        }));
        let key = self
            .buffer_mut(buffer)
            .timeline
            .insert(date, EventKind::Change(fp), qty);
        self.flowplans[fp.value()].key = key;
        self.plan_mut(plan).flowplans.push(fp);
        self.buffer_mut(buffer).changed = true;
        let op = self.operation_plan(plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
        fp
    }

    /// Refresh the event after the owning plan's dates or quantity
    /// changed.
    pub(crate) fn update_flowplan(&mut self, fp: FlowPlanId) {
        let fplan = self.flowplan(fp).clone();
        let (buffer, date, qty) = self.flowplan_event(fplan.flow, fplan.plan);
        if let Some(key) = self.buffer_mut(buffer).timeline.update(fplan.key, qty, date) {
            self.flowplans[fp.value()].key = key;
        }
        self.buffer_mut(buffer).changed = true;
        let op = self.operation_plan(fplan.plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
    }

    /// Remove a flow plan from its buffer timeline and free it. The
    /// caller unlinks it from the owning plan.
    pub(crate) fn destroy_flowplan(&mut self, fp: FlowPlanId) {
        let fplan = self.flowplan(fp).clone();
        let buffer = self.flow(fplan.flow).buffer;
        self.buffer_mut(buffer).timeline.erase(fplan.key);
        self.buffer_mut(buffer).changed = true;
        self.flowplans.remove(fp.value());
        self.state.any_change = true;
    }

    /// Switch a flow plan to another flow of the same operation, used
    /// by solvers picking an alternate material source.
    pub fn set_flowplan_flow(&mut self, fp: FlowPlanId, new_flow: FlowId) -> crate::PlanResult<()> {
        let fplan = self.flowplan(fp).clone();
        if fplan.flow == new_flow {
            return Ok(());
        }
        if self.flow(fplan.flow).operation != self.flow(new_flow).operation {
            return Err(crate::PlanError::logic(
                "Only switching to a flow on the same operation is allowed",
            ));
        }
        let old_buffer = self.flow(fplan.flow).buffer;
        self.buffer_mut(old_buffer).timeline.erase(fplan.key);
        self.buffer_mut(old_buffer).changed = true;

        self.flowplans[fp.value()].flow = new_flow;
        let (buffer, date, qty) = self.flowplan_event(new_flow, fplan.plan);
        let key = self
            .buffer_mut(buffer)
            .timeline
            .insert(date, EventKind::Change(fp), qty);
        self.flowplans[fp.value()].key = key;
        self.buffer_mut(buffer).changed = true;
        self.state.any_change = true;
        Ok(())
    }
}
