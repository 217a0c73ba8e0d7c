//! Load plans: the capacity events an operation plan puts on resource
//! timelines.
//!
//! On a continuous resource every (plan, load) pair posts two events:
//! capacity taken at the plan start, released at the plan end. On a
//! bucketed resource a single negative event at the plan start draws
//! the load from the bucket it falls in.

use crate::dates::{Date, DateRange};
use crate::model::Model;
use crate::resource::ResourceKind;
use crate::timeline::{EventKey, EventKind};
use crate::dates::DATE_MIN;
use crate::{LoadId, LoadPlanId, PlanId, ResourceId};

/// The planned capacity usage of one (plan, load) pair.
#[derive(Debug, Clone)]
pub struct LoadPlan {
    pub load: LoadId,
    pub plan: PlanId,
    /// The selected resource. Differs from the load's resource when a
    /// solver picked a skilled sub-resource.
    pub resource: ResourceId,
    pub(crate) start_key: EventKey,
    /// Absent on bucketed resources.
    pub(crate) end_key: Option<EventKey>,
}

impl LoadPlan {
    pub fn start_date(&self) -> Date {
        self.start_key.date
    }

    pub fn end_date(&self) -> Option<Date> {
        self.end_key.map(|k| k.date)
    }
}

impl Model {
    /// Event dates of a (load, plan) pair: the plan window clipped to
    /// the load's effectivity.
    fn loadplan_dates(&self, load: LoadId, plan: PlanId) -> (Date, Date) {
        let l = self.load(load);
        let p = self.operation_plan(plan);
        let start = if p.start > l.effective.start {
            p.start
        } else {
            l.effective.start
        };
        let end = if p.end < l.effective.end {
            p.end
        } else {
            l.effective.end
        };
        (start, end)
    }

    /// Capacity taken by one event of the pair. Zero-quantity plans,
    /// plans outside the load effectivity and locked plans with their
    /// capacity switch off take nothing.
    pub(crate) fn loadplan_quantity(
        &self,
        load: LoadId,
        plan: PlanId,
        resource: ResourceId,
        is_start: bool,
    ) -> f64 {
        let l = self.load(load);
        let p = self.operation_plan(plan);
        if p.quantity == 0.0 {
            return 0.0;
        }
        let dates = DateRange {
            start: p.start,
            end: p.end,
        };
        // Zero-duration plans still load when they sit exactly on the
        // effectivity start.
        if !dates.overlaps(&l.effective)
            && (p.end > p.start || !l.effective.contains(p.start))
        {
            return 0.0;
        }
        if p.locked && !p.consume_capacity {
            return 0.0;
        }
        let bucketed = matches!(self.resource(resource).kind, ResourceKind::Bucketed);
        if bucketed {
            -l.quantity * p.quantity
        } else if is_start {
            l.quantity
        } else {
            -l.quantity
        }
    }

    /// Create the timeline events for a (plan, load) pair and link the
    /// load plan onto the plan.
    pub(crate) fn create_loadplan(&mut self, plan: PlanId, load: LoadId) -> LoadPlanId {
        let resource = self.load(load).resource;
        let bucketed = matches!(self.resource(resource).kind, ResourceKind::Bucketed);
        let (start, end) = self.loadplan_dates(load, plan);
        let start_qty = self.loadplan_quantity(load, plan, resource, true);

        let placeholder = EventKey {
            date: DATE_MIN,
            rank: 0,
            seq: 0,
        };
        let lp = LoadPlanId::new(self.loadplans.insert(LoadPlan {
            load,
            plan,
            resource,
            start_key: placeholder,
            end_key: None,
        }));
        let start_key =
            self.resource_mut(resource)
                .timeline
                .insert(start, EventKind::Change(lp), start_qty);
        self.loadplans[lp.value()].start_key = start_key;
        if !bucketed {
            let end_qty = self.loadplan_quantity(load, plan, resource, false);
            let end_key =
                self.resource_mut(resource)
                    .timeline
                    .insert(end, EventKind::Change(lp), end_qty);
            self.loadplans[lp.value()].end_key = Some(end_key);
        }
        self.plan_mut(plan).loadplans.push(lp);
        self.resource_mut(resource).changed = true;
        let op = self.operation_plan(plan).operation;
        self.operation_mut(op).changed = true;
        self.state.any_change = true;
        lp
    }

    /// Refresh both events after the owning plan moved or resized.
    pub(crate) fn update_loadplan(&mut self, lp: LoadPlanId) {
        let lplan = self.loadplan(lp).clone();
        let (start, end) = self.loadplan_dates(lplan.load, lplan.plan);
        let start_qty = self.loadplan_quantity(lplan.load, lplan.plan, lplan.resource, true);
        let resource = lplan.resource;
        if let Some(key) = self
            .resource_mut(resource)
            .timeline
            .update(lplan.start_key, start_qty, start)
        {
            self.loadplans[lp.value()].start_key = key;
        }
        if let Some(end_key) = lplan.end_key {
            let end_qty = self.loadplan_quantity(lplan.load, lplan.plan, lplan.resource, false);
            if let Some(key) = self
                .resource_mut(resource)
                .timeline
                .update(end_key, end_qty, end)
            {
                self.loadplans[lp.value()].end_key = Some(key);
            }
        }
        self.resource_mut(resource).changed = true;
        self.state.any_change = true;
    }

    /// Remove the events of a load plan and free it. The caller
    /// unlinks it from the owning plan.
    pub(crate) fn destroy_loadplan(&mut self, lp: LoadPlanId) {
        let lplan = self.loadplan(lp).clone();
        self.resource_mut(lplan.resource).timeline.erase(lplan.start_key);
        if let Some(end_key) = lplan.end_key {
            self.resource_mut(lplan.resource).timeline.erase(end_key);
        }
        self.resource_mut(lplan.resource).changed = true;
        self.loadplans.remove(lp.value());
        self.state.any_change = true;
    }

    /// Move a load plan to a different resource, used by solvers doing
    /// skill-based sub-resource selection. The target must carry the
    /// skill required by the load, when one is set.
    pub fn set_loadplan_resource(
        &mut self,
        lp: LoadPlanId,
        resource: ResourceId,
    ) -> crate::PlanResult<()> {
        let lplan = self.loadplan(lp).clone();
        if lplan.resource == resource {
            return Ok(());
        }
        if let Some(skill) = self.load(lplan.load).skill {
            if !self.resource(resource).skills.contains(&skill) {
                return Err(crate::PlanError::data(format!(
                    "Resource '{}' misses the skill required by the load",
                    self.resource(resource).name
                )));
            }
        }
        self.resource_mut(lplan.resource).timeline.erase(lplan.start_key);
        if let Some(end_key) = lplan.end_key {
            self.resource_mut(lplan.resource).timeline.erase(end_key);
        }
        self.resource_mut(lplan.resource).changed = true;

        self.loadplans[lp.value()].resource = resource;
        self.loadplans[lp.value()].end_key = None;
        let bucketed = matches!(self.resource(resource).kind, ResourceKind::Bucketed);
        let (start, end) = self.loadplan_dates(lplan.load, lplan.plan);
        let start_qty = self.loadplan_quantity(lplan.load, lplan.plan, resource, true);
        let key = self
            .resource_mut(resource)
            .timeline
            .insert(start, EventKind::Change(lp), start_qty);
        self.loadplans[lp.value()].start_key = key;
        if !bucketed {
            let end_qty = self.loadplan_quantity(lplan.load, lplan.plan, resource, false);
            let key = self
                .resource_mut(resource)
                .timeline
                .insert(end, EventKind::Change(lp), end_qty);
            self.loadplans[lp.value()].end_key = Some(key);
        }
        self.resource_mut(resource).changed = true;
        self.state.any_change = true;
        Ok(())
    }
}
