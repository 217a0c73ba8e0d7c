//! Resources: capacity of the network, and the loads connecting them
//! to operations.
//!
//! A resource owns the timeline of all planned capacity usage. The
//! default kind consumes capacity continuously between the start and
//! end of a plan; the bucketed kind consumes within the calendar
//! bucket the plan start falls in; the infinite kind never constrains.

use crate::dates::{DateRange, DATE_MIN};
use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::operation::SearchMode;
use crate::problem::Problem;
use crate::timeline::{EventKind, Timeline};
use crate::{
    CalendarId, LoadId, LoadPlanId, LocationId, OperationId, ResourceId, SetupMatrixId, SkillId,
};
use chrono::Duration;

/// The default window before the ask date in which solvers may build
/// inventory ahead to work around a capacity shortage.
pub const DEFAULT_MAX_EARLY: i64 = 100 * 86400;

/// Resource behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    /// Time-continuous capacity.
    Default,
    /// Never a constraint, never reports problems.
    Infinite,
    /// Capacity defined per calendar bucket; load is consumed within
    /// the bucket it falls in.
    Bucketed,
}

/// A workcentre: a physical or logical representation of capacity.
#[derive(Debug)]
pub struct Resource {
    pub name: String,
    pub kind: ResourceKind,
    pub description: Option<String>,
    pub location: Option<LocationId>,
    /// Cost of using one unit of the resource for one hour.
    pub cost: f64,
    /// Scalar capacity; ignored while a maximum calendar is set.
    pub(crate) max_val: f64,
    pub maximum_calendar: Option<CalendarId>,
    pub loads: Vec<LoadId>,
    pub skills: Vec<SkillId>,
    pub setup_matrix: Option<SetupMatrixId>,
    /// Current setup of the resource.
    pub setup: String,
    /// Maximum inventory build-ahead in case of capacity shortages.
    pub max_early: Duration,
    pub(crate) timeline: Timeline<LoadPlanId>,
    pub hidden: bool,
    pub problems: Vec<Problem>,
    pub changed: bool,
    pub detect_problems: bool,
    pub(crate) level: i16,
    pub(crate) cluster: u16,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Resource {
            name: name.into(),
            kind: ResourceKind::Default,
            description: None,
            location: None,
            cost: 0.0,
            max_val: 1.0,
            maximum_calendar: None,
            loads: Vec::new(),
            skills: Vec::new(),
            setup_matrix: None,
            setup: String::new(),
            max_early: Duration::seconds(DEFAULT_MAX_EARLY),
            timeline: Timeline::new(),
            hidden: false,
            problems: Vec::new(),
            changed: true,
            detect_problems: true,
            level: -1,
            cluster: 0,
        }
    }

    pub fn infinite(name: impl Into<String>) -> Self {
        let mut r = Resource::new(name);
        r.kind = ResourceKind::Infinite;
        r.detect_problems = false;
        r
    }

    pub fn bucketed(name: impl Into<String>) -> Self {
        let mut r = Resource::new(name);
        r.kind = ResourceKind::Bucketed;
        r
    }

    pub fn at(mut self, location: LocationId) -> Self {
        self.location = Some(location);
        self
    }

    pub fn set_cost(&mut self, c: f64) -> PlanResult<()> {
        if c < 0.0 {
            return Err(PlanError::data("Resource cost must be positive"));
        }
        self.cost = c;
        Ok(())
    }

    pub fn set_max_early(&mut self, d: Duration) -> PlanResult<()> {
        if d < Duration::zero() {
            return Err(PlanError::data("MaxEarly must be positive"));
        }
        self.max_early = d;
        Ok(())
    }

    pub fn maximum(&self) -> f64 {
        self.max_val
    }

    /// The timeline of planned capacity usage.
    pub fn timeline(&self) -> &Timeline<LoadPlanId> {
        &self.timeline
    }

    pub fn level(&self) -> i16 {
        self.level
    }

    pub fn cluster(&self) -> u16 {
        self.cluster
    }
}

/// A capacity arc between an operation and a resource.
#[derive(Debug, Clone)]
pub struct Load {
    pub operation: OperationId,
    pub resource: ResourceId,
    /// Capacity taken while a plan executes (continuous resources) or
    /// per planned unit (bucketed resources).
    pub quantity: f64,
    pub effective: DateRange,
    pub priority: i32,
    /// Setup value the loading operation requires on the resource.
    pub setup: String,
    /// Skill the selected resource must have.
    pub skill: Option<SkillId>,
    pub search: SearchMode,
    pub alternate: Option<LoadId>,
    pub has_alternates: bool,
}

impl Load {
    pub fn new(operation: OperationId, resource: ResourceId, quantity: f64) -> Self {
        Load {
            operation,
            resource,
            quantity,
            effective: DateRange::default(),
            priority: 1,
            setup: String::new(),
            skill: None,
            search: SearchMode::Priority,
            alternate: None,
            has_alternates: false,
        }
    }

    pub fn effective_in(mut self, range: DateRange) -> Self {
        self.effective = range;
        self
    }

    pub fn with_setup(mut self, setup: impl Into<String>) -> Self {
        self.setup = setup.into();
        self
    }

    pub fn with_skill(mut self, skill: SkillId) -> Self {
        self.skill = Some(skill);
        self
    }
}

impl Model {
    /// Register a resource. Continuous resources start with a unit
    /// capacity envelope at the beginning of the horizon.
    pub fn add_resource(&mut self, resource: Resource) -> PlanResult<ResourceId> {
        let seed_max = matches!(resource.kind, ResourceKind::Default) && resource.maximum_calendar.is_none();
        let max = resource.max_val;
        let id = ResourceId::new(self.resources.insert(resource, "Resource")?);
        if seed_max {
            self.resource_mut(id).timeline.insert(DATE_MIN, EventKind::Max, max);
        }
        self.mark_structure_changed();
        Ok(id)
    }

    /// Register a load on both its operation and its resource. A load
    /// quantity can't be negative, and at most one load per operation
    /// may require a setup (ignoring its alternates).
    pub fn add_load(&mut self, load: Load) -> PlanResult<LoadId> {
        if load.quantity < 0.0 {
            return Err(PlanError::data("Load quantity can't be negative"));
        }
        if self.operations.get(load.operation.value()).is_none() {
            return Err(PlanError::data("Load references an unknown operation"));
        }
        if self.resources.get(load.resource.value()).is_none() {
            return Err(PlanError::data("Load references an unknown resource"));
        }
        if !load.setup.is_empty() {
            for existing in &self.operation(load.operation).loads {
                let e = self.load(*existing);
                if !e.setup.is_empty() && e.alternate.is_none() && load.alternate.is_none() {
                    return Err(PlanError::data(format!(
                        "Only a single load of operation '{}' can specify a setup",
                        self.operation(load.operation).name
                    )));
                }
            }
        }
        let operation = load.operation;
        let resource = load.resource;
        let id = LoadId::new(self.loads.insert(load));
        self.operation_mut(operation).loads.push(id);
        self.operation_mut(operation).changed = true;
        self.resource_mut(resource).loads.push(id);
        self.resource_mut(resource).changed = true;
        self.mark_structure_changed();
        Ok(id)
    }

    /// Update the scalar capacity of a resource.
    pub fn set_resource_maximum(&mut self, resource: ResourceId, m: f64) {
        let r = self.resource_mut(resource);
        r.max_val = m;
        if r.maximum_calendar.is_some() {
            return;
        }
        r.changed = true;
        if matches!(r.kind, ResourceKind::Default) {
            if let Some((key, _)) = r.timeline.last_max() {
                r.timeline.update(key, m, key.date);
            } else {
                r.timeline.insert(DATE_MIN, EventKind::Max, m);
            }
        }
        self.state.any_change = true;
    }

    /// Drive the capacity from a calendar. Continuous resources get a
    /// maximum envelope event per value change; bucketed resources get
    /// a capacity reset at every bucket boundary.
    pub fn set_resource_maximum_calendar(
        &mut self,
        resource: ResourceId,
        cal: Option<CalendarId>,
    ) -> PlanResult<()> {
        if self.resource(resource).maximum_calendar == cal {
            return Ok(());
        }
        let bucketed = matches!(self.resource(resource).kind, ResourceKind::Bucketed);
        let events = match cal {
            Some(c) if bucketed => Some(self.calendar(c).boundary_events()),
            Some(c) => Some(self.calendar(c).change_events()?),
            None => None,
        };
        let r = self.resource_mut(resource);
        r.changed = true;
        r.maximum_calendar = cal;
        if bucketed {
            // Drop the previous bucket boundaries.
            let keys: Vec<_> = r
                .timeline
                .iter()
                .filter(|(_, e)| matches!(e.kind, EventKind::SetOnhand))
                .map(|(k, _)| *k)
                .collect();
            for k in keys {
                r.timeline.erase(k);
            }
            if let Some(events) = events {
                for (d, v) in events {
                    r.timeline.insert(d, EventKind::SetOnhand, v);
                }
            }
        } else {
            r.timeline.clear_envelope(false);
            match events {
                Some(events) => {
                    for (d, v) in events {
                        r.timeline.insert(d, EventKind::Max, v);
                    }
                }
                None => {
                    let m = r.max_val;
                    self.set_resource_maximum(resource, m);
                }
            }
        }
        self.state.any_change = true;
        Ok(())
    }

    /// Give a resource a skill, maintaining both sides of the relation.
    pub fn add_resource_skill(&mut self, resource: ResourceId, skill: SkillId) -> PlanResult<()> {
        if self.resources.get(resource.value()).is_none() {
            return Err(PlanError::data("Unknown resource"));
        }
        if self.skills.get(skill.value()).is_none() {
            return Err(PlanError::data("Unknown skill"));
        }
        if self.resource(resource).skills.contains(&skill) {
            return Ok(());
        }
        self.resource_mut(resource).skills.push(skill);
        self.skills[skill.value()].resources.push(resource);
        Ok(())
    }

    /// The load of a resource at a date: the sum of active load plan
    /// contributions up to that date.
    pub fn resource_load(&self, resource: ResourceId, d: crate::Date) -> f64 {
        self.resource(resource).timeline.onhand_at(d)
    }

    /// The capacity of a resource at a date.
    pub fn resource_capacity(&self, resource: ResourceId, d: crate::Date) -> f64 {
        let r = self.resource(resource);
        match r.kind {
            ResourceKind::Infinite => f64::INFINITY,
            ResourceKind::Default => r.timeline.max_at(d),
            ResourceKind::Bucketed => r
                .maximum_calendar
                .map_or(r.max_val, |c| self.calendar(c).value_at(d)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Calendar;
    use crate::dates::date;
    use crate::operation::Operation;

    #[test]
    fn test_default_resource_has_unit_capacity() {
        let mut model = Model::new();
        let r = model.add_resource(Resource::new("machine")).unwrap();
        assert_eq!(model.resource_capacity(r, date(2024, 1, 1, 0, 0, 0)), 1.0);
        model.set_resource_maximum(r, 3.0);
        assert_eq!(model.resource_capacity(r, date(2024, 1, 1, 0, 0, 0)), 3.0);
        // Still a single envelope event.
        assert_eq!(model.resource(r).timeline.len(), 1);
    }

    #[test]
    fn test_negative_load_quantity_rejected() {
        let mut model = Model::new();
        let op = model
            .add_operation(Operation::fixed_time("A", Duration::days(1)))
            .unwrap();
        let r = model.add_resource(Resource::new("machine")).unwrap();
        let err = model.add_load(Load::new(op, r, -2.0)).unwrap_err();
        assert!(matches!(err, PlanError::Data(_)));
    }

    #[test]
    fn test_single_setup_load_per_operation() {
        let mut model = Model::new();
        let op = model
            .add_operation(Operation::fixed_time("A", Duration::days(1)))
            .unwrap();
        let r1 = model.add_resource(Resource::new("m1")).unwrap();
        let r2 = model.add_resource(Resource::new("m2")).unwrap();
        model
            .add_load(Load::new(op, r1, 1.0).with_setup("red"))
            .unwrap();
        let err = model
            .add_load(Load::new(op, r2, 1.0).with_setup("blue"))
            .unwrap_err();
        assert!(matches!(err, PlanError::Data(_)));
        // A second load without a setup is fine.
        model.add_load(Load::new(op, r2, 1.0)).unwrap();
    }

    #[test]
    fn test_bucketed_capacity_resets_per_bucket() {
        let mut model = Model::new();
        let mut cal = Calendar::new("weeks", 0.0);
        cal.set_value(date(2024, 1, 1, 0, 0, 0), date(2024, 1, 8, 0, 0, 0), 40.0)
            .unwrap();
        cal.set_value(date(2024, 1, 8, 0, 0, 0), date(2024, 1, 15, 0, 0, 0), 40.0)
            .unwrap();
        let cal = model.add_calendar(cal).unwrap();
        let r = model.add_resource(Resource::bucketed("line")).unwrap();
        model.set_resource_maximum_calendar(r, Some(cal)).unwrap();

        // A reset event per boundary, even though the value repeats.
        let resets = model
            .resource(r)
            .timeline
            .iter()
            .filter(|(_, e)| matches!(e.kind, EventKind::SetOnhand))
            .count();
        assert_eq!(resets, 3);
        assert_eq!(
            model.resource(r).timeline.onhand_at(date(2024, 1, 2, 0, 0, 0)),
            40.0
        );
    }

    #[test]
    fn test_resource_skills_are_bidirectional() {
        let mut model = Model::new();
        let r = model.add_resource(Resource::new("machine")).unwrap();
        let s = model.add_skill(crate::entities::Skill::new("welding")).unwrap();
        model.add_resource_skill(r, s).unwrap();
        assert!(model.resource(r).skills.contains(&s));
        assert!(model.skill(s).resources.contains(&r));
    }
}
