//! Demands: independent customer requests for an item.

use crate::dates::Date;
use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::problem::Problem;
use crate::{CustomerId, DemandId, ItemId, LocationId, OperationId, PlanId};
use chrono::Duration;

/// A customer order or forecast line.
#[derive(Debug)]
pub struct Demand {
    pub name: String,
    pub description: Option<String>,
    pub item: Option<ItemId>,
    pub location: Option<LocationId>,
    pub customer: Option<CustomerId>,
    /// Requested quantity, never negative.
    pub quantity: f64,
    /// Lower numbers are more important.
    pub priority: i32,
    pub due: Date,
    /// Overrides the delivery operation of the item when set.
    pub operation: Option<OperationId>,
    /// Maximum delay tolerated when planning this demand.
    pub max_lateness: Duration,
    /// Minimum size of a delivery plan.
    pub min_shipment: f64,
    /// Delivery plans, sorted by descending end date.
    pub(crate) deliveries: Vec<PlanId>,
    /// Constraints recorded by solvers while planning this demand.
    pub constraints: Vec<Problem>,
    pub problems: Vec<Problem>,
    pub hidden: bool,
    pub changed: bool,
    pub detect_problems: bool,
}

impl Demand {
    pub fn new(name: impl Into<String>, quantity: f64, due: Date) -> Self {
        Demand {
            name: name.into(),
            description: None,
            item: None,
            location: None,
            customer: None,
            quantity,
            priority: 0,
            due,
            operation: None,
            max_lateness: Duration::MAX,
            min_shipment: 1.0,
            deliveries: Vec::new(),
            constraints: Vec::new(),
            problems: Vec::new(),
            hidden: false,
            changed: true,
            detect_problems: true,
        }
    }

    pub fn of(mut self, item: ItemId) -> Self {
        self.item = Some(item);
        self
    }

    pub fn from_customer(mut self, customer: CustomerId) -> Self {
        self.customer = Some(customer);
        self
    }

    pub fn with_priority(mut self, p: i32) -> Self {
        self.priority = p;
        self
    }

    pub fn set_quantity(&mut self, q: f64) -> PlanResult<()> {
        if q < 0.0 {
            return Err(PlanError::data("Demand quantity must be positive"));
        }
        self.quantity = q;
        self.changed = true;
        Ok(())
    }

    pub fn set_max_lateness(&mut self, m: Duration) -> PlanResult<()> {
        if m < Duration::zero() {
            return Err(PlanError::data("The maximum demand lateness must be positive"));
        }
        self.max_lateness = m;
        Ok(())
    }

    pub fn set_min_shipment(&mut self, m: f64) -> PlanResult<()> {
        if m < 0.0 {
            return Err(PlanError::data(
                "The minimum demand shipment quantity must be positive",
            ));
        }
        self.min_shipment = m;
        Ok(())
    }

    /// The delivery plans, latest end first.
    pub fn deliveries(&self) -> &[PlanId] {
        &self.deliveries
    }
}

impl Model {
    pub fn add_demand(&mut self, demand: Demand) -> PlanResult<DemandId> {
        if demand.quantity < 0.0 {
            return Err(PlanError::data("Demand quantity must be positive"));
        }
        let id = DemandId::new(self.demands.insert(demand, "Demand")?);
        self.state.any_change = true;
        Ok(id)
    }

    /// The operation satisfying a demand: the demand's own override,
    /// else the delivery operation of its item (inherited through the
    /// item hierarchy), else none - the demand can't be satisfied.
    pub fn demand_delivery_operation(&self, demand: DemandId) -> Option<OperationId> {
        let d = self.demand(demand);
        if let Some(op) = d.operation {
            return Some(op);
        }
        let mut item = d.item?;
        loop {
            if let Some(op) = self.item(item).delivery_operation {
                return Some(op);
            }
            item = self.item(item).owner?;
        }
    }

    /// Total quantity planned across all deliveries.
    pub fn demand_planned_quantity(&self, demand: DemandId) -> f64 {
        self.demand(demand)
            .deliveries
            .iter()
            .map(|p| self.operation_plan(*p).quantity)
            .sum()
    }

    /// The delivery plan ending last, or None when nothing is planned.
    pub fn demand_latest_delivery(&self, demand: DemandId) -> Option<PlanId> {
        self.demand(demand).deliveries.first().copied()
    }

    /// The delivery plan ending first.
    pub fn demand_earliest_delivery(&self, demand: DemandId) -> Option<PlanId> {
        self.demand(demand).deliveries.last().copied()
    }

    /// Register a delivery plan with its demand, keeping the list
    /// sorted on descending end date.
    pub(crate) fn add_delivery(&mut self, demand: DemandId, plan: PlanId) {
        if self.demand(demand).deliveries.contains(&plan) {
            return;
        }
        let end = self.operation_plan(plan).end;
        // Walk to the first entry ending no later than this plan.
        let mut at = self.demand(demand).deliveries.len();
        for (i, p) in self.demand(demand).deliveries.iter().enumerate() {
            if self.operation_plan(*p).end <= end {
                at = i;
                break;
            }
        }
        let d = self.demand_mut(demand);
        d.deliveries.insert(at, plan);
        d.changed = true;
        self.state.any_change = true;
    }

    /// Remove a delivery plan from its demand.
    pub(crate) fn remove_delivery(&mut self, demand: DemandId, plan: PlanId) {
        let d = self.demand_mut(demand);
        let before = d.deliveries.len();
        d.deliveries.retain(|p| *p != plan);
        if d.deliveries.len() != before {
            d.changed = true;
            self.state.any_change = true;
        }
    }

    /// Re-sort the delivery list of a demand after plan dates moved.
    pub(crate) fn resort_deliveries(&mut self, demand: DemandId) {
        let mut deliveries = std::mem::take(&mut self.demand_mut(demand).deliveries);
        deliveries.sort_by(|a, b| {
            self.operation_plan(*b)
                .end
                .cmp(&self.operation_plan(*a).end)
        });
        self.demand_mut(demand).deliveries = deliveries;
    }

    /// Destroy the delivery plans of a demand. Locked plans survive
    /// unless explicitly included.
    pub fn delete_demand_deliveries(&mut self, demand: DemandId, delete_locked: bool) {
        loop {
            let candidate = self
                .demand(demand)
                .deliveries
                .iter()
                .copied()
                .find(|p| delete_locked || !self.operation_plan(*p).locked);
            match candidate {
                Some(p) => {
                    self.destroy_plan(p);
                }
                None => break,
            }
        }
        self.demand_mut(demand).changed = true;
        self.state.any_change = true;
    }

    /// Remove a demand and its delivery plans, locked ones included.
    pub fn delete_demand(&mut self, demand: DemandId) -> PlanResult<()> {
        if self.demands.get(demand.value()).is_none() {
            return Err(PlanError::data("Unknown demand"));
        }
        self.delete_demand_deliveries(demand, true);
        self.demands.remove(demand.value());
        self.state.any_change = true;
        Ok(())
    }
}
