//! The model container: arenas for every entity category, name
//! indexes, and the process-wide lazy flags.
//!
//! The C++ ancestry of this engine kept global registries per category;
//! here a single `Model` owns everything and hands out typed ids.
//! `&mut Model` exclusivity gives the serialization the original got
//! from a mutex around its recomputation entry points.

use crate::buffer::{Buffer, Flow};
use crate::calendar::Calendar;
use crate::demand::Demand;
use crate::entities::{Customer, Item, ItemSupplier, Location, Skill, Supplier};
use crate::error::{PlanError, PlanResult};
use crate::flowplan::FlowPlan;
use crate::loadplan::LoadPlan;
use crate::operation::Operation;
use crate::operationplan::OperationPlan;
use crate::plan::Plan;
use crate::resource::{Load, Resource};
use crate::setupmatrix::SetupMatrix;
use crate::{
    BufferId, CalendarId, CustomerId, DemandId, FlowId, FlowPlanId, ItemId, LoadId, LoadPlanId,
    LocationId, OperationId, PlanId, ResourceId, SetupMatrixId, SkillId, SupplierId,
};
use slab::Slab;
use std::collections::HashMap;

/// Entities stored in a [`NamedArena`] expose their unique name.
pub trait Named {
    fn name(&self) -> &str;
}

macro_rules! impl_named {
    ($($t:ty),*) => {
        $(impl Named for $t {
            fn name(&self) -> &str {
                &self.name
            }
        })*
    };
}

impl_named!(Item, Location, Customer, Supplier, Skill, Calendar, SetupMatrix, Operation, Buffer, Resource, Demand);

/// Slot arena with a name index. Insertion rejects duplicate names;
/// slots are reused after removal.
#[derive(Debug, Default)]
pub struct NamedArena<T> {
    slots: Slab<T>,
    index: HashMap<String, usize>,
}

impl<T: Named> NamedArena<T> {
    fn new() -> Self {
        NamedArena {
            slots: Slab::new(),
            index: HashMap::new(),
        }
    }

    pub(crate) fn insert(&mut self, value: T, category: &str) -> PlanResult<usize> {
        let name = value.name().to_string();
        if name.is_empty() {
            return Err(PlanError::data(format!("{category} name must not be empty")));
        }
        if self.index.contains_key(&name) {
            return Err(PlanError::data(format!(
                "{category} '{name}' already exists"
            )));
        }
        let id = self.slots.insert(value);
        self.index.insert(name, id);
        Ok(id)
    }

    pub(crate) fn remove(&mut self, id: usize) -> Option<T> {
        let value = self.slots.try_remove(id)?;
        self.index.remove(value.name());
        Some(value)
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.slots.get(id)
    }

    pub fn get_mut(&mut self, id: usize) -> Option<&mut T> {
        self.slots.get_mut(id)
    }

    pub fn find(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

impl<T> std::ops::Index<usize> for NamedArena<T> {
    type Output = T;
    fn index(&self, id: usize) -> &T {
        &self.slots[id]
    }
}

impl<T> std::ops::IndexMut<usize> for NamedArena<T> {
    fn index_mut(&mut self, id: usize) -> &mut T {
        &mut self.slots[id]
    }
}

/// Process-wide lazy recomputation bookkeeping.
#[derive(Debug)]
pub(crate) struct PlanState {
    /// Some plannable entity changed since the last problem run.
    pub any_change: bool,
    /// The network structure changed since the last level run.
    pub recompute_levels: bool,
    /// Next external operation-plan identifier (first value 1).
    pub plan_counter: u64,
    pub number_of_levels: u16,
    pub number_of_clusters: u16,
}

impl Default for PlanState {
    fn default() -> Self {
        PlanState {
            any_change: true,
            recompute_levels: true,
            plan_counter: 1,
            number_of_levels: 0,
            number_of_clusters: 0,
        }
    }
}

/// The complete in-memory model: static network plus dynamic plan.
#[derive(Debug)]
pub struct Model {
    pub plan: Plan,
    pub(crate) state: PlanState,
    pub(crate) items: NamedArena<Item>,
    pub(crate) locations: NamedArena<Location>,
    pub(crate) customers: NamedArena<Customer>,
    pub(crate) suppliers: NamedArena<Supplier>,
    pub(crate) skills: NamedArena<Skill>,
    pub(crate) calendars: NamedArena<Calendar>,
    pub(crate) setup_matrices: NamedArena<SetupMatrix>,
    pub(crate) operations: NamedArena<Operation>,
    pub(crate) buffers: NamedArena<Buffer>,
    pub(crate) resources: NamedArena<Resource>,
    pub(crate) demands: NamedArena<Demand>,
    pub(crate) flows: Slab<Flow>,
    pub(crate) loads: Slab<Load>,
    pub(crate) plans: Slab<OperationPlan>,
    pub(crate) flowplans: Slab<FlowPlan>,
    pub(crate) loadplans: Slab<LoadPlan>,
    pub(crate) item_suppliers: Vec<ItemSupplier>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Model {
            plan: Plan::new(),
            state: PlanState::default(),
            items: NamedArena::new(),
            locations: NamedArena::new(),
            customers: NamedArena::new(),
            suppliers: NamedArena::new(),
            skills: NamedArena::new(),
            calendars: NamedArena::new(),
            setup_matrices: NamedArena::new(),
            operations: NamedArena::new(),
            buffers: NamedArena::new(),
            resources: NamedArena::new(),
            demands: NamedArena::new(),
            flows: Slab::new(),
            loads: Slab::new(),
            plans: Slab::new(),
            flowplans: Slab::new(),
            loadplans: Slab::new(),
            item_suppliers: Vec::new(),
        }
    }

    // =========================================================================
    // Typed accessors. Indexing with a stale id is a caller bug and panics,
    // like any arena index.
    // =========================================================================

    pub fn item(&self, id: ItemId) -> &Item {
        &self.items[id.value()]
    }

    pub fn item_mut(&mut self, id: ItemId) -> &mut Item {
        &mut self.items[id.value()]
    }

    pub fn location(&self, id: LocationId) -> &Location {
        &self.locations[id.value()]
    }

    pub fn location_mut(&mut self, id: LocationId) -> &mut Location {
        &mut self.locations[id.value()]
    }

    pub fn customer(&self, id: CustomerId) -> &Customer {
        &self.customers[id.value()]
    }

    pub fn supplier(&self, id: SupplierId) -> &Supplier {
        &self.suppliers[id.value()]
    }

    pub fn skill(&self, id: SkillId) -> &Skill {
        &self.skills[id.value()]
    }

    pub fn calendar(&self, id: CalendarId) -> &Calendar {
        &self.calendars[id.value()]
    }

    pub fn calendar_mut(&mut self, id: CalendarId) -> &mut Calendar {
        &mut self.calendars[id.value()]
    }

    pub fn setup_matrix(&self, id: SetupMatrixId) -> &SetupMatrix {
        &self.setup_matrices[id.value()]
    }

    pub fn setup_matrix_mut(&mut self, id: SetupMatrixId) -> &mut SetupMatrix {
        &mut self.setup_matrices[id.value()]
    }

    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.operations[id.value()]
    }

    pub fn operation_mut(&mut self, id: OperationId) -> &mut Operation {
        &mut self.operations[id.value()]
    }

    pub fn buffer(&self, id: BufferId) -> &Buffer {
        &self.buffers[id.value()]
    }

    pub fn buffer_mut(&mut self, id: BufferId) -> &mut Buffer {
        &mut self.buffers[id.value()]
    }

    pub fn resource(&self, id: ResourceId) -> &Resource {
        &self.resources[id.value()]
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> &mut Resource {
        &mut self.resources[id.value()]
    }

    pub fn demand(&self, id: DemandId) -> &Demand {
        &self.demands[id.value()]
    }

    pub fn demand_mut(&mut self, id: DemandId) -> &mut Demand {
        &mut self.demands[id.value()]
    }

    pub fn flow(&self, id: FlowId) -> &Flow {
        &self.flows[id.value()]
    }

    pub fn load(&self, id: LoadId) -> &Load {
        &self.loads[id.value()]
    }

    pub fn operation_plan(&self, id: PlanId) -> &OperationPlan {
        &self.plans[id.value()]
    }

    pub(crate) fn plan_mut(&mut self, id: PlanId) -> &mut OperationPlan {
        &mut self.plans[id.value()]
    }

    pub fn flowplan(&self, id: FlowPlanId) -> &FlowPlan {
        &self.flowplans[id.value()]
    }

    pub fn loadplan(&self, id: LoadPlanId) -> &LoadPlan {
        &self.loadplans[id.value()]
    }

    // =========================================================================
    // Name lookup: the reader/finder contract consumed by external loaders.
    // =========================================================================

    pub fn find_item(&self, name: &str) -> Option<ItemId> {
        self.items.find(name).map(ItemId::new)
    }

    pub fn find_location(&self, name: &str) -> Option<LocationId> {
        self.locations.find(name).map(LocationId::new)
    }

    pub fn find_customer(&self, name: &str) -> Option<CustomerId> {
        self.customers.find(name).map(CustomerId::new)
    }

    pub fn find_supplier(&self, name: &str) -> Option<SupplierId> {
        self.suppliers.find(name).map(SupplierId::new)
    }

    pub fn find_skill(&self, name: &str) -> Option<SkillId> {
        self.skills.find(name).map(SkillId::new)
    }

    pub fn find_calendar(&self, name: &str) -> Option<CalendarId> {
        self.calendars.find(name).map(CalendarId::new)
    }

    pub fn find_setup_matrix(&self, name: &str) -> Option<SetupMatrixId> {
        self.setup_matrices.find(name).map(SetupMatrixId::new)
    }

    pub fn find_operation(&self, name: &str) -> Option<OperationId> {
        self.operations.find(name).map(OperationId::new)
    }

    pub fn find_buffer(&self, name: &str) -> Option<BufferId> {
        self.buffers.find(name).map(BufferId::new)
    }

    pub fn find_resource(&self, name: &str) -> Option<ResourceId> {
        self.resources.find(name).map(ResourceId::new)
    }

    pub fn find_demand(&self, name: &str) -> Option<DemandId> {
        self.demands.find(name).map(DemandId::new)
    }

    // =========================================================================
    // Category iterators, in the order the plan serializer consumes them.
    // =========================================================================

    pub fn items(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items.iter().map(|(i, v)| (ItemId::new(i), v))
    }

    pub fn locations(&self) -> impl Iterator<Item = (LocationId, &Location)> {
        self.locations.iter().map(|(i, v)| (LocationId::new(i), v))
    }

    pub fn customers(&self) -> impl Iterator<Item = (CustomerId, &Customer)> {
        self.customers.iter().map(|(i, v)| (CustomerId::new(i), v))
    }

    pub fn suppliers(&self) -> impl Iterator<Item = (SupplierId, &Supplier)> {
        self.suppliers.iter().map(|(i, v)| (SupplierId::new(i), v))
    }

    pub fn calendars(&self) -> impl Iterator<Item = (CalendarId, &Calendar)> {
        self.calendars.iter().map(|(i, v)| (CalendarId::new(i), v))
    }

    pub fn operations(&self) -> impl Iterator<Item = (OperationId, &Operation)> {
        self.operations.iter().map(|(i, v)| (OperationId::new(i), v))
    }

    pub fn buffers(&self) -> impl Iterator<Item = (BufferId, &Buffer)> {
        self.buffers.iter().map(|(i, v)| (BufferId::new(i), v))
    }

    pub fn resources(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources.iter().map(|(i, v)| (ResourceId::new(i), v))
    }

    pub fn demands(&self) -> impl Iterator<Item = (DemandId, &Demand)> {
        self.demands.iter().map(|(i, v)| (DemandId::new(i), v))
    }

    pub fn operation_plans(&self) -> impl Iterator<Item = (PlanId, &OperationPlan)> {
        self.plans.iter().map(|(i, v)| (PlanId::new(i), v))
    }

    pub fn item_suppliers(&self) -> impl Iterator<Item = &ItemSupplier> {
        self.item_suppliers.iter()
    }

    // =========================================================================
    // Entity creation
    // =========================================================================

    pub fn add_item(&mut self, item: Item) -> PlanResult<ItemId> {
        Ok(ItemId::new(self.items.insert(item, "Item")?))
    }

    pub fn add_location(&mut self, location: Location) -> PlanResult<LocationId> {
        Ok(LocationId::new(self.locations.insert(location, "Location")?))
    }

    pub fn add_customer(&mut self, customer: Customer) -> PlanResult<CustomerId> {
        Ok(CustomerId::new(self.customers.insert(customer, "Customer")?))
    }

    pub fn add_supplier(&mut self, supplier: Supplier) -> PlanResult<SupplierId> {
        Ok(SupplierId::new(self.suppliers.insert(supplier, "Supplier")?))
    }

    pub fn add_skill(&mut self, skill: Skill) -> PlanResult<SkillId> {
        Ok(SkillId::new(self.skills.insert(skill, "Skill")?))
    }

    pub fn add_calendar(&mut self, calendar: Calendar) -> PlanResult<CalendarId> {
        Ok(CalendarId::new(self.calendars.insert(calendar, "Calendar")?))
    }

    pub fn add_setup_matrix(&mut self, matrix: SetupMatrix) -> PlanResult<SetupMatrixId> {
        Ok(SetupMatrixId::new(
            self.setup_matrices.insert(matrix, "Setup matrix")?,
        ))
    }

    /// Register an item-supplier purchasing relation.
    pub fn add_item_supplier(&mut self, rel: ItemSupplier) -> PlanResult<()> {
        if rel.size_minimum < 0.0 || rel.size_multiple < 0.0 {
            return Err(PlanError::data(
                "Item-supplier sizes can't be negative",
            ));
        }
        self.item_suppliers.push(rel);
        self.state.recompute_levels = true;
        Ok(())
    }

    /// Link a child item under a parent, maintaining both edges.
    pub fn set_item_owner(&mut self, child: ItemId, parent: Option<ItemId>) {
        if let Some(old) = self.items[child.value()].owner.take() {
            self.items[old.value()].members.retain(|m| *m != child);
        }
        if let Some(p) = parent {
            self.items[p.value()].members.push(child);
        }
        self.items[child.value()].owner = parent;
    }

    // =========================================================================
    // Lazy flags
    // =========================================================================

    /// Update the current date of the plan. Every operation is marked
    /// changed so before-current and before-fence problems get rederived.
    pub fn set_current_date(&mut self, d: crate::Date) {
        self.plan.current = d;
        for (_, op) in self.operations.iter_mut() {
            op.changed = true;
        }
        self.state.any_change = true;
    }

    pub(crate) fn mark_structure_changed(&mut self) {
        self.state.recompute_levels = true;
        self.state.any_change = true;
    }

    /// Next external operation-plan identifier.
    pub(crate) fn next_plan_identifier(&mut self) -> u64 {
        let id = self.state.plan_counter;
        self.state.plan_counter += 1;
        id
    }

    /// Total number of levels found by the last level computation.
    pub fn number_of_levels(&mut self) -> u16 {
        self.compute_levels_if_needed();
        self.state.number_of_levels
    }

    /// Total number of clusters found by the last level computation.
    pub fn number_of_clusters(&mut self) -> u16 {
        self.compute_levels_if_needed();
        self.state.number_of_clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_names_rejected() {
        let mut model = Model::new();
        model.add_item(Item::new("widget")).unwrap();
        let err = model.add_item(Item::new("widget")).unwrap_err();
        assert!(matches!(err, PlanError::Data(_)));
        assert_eq!(model.items.len(), 1);
    }

    #[test]
    fn test_find_by_name() {
        let mut model = Model::new();
        let id = model.add_item(Item::new("widget")).unwrap();
        assert_eq!(model.find_item("widget"), Some(id));
        assert_eq!(model.find_item("gadget"), None);
    }

    #[test]
    fn test_item_hierarchy_links() {
        let mut model = Model::new();
        let parent = model.add_item(Item::new("group")).unwrap();
        let child = model.add_item(Item::new("widget")).unwrap();
        model.set_item_owner(child, Some(parent));
        assert_eq!(model.item(child).owner, Some(parent));
        assert_eq!(model.item(parent).members, vec![child]);
        model.set_item_owner(child, None);
        assert!(model.item(parent).members.is_empty());
    }

    #[test]
    fn test_plan_identifiers_are_monotonic() {
        let mut model = Model::new();
        assert_eq!(model.next_plan_identifier(), 1);
        assert_eq!(model.next_plan_identifier(), 2);
    }
}
