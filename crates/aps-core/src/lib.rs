//! # aps-core: Supply Network Planning Core
//!
//! Provides the entity model and the dynamic plan of a manufacturing
//! production planner. The static model describes a supply network
//! (items, buffers, operations, resources, suppliers, customers and
//! their demands); the dynamic plan is a set of operation plans whose
//! material and capacity events live on per-buffer and per-resource
//! timelines.
//!
//! ## Design Philosophy
//!
//! All entities live in arenas owned by a single [`Model`] and refer to
//! each other through **typed ids** (newtype wrappers around `usize`):
//! - Fast lookup without aliasing or lifetime hazards
//! - Type safety: a buffer id cannot be confused with a resource id
//! - O(1) unlink/insert for the intrusive plan lists, with the
//!   prev/next indices stored in the arena slots
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use aps_core::*;
//! use chrono::Duration;
//!
//! let mut model = Model::new();
//!
//! // A one-day operation producing into a buffer.
//! let op = model
//!     .add_operation(Operation::fixed_time("assemble", Duration::days(1)))
//!     .unwrap();
//! let buf = model.add_buffer(Buffer::new("finished@plant")).unwrap();
//! model.add_flow(Flow::new(op, buf, FlowKind::End, 1.0)).unwrap();
//!
//! // Plan five units ending wherever a start of D lands them.
//! let plan = model
//!     .create_operation_plan(op, 5.0, Some(dates::date(2024, 3, 1, 0, 0, 0)), None)
//!     .unwrap();
//! model.activate(plan).unwrap();
//!
//! // Derive the problem lists.
//! model.compute_problems();
//! ```
//!
//! ## Modules
//!
//! - [`timeline`] - The ordered event list per buffer and resource
//! - [`calendar`] - Time-phased value lookup with prioritized buckets
//! - [`setupmatrix`] - Changeover rules between resource setups
//! - [`problem`] - Lazy problem detection
//! - [`levels`] - Level and cluster analysis
//! - [`pegging`] - Who-feeds-whom traversal over the plan
//! - [`solver`] - The visitor scaffold solver strategies plug into

pub mod buffer;
pub mod calendar;
pub mod dates;
pub mod demand;
pub mod entities;
pub mod error;
pub mod flowplan;
pub mod levels;
pub mod loadplan;
pub mod model;
pub mod operation;
pub mod operationplan;
pub mod pegging;
pub mod plan;
pub mod problem;
pub mod resource;
pub mod setupmatrix;
pub mod solver;
pub mod timeline;

pub use buffer::{Buffer, BufferKind, Flow, FlowKind, ProcurementPolicy};
pub use calendar::{Calendar, CalendarBucket, CalendarEventIterator};
pub use dates::{Date, DateRange, DATE_MAX, DATE_MIN};
pub use demand::Demand;
pub use entities::{Customer, Item, ItemSupplier, Location, Skill, Supplier};
pub use error::{PlanError, PlanResult};
pub use flowplan::FlowPlan;
pub use loadplan::LoadPlan;
pub use model::Model;
pub use operation::{
    AlternateMember, Operation, OperationKind, PlanParameters, SearchMode, SplitMember,
};
pub use operationplan::OperationPlan;
pub use pegging::{PeggingEntry, PeggingIterator};
pub use plan::Plan;
pub use problem::{Problem, ProblemKind};
pub use resource::{Load, Resource, ResourceKind};
pub use setupmatrix::{SetupMatrix, SetupRule};
pub use solver::{
    available_solvers, create_solver, register_solver, solve_entity, Solvable, Solver,
    SolverHandle,
};
pub use timeline::{Event, EventKey, EventKind, Timeline};

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(
            Debug,
            Clone,
            Copy,
            PartialEq,
            Eq,
            Hash,
            PartialOrd,
            Ord,
            serde::Serialize,
            serde::Deserialize,
        )]
        #[serde(transparent)]
        pub struct $name(usize);

        impl $name {
            #[inline]
            pub fn new(value: usize) -> Self {
                $name(value)
            }
            #[inline]
            pub fn value(&self) -> usize {
                self.0
            }
        }
    };
}

typed_id!(
    /// Identifier of an [`Item`] in the model arena.
    ItemId
);
typed_id!(
    /// Identifier of a [`Location`].
    LocationId
);
typed_id!(
    /// Identifier of a [`Customer`].
    CustomerId
);
typed_id!(
    /// Identifier of a [`Supplier`].
    SupplierId
);
typed_id!(
    /// Identifier of a [`Skill`].
    SkillId
);
typed_id!(
    /// Identifier of a [`Calendar`].
    CalendarId
);
typed_id!(
    /// Identifier of a [`SetupMatrix`].
    SetupMatrixId
);
typed_id!(
    /// Identifier of an [`Operation`].
    OperationId
);
typed_id!(
    /// Identifier of a [`Buffer`].
    BufferId
);
typed_id!(
    /// Identifier of a [`Resource`].
    ResourceId
);
typed_id!(
    /// Identifier of a [`Flow`] (operation-to-buffer material arc).
    FlowId
);
typed_id!(
    /// Identifier of a [`Load`] (operation-to-resource capacity arc).
    LoadId
);
typed_id!(
    /// Identifier of a [`Demand`].
    DemandId
);
typed_id!(
    /// Arena identifier of an [`OperationPlan`]. Distinct from the
    /// lazily assigned external plan identifier.
    PlanId
);
typed_id!(
    /// Identifier of a [`FlowPlan`].
    FlowPlanId
);
typed_id!(
    /// Identifier of a [`LoadPlan`].
    LoadPlanId
);

/// Quantities closer than this to each other compare as equal.
pub const ROUNDING_ERROR: f64 = 1e-6;
