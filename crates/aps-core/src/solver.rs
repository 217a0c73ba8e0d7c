//! The solver scaffold: a double-dispatch visitor that planning
//! strategies implement, plus a global registry they plug into.
//!
//! The core defines the entry points per entity type; every default
//! raises a logic error so an unsupported combination is caught
//! instead of silently skipped. Concrete strategies (MRP propagation,
//! inventory policies, ...) live outside the core and register a
//! constructor under a name.

use crate::error::{PlanError, PlanResult};
use crate::model::Model;
use crate::{BufferId, DemandId, FlowId, LoadId, OperationId, ResourceId};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::debug;

/// A solver strategy. Implementations override the entity types they
/// know how to plan; the rest fail fast.
pub trait Solver: Send {
    /// Name of the solver instance, for tracing and registries.
    fn name(&self) -> &str;

    /// How verbose the solver traces: 0 silent, 1 high-level progress,
    /// 2 and up solver-specific debugging.
    fn log_level(&self) -> u16 {
        0
    }

    /// Solve the complete planning problem.
    fn solve(&mut self, model: &mut Model) -> PlanResult<()>;

    fn solve_demand(&mut self, _model: &mut Model, _demand: DemandId) -> PlanResult<()> {
        Err(PlanError::logic("Called undefined solve(Demand) method"))
    }

    fn solve_operation(&mut self, _model: &mut Model, _operation: OperationId) -> PlanResult<()> {
        Err(PlanError::logic("Called undefined solve(Operation) method"))
    }

    fn solve_buffer(&mut self, _model: &mut Model, _buffer: BufferId) -> PlanResult<()> {
        Err(PlanError::logic("Called undefined solve(Buffer) method"))
    }

    fn solve_resource(&mut self, _model: &mut Model, _resource: ResourceId) -> PlanResult<()> {
        Err(PlanError::logic("Called undefined solve(Resource) method"))
    }

    fn solve_flow(&mut self, _model: &mut Model, _flow: FlowId) -> PlanResult<()> {
        Err(PlanError::logic("Called undefined solve(Flow) method"))
    }

    fn solve_load(&mut self, _model: &mut Model, _load: LoadId) -> PlanResult<()> {
        Err(PlanError::logic("Called undefined solve(Load) method"))
    }
}

/// A boxed solver instance produced by the registry.
pub type SolverHandle = Box<dyn Solver>;

/// Anything a solver can be pointed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Solvable {
    Demand(DemandId),
    Operation(OperationId),
    Buffer(BufferId),
    Resource(ResourceId),
    Flow(FlowId),
    Load(LoadId),
}

/// Dispatch a solvable entity to the matching solver entry point.
pub fn solve_entity(
    solver: &mut dyn Solver,
    model: &mut Model,
    target: Solvable,
) -> PlanResult<()> {
    if solver.log_level() > 0 {
        debug!(solver = solver.name(), ?target, "dispatching");
    }
    match target {
        Solvable::Demand(d) => solver.solve_demand(model, d),
        Solvable::Operation(o) => solver.solve_operation(model, o),
        Solvable::Buffer(b) => solver.solve_buffer(model, b),
        Solvable::Resource(r) => solver.solve_resource(model, r),
        Solvable::Flow(f) => solver.solve_flow(model, f),
        Solvable::Load(l) => solver.solve_load(model, l),
    }
}

type SolverConstructor = fn() -> SolverHandle;

static SOLVER_REGISTRY: Lazy<RwLock<HashMap<String, SolverConstructor>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

fn normalize(name: &str) -> String {
    name.to_ascii_lowercase()
}

/// Register a solver constructor under a name. Returns false when the
/// name was already taken (the older registration wins).
pub fn register_solver(name: &str, constructor: SolverConstructor) -> bool {
    let mut registry = SOLVER_REGISTRY
        .write()
        .expect("solver registry lock poisoned");
    let key = normalize(name);
    if registry.contains_key(&key) {
        return false;
    }
    registry.insert(key, constructor);
    true
}

/// Instantiate a registered solver by name.
pub fn create_solver(name: &str) -> PlanResult<SolverHandle> {
    let registry = SOLVER_REGISTRY
        .read()
        .expect("solver registry lock poisoned");
    match registry.get(&normalize(name)) {
        Some(ctor) => Ok(ctor()),
        None => Err(PlanError::data(format!(
            "unknown solver '{}'; registered: {}",
            name,
            available_solvers().join(", ")
        ))),
    }
}

/// Names of every registered solver, sorted.
pub fn available_solvers() -> Vec<String> {
    let registry = SOLVER_REGISTRY
        .read()
        .expect("solver registry lock poisoned");
    let mut names: Vec<String> = registry.keys().cloned().collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSolver;

    impl Solver for NullSolver {
        fn name(&self) -> &str {
            "null"
        }

        fn solve(&mut self, _model: &mut Model) -> PlanResult<()> {
            Ok(())
        }

        fn solve_demand(&mut self, _model: &mut Model, _demand: DemandId) -> PlanResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_default_overloads_raise_logic_errors() {
        let mut model = Model::new();
        let mut solver = NullSolver;
        let op = model
            .add_operation(crate::operation::Operation::fixed_time(
                "A",
                chrono::Duration::hours(1),
            ))
            .unwrap();
        let err = solve_entity(&mut solver, &mut model, Solvable::Operation(op)).unwrap_err();
        assert!(matches!(err, PlanError::Logic(_)));
    }

    #[test]
    fn test_overridden_entry_point_is_used() {
        let mut model = Model::new();
        let mut solver = NullSolver;
        let d = model
            .add_demand(crate::demand::Demand::new(
                "D",
                1.0,
                crate::dates::date(2024, 1, 1, 0, 0, 0),
            ))
            .unwrap();
        assert!(solve_entity(&mut solver, &mut model, Solvable::Demand(d)).is_ok());
    }

    #[test]
    fn test_registry_roundtrip() {
        assert!(register_solver("test-null", || Box::new(NullSolver)));
        // Second registration under the same name is refused.
        assert!(!register_solver("Test-Null", || Box::new(NullSolver)));
        let solver = create_solver("TEST-NULL").unwrap();
        assert_eq!(solver.name(), "null");
        assert!(available_solvers().contains(&"test-null".to_string()));
        assert!(matches!(create_solver("missing"), Err(PlanError::Data(_))));
    }
}
