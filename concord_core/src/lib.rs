// Concord constraint-graph evaluation engine
//
// A declarative graph of typed musical/numeric variables related by weighted
// constraints, resolved one step at a time into deterministic, reproducible
// sequences. Resolution is greedy and ordered, not exhaustive: each variable
// takes its locally best value given what is already known, and when nothing
// fits it falls back and the step is flagged as degraded instead of failing.
//
// Architecture:
// - value.rs: Variable ids, types (numeric / discrete / sequence), values,
//   natural-order domain enumeration and fallbacks
// - store.rs: Variable store (typed slots in declaration order)
// - registry.rs: Constraint kinds, role signatures, the kind registry
// - kinds.rs: Built-in musical constraint kinds
// - graph.rs: Dependency graph, ordering edges, cycle detection, topological order
// - resolver.rs: The per-step greedy pass and `ResolutionResult`
// - session.rs: Step-axis state machine carrying the previous step forward
// - persist.rs: Saved graph JSON format
// - config.rs: `EngineConfig` (JSON, serde defaults)
// - error.rs: `EngineError`
//
// Authoring happens only between steps; the borrow checker enforces it since
// `Session::advance` takes `&mut self`.

pub mod config;
pub mod error;
pub mod graph;
pub mod kinds;
pub mod persist;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod store;
pub mod value;

pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use graph::{Constraint, ConstraintId, ConstraintSpec, DependencyGraph};
pub use persist::{SavedGraph, load_graph};
pub use registry::{Bound, ConstraintKind, ConstraintRegistry, HARD, Params, RoleTag};
pub use resolver::{DegradedStep, ResolutionResult, StepValues, resolve};
pub use session::{Session, SessionState};
pub use store::{Slot, VariableStore};
pub use value::{TieBreak, TypeFamily, Value, VarDecl, VarId, VarType};
