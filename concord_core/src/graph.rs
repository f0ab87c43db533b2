// Dependency graph: variables plus the constraints that relate them.
//
// The graph is bipartite (variable nodes, constraint nodes), but the only
// structure the resolver needs from it is a per-step evaluation order. That
// order comes from ordering-sensitive constraints: each one adds an edge from
// every variable bound to a `Lead` role to every variable bound to a `Follow`
// role. `Previous` roles read last step's frozen values and add no edges, so
// recurrences never make a step cyclic.
//
// Order is Kahn's algorithm with the ready set keyed by declaration index:
// among variables with no pending dependencies, the one declared first goes
// first. The order is recomputed and cached on every structural edit, which
// is also where cycles are caught: a constraint that would leave variables
// unorderable is rejected with `CyclicDependency` and the graph is left
// exactly as it was.
//
// All edits are all-or-nothing and bump `generation`, which sessions use to
// notice that the graph changed between steps.
//
// See also: `registry.rs` for role tags, `resolver.rs` for the pass that
// walks `topological_order()`, `persist.rs` for the saved form.

use crate::error::{EngineError, EngineResult};
use crate::registry::{ConstraintKind, ConstraintRegistry, Params, RoleTag};
use crate::store::{Slot, VariableStore};
use crate::value::{Value, VarDecl, VarId};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

/// Monotonically allocated constraint identifier; never reused within a graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConstraintId(pub u32);

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

fn default_weight() -> f64 {
    1.0
}

/// Authoring description of a constraint: kind name, bindings in role order,
/// weight and parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConstraintSpec {
    pub kind: String,
    pub bindings: Vec<VarId>,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: Params,
}

impl ConstraintSpec {
    pub fn new<V: Into<VarId>>(kind: impl Into<String>, bindings: impl IntoIterator<Item = V>) -> Self {
        Self {
            kind: kind.into(),
            bindings: bindings.into_iter().map(Into::into).collect(),
            weight: 1.0,
            params: Params::new(),
        }
    }

    pub fn weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn param(mut self, name: impl Into<String>, value: f64) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// A constraint attached to a graph, with its kind already resolved.
#[derive(Clone, Debug)]
pub struct Constraint {
    id: ConstraintId,
    kind: Arc<ConstraintKind>,
    bindings: SmallVec<[VarId; 4]>,
    weight: f64,
    params: Params,
}

impl Constraint {
    pub fn id(&self) -> ConstraintId {
        self.id
    }

    pub fn kind(&self) -> &ConstraintKind {
        &self.kind
    }

    pub fn bindings(&self) -> &[VarId] {
        &self.bindings
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn binds(&self, id: &VarId) -> bool {
        self.bindings.iter().any(|b| b == id)
    }

    /// `(role tag, variable)` pairs in role order.
    pub fn roles(&self) -> impl Iterator<Item = (RoleTag, &VarId)> {
        self.kind.roles().iter().map(|r| r.tag).zip(self.bindings.iter())
    }

    /// Back to the authoring form (used when saving).
    pub fn to_spec(&self) -> ConstraintSpec {
        ConstraintSpec {
            kind: self.kind.name().to_string(),
            bindings: self.bindings.to_vec(),
            weight: self.weight,
            params: self.params.clone(),
        }
    }
}

#[derive(Clone)]
pub struct DependencyGraph {
    registry: Arc<ConstraintRegistry>,
    store: VariableStore,
    constraints: BTreeMap<ConstraintId, Constraint>,
    next_constraint: u32,
    generation: u64,
    order: Vec<VarId>,
}

impl DependencyGraph {
    pub fn new(registry: Arc<ConstraintRegistry>) -> Self {
        Self {
            registry,
            store: VariableStore::new(),
            constraints: BTreeMap::new(),
            next_constraint: 0,
            generation: 0,
            order: Vec::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ConstraintRegistry> {
        &self.registry
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn variable(&self, id: &VarId) -> EngineResult<&Slot> {
        self.store.slot(id)
    }

    /// Declared variables in declaration order.
    pub fn variables(&self) -> &[Slot] {
        self.store.slots()
    }

    pub fn constraint(&self, id: ConstraintId) -> EngineResult<&Constraint> {
        self.constraints
            .get(&id)
            .ok_or(EngineError::UnknownConstraint(id.0))
    }

    /// Constraints in id order.
    pub fn constraints(&self) -> impl Iterator<Item = &Constraint> {
        self.constraints.values()
    }

    pub fn constraint_count(&self) -> usize {
        self.constraints.len()
    }

    // -----------------------------------------------------------------------
    // Variables
    // -----------------------------------------------------------------------

    pub fn add_variable(&mut self, decl: VarDecl) -> EngineResult<()> {
        self.store.declare(decl)?;
        self.refresh_order();
        Ok(())
    }

    /// Remove an unbound variable. Fails with `VariableInUse` while any
    /// constraint still references it.
    pub fn remove_variable(&mut self, id: &VarId) -> EngineResult<()> {
        let in_use = self.constraints.values().filter(|c| c.binds(id)).count();
        if in_use > 0 {
            return Err(EngineError::VariableInUse {
                id: id.clone(),
                constraints: in_use,
            });
        }
        self.store.remove(id)?;
        self.refresh_order();
        Ok(())
    }

    /// Fix a variable to an authored value; the resolver will not choose it.
    pub fn pin(&mut self, id: &VarId, value: Value) -> EngineResult<()> {
        self.store.set(id, value)?;
        self.generation += 1;
        Ok(())
    }

    pub fn unpin(&mut self, id: &VarId) -> EngineResult<()> {
        self.store.reset(id)?;
        self.generation += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Constraints
    // -----------------------------------------------------------------------

    pub fn add_constraint(&mut self, spec: ConstraintSpec) -> EngineResult<ConstraintId> {
        let id = ConstraintId(self.next_constraint);
        self.insert_constraint(id, spec)?;
        Ok(id)
    }

    /// Attach a constraint under a specific id (used when loading a saved
    /// graph so ids survive a round trip).
    pub(crate) fn insert_constraint(&mut self, id: ConstraintId, spec: ConstraintSpec) -> EngineResult<()> {
        if self.constraints.contains_key(&id) {
            return Err(EngineError::DuplicateConstraint(id.0));
        }
        let next = id.0.checked_add(1).ok_or(EngineError::ConstraintIdsExhausted)?;
        let constraint = self.build_constraint(id, spec)?;

        let order = compute_order(&self.store, self.constraints.values().chain([&constraint]))
            .map_err(|at| EngineError::CyclicDependency(self.store.slots()[at].id().clone()))?;

        self.constraints.insert(id, constraint);
        self.next_constraint = self.next_constraint.max(next);
        self.order = order;
        self.generation += 1;
        Ok(())
    }

    pub fn remove_constraint(&mut self, id: ConstraintId) -> EngineResult<Constraint> {
        let removed = self
            .constraints
            .remove(&id)
            .ok_or(EngineError::UnknownConstraint(id.0))?;
        self.refresh_order();
        Ok(removed)
    }

    pub fn set_weight(&mut self, id: ConstraintId, weight: f64) -> EngineResult<()> {
        check_weight(weight)?;
        let constraint = self
            .constraints
            .get_mut(&id)
            .ok_or(EngineError::UnknownConstraint(id.0))?;
        constraint.weight = weight;
        self.generation += 1;
        Ok(())
    }

    fn build_constraint(&self, id: ConstraintId, spec: ConstraintSpec) -> EngineResult<Constraint> {
        let kind = self.registry.lookup(&spec.kind)?;
        if spec.bindings.len() != kind.roles().len() {
            return Err(EngineError::ArityMismatch {
                kind: spec.kind,
                expected: kind.roles().len(),
                got: spec.bindings.len(),
            });
        }
        for (role, var) in kind.roles().iter().zip(&spec.bindings) {
            let slot = self.store.slot(var)?;
            if !role.family.accepts(slot.ty()) {
                return Err(EngineError::type_mismatch(
                    var,
                    format!(
                        "role `{}` of `{}` accepts {:?}, variable is {:?}",
                        role.name,
                        kind.name(),
                        role.family,
                        slot.ty().family()
                    ),
                ));
            }
        }
        check_weight(spec.weight)?;
        Ok(Constraint {
            id,
            kind,
            bindings: spec.bindings.into_iter().collect(),
            weight: spec.weight,
            params: spec.params,
        })
    }

    // -----------------------------------------------------------------------
    // Ordering
    // -----------------------------------------------------------------------

    /// Variables in per-step resolution order.
    pub fn topological_order(&self) -> impl Iterator<Item = &VarId> {
        self.order.iter()
    }

    /// Recompute the cached order after an edit that cannot add an edge.
    fn refresh_order(&mut self) {
        // Removing edges or adding isolated variables never creates a cycle,
        // so this cannot fail for a graph that was acyclic before the edit.
        if let Ok(order) = compute_order(&self.store, self.constraints.values()) {
            self.order = order;
        }
        self.generation += 1;
    }
}

impl fmt::Debug for DependencyGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyGraph")
            .field("variables", &self.store.len())
            .field("constraints", &self.constraints.len())
            .field("generation", &self.generation)
            .finish()
    }
}

fn check_weight(weight: f64) -> EngineResult<()> {
    if weight.is_finite() && weight >= 0.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidWeight(weight))
    }
}

/// Kahn's algorithm over ordering edges. On a cycle, returns the slot index
/// of a variable that lies on it.
fn compute_order<'a>(
    store: &VariableStore,
    constraints: impl Iterator<Item = &'a Constraint>,
) -> Result<Vec<VarId>, usize> {
    let n = store.len();
    let mut successors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
    let mut predecessors: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];

    for constraint in constraints.filter(|c| c.kind().is_ordering_sensitive()) {
        let mut leads: SmallVec<[usize; 4]> = SmallVec::new();
        let mut follows: SmallVec<[usize; 4]> = SmallVec::new();
        for (tag, var) in constraint.roles() {
            // Bindings were validated on attach; a miss means the variable
            // was removed, which `remove_variable` forbids.
            let Ok(idx) = store.index_of(var) else { continue };
            match tag {
                RoleTag::Lead => leads.push(idx),
                RoleTag::Follow => follows.push(idx),
                RoleTag::Previous => {}
            }
        }
        for &from in &leads {
            for &to in &follows {
                successors[from].insert(to);
                predecessors[to].insert(from);
            }
        }
    }

    let mut in_degree: Vec<usize> = predecessors.iter().map(BTreeSet::len).collect();
    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(next) = ready.pop_first() {
        order.push(store.slots()[next].id().clone());
        for &succ in &successors[next] {
            in_degree[succ] -= 1;
            if in_degree[succ] == 0 {
                ready.insert(succ);
            }
        }
    }

    if order.len() == n {
        return Ok(order);
    }

    // Every leftover variable still has a leftover predecessor. Walking
    // predecessors from any of them must revisit a node, and that node is on
    // a cycle.
    let Some(start) = (0..n).find(|&i| in_degree[i] > 0) else {
        return Ok(order);
    };
    let mut seen = BTreeSet::new();
    let mut at = start;
    while seen.insert(at) {
        match predecessors[at].iter().find(|&&p| in_degree[p] > 0) {
            Some(&p) => at = p,
            None => break,
        }
    }
    Err(at)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph() -> DependencyGraph {
        DependencyGraph::new(Arc::new(ConstraintRegistry::with_builtins()))
    }

    fn ids(graph: &DependencyGraph) -> Vec<&str> {
        graph.topological_order().map(VarId::as_str).collect()
    }

    #[test]
    fn independent_variables_keep_declaration_order() {
        let mut g = graph();
        for name in ["c", "a", "b"] {
            g.add_variable(VarDecl::int_range(name, 0, 3)).unwrap();
        }
        assert_eq!(ids(&g), vec!["c", "a", "b"]);
    }

    #[test]
    fn ordering_sensitive_constraint_reorders() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("melody", 60, 72)).unwrap();
        g.add_variable(VarDecl::int_range("bass", 36, 48)).unwrap();
        g.add_constraint(ConstraintSpec::new("interval_at_most", ["bass", "melody"]))
            .unwrap();
        assert_eq!(ids(&g), vec!["bass", "melody"]);
    }

    #[test]
    fn order_insensitive_constraints_add_no_edges() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("a", 0, 3)).unwrap();
        g.add_variable(VarDecl::int_range("b", 0, 3)).unwrap();
        g.add_constraint(ConstraintSpec::new("equals", ["b", "a"])).unwrap();
        assert_eq!(ids(&g), vec!["a", "b"]);
    }

    #[test]
    fn self_edge_is_a_cycle() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("a", 0, 3)).unwrap();
        let err = g
            .add_constraint(ConstraintSpec::new("interval_at_most", ["a", "a"]))
            .unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(id) if id.as_str() == "a"));
        assert_eq!(g.constraint_count(), 0);
    }

    #[test]
    fn remove_variable_in_use_is_rejected() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("a", 0, 3)).unwrap();
        g.add_variable(VarDecl::int_range("b", 0, 3)).unwrap();
        let cid = g.add_constraint(ConstraintSpec::new("equals", ["a", "b"])).unwrap();
        assert!(matches!(
            g.remove_variable(&"a".into()),
            Err(EngineError::VariableInUse { constraints: 1, .. })
        ));
        g.remove_constraint(cid).unwrap();
        g.remove_variable(&"a".into()).unwrap();
        assert_eq!(ids(&g), vec!["b"]);
    }

    #[test]
    fn attach_validation_leaves_graph_unchanged() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("pitch", 60, 72)).unwrap();
        g.add_variable(VarDecl::discrete("chord", ["I", "IV", "V"])).unwrap();
        let before = g.generation();

        assert!(matches!(
            g.add_constraint(ConstraintSpec::new("no_such_kind", ["pitch"])),
            Err(EngineError::UnknownConstraintKind(_))
        ));
        assert!(matches!(
            g.add_constraint(ConstraintSpec::new("equals", ["pitch"])),
            Err(EngineError::ArityMismatch { expected: 2, got: 1, .. })
        ));
        assert!(matches!(
            g.add_constraint(ConstraintSpec::new("prefer", ["chord"])),
            Err(EngineError::TypeMismatch { .. })
        ));
        assert!(matches!(
            g.add_constraint(ConstraintSpec::new("prefer", ["ghost"])),
            Err(EngineError::UnknownVariable(_))
        ));
        assert!(matches!(
            g.add_constraint(ConstraintSpec::new("prefer", ["pitch"]).weight(-1.0)),
            Err(EngineError::InvalidWeight(_))
        ));

        assert_eq!(g.constraint_count(), 0);
        assert_eq!(g.generation(), before);
    }

    #[test]
    fn constraint_ids_are_not_reused() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("a", 0, 3)).unwrap();
        let first = g.add_constraint(ConstraintSpec::new("prefer", ["a"])).unwrap();
        g.remove_constraint(first).unwrap();
        let second = g.add_constraint(ConstraintSpec::new("prefer", ["a"])).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn exhausted_constraint_ids_are_rejected() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("a", 0, 3)).unwrap();
        g.insert_constraint(ConstraintId(u32::MAX - 1), ConstraintSpec::new("prefer", ["a"]))
            .unwrap();
        let generation = g.generation();

        let err = g.add_constraint(ConstraintSpec::new("prefer", ["a"])).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintIdsExhausted));
        assert_eq!(g.constraint_count(), 1);
        assert_eq!(g.generation(), generation);
    }

    #[test]
    fn pin_checks_type() {
        let mut g = graph();
        g.add_variable(VarDecl::int_range("a", 0, 3)).unwrap();
        assert!(g.pin(&"a".into(), Value::Number(9.0)).is_err());
        g.pin(&"a".into(), Value::Number(2.0)).unwrap();
        assert_eq!(g.variable(&"a".into()).unwrap().value, Some(Value::Number(2.0)));
    }
}
