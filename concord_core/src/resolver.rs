// The resolver: one greedy, ordered, locally optimal pass per step.
//
// Pass structure:
// 1. Seed. Pinned variables keep their authored values. Inheriting
//    constraints (e.g. `hold`) copy the previous step's value of their
//    Previous variable into their Follow variable. Everything else starts
//    Unresolved.
// 2. Greedy. Walk `DependencyGraph::topological_order()`. For each
//    Unresolved variable, enumerate its domain in natural order (capped at
//    `max_candidates`) and score each candidate by the weighted violations of
//    the constraints touching it that are fully bound at that point.
// 3. Ties. `TieBreak::Smallest` keeps the first (smallest) candidate;
//    `TieBreak::Seeded` draws uniformly among the tied candidates from a
//    generator keyed by `(seed, variable id, step)`.
// 4. Degrade, don't abort. An empty domain, or one where every candidate is
//    a hard violation, gets the type's fallback value and is listed in the
//    result's degraded set.
// 5. Refine (optional). Coordinate-descent sweeps re-choose each free
//    variable with every neighbour bound, accepting only strict improvements,
//    so sweeps terminate and never undo a tie-break for nothing.
// 6. Aggregate. Sum weighted violations of all fully bound constraints in
//    constraint-id order; hard violations are counted, not summed.
//
// Cost per step is O(variables × candidates × touching constraints), with no
// backtracking, which is what lets a producer thread stay ahead of a
// real-time consumer.
//
// **Critical constraint: determinism.** Iteration orders are fixed
// (declaration order, topological order, constraint-id order), floating-point
// sums are accumulated in those orders, and the only randomness comes from
// keyed `StepRng`s. Same graph + same config + same step ⇒ same result.

use crate::config::EngineConfig;
use crate::graph::{Constraint, DependencyGraph};
use crate::registry::{HARD, RoleTag};
use crate::store::Slot;
use crate::value::{TieBreak, Value, VarId};
use concord_prng::StepRng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Resolved values of one step, keyed by variable id.
pub type StepValues = BTreeMap<VarId, Value>;

/// Immutable output of one resolver pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResolutionResult {
    step: u64,
    values: StepValues,
    total_violation: f64,
    hard_violations: u32,
    degraded: Vec<VarId>,
}

/// Quality signal raised when a step had to fall back for some variables.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DegradedStep {
    pub step: u64,
    pub variables: Vec<VarId>,
}

impl ResolutionResult {
    pub fn step(&self) -> u64 {
        self.step
    }

    pub fn values(&self) -> &StepValues {
        &self.values
    }

    pub fn get(&self, id: &VarId) -> Option<&Value> {
        self.values.get(id)
    }

    /// Sum of finite weighted violations.
    pub fn total_violation(&self) -> f64 {
        self.total_violation
    }

    /// Constraints left hard-violated by the final assignment.
    pub fn hard_violations(&self) -> u32 {
        self.hard_violations
    }

    /// Variables that received their fallback value, in resolution order.
    pub fn degraded(&self) -> &[VarId] {
        &self.degraded
    }

    pub fn is_degraded(&self) -> bool {
        !self.degraded.is_empty()
    }

    pub fn degraded_step(&self) -> Option<DegradedStep> {
        self.is_degraded().then(|| DegradedStep {
            step: self.step,
            variables: self.degraded.clone(),
        })
    }
}

/// A constraint with its bindings resolved to slot indices for this pass.
struct BoundConstraint<'g> {
    constraint: &'g Constraint,
    roles: SmallVec<[(RoleTag, usize); 4]>,
}

/// Working state of one pass.
struct Pass<'g> {
    slots: &'g [Slot],
    bound: Vec<BoundConstraint<'g>>,
    /// Per slot: indices into `bound` of constraints reading its current value.
    touching: Vec<SmallVec<[usize; 4]>>,
    previous: Option<&'g StepValues>,
    assign: Vec<Option<Value>>,
    /// Pinned or inherited: never re-chosen.
    fixed: Vec<bool>,
    step: u64,
    config: &'g EngineConfig,
}

/// Run one resolution pass for `step`, given the previous step's values.
pub fn resolve(
    graph: &DependencyGraph,
    previous: Option<&StepValues>,
    step: u64,
    config: &EngineConfig,
) -> ResolutionResult {
    let mut pass = Pass::new(graph, previous, step, config);
    pass.seed();

    let mut degraded = Vec::new();
    for id in graph.topological_order() {
        let Ok(i) = graph.store().index_of(id) else { continue };
        if pass.assign[i].is_some() {
            continue;
        }
        match pass.choose(i) {
            Some((value, _)) => pass.assign[i] = Some(value),
            None => {
                let fallback = pass.slots[i].ty().fallback();
                warn!(step, variable = %id, fallback = %fallback, "no finite candidate; using fallback");
                pass.assign[i] = Some(fallback);
                pass.fixed[i] = true;
                degraded.push(id.clone());
            }
        }
    }

    for sweep in 0..config.refine_sweeps {
        if !pass.refine(graph) {
            trace!(step, sweep, "refinement converged");
            break;
        }
    }

    let (total_violation, hard_violations) = pass.aggregate();
    let values: StepValues = pass
        .slots
        .iter()
        .zip(pass.assign)
        .map(|(slot, value)| (slot.id().clone(), value.unwrap_or_else(|| slot.ty().fallback())))
        .collect();

    debug!(
        step,
        total_violation,
        hard_violations,
        degraded = degraded.len(),
        "resolved step"
    );

    ResolutionResult {
        step,
        values,
        total_violation,
        hard_violations,
        degraded,
    }
}

impl<'g> Pass<'g> {
    fn new(
        graph: &'g DependencyGraph,
        previous: Option<&'g StepValues>,
        step: u64,
        config: &'g EngineConfig,
    ) -> Self {
        let slots = graph.variables();
        let mut bound = Vec::with_capacity(graph.constraint_count());
        let mut touching: Vec<SmallVec<[usize; 4]>> = vec![SmallVec::new(); slots.len()];

        for constraint in graph.constraints() {
            let roles: Option<SmallVec<[(RoleTag, usize); 4]>> = constraint
                .roles()
                .map(|(tag, var)| graph.store().index_of(var).ok().map(|idx| (tag, idx)))
                .collect();
            let Some(roles) = roles else { continue };
            let b = bound.len();
            for &(tag, idx) in &roles {
                if tag != RoleTag::Previous && touching[idx].last() != Some(&b) {
                    touching[idx].push(b);
                }
            }
            bound.push(BoundConstraint { constraint, roles });
        }

        let assign: Vec<Option<Value>> = slots.iter().map(|s| s.value.clone()).collect();
        let fixed = assign.iter().map(Option::is_some).collect();

        Self {
            slots,
            bound,
            touching,
            previous,
            assign,
            fixed,
            step,
            config,
        }
    }

    /// Apply inheritance from the previous step.
    fn seed(&mut self) {
        let Some(previous) = self.previous else { return };
        for bc in &self.bound {
            let Some((prev_role, follow_role)) = bc.constraint.kind().inheritance() else {
                continue;
            };
            let target = bc.roles[follow_role].1;
            if self.assign[target].is_some() {
                continue;
            }
            let source = &bc.constraint.bindings()[prev_role];
            let Some(value) = previous.get(source) else { continue };
            if self.slots[target].ty().check(value).is_ok() {
                self.assign[target] = Some(value.clone());
                self.fixed[target] = true;
            }
        }
    }

    /// Weighted violation of one constraint, or `None` if not fully bound.
    /// `candidate` overrides the assignment of one slot.
    fn constraint_score(&self, bc: &BoundConstraint<'_>, candidate: Option<(usize, &Value)>) -> Option<f64> {
        let mut values: SmallVec<[&Value; 4]> = SmallVec::new();
        for (role, &(tag, idx)) in bc.roles.iter().enumerate() {
            let value = match tag {
                RoleTag::Previous => self.previous?.get(&bc.constraint.bindings()[role])?,
                RoleTag::Lead | RoleTag::Follow => match candidate {
                    Some((slot, value)) if slot == idx => value,
                    _ => self.assign[idx].as_ref()?,
                },
            };
            values.push(value);
        }
        let raw = bc.constraint.kind().evaluate(&values, bc.constraint.params());
        Some(if raw.is_infinite() {
            HARD
        } else {
            raw * bc.constraint.weight()
        })
    }

    /// Sum of fully bound touching constraints with `value` placed at `slot`.
    fn local_score(&self, slot: usize, value: &Value) -> f64 {
        self.touching[slot]
            .iter()
            .filter_map(|&b| self.constraint_score(&self.bound[b], Some((slot, value))))
            .sum()
    }

    /// Best candidate for `slot` and its score; `None` if nothing finite.
    fn choose(&self, slot: usize) -> Option<(Value, f64)> {
        let decl = &self.slots[slot].decl;
        if decl.ty.domain_len() > self.config.max_candidates {
            trace!(
                variable = %decl.id,
                domain = decl.ty.domain_len(),
                cap = self.config.max_candidates,
                "domain truncated"
            );
        }

        let mut best = HARD;
        let mut tied: Vec<Value> = Vec::new();
        for candidate in decl.ty.domain().take(self.config.max_candidates) {
            let score = self.local_score(slot, &candidate);
            if score < best {
                best = score;
                tied.clear();
                tied.push(candidate);
            } else if score == best && score.is_finite() {
                tied.push(candidate);
            }
        }

        let pick = match decl.tie_break {
            TieBreak::Smallest => 0,
            TieBreak::Seeded => StepRng::keyed(self.config.seed, decl.id.as_str().as_bytes(), self.step)
                .choose_index(tied.len())?,
        };
        if pick >= tied.len() {
            return None;
        }
        Some((tied.swap_remove(pick), best))
    }

    /// One coordinate-descent sweep. Returns whether anything changed.
    fn refine(&mut self, graph: &DependencyGraph) -> bool {
        let mut changed = false;
        for id in graph.topological_order() {
            let Ok(i) = graph.store().index_of(id) else { continue };
            if self.fixed[i] {
                continue;
            }
            let Some(current) = self.assign[i].take() else { continue };
            let current_score = self.local_score(i, &current);
            match self.choose(i) {
                Some((value, score)) if score < current_score => {
                    self.assign[i] = Some(value);
                    changed = true;
                }
                _ => self.assign[i] = Some(current),
            }
        }
        changed
    }

    fn aggregate(&self) -> (f64, u32) {
        let mut total = 0.0;
        let mut hard = 0;
        for bc in &self.bound {
            match self.constraint_score(bc, None) {
                Some(score) if score.is_infinite() => hard += 1,
                Some(score) => total += score,
                None => {}
            }
        }
        (total, hard)
    }
}
