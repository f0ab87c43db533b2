// Weight calibration against a reference trace.
//
// Constraints the reference material satisfies well should weigh more than
// the ones it routinely ignores. For every constraint we take its raw
// (unweighted) violation at each trace step where all of its roles are
// bound, with `Previous` roles read from the preceding trace step, and
// average. The new weight is `1 / (mean + epsilon)`, then all new weights are
// scaled so their mean is 1.
//
// Constraints that the trace hard-violates at least once are not reweighted:
// they keep their weight and are listed in `hard`, since no finite weight
// expresses "the music breaks this rule". Constraints that are never fully
// bound by the trace are listed in `unobserved` and also keep their weight.
//
// Calibration only reads the graph. `Calibration::apply` writes the weights
// back through `DependencyGraph::set_weight`.

use crate::trace::VariableTrace;
use concord_core::{
    Constraint, ConstraintId, DependencyGraph, EngineResult, RoleTag, StepValues, Value,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Added to every mean so a never-violated constraint gets a finite weight.
    pub epsilon: f64,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self { epsilon: 0.1 }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Calibration {
    /// New weights for reweighted constraints.
    pub weights: BTreeMap<ConstraintId, f64>,
    /// Mean raw violation per observed, finite constraint.
    pub mean_violation: BTreeMap<ConstraintId, f64>,
    pub hard: Vec<ConstraintId>,
    pub unobserved: Vec<ConstraintId>,
    /// Weighted trace violation under the old weights.
    pub loss_before: f64,
    /// Weighted trace violation under the new weights.
    pub loss_after: f64,
}

impl Calibration {
    /// Write the calibrated weights back. Either every weight is written or,
    /// if a constraint has since been removed, none is.
    pub fn apply(&self, graph: &mut DependencyGraph) -> EngineResult<()> {
        for &id in self.weights.keys() {
            graph.constraint(id)?;
        }
        for (&id, &weight) in &self.weights {
            graph.set_weight(id, weight)?;
        }
        info!(
            constraints = self.weights.len(),
            loss_before = self.loss_before,
            loss_after = self.loss_after,
            "applied calibrated weights"
        );
        Ok(())
    }
}

/// Raw violation of `constraint` at trace index `index`, if fully bound.
fn raw_violation(constraint: &Constraint, trace: &VariableTrace, index: usize) -> Option<f64> {
    let steps = trace.steps();
    let current: &StepValues = steps.get(index)?;
    let previous: Option<&StepValues> = index.checked_sub(1).and_then(|i| steps.get(i));
    let values: Vec<&Value> = constraint
        .roles()
        .map(|(tag, id)| match tag {
            RoleTag::Previous => previous?.get(id),
            RoleTag::Lead | RoleTag::Follow => current.get(id),
        })
        .collect::<Option<_>>()?;
    Some(constraint.kind().evaluate(&values, constraint.params()))
}

/// Sum of weighted finite violations over the whole trace, with `weight_of`
/// supplying each constraint's weight.
fn weighted_loss(
    graph: &DependencyGraph,
    trace: &VariableTrace,
    weight_of: impl Fn(&Constraint) -> f64,
) -> f64 {
    let mut loss = 0.0;
    for constraint in graph.constraints() {
        let weight = weight_of(constraint);
        for index in 0..trace.len() {
            if let Some(raw) = raw_violation(constraint, trace, index) {
                if raw.is_finite() {
                    loss += weight * raw;
                }
            }
        }
    }
    loss
}

/// Weighted violation of the trace under the graph's current weights.
pub fn trace_loss(graph: &DependencyGraph, trace: &VariableTrace) -> f64 {
    weighted_loss(graph, trace, Constraint::weight)
}

pub fn calibrate(graph: &DependencyGraph, trace: &VariableTrace, config: &CalibrationConfig) -> Calibration {
    let mut mean_violation = BTreeMap::new();
    let mut hard = Vec::new();
    let mut unobserved = Vec::new();

    for constraint in graph.constraints() {
        let mut sum = 0.0;
        let mut count = 0usize;
        let mut is_hard = false;
        for index in 0..trace.len() {
            match raw_violation(constraint, trace, index) {
                Some(raw) if raw.is_infinite() => is_hard = true,
                Some(raw) => {
                    sum += raw;
                    count += 1;
                }
                None => {}
            }
        }
        if is_hard {
            hard.push(constraint.id());
        } else if count == 0 {
            unobserved.push(constraint.id());
        } else {
            mean_violation.insert(constraint.id(), sum / count as f64);
        }
    }

    let epsilon = config.epsilon.max(f64::MIN_POSITIVE);
    let raw_weights: BTreeMap<ConstraintId, f64> = mean_violation
        .iter()
        .map(|(&id, &mean)| (id, 1.0 / (mean + epsilon)))
        .collect();
    let mean_weight = if raw_weights.is_empty() {
        1.0
    } else {
        raw_weights.values().sum::<f64>() / raw_weights.len() as f64
    };
    let weights: BTreeMap<ConstraintId, f64> = raw_weights
        .into_iter()
        .map(|(id, w)| (id, w / mean_weight))
        .collect();

    let loss_before = trace_loss(graph, trace);
    let loss_after = weighted_loss(graph, trace, |c| {
        weights.get(&c.id()).copied().unwrap_or_else(|| c.weight())
    });

    Calibration {
        weights,
        mean_violation,
        hard,
        unobserved,
        loss_before,
        loss_after,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_core::{ConstraintRegistry, ConstraintSpec, VarDecl, VarId};
    use std::sync::Arc;

    fn step(pairs: &[(&str, f64)]) -> StepValues {
        pairs
            .iter()
            .map(|&(id, x)| (VarId::from(id), Value::Number(x)))
            .collect()
    }

    fn graph() -> (DependencyGraph, [ConstraintId; 4]) {
        let mut g = DependencyGraph::new(Arc::new(ConstraintRegistry::with_builtins()));
        g.add_variable(VarDecl::int_range("p", 0, 127)).unwrap();
        g.add_variable(VarDecl::int_range("q", 0, 127)).unwrap();
        let smooth = g.add_constraint(ConstraintSpec::new("smooth_motion", ["p", "p"])).unwrap();
        let far = g
            .add_constraint(ConstraintSpec::new("prefer", ["p"]).param("target", 0.0))
            .unwrap();
        let forbid = g
            .add_constraint(ConstraintSpec::new("forbid", ["p"]).param("value", 62.0))
            .unwrap();
        let unbound = g.add_constraint(ConstraintSpec::new("equals", ["p", "q"])).unwrap();
        (g, [smooth, far, forbid, unbound])
    }

    #[test]
    fn reweights_by_inverse_mean_violation() {
        let (g, [smooth, far, forbid, unbound]) = graph();
        let trace = VariableTrace::from_steps(vec![
            step(&[("p", 60.0)]),
            step(&[("p", 62.0)]),
            step(&[("p", 60.0)]),
        ]);
        let cal = calibrate(&g, &trace, &CalibrationConfig { epsilon: 1.0 });

        // smooth: leaps of 2 → mean 2 → 1/3. far: mean 60.67 → ~1/61.67.
        assert_eq!(cal.mean_violation[&smooth], 2.0);
        assert!(cal.weights[&smooth] > cal.weights[&far]);
        let mean: f64 = cal.weights.values().sum::<f64>() / cal.weights.len() as f64;
        assert!((mean - 1.0).abs() < 1e-12);

        assert_eq!(cal.hard, vec![forbid]);
        assert_eq!(cal.unobserved, vec![unbound]);
        assert!(!cal.weights.contains_key(&forbid));
        assert!(cal.loss_after < cal.loss_before);
    }

    #[test]
    fn apply_writes_weights_back() {
        let (mut g, [smooth, far, _, unbound]) = graph();
        let trace = VariableTrace::from_steps(vec![step(&[("p", 10.0)]), step(&[("p", 11.0)])]);
        let cal = calibrate(&g, &trace, &CalibrationConfig::default());
        cal.apply(&mut g).unwrap();
        assert_eq!(g.constraint(smooth).unwrap().weight(), cal.weights[&smooth]);
        assert_eq!(g.constraint(far).unwrap().weight(), cal.weights[&far]);
        assert_eq!(g.constraint(unbound).unwrap().weight(), 1.0);
        assert!((trace_loss(&g, &trace) - cal.loss_after).abs() < 1e-9);
    }

    #[test]
    fn apply_after_removal_changes_nothing() {
        let (mut g, [smooth, far, _, _]) = graph();
        let trace = VariableTrace::from_steps(vec![step(&[("p", 10.0)]), step(&[("p", 11.0)])]);
        let cal = calibrate(&g, &trace, &CalibrationConfig::default());
        g.remove_constraint(far).unwrap();
        let generation = g.generation();

        assert!(cal.apply(&mut g).is_err());
        assert_eq!(g.constraint(smooth).unwrap().weight(), 1.0);
        assert_eq!(g.generation(), generation);
    }
}
