// Parameter export: resolved values as timed audio-parameter events.
//
// A `ParameterMap` binds variables to named parameters of a synth or effect.
// Binding captures the variable's type, so converting a result later needs
// no access to the graph:
//
// - numeric   → the number itself
// - discrete  → the symbol's index in the declared set
// - sequence  → one event per element (symbol index), spread evenly across
//   the step with a sub-step offset
//
// Variables missing from a result (removed between steps) produce no event.

use crate::clock::StepClock;
use concord_core::{DependencyGraph, EngineResult, ResolutionResult, Value, VarId, VarType};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterEvent {
    pub parameter: String,
    /// Seconds from the start of step 1.
    pub time: f64,
    pub value: f64,
    /// Element position for sequence variables.
    pub element: Option<usize>,
}

#[derive(Clone, Debug)]
struct ParameterBinding {
    variable: VarId,
    parameter: String,
    ty: VarType,
}

#[derive(Clone, Debug, Default)]
pub struct ParameterMap {
    bindings: Vec<ParameterBinding>,
}

impl ParameterMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `variable` to `parameter`. Fails if the variable is not declared.
    pub fn bind(
        &mut self,
        graph: &DependencyGraph,
        variable: impl Into<VarId>,
        parameter: impl Into<String>,
    ) -> EngineResult<()> {
        let variable = variable.into();
        let ty = graph.variable(&variable)?.ty().clone();
        self.bindings.push(ParameterBinding {
            variable,
            parameter: parameter.into(),
            ty,
        });
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Convert one result into events, in binding order.
    pub fn parameter_events(&self, result: &ResolutionResult, clock: &StepClock) -> Vec<ParameterEvent> {
        let start = clock.step_start(result.step());
        let mut events = Vec::with_capacity(self.bindings.len());
        for binding in &self.bindings {
            let Some(value) = result.get(&binding.variable) else {
                continue;
            };
            match value {
                Value::Number(x) => events.push(ParameterEvent {
                    parameter: binding.parameter.clone(),
                    time: start,
                    value: *x,
                    element: None,
                }),
                Value::Symbol(s) => {
                    if let Some(index) = binding.ty.symbol_index(s) {
                        events.push(ParameterEvent {
                            parameter: binding.parameter.clone(),
                            time: start,
                            value: index as f64,
                            element: None,
                        });
                    }
                }
                Value::Sequence(items) => {
                    let slice = clock.seconds_per_step() / items.len().max(1) as f64;
                    for (k, item) in items.iter().enumerate() {
                        if let Some(index) = binding.ty.symbol_index(item) {
                            events.push(ParameterEvent {
                                parameter: binding.parameter.clone(),
                                time: start + k as f64 * slice,
                                value: index as f64,
                                element: Some(k),
                            });
                        }
                    }
                }
            }
        }
        events
    }
}
