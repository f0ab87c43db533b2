// Saved graph format.
//
// A `SavedGraph` is the JSON form of a `DependencyGraph`: every variable
// declaration (with pinned values), every constraint with its id, bindings,
// weight and parameters, and the names of the kinds it uses. Kinds themselves
// are code, so loading takes a registry and resolves each name against it.
//
// Loading replays the normal authoring operations (`add_variable`,
// `insert_constraint`, `pin`), so a hand-edited file gets exactly the same
// validation as a graph built in code. Constraint ids are preserved.
//
// ```json
// {
//   "format_version": 1,
//   "variables": [{"id": "pitch", "type": "numeric", "min": 60, "max": 72, "step": 1}],
//   "constraints": [{"id": 0, "kind": "prefer", "bindings": ["pitch"], "params": {"target": 64}}],
//   "kinds": ["prefer"]
// }
// ```

use crate::error::{EngineError, EngineResult};
use crate::graph::{ConstraintId, ConstraintSpec, DependencyGraph};
use crate::registry::ConstraintRegistry;
use crate::store::Slot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

pub const FORMAT_VERSION: u32 = 1;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedConstraint {
    pub id: ConstraintId,
    #[serde(flatten)]
    pub spec: ConstraintSpec,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SavedGraph {
    pub format_version: u32,
    pub variables: Vec<Slot>,
    pub constraints: Vec<SavedConstraint>,
    /// Kind names referenced by `constraints`, sorted.
    #[serde(default)]
    pub kinds: Vec<String>,
}

impl SavedGraph {
    pub fn from_graph(graph: &DependencyGraph) -> Self {
        let constraints: Vec<SavedConstraint> = graph
            .constraints()
            .map(|c| SavedConstraint {
                id: c.id(),
                spec: c.to_spec(),
            })
            .collect();
        let kinds: BTreeSet<&str> = constraints.iter().map(|c| c.spec.kind.as_str()).collect();
        Self {
            format_version: FORMAT_VERSION,
            variables: graph.variables().to_vec(),
            kinds: kinds.into_iter().map(str::to_string).collect(),
            constraints,
        }
    }

    /// Rebuild a graph against `registry`.
    pub fn into_graph(self, registry: Arc<ConstraintRegistry>) -> EngineResult<DependencyGraph> {
        if self.format_version != FORMAT_VERSION {
            return Err(EngineError::UnsupportedVersion {
                found: self.format_version,
                expected: FORMAT_VERSION,
            });
        }
        // Fail on missing kinds before touching anything else, so the error
        // names the kind rather than the first constraint that uses it.
        for kind in self.kinds.iter().chain(self.constraints.iter().map(|c| &c.spec.kind)) {
            if !registry.contains(kind) {
                return Err(EngineError::UnknownConstraintKind(kind.clone()));
            }
        }

        let mut graph = DependencyGraph::new(registry);
        for slot in self.variables {
            let id = slot.decl.id.clone();
            graph.add_variable(slot.decl)?;
            if let Some(value) = slot.value {
                graph.pin(&id, value)?;
            }
        }
        for saved in self.constraints {
            graph.insert_constraint(saved.id, saved.spec)?;
        }
        Ok(graph)
    }

    pub fn to_json(&self) -> EngineResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn save(&self, path: &Path) -> EngineResult<()> {
        std::fs::write(path, self.to_json()?)?;
        info!(path = %path.display(), "saved graph");
        Ok(())
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json(&data)
    }
}

/// Shorthand: parse JSON and rebuild the graph in one go.
pub fn load_graph(json: &str, registry: Arc<ConstraintRegistry>) -> EngineResult<DependencyGraph> {
    SavedGraph::from_json(json)?.into_graph(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{Value, VarDecl};

    fn registry() -> Arc<ConstraintRegistry> {
        Arc::new(ConstraintRegistry::with_builtins())
    }

    #[test]
    fn saved_json_shape() {
        let mut g = DependencyGraph::new(registry());
        g.add_variable(VarDecl::int_range("pitch", 60, 72)).unwrap();
        g.add_constraint(ConstraintSpec::new("prefer", ["pitch"]).param("target", 64.0))
            .unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&SavedGraph::from_graph(&g).to_json().unwrap()).unwrap();
        assert_eq!(json["format_version"], 1);
        assert_eq!(json["variables"][0]["id"], "pitch");
        assert_eq!(json["variables"][0]["type"], "numeric");
        assert_eq!(json["constraints"][0]["id"], 0);
        assert_eq!(json["constraints"][0]["kind"], "prefer");
        assert_eq!(json["constraints"][0]["params"]["target"], 64.0);
        assert_eq!(json["kinds"][0], "prefer");
    }

    #[test]
    fn constraint_ids_and_pins_survive_reload() {
        let mut g = DependencyGraph::new(registry());
        g.add_variable(VarDecl::int_range("a", 0, 5)).unwrap();
        g.add_variable(VarDecl::discrete("chord", ["I", "V"])).unwrap();
        let dropped = g.add_constraint(ConstraintSpec::new("prefer", ["a"])).unwrap();
        let kept = g
            .add_constraint(ConstraintSpec::new("prefer", ["a"]).weight(0.5))
            .unwrap();
        g.remove_constraint(dropped).unwrap();
        g.pin(&"chord".into(), Value::Symbol("V".into())).unwrap();

        let saved = SavedGraph::from_graph(&g);
        let back = SavedGraph::from_json(&saved.to_json().unwrap())
            .unwrap()
            .into_graph(registry())
            .unwrap();
        assert_eq!(back.constraint(kept).unwrap().weight(), 0.5);
        assert_eq!(
            back.variable(&"chord".into()).unwrap().value,
            Some(Value::Symbol("V".into()))
        );
        assert_eq!(SavedGraph::from_graph(&back), saved);
    }

    #[test]
    fn wrong_version_is_rejected() {
        let json = r#"{"format_version": 9, "variables": [], "constraints": []}"#;
        let err = load_graph(json, registry()).unwrap_err();
        assert!(matches!(err, EngineError::UnsupportedVersion { found: 9, expected: 1 }));
    }

    #[test]
    fn out_of_range_constraint_id_is_an_error() {
        let mut g = DependencyGraph::new(registry());
        g.add_variable(VarDecl::int_range("a", 0, 5)).unwrap();
        g.add_constraint(ConstraintSpec::new("prefer", ["a"])).unwrap();
        let mut json: serde_json::Value =
            serde_json::from_str(&SavedGraph::from_graph(&g).to_json().unwrap()).unwrap();
        json["constraints"][0]["id"] = u32::MAX.into();

        let err = load_graph(&json.to_string(), registry()).unwrap_err();
        assert!(matches!(err, EngineError::ConstraintIdsExhausted));
    }
}
