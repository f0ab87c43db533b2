// Constraint registry: the catalog of constraint kinds.
//
// A kind is a named, pure violation function over an ordered role signature.
// Each role declares which type family it accepts and how it participates in
// ordering:
// - `Lead` / `Follow`: current-step values. When the kind is ordering
//   sensitive, every Lead variable is resolved before every Follow variable,
//   which is what gives the dependency graph its edges.
// - `Previous`: the bound variable's value from the previous step. Never an
//   ordering edge, so recurrences cannot create cycles.
//
// Kinds are resolved by name once, when a constraint is attached (or a saved
// graph is loaded); constraints then hold an `Arc<ConstraintKind>` and never
// look the name up again. The registry itself is an ordinary value that is
// passed to graphs explicitly, so sessions with different registries coexist.
//
// `evaluate` may be called thousands of times per step by the resolver. It
// must be deterministic and side-effect-free; `f64::INFINITY` means a hard
// violation (the candidate is illegal).

use crate::error::{EngineError, EngineResult};
use crate::kinds;
use crate::value::{TypeFamily, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Named numeric parameters of one constraint instance.
pub type Params = BTreeMap<String, f64>;

/// Hard violation marker.
pub const HARD: f64 = f64::INFINITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoleTag {
    Lead,
    Follow,
    Previous,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoleSpec {
    pub name: String,
    pub family: TypeFamily,
    pub tag: RoleTag,
}

/// Values bound to a constraint's roles for one evaluation.
pub struct Bound<'a> {
    values: &'a [&'a Value],
    params: &'a Params,
}

impl<'a> Bound<'a> {
    pub fn new(values: &'a [&'a Value], params: &'a Params) -> Self {
        Self { values, params }
    }

    pub fn value(&self, role: usize) -> &Value {
        self.values[role]
    }

    pub fn number(&self, role: usize) -> Option<f64> {
        self.values[role].as_number()
    }

    pub fn param(&self, name: &str, default: f64) -> f64 {
        self.params.get(name).copied().unwrap_or(default)
    }
}

type EvalFn = dyn Fn(&Bound<'_>) -> f64 + Send + Sync;

pub struct ConstraintKind {
    name: String,
    roles: Vec<RoleSpec>,
    ordering_sensitive: bool,
    inherits: bool,
    eval: Box<EvalFn>,
}

impl ConstraintKind {
    /// Start a kind with no roles; add them with [`ConstraintKind::role`].
    pub fn new(
        name: impl Into<String>,
        eval: impl Fn(&Bound<'_>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
            ordering_sensitive: false,
            inherits: false,
            eval: Box::new(eval),
        }
    }

    pub fn role(mut self, name: impl Into<String>, family: TypeFamily, tag: RoleTag) -> Self {
        self.roles.push(RoleSpec {
            name: name.into(),
            family,
            tag,
        });
        self
    }

    /// Lead roles must be resolved before Follow roles within a step.
    pub fn ordering_sensitive(mut self) -> Self {
        self.ordering_sensitive = true;
        self
    }

    /// Seed the first Follow variable with the previous-step value of the
    /// first Previous variable at the start of each step.
    pub fn inheriting(mut self) -> Self {
        self.inherits = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn roles(&self) -> &[RoleSpec] {
        &self.roles
    }

    pub fn is_ordering_sensitive(&self) -> bool {
        self.ordering_sensitive
    }

    /// `(previous role, follow role)` used for inheritance, if any.
    pub fn inheritance(&self) -> Option<(usize, usize)> {
        if !self.inherits {
            return None;
        }
        let prev = self.roles.iter().position(|r| r.tag == RoleTag::Previous)?;
        let follow = self.roles.iter().position(|r| r.tag == RoleTag::Follow)?;
        Some((prev, follow))
    }

    /// Raw (unweighted) violation. Negative results clamp to 0, NaN to HARD.
    pub fn evaluate(&self, values: &[&Value], params: &Params) -> f64 {
        let raw = (self.eval)(&Bound::new(values, params));
        if raw.is_nan() {
            HARD
        } else {
            raw.max(0.0)
        }
    }
}

impl fmt::Debug for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstraintKind")
            .field("name", &self.name)
            .field("roles", &self.roles)
            .field("ordering_sensitive", &self.ordering_sensitive)
            .field("inherits", &self.inherits)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
pub struct ConstraintRegistry {
    kinds: BTreeMap<String, Arc<ConstraintKind>>,
}

impl ConstraintRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry preloaded with the built-in musical kinds (see `kinds.rs`).
    pub fn with_builtins() -> Self {
        let kinds = kinds::builtins()
            .into_iter()
            .map(|kind| (kind.name().to_string(), Arc::new(kind)))
            .collect();
        Self { kinds }
    }

    pub fn register(&mut self, kind: ConstraintKind) -> EngineResult<()> {
        if self.kinds.contains_key(kind.name()) {
            return Err(EngineError::DuplicateKind(kind.name().to_string()));
        }
        self.kinds.insert(kind.name().to_string(), Arc::new(kind));
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> EngineResult<Arc<ConstraintKind>> {
        self.kinds
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownConstraintKind(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.kinds.contains_key(name)
    }

    /// Registered kind names, sorted.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.kinds.keys().map(String::as_str)
    }
}
