// Error taxonomy for the evaluation engine.
//
// Authoring-time failures (`DuplicateId`, `TypeMismatch`, `InvalidType`,
// `UnknownConstraintKind`, `ArityMismatch`, `InvalidWeight`, `VariableInUse`,
// `CyclicDependency`) are returned synchronously and leave the graph
// untouched. The only runtime failure of a session is `SessionClosed`; an
// unsatisfiable variable during `advance()` is reported as a degraded step on
// the `ResolutionResult`, not through this type.

use crate::value::VarId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("variable `{0}` is already declared")]
    DuplicateId(VarId),

    #[error("value does not conform to the type of `{id}`: {reason}")]
    TypeMismatch { id: VarId, reason: String },

    #[error("invalid type for `{id}`: {reason}")]
    InvalidType { id: VarId, reason: String },

    #[error("unknown variable `{0}`")]
    UnknownVariable(VarId),

    #[error("unknown constraint #{0}")]
    UnknownConstraint(u32),

    #[error("constraint #{0} already exists")]
    DuplicateConstraint(u32),

    #[error("unknown constraint kind `{0}`")]
    UnknownConstraintKind(String),

    #[error("constraint ids are exhausted")]
    ConstraintIdsExhausted,

    #[error("constraint kind `{0}` is already registered")]
    DuplicateKind(String),

    #[error("constraint kind `{kind}` takes {expected} bindings, got {got}")]
    ArityMismatch {
        kind: String,
        expected: usize,
        got: usize,
    },

    #[error("invalid constraint weight {0} (must be finite and non-negative)")]
    InvalidWeight(f64),

    #[error("variable `{id}` is still bound by {constraints} constraint(s)")]
    VariableInUse { id: VarId, constraints: usize },

    #[error("constraint would create an ordering cycle through `{0}`")]
    CyclicDependency(VarId),

    #[error("session is closed")]
    SessionClosed,

    #[error("unsupported saved graph version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    pub fn type_mismatch(id: &VarId, reason: impl Into<String>) -> Self {
        Self::TypeMismatch {
            id: id.clone(),
            reason: reason.into(),
        }
    }

    pub fn invalid_type(id: &VarId, reason: impl Into<String>) -> Self {
        Self::InvalidType {
            id: id.clone(),
            reason: reason.into(),
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
