// Variable identifiers, declared types and values.
//
// The engine works over a closed set of types:
// - `Numeric { min, max, step }`: a bounded range quantized by `step`.
// - `Discrete { symbols }`: an ordered symbol set (natural order = declaration
//   order of the symbols).
// - `Sequence { symbols, len }`: fixed-length symbol sequences, ordered
//   lexicographically by symbol position.
//
// `VarType::domain()` enumerates candidates in natural order; the resolver's
// "smallest value wins ties" rule is simply "first candidate wins". Fallback
// values (used when resolution degrades) are defined per type here too.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance when checking that a numeric value sits on its quantization grid.
const GRID_EPSILON: f64 = 1e-9;

/// Stable, graph-unique variable identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarId(pub String);

impl VarId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VarId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VarId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Coarse type classes, used by role signatures to say what they accept.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeFamily {
    Numeric,
    Discrete,
    Sequence,
    Any,
}

impl TypeFamily {
    pub fn accepts(self, ty: &VarType) -> bool {
        matches!(
            (self, ty),
            (TypeFamily::Any, _)
                | (TypeFamily::Numeric, VarType::Numeric { .. })
                | (TypeFamily::Discrete, VarType::Discrete { .. })
                | (TypeFamily::Sequence, VarType::Sequence { .. })
        )
    }
}

/// Declared type of a variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VarType {
    Numeric { min: f64, max: f64, step: f64 },
    Discrete { symbols: Vec<String> },
    Sequence { symbols: Vec<String>, len: usize },
}

impl VarType {
    pub fn family(&self) -> TypeFamily {
        match self {
            VarType::Numeric { .. } => TypeFamily::Numeric,
            VarType::Discrete { .. } => TypeFamily::Discrete,
            VarType::Sequence { .. } => TypeFamily::Sequence,
        }
    }

    /// Reject malformed numeric ranges. Symbol sets may be empty.
    pub fn validate(&self, id: &VarId) -> EngineResult<()> {
        if let VarType::Numeric { min, max, step } = *self {
            if !min.is_finite() || !max.is_finite() || !step.is_finite() {
                return Err(EngineError::invalid_type(id, "numeric bounds must be finite"));
            }
            if step <= 0.0 {
                return Err(EngineError::invalid_type(id, format!("step {step} must be positive")));
            }
            if min > max {
                return Err(EngineError::invalid_type(id, format!("min {min} exceeds max {max}")));
            }
        }
        Ok(())
    }

    /// Number of grid points in a numeric range, saturating at `u64::MAX`.
    fn numeric_count(min: f64, max: f64, step: f64) -> u64 {
        // `as` saturates for out-of-range floats.
        let intervals = ((max - min) / step + GRID_EPSILON).floor() as u64;
        intervals.saturating_add(1)
    }

    /// Number of candidates in the domain, saturating at `usize::MAX`.
    pub fn domain_len(&self) -> usize {
        match self {
            VarType::Numeric { min, max, step } => {
                usize::try_from(Self::numeric_count(*min, *max, *step)).unwrap_or(usize::MAX)
            }
            VarType::Discrete { symbols } => symbols.len(),
            VarType::Sequence { symbols, len } => {
                let mut total: usize = 1;
                for _ in 0..*len {
                    total = total.saturating_mul(symbols.len());
                }
                total
            }
        }
    }

    /// Enumerate candidate values in natural order.
    pub fn domain(&self) -> Domain<'_> {
        let state = match self {
            VarType::Numeric { min, max, step } => DomainState::Numeric {
                min: *min,
                step: *step,
                next: 0,
                count: Self::numeric_count(*min, *max, *step),
            },
            VarType::Discrete { symbols } => DomainState::Discrete { symbols, next: 0 },
            VarType::Sequence { symbols, len } => DomainState::Sequence {
                symbols,
                odometer: if symbols.is_empty() && *len > 0 {
                    None
                } else {
                    Some(vec![0; *len])
                },
            },
        };
        Domain { state }
    }

    /// Check that `value` is a legal member of this type.
    pub fn check(&self, value: &Value) -> Result<(), String> {
        match (self, value) {
            (VarType::Numeric { min, max, step }, Value::Number(x)) => {
                if !x.is_finite() {
                    return Err(format!("{x} is not finite"));
                }
                let k = (x - min) / step;
                let nearest = k.round();
                if (k - nearest).abs() > GRID_EPSILON {
                    return Err(format!("{x} is not on the {step} grid starting at {min}"));
                }
                if nearest < 0.0 || nearest as u64 >= Self::numeric_count(*min, *max, *step) {
                    return Err(format!("{x} is outside [{min}, {max}]"));
                }
                Ok(())
            }
            (VarType::Discrete { symbols }, Value::Symbol(s)) => {
                if symbols.iter().any(|sym| sym == s) {
                    Ok(())
                } else {
                    Err(format!("symbol `{s}` is not in the declared set"))
                }
            }
            (VarType::Sequence { symbols, len }, Value::Sequence(seq)) => {
                if seq.len() != *len {
                    return Err(format!("sequence has length {}, expected {len}", seq.len()));
                }
                match seq.iter().find(|s| !symbols.contains(s)) {
                    Some(bad) => Err(format!("symbol `{bad}` is not in the declared set")),
                    None => Ok(()),
                }
            }
            (ty, v) => Err(format!("expected a {:?} value, got {}", ty.family(), v.kind_name())),
        }
    }

    /// Type-specific default assigned when resolution degrades.
    pub fn fallback(&self) -> Value {
        match self {
            VarType::Numeric { min, .. } => Value::Number(*min),
            VarType::Discrete { symbols } => {
                Value::Symbol(symbols.first().cloned().unwrap_or_default())
            }
            VarType::Sequence { symbols, len } => match symbols.first() {
                Some(first) => Value::Sequence(vec![first.clone(); *len]),
                None => Value::Sequence(Vec::new()),
            },
        }
    }

    /// Position of a symbol in a discrete or sequence symbol set.
    pub fn symbol_index(&self, symbol: &str) -> Option<usize> {
        match self {
            VarType::Discrete { symbols } | VarType::Sequence { symbols, .. } => {
                symbols.iter().position(|s| s == symbol)
            }
            VarType::Numeric { .. } => None,
        }
    }
}

/// A resolved (or authored) variable value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Number(f64),
    Symbol(String),
    Sequence(Vec<String>),
}

impl Value {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(x) => Some(*x),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&str> {
        match self {
            Value::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_sequence(&self) -> Option<&[String]> {
        match self {
            Value::Sequence(seq) => Some(seq),
            _ => None,
        }
    }

    fn kind_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Symbol(_) => "symbol",
            Value::Sequence(_) => "sequence",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Number(x) => write!(f, "{x}"),
            Value::Symbol(s) => write!(f, "{s}"),
            Value::Sequence(seq) => write!(f, "[{}]", seq.join(" ")),
        }
    }
}

/// How the resolver breaks ties between equally good candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    /// First candidate in natural order.
    #[default]
    Smallest,
    /// Uniform choice among the tied candidates, drawn from a generator keyed
    /// by `(session seed, variable id, step)`.
    Seeded,
}

/// Everything needed to declare a variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VarDecl {
    pub id: VarId,
    #[serde(flatten)]
    pub ty: VarType,
    #[serde(default)]
    pub tie_break: TieBreak,
}

impl VarDecl {
    pub fn new(id: impl Into<String>, ty: VarType) -> Self {
        Self {
            id: VarId::new(id),
            ty,
            tie_break: TieBreak::Smallest,
        }
    }

    /// Integer-stepped numeric range `[min, max]`.
    pub fn int_range(id: impl Into<String>, min: i64, max: i64) -> Self {
        Self::new(
            id,
            VarType::Numeric {
                min: min as f64,
                max: max as f64,
                step: 1.0,
            },
        )
    }

    pub fn numeric(id: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self::new(id, VarType::Numeric { min, max, step })
    }

    pub fn discrete<S: Into<String>>(id: impl Into<String>, symbols: impl IntoIterator<Item = S>) -> Self {
        Self::new(
            id,
            VarType::Discrete {
                symbols: symbols.into_iter().map(Into::into).collect(),
            },
        )
    }

    pub fn sequence<S: Into<String>>(
        id: impl Into<String>,
        symbols: impl IntoIterator<Item = S>,
        len: usize,
    ) -> Self {
        Self::new(
            id,
            VarType::Sequence {
                symbols: symbols.into_iter().map(Into::into).collect(),
                len,
            },
        )
    }

    pub fn seeded(mut self) -> Self {
        self.tie_break = TieBreak::Seeded;
        self
    }
}

/// Lazy, natural-order enumeration of a type's candidates.
pub struct Domain<'a> {
    state: DomainState<'a>,
}

enum DomainState<'a> {
    Numeric { min: f64, step: f64, next: u64, count: u64 },
    Discrete { symbols: &'a [String], next: usize },
    Sequence { symbols: &'a [String], odometer: Option<Vec<usize>> },
}

impl Iterator for Domain<'_> {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        match &mut self.state {
            DomainState::Numeric { min, step, next, count } => {
                if *next >= *count {
                    return None;
                }
                let value = *min + *next as f64 * *step;
                *next += 1;
                Some(Value::Number(value))
            }
            DomainState::Discrete { symbols, next } => {
                let sym = symbols.get(*next)?;
                *next += 1;
                Some(Value::Symbol(sym.clone()))
            }
            DomainState::Sequence { symbols, odometer } => {
                let digits = odometer.as_mut()?;
                let value = Value::Sequence(digits.iter().map(|&i| symbols[i].clone()).collect());
                // Advance the odometer; the rightmost position turns fastest.
                let mut exhausted = true;
                for pos in (0..digits.len()).rev() {
                    digits[pos] += 1;
                    if digits[pos] < symbols.len() {
                        exhausted = false;
                        break;
                    }
                    digits[pos] = 0;
                }
                if exhausted {
                    *odometer = None;
                }
                Some(value)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> VarId {
        VarId::from(s)
    }

    #[test]
    fn numeric_domain_is_quantized_and_inclusive() {
        let ty = VarType::Numeric { min: 0.0, max: 1.0, step: 0.25 };
        let values: Vec<f64> = ty.domain().filter_map(|v| v.as_number()).collect();
        assert_eq!(values, vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(ty.domain_len(), 5);
    }

    #[test]
    fn numeric_domain_with_inexact_step_stays_in_range() {
        let ty = VarType::Numeric { min: 0.0, max: 1.0, step: 0.3 };
        let values: Vec<f64> = ty.domain().filter_map(|v| v.as_number()).collect();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|&v| v <= 1.0));
    }

    #[test]
    fn huge_numeric_range_saturates_instead_of_overflowing() {
        let ty = VarType::Numeric { min: 0.0, max: 1e20, step: 1.0 };
        assert!(ty.validate(&id("x")).is_ok());
        assert_eq!(ty.domain_len(), usize::MAX);
        assert_eq!(ty.check(&Value::Number(5.0)), Ok(()));
        assert!(ty.check(&Value::Number(-1.0)).is_err());
        let first: Vec<f64> = ty.domain().take(3).filter_map(|v| v.as_number()).collect();
        assert_eq!(first, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn sequence_domain_is_lexicographic() {
        let ty = VarType::Sequence {
            symbols: vec!["a".into(), "b".into()],
            len: 2,
        };
        let values: Vec<String> = ty.domain().map(|v| v.to_string()).collect();
        assert_eq!(values, vec!["[a a]", "[a b]", "[b a]", "[b b]"]);
        assert_eq!(ty.domain_len(), 4);
    }

    #[test]
    fn empty_symbol_sets_have_empty_domains() {
        let discrete = VarType::Discrete { symbols: vec![] };
        assert_eq!(discrete.domain().count(), 0);
        let seq = VarType::Sequence { symbols: vec![], len: 3 };
        assert_eq!(seq.domain().count(), 0);
        assert_eq!(seq.fallback(), Value::Sequence(vec![]));
    }

    #[test]
    fn zero_length_sequence_has_one_candidate() {
        let seq = VarType::Sequence { symbols: vec!["x".into()], len: 0 };
        assert_eq!(seq.domain().collect::<Vec<_>>(), vec![Value::Sequence(vec![])]);
    }

    #[test]
    fn check_rejects_off_grid_and_out_of_range() {
        let ty = VarType::Numeric { min: 60.0, max: 72.0, step: 1.0 };
        assert!(ty.check(&Value::Number(64.0)).is_ok());
        assert!(ty.check(&Value::Number(64.5)).is_err());
        assert!(ty.check(&Value::Number(73.0)).is_err());
        assert!(ty.check(&Value::Number(59.0)).is_err());
        assert!(ty.check(&Value::Symbol("C".into())).is_err());
    }

    #[test]
    fn check_sequences() {
        let ty = VarType::Sequence {
            symbols: vec!["x".into(), "o".into()],
            len: 2,
        };
        assert!(ty.check(&Value::Sequence(vec!["x".into(), "o".into()])).is_ok());
        assert!(ty.check(&Value::Sequence(vec!["x".into()])).is_err());
        assert!(ty.check(&Value::Sequence(vec!["x".into(), "z".into()])).is_err());
    }

    #[test]
    fn validate_rejects_bad_numeric_types() {
        let bad_step = VarType::Numeric { min: 0.0, max: 1.0, step: 0.0 };
        assert!(bad_step.validate(&id("x")).is_err());
        let inverted = VarType::Numeric { min: 2.0, max: 1.0, step: 1.0 };
        assert!(inverted.validate(&id("x")).is_err());
        let infinite = VarType::Numeric { min: 0.0, max: f64::INFINITY, step: 1.0 };
        assert!(infinite.validate(&id("x")).is_err());
    }

    #[test]
    fn fallbacks_follow_type() {
        assert_eq!(
            VarType::Numeric { min: 3.0, max: 9.0, step: 1.0 }.fallback(),
            Value::Number(3.0)
        );
        assert_eq!(
            VarType::Discrete { symbols: vec!["lo".into(), "hi".into()] }.fallback(),
            Value::Symbol("lo".into())
        );
        assert_eq!(
            VarType::Discrete { symbols: vec![] }.fallback(),
            Value::Symbol(String::new())
        );
    }

    #[test]
    fn decl_json_shape() {
        let decl = VarDecl::int_range("pitch", 60, 72).seeded();
        let json = serde_json::to_value(&decl).unwrap();
        assert_eq!(json["id"], "pitch");
        assert_eq!(json["type"], "numeric");
        assert_eq!(json["tie_break"], "seeded");
        let back: VarDecl = serde_json::from_value(json).unwrap();
        assert_eq!(back, decl);
    }
}
