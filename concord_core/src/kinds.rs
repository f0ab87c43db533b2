// Built-in constraint kinds.
//
// A small vocabulary of musically meaningful relations, registered by
// `ConstraintRegistry::with_builtins()`. Violations are in "semitone-ish"
// units so that weights of the same magnitude are comparable across kinds.
//
// | kind              | roles                               | params            |
// |-------------------|-------------------------------------|-------------------|
// | `equals`          | a (lead), b (follow)                |                   |
// | `distinct`        | a (lead), b (follow)                |                   |
// | `prefer`          | x (lead, numeric)                   | target            |
// | `tracks_distance` | tracker (lead), source (follow)     | center            |
// | `in_scale`        | pitch (lead, numeric)               | root, mask        |
// | `consonance`      | a (lead), b (follow), numeric       |                   |
// | `interval_at_most`| lead, follow (ordering-sensitive)   | max               |
// | `smooth_motion`   | prev (previous), current (follow)   | max_leap, penalty |
// | `hold`            | prev (previous), current (follow)   | (inheriting)      |
// | `forbid`          | x (lead, numeric)                   | value             |
// | `no_repeat`       | seq (lead, sequence)                |                   |

use crate::registry::{Bound, ConstraintKind, HARD, RoleTag};
use crate::value::{TypeFamily, Value};

/// Pitch-class mask of the major scale (degrees 0 2 4 5 7 9 11).
pub const MAJOR_SCALE_MASK: u16 = 0b1010_1011_0101;

pub fn builtins() -> Vec<ConstraintKind> {
    use RoleTag::{Follow, Lead, Previous};
    use TypeFamily::{Any, Numeric, Sequence};

    vec![
        ConstraintKind::new("equals", |b| mismatch(b.value(0), b.value(1)))
            .role("a", Any, Lead)
            .role("b", Any, Follow),
        ConstraintKind::new("distinct", |b| if b.value(0) == b.value(1) { 1.0 } else { 0.0 })
            .role("a", Any, Lead)
            .role("b", Any, Follow),
        ConstraintKind::new("prefer", |b| match b.number(0) {
            Some(x) => (x - b.param("target", 0.0)).abs(),
            None => HARD,
        })
        .role("x", Numeric, Lead),
        ConstraintKind::new("tracks_distance", tracks_distance)
            .role("tracker", Numeric, Lead)
            .role("source", Numeric, Follow),
        ConstraintKind::new("in_scale", in_scale).role("pitch", Numeric, Lead),
        ConstraintKind::new("consonance", consonance)
            .role("a", Numeric, Lead)
            .role("b", Numeric, Follow),
        ConstraintKind::new("interval_at_most", |b| match (b.number(0), b.number(1)) {
            (Some(lead), Some(follow)) => ((lead - follow).abs() - b.param("max", 12.0)).max(0.0),
            _ => HARD,
        })
        .role("lead", Numeric, Lead)
        .role("follow", Numeric, Follow)
        .ordering_sensitive(),
        ConstraintKind::new("smooth_motion", smooth_motion)
            .role("prev", Numeric, Previous)
            .role("current", Numeric, Follow),
        ConstraintKind::new("hold", |b| mismatch(b.value(0), b.value(1)).min(1.0))
            .role("prev", Any, Previous)
            .role("current", Any, Follow)
            .inheriting(),
        ConstraintKind::new("forbid", |b| match b.number(0) {
            Some(x) if x == b.param("value", 0.0) => HARD,
            _ => 0.0,
        })
        .role("x", Numeric, Lead),
        ConstraintKind::new("no_repeat", |b| match b.value(0).as_sequence() {
            Some(seq) => seq.windows(2).filter(|w| w[0] == w[1]).count() as f64,
            None => HARD,
        })
        .role("seq", Sequence, Lead),
    ]
}

/// Numeric distance, or 0/1 for non-numeric values.
fn mismatch(a: &Value, b: &Value) -> f64 {
    match (a.as_number(), b.as_number()) {
        (Some(x), Some(y)) => (x - y).abs(),
        _ if a == b => 0.0,
        _ => 1.0,
    }
}

fn tracks_distance(b: &Bound<'_>) -> f64 {
    match (b.number(0), b.number(1)) {
        (Some(tracker), Some(source)) => {
            let distance = (source - b.param("center", 0.0)).abs();
            (tracker - distance).abs()
        }
        _ => HARD,
    }
}

fn pitch_class(pitch: f64, root: f64) -> u32 {
    (pitch.round() as i64 - root.round() as i64).rem_euclid(12) as u32
}

fn in_scale(b: &Bound<'_>) -> f64 {
    let Some(pitch) = b.number(0) else {
        return HARD;
    };
    let mask = b.param("mask", f64::from(MAJOR_SCALE_MASK)) as u32;
    let pc = pitch_class(pitch, b.param("root", 0.0));
    if (mask >> pc) & 1 == 1 { 0.0 } else { HARD }
}

/// Interval-class penalty: perfect consonances free, imperfect cheap, the
/// fourth in between, dissonances full price.
fn consonance(b: &Bound<'_>) -> f64 {
    match (b.number(0), b.number(1)) {
        (Some(x), Some(y)) => match ((x - y).abs().round() as i64) % 12 {
            0 | 7 => 0.0,
            3 | 4 | 8 | 9 => 0.25,
            5 => 0.5,
            _ => 1.0,
        },
        _ => HARD,
    }
}

fn smooth_motion(b: &Bound<'_>) -> f64 {
    match (b.number(0), b.number(1)) {
        (Some(prev), Some(current)) => {
            let leap = (current - prev).abs();
            let excess = (leap - b.param("max_leap", 4.0)).max(0.0);
            leap + excess * b.param("penalty", 2.0)
        }
        _ => HARD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{ConstraintRegistry, Params};

    fn eval(kind: &str, values: &[Value], params: &[(&str, f64)]) -> f64 {
        let registry = ConstraintRegistry::with_builtins();
        let kind = registry.lookup(kind).unwrap();
        let refs: Vec<&Value> = values.iter().collect();
        let params: Params = params.iter().map(|(k, v)| (k.to_string(), *v)).collect();
        kind.evaluate(&refs, &params)
    }

    fn n(x: f64) -> Value {
        Value::Number(x)
    }

    #[test]
    fn tracks_distance_zero_when_tracker_matches() {
        assert_eq!(eval("tracks_distance", &[n(0.0), n(64.0)], &[("center", 64.0)]), 0.0);
        assert_eq!(eval("tracks_distance", &[n(4.0), n(60.0)], &[("center", 64.0)]), 0.0);
        assert_eq!(eval("tracks_distance", &[n(0.0), n(60.0)], &[("center", 64.0)]), 4.0);
    }

    #[test]
    fn in_scale_uses_root_and_mask() {
        // C major: E is in, Eb is out.
        assert_eq!(eval("in_scale", &[n(64.0)], &[]), 0.0);
        assert_eq!(eval("in_scale", &[n(63.0)], &[]), HARD);
        // D major (root 2): F# in, F out.
        assert_eq!(eval("in_scale", &[n(66.0)], &[("root", 2.0)]), 0.0);
        assert_eq!(eval("in_scale", &[n(65.0)], &[("root", 2.0)]), HARD);
    }

    #[test]
    fn consonance_penalties() {
        assert_eq!(eval("consonance", &[n(67.0), n(60.0)], &[]), 0.0);
        assert_eq!(eval("consonance", &[n(64.0), n(60.0)], &[]), 0.25);
        assert_eq!(eval("consonance", &[n(61.0), n(60.0)], &[]), 1.0);
    }

    #[test]
    fn smooth_motion_penalizes_leaps_beyond_limit() {
        assert_eq!(eval("smooth_motion", &[n(60.0), n(62.0)], &[]), 2.0);
        // leap 7, excess 3, penalty 2 → 7 + 6
        assert_eq!(eval("smooth_motion", &[n(60.0), n(67.0)], &[]), 13.0);
    }

    #[test]
    fn forbid_is_hard() {
        assert_eq!(eval("forbid", &[n(3.0)], &[("value", 3.0)]), HARD);
        assert_eq!(eval("forbid", &[n(4.0)], &[("value", 3.0)]), 0.0);
    }

    #[test]
    fn no_repeat_counts_adjacent_duplicates() {
        let seq = Value::Sequence(vec!["x".into(), "x".into(), "o".into(), "o".into()]);
        assert_eq!(eval("no_repeat", &[seq], &[]), 2.0);
    }

    #[test]
    fn equals_on_symbols() {
        let a = Value::Symbol("C".into());
        let b = Value::Symbol("G".into());
        assert_eq!(eval("equals", &[a.clone(), a.clone()], &[]), 0.0);
        assert_eq!(eval("equals", &[a, b], &[]), 1.0);
    }
}
