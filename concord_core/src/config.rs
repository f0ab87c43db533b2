// Engine configuration.
//
// Every tunable of a resolution session lives in `EngineConfig`, loaded from
// JSON. Missing fields take their defaults, so a config file only needs to
// name what it changes (`{"seed": 7}` is a complete config).
//
// **Determinism.** `seed`, `max_candidates` and `refine_sweeps` all feed the
// resolver directly; two sessions produce identical results only if their
// configs are identical too.

use crate::error::EngineResult;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Session seed for seeded tie-breaking.
    pub seed: u64,
    /// Upper bound on candidates enumerated per variable per step. Domains
    /// larger than this are truncated in natural order.
    pub max_candidates: usize,
    /// Coordinate-descent sweeps after the greedy pass. 0 disables refinement.
    pub refine_sweeps: u32,
    /// Number of past results a session keeps for lookback. 0 keeps none
    /// beyond the previous step's values.
    pub lookback: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            max_candidates: 4096,
            refine_sweeps: 0,
            lookback: 0,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: &Path) -> EngineResult<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config = EngineConfig::from_json_str(r#"{"seed": 7, "refine_sweeps": 2}"#).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.refine_sweeps, 2);
        assert_eq!(config.max_candidates, 4096);
        assert_eq!(config.lookback, 0);
    }

    #[test]
    fn empty_object_is_default() {
        assert_eq!(EngineConfig::from_json_str("{}").unwrap(), EngineConfig::default());
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(EngineConfig::from_json_str("{seed: }").is_err());
    }
}
