// Deterministic, portable pseudo-random number generator for Concord.
//
// xoshiro256++ (Blackman & Vigna, 2019) seeded through SplitMix64. The
// resolver never keeps one long-lived stream: every seeded tie-break derives a
// fresh `StepRng` from `(session seed, variable id, step)` via `StepRng::keyed`,
// so the choice made for one variable cannot shift the choices made for any
// other, and adding a variable to a graph leaves the others' draws untouched.
//
// **Critical constraint: determinism.** Two sessions with the same seed must
// produce bit-identical results on every platform. No floating point in the
// core generator, no OS entropy, no stdlib hashers (their seeds are random).

use serde::{Deserialize, Serialize};

/// Xoshiro256++ generator used for every stochastic decision in the engine.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRng {
    s: [u64; 4],
}

impl StepRng {
    /// Create a generator from a single `u64` seed.
    pub fn new(seed: u64) -> Self {
        let mut sm = seed;
        Self {
            s: [
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
                splitmix64(&mut sm),
            ],
        }
    }

    /// Derive a generator for one `(key, step)` decision under `seed`.
    ///
    /// The key is hashed with FNV-1a (stable across runs and platforms) and
    /// folded into the seed together with the step counter.
    pub fn keyed(seed: u64, key: &[u8], step: u64) -> Self {
        let mut mixed = seed ^ fnv1a64(key).rotate_left(17);
        mixed = splitmix64(&mut mixed) ^ step.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        Self::new(mixed)
    }

    pub fn next_u64(&mut self) -> u64 {
        let result = (self.s[0].wrapping_add(self.s[3]))
            .rotate_left(23)
            .wrapping_add(self.s[0]);

        let t = self.s[1] << 17;

        self.s[2] ^= self.s[0];
        self.s[3] ^= self.s[1];
        self.s[1] ^= self.s[2];
        self.s[0] ^= self.s[3];

        self.s[2] ^= t;
        self.s[3] = self.s[3].rotate_left(45);

        result
    }

    /// Uniform integer in `[low, high)`, rejection-sampled to avoid modulo bias.
    ///
    /// Panics if `low >= high`.
    pub fn range_u64(&mut self, low: u64, high: u64) -> u64 {
        assert!(low < high, "range_u64: low must be less than high");
        let range = high - low;
        if range.is_power_of_two() {
            return low + (self.next_u64() & (range - 1));
        }
        let threshold = range.wrapping_neg() % range;
        loop {
            let r = self.next_u64();
            if r >= threshold {
                return low + (r % range);
            }
        }
    }

    /// Pick an index into a collection of `len` items. `None` when empty.
    pub fn choose_index(&mut self, len: usize) -> Option<usize> {
        if len == 0 {
            return None;
        }
        Some(self.range_u64(0, len as u64) as usize)
    }
}

/// SplitMix64, used to expand seeds into xoshiro state.
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// 64-bit FNV-1a. Stable replacement for `DefaultHasher`, whose output is
/// not guaranteed across Rust releases.
pub fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in bytes {
        hash ^= u64::from(b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}
