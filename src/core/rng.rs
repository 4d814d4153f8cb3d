//! Match Random Number Generator
//!
//! Uses the Xorshift128+ algorithm for fast, high-quality randomness.
//! Every randomized decision in a match (pool draws, event rolls,
//! defaulted guesses, derangements) goes through this generator, so a
//! match replays identically from its seed and command sequence.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Per-match PRNG using Xorshift128+.
///
/// # Example
///
/// ```
/// use diminish::core::rng::MatchRng;
///
/// let mut rng = MatchRng::new(12345);
/// let guess = rng.next_guess();
/// assert!(guess <= 100);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MatchRng {
    state: [u64; 2],
}

impl Default for MatchRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl MatchRng {
    /// Create a new RNG from a 64-bit seed.
    ///
    /// Uses SplitMix64 to initialize the internal state, ensuring
    /// good distribution even from weak seeds.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);

        // State must never be all zeros
        let state = if state0 == 0 && state1 == 0 {
            [1, 1]
        } else {
            [state0, state1]
        };

        Self { state }
    }

    /// Generate the next 64-bit random value.
    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        let s0 = self.state[0];
        let mut s1 = self.state[1];
        let result = s0.wrapping_add(s1);

        s1 ^= s0;
        self.state[0] = s0.rotate_left(24) ^ s1 ^ (s1 << 16);
        self.state[1] = s1.rotate_left(37);

        result
    }

    /// Generate a random integer in range [0, max).
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Generate a random integer in range [min, max].
    #[inline]
    pub fn next_int_range(&mut self, min: i32, max: i32) -> i32 {
        if min >= max {
            return min;
        }
        let range = (max - min + 1) as u32;
        min + self.next_int(range) as i32
    }

    /// A defaulted guess: uniform in [0, 100].
    ///
    /// Used when a living participant fails to submit before the input
    /// countdown expires. Uniform substitution keeps the average
    /// unbiased, which a fixed sentinel would not.
    #[inline]
    pub fn next_guess(&mut self) -> u8 {
        self.next_int(101) as u8
    }

    /// Bernoulli roll with probability `percent` (0..=100).
    #[inline]
    pub fn chance(&mut self, percent: u32) -> bool {
        self.next_int(100) < percent
    }

    /// Shuffle a slice in place using Fisher-Yates.
    pub fn shuffle<T>(&mut self, slice: &mut [T]) {
        let len = slice.len();
        for i in (1..len).rev() {
            let j = self.next_int((i + 1) as u32) as usize;
            slice.swap(i, j);
        }
    }

    /// Select a random element from a slice.
    pub fn choose<'a, T>(&mut self, slice: &'a [T]) -> Option<&'a T> {
        if slice.is_empty() {
            None
        } else {
            let idx = self.next_int(slice.len() as u32) as usize;
            Some(&slice[idx])
        }
    }

    /// Remove and return a random element from a vector.
    pub fn draw<T>(&mut self, pool: &mut Vec<T>) -> Option<T> {
        if pool.is_empty() {
            None
        } else {
            let idx = self.next_int(pool.len() as u32) as usize;
            Some(pool.swap_remove(idx))
        }
    }

    /// Generate a derangement of `0..n`: a permutation with no fixed
    /// points, so `perm[i] != i` for every index.
    ///
    /// Retries a uniform shuffle until it has no fixed point. For n = 2
    /// this yields the unique swap; expected retries converge to e for
    /// large n, so the loop is cheap in practice.
    ///
    /// Returns an empty permutation for n < 2 (no derangement exists).
    pub fn derangement(&mut self, n: usize) -> Vec<usize> {
        if n < 2 {
            return Vec::new();
        }
        let mut perm: Vec<usize> = (0..n).collect();
        loop {
            self.shuffle(&mut perm);
            if perm.iter().enumerate().all(|(i, &p)| i != p) {
                return perm;
            }
        }
    }

    /// Get current state (for checkpointing/debugging).
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 for seed initialization.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive a match seed from match parameters.
///
/// Hashes the match id, a process entropy value, and the sorted
/// participant ids so two matches started in the same process never
/// share a sequence. Determinism across runs is not required; the
/// outcome distribution is.
pub fn derive_match_seed(match_id: &[u8; 16], entropy: u64, participant_ids: &[[u8; 16]]) -> u64 {
    let mut hasher = Sha256::new();

    // Domain separator
    hasher.update(b"DIMINISH_SEED_V1");
    hasher.update(match_id);
    hasher.update(entropy.to_le_bytes());

    // Caller must pass participant ids sorted
    for pid in participant_ids {
        hasher.update(pid);
    }

    let hash = hasher.finalize();
    u64::from_le_bytes(hash[0..8].try_into().unwrap())
}

// =============================================================================
// TESTS
// =============================================================================
