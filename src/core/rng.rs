//! Deterministic Random Number Generator
//!
//! Xorshift128+ seeded through SplitMix64. Rule-sets that want random events
//! keep one of these *inside their snapshot*: the generator state is copied
//! with the snapshot, serialized with the network description and advanced
//! only by simulated time, so every replay of the same history draws the
//! same numbers.

use sha2::{Digest, Sha256};

use super::token::SessionToken;

/// Deterministic PRNG using Xorshift128+.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeterministicRng {
    state: [u64; 2],
}

impl Default for DeterministicRng {
    fn default() -> Self {
        Self::new(0)
    }
}

impl DeterministicRng {
    /// Create a new RNG from a 64-bit seed.
    pub fn new(seed: u64) -> Self {
        let mut s = seed;
        let state0 = splitmix64(&mut s);
        let state1 = splitmix64(&mut s);
        Self::from_state([state0, state1])
    }

    /// Rebuild a generator from a saved state (e.g. read off the wire).
    ///
    /// The all-zero state is a fixed point of xorshift and is replaced.
    pub fn from_state(state: [u64; 2]) -> Self {
        if state == [0, 0] {
            Self { state: [1, 1] }
        } else {
            Self { state }
        }
    }

    /// Generate the next 64-bit value.
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

    /// Generate a random u32.
    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Generate an integer in `[0, max)`. Returns 0 when `max == 0`.
    #[inline]
    pub fn next_int(&mut self, max: u32) -> u32 {
        if max == 0 {
            return 0;
        }
        (self.next_u64() % max as u64) as u32
    }

    /// Current state, for serialization.
    pub fn state(&self) -> [u64; 2] {
        self.state
    }
}

/// SplitMix64 step used for seeding.
#[inline]
fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

/// Derive the per-session seed handed to a rule-set.
///
/// Same token and game always give the same seed, so a session can be
/// replayed offline from its token and recorded inputs.
pub fn derive_session_seed(token: &SessionToken, game_id: u32) -> u64 {
    let mut hasher = Sha256::new();
    hasher.update(b"FLOE_SYNC_SEED_V1");
    hasher.update(token.as_bytes());
    hasher.update(game_id.to_le_bytes());
    let hash = hasher.finalize();

    let mut seed = [0u8; 8];
    seed.copy_from_slice(&hash[..8]);
    u64::from_le_bytes(seed)
}
