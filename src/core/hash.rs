//! State Hashing
//!
//! SHA-256 over a snapshot's network description. Two snapshots with the
//! same hash serialize identically, which is what server and client need to
//! agree on. Used for desync diagnostics and to catch `copy_snapshot`
//! implementations that share state between copies.

use sha2::{Digest, Sha256};

/// Hash output type (256 bits).
pub type StateHash = [u8; 32];

/// Deterministic hasher with a domain separator.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Create a hasher with a domain separator.
    pub fn new(domain: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain);
        Self { hasher }
    }

    /// Hasher for serialized snapshots.
    pub fn for_snapshot() -> Self {
        Self::new(b"FLOE_SYNC_SNAPSHOT_V1")
    }

    /// Feed raw bytes.
    #[inline]
    pub fn update_bytes(&mut self, bytes: &[u8]) {
        self.hasher.update(bytes);
    }

    /// Feed a u64 (little-endian).
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Finish and return the hash.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// Hash a serialized snapshot (its network description bytes).
pub fn hash_snapshot_bytes(desc: &[u8]) -> StateHash {
    let mut hasher = StateHasher::for_snapshot();
    hasher.update_u64(desc.len() as u64);
    hasher.update_bytes(desc);
    hasher.finalize()
}

/// Short hex prefix of a hash, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..6])
}
