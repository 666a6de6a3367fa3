//! Simulator Contract
//!
//! The interface every game rule-set implements. The synchronization engine
//! is generic over it and never looks inside a snapshot.
//!
//! ## Purity
//!
//! `frame` and `handle_input` must be pure functions of their arguments:
//! no wall-clock reads, no thread RNG, no I/O. Identical state, inputs and
//! durations must give identical results, otherwise the server's replay and
//! the client's speculative replay drift apart. Randomness belongs in the
//! snapshot as a [`DeterministicRng`](crate::core::rng::DeterministicRng).

use std::fmt;

use crate::core::ack::ClientIndex;
use crate::core::codec::{ByteReader, ByteWriter, CodecError};
use crate::core::hash::{hash_snapshot_bytes, StateHash};

/// Milliseconds on the session timebase.
pub type Millis = u64;

/// Final placement of every client, indexed by [`ClientIndex`].
///
/// Ranks are 1-based; tied clients share a rank and the following rank is
/// skipped (1, 1, 3).
#[derive(Clone, PartialEq, Eq)]
pub struct Ranking(Vec<u16>);

impl Ranking {
    /// Wrap precomputed ranks.
    pub fn from_ranks(ranks: Vec<u16>) -> Self {
        Self(ranks)
    }

    /// Rank clients by a score where higher is better.
    pub fn from_scores(scores: &[u64]) -> Self {
        let mut order: Vec<usize> = (0..scores.len()).collect();
        // Stable sort keeps index order among equal scores
        order.sort_by(|&a, &b| scores[b].cmp(&scores[a]));

        let mut ranks = vec![0u16; scores.len()];
        let mut rank = 1u16;
        for (position, &idx) in order.iter().enumerate() {
            if position > 0 && scores[idx] != scores[order[position - 1]] {
                rank = position as u16 + 1;
            }
            ranks[idx] = rank;
        }
        Self(ranks)
    }

    /// Ranks in client-index order.
    pub fn ranks(&self) -> &[u16] {
        &self.0
    }

    /// Rank of one client.
    pub fn rank_of(&self, client: ClientIndex) -> Option<u16> {
        self.0.get(client.as_usize()).copied()
    }

    /// Number of ranked clients.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether no client is ranked.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Ranking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ranking{:?}", self.0)
    }
}

/// A game rule-set.
///
/// One implementation per game; sessions pick theirs through the
/// [`SimulatorRegistry`](crate::game::registry::SimulatorRegistry).
pub trait Simulator: Send + 'static {
    /// Full mutable game state at one simulated instant.
    type Snapshot: Clone + Send + 'static;

    /// Normalized input payload stored in timeline entries.
    type Input: Clone + fmt::Debug + Send + 'static;

    /// Number of clients a session of this game holds.
    fn player_count(&self) -> usize;

    /// Initial state at session start.
    fn create_snapshot(&self) -> Self::Snapshot;

    /// Independent deep copy. Mutating the copy must never touch the source.
    fn copy_snapshot(&self, snapshot: &Self::Snapshot) -> Self::Snapshot {
        snapshot.clone()
    }

    /// Normalize client-submitted bytes into a payload.
    ///
    /// Must consume exactly the bytes of one input from `reader`.
    fn extract_input(&self, reader: &mut ByteReader<'_>) -> Result<Self::Input, CodecError>;

    /// Apply a client's intent without advancing time.
    fn handle_input(&self, snapshot: &mut Self::Snapshot, input: &Self::Input, client: ClientIndex);

    /// Advance the simulation by exactly `duration` milliseconds.
    fn frame(&self, snapshot: &mut Self::Snapshot, duration: Millis);

    /// Final ranking once the game is decided, `None` while it runs.
    fn ranking(&self, _snapshot: &Self::Snapshot) -> Option<Ranking> {
        None
    }

    /// Overwrite `snapshot` with a full state read from the wire.
    fn read_network_desc(
        &self,
        snapshot: &mut Self::Snapshot,
        reader: &mut ByteReader<'_>,
    ) -> Result<(), CodecError>;

    /// Write the full state for resynchronization.
    fn write_network_desc(&self, snapshot: &Self::Snapshot, writer: &mut ByteWriter);

    /// Hash of the snapshot's network description.
    fn snapshot_hash(&self, snapshot: &Self::Snapshot) -> StateHash {
        let mut writer = ByteWriter::with_capacity(256);
        self.write_network_desc(snapshot, &mut writer);
        hash_snapshot_bytes(writer.as_slice())
    }
}
