//! Core primitives.
//!
//! Deterministic math and randomness for rule-sets, plus the byte-level
//! building blocks the wire protocol is assembled from.

pub mod ack;
pub mod codec;
pub mod fixed;
pub mod hash;
pub mod rng;
pub mod token;

pub use ack::{AckMask, ClientIndex, MAX_CLIENTS};
pub use codec::{ByteReader, ByteWriter, CodecError};
pub use fixed::{Fixed, FixedVec2, FIXED_ONE};
pub use hash::StateHash;
pub use rng::DeterministicRng;
pub use token::SessionToken;
