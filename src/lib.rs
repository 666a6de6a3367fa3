//! # Floe Sync
//!
//! Input reconciliation and client prediction for real-time multiplayer
//! games. The server keeps one authoritative simulation per session, every
//! client runs its own speculative copy, and both replay the same inputs
//! through the same deterministic rule-set so they converge.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        FLOE SYNC                             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic and wire primitives         │
//! │  ├── fixed.rs    - Q16.16 fixed-point arithmetic             │
//! │  ├── rng.rs      - Deterministic Xorshift128+ PRNG           │
//! │  ├── hash.rs     - Snapshot hashing                          │
//! │  ├── codec.rs    - Little-endian cursor codec                │
//! │  ├── token.rs    - 8-byte session tokens                     │
//! │  └── ack.rs      - Bit-per-client acknowledgement masks      │
//! │                                                              │
//! │  game/           - Rule-sets (deterministic)                 │
//! │  ├── simulator.rs- Simulator contract                        │
//! │  ├── registry.rs - Game id -> rule-set                       │
//! │  └── packice.rs  - Ice-breaking reference game               │
//! │                                                              │
//! │  sync/           - Reconciliation (deterministic)            │
//! │  ├── timeline.rs - Sorted, mergeable input timeline          │
//! │  ├── replay.rs   - Sub-step chunked replay                   │
//! │  ├── server.rs   - Replay-and-prune server engine            │
//! │  └── client.rs   - Speculative client replay                 │
//! │                                                              │
//! │  network/        - Networking (non-deterministic)            │
//! │  ├── protocol.rs - Wire records                              │
//! │  └── session.rs  - Per-session tokio tasks                   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! `core/`, `game/` and `sync/` never read the clock, never use thread
//! randomness and never iterate a `HashMap`. Given the same seed and the
//! same inputs at the same timestamps, every participant computes the same
//! snapshot bytes.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod config;
pub mod core;
pub mod game;
pub mod network;
pub mod sync;

// Re-export commonly used types
pub use config::{ConfigError, EngineConfig};
pub use crate::core::{AckMask, ClientIndex, SessionToken};
pub use game::{GameId, Millis, Ranking, Simulator, SimulatorRegistry};
pub use network::{SessionManager, SessionOutcome};
pub use sync::{ClientPredictor, ServerSession, SessionEngine, SessionStatus, SyncError};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
