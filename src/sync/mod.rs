//! Input reconciliation.
//!
//! The timeline merge, the server's replay-and-prune engine and the
//! client's speculative replay, all generic over [`Simulator`](crate::game::Simulator).

pub mod client;
pub mod error;
pub mod input;
pub mod replay;
pub mod server;
pub mod timeline;

#[cfg(test)]
pub(crate) mod trace;

pub use client::ClientPredictor;
pub use error::{ContractViolation, ProtocolViolation, SyncError};
pub use input::{InputBatch, TimelineEntry};
pub use server::{ServerSession, SessionEngine, SessionStatus};
pub use timeline::Timeline;
