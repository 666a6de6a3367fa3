//! Synchronization Errors
//!
//! Two failure classes with different blast radius:
//!
//! - [`ProtocolViolation`]: one message is rejected, nothing is mutated,
//!   and the transport decides what happens to the connection.
//! - [`ContractViolation`]: the rule-set broke its contract; the owning
//!   session is torn down, other sessions keep running.
//!
//! Abandonment (every client gone) is a terminal session state, not an error.

use thiserror::Error;

use crate::core::ack::{ClientIndex, TooManyClients};
use crate::core::codec::CodecError;
use crate::game::simulator::Millis;

/// A client sent something the protocol does not allow.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Timestamps inside one batch go backwards.
    #[error("batch timestamps not non-decreasing: {later} after {earlier}")]
    NonMonotonicBatch {
        /// Timestamp seen first
        earlier: Millis,
        /// Smaller timestamp seen after it
        later: Millis,
    },

    /// A batch starts before the clock the client already reported.
    #[error("client {client} went back in time: {timestamp} < last reported {last_clock}")]
    ClockRegression {
        /// Offending client
        client: ClientIndex,
        /// First timestamp of the new batch
        timestamp: Millis,
        /// Clock reported with the previous batch
        last_clock: Millis,
    },

    /// A batch reports a clock too far ahead of the session.
    #[error("client {client} clock {clock} is beyond the allowed {limit}")]
    ClockAhead {
        /// Offending client
        client: ClientIndex,
        /// Clock the batch reported
        clock: Millis,
        /// Latest clock the session accepts right now
        limit: Millis,
    },

    /// Bytes follow the end-of-message sentinel.
    #[error("{0} bytes after end-of-message sentinel")]
    TrailingBytes(usize),

    /// Unknown record id or batch record kind.
    #[error("unknown record id {0}")]
    UnknownRecord(u8),

    /// Message ended before its sentinel.
    #[error("missing end-of-message sentinel")]
    MissingSentinel,

    /// Bytes could not be decoded.
    #[error("malformed record: {0}")]
    Malformed(#[from] CodecError),

    /// Client index outside the session.
    #[error("client {0} is not part of this session")]
    UnknownClient(ClientIndex),

    /// Client already left the session.
    #[error("client {0} has disconnected")]
    ClientDisconnected(ClientIndex),
}

/// The rule-set or its driver broke the simulator contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContractViolation {
    /// `frame` would have been called with a negative duration.
    #[error("negative frame duration: from {from} to {to}")]
    NegativeDuration {
        /// Clock the snapshot is at
        from: Millis,
        /// Earlier clock it was asked to reach
        to: Millis,
    },

    /// Replaying a copy changed the original.
    #[error("copy_snapshot returned a copy that aliases the original")]
    Aliasing,

    /// Session would need more acknowledgement bits than exist.
    #[error(transparent)]
    TooManyClients(#[from] TooManyClients),
}

/// Any synchronization failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Reject the message, keep the session.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolViolation),

    /// Fatal to the owning session.
    #[error("simulation contract violation: {0}")]
    Contract(#[from] ContractViolation),
}

impl SyncError {
    /// Whether the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, SyncError::Contract(_))
    }
}

impl From<CodecError> for SyncError {
    fn from(err: CodecError) -> Self {
        SyncError::Protocol(ProtocolViolation::Malformed(err))
    }
}
