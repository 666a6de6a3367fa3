//! Networking layer (non-deterministic).
//!
//! Wire records exchanged with clients and the tokio tasks that run
//! sessions. Sockets, lobbies and matchmaking live with the transport.

pub mod protocol;
pub mod session;

pub use protocol::{BatchKind, ClientBound, ServerBound};
pub use session::{
    run_session, ClientOutbound, SessionCommand, SessionError, SessionManager, SessionOutcome,
};
