//! Session Runtime
//!
//! Each session runs on its own tokio task. The task owns the session's
//! [`SessionEngine`] outright, so no lock guards game state: frames and
//! disconnects arrive over an mpsc queue and are handled one at a time,
//! interleaved with a fixed-period tick that checks for completion.
//!
//! ```text
//! transport ──SessionCommand──▶ run_session ──ClientOutbound──▶ client i
//!                                  │
//!                                  └── SessionEngine (merge, replay, fold)
//! ```
//!
//! Sessions share nothing. The [`SessionManager`] only keeps the command
//! sender of each live session, keyed by its token.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::core::ack::ClientIndex;
use crate::core::rng::derive_session_seed;
use crate::core::token::SessionToken;
use crate::game::registry::{GameId, SimulatorRegistry};
use crate::game::simulator::Ranking;
use crate::network::protocol::encode_end_game;
use crate::sync::error::ContractViolation;
use crate::sync::server::{SessionEngine, SessionStatus};

/// Session layer errors.
#[derive(Debug, Error)]
pub enum SessionError {
    /// No rule-set is registered under this id.
    #[error("unknown game {0}")]
    UnknownGame(GameId),

    /// No live session has this token.
    #[error("unknown session {0}")]
    UnknownSession(SessionToken),

    /// The game needs a different number of clients.
    #[error("game needs {expected} clients, got {got}")]
    WrongClientCount {
        /// Clients the game is played with
        expected: usize,
        /// Clients supplied
        got: usize,
    },

    /// The session task has ended.
    #[error("session closed")]
    Closed,

    /// The session could not be created.
    #[error(transparent)]
    Contract(#[from] ContractViolation),
}

/// Input to a session task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// A complete frame from one client.
    Frame {
        /// Sender
        client: ClientIndex,
        /// Frame bytes
        bytes: Vec<u8>,
    },
    /// The transport lost a client.
    Disconnect {
        /// Lost client
        client: ClientIndex,
    },
}

/// Output of a session task to one client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientOutbound {
    /// Frame to deliver as is.
    Frame(Vec<u8>),
    /// The client's last frame was rejected. Whether to drop the connection
    /// is up to the transport.
    Rejected {
        /// Why
        reason: String,
    },
}

/// How a session task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Natural completion; the ranking was broadcast.
    Finished(Ranking),
    /// Every client left.
    Abandoned,
    /// Torn down after a contract violation.
    Failed(String),
}

// =============================================================================
// SESSION TASK
// =============================================================================

/// Drive one session until it finishes, is abandoned or fails.
///
/// `clients[i]` receives everything addressed to client `i`. Dropping every
/// command sender counts as every client disconnecting.
#[instrument(skip_all, fields(session = %token))]
pub async fn run_session(
    token: SessionToken,
    mut engine: Box<dyn SessionEngine>,
    clients: Vec<mpsc::Sender<ClientOutbound>>,
    mut commands: mpsc::Receiver<SessionCommand>,
    tick: Duration,
) -> SessionOutcome {
    let mut connected = vec![true; clients.len()];
    let mut ticker = interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    info!(players = clients.len(), "session started");

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(SessionCommand::Frame { client, bytes }) => {
                    let outbound = match engine.handle_message(client, &bytes) {
                        Ok(reply) => ClientOutbound::Frame(reply),
                        Err(err) => ClientOutbound::Rejected { reason: err.to_string() },
                    };
                    deliver(&clients, client, outbound);
                }
                Some(SessionCommand::Disconnect { client }) => {
                    if engine.disconnect(client) {
                        if let Some(flag) = connected.get_mut(client.as_usize()) {
                            *flag = false;
                        }
                    }
                }
                None => {
                    debug!("command queue closed");
                    for idx in 0..clients.len() {
                        engine.disconnect(ClientIndex(idx as u8));
                    }
                    connected.fill(false);
                }
            },
            _ = ticker.tick() => {}
        }

        match engine.poll() {
            SessionStatus::Running => continue,
            SessionStatus::Finished(ranking) => {
                let frame = encode_end_game(&ranking);
                for (idx, _) in connected.iter().enumerate().filter(|(_, c)| **c) {
                    deliver(&clients, ClientIndex(idx as u8), ClientOutbound::Frame(frame.clone()));
                }
                info!(?ranking, clock = engine.canonical_clock(), "session finished");
                return SessionOutcome::Finished(ranking);
            }
            SessionStatus::Abandoned => {
                info!("session abandoned");
                return SessionOutcome::Abandoned;
            }
            SessionStatus::Failed(reason) => {
                warn!(%reason, "session failed");
                return SessionOutcome::Failed(reason);
            }
        }
    }
}

/// Queue a message for one client without waiting.
///
/// A full queue drops the message instead of stalling every other client of
/// the session; the transport sees the backlog and decides whether to cut
/// the connection.
fn deliver(clients: &[mpsc::Sender<ClientOutbound>], client: ClientIndex, message: ClientOutbound) {
    let Some(sender) = clients.get(client.as_usize()) else {
        return;
    };
    match sender.try_send(message) {
        Ok(()) => {}
        Err(TrySendError::Full(_)) => warn!(%client, "client queue full, message dropped"),
        Err(TrySendError::Closed(_)) => debug!(%client, "client channel closed"),
    }
}

// =============================================================================
// SESSION MANAGER
// =============================================================================

/// Creates sessions and routes commands to them.
pub struct SessionManager {
    registry: Arc<SimulatorRegistry>,
    config: EngineConfig,
    sessions: Arc<RwLock<BTreeMap<SessionToken, mpsc::Sender<SessionCommand>>>>,
}

impl SessionManager {
    /// Create a manager over a registry.
    pub fn new(registry: SimulatorRegistry, config: EngineConfig) -> Self {
        Self {
            registry: Arc::new(registry),
            config,
            sessions: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// The games sessions can be created for.
    pub fn registry(&self) -> &SimulatorRegistry {
        &self.registry
    }

    /// Start a session of `game` for `clients` (index order).
    ///
    /// The returned handle resolves once the session has ended and been
    /// forgotten by the manager.
    pub async fn create_session(
        &self,
        game: GameId,
        clients: Vec<mpsc::Sender<ClientOutbound>>,
    ) -> Result<(SessionToken, JoinHandle<SessionOutcome>), SessionError> {
        let entry = self.registry.get(game).ok_or(SessionError::UnknownGame(game))?;
        if clients.len() != entry.player_count() {
            return Err(SessionError::WrongClientCount {
                expected: entry.player_count(),
                got: clients.len(),
            });
        }

        let (command_tx, command_rx) = mpsc::channel(self.config.command_queue);
        let mut sessions = self.sessions.write().await;
        let mut token = SessionToken::random();
        while sessions.contains_key(&token) {
            token = SessionToken::random();
        }
        let engine = entry.create(derive_session_seed(&token, game.0), &self.config)?;
        sessions.insert(token, command_tx);
        drop(sessions);
        info!(session = %token, %game, name = entry.name(), "created session");

        let sessions = Arc::clone(&self.sessions);
        let tick = self.config.tick_interval();
        let handle = tokio::spawn(async move {
            let outcome = run_session(token, engine, clients, command_rx, tick).await;
            sessions.write().await.remove(&token);
            outcome
        });
        Ok((token, handle))
    }

    /// Forward a client frame.
    pub async fn send_frame(
        &self,
        token: SessionToken,
        client: ClientIndex,
        bytes: Vec<u8>,
    ) -> Result<(), SessionError> {
        self.command(token, SessionCommand::Frame { client, bytes }).await
    }

    /// Report a lost client.
    pub async fn disconnect(&self, token: SessionToken, client: ClientIndex) -> Result<(), SessionError> {
        self.command(token, SessionCommand::Disconnect { client }).await
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn command(&self, token: SessionToken, command: SessionCommand) -> Result<(), SessionError> {
        let sender = self
            .sessions
            .read()
            .await
            .get(&token)
            .cloned()
            .ok_or(SessionError::UnknownSession(token))?;
        sender.send(command).await.map_err(|_| SessionError::Closed)
    }
}
