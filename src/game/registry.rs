//! Simulator Registry
//!
//! Maps a game id to the rule-set that runs it. The synchronization engine
//! never names a concrete game; the session layer asks the registry for a
//! type-erased [`SessionEngine`] instead.

use std::collections::BTreeMap;
use std::fmt;

use crate::config::EngineConfig;
use crate::game::packice::Packice;
use crate::game::simulator::Simulator;
use crate::sync::error::ContractViolation;
use crate::sync::server::{ServerSession, SessionEngine};

/// Identifier of a game, as lobbies refer to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GameId(pub u32);

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "game-{}", self.0)
    }
}

/// Id of the packice rule-set.
pub const PACKICE: GameId = GameId(0);

type SessionFactory =
    Box<dyn Fn(u64, &EngineConfig) -> Result<Box<dyn SessionEngine>, ContractViolation> + Send + Sync>;

/// A registered game.
pub struct GameEntry {
    name: &'static str,
    player_count: usize,
    factory: SessionFactory,
}

impl GameEntry {
    /// Display name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Clients per session.
    pub fn player_count(&self) -> usize {
        self.player_count
    }

    /// Start a fresh session seeded with `seed`.
    pub fn create(&self, seed: u64, config: &EngineConfig) -> Result<Box<dyn SessionEngine>, ContractViolation> {
        (self.factory)(seed, config)
    }
}

impl fmt::Debug for GameEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameEntry")
            .field("name", &self.name)
            .field("player_count", &self.player_count)
            .finish()
    }
}

/// Game id to rule-set lookup.
#[derive(Debug)]
pub struct SimulatorRegistry {
    games: BTreeMap<GameId, GameEntry>,
}

impl Default for SimulatorRegistry {
    /// Registry with every built-in game.
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(PACKICE, "packice", Packice::new);
        registry
    }
}

impl SimulatorRegistry {
    /// Registry without any game.
    pub fn empty() -> Self {
        Self {
            games: BTreeMap::new(),
        }
    }

    /// Register a rule-set built from the session seed.
    ///
    /// Replaces any game already registered under `id`.
    pub fn register<S, F>(&mut self, id: GameId, name: &'static str, make: F)
    where
        S: Simulator,
        F: Fn(u64) -> S + Send + Sync + 'static,
    {
        let player_count = make(0).player_count();
        let factory: SessionFactory = Box::new(move |seed, config| {
            let session = ServerSession::new(make(seed), config)?;
            Ok(Box::new(session) as Box<dyn SessionEngine>)
        });
        self.games.insert(
            id,
            GameEntry {
                name,
                player_count,
                factory,
            },
        );
    }

    /// Look a game up.
    pub fn get(&self, id: GameId) -> Option<&GameEntry> {
        self.games.get(&id)
    }

    /// Registered ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = GameId> + '_ {
        self.games.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::packice::PLAYER_COUNT;
    use crate::sync::server::SessionStatus;

    #[test]
    fn test_default_has_packice() {
        let registry = SimulatorRegistry::default();
        let entry = registry.get(PACKICE).unwrap();
        assert_eq!(entry.name(), "packice");
        assert_eq!(entry.player_count(), PLAYER_COUNT);
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec![PACKICE]);
    }

    #[test]
    fn test_unknown_game() {
        let registry = SimulatorRegistry::default();
        assert!(registry.get(GameId(42)).is_none());
        assert!(SimulatorRegistry::empty().get(PACKICE).is_none());
    }

    #[test]
    fn test_create_session() {
        let registry = SimulatorRegistry::default();
        let mut session = registry
            .get(PACKICE)
            .unwrap()
            .create(11, &EngineConfig::default())
            .unwrap();
        assert_eq!(session.player_count(), PLAYER_COUNT);
        assert_eq!(session.poll(), SessionStatus::Running);
        assert_eq!(session.canonical_clock(), 0);
    }
}
