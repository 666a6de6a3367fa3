//! Game rule-sets.
//!
//! The [`Simulator`] contract every game implements, the registry sessions
//! are created from, and the built-in packice game.

pub mod packice;
pub mod registry;
pub mod simulator;

pub use packice::{Packice, PackiceInput, PackiceState};
pub use registry::{GameId, SimulatorRegistry, PACKICE};
pub use simulator::{Millis, Ranking, Simulator};
