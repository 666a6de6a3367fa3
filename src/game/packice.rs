//! Packice Rule-Set
//!
//! Two players skate on a 9x21 field of ice tiles. Every tile a player
//! stands on wears down; a player left without a supporting tile falls in
//! and is eliminated. The last one standing wins.
//!
//! ## Determinism
//!
//! All state is integer (Q16.16 positions, `u16` tile integrity) and time
//! advances in internal 1 ms steps, so `frame(23)` and
//! `frame(10); frame(10); frame(3)` produce bit-identical snapshots.
//!
//! ## Cracks
//!
//! Every [`CRACK_INTERVAL_MS`] of simulated time a random tile takes
//! [`CRACK_DAMAGE`]. The generator lives in the snapshot and is part of the
//! network description, so replays on the server and on clients draw the
//! same tiles.

use crate::core::ack::ClientIndex;
use crate::core::codec::{ByteReader, ByteWriter, CodecError};
use crate::core::fixed::{fixed_div, fixed_mul, from_f32, to_fixed, Fixed, FixedVec2, FIXED_HALF, FIXED_ONE};
use crate::core::rng::DeterministicRng;
use crate::game::simulator::{Millis, Ranking, Simulator};

// =============================================================================
// CONSTANTS
// =============================================================================

/// Tiles per row.
pub const TILES_X: usize = 9;

/// Tile rows.
pub const TILES_Y: usize = 21;

/// Total tiles.
pub const TILE_COUNT: usize = TILES_X * TILES_Y;

/// Players per session.
pub const PLAYER_COUNT: usize = 2;

/// Integrity of a fresh tile, in supporting-milliseconds.
pub const TILE_INTEGRITY: u16 = 4000;

/// Damage of one random crack.
pub const CRACK_DAMAGE: u16 = 1000;

/// Simulated time between cracks.
pub const CRACK_INTERVAL_MS: Millis = 1500;

/// Top-left corner of the tile field.
const FIELD_ORIGIN: FixedVec2 = FixedVec2::new(to_fixed(0.9), to_fixed(1.4));

/// Distance travelled per millisecond at full stick.
const PLAYER_SPEED: Fixed = to_fixed(0.001);

/// Centers closer than this push each other apart (two radii of 0.5).
const MIN_SEPARATION: Fixed = FIXED_ONE;

/// A tile supports a player whose center is closer than this to its center.
const SUPPORT_RANGE: Fixed = FIXED_ONE;

const SPAWNS: [FixedVec2; PLAYER_COUNT] = [
    FixedVec2::new(to_fixed(5.4), to_fixed(2.9)),
    FixedVec2::new(to_fixed(5.4), to_fixed(20.9)),
];

/// Tile offsets checked for support: center first, then the 8 neighbours.
const NEIGHBOURHOOD: [(i32, i32); 9] = [
    (0, 0),
    (-1, 0),
    (1, 0),
    (0, -1),
    (0, 1),
    (-1, -1),
    (1, -1),
    (-1, 1),
    (1, 1),
];

// =============================================================================
// INPUT
// =============================================================================

/// Normalized joystick direction, length at most 1.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct PackiceInput {
    /// Stick direction in Q16.16.
    pub direction: FixedVec2,
}

impl PackiceInput {
    /// Normalize raw stick axes.
    pub fn from_axes(x: f32, y: f32) -> Self {
        Self {
            direction: FixedVec2::new(from_f32(x), from_f32(y)).clamp_length_to_one(),
        }
    }

    /// Wire bytes of a stick position, as a client sends them.
    pub fn encode_axes(x: f32, y: f32) -> [u8; 8] {
        let mut raw = [0u8; 8];
        raw[..4].copy_from_slice(&x.to_le_bytes());
        raw[4..].copy_from_slice(&y.to_le_bytes());
        raw
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// One skater.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Skater {
    /// Center position.
    pub position: FixedVec2,
    /// Current stick direction.
    pub direction: FixedVec2,
    /// Elapsed time at which the skater fell in.
    pub eliminated_at: Option<Millis>,
}

impl Skater {
    fn spawn(position: FixedVec2) -> Self {
        Self {
            position,
            direction: FixedVec2::ZERO,
            eliminated_at: None,
        }
    }

    /// Whether the skater is still on the ice.
    pub fn is_alive(&self) -> bool {
        self.eliminated_at.is_none()
    }
}

/// Full packice game state.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PackiceState {
    /// Simulated time since the session started.
    pub elapsed: Millis,
    /// Crack generator.
    pub rng: DeterministicRng,
    /// Skaters by client index.
    pub skaters: Vec<Skater>,
    /// Tile integrity, row-major.
    pub tiles: Vec<u16>,
}

impl PackiceState {
    /// Number of skaters still on the ice.
    pub fn alive(&self) -> usize {
        self.skaters.iter().filter(|s| s.is_alive()).count()
    }

    /// Whether the game is decided.
    pub fn is_decided(&self) -> bool {
        self.alive() <= 1
    }

    /// Integrity of the tile at grid coordinates.
    pub fn tile(&self, tx: usize, ty: usize) -> Option<u16> {
        if tx >= TILES_X {
            return None;
        }
        self.tiles.get(ty * TILES_X + tx).copied()
    }

    fn step(&mut self) {
        if self.is_decided() {
            self.elapsed += 1;
            return;
        }

        for skater in self.skaters.iter_mut().filter(|s| s.is_alive()) {
            skater.position = skater.position + skater.direction.scale(PLAYER_SPEED);
        }
        self.separate();

        for idx in 0..self.skaters.len() {
            if self.skaters[idx].is_alive() && !self.wear_support(self.skaters[idx].position) {
                self.skaters[idx].eliminated_at = Some(self.elapsed);
            }
        }

        self.elapsed += 1;
        if self.elapsed % CRACK_INTERVAL_MS == 0 {
            let idx = self.rng.next_int(TILE_COUNT as u32) as usize;
            if let Some(tile) = self.tiles.get_mut(idx) {
                *tile = tile.saturating_sub(CRACK_DAMAGE);
            }
        }
    }

    /// Push overlapping skaters apart, half the overlap each.
    fn separate(&mut self) {
        for i in 0..self.skaters.len() {
            for j in (i + 1)..self.skaters.len() {
                let (a, b) = (self.skaters[i], self.skaters[j]);
                if !a.is_alive() || !b.is_alive() {
                    continue;
                }
                let delta = b.position - a.position;
                let dist_sq = delta.length_squared_wide();
                if dist_sq == 0 || dist_sq >= fixed_mul(MIN_SEPARATION, MIN_SEPARATION) as i64 {
                    continue;
                }

                let dist = delta.length();
                if dist == 0 {
                    continue;
                }
                let normal = FixedVec2::new(fixed_div(delta.x, dist), fixed_div(delta.y, dist));
                let correction = normal.scale(fixed_mul(MIN_SEPARATION - dist, FIXED_HALF));
                self.skaters[i].position = a.position - correction;
                self.skaters[j].position = b.position + correction;
            }
        }
    }

    /// Wear every tile under `position`. Returns whether any tile held.
    fn wear_support(&mut self, position: FixedVec2) -> bool {
        let local = position - FIELD_ORIGIN;
        let center_x = local.x >> 16;
        let center_y = local.y >> 16;

        let mut supported = false;
        for (dx, dy) in NEIGHBOURHOOD {
            let (tx, ty) = (center_x + dx, center_y + dy);
            if tx < 0 || ty < 0 || tx as usize >= TILES_X || ty as usize >= TILES_Y {
                continue;
            }
            let idx = ty as usize * TILES_X + tx as usize;
            if self.tiles[idx] == 0 {
                continue;
            }

            let tile_center = FIELD_ORIGIN
                + FixedVec2::new(tx * FIXED_ONE + FIXED_HALF, ty * FIXED_ONE + FIXED_HALF);
            if position.distance_squared_wide(tile_center) < fixed_mul(SUPPORT_RANGE, SUPPORT_RANGE) as i64 {
                self.tiles[idx] -= 1;
                supported = true;
            }
        }
        supported
    }
}

// =============================================================================
// RULE-SET
// =============================================================================

/// The packice rule-set, seeded per session.
#[derive(Clone, Debug)]
pub struct Packice {
    seed: u64,
}

impl Packice {
    /// Rule-set whose crack sequence derives from `seed`.
    pub fn new(seed: u64) -> Self {
        Self { seed }
    }
}

impl Simulator for Packice {
    type Snapshot = PackiceState;
    type Input = PackiceInput;

    fn player_count(&self) -> usize {
        PLAYER_COUNT
    }

    fn create_snapshot(&self) -> PackiceState {
        PackiceState {
            elapsed: 0,
            rng: DeterministicRng::new(self.seed),
            skaters: SPAWNS.iter().copied().map(Skater::spawn).collect(),
            tiles: vec![TILE_INTEGRITY; TILE_COUNT],
        }
    }

    fn extract_input(&self, reader: &mut ByteReader<'_>) -> Result<PackiceInput, CodecError> {
        let x = reader.read_f32()?;
        let y = reader.read_f32()?;
        Ok(PackiceInput::from_axes(x, y))
    }

    fn handle_input(&self, snapshot: &mut PackiceState, input: &PackiceInput, client: ClientIndex) {
        if let Some(skater) = snapshot.skaters.get_mut(client.as_usize()) {
            if skater.is_alive() {
                skater.direction = input.direction;
            }
        }
    }

    fn frame(&self, snapshot: &mut PackiceState, duration: Millis) {
        for done in 0..duration {
            if snapshot.is_decided() {
                // Nothing moves once decided, only the clock runs
                snapshot.elapsed += duration - done;
                return;
            }
            snapshot.step();
        }
    }

    /// Later elimination ranks higher; skaters still standing share the top.
    fn ranking(&self, snapshot: &PackiceState) -> Option<Ranking> {
        if !snapshot.is_decided() {
            return None;
        }
        let scores: Vec<u64> = snapshot
            .skaters
            .iter()
            .map(|s| s.eliminated_at.unwrap_or(snapshot.elapsed))
            .collect();
        Some(Ranking::from_scores(&scores))
    }

    fn read_network_desc(
        &self,
        snapshot: &mut PackiceState,
        reader: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        let elapsed = reader.read_u64()?;
        let rng = DeterministicRng::from_state([reader.read_u64()?, reader.read_u64()?]);

        let mut skaters = Vec::with_capacity(PLAYER_COUNT);
        for _ in 0..PLAYER_COUNT {
            let position = FixedVec2::new(reader.read_i32()?, reader.read_i32()?);
            let direction = FixedVec2::new(reader.read_i32()?, reader.read_i32()?);
            let eliminated_at = match reader.read_u8()? {
                0 => None,
                1 => Some(reader.read_u64()?),
                _ => return Err(CodecError::InvalidValue("elimination flag")),
            };
            skaters.push(Skater {
                position,
                direction,
                eliminated_at,
            });
        }

        let mut tiles = Vec::with_capacity(TILE_COUNT);
        for _ in 0..TILE_COUNT {
            tiles.push(reader.read_u16()?);
        }

        *snapshot = PackiceState {
            elapsed,
            rng,
            skaters,
            tiles,
        };
        Ok(())
    }

    fn write_network_desc(&self, snapshot: &PackiceState, writer: &mut ByteWriter) {
        let [s0, s1] = snapshot.rng.state();
        writer.write_u64(snapshot.elapsed).write_u64(s0).write_u64(s1);

        for skater in &snapshot.skaters {
            writer
                .write_i32(skater.position.x)
                .write_i32(skater.position.y)
                .write_i32(skater.direction.x)
                .write_i32(skater.direction.y);
            match skater.eliminated_at {
                Some(at) => writer.write_u8(1).write_u64(at),
                None => writer.write_u8(0),
            };
        }

        for &tile in &snapshot.tiles {
            writer.write_u16(tile);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spawn_stands_on_single_tile() {
        let sim = Packice::new(1);
        let mut state = sim.create_snapshot();
        sim.frame(&mut state, 100);

        assert_eq!(state.tile(4, 1), Some(TILE_INTEGRITY - 100));
        assert_eq!(state.tile(4, 19), Some(TILE_INTEGRITY - 100));
        assert_eq!(state.tile(3, 1), Some(TILE_INTEGRITY));
        assert_eq!(state.alive(), 2);
    }

    #[test]
    fn test_input_is_clamped() {
        let input = PackiceInput::from_axes(3.0, 4.0);
        let len = input.direction.length();
        assert!((len - FIXED_ONE).abs() <= 8, "length {len}");

        let small = PackiceInput::from_axes(0.25, 0.0);
        assert_eq!(small.direction, FixedVec2::new(FIXED_ONE / 4, 0));

        assert_eq!(PackiceInput::from_axes(f32::NAN, 0.0).direction, FixedVec2::ZERO);
    }

    #[test]
    fn test_huge_axes_are_clamped() {
        let sim = Packice::new(1);
        let raw = PackiceInput::encode_axes(1000.0, 0.0);
        let input = sim.extract_input(&mut ByteReader::new(&raw)).unwrap();
        assert_eq!(input.direction, FixedVec2::new(FIXED_ONE, 0));

        for (x, y) in [(-1e10, -1e10), (1e10, -1e10), (f32::MAX, f32::MIN), (-1e10, 0.5)] {
            let raw = PackiceInput::encode_axes(x, y);
            let input = sim.extract_input(&mut ByteReader::new(&raw)).unwrap();
            assert!(
                input.direction.length_squared_wide() <= FIXED_ONE as i64,
                "({x}, {y}) -> {:?}",
                input.direction
            );
        }
    }

    #[test]
    fn test_decided_game_only_runs_the_clock() {
        let sim = Packice::new(4);
        let mut state = sim.create_snapshot();
        state.skaters[1].eliminated_at = Some(0);
        let tiles = state.tiles.clone();

        sim.frame(&mut state, 1 << 40);
        assert_eq!(state.elapsed, 1 << 40);
        assert_eq!(state.tiles, tiles);
        assert_eq!(state.rng, DeterministicRng::new(4));

        // Same result as stepping through the decision point in pieces
        let mut live = sim.create_snapshot();
        let mut pieces = sim.create_snapshot();
        sim.handle_input(&mut live, &PackiceInput::from_axes(0.0, 1.0), ClientIndex(0));
        sim.handle_input(&mut pieces, &PackiceInput::from_axes(0.0, 1.0), ClientIndex(0));
        sim.frame(&mut live, 6000);
        for _ in 0..60 {
            sim.frame(&mut pieces, 100);
        }
        assert!(live.is_decided());
        assert_eq!(live, pieces);
    }

    #[test]
    fn test_extract_input_reads_two_floats() {
        let sim = Packice::new(1);
        let raw = PackiceInput::encode_axes(0.0, -1.0);
        let mut reader = ByteReader::new(&raw);
        let input = sim.extract_input(&mut reader).unwrap();
        assert!(reader.is_exhausted());
        assert_eq!(input.direction, FixedVec2::new(0, -FIXED_ONE));
    }

    #[test]
    fn test_skater_moves() {
        let sim = Packice::new(1);
        let mut state = sim.create_snapshot();
        let start = state.skaters[0].position;
        sim.handle_input(&mut state, &PackiceInput::from_axes(1.0, 0.0), ClientIndex(0));
        sim.frame(&mut state, 1000);

        let moved = state.skaters[0].position - start;
        assert_eq!(moved.x, PLAYER_SPEED * 1000);
        assert_eq!(moved.y, 0);
    }

    #[test]
    fn test_overlapping_skaters_separate() {
        let sim = Packice::new(1);
        let mut state = sim.create_snapshot();
        let a = state.skaters[0].position;
        state.skaters[1].position = a + FixedVec2::new(FIXED_HALF, 0);

        sim.frame(&mut state, 1);
        let gap = state.skaters[1].position - state.skaters[0].position;
        assert!(gap.x >= MIN_SEPARATION - 4, "gap {:?}", gap);
    }

    #[test]
    fn test_idle_skater_falls_first() {
        let sim = Packice::new(99);
        let mut state = sim.create_snapshot();
        sim.handle_input(&mut state, &PackiceInput::from_axes(0.0, 1.0), ClientIndex(0));

        let mut ranking = None;
        for _ in 0..100 {
            sim.frame(&mut state, 50);
            ranking = sim.ranking(&state);
            if ranking.is_some() {
                break;
            }
        }

        let ranking = ranking.unwrap();
        assert_eq!(ranking.ranks(), &[1, 2]);
        let fell = state.skaters[1].eliminated_at.unwrap();
        assert!(fell <= TILE_INTEGRITY as Millis);
        assert!(state.skaters[0].is_alive());
    }

    #[test]
    fn test_eliminated_skater_ignores_input() {
        let sim = Packice::new(1);
        let mut state = sim.create_snapshot();
        state.skaters[0].eliminated_at = Some(10);
        sim.handle_input(&mut state, &PackiceInput::from_axes(1.0, 0.0), ClientIndex(0));
        assert_eq!(state.skaters[0].direction, FixedVec2::ZERO);
    }

    #[test]
    fn test_cracks_follow_seed() {
        let sim = Packice::new(5);
        let mut a = sim.create_snapshot();
        let mut b = sim.create_snapshot();
        sim.frame(&mut a, CRACK_INTERVAL_MS);
        for _ in 0..CRACK_INTERVAL_MS {
            sim.frame(&mut b, 1);
        }
        assert_eq!(a, b);

        let mut rng = DeterministicRng::new(5);
        let idx = rng.next_int(TILE_COUNT as u32) as usize;
        let spawn_tiles = [TILES_X + 4, 19 * TILES_X + 4];
        let worn = if spawn_tiles.contains(&idx) {
            TILE_INTEGRITY - CRACK_INTERVAL_MS as u16
        } else {
            TILE_INTEGRITY
        };
        assert_eq!(a.tiles[idx], worn - CRACK_DAMAGE);
        assert_eq!(a.rng, rng);
    }

    #[test]
    fn test_network_desc_restores_state() {
        let sim = Packice::new(3);
        let mut state = sim.create_snapshot();
        sim.handle_input(&mut state, &PackiceInput::from_axes(-0.5, 0.5), ClientIndex(1));
        sim.frame(&mut state, 2000);

        let mut writer = ByteWriter::new();
        sim.write_network_desc(&state, &mut writer);
        let mut restored = sim.create_snapshot();
        let mut reader = ByteReader::new(writer.as_slice());
        sim.read_network_desc(&mut restored, &mut reader).unwrap();

        assert!(reader.is_exhausted());
        assert_eq!(restored, state);

        // Restored generator keeps drawing the same cracks
        sim.frame(&mut state, 1500);
        sim.frame(&mut restored, 1500);
        assert_eq!(restored, state);
    }

    #[test]
    fn test_bad_elimination_flag() {
        let sim = Packice::new(3);
        let state = sim.create_snapshot();
        let mut writer = ByteWriter::new();
        sim.write_network_desc(&state, &mut writer);
        let mut bytes = writer.into_vec();
        // elapsed + rng + position + direction
        bytes[8 + 16 + 16] = 7;

        let mut restored = sim.create_snapshot();
        let err = sim
            .read_network_desc(&mut restored, &mut ByteReader::new(&bytes))
            .unwrap_err();
        assert_eq!(err, CodecError::InvalidValue("elimination flag"));
    }
}
