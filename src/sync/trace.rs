//! Recording rule-set used by the synchronization tests.
//!
//! Every `frame` and `handle_input` call is appended to the snapshot, so a
//! test can compare the exact call sequence two replays issued.

use crate::core::ack::ClientIndex;
use crate::core::codec::{ByteReader, ByteWriter, CodecError};
use crate::game::simulator::{Millis, Ranking, Simulator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceEvent {
    Frame(Millis),
    Apply(ClientIndex, u32),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TraceState {
    pub elapsed: Millis,
    pub events: Vec<TraceEvent>,
}

impl TraceState {
    pub fn applied(&self) -> Vec<(ClientIndex, u32)> {
        self.events
            .iter()
            .filter_map(|e| match *e {
                TraceEvent::Apply(client, value) => Some((client, value)),
                TraceEvent::Frame(_) => None,
            })
            .collect()
    }
}

pub struct TraceSim {
    players: usize,
    /// Game is decided once this much time has passed.
    pub finish_at: Option<Millis>,
}

impl TraceSim {
    pub fn new(players: usize) -> Self {
        Self {
            players,
            finish_at: None,
        }
    }

    pub fn finishing_at(players: usize, at: Millis) -> Self {
        Self {
            players,
            finish_at: Some(at),
        }
    }
}

impl Simulator for TraceSim {
    type Snapshot = TraceState;
    type Input = u32;

    fn player_count(&self) -> usize {
        self.players
    }

    fn create_snapshot(&self) -> TraceState {
        TraceState::default()
    }

    fn extract_input(&self, reader: &mut ByteReader<'_>) -> Result<u32, CodecError> {
        reader.read_u32()
    }

    fn handle_input(&self, snapshot: &mut TraceState, input: &u32, client: ClientIndex) {
        snapshot.events.push(TraceEvent::Apply(client, *input));
    }

    fn frame(&self, snapshot: &mut TraceState, duration: Millis) {
        snapshot.elapsed += duration;
        snapshot.events.push(TraceEvent::Frame(duration));
    }

    fn ranking(&self, snapshot: &TraceState) -> Option<Ranking> {
        let finish_at = self.finish_at?;
        if snapshot.elapsed < finish_at {
            return None;
        }
        let mut scores = vec![0u64; self.players];
        for (client, _) in snapshot.applied() {
            if let Some(score) = scores.get_mut(client.as_usize()) {
                *score += 1;
            }
        }
        Some(Ranking::from_scores(&scores))
    }

    fn read_network_desc(
        &self,
        snapshot: &mut TraceState,
        reader: &mut ByteReader<'_>,
    ) -> Result<(), CodecError> {
        let elapsed = reader.read_u64()?;
        let count = reader.read_u32()?;
        let mut events = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let event = match reader.read_u8()? {
                0 => TraceEvent::Frame(reader.read_u64()?),
                1 => TraceEvent::Apply(ClientIndex(reader.read_u8()?), reader.read_u32()?),
                _ => return Err(CodecError::InvalidValue("trace event tag")),
            };
            events.push(event);
        }
        *snapshot = TraceState { elapsed, events };
        Ok(())
    }

    fn write_network_desc(&self, snapshot: &TraceState, writer: &mut ByteWriter) {
        writer
            .write_u64(snapshot.elapsed)
            .write_u32(snapshot.events.len() as u32);
        for event in &snapshot.events {
            match *event {
                TraceEvent::Frame(duration) => {
                    writer.write_u8(0).write_u64(duration);
                }
                TraceEvent::Apply(client, value) => {
                    writer.write_u8(1).write_u8(client.0).write_u32(value);
                }
            }
        }
    }
}
