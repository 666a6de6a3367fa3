//! Client Prediction Engine
//!
//! Hides latency by applying local inputs immediately to an optimistic
//! snapshot. Each authoritative state from the server replaces that
//! snapshot, and the inputs captured since the last send are replayed on
//! top of it with the same `frame` / `handle_input` sequence the server
//! will run once the batch arrives. Local feedback is instant and still
//! converges on the server's state.
//!
//! The exchange is ping-pong: the client flushes its buffer whenever an
//! authoritative state arrives, so at most one batch is in flight.

use tracing::debug;

use crate::config::EngineConfig;
use crate::core::ack::ClientIndex;
use crate::core::codec::{ByteReader, ByteWriter};
use crate::game::simulator::{Millis, Ranking, Simulator};
use crate::network::protocol::{
    finish_server_frame, read_client_record, read_end_game, write_batch, ClientBound,
};
use crate::sync::error::{ProtocolViolation, SyncError};
use crate::sync::replay::{advance_between, step_through};

/// An input captured locally and not yet sent.
#[derive(Debug, Clone)]
struct BufferedInput<I> {
    timestamp: Millis,
    /// Bytes exactly as they go on the wire.
    raw: Vec<u8>,
    input: I,
}

/// Per-connection prediction context.
pub struct ClientPredictor<S: Simulator> {
    sim: S,
    me: ClientIndex,
    snapshot: S::Snapshot,
    /// Simulated clock of `snapshot`.
    clock: Millis,
    last_send: Millis,
    buffer: Vec<BufferedInput<S::Input>>,
    max_sub_step: Millis,
    ranking: Option<Ranking>,
}

impl<S: Simulator> ClientPredictor<S> {
    /// Predictor for client `me`, starting from the initial snapshot at 0.
    pub fn new(sim: S, me: ClientIndex, config: &EngineConfig) -> Self {
        let snapshot = sim.create_snapshot();
        Self {
            sim,
            me,
            snapshot,
            clock: 0,
            last_send: 0,
            buffer: Vec::new(),
            max_sub_step: config.max_sub_step_ms,
            ranking: None,
        }
    }

    /// This client's index in the session.
    pub fn client(&self) -> ClientIndex {
        self.me
    }

    /// The optimistic snapshot, for rendering.
    pub fn snapshot(&self) -> &S::Snapshot {
        &self.snapshot
    }

    /// The rule-set.
    pub fn simulator(&self) -> &S {
        &self.sim
    }

    /// Simulated clock of the optimistic snapshot.
    pub fn clock(&self) -> Millis {
        self.clock
    }

    /// When the buffer was last flushed.
    pub fn last_send(&self) -> Millis {
        self.last_send
    }

    /// Inputs captured since the last flush.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Final ranking once the server announced it.
    pub fn ranking(&self) -> Option<&Ranking> {
        self.ranking.as_ref()
    }

    /// Capture an input at `now` and apply it at once.
    ///
    /// `now` may not precede the last buffered input, the last send or the
    /// clock the snapshot was already advanced to.
    pub fn add_input(&mut self, raw: &[u8], now: Millis) -> Result<(), SyncError> {
        let earliest = self
            .buffer
            .last()
            .map_or(self.last_send, |b| b.timestamp)
            .max(self.clock);
        if now < earliest {
            return Err(ProtocolViolation::NonMonotonicBatch {
                earlier: earliest,
                later: now,
            }
            .into());
        }

        let mut reader = ByteReader::new(raw);
        let input = self.sim.extract_input(&mut reader)?;
        let raw = raw[..reader.position()].to_vec();

        self.advance_to(now)?;
        self.sim.handle_input(&mut self.snapshot, &input, self.me);
        self.buffer.push(BufferedInput {
            timestamp: now,
            raw,
            input,
        });
        Ok(())
    }

    /// Extrapolate the optimistic snapshot to `now`.
    pub fn advance_to(&mut self, now: Millis) -> Result<(), SyncError> {
        advance_between(&self.sim, &mut self.snapshot, self.clock, now, self.max_sub_step)?;
        self.clock = now;
        Ok(())
    }

    /// Handle a frame from the server.
    ///
    /// Returns the next batch to send when the frame carried this client's
    /// authoritative state.
    pub fn on_server_frame(&mut self, frame: &[u8], now: Millis) -> Result<Option<Vec<u8>>, SyncError> {
        let mut reader = ByteReader::new(frame);
        let mut latest = None;
        loop {
            match read_client_record(&mut reader)? {
                ClientBound::GameData => {
                    let clock = reader.read_u64()?;
                    let mut state = self.sim.create_snapshot();
                    self.sim.read_network_desc(&mut state, &mut reader)?;
                    latest = Some((clock, state));
                }
                ClientBound::EndGame => {
                    let ranking = read_end_game(&mut reader)?;
                    debug!(client = %self.me, ?ranking, "game over");
                    self.ranking = Some(ranking);
                }
                ClientBound::Finish => break,
            }
        }
        if !reader.is_exhausted() {
            return Err(ProtocolViolation::TrailingBytes(reader.remaining()).into());
        }

        let Some((clock, state)) = latest else {
            return Ok(None);
        };
        if clock != self.last_send {
            debug!(client = %self.me, clock, last_send = self.last_send, "ignoring stale state");
            return Ok(None);
        }

        self.resync(state, now)?;
        Ok(Some(self.flush(now)))
    }

    /// Adopt an authoritative snapshot taken at the last send and replay
    /// the buffered inputs up to `now`.
    pub fn resync(&mut self, authoritative: S::Snapshot, now: Millis) -> Result<(), SyncError> {
        let mut snapshot = authoritative;
        let buffered = self
            .buffer
            .iter()
            .map(|b| (b.timestamp, Some(&b.input), self.me));
        let clock = step_through(&self.sim, &mut snapshot, self.last_send, buffered, self.max_sub_step)?;
        advance_between(&self.sim, &mut snapshot, clock, now, self.max_sub_step)?;

        self.snapshot = snapshot;
        self.clock = now;
        Ok(())
    }

    /// Encode the buffered inputs plus clock `now` and empty the buffer.
    pub fn flush(&mut self, now: Millis) -> Vec<u8> {
        let mut writer = ByteWriter::with_capacity(16 + self.buffer.len() * 24);
        write_batch(
            &mut writer,
            self.buffer.iter().map(|b| (b.timestamp, b.raw.as_slice())),
            now,
        );
        finish_server_frame(&mut writer);

        self.buffer.clear();
        self.last_send = now;
        writer.into_vec()
    }
}
