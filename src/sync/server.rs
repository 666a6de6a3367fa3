//! Server Reconciliation Engine
//!
//! One [`ServerSession`] per running game. It owns the canonical snapshot
//! and the session timeline and handles one client message at a time:
//!
//! 1. Decode and validate the whole frame. Nothing is mutated before this
//!    succeeds.
//! 2. Merge each batch into the timeline.
//! 3. Replay a scratch copy of the canonical snapshot up to the sender's
//!    clock and answer the sender with it.
//! 4. Acknowledge the sender's clock and fold every entry nobody needs
//!    anymore into the canonical snapshot.
//!
//! The canonical snapshot therefore never moves past the oldest pending
//! entry, and every reply equals a replay of all merged inputs from the
//! initial state.

use tracing::{debug, error, info, warn};

use crate::config::EngineConfig;
use crate::core::ack::{AckMask, ClientIndex};
use crate::core::codec::ByteWriter;
use crate::core::hash::short_hex;
use crate::game::simulator::{Millis, Ranking, Simulator};
use crate::network::protocol::{finish_client_frame, read_client_frame, write_state};
use crate::sync::error::{ContractViolation, ProtocolViolation, SyncError};
use crate::sync::input::InputBatch;
use crate::sync::replay::{replay, step_through, timeline_inputs};
use crate::sync::timeline::Timeline;

// =============================================================================
// STATUS
// =============================================================================

/// Lifecycle of a session as seen by its runner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// Accepting messages.
    Running,
    /// The rule-set decided the game.
    Finished(Ranking),
    /// Every client left. No ranking is produced.
    Abandoned,
    /// A contract violation tore the session down.
    Failed(String),
}

impl SessionStatus {
    /// Whether the session is over.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SessionStatus::Running)
    }
}

/// Object-safe view of a session, so runners can hold any rule-set.
pub trait SessionEngine: Send {
    /// Clients the session was created for.
    fn player_count(&self) -> usize;

    /// Process one client frame and return the reply frame for that client.
    fn handle_message(&mut self, client: ClientIndex, frame: &[u8]) -> Result<Vec<u8>, SyncError>;

    /// Mark a client as gone. Returns `false` if it already was.
    fn disconnect(&mut self, client: ClientIndex) -> bool;

    /// Re-evaluate and return the session status.
    fn poll(&mut self) -> SessionStatus;

    /// Clock of the canonical snapshot.
    fn canonical_clock(&self) -> Millis;

    /// Timeline entries still retained.
    fn retained_entries(&self) -> usize;
}

// =============================================================================
// SESSION
// =============================================================================

#[derive(Debug, Clone, Copy)]
struct ClientSlot {
    connected: bool,
    /// Clock reported with the latest accepted batch.
    last_clock: Millis,
}

/// Reconciliation state for one session.
pub struct ServerSession<S: Simulator> {
    sim: S,
    canonical: S::Snapshot,
    canonical_clock: Millis,
    timeline: Timeline<S::Input>,
    clients: Vec<ClientSlot>,
    connected: AckMask,
    max_sub_step: Millis,
    max_clock_lead: Millis,
    verify_copies: bool,
    status: SessionStatus,
}

impl<S: Simulator> ServerSession<S> {
    /// Start a session with every client connected.
    pub fn new(sim: S, config: &EngineConfig) -> Result<Self, ContractViolation> {
        let players = sim.player_count();
        let connected = AckMask::all(players)?;
        let canonical = sim.create_snapshot();

        Ok(Self {
            canonical,
            canonical_clock: 0,
            timeline: Timeline::new(),
            clients: vec![
                ClientSlot {
                    connected: true,
                    last_clock: 0,
                };
                players
            ],
            connected,
            max_sub_step: config.max_sub_step_ms,
            max_clock_lead: config.max_clock_lead_ms,
            verify_copies: config.verify_snapshot_copies,
            status: SessionStatus::Running,
            sim,
        })
    }

    /// The rule-set.
    pub fn simulator(&self) -> &S {
        &self.sim
    }

    /// Authoritative baseline snapshot.
    pub fn canonical(&self) -> &S::Snapshot {
        &self.canonical
    }

    /// Retained, not yet folded inputs.
    pub fn timeline(&self) -> &Timeline<S::Input> {
        &self.timeline
    }

    /// Current status without re-evaluating.
    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    /// Number of clients still connected.
    pub fn connected_count(&self) -> usize {
        self.connected.len()
    }

    /// Handle one frame from `client`.
    ///
    /// Protocol violations leave the session untouched. A contract violation
    /// marks the session failed.
    pub fn handle_frame(&mut self, client: ClientIndex, frame: &[u8]) -> Result<Vec<u8>, SyncError> {
        let batches = match self.validate(client, frame) {
            Ok(batches) => batches,
            Err(violation) => {
                warn!(%client, error = %violation, "rejected client frame");
                return Err(violation.into());
            }
        };

        let mut reply = ByteWriter::with_capacity(256);
        for batch in batches {
            if let Err(violation) = self.process_batch(client, batch, &mut reply) {
                self.fail(&violation);
                return Err(violation.into());
            }
        }
        finish_client_frame(&mut reply);
        Ok(reply.into_vec())
    }

    /// Remove a client from the session.
    pub fn remove_client(&mut self, client: ClientIndex) -> bool {
        let Some(slot) = self.clients.get_mut(client.as_usize()) else {
            return false;
        };
        if !slot.connected {
            return false;
        }
        slot.connected = false;
        self.connected.remove(client);
        self.timeline.forget_client(client);

        if self.status == SessionStatus::Running {
            if let Err(violation) = self.fold_retired() {
                self.fail(&violation);
            } else if self.connected.is_empty() {
                info!(clock = self.canonical_clock, "all clients left, session abandoned");
                self.status = SessionStatus::Abandoned;
            }
        }
        debug!(%client, remaining = self.connected.len(), "client disconnected");
        true
    }

    /// Check for natural completion.
    pub fn refresh_status(&mut self) -> &SessionStatus {
        if self.status == SessionStatus::Running {
            if let Some(ranking) = self.sim.ranking(&self.canonical) {
                info!(clock = self.canonical_clock, ?ranking, "session finished");
                self.status = SessionStatus::Finished(ranking);
            }
        }
        &self.status
    }

    fn validate(
        &self,
        client: ClientIndex,
        frame: &[u8],
    ) -> Result<Vec<InputBatch<S::Input>>, ProtocolViolation> {
        let slot = self
            .clients
            .get(client.as_usize())
            .ok_or(ProtocolViolation::UnknownClient(client))?;
        if !slot.connected || self.status.is_terminal() {
            return Err(ProtocolViolation::ClientDisconnected(client));
        }

        let batches = read_client_frame(&self.sim, client, frame)?;

        let limit = self.canonical_clock.saturating_add(self.max_clock_lead);
        let mut last_clock = slot.last_clock;
        for batch in &batches {
            let timestamp = batch.first_timestamp();
            if timestamp < last_clock {
                return Err(ProtocolViolation::ClockRegression {
                    client,
                    timestamp,
                    last_clock,
                });
            }
            // Batch clocks close every batch, so no input lies beyond it
            if batch.clock() > limit {
                return Err(ProtocolViolation::ClockAhead {
                    client,
                    clock: batch.clock(),
                    limit,
                });
            }
            last_clock = batch.clock();
        }
        Ok(batches)
    }

    fn process_batch(
        &mut self,
        client: ClientIndex,
        batch: InputBatch<S::Input>,
        reply: &mut ByteWriter,
    ) -> Result<(), ContractViolation> {
        let clock = batch.clock();
        let merged = batch.inputs().len();
        self.timeline.merge(batch, self.connected);
        self.clients[client.as_usize()].last_clock = clock;

        let before = self.verify_copies.then(|| self.sim.snapshot_hash(&self.canonical));

        let mut scratch = self.sim.copy_snapshot(&self.canonical);
        replay(
            &self.sim,
            &mut scratch,
            self.canonical_clock,
            self.timeline.entries_until(clock),
            clock,
            self.max_sub_step,
        )?;

        if let Some(before) = before {
            let after = self.sim.snapshot_hash(&self.canonical);
            if before != after {
                error!(
                    before = %short_hex(&before),
                    after = %short_hex(&after),
                    "canonical snapshot changed during scratch replay"
                );
                return Err(ContractViolation::Aliasing);
            }
        }

        write_state(reply, &self.sim, clock, &scratch);

        self.timeline.acknowledge(client, clock);
        let folded = self.fold_retired()?;

        debug!(
            %client,
            clock,
            merged,
            folded,
            retained = self.timeline.len(),
            canonical_clock = self.canonical_clock,
            "processed batch"
        );
        Ok(())
    }

    /// Replay every retired entry into the canonical snapshot.
    fn fold_retired(&mut self) -> Result<usize, ContractViolation> {
        let retired = self.timeline.take_retired();
        if retired.is_empty() {
            return Ok(0);
        }
        self.canonical_clock = step_through(
            &self.sim,
            &mut self.canonical,
            self.canonical_clock,
            timeline_inputs(&retired),
            self.max_sub_step,
        )?;

        #[cfg(feature = "debug-tracing")]
        debug!(
            canonical_clock = self.canonical_clock,
            hash = %short_hex(&self.sim.snapshot_hash(&self.canonical)),
            "folded canonical"
        );

        Ok(retired.len())
    }

    fn fail(&mut self, violation: &ContractViolation) {
        error!(error = %violation, "simulation contract violated, tearing session down");
        self.status = SessionStatus::Failed(violation.to_string());
    }
}

impl<S: Simulator> SessionEngine for ServerSession<S> {
    fn player_count(&self) -> usize {
        self.clients.len()
    }

    fn handle_message(&mut self, client: ClientIndex, frame: &[u8]) -> Result<Vec<u8>, SyncError> {
        self.handle_frame(client, frame)
    }

    fn disconnect(&mut self, client: ClientIndex) -> bool {
        self.remove_client(client)
    }

    fn poll(&mut self) -> SessionStatus {
        self.refresh_status().clone()
    }

    fn canonical_clock(&self) -> Millis {
        self.canonical_clock
    }

    fn retained_entries(&self) -> usize {
        self.timeline.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::codec::{ByteReader, CodecError};
    use crate::network::protocol::{finish_server_frame, read_client_record, write_batch, ClientBound};
    use crate::sync::trace::{TraceEvent, TraceSim, TraceState};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;

    const A: ClientIndex = ClientIndex(0);
    const B: ClientIndex = ClientIndex(1);

    fn config() -> EngineConfig {
        EngineConfig {
            max_sub_step_ms: 10,
            verify_snapshot_copies: true,
            ..EngineConfig::default()
        }
    }

    fn frame(inputs: &[(Millis, u32)], clock: Millis) -> Vec<u8> {
        let raws: Vec<_> = inputs.iter().map(|(ts, v)| (*ts, v.to_le_bytes())).collect();
        let mut writer = ByteWriter::new();
        write_batch(&mut writer, raws.iter().map(|(ts, r)| (*ts, &r[..])), clock);
        finish_server_frame(&mut writer);
        writer.into_vec()
    }

    fn decode_reply(sim: &TraceSim, reply: &[u8]) -> Vec<(Millis, TraceState)> {
        let mut reader = ByteReader::new(reply);
        let mut states = Vec::new();
        loop {
            match read_client_record(&mut reader).unwrap() {
                ClientBound::GameData => {
                    let clock = reader.read_u64().unwrap();
                    let mut state = sim.create_snapshot();
                    sim.read_network_desc(&mut state, &mut reader).unwrap();
                    states.push((clock, state));
                }
                ClientBound::EndGame => panic!("unexpected end game"),
                ClientBound::Finish => return states,
            }
        }
    }

    #[test]
    fn test_scenario_input_waits_for_other_client() {
        let mut session = ServerSession::new(TraceSim::new(2), &config()).unwrap();

        let reply = session.handle_frame(A, &frame(&[(100, 1)], 100)).unwrap();
        let states = decode_reply(session.simulator(), &reply);
        assert_eq!(states.len(), 1);
        let (clock, state) = &states[0];
        assert_eq!(*clock, 100);
        assert_eq!(state.elapsed, 100);
        assert_eq!(state.events.last(), Some(&TraceEvent::Apply(A, 1)));

        // Still pending for B
        assert_eq!(session.timeline().len(), 2);
        assert!(session.timeline().entries().iter().all(|e| e.pending.contains(B)));
        assert_eq!(session.canonical_clock(), 0);
        assert!(session.canonical().events.is_empty());

        // B reports a clock at 100: A's input folds, B's own marker waits for A
        session.handle_frame(B, &frame(&[], 100)).unwrap();
        assert_eq!(session.canonical_clock(), 100);
        assert_eq!(session.canonical().applied(), vec![(A, 1)]);
        let retained = session.timeline().entries();
        assert_eq!(retained.len(), 1);
        assert_eq!(retained[0].origin, B);
        assert!(retained[0].is_marker());
        assert!(retained[0].pending.contains(A));
        assert!(!retained[0].pending.contains(B));

        // A catches up past it: B's marker folds, A's new marker waits for B
        session.handle_frame(A, &frame(&[], 110)).unwrap();
        assert_eq!(session.canonical_clock(), 100);
        let retained = session.timeline().entries();
        assert_eq!(retained.len(), 1);
        assert_eq!((retained[0].origin, retained[0].timestamp), (A, 110));
        assert!(retained[0].pending.contains(B));
    }

    #[test]
    fn test_scenario_non_monotonic_batch_leaves_state_untouched() {
        let mut session = ServerSession::new(TraceSim::new(2), &config()).unwrap();
        session.handle_frame(B, &frame(&[(5, 9)], 20)).unwrap();
        let retained = session.timeline().len();
        let canonical = session.canonical().clone();

        let err = session.handle_frame(A, &frame(&[(50, 1), (30, 2)], 60)).unwrap_err();
        assert_eq!(
            err,
            SyncError::Protocol(ProtocolViolation::NonMonotonicBatch { earlier: 50, later: 30 })
        );
        assert!(!err.is_fatal());
        assert_eq!(session.timeline().len(), retained);
        assert_eq!(session.canonical(), &canonical);
        assert_eq!(session.status(), &SessionStatus::Running);
    }

    #[test]
    fn test_clock_regression_rejected() {
        let mut session = ServerSession::new(TraceSim::new(2), &config()).unwrap();
        session.handle_frame(A, &frame(&[(10, 1)], 100)).unwrap();

        let err = session.handle_frame(A, &frame(&[(50, 2)], 120)).unwrap_err();
        assert_eq!(
            err,
            SyncError::Protocol(ProtocolViolation::ClockRegression {
                client: A,
                timestamp: 50,
                last_clock: 100,
            })
        );
        assert_eq!(session.timeline().len(), 2);
    }

    #[test]
    fn test_clock_too_far_ahead_rejected() {
        let config = EngineConfig {
            max_clock_lead_ms: 1_000,
            ..config()
        };
        let mut session = ServerSession::new(TraceSim::new(2), &config).unwrap();

        let err = session.handle_frame(A, &frame(&[(10, 1)], u64::MAX)).unwrap_err();
        assert_eq!(
            err,
            SyncError::Protocol(ProtocolViolation::ClockAhead {
                client: A,
                clock: u64::MAX,
                limit: 1_000,
            })
        );
        assert!(session.timeline().is_empty());

        session.handle_frame(A, &frame(&[(10, 1)], 1_000)).unwrap();

        // The bound follows the canonical clock, not the sender's own
        session.handle_frame(B, &frame(&[], 600)).unwrap();
        assert_eq!(session.canonical_clock(), 10);
        let err = session.handle_frame(A, &frame(&[], 1_011)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolViolation::ClockAhead { limit: 1_010, .. })
        ));

        // Folding B's marker moves the bound along
        session.handle_frame(A, &frame(&[], 1_010)).unwrap();
        assert_eq!(session.canonical_clock(), 600);
        let err = session.handle_frame(A, &frame(&[], 1_601)).unwrap_err();
        assert!(matches!(
            err,
            SyncError::Protocol(ProtocolViolation::ClockAhead { limit: 1_600, .. })
        ));
    }

    #[test]
    fn test_unknown_and_disconnected_clients() {
        let mut session = ServerSession::new(TraceSim::new(2), &config()).unwrap();
        let err = session.handle_frame(ClientIndex(7), &frame(&[], 10)).unwrap_err();
        assert_eq!(err, SyncError::Protocol(ProtocolViolation::UnknownClient(ClientIndex(7))));

        assert!(session.remove_client(B));
        assert!(!session.remove_client(B));
        let err = session.handle_frame(B, &frame(&[], 10)).unwrap_err();
        assert_eq!(err, SyncError::Protocol(ProtocolViolation::ClientDisconnected(B)));
    }

    #[test]
    fn test_disconnect_releases_history() {
        let mut session = ServerSession::new(TraceSim::new(2), &config()).unwrap();
        session.handle_frame(A, &frame(&[(30, 4)], 50)).unwrap();
        assert_eq!(session.timeline().len(), 2);

        session.remove_client(B);
        assert!(session.timeline().is_empty());
        assert_eq!(session.canonical_clock(), 50);
        assert_eq!(session.status(), &SessionStatus::Running);

        // New entries only wait for A
        session.handle_frame(A, &frame(&[(60, 5)], 70)).unwrap();
        assert!(session.timeline().is_empty());
        assert_eq!(session.canonical_clock(), 70);
    }

    #[test]
    fn test_scenario_all_clients_gone_is_abandoned() {
        let mut session = ServerSession::new(TraceSim::finishing_at(2, 10), &config()).unwrap();
        session.handle_frame(A, &frame(&[(5, 1)], 8)).unwrap();

        session.remove_client(A);
        session.remove_client(B);

        assert_eq!(session.poll(), SessionStatus::Abandoned);
        assert!(session.timeline().is_empty());
        assert_eq!(session.connected_count(), 0);
    }

    #[test]
    fn test_finished_when_canonical_decides() {
        let mut session = ServerSession::new(TraceSim::finishing_at(2, 100), &config()).unwrap();
        session.handle_frame(A, &frame(&[(10, 1), (20, 2)], 100)).unwrap();
        assert_eq!(session.poll(), SessionStatus::Running);

        // B's input still waits for A
        session.handle_frame(B, &frame(&[(40, 3)], 120)).unwrap();
        assert_eq!(session.poll(), SessionStatus::Running);
        assert_eq!(session.canonical_clock(), 20);

        session.handle_frame(A, &frame(&[], 120)).unwrap();
        match session.poll() {
            SessionStatus::Finished(ranking) => assert_eq!(ranking.ranks(), &[1, 2]),
            other => panic!("expected finished, got {other:?}"),
        }

        let err = session.handle_frame(A, &frame(&[], 130)).unwrap_err();
        assert_eq!(err, SyncError::Protocol(ProtocolViolation::ClientDisconnected(A)));
    }

    #[test]
    fn test_multiple_batches_in_one_frame() {
        let mut session = ServerSession::new(TraceSim::new(1), &config()).unwrap();
        let mut writer = ByteWriter::new();
        let one = 1u32.to_le_bytes();
        let two = 2u32.to_le_bytes();
        write_batch(&mut writer, [(10u64, &one[..])], 15);
        write_batch(&mut writer, [(20u64, &two[..])], 25);
        finish_server_frame(&mut writer);

        let reply = session.handle_frame(A, writer.as_slice()).unwrap();
        let states = decode_reply(session.simulator(), &reply);
        assert_eq!(states.iter().map(|(c, _)| *c).collect::<Vec<_>>(), vec![15, 25]);
        assert_eq!(session.canonical_clock(), 25);
    }

    // =========================================================================
    // Aliasing detection
    // =========================================================================

    /// Snapshot whose clone shares its counter.
    struct SharedSim;

    impl Simulator for SharedSim {
        type Snapshot = Arc<AtomicU64>;
        type Input = u32;

        fn player_count(&self) -> usize {
            2
        }

        fn create_snapshot(&self) -> Self::Snapshot {
            Arc::new(AtomicU64::new(0))
        }

        fn extract_input(&self, reader: &mut ByteReader<'_>) -> Result<u32, CodecError> {
            reader.read_u32()
        }

        fn handle_input(&self, _snapshot: &mut Self::Snapshot, _input: &u32, _client: ClientIndex) {}

        fn frame(&self, snapshot: &mut Self::Snapshot, duration: Millis) {
            snapshot.fetch_add(duration, Ordering::SeqCst);
        }

        fn read_network_desc(
            &self,
            snapshot: &mut Self::Snapshot,
            reader: &mut ByteReader<'_>,
        ) -> Result<(), CodecError> {
            snapshot.store(reader.read_u64()?, Ordering::SeqCst);
            Ok(())
        }

        fn write_network_desc(&self, snapshot: &Self::Snapshot, writer: &mut ByteWriter) {
            writer.write_u64(snapshot.load(Ordering::SeqCst));
        }
    }

    #[test]
    fn test_aliasing_copy_fails_session() {
        let mut session = ServerSession::new(SharedSim, &config()).unwrap();
        let err = session.handle_frame(A, &frame(&[(10, 1)], 30)).unwrap_err();
        assert_eq!(err, SyncError::Contract(ContractViolation::Aliasing));
        assert!(err.is_fatal());
        assert!(matches!(session.poll(), SessionStatus::Failed(_)));
    }

    #[test]
    fn test_aliasing_unchecked_when_disabled() {
        let config = EngineConfig {
            verify_snapshot_copies: false,
            ..config()
        };
        let mut session = ServerSession::new(SharedSim, &config).unwrap();
        assert!(session.handle_frame(A, &frame(&[(10, 1)], 30)).is_ok());
    }

    // =========================================================================
    // Pruning safety
    // =========================================================================

    /// One client's scripted traffic: per frame, (input offsets, clock advance).
    fn traffic() -> impl Strategy<Value = Vec<(u8, Vec<u64>, u64)>> {
        prop::collection::vec(
            (0u8..3, prop::collection::vec(0u64..30, 0..4), 0u64..40),
            1..30,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_reply_equals_full_replay(script in traffic()) {
            let sim = TraceSim::new(3);
            let mut session = ServerSession::new(TraceSim::new(3), &config()).unwrap();
            let mut reference: Timeline<u32> = Timeline::new();
            let mut clocks = [0u64; 3];
            let mut payload = 0u32;

            for (who, offsets, advance) in script {
                let client = ClientIndex(who);
                let base = clocks[who as usize];
                let mut stamps: Vec<_> = offsets.iter().map(|o| base + o).collect();
                stamps.sort_unstable();
                let clock = stamps.last().copied().unwrap_or(base) + advance;
                let inputs: Vec<_> = stamps
                    .iter()
                    .map(|ts| {
                        payload += 1;
                        (*ts, payload)
                    })
                    .collect();
                clocks[who as usize] = clock;

                let reply = session.handle_frame(client, &frame(&inputs, clock)).unwrap();
                reference.merge(InputBatch::new(client, inputs, clock).unwrap(), AckMask::all(3).unwrap());

                let mut expected = sim.create_snapshot();
                replay(&sim, &mut expected, 0, reference.entries_until(clock), clock, 10).unwrap();
                let states = decode_reply(&sim, &reply);
                prop_assert_eq!(&states[0].1, &expected);

                // Canonical never passes the oldest retained entry
                if let Some(oldest) = session.timeline().oldest_timestamp() {
                    prop_assert!(session.canonical_clock() <= oldest);
                }
            }
        }
    }
}
