//! Protocol Records
//!
//! Binary wire format between a predicting client and its session. Every
//! frame is a run of typed records closed by a sentinel id. The transport
//! has already split frames; this module only reads and writes records.
//!
//! ```text
//! client -> server   [GAME_DATA] ([INPUT][u64 ts][payload])* [CLOCK][u64 clock] ... [FINISH]
//! server -> client   [GAME_DATA][u64 clock][network desc] ... [FINISH]
//!                    [END_GAME][i16 count][i16 rank]* [FINISH]
//! ```

use crate::core::ack::ClientIndex;
use crate::core::codec::{ByteReader, ByteWriter, CodecError};
use crate::game::simulator::{Millis, Ranking, Simulator};
use crate::sync::error::ProtocolViolation;
use crate::sync::input::InputBatch;

// =============================================================================
// RECORD IDS
// =============================================================================

/// Record ids a server accepts. Ids 0..=3 belong to the lobby layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ServerBound {
    /// An input batch.
    GameData = 4,
    /// End of frame.
    Finish = 5,
}

impl TryFrom<u8> for ServerBound {
    type Error = ProtocolViolation;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            4 => Ok(Self::GameData),
            5 => Ok(Self::Finish),
            other => Err(ProtocolViolation::UnknownRecord(other)),
        }
    }
}

/// Record ids a client accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientBound {
    /// Authoritative state as of a clock.
    GameData = 4,
    /// Final ranking.
    EndGame = 5,
    /// End of frame.
    Finish = 6,
}

impl TryFrom<u8> for ClientBound {
    type Error = ProtocolViolation;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            4 => Ok(Self::GameData),
            5 => Ok(Self::EndGame),
            6 => Ok(Self::Finish),
            other => Err(ProtocolViolation::UnknownRecord(other)),
        }
    }
}

/// Entry kinds inside a GAME_DATA batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum BatchKind {
    /// Closing clock, ends the batch.
    Clock = 0,
    /// Timestamped input payload.
    Input = 1,
}

impl TryFrom<u8> for BatchKind {
    type Error = ProtocolViolation;

    fn try_from(kind: u8) -> Result<Self, Self::Error> {
        match kind {
            0 => Ok(Self::Clock),
            1 => Ok(Self::Input),
            other => Err(ProtocolViolation::UnknownRecord(other)),
        }
    }
}

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Append one GAME_DATA batch record. `inputs` carry the raw payload bytes.
pub fn write_batch<'a, It>(writer: &mut ByteWriter, inputs: It, clock: Millis)
where
    It: IntoIterator<Item = (Millis, &'a [u8])>,
{
    writer.write_u8(ServerBound::GameData as u8);
    for (timestamp, raw) in inputs {
        writer
            .write_u8(BatchKind::Input as u8)
            .write_u64(timestamp)
            .write_bytes(raw);
    }
    writer.write_u8(BatchKind::Clock as u8).write_u64(clock);
}

/// Close a server-bound frame.
pub fn finish_server_frame(writer: &mut ByteWriter) {
    writer.write_u8(ServerBound::Finish as u8);
}

/// Read the body of one GAME_DATA record into a validated batch.
pub fn read_batch<S: Simulator + ?Sized>(
    sim: &S,
    origin: ClientIndex,
    reader: &mut ByteReader<'_>,
) -> Result<InputBatch<S::Input>, ProtocolViolation> {
    let mut inputs = Vec::new();
    let clock = loop {
        match BatchKind::try_from(reader.read_u8()?)? {
            BatchKind::Input => {
                let timestamp = reader.read_u64()?;
                inputs.push((timestamp, sim.extract_input(reader)?));
            }
            BatchKind::Clock => break reader.read_u64()?,
        }
    };
    InputBatch::new(origin, inputs, clock)
}

/// Decode a whole client frame into its batches.
///
/// Nothing is returned unless every record up to the sentinel decodes and
/// the sentinel is the last byte.
pub fn read_client_frame<S: Simulator + ?Sized>(
    sim: &S,
    origin: ClientIndex,
    frame: &[u8],
) -> Result<Vec<InputBatch<S::Input>>, ProtocolViolation> {
    let mut reader = ByteReader::new(frame);
    let mut batches = Vec::new();
    loop {
        let id = read_record_id(&mut reader)?;
        match ServerBound::try_from(id)? {
            ServerBound::GameData => batches.push(read_batch(sim, origin, &mut reader)?),
            ServerBound::Finish if reader.is_exhausted() => return Ok(batches),
            ServerBound::Finish => return Err(ProtocolViolation::TrailingBytes(reader.remaining())),
        }
    }
}

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Append a state reply record for `snapshot` as of `clock`.
pub fn write_state<S: Simulator + ?Sized>(
    writer: &mut ByteWriter,
    sim: &S,
    clock: Millis,
    snapshot: &S::Snapshot,
) {
    writer.write_u8(ClientBound::GameData as u8).write_u64(clock);
    sim.write_network_desc(snapshot, writer);
}

/// Append an END_GAME record.
pub fn write_end_game(writer: &mut ByteWriter, ranking: &Ranking) {
    writer
        .write_u8(ClientBound::EndGame as u8)
        .write_i16(ranking.len() as i16);
    for &rank in ranking.ranks() {
        writer.write_i16(rank as i16);
    }
}

/// Close a client-bound frame.
pub fn finish_client_frame(writer: &mut ByteWriter) {
    writer.write_u8(ClientBound::Finish as u8);
}

/// A complete END_GAME frame.
pub fn encode_end_game(ranking: &Ranking) -> Vec<u8> {
    let mut writer = ByteWriter::with_capacity(4 + 2 * ranking.len());
    write_end_game(&mut writer, ranking);
    finish_client_frame(&mut writer);
    writer.into_vec()
}

/// Read the body of an END_GAME record.
pub fn read_end_game(reader: &mut ByteReader<'_>) -> Result<Ranking, ProtocolViolation> {
    let count = reader.read_i16()?;
    let count = usize::try_from(count)
        .map_err(|_| ProtocolViolation::Malformed(CodecError::InvalidValue("negative rank count")))?;
    let mut ranks = Vec::with_capacity(count);
    for _ in 0..count {
        let rank = u16::try_from(reader.read_i16()?)
            .map_err(|_| ProtocolViolation::Malformed(CodecError::InvalidValue("negative rank")))?;
        ranks.push(rank);
    }
    Ok(Ranking::from_ranks(ranks))
}

/// Read the next client-bound record id.
pub fn read_client_record(reader: &mut ByteReader<'_>) -> Result<ClientBound, ProtocolViolation> {
    ClientBound::try_from(read_record_id(reader)?)
}

fn read_record_id(reader: &mut ByteReader<'_>) -> Result<u8, ProtocolViolation> {
    if reader.is_exhausted() {
        return Err(ProtocolViolation::MissingSentinel);
    }
    Ok(reader.read_u8()?)
}
