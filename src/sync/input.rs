//! Timeline Entries and Input Batches
//!
//! A client ships its inputs as a batch: timestamped payloads in capture
//! order, closed by the client's current clock. The closing clock becomes a
//! payload-less marker entry ("catch me up to now") so replays on every
//! participant split time at the same instants.

use crate::core::ack::{AckMask, ClientIndex};
use crate::game::simulator::Millis;
use crate::sync::error::ProtocolViolation;

/// One input on the shared session timeline.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimelineEntry<I> {
    /// Simulated instant the input takes effect.
    pub timestamp: Millis,
    /// Client that produced it.
    pub origin: ClientIndex,
    /// Payload, or `None` for a clock marker.
    pub input: Option<I>,
    /// Clients that may still replay through this entry.
    pub pending: AckMask,
}

impl<I> TimelineEntry<I> {
    /// Whether this is a clock marker without payload.
    pub fn is_marker(&self) -> bool {
        self.input.is_none()
    }
}

/// A validated batch from one client.
///
/// Construction fails unless timestamps are non-decreasing and the closing
/// clock is not earlier than the last input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InputBatch<I> {
    origin: ClientIndex,
    inputs: Vec<(Millis, I)>,
    clock: Millis,
}

impl<I> InputBatch<I> {
    /// Validate and build a batch.
    pub fn new(
        origin: ClientIndex,
        inputs: Vec<(Millis, I)>,
        clock: Millis,
    ) -> Result<Self, ProtocolViolation> {
        let mut previous: Option<Millis> = None;
        for timestamp in inputs.iter().map(|(ts, _)| *ts).chain(std::iter::once(clock)) {
            if let Some(earlier) = previous {
                if timestamp < earlier {
                    return Err(ProtocolViolation::NonMonotonicBatch {
                        earlier,
                        later: timestamp,
                    });
                }
            }
            previous = Some(timestamp);
        }

        Ok(Self { origin, inputs, clock })
    }

    /// Sending client.
    pub fn origin(&self) -> ClientIndex {
        self.origin
    }

    /// Timestamped payloads in order.
    pub fn inputs(&self) -> &[(Millis, I)] {
        &self.inputs
    }

    /// The sender's clock when it flushed.
    pub fn clock(&self) -> Millis {
        self.clock
    }

    /// Earliest timestamp in the batch (the clock when it has no inputs).
    pub fn first_timestamp(&self) -> Millis {
        self.inputs.first().map(|(ts, _)| *ts).unwrap_or(self.clock)
    }

    /// Entries this batch adds to a timeline, marker last.
    pub fn into_entries(self, pending: AckMask) -> impl Iterator<Item = TimelineEntry<I>> {
        let origin = self.origin;
        let clock = self.clock;
        self.inputs
            .into_iter()
            .map(move |(timestamp, input)| TimelineEntry {
                timestamp,
                origin,
                input: Some(input),
                pending,
            })
            .chain(std::iter::once(TimelineEntry {
                timestamp: clock,
                origin,
                input: None,
                pending,
            }))
    }
}
