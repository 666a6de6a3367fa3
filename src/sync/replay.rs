//! Sub-step Replay
//!
//! The single routine that moves a snapshot through time. The server's
//! scratch replay, the canonical fold and the client's speculative replay
//! all go through it, so every participant issues the same sequence of
//! `frame` and `handle_input` calls for the same inputs.

use crate::core::ack::ClientIndex;
use crate::game::simulator::{Millis, Simulator};
use crate::sync::error::ContractViolation;
use crate::sync::input::TimelineEntry;

/// Advance by `duration`, in `frame` calls of at most `max_sub_step` ms.
///
/// A zero duration issues no call.
pub fn advance<S: Simulator + ?Sized>(
    sim: &S,
    snapshot: &mut S::Snapshot,
    duration: Millis,
    max_sub_step: Millis,
) {
    let step = max_sub_step.max(1);
    let mut remaining = duration;
    while remaining > 0 {
        let chunk = remaining.min(step);
        sim.frame(snapshot, chunk);
        remaining -= chunk;
    }
}

/// Advance a snapshot sitting at `from` so it sits at `to`.
pub fn advance_between<S: Simulator + ?Sized>(
    sim: &S,
    snapshot: &mut S::Snapshot,
    from: Millis,
    to: Millis,
    max_sub_step: Millis,
) -> Result<(), ContractViolation> {
    let duration = to
        .checked_sub(from)
        .ok_or(ContractViolation::NegativeDuration { from, to })?;
    advance(sim, snapshot, duration, max_sub_step);
    Ok(())
}

/// Step through timestamped inputs starting at clock `from`.
///
/// Before each input the snapshot is advanced to its timestamp, then the
/// payload (if any) is applied. Returns the clock after the last input,
/// `from` when there are none.
pub fn step_through<'a, S, It>(
    sim: &S,
    snapshot: &mut S::Snapshot,
    from: Millis,
    inputs: It,
    max_sub_step: Millis,
) -> Result<Millis, ContractViolation>
where
    S: Simulator + ?Sized,
    It: IntoIterator<Item = (Millis, Option<&'a S::Input>, ClientIndex)>,
{
    let mut clock = from;
    for (timestamp, input, origin) in inputs {
        advance_between(sim, snapshot, clock, timestamp, max_sub_step)?;
        clock = timestamp;
        if let Some(input) = input {
            sim.handle_input(snapshot, input, origin);
        }
    }
    Ok(clock)
}

/// Replay timeline entries from `from`, then advance to `until`.
pub fn replay<S: Simulator + ?Sized>(
    sim: &S,
    snapshot: &mut S::Snapshot,
    from: Millis,
    entries: &[TimelineEntry<S::Input>],
    until: Millis,
    max_sub_step: Millis,
) -> Result<(), ContractViolation> {
    let clock = step_through(sim, snapshot, from, timeline_inputs(entries), max_sub_step)?;
    advance_between(sim, snapshot, clock, until, max_sub_step)
}

/// Timeline entries in the shape [`step_through`] takes.
pub fn timeline_inputs<I>(
    entries: &[TimelineEntry<I>],
) -> impl Iterator<Item = (Millis, Option<&I>, ClientIndex)> {
    entries.iter().map(|e| (e.timestamp, e.input.as_ref(), e.origin))
}
