//! Session Input Timeline
//!
//! All clients' inputs merged into one sequence sorted by timestamp.
//!
//! ## Merge
//!
//! Inbound batches are usually near the tail, so a merge binary-searches
//! for the first entry at or after the batch start, splits the suffix off,
//! and runs one stable linear merge of that suffix with the batch. The
//! prefix is never touched. Among equal timestamps existing entries stay in
//! front of new ones, so every participant sees the same order.
//!
//! ## Retirement
//!
//! A client reporting clock `T` clears its bit on every entry at or before
//! `T`. The leading run of entries with no bits left can be folded into the
//! canonical snapshot and dropped: no client will ever replay from before
//! them again.

use crate::core::ack::{AckMask, ClientIndex};
use crate::game::simulator::Millis;
use crate::sync::input::{InputBatch, TimelineEntry};

/// Sorted, mergeable input sequence for one session.
#[derive(Clone, Debug)]
pub struct Timeline<I> {
    entries: Vec<TimelineEntry<I>>,
}

impl<I> Default for Timeline<I> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I> Timeline<I> {
    /// Create an empty timeline.
    pub fn new() -> Self {
        Self {
            entries: Vec::with_capacity(256),
        }
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All retained entries, in order.
    pub fn entries(&self) -> &[TimelineEntry<I>] {
        &self.entries
    }

    /// Timestamp of the oldest retained entry.
    pub fn oldest_timestamp(&self) -> Option<Millis> {
        self.entries.first().map(|e| e.timestamp)
    }

    /// Entries with timestamp `<= clock`.
    pub fn entries_until(&self, clock: Millis) -> &[TimelineEntry<I>] {
        let end = self.entries.partition_point(|e| e.timestamp <= clock);
        &self.entries[..end]
    }

    /// Merge a validated batch; every new entry starts with `pending` bits.
    ///
    /// Returns the index the merged suffix starts at.
    pub fn merge(&mut self, batch: InputBatch<I>, pending: AckMask) -> usize {
        let start = batch.first_timestamp();
        let split = self.entries.partition_point(|e| e.timestamp < start);

        let suffix = self.entries.split_off(split);
        let mut incoming = batch.into_entries(pending).peekable();
        let mut existing = suffix.into_iter().peekable();

        self.entries.reserve(existing.len() + incoming.size_hint().0);
        loop {
            let take_existing = match (existing.peek(), incoming.peek()) {
                (Some(old), Some(new)) => old.timestamp <= new.timestamp,
                (Some(_), None) => true,
                (None, Some(_)) => false,
                (None, None) => break,
            };
            let next = if take_existing {
                existing.next()
            } else {
                incoming.next()
            };
            self.entries.extend(next);
        }

        split
    }

    /// Clear `client`'s bit on every entry at or before `clock`.
    ///
    /// Returns how many bits were cleared.
    pub fn acknowledge(&mut self, client: ClientIndex, clock: Millis) -> usize {
        let end = self.entries.partition_point(|e| e.timestamp <= clock);
        let mut cleared = 0;
        for entry in &mut self.entries[..end] {
            if entry.pending.remove(client) {
                cleared += 1;
            }
        }
        cleared
    }

    /// Clear `client`'s bit everywhere (the client left).
    pub fn forget_client(&mut self, client: ClientIndex) {
        for entry in &mut self.entries {
            entry.pending.remove(client);
        }
    }

    /// Remove and return the leading run of entries nobody needs anymore.
    pub fn take_retired(&mut self) -> Vec<TimelineEntry<I>> {
        let ready = self
            .entries
            .iter()
            .take_while(|e| e.pending.is_empty())
            .count();
        self.entries.drain(..ready).collect()
    }
}
