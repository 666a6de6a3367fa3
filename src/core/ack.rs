//! Client Indices and Acknowledgement Masks
//!
//! Every timeline entry carries an [`AckMask`] with one bit per client that
//! may still need the entry for its own replay. The mask is bounded by
//! [`MAX_CLIENTS`]; asking for more clients is an error, not a wrap-around.

use std::fmt;

use thiserror::Error;

/// Largest client count a session can have.
pub const MAX_CLIENTS: usize = 64;

/// Stable index of a client inside its session (0..N-1).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct ClientIndex(pub u8);

impl ClientIndex {
    /// Index as usize, for slice access.
    #[inline]
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for ClientIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ClientIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Requested more clients than a mask can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{requested} clients exceed the limit of {max}", max = MAX_CLIENTS)]
pub struct TooManyClients {
    /// Number of clients asked for
    pub requested: usize,
}

/// Bounded bit-per-client set.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AckMask {
    bits: u64,
}

impl AckMask {
    /// Empty mask.
    pub const EMPTY: Self = Self { bits: 0 };

    /// Mask with bits `0..count` set.
    pub fn all(count: usize) -> Result<Self, TooManyClients> {
        match count {
            0 => Ok(Self::EMPTY),
            n if n < MAX_CLIENTS => Ok(Self { bits: (1u64 << n) - 1 }),
            MAX_CLIENTS => Ok(Self { bits: u64::MAX }),
            requested => Err(TooManyClients { requested }),
        }
    }

    /// Whether the client's bit is set.
    #[inline]
    pub fn contains(self, client: ClientIndex) -> bool {
        client.as_usize() < MAX_CLIENTS && self.bits & (1u64 << client.0) != 0
    }

    /// Set the client's bit. Out-of-range indices are ignored.
    #[inline]
    pub fn insert(&mut self, client: ClientIndex) {
        if client.as_usize() < MAX_CLIENTS {
            self.bits |= 1u64 << client.0;
        }
    }

    /// Clear the client's bit. Returns whether it was set.
    #[inline]
    pub fn remove(&mut self, client: ClientIndex) -> bool {
        let was_set = self.contains(client);
        if was_set {
            self.bits &= !(1u64 << client.0);
        }
        was_set
    }

    /// No bits set: nobody needs the entry anymore.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.bits == 0
    }

    /// Number of bits set.
    #[inline]
    pub fn len(self) -> usize {
        self.bits.count_ones() as usize
    }

    /// Indices whose bits are set, ascending.
    pub fn iter(self) -> impl Iterator<Item = ClientIndex> {
        (0..MAX_CLIENTS as u8).filter(move |i| self.bits & (1u64 << i) != 0).map(ClientIndex)
    }
}

impl fmt::Debug for AckMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_sizes() {
        assert!(AckMask::all(0).unwrap().is_empty());
        assert_eq!(AckMask::all(2).unwrap().len(), 2);
        assert_eq!(AckMask::all(MAX_CLIENTS).unwrap().len(), MAX_CLIENTS);
        assert_eq!(
            AckMask::all(MAX_CLIENTS + 1),
            Err(TooManyClients { requested: MAX_CLIENTS + 1 })
        );
    }

    #[test]
    fn test_insert_remove() {
        let mut mask = AckMask::all(3).unwrap();
        assert!(mask.remove(ClientIndex(1)));
        assert!(!mask.remove(ClientIndex(1)));
        assert!(!mask.contains(ClientIndex(1)));
        assert_eq!(mask.iter().collect::<Vec<_>>(), vec![ClientIndex(0), ClientIndex(2)]);

        mask.remove(ClientIndex(0));
        mask.remove(ClientIndex(2));
        assert!(mask.is_empty());

        mask.insert(ClientIndex(63));
        assert!(mask.contains(ClientIndex(63)));
        mask.insert(ClientIndex(200));
        assert_eq!(mask.len(), 1);
    }
}
