//! Store for packets awaiting acknowledgment, ordered by sequence.
//!
//! A plain data structure with no interior locking: the driver serializes
//! the retransmission sweep and the receive loop through the one mutex
//! that guards the whole session, which is also what makes the sweep and
//! ack removal mutually consistent.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use squall_proto::PacketSequence;

use crate::error::SessionError;

/// One transmitted packet waiting for its acknowledgment.
#[derive(Debug, Clone)]
pub struct PendingSend {
    wire: Vec<u8>,
    last_sent: Instant,
    retransmissions: u16,
}

impl PendingSend {
    fn new(wire: Vec<u8>, now: Instant) -> Self {
        Self { wire, last_sent: now, retransmissions: 0 }
    }

    /// Encoded wire bytes, ready to resend as-is.
    #[must_use]
    pub fn wire(&self) -> &[u8] {
        &self.wire
    }

    /// How many times this packet has been retransmitted.
    #[must_use]
    pub fn retransmissions(&self) -> u16 {
        self.retransmissions
    }

    /// Whether the entry has aged past the retransmission timeout.
    #[must_use]
    pub fn is_due(&self, now: Instant, timeout: Duration) -> bool {
        now.duration_since(self.last_sent) >= timeout
    }

    /// Whether the retransmit counter has reached the ceiling.
    #[must_use]
    pub fn exceeded(&self, ceiling: u16) -> bool {
        self.retransmissions >= ceiling
    }
}

/// Ordered store of [`PendingSend`] entries keyed by sequence.
#[derive(Debug, Default)]
pub struct PendingAckStore {
    entries: BTreeMap<PacketSequence, PendingSend>,
}

impl PendingAckStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a packet. Each sequence may be live at most once; a
    /// duplicate insert is an error, not an overwrite.
    pub fn enqueue(
        &mut self,
        sequence: PacketSequence,
        wire: Vec<u8>,
        now: Instant,
    ) -> Result<(), SessionError> {
        if self.entries.contains_key(&sequence) {
            return Err(SessionError::DuplicateSequence { sequence });
        }
        self.entries.insert(sequence, PendingSend::new(wire, now));
        Ok(())
    }

    /// Entry with the lowest sequence, if any.
    #[must_use]
    pub fn peek_earliest(&self) -> Option<(PacketSequence, &PendingSend)> {
        self.entries.first_key_value().map(|(seq, entry)| (*seq, entry))
    }

    /// Remove and return the entry with the lowest sequence.
    pub fn dequeue_earliest(&mut self) -> Option<(PacketSequence, PendingSend)> {
        self.entries.pop_first()
    }

    /// Remove the entry for `sequence`. Idempotent: removing an absent or
    /// already-removed sequence is a no-op.
    pub fn remove(&mut self, sequence: PacketSequence) -> bool {
        self.entries.remove(&sequence).is_some()
    }

    /// Entry for `sequence`, if still pending.
    #[must_use]
    pub fn get(&self, sequence: PacketSequence) -> Option<&PendingSend> {
        self.entries.get(&sequence)
    }

    /// Stamp a retransmission on `sequence`: bump the counter and reset
    /// the send timestamp.
    pub fn refresh(&mut self, sequence: PacketSequence, now: Instant) -> Option<&PendingSend> {
        let entry = self.entries.get_mut(&sequence)?;
        entry.retransmissions += 1;
        entry.last_sent = now;
        Some(entry)
    }

    /// Number of packets awaiting acknowledgment.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered snapshot of all pending sequences, for the retransmission
    /// sweep. The sweep re-checks each entry before acting: an ack may
    /// remove it between snapshot and visit.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PacketSequence> {
        self.entries.keys().copied().collect()
    }

    /// Drop all pending state.
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_orders_by_sequence() {
        let now = Instant::now();
        let mut store = PendingAckStore::new();
        store.enqueue(5, vec![5], now).unwrap();
        store.enqueue(2, vec![2], now).unwrap();
        store.enqueue(9, vec![9], now).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.snapshot(), vec![2, 5, 9]);
        assert_eq!(store.peek_earliest().map(|(seq, _)| seq), Some(2));

        let (seq, entry) = store.dequeue_earliest().unwrap();
        assert_eq!(seq, 2);
        assert_eq!(entry.wire(), &[2]);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn duplicate_enqueue_is_an_error() {
        let now = Instant::now();
        let mut store = PendingAckStore::new();
        store.enqueue(3, vec![], now).unwrap();

        let err = store.enqueue(3, vec![], now).unwrap_err();
        assert!(matches!(err, SessionError::DuplicateSequence { sequence: 3 }));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn remove_is_idempotent() {
        let now = Instant::now();
        let mut store = PendingAckStore::new();
        store.enqueue(4, vec![], now).unwrap();

        assert!(store.remove(4));
        assert!(!store.remove(4));
        assert!(!store.remove(100));
        assert!(store.is_empty());
    }

    #[test]
    fn refresh_bumps_counter_and_timestamp() {
        let t0 = Instant::now();
        let timeout = Duration::from_millis(32);
        let mut store = PendingAckStore::new();
        store.enqueue(7, vec![7], t0).unwrap();

        let t1 = t0 + timeout;
        assert!(store.get(7).unwrap().is_due(t1, timeout));

        let entry = store.refresh(7, t1).unwrap();
        assert_eq!(entry.retransmissions(), 1);
        assert!(!store.get(7).unwrap().is_due(t1, timeout));
        assert!(store.get(7).unwrap().is_due(t1 + timeout, timeout));
    }

    #[test]
    fn exceeded_tracks_the_ceiling() {
        let now = Instant::now();
        let mut store = PendingAckStore::new();
        store.enqueue(1, vec![], now).unwrap();

        for _ in 0..16 {
            store.refresh(1, now);
        }
        assert!(store.get(1).unwrap().exceeded(16));
        assert!(!store.get(1).unwrap().exceeded(17));
    }
}
