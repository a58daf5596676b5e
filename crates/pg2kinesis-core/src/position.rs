use std::collections::BTreeSet;

/// Tracks the highest LSN for which every preceding transaction batch has
/// been durably accepted by the sink.
///
/// The confirmed position only ever moves forward; it is what the worker
/// loop feeds back to the source as the slot's confirmed-flush position.
#[derive(Debug, Default)]
pub struct PositionTracker {
    confirmed: u64,
    pending: BTreeSet<u64>,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a known confirmed position, e.g. the slot's
    /// confirmed_flush_lsn at worker startup.
    pub fn starting_at(confirmed: u64) -> Self {
        Self {
            confirmed,
            pending: BTreeSet::new(),
        }
    }

    /// Record that a batch ending at `lsn` is awaiting sink acknowledgment.
    pub fn record(&mut self, lsn: u64) {
        if lsn > self.confirmed {
            self.pending.insert(lsn);
        }
    }

    /// Confirm a batch position after the sink has durably accepted it.
    ///
    /// Monotonic: confirming a position at or below the current confirmed
    /// position is a no-op.
    pub fn confirm(&mut self, lsn: u64) {
        self.pending.remove(&lsn);
        if lsn > self.confirmed {
            self.confirmed = lsn;
            // Anything recorded at or below the new position is subsumed.
            self.pending = self.pending.split_off(&(lsn + 1));
        }
    }

    /// The current confirmed position.
    pub fn current(&self) -> u64 {
        self.confirmed
    }

    /// Number of batches recorded but not yet confirmed.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}
