//! Per-symbol order-book sequence tracking (§4.2, §3 invariants).
//!
//! Ownership: a [`SequenceTracker`] lives inside the WS client that created
//! it, one per symbol. Subscribers only ever see the canonical deltas this
//! produces, never the tracker itself.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResyncReason {
    SnapshotMissing,
    Gap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResyncRequest {
    pub reason: ResyncReason,
    pub last_seq: Option<u64>,
    pub update_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaOutcome {
    /// The delta extends the sequence; emit the canonical event.
    Applied,
    /// `update_id <= last_seq`; discard silently.
    Dropped,
    /// A gap or missing snapshot; emit `market:resync_requested` and drop.
    ResyncRequested(ResyncRequest),
}

#[derive(Debug, Default)]
pub struct SequenceTracker {
    last_seq: Option<u64>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self { last_seq: None }
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Record a fresh snapshot's `update_id` as the new baseline.
    pub fn on_snapshot(&mut self, update_id: u64) {
        self.last_seq = Some(update_id);
    }

    /// Apply a delta's `update_id`, returning what the caller should do.
    pub fn on_delta(&mut self, update_id: u64) -> DeltaOutcome {
        match self.last_seq {
            None => DeltaOutcome::ResyncRequested(ResyncRequest {
                reason: ResyncReason::SnapshotMissing,
                last_seq: None,
                update_id: Some(update_id),
            }),
            Some(last) if update_id > last + 1 => DeltaOutcome::ResyncRequested(ResyncRequest {
                reason: ResyncReason::Gap,
                last_seq: Some(last),
                update_id: Some(update_id),
            }),
            Some(last) if update_id <= last => DeltaOutcome::Dropped,
            Some(_) => {
                self.last_seq = Some(update_id);
                DeltaOutcome::Applied
            }
        }
    }

    /// Drop the stored baseline, forcing the next delta to request a resync
    /// (used after a reconnect/resync cycle invalidates prior state).
    pub fn reset(&mut self) {
        self.last_seq = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_before_any_snapshot_requests_resync() {
        let mut t = SequenceTracker::new();
        let outcome = t.on_delta(11);
        assert_eq!(
            outcome,
            DeltaOutcome::ResyncRequested(ResyncRequest {
                reason: ResyncReason::SnapshotMissing,
                last_seq: None,
                update_id: Some(11),
            })
        );
    }

    #[test]
    fn contiguous_delta_after_snapshot_applies() {
        let mut t = SequenceTracker::new();
        t.on_snapshot(10);
        assert_eq!(t.on_delta(11), DeltaOutcome::Applied);
        assert_eq!(t.last_seq(), Some(11));
    }

    #[test]
    fn gap_requests_resync_and_does_not_advance_seq() {
        let mut t = SequenceTracker::new();
        t.on_snapshot(10);
        assert_eq!(t.on_delta(11), DeltaOutcome::Applied);
        let outcome = t.on_delta(15);
        assert_eq!(
            outcome,
            DeltaOutcome::ResyncRequested(ResyncRequest {
                reason: ResyncReason::Gap,
                last_seq: Some(11),
                update_id: Some(15),
            })
        );
        // last_seq unchanged by the rejected delta
        assert_eq!(t.last_seq(), Some(11));
    }

    #[test]
    fn stale_or_equal_delta_is_dropped_silently() {
        let mut t = SequenceTracker::new();
        t.on_snapshot(10);
        assert_eq!(t.on_delta(10), DeltaOutcome::Dropped);
        assert_eq!(t.on_delta(5), DeltaOutcome::Dropped);
        assert_eq!(t.last_seq(), Some(10));
    }

    #[test]
    fn reset_forces_resync_on_next_delta() {
        let mut t = SequenceTracker::new();
        t.on_snapshot(10);
        t.reset();
        assert!(matches!(
            t.on_delta(11),
            DeltaOutcome::ResyncRequested(ResyncRequest {
                reason: ResyncReason::SnapshotMissing,
                ..
            })
        ));
    }
}
