//! Ordered merge over the staker streams of a layer stack.
//!
//! Every input stream is already ordered by `(next_time, tx_id)`. The merge
//! runs a min-heap keyed `(next_time, tx_id, depth)` where depth 0 is the
//! topmost diff; a record is suppressed when a shallower layer shadows its
//! transaction id (it was updated or deleted above), and on a primary-key
//! tie only the topmost copy is emitted.
//!
//! Iterators work on snapshots taken under the layer read lock, so dropping
//! the iterator is all the release a caller has to do; the merge itself is
//! single-pass and non-restartable.

use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeSet, BinaryHeap};
use std::sync::Arc;
use std::vec;

use plateau_primitives::TxId;

use crate::staker::{Staker, StakerKey};

struct HeapEntry {
    key: StakerKey,
    depth: usize,
    staker: Arc<Staker>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.depth == other.depth
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key
            .cmp(&other.key)
            .then_with(|| self.depth.cmp(&other.depth))
    }
}

/// Single-pass merged iterator over the stakers of a layer stack.
pub struct StakerIterator {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    streams: Vec<vec::IntoIter<Arc<Staker>>>,
    shadows: Vec<BTreeSet<TxId>>,
    emitted: BTreeSet<TxId>,
}

impl StakerIterator {
    /// Build the merge from per-layer streams, topmost first. Each stream
    /// must be ordered by `(next_time, tx_id)`; each shadow set suppresses
    /// matching transaction ids in every deeper stream.
    pub(crate) fn from_layers(layers: Vec<(Vec<Arc<Staker>>, BTreeSet<TxId>)>) -> Self {
        let mut streams = Vec::with_capacity(layers.len());
        let mut shadows = Vec::with_capacity(layers.len());
        let mut heap = BinaryHeap::new();
        for (depth, (items, shadow)) in layers.into_iter().enumerate() {
            let mut stream = items.into_iter();
            if let Some(staker) = stream.next() {
                heap.push(Reverse(HeapEntry {
                    key: staker.sort_key(),
                    depth,
                    staker,
                }));
            }
            streams.push(stream);
            shadows.push(shadow);
        }
        Self {
            heap,
            streams,
            shadows,
            emitted: BTreeSet::new(),
        }
    }

    /// A merge over a single, unshadowed stream.
    pub(crate) fn single(items: Vec<Arc<Staker>>) -> Self {
        Self::from_layers(vec![(items, BTreeSet::new())])
    }

    fn advance(&mut self, depth: usize) {
        if let Some(staker) = self.streams[depth].next() {
            self.heap.push(Reverse(HeapEntry {
                key: staker.sort_key(),
                depth,
                staker,
            }));
        }
    }

    fn suppressed(&self, tx_id: &TxId, depth: usize) -> bool {
        if self.emitted.contains(tx_id) {
            return true;
        }
        self.shadows[..depth].iter().any(|shadow| shadow.contains(tx_id))
    }
}

impl Iterator for StakerIterator {
    type Item = Arc<Staker>;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(Reverse(entry)) = self.heap.pop() {
            self.advance(entry.depth);
            if self.suppressed(&entry.staker.tx_id, entry.depth) {
                continue;
            }
            self.emitted.insert(entry.staker.tx_id);
            return Some(entry.staker);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use plateau_primitives::{NodeId, SubnetId};

    use super::*;
    use crate::staker::Priority;

    fn staker(tx_byte: u8, next_time: u64) -> Arc<Staker> {
        let mut staker = Staker::new(
            TxId::from_bytes([tx_byte; 32]),
            NodeId::from_bytes([tx_byte; 20]),
            SubnetId::PRIMARY_NETWORK,
            Priority::PrimaryNetworkValidatorCurrent,
            1_000,
            0,
            next_time.max(1),
            vec![],
        )
        .unwrap();
        staker.next_time = next_time;
        Arc::new(staker)
    }

    fn times(iter: StakerIterator) -> Vec<(u64, u8)> {
        iter.map(|s| (s.next_time, s.tx_id.as_bytes()[0])).collect()
    }

    #[test]
    fn merges_in_time_then_tx_order() {
        let top = vec![staker(2, 10), staker(1, 30)];
        let bottom = vec![staker(3, 10), staker(4, 20)];
        let merged = StakerIterator::from_layers(vec![
            (top, BTreeSet::new()),
            (bottom, BTreeSet::new()),
        ]);
        assert_eq!(times(merged), vec![(10, 2), (10, 3), (20, 4), (30, 1)]);
    }

    #[test]
    fn shadow_suppresses_deeper_copies_even_at_other_times() {
        // the top layer updated tx 3 to a later time; the bottom stream
        // still carries the stale copy at t=10
        let updated = staker(3, 40);
        let mut shadow = BTreeSet::new();
        shadow.insert(updated.tx_id);
        let top = vec![updated];
        let bottom = vec![staker(3, 10), staker(4, 20)];
        let merged =
            StakerIterator::from_layers(vec![(top, shadow), (bottom, BTreeSet::new())]);
        assert_eq!(times(merged), vec![(20, 4), (40, 3)]);
    }

    #[test]
    fn tie_on_primary_key_prefers_topmost() {
        let top = vec![staker(5, 10)];
        let bottom = vec![staker(5, 10)];
        let merged = StakerIterator::from_layers(vec![
            (top, BTreeSet::new()),
            (bottom, BTreeSet::new()),
        ]);
        let collected: Vec<_> = merged.collect();
        assert_eq!(collected.len(), 1);
    }

    #[test]
    fn deletion_shadow_hides_without_replacement() {
        let deleted = staker(6, 15);
        let mut shadow = BTreeSet::new();
        shadow.insert(deleted.tx_id);
        let merged = StakerIterator::from_layers(vec![
            (Vec::new(), shadow),
            (vec![deleted, staker(7, 25)], BTreeSet::new()),
        ]);
        assert_eq!(times(merged), vec![(25, 7)]);
    }

    #[test]
    fn empty_merge_yields_nothing() {
        let merged = StakerIterator::from_layers(Vec::new());
        assert_eq!(merged.count(), 0);
    }
}
