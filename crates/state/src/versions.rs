//! Layer handles and the diff-stack controller.
//!
//! A [`Layer`] is a reference-counted handle to either the base state or
//! one diff, each behind its own read-write lock. All reads walk the
//! parent chain top-down; all writes land on the layer the handle names.
//! [`LayeredState`] owns the stack: it allocates fresh diffs on top,
//! flushes the bottommost diff into the base when its block is accepted,
//! and can rebuild the whole store from disk.

use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use plateau_primitives::{BlockId, NodeId, SubnetId, TxId};

use crate::base::{BaseState, Category};
use crate::cancel::CancelToken;
use crate::diff::{Diff, Visibility};
use crate::errors::{Result, StateError};
use crate::iterator::StakerIterator;
use crate::staker::{Staker, ValidatorKey};
use crate::tx::{SignedTx, StoredTx, TxStatus};

/// Handle to one layer of the store. Cloning shares the layer.
#[derive(Clone)]
pub enum Layer {
    Base(Arc<RwLock<BaseState>>),
    Diff(Arc<RwLock<Diff>>),
}

impl Layer {
    pub(crate) fn lookup_validator(
        &self,
        category: Category,
        key: &ValidatorKey,
    ) -> Option<Arc<Staker>> {
        let mut cursor = self.clone();
        loop {
            match cursor {
                Layer::Diff(diff) => {
                    let guard = diff.read();
                    match guard.visibility_validator(category, key) {
                        Visibility::Found(staker) => return Some(staker),
                        Visibility::Tombstoned => return None,
                        Visibility::Unknown => {
                            let parent = guard.parent().clone();
                            drop(guard);
                            cursor = parent;
                        }
                    }
                }
                Layer::Base(base) => return base.read().lookup_validator(category, key),
            }
        }
    }

    pub(crate) fn lookup_delegator(
        &self,
        category: Category,
        key: &ValidatorKey,
        tx_id: &TxId,
    ) -> Option<Arc<Staker>> {
        let mut cursor = self.clone();
        loop {
            match cursor {
                Layer::Diff(diff) => {
                    let guard = diff.read();
                    match guard.visibility_delegator(category, key, tx_id) {
                        Visibility::Found(staker) => return Some(staker),
                        Visibility::Tombstoned => return None,
                        Visibility::Unknown => {
                            let parent = guard.parent().clone();
                            drop(guard);
                            cursor = parent;
                        }
                    }
                }
                Layer::Base(base) => {
                    return base.read().lookup_delegator(category, key, tx_id)
                }
            }
        }
    }

    fn staker_iterator(&self, category: Category) -> StakerIterator {
        let mut layers = Vec::new();
        let mut cursor = self.clone();
        loop {
            match cursor {
                Layer::Diff(diff) => {
                    let guard = diff.read();
                    layers.push(guard.layer_stream(category));
                    let parent = guard.parent().clone();
                    drop(guard);
                    cursor = parent;
                }
                Layer::Base(base) => {
                    layers.push((base.read().snapshot(category), BTreeSet::new()));
                    break;
                }
            }
        }
        StakerIterator::from_layers(layers)
    }

    fn delegator_iterator(&self, category: Category, key: &ValidatorKey) -> StakerIterator {
        let mut layers = Vec::new();
        let mut cursor = self.clone();
        loop {
            match cursor {
                Layer::Diff(diff) => {
                    let guard = diff.read();
                    layers.push(guard.delegator_stream(category, key));
                    let parent = guard.parent().clone();
                    drop(guard);
                    cursor = parent;
                }
                Layer::Base(base) => {
                    layers.push((
                        base.read().delegator_snapshot(category, key),
                        BTreeSet::new(),
                    ));
                    break;
                }
            }
        }
        StakerIterator::from_layers(layers)
    }

    /// Merged view of one validator slot's delegators.
    pub(crate) fn delegators_of(
        &self,
        category: Category,
        key: &ValidatorKey,
    ) -> Vec<Arc<Staker>> {
        self.delegator_iterator(category, key).collect()
    }

    fn put_staker(&self, category: Category, validator: bool, staker: Staker) -> Result<()> {
        match self {
            Layer::Base(base) => {
                let mut guard = base.write();
                if validator {
                    guard.put_validator(category, staker)
                } else {
                    guard.put_delegator(category, staker)
                }
            }
            Layer::Diff(diff) => {
                let mut guard = diff.write();
                if validator {
                    guard.put_validator(category, staker)
                } else {
                    guard.put_delegator(category, staker)
                }
            }
        }
    }

    fn update_staker(&self, category: Category, validator: bool, staker: Staker) -> Result<()> {
        match self {
            Layer::Base(base) => {
                let mut guard = base.write();
                if validator {
                    guard.update_validator(category, staker)
                } else {
                    guard.update_delegator(category, staker)
                }
            }
            Layer::Diff(diff) => {
                let mut guard = diff.write();
                if validator {
                    guard.update_validator(category, staker)
                } else {
                    guard.update_delegator(category, staker)
                }
            }
        }
    }

    fn delete_staker(&self, category: Category, validator: bool, staker: &Staker) -> Result<()> {
        match self {
            Layer::Base(base) => {
                let mut guard = base.write();
                if validator {
                    guard.delete_validator(category, staker)
                } else {
                    guard.delete_delegator(category, staker)
                }
            }
            Layer::Diff(diff) => {
                let mut guard = diff.write();
                if validator {
                    guard.delete_validator(category, staker)
                } else {
                    guard.delete_delegator(category, staker)
                }
            }
        }
    }

    // the uniform chain surface

    pub fn put_current_validator(&self, staker: Staker) -> Result<()> {
        self.put_staker(Category::Current, true, staker)
    }

    pub fn put_current_delegator(&self, staker: Staker) -> Result<()> {
        self.put_staker(Category::Current, false, staker)
    }

    pub fn put_pending_validator(&self, staker: Staker) -> Result<()> {
        self.put_staker(Category::Pending, true, staker)
    }

    pub fn put_pending_delegator(&self, staker: Staker) -> Result<()> {
        self.put_staker(Category::Pending, false, staker)
    }

    pub fn update_current_validator(&self, staker: Staker) -> Result<()> {
        self.update_staker(Category::Current, true, staker)
    }

    pub fn update_current_delegator(&self, staker: Staker) -> Result<()> {
        self.update_staker(Category::Current, false, staker)
    }

    pub fn update_pending_validator(&self, staker: Staker) -> Result<()> {
        self.update_staker(Category::Pending, true, staker)
    }

    pub fn update_pending_delegator(&self, staker: Staker) -> Result<()> {
        self.update_staker(Category::Pending, false, staker)
    }

    pub fn delete_current_validator(&self, staker: &Staker) -> Result<()> {
        self.delete_staker(Category::Current, true, staker)
    }

    pub fn delete_current_delegator(&self, staker: &Staker) -> Result<()> {
        self.delete_staker(Category::Current, false, staker)
    }

    pub fn delete_pending_validator(&self, staker: &Staker) -> Result<()> {
        self.delete_staker(Category::Pending, true, staker)
    }

    pub fn delete_pending_delegator(&self, staker: &Staker) -> Result<()> {
        self.delete_staker(Category::Pending, false, staker)
    }

    pub fn get_current_validator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> Result<Arc<Staker>> {
        self.lookup_validator(Category::Current, &(subnet_id, node_id))
            .ok_or(StateError::NotFound)
    }

    pub fn get_pending_validator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> Result<Arc<Staker>> {
        self.lookup_validator(Category::Pending, &(subnet_id, node_id))
            .ok_or(StateError::NotFound)
    }

    pub fn get_current_delegator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
        tx_id: TxId,
    ) -> Result<Arc<Staker>> {
        self.lookup_delegator(Category::Current, &(subnet_id, node_id), &tx_id)
            .ok_or(StateError::NotFound)
    }

    pub fn get_pending_delegator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
        tx_id: TxId,
    ) -> Result<Arc<Staker>> {
        self.lookup_delegator(Category::Pending, &(subnet_id, node_id), &tx_id)
            .ok_or(StateError::NotFound)
    }

    pub fn get_current_delegator_iterator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> StakerIterator {
        self.delegator_iterator(Category::Current, &(subnet_id, node_id))
    }

    pub fn get_pending_delegator_iterator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> StakerIterator {
        self.delegator_iterator(Category::Pending, &(subnet_id, node_id))
    }

    /// Time-ordered merge of every current staker visible from this layer.
    pub fn get_current_staker_iterator(&self) -> StakerIterator {
        self.staker_iterator(Category::Current)
    }

    pub fn get_pending_staker_iterator(&self) -> StakerIterator {
        self.staker_iterator(Category::Pending)
    }

    pub fn add_tx(&self, tx: SignedTx, status: TxStatus) -> Result<()> {
        match self {
            Layer::Base(base) => base.write().add_tx(tx, status),
            Layer::Diff(diff) => {
                diff.write().add_tx(tx, status);
                Ok(())
            }
        }
    }

    pub fn get_tx(&self, tx_id: TxId) -> Result<StoredTx> {
        let mut cursor = self.clone();
        loop {
            match cursor {
                Layer::Diff(diff) => {
                    let guard = diff.read();
                    if let Some(stored) = guard.get_tx(&tx_id) {
                        return Ok(stored);
                    }
                    let parent = guard.parent().clone();
                    drop(guard);
                    cursor = parent;
                }
                Layer::Base(base) => return base.read().get_tx(tx_id),
            }
        }
    }
}

/// The base plus an ordered stack of diffs.
pub struct LayeredState {
    base: Arc<RwLock<BaseState>>,
    diffs: VecDeque<(BlockId, Arc<RwLock<Diff>>)>,
    next_block_seed: u64,
}

impl LayeredState {
    pub fn new(base: BaseState) -> Self {
        Self {
            base: Arc::new(RwLock::new(base)),
            diffs: VecDeque::new(),
            next_block_seed: 0,
        }
    }

    /// Handle to the durable bottom layer.
    pub fn base(&self) -> Layer {
        Layer::Base(Arc::clone(&self.base))
    }

    /// The topmost diff, or the base when the stack is empty.
    pub fn top_chain(&self) -> Layer {
        match self.diffs.back() {
            Some((_, diff)) => Layer::Diff(Arc::clone(diff)),
            None => self.base(),
        }
    }

    /// Number of diffs above the base.
    pub fn depth(&self) -> usize {
        self.diffs.len()
    }

    /// Allocate a fresh diff whose parent is the current top, and return
    /// the block id it was assigned.
    pub fn add_diff_on_top(&mut self) -> BlockId {
        let parent = self.top_chain();
        let parent_id = match self.diffs.back() {
            Some((block_id, _)) => *block_id,
            None => self.base.read().get_last_accepted(),
        };
        let block_id = BlockId::derived(self.next_block_seed);
        self.next_block_seed += 1;
        let diff = Arc::new(RwLock::new(Diff::new(parent, parent_id)));
        self.diffs.push_back((block_id, diff));
        block_id
    }

    /// Apply the bottommost diff to the base and advance the base's last
    /// accepted block to that diff's id. Returns `false` when the stack is
    /// empty.
    ///
    /// Panics when the diff does not apply cleanly: a diff is constructed
    /// against its parent, so a failing replay means an invariant was
    /// already broken before the flush began.
    pub fn flush_bottom_diff(&mut self) -> bool {
        let Some((block_id, diff)) = self.diffs.pop_front() else {
            return false;
        };
        let guard = diff.read();
        let mut base = self.base.write();
        guard
            .apply(&mut base)
            .expect("bottom diff must replay cleanly onto its base");
        base.set_last_accepted(block_id);
        debug!(block = %block_id, remaining = self.diffs.len(), "flushed bottom diff");
        true
    }

    /// Commit the base's buffered writes.
    pub fn commit_base(&mut self) -> Result<()> {
        self.base.write().commit()
    }

    /// Flush every diff (committing after each flush), then reopen the
    /// base from the backend and clear the stack. The rebuilt view equals
    /// the pre-rebuild top view.
    pub fn rebuild_from_disk(&mut self) -> Result<()> {
        self.rebuild_cancellable(&CancelToken::new())
    }

    /// As [`LayeredState::rebuild_from_disk`]; cancellation is honored at
    /// every commit boundary, before a batch reaches the backend.
    pub fn rebuild_cancellable(&mut self, token: &CancelToken) -> Result<()> {
        debug!(diffs = self.diffs.len(), "rebuilding state from disk");
        loop {
            if token.is_cancelled() {
                return Err(StateError::Cancelled);
            }
            if !self.flush_bottom_diff() {
                break;
            }
            self.base.write().commit_cancellable(token)?;
        }
        self.base.write().commit_cancellable(token)?;

        let (kv, config, rewards) = {
            let base = self.base.read();
            (base.kv_handle(), base.config().clone(), base.rewards_handle())
        };
        let fresh = BaseState::open(kv, config, rewards)?;
        *self.base.write() = fresh;
        self.diffs.clear();
        Ok(())
    }

    /// Resolve a block id to its layer: a diff on the stack, or the base
    /// when the id is the last accepted block.
    pub fn state_at(&self, block_id: BlockId) -> Option<Layer> {
        if let Some((_, diff)) = self.diffs.iter().find(|(id, _)| *id == block_id) {
            return Some(Layer::Diff(Arc::clone(diff)));
        }
        if self.base.read().get_last_accepted() == block_id {
            return Some(self.base());
        }
        None
    }
}
