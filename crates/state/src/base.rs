//! Durable base state backed by the versioned key-value store.
//!
//! The base holds the accepted view: four staker indexes mirrored to disk,
//! the transaction store and the last accepted block id. Every mutation
//! updates the in-memory indexes and buffers the matching KV writes in the
//! versioned batch; `commit` flushes the batch atomically, `close` drops
//! whatever was not committed.
//!
//! ## Persisted layout
//!
//! | prefix   | key                                   | value               |
//! |----------|---------------------------------------|---------------------|
//! | `s/cv/`  | class byte ++ next_time BE ++ tx id   | staker record       |
//! | `s/cd/`  | class byte ++ next_time BE ++ tx id   | staker record       |
//! | `s/pv/`  | class byte ++ next_time BE ++ tx id   | staker record       |
//! | `s/pd/`  | class byte ++ next_time BE ++ tx id   | staker record       |
//! | `i/v/`   | category ++ subnet ++ node            | sort key            |
//! | `i/d/`   | category ++ subnet ++ node ++ tx id   | sort key            |
//! | `t/`     | tx id                                 | stored transaction  |
//! | `m/`     | `last_accepted`                       | block id            |
//!
//! A prefix scan therefore yields stakers in `(priority class, next_time,
//! tx_id)` order, which lets startup rebuild the ordered indexes without a
//! sort pass.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use plateau_primitives::{BlockId, NodeId, SubnetId, TxId};

use crate::cancel::CancelToken;
use crate::config::StakingConfig;
use crate::errors::{Result, StateError};
use crate::indexes::StakerIndex;
use crate::iterator::StakerIterator;
use crate::kv::{KvStore, VersionedKv};
use crate::reward::RewardCalculator;
use crate::staker::{Staker, ValidatorKey};
use crate::tx::{SignedTx, StoredTx, TxStatus};

const PREFIX_CURRENT_VALIDATOR: &[u8] = b"s/cv/";
const PREFIX_CURRENT_DELEGATOR: &[u8] = b"s/cd/";
const PREFIX_PENDING_VALIDATOR: &[u8] = b"s/pv/";
const PREFIX_PENDING_DELEGATOR: &[u8] = b"s/pd/";
const PREFIX_VALIDATOR_LOOKUP: &[u8] = b"i/v/";
const PREFIX_DELEGATOR_LOOKUP: &[u8] = b"i/d/";
const PREFIX_TX: &[u8] = b"t/";
const KEY_LAST_ACCEPTED: &[u8] = b"m/last_accepted";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Category {
    Current,
    Pending,
}

impl Category {
    fn byte(self) -> u8 {
        match self {
            Category::Current => 0,
            Category::Pending => 1,
        }
    }

    fn fits(self, staker: &Staker) -> bool {
        match self {
            Category::Current => staker.priority.is_current(),
            Category::Pending => staker.priority.is_pending(),
        }
    }
}

pub(crate) fn check_role(staker: &Staker, category: Category, expect_validator: bool) -> Result<()> {
    if !category.fits(staker) || staker.priority.is_validator() != expect_validator {
        return Err(StateError::InvalidStaker(format!(
            "priority {:?} does not fit the operation",
            staker.priority
        )));
    }
    Ok(())
}

fn sort_key_bytes(staker: &Staker) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + 8 + TxId::LEN);
    out.push(staker.priority.class_byte());
    out.extend_from_slice(&staker.next_time.to_be_bytes());
    out.extend_from_slice(staker.tx_id.as_bytes());
    out
}

fn row_key(prefix: &[u8], staker: &Staker) -> Vec<u8> {
    let mut out = prefix.to_vec();
    out.extend_from_slice(&sort_key_bytes(staker));
    out
}

fn validator_lookup_key(category: Category, key: &ValidatorKey) -> Vec<u8> {
    let mut out = PREFIX_VALIDATOR_LOOKUP.to_vec();
    out.push(category.byte());
    out.extend_from_slice(key.0.as_bytes());
    out.extend_from_slice(key.1.as_bytes());
    out
}

fn delegator_lookup_key(category: Category, key: &ValidatorKey, tx_id: &TxId) -> Vec<u8> {
    let mut out = PREFIX_DELEGATOR_LOOKUP.to_vec();
    out.push(category.byte());
    out.extend_from_slice(key.0.as_bytes());
    out.extend_from_slice(key.1.as_bytes());
    out.extend_from_slice(tx_id.as_bytes());
    out
}

fn tx_key(tx_id: &TxId) -> Vec<u8> {
    let mut out = PREFIX_TX.to_vec();
    out.extend_from_slice(tx_id.as_bytes());
    out
}

fn staker_prefix(category: Category, validator: bool) -> &'static [u8] {
    match (category, validator) {
        (Category::Current, true) => PREFIX_CURRENT_VALIDATOR,
        (Category::Current, false) => PREFIX_CURRENT_DELEGATOR,
        (Category::Pending, true) => PREFIX_PENDING_VALIDATOR,
        (Category::Pending, false) => PREFIX_PENDING_DELEGATOR,
    }
}

fn decode_staker(bytes: &[u8]) -> Result<Staker> {
    bincode::deserialize(bytes)
        .map_err(|e| StateError::Corruption(format!("undecodable staker record: {e}")))
}

fn encode_staker(staker: &Staker) -> Result<Vec<u8>> {
    bincode::serialize(staker)
        .map_err(|e| StateError::Corruption(format!("unencodable staker record: {e}")))
}

/// The durable, committed layer of the staker store.
pub struct BaseState {
    kv: VersionedKv,
    current: StakerIndex,
    pending: StakerIndex,
    txs: HashMap<TxId, StoredTx>,
    last_accepted: BlockId,
    config: StakingConfig,
    rewards: Arc<dyn RewardCalculator>,
}

impl BaseState {
    /// Open the base state over a shared KV backend, loading the staker
    /// indexes from disk.
    pub fn open(
        kv: Arc<dyn KvStore>,
        config: StakingConfig,
        rewards: Arc<dyn RewardCalculator>,
    ) -> Result<Self> {
        let kv = VersionedKv::new(kv);
        let last_accepted = match kv.get(KEY_LAST_ACCEPTED).map_err(StateError::Backend)? {
            Some(bytes) => {
                let arr: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
                    StateError::Corruption(format!(
                        "last accepted block id has {} bytes",
                        bytes.len()
                    ))
                })?;
                BlockId::from_bytes(arr)
            }
            None => BlockId::EMPTY,
        };

        let mut state = Self {
            kv,
            current: StakerIndex::new(),
            pending: StakerIndex::new(),
            txs: HashMap::new(),
            last_accepted,
            config,
            rewards,
        };
        state.load_stakers()?;
        debug!(
            current = state.current.len(),
            pending = state.pending.len(),
            last_accepted = %state.last_accepted,
            "opened base state"
        );
        Ok(state)
    }

    fn load_stakers(&mut self) -> Result<()> {
        let sections = [
            (Category::Current, true),
            (Category::Current, false),
            (Category::Pending, true),
            (Category::Pending, false),
        ];
        for (category, validator) in sections {
            let prefix = staker_prefix(category, validator);
            for (key, value) in self.kv.scan_prefix(prefix).map_err(StateError::Backend)? {
                let staker = decode_staker(&value)?;
                if key[prefix.len()..] != sort_key_bytes(&staker)[..] {
                    return Err(StateError::Corruption(
                        "staker row key disagrees with its record".into(),
                    ));
                }
                check_role(&staker, category, validator)
                    .map_err(|_| StateError::Corruption("staker row in wrong section".into()))?;
                let index = self.index_mut(category);
                let arc = Arc::new(staker);
                let inserted = if validator {
                    index.insert_validator(arc)
                } else {
                    index.insert_delegator(arc)
                };
                inserted.map_err(|_| {
                    StateError::Corruption("duplicate staker identity on disk".into())
                })?;
            }
        }
        Ok(())
    }

    fn index(&self, category: Category) -> &StakerIndex {
        match category {
            Category::Current => &self.current,
            Category::Pending => &self.pending,
        }
    }

    fn index_mut(&mut self, category: Category) -> &mut StakerIndex {
        match category {
            Category::Current => &mut self.current,
            Category::Pending => &mut self.pending,
        }
    }

    fn write_staker(&mut self, category: Category, staker: &Staker) -> Result<()> {
        let record = encode_staker(staker)?;
        let validator = staker.priority.is_validator();
        self.kv
            .put(row_key(staker_prefix(category, validator), staker), record);
        let lookup = if validator {
            validator_lookup_key(category, &staker.validator_key())
        } else {
            delegator_lookup_key(category, &staker.validator_key(), &staker.tx_id)
        };
        self.kv.put(lookup, sort_key_bytes(staker));
        Ok(())
    }

    fn erase_staker(&mut self, category: Category, staker: &Staker) {
        let validator = staker.priority.is_validator();
        self.kv
            .delete(row_key(staker_prefix(category, validator), staker));
        let lookup = if validator {
            validator_lookup_key(category, &staker.validator_key())
        } else {
            delegator_lookup_key(category, &staker.validator_key(), &staker.tx_id)
        };
        self.kv.delete(lookup);
    }

    // generic staker operations, shared by the current and pending surface

    pub(crate) fn put_validator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, true)?;
        staker.validate()?;
        let arc = Arc::new(staker);
        self.index_mut(category).insert_validator(Arc::clone(&arc))?;
        self.write_staker(category, &arc)
    }

    pub(crate) fn put_delegator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, false)?;
        staker.validate()?;
        let key = staker.validator_key();
        if self.index(category).get_validator(&key).is_none() {
            return Err(StateError::MissingValidator {
                subnet: staker.subnet_id,
                node: staker.node_id,
            });
        }
        let arc = Arc::new(staker);
        self.index_mut(category).insert_delegator(Arc::clone(&arc))?;
        self.write_staker(category, &arc)
    }

    pub(crate) fn update_validator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, true)?;
        staker.validate()?;
        let arc = Arc::new(staker);
        let old = self.index_mut(category).replace_validator(Arc::clone(&arc))?;
        self.erase_staker(category, &old);
        self.write_staker(category, &arc)
    }

    pub(crate) fn update_delegator(&mut self, category: Category, staker: Staker) -> Result<()> {
        check_role(&staker, category, false)?;
        staker.validate()?;
        let arc = Arc::new(staker);
        let old = self.index_mut(category).replace_delegator(Arc::clone(&arc))?;
        self.erase_staker(category, &old);
        self.write_staker(category, &arc)
    }

    pub(crate) fn delete_validator(&mut self, category: Category, staker: &Staker) -> Result<()> {
        check_role(staker, category, true)?;
        let old = self.index_mut(category).remove_validator(staker)?;
        // a validator takes its remaining delegators with it
        let orphans = self.index_mut(category).take_delegators(&old.validator_key());
        for orphan in orphans {
            self.erase_staker(category, &orphan);
        }
        self.erase_staker(category, &old);
        Ok(())
    }

    /// Remove a validator without touching its delegators. Used when a
    /// diff replays onto the base: the diff already recorded explicit
    /// tombstones for every cascaded delegator.
    pub(crate) fn delete_validator_no_cascade(
        &mut self,
        category: Category,
        staker: &Staker,
    ) -> Result<()> {
        check_role(staker, category, true)?;
        let old = self.index_mut(category).remove_validator(staker)?;
        self.erase_staker(category, &old);
        Ok(())
    }

    pub(crate) fn delete_delegator(&mut self, category: Category, staker: &Staker) -> Result<()> {
        check_role(staker, category, false)?;
        let old = self.index_mut(category).remove_delegator(staker)?;
        self.erase_staker(category, &old);
        Ok(())
    }

    pub(crate) fn lookup_validator(
        &self,
        category: Category,
        key: &ValidatorKey,
    ) -> Option<Arc<Staker>> {
        self.index(category).get_validator(key)
    }

    pub(crate) fn lookup_delegator(
        &self,
        category: Category,
        key: &ValidatorKey,
        tx_id: &TxId,
    ) -> Option<Arc<Staker>> {
        self.index(category).get_delegator(key, tx_id)
    }

    pub(crate) fn snapshot(&self, category: Category) -> Vec<Arc<Staker>> {
        self.index(category).snapshot()
    }

    pub(crate) fn delegator_snapshot(
        &self,
        category: Category,
        key: &ValidatorKey,
    ) -> Vec<Arc<Staker>> {
        self.index(category).delegators_sorted(key)
    }

    // the public current/pending surface

    pub fn put_current_validator(&mut self, staker: Staker) -> Result<()> {
        self.put_validator(Category::Current, staker)
    }

    pub fn put_current_delegator(&mut self, staker: Staker) -> Result<()> {
        self.put_delegator(Category::Current, staker)
    }

    pub fn put_pending_validator(&mut self, staker: Staker) -> Result<()> {
        self.put_validator(Category::Pending, staker)
    }

    pub fn put_pending_delegator(&mut self, staker: Staker) -> Result<()> {
        self.put_delegator(Category::Pending, staker)
    }

    pub fn update_current_validator(&mut self, staker: Staker) -> Result<()> {
        self.update_validator(Category::Current, staker)
    }

    pub fn update_current_delegator(&mut self, staker: Staker) -> Result<()> {
        self.update_delegator(Category::Current, staker)
    }

    pub fn update_pending_validator(&mut self, staker: Staker) -> Result<()> {
        self.update_validator(Category::Pending, staker)
    }

    pub fn update_pending_delegator(&mut self, staker: Staker) -> Result<()> {
        self.update_delegator(Category::Pending, staker)
    }

    pub fn delete_current_validator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_validator(Category::Current, staker)
    }

    pub fn delete_current_delegator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_delegator(Category::Current, staker)
    }

    pub fn delete_pending_validator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_validator(Category::Pending, staker)
    }

    pub fn delete_pending_delegator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_delegator(Category::Pending, staker)
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
        StakerIterator::single(self.delegator_snapshot(Category::Current, &(subnet_id, node_id)))
    }

    pub fn get_pending_delegator_iterator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> StakerIterator {
        StakerIterator::single(self.delegator_snapshot(Category::Pending, &(subnet_id, node_id)))
    }

    /// Ordered merge of current validators and delegators.
    pub fn get_current_staker_iterator(&self) -> StakerIterator {
        StakerIterator::single(self.snapshot(Category::Current))
    }

    pub fn get_pending_staker_iterator(&self) -> StakerIterator {
        StakerIterator::single(self.snapshot(Category::Pending))
    }

    // transactions and housekeeping

    pub fn add_tx(&mut self, tx: SignedTx, status: TxStatus) -> Result<()> {
        let stored = StoredTx { tx, status };
        let bytes = bincode::serialize(&stored)
            .map_err(|e| StateError::Corruption(format!("unencodable transaction: {e}")))?;
        self.kv.put(tx_key(&stored.tx.tx_id()), bytes);
        self.txs.insert(stored.tx.tx_id(), stored);
        Ok(())
    }

    pub fn get_tx(&self, tx_id: TxId) -> Result<StoredTx> {
        if let Some(stored) = self.txs.get(&tx_id) {
            return Ok(stored.clone());
        }
        match self.kv.get(&tx_key(&tx_id)).map_err(StateError::Backend)? {
            Some(bytes) => bincode::deserialize(&bytes)
                .map_err(|e| StateError::Corruption(format!("undecodable transaction: {e}"))),
            None => Err(StateError::NotFound),
        }
    }

    pub fn get_last_accepted(&self) -> BlockId {
        self.last_accepted
    }

    pub fn set_last_accepted(&mut self, block_id: BlockId) {
        self.last_accepted = block_id;
        self.kv
            .put(KEY_LAST_ACCEPTED.to_vec(), block_id.as_bytes().to_vec());
    }

    /// Atomically flush every buffered write and open a fresh batch.
    pub fn commit(&mut self) -> Result<()> {
        debug!(pending = self.kv.pending_len(), "committing base state");
        self.kv.commit().map_err(StateError::Backend)
    }

    /// As [`BaseState::commit`], but bail out before touching the backend
    /// when the token was cancelled. Once the batch is handed over, the
    /// write runs to completion.
    pub fn commit_cancellable(&mut self, token: &CancelToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(StateError::Cancelled);
        }
        self.commit()
    }

    /// Drop every uncommitted write. The in-memory view keeps the aborted
    /// mutations; callers are expected to reopen from disk afterwards.
    pub fn abort(&mut self) {
        debug!(dropped = self.kv.pending_len(), "aborting base state batch");
        self.kv.abort();
    }

    /// Release the backend. Uncommitted writes are discarded.
    pub fn close(&self) -> Result<()> {
        self.kv.close().map_err(StateError::Backend)
    }

    pub fn config(&self) -> &StakingConfig {
        &self.config
    }

    /// Compute opaque reward credentials with the configured calculator.
    pub fn reward_credentials_for(
        &self,
        weight: u64,
        staking_period: u64,
        current_supply: u64,
    ) -> Vec<u8> {
        self.rewards.calculate(weight, staking_period, current_supply)
    }

    pub(crate) fn kv_handle(&self) -> Arc<dyn KvStore> {
        self.kv.inner()
    }

    pub(crate) fn rewards_handle(&self) -> Arc<dyn RewardCalculator> {
        Arc::clone(&self.rewards)
    }
}
