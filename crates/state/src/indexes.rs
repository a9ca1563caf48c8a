//! Ordered and associative containers behind one staker category.
//!
//! Each [`StakerIndex`] instance holds either the current or the pending
//! stakers of a layer: validators by `(subnet, node)`, delegators by
//! `(subnet, node, tx)`, and one tree ordered by `(next_time, tx)` spanning
//! both, which is what the staker iterator walks.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use plateau_primitives::TxId;

use crate::errors::{Result, StateError};
use crate::staker::{Staker, StakerKey, ValidatorKey};

#[derive(Debug, Default)]
pub(crate) struct StakerIndex {
    validators: HashMap<ValidatorKey, Arc<Staker>>,
    delegators: HashMap<ValidatorKey, HashMap<TxId, Arc<Staker>>>,
    ordered: BTreeMap<StakerKey, Arc<Staker>>,
}

impl StakerIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_validator(&self, key: &ValidatorKey) -> Option<Arc<Staker>> {
        self.validators.get(key).cloned()
    }

    pub fn insert_validator(&mut self, staker: Arc<Staker>) -> Result<()> {
        let key = staker.validator_key();
        if self.validators.contains_key(&key) {
            return Err(StateError::Duplicate);
        }
        self.ordered.insert(staker.sort_key(), Arc::clone(&staker));
        self.validators.insert(key, staker);
        Ok(())
    }

    /// Replace an existing validator record, returning the old one.
    pub fn replace_validator(&mut self, staker: Arc<Staker>) -> Result<Arc<Staker>> {
        let key = staker.validator_key();
        let old = match self.validators.get(&key) {
            Some(old) if old.tx_id == staker.tx_id => Arc::clone(old),
            _ => return Err(StateError::NotFound),
        };
        if !old.same_identity(&staker) {
            return Err(StateError::InvalidStaker(
                "update changes staker identity".into(),
            ));
        }
        self.ordered.remove(&old.sort_key());
        self.ordered.insert(staker.sort_key(), Arc::clone(&staker));
        self.validators.insert(key, staker);
        Ok(old)
    }

    /// Remove the validator in `expected`'s slot, returning the stored
    /// record. The stored record must carry the expected transaction id.
    pub fn remove_validator(&mut self, expected: &Staker) -> Result<Arc<Staker>> {
        let key = expected.validator_key();
        match self.validators.get(&key) {
            Some(old) if old.tx_id == expected.tx_id => {}
            _ => return Err(StateError::NotFound),
        }
        let old = self.validators.remove(&key).expect("checked above");
        self.ordered.remove(&old.sort_key());
        Ok(old)
    }

    /// Remove and return every delegator bonded to the given validator slot.
    pub fn take_delegators(&mut self, key: &ValidatorKey) -> Vec<Arc<Staker>> {
        let Some(delegators) = self.delegators.remove(key) else {
            return Vec::new();
        };
        let mut removed: Vec<Arc<Staker>> = delegators.into_values().collect();
        for staker in &removed {
            self.ordered.remove(&staker.sort_key());
        }
        removed.sort_by_key(|staker| staker.sort_key());
        removed
    }

    pub fn get_delegator(&self, key: &ValidatorKey, tx_id: &TxId) -> Option<Arc<Staker>> {
        self.delegators.get(key).and_then(|d| d.get(tx_id)).cloned()
    }

    pub fn insert_delegator(&mut self, staker: Arc<Staker>) -> Result<()> {
        let key = staker.validator_key();
        let slot = self.delegators.entry(key).or_default();
        if slot.contains_key(&staker.tx_id) {
            return Err(StateError::Duplicate);
        }
        self.ordered.insert(staker.sort_key(), Arc::clone(&staker));
        slot.insert(staker.tx_id, staker);
        Ok(())
    }

    pub fn replace_delegator(&mut self, staker: Arc<Staker>) -> Result<Arc<Staker>> {
        let key = staker.validator_key();
        let old = match self.delegators.get(&key).and_then(|d| d.get(&staker.tx_id)) {
            Some(old) => Arc::clone(old),
            None => return Err(StateError::NotFound),
        };
        if !old.same_identity(&staker) {
            return Err(StateError::InvalidStaker(
                "update changes staker identity".into(),
            ));
        }
        self.ordered.remove(&old.sort_key());
        self.ordered.insert(staker.sort_key(), Arc::clone(&staker));
        self.delegators
            .get_mut(&key)
            .expect("slot exists")
            .insert(staker.tx_id, staker);
        Ok(old)
    }

    pub fn remove_delegator(&mut self, expected: &Staker) -> Result<Arc<Staker>> {
        let key = expected.validator_key();
        let slot = self.delegators.get_mut(&key).ok_or(StateError::NotFound)?;
        let old = slot.remove(&expected.tx_id).ok_or(StateError::NotFound)?;
        if slot.is_empty() {
            self.delegators.remove(&key);
        }
        self.ordered.remove(&old.sort_key());
        Ok(old)
    }

    /// The delegators of one validator slot, ordered by `(next_time, tx)`.
    pub fn delegators_sorted(&self, key: &ValidatorKey) -> Vec<Arc<Staker>> {
        let mut out: Vec<Arc<Staker>> = self
            .delegators
            .get(key)
            .map(|d| d.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(|staker| staker.sort_key());
        out
    }

    /// Every staker of the category, ordered by `(next_time, tx)`.
    pub fn snapshot(&self) -> Vec<Arc<Staker>> {
        self.ordered.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }
}
