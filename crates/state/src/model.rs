//! In-memory reference model of the staker store.
//!
//! The model is normative: no diffs, no batches, no persistence, just
//! plain maps and a sort at iteration time. The property harness runs
//! every command against both this model and the layered production store
//! and fails on the first divergence; when the two disagree, the
//! production store is wrong by definition.

use std::collections::HashMap;

use plateau_primitives::{NodeId, SubnetId, TxId};

use crate::errors::{Result, StateError};
use crate::staker::{Staker, ValidatorKey};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Category {
    Current,
    Pending,
}

#[derive(Clone, Debug, Default)]
pub struct StakersModel {
    current_validators: HashMap<ValidatorKey, Staker>,
    current_delegators: HashMap<ValidatorKey, HashMap<TxId, Staker>>,
    pending_validators: HashMap<ValidatorKey, Staker>,
    pending_delegators: HashMap<ValidatorKey, HashMap<TxId, Staker>>,
}

impl StakersModel {
    pub fn new() -> Self {
        Self::default()
    }

    fn validators(&self, category: Category) -> &HashMap<ValidatorKey, Staker> {
        match category {
            Category::Current => &self.current_validators,
            Category::Pending => &self.pending_validators,
        }
    }

    fn validators_mut(&mut self, category: Category) -> &mut HashMap<ValidatorKey, Staker> {
        match category {
            Category::Current => &mut self.current_validators,
            Category::Pending => &mut self.pending_validators,
        }
    }

    fn delegators(&self, category: Category) -> &HashMap<ValidatorKey, HashMap<TxId, Staker>> {
        match category {
            Category::Current => &self.current_delegators,
            Category::Pending => &self.pending_delegators,
        }
    }

    fn delegators_mut(
        &mut self,
        category: Category,
    ) -> &mut HashMap<ValidatorKey, HashMap<TxId, Staker>> {
        match category {
            Category::Current => &mut self.current_delegators,
            Category::Pending => &mut self.pending_delegators,
        }
    }

    fn check_role(
        staker: &Staker,
        category: Category,
        expect_validator: bool,
    ) -> Result<()> {
        let category_ok = match category {
            Category::Current => staker.priority.is_current(),
            Category::Pending => staker.priority.is_pending(),
        };
        let role_ok = staker.priority.is_validator() == expect_validator;
        if !category_ok || !role_ok {
            return Err(StateError::InvalidStaker(format!(
                "priority {:?} does not fit the operation",
                staker.priority
            )));
        }
        Ok(())
    }

    fn put_validator(&mut self, category: Category, staker: Staker) -> Result<()> {
        Self::check_role(&staker, category, true)?;
        staker.validate()?;
        let key = staker.validator_key();
        if self.validators(category).contains_key(&key) {
            return Err(StateError::Duplicate);
        }
        self.validators_mut(category).insert(key, staker);
        Ok(())
    }

    fn put_delegator(&mut self, category: Category, staker: Staker) -> Result<()> {
        Self::check_role(&staker, category, false)?;
        staker.validate()?;
        let key = staker.validator_key();
        if !self.validators(category).contains_key(&key) {
            return Err(StateError::MissingValidator {
                subnet: staker.subnet_id,
                node: staker.node_id,
            });
        }
        let slot = self.delegators_mut(category).entry(key).or_default();
        if slot.contains_key(&staker.tx_id) {
            return Err(StateError::Duplicate);
        }
        slot.insert(staker.tx_id, staker);
        Ok(())
    }

    fn update_validator(&mut self, category: Category, staker: Staker) -> Result<()> {
        Self::check_role(&staker, category, true)?;
        staker.validate()?;
        let key = staker.validator_key();
        let old = match self.validators(category).get(&key) {
            Some(old) if old.tx_id == staker.tx_id => old,
            _ => return Err(StateError::NotFound),
        };
        if !old.same_identity(&staker) {
            return Err(StateError::InvalidStaker(
                "update changes staker identity".into(),
            ));
        }
        self.validators_mut(category).insert(key, staker);
        Ok(())
    }

    fn update_delegator(&mut self, category: Category, staker: Staker) -> Result<()> {
        Self::check_role(&staker, category, false)?;
        staker.validate()?;
        let key = staker.validator_key();
        let old = match self
            .delegators(category)
            .get(&key)
            .and_then(|slot| slot.get(&staker.tx_id))
        {
            Some(old) => old,
            None => return Err(StateError::NotFound),
        };
        if !old.same_identity(&staker) {
            return Err(StateError::InvalidStaker(
                "update changes staker identity".into(),
            ));
        }
        self.delegators_mut(category)
            .get_mut(&key)
            .expect("slot exists")
            .insert(staker.tx_id, staker);
        Ok(())
    }

    fn delete_validator(&mut self, category: Category, staker: &Staker) -> Result<()> {
        Self::check_role(staker, category, true)?;
        let key = staker.validator_key();
        match self.validators(category).get(&key) {
            Some(old) if old.tx_id == staker.tx_id => {}
            _ => return Err(StateError::NotFound),
        }
        self.validators_mut(category).remove(&key);
        // a validator takes its delegators with it
        self.delegators_mut(category).remove(&key);
        Ok(())
    }

    fn delete_delegator(&mut self, category: Category, staker: &Staker) -> Result<()> {
        Self::check_role(staker, category, false)?;
        let key = staker.validator_key();
        let slot = self
            .delegators_mut(category)
            .get_mut(&key)
            .ok_or(StateError::NotFound)?;
        slot.remove(&staker.tx_id).ok_or(StateError::NotFound)?;
        if slot.is_empty() {
            self.delegators_mut(category).remove(&key);
        }
        Ok(())
    }

    fn get_validator(
        &self,
        category: Category,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> Result<Staker> {
        self.validators(category)
            .get(&(subnet_id, node_id))
            .cloned()
            .ok_or(StateError::NotFound)
    }

    fn delegator_iterator(
        &self,
        category: Category,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> Vec<Staker> {
        let mut out: Vec<Staker> = self
            .delegators(category)
            .get(&(subnet_id, node_id))
            .map(|slot| slot.values().cloned().collect())
            .unwrap_or_default();
        out.sort_by_key(Staker::sort_key);
        out
    }

    fn staker_iterator(&self, category: Category) -> Vec<Staker> {
        let mut out: Vec<Staker> = self.validators(category).values().cloned().collect();
        out.extend(
            self.delegators(category)
                .values()
                .flat_map(|slot| slot.values().cloned()),
        );
        out.sort_by_key(Staker::sort_key);
        out
    }

    // current

    pub fn put_current_validator(&mut self, staker: Staker) -> Result<()> {
        self.put_validator(Category::Current, staker)
    }

    pub fn put_current_delegator(&mut self, staker: Staker) -> Result<()> {
        self.put_delegator(Category::Current, staker)
    }

    pub fn update_current_validator(&mut self, staker: Staker) -> Result<()> {
        self.update_validator(Category::Current, staker)
    }

    pub fn update_current_delegator(&mut self, staker: Staker) -> Result<()> {
        self.update_delegator(Category::Current, staker)
    }

    pub fn delete_current_validator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_validator(Category::Current, staker)
    }

    pub fn delete_current_delegator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_delegator(Category::Current, staker)
    }

    pub fn get_current_validator(&self, subnet_id: SubnetId, node_id: NodeId) -> Result<Staker> {
        self.get_validator(Category::Current, subnet_id, node_id)
    }

    pub fn get_current_delegator_iterator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> Vec<Staker> {
        self.delegator_iterator(Category::Current, subnet_id, node_id)
    }

    /// Union of current validators and delegators, ordered by
    /// `(next_time, tx_id)`.
    pub fn get_current_staker_iterator(&self) -> Vec<Staker> {
        self.staker_iterator(Category::Current)
    }

    // pending

    pub fn put_pending_validator(&mut self, staker: Staker) -> Result<()> {
        self.put_validator(Category::Pending, staker)
    }

    pub fn put_pending_delegator(&mut self, staker: Staker) -> Result<()> {
        self.put_delegator(Category::Pending, staker)
    }

    pub fn update_pending_validator(&mut self, staker: Staker) -> Result<()> {
        self.update_validator(Category::Pending, staker)
    }

    pub fn update_pending_delegator(&mut self, staker: Staker) -> Result<()> {
        self.update_delegator(Category::Pending, staker)
    }

    pub fn delete_pending_validator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_validator(Category::Pending, staker)
    }

    pub fn delete_pending_delegator(&mut self, staker: &Staker) -> Result<()> {
        self.delete_delegator(Category::Pending, staker)
    }

    pub fn get_pending_validator(&self, subnet_id: SubnetId, node_id: NodeId) -> Result<Staker> {
        self.get_validator(Category::Pending, subnet_id, node_id)
    }

    pub fn get_pending_delegator_iterator(
        &self,
        subnet_id: SubnetId,
        node_id: NodeId,
    ) -> Vec<Staker> {
        self.delegator_iterator(Category::Pending, subnet_id, node_id)
    }

    pub fn get_pending_staker_iterator(&self) -> Vec<Staker> {
        self.staker_iterator(Category::Pending)
    }

    /// Pick the first current validator in iteration order, if any.
    pub fn first_current_validator(&self) -> Option<Staker> {
        self.get_current_staker_iterator()
            .into_iter()
            .find(|staker| staker.priority.is_validator())
    }

    /// Pick the first current delegator in iteration order, if any.
    pub fn first_current_delegator(&self) -> Option<Staker> {
        self.get_current_staker_iterator()
            .into_iter()
            .find(|staker| staker.priority.is_delegator())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::staker::Priority;

    fn validator(tx_byte: u8, node_byte: u8, end: u64) -> Staker {
        Staker::new(
            TxId::from_bytes([tx_byte; 32]),
            NodeId::from_bytes([node_byte; 20]),
            SubnetId::PRIMARY_NETWORK,
            Priority::PrimaryNetworkValidatorCurrent,
            1_000,
            100,
            end,
            vec![],
        )
        .unwrap()
    }

    fn delegator(tx_byte: u8, node_byte: u8, end: u64) -> Staker {
        Staker::new(
            TxId::from_bytes([tx_byte; 32]),
            NodeId::from_bytes([node_byte; 20]),
            SubnetId::PRIMARY_NETWORK,
            Priority::PrimaryNetworkDelegatorCurrent,
            500,
            100,
            end,
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn delegator_requires_validator() {
        let mut model = StakersModel::new();
        assert!(matches!(
            model.put_current_delegator(delegator(2, 0xaa, 300)),
            Err(StateError::MissingValidator { .. })
        ));
        model.put_current_validator(validator(1, 0xaa, 200)).unwrap();
        model.put_current_delegator(delegator(2, 0xaa, 300)).unwrap();
    }

    #[test]
    fn duplicate_put_is_rejected() {
        let mut model = StakersModel::new();
        model.put_current_validator(validator(1, 0xaa, 200)).unwrap();
        assert!(matches!(
            model.put_current_validator(validator(2, 0xaa, 300)),
            Err(StateError::Duplicate)
        ));
    }

    #[test]
    fn iterator_is_time_then_tx_ordered() {
        let mut model = StakersModel::new();
        model.put_current_validator(validator(5, 0xaa, 400)).unwrap();
        model.put_current_validator(validator(1, 0xbb, 200)).unwrap();
        model.put_current_delegator(delegator(3, 0xaa, 300)).unwrap();
        let times: Vec<u64> = model
            .get_current_staker_iterator()
            .iter()
            .map(|s| s.next_time)
            .collect();
        assert_eq!(times, vec![200, 300, 400]);
    }

    #[test]
    fn deleting_validator_drops_its_delegators() {
        let mut model = StakersModel::new();
        let val = validator(1, 0xaa, 200);
        model.put_current_validator(val.clone()).unwrap();
        model.put_current_delegator(delegator(2, 0xaa, 300)).unwrap();
        model.delete_current_validator(&val).unwrap();
        assert!(model.get_current_staker_iterator().is_empty());
    }

    #[test]
    fn update_preserves_identity() {
        let mut model = StakersModel::new();
        let val = validator(1, 0xaa, 200);
        model.put_current_validator(val.clone()).unwrap();

        let mut updated = val.clone();
        updated.increase_weight(2_000);
        model.update_current_validator(updated).unwrap();
        assert_eq!(
            model
                .get_current_validator(val.subnet_id, val.node_id)
                .unwrap()
                .weight,
            2_000
        );

        // changing priority is an identity change
        let mut wrong = val;
        wrong.priority = Priority::SubnetPermissionlessValidatorCurrent;
        assert!(matches!(
            model.update_current_validator(wrong),
            Err(StateError::InvalidStaker(_))
        ));
    }

    #[test]
    fn pending_and_current_are_separate() {
        let mut model = StakersModel::new();
        let mut pending = validator(1, 0xaa, 200);
        pending.priority = Priority::PrimaryNetworkValidatorPending;
        model.put_pending_validator(pending).unwrap();
        model.put_current_validator(validator(2, 0xaa, 250)).unwrap();
        assert_eq!(model.get_current_staker_iterator().len(), 1);
        assert_eq!(model.get_pending_staker_iterator().len(), 1);
    }
}
