//! The staker record and its ordering.
//!
//! A [`Staker`] describes one validator or delegator instance. The record is
//! immutable at rest; the store replaces whole records on update and the
//! identity fields (`tx_id`, `node_id`, `subnet_id`, `priority`) never change
//! across replacements.

use serde::{Deserialize, Serialize};

use plateau_primitives::{NodeId, SubnetId, TxId};

use crate::errors::{Result, StateError};

/// Total-ordered tag distinguishing the staker variants.
///
/// The discriminant doubles as the priority class byte in persisted sort
/// keys, so renumbering variants is a breaking change to the disk format.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[repr(u8)]
pub enum Priority {
    SubnetPermissionedValidatorCurrent = 0,
    SubnetPermissionlessValidatorCurrent = 1,
    PrimaryNetworkValidatorCurrent = 2,
    SubnetPermissionlessDelegatorCurrent = 3,
    PrimaryNetworkDelegatorCurrent = 4,
    SubnetPermissionedValidatorPending = 5,
    SubnetPermissionlessValidatorPending = 6,
    PrimaryNetworkValidatorPending = 7,
    SubnetPermissionlessDelegatorPending = 8,
    PrimaryNetworkDelegatorPending = 9,
}

impl Priority {
    pub fn is_validator(self) -> bool {
        matches!(
            self,
            Priority::SubnetPermissionedValidatorCurrent
                | Priority::SubnetPermissionlessValidatorCurrent
                | Priority::PrimaryNetworkValidatorCurrent
                | Priority::SubnetPermissionedValidatorPending
                | Priority::SubnetPermissionlessValidatorPending
                | Priority::PrimaryNetworkValidatorPending
        )
    }

    pub fn is_delegator(self) -> bool {
        !self.is_validator()
    }

    pub fn is_current(self) -> bool {
        matches!(
            self,
            Priority::SubnetPermissionedValidatorCurrent
                | Priority::SubnetPermissionlessValidatorCurrent
                | Priority::PrimaryNetworkValidatorCurrent
                | Priority::SubnetPermissionlessDelegatorCurrent
                | Priority::PrimaryNetworkDelegatorCurrent
        )
    }

    pub fn is_pending(self) -> bool {
        !self.is_current()
    }

    /// Stable byte used in persisted sort keys.
    pub fn class_byte(self) -> u8 {
        self as u8
    }

    pub fn from_class_byte(byte: u8) -> Result<Self> {
        Ok(match byte {
            0 => Priority::SubnetPermissionedValidatorCurrent,
            1 => Priority::SubnetPermissionlessValidatorCurrent,
            2 => Priority::PrimaryNetworkValidatorCurrent,
            3 => Priority::SubnetPermissionlessDelegatorCurrent,
            4 => Priority::PrimaryNetworkDelegatorCurrent,
            5 => Priority::SubnetPermissionedValidatorPending,
            6 => Priority::SubnetPermissionlessValidatorPending,
            7 => Priority::PrimaryNetworkValidatorPending,
            8 => Priority::SubnetPermissionlessDelegatorPending,
            9 => Priority::PrimaryNetworkDelegatorPending,
            other => {
                return Err(StateError::Corruption(format!(
                    "unknown priority class byte {other}"
                )))
            }
        })
    }
}

/// Sort key of the ordered staker indexes: next event time first, then the
/// transaction id as the tie breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StakerKey {
    pub next_time: u64,
    pub tx_id: TxId,
}

/// Identity of a validator slot inside one subnet.
pub type ValidatorKey = (SubnetId, NodeId);

/// One validator or delegator instance.
///
/// Timestamps are second-precision unix UTC. `next_time` is the next moment
/// the scheduler must revisit this staker and starts out equal to
/// `end_time`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staker {
    pub tx_id: TxId,
    pub node_id: NodeId,
    pub subnet_id: SubnetId,
    pub priority: Priority,
    pub weight: u64,
    pub start_time: u64,
    pub end_time: u64,
    pub next_time: u64,
    pub reward_credentials: Vec<u8>,
}

impl Staker {
    /// Build a validated staker whose next event is its end time.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx_id: TxId,
        node_id: NodeId,
        subnet_id: SubnetId,
        priority: Priority,
        weight: u64,
        start_time: u64,
        end_time: u64,
        reward_credentials: Vec<u8>,
    ) -> Result<Self> {
        let staker = Staker {
            tx_id,
            node_id,
            subnet_id,
            priority,
            weight,
            start_time,
            end_time,
            next_time: end_time,
            reward_credentials,
        };
        staker.validate()?;
        Ok(staker)
    }

    pub fn validate(&self) -> Result<()> {
        if self.end_time <= self.start_time {
            return Err(StateError::InvalidStaker(format!(
                "end time {} not after start time {}",
                self.end_time, self.start_time
            )));
        }
        if self.weight == 0 {
            return Err(StateError::InvalidStaker("zero weight".into()));
        }
        if self.next_time < self.start_time {
            return Err(StateError::InvalidStaker(format!(
                "next event time {} before start time {}",
                self.next_time, self.start_time
            )));
        }
        Ok(())
    }

    pub fn staking_period(&self) -> u64 {
        self.end_time - self.start_time
    }

    pub fn sort_key(&self) -> StakerKey {
        StakerKey {
            next_time: self.next_time,
            tx_id: self.tx_id,
        }
    }

    pub fn validator_key(&self) -> ValidatorKey {
        (self.subnet_id, self.node_id)
    }

    /// True when the identity fields match: same transaction, node, subnet
    /// and priority. Updates must preserve all four.
    pub fn same_identity(&self, other: &Staker) -> bool {
        self.tx_id == other.tx_id
            && self.node_id == other.node_id
            && self.subnet_id == other.subnet_id
            && self.priority == other.priority
    }

    /// Slide the staking window forward so the next event lands at
    /// `new_next_time`, preserving the staking period.
    pub fn shift_ahead(&mut self, new_next_time: u64) {
        let period = self.staking_period();
        self.start_time = new_next_time;
        self.end_time = new_next_time + period;
        self.next_time = self.end_time;
    }

    /// Replace the staking period: the end moves to `start + period` and the
    /// next event follows it.
    pub fn update_staking_period(&mut self, period: u64) {
        self.end_time = self.start_time + period;
        self.next_time = self.end_time;
    }

    pub fn increase_weight(&mut self, new_weight: u64) {
        self.weight = new_weight;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(tx_byte: u8, start: u64, end: u64) -> Staker {
        Staker::new(
            TxId::from_bytes([tx_byte; 32]),
            NodeId::from_bytes([0xaa; 20]),
            SubnetId::PRIMARY_NETWORK,
            Priority::PrimaryNetworkValidatorCurrent,
            1_000,
            start,
            end,
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn new_staker_next_time_is_end_time() {
        let staker = sample(1, 100, 200);
        assert_eq!(staker.next_time, 200);
        assert_eq!(staker.staking_period(), 100);
    }

    #[test]
    fn schema_violations_are_rejected() {
        assert!(matches!(
            Staker::new(
                TxId::default(),
                NodeId::default(),
                SubnetId::PRIMARY_NETWORK,
                Priority::PrimaryNetworkValidatorCurrent,
                1,
                200,
                200,
                vec![],
            ),
            Err(StateError::InvalidStaker(_))
        ));
        assert!(matches!(
            Staker::new(
                TxId::default(),
                NodeId::default(),
                SubnetId::PRIMARY_NETWORK,
                Priority::PrimaryNetworkValidatorCurrent,
                0,
                100,
                200,
                vec![],
            ),
            Err(StateError::InvalidStaker(_))
        ));
    }

    #[test]
    fn shift_ahead_preserves_period() {
        let mut staker = sample(1, 100, 200);
        staker.shift_ahead(staker.next_time);
        assert_eq!(staker.start_time, 200);
        assert_eq!(staker.end_time, 300);
        assert_eq!(staker.next_time, 300);
        assert_eq!(staker.staking_period(), 100);
    }

    #[test]
    fn update_staking_period_moves_end_and_next() {
        let mut staker = sample(1, 100, 200);
        staker.update_staking_period(50);
        assert_eq!(staker.end_time, 150);
        assert_eq!(staker.next_time, 150);
        staker.validate().unwrap();
    }

    #[test]
    fn sort_keys_order_by_time_then_tx() {
        let early = sample(9, 100, 200);
        let late = sample(1, 100, 300);
        let tie = sample(2, 100, 200);
        assert!(early.sort_key() < late.sort_key());
        // equal next_time falls back to byte order of the tx id
        assert!(tie.sort_key() < early.sort_key());
    }

    #[test]
    fn priority_class_bytes_roundtrip() {
        for byte in 0u8..10 {
            let priority = Priority::from_class_byte(byte).unwrap();
            assert_eq!(priority.class_byte(), byte);
        }
        assert!(Priority::from_class_byte(10).is_err());
    }

    #[test]
    fn priority_role_helpers() {
        assert!(Priority::PrimaryNetworkValidatorCurrent.is_validator());
        assert!(Priority::PrimaryNetworkValidatorCurrent.is_current());
        assert!(Priority::PrimaryNetworkDelegatorPending.is_delegator());
        assert!(Priority::PrimaryNetworkDelegatorPending.is_pending());
    }
}
