//! Reward-credential calculator consumed by the store.
//!
//! The store never interprets the credential bytes, it only carries them on
//! the staker record. The default calculator interpolates a consumption
//! rate between the configured minimum and maximum by staking period and
//! encodes the resulting entitlement.

use serde::{Deserialize, Serialize};

use crate::config::{RewardConfig, PERCENT_DENOMINATOR};

/// Computes the opaque reward credentials attached to a staker record.
pub trait RewardCalculator: Send + Sync {
    fn calculate(&self, weight: u64, staking_period: u64, current_supply: u64) -> Vec<u8>;
}

/// Credential payload produced by [`ConsumptionRateCalculator`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardCredentials {
    pub amount: u64,
    pub consumption_rate: u64,
}

/// Linear consumption-rate schedule over the minting period.
#[derive(Clone, Debug)]
pub struct ConsumptionRateCalculator {
    config: RewardConfig,
}

impl ConsumptionRateCalculator {
    pub fn new(config: RewardConfig) -> Self {
        Self { config }
    }

    fn consumption_rate(&self, staking_period: u64) -> u64 {
        let period = staking_period.min(self.config.minting_period);
        if self.config.minting_period == 0 {
            return self.config.min_consumption_rate;
        }
        let span = self
            .config
            .max_consumption_rate
            .saturating_sub(self.config.min_consumption_rate);
        let scaled = (span as u128 * period as u128) / self.config.minting_period as u128;
        self.config.min_consumption_rate + scaled as u64
    }
}

impl RewardCalculator for ConsumptionRateCalculator {
    fn calculate(&self, weight: u64, staking_period: u64, current_supply: u64) -> Vec<u8> {
        let rate = self.consumption_rate(staking_period);
        let remaining = self.config.supply_cap.saturating_sub(current_supply);
        let yearly = (weight as u128 * rate as u128) / PERCENT_DENOMINATOR as u128;
        let prorated =
            (yearly * staking_period as u128) / self.config.minting_period.max(1) as u128;
        let amount = (prorated as u64).min(remaining);
        let credentials = RewardCredentials {
            amount,
            consumption_rate: rate,
        };
        bincode::serialize(&credentials).unwrap_or_default()
    }
}
