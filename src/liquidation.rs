//! Liquidation primitives.
//!
//! Positions are flagged once health ≤ 1 and then closed in chunks. How much
//! size may be force-closed is capped per market by a rate limiter so a
//! cascade cannot shock the skew all at once. Vaults are the coarse path:
//! a liquidator repays a vault's debt and takes a proportional share of its
//! collateral.

use crate::market::MarketConfig;
use crate::types::{Address, CollateralId, Price, Quote, Timestamp, VaultId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// 3.1: rate limiter. the accumulator only resets after a full window with no liquidations,
// so any span of `max_seconds_in_liquidation_window` closes at most `capacity`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidationWindow {
    pub last_liquidation_time: Option<Timestamp>,
    pub accumulated_liquidated_size: Decimal,
}

impl LiquidationWindow {
    /// Size closable per window. `None` when the market has no skew scale.
    pub fn capacity(config: &MarketConfig) -> Option<Decimal> {
        if config.skew_scale.is_zero() {
            return None;
        }
        Some((config.maker_fee + config.taker_fee) * config.skew_scale * config.liquidation_limit_scalar)
    }

    pub fn accumulated_at(&self, now: Timestamp, window_secs: u64) -> Decimal {
        match self.last_liquidation_time {
            Some(last) if now.millis_since(last) < window_secs as i64 * 1_000 => self.accumulated_liquidated_size,
            _ => Decimal::ZERO,
        }
    }

    pub fn remaining(&self, config: &MarketConfig, now: Timestamp) -> Option<Decimal> {
        Self::capacity(config).map(|cap| {
            (cap - self.accumulated_at(now, config.max_seconds_in_liquidation_window)).max(Decimal::ZERO)
        })
    }

    pub fn record(&mut self, size: Decimal, now: Timestamp, window_secs: u64) {
        self.accumulated_liquidated_size = self.accumulated_at(now, window_secs) + size;
        self.last_liquidation_time = Some(now);
    }
}

/// Size the next liquidation call may close.
pub fn liquidation_chunk(position_size: Decimal, remaining_capacity: Option<Decimal>) -> Decimal {
    match remaining_capacity {
        Some(capacity) => position_size.abs().min(capacity),
        None => position_size.abs(),
    }
}

/// Who flagged and when. Lives until the position is fully closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub flagger: Address,
    pub flagged_at: Timestamp,
    pub flagged_size: Decimal,
}

/// Rewards for one liquidation chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LiquidationRewards {
    // reward ratio × chunk notional
    pub flagger_reward: Quote,
    // keeper fee for the liquidation gas
    pub liquidator_reward: Quote,
}

impl LiquidationRewards {
    pub fn for_chunk(chunk_size: Decimal, price: Price, reward_ratio: Decimal, liquidator_fee: Quote) -> Self {
        Self {
            flagger_reward: Quote::new(chunk_size.abs() * price.value() * reward_ratio),
            liquidator_reward: liquidator_fee,
        }
    }

    pub fn total(&self) -> Quote {
        self.flagger_reward.add(self.liquidator_reward)
    }

    /// One payout per recipient. Same address gets the sum.
    pub fn payouts(&self, flagger: Address, liquidator: Address) -> Vec<(Address, Quote)> {
        if flagger == liquidator {
            return vec![(liquidator, self.total())];
        }
        vec![(flagger, self.flagger_reward), (liquidator, self.liquidator_reward)]
    }
}

// 3.2: vaults. pooled collateral backing market credit, with its own debt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vault {
    pub id: VaultId,
    pub collateral_id: CollateralId,
    pub collateral_amount: Decimal,
    pub debt_usd: Quote,
    /// Liquidatable when collateral value / debt falls below this
    pub liquidation_ratio: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VaultLiquidation {
    pub debt_repaid: Quote,
    pub collateral_seized: Decimal,
    pub collateralization_ratio: Decimal,
}

impl Vault {
    pub fn new(id: VaultId, collateral_id: CollateralId, liquidation_ratio: Decimal) -> Self {
        Self {
            id,
            collateral_id,
            collateral_amount: Decimal::ZERO,
            debt_usd: Quote::zero(),
            liquidation_ratio,
        }
    }

    pub fn collateralization_ratio(&self, collateral_price: Price) -> Option<Decimal> {
        if !self.debt_usd.is_positive() {
            return None;
        }
        Some(self.collateral_amount * collateral_price.value() / self.debt_usd.value())
    }

    // repay up to `max_usd` of debt for the same fraction of collateral
    pub fn liquidate(&self, collateral_price: Price, max_usd: Quote) -> Result<VaultLiquidation, VaultError> {
        let ratio = self.collateralization_ratio(collateral_price).ok_or(VaultError::NoDebt(self.id))?;
        if ratio >= self.liquidation_ratio {
            return Err(VaultError::Healthy {
                vault: self.id,
                collateralization_ratio: ratio,
                liquidation_ratio: self.liquidation_ratio,
            });
        }
        if !max_usd.is_positive() {
            return Err(VaultError::ZeroRepayment);
        }

        let repaid = max_usd.min(self.debt_usd);
        let seized = self.collateral_amount * repaid.value() / self.debt_usd.value();
        Ok(VaultLiquidation {
            debt_repaid: repaid,
            collateral_seized: seized,
            collateralization_ratio: ratio,
        })
    }

    pub fn apply(&mut self, outcome: &VaultLiquidation) {
        self.debt_usd = self.debt_usd.sub(outcome.debt_repaid);
        self.collateral_amount -= outcome.collateral_seized;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VaultError {
    #[error("Vault {0:?} has no debt")]
    NoDebt(VaultId),
    #[error("Vault {vault:?} is healthy: c-ratio {collateralization_ratio} ≥ {liquidation_ratio}")]
    Healthy {
        vault: VaultId,
        collateralization_ratio: Decimal,
        liquidation_ratio: Decimal,
    },
    #[error("Repayment must be positive")]
    ZeroRepayment,
}
