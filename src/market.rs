//! Market configuration and state.
//!
//! A market is one synthetic pair priced off an oracle feed. There is no order
//! book: the market only tracks aggregate size and skew, the funding and
//! utilization accumulators, and the liquidation rate limiter.

use crate::config::ConfigError;
use crate::funding::{FundingSnapshot, FundingState, UtilizationParams, UtilizationState};
use crate::liquidation::LiquidationWindow;
use crate::position::Position;
use crate::types::{FeedId, MarketId, Price, Side, SignedSize, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Per-market risk parameters. Written by the protocol owner, never destroyed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketConfig {
    pub id: MarketId,
    /// Human-readable name (e.g., "ETH-PERP")
    pub name: String,
    pub price_feed_id: FeedId,
    /// Skew at which the fill premium reaches 100%. Zero disables impact and funding.
    pub skew_scale: Decimal,
    /// Max daily change of the funding rate
    pub max_funding_velocity: Decimal,
    pub maker_fee: Decimal,
    pub taker_fee: Decimal,
    /// Max open interest per side, in base units
    pub max_market_size: Decimal,
    pub max_leverage: Decimal,
    pub initial_margin_fraction: Decimal,
    /// Extra initial margin per unit of size / skew scale
    pub incremental_margin_scalar: Decimal,
    pub max_initial_margin_fraction: Decimal,
    /// Maintenance fraction = initial fraction × this
    pub maintenance_margin_scalar: Decimal,
    pub min_position_margin_usd: Decimal,
    pub liquidation_reward_ratio: Decimal,
    pub liquidation_limit_scalar: Decimal,
    pub max_seconds_in_liquidation_window: u64,
    /// Max relative distance between a settlement report and the index price
    pub price_divergence_percent: Decimal,
    pub min_order_age_secs: u64,
    pub max_order_age_secs: u64,
    pub utilization: UtilizationParams,
}

impl MarketConfig {
    pub fn eth_perp() -> Self {
        Self {
            id: MarketId(1),
            name: "ETH-PERP".to_string(),
            price_feed_id: FeedId::new("ETH/USD"),
            skew_scale: dec!(25_000),
            max_funding_velocity: dec!(9),
            maker_fee: dec!(0.0002),
            taker_fee: dec!(0.0006),
            max_market_size: dec!(100_000),
            max_leverage: dec!(100),
            initial_margin_fraction: dec!(0.02),
            incremental_margin_scalar: dec!(1),
            max_initial_margin_fraction: dec!(0.5),
            maintenance_margin_scalar: dec!(0.5),
            min_position_margin_usd: dec!(50),
            liquidation_reward_ratio: dec!(0.0001),
            liquidation_limit_scalar: dec!(1),
            max_seconds_in_liquidation_window: 30,
            price_divergence_percent: dec!(0.02),
            min_order_age_secs: 8,
            max_order_age_secs: 60,
            utilization: UtilizationParams::default(),
        }
    }

    pub fn btc_perp() -> Self {
        Self {
            id: MarketId(2),
            name: "BTC-PERP".to_string(),
            price_feed_id: FeedId::new("BTC/USD"),
            skew_scale: dec!(1_000),
            max_market_size: dec!(5_000),
            ..Self::eth_perp()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidMarket {
            reason: format!("{}: {}", self.name, reason),
        };

        if self.skew_scale < Decimal::ZERO {
            return Err(invalid("skew scale is negative"));
        }
        if self.max_funding_velocity < Decimal::ZERO {
            return Err(invalid("max funding velocity is negative"));
        }
        for fee in [self.maker_fee, self.taker_fee] {
            if fee < Decimal::ZERO || fee >= Decimal::ONE {
                return Err(invalid("fees must be in [0, 1)"));
            }
        }
        if self.max_market_size < Decimal::ZERO {
            return Err(invalid("max market size is negative"));
        }
        if self.max_leverage <= Decimal::ZERO {
            return Err(invalid("max leverage must be positive"));
        }
        if self.initial_margin_fraction <= Decimal::ZERO
            || self.max_initial_margin_fraction < self.initial_margin_fraction
            || self.max_initial_margin_fraction > Decimal::ONE
        {
            return Err(invalid("initial margin fractions must satisfy 0 < base <= max <= 1"));
        }
        if self.incremental_margin_scalar < Decimal::ZERO {
            return Err(invalid("incremental margin scalar is negative"));
        }
        if self.maintenance_margin_scalar <= Decimal::ZERO || self.maintenance_margin_scalar > Decimal::ONE {
            return Err(invalid("maintenance margin scalar must be in (0, 1]"));
        }
        if self.min_position_margin_usd < Decimal::ZERO
            || self.liquidation_reward_ratio < Decimal::ZERO
            || self.liquidation_limit_scalar < Decimal::ZERO
        {
            return Err(invalid("margin floor and liquidation parameters must be non-negative"));
        }
        if self.price_divergence_percent <= Decimal::ZERO {
            return Err(invalid("price divergence tolerance must be positive"));
        }
        if self.min_order_age_secs >= self.max_order_age_secs {
            return Err(invalid("min order age must be below max order age"));
        }
        Ok(())
    }
}

/// Running sums that let the market value every open position at once.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DebtCorrection {
    pub size_times_entry_price: Decimal,
    pub size_times_entry_funding: Decimal,
    pub abs_size_times_entry_utilization: Decimal,
}

/// Dynamic market state.
#[derive(Debug, Clone)]
pub struct MarketState {
    pub config: MarketConfig,
    /// Σ |position size|
    pub size: Decimal,
    /// Σ position size
    pub skew: SignedSize,
    pub funding: FundingState,
    pub utilization: UtilizationState,
    pub liquidation_window: LiquidationWindow,
    pub debt_correction: DebtCorrection,
    /// Σ debt of the margin accounts in this market
    pub total_trader_debt: Decimal,
    pub created_at: Timestamp,
}

impl MarketState {
    pub fn new(config: MarketConfig, timestamp: Timestamp) -> Self {
        Self {
            config,
            size: Decimal::ZERO,
            skew: SignedSize::zero(),
            funding: FundingState::new(timestamp),
            utilization: UtilizationState::new(timestamp),
            liquidation_window: LiquidationWindow::default(),
            debt_correction: DebtCorrection::default(),
            total_trader_debt: Decimal::ZERO,
            created_at: timestamp,
        }
    }

    pub fn long_open_interest(&self) -> Decimal {
        (self.size + self.skew.value()) / dec!(2)
    }

    pub fn short_open_interest(&self) -> Decimal {
        (self.size - self.skew.value()) / dec!(2)
    }

    /// Funding as of `now` under the current skew, without persisting it.
    pub fn project_funding(&self, price: Price, now: Timestamp) -> FundingSnapshot {
        self.funding.project(
            self.skew,
            self.config.skew_scale,
            self.config.max_funding_velocity,
            price,
            now,
        )
    }

    /// Checkpoints funding with the velocity of the skew in place right now.
    /// Must run before anything changes the skew.
    pub fn recompute_funding(&mut self, price: Price, now: Timestamp) -> FundingSnapshot {
        let snapshot = self.project_funding(price, now);
        self.funding.checkpoint(&snapshot, now);
        snapshot
    }

    /// Swaps one position's contribution for another in size, skew and the debt sums.
    pub fn apply_position_change(&mut self, old: Option<&Position>, new: Option<&Position>) {
        if let Some(position) = old {
            self.remove_contribution(position);
        }
        if let Some(position) = new {
            self.add_contribution(position);
        }
    }

    fn add_contribution(&mut self, position: &Position) {
        let size = position.size.value();
        self.size += size.abs();
        self.skew = self.skew.add(size);
        self.debt_correction.size_times_entry_price += size * position.entry_price.value();
        self.debt_correction.size_times_entry_funding += size * position.entry_funding_accrued;
        self.debt_correction.abs_size_times_entry_utilization += size.abs() * position.entry_utilization_accrued;
    }

    fn remove_contribution(&mut self, position: &Position) {
        let size = position.size.value();
        self.size -= size.abs();
        self.skew = self.skew.add(-size);
        self.debt_correction.size_times_entry_price -= size * position.entry_price.value();
        self.debt_correction.size_times_entry_funding -= size * position.entry_funding_accrued;
        self.debt_correction.abs_size_times_entry_utilization -= size.abs() * position.entry_utilization_accrued;
    }

    /// Returns the side and its new open interest when replacing `old` with `new`
    /// pushes a growing side past `max_market_size`.
    pub fn exceeds_max_market_size(&self, old: SignedSize, new: SignedSize) -> Option<(Side, Decimal)> {
        let long_before = self.long_open_interest();
        let short_before = self.short_open_interest();
        let long_after = long_before - old.value().max(Decimal::ZERO) + new.value().max(Decimal::ZERO);
        let short_after = short_before - (-old.value()).max(Decimal::ZERO) + (-new.value()).max(Decimal::ZERO);

        let max = self.config.max_market_size;
        if long_after > max && long_after > long_before {
            return Some((Side::Long, long_after));
        }
        if short_after > max && short_after > short_before {
            return Some((Side::Short, short_after));
        }
        None
    }

    /// Unrealized pnl + funding − utilization of every open position, in usd.
    pub fn aggregate_unrealized(&self, price: Price, funding_value: Decimal, utilization_accrued: Decimal) -> Decimal {
        let skew = self.skew.value();
        let pnl = skew * price.value() - self.debt_correction.size_times_entry_price;
        let funding = skew * funding_value - self.debt_correction.size_times_entry_funding;
        let utilization = self.size * utilization_accrued - self.debt_correction.abs_size_times_entry_utilization;
        pnl + funding - utilization
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccountId, MarketId};
    use rust_decimal_macros::dec;

    fn position(size: Decimal, entry: Decimal) -> Position {
        Position::open(
            AccountId(1),
            MarketId(1),
            SignedSize::new(size),
            Price::new_unchecked(entry),
            Decimal::ZERO,
            Decimal::ZERO,
            Timestamp::from_secs(0),
        )
    }

    #[test]
    fn presets_validate() {
        assert!(MarketConfig::eth_perp().validate().is_ok());
        assert!(MarketConfig::btc_perp().validate().is_ok());
        assert_eq!(MarketConfig::btc_perp().name, "BTC-PERP");
    }

    #[test]
    fn inverted_order_ages_rejected() {
        let mut config = MarketConfig::eth_perp();
        config.min_order_age_secs = 60;
        config.max_order_age_secs = 60;
        assert!(matches!(config.validate(), Err(ConfigError::InvalidMarket { .. })));
    }

    #[test]
    fn max_imr_below_base_rejected() {
        let mut config = MarketConfig::eth_perp();
        config.max_initial_margin_fraction = dec!(0.01);
        assert!(config.validate().is_err());
    }

    #[test]
    fn open_interest_follows_positions() {
        let mut state = MarketState::new(MarketConfig::eth_perp(), Timestamp::from_secs(0));
        let long = position(dec!(10), dec!(1000));
        let short = position(dec!(-4), dec!(1000));
        state.apply_position_change(None, Some(&long));
        state.apply_position_change(None, Some(&short));

        assert_eq!(state.size, dec!(14));
        assert_eq!(state.skew.value(), dec!(6));
        assert_eq!(state.long_open_interest(), dec!(10));
        assert_eq!(state.short_open_interest(), dec!(4));

        state.apply_position_change(Some(&long), None);
        assert_eq!(state.skew.value(), dec!(-4));
        assert_eq!(state.debt_correction.size_times_entry_price, dec!(-4000));
    }

    #[test]
    fn aggregate_unrealized_matches_positions() {
        let mut state = MarketState::new(MarketConfig::eth_perp(), Timestamp::from_secs(0));
        state.apply_position_change(None, Some(&position(dec!(10), dec!(1000))));
        state.apply_position_change(None, Some(&position(dec!(-5), dec!(1100))));

        // long +10 × 100, short −5 × 0 at 1100
        let price = Price::new_unchecked(dec!(1100));
        assert_eq!(state.aggregate_unrealized(price, Decimal::ZERO, Decimal::ZERO), dec!(1000));
    }

    #[test]
    fn max_market_size_only_blocks_growth() {
        let mut config = MarketConfig::eth_perp();
        config.max_market_size = dec!(10);
        let mut state = MarketState::new(config, Timestamp::from_secs(0));
        state.apply_position_change(None, Some(&position(dec!(10), dec!(1000))));

        let blocked = state.exceeds_max_market_size(SignedSize::zero(), SignedSize::new(dec!(1)));
        assert_eq!(blocked, Some((Side::Long, dec!(11))));

        // shrinking the existing long is fine, and shorts have room
        assert!(state
            .exceeds_max_market_size(SignedSize::new(dec!(10)), SignedSize::new(dec!(5)))
            .is_none());
        assert!(state
            .exceeds_max_market_size(SignedSize::zero(), SignedSize::new(dec!(-10)))
            .is_none());
    }

    #[test]
    fn recompute_checkpoints_funding() {
        let mut state = MarketState::new(MarketConfig::eth_perp(), Timestamp::from_secs(0));
        state.apply_position_change(None, Some(&position(dec!(2500), dec!(1000))));
        let one_day = Timestamp::from_secs(86_400);
        let snapshot = state.recompute_funding(Price::new_unchecked(dec!(1000)), one_day);

        // 2500 / 25000 × 9 = 0.9 per day
        assert_eq!(snapshot.funding_velocity, dec!(0.9));
        assert_eq!(state.funding.last_funding_rate, dec!(0.9));
        assert_eq!(state.funding.last_funding_time, one_day);
    }
}
