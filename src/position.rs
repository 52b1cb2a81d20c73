// 4.0: open position tracking. pnl = size * (price - entry), funding and utilization off the market accumulators.
// 4.1 accruals, 4.2 margin requirements, 4.3 fills. every fill realizes everything and re-bases the entry.

use crate::market::MarketConfig;
use crate::types::{AccountId, MarketId, Price, Quote, Side, SignedSize, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size: SignedSize,
    pub entry_price: Price,
    pub entry_funding_accrued: Decimal,
    pub entry_utilization_accrued: Decimal,
    pub opened_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Unrealized value of a position, split by source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PositionAccruals {
    pub pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
}

impl PositionAccruals {
    // utilization is always a charge
    pub fn net(&self) -> Quote {
        self.pnl.add(self.accrued_funding).sub(self.accrued_utilization)
    }
}

impl Position {
    pub fn open(
        account_id: AccountId,
        market_id: MarketId,
        size: SignedSize,
        entry_price: Price,
        funding_value: Decimal,
        utilization_accrued: Decimal,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            account_id,
            market_id,
            size,
            entry_price,
            entry_funding_accrued: funding_value,
            entry_utilization_accrued: utilization_accrued,
            opened_at: timestamp,
            updated_at: timestamp,
        }
    }

    pub fn side(&self) -> Option<Side> {
        self.size.side()
    }

    // 4.1: paper gains/losses based on current price
    pub fn unrealized_pnl(&self, price: Price) -> Quote {
        Quote::new(self.size.value() * (price.value() - self.entry_price.value()))
    }

    pub fn accrued_funding(&self, funding_value: Decimal) -> Quote {
        Quote::new(self.size.value() * (funding_value - self.entry_funding_accrued))
    }

    pub fn accrued_utilization(&self, utilization_accrued: Decimal) -> Quote {
        Quote::new(self.size.abs() * (utilization_accrued - self.entry_utilization_accrued))
    }

    pub fn accruals(&self, price: Price, funding_value: Decimal, utilization_accrued: Decimal) -> PositionAccruals {
        PositionAccruals {
            pnl: self.unrealized_pnl(price),
            accrued_funding: self.accrued_funding(funding_value),
            accrued_utilization: self.accrued_utilization(utilization_accrued),
        }
    }

    pub fn notional_value(&self, price: Price) -> Quote {
        Quote::new(self.size.abs() * price.value())
    }
}

/// Margin a position needs at a given price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MarginRequirement {
    pub initial_margin_fraction: Decimal,
    pub maintenance_margin_fraction: Decimal,
    pub initial: Quote,
    pub maintenance: Quote,
    pub liquidation_reward: Quote,
}

// 4.2: tiered margin. the fraction grows with size relative to skew scale, capped at the max fraction.
// maintenance includes the liquidation reward so a position is flagged while it can still pay it.
pub fn margin_requirement(size: SignedSize, price: Price, config: &MarketConfig) -> MarginRequirement {
    if size.is_zero() {
        return MarginRequirement::default();
    }

    let imr = if config.skew_scale.is_zero() {
        config.initial_margin_fraction
    } else {
        let tiered =
            config.initial_margin_fraction + size.abs() / config.skew_scale * config.incremental_margin_scalar;
        tiered.min(config.max_initial_margin_fraction)
    };
    let mmr = imr * config.maintenance_margin_scalar;

    let notional = size.abs() * price.value();
    let liquidation_reward = notional * config.liquidation_reward_ratio;
    let floor = config.min_position_margin_usd;

    MarginRequirement {
        initial_margin_fraction: imr,
        maintenance_margin_fraction: mmr,
        initial: Quote::new(notional * imr + floor),
        maintenance: Quote::new(notional * mmr + floor + liquidation_reward),
        liquidation_reward: Quote::new(liquidation_reward),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionUpdate {
    /// Accruals of the previous position, valued at the fill price
    pub realized: PositionAccruals,
    pub new_position: Option<Position>,
}

// 4.3: settle a fill against the previous position. all of its accruals are realized at the fill price
// and whatever size remains is re-entered at that price with fresh accumulators.
#[allow(clippy::too_many_arguments)]
pub fn apply_fill(
    previous: Option<&Position>,
    account_id: AccountId,
    market_id: MarketId,
    size_delta: Decimal,
    fill_price: Price,
    funding_value: Decimal,
    utilization_accrued: Decimal,
    timestamp: Timestamp,
) -> PositionUpdate {
    let old_size = previous.map(|p| p.size).unwrap_or_default();
    let new_size = old_size.add(size_delta);

    let realized = previous
        .map(|p| p.accruals(fill_price, funding_value, utilization_accrued))
        .unwrap_or_default();

    if new_size.is_zero() {
        return PositionUpdate {
            realized,
            new_position: None,
        };
    }

    let opened_at = match previous {
        Some(p) if p.size.same_side(new_size) => p.opened_at,
        _ => timestamp,
    };

    PositionUpdate {
        realized,
        new_position: Some(Position {
            account_id,
            market_id,
            size: new_size,
            entry_price: fill_price,
            entry_funding_accrued: funding_value,
            entry_utilization_accrued: utilization_accrued,
            opened_at,
            updated_at: timestamp,
        }),
    }
}

/// True when the trade grows exposure or flips the side.
pub fn is_increasing(old_size: SignedSize, new_size: SignedSize) -> bool {
    if new_size.is_zero() {
        return false;
    }
    old_size.is_zero() || !old_size.same_side(new_size) || new_size.abs() > old_size.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn px(v: Decimal) -> Price {
        Price::new_unchecked(v)
    }

    fn long_ten() -> Position {
        Position::open(
            AccountId(1),
            MarketId(1),
            SignedSize::new(dec!(10)),
            px(dec!(1000)),
            dec!(5),
            dec!(1),
            Timestamp::from_secs(0),
        )
    }

    #[test]
    fn accruals_split_by_source() {
        let position = long_ten();
        let accruals = position.accruals(px(dec!(1100)), dec!(3), dec!(1.5));

        assert_eq!(accruals.pnl.value(), dec!(1000));
        // funding value fell by 2 per unit: the long paid
        assert_eq!(accruals.accrued_funding.value(), dec!(-20));
        assert_eq!(accruals.accrued_utilization.value(), dec!(5));
        assert_eq!(accruals.net().value(), dec!(975));
    }

    #[test]
    fn short_profits_when_price_falls() {
        let mut position = long_ten();
        position.size = SignedSize::new(dec!(-10));
        assert_eq!(position.unrealized_pnl(px(dec!(900))).value(), dec!(1000));
    }

    #[test]
    fn margin_requirement_tiers_with_size() {
        let mut config = MarketConfig::eth_perp();
        config.min_position_margin_usd = Decimal::ZERO;
        config.liquidation_reward_ratio = Decimal::ZERO;

        // 250 / 25000 × 1 = 0.01 extra on top of 0.02
        let req = margin_requirement(SignedSize::new(dec!(250)), px(dec!(1000)), &config);
        assert_eq!(req.initial_margin_fraction, dec!(0.03));
        assert_eq!(req.initial.value(), dec!(7500));
        assert_eq!(req.maintenance.value(), dec!(3750));

        // huge size hits the cap
        let req = margin_requirement(SignedSize::new(dec!(-100000)), px(dec!(1)), &config);
        assert_eq!(req.initial_margin_fraction, config.max_initial_margin_fraction);
    }

    #[test]
    fn maintenance_includes_reward_and_floor() {
        let config = MarketConfig::eth_perp();
        let req = margin_requirement(SignedSize::new(dec!(10)), px(dec!(1000)), &config);
        // notional 10000, reward 0.0001 × 10000 = 1, floor 50
        assert_eq!(req.liquidation_reward.value(), dec!(1));
        assert_eq!(req.maintenance.value(), req.maintenance_margin_fraction * dec!(10000) + dec!(51));
        assert_eq!(margin_requirement(SignedSize::zero(), px(dec!(1000)), &config), MarginRequirement::default());
    }

    #[test]
    fn fill_rebases_entry_and_realizes() {
        let previous = long_ten();
        let update = apply_fill(
            Some(&previous),
            AccountId(1),
            MarketId(1),
            dec!(-4),
            px(dec!(1200)),
            dec!(5),
            dec!(1),
            Timestamp::from_secs(10),
        );

        assert_eq!(update.realized.pnl.value(), dec!(2000));
        let position = update.new_position.unwrap();
        assert_eq!(position.size.value(), dec!(6));
        assert_eq!(position.entry_price.value(), dec!(1200));
        assert_eq!(position.opened_at, Timestamp::from_secs(0));
    }

    #[test]
    fn closing_fill_leaves_no_position() {
        let update = apply_fill(
            Some(&long_ten()),
            AccountId(1),
            MarketId(1),
            dec!(-10),
            px(dec!(900)),
            dec!(5),
            dec!(1),
            Timestamp::from_secs(10),
        );
        assert!(update.new_position.is_none());
        assert_eq!(update.realized.pnl.value(), dec!(-1000));
    }

    #[test]
    fn flip_resets_opened_at() {
        let update = apply_fill(
            Some(&long_ten()),
            AccountId(1),
            MarketId(1),
            dec!(-15),
            px(dec!(1000)),
            dec!(5),
            dec!(1),
            Timestamp::from_secs(10),
        );
        let position = update.new_position.unwrap();
        assert!(position.size.is_short());
        assert_eq!(position.opened_at, Timestamp::from_secs(10));
    }

    #[test]
    fn increasing_detection() {
        let ten = SignedSize::new(dec!(10));
        assert!(is_increasing(SignedSize::zero(), ten));
        assert!(is_increasing(ten, SignedSize::new(dec!(11))));
        assert!(is_increasing(ten, SignedSize::new(dec!(-1))));
        assert!(!is_increasing(ten, SignedSize::new(dec!(3))));
        assert!(!is_increasing(ten, SignedSize::zero()));
    }
}
