//! Property-based tests for the pricing, fee and margin math.
//!
//! These tests verify invariants hold under random inputs.

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skew_perps::*;

// Strategies for generating test data
fn price_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..1_000_000i64).prop_map(|x| Decimal::new(x, 2)) // $0.01 to $10,000
}

fn size_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..500_000i64).prop_map(|x| Decimal::new(x, 2)) // 0.01 to 5,000
}

fn skew_strategy() -> impl Strategy<Value = Decimal> {
    (-2_000_000i64..=2_000_000i64).prop_map(|x| Decimal::new(x, 2)) // ±20,000
}

fn delta_strategy() -> impl Strategy<Value = Decimal> {
    size_strategy().prop_flat_map(|size| prop_oneof![Just(size), Just(-size)])
}

fn px(value: Decimal) -> Price {
    Price::new_unchecked(value)
}

const SKEW_SCALE: Decimal = dec!(25_000);

proptest! {
    /// Trades that push skew up pay a premium, trades that pull it down get a discount
    #[test]
    fn fill_premium_follows_resulting_skew(
        skew in skew_strategy(),
        delta in delta_strategy(),
        price in price_strategy(),
    ) {
        let fill = fill_price(SignedSize::new(skew), SKEW_SCALE, delta, px(price));
        let average_skew = skew + delta / dec!(2);

        if average_skew > Decimal::ZERO {
            prop_assert!(fill.value() >= price);
        } else if average_skew < Decimal::ZERO {
            prop_assert!(fill.value() <= price);
        } else {
            prop_assert_eq!(fill.value(), price);
        }
    }

    /// Mirrored skew and trade fill symmetrically around the index
    #[test]
    fn fill_price_is_symmetric(
        skew in skew_strategy(),
        delta in (1i64..100_000i64).prop_map(|x| Decimal::new(x, 2)),
        price in price_strategy(),
    ) {
        let buy = fill_price(SignedSize::new(skew), SKEW_SCALE, delta, px(price));
        let sell = fill_price(SignedSize::new(-skew), SKEW_SCALE, -delta, px(price));
        let drift = (buy.value() + sell.value() - price * dec!(2)).abs();
        prop_assert!(drift < dec!(0.000001), "drift {}", drift);
    }

    /// Zero skew scale disables price impact
    #[test]
    fn no_impact_without_skew_scale(
        skew in skew_strategy(),
        delta in delta_strategy(),
        price in price_strategy(),
    ) {
        let fill = fill_price(SignedSize::new(skew), Decimal::ZERO, delta, px(price));
        prop_assert_eq!(fill.value(), price);
    }

    /// Order fee sits between the all-maker and all-taker bounds
    #[test]
    fn order_fee_bounded_by_maker_and_taker(
        skew in skew_strategy(),
        delta in delta_strategy(),
        price in price_strategy(),
    ) {
        let fill = px(price);
        let fee = order_fee(SignedSize::new(skew), delta, fill, dec!(0.0002), dec!(0.0006));
        let notional = delta.abs() * price;

        prop_assert!(fee.value() >= notional * dec!(0.0002));
        prop_assert!(fee.value() <= notional * dec!(0.0006));
    }

    /// Trades on the heavy side of the skew are pure taker flow
    #[test]
    fn skew_expanding_trades_pay_taker(
        skew in (0i64..2_000_000i64).prop_map(|x| Decimal::new(x, 2)),
        size in size_strategy(),
        price in price_strategy(),
    ) {
        let fee = order_fee(SignedSize::new(skew), size, px(price), dec!(0.0002), dec!(0.0006));
        prop_assert_eq!(fee.value(), size * price * dec!(0.0006));
    }

    /// Maintenance requirement stays below initial for any size
    #[test]
    fn maintenance_less_than_initial(
        size in delta_strategy(),
        price in price_strategy(),
    ) {
        let config = MarketConfig::eth_perp();
        let requirement = margin_requirement(SignedSize::new(size), px(price), &config);

        prop_assert!(requirement.maintenance < requirement.initial);
        prop_assert!(requirement.initial_margin_fraction <= config.max_initial_margin_fraction);
        prop_assert!(requirement.initial_margin_fraction >= config.initial_margin_fraction);
        prop_assert!(requirement.maintenance.value() >= config.min_position_margin_usd);
    }

    /// Bigger positions never need a smaller margin fraction
    #[test]
    fn margin_fraction_grows_with_size(
        size in size_strategy(),
        extra in size_strategy(),
        price in price_strategy(),
    ) {
        let config = MarketConfig::eth_perp();
        let small = margin_requirement(SignedSize::new(size), px(price), &config);
        let large = margin_requirement(SignedSize::new(size + extra), px(price), &config);
        prop_assert!(large.initial_margin_fraction >= small.initial_margin_fraction);
    }

    /// PnL is zero when price = entry and funding has not moved
    #[test]
    fn accruals_zero_at_entry(
        size in delta_strategy(),
        entry in price_strategy(),
        funding in -1_000i64..1_000i64,
    ) {
        let funding = Decimal::new(funding, 2);
        let position = Position::open(
            AccountId(1),
            MarketId(1),
            SignedSize::new(size),
            px(entry),
            funding,
            Decimal::ZERO,
            Timestamp::from_secs(0),
        );
        let accruals = position.accruals(px(entry), funding, Decimal::ZERO);
        prop_assert_eq!(accruals.net(), Quote::zero());
    }

    /// Closing a position realizes exactly its accruals and leaves nothing behind
    #[test]
    fn full_close_realizes_everything(
        size in delta_strategy(),
        entry in price_strategy(),
        exit in price_strategy(),
    ) {
        let position = Position::open(
            AccountId(1),
            MarketId(1),
            SignedSize::new(size),
            px(entry),
            Decimal::ZERO,
            Decimal::ZERO,
            Timestamp::from_secs(0),
        );
        let update = apply_fill(
            Some(&position),
            AccountId(1),
            MarketId(1),
            -size,
            px(exit),
            Decimal::ZERO,
            Decimal::ZERO,
            Timestamp::from_secs(1),
        );
        prop_assert!(update.new_position.is_none());
        prop_assert_eq!(update.realized.pnl.value(), size * (exit - entry));
    }

    /// Funding velocity never exceeds the configured max
    #[test]
    fn funding_velocity_bounded(skew in skew_strategy()) {
        let velocity = funding_velocity(SignedSize::new(skew * dec!(10)), SKEW_SCALE, dec!(9));
        prop_assert!(velocity.abs() <= dec!(9));
        prop_assert_eq!(velocity > Decimal::ZERO, skew > Decimal::ZERO);
        prop_assert_eq!(velocity < Decimal::ZERO, skew < Decimal::ZERO);
    }

    /// A zero-length interval accrues no funding
    #[test]
    fn no_funding_without_elapsed_time(
        rate in -1_000i64..1_000i64,
        price in price_strategy(),
    ) {
        let rate = Decimal::new(rate, 4);
        prop_assert_eq!(unrecorded_funding(rate, rate, Decimal::ZERO, px(price)), Decimal::ZERO);
    }

    /// Utilization rate is non-decreasing in utilization
    #[test]
    fn utilization_rate_monotone(a in 0i64..=10_000i64, b in 0i64..=10_000i64) {
        let params = UtilizationParams::default();
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        let low = utilization_rate(Decimal::new(low, 4), &params);
        let high = utilization_rate(Decimal::new(high, 4), &params);
        prop_assert!(low <= high);
    }

    /// Keeper fee stays inside its bounds whatever gas costs
    #[test]
    fn keeper_fee_bounded(
        gwei in 0i64..100_000i64,
        eth in price_strategy(),
        buffer in 0i64..1_000_000i64,
    ) {
        let config = KeeperFeeConfig::default();
        for action in [KeeperAction::Settle, KeeperAction::Cancel, KeeperAction::Liquidate] {
            let fee = keeper_fee(&config, action, Decimal::from(gwei), px(eth), Quote::new(Decimal::new(buffer, 2)));
            prop_assert!(fee.value() >= config.min_keeper_fee_usd);
            prop_assert!(fee.value() <= config.max_keeper_fee_usd);
        }
    }

    /// Any span of one window length closes at most the window capacity
    #[test]
    fn liquidation_window_bounds_every_span(
        steps in prop::collection::vec((0u64..45u64, 1i64..3_000i64), 1..40),
    ) {
        let config = MarketConfig::eth_perp();
        let capacity = LiquidationWindow::capacity(&config).unwrap();
        let window_ms = config.max_seconds_in_liquidation_window as i64 * 1_000;

        let mut window = LiquidationWindow::default();
        let mut now = Timestamp::from_secs(1_000);
        let mut history: Vec<(i64, Decimal)> = Vec::new();
        for (gap, wanted) in steps {
            now = now.plus_secs(gap);
            let chunk = liquidation_chunk(Decimal::new(wanted, 2), window.remaining(&config, now));
            if chunk.is_zero() {
                continue;
            }
            window.record(chunk, now, config.max_seconds_in_liquidation_window);
            history.push((now.as_millis(), chunk));
        }

        for (start, _) in &history {
            let span: Decimal = history
                .iter()
                .filter(|(t, _)| *t >= *start && *t < *start + window_ms)
                .map(|(_, size)| *size)
                .sum();
            prop_assert!(span <= capacity, "span {} exceeds {}", span, capacity);
        }
    }
}

mod extremes {
    use super::*;

    #[test]
    fn absurd_sell_fills_at_a_positive_price() {
        let fill = fill_price(SignedSize::zero(), SKEW_SCALE, dec!(-1_000_000), px(dec!(1000)));
        assert!(fill.value() > Decimal::ZERO);
    }

    #[test]
    fn margin_fraction_caps_for_huge_positions() {
        let config = MarketConfig::eth_perp();
        let requirement = margin_requirement(SignedSize::new(dec!(1_000_000)), px(dec!(1000)), &config);
        assert_eq!(requirement.initial_margin_fraction, config.max_initial_margin_fraction);
    }

    #[test]
    fn flat_position_needs_no_margin() {
        let config = MarketConfig::eth_perp();
        let requirement = margin_requirement(SignedSize::zero(), px(dec!(1000)), &config);
        assert_eq!(requirement, MarginRequirement::default());
    }

    #[test]
    fn funding_accumulates_over_a_year_without_overflow() {
        let mut state = FundingState::new(Timestamp::from_secs(0));
        let mut now = Timestamp::from_secs(0);
        for _ in 0..365 {
            now = now.plus_secs(86_400);
            let snapshot = state.project(SignedSize::new(dec!(25_000)), SKEW_SCALE, dec!(9), px(dec!(1000)), now);
            state.checkpoint(&snapshot, now);
        }
        // full skew for a year: rate climbs by 9 per day
        assert_eq!(state.last_funding_rate, dec!(3285));
        assert!(state.last_funding_value < Decimal::ZERO);
    }
}
