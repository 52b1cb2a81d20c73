//! Flagging, rate-limited liquidation and collateral seizure.

mod common;

use common::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skew_perps::*;

const ALICE: Address = Address(10);
const CAROL: Address = Address(12);

/// 50 ETH long on 3,000 of margin, flagged after a drop to 940.
fn flagged_whale(h: &mut Harness) -> AccountId {
    let alice = h.trader(ALICE, dec!(3_000));
    let opened = h.trade(ALICE, alice, dec!(50));
    assert_eq!(opened.fill_price.value(), dec!(1001));

    h.set_eth_price(dec!(940));
    h.engine.flag_position(KEEPER, alice, ETH).unwrap();
    alice
}

mod window {
    use super::*;

    #[test]
    fn capacity_follows_fees_and_skew_scale() {
        let h = Harness::new();
        // (0.0002 + 0.0006) × 25,000 × 1
        assert_eq!(h.engine.get_liquidation_capacity(ETH).unwrap(), Some(dec!(20)));
        assert_eq!(
            h.engine.get_remaining_liquidatable_size_capacity(ETH).unwrap(),
            Some(dec!(20))
        );
    }

    #[test]
    fn large_position_closes_in_window_sized_chunks() {
        let mut h = Harness::new();
        let alice = flagged_whale(&mut h);

        let first = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        assert_eq!(first.liquidated_size, dec!(20));
        assert_eq!(first.remaining_size.value(), dec!(30));
        assert!(!first.fully_liquidated);
        assert!(h.engine.ledger().is_flagged(alice, ETH));
        assert_eq!(
            h.engine.get_remaining_liquidatable_size_capacity(ETH).unwrap(),
            Some(Decimal::ZERO)
        );

        let err = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap_err();
        assert_eq!(err, EngineError::LiquidationCapacityExhausted(ETH));
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert!(err.is_retryable());

        h.engine.advance_secs(29);
        let err = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap_err();
        assert_eq!(err, EngineError::LiquidationCapacityExhausted(ETH));

        h.engine.advance_secs(1);
        let second = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        assert_eq!(second.liquidated_size, dec!(20));
        assert_eq!(second.remaining_size.value(), dec!(10));

        h.engine.advance_secs(30);
        let last = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        assert_eq!(last.liquidated_size, dec!(10));
        assert!(last.fully_liquidated);
        assert!(h.engine.get_position(alice, ETH).is_none());
        assert!(!h.engine.ledger().is_flagged(alice, ETH));
        assert!(h.skew(ETH).is_zero());
    }

    #[test]
    fn short_position_is_bought_back_towards_zero() {
        let mut h = Harness::new();
        let alice = h.trader(ALICE, dec!(3_000));
        let opened = h.trade(ALICE, alice, dec!(-50));
        assert_eq!(opened.fill_price.value(), dec!(999));

        h.set_eth_price(dec!(1_060));
        h.engine.flag_position(KEEPER, alice, ETH).unwrap();

        let first = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        assert_eq!(first.liquidated_size, dec!(20));
        assert_eq!(first.remaining_size.value(), dec!(-30));
        assert_eq!(h.skew(ETH), dec!(-30));

        h.engine.advance_secs(30);
        h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        h.engine.advance_secs(30);
        let last = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        assert!(last.fully_liquidated);
        assert!(h.skew(ETH).is_zero());
    }

    #[test]
    fn partial_chunks_pay_each_caller() {
        let mut h = Harness::new();
        let alice = flagged_whale(&mut h);

        let keeper_before = h.custody.balance_of(KEEPER, SUSD);
        let chunk = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
        // 20 × 940 × 0.0001
        assert_eq!(chunk.flagger_reward.value(), dec!(1.88));
        assert_eq!(
            h.custody.balance_of(KEEPER, SUSD) - keeper_before,
            chunk.flagger_reward.add(chunk.liquidator_reward).value()
        );
    }

    #[test]
    fn market_without_skew_scale_is_unlimited() {
        let mut h = Harness::new();
        let mut eth = MarketConfig::eth_perp();
        eth.skew_scale = Decimal::ZERO;
        h.engine.set_market_configuration(OWNER, eth).unwrap();

        assert_eq!(h.engine.get_liquidation_capacity(ETH).unwrap(), None);
        assert_eq!(h.engine.get_remaining_liquidatable_size_capacity(ETH).unwrap(), None);
    }
}

mod cascade {
    use super::*;

    #[test]
    fn simultaneous_liquidations_share_one_window() {
        let mut h = Harness::new();
        let accounts: Vec<(Address, AccountId)> = (0..5)
            .map(|i| {
                let owner = Address(20 + i);
                let account = h.trader(owner, dec!(500));
                h.trade(owner, account, dec!(8));
                (owner, account)
            })
            .collect();
        assert_eq!(h.skew(ETH), dec!(40));

        h.set_eth_price(dec!(900));
        for (_, account) in &accounts {
            h.engine.flag_position(KEEPER, *account, ETH).unwrap();
        }

        let mut closed = Decimal::ZERO;
        let mut throttled = 0;
        for (_, account) in &accounts {
            match h.engine.liquidate_position(KEEPER, *account, ETH) {
                Ok(result) => closed += result.liquidated_size,
                Err(EngineError::LiquidationCapacityExhausted(_)) => throttled += 1,
                Err(other) => panic!("unexpected error: {other}"),
            }
        }
        assert_eq!(closed, dec!(20));
        assert_eq!(throttled, 2);
        assert_eq!(h.position_size(accounts[2].1, ETH), dec!(4));

        h.engine.advance_secs(30);
        for (_, account) in &accounts[2..] {
            h.engine.liquidate_position(KEEPER, *account, ETH).unwrap();
        }
        for (_, account) in &accounts {
            assert!(h.engine.get_position(*account, ETH).is_none());
        }
        assert!(h.skew(ETH).is_zero());
        assert_eq!(h.sum_of_positions(ETH), Decimal::ZERO);
    }
}

mod seizure {
    use super::*;

    #[test]
    fn non_settlement_collateral_moves_to_the_pool() {
        let mut h = Harness::new();
        let alice = h.trader(ALICE, Decimal::ZERO);
        h.custody.mint(ALICE, WETH, dec!(1));
        h.engine
            .modify_collateral(ALICE, alice, ETH, WETH, dec!(1))
            .unwrap();
        h.trade(ALICE, alice, dec!(10));

        h.set_eth_price(dec!(900));
        h.engine.flag_position(CAROL, alice, ETH).unwrap();
        let events_before = h.engine.events().len();
        let result = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();

        assert!(result.fully_liquidated);
        assert!(result.bad_debt.is_positive());
        let credit = h.pool.market(ETH).unwrap();
        assert_eq!(credit.collateral.get(&WETH).copied(), Some(dec!(1)));
        // nobody else holds ETH, so the pool carries the shortfall
        assert_eq!(credit.bad_debt, result.bad_debt.value());
        let redistributed = h.engine.events()[events_before..]
            .iter()
            .find_map(|e| match &e.payload {
                EventPayload::DebtRedistributed(event) => Some(event),
                _ => None,
            })
            .unwrap();
        assert_eq!(redistributed.recipients, 0);
        assert_eq!(redistributed.amount, result.bad_debt);

        let seized: Vec<&CollateralSeizedEvent> = h.engine.events()[events_before..]
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::CollateralSeized(seized) => Some(seized),
                _ => None,
            })
            .collect();
        assert_eq!(seized.len(), 1);
        assert_eq!(seized[0].collateral_id, WETH);
        assert_eq!(seized[0].amount, dec!(1));

        assert_eq!(h.engine.get_market(ETH).unwrap().total_trader_debt, Decimal::ZERO);
        assert_eq!(h.engine.ledger().margin(alice, ETH), MarginAccount::default());
    }

    #[test]
    fn solvent_liquidation_has_no_bad_debt() {
        let mut h = Harness::new();
        let alice = h.trader(ALICE, dec!(1_000));
        h.trade(ALICE, alice, dec!(10));

        // maintenance is ~144 at 915 against ~140 of equity
        h.set_eth_price(dec!(915));
        h.engine.flag_position(KEEPER, alice, ETH).unwrap();
        let result = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();

        assert!(result.fully_liquidated);
        assert!(result.bad_debt.is_zero());
        assert!(h.engine.get_debt(alice, ETH).is_zero());
    }

    #[test]
    fn liquidation_can_be_paused() {
        let mut h = Harness::new();
        let alice = flagged_whale(&mut h);
        h.features.disable(Feature::LiquidatePosition);

        let err = h.engine.liquidate_position(KEEPER, alice, ETH).unwrap_err();
        assert_eq!(err, EngineError::FeatureDisabled(Feature::LiquidatePosition));

        h.features.enable(Feature::LiquidatePosition);
        h.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
    }

    #[test]
    fn flag_record_keeps_the_flagger() {
        let mut h = Harness::new();
        let alice = h.trader(ALICE, dec!(3_000));
        h.trade(ALICE, alice, dec!(50));
        h.set_eth_price(dec!(940));

        let flagged = h.engine.flag_position(CAROL, alice, ETH).unwrap();
        assert_eq!(flagged.price.value(), dec!(940));
        let record = h.engine.ledger().flag(alice, ETH).unwrap();
        assert_eq!(record.flagger, CAROL);
        assert_eq!(record.flagged_size, dec!(50));
        assert!(h.engine.get_position_digest(alice, ETH).unwrap().flagged);
    }
}
