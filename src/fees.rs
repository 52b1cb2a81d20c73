// 6.0: keeper compensation. gas units × base fee × eth price, marked up, plus whatever buffer the trader offered.
// bounded by [min, max] so a gas spike cannot drain an account and a quiet chain still pays something.

use crate::config::KeeperFeeConfig;
use crate::types::{Price, Quote};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeeperAction {
    Settle,
    Cancel,
    Liquidate,
}

impl KeeperAction {
    pub fn gas_units(&self, config: &KeeperFeeConfig) -> u64 {
        match self {
            KeeperAction::Settle => config.keeper_settlement_gas_units,
            KeeperAction::Cancel => config.keeper_cancellation_gas_units,
            KeeperAction::Liquidate => config.keeper_liquidation_gas_units,
        }
    }
}

const GWEI_PER_ETH: Decimal = dec!(1_000_000_000);

pub fn keeper_fee(
    config: &KeeperFeeConfig,
    action: KeeperAction,
    base_fee_per_gas_gwei: Decimal,
    eth_price: Price,
    buffer: Quote,
) -> Quote {
    let gas_eth = Decimal::from(action.gas_units(config)) * base_fee_per_gas_gwei / GWEI_PER_ETH;
    let cost = gas_eth * eth_price.value() * (Decimal::ONE + config.keeper_profit_margin_percent);
    let fee = (cost + buffer.value().max(Decimal::ZERO))
        .max(config.min_keeper_fee_usd)
        .min(config.max_keeper_fee_usd);
    Quote::new(fee)
}
