// 9.3 credit_pool.rs: the pool behind each market. it absorbs what traders lose and funds what they win.
// capacity is the credit delegated to the market; it also drives the utilization rate.

use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::lock;
use crate::types::{CollateralId, MarketId, Quote};

pub trait CreditPool: Send + Sync {
    fn deposit_market_usd(&self, market: MarketId, amount: Decimal) -> Result<(), CreditPoolError>;

    fn withdraw_market_usd(&self, market: MarketId, amount: Decimal) -> Result<(), CreditPoolError>;

    /// Seized non-usd collateral lands here.
    fn deposit_market_collateral(
        &self,
        market: MarketId,
        collateral: CollateralId,
        amount: Decimal,
    ) -> Result<(), CreditPoolError>;

    fn credit_capacity(&self, market: MarketId) -> Quote;

    /// Books a liquidation loss no open position was left to carry.
    fn record_bad_debt(&self, market: MarketId, amount: Decimal) -> Result<(), CreditPoolError>;
}

// Errors from pool operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CreditPoolError {
    #[error("Market {market:?} can withdraw {available}, requested {requested}")]
    InsufficientCredit {
        market: MarketId,
        available: Decimal,
        requested: Decimal,
    },
    #[error("Market {0:?} has no credit line")]
    MarketNotDelegated(MarketId),
    #[error("Amount must be positive")]
    InvalidAmount,
}

#[derive(Debug, Clone, Default)]
pub struct MarketCredit {
    pub capacity: Decimal,
    pub usd_deposited: Decimal,
    pub usd_withdrawn: Decimal,
    pub collateral: BTreeMap<CollateralId, Decimal>,
    pub bad_debt: Decimal,
}

impl MarketCredit {
    pub fn withdrawable(&self) -> Decimal {
        self.capacity + self.usd_deposited - self.usd_withdrawn
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCreditPool {
    markets: Mutex<BTreeMap<MarketId, MarketCredit>>,
}

impl InMemoryCreditPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delegate(&self, market: MarketId, capacity: Decimal) {
        lock(&self.markets).entry(market).or_default().capacity = capacity;
    }

    pub fn market(&self, market: MarketId) -> Option<MarketCredit> {
        lock(&self.markets).get(&market).cloned()
    }
}

impl CreditPool for InMemoryCreditPool {
    fn deposit_market_usd(&self, market: MarketId, amount: Decimal) -> Result<(), CreditPoolError> {
        if amount <= Decimal::ZERO {
            return Err(CreditPoolError::InvalidAmount);
        }
        let mut markets = lock(&self.markets);
        let credit = markets.get_mut(&market).ok_or(CreditPoolError::MarketNotDelegated(market))?;
        credit.usd_deposited += amount;
        Ok(())
    }

    fn withdraw_market_usd(&self, market: MarketId, amount: Decimal) -> Result<(), CreditPoolError> {
        if amount <= Decimal::ZERO {
            return Err(CreditPoolError::InvalidAmount);
        }
        let mut markets = lock(&self.markets);
        let credit = markets.get_mut(&market).ok_or(CreditPoolError::MarketNotDelegated(market))?;
        let available = credit.withdrawable();
        if amount > available {
            return Err(CreditPoolError::InsufficientCredit {
                market,
                available,
                requested: amount,
            });
        }
        credit.usd_withdrawn += amount;
        Ok(())
    }

    fn deposit_market_collateral(
        &self,
        market: MarketId,
        collateral: CollateralId,
        amount: Decimal,
    ) -> Result<(), CreditPoolError> {
        if amount <= Decimal::ZERO {
            return Err(CreditPoolError::InvalidAmount);
        }
        let mut markets = lock(&self.markets);
        let credit = markets.get_mut(&market).ok_or(CreditPoolError::MarketNotDelegated(market))?;
        *credit.collateral.entry(collateral).or_insert(Decimal::ZERO) += amount;
        Ok(())
    }

    fn credit_capacity(&self, market: MarketId) -> Quote {
        lock(&self.markets)
            .get(&market)
            .map(|credit| Quote::new(credit.capacity))
            .unwrap_or_default()
    }

    fn record_bad_debt(&self, market: MarketId, amount: Decimal) -> Result<(), CreditPoolError> {
        if amount <= Decimal::ZERO {
            return Err(CreditPoolError::InvalidAmount);
        }
        let mut markets = lock(&self.markets);
        let credit = markets.get_mut(&market).ok_or(CreditPoolError::MarketNotDelegated(market))?;
        credit.bad_debt += amount;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn withdrawals_bounded_by_capacity_and_deposits() {
        let pool = InMemoryCreditPool::new();
        pool.delegate(MarketId(1), dec!(100));
        pool.deposit_market_usd(MarketId(1), dec!(50)).unwrap();
        pool.withdraw_market_usd(MarketId(1), dec!(120)).unwrap();

        let result = pool.withdraw_market_usd(MarketId(1), dec!(31));
        assert_eq!(
            result,
            Err(CreditPoolError::InsufficientCredit {
                market: MarketId(1),
                available: dec!(30),
                requested: dec!(31),
            })
        );
    }

    #[test]
    fn undelegated_market_rejected() {
        let pool = InMemoryCreditPool::new();
        assert_eq!(
            pool.deposit_market_usd(MarketId(9), dec!(1)),
            Err(CreditPoolError::MarketNotDelegated(MarketId(9)))
        );
        assert!(pool.credit_capacity(MarketId(9)).is_zero());
    }

    #[test]
    fn bad_debt_is_booked_per_market() {
        let pool = InMemoryCreditPool::new();
        pool.delegate(MarketId(1), dec!(100));
        pool.record_bad_debt(MarketId(1), dec!(12.5)).unwrap();
        pool.record_bad_debt(MarketId(1), dec!(0.5)).unwrap();
        assert_eq!(pool.market(MarketId(1)).unwrap().bad_debt, dec!(13));
        // a loss does not eat into what the market can still withdraw
        assert_eq!(pool.market(MarketId(1)).unwrap().withdrawable(), dec!(100));
        assert_eq!(
            pool.record_bad_debt(MarketId(1), Decimal::ZERO),
            Err(CreditPoolError::InvalidAmount)
        );
    }

    #[test]
    fn seized_collateral_accumulates() {
        let pool = InMemoryCreditPool::new();
        pool.delegate(MarketId(1), dec!(0));
        pool.deposit_market_collateral(MarketId(1), CollateralId(1), dec!(2)).unwrap();
        pool.deposit_market_collateral(MarketId(1), CollateralId(1), dec!(1)).unwrap();
        let credit = pool.market(MarketId(1)).unwrap();
        assert_eq!(credit.collateral.get(&CollateralId(1)), Some(&dec!(3)));
    }
}
