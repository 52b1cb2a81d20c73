//! Margin accounts and health.
//!
//! Margin is isolated per account and market. A margin account holds one
//! balance per collateral type plus a non-negative debt in the settlement
//! asset. Realized losses and fees add to debt; realized gains retire debt
//! first and are then credited as settlement collateral.
//!
//! available margin = discounted collateral value + unrealized − debt.
//! health factor = available margin / maintenance margin. ≤ 1 is liquidatable.

use crate::position::{MarginRequirement, PositionAccruals};
use crate::types::{CollateralId, Price, Quote};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Price and haircut used to value one collateral type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollateralQuote {
    pub price: Price,
    pub discount: Decimal,
}

impl CollateralQuote {
    pub fn settlement() -> Self {
        Self {
            price: Price::new_unchecked(Decimal::ONE),
            discount: Decimal::ZERO,
        }
    }

    pub fn value_of(&self, amount: Decimal) -> Quote {
        Quote::new(amount * self.price.value() * (Decimal::ONE - self.discount))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarginAccount {
    // zero balances are removed so the key count is the number of collateral types held
    pub collaterals: BTreeMap<CollateralId, Decimal>,
    pub debt: Quote,
}

/// How a realized amount landed in the account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Realization {
    pub debt_added: Quote,
    pub debt_retired: Quote,
    /// Gains credited as settlement collateral. The pool has to fund these.
    pub credited: Quote,
}

impl MarginAccount {
    pub fn balance(&self, collateral: CollateralId) -> Decimal {
        self.collaterals.get(&collateral).copied().unwrap_or(Decimal::ZERO)
    }

    pub fn holds(&self, collateral: CollateralId) -> bool {
        self.collaterals.contains_key(&collateral)
    }

    pub fn is_empty(&self) -> bool {
        self.collaterals.is_empty() && self.debt.is_zero()
    }

    pub fn deposit(&mut self, collateral: CollateralId, amount: Decimal) {
        if amount.is_zero() {
            return;
        }
        *self.collaterals.entry(collateral).or_insert(Decimal::ZERO) += amount;
    }

    pub fn withdraw(&mut self, collateral: CollateralId, amount: Decimal) -> Result<(), MarginError> {
        let available = self.balance(collateral);
        if amount > available {
            return Err(MarginError::InsufficientCollateral {
                collateral,
                requested: amount,
                available,
            });
        }
        self.set_balance(collateral, available - amount);
        Ok(())
    }

    // zero balances are not kept
    fn set_balance(&mut self, collateral: CollateralId, amount: Decimal) {
        if amount.is_zero() {
            self.collaterals.remove(&collateral);
        } else {
            self.collaterals.insert(collateral, amount);
        }
    }

    /// Empties every balance, e.g. when collateral is seized or withdrawn in bulk.
    pub fn take_collaterals(&mut self) -> BTreeMap<CollateralId, Decimal> {
        std::mem::take(&mut self.collaterals)
    }

    pub fn collateral_value(&self, quotes: &BTreeMap<CollateralId, CollateralQuote>) -> Result<Quote, MarginError> {
        self.collaterals
            .iter()
            .map(|(id, amount)| {
                quotes
                    .get(id)
                    .map(|quote| quote.value_of(*amount))
                    .ok_or(MarginError::MissingCollateralPrice(*id))
            })
            .sum()
    }

    // realized deltas are signed. losses become debt, gains pay debt down and the rest is credited.
    pub fn realize(&mut self, delta: Quote, settlement: CollateralId) -> Realization {
        if delta.is_negative() {
            let added = delta.negate();
            self.debt = self.debt.add(added);
            return Realization {
                debt_added: added,
                ..Realization::default()
            };
        }

        let retired = delta.min(self.debt);
        self.debt = self.debt.sub(retired);
        let credited = delta.sub(retired);
        self.deposit(settlement, credited.value());
        Realization {
            debt_added: Quote::zero(),
            debt_retired: retired,
            credited,
        }
    }

    /// Pays debt with settlement collateral, up to `max`. Returns what was used.
    pub fn pay_debt_from_collateral(&mut self, settlement: CollateralId, max: Decimal) -> Decimal {
        let balance = self.balance(settlement);
        let used = max.min(self.debt.value()).min(balance);
        if used <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        self.set_balance(settlement, balance - used);
        self.debt = self.debt.sub(Quote::new(used));
        used
    }

    pub fn retire_debt(&mut self, amount: Decimal) -> Quote {
        let retired = Quote::new(amount).min(self.debt);
        self.debt = self.debt.sub(retired);
        retired
    }
}

/// Snapshot of one account's margin in one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarginHealth {
    pub collateral_usd: Quote,
    pub unrealized: Quote,
    pub debt: Quote,
    pub available_margin: Quote,
    pub requirement: MarginRequirement,
    pub health_factor: Decimal,
}

impl MarginHealth {
    pub fn evaluate(
        collateral_usd: Quote,
        accruals: PositionAccruals,
        debt: Quote,
        requirement: MarginRequirement,
    ) -> Self {
        let unrealized = accruals.net();
        let available_margin = collateral_usd.add(unrealized).sub(debt);
        let health_factor = if requirement.maintenance.is_positive() {
            available_margin.value() / requirement.maintenance.value()
        } else {
            Decimal::MAX
        };
        Self {
            collateral_usd,
            unrealized,
            debt,
            available_margin,
            requirement,
            health_factor,
        }
    }

    pub fn is_liquidatable(&self) -> bool {
        self.requirement.maintenance.is_positive() && self.health_factor <= Decimal::ONE
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MarginError {
    #[error("Insufficient {collateral:?}: requested {requested}, available {available}")]
    InsufficientCollateral {
        collateral: CollateralId,
        requested: Decimal,
        available: Decimal,
    },
    #[error("No price for collateral {0:?}")]
    MissingCollateralPrice(CollateralId),
}
