//! Margin deposits, withdrawals and debt repayment.

use super::core::Engine;
use super::results::{EngineError, PayDebtResult};
use crate::events::{CollateralModifiedEvent, DebtPaidEvent, EventPayload};
use crate::margin::{MarginAccount, MarginHealth};
use crate::position::margin_requirement;
use crate::registry::{Feature, Permission};
use crate::types::{AccountId, Address, CollateralId, MarketId, Quote};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::info;

impl Engine {
    // ---- 8.11: modify collateral ----

    /// Positive `amount_delta` deposits from the caller's wallet, negative withdraws to it.
    /// Returns the new balance of that collateral.
    pub fn modify_collateral(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        collateral_id: CollateralId,
        amount_delta: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.atomically(|engine| {
            engine.modify_collateral_inner(caller, account_id, market_id, collateral_id, amount_delta)
        })
    }

    fn modify_collateral_inner(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        collateral_id: CollateralId,
        amount_delta: Decimal,
    ) -> Result<Decimal, EngineError> {
        self.ensure_feature(Feature::ModifyCollateral, caller)?;
        self.market_ref(market_id)?;
        self.ensure_account(account_id)?;
        self.ensure_permission(account_id, Permission::ModifyCollateral, caller)?;

        let collateral = self
            .protocol
            .collateral(collateral_id)
            .cloned()
            .ok_or(EngineError::CollateralNotFound(collateral_id))?;
        if amount_delta.is_zero() {
            return Err(EngineError::ZeroAmount);
        }
        if self.ledger.order(account_id, market_id).is_some() {
            return Err(EngineError::OrderAlreadyPending {
                account: account_id,
                market: market_id,
            });
        }
        if self.ledger.is_flagged(account_id, market_id) {
            return Err(EngineError::PositionFlagged {
                account: account_id,
                market: market_id,
            });
        }

        let mut margin = self.ledger.margin(account_id, market_id);

        if amount_delta > Decimal::ZERO {
            let new_total = margin.balance(collateral_id) + amount_delta;
            if new_total > collateral.max_allowable {
                return Err(EngineError::MaxCollateralExceeded {
                    collateral: collateral_id,
                    new_total,
                    max: collateral.max_allowable,
                });
            }
            let held = self.ledger.collateral_types_held(account_id);
            if !held.contains(&collateral_id) {
                let max = self.protocol.caps.max_collaterals_per_account;
                if held.len() >= max as usize {
                    return Err(EngineError::MaxCollateralsPerAccount(max));
                }
            }

            margin.deposit(collateral_id, amount_delta);
            let new_balance = margin.balance(collateral_id);
            self.ledger.store_margin(account_id, market_id, margin);
            self.services.custody.transfer_in(caller, collateral_id, amount_delta)?;
            self.finish_collateral_change(account_id, market_id, collateral_id, amount_delta, new_balance);
            return Ok(new_balance);
        }

        let amount = amount_delta.abs();
        margin.withdraw(collateral_id, amount)?;
        self.ensure_margin_after_withdrawal(account_id, market_id, &margin)?;

        let new_balance = margin.balance(collateral_id);
        self.ledger.store_margin(account_id, market_id, margin);
        self.services.custody.transfer_out(caller, collateral_id, amount)?;
        self.finish_collateral_change(account_id, market_id, collateral_id, amount_delta, new_balance);
        Ok(new_balance)
    }

    /// With a position, what is left must stay above maintenance. Without one it must still cover the debt.
    fn ensure_margin_after_withdrawal(
        &self,
        account_id: AccountId,
        market_id: MarketId,
        margin: &MarginAccount,
    ) -> Result<(), EngineError> {
        let collateral_usd = self.collateral_usd(margin)?;

        let Some(position) = self.ledger.position(account_id, market_id) else {
            let available = collateral_usd.sub(margin.debt);
            if available.is_negative() {
                return Err(EngineError::InsufficientMargin {
                    required: margin.debt,
                    available: collateral_usd,
                });
            }
            return Ok(());
        };

        let price = self.index_price(market_id)?;
        let accruals = self.projected_accruals(market_id, price)?;
        let config = &self.market_ref(market_id)?.config;
        let health = MarginHealth::evaluate(
            collateral_usd,
            position.accruals(price, accruals.funding_value(), accruals.utilization_accrued),
            margin.debt,
            margin_requirement(position.size, price, config),
        );
        if health.is_liquidatable() {
            return Err(EngineError::InsufficientMargin {
                required: health.requirement.maintenance,
                available: health.available_margin,
            });
        }
        Ok(())
    }

    fn finish_collateral_change(
        &mut self,
        account_id: AccountId,
        market_id: MarketId,
        collateral_id: CollateralId,
        amount_delta: Decimal,
        new_balance: Decimal,
    ) {
        info!(
            account = ?account_id,
            market = ?market_id,
            collateral = ?collateral_id,
            delta = %amount_delta,
            balance = %new_balance,
            "collateral modified"
        );
        self.emit_event(EventPayload::CollateralModified(CollateralModifiedEvent {
            account_id,
            market_id,
            collateral_id,
            amount_delta,
            new_balance,
        }));
    }

    /// Withdraws every collateral balance. The market must hold nothing else for the account.
    pub fn withdraw_all_collateral(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<BTreeMap<CollateralId, Decimal>, EngineError> {
        self.atomically(|engine| {
            engine.ensure_feature(Feature::ModifyCollateral, caller)?;
            engine.market_ref(market_id)?;
            engine.ensure_account(account_id)?;
            engine.ensure_permission(account_id, Permission::ModifyCollateral, caller)?;

            if engine.ledger.position(account_id, market_id).is_some() {
                return Err(EngineError::OpenPositionExists {
                    account: account_id,
                    market: market_id,
                });
            }
            if engine.ledger.order(account_id, market_id).is_some() {
                return Err(EngineError::OrderAlreadyPending {
                    account: account_id,
                    market: market_id,
                });
            }

            let mut margin = engine.ledger.margin(account_id, market_id);
            if margin.debt.is_positive() {
                return Err(EngineError::DebtOutstanding(margin.debt));
            }
            let withdrawn = margin.take_collaterals();
            if withdrawn.is_empty() {
                return Err(EngineError::NothingToWithdraw);
            }
            engine.ledger.store_margin(account_id, market_id, margin);

            for (collateral_id, amount) in &withdrawn {
                engine.services.custody.transfer_out(caller, *collateral_id, *amount)?;
                engine.finish_collateral_change(account_id, market_id, *collateral_id, -*amount, Decimal::ZERO);
            }
            Ok(withdrawn)
        })
    }

    // ---- 8.12: debt ----

    /// Pays down debt with settlement collateral first, then from the caller's wallet.
    pub fn pay_debt(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
        amount: Decimal,
    ) -> Result<PayDebtResult, EngineError> {
        self.atomically(|engine| {
            engine.ensure_feature(Feature::PayDebt, caller)?;
            engine.market_ref(market_id)?;
            engine.ensure_account(account_id)?;
            engine.ensure_permission(account_id, Permission::PayDebt, caller)?;

            if amount <= Decimal::ZERO {
                return Err(EngineError::ZeroAmount);
            }
            let mut margin = engine.ledger.margin(account_id, market_id);
            if !margin.debt.is_positive() {
                return Err(EngineError::NoDebt {
                    account: account_id,
                    market: market_id,
                });
            }

            let settlement = engine.protocol.settlement_collateral;
            let amount = amount.min(margin.debt.value());
            let from_collateral = margin.pay_debt_from_collateral(settlement, amount);
            let from_wallet = margin.retire_debt(amount - from_collateral).value();
            let remaining_debt = margin.debt;
            engine.ledger.store_margin(account_id, market_id, margin);

            if from_wallet > Decimal::ZERO {
                engine.services.custody.transfer_in(caller, settlement, from_wallet)?;
            }
            engine.services.credit_pool.deposit_market_usd(market_id, amount)?;

            info!(
                account = ?account_id,
                market = ?market_id,
                %from_collateral,
                %from_wallet,
                remaining = %remaining_debt,
                "debt paid"
            );
            engine.emit_event(EventPayload::DebtPaid(DebtPaidEvent {
                account_id,
                market_id,
                from_collateral,
                from_wallet,
                remaining_debt,
            }));
            Ok(PayDebtResult {
                from_collateral,
                from_wallet,
                remaining_debt,
            })
        })
    }

    /// Debt currently owed by the account in the market.
    pub fn get_debt(&self, account_id: AccountId, market_id: MarketId) -> Quote {
        self.ledger.margin(account_id, market_id).debt
    }
}
