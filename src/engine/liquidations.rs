//! Flagging, rate-limited position liquidation and vault liquidation.

use super::core::Engine;
use super::results::{EngineError, FlagResult, LiquidationResult, VaultLiquidationResult};
use crate::events::{
    CancelReason, CollateralSeizedEvent, DebtRedistributedEvent, EventPayload, OrderCanceledEvent, PositionFlaggedEvent,
    PositionLiquidatedEvent, VaultLiquidatedEvent, VaultRegisteredEvent, VaultUpdatedEvent,
};
use crate::fees::KeeperAction;
use crate::liquidation::{liquidation_chunk, FlagRecord, LiquidationRewards, Vault};
use crate::margin::MarginHealth;
use crate::oracle::PriceOracleAdapter;
use crate::position::{apply_fill, margin_requirement};
use crate::registry::Feature;
use crate::types::{AccountId, Address, CollateralId, MarketId, Price, Quote, VaultId};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use tracing::{info, warn};

impl Engine {
    // ---- 8.13: flag ----

    /// Marks an unhealthy position for liquidation and drops its pending order.
    pub fn flag_position(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<FlagResult, EngineError> {
        self.atomically(|engine| {
            engine.ensure_feature(Feature::FlagPosition, caller)?;
            engine.market_ref(market_id)?;
            engine.ensure_account(account_id)?;

            let position = engine
                .ledger
                .position(account_id, market_id)
                .cloned()
                .ok_or(EngineError::PositionNotFound {
                    account: account_id,
                    market: market_id,
                })?;
            if engine.ledger.is_flagged(account_id, market_id) {
                return Err(EngineError::PositionAlreadyFlagged {
                    account: account_id,
                    market: market_id,
                });
            }

            let price = engine.index_price(market_id)?;
            let accruals = engine.recompute_market(market_id, price)?;
            let health = engine.margin_health(
                account_id,
                market_id,
                price,
                accruals.funding_value(),
                accruals.utilization_accrued,
            )?;
            if !health.is_liquidatable() {
                return Err(EngineError::PositionNotLiquidatable {
                    health_factor: health.health_factor,
                });
            }

            let canceled_order = engine.ledger.take_order(account_id, market_id).is_some();
            if canceled_order {
                engine.emit_event(EventPayload::OrderCanceled(OrderCanceledEvent {
                    account_id,
                    market_id,
                    reason: CancelReason::Liquidation,
                    keeper_fee: Quote::zero(),
                }));
            }
            engine.ledger.flags.insert(
                (account_id, market_id),
                FlagRecord {
                    flagger: caller,
                    flagged_at: engine.current_time,
                    flagged_size: position.size.abs(),
                },
            );

            info!(
                account = ?account_id,
                market = ?market_id,
                flagger = %caller,
                health = %health.health_factor,
                canceled_order,
                "position flagged"
            );
            engine.emit_event(EventPayload::PositionFlagged(PositionFlaggedEvent {
                account_id,
                market_id,
                flagger: caller,
                size: position.size,
                price,
                health_factor: health.health_factor,
            }));

            Ok(FlagResult {
                health_factor: health.health_factor,
                price,
                canceled_order,
            })
        })
    }

    // ---- 8.14: liquidate ----

    /// Closes as much of a flagged position as the market's window allows. The account's margin is
    /// seized once nothing is left.
    pub fn liquidate_position(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<LiquidationResult, EngineError> {
        self.atomically(|engine| engine.liquidate_position_inner(caller, account_id, market_id))
    }

    fn liquidate_position_inner(
        &mut self,
        caller: Address,
        account_id: AccountId,
        market_id: MarketId,
    ) -> Result<LiquidationResult, EngineError> {
        self.ensure_feature(Feature::LiquidatePosition, caller)?;
        let config = self.market_ref(market_id)?.config.clone();
        self.ensure_account(account_id)?;

        let position = self
            .ledger
            .position(account_id, market_id)
            .cloned()
            .ok_or(EngineError::PositionNotFound {
                account: account_id,
                market: market_id,
            })?;
        let flag = self
            .ledger
            .flag(account_id, market_id)
            .cloned()
            .ok_or(EngineError::PositionNotFlagged {
                account: account_id,
                market: market_id,
            })?;

        let now = self.current_time;
        let remaining_capacity = self.market_ref(market_id)?.liquidation_window.remaining(&config, now);
        let chunk = liquidation_chunk(position.size.value(), remaining_capacity);
        if chunk.is_zero() {
            return Err(EngineError::LiquidationCapacityExhausted(market_id));
        }

        let price = self.index_price(market_id)?;
        let keeper_fee = self.keeper_fee_for(KeeperAction::Liquidate, Quote::zero())?;
        let accruals = self.recompute_market(market_id, price)?;

        let size_delta = if position.size.is_long() { -chunk } else { chunk };
        let update = apply_fill(
            Some(&position),
            account_id,
            market_id,
            size_delta,
            price,
            accruals.funding_value(),
            accruals.utilization_accrued,
            now,
        );
        let rewards = LiquidationRewards::for_chunk(chunk, price, config.liquidation_reward_ratio, keeper_fee);

        let settlement = self.protocol.settlement_collateral;
        let mut margin = self.ledger.margin(account_id, market_id);
        let realization = margin.realize(update.realized.net().sub(rewards.total()), settlement);

        let market = self.market_mut(market_id)?;
        market.apply_position_change(Some(&position), update.new_position.as_ref());
        market
            .liquidation_window
            .record(chunk, now, config.max_seconds_in_liquidation_window);
        let remaining_size = update.new_position.as_ref().map(|p| p.size).unwrap_or_default();
        self.ledger.set_position(account_id, market_id, update.new_position.clone());

        let fully_liquidated = remaining_size.is_zero();
        let mut bad_debt = Quote::zero();
        let mut debt_paid_from_collateral = Decimal::ZERO;
        let mut seized = BTreeMap::new();
        if fully_liquidated {
            debt_paid_from_collateral = margin.pay_debt_from_collateral(settlement, margin.debt.value());
            let residual = self.collateral_usd(&margin)?;
            bad_debt = margin.debt.sub(residual).max(Quote::zero());
            seized = margin.take_collaterals();
            margin.debt = Quote::zero();
            self.ledger.flags.remove(&(account_id, market_id));
        }
        self.ledger.store_margin(account_id, market_id, margin);
        if bad_debt.is_positive() {
            self.redistribute_bad_debt(account_id, market_id, bad_debt)?;
        }
        self.refresh_utilization_rate(market_id, price)?;

        // collaborators: fund credited gains, sweep seized margin to the pool, pay the actors
        let pool = self.services.credit_pool.clone();
        if realization.credited.is_positive() {
            pool.withdraw_market_usd(market_id, realization.credited.value())?;
        }
        if debt_paid_from_collateral > Decimal::ZERO {
            pool.deposit_market_usd(market_id, debt_paid_from_collateral)?;
        }
        for (collateral_id, amount) in &seized {
            if *collateral_id == settlement {
                pool.deposit_market_usd(market_id, *amount)?;
            } else {
                pool.deposit_market_collateral(market_id, *collateral_id, *amount)?;
            }
            self.emit_event(EventPayload::CollateralSeized(CollateralSeizedEvent {
                account_id,
                market_id,
                collateral_id: *collateral_id,
                amount: *amount,
            }));
        }
        for (recipient, amount) in rewards.payouts(flag.flagger, caller) {
            self.pay_keeper(market_id, recipient, amount, KeeperAction::Liquidate)?;
        }

        info!(
            account = ?account_id,
            market = ?market_id,
            liquidator = %caller,
            chunk = %chunk,
            remaining = %remaining_size,
            fully_liquidated,
            "position liquidated"
        );
        self.emit_event(EventPayload::PositionLiquidated(PositionLiquidatedEvent {
            account_id,
            market_id,
            liquidator: caller,
            liquidated_size: chunk,
            remaining_size,
            price,
            flagger_reward: rewards.flagger_reward,
            liquidator_reward: rewards.liquidator_reward,
            bad_debt,
            fully_liquidated,
        }));

        Ok(LiquidationResult {
            account_id,
            market_id,
            liquidated_size: chunk,
            remaining_size,
            price,
            flagger_reward: rewards.flagger_reward,
            liquidator_reward: rewards.liquidator_reward,
            bad_debt,
            fully_liquidated,
        })
    }

    /// Spreads a liquidation's bad debt over the market's remaining positions by size, the last one
    /// taking the rounding remainder. With no position left the pool books it as a loss.
    fn redistribute_bad_debt(
        &mut self,
        liquidated_account: AccountId,
        market_id: MarketId,
        bad_debt: Quote,
    ) -> Result<(), EngineError> {
        let survivors: Vec<(AccountId, Decimal)> = self
            .ledger
            .positions_in_market(market_id)
            .map(|p| (p.account_id, p.size.abs()))
            .collect();
        let total_size: Decimal = survivors.iter().map(|(_, size)| *size).sum();

        if total_size.is_zero() {
            self.services.credit_pool.record_bad_debt(market_id, bad_debt.value())?;
        } else {
            let mut assigned = Decimal::ZERO;
            let last = survivors.len() - 1;
            for (index, (survivor, size)) in survivors.iter().enumerate() {
                let share = if index == last {
                    bad_debt.value() - assigned
                } else {
                    bad_debt.value() * *size / total_size
                };
                assigned += share;

                let mut margin = self.ledger.margin(*survivor, market_id);
                margin.debt = margin.debt.add(Quote::new(share));
                self.ledger.store_margin(*survivor, market_id, margin);
            }
        }

        warn!(
            account = ?liquidated_account,
            market = ?market_id,
            %bad_debt,
            recipients = survivors.len(),
            "bad debt redistributed"
        );
        self.emit_event(EventPayload::DebtRedistributed(DebtRedistributedEvent {
            market_id,
            liquidated_account,
            amount: bad_debt,
            recipients: survivors.len(),
        }));
        Ok(())
    }

    pub(super) fn margin_health(
        &self,
        account_id: AccountId,
        market_id: MarketId,
        price: Price,
        funding_value: Decimal,
        utilization_accrued: Decimal,
    ) -> Result<MarginHealth, EngineError> {
        let config = &self.market_ref(market_id)?.config;
        let margin = self.ledger.margin(account_id, market_id);
        let collateral_usd = self.collateral_usd(&margin)?;
        let position = self.ledger.position(account_id, market_id);

        let accruals = position
            .map(|p| p.accruals(price, funding_value, utilization_accrued))
            .unwrap_or_default();
        let requirement = position
            .map(|p| margin_requirement(p.size, price, config))
            .unwrap_or_default();
        Ok(MarginHealth::evaluate(collateral_usd, accruals, margin.debt, requirement))
    }

    // ---- 8.15: vaults ----

    pub fn register_vault(
        &mut self,
        caller: Address,
        vault_id: VaultId,
        collateral_id: CollateralId,
        liquidation_ratio: Decimal,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            engine
                .protocol
                .collateral(collateral_id)
                .ok_or(EngineError::CollateralNotFound(collateral_id))?;
            if engine.ledger.vaults.contains_key(&vault_id) {
                return Err(EngineError::VaultAlreadyExists(vault_id));
            }

            engine
                .ledger
                .vaults
                .insert(vault_id, Vault::new(vault_id, collateral_id, liquidation_ratio));

            info!(vault = ?vault_id, collateral = ?collateral_id, %liquidation_ratio, "vault registered");
            engine.emit_event(EventPayload::VaultRegistered(VaultRegisteredEvent {
                vault_id,
                collateral_id,
                liquidation_ratio,
            }));
            Ok(())
        })
    }

    /// Moves collateral from the caller into the vault.
    pub fn deposit_vault_collateral(
        &mut self,
        caller: Address,
        vault_id: VaultId,
        amount: Decimal,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            if amount <= Decimal::ZERO {
                return Err(EngineError::ZeroAmount);
            }
            let vault = engine
                .ledger
                .vaults
                .get_mut(&vault_id)
                .ok_or(EngineError::VaultNotFound(vault_id))?;
            vault.collateral_amount += amount;
            let collateral_id = vault.collateral_id;
            let event = VaultUpdatedEvent {
                vault_id,
                collateral_amount: vault.collateral_amount,
                debt_usd: vault.debt_usd,
            };

            engine.services.custody.transfer_in(caller, collateral_id, amount)?;
            engine.emit_event(EventPayload::VaultUpdated(event));
            Ok(())
        })
    }

    /// Adjusts the debt the vault has minted against its collateral. Never goes below zero.
    pub fn record_vault_debt(&mut self, caller: Address, vault_id: VaultId, debt_delta: Decimal) -> Result<Quote, EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            if debt_delta.is_zero() {
                return Err(EngineError::ZeroAmount);
            }
            let vault = engine
                .ledger
                .vaults
                .get_mut(&vault_id)
                .ok_or(EngineError::VaultNotFound(vault_id))?;
            vault.debt_usd = Quote::new((vault.debt_usd.value() + debt_delta).max(Decimal::ZERO));
            let event = VaultUpdatedEvent {
                vault_id,
                collateral_amount: vault.collateral_amount,
                debt_usd: vault.debt_usd,
            };
            let debt = vault.debt_usd;

            engine.emit_event(EventPayload::VaultUpdated(event));
            Ok(debt)
        })
    }

    /// An authorized liquidator repays up to `max_usd` of an undercollateralized vault's debt
    /// and receives the same share of its collateral.
    pub fn liquidate_vault(
        &mut self,
        caller: Address,
        vault_id: VaultId,
        liquidator_account: AccountId,
        max_usd: Decimal,
    ) -> Result<VaultLiquidationResult, EngineError> {
        self.atomically(|engine| {
            engine.ensure_feature(Feature::LiquidateVault, caller)?;
            engine.ensure_account(liquidator_account)?;
            if !engine.services.registry.is_authorized_liquidator(caller) {
                return Err(EngineError::Unauthorized(caller));
            }

            let vault = engine
                .ledger
                .vaults
                .get(&vault_id)
                .cloned()
                .ok_or(EngineError::VaultNotFound(vault_id))?;
            let collateral = engine
                .protocol
                .collateral(vault.collateral_id)
                .cloned()
                .ok_or(EngineError::CollateralNotFound(vault.collateral_id))?;
            let price = match &collateral.price_feed_id {
                Some(feed) => PriceOracleAdapter::new(engine.services.oracle.as_ref()).index_price(feed)?,
                None => Price::new_unchecked(Decimal::ONE),
            };

            let outcome = vault.liquidate(price, Quote::new(max_usd))?;
            if let Some(stored) = engine.ledger.vaults.get_mut(&vault_id) {
                stored.apply(&outcome);
            }

            let settlement = engine.protocol.settlement_collateral;
            engine
                .services
                .custody
                .transfer_in(caller, settlement, outcome.debt_repaid.value())?;
            engine
                .services
                .custody
                .transfer_out(caller, vault.collateral_id, outcome.collateral_seized)?;

            info!(
                vault = ?vault_id,
                liquidator = %caller,
                repaid = %outcome.debt_repaid,
                seized = %outcome.collateral_seized,
                c_ratio = %outcome.collateralization_ratio,
                "vault liquidated"
            );
            engine.emit_event(EventPayload::VaultLiquidated(VaultLiquidatedEvent {
                vault_id,
                liquidator_account,
                debt_repaid: outcome.debt_repaid,
                collateral_seized: outcome.collateral_seized,
                collateralization_ratio: outcome.collateralization_ratio,
            }));

            Ok(VaultLiquidationResult {
                vault_id,
                debt_repaid: outcome.debt_repaid,
                collateral_seized: outcome.collateral_seized,
            })
        })
    }
}
