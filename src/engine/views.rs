//! Read views. Funding and utilization are projected to now but never persisted.

use super::core::Engine;
use super::results::EngineError;
use crate::config::CollateralConfig;
use crate::fees::KeeperAction;
use crate::funding::fill_price;
use crate::liquidation::{LiquidationWindow, Vault};
use crate::market::MarketState;
use crate::order::OrderDigest;
use crate::position::{margin_requirement, Position};
use crate::types::{AccountId, CollateralId, MarketId, Price, Quote, SignedSize, VaultId};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MarketSummary {
    pub market_id: MarketId,
    pub name: String,
    pub skew: SignedSize,
    pub size: Decimal,
    pub long_open_interest: Decimal,
    pub short_open_interest: Decimal,
    pub index_price: Price,
    pub funding_rate: Decimal,
    pub funding_velocity: Decimal,
    pub funding_value: Decimal,
    pub utilization_rate: Decimal,
    pub max_market_size: Decimal,
    pub reported_debt: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionDigest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size: SignedSize,
    pub entry_price: Price,
    pub price: Price,
    pub pnl: Quote,
    pub accrued_funding: Quote,
    pub accrued_utilization: Quote,
    pub notional_value: Quote,
    pub initial_margin: Quote,
    pub maintenance_margin: Quote,
    pub health_factor: Decimal,
    pub flagged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountDigest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub collaterals: Vec<(CollateralId, Decimal)>,
    pub collateral_usd: Quote,
    pub debt: Quote,
    pub available_margin: Quote,
    pub health_factor: Decimal,
    pub position_size: SignedSize,
    pub has_pending_order: bool,
}

impl Engine {
    pub fn get_market(&self, market_id: MarketId) -> Option<&MarketState> {
        self.ledger.market(market_id)
    }

    pub fn get_position(&self, account_id: AccountId, market_id: MarketId) -> Option<&Position> {
        self.ledger.position(account_id, market_id)
    }

    pub fn get_vault(&self, vault_id: VaultId) -> Option<&Vault> {
        self.ledger.vaults.get(&vault_id)
    }

    pub fn get_market_summary(&self, market_id: MarketId) -> Result<MarketSummary, EngineError> {
        let market = self.market_ref(market_id)?;
        let price = self.index_price(market_id)?;
        let accruals = self.projected_accruals(market_id, price)?;

        Ok(MarketSummary {
            market_id,
            name: market.config.name.clone(),
            skew: market.skew,
            size: market.size,
            long_open_interest: market.long_open_interest(),
            short_open_interest: market.short_open_interest(),
            index_price: price,
            funding_rate: accruals.funding.funding_rate,
            funding_velocity: accruals.funding.funding_velocity,
            funding_value: accruals.funding_value(),
            utilization_rate: accruals.utilization_rate,
            max_market_size: market.config.max_market_size,
            reported_debt: self.get_market_reported_debt(market_id)?,
        })
    }

    pub fn get_position_digest(&self, account_id: AccountId, market_id: MarketId) -> Result<PositionDigest, EngineError> {
        let position = self
            .ledger
            .position(account_id, market_id)
            .ok_or(EngineError::PositionNotFound {
                account: account_id,
                market: market_id,
            })?;
        let config = &self.market_ref(market_id)?.config;
        let price = self.index_price(market_id)?;
        let accruals = self.projected_accruals(market_id, price)?;
        let position_accruals = position.accruals(price, accruals.funding_value(), accruals.utilization_accrued);
        let requirement = margin_requirement(position.size, price, config);
        let health = self.margin_health(
            account_id,
            market_id,
            price,
            accruals.funding_value(),
            accruals.utilization_accrued,
        )?;

        Ok(PositionDigest {
            account_id,
            market_id,
            size: position.size,
            entry_price: position.entry_price,
            price,
            pnl: position_accruals.pnl,
            accrued_funding: position_accruals.accrued_funding,
            accrued_utilization: position_accruals.accrued_utilization,
            notional_value: position.notional_value(price),
            initial_margin: requirement.initial,
            maintenance_margin: requirement.maintenance,
            health_factor: health.health_factor,
            flagged: self.ledger.is_flagged(account_id, market_id),
        })
    }

    pub fn get_account_digest(&self, account_id: AccountId, market_id: MarketId) -> Result<AccountDigest, EngineError> {
        self.market_ref(market_id)?;
        self.ensure_account(account_id)?;

        let margin = self.ledger.margin(account_id, market_id);
        let price = self.index_price(market_id)?;
        let accruals = self.projected_accruals(market_id, price)?;
        let health = self.margin_health(
            account_id,
            market_id,
            price,
            accruals.funding_value(),
            accruals.utilization_accrued,
        )?;

        Ok(AccountDigest {
            account_id,
            market_id,
            collaterals: margin.collaterals.iter().map(|(id, amount)| (*id, *amount)).collect(),
            collateral_usd: health.collateral_usd,
            debt: margin.debt,
            available_margin: health.available_margin,
            health_factor: health.health_factor,
            position_size: self
                .ledger
                .position(account_id, market_id)
                .map(|p| p.size)
                .unwrap_or_default(),
            has_pending_order: self.ledger.order(account_id, market_id).is_some(),
        })
    }

    /// Average price a trade of `size_delta` would fill at against the current skew and index.
    pub fn get_fill_price(&self, market_id: MarketId, size_delta: Decimal) -> Result<Price, EngineError> {
        self.ensure_order_size(market_id, size_delta)?;
        let market = self.market_ref(market_id)?;
        let price = self.index_price(market_id)?;
        Ok(fill_price(market.skew, market.config.skew_scale, size_delta, price))
    }

    pub fn get_order_digest(&self, account_id: AccountId, market_id: MarketId) -> Result<OrderDigest, EngineError> {
        let config = &self.market_ref(market_id)?.config;
        let order = self
            .ledger
            .order(account_id, market_id)
            .ok_or(EngineError::OrderNotFound {
                account: account_id,
                market: market_id,
            })?;
        Ok(OrderDigest::new(
            order,
            self.current_time,
            config.min_order_age_secs,
            config.max_order_age_secs,
        ))
    }

    pub fn get_configured_collaterals(&self) -> &[CollateralConfig] {
        &self.protocol.collaterals
    }

    pub fn get_health_factor(&self, account_id: AccountId, market_id: MarketId) -> Result<Decimal, EngineError> {
        let price = self.index_price(market_id)?;
        let accruals = self.projected_accruals(market_id, price)?;
        let health = self.margin_health(
            account_id,
            market_id,
            price,
            accruals.funding_value(),
            accruals.utilization_accrued,
        )?;
        Ok(health.health_factor)
    }

    /// `None` when the market has no liquidation limit.
    pub fn get_remaining_liquidatable_size_capacity(&self, market_id: MarketId) -> Result<Option<Decimal>, EngineError> {
        let market = self.market_ref(market_id)?;
        Ok(market.liquidation_window.remaining(&market.config, self.current_time))
    }

    /// Full per-window capacity, independent of recent liquidations.
    pub fn get_liquidation_capacity(&self, market_id: MarketId) -> Result<Option<Decimal>, EngineError> {
        Ok(LiquidationWindow::capacity(&self.market_ref(market_id)?.config))
    }

    /// What the market owes its traders net of what they owe it. Positive is a liability to the pool.
    pub fn get_market_reported_debt(&self, market_id: MarketId) -> Result<Quote, EngineError> {
        let market = self.market_ref(market_id)?;
        let price = self.index_price(market_id)?;
        let accruals = self.projected_accruals(market_id, price)?;
        let unrealized = market.aggregate_unrealized(price, accruals.funding_value(), accruals.utilization_accrued);
        Ok(Quote::new(unrealized - market.total_trader_debt))
    }

    pub fn get_keeper_fee(&self, action: KeeperAction, buffer: Quote) -> Result<Quote, EngineError> {
        self.keeper_fee_for(action, buffer)
    }
}
