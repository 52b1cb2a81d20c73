//! Funding and utilization checkpoints.

use super::core::Engine;
use super::results::EngineError;
use crate::events::{EventPayload, FundingRecomputedEvent};
use crate::funding::{utilization, utilization_rate, FundingSnapshot};
use crate::types::{MarketId, Price};
use rust_decimal::Decimal;
use tracing::debug;

/// Accumulators a fill or liquidation is valued against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketAccruals {
    pub funding: FundingSnapshot,
    pub utilization_accrued: Decimal,
    pub utilization_rate: Decimal,
}

impl MarketAccruals {
    pub fn funding_value(&self) -> Decimal {
        self.funding.funding_value
    }
}

impl Engine {
    /// 8.6: checkpoint funding and utilization up to now with the skew and size currently in place.
    /// Runs before every skew change so the pre-change velocity is what accrues.
    pub(super) fn recompute_market(&mut self, market_id: MarketId, price: Price) -> Result<MarketAccruals, EngineError> {
        let capacity = self.services.credit_pool.credit_capacity(market_id);
        let now = self.current_time;
        let market = self.market_mut(market_id)?;

        let funding = market.recompute_funding(price, now);
        let params = market.config.utilization;
        let rate = utilization_rate(utilization(market.size, price, capacity, &params), &params);
        let utilization_accrued = market.utilization.recompute(price, now, rate);
        let skew = market.skew;

        debug!(
            market = ?market_id,
            %skew,
            rate = %funding.funding_rate,
            velocity = %funding.funding_velocity,
            value = %funding.funding_value,
            utilization_rate = %rate,
            "funding recomputed"
        );
        self.emit_event(EventPayload::FundingRecomputed(FundingRecomputedEvent {
            market_id,
            skew,
            funding_rate: funding.funding_rate,
            funding_velocity: funding.funding_velocity,
            funding_value: funding.funding_value,
            utilization_rate: rate,
        }));

        Ok(MarketAccruals {
            funding,
            utilization_accrued,
            utilization_rate: rate,
        })
    }

    /// Installs the utilization rate for the size left after a trade. Nothing accrues, no time has passed.
    pub(super) fn refresh_utilization_rate(&mut self, market_id: MarketId, price: Price) -> Result<Decimal, EngineError> {
        let capacity = self.services.credit_pool.credit_capacity(market_id);
        let now = self.current_time;
        let market = self.market_mut(market_id)?;

        let params = market.config.utilization;
        let rate = utilization_rate(utilization(market.size, price, capacity, &params), &params);
        market.utilization.recompute(price, now, rate);
        Ok(rate)
    }

    /// Accumulators as of now without persisting anything. Used by views and previews.
    pub(super) fn projected_accruals(&self, market_id: MarketId, price: Price) -> Result<MarketAccruals, EngineError> {
        let market = self.market_ref(market_id)?;
        Ok(MarketAccruals {
            funding: market.project_funding(price, self.current_time),
            utilization_accrued: market.utilization.accrued_at(price, self.current_time),
            utilization_rate: market.utilization.current_rate,
        })
    }
}
