// 2.0: pending orders. one per account per market. commit records intent, a keeper settles later.
// NONE → PENDING → {SETTLED, CANCELED, CLEARED} → NONE. the ledger entry is the PENDING state.

use crate::types::{AccountId, HookId, MarketId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// What a trader submits to commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size_delta: Decimal,
    // worst acceptable fill: ceiling for buys, floor for sells
    pub limit_price: Price,
    pub keeper_fee_buffer_usd: Quote,
    pub hooks: Vec<HookId>,
}

impl OrderRequest {
    pub fn new(account_id: AccountId, market_id: MarketId, size_delta: Decimal, limit_price: Price) -> Self {
        Self {
            account_id,
            market_id,
            size_delta,
            limit_price,
            keeper_fee_buffer_usd: Quote::zero(),
            hooks: Vec::new(),
        }
    }

    pub fn with_keeper_fee_buffer(mut self, buffer: Quote) -> Self {
        self.keeper_fee_buffer_usd = buffer;
        self
    }

    pub fn with_hooks(mut self, hooks: Vec<HookId>) -> Self {
        self.hooks = hooks;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size_delta: Decimal,
    pub limit_price: Price,
    pub keeper_fee_buffer_usd: Quote,
    pub hooks: Vec<HookId>,
    pub commitment_time: Timestamp,
}

/// Where a pending order sits relative to its settlement window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderReadiness {
    /// before commitment + min age
    TooEarly,
    /// inside [commitment + min age, commitment + max age]
    Ready,
    /// after commitment + max age
    Stale,
}

impl PendingOrder {
    pub fn from_request(request: OrderRequest, commitment_time: Timestamp) -> Self {
        Self {
            account_id: request.account_id,
            market_id: request.market_id,
            size_delta: request.size_delta,
            limit_price: request.limit_price,
            keeper_fee_buffer_usd: request.keeper_fee_buffer_usd,
            hooks: request.hooks,
            commitment_time,
        }
    }

    pub fn is_buy(&self) -> bool {
        self.size_delta > Decimal::ZERO
    }

    pub fn settlement_window(&self, min_age_secs: u64, max_age_secs: u64) -> (Timestamp, Timestamp) {
        (
            self.commitment_time.plus_secs(min_age_secs),
            self.commitment_time.plus_secs(max_age_secs),
        )
    }

    // 2.1: both window edges are settleable
    pub fn readiness(&self, now: Timestamp, min_age_secs: u64, max_age_secs: u64) -> OrderReadiness {
        let (ready_at, expires_at) = self.settlement_window(min_age_secs, max_age_secs);
        if now < ready_at {
            OrderReadiness::TooEarly
        } else if now > expires_at {
            OrderReadiness::Stale
        } else {
            OrderReadiness::Ready
        }
    }

    // 2.2: a buy must not fill above the limit, a sell must not fill below it
    pub fn is_within_tolerance(&self, fill_price: Price) -> bool {
        if self.is_buy() {
            fill_price <= self.limit_price
        } else {
            fill_price >= self.limit_price
        }
    }
}

/// Read view of a pending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderDigest {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size_delta: Decimal,
    pub limit_price: Price,
    pub keeper_fee_buffer_usd: Quote,
    pub commitment_time: Timestamp,
    pub ready_at: Timestamp,
    pub expires_at: Timestamp,
    pub readiness: OrderReadiness,
}

impl OrderDigest {
    pub fn new(order: &PendingOrder, now: Timestamp, min_age_secs: u64, max_age_secs: u64) -> Self {
        let (ready_at, expires_at) = order.settlement_window(min_age_secs, max_age_secs);
        Self {
            account_id: order.account_id,
            market_id: order.market_id,
            size_delta: order.size_delta,
            limit_price: order.limit_price,
            keeper_fee_buffer_usd: order.keeper_fee_buffer_usd,
            commitment_time: order.commitment_time,
            ready_at,
            expires_at,
            readiness: order.readiness(now, min_age_secs, max_age_secs),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.readiness == OrderReadiness::Stale
    }

    pub fn is_ready(&self) -> bool {
        self.readiness == OrderReadiness::Ready
    }
}
