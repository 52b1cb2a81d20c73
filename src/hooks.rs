// 9.4 hooks.rs: post-settlement callbacks. only whitelisted hooks may be requested, at most N per order.
// a hook that errors fails the whole settlement.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Mutex;

use crate::lock;
use crate::types::{AccountId, MarketId, Price, Quote, SignedSize, Timestamp};

/// What a hook sees about the fill it is attached to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementRecord {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size_delta: Decimal,
    pub fill_price: Price,
    pub order_fee: Quote,
    pub keeper_fee: Quote,
    pub new_size: SignedSize,
    pub settled_at: Timestamp,
}

pub trait SettlementHook: Send + Sync {
    fn on_settle(&self, record: &SettlementRecord) -> Result<(), HookError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Settlement hook rejected: {0}")]
pub struct HookError(pub String);

/// Keeps every record it sees. Optionally rejects, for exercising rollback.
#[derive(Debug, Default)]
pub struct RecordingHook {
    records: Mutex<Vec<SettlementRecord>>,
    reject_with: Mutex<Option<String>>,
}

impl RecordingHook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reject_with(&self, reason: &str) {
        *lock(&self.reject_with) = Some(reason.to_string());
    }

    pub fn records(&self) -> Vec<SettlementRecord> {
        lock(&self.records).clone()
    }
}

impl SettlementHook for RecordingHook {
    fn on_settle(&self, record: &SettlementRecord) -> Result<(), HookError> {
        if let Some(reason) = lock(&self.reject_with).clone() {
            return Err(HookError(reason));
        }
        lock(&self.records).push(record.clone());
        Ok(())
    }
}
