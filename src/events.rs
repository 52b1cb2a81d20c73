// 11.0: every state change produces an event. used for audit trails and for the scenario tests.
// events from a call that fails are dropped along with the rest of its state change.

use crate::fees::KeeperAction;
use crate::types::{AccountId, Address, CollateralId, MarketId, Price, Quote, SignedSize, Timestamp, VaultId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(pub u64);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(id: EventId, timestamp: Timestamp, payload: EventPayload) -> Self {
        Self {
            id,
            timestamp,
            payload,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    // Configuration events
    MarketConfigured(MarketConfiguredEvent),
    CollateralConfigured(CollateralConfiguredEvent),
    SettlementHooksConfigured(SettlementHooksConfiguredEvent),
    PerAccountCapsSet(PerAccountCapsSetEvent),
    KeeperFeeConfigured,

    // Market events
    FundingRecomputed(FundingRecomputedEvent),

    // Order events
    OrderCommitted(OrderCommittedEvent),
    OrderSettled(OrderSettledEvent),
    OrderCanceled(OrderCanceledEvent),

    // Margin events
    CollateralModified(CollateralModifiedEvent),
    DebtPaid(DebtPaidEvent),
    KeeperPaid(KeeperPaidEvent),

    // Liquidation events
    PositionFlagged(PositionFlaggedEvent),
    PositionLiquidated(PositionLiquidatedEvent),
    CollateralSeized(CollateralSeizedEvent),
    DebtRedistributed(DebtRedistributedEvent),

    // Vault events
    VaultRegistered(VaultRegisteredEvent),
    VaultUpdated(VaultUpdatedEvent),
    VaultLiquidated(VaultLiquidatedEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketConfiguredEvent {
    pub market_id: MarketId,
    pub name: String,
    pub created: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralConfiguredEvent {
    pub collaterals: Vec<CollateralId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementHooksConfiguredEvent {
    pub whitelisted: usize,
    pub max_hooks_per_order: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerAccountCapsSetEvent {
    pub max_positions_per_account: u32,
    pub max_collaterals_per_account: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FundingRecomputedEvent {
    pub market_id: MarketId,
    pub skew: SignedSize,
    pub funding_rate: Decimal,
    pub funding_velocity: Decimal,
    pub funding_value: Decimal,
    pub utilization_rate: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCommittedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub size_delta: Decimal,
    pub limit_price: Price,
    pub keeper_fee_buffer_usd: Quote,
    pub estimated_fill_price: Price,
    pub commitment_time: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderSettledEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub keeper: Address,
    pub size_delta: Decimal,
    pub fill_price: Price,
    pub order_fee: Quote,
    pub keeper_fee: Quote,
    /// pnl + funding − utilization of the previous position
    pub realized: Quote,
    pub new_size: SignedSize,
    pub debt: Quote,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelReason {
    Stale,
    PriceToleranceExceeded,
    ClearedStale,
    Liquidation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderCanceledEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub reason: CancelReason,
    pub keeper_fee: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralModifiedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub collateral_id: CollateralId,
    pub amount_delta: Decimal,
    pub new_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtPaidEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub from_collateral: Decimal,
    pub from_wallet: Decimal,
    pub remaining_debt: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperPaidEvent {
    pub market_id: MarketId,
    pub recipient: Address,
    pub action: KeeperAction,
    pub amount: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionFlaggedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub flagger: Address,
    pub size: SignedSize,
    pub price: Price,
    pub health_factor: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionLiquidatedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub liquidator: Address,
    pub liquidated_size: Decimal,
    pub remaining_size: SignedSize,
    pub price: Price,
    pub flagger_reward: Quote,
    pub liquidator_reward: Quote,
    pub bad_debt: Quote,
    pub fully_liquidated: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollateralSeizedEvent {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub collateral_id: CollateralId,
    pub amount: Decimal,
}

/// Bad debt left by a liquidation. `recipients` is 0 when the pool absorbed it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebtRedistributedEvent {
    pub market_id: MarketId,
    pub liquidated_account: AccountId,
    pub amount: Quote,
    pub recipients: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultRegisteredEvent {
    pub vault_id: VaultId,
    pub collateral_id: CollateralId,
    pub liquidation_ratio: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultUpdatedEvent {
    pub vault_id: VaultId,
    pub collateral_amount: Decimal,
    pub debt_usd: Quote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultLiquidatedEvent {
    pub vault_id: VaultId,
    pub liquidator_account: AccountId,
    pub debt_repaid: Quote,
    pub collateral_seized: Decimal,
    pub collateralization_ratio: Decimal,
}

impl EventPayload {
    pub fn name(&self) -> &'static str {
        match self {
            EventPayload::MarketConfigured(_) => "market_configured",
            EventPayload::CollateralConfigured(_) => "collateral_configured",
            EventPayload::SettlementHooksConfigured(_) => "settlement_hooks_configured",
            EventPayload::PerAccountCapsSet(_) => "per_account_caps_set",
            EventPayload::KeeperFeeConfigured => "keeper_fee_configured",
            EventPayload::FundingRecomputed(_) => "funding_recomputed",
            EventPayload::OrderCommitted(_) => "order_committed",
            EventPayload::OrderSettled(_) => "order_settled",
            EventPayload::OrderCanceled(_) => "order_canceled",
            EventPayload::CollateralModified(_) => "collateral_modified",
            EventPayload::DebtPaid(_) => "debt_paid",
            EventPayload::KeeperPaid(_) => "keeper_paid",
            EventPayload::PositionFlagged(_) => "position_flagged",
            EventPayload::PositionLiquidated(_) => "position_liquidated",
            EventPayload::CollateralSeized(_) => "collateral_seized",
            EventPayload::DebtRedistributed(_) => "debt_redistributed",
            EventPayload::VaultRegistered(_) => "vault_registered",
            EventPayload::VaultUpdated(_) => "vault_updated",
            EventPayload::VaultLiquidated(_) => "vault_liquidated",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn payload_serializes_with_variant_tag() {
        let event = Event::new(
            EventId(1),
            Timestamp::from_secs(5),
            EventPayload::OrderCanceled(OrderCanceledEvent {
                account_id: AccountId(1),
                market_id: MarketId(1),
                reason: CancelReason::Stale,
                keeper_fee: Quote::new(dec!(2)),
            }),
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("OrderCanceled"));
        assert!(json.contains("Stale"));
        assert_eq!(event.payload.name(), "order_canceled");
    }
}
