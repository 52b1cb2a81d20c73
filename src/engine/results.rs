// 8.0.2: result types and errors for engine operations.

use crate::config::ConfigError;
use crate::credit_pool::CreditPoolError;
use crate::custody::CustodyError;
use crate::events::CancelReason;
use crate::hooks::HookError;
use crate::liquidation::VaultError;
use crate::margin::MarginError;
use crate::oracle::OracleError;
use crate::order::PendingOrder;
use crate::registry::{Feature, Permission};
use crate::types::{AccountId, Address, CollateralId, HookId, MarketId, Price, Quote, Side, SignedSize, Timestamp, VaultId};
use rust_decimal::Decimal;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitResult {
    pub order: PendingOrder,
    pub estimated_fill_price: Price,
    pub estimated_order_fee: Quote,
    pub estimated_keeper_fee: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementResult {
    pub fill_price: Price,
    pub order_fee: Quote,
    pub keeper_fee: Quote,
    /// pnl + funding − utilization of the position before the fill
    pub realized: Quote,
    pub new_size: SignedSize,
    pub debt: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancelResult {
    pub reason: CancelReason,
    pub keeper_fee: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayDebtResult {
    pub from_collateral: Decimal,
    pub from_wallet: Decimal,
    pub remaining_debt: Quote,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlagResult {
    pub health_factor: Decimal,
    pub price: Price,
    pub canceled_order: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidationResult {
    pub account_id: AccountId,
    pub market_id: MarketId,
    pub liquidated_size: Decimal,
    pub remaining_size: SignedSize,
    pub price: Price,
    pub flagger_reward: Quote,
    pub liquidator_reward: Quote,
    /// Debt left after seizing every collateral, absorbed by the pool
    pub bad_debt: Quote,
    pub fully_liquidated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultLiquidationResult {
    pub vault_id: VaultId,
    pub debt_repaid: Quote,
    pub collateral_seized: Decimal,
}

/// Error kinds callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    StateConflict,
    PreconditionNotMet,
    LimitExceeded,
    StalePrice,
    PriceDivergence,
    RateLimited,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("Market {0:?} not found")]
    MarketNotFound(MarketId),

    #[error("Account {0:?} not found")]
    AccountNotFound(AccountId),

    #[error("Collateral {0:?} is not configured")]
    CollateralNotFound(CollateralId),

    #[error("No pending order for {account:?} in {market:?}")]
    OrderNotFound { account: AccountId, market: MarketId },

    #[error("No open position for {account:?} in {market:?}")]
    PositionNotFound { account: AccountId, market: MarketId },

    #[error("Vault {0:?} not found")]
    VaultNotFound(VaultId),

    #[error("Settlement hook {0:?} is not registered or not whitelisted")]
    HookNotFound(HookId),

    #[error("{caller} lacks {permission:?} on {account:?}")]
    PermissionDenied {
        account: AccountId,
        permission: Permission,
        caller: Address,
    },

    #[error("{0} is not the protocol owner")]
    Unauthorized(Address),

    #[error("Feature {0:?} is disabled for this caller")]
    FeatureDisabled(Feature),

    #[error("Only a third-party keeper may cancel a ready order")]
    OwnerCannotCancelReadyOrder,

    #[error("{account:?} already has a pending order in {market:?}")]
    OrderAlreadyPending { account: AccountId, market: MarketId },

    #[error("Position of {account:?} in {market:?} is already flagged")]
    PositionAlreadyFlagged { account: AccountId, market: MarketId },

    #[error("Position of {account:?} in {market:?} is flagged for liquidation")]
    PositionFlagged { account: AccountId, market: MarketId },

    #[error("{account:?} has an open position in {market:?}")]
    OpenPositionExists { account: AccountId, market: MarketId },

    #[error("Collateral {0:?} is still held")]
    CollateralInUse(CollateralId),

    #[error("Vault {0:?} already exists")]
    VaultAlreadyExists(VaultId),

    #[error("Size delta must be non-zero")]
    ZeroSizeOrder,

    #[error("Amount must be non-zero")]
    ZeroAmount,

    #[error("Order not settleable before {ready_at}")]
    OrderNotReady { ready_at: Timestamp },

    #[error("Order expired at {expired_at}")]
    OrderStale { expired_at: Timestamp },

    #[error("Order is not stale until after {stale_after}")]
    OrderNotStale { stale_after: Timestamp },

    #[error("Fill price {fill_price} is outside limit {limit_price}")]
    PriceToleranceExceeded { fill_price: Price, limit_price: Price },

    #[error("Fill price {fill_price} is within limit {limit_price}")]
    PriceToleranceNotExceeded { fill_price: Price, limit_price: Price },

    #[error("A signed price report is required")]
    MissingPriceReport,

    #[error("Insufficient margin: required {required}, available {available}")]
    InsufficientMargin { required: Quote, available: Quote },

    #[error("Margin error: {0}")]
    Margin(#[from] MarginError),

    #[error("{account:?} has no debt in {market:?}")]
    NoDebt { account: AccountId, market: MarketId },

    #[error("Debt of {0} must be paid first")]
    DebtOutstanding(Quote),

    #[error("Nothing to withdraw")]
    NothingToWithdraw,

    #[error("Position is healthy: health factor {health_factor}")]
    PositionNotLiquidatable { health_factor: Decimal },

    #[error("Position of {account:?} in {market:?} is not flagged")]
    PositionNotFlagged { account: AccountId, market: MarketId },

    #[error("Vault: {0}")]
    Vault(#[from] VaultError),

    #[error("Configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("{side:?} open interest {open_interest} would exceed max market size {max}")]
    MaxMarketSizeExceeded {
        side: Side,
        open_interest: Decimal,
        max: Decimal,
    },

    #[error("Leverage {leverage} exceeds max {max}")]
    MaxLeverageExceeded { leverage: Decimal, max: Decimal },

    #[error("Account already holds {0} positions")]
    MaxPositionsPerAccount(u32),

    #[error("Account already holds {0} collateral types")]
    MaxCollateralsPerAccount(u32),

    #[error("{collateral:?} balance {new_total} would exceed cap {max}")]
    MaxCollateralExceeded {
        collateral: CollateralId,
        new_total: Decimal,
        max: Decimal,
    },

    #[error("{requested} hooks requested, at most {max} allowed")]
    TooManyHooks { requested: usize, max: usize },

    #[error("Oracle: {0}")]
    Oracle(#[from] OracleError),

    #[error("Liquidation capacity for {0:?} is exhausted in this window")]
    LiquidationCapacityExhausted(MarketId),

    #[error("Custody: {0}")]
    Custody(#[from] CustodyError),

    #[error("Credit pool: {0}")]
    CreditPool(#[from] CreditPoolError),

    #[error("Hook: {0}")]
    Hook(#[from] HookError),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        use EngineError::*;
        match self {
            MarketNotFound(_)
            | AccountNotFound(_)
            | CollateralNotFound(_)
            | OrderNotFound { .. }
            | PositionNotFound { .. }
            | VaultNotFound(_)
            | HookNotFound(_) => ErrorKind::NotFound,

            PermissionDenied { .. } | Unauthorized(_) | FeatureDisabled(_) | OwnerCannotCancelReadyOrder => {
                ErrorKind::PermissionDenied
            }

            OrderAlreadyPending { .. }
            | PositionAlreadyFlagged { .. }
            | PositionFlagged { .. }
            | OpenPositionExists { .. }
            | CollateralInUse(_)
            | VaultAlreadyExists(_) => ErrorKind::StateConflict,

            ZeroSizeOrder
            | ZeroAmount
            | OrderNotReady { .. }
            | OrderStale { .. }
            | OrderNotStale { .. }
            | PriceToleranceExceeded { .. }
            | PriceToleranceNotExceeded { .. }
            | MissingPriceReport
            | InsufficientMargin { .. }
            | Margin(_)
            | NoDebt { .. }
            | DebtOutstanding(_)
            | NothingToWithdraw
            | PositionNotLiquidatable { .. }
            | PositionNotFlagged { .. }
            | Vault(_)
            | Config(_) => ErrorKind::PreconditionNotMet,

            MaxMarketSizeExceeded { .. }
            | MaxLeverageExceeded { .. }
            | MaxPositionsPerAccount(_)
            | MaxCollateralsPerAccount(_)
            | MaxCollateralExceeded { .. }
            | TooManyHooks { .. } => ErrorKind::LimitExceeded,

            Oracle(OracleError::StalePrice { .. }) => ErrorKind::StalePrice,
            Oracle(OracleError::PriceDivergence { .. }) => ErrorKind::PriceDivergence,
            Oracle(OracleError::FeedNotFound(_)) => ErrorKind::NotFound,
            Oracle(_) => ErrorKind::PreconditionNotMet,

            LiquidationCapacityExhausted(_) => ErrorKind::RateLimited,

            Custody(_) | CreditPool(_) | Hook(_) => ErrorKind::External,
        }
    }

    /// Failures another actor is expected to retry or resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::StalePrice | ErrorKind::PriceDivergence | ErrorKind::RateLimited
        ) || matches!(
            self,
            EngineError::OrderNotReady { .. }
                | EngineError::OrderStale { .. }
                | EngineError::PriceToleranceExceeded { .. }
        )
    }
}
