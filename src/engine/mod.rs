// 8.0: the engine. composes the ledger with injected collaborators and exposes
// the order, margin and liquidation entry points plus read views.
// every public mutating call either applies in full or leaves no trace.

mod collateral;
mod config;
mod core;
mod funding;
mod liquidations;
mod orders;
mod results;
mod views;

pub use config::EngineConfig;
pub use self::core::{Engine, Services};
pub use funding::MarketAccruals;
pub use results::{
    CancelResult, CommitResult, EngineError, ErrorKind, FlagResult, LiquidationResult, PayDebtResult,
    SettlementResult, VaultLiquidationResult,
};
pub use views::{AccountDigest, MarketSummary, PositionDigest};
