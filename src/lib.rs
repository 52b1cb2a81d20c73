// skew-perps: perpetual futures engine without an order book.
// fills are priced off market skew, orders settle asynchronously through keepers,
// liquidations are throttled per market. all collaborators are injected.
//
// file map (search X.0 for structs, X.1+ for logic):
//   1.x  types.rs: primitives: ids, Side, SignedSize, Price, Quote, Timestamp
//   2.x  order.rs: pending orders, settlement window, limit tolerance
//   3.x  margin.rs: collateral balances, debt, health
//   3.2  liquidation.rs: liquidation window, rewards, vaults
//   4.x  position.rs: position, accruals, margin requirement, fills
//   5.x  funding.rs: fill price, order fee, funding and utilization
//   6.x  fees.rs: keeper fees
//   7.x  config.rs: protocol config, collaterals, caps, env presets
//   8.x  engine/: order lifecycle, collateral, liquidations, views
//   9.x  oracle.rs, registry.rs, custody.rs, credit_pool.rs, hooks.rs: collaborators
//   10.x ledger.rs: all mutable state
//   11.x events.rs: state transition events for audit
//   12.x market.rs: market config + runtime state

use std::sync::{Mutex, MutexGuard};

// core modules
pub mod engine;
pub mod events;
pub mod fees;
pub mod funding;
pub mod ledger;
pub mod liquidation;
pub mod margin;
pub mod market;
pub mod order;
pub mod position;
pub mod types;

// collaborators
pub mod config;
pub mod credit_pool;
pub mod custody;
pub mod hooks;
pub mod oracle;
pub mod registry;

// re exports for convenience
pub use config::{
    AccountCaps, CollateralConfig, ConfigError, Environment, KeeperFeeConfig, ProtocolConfig, SettlementHookConfig,
    SUSD, WBTC, WETH,
};
pub use credit_pool::{CreditPool, CreditPoolError, InMemoryCreditPool};
pub use custody::{CollateralCustody, CustodyError, InMemoryCustody};
pub use engine::*;
pub use events::*;
pub use fees::*;
pub use funding::*;
pub use hooks::{HookError, RecordingHook, SettlementHook, SettlementRecord};
pub use ledger::Ledger;
pub use liquidation::*;
pub use margin::*;
pub use market::*;
pub use oracle::{InMemoryOracle, OracleError, PriceOracle, PriceOracleAdapter, PriceReport, VerifiedPrice};
pub use order::*;
pub use position::*;
pub use registry::{AccountRegistry, Feature, FeatureFlags, FeatureGate, InMemoryRegistry, Permission};
pub use types::*;

/// Locks a collaborator's state. A poisoned lock still holds consistent data, every writer is a single insert.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
