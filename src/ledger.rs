// 10.0 ledger.rs: every piece of mutable engine state, keyed the way it is looked up.
// (account, market) for positions, orders, margin and flags. market and vault ids for the rest.
// Clone is the snapshot the engine restores when a call fails.

use crate::liquidation::{FlagRecord, Vault};
use crate::margin::MarginAccount;
use crate::market::MarketState;
use crate::order::PendingOrder;
use crate::position::Position;
use crate::types::{AccountId, CollateralId, MarketId, VaultId};
use std::collections::{BTreeMap, BTreeSet};

pub type AccountMarket = (AccountId, MarketId);

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    pub markets: BTreeMap<MarketId, MarketState>,
    pub positions: BTreeMap<AccountMarket, Position>,
    pub orders: BTreeMap<AccountMarket, PendingOrder>,
    pub margins: BTreeMap<AccountMarket, MarginAccount>,
    pub flags: BTreeMap<AccountMarket, FlagRecord>,
    pub vaults: BTreeMap<VaultId, Vault>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn market(&self, market_id: MarketId) -> Option<&MarketState> {
        self.markets.get(&market_id)
    }

    pub fn market_mut(&mut self, market_id: MarketId) -> Option<&mut MarketState> {
        self.markets.get_mut(&market_id)
    }

    pub fn position(&self, account_id: AccountId, market_id: MarketId) -> Option<&Position> {
        self.positions.get(&(account_id, market_id))
    }

    /// Replaces the position, or removes it when `None`. Market aggregates are the caller's job.
    pub fn set_position(&mut self, account_id: AccountId, market_id: MarketId, position: Option<Position>) {
        match position {
            Some(position) => {
                self.positions.insert((account_id, market_id), position);
            }
            None => {
                self.positions.remove(&(account_id, market_id));
            }
        }
    }

    pub fn order(&self, account_id: AccountId, market_id: MarketId) -> Option<&PendingOrder> {
        self.orders.get(&(account_id, market_id))
    }

    pub fn take_order(&mut self, account_id: AccountId, market_id: MarketId) -> Option<PendingOrder> {
        self.orders.remove(&(account_id, market_id))
    }

    pub fn margin(&self, account_id: AccountId, market_id: MarketId) -> MarginAccount {
        self.margins.get(&(account_id, market_id)).cloned().unwrap_or_default()
    }

    /// Writes the margin account back and keeps the market's debt total in step.
    pub fn store_margin(&mut self, account_id: AccountId, market_id: MarketId, margin: MarginAccount) {
        let key = (account_id, market_id);
        let old_debt = self.margins.get(&key).map(|m| m.debt.value()).unwrap_or_default();
        let new_debt = margin.debt.value();
        if let Some(market) = self.markets.get_mut(&market_id) {
            market.total_trader_debt += new_debt - old_debt;
        }
        if margin.is_empty() {
            self.margins.remove(&key);
        } else {
            self.margins.insert(key, margin);
        }
    }

    pub fn flag(&self, account_id: AccountId, market_id: MarketId) -> Option<&FlagRecord> {
        self.flags.get(&(account_id, market_id))
    }

    pub fn is_flagged(&self, account_id: AccountId, market_id: MarketId) -> bool {
        self.flags.contains_key(&(account_id, market_id))
    }

    pub fn open_position_count(&self, account_id: AccountId) -> usize {
        self.positions.keys().filter(|(account, _)| *account == account_id).count()
    }

    /// Distinct collateral types the account holds in any market.
    pub fn collateral_types_held(&self, account_id: AccountId) -> BTreeSet<CollateralId> {
        self.margins
            .iter()
            .filter(|((account, _), _)| *account == account_id)
            .flat_map(|(_, margin)| margin.collaterals.keys().copied())
            .collect()
    }

    pub fn positions_in_market(&self, market_id: MarketId) -> impl Iterator<Item = &Position> {
        self.positions
            .iter()
            .filter(move |((_, market), _)| *market == market_id)
            .map(|(_, position)| position)
    }

    pub fn is_collateral_in_use(&self, collateral: CollateralId) -> bool {
        self.margins.values().any(|margin| margin.holds(collateral))
            || self.vaults.values().any(|vault| vault.collateral_id == collateral)
    }
}
