// 9.2 custody.rs: token movement between wallets and the engine. all-or-nothing per call.
// the engine calls these last, after its own state is updated.

use rust_decimal::Decimal;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use crate::lock;
use crate::types::{Address, CollateralId};

pub trait CollateralCustody: Send + Sync {
    /// Pull `amount` from `from`'s wallet into the engine.
    fn transfer_in(&self, from: Address, collateral: CollateralId, amount: Decimal) -> Result<(), CustodyError>;

    /// Push `amount` out of the engine to `to`'s wallet.
    fn transfer_out(&self, to: Address, collateral: CollateralId, amount: Decimal) -> Result<(), CustodyError>;
}

// Errors from custody operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CustodyError {
    #[error("{owner} holds {available} of {collateral:?}, requested {requested}")]
    InsufficientBalance {
        owner: Address,
        collateral: CollateralId,
        available: Decimal,
        requested: Decimal,
    },
    #[error("Transfers for {0} are locked")]
    TransfersLocked(Address),
    #[error("Transfer amount must be positive")]
    InvalidAmount,
}

#[derive(Debug, Default)]
struct Ledger {
    wallets: BTreeMap<(Address, CollateralId), Decimal>,
    // what the engine holds per collateral type. may go negative when the
    // pool funds payouts that never came through transfer_in.
    held: BTreeMap<CollateralId, Decimal>,
    locked: BTreeSet<Address>,
    total_in: Decimal,
    total_out: Decimal,
}

// Wallet balances in memory. Test setups mint into wallets directly.
#[derive(Debug, Default)]
pub struct InMemoryCustody {
    inner: Mutex<Ledger>,
}

impl InMemoryCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mint(&self, owner: Address, collateral: CollateralId, amount: Decimal) {
        *lock(&self.inner).wallets.entry((owner, collateral)).or_insert(Decimal::ZERO) += amount;
    }

    pub fn balance_of(&self, owner: Address, collateral: CollateralId) -> Decimal {
        lock(&self.inner)
            .wallets
            .get(&(owner, collateral))
            .copied()
            .unwrap_or(Decimal::ZERO)
    }

    pub fn held(&self, collateral: CollateralId) -> Decimal {
        lock(&self.inner).held.get(&collateral).copied().unwrap_or(Decimal::ZERO)
    }

    /// (total transferred in, total transferred out)
    pub fn totals(&self) -> (Decimal, Decimal) {
        let inner = lock(&self.inner);
        (inner.total_in, inner.total_out)
    }

    /// Every transfer touching `owner` fails until unlocked.
    pub fn lock_transfers(&self, owner: Address) {
        lock(&self.inner).locked.insert(owner);
    }

    pub fn unlock_transfers(&self, owner: Address) {
        lock(&self.inner).locked.remove(&owner);
    }
}

impl CollateralCustody for InMemoryCustody {
    fn transfer_in(&self, from: Address, collateral: CollateralId, amount: Decimal) -> Result<(), CustodyError> {
        if amount <= Decimal::ZERO {
            return Err(CustodyError::InvalidAmount);
        }
        let mut inner = lock(&self.inner);
        if inner.locked.contains(&from) {
            return Err(CustodyError::TransfersLocked(from));
        }
        let available = inner.wallets.get(&(from, collateral)).copied().unwrap_or(Decimal::ZERO);
        if available < amount {
            return Err(CustodyError::InsufficientBalance {
                owner: from,
                collateral,
                available,
                requested: amount,
            });
        }
        inner.wallets.insert((from, collateral), available - amount);
        *inner.held.entry(collateral).or_insert(Decimal::ZERO) += amount;
        inner.total_in += amount;
        Ok(())
    }

    fn transfer_out(&self, to: Address, collateral: CollateralId, amount: Decimal) -> Result<(), CustodyError> {
        if amount <= Decimal::ZERO {
            return Err(CustodyError::InvalidAmount);
        }
        let mut inner = lock(&self.inner);
        if inner.locked.contains(&to) {
            return Err(CustodyError::TransfersLocked(to));
        }
        *inner.wallets.entry((to, collateral)).or_insert(Decimal::ZERO) += amount;
        *inner.held.entry(collateral).or_insert(Decimal::ZERO) -= amount;
        inner.total_out += amount;
        Ok(())
    }
}
