// 9.0 registry.rs: who may act on which account, and which entry points are switched on.
// the engine only asks questions. account creation and grants belong to the registry.

use crate::lock;
use crate::types::{AccountId, Address};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    CommitOrder,
    ModifyCollateral,
    PayDebt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    CommitOrder,
    SettleOrder,
    CancelOrder,
    ClearStaleOrder,
    ModifyCollateral,
    PayDebt,
    FlagPosition,
    LiquidatePosition,
    LiquidateVault,
}

pub trait AccountRegistry: Send + Sync {
    fn account_exists(&self, account: AccountId) -> bool;

    fn owner_of(&self, account: AccountId) -> Option<Address>;

    /// Owners hold every permission on their own account.
    fn has_permission(&self, account: AccountId, permission: Permission, caller: Address) -> bool;

    fn is_protocol_owner(&self, caller: Address) -> bool;

    /// Vault liquidation is a protocol role, not an account permission.
    fn is_authorized_liquidator(&self, caller: Address) -> bool;
}

pub trait FeatureGate: Send + Sync {
    fn is_enabled(&self, feature: Feature, caller: Address) -> bool;
}

#[derive(Debug, Clone)]
struct AccountRecord {
    owner: Address,
    grants: BTreeMap<Address, BTreeSet<Permission>>,
}

#[derive(Debug)]
pub struct InMemoryRegistry {
    protocol_owner: Address,
    accounts: Mutex<BTreeMap<AccountId, AccountRecord>>,
    liquidators: Mutex<BTreeSet<Address>>,
}

impl InMemoryRegistry {
    pub fn new(protocol_owner: Address) -> Self {
        Self {
            protocol_owner,
            accounts: Mutex::new(BTreeMap::new()),
            liquidators: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn authorize_liquidator(&self, liquidator: Address) {
        lock(&self.liquidators).insert(liquidator);
    }

    pub fn create_account(&self, owner: Address) -> AccountId {
        let mut accounts = lock(&self.accounts);
        let id = AccountId(accounts.len() as u64 + 1);
        accounts.insert(
            id,
            AccountRecord {
                owner,
                grants: BTreeMap::new(),
            },
        );
        id
    }

    /// Returns false when the account does not exist.
    pub fn grant(&self, account: AccountId, grantee: Address, permission: Permission) -> bool {
        match lock(&self.accounts).get_mut(&account) {
            Some(record) => {
                record.grants.entry(grantee).or_default().insert(permission);
                true
            }
            None => false,
        }
    }

    pub fn revoke(&self, account: AccountId, grantee: Address, permission: Permission) {
        if let Some(record) = lock(&self.accounts).get_mut(&account) {
            if let Some(set) = record.grants.get_mut(&grantee) {
                set.remove(&permission);
            }
        }
    }
}

impl AccountRegistry for InMemoryRegistry {
    fn account_exists(&self, account: AccountId) -> bool {
        lock(&self.accounts).contains_key(&account)
    }

    fn owner_of(&self, account: AccountId) -> Option<Address> {
        lock(&self.accounts).get(&account).map(|record| record.owner)
    }

    fn has_permission(&self, account: AccountId, permission: Permission, caller: Address) -> bool {
        lock(&self.accounts).get(&account).is_some_and(|record| {
            record.owner == caller
                || record
                    .grants
                    .get(&caller)
                    .is_some_and(|set| set.contains(&permission))
        })
    }

    fn is_protocol_owner(&self, caller: Address) -> bool {
        caller == self.protocol_owner
    }

    fn is_authorized_liquidator(&self, caller: Address) -> bool {
        caller == self.protocol_owner || lock(&self.liquidators).contains(&caller)
    }
}

/// Everything on by default. A feature can be switched off globally or for one caller.
#[derive(Debug, Default)]
pub struct FeatureFlags {
    disabled: Mutex<BTreeSet<Feature>>,
    denied: Mutex<BTreeMap<Feature, BTreeSet<Address>>>,
}

impl FeatureFlags {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn disable(&self, feature: Feature) {
        lock(&self.disabled).insert(feature);
    }

    pub fn enable(&self, feature: Feature) {
        lock(&self.disabled).remove(&feature);
    }

    pub fn deny(&self, feature: Feature, caller: Address) {
        lock(&self.denied).entry(feature).or_default().insert(caller);
    }
}

impl FeatureGate for FeatureFlags {
    fn is_enabled(&self, feature: Feature, caller: Address) -> bool {
        if lock(&self.disabled).contains(&feature) {
            return false;
        }
        !lock(&self.denied)
            .get(&feature)
            .is_some_and(|callers| callers.contains(&caller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_has_every_permission() {
        let registry = InMemoryRegistry::new(Address(1));
        let account = registry.create_account(Address(42));
        assert!(registry.account_exists(account));
        assert_eq!(registry.owner_of(account), Some(Address(42)));
        assert!(registry.has_permission(account, Permission::CommitOrder, Address(42)));
        assert!(registry.has_permission(account, Permission::PayDebt, Address(42)));
        assert!(!registry.has_permission(account, Permission::CommitOrder, Address(43)));
        assert!(!registry.has_permission(AccountId(99), Permission::CommitOrder, Address(42)));
    }

    #[test]
    fn grants_are_per_permission() {
        let registry = InMemoryRegistry::new(Address(1));
        let account = registry.create_account(Address(42));
        assert!(registry.grant(account, Address(7), Permission::ModifyCollateral));
        assert!(registry.has_permission(account, Permission::ModifyCollateral, Address(7)));
        assert!(!registry.has_permission(account, Permission::CommitOrder, Address(7)));

        registry.revoke(account, Address(7), Permission::ModifyCollateral);
        assert!(!registry.has_permission(account, Permission::ModifyCollateral, Address(7)));
        assert!(!registry.grant(AccountId(99), Address(7), Permission::PayDebt));
    }

    #[test]
    fn feature_flags_global_and_per_caller() {
        let flags = FeatureFlags::new();
        assert!(flags.is_enabled(Feature::SettleOrder, Address(1)));

        flags.deny(Feature::SettleOrder, Address(1));
        assert!(!flags.is_enabled(Feature::SettleOrder, Address(1)));
        assert!(flags.is_enabled(Feature::SettleOrder, Address(2)));

        flags.disable(Feature::CommitOrder);
        assert!(!flags.is_enabled(Feature::CommitOrder, Address(2)));
        flags.enable(Feature::CommitOrder);
        assert!(flags.is_enabled(Feature::CommitOrder, Address(2)));
    }

    #[test]
    fn protocol_roles() {
        let registry = InMemoryRegistry::new(Address(1));
        assert!(registry.is_protocol_owner(Address(1)));
        assert!(!registry.is_protocol_owner(Address(2)));

        assert!(!registry.is_authorized_liquidator(Address(2)));
        registry.authorize_liquidator(Address(2));
        assert!(registry.is_authorized_liquidator(Address(2)));
    }
}
