// 8.0 engine/core.rs: main engine. owns the ledger, talks to collaborators through injected services.

use super::config::EngineConfig;
use super::results::EngineError;
use crate::config::{AccountCaps, CollateralConfig, KeeperFeeConfig, ProtocolConfig, SettlementHookConfig};
use crate::credit_pool::CreditPool;
use crate::custody::CollateralCustody;
use crate::events::{
    CollateralConfiguredEvent, Event, EventId, EventPayload, KeeperPaidEvent, MarketConfiguredEvent,
    PerAccountCapsSetEvent, SettlementHooksConfiguredEvent,
};
use crate::fees::{keeper_fee, KeeperAction};
use crate::hooks::SettlementHook;
use crate::ledger::Ledger;
use crate::margin::{CollateralQuote, MarginAccount};
use crate::market::{MarketConfig, MarketState};
use crate::oracle::{PriceOracle, PriceOracleAdapter};
use crate::registry::{AccountRegistry, Feature, FeatureGate, Permission};
use crate::types::{AccountId, Address, CollateralId, HookId, MarketId, Price, Quote, Timestamp};
use rust_decimal::Decimal;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Collaborators the engine calls out to. Everything else it owns.
#[derive(Clone)]
pub struct Services {
    pub registry: Arc<dyn AccountRegistry>,
    pub features: Arc<dyn FeatureGate>,
    pub custody: Arc<dyn CollateralCustody>,
    pub credit_pool: Arc<dyn CreditPool>,
    pub oracle: Arc<dyn PriceOracle>,
}

/** 8.1: main engine struct. all mutable state lives in the ledger */
pub struct Engine {
    pub(super) config: EngineConfig,
    pub(super) protocol: ProtocolConfig,
    pub(super) services: Services,
    pub(super) hooks: BTreeMap<HookId, Arc<dyn SettlementHook>>,
    pub(super) ledger: Ledger,
    pub(super) events: Vec<Event>,
    pub(super) pending_events: Vec<Event>,
    pub(super) next_event_id: u64,
    pub(super) current_time: Timestamp,
    pub(super) base_fee_per_gas_gwei: Decimal,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("protocol", &self.protocol)
            .field("hooks", &self.hooks.keys().collect::<Vec<_>>())
            .field("ledger", &self.ledger)
            .field("events", &self.events.len())
            .field("current_time", &self.current_time)
            .field("base_fee_per_gas_gwei", &self.base_fee_per_gas_gwei)
            .finish()
    }
}

impl Engine {
    /// Validates the protocol configuration and opens every market it lists.
    pub fn new(config: EngineConfig, protocol: ProtocolConfig, services: Services) -> Result<Self, EngineError> {
        protocol.validate()?;

        let mut ledger = Ledger::new();
        let genesis = Timestamp::from_millis(0);
        for market in &protocol.markets {
            ledger.markets.insert(market.id, MarketState::new(market.clone(), genesis));
        }

        info!(markets = protocol.markets.len(), collaterals = protocol.collaterals.len(), "engine started");

        Ok(Self {
            base_fee_per_gas_gwei: config.initial_base_fee_per_gas_gwei,
            config,
            protocol,
            services,
            hooks: BTreeMap::new(),
            ledger,
            events: Vec::new(),
            pending_events: Vec::new(),
            next_event_id: 1,
            current_time: genesis,
        })
    }

    pub fn set_time(&mut self, timestamp: Timestamp) {
        self.current_time = timestamp;
    }

    pub fn time(&self) -> Timestamp {
        self.current_time
    }

    pub fn advance_secs(&mut self, secs: u64) {
        self.current_time = self.current_time.plus_secs(secs);
    }

    /// Gas price keepers are compensated at.
    pub fn set_base_fee_per_gas(&mut self, gwei: Decimal) {
        self.base_fee_per_gas_gwei = gwei.max(Decimal::ZERO);
    }

    pub fn protocol_config(&self) -> &ProtocolConfig {
        &self.protocol
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    // ---- 8.2: administration. protocol owner only ----

    /// Creates the market or replaces its parameters. Funding is checkpointed under the old
    /// parameters first so the new velocity only applies from now on.
    pub fn set_market_configuration(&mut self, caller: Address, market: MarketConfig) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            market.validate()?;

            let market_id = market.id;
            let name = market.name.clone();
            let created = !engine.ledger.markets.contains_key(&market_id);
            if created {
                let state = MarketState::new(market.clone(), engine.current_time);
                engine.ledger.markets.insert(market_id, state);
            } else {
                if let Ok(price) = engine.index_price(market_id) {
                    engine.recompute_market(market_id, price)?;
                }
                engine.market_mut(market_id)?.config = market.clone();
            }

            match engine.protocol.markets.iter_mut().find(|m| m.id == market_id) {
                Some(existing) => *existing = market,
                None => engine.protocol.markets.push(market),
            }

            info!(market = ?market_id, %name, created, "market configured");
            engine.emit_event(EventPayload::MarketConfigured(MarketConfiguredEvent {
                market_id,
                name,
                created,
            }));
            Ok(())
        })
    }

    /// Replaces the collateral list. A type still held by an account or vault cannot be dropped.
    pub fn set_collateral_configuration(
        &mut self,
        caller: Address,
        collaterals: Vec<CollateralConfig>,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;

            let mut next = engine.protocol.clone();
            next.collaterals = collaterals;
            next.validate()?;

            for existing in &engine.protocol.collaterals {
                let kept = next.collaterals.iter().any(|c| c.id == existing.id);
                if !kept && engine.ledger.is_collateral_in_use(existing.id) {
                    return Err(EngineError::CollateralInUse(existing.id));
                }
            }

            let ids: Vec<CollateralId> = next.collaterals.iter().map(|c| c.id).collect();
            engine.protocol = next;

            info!(collaterals = ids.len(), "collateral configured");
            engine.emit_event(EventPayload::CollateralConfigured(CollateralConfiguredEvent {
                collaterals: ids,
            }));
            Ok(())
        })
    }

    /// Makes a hook callable by id. Whitelisting is a separate step.
    pub fn register_settlement_hook(
        &mut self,
        caller: Address,
        hook_id: HookId,
        hook: Arc<dyn SettlementHook>,
    ) -> Result<(), EngineError> {
        self.ensure_owner(caller)?;
        self.hooks.insert(hook_id, hook);
        debug!(hook = ?hook_id, "settlement hook registered");
        Ok(())
    }

    pub fn set_settlement_hook_configuration(
        &mut self,
        caller: Address,
        hooks: SettlementHookConfig,
    ) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            if let Some(missing) = hooks.whitelisted.iter().find(|id| !engine.hooks.contains_key(*id)) {
                return Err(EngineError::HookNotFound(*missing));
            }

            let event = SettlementHooksConfiguredEvent {
                whitelisted: hooks.whitelisted.len(),
                max_hooks_per_order: hooks.max_hooks_per_order,
            };
            engine.protocol.hooks = hooks;

            info!(whitelisted = event.whitelisted, max = event.max_hooks_per_order, "settlement hooks configured");
            engine.emit_event(EventPayload::SettlementHooksConfigured(event));
            Ok(())
        })
    }

    /// Lowering a cap never touches what accounts already hold.
    pub fn set_per_account_caps(&mut self, caller: Address, caps: AccountCaps) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            engine.protocol.caps = caps;

            info!(
                max_positions = caps.max_positions_per_account,
                max_collaterals = caps.max_collaterals_per_account,
                "per-account caps set"
            );
            engine.emit_event(EventPayload::PerAccountCapsSet(PerAccountCapsSetEvent {
                max_positions_per_account: caps.max_positions_per_account,
                max_collaterals_per_account: caps.max_collaterals_per_account,
            }));
            Ok(())
        })
    }

    pub fn set_keeper_fee_configuration(&mut self, caller: Address, keeper: KeeperFeeConfig) -> Result<(), EngineError> {
        self.atomically(|engine| {
            engine.ensure_owner(caller)?;
            let mut next = engine.protocol.clone();
            next.keeper = keeper;
            next.validate()?;
            engine.protocol = next;

            info!("keeper fee configured");
            engine.emit_event(EventPayload::KeeperFeeConfigured);
            Ok(())
        })
    }

    // ---- 8.3: transaction boundary ----

    /// Runs one external call. On error the ledger and the events it emitted are rolled back.
    pub(super) fn atomically<T>(
        &mut self,
        op: impl FnOnce(&mut Self) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let snapshot = self.ledger.clone();
        let protocol = self.protocol.clone();
        let next_event_id = self.next_event_id;
        self.pending_events.clear();

        match op(self) {
            Ok(value) => {
                let emitted = std::mem::take(&mut self.pending_events);
                self.events.extend(emitted);
                if self.events.len() > self.config.max_events {
                    let drain_count = self.events.len() - self.config.max_events;
                    self.events.drain(0..drain_count);
                }
                Ok(value)
            }
            Err(err) => {
                self.ledger = snapshot;
                self.protocol = protocol;
                self.next_event_id = next_event_id;
                self.pending_events.clear();
                if err.is_retryable() {
                    warn!(kind = ?err.kind(), error = %err, "call rejected");
                } else {
                    debug!(kind = ?err.kind(), error = %err, "call rejected");
                }
                Err(err)
            }
        }
    }

    pub(super) fn emit_event(&mut self, payload: EventPayload) {
        let event = Event::new(EventId(self.next_event_id), self.current_time, payload);
        self.next_event_id += 1;

        if self.config.verbose {
            info!(id = event.id.0, event = event.payload.name(), payload = ?event.payload, "event");
        } else {
            debug!(id = event.id.0, event = event.payload.name(), "event");
        }

        self.pending_events.push(event);
    }

    // ---- 8.4: guards ----

    pub(super) fn ensure_feature(&self, feature: Feature, caller: Address) -> Result<(), EngineError> {
        if self.services.features.is_enabled(feature, caller) {
            Ok(())
        } else {
            Err(EngineError::FeatureDisabled(feature))
        }
    }

    pub(super) fn ensure_owner(&self, caller: Address) -> Result<(), EngineError> {
        if self.services.registry.is_protocol_owner(caller) {
            Ok(())
        } else {
            Err(EngineError::Unauthorized(caller))
        }
    }

    pub(super) fn ensure_account(&self, account_id: AccountId) -> Result<(), EngineError> {
        if self.services.registry.account_exists(account_id) {
            Ok(())
        } else {
            Err(EngineError::AccountNotFound(account_id))
        }
    }

    pub(super) fn ensure_permission(
        &self,
        account_id: AccountId,
        permission: Permission,
        caller: Address,
    ) -> Result<(), EngineError> {
        if self.services.registry.has_permission(account_id, permission, caller) {
            Ok(())
        } else {
            Err(EngineError::PermissionDenied {
                account: account_id,
                permission,
                caller,
            })
        }
    }

    pub(super) fn market_ref(&self, market_id: MarketId) -> Result<&MarketState, EngineError> {
        self.ledger.market(market_id).ok_or(EngineError::MarketNotFound(market_id))
    }

    pub(super) fn market_mut(&mut self, market_id: MarketId) -> Result<&mut MarketState, EngineError> {
        self.ledger.market_mut(market_id).ok_or(EngineError::MarketNotFound(market_id))
    }

    // ---- 8.5: prices and fees ----

    pub(super) fn index_price(&self, market_id: MarketId) -> Result<Price, EngineError> {
        let feed = &self.market_ref(market_id)?.config.price_feed_id;
        Ok(PriceOracleAdapter::new(self.services.oracle.as_ref()).index_price(feed)?)
    }

    pub(super) fn keeper_fee_for(&self, action: KeeperAction, buffer: Quote) -> Result<Quote, EngineError> {
        let keeper = &self.protocol.keeper;
        let eth_price = PriceOracleAdapter::new(self.services.oracle.as_ref()).index_price(&keeper.eth_price_feed_id)?;
        Ok(keeper_fee(keeper, action, self.base_fee_per_gas_gwei, eth_price, buffer))
    }

    /// Price and haircut for every collateral the account holds.
    pub(super) fn collateral_quotes(
        &self,
        margin: &MarginAccount,
    ) -> Result<BTreeMap<CollateralId, CollateralQuote>, EngineError> {
        let oracle = PriceOracleAdapter::new(self.services.oracle.as_ref());
        let mut quotes = BTreeMap::new();
        for collateral_id in margin.collaterals.keys() {
            let config = self
                .protocol
                .collateral(*collateral_id)
                .ok_or(EngineError::CollateralNotFound(*collateral_id))?;
            let quote = match &config.price_feed_id {
                Some(feed) => CollateralQuote {
                    price: oracle.index_price(feed)?,
                    discount: config.discount,
                },
                None => CollateralQuote::settlement(),
            };
            quotes.insert(*collateral_id, quote);
        }
        Ok(quotes)
    }

    pub(super) fn collateral_usd(&self, margin: &MarginAccount) -> Result<Quote, EngineError> {
        let quotes = self.collateral_quotes(margin)?;
        Ok(margin.collateral_value(&quotes)?)
    }

    /// Pays a keeper out of the market's credit in the settlement asset.
    pub(super) fn pay_keeper(
        &mut self,
        market_id: MarketId,
        recipient: Address,
        amount: Quote,
        action: KeeperAction,
    ) -> Result<(), EngineError> {
        if !amount.is_positive() {
            return Ok(());
        }

        let settlement = self.protocol.settlement_collateral;
        self.services.credit_pool.withdraw_market_usd(market_id, amount.value())?;
        if let Err(err) = self.services.custody.transfer_out(recipient, settlement, amount.value()) {
            if let Err(refund) = self.services.credit_pool.deposit_market_usd(market_id, amount.value()) {
                warn!(market = ?market_id, error = %refund, "keeper payout refund failed");
            }
            return Err(err.into());
        }

        debug!(market = ?market_id, %recipient, ?action, %amount, "keeper paid");
        self.emit_event(EventPayload::KeeperPaid(KeeperPaidEvent {
            market_id,
            recipient,
            action,
            amount,
        }));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SUSD;
    use crate::credit_pool::InMemoryCreditPool;
    use crate::custody::InMemoryCustody;
    use crate::oracle::InMemoryOracle;
    use crate::registry::{FeatureFlags, InMemoryRegistry};
    use crate::types::FeedId;
    use rust_decimal_macros::dec;

    const OWNER: Address = Address(1);

    fn engine() -> Engine {
        let oracle = InMemoryOracle::new(b"key");
        oracle.set_price(&FeedId::new("ETH/USD"), Price::new_unchecked(dec!(1000)));
        let services = Services {
            registry: Arc::new(InMemoryRegistry::new(OWNER)),
            features: Arc::new(FeatureFlags::new()),
            custody: Arc::new(InMemoryCustody::new()),
            credit_pool: Arc::new(InMemoryCreditPool::new()),
            oracle: Arc::new(oracle),
        };
        Engine::new(EngineConfig::default(), ProtocolConfig::development(), services).unwrap()
    }

    #[test]
    fn preset_markets_are_opened() {
        let engine = engine();
        assert!(engine.ledger().market(MarketId(1)).is_some());
        assert!(engine.ledger().market(MarketId(2)).is_some());
    }

    #[test]
    fn admin_calls_require_owner() {
        let mut engine = engine();
        let err = engine
            .set_per_account_caps(Address(2), AccountCaps::default())
            .unwrap_err();
        assert_eq!(err, EngineError::Unauthorized(Address(2)));
        assert!(engine.events().is_empty());

        engine.set_per_account_caps(OWNER, AccountCaps::default()).unwrap();
        assert_eq!(engine.events().len(), 1);
    }

    #[test]
    fn failed_config_change_is_rolled_back() {
        let mut engine = engine();
        let mut bad = engine.protocol_config().keeper.clone();
        bad.min_keeper_fee_usd = dec!(1000);
        assert!(engine.set_keeper_fee_configuration(OWNER, bad).is_err());
        assert_eq!(engine.protocol_config().keeper, KeeperFeeConfig::default());
    }

    #[test]
    fn reconfiguring_a_market_keeps_state() {
        let mut engine = engine();
        let mut eth = MarketConfig::eth_perp();
        eth.max_leverage = dec!(10);
        engine.set_market_configuration(OWNER, eth).unwrap();

        let market = engine.ledger().market(MarketId(1)).unwrap();
        assert_eq!(market.config.max_leverage, dec!(10));
        assert!(matches!(
            engine.events().last().map(|e| &e.payload),
            Some(EventPayload::MarketConfigured(MarketConfiguredEvent { created: false, .. }))
        ));
    }

    #[test]
    fn settlement_collateral_cannot_be_dropped() {
        let mut engine = engine();
        let without_susd: Vec<CollateralConfig> = engine
            .protocol_config()
            .collaterals
            .iter()
            .filter(|c| c.id != SUSD)
            .cloned()
            .collect();
        let err = engine.set_collateral_configuration(OWNER, without_susd).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
