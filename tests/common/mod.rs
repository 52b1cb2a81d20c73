//! Shared setup for the integration tests: an engine wired to in-memory collaborators.

#![allow(dead_code)]

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skew_perps::*;
use std::sync::Arc;

pub const OWNER: Address = Address(1);
pub const KEEPER: Address = Address(100);
pub const ETH: MarketId = MarketId(1);
pub const BTC: MarketId = MarketId(2);

pub const WALLET_FUNDS: Decimal = dec!(1_000_000);

pub struct Harness {
    pub engine: Engine,
    pub registry: Arc<InMemoryRegistry>,
    pub features: Arc<FeatureFlags>,
    pub custody: Arc<InMemoryCustody>,
    pub pool: Arc<InMemoryCreditPool>,
    pub oracle: Arc<InMemoryOracle>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_protocol(ProtocolConfig::development())
    }

    pub fn with_protocol(protocol: ProtocolConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new(OWNER));
        let features = Arc::new(FeatureFlags::new());
        let custody = Arc::new(InMemoryCustody::new());
        let pool = Arc::new(InMemoryCreditPool::new());
        let oracle = Arc::new(InMemoryOracle::new(b"integration"));

        pool.delegate(ETH, dec!(100_000_000));
        pool.delegate(BTC, dec!(100_000_000));
        oracle.set_price(&FeedId::new("ETH/USD"), Price::new_unchecked(dec!(1000)));
        oracle.set_price(&FeedId::new("BTC/USD"), Price::new_unchecked(dec!(50000)));

        let services = Services {
            registry: registry.clone(),
            features: features.clone(),
            custody: custody.clone(),
            credit_pool: pool.clone(),
            oracle: oracle.clone(),
        };
        let mut engine = Engine::new(EngineConfig::default(), protocol, services).unwrap();
        engine.set_time(Timestamp::from_secs(1_000));

        Self {
            engine,
            registry,
            features,
            custody,
            pool,
            oracle,
        }
    }

    /// New account owned by `owner` with `margin` sUSD deposited into the ETH market.
    pub fn trader(&mut self, owner: Address, margin: Decimal) -> AccountId {
        let account = self.registry.create_account(owner);
        self.custody.mint(owner, SUSD, WALLET_FUNDS);
        if margin > Decimal::ZERO {
            self.engine
                .modify_collateral(owner, account, ETH, SUSD, margin)
                .unwrap();
        }
        account
    }

    pub fn set_eth_price(&self, price: Decimal) {
        self.oracle
            .set_price(&FeedId::new("ETH/USD"), Price::new_unchecked(price));
    }

    /// Signed ETH report published now.
    pub fn eth_report(&self, price: Decimal) -> PriceReport {
        self.oracle
            .sign(&FeedId::new("ETH/USD"), price, self.engine.time())
    }

    pub fn eth_index(&self) -> Decimal {
        self.oracle
            .index_price(&FeedId::new("ETH/USD"))
            .unwrap()
            .value()
    }

    /// Commits, waits out the settlement delay and settles at the current index.
    pub fn trade(&mut self, owner: Address, account: AccountId, size_delta: Decimal) -> SettlementResult {
        let limit = if size_delta > Decimal::ZERO {
            dec!(1_000_000)
        } else {
            dec!(0.01)
        };
        self.engine
            .commit_order(
                owner,
                OrderRequest::new(account, ETH, size_delta, Price::new_unchecked(limit)),
            )
            .unwrap();
        self.engine.advance_secs(10);
        let report = self.eth_report(self.eth_index());
        self.engine
            .settle_order(KEEPER, account, ETH, &report)
            .unwrap()
    }

    pub fn position_size(&self, account: AccountId, market: MarketId) -> Decimal {
        self.engine
            .get_position(account, market)
            .map(|p| p.size.value())
            .unwrap_or_default()
    }

    /// Sum of every live position in the market.
    pub fn sum_of_positions(&self, market: MarketId) -> Decimal {
        self.engine
            .ledger()
            .positions_in_market(market)
            .map(|p| p.size.value())
            .sum()
    }

    pub fn skew(&self, market: MarketId) -> Decimal {
        self.engine.get_market(market).unwrap().skew.value()
    }
}
