//! Perpetual futures engine simulation.
//!
//! Walks the engine through skew pricing, margin checks, keeper settlement,
//! rate-limited liquidation and vault liquidation against in-memory collaborators.
//!
//! Usage: `perps-sim [config.json]`. Without a file the preset named by
//! `PERPS_ENV` (development, testnet, mainnet) is used. `RUST_LOG` sets the log filter.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use skew_perps::*;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const OWNER: Address = Address(1);
const KEEPER: Address = Address(100);
const ETH: MarketId = MarketId(1);

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let protocol = match std::env::args().nth(1) {
        Some(path) => ProtocolConfig::from_path(&path).unwrap_or_else(|err| {
            eprintln!("failed to load {path}: {err}");
            std::process::exit(1);
        }),
        None => preset_from_env().config(),
    };

    println!("Skew-Priced Perpetuals Simulation");
    println!("Keeper Settlement, Per-Market Margin, Throttled Liquidations\n");

    scenario_1_skew_pricing(&protocol);
    scenario_2_margin_rejection(&protocol);
    scenario_3_liquidation(&protocol);
    scenario_4_stale_orders(&protocol);
    scenario_5_account_caps(&protocol);
    scenario_6_vault_liquidation(&protocol);

    println!("\nAll simulations completed successfully.");
}

fn preset_from_env() -> Environment {
    match std::env::var("PERPS_ENV").as_deref() {
        Ok("testnet") => Environment::Testnet,
        Ok("mainnet") => Environment::Mainnet,
        Ok("development") | Err(_) => Environment::Development,
        Ok(other) => {
            warn!(preset = other, "unknown preset, using development");
            Environment::Development
        }
    }
}

/// An engine plus handles on the collaborators it was built with.
struct World {
    engine: Engine,
    registry: Arc<InMemoryRegistry>,
    custody: Arc<InMemoryCustody>,
    pool: Arc<InMemoryCreditPool>,
    oracle: Arc<InMemoryOracle>,
}

impl World {
    fn new(protocol: &ProtocolConfig) -> Self {
        let registry = Arc::new(InMemoryRegistry::new(OWNER));
        let custody = Arc::new(InMemoryCustody::new());
        let pool = Arc::new(InMemoryCreditPool::new());
        let oracle = Arc::new(InMemoryOracle::new(b"perps-sim"));

        for market in &protocol.markets {
            pool.delegate(market.id, dec!(100_000_000));
        }
        oracle.set_price(&FeedId::new("ETH/USD"), Price::new_unchecked(dec!(1000)));
        oracle.set_price(&FeedId::new("BTC/USD"), Price::new_unchecked(dec!(50000)));

        let services = Services {
            registry: registry.clone(),
            features: Arc::new(FeatureFlags::new()),
            custody: custody.clone(),
            credit_pool: pool.clone(),
            oracle: oracle.clone(),
        };
        let config = EngineConfig {
            verbose: true,
            ..EngineConfig::default()
        };
        let mut engine = Engine::new(config, protocol.clone(), services).unwrap();
        engine.set_time(Timestamp::now());

        Self {
            engine,
            registry,
            custody,
            pool,
            oracle,
        }
    }

    fn trader(&mut self, owner: Address, margin: Decimal) -> AccountId {
        let account = self.registry.create_account(owner);
        self.custody.mint(owner, SUSD, dec!(1_000_000));
        self.engine
            .modify_collateral(owner, account, ETH, SUSD, margin)
            .unwrap();
        account
    }

    fn set_eth_price(&self, price: Decimal) {
        self.oracle
            .set_price(&FeedId::new("ETH/USD"), Price::new_unchecked(price));
    }

    fn report(&self, price: Decimal) -> PriceReport {
        self.oracle
            .sign(&FeedId::new("ETH/USD"), price, self.engine.time())
    }

    fn trade(&mut self, owner: Address, account: AccountId, size: Decimal) -> Result<SettlementResult, EngineError> {
        let limit = if size > Decimal::ZERO { dec!(1_000_000) } else { dec!(0.01) };
        self.engine
            .commit_order(owner, OrderRequest::new(account, ETH, size, Price::new_unchecked(limit)))?;
        self.engine.advance_secs(10);
        let index = self.oracle.index_price(&FeedId::new("ETH/USD"))?;
        let report = self.report(index.value());
        self.engine.settle_order(KEEPER, account, ETH, &report)
    }
}

/// Fill price moves with the skew a trade creates.
fn scenario_1_skew_pricing(protocol: &ProtocolConfig) {
    println!("Scenario 1: Skew Pricing\n");

    let mut world = World::new(protocol);
    let alice = world.trader(Address(10), dec!(10_000));

    println!("  Alice deposits $10,000, ETH index at $1,000");
    println!("  Quoted fill for +10 ETH: ${}", world.engine.get_fill_price(ETH, dec!(10)).unwrap());

    let settled = world.trade(Address(10), alice, dec!(10)).unwrap();
    println!("  Settled +10 ETH @ ${}", settled.fill_price);
    println!("  Order fee ${}, keeper fee ${}", settled.order_fee, settled.keeper_fee);
    println!("  Debt after settlement: ${}", settled.debt);

    let summary = world.engine.get_market_summary(ETH).unwrap();
    println!("  Market skew: {}, funding velocity: {}/day\n", summary.skew, summary.funding_velocity);
}

/// Orders that would leave the account under-margined are refused at commit.
fn scenario_2_margin_rejection(protocol: &ProtocolConfig) {
    println!("Scenario 2: Margin Checks\n");

    let mut world = World::new(protocol);
    let alice = world.trader(Address(10), dec!(10_000));

    let request = OrderRequest::new(alice, ETH, dec!(400), Price::new_unchecked(dec!(2000)));
    match world.engine.commit_order(Address(10), request) {
        Ok(_) => println!("  +400 ETH on $10,000 accepted"),
        Err(err) => println!("  +400 ETH on $10,000 rejected: {err}"),
    }

    let digest = world.engine.get_account_digest(alice, ETH).unwrap();
    println!("  Pending order: {}, collateral ${}\n", digest.has_pending_order, digest.collateral_usd);
}

/// A losing long is flagged, liquidated and its margin swept to the pool.
fn scenario_3_liquidation(protocol: &ProtocolConfig) {
    println!("Scenario 3: Liquidation and Debt\n");

    let mut world = World::new(protocol);
    let alice = world.trader(Address(10), dec!(1_000));
    let bob = world.trader(Address(11), dec!(100_000));

    world.trade(Address(10), alice, dec!(10)).unwrap();
    world.trade(Address(11), bob, dec!(-10)).unwrap();
    println!("  Alice long 10 ETH on $1,000, Bob short 10 ETH on $100,000");

    world.set_eth_price(dec!(900));
    println!("  ETH drops to $900");
    println!(
        "  Alice health factor: {}",
        world.engine.get_health_factor(alice, ETH).unwrap().round_dp(4)
    );

    let flagged = world.engine.flag_position(KEEPER, alice, ETH).unwrap();
    println!("  Flagged at ${} (health {})", flagged.price, flagged.health_factor.round_dp(4));

    let result = world.engine.liquidate_position(KEEPER, alice, ETH).unwrap();
    println!(
        "  Liquidated {} ETH, flagger reward ${}, liquidator reward ${}",
        result.liquidated_size, result.flagger_reward, result.liquidator_reward
    );
    println!("  Bad debt: ${}", result.bad_debt);

    let market = world.engine.get_market(ETH).unwrap();
    println!("  Skew now {}, trader debt ${}", market.skew, market.total_trader_debt);
    println!(
        "  Reported market debt: ${}",
        world.engine.get_market_reported_debt(ETH).unwrap()
    );
    let credit = world.pool.market(ETH).unwrap();
    println!("  Pool received ${}, paid out ${}\n", credit.usd_deposited, credit.usd_withdrawn);
}

/// Orders that miss their settlement window are cleared or canceled for a fee.
fn scenario_4_stale_orders(protocol: &ProtocolConfig) {
    println!("Scenario 4: Stale Orders\n");

    let mut world = World::new(protocol);
    let alice = world.trader(Address(10), dec!(10_000));
    let request = || OrderRequest::new(alice, ETH, dec!(1), Price::new_unchecked(dec!(1100)));

    world.engine.commit_order(Address(10), request()).unwrap();
    world.engine.advance_secs(61);
    let cleared = world.engine.clear_stale_order(KEEPER, alice, ETH).unwrap();
    println!("  Order left 61s, cleared: {:?}, fee ${}", cleared.reason, cleared.keeper_fee);

    world.engine.commit_order(Address(10), request()).unwrap();
    world.engine.advance_secs(61);
    let canceled = world.engine.cancel_order(KEEPER, alice, ETH, None).unwrap();
    println!("  Order left 61s, keeper cancels: {:?}, fee ${}", canceled.reason, canceled.keeper_fee);
    println!("  Alice debt: ${}\n", world.engine.get_debt(alice, ETH));
}

/// Per-account caps apply only when a new position would be created.
fn scenario_5_account_caps(protocol: &ProtocolConfig) {
    println!("Scenario 5: Account Caps\n");

    let mut world = World::new(protocol);
    let alice = world.trader(Address(10), dec!(10_000));
    world.trade(Address(10), alice, dec!(1)).unwrap();

    world
        .engine
        .set_per_account_caps(
            OWNER,
            AccountCaps {
                max_positions_per_account: 0,
                max_collaterals_per_account: 5,
            },
        )
        .unwrap();
    println!("  Owner sets max positions per account to 0");

    match world.trade(Address(10), alice, dec!(1)) {
        Ok(settled) => println!("  Alice resizes her existing position to {}", settled.new_size),
        Err(err) => println!("  Alice resize rejected: {err}"),
    }

    let bob = world.trader(Address(11), dec!(10_000));
    let request = OrderRequest::new(bob, ETH, dec!(1), Price::new_unchecked(dec!(1100)));
    match world.engine.commit_order(Address(11), request) {
        Ok(_) => println!("  Bob opened a new position"),
        Err(err) => println!("  Bob rejected ({:?}): {err}\n", err.kind()),
    }
}

/// An authorized liquidator repays vault debt for a proportional share of collateral.
fn scenario_6_vault_liquidation(protocol: &ProtocolConfig) {
    println!("Scenario 6: Vault Liquidation\n");

    let mut world = World::new(protocol);
    let vault = VaultId(1);
    world.engine.register_vault(OWNER, vault, WETH, dec!(1.5)).unwrap();
    world.custody.mint(OWNER, WETH, dec!(10));
    world.engine.deposit_vault_collateral(OWNER, vault, dec!(10)).unwrap();
    world.engine.record_vault_debt(OWNER, vault, dec!(8_000)).unwrap();
    println!("  Vault holds 10 wETH against $8,000 of debt, liquidation ratio 1.5");

    let liquidator = Address(300);
    world.registry.authorize_liquidator(liquidator);
    let account = world.registry.create_account(liquidator);
    world.custody.mint(liquidator, SUSD, dec!(4_000));

    let result = world
        .engine
        .liquidate_vault(liquidator, vault, account, dec!(4_000))
        .unwrap();
    info!(vault = ?vault, seized = %result.collateral_seized, "vault liquidated");
    println!(
        "  Repaid ${}, seized {} wETH",
        result.debt_repaid, result.collateral_seized
    );

    let state = world.engine.get_vault(vault).unwrap();
    println!("  Vault left with {} wETH and ${} debt", state.collateral_amount, state.debt_usd);
}
