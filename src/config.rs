// 7.0 config.rs: global settings in one place. collaterals, keeper fees, per-account caps, hooks.
// 7.1 per-market risk parameters live with the market (market.rs). this file is protocol-wide.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;

use crate::market::MarketConfig;
use crate::types::{CollateralId, FeedId, HookId};

/// Collateral accepted as margin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralConfig {
    pub id: CollateralId,
    // e.g. "sUSD", "wETH"
    pub symbol: String,
    // None for the settlement asset, which is always worth 1 usd
    pub price_feed_id: Option<FeedId>,
    // cap on the total deposited by one account in one market
    pub max_allowable: Decimal,
    // haircut applied when valuing this collateral as margin (0.05 = 5%)
    pub discount: Decimal,
}

impl CollateralConfig {
    pub fn settlement(id: CollateralId, symbol: &str, max_allowable: Decimal) -> Self {
        Self {
            id,
            symbol: symbol.to_string(),
            price_feed_id: None,
            max_allowable,
            discount: Decimal::ZERO,
        }
    }

    pub fn priced(id: CollateralId, symbol: &str, feed: FeedId, max_allowable: Decimal, discount: Decimal) -> Self {
        Self {
            id,
            symbol: symbol.to_string(),
            price_feed_id: Some(feed),
            max_allowable,
            discount,
        }
    }
}

/** 7.2: keeper compensation. gas units are per action, base fee comes from the engine clock. */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeeperFeeConfig {
    pub min_keeper_fee_usd: Decimal,
    pub max_keeper_fee_usd: Decimal,
    // markup over raw gas cost (0.2 = 20%)
    pub keeper_profit_margin_percent: Decimal,
    pub keeper_settlement_gas_units: u64,
    pub keeper_cancellation_gas_units: u64,
    pub keeper_liquidation_gas_units: u64,
    // gas is paid in eth, so converting to usd needs its price
    pub eth_price_feed_id: FeedId,
}

impl Default for KeeperFeeConfig {
    fn default() -> Self {
        Self {
            min_keeper_fee_usd: dec!(2),
            max_keeper_fee_usd: dec!(100),
            keeper_profit_margin_percent: dec!(0.2),
            keeper_settlement_gas_units: 1_200_000,
            keeper_cancellation_gas_units: 600_000,
            keeper_liquidation_gas_units: 1_000_000,
            eth_price_feed_id: FeedId::new("ETH/USD"),
        }
    }
}

// 7.3: caps on state growth per account. enforced only when a new entry is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountCaps {
    pub max_positions_per_account: u32,
    pub max_collaterals_per_account: u32,
}

impl Default for AccountCaps {
    fn default() -> Self {
        Self {
            max_positions_per_account: 10,
            max_collaterals_per_account: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementHookConfig {
    pub whitelisted: BTreeSet<HookId>,
    pub max_hooks_per_order: usize,
}

/// Protocol-wide configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolConfig {
    // debt is denominated and paid in this collateral
    pub settlement_collateral: CollateralId,
    pub collaterals: Vec<CollateralConfig>,
    pub keeper: KeeperFeeConfig,
    pub caps: AccountCaps,
    pub hooks: SettlementHookConfig,
    // markets created at engine start
    #[serde(default)]
    pub markets: Vec<MarketConfig>,
}

pub const SUSD: CollateralId = CollateralId(0);
pub const WETH: CollateralId = CollateralId(1);
pub const WBTC: CollateralId = CollateralId(2);

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::development()
    }
}

impl ProtocolConfig {
    pub fn development() -> Self {
        Self {
            settlement_collateral: SUSD,
            collaterals: vec![
                CollateralConfig::settlement(SUSD, "sUSD", dec!(10_000_000)),
                CollateralConfig::priced(WETH, "wETH", FeedId::new("ETH/USD"), dec!(10_000), dec!(0.05)),
                CollateralConfig::priced(WBTC, "wBTC", FeedId::new("BTC/USD"), dec!(500), dec!(0.05)),
            ],
            keeper: KeeperFeeConfig::default(),
            caps: AccountCaps::default(),
            hooks: SettlementHookConfig {
                whitelisted: BTreeSet::new(),
                max_hooks_per_order: 2,
            },
            markets: vec![MarketConfig::eth_perp(), MarketConfig::btc_perp()],
        }
    }

    pub fn testnet() -> Self {
        let mut config = Self::development();
        config.keeper.min_keeper_fee_usd = dec!(0.5);
        config.keeper.max_keeper_fee_usd = dec!(20);
        config.caps.max_positions_per_account = 20;
        config
    }

    // Conservative settings: tighter caps, bigger keeper floor
    pub fn mainnet() -> Self {
        let mut config = Self::development();
        config.keeper.min_keeper_fee_usd = dec!(5);
        config.keeper.max_keeper_fee_usd = dec!(500);
        config.caps = AccountCaps {
            max_positions_per_account: 5,
            max_collaterals_per_account: 3,
        };
        for market in &mut config.markets {
            market.max_leverage = dec!(25);
        }
        config
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Io(e.to_string()))?;
        Self::from_json_str(&raw)
    }

    pub fn collateral(&self, id: CollateralId) -> Option<&CollateralConfig> {
        self.collaterals.iter().find(|c| c.id == id)
    }

    // Validate the configuration for internal consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = BTreeSet::new();
        for collateral in &self.collaterals {
            if !seen.insert(collateral.id) {
                return Err(ConfigError::InvalidCollateral {
                    reason: format!("duplicate collateral {:?}", collateral.id),
                });
            }
            if collateral.discount < Decimal::ZERO || collateral.discount >= Decimal::ONE {
                return Err(ConfigError::InvalidCollateral {
                    reason: format!("{} discount must be in [0, 1)", collateral.symbol),
                });
            }
            if collateral.max_allowable < Decimal::ZERO {
                return Err(ConfigError::InvalidCollateral {
                    reason: format!("{} max allowable is negative", collateral.symbol),
                });
            }
        }

        match self.collateral(self.settlement_collateral) {
            None => {
                return Err(ConfigError::InvalidCollateral {
                    reason: "settlement collateral is not configured".to_string(),
                })
            }
            Some(settlement) if settlement.price_feed_id.is_some() || !settlement.discount.is_zero() => {
                return Err(ConfigError::InvalidCollateral {
                    reason: "settlement collateral must be unpriced and undiscounted".to_string(),
                })
            }
            Some(_) => {}
        }

        let keeper = &self.keeper;
        if keeper.min_keeper_fee_usd < Decimal::ZERO || keeper.min_keeper_fee_usd > keeper.max_keeper_fee_usd {
            return Err(ConfigError::InvalidKeeper {
                reason: "min keeper fee must be within [0, max]".to_string(),
            });
        }
        if keeper.keeper_profit_margin_percent < Decimal::ZERO {
            return Err(ConfigError::InvalidKeeper {
                reason: "profit margin is negative".to_string(),
            });
        }

        let mut market_ids = BTreeSet::new();
        for market in &self.markets {
            market.validate()?;
            if !market_ids.insert(market.id) {
                return Err(ConfigError::InvalidMarket {
                    reason: format!("duplicate market {:?}", market.id),
                });
            }
        }

        Ok(())
    }
}

// Configuration validation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid collateral configuration: {reason}")]
    InvalidCollateral { reason: String },
    #[error("invalid keeper configuration: {reason}")]
    InvalidKeeper { reason: String },
    #[error("invalid market configuration: {reason}")]
    InvalidMarket { reason: String },
    #[error("could not parse configuration: {0}")]
    Parse(String),
    #[error("could not read configuration: {0}")]
    Io(String),
}

// Environment presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    Development,
    Testnet,
    Mainnet,
}

impl Environment {
    pub fn config(&self) -> ProtocolConfig {
        match self {
            Environment::Development => ProtocolConfig::development(),
            Environment::Testnet => ProtocolConfig::testnet(),
            Environment::Mainnet => ProtocolConfig::mainnet(),
        }
    }
}
