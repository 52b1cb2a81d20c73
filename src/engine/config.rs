//! Engine configuration options.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum number of events to retain in memory.
    pub max_events: usize,
    /// Log every event at info instead of debug.
    pub verbose: bool,
    /// Base fee used for keeper fees until one is set.
    pub initial_base_fee_per_gas_gwei: Decimal,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_events: 100_000,
            verbose: false,
            initial_base_fee_per_gas_gwei: dec!(1),
        }
    }
}
