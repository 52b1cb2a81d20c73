// Price oracle adapter
//
// The engine never fetches prices itself. Index prices come from whatever
// implements `PriceOracle`, and settlement prices arrive as signed reports
// gathered by the keeper before the call. The adapter layers the engine's
// own acceptance rules (publish window, divergence from index) on top of
// the oracle's signature check.

use crate::lock;
use crate::market::MarketConfig;
use crate::types::{FeedId, Price, Timestamp};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Mutex;

/// A signed price observation supplied by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceReport {
    pub feed_id: FeedId,
    pub price: Decimal,
    pub publish_time: Timestamp,
    /// hex sha-256 over key, feed, price and publish time
    pub signature: String,
}

/// A report that passed signature verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerifiedPrice {
    pub price: Price,
    pub publish_time: Timestamp,
}

pub trait PriceOracle: Send + Sync {
    fn index_price(&self, feed: &FeedId) -> Result<Price, OracleError>;

    fn verify_price_update(&self, feed: &FeedId, report: &PriceReport) -> Result<VerifiedPrice, OracleError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OracleError {
    #[error("No price for feed {0}")]
    FeedNotFound(FeedId),
    #[error("Report is for feed {got}, expected {expected}")]
    FeedMismatch { expected: FeedId, got: FeedId },
    #[error("Bad signature on report for {0}")]
    InvalidSignature(FeedId),
    #[error("Report price {0} is not positive")]
    InvalidPrice(Decimal),
    #[error("Report published at {publish_time} outside [{earliest}, {latest}]")]
    StalePrice {
        publish_time: Timestamp,
        earliest: Timestamp,
        latest: Timestamp,
    },
    #[error("Report price {report} diverges from index {index} by more than {tolerance}")]
    PriceDivergence {
        report: Decimal,
        index: Decimal,
        tolerance: Decimal,
    },
}

fn report_digest(key: &[u8], feed: &FeedId, price: Decimal, publish_time: Timestamp) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(feed.0.as_bytes());
    hasher.update(price.normalize().to_string().as_bytes());
    hasher.update(publish_time.as_millis().to_le_bytes());
    hex::encode(hasher.finalize())
}

/// Oracle backed by a price table and a shared signing key.
#[derive(Debug)]
pub struct InMemoryOracle {
    signing_key: Vec<u8>,
    prices: Mutex<BTreeMap<FeedId, Price>>,
}

impl InMemoryOracle {
    pub fn new(signing_key: &[u8]) -> Self {
        Self {
            signing_key: signing_key.to_vec(),
            prices: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn set_price(&self, feed: &FeedId, price: Price) {
        lock(&self.prices).insert(feed.clone(), price);
    }

    /// Produces a report the way an off-chain publisher would.
    pub fn sign(&self, feed: &FeedId, price: Decimal, publish_time: Timestamp) -> PriceReport {
        PriceReport {
            feed_id: feed.clone(),
            price,
            publish_time,
            signature: report_digest(&self.signing_key, feed, price, publish_time),
        }
    }
}

impl PriceOracle for InMemoryOracle {
    fn index_price(&self, feed: &FeedId) -> Result<Price, OracleError> {
        lock(&self.prices)
            .get(feed)
            .copied()
            .ok_or_else(|| OracleError::FeedNotFound(feed.clone()))
    }

    fn verify_price_update(&self, feed: &FeedId, report: &PriceReport) -> Result<VerifiedPrice, OracleError> {
        if &report.feed_id != feed {
            return Err(OracleError::FeedMismatch {
                expected: feed.clone(),
                got: report.feed_id.clone(),
            });
        }
        let expected = report_digest(&self.signing_key, feed, report.price, report.publish_time);
        if expected != report.signature {
            return Err(OracleError::InvalidSignature(feed.clone()));
        }
        let price = Price::new(report.price).ok_or(OracleError::InvalidPrice(report.price))?;
        Ok(VerifiedPrice {
            price,
            publish_time: report.publish_time,
        })
    }
}

/// The engine's view of the oracle.
pub struct PriceOracleAdapter<'a> {
    oracle: &'a dyn PriceOracle,
}

impl<'a> PriceOracleAdapter<'a> {
    pub fn new(oracle: &'a dyn PriceOracle) -> Self {
        Self { oracle }
    }

    pub fn index_price(&self, feed: &FeedId) -> Result<Price, OracleError> {
        self.oracle.index_price(feed)
    }

    /// Accepts a settlement report: valid signature, published inside the order's
    /// settlement window, and close enough to the index.
    pub fn verify_for_order(
        &self,
        config: &MarketConfig,
        report: &PriceReport,
        commitment_time: Timestamp,
    ) -> Result<Price, OracleError> {
        let verified = self.oracle.verify_price_update(&config.price_feed_id, report)?;

        let earliest = commitment_time.plus_secs(config.min_order_age_secs);
        let latest = commitment_time.plus_secs(config.max_order_age_secs);
        if verified.publish_time < earliest || verified.publish_time > latest {
            return Err(OracleError::StalePrice {
                publish_time: verified.publish_time,
                earliest,
                latest,
            });
        }

        let index = self.index_price(&config.price_feed_id)?;
        let divergence = (verified.price.value() - index.value()).abs() / index.value();
        if divergence >= config.price_divergence_percent {
            return Err(OracleError::PriceDivergence {
                report: verified.price.value(),
                index: index.value(),
                tolerance: config.price_divergence_percent,
            });
        }

        Ok(verified.price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn setup() -> (InMemoryOracle, MarketConfig) {
        let oracle = InMemoryOracle::new(b"test-key");
        let config = MarketConfig::eth_perp();
        oracle.set_price(&config.price_feed_id, Price::new_unchecked(dec!(1000)));
        (oracle, config)
    }

    #[test]
    fn signed_report_verifies() {
        let (oracle, config) = setup();
        let report = oracle.sign(&config.price_feed_id, dec!(1001), Timestamp::from_secs(10));
        let verified = oracle.verify_price_update(&config.price_feed_id, &report).unwrap();
        assert_eq!(verified.price.value(), dec!(1001));
    }

    #[test]
    fn tampered_report_rejected() {
        let (oracle, config) = setup();
        let mut report = oracle.sign(&config.price_feed_id, dec!(1001), Timestamp::from_secs(10));
        report.price = dec!(900);
        assert_eq!(
            oracle.verify_price_update(&config.price_feed_id, &report),
            Err(OracleError::InvalidSignature(config.price_feed_id.clone()))
        );

        let other = InMemoryOracle::new(b"other-key");
        let forged = other.sign(&config.price_feed_id, dec!(1001), Timestamp::from_secs(10));
        assert!(oracle.verify_price_update(&config.price_feed_id, &forged).is_err());
    }

    #[test]
    fn wrong_feed_rejected() {
        let (oracle, config) = setup();
        let report = oracle.sign(&FeedId::new("BTC/USD"), dec!(1001), Timestamp::from_secs(10));
        assert!(matches!(
            oracle.verify_price_update(&config.price_feed_id, &report),
            Err(OracleError::FeedMismatch { .. })
        ));
    }

    #[test]
    fn report_outside_window_is_stale() {
        let (oracle, config) = setup();
        let adapter = PriceOracleAdapter::new(&oracle);
        let committed = Timestamp::from_secs(100);

        let early = oracle.sign(&config.price_feed_id, dec!(1000), Timestamp::from_secs(107));
        assert!(matches!(
            adapter.verify_for_order(&config, &early, committed),
            Err(OracleError::StalePrice { .. })
        ));

        let late = oracle.sign(&config.price_feed_id, dec!(1000), Timestamp::from_secs(161));
        assert!(matches!(
            adapter.verify_for_order(&config, &late, committed),
            Err(OracleError::StalePrice { .. })
        ));

        let good = oracle.sign(&config.price_feed_id, dec!(1000), Timestamp::from_secs(108));
        assert_eq!(adapter.verify_for_order(&config, &good, committed).unwrap().value(), dec!(1000));
    }

    #[test]
    fn divergent_report_rejected() {
        let (oracle, config) = setup();
        let adapter = PriceOracleAdapter::new(&oracle);
        let committed = Timestamp::from_secs(100);

        // 2% tolerance against an index of 1000, exclusive
        let inside = oracle.sign(&config.price_feed_id, dec!(1019.99), Timestamp::from_secs(110));
        assert!(adapter.verify_for_order(&config, &inside, committed).is_ok());

        for price in [dec!(1020), dec!(980), dec!(1021)] {
            let report = oracle.sign(&config.price_feed_id, price, Timestamp::from_secs(110));
            assert!(matches!(
                adapter.verify_for_order(&config, &report, committed),
                Err(OracleError::PriceDivergence { .. })
            ));
        }
    }

    #[test]
    fn unknown_feed_has_no_index() {
        let (oracle, _) = setup();
        assert!(matches!(
            oracle.index_price(&FeedId::new("SOL/USD")),
            Err(OracleError::FeedNotFound(_))
        ));
    }
}
