// 5.0: skew-driven pricing and funding. there is no book: fills and funding both fall out of skew.
// 5.0 has the state structs. 5.1+ has the pure math. 5.5 is utilization accrual.

use crate::types::{Price, Quote, SignedSize, Timestamp};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

/// Funding checkpoint for one market. `last_funding_value` is the per-unit usd accumulator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FundingState {
    pub last_funding_rate: Decimal,
    pub last_funding_value: Decimal,
    pub last_funding_time: Timestamp,
}

/// What a recompute produced. callers persist it and emit it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FundingSnapshot {
    pub funding_rate: Decimal,
    pub funding_velocity: Decimal,
    pub funding_value: Decimal,
}

impl FundingState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            last_funding_rate: Decimal::ZERO,
            last_funding_value: Decimal::ZERO,
            last_funding_time: timestamp,
        }
    }

    /// Rate and accumulator as of `now`, using the velocity implied by `skew`.
    /// Pure: nothing is persisted until `checkpoint`.
    pub fn project(
        &self,
        skew: SignedSize,
        skew_scale: Decimal,
        max_funding_velocity: Decimal,
        price: Price,
        now: Timestamp,
    ) -> FundingSnapshot {
        let velocity = funding_velocity(skew, skew_scale, max_funding_velocity);
        let elapsed_days = now.elapsed_days(self.last_funding_time);
        let rate = self.last_funding_rate + velocity * elapsed_days;
        let unrecorded = unrecorded_funding(self.last_funding_rate, rate, elapsed_days, price);
        FundingSnapshot {
            funding_rate: rate,
            funding_velocity: velocity,
            funding_value: self.last_funding_value + unrecorded,
        }
    }

    pub fn checkpoint(&mut self, snapshot: &FundingSnapshot, now: Timestamp) {
        self.last_funding_rate = snapshot.funding_rate;
        self.last_funding_value = snapshot.funding_value;
        self.last_funding_time = now;
    }
}

// 5.1: skew as a fraction of skew scale, clamped to [-1, 1]. zero scale disables funding.
pub fn proportional_skew(skew: SignedSize, skew_scale: Decimal) -> Decimal {
    if skew_scale.is_zero() {
        return Decimal::ZERO;
    }
    (skew.value() / skew_scale).max(-Decimal::ONE).min(Decimal::ONE)
}

// 5.2: daily change in the funding rate.
pub fn funding_velocity(skew: SignedSize, skew_scale: Decimal, max_funding_velocity: Decimal) -> Decimal {
    proportional_skew(skew, skew_scale) * max_funding_velocity
}

// positive rate means longs pay, so the per-unit accumulator moves the other way.
// trapezoid between the rate at the last checkpoint and the rate now.
pub fn unrecorded_funding(
    last_rate: Decimal,
    current_rate: Decimal,
    elapsed_days: Decimal,
    price: Price,
) -> Decimal {
    -(last_rate + current_rate) / dec!(2) * elapsed_days * price.value()
}

// 5.3: average execution price for `size_delta` at oracle `price`.
// premium before and after the trade, averaged. a sign flip needs no special case.
pub fn fill_price(skew: SignedSize, skew_scale: Decimal, size_delta: Decimal, price: Price) -> Price {
    if skew_scale.is_zero() {
        return price;
    }
    let pd_before = skew.value() / skew_scale;
    let pd_after = (skew.value() + size_delta) / skew_scale;
    let price_before = price.value() * (Decimal::ONE + pd_before);
    let price_after = price.value() * (Decimal::ONE + pd_after);
    let average = (price_before + price_after) / dec!(2);
    // an absurd size can push the premium below -100%. floor at the smallest representable price.
    Price::new(average).unwrap_or_else(|| Price::new_unchecked(Decimal::new(1, 18)))
}

// 5.4: maker fee on the part of the trade that pulls skew toward zero, taker on the rest.
pub fn order_fee(
    skew: SignedSize,
    size_delta: Decimal,
    fill_price: Price,
    maker_fee: Decimal,
    taker_fee: Decimal,
) -> Quote {
    let reduces_skew = !skew.is_zero() && (skew.value() > Decimal::ZERO) != (size_delta > Decimal::ZERO);
    let maker_size = if reduces_skew {
        size_delta.abs().min(skew.abs())
    } else {
        Decimal::ZERO
    };
    let taker_size = size_delta.abs() - maker_size;
    Quote::new((maker_size * maker_fee + taker_size * taker_fee) * fill_price.value())
}

/// Utilization curve parameters. slopes are annual rates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtilizationParams {
    pub min_credit_percent: Decimal,
    pub utilization_breakpoint_percent: Decimal,
    pub low_utilization_slope_percent: Decimal,
    pub high_utilization_slope_percent: Decimal,
}

impl Default for UtilizationParams {
    fn default() -> Self {
        Self {
            min_credit_percent: dec!(1),
            utilization_breakpoint_percent: dec!(0.8),
            low_utilization_slope_percent: dec!(0.05),
            high_utilization_slope_percent: dec!(1),
        }
    }
}

// 5.5: per-unit utilization accumulator, same checkpoint shape as funding.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UtilizationState {
    pub current_rate: Decimal,
    pub last_accrued: Decimal,
    pub last_time: Timestamp,
}

impl UtilizationState {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            current_rate: Decimal::ZERO,
            last_accrued: Decimal::ZERO,
            last_time: timestamp,
        }
    }

    /// Accrued value at `now` under the rate set by the previous recompute.
    pub fn accrued_at(&self, price: Price, now: Timestamp) -> Decimal {
        self.last_accrued + self.current_rate * now.elapsed_years(self.last_time) * price.value()
    }

    /// Checkpoints the accumulator, then installs the rate for the next interval.
    pub fn recompute(&mut self, price: Price, now: Timestamp, next_rate: Decimal) -> Decimal {
        self.last_accrued = self.accrued_at(price, now);
        self.last_time = now;
        self.current_rate = next_rate;
        self.last_accrued
    }
}

pub fn utilization(size: Decimal, price: Price, credit_capacity: Quote, params: &UtilizationParams) -> Decimal {
    if size.is_zero() {
        return Decimal::ZERO;
    }
    if !credit_capacity.is_positive() {
        return Decimal::ONE;
    }
    let required = size * price.value() * params.min_credit_percent;
    (required / credit_capacity.value()).min(Decimal::ONE)
}

pub fn utilization_rate(utilization: Decimal, params: &UtilizationParams) -> Decimal {
    let breakpoint = params.utilization_breakpoint_percent;
    if utilization <= breakpoint {
        utilization * params.low_utilization_slope_percent
    } else {
        breakpoint * params.low_utilization_slope_percent
            + (utilization - breakpoint) * params.high_utilization_slope_percent
    }
}
