//! Effective-fee ("tax") estimation from observed swaps.
//!
//! For swaps whose counterpart is a recognized base token, the realized
//! output is compared with the mid-price expectation:
//! `tax = clamp(0, 1, 1 - observed / max(expected, eps))`. Samples retain for
//! ten minutes; the gate consults the average only when samples exist.
//!
//! All inputs are decimal-normalized natural-unit amounts; raw integer
//! amounts never reach this module.

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::trace;

use crate::types::MarketKey;

pub const RETAIN_MS: u64 = 10 * 60 * 1000;
const EPS: f64 = 1e-12;

#[derive(Clone, Copy, Debug)]
struct TaxSample {
    timestamp_ms: u64,
    buy_tax: Option<f64>,
    sell_tax: Option<f64>,
}

/// Mean buy/sell taxes over the retained window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TaxAverages {
    pub buy: Option<f64>,
    pub sell: Option<f64>,
}

impl TaxAverages {
    pub fn is_empty(&self) -> bool {
        self.buy.is_none() && self.sell.is_none()
    }
}

#[derive(Debug, Default)]
pub struct TaxEstimator {
    samples: DashMap<MarketKey, VecDeque<TaxSample>>,
}

impl TaxEstimator {
    pub fn new() -> Self {
        Self { samples: DashMap::new() }
    }

    /// Record one effective-fee observation. `expected` and `observed` are
    /// both in the swap's output token, decimal-normalized.
    pub fn record(
        &self,
        key: MarketKey,
        now: u64,
        expected: f64,
        observed: f64,
        is_buy: bool,
    ) {
        if expected <= 0.0 || !expected.is_finite() || !observed.is_finite() || observed < 0.0 {
            return;
        }
        let tax = (1.0 - observed / expected.max(EPS)).clamp(0.0, 1.0);
        trace!(target: "tax", market = %key, tax, is_buy, "fee sample");

        let mut series = self.samples.entry(key).or_default();
        let horizon = now.saturating_sub(RETAIN_MS);
        while let Some(front) = series.front() {
            if front.timestamp_ms < horizon {
                series.pop_front();
            } else {
                break;
            }
        }
        series.push_back(TaxSample {
            timestamp_ms: now,
            buy_tax: is_buy.then_some(tax),
            sell_tax: (!is_buy).then_some(tax),
        });
    }

    /// Arithmetic means over the retained window; `None` per side without
    /// samples.
    pub fn avg(&self, key: &MarketKey, now: u64) -> TaxAverages {
        let Some(mut series) = self.samples.get_mut(key) else {
            return TaxAverages::default();
        };
        let horizon = now.saturating_sub(RETAIN_MS);
        while let Some(front) = series.front() {
            if front.timestamp_ms < horizon {
                series.pop_front();
            } else {
                break;
            }
        }

        let mean = |values: Vec<f64>| {
            if values.is_empty() {
                None
            } else {
                Some(values.iter().sum::<f64>() / values.len() as f64)
            }
        };
        TaxAverages {
            buy: mean(series.iter().filter_map(|s| s.buy_tax).collect()),
            sell: mean(series.iter().filter_map(|s| s.sell_tax).collect()),
        }
    }

    pub fn drop_market(&self, key: &MarketKey) {
        self.samples.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Chain, MarketType};
    use ethers::types::Address;

    fn key() -> MarketKey {
        MarketKey::new(Chain::Bsc, MarketType::V2, Address::from_low_u64_be(1))
    }

    #[test]
    fn tax_is_clamped_to_unit_interval() {
        let est = TaxEstimator::new();
        let k = key();
        // Observed above expectation clamps to 0.
        est.record(k, 1_000, 100.0, 120.0, true);
        // Observed zero clamps to 1.
        est.record(k, 1_000, 100.0, 0.0, true);
        let avg = est.avg(&k, 1_000).buy.unwrap();
        assert!((avg - 0.5).abs() < 1e-12);
        assert!((0.0..=1.0).contains(&avg));
    }

    #[test]
    fn sides_average_independently() {
        let est = TaxEstimator::new();
        let k = key();
        est.record(k, 1_000, 100.0, 90.0, true); // 10% buy
        est.record(k, 1_100, 100.0, 95.0, true); // 5% buy
        est.record(k, 1_200, 100.0, 80.0, false); // 20% sell
        let avg = est.avg(&k, 2_000);
        assert!((avg.buy.unwrap() - 0.075).abs() < 1e-12);
        assert!((avg.sell.unwrap() - 0.20).abs() < 1e-12);
    }

    #[test]
    fn old_samples_leave_the_window() {
        let est = TaxEstimator::new();
        let k = key();
        est.record(k, 1_000, 100.0, 50.0, false);
        assert!(est.avg(&k, 1_000).sell.is_some());
        assert!(est.avg(&k, 1_000 + RETAIN_MS + 1).is_empty());
    }

    #[test]
    fn garbage_inputs_are_ignored() {
        let est = TaxEstimator::new();
        let k = key();
        est.record(k, 1_000, 0.0, 10.0, true);
        est.record(k, 1_000, -5.0, 10.0, true);
        est.record(k, 1_000, f64::NAN, 10.0, true);
        est.record(k, 1_000, 100.0, f64::NAN, true);
        assert!(est.avg(&k, 1_000).is_empty());
    }
}
