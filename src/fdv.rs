//! Per-market FDV snapshot history.
//!
//! Short rolling history of fully-diluted-valuation samples, queried as a
//! ratio of the current value to a recent one. Samples retain for 15 minutes;
//! the burst ratio looks back at most 3 minutes.

use std::collections::VecDeque;

use dashmap::DashMap;

use crate::types::MarketKey;

pub const RETAIN_MS: u64 = 15 * 60 * 1000;
pub const LOOKBACK_MS: u64 = 3 * 60 * 1000;

#[derive(Clone, Copy, Debug)]
struct FdvSample {
    timestamp_ms: u64,
    fdv_usd: f64,
}

#[derive(Debug, Default)]
pub struct FdvTracker {
    samples: DashMap<MarketKey, VecDeque<FdvSample>>,
}

impl FdvTracker {
    pub fn new() -> Self {
        Self { samples: DashMap::new() }
    }

    /// Record the current FDV and return `current / oldest-sample-within-
    /// lookback`, where the reference sample predates this push. `None` until
    /// a usable reference exists.
    pub fn push_and_ratio(&self, key: MarketKey, now: u64, fdv_usd: f64) -> Option<f64> {
        let mut series = self.samples.entry(key).or_default();

        let retain_horizon = now.saturating_sub(RETAIN_MS);
        while let Some(front) = series.front() {
            if front.timestamp_ms < retain_horizon {
                series.pop_front();
            } else {
                break;
            }
        }

        let lookback_horizon = now.saturating_sub(LOOKBACK_MS);
        let reference = series
            .iter()
            .find(|s| s.timestamp_ms >= lookback_horizon && s.timestamp_ms < now)
            .map(|s| s.fdv_usd);

        series.push_back(FdvSample { timestamp_ms: now, fdv_usd });

        match reference {
            Some(past) if past > 0.0 && fdv_usd > 0.0 => Some(fdv_usd / past),
            _ => None,
        }
    }

    /// Drop series the idle sweep no longer tracks.
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
        MarketKey::new(Chain::Eth, MarketType::V2, Address::from_low_u64_be(1))
    }

    #[test]
    fn first_sample_has_no_ratio() {
        let tracker = FdvTracker::new();
        assert_eq!(tracker.push_and_ratio(key(), 1_000, 1_000_000.0), None);
    }

    #[test]
    fn ratio_against_three_minute_old_sample() {
        // totalSupply 1e9 at $0.001 = $1M FDV; $0.004 three minutes later = 4x.
        let tracker = FdvTracker::new();
        let t0 = 1_000_000;
        assert_eq!(tracker.push_and_ratio(key(), t0, 1_000_000.0), None);
        let ratio = tracker.push_and_ratio(key(), t0 + LOOKBACK_MS, 4_000_000.0).unwrap();
        assert!((ratio - 4.0).abs() < 1e-12);
    }

    #[test]
    fn stale_reference_is_ignored() {
        let tracker = FdvTracker::new();
        let t0 = 1_000_000;
        tracker.push_and_ratio(key(), t0, 1_000_000.0);
        // Four minutes later the only prior sample is outside the lookback.
        assert_eq!(tracker.push_and_ratio(key(), t0 + 4 * 60 * 1000, 9_000_000.0), None);
    }

    #[test]
    fn zero_fdv_never_divides() {
        let tracker = FdvTracker::new();
        let t0 = 1_000_000;
        tracker.push_and_ratio(key(), t0, 0.0);
        assert_eq!(tracker.push_and_ratio(key(), t0 + 60_000, 5_000.0), None);
    }
}
