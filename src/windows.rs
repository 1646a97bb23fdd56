//! # Sliding Trade Windows
//!
//! Per-market FIFO of trade events with wall-clock pruning. Aggregates walk
//! backwards from the tail until the timestamp leaves the query horizon, so
//! their cost is proportional to the events inside the horizon. The unique
//! buyer set is rebuilt on every query; no running set is kept.
//!
//! Within one market, appends arrive from a single subscriber task, so
//! timestamps are monotonically non-decreasing per entry.

use std::collections::{HashSet, VecDeque};

use dashmap::DashMap;
use tracing::debug;

use crate::types::{MarketKey, TradeEvent};

/// Events older than this are invisible to every aggregate query.
pub const KEEP_MS: u64 = 10 * 60 * 1000;
/// Batched prune cadence: at most this many appends between prunes.
const PRUNE_EVERY: u32 = 128;
/// Markets with no appends for this long are evicted wholesale.
pub const DEFAULT_IDLE_DROP_MS: u64 = 2 * 60 * 60 * 1000;

const ONE_MINUTE_MS: u64 = 60 * 1000;

/// Aggregates over the trailing minute.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct MinuteStats {
    pub total_usd: f64,
    pub buy_usd: f64,
    pub buy_txs: u32,
    pub unique_buyers: u32,
}

#[derive(Debug, Default)]
struct MarketWindow {
    events: VecDeque<TradeEvent>,
    appends_since_prune: u32,
    last_append_ms: u64,
}

impl MarketWindow {
    fn prune(&mut self, now: u64) {
        let horizon = now.saturating_sub(KEEP_MS);
        while let Some(front) = self.events.front() {
            if front.timestamp_ms < horizon {
                self.events.pop_front();
            } else {
                break;
            }
        }
        self.appends_since_prune = 0;
    }
}

/// Store of all per-market sliding windows.
#[derive(Debug)]
pub struct WindowStore {
    windows: DashMap<MarketKey, MarketWindow>,
    idle_drop_ms: u64,
}

impl WindowStore {
    pub fn new() -> Self {
        Self::with_idle_drop(DEFAULT_IDLE_DROP_MS)
    }

    pub fn with_idle_drop(idle_drop_ms: u64) -> Self {
        Self { windows: DashMap::new(), idle_drop_ms }
    }

    /// Fold one trade into the market's window.
    pub fn record(&self, key: MarketKey, event: TradeEvent) {
        let mut window = self.windows.entry(key).or_default();
        window.last_append_ms = event.timestamp_ms;
        window.events.push_back(event);
        window.appends_since_prune += 1;
        if window.appends_since_prune >= PRUNE_EVERY {
            window.prune(event.timestamp_ms);
        }
    }

    /// `{total_usd, buy_usd, buy_txs, unique_buyers}` over `[now - 60s, now]`.
    pub fn one_minute(&self, key: &MarketKey, now: u64) -> MinuteStats {
        let mut stats = MinuteStats::default();
        let Some(mut window) = self.windows.get_mut(key) else {
            return stats;
        };
        window.prune(now);

        let horizon = now.saturating_sub(ONE_MINUTE_MS);
        let mut buyers: HashSet<_> = HashSet::new();
        for event in window.events.iter().rev() {
            if event.timestamp_ms < horizon {
                break;
            }
            stats.total_usd += event.usd_value;
            if event.is_buy {
                stats.buy_usd += event.usd_value;
                stats.buy_txs += 1;
                if let Some(buyer) = event.buyer {
                    buyers.insert(buyer);
                }
            }
        }
        stats.unique_buyers = buyers.len() as u32;
        stats
    }

    /// Total USD volume over `[now - 600s, now]`.
    pub fn ten_minutes_total(&self, key: &MarketKey, now: u64) -> f64 {
        let Some(mut window) = self.windows.get_mut(key) else {
            return 0.0;
        };
        window.prune(now);

        let horizon = now.saturating_sub(KEEP_MS);
        window
            .events
            .iter()
            .rev()
            .take_while(|e| e.timestamp_ms >= horizon)
            .map(|e| e.usd_value)
            .sum()
    }

    /// Average per-minute volume over the nine minutes preceding the current
    /// one: `max(0, total10m - total1m) / 9`. Never negative.
    pub fn baseline_avg_per_min(&self, key: &MarketKey, now: u64) -> f64 {
        let total_10m = self.ten_minutes_total(key, now);
        let last_1m = self.one_minute(key, now).total_usd;
        (total_10m - last_1m).max(0.0) / 9.0
    }

    /// Drop whole windows with no activity for `idle_drop_ms`; returns the
    /// evicted keys so the caller can release subscription slots.
    pub fn evict_idle(&self, now: u64) -> Vec<MarketKey> {
        let idle = self.idle_drop_ms;
        let mut evicted = Vec::new();
        self.windows.retain(|key, window| {
            let keep = now.saturating_sub(window.last_append_ms) < idle;
            if !keep {
                evicted.push(*key);
            }
            keep
        });
        if !evicted.is_empty() {
            debug!(target: "windows", evicted = evicted.len(), "idle windows dropped");
        }
        evicted
    }

    pub fn tracked_markets(&self) -> usize {
        self.windows.len()
    }
}
