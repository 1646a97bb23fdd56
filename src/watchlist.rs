//! # Market Watchlist
//!
//! The per-market lifecycle registry. Every other component holds only a
//! `MarketKey` and asks the watchlist for the current entry; there is no
//! pointer graph between subscribers and registry state.
//!
//! Lifecycle invariant: `pending -> active` and `pending -> rejected` are the
//! only transitions; `active` and `rejected` are terminal until the idle
//! sweep evicts the entry.

use dashmap::DashMap;
use tracing::{debug, info};

use crate::types::{now_ms, Candidate, MarketEntry, MarketKey, MarketStatus};

/// Active markets expire this long after their last update.
pub const ACTIVE_EXPIRY_MS: u64 = 24 * 60 * 60 * 1000;
/// Pending/rejected markets expire this long after their last update.
pub const NON_ACTIVE_EXPIRY_MS: u64 = 60 * 60 * 1000;

#[derive(Debug, Default)]
pub struct Watchlist {
    markets: DashMap<MarketKey, MarketEntry>,
    /// Rejection reason -> count, for the periodic health summary.
    rejection_counts: DashMap<String, u64>,
}

impl Watchlist {
    pub fn new() -> Self {
        Self { markets: DashMap::new(), rejection_counts: DashMap::new() }
    }

    /// Idempotent insert: registers the candidate as `pending` and returns
    /// true, or returns false when the key already exists (reorg duplicates,
    /// re-polled trending pairs).
    pub fn insert_pending(&self, candidate: &Candidate, base_hint: Option<ethers::types::Address>) -> bool {
        let key = candidate.key();
        let now = now_ms();
        let mut inserted = false;
        self.markets.entry(key).or_insert_with(|| {
            inserted = true;
            MarketEntry {
                key,
                token0: candidate.token0,
                token1: candidate.token1,
                fee: candidate.fee,
                first_seen_ms: now,
                last_updated_ms: now,
                status: MarketStatus::Pending,
                reason: None,
                liquidity_usd: candidate.reported_liquidity_usd,
                last_mint_usd: None,
                base_hint,
            }
        });
        inserted
    }

    pub fn get(&self, key: &MarketKey) -> Option<MarketEntry> {
        self.markets.get(key).map(|e| e.clone())
    }

    pub fn status(&self, key: &MarketKey) -> Option<MarketStatus> {
        self.markets.get(key).map(|e| e.status)
    }

    /// `pending -> active`. Returns false (and changes nothing) for any other
    /// starting state.
    pub fn mark_active(&self, key: &MarketKey, liquidity_usd: f64) -> bool {
        match self.markets.get_mut(key) {
            Some(mut entry) if entry.status == MarketStatus::Pending => {
                entry.status = MarketStatus::Active;
                entry.liquidity_usd = Some(liquidity_usd);
                entry.last_updated_ms = now_ms();
                info!(target: "watchlist", market = %key, liquidity_usd, "market admitted");
                true
            }
            _ => false,
        }
    }

    /// `pending -> rejected` with a machine-readable reason. Terminal.
    pub fn mark_rejected(&self, key: &MarketKey, reason: &str) -> bool {
        match self.markets.get_mut(key) {
            Some(mut entry) if entry.status == MarketStatus::Pending => {
                entry.status = MarketStatus::Rejected;
                entry.reason = Some(reason.to_string());
                entry.last_updated_ms = now_ms();
                // Bucket by the check name (text before the first ':').
                let bucket = reason.split(':').next().unwrap_or(reason).trim().to_string();
                *self.rejection_counts.entry(bucket).or_insert(0) += 1;
                info!(target: "watchlist", market = %key, reason, "market rejected");
                true
            }
            _ => false,
        }
    }

    /// Refresh `last_updated` on trade or liquidity activity.
    pub fn touch(&self, key: &MarketKey) {
        if let Some(mut entry) = self.markets.get_mut(key) {
            entry.last_updated_ms = now_ms();
        }
    }

    pub fn set_liquidity_usd(&self, key: &MarketKey, liquidity_usd: f64) {
        if let Some(mut entry) = self.markets.get_mut(key) {
            entry.liquidity_usd = Some(liquidity_usd);
            entry.last_updated_ms = now_ms();
        }
    }

    pub fn set_last_mint_usd(&self, key: &MarketKey, mint_usd: f64) {
        if let Some(mut entry) = self.markets.get_mut(key) {
            entry.last_mint_usd = Some(mint_usd);
            entry.last_updated_ms = now_ms();
        }
    }

    /// Evict expired entries and return their keys so the caller can release
    /// subscription slots. Active entries live 24 h past their last update,
    /// everything else 1 h.
    pub fn sweep(&self, now: u64) -> Vec<MarketKey> {
        let mut evicted = Vec::new();
        self.markets.retain(|key, entry| {
            let horizon = if entry.status == MarketStatus::Active {
                ACTIVE_EXPIRY_MS
            } else {
                NON_ACTIVE_EXPIRY_MS
            };
            let keep = now.saturating_sub(entry.last_updated_ms) < horizon;
            if !keep {
                debug!(target: "watchlist", market = %key, status = %entry.status, "entry expired");
                evicted.push(*key);
            }
            keep
        });
        evicted
    }

    /// `(pending, active, rejected)` counts for the health log.
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for entry in self.markets.iter() {
            match entry.status {
                MarketStatus::Pending => counts.0 += 1,
                MarketStatus::Active => counts.1 += 1,
                MarketStatus::Rejected => counts.2 += 1,
            }
        }
        counts
    }

    /// Snapshot of rejection causes since startup.
    pub fn rejection_summary(&self) -> Vec<(String, u64)> {
        let mut summary: Vec<(String, u64)> =
            self.rejection_counts.iter().map(|e| (e.key().clone(), *e.value())).collect();
        summary.sort_by(|a, b| b.1.cmp(&a.1));
        summary
    }
}
