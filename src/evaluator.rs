//! # Alert Evaluator
//!
//! Folds the per-market statistics (sliding windows, FDV history, trade
//! context) into derived signals, scores them, and emits a graded alert when
//! the verdict warrants one. Alerts are delivered synchronously to the
//! notifier from here.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use ethers::types::Address;
use moka::future::Cache;
use tracing::{debug, trace};

use crate::amm_price::{normalize, ReservesPricer};
use crate::blockchain::ChainClients;
use crate::config::Thresholds;
use crate::decimals::DecimalsCache;
use crate::fdv::FdvTracker;
use crate::notifier::Notifier;
use crate::price_oracle::PriceOracle;
use crate::types::{
    now_ms, Alert, AlertLevel, Chain, MarketEntry, MarketKey, MarketStatus,
};
use crate::watchlist::Watchlist;
use crate::windows::WindowStore;

/// Total supply changes rarely; cache the normalized value briefly.
const SUPPLY_CACHE_TTL: Duration = Duration::from_secs(60);
const SUPPLY_CACHE_CAPACITY: u64 = 4_096;

/// Liquidity-add bonus threshold as a multiple of the admission minimum.
const MINT_BONUS_FACTOR: f64 = 1.2;

//================================================================================================//
//                                     SIGNALS AND SCORING                                        //
//================================================================================================//

/// One trade's evaluation request, as forwarded by the subscriber.
#[derive(Clone, Copy, Debug)]
pub struct TradeSignal {
    pub key: MarketKey,
    pub target: Address,
    pub usd_value: f64,
    pub is_buy: bool,
}

/// Derived signals for a single evaluation.
#[derive(Clone, Copy, Debug, Default)]
pub struct Signals {
    pub is_buy: bool,
    pub buy_meets_volume: bool,
    pub volume_burst: bool,
    pub fdv_burst: bool,
    pub whale: bool,
    pub mint_bonus: bool,
}

impl Signals {
    /// buy +2, volume burst +2, FDV burst +2, whale +3, mint bonus +1.
    pub fn score(&self) -> u8 {
        let mut score = 0u8;
        if self.is_buy {
            score += 2;
        }
        if self.volume_burst {
            score += 2;
        }
        if self.fdv_burst {
            score += 2;
        }
        if self.whale {
            score += 3;
        }
        if self.mint_bonus {
            score += 1;
        }
        score
    }

    /// `strong` needs score >= 6 plus a whale or a combined volume+FDV burst;
    /// `normal` needs score >= 3.
    pub fn verdict(&self) -> Option<AlertLevel> {
        let score = self.score();
        if score >= 6 && (self.whale || (self.volume_burst && self.fdv_burst)) {
            Some(AlertLevel::Strong)
        } else if score >= 3 {
            Some(AlertLevel::Normal)
        } else {
            None
        }
    }

    fn triggered(&self) -> Vec<&'static str> {
        let mut factors = Vec::new();
        if self.is_buy {
            factors.push("buy");
        }
        if self.buy_meets_volume {
            factors.push("buy volume");
        }
        if self.volume_burst {
            factors.push("volume burst");
        }
        if self.fdv_burst {
            factors.push("fdv burst");
        }
        if self.whale {
            factors.push("whale");
        }
        if self.mint_bonus {
            factors.push("mint bonus");
        }
        factors
    }
}

//================================================================================================//
//                                         EVALUATOR                                              //
//================================================================================================//

pub struct AlertEvaluator {
    windows: Arc<WindowStore>,
    fdv: Arc<FdvTracker>,
    watchlist: Arc<Watchlist>,
    pricer: Arc<ReservesPricer>,
    oracle: Arc<PriceOracle>,
    clients: Arc<ChainClients>,
    decimals: Arc<DecimalsCache>,
    notifier: Arc<dyn Notifier>,
    thresholds: Thresholds,
    supply_cache: Cache<(Chain, Address), f64>,
}

impl fmt::Debug for AlertEvaluator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertEvaluator").finish()
    }
}

impl AlertEvaluator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        windows: Arc<WindowStore>,
        fdv: Arc<FdvTracker>,
        watchlist: Arc<Watchlist>,
        pricer: Arc<ReservesPricer>,
        oracle: Arc<PriceOracle>,
        clients: Arc<ChainClients>,
        decimals: Arc<DecimalsCache>,
        notifier: Arc<dyn Notifier>,
        thresholds: Thresholds,
    ) -> Self {
        Self {
            windows,
            fdv,
            watchlist,
            pricer,
            oracle,
            clients,
            decimals,
            notifier,
            thresholds,
            supply_cache: Cache::builder()
                .time_to_live(SUPPLY_CACHE_TTL)
                .max_capacity(SUPPLY_CACHE_CAPACITY)
                .build(),
        }
    }

    /// Evaluate one trade against the market's rolling state and notify on a
    /// `normal` or `strong` verdict.
    pub async fn evaluate(&self, signal: TradeSignal) {
        let Some(entry) = self.watchlist.get(&signal.key) else {
            return;
        };
        if entry.status != MarketStatus::Active {
            return;
        }

        let now = now_ms();
        let t = &self.thresholds;
        let stats = self.windows.one_minute(&signal.key, now);
        let baseline = self.windows.baseline_avg_per_min(&signal.key, now);

        let buy_meets_volume =
            stats.buy_usd >= t.buy_vol_1m_usd && stats.buy_txs >= t.buy_txs_1m;

        // Baseline of zero means any current volume is an infinite multiple.
        let multiplier = if baseline > 0.0 {
            stats.total_usd / baseline
        } else if stats.total_usd > 0.0 {
            f64::INFINITY
        } else {
            0.0
        };
        let volume_burst = multiplier >= t.volume_multiplier;

        let (fdv_usd, fdv_ratio) = self.fdv_snapshot(&entry, signal.target, now).await;
        let fdv_burst = fdv_ratio.map(|r| r >= t.fdv_multiplier).unwrap_or(false);

        let liquidity_ratio = entry
            .liquidity_usd
            .filter(|l| *l > 0.0)
            .map(|l| signal.usd_value / l);
        let whale = signal.is_buy
            && (liquidity_ratio.map(|r| r >= t.whale_liquidity_ratio).unwrap_or(false)
                || signal.usd_value >= t.whale_single_buy_usd);

        let mint_bonus = entry
            .last_mint_usd
            .map(|m| m >= MINT_BONUS_FACTOR * t.min_liq_usd)
            .unwrap_or(false);

        let signals = Signals {
            is_buy: signal.is_buy,
            buy_meets_volume,
            volume_burst,
            fdv_burst,
            whale,
            mint_bonus,
        };

        trace!(target: "evaluator", market = %signal.key, score = signals.score(),
               ?signals, "trade evaluated");

        let Some(level) = signals.verdict() else {
            return;
        };

        let alert = self.build_alert(
            level, &entry, &signal, &signals, &stats, multiplier, fdv_usd, fdv_ratio,
            liquidity_ratio, now,
        );
        debug!(target: "evaluator", market = %signal.key, level = %level, "alert dispatched");
        self.notifier.notify(&alert);
    }

    /// Current FDV (supply x USD price) pushed into the tracker, plus the
    /// short-history ratio. AMM-derived price preferred, aggregator fallback.
    async fn fdv_snapshot(
        &self,
        entry: &MarketEntry,
        target: Address,
        now: u64,
    ) -> (Option<f64>, Option<f64>) {
        let chain = entry.key.chain;
        let price = match self.pricer.target_price_usd(entry, target).await {
            Ok(Some(p)) => Some(p),
            _ => self.oracle.fetch_token_usd(chain, target).await,
        };
        let Some(price) = price else {
            return (None, None);
        };

        let supply = match self.supply_cache.get(&(chain, target)).await {
            Some(s) => Some(s),
            None => match self.clients.get(chain) {
                Ok(client) => match client.total_supply(target).await {
                    Ok(raw) => {
                        let dec = self.decimals.get(chain, target, client.as_ref()).await;
                        let normalized = normalize(raw, dec);
                        self.supply_cache.insert((chain, target), normalized).await;
                        Some(normalized)
                    }
                    Err(e) => {
                        trace!(target: "evaluator", market = %entry.key, error = %e, "totalSupply failed");
                        None
                    }
                },
                Err(_) => None,
            },
        };
        let Some(supply) = supply else {
            return (None, None);
        };

        let fdv = supply * price;
        let ratio = self.fdv.push_and_ratio(entry.key, now, fdv);
        (Some(fdv), ratio)
    }

    #[allow(clippy::too_many_arguments)]
    fn build_alert(
        &self,
        level: AlertLevel,
        entry: &MarketEntry,
        signal: &TradeSignal,
        signals: &Signals,
        stats: &crate::windows::MinuteStats,
        multiplier: f64,
        fdv_usd: Option<f64>,
        fdv_ratio: Option<f64>,
        liquidity_ratio: Option<f64>,
        now: u64,
    ) -> Alert {
        let headline = format!(
            "{} {} {:#x}: {} (score {})",
            entry.key.chain,
            entry.key.market_type,
            entry.key.address,
            signals.triggered().join(" + "),
            signals.score(),
        );

        let mut lines = Vec::new();
        let when = Utc
            .timestamp_millis_opt(now as i64)
            .single()
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default();
        lines.push(format!("at {}", when));
        lines.push(format!(
            "1m buys: ${:.0} across {} txs ({} unique buyers)",
            stats.buy_usd, stats.buy_txs, stats.unique_buyers
        ));
        if multiplier.is_finite() {
            lines.push(format!(
                "1m volume ${:.0}, x{:.1} over baseline",
                stats.total_usd, multiplier
            ));
        } else {
            lines.push(format!("1m volume ${:.0}, no prior baseline", stats.total_usd));
        }
        if let Some(fdv) = fdv_usd {
            match fdv_ratio {
                Some(ratio) => lines.push(format!("fdv ${:.0} (x{:.1} in 3m)", fdv, ratio)),
                None => lines.push(format!("fdv ${:.0}", fdv)),
            }
        }
        if signals.whale {
            match liquidity_ratio {
                Some(ratio) if ratio >= self.thresholds.whale_liquidity_ratio => {
                    lines.push(format!(
                        "whale buy ${:.0} = {:.1}% of pool liquidity",
                        signal.usd_value,
                        ratio * 100.0
                    ));
                }
                _ => lines.push(format!("whale buy ${:.0}", signal.usd_value)),
            }
        }
        if let Some(mint) = entry.last_mint_usd {
            if signals.mint_bonus {
                lines.push(format!("recent liquidity add ${:.0}", mint));
            }
        }

        Alert {
            level,
            chain: entry.key.chain,
            market_type: entry.key.market_type,
            address: entry.key.address,
            token0: entry.token0,
            token1: entry.token1,
            target: signal.target,
            headline,
            body: lines.join("\n"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scoring_matches_weights() {
        let all = Signals {
            is_buy: true,
            buy_meets_volume: true,
            volume_burst: true,
            fdv_burst: true,
            whale: true,
            mint_bonus: true,
        };
        assert_eq!(all.score(), 10);
        assert_eq!(Signals::default().score(), 0);
        assert_eq!(Signals { whale: true, ..Default::default() }.score(), 3);
    }

    #[test]
    fn buy_plus_volume_burst_is_normal() {
        // Ten buys totaling 20k against a 500/min baseline: multiplier 40,
        // buy + volume burst = 4 points, no strong qualifier.
        let signals = Signals {
            is_buy: true,
            buy_meets_volume: true,
            volume_burst: true,
            ..Default::default()
        };
        assert_eq!(signals.score(), 4);
        assert_eq!(signals.verdict(), Some(AlertLevel::Normal));
    }

    #[test]
    fn whale_with_fdv_burst_is_strong() {
        // buy(2) + whale(3) + fdv burst(2) = 7 and the whale qualifier holds.
        let signals =
            Signals { is_buy: true, whale: true, fdv_burst: true, ..Default::default() };
        assert_eq!(signals.score(), 7);
        assert_eq!(signals.verdict(), Some(AlertLevel::Strong));
    }

    #[test]
    fn high_score_without_qualifier_stays_normal() {
        // buy + volume burst + mint bonus = 5: below strong score, normal.
        let signals = Signals {
            is_buy: true,
            volume_burst: true,
            mint_bonus: true,
            ..Default::default()
        };
        assert_eq!(signals.verdict(), Some(AlertLevel::Normal));

        // Score 6 via buy + volume burst + fdv burst qualifies as strong.
        let qualified = Signals {
            is_buy: true,
            volume_burst: true,
            fdv_burst: true,
            ..Default::default()
        };
        assert_eq!(qualified.score(), 6);
        assert_eq!(qualified.verdict(), Some(AlertLevel::Strong));
    }

    #[test]
    fn quiet_trades_yield_no_verdict() {
        assert_eq!(Signals::default().verdict(), None);
        assert_eq!(Signals { is_buy: true, ..Default::default() }.verdict(), None);
    }
}
