//! # Configuration
//!
//! All runtime configuration comes from the environment. The two WebSocket
//! endpoints are required; every strategy threshold has a documented default
//! and can be overridden individually.

use std::str::FromStr;
use std::time::Duration;

use eyre::{eyre, Result, WrapErr};

/// Strategy thresholds driving the gate pipeline and the alert evaluator.
#[derive(Clone, Debug)]
pub struct Thresholds {
    /// Minimum pool liquidity in USD for admission.
    pub min_liq_usd: f64,
    /// 1-minute buy volume (USD) for the buy-volume signal.
    pub buy_vol_1m_usd: f64,
    /// 1-minute buy transaction count for the buy-volume signal.
    pub buy_txs_1m: u32,
    /// Ratio of 1-minute volume to the 10-minute baseline.
    pub volume_multiplier: f64,
    /// Ratio of current FDV to a recent sample.
    pub fdv_multiplier: f64,
    /// Absolute USD size of a single buy that qualifies as a whale.
    pub whale_single_buy_usd: f64,
    /// Buy size as a fraction of visible pool liquidity that qualifies.
    pub whale_liquidity_ratio: f64,
    /// Maximum average buy or sell tax before rejection.
    pub max_tax_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            min_liq_usd: 5_000.0,
            buy_vol_1m_usd: 15_000.0,
            buy_txs_1m: 8,
            volume_multiplier: 5.0,
            fdv_multiplier: 3.0,
            whale_single_buy_usd: 5_000.0,
            whale_liquidity_ratio: 0.03,
            max_tax_pct: 0.20,
        }
    }
}

/// Top-level watcher configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub bsc_wss: String,
    pub eth_wss: String,
    pub thresholds: Thresholds,
    /// Upper bound on concurrently subscribed markets.
    pub max_active_markets: usize,
    pub trending_poll_interval: Duration,
    /// Minimum aggregator-reported liquidity for a trending candidate.
    pub trending_min_liq_usd: f64,
    /// Top-K trending pairs requested per chain.
    pub trending_top_k: usize,
}

impl Config {
    /// Load from the environment. Missing required endpoints are fatal;
    /// everything else falls back to the documented default.
    pub fn from_env() -> Result<Self> {
        let bsc_wss = std::env::var("BSC_WSS").wrap_err("BSC_WSS is required")?;
        let eth_wss = std::env::var("ETH_WSS").wrap_err("ETH_WSS is required")?;
        if bsc_wss.is_empty() || eth_wss.is_empty() {
            return Err(eyre!("BSC_WSS and ETH_WSS must be non-empty"));
        }

        let defaults = Thresholds::default();
        let thresholds = Thresholds {
            min_liq_usd: env_or("MIN_LIQ_USD", defaults.min_liq_usd)?,
            buy_vol_1m_usd: env_or("BUY_VOL_1M_USD", defaults.buy_vol_1m_usd)?,
            buy_txs_1m: env_or("BUY_TXS_1M", defaults.buy_txs_1m)?,
            volume_multiplier: env_or("VOLUME_MULTIPLIER", defaults.volume_multiplier)?,
            fdv_multiplier: env_or("FDV_MULTIPLIER", defaults.fdv_multiplier)?,
            whale_single_buy_usd: env_or("WHALE_SINGLE_BUY_USD", defaults.whale_single_buy_usd)?,
            whale_liquidity_ratio: env_or("WHALE_LIQUIDITY_RATIO", defaults.whale_liquidity_ratio)?,
            max_tax_pct: env_or("MAX_TAX_PCT", defaults.max_tax_pct)?,
        };

        Ok(Self {
            bsc_wss,
            eth_wss,
            thresholds,
            max_active_markets: env_or("MAX_ACTIVE_MARKETS", 200usize)?,
            trending_poll_interval: Duration::from_millis(env_or(
                "TRENDING_POLL_INTERVAL_MS",
                60_000u64,
            )?),
            trending_min_liq_usd: env_or("TRENDING_MIN_LIQ_USD", 3_000.0)?,
            trending_top_k: env_or("TRENDING_TOP_K", 50usize)?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.is_empty() => raw
            .parse::<T>()
            .map_err(|e| eyre!("invalid value for {}: {}", key, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let t = Thresholds::default();
        assert_eq!(t.min_liq_usd, 5_000.0);
        assert_eq!(t.max_tax_pct, 0.20);
        assert_eq!(t.whale_liquidity_ratio, 0.03);
        assert_eq!(t.whale_single_buy_usd, 5_000.0);
    }

    #[test]
    fn env_or_parses_and_defaults() {
        std::env::remove_var("DEXWATCH_TEST_UNSET");
        assert_eq!(env_or("DEXWATCH_TEST_UNSET", 7u32).unwrap(), 7);
        std::env::set_var("DEXWATCH_TEST_SET", "42");
        assert_eq!(env_or("DEXWATCH_TEST_SET", 7u32).unwrap(), 42);
        std::env::set_var("DEXWATCH_TEST_BAD", "not-a-number");
        assert!(env_or("DEXWATCH_TEST_BAD", 7u32).is_err());
    }
}
