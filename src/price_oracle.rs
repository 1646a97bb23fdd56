//! # USD Price Oracle
//!
//! USD quotes for recognized base tokens, with a best-effort path for
//! arbitrary tokens. Sources in order: the market aggregator (best pair by
//! reported pool liquidity on the matching chain), then a 1.00 fallback for
//! stablecoins when the aggregator is unavailable. Results are cached with a
//! short TTL; concurrent misses may double-fetch, which is harmless.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use ethers::types::Address;
use moka::future::Cache;
use tracing::{debug, warn};

use crate::aggregator::AggregatorSource;
use crate::chains;
use crate::errors::PriceError;
use crate::types::Chain;

const PRICE_CACHE_TTL: Duration = Duration::from_secs(30);
const PRICE_CACHE_CAPACITY: u64 = 4_096;

pub struct PriceOracle {
    aggregator: Arc<dyn AggregatorSource>,
    cache: Cache<(Chain, Address), f64>,
}

impl fmt::Debug for PriceOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PriceOracle").field("cached", &self.cache.entry_count()).finish()
    }
}

impl PriceOracle {
    pub fn new(aggregator: Arc<dyn AggregatorSource>) -> Self {
        Self {
            aggregator,
            cache: Cache::builder()
                .time_to_live(PRICE_CACHE_TTL)
                .max_capacity(PRICE_CACHE_CAPACITY)
                .build(),
        }
    }

    /// USD price for a recognized base token. Errors for non-base tokens and
    /// for non-stable bases when no source can quote them.
    pub async fn base_token_usd(&self, chain: Chain, token: Address) -> Result<f64, PriceError> {
        let base = chains::base_token(chain, token).ok_or_else(|| {
            PriceError::NotAvailable(format!("{:#x} is not a recognized base token on {}", token, chain))
        })?;

        if let Some(cached) = self.cache.get(&(chain, token)).await {
            return Ok(cached);
        }

        match self.aggregator_price(chain, token).await {
            Some(price) => {
                self.cache.insert((chain, token), price).await;
                Ok(price)
            }
            None if base.stable => {
                debug!(target: "price_oracle", chain = %chain, symbol = base.symbol,
                       "aggregator unavailable, using stablecoin fallback 1.00");
                Ok(1.0)
            }
            None => Err(PriceError::NotAvailable(format!(
                "no aggregator quote for base token {} on {}",
                base.symbol, chain
            ))),
        }
    }

    /// Best-effort USD price for an arbitrary token. `None` when the
    /// aggregator has no entry and the token is not a stable base.
    pub async fn fetch_token_usd(&self, chain: Chain, token: Address) -> Option<f64> {
        if let Some(cached) = self.cache.get(&(chain, token)).await {
            return Some(cached);
        }

        if let Some(price) = self.aggregator_price(chain, token).await {
            self.cache.insert((chain, token), price).await;
            return Some(price);
        }

        match chains::base_token(chain, token) {
            Some(base) if base.stable => Some(1.0),
            _ => None,
        }
    }

    /// Best aggregator quote: the pair with the deepest reported liquidity
    /// on the right chain wins.
    async fn aggregator_price(&self, chain: Chain, token: Address) -> Option<f64> {
        let pairs = match self.aggregator.token_pairs(chain, token).await {
            Ok(p) => p,
            Err(e) => {
                warn!(target: "price_oracle", chain = %chain, ?token, error = %e, "aggregator lookup failed");
                return None;
            }
        };

        // The aggregator quotes each pair's own base token, so only pairs
        // where our token is that side are usable.
        pairs
            .iter()
            .filter(|p| p.base_token_address() == Some(token) && p.price_usd().is_some())
            .max_by(|a, b| {
                a.liquidity_usd()
                    .unwrap_or(0.0)
                    .partial_cmp(&b.liquidity_usd().unwrap_or(0.0))
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .and_then(|best| best.price_usd())
    }
}
