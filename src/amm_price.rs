//! # AMM Price Derivation
//!
//! Pure price formulas for both pool generations plus the `ReservesPricer`,
//! which combines live pool state with the base-token oracle to put a USD
//! price on a market's target side.
//!
//! Token amounts stay arbitrary-precision until the final division by
//! `10^decimals`; floating point only ever carries statistics, never values
//! fed back into on-chain probes.

use std::sync::Arc;

use ethers::types::{Address, I256, U256};
use tracing::trace;

use crate::blockchain::ChainClients;
use crate::chains;
use crate::decimals::DecimalsCache;
use crate::errors::PriceError;
use crate::price_oracle::PriceOracle;
use crate::types::{MarketEntry, MarketType};

//================================================================================================//
//                                        PURE FORMULAS                                           //
//================================================================================================//

/// Lossy `U256 -> f64`, exact for anything that fits in 128 bits.
pub fn u256_to_f64(v: U256) -> f64 {
    if v.bits() <= 128 {
        v.as_u128() as f64
    } else {
        v.to_string().parse::<f64>().unwrap_or(f64::INFINITY)
    }
}

/// Normalize a raw token amount to natural units.
pub fn normalize(raw: U256, decimals: u8) -> f64 {
    u256_to_f64(raw) / 10f64.powi(decimals as i32)
}

/// Signed variant for V3 deltas.
pub fn normalize_signed(raw: I256, decimals: u8) -> f64 {
    let negative = raw.is_negative();
    let magnitude = u256_to_f64(raw.unsigned_abs());
    let v = magnitude / 10f64.powi(decimals as i32);
    if negative {
        -v
    } else {
        v
    }
}

/// V2 relative prices from reserves: `(token0 in token1, token1 in token0)`.
/// `None` when either normalized reserve is not strictly positive.
pub fn v2_relative_prices(r0: U256, r1: U256, d0: u8, d1: u8) -> Option<(f64, f64)> {
    let n0 = normalize(r0, d0);
    let n1 = normalize(r1, d1);
    if n0 <= 0.0 || n1 <= 0.0 || !n0.is_finite() || !n1.is_finite() {
        return None;
    }
    Some((n1 / n0, n0 / n1))
}

/// V3 price of token1 per token0 from `sqrtPriceX96`:
/// `sp = sqrtPriceX96 / 2^96`, `price = sp^2 * 10^(d0 - d1)`.
pub fn v3_price_token1_per_token0(sqrt_price_x96: U256, d0: u8, d1: u8) -> Option<f64> {
    let sp = u256_to_f64(sqrt_price_x96) / 2f64.powi(96);
    let price = sp * sp * 10f64.powi(d0 as i32 - d1 as i32);
    if price.is_finite() && price > 0.0 {
        Some(price)
    } else {
        None
    }
}

//================================================================================================//
//                                       RESERVES PRICER                                          //
//================================================================================================//

/// Derives USD prices for a market's tokens from live pool state.
pub struct ReservesPricer {
    clients: Arc<ChainClients>,
    decimals: Arc<DecimalsCache>,
    oracle: Arc<PriceOracle>,
}

impl ReservesPricer {
    pub fn new(
        clients: Arc<ChainClients>,
        decimals: Arc<DecimalsCache>,
        oracle: Arc<PriceOracle>,
    ) -> Self {
        Self { clients, decimals, oracle }
    }

    /// Relative price of `want` expressed in units of the other pool token.
    pub async fn relative_price(
        &self,
        entry: &MarketEntry,
        want: Address,
    ) -> Result<Option<f64>, PriceError> {
        let chain = entry.key.chain;
        let client = self
            .clients
            .get(chain)
            .map_err(|e| PriceError::NotAvailable(e.to_string()))?;
        let d0 = self.decimals.get(chain, entry.token0, client.as_ref()).await;
        let d1 = self.decimals.get(chain, entry.token1, client.as_ref()).await;

        let (p0_in_1, p1_in_0) = match entry.key.market_type {
            MarketType::V2 => {
                let (r0, r1) = client
                    .v2_reserves(entry.key.address)
                    .await
                    .map_err(|e| PriceError::NotAvailable(e.to_string()))?;
                match v2_relative_prices(r0, r1, d0, d1) {
                    Some(p) => p,
                    None => return Ok(None),
                }
            }
            MarketType::V3 => {
                let sqrt_price = client
                    .v3_sqrt_price_x96(entry.key.address)
                    .await
                    .map_err(|e| PriceError::NotAvailable(e.to_string()))?;
                match v3_price_token1_per_token0(sqrt_price, d0, d1) {
                    Some(p0_in_1) => (p0_in_1, 1.0 / p0_in_1),
                    None => return Ok(None),
                }
            }
        };

        if want == entry.token0 {
            Ok(Some(p0_in_1))
        } else if want == entry.token1 {
            Ok(Some(p1_in_0))
        } else {
            Err(PriceError::Calculation(format!(
                "token {:#x} is not a side of market {}",
                want, entry.key
            )))
        }
    }

    /// USD price of `target`, derived from pool state and the base-token
    /// oracle. When both sides are priced base tokens, the higher-priority
    /// base wins. `Ok(None)` when the pool state yields no usable price.
    pub async fn target_price_usd(
        &self,
        entry: &MarketEntry,
        target: Address,
    ) -> Result<Option<f64>, PriceError> {
        let chain = entry.key.chain;
        let other = if target == entry.token0 { entry.token1 } else { entry.token0 };

        // Candidate base sides ordered by priority.
        let mut bases: Vec<Address> = Vec::with_capacity(2);
        for side in [other, target] {
            if chains::is_base_token(chain, side) {
                bases.push(side);
            }
        }
        bases.sort_by_key(|a| chains::base_token(chain, *a).map(|b| b.priority).unwrap_or(u8::MAX));

        for base in bases {
            if base == target {
                // The target itself is a base token; its oracle price is the answer.
                if let Ok(usd) = self.oracle.base_token_usd(chain, base).await {
                    return Ok(Some(usd));
                }
                continue;
            }
            let base_usd = match self.oracle.base_token_usd(chain, base).await {
                Ok(v) => v,
                Err(_) => continue,
            };
            if let Some(rel) = self.relative_price(entry, target).await? {
                trace!(target: "amm_price", market = %entry.key, ?base, rel, base_usd, "derived target USD");
                return Ok(Some(rel * base_usd));
            }
        }
        Ok(None)
    }

    /// Convert a signed target-token delta (natural units) to signed USD.
    pub async fn delta_to_usd(
        &self,
        entry: &MarketEntry,
        target: Address,
        delta: f64,
    ) -> Result<Option<f64>, PriceError> {
        match self.target_price_usd(entry, target).await? {
            Some(price) => Ok(Some(delta * price)),
            None => Ok(None),
        }
    }
}
