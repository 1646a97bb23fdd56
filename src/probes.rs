//! # Safety Probes
//!
//! The individual admission checks run by the gate pipeline: bytecode
//! presence, USD liquidity, sellability (V2 router static routes / V3 quoter),
//! and the LP-risk score. Each probe returns `Err(reason)` with a
//! machine-readable reason string; a probe that errors internally converts
//! the error into a failure reason so a broken upstream can never cause a
//! silent admission.

use std::sync::Arc;

use ethers::types::{Address, U256};
use tracing::{debug, trace};

use crate::amm_price::normalize;
use crate::blockchain::ChainClients;
use crate::chains;
use crate::decimals::DecimalsCache;
use crate::price_oracle::PriceOracle;
use crate::types::{Candidate, Chain, MarketType};

/// V3 sellability is probed at these multiples of the unit amount.
const V3_PROBE_MULTIPLIERS: [u64; 3] = [1, 10, 100];

pub struct SafetyProbes {
    clients: Arc<ChainClients>,
    decimals: Arc<DecimalsCache>,
    oracle: Arc<PriceOracle>,
}

impl SafetyProbes {
    pub fn new(
        clients: Arc<ChainClients>,
        decimals: Arc<DecimalsCache>,
        oracle: Arc<PriceOracle>,
    ) -> Self {
        Self { clients, decimals, oracle }
    }

    /// Probe amount for a token: `10^max(0, decimals - 6)`, floor 1.
    fn probe_amount(decimals: u8) -> U256 {
        U256::exp10(decimals.saturating_sub(6) as usize)
    }

    /// All of `addrs` must carry non-empty bytecode.
    pub async fn bytecode_present(
        &self,
        chain: Chain,
        addrs: &[Address],
    ) -> Result<(), String> {
        let client = self
            .clients
            .get(chain)
            .map_err(|e| format!("bytecode fail: {}", e))?;
        for addr in addrs {
            match client.code_size(*addr).await {
                Ok(0) => return Err(format!("bytecode fail: no code at {:#x}", addr)),
                Ok(_) => {}
                Err(e) => return Err(format!("bytecode fail: {}", e)),
            }
        }
        Ok(())
    }

    /// Observed pool liquidity in USD.
    ///
    /// V2: when a side is a base token with a known USD quote,
    /// `liquidity = 2 * side_reserve_usd`; otherwise the aggregator's
    /// reported value. V3: always the aggregator's reported value.
    pub async fn usd_liquidity(
        &self,
        candidate: &Candidate,
        aggregator_liq_usd: Option<f64>,
    ) -> Result<f64, String> {
        let chain = candidate.chain;
        match candidate.market_type {
            MarketType::V2 => {
                let client = self
                    .clients
                    .get(chain)
                    .map_err(|e| format!("liquidity fail: {}", e))?;
                let (r0, r1) = client
                    .v2_reserves(candidate.address)
                    .await
                    .map_err(|e| format!("liquidity fail: {}", e))?;

                for (token, reserve) in [(candidate.token0, r0), (candidate.token1, r1)] {
                    let Some(base) = chains::base_token(chain, token) else {
                        continue;
                    };
                    let Ok(base_usd) = self.oracle.base_token_usd(chain, token).await else {
                        continue;
                    };
                    let side_usd = normalize(reserve, base.decimals) * base_usd;
                    trace!(target: "probes", market = %candidate.key(), side = base.symbol,
                           side_usd, "V2 liquidity from reserves");
                    return Ok(2.0 * side_usd);
                }

                aggregator_liq_usd
                    .ok_or_else(|| "liquidity fail: no base-token side and no aggregator value".to_string())
            }
            MarketType::V3 => aggregator_liq_usd
                .ok_or_else(|| "liquidity fail: no aggregator value (V3)".to_string()),
        }
    }

    /// Sellability: some static route must turn a probe amount of the target
    /// token into a strictly positive base-token output.
    pub async fn sellability(&self, candidate: &Candidate) -> Result<(), String> {
        match candidate.market_type {
            MarketType::V2 => self.sellability_v2(candidate).await,
            MarketType::V3 => self.sellability_v3(candidate).await,
        }
    }

    async fn sellability_v2(&self, candidate: &Candidate) -> Result<(), String> {
        let chain = candidate.chain;
        let client = self
            .clients
            .get(chain)
            .map_err(|e| format!("sellability fail: {}", e))?;

        let target = pick_target(chain, candidate.token0, candidate.token1);
        let dec = self.decimals.get(chain, target, client.as_ref()).await;
        let probe = Self::probe_amount(dec);

        let bases: Vec<Address> =
            chains::spec(chain).base_tokens.iter().map(|b| b.address).collect();

        // 1-hop routes in base priority order, then every 2-hop combination.
        let mut paths: Vec<Vec<Address>> = Vec::new();
        for base in &bases {
            if *base != target {
                paths.push(vec![target, *base]);
            }
        }
        for mid in &bases {
            for dst in &bases {
                if mid != dst && *mid != target && *dst != target {
                    paths.push(vec![target, *mid, *dst]);
                }
            }
        }

        for path in &paths {
            match client.v2_amounts_out(probe, path).await {
                Ok(amounts) => {
                    if amounts.last().map(|a| !a.is_zero()).unwrap_or(false) {
                        trace!(target: "probes", market = %candidate.key(), hops = path.len() - 1,
                               "V2 route found");
                        return Ok(());
                    }
                }
                // A reverting route is just a dead path, not a system error.
                Err(e) => {
                    trace!(target: "probes", market = %candidate.key(), error = %e, "route probe reverted");
                }
            }
        }
        Err("sellability fail: no static route found (V2)".to_string())
    }

    async fn sellability_v3(&self, candidate: &Candidate) -> Result<(), String> {
        let chain = candidate.chain;
        let client = self
            .clients
            .get(chain)
            .map_err(|e| format!("sellability fail: {}", e))?;

        let fee = candidate
            .fee
            .ok_or_else(|| "sellability fail: missing fee tier (V3)".to_string())?;

        // The canonical pool for (sorted tokens, fee) must be the observed one.
        let (a, b) = sort_tokens(candidate.token0, candidate.token1);
        let canonical = client
            .v3_get_pool(a, b, fee)
            .await
            .map_err(|e| format!("sellability fail: {}", e))?;
        if canonical == Address::zero() {
            return Err("factory.getPool returned zero address".to_string());
        }
        if canonical != candidate.address {
            return Err(format!("factory.getPool mismatch: {:#x}", canonical));
        }

        let base_in_pool = [candidate.token0, candidate.token1]
            .into_iter()
            .filter(|t| chains::is_base_token(chain, *t))
            .min_by_key(|t| chains::base_token(chain, *t).map(|b| b.priority).unwrap_or(u8::MAX));
        let Some(base) = base_in_pool else {
            return Err("sellability fail: no base token in pool (V3)".to_string());
        };
        let target = if base == candidate.token0 { candidate.token1 } else { candidate.token0 };

        let dec = self.decimals.get(chain, target, client.as_ref()).await;
        let unit = Self::probe_amount(dec);
        for multiplier in V3_PROBE_MULTIPLIERS {
            let probe = unit * U256::from(multiplier);
            match client.v3_quote_exact_input_single(target, base, fee, probe).await {
                Ok(out) if !out.is_zero() => {
                    trace!(target: "probes", market = %candidate.key(), multiplier, "V3 quote positive");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) => {
                    trace!(target: "probes", market = %candidate.key(), error = %e, "quoter probe reverted");
                }
            }
        }
        Err("sellability fail: no positive quote (V3)".to_string())
    }

    /// LP-risk score: +2 when neither side is a base token; +2 when reported
    /// liquidity < 3000 USD, +1 when in [3000, 8000).
    pub fn lp_risk_score(
        &self,
        chain: Chain,
        token0: Address,
        token1: Address,
        liquidity_usd: Option<f64>,
    ) -> u8 {
        let mut score = 0u8;
        if !chains::is_base_token(chain, token0) && !chains::is_base_token(chain, token1) {
            score += 2;
        }
        match liquidity_usd {
            Some(liq) if liq < 3_000.0 => score += 2,
            Some(liq) if liq < 8_000.0 => score += 1,
            _ => {}
        }
        debug!(target: "probes", score, ?liquidity_usd, "LP risk scored");
        score
    }
}

/// The non-base side; token0 when both or neither side is a base token.
pub fn pick_target(chain: Chain, token0: Address, token1: Address) -> Address {
    let base0 = chains::is_base_token(chain, token0);
    let base1 = chains::is_base_token(chain, token1);
    match (base0, base1) {
        (false, true) => token0,
        (true, false) => token1,
        _ => token0,
    }
}

/// The highest-priority base side, if any.
pub fn pick_base(chain: Chain, token0: Address, token1: Address) -> Option<Address> {
    [token0, token1]
        .into_iter()
        .filter(|t| chains::is_base_token(chain, *t))
        .min_by_key(|t| chains::base_token(chain, *t).map(|b| b.priority).unwrap_or(u8::MAX))
}

/// Uniswap-style token ordering (ascending by address).
pub fn sort_tokens(a: Address, b: Address) -> (Address, Address) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_amount_floors_at_one() {
        assert_eq!(SafetyProbes::probe_amount(18), U256::exp10(12));
        assert_eq!(SafetyProbes::probe_amount(9), U256::exp10(3));
        assert_eq!(SafetyProbes::probe_amount(6), U256::from(1));
        assert_eq!(SafetyProbes::probe_amount(0), U256::from(1));
    }

    #[test]
    fn token_sort_is_ascending() {
        let a = Address::from_low_u64_be(1);
        let b = Address::from_low_u64_be(2);
        assert_eq!(sort_tokens(a, b), (a, b));
        assert_eq!(sort_tokens(b, a), (a, b));
    }

    #[test]
    fn target_defaults_to_token0() {
        let wbnb: Address = "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c".parse().unwrap();
        let meme = Address::from_low_u64_be(42);
        let other = Address::from_low_u64_be(43);
        assert_eq!(pick_target(Chain::Bsc, meme, wbnb), meme);
        assert_eq!(pick_target(Chain::Bsc, wbnb, meme), meme);
        assert_eq!(pick_target(Chain::Bsc, meme, other), meme);
    }

    #[test]
    fn base_pick_prefers_priority() {
        let wbnb: Address = "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c".parse().unwrap();
        let usdt: Address = "0x55d398326f99059fF775485246999027B3197955".parse().unwrap();
        assert_eq!(pick_base(Chain::Bsc, usdt, wbnb), Some(wbnb));
        assert_eq!(pick_base(Chain::Bsc, usdt, Address::from_low_u64_be(9)), Some(usdt));
        assert_eq!(pick_base(Chain::Bsc, Address::from_low_u64_be(8), Address::from_low_u64_be(9)), None);
    }
}
