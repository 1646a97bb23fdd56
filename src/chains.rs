//! Per-chain static tables: recognized base tokens (with priority), DEX
//! contract addresses, and aggregator DEX-family allowlists.
//!
//! These sets are closed and immutable after process start. Addresses are
//! checksummed mainnet deployments.

use std::collections::HashMap;
use std::str::FromStr;

use ethers::types::Address;
use once_cell::sync::Lazy;

use crate::types::{Chain, MarketType};

/// A recognized base/quote asset used to derive USD prices.
#[derive(Clone, Copy, Debug)]
pub struct BaseToken {
    pub address: Address,
    pub symbol: &'static str,
    pub decimals: u8,
    /// True for USD-pegged assets eligible for the 1.00 fallback.
    pub stable: bool,
    /// Lower is higher priority. The wrapped native asset is always 0.
    pub priority: u8,
}

/// Static per-chain configuration.
#[derive(Clone, Debug)]
pub struct ChainSpec {
    pub chain: Chain,
    pub wrapped_native: Address,
    /// Ordered by priority: wrapped native first, then stables.
    pub base_tokens: Vec<BaseToken>,
    pub v2_factory: Address,
    pub v3_factory: Address,
    pub v2_router: Address,
    pub v3_quoter: Address,
    /// Aggregator `dexId` prefixes accepted for trending candidates.
    pub dex_allowlist: &'static [&'static str],
}

fn addr(s: &str) -> Address {
    Address::from_str(s).expect("static chain table contains an invalid address")
}

static CHAIN_SPECS: Lazy<HashMap<Chain, ChainSpec>> = Lazy::new(|| {
    let mut m = HashMap::new();

    // BSC: PancakeSwap family. Note USDC/BUSD/DAI are 18-decimal on BSC.
    let wbnb = addr("0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c");
    m.insert(
        Chain::Bsc,
        ChainSpec {
            chain: Chain::Bsc,
            wrapped_native: wbnb,
            base_tokens: vec![
                BaseToken { address: wbnb, symbol: "WBNB", decimals: 18, stable: false, priority: 0 },
                BaseToken {
                    address: addr("0x55d398326f99059fF775485246999027B3197955"),
                    symbol: "USDT",
                    decimals: 18,
                    stable: true,
                    priority: 1,
                },
                BaseToken {
                    address: addr("0x8AC76a51cc950d9822D68b83fE1Ad97B32Cd580d"),
                    symbol: "USDC",
                    decimals: 18,
                    stable: true,
                    priority: 2,
                },
                BaseToken {
                    address: addr("0xe9e7CEA3DedcA5984780Bafc599bD69ADd087D56"),
                    symbol: "BUSD",
                    decimals: 18,
                    stable: true,
                    priority: 3,
                },
                BaseToken {
                    address: addr("0x1AF3F329e8BE154074D8769D1FFa4eE058B1DBc3"),
                    symbol: "DAI",
                    decimals: 18,
                    stable: true,
                    priority: 4,
                },
            ],
            v2_factory: addr("0xcA143Ce32Fe78f1f7019d7d551a6402fC5350c73"),
            v3_factory: addr("0x0BFbCF9fa4f9C56B0F40a671Ad40E0805A091865"),
            v2_router: addr("0x10ED43C718714eb63d5aA57B78B54704E256024E"),
            v3_quoter: addr("0xB048Bbc1Ee6b733FFfCFb9e9CeF7375518e25997"),
            dex_allowlist: &["pancakeswap"],
        },
    );

    // ETH: Uniswap family.
    let weth = addr("0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2");
    m.insert(
        Chain::Eth,
        ChainSpec {
            chain: Chain::Eth,
            wrapped_native: weth,
            base_tokens: vec![
                BaseToken { address: weth, symbol: "WETH", decimals: 18, stable: false, priority: 0 },
                BaseToken {
                    address: addr("0xdAC17F958D2ee523a2206206994597C13D831ec7"),
                    symbol: "USDT",
                    decimals: 6,
                    stable: true,
                    priority: 1,
                },
                BaseToken {
                    address: addr("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48"),
                    symbol: "USDC",
                    decimals: 6,
                    stable: true,
                    priority: 2,
                },
                BaseToken {
                    address: addr("0x6B175474E89094C44Da98b954EedeAC495271d0F"),
                    symbol: "DAI",
                    decimals: 18,
                    stable: true,
                    priority: 3,
                },
                BaseToken {
                    address: addr("0x4Fabb145d64652a948d72533023f6E7A623C7C53"),
                    symbol: "BUSD",
                    decimals: 18,
                    stable: true,
                    priority: 4,
                },
            ],
            v2_factory: addr("0x5C69bEe701ef814a2B6a3EDD4B1652CB9cc5aA6f"),
            v3_factory: addr("0x1F98431c8aD98523631AE4a59f267346ea31F984"),
            v2_router: addr("0x7a250d5630B4cF539739dF2C5dAcb4c659F2488D"),
            v3_quoter: addr("0xb27308f9F90D607463bb33eA1BeBb41C27CE5AB6"),
            dex_allowlist: &["uniswap"],
        },
    );

    m
});

/// The static spec for a chain. Panics only on a broken static table, which
/// is a compile-time-shaped defect, not a runtime condition.
pub fn spec(chain: Chain) -> &'static ChainSpec {
    CHAIN_SPECS.get(&chain).expect("chain spec table covers all Chain variants")
}

/// Look up a recognized base token on `chain`.
pub fn base_token(chain: Chain, token: Address) -> Option<&'static BaseToken> {
    spec(chain).base_tokens.iter().find(|b| b.address == token)
}

pub fn is_base_token(chain: Chain, token: Address) -> bool {
    base_token(chain, token).is_some()
}

/// Factory address emitting creation events for `(chain, market_type)`.
pub fn factory(chain: Chain, market_type: MarketType) -> Address {
    let s = spec(chain);
    match market_type {
        MarketType::V2 => s.v2_factory,
        MarketType::V3 => s.v3_factory,
    }
}

/// True when the aggregator `dexId` belongs to the chain's allowed DEX family.
pub fn dex_allowed(chain: Chain, dex_id: &str) -> bool {
    let id = dex_id.to_ascii_lowercase();
    spec(chain).dex_allowlist.iter().any(|prefix| id.starts_with(prefix))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_tokens_are_priority_ordered() {
        for chain in Chain::all() {
            let s = spec(chain);
            assert_eq!(s.base_tokens[0].address, s.wrapped_native);
            for pair in s.base_tokens.windows(2) {
                assert!(pair[0].priority < pair[1].priority);
            }
        }
    }

    #[test]
    fn dex_allowlist_matches_family_variants() {
        assert!(dex_allowed(Chain::Bsc, "pancakeswap"));
        assert!(dex_allowed(Chain::Bsc, "pancakeswap-v3"));
        assert!(!dex_allowed(Chain::Bsc, "uniswap"));
        assert!(dex_allowed(Chain::Eth, "uniswap"));
        assert!(!dex_allowed(Chain::Eth, "sushiswap"));
    }

    #[test]
    fn stables_are_marked() {
        let usdt = base_token(
            Chain::Eth,
            "0xdAC17F958D2ee523a2206206994597C13D831ec7".parse().unwrap(),
        )
        .unwrap();
        assert!(usdt.stable);
        assert_eq!(usdt.decimals, 6);
        assert!(!base_token(Chain::Eth, spec(Chain::Eth).wrapped_native).unwrap().stable);
    }
}
