//! # Core Type Definitions
//!
//! Single source of truth for the shared data structures used throughout the
//! watcher. Centralizing these types keeps the pipeline modules decoupled:
//! every component exchanges market keys and plain value types, never
//! references into another component's state.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use ethers::types::Address;
use serde::{Deserialize, Serialize};

//================================================================================================//
//                                      CHAIN / MARKET IDENTITY                                   //
//================================================================================================//

/// The two chains the watcher operates on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    Bsc,
    Eth,
}

impl Chain {
    pub fn chain_id(&self) -> u64 {
        match self {
            Chain::Bsc => 56,
            Chain::Eth => 1,
        }
    }

    /// Slug used by the market aggregator API.
    pub fn slug(&self) -> &'static str {
        match self {
            Chain::Bsc => "bsc",
            Chain::Eth => "ethereum",
        }
    }

    pub fn all() -> [Chain; 2] {
        [Chain::Bsc, Chain::Eth]
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// Pool design generation. Dispatch happens on this tag in the pricer, the
/// safety probes and the subscriber.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MarketType {
    V2,
    V3,
}

impl fmt::Display for MarketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketType::V2 => f.write_str("v2"),
            MarketType::V3 => f.write_str("v3"),
        }
    }
}

/// Canonical market identity: `(chain, market_type, address)`.
///
/// The address is an `ethers` `Address`, case-insensitive by construction;
/// `Display` renders the normalized lowercase hex form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MarketKey {
    pub chain: Chain,
    pub market_type: MarketType,
    pub address: Address,
}

impl MarketKey {
    pub fn new(chain: Chain, market_type: MarketType, address: Address) -> Self {
        Self { chain, market_type, address }
    }
}

impl fmt::Display for MarketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{:#x}", self.chain, self.market_type, self.address)
    }
}

//================================================================================================//
//                                          CANDIDATES                                            //
//================================================================================================//

/// Where a candidate market was discovered.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CandidateSource {
    Factory,
    Trending,
}

impl fmt::Display for CandidateSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateSource::Factory => f.write_str("factory"),
            CandidateSource::Trending => f.write_str("trending"),
        }
    }
}

/// A newly-discovered market, not yet admitted.
#[derive(Clone, Debug)]
pub struct Candidate {
    pub chain: Chain,
    pub market_type: MarketType,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    /// V3 fee tier in hundredths of a bip (e.g. 2500 = 0.25%).
    pub fee: Option<u32>,
    pub source: CandidateSource,
    /// Aggregator-reported pool liquidity, when the candidate came from the
    /// trending poll.
    pub reported_liquidity_usd: Option<f64>,
}

impl Candidate {
    pub fn key(&self) -> MarketKey {
        MarketKey::new(self.chain, self.market_type, self.address)
    }
}

//================================================================================================//
//                                        MARKET LIFECYCLE                                        //
//================================================================================================//

/// Market admission status. `Active` and `Rejected` are terminal for the
/// lifetime of the process; entries only leave via the idle sweep.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarketStatus {
    Pending,
    Active,
    Rejected,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketStatus::Pending => f.write_str("pending"),
            MarketStatus::Active => f.write_str("active"),
            MarketStatus::Rejected => f.write_str("rejected"),
        }
    }
}

/// A watchlist entry. Owned exclusively by the `Watchlist`; other components
/// receive clones and hold only the `MarketKey`.
#[derive(Clone, Debug)]
pub struct MarketEntry {
    pub key: MarketKey,
    pub token0: Address,
    pub token1: Address,
    pub fee: Option<u32>,
    pub first_seen_ms: u64,
    pub last_updated_ms: u64,
    pub status: MarketStatus,
    /// Machine-readable rejection reason, set exactly once.
    pub reason: Option<String>,
    /// Last observed pool liquidity in USD.
    pub liquidity_usd: Option<f64>,
    /// USD value of the most recent liquidity add.
    pub last_mint_usd: Option<f64>,
    /// Base-token side observed at admission, if any.
    pub base_hint: Option<Address>,
}

impl MarketEntry {
    /// The non-base ("target") side of the market. Falls back to `token0`
    /// when both or neither side is a recognized base token.
    pub fn target_token(&self) -> Address {
        match self.base_hint {
            Some(base) if base == self.token0 => self.token1,
            Some(_) => self.token0,
            None => self.token0,
        }
    }
}

//================================================================================================//
//                                          TRADE EVENTS                                          //
//================================================================================================//

/// A single trade folded into a market's sliding window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TradeEvent {
    pub timestamp_ms: u64,
    pub usd_value: f64,
    pub is_buy: bool,
    pub buyer: Option<Address>,
}

//================================================================================================//
//                                            ALERTS                                              //
//================================================================================================//

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AlertLevel {
    Normal,
    Strong,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertLevel::Normal => f.write_str("normal"),
            AlertLevel::Strong => f.write_str("strong"),
        }
    }
}

/// The record handed to the notifier. Formatting and transport beyond the
/// headline/body strings are the notifier's problem.
#[derive(Clone, Debug)]
pub struct Alert {
    pub level: AlertLevel,
    pub chain: Chain,
    pub market_type: MarketType,
    pub address: Address,
    pub token0: Address,
    pub token1: Address,
    pub target: Address,
    pub headline: String,
    pub body: String,
}

//================================================================================================//
//                                            CLOCK                                               //
//================================================================================================//

/// Current wall time in milliseconds since the epoch. All windowing math runs
/// on these timestamps.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_key_display_is_lowercase() {
        let key = MarketKey::new(
            Chain::Bsc,
            MarketType::V2,
            "0xAAAAaaaaAAAAaaaaAAAAaaaaAAAAaaaaAAAAaaaa".parse().unwrap(),
        );
        assert_eq!(
            key.to_string(),
            "bsc:v2:0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa"
        );
    }

    #[test]
    fn target_token_defaults_to_token0() {
        let t0: Address = "0x1111111111111111111111111111111111111111".parse().unwrap();
        let t1: Address = "0x2222222222222222222222222222222222222222".parse().unwrap();
        let entry = MarketEntry {
            key: MarketKey::new(Chain::Eth, MarketType::V2, Address::zero()),
            token0: t0,
            token1: t1,
            fee: None,
            first_seen_ms: 0,
            last_updated_ms: 0,
            status: MarketStatus::Pending,
            reason: None,
            liquidity_usd: None,
            last_mint_usd: None,
            base_hint: None,
        };
        assert_eq!(entry.target_token(), t0);

        let with_hint1 = MarketEntry { base_hint: Some(t1), ..entry.clone() };
        assert_eq!(with_hint1.target_token(), t0);

        let with_hint0 = MarketEntry { base_hint: Some(t0), ..entry };
        assert_eq!(with_hint0.target_token(), t1);
    }
}
