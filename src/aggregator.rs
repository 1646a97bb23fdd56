//! # Market Aggregator Client
//!
//! Resilient HTTP client for the external market-aggregator API. Responses
//! are treated as loosely-typed JSON: every field is optional and unknown
//! fields are ignored, so schema drift upstream degrades features instead of
//! breaking parsing.
//!
//! The `AggregatorSource` trait is the seam the rest of the pipeline depends
//! on; tests substitute a canned implementation.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use ethers::types::Address;
use rand::Rng;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::chains;
use crate::errors::AggregatorError;
use crate::types::Chain;

//================================================================================================//
//                                         CONSTANTS                                              //
//================================================================================================//

const DEFAULT_BASE_URL: &str = "https://api.dexscreener.com";
const HTTP_TIMEOUT: Duration = Duration::from_secs(8);
/// Retry budget for 403/429/5xx responses.
const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_BASE: Duration = Duration::from_millis(400);
const BACKOFF_JITTER_MS: u64 = 150;

//================================================================================================//
//                                       RESPONSE MODELS                                          //
//================================================================================================//

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TokenRef {
    pub address: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Liquidity {
    pub usd: Option<f64>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct TxnCount {
    pub buys: Option<u32>,
    pub sells: Option<u32>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Txns {
    pub m5: Option<TxnCount>,
    pub h1: Option<TxnCount>,
}

/// One pair record as the aggregator reports it.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct AggPair {
    #[serde(rename = "chainId", alias = "chain")]
    pub chain_id: Option<String>,
    #[serde(rename = "dexId")]
    pub dex_id: Option<String>,
    #[serde(rename = "pairAddress")]
    pub pair_address: Option<String>,
    #[serde(rename = "baseToken")]
    pub base_token: Option<TokenRef>,
    #[serde(rename = "quoteToken")]
    pub quote_token: Option<TokenRef>,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    pub liquidity: Option<Liquidity>,
    pub txns: Option<Txns>,
    #[serde(rename = "feeTier", alias = "fee")]
    pub fee_tier: Option<serde_json::Value>,
}

impl AggPair {
    pub fn liquidity_usd(&self) -> Option<f64> {
        self.liquidity.as_ref().and_then(|l| l.usd)
    }

    pub fn price_usd(&self) -> Option<f64> {
        self.price_usd.as_ref().and_then(|p| p.parse::<f64>().ok()).filter(|p| *p > 0.0)
    }

    /// Fee tier, tolerating both numeric and string encodings.
    pub fn fee(&self) -> Option<u32> {
        match self.fee_tier.as_ref()? {
            serde_json::Value::Number(n) => n.as_u64().map(|v| v as u32),
            serde_json::Value::String(s) => s.parse::<u32>().ok(),
            _ => None,
        }
    }

    pub fn pair_address(&self) -> Option<Address> {
        parse_evm_address(self.pair_address.as_deref()?)
    }

    pub fn base_token_address(&self) -> Option<Address> {
        parse_evm_address(self.base_token.as_ref()?.address.as_deref()?)
    }

    pub fn quote_token_address(&self) -> Option<Address> {
        parse_evm_address(self.quote_token.as_ref()?.address.as_deref()?)
    }

    pub fn is_on_chain(&self, chain: Chain) -> bool {
        self.chain_id.as_deref().map(|c| c.eq_ignore_ascii_case(chain.slug())).unwrap_or(false)
    }
}

/// Strict 20-byte hex shape check (`0x` + 40 hex chars).
pub fn parse_evm_address(s: &str) -> Option<Address> {
    let hex = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    if hex.len() != 40 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    Address::from_str(s).ok()
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
struct PairsEnvelope {
    pairs: Option<Vec<AggPair>>,
    pair: Option<AggPair>,
}

//================================================================================================//
//                                       TRAIT DEFINITION                                         //
//================================================================================================//

/// Interface to the external market aggregator.
#[async_trait]
pub trait AggregatorSource: Send + Sync + fmt::Debug {
    /// All pairs listing `token`, restricted to `chain`.
    async fn token_pairs(&self, chain: Chain, token: Address)
        -> Result<Vec<AggPair>, AggregatorError>;

    /// A single pair by pool address, if the aggregator knows it.
    async fn pair(&self, chain: Chain, pair: Address) -> Result<Option<AggPair>, AggregatorError>;

    /// Top-K trending pairs for `chain`.
    async fn trending(&self, chain: Chain, k: usize) -> Result<Vec<AggPair>, AggregatorError>;
}

//================================================================================================//
//                                     HTTP IMPLEMENTATION                                        //
//================================================================================================//

pub struct HttpAggregator {
    client: Client,
    base_url: String,
}

impl fmt::Debug for HttpAggregator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpAggregator").field("base_url", &self.base_url).finish()
    }
}

impl HttpAggregator {
    pub fn new() -> Result<Self, AggregatorError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self, AggregatorError> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .user_agent("dexwatch/0.1")
            .build()
            .map_err(|e| AggregatorError::Http(e.to_string()))?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    /// GET with bounded retries on 403/429/5xx, exponential backoff with
    /// jitter between attempts.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
    ) -> Result<T, AggregatorError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                let backoff = BACKOFF_BASE * 2u32.saturating_pow(attempt - 1);
                let jitter =
                    Duration::from_millis(rand::thread_rng().gen_range(0..=BACKOFF_JITTER_MS));
                tokio::time::sleep(backoff + jitter).await;
            }

            let response = match self.client.get(&url).send().await {
                Ok(r) => r,
                Err(e) => {
                    last_err = e.to_string();
                    debug!(target: "aggregator", %url, attempt, error = %last_err, "request failed");
                    continue;
                }
            };

            let status = response.status();
            if retryable(status) {
                last_err = format!("status {}", status);
                debug!(target: "aggregator", %url, attempt, %status, "retryable status");
                continue;
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(AggregatorError::Status(status.as_u16(), truncate(&body, 200)));
            }

            let text =
                response.text().await.map_err(|e| AggregatorError::Http(e.to_string()))?;
            return serde_json::from_str::<T>(&text)
                .map_err(|e| AggregatorError::Parse(format!("{}: {}", e, truncate(&text, 200))));
        }

        Err(AggregatorError::Exhausted(MAX_ATTEMPTS, last_err))
    }

    /// Trending fallback: rank the pools of each base token by reported
    /// liquidity when the trending endpoint itself is unavailable.
    async fn synthesize_trending(
        &self,
        chain: Chain,
        k: usize,
    ) -> Result<Vec<AggPair>, AggregatorError> {
        let mut pairs: Vec<AggPair> = Vec::new();
        for base in &chains::spec(chain).base_tokens {
            match self.token_pairs(chain, base.address).await {
                Ok(mut p) => pairs.append(&mut p),
                Err(e) => {
                    warn!(target: "aggregator", chain = %chain, base = base.symbol, error = %e,
                          "base-token pool query failed during trending synthesis");
                }
            }
        }
        pairs.sort_by(|a, b| {
            b.liquidity_usd()
                .unwrap_or(0.0)
                .partial_cmp(&a.liquidity_usd().unwrap_or(0.0))
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        pairs.dedup_by_key(|p| p.pair_address());
        pairs.truncate(k);
        Ok(pairs)
    }
}

fn retryable(status: StatusCode) -> bool {
    status == StatusCode::FORBIDDEN
        || status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max).collect();
        format!("{}...", cut)
    }
}

#[async_trait]
impl AggregatorSource for HttpAggregator {
    async fn token_pairs(
        &self,
        chain: Chain,
        token: Address,
    ) -> Result<Vec<AggPair>, AggregatorError> {
        let envelope: PairsEnvelope =
            self.get_json(&format!("/latest/dex/tokens/{:#x}", token)).await?;
        Ok(envelope
            .pairs
            .unwrap_or_default()
            .into_iter()
            .filter(|p| p.is_on_chain(chain))
            .collect())
    }

    async fn pair(&self, chain: Chain, pair: Address) -> Result<Option<AggPair>, AggregatorError> {
        let envelope: PairsEnvelope = self
            .get_json(&format!("/latest/dex/pairs/{}/{:#x}", chain.slug(), pair))
            .await?;
        Ok(envelope
            .pair
            .into_iter()
            .chain(envelope.pairs.unwrap_or_default())
            .find(|p| p.is_on_chain(chain)))
    }

    async fn trending(&self, chain: Chain, k: usize) -> Result<Vec<AggPair>, AggregatorError> {
        let path = format!("/latest/dex/trending?chain={}&limit={}", chain.slug(), k);
        match self.get_json::<PairsEnvelope>(&path).await {
            Ok(envelope) => Ok(envelope
                .pairs
                .unwrap_or_default()
                .into_iter()
                .filter(|p| p.is_on_chain(chain))
                .take(k)
                .collect()),
            Err(e) => {
                warn!(target: "aggregator", chain = %chain, error = %e,
                      "trending endpoint unavailable, synthesizing from base-token pools");
                self.synthesize_trending(chain, k).await
            }
        }
    }
}
