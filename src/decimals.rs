//! Multi-chain token decimals cache.
//!
//! Cascade: hardcoded base-token table, then in-memory cache, then an RPC
//! `decimals()` call. A failed lookup falls back to 18 so a flaky node never
//! stalls the trade path; the fallback is not cached.

use std::sync::Arc;

use ahash::AHashMap;
use ethers::types::Address;
use tokio::sync::RwLock;
use tracing::{trace, warn};

use crate::blockchain::ChainClient;
use crate::chains;
use crate::types::Chain;

pub const FALLBACK_DECIMALS: u8 = 18;

/// Thread-safe `(chain_id, token) -> decimals` cache.
#[derive(Default)]
pub struct DecimalsCache {
    cache: Arc<RwLock<AHashMap<(u64, Address), u8>>>,
}

impl DecimalsCache {
    pub fn new() -> Self {
        Self { cache: Arc::new(RwLock::new(AHashMap::with_capacity(2048))) }
    }

    /// Decimals for `token`, fetching through `client` on a cache miss.
    /// Never fails: an unreadable token reports [`FALLBACK_DECIMALS`].
    pub async fn get(&self, chain: Chain, token: Address, client: &dyn ChainClient) -> u8 {
        if let Some(base) = chains::base_token(chain, token) {
            return base.decimals;
        }

        let key = (chain.chain_id(), token);
        if let Some(&d) = self.cache.read().await.get(&key) {
            trace!(target: "decimals", chain = %chain, ?token, decimals = d, "cache hit");
            return d;
        }

        match client.token_decimals(token).await {
            Ok(d) => {
                self.cache.write().await.insert(key, d);
                trace!(target: "decimals", chain = %chain, ?token, decimals = d, "fetched via RPC");
                d
            }
            Err(e) => {
                warn!(target: "decimals", chain = %chain, ?token, error = %e, "decimals lookup failed, assuming 18");
                FALLBACK_DECIMALS
            }
        }
    }

}
