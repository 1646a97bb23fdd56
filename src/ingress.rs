//! # Market Discovery Ingress
//!
//! Two independent sources feed one logical candidate channel: persistent
//! factory-event subscriptions (PairCreated / PoolCreated) and a periodic
//! trending poll against the market aggregator. Candidates flow through the
//! gate pipeline; admitted markets get a subscription if the process-wide
//! slot budget allows, and are otherwise registered to be picked up when the
//! reaper frees a slot.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Filter, H256, Log};
use futures::StreamExt;
use moka::future::Cache;
use once_cell::sync::Lazy;
use rand::Rng;
use tokio::select;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregator::{AggPair, AggregatorSource};
use crate::blockchain::ChainClients;
use crate::chains;
use crate::config::Config;
use crate::fdv::FdvTracker;
use crate::gate::{GateDecision, GatePipeline};
use crate::probes::{pick_base, sort_tokens};
use crate::tax::TaxEstimator;
use crate::subscriber::MarketSubscriber;
use crate::types::{now_ms, Candidate, CandidateSource, Chain, MarketKey, MarketStatus, MarketType};
use crate::watchlist::Watchlist;
use crate::windows::WindowStore;

const CANDIDATE_CHANNEL_CAPACITY: usize = 2_048;
/// Trending dedup TTL.
const DEDUP_TTL: Duration = Duration::from_secs(5 * 60);
/// Concurrent gate runs; each one is several RPC and HTTP probes.
const GATE_CONCURRENCY: usize = 8;
/// Cadence of the idle sweep and health summary.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

const FACTORY_RESUB_BASE_DELAY: Duration = Duration::from_secs(1);
const FACTORY_RESUB_MAX_DELAY: Duration = Duration::from_secs(60);

// keccak256 topic0 of the factory events.
static PAIR_CREATED_TOPIC: Lazy<H256> = Lazy::new(|| {
    // PairCreated(address,address,address,uint256)
    H256::from_str("0x0d3648bd0f6ba80134a33ba9275ac585d9d315f0ad8355cddefde31afa28d0e9")
        .expect("static topic")
});
static POOL_CREATED_TOPIC: Lazy<H256> = Lazy::new(|| {
    // PoolCreated(address,address,uint24,int24,address)
    H256::from_str("0x783cca1c0412dd0d695e784568c96da2e9c22ff989357a2e8b1d9b2b4e6b7118")
        .expect("static topic")
});

//================================================================================================//
//                                        SLOT BUDGET                                             //
//================================================================================================//

/// Process-wide subscription slot table. Holding a slot means holding the
/// market's stop handle; releasing the slot cancels the subscription.
#[derive(Debug)]
pub struct SlotTable {
    inner: Mutex<HashMap<MarketKey, CancellationToken>>,
    max: usize,
}

impl SlotTable {
    pub fn new(max: usize) -> Self {
        Self { inner: Mutex::new(HashMap::new()), max }
    }

    /// Claim a slot for `key`. Fails when the budget is exhausted or the key
    /// is already subscribed.
    pub fn try_insert(&self, key: MarketKey, handle: CancellationToken) -> bool {
        let mut table = self.inner.lock().expect("slot table lock poisoned");
        if table.len() >= self.max || table.contains_key(&key) {
            return false;
        }
        table.insert(key, handle);
        true
    }

    /// Release the slot and return the stop handle (not yet cancelled).
    pub fn remove(&self, key: &MarketKey) -> Option<CancellationToken> {
        self.inner.lock().expect("slot table lock poisoned").remove(key)
    }

    pub fn contains(&self, key: &MarketKey) -> bool {
        self.inner.lock().expect("slot table lock poisoned").contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().expect("slot table lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_capacity(&self) -> bool {
        self.len() < self.max
    }

    /// Cancel and drop every held subscription (shutdown path).
    pub fn cancel_all(&self) {
        let mut table = self.inner.lock().expect("slot table lock poisoned");
        for (_, handle) in table.drain() {
            handle.cancel();
        }
    }
}

//================================================================================================//
//                                       TRENDING DEDUP                                           //
//================================================================================================//

/// Suppresses repeat trending sightings of the same `(chain, pair)` within
/// the TTL window.
#[derive(Debug)]
pub struct TrendingDedup {
    seen: Cache<(Chain, Address), ()>,
}

impl TrendingDedup {
    pub fn new() -> Self {
        Self::with_ttl(DEDUP_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            seen: Cache::builder().time_to_live(ttl).max_capacity(100_000).build(),
        }
    }

    /// True exactly once per TTL window for each key; the sighting is
    /// recorded as a side effect.
    pub async fn first_sighting(&self, chain: Chain, pair: Address) -> bool {
        let key = (chain, pair);
        if self.seen.get(&key).await.is_some() {
            return false;
        }
        self.seen.insert(key, ()).await;
        true
    }
}

impl Default for TrendingDedup {
    fn default() -> Self {
        Self::new()
    }
}

//================================================================================================//
//                                           INGRESS                                              //
//================================================================================================//

pub struct Ingress {
    config: Arc<Config>,
    clients: Arc<ChainClients>,
    aggregator: Arc<dyn AggregatorSource>,
    watchlist: Arc<Watchlist>,
    windows: Arc<WindowStore>,
    fdv: Arc<FdvTracker>,
    taxes: Arc<TaxEstimator>,
    gate: Arc<GatePipeline>,
    subscriber: Arc<MarketSubscriber>,
    slots: Arc<SlotTable>,
    trending_dedup: TrendingDedup,
}

impl Ingress {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<Config>,
        clients: Arc<ChainClients>,
        aggregator: Arc<dyn AggregatorSource>,
        watchlist: Arc<Watchlist>,
        windows: Arc<WindowStore>,
        fdv: Arc<FdvTracker>,
        taxes: Arc<TaxEstimator>,
        gate: Arc<GatePipeline>,
        subscriber: Arc<MarketSubscriber>,
        slots: Arc<SlotTable>,
    ) -> Self {
        Self {
            config,
            clients,
            aggregator,
            watchlist,
            windows,
            fdv,
            taxes,
            gate,
            subscriber,
            slots,
            trending_dedup: TrendingDedup::new(),
        }
    }

    /// Spawn every ingress task and run until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let (candidate_tx, candidate_rx) = mpsc::channel::<Candidate>(CANDIDATE_CHANNEL_CAPACITY);

        for chain in Chain::all() {
            for market_type in [MarketType::V2, MarketType::V3] {
                let this = Arc::clone(&self);
                let tx = candidate_tx.clone();
                let token = cancel.child_token();
                tokio::spawn(async move {
                    this.watch_factory(chain, market_type, tx, token).await;
                });
            }

            let this = Arc::clone(&self);
            let tx = candidate_tx.clone();
            let token = cancel.child_token();
            tokio::spawn(async move {
                this.poll_trending(chain, tx, token).await;
            });
        }

        {
            let this = Arc::clone(&self);
            let token = cancel.child_token();
            tokio::spawn(async move {
                this.sweep_loop(token).await;
            });
        }

        drop(candidate_tx);
        self.consume_candidates(candidate_rx, cancel).await;
    }

    //============================================================================================//
    //                                     FACTORY SOURCE                                         //
    //============================================================================================//

    async fn watch_factory(
        &self,
        chain: Chain,
        market_type: MarketType,
        tx: mpsc::Sender<Candidate>,
        cancel: CancellationToken,
    ) {
        let factory = chains::factory(chain, market_type);
        let topic = match market_type {
            MarketType::V2 => *PAIR_CREATED_TOPIC,
            MarketType::V3 => *POOL_CREATED_TOPIC,
        };
        let filter = Filter::new().address(factory).topic0(topic);

        let client = match self.clients.get(chain) {
            Ok(c) => c.clone(),
            Err(e) => {
                warn!(target: "ingress", chain = %chain, error = %e, "no client for factory watch");
                return;
            }
        };

        let mut attempts = 0u32;
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let mut stream = match client.subscribe_logs(filter.clone()).await {
                Ok(s) => {
                    info!(target: "ingress", chain = %chain, market_type = %market_type,
                          factory = ?factory, "factory subscription installed");
                    attempts = 0;
                    s
                }
                Err(e) => {
                    attempts += 1;
                    let delay = factory_backoff(attempts);
                    warn!(target: "ingress", chain = %chain, market_type = %market_type,
                          error = %e, delay_ms = delay.as_millis() as u64, "factory subscribe failed");
                    select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => continue,
                    }
                }
            };

            loop {
                select! {
                    _ = cancel.cancelled() => return,
                    maybe_log = stream.next() => {
                        let Some(log) = maybe_log else {
                            warn!(target: "ingress", chain = %chain, market_type = %market_type,
                                  "factory stream ended");
                            break;
                        };
                        if let Some(candidate) = decode_factory_event(chain, market_type, &log) {
                            debug!(target: "ingress", market = %candidate.key(), source = %candidate.source,
                                   "factory candidate");
                            if tx.send(candidate).await.is_err() {
                                return;
                            }
                        }
                    }
                }
            }
        }
    }

    //============================================================================================//
    //                                    TRENDING SOURCE                                         //
    //============================================================================================//

    async fn poll_trending(
        &self,
        chain: Chain,
        tx: mpsc::Sender<Candidate>,
        cancel: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(self.config.trending_poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }

            let pairs = match self.aggregator.trending(chain, self.config.trending_top_k).await {
                Ok(p) => p,
                Err(e) => {
                    warn!(target: "ingress", chain = %chain, error = %e,
                          "trending poll failed, retrying next tick");
                    continue;
                }
            };

            let mut emitted = 0usize;
            for pair in &pairs {
                let Some(candidate) =
                    trending_candidate(chain, pair, self.config.trending_min_liq_usd)
                else {
                    continue;
                };
                // At most one emission per (chain, pair) per TTL window.
                if !self.trending_dedup.first_sighting(chain, candidate.address).await {
                    continue;
                }

                emitted += 1;
                if tx.send(candidate).await.is_err() {
                    return;
                }
            }
            debug!(target: "ingress", chain = %chain, received = pairs.len(), emitted,
                   "trending poll complete");
        }
    }

    //============================================================================================//
    //                                   CANDIDATE PIPELINE                                       //
    //============================================================================================//

    async fn consume_candidates(
        self: Arc<Self>,
        mut rx: mpsc::Receiver<Candidate>,
        cancel: CancellationToken,
    ) {
        let gate_permits = Arc::new(Semaphore::new(GATE_CONCURRENCY));
        loop {
            let candidate = select! {
                _ = cancel.cancelled() => break,
                maybe = rx.recv() => match maybe {
                    Some(c) => c,
                    None => break,
                }
            };

            let key = candidate.key();
            match self.watchlist.status(&key) {
                // Terminal: rejection holds until the entry is evicted.
                Some(MarketStatus::Rejected) => continue,
                // Already admitted: pick the subscription back up if a slot
                // freed since.
                Some(MarketStatus::Active) => {
                    if !self.slots.contains(&key) && self.slots.has_capacity() {
                        if let Some(entry) = self.watchlist.get(&key) {
                            self.start_subscription(entry).await;
                        }
                    }
                    continue;
                }
                // Gate already in flight (or stalled; it will re-run below
                // only for fresh inserts).
                Some(MarketStatus::Pending) => continue,
                None => {}
            }

            let base_hint = pick_base(candidate.chain, candidate.token0, candidate.token1);
            if !self.watchlist.insert_pending(&candidate, base_hint) {
                continue;
            }

            let this = Arc::clone(&self);
            let permits = Arc::clone(&gate_permits);
            tokio::spawn(async move {
                let Ok(_permit) = permits.acquire().await else {
                    return;
                };
                match this.gate.admit(&candidate).await {
                    GateDecision::Admitted { .. } => {
                        if let Some(entry) = this.watchlist.get(&candidate.key()) {
                            this.start_subscription(entry).await;
                        }
                    }
                    GateDecision::Rejected { reason } => {
                        debug!(target: "ingress", market = %candidate.key(), reason,
                               "candidate rejected");
                    }
                }
            });
        }

        info!(target: "ingress", "candidate pipeline stopped");
        self.slots.cancel_all();
    }

    /// Start the market subscription, budget permitting. Over budget the
    /// market stays registered and admissible for a later slot.
    async fn start_subscription(&self, entry: crate::types::MarketEntry) {
        let key = entry.key;
        if !self.slots.has_capacity() {
            warn!(target: "ingress", market = %key, in_use = self.slots.len(),
                  budget = self.config.max_active_markets,
                  "slot budget exhausted, market registered but not subscribed");
            return;
        }
        match self.subscriber.clone().start(entry).await {
            Ok(handle) => {
                if !self.slots.try_insert(key, handle.clone()) {
                    // Lost the race for the last slot.
                    handle.cancel();
                    warn!(target: "ingress", market = %key, "slot claim raced, subscription stopped");
                } else {
                    info!(target: "ingress", market = %key, in_use = self.slots.len(),
                          "market subscription started");
                }
            }
            Err(e) => {
                warn!(target: "ingress", market = %key, error = %e, "subscription start failed");
            }
        }
    }

    //============================================================================================//
    //                                    SLOT REAPER / HEALTH                                    //
    //============================================================================================//

    async fn sweep_loop(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => {}
            }
            let now = now_ms();

            // Markets with no trade flow free their slots first.
            for key in self.windows.evict_idle(now) {
                if let Some(handle) = self.slots.remove(&key) {
                    handle.cancel();
                    info!(target: "ingress", market = %key, "idle market unsubscribed, slot freed");
                }
            }

            // Expired watchlist entries leave entirely, rolling state included.
            for key in self.watchlist.sweep(now) {
                if let Some(handle) = self.slots.remove(&key) {
                    handle.cancel();
                }
                self.fdv.drop_market(&key);
                self.taxes.drop_market(&key);
            }

            let (pending, active, rejected) = self.watchlist.counts();
            info!(target: "ingress",
                  pending, active, rejected,
                  subscribed = self.slots.len(),
                  windowed = self.windows.tracked_markets(),
                  rejections = ?self.watchlist.rejection_summary(),
                  "health summary");
        }
    }
}

//================================================================================================//
//                                         DECODING                                               //
//================================================================================================//

fn factory_backoff(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(6);
    let delay = FACTORY_RESUB_BASE_DELAY.saturating_mul(2u32.saturating_pow(exp));
    let delay = delay.min(FACTORY_RESUB_MAX_DELAY);
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=250))
}

/// Apply the trending admission filters; `None` means filtered out.
pub fn trending_candidate(chain: Chain, pair: &AggPair, min_liq_usd: f64) -> Option<Candidate> {
    // 1. DEX family allowlist.
    if !chains::dex_allowed(chain, pair.dex_id.as_deref().unwrap_or_default()) {
        return None;
    }
    // 2. Address shape for pool and both tokens.
    let address = pair.pair_address()?;
    let base = pair.base_token_address()?;
    let quote = pair.quote_token_address()?;
    // 3. Reported liquidity floor.
    let liquidity = pair.liquidity_usd()?;
    if liquidity < min_liq_usd {
        return None;
    }
    // 4. One side must be a recognized base token.
    if !chains::is_base_token(chain, base) && !chains::is_base_token(chain, quote) {
        return None;
    }

    // The aggregator reports base/quote order; pools order tokens by
    // ascending address, and the reserve-side mapping depends on it.
    let (token0, token1) = sort_tokens(base, quote);
    let market_type = infer_market_type(pair.dex_id.as_deref().unwrap_or_default());
    Some(Candidate {
        chain,
        market_type,
        address,
        token0,
        token1,
        fee: if market_type == MarketType::V3 { pair.fee() } else { None },
        source: CandidateSource::Trending,
        reported_liquidity_usd: Some(liquidity),
    })
}

/// `v3` anywhere in the aggregator DEX id means a V3 pool.
fn infer_market_type(dex_id: &str) -> MarketType {
    if dex_id.to_ascii_lowercase().contains("v3") {
        MarketType::V3
    } else {
        MarketType::V2
    }
}

fn topic_address(topic: &H256) -> Address {
    Address::from_slice(&topic.as_bytes()[12..])
}

/// Decode a `PairCreated` / `PoolCreated` log into a candidate.
fn decode_factory_event(chain: Chain, market_type: MarketType, log: &Log) -> Option<Candidate> {
    if log.topics.len() < 3 {
        return None;
    }
    let token0 = topic_address(&log.topics[1]);
    let token1 = topic_address(&log.topics[2]);

    match market_type {
        MarketType::V2 => {
            // data: (address pair, uint256 allPairsLength)
            let tokens = decode(&[ParamType::Address, ParamType::Uint(256)], &log.data).ok()?;
            let Token::Address(pair) = tokens.first()? else {
                return None;
            };
            Some(Candidate {
                chain,
                market_type,
                address: *pair,
                token0,
                token1,
                fee: None,
                source: CandidateSource::Factory,
                reported_liquidity_usd: None,
            })
        }
        MarketType::V3 => {
            // topics: (sig, token0, token1, fee); data: (int24 tickSpacing, address pool)
            let fee_topic = log.topics.get(3)?;
            let fee = ethers::types::U256::from_big_endian(fee_topic.as_bytes()).as_u32();
            let tokens = decode(&[ParamType::Int(24), ParamType::Address], &log.data).ok()?;
            let Token::Address(pool) = tokens.get(1)? else {
                return None;
            };
            Some(Candidate {
                chain,
                market_type,
                address: *pool,
                token0,
                token1,
                fee: Some(fee),
                source: CandidateSource::Factory,
                reported_liquidity_usd: None,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::abi::encode;

    #[test]
    fn slot_budget_is_enforced() {
        let slots = SlotTable::new(2);
        let k1 = MarketKey::new(Chain::Bsc, MarketType::V2, Address::from_low_u64_be(1));
        let k2 = MarketKey::new(Chain::Bsc, MarketType::V2, Address::from_low_u64_be(2));
        let k3 = MarketKey::new(Chain::Bsc, MarketType::V2, Address::from_low_u64_be(3));

        assert!(slots.try_insert(k1, CancellationToken::new()));
        assert!(slots.try_insert(k2, CancellationToken::new()));
        assert!(!slots.has_capacity());
        assert!(!slots.try_insert(k3, CancellationToken::new()));
        // Duplicate claims are refused even with capacity.
        slots.remove(&k2);
        assert!(!slots.try_insert(k1, CancellationToken::new()));
        assert!(slots.try_insert(k3, CancellationToken::new()));
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn freed_slot_cancels_on_reaper_path() {
        let slots = SlotTable::new(1);
        let k = MarketKey::new(Chain::Eth, MarketType::V3, Address::from_low_u64_be(7));
        let token = CancellationToken::new();
        assert!(slots.try_insert(k, token.clone()));
        let handle = slots.remove(&k).unwrap();
        assert!(!token.is_cancelled());
        handle.cancel();
        assert!(token.is_cancelled());
        assert!(slots.is_empty());
    }

    #[test]
    fn market_type_inference() {
        assert_eq!(infer_market_type("pancakeswap-v3"), MarketType::V3);
        assert_eq!(infer_market_type("uniswapV3"), MarketType::V3);
        assert_eq!(infer_market_type("pancakeswap"), MarketType::V2);
        assert_eq!(infer_market_type(""), MarketType::V2);
    }

    #[test]
    fn pair_created_decodes() {
        let token0 = Address::from_low_u64_be(0xa);
        let token1 = Address::from_low_u64_be(0xb);
        let pair = Address::from_low_u64_be(0xc);
        let log = Log {
            topics: vec![*PAIR_CREATED_TOPIC, H256::from(token0), H256::from(token1)],
            data: encode(&[Token::Address(pair), Token::Uint(42u64.into())]).into(),
            ..Default::default()
        };
        let candidate = decode_factory_event(Chain::Bsc, MarketType::V2, &log).unwrap();
        assert_eq!(candidate.address, pair);
        assert_eq!(candidate.token0, token0);
        assert_eq!(candidate.token1, token1);
        assert_eq!(candidate.fee, None);
        assert_eq!(candidate.source, CandidateSource::Factory);
    }

    #[test]
    fn pool_created_decodes_with_fee() {
        let token0 = Address::from_low_u64_be(0xa);
        let token1 = Address::from_low_u64_be(0xb);
        let pool = Address::from_low_u64_be(0xd);
        let fee = 10_000u32;
        let mut fee_topic = [0u8; 32];
        fee_topic[28..].copy_from_slice(&fee.to_be_bytes());
        let log = Log {
            topics: vec![
                *POOL_CREATED_TOPIC,
                H256::from(token0),
                H256::from(token1),
                H256::from(fee_topic),
            ],
            data: encode(&[Token::Int(ethers::types::U256::from(60u64)), Token::Address(pool)]).into(),
            ..Default::default()
        };
        let candidate = decode_factory_event(Chain::Eth, MarketType::V3, &log).unwrap();
        assert_eq!(candidate.address, pool);
        assert_eq!(candidate.fee, Some(10_000));
    }

    #[test]
    fn malformed_factory_log_is_skipped() {
        let log = Log { topics: vec![*PAIR_CREATED_TOPIC], ..Default::default() };
        assert!(decode_factory_event(Chain::Bsc, MarketType::V2, &log).is_none());
    }

    fn trending_pair(dex: &str, pair: &str, base: &str, quote: &str, liq: f64) -> AggPair {
        serde_json::from_str(&format!(
            r#"{{"chainId": "bsc", "dexId": "{dex}", "pairAddress": "{pair}",
                 "baseToken": {{"address": "{base}"}}, "quoteToken": {{"address": "{quote}"}},
                 "liquidity": {{"usd": {liq}}}, "priceUsd": "1.0"}}"#
        ))
        .unwrap()
    }

    const WBNB: &str = "0xbb4CdB9CBd36B01bD1cBaEBF2De08d9173bc095c";
    const POOL: &str = "0x00000000000000000000000000000000000000cc";
    const MEME: &str = "0x00000000000000000000000000000000000000ee";

    #[test]
    fn trending_filters_apply_in_order() {
        // Happy path: allowed DEX, valid addresses, enough liquidity, base side.
        let ok = trending_pair("pancakeswap", POOL, MEME, WBNB, 9_000.0);
        let candidate = trending_candidate(Chain::Bsc, &ok, 3_000.0).unwrap();
        assert_eq!(candidate.market_type, MarketType::V2);
        assert_eq!(candidate.source, CandidateSource::Trending);
        assert_eq!(candidate.reported_liquidity_usd, Some(9_000.0));

        // Wrong DEX family for the chain.
        let wrong_dex = trending_pair("uniswap", POOL, MEME, WBNB, 9_000.0);
        assert!(trending_candidate(Chain::Bsc, &wrong_dex, 3_000.0).is_none());

        // Malformed pool address.
        let bad_addr = trending_pair("pancakeswap", "0x1234", MEME, WBNB, 9_000.0);
        assert!(trending_candidate(Chain::Bsc, &bad_addr, 3_000.0).is_none());

        // Liquidity below the floor.
        let thin = trending_pair("pancakeswap", POOL, MEME, WBNB, 500.0);
        assert!(trending_candidate(Chain::Bsc, &thin, 3_000.0).is_none());

        // Neither side recognized.
        let no_base = trending_pair("pancakeswap", POOL, MEME, POOL, 9_000.0);
        assert!(trending_candidate(Chain::Bsc, &no_base, 3_000.0).is_none());
    }

    #[test]
    fn trending_v3_inference_carries_fee() {
        let mut pair = trending_pair("pancakeswap-v3", POOL, MEME, WBNB, 9_000.0);
        pair.fee_tier = Some(serde_json::json!(2500));
        let candidate = trending_candidate(Chain::Bsc, &pair, 3_000.0).unwrap();
        assert_eq!(candidate.market_type, MarketType::V3);
        assert_eq!(candidate.fee, Some(2500));
    }

    #[tokio::test]
    async fn repeated_trending_sighting_is_deduped_until_ttl_expires() {
        // Short TTL stands in for the 5-minute window: a pair polled twice
        // inside it yields exactly one candidate, and the same pair re-enters
        // fresh once the window has passed.
        let dedup = TrendingDedup::with_ttl(Duration::from_millis(100));
        let pair = trending_pair("pancakeswap", POOL, MEME, WBNB, 9_000.0);

        let first = trending_candidate(Chain::Bsc, &pair, 3_000.0).unwrap();
        assert!(dedup.first_sighting(first.chain, first.address).await);

        let repeat = trending_candidate(Chain::Bsc, &pair, 3_000.0).unwrap();
        assert_eq!(repeat.address, first.address);
        assert!(!dedup.first_sighting(repeat.chain, repeat.address).await);

        // Keys are per (chain, pair): the same pool on the other chain is
        // not suppressed.
        assert!(dedup.first_sighting(Chain::Eth, first.address).await);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(dedup.first_sighting(first.chain, first.address).await);
    }
}
