//! # Per-Market Event Subscriptions
//!
//! One task per active market, subscribed to its trade (and, for V2,
//! liquidity-add) events. Each trade is converted to a USD-denominated
//! `TradeEvent`, folded into the sliding window, optionally forwarded to the
//! tax estimator, and handed to the alert evaluator. The returned
//! `CancellationToken` is the stop handle honored by the slot reaper.
//!
//! Events for one market are processed strictly in delivery order; the task
//! never hands work to other tasks mid-event.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use ethers::abi::{decode, ParamType, Token};
use ethers::types::{Address, Filter, Log, ValueOrArray, H256, I256, U256};
use futures::StreamExt;
use once_cell::sync::Lazy;
use rand::Rng;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::aggregator::AggregatorSource;
use crate::amm_price::{normalize, normalize_signed, ReservesPricer};
use crate::blockchain::ChainClients;
use crate::chains;
use crate::decimals::DecimalsCache;
use crate::errors::ChainError;
use crate::evaluator::{AlertEvaluator, TradeSignal};
use crate::price_oracle::PriceOracle;
use crate::tax::TaxEstimator;
use crate::types::{now_ms, MarketEntry, MarketType, TradeEvent};
use crate::watchlist::Watchlist;
use crate::windows::WindowStore;

const RESUBSCRIBE_BASE_DELAY: Duration = Duration::from_millis(500);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(30);

// keccak256 topic0 of the subscribed events.
static V2_SWAP_TOPIC: Lazy<H256> = Lazy::new(|| {
    // Swap(address,uint256,uint256,uint256,uint256,address)
    H256::from_str("0xd78ad95fa46c994b6551d0da85fc275fe613ce37657fb8d5e3d130840159d822")
        .expect("static topic")
});
static V2_MINT_TOPIC: Lazy<H256> = Lazy::new(|| {
    // Mint(address,uint256,uint256)
    H256::from_str("0x4c209b5fc8ad50758f13e2e1088ba56a560dff690a1c6fef26394f4c03821c4f")
        .expect("static topic")
});
static V3_SWAP_TOPIC: Lazy<H256> = Lazy::new(|| {
    // Swap(address,address,int256,int256,uint160,uint128,int24)
    H256::from_str("0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67")
        .expect("static topic")
});

pub struct MarketSubscriber {
    clients: Arc<ChainClients>,
    windows: Arc<WindowStore>,
    taxes: Arc<TaxEstimator>,
    watchlist: Arc<Watchlist>,
    pricer: Arc<ReservesPricer>,
    oracle: Arc<PriceOracle>,
    aggregator: Arc<dyn AggregatorSource>,
    decimals: Arc<DecimalsCache>,
    evaluator: Arc<AlertEvaluator>,
}

impl MarketSubscriber {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        clients: Arc<ChainClients>,
        windows: Arc<WindowStore>,
        taxes: Arc<TaxEstimator>,
        watchlist: Arc<Watchlist>,
        pricer: Arc<ReservesPricer>,
        oracle: Arc<PriceOracle>,
        aggregator: Arc<dyn AggregatorSource>,
        decimals: Arc<DecimalsCache>,
        evaluator: Arc<AlertEvaluator>,
    ) -> Self {
        Self {
            clients,
            windows,
            taxes,
            watchlist,
            pricer,
            oracle,
            aggregator,
            decimals,
            evaluator,
        }
    }

    /// Install the market's event subscription and return its stop handle.
    pub async fn start(
        self: Arc<Self>,
        entry: MarketEntry,
    ) -> Result<CancellationToken, ChainError> {
        let client = self.clients.get(entry.key.chain)?.clone();

        let topics: Vec<H256> = match entry.key.market_type {
            MarketType::V2 => vec![*V2_SWAP_TOPIC, *V2_MINT_TOPIC],
            MarketType::V3 => vec![*V3_SWAP_TOPIC],
        };
        let filter = Filter::new()
            .address(entry.key.address)
            .topic0(ValueOrArray::Array(topics));

        let mut stream = client.subscribe_logs(filter.clone()).await?;
        let token = CancellationToken::new();
        let task_token = token.clone();
        let this = Arc::clone(&self);

        tokio::spawn(async move {
            let mut reconnect_attempts = 0u32;
            loop {
                select! {
                    _ = task_token.cancelled() => {
                        debug!(target: "subscriber", market = %entry.key, "stop handle fired");
                        break;
                    }
                    maybe_log = stream.next() => {
                        match maybe_log {
                            Some(log) => {
                                reconnect_attempts = 0;
                                this.dispatch(&entry, log).await;
                            }
                            None => {
                                reconnect_attempts += 1;
                                let delay = backoff_with_jitter(reconnect_attempts);
                                warn!(target: "subscriber", market = %entry.key,
                                      attempt = reconnect_attempts, delay_ms = delay.as_millis() as u64,
                                      "event stream ended, re-subscribing");
                                tokio::time::sleep(delay).await;
                                match client.subscribe_logs(filter.clone()).await {
                                    Ok(s) => stream = s,
                                    Err(e) => {
                                        warn!(target: "subscriber", market = %entry.key, error = %e,
                                              "re-subscribe failed");
                                    }
                                }
                            }
                        }
                    }
                }
            }
        });

        Ok(token)
    }

    async fn dispatch(&self, entry: &MarketEntry, log: Log) {
        let Some(topic0) = log.topics.first().copied() else {
            return;
        };
        if topic0 == *V2_SWAP_TOPIC {
            self.handle_v2_swap(entry, &log).await;
        } else if topic0 == *V2_MINT_TOPIC {
            self.handle_v2_mint(entry, &log).await;
        } else if topic0 == *V3_SWAP_TOPIC {
            self.handle_v3_swap(entry, &log).await;
        }
    }

    //============================================================================================//
    //                                      V2 EVENTS                                             //
    //============================================================================================//

    async fn handle_v2_swap(&self, entry: &MarketEntry, log: &Log) {
        let chain = entry.key.chain;
        let Some((sender, to)) = indexed_address_pair(log) else {
            return;
        };
        let tokens = match decode(
            &[
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
                ParamType::Uint(256),
            ],
            &log.data,
        ) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "subscriber", market = %entry.key, error = %e, "V2 Swap decode failed");
                return;
            }
        };
        let (Some(a0_in), Some(a1_in), Some(a0_out), Some(a1_out)) = (
            as_uint(&tokens[0]),
            as_uint(&tokens[1]),
            as_uint(&tokens[2]),
            as_uint(&tokens[3]),
        ) else {
            return;
        };

        let target = entry.target_token();
        let Ok(client) = self.clients.get(chain) else { return };
        let dec_target = self.decimals.get(chain, target, client.as_ref()).await;

        let (amount_in_t, amount_out_t) = if target == entry.token0 {
            (a0_in, a0_out)
        } else {
            (a1_in, a1_out)
        };
        // Trader perspective: positive delta means the trader gained target.
        let delta = normalize(amount_out_t, dec_target) - normalize(amount_in_t, dec_target);
        if delta == 0.0 {
            return;
        }
        let is_buy = delta > 0.0;
        let buyer = if is_buy { to } else { sender };

        // Tax sampling against the pool mid-price when the counterpart side
        // is a base token.
        let other = if target == entry.token0 { entry.token1 } else { entry.token0 };
        if chains::is_base_token(chain, other) {
            let dec_base = self.decimals.get(chain, other, client.as_ref()).await;
            let (base_in, base_out) = if other == entry.token0 {
                (normalize(a0_in, dec_base), normalize(a0_out, dec_base))
            } else {
                (normalize(a1_in, dec_base), normalize(a1_out, dec_base))
            };
            self.record_tax_sample(entry, target, delta, base_in, base_out, is_buy).await;
        }

        self.record_trade(entry, target, delta, is_buy, buyer).await;
    }

    async fn handle_v2_mint(&self, entry: &MarketEntry, log: &Log) {
        let chain = entry.key.chain;
        let tokens = match decode(&[ParamType::Uint(256), ParamType::Uint(256)], &log.data) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "subscriber", market = %entry.key, error = %e, "V2 Mint decode failed");
                return;
            }
        };
        let (Some(a0), Some(a1)) = (as_uint(&tokens[0]), as_uint(&tokens[1])) else {
            return;
        };

        // Prefer pricing the added liquidity from the base side at the AMM
        // rate; fall back to the aggregator's view of the whole pool.
        let mint_usd = match crate::probes::pick_base(chain, entry.token0, entry.token1) {
            Some(base) => {
                let base_amount = if base == entry.token0 { a0 } else { a1 };
                let dec = chains::base_token(chain, base).map(|b| b.decimals).unwrap_or(18);
                match self.oracle.base_token_usd(chain, base).await {
                    Ok(usd) => Some(2.0 * normalize(base_amount, dec) * usd),
                    Err(_) => None,
                }
            }
            None => None,
        };
        let mint_usd = match mint_usd {
            Some(v) => Some(v),
            None => self
                .aggregator
                .pair(chain, entry.key.address)
                .await
                .ok()
                .flatten()
                .and_then(|p| p.liquidity_usd()),
        };

        if let Some(usd) = mint_usd {
            debug!(target: "subscriber", market = %entry.key, mint_usd = usd, "liquidity add");
            self.watchlist.set_last_mint_usd(&entry.key, usd);
            // The add also grows the visible pool; keep the whale-ratio
            // denominator roughly current.
            if let Some(current) = self.watchlist.get(&entry.key) {
                let updated = current.liquidity_usd.unwrap_or(0.0) + usd;
                self.watchlist.set_liquidity_usd(&entry.key, updated);
            }
        }
    }

    //============================================================================================//
    //                                      V3 EVENTS                                             //
    //============================================================================================//

    async fn handle_v3_swap(&self, entry: &MarketEntry, log: &Log) {
        let chain = entry.key.chain;
        let Some((sender, recipient)) = indexed_address_pair(log) else {
            return;
        };
        let tokens = match decode(
            &[
                ParamType::Int(256),
                ParamType::Int(256),
                ParamType::Uint(160),
                ParamType::Uint(128),
                ParamType::Int(24),
            ],
            &log.data,
        ) {
            Ok(t) => t,
            Err(e) => {
                warn!(target: "subscriber", market = %entry.key, error = %e, "V3 Swap decode failed");
                return;
            }
        };
        let (Some(amount0), Some(amount1)) = (as_int(&tokens[0]), as_int(&tokens[1])) else {
            return;
        };

        let target = entry.target_token();
        let Ok(client) = self.clients.get(chain) else { return };
        let dec_target = self.decimals.get(chain, target, client.as_ref()).await;

        // Pool-perspective amounts are positive into the pool; negate for the
        // trader's view of the target side.
        let amount_target = if target == entry.token0 { amount0 } else { amount1 };
        let delta = -normalize_signed(amount_target, dec_target);
        if delta == 0.0 {
            return;
        }
        let is_buy = delta > 0.0;
        let buyer = if is_buy { recipient } else { sender };

        let other = if target == entry.token0 { entry.token1 } else { entry.token0 };
        if chains::is_base_token(chain, other) {
            let dec_base = self.decimals.get(chain, other, client.as_ref()).await;
            let amount_base = if other == entry.token0 { amount0 } else { amount1 };
            let base_norm = normalize_signed(amount_base, dec_base);
            // Positive base_norm = base paid into the pool (a buy of target).
            let (base_in, base_out) = if base_norm >= 0.0 { (base_norm, 0.0) } else { (0.0, -base_norm) };
            self.record_tax_sample(entry, target, delta, base_in, base_out, is_buy).await;
        }

        self.record_trade(entry, target, delta, is_buy, buyer).await;
    }

    //============================================================================================//
    //                                     SHARED PATHS                                           //
    //============================================================================================//

    /// Convert the target delta to USD, record it, and forward to the
    /// evaluator. Trades with no obtainable price are dropped, not recorded.
    async fn record_trade(
        &self,
        entry: &MarketEntry,
        target: Address,
        delta: f64,
        is_buy: bool,
        buyer: Address,
    ) {
        let chain = entry.key.chain;
        let usd = match self.pricer.delta_to_usd(entry, target, delta).await {
            Ok(Some(v)) => Some(v.abs()),
            _ => self
                .oracle
                .fetch_token_usd(chain, target)
                .await
                .map(|price| delta.abs() * price),
        };
        let Some(usd) = usd else {
            trace!(target: "subscriber", market = %entry.key, "no USD price, trade dropped");
            return;
        };

        let event = TradeEvent {
            timestamp_ms: now_ms(),
            usd_value: usd,
            is_buy,
            buyer: Some(buyer),
        };
        self.windows.record(entry.key, event);
        self.watchlist.touch(&entry.key);

        self.evaluator
            .evaluate(TradeSignal { key: entry.key, target, usd_value: usd, is_buy })
            .await;
    }

    /// Mid-price expectation vs realized output, decimal-normalized on both
    /// sides. The mid-price is read after the swap lands, which is an
    /// accepted estimate.
    async fn record_tax_sample(
        &self,
        entry: &MarketEntry,
        target: Address,
        delta: f64,
        base_in: f64,
        base_out: f64,
        is_buy: bool,
    ) {
        let Ok(Some(price_in_base)) = self.pricer.relative_price(entry, target).await else {
            return;
        };
        if price_in_base <= 0.0 {
            return;
        }

        let now = now_ms();
        if is_buy && base_in > 0.0 {
            // Paid base, received target: expected target out at mid-price.
            let expected = base_in / price_in_base;
            self.taxes.record(entry.key, now, expected, delta.abs(), true);
        } else if !is_buy && base_out > 0.0 {
            // Paid target, received base: expected base out at mid-price.
            let expected = delta.abs() * price_in_base;
            self.taxes.record(entry.key, now, expected, base_out, false);
        }
    }
}

//================================================================================================//
//                                         HELPERS                                                //
//================================================================================================//

fn backoff_with_jitter(attempts: u32) -> Duration {
    let exp = attempts.saturating_sub(1).min(6);
    let delay = RESUBSCRIBE_BASE_DELAY.saturating_mul(2u32.saturating_pow(exp));
    let delay = delay.min(RESUBSCRIBE_MAX_DELAY);
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=150))
}

/// The two indexed address topics common to both swap events.
fn indexed_address_pair(log: &Log) -> Option<(Address, Address)> {
    if log.topics.len() < 3 {
        return None;
    }
    Some((
        Address::from_slice(&log.topics[1].as_bytes()[12..]),
        Address::from_slice(&log.topics[2].as_bytes()[12..]),
    ))
}

fn as_uint(token: &Token) -> Option<U256> {
    match token {
        Token::Uint(v) => Some(*v),
        _ => None,
    }
}

fn as_int(token: &Token) -> Option<I256> {
    match token {
        Token::Int(v) => Some(I256::from_raw(*v)),
        _ => None,
    }
}
