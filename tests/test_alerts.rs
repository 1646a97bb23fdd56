//! Alert evaluation scenarios over the real window store, FDV tracker and
//! evaluator: a volume burst producing a normal alert, and a whale buy with
//! an FDV burst producing a strong alert.

mod common;

use ethers::types::{Address, U256};

use common::{harness, WETH};
use dexwatch::evaluator::TradeSignal;
use dexwatch::types::{
    now_ms, AlertLevel, Candidate, CandidateSource, Chain, MarketType, TradeEvent,
};

fn meme() -> Address {
    "0x00000000000000000000000000000000000000ee".parse().unwrap()
}

fn active_market(h: &common::Harness, pair: Address, liquidity_usd: f64) -> Candidate {
    let candidate = Candidate {
        chain: Chain::Eth,
        market_type: MarketType::V2,
        address: pair,
        token0: meme(),
        token1: WETH.parse().unwrap(),
        fee: None,
        source: CandidateSource::Factory,
        reported_liquidity_usd: None,
    };
    h.watchlist.insert_pending(&candidate, Some(WETH.parse().unwrap()));
    assert!(h.watchlist.mark_active(&candidate.key(), liquidity_usd));
    candidate
}

fn buy(ts: u64, usd: f64, buyer: u64) -> TradeEvent {
    TradeEvent {
        timestamp_ms: ts,
        usd_value: usd,
        is_buy: true,
        buyer: Some(Address::from_low_u64_be(buyer)),
    }
}

/// Pool state for FDV derivation: meme priced at 0.002 WETH, WETH at 3000.
fn seed_pool_state(h: &common::Harness, pair: Address) {
    h.chain.set_reserves(
        pair,
        U256::from_dec_str("1000000000000000000000000").unwrap(),
        U256::from_dec_str("2000000000000000000000").unwrap(),
    );
    h.aggregator.quote_base(Chain::Eth, WETH.parse().unwrap(), 3000.0);
    h.chain
        .supply
        .lock()
        .unwrap()
        .insert(meme(), U256::from_dec_str("1000000000000000000000000000").unwrap());
}

#[tokio::test]
async fn volume_burst_after_quiet_baseline_is_normal() {
    let h = harness(Chain::Eth);
    let pair = Address::from_low_u64_be(0xa1a1);
    let candidate = active_market(&h, pair, 12_000_000.0);
    seed_pool_state(&h, pair);

    let now = now_ms();
    // 500 USD/min baseline across the nine preceding minutes.
    for min in 1..10u64 {
        h.windows.record(candidate.key(), buy(now - min * 60_000 - 1_000, 500.0, min));
    }
    // Ten buys totaling 20k inside the last 30 seconds.
    for i in 0..10u64 {
        h.windows.record(candidate.key(), buy(now - 30_000 + i * 1_000, 2_000.0, 100 + i));
    }

    h.evaluator
        .evaluate(TradeSignal {
            key: candidate.key(),
            target: meme(),
            usd_value: 2_000.0,
            is_buy: true,
        })
        .await;

    let alerts = h.notifier.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1, "expected exactly one alert");
    let alert = &alerts[0];
    // buy volume 20k >= 15k across 10 txs, multiplier 40 >= 5, but no whale
    // and no FDV history: score 4 -> normal.
    assert_eq!(alert.level, AlertLevel::Normal);
    assert!(alert.headline.contains("volume burst"), "headline: {}", alert.headline);
    assert!(alert.body.contains("across 10 txs"), "body: {}", alert.body);
    assert_eq!(alert.target, meme());
}

#[tokio::test]
async fn whale_buy_with_fdv_burst_is_strong() {
    let h = harness(Chain::Eth);
    let pair = Address::from_low_u64_be(0xa2a2);
    let candidate = active_market(&h, pair, 100_000.0);
    seed_pool_state(&h, pair);

    // Seed the FDV history with a low-priced snapshot via a small sell.
    let now = now_ms();
    h.windows.record(
        candidate.key(),
        TradeEvent { timestamp_ms: now, usd_value: 10.0, is_buy: false, buyer: None },
    );
    h.evaluator
        .evaluate(TradeSignal {
            key: candidate.key(),
            target: meme(),
            usd_value: 10.0,
            is_buy: false,
        })
        .await;
    assert!(h.notifier.alerts.lock().unwrap().is_empty(), "seed sell must not alert");

    // Price quadruples: meme reserve drops fourfold.
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    h.chain.set_reserves(
        pair,
        U256::from_dec_str("250000000000000000000000").unwrap(),
        U256::from_dec_str("2000000000000000000000").unwrap(),
    );

    // A single 4000 USD buy: 4% of the 100k pool, over the 3% whale ratio.
    let now = now_ms();
    h.windows.record(candidate.key(), buy(now, 4_000.0, 42));
    h.evaluator
        .evaluate(TradeSignal {
            key: candidate.key(),
            target: meme(),
            usd_value: 4_000.0,
            is_buy: true,
        })
        .await;

    let alerts = h.notifier.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1, "expected exactly one alert");
    let alert = &alerts[0];
    assert_eq!(alert.level, AlertLevel::Strong);
    assert!(alert.headline.contains("whale"), "headline: {}", alert.headline);
    assert!(alert.headline.contains("fdv burst"), "headline: {}", alert.headline);
    assert!(alert.body.contains("% of pool liquidity"), "body: {}", alert.body);
}

#[tokio::test]
async fn trade_on_inactive_market_never_alerts() {
    let h = harness(Chain::Eth);
    let pair = Address::from_low_u64_be(0xa3a3);
    let candidate = Candidate {
        chain: Chain::Eth,
        market_type: MarketType::V2,
        address: pair,
        token0: meme(),
        token1: WETH.parse().unwrap(),
        fee: None,
        source: CandidateSource::Factory,
        reported_liquidity_usd: None,
    };
    // Pending, never admitted.
    h.watchlist.insert_pending(&candidate, None);

    h.evaluator
        .evaluate(TradeSignal {
            key: candidate.key(),
            target: meme(),
            usd_value: 50_000.0,
            is_buy: true,
        })
        .await;
    assert!(h.notifier.alerts.lock().unwrap().is_empty());
}

#[tokio::test]
async fn mint_bonus_lifts_score_over_threshold() {
    let h = harness(Chain::Eth);
    let pair = Address::from_low_u64_be(0xa4a4);
    let candidate = active_market(&h, pair, 12_000_000.0);
    seed_pool_state(&h, pair);

    // A fresh 10k liquidity add (>= 1.2 * 5000) is on record.
    h.watchlist.set_last_mint_usd(&candidate.key(), 10_000.0);

    // One modest buy: total volume equals the trade, baseline zero, so the
    // volume multiplier is infinite. buy(2) + burst(2) + mint(1) = 5: normal.
    let now = now_ms();
    h.windows.record(candidate.key(), buy(now, 500.0, 7));
    h.evaluator
        .evaluate(TradeSignal {
            key: candidate.key(),
            target: meme(),
            usd_value: 500.0,
            is_buy: true,
        })
        .await;

    let alerts = h.notifier.alerts.lock().unwrap();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].level, AlertLevel::Normal);
    assert!(alerts[0].headline.contains("mint bonus"), "headline: {}", alerts[0].headline);
}
