//! Application entry point.
//!
//! 1. Load configuration from the environment, initialise tracing.
//! 2. Connect one WebSocket client per chain and wire every collaborator
//!    explicitly at this composition root.
//! 3. Run the ingress (factory watchers, trending pollers, candidate gate,
//!    idle sweeper) until Ctrl-C, then cancel the whole task tree.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{filter::EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use dexwatch::{
    aggregator::HttpAggregator,
    amm_price::ReservesPricer,
    blockchain::{ChainClients, WsChainClient},
    config::Config,
    decimals::DecimalsCache,
    evaluator::AlertEvaluator,
    fdv::FdvTracker,
    gate::GatePipeline,
    ingress::{Ingress, SlotTable},
    notifier::LogNotifier,
    price_oracle::PriceOracle,
    probes::SafetyProbes,
    subscriber::MarketSubscriber,
    tax::TaxEstimator,
    types::Chain,
    watchlist::Watchlist,
    windows::WindowStore,
};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"))
        .add_directive("ethers_providers=warn".parse()?)
        .add_directive("ethers=warn".parse()?)
        .add_directive("hyper=warn".parse()?)
        .add_directive("reqwest=warn".parse()?);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Arc::new(Config::from_env()?);
    info!(
        max_active_markets = config.max_active_markets,
        trending_top_k = config.trending_top_k,
        "configuration loaded"
    );

    let mut clients = ChainClients::new();
    for (chain, url) in [(Chain::Bsc, &config.bsc_wss), (Chain::Eth, &config.eth_wss)] {
        let client = WsChainClient::connect(chain, url).await?;
        info!(chain = %chain, "chain client connected");
        clients.insert(Arc::new(client));
    }
    let clients = Arc::new(clients);

    let aggregator = Arc::new(HttpAggregator::new()?);
    let decimals = Arc::new(DecimalsCache::new());
    let oracle = Arc::new(PriceOracle::new(aggregator.clone()));
    let pricer = Arc::new(ReservesPricer::new(clients.clone(), decimals.clone(), oracle.clone()));

    let watchlist = Arc::new(Watchlist::new());
    let windows = Arc::new(WindowStore::new());
    let fdv = Arc::new(FdvTracker::new());
    let taxes = Arc::new(TaxEstimator::new());
    let notifier = Arc::new(LogNotifier);

    let probes = Arc::new(SafetyProbes::new(clients.clone(), decimals.clone(), oracle.clone()));
    let gate = Arc::new(GatePipeline::new(
        probes,
        aggregator.clone(),
        watchlist.clone(),
        taxes.clone(),
        config.thresholds.clone(),
    ));

    let evaluator = Arc::new(AlertEvaluator::new(
        windows.clone(),
        fdv.clone(),
        watchlist.clone(),
        pricer.clone(),
        oracle.clone(),
        clients.clone(),
        decimals.clone(),
        notifier,
        config.thresholds.clone(),
    ));

    let subscriber = Arc::new(MarketSubscriber::new(
        clients.clone(),
        windows.clone(),
        taxes.clone(),
        watchlist.clone(),
        pricer,
        oracle,
        aggregator.clone(),
        decimals,
        evaluator,
    ));

    let slots = Arc::new(SlotTable::new(config.max_active_markets));
    let ingress = Arc::new(Ingress::new(
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
    ));

    let cancel = CancellationToken::new();
    let ingress_token = cancel.child_token();
    let ingress_task = tokio::spawn(async move {
        ingress.run(ingress_token).await;
    });

    info!("watcher running, Ctrl-C to stop");
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "signal listener failed, shutting down");
    }

    info!("shutdown requested");
    cancel.cancel();
    ingress_task.await.ok();
    info!("shutdown complete");
    Ok(())
}
