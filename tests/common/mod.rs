//! Shared test doubles: an in-memory chain client, a canned aggregator and a
//! collecting notifier, plus a harness that wires the pipeline the way the
//! composition root does.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use ethers::types::{Address, Filter, U256};

use dexwatch::aggregator::{AggPair, AggregatorSource};
use dexwatch::amm_price::ReservesPricer;
use dexwatch::blockchain::{ChainClient, ChainClients, LogStream};
use dexwatch::config::Thresholds;
use dexwatch::decimals::DecimalsCache;
use dexwatch::errors::{AggregatorError, ChainError};
use dexwatch::evaluator::AlertEvaluator;
use dexwatch::fdv::FdvTracker;
use dexwatch::gate::GatePipeline;
use dexwatch::notifier::Notifier;
use dexwatch::price_oracle::PriceOracle;
use dexwatch::probes::SafetyProbes;
use dexwatch::tax::TaxEstimator;
use dexwatch::types::{Alert, Chain};
use dexwatch::watchlist::Watchlist;
use dexwatch::windows::WindowStore;

pub const WETH: &str = "0xC02aaA39b223FE8D0A0e5C4F27eAD9083C756Cc2";

//================================================================================================//
//                                       MOCK CHAIN                                               //
//================================================================================================//

/// In-memory `ChainClient`. Unset lookups behave like healthy defaults
/// (bytecode present, 18 decimals); router and quoter default to reverting.
#[derive(Debug)]
pub struct MockChain {
    pub chain: Chain,
    pub code: Mutex<HashMap<Address, usize>>,
    pub decimals: Mutex<HashMap<Address, u8>>,
    pub supply: Mutex<HashMap<Address, U256>>,
    pub reserves: Mutex<HashMap<Address, (U256, U256)>>,
    pub sqrt_prices: Mutex<HashMap<Address, U256>>,
    /// `Some(v)` = every route's final output; `None` = every route reverts.
    pub router_out: Mutex<Option<U256>>,
    pub pools: Mutex<HashMap<(Address, Address, u32), Address>>,
    pub quote_out: Mutex<Option<U256>>,
}

impl MockChain {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            code: Mutex::new(HashMap::new()),
            decimals: Mutex::new(HashMap::new()),
            supply: Mutex::new(HashMap::new()),
            reserves: Mutex::new(HashMap::new()),
            sqrt_prices: Mutex::new(HashMap::new()),
            router_out: Mutex::new(None),
            pools: Mutex::new(HashMap::new()),
            quote_out: Mutex::new(None),
        }
    }

    pub fn set_reserves(&self, pair: Address, r0: U256, r1: U256) {
        self.reserves.lock().unwrap().insert(pair, (r0, r1));
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn code_size(&self, address: Address) -> Result<usize, ChainError> {
        Ok(*self.code.lock().unwrap().get(&address).unwrap_or(&100))
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        Ok(*self.decimals.lock().unwrap().get(&token).unwrap_or(&18))
    }

    async fn total_supply(&self, token: Address) -> Result<U256, ChainError> {
        self.supply
            .lock()
            .unwrap()
            .get(&token)
            .copied()
            .ok_or_else(|| ChainError::call("totalSupply", "no supply configured"))
    }

    async fn v2_reserves(&self, pair: Address) -> Result<(U256, U256), ChainError> {
        self.reserves
            .lock()
            .unwrap()
            .get(&pair)
            .copied()
            .ok_or_else(|| ChainError::call("getReserves", "no reserves configured"))
    }

    async fn v3_sqrt_price_x96(&self, pool: Address) -> Result<U256, ChainError> {
        self.sqrt_prices
            .lock()
            .unwrap()
            .get(&pool)
            .copied()
            .ok_or_else(|| ChainError::call("slot0", "no slot0 configured"))
    }

    async fn v2_amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, ChainError> {
        match *self.router_out.lock().unwrap() {
            Some(out) => {
                let mut amounts = vec![amount_in; path.len().saturating_sub(1)];
                amounts.push(out);
                Ok(amounts)
            }
            None => Err(ChainError::call("getAmountsOut", "execution reverted")),
        }
    }

    async fn v3_get_pool(
        &self,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Address, ChainError> {
        Ok(*self
            .pools
            .lock()
            .unwrap()
            .get(&(token_a, token_b, fee))
            .unwrap_or(&Address::zero()))
    }

    async fn v3_quote_exact_input_single(
        &self,
        _token_in: Address,
        _token_out: Address,
        _fee: u32,
        _amount_in: U256,
    ) -> Result<U256, ChainError> {
        match *self.quote_out.lock().unwrap() {
            Some(out) => Ok(out),
            None => Err(ChainError::call("quoteExactInputSingle", "execution reverted")),
        }
    }

    async fn subscribe_logs(&self, _filter: Filter) -> Result<LogStream, ChainError> {
        Ok(Box::pin(futures::stream::pending()))
    }
}

//================================================================================================//
//                                    CANNED AGGREGATOR                                           //
//================================================================================================//

#[derive(Debug, Default)]
pub struct CannedAggregator {
    pub token_pairs: Mutex<HashMap<Address, Vec<AggPair>>>,
    pub pairs: Mutex<HashMap<Address, AggPair>>,
    pub trending: Mutex<Vec<AggPair>>,
}

impl CannedAggregator {
    /// Register the canonical "deep pool" quote for a base token.
    pub fn quote_base(&self, chain: Chain, token: Address, price_usd: f64) {
        let pair: AggPair = serde_json::from_str(&format!(
            r#"{{"chainId": "{}", "baseToken": {{"address": "{:#x}"}},
                 "priceUsd": "{}", "liquidity": {{"usd": 50000000.0}}}}"#,
            chain.slug(),
            token,
            price_usd
        ))
        .unwrap();
        self.token_pairs.lock().unwrap().entry(token).or_default().push(pair);
    }

    pub fn set_pair(&self, address: Address, pair: AggPair) {
        self.pairs.lock().unwrap().insert(address, pair);
    }
}

#[async_trait]
impl AggregatorSource for CannedAggregator {
    async fn token_pairs(
        &self,
        _chain: Chain,
        token: Address,
    ) -> Result<Vec<AggPair>, AggregatorError> {
        Ok(self.token_pairs.lock().unwrap().get(&token).cloned().unwrap_or_default())
    }

    async fn pair(&self, _chain: Chain, pair: Address) -> Result<Option<AggPair>, AggregatorError> {
        Ok(self.pairs.lock().unwrap().get(&pair).cloned())
    }

    async fn trending(&self, _chain: Chain, k: usize) -> Result<Vec<AggPair>, AggregatorError> {
        let mut all = self.trending.lock().unwrap().clone();
        all.truncate(k);
        Ok(all)
    }
}

//================================================================================================//
//                                   COLLECTING NOTIFIER                                          //
//================================================================================================//

#[derive(Debug, Default)]
pub struct CollectingNotifier {
    pub alerts: Mutex<Vec<Alert>>,
}

impl Notifier for CollectingNotifier {
    fn notify(&self, alert: &Alert) {
        self.alerts.lock().unwrap().push(alert.clone());
    }
}

//================================================================================================//
//                                          HARNESS                                               //
//================================================================================================//

/// The full pipeline minus ingress, wired like the composition root.
pub struct Harness {
    pub chain: Arc<MockChain>,
    pub aggregator: Arc<CannedAggregator>,
    pub watchlist: Arc<Watchlist>,
    pub windows: Arc<WindowStore>,
    pub fdv: Arc<FdvTracker>,
    pub taxes: Arc<TaxEstimator>,
    pub gate: Arc<GatePipeline>,
    pub evaluator: Arc<AlertEvaluator>,
    pub notifier: Arc<CollectingNotifier>,
    pub pricer: Arc<ReservesPricer>,
}

pub fn harness(chain: Chain) -> Harness {
    let mock = Arc::new(MockChain::new(chain));
    let aggregator = Arc::new(CannedAggregator::default());

    let mut clients = ChainClients::new();
    clients.insert(mock.clone() as Arc<dyn ChainClient>);
    let clients = Arc::new(clients);

    let decimals = Arc::new(DecimalsCache::new());
    let oracle = Arc::new(PriceOracle::new(aggregator.clone() as Arc<dyn AggregatorSource>));
    let pricer = Arc::new(ReservesPricer::new(clients.clone(), decimals.clone(), oracle.clone()));

    let watchlist = Arc::new(Watchlist::new());
    let windows = Arc::new(WindowStore::new());
    let fdv = Arc::new(FdvTracker::new());
    let taxes = Arc::new(TaxEstimator::new());
    let notifier = Arc::new(CollectingNotifier::default());

    let probes = Arc::new(SafetyProbes::new(clients.clone(), decimals.clone(), oracle.clone()));
    let gate = Arc::new(GatePipeline::new(
        probes,
        aggregator.clone() as Arc<dyn AggregatorSource>,
        watchlist.clone(),
        taxes.clone(),
        Thresholds::default(),
    ));

    let evaluator = Arc::new(AlertEvaluator::new(
        windows.clone(),
        fdv.clone(),
        watchlist.clone(),
        pricer.clone(),
        oracle,
        clients,
        decimals,
        notifier.clone() as Arc<dyn Notifier>,
        Thresholds::default(),
    ));

    Harness {
        chain: mock,
        aggregator,
        watchlist,
        windows,
        fdv,
        taxes,
        gate,
        evaluator,
        notifier,
        pricer,
    }
}
