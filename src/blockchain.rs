//! # Chain Node Access
//!
//! `ChainClient` is the watcher's only interface to a chain node: a streaming
//! log subscription plus the handful of read-only contract calls the pipeline
//! needs. Connection transport (reconnects, endpoint failover) lives below
//! this trait and is not the watcher's concern.
//!
//! `WsChainClient` is the production implementation over an `ethers`
//! WebSocket provider with compile-time contract bindings.

use std::collections::HashMap;
use std::fmt::Debug;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethers::contract::abigen;
use ethers::providers::{Middleware, Provider, Ws};
use ethers::types::{Address, Filter, Log, U256};
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::chains;
use crate::errors::ChainError;
use crate::types::Chain;

const CALL_TIMEOUT: Duration = Duration::from_secs(8);
const LOG_CHANNEL_CAPACITY: usize = 1024;

//================================================================================================//
//                                     CONTRACT BINDINGS                                          //
//================================================================================================//

abigen!(
    IErc20,
    r#"[
        function decimals() external view returns (uint8)
        function totalSupply() external view returns (uint256)
    ]"#,
);

abigen!(
    IUniswapV2Pair,
    r#"[
        function getReserves() external view returns (uint112 reserve0, uint112 reserve1, uint32 blockTimestampLast)
    ]"#,
);

abigen!(
    IUniswapV2Router,
    r#"[
        function getAmountsOut(uint256 amountIn, address[] path) external view returns (uint256[] amounts)
    ]"#,
);

abigen!(
    IUniswapV3Pool,
    r#"[
        function slot0() external view returns (uint160 sqrtPriceX96, int24 tick, uint16 observationIndex, uint16 observationCardinality, uint16 observationCardinalityNext, uint8 feeProtocol, bool unlocked)
    ]"#,
);

abigen!(
    IUniswapV3Factory,
    r#"[
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool)
    ]"#,
);

abigen!(
    IUniswapV3Quoter,
    r#"[
        function quoteExactInputSingle(address tokenIn, address tokenOut, uint24 fee, uint256 amountIn, uint160 sqrtPriceLimitX96) external view returns (uint256 amountOut)
    ]"#,
);

//================================================================================================//
//                                       TRAIT DEFINITION                                         //
//================================================================================================//

/// Boxed stream of raw logs from a subscription. The stream ends when the
/// underlying subscription drops; callers are expected to re-subscribe.
pub type LogStream = Pin<Box<dyn Stream<Item = Log> + Send>>;

/// Read-only chain access used by the probes, the pricer and the subscriber.
#[async_trait]
pub trait ChainClient: Send + Sync + Debug {
    fn chain(&self) -> Chain;

    /// Length of the deployed bytecode at `address` (0 = no contract).
    async fn code_size(&self, address: Address) -> Result<usize, ChainError>;

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError>;

    async fn total_supply(&self, token: Address) -> Result<U256, ChainError>;

    async fn v2_reserves(&self, pair: Address) -> Result<(U256, U256), ChainError>;

    async fn v3_sqrt_price_x96(&self, pool: Address) -> Result<U256, ChainError>;

    /// Static `getAmountsOut` against the chain's standard V2 router.
    async fn v2_amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, ChainError>;

    /// `factory.getPool` on the chain's V3 factory.
    async fn v3_get_pool(
        &self,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Address, ChainError>;

    /// Static quote against the chain's V3 quoter.
    async fn v3_quote_exact_input_single(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
    ) -> Result<U256, ChainError>;

    /// Subscribe to logs matching `filter`.
    async fn subscribe_logs(&self, filter: Filter) -> Result<LogStream, ChainError>;
}

/// The per-chain client table handed to every component that touches a node.
#[derive(Clone, Debug, Default)]
pub struct ChainClients {
    clients: HashMap<Chain, Arc<dyn ChainClient>>,
}

impl ChainClients {
    pub fn new() -> Self {
        Self { clients: HashMap::new() }
    }

    pub fn insert(&mut self, client: Arc<dyn ChainClient>) {
        self.clients.insert(client.chain(), client);
    }

    pub fn get(&self, chain: Chain) -> Result<&Arc<dyn ChainClient>, ChainError> {
        self.clients
            .get(&chain)
            .ok_or_else(|| ChainError::UnknownChain(chain.to_string()))
    }
}

//================================================================================================//
//                                    WEBSOCKET IMPLEMENTATION                                    //
//================================================================================================//

pub struct WsChainClient {
    chain: Chain,
    provider: Arc<Provider<Ws>>,
}

impl Debug for WsChainClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsChainClient").field("chain", &self.chain).finish()
    }
}

impl WsChainClient {
    pub async fn connect(chain: Chain, url: &str) -> Result<Self, ChainError> {
        let ws = Ws::connect(url)
            .await
            .map_err(|e| ChainError::Provider(format!("ws connect {}: {}", chain, e)))?;
        let provider = Provider::new(ws).interval(Duration::from_millis(500));
        debug!(target: "blockchain", chain = %chain, "WebSocket provider connected");
        Ok(Self { chain, provider: Arc::new(provider) })
    }
}

#[async_trait]
impl ChainClient for WsChainClient {
    fn chain(&self) -> Chain {
        self.chain
    }

    async fn code_size(&self, address: Address) -> Result<usize, ChainError> {
        let code = tokio::time::timeout(CALL_TIMEOUT, self.provider.get_code(address, None))
            .await
            .map_err(|_| ChainError::call("eth_getCode", "timeout"))?
            .map_err(|e| ChainError::call("eth_getCode", e))?;
        Ok(code.len())
    }

    async fn token_decimals(&self, token: Address) -> Result<u8, ChainError> {
        let erc20 = IErc20::new(token, self.provider.clone());
        tokio::time::timeout(CALL_TIMEOUT, erc20.decimals().call())
            .await
            .map_err(|_| ChainError::call("decimals", "timeout"))?
            .map_err(|e| ChainError::call("decimals", e))
    }

    async fn total_supply(&self, token: Address) -> Result<U256, ChainError> {
        let erc20 = IErc20::new(token, self.provider.clone());
        tokio::time::timeout(CALL_TIMEOUT, erc20.total_supply().call())
            .await
            .map_err(|_| ChainError::call("totalSupply", "timeout"))?
            .map_err(|e| ChainError::call("totalSupply", e))
    }

    async fn v2_reserves(&self, pair: Address) -> Result<(U256, U256), ChainError> {
        let contract = IUniswapV2Pair::new(pair, self.provider.clone());
        let (r0, r1, _ts) = tokio::time::timeout(CALL_TIMEOUT, contract.get_reserves().call())
            .await
            .map_err(|_| ChainError::call("getReserves", "timeout"))?
            .map_err(|e| ChainError::call("getReserves", e))?;
        Ok((U256::from(r0), U256::from(r1)))
    }

    async fn v3_sqrt_price_x96(&self, pool: Address) -> Result<U256, ChainError> {
        let contract = IUniswapV3Pool::new(pool, self.provider.clone());
        let slot0 = tokio::time::timeout(CALL_TIMEOUT, contract.slot_0().call())
            .await
            .map_err(|_| ChainError::call("slot0", "timeout"))?
            .map_err(|e| ChainError::call("slot0", e))?;
        Ok(U256::from(slot0.0))
    }

    async fn v2_amounts_out(
        &self,
        amount_in: U256,
        path: &[Address],
    ) -> Result<Vec<U256>, ChainError> {
        let router = IUniswapV2Router::new(chains::spec(self.chain).v2_router, self.provider.clone());
        tokio::time::timeout(CALL_TIMEOUT, router.get_amounts_out(amount_in, path.to_vec()).call())
            .await
            .map_err(|_| ChainError::call("getAmountsOut", "timeout"))?
            .map_err(|e| ChainError::call("getAmountsOut", e))
    }

    async fn v3_get_pool(
        &self,
        token_a: Address,
        token_b: Address,
        fee: u32,
    ) -> Result<Address, ChainError> {
        let factory =
            IUniswapV3Factory::new(chains::spec(self.chain).v3_factory, self.provider.clone());
        tokio::time::timeout(CALL_TIMEOUT, factory.get_pool(token_a, token_b, fee).call())
            .await
            .map_err(|_| ChainError::call("getPool", "timeout"))?
            .map_err(|e| ChainError::call("getPool", e))
    }

    async fn v3_quote_exact_input_single(
        &self,
        token_in: Address,
        token_out: Address,
        fee: u32,
        amount_in: U256,
    ) -> Result<U256, ChainError> {
        let quoter =
            IUniswapV3Quoter::new(chains::spec(self.chain).v3_quoter, self.provider.clone());
        tokio::time::timeout(
            CALL_TIMEOUT,
            quoter
                .quote_exact_input_single(token_in, token_out, fee, amount_in, U256::zero())
                .call(),
        )
        .await
        .map_err(|_| ChainError::call("quoteExactInputSingle", "timeout"))?
        .map_err(|e| ChainError::call("quoteExactInputSingle", e))
    }

    async fn subscribe_logs(&self, filter: Filter) -> Result<LogStream, ChainError> {
        // SubscriptionStream borrows the provider, so the subscription is
        // driven by a forwarding task that owns its own Arc clone; the
        // returned stream ends when either side drops. Setup errors are
        // reported back through a oneshot before any log flows.
        let (tx, rx) = mpsc::channel::<Log>(LOG_CHANNEL_CAPACITY);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel::<Result<(), String>>();
        let provider = self.provider.clone();
        let chain = self.chain;

        tokio::spawn(async move {
            let mut stream = match provider.subscribe_logs(&filter).await {
                Ok(s) => {
                    let _ = ready_tx.send(Ok(()));
                    s
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.to_string()));
                    return;
                }
            };
            while let Some(log) = stream.next().await {
                if tx.send(log).await.is_err() {
                    break; // receiver dropped, tear down the subscription
                }
            }
            debug!(target: "blockchain", chain = %chain, "log subscription ended");
        });

        match ready_rx.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ChainError::Subscription(format!("{}: {}", chain, e))),
            Err(_) => {
                warn!(target: "blockchain", chain = %chain, "subscription task died before ready");
                return Err(ChainError::Subscription(format!("{}: task aborted", chain)));
            }
        }

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|log| (log, rx))
        });
        Ok(Box::pin(stream))
    }
}
