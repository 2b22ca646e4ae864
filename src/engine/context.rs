//! Engine context
//!
//! Built once at startup and shared by `Arc` with every engine component.
//! Owns the scheduler and executor, so it must be created inside a Tokio runtime.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use super::market::MarketFeed;
use crate::config::{ChainConfig, Config};
use crate::dexscreener::PriceSource;
use crate::error::{Error, Result};
use crate::execution::{
    ChainClient, ExecutionResult, JsonRpcClient, Network, NodeSigner, Scheduler, Signer,
    SwapExecutor, SwapProvider, TokenInfo,
};
use crate::persistence::Persistence;
use crate::position::LedgerRegistry;
use crate::strategy::params::ParamReader;
use crate::strategy::StrategyConfig;

/// Chain access and custody for live execution
pub struct LiveAccess {
    pub network: Network,
    pub chain: Arc<dyn ChainClient>,
    pub signer: Arc<dyn Signer>,
}

impl LiveAccess {
    /// Node-backed client and signer from the `[chain]` section
    pub fn connect(config: &ChainConfig) -> Result<Self> {
        let network = config.network()?;
        let url = config
            .rpc_url
            .as_deref()
            .ok_or_else(|| Error::ConfigInvalid("chain.rpc_url is required for live mode".into()))?;
        let address = config.wallet_address.as_deref().ok_or_else(|| {
            Error::ConfigInvalid("chain.wallet_address is required for live mode".into())
        })?;
        let timeout = Duration::from_secs(config.timeout_secs);
        info!("Live execution on {} as {}", network, address);
        Ok(Self {
            network,
            chain: Arc::new(JsonRpcClient::new(url, network, timeout)),
            signer: Arc::new(NodeSigner::new(JsonRpcClient::new(url, network, timeout), address)),
        })
    }
}

pub struct EngineContext {
    pub config: Config,
    pub ledgers: Arc<LedgerRegistry>,
    pub scheduler: Scheduler,
    pub executor: Arc<SwapExecutor>,
    pub persistence: Arc<dyn Persistence>,
    pub prices: Arc<dyn PriceSource>,
    pub market: MarketFeed,
    shutdown: broadcast::Sender<()>,
}

impl EngineContext {
    /// Wire the executor and start the scheduler.
    ///
    /// Returns the context and the receiving end of the execution result channel.
    pub fn new(
        config: Config,
        provider: Arc<dyn SwapProvider>,
        prices: Arc<dyn PriceSource>,
        persistence: Arc<dyn Persistence>,
        live: Option<LiveAccess>,
    ) -> (Arc<Self>, mpsc::Receiver<ExecutionResult>) {
        let ledgers = Arc::new(LedgerRegistry::new());
        let mut executor = SwapExecutor::new(
            config.execution.executor_config(),
            provider,
            ledgers.clone(),
        )
        .with_persistence(persistence.clone());
        if let Some(access) = live {
            executor = executor.with_live(access.chain, access.signer);
        }
        let executor = Arc::new(executor);

        let (shutdown, _) = broadcast::channel(4);
        let (results_tx, results_rx) = mpsc::channel(config.engine.channel_capacity);
        let scheduler = Scheduler::start(
            config.execution.max_concurrent_executions,
            executor.clone(),
            results_tx,
            shutdown.subscribe(),
        );

        let market = MarketFeed::new(prices.clone(), config.engine.price_history);
        info!(
            "Engine context ready ({} mode, {} execution slots)",
            if executor.is_dry_run() { "dry-run" } else { "live" },
            config.execution.max_concurrent_executions
        );

        let ctx = Arc::new(Self {
            config,
            ledgers,
            scheduler,
            executor,
            persistence,
            prices,
            market,
            shutdown,
        });
        (ctx, results_rx)
    }

    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Signal every loop to stop
    pub fn trigger_shutdown(&self) {
        // No receivers left means everything already stopped
        let _ = self.shutdown.send(());
    }

    /// Quote currency for a strategy: its `quote_token` param, then the
    /// configured override, then native USDC on `network`
    pub fn quote_token(&self, strategy: &StrategyConfig, network: Network) -> Result<TokenInfo> {
        let params = ParamReader::new(&strategy.strategy_id, &strategy.params);
        let address = params.str_or(&["quote_token"], "")?;
        if !address.is_empty() {
            let symbol = params.str_or(&["quote_symbol"], "quote")?.to_uppercase();
            let decimals = params.u32_or(&["quote_decimals"], 18)?;
            let decimals = u8::try_from(decimals).map_err(|_| {
                Error::ConfigInvalid(format!(
                    "{}: quote_decimals {} out of range",
                    strategy.strategy_id, decimals
                ))
            })?;
            return Ok(TokenInfo::new(address, symbol, decimals));
        }
        Ok(self
            .config
            .execution
            .quote_token
            .clone()
            .unwrap_or_else(|| TokenInfo::usdc(network)))
    }
}

/// Network of a strategy, from its chain id
pub fn strategy_network(config: &StrategyConfig) -> Result<Network> {
    Network::from_chain_id(config.chain_id).ok_or_else(|| {
        Error::ConfigInvalid(format!(
            "{}: unsupported chain id {}",
            config.strategy_id, config.chain_id
        ))
    })
}
