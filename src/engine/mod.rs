//! Engine wiring
//!
//! - `context`: shared handles built once at startup
//! - `market`: per-token price history fed from the price source
//! - `strategy_runner`: strategy registry and tick loops
//! - `copy_trader`: detector channel consumer for copy-trading
//!
//! `Engine` starts the enabled components, routes execution results back to
//! whichever component owns the order, and shuts everything down in order.

pub mod context;
pub mod copy_trader;
pub mod market;
pub mod strategy_runner;

pub use context::{strategy_network, EngineContext, LiveAccess};
pub use copy_trader::{CopyOutcome, CopyStats, CopyTrader, COPY_LEDGER_ID};
pub use market::MarketFeed;
pub use strategy_runner::{RunnerStats, StrategyRunner};

use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::dexscreener::{DexScreenerClient, PriceSource};
use crate::error::{Error, Result};
use crate::execution::{
    ExecutionResult, ExecutorStats, OneInchClient, SchedulerStats, SwapProvider,
};
use crate::persistence::{JsonFileStore, Persistence};
use crate::tracker::{
    ChainActivitySource, DetectorStats, EtherscanClient, TradeDetector, WalletRegistry,
};

/// Which components to run
#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub strategies: bool,
    pub copy_trading: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            strategies: true,
            copy_trading: true,
        }
    }
}

/// External services the engine talks to
pub struct EngineParts {
    pub provider: Arc<dyn SwapProvider>,
    pub prices: Arc<dyn PriceSource>,
    pub persistence: Arc<dyn Persistence>,
    /// Wallet activity for copy-trading; copy-trading stays off without it
    pub activity: Option<Arc<dyn ChainActivitySource>>,
    pub live: Option<LiveAccess>,
}

impl EngineParts {
    /// 1inch quotes, DexScreener prices, JSON files under the data dir and
    /// an Etherscan-family explorer when copy-trading is wanted
    pub async fn from_config(
        config: &Config,
        options: EngineOptions,
        live: Option<LiveAccess>,
    ) -> Result<Self> {
        let provider = OneInchClient::new(
            &config.aggregator.base_url,
            config.aggregator.api_key.clone(),
            Duration::from_secs(config.aggregator.timeout_secs),
        )?;
        let persistence = JsonFileStore::open(&config.persistence.data_dir).await?;
        info!("Persisting to {}", persistence.dir().display());

        let activity: Option<Arc<dyn ChainActivitySource>> =
            if options.copy_trading && config.copy_trading.enabled && !config.wallets.is_empty() {
                let explorer = EtherscanClient::new(
                    config.explorer.base_url.as_deref(),
                    config.explorer.api_key.clone(),
                    config.explorer.network()?,
                    Duration::from_secs(config.explorer.timeout_secs),
                )?
                .with_rate_limit(config.explorer.requests_per_second);
                Some(Arc::new(explorer))
            } else {
                None
            };

        Ok(Self {
            provider: Arc::new(provider),
            prices: Arc::new(DexScreenerClient::new()),
            persistence: Arc::new(persistence),
            activity,
            live,
        })
    }
}

/// Point-in-time view of every running component
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub dry_run: bool,
    pub strategies: RunnerStats,
    pub copy_trading: Option<CopyStats>,
    pub detector: Option<DetectorStats>,
    pub scheduler: SchedulerStats,
    pub executor: ExecutorStats,
}

pub struct Engine {
    ctx: Arc<EngineContext>,
    runner: Arc<StrategyRunner>,
    copy: Option<Arc<CopyTrader>>,
    detector: Option<Arc<TradeDetector>>,
    tasks: Vec<JoinHandle<()>>,
    router: Option<(oneshot::Sender<()>, JoinHandle<()>)>,
}

impl Engine {
    pub async fn start(mut config: Config, options: EngineOptions, parts: EngineParts) -> Result<Self> {
        if let Some(live) = &parts.live {
            restrict_to_live_network(&mut config, live)?;
        }

        let (ctx, results) = EngineContext::new(
            config,
            parts.provider,
            parts.prices,
            parts.persistence,
            parts.live,
        );
        let runner = Arc::new(StrategyRunner::new(ctx.clone()));
        let mut tasks = Vec::new();

        if options.strategies {
            for strategy in ctx.config.strategies.clone() {
                runner.register(strategy).await?;
            }
            let restored = runner.restore().await?;
            if restored > 0 {
                info!("Restored {} stored strategies", restored);
            }
            runner.start_all().await?;
        }

        let mut copy = None;
        let mut detector = None;
        if options.copy_trading && ctx.config.copy_trading.enabled {
            match parts.activity {
                Some(source) => {
                    let wallets = Arc::new(WalletRegistry::from_wallets(ctx.config.wallets.clone())?);
                    let (trade_tx, trade_rx) = mpsc::channel(ctx.config.engine.channel_capacity);
                    let tracked = Arc::new(TradeDetector::new(
                        source,
                        ctx.prices.clone(),
                        wallets,
                        trade_tx,
                    ));
                    tasks.push(tokio::spawn(tracked.clone().run(
                        Duration::from_secs(ctx.config.explorer.poll_interval_secs),
                        ctx.subscribe_shutdown(),
                    )));

                    let trader = Arc::new(CopyTrader::new(ctx.clone()).await?.with_detector(tracked.clone()));
                    tasks.push(tokio::spawn(trader.clone().run(
                        trade_rx,
                        Duration::from_secs(ctx.config.engine.analysis_interval_secs),
                        ctx.subscribe_shutdown(),
                    )));
                    copy = Some(trader);
                    detector = Some(tracked);
                }
                None => warn!("Copy-trading enabled but no wallets or explorer configured"),
            }
        }

        let (stop_tx, stop_rx) = oneshot::channel();
        let router = tokio::spawn(route_results(results, runner.clone(), copy.clone(), stop_rx));

        info!(
            "Engine started: {} strategies, copy-trading {}",
            runner.ids().len(),
            if copy.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            ctx,
            runner,
            copy,
            detector,
            tasks,
            router: Some((stop_tx, router)),
        })
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    pub fn runner(&self) -> &Arc<StrategyRunner> {
        &self.runner
    }

    pub fn copy_trader(&self) -> Option<&Arc<CopyTrader>> {
        self.copy.as_ref()
    }

    pub async fn status(&self) -> EngineStatus {
        EngineStatus {
            dry_run: self.ctx.executor.is_dry_run(),
            strategies: self.runner.stats().await,
            copy_trading: self.copy.as_ref().map(|c| c.stats()),
            detector: self.detector.as_ref().map(|d| d.stats()),
            scheduler: self.ctx.scheduler.stats().await,
            executor: self.ctx.executor.stats(),
        }
    }

    /// Stop strategies, signal every loop, wait for in-flight executions and
    /// route their results before returning
    pub async fn shutdown(mut self) {
        info!("Shutting down engine");
        self.runner.stop_all().await;
        self.ctx.trigger_shutdown();
        self.ctx.scheduler.stop().await;

        if let Some((stop, router)) = self.router.take() {
            let _ = stop.send(());
            if let Err(e) = router.await {
                warn!("Result router ended abnormally: {}", e);
            }
        }
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                warn!("Engine task ended abnormally: {}", e);
            }
        }
        info!("Engine stopped");
    }
}

/// Live execution signs on one network only
fn restrict_to_live_network(config: &mut Config, live: &LiveAccess) -> Result<()> {
    for strategy in &config.strategies {
        let network = strategy_network(strategy)?;
        if network != live.network {
            return Err(Error::ConfigInvalid(format!(
                "strategy {} trades on {} but live execution is configured for {}",
                strategy.strategy_id, network, live.network
            )));
        }
    }
    let chains = &mut config.copy_trading.allowed_chains;
    let before = chains.len();
    chains.retain(|c| c.eq_ignore_ascii_case(live.network.name()));
    if chains.len() < before {
        warn!("Copy-trading limited to {} in live mode", live.network);
    }
    Ok(())
}

/// Hand each result to the component that placed the order. On `stop`,
/// drain what is already queued and exit.
async fn route_results(
    mut results: mpsc::Receiver<ExecutionResult>,
    runner: Arc<StrategyRunner>,
    copy: Option<Arc<CopyTrader>>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            maybe = results.recv() => match maybe {
                Some(result) => dispatch(&result, &runner, copy.as_deref()).await,
                None => break,
            },
            _ = &mut stop => {
                while let Ok(result) = results.try_recv() {
                    dispatch(&result, &runner, copy.as_deref()).await;
                }
                break;
            }
        }
    }
    debug!("Result router stopped");
}

async fn dispatch(result: &ExecutionResult, runner: &StrategyRunner, copy: Option<&CopyTrader>) {
    if runner.on_result(result).await {
        return;
    }
    if copy.map(|c| c.on_result(result)).unwrap_or(false) {
        return;
    }
    debug!("Result {} for {} has no owner", result.id, result.ledger_id);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::fakes::FixedBook;
    use crate::execution::Network;
    use crate::persistence::MemoryPersistence;
    use crate::strategy::{StrategyConfig, StrategyStatus};

    const PEPE: &str = "0x6982508145454ce325ddbe47a25d4ec3d2311933";

    fn config() -> Config {
        let mut config = Config::default();
        config.execution.simulated_failure_rate = 0.0;
        config.execution.jitter.enabled = false;
        let mut dca = StrategyConfig::new("dca-pepe", "dca", PEPE).with_param("amount_per_buy", 25.0);
        dca.token_symbol = "PEPE".into();
        config.strategies.push(dca);
        config
    }

    fn parts(book: Arc<FixedBook>, store: Arc<MemoryPersistence>) -> EngineParts {
        EngineParts {
            provider: book.clone(),
            prices: book,
            persistence: store,
            activity: None,
            live: None,
        }
    }

    #[tokio::test]
    async fn test_engine_runs_strategy_and_shuts_down() {
        let store = Arc::new(MemoryPersistence::new());
        let engine = Engine::start(
            config(),
            EngineOptions::default(),
            parts(FixedBook::with(PEPE, 0.25), store.clone()),
        )
        .await
        .unwrap();
        assert!(engine.copy_trader().is_none());
        assert_eq!(
            engine.runner().status("dca-pepe").await,
            Some(StrategyStatus::Active)
        );

        // First tick fires immediately; wait for its fill to be routed back
        let mut routed = false;
        for _ in 0..100 {
            if engine.status().await.strategies.fills > 0 {
                routed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(routed);

        let status = engine.status().await;
        assert!(status.dry_run);
        assert_eq!(status.executor.successful, 1);
        engine.shutdown().await;

        assert_eq!(store.executions().len(), 1);
        assert_eq!(store.positions().len(), 1);
    }

    #[tokio::test]
    async fn test_strategies_disabled() {
        let engine = Engine::start(
            config(),
            EngineOptions {
                strategies: false,
                copy_trading: false,
            },
            parts(Arc::new(FixedBook::default()), Arc::new(MemoryPersistence::new())),
        )
        .await
        .unwrap();
        assert!(engine.runner().ids().is_empty());
        engine.shutdown().await;
    }

    #[test]
    fn test_live_network_restriction() {
        let mut config = config();
        config.strategies[0].chain_id = Network::Base.chain_id();
        let live = LiveAccess {
            network: Network::Ethereum,
            chain: Arc::new(crate::execution::JsonRpcClient::new(
                "http://127.0.0.1:8545",
                Network::Ethereum,
                Duration::from_secs(1),
            )),
            signer: Arc::new(crate::execution::NodeSigner::new(
                crate::execution::JsonRpcClient::new(
                    "http://127.0.0.1:8545",
                    Network::Ethereum,
                    Duration::from_secs(1),
                ),
                "0x00000000000000000000000000000000000000aa",
            )),
        };
        assert!(restrict_to_live_network(&mut config, &live).is_err());

        config.strategies.clear();
        restrict_to_live_network(&mut config, &live).unwrap();
        assert_eq!(config.copy_trading.allowed_chains, vec!["ethereum".to_string()]);
    }
}
