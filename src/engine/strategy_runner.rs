//! Strategy runner
//!
//! Owns every registered strategy and its ledger. Each active strategy gets a
//! tick loop at the analysis interval: fetch a price, evaluate, gate the
//! signals and hand orders to the scheduler. Execution results come back
//! through `on_result` and are fed to the owning strategy as fills.
//!
//! Every signal that reaches the gate is eventually answered with a fill,
//! including rejected, dropped and cancelled ones, so the strategies' pending
//! guards clear without waiting for their grace period.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::context::{strategy_network, EngineContext};
use crate::error::{Error, Result};
use crate::execution::{
    ExecutionResult, Network, Order, OrderSide, OrderSource, ScheduleOutcome, TokenInfo,
};
use crate::filter::SignalGate;
use crate::position::{LedgerHandle, LedgerSnapshot, PositionLedger, RiskLevels};
use crate::strategy::{
    MarketData, Randomizer, SignalFill, SignalKind, Strategy, StrategyConfig, StrategyKind,
    StrategyState, StrategyStatus, TradeSignal,
};

struct RunnerEntry {
    strategy: Strategy,
    network: Network,
    token: TokenInfo,
    quote_token: TokenInfo,
    ledger: LedgerHandle,
}

#[derive(Default)]
struct Counters {
    ticks: AtomicU64,
    signals: AtomicU64,
    scheduled: AtomicU64,
    rejected: AtomicU64,
    dropped: AtomicU64,
    fills: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunnerStats {
    pub strategies: usize,
    pub active: usize,
    pub ticks: u64,
    pub signals: u64,
    pub scheduled: u64,
    pub rejected: u64,
    pub dropped: u64,
    pub fills: u64,
}

pub struct StrategyRunner {
    ctx: Arc<EngineContext>,
    entries: DashMap<String, Arc<tokio::sync::Mutex<RunnerEntry>>>,
    loops: DashMap<String, JoinHandle<()>>,
    gate: Mutex<SignalGate>,
    rng: Mutex<Randomizer>,
    counters: Counters,
}

impl StrategyRunner {
    pub fn new(ctx: Arc<EngineContext>) -> Self {
        let jitter = ctx.config.execution.jitter.clone();
        Self {
            gate: Mutex::new(SignalGate::new(Randomizer::new(jitter.clone(), None))),
            rng: Mutex::new(Randomizer::new(jitter, None)),
            ctx,
            entries: DashMap::new(),
            loops: DashMap::new(),
            counters: Counters::default(),
        }
    }

    /// Register a strategy and its ledger. Positions stored for the id are
    /// restored into the ledger. The strategy starts paused.
    pub async fn register(&self, config: StrategyConfig) -> Result<()> {
        if self.entries.contains_key(&config.strategy_id) {
            return Err(Error::ConfigInvalid(format!(
                "strategy {} already registered",
                config.strategy_id
            )));
        }

        let strategy = Strategy::from_config(config.clone())?;
        let network = strategy_network(&config)?;
        let quote_token = self.ctx.quote_token(&config, network)?;
        let token = TokenInfo::new(
            config.token_address.clone(),
            config.token_symbol.clone(),
            config.token_decimals,
        );

        let risk = RiskLevels {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        };
        let stored = match self.ctx.persistence.load_positions(&config.strategy_id).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!("[{}] Could not load stored positions: {}", config.strategy_id, e);
                Vec::new()
            }
        };
        let restored = stored.len();
        let ledger = if stored.is_empty() {
            PositionLedger::new(&config.strategy_id, config.total_budget, risk)
        } else {
            PositionLedger::restore(&config.strategy_id, config.total_budget, risk, stored)
        };
        let ledger = LedgerHandle::spawn(ledger, Some(self.ctx.persistence.clone()));
        self.ctx.ledgers.insert(ledger.clone());

        if let Err(e) = self.ctx.persistence.save_strategy_config(&config).await {
            warn!("[{}] Could not persist config: {}", config.strategy_id, e);
        }

        info!(
            "Registered {} strategy {} on {} ({} {} budget, {} stored positions)",
            strategy.kind().name(),
            config.strategy_id,
            network,
            config.total_budget,
            quote_token.symbol,
            restored
        );
        self.entries.insert(
            config.strategy_id.clone(),
            Arc::new(tokio::sync::Mutex::new(RunnerEntry {
                strategy,
                network,
                token,
                quote_token,
                ledger,
            })),
        );
        Ok(())
    }

    /// Register every stored strategy config not already present.
    /// Returns how many were registered.
    pub async fn restore(&self) -> Result<usize> {
        let configs = self.ctx.persistence.load_strategy_configs().await?;
        let mut registered = 0;
        for config in configs {
            if self.entries.contains_key(&config.strategy_id) {
                continue;
            }
            let id = config.strategy_id.clone();
            match self.register(config).await {
                Ok(()) => registered += 1,
                Err(e) => warn!("Skipping stored strategy {}: {}", id, e),
            }
        }
        Ok(registered)
    }

    /// Stop a strategy and drop it with its ledger
    pub async fn unregister(&self, strategy_id: &str) -> Result<()> {
        self.stop(strategy_id).await?;
        self.entries.remove(strategy_id);
        self.ctx.ledgers.remove(strategy_id);
        info!("Unregistered strategy {}", strategy_id);
        Ok(())
    }

    /// Activate a strategy and make sure its tick loop is running
    pub async fn start(self: &Arc<Self>, strategy_id: &str) -> Result<()> {
        let entry = self.entry(strategy_id)?;
        entry.lock().await.strategy.start();

        let running = self
            .loops
            .get(strategy_id)
            .map(|h| !h.is_finished())
            .unwrap_or(false);
        if !running {
            let runner = Arc::clone(self);
            let id = strategy_id.to_string();
            let handle = tokio::spawn(async move { runner.run_loop(id).await });
            self.loops.insert(strategy_id.to_string(), handle);
        }
        Ok(())
    }

    /// Start every registered strategy
    pub async fn start_all(self: &Arc<Self>) -> Result<()> {
        let ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            self.start(&id).await?;
        }
        Ok(())
    }

    /// Stop evaluating and cancel pending orders. The loop keeps idling.
    pub async fn pause(&self, strategy_id: &str) -> Result<()> {
        let entry = self.entry(strategy_id)?;
        let mut entry = entry.lock().await;
        entry.strategy.pause();
        self.cancel_pending(strategy_id, &mut entry).await;
        Ok(())
    }

    /// Stop for good: cancel pending orders and end the tick loop
    pub async fn stop(&self, strategy_id: &str) -> Result<()> {
        let entry = self.entry(strategy_id)?;
        let mut entry = entry.lock().await;
        entry.strategy.stop();
        self.cancel_pending(strategy_id, &mut entry).await;
        if let Some((_, handle)) = self.loops.remove(strategy_id) {
            handle.abort();
        }
        Ok(())
    }

    /// Replace a strategy's config and carry the risk levels to its ledger
    pub async fn update(&self, config: StrategyConfig) -> Result<()> {
        let entry = self.entry(&config.strategy_id)?;
        let mut entry = entry.lock().await;
        if strategy_network(&config)? != entry.network
            || !config.token_address.eq_ignore_ascii_case(&entry.token.address)
        {
            return Err(Error::ConfigInvalid(format!(
                "{}: token and chain cannot change on a registered strategy",
                config.strategy_id
            )));
        }
        entry.strategy.update_config(config.clone())?;
        entry.quote_token = self.ctx.quote_token(&config, entry.network)?;
        let risk = RiskLevels {
            stop_loss_pct: config.stop_loss_pct,
            take_profit_pct: config.take_profit_pct,
        };
        entry.ledger.set_risk(risk, config.total_budget).await?;
        if let Err(e) = self.ctx.persistence.save_strategy_config(&config).await {
            warn!("[{}] Could not persist config: {}", config.strategy_id, e);
        }
        Ok(())
    }

    /// Fetch a price and run one evaluation. Returns how many orders were scheduled.
    pub async fn tick(&self, strategy_id: &str) -> Result<usize> {
        let entry = self.entry(strategy_id)?;
        let (network, token) = {
            let entry = entry.lock().await;
            if !entry.strategy.is_active() {
                return Ok(0);
            }
            (entry.network, entry.token.address.clone())
        };
        let Some(market) = self.ctx.market.tick(network, &token).await? else {
            debug!("[{}] No price this tick", strategy_id);
            return Ok(0);
        };
        self.process(strategy_id, &market, Utc::now()).await
    }

    /// Evaluate against `market` and route the resulting signals
    pub async fn process(
        &self,
        strategy_id: &str,
        market: &MarketData,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let entry = self.entry(strategy_id)?;
        let mut entry = entry.lock().await;
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        let snapshot = entry.ledger.snapshot().await?;
        let signals = entry.strategy.evaluate(market, &snapshot, now);

        let mut scheduled = 0;
        for signal in signals.iter().filter(|s| s.is_actionable_at(now)) {
            self.counters.signals.fetch_add(1, Ordering::Relaxed);
            if self
                .route_signal(&mut entry, signal, &snapshot, market.current_price, now)
                .await
            {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    async fn route_signal(
        &self,
        entry: &mut RunnerEntry,
        signal: &TradeSignal,
        snapshot: &LedgerSnapshot,
        price: f64,
        now: DateTime<Utc>,
    ) -> bool {
        let filter = self
            .gate
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .evaluate_at(signal, entry.strategy.config(), snapshot.available_capital, now);
        if !filter.accepted {
            self.counters.rejected.fetch_add(1, Ordering::Relaxed);
            entry.strategy.on_fill(&failed_fill(signal, &filter.reason));
            return false;
        }

        let order = match build_order(entry, signal, snapshot, price) {
            Ok(order) => order,
            Err(e) => {
                warn!("[{}] Cannot route {} signal: {}", signal.strategy_id, signal.kind, e);
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                entry.strategy.on_fill(&failed_fill(signal, &e.to_string()));
                return false;
            }
        };

        let delay = filter.delay;
        match self.ctx.scheduler.schedule(order, delay, Some(filter)).await {
            ScheduleOutcome::Scheduled { id, delay } => {
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                info!(
                    "[{}] {} {:.4} {} scheduled as {} in {:?}",
                    signal.strategy_id,
                    signal.kind,
                    signal.amount,
                    if signal.kind == SignalKind::Buy {
                        entry.quote_token.symbol.as_str()
                    } else {
                        entry.token.symbol.as_str()
                    },
                    id,
                    delay
                );
                true
            }
            ScheduleOutcome::Dropped { reason } => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                entry.strategy.on_fill(&failed_fill(signal, &reason));
                false
            }
        }
    }

    /// Cancel this strategy's queued orders and answer each with a failed fill
    async fn cancel_pending(&self, strategy_id: &str, entry: &mut RunnerEntry) {
        let pending = self.ctx.scheduler.pending().await;
        for item in pending.iter().filter(|p| p.order.ledger_id == strategy_id) {
            if !self.ctx.scheduler.cancel(&item.id).await {
                // Already firing; its result arrives through on_result
                continue;
            }
            if let OrderSource::Strategy { signal_id, grid_level, .. } = &item.order.source {
                entry.strategy.on_fill(&SignalFill {
                    signal_id: signal_id.clone(),
                    strategy_id: strategy_id.to_string(),
                    kind: side_kind(item.order.side),
                    success: false,
                    quote_amount: 0.0,
                    token_amount: 0.0,
                    executed_price: 0.0,
                    tx_hash: None,
                    grid_level: *grid_level,
                    error: Some("cancelled".to_string()),
                });
            }
        }
    }

    /// Feed a strategy-sourced execution result back to its strategy.
    /// Returns false for results that belong elsewhere.
    pub async fn on_result(&self, result: &ExecutionResult) -> bool {
        let OrderSource::Strategy {
            strategy_id,
            signal_id,
            grid_level,
        } = &result.source
        else {
            return false;
        };
        let Some(entry) = self.entries.get(strategy_id).map(|e| Arc::clone(e.value())) else {
            warn!("Result {} for unknown strategy {}", result.id, strategy_id);
            return false;
        };

        let (quote_amount, token_amount) = if result.success {
            result.quote_and_tokens()
        } else {
            (0.0, 0.0)
        };
        let fill = SignalFill {
            signal_id: signal_id.clone(),
            strategy_id: strategy_id.clone(),
            kind: side_kind(result.side),
            success: result.success,
            quote_amount,
            token_amount,
            executed_price: result.executed_price,
            tx_hash: result.tx_hash.clone(),
            grid_level: *grid_level,
            error: result.error.clone(),
        };
        entry.lock().await.strategy.on_fill(&fill);
        self.counters.fills.fetch_add(1, Ordering::Relaxed);
        true
    }

    async fn run_loop(self: Arc<Self>, strategy_id: String) {
        let base = Duration::from_secs(self.ctx.config.engine.analysis_interval_secs);
        let mut shutdown = self.ctx.subscribe_shutdown();
        info!("[{}] Tick loop started ({:?} interval)", strategy_id, base);

        loop {
            match self.tick(&strategy_id).await {
                Ok(0) => {}
                Ok(n) => debug!("[{}] {} orders scheduled", strategy_id, n),
                Err(Error::StrategyNotFound(_)) => break,
                Err(e) => warn!("[{}] Tick failed: {}", strategy_id, e),
            }

            let wait = self
                .rng
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .jitter_interval(base);
            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = shutdown.recv() => break,
            }

            if self.status(&strategy_id).await == Some(StrategyStatus::Stopped) {
                break;
            }
        }
        info!("[{}] Tick loop ended", strategy_id);
    }

    fn entry(&self, strategy_id: &str) -> Result<Arc<tokio::sync::Mutex<RunnerEntry>>> {
        self.entries
            .get(strategy_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| Error::StrategyNotFound(strategy_id.to_string()))
    }

    pub async fn status(&self, strategy_id: &str) -> Option<StrategyStatus> {
        let entry = self.entry(strategy_id).ok()?;
        let status = entry.lock().await.strategy.status();
        Some(status)
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        self.entries.contains_key(strategy_id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub async fn states(&self) -> Vec<StrategyState> {
        let mut states = Vec::with_capacity(self.entries.len());
        for id in self.ids() {
            if let Ok(entry) = self.entry(&id) {
                states.push(entry.lock().await.strategy.state());
            }
        }
        states
    }

    /// Kind-specific view of one strategy, for inspection
    pub async fn with_kind<T>(
        &self,
        strategy_id: &str,
        f: impl FnOnce(&StrategyKind) -> T,
    ) -> Result<T> {
        let entry = self.entry(strategy_id)?;
        let entry = entry.lock().await;
        Ok(f(entry.strategy.kind()))
    }

    pub async fn stats(&self) -> RunnerStats {
        let active = self
            .states()
            .await
            .iter()
            .filter(|s| s.status == StrategyStatus::Active)
            .count();
        RunnerStats {
            strategies: self.entries.len(),
            active,
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            signals: self.counters.signals.load(Ordering::Relaxed),
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            fills: self.counters.fills.load(Ordering::Relaxed),
        }
    }

    /// Stop every strategy; used on shutdown
    pub async fn stop_all(&self) {
        for id in self.ids() {
            if let Err(e) = self.stop(&id).await {
                warn!("[{}] Stop failed: {}", id, e);
            }
        }
    }
}

/// Turn an accepted signal into an order against the strategy's ledger
fn build_order(
    entry: &RunnerEntry,
    signal: &TradeSignal,
    snapshot: &LedgerSnapshot,
    price: f64,
) -> Result<Order> {
    let config = entry.strategy.config();
    let source = OrderSource::Strategy {
        strategy_id: signal.strategy_id.clone(),
        signal_id: signal.id.clone(),
        grid_level: signal.grid_level,
    };
    let side = match signal.kind {
        SignalKind::Buy => OrderSide::Buy,
        SignalKind::Sell | SignalKind::Close => OrderSide::Sell,
        SignalKind::Hold => {
            return Err(Error::InvalidState("hold signals are not routed".into()));
        }
    };

    let mut order = Order::new(
        source,
        config.strategy_id.clone(),
        side,
        entry.network,
        entry.token.clone(),
        entry.quote_token.clone(),
        signal.amount,
    )
    .with_slippage(config.max_slippage)
    .with_expiry(signal.valid_until);
    if price > 0.0 {
        order = order.with_reference_price(price);
    }

    let position_id = match side {
        OrderSide::Sell => Some(signal.position_id.clone().ok_or_else(|| {
            Error::InvalidState(format!("{} signal {} names no position", signal.kind, signal.id))
        })?),
        // DCA accumulates into one position
        OrderSide::Buy => signal.position_id.clone().or_else(|| {
            matches!(entry.strategy.kind(), StrategyKind::Dca(_))
                .then(|| snapshot.first_open(&entry.token.address).map(|p| p.id.clone()))
                .flatten()
        }),
    };
    if let Some(id) = position_id {
        order = order.with_position(id);
    }
    Ok(order)
}

fn side_kind(side: OrderSide) -> SignalKind {
    match side {
        OrderSide::Buy => SignalKind::Buy,
        OrderSide::Sell => SignalKind::Sell,
    }
}

fn failed_fill(signal: &TradeSignal, reason: &str) -> SignalFill {
    SignalFill {
        signal_id: signal.id.clone(),
        strategy_id: signal.strategy_id.clone(),
        kind: signal.kind,
        success: false,
        quote_amount: 0.0,
        token_amount: 0.0,
        executed_price: 0.0,
        tx_hash: None,
        grid_level: signal.grid_level,
        error: Some(reason.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::context::fakes::{context, FixedBook};

    const PEPE: &str = "0x6982508145454ce325ddbe47a25d4ec3d2311933";

    fn dca_config(id: &str) -> StrategyConfig {
        let mut config = StrategyConfig::new(id, "dca", PEPE);
        config.token_symbol = "PEPE".into();
        config.total_budget = 1_000.0;
        config.max_position_size = 500.0;
        config.min_trade_size = 10.0;
        config.with_param("amount_per_buy", 50.0)
    }

    async fn next_result(
        rx: &mut tokio::sync::mpsc::Receiver<ExecutionResult>,
    ) -> ExecutionResult {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("timed out waiting for result")
            .expect("result channel closed")
    }

    #[tokio::test]
    async fn test_dca_loop_executes_and_feeds_back() {
        let book = FixedBook::with(PEPE, 0.5);
        let (ctx, mut rx) = context(book);
        let runner = Arc::new(StrategyRunner::new(ctx.clone()));
        runner.register(dca_config("dca-1")).await.unwrap();
        // The loop ticks once immediately, then waits out the interval
        runner.start("dca-1").await.unwrap();

        let result = next_result(&mut rx).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.side, OrderSide::Buy);
        assert!(runner.on_result(&result).await);

        let snapshot = ctx.ledgers.get("dca-1").unwrap().snapshot().await.unwrap();
        assert_eq!(snapshot.open_positions.len(), 1);
        assert!((snapshot.allocated_capital - 50.0).abs() < 1e-9);

        let count = runner
            .with_kind("dca-1", |kind| match kind {
                StrategyKind::Dca(dca) => dca.buy_count(),
                _ => 0,
            })
            .await
            .unwrap();
        assert_eq!(count, 1);
        let stats = runner.stats().await;
        assert_eq!(stats.scheduled, 1);
        assert_eq!(stats.fills, 1);
        runner.stop_all().await;
    }

    #[tokio::test]
    async fn test_duplicate_and_unknown_ids() {
        let (ctx, _rx) = context(FixedBook::with(PEPE, 0.5));
        let runner = Arc::new(StrategyRunner::new(ctx.clone()));
        runner.register(dca_config("dca-1")).await.unwrap();
        assert!(matches!(
            runner.register(dca_config("dca-1")).await,
            Err(Error::ConfigInvalid(_))
        ));
        assert!(matches!(
            runner.start("missing").await,
            Err(Error::StrategyNotFound(_))
        ));
        assert_eq!(runner.status("dca-1").await, Some(StrategyStatus::Paused));
        assert!(ctx.ledgers.contains("dca-1"));

        runner.unregister("dca-1").await.unwrap();
        assert!(!runner.contains("dca-1"));
        assert!(!ctx.ledgers.contains("dca-1"));
    }

    #[tokio::test]
    async fn test_paused_strategy_schedules_nothing() {
        let (ctx, _rx) = context(FixedBook::with(PEPE, 0.5));
        let runner = StrategyRunner::new(ctx);
        runner.register(dca_config("dca-1")).await.unwrap();
        let market = MarketData::at_price(PEPE, 1, 0.5);
        assert_eq!(runner.process("dca-1", &market, Utc::now()).await.unwrap(), 0);
        assert_eq!(runner.tick("dca-1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_rejects_token_change() {
        let (ctx, _rx) = context(FixedBook::with(PEPE, 0.5));
        let runner = StrategyRunner::new(ctx.clone());
        runner.register(dca_config("dca-1")).await.unwrap();

        let mut moved = dca_config("dca-1");
        moved.chain_id = 8453;
        assert!(matches!(runner.update(moved).await, Err(Error::ConfigInvalid(_))));

        let mut tighter = dca_config("dca-1");
        tighter.stop_loss_pct = Some(10.0);
        runner.update(tighter).await.unwrap();
        let stored = ctx.persistence.load_strategy_configs().await.unwrap();
        assert_eq!(stored[0].stop_loss_pct, Some(10.0));
    }

    #[tokio::test]
    async fn test_restore_registers_stored_configs() {
        let (ctx, _rx) = context(FixedBook::with(PEPE, 0.5));
        ctx.persistence
            .save_strategy_config(&dca_config("stored"))
            .await
            .unwrap();
        let runner = StrategyRunner::new(ctx);
        assert_eq!(runner.restore().await.unwrap(), 1);
        assert_eq!(runner.restore().await.unwrap(), 0);
        assert_eq!(runner.ids(), vec!["stored".to_string()]);
    }

    #[test]
    fn test_sell_without_position_is_not_routed() {
        let config = dca_config("dca-1");
        let strategy = Strategy::from_config(config.clone()).unwrap();
        let entry_token = TokenInfo::new(PEPE, "PEPE", 18);
        let signal = TradeSignal::new(&config, SignalKind::Sell, 10.0, 1.0, "exit");
        let snapshot = LedgerSnapshot::default();

        tokio_test::block_on(async {
            let ledger = LedgerHandle::spawn(
                PositionLedger::new("dca-1", 1_000.0, RiskLevels::default()),
                None,
            );
            let entry = RunnerEntry {
                strategy,
                network: Network::Ethereum,
                token: entry_token,
                quote_token: TokenInfo::usdc(Network::Ethereum),
                ledger,
            };
            let err = build_order(&entry, &signal, &snapshot, 0.5).unwrap_err();
            assert!(matches!(err, Error::InvalidState(_)));

            let buy = TradeSignal::new(&config, SignalKind::Buy, 50.0, 0.8, "dca");
            let order = build_order(&entry, &buy, &snapshot, 0.5).unwrap();
            assert_eq!(order.side, OrderSide::Buy);
            assert_eq!(order.reference_price, Some(0.5));
            assert_eq!(order.expires_at, Some(buy.valid_until));
            assert!(order.position_id.is_none());
        });
    }
}
