//! Copy trader
//!
//! Consumes trades from the detector channel, runs them through correlation
//! and the copy filter, and schedules the copies against a single shared
//! copy ledger. Copy buys spend native USDC on the trade's chain; copy sells
//! close the whole copy position in the token the wallet sold.
//!
//! Open copy positions are also swept on an interval for stop-loss and
//! take-profit.

use dashmap::DashMap;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::context::EngineContext;
use crate::error::Result;
use crate::execution::{
    ExecutionResult, Network, Order, OrderSide, OrderSource, ScheduleOutcome, TokenInfo,
};
use crate::filter::{apply_correlation_boost, CopyConfig, CopyFilter, FilterResult};
use crate::position::{LedgerHandle, Position, PositionLedger, RiskLevels};
use crate::strategy::Randomizer;
use crate::tracker::{DetectedTrade, TradeDetector, TradeDirection};

/// Ledger every copy position is booked against
pub const COPY_LEDGER_ID: &str = "copy-trading";

/// Recent detections considered for correlation
const CORRELATION_LOOKBACK: usize = 100;

#[derive(Debug, Clone, PartialEq)]
pub enum CopyOutcome {
    Scheduled {
        order_id: String,
        execution_id: String,
        delay: Duration,
    },
    Skipped {
        reason: String,
    },
}

impl CopyOutcome {
    fn skipped(reason: impl Into<String>) -> Self {
        CopyOutcome::Skipped {
            reason: reason.into(),
        }
    }

    pub fn is_scheduled(&self) -> bool {
        matches!(self, CopyOutcome::Scheduled { .. })
    }
}

#[derive(Default)]
struct Counters {
    received: AtomicU64,
    correlated: AtomicU64,
    scheduled: AtomicU64,
    skipped: AtomicU64,
    dropped: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    risk_exits: AtomicU64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CopyStats {
    pub received: u64,
    pub correlated: u64,
    pub scheduled: u64,
    pub skipped: u64,
    pub dropped: u64,
    pub completed: u64,
    pub failed: u64,
    pub risk_exits: u64,
    /// Copy buys scheduled or executing
    pub active_copies: usize,
}

pub struct CopyTrader {
    ctx: Arc<EngineContext>,
    filter: Mutex<CopyFilter>,
    ledger: LedgerHandle,
    detector: Option<Arc<TradeDetector>>,
    /// Order id -> position it exits, `None` for buys
    in_flight: Mutex<HashMap<String, Option<String>>>,
    /// Positions with an exit scheduled or executing
    pending_exits: DashMap<String, String>,
    counters: Counters,
}

impl CopyTrader {
    /// Build the copy ledger, restoring stored copy positions
    pub async fn new(ctx: Arc<EngineContext>) -> Result<Self> {
        let config = ctx.config.copy_config();
        let risk = RiskLevels {
            stop_loss_pct: Some(config.stop_loss_pct).filter(|p| *p > 0.0),
            take_profit_pct: Some(config.take_profit_pct).filter(|p| *p > 0.0),
        };
        let stored = match ctx.persistence.load_positions(COPY_LEDGER_ID).await {
            Ok(positions) => positions,
            Err(e) => {
                warn!("Could not load stored copy positions: {}", e);
                Vec::new()
            }
        };
        if !stored.is_empty() {
            info!("Restoring {} stored copy positions", stored.len());
        }
        let ledger = PositionLedger::restore(COPY_LEDGER_ID, config.budget_usd, risk, stored);
        let ledger = LedgerHandle::spawn(ledger, Some(ctx.persistence.clone()));
        ctx.ledgers.insert(ledger.clone());

        let rng = Randomizer::new(ctx.config.execution.jitter.clone(), None);
        Ok(Self {
            filter: Mutex::new(CopyFilter::new(config, rng)),
            ctx,
            ledger,
            detector: None,
            in_flight: Mutex::new(HashMap::new()),
            pending_exits: DashMap::new(),
            counters: Counters::default(),
        })
    }

    /// Use the detector's recent trades for correlation
    pub fn with_detector(mut self, detector: Arc<TradeDetector>) -> Self {
        self.detector = Some(detector);
        self
    }

    pub fn ledger(&self) -> &LedgerHandle {
        &self.ledger
    }

    pub fn config(&self) -> CopyConfig {
        self.filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .config()
            .clone()
    }

    /// Filter one detected trade and schedule its copy
    pub async fn handle(&self, mut trade: DetectedTrade) -> CopyOutcome {
        self.counters.received.fetch_add(1, Ordering::Relaxed);

        if let Some(detector) = &self.detector {
            let recent = detector.recent_trades(CORRELATION_LOOKBACK).await;
            if apply_correlation_boost(&mut trade, &recent) {
                self.counters.correlated.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Correlated {} on {}: confidence now {:.2}",
                    trade.tx_hash,
                    trade.target_symbol(),
                    trade.confidence_score
                );
            }
        }

        let (filter, config) = {
            let mut copy_filter = self.filter.lock().unwrap_or_else(PoisonError::into_inner);
            (copy_filter.evaluate(&trade), copy_filter.config().clone())
        };
        if !filter.accepted {
            return self.skip(filter.reason);
        }

        let built = match trade.trade_type {
            TradeDirection::Buy => self.buy_order(&trade, &filter, &config),
            TradeDirection::Sell => self.sell_order(&trade, &config).await,
            TradeDirection::Swap => Err("token-to-token swaps are not copied".to_string()),
        };
        let (order, exit_of) = match built {
            Ok(built) => built,
            Err(reason) => return self.skip(reason),
        };

        let order_id = order.id.clone();
        let side = order.side;
        let amount = order.amount;
        let delay = filter.delay;
        match self.ctx.scheduler.schedule(order, delay, Some(filter)).await {
            ScheduleOutcome::Scheduled { id, delay } => {
                self.filter
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .record_copy(&trade);
                if let Some(position_id) = &exit_of {
                    self.pending_exits.insert(position_id.clone(), order_id.clone());
                }
                self.in_flight
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(order_id.clone(), exit_of);
                self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Copying {} {} of {} from {} ({:.4} in, {:?} delay)",
                    side,
                    trade.target_symbol(),
                    trade.target_token(),
                    trade.wallet_name,
                    amount,
                    delay
                );
                CopyOutcome::Scheduled {
                    order_id,
                    execution_id: id,
                    delay,
                }
            }
            ScheduleOutcome::Dropped { reason } => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                self.skip(reason)
            }
        }
    }

    fn skip(&self, reason: impl Into<String>) -> CopyOutcome {
        let reason = reason.into();
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
        debug!("Copy skipped: {}", reason);
        CopyOutcome::skipped(reason)
    }

    fn active_copies(&self) -> usize {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|exit| exit.is_none())
            .count()
    }

    fn buy_order(
        &self,
        trade: &DetectedTrade,
        filter: &FilterResult,
        config: &CopyConfig,
    ) -> std::result::Result<(Order, Option<String>), String> {
        let active = self.active_copies();
        if active >= config.max_concurrent_copies {
            return Err(format!(
                "{} of {} concurrent copies active",
                active, config.max_concurrent_copies
            ));
        }

        let size_usd = self
            .filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .copy_size_usd(trade, filter.size_multiplier);
        let token = TokenInfo::new(
            trade.target_token(),
            trade.target_symbol(),
            trade.target_decimals(),
        );
        let mut order = Order::new(
            copy_source(trade),
            COPY_LEDGER_ID,
            OrderSide::Buy,
            trade.chain,
            token,
            TokenInfo::usdc(trade.chain),
            size_usd,
        )
        .simulated(config.dry_run)
        .with_slippage(config.max_slippage);
        if trade.amount_out > 0.0 && trade.amount_usd > 0.0 {
            order = order.with_reference_price(trade.amount_usd / trade.amount_out);
        }
        Ok((order, None))
    }

    async fn sell_order(
        &self,
        trade: &DetectedTrade,
        config: &CopyConfig,
    ) -> std::result::Result<(Order, Option<String>), String> {
        let snapshot = self
            .ledger
            .snapshot()
            .await
            .map_err(|e| format!("copy ledger unavailable: {}", e))?;
        let position = snapshot
            .first_open(trade.target_token())
            .filter(|p| p.chain_id == trade.chain.chain_id())
            .ok_or_else(|| format!("no open copy position in {}", trade.target_symbol()))?;
        if self.pending_exits.contains_key(&position.id) {
            return Err(format!("exit of {} already pending", position.id));
        }

        let mut order = position_exit(position, trade.chain, copy_source(trade))
            .simulated(config.dry_run)
            .with_slippage(config.max_slippage);
        if trade.amount_in > 0.0 && trade.amount_usd > 0.0 {
            order = order.with_reference_price(trade.amount_usd / trade.amount_in);
        }
        Ok((order, Some(position.id.clone())))
    }

    /// Sweep open copy positions for stop-loss and take-profit.
    /// Returns how many exits were scheduled.
    pub async fn check_exits(&self) -> usize {
        let snapshot = match self.ledger.snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Copy ledger unavailable for exit sweep: {}", e);
                return 0;
            }
        };
        let config = self.config();

        let mut scheduled = 0;
        for position in &snapshot.open_positions {
            if self.pending_exits.contains_key(&position.id) {
                continue;
            }
            let Some(network) = Network::from_chain_id(position.chain_id) else {
                continue;
            };
            let price = match self.ctx.prices.price_usd(network, &position.token_address).await {
                Ok(Some(price)) => price,
                Ok(None) => continue,
                Err(e) => {
                    debug!("No price for {}: {}", position.token_symbol, e);
                    continue;
                }
            };

            let reason = if position.stop_loss_hit(price) {
                "stop loss"
            } else if position.take_profit_hit(price) {
                "take profit"
            } else {
                continue;
            };

            let source = OrderSource::RiskExit {
                position_id: position.id.clone(),
                reason: reason.to_string(),
            };
            let order = position_exit(position, network, source)
                .simulated(config.dry_run)
                .with_slippage(config.max_slippage)
                .with_reference_price(price);
            let order_id = order.id.clone();
            match self.ctx.scheduler.schedule(order, Duration::ZERO, None).await {
                ScheduleOutcome::Scheduled { .. } => {
                    info!(
                        "Copy position {} in {} hit {} at {:.6}",
                        position.id, position.token_symbol, reason, price
                    );
                    self.pending_exits.insert(position.id.clone(), order_id.clone());
                    self.in_flight
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(order_id, Some(position.id.clone()));
                    self.counters.risk_exits.fetch_add(1, Ordering::Relaxed);
                    scheduled += 1;
                }
                ScheduleOutcome::Dropped { reason } => {
                    warn!("Exit of copy position {} dropped: {}", position.id, reason);
                }
            }
        }
        scheduled
    }

    /// Settle a copy-ledger execution result. Returns false for other ledgers.
    pub fn on_result(&self, result: &ExecutionResult) -> bool {
        if result.ledger_id != COPY_LEDGER_ID {
            return false;
        }
        let exit_of = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&result.order_id)
            .flatten();
        if let Some(position_id) = exit_of {
            self.pending_exits.remove(&position_id);
        }

        if result.success {
            self.counters.completed.fetch_add(1, Ordering::Relaxed);
            info!(
                "Copy {} {} settled: {:.4} -> {:.4}{}",
                result.side,
                result.token_symbol,
                result.amount_in,
                result.amount_out,
                if result.is_dry_run { " [dry-run]" } else { "" }
            );
        } else {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                "Copy {} {} failed: {}",
                result.side,
                result.token_symbol,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }
        true
    }

    /// Drain the detector channel until shutdown, sweeping exits on `monitor_interval`
    pub async fn run(
        self: Arc<Self>,
        mut trades: mpsc::Receiver<DetectedTrade>,
        monitor_interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("Copy trader started");
        let mut monitor = tokio::time::interval(monitor_interval);
        loop {
            tokio::select! {
                maybe_trade = trades.recv() => {
                    match maybe_trade {
                        Some(trade) => {
                            self.handle(trade).await;
                        }
                        None => {
                            warn!("Detector channel closed");
                            break;
                        }
                    }
                }
                _ = monitor.tick() => {
                    let exits = self.check_exits().await;
                    if exits > 0 {
                        debug!("{} copy exits scheduled", exits);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Copy trader shutting down");
                    break;
                }
            }
        }
    }

    pub fn stats(&self) -> CopyStats {
        CopyStats {
            received: self.counters.received.load(Ordering::Relaxed),
            correlated: self.counters.correlated.load(Ordering::Relaxed),
            scheduled: self.counters.scheduled.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            risk_exits: self.counters.risk_exits.load(Ordering::Relaxed),
            active_copies: self.active_copies(),
        }
    }
}

fn copy_source(trade: &DetectedTrade) -> OrderSource {
    OrderSource::CopyTrade {
        source_tx_hash: trade.tx_hash.clone(),
        wallet_address: trade.wallet_address.clone(),
    }
}

/// Sell the whole position back into USDC
fn position_exit(position: &Position, network: Network, source: OrderSource) -> Order {
    let token = TokenInfo::new(
        position.token_address.clone(),
        position.token_symbol.clone(),
        position.token_decimals,
    );
    Order::new(
        source,
        COPY_LEDGER_ID,
        OrderSide::Sell,
        network,
        token,
        TokenInfo::usdc(network),
        position.token_amount,
    )
    .with_position(position.id.clone())
}
