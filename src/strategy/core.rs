//! Strategy core
//!
//! Owns one strategy's lifecycle and turns market ticks into signals. The
//! kind-specific logic lives in `dca`, `grid` and `momentum`; this module adds
//! the stop-loss/take-profit sweep and the drawdown guard every kind shares.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, error, info, warn};

use super::dca::{DcaParams, DcaStrategy};
use super::grid::{GridParams, GridSide, GridStrategy};
use super::momentum::{MomentumParams, MomentumStrategy};
use super::types::{
    MarketData, SignalFill, SignalKind, StrategyConfig, StrategyStatus, TradeSignal,
};
use crate::error::{Error, Result};
use crate::position::{LedgerSnapshot, Position};

/// Signals kept in a strategy's history
pub const SIGNAL_HISTORY_LIMIT: usize = 100;

/// How long past its expiry an unanswered signal still blocks a retry
const PENDING_GRACE_SECS: i64 = 600;

/// Read-only view handed to a strategy for one evaluation
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub config: &'a StrategyConfig,
    pub market: &'a MarketData,
    pub ledger: &'a LedgerSnapshot,
    pub now: DateTime<Utc>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        config: &'a StrategyConfig,
        market: &'a MarketData,
        ledger: &'a LedgerSnapshot,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            config,
            market,
            ledger,
            now,
        }
    }

    pub fn price(&self) -> f64 {
        self.market.current_price
    }

    pub fn available_capital(&self) -> f64 {
        self.ledger.available_capital
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &'a Position> {
        let config: &'a StrategyConfig = self.config;
        let ledger: &'a LedgerSnapshot = self.ledger;
        let token = config.token_address.as_str();
        ledger
            .open_positions
            .iter()
            .filter(move |p| p.is_open() && p.token_address.eq_ignore_ascii_case(token))
    }

    pub fn has_open_position(&self) -> bool {
        self.open_positions().next().is_some()
    }

    /// `min_trade_size <= amount <= min(max_position_size, available)`
    pub fn validate_trade_size(&self, amount: f64) -> std::result::Result<(), String> {
        if amount < self.config.min_trade_size {
            return Err(format!(
                "Amount {:.4} below minimum {}",
                amount, self.config.min_trade_size
            ));
        }
        if amount > self.config.max_position_size {
            return Err(format!(
                "Amount {:.4} exceeds max position {}",
                amount, self.config.max_position_size
            ));
        }
        if amount > self.available_capital() {
            return Err(format!(
                "Amount {:.4} exceeds available capital {:.4}",
                amount,
                self.available_capital()
            ));
        }
        Ok(())
    }

    pub fn signal(
        &self,
        kind: SignalKind,
        amount: f64,
        confidence: f64,
        reason: impl Into<String>,
    ) -> TradeSignal {
        let mut signal = TradeSignal::new(self.config, kind, amount, confidence, reason);
        let validity = signal.valid_until - signal.generated_at;
        signal.generated_at = self.now;
        signal.valid_until = self.now + validity;
        signal.with_indicator("price", self.price())
    }

    pub fn hold(&self, reason: impl Into<String>) -> TradeSignal {
        self.signal(SignalKind::Hold, 0.0, 0.5, reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuyDecision {
    pub buy: bool,
    /// Quote amount
    pub amount: f64,
    pub reason: String,
}

impl BuyDecision {
    pub fn buy(amount: f64, reason: impl Into<String>) -> Self {
        Self {
            buy: true,
            amount,
            reason: reason.into(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            buy: false,
            amount: 0.0,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SellDecision {
    pub sell: bool,
    /// Token amount
    pub amount: f64,
    pub reason: String,
}

impl SellDecision {
    pub fn sell(tokens: f64, reason: impl Into<String>) -> Self {
        Self {
            sell: true,
            amount: tokens,
            reason: reason.into(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Self {
            sell: false,
            amount: 0.0,
            reason: reason.into(),
        }
    }
}

/// A signal that left the strategy and has not been answered by a fill yet
#[derive(Debug, Clone, PartialEq)]
pub struct PendingSignal {
    pub id: String,
    pub valid_until: DateTime<Utc>,
}

impl PendingSignal {
    pub fn from_signal(signal: &TradeSignal) -> Self {
        Self {
            id: signal.id.clone(),
            valid_until: signal.valid_until,
        }
    }

    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        now < self.valid_until + Duration::seconds(PENDING_GRACE_SECS)
    }

    pub fn is_live(pending: &Option<PendingSignal>, now: DateTime<Utc>) -> bool {
        pending.as_ref().is_some_and(|p| p.is_live_at(now))
    }

    pub fn matches(pending: &Option<PendingSignal>, signal_id: &str) -> bool {
        pending.as_ref().is_some_and(|p| p.id == signal_id)
    }
}

/// Closed set of strategy kinds, each carrying its own parameters and state
#[derive(Debug, Clone)]
pub enum StrategyKind {
    Dca(DcaStrategy),
    Grid(GridStrategy),
    Momentum(MomentumStrategy),
}

impl StrategyKind {
    /// Parse `strategy_type` and the param map
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        match config.strategy_type.trim().to_lowercase().as_str() {
            "dca" => Ok(StrategyKind::Dca(DcaStrategy::new(DcaParams::from_config(config)?))),
            "grid" => Ok(StrategyKind::Grid(GridStrategy::new(GridParams::from_config(config)?))),
            "momentum" => Ok(StrategyKind::Momentum(MomentumStrategy::new(
                MomentumParams::from_config(config)?,
            ))),
            other => Err(Error::ConfigInvalid(format!(
                "{}: unknown strategy type '{}'",
                config.strategy_id, other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            StrategyKind::Dca(_) => "dca",
            StrategyKind::Grid(_) => "grid",
            StrategyKind::Momentum(_) => "momentum",
        }
    }

    pub fn evaluate(&mut self, ctx: &EvalContext<'_>) -> Result<Vec<TradeSignal>> {
        match self {
            StrategyKind::Dca(s) => Ok(s.evaluate(ctx)),
            StrategyKind::Grid(s) => s.evaluate(ctx),
            StrategyKind::Momentum(s) => Ok(s.evaluate(ctx)),
        }
    }

    pub fn should_buy(&mut self, ctx: &EvalContext<'_>) -> BuyDecision {
        match self {
            StrategyKind::Dca(s) => s.should_buy(ctx),
            StrategyKind::Grid(s) => {
                let price = ctx.price();
                match s
                    .levels()
                    .iter()
                    .find(|l| l.side == GridSide::Buy && price <= l.price)
                {
                    Some(level) => s.should_buy(ctx, level),
                    None => BuyDecision::hold(format!("Price {} - no buy level triggered", price)),
                }
            }
            StrategyKind::Momentum(s) => s.should_buy(ctx),
        }
    }

    pub fn should_sell(&self, ctx: &EvalContext<'_>, position: &Position) -> SellDecision {
        match self {
            StrategyKind::Dca(s) => s.should_sell(ctx, position),
            StrategyKind::Grid(s) => s.should_sell(ctx, position),
            StrategyKind::Momentum(s) => s.should_sell(ctx, position),
        }
    }

    pub fn on_fill(&mut self, fill: &SignalFill) {
        match self {
            StrategyKind::Dca(s) => s.on_fill(fill),
            StrategyKind::Grid(s) => s.on_fill(fill),
            StrategyKind::Momentum(s) => s.on_fill(fill),
        }
    }
}

/// Running counters for one strategy
#[derive(Debug, Clone, Default, Serialize)]
pub struct StrategyStats {
    pub total_signals: u64,
    pub executed_trades: u64,
    pub successful_trades: u64,
    pub error_count: u64,
    pub last_error: Option<String>,
    pub last_run: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Serializable view of a strategy
#[derive(Debug, Clone, Serialize)]
pub struct StrategyState {
    pub strategy_id: String,
    pub strategy_type: &'static str,
    pub token_address: String,
    pub status: StrategyStatus,
    pub stats: StrategyStats,
    pub total_budget: f64,
}

/// One registered strategy
#[derive(Debug)]
pub struct Strategy {
    config: StrategyConfig,
    kind: StrategyKind,
    status: StrategyStatus,
    stats: StrategyStats,
    history: VecDeque<TradeSignal>,
    /// Exit signals in flight, keyed by position
    pending_exits: HashMap<String, PendingSignal>,
}

impl Strategy {
    /// Validates the config and parses the kind. Starts paused.
    pub fn from_config(config: StrategyConfig) -> Result<Self> {
        config.validate()?;
        let kind = StrategyKind::from_config(&config)?;
        Ok(Self {
            config,
            kind,
            status: StrategyStatus::Paused,
            stats: StrategyStats::default(),
            history: VecDeque::with_capacity(SIGNAL_HISTORY_LIMIT),
            pending_exits: HashMap::new(),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.strategy_id
    }

    pub fn config(&self) -> &StrategyConfig {
        &self.config
    }

    pub fn kind(&self) -> &StrategyKind {
        &self.kind
    }

    pub fn status(&self) -> StrategyStatus {
        self.status
    }

    pub fn is_active(&self) -> bool {
        self.status == StrategyStatus::Active
    }

    pub fn stats(&self) -> &StrategyStats {
        &self.stats
    }

    pub fn history(&self) -> impl Iterator<Item = &TradeSignal> {
        self.history.iter()
    }

    pub fn state(&self) -> StrategyState {
        StrategyState {
            strategy_id: self.config.strategy_id.clone(),
            strategy_type: self.kind.name(),
            token_address: self.config.token_address.clone(),
            status: self.status,
            stats: self.stats.clone(),
            total_budget: self.config.total_budget,
        }
    }

    pub fn start(&mut self) {
        self.status = StrategyStatus::Active;
        self.stats.started_at = Some(Utc::now());
        info!("Strategy {} started", self.config.strategy_id);
    }

    pub fn pause(&mut self) {
        self.status = StrategyStatus::Paused;
        info!("Strategy {} paused", self.config.strategy_id);
    }

    pub fn stop(&mut self) {
        self.status = StrategyStatus::Stopped;
        info!("Strategy {} stopped", self.config.strategy_id);
    }

    pub fn set_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!("Strategy {} error: {}", self.config.strategy_id, message);
        self.status = StrategyStatus::Error;
        self.stats.error_count += 1;
        self.stats.last_error = Some(message);
    }

    /// Run one tick. Returns nothing unless the strategy is active; a kind
    /// error moves the strategy to `Error` and suppresses the tick's signals.
    pub fn evaluate(
        &mut self,
        market: &MarketData,
        ledger: &LedgerSnapshot,
        now: DateTime<Utc>,
    ) -> Vec<TradeSignal> {
        if !self.is_active() {
            debug!("Strategy {} not active, skipping", self.config.strategy_id);
            return Vec::new();
        }
        self.stats.last_run = Some(now);

        let ctx = EvalContext::new(&self.config, market, ledger, now);
        let signals = match self.kind.evaluate(&ctx) {
            Ok(signals) => signals,
            Err(e) => {
                self.set_error(e.to_string());
                return Vec::new();
            }
        };
        let signals = self.sweep_exits(&ctx, signals);

        let budget = self.config.total_budget;
        let drawdown_pct = if budget > 0.0 {
            ledger.total_pnl(ctx.price()) / budget * 100.0
        } else {
            0.0
        };

        if drawdown_pct < -self.config.max_drawdown_pct {
            warn!(
                "Strategy {} drawdown {:.2}% beyond limit {}%",
                self.config.strategy_id, drawdown_pct, self.config.max_drawdown_pct
            );
            self.pause();
            self.set_error("Max drawdown reached");
        }

        for signal in &signals {
            if signal.is_exit() && signal.grid_level.is_none() {
                if let Some(position_id) = &signal.position_id {
                    self.pending_exits
                        .insert(position_id.clone(), PendingSignal::from_signal(signal));
                }
            }
        }
        self.record(&signals);
        signals
    }

    /// Drop exits already in flight and append forced stop-loss/take-profit sells
    fn sweep_exits(&self, ctx: &EvalContext<'_>, signals: Vec<TradeSignal>) -> Vec<TradeSignal> {
        let exit_in_flight = |position_id: &str| {
            self.pending_exits
                .get(position_id)
                .is_some_and(|p| p.is_live_at(ctx.now))
        };

        let mut kept: Vec<TradeSignal> = signals
            .into_iter()
            .filter(|s| {
                !(s.is_exit()
                    && s.grid_level.is_none()
                    && s.position_id.as_deref().is_some_and(|id| exit_in_flight(id)))
            })
            .collect();

        let price = ctx.price();
        for position in ctx.open_positions() {
            if exit_in_flight(&position.id) {
                continue;
            }
            let already_exiting = kept.iter().any(|s| {
                s.is_exit() && s.grid_level.is_none() && s.position_id.as_deref() == Some(position.id.as_str())
            });
            if already_exiting {
                continue;
            }

            let reason = if position.stop_loss_hit(price) {
                "Stop loss triggered"
            } else if position.take_profit_hit(price) {
                "Take profit triggered"
            } else {
                continue;
            };
            info!(
                "[{}] {} for position {} @ {}",
                ctx.config.strategy_id, reason, position.id, price
            );
            kept.push(
                ctx.signal(SignalKind::Sell, position.token_amount, 1.0, reason)
                    .with_position(position.id.clone()),
            );
        }

        if kept.is_empty() {
            kept.push(ctx.hold("Awaiting exit fill"));
        }
        kept
    }

    fn record(&mut self, signals: &[TradeSignal]) {
        for signal in signals {
            self.stats.total_signals += 1;
            if self.history.len() == SIGNAL_HISTORY_LIMIT {
                self.history.pop_front();
            }
            self.history.push_back(signal.clone());
        }
    }

    pub fn should_buy(&mut self, market: &MarketData, ledger: &LedgerSnapshot) -> BuyDecision {
        let ctx = EvalContext::new(&self.config, market, ledger, Utc::now());
        self.kind.should_buy(&ctx)
    }

    pub fn should_sell(
        &self,
        market: &MarketData,
        ledger: &LedgerSnapshot,
        position: &Position,
    ) -> SellDecision {
        let ctx = EvalContext::new(&self.config, market, ledger, Utc::now());
        self.kind.should_sell(&ctx, position)
    }

    /// Feed an execution outcome back into the strategy
    pub fn on_fill(&mut self, fill: &SignalFill) {
        self.stats.executed_trades += 1;
        if fill.success {
            self.stats.successful_trades += 1;
        }
        self.pending_exits.retain(|_, p| p.id != fill.signal_id);
        if let Some(signal) = self.history.iter_mut().find(|s| s.id == fill.signal_id) {
            if fill.success {
                signal.mark_executed(fill.tx_hash.clone());
            }
        }
        self.kind.on_fill(fill);
    }

    /// Replace the config in place; the kind is rebuilt when its params change
    pub fn update_config(&mut self, config: StrategyConfig) -> Result<()> {
        config.validate()?;
        if config.strategy_type != self.config.strategy_type || config.params != self.config.params {
            self.kind = StrategyKind::from_config(&config)?;
        }
        self.config = config;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::PositionStatus;

    fn position(id: &str, tokens: f64, sl: Option<f64>, tp: Option<f64>) -> Position {
        Position {
            id: id.into(),
            strategy_id: "s1".into(),
            token_address: "0xtoken".into(),
            token_symbol: "TKN".into(),
            token_decimals: 18,
            chain_id: 1,
            entry_amount: tokens * 10.0,
            token_amount: tokens,
            entry_price: 10.0,
            cost_basis: tokens * 10.0,
            num_entries: 1,
            stop_loss_price: sl,
            take_profit_price: tp,
            status: PositionStatus::Open,
            opened_at: Utc::now(),
            updated_at: Utc::now(),
            closed_at: None,
            exit_price: None,
            exit_amount: None,
            realized_pnl: None,
            realized_pnl_pct: None,
            entry_tx_hash: None,
            exit_tx_hash: None,
        }
    }

    fn dca_strategy() -> Strategy {
        let config = StrategyConfig::new("s1", "dca", "0xtoken").with_param("max_buys", 1);
        Strategy::from_config(config).unwrap()
    }

    #[test]
    fn test_lifecycle() {
        let mut s = dca_strategy();
        assert_eq!(s.status(), StrategyStatus::Paused);
        s.start();
        assert!(s.is_active());
        s.set_error("boom");
        assert_eq!(s.status(), StrategyStatus::Error);
        assert_eq!(s.stats().error_count, 1);
        assert_eq!(s.stats().last_error.as_deref(), Some("boom"));
        s.start();
        s.stop();
        assert_eq!(s.status(), StrategyStatus::Stopped);
    }

    #[test]
    fn test_unknown_kind_rejected() {
        let config = StrategyConfig::new("s1", "scalper", "0xtoken");
        assert!(matches!(Strategy::from_config(config), Err(Error::ConfigInvalid(_))));
    }

    #[test]
    fn test_inactive_strategy_emits_nothing() {
        let mut s = dca_strategy();
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        assert!(s.evaluate(&market, &LedgerSnapshot::default(), Utc::now()).is_empty());
    }

    #[test]
    fn test_forced_stop_loss_once_per_position() {
        let mut s = dca_strategy();
        s.start();
        let ledger = LedgerSnapshot {
            open_positions: vec![position("p1", 5.0, Some(9.0), None)],
            available_capital: 900.0,
            allocated_capital: 50.0,
            ..Default::default()
        };
        let market = MarketData::at_price("0xtoken", 1, 8.5);
        let signals = s.evaluate(&market, &ledger, Utc::now());

        let exits: Vec<&TradeSignal> = signals.iter().filter(|s| s.is_exit()).collect();
        assert_eq!(exits.len(), 1);
        assert_eq!(exits[0].reason, "Stop loss triggered");
        assert_eq!(exits[0].confidence, 1.0);
        assert_eq!(exits[0].amount, 5.0);

        // Not re-emitted while the first exit is unanswered
        let again = s.evaluate(&market, &ledger, Utc::now());
        assert!(again.iter().all(|s| !s.is_exit()));

        let fill = SignalFill {
            signal_id: exits[0].id.clone(),
            strategy_id: "s1".into(),
            kind: SignalKind::Sell,
            success: false,
            quote_amount: 0.0,
            token_amount: 0.0,
            executed_price: 0.0,
            tx_hash: None,
            grid_level: None,
            error: Some("reverted".into()),
        };
        s.on_fill(&fill);
        let retry = s.evaluate(&market, &ledger, Utc::now());
        assert!(retry.iter().any(|s| s.reason == "Stop loss triggered"));
    }

    #[test]
    fn test_take_profit_forced_exit() {
        let mut s = dca_strategy();
        s.start();
        let ledger = LedgerSnapshot {
            open_positions: vec![position("p1", 5.0, None, Some(15.0))],
            available_capital: 900.0,
            ..Default::default()
        };
        let market = MarketData::at_price("0xtoken", 1, 16.0);
        let signals = s.evaluate(&market, &ledger, Utc::now());
        assert!(signals.iter().any(|s| s.reason == "Take profit triggered"));
    }

    #[test]
    fn test_drawdown_pauses_with_error() {
        let mut s = dca_strategy();
        s.start();
        let ledger = LedgerSnapshot {
            realized_pnl: -150.0,
            open_positions: vec![position("p1", 10.0, None, None)],
            available_capital: 800.0,
            ..Default::default()
        };
        // Unrealized: 10 tokens bought at 10, now 4 => -60. Total -210 on 1000
        let market = MarketData::at_price("0xtoken", 1, 4.0);
        s.evaluate(&market, &ledger, Utc::now());
        assert_eq!(s.status(), StrategyStatus::Error);
        assert_eq!(s.stats().last_error.as_deref(), Some("Max drawdown reached"));
    }

    #[test]
    fn test_kind_error_moves_to_error_state() {
        let config = StrategyConfig::new("g1", "grid", "0xtoken");
        let mut s = Strategy::from_config(config).unwrap();
        s.start();
        let market = MarketData::at_price("0xtoken", 1, 0.0);
        let signals = s.evaluate(&market, &LedgerSnapshot::default(), Utc::now());
        assert!(signals.is_empty());
        assert_eq!(s.status(), StrategyStatus::Error);
    }

    #[test]
    fn test_history_is_bounded() {
        let config = StrategyConfig::new("s1", "dca", "0xtoken").with_param("max_buys", 0);
        let mut s = Strategy::from_config(config).unwrap();
        s.start();
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        let ledger = LedgerSnapshot {
            available_capital: 1000.0,
            ..Default::default()
        };
        for _ in 0..(SIGNAL_HISTORY_LIMIT + 20) {
            s.evaluate(&market, &ledger, Utc::now());
        }
        assert_eq!(s.history().count(), SIGNAL_HISTORY_LIMIT);
        assert_eq!(s.stats().total_signals, (SIGNAL_HISTORY_LIMIT + 20) as u64);
    }

    #[test]
    fn test_validate_trade_size() {
        let config = StrategyConfig::new("s1", "dca", "0xtoken");
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        let ledger = LedgerSnapshot {
            available_capital: 60.0,
            ..Default::default()
        };
        let ctx = EvalContext::new(&config, &market, &ledger, Utc::now());
        assert!(ctx.validate_trade_size(5.0).unwrap_err().contains("below minimum"));
        assert!(ctx.validate_trade_size(150.0).unwrap_err().contains("max position"));
        assert!(ctx.validate_trade_size(80.0).unwrap_err().contains("available capital"));
        assert!(ctx.validate_trade_size(50.0).is_ok());
    }

    #[test]
    fn test_pending_signal_expiry() {
        let config = StrategyConfig::new("s1", "dca", "0xtoken");
        let signal = TradeSignal::new(&config, SignalKind::Buy, 10.0, 0.8, "x");
        let pending = Some(PendingSignal::from_signal(&signal));
        assert!(PendingSignal::is_live(&pending, signal.generated_at));
        assert!(!PendingSignal::is_live(
            &pending,
            signal.valid_until + Duration::seconds(PENDING_GRACE_SECS)
        ));
        assert!(PendingSignal::matches(&pending, &signal.id));
        assert!(!PendingSignal::matches(&None, &signal.id));
    }
}
