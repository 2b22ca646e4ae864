//! Grid trading
//!
//! Builds N price levels between a lower and upper bound on first evaluation.
//! Levels below the initial price buy, levels above sell. A filled level flips
//! side and re-arms, so the grid cycles for as long as price oscillates.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::core::{BuyDecision, EvalContext, PendingSignal, SellDecision};
use super::params::ParamReader;
use super::types::{SignalFill, SignalKind, StrategyConfig, TradeSignal};
use crate::error::{Error, Result};
use crate::position::Position;

/// Confidence attached to grid signals
const GRID_CONFIDENCE: f64 = 0.9;

/// Default half-width of an auto-sized grid
const AUTO_RANGE_PCT: f64 = 0.2;

/// Level spacing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LevelSpacing {
    /// Equal price steps
    Arithmetic,
    /// Equal percentage steps
    Geometric,
}

impl std::str::FromStr for LevelSpacing {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "arithmetic" | "linear" => Ok(LevelSpacing::Arithmetic),
            "geometric" => Ok(LevelSpacing::Geometric),
            other => Err(Error::ConfigInvalid(format!("unknown level spacing '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GridSide {
    Buy,
    Sell,
}

impl GridSide {
    fn flipped(self) -> Self {
        match self {
            GridSide::Buy => GridSide::Sell,
            GridSide::Sell => GridSide::Buy,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridParams {
    /// 0 means "derive from first price"
    pub lower_price: f64,
    pub upper_price: f64,
    pub num_levels: u32,
    pub amount_per_grid: f64,
    pub level_spacing: LevelSpacing,
}

impl GridParams {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let p = ParamReader::new(&config.strategy_id, &config.params);
        let num_levels = p.u32_or(&["num_levels", "num_grids"], 10)?;
        if num_levels < 2 {
            return Err(Error::ConfigInvalid(format!(
                "{}: num_levels must be at least 2",
                config.strategy_id
            )));
        }

        let amount_per_grid = match p.opt_f64(&["amount_per_grid"])? {
            Some(amount) if amount > 0.0 => amount,
            Some(_) => {
                return Err(Error::ConfigInvalid(format!(
                    "{}: amount_per_grid must be positive",
                    config.strategy_id
                )))
            }
            None => config.total_budget / (num_levels / 2) as f64,
        };

        let lower_price = p.f64_or(&["lower_price"], 0.0)?;
        let upper_price = p.f64_or(&["upper_price"], 0.0)?;
        if lower_price < 0.0 || upper_price < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: grid bounds must not be negative",
                config.strategy_id
            )));
        }
        if lower_price > 0.0 && upper_price > 0.0 && lower_price >= upper_price {
            return Err(Error::ConfigInvalid(format!(
                "{}: lower_price {} must be less than upper_price {}",
                config.strategy_id, lower_price, upper_price
            )));
        }

        let level_spacing = p
            .str_or(&["level_spacing", "grid_type"], "arithmetic")?
            .parse::<LevelSpacing>()?;

        Ok(Self {
            lower_price,
            upper_price,
            num_levels,
            amount_per_grid,
            level_spacing,
        })
    }
}

/// Price levels between `lower` and `upper` inclusive
pub fn build_levels(lower: f64, upper: f64, num_levels: u32, spacing: LevelSpacing) -> Vec<f64> {
    let n = num_levels.max(2);
    let steps = (n - 1) as f64;
    match spacing {
        LevelSpacing::Arithmetic => {
            let step = (upper - lower) / steps;
            (0..n).map(|i| lower + step * i as f64).collect()
        }
        LevelSpacing::Geometric => {
            let ratio = (upper / lower).powf(1.0 / steps);
            (0..n).map(|i| lower * ratio.powi(i as i32)).collect()
        }
    }
}

/// One level of the grid
#[derive(Debug, Clone, Serialize)]
pub struct GridLevel {
    pub index: usize,
    pub price: f64,
    pub side: GridSide,
    pub amount: f64,
    pub fills: u32,
    pub last_filled_at: Option<DateTime<Utc>>,
    pub last_tx_hash: Option<String>,
    #[serde(skip)]
    pending: Vec<PendingSignal>,
}

impl GridLevel {
    fn is_waiting(&self, now: DateTime<Utc>) -> bool {
        self.pending.iter().any(|p| p.is_live_at(now))
    }
}

/// Grid strategy state
#[derive(Debug, Clone)]
pub struct GridStrategy {
    params: GridParams,
    levels: Vec<GridLevel>,
    initial_price: Option<f64>,
    lower: f64,
    upper: f64,
}

impl GridStrategy {
    pub fn new(params: GridParams) -> Self {
        Self {
            lower: params.lower_price,
            upper: params.upper_price,
            params,
            levels: Vec::new(),
            initial_price: None,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initial_price.is_some()
    }

    pub fn levels(&self) -> &[GridLevel] {
        &self.levels
    }

    pub fn bounds(&self) -> (f64, f64) {
        (self.lower, self.upper)
    }

    /// Build the level table around `current_price`. No-op once initialized.
    pub fn initialize(&mut self, current_price: f64, strategy_id: &str) -> Result<()> {
        if self.is_initialized() {
            return Ok(());
        }
        if current_price <= 0.0 {
            return Err(Error::InvalidState(format!(
                "cannot build grid around price {}",
                current_price
            )));
        }

        if self.lower == 0.0 {
            self.lower = current_price * (1.0 - AUTO_RANGE_PCT);
        }
        if self.upper == 0.0 {
            self.upper = current_price * (1.0 + AUTO_RANGE_PCT);
        }
        if self.lower >= self.upper {
            return Err(Error::ConfigInvalid(format!(
                "{}: lower_price {} must be less than upper_price {}",
                strategy_id, self.lower, self.upper
            )));
        }
        if current_price <= self.lower || current_price >= self.upper {
            warn!(
                "[{}] Current price {} outside grid range [{}, {}]",
                strategy_id, current_price, self.lower, self.upper
            );
        }

        self.levels = build_levels(
            self.lower,
            self.upper,
            self.params.num_levels,
            self.params.level_spacing,
        )
        .into_iter()
        .enumerate()
        .map(|(index, price)| GridLevel {
            index,
            price,
            side: if price < current_price {
                GridSide::Buy
            } else {
                GridSide::Sell
            },
            amount: self.params.amount_per_grid,
            fills: 0,
            last_filled_at: None,
            last_tx_hash: None,
            pending: Vec::new(),
        })
        .collect();
        self.initial_price = Some(current_price);

        info!(
            "[{}] Grid initialized: {} levels from {} to {}",
            strategy_id,
            self.levels.len(),
            self.lower,
            self.upper
        );
        Ok(())
    }

    pub fn evaluate(&mut self, ctx: &EvalContext<'_>) -> Result<Vec<TradeSignal>> {
        self.initialize(ctx.price(), &ctx.config.strategy_id)?;

        let price = ctx.price();
        let open: Vec<&Position> = ctx.open_positions().collect();
        let mut signals = Vec::new();

        for i in 0..self.levels.len() {
            if self.levels[i].is_waiting(ctx.now) {
                continue;
            }
            let level = &self.levels[i];

            let fired = match level.side {
                GridSide::Buy if price <= level.price => {
                    let decision = self.should_buy(ctx, level);
                    if decision.buy {
                        vec![self.level_signal(ctx, level, SignalKind::Buy, decision.amount, decision.reason)]
                    } else {
                        Vec::new()
                    }
                }
                GridSide::Sell if price >= level.price => open
                    .iter()
                    .filter_map(|position| {
                        let decision = self.should_sell_at(level, position);
                        decision.sell.then(|| {
                            self.level_signal(ctx, level, SignalKind::Sell, decision.amount, decision.reason)
                                .with_position(position.id.clone())
                        })
                    })
                    .collect(),
                _ => Vec::new(),
            };

            if !fired.is_empty() {
                self.levels[i].pending = fired.iter().map(PendingSignal::from_signal).collect();
                signals.extend(fired);
            }
        }

        if signals.is_empty() {
            signals.push(ctx.hold(format!("Price {} - no grid levels triggered", price)));
        }
        Ok(signals)
    }

    pub fn should_buy(&self, ctx: &EvalContext<'_>, level: &GridLevel) -> BuyDecision {
        if level.side != GridSide::Buy {
            return BuyDecision::hold(format!("Level {} is not a buy level", level.index));
        }
        match ctx.validate_trade_size(level.amount) {
            Ok(()) => BuyDecision::buy(level.amount, format!("Grid buy at level {:.6}", level.price)),
            Err(msg) => BuyDecision::hold(msg),
        }
    }

    /// Sell a slice of `position` at a sell level
    pub fn should_sell_at(&self, level: &GridLevel, position: &Position) -> SellDecision {
        if level.side != GridSide::Sell {
            return SellDecision::hold(format!("Level {} is not a sell level", level.index));
        }
        let sell_levels = self
            .levels
            .iter()
            .filter(|l| l.side == GridSide::Sell)
            .count()
            .max(1);
        SellDecision::sell(
            position.token_amount / sell_levels as f64,
            format!("Grid sell at level {:.6}", level.price),
        )
    }

    /// Stop-loss/take-profit only; level-driven sells go through `should_sell_at`
    pub fn should_sell(&self, ctx: &EvalContext<'_>, position: &Position) -> SellDecision {
        let price = ctx.price();
        if position.stop_loss_hit(price) {
            return SellDecision::sell(position.token_amount, "Stop loss triggered");
        }
        if position.take_profit_hit(price) {
            return SellDecision::sell(position.token_amount, "Take profit triggered");
        }
        SellDecision::hold("No sell condition met")
    }

    /// Flip a level after a fill. Returns false when the fill was already
    /// applied or does not belong to the level's outstanding signals.
    pub fn mark_level_filled(&mut self, index: usize, signal_id: &str, tx_hash: Option<String>) -> bool {
        let Some(level) = self.levels.get_mut(index) else {
            return false;
        };
        if !level.pending.iter().any(|p| p.id == signal_id) {
            return false;
        }

        level.pending.clear();
        level.side = level.side.flipped();
        level.fills += 1;
        level.last_filled_at = Some(Utc::now());
        level.last_tx_hash = tx_hash;
        info!(
            "Grid level {} @ {:.6} filled, flipped to {:?}",
            index, level.price, level.side
        );
        true
    }

    pub fn on_fill(&mut self, fill: &SignalFill) {
        let Some(index) = fill.grid_level else {
            return;
        };
        if fill.success {
            self.mark_level_filled(index, &fill.signal_id, fill.tx_hash.clone());
        } else if let Some(level) = self.levels.get_mut(index) {
            level.pending.retain(|p| p.id != fill.signal_id);
        }
    }

    pub fn unfilled_buy_levels(&self) -> impl Iterator<Item = &GridLevel> {
        self.levels.iter().filter(|l| l.side == GridSide::Buy)
    }

    pub fn unfilled_sell_levels(&self) -> impl Iterator<Item = &GridLevel> {
        self.levels.iter().filter(|l| l.side == GridSide::Sell)
    }

    /// Expected profit of one buy→sell cycle, in percent
    pub fn grid_profit_pct(&self) -> f64 {
        let (buy_sum, buy_n) = self
            .unfilled_buy_levels()
            .fold((0.0, 0usize), |(s, n), l| (s + l.price, n + 1));
        let (sell_sum, sell_n) = self
            .unfilled_sell_levels()
            .fold((0.0, 0usize), |(s, n), l| (s + l.price, n + 1));
        if buy_n == 0 || sell_n == 0 {
            return 0.0;
        }
        let avg_buy = buy_sum / buy_n as f64;
        let avg_sell = sell_sum / sell_n as f64;
        (avg_sell - avg_buy) / avg_buy * 100.0
    }

    fn level_signal(
        &self,
        ctx: &EvalContext<'_>,
        level: &GridLevel,
        kind: SignalKind,
        amount: f64,
        reason: String,
    ) -> TradeSignal {
        ctx.signal(kind, amount, GRID_CONFIDENCE, reason)
            .with_price_target(level.price)
            .with_grid_level(level.index)
            .with_indicator("grid_price", level.price)
    }
}
