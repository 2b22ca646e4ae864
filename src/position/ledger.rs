//! Position ledger
//!
//! Single source of truth for one strategy's capital and positions.
//! Computes cost basis, DCA-weighted entry price and realized/unrealized P&L.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Relative gap under which a sell counts as the whole holding
const FULL_EXIT_TOLERANCE: f64 = 1e-9;

/// Position lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PositionStatus {
    Open,
    Closed,
    Pending,
    Cancelled,
}

/// A position in a single token owned by one strategy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub id: String,
    pub strategy_id: String,
    pub token_address: String,
    pub token_symbol: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    pub chain_id: u64,
    /// Quote amount spent on the first fill
    pub entry_amount: f64,
    /// Tokens held
    pub token_amount: f64,
    /// Weighted-average entry price (quote per token)
    pub entry_price: f64,
    /// Total quote capital invested
    pub cost_basis: f64,
    pub num_entries: u32,
    pub stop_loss_price: Option<f64>,
    pub take_profit_price: Option<f64>,
    pub status: PositionStatus,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
    pub exit_price: Option<f64>,
    pub exit_amount: Option<f64>,
    pub realized_pnl: Option<f64>,
    pub realized_pnl_pct: Option<f64>,
    pub entry_tx_hash: Option<String>,
    pub exit_tx_hash: Option<String>,
}

fn default_token_decimals() -> u8 {
    18
}

impl Position {
    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// Unrealized P&L at `current_price` as (value, percent). Pure.
    pub fn calculate_pnl(&self, current_price: f64) -> (f64, f64) {
        let current_value = self.token_amount * current_price;
        let pnl = current_value - self.cost_basis;
        let pnl_pct = if self.cost_basis > 0.0 {
            pnl / self.cost_basis * 100.0
        } else {
            0.0
        };
        (pnl, pnl_pct)
    }

    pub fn stop_loss_hit(&self, price: f64) -> bool {
        matches!(self.stop_loss_price, Some(sl) if price <= sl)
    }

    pub fn take_profit_hit(&self, price: f64) -> bool {
        matches!(self.take_profit_price, Some(tp) if price >= tp)
    }
}

/// A buy fill used to open a position
#[derive(Debug, Clone)]
pub struct EntryFill {
    pub token_address: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    pub chain_id: u64,
    pub entry_amount: f64,
    pub token_amount: f64,
    pub entry_price: f64,
    pub tx_hash: Option<String>,
}

/// Running trade statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeStats {
    pub total_trades: u32,
    pub winning_trades: u32,
    pub losing_trades: u32,
    pub total_profit: f64,
    pub total_loss: f64,
    pub net_pnl: f64,
}

impl TradeStats {
    pub fn record_trade(&mut self, pnl: f64) {
        self.total_trades += 1;
        if pnl > 0.0 {
            self.winning_trades += 1;
            self.total_profit += pnl;
        } else if pnl < 0.0 {
            self.losing_trades += 1;
            self.total_loss += pnl.abs();
        }
        self.net_pnl = self.total_profit - self.total_loss;
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            return 0.0;
        }
        (self.winning_trades as f64 / self.total_trades as f64) * 100.0
    }
}

/// Risk settings the ledger derives exit prices from
#[derive(Debug, Clone, Copy, Default)]
pub struct RiskLevels {
    pub stop_loss_pct: Option<f64>,
    pub take_profit_pct: Option<f64>,
}

/// Read-only view handed to strategy evaluation
#[derive(Debug, Clone, Default)]
pub struct LedgerSnapshot {
    pub open_positions: Vec<Position>,
    pub allocated_capital: f64,
    pub available_capital: f64,
    pub realized_pnl: f64,
    pub stats: TradeStats,
}

impl LedgerSnapshot {
    /// Realized plus unrealized P&L at `current_price`
    pub fn total_pnl(&self, current_price: f64) -> f64 {
        let unrealized: f64 = self
            .open_positions
            .iter()
            .map(|p| p.calculate_pnl(current_price).0)
            .sum();
        self.realized_pnl + unrealized
    }

    pub fn first_open(&self, token_address: &str) -> Option<&Position> {
        self.open_positions
            .iter()
            .find(|p| p.token_address.eq_ignore_ascii_case(token_address))
    }
}

/// Position ledger for one strategy
#[derive(Debug, Clone)]
pub struct PositionLedger {
    strategy_id: String,
    total_budget: f64,
    risk: RiskLevels,
    positions: Vec<Position>,
    allocated_capital: f64,
    realized_pnl: f64,
    stats: TradeStats,
}

impl PositionLedger {
    pub fn new(strategy_id: impl Into<String>, total_budget: f64, risk: RiskLevels) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            total_budget,
            risk,
            positions: Vec::new(),
            allocated_capital: 0.0,
            realized_pnl: 0.0,
            stats: TradeStats::default(),
        }
    }

    /// Rebuild a ledger from persisted positions
    pub fn restore(
        strategy_id: impl Into<String>,
        total_budget: f64,
        risk: RiskLevels,
        positions: Vec<Position>,
    ) -> Self {
        let mut ledger = Self::new(strategy_id, total_budget, risk);
        for position in positions {
            match position.status {
                PositionStatus::Open => ledger.allocated_capital += position.cost_basis,
                PositionStatus::Closed => {
                    let pnl = position.realized_pnl.unwrap_or(0.0);
                    ledger.realized_pnl += pnl;
                    ledger.stats.record_trade(pnl);
                }
                _ => {}
            }
            ledger.positions.push(position);
        }
        ledger
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub fn allocated_capital(&self) -> f64 {
        self.allocated_capital
    }

    pub fn available_capital(&self) -> f64 {
        (self.total_budget - self.allocated_capital).max(0.0)
    }

    pub fn realized_pnl(&self) -> f64 {
        self.realized_pnl
    }

    pub fn stats(&self) -> &TradeStats {
        &self.stats
    }

    pub fn get(&self, id: &str) -> Option<&Position> {
        self.positions.iter().find(|p| p.id == id)
    }

    pub fn positions(&self) -> &[Position] {
        &self.positions
    }

    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| p.is_open())
    }

    /// Oldest open position in `token_address`
    pub fn first_open(&self, token_address: &str) -> Option<&Position> {
        self.open_positions()
            .find(|p| p.token_address.eq_ignore_ascii_case(token_address))
    }

    pub fn set_risk(&mut self, risk: RiskLevels) {
        self.risk = risk;
    }

    pub fn set_total_budget(&mut self, total_budget: f64) {
        self.total_budget = total_budget;
    }

    /// Open a new position, deriving stop-loss/take-profit prices
    pub fn open(&mut self, fill: EntryFill) -> Result<Position> {
        if fill.entry_amount <= 0.0 || fill.token_amount <= 0.0 || fill.entry_price <= 0.0 {
            return Err(Error::InvalidState(format!(
                "cannot open position with amount={} tokens={} price={}",
                fill.entry_amount, fill.token_amount, fill.entry_price
            )));
        }

        let stop_loss_price = match self.risk.stop_loss_pct {
            Some(pct) if pct <= 0.0 || pct >= 100.0 => {
                return Err(Error::ConfigInvalid(format!(
                    "stop-loss {}% would place the stop at or above entry",
                    pct
                )));
            }
            Some(pct) => Some(fill.entry_price * (1.0 - pct / 100.0)),
            None => None,
        };
        let take_profit_price = match self.risk.take_profit_pct {
            Some(pct) if pct <= 0.0 => {
                return Err(Error::ConfigInvalid(format!(
                    "take-profit {}% would place the target at or below entry",
                    pct
                )));
            }
            Some(pct) => Some(fill.entry_price * (1.0 + pct / 100.0)),
            None => None,
        };

        let now = Utc::now();
        let position = Position {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: self.strategy_id.clone(),
            token_address: fill.token_address,
            token_symbol: fill.token_symbol,
            token_decimals: fill.token_decimals,
            chain_id: fill.chain_id,
            entry_amount: fill.entry_amount,
            token_amount: fill.token_amount,
            entry_price: fill.entry_price,
            cost_basis: fill.entry_amount,
            num_entries: 1,
            stop_loss_price,
            take_profit_price,
            status: PositionStatus::Open,
            opened_at: now,
            updated_at: now,
            closed_at: None,
            exit_price: None,
            exit_amount: None,
            realized_pnl: None,
            realized_pnl_pct: None,
            entry_tx_hash: fill.tx_hash,
            exit_tx_hash: None,
        };

        self.allocated_capital += position.cost_basis;
        info!(
            "[{}] Opened position {} in {}: {} tokens @ {} (cost {})",
            self.strategy_id,
            position.id,
            position.token_symbol,
            position.token_amount,
            position.entry_price,
            position.cost_basis
        );

        self.positions.push(position.clone());
        Ok(position)
    }

    /// Merge an additional buy into an open position
    pub fn dca_update(
        &mut self,
        position_id: &str,
        additional_amount: f64,
        additional_tokens: f64,
    ) -> Result<Position> {
        if additional_amount <= 0.0 || additional_tokens <= 0.0 {
            return Err(Error::InvalidState(format!(
                "DCA fill must be positive, got amount={} tokens={}",
                additional_amount, additional_tokens
            )));
        }

        let position = self.open_mut(position_id)?;
        let new_cost = position.cost_basis + additional_amount;
        let new_tokens = position.token_amount + additional_tokens;

        position.cost_basis = new_cost;
        position.token_amount = new_tokens;
        position.entry_price = new_cost / new_tokens;
        position.num_entries += 1;
        position.updated_at = Utc::now();
        let updated = position.clone();

        self.allocated_capital += additional_amount;
        debug!(
            "[{}] DCA into {}: entries={} avg={} cost={}",
            self.strategy_id, updated.id, updated.num_entries, updated.entry_price, updated.cost_basis
        );
        Ok(updated)
    }

    /// Close a position; realized P&L is `exit_amount - cost_basis`
    pub fn close(
        &mut self,
        position_id: &str,
        exit_price: f64,
        exit_amount: f64,
        tx_hash: Option<String>,
    ) -> Result<Position> {
        let position = self.open_mut(position_id)?;

        let pnl = exit_amount - position.cost_basis;
        position.status = PositionStatus::Closed;
        position.exit_price = Some(exit_price);
        position.exit_amount = Some(exit_amount);
        position.realized_pnl = Some(pnl);
        position.realized_pnl_pct = Some(if position.cost_basis > 0.0 {
            pnl / position.cost_basis * 100.0
        } else {
            0.0
        });
        position.closed_at = Some(Utc::now());
        position.updated_at = Utc::now();
        position.exit_tx_hash = tx_hash;
        let closed = position.clone();

        self.allocated_capital = (self.allocated_capital - closed.cost_basis).max(0.0);
        self.realized_pnl += pnl;
        self.stats.record_trade(pnl);

        info!(
            "[{}] Closed position {} in {} with P&L: {:.4} ({:.2}%)",
            self.strategy_id,
            closed.id,
            closed.token_symbol,
            pnl,
            closed.realized_pnl_pct.unwrap_or(0.0)
        );
        Ok(closed)
    }

    /// Carve `tokens` out of an open position into a new open position.
    ///
    /// Cost basis moves pro-rata so the sum over both records is unchanged.
    /// Used before a partial sell so that the sold slice can be closed on its own.
    pub fn split(&mut self, position_id: &str, tokens: f64) -> Result<Position> {
        let position = self.open_mut(position_id)?;
        if tokens <= 0.0 || tokens >= position.token_amount {
            return Err(Error::InvalidState(format!(
                "cannot split {} tokens from position holding {}",
                tokens, position.token_amount
            )));
        }

        let ratio = tokens / position.token_amount;
        let moved_cost = position.cost_basis * ratio;
        let moved_entry = position.entry_amount * ratio;

        position.token_amount -= tokens;
        position.cost_basis -= moved_cost;
        position.entry_amount -= moved_entry;
        position.updated_at = Utc::now();

        let mut slice = position.clone();
        slice.id = uuid::Uuid::new_v4().to_string();
        slice.token_amount = tokens;
        slice.cost_basis = moved_cost;
        slice.entry_amount = moved_entry;

        debug!(
            "[{}] Split {} tokens from {} into {}",
            self.strategy_id, tokens, position_id, slice.id
        );
        self.positions.push(slice.clone());
        Ok(slice)
    }

    /// Book a sale of `tokens` from an open position in one step.
    ///
    /// Selling the whole holding (or more) closes the position. A smaller sale
    /// is split off and only the slice is closed. Returns the closed record and
    /// the remaining open position, if any.
    pub fn sell(
        &mut self,
        position_id: &str,
        tokens: f64,
        exit_price: f64,
        exit_amount: f64,
        tx_hash: Option<String>,
    ) -> Result<(Position, Option<Position>)> {
        if !(tokens > 0.0) {
            return Err(Error::InvalidState(format!(
                "cannot sell {} tokens from position {}",
                tokens, position_id
            )));
        }
        let held = self.open_mut(position_id)?.token_amount;

        if tokens >= held * (1.0 - FULL_EXIT_TOLERANCE) {
            if tokens > held * (1.0 + FULL_EXIT_TOLERANCE) {
                warn!(
                    "[{}] Sold {} tokens from position {} holding {}; closing it",
                    self.strategy_id, tokens, position_id, held
                );
            }
            let closed = self.close(position_id, exit_price, exit_amount, tx_hash)?;
            return Ok((closed, None));
        }

        let slice = self.split(position_id, tokens)?;
        let closed = self.close(&slice.id, exit_price, exit_amount, tx_hash)?;
        Ok((closed, self.get(position_id).cloned()))
    }

    pub fn snapshot(&self) -> LedgerSnapshot {
        LedgerSnapshot {
            open_positions: self.open_positions().cloned().collect(),
            allocated_capital: self.allocated_capital,
            available_capital: self.available_capital(),
            realized_pnl: self.realized_pnl,
            stats: self.stats.clone(),
        }
    }

    fn open_mut(&mut self, position_id: &str) -> Result<&mut Position> {
        let position = self
            .positions
            .iter_mut()
            .find(|p| p.id == position_id)
            .ok_or_else(|| Error::PositionNotFound(position_id.to_string()))?;
        if !position.is_open() {
            return Err(Error::InvalidState(format!(
                "position {} is {:?}",
                position_id, position.status
            )));
        }
        Ok(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fill(amount: f64, tokens: f64) -> EntryFill {
        EntryFill {
            token_address: "0xtoken".to_string(),
            token_symbol: "TKN".to_string(),
            token_decimals: 18,
            chain_id: 1,
            entry_amount: amount,
            token_amount: tokens,
            entry_price: amount / tokens,
            tx_hash: None,
        }
    }

    fn ledger() -> PositionLedger {
        PositionLedger::new(
            "s1",
            5000.0,
            RiskLevels {
                stop_loss_pct: Some(10.0),
                take_profit_pct: Some(50.0),
            },
        )
    }

    #[test]
    fn test_open_derives_exit_prices() {
        let mut ledger = ledger();
        let position = ledger.open(fill(1000.0, 100.0)).unwrap();

        assert!((position.stop_loss_price.unwrap() - 9.0).abs() < 1e-9);
        assert!((position.take_profit_price.unwrap() - 15.0).abs() < 1e-9);
        assert_eq!(ledger.allocated_capital(), 1000.0);
        assert_eq!(ledger.available_capital(), 4000.0);
    }

    #[test]
    fn test_dca_weighted_average() {
        let mut ledger = ledger();
        let position = ledger.open(fill(1000.0, 100.0)).unwrap();
        let updated = ledger.dca_update(&position.id, 800.0, 50.0).unwrap();

        assert_eq!(updated.entry_price, 12.0);
        assert_eq!(updated.cost_basis, 1800.0);
        assert_eq!(updated.num_entries, 2);
        assert_eq!(ledger.allocated_capital(), 1800.0);
    }

    #[test]
    fn test_cost_basis_never_decreases_across_dca() {
        let mut ledger = ledger();
        let position = ledger.open(fill(100.0, 10.0)).unwrap();
        let mut last = position.cost_basis;
        for (amount, tokens) in [(50.0, 4.0), (20.0, 3.0), (75.0, 5.0)] {
            let updated = ledger.dca_update(&position.id, amount, tokens).unwrap();
            assert!(updated.cost_basis >= last);
            last = updated.cost_basis;
        }
    }

    #[test]
    fn test_close_sets_realized_pnl() {
        let mut ledger = ledger();
        let position = ledger.open(fill(1000.0, 100.0)).unwrap();
        ledger.dca_update(&position.id, 800.0, 50.0).unwrap();

        let closed = ledger
            .close(&position.id, 14.0, 2100.0, Some("0xexit".into()))
            .unwrap();

        assert_eq!(closed.status, PositionStatus::Closed);
        assert_eq!(closed.exit_price, Some(14.0));
        assert_eq!(closed.realized_pnl, Some(2100.0 - 1800.0));
        assert_eq!(ledger.allocated_capital(), 0.0);
        assert_eq!(ledger.stats().winning_trades, 1);

        // Closed exactly once
        assert!(ledger.close(&position.id, 14.0, 2100.0, None).is_err());
        assert!(ledger.dca_update(&position.id, 10.0, 1.0).is_err());
    }

    #[test]
    fn test_invalid_stop_loss_is_config_error() {
        let mut ledger = PositionLedger::new(
            "s1",
            1000.0,
            RiskLevels {
                stop_loss_pct: Some(120.0),
                take_profit_pct: None,
            },
        );
        let err = ledger.open(fill(100.0, 10.0)).unwrap_err();
        assert!(matches!(err, Error::ConfigInvalid(_)));
        assert_eq!(ledger.allocated_capital(), 0.0);
    }

    #[test]
    fn test_split_conserves_cost_basis() {
        let mut ledger = ledger();
        let position = ledger.open(fill(1000.0, 100.0)).unwrap();
        let slice = ledger.split(&position.id, 25.0).unwrap();

        let parent = ledger.get(&position.id).unwrap();
        assert_eq!(parent.token_amount, 75.0);
        assert!((parent.cost_basis + slice.cost_basis - 1000.0).abs() < 1e-9);
        assert_eq!(slice.entry_price, parent.entry_price);
        assert_eq!(ledger.open_positions().count(), 2);
        assert_eq!(ledger.allocated_capital(), 1000.0);
    }

    #[test]
    fn test_sell_partial_then_rest() {
        let mut ledger = ledger();
        let position = ledger.open(fill(1000.0, 100.0)).unwrap();

        let (slice, rest) = ledger
            .sell(&position.id, 40.0, 12.0, 480.0, Some("0xa".into()))
            .unwrap();
        let rest = rest.unwrap();
        assert_ne!(slice.id, position.id);
        assert!((slice.realized_pnl.unwrap() - 80.0).abs() < 1e-9);
        assert_eq!(rest.id, position.id);
        assert_eq!(rest.token_amount, 60.0);
        assert!((ledger.allocated_capital() - 600.0).abs() < 1e-9);

        // Oversell of the remainder closes it instead of failing
        let (closed, rest) = ledger.sell(&position.id, 61.0, 12.0, 720.0, None).unwrap();
        assert_eq!(closed.id, position.id);
        assert!(rest.is_none());
        assert_eq!(ledger.open_positions().count(), 0);
        assert!(ledger.allocated_capital().abs() < 1e-9);
        assert_eq!(ledger.stats().total_trades, 2);
    }

    #[test]
    fn test_sell_rejects_closed_or_empty() {
        let mut ledger = ledger();
        let position = ledger.open(fill(100.0, 10.0)).unwrap();
        assert!(ledger.sell(&position.id, 0.0, 10.0, 0.0, None).is_err());
        ledger.sell(&position.id, 10.0, 11.0, 110.0, None).unwrap();
        let err = ledger.sell(&position.id, 5.0, 11.0, 55.0, None).unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));
    }

    #[test]
    fn test_calculate_pnl_is_pure() {
        let mut ledger = ledger();
        let position = ledger.open(fill(1000.0, 100.0)).unwrap();
        let (pnl, pct) = position.calculate_pnl(12.0);
        assert!((pnl - 200.0).abs() < 1e-9);
        assert!((pct - 20.0).abs() < 1e-9);
        assert_eq!(ledger.get(&position.id).unwrap().cost_basis, 1000.0);
    }

    #[test]
    fn test_restore_recomputes_capital() {
        let mut ledger = ledger();
        let a = ledger.open(fill(1000.0, 100.0)).unwrap();
        ledger.open(fill(500.0, 50.0)).unwrap();
        ledger.close(&a.id, 9.0, 900.0, None).unwrap();

        let restored = PositionLedger::restore(
            "s1",
            5000.0,
            RiskLevels::default(),
            ledger.positions().to_vec(),
        );
        assert_eq!(restored.allocated_capital(), 500.0);
        assert_eq!(restored.realized_pnl(), -100.0);
        assert_eq!(restored.stats().losing_trades, 1);
    }

    #[test]
    fn test_trade_stats() {
        let mut stats = TradeStats::default();
        stats.record_trade(10.0);
        stats.record_trade(-5.0);
        stats.record_trade(20.0);

        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.winning_trades, 2);
        assert_eq!(stats.losing_trades, 1);
        assert!((stats.win_rate() - 66.67).abs() < 0.1);
    }
}
