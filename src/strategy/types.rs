//! Shared types for the strategy system

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Default signal validity window in seconds
pub const DEFAULT_SIGNAL_VALIDITY_SECS: i64 = 300;

/// Kind of trade signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Buy,
    Sell,
    Hold,
    Close,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Buy => write!(f, "BUY"),
            SignalKind::Sell => write!(f, "SELL"),
            SignalKind::Hold => write!(f, "HOLD"),
            SignalKind::Close => write!(f, "CLOSE"),
        }
    }
}

/// Strategy lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategyStatus {
    Active,
    Paused,
    Stopped,
    Error,
}

/// Strategy configuration.
///
/// `params` carries the kind-specific options (see `StrategyKind::from_config`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub strategy_id: String,
    /// "dca", "grid" or "momentum"
    pub strategy_type: String,
    #[serde(default)]
    pub name: String,
    pub token_address: String,
    #[serde(default)]
    pub token_symbol: String,
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u8,
    #[serde(default = "default_chain_id")]
    pub chain_id: u64,
    #[serde(default = "default_total_budget")]
    pub total_budget: f64,
    #[serde(default = "default_max_position_size")]
    pub max_position_size: f64,
    #[serde(default = "default_min_trade_size")]
    pub min_trade_size: f64,
    #[serde(default)]
    pub stop_loss_pct: Option<f64>,
    #[serde(default)]
    pub take_profit_pct: Option<f64>,
    #[serde(default = "default_max_drawdown_pct")]
    pub max_drawdown_pct: f64,
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
    #[serde(default = "default_max_gas_gwei")]
    pub max_gas_gwei: f64,
    #[serde(default)]
    pub params: HashMap<String, serde_json::Value>,
}

fn default_token_decimals() -> u8 {
    18
}

fn default_chain_id() -> u64 {
    1
}

fn default_total_budget() -> f64 {
    1000.0
}

fn default_max_position_size() -> f64 {
    100.0
}

fn default_min_trade_size() -> f64 {
    10.0
}

fn default_max_drawdown_pct() -> f64 {
    20.0
}

fn default_max_slippage() -> f64 {
    2.0
}

fn default_max_gas_gwei() -> f64 {
    100.0
}

impl StrategyConfig {
    /// Minimal config with defaults for everything but identity
    pub fn new(
        strategy_id: impl Into<String>,
        strategy_type: impl Into<String>,
        token_address: impl Into<String>,
    ) -> Self {
        Self {
            strategy_id: strategy_id.into(),
            strategy_type: strategy_type.into(),
            name: String::new(),
            token_address: token_address.into(),
            token_symbol: String::new(),
            token_decimals: default_token_decimals(),
            chain_id: default_chain_id(),
            total_budget: default_total_budget(),
            max_position_size: default_max_position_size(),
            min_trade_size: default_min_trade_size(),
            stop_loss_pct: None,
            take_profit_pct: None,
            max_drawdown_pct: default_max_drawdown_pct(),
            max_slippage: default_max_slippage(),
            max_gas_gwei: default_max_gas_gwei(),
            params: HashMap::new(),
        }
    }

    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Check `min_trade_size <= max_position_size <= total_budget` and risk bounds
    pub fn validate(&self) -> Result<()> {
        if self.strategy_id.trim().is_empty() {
            return Err(Error::ConfigInvalid("strategy_id must not be empty".into()));
        }
        if self.min_trade_size < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: min_trade_size must not be negative",
                self.strategy_id
            )));
        }
        if self.min_trade_size > self.max_position_size {
            return Err(Error::ConfigInvalid(format!(
                "{}: min_trade_size {} exceeds max_position_size {}",
                self.strategy_id, self.min_trade_size, self.max_position_size
            )));
        }
        if self.max_position_size > self.total_budget {
            return Err(Error::ConfigInvalid(format!(
                "{}: max_position_size {} exceeds total_budget {}",
                self.strategy_id, self.max_position_size, self.total_budget
            )));
        }
        if let Some(sl) = self.stop_loss_pct {
            if sl <= 0.0 || sl >= 100.0 {
                return Err(Error::ConfigInvalid(format!(
                    "{}: stop_loss_pct must be between 0 and 100, got {}",
                    self.strategy_id, sl
                )));
            }
        }
        if let Some(tp) = self.take_profit_pct {
            if tp <= 0.0 {
                return Err(Error::ConfigInvalid(format!(
                    "{}: take_profit_pct must be positive, got {}",
                    self.strategy_id, tp
                )));
            }
        }
        if self.max_drawdown_pct <= 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: max_drawdown_pct must be positive",
                self.strategy_id
            )));
        }
        Ok(())
    }

    pub fn display_symbol(&self) -> &str {
        if self.token_symbol.is_empty() {
            &self.token_address
        } else {
            &self.token_symbol
        }
    }
}

/// A trade signal emitted by a strategy.
///
/// `amount` is a quote-currency amount for buys and a token amount for sells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeSignal {
    pub id: String,
    pub strategy_id: String,
    pub kind: SignalKind,
    pub token_address: String,
    pub token_symbol: String,
    pub chain_id: u64,
    pub amount: f64,
    pub price_target: Option<f64>,
    pub confidence: f64,
    pub reason: String,
    #[serde(default)]
    pub indicators: HashMap<String, f64>,
    pub generated_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    pub executed: bool,
    pub executed_at: Option<DateTime<Utc>>,
    pub tx_hash: Option<String>,
    /// Position a sell targets, when known
    pub position_id: Option<String>,
    /// Grid level a signal was fired from
    pub grid_level: Option<usize>,
}

impl TradeSignal {
    /// Build a signal with confidence clamped to [0, 1]
    pub fn new(
        config: &StrategyConfig,
        kind: SignalKind,
        amount: f64,
        confidence: f64,
        reason: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            strategy_id: config.strategy_id.clone(),
            kind,
            token_address: config.token_address.clone(),
            token_symbol: config.token_symbol.clone(),
            chain_id: config.chain_id,
            amount,
            price_target: None,
            confidence,
            reason: reason.into(),
            indicators: HashMap::new(),
            generated_at: now,
            valid_until: now + Duration::seconds(DEFAULT_SIGNAL_VALIDITY_SECS),
            executed: false,
            executed_at: None,
            tx_hash: None,
            position_id: None,
            grid_level: None,
        }
    }

    pub fn with_price_target(mut self, price: f64) -> Self {
        self.price_target = Some(price);
        self
    }

    pub fn with_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }

    pub fn with_grid_level(mut self, level: usize) -> Self {
        self.grid_level = Some(level);
        self
    }

    pub fn with_indicator(mut self, name: &str, value: f64) -> Self {
        self.indicators.insert(name.to_string(), value);
        self
    }

    pub fn with_validity(mut self, seconds: i64) -> Self {
        self.valid_until = self.generated_at + Duration::seconds(seconds);
        self
    }

    /// Actionable iff not hold, not executed and not expired at `now`
    pub fn is_actionable_at(&self, now: DateTime<Utc>) -> bool {
        self.kind != SignalKind::Hold && !self.executed && now < self.valid_until
    }

    pub fn is_actionable(&self) -> bool {
        self.is_actionable_at(Utc::now())
    }

    pub fn is_exit(&self) -> bool {
        matches!(self.kind, SignalKind::Sell | SignalKind::Close)
    }

    /// Flip the executed flag; only the first call has an effect
    pub fn mark_executed(&mut self, tx_hash: Option<String>) -> bool {
        if self.executed {
            return false;
        }
        self.executed = true;
        self.executed_at = Some(Utc::now());
        self.tx_hash = tx_hash;
        true
    }
}

/// One OHLCV bar
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Candle {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Market snapshot used by strategy evaluation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketData {
    pub token_address: String,
    pub chain_id: u64,
    pub current_price: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub volume_24h: Option<f64>,
    pub rsi_14: Option<f64>,
    pub macd_line: Option<f64>,
    pub macd_signal: Option<f64>,
    pub macd_histogram: Option<f64>,
    pub sma_20: Option<f64>,
    pub sma_50: Option<f64>,
    pub ema_12: Option<f64>,
    pub ema_26: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    #[serde(default)]
    pub ohlcv: Vec<Candle>,
}

impl MarketData {
    pub fn at_price(token_address: impl Into<String>, chain_id: u64, price: f64) -> Self {
        Self {
            token_address: token_address.into(),
            chain_id,
            current_price: price,
            timestamp: Some(Utc::now()),
            ..Default::default()
        }
    }
}

/// Outcome of one of a strategy's signals, routed back after execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalFill {
    pub signal_id: String,
    pub strategy_id: String,
    pub kind: SignalKind,
    pub success: bool,
    /// Quote amount spent (buys) or received (sells)
    pub quote_amount: f64,
    /// Tokens received (buys) or sold (sells)
    pub token_amount: f64,
    pub executed_price: f64,
    pub tx_hash: Option<String>,
    pub grid_level: Option<usize>,
    pub error: Option<String>,
}
