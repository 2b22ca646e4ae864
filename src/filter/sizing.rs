//! Prediction-to-order sizing
//!
//! Turns an upstream prediction (direction, confidence, expected return) into
//! a sized, risk-bounded order signal. Position size uses fractional Kelly:
//! `kelly = (b·p − q) / b` with `p` the confidence, `q = 1 − p` and
//! `b = |expected_return| / |risk|`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use crate::strategy::{SignalKind, StrategyConfig, TradeSignal};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfig {
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_strong_confidence")]
    pub strong_signal_confidence: f64,
    /// Fractions, 0.02 = 2%
    #[serde(default = "default_min_expected_return")]
    pub min_expected_return: f64,
    #[serde(default = "default_strong_return")]
    pub strong_return_threshold: f64,
    #[serde(default = "default_stop_loss")]
    pub default_stop_loss_pct: f64,
    #[serde(default = "default_take_profit")]
    pub default_take_profit_pct: f64,
    #[serde(default = "default_max_position_size_pct")]
    pub max_position_size_pct: f64,
    #[serde(default = "default_min_risk_reward")]
    pub min_risk_reward: f64,
    #[serde(default = "default_validity_hours")]
    pub signal_validity_hours: i64,
    #[serde(default = "default_use_kelly")]
    pub use_kelly_criterion: bool,
    #[serde(default = "default_kelly_fraction")]
    pub kelly_fraction: f64,
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    #[serde(default = "default_max_portfolio_risk")]
    pub max_portfolio_risk: f64,
}

fn default_min_confidence() -> f64 {
    0.5
}
fn default_strong_confidence() -> f64 {
    0.75
}
fn default_min_expected_return() -> f64 {
    0.02
}
fn default_strong_return() -> f64 {
    0.05
}
fn default_stop_loss() -> f64 {
    0.05
}
fn default_take_profit() -> f64 {
    0.10
}
fn default_max_position_size_pct() -> f64 {
    0.1
}
fn default_min_risk_reward() -> f64 {
    1.5
}
fn default_validity_hours() -> i64 {
    24
}
fn default_use_kelly() -> bool {
    true
}
fn default_kelly_fraction() -> f64 {
    0.25
}
fn default_max_positions() -> usize {
    5
}
fn default_max_portfolio_risk() -> f64 {
    0.2
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self {
            min_confidence: default_min_confidence(),
            strong_signal_confidence: default_strong_confidence(),
            min_expected_return: default_min_expected_return(),
            strong_return_threshold: default_strong_return(),
            default_stop_loss_pct: default_stop_loss(),
            default_take_profit_pct: default_take_profit(),
            max_position_size_pct: default_max_position_size_pct(),
            min_risk_reward: default_min_risk_reward(),
            signal_validity_hours: default_validity_hours(),
            use_kelly_criterion: true,
            kelly_fraction: default_kelly_fraction(),
            max_positions: default_max_positions(),
            max_portfolio_risk: default_max_portfolio_risk(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Up,
    Down,
    Neutral,
}

/// Upstream numeric prediction for one token
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub direction: Direction,
    /// Win probability proxy in [0, 1]
    pub confidence: f64,
    /// Signed fraction, 0.08 = +8%
    pub predicted_return: f64,
    #[serde(default)]
    pub predicted_price: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSignalType {
    StrongBuy,
    Buy,
    Hold,
    Sell,
    StrongSell,
}

impl OrderSignalType {
    pub fn is_buy(&self) -> bool {
        matches!(self, Self::Buy | Self::StrongBuy)
    }

    pub fn is_sell(&self) -> bool {
        matches!(self, Self::Sell | Self::StrongSell)
    }

    pub fn is_strong(&self) -> bool {
        matches!(self, Self::StrongBuy | Self::StrongSell)
    }
}

impl fmt::Display for OrderSignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::StrongBuy => "STRONG_BUY",
            Self::Buy => "BUY",
            Self::Hold => "HOLD",
            Self::Sell => "SELL",
            Self::StrongSell => "STRONG_SELL",
        };
        f.write_str(s)
    }
}

/// Breakdown of a Kelly sizing decision
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KellySizing {
    /// Payoff odds
    pub b: f64,
    /// Full Kelly, floored at zero
    pub kelly: f64,
    /// After the fractional coefficient, before the cap
    pub fractional: f64,
    /// Final size as a fraction of the portfolio
    pub position_size: f64,
}

/// Fractional Kelly position size. A zero risk means even odds.
pub fn kelly_size(
    confidence: f64,
    expected_return: f64,
    risk: f64,
    kelly_fraction: f64,
    max_position_pct: f64,
) -> KellySizing {
    let p = confidence.clamp(0.0, 1.0);
    let q = 1.0 - p;
    let b = if risk != 0.0 {
        expected_return.abs() / risk.abs()
    } else {
        1.0
    };
    let kelly = if b > 0.0 { ((b * p - q) / b).max(0.0) } else { 0.0 };
    let fractional = kelly * kelly_fraction;
    KellySizing {
        b,
        kelly,
        fractional,
        position_size: fractional.min(max_position_pct),
    }
}

/// A prediction converted into a sized order signal
#[derive(Debug, Clone, Serialize)]
pub struct SizedSignal {
    pub token: String,
    pub signal_type: OrderSignalType,
    pub confidence: f64,
    pub direction: Direction,
    pub predicted_return: f64,
    pub current_price: f64,
    pub entry_price: f64,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
    /// Fraction of the portfolio
    pub position_size_pct: f64,
    pub risk_reward_ratio: f64,
    /// 0 to 100
    pub score: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl SizedSignal {
    pub fn is_actionable_at(&self, now: DateTime<Utc>) -> bool {
        self.signal_type != OrderSignalType::Hold && now < self.expires_at
    }

    pub fn meets_risk_reward(&self, min: f64) -> bool {
        self.risk_reward_ratio >= min
    }

    /// Strategy signal for the execution pipeline; `None` for holds.
    /// Buys spend `position_size_pct` of the budget; sells close `held_tokens`.
    pub fn to_trade_signal(&self, config: &StrategyConfig, held_tokens: f64) -> Option<TradeSignal> {
        let (kind, amount) = if self.signal_type.is_buy() {
            (SignalKind::Buy, config.total_budget * self.position_size_pct)
        } else if self.signal_type.is_sell() {
            (SignalKind::Sell, held_tokens)
        } else {
            return None;
        };
        let mut signal = TradeSignal::new(
            config,
            kind,
            amount,
            self.confidence,
            format!(
                "{} predicted {:+.2}% (score {:.0})",
                self.signal_type,
                self.predicted_return * 100.0,
                self.score
            ),
        );
        signal.generated_at = self.created_at;
        Some(
            signal
                .with_validity((self.expires_at - self.created_at).num_seconds())
                .with_price_target(self.entry_price)
                .with_indicator("score", self.score)
                .with_indicator("risk_reward", self.risk_reward_ratio),
        )
    }
}

pub struct SignalSizer {
    config: SignalConfig,
}

impl SignalSizer {
    pub fn new(config: SignalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SignalConfig {
        &self.config
    }

    pub fn classify(&self, prediction: &Prediction) -> OrderSignalType {
        let magnitude = prediction.predicted_return.abs();
        if prediction.direction == Direction::Neutral
            || prediction.confidence < self.config.min_confidence
            || magnitude < self.config.min_expected_return
        {
            return OrderSignalType::Hold;
        }
        let strong = prediction.confidence >= self.config.strong_signal_confidence
            && magnitude >= self.config.strong_return_threshold;
        match (prediction.direction, strong) {
            (Direction::Up, true) => OrderSignalType::StrongBuy,
            (Direction::Up, false) => OrderSignalType::Buy,
            (_, true) => OrderSignalType::StrongSell,
            (_, false) => OrderSignalType::Sell,
        }
    }

    /// Stop-loss and take-profit prices; the target is at least the default move
    pub fn risk_levels(&self, direction: Direction, price: f64, predicted_return: f64) -> (Option<f64>, Option<f64>) {
        let sl = self.config.default_stop_loss_pct;
        let tp = predicted_return.abs().max(self.config.default_take_profit_pct);
        match direction {
            Direction::Up => (Some(price * (1.0 - sl)), Some(price * (1.0 + tp))),
            Direction::Down => (Some(price * (1.0 + sl)), Some(price * (1.0 - tp))),
            Direction::Neutral => (None, None),
        }
    }

    pub fn position_size(&self, confidence: f64, expected_return: f64, risk: f64) -> f64 {
        if self.config.use_kelly_criterion {
            kelly_size(
                confidence,
                expected_return,
                risk,
                self.config.kelly_fraction,
                self.config.max_position_size_pct,
            )
            .position_size
        } else {
            (confidence * self.config.max_position_size_pct).min(self.config.max_position_size_pct)
        }
    }

    fn score(&self, prediction: &Prediction, signal_type: OrderSignalType, risk_reward: f64) -> f64 {
        let mut score = prediction.confidence * 30.0;
        score += (prediction.predicted_return.abs() / 0.1).min(1.0) * 20.0;
        score += (risk_reward / 3.0).min(1.0) * 20.0;
        score += if signal_type.is_strong() {
            15.0
        } else if signal_type == OrderSignalType::Hold {
            0.0
        } else {
            10.0
        };
        // Single-model prediction: half of the agreement component
        score += 7.5;
        score.min(100.0)
    }

    pub fn generate(&self, token: &str, prediction: &Prediction, current_price: f64) -> SizedSignal {
        self.generate_at(token, prediction, current_price, Utc::now())
    }

    pub fn generate_at(
        &self,
        token: &str,
        prediction: &Prediction,
        current_price: f64,
        now: DateTime<Utc>,
    ) -> SizedSignal {
        let signal_type = self.classify(prediction);
        let (stop_loss, take_profit) =
            self.risk_levels(prediction.direction, current_price, prediction.predicted_return);

        let risk = match stop_loss {
            Some(sl) if current_price > 0.0 => sl / current_price - 1.0,
            _ => self.config.default_stop_loss_pct,
        };
        let position_size_pct =
            self.position_size(prediction.confidence, prediction.predicted_return, risk);

        let risk_reward_ratio = match (stop_loss, take_profit) {
            (Some(sl), Some(tp)) => {
                let downside = (current_price - sl).abs();
                if downside > 0.0 {
                    (tp - current_price).abs() / downside
                } else {
                    0.0
                }
            }
            _ => 0.0,
        };

        let entry_price = match prediction.direction {
            Direction::Up => current_price * 0.998,
            Direction::Down => current_price * 1.002,
            Direction::Neutral => current_price,
        };

        SizedSignal {
            token: token.to_string(),
            signal_type,
            confidence: prediction.confidence,
            direction: prediction.direction,
            predicted_return: prediction.predicted_return,
            current_price,
            entry_price,
            stop_loss,
            take_profit,
            position_size_pct,
            risk_reward_ratio,
            score: self.score(prediction, signal_type, risk_reward_ratio),
            created_at: now,
            expires_at: now + Duration::hours(self.config.signal_validity_hours),
        }
    }

    /// Actionable signals above the thresholds, best score first
    pub fn filter_signals(
        &self,
        signals: &[SizedSignal],
        min_confidence: Option<f64>,
        min_score: Option<f64>,
        max_signals: usize,
    ) -> Vec<SizedSignal> {
        let now = Utc::now();
        let min_confidence = min_confidence.unwrap_or(self.config.min_confidence);
        let mut kept: Vec<SizedSignal> = signals
            .iter()
            .filter(|s| s.confidence >= min_confidence)
            .filter(|s| min_score.map(|m| s.score >= m).unwrap_or(true))
            .filter(|s| s.is_actionable_at(now))
            .cloned()
            .collect();
        kept.sort_by(|a, b| b.score.total_cmp(&a.score));
        kept.truncate(max_signals);
        kept
    }

    /// Best new buys that fit the free slots and the total risk budget.
    /// `current_positions` maps token to its portfolio fraction.
    pub fn select_portfolio(
        &self,
        signals: &[SizedSignal],
        current_positions: &HashMap<String, f64>,
    ) -> Vec<SizedSignal> {
        let slots = self.config.max_positions.saturating_sub(current_positions.len());
        if slots == 0 {
            return Vec::new();
        }

        let mut buys: Vec<&SizedSignal> = signals
            .iter()
            .filter(|s| s.signal_type.is_buy() && !current_positions.contains_key(&s.token))
            .collect();
        buys.sort_by(|a, b| b.score.total_cmp(&a.score));

        let mut total: f64 = current_positions.values().sum();
        let mut selected = Vec::new();
        for signal in buys {
            if selected.len() >= slots {
                break;
            }
            if total + signal.position_size_pct <= self.config.max_portfolio_risk {
                total += signal.position_size_pct;
                selected.push(signal.clone());
            }
        }
        selected
    }
}
