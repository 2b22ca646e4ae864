//! Admission gate for strategy-generated signals
//!
//! Strategies size their own buys, but capital can move between the tick and
//! routing, so the size is checked again here. Accepted signals get a short
//! randomized delay from the jitter config.

use chrono::{DateTime, Utc};
use tracing::info;

use super::types::FilterResult;
use crate::strategy::{Randomizer, SignalKind, StrategyConfig, TradeSignal};

pub const CHECK_ACTIONABLE: &str = "actionable";
pub const CHECK_TRADE_SIZE: &str = "trade_size";
pub const CHECK_EXIT_AMOUNT: &str = "exit_amount";

pub struct SignalGate {
    rng: Randomizer,
}

impl SignalGate {
    pub fn new(rng: Randomizer) -> Self {
        Self { rng }
    }

    pub fn evaluate(
        &mut self,
        signal: &TradeSignal,
        config: &StrategyConfig,
        available_capital: f64,
    ) -> FilterResult {
        self.evaluate_at(signal, config, available_capital, Utc::now())
    }

    pub fn evaluate_at(
        &mut self,
        signal: &TradeSignal,
        config: &StrategyConfig,
        available_capital: f64,
        now: DateTime<Utc>,
    ) -> FilterResult {
        if !signal.is_actionable_at(now) {
            return FilterResult::rejected(
                CHECK_ACTIONABLE,
                format!("Signal {} is not actionable", signal.id),
            );
        }

        let mut passed = vec![CHECK_ACTIONABLE.to_string()];
        let mut failed = Vec::new();
        let mut detail = None;

        match signal.kind {
            SignalKind::Buy => match check_buy_size(signal.amount, config, available_capital) {
                Ok(()) => passed.push(CHECK_TRADE_SIZE.to_string()),
                Err(msg) => {
                    failed.push(CHECK_TRADE_SIZE.to_string());
                    detail = Some(msg);
                }
            },
            _ => {
                if signal.amount > 0.0 && signal.amount.is_finite() {
                    passed.push(CHECK_EXIT_AMOUNT.to_string());
                } else {
                    failed.push(CHECK_EXIT_AMOUNT.to_string());
                    detail = Some(format!("Exit amount {} is not positive", signal.amount));
                }
            }
        }

        let delay = if failed.is_empty() {
            self.rng.signal_delay(signal.kind)
        } else {
            std::time::Duration::ZERO
        };
        let mut result = FilterResult::from_checks(passed, failed, 1.0, delay);
        if let Some(msg) = detail {
            info!(
                "[{}] {} signal {} rejected: {}",
                signal.strategy_id, signal.kind, signal.id, msg
            );
            result.reason = format!("{} ({})", result.reason, msg);
        }
        result
    }
}

/// `min_trade_size <= amount <= min(max_position_size, available)`
fn check_buy_size(amount: f64, config: &StrategyConfig, available: f64) -> Result<(), String> {
    if amount < config.min_trade_size {
        return Err(format!("Amount {:.4} below minimum {}", amount, config.min_trade_size));
    }
    if amount > config.max_position_size {
        return Err(format!(
            "Amount {:.4} exceeds max position {}",
            amount, config.max_position_size
        ));
    }
    if amount > available {
        return Err(format!(
            "Amount {:.4} exceeds available capital {:.4}",
            amount, available
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::JitterConfig;
    use std::time::Duration;

    fn gate() -> SignalGate {
        SignalGate::new(Randomizer::new(JitterConfig::default(), Some(7)))
    }

    fn config() -> StrategyConfig {
        StrategyConfig::new("s1", "dca", "0xtoken")
    }

    #[test]
    fn test_buy_within_limits_gets_entry_delay() {
        let config = config();
        let signal = TradeSignal::new(&config, SignalKind::Buy, 50.0, 0.8, "dca");
        let result = gate().evaluate(&signal, &config, 500.0);
        assert!(result.accepted);
        assert_eq!(result.passed, vec![CHECK_ACTIONABLE, CHECK_TRADE_SIZE]);
        assert!(result.delay >= Duration::from_millis(200));
        assert!(result.delay <= Duration::from_millis(2_000));
    }

    #[test]
    fn test_buy_over_available_capital_rejected() {
        let config = config();
        let signal = TradeSignal::new(&config, SignalKind::Buy, 80.0, 0.8, "dca");
        let result = gate().evaluate(&signal, &config, 40.0);
        assert!(!result.accepted);
        assert_eq!(result.failed, vec![CHECK_TRADE_SIZE]);
        assert!(result.reason.contains("available capital"));
        assert_eq!(result.delay, Duration::ZERO);
    }

    #[test]
    fn test_expired_and_hold_signals_rejected() {
        let config = config();
        let hold = TradeSignal::new(&config, SignalKind::Hold, 0.0, 0.5, "wait");
        assert_eq!(gate().evaluate(&hold, &config, 500.0).failed, vec![CHECK_ACTIONABLE]);

        let buy = TradeSignal::new(&config, SignalKind::Buy, 50.0, 0.8, "dca");
        let later = buy.valid_until + chrono::Duration::seconds(1);
        let result = gate().evaluate_at(&buy, &config, 500.0, later);
        assert!(!result.accepted);
    }

    #[test]
    fn test_sell_needs_positive_amount() {
        let config = config();
        let sell = TradeSignal::new(&config, SignalKind::Sell, 3.5, 1.0, "Stop loss triggered");
        let result = gate().evaluate(&sell, &config, 0.0);
        assert!(result.accepted);
        assert!(result.delay <= Duration::from_millis(500));

        let empty = TradeSignal::new(&config, SignalKind::Sell, 0.0, 1.0, "nothing held");
        assert!(!gate().evaluate(&empty, &config, 0.0).accepted);
    }
}
