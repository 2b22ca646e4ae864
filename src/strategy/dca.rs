//! Dollar-cost averaging
//!
//! Buys a fixed quote amount once per interval. When price trades more than
//! `dip_threshold_pct` below a slowly decaying reference price, the amount is
//! scaled up by a bounded bonus. Never sells on its own; exits come from the
//! stop-loss/take-profit pass in the strategy core.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::core::{BuyDecision, EvalContext, PendingSignal, SellDecision};
use super::params::ParamReader;
use super::types::{SignalFill, SignalKind, StrategyConfig, TradeSignal};
use crate::error::{Error, Result};
use crate::position::Position;

/// Reference price smoothing factor
const REFERENCE_SMOOTHING: f64 = 0.1;

/// Confidence attached to scheduled DCA buys
const DCA_CONFIDENCE: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcaParams {
    pub amount_per_buy: f64,
    pub interval_hours: f64,
    pub max_buys: Option<u32>,
    pub dip_bonus_pct: f64,
    pub dip_threshold_pct: f64,
}

impl Default for DcaParams {
    fn default() -> Self {
        Self {
            amount_per_buy: 50.0,
            interval_hours: 24.0,
            max_buys: None,
            dip_bonus_pct: 0.0,
            dip_threshold_pct: 5.0,
        }
    }
}

impl DcaParams {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let p = ParamReader::new(&config.strategy_id, &config.params);
        let defaults = Self::default();
        let params = Self {
            amount_per_buy: p.f64_or(&["amount_per_buy"], defaults.amount_per_buy)?,
            interval_hours: p.f64_or(&["interval_hours"], defaults.interval_hours)?,
            max_buys: p.opt_u32(&["max_buys"])?,
            dip_bonus_pct: p.f64_or(&["dip_bonus_pct", "buy_on_dip_bonus"], defaults.dip_bonus_pct)?,
            dip_threshold_pct: p.f64_or(
                &["dip_threshold_pct", "dip_threshold"],
                defaults.dip_threshold_pct,
            )?,
        };

        if params.amount_per_buy <= 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: amount_per_buy must be positive",
                config.strategy_id
            )));
        }
        if params.interval_hours <= 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: interval_hours must be positive",
                config.strategy_id
            )));
        }
        if params.dip_threshold_pct <= 0.0 || params.dip_bonus_pct < 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: dip_threshold_pct must be positive and dip_bonus_pct non-negative",
                config.strategy_id
            )));
        }
        Ok(params)
    }

    fn interval(&self) -> Duration {
        Duration::milliseconds((self.interval_hours * 3_600_000.0) as i64)
    }
}

/// DCA strategy state
#[derive(Debug, Clone)]
pub struct DcaStrategy {
    params: DcaParams,
    last_buy_time: Option<DateTime<Utc>>,
    buy_count: u32,
    reference_price: Option<f64>,
    pending: Option<PendingSignal>,
}

impl DcaStrategy {
    pub fn new(params: DcaParams) -> Self {
        Self {
            params,
            last_buy_time: None,
            buy_count: 0,
            reference_price: None,
            pending: None,
        }
    }

    pub fn params(&self) -> &DcaParams {
        &self.params
    }

    pub fn buy_count(&self) -> u32 {
        self.buy_count
    }

    pub fn reference_price(&self) -> Option<f64> {
        self.reference_price
    }

    pub fn last_buy_time(&self) -> Option<DateTime<Utc>> {
        self.last_buy_time
    }

    pub fn evaluate(&mut self, ctx: &EvalContext<'_>) -> Vec<TradeSignal> {
        if let Some(max) = self.params.max_buys {
            if self.buy_count >= max {
                debug!("[{}] Max buys reached ({})", ctx.config.strategy_id, max);
                return vec![ctx.hold("Max buys reached")];
            }
        }

        if PendingSignal::is_live(&self.pending, ctx.now) {
            return vec![ctx.hold("Awaiting previous DCA fill")];
        }

        let decision = self.should_buy(ctx);
        if !decision.buy {
            return vec![ctx.hold(decision.reason)];
        }

        let signal = ctx
            .signal(SignalKind::Buy, decision.amount, DCA_CONFIDENCE, decision.reason)
            .with_indicator("buy_count", self.buy_count as f64)
            .with_indicator("current_price", ctx.price())
            .with_indicator("interval_hours", self.params.interval_hours);
        self.pending = Some(PendingSignal::from_signal(&signal));
        vec![signal]
    }

    /// Interval gate plus dip-scaled sizing. Advances the reference price.
    pub fn should_buy(&mut self, ctx: &EvalContext<'_>) -> BuyDecision {
        let price = ctx.price();

        let Some(last_buy) = self.last_buy_time else {
            self.reference_price = Some(price);
            let amount = self.buy_amount(ctx);
            return match ctx.validate_trade_size(amount) {
                Ok(()) => BuyDecision::buy(amount, "Initial DCA buy"),
                Err(msg) => BuyDecision::hold(msg),
            };
        };

        let next_buy = last_buy + self.params.interval();
        if ctx.now < next_buy {
            let hours_left = (next_buy - ctx.now).num_seconds() as f64 / 3600.0;
            return BuyDecision::hold(format!("Next buy in {:.1}h", hours_left));
        }

        let amount = self.buy_amount(ctx);
        if let Err(msg) = ctx.validate_trade_size(amount) {
            return BuyDecision::hold(msg);
        }

        if let Some(reference) = self.reference_price {
            self.reference_price =
                Some(reference * (1.0 - REFERENCE_SMOOTHING) + price * REFERENCE_SMOOTHING);
        }

        BuyDecision::buy(amount, format!("Scheduled DCA buy (#{})", self.buy_count + 1))
    }

    /// DCA only exits on configured stop-loss/take-profit
    pub fn should_sell(&self, ctx: &EvalContext<'_>, position: &Position) -> SellDecision {
        let price = ctx.price();
        if position.stop_loss_hit(price) {
            return SellDecision::sell(position.token_amount, "Stop loss triggered");
        }
        if position.take_profit_hit(price) {
            return SellDecision::sell(position.token_amount, "Take profit triggered");
        }
        SellDecision::hold("DCA hold - no sell signal")
    }

    /// Quote amount for the next buy, including any dip bonus
    fn buy_amount(&self, ctx: &EvalContext<'_>) -> f64 {
        let mut amount = self.params.amount_per_buy;

        if self.params.dip_bonus_pct > 0.0 {
            if let Some(reference) = self.reference_price.filter(|r| *r > 0.0) {
                let change_pct = (ctx.price() - reference) / reference * 100.0;
                if change_pct <= -self.params.dip_threshold_pct {
                    let multiplier = change_pct.abs() / self.params.dip_threshold_pct;
                    let bonus = (self.params.dip_bonus_pct * multiplier)
                        .min(self.params.dip_bonus_pct * 2.0);
                    amount *= 1.0 + bonus / 100.0;
                    info!(
                        "[{}] Dip detected ({:.1}%), buying with {:.1}% bonus",
                        ctx.config.strategy_id, change_pct, bonus
                    );
                }
            }
        }

        amount.min(ctx.available_capital())
    }

    pub fn on_fill(&mut self, fill: &SignalFill) {
        if PendingSignal::matches(&self.pending, &fill.signal_id) {
            self.pending = None;
        }
        if fill.success && fill.kind == SignalKind::Buy {
            self.last_buy_time = Some(Utc::now());
            self.buy_count += 1;
        }
    }

    /// When the next scheduled buy becomes due
    pub fn next_buy_time(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_buy_time {
            None => now,
            Some(last) => last + self.params.interval(),
        }
    }

    #[cfg(test)]
    pub(crate) fn force_last_buy(&mut self, at: DateTime<Utc>, count: u32) {
        self.last_buy_time = Some(at);
        self.buy_count = count;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::LedgerSnapshot;
    use crate::strategy::types::MarketData;

    fn config() -> StrategyConfig {
        StrategyConfig::new("dca-1", "dca", "0xtoken")
            .with_param("amount_per_buy", 50)
            .with_param("interval_hours", 24)
    }

    fn snapshot(available: f64) -> LedgerSnapshot {
        LedgerSnapshot {
            available_capital: available,
            ..Default::default()
        }
    }

    fn fill_for(signal: &TradeSignal, success: bool) -> SignalFill {
        SignalFill {
            signal_id: signal.id.clone(),
            strategy_id: signal.strategy_id.clone(),
            kind: signal.kind,
            success,
            quote_amount: signal.amount,
            token_amount: signal.amount / 10.0,
            executed_price: 10.0,
            tx_hash: None,
            grid_level: None,
            error: None,
        }
    }

    #[test]
    fn test_initial_buy_then_interval_gate() {
        let cfg = config();
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        let ledger = snapshot(1000.0);
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut dca = DcaStrategy::new(DcaParams::from_config(&cfg).unwrap());

        let signals = dca.evaluate(&ctx);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Buy);
        assert_eq!(signals[0].amount, 50.0);
        assert_eq!(signals[0].confidence, 0.8);
        assert_eq!(signals[0].reason, "Initial DCA buy");

        // No second buy while the first is unresolved
        let again = dca.evaluate(&ctx);
        assert_eq!(again[0].kind, SignalKind::Hold);

        dca.on_fill(&fill_for(&signals[0], true));
        assert_eq!(dca.buy_count(), 1);

        let held = dca.evaluate(&ctx);
        assert_eq!(held[0].kind, SignalKind::Hold);
        assert!(held[0].reason.starts_with("Next buy in"));
    }

    #[test]
    fn test_failed_fill_allows_retry() {
        let cfg = config();
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        let ledger = snapshot(1000.0);
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut dca = DcaStrategy::new(DcaParams::from_config(&cfg).unwrap());

        let signals = dca.evaluate(&ctx);
        dca.on_fill(&fill_for(&signals[0], false));
        assert_eq!(dca.buy_count(), 0);
        assert_eq!(dca.evaluate(&ctx)[0].kind, SignalKind::Buy);
    }

    #[test]
    fn test_dip_bonus_is_capped_at_double() {
        let cfg = config()
            .with_param("dip_bonus_pct", 20)
            .with_param("dip_threshold_pct", 5);
        let ledger = snapshot(1000.0);
        let mut dca = DcaStrategy::new(DcaParams::from_config(&cfg).unwrap());
        let now = Utc::now();

        // Establish reference at 100
        let market = MarketData::at_price("0xtoken", 1, 100.0);
        let ctx = EvalContext::new(&cfg, &market, &ledger, now);
        assert!(dca.should_buy(&ctx).buy);
        dca.force_last_buy(now - Duration::hours(25), 1);

        // -10% change: multiplier 2, bonus 40% which is the 2x cap
        let market = MarketData::at_price("0xtoken", 1, 90.0);
        let ctx = EvalContext::new(&cfg, &market, &ledger, now);
        let decision = dca.should_buy(&ctx);
        assert!(decision.buy);
        assert!((decision.amount - 70.0).abs() < 1e-9);

        // Reference decays toward price: 100*0.9 + 90*0.1
        assert!((dca.reference_price().unwrap() - 99.0).abs() < 1e-9);
    }

    #[test]
    fn test_amount_capped_by_available_capital() {
        let cfg = {
            let mut c = config().with_param("amount_per_buy", 80);
            c.min_trade_size = 10.0;
            c
        };
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        let ledger = snapshot(30.0);
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut dca = DcaStrategy::new(DcaParams::from_config(&cfg).unwrap());

        let decision = dca.should_buy(&ctx);
        assert!(decision.buy);
        assert_eq!(decision.amount, 30.0);
    }

    #[test]
    fn test_max_buys_holds() {
        let cfg = config().with_param("max_buys", 2);
        let market = MarketData::at_price("0xtoken", 1, 10.0);
        let ledger = snapshot(1000.0);
        let now = Utc::now();
        let ctx = EvalContext::new(&cfg, &market, &ledger, now);
        let mut dca = DcaStrategy::new(DcaParams::from_config(&cfg).unwrap());
        dca.force_last_buy(now - Duration::hours(48), 2);

        let signals = dca.evaluate(&ctx);
        assert_eq!(signals[0].kind, SignalKind::Hold);
        assert_eq!(signals[0].reason, "Max buys reached");
    }

    #[test]
    fn test_next_buy_time() {
        let cfg = config();
        let mut dca = DcaStrategy::new(DcaParams::from_config(&cfg).unwrap());
        let now = Utc::now();
        assert_eq!(dca.next_buy_time(now), now);
        dca.force_last_buy(now, 1);
        assert_eq!(dca.next_buy_time(now), now + Duration::hours(24));
    }

    #[test]
    fn test_invalid_params() {
        let cfg = config().with_param("interval_hours", 0);
        assert!(DcaParams::from_config(&cfg).is_err());
    }
}
