//! Momentum trading
//!
//! Weighted vote over RSI, MACD, SMA, EMA and Bollinger position. A trend is
//! declared only when one side collects at least `trend_confirmation` votes and
//! strictly outvotes the other; the vote share becomes the signal confidence.

use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use super::core::{BuyDecision, EvalContext, SellDecision};
use super::params::ParamReader;
use super::types::{MarketData, SignalFill, SignalKind, StrategyConfig, TradeSignal};
use crate::error::{Error, Result};
use crate::position::Position;

/// Pyramiding into an existing position needs at least this strength
const PYRAMID_STRENGTH: f64 = 0.8;
/// Unrealized gain (%) that triggers profit-taking on a weak trend
const PROFIT_TAKE_PCT: f64 = 20.0;
const PROFIT_TAKE_MAX_STRENGTH: f64 = 0.5;
/// RSI above `overbought + this` is an unconditional exit
const RSI_EXTREME_MARGIN: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Bullish,
    Bearish,
    Neutral,
}

impl std::fmt::Display for TrendDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendDirection::Bullish => write!(f, "bullish"),
            TrendDirection::Bearish => write!(f, "bearish"),
            TrendDirection::Neutral => write!(f, "neutral"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Sizing {
    Fixed,
    Dynamic,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MomentumParams {
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub macd_threshold: f64,
    pub sma_fast: u32,
    pub sma_slow: u32,
    pub trend_confirmation: f64,
    pub sizing: Sizing,
}

impl Default for MomentumParams {
    fn default() -> Self {
        Self {
            rsi_oversold: 30.0,
            rsi_overbought: 70.0,
            macd_threshold: 0.0,
            sma_fast: 20,
            sma_slow: 50,
            trend_confirmation: 2.0,
            sizing: Sizing::Fixed,
        }
    }
}

impl MomentumParams {
    pub fn from_config(config: &StrategyConfig) -> Result<Self> {
        let p = ParamReader::new(&config.strategy_id, &config.params);
        let d = Self::default();
        let sizing = match p.str_or(&["sizing", "position_sizing"], "fixed")?.as_str() {
            "fixed" => Sizing::Fixed,
            "dynamic" => Sizing::Dynamic,
            other => {
                return Err(Error::ConfigInvalid(format!(
                    "{}: unknown sizing mode '{}'",
                    config.strategy_id, other
                )))
            }
        };
        let params = Self {
            rsi_oversold: p.f64_or(&["rsi_oversold"], d.rsi_oversold)?,
            rsi_overbought: p.f64_or(&["rsi_overbought"], d.rsi_overbought)?,
            macd_threshold: p.f64_or(&["macd_threshold", "macd_signal_threshold"], d.macd_threshold)?,
            sma_fast: p.u32_or(&["sma_fast"], d.sma_fast)?,
            sma_slow: p.u32_or(&["sma_slow"], d.sma_slow)?,
            trend_confirmation: p.f64_or(&["trend_confirmation"], d.trend_confirmation)?,
            sizing,
        };

        if params.rsi_oversold >= params.rsi_overbought {
            return Err(Error::ConfigInvalid(format!(
                "{}: rsi_oversold {} must be below rsi_overbought {}",
                config.strategy_id, params.rsi_oversold, params.rsi_overbought
            )));
        }
        if params.sma_fast == 0 || params.sma_fast >= params.sma_slow {
            return Err(Error::ConfigInvalid(format!(
                "{}: sma_fast must be positive and below sma_slow",
                config.strategy_id
            )));
        }
        if params.trend_confirmation <= 0.0 {
            return Err(Error::ConfigInvalid(format!(
                "{}: trend_confirmation must be positive",
                config.strategy_id
            )));
        }
        Ok(params)
    }
}

/// Outcome of one indicator vote
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrendAnalysis {
    pub bullish_votes: f64,
    pub bearish_votes: f64,
    /// Indicator name to the value that voted
    pub readings: HashMap<String, f64>,
    /// Short tags like "rsi_oversold", "macd_bearish_cross"
    pub notes: Vec<&'static str>,
}

impl TrendAnalysis {
    fn bull(&mut self, weight: f64, note: &'static str) {
        self.bullish_votes += weight;
        self.notes.push(note);
    }

    fn bear(&mut self, weight: f64, note: &'static str) {
        self.bearish_votes += weight;
        self.notes.push(note);
    }
}

/// Tally indicator votes for one market snapshot
pub fn analyze_indicators(params: &MomentumParams, market: &MarketData) -> TrendAnalysis {
    let mut a = TrendAnalysis::default();
    let price = market.current_price;

    if let Some(rsi) = market.rsi_14 {
        a.readings.insert("rsi".into(), rsi);
        if rsi <= params.rsi_oversold {
            a.bull(1.0, "rsi_oversold");
        } else if rsi >= params.rsi_overbought {
            a.bear(1.0, "rsi_overbought");
        }
        if rsi > 50.0 {
            a.bull(0.5, "rsi_positive");
        } else if rsi < 50.0 {
            a.bear(0.5, "rsi_negative");
        }
    }

    if let (Some(macd), Some(signal)) = (market.macd_line, market.macd_signal) {
        let histogram = market.macd_histogram.unwrap_or(macd - signal);
        a.readings.insert("macd".into(), macd);
        a.readings.insert("macd_signal".into(), signal);
        a.readings.insert("macd_histogram".into(), histogram);
        if macd > signal + params.macd_threshold {
            a.bull(1.0, "macd_bullish_cross");
        } else if macd < signal - params.macd_threshold {
            a.bear(1.0, "macd_bearish_cross");
        }
        if histogram > 0.0 {
            a.bull(0.5, "macd_histogram_positive");
        } else if histogram < 0.0 {
            a.bear(0.5, "macd_histogram_negative");
        }
    }

    if let (Some(fast), Some(slow)) = (market.sma_20, market.sma_50) {
        a.readings.insert("sma_fast".into(), fast);
        a.readings.insert("sma_slow".into(), slow);
        if price > fast && price > slow {
            a.bull(1.0, "price_above_smas");
        } else if price < fast && price < slow {
            a.bear(1.0, "price_below_smas");
        }
        if fast > slow {
            a.bull(0.5, "golden_cross");
        } else {
            a.bear(0.5, "death_cross");
        }
    }

    if let (Some(fast), Some(slow)) = (market.ema_12, market.ema_26) {
        a.readings.insert("ema_12".into(), fast);
        a.readings.insert("ema_26".into(), slow);
        if fast > slow {
            a.bull(0.5, "ema_bullish");
        } else {
            a.bear(0.5, "ema_bearish");
        }
    }

    if let (Some(upper), Some(lower)) = (market.bollinger_upper, market.bollinger_lower) {
        a.readings.insert("bollinger_upper".into(), upper);
        a.readings.insert("bollinger_lower".into(), lower);
        if price <= lower * 1.02 {
            a.bull(1.0, "near_lower_band");
        } else if price >= upper * 0.98 {
            a.bear(0.5, "near_upper_band");
        }
    }

    a
}

/// Trend and strength from a vote tally. Ties are neutral.
pub fn classify(params: &MomentumParams, analysis: &TrendAnalysis) -> (TrendDirection, f64) {
    let bull = analysis.bullish_votes;
    let bear = analysis.bearish_votes;
    let total = bull + bear;
    if total == 0.0 {
        return (TrendDirection::Neutral, 0.5);
    }
    if bull >= params.trend_confirmation && bull > bear {
        return (TrendDirection::Bullish, (bull / total).min(1.0));
    }
    if bear >= params.trend_confirmation && bear > bull {
        return (TrendDirection::Bearish, (bear / total).min(1.0));
    }
    (TrendDirection::Neutral, 0.5)
}

/// Momentum strategy state
#[derive(Debug, Clone)]
pub struct MomentumStrategy {
    params: MomentumParams,
    trend: TrendDirection,
    strength: f64,
    last_analysis: Option<TrendAnalysis>,
}

impl MomentumStrategy {
    pub fn new(params: MomentumParams) -> Self {
        Self {
            params,
            trend: TrendDirection::Neutral,
            strength: 0.0,
            last_analysis: None,
        }
    }

    pub fn params(&self) -> &MomentumParams {
        &self.params
    }

    pub fn trend(&self) -> (TrendDirection, f64) {
        (self.trend, self.strength)
    }

    pub fn last_analysis(&self) -> Option<&TrendAnalysis> {
        self.last_analysis.as_ref()
    }

    pub fn trend_summary(&self) -> String {
        format!(
            "{} (strength: {:.0}%)",
            self.trend.to_string().to_uppercase(),
            self.strength * 100.0
        )
    }

    pub fn evaluate(&mut self, ctx: &EvalContext<'_>) -> Vec<TradeSignal> {
        let analysis = analyze_indicators(&self.params, ctx.market);
        let (trend, strength) = classify(&self.params, &analysis);
        self.trend = trend;
        self.strength = strength;
        debug!(
            "[{}] Momentum votes bull={} bear={} => {} ({:.2})",
            ctx.config.strategy_id, analysis.bullish_votes, analysis.bearish_votes, trend, strength
        );

        let mut signals = Vec::new();
        match trend {
            TrendDirection::Bullish => {
                let decision = self.should_buy(ctx);
                if decision.buy {
                    signals.push(self.annotate(
                        ctx.signal(SignalKind::Buy, decision.amount, strength, decision.reason),
                        &analysis,
                    ));
                }
            }
            TrendDirection::Bearish | TrendDirection::Neutral => {
                for position in ctx.open_positions() {
                    let decision = self.should_sell(ctx, position);
                    if decision.sell {
                        signals.push(
                            self.annotate(
                                ctx.signal(SignalKind::Sell, decision.amount, strength, decision.reason),
                                &analysis,
                            )
                            .with_position(position.id.clone()),
                        );
                    }
                }
            }
        }

        if signals.is_empty() {
            signals.push(ctx.hold(format!("Trend: {} (strength: {:.2})", trend, strength)));
        }
        self.last_analysis = Some(analysis);
        signals
    }

    pub fn should_buy(&self, ctx: &EvalContext<'_>) -> BuyDecision {
        if self.trend != TrendDirection::Bullish {
            return BuyDecision::hold(format!("Trend not bullish ({})", self.trend));
        }
        if ctx.has_open_position() && self.strength < PYRAMID_STRENGTH {
            return BuyDecision::hold("Already in position, trend not strong enough to add");
        }

        let amount = self.position_size(ctx);
        match ctx.validate_trade_size(amount) {
            Ok(()) => BuyDecision::buy(
                amount,
                format!("Bullish momentum (strength: {:.2})", self.strength),
            ),
            Err(msg) => BuyDecision::hold(msg),
        }
    }

    pub fn should_sell(&self, ctx: &EvalContext<'_>, position: &Position) -> SellDecision {
        let price = ctx.price();
        if position.stop_loss_hit(price) {
            return SellDecision::sell(position.token_amount, "Stop loss triggered");
        }
        if position.take_profit_hit(price) {
            return SellDecision::sell(position.token_amount, "Take profit triggered");
        }
        if self.trend == TrendDirection::Bearish {
            return SellDecision::sell(
                position.token_amount,
                format!("Bearish momentum (strength: {:.2})", self.strength),
            );
        }
        if let Some(rsi) = ctx.market.rsi_14 {
            if rsi >= self.params.rsi_overbought + RSI_EXTREME_MARGIN {
                return SellDecision::sell(
                    position.token_amount,
                    format!("RSI extreme overbought ({:.1})", rsi),
                );
            }
        }
        let (_, pnl_pct) = position.calculate_pnl(price);
        if pnl_pct >= PROFIT_TAKE_PCT && self.strength < PROFIT_TAKE_MAX_STRENGTH {
            return SellDecision::sell(
                position.token_amount,
                format!("Taking profits ({:.1}%), momentum weakening", pnl_pct),
            );
        }
        SellDecision::hold("Hold - no sell signal")
    }

    /// Fixed uses max_position_size; dynamic scales with strength and volatility
    fn position_size(&self, ctx: &EvalContext<'_>) -> f64 {
        let mut size = ctx.config.max_position_size;
        if self.params.sizing == Sizing::Dynamic {
            size *= 0.5 + self.strength * 0.5;
            if let (Some(upper), Some(lower)) =
                (ctx.market.bollinger_upper, ctx.market.bollinger_lower)
            {
                let mid = (upper + lower) / 2.0;
                if mid > 0.0 && (upper - lower) / mid > 0.1 {
                    size *= 0.8;
                }
            }
        }
        size.min(ctx.available_capital())
    }

    fn annotate(&self, signal: TradeSignal, analysis: &TrendAnalysis) -> TradeSignal {
        analysis
            .readings
            .iter()
            .fold(signal, |s, (name, value)| s.with_indicator(name, *value))
            .with_indicator("bullish_votes", analysis.bullish_votes)
            .with_indicator("bearish_votes", analysis.bearish_votes)
    }

    /// Momentum keeps no per-signal state
    pub fn on_fill(&mut self, _fill: &SignalFill) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{LedgerSnapshot, PositionStatus};
    use chrono::Utc;

    fn config() -> StrategyConfig {
        StrategyConfig::new("mom-1", "momentum", "0xtoken").with_param("rsi_overbought", 70)
    }

    fn position(entry_price: f64) -> Position {
        Position {
            id: "p1".into(),
            strategy_id: "mom-1".into(),
            token_address: "0xtoken".into(),
            token_symbol: "TKN".into(),
            token_decimals: 18,
            chain_id: 1,
            entry_amount: 100.0,
            token_amount: 100.0 / entry_price,
            entry_price,
            cost_basis: 100.0,
            num_entries: 1,
            stop_loss_price: None,
            take_profit_price: None,
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

    fn bullish_market() -> MarketData {
        MarketData {
            rsi_14: Some(60.0),
            macd_line: Some(1.2),
            macd_signal: Some(0.8),
            sma_20: Some(95.0),
            sma_50: Some(90.0),
            ema_12: Some(98.0),
            ema_26: Some(96.0),
            ..MarketData::at_price("0xtoken", 1, 100.0)
        }
    }

    #[test]
    fn test_bullish_vote_and_strength() {
        let params = MomentumParams::default();
        let analysis = analyze_indicators(&params, &bullish_market());
        // rsi>50 .5, macd cross 1 + hist .5, price above smas 1 + golden .5, ema .5
        assert_eq!(analysis.bullish_votes, 4.0);
        assert_eq!(analysis.bearish_votes, 0.0);
        assert_eq!(classify(&params, &analysis), (TrendDirection::Bullish, 1.0));
    }

    #[test]
    fn test_tie_is_neutral() {
        let params = MomentumParams::default();
        let analysis = TrendAnalysis {
            bullish_votes: 2.0,
            bearish_votes: 2.0,
            ..Default::default()
        };
        assert_eq!(classify(&params, &analysis), (TrendDirection::Neutral, 0.5));
        assert_eq!(
            classify(&params, &TrendAnalysis::default()),
            (TrendDirection::Neutral, 0.5)
        );
    }

    #[test]
    fn test_bullish_buys_max_position() {
        let cfg = config();
        let ledger = LedgerSnapshot {
            available_capital: 1000.0,
            ..Default::default()
        };
        let market = bullish_market();
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut strategy = MomentumStrategy::new(MomentumParams::from_config(&cfg).unwrap());

        let signals = strategy.evaluate(&ctx);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Buy);
        assert_eq!(signals[0].amount, 100.0);
        assert_eq!(signals[0].confidence, 1.0);
        assert_eq!(signals[0].indicators["bullish_votes"], 4.0);
    }

    #[test]
    fn test_dynamic_sizing_with_wide_bands() {
        let cfg = config().with_param("sizing", "dynamic");
        let ledger = LedgerSnapshot {
            available_capital: 1000.0,
            ..Default::default()
        };
        let market = MarketData {
            bollinger_upper: Some(130.0),
            bollinger_lower: Some(70.0),
            ..bullish_market()
        };
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut strategy = MomentumStrategy::new(MomentumParams::from_config(&cfg).unwrap());
        strategy.evaluate(&ctx);

        let (trend, strength) = strategy.trend();
        assert_eq!(trend, TrendDirection::Bullish);
        let expected = 100.0 * (0.5 + strength * 0.5) * 0.8;
        let decision = strategy.should_buy(&ctx);
        assert!((decision.amount - expected).abs() < 1e-9);
    }

    #[test]
    fn test_extreme_overbought_sells_existing_position() {
        let cfg = config();
        let ledger = LedgerSnapshot {
            open_positions: vec![position(100.0)],
            available_capital: 900.0,
            ..Default::default()
        };
        // RSI 82 votes bear 1 + bull .5; not enough for a bearish trend
        let market = MarketData {
            rsi_14: Some(82.0),
            ..MarketData::at_price("0xtoken", 1, 101.0)
        };
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut strategy = MomentumStrategy::new(MomentumParams::from_config(&cfg).unwrap());

        let signals = strategy.evaluate(&ctx);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].kind, SignalKind::Sell);
        assert!(signals[0].reason.contains("extreme overbought"));
        assert_eq!(signals[0].position_id.as_deref(), Some("p1"));
    }

    #[test]
    fn test_pyramiding_needs_strength() {
        let cfg = config();
        let ledger = LedgerSnapshot {
            open_positions: vec![position(100.0)],
            available_capital: 900.0,
            ..Default::default()
        };
        // bull: macd 1.5, smas 1.5, ema .5 = 3.5; bear: rsi .5, upper band .5 = 1.0
        let market = MarketData {
            rsi_14: Some(45.0),
            bollinger_upper: Some(101.0),
            bollinger_lower: Some(80.0),
            ..bullish_market()
        };
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let mut strategy = MomentumStrategy::new(MomentumParams::from_config(&cfg).unwrap());
        let signals = strategy.evaluate(&ctx);

        let (trend, strength) = strategy.trend();
        assert_eq!(trend, TrendDirection::Bullish);
        assert!((strength - 3.5 / 4.5).abs() < 1e-9);
        assert_eq!(signals[0].kind, SignalKind::Hold);
        assert!(!strategy.should_buy(&ctx).buy);

        // Same votes without a position: buys
        let flat = LedgerSnapshot {
            available_capital: 1000.0,
            ..Default::default()
        };
        let ctx = EvalContext::new(&cfg, &market, &flat, Utc::now());
        assert!(strategy.should_buy(&ctx).buy);
    }

    #[test]
    fn test_profit_taking_on_weak_trend() {
        let cfg = config();
        let ledger = LedgerSnapshot::default();
        let market = MarketData::at_price("0xtoken", 1, 125.0);
        let ctx = EvalContext::new(&cfg, &market, &ledger, Utc::now());
        let strategy = MomentumStrategy::new(MomentumParams::default());

        // Fresh strategy: neutral with strength 0
        let decision = strategy.should_sell(&ctx, &position(100.0));
        assert!(decision.sell);
        assert!(decision.reason.starts_with("Taking profits (25.0%)"));
    }

    #[test]
    fn test_bad_params() {
        assert!(MomentumParams::from_config(&config().with_param("rsi_oversold", 80)).is_err());
        assert!(MomentumParams::from_config(&config().with_param("sizing", "kelly")).is_err());
        assert!(MomentumParams::from_config(&config().with_param("sma_fast", 60)).is_err());
    }
}
