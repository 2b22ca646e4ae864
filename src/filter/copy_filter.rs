//! Copy-trading admission filter
//!
//! Every detected trade runs through nine checks in a fixed order. All of
//! them run even after a failure so the result names every check that
//! failed. Rejections are expected outcomes and are logged at info.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::anti_spam::AntiSpamWindow;
use super::types::FilterResult;
use crate::strategy::Randomizer;
use crate::tracker::DetectedTrade;

pub const CHECK_TRADE_AGE: &str = "trade_age";
pub const CHECK_MIN_SIZE: &str = "min_size";
pub const CHECK_WALLET_WEIGHT: &str = "wallet_weight";
pub const CHECK_CONFIDENCE: &str = "confidence";
pub const CHECK_PRICE_IMPACT: &str = "price_impact";
pub const CHECK_TOKEN: &str = "token_filter";
pub const CHECK_CHAIN: &str = "chain";
pub const CHECK_DEX: &str = "dex";
pub const CHECK_ANTI_SPAM: &str = "anti_spam";
pub const CHECK_DISABLED: &str = "global_disabled";

/// Copy-trading behavior
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Copies are simulated even when the executor is live
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_max_concurrent_copies")]
    pub max_concurrent_copies: usize,

    // Size
    /// Fraction of the source trade's USD value to copy
    #[serde(default = "default_size_multiplier")]
    pub default_size_multiplier: f64,
    #[serde(default = "default_max_trade_size_usd")]
    pub max_trade_size_usd: f64,
    #[serde(default = "default_min_trade_size_usd")]
    pub min_trade_size_usd: f64,
    /// Cap per copy as a fraction of the copy budget
    #[serde(default = "default_max_portfolio_allocation")]
    pub max_portfolio_allocation: f64,
    #[serde(default = "default_budget_usd")]
    pub budget_usd: f64,

    // Timing
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_max_copy_age_secs")]
    pub max_copy_age_secs: f64,

    // Admission thresholds
    #[serde(default = "default_min_wallet_weight")]
    pub min_wallet_weight: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_amount_usd")]
    pub min_amount_usd: f64,
    /// Percent
    #[serde(default = "default_max_price_impact")]
    pub max_price_impact: f64,
    #[serde(default)]
    pub token_whitelist: Vec<String>,
    #[serde(default)]
    pub token_blacklist: Vec<String>,
    #[serde(default = "default_allowed_chains")]
    pub allowed_chains: Vec<String>,
    #[serde(default = "default_allowed_dexes")]
    pub allowed_dexes: Vec<String>,

    // Risk on the resulting positions
    #[serde(default = "default_stop_loss_pct")]
    pub stop_loss_pct: f64,
    #[serde(default = "default_take_profit_pct")]
    pub take_profit_pct: f64,
    #[serde(default = "default_max_slippage")]
    pub max_slippage: f64,
}

fn default_true() -> bool {
    true
}
fn default_max_concurrent_copies() -> usize {
    3
}
fn default_size_multiplier() -> f64 {
    0.1
}
fn default_max_trade_size_usd() -> f64 {
    1_000.0
}
fn default_min_trade_size_usd() -> f64 {
    10.0
}
fn default_max_portfolio_allocation() -> f64 {
    0.25
}
fn default_budget_usd() -> f64 {
    4_000.0
}
fn default_min_delay_secs() -> f64 {
    5.0
}
fn default_max_delay_secs() -> f64 {
    30.0
}
fn default_max_copy_age_secs() -> f64 {
    300.0
}
fn default_min_wallet_weight() -> f64 {
    0.5
}
fn default_min_confidence() -> f64 {
    0.7
}
fn default_min_amount_usd() -> f64 {
    1_000.0
}
fn default_max_price_impact() -> f64 {
    5.0
}
fn default_allowed_chains() -> Vec<String> {
    vec!["ethereum".into(), "arbitrum".into(), "base".into()]
}
fn default_allowed_dexes() -> Vec<String> {
    vec!["uniswap".into(), "sushiswap".into(), "1inch".into()]
}
fn default_stop_loss_pct() -> f64 {
    10.0
}
fn default_take_profit_pct() -> f64 {
    50.0
}
fn default_max_slippage() -> f64 {
    3.0
}

impl Default for CopyConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dry_run: true,
            max_concurrent_copies: default_max_concurrent_copies(),
            default_size_multiplier: default_size_multiplier(),
            max_trade_size_usd: default_max_trade_size_usd(),
            min_trade_size_usd: default_min_trade_size_usd(),
            max_portfolio_allocation: default_max_portfolio_allocation(),
            budget_usd: default_budget_usd(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_copy_age_secs: default_max_copy_age_secs(),
            min_wallet_weight: default_min_wallet_weight(),
            min_confidence: default_min_confidence(),
            min_amount_usd: default_min_amount_usd(),
            max_price_impact: default_max_price_impact(),
            token_whitelist: Vec::new(),
            token_blacklist: Vec::new(),
            allowed_chains: default_allowed_chains(),
            allowed_dexes: default_allowed_dexes(),
            stop_loss_pct: default_stop_loss_pct(),
            take_profit_pct: default_take_profit_pct(),
            max_slippage: default_max_slippage(),
        }
    }
}

/// Admission filter for detected trades. Owns the anti-spam window, so a
/// single task drives it.
pub struct CopyFilter {
    config: CopyConfig,
    anti_spam: AntiSpamWindow,
    rng: Randomizer,
}

impl CopyFilter {
    pub fn new(config: CopyConfig, rng: Randomizer) -> Self {
        Self {
            config,
            anti_spam: AntiSpamWindow::default(),
            rng,
        }
    }

    pub fn config(&self) -> &CopyConfig {
        &self.config
    }

    pub fn evaluate(&mut self, trade: &DetectedTrade) -> FilterResult {
        self.evaluate_at(trade, Utc::now())
    }

    pub fn evaluate_at(&mut self, trade: &DetectedTrade, now: DateTime<Utc>) -> FilterResult {
        if !self.config.enabled {
            return FilterResult::rejected(CHECK_DISABLED, "Copy-trading is globally disabled");
        }

        let target = trade.target_token().to_string();
        let checks: [(&str, bool); 9] = [
            (CHECK_TRADE_AGE, self.check_trade_age(trade, now)),
            (CHECK_MIN_SIZE, trade.amount_usd >= self.config.min_amount_usd),
            (CHECK_WALLET_WEIGHT, trade.wallet_weight >= self.config.min_wallet_weight),
            (CHECK_CONFIDENCE, trade.confidence_score >= self.config.min_confidence),
            (CHECK_PRICE_IMPACT, trade.price_impact <= self.config.max_price_impact),
            (CHECK_TOKEN, self.check_token(&target)),
            (CHECK_CHAIN, self.check_chain(trade)),
            (CHECK_DEX, self.check_dex(&trade.dex)),
            (CHECK_ANTI_SPAM, self.anti_spam.allows(&target, now)),
        ];

        let mut passed = Vec::new();
        let mut failed = Vec::new();
        for (name, ok) in checks {
            if ok {
                passed.push(name.to_string());
            } else {
                failed.push(name.to_string());
            }
        }

        let size = self.adjusted_size(trade);
        let delay = self.delay_for(trade);
        let result = FilterResult::from_checks(passed, failed, size, delay);

        if result.accepted {
            debug!(
                "Copy of {} accepted: size {:.2}%, delay {:.1}s",
                trade.tx_hash,
                size * 100.0,
                result.delay_secs()
            );
        } else {
            info!("Skipping copy of {}: {}", trade.tx_hash, result.reason);
        }
        result
    }

    fn check_trade_age(&self, trade: &DetectedTrade, now: DateTime<Utc>) -> bool {
        let age = (now - trade.timestamp).num_milliseconds() as f64 / 1_000.0;
        age <= self.config.max_copy_age_secs
    }

    fn check_token(&self, token: &str) -> bool {
        if self
            .config
            .token_blacklist
            .iter()
            .any(|t| t.eq_ignore_ascii_case(token))
        {
            return false;
        }
        self.config.token_whitelist.is_empty()
            || self
                .config
                .token_whitelist
                .iter()
                .any(|t| t.eq_ignore_ascii_case(token))
    }

    fn check_chain(&self, trade: &DetectedTrade) -> bool {
        let chain = trade.chain.name();
        self.config
            .allowed_chains
            .iter()
            .any(|c| c.eq_ignore_ascii_case(chain))
    }

    fn check_dex(&self, dex: &str) -> bool {
        let dex = dex.to_lowercase();
        self.config
            .allowed_dexes
            .iter()
            .any(|d| dex.contains(&d.to_lowercase()))
    }

    /// base · confidence · weight · max(0.5, 1 − impact/10), clamped to [0.01, 1]
    pub fn adjusted_size(&self, trade: &DetectedTrade) -> f64 {
        let impact_factor = (1.0 - trade.price_impact / 10.0).max(0.5);
        let size = self.config.default_size_multiplier
            * trade.confidence_score
            * trade.wallet_weight
            * impact_factor;
        size.clamp(0.01, 1.0)
    }

    /// Randomized delay, longer for big trades and low confidence, never
    /// below `min_delay_secs`
    pub fn delay_for(&mut self, trade: &DetectedTrade) -> Duration {
        let min = self.config.min_delay_secs;
        let mut delay = self.rng.uniform(min, self.config.max_delay_secs);

        if trade.amount_usd >= 50_000.0 {
            delay *= 1.5;
        } else if trade.amount_usd >= 10_000.0 {
            delay *= 1.2;
        }
        delay *= 2.0 - trade.confidence_score;
        delay += self.rng.uniform(-2.0, 2.0);

        Duration::from_secs_f64(delay.max(min).max(0.0))
    }

    /// USD to spend on a copy
    pub fn copy_size_usd(&self, trade: &DetectedTrade, size_multiplier: f64) -> f64 {
        let cap = self
            .config
            .max_trade_size_usd
            .min(self.config.budget_usd * self.config.max_portfolio_allocation);
        (trade.amount_usd * size_multiplier)
            .min(cap)
            .max(self.config.min_trade_size_usd)
    }

    pub fn record_copy(&mut self, trade: &DetectedTrade) {
        self.record_copy_at(trade, Utc::now());
    }

    pub fn record_copy_at(&mut self, trade: &DetectedTrade, now: DateTime<Utc>) {
        self.anti_spam.record(trade.target_token(), now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::Network;
    use crate::tracker::types::fixtures::trade;
    use crate::tracker::TradeDirection;
    use chrono::Duration as ChronoDuration;

    fn filter(config: CopyConfig) -> CopyFilter {
        CopyFilter::new(config, Randomizer::seeded(11))
    }

    fn good_trade(hash: &str) -> DetectedTrade {
        trade(hash, "0xwhale", "0xtkn", TradeDirection::Buy)
    }

    #[test]
    fn test_good_trade_passes_all_checks() {
        let mut f = filter(CopyConfig::default());
        let result = f.evaluate(&good_trade("0x1"));
        assert!(result.accepted, "{}", result.reason);
        assert_eq!(result.passed.len(), 9);
        assert_eq!(result.passed[0], CHECK_TRADE_AGE);
        assert_eq!(result.passed[8], CHECK_ANTI_SPAM);
        assert_eq!(result.reason, "All 9 filters passed");
    }

    #[test]
    fn test_disabled_short_circuits() {
        let mut f = filter(CopyConfig {
            enabled: false,
            ..Default::default()
        });
        let result = f.evaluate(&good_trade("0x1"));
        assert!(!result.accepted);
        assert_eq!(result.failed, vec![CHECK_DISABLED.to_string()]);
        assert!(result.passed.is_empty());
        assert_eq!(result.reason, "Copy-trading is globally disabled");
    }

    #[test]
    fn test_every_failure_is_listed() {
        let mut f = filter(CopyConfig::default());
        let mut t = good_trade("0x1");
        t.timestamp = Utc::now() - ChronoDuration::minutes(10);
        t.amount_usd = 50.0;
        t.chain = Network::Polygon;
        t.dex = "pancakeswap".into();
        let result = f.evaluate(&t);
        assert_eq!(
            result.failed,
            vec![CHECK_TRADE_AGE, CHECK_MIN_SIZE, CHECK_CHAIN, CHECK_DEX]
        );
        assert_eq!(result.reason, "Failed filters: trade_age, min_size, chain, dex");
    }

    #[test]
    fn test_token_lists_are_case_insensitive() {
        let mut f = filter(CopyConfig {
            token_blacklist: vec!["0xTKN".into()],
            ..Default::default()
        });
        assert!(f.evaluate(&good_trade("0x1")).failed.contains(&CHECK_TOKEN.to_string()));

        let mut f = filter(CopyConfig {
            token_whitelist: vec!["0xother".into()],
            ..Default::default()
        });
        assert!(!f.evaluate(&good_trade("0x1")).accepted);

        // Sells are judged on the token given up
        let mut f = filter(CopyConfig {
            token_whitelist: vec!["0xSTABLE".into()],
            ..Default::default()
        });
        let sell = trade("0x2", "0xwhale", "0xtkn", TradeDirection::Sell);
        assert!(f.evaluate(&sell).accepted);
    }

    #[test]
    fn test_anti_spam_blocks_third_copy_in_five_minutes() {
        let mut f = filter(CopyConfig::default());
        let t0 = Utc::now();
        for i in 0..4 {
            let now = t0 + ChronoDuration::seconds(30 * i);
            let mut t = good_trade(&format!("0x{}", i));
            t.timestamp = now;
            let result = f.evaluate_at(&t, now);
            if i < 2 {
                assert!(result.accepted, "copy {} should pass", i);
                f.record_copy_at(&t, now);
            } else {
                assert_eq!(result.failed, vec![CHECK_ANTI_SPAM.to_string()]);
            }
        }
    }

    #[test]
    fn test_anti_spam_allows_spaced_copies() {
        let mut f = filter(CopyConfig::default());
        let t0 = Utc::now();
        for i in 0..4 {
            let now = t0 + ChronoDuration::minutes(6 * i);
            let mut t = good_trade(&format!("0x{}", i));
            t.timestamp = now;
            assert!(f.evaluate_at(&t, now).accepted);
            f.record_copy_at(&t, now);
        }
    }

    #[test]
    fn test_adjusted_size_formula_and_clamp() {
        let f = filter(CopyConfig::default());
        let mut t = good_trade("0x1");
        t.confidence_score = 0.8;
        t.wallet_weight = 0.5;
        t.price_impact = 2.0;
        // 0.1 * 0.8 * 0.5 * 0.8
        assert!((f.adjusted_size(&t) - 0.032).abs() < 1e-12);

        t.price_impact = 9.0;
        t.wallet_weight = 0.1;
        t.confidence_score = 0.1;
        assert_eq!(f.adjusted_size(&t), 0.01);

        let big = filter(CopyConfig {
            default_size_multiplier: 5.0,
            ..Default::default()
        });
        assert_eq!(big.adjusted_size(&good_trade("0x2")), 1.0);
    }

    #[test]
    fn test_delay_never_below_minimum() {
        let mut f = filter(CopyConfig::default());
        let mut t = good_trade("0x1");
        t.confidence_score = 1.0;
        for _ in 0..200 {
            let d = f.delay_for(&t).as_secs_f64();
            assert!(d >= 5.0);
            // max 30 * (2 - 1) + 2
            assert!(d <= 32.0 + 1e-9);
        }

        t.amount_usd = 60_000.0;
        t.confidence_score = 0.7;
        for _ in 0..200 {
            let d = f.delay_for(&t).as_secs_f64();
            assert!(d >= 5.0);
            assert!(d <= 30.0 * 1.5 * 1.3 + 2.0 + 1e-9);
        }
    }

    #[test]
    fn test_copy_size_clamped() {
        let f = filter(CopyConfig::default());
        let mut t = good_trade("0x1");
        t.amount_usd = 5_000.0;
        assert_eq!(f.copy_size_usd(&t, 0.1), 500.0);
        t.amount_usd = 100_000.0;
        assert_eq!(f.copy_size_usd(&t, 0.1), 1_000.0);
        t.amount_usd = 20.0;
        assert_eq!(f.copy_size_usd(&t, 0.1), 10.0);
    }
}
