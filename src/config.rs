//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::execution::{ExecutorConfig, Network, TokenInfo, ONEINCH_API_URL};
use crate::strategy::{StrategyConfig, StrategyKind};
use crate::tracker::{is_valid_address, TrackedWallet};

// Module configs live next to the code that reads them
pub use crate::filter::{CopyConfig, SignalConfig};
pub use crate::strategy::JitterConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub copy_trading: CopyConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
    #[serde(default)]
    pub explorer: ExplorerConfig,
    #[serde(default)]
    pub chain: ChainConfig,
    #[serde(default)]
    pub sizing: SignalConfig,
    #[serde(default)]
    pub strategies: Vec<StrategyConfig>,
    #[serde(default)]
    pub wallets: Vec<TrackedWallet>,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionConfig {
    /// Live trading also needs `--live` on the command line
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_min_delay_secs")]
    pub min_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_max_trade_age_secs")]
    pub max_trade_age_secs: f64,
    #[serde(default = "default_quote_timeout_secs")]
    pub quote_timeout_secs: u64,
    #[serde(default = "default_confirmation_timeout_secs")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,
    #[serde(default = "default_simulated_failure_rate")]
    pub simulated_failure_rate: f64,
    /// Delay applied to strategy signals before scheduling
    #[serde(default)]
    pub jitter: JitterConfig,
    /// Quote currency for strategy orders; native USDC of the strategy's network when unset.
    /// A strategy's own `quote_token` param takes precedence.
    #[serde(default)]
    pub quote_token: Option<TokenInfo>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AggregatorConfig {
    #[serde(default = "default_aggregator_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplorerConfig {
    /// Defaults to the Etherscan-family endpoint of `chain`
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_network")]
    pub chain: String,
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    #[serde(default = "default_network")]
    pub network: String,
    /// JSON-RPC endpoint of a node holding the trading key
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub wallet_address: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_analysis_interval_secs")]
    pub analysis_interval_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// Closes kept per token for indicators
    #[serde(default = "default_price_history")]
    pub price_history: usize,
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent() -> usize {
    3
}

fn default_min_delay_secs() -> f64 {
    5.0
}

fn default_max_delay_secs() -> f64 {
    30.0
}

fn default_max_trade_age_secs() -> f64 {
    300.0
}

fn default_quote_timeout_secs() -> u64 {
    10
}

fn default_confirmation_timeout_secs() -> u64 {
    120
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_delay_ms() -> u64 {
    500
}

fn default_simulated_failure_rate() -> f64 {
    0.1
}

fn default_aggregator_url() -> String {
    ONEINCH_API_URL.to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_network() -> String {
    "ethereum".to_string()
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_poll_interval_secs() -> u64 {
    12
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

fn default_analysis_interval_secs() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    256
}

fn default_price_history() -> usize {
    200
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            max_concurrent_executions: default_max_concurrent(),
            min_delay_secs: default_min_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            max_trade_age_secs: default_max_trade_age_secs(),
            quote_timeout_secs: default_quote_timeout_secs(),
            confirmation_timeout_secs: default_confirmation_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            simulated_failure_rate: default_simulated_failure_rate(),
            jitter: JitterConfig::default(),
            quote_token: None,
        }
    }
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            base_url: default_aggregator_url(),
            api_key: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            chain: default_network(),
            requests_per_second: default_requests_per_second(),
            poll_interval_secs: default_poll_interval_secs(),
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            network: default_network(),
            rpc_url: None,
            wallet_address: None,
            timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analysis_interval_secs: default_analysis_interval_secs(),
            channel_capacity: default_channel_capacity(),
            price_history: default_price_history(),
        }
    }
}

impl ExecutionConfig {
    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            dry_run: self.dry_run,
            quote_timeout: Duration::from_secs(self.quote_timeout_secs),
            confirmation_timeout: Duration::from_secs(self.confirmation_timeout_secs),
            max_retries: self.max_retries,
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            simulated_failure_rate: self.simulated_failure_rate,
        }
    }
}

impl ChainConfig {
    pub fn network(&self) -> Result<Network> {
        self.network
            .parse()
            .with_context(|| format!("Invalid chain.network: {}", self.network))
    }
}

impl ExplorerConfig {
    pub fn network(&self) -> Result<Network> {
        self.chain
            .parse()
            .with_context(|| format!("Invalid explorer.chain: {}", self.chain))
    }
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            .set_default("execution.dry_run", true)?
            .set_default("execution.max_concurrent_executions", default_max_concurrent() as i64)?
            .set_default("engine.analysis_interval_secs", default_analysis_interval_secs() as i64)?
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix SWAPFLOW__)
            .add_source(
                config::Environment::with_prefix("SWAPFLOW")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Copy filter settings with the global timing from `execution` applied
    pub fn copy_config(&self) -> CopyConfig {
        let mut copy = self.copy_trading.clone();
        copy.min_delay_secs = self.execution.min_delay_secs;
        copy.max_delay_secs = self.execution.max_delay_secs;
        copy.max_copy_age_secs = self.execution.max_trade_age_secs;
        copy
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        let exec = &self.execution;
        if exec.min_delay_secs < 0.0 {
            anyhow::bail!("execution.min_delay_secs must not be negative");
        }
        if exec.min_delay_secs > exec.max_delay_secs {
            anyhow::bail!(
                "execution.min_delay_secs ({}) exceeds max_delay_secs ({})",
                exec.min_delay_secs,
                exec.max_delay_secs
            );
        }
        if exec.max_concurrent_executions == 0 {
            anyhow::bail!("execution.max_concurrent_executions must be at least 1");
        }
        if exec.max_trade_age_secs <= 0.0 {
            anyhow::bail!("execution.max_trade_age_secs must be positive");
        }
        if !(0.0..=1.0).contains(&exec.simulated_failure_rate) {
            anyhow::bail!("execution.simulated_failure_rate must be between 0 and 1");
        }
        if exec.jitter.entry_delay_min_ms > exec.jitter.entry_delay_max_ms
            || exec.jitter.exit_delay_min_ms > exec.jitter.exit_delay_max_ms
        {
            anyhow::bail!("execution.jitter minimum delay exceeds maximum");
        }
        if let Some(token) = &exec.quote_token {
            check_address("execution.quote_token.address", &token.address)?;
        }

        let copy = &self.copy_trading;
        if copy.max_concurrent_copies == 0 {
            anyhow::bail!("copy_trading.max_concurrent_copies must be at least 1");
        }
        if copy.min_trade_size_usd > copy.max_trade_size_usd {
            anyhow::bail!(
                "copy_trading.min_trade_size_usd ({}) exceeds max_trade_size_usd ({})",
                copy.min_trade_size_usd,
                copy.max_trade_size_usd
            );
        }
        if copy.stop_loss_pct <= 0.0 || copy.stop_loss_pct >= 100.0 {
            anyhow::bail!("copy_trading.stop_loss_pct must be between 0 and 100");
        }
        if !(0.0..=1.0).contains(&copy.max_portfolio_allocation) {
            anyhow::bail!("copy_trading.max_portfolio_allocation must be between 0 and 1");
        }

        let sizing = &self.sizing;
        if !(0.0..=1.0).contains(&sizing.kelly_fraction) {
            anyhow::bail!("sizing.kelly_fraction must be between 0 and 1");
        }
        if !(0.0..=1.0).contains(&sizing.max_position_size_pct) {
            anyhow::bail!("sizing.max_position_size_pct must be between 0 and 1");
        }

        check_url("aggregator.base_url", &self.aggregator.base_url)?;
        if let Some(url) = &self.explorer.base_url {
            check_url("explorer.base_url", url)?;
        }
        if let Some(url) = &self.chain.rpc_url {
            check_url("chain.rpc_url", url)?;
        }
        if let Some(address) = &self.chain.wallet_address {
            check_address("chain.wallet_address", address)?;
        }
        self.chain.network()?;
        self.explorer.network()?;
        if self.explorer.requests_per_second == 0 {
            anyhow::bail!("explorer.requests_per_second must be at least 1");
        }
        if self.explorer.poll_interval_secs == 0 || self.engine.analysis_interval_secs == 0 {
            anyhow::bail!("Polling intervals must be at least 1 second");
        }
        if self.engine.channel_capacity == 0 {
            anyhow::bail!("engine.channel_capacity must be at least 1");
        }

        for wallet in &self.wallets {
            check_address("wallets.address", &wallet.address)?;
            if !(0.0..=1.0).contains(&wallet.weight) {
                anyhow::bail!("Wallet {} weight must be between 0 and 1", wallet.address);
            }
        }

        let mut ids = HashSet::new();
        for strategy in &self.strategies {
            strategy
                .validate()
                .with_context(|| format!("Invalid strategy {}", strategy.strategy_id))?;
            StrategyKind::from_config(strategy)
                .with_context(|| format!("Invalid params for strategy {}", strategy.strategy_id))?;
            check_address("strategies.token_address", &strategy.token_address)?;
            if !ids.insert(strategy.strategy_id.as_str()) {
                anyhow::bail!("Duplicate strategy id: {}", strategy.strategy_id);
            }
        }

        if !exec.dry_run && (self.chain.rpc_url.is_none() || self.chain.wallet_address.is_none()) {
            anyhow::bail!("Live execution requires chain.rpc_url and chain.wallet_address");
        }

        Ok(())
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Execution:
    dry_run: {}
    max_concurrent: {}
    delay: {}s - {}s
    max_trade_age: {}s
    quote_token: {}
  Copy trading:
    enabled: {}
    dry_run: {}
    size_multiplier: {}
    trade_size: ${} - ${}
    min_wallet_weight: {}
    min_confidence: {}
    allowed_chains: {:?}
    allowed_dexes: {:?}
  Aggregator:
    base_url: {}
    api_key: {}
  Explorer:
    chain: {}
    base_url: {}
    api_key: {}
    rate: {}/s every {}s
  Chain:
    network: {}
    rpc_url: {}
    wallet: {}
  Sizing:
    kelly: {} (fraction {})
    max_position: {}%
  Strategies: {}
  Wallets: {}
  Data dir: {}
"#,
            self.execution.dry_run,
            self.execution.max_concurrent_executions,
            self.execution.min_delay_secs,
            self.execution.max_delay_secs,
            self.execution.max_trade_age_secs,
            self.execution
                .quote_token
                .as_ref()
                .map(|t| format!("{} ({})", t.symbol, t.address))
                .unwrap_or_else(|| "USDC (network default)".to_string()),
            self.copy_trading.enabled,
            self.copy_trading.dry_run,
            self.copy_trading.default_size_multiplier,
            self.copy_trading.min_trade_size_usd,
            self.copy_trading.max_trade_size_usd,
            self.copy_trading.min_wallet_weight,
            self.copy_trading.min_confidence,
            self.copy_trading.allowed_chains,
            self.copy_trading.allowed_dexes,
            mask_url(&self.aggregator.base_url),
            mask_secret(self.aggregator.api_key.as_deref()),
            self.explorer.chain,
            self.explorer.base_url.as_deref().map(mask_url).unwrap_or_else(|| "(network default)".to_string()),
            mask_secret(self.explorer.api_key.as_deref()),
            self.explorer.requests_per_second,
            self.explorer.poll_interval_secs,
            self.chain.network,
            self.chain.rpc_url.as_deref().map(mask_url).unwrap_or_else(|| "(not set)".to_string()),
            self.chain.wallet_address.as_deref().unwrap_or("(not set)"),
            self.sizing.use_kelly_criterion,
            self.sizing.kelly_fraction,
            self.sizing.max_position_size_pct * 100.0,
            self.strategies.len(),
            self.wallets.len(),
            self.persistence.data_dir.display(),
        )
    }
}

fn check_address(field: &str, address: &str) -> Result<()> {
    if !is_valid_address(address) {
        anyhow::bail!("Invalid {}: {}", field, address);
    }
    Ok(())
}

fn check_url(field: &str, raw: &str) -> Result<()> {
    url::Url::parse(raw).with_context(|| format!("Invalid {}: {}", field, raw))?;
    Ok(())
}

fn mask_secret(secret: Option<&str>) -> &'static str {
    match secret {
        Some(s) if !s.is_empty() => "***",
        _ => "(not set)",
    }
}

/// Mask URL for display (hide API keys in query params or the path)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        return format!("{}?***", &url[..idx]);
    }
    // Node providers embed the key as the last path segment (.../v2/<key>)
    let keyed = url::Url::parse(url)
        .ok()
        .and_then(|u| u.path_segments().and_then(|s| s.last().map(str::len)))
        .is_some_and(|len| len >= 16);
    match url.rsplit_once('/') {
        Some((head, _)) if keyed => format!("{}/***", head),
        _ => url.to_string(),
    }
}
