//! Swap executor
//!
//! `execute` never fails: every path ends in an `ExecutionResult` that is
//! booked to the ledger (on success) and persisted. Dry-run is the default and
//! never reaches the signer.

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::provider::{ChainClient, Signer, SwapProvider};
use super::scheduler::OrderExecutor;
use super::simulation::simulate_fill;
use super::types::{
    realized_slippage_pct, ExecutionResult, Fill, Order, OrderSide, Quote, TokenInfo,
};
use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::position::{EntryFill, LedgerRegistry};
use crate::strategy::Randomizer;

/// Relative overshoot of a sell over the on-chain holding treated as rounding
const SELL_CLAMP_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub dry_run: bool,
    pub quote_timeout: Duration,
    pub confirmation_timeout: Duration,
    /// Attempts per quote, including the first
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub simulated_failure_rate: f64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            quote_timeout: Duration::from_secs(10),
            confirmation_timeout: Duration::from_secs(120),
            max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            simulated_failure_rate: 0.1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub success_rate: f64,
    pub dry_run: bool,
}

pub struct SwapExecutor {
    config: ExecutorConfig,
    provider: Arc<dyn SwapProvider>,
    chain: Option<Arc<dyn ChainClient>>,
    signer: Option<Arc<dyn Signer>>,
    ledgers: Arc<LedgerRegistry>,
    persistence: Option<Arc<dyn Persistence>>,
    rng: Mutex<Randomizer>,
    total: AtomicU64,
    successful: AtomicU64,
}

impl SwapExecutor {
    pub fn new(
        config: ExecutorConfig,
        provider: Arc<dyn SwapProvider>,
        ledgers: Arc<LedgerRegistry>,
    ) -> Self {
        Self {
            config,
            provider,
            chain: None,
            signer: None,
            ledgers,
            persistence: None,
            rng: Mutex::new(Randomizer::default()),
            total: AtomicU64::new(0),
            successful: AtomicU64::new(0),
        }
    }

    /// Chain access and custody; only consulted when `dry_run` is off
    pub fn with_live(mut self, chain: Arc<dyn ChainClient>, signer: Arc<dyn Signer>) -> Self {
        self.chain = Some(chain);
        self.signer = Some(signer);
        self
    }

    pub fn with_persistence(mut self, persistence: Arc<dyn Persistence>) -> Self {
        self.persistence = Some(persistence);
        self
    }

    pub fn with_randomizer(mut self, rng: Randomizer) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn stats(&self) -> ExecutorStats {
        let total = self.total.load(Ordering::Relaxed);
        let successful = self.successful.load(Ordering::Relaxed);
        ExecutorStats {
            total,
            successful,
            failed: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
            dry_run: self.config.dry_run,
        }
    }

    pub async fn execute(&self, order: Order) -> ExecutionResult {
        let started = Utc::now();
        let dry_run = self.config.dry_run || order.simulate_only;

        let mut result = match self.run(&order).await {
            Ok(fill) => ExecutionResult::filled(&order, fill, dry_run, started),
            Err(e) => {
                if e.is_capital_fault() {
                    warn!("{} {} {} aborted: {}", order.side, order.amount, order.token.symbol, e);
                } else {
                    error!("{} {} {} failed: {}", order.side, order.amount, order.token.symbol, e);
                }
                ExecutionResult::failure(&order, &e, dry_run, started)
            }
        };

        if result.success {
            match self.book(&order, &result).await {
                Ok(position_id) => result.position_id = Some(position_id),
                Err(e) => {
                    error!("Fill {} could not be booked to {}: {}", result.id, order.ledger_id, e);
                    result.booking_error = Some(e.to_string());
                }
            }
        }

        self.total.fetch_add(1, Ordering::Relaxed);
        if result.success {
            self.successful.fetch_add(1, Ordering::Relaxed);
        }

        if let Some(store) = &self.persistence {
            if let Err(e) = store.save_execution(&result).await {
                warn!("Failed to persist execution {}: {}", result.id, e);
            }
        }
        result
    }

    async fn run(&self, order: &Order) -> Result<Fill> {
        if order.is_expired_at(Utc::now()) {
            return Err(Error::InvalidState(format!("order {} expired before execution", order.id)));
        }
        if !(order.amount > 0.0) {
            return Err(Error::TradeSizeRejected(format!("non-positive amount {}", order.amount)));
        }

        let quote = self.fetch_quote(order).await?;
        check_quote_price(order, &quote)?;

        if self.config.dry_run || order.simulate_only {
            self.simulate(order, &quote)
        } else {
            self.execute_live(order, quote).await
        }
    }

    fn simulate(&self, order: &Order, quote: &Quote) -> Result<Fill> {
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        simulate_fill(quote, order.side, self.config.simulated_failure_rate, &mut rng)
    }

    /// Quote with timeout per attempt; transient errors retried with backoff
    async fn fetch_quote(&self, order: &Order) -> Result<Quote> {
        let (src, dst) = order.route();
        let attempts = AtomicU32::new(0);
        let timeout_ms = self.config.quote_timeout.as_millis() as u64;

        let backoff = ExponentialBackoff {
            initial_interval: self.config.retry_base_delay,
            max_interval: self.config.retry_base_delay * 4,
            max_elapsed_time: Some(self.config.quote_timeout * (self.config.max_retries + 1)),
            ..Default::default()
        };

        retry(backoff, || async {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst) + 1;
            let outcome = match tokio::time::timeout(
                self.config.quote_timeout,
                self.provider.get_quote(src, dst, order.amount, order.network),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(Error::NetworkTimeout(timeout_ms)),
            };

            match outcome {
                Ok(quote) => Ok(quote),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    warn!(
                        "Quote attempt {}/{} from {} failed: {}",
                        attempt,
                        self.config.max_retries,
                        self.provider.name(),
                        e
                    );
                    Err(backoff::Error::transient(e))
                }
                Err(e) => Err(backoff::Error::permanent(e)),
            }
        })
        .await
    }

    async fn execute_live(&self, order: &Order, quote: Quote) -> Result<Fill> {
        let chain = self
            .chain
            .as_ref()
            .ok_or_else(|| Error::ConfigInvalid("live execution requires a chain client".into()))?;
        let signer = self
            .signer
            .as_ref()
            .ok_or_else(|| Error::ConfigInvalid("live execution requires a signer".into()))?;
        let owner = signer.address().to_string();
        let (src, dst) = order.route();

        let spend_raw = match order.side {
            OrderSide::Buy => {
                let balance = chain.balance_of(src, &owner).await?;
                if balance < order.amount {
                    return Err(Error::InsufficientBalance {
                        available: balance,
                        required: order.amount,
                    });
                }
                src.to_raw(order.amount)
            }
            OrderSide::Sell => {
                let held = chain.raw_balance_of(src, &owner).await?;
                sell_base_units(src, order.amount, held)?
            }
        };

        if !src.is_native() {
            let allowance = self.provider.allowance(src, &owner, order.network).await?;
            if allowance < spend_raw {
                info!("Approving {} {} for {}", order.amount, src.symbol, self.provider.name());
                let approval = self
                    .provider
                    .build_approval(src, spend_raw, &owner, order.network)
                    .await?;
                let approval_hash = signer.sign_and_submit(&approval, order.network).await?;
                chain
                    .wait_for_receipt(&approval_hash, self.config.confirmation_timeout)
                    .await?;
            }
        }

        // Approval can outlast the quote
        let quote = if quote.is_expired_at(Utc::now()) {
            let fresh = self.fetch_quote(order).await?;
            check_quote_price(order, &fresh)?;
            fresh
        } else {
            quote
        };
        let quote = quote.with_src_raw(spend_raw);

        let before = chain.balance_of(dst, &owner).await?;
        let tx_hash = self
            .provider
            .submit_swap(&quote, signer.as_ref(), order.max_slippage_pct)
            .await?;
        info!(
            "Submitted {} {} {} -> {} as {}",
            order.side, quote.src_amount, src.symbol, dst.symbol, tx_hash
        );

        let receipt = chain
            .wait_for_receipt(&tx_hash, self.config.confirmation_timeout)
            .await
            .map_err(|e| {
                warn!("Swap {} unconfirmed: {}", tx_hash, e);
                e
            })?;

        let after = chain.balance_of(dst, &owner).await.unwrap_or(before);
        let received = after - before;
        let amount_out = if received > 0.0 { received } else { quote.dst_amount };
        let executed_price = match order.side {
            OrderSide::Buy => quote.src_amount / amount_out,
            OrderSide::Sell => amount_out / quote.src_amount,
        };

        Ok(Fill {
            tx_hash,
            amount_out,
            executed_price,
            gas_used: receipt.gas_used,
            gas_cost: receipt.gas_cost(),
            slippage_pct: realized_slippage_pct(quote.dst_amount, amount_out),
        })
    }

    /// Book a successful fill; returns the position it landed on
    async fn book(&self, order: &Order, result: &ExecutionResult) -> Result<String> {
        let ledger = self
            .ledgers
            .get(&order.ledger_id)
            .ok_or_else(|| Error::StrategyNotFound(order.ledger_id.clone()))?;
        let (quote_amount, tokens) = result.quote_and_tokens();

        match order.side {
            OrderSide::Buy => {
                if let Some(position_id) = &order.position_id {
                    match ledger.dca_update(position_id, quote_amount, tokens).await {
                        Ok(position) => return Ok(position.id),
                        // Closed by an exit in the meantime: start a fresh position
                        Err(Error::PositionNotFound(_)) | Err(Error::InvalidState(_)) => {}
                        Err(e) => return Err(e),
                    }
                }
                let position = ledger
                    .open(EntryFill {
                        token_address: order.token.address.clone(),
                        token_symbol: order.token.symbol.clone(),
                        token_decimals: order.token.decimals,
                        chain_id: order.network.chain_id(),
                        entry_amount: quote_amount,
                        token_amount: tokens,
                        entry_price: result.executed_price,
                        tx_hash: result.tx_hash.clone(),
                    })
                    .await?;
                Ok(position.id)
            }
            OrderSide::Sell => {
                let position_id = order
                    .position_id
                    .clone()
                    .ok_or_else(|| Error::PositionNotFound("sell order without position".into()))?;
                let closed = ledger
                    .sell(
                        &position_id,
                        tokens,
                        result.executed_price,
                        quote_amount,
                        result.tx_hash.clone(),
                    )
                    .await?;
                Ok(closed.id)
            }
        }
    }
}

/// Base units to spend selling `amount` against an on-chain holding of `held`.
///
/// A full exit expressed as f64 can land a few units above the holding; such
/// overshoot is clamped to the holding instead of failing the swap.
fn sell_base_units(token: &TokenInfo, amount: f64, held: u128) -> Result<u128> {
    let wanted = token.to_raw(amount);
    if wanted <= held {
        return Ok(wanted);
    }
    if (wanted - held) as f64 <= held as f64 * SELL_CLAMP_TOLERANCE {
        debug!("Clamping sell of {} {} base units to holding {}", wanted, token.symbol, held);
        return Ok(held);
    }
    Err(Error::InsufficientBalance {
        available: token.raw_to_amount(held),
        required: amount,
    })
}

/// Reject quotes that already sit outside the order's slippage tolerance
fn check_quote_price(order: &Order, quote: &Quote) -> Result<()> {
    let Some(reference) = order.reference_price else {
        return Ok(());
    };
    let quoted = quote.price_for(order.side);
    if quoted <= 0.0 {
        return Err(Error::Api {
            status: 200,
            message: "quote returned no output".to_string(),
        });
    }
    let deviation = match order.side {
        OrderSide::Buy => (quoted - reference) / reference * 100.0,
        OrderSide::Sell => (reference - quoted) / reference * 100.0,
    };
    if deviation > order.max_slippage_pct {
        return Err(Error::SlippageExceeded {
            expected: order.max_slippage_pct,
            actual: deviation,
        });
    }
    Ok(())
}

#[async_trait]
impl OrderExecutor for SwapExecutor {
    async fn execute(&self, order: Order) -> ExecutionResult {
        SwapExecutor::execute(self, order).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::types::{Network, OrderSource, SwapTransaction, TokenInfo, TxReceipt};
    use crate::persistence::MemoryPersistence;
    use crate::position::{LedgerHandle, PositionLedger, RiskLevels};
    use std::sync::atomic::AtomicUsize;

    /// Fixed-price aggregator. Fails the first `fail_first` quotes with `fail_with`.
    struct FakeProvider {
        price: f64,
        calls: AtomicUsize,
        fail_first: usize,
        fail_with: fn() -> Error,
        /// Base units of the last built swap
        swapped: Mutex<Option<String>>,
    }

    impl FakeProvider {
        fn at(price: f64) -> Self {
            Self {
                price,
                calls: AtomicUsize::new(0),
                fail_first: 0,
                fail_with: || Error::RateLimited("fake".into()),
                swapped: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl SwapProvider for FakeProvider {
        fn name(&self) -> &str {
            "fake"
        }

        async fn get_quote(
            &self,
            src: &TokenInfo,
            dst: &TokenInfo,
            amount: f64,
            network: Network,
        ) -> Result<Quote> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err((self.fail_with)());
            }
            let out = if src.symbol == "USDC" {
                amount / self.price
            } else {
                amount * self.price
            };
            Ok(Quote::new(network, src.clone(), dst.clone(), amount, out, 150_000))
        }

        async fn allowance(&self, _: &TokenInfo, _: &str, _: Network) -> Result<u128> {
            Ok(u128::MAX)
        }

        async fn build_approval(
            &self,
            _: &TokenInfo,
            _: u128,
            owner: &str,
            _: Network,
        ) -> Result<SwapTransaction> {
            Ok(tx(owner))
        }

        async fn build_swap(&self, quote: &Quote, from: &str, _: f64) -> Result<SwapTransaction> {
            *self.swapped.lock().unwrap() = Some(quote.src_base_units());
            Ok(tx(from))
        }
    }

    fn tx(from: &str) -> SwapTransaction {
        SwapTransaction {
            from: from.to_string(),
            to: "0xrouter".into(),
            data: "0x".into(),
            value: "0".into(),
            gas: None,
        }
    }

    #[derive(Default)]
    struct CountingSigner {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Signer for CountingSigner {
        fn address(&self) -> &str {
            "0x00000000000000000000000000000000000000aa"
        }

        async fn sign_and_submit(&self, _: &SwapTransaction, _: Network) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("0xlive".into())
        }
    }

    struct FakeChain {
        balance: f64,
    }

    #[async_trait]
    impl ChainClient for FakeChain {
        async fn native_balance(&self, _: &str) -> Result<f64> {
            Ok(self.balance)
        }

        async fn token_balance(&self, _: &TokenInfo, _: &str) -> Result<f64> {
            Ok(self.balance)
        }

        async fn wait_for_receipt(&self, tx_hash: &str, _: Duration) -> Result<TxReceipt> {
            Ok(TxReceipt {
                tx_hash: tx_hash.to_string(),
                success: true,
                block_number: 1,
                gas_used: 100_000,
                effective_gas_price_gwei: 10.0,
            })
        }
    }

    /// Chain holding an exact base-unit balance of every token
    struct ExactChain {
        raw: u128,
    }

    #[async_trait]
    impl ChainClient for ExactChain {
        async fn native_balance(&self, _: &str) -> Result<f64> {
            Ok(self.raw as f64 / 1e18)
        }

        async fn token_balance(&self, token: &TokenInfo, _: &str) -> Result<f64> {
            Ok(token.raw_to_amount(self.raw))
        }

        async fn wait_for_receipt(&self, tx_hash: &str, _: Duration) -> Result<TxReceipt> {
            Ok(TxReceipt {
                tx_hash: tx_hash.to_string(),
                success: true,
                block_number: 1,
                gas_used: 100_000,
                effective_gas_price_gwei: 10.0,
            })
        }

        async fn raw_balance_of(&self, _: &TokenInfo, _: &str) -> Result<u128> {
            Ok(self.raw)
        }
    }

    fn registry() -> Arc<LedgerRegistry> {
        let registry = Arc::new(LedgerRegistry::new());
        registry.insert(LedgerHandle::spawn(
            PositionLedger::new("s1", 10_000.0, RiskLevels::default()),
            None,
        ));
        registry
    }

    fn config(dry_run: bool, failure_rate: f64) -> ExecutorConfig {
        ExecutorConfig {
            dry_run,
            retry_base_delay: Duration::from_millis(1),
            quote_timeout: Duration::from_secs(1),
            simulated_failure_rate: failure_rate,
            ..Default::default()
        }
    }

    fn buy(amount: f64) -> Order {
        Order::new(
            OrderSource::Strategy {
                strategy_id: "s1".into(),
                signal_id: "sig".into(),
                grid_level: None,
            },
            "s1",
            OrderSide::Buy,
            Network::Ethereum,
            TokenInfo::new("0x6982508145454ce325ddbe47a25d4ec3d2311933", "TKN", 18),
            TokenInfo::new("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6),
            amount,
        )
    }

    fn sell(tokens: f64, position_id: &str) -> Order {
        let mut order = buy(tokens).with_position(position_id);
        order.side = OrderSide::Sell;
        order
    }

    #[tokio::test]
    async fn test_dry_run_never_signs() {
        let signer = Arc::new(CountingSigner::default());
        let store = Arc::new(MemoryPersistence::new());
        let ledgers = registry();
        let executor = SwapExecutor::new(config(true, 0.0), Arc::new(FakeProvider::at(2.0)), ledgers.clone())
            .with_live(Arc::new(FakeChain { balance: 0.0 }), signer.clone())
            .with_persistence(store.clone())
            .with_randomizer(Randomizer::seeded(1));

        let result = executor.execute(buy(500.0)).await;
        assert!(result.success);
        assert!(result.is_dry_run);
        assert!(result.tx_hash.as_deref().unwrap().starts_with("0x"));
        assert!(result.amount_out < 250.0 && result.amount_out >= 245.0);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
        assert_eq!(store.executions().len(), 1);

        let snapshot = ledgers.get("s1").unwrap().snapshot().await.unwrap();
        assert_eq!(snapshot.open_positions.len(), 1);
        assert_eq!(snapshot.allocated_capital, 500.0);
        assert_eq!(result.position_id.as_deref(), Some(snapshot.open_positions[0].id.as_str()));
    }

    #[tokio::test]
    async fn test_simulated_failure_is_persisted_not_booked() {
        let store = Arc::new(MemoryPersistence::new());
        let ledgers = registry();
        let executor = SwapExecutor::new(config(true, 1.0), Arc::new(FakeProvider::at(2.0)), ledgers.clone())
            .with_persistence(store.clone());

        let result = executor.execute(buy(100.0)).await;
        assert!(!result.success);
        assert!(result.is_dry_run);
        assert_eq!(result.error_code.as_deref(), Some("TRANSACTION_REVERTED"));
        assert_eq!(store.executions().len(), 1);
        let snapshot = ledgers.get("s1").unwrap().snapshot().await.unwrap();
        assert!(snapshot.open_positions.is_empty());

        let stats = executor.stats();
        assert_eq!((stats.total, stats.failed), (1, 1));
    }

    #[tokio::test]
    async fn test_transient_quote_errors_are_retried() {
        let provider = Arc::new(FakeProvider {
            fail_first: 2,
            ..FakeProvider::at(1.0)
        });
        let executor = SwapExecutor::new(config(true, 0.0), provider.clone(), registry());
        let result = executor.execute(buy(50.0)).await;
        assert!(result.success);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let provider = Arc::new(FakeProvider {
            fail_first: 10,
            ..FakeProvider::at(1.0)
        });
        let executor = SwapExecutor::new(config(true, 0.0), provider.clone(), registry());
        let result = executor.execute(buy(50.0)).await;
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("RATE_LIMITED"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_are_not_retried() {
        let provider = Arc::new(FakeProvider {
            fail_first: 10,
            fail_with: || Error::Api {
                status: 400,
                message: "bad token".into(),
            },
            ..FakeProvider::at(1.0)
        });
        let executor = SwapExecutor::new(config(true, 0.0), provider.clone(), registry());
        let result = executor.execute(buy(50.0)).await;
        assert_eq!(result.error_code.as_deref(), Some("API_ERROR"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_live_insufficient_balance() {
        let signer = Arc::new(CountingSigner::default());
        let executor = SwapExecutor::new(config(false, 0.0), Arc::new(FakeProvider::at(1.0)), registry())
            .with_live(Arc::new(FakeChain { balance: 10.0 }), signer.clone());
        let result = executor.execute(buy(500.0)).await;
        assert!(!result.success);
        assert!(!result.is_dry_run);
        assert_eq!(result.error_code.as_deref(), Some("INSUFFICIENT_BALANCE"));
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_swap_confirms_and_books() {
        let signer = Arc::new(CountingSigner::default());
        let ledgers = registry();
        let executor = SwapExecutor::new(config(false, 0.0), Arc::new(FakeProvider::at(4.0)), ledgers.clone())
            .with_live(Arc::new(FakeChain { balance: 1_000.0 }), signer.clone());
        let result = executor.execute(buy(100.0)).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(result.tx_hash.as_deref(), Some("0xlive"));
        assert_eq!(result.amount_out, 25.0);
        assert_eq!(result.executed_price, 4.0);
        assert!((result.gas_cost - 0.001).abs() < 1e-12);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(ledgers.get("s1").unwrap().snapshot().await.unwrap().open_positions.len(), 1);
    }

    #[tokio::test]
    async fn test_simulate_only_order_stays_off_chain_when_live() {
        let signer = Arc::new(CountingSigner::default());
        let executor = SwapExecutor::new(config(false, 0.0), Arc::new(FakeProvider::at(1.0)), registry())
            .with_live(Arc::new(FakeChain { balance: 0.0 }), signer.clone())
            .with_randomizer(Randomizer::seeded(3));
        let result = executor.execute(buy(20.0).simulated(true)).await;
        assert!(result.success);
        assert!(result.is_dry_run);
        assert_eq!(signer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_live_without_custody_is_config_error() {
        let executor = SwapExecutor::new(config(false, 0.0), Arc::new(FakeProvider::at(1.0)), registry());
        let result = executor.execute(buy(10.0)).await;
        assert_eq!(result.error_code.as_deref(), Some("CONFIG_INVALID"));
    }

    #[tokio::test]
    async fn test_partial_sell_splits_then_closes() {
        let ledgers = registry();
        let executor = SwapExecutor::new(config(true, 0.0), Arc::new(FakeProvider::at(1.0)), ledgers.clone())
            .with_randomizer(Randomizer::seeded(2));
        let bought = executor.execute(buy(100.0)).await;
        let position_id = bought.position_id.clone().unwrap();
        let tokens = bought.amount_out;

        let sold = executor.execute(sell(tokens / 2.0, &position_id)).await;
        assert!(sold.success);
        assert_ne!(sold.position_id.as_deref(), Some(position_id.as_str()));

        let handle = ledgers.get("s1").unwrap();
        let snapshot = handle.snapshot().await.unwrap();
        assert_eq!(snapshot.open_positions.len(), 1);
        assert!((snapshot.open_positions[0].token_amount - tokens / 2.0).abs() < 1e-9);
        assert!((snapshot.allocated_capital - 50.0).abs() < 1e-9);
        assert_eq!(snapshot.stats.total_trades, 1);
    }

    #[tokio::test]
    async fn test_concurrent_half_sells_close_position() {
        let ledgers = registry();
        let executor = SwapExecutor::new(config(true, 0.0), Arc::new(FakeProvider::at(1.0)), ledgers.clone())
            .with_randomizer(Randomizer::seeded(4));
        let bought = executor.execute(buy(100.0)).await;
        let position_id = bought.position_id.clone().unwrap();
        let half = bought.amount_out / 2.0;

        let (first, second) = tokio::join!(
            executor.execute(sell(half, &position_id)),
            executor.execute(sell(half, &position_id))
        );
        for sold in [&first, &second] {
            assert!(sold.success);
            assert!(sold.booking_error.is_none(), "{:?}", sold.booking_error);
            assert!(sold.error.is_none());
        }

        let snapshot = ledgers.get("s1").unwrap().snapshot().await.unwrap();
        assert!(snapshot.open_positions.is_empty());
        assert!(snapshot.allocated_capital.abs() < 1e-9);
        assert_eq!(snapshot.stats.total_trades, 2);
    }

    #[test]
    fn test_sell_base_units_clamps_rounding_only() {
        let token = TokenInfo::new("0x6982508145454ce325ddbe47a25d4ec3d2311933", "TKN", 18);
        let held = 3240221179638777824505u128;
        let amount = token.from_base_units(&held.to_string()).unwrap();
        assert!(token.to_raw(amount) > held);
        assert_eq!(sell_base_units(&token, amount, held).unwrap(), held);
        assert_eq!(sell_base_units(&token, 1.0, held).unwrap(), 1_000_000_000_000_000_000);

        let err = sell_base_units(&token, amount * 1.01, held).unwrap_err();
        assert!(matches!(err, Error::InsufficientBalance { .. }));
        assert!(sell_base_units(&token, 1.0, 0).is_err());
    }

    #[tokio::test]
    async fn test_live_full_exit_spends_exact_holding() {
        let held = 3240221179638777824505u128;
        let signer = Arc::new(CountingSigner::default());
        let provider = Arc::new(FakeProvider::at(1.0));
        let ledgers = registry();
        let handle = ledgers.get("s1").unwrap();
        let token = TokenInfo::new("0x6982508145454ce325ddbe47a25d4ec3d2311933", "TKN", 18);
        let tokens = token.from_base_units(&held.to_string()).unwrap();
        let position = handle
            .open(EntryFill {
                token_address: token.address.clone(),
                token_symbol: token.symbol.clone(),
                token_decimals: 18,
                chain_id: 1,
                entry_amount: 3000.0,
                token_amount: tokens,
                entry_price: 3000.0 / tokens,
                tx_hash: None,
            })
            .await
            .unwrap();

        let executor = SwapExecutor::new(config(false, 0.0), provider.clone(), ledgers.clone())
            .with_live(Arc::new(ExactChain { raw: held }), signer.clone());
        let result = executor.execute(sell(tokens, &position.id)).await;

        assert!(result.success, "{:?}", result.error);
        assert_eq!(
            provider.swapped.lock().unwrap().as_deref(),
            Some("3240221179638777824505")
        );
        assert_eq!(signer.calls.load(Ordering::SeqCst), 1);
        let snapshot = handle.snapshot().await.unwrap();
        assert!(snapshot.open_positions.is_empty());
        assert!(snapshot.allocated_capital.abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_quote_outside_tolerance_is_slippage() {
        let executor = SwapExecutor::new(config(true, 0.0), Arc::new(FakeProvider::at(1.1)), registry());
        let order = buy(100.0).with_reference_price(1.0).with_slippage(2.0);
        let result = executor.execute(order).await;
        assert_eq!(result.error_code.as_deref(), Some("SLIPPAGE_EXCEEDED"));
    }

    #[tokio::test]
    async fn test_expired_order_is_not_quoted() {
        let provider = Arc::new(FakeProvider::at(1.0));
        let executor = SwapExecutor::new(config(true, 0.0), provider.clone(), registry());
        let order = buy(10.0).with_expiry(Utc::now() - chrono::Duration::seconds(1));
        let result = executor.execute(order).await;
        assert_eq!(result.error_code.as_deref(), Some("INVALID_STATE"));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
