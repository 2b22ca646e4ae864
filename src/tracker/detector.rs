//! Trade detector
//!
//! Polls the explorer for every enabled wallet, recognizes swaps, prices them
//! in USD and forwards each new trade on a bounded channel. Consumers own the
//! receiving end; a full channel drops the event rather than stalling polls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::{debug, info, warn};

use super::analyzer::extract_trades;
use super::dedup::{DedupCache, RecentTrades, DEDUP_CAPACITY, RECENT_TRADES_CAPACITY};
use super::explorer::ChainActivitySource;
use super::registry::WalletRegistry;
use super::types::{DetectedTrade, TrackedWallet};
use crate::dexscreener::PriceSource;
use crate::error::Result;

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DetectorStats {
    pub polls: u64,
    pub poll_errors: u64,
    pub trades_detected: u64,
    pub duplicates: u64,
    pub dropped: u64,
}

pub struct TradeDetector {
    source: Arc<dyn ChainActivitySource>,
    prices: Arc<dyn PriceSource>,
    wallets: Arc<WalletRegistry>,
    last_blocks: Mutex<HashMap<String, u64>>,
    seen: Mutex<DedupCache>,
    recent: RwLock<RecentTrades>,
    output: mpsc::Sender<DetectedTrade>,
    polls: AtomicU64,
    poll_errors: AtomicU64,
    detected: AtomicU64,
    duplicates: AtomicU64,
    dropped: AtomicU64,
}

impl TradeDetector {
    pub fn new(
        source: Arc<dyn ChainActivitySource>,
        prices: Arc<dyn PriceSource>,
        wallets: Arc<WalletRegistry>,
        output: mpsc::Sender<DetectedTrade>,
    ) -> Self {
        Self {
            source,
            prices,
            wallets,
            last_blocks: Mutex::new(HashMap::new()),
            seen: Mutex::new(DedupCache::new(DEDUP_CAPACITY)),
            recent: RwLock::new(RecentTrades::new(RECENT_TRADES_CAPACITY)),
            output,
            polls: AtomicU64::new(0),
            poll_errors: AtomicU64::new(0),
            detected: AtomicU64::new(0),
            duplicates: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn wallets(&self) -> &Arc<WalletRegistry> {
        &self.wallets
    }

    /// Last block seen for `wallet`, if it was polled before
    pub fn last_block(&self, wallet: &str) -> Option<u64> {
        self.last_blocks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&wallet.to_lowercase())
            .copied()
    }

    /// Poll one wallet and emit its new trades
    pub async fn poll_wallet(&self, wallet: &TrackedWallet) -> Result<Vec<DetectedTrade>> {
        let since_block = self.last_block(&wallet.address).map(|b| b + 1).unwrap_or(0);
        self.polls.fetch_add(1, Ordering::Relaxed);
        let activity = self
            .source
            .list_recent_activity(&wallet.address, since_block)
            .await?;

        if let Some(highest) = activity.highest_block() {
            let mut blocks = self.last_blocks.lock().unwrap_or_else(PoisonError::into_inner);
            let entry = blocks.entry(wallet.address.clone()).or_insert(highest);
            *entry = (*entry).max(highest);
        }

        let mut emitted = Vec::new();
        for mut trade in extract_trades(wallet, &activity, self.source.network()) {
            let fresh = self
                .seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(&trade.tx_hash);
            if !fresh {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                continue;
            }

            trade.amount_usd = self.usd_value(&trade).await;
            info!(
                "Detected {} by {}: {:.4} {} -> {:.4} {} (${:.2}) on {}",
                trade.trade_type,
                trade.wallet_name,
                trade.amount_in,
                trade.token_in_symbol,
                trade.amount_out,
                trade.token_out_symbol,
                trade.amount_usd,
                trade.dex
            );

            self.recent.write().await.push(trade.clone());
            self.wallets.record_detection(&wallet.address);
            self.detected.fetch_add(1, Ordering::Relaxed);
            self.emit(trade.clone());
            emitted.push(trade);
        }
        Ok(emitted)
    }

    /// Received amount times the received token's price; zero when unknown
    async fn usd_value(&self, trade: &DetectedTrade) -> f64 {
        match self.prices.price_usd(trade.chain, &trade.token_out).await {
            Ok(Some(price)) => trade.amount_out * price,
            Ok(None) => 0.0,
            Err(e) => {
                debug!("No USD price for {}: {}", trade.token_out, e);
                0.0
            }
        }
    }

    fn emit(&self, trade: DetectedTrade) {
        match self.output.try_send(trade) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(trade)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Trade channel full, dropping {}", trade.tx_hash);
            }
            Err(mpsc::error::TrySendError::Closed(trade)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Trade channel closed, dropping {}", trade.tx_hash);
            }
        }
    }

    /// One pass over every enabled wallet. Errors are logged per wallet.
    pub async fn poll_once(&self) -> usize {
        let mut found = 0;
        for wallet in self.wallets.enabled() {
            match self.poll_wallet(&wallet).await {
                Ok(trades) => found += trades.len(),
                Err(e) => {
                    self.poll_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Error polling wallet {}: {}", wallet.label(), e);
                }
            }
        }
        if found > 0 {
            info!("Detected {} new trades", found);
        }
        found
    }

    /// Poll until shutdown
    pub async fn run(self: Arc<Self>, poll_interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        info!(
            "Starting trade detector: {} wallets on {}, polling every {:?}",
            self.wallets.len(),
            self.source.network(),
            poll_interval
        );
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                _ = shutdown.recv() => {
                    info!("Trade detector shutting down");
                    break;
                }
            }
        }
    }

    pub async fn recent_trades(&self, limit: usize) -> Vec<DetectedTrade> {
        self.recent.read().await.latest(limit)
    }

    pub async fn trades_by_wallet(&self, wallet: &str) -> Vec<DetectedTrade> {
        self.recent.read().await.by_wallet(wallet)
    }

    pub async fn trades_by_token(&self, token: &str) -> Vec<DetectedTrade> {
        self.recent.read().await.by_token(token)
    }

    pub fn stats(&self) -> DetectorStats {
        DetectorStats {
            polls: self.polls.load(Ordering::Relaxed),
            poll_errors: self.poll_errors.load(Ordering::Relaxed),
            trades_detected: self.detected.load(Ordering::Relaxed),
            duplicates: self.duplicates.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
