//! Market data feed
//!
//! One rolling close history per (network, token), fed from the price source on
//! every strategy tick. Strategies on the same token share the history.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use crate::dexscreener::PriceSource;
use crate::error::Result;
use crate::execution::Network;
use crate::strategy::{MarketData, PriceHistory};

pub struct MarketFeed {
    source: Arc<dyn PriceSource>,
    histories: DashMap<(Network, String), PriceHistory>,
    capacity: usize,
}

impl MarketFeed {
    pub fn new(source: Arc<dyn PriceSource>, capacity: usize) -> Self {
        Self {
            source,
            histories: DashMap::new(),
            capacity,
        }
    }

    /// Fetch the current price and return the updated snapshot.
    /// `None` when the source has no price for the token.
    pub async fn tick(&self, network: Network, token_address: &str) -> Result<Option<MarketData>> {
        let Some(price) = self.source.price_usd(network, token_address).await? else {
            debug!("No price for {} on {}", token_address, network);
            return Ok(None);
        };
        Ok(Some(self.record(network, token_address, price)))
    }

    /// Append a close and return the snapshot
    pub fn record(&self, network: Network, token_address: &str, price: f64) -> MarketData {
        let key = (network, token_address.to_lowercase());
        let mut history = self
            .histories
            .entry(key)
            .or_insert_with(|| PriceHistory::new(self.capacity));
        history.push(price);
        history.market_data(token_address, network.chain_id())
    }

    pub fn last_price(&self, network: Network, token_address: &str) -> Option<f64> {
        self.histories
            .get(&(network, token_address.to_lowercase()))
            .and_then(|h| h.last())
    }

    pub fn history_len(&self, network: Network, token_address: &str) -> usize {
        self.histories
            .get(&(network, token_address.to_lowercase()))
            .map(|h| h.len())
            .unwrap_or(0)
    }
}
