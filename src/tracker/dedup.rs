//! Bounded caches for the detector: seen hashes and recent trades

use std::collections::{HashSet, VecDeque};

use super::types::DetectedTrade;

pub const DEDUP_CAPACITY: usize = 1_000;
pub const RECENT_TRADES_CAPACITY: usize = 1_000;

/// Set of transaction hashes that evicts the oldest entry when full
#[derive(Debug)]
pub struct DedupCache {
    capacity: usize,
    order: VecDeque<String>,
    seen: HashSet<String>,
}

impl DedupCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            seen: HashSet::new(),
        }
    }

    /// Record `hash`; false when it was already present
    pub fn insert(&mut self, hash: &str) -> bool {
        let key = hash.to_lowercase();
        if self.seen.contains(&key) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        self.order.push_back(key.clone());
        self.seen.insert(key);
        true
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.seen.contains(&hash.to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Ring of the most recent detected trades, newest at the back
#[derive(Debug)]
pub struct RecentTrades {
    capacity: usize,
    trades: VecDeque<DetectedTrade>,
}

impl RecentTrades {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            trades: VecDeque::new(),
        }
    }

    pub fn push(&mut self, trade: DetectedTrade) {
        if self.trades.len() == self.capacity {
            self.trades.pop_front();
        }
        self.trades.push_back(trade);
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    /// Newest first by trade timestamp
    pub fn latest(&self, limit: usize) -> Vec<DetectedTrade> {
        let mut trades: Vec<DetectedTrade> = self.trades.iter().cloned().collect();
        trades.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        trades.truncate(limit);
        trades
    }

    pub fn by_wallet(&self, wallet: &str) -> Vec<DetectedTrade> {
        self.trades
            .iter()
            .rev()
            .filter(|t| t.wallet_address.eq_ignore_ascii_case(wallet))
            .cloned()
            .collect()
    }

    pub fn by_token(&self, token: &str) -> Vec<DetectedTrade> {
        self.trades
            .iter()
            .rev()
            .filter(|t| t.token_in.eq_ignore_ascii_case(token) || t.token_out.eq_ignore_ascii_case(token))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::types::fixtures::trade;
    use crate::tracker::types::TradeDirection;
    use chrono::Duration;

    #[test]
    fn test_dedup_evicts_oldest() {
        let mut cache = DedupCache::new(2);
        assert!(cache.insert("0xA"));
        assert!(!cache.insert("0xa"));
        assert!(cache.insert("0xb"));
        assert!(cache.insert("0xc"));
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains("0xa"));
        assert!(cache.contains("0xB"));
        // Evicted hashes are new again
        assert!(cache.insert("0xa"));
    }

    #[test]
    fn test_recent_trades_queries() {
        let mut recent = RecentTrades::new(3);
        let mut old = trade("0x1", "w1", "0xt1", TradeDirection::Buy);
        old.timestamp = old.timestamp - Duration::minutes(5);
        recent.push(old);
        recent.push(trade("0x2", "w2", "0xt2", TradeDirection::Buy));
        recent.push(trade("0x3", "w1", "0xt2", TradeDirection::Buy));
        recent.push(trade("0x4", "w3", "0xt3", TradeDirection::Buy));

        assert_eq!(recent.len(), 3);
        assert_eq!(recent.by_wallet("W1").len(), 1);
        assert_eq!(recent.by_token("0xt2").len(), 2);
        let latest = recent.latest(2);
        assert_eq!(latest.len(), 2);
        assert!(latest[0].timestamp >= latest[1].timestamp);
    }
}
