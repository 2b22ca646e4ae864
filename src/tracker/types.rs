//! Tracked wallets, raw explorer activity and detected trades

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::execution::Network;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalletType {
    Whale,
    Influencer,
    SmartMoney,
    Custom,
}

impl Default for WalletType {
    fn default() -> Self {
        Self::Custom
    }
}

/// A wallet whose swaps we watch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedWallet {
    pub address: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub wallet_type: WalletType,
    /// Trust weight in [0, 1]
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "Utc::now")]
    pub added_at: DateTime<Utc>,
    #[serde(default)]
    pub trades_detected: u64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

impl TrackedWallet {
    pub fn new(address: impl Into<String>, name: impl Into<String>, wallet_type: WalletType) -> Self {
        Self {
            address: address.into().to_lowercase(),
            name: name.into(),
            wallet_type,
            weight: default_weight(),
            enabled: true,
            notes: String::new(),
            tags: Vec::new(),
            added_at: Utc::now(),
            trades_detected: 0,
        }
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight.clamp(0.0, 1.0);
        self
    }

    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.address
        } else {
            &self.name
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeDirection {
    Buy,
    Sell,
    Swap,
}

impl fmt::Display for TradeDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeDirection::Buy => write!(f, "buy"),
            TradeDirection::Sell => write!(f, "sell"),
            TradeDirection::Swap => write!(f, "swap"),
        }
    }
}

/// ERC-20 transfer as reported by the explorer
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransfer {
    pub hash: String,
    pub block_number: u64,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub contract_address: String,
    pub token_symbol: String,
    pub token_decimals: u8,
    /// Integer base units
    pub value: String,
}

impl RawTransfer {
    pub fn amount(&self) -> f64 {
        self.value.parse::<f64>().unwrap_or(0.0) / 10f64.powi(self.token_decimals as i32)
    }
}

/// Normal transaction as reported by the explorer
#[derive(Debug, Clone, PartialEq)]
pub struct RawTransaction {
    pub hash: String,
    pub block_number: u64,
    pub timestamp: i64,
    pub from: String,
    pub to: String,
    pub input: String,
    /// Wei
    pub gas_price: f64,
    pub is_error: bool,
}

impl RawTransaction {
    /// 4-byte method selector, lowercase with `0x`
    pub fn selector(&self) -> Option<String> {
        if self.input.len() >= 10 && self.input.starts_with("0x") {
            Some(self.input[..10].to_lowercase())
        } else {
            None
        }
    }
}

/// One explorer poll for one wallet
#[derive(Debug, Clone, Default)]
pub struct ChainActivity {
    pub transactions: Vec<RawTransaction>,
    pub transfers: Vec<RawTransfer>,
}

impl ChainActivity {
    pub fn transfers_for<'a>(&'a self, hash: &'a str) -> impl Iterator<Item = &'a RawTransfer> + 'a {
        self.transfers
            .iter()
            .filter(move |t| t.hash.eq_ignore_ascii_case(hash))
    }

    pub fn highest_block(&self) -> Option<u64> {
        self.transactions
            .iter()
            .map(|t| t.block_number)
            .chain(self.transfers.iter().map(|t| t.block_number))
            .max()
    }
}

/// A swap made by a tracked wallet
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedTrade {
    pub tx_hash: String,
    pub wallet_address: String,
    pub wallet_name: String,
    pub trade_type: TradeDirection,
    pub token_in: String,
    pub token_out: String,
    pub token_in_symbol: String,
    pub token_out_symbol: String,
    pub token_in_decimals: u8,
    pub token_out_decimals: u8,
    pub amount_in: f64,
    pub amount_out: f64,
    pub amount_usd: f64,
    /// Percent
    pub price_impact: f64,
    pub dex: String,
    pub chain: Network,
    pub block_number: u64,
    pub timestamp: DateTime<Utc>,
    pub gas_price_gwei: f64,
    pub wallet_weight: f64,
    pub confidence_score: f64,
}

impl DetectedTrade {
    /// The token a copy would trade: what was bought, or what was sold
    pub fn target_token(&self) -> &str {
        match self.trade_type {
            TradeDirection::Buy => &self.token_out,
            _ => &self.token_in,
        }
    }

    pub fn target_symbol(&self) -> &str {
        match self.trade_type {
            TradeDirection::Buy => &self.token_out_symbol,
            _ => &self.token_in_symbol,
        }
    }

    pub fn target_decimals(&self) -> u8 {
        match self.trade_type {
            TradeDirection::Buy => self.token_out_decimals,
            _ => self.token_in_decimals,
        }
    }

    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.timestamp).num_seconds()
    }
}

/// Unix seconds to UTC; out-of-range values clamp to the epoch
pub fn unix_to_utc(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or_else(|| DateTime::<Utc>::from(std::time::UNIX_EPOCH))
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub fn trade(hash: &str, wallet: &str, token: &str, direction: TradeDirection) -> DetectedTrade {
        DetectedTrade {
            tx_hash: hash.to_string(),
            wallet_address: wallet.to_string(),
            wallet_name: wallet.to_string(),
            trade_type: direction,
            token_in: "0xstable".to_string(),
            token_out: token.to_string(),
            token_in_symbol: "USDC".to_string(),
            token_out_symbol: "TKN".to_string(),
            token_in_decimals: 6,
            token_out_decimals: 18,
            amount_in: 5_000.0,
            amount_out: 1_000.0,
            amount_usd: 5_000.0,
            price_impact: 1.0,
            dex: "uniswap_v3".to_string(),
            chain: Network::Ethereum,
            block_number: 100,
            timestamp: Utc::now(),
            gas_price_gwei: 20.0,
            wallet_weight: 1.0,
            confidence_score: 0.9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wallet_normalization() {
        let w = TrackedWallet::new("0xABCDEF", "", WalletType::Whale).with_weight(1.7);
        assert_eq!(w.address, "0xabcdef");
        assert_eq!(w.weight, 1.0);
        assert_eq!(w.label(), "0xabcdef");
    }

    #[test]
    fn test_transfer_amount_and_selector() {
        let t = RawTransfer {
            hash: "0x1".into(),
            block_number: 1,
            timestamp: 0,
            from: "a".into(),
            to: "b".into(),
            contract_address: "c".into(),
            token_symbol: "USDC".into(),
            token_decimals: 6,
            value: "2500000".into(),
        };
        assert_eq!(t.amount(), 2.5);

        let tx = RawTransaction {
            hash: "0x1".into(),
            block_number: 1,
            timestamp: 0,
            from: "a".into(),
            to: "b".into(),
            input: "0x38ED1739000000".into(),
            gas_price: 0.0,
            is_error: false,
        };
        assert_eq!(tx.selector().as_deref(), Some("0x38ed1739"));
    }

    #[test]
    fn test_target_token_follows_direction() {
        let mut t = fixtures::trade("0x1", "w", "0xtoken", TradeDirection::Buy);
        assert_eq!(t.target_token(), "0xtoken");
        t.trade_type = TradeDirection::Sell;
        assert_eq!(t.target_token(), "0xstable");
        assert_eq!(unix_to_utc(60).timestamp(), 60);
    }
}
