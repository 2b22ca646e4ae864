//! Wallet trade detection for copy-trading
//!
//! - `registry`: tracked wallets
//! - `explorer`: chain activity source (Etherscan-compatible)
//! - `analyzer`: swap recognition from raw activity
//! - `detector`: polling loop, dedup, USD pricing and the output channel

pub mod analyzer;
pub mod dedup;
pub mod detector;
pub mod explorer;
pub mod registry;
pub mod types;

pub use dedup::{DedupCache, RecentTrades};
pub use detector::{DetectorStats, TradeDetector};
pub use explorer::{ChainActivitySource, EtherscanClient, Throttle};
pub use registry::{is_valid_address, WalletRegistry};
pub use types::{
    ChainActivity, DetectedTrade, RawTransaction, RawTransfer, TrackedWallet, TradeDirection,
    WalletType,
};
