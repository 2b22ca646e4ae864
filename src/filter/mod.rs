//! Decision filter pipeline
//!
//! Two gates feed the scheduler:
//! - `copy_filter`: ordered admission checks for trades observed on tracked
//!   wallets, plus the copy size multiplier and anti-front-running delay
//! - `signal_gate`: re-checks strategy signals before they are scheduled
//!
//! Supporting pieces:
//! - `anti_spam`: per-token copy window
//! - `correlation`: confidence boost when several wallets trade the same token
//! - `sizing`: prediction-to-order conversion with fractional Kelly sizing

pub mod anti_spam;
pub mod copy_filter;
pub mod correlation;
pub mod signal_gate;
pub mod sizing;
pub mod types;

pub use anti_spam::AntiSpamWindow;
pub use copy_filter::{CopyConfig, CopyFilter};
pub use correlation::{apply_correlation_boost, correlated_trades};
pub use signal_gate::SignalGate;
pub use sizing::{
    kelly_size, Direction, KellySizing, OrderSignalType, Prediction, SignalConfig, SignalSizer,
    SizedSignal,
};
pub use types::FilterResult;
