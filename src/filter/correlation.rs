//! Cross-wallet correlation
//!
//! Several tracked wallets buying the same token within a few minutes is a
//! stronger signal than one wallet alone.

use crate::tracker::DetectedTrade;

pub const CORRELATION_WINDOW_SECS: i64 = 300;
pub const CORRELATION_BOOST: f64 = 0.1;

/// Other wallets' trades of the same token in the same direction, within the window
pub fn correlated_trades<'a>(trade: &DetectedTrade, recent: &'a [DetectedTrade]) -> Vec<&'a DetectedTrade> {
    recent
        .iter()
        .filter(|t| t.tx_hash != trade.tx_hash)
        .filter(|t| t.token_out.eq_ignore_ascii_case(&trade.token_out))
        .filter(|t| t.trade_type == trade.trade_type)
        .filter(|t| !t.wallet_address.eq_ignore_ascii_case(&trade.wallet_address))
        .filter(|t| (trade.timestamp - t.timestamp).num_seconds().abs() < CORRELATION_WINDOW_SECS)
        .collect()
}

/// Raise the trade's confidence when it is correlated; returns whether it was
pub fn apply_correlation_boost(trade: &mut DetectedTrade, recent: &[DetectedTrade]) -> bool {
    let correlated = !correlated_trades(trade, recent).is_empty();
    if correlated {
        trade.confidence_score = (trade.confidence_score + CORRELATION_BOOST).min(1.0);
    }
    correlated
}
