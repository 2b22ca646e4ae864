//! Swap recognition
//!
//! A transaction counts as a swap only when it was sent to a known DEX router
//! with a known swap selector and the same hash moved one token out of and one
//! token into the wallet.

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::types::{
    unix_to_utc, ChainActivity, DetectedTrade, RawTransaction, RawTransfer, TrackedWallet,
    TradeDirection,
};
use crate::execution::Network;

lazy_static! {
    /// Router address -> DEX name
    pub static ref DEX_ROUTERS: HashMap<&'static str, &'static str> = {
        let mut m = HashMap::new();
        m.insert("0x7a250d5630b4cf539739df2c5dacb4c659f2488d", "uniswap_v2");
        m.insert("0x68b3465833fb72a70ecdf485e0e4c7bd8665fc45", "uniswap_v3");
        m.insert("0xe592427a0aece92de3edee1f18e0157c05861564", "uniswap_v3");
        m.insert("0x1111111254eeb25477b68fb85ed929f73a960582", "1inch");
        m.insert("0xdef1c0ded9bec7f1a1670819833240f027b25eff", "0x");
        m.insert("0xd9e1ce17f2641f24ae83637ab66a2cca9c378b9f", "sushiswap");
        m
    };

    /// Swap method selectors across V2 routers, V3 routers and SwapRouter02
    pub static ref SWAP_SELECTORS: HashSet<&'static str> = [
        "0x7ff36ab5", // swapExactETHForTokens
        "0x18cbafe5", // swapExactTokensForETH
        "0x38ed1739", // swapExactTokensForTokens
        "0x8803dbee", // swapTokensForExactTokens
        "0xfb3bdb41", // swapETHForExactTokens
        "0x5c11d795", // swapExactTokensForTokensSupportingFeeOnTransferTokens
        "0x791ac947", // swapExactTokensForETHSupportingFeeOnTransferTokens
        "0xb6f9de95", // swapExactETHForTokensSupportingFeeOnTransferTokens
        "0x04e45aaf", // exactInputSingle (SwapRouter02)
        "0xc04b8d59", // exactInput
        "0xdb3e2198", // exactOutputSingle
        "0xf28c0498", // exactOutput
    ]
    .into_iter()
    .collect();

    /// Receiving one of these means the wallet exited into stable/native value
    pub static ref EXIT_SYMBOLS: HashSet<&'static str> =
        ["usdc", "usdt", "dai", "weth", "eth"].into_iter().collect();
}

pub fn dex_for_router(address: &str) -> Option<&'static str> {
    DEX_ROUTERS.get(address.to_lowercase().as_str()).copied()
}

pub fn is_swap_call(tx: &RawTransaction) -> bool {
    if tx.is_error || dex_for_router(&tx.to).is_none() {
        return false;
    }
    tx.selector()
        .map(|s| SWAP_SELECTORS.contains(s.as_str()))
        .unwrap_or(false)
}

/// Build a trade from one transaction and its transfers. USD value and price
/// impact are left at zero for the caller to fill in.
pub fn analyze_transaction(
    wallet: &TrackedWallet,
    tx: &RawTransaction,
    transfers: &[&RawTransfer],
    network: Network,
) -> Option<DetectedTrade> {
    if !is_swap_call(tx) {
        return None;
    }
    if transfers.len() < 2 {
        debug!("{}: swap call with {} transfers, skipping", tx.hash, transfers.len());
        return None;
    }

    let sent = transfers
        .iter()
        .find(|t| t.from.eq_ignore_ascii_case(&wallet.address))?;
    let received = transfers
        .iter()
        .find(|t| t.to.eq_ignore_ascii_case(&wallet.address))?;
    if sent.contract_address.eq_ignore_ascii_case(&received.contract_address) {
        return None;
    }

    let trade_type = if EXIT_SYMBOLS.contains(received.token_symbol.to_lowercase().as_str()) {
        TradeDirection::Sell
    } else {
        TradeDirection::Buy
    };

    Some(DetectedTrade {
        tx_hash: tx.hash.to_lowercase(),
        wallet_address: wallet.address.clone(),
        wallet_name: wallet.label().to_string(),
        trade_type,
        token_in: sent.contract_address.to_lowercase(),
        token_out: received.contract_address.to_lowercase(),
        token_in_symbol: sent.token_symbol.clone(),
        token_out_symbol: received.token_symbol.clone(),
        token_in_decimals: sent.token_decimals,
        token_out_decimals: received.token_decimals,
        amount_in: sent.amount(),
        amount_out: received.amount(),
        amount_usd: 0.0,
        price_impact: 0.0,
        dex: dex_for_router(&tx.to).unwrap_or("unknown").to_string(),
        chain: network,
        block_number: tx.block_number,
        timestamp: unix_to_utc(tx.timestamp),
        gas_price_gwei: tx.gas_price / 1e9,
        wallet_weight: wallet.weight,
        confidence_score: 1.0,
    })
}

/// Every swap the wallet made in one poll's worth of activity
pub fn extract_trades(
    wallet: &TrackedWallet,
    activity: &ChainActivity,
    network: Network,
) -> Vec<DetectedTrade> {
    activity
        .transactions
        .iter()
        .filter(|tx| tx.from.eq_ignore_ascii_case(&wallet.address))
        .filter_map(|tx| {
            let transfers: Vec<&RawTransfer> = activity.transfers_for(&tx.hash).collect();
            analyze_transaction(wallet, tx, &transfers, network)
        })
        .collect()
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    pub const WALLET: &str = "0x00000000000000000000000000000000000000aa";
    pub const ROUTER: &str = "0x7a250d5630b4cf539739df2c5dacb4c659f2488d";

    pub fn transfer(hash: &str, from: &str, to: &str, token: &str, symbol: &str, value: &str) -> RawTransfer {
        RawTransfer {
            hash: hash.to_string(),
            block_number: 100,
            timestamp: 1_700_000_000,
            from: from.to_string(),
            to: to.to_string(),
            contract_address: token.to_string(),
            token_symbol: symbol.to_string(),
            token_decimals: 6,
            value: value.to_string(),
        }
    }

    pub fn swap_tx(hash: &str, to: &str, selector: &str) -> RawTransaction {
        RawTransaction {
            hash: hash.to_string(),
            block_number: 100,
            timestamp: 1_700_000_000,
            from: WALLET.to_string(),
            to: to.to_string(),
            input: format!("{}{}", selector, "00".repeat(32)),
            gas_price: 25e9,
            is_error: false,
        }
    }

    /// Wallet pays 1000 USDC for 50 TKN through Uniswap v2
    pub fn buy_activity(hash: &str) -> ChainActivity {
        ChainActivity {
            transactions: vec![swap_tx(hash, ROUTER, "0x38ed1739")],
            transfers: vec![
                transfer(hash, WALLET, "0xpool", "0xusdc", "USDC", "1000000000"),
                transfer(hash, "0xpool", WALLET, "0xtkn", "TKN", "50000000"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use crate::tracker::types::WalletType;

    fn wallet() -> TrackedWallet {
        TrackedWallet::new(WALLET, "whale", WalletType::Whale).with_weight(0.8)
    }

    #[test]
    fn test_recognizes_buy() {
        let trades = extract_trades(&wallet(), &buy_activity("0xAA"), Network::Ethereum);
        assert_eq!(trades.len(), 1);
        let t = &trades[0];
        assert_eq!(t.tx_hash, "0xaa");
        assert_eq!(t.trade_type, TradeDirection::Buy);
        assert_eq!(t.token_in, "0xusdc");
        assert_eq!(t.token_out, "0xtkn");
        assert_eq!(t.amount_in, 1000.0);
        assert_eq!(t.amount_out, 50.0);
        assert_eq!(t.dex, "uniswap_v2");
        assert_eq!(t.gas_price_gwei, 25.0);
        assert_eq!(t.wallet_weight, 0.8);
        assert_eq!(t.timestamp.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_receiving_stable_is_sell() {
        let hash = "0xbb";
        let activity = ChainActivity {
            transactions: vec![swap_tx(hash, ROUTER, "0x18cbafe5")],
            transfers: vec![
                transfer(hash, WALLET, "0xpool", "0xtkn", "TKN", "50000000"),
                transfer(hash, "0xpool", WALLET, "0xweth", "WETH", "1000000"),
            ],
        };
        let trades = extract_trades(&wallet(), &activity, Network::Ethereum);
        assert_eq!(trades[0].trade_type, TradeDirection::Sell);
        assert_eq!(trades[0].token_in, "0xtkn");
    }

    #[test]
    fn test_unknown_router_or_selector_ignored() {
        let mut activity = buy_activity("0xcc");
        activity.transactions[0].to = "0x0000000000000000000000000000000000000001".into();
        assert!(extract_trades(&wallet(), &activity, Network::Ethereum).is_empty());

        let mut activity = buy_activity("0xdd");
        activity.transactions[0].input = "0xa9059cbb".into();
        assert!(extract_trades(&wallet(), &activity, Network::Ethereum).is_empty());

        let mut activity = buy_activity("0xee");
        activity.transactions[0].is_error = true;
        assert!(extract_trades(&wallet(), &activity, Network::Ethereum).is_empty());
    }

    #[test]
    fn test_needs_two_legs() {
        let mut activity = buy_activity("0xff");
        activity.transfers.truncate(1);
        assert!(extract_trades(&wallet(), &activity, Network::Ethereum).is_empty());
    }
}
