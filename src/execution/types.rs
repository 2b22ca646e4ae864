//! Shared execution types: networks, tokens, orders, quotes and results

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// Quotes are honoured for this long after they are issued
pub const QUOTE_VALIDITY_SECS: i64 = 30;

/// Placeholder address aggregators use for the chain's native coin
pub const NATIVE_TOKEN_ADDRESS: &str = "0xeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeeee";

/// Supported EVM networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ethereum,
    Bsc,
    Polygon,
    Arbitrum,
    Base,
    Optimism,
}

impl Network {
    pub const ALL: [Network; 6] = [
        Network::Ethereum,
        Network::Bsc,
        Network::Polygon,
        Network::Arbitrum,
        Network::Base,
        Network::Optimism,
    ];

    pub fn chain_id(&self) -> u64 {
        match self {
            Network::Ethereum => 1,
            Network::Bsc => 56,
            Network::Polygon => 137,
            Network::Arbitrum => 42161,
            Network::Base => 8453,
            Network::Optimism => 10,
        }
    }

    pub fn from_chain_id(chain_id: u64) -> Option<Self> {
        Self::ALL.into_iter().find(|n| n.chain_id() == chain_id)
    }

    /// Lowercase name, also the DexScreener chain slug
    pub fn name(&self) -> &'static str {
        match self {
            Network::Ethereum => "ethereum",
            Network::Bsc => "bsc",
            Network::Polygon => "polygon",
            Network::Arbitrum => "arbitrum",
            Network::Base => "base",
            Network::Optimism => "optimism",
        }
    }

    pub fn native_symbol(&self) -> &'static str {
        match self {
            Network::Bsc => "BNB",
            Network::Polygon => "POL",
            _ => "ETH",
        }
    }

    /// Etherscan-family API endpoint for the chain
    pub fn explorer_api_url(&self) -> &'static str {
        match self {
            Network::Ethereum => "https://api.etherscan.io/api",
            Network::Bsc => "https://api.bscscan.com/api",
            Network::Polygon => "https://api.polygonscan.com/api",
            Network::Arbitrum => "https://api.arbiscan.io/api",
            Network::Base => "https://api.basescan.org/api",
            Network::Optimism => "https://api-optimistic.etherscan.io/api",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Network {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let lowered = s.trim().to_lowercase();
        if let Ok(id) = lowered.parse::<u64>() {
            return Self::from_chain_id(id)
                .ok_or_else(|| Error::ConfigInvalid(format!("unsupported chain id {}", id)));
        }
        match lowered.as_str() {
            "ethereum" | "eth" | "mainnet" => Ok(Network::Ethereum),
            "bsc" | "binance" => Ok(Network::Bsc),
            "polygon" | "matic" => Ok(Network::Polygon),
            "arbitrum" => Ok(Network::Arbitrum),
            "base" => Ok(Network::Base),
            "optimism" => Ok(Network::Optimism),
            other => Err(Error::ConfigInvalid(format!("unknown network '{}'", other))),
        }
    }
}

/// ERC-20 (or native) token metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenInfo {
    pub address: String,
    pub symbol: String,
    pub decimals: u8,
}

impl TokenInfo {
    pub fn new(address: impl Into<String>, symbol: impl Into<String>, decimals: u8) -> Self {
        Self {
            address: address.into().to_lowercase(),
            symbol: symbol.into(),
            decimals,
        }
    }

    pub fn native(network: Network) -> Self {
        Self::new(NATIVE_TOKEN_ADDRESS, network.native_symbol(), 18)
    }

    pub fn is_native(&self) -> bool {
        self.address.eq_ignore_ascii_case(NATIVE_TOKEN_ADDRESS)
    }

    /// Native USDC on each network; the default quote currency
    pub fn usdc(network: Network) -> Self {
        match network {
            Network::Ethereum => Self::new("0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "USDC", 6),
            Network::Bsc => Self::new("0x8ac76a51cc950d9822d68b83fe1ad97b32cd580d", "USDC", 18),
            Network::Polygon => Self::new("0x3c499c542cef5e3811e1192ce70d8cc03d5c3359", "USDC", 6),
            Network::Arbitrum => Self::new("0xaf88d065e77c8cc2239327c5edb3a432268e5831", "USDC", 6),
            Network::Base => Self::new("0x833589fcd6edb6e08f4c7c32d4f71b54bda02913", "USDC", 6),
            Network::Optimism => Self::new("0x0b2c639c533813f4aa9d7837caf62653d097ff85", "USDC", 6),
        }
    }

    /// Human amount to integer base units, floored. Saturates at `u128::MAX`.
    pub fn to_raw(&self, amount: f64) -> u128 {
        if !amount.is_finite() || amount <= 0.0 {
            return 0;
        }
        (amount * 10f64.powi(self.decimals as i32)).floor() as u128
    }

    /// Human amount to integer base units, as the decimal string APIs expect
    pub fn to_base_units(&self, amount: f64) -> String {
        self.to_raw(amount).to_string()
    }

    pub fn raw_to_amount(&self, raw: u128) -> f64 {
        raw as f64 / 10f64.powi(self.decimals as i32)
    }

    /// Integer base-unit string back to a human amount
    pub fn from_base_units(&self, raw: &str) -> Result<f64> {
        let value: f64 = raw
            .trim()
            .parse()
            .map_err(|_| Error::Deserialization(format!("invalid token amount '{}'", raw)))?;
        Ok(value / 10f64.powi(self.decimals as i32))
    }
}

/// Parse an integer base-unit string exactly.
///
/// uint256 values past `u128::MAX` (unlimited allowances) saturate.
pub fn parse_base_units(raw: &str) -> Result<u128> {
    let digits = raw.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::Deserialization(format!("invalid token amount '{}'", raw)));
    }
    Ok(digits.parse::<u128>().unwrap_or(u128::MAX))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

/// Where an order came from; carried through to the result for routing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OrderSource {
    Strategy {
        strategy_id: String,
        signal_id: String,
        grid_level: Option<usize>,
    },
    CopyTrade {
        source_tx_hash: String,
        wallet_address: String,
    },
    /// Stop-loss or take-profit exit raised by a position monitor
    RiskExit {
        position_id: String,
        reason: String,
    },
    Manual,
}

impl OrderSource {
    pub fn signal_id(&self) -> Option<&str> {
        match self {
            OrderSource::Strategy { signal_id, .. } => Some(signal_id),
            _ => None,
        }
    }
}

/// A sized swap request ready for the executor.
///
/// `amount` is in the *source* token: quote currency for buys, target
/// tokens for sells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub source: OrderSource,
    /// Ledger the fill is booked against
    pub ledger_id: String,
    pub side: OrderSide,
    pub network: Network,
    pub token: TokenInfo,
    pub quote_token: TokenInfo,
    pub amount: f64,
    pub max_slippage_pct: f64,
    /// Price the decision was made at, quote per token
    pub reference_price: Option<f64>,
    /// Buys merge into this position; sells close (part of) it
    pub position_id: Option<String>,
    /// Simulate even when the executor is live
    #[serde(default)]
    pub simulate_only: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        source: OrderSource,
        ledger_id: impl Into<String>,
        side: OrderSide,
        network: Network,
        token: TokenInfo,
        quote_token: TokenInfo,
        amount: f64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            ledger_id: ledger_id.into(),
            side,
            network,
            token,
            quote_token,
            amount,
            max_slippage_pct: 2.0,
            reference_price: None,
            position_id: None,
            simulate_only: false,
            created_at: Utc::now(),
            expires_at: None,
        }
    }

    pub fn simulated(mut self, simulate_only: bool) -> Self {
        self.simulate_only = simulate_only;
        self
    }

    pub fn with_slippage(mut self, pct: f64) -> Self {
        self.max_slippage_pct = pct;
        self
    }

    pub fn with_reference_price(mut self, price: f64) -> Self {
        if price > 0.0 {
            self.reference_price = Some(price);
        }
        self
    }

    pub fn with_position(mut self, position_id: impl Into<String>) -> Self {
        self.position_id = Some(position_id.into());
        self
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// (source, destination) of the swap
    pub fn route(&self) -> (&TokenInfo, &TokenInfo) {
        match self.side {
            OrderSide::Buy => (&self.quote_token, &self.token),
            OrderSide::Sell => (&self.token, &self.quote_token),
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|t| now >= t).unwrap_or(false)
    }
}

/// Priced swap offer from an aggregator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub network: Network,
    pub src_token: TokenInfo,
    pub dst_token: TokenInfo,
    pub src_amount: f64,
    pub dst_amount: f64,
    pub gas_estimate: u64,
    pub quoted_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Exact input in base units when it must not be derived from `src_amount`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_raw: Option<u128>,
}

impl Quote {
    pub fn new(
        network: Network,
        src_token: TokenInfo,
        dst_token: TokenInfo,
        src_amount: f64,
        dst_amount: f64,
        gas_estimate: u64,
    ) -> Self {
        let quoted_at = Utc::now();
        Self {
            network,
            src_token,
            dst_token,
            src_amount,
            dst_amount,
            gas_estimate,
            quoted_at,
            valid_until: quoted_at + Duration::seconds(QUOTE_VALIDITY_SECS),
            src_raw: None,
        }
    }

    pub fn with_src_raw(mut self, raw: u128) -> Self {
        self.src_raw = Some(raw);
        self
    }

    /// Input amount as the base-unit string a swap is built with
    pub fn src_base_units(&self) -> String {
        match self.src_raw {
            Some(raw) => raw.to_string(),
            None => self.src_token.to_base_units(self.src_amount),
        }
    }

    /// Quote-currency price of one target token for an order on `side`
    pub fn price_for(&self, side: OrderSide) -> f64 {
        let (quote_amount, token_amount) = match side {
            OrderSide::Buy => (self.src_amount, self.dst_amount),
            OrderSide::Sell => (self.dst_amount, self.src_amount),
        };
        if token_amount > 0.0 {
            quote_amount / token_amount
        } else {
            0.0
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.valid_until
    }

    pub fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(Error::QuoteExpired(format!(
                "{} -> {} quote expired at {}",
                self.src_token.symbol, self.dst_token.symbol, self.valid_until
            )));
        }
        Ok(())
    }
}

/// Unsigned transaction built by an aggregator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapTransaction {
    pub from: String,
    pub to: String,
    pub data: String,
    /// Wei, decimal string
    pub value: String,
    pub gas: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    pub success: bool,
    pub block_number: u64,
    pub gas_used: u64,
    pub effective_gas_price_gwei: f64,
}

impl TxReceipt {
    /// Gas paid in native units
    pub fn gas_cost(&self) -> f64 {
        self.gas_used as f64 * self.effective_gas_price_gwei / 1e9
    }
}

/// Terminal record of one execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub id: String,
    pub order_id: String,
    pub ledger_id: String,
    pub source: OrderSource,
    pub side: OrderSide,
    pub network: Network,
    pub token_address: String,
    pub token_symbol: String,
    pub success: bool,
    pub tx_hash: Option<String>,
    pub amount_in: f64,
    pub amount_out: f64,
    /// Quote currency per token
    pub executed_price: f64,
    pub gas_used: u64,
    pub gas_cost: f64,
    pub slippage_pct: f64,
    pub is_dry_run: bool,
    pub position_id: Option<String>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    /// Set when the swap filled but the ledger refused the booking
    #[serde(default)]
    pub booking_error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl ExecutionResult {
    fn base(order: &Order, is_dry_run: bool, started_at: DateTime<Utc>) -> Self {
        let finished_at = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            order_id: order.id.clone(),
            ledger_id: order.ledger_id.clone(),
            source: order.source.clone(),
            side: order.side,
            network: order.network,
            token_address: order.token.address.clone(),
            token_symbol: order.token.symbol.clone(),
            success: false,
            tx_hash: None,
            amount_in: order.amount,
            amount_out: 0.0,
            executed_price: 0.0,
            gas_used: 0,
            gas_cost: 0.0,
            slippage_pct: 0.0,
            is_dry_run,
            position_id: order.position_id.clone(),
            error: None,
            error_code: None,
            booking_error: None,
            started_at,
            finished_at,
            duration_ms: (finished_at - started_at).num_milliseconds(),
        }
    }

    pub fn failure(order: &Order, error: &Error, is_dry_run: bool, started_at: DateTime<Utc>) -> Self {
        let mut result = Self::base(order, is_dry_run, started_at);
        result.error = Some(error.to_string());
        result.error_code = Some(error.code().to_string());
        result
    }

    pub fn filled(order: &Order, fill: Fill, is_dry_run: bool, started_at: DateTime<Utc>) -> Self {
        let mut result = Self::base(order, is_dry_run, started_at);
        result.success = true;
        result.tx_hash = Some(fill.tx_hash);
        result.amount_out = fill.amount_out;
        result.executed_price = fill.executed_price;
        result.gas_used = fill.gas_used;
        result.gas_cost = fill.gas_cost;
        result.slippage_pct = fill.slippage_pct;
        result
    }

    /// (quote currency, tokens) moved by this fill
    pub fn quote_and_tokens(&self) -> (f64, f64) {
        match self.side {
            OrderSide::Buy => (self.amount_in, self.amount_out),
            OrderSide::Sell => (self.amount_out, self.amount_in),
        }
    }
}

/// Outcome of a settled swap, before it becomes an `ExecutionResult`
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub tx_hash: String,
    pub amount_out: f64,
    pub executed_price: f64,
    pub gas_used: u64,
    pub gas_cost: f64,
    pub slippage_pct: f64,
}

/// Realized slippage of `actual` against `expected` output, percent, never negative
pub fn realized_slippage_pct(expected: f64, actual: f64) -> f64 {
    if expected <= 0.0 {
        return 0.0;
    }
    ((expected - actual) / expected * 100.0).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usdc() -> TokenInfo {
        TokenInfo::new("0xA0b86991c6218b36c1d19D4a2e9Eb0cE3606eB48", "USDC", 6)
    }

    fn pepe() -> TokenInfo {
        TokenInfo::new("0x6982508145454ce325ddbe47a25d4ec3d2311933", "PEPE", 18)
    }

    #[test]
    fn test_network_lookup() {
        assert_eq!(Network::from_chain_id(8453), Some(Network::Base));
        assert_eq!("Arbitrum".parse::<Network>().unwrap(), Network::Arbitrum);
        assert_eq!("137".parse::<Network>().unwrap(), Network::Polygon);
        assert!("solana".parse::<Network>().is_err());
        assert_eq!(Network::Bsc.to_string(), "bsc");
    }

    #[test]
    fn test_base_unit_conversion() {
        let token = usdc();
        assert_eq!(token.address, "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");
        assert_eq!(token.to_base_units(12.5), "12500000");
        assert_eq!(token.to_base_units(-1.0), "0");
        assert_eq!(token.from_base_units("12500000").unwrap(), 12.5);
        assert!(token.from_base_units("abc").is_err());
    }

    #[test]
    fn test_exact_base_units() {
        assert_eq!(parse_base_units("3240221179638777824505").unwrap(), 3240221179638777824505);
        assert_eq!(
            parse_base_units(&"9".repeat(78)).unwrap(),
            u128::MAX,
            "unlimited allowance saturates"
        );
        assert!(parse_base_units("-1").is_err());
        assert!(parse_base_units("1e18").is_err());

        // A pinned input survives where the float round trip drifts
        let raw = 3240221179638777824505u128;
        let amount = pepe().raw_to_amount(raw);
        assert_ne!(pepe().to_raw(amount), raw);
        let quote = Quote::new(Network::Ethereum, pepe(), usdc(), amount, 1.0, 0);
        assert_eq!(quote.src_base_units(), pepe().to_base_units(amount));
        assert_eq!(quote.with_src_raw(raw).src_base_units(), "3240221179638777824505");
    }

    #[test]
    fn test_order_route_and_quote_price() {
        let order = Order::new(
            OrderSource::Manual,
            "manual",
            OrderSide::Buy,
            Network::Ethereum,
            pepe(),
            usdc(),
            100.0,
        );
        let (src, dst) = order.route();
        assert_eq!(src.symbol, "USDC");
        assert_eq!(dst.symbol, "PEPE");

        let quote = Quote::new(Network::Ethereum, usdc(), pepe(), 100.0, 50.0, 150_000);
        assert_eq!(quote.price_for(OrderSide::Buy), 2.0);
        let sell = Quote::new(Network::Ethereum, pepe(), usdc(), 50.0, 90.0, 150_000);
        assert_eq!(sell.price_for(OrderSide::Sell), 1.8);
    }

    #[test]
    fn test_quote_expiry() {
        let quote = Quote::new(Network::Ethereum, usdc(), pepe(), 1.0, 1.0, 0);
        assert!(quote.ensure_fresh(quote.quoted_at).is_ok());
        let later = quote.quoted_at + Duration::seconds(QUOTE_VALIDITY_SECS);
        let err = quote.ensure_fresh(later).unwrap_err();
        assert!(matches!(err, Error::QuoteExpired(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_failure_result_carries_code() {
        let order = Order::new(
            OrderSource::Manual,
            "manual",
            OrderSide::Sell,
            Network::Base,
            pepe(),
            usdc(),
            10.0,
        );
        let err = Error::InsufficientBalance {
            available: 1.0,
            required: 10.0,
        };
        let result = ExecutionResult::failure(&order, &err, false, Utc::now());
        assert!(!result.success);
        assert_eq!(result.error_code.as_deref(), Some("INSUFFICIENT_BALANCE"));
        assert_eq!(result.quote_and_tokens(), (0.0, 10.0));
    }

    #[test]
    fn test_realized_slippage() {
        assert_eq!(realized_slippage_pct(100.0, 98.0), 2.0);
        assert_eq!(realized_slippage_pct(100.0, 101.0), 0.0);
        assert_eq!(realized_slippage_pct(0.0, 5.0), 0.0);
    }
}
