//! EVM JSON-RPC client
//!
//! Balance reads and receipt polling. `NodeSigner` forwards transactions to a
//! node-managed account via `eth_sendTransaction`, so custody stays with the node.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::provider::{ChainClient, Signer};
use super::types::{Network, SwapTransaction, TokenInfo, TxReceipt};
use crate::error::{Error, Result};

/// ERC-20 `balanceOf(address)` selector
const BALANCE_OF_SELECTOR: &str = "0x70a08231";

const RECEIPT_POLL_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Parse a `0x`-prefixed hex quantity. Accumulates in f64 so uint256 never overflows.
pub fn hex_to_f64(hex: &str) -> Result<f64> {
    let digits = hex.trim().trim_start_matches("0x");
    if digits.is_empty() {
        return Ok(0.0);
    }
    digits.chars().try_fold(0.0f64, |acc, c| {
        c.to_digit(16)
            .map(|d| acc * 16.0 + d as f64)
            .ok_or_else(|| Error::Deserialization(format!("invalid hex quantity '{}'", hex)))
    })
}

/// Parse a hex quantity exactly; uint256 values past `u128::MAX` saturate
pub fn hex_to_u128(hex: &str) -> Result<u128> {
    let digits = hex.trim().trim_start_matches("0x").trim_start_matches('0');
    if !digits.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(Error::Deserialization(format!("invalid hex quantity '{}'", hex)));
    }
    if digits.is_empty() {
        return Ok(0);
    }
    Ok(u128::from_str_radix(digits, 16).unwrap_or(u128::MAX))
}

fn hex_to_u64(hex: &str) -> Result<u64> {
    u64::from_str_radix(hex.trim().trim_start_matches("0x"), 16)
        .map_err(|_| Error::Deserialization(format!("invalid hex quantity '{}'", hex)))
}

/// `balanceOf(owner)` call data
fn balance_of_calldata(owner: &str) -> String {
    format!(
        "{}{:0>64}",
        BALANCE_OF_SELECTOR,
        owner.trim_start_matches("0x").to_lowercase()
    )
}

fn decimal_to_hex(value: &str) -> String {
    match value.trim().parse::<u128>() {
        Ok(v) => format!("0x{:x}", v),
        Err(_) => "0x0".to_string(),
    }
}

/// JSON-RPC endpoint for one network
pub struct JsonRpcClient {
    client: Client,
    url: String,
    network: Network,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(url: impl Into<String>, network: Network, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
            network,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn network(&self) -> Network {
        self.network
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!("RPC {} #{}", method, id);

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("{} response: {}", method, e)))?;

        if let Some(err) = response.error {
            if err.code == -32005 || err.message.to_lowercase().contains("rate limit") {
                return Err(Error::RateLimited(format!("rpc {}", method)));
            }
            return Err(Error::Api {
                status: 200,
                message: format!("{} failed ({}): {}", method, err.code, err.message),
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn receipt(&self, tx_hash: &str) -> Result<Option<TxReceipt>> {
        let value = self
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;
        if value.is_null() {
            return Ok(None);
        }

        let field = |name: &str| value.get(name).and_then(Value::as_str).unwrap_or("0x0");
        let success = hex_to_u64(field("status"))? == 1;
        Ok(Some(TxReceipt {
            tx_hash: tx_hash.to_string(),
            success,
            block_number: hex_to_u64(field("blockNumber"))?,
            gas_used: hex_to_u64(field("gasUsed"))?,
            effective_gas_price_gwei: hex_to_f64(field("effectiveGasPrice"))? / 1e9,
        }))
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn native_balance(&self, owner: &str) -> Result<f64> {
        let value = self
            .call("eth_getBalance", json!([owner, "latest"]))
            .await?;
        let raw = value.as_str().unwrap_or("0x0");
        Ok(hex_to_f64(raw)? / 1e18)
    }

    async fn token_balance(&self, token: &TokenInfo, owner: &str) -> Result<f64> {
        let value = self
            .call(
                "eth_call",
                json!([{ "to": token.address, "data": balance_of_calldata(owner) }, "latest"]),
            )
            .await?;
        let raw = value.as_str().unwrap_or("0x0");
        Ok(hex_to_f64(raw)? / 10f64.powi(token.decimals as i32))
    }

    async fn raw_balance_of(&self, token: &TokenInfo, owner: &str) -> Result<u128> {
        let value = if token.is_native() {
            self.call("eth_getBalance", json!([owner, "latest"])).await?
        } else {
            self.call(
                "eth_call",
                json!([{ "to": token.address, "data": balance_of_calldata(owner) }, "latest"]),
            )
            .await?
        };
        hex_to_u128(value.as_str().unwrap_or("0x0"))
    }

    async fn wait_for_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<TxReceipt> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(receipt) = self.receipt(tx_hash).await? {
                if !receipt.success {
                    return Err(Error::TransactionReverted(format!(
                        "{} reverted in block {}",
                        tx_hash, receipt.block_number
                    )));
                }
                info!(
                    "Confirmed {} in block {} (gas {})",
                    tx_hash, receipt.block_number, receipt.gas_used
                );
                return Ok(receipt);
            }
            if tokio::time::Instant::now() + RECEIPT_POLL_INTERVAL > deadline {
                return Err(Error::NetworkTimeout(timeout.as_millis() as u64));
            }
            tokio::time::sleep(RECEIPT_POLL_INTERVAL).await;
        }
    }
}

/// Signs through an account unlocked on the node (or an external signer proxy)
pub struct NodeSigner {
    rpc: JsonRpcClient,
    address: String,
}

impl NodeSigner {
    pub fn new(rpc: JsonRpcClient, address: impl Into<String>) -> Self {
        Self {
            rpc,
            address: address.into().to_lowercase(),
        }
    }
}

#[async_trait]
impl Signer for NodeSigner {
    fn address(&self) -> &str {
        &self.address
    }

    async fn sign_and_submit(&self, tx: &SwapTransaction, network: Network) -> Result<String> {
        if network != self.rpc.network() {
            return Err(Error::Signing(format!(
                "signer is on {} but transaction targets {}",
                self.rpc.network(),
                network
            )));
        }

        let mut payload = json!({
            "from": self.address,
            "to": tx.to,
            "data": tx.data,
            "value": decimal_to_hex(&tx.value),
        });
        if let Some(gas) = tx.gas {
            payload["gas"] = json!(format!("0x{:x}", gas));
        }

        let value = self
            .rpc
            .call("eth_sendTransaction", json!([payload]))
            .await
            .map_err(|e| match e {
                Error::Api { message, .. } => Error::Signing(message),
                other => other,
            })?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Signing("node returned no transaction hash".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_quantities() {
        assert_eq!(hex_to_f64("0x0").unwrap(), 0.0);
        assert_eq!(hex_to_f64("0xde0b6b3a7640000").unwrap(), 1e18);
        assert_eq!(hex_to_f64("0x").unwrap(), 0.0);
        assert!(hex_to_f64("0xzz").is_err());
        assert_eq!(hex_to_u64("0x1b4").unwrap(), 436);
    }

    #[test]
    fn test_hex_to_u128_is_exact() {
        // 3240221179638777824505, not representable as f64
        assert_eq!(hex_to_u128("0xafa71a1b743286c4f9").unwrap(), 3240221179638777824505);
        assert_eq!(hex_to_u128("0x").unwrap(), 0);
        assert_eq!(hex_to_u128(&format!("0x{}", "f".repeat(64))).unwrap(), u128::MAX);
        assert_eq!(hex_to_u128(&format!("0x{:0>64}", "10")).unwrap(), 16);
        assert!(hex_to_u128("0xzz").is_err());
    }

    #[test]
    fn test_balance_of_calldata() {
        let data = balance_of_calldata("0xAbC0000000000000000000000000000000000001");
        assert!(data.starts_with("0x70a08231"));
        assert_eq!(data.len(), 10 + 64);
        assert!(data.ends_with("abc0000000000000000000000000000000000001"));
    }

    #[test]
    fn test_decimal_to_hex() {
        assert_eq!(decimal_to_hex("255"), "0xff");
        assert_eq!(decimal_to_hex("junk"), "0x0");
    }
}
