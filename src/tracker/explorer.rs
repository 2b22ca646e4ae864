//! Etherscan-compatible explorer client
//!
//! Each poll makes two calls per wallet: `tokentx` (ERC-20 transfers) and
//! `txlist` (normal transactions). Every field on the wire is a string.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::Value;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use url::Url;

use super::types::{ChainActivity, RawTransaction, RawTransfer};
use crate::error::{Error, Result};
use crate::execution::Network;

const PAGE_SIZE: u32 = 100;
const END_BLOCK: u64 = 99_999_999;
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 5;

/// Spaces calls at least `1 / rate` seconds apart
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn per_second(rate: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / rate.max(1) as f64),
            next_slot: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait for the next free slot
    pub async fn acquire(&self) {
        let wait_until = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        tokio::time::sleep_until(wait_until).await;
    }
}

/// Source of recent on-chain activity for a wallet
#[async_trait]
pub trait ChainActivitySource: Send + Sync {
    fn network(&self) -> Network;

    /// Transactions and transfers at or after `since_block`
    async fn list_recent_activity(&self, wallet: &str, since_block: u64) -> Result<ChainActivity>;
}

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    message: String,
    result: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenTxRow {
    block_number: String,
    time_stamp: String,
    hash: String,
    from: String,
    to: String,
    contract_address: String,
    token_symbol: String,
    token_decimal: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TxRow {
    block_number: String,
    time_stamp: String,
    hash: String,
    from: String,
    #[serde(default)]
    to: String,
    #[serde(default)]
    input: String,
    #[serde(default)]
    gas_price: String,
    #[serde(default)]
    is_error: String,
}

impl From<TokenTxRow> for RawTransfer {
    fn from(row: TokenTxRow) -> Self {
        RawTransfer {
            hash: row.hash.to_lowercase(),
            block_number: row.block_number.parse().unwrap_or(0),
            timestamp: row.time_stamp.parse().unwrap_or(0),
            from: row.from.to_lowercase(),
            to: row.to.to_lowercase(),
            contract_address: row.contract_address.to_lowercase(),
            token_symbol: row.token_symbol,
            token_decimals: row.token_decimal.parse().unwrap_or(18),
            value: row.value,
        }
    }
}

impl From<TxRow> for RawTransaction {
    fn from(row: TxRow) -> Self {
        RawTransaction {
            hash: row.hash.to_lowercase(),
            block_number: row.block_number.parse().unwrap_or(0),
            timestamp: row.time_stamp.parse().unwrap_or(0),
            from: row.from.to_lowercase(),
            to: row.to.to_lowercase(),
            input: row.input,
            gas_price: row.gas_price.parse().unwrap_or(0.0),
            is_error: row.is_error == "1",
        }
    }
}

/// Unwrap an explorer response into its rows
fn parse_rows<T: DeserializeOwned>(envelope: Envelope) -> Result<Vec<T>> {
    if envelope.status == "1" {
        return serde_json::from_value(envelope.result)
            .map_err(|e| Error::Deserialization(format!("explorer rows: {}", e)));
    }

    let detail = envelope.result.as_str().unwrap_or_default().to_string();
    let no_rows = envelope.result.as_array().is_some_and(|r| r.is_empty());
    if no_rows || envelope.message.starts_with("No transactions found") {
        return Ok(Vec::new());
    }
    if detail.to_lowercase().contains("rate limit") {
        return Err(Error::RateLimited("explorer".to_string()));
    }
    Err(Error::Api {
        status: 200,
        message: if detail.is_empty() { envelope.message } else { detail },
    })
}

/// Etherscan-family HTTP client (etherscan, bscscan, arbiscan, basescan, ...)
pub struct EtherscanClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    network: Network,
    timeout: Duration,
    throttle: Throttle,
}

impl EtherscanClient {
    /// `base_url` defaults to the network's explorer API
    pub fn new(
        base_url: Option<&str>,
        api_key: Option<String>,
        network: Network,
        timeout: Duration,
    ) -> Result<Self> {
        let raw = base_url.unwrap_or(network.explorer_api_url());
        let base_url = Url::parse(raw)
            .map_err(|e| Error::ConfigInvalid(format!("explorer url '{}': {}", raw, e)))?;
        Ok(Self {
            client: Client::builder().timeout(timeout).build().unwrap_or_default(),
            base_url,
            api_key,
            network,
            timeout,
            throttle: Throttle::per_second(DEFAULT_REQUESTS_PER_SECOND),
        })
    }

    pub fn with_rate_limit(mut self, requests_per_second: u32) -> Self {
        self.throttle = Throttle::per_second(requests_per_second);
        self
    }

    async fn account_query<T: DeserializeOwned>(
        &self,
        action: &str,
        wallet: &str,
        since_block: u64,
    ) -> Result<Vec<T>> {
        let mut query = vec![
            ("module", "account".to_string()),
            ("action", action.to_string()),
            ("address", wallet.to_string()),
            ("startblock", since_block.to_string()),
            ("endblock", END_BLOCK.to_string()),
            ("page", "1".to_string()),
            ("offset", PAGE_SIZE.to_string()),
            ("sort", "desc".to_string()),
        ];
        if let Some(key) = &self.api_key {
            query.push(("apikey", key.clone()));
        }

        self.throttle.acquire().await;
        debug!("{} {} for {} since block {}", self.network, action, wallet, since_block);
        let response = self
            .client
            .get(self.base_url.clone())
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::NetworkTimeout(self.timeout.as_millis() as u64)
                } else {
                    Error::from(e)
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited("explorer".to_string()));
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: Envelope = response
            .json()
            .await
            .map_err(|e| Error::Deserialization(format!("explorer response: {}", e)))?;
        parse_rows(envelope)
    }
}

#[async_trait]
impl ChainActivitySource for EtherscanClient {
    fn network(&self) -> Network {
        self.network
    }

    async fn list_recent_activity(&self, wallet: &str, since_block: u64) -> Result<ChainActivity> {
        let transfers: Vec<TokenTxRow> = self.account_query("tokentx", wallet, since_block).await?;
        let transactions: Vec<TxRow> = self.account_query("txlist", wallet, since_block).await?;
        Ok(ChainActivity {
            transactions: transactions.into_iter().map(RawTransaction::from).collect(),
            transfers: transfers.into_iter().map(RawTransfer::from).collect(),
        })
    }
}
