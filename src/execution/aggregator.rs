//! 1inch swap API client (v6)
//!
//! API Documentation: https://portal.1inch.dev/documentation/apis/swap
//!
//! Amounts on the wire are integer base-unit strings. Bearer auth.
//! Rate limits apply - HTTP 429 surfaces as `RateLimited` so callers back off.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

use super::provider::SwapProvider;
use super::types::{parse_base_units, Network, Quote, SwapTransaction, TokenInfo};
use crate::error::{Error, Result};

/// 1inch API gateway
pub const ONEINCH_API_URL: &str = "https://api.1inch.dev";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteResponse {
    dst_amount: String,
    #[serde(default)]
    gas: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TxPayload {
    from: Option<String>,
    to: String,
    data: String,
    value: String,
    #[serde(default)]
    gas: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct SwapResponse {
    tx: TxPayload,
}

#[derive(Debug, Clone, Deserialize)]
struct AllowanceResponse {
    allowance: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ApproveResponse {
    to: String,
    data: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// 1inch aggregator client
pub struct OneInchClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    timeout: Duration,
}

impl OneInchClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .map_err(|e| Error::ConfigInvalid(format!("aggregator url '{}': {}", base_url, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Ok(Self {
            client,
            base_url,
            api_key,
            timeout,
        })
    }

    fn endpoint(&self, network: Network, path: &str) -> Result<Url> {
        self.base_url
            .join(&format!("swap/v6.0/{}/{}", network.chain_id(), path))
            .map_err(|e| Error::Internal(format!("bad aggregator path {}: {}", path, e)))
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, query: &[(&str, String)]) -> Result<T> {
        debug!("GET {}", url);
        let mut request = self.client.get(url).query(query);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::NetworkTimeout(self.timeout.as_millis() as u64)
            } else {
                Error::from(e)
            }
        })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::RateLimited("1inch".to_string()));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .ok()
                .and_then(|e| e.description.or(e.error))
                .unwrap_or(body);
            return Err(Error::Api {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|e| Error::Deserialization(format!("Failed to parse 1inch response: {}", e)))
    }
}

#[async_trait]
impl SwapProvider for OneInchClient {
    fn name(&self) -> &str {
        "1inch"
    }

    async fn get_quote(
        &self,
        src: &TokenInfo,
        dst: &TokenInfo,
        amount: f64,
        network: Network,
    ) -> Result<Quote> {
        let url = self.endpoint(network, "quote")?;
        let response: QuoteResponse = self
            .get(
                url,
                &[
                    ("src", src.address.clone()),
                    ("dst", dst.address.clone()),
                    ("amount", src.to_base_units(amount)),
                    ("includeGas", "true".to_string()),
                ],
            )
            .await?;

        let dst_amount = dst.from_base_units(&response.dst_amount)?;
        debug!(
            "1inch quote {} {} -> {} {}",
            amount, src.symbol, dst_amount, dst.symbol
        );
        Ok(Quote::new(
            network,
            src.clone(),
            dst.clone(),
            amount,
            dst_amount,
            response.gas.unwrap_or_default(),
        ))
    }

    async fn allowance(&self, token: &TokenInfo, owner: &str, network: Network) -> Result<u128> {
        let url = self.endpoint(network, "approve/allowance")?;
        let response: AllowanceResponse = self
            .get(
                url,
                &[
                    ("tokenAddress", token.address.clone()),
                    ("walletAddress", owner.to_string()),
                ],
            )
            .await?;
        parse_base_units(&response.allowance)
    }

    async fn build_approval(
        &self,
        token: &TokenInfo,
        raw_amount: u128,
        owner: &str,
        network: Network,
    ) -> Result<SwapTransaction> {
        let url = self.endpoint(network, "approve/transaction")?;
        let response: ApproveResponse = self
            .get(
                url,
                &[
                    ("tokenAddress", token.address.clone()),
                    ("amount", raw_amount.to_string()),
                ],
            )
            .await?;
        Ok(SwapTransaction {
            from: owner.to_string(),
            to: response.to,
            data: response.data,
            value: response.value,
            gas: None,
        })
    }

    async fn build_swap(
        &self,
        quote: &Quote,
        from: &str,
        slippage_pct: f64,
    ) -> Result<SwapTransaction> {
        let url = self.endpoint(quote.network, "swap")?;
        let response: SwapResponse = self
            .get(
                url,
                &[
                    ("src", quote.src_token.address.clone()),
                    ("dst", quote.dst_token.address.clone()),
                    ("amount", quote.src_base_units()),
                    ("from", from.to_string()),
                    ("origin", from.to_string()),
                    ("slippage", format!("{}", slippage_pct)),
                ],
            )
            .await?;
        Ok(SwapTransaction {
            from: response.tx.from.unwrap_or_else(|| from.to_string()),
            to: response.tx.to,
            data: response.tx.data,
            value: response.tx.value,
            gas: response.tx.gas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_layout() {
        let client = OneInchClient::new(ONEINCH_API_URL, None, Duration::from_secs(5)).unwrap();
        let url = client.endpoint(Network::Arbitrum, "approve/allowance").unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.1inch.dev/swap/v6.0/42161/approve/allowance"
        );
    }

    #[test]
    fn test_rejects_bad_base_url() {
        assert!(OneInchClient::new("not a url", None, Duration::from_secs(5)).is_err());
    }

    #[test]
    fn test_parses_wire_payloads() {
        let quote: QuoteResponse =
            serde_json::from_str(r#"{"dstAmount":"2500000","gas":181000}"#).unwrap();
        assert_eq!(quote.dst_amount, "2500000");
        assert_eq!(quote.gas, Some(181000));

        let swap: SwapResponse = serde_json::from_str(
            r#"{"dstAmount":"1","tx":{"from":"0xabc","to":"0xrouter","data":"0x12","value":"0","gas":200000,"gasPrice":"1"}}"#,
        )
        .unwrap();
        assert_eq!(swap.tx.to, "0xrouter");
        assert_eq!(swap.tx.gas, Some(200000));
    }
}
