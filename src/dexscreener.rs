// DexScreener API client for token USD prices
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::execution::Network;

const DEXSCREENER_BASE: &str = "https://api.dexscreener.com";

/// Anything that can price a token in USD
#[async_trait]
pub trait PriceSource: Send + Sync {
    /// `None` when no market is known for the token
    async fn price_usd(&self, network: Network, token_address: &str) -> Result<Option<f64>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceChange {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Liquidity {
    pub usd: Option<f64>,
    pub base: Option<f64>,
    pub quote: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Volume {
    pub m5: Option<f64>,
    pub h1: Option<f64>,
    pub h6: Option<f64>,
    pub h24: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseToken {
    pub address: String,
    pub name: Option<String>,
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DexPair {
    #[serde(rename = "chainId")]
    pub chain_id: String,
    #[serde(rename = "dexId")]
    pub dex_id: String,
    pub url: Option<String>,
    #[serde(rename = "pairAddress")]
    pub pair_address: String,
    #[serde(rename = "baseToken")]
    pub base_token: BaseToken,
    #[serde(rename = "priceNative")]
    pub price_native: Option<String>,
    #[serde(rename = "priceUsd")]
    pub price_usd: Option<String>,
    #[serde(rename = "priceChange")]
    pub price_change: Option<PriceChange>,
    pub volume: Option<Volume>,
    pub liquidity: Option<Liquidity>,
    #[serde(rename = "marketCap")]
    pub market_cap: Option<f64>,
    #[serde(rename = "fdv")]
    pub fdv: Option<f64>,
}

impl DexPair {
    pub fn usd_price(&self) -> Option<f64> {
        self.price_usd
            .as_deref()
            .and_then(|p| p.parse::<f64>().ok())
            .filter(|p| p.is_finite() && *p > 0.0)
    }

    pub fn liquidity_usd(&self) -> f64 {
        self.liquidity.as_ref().and_then(|l| l.usd).unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenPairsResponse {
    pub pairs: Option<Vec<DexPair>>,
}

/// Deepest pair on `network` where the token is the base asset
pub fn best_pair<'a>(pairs: &'a [DexPair], network: Network, token_address: &str) -> Option<&'a DexPair> {
    pairs
        .iter()
        .filter(|p| p.chain_id.eq_ignore_ascii_case(network.name()))
        .filter(|p| p.base_token.address.eq_ignore_ascii_case(token_address))
        .filter(|p| p.usd_price().is_some())
        .max_by(|a, b| a.liquidity_usd().total_cmp(&b.liquidity_usd()))
}

pub struct DexScreenerClient {
    client: reqwest::Client,
    base_url: String,
}

impl DexScreenerClient {
    pub fn new() -> Self {
        Self::with_base_url(DEXSCREENER_BASE)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch all pairs that trade `token_address`
    pub async fn get_token_pairs(&self, token_address: &str) -> Result<Vec<DexPair>> {
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, token_address);
        let resp = self.client.get(&url).send().await?;
        if resp.status().as_u16() == 429 {
            return Err(Error::RateLimited("dexscreener".to_string()));
        }
        let data: TokenPairsResponse = resp.json().await?;
        Ok(data.pairs.unwrap_or_default())
    }
}

impl Default for DexScreenerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PriceSource for DexScreenerClient {
    async fn price_usd(&self, network: Network, token_address: &str) -> Result<Option<f64>> {
        let pairs = self.get_token_pairs(token_address).await?;
        let price = best_pair(&pairs, network, token_address).and_then(DexPair::usd_price);
        debug!("DexScreener {} on {}: {:?}", token_address, network, price);
        Ok(price)
    }
}
