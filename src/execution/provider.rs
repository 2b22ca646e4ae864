//! Seams to the outside world
//!
//! The executor only sees these traits. Concrete HTTP implementations live in
//! `aggregator` and `chain`; tests plug in in-memory fakes.

use async_trait::async_trait;
use std::time::Duration;

use super::types::{Network, Quote, SwapTransaction, TokenInfo, TxReceipt};
use crate::error::Result;

/// Swap aggregator: prices routes and builds swap transactions
#[async_trait]
pub trait SwapProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn get_quote(
        &self,
        src: &TokenInfo,
        dst: &TokenInfo,
        amount: f64,
        network: Network,
    ) -> Result<Quote>;

    /// Base units of `token` the aggregator router may spend on behalf of `owner`
    async fn allowance(&self, token: &TokenInfo, owner: &str, network: Network) -> Result<u128>;

    async fn build_approval(
        &self,
        token: &TokenInfo,
        raw_amount: u128,
        owner: &str,
        network: Network,
    ) -> Result<SwapTransaction>;

    async fn build_swap(
        &self,
        quote: &Quote,
        from: &str,
        slippage_pct: f64,
    ) -> Result<SwapTransaction>;

    /// Build the swap for `quote` and hand it to the signer
    async fn submit_swap(
        &self,
        quote: &Quote,
        signer: &dyn Signer,
        slippage_pct: f64,
    ) -> Result<String> {
        let tx = self.build_swap(quote, signer.address(), slippage_pct).await?;
        signer.sign_and_submit(&tx, quote.network).await
    }
}

/// External custody. Keys never enter this crate.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> &str;

    /// Sign and broadcast, returning the transaction hash
    async fn sign_and_submit(&self, tx: &SwapTransaction, network: Network) -> Result<String>;
}

/// Read access to chain state
#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn native_balance(&self, owner: &str) -> Result<f64>;

    async fn token_balance(&self, token: &TokenInfo, owner: &str) -> Result<f64>;

    /// Poll until the transaction is mined or `timeout` elapses
    async fn wait_for_receipt(&self, tx_hash: &str, timeout: Duration) -> Result<TxReceipt>;

    async fn balance_of(&self, token: &TokenInfo, owner: &str) -> Result<f64> {
        if token.is_native() {
            self.native_balance(owner).await
        } else {
            self.token_balance(token, owner).await
        }
    }

    /// Balance in integer base units
    async fn raw_balance_of(&self, token: &TokenInfo, owner: &str) -> Result<u128> {
        Ok(token.to_raw(self.balance_of(token, owner).await?))
    }
}
