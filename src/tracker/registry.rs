//! Wallet registry for copy-trading
//!
//! Holds the wallets the detector polls, keyed by lower-cased address.

use dashmap::DashMap;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::info;

use super::types::TrackedWallet;
use crate::error::{Error, Result};

lazy_static! {
    static ref ADDRESS_RE: Regex =
        Regex::new(r"^0x[0-9a-fA-F]{40}$").expect("Invalid address regex");
}

pub fn is_valid_address(address: &str) -> bool {
    ADDRESS_RE.is_match(address)
}

/// Concurrent set of tracked wallets
#[derive(Default)]
pub struct WalletRegistry {
    wallets: DashMap<String, TrackedWallet>,
}

impl WalletRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured wallets, rejecting malformed addresses
    pub fn from_wallets(wallets: impl IntoIterator<Item = TrackedWallet>) -> Result<Self> {
        let registry = Self::new();
        for wallet in wallets {
            registry.add(wallet)?;
        }
        info!("Wallet registry initialized with {} wallets", registry.len());
        Ok(registry)
    }

    /// Add or replace a wallet
    pub fn add(&self, mut wallet: TrackedWallet) -> Result<()> {
        if !is_valid_address(&wallet.address) {
            return Err(Error::ConfigInvalid(format!(
                "Invalid wallet address: {}",
                wallet.address
            )));
        }
        wallet.address = wallet.address.to_lowercase();
        info!("Tracking wallet {} ({})", wallet.label(), wallet.address);
        self.wallets.insert(wallet.address.clone(), wallet);
        Ok(())
    }

    pub fn remove(&self, address: &str) -> Option<TrackedWallet> {
        let removed = self.wallets.remove(&address.to_lowercase()).map(|(_, w)| w);
        if let Some(w) = &removed {
            info!("Stopped tracking wallet {}", w.label());
        }
        removed
    }

    /// Returns false when the wallet is unknown
    pub fn set_enabled(&self, address: &str, enabled: bool) -> bool {
        match self.wallets.get_mut(&address.to_lowercase()) {
            Some(mut w) => {
                w.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn enable(&self, address: &str) -> bool {
        self.set_enabled(address, true)
    }

    pub fn disable(&self, address: &str) -> bool {
        self.set_enabled(address, false)
    }

    pub fn get(&self, address: &str) -> Option<TrackedWallet> {
        self.wallets.get(&address.to_lowercase()).map(|w| w.clone())
    }

    pub fn contains(&self, address: &str) -> bool {
        self.wallets.contains_key(&address.to_lowercase())
    }

    /// Enabled wallets, sorted by address for a stable poll order
    pub fn enabled(&self) -> Vec<TrackedWallet> {
        let mut wallets: Vec<TrackedWallet> = self
            .wallets
            .iter()
            .filter(|w| w.enabled)
            .map(|w| w.clone())
            .collect();
        wallets.sort_by(|a, b| a.address.cmp(&b.address));
        wallets
    }

    pub fn all(&self) -> Vec<TrackedWallet> {
        self.wallets.iter().map(|w| w.clone()).collect()
    }

    pub fn record_detection(&self, address: &str) {
        if let Some(mut w) = self.wallets.get_mut(&address.to_lowercase()) {
            w.trades_detected += 1;
        }
    }

    pub fn len(&self) -> usize {
        self.wallets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wallets.is_empty()
    }
}
