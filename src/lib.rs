//! swapflow library
//!
//! Strategy runner and copy-trading engine that routes swaps through a DEX aggregator.

pub mod cli;
pub mod config;
pub mod dexscreener;
pub mod engine;
pub mod error;
pub mod execution;
pub mod filter;
pub mod persistence;
pub mod position;
pub mod strategy;
pub mod tracker;

// Re-export commonly used types
pub use config::Config;
pub use engine::Engine;
pub use error::{Error, Result};
