//! Execution module - quotes, scheduling and swap submission
//!
//! Supports two modes:
//! - Dry-run (default): real quotes, simulated fills
//! - Live: balance and allowance checks, signed swap, receipt tracking

pub mod aggregator;
pub mod chain;
pub mod executor;
pub mod provider;
pub mod scheduler;
pub mod simulation;
pub mod types;

pub use aggregator::{OneInchClient, ONEINCH_API_URL};
pub use chain::{JsonRpcClient, NodeSigner};
pub use executor::{ExecutorConfig, ExecutorStats, SwapExecutor};
pub use provider::{ChainClient, Signer, SwapProvider};
pub use scheduler::{
    OrderExecutor, PendingExecution, PendingStatus, ScheduleOutcome, Scheduler, SchedulerStats,
};
pub use types::{
    ExecutionResult, Fill, Network, Order, OrderSide, OrderSource, Quote, SwapTransaction,
    TokenInfo, TxReceipt,
};
