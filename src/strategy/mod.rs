//! Strategy system
//!
//! One `Strategy` per configured token. Each tick it evaluates its kind-specific
//! logic against the latest market data and a ledger snapshot, then emits signals.
//!
//! ## Core
//! - `types` - Configs, signals, market data, fills
//! - `core` - Lifecycle state machine, SL/TP sweep, drawdown guard
//! - `params` - Typed reads from the per-strategy option map
//!
//! ## Kinds
//! - `dca` - Interval buys with dip bonus
//! - `grid` - Price-level grid that flips on each fill
//! - `momentum` - Indicator vote trend follower
//!
//! ## Support
//! - `indicators` - RSI, EMA/SMA, MACD, Bollinger over a rolling history
//! - `randomization` - Seedable timing jitter

pub mod core;
pub mod dca;
pub mod grid;
pub mod indicators;
pub mod momentum;
pub mod params;
pub mod randomization;
pub mod types;

pub use self::core::{
    BuyDecision, EvalContext, PendingSignal, SellDecision, Strategy, StrategyKind, StrategyState,
    StrategyStats,
};
pub use dca::{DcaParams, DcaStrategy};
pub use grid::{GridLevel, GridParams, GridSide, GridStrategy, LevelSpacing};
pub use indicators::PriceHistory;
pub use momentum::{MomentumParams, MomentumStrategy, Sizing, TrendDirection};
pub use randomization::{JitterConfig, Randomizer};
pub use types::{
    Candle, MarketData, SignalFill, SignalKind, StrategyConfig, StrategyStatus, TradeSignal,
};
