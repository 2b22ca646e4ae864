//! Position management module

pub mod actor;
pub mod ledger;

pub use actor::{LedgerHandle, LedgerRegistry};
pub use ledger::{EntryFill, LedgerSnapshot, Position, PositionLedger, PositionStatus, RiskLevels};
