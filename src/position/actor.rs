//! Single-writer ledger actor
//!
//! Each strategy's `PositionLedger` is owned by one task. Mutations arrive as
//! messages, so a DCA fill racing a stop-loss fill is applied in arrival order
//! and never lost.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::persistence::Persistence;
use crate::position::ledger::{EntryFill, LedgerSnapshot, Position, PositionLedger, RiskLevels};

const LEDGER_CHANNEL_CAPACITY: usize = 64;

enum LedgerCommand {
    Open {
        fill: EntryFill,
        reply: oneshot::Sender<Result<Position>>,
    },
    Dca {
        position_id: String,
        amount: f64,
        tokens: f64,
        reply: oneshot::Sender<Result<Position>>,
    },
    Close {
        position_id: String,
        exit_price: f64,
        exit_amount: f64,
        tx_hash: Option<String>,
        reply: oneshot::Sender<Result<Position>>,
    },
    Sell {
        position_id: String,
        tokens: f64,
        exit_price: f64,
        exit_amount: f64,
        tx_hash: Option<String>,
        reply: oneshot::Sender<Result<Position>>,
    },
    SetRisk {
        risk: RiskLevels,
        total_budget: f64,
    },
    Snapshot {
        reply: oneshot::Sender<LedgerSnapshot>,
    },
    History {
        reply: oneshot::Sender<Vec<Position>>,
    },
}

/// Cloneable handle to a ledger actor
#[derive(Clone)]
pub struct LedgerHandle {
    strategy_id: String,
    tx: mpsc::Sender<LedgerCommand>,
}

impl LedgerHandle {
    /// Spawn the actor task owning `ledger`
    pub fn spawn(ledger: PositionLedger, persistence: Option<Arc<dyn Persistence>>) -> Self {
        let strategy_id = ledger.strategy_id().to_string();
        let (tx, rx) = mpsc::channel(LEDGER_CHANNEL_CAPACITY);
        tokio::spawn(run_ledger(ledger, rx, persistence));
        Self { strategy_id, tx }
    }

    pub fn strategy_id(&self) -> &str {
        &self.strategy_id
    }

    pub async fn open(&self, fill: EntryFill) -> Result<Position> {
        self.request(|reply| LedgerCommand::Open { fill, reply }).await?
    }

    pub async fn dca_update(&self, position_id: &str, amount: f64, tokens: f64) -> Result<Position> {
        let position_id = position_id.to_string();
        self.request(|reply| LedgerCommand::Dca {
            position_id,
            amount,
            tokens,
            reply,
        })
        .await?
    }

    pub async fn close(
        &self,
        position_id: &str,
        exit_price: f64,
        exit_amount: f64,
        tx_hash: Option<String>,
    ) -> Result<Position> {
        let position_id = position_id.to_string();
        self.request(|reply| LedgerCommand::Close {
            position_id,
            exit_price,
            exit_amount,
            tx_hash,
            reply,
        })
        .await?
    }

    /// Sell `tokens` of a position as one ledger step; returns the closed record.
    ///
    /// Partial sales close a split-off slice and leave the rest open.
    pub async fn sell(
        &self,
        position_id: &str,
        tokens: f64,
        exit_price: f64,
        exit_amount: f64,
        tx_hash: Option<String>,
    ) -> Result<Position> {
        let position_id = position_id.to_string();
        self.request(|reply| LedgerCommand::Sell {
            position_id,
            tokens,
            exit_price,
            exit_amount,
            tx_hash,
            reply,
        })
        .await?
    }

    pub async fn set_risk(&self, risk: RiskLevels, total_budget: f64) -> Result<()> {
        self.tx
            .send(LedgerCommand::SetRisk { risk, total_budget })
            .await
            .map_err(|_| Error::ChannelClosed(format!("ledger {}", self.strategy_id)))
    }

    pub async fn snapshot(&self) -> Result<LedgerSnapshot> {
        self.request(|reply| LedgerCommand::Snapshot { reply }).await
    }

    /// All positions, open and closed
    pub async fn history(&self) -> Result<Vec<Position>> {
        self.request(|reply| LedgerCommand::History { reply }).await
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> LedgerCommand,
    ) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| Error::ChannelClosed(format!("ledger {}", self.strategy_id)))?;
        reply_rx
            .await
            .map_err(|_| Error::ChannelClosed(format!("ledger {} reply", self.strategy_id)))
    }
}

async fn run_ledger(
    mut ledger: PositionLedger,
    mut rx: mpsc::Receiver<LedgerCommand>,
    persistence: Option<Arc<dyn Persistence>>,
) {
    debug!("Ledger actor started for {}", ledger.strategy_id());

    while let Some(command) = rx.recv().await {
        let (result, reply) = match command {
            LedgerCommand::Open { fill, reply } => (ledger.open(fill), reply),
            LedgerCommand::Dca {
                position_id,
                amount,
                tokens,
                reply,
            } => (ledger.dca_update(&position_id, amount, tokens), reply),
            LedgerCommand::Close {
                position_id,
                exit_price,
                exit_amount,
                tx_hash,
                reply,
            } => (ledger.close(&position_id, exit_price, exit_amount, tx_hash), reply),
            LedgerCommand::Sell {
                position_id,
                tokens,
                exit_price,
                exit_amount,
                tx_hash,
                reply,
            } => match ledger.sell(&position_id, tokens, exit_price, exit_amount, tx_hash) {
                Ok((closed, remainder)) => {
                    if let Some(rest) = &remainder {
                        persist(&persistence, rest).await;
                    }
                    (Ok(closed), reply)
                }
                Err(e) => (Err(e), reply),
            },
            LedgerCommand::SetRisk { risk, total_budget } => {
                ledger.set_risk(risk);
                ledger.set_total_budget(total_budget);
                continue;
            }
            LedgerCommand::Snapshot { reply } => {
                let _ = reply.send(ledger.snapshot());
                continue;
            }
            LedgerCommand::History { reply } => {
                let _ = reply.send(ledger.positions().to_vec());
                continue;
            }
        };

        if let Ok(position) = &result {
            persist(&persistence, position).await;
        }
        let _ = reply.send(result);
    }

    debug!("Ledger actor stopped for {}", ledger.strategy_id());
}

async fn persist(persistence: &Option<Arc<dyn Persistence>>, position: &Position) {
    if let Some(store) = persistence {
        if let Err(e) = store.save_position_snapshot(position).await {
            warn!("Failed to persist position {}: {}", position.id, e);
        }
    }
}

/// Ledger handles keyed by strategy id
#[derive(Default)]
pub struct LedgerRegistry {
    handles: DashMap<String, LedgerHandle>,
}

impl LedgerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, handle: LedgerHandle) {
        self.handles.insert(handle.strategy_id().to_string(), handle);
    }

    pub fn get(&self, strategy_id: &str) -> Option<LedgerHandle> {
        self.handles.get(strategy_id).map(|h| h.value().clone())
    }

    pub fn remove(&self, strategy_id: &str) -> Option<LedgerHandle> {
        self.handles.remove(strategy_id).map(|(_, h)| h)
    }

    pub fn contains(&self, strategy_id: &str) -> bool {
        self.handles.contains_key(strategy_id)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
