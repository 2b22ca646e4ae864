//! Persistence contract and its two stores
//!
//! The engine only calls through `Persistence`. `JsonFileStore` keeps an
//! append-only `executions.jsonl` plus `positions.json` and `strategies.json`
//! snapshots in a data directory; `MemoryPersistence` backs tests.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::error::{Error, Result};
use crate::execution::ExecutionResult;
use crate::position::Position;
use crate::strategy::StrategyConfig;

pub const EXECUTIONS_FILE: &str = "executions.jsonl";
pub const POSITIONS_FILE: &str = "positions.json";
pub const STRATEGIES_FILE: &str = "strategies.json";

#[async_trait]
pub trait Persistence: Send + Sync {
    async fn save_execution(&self, result: &ExecutionResult) -> Result<()>;

    async fn save_position_snapshot(&self, position: &Position) -> Result<()>;

    async fn save_strategy_config(&self, config: &StrategyConfig) -> Result<()>;

    async fn load_strategy_configs(&self) -> Result<Vec<StrategyConfig>>;

    /// Every stored position (open and closed) owned by `strategy_id`
    async fn load_positions(&self, strategy_id: &str) -> Result<Vec<Position>>;

    /// Most recent executions, newest first
    async fn load_executions(&self, limit: usize) -> Result<Vec<ExecutionResult>>;
}

/// JSON files in one data directory
pub struct JsonFileStore {
    dir: PathBuf,
    // Serializes read-modify-write of the snapshot files
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonFileStore {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| Error::Persistence(format!("create {}: {}", dir.display(), e)))?;
        Ok(Self {
            dir,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn read_map<T: serde::de::DeserializeOwned>(
        &self,
        file: &str,
    ) -> Result<BTreeMap<String, T>> {
        let path = self.dir.join(file);
        match fs::read_to_string(&path).await {
            Ok(text) if text.trim().is_empty() => Ok(BTreeMap::new()),
            Ok(text) => serde_json::from_str(&text).map_err(|e| {
                Error::Persistence(format!("corrupt {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Write via a temp file and rename so readers never see a torn file
    async fn write_map<T: serde::Serialize>(&self, file: &str, map: &BTreeMap<String, T>) -> Result<()> {
        let path = self.dir.join(file);
        let tmp = self.dir.join(format!("{}.tmp", file));
        let body = serde_json::to_vec_pretty(map)?;
        fs::write(&tmp, body).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn upsert<T: serde::Serialize + serde::de::DeserializeOwned>(
        &self,
        file: &str,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut map: BTreeMap<String, serde_json::Value> = self.read_map(file).await?;
        map.insert(key.to_string(), serde_json::to_value(value)?);
        self.write_map(file, &map).await
    }
}

#[async_trait]
impl Persistence for JsonFileStore {
    async fn save_execution(&self, result: &ExecutionResult) -> Result<()> {
        let mut line = serde_json::to_string(result)?;
        line.push('\n');

        let _guard = self.write_lock.lock().await;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(EXECUTIONS_FILE))
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        debug!("Persisted execution {}", result.id);
        Ok(())
    }

    async fn save_position_snapshot(&self, position: &Position) -> Result<()> {
        self.upsert(POSITIONS_FILE, &position.id, position).await
    }

    async fn save_strategy_config(&self, config: &StrategyConfig) -> Result<()> {
        self.upsert(STRATEGIES_FILE, &config.strategy_id, config).await
    }

    async fn load_strategy_configs(&self) -> Result<Vec<StrategyConfig>> {
        let map: BTreeMap<String, StrategyConfig> = self.read_map(STRATEGIES_FILE).await?;
        Ok(map.into_values().collect())
    }

    async fn load_positions(&self, strategy_id: &str) -> Result<Vec<Position>> {
        let map: BTreeMap<String, Position> = self.read_map(POSITIONS_FILE).await?;
        let mut positions: Vec<Position> = map
            .into_values()
            .filter(|p| p.strategy_id == strategy_id)
            .collect();
        positions.sort_by_key(|p| p.opened_at);
        Ok(positions)
    }

    async fn load_executions(&self, limit: usize) -> Result<Vec<ExecutionResult>> {
        let path = self.dir.join(EXECUTIONS_FILE);
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut results = Vec::new();
        for (n, line) in text.lines().rev().enumerate() {
            if results.len() >= limit {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ExecutionResult>(line) {
                Ok(result) => results.push(result),
                Err(e) => debug!("Skipping unreadable execution line {} from end: {}", n, e),
            }
        }
        Ok(results)
    }
}

/// In-process store
#[derive(Default)]
pub struct MemoryPersistence {
    executions: Mutex<Vec<ExecutionResult>>,
    positions: DashMap<String, Position>,
    strategies: DashMap<String, StrategyConfig>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn executions(&self) -> Vec<ExecutionResult> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        self.positions.iter().map(|p| p.value().clone()).collect()
    }
}

#[async_trait]
impl Persistence for MemoryPersistence {
    async fn save_execution(&self, result: &ExecutionResult) -> Result<()> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(result.clone());
        Ok(())
    }

    async fn save_position_snapshot(&self, position: &Position) -> Result<()> {
        self.positions.insert(position.id.clone(), position.clone());
        Ok(())
    }

    async fn save_strategy_config(&self, config: &StrategyConfig) -> Result<()> {
        self.strategies
            .insert(config.strategy_id.clone(), config.clone());
        Ok(())
    }

    async fn load_strategy_configs(&self) -> Result<Vec<StrategyConfig>> {
        Ok(self.strategies.iter().map(|c| c.value().clone()).collect())
    }

    async fn load_positions(&self, strategy_id: &str) -> Result<Vec<Position>> {
        Ok(self
            .positions
            .iter()
            .filter(|p| p.strategy_id == strategy_id)
            .map(|p| p.value().clone())
            .collect())
    }

    async fn load_executions(&self, limit: usize) -> Result<Vec<ExecutionResult>> {
        let executions = self.executions.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(executions.iter().rev().take(limit).cloned().collect())
    }
}
