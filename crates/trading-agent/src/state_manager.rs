use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::gatekeeper::GatekeeperStats;
use crate::metrics::Counters;
use crate::position_manager::Position;
use risk_manager::RiskState;

pub const POSITION_SNAPSHOT_KEY: &str = "position_snapshot";
pub const GRACEFUL_SHUTDOWN_KEY: &str = "graceful_shutdown";
pub const RECOVERY_FAILURES_KEY: &str = "recovery_failures";
pub const RISK_STATE_KEY: &str = "risk_state";
pub const GATEKEEPER_STATS_KEY: &str = "gatekeeper_stats";
pub const METRICS_KEY: &str = "agent_metrics";

/// Durable copy of the open position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    pub position: Position,
    pub last_update: DateTime<Utc>,
    /// Set when a crash recovery could not find the position on the exchange.
    /// Every later startup reconciles it again until it is found or flattened.
    #[serde(default)]
    pub unreconciled: bool,
}

/// Key/value state store backing restarts.
/// Every write is a single upsert, so a crash leaves either the old or the new value.
pub struct StateManager {
    pub(crate) db_pool: sqlx::AnyPool,
}

impl StateManager {
    pub fn new(db_pool: sqlx::AnyPool) -> Self {
        Self { db_pool }
    }

    /// Connect an in-memory SQLite store.
    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        sqlx::any::install_default_drivers();
        let pool = sqlx::any::AnyPoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let store = Self::new(pool);
        store.init_tables().await?;
        Ok(store)
    }

    /// Create the key/value table if this is a fresh database.
    pub async fn init_tables(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS agent_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
        )
        .execute(&self.db_pool)
        .await?;
        Ok(())
    }

    /// Upsert one key, stamping the write time.
    pub async fn save_state(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO agent_state (key, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.db_pool)
        .await
        .with_context(|| format!("saving state key {}", key))?;
        Ok(())
    }

    pub async fn load_state(&self, key: &str) -> Result<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM agent_state WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    pub async fn delete_state(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM agent_state WHERE key = ?")
            .bind(key)
            .execute(&self.db_pool)
            .await
            .with_context(|| format!("deleting state key {}", key))?;
        Ok(())
    }

    pub async fn save_json<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let text = serde_json::to_string(value)?;
        self.save_state(key, &text).await
    }

    pub async fn load_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.load_state(key).await? {
            Some(text) => {
                let value = serde_json::from_str(&text)
                    .with_context(|| format!("decoding state key {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    // -- Position snapshot --

    pub async fn save_snapshot(&self, position: &Position, now: DateTime<Utc>) -> Result<()> {
        self.save_json(
            POSITION_SNAPSHOT_KEY,
            &PositionSnapshot {
                position: position.clone(),
                last_update: now,
                unreconciled: false,
            },
        )
        .await
    }

    /// Keep the snapshot for inspection but flag it as missing on the exchange.
    /// `last_update` is left untouched.
    pub async fn mark_unreconciled(&self, snapshot: &PositionSnapshot) -> Result<()> {
        let flagged = PositionSnapshot {
            unreconciled: true,
            ..snapshot.clone()
        };
        self.save_json(POSITION_SNAPSHOT_KEY, &flagged).await
    }

    pub async fn load_snapshot(&self) -> Result<Option<PositionSnapshot>> {
        self.load_json(POSITION_SNAPSHOT_KEY).await
    }

    pub async fn clear_snapshot(&self) -> Result<()> {
        self.delete_state(POSITION_SNAPSHOT_KEY).await
    }

    // -- Shutdown marker --

    pub async fn mark_graceful_shutdown(&self, now: DateTime<Utc>) -> Result<()> {
        self.save_json(GRACEFUL_SHUTDOWN_KEY, &now).await
    }

    pub async fn load_shutdown_marker(&self) -> Result<Option<DateTime<Utc>>> {
        self.load_json(GRACEFUL_SHUTDOWN_KEY).await
    }

    pub async fn clear_shutdown_marker(&self) -> Result<()> {
        self.delete_state(GRACEFUL_SHUTDOWN_KEY).await
    }

    // -- Recovery failures --

    pub async fn load_failures(&self) -> Result<Vec<DateTime<Utc>>> {
        Ok(self.load_json(RECOVERY_FAILURES_KEY).await?.unwrap_or_default())
    }

    pub async fn save_failures(&self, failures: &[DateTime<Utc>]) -> Result<()> {
        self.save_json(RECOVERY_FAILURES_KEY, &failures).await
    }

    // -- Counters --

    pub async fn save_risk_state(&self, state: &RiskState) -> Result<()> {
        self.save_json(RISK_STATE_KEY, state).await
    }

    pub async fn load_risk_state(&self) -> Result<Option<RiskState>> {
        self.load_json(RISK_STATE_KEY).await
    }

    pub async fn save_gatekeeper_stats(&self, stats: &GatekeeperStats) -> Result<()> {
        self.save_json(GATEKEEPER_STATS_KEY, stats).await
    }

    pub async fn load_gatekeeper_stats(&self) -> Result<Option<GatekeeperStats>> {
        self.load_json(GATEKEEPER_STATS_KEY).await
    }

    pub async fn save_metrics(&self, counters: &Counters) -> Result<()> {
        self.save_json(METRICS_KEY, counters).await
    }

    pub async fn load_metrics(&self) -> Result<Option<Counters>> {
        self.load_json(METRICS_KEY).await
    }
}
