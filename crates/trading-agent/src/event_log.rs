use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    TzvValidation,
    TzvPassed,
    MtfOverride,
    GatekeeperReject,
    GatekeeperApproved,
    EntryExecuted,
    Tp1Hit,
    Tp2Hit,
    TradeClosed,
    Recovery,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::TzvValidation => "TZV_VALIDATION",
            EventType::TzvPassed => "TZV_PASSED",
            EventType::MtfOverride => "MTF_OVERRIDE",
            EventType::GatekeeperReject => "GATEKEEPER_REJECT",
            EventType::GatekeeperApproved => "GATEKEEPER_APPROVED",
            EventType::EntryExecuted => "ENTRY_EXECUTED",
            EventType::Tp1Hit => "TP1_HIT",
            EventType::Tp2Hit => "TP2_HIT",
            EventType::TradeClosed => "TRADE_CLOSED",
            EventType::Recovery => "RECOVERY",
        }
    }
}

/// Append-only JSON-lines audit trail, one object per lifecycle event.
///
/// Line format: `{"timestamp": rfc3339, "cycle": n, "type": "...", ...fields}`.
/// Downstream health tooling parses it, so keys are never renamed.
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("creating event log dir {}", dir.display()))?;
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn record(
        &self,
        timestamp: DateTime<Utc>,
        cycle: u64,
        event: EventType,
        fields: Value,
    ) -> Result<()> {
        let mut line = Map::new();
        line.insert("timestamp".into(), Value::String(timestamp.to_rfc3339()));
        line.insert("cycle".into(), Value::from(cycle));
        line.insert("type".into(), Value::String(event.as_str().to_string()));
        if let Value::Object(extra) = fields {
            for (k, v) in extra {
                line.entry(k).or_insert(v);
            }
        }

        let mut text = serde_json::to_string(&Value::Object(line))?;
        text.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("opening event log {}", self.path.display()))?;
        file.write_all(text.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }

    /// Like `record` but only logs a failure; an audit write never aborts a cycle.
    pub async fn emit(&self, timestamp: DateTime<Utc>, cycle: u64, event: EventType, fields: Value) {
        if let Err(e) = self.record(timestamp, cycle, event, fields).await {
            tracing::warn!(event = event.as_str(), error = %e, "Failed to write event log");
        }
    }
}
