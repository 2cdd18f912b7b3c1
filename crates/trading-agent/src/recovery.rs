//! Startup reconciliation of the persisted position against the exchange.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use exchange_client::{ExchangeClient, ExchangePosition};
use serde::Serialize;

use crate::position_manager::Position;
use crate::state_manager::{PositionSnapshot, StateManager};

/// Failures older than this no longer count toward emergency closure
const FAILURE_WINDOW_HOURS: i64 = 1;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    pub symbol: String,
    pub timeout_seconds: i64,
    pub max_failures: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Reconciliation {
    pub recovered: Vec<Position>,
    pub lost: Vec<Position>,
    pub extra: Vec<ExchangePosition>,
}

#[derive(Debug, Clone)]
pub enum RecoveryOutcome {
    /// Nothing persisted; start flat
    NoSnapshot,
    /// Snapshot was fresh or followed by a clean shutdown
    Resumed(Position),
    /// Crash detected and the exchange still holds the position
    Recovered(Position),
    /// Crash detected and the position is gone; counted as a failure and
    /// kept in the store so the next startup checks it again
    Lost { failures: usize },
    /// Too many failures: exchange positions were flattened
    EmergencyClosed { closed: usize },
}

impl RecoveryOutcome {
    pub fn position(&self) -> Option<&Position> {
        match self {
            RecoveryOutcome::Resumed(p) | RecoveryOutcome::Recovered(p) => Some(p),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RecoveryOutcome::NoSnapshot => "NO_SNAPSHOT",
            RecoveryOutcome::Resumed(_) => "RESUMED",
            RecoveryOutcome::Recovered(_) => "RECOVERED",
            RecoveryOutcome::Lost { .. } => "LOST",
            RecoveryOutcome::EmergencyClosed { .. } => "EMERGENCY_CLOSED",
        }
    }
}

/// A crash is a stale snapshot with no clean shutdown recorded after it,
/// or a snapshot an earlier recovery could not match on the exchange.
pub fn is_crash(
    snapshot: &PositionSnapshot,
    shutdown_marker: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    timeout_seconds: i64,
) -> bool {
    if snapshot.unreconciled {
        return true;
    }
    let clean_shutdown = shutdown_marker.is_some_and(|marker| marker >= snapshot.last_update);
    !clean_shutdown && now - snapshot.last_update > Duration::seconds(timeout_seconds)
}

/// Match persisted positions to exchange positions by symbol and side.
pub fn reconcile(snapshot: &[Position], exchange: &[ExchangePosition]) -> Reconciliation {
    let mut report = Reconciliation::default();
    for pos in snapshot {
        let found = exchange
            .iter()
            .any(|e| e.symbol == pos.symbol && e.side == pos.side && !e.quantity.is_zero());
        if found {
            report.recovered.push(pos.clone());
        } else {
            report.lost.push(pos.clone());
        }
    }
    report.extra = exchange
        .iter()
        .filter(|e| !snapshot.iter().any(|p| p.symbol == e.symbol && p.side == e.side))
        .cloned()
        .collect();
    report
}

fn prune_failures(failures: &mut Vec<DateTime<Utc>>, now: DateTime<Utc>) {
    let cutoff = now - Duration::hours(FAILURE_WINDOW_HOURS);
    failures.retain(|t| *t > cutoff);
}

/// Run once at startup. The graceful-shutdown marker is consumed only once
/// an outcome is settled, so a failed recovery leaves it for the next try.
pub async fn recover(
    store: &StateManager,
    exchange: &dyn ExchangeClient,
    config: &RecoveryConfig,
    now: DateTime<Utc>,
) -> Result<RecoveryOutcome> {
    let marker = store.load_shutdown_marker().await?;
    let outcome = settle(store, exchange, config, marker, now).await?;
    store.clear_shutdown_marker().await?;
    Ok(outcome)
}

async fn settle(
    store: &StateManager,
    exchange: &dyn ExchangeClient,
    config: &RecoveryConfig,
    marker: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<RecoveryOutcome> {
    let Some(snapshot) = store.load_snapshot().await? else {
        tracing::info!("No position snapshot, starting flat");
        return Ok(RecoveryOutcome::NoSnapshot);
    };

    if !is_crash(&snapshot, marker, now, config.timeout_seconds) {
        tracing::info!(
            side = %snapshot.position.side,
            entry = %snapshot.position.entry_price,
            last_update = %snapshot.last_update,
            "Resuming persisted position"
        );
        return Ok(RecoveryOutcome::Resumed(snapshot.position));
    }

    tracing::warn!(
        last_update = %snapshot.last_update,
        age_secs = (now - snapshot.last_update).num_seconds(),
        unreconciled = snapshot.unreconciled,
        "Crash detected, reconciling with exchange"
    );

    let exchange_positions: Vec<ExchangePosition> = exchange
        .get_positions()
        .await?
        .into_iter()
        .filter(|p| p.symbol == config.symbol)
        .collect();
    let report = reconcile(std::slice::from_ref(&snapshot.position), &exchange_positions);

    for extra in &report.extra {
        tracing::warn!(
            symbol = %extra.symbol,
            side = %extra.side,
            quantity = %extra.quantity,
            "Exchange position not in snapshot, left open for manual inspection"
        );
    }

    if let Some(position) = report.recovered.into_iter().next() {
        store.save_snapshot(&position, now).await?;
        tracing::info!(side = %position.side, "Position recovered from exchange");
        return Ok(RecoveryOutcome::Recovered(position));
    }

    let mut failures = store.load_failures().await?;
    prune_failures(&mut failures, now);
    failures.push(now);
    let count = failures.len();
    tracing::error!(
        lost = report.lost.len(),
        failures = count,
        max = config.max_failures,
        "Persisted position not found on exchange"
    );

    if count >= config.max_failures {
        let mut closed = 0;
        for position in &exchange_positions {
            match exchange.close_position(&position.symbol).await {
                Ok(Some(_)) => closed += 1,
                Ok(None) => {}
                Err(e) => tracing::error!(symbol = %position.symbol, error = %e, "Emergency close failed"),
            }
        }
        store.clear_snapshot().await?;
        store.save_failures(&[]).await?;
        tracing::error!(closed, "Emergency closure executed");
        return Ok(RecoveryOutcome::EmergencyClosed { closed });
    }

    store.save_failures(&failures).await?;
    store.mark_unreconciled(&snapshot).await?;
    tracing::warn!("Snapshot kept for manual inspection");
    Ok(RecoveryOutcome::Lost { failures: count })
}
