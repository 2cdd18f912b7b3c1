use chrono::{DateTime, Utc};

use crate::models::*;

const MIN_PNL_PCT: f64 = -100.0;
const MAX_PNL_PCT: f64 = 1000.0;

/// Position-count, daily-loss and cooldown limits over in-memory counters.
///
/// Makes no external calls; the caller persists [`RiskState`] after every
/// mutation.
#[derive(Debug, Clone)]
pub struct RiskManager {
    limits: RiskLimits,
    state: RiskState,
}

impl RiskManager {
    pub fn new(limits: RiskLimits, now: DateTime<Utc>) -> Self {
        Self {
            limits,
            state: RiskState::new(now),
        }
    }

    /// Resume from a persisted state.
    pub fn from_state(limits: RiskLimits, state: RiskState) -> Self {
        Self { limits, state }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    pub fn state(&self) -> &RiskState {
        &self.state
    }

    /// Check all limits before allowing an entry.
    pub fn can_open_position(&mut self, now: DateTime<Utc>) -> RiskCheck {
        self.roll_day(now);

        let violation = if self.state.open_positions >= self.limits.max_open_positions {
            Some((
                RiskViolation::PositionLimit,
                format!(
                    "{} open positions (max {})",
                    self.state.open_positions, self.limits.max_open_positions
                ),
            ))
        } else if self.state.daily_pnl_pct <= -self.limits.max_daily_loss_pct {
            Some((
                RiskViolation::DailyLoss,
                format!(
                    "daily P&L {:.2}% at or below -{:.2}%",
                    self.state.daily_pnl_pct, self.limits.max_daily_loss_pct
                ),
            ))
        } else {
            self.state.last_trade_time.and_then(|last| {
                let elapsed = (now - last).num_seconds();
                (elapsed < self.limits.cooldown_seconds).then(|| {
                    (
                        RiskViolation::Cooldown,
                        format!("{}s since last trade (cooldown {}s)", elapsed, self.limits.cooldown_seconds),
                    )
                })
            })
        };

        match violation {
            Some((violation, reason)) => RiskCheck {
                can_trade: false,
                reason: format!("{}: {}", violation.code(), reason),
                violation: Some(violation),
                open_positions: self.state.open_positions,
                daily_pnl_pct: self.state.daily_pnl_pct,
            },
            None => RiskCheck {
                can_trade: true,
                reason: "All risk checks clear".to_string(),
                violation: None,
                open_positions: self.state.open_positions,
                daily_pnl_pct: self.state.daily_pnl_pct,
            },
        }
    }

    pub fn register_entry(&mut self, now: DateTime<Utc>) {
        self.roll_day(now);
        self.state.open_positions += 1;
        self.state.trades_today += 1;
        self.state.last_trade_time = Some(now);
    }

    /// Realize the P&L of a partial close; the position stays open.
    pub fn register_partial_close(&mut self, pnl_pct: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.state.daily_pnl_pct += sanitize_pnl(pnl_pct);
    }

    /// Realize the P&L of the final leg and release the position slot.
    pub fn register_close(&mut self, pnl_pct: f64, now: DateTime<Utc>) {
        self.roll_day(now);
        self.state.daily_pnl_pct += sanitize_pnl(pnl_pct);
        self.state.open_positions = self.state.open_positions.saturating_sub(1);
        self.state.last_trade_time = Some(now);

        tracing::info!(
            daily_pnl_pct = self.state.daily_pnl_pct,
            open_positions = self.state.open_positions,
            "Risk counters updated on close"
        );
    }

    /// Align the open-position count with what recovery found on the exchange.
    pub fn set_open_positions(&mut self, count: u32) {
        self.state.open_positions = count;
    }

    fn roll_day(&mut self, now: DateTime<Utc>) {
        let today = now.date_naive();
        if today != self.state.day {
            tracing::info!(
                previous_day = %self.state.day,
                daily_pnl_pct = self.state.daily_pnl_pct,
                trades = self.state.trades_today,
                "New trading day, resetting daily risk figures"
            );
            self.state.day = today;
            self.state.daily_pnl_pct = 0.0;
            self.state.trades_today = 0;
        }
    }
}

/// Non-finite P&L counts as zero; the rest is clamped to a sane range.
fn sanitize_pnl(pnl_pct: f64) -> f64 {
    if !pnl_pct.is_finite() {
        tracing::warn!(pnl_pct, "Ignoring non-finite P&L");
        return 0.0;
    }
    pnl_pct.clamp(MIN_PNL_PCT, MAX_PNL_PCT)
}
