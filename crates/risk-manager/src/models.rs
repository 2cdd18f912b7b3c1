use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskLimits {
    pub max_open_positions: u32,
    /// Positive number; entries stop once daily P&L reaches its negative
    pub max_daily_loss_pct: f64,
    pub cooldown_seconds: i64,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            max_open_positions: 3,
            max_daily_loss_pct: 5.0,
            cooldown_seconds: 30,
        }
    }
}

/// Process-wide counters, persisted after every change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub open_positions: u32,
    pub daily_pnl_pct: f64,
    pub last_trade_time: Option<DateTime<Utc>>,
    pub trades_today: u32,
    /// UTC day the daily figures belong to
    pub day: NaiveDate,
}

impl RiskState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            open_positions: 0,
            daily_pnl_pct: 0.0,
            last_trade_time: None,
            trades_today: 0,
            day: now.date_naive(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskViolation {
    PositionLimit,
    DailyLoss,
    Cooldown,
}

impl RiskViolation {
    pub fn code(&self) -> &'static str {
        match self {
            RiskViolation::PositionLimit => "POSITION_LIMIT",
            RiskViolation::DailyLoss => "DAILY_LOSS_LIMIT",
            RiskViolation::Cooldown => "COOLDOWN",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskCheck {
    pub can_trade: bool,
    pub reason: String,
    pub violation: Option<RiskViolation>,
    pub open_positions: u32,
    pub daily_pnl_pct: f64,
}
