use advisory_oracle::{OracleConfig, PermissivenessLevel};
use anyhow::{bail, Result};
use risk_manager::RiskLimits;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use trading_core::Timeframe;

use crate::position_manager::LifecycleParams;
use crate::signal_generator::PctSchedule;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    // Instrument and loop
    pub symbol: String,
    pub trading_mode: String,              // "paper" or "live", names the event log
    pub cycle_interval_seconds: u64,       // 10

    // Storage
    pub database_url: String,
    pub event_log_dir: PathBuf,
    pub permissiveness_file: PathBuf,

    // Gatekeeper
    pub gatekeeper_level: i64,             // 1-5, used when the file has no MODE line
    pub mtf_override_enabled: bool,
    pub mtf_override_threshold: u8,        // strict >, 0-100
    pub min_gap_ratio: f64,                // 2.0

    // Risk limits
    pub max_open_positions: u32,
    pub max_daily_loss_pct: f64,
    pub trade_cooldown_seconds: i64,

    // Price schedule (percent)
    pub sl_pct: Decimal,
    pub tp1_pct: Decimal,
    pub tp2_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    pub breakeven_spread_pct: Decimal,
    pub use_tp2_partial: bool,

    // Recovery
    pub recovery_timeout_seconds: i64,     // 300
    pub emergency_max_failures: usize,     // 3

    // Sizing
    pub order_size_usdt: Decimal,
    pub leverage: Decimal,

    // Market data
    pub primary_timeframe: Timeframe,
    pub higher_timeframe: Timeframe,
    pub candle_limit: usize,
    pub candle_max_retries: u32,
    pub candle_timeout_seconds: u64,
    pub binance_base_url: String,
    pub binance_api_key: Option<String>,

    // Advisory oracle
    pub oracle_api_url: String,
    pub oracle_api_key: Option<String>,
    pub oracle_model: String,
    pub oracle_timeout_seconds: u64,
    pub oracle_max_retries: u32,

    pub metrics_log_interval_cycles: u64,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from any key lookup; unset keys take their defaults.
    pub fn from_lookup<F>(var: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let oracle_defaults = OracleConfig::default();

        let config = Self {
            symbol: var("SYMBOL").unwrap_or_else(|| "BTCUSDT".to_string()),
            trading_mode: var("TRADING_MODE").unwrap_or_else(|| "paper".to_string()),
            cycle_interval_seconds: var("CYCLE_INTERVAL_SECONDS")
                .unwrap_or_else(|| "10".to_string())
                .parse()?,

            database_url: var("DATABASE_URL")
                .unwrap_or_else(|| "sqlite:trading_agent.db?mode=rwc".to_string()),
            event_log_dir: var("EVENT_LOG_DIR").unwrap_or_else(|| "logs".to_string()).into(),
            permissiveness_file: var("PERMISSIVENESS_FILE")
                .unwrap_or_else(|| "permissiveness_config.txt".to_string())
                .into(),

            gatekeeper_level: var("GATEKEEPER_LEVEL")
                .unwrap_or_else(|| "2".to_string())
                .parse()?,
            mtf_override_enabled: var("MTF_OVERRIDE_ENABLED")
                .unwrap_or_else(|| "true".to_string())
                .parse()?,
            mtf_override_threshold: var("MTF_OVERRIDE_THRESHOLD")
                .unwrap_or_else(|| "80".to_string())
                .parse()?,
            min_gap_ratio: var("MIN_GAP_RATIO")
                .unwrap_or_else(|| "2.0".to_string())
                .parse()?,

            max_open_positions: var("MAX_OPEN_POSITIONS")
                .unwrap_or_else(|| "3".to_string())
                .parse()?,
            max_daily_loss_pct: var("MAX_DAILY_LOSS_PCT")
                .unwrap_or_else(|| "5.0".to_string())
                .parse()?,
            trade_cooldown_seconds: var("TRADE_COOLDOWN_SECONDS")
                .unwrap_or_else(|| "30".to_string())
                .parse()?,

            sl_pct: var("SL_PCT").unwrap_or_else(|| "1.0".to_string()).parse()?,
            tp1_pct: var("TP1_PCT").unwrap_or_else(|| "1.0".to_string()).parse()?,
            tp2_pct: var("TP2_PCT").unwrap_or_else(|| "2.0".to_string()).parse()?,
            trailing_stop_pct: var("TRAILING_STOP_PCT")
                .unwrap_or_else(|| "1.0".to_string())
                .parse()?,
            breakeven_spread_pct: var("BREAKEVEN_SPREAD_PCT")
                .unwrap_or_else(|| "0.1".to_string())
                .parse()?,
            use_tp2_partial: var("USE_TP2_PARTIAL")
                .unwrap_or_else(|| "true".to_string())
                .parse()?,

            recovery_timeout_seconds: var("RECOVERY_TIMEOUT_SECONDS")
                .unwrap_or_else(|| "300".to_string())
                .parse()?,
            emergency_max_failures: var("EMERGENCY_MAX_FAILURES")
                .unwrap_or_else(|| "3".to_string())
                .parse()?,

            order_size_usdt: var("ORDER_SIZE_USDT")
                .unwrap_or_else(|| "25".to_string())
                .parse()?,
            leverage: var("LEVERAGE").unwrap_or_else(|| "50".to_string()).parse()?,

            primary_timeframe: var("PRIMARY_TIMEFRAME")
                .unwrap_or_else(|| "4h".to_string())
                .parse()?,
            higher_timeframe: var("HIGHER_TIMEFRAME")
                .unwrap_or_else(|| "1d".to_string())
                .parse()?,
            candle_limit: var("CANDLE_LIMIT")
                .unwrap_or_else(|| "100".to_string())
                .parse()?,
            candle_max_retries: var("CANDLE_MAX_RETRIES")
                .unwrap_or_else(|| "3".to_string())
                .parse()?,
            candle_timeout_seconds: var("CANDLE_TIMEOUT_SECONDS")
                .unwrap_or_else(|| "10".to_string())
                .parse()?,
            binance_base_url: var("BINANCE_BASE_URL")
                .unwrap_or_else(|| "https://fapi.binance.com".to_string()),
            binance_api_key: var("BINANCE_API_KEY").filter(|k| !k.is_empty()),

            oracle_api_url: var("ORACLE_API_URL").unwrap_or(oracle_defaults.api_url),
            oracle_api_key: var("ORACLE_API_KEY").filter(|k| !k.is_empty()),
            oracle_model: var("ORACLE_MODEL").unwrap_or(oracle_defaults.model),
            oracle_timeout_seconds: var("ORACLE_TIMEOUT_SECONDS")
                .unwrap_or_else(|| "15".to_string())
                .parse()?,
            oracle_max_retries: var("ORACLE_MAX_RETRIES")
                .unwrap_or_else(|| "2".to_string())
                .parse()?,

            metrics_log_interval_cycles: var("METRICS_LOG_INTERVAL_CYCLES")
                .unwrap_or_else(|| "15".to_string())
                .parse()?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.symbol.trim().is_empty() {
            bail!("SYMBOL must not be empty");
        }
        if self.cycle_interval_seconds == 0 {
            bail!("CYCLE_INTERVAL_SECONDS must be greater than 0");
        }
        if !(1..=5).contains(&self.gatekeeper_level) {
            bail!("GATEKEEPER_LEVEL must be between 1 and 5, got {}", self.gatekeeper_level);
        }
        if self.mtf_override_threshold > 100 {
            bail!("MTF_OVERRIDE_THRESHOLD must be 0-100, got {}", self.mtf_override_threshold);
        }
        for (name, value) in [
            ("SL_PCT", self.sl_pct),
            ("TP1_PCT", self.tp1_pct),
            ("TP2_PCT", self.tp2_pct),
            ("TRAILING_STOP_PCT", self.trailing_stop_pct),
        ] {
            if value <= Decimal::ZERO {
                bail!("{} must be positive, got {}", name, value);
            }
        }
        if self.breakeven_spread_pct < Decimal::ZERO {
            bail!("BREAKEVEN_SPREAD_PCT must not be negative");
        }
        if self.tp1_pct >= self.tp2_pct {
            bail!("TP1_PCT ({}) must be below TP2_PCT ({})", self.tp1_pct, self.tp2_pct);
        }
        if self.max_daily_loss_pct <= 0.0 || self.min_gap_ratio <= 0.0 {
            bail!("MAX_DAILY_LOSS_PCT and MIN_GAP_RATIO must be positive");
        }
        if self.trade_cooldown_seconds < 0 || self.recovery_timeout_seconds < 0 {
            bail!("TRADE_COOLDOWN_SECONDS and RECOVERY_TIMEOUT_SECONDS must not be negative");
        }
        if self.order_size_usdt <= Decimal::ZERO || self.leverage <= Decimal::ZERO {
            bail!("ORDER_SIZE_USDT and LEVERAGE must be positive");
        }
        if self.emergency_max_failures == 0 {
            bail!("EMERGENCY_MAX_FAILURES must be at least 1");
        }
        if self.candle_limit < 22 {
            bail!("CANDLE_LIMIT must be at least 22 to seed the indicators");
        }
        if self.primary_timeframe == self.higher_timeframe {
            bail!("PRIMARY_TIMEFRAME and HIGHER_TIMEFRAME must differ");
        }
        Ok(())
    }

    pub fn default_level(&self) -> PermissivenessLevel {
        PermissivenessLevel::new(self.gatekeeper_level)
    }

    pub fn risk_limits(&self) -> RiskLimits {
        RiskLimits {
            max_open_positions: self.max_open_positions,
            max_daily_loss_pct: self.max_daily_loss_pct,
            cooldown_seconds: self.trade_cooldown_seconds,
        }
    }

    pub fn schedule(&self) -> PctSchedule {
        PctSchedule {
            sl_pct: self.sl_pct,
            tp1_pct: self.tp1_pct,
            tp2_pct: self.tp2_pct,
        }
    }

    pub fn lifecycle_params(&self) -> LifecycleParams {
        LifecycleParams {
            trailing_stop_pct: self.trailing_stop_pct,
            breakeven_spread_pct: self.breakeven_spread_pct,
            use_tp2_partial: self.use_tp2_partial,
            ..LifecycleParams::default()
        }
    }

    pub fn oracle_config(&self) -> OracleConfig {
        OracleConfig {
            api_url: self.oracle_api_url.clone(),
            api_key: self.oracle_api_key.clone(),
            model: self.oracle_model.clone(),
            timeout: Duration::from_secs(self.oracle_timeout_seconds),
            max_retries: self.oracle_max_retries,
            ..OracleConfig::default()
        }
    }

    pub fn event_log_path(&self) -> PathBuf {
        self.event_log_dir.join(format!("trades_{}.log", self.trading_mode))
    }
}
