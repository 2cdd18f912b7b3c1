use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{TradingError, TradingResult};

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Check the OHLC envelope of a single candle.
    pub fn is_consistent(&self) -> bool {
        let values = [self.open, self.high, self.low, self.close, self.volume];
        if values.iter().any(|v| !v.is_finite()) || self.volume < 0.0 {
            return false;
        }
        self.high >= self.open.max(self.close).max(self.low)
            && self.low <= self.open.min(self.close).min(self.high)
    }
}

/// Validate a candle series: strictly increasing timestamps and a sound OHLC
/// envelope on every candle.
pub fn validate_series(candles: &[Candle]) -> TradingResult<()> {
    for (i, candle) in candles.iter().enumerate() {
        if !candle.is_consistent() {
            return Err(TradingError::DataIntegrity(format!(
                "candle {} at {} violates OHLC bounds (o={} h={} l={} c={} v={})",
                i, candle.timestamp, candle.open, candle.high, candle.low, candle.close, candle.volume
            )));
        }
        if i > 0 && candle.timestamp <= candles[i - 1].timestamp {
            return Err(TradingError::DataIntegrity(format!(
                "timestamps not strictly increasing at index {} ({} after {})",
                i,
                candle.timestamp,
                candles[i - 1].timestamp
            )));
        }
    }
    Ok(())
}

pub fn closes(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.close).collect()
}

pub fn highs(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.high).collect()
}

pub fn lows(candles: &[Candle]) -> Vec<f64> {
    candles.iter().map(|c| c.low).collect()
}

/// The six timeframes the agent observes, shortest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Timeframe {
    Minute1,
    Minute5,
    Minute15,
    Hour1,
    Hour4,
    Day1,
}

impl Timeframe {
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::Minute1 => 1,
            Timeframe::Minute5 => 5,
            Timeframe::Minute15 => 15,
            Timeframe::Hour1 => 60,
            Timeframe::Hour4 => 240,
            Timeframe::Day1 => 1440,
        }
    }

    /// Short label, also the exchange interval code.
    pub fn name(&self) -> &'static str {
        match self {
            Timeframe::Minute1 => "1m",
            Timeframe::Minute5 => "5m",
            Timeframe::Minute15 => "15m",
            Timeframe::Hour1 => "1h",
            Timeframe::Hour4 => "4h",
            Timeframe::Day1 => "1d",
        }
    }

    pub fn all() -> Vec<Timeframe> {
        vec![
            Timeframe::Day1,
            Timeframe::Hour4,
            Timeframe::Hour1,
            Timeframe::Minute15,
            Timeframe::Minute5,
            Timeframe::Minute1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Position direction
impl FromStr for Timeframe {
    type Err = TradingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Timeframe::all()
            .into_iter()
            .find(|tf| tf.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TradingError::InvalidResponse(format!("unknown timeframe {:?}", s)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn name(&self) -> &'static str {
        match self {
            Side::Long => "LONG",
            Side::Short => "SHORT",
        }
    }

    pub fn opposite(&self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }

    /// Percentage P&L of moving from `entry` to `exit` in this direction.
    pub fn pnl_pct(&self, entry: Decimal, exit: Decimal) -> Decimal {
        if entry.is_zero() {
            return Decimal::ZERO;
        }
        let diff = match self {
            Side::Long => exit - entry,
            Side::Short => entry - exit,
        };
        diff / entry * Decimal::ONE_HUNDRED
    }

    /// True when `price` has moved in this side's favor relative to `reference`.
    pub fn is_favorable(&self, price: Decimal, reference: Decimal) -> bool {
        match self {
            Side::Long => price > reference,
            Side::Short => price < reference,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Trade candidate produced once per cycle by the signal generator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// None means the generator found nothing to trade.
    pub side: Option<Side>,
    pub should_trade: bool,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Decimal,
    /// 0-100
    pub confidence: f64,
    pub size_pct: f64,
    pub timeframe_confirmations: u32,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub reason: String,
}

impl Signal {
    /// A non-trading signal that still carries the indicator snapshot.
    pub fn none(price: Decimal, rsi: f64, ema_fast: f64, ema_slow: f64, reason: impl Into<String>) -> Self {
        Self {
            side: None,
            should_trade: false,
            entry_price: price,
            stop_loss: Decimal::ZERO,
            take_profit_1: Decimal::ZERO,
            take_profit_2: Decimal::ZERO,
            confidence: 0.0,
            size_pct: 0.0,
            timeframe_confirmations: 0,
            rsi,
            ema_fast,
            ema_slow,
            reason: reason.into(),
        }
    }

    /// Reward:risk measured to TP2. Falls back to 1.0 when the stop is on the wrong side.
    pub fn reward_risk_ratio(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        let (reward, risk) = match self.side {
            Some(Side::Long) => (
                self.take_profit_2 - self.entry_price,
                self.entry_price - self.stop_loss,
            ),
            Some(Side::Short) => (
                self.entry_price - self.take_profit_2,
                self.stop_loss - self.entry_price,
            ),
            None => return 1.0,
        };
        if risk <= Decimal::ZERO {
            return 1.0;
        }
        (reward / risk).to_f64().unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn candle(minute: u32, o: f64, h: f64, l: f64, c: f64) -> Candle {
        Candle {
            timestamp: Utc.with_ymd_and_hms(2026, 1, 5, 10, minute, 0).unwrap(),
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 10.0,
        }
    }

    #[test]
    fn valid_series_passes() {
        let series = vec![
            candle(0, 100.0, 101.0, 99.0, 100.5),
            candle(1, 100.5, 102.0, 100.0, 101.5),
        ];
        assert!(validate_series(&series).is_ok());
    }

    #[test]
    fn high_below_close_is_integrity_error() {
        let series = vec![candle(0, 100.0, 100.2, 99.0, 100.5)];
        assert!(matches!(
            validate_series(&series),
            Err(TradingError::DataIntegrity(_))
        ));
    }

    #[test]
    fn duplicate_timestamp_is_integrity_error() {
        let series = vec![
            candle(3, 100.0, 101.0, 99.0, 100.5),
            candle(3, 100.5, 102.0, 100.0, 101.5),
        ];
        let err = validate_series(&series).unwrap_err();
        assert!(err.to_string().contains("strictly increasing"));
    }

    #[test]
    fn pnl_is_mirrored_for_short() {
        assert_eq!(Side::Long.pnl_pct(dec!(100), dec!(101)), dec!(1));
        assert_eq!(Side::Short.pnl_pct(dec!(100), dec!(101)), dec!(-1));
    }

    #[test]
    fn reward_risk_uses_tp2() {
        let mut signal = Signal::none(dec!(100), 50.0, 0.0, 0.0, "test");
        signal.side = Some(Side::Long);
        signal.stop_loss = dec!(99);
        signal.take_profit_2 = dec!(102);
        assert!((signal.reward_risk_ratio() - 2.0).abs() < 1e-9);

        signal.stop_loss = dec!(101);
        assert_eq!(signal.reward_risk_ratio(), 1.0);
    }

    #[test]
    fn timeframe_parses_from_interval_name() {
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::Hour4);
        assert_eq!(" 1D ".parse::<Timeframe>().unwrap(), Timeframe::Day1);
        assert!("2h".parse::<Timeframe>().is_err());
    }

    #[test]
    fn only_authentication_is_fatal() {
        assert!(TradingError::Authentication("bad key".into()).is_fatal());
        assert!(!TradingError::Connectivity("timeout".into()).is_fatal());
        assert!(!TradingError::DataIntegrity("gap".into()).is_retryable());
    }
}
