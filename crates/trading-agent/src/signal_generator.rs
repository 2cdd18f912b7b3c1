use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use technical_analysis::{ema_last, rsi_last};
use trading_core::{closes, Candle, Side, Signal, SignalGenerator};

const RSI_PERIOD: usize = 7;
const EMA_FAST: usize = 9;
const EMA_SLOW: usize = 21;
const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// Stop and target distances from the entry, in percent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PctSchedule {
    pub sl_pct: Decimal,
    pub tp1_pct: Decimal,
    pub tp2_pct: Decimal,
}

impl PctSchedule {
    /// (stop_loss, take_profit_1, take_profit_2) for an entry at `price`.
    pub fn levels(&self, side: Side, price: Decimal) -> (Decimal, Decimal, Decimal) {
        let pct = |p: Decimal| p / Decimal::ONE_HUNDRED;
        match side {
            Side::Long => (
                price * (Decimal::ONE - pct(self.sl_pct)),
                price * (Decimal::ONE + pct(self.tp1_pct)),
                price * (Decimal::ONE + pct(self.tp2_pct)),
            ),
            Side::Short => (
                price * (Decimal::ONE + pct(self.sl_pct)),
                price * (Decimal::ONE - pct(self.tp1_pct)),
                price * (Decimal::ONE - pct(self.tp2_pct)),
            ),
        }
    }

    /// Turn `signal` into a trade candidate on `side` priced off `price`.
    pub fn apply(&self, signal: &mut Signal, side: Side, price: Decimal) {
        let (sl, tp1, tp2) = self.levels(side, price);
        signal.side = Some(side);
        signal.should_trade = true;
        signal.entry_price = price;
        signal.stop_loss = sl;
        signal.take_profit_1 = tp1;
        signal.take_profit_2 = tp2;
    }
}

/// RSI(7) extremes confirmed by the EMA(9)/EMA(21) cross on the primary timeframe.
pub struct RsiEmaSignalGenerator {
    schedule: PctSchedule,
}

impl RsiEmaSignalGenerator {
    pub fn new(schedule: PctSchedule) -> Self {
        Self { schedule }
    }
}

fn trend_side(candles: &[Candle]) -> Option<Side> {
    if candles.len() <= EMA_SLOW {
        return None;
    }
    let c = closes(candles);
    let (fast, slow) = (ema_last(&c, EMA_FAST), ema_last(&c, EMA_SLOW));
    if fast > slow {
        Some(Side::Long)
    } else if fast < slow {
        Some(Side::Short)
    } else {
        None
    }
}

impl SignalGenerator for RsiEmaSignalGenerator {
    fn generate(&self, primary: &[Candle], higher: &[Candle]) -> Signal {
        let Some(last) = primary.last() else {
            return Signal::none(Decimal::ZERO, 50.0, 0.0, 0.0, "no candles");
        };
        let price = Decimal::from_f64(last.close).unwrap_or_default();
        let c = closes(primary);
        let rsi = rsi_last(&c, RSI_PERIOD);
        let ema_fast = ema_last(&c, EMA_FAST);
        let ema_slow = ema_last(&c, EMA_SLOW);

        if primary.len() <= EMA_SLOW {
            return Signal::none(price, rsi, ema_fast, ema_slow, "not enough candles for EMA21");
        }

        let side = if rsi < RSI_OVERSOLD && ema_fast >= ema_slow {
            Side::Long
        } else if rsi > RSI_OVERBOUGHT && ema_fast <= ema_slow {
            Side::Short
        } else {
            return Signal::none(
                price,
                rsi,
                ema_fast,
                ema_slow,
                format!("RSI {:.1} with EMA9 {:.2} / EMA21 {:.2}: no setup", rsi, ema_fast, ema_slow),
            );
        };

        let mut signal = Signal::none(price, rsi, ema_fast, ema_slow, "");
        self.schedule.apply(&mut signal, side, price);
        signal.confidence = ((rsi - 50.0).abs() * 2.0).min(100.0);
        signal.size_pct = 100.0;
        signal.timeframe_confirmations = 1 + u32::from(trend_side(higher) == Some(side));
        signal.reason = format!(
            "{} setup: RSI {:.1}, EMA9 {:.2} vs EMA21 {:.2}",
            side, rsi, ema_fast, ema_slow
        );
        signal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn schedule() -> PctSchedule {
        PctSchedule {
            sl_pct: dec!(1.0),
            tp1_pct: dec!(1.0),
            tp2_pct: dec!(2.0),
        }
    }

    fn series(closes: &[f64]) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2026, 2, 2, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                timestamp: start + Duration::hours(4 * i as i64),
                open: c,
                high: c + 5.0,
                low: c - 5.0,
                close: c,
                volume: 100.0,
            })
            .collect()
    }

    #[test]
    fn schedule_levels_are_exact() {
        let (sl, tp1, tp2) = schedule().levels(Side::Long, dec!(91300));
        assert_eq!(sl, dec!(90387));
        assert_eq!(tp1, dec!(92213));
        assert_eq!(tp2, dec!(93126));

        let (sl, tp1, tp2) = schedule().levels(Side::Short, dec!(91300));
        assert_eq!(sl, dec!(92213));
        assert_eq!(tp1, dec!(90387));
        assert_eq!(tp2, dec!(89474));
    }

    #[test]
    fn sharp_dip_in_uptrend_is_long() {
        // Long climb keeps EMA9 above EMA21, then a one-sided pullback drives RSI(7) down
        let mut closes: Vec<f64> = (0..60).map(|i| 1_000.0 + i as f64 * 20.0).collect();
        closes.extend((0..13).map(|k| 2_182.0 - 10.0 * k as f64));
        let candles = series(&closes);

        let signal = RsiEmaSignalGenerator::new(schedule()).generate(&candles, &[]);
        assert!(signal.rsi < RSI_OVERSOLD, "rsi {}", signal.rsi);
        assert!(signal.ema_fast >= signal.ema_slow);
        assert_eq!(signal.side, Some(Side::Long));
        assert!(signal.should_trade);
        assert!(signal.stop_loss < signal.entry_price && signal.take_profit_1 > signal.entry_price);
        assert!(signal.confidence > 40.0);
    }

    #[test]
    fn steady_trend_has_no_setup() {
        let closes: Vec<f64> = (0..60).map(|i| 1_000.0 + (i % 2) as f64 * 3.0).collect();
        let signal = RsiEmaSignalGenerator::new(schedule()).generate(&series(&closes), &[]);
        assert!(!signal.should_trade);
        assert!(signal.side.is_none());
    }

    #[test]
    fn short_history_never_trades() {
        let signal = RsiEmaSignalGenerator::new(schedule()).generate(&series(&[100.0; 10]), &[]);
        assert!(!signal.should_trade);
        let signal = RsiEmaSignalGenerator::new(schedule()).generate(&[], &[]);
        assert_eq!(signal.reason, "no candles");
    }
}
