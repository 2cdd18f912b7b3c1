#[cfg(test)]
mod tests {
    use super::super::indicators::*;
    use chrono::{Duration, TimeZone, Utc};
    use trading_core::Candle;

    fn sample_prices() -> Vec<f64> {
        vec![
            44.34, 44.09, 44.15, 43.61, 44.33, 44.83, 45.10, 45.42, 45.84, 46.08,
            45.89, 46.03, 45.61, 46.28, 46.28, 46.00, 46.03, 46.41, 46.22, 45.64,
        ]
    }

    fn sample_candles() -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap();
        (0..15)
            .map(|i| {
                let open = 100.0 + i as f64;
                Candle {
                    timestamp: start + Duration::hours(i),
                    open,
                    high: open + 2.0,
                    low: open - 1.0,
                    close: open + 1.0,
                    volume: 1_000.0,
                }
            })
            .collect()
    }

    #[test]
    fn test_ema_tracks_trend() {
        let data: Vec<f64> = (1..=30).map(|v| v as f64).collect();
        let fast = ema_last(&data, 9);
        let slow = ema_last(&data, 21);
        assert!(fast > slow);
    }

    #[test]
    fn test_ema_last_short_series_returns_last_price() {
        assert_eq!(ema_last(&[10.0, 11.0], 9), 11.0);
        assert_eq!(ema_last(&[], 9), 0.0);
    }

    #[test]
    fn test_rsi_range() {
        let result = rsi(&sample_prices(), 14);
        assert!(!result.is_empty());
        assert!(result.iter().all(|v| (0.0..=100.0).contains(v)));
    }

    #[test]
    fn test_rsi_last_extremes() {
        let rising: Vec<f64> = (0..10).map(|v| v as f64).collect();
        assert_eq!(rsi_last(&rising, 7), 100.0);

        let falling: Vec<f64> = (0..10).rev().map(|v| v as f64).collect();
        assert!(rsi_last(&falling, 7) < 1e-9);

        assert_eq!(rsi_last(&[1.0, 2.0], 7), 50.0);
    }

    #[test]
    fn test_rsi_last_uses_wilder_smoothing() {
        // 7 gains of 2, 7 gains of 1, then a loss of 7
        let mut data = vec![0.0];
        for step in [2.0; 7].into_iter().chain([1.0; 7]).chain([-7.0]) {
            data.push(data[data.len() - 1] + step);
        }

        let mut avg_gain = 2.0;
        for _ in 0..7 {
            avg_gain = (avg_gain * 6.0 + 1.0) / 7.0;
        }
        avg_gain = avg_gain * 6.0 / 7.0;
        let expected = 100.0 - 100.0 / (1.0 + avg_gain / 1.0);

        let last = rsi_last(&data, 7);
        assert!((last - expected).abs() < 1e-9, "rsi {last} expected {expected}");
        // A plain average of the last 7 changes would read 46.15
        assert!(last > 50.0);
    }

    #[test]
    fn test_atr_constant_range() {
        let candles = sample_candles();
        let values = atr(&candles, 5);
        assert!(!values.is_empty());
        // every true range is 3.0 (high - low) in this series
        assert!(values.iter().all(|v| (v - 3.0).abs() < 1e-9));
        assert!((atr_last(&candles, 14) - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_pct() {
        let candles = sample_candles();
        let vol = volatility_pct(&candles, 14);
        let last_close = candles.last().unwrap().close;
        assert!((vol - 3.0 / last_close * 100.0).abs() < 1e-9);
        assert_eq!(volatility_pct(&candles[..3], 14), 0.0);
    }
}
