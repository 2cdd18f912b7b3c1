use trading_core::Candle;

/// Exponential Moving Average seeded with the SMA of the first `period` values.
pub fn ema(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.is_empty() {
        return vec![];
    }

    if data.len() < period {
        return vec![data.iter().sum::<f64>() / data.len() as f64];
    }

    let multiplier = 2.0 / (period as f64 + 1.0);
    let mut result = Vec::with_capacity(data.len() - period + 1);
    result.push(data[..period].iter().sum::<f64>() / period as f64);

    for value in &data[period..] {
        let prev = result[result.len() - 1];
        result.push((value - prev) * multiplier + prev);
    }

    result
}

/// Last EMA value, or the last price when the series is shorter than the period.
pub fn ema_last(data: &[f64], period: usize) -> f64 {
    if data.len() < period {
        return data.last().copied().unwrap_or(0.0);
    }
    ema(data, period).last().copied().unwrap_or(0.0)
}

/// Relative Strength Index (Wilder smoothing)
pub fn rsi(data: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || data.len() < period + 1 {
        return vec![];
    }

    let (gains, losses) = split_changes(data);

    let mut avg_gain = gains[..period].iter().sum::<f64>() / period as f64;
    let mut avg_loss = losses[..period].iter().sum::<f64>() / period as f64;

    let mut rsi_values = Vec::with_capacity(data.len() - period);
    rsi_values.push(rsi_from_averages(avg_gain, avg_loss));

    for i in period..gains.len() {
        avg_gain = (avg_gain * (period - 1) as f64 + gains[i]) / period as f64;
        avg_loss = (avg_loss * (period - 1) as f64 + losses[i]) / period as f64;
        rsi_values.push(rsi_from_averages(avg_gain, avg_loss));
    }

    rsi_values
}

/// Latest Wilder RSI, or 50 when there is not enough data.
pub fn rsi_last(data: &[f64], period: usize) -> f64 {
    rsi(data, period).last().copied().unwrap_or(50.0)
}

fn split_changes(data: &[f64]) -> (Vec<f64>, Vec<f64>) {
    data.windows(2)
        .map(|w| {
            let change = w[1] - w[0];
            if change > 0.0 {
                (change, 0.0)
            } else {
                (0.0, change.abs())
            }
        })
        .unzip()
}

fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - (100.0 / (1.0 + rs))
}

fn true_ranges(candles: &[Candle]) -> Vec<f64> {
    candles
        .windows(2)
        .map(|w| {
            let high_low = w[1].high - w[1].low;
            let high_close = (w[1].high - w[0].close).abs();
            let low_close = (w[1].low - w[0].close).abs();
            high_low.max(high_close).max(low_close)
        })
        .collect()
}

/// Average True Range (Wilder smoothing)
pub fn atr(candles: &[Candle], period: usize) -> Vec<f64> {
    if period == 0 || candles.len() < period + 1 {
        return vec![];
    }

    let tr = true_ranges(candles);
    let mut atr = tr[..period].iter().sum::<f64>() / period as f64;
    let mut atr_values = vec![atr];

    for value in &tr[period..] {
        atr = (atr * (period - 1) as f64 + value) / period as f64;
        atr_values.push(atr);
    }

    atr_values
}

/// Latest Wilder ATR, 0 when there is not enough data.
pub fn atr_last(candles: &[Candle], period: usize) -> f64 {
    atr(candles, period).last().copied().unwrap_or(0.0)
}

/// ATR as a percentage of the last close.
pub fn volatility_pct(candles: &[Candle], period: usize) -> f64 {
    match candles.last() {
        Some(last) if last.close > 0.0 => atr_last(candles, period) / last.close * 100.0,
        _ => 0.0,
    }
}
