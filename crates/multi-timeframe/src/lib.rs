use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use technical_analysis::{ema_last, rsi_last, volatility_pct};
use trading_core::{closes, Candle, CandleSource, Timeframe, TradingResult};

mod correlator;

pub use correlator::{correlate, CorrelationResult, VolatilityContext};

const RSI_PERIOD: usize = 7;
const EMA_FAST: usize = 9;
const EMA_SLOW: usize = 21;
const ATR_PERIOD: usize = 14;
const MIN_CANDLES: usize = 20;
/// EMAs closer than this fraction are treated as flat
const EMA_BAND: f64 = 0.002;

/// Momentum label of a single timeframe, also used for the aggregate direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Bullish,
    Bearish,
    Neutral,
}

impl Direction {
    pub fn name(&self) -> &'static str {
        match self {
            Direction::Bullish => "BULLISH",
            Direction::Bearish => "BEARISH",
            Direction::Neutral => "NEUTRAL",
        }
    }

    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Neutral)
    }
}

/// Fixed hierarchical weight of a timeframe; the six weights sum to 100.
pub fn weight(timeframe: Timeframe) -> u32 {
    match timeframe {
        Timeframe::Day1 => 40,
        Timeframe::Hour4 => 25,
        Timeframe::Hour1 => 20,
        Timeframe::Minute15 => 10,
        Timeframe::Minute5 => 3,
        Timeframe::Minute1 => 2,
    }
}

/// Indicator snapshot of one timeframe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeframeReading {
    pub timeframe: Timeframe,
    pub direction: Direction,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub volatility_pct: f64,
}

impl TimeframeReading {
    pub fn neutral(timeframe: Timeframe) -> Self {
        Self {
            timeframe,
            direction: Direction::Neutral,
            rsi: 50.0,
            ema_fast: 0.0,
            ema_slow: 0.0,
            volatility_pct: 0.0,
        }
    }
}

/// Build the reading for one timeframe. Short series read as neutral.
pub fn analyze_timeframe(timeframe: Timeframe, candles: &[Candle]) -> TimeframeReading {
    if candles.len() < MIN_CANDLES {
        return TimeframeReading::neutral(timeframe);
    }

    let prices = closes(candles);
    let ema_fast = ema_last(&prices, EMA_FAST);
    let ema_slow = ema_last(&prices, EMA_SLOW);

    let direction = if ema_fast > ema_slow * (1.0 + EMA_BAND) {
        Direction::Bullish
    } else if ema_fast < ema_slow * (1.0 - EMA_BAND) {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    TimeframeReading {
        timeframe,
        direction,
        rsi: rsi_last(&prices, RSI_PERIOD),
        ema_fast,
        ema_slow,
        volatility_pct: volatility_pct(candles, ATR_PERIOD),
    }
}

/// Candles for every timeframe that answered in this cycle.
#[derive(Debug, Clone, Default)]
pub struct MultiTimeframeData {
    pub data: HashMap<Timeframe, Vec<Candle>>,
}

impl MultiTimeframeData {
    pub fn get(&self, timeframe: Timeframe) -> Option<&[Candle]> {
        self.data.get(&timeframe).map(|c| c.as_slice())
    }

    /// One reading per available timeframe, longest timeframe first.
    pub fn readings(&self) -> Vec<TimeframeReading> {
        Timeframe::all()
            .into_iter()
            .filter_map(|tf| self.data.get(&tf).map(|candles| analyze_timeframe(tf, candles)))
            .collect()
    }
}

/// Fetch all six timeframes concurrently.
///
/// Timeframes that fail are left out of the result; a fatal error (bad
/// credentials) aborts the whole fetch.
pub async fn fetch_all_timeframes(
    source: &dyn CandleSource,
    limit: usize,
) -> TradingResult<MultiTimeframeData> {
    let futures: Vec<_> = Timeframe::all()
        .into_iter()
        .map(|timeframe| async move { (timeframe, source.fetch_candles(timeframe, limit).await) })
        .collect();

    let mut data = HashMap::new();
    for (timeframe, result) in join_all(futures).await {
        match result {
            Ok(candles) if !candles.is_empty() => {
                data.insert(timeframe, candles);
            }
            Ok(_) => tracing::debug!(timeframe = %timeframe, "No candles returned"),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => tracing::warn!(timeframe = %timeframe, error = %e, "Timeframe fetch failed"),
        }
    }

    Ok(MultiTimeframeData { data })
}
