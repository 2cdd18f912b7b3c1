use serde::{Deserialize, Serialize};
use trading_core::{TradingError, TradingResult};

const VOLATILITY_FLOOR_PCT: f64 = 0.5;
const VOLATILITY_CEILING_PCT: f64 = 15.0;
const VOLATILITY_PENALTY: f64 = 0.8;

/// Trend phase derived from the highs/lows structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrendPhase {
    BullishStrong,
    BullishWeak,
    BearishStrong,
    BearishWeak,
    Transitional,
    Neutral,
}

impl TrendPhase {
    pub fn name(&self) -> &'static str {
        match self {
            TrendPhase::BullishStrong => "BULLISH_STRONG",
            TrendPhase::BullishWeak => "BULLISH_WEAK",
            TrendPhase::BearishStrong => "BEARISH_STRONG",
            TrendPhase::BearishWeak => "BEARISH_WEAK",
            TrendPhase::Transitional => "TRANSITIONAL",
            TrendPhase::Neutral => "NEUTRAL",
        }
    }

    pub fn is_bullish(&self) -> bool {
        matches!(self, TrendPhase::BullishStrong | TrendPhase::BullishWeak)
    }

    pub fn is_bearish(&self) -> bool {
        matches!(self, TrendPhase::BearishStrong | TrendPhase::BearishWeak)
    }

    /// +1 bullish, -1 bearish, 0 for transitional/neutral
    fn polarity(&self) -> i8 {
        if self.is_bullish() {
            1
        } else if self.is_bearish() {
            -1
        } else {
            0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TrendStrength {
    Clear,
    Moderate,
    Weak,
    None,
}

impl TrendStrength {
    pub fn from_confidence(confidence: f64) -> Self {
        match confidence {
            c if c >= 0.8 => TrendStrength::Clear,
            c if c >= 0.6 => TrendStrength::Moderate,
            c if c >= 0.4 => TrendStrength::Weak,
            _ => TrendStrength::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SequenceTrend {
    Increasing,
    Decreasing,
    Flat,
    Unknown,
}

fn classify_sequence(points: &[f64]) -> SequenceTrend {
    if points.len() < 2 {
        return SequenceTrend::Unknown;
    }
    if points.windows(2).all(|w| w[0] < w[1]) {
        SequenceTrend::Increasing
    } else if points.windows(2).all(|w| w[0] > w[1]) {
        SequenceTrend::Decreasing
    } else {
        SequenceTrend::Flat
    }
}

/// Local maxima: endpoints plus every point at least as high as both neighbors.
pub fn local_maxima(values: &[f64]) -> Vec<f64> {
    local_extrema(values, |cur, other| cur >= other)
}

/// Local minima: endpoints plus every point at most as low as both neighbors.
pub fn local_minima(values: &[f64]) -> Vec<f64> {
    local_extrema(values, |cur, other| cur <= other)
}

fn local_extrema(values: &[f64], dominates: impl Fn(f64, f64) -> bool) -> Vec<f64> {
    let n = values.len();
    values
        .iter()
        .enumerate()
        .filter(|&(i, &v)| {
            i == 0 || i == n - 1 || (dominates(v, values[i - 1]) && dominates(v, values[i + 1]))
        })
        .map(|(_, &v)| v)
        .collect()
}

fn pct_of_rising(points: &[f64]) -> f64 {
    if points.len() < 2 {
        return 0.0;
    }
    let rising = points.windows(2).filter(|w| w[1] > w[0]).count();
    rising as f64 / (points.len() - 1) as f64 * 100.0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructureAnalysis {
    pub phase: TrendPhase,
    pub confidence: f64,
    pub strength: TrendStrength,
    /// Polarity flipped against the previous cycle. Unconfirmed by itself.
    pub reversal: bool,
    pub previous_phase: Option<TrendPhase>,
    pub maxima: Vec<f64>,
    pub minima: Vec<f64>,
    pub higher_highs_pct: f64,
    pub higher_lows_pct: f64,
    pub range_pct: f64,
    pub description: String,
}

/// Classifies trend phase from highs/lows and remembers the last phase so a
/// polarity flip can be reported.
#[derive(Debug, Clone)]
pub struct StructureDetector {
    lookback: usize,
    previous_phase: Option<TrendPhase>,
}

impl Default for StructureDetector {
    fn default() -> Self {
        Self::new(20)
    }
}

impl StructureDetector {
    pub fn new(lookback: usize) -> Self {
        Self {
            lookback: lookback.max(3),
            previous_phase: None,
        }
    }

    pub fn previous_phase(&self) -> Option<TrendPhase> {
        self.previous_phase
    }

    pub fn analyze(
        &mut self,
        highs: &[f64],
        lows: &[f64],
        last_close: f64,
    ) -> TradingResult<StructureAnalysis> {
        if highs.len() < 3 || lows.len() < 3 {
            return Err(TradingError::InsufficientData(format!(
                "structure needs at least 3 candles, got {}",
                highs.len().min(lows.len())
            )));
        }
        if highs.len() != lows.len() {
            return Err(TradingError::DataIntegrity(format!(
                "highs ({}) and lows ({}) differ in length",
                highs.len(),
                lows.len()
            )));
        }

        let start = highs.len().saturating_sub(self.lookback);
        let highs = &highs[start..];
        let lows = &lows[start..];

        let maxima = local_maxima(highs);
        let minima = local_minima(lows);
        let max_trend = classify_sequence(&maxima);
        let min_trend = classify_sequence(&minima);
        let confirmed = (maxima.len() + minima.len()) as f64;

        use SequenceTrend::*;
        let (phase, base_confidence) = match (max_trend, min_trend) {
            (Increasing, Increasing) => (TrendPhase::BullishStrong, (confirmed / 8.0).min(1.0)),
            (Decreasing, Decreasing) => (TrendPhase::BearishStrong, (confirmed / 8.0).min(1.0)),
            (Increasing, Flat) => (TrendPhase::BullishWeak, 0.6),
            (Decreasing, Flat) => (TrendPhase::BearishWeak, 0.6),
            (Increasing, Decreasing) | (Decreasing, Increasing) => (TrendPhase::Transitional, 0.4),
            _ => (TrendPhase::Neutral, 0.3),
        };

        let max_high = highs.iter().cloned().fold(f64::MIN, f64::max);
        let min_low = lows.iter().cloned().fold(f64::MAX, f64::min);
        let range_pct = if last_close > 0.0 {
            (max_high - min_low) / last_close * 100.0
        } else {
            0.0
        };

        let mut confidence = base_confidence;
        if !(VOLATILITY_FLOOR_PCT..=VOLATILITY_CEILING_PCT).contains(&range_pct) {
            confidence *= VOLATILITY_PENALTY;
        }

        let reversal = match self.previous_phase {
            Some(prev) => {
                let (a, b) = (prev.polarity(), phase.polarity());
                a != 0 && b != 0 && a != b
            }
            None => false,
        };

        let higher_highs_pct = pct_of_rising(&maxima);
        let higher_lows_pct = pct_of_rising(&minima);
        let strength = TrendStrength::from_confidence(confidence);

        let description = format!(
            "{} ({:?}, conf {:.2}) HH {:.0}% HL {:.0}% range {:.2}%{}",
            phase.name(),
            strength,
            confidence,
            higher_highs_pct,
            higher_lows_pct,
            range_pct,
            if reversal { " REVERSAL (unconfirmed)" } else { "" }
        );

        let analysis = StructureAnalysis {
            phase,
            confidence,
            strength,
            reversal,
            previous_phase: self.previous_phase,
            maxima,
            minima,
            higher_highs_pct,
            higher_lows_pct,
            range_pct,
            description,
        };

        self.previous_phase = Some(phase);
        Ok(analysis)
    }
}
