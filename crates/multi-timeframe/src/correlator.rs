use serde::{Deserialize, Serialize};
use trading_core::Timeframe;

use crate::{weight, Direction, TimeframeReading};

const DIRECTION_SHARE: f64 = 0.6;
const HIGH_VOLATILITY_PCT: f64 = 2.5;
const LOW_VOLATILITY_PCT: f64 = 1.0;
const EXTREME_VOLATILITY_PCT: f64 = 4.0;
const UNANIMITY_BONUS: i32 = 15;
const RISK_PENALTY: i32 = 10;
const ENTRY_SIGNAL_BONUS: i32 = 5;

const LOWER_TIMEFRAMES: [Timeframe; 3] = [Timeframe::Minute15, Timeframe::Minute5, Timeframe::Minute1];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VolatilityContext {
    High,
    Moderate,
    Low,
}

/// Aggregate view over all timeframes for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationResult {
    /// 0-100, exactly 50 when the direction is neutral
    pub alignment_score: u8,
    pub primary_direction: Direction,
    /// 0-100
    pub opportunity_score: u8,
    pub risk_factors: Vec<String>,
    pub entry_recommendation: String,
    pub volatility_context: VolatilityContext,
    /// 0-1
    pub confidence: f64,
    pub readings: Vec<TimeframeReading>,
}

impl CorrelationResult {
    fn no_data() -> Self {
        Self {
            alignment_score: 50,
            primary_direction: Direction::Neutral,
            opportunity_score: 0,
            risk_factors: vec!["NO_DATA".to_string()],
            entry_recommendation: "WAIT_NO_DATA".to_string(),
            volatility_context: VolatilityContext::Moderate,
            confidence: 0.0,
            readings: Vec::new(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} alignment {}% opportunity {} -> {} (risks: {})",
            self.primary_direction.name(),
            self.alignment_score,
            self.opportunity_score,
            self.entry_recommendation,
            if self.risk_factors.is_empty() {
                "none".to_string()
            } else {
                self.risk_factors.join(", ")
            }
        )
    }
}

fn direction_of(readings: &[TimeframeReading], timeframe: Timeframe) -> Option<Direction> {
    readings.iter().find(|r| r.timeframe == timeframe).map(|r| r.direction)
}

fn is_extreme_rsi(rsi: f64, low: f64, high: f64) -> bool {
    rsi < low || rsi > high
}

/// Score a per-timeframe snapshot. Pure: holds nothing across cycles.
pub fn correlate(readings: &[TimeframeReading]) -> CorrelationResult {
    if readings.is_empty() {
        return CorrelationResult::no_data();
    }

    let total: u32 = readings.iter().map(|r| weight(r.timeframe)).sum();
    let weight_of = |dir: Direction| -> u32 {
        readings
            .iter()
            .filter(|r| r.direction == dir)
            .map(|r| weight(r.timeframe))
            .sum()
    };
    let bullish = weight_of(Direction::Bullish);
    let bearish = weight_of(Direction::Bearish);

    let primary_direction = if bullish as f64 / total as f64 > DIRECTION_SHARE {
        Direction::Bullish
    } else if bearish as f64 / total as f64 > DIRECTION_SHARE {
        Direction::Bearish
    } else {
        Direction::Neutral
    };

    let alignment_score: u8 = match primary_direction {
        Direction::Neutral => 50,
        Direction::Bullish => (bullish * 100 / total) as u8,
        Direction::Bearish => (bearish * 100 / total) as u8,
    };

    let mean_volatility =
        readings.iter().map(|r| r.volatility_pct).sum::<f64>() / readings.len() as f64;
    let volatility_context = if mean_volatility > HIGH_VOLATILITY_PCT {
        VolatilityContext::High
    } else if mean_volatility < LOW_VOLATILITY_PCT {
        VolatilityContext::Low
    } else {
        VolatilityContext::Moderate
    };

    let mut risk_factors = Vec::new();
    if primary_direction.is_directional() && alignment_score < 50 {
        risk_factors.push("LOW_ALIGNMENT".to_string());
    }
    let daily = direction_of(readings, Timeframe::Day1);
    let four_hour = direction_of(readings, Timeframe::Hour4);
    if let (Some(d), Some(h4)) = (daily, four_hour) {
        if d.is_directional() && h4.is_directional() && d != h4 {
            risk_factors.push("DAILY_4H_DIVERGENCE".to_string());
        }
    }
    if readings.iter().any(|r| r.volatility_pct > EXTREME_VOLATILITY_PCT) {
        risk_factors.push("EXTREME_VOLATILITY".to_string());
    }
    let extreme_rsi = readings.iter().filter(|r| is_extreme_rsi(r.rsi, 20.0, 80.0)).count();
    if extreme_rsi >= 3 {
        risk_factors.push("MULTI_TF_EXTREME_RSI".to_string());
    }

    let mut opportunity = alignment_score as i32;
    let hourly = direction_of(readings, Timeframe::Hour1);
    if let (Some(d), Some(h4), Some(h1)) = (daily, four_hour, hourly) {
        if d.is_directional() && d == h4 && h4 == h1 {
            opportunity += UNANIMITY_BONUS;
        }
    }
    opportunity -= RISK_PENALTY * risk_factors.len() as i32;

    let lower: Vec<&TimeframeReading> = readings
        .iter()
        .filter(|r| LOWER_TIMEFRAMES.contains(&r.timeframe))
        .collect();
    if alignment_score > 70 {
        opportunity += ENTRY_SIGNAL_BONUS
            * lower.iter().filter(|r| is_extreme_rsi(r.rsi, 25.0, 75.0)).count() as i32;
    }
    let opportunity_score = opportunity.clamp(0, 100) as u8;

    let entry_recommendation =
        recommend(alignment_score, opportunity_score, primary_direction, &lower);

    let confidence = ((alignment_score as f64 / 100.0 + opportunity_score as f64 / 100.0) / 2.0
        - 0.1 * risk_factors.len() as f64)
        .clamp(0.0, 1.0);

    CorrelationResult {
        alignment_score,
        primary_direction,
        opportunity_score,
        risk_factors,
        entry_recommendation,
        volatility_context,
        confidence,
        readings: readings.to_vec(),
    }
}

fn recommend(
    alignment: u8,
    opportunity: u8,
    direction: Direction,
    lower: &[&TimeframeReading],
) -> String {
    if alignment < 40 {
        return "WAIT_NO_ALIGNMENT".to_string();
    }
    if opportunity < 30 {
        return "WAIT_LOW_OPPORTUNITY".to_string();
    }

    let (side, signal) = match direction {
        Direction::Neutral => return "WAIT_NEUTRAL_MARKET".to_string(),
        Direction::Bullish => (
            "LONG",
            if lower.iter().any(|r| r.rsi < 30.0) { "OVERSOLD" } else { "NO_SIGNAL" },
        ),
        Direction::Bearish => (
            "SHORT",
            if lower.iter().any(|r| r.rsi > 70.0) { "OVERBOUGHT" } else { "NO_SIGNAL" },
        ),
    };

    let grade = if alignment >= 80 && opportunity >= 70 {
        "STRONG"
    } else if alignment >= 60 && opportunity >= 50 {
        "MODERATE"
    } else {
        "WEAK"
    };

    format!("{}_{}_{}", grade, side, signal)
}
