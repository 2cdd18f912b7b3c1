use serde::{Deserialize, Serialize};
use std::fmt::Write;
use trading_core::Side;

/// Gatekeeper selectivity, 1 (permissive) to 5 (most selective).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PermissivenessLevel(u8);

impl PermissivenessLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    /// Out-of-range values clamp to the nearest valid level.
    pub fn new(level: i64) -> Self {
        Self(level.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// Minimum oracle confidence an approval needs at this level.
    pub fn min_confidence(&self) -> f64 {
        match self.0 {
            1 => 0.30,
            2 => 0.40,
            3 => 0.50,
            4 => 0.60,
            _ => 0.75,
        }
    }

    pub fn name(&self) -> &'static str {
        match self.0 {
            1 => "PERMISSIVE",
            2 => "MODERATE",
            3 => "BALANCED",
            4 => "SELECTIVE",
            _ => "MAXIMUM_SELECTIVE",
        }
    }
}

impl Default for PermissivenessLevel {
    fn default() -> Self {
        Self(2)
    }
}

/// Multi-timeframe context forwarded to the oracle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationContext {
    pub alignment_score: u8,
    pub primary_direction: String,
    pub opportunity_score: u8,
    pub confidence: f64,
    pub risk_factors: Vec<String>,
    pub volatility_context: String,
    pub entry_recommendation: String,
}

/// Indicator snapshot the oracle decides on.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleRequest {
    pub level: PermissivenessLevel,
    pub side: Option<Side>,
    pub price: f64,
    pub rsi: f64,
    pub ema_fast: f64,
    pub ema_slow: f64,
    pub phase: String,
    pub open_positions: u32,
    pub risk_reward_ratio: f64,
    pub correlation: Option<CorrelationContext>,
}

impl OracleRequest {
    /// Compact text form sent as the user message. Also the cache key, so two
    /// requests that render the same are the same question.
    pub fn render_message(&self) -> String {
        let mut msg = format!(
            "ANALYSIS:\nLevel: {}\nSide: {}\nRSI: {:.1}\nPrice: ${:.2}\nEMA: {:.0} vs {:.0}\nPhase: {}\nOpen: {}\nR:R: 1:{:.1}",
            self.level.value(),
            self.side.map(|s| s.name()).unwrap_or("NONE"),
            self.rsi,
            self.price,
            self.ema_fast,
            self.ema_slow,
            self.phase,
            self.open_positions,
            self.risk_reward_ratio,
        );

        if let Some(ctx) = &self.correlation {
            let _ = write!(
                msg,
                "\n\nMULTI-TIMEFRAME ANALYSIS:\nAlignment: {}%\nDirection: {}\nOpportunity: {}/100\nConfidence: {:.2}\nVolatility Context: {}\nRecommendation: {}",
                ctx.alignment_score,
                ctx.primary_direction,
                ctx.opportunity_score,
                ctx.confidence,
                ctx.volatility_context,
                ctx.entry_recommendation,
            );
            if !ctx.risk_factors.is_empty() {
                let _ = write!(msg, "\nRisk Factors: {}", ctx.risk_factors.join(", "));
            }
        }

        msg
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleDecision {
    pub should_enter: bool,
    /// 0-1
    pub confidence: f64,
    #[serde(default)]
    pub reason: String,
}

impl OracleDecision {
    pub fn reject(reason: impl Into<String>) -> Self {
        Self {
            should_enter: false,
            confidence: 0.0,
            reason: reason.into(),
        }
    }

    /// Final approval: the oracle said yes with enough confidence for `level`.
    pub fn approves(&self, level: PermissivenessLevel) -> bool {
        self.should_enter && self.confidence >= level.min_confidence()
    }
}
