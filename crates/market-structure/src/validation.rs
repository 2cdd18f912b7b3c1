use serde::{Deserialize, Serialize};
use trading_core::{highs, lows, Candle, Side, TradingResult};

use crate::referents::{calculate_referents, ReferentConfig, Referents};
use crate::structure::{StructureAnalysis, StructureDetector};

const MIN_TREND_CONFIDENCE: f64 = 0.4;
const COMPONENT_WEIGHT: f64 = 0.35;

/// Outcome of one T/Z/V component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    /// 0-1
    pub confidence: f64,
    pub description: String,
}

/// T: passes for any non-neutral phase with confidence >= 0.4.
pub fn validate_trend(analysis: &StructureAnalysis) -> ValidationResult {
    let directional = analysis.phase != crate::TrendPhase::Neutral;
    ValidationResult {
        passed: directional && analysis.confidence >= MIN_TREND_CONFIDENCE,
        confidence: analysis.confidence,
        description: analysis.description.clone(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ZoneClarity {
    VeryClear,
    Clear,
    Unclear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneValidation {
    pub result: ValidationResult,
    pub clarity: ZoneClarity,
    pub supports_below: usize,
    pub resistances_above: usize,
    pub nearest_support: Option<f64>,
    pub nearest_resistance: Option<f64>,
}

/// Z: needs at least two distinct levels on each side of price.
pub fn validate_zones(referents: &Referents) -> ZoneValidation {
    let price = referents.current_price;
    let supports_below = referents.supports.iter().filter(|l| l.price < price).count();
    let resistances_above = referents.resistances.iter().filter(|l| l.price > price).count();
    let fewest = supports_below.min(resistances_above);

    let (clarity, confidence) = match fewest {
        n if n >= 3 => (ZoneClarity::VeryClear, 0.9),
        2 => (ZoneClarity::Clear, 0.7),
        1 => (ZoneClarity::Unclear, 0.4),
        _ => (ZoneClarity::Unclear, 0.1),
    };

    ZoneValidation {
        result: ValidationResult {
            passed: clarity != ZoneClarity::Unclear,
            confidence,
            description: format!(
                "{:?}: {} supports below, {} resistances above",
                clarity, supports_below, resistances_above
            ),
        },
        clarity,
        supports_below,
        resistances_above,
        nearest_support: referents.nearest_support(),
        nearest_resistance: referents.nearest_resistance(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GapQuality {
    Excellent,
    Good,
    Acceptable,
    Marginal,
    Poor,
}

impl GapQuality {
    pub fn from_ratio(ratio: f64) -> Self {
        match ratio {
            r if r > 3.0 => GapQuality::Excellent,
            r if r > 2.5 => GapQuality::Good,
            r if r >= 2.0 => GapQuality::Acceptable,
            r if r > 1.5 => GapQuality::Marginal,
            _ => GapQuality::Poor,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GapValidation {
    pub result: ValidationResult,
    /// reward / risk, 0 when the entry is outside the zone
    pub ratio: f64,
    pub quality: GapQuality,
    pub reward: f64,
    pub risk: f64,
}

impl GapValidation {
    pub fn validation_passed(&self) -> bool {
        self.result.passed
    }
}

/// V: ratio = (resistance - entry) / (entry - support); passes iff ratio >= `min_ratio`.
/// Rejects outright unless support < entry < resistance.
pub fn validate_gap(entry: f64, support: f64, resistance: f64, min_ratio: f64) -> GapValidation {
    gap_from_legs(entry, support, resistance, min_ratio, resistance - entry, entry - support)
}

/// V for a concrete side: a short earns down to support and risks up to resistance.
pub fn validate_gap_for_side(
    side: Side,
    entry: f64,
    support: f64,
    resistance: f64,
    min_ratio: f64,
) -> GapValidation {
    match side {
        Side::Long => validate_gap(entry, support, resistance, min_ratio),
        Side::Short => gap_from_legs(entry, support, resistance, min_ratio, entry - support, resistance - entry),
    }
}

fn gap_from_legs(
    entry: f64,
    support: f64,
    resistance: f64,
    min_ratio: f64,
    reward: f64,
    risk: f64,
) -> GapValidation {
    if !(support < entry && entry < resistance) {
        return GapValidation {
            result: ValidationResult {
                passed: false,
                confidence: 0.0,
                description: format!(
                    "entry {:.2} not strictly between support {:.2} and resistance {:.2}",
                    entry, support, resistance
                ),
            },
            ratio: 0.0,
            quality: GapQuality::Poor,
            reward: 0.0,
            risk: 0.0,
        };
    }

    let ratio = reward / risk;
    let quality = GapQuality::from_ratio(ratio);
    let passed = ratio >= min_ratio;
    let confidence = match quality {
        GapQuality::Excellent => 0.9,
        GapQuality::Good => 0.8,
        GapQuality::Acceptable => 0.7,
        GapQuality::Marginal => 0.4,
        GapQuality::Poor => 0.2,
    };

    GapValidation {
        result: ValidationResult {
            passed,
            confidence,
            description: format!(
                "{:?} gap 1:{:.2} (reward {:.2} / risk {:.2}, min {:.1})",
                quality, ratio, reward, risk, min_ratio
            ),
        },
        ratio,
        quality,
        reward,
        risk,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TzvComponent {
    Trend,
    Zones,
    Gap,
}

/// Logical AND of the three components. Advisory only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteValidation {
    pub all_passed: bool,
    pub confidence: f64,
    pub failed_components: Vec<TzvComponent>,
}

impl CompleteValidation {
    pub fn combine(trend: &ValidationResult, zones: &ValidationResult, gap: &GapValidation, min_ratio: f64) -> Self {
        let mut failed_components = Vec::new();
        let mut confidence = 0.0;

        if trend.passed {
            confidence += COMPONENT_WEIGHT;
        } else {
            failed_components.push(TzvComponent::Trend);
        }
        if zones.passed {
            confidence += COMPONENT_WEIGHT;
        } else {
            failed_components.push(TzvComponent::Zones);
        }
        if !gap.result.passed {
            failed_components.push(TzvComponent::Gap);
        }
        confidence += if gap.ratio >= 3.0 {
            0.35
        } else if gap.ratio >= min_ratio {
            0.25
        } else {
            0.15
        };

        Self {
            all_passed: failed_components.is_empty(),
            confidence: confidence.min(1.0),
            failed_components,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TzvReport {
    pub structure: StructureAnalysis,
    pub trend: ValidationResult,
    pub referents: Referents,
    pub zones: ZoneValidation,
    pub gap: GapValidation,
    pub complete: CompleteValidation,
}

/// Runs T, Z and V over the primary timeframe once per cycle.
#[derive(Debug, Clone)]
pub struct TzvValidator {
    detector: StructureDetector,
    referents: ReferentConfig,
    min_gap_ratio: f64,
}

impl TzvValidator {
    pub fn new(min_gap_ratio: f64) -> Self {
        Self {
            detector: StructureDetector::default(),
            referents: ReferentConfig::default(),
            min_gap_ratio,
        }
    }

    pub fn with_referent_config(mut self, config: ReferentConfig) -> Self {
        self.referents = config;
        self
    }

    pub fn min_gap_ratio(&self) -> f64 {
        self.min_gap_ratio
    }

    pub fn validate(&mut self, candles: &[Candle], entry: f64, side: Option<Side>) -> TradingResult<TzvReport> {
        let last_close = candles.last().map(|c| c.close).unwrap_or(entry);
        let structure = self.detector.analyze(&highs(candles), &lows(candles), last_close)?;
        let trend = validate_trend(&structure);

        let referents = calculate_referents(candles, entry, &self.referents);
        let zones = validate_zones(&referents);

        let gap = match (zones.nearest_support, zones.nearest_resistance) {
            (Some(support), Some(resistance)) => validate_gap_for_side(
                side.unwrap_or(Side::Long),
                entry,
                support,
                resistance,
                self.min_gap_ratio,
            ),
            _ => validate_gap(entry, entry, entry, self.min_gap_ratio),
        };

        let complete = CompleteValidation::combine(&trend, &zones.result, &gap, self.min_gap_ratio);
        tracing::debug!(
            phase = structure.phase.name(),
            trend_passed = trend.passed,
            zones_passed = zones.result.passed,
            gap_ratio = gap.ratio,
            confidence = complete.confidence,
            "T+Z+V evaluated"
        );

        Ok(TzvReport {
            structure,
            trend,
            referents,
            zones,
            gap,
            complete,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::referents::{Level, LevelKind};

    fn level(price: f64) -> Level {
        Level { price, kind: LevelKind::Historical }
    }

    #[test]
    fn gap_ratio_is_exact() {
        let gap = validate_gap(100.0, 95.0, 112.0, 2.0);
        assert_eq!(gap.ratio, (112.0 - 100.0) / (100.0 - 95.0));
        assert!(gap.validation_passed());
        assert_eq!(gap.quality, GapQuality::Acceptable);
    }

    #[test]
    fn gap_pass_iff_ratio_meets_minimum() {
        for (entry, support, resistance) in [
            (100.0, 99.0, 101.0),
            (100.0, 99.0, 102.0),
            (100.0, 99.0, 101.999),
            (100.0, 90.0, 140.0),
            (50.0, 49.5, 50.75),
        ] {
            let gap = validate_gap(entry, support, resistance, 2.0);
            let expected = (resistance - entry) / (entry - support);
            assert_eq!(gap.ratio, expected);
            assert_eq!(gap.validation_passed(), expected >= 2.0);
        }
    }

    #[test]
    fn gap_rejects_entry_outside_zone() {
        assert!(!validate_gap(100.0, 100.0, 110.0, 2.0).validation_passed());
        assert!(!validate_gap(111.0, 100.0, 110.0, 2.0).validation_passed());
        assert_eq!(validate_gap(90.0, 100.0, 110.0, 2.0).ratio, 0.0);
    }

    #[test]
    fn short_gap_is_mirrored() {
        let gap = validate_gap_for_side(Side::Short, 100.0, 90.0, 105.0, 2.0);
        assert_eq!(gap.ratio, 2.0);
        assert!(gap.validation_passed());
    }

    #[test]
    fn zones_need_two_levels_each_side() {
        let mut refs = Referents {
            current_price: 100.0,
            resistances: vec![level(120.0), level(110.0)],
            supports: vec![level(90.0)],
            ..Default::default()
        };
        assert!(!validate_zones(&refs).result.passed);

        refs.supports.push(level(95.0));
        let zones = validate_zones(&refs);
        assert!(zones.result.passed);
        assert_eq!(zones.clarity, ZoneClarity::Clear);
        assert_eq!(zones.nearest_support, Some(95.0));
        assert_eq!(zones.nearest_resistance, Some(110.0));
    }

    #[test]
    fn complete_validation_lists_failures() {
        let trend = ValidationResult { passed: true, confidence: 0.8, description: String::new() };
        let zones = ValidationResult { passed: false, confidence: 0.1, description: String::new() };
        let gap = validate_gap(100.0, 95.0, 120.0, 2.0);

        let complete = CompleteValidation::combine(&trend, &zones, &gap, 2.0);
        assert!(!complete.all_passed);
        assert_eq!(complete.failed_components, vec![TzvComponent::Zones]);
        assert!((complete.confidence - 0.70).abs() < 1e-9);
    }
}
