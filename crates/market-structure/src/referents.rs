use serde::{Deserialize, Serialize};
use trading_core::Candle;

const FIB_CORRECTIONS: [f64; 3] = [0.382, 0.5, 0.618];
const FIB_EXTENSIONS: [f64; 4] = [1.25, 1.5, 1.618, 2.618];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "ratio")]
pub enum LevelKind {
    Historical,
    FibCorrection(f64),
    FibExtension(f64),
    /// Average-price band
    Paa(f64),
}

/// A support or resistance obstacle.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: f64,
    pub kind: LevelKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferentConfig {
    /// Candles considered for the swing high/low
    pub swing_window: usize,
    pub include_paa: bool,
    pub paa_band_pct: f64,
    /// Levels closer than this (as % of price) are merged
    pub merge_tolerance_pct: f64,
}

impl Default for ReferentConfig {
    fn default() -> Self {
        Self {
            swing_window: 50,
            include_paa: false,
            paa_band_pct: 10.0,
            merge_tolerance_pct: 0.01,
        }
    }
}

/// Obstacles around the current price.
/// Resistances are sorted descending, supports ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Referents {
    pub current_price: f64,
    pub swing_high: f64,
    pub swing_low: f64,
    pub resistances: Vec<Level>,
    pub supports: Vec<Level>,
}

impl Referents {
    /// Closest resistance strictly above price.
    pub fn nearest_resistance(&self) -> Option<f64> {
        self.resistances
            .iter()
            .map(|l| l.price)
            .filter(|&p| p > self.current_price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.min(p))))
    }

    /// Closest support strictly below price.
    pub fn nearest_support(&self) -> Option<f64> {
        self.supports
            .iter()
            .map(|l| l.price)
            .filter(|&p| p < self.current_price)
            .fold(None, |acc: Option<f64>, p| Some(acc.map_or(p, |a| a.max(p))))
    }
}

/// Build the historical plus Fibonacci referent set for `current_price`.
pub fn calculate_referents(candles: &[Candle], current_price: f64, config: &ReferentConfig) -> Referents {
    let start = candles.len().saturating_sub(config.swing_window.max(1));
    let window = &candles[start..];
    if window.is_empty() || current_price <= 0.0 {
        return Referents {
            current_price,
            ..Default::default()
        };
    }

    let swing_high = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let swing_low = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    let range = swing_high - swing_low;

    let mut levels = vec![
        Level { price: swing_high, kind: LevelKind::Historical },
        Level { price: swing_low, kind: LevelKind::Historical },
    ];

    if range > 0.0 {
        for ratio in FIB_CORRECTIONS {
            levels.push(Level {
                price: swing_high - range * ratio,
                kind: LevelKind::FibCorrection(ratio),
            });
        }
        for ratio in FIB_EXTENSIONS {
            levels.push(Level {
                price: swing_low + range * ratio,
                kind: LevelKind::FibExtension(ratio),
            });
        }
    }

    if config.include_paa {
        let avg = window.iter().map(|c| c.close).sum::<f64>() / window.len() as f64;
        let band = config.paa_band_pct / 100.0;
        levels.push(Level { price: avg * (1.0 + band), kind: LevelKind::Paa(config.paa_band_pct) });
        levels.push(Level { price: avg * (1.0 - band), kind: LevelKind::Paa(-config.paa_band_pct) });
    }

    let tolerance = current_price * config.merge_tolerance_pct / 100.0;
    let mut resistances: Vec<Level> = levels.iter().copied().filter(|l| l.price > current_price).collect();
    let mut supports: Vec<Level> = levels.iter().copied().filter(|l| l.price < current_price).collect();

    resistances.sort_by(|a, b| b.price.total_cmp(&a.price));
    supports.sort_by(|a, b| a.price.total_cmp(&b.price));
    resistances.dedup_by(|a, b| (a.price - b.price).abs() <= tolerance);
    supports.dedup_by(|a, b| (a.price - b.price).abs() <= tolerance);

    Referents {
        current_price,
        swing_high,
        swing_low,
        resistances,
        supports,
    }
}
