use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const HISTORY_LEN: usize = 15;
const MIN_POINTS: usize = 3;
/// Price range, in percent of entry, below which price counts as stalled
const DEAD_PRICE_RANGE_PCT: f64 = 0.5;
/// Volume below this share of the rolling average counts as dried up
const DEAD_VOLUME_RATIO: f64 = 0.5;
/// Both conditions together need this many consecutive cycles
const BOTH_DEAD_CYCLES: u32 = 3;
/// A single condition alone needs this many
const SINGLE_DEAD_CYCLES: u32 = 5;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeadTradeVerdict {
    pub is_dead: bool,
    pub price_dead: bool,
    pub volume_dead: bool,
    pub price_dead_cycles: u32,
    pub volume_dead_cycles: u32,
    pub range_pct: f64,
    pub reason: String,
}

impl DeadTradeVerdict {
    fn alive(reason: &str) -> Self {
        Self {
            is_dead: false,
            price_dead: false,
            volume_dead: false,
            price_dead_cycles: 0,
            volume_dead_cycles: 0,
            range_pct: 0.0,
            reason: reason.to_string(),
        }
    }
}

/// Rolling price/volume history of the open position.
///
/// Travels with the position snapshot so the counters survive a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeadTradeDetector {
    prices: VecDeque<f64>,
    volumes: VecDeque<f64>,
    price_dead_cycles: u32,
    volume_dead_cycles: u32,
}

impl DeadTradeDetector {
    /// Start with the most recent closes and volumes before entry.
    pub fn seeded(prices: &[f64], volumes: &[f64]) -> Self {
        let mut detector = Self::default();
        let n = prices.len().min(volumes.len());
        let skip = n.saturating_sub(HISTORY_LEN);
        for (p, v) in prices[..n].iter().zip(&volumes[..n]).skip(skip) {
            detector.push(*p, *v);
        }
        detector
    }

    #[cfg(test)]
    pub fn history_len(&self) -> usize {
        self.prices.len()
    }

    fn push(&mut self, price: f64, volume: f64) {
        self.prices.push_back(price);
        self.volumes.push_back(volume);
        if self.prices.len() > HISTORY_LEN {
            self.prices.pop_front();
            self.volumes.pop_front();
        }
    }

    /// Record this cycle's price and volume, then judge the trade.
    pub fn update(&mut self, price: f64, volume: f64, entry_price: f64) -> DeadTradeVerdict {
        if !price.is_finite() || !volume.is_finite() {
            return DeadTradeVerdict::alive("non-finite market data");
        }
        self.push(price, volume);

        if self.prices.len() < MIN_POINTS || entry_price <= 0.0 {
            return DeadTradeVerdict::alive("insufficient history");
        }

        let max = self.prices.iter().copied().fold(f64::MIN, f64::max);
        let min = self.prices.iter().copied().fold(f64::MAX, f64::min);
        let range_pct = (max - min) / entry_price * 100.0;
        let price_dead = range_pct < DEAD_PRICE_RANGE_PCT;

        let avg_volume = self.volumes.iter().sum::<f64>() / self.volumes.len() as f64;
        let volume_dead = volume < avg_volume * DEAD_VOLUME_RATIO;

        self.price_dead_cycles = if price_dead { self.price_dead_cycles + 1 } else { 0 };
        self.volume_dead_cycles = if volume_dead { self.volume_dead_cycles + 1 } else { 0 };

        let both = price_dead
            && volume_dead
            && self.price_dead_cycles >= BOTH_DEAD_CYCLES
            && self.volume_dead_cycles >= BOTH_DEAD_CYCLES;

        let reason = if both {
            format!(
                "price stalled ({:.2}% < {}%) and volume dried ({:.0} < {:.0})",
                range_pct,
                DEAD_PRICE_RANGE_PCT,
                volume,
                avg_volume * DEAD_VOLUME_RATIO
            )
        } else if self.price_dead_cycles >= SINGLE_DEAD_CYCLES {
            format!(
                "price stalled for {} cycles ({:.2}% < {}%)",
                self.price_dead_cycles, range_pct, DEAD_PRICE_RANGE_PCT
            )
        } else if self.volume_dead_cycles >= SINGLE_DEAD_CYCLES {
            format!(
                "volume dried for {} cycles (avg {:.0}, current {:.0})",
                self.volume_dead_cycles, avg_volume, volume
            )
        } else {
            "trade active".to_string()
        };

        DeadTradeVerdict {
            is_dead: both
                || self.price_dead_cycles >= SINGLE_DEAD_CYCLES
                || self.volume_dead_cycles >= SINGLE_DEAD_CYCLES,
            price_dead,
            volume_dead,
            price_dead_cycles: self.price_dead_cycles,
            volume_dead_cycles: self.volume_dead_cycles,
            range_pct,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ENTRY: f64 = 91_300.0;

    /// 15 seed points inside a 0.1% band with steady volume
    fn flat_seed() -> DeadTradeDetector {
        let prices: Vec<f64> = (0..15).map(|i| ENTRY + (i % 3) as f64 * 30.0).collect();
        DeadTradeDetector::seeded(&prices, &[1_000.0; 15])
    }

    #[test]
    fn both_dead_closes_on_third_cycle() {
        let mut detector = flat_seed();
        let mut closed_at = None;
        for cycle in 1..=15 {
            let verdict = detector.update(ENTRY + 20.0, 100.0, ENTRY);
            assert!(verdict.price_dead && verdict.volume_dead);
            if verdict.is_dead {
                closed_at = Some(cycle);
                break;
            }
        }
        assert_eq!(closed_at, Some(3));
    }

    #[test]
    fn price_dead_alone_needs_five_cycles() {
        let mut detector = flat_seed();
        for cycle in 1..=4 {
            let verdict = detector.update(ENTRY + 10.0, 1_000.0, ENTRY);
            assert!(verdict.price_dead);
            assert!(!verdict.volume_dead);
            assert!(!verdict.is_dead, "closed early at cycle {}", cycle);
        }
        let verdict = detector.update(ENTRY + 10.0, 1_000.0, ENTRY);
        assert!(verdict.is_dead);
        assert_eq!(verdict.price_dead_cycles, 5);
        assert!(verdict.reason.contains("price stalled for 5 cycles"));
    }

    #[test]
    fn movement_resets_the_counter() {
        let mut detector = flat_seed();
        for _ in 0..4 {
            detector.update(ENTRY, 1_000.0, ENTRY);
        }
        // A 1% move widens the range past the threshold
        let verdict = detector.update(ENTRY * 1.01, 1_000.0, ENTRY);
        assert!(!verdict.price_dead);
        assert_eq!(verdict.price_dead_cycles, 0);
        assert!(!verdict.is_dead);
    }

    #[test]
    fn needs_three_points_before_judging() {
        let mut detector = DeadTradeDetector::default();
        assert_eq!(detector.update(ENTRY, 0.0, ENTRY).reason, "insufficient history");
        assert_eq!(detector.update(ENTRY, 0.0, ENTRY).reason, "insufficient history");
        let verdict = detector.update(ENTRY, 0.0, ENTRY);
        assert!(verdict.price_dead);
        assert_eq!(verdict.price_dead_cycles, 1);
    }

    #[test]
    fn seeding_keeps_only_the_latest_window() {
        let prices: Vec<f64> = (0..40).map(|i| i as f64).collect();
        let detector = DeadTradeDetector::seeded(&prices, &vec![1.0; 40]);
        assert_eq!(detector.history_len(), 15);
        assert_eq!(detector.prices.front().copied(), Some(25.0));
    }
}
