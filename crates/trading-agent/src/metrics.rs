use std::collections::VecDeque;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Size of the rolling trade window used for recent win rate and average pnl
const RECENT_WINDOW: usize = 20;

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

fn elapsed_ms(since: Instant) -> u64 {
    since.elapsed().as_millis() as u64
}

/// Lifetime counters, persisted between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Counters {
    pub cycles_run: u64,
    pub cycles_skipped: u64,
    pub signals_generated: u64,
    pub gate_approved: u64,
    pub gate_rejected: u64,
    pub mtf_overrides: u64,
    pub trades_opened: u64,
    pub partial_closes: u64,
    pub winning_trades: u64,
    pub losing_trades: u64,
    /// Sum of size-weighted realized pnl, in percent
    pub total_pnl_pct: f64,
}

/// Counters and timings for the scalping loop, logged every
/// `log_interval_cycles` cycles.
pub struct AgentMetrics {
    pub counters: Counters,

    pub fetch_ms: u64,
    pub gate_ms: u64,
    pub cycle_ms: u64,

    /// Realized pnl of the most recent closed trades, oldest first
    recent_pnl: VecDeque<f64>,
    log_interval_cycles: u64,
}

impl AgentMetrics {
    pub fn new(log_interval_cycles: u64) -> Self {
        Self {
            counters: Counters::default(),
            fetch_ms: 0,
            gate_ms: 0,
            cycle_ms: 0,
            recent_pnl: VecDeque::with_capacity(RECENT_WINDOW + 1),
            log_interval_cycles,
        }
    }

    pub fn start_timer() -> Instant {
        Instant::now()
    }

    pub fn record_fetch_duration(&mut self, started: Instant) {
        self.fetch_ms = elapsed_ms(started);
    }

    pub fn record_gate_duration(&mut self, started: Instant) {
        self.gate_ms = elapsed_ms(started);
    }

    /// Record a fully closed trade. `pnl_pct` is the total realized pnl
    /// across all legs; zero counts as a loss.
    pub fn record_trade_result(&mut self, pnl_pct: f64) {
        let c = &mut self.counters;
        c.total_pnl_pct += pnl_pct;
        if pnl_pct > 0.0 {
            c.winning_trades += 1;
        } else {
            c.losing_trades += 1;
        }
        self.recent_pnl.push_back(pnl_pct);
        while self.recent_pnl.len() > RECENT_WINDOW {
            self.recent_pnl.pop_front();
        }
    }

    pub fn finish_cycle(&mut self, started: Instant) {
        self.cycle_ms = elapsed_ms(started);
        self.counters.cycles_run += 1;
        let due = self.log_interval_cycles != 0
            && self.counters.cycles_run.is_multiple_of(self.log_interval_cycles);
        if due {
            self.log_metrics();
        }
    }

    pub fn recent_win_rate(&self) -> f64 {
        let wins = self.recent_pnl.iter().filter(|pnl| **pnl > 0.0).count();
        percent(wins as u64, self.recent_pnl.len() as u64)
    }

    pub fn recent_avg_pnl(&self) -> f64 {
        match self.recent_pnl.len() {
            0 => 0.0,
            n => self.recent_pnl.iter().sum::<f64>() / n as f64,
        }
    }

    pub fn overall_win_rate(&self) -> f64 {
        let c = &self.counters;
        percent(c.winning_trades, c.winning_trades + c.losing_trades)
    }

    pub fn log_metrics(&self) {
        let c = &self.counters;
        tracing::info!(
            cycles = c.cycles_run,
            skipped = c.cycles_skipped,
            signals = c.signals_generated,
            approved = c.gate_approved,
            rejected = c.gate_rejected,
            mtf_overrides = c.mtf_overrides,
            opened = c.trades_opened,
            partials = c.partial_closes,
            wins = c.winning_trades,
            losses = c.losing_trades,
            pnl_pct = format!("{:.2}", c.total_pnl_pct),
            win_rate = format!("{:.1}%", self.overall_win_rate()),
            win_rate_last20 = format!("{:.1}%", self.recent_win_rate()),
            avg_pnl_last20 = format!("{:.2}", self.recent_avg_pnl()),
            cycle_ms = self.cycle_ms,
            fetch_ms = self.fetch_ms,
            gate_ms = self.gate_ms,
            "Scalper stats"
        );
    }

    /// Adopt counters loaded from the state store. The rolling window starts empty.
    pub fn restore(&mut self, counters: Counters) {
        tracing::info!(cycles = counters.cycles_run, "Metrics restored");
        self.counters = counters;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rolling_window_keeps_last_twenty_trades() {
        let mut m = AgentMetrics::new(0);
        for _ in 0..5 {
            m.record_trade_result(-1.0);
        }
        for _ in 0..20 {
            m.record_trade_result(2.0);
        }
        assert_eq!(m.counters.winning_trades, 20);
        assert_eq!(m.counters.losing_trades, 5);
        assert!((m.recent_win_rate() - 100.0).abs() < 1e-9);
        assert!((m.recent_avg_pnl() - 2.0).abs() < 1e-9);
        assert!((m.overall_win_rate() - 80.0).abs() < 1e-9);
        assert!((m.counters.total_pnl_pct - 35.0).abs() < 1e-9);
    }

    #[test]
    fn breakeven_trade_counts_as_loss() {
        let mut m = AgentMetrics::new(0);
        m.record_trade_result(0.0);
        assert_eq!(m.counters.losing_trades, 1);
        assert_eq!(m.recent_win_rate(), 0.0);
    }

    #[test]
    fn restore_replaces_counters_and_keeps_window_empty() {
        let mut m = AgentMetrics::new(10);
        m.finish_cycle(AgentMetrics::start_timer());
        m.counters.gate_rejected = 4;
        m.counters.mtf_overrides = 1;
        m.record_trade_result(1.25);

        let mut restored = AgentMetrics::new(10);
        restored.restore(m.counters.clone());
        assert_eq!(restored.counters, m.counters);
        assert_eq!(restored.recent_win_rate(), 0.0);
    }

    #[test]
    fn older_payloads_default_missing_counters() {
        let counters: Counters =
            serde_json::from_value(serde_json::json!({"cycles_run": 9, "retired": 1})).unwrap();
        assert_eq!(counters.cycles_run, 9);
        assert_eq!(counters.trades_opened, 0);
    }
}
