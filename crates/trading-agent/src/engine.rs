use std::sync::Arc;

use advisory_oracle::{AdvisoryOracle, PermissivenessLevel};
use anyhow::Result;
use chrono::{DateTime, Utc};
use exchange_client::{ExchangeClient, OrderRequest};
use market_structure::{StructureAnalysis, TzvValidator};
use multi_timeframe::{correlate, fetch_all_timeframes, CorrelationResult};
use risk_manager::RiskManager;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde_json::json;
use trading_core::{closes, Candle, CandleSource, Side, Signal, SignalGenerator};

use crate::config::AgentConfig;
use crate::dead_trade::DeadTradeDetector;
use crate::event_log::{EventLog, EventType};
use crate::gatekeeper::{GateRequest, GateStep, Gatekeeper, OverrideConfig};
use crate::metrics::AgentMetrics;
use crate::permissiveness;
use crate::position_manager::{evaluate, ExitAction, ExitKind, LifecycleParams, Position, QUANTITY_DP};
use crate::recovery::RecoveryOutcome;
use crate::sessions::{session_status, SessionStatus};
use crate::state_manager::StateManager;

/// Everything the loop carries from one cycle to the next.
pub struct EngineState {
    pub cycle: u64,
    /// At most one open position
    pub position: Option<Position>,
    pub risk: RiskManager,
    pub tzv: TzvValidator,
    /// Structure read of the latest cycle, flat or not
    pub structure: Option<StructureAnalysis>,
    pub metrics: AgentMetrics,
}

impl EngineState {
    pub fn new(config: &AgentConfig, now: DateTime<Utc>) -> Self {
        Self {
            cycle: 0,
            position: None,
            risk: RiskManager::new(config.risk_limits(), now),
            tzv: TzvValidator::new(config.min_gap_ratio),
            structure: None,
            metrics: AgentMetrics::new(config.metrics_log_interval_cycles),
        }
    }
}

/// External services the engine talks to.
pub struct Collaborators {
    pub candles: Arc<dyn CandleSource>,
    pub exchange: Arc<dyn ExchangeClient>,
    pub generator: Box<dyn SignalGenerator>,
    pub oracle: Box<dyn AdvisoryOracle>,
}

/// What a cycle ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Skipped(String),
    Rejected(Option<GateStep>),
    Opened(Side),
    Held,
    PartialClosed(ExitKind),
    Closed(ExitKind),
}

pub struct Engine {
    config: AgentConfig,
    candles: Arc<dyn CandleSource>,
    exchange: Arc<dyn ExchangeClient>,
    generator: Box<dyn SignalGenerator>,
    gatekeeper: Gatekeeper,
    store: StateManager,
    events: EventLog,
    params: LifecycleParams,
    pub state: EngineState,
}

impl Engine {
    pub fn new(
        config: AgentConfig,
        collaborators: Collaborators,
        store: StateManager,
        events: EventLog,
        now: DateTime<Utc>,
    ) -> Self {
        let overrides = OverrideConfig {
            enabled: config.mtf_override_enabled,
            threshold: config.mtf_override_threshold,
            schedule: config.schedule(),
        };
        Self {
            state: EngineState::new(&config, now),
            params: config.lifecycle_params(),
            gatekeeper: Gatekeeper::new(collaborators.oracle, overrides),
            candles: collaborators.candles,
            exchange: collaborators.exchange,
            generator: collaborators.generator,
            store,
            events,
            config,
        }
    }

    pub fn gatekeeper(&self) -> &Gatekeeper {
        &self.gatekeeper
    }

    /// Load persisted counters and adopt whatever position recovery settled on.
    pub async fn restore(&mut self, outcome: &RecoveryOutcome, now: DateTime<Utc>) -> Result<()> {
        if let Some(risk) = self.store.load_risk_state().await? {
            self.state.risk = RiskManager::from_state(self.config.risk_limits(), risk);
        }
        if let Some(stats) = self.store.load_gatekeeper_stats().await? {
            self.gatekeeper.restore_stats(stats);
        }
        if let Some(saved) = self.store.load_metrics().await? {
            self.state.metrics.restore(saved);
        }
        self.state.cycle = self.state.metrics.counters.cycles_run;

        self.state.position = outcome.position().cloned();
        self.state.risk.set_open_positions(u32::from(self.state.position.is_some()));

        let mut fields = json!({ "outcome": outcome.name() });
        match outcome {
            RecoveryOutcome::Resumed(p) | RecoveryOutcome::Recovered(p) => {
                fields["side"] = json!(p.side.name());
                fields["entry"] = json!(p.entry_price);
                fields["stage"] = json!(p.stage());
            }
            RecoveryOutcome::Lost { failures } => fields["failures"] = json!(failures),
            RecoveryOutcome::EmergencyClosed { closed } => fields["closed"] = json!(closed),
            RecoveryOutcome::NoSnapshot => {}
        }
        self.events.emit(now, self.state.cycle, EventType::Recovery, fields).await;
        Ok(())
    }

    /// One full pass: fetch, correlate, then manage the open position or try an entry.
    pub async fn run_cycle(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let cycle_start = AgentMetrics::start_timer();
        self.state.cycle += 1;

        let outcome = self.step(now).await;

        if let Err(e) = self.persist_counters().await {
            tracing::warn!(error = %e, "Failed to persist counters");
        }
        if matches!(outcome, Ok(CycleOutcome::Skipped(_))) {
            self.state.metrics.counters.cycles_skipped += 1;
        }
        self.state.metrics.finish_cycle(cycle_start);
        outcome
    }

    async fn step(&mut self, now: DateTime<Utc>) -> Result<CycleOutcome> {
        let cycle = self.state.cycle;
        let level = permissiveness::read_level(&self.config.permissiveness_file, self.config.default_level()).await;

        let fetch_start = AgentMetrics::start_timer();
        let data = fetch_all_timeframes(self.candles.as_ref(), self.config.candle_limit).await?;
        self.state.metrics.record_fetch_duration(fetch_start);

        let Some(primary) = data.get(self.config.primary_timeframe) else {
            tracing::warn!(cycle, timeframe = %self.config.primary_timeframe, "Primary timeframe unavailable, skipping cycle");
            return Ok(CycleOutcome::Skipped("primary timeframe unavailable".to_string()));
        };
        let higher = data.get(self.config.higher_timeframe).unwrap_or(&[]);
        let Some(last) = primary.last() else {
            return Ok(CycleOutcome::Skipped("no primary candles".to_string()));
        };
        let Some(price) = Decimal::from_f64(last.close) else {
            return Ok(CycleOutcome::Skipped(format!("unusable price {}", last.close)));
        };

        self.exchange.update_mark_price(&self.config.symbol, price).await;
        let correlation = correlate(&data.readings());
        let session = session_status(now);

        tracing::info!(
            cycle,
            price = %price,
            alignment = correlation.alignment_score,
            direction = correlation.primary_direction.name(),
            session = %session.describe(),
            level = level.value(),
            "Cycle started"
        );

        // Structure runs every cycle so reversals compare against the previous cycle
        let signal = match self.state.position {
            Some(_) => None,
            None => Some(self.generator.generate(primary, higher)),
        };
        let (entry, side) = match (&self.state.position, &signal) {
            (Some(position), _) => (price, Some(position.side)),
            (None, Some(signal)) => (signal.entry_price, signal.side),
            (None, None) => (price, None),
        };
        let phase = self.validate_structure(now, primary, entry, side).await;

        match (self.state.position.clone(), signal) {
            (Some(position), _) => self.manage_position(now, position, price, last.volume, &session).await,
            (None, Some(signal)) => {
                if signal.should_trade {
                    self.state.metrics.counters.signals_generated += 1;
                }
                let entry = EntryContext {
                    now,
                    level,
                    price,
                    session: &session,
                    signal: &signal,
                    correlation: &correlation,
                    primary,
                    phase: &phase,
                };
                self.try_entry(entry).await
            }
            (None, None) => Ok(CycleOutcome::Skipped("no signal".to_string())),
        }
    }

    async fn manage_position(
        &mut self,
        now: DateTime<Utc>,
        mut position: Position,
        price: Decimal,
        volume: f64,
        session: &SessionStatus,
    ) -> Result<CycleOutcome> {
        let cycle = self.state.cycle;
        let entry = position.entry_price.to_f64().unwrap_or_default();
        let verdict = position
            .dead_trade
            .update(price.to_f64().unwrap_or_default(), volume, entry);
        let action = evaluate(&mut position, price, &verdict, session, &self.params);

        match action {
            ExitAction::Hold => {
                tracing::debug!(
                    cycle,
                    stage = position.stage(),
                    pnl_pct = %position.unrealized_pnl_pct(price).round_dp(3),
                    trailing = ?position.trailing_stop_price,
                    range_pct = verdict.range_pct,
                    price_dead_cycles = verdict.price_dead_cycles,
                    volume_dead_cycles = verdict.volume_dead_cycles,
                    "Holding position"
                );
                self.state.position = Some(position.clone());
                self.store.save_snapshot(&position, now).await?;
                Ok(CycleOutcome::Held)
            }
            ExitAction::Partial { kind, price: trigger, quantity } => {
                let order = self
                    .exchange
                    .submit_market_order(OrderRequest::reduce(&position.symbol, position.side, quantity))
                    .await?;
                let fill = position.apply_partial(kind, order.filled_price, order.quantity, &self.params);
                self.state
                    .risk
                    .register_partial_close(fill.weighted_pnl_pct.to_f64().unwrap_or_default(), now);
                self.state.metrics.counters.partial_closes += 1;
                self.state.position = Some(position.clone());

                tracing::info!(
                    cycle,
                    exit = kind.code(),
                    trigger = %trigger,
                    price = %fill.price,
                    quantity = %fill.quantity,
                    pnl_pct = %fill.pnl_pct.round_dp(3),
                    "Partial close"
                );
                let event = match kind {
                    ExitKind::TakeProfit1 => EventType::Tp1Hit,
                    _ => EventType::Tp2Hit,
                };
                self.events
                    .emit(
                        now,
                        cycle,
                        event,
                        json!({
                            "side": position.side.name(),
                            "entry": position.entry_price,
                            "exit": fill.price,
                            "quantity": fill.quantity,
                            "fraction": fill.fraction.round_dp(4),
                            "pnl_pct": fill.pnl_pct.round_dp(4),
                            "remaining_quantity": position.remaining_quantity,
                            "stop_loss": position.stop_loss,
                            "trailing_stop": position.trailing_stop_price,
                        }),
                    )
                    .await;
                self.store.save_snapshot(&position, now).await?;
                Ok(CycleOutcome::PartialClosed(kind))
            }
            ExitAction::Close { kind, price, reason } => {
                let filled = match self.exchange.close_position(&position.symbol).await? {
                    Some(order) => order.filled_price,
                    None => {
                        tracing::warn!(symbol = %position.symbol, "Exchange reported nothing to close, booking at cycle price");
                        price
                    }
                };
                let fill = position.apply_close(kind, filled);
                let total = position.realized_pnl_pct.to_f64().unwrap_or_default();
                self.state
                    .risk
                    .register_close(fill.weighted_pnl_pct.to_f64().unwrap_or_default(), now);
                self.state.metrics.record_trade_result(total);
                self.state.position = None;

                tracing::info!(
                    cycle,
                    exit = kind.code(),
                    side = %position.side,
                    price = %filled,
                    total_pnl_pct = total,
                    reason = %reason,
                    "Position closed"
                );
                self.events
                    .emit(
                        now,
                        cycle,
                        EventType::TradeClosed,
                        json!({
                            "exit_type": kind.code(),
                            "side": position.side.name(),
                            "entry": position.entry_price,
                            "exit": filled,
                            "pnl_pct": fill.pnl_pct.round_dp(4),
                            "total_pnl_pct": position.realized_pnl_pct.round_dp(4),
                            "reason": reason,
                            "duration_hours": position.duration_hours(now),
                            "signal_id": position.signal_id,
                        }),
                    )
                    .await;
                self.store.clear_snapshot().await?;
                Ok(CycleOutcome::Closed(kind))
            }
        }
    }

    /// Structure check on the primary timeframe. Never blocking; audited as an
    /// event only while flat, since it only informs entries.
    async fn validate_structure(
        &mut self,
        now: DateTime<Utc>,
        primary: &[Candle],
        entry: Decimal,
        side: Option<Side>,
    ) -> String {
        let cycle = self.state.cycle;
        let holding = self.state.position.is_some();
        let report = match self.state.tzv.validate(primary, entry.to_f64().unwrap_or_default(), side) {
            Ok(report) => report,
            Err(e) => {
                tracing::warn!(cycle, error = %e, "T+Z+V validation unavailable");
                self.state.structure = None;
                return "UNKNOWN".to_string();
            }
        };

        let structure = &report.structure;
        let previous = structure.previous_phase.map(|p| p.name());
        if structure.reversal {
            tracing::info!(
                cycle,
                phase = structure.phase.name(),
                previous = ?previous,
                holding,
                "Phase reversal, unconfirmed"
            );
        }

        let phase = structure.phase.name().to_string();
        if holding {
            tracing::debug!(
                cycle,
                phase = %phase,
                confidence = report.complete.confidence,
                failed = ?report.complete.failed_components,
                "T+Z+V while holding"
            );
        } else {
            let event = if report.complete.all_passed {
                EventType::TzvPassed
            } else {
                EventType::TzvValidation
            };
            self.events
                .emit(
                    now,
                    cycle,
                    event,
                    json!({
                        "phase": phase,
                        "previous_phase": previous,
                        "reversal": structure.reversal,
                        "confidence": report.complete.confidence,
                        "failed_components": report.complete.failed_components,
                        "gap_ratio": report.gap.ratio,
                        "zone_clarity": report.zones.clarity,
                        "blocking": false,
                    }),
                )
                .await;
        }
        self.state.structure = Some(report.structure);
        phase
    }

    async fn try_entry(&mut self, ctx: EntryContext<'_>) -> Result<CycleOutcome> {
        let cycle = self.state.cycle;
        let now = ctx.now;

        let gate_start = AgentMetrics::start_timer();
        let verdict = self
            .gatekeeper
            .evaluate(
                GateRequest {
                    now,
                    position_open: self.state.position.is_some(),
                    session: ctx.session,
                    signal: ctx.signal,
                    correlation: ctx.correlation,
                    phase: ctx.phase,
                    price: ctx.price,
                    level: ctx.level,
                },
                &mut self.state.risk,
            )
            .await;
        self.state.metrics.record_gate_duration(gate_start);

        if verdict.overridden {
            self.state.metrics.counters.mtf_overrides += 1;
            self.events
                .emit(
                    now,
                    cycle,
                    EventType::MtfOverride,
                    json!({
                        "alignment": ctx.correlation.alignment_score,
                        "direction": ctx.correlation.primary_direction.name(),
                        "side": verdict.signal.side.map(|s| s.name()),
                        "technical_reason": ctx.signal.reason,
                    }),
                )
                .await;
        }

        let decision_confidence = verdict.decision.as_ref().map(|d| d.confidence);
        if !verdict.approved {
            self.state.metrics.counters.gate_rejected += 1;
            let step = verdict.rejected_at.map(|s| s.code()).unwrap_or("UNKNOWN");
            // Only candidates are audited; "no signal" and "already open" repeat every cycle
            if ctx.signal.should_trade || verdict.overridden {
                self.events
                    .emit(
                        now,
                        cycle,
                        EventType::GatekeeperReject,
                        json!({
                            "step": step,
                            "reason": verdict.reason,
                            "level": verdict.level.value(),
                            "side": verdict.signal.side.map(|s| s.name()),
                            "confidence": decision_confidence,
                        }),
                    )
                    .await;
            }
            tracing::info!(cycle, step, reason = %verdict.reason, "Entry rejected");
            return Ok(CycleOutcome::Rejected(verdict.rejected_at));
        }

        self.state.metrics.counters.gate_approved += 1;
        self.events
            .emit(
                now,
                cycle,
                EventType::GatekeeperApproved,
                json!({
                    "level": verdict.level.value(),
                    "confidence": decision_confidence,
                    "reason": verdict.reason,
                    "overridden": verdict.overridden,
                }),
            )
            .await;

        let Some(side) = verdict.signal.side else {
            tracing::warn!(cycle, "Approved candidate has no side, not opening");
            return Ok(CycleOutcome::Rejected(None));
        };
        let quantity = (self.config.order_size_usdt * self.config.leverage / ctx.price).round_dp(QUANTITY_DP);
        if quantity.is_zero() {
            tracing::warn!(cycle, price = %ctx.price, "Order size rounds to zero, not opening");
            return Ok(CycleOutcome::Rejected(None));
        }

        let order = self
            .exchange
            .submit_market_order(OrderRequest::open(&self.config.symbol, side, quantity))
            .await?;

        let volumes: Vec<f64> = ctx.primary.iter().map(|c| c.volume).collect();
        let detector = DeadTradeDetector::seeded(&closes(ctx.primary), &volumes);
        let position = Position::open(
            &self.config.symbol,
            side,
            &verdict.signal,
            order.filled_price,
            order.quantity,
            now,
            detector,
        );

        self.state.risk.register_entry(now);
        self.state.metrics.counters.trades_opened += 1;
        self.state.position = Some(position.clone());

        tracing::info!(
            cycle,
            side = %side,
            entry = %position.entry_price,
            stop_loss = %position.stop_loss,
            tp1 = %position.take_profit_1,
            tp2 = %position.take_profit_2,
            quantity = %position.quantity,
            "Position opened"
        );
        self.events
            .emit(
                now,
                cycle,
                EventType::EntryExecuted,
                json!({
                    "side": side.name(),
                    "entry": position.entry_price,
                    "stop_loss": position.stop_loss,
                    "take_profit_1": position.take_profit_1,
                    "take_profit_2": position.take_profit_2,
                    "quantity": position.quantity,
                    "confidence": decision_confidence,
                    "overridden": verdict.overridden,
                    "session": ctx.session.describe(),
                    "signal_id": position.signal_id,
                }),
            )
            .await;
        self.store.save_snapshot(&position, now).await?;
        Ok(CycleOutcome::Opened(side))
    }

    async fn persist_counters(&self) -> Result<()> {
        self.store.save_risk_state(self.state.risk.state()).await?;
        self.store.save_gatekeeper_stats(self.gatekeeper.stats()).await?;
        self.store.save_metrics(&self.state.metrics.counters).await?;
        Ok(())
    }

    /// Final flush, then the marker that tells the next start this was not a crash.
    pub async fn shutdown(&self, now: DateTime<Utc>) -> Result<()> {
        self.persist_counters().await?;
        if let Some(position) = &self.state.position {
            self.store.save_snapshot(position, now).await?;
        }
        self.store.mark_graceful_shutdown(now).await?;
        self.state.metrics.log_metrics();
        Ok(())
    }
}

struct EntryContext<'a> {
    now: DateTime<Utc>,
    level: PermissivenessLevel,
    price: Decimal,
    session: &'a SessionStatus,
    signal: &'a Signal,
    correlation: &'a CorrelationResult,
    primary: &'a [Candle],
    phase: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal_generator::PctSchedule;
    use advisory_oracle::{OracleDecision, OracleRequest, OracleResult};
    use async_trait::async_trait;
    use chrono::{Duration, TimeZone};
    use exchange_client::PaperExchange;
    use market_structure::TrendPhase;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use trading_core::{Timeframe, TradingResult};

    /// Serves one series per timeframe; the last candle can be re-priced between cycles.
    struct MarketFixture {
        series: Mutex<HashMap<Timeframe, Vec<Candle>>>,
    }

    impl MarketFixture {
        fn new(closes: &[f64], volume: f64) -> Self {
            let mut series = HashMap::new();
            series.insert(Timeframe::Hour4, candles(closes, volume));
            series.insert(Timeframe::Day1, candles(closes, volume));
            Self {
                series: Mutex::new(series),
            }
        }

        fn set_series(&self, closes: &[f64], volume: f64) {
            let mut series = self.series.lock().unwrap();
            for served in series.values_mut() {
                *served = candles(closes, volume);
            }
        }

        fn set_last(&self, close: f64, volume: f64) {
            let mut series = self.series.lock().unwrap();
            for candles in series.values_mut() {
                if let Some(last) = candles.last_mut() {
                    last.open = close;
                    last.close = close;
                    last.high = close + 1.0;
                    last.low = close - 1.0;
                    last.volume = volume;
                }
            }
        }
    }

    #[async_trait]
    impl CandleSource for MarketFixture {
        async fn fetch_candles(&self, timeframe: Timeframe, _limit: usize) -> TradingResult<Vec<Candle>> {
            Ok(self
                .series
                .lock()
                .unwrap()
                .get(&timeframe)
                .cloned()
                .unwrap_or_default())
        }

        fn source_name(&self) -> &str {
            "fixture"
        }
    }

    fn candles(closes: &[f64], volume: f64) -> Vec<Candle> {
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        closes
            .iter()
            .enumerate()
            .map(|(i, &close)| Candle {
                timestamp: start + Duration::hours(4 * i as i64),
                open: close,
                high: close + 1.0,
                low: close - 1.0,
                close,
                volume,
            })
            .collect()
    }

    /// Always wants to go long off the last close.
    struct AlwaysLong(PctSchedule);

    impl SignalGenerator for AlwaysLong {
        fn generate(&self, primary: &[Candle], _higher: &[Candle]) -> Signal {
            let close = primary.last().map(|c| c.close).unwrap_or_default();
            let price = Decimal::from_f64(close).unwrap_or_default();
            let mut signal = Signal::none(price, 25.0, 0.0, 0.0, "fixture long");
            self.0.apply(&mut signal, Side::Long, price);
            signal.size_pct = 100.0;
            signal.confidence = 80.0;
            signal
        }
    }

    fn always_long(schedule: PctSchedule) -> Box<dyn SignalGenerator> {
        Box::new(AlwaysLong(schedule))
    }

    /// Never finds a technical setup; entries only come from the override.
    struct NeverTrades;

    impl SignalGenerator for NeverTrades {
        fn generate(&self, primary: &[Candle], _higher: &[Candle]) -> Signal {
            let close = primary.last().map(|c| c.close).unwrap_or_default();
            let price = Decimal::from_f64(close).unwrap_or_default();
            Signal::none(price, 50.0, 0.0, 0.0, "fixture flat")
        }
    }

    fn never_trades(_schedule: PctSchedule) -> Box<dyn SignalGenerator> {
        Box::new(NeverTrades)
    }

    struct CountingOracle(Arc<AtomicUsize>);

    #[async_trait]
    impl AdvisoryOracle for CountingOracle {
        async fn consult(&self, _request: &OracleRequest) -> OracleResult<OracleDecision> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(OracleDecision {
                should_enter: true,
                confidence: 0.9,
                reason: "fixture".into(),
            })
        }

        fn oracle_name(&self) -> &str {
            "counting"
        }
    }

    struct Harness {
        engine: Engine,
        market: Arc<MarketFixture>,
        exchange: Arc<PaperExchange>,
        oracle_calls: Arc<AtomicUsize>,
        _dir: tempfile::TempDir,
    }

    /// Ramp into 91300 so the seeded price history is not already stalled.
    fn ramp() -> Vec<f64> {
        (0..30).map(|i| 90_000.0 + i as f64 * 1300.0 / 29.0).collect()
    }

    async fn harness(closes: &[f64], volume: f64) -> Harness {
        harness_with(closes, volume, false, always_long).await
    }

    async fn harness_with(
        closes: &[f64],
        volume: f64,
        mtf_override: bool,
        generator: fn(PctSchedule) -> Box<dyn SignalGenerator>,
    ) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let mode_file = dir.path().join("permissiveness_config.txt");
        let vars: HashMap<String, String> = [
            ("EVENT_LOG_DIR", logs.to_string_lossy().to_string()),
            ("PERMISSIVENESS_FILE", mode_file.to_string_lossy().to_string()),
            ("TRADE_COOLDOWN_SECONDS", "0".to_string()),
            ("MTF_OVERRIDE_ENABLED", mtf_override.to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        let config = AgentConfig::from_lookup(|k| vars.get(k).cloned()).unwrap();

        let market = Arc::new(MarketFixture::new(closes, volume));
        let exchange = Arc::new(PaperExchange::new());
        let oracle_calls = Arc::new(AtomicUsize::new(0));
        let store = StateManager::in_memory().await.unwrap();
        let events = EventLog::open(config.event_log_path()).await.unwrap();

        let collaborators = Collaborators {
            candles: market.clone(),
            exchange: exchange.clone(),
            generator: generator(config.schedule()),
            oracle: Box::new(CountingOracle(oracle_calls.clone())),
        };
        let engine = Engine::new(config, collaborators, store, events, start());
        Harness {
            engine,
            market,
            exchange,
            oracle_calls,
            _dir: dir,
        }
    }

    /// Mid European session, hours before any close
    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap()
    }

    async fn event_types(engine: &Engine) -> Vec<String> {
        let contents = tokio::fs::read_to_string(engine.events.path()).await.unwrap();
        contents
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["type"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn scenario_runs_tp1_tp2_then_trailing_stop() {
        let mut h = harness(&ramp(), 100.0).await;
        let t = start();

        let outcome = h.engine.run_cycle(t).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Opened(Side::Long));
        let pos = h.engine.state.position.clone().unwrap();
        assert_eq!(pos.entry_price, dec!(91300));
        assert_eq!(pos.take_profit_1, dec!(92213));
        assert_eq!(pos.take_profit_2, dec!(93126));
        assert_eq!(pos.quantity, dec!(0.014));

        h.market.set_last(92213.0, 100.0);
        let outcome = h.engine.run_cycle(t + Duration::minutes(1)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::PartialClosed(ExitKind::TakeProfit1));

        h.market.set_last(93126.0, 100.0);
        let outcome = h.engine.run_cycle(t + Duration::minutes(2)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::PartialClosed(ExitKind::TakeProfit2));

        h.market.set_last(92200.0, 100.0);
        let outcome = h.engine.run_cycle(t + Duration::minutes(3)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Closed(ExitKind::TrailingStop));

        assert!(h.engine.state.position.is_none());
        assert!(h.exchange.get_positions().await.unwrap().is_empty());
        assert!(h.engine.store.load_snapshot().await.unwrap().is_none());
        assert_eq!(h.engine.state.risk.state().open_positions, 0);
        assert_eq!(h.engine.state.metrics.counters.winning_trades, 1);

        let lifecycle: Vec<String> = event_types(&h.engine)
            .await
            .into_iter()
            .filter(|t| !t.starts_with("TZV"))
            .collect();
        assert_eq!(
            lifecycle,
            ["GATEKEEPER_APPROVED", "ENTRY_EXECUTED", "TP1_HIT", "TP2_HIT", "TRADE_CLOSED"]
        );

        // Daily P&L is the size-weighted sum of the three legs
        let legs = [
            (dec!(0.007), dec!(92213)),
            (dec!(0.004), dec!(93126)),
            (dec!(0.003), dec!(92200)),
        ];
        let expected: Decimal = legs
            .iter()
            .map(|(qty, exit)| (exit - dec!(91300)) / dec!(91300) * dec!(100) * qty / dec!(0.014))
            .sum();
        let daily = h.engine.state.risk.state().daily_pnl_pct;
        assert!((daily - expected.to_f64().unwrap()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn open_position_blocks_new_entries() {
        let mut h = harness(&ramp(), 100.0).await;
        let t = start();
        h.engine.run_cycle(t).await.unwrap();

        for i in 1..4 {
            let outcome = h.engine.run_cycle(t + Duration::minutes(i)).await.unwrap();
            assert_eq!(outcome, CycleOutcome::Held);
        }
        assert_eq!(h.oracle_calls.load(Ordering::SeqCst), 1);
        let positions = h.exchange.get_positions().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(0.014));
        assert_eq!(h.engine.state.risk.state().open_positions, 1);
    }

    #[tokio::test]
    async fn stalled_market_closes_as_dead_trade() {
        let mut h = harness(&[91300.0; 30], 100.0).await;
        let t = start();
        assert_eq!(h.engine.run_cycle(t).await.unwrap(), CycleOutcome::Opened(Side::Long));

        // Flat price and dried-up volume: both-dead path fires on the third check
        h.market.set_last(91300.0, 10.0);
        for i in 1..3 {
            let outcome = h.engine.run_cycle(t + Duration::minutes(i)).await.unwrap();
            assert_eq!(outcome, CycleOutcome::Held);
        }
        let outcome = h.engine.run_cycle(t + Duration::minutes(3)).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Closed(ExitKind::DeadTrade));
        assert_eq!(h.engine.state.metrics.counters.losing_trades, 1);
    }

    #[tokio::test]
    async fn snapshot_tracks_every_mutation_and_shutdown_marks_clean_exit() {
        let mut h = harness(&ramp(), 100.0).await;
        let t = start();
        h.engine.run_cycle(t).await.unwrap();
        h.market.set_last(92213.0, 100.0);
        h.engine.run_cycle(t + Duration::minutes(1)).await.unwrap();

        let snap = h.engine.store.load_snapshot().await.unwrap().unwrap();
        assert!(snap.position.tp1_closed);
        assert_eq!(snap.position.remaining_quantity, dec!(0.007));
        assert_eq!(snap.last_update, t + Duration::minutes(1));

        let stop = t + Duration::minutes(2);
        h.engine.shutdown(stop).await.unwrap();
        assert_eq!(h.engine.store.load_shutdown_marker().await.unwrap(), Some(stop));
        assert!(h.engine.store.load_risk_state().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_primary_timeframe_skips_cycle() {
        let mut h = harness(&ramp(), 100.0).await;
        h.market.series.lock().unwrap().remove(&Timeframe::Hour4);
        let outcome = h.engine.run_cycle(start()).await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Skipped(_)));
        assert_eq!(h.engine.state.metrics.counters.cycles_skipped, 1);
        assert_eq!(h.oracle_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn restore_adopts_recovered_position() {
        let mut h = harness(&ramp(), 100.0).await;
        h.engine.run_cycle(start()).await.unwrap();
        let pos = h.engine.state.position.clone().unwrap();

        let mut fresh = harness(&ramp(), 100.0).await;
        fresh
            .engine
            .restore(&RecoveryOutcome::Recovered(pos.clone()), start())
            .await
            .unwrap();
        assert_eq!(fresh.engine.state.position, Some(pos));
        assert_eq!(fresh.engine.state.risk.state().open_positions, 1);
        assert_eq!(event_types(&fresh.engine).await, ["RECOVERY"]);
    }

    #[tokio::test]
    async fn reversal_is_flagged_on_the_cycle_after_a_hold() {
        let mut h = harness(&ramp(), 100.0).await;
        let t = start();

        assert_eq!(h.engine.run_cycle(t).await.unwrap(), CycleOutcome::Opened(Side::Long));
        let opened = h.engine.state.structure.clone().unwrap();
        assert_eq!(opened.phase, TrendPhase::BullishStrong);
        assert!(!opened.reversal);

        // Same last close, so the position just holds while structure turns bearish
        let decline: Vec<f64> = (0..30).map(|i| 92_600.0 - i as f64 * 1300.0 / 29.0).collect();
        h.market.set_series(&decline, 100.0);
        assert_eq!(h.engine.run_cycle(t + Duration::minutes(1)).await.unwrap(), CycleOutcome::Held);
        let held = h.engine.state.structure.clone().unwrap();
        assert_eq!(held.phase, TrendPhase::BearishStrong);
        assert!(held.reversal);
        assert_eq!(held.previous_phase, Some(TrendPhase::BullishStrong));

        h.market.set_series(&ramp(), 100.0);
        assert_eq!(h.engine.run_cycle(t + Duration::minutes(2)).await.unwrap(), CycleOutcome::Held);
        let back = h.engine.state.structure.clone().unwrap();
        assert!(back.reversal);
        assert_eq!(back.previous_phase, Some(TrendPhase::BearishStrong));

        // Audited once, at entry; held cycles only trace
        let tzv = event_types(&h.engine)
            .await
            .into_iter()
            .filter(|t| t.starts_with("TZV"))
            .count();
        assert_eq!(tzv, 1);
    }

    #[tokio::test]
    async fn aligned_timeframes_override_a_flat_signal() {
        let mut h = harness_with(&ramp(), 100.0, true, never_trades).await;

        let outcome = h.engine.run_cycle(start()).await.unwrap();
        assert_eq!(outcome, CycleOutcome::Opened(Side::Long));
        let pos = h.engine.state.position.clone().unwrap();
        assert_eq!(pos.entry_price, dec!(91300));
        assert_eq!(pos.stop_loss, dec!(90387));
        assert_eq!(pos.take_profit_1, dec!(92213));
        assert_eq!(pos.take_profit_2, dec!(93126));
        assert_eq!(h.oracle_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.engine.state.metrics.counters.mtf_overrides, 1);
        assert_eq!(h.engine.state.metrics.counters.signals_generated, 0);

        let entry: Vec<String> = event_types(&h.engine)
            .await
            .into_iter()
            .filter(|t| !t.starts_with("TZV"))
            .collect();
        assert_eq!(entry, ["MTF_OVERRIDE", "GATEKEEPER_APPROVED", "ENTRY_EXECUTED"]);
    }
}
