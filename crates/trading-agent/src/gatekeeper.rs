use advisory_oracle::{AdvisoryOracle, CorrelationContext, OracleDecision, OracleRequest, PermissivenessLevel};
use chrono::{DateTime, Utc};
use multi_timeframe::{CorrelationResult, Direction, VolatilityContext};
use risk_manager::RiskManager;
use rust_decimal::prelude::*;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trading_core::{Side, Signal};

use crate::sessions::SessionStatus;
use crate::signal_generator::PctSchedule;

#[derive(Debug, Clone)]
pub struct OverrideConfig {
    pub enabled: bool,
    /// Alignment must be strictly above this
    pub threshold: u8,
    pub schedule: PctSchedule,
}

/// Pipeline step that turned an entry down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStep {
    PositionOpen,
    OffHours,
    Risk,
    Signal,
    Oracle,
}

impl GateStep {
    pub fn code(&self) -> &'static str {
        match self {
            GateStep::PositionOpen => "POSITION_ALREADY_OPEN",
            GateStep::OffHours => "OFF_HOURS",
            GateStep::Risk => "RISK_LIMIT",
            GateStep::Signal => "NO_SIGNAL",
            GateStep::Oracle => "ORACLE_REJECT",
        }
    }
}

/// Everything one admission decision looks at.
pub struct GateRequest<'a> {
    pub now: DateTime<Utc>,
    pub position_open: bool,
    pub session: &'a SessionStatus,
    pub signal: &'a Signal,
    pub correlation: &'a CorrelationResult,
    /// Structure phase from the trend validator
    pub phase: &'a str,
    pub price: Decimal,
    pub level: PermissivenessLevel,
}

#[derive(Debug, Clone)]
pub struct GateVerdict {
    pub approved: bool,
    pub rejected_at: Option<GateStep>,
    pub reason: String,
    /// Candidate that went to the oracle: the upstream signal, or the override
    pub signal: Signal,
    pub overridden: bool,
    pub decision: Option<OracleDecision>,
    pub level: PermissivenessLevel,
}

impl GateVerdict {
    fn reject(step: GateStep, reason: impl Into<String>, signal: &Signal, level: PermissivenessLevel) -> Self {
        Self {
            approved: false,
            rejected_at: Some(step),
            reason: reason.into(),
            signal: signal.clone(),
            overridden: false,
            decision: None,
            level,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatekeeperStats {
    pub total: u64,
    pub approved: u64,
    pub rejected: u64,
    /// Oracle consultations that failed outright
    pub errors: u64,
    pub consultations: u64,
    pub confidence_sum: f64,
}

impl GatekeeperStats {
    pub fn average_confidence(&self) -> f64 {
        if self.consultations == 0 {
            return 0.0;
        }
        self.confidence_sum / self.consultations as f64
    }

    pub fn approval_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.approved as f64 / self.total as f64 * 100.0
    }
}

fn volatility_name(v: VolatilityContext) -> &'static str {
    match v {
        VolatilityContext::High => "HIGH",
        VolatilityContext::Moderate => "MODERATE",
        VolatilityContext::Low => "LOW",
    }
}

pub fn correlation_context(result: &CorrelationResult) -> CorrelationContext {
    CorrelationContext {
        alignment_score: result.alignment_score,
        primary_direction: result.primary_direction.name().to_string(),
        opportunity_score: result.opportunity_score,
        confidence: result.confidence,
        risk_factors: result.risk_factors.clone(),
        volatility_context: volatility_name(result.volatility_context).to_string(),
        entry_recommendation: result.entry_recommendation.clone(),
    }
}

/// High multi-timeframe alignment outranks a technical "no trade".
///
/// Returns the forced candidate, or None when the rule does not apply.
pub fn mtf_override(
    signal: &Signal,
    correlation: &CorrelationResult,
    price: Decimal,
    config: &OverrideConfig,
) -> Option<Signal> {
    if signal.should_trade || !config.enabled || correlation.alignment_score <= config.threshold {
        return None;
    }
    let side = match correlation.primary_direction {
        Direction::Bullish => Side::Long,
        Direction::Bearish => Side::Short,
        Direction::Neutral => signal.side?,
    };

    let mut forced = signal.clone();
    config.schedule.apply(&mut forced, side, price);
    forced.confidence = correlation.alignment_score as f64;
    forced.reason = format!(
        "MTF override: alignment {}% {} (technical: {})",
        correlation.alignment_score,
        correlation.primary_direction.name(),
        signal.reason
    );
    Some(forced)
}

/// Ordered admission pipeline. Stops at the first rejection:
/// single position, session, risk, technical signal (with MTF override), oracle.
pub struct Gatekeeper {
    oracle: Box<dyn AdvisoryOracle>,
    overrides: OverrideConfig,
    stats: GatekeeperStats,
}

impl Gatekeeper {
    pub fn new(oracle: Box<dyn AdvisoryOracle>, overrides: OverrideConfig) -> Self {
        Self {
            oracle,
            overrides,
            stats: GatekeeperStats::default(),
        }
    }

    /// Resume counters persisted by a previous run.
    pub fn restore_stats(&mut self, stats: GatekeeperStats) {
        self.stats = stats;
    }

    pub fn stats(&self) -> &GatekeeperStats {
        &self.stats
    }

    pub async fn evaluate(&mut self, req: GateRequest<'_>, risk: &mut RiskManager) -> GateVerdict {
        self.stats.total += 1;
        let verdict = self.run_steps(req, risk).await;
        if verdict.approved {
            self.stats.approved += 1;
        } else {
            self.stats.rejected += 1;
        }
        verdict
    }

    async fn run_steps(&mut self, req: GateRequest<'_>, risk: &mut RiskManager) -> GateVerdict {
        let level = req.level;

        if req.position_open {
            return GateVerdict::reject(GateStep::PositionOpen, "a position is already open", req.signal, level);
        }

        if req.session.is_off_hours() {
            return GateVerdict::reject(GateStep::OffHours, "no trading session active", req.signal, level);
        }

        let check = risk.can_open_position(req.now);
        if !check.can_trade {
            return GateVerdict::reject(GateStep::Risk, check.reason, req.signal, level);
        }

        let (candidate, overridden) = if req.signal.should_trade {
            (req.signal.clone(), false)
        } else {
            match mtf_override(req.signal, req.correlation, req.price, &self.overrides) {
                Some(forced) => {
                    tracing::info!(
                        alignment = req.correlation.alignment_score,
                        direction = req.correlation.primary_direction.name(),
                        "MTF override forced a trade candidate"
                    );
                    (forced, true)
                }
                None => {
                    return GateVerdict::reject(GateStep::Signal, req.signal.reason.clone(), req.signal, level);
                }
            }
        };

        let request = OracleRequest {
            level,
            side: candidate.side,
            price: req.price.to_f64().unwrap_or(0.0),
            rsi: candidate.rsi,
            ema_fast: candidate.ema_fast,
            ema_slow: candidate.ema_slow,
            phase: req.phase.to_string(),
            open_positions: risk.state().open_positions,
            risk_reward_ratio: candidate.reward_risk_ratio(),
            correlation: Some(correlation_context(req.correlation)),
        };

        let decision = match self.oracle.consult(&request).await {
            Ok(decision) => decision,
            Err(e) => {
                self.stats.errors += 1;
                tracing::warn!(oracle = self.oracle.oracle_name(), error = %e, "Oracle unavailable, rejecting");
                OracleDecision::reject(format!("oracle error: {}", e))
            }
        };
        self.stats.consultations += 1;
        self.stats.confidence_sum += decision.confidence;

        let approved = decision.approves(level);
        let reason = if approved {
            format!(
                "oracle approved at {:.2} (level {} needs {:.2}): {}",
                decision.confidence,
                level.value(),
                level.min_confidence(),
                decision.reason
            )
        } else {
            format!(
                "oracle declined (enter={}, confidence {:.2}, level {} needs {:.2}): {}",
                decision.should_enter,
                decision.confidence,
                level.value(),
                level.min_confidence(),
                decision.reason
            )
        };

        GateVerdict {
            approved,
            rejected_at: (!approved).then_some(GateStep::Oracle),
            reason,
            signal: candidate,
            overridden,
            decision: Some(decision),
            level,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sessions::session_status;
    use advisory_oracle::{OracleError, OracleResult};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use risk_manager::RiskLimits;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct ScriptedOracle {
        reply: Option<OracleDecision>,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl AdvisoryOracle for ScriptedOracle {
        async fn consult(&self, _request: &OracleRequest) -> OracleResult<OracleDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.reply.clone().ok_or(OracleError::Timeout)
        }

        fn oracle_name(&self) -> &str {
            "scripted"
        }
    }

    fn gatekeeper(reply: Option<OracleDecision>, enabled: bool) -> (Gatekeeper, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let oracle = ScriptedOracle { reply, calls: calls.clone() };
        let gk = Gatekeeper::new(
            Box::new(oracle),
            OverrideConfig {
                enabled,
                threshold: 80,
                schedule: PctSchedule {
                    sl_pct: dec!(1.0),
                    tp1_pct: dec!(1.0),
                    tp2_pct: dec!(2.0),
                },
            },
        );
        (gk, calls)
    }

    fn approve(confidence: f64) -> Option<OracleDecision> {
        Some(OracleDecision {
            should_enter: true,
            confidence,
            reason: "looks good".into(),
        })
    }

    fn correlation(alignment: u8, direction: Direction) -> CorrelationResult {
        CorrelationResult {
            alignment_score: alignment,
            primary_direction: direction,
            opportunity_score: alignment,
            risk_factors: vec![],
            entry_recommendation: "TEST".into(),
            volatility_context: VolatilityContext::Moderate,
            confidence: 0.8,
            readings: vec![],
        }
    }

    fn no_signal() -> Signal {
        Signal::none(dec!(91300), 45.0, 91250.0, 91200.0, "no setup")
    }

    fn long_signal() -> Signal {
        let mut s = no_signal();
        s.side = Some(Side::Long);
        s.should_trade = true;
        s.stop_loss = dec!(90387);
        s.take_profit_1 = dec!(92213);
        s.take_profit_2 = dec!(93126);
        s
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap()
    }

    fn risk() -> RiskManager {
        RiskManager::new(RiskLimits::default(), now())
    }

    async fn run(
        gk: &mut Gatekeeper,
        risk: &mut RiskManager,
        position_open: bool,
        at: DateTime<Utc>,
        signal: &Signal,
        corr: &CorrelationResult,
    ) -> GateVerdict {
        let session = session_status(at);
        gk.evaluate(
            GateRequest {
                now: at,
                position_open,
                session: &session,
                signal,
                correlation: corr,
                phase: "BULLISH_STRONG",
                price: dec!(91300),
                level: PermissivenessLevel::new(2),
            },
            risk,
        )
        .await
    }

    #[tokio::test]
    async fn open_position_rejects_before_anything_else() {
        let (mut gk, calls) = gatekeeper(approve(0.9), true);
        let v = run(&mut gk, &mut risk(), true, now(), &long_signal(), &correlation(90, Direction::Bullish)).await;
        assert_eq!(v.rejected_at, Some(GateStep::PositionOpen));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn off_hours_rejects() {
        let (mut gk, _) = gatekeeper(approve(0.9), true);
        let off = Utc.with_ymd_and_hms(2026, 3, 10, 6, 30, 0).unwrap();
        let v = run(&mut gk, &mut risk(), false, off, &long_signal(), &correlation(50, Direction::Neutral)).await;
        assert_eq!(v.rejected_at, Some(GateStep::OffHours));
    }

    #[tokio::test]
    async fn risk_cooldown_rejects() {
        let (mut gk, calls) = gatekeeper(approve(0.9), true);
        let mut risk = risk();
        risk.register_entry(now());
        risk.register_close(0.5, now());
        let v = run(&mut gk, &mut risk, false, now(), &long_signal(), &correlation(50, Direction::Neutral)).await;
        assert_eq!(v.rejected_at, Some(GateStep::Risk));
        assert!(v.reason.contains("COOLDOWN"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn technical_signal_goes_to_oracle() {
        let (mut gk, calls) = gatekeeper(approve(0.7), true);
        let v = run(&mut gk, &mut risk(), false, now(), &long_signal(), &correlation(60, Direction::Bullish)).await;
        assert!(v.approved, "{}", v.reason);
        assert!(!v.overridden);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(gk.stats().approved, 1);
    }

    #[tokio::test]
    async fn weak_alignment_keeps_no_trade() {
        let (mut gk, calls) = gatekeeper(approve(0.9), true);
        let v = run(&mut gk, &mut risk(), false, now(), &no_signal(), &correlation(80, Direction::Bullish)).await;
        assert_eq!(v.rejected_at, Some(GateStep::Signal));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn strong_alignment_overrides_no_trade() {
        let (mut gk, _) = gatekeeper(approve(0.9), true);
        let v = run(&mut gk, &mut risk(), false, now(), &no_signal(), &correlation(85, Direction::Bearish)).await;
        assert!(v.approved);
        assert!(v.overridden);
        assert_eq!(v.signal.side, Some(Side::Short));
        assert_eq!(v.signal.entry_price, dec!(91300));
        assert_eq!(v.signal.stop_loss, dec!(92213));
        assert_eq!(v.signal.take_profit_2, dec!(89474));
    }

    #[tokio::test]
    async fn override_can_be_disabled() {
        let (mut gk, _) = gatekeeper(approve(0.9), false);
        let v = run(&mut gk, &mut risk(), false, now(), &no_signal(), &correlation(95, Direction::Bullish)).await;
        assert_eq!(v.rejected_at, Some(GateStep::Signal));
    }

    #[test]
    fn neutral_direction_without_side_never_overrides() {
        let config = OverrideConfig {
            enabled: true,
            threshold: 40,
            schedule: PctSchedule { sl_pct: dec!(1), tp1_pct: dec!(1), tp2_pct: dec!(2) },
        };
        let corr = correlation(50, Direction::Neutral);
        assert!(mtf_override(&no_signal(), &corr, dec!(100), &config).is_none());

        let mut sided = no_signal();
        sided.side = Some(Side::Long);
        let forced = mtf_override(&sided, &corr, dec!(100), &config).unwrap();
        assert_eq!(forced.side, Some(Side::Long));
        assert!(forced.should_trade);
    }

    #[tokio::test]
    async fn oracle_failure_is_rejection_with_zero_confidence() {
        let (mut gk, _) = gatekeeper(None, true);
        let v = run(&mut gk, &mut risk(), false, now(), &long_signal(), &correlation(60, Direction::Bullish)).await;
        assert_eq!(v.rejected_at, Some(GateStep::Oracle));
        assert_eq!(v.decision.unwrap().confidence, 0.0);
        assert_eq!(gk.stats().errors, 1);
        assert_eq!(gk.stats().rejected, 1);
    }

    #[tokio::test]
    async fn confidence_below_level_minimum_rejects() {
        // Level 2 needs 0.40
        let (mut gk, _) = gatekeeper(approve(0.35), true);
        let v = run(&mut gk, &mut risk(), false, now(), &long_signal(), &correlation(60, Direction::Bullish)).await;
        assert!(!v.approved);
        assert_eq!(v.rejected_at, Some(GateStep::Oracle));
        assert!((gk.stats().average_confidence() - 0.35).abs() < 1e-9);
    }
}
