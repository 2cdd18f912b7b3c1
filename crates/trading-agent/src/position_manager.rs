use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use trading_core::{Side, Signal};

use crate::dead_trade::{DeadTradeDetector, DeadTradeVerdict};
use crate::sessions::{SessionStatus, CLOSING_ALERT_MINUTES};

/// Decimal places exchange quantities are rounded to
pub const QUANTITY_DP: u32 = 3;

#[derive(Debug, Clone)]
pub struct LifecycleParams {
    /// Percent of the entry price the trailing stop keeps from the extreme
    pub trailing_stop_pct: Decimal,
    /// Percent beyond entry the stop moves to after TP1
    pub breakeven_spread_pct: Decimal,
    pub use_tp2_partial: bool,
    /// Share of the original size closed at TP1
    pub tp1_fraction: Decimal,
    /// Share of the original size closed at TP2
    pub tp2_fraction: Decimal,
    pub session_close_minutes: i64,
}

impl Default for LifecycleParams {
    fn default() -> Self {
        Self {
            trailing_stop_pct: dec!(1.0),
            breakeven_spread_pct: dec!(0.1),
            use_tp2_partial: true,
            tp1_fraction: dec!(0.5),
            tp2_fraction: dec!(0.25),
            session_close_minutes: CLOSING_ALERT_MINUTES,
        }
    }
}

/// The single open position. Mutated only by this module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub side: Side,
    pub entry_price: Decimal,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit_1: Decimal,
    pub take_profit_2: Decimal,
    /// Original size
    pub quantity: Decimal,
    pub remaining_quantity: Decimal,
    pub size_pct: f64,
    pub tp1_closed: bool,
    pub tp2_closed: bool,
    pub trailing_active: bool,
    pub trailing_stop_price: Option<Decimal>,
    pub max_favorable_price: Decimal,
    /// Size-weighted P&L of every leg closed so far, in percent
    pub realized_pnl_pct: Decimal,
    pub signal_id: String,
    #[serde(default)]
    pub dead_trade: DeadTradeDetector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExitKind {
    StopLoss,
    DeadTrade,
    TakeProfit1,
    TakeProfit2,
    TrailingStop,
    SessionClosing,
    OffHours,
}

impl ExitKind {
    pub fn code(&self) -> &'static str {
        match self {
            ExitKind::StopLoss => "SL",
            ExitKind::DeadTrade => "DEAD_TRADE",
            ExitKind::TakeProfit1 => "TP1",
            ExitKind::TakeProfit2 => "TP2",
            ExitKind::TrailingStop => "TRAILING_STOP",
            ExitKind::SessionClosing => "SESSION_CLOSING",
            ExitKind::OffHours => "OFF_HOURS",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExitAction {
    Hold,
    /// Reduce the position by `quantity`; it stays open.
    Partial {
        kind: ExitKind,
        price: Decimal,
        quantity: Decimal,
    },
    /// Flatten whatever remains.
    Close {
        kind: ExitKind,
        price: Decimal,
        reason: String,
    },
}

/// Result of one executed leg.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LegFill {
    pub kind: ExitKind,
    pub price: Decimal,
    pub quantity: Decimal,
    /// Share of the original size this leg closed
    pub fraction: Decimal,
    /// Raw P&L of the leg in percent
    pub pnl_pct: Decimal,
    /// `pnl_pct` weighted by `fraction`
    pub weighted_pnl_pct: Decimal,
}

impl Position {
    pub fn open(
        symbol: impl Into<String>,
        side: Side,
        signal: &Signal,
        fill_price: Decimal,
        quantity: Decimal,
        now: DateTime<Utc>,
        dead_trade: DeadTradeDetector,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            entry_price: fill_price,
            entry_time: now,
            stop_loss: signal.stop_loss,
            take_profit_1: signal.take_profit_1,
            take_profit_2: signal.take_profit_2,
            quantity,
            remaining_quantity: quantity,
            size_pct: signal.size_pct,
            tp1_closed: false,
            tp2_closed: false,
            trailing_active: false,
            trailing_stop_price: None,
            max_favorable_price: fill_price,
            realized_pnl_pct: Decimal::ZERO,
            signal_id: uuid::Uuid::new_v4().to_string(),
            dead_trade,
        }
    }

    /// Stage name used in logs
    pub fn stage(&self) -> &'static str {
        match (self.tp1_closed, self.trailing_active) {
            (false, _) => "OPEN",
            (true, false) => "TP1_DONE",
            (true, true) => "TRAILING",
        }
    }

    pub fn unrealized_pnl_pct(&self, price: Decimal) -> Decimal {
        self.side.pnl_pct(self.entry_price, price)
    }

    pub fn duration_hours(&self, now: DateTime<Utc>) -> f64 {
        (now - self.entry_time).num_seconds() as f64 / 3600.0
    }

    fn reached(&self, price: Decimal, level: Decimal) -> bool {
        match self.side {
            Side::Long => price >= level,
            Side::Short => price <= level,
        }
    }

    fn stop_hit(&self, price: Decimal, level: Decimal) -> bool {
        match self.side {
            Side::Long => price <= level,
            Side::Short => price >= level,
        }
    }

    fn trail_level(&self, extreme: Decimal, params: &LifecycleParams) -> Decimal {
        let distance = self.entry_price * params.trailing_stop_pct / Decimal::ONE_HUNDRED;
        match self.side {
            Side::Long => extreme - distance,
            Side::Short => extreme + distance,
        }
    }

    fn breakeven(&self, params: &LifecycleParams) -> Decimal {
        let spread = params.breakeven_spread_pct / Decimal::ONE_HUNDRED;
        match self.side {
            Side::Long => self.entry_price * (Decimal::ONE - spread),
            Side::Short => self.entry_price * (Decimal::ONE + spread),
        }
    }

    /// Track a new favorable extreme and ratchet the trailing level. Never loosens.
    fn ratchet(&mut self, price: Decimal, params: &LifecycleParams) {
        if self.side.is_favorable(price, self.max_favorable_price) {
            self.max_favorable_price = price;
        }
        let candidate = self.trail_level(self.max_favorable_price, params);
        self.trailing_stop_price = Some(match self.trailing_stop_price {
            Some(current) if !self.side.is_favorable(candidate, current) => current,
            _ => candidate,
        });
    }

    fn leg(&self, kind: ExitKind, price: Decimal, quantity: Decimal) -> LegFill {
        let fraction = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            quantity / self.quantity
        };
        let pnl_pct = self.side.pnl_pct(self.entry_price, price);
        LegFill {
            kind,
            price,
            quantity,
            fraction,
            pnl_pct,
            weighted_pnl_pct: pnl_pct * fraction,
        }
    }

    /// Book a filled partial close and advance the stage.
    pub fn apply_partial(
        &mut self,
        kind: ExitKind,
        price: Decimal,
        quantity: Decimal,
        params: &LifecycleParams,
    ) -> LegFill {
        let quantity = quantity.min(self.remaining_quantity);
        let fill = self.leg(kind, price, quantity);
        self.remaining_quantity -= quantity;
        self.realized_pnl_pct += fill.weighted_pnl_pct;

        match kind {
            ExitKind::TakeProfit1 => {
                self.tp1_closed = true;
                self.stop_loss = self.breakeven(params);
                self.trailing_active = true;
                if self.side.is_favorable(price, self.max_favorable_price) {
                    self.max_favorable_price = price;
                }
                self.trailing_stop_price = Some(self.trail_level(self.max_favorable_price, params));
            }
            ExitKind::TakeProfit2 => self.tp2_closed = true,
            _ => {}
        }
        fill
    }

    /// Book the final leg. The position is finished afterwards.
    pub fn apply_close(&mut self, kind: ExitKind, price: Decimal) -> LegFill {
        let fill = self.leg(kind, price, self.remaining_quantity);
        self.remaining_quantity = Decimal::ZERO;
        self.realized_pnl_pct += fill.weighted_pnl_pct;
        fill
    }

    fn leg_quantity(&self, fraction: Decimal) -> Decimal {
        (self.quantity * fraction).round_dp(QUANTITY_DP)
    }
}

/// One lifecycle step. First match wins:
/// stop-loss, dead trade, TP1, TP2 or trailing stop, session closing, off-hours.
///
/// Only the trailing extreme and level are updated here; partial and final
/// fills are booked by the caller once the order has gone through.
pub fn evaluate(
    position: &mut Position,
    price: Decimal,
    dead: &DeadTradeVerdict,
    session: &SessionStatus,
    params: &LifecycleParams,
) -> ExitAction {
    if position.stop_hit(price, position.stop_loss) {
        return ExitAction::Close {
            kind: ExitKind::StopLoss,
            price,
            reason: format!("price {} crossed stop {}", price, position.stop_loss),
        };
    }

    if dead.is_dead {
        return ExitAction::Close {
            kind: ExitKind::DeadTrade,
            price,
            reason: dead.reason.clone(),
        };
    }

    if !position.tp1_closed {
        if position.reached(price, position.take_profit_1) {
            let quantity = position.leg_quantity(params.tp1_fraction);
            if quantity.is_zero() || quantity >= position.remaining_quantity {
                return ExitAction::Close {
                    kind: ExitKind::TakeProfit1,
                    price,
                    reason: "TP1 reached, size too small to split".to_string(),
                };
            }
            return ExitAction::Partial {
                kind: ExitKind::TakeProfit1,
                price,
                quantity,
            };
        }
    } else {
        position.ratchet(price, params);

        if !position.tp2_closed && position.reached(price, position.take_profit_2) {
            let quantity = position.leg_quantity(params.tp2_fraction);
            if params.use_tp2_partial && !quantity.is_zero() && quantity < position.remaining_quantity {
                return ExitAction::Partial {
                    kind: ExitKind::TakeProfit2,
                    price,
                    quantity,
                };
            }
            if !params.use_tp2_partial {
                return ExitAction::Close {
                    kind: ExitKind::TakeProfit2,
                    price,
                    reason: "TP2 reached".to_string(),
                };
            }
        }

        if let Some(level) = position.trailing_stop_price {
            if position.stop_hit(price, level) {
                return ExitAction::Close {
                    kind: ExitKind::TrailingStop,
                    price,
                    reason: format!(
                        "price {} retraced through trailing stop {} (extreme {})",
                        price, level, position.max_favorable_price
                    ),
                };
            }
        }
    }

    match (session.active, session.minutes_to_close) {
        (Some(active), Some(left)) if left <= params.session_close_minutes => ExitAction::Close {
            kind: ExitKind::SessionClosing,
            price,
            reason: format!("{} session ends in {} min", active.name(), left),
        },
        (None, _) => ExitAction::Close {
            kind: ExitKind::OffHours,
            price,
            reason: "no trading session active".to_string(),
        },
        _ => ExitAction::Hold,
    }
}
