use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use trading_core::{Side, TradingResult};

mod binance;
mod paper;

pub use binance::BinanceClient;
pub use paper::PaperExchange;

// ---------------------------------------------------------------------------
// Exchange types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangePosition {
    pub symbol: String,
    pub side: Side,
    pub quantity: Decimal,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
}

impl ExchangePosition {
    pub fn unrealized_pnl_pct(&self) -> Decimal {
        self.side.pnl_pct(self.entry_price, self.mark_price)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Order side that opens a position in `side`.
    pub fn opening(side: Side) -> Self {
        match side {
            Side::Long => OrderSide::Buy,
            Side::Short => OrderSide::Sell,
        }
    }

    /// Order side that reduces a position in `side`.
    pub fn closing(side: Side) -> Self {
        Self::opening(side.opposite())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    /// Only shrink an existing position, never open or flip one
    pub reduce_only: bool,
}

impl OrderRequest {
    pub fn open(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::opening(side),
            quantity,
            reduce_only: false,
        }
    }

    pub fn reduce(symbol: impl Into<String>, side: Side, quantity: Decimal) -> Self {
        Self {
            symbol: symbol.into(),
            side: OrderSide::closing(side),
            quantity,
            reduce_only: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeOrder {
    pub id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: Decimal,
    pub filled_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub status: String,
}

// ---------------------------------------------------------------------------
// Exchange trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ExchangeClient: Send + Sync {
    /// All open positions on the account
    async fn get_positions(&self) -> TradingResult<Vec<ExchangePosition>>;

    /// Open position on `symbol`, if any
    async fn get_position(&self, symbol: &str) -> TradingResult<Option<ExchangePosition>> {
        Ok(self
            .get_positions()
            .await?
            .into_iter()
            .find(|p| p.symbol == symbol))
    }

    async fn submit_market_order(&self, order: OrderRequest) -> TradingResult<ExchangeOrder>;

    /// Flatten the whole position on `symbol` with a reduce-only market order.
    /// Returns None when there was nothing to close.
    async fn close_position(&self, symbol: &str) -> TradingResult<Option<ExchangeOrder>>;

    /// Last traded price seen by the agent. Simulated exchanges fill at it;
    /// real exchanges have their own book and ignore it.
    async fn update_mark_price(&self, _symbol: &str, _price: Decimal) {}

    /// Whether fills are simulated
    fn is_paper(&self) -> bool;

    /// Exchange name for logging
    fn exchange_name(&self) -> &str;
}
