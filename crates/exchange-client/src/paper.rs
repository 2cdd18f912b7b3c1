use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::Mutex;
use trading_core::{Side, TradingError, TradingResult};

use crate::{ExchangeClient, ExchangeOrder, ExchangePosition, OrderRequest, OrderSide};

#[derive(Default)]
struct Book {
    positions: HashMap<String, ExchangePosition>,
    marks: HashMap<String, Decimal>,
}

/// In-memory exchange: market orders fill at the last mark price.
#[derive(Default)]
pub struct PaperExchange {
    book: Mutex<Book>,
}

impl PaperExchange {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with positions already open, e.g. to replay a restart.
    pub fn with_positions(positions: Vec<ExchangePosition>) -> Self {
        let mut book = Book::default();
        for p in positions {
            book.marks.insert(p.symbol.clone(), p.mark_price);
            book.positions.insert(p.symbol.clone(), p);
        }
        Self { book: Mutex::new(book) }
    }

    /// Update the price fills happen at.
    pub async fn set_mark_price(&self, symbol: &str, price: Decimal) {
        let mut book = self.book.lock().await;
        book.marks.insert(symbol.to_string(), price);
        if let Some(p) = book.positions.get_mut(symbol) {
            p.mark_price = price;
        }
    }

    fn order(request: &OrderRequest, price: Decimal) -> ExchangeOrder {
        ExchangeOrder {
            id: uuid::Uuid::new_v4().to_string(),
            symbol: request.symbol.clone(),
            side: request.side,
            quantity: request.quantity,
            filled_price: price,
            created_at: Utc::now(),
            status: "FILLED".to_string(),
        }
    }
}

#[async_trait]
impl ExchangeClient for PaperExchange {
    async fn get_positions(&self) -> TradingResult<Vec<ExchangePosition>> {
        Ok(self.book.lock().await.positions.values().cloned().collect())
    }

    async fn submit_market_order(&self, request: OrderRequest) -> TradingResult<ExchangeOrder> {
        if request.quantity <= Decimal::ZERO {
            return Err(TradingError::InvalidResponse(format!(
                "order quantity must be positive, got {}",
                request.quantity
            )));
        }

        let mut guard = self.book.lock().await;
        let book = &mut *guard;
        let price = book.marks.get(&request.symbol).copied().ok_or_else(|| {
            TradingError::InvalidResponse(format!("no mark price for {}", request.symbol))
        })?;

        let existing = book.positions.get(&request.symbol).map(|p| (p.side, p.quantity));
        match existing {
            Some((side, quantity)) if OrderSide::closing(side) == request.side => {
                if request.quantity >= quantity {
                    book.positions.remove(&request.symbol);
                } else if let Some(pos) = book.positions.get_mut(&request.symbol) {
                    pos.quantity -= request.quantity;
                }
            }
            Some(_) => {
                if request.reduce_only {
                    return Err(TradingError::InvalidResponse(
                        "reduce-only order would increase the position".to_string(),
                    ));
                }
                if let Some(pos) = book.positions.get_mut(&request.symbol) {
                    let total = pos.quantity + request.quantity;
                    pos.entry_price = (pos.entry_price * pos.quantity + price * request.quantity) / total;
                    pos.quantity = total;
                }
            }
            None if request.reduce_only => {
                return Err(TradingError::InvalidResponse(format!(
                    "no position on {} to reduce",
                    request.symbol
                )));
            }
            None => {
                let side = match request.side {
                    OrderSide::Buy => Side::Long,
                    OrderSide::Sell => Side::Short,
                };
                book.positions.insert(
                    request.symbol.clone(),
                    ExchangePosition {
                        symbol: request.symbol.clone(),
                        side,
                        quantity: request.quantity,
                        entry_price: price,
                        mark_price: price,
                    },
                );
            }
        }

        let order = Self::order(&request, price);
        tracing::info!(
            symbol = %order.symbol,
            side = ?order.side,
            quantity = %order.quantity,
            price = %order.filled_price,
            "Paper order filled"
        );
        Ok(order)
    }

    async fn close_position(&self, symbol: &str) -> TradingResult<Option<ExchangeOrder>> {
        let position = self.book.lock().await.positions.get(symbol).cloned();
        match position {
            Some(p) => Ok(Some(
                self.submit_market_order(OrderRequest::reduce(symbol, p.side, p.quantity))
                    .await?,
            )),
            None => Ok(None),
        }
    }

    async fn update_mark_price(&self, symbol: &str, price: Decimal) {
        self.set_mark_price(symbol, price).await;
    }

    fn is_paper(&self) -> bool {
        true
    }

    fn exchange_name(&self) -> &str {
        "paper"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn open_reduce_and_close() {
        let ex = PaperExchange::new();
        ex.set_mark_price("BTCUSDT", dec!(91300)).await;

        ex.submit_market_order(OrderRequest::open("BTCUSDT", Side::Long, dec!(0.02)))
            .await
            .unwrap();
        let pos = ex.get_position("BTCUSDT").await.unwrap().unwrap();
        assert_eq!(pos.side, Side::Long);
        assert_eq!(pos.entry_price, dec!(91300));

        ex.set_mark_price("BTCUSDT", dec!(92213)).await;
        let order = ex
            .submit_market_order(OrderRequest::reduce("BTCUSDT", Side::Long, dec!(0.01)))
            .await
            .unwrap();
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.filled_price, dec!(92213));
        assert_eq!(ex.get_position("BTCUSDT").await.unwrap().unwrap().quantity, dec!(0.01));

        assert!(ex.close_position("BTCUSDT").await.unwrap().is_some());
        assert!(ex.get_positions().await.unwrap().is_empty());
        assert!(ex.close_position("BTCUSDT").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn reduce_only_without_position_fails() {
        let ex = PaperExchange::new();
        ex.set_mark_price("BTCUSDT", dec!(100)).await;
        let err = ex
            .submit_market_order(OrderRequest::reduce("BTCUSDT", Side::Short, dec!(1)))
            .await
            .unwrap_err();
        assert!(matches!(err, TradingError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn seeded_positions_are_visible() {
        let ex = PaperExchange::with_positions(vec![ExchangePosition {
            symbol: "ETHUSDT".into(),
            side: Side::Short,
            quantity: dec!(1),
            entry_price: dec!(3000),
            mark_price: dec!(2970),
        }]);
        let pos = ex.get_position("ETHUSDT").await.unwrap().unwrap();
        assert_eq!(pos.unrealized_pnl_pct(), dec!(1));
    }
}
