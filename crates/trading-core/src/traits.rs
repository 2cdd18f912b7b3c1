use async_trait::async_trait;

use crate::{Candle, Signal, Timeframe, TradingResult};

/// Source of OHLCV candles for one instrument.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Fetch the most recent `limit` candles, oldest first.
    async fn fetch_candles(&self, timeframe: Timeframe, limit: usize) -> TradingResult<Vec<Candle>>;

    /// Source name for logging
    fn source_name(&self) -> &str;
}

/// Produces a trade candidate from recent candles. Must be free of side effects.
pub trait SignalGenerator: Send + Sync {
    fn generate(&self, primary: &[Candle], higher: &[Candle]) -> Signal;
}
