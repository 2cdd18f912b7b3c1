use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use trading_core::{validate_series, Candle, CandleSource, Timeframe, TradingError, TradingResult};

const BASE_BACKOFF_MS: u64 = 500;

/// Last series that passed the integrity check
struct CacheEntry {
    data: Vec<Candle>,
    cached_at: DateTime<Utc>,
}

/// Wraps a candle source with a per-attempt timeout, retry with exponential
/// backoff, an integrity check on every response, and a last-good fallback.
///
/// Authentication failures pass straight through: they are never retried and
/// never hidden behind cached data.
pub struct RetryingCandleSource<S> {
    inner: S,
    timeout: Duration,
    max_retries: u32,
    base_backoff: Duration,
    last_good: DashMap<Timeframe, CacheEntry>,
}

impl<S: CandleSource> RetryingCandleSource<S> {
    pub fn new(inner: S, timeout: Duration, max_retries: u32) -> Self {
        Self {
            inner,
            timeout,
            max_retries,
            base_backoff: Duration::from_millis(BASE_BACKOFF_MS),
            last_good: DashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    #[cfg(test)]
    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn fetch_once(&self, timeframe: Timeframe, limit: usize) -> TradingResult<Vec<Candle>> {
        let candles = tokio::time::timeout(self.timeout, self.inner.fetch_candles(timeframe, limit))
            .await
            .map_err(|_| {
                TradingError::Connectivity(format!(
                    "{} {} timed out after {}s",
                    self.inner.source_name(),
                    timeframe,
                    self.timeout.as_secs_f64()
                ))
            })??;
        validate_series(&candles)?;
        Ok(candles)
    }

    fn fallback(&self, timeframe: Timeframe, error: TradingError) -> TradingResult<Vec<Candle>> {
        match self.last_good.get(&timeframe) {
            Some(entry) => {
                tracing::warn!(
                    timeframe = %timeframe,
                    cached_at = %entry.cached_at,
                    error = %error,
                    "Candle fetch failed, serving last good series"
                );
                Ok(entry.data.clone())
            }
            None => Err(error),
        }
    }
}

#[async_trait]
impl<S: CandleSource> CandleSource for RetryingCandleSource<S> {
    async fn fetch_candles(&self, timeframe: Timeframe, limit: usize) -> TradingResult<Vec<Candle>> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.fetch_once(timeframe, limit).await {
                Ok(candles) => {
                    self.last_good.insert(
                        timeframe,
                        CacheEntry {
                            data: candles.clone(),
                            cached_at: Utc::now(),
                        },
                    );
                    return Ok(candles);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) if attempt <= self.max_retries => {
                    let delay = self.base_backoff * 2u32.pow(attempt - 1);
                    tracing::warn!(
                        timeframe = %timeframe,
                        attempt,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Candle fetch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return self.fallback(timeframe, e),
            }
        }
    }

    fn source_name(&self) -> &str {
        self.inner.source_name()
    }
}
