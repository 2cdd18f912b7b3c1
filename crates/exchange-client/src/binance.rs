use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use trading_core::{Candle, CandleSource, Timeframe, TradingError, TradingResult};

const DEFAULT_BASE_URL: &str = "https://fapi.binance.com";
/// Kline requests allowed per minute before the limiter waits
const DEFAULT_RATE_LIMIT: usize = 600;
const MAX_KLINES: usize = 1500;

/// Sliding-window rate limiter: at most `max_requests` per `window`.
#[derive(Clone)]
struct RateLimiter {
    timestamps: Arc<Mutex<VecDeque<Instant>>>,
    max_requests: usize,
    window: Duration,
}

impl RateLimiter {
    fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            timestamps: Arc::new(Mutex::new(VecDeque::new())),
            max_requests: max_requests.max(1),
            window,
        }
    }

    async fn acquire(&self) {
        loop {
            let mut ts = self.timestamps.lock().await;
            let now = Instant::now();

            while let Some(&front) = ts.front() {
                if now.duration_since(front) >= self.window {
                    ts.pop_front();
                } else {
                    break;
                }
            }

            if ts.len() < self.max_requests {
                ts.push_back(now);
                return;
            }
            let oldest = ts.front().copied().unwrap_or(now);

            let sleep_dur = (oldest + self.window).saturating_duration_since(now) + Duration::from_millis(50);
            drop(ts);
            tracing::debug!("Rate limiter: waiting {:.1}s for a kline slot", sleep_dur.as_secs_f64());
            tokio::time::sleep(sleep_dur).await;
        }
    }
}

/// Public USDⓈ-M futures kline feed.
#[derive(Clone)]
pub struct BinanceClient {
    client: Client,
    base_url: String,
    symbol: String,
    api_key: Option<String>,
    rate_limiter: RateLimiter,
}

impl BinanceClient {
    pub fn new(symbol: impl Into<String>, timeout: Duration) -> TradingResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TradingError::Connectivity(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            symbol: symbol.into(),
            api_key: None,
            rate_limiter: RateLimiter::new(DEFAULT_RATE_LIMIT, Duration::from_secs(60)),
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Sent as `X-MBX-APIKEY`; klines work without it.
    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.is_empty());
        self
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }
}

fn field_f64(row: &[Value], idx: usize) -> TradingResult<f64> {
    let value = row
        .get(idx)
        .ok_or_else(|| TradingError::InvalidResponse(format!("kline row missing field {}", idx)))?;
    match value {
        Value::String(s) => s
            .parse::<f64>()
            .map_err(|e| TradingError::InvalidResponse(format!("bad number {:?}: {}", s, e))),
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| TradingError::InvalidResponse(format!("bad number {}", n))),
        other => Err(TradingError::InvalidResponse(format!("unexpected kline field {}", other))),
    }
}

/// Parse a `/fapi/v1/klines` body: an array of
/// `[open_time, open, high, low, close, volume, close_time, ...]` rows.
pub(crate) fn parse_klines(body: &Value) -> TradingResult<Vec<Candle>> {
    let rows = body
        .as_array()
        .ok_or_else(|| TradingError::InvalidResponse("klines body is not an array".to_string()))?;

    rows.iter()
        .map(|row| {
            let row = row
                .as_array()
                .ok_or_else(|| TradingError::InvalidResponse("kline row is not an array".to_string()))?;
            let open_time = row
                .first()
                .and_then(Value::as_i64)
                .ok_or_else(|| TradingError::InvalidResponse("kline row missing open time".to_string()))?;
            let timestamp = DateTime::from_timestamp_millis(open_time).ok_or_else(|| {
                TradingError::InvalidResponse(format!("kline open time {} out of range", open_time))
            })?;

            Ok(Candle {
                timestamp,
                open: field_f64(row, 1)?,
                high: field_f64(row, 2)?,
                low: field_f64(row, 3)?,
                close: field_f64(row, 4)?,
                volume: field_f64(row, 5)?,
            })
        })
        .collect()
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_candles(&self, timeframe: Timeframe, limit: usize) -> TradingResult<Vec<Candle>> {
        self.rate_limiter.acquire().await;

        let url = format!("{}/fapi/v1/klines", self.base_url);
        let limit = limit.clamp(1, MAX_KLINES).to_string();
        let mut request = self.client.get(&url).query(&[
            ("symbol", self.symbol.as_str()),
            ("interval", timeframe.name()),
            ("limit", limit.as_str()),
        ]);
        if let Some(key) = &self.api_key {
            request = request.header("X-MBX-APIKEY", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TradingError::Connectivity(format!("{} klines {}: {}", self.symbol, timeframe, e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(TradingError::Authentication(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }
        if !status.is_success() {
            return Err(TradingError::Connectivity(format!(
                "HTTP {}: {}",
                status,
                response.text().await.unwrap_or_default()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| TradingError::InvalidResponse(e.to_string()))?;
        parse_klines(&body)
    }

    fn source_name(&self) -> &str {
        "binance-futures"
    }
}
