use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::OracleResult;
use crate::models::{OracleDecision, OracleRequest};
use crate::AdvisoryOracle;

const CACHE_TTL_SECS: i64 = 30;

struct CacheEntry<T> {
    data: T,
    cached_at: DateTime<Utc>,
}

/// Reuses a decision when the same rendered snapshot was evaluated recently.
/// Only successful decisions are cached.
pub struct CachedOracle<O> {
    inner: O,
    ttl: Duration,
    cache: DashMap<String, CacheEntry<OracleDecision>>,
}

impl<O: AdvisoryOracle> CachedOracle<O> {
    pub fn new(inner: O) -> Self {
        Self::with_ttl(inner, Duration::seconds(CACHE_TTL_SECS))
    }

    pub fn with_ttl(inner: O, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &O {
        &self.inner
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    fn evict_expired(&self, now: DateTime<Utc>) {
        self.cache.retain(|_, entry| now - entry.cached_at < self.ttl);
    }
}

#[async_trait]
impl<O: AdvisoryOracle> AdvisoryOracle for CachedOracle<O> {
    async fn consult(&self, request: &OracleRequest) -> OracleResult<OracleDecision> {
        let key = request.render_message();
        let now = Utc::now();
        self.evict_expired(now);

        if let Some(entry) = self.cache.get(&key) {
            tracing::debug!(age_secs = (now - entry.cached_at).num_seconds(), "Oracle cache hit");
            return Ok(entry.data.clone());
        }

        let decision = self.inner.consult(request).await?;
        self.cache.insert(
            key,
            CacheEntry {
                data: decision.clone(),
                cached_at: Utc::now(),
            },
        );
        Ok(decision)
    }

    fn oracle_name(&self) -> &str {
        self.inner.oracle_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OracleError;
    use crate::models::PermissivenessLevel;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingOracle {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl AdvisoryOracle for CountingOracle {
        async fn consult(&self, _request: &OracleRequest) -> OracleResult<OracleDecision> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OracleError::Timeout);
            }
            Ok(OracleDecision { should_enter: true, confidence: 0.8, reason: "ok".into() })
        }

        fn oracle_name(&self) -> &str {
            "counting"
        }
    }

    fn request(rsi: f64) -> OracleRequest {
        OracleRequest {
            level: PermissivenessLevel::new(3),
            side: None,
            price: 100.0,
            rsi,
            ema_fast: 100.0,
            ema_slow: 99.0,
            phase: "NEUTRAL".into(),
            open_positions: 0,
            risk_reward_ratio: 2.0,
            correlation: None,
        }
    }

    #[tokio::test]
    async fn identical_snapshot_is_served_from_cache() {
        let oracle = CachedOracle::new(CountingOracle { calls: AtomicUsize::new(0), fail: false });
        oracle.consult(&request(28.0)).await.unwrap();
        oracle.consult(&request(28.0)).await.unwrap();
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 1);

        oracle.consult(&request(31.0)).await.unwrap();
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 2);
        assert_eq!(oracle.len(), 2);
    }

    #[tokio::test]
    async fn expired_entries_are_refetched() {
        let oracle = CachedOracle::with_ttl(
            CountingOracle { calls: AtomicUsize::new(0), fail: false },
            Duration::zero(),
        );
        oracle.consult(&request(28.0)).await.unwrap();
        oracle.consult(&request(28.0)).await.unwrap();
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let oracle = CachedOracle::new(CountingOracle { calls: AtomicUsize::new(0), fail: true });
        assert!(oracle.consult(&request(28.0)).await.is_err());
        assert!(oracle.consult(&request(28.0)).await.is_err());
        assert_eq!(oracle.inner().calls.load(Ordering::SeqCst), 2);
        assert!(oracle.is_empty());
    }
}
