//! Valuation service
//!
//! Front door for callers: cache lookup, single-flight per cache key,
//! request timeout, and repricing for the caller's asking price.

use crate::cache::{CacheKey, SweepHandle, ValuationCache};
use crate::config::ValuationConfig;
use crate::error::{ValuationError, ValuationResult};
use crate::pipeline::ValuationPipeline;
use crate::types::{EvidenceBundle, SubjectProperty};
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Bundle returned to the caller plus whether it came from the cache
#[derive(Debug, Clone)]
pub struct ValuationOutcome {
    pub bundle: EvidenceBundle,
    pub from_cache: bool,
}

type KeyLock = tokio::sync::Mutex<()>;

pub struct ValuationService {
    pipeline: Arc<ValuationPipeline>,
    cache: Arc<ValuationCache>,
    request_timeout: Duration,
    sweep_interval: Duration,
    /// One lock per key with a miss in progress; entries die with their last waiter
    inflight: Mutex<HashMap<CacheKey, Weak<KeyLock>>>,
}

impl ValuationService {
    pub fn new(pipeline: ValuationPipeline, config: &ValuationConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            cache: Arc::new(ValuationCache::new(config.cache_ttl)),
            request_timeout: config.request_timeout,
            sweep_interval: config.sweep_interval,
            inflight: Mutex::new(HashMap::new()),
        }
    }

    pub fn cache(&self) -> &Arc<ValuationCache> {
        &self.cache
    }

    /// Start the cache's background sweep at the configured interval
    pub fn start_sweeper(&self) -> SweepHandle {
        self.cache.start_sweeper(self.sweep_interval)
    }

    /// Evidence bundle for `subject`, from cache when fresh
    ///
    /// Only a completed pipeline run is cached. Cancellation and timeout
    /// leave the cache untouched.
    pub async fn value(
        &self,
        subject: &SubjectProperty,
        as_of: NaiveDate,
        cancel: &CancellationToken,
    ) -> ValuationResult<ValuationOutcome> {
        let key = CacheKey::for_subject(subject);

        if let Some(hit) = self.cached(&key, subject).await {
            return Ok(hit);
        }

        let lock = self.key_lock(&key);
        let _guard = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ValuationError::Cancelled),
            guard = lock.lock() => guard,
        };

        // Another caller may have filled the entry while we waited
        if let Some(hit) = self.cached(&key, subject).await {
            return Ok(hit);
        }

        debug!(key = %key, postcode = %subject.postcode, "Cache miss, running pipeline");
        let bundle = match tokio::time::timeout(
            self.request_timeout,
            self.pipeline.run(subject, as_of, cancel),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    postcode = %subject.postcode,
                    timeout_secs = self.request_timeout.as_secs(),
                    "Valuation request timed out"
                );
                return Err(ValuationError::TimedOut(self.request_timeout.as_secs()));
            }
        };

        self.cache.put(key, bundle.clone()).await;
        Ok(ValuationOutcome {
            bundle,
            from_cache: false,
        })
    }

    async fn cached(&self, key: &CacheKey, subject: &SubjectProperty) -> Option<ValuationOutcome> {
        let hit = self.cache.get(key).await?;
        info!(
            key = %key,
            created_at = %hit.created_at,
            "Serving valuation from cache"
        );
        Some(ValuationOutcome {
            bundle: hit.bundle.repriced(subject),
            from_cache: true,
        })
    }

    fn key_lock(&self, key: &CacheKey) -> Arc<KeyLock> {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.retain(|_, lock| lock.strong_count() > 0);

        if let Some(lock) = inflight.get(key).and_then(Weak::upgrade) {
            return lock;
        }
        let lock = Arc::new(KeyLock::new(()));
        inflight.insert(key.clone(), Arc::downgrade(&lock));
        lock
    }
}
