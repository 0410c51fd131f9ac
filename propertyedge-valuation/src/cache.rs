//! Valuation Cache
//!
//! In-process, TTL-bounded memo of evidence bundles keyed on the subject's
//! attributes. The asking price is not part of the key: buyers comparing
//! list prices for the same property share one pipeline run.
//!
//! Reads never evict. Expired entries are removed by a background sweep
//! with an explicit lifecycle (`start_sweeper` / `SweepHandle::stop`).

use crate::types::{EvidenceBundle, SubjectProperty, Tenure};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const KEY_SEPARATOR: &str = "|";

/// SHA-256 of the subject's price-independent attributes
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn for_subject(subject: &SubjectProperty) -> Self {
        let digest = Sha256::digest(key_material(subject).as_bytes());
        CacheKey(format!("{:x}", digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Separator-joined key fields; the asking price is deliberately absent
pub fn key_material(subject: &SubjectProperty) -> String {
    fn opt<T: ToString>(value: Option<T>) -> String {
        value.map(|v| v.to_string()).unwrap_or_default()
    }

    let (service_charge, ground_rent, lease_years) = match &subject.tenure {
        Tenure::Freehold => (None, None, None),
        Tenure::Leasehold {
            annual_service_charge,
            annual_ground_rent,
            remaining_lease_years,
        } => (*annual_service_charge, *annual_ground_rent, *remaining_lease_years),
    };

    [
        subject.address.trim().to_lowercase(),
        subject.postcode.trim().to_uppercase(),
        subject.category.as_str().to_string(),
        subject.bedrooms.to_string(),
        opt(subject.floor_area_sqm),
        opt(subject.year_built),
        subject.tenure.as_str().to_string(),
        opt(service_charge),
        opt(ground_rent),
        opt(lease_years),
    ]
    .join(KEY_SEPARATOR)
}

struct CacheEntry {
    bundle: EvidenceBundle,
    inserted: Instant,
    created_at: DateTime<Utc>,
}

/// A cached bundle with its creation time
#[derive(Debug, Clone)]
pub struct CachedBundle {
    pub bundle: EvidenceBundle,
    pub created_at: DateTime<Utc>,
}

pub struct ValuationCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
}

impl ValuationCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry younger than the TTL, if any
    pub async fn get(&self, key: &CacheKey) -> Option<CachedBundle> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .map(|e| CachedBundle {
                bundle: e.bundle.clone(),
                created_at: e.created_at,
            })
    }

    pub async fn put(&self, key: CacheKey, bundle: EvidenceBundle) {
        let entry = CacheEntry {
            bundle,
            inserted: Instant::now(),
            created_at: Utc::now(),
        };
        self.entries.write().await.insert(key, entry);
    }

    /// Number of stored entries, expired ones included until swept
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Remove expired entries, returning how many were dropped
    pub async fn sweep(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, e| e.inserted.elapsed() < self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, remaining = entries.len(), "Cache sweep");
        }
        removed
    }

    /// Spawn the periodic sweep task
    pub fn start_sweeper(self: &Arc<Self>, interval: Duration) -> SweepHandle {
        let cache = Arc::clone(self);
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        cache.sweep().await;
                    }
                }
            }
            debug!("Cache sweeper stopped");
        });

        info!(
            interval_secs = interval.as_secs(),
            ttl_secs = self.ttl.as_secs(),
            "Cache sweeper started"
        );
        SweepHandle { cancel, task }
    }
}

/// Owner of the background sweep task
pub struct SweepHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SweepHandle {
    /// Stop sweeping and wait for the task to finish
    pub async fn stop(self) {
        self.cancel.cancel();
        let _ = self.task.await;
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AreaData, PropertyCategory};
    use chrono::NaiveDate;

    fn subject(asking: Option<i64>) -> SubjectProperty {
        SubjectProperty {
            address: "12 Acacia Avenue, Leeds".to_string(),
            postcode: "ls6 2ab".to_string(),
            category: PropertyCategory::Flat,
            bedrooms: 2,
            floor_area_sqm: Some(61.5),
            year_built: None,
            tenure: Tenure::Leasehold {
                annual_service_charge: Some(1200.0),
                annual_ground_rent: None,
                remaining_lease_years: Some(98),
            },
            asking_price: asking,
        }
    }

    fn bundle() -> EvidenceBundle {
        EvidenceBundle {
            postcode: "LS6 2AB".to_string(),
            location: None,
            comparables: Vec::new(),
            area: AreaData::default(),
            data_sources: Vec::new(),
            confidence_drivers: Vec::new(),
            negotiation_points: Vec::new(),
            subject_energy_rating: None,
            estimate: None,
            assessment: None,
            as_of: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            generated_at: Utc::now(),
        }
    }

    #[test]
    fn test_key_material_layout() {
        assert_eq!(
            key_material(&subject(None)),
            "12 acacia avenue, leeds|LS6 2AB|flat|2|61.5||leasehold|1200||98"
        );
    }

    #[test]
    fn test_key_ignores_asking_price() {
        assert_eq!(
            CacheKey::for_subject(&subject(Some(250_000))),
            CacheKey::for_subject(&subject(Some(199_950)))
        );
        assert_eq!(
            CacheKey::for_subject(&subject(None)),
            CacheKey::for_subject(&subject(Some(1)))
        );
    }

    #[test]
    fn test_key_changes_with_attributes() {
        let mut other = subject(None);
        other.bedrooms = 3;
        assert_ne!(CacheKey::for_subject(&subject(None)), CacheKey::for_subject(&other));
        assert_eq!(CacheKey::for_subject(&other).as_str().len(), 64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_respects_ttl_without_evicting() {
        let cache = ValuationCache::new(Duration::from_secs(60));
        let key = CacheKey::for_subject(&subject(None));
        cache.put(key.clone(), bundle()).await;

        assert!(cache.get(&key).await.is_some());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(cache.get(&key).await.is_none());
        assert_eq!(cache.len().await, 1, "reads do not evict");

        assert_eq!(cache.sweep().await, 1);
        assert!(cache.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_lifecycle() {
        let cache = Arc::new(ValuationCache::new(Duration::from_secs(10)));
        cache.put(CacheKey::for_subject(&subject(None)), bundle()).await;

        let handle = cache.start_sweeper(Duration::from_secs(30));
        assert!(handle.is_running());

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(cache.is_empty().await);

        handle.stop().await;
    }
}
