//! Approximate active-visitor counts.
//!
//! Each tenant gets a `moka` cache of transient visitor digests with a
//! time-to-live. Nothing here is persisted and the digests cannot be
//! reversed into addresses.

use dashmap::DashMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::privacy::transient_visitor_digest;

const MAX_VISITORS_PER_TENANT: u64 = 100_000;

#[derive(Clone)]
pub struct ActiveVisitors {
    caches: Arc<DashMap<String, Cache<String, ()>>>,
    ttl: Duration,
}

impl ActiveVisitors {
    pub fn new(ttl: Duration) -> Self {
        Self {
            caches: Arc::new(DashMap::new()),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    fn cache_for(&self, tenant_id: &str) -> Cache<String, ()> {
        self.caches
            .entry(tenant_id.to_string())
            .or_insert_with(|| {
                Cache::builder()
                    .max_capacity(MAX_VISITORS_PER_TENANT)
                    .time_to_live(self.ttl)
                    .build()
            })
            .clone()
    }

    /// Mark the visitor identified by `raw_ip` and `user_agent` as active.
    pub async fn touch(&self, tenant_id: &str, raw_ip: &str, user_agent: &str) {
        let digest = transient_visitor_digest(raw_ip, user_agent);
        self.cache_for(tenant_id).insert(digest, ()).await;
    }

    /// Visitors seen within the time-to-live.
    pub async fn count(&self, tenant_id: &str) -> u64 {
        let Some(cache) = self.caches.get(tenant_id).map(|c| c.clone()) else {
            return 0;
        };
        cache.run_pending_tasks().await;
        cache.entry_count()
    }
}
