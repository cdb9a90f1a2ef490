use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    Dimension, DimensionCount, NewEvent, PageCount, StoredEvent, SummaryCounts, ViewRow,
};
use crate::privacy::MaskedIp;
use crate::tenant::TenantTable;

#[derive(Debug, Error)]
pub enum StorageError {
    /// Every connection is busy and the wait queue is full.
    #[error("storage is saturated, retry later")]
    Saturated,
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    /// A stored value could not be decoded into the event model.
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Version string recorded once the tenant relations exist.
pub const SCHEMA_VERSION: &str = "events_schema_v1";

/// A single bucket as produced by the trend query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct BucketCount {
    pub bucket: i64,
    pub count: i64,
}

/// Persistence for tenant event relations.
///
/// Every address argument is a [`MaskedIp`]; implementations never see a
/// raw client address.
#[async_trait]
pub trait EventStorage: Send + Sync {
    /// Create the base container and the schema marker relation.
    async fn ensure_base(&self) -> StorageResult<()>;

    /// Create a tenant relation and its indexes if they do not exist.
    async fn ensure_tenant_relation(&self, table: &TenantTable) -> StorageResult<()>;

    /// Record a schema version. Returns `false` if it was already recorded.
    async fn record_schema_version(&self, version: &str) -> StorageResult<bool>;

    async fn applied_versions(&self) -> StorageResult<Vec<String>>;

    /// Whether a pageview from `masked_ip` exists with `timestamp >= since`.
    async fn has_recent_pageview(
        &self,
        table: &TenantTable,
        masked_ip: &MaskedIp,
        since: i64,
    ) -> StorageResult<bool>;

    /// Append one event and return its row id.
    async fn insert_event(&self, table: &TenantTable, event: &NewEvent) -> StorageResult<i64>;

    /// Total, unique, distinct-address and `timestamp > since` counts in one pass.
    async fn summary(&self, table: &TenantTable, since: i64) -> StorageResult<SummaryCounts>;

    /// Frequency breakdown of one column, most frequent first. Ties are
    /// ordered by value. `None` returns every value.
    async fn top_values(
        &self,
        table: &TenantTable,
        dimension: Dimension,
        limit: Option<i64>,
    ) -> StorageResult<Vec<DimensionCount>>;

    /// Row counts per bucket of `width` seconds aligned to `origin`, for rows
    /// with `timestamp >= since`, ascending by bucket start.
    async fn bucket_counts(
        &self,
        table: &TenantTable,
        since: i64,
        width: i64,
        origin: i64,
    ) -> StorageResult<Vec<BucketCount>>;

    async fn page_counts(&self, table: &TenantTable, limit: i64) -> StorageResult<Vec<PageCount>>;

    /// Events of one session ordered by timestamp, then id.
    async fn session_events(
        &self,
        table: &TenantTable,
        session_id: &str,
    ) -> StorageResult<Vec<StoredEvent>>;

    /// Most recent rows first.
    async fn recent_views(
        &self,
        table: &TenantTable,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ViewRow>>;

    async fn total_count(&self, table: &TenantTable) -> StorageResult<i64>;

    async fn health_check(&self) -> StorageResult<()>;

    /// Release the pool. Further calls fail.
    async fn close(&self);
}
