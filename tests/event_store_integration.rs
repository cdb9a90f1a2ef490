//! Integration tests for provisioning and the event write path
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests (needs DATABASE_URL)
//! - By default, both backends are tested

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use viewcounter::analytics::AggregationEngine;
use viewcounter::models::{
    limits, DeviceSize, Dimension, DimensionCount, EventAttributes, NewEvent, PageCount,
    StoredEvent, SummaryCounts, ViewRow,
};
use viewcounter::privacy::{MaskedIp, UnrecognizedAddressPolicy};
use viewcounter::provision;
use viewcounter::storage::{
    BucketCount, EventStorage, PoolSettings, PostgresStorage, SqliteStorage, StorageError,
    StorageResult, SCHEMA_VERSION,
};
use viewcounter::store::EventStore;
use viewcounter::tenant::{TenantRegistry, TenantTable};
use viewcounter::Error;

fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true,
    }
}

async fn create_sqlite_storage() -> Arc<dyn EventStorage> {
    let storage = SqliteStorage::new("sqlite::memory:", &PoolSettings::with_max_connections(5))
        .await
        .unwrap();
    Arc::new(storage)
}

async fn create_postgres_storage() -> Option<Arc<dyn EventStorage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    if !db_url.starts_with("postgres") {
        return None;
    }
    let storage = PostgresStorage::new(&db_url, &PoolSettings::with_max_connections(5))
        .await
        .ok()?;
    Some(Arc::new(storage))
}

struct Harness {
    storage: Arc<dyn EventStorage>,
    tenants: Arc<TenantRegistry>,
    store: EventStore,
    engine: AggregationEngine,
}

async fn provisioned(storage: Arc<dyn EventStorage>, tenants: &[&str]) -> Harness {
    let tenants = Arc::new(TenantRegistry::new(tenants.iter()).unwrap());
    provision::initialize(storage.as_ref(), &tenants).await.unwrap();
    Harness {
        store: EventStore::new(
            Arc::clone(&storage),
            Arc::clone(&tenants),
            UnrecognizedAddressPolicy::Sentinel,
            24,
        ),
        engine: AggregationEngine::new(Arc::clone(&storage), Arc::clone(&tenants)),
        storage,
        tenants,
    }
}

fn pageview(ip: &str, window_hours: u32) -> EventAttributes {
    EventAttributes::new(ip, DeviceSize::Medium)
        .with_event_type("pageview")
        .with_window_hours(window_hours)
}

async fn check_three_views_from_one_address(storage: Arc<dyn EventStorage>, tenant: &str) {
    let h = provisioned(storage, &[tenant]).await;

    for _ in 0..3 {
        h.store
            .register_view(tenant, "203.0.113.7", Some("US"), DeviceSize::Small, 24)
            .await
            .unwrap();
    }

    let stats = h.engine.get_stats(tenant).await.unwrap();
    assert_eq!(stats.total_views, 3);
    assert_eq!(stats.unique_views, 1);
    assert_eq!(stats.unique_visitors, 1);
    assert_eq!(stats.last_24_hours, 3);
    assert_eq!(stats.by_country[0].value, "US");
    assert_eq!(stats.by_country[0].count, 3);
    assert_eq!(stats.by_device[0].value, "small");
}

#[tokio::test]
async fn test_three_views_from_one_address_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_three_views_from_one_address(create_sqlite_storage().await, "t1").await;
}

#[tokio::test]
async fn test_three_views_from_one_address_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL not set to a PostgreSQL URL");
        return;
    };
    let tenant = format!("t1_{}", std::process::id());
    check_three_views_from_one_address(storage, &tenant).await;
}

#[tokio::test]
async fn test_zero_window_never_deduplicates() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;

    for _ in 0..4 {
        let outcome = h.store.register_event("site", pageview("198.51.100.4", 0)).await.unwrap();
        assert!(outcome.is_unique);
        assert!(!outcome.is_duplicate());
    }

    let stats = h.engine.get_stats("site").await.unwrap();
    assert_eq!(stats.total_views, 4);
    assert_eq!(stats.unique_views, 4);
    assert_eq!(stats.unique_visitors, 1);
}

#[tokio::test]
async fn test_window_marks_repeat_but_still_stores_it() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;

    let first = h.store.register_event("site", pageview("198.51.100.4", 24)).await.unwrap();
    let second = h.store.register_event("site", pageview("198.51.100.4", 24)).await.unwrap();

    assert!(first.is_unique);
    assert!(!second.is_unique);
    assert!(second.insert_id > first.insert_id);

    let stats = h.engine.get_stats("site").await.unwrap();
    assert_eq!(stats.total_views, 2);
    assert_eq!(stats.unique_views, 1);
}

#[tokio::test]
async fn test_addresses_in_same_network_share_uniqueness() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;

    let a = h.store.register_event("site", pageview("203.0.113.7", 24)).await.unwrap();
    let b = h.store.register_event("site", pageview("203.0.113.200", 24)).await.unwrap();
    let c = h.store.register_event("site", pageview("203.0.114.7", 24)).await.unwrap();

    assert!(a.is_unique);
    assert!(!b.is_unique, "same /24 masks to the same address");
    assert!(c.is_unique);
}

#[tokio::test]
async fn test_default_window_applies_when_caller_sends_none() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;
    assert_eq!(h.store.default_window_hours(), 24);

    let attrs = || EventAttributes::new("2001:db8:1:2::1", DeviceSize::Large);
    let first = h.store.register_event("site", attrs()).await.unwrap();
    let second = h.store.register_event("site", attrs()).await.unwrap();

    assert!(first.is_unique);
    assert!(!second.is_unique);
}

#[tokio::test]
async fn test_non_pageview_events_are_always_unique() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;

    for _ in 0..2 {
        let click = EventAttributes::new("192.0.2.1", DeviceSize::Small)
            .with_event_type("button_click")
            .with_window_hours(24);
        assert!(h.store.register_event("site", click).await.unwrap().is_unique);
    }

    // Earlier clicks do not count as a previous pageview.
    let view = h.store.register_event("site", pageview("192.0.2.1", 24)).await.unwrap();
    assert!(view.is_unique);

    let stats = h.engine.get_stats("site").await.unwrap();
    assert_eq!(stats.total_views, 3);
    assert_eq!(stats.unique_views, 3);
}

#[tokio::test]
async fn test_operations_before_provisioning_fail() {
    let storage = create_sqlite_storage().await;
    let tenants = Arc::new(TenantRegistry::new(["early"]).unwrap());
    let store = EventStore::new(
        Arc::clone(&storage),
        Arc::clone(&tenants),
        UnrecognizedAddressPolicy::Sentinel,
        24,
    );
    let engine = AggregationEngine::new(Arc::clone(&storage), Arc::clone(&tenants));

    let write = store.register_event("early", pageview("192.0.2.1", 24)).await;
    assert!(matches!(write, Err(Error::NotInitialized { .. })));

    let read = engine.get_stats("early").await;
    assert!(matches!(read, Err(Error::NotInitialized { .. })));

    provision::initialize(storage.as_ref(), &tenants).await.unwrap();
    assert!(store.register_event("early", pageview("192.0.2.1", 24)).await.is_ok());
}

#[tokio::test]
async fn test_unknown_tenant_is_rejected_on_both_paths() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;

    let write = h.store.register_event("other", pageview("192.0.2.1", 24)).await;
    assert!(matches!(write, Err(Error::Validation(_))));

    let read = h.engine.get_views("site\"; DROP TABLE site; --", 10, 0).await;
    assert!(matches!(read, Err(Error::Validation(_))));

    assert_eq!(h.engine.get_views("site", 10, 0).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_provisioning_is_idempotent() {
    let h = provisioned(create_sqlite_storage().await, &["alpha", "beta"]).await;
    h.store.register_event("alpha", pageview("192.0.2.1", 0)).await.unwrap();

    let again = provision::initialize(h.storage.as_ref(), &h.tenants).await.unwrap();
    assert_eq!(again.tenants, vec!["alpha", "beta"]);
    assert!(!again.version_recorded);

    assert_eq!(
        h.storage.applied_versions().await.unwrap(),
        vec![SCHEMA_VERSION.to_string()]
    );
    // Existing rows survive re-provisioning.
    assert_eq!(h.engine.get_stats("alpha").await.unwrap().total_views, 1);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let h = provisioned(create_sqlite_storage().await, &["alpha", "beta"]).await;

    h.store.register_event("alpha", pageview("192.0.2.1", 24)).await.unwrap();
    h.store.register_event("alpha", pageview("192.0.2.9", 24)).await.unwrap();
    let beta = h.store.register_event("beta", pageview("192.0.2.1", 24)).await.unwrap();

    assert!(beta.is_unique, "dedup state is per tenant");
    assert_eq!(h.engine.get_stats("alpha").await.unwrap().total_views, 2);
    assert_eq!(h.engine.get_stats("beta").await.unwrap().total_views, 1);
}

#[tokio::test]
async fn test_unrecognized_address_is_stored_as_sentinel() {
    let h = provisioned(create_sqlite_storage().await, &["site"]).await;

    h.store.register_event("site", pageview("not-an-address", 0)).await.unwrap();

    let page = h.engine.get_views("site", 10, 0).await.unwrap();
    assert_eq!(page.views[0].masked_ip, "0.0.0.0");
}

async fn check_passthrough_address_is_capped(storage: Arc<dyn EventStorage>, tenant: &str) {
    let tenants = Arc::new(TenantRegistry::new([tenant]).unwrap());
    provision::initialize(storage.as_ref(), &tenants).await.unwrap();
    let store = EventStore::new(
        Arc::clone(&storage),
        Arc::clone(&tenants),
        UnrecognizedAddressPolicy::Passthrough,
        24,
    );
    let engine = AggregationEngine::new(Arc::clone(&storage), Arc::clone(&tenants));

    let oversized = "x".repeat(60);
    store.register_event(tenant, pageview(&oversized, 24)).await.unwrap();

    let page = engine.get_views(tenant, 10, 0).await.unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.views[0].masked_ip, "x".repeat(limits::MASKED_IP));
}

#[tokio::test]
async fn test_passthrough_address_is_capped_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }
    check_passthrough_address_is_capped(create_sqlite_storage().await, "site").await;
}

#[tokio::test]
async fn test_passthrough_address_is_capped_postgres() {
    if !should_test_backend("postgres") {
        return;
    }
    let Some(storage) = create_postgres_storage().await else {
        eprintln!("Skipping PostgreSQL test: DATABASE_URL not set to a PostgreSQL URL");
        return;
    };
    let tenant = format!("passthrough_{}", std::process::id());
    check_passthrough_address_is_capped(storage, &tenant).await;
}

/// Wraps a real backend and fails selected provisioning steps on demand.
struct FailingStorage {
    inner: Arc<dyn EventStorage>,
    fail_base: AtomicBool,
    fail_tenant: Mutex<Option<String>>,
}

impl FailingStorage {
    async fn new() -> Self {
        Self {
            inner: create_sqlite_storage().await,
            fail_base: AtomicBool::new(false),
            fail_tenant: Mutex::new(None),
        }
    }

    fn injected(step: &str) -> StorageError {
        StorageError::Corrupt(format!("injected failure in {step}"))
    }
}

#[async_trait]
impl EventStorage for FailingStorage {
    async fn ensure_base(&self) -> StorageResult<()> {
        if self.fail_base.load(Ordering::SeqCst) {
            return Err(Self::injected("ensure_base"));
        }
        self.inner.ensure_base().await
    }

    async fn ensure_tenant_relation(&self, table: &TenantTable) -> StorageResult<()> {
        let fail = self.fail_tenant.lock().unwrap().as_deref() == Some(table.tenant_id());
        if fail {
            return Err(Self::injected(table.tenant_id()));
        }
        self.inner.ensure_tenant_relation(table).await
    }

    async fn record_schema_version(&self, version: &str) -> StorageResult<bool> {
        self.inner.record_schema_version(version).await
    }

    async fn applied_versions(&self) -> StorageResult<Vec<String>> {
        self.inner.applied_versions().await
    }

    async fn has_recent_pageview(
        &self,
        table: &TenantTable,
        masked_ip: &MaskedIp,
        since: i64,
    ) -> StorageResult<bool> {
        self.inner.has_recent_pageview(table, masked_ip, since).await
    }

    async fn insert_event(&self, table: &TenantTable, event: &NewEvent) -> StorageResult<i64> {
        self.inner.insert_event(table, event).await
    }

    async fn summary(&self, table: &TenantTable, since: i64) -> StorageResult<SummaryCounts> {
        self.inner.summary(table, since).await
    }

    async fn top_values(
        &self,
        table: &TenantTable,
        dimension: Dimension,
        limit: Option<i64>,
    ) -> StorageResult<Vec<DimensionCount>> {
        self.inner.top_values(table, dimension, limit).await
    }

    async fn bucket_counts(
        &self,
        table: &TenantTable,
        since: i64,
        width: i64,
        origin: i64,
    ) -> StorageResult<Vec<BucketCount>> {
        self.inner.bucket_counts(table, since, width, origin).await
    }

    async fn page_counts(&self, table: &TenantTable, limit: i64) -> StorageResult<Vec<PageCount>> {
        self.inner.page_counts(table, limit).await
    }

    async fn session_events(
        &self,
        table: &TenantTable,
        session_id: &str,
    ) -> StorageResult<Vec<StoredEvent>> {
        self.inner.session_events(table, session_id).await
    }

    async fn recent_views(
        &self,
        table: &TenantTable,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ViewRow>> {
        self.inner.recent_views(table, limit, offset).await
    }

    async fn total_count(&self, table: &TenantTable) -> StorageResult<i64> {
        self.inner.total_count(table).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        self.inner.health_check().await
    }

    async fn close(&self) {
        self.inner.close().await
    }
}

#[tokio::test]
async fn test_base_failure_leaves_every_tenant_unprovisioned() {
    let storage = FailingStorage::new().await;
    storage.fail_base.store(true, Ordering::SeqCst);
    let tenants = TenantRegistry::new(["alpha", "beta"]).unwrap();

    let result = provision::initialize(&storage, &tenants).await;
    assert!(result.is_err());

    for id in ["alpha", "beta"] {
        assert!(matches!(tenants.resolve(id), Err(Error::NotInitialized { .. })));
    }
    assert!(storage.applied_versions().await.unwrap_or_default().is_empty());
}

#[tokio::test]
async fn test_partial_provisioning_can_be_retried() {
    let storage = FailingStorage::new().await;
    *storage.fail_tenant.lock().unwrap() = Some("beta".to_string());
    let tenants = TenantRegistry::new(["alpha", "beta"]).unwrap();

    let result = provision::initialize(&storage, &tenants).await;
    assert!(result.is_err());
    assert!(tenants.resolve("alpha").is_ok());
    assert!(matches!(tenants.resolve("beta"), Err(Error::NotInitialized { .. })));
    assert!(storage.applied_versions().await.unwrap().is_empty());

    *storage.fail_tenant.lock().unwrap() = None;
    let report = provision::initialize(&storage, &tenants).await.unwrap();
    assert_eq!(report.tenants, vec!["alpha", "beta"]);
    assert!(report.version_recorded);
    assert!(tenants.resolve("alpha").is_ok());
    assert!(tenants.resolve("beta").is_ok());
}
