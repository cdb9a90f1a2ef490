use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::sync::Arc;

use crate::models::{
    Dimension, DimensionCount, EventRow, NewEvent, PageCount, StoredEvent, SummaryCounts, ViewRow,
};
use crate::privacy::MaskedIp;
use crate::storage::{
    index_statements, AdmissionGate, BucketCount, EventStorage, PoolSettings, StorageError,
    StorageResult,
};
use crate::tenant::TenantTable;

pub struct SqliteStorage {
    pool: Arc<SqlitePool>,
    gate: AdmissionGate,
}

impl SqliteStorage {
    /// Open (creating the database file if needed) a pool for `database_url`.
    pub async fn new(database_url: &str, settings: &PoolSettings) -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
            gate: AdmissionGate::new(settings.max_connections, settings.queue_limit),
        })
    }
}

#[async_trait]
impl EventStorage for SqliteStorage {
    async fn ensure_base(&self) -> StorageResult<()> {
        let _permit = self.gate.admit()?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                version TEXT NOT NULL UNIQUE,
                applied_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;
        Ok(())
    }

    async fn ensure_tenant_relation(&self, table: &TenantTable) -> StorageResult<()> {
        let _permit = self.gate.admit()?;
        let create = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                masked_ip TEXT NOT NULL,
                country TEXT,
                timestamp INTEGER NOT NULL,
                device_size TEXT NOT NULL,
                page_path TEXT,
                page_title TEXT,
                referrer TEXT,
                referrer_domain TEXT,
                source_type TEXT,
                browser TEXT,
                browser_version TEXT,
                os TEXT,
                os_version TEXT,
                device_type TEXT,
                session_id TEXT,
                event_type TEXT NOT NULL DEFAULT 'pageview',
                event_data TEXT,
                is_unique INTEGER NOT NULL DEFAULT 1
            )
            "#,
            table = table.quoted()
        );
        sqlx::query(&create).execute(self.pool.as_ref()).await?;

        for statement in index_statements(table) {
            sqlx::query(&statement).execute(self.pool.as_ref()).await?;
        }
        Ok(())
    }

    async fn record_schema_version(&self, version: &str) -> StorageResult<bool> {
        let _permit = self.gate.admit()?;
        let result = sqlx::query(
            r#"
            INSERT INTO _migrations (version, applied_at)
            VALUES (?, ?)
            ON CONFLICT(version) DO NOTHING
            "#,
        )
        .bind(version)
        .bind(chrono::Utc::now().timestamp())
        .execute(self.pool.as_ref())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn applied_versions(&self) -> StorageResult<Vec<String>> {
        let _permit = self.gate.admit()?;
        let versions = sqlx::query_scalar::<_, String>(
            "SELECT version FROM _migrations ORDER BY id ASC",
        )
        .fetch_all(self.pool.as_ref())
        .await?;
        Ok(versions)
    }

    async fn has_recent_pageview(
        &self,
        table: &TenantTable,
        masked_ip: &MaskedIp,
        since: i64,
    ) -> StorageResult<bool> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT id FROM {}
            WHERE masked_ip = ? AND event_type = 'pageview' AND timestamp >= ?
            LIMIT 1
            "#,
            table.quoted()
        );
        let found = sqlx::query_scalar::<_, i64>(&sql)
            .bind(masked_ip.as_str())
            .bind(since)
            .fetch_optional(self.pool.as_ref())
            .await?;
        Ok(found.is_some())
    }

    async fn insert_event(&self, table: &TenantTable, event: &NewEvent) -> StorageResult<i64> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            INSERT INTO {} (
                masked_ip, country, timestamp, device_size, page_path, page_title,
                referrer, referrer_domain, source_type, browser, browser_version,
                os, os_version, device_type, session_id, event_type, event_data, is_unique
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            table.quoted()
        );
        let result = sqlx::query(&sql)
            .bind(event.masked_ip.as_str())
            .bind(event.country.as_deref())
            .bind(event.timestamp)
            .bind(event.device_size.as_str())
            .bind(event.page_path.as_deref())
            .bind(event.page_title.as_deref())
            .bind(event.referrer.as_deref())
            .bind(event.referrer_domain.as_deref())
            .bind(event.source_type.map(|s| s.as_str()))
            .bind(event.browser.as_deref())
            .bind(event.browser_version.as_deref())
            .bind(event.os.as_deref())
            .bind(event.os_version.as_deref())
            .bind(event.device_type.map(|d| d.as_str()))
            .bind(event.session_id.as_deref())
            .bind(event.event_type.as_str())
            .bind(event.event_data.as_deref())
            .bind(event.is_unique)
            .execute(self.pool.as_ref())
            .await?;
        Ok(result.last_insert_rowid())
    }

    async fn summary(&self, table: &TenantTable, since: i64) -> StorageResult<SummaryCounts> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT
                COUNT(*) AS total_views,
                COUNT(CASE WHEN is_unique = 1 THEN 1 END) AS unique_views,
                COUNT(DISTINCT masked_ip) AS unique_visitors,
                COUNT(CASE WHEN timestamp > ? THEN 1 END) AS last_24_hours
            FROM {}
            "#,
            table.quoted()
        );
        let counts = sqlx::query_as::<_, SummaryCounts>(&sql)
            .bind(since)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(counts)
    }

    async fn top_values(
        &self,
        table: &TenantTable,
        dimension: Dimension,
        limit: Option<i64>,
    ) -> StorageResult<Vec<DimensionCount>> {
        let _permit = self.gate.admit()?;
        let column = dimension.column();
        let mut sql = format!(
            r#"
            SELECT {column} AS value, COUNT(*) AS count
            FROM {table}
            WHERE {column} IS NOT NULL
            GROUP BY {column}
            ORDER BY count DESC, value ASC
            "#,
            table = table.quoted()
        );
        if limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut query = sqlx::query_as::<_, DimensionCount>(&sql);
        if let Some(limit) = limit {
            query = query.bind(limit);
        }
        Ok(query.fetch_all(self.pool.as_ref()).await?)
    }

    async fn bucket_counts(
        &self,
        table: &TenantTable,
        since: i64,
        width: i64,
        origin: i64,
    ) -> StorageResult<Vec<BucketCount>> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT bucket, COUNT(*) AS count
            FROM (
                SELECT ((timestamp - ?1) / ?2) * ?2 + ?1 AS bucket
                FROM {}
                WHERE timestamp >= ?3
            )
            GROUP BY bucket
            ORDER BY bucket ASC
            "#,
            table.quoted()
        );
        let buckets = sqlx::query_as::<_, BucketCount>(&sql)
            .bind(origin)
            .bind(width)
            .bind(since)
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(buckets)
    }

    async fn page_counts(&self, table: &TenantTable, limit: i64) -> StorageResult<Vec<PageCount>> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT page_path, page_title, COUNT(*) AS views
            FROM {}
            WHERE page_path IS NOT NULL
            GROUP BY page_path, page_title
            ORDER BY views DESC, page_path ASC
            LIMIT ?
            "#,
            table.quoted()
        );
        let pages = sqlx::query_as::<_, PageCount>(&sql)
            .bind(limit)
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(pages)
    }

    async fn session_events(
        &self,
        table: &TenantTable,
        session_id: &str,
    ) -> StorageResult<Vec<StoredEvent>> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT id, masked_ip, country, timestamp, device_size, page_path, page_title,
                   referrer, referrer_domain, source_type, browser, browser_version,
                   os, os_version, device_type, session_id, event_type, event_data, is_unique
            FROM {}
            WHERE session_id = ?
            ORDER BY timestamp ASC, id ASC
            "#,
            table.quoted()
        );
        let rows = sqlx::query_as::<_, EventRow>(&sql)
            .bind(session_id)
            .fetch_all(self.pool.as_ref())
            .await?;

        rows.into_iter()
            .map(|row| StoredEvent::try_from(row).map_err(StorageError::Corrupt))
            .collect()
    }

    async fn recent_views(
        &self,
        table: &TenantTable,
        limit: i64,
        offset: i64,
    ) -> StorageResult<Vec<ViewRow>> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT masked_ip, country, timestamp, device_size
            FROM {}
            ORDER BY timestamp DESC, id DESC
            LIMIT ? OFFSET ?
            "#,
            table.quoted()
        );
        let views = sqlx::query_as::<_, ViewRow>(&sql)
            .bind(limit)
            .bind(offset)
            .fetch_all(self.pool.as_ref())
            .await?;
        Ok(views)
    }

    async fn total_count(&self, table: &TenantTable) -> StorageResult<i64> {
        let _permit = self.gate.admit()?;
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        let total = sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(total)
    }

    async fn health_check(&self) -> StorageResult<()> {
        let _permit = self.gate.admit()?;
        sqlx::query("SELECT 1").execute(self.pool.as_ref()).await?;
        Ok(())
    }

    async fn close(&self) {
        self.gate.close();
        self.pool.close().await;
    }
}
