use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::sync::Arc;

use crate::models::{
    limits, Dimension, DimensionCount, EventRow, NewEvent, PageCount, StoredEvent, SummaryCounts,
    ViewRow,
};
use crate::privacy::MaskedIp;
use crate::storage::{
    index_statements, AdmissionGate, BucketCount, EventStorage, PoolSettings, StorageError,
    StorageResult,
};
use crate::tenant::TenantTable;

pub struct PostgresStorage {
    pool: Arc<PgPool>,
    gate: AdmissionGate,
}

impl PostgresStorage {
    pub async fn new(database_url: &str, settings: &PoolSettings) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
            gate: AdmissionGate::new(settings.max_connections, settings.queue_limit),
        })
    }
}

#[async_trait]
impl EventStorage for PostgresStorage {
    async fn ensure_base(&self) -> StorageResult<()> {
        let _permit = self.gate.admit()?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS _migrations (
                id BIGSERIAL PRIMARY KEY,
                version TEXT NOT NULL UNIQUE,
                applied_at BIGINT NOT NULL
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
                id BIGSERIAL PRIMARY KEY,
                masked_ip VARCHAR(45) NOT NULL,
                country VARCHAR({country}),
                timestamp BIGINT NOT NULL,
                device_size VARCHAR(10) NOT NULL,
                page_path VARCHAR({page_path}),
                page_title VARCHAR({page_title}),
                referrer VARCHAR({referrer}),
                referrer_domain VARCHAR({referrer_domain}),
                source_type VARCHAR(20),
                browser VARCHAR({browser}),
                browser_version VARCHAR({browser_version}),
                os VARCHAR({os}),
                os_version VARCHAR({os_version}),
                device_type VARCHAR(20),
                session_id VARCHAR({session_id}),
                event_type VARCHAR({event_type}) NOT NULL DEFAULT 'pageview',
                event_data TEXT,
                is_unique BOOLEAN NOT NULL DEFAULT TRUE
            )
            "#,
            table = table.quoted(),
            country = limits::COUNTRY,
            page_path = limits::PAGE_PATH,
            page_title = limits::PAGE_TITLE,
            referrer = limits::REFERRER,
            referrer_domain = limits::REFERRER_DOMAIN,
            browser = limits::BROWSER,
            browser_version = limits::BROWSER_VERSION,
            os = limits::OS,
            os_version = limits::OS_VERSION,
            session_id = limits::SESSION_ID,
            event_type = limits::EVENT_TYPE,
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
            VALUES ($1, $2)
            ON CONFLICT (version) DO NOTHING
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
            WHERE masked_ip = $1 AND event_type = 'pageview' AND timestamp >= $2
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
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            RETURNING id
            "#,
            table.quoted()
        );
        let id = sqlx::query_scalar::<_, i64>(&sql)
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
            .fetch_one(self.pool.as_ref())
            .await?;
        Ok(id)
    }

    async fn summary(&self, table: &TenantTable, since: i64) -> StorageResult<SummaryCounts> {
        let _permit = self.gate.admit()?;
        let sql = format!(
            r#"
            SELECT
                COUNT(*) AS total_views,
                COUNT(CASE WHEN is_unique THEN 1 END) AS unique_views,
                COUNT(DISTINCT masked_ip) AS unique_visitors,
                COUNT(CASE WHEN timestamp > $1 THEN 1 END) AS last_24_hours
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
            sql.push_str(" LIMIT $1");
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
                SELECT ((timestamp - $1) / $2) * $2 + $1 AS bucket
                FROM {}
                WHERE timestamp >= $3
            ) AS buckets
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
            LIMIT $1
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
            WHERE session_id = $1
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
            LIMIT $1 OFFSET $2
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
