//! Tenant-scoped read queries over the event relations.
//!
//! Every operation resolves its tenant through the same registry check as
//! the write path and is read-only.

use chrono::Utc;
use std::sync::Arc;

use crate::error::Result;
use crate::models::{
    BrowserStats, Dimension, PageCount, ReferrerStats, StatsReport, StoredEvent, TrendPeriod,
    TrendPoint, ViewsPage,
};
use crate::storage::EventStorage;
use crate::tenant::TenantRegistry;

const SECS_PER_DAY: i64 = 86_400;
const TOP_N: i64 = 10;
pub const DEFAULT_REFERRER_LIMIT: i64 = 20;

#[derive(Clone)]
pub struct AggregationEngine {
    storage: Arc<dyn EventStorage>,
    tenants: Arc<TenantRegistry>,
}

impl AggregationEngine {
    pub fn new(storage: Arc<dyn EventStorage>, tenants: Arc<TenantRegistry>) -> Self {
        Self { storage, tenants }
    }

    /// Headline counters plus the top countries and device sizes.
    ///
    /// The counters come from one pass over the relation; the two
    /// breakdowns run concurrently on the shared pool.
    pub async fn get_stats(&self, tenant_id: &str) -> Result<StatsReport> {
        let table = self.tenants.resolve(tenant_id)?;
        let since = Utc::now().timestamp() - SECS_PER_DAY;

        let (summary, by_country, by_device) = tokio::try_join!(
            self.storage.summary(table, since),
            self.storage.top_values(table, Dimension::Country, Some(TOP_N)),
            self.storage.top_values(table, Dimension::DeviceSize, Some(TOP_N)),
        )?;

        Ok(StatsReport {
            total_views: summary.total_views,
            unique_views: summary.unique_views,
            unique_visitors: summary.unique_visitors,
            last_24_hours: summary.last_24_hours,
            by_country,
            by_device,
        })
    }

    /// Non-empty calendar buckets over the trailing `days` days, oldest first.
    pub async fn get_trends(
        &self,
        tenant_id: &str,
        period: TrendPeriod,
        days: u32,
    ) -> Result<Vec<TrendPoint>> {
        let table = self.tenants.resolve(tenant_id)?;
        let since = Utc::now().timestamp() - i64::from(days) * SECS_PER_DAY;

        let buckets = self
            .storage
            .bucket_counts(table, since, period.width_secs(), period.origin())
            .await?;

        Ok(buckets
            .into_iter()
            .map(|b| TrendPoint {
                period: period.label(b.bucket),
                bucket_start: b.bucket,
                count: b.count,
            })
            .collect())
    }

    /// Breakdown by source type (all values) and by referrer domain (top
    /// `limit`, default 20).
    pub async fn get_referrer_stats(
        &self,
        tenant_id: &str,
        limit: Option<i64>,
    ) -> Result<ReferrerStats> {
        let table = self.tenants.resolve(tenant_id)?;
        let limit = limit.unwrap_or(DEFAULT_REFERRER_LIMIT);

        let (by_source, by_domain) = tokio::try_join!(
            self.storage.top_values(table, Dimension::SourceType, None),
            self.storage.top_values(table, Dimension::ReferrerDomain, Some(limit)),
        )?;

        Ok(ReferrerStats {
            by_source,
            by_domain,
        })
    }

    pub async fn get_browser_stats(&self, tenant_id: &str) -> Result<BrowserStats> {
        let table = self.tenants.resolve(tenant_id)?;

        let (by_browser, by_os, by_device_type) = tokio::try_join!(
            self.storage.top_values(table, Dimension::Browser, Some(TOP_N)),
            self.storage.top_values(table, Dimension::Os, Some(TOP_N)),
            self.storage.top_values(table, Dimension::DeviceType, None),
        )?;

        Ok(BrowserStats {
            by_browser,
            by_os,
            by_device_type,
        })
    }

    pub async fn get_page_stats(&self, tenant_id: &str, limit: i64) -> Result<Vec<PageCount>> {
        let table = self.tenants.resolve(tenant_id)?;
        Ok(self.storage.page_counts(table, limit).await?)
    }

    /// Every event of one session, oldest first.
    pub async fn get_session_details(
        &self,
        tenant_id: &str,
        session_id: &str,
    ) -> Result<Vec<StoredEvent>> {
        let table = self.tenants.resolve(tenant_id)?;
        Ok(self.storage.session_events(table, session_id).await?)
    }

    pub async fn get_views(&self, tenant_id: &str, limit: i64, offset: i64) -> Result<ViewsPage> {
        let table = self.tenants.resolve(tenant_id)?;

        let (views, total) = tokio::try_join!(
            self.storage.recent_views(table, limit, offset),
            self.storage.total_count(table),
        )?;

        Ok(ViewsPage {
            views,
            total,
            limit,
            offset,
        })
    }
}
