//! Read-path tests over an in-memory SQLite relation seeded with rows at
//! known timestamps.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use viewcounter::analytics::AggregationEngine;
use viewcounter::models::{
    DeviceSize, DeviceType, EventAttributes, NewEvent, SourceType, TrendPeriod,
};
use viewcounter::privacy::{MaskedIp, UnrecognizedAddressPolicy};
use viewcounter::provision;
use viewcounter::storage::{EventStorage, PoolSettings, SqliteStorage};
use viewcounter::tenant::TenantRegistry;
use viewcounter::Error;

const DAY: i64 = 86_400;

struct Seeded {
    storage: Arc<dyn EventStorage>,
    tenants: Arc<TenantRegistry>,
    engine: AggregationEngine,
}

impl Seeded {
    async fn new() -> Self {
        let storage: Arc<dyn EventStorage> = Arc::new(
            SqliteStorage::new("sqlite::memory:", &PoolSettings::with_max_connections(5))
                .await
                .unwrap(),
        );
        let tenants = Arc::new(TenantRegistry::new(["site"]).unwrap());
        provision::initialize(storage.as_ref(), &tenants).await.unwrap();
        let engine = AggregationEngine::new(Arc::clone(&storage), Arc::clone(&tenants));
        Self {
            storage,
            tenants,
            engine,
        }
    }

    async fn insert_at(&self, attrs: EventAttributes, timestamp: i64) -> i64 {
        let masked = MaskedIp::from_raw(&attrs.ip, UnrecognizedAddressPolicy::Sentinel);
        let event = NewEvent::from_attributes(attrs, masked, timestamp, true);
        let table = self.tenants.table("site").unwrap();
        self.storage.insert_event(table, &event).await.unwrap()
    }
}

fn view(ip: &str) -> EventAttributes {
    EventAttributes::new(ip, DeviceSize::Large)
}

fn referred(domain: &str, source: SourceType) -> EventAttributes {
    let mut attrs = view("192.0.2.10");
    attrs.referrer = Some(format!("https://{domain}/somewhere"));
    attrs.referrer_domain = Some(domain.to_string());
    attrs.source_type = Some(source);
    attrs
}

#[tokio::test]
async fn test_trends_one_entry_per_bucket_ascending() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();
    let timestamps = [
        now - 20 * DAY, // outside a 7 day window
        now - 5 * DAY,
        now - 5 * DAY + 1,
        now - 3 * DAY,
        now - 60,
        now,
    ];
    for ts in timestamps {
        db.insert_at(view("192.0.2.1"), ts).await;
    }

    let since = now - 7 * DAY;
    let mut expected: BTreeMap<i64, i64> = BTreeMap::new();
    for ts in timestamps.into_iter().filter(|ts| *ts >= since) {
        *expected.entry(TrendPeriod::Daily.bucket_start(ts)).or_default() += 1;
    }

    let trends = db.engine.get_trends("site", TrendPeriod::Daily, 7).await.unwrap();

    assert_eq!(trends.len(), expected.len());
    assert!(trends.windows(2).all(|w| w[0].bucket_start < w[1].bucket_start));
    for (point, (bucket, count)) in trends.iter().zip(&expected) {
        assert_eq!(point.bucket_start, *bucket);
        assert_eq!(point.count, *count);
        assert_eq!(point.period, TrendPeriod::Daily.label(*bucket));
    }
    assert_eq!(trends.iter().map(|p| p.count).sum::<i64>(), 5);
}

#[tokio::test]
async fn test_weekly_and_hourly_trends_align_buckets() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();
    for ts in [now - 3 * 3_600, now - 3 * 3_600 + 5, now - 3_600, now] {
        db.insert_at(view("192.0.2.1"), ts).await;
    }

    let hourly = db.engine.get_trends("site", TrendPeriod::Hourly, 1).await.unwrap();
    assert!(hourly.iter().all(|p| p.bucket_start % 3_600 == 0));
    assert_eq!(hourly.iter().map(|p| p.count).sum::<i64>(), 4);

    let weekly = db.engine.get_trends("site", TrendPeriod::Weekly, 14).await.unwrap();
    for point in &weekly {
        assert_eq!(TrendPeriod::Weekly.bucket_start(point.bucket_start), point.bucket_start);
        assert!(point.period.contains("-W"));
    }
    assert_eq!(weekly.iter().map(|p| p.count).sum::<i64>(), 4);
}

#[tokio::test]
async fn test_empty_relation_has_no_trend_points() {
    let db = Seeded::new().await;
    let trends = db.engine.get_trends("site", TrendPeriod::Daily, 30).await.unwrap();
    assert!(trends.is_empty());

    let stats = db.engine.get_stats("site").await.unwrap();
    assert_eq!(stats.total_views, 0);
    assert!(stats.by_country.is_empty());
}

#[tokio::test]
async fn test_stats_last_24_hours_excludes_older_rows() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();

    db.insert_at(view("192.0.2.1").with_country("de"), now - 2 * DAY).await;
    db.insert_at(view("192.0.2.1").with_country("DE"), now - 10).await;
    db.insert_at(view("198.51.100.1").with_country("fr"), now).await;

    let stats = db.engine.get_stats("site").await.unwrap();
    assert_eq!(stats.total_views, 3);
    assert_eq!(stats.last_24_hours, 2);
    assert_eq!(stats.unique_visitors, 2);
    assert_eq!(stats.by_country[0].value, "DE");
    assert_eq!(stats.by_country[0].count, 2);
    assert_eq!(stats.by_country[1].value, "FR");
}

#[tokio::test]
async fn test_referrer_breakdowns() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();

    for _ in 0..3 {
        db.insert_at(referred("www.google.com", SourceType::Search), now).await;
    }
    db.insert_at(referred("bing.com", SourceType::Search), now).await;
    for _ in 0..2 {
        db.insert_at(referred("twitter.com", SourceType::Social), now).await;
    }
    let mut direct = view("192.0.2.10");
    direct.source_type = Some(SourceType::Direct);
    db.insert_at(direct, now).await;

    let stats = db.engine.get_referrer_stats("site", None).await.unwrap();
    let by_source: Vec<_> = stats.by_source.iter().map(|c| (c.value.as_str(), c.count)).collect();
    assert_eq!(by_source, vec![("search", 4), ("social", 2), ("direct", 1)]);

    let by_domain: Vec<_> = stats.by_domain.iter().map(|c| (c.value.as_str(), c.count)).collect();
    assert_eq!(
        by_domain,
        vec![("www.google.com", 3), ("twitter.com", 2), ("bing.com", 1)]
    );

    let limited = db.engine.get_referrer_stats("site", Some(1)).await.unwrap();
    assert_eq!(limited.by_domain.len(), 1);
    assert_eq!(limited.by_source.len(), 3);
}

#[tokio::test]
async fn test_browser_breakdowns() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();

    let client = |browser: &str, os: &str, device: DeviceType| {
        let mut attrs = view("192.0.2.3");
        attrs.browser = Some(browser.to_string());
        attrs.os = Some(os.to_string());
        attrs.device_type = Some(device);
        attrs
    };
    db.insert_at(client("Chrome", "Windows", DeviceType::Desktop), now).await;
    db.insert_at(client("Chrome", "Android", DeviceType::Mobile), now).await;
    db.insert_at(client("Safari", "iOS", DeviceType::Mobile), now).await;
    db.insert_at(view("192.0.2.3"), now).await;

    let stats = db.engine.get_browser_stats("site").await.unwrap();
    assert_eq!(stats.by_browser[0].value, "Chrome");
    assert_eq!(stats.by_browser[0].count, 2);
    assert_eq!(stats.by_os.len(), 3);
    assert_eq!(stats.by_device_type[0].value, "mobile");
    assert_eq!(stats.by_device_type[0].count, 2);
    // Rows without a classification are left out.
    assert_eq!(stats.by_device_type.iter().map(|c| c.count).sum::<i64>(), 3);
}

#[tokio::test]
async fn test_page_stats_rank_by_views() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();

    for _ in 0..3 {
        db.insert_at(view("192.0.2.4").with_page("/pricing", Some("Pricing".into())), now).await;
    }
    db.insert_at(view("192.0.2.4").with_page("/", Some("Home".into())), now).await;
    db.insert_at(view("192.0.2.4"), now).await;

    let pages = db.engine.get_page_stats("site", 20).await.unwrap();
    assert_eq!(pages.len(), 2);
    assert_eq!(pages[0].page_path, "/pricing");
    assert_eq!(pages[0].page_title.as_deref(), Some("Pricing"));
    assert_eq!(pages[0].views, 3);

    let top = db.engine.get_page_stats("site", 1).await.unwrap();
    assert_eq!(top.len(), 1);
}

#[tokio::test]
async fn test_session_details_are_chronological() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();

    let step = |page: &str| view("192.0.2.5").with_session("sess-1").with_page(page, None);
    db.insert_at(step("/checkout"), now).await;
    db.insert_at(step("/"), now - 120).await;
    db.insert_at(step("/cart"), now - 60).await;
    let mut click = step("/cart").with_event_type("add_to_cart");
    click.event_data = Some(serde_json::json!({"sku": "A-1"}));
    db.insert_at(click, now - 60).await;
    db.insert_at(view("192.0.2.5").with_session("sess-2"), now).await;

    let events = db.engine.get_session_details("site", "sess-1").await.unwrap();
    let pages: Vec<_> = events.iter().map(|e| e.page_path.as_deref().unwrap()).collect();
    assert_eq!(pages, vec!["/", "/cart", "/cart", "/checkout"]);
    assert_eq!(events[1].event_type, "pageview");
    assert_eq!(events[2].event_type, "add_to_cart");
    assert_eq!(events[2].event_data, Some(serde_json::json!({"sku": "A-1"})));
    assert!(events.iter().all(|e| e.masked_ip == "192.0.2.0"));

    let missing = db.engine.get_session_details("site", "nope").await.unwrap();
    assert!(missing.is_empty());
}

#[tokio::test]
async fn test_views_pagination_reports_total() {
    let db = Seeded::new().await;
    let now = Utc::now().timestamp();

    for i in 0..5 {
        db.insert_at(view("192.0.2.6"), now - 100 + i).await;
    }

    let first = db.engine.get_views("site", 2, 0).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.views.len(), 2);
    assert_eq!(first.views[0].timestamp, now - 96);
    assert_eq!(first.views[1].timestamp, now - 97);

    let last = db.engine.get_views("site", 2, 4).await.unwrap();
    assert_eq!(last.views.len(), 1);
    assert_eq!(last.views[0].timestamp, now - 100);
    assert_eq!(last.offset, 4);

    let past_end = db.engine.get_views("site", 2, 10).await.unwrap();
    assert!(past_end.views.is_empty());
    assert_eq!(past_end.total, 5);
}

#[tokio::test]
async fn test_reads_reject_unknown_tenant() {
    let db = Seeded::new().await;
    assert!(matches!(
        db.engine.get_page_stats("other", 10).await,
        Err(Error::Validation(_))
    ));
    assert!(matches!(
        db.engine.get_trends("other", TrendPeriod::Daily, 7).await,
        Err(Error::Validation(_))
    ));
}
