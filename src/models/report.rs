//! Result shapes of the aggregation queries

use chrono::DateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// Event column a frequency breakdown can be grouped by.
///
/// Column names come from this closed set only; they are never taken from
/// request input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Country,
    DeviceSize,
    ReferrerDomain,
    SourceType,
    Browser,
    Os,
    DeviceType,
}

impl Dimension {
    pub fn column(self) -> &'static str {
        match self {
            Dimension::Country => "country",
            Dimension::DeviceSize => "device_size",
            Dimension::ReferrerDomain => "referrer_domain",
            Dimension::SourceType => "source_type",
            Dimension::Browser => "browser",
            Dimension::Os => "os",
            Dimension::DeviceType => "device_type",
        }
    }
}

/// One value of a frequency breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DimensionCount {
    pub value: String,
    pub count: i64,
}

/// Counters read in a single pass over a tenant relation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, FromRow)]
pub struct SummaryCounts {
    pub total_views: i64,
    pub unique_views: i64,
    pub unique_visitors: i64,
    pub last_24_hours: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsReport {
    pub total_views: i64,
    pub unique_views: i64,
    pub unique_visitors: i64,
    #[serde(rename = "last24Hours")]
    pub last_24_hours: i64,
    pub by_country: Vec<DimensionCount>,
    pub by_device: Vec<DimensionCount>,
}

/// Calendar granularity of a trend query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendPeriod {
    Hourly,
    #[default]
    Daily,
    Weekly,
}

/// 1970-01-05T00:00:00Z, the first Monday after the epoch.
const FIRST_MONDAY: i64 = 4 * 86_400;

impl TrendPeriod {
    /// Bucket width in seconds.
    pub fn width_secs(self) -> i64 {
        match self {
            TrendPeriod::Hourly => 3_600,
            TrendPeriod::Daily => 86_400,
            TrendPeriod::Weekly => 7 * 86_400,
        }
    }

    /// Timestamp that bucket boundaries are aligned to. Weeks start on Monday.
    pub fn origin(self) -> i64 {
        match self {
            TrendPeriod::Weekly => FIRST_MONDAY,
            TrendPeriod::Hourly | TrendPeriod::Daily => 0,
        }
    }

    /// Start of the bucket containing `timestamp`.
    pub fn bucket_start(self, timestamp: i64) -> i64 {
        let width = self.width_secs();
        let origin = self.origin();
        (timestamp - origin).div_euclid(width) * width + origin
    }

    /// Period key of a bucket start: `YYYY-MM-DD HH:00:00`, `YYYY-MM-DD` or
    /// the ISO week `YYYY-Www`.
    pub fn label(self, bucket_start: i64) -> String {
        let Some(at) = DateTime::from_timestamp(bucket_start, 0) else {
            return bucket_start.to_string();
        };
        match self {
            TrendPeriod::Hourly => at.format("%Y-%m-%d %H:00:00").to_string(),
            TrendPeriod::Daily => at.format("%Y-%m-%d").to_string(),
            TrendPeriod::Weekly => at.format("%G-W%V").to_string(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TrendPeriod::Hourly => "hourly",
            TrendPeriod::Daily => "daily",
            TrendPeriod::Weekly => "weekly",
        }
    }
}

impl fmt::Display for TrendPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrendPeriod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hourly" => Ok(TrendPeriod::Hourly),
            "daily" => Ok(TrendPeriod::Daily),
            "weekly" => Ok(TrendPeriod::Weekly),
            other => Err(Error::validation(format!(
                "period must be one of hourly, daily, weekly (got '{other}')"
            ))),
        }
    }
}

/// Row count of one calendar bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendPoint {
    pub period: String,
    pub bucket_start: i64,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerStats {
    pub by_source: Vec<DimensionCount>,
    pub by_domain: Vec<DimensionCount>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserStats {
    pub by_browser: Vec<DimensionCount>,
    #[serde(rename = "byOS")]
    pub by_os: Vec<DimensionCount>,
    pub by_device_type: Vec<DimensionCount>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct PageCount {
    pub page_path: String,
    pub page_title: Option<String>,
    pub views: i64,
}

/// One entry of the recent-views listing.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct ViewRow {
    pub masked_ip: String,
    pub country: Option<String>,
    pub timestamp: i64,
    pub device_size: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewsPage {
    pub views: Vec<ViewRow>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
