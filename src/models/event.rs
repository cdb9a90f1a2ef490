use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::privacy::MaskedIp;

/// Event type that takes part in uniqueness tracking.
pub const PAGEVIEW: &str = "pageview";

/// Column limits of the event relation.
pub mod limits {
    pub const MASKED_IP: usize = 45;
    pub const COUNTRY: usize = 2;
    pub const PAGE_PATH: usize = 500;
    pub const PAGE_TITLE: usize = 200;
    pub const REFERRER: usize = 500;
    pub const REFERRER_DOMAIN: usize = 200;
    pub const BROWSER: usize = 50;
    pub const BROWSER_VERSION: usize = 20;
    pub const OS: usize = 50;
    pub const OS_VERSION: usize = 20;
    pub const SESSION_ID: usize = 64;
    pub const EVENT_TYPE: usize = 50;
}

macro_rules! text_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(Error::validation(format!(
                        concat!("invalid ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

text_enum!(
    /// Coarse screen class reported by (or derived for) the client.
    DeviceSize {
        Small => "small",
        Medium => "medium",
        Large => "large",
    }
);

text_enum!(
    /// Normalized client hardware category.
    DeviceType {
        Desktop => "desktop",
        Mobile => "mobile",
        Tablet => "tablet",
        Wearable => "wearable",
        Tv => "tv",
        Console => "console",
    }
);

text_enum!(
    /// Where a visit came from.
    SourceType {
        Direct => "direct",
        Search => "search",
        Social => "social",
        Email => "email",
        Campaign => "campaign",
        Referral => "referral",
        Unknown => "unknown",
    }
);

impl DeviceType {
    pub fn device_size(self) -> DeviceSize {
        match self {
            DeviceType::Mobile | DeviceType::Wearable => DeviceSize::Small,
            DeviceType::Tablet => DeviceSize::Medium,
            DeviceType::Desktop | DeviceType::Tv | DeviceType::Console => DeviceSize::Large,
        }
    }
}

/// Write input handed to the Event Store by the routing layer.
///
/// `ip` is the raw client address. It is masked before any storage access
/// and is redacted from the `Debug` output.
#[derive(Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventAttributes {
    pub ip: String,
    pub device_size: DeviceSize,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub page_path: Option<String>,
    #[serde(default)]
    pub page_title: Option<String>,
    #[serde(default)]
    pub referrer: Option<String>,
    #[serde(default)]
    pub referrer_domain: Option<String>,
    #[serde(default)]
    pub source_type: Option<SourceType>,
    #[serde(default)]
    pub browser: Option<String>,
    #[serde(default)]
    pub browser_version: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub device_type: Option<DeviceType>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub event_data: Option<serde_json::Value>,
    /// Overrides the store's default deduplication window.
    #[serde(default)]
    pub dedup_window_hours: Option<u32>,
}

impl EventAttributes {
    pub fn new(ip: impl Into<String>, device_size: DeviceSize) -> Self {
        Self {
            ip: ip.into(),
            device_size,
            country: None,
            page_path: None,
            page_title: None,
            referrer: None,
            referrer_domain: None,
            source_type: None,
            browser: None,
            browser_version: None,
            os: None,
            os_version: None,
            device_type: None,
            session_id: None,
            event_type: None,
            event_data: None,
            dedup_window_hours: None,
        }
    }

    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn with_window_hours(mut self, hours: u32) -> Self {
        self.dedup_window_hours = Some(hours);
        self
    }

    pub fn with_country(mut self, country: impl Into<String>) -> Self {
        self.country = Some(country.into());
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_page(mut self, path: impl Into<String>, title: Option<String>) -> Self {
        self.page_path = Some(path.into());
        self.page_title = title;
        self
    }

    /// Event type with the "pageview" default applied.
    pub fn effective_event_type(&self) -> &str {
        self.event_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .unwrap_or(PAGEVIEW)
    }
}

impl fmt::Debug for EventAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventAttributes")
            .field("ip", &"<redacted>")
            .field("device_size", &self.device_size)
            .field("country", &self.country)
            .field("page_path", &self.page_path)
            .field("source_type", &self.source_type)
            .field("device_type", &self.device_type)
            .field("session_id", &self.session_id)
            .field("event_type", &self.event_type)
            .field("dedup_window_hours", &self.dedup_window_hours)
            .finish_non_exhaustive()
    }
}

/// A fully prepared row, as handed to the storage layer.
#[derive(Debug, Clone, Serialize)]
pub struct NewEvent {
    pub masked_ip: MaskedIp,
    pub country: Option<String>,
    pub timestamp: i64,
    pub device_size: DeviceSize,
    pub page_path: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub referrer_domain: Option<String>,
    pub source_type: Option<SourceType>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<DeviceType>,
    pub session_id: Option<String>,
    pub event_type: String,
    /// JSON text of the event payload.
    pub event_data: Option<String>,
    pub is_unique: bool,
}

impl NewEvent {
    /// Build a row from caller attributes, applying column limits.
    pub fn from_attributes(
        attrs: EventAttributes,
        masked_ip: MaskedIp,
        timestamp: i64,
        is_unique: bool,
    ) -> Self {
        let event_type = bounded(attrs.effective_event_type(), limits::EVENT_TYPE);
        Self {
            masked_ip,
            country: attrs.country.as_deref().and_then(normalize_country),
            timestamp,
            device_size: attrs.device_size,
            page_path: bounded_opt(attrs.page_path, limits::PAGE_PATH),
            page_title: bounded_opt(attrs.page_title, limits::PAGE_TITLE),
            referrer: bounded_opt(attrs.referrer, limits::REFERRER),
            referrer_domain: bounded_opt(attrs.referrer_domain, limits::REFERRER_DOMAIN),
            source_type: attrs.source_type,
            browser: bounded_opt(attrs.browser, limits::BROWSER),
            browser_version: bounded_opt(attrs.browser_version, limits::BROWSER_VERSION),
            os: bounded_opt(attrs.os, limits::OS),
            os_version: bounded_opt(attrs.os_version, limits::OS_VERSION),
            device_type: attrs.device_type,
            session_id: bounded_opt(attrs.session_id, limits::SESSION_ID),
            event_type,
            event_data: attrs.event_data.map(|value| value.to_string()),
            is_unique,
        }
    }
}

/// Truncate to at most `max` characters.
pub fn bounded(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

fn bounded_opt(value: Option<String>, max: usize) -> Option<String> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| if v.chars().count() > max { bounded(&v, max) } else { v })
}

/// ISO 3166-1 alpha-2 codes only; anything else is dropped.
fn normalize_country(raw: &str) -> Option<String> {
    let code = raw.trim();
    if code.len() != limits::COUNTRY || !code.bytes().all(|b| b.is_ascii_alphabetic()) {
        return None;
    }
    Some(code.to_ascii_uppercase())
}

/// Raw row of the event relation.
#[derive(Debug, Clone, FromRow)]
pub struct EventRow {
    pub id: i64,
    pub masked_ip: String,
    pub country: Option<String>,
    pub timestamp: i64,
    pub device_size: String,
    pub page_path: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub referrer_domain: Option<String>,
    pub source_type: Option<String>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<String>,
    pub session_id: Option<String>,
    pub event_type: String,
    pub event_data: Option<String>,
    pub is_unique: bool,
}

/// A stored event as returned by session lookups.
#[derive(Debug, Clone, Serialize)]
pub struct StoredEvent {
    pub id: i64,
    pub masked_ip: String,
    pub country: Option<String>,
    pub timestamp: i64,
    pub device_size: DeviceSize,
    pub page_path: Option<String>,
    pub page_title: Option<String>,
    pub referrer: Option<String>,
    pub referrer_domain: Option<String>,
    pub source_type: Option<SourceType>,
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<DeviceType>,
    pub session_id: Option<String>,
    pub event_type: String,
    pub event_data: Option<serde_json::Value>,
    pub is_unique: bool,
}

fn parse_opt<T>(value: Option<String>) -> Result<Option<T>, String>
where
    T: FromStr<Err = Error>,
{
    value.map(|v| v.parse().map_err(|e: Error| e.to_string())).transpose()
}

impl TryFrom<EventRow> for StoredEvent {
    type Error = String;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_data = row
            .event_data
            .map(|text| serde_json::from_str(&text))
            .transpose()
            .map_err(|e| format!("event {} has malformed event_data: {e}", row.id))?;

        Ok(Self {
            id: row.id,
            masked_ip: row.masked_ip,
            country: row.country,
            timestamp: row.timestamp,
            device_size: row.device_size.parse().map_err(|e: Error| e.to_string())?,
            page_path: row.page_path,
            page_title: row.page_title,
            referrer: row.referrer,
            referrer_domain: row.referrer_domain,
            source_type: parse_opt(row.source_type)?,
            browser: row.browser,
            browser_version: row.browser_version,
            os: row.os,
            os_version: row.os_version,
            device_type: parse_opt(row.device_type)?,
            session_id: row.session_id,
            event_type: row.event_type,
            event_data,
            is_unique: row.is_unique,
        })
    }
}

/// Result of a single `register_event` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterOutcome {
    pub insert_id: i64,
    pub is_unique: bool,
}

impl RegisterOutcome {
    pub fn is_duplicate(&self) -> bool {
        !self.is_unique
    }
}
