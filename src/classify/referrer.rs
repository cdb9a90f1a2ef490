//! Referrer classification

use serde::Serialize;
use url::Url;

use crate::models::{bounded, limits, EventAttributes, SourceType};

const SEARCH_ENGINES: &[&str] = &[
    "google",
    "bing",
    "yahoo",
    "duckduckgo",
    "baidu",
    "yandex",
    "ask",
    "aol",
    "ecosia",
    "qwant",
];

const SOCIAL_NETWORKS: &[&str] = &[
    "facebook",
    "twitter",
    "x.com",
    "instagram",
    "linkedin",
    "reddit",
    "pinterest",
    "tiktok",
    "youtube",
    "snapchat",
    "whatsapp",
    "telegram",
    "discord",
    "tumblr",
    "vk.com",
    "weibo",
    "line.me",
    "mastodon",
];

const EMAIL_PROVIDERS: &[&str] = &[
    "mail.google",
    "outlook",
    "mail.yahoo",
    "protonmail",
    "mail.aol",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferrerInfo {
    pub referrer: Option<String>,
    pub referrer_domain: Option<String>,
    pub source_type: SourceType,
}

impl ReferrerInfo {
    fn direct() -> Self {
        Self {
            referrer: None,
            referrer_domain: None,
            source_type: SourceType::Direct,
        }
    }

    pub fn apply(self, attrs: &mut EventAttributes) {
        attrs.referrer = self.referrer;
        attrs.referrer_domain = self.referrer_domain;
        attrs.source_type = Some(self.source_type);
    }
}

/// Classify a referrer URL.
///
/// The domain list checks run in order (search, social, email) as
/// substring matches on the lowercased host, so `mail.google.com` is
/// reported as search.
pub fn classify(referrer: Option<&str>) -> ReferrerInfo {
    let Some(raw) = referrer.map(str::trim).filter(|r| !r.is_empty()) else {
        return ReferrerInfo::direct();
    };
    let truncated = Some(bounded(raw, limits::REFERRER));

    let url = match Url::parse(raw) {
        Ok(url) => url,
        Err(_) => {
            return ReferrerInfo {
                referrer: truncated,
                referrer_domain: None,
                source_type: SourceType::Unknown,
            }
        }
    };

    let Some(host) = url.host_str().filter(|h| !h.is_empty()) else {
        return ReferrerInfo {
            referrer: truncated,
            referrer_domain: None,
            source_type: SourceType::Direct,
        };
    };

    let domain = host.to_ascii_lowercase();
    let matches_any = |list: &[&str]| list.iter().any(|needle| domain.contains(needle));

    let source_type = if matches_any(SEARCH_ENGINES) {
        SourceType::Search
    } else if matches_any(SOCIAL_NETWORKS) {
        SourceType::Social
    } else if matches_any(EMAIL_PROVIDERS) {
        SourceType::Email
    } else {
        // Campaign parameter names are matched case-sensitively.
        if raw.contains("utm_source") || raw.contains("utm_medium") {
            SourceType::Campaign
        } else {
            SourceType::Referral
        }
    };

    ReferrerInfo {
        referrer: truncated,
        referrer_domain: Some(bounded(&domain, limits::REFERRER_DOMAIN)),
        source_type,
    }
}
