//! User-agent classification
//!
//! Browser, OS and device are each decided by an ordered rule table; the
//! first rule that matches wins. Device rules yield the raw device kinds
//! commonly reported by UA parsers (`mobile`, `tablet`, `smarttv`, ...),
//! which are then normalized into [`DeviceType`].

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

use crate::models::{DeviceSize, DeviceType, EventAttributes};

/// Parsed client attributes. All fields are `None` for a missing user agent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub browser: Option<String>,
    pub browser_version: Option<String>,
    pub os: Option<String>,
    pub os_version: Option<String>,
    pub device_type: Option<DeviceType>,
}

impl ClientInfo {
    /// Device size derived from the device type; unknown devices count as large.
    pub fn device_size(&self) -> DeviceSize {
        self.device_type
            .map(DeviceType::device_size)
            .unwrap_or(DeviceSize::Large)
    }

    pub fn apply(self, attrs: &mut EventAttributes) {
        attrs.browser = self.browser;
        attrs.browser_version = self.browser_version;
        attrs.os = self.os;
        attrs.os_version = self.os_version;
        attrs.device_type = self.device_type;
    }
}

struct NamedRule {
    pattern: Regex,
    name: &'static str,
}

struct DeviceRule {
    pattern: Regex,
    unless: Option<Regex>,
    kind: &'static str,
}

const BROWSER_PATTERNS: &[(&str, &str)] = &[
    (r"Edg(?:e|A|iOS)?/([\d.]+)", "Edge"),
    (r"(?:OPR|Opera)/([\d.]+)", "Opera"),
    (r"SamsungBrowser/([\d.]+)", "Samsung Browser"),
    (r"YaBrowser/([\d.]+)", "Yandex"),
    (r"FxiOS/([\d.]+)", "Firefox"),
    (r"CriOS/([\d.]+)", "Chrome"),
    (r"HeadlessChrome/([\d.]+)", "Chrome Headless"),
    (r"Firefox/([\d.]+)", "Firefox"),
    (r"Chromium/([\d.]+)", "Chromium"),
    (r"Chrome/([\d.]+)", "Chrome"),
    (r"Version/([\d.]+).*Mobile.*Safari/", "Mobile Safari"),
    (r"Version/([\d.]+).*Safari/", "Safari"),
    (r"(?:iPhone|iPad|iPod).*AppleWebKit/", "Mobile Safari"),
    (r"MSIE ([\d.]+)", "IE"),
    (r"Trident/.*rv:([\d.]+)", "IE"),
];

const OS_PATTERNS: &[(&str, &str)] = &[
    (r"Windows Phone(?: OS)? ([\d.]+)", "Windows Phone"),
    (r"Windows NT ([\d.]+)", "Windows"),
    (r"(?:iPhone|iPad|iPod)(?:.*?OS (\d+(?:[_.]\d+)*))?", "iOS"),
    (r"Mac OS X(?: (\d+(?:[_.]\d+)*))?", "Mac OS"),
    (r"Android(?: ([\d.]+))?", "Android"),
    (r"CrOS \S+ ([\d.]+)", "Chrome OS"),
    (r"Ubuntu(?:/([\d.]+))?", "Ubuntu"),
    (r"Linux", "Linux"),
];

const DEVICE_PATTERNS: &[(&str, Option<&str>, &str)] = &[
    (r"(?i)playstation|xbox|nintendo", None, "console"),
    (
        r"(?i)smart-?tv|googletv|appletv|hbbtv|\broku\b|crkey|bravia|netcast|web0s|tizen.*\btv\b",
        None,
        "smarttv",
    ),
    (r"(?i)watchos|watch os|wear os|smartwatch|\bglass\b", None, "wearable"),
    (r"(?i)ipad|tablet|kindle|silk/|playbook|nexus (?:7|9|10)\b", None, "tablet"),
    (r"(?i)android", Some(r"(?i)mobile"), "tablet"),
    (
        r"(?i)iphone|ipod|mobile|blackberry|opera mini|iemobile|windows phone",
        None,
        "mobile",
    ),
];

fn named_rules(patterns: &[(&str, &'static str)]) -> Vec<NamedRule> {
    patterns
        .iter()
        .filter_map(|(pattern, name)| {
            Regex::new(pattern)
                .ok()
                .map(|pattern| NamedRule { pattern, name })
        })
        .collect()
}

static BROWSER_RULES: LazyLock<Vec<NamedRule>> = LazyLock::new(|| named_rules(BROWSER_PATTERNS));
static OS_RULES: LazyLock<Vec<NamedRule>> = LazyLock::new(|| named_rules(OS_PATTERNS));
static DEVICE_RULES: LazyLock<Vec<DeviceRule>> = LazyLock::new(|| {
    DEVICE_PATTERNS
        .iter()
        .filter_map(|(pattern, unless, kind)| {
            let pattern = Regex::new(pattern).ok()?;
            let unless = match unless {
                Some(p) => Some(Regex::new(p).ok()?),
                None => None,
            };
            Some(DeviceRule {
                pattern,
                unless,
                kind,
            })
        })
        .collect()
});

/// First matching rule's name plus its captured version, if any.
fn first_match(rules: &[NamedRule], user_agent: &str) -> Option<(&'static str, Option<String>)> {
    rules.iter().find_map(|rule| {
        rule.pattern.captures(user_agent).map(|caps| {
            let version = caps.get(1).map(|m| m.as_str().replace('_', "."));
            (rule.name, version)
        })
    })
}

fn raw_device_kind(user_agent: &str) -> Option<&'static str> {
    DEVICE_RULES
        .iter()
        .find(|rule| {
            rule.pattern.is_match(user_agent)
                && !rule.unless.as_ref().is_some_and(|u| u.is_match(user_agent))
        })
        .map(|rule| rule.kind)
}

/// Map a raw device kind onto the closed [`DeviceType`] set.
pub fn normalize_device_type(raw: Option<&str>) -> DeviceType {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("mobile") => DeviceType::Mobile,
        Some("tablet") => DeviceType::Tablet,
        Some("wearable") => DeviceType::Wearable,
        Some("smarttv") => DeviceType::Tv,
        Some("console") => DeviceType::Console,
        _ => DeviceType::Desktop,
    }
}

fn windows_release(nt_version: &str) -> String {
    match nt_version {
        "10.0" => "10",
        "6.3" => "8.1",
        "6.2" => "8",
        "6.1" => "7",
        "6.0" => "Vista",
        "5.1" | "5.2" => "XP",
        other => other,
    }
    .to_string()
}

pub fn parse(user_agent: Option<&str>) -> ClientInfo {
    let Some(ua) = user_agent.map(str::trim).filter(|ua| !ua.is_empty()) else {
        return ClientInfo::default();
    };

    let (browser, browser_version) = match first_match(&BROWSER_RULES, ua) {
        Some((name, version)) => (Some(name.to_string()), version),
        None => (None, None),
    };

    let (os, os_version) = match first_match(&OS_RULES, ua) {
        Some(("Windows", version)) => (Some("Windows".to_string()), version.map(|v| windows_release(&v))),
        Some((name, version)) => (Some(name.to_string()), version),
        None => (None, None),
    };

    ClientInfo {
        browser,
        browser_version,
        os,
        os_version,
        device_type: Some(normalize_device_type(raw_device_kind(ua))),
    }
}

/// Convenience size class for a user agent: mobile and wearable are small,
/// tablet is medium, everything else is large.
pub fn device_size(user_agent: Option<&str>) -> DeviceSize {
    parse(user_agent).device_size()
}
