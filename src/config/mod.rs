use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::models::DeviceSize;
use crate::privacy::UnrecognizedAddressPolicy;
use crate::storage::PoolSettings;
use crate::tenant::TenantRegistry;

pub const DEFAULT_APP_ID: &str = "example_app";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub allowed: AllowList,
    pub privacy: PrivacyConfig,
    pub analytics: AnalyticsConfig,
    /// Deduplication window applied when a caller does not send one.
    pub unique_visitor_window_hours: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub pool_size: u32,
    pub queue_limit: u32,
    pub acquire_timeout_secs: u64,
}

impl DatabaseConfig {
    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            max_connections: self.pool_size,
            queue_limit: self.queue_limit,
            acquire_timeout: Duration::from_secs(self.acquire_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Tenant ids and device sizes accepted by the routing layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowList {
    pub app_ids: Vec<String>,
    pub device_sizes: Vec<DeviceSize>,
}

impl AllowList {
    pub fn tenant_registry(&self) -> Result<TenantRegistry> {
        TenantRegistry::new(&self.app_ids)
    }

    pub fn allows_device_size(&self, size: DeviceSize) -> bool {
        self.device_sizes.contains(&size)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrivacyConfig {
    pub unrecognized_ip_policy: UnrecognizedAddressPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    #[default]
    None,
    Standard,
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    pub geoip_db_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    pub trusted_proxies: Vec<IpNet>,
    pub num_trusted_proxies: Option<usize>,
    /// How long a visitor counts as active for the realtime view.
    pub active_visitor_ttl_secs: u64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            geoip_db_path: None,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
            active_visitor_ttl_secs: 300,
        }
    }
}

/// Shape of the allow-list file.
#[derive(Debug, Default, Deserialize)]
struct AllowedFile {
    #[serde(default, rename = "appId", alias = "appid")]
    app_id: Vec<String>,
    #[serde(default, rename = "deviceSize", alias = "devicesize")]
    device_size: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match var("DATABASE_BACKEND")
            .unwrap_or_else(|| "sqlite".to_string())
            .to_lowercase()
            .as_str()
        {
            "sqlite" => DatabaseBackend::Sqlite,
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            other => {
                return Err(Error::config(format!(
                    "DATABASE_BACKEND must be sqlite or postgres (got '{other}')"
                )))
            }
        };

        let database = DatabaseConfig {
            backend,
            url: var("DATABASE_URL").unwrap_or_else(|| "sqlite://./viewcounter.db".to_string()),
            pool_size: parse_var(&var, "DB_POOL_SIZE", 10)?,
            queue_limit: parse_var(&var, "DB_QUEUE_LIMIT", 64)?,
            acquire_timeout_secs: parse_var(&var, "DB_ACQUIRE_TIMEOUT_SECS", 5)?,
        };
        if database.pool_size == 0 {
            return Err(Error::config("DB_POOL_SIZE must be at least 1"));
        }

        let server = ServerConfig {
            host: var("HOST").unwrap_or_else(|| "127.0.0.1".to_string()),
            port: parse_var(&var, "PORT", 3030)?,
        };

        let allowed_path = var("ALLOWED_FILE").unwrap_or_else(|| "./allowed.json".to_string());
        let allowed = load_allow_list(&allowed_path, var("ALLOWED_APP_IDS"))?;

        let unrecognized_ip_policy = match var("UNRECOGNIZED_IP_POLICY") {
            None => UnrecognizedAddressPolicy::default(),
            Some(v) => match v.to_lowercase().as_str() {
                "sentinel" => UnrecognizedAddressPolicy::Sentinel,
                "passthrough" => UnrecognizedAddressPolicy::Passthrough,
                other => {
                    return Err(Error::config(format!(
                        "UNRECOGNIZED_IP_POLICY must be sentinel or passthrough (got '{other}')"
                    )))
                }
            },
        };

        let trusted_proxy_mode = match var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                return Err(Error::config(format!(
                    "TRUSTED_PROXY_MODE must be none, standard or cloudflare (got '{other}')"
                )))
            }
        };

        let trusted_proxies = var("TRUSTED_PROXIES")
            .map(|list| parse_cidrs(&list))
            .transpose()?
            .unwrap_or_default();

        let num_trusted_proxies = var("NUM_TRUSTED_PROXIES")
            .map(|v| {
                v.trim().parse::<usize>().map_err(|_| {
                    Error::config(format!("NUM_TRUSTED_PROXIES must be a number (got '{v}')"))
                })
            })
            .transpose()?;

        let analytics = AnalyticsConfig {
            geoip_db_path: var("GEOIP_DB_PATH"),
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
            active_visitor_ttl_secs: parse_var(&var, "ACTIVE_VISITOR_TTL_SECS", 300)?,
        };

        Ok(Config {
            database,
            server,
            allowed,
            privacy: PrivacyConfig {
                unrecognized_ip_policy,
            },
            analytics,
            unique_visitor_window_hours: parse_var(&var, "UNIQUE_VISITOR_WINDOW_HOURS", 24)?,
        })
    }
}

fn parse_var<T, F>(var: &F, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("{key} has an invalid value '{raw}'"))),
    }
}

fn parse_cidrs(list: &str) -> Result<Vec<IpNet>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            // A bare address is a single-host network.
            s.parse::<IpNet>()
                .or_else(|_| s.parse::<std::net::IpAddr>().map(IpNet::from))
                .map_err(|_| Error::config(format!("TRUSTED_PROXIES entry '{s}' is not a CIDR")))
        })
        .collect()
}

/// Load the allow-list file (if present) and apply the app id override.
fn load_allow_list(path: &str, app_ids_override: Option<String>) -> Result<AllowList> {
    let file = if Path::new(path).exists() {
        ::config::Config::builder()
            .add_source(::config::File::new(path, ::config::FileFormat::Json))
            .build()
            .and_then(|c| c.try_deserialize::<AllowedFile>())
            .map_err(|e| Error::config(format!("failed to read allow-list file {path}: {e}")))?
    } else {
        AllowedFile::default()
    };

    let mut app_ids = match app_ids_override {
        Some(list) => list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => file.app_id,
    };
    if app_ids.is_empty() {
        warn!(
            "no allowed app ids configured, falling back to '{}'",
            DEFAULT_APP_ID
        );
        app_ids.push(DEFAULT_APP_ID.to_string());
    }

    let device_sizes = if file.device_size.is_empty() {
        DeviceSize::ALL.to_vec()
    } else {
        file.device_size
            .iter()
            .map(|s| {
                s.parse::<DeviceSize>().map_err(|_| {
                    Error::config(format!("allow-list device size '{s}' is not small, medium or large"))
                })
            })
            .collect::<Result<Vec<_>>>()?
    };

    Ok(AllowList {
        app_ids,
        device_sizes,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("ALLOWED_FILE", "/nonexistent/allowed.json")])).unwrap();

        assert_eq!(config.database.backend, DatabaseBackend::Sqlite);
        assert_eq!(config.database.url, "sqlite://./viewcounter.db");
        assert_eq!(config.database.pool_size, 10);
        assert_eq!(config.server.port, 3030);
        assert_eq!(config.unique_visitor_window_hours, 24);
        assert_eq!(config.allowed.app_ids, vec![DEFAULT_APP_ID.to_string()]);
        assert_eq!(config.allowed.device_sizes, DeviceSize::ALL.to_vec());
        assert_eq!(
            config.privacy.unrecognized_ip_policy,
            UnrecognizedAddressPolicy::Sentinel
        );
        assert_eq!(config.analytics.trusted_proxy_mode, TrustedProxyMode::None);
        assert_eq!(config.analytics.active_visitor_ttl_secs, 300);
    }

    #[test]
    fn test_invalid_values_are_configuration_errors() {
        for (key, value) in [
            ("DATABASE_BACKEND", "mysql"),
            ("PORT", "eighty"),
            ("DB_POOL_SIZE", "0"),
            ("UNRECOGNIZED_IP_POLICY", "drop"),
            ("TRUSTED_PROXY_MODE", "everyone"),
            ("TRUSTED_PROXIES", "10.0.0.0/99"),
        ] {
            let result = Config::from_lookup(lookup(&[
                ("ALLOWED_FILE", "/nonexistent/allowed.json"),
                (key, value),
            ]));
            assert!(
                matches!(result, Err(Error::Configuration(_))),
                "{key}={value} should be rejected"
            );
        }
    }

    #[test]
    fn test_app_id_override_and_proxies() {
        let config = Config::from_lookup(lookup(&[
            ("ALLOWED_FILE", "/nonexistent/allowed.json"),
            ("ALLOWED_APP_IDS", "blog, shop ,"),
            ("TRUSTED_PROXIES", "10.0.0.0/8, 192.0.2.1"),
            ("NUM_TRUSTED_PROXIES", "2"),
        ]))
        .unwrap();

        assert_eq!(config.allowed.app_ids, vec!["blog", "shop"]);
        assert_eq!(config.analytics.trusted_proxies.len(), 2);
        assert_eq!(config.analytics.num_trusted_proxies, Some(2));
        assert_eq!(config.allowed.tenant_registry().unwrap().len(), 2);
    }

    #[test]
    fn test_allow_list_file() {
        let path = std::env::temp_dir().join(format!("viewcounter-allowed-{}.json", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        write!(file, r#"{{"appId": ["site_one", "site_two"], "deviceSize": ["small", "large"]}}"#).unwrap();
        drop(file);

        let config = Config::from_lookup(lookup(&[("ALLOWED_FILE", path.to_str().unwrap())])).unwrap();
        assert_eq!(config.allowed.app_ids, vec!["site_one", "site_two"]);
        assert!(config.allowed.allows_device_size(DeviceSize::Small));
        assert!(!config.allowed.allows_device_size(DeviceSize::Medium));

        std::fs::write(&path, "{ not json").unwrap();
        let result = Config::from_lookup(lookup(&[("ALLOWED_FILE", path.to_str().unwrap())]));
        assert!(matches!(result, Err(Error::Configuration(_))));

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_pool_settings() {
        let config = Config::from_lookup(lookup(&[
            ("ALLOWED_FILE", "/nonexistent/allowed.json"),
            ("DB_POOL_SIZE", "3"),
            ("DB_QUEUE_LIMIT", "7"),
            ("DB_ACQUIRE_TIMEOUT_SECS", "2"),
        ]))
        .unwrap();
        let settings = config.database.pool_settings();
        assert_eq!(settings.max_connections, 3);
        assert_eq!(settings.queue_limit, 7);
        assert_eq!(settings.acquire_timeout, Duration::from_secs(2));
    }
}
