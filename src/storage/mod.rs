pub mod gate;
pub mod postgres;
pub mod sqlite;
pub mod trait_def;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::{DatabaseBackend, DatabaseConfig};
use crate::tenant::TenantTable;

pub use gate::AdmissionGate;
pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{BucketCount, EventStorage, StorageError, StorageResult, SCHEMA_VERSION};

/// Connection pool sizing shared by both backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_connections: u32,
    /// Callers allowed to wait for a connection once all are in use.
    pub queue_limit: u32,
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 10,
            queue_limit: 64,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

impl PoolSettings {
    pub fn with_max_connections(max_connections: u32) -> Self {
        Self {
            max_connections,
            ..Self::default()
        }
    }
}

/// Secondary indexes of a tenant relation as `(name suffix, column list)`.
const TENANT_INDEXES: &[(&str, &str)] = &[
    ("timestamp", "timestamp"),
    ("ip_timestamp", "masked_ip, timestamp"),
    ("country", "country"),
    ("device_size", "device_size"),
    ("page_path", "page_path"),
    ("referrer_domain", "referrer_domain"),
    ("source_type", "source_type"),
    ("browser", "browser"),
    ("os", "os"),
    ("device_type", "device_type"),
    ("session_id", "session_id"),
    ("event_type", "event_type"),
];

/// `CREATE INDEX IF NOT EXISTS` statements for a tenant relation. The
/// syntax is shared by SQLite and PostgreSQL.
pub(crate) fn index_statements(table: &TenantTable) -> Vec<String> {
    TENANT_INDEXES
        .iter()
        .map(|(suffix, columns)| {
            format!(
                "CREATE INDEX IF NOT EXISTS {} ON {} ({})",
                table.index_name(suffix),
                table.quoted(),
                columns
            )
        })
        .collect()
}

/// Open the configured backend.
pub async fn connect(config: &DatabaseConfig) -> StorageResult<Arc<dyn EventStorage>> {
    let settings = config.pool_settings();
    let storage: Arc<dyn EventStorage> = match config.backend {
        DatabaseBackend::Sqlite => {
            info!(url = %config.url, "using SQLite storage");
            Arc::new(SqliteStorage::new(&config.url, &settings).await?)
        }
        DatabaseBackend::Postgres => {
            info!("using PostgreSQL storage");
            Arc::new(PostgresStorage::new(&config.url, &settings).await?)
        }
    };
    Ok(storage)
}
