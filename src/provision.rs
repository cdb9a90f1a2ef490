//! Schema provisioning, run once at startup before any read or write.

use tracing::{error, info};

use crate::error::{Error, Result};
use crate::storage::{EventStorage, SCHEMA_VERSION};
use crate::tenant::TenantRegistry;

/// Summary of a provisioning run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionReport {
    pub tenants: Vec<String>,
    /// `false` when the schema marker was already present.
    pub version_recorded: bool,
}

/// Create the base container, every tenant relation with its indexes, and
/// the schema marker. Every step is a no-op when its target already exists,
/// so a run that failed partway can simply be repeated.
///
/// Tenants are processed one at a time. A tenant becomes usable by the
/// Event Store and the Aggregation Engine as soon as its relation exists.
pub async fn initialize(storage: &dyn EventStorage, registry: &TenantRegistry) -> Result<ProvisionReport> {
    storage.ensure_base().await.map_err(|e| {
        error!(error = %e, "failed to create the base storage container");
        Error::from(e)
    })?;

    let mut tenants = Vec::with_capacity(registry.len());
    for table in registry.tables() {
        storage.ensure_tenant_relation(table).await.map_err(|e| {
            error!(tenant = %table.tenant_id(), error = %e, "failed to provision tenant relation");
            Error::from(e)
        })?;
        registry.mark_provisioned(table);
        info!(tenant = %table.tenant_id(), "tenant relation ready");
        tenants.push(table.tenant_id().to_string());
    }

    let version_recorded = storage.record_schema_version(SCHEMA_VERSION).await?;
    if version_recorded {
        info!(version = SCHEMA_VERSION, "schema version recorded");
    } else {
        info!(version = SCHEMA_VERSION, "schema version already applied");
    }

    Ok(ProvisionReport {
        tenants,
        version_recorded,
    })
}
