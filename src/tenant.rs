//! Tenant allow-list and identifier-safe relation references
//!
//! Every tenant owns exactly one event relation, named after its id. A
//! relation reference can only be obtained from [`TenantRegistry`], which
//! admits ids from the fixed allow-list supplied at construction time and
//! rejects anything that is not a plain identifier. Both the write path and
//! the read path resolve tenants through [`TenantRegistry::resolve`].

use dashmap::DashSet;
use std::collections::BTreeMap;
use tracing::error;

use crate::error::{Error, Result};

/// Longest accepted tenant id. Keeps `idx_<tenant>_<column>` under the
/// PostgreSQL 63-byte identifier limit.
pub const MAX_TENANT_ID_LEN: usize = 48;

/// A validated reference to one tenant's event relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantTable {
    tenant_id: String,
}

impl TenantTable {
    fn new(tenant_id: &str) -> Result<Self> {
        if !is_plain_identifier(tenant_id) {
            return Err(Error::config(format!(
                "tenant id '{tenant_id}' must be 1-{MAX_TENANT_ID_LEN} characters of [A-Za-z0-9_]"
            )));
        }
        Ok(Self {
            tenant_id: tenant_id.to_string(),
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Relation name quoted for use in SQL (same quoting on SQLite and PostgreSQL).
    pub fn quoted(&self) -> String {
        quote_ident(&self.tenant_id)
    }

    /// Quoted name of a secondary index on this relation.
    pub fn index_name(&self, suffix: &str) -> String {
        quote_ident(&format!("idx_{}_{}", self.tenant_id, suffix))
    }
}

/// Double-quote an identifier, doubling embedded quotes.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

fn is_plain_identifier(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_TENANT_ID_LEN
        && id.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_')
}

/// Closed set of tenants, fixed for the process lifetime.
#[derive(Debug)]
pub struct TenantRegistry {
    tables: BTreeMap<String, TenantTable>,
    provisioned: DashSet<String>,
}

impl TenantRegistry {
    pub fn new<I, S>(tenant_ids: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut tables = BTreeMap::new();
        for id in tenant_ids {
            let table = TenantTable::new(id.as_ref())?;
            tables.insert(table.tenant_id.clone(), table);
        }

        if tables.is_empty() {
            return Err(Error::config("tenant allow-list is empty"));
        }

        Ok(Self {
            tables,
            provisioned: DashSet::new(),
        })
    }

    /// Allowed tenant ids in sorted order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.tables.keys().map(String::as_str)
    }

    pub fn tables(&self) -> impl Iterator<Item = &TenantTable> {
        self.tables.values()
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn contains(&self, tenant_id: &str) -> bool {
        self.tables.contains_key(tenant_id)
    }

    /// Look up an allow-listed tenant without checking provisioning state.
    pub fn table(&self, tenant_id: &str) -> Result<&TenantTable> {
        self.tables
            .get(tenant_id)
            .ok_or_else(|| Error::validation(format!("unknown tenant '{tenant_id}'")))
    }

    pub(crate) fn mark_provisioned(&self, table: &TenantTable) {
        self.provisioned.insert(table.tenant_id.clone());
    }

    pub fn is_provisioned(&self, tenant_id: &str) -> bool {
        self.provisioned.contains(tenant_id)
    }

    /// Resolve a tenant id to its relation for a core operation.
    ///
    /// Fails with `Validation` for ids outside the allow-list and with
    /// `NotInitialized` for allowed ids whose relation is not provisioned yet.
    pub fn resolve(&self, tenant_id: &str) -> Result<&TenantTable> {
        let table = self.table(tenant_id)?;
        if !self.is_provisioned(tenant_id) {
            error!(tenant = %tenant_id, "core operation invoked before provisioning completed");
            return Err(Error::NotInitialized {
                tenant: tenant_id.to_string(),
            });
        }
        Ok(table)
    }
}
