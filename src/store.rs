//! The write path.

use chrono::Utc;
use std::sync::Arc;
use tracing::debug;

use crate::error::Result;
use crate::models::{DeviceSize, EventAttributes, NewEvent, RegisterOutcome, PAGEVIEW};
use crate::privacy::{MaskedIp, UnrecognizedAddressPolicy};
use crate::storage::EventStorage;
use crate::tenant::TenantRegistry;

const SECS_PER_HOUR: i64 = 3_600;

/// Appends events to tenant relations.
///
/// The uniqueness lookup and the insert are two independent storage calls.
/// Two pageviews from the same masked address arriving close enough together
/// may both be marked unique.
#[derive(Clone)]
pub struct EventStore {
    storage: Arc<dyn EventStorage>,
    tenants: Arc<TenantRegistry>,
    policy: UnrecognizedAddressPolicy,
    default_window_hours: u32,
}

impl EventStore {
    pub fn new(
        storage: Arc<dyn EventStorage>,
        tenants: Arc<TenantRegistry>,
        policy: UnrecognizedAddressPolicy,
        default_window_hours: u32,
    ) -> Self {
        Self {
            storage,
            tenants,
            policy,
            default_window_hours,
        }
    }

    pub fn default_window_hours(&self) -> u32 {
        self.default_window_hours
    }

    /// Append one event and report its row id and uniqueness.
    ///
    /// The row is always stored; deduplication only decides `is_unique`.
    pub async fn register_event(
        &self,
        tenant_id: &str,
        attrs: EventAttributes,
    ) -> Result<RegisterOutcome> {
        let table = self.tenants.resolve(tenant_id)?;
        let masked_ip = MaskedIp::from_raw(&attrs.ip, self.policy);
        let now = Utc::now().timestamp();

        let window_hours = attrs.dedup_window_hours.unwrap_or(self.default_window_hours);
        let is_unique = if attrs.effective_event_type() == PAGEVIEW && window_hours > 0 {
            let since = now - i64::from(window_hours) * SECS_PER_HOUR;
            !self
                .storage
                .has_recent_pageview(table, &masked_ip, since)
                .await?
        } else {
            true
        };

        let event = NewEvent::from_attributes(attrs, masked_ip, now, is_unique);
        let insert_id = self.storage.insert_event(table, &event).await?;

        debug!(
            tenant = %tenant_id,
            insert_id,
            is_unique,
            event_type = %event.event_type,
            "event recorded"
        );

        Ok(RegisterOutcome {
            insert_id,
            is_unique,
        })
    }

    /// Pageview-only shorthand for callers that send nothing but the address,
    /// country and device size.
    pub async fn register_view(
        &self,
        tenant_id: &str,
        ip: &str,
        country: Option<&str>,
        device_size: DeviceSize,
        window_hours: u32,
    ) -> Result<RegisterOutcome> {
        let mut attrs = EventAttributes::new(ip, device_size)
            .with_event_type(PAGEVIEW)
            .with_window_hours(window_hours);
        attrs.country = country.map(str::to_string);
        self.register_event(tenant_id, attrs).await
    }
}
