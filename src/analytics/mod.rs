//! Read path and request-side analytics helpers
//!
//! The aggregation engine answers every analytics query. The remaining
//! modules support the routing layer: client address extraction, country
//! lookup and the in-memory active-visitor view.

pub mod aggregator;
pub mod geoip;
pub mod ip_extractor;
pub mod realtime;

pub use aggregator::AggregationEngine;
pub use geoip::GeoIpService;
pub use ip_extractor::extract_client_ip;
pub use realtime::ActiveVisitors;
