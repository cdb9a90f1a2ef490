//! Client and referrer classification used to enrich events before storage.

pub mod referrer;
pub mod user_agent;

pub use referrer::ReferrerInfo;
pub use user_agent::ClientInfo;
