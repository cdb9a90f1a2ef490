pub mod analytics;
pub mod api;
pub mod classify;
pub mod config;
pub mod error;
pub mod models;
pub mod privacy;
pub mod provision;
pub mod storage;
pub mod store;
pub mod tenant;

pub use error::{Error, Result};
