//! Error taxonomy shared by the core and its collaborators.

use thiserror::Error;

use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum Error {
    /// Invalid or missing startup parameters. Fatal at process start.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A core operation reached a tenant whose relation was never provisioned.
    #[error("tenant '{tenant}' has not been provisioned")]
    NotInitialized { tenant: String },

    /// Tenant id or enum value outside the allow-list.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
