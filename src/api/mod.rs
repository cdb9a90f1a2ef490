//! HTTP routing layer: input validation, client address extraction and
//! translation of core results into responses.

pub mod analytics;
pub mod error;
pub mod handlers;
pub mod routes;

pub use error::{ApiError, FieldError};
pub use handlers::AppState;
pub use routes::create_router;
